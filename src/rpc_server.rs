//! smartmarks RPC server: JSON-RPC over stdin/stdout for a UI process.
//!
//! Protocol: one JSON object per line (newline-delimited JSON).
//! Request:  {"id":1, "method":"bookmark.add", "params":{"title":"...","url":"..."}}
//! Response: {"id":1, "result":{...}} or {"id":1, "error":"..."}
//! Events:   {"event":"bookmarks.changed", ...} pushed without a request.
//!
//! Logs go to stderr.

use std::sync::Arc;
use std::time::Instant;

use serde_json::{json, Value};
use tokio::io::{self, AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use smartmarks::app::App;
use smartmarks::rpc_handler::{forward_events, handle_method};
use smartmarks::services::logging;
use smartmarks::services::settings_engine::{SettingsEngine, SettingsEngineTrait};

const OUTBOUND_BUFFER: usize = 256;

/// Fixed-window limiter on incoming requests.
struct RateLimiter {
    window_start: Instant,
    request_count: u32,
    max_per_second: u32,
}

impl RateLimiter {
    fn new(max_per_second: u32) -> Self {
        Self { window_start: Instant::now(), request_count: 0, max_per_second }
    }

    fn check(&mut self) -> bool {
        if self.window_start.elapsed().as_secs() >= 1 {
            self.window_start = Instant::now();
            self.request_count = 0;
        }
        self.request_count += 1;
        self.request_count <= self.max_per_second
    }
}

#[tokio::main]
async fn main() {
    let mut settings = SettingsEngine::new(None);
    let loaded = settings.load();
    logging::init(&settings.get_settings().logging);
    if let Err(e) = loaded {
        warn!(error = %e, path = %settings.get_config_path().display(), "settings unreadable; using defaults");
    }

    let app = match App::open(settings) {
        Ok(app) => app,
        Err(e) => {
            error!(error = %e, "failed to initialize smartmarks");
            std::process::exit(1);
        }
    };

    let (out_tx, mut out_rx) = mpsc::channel::<Value>(OUTBOUND_BUFFER);
    let writer = tokio::spawn(async move {
        let mut stdout = io::stdout();
        while let Some(message) = out_rx.recv().await {
            let mut line = message.to_string();
            line.push('\n');
            if stdout.write_all(line.as_bytes()).await.is_err() || stdout.flush().await.is_err() {
                break;
            }
        }
    });

    let _ = out_tx
        .send(json!({"event": "ready", "version": env!("CARGO_PKG_VERSION")}))
        .await;
    forward_events(&app, out_tx.clone());
    app.start().await;

    let mut rate_limiter = RateLimiter::new(200);
    let mut lines = BufReader::new(io::stdin()).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                warn!(error = %e, "stdin read failed");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let req: Value = match serde_json::from_str(&line) {
            Ok(v) => v,
            Err(e) => {
                let _ = out_tx.send(json!({"id": null, "error": format!("parse error: {}", e)})).await;
                continue;
            }
        };
        let id = req.get("id").cloned().unwrap_or(Value::Null);

        if !rate_limiter.check() {
            let _ = out_tx.send(json!({"id": id, "error": "rate limit exceeded"})).await;
            continue;
        }

        let method = req.get("method").and_then(Value::as_str).unwrap_or("").to_string();
        let params = req.get("params").cloned().unwrap_or(json!({}));
        let app = Arc::clone(&app);
        let tx = out_tx.clone();
        tokio::spawn(async move {
            let response = match handle_method(&app, &method, &params).await {
                Ok(val) => json!({"id": id, "result": val}),
                Err(err) => json!({"id": id, "error": err}),
            };
            let _ = tx.send(response).await;
        });
    }

    info!("stdin closed; shutting down");
    app.shutdown();
    drop(out_tx);
    let _ = writer.await;
}
