// smartmarks services
// Process-level concerns around the core: settings, logging and the encrypted session vault.

pub mod logging;
pub mod session_vault;
pub mod settings_engine;
