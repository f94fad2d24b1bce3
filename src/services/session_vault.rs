//! Session Vault for smartmarks.
//!
//! Persists the hosted auth session in SQLite, encrypted with AES-256-GCM
//! (`ring`) under a PBKDF2-derived key, so a restart can resolve the prior
//! session without signing in again.

use std::num::NonZeroU32;
use std::sync::Arc;

use ring::aead::{self, Aad, BoundKey, Nonce, NonceSequence, UnboundKey, AES_256_GCM};
use ring::pbkdf2;
use ring::rand::{SecureRandom, SystemRandom};
use rusqlite::params;
use zeroize::Zeroizing;

use crate::database::connection::Database;
use crate::types::errors::VaultError;
use crate::types::session::AuthSession;

/// Vault key material.
const VAULT_KEY_PASSPHRASE: &str = "smartmarks-auth-vault-v1";
const VAULT_KEY_SALT: &[u8] = b"smartmarks-vault";

const PBKDF2_ITERATIONS: u32 = 100_000;
const KEY_LENGTH: usize = 32;
const NONCE_LENGTH: usize = 12;
const TAG_LENGTH: usize = 16;

/// Yields one nonce, then refuses; every seal/open gets a fresh key object.
struct SingleNonce(Option<[u8; NONCE_LENGTH]>);

impl NonceSequence for SingleNonce {
    fn advance(&mut self) -> Result<Nonce, ring::error::Unspecified> {
        self.0
            .take()
            .map(Nonce::assume_unique_for_key)
            .ok_or(ring::error::Unspecified)
    }
}

/// Encrypted storage for one [`AuthSession`].
pub struct SessionVault {
    db: Arc<Database>,
    rng: SystemRandom,
    key: Zeroizing<Vec<u8>>,
}

impl SessionVault {
    pub fn new(db: Arc<Database>) -> Result<Self, VaultError> {
        Ok(Self {
            db,
            rng: SystemRandom::new(),
            key: derive_key(VAULT_KEY_PASSPHRASE, VAULT_KEY_SALT)?,
        })
    }

    /// Serializes, encrypts and stores `session`, replacing any previous one.
    pub fn save(&self, session: &AuthSession) -> Result<(), VaultError> {
        let json = Zeroizing::new(
            serde_json::to_vec(session).map_err(|e| VaultError::Serialization(e.to_string()))?,
        );
        let (ciphertext, iv, auth_tag) = self.seal(&json)?;

        self.db
            .connection()
            .execute(
                "INSERT OR REPLACE INTO auth_vault (id, ciphertext, iv, auth_tag, updated_at) VALUES ('default', ?1, ?2, ?3, ?4)",
                params![ciphertext, iv, auth_tag, chrono::Utc::now().timestamp()],
            )
            .map_err(|e| VaultError::Database(e.to_string()))?;
        Ok(())
    }

    /// Loads and decrypts the stored session, if there is one.
    pub fn load(&self) -> Result<Option<AuthSession>, VaultError> {
        let result = self.db.connection().query_row(
            "SELECT ciphertext, iv, auth_tag FROM auth_vault WHERE id = 'default'",
            [],
            |row| {
                let ciphertext: Vec<u8> = row.get(0)?;
                let iv: Vec<u8> = row.get(1)?;
                let auth_tag: Vec<u8> = row.get(2)?;
                Ok((ciphertext, iv, auth_tag))
            },
        );

        match result {
            Ok((ciphertext, iv, auth_tag)) => {
                let json = self.open(ciphertext, &iv, &auth_tag)?;
                let session = serde_json::from_slice(&json)
                    .map_err(|e| VaultError::Serialization(e.to_string()))?;
                Ok(Some(session))
            }
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(VaultError::Database(e.to_string())),
        }
    }

    pub fn clear(&self) -> Result<(), VaultError> {
        self.db
            .connection()
            .execute("DELETE FROM auth_vault", [])
            .map_err(|e| VaultError::Database(e.to_string()))?;
        Ok(())
    }

    fn seal(&self, plaintext: &[u8]) -> Result<(Vec<u8>, Vec<u8>, Vec<u8>), VaultError> {
        let mut nonce = [0u8; NONCE_LENGTH];
        self.rng
            .fill(&mut nonce)
            .map_err(|_| VaultError::Crypto("Failed to generate nonce".to_string()))?;

        let unbound = UnboundKey::new(&AES_256_GCM, &self.key)
            .map_err(|_| VaultError::Crypto("Failed to create encryption key".to_string()))?;
        let mut sealing = aead::SealingKey::new(unbound, SingleNonce(Some(nonce)));

        let mut in_out = plaintext.to_vec();
        sealing
            .seal_in_place_append_tag(Aad::empty(), &mut in_out)
            .map_err(|_| VaultError::Crypto("Encryption operation failed".to_string()))?;

        // ring appends the tag; store it separately.
        let auth_tag = in_out.split_off(in_out.len() - TAG_LENGTH);
        Ok((in_out, nonce.to_vec(), auth_tag))
    }

    fn open(&self, ciphertext: Vec<u8>, iv: &[u8], auth_tag: &[u8]) -> Result<Zeroizing<Vec<u8>>, VaultError> {
        if iv.len() != NONCE_LENGTH || auth_tag.len() != TAG_LENGTH {
            return Err(VaultError::Crypto("Stored session has a malformed IV or tag".to_string()));
        }
        let mut nonce = [0u8; NONCE_LENGTH];
        nonce.copy_from_slice(iv);

        let unbound = UnboundKey::new(&AES_256_GCM, &self.key)
            .map_err(|_| VaultError::Crypto("Failed to create decryption key".to_string()))?;
        let mut opening = aead::OpeningKey::new(unbound, SingleNonce(Some(nonce)));

        let mut in_out = ciphertext;
        in_out.extend_from_slice(auth_tag);
        let plaintext_len = opening
            .open_in_place(Aad::empty(), &mut in_out)
            .map_err(|_| VaultError::Crypto("Decryption failed: data tampered or wrong key".to_string()))?
            .len();
        in_out.truncate(plaintext_len);
        Ok(Zeroizing::new(in_out))
    }
}

fn derive_key(passphrase: &str, salt: &[u8]) -> Result<Zeroizing<Vec<u8>>, VaultError> {
    let iterations = NonZeroU32::new(PBKDF2_ITERATIONS)
        .ok_or_else(|| VaultError::Crypto("Invalid iteration count".to_string()))?;
    let mut key = Zeroizing::new(vec![0u8; KEY_LENGTH]);
    pbkdf2::derive(
        pbkdf2::PBKDF2_HMAC_SHA256,
        iterations,
        salt,
        passphrase.as_bytes(),
        &mut key,
    );
    Ok(key)
}
