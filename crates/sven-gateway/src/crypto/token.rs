// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! The gateway's bearer secret: a 32-byte random token, hashed with SHA-256
//! before it ever touches disk.
//!
//! The raw token is shown to the operator exactly once (at generation time)
//! and is never written anywhere in cleartext. Everything persisted —
//! the lockfile, `token.yaml` — stores the hex-encoded hash only.

use std::fs;
use std::io;
use std::path::Path;

use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

const TOKEN_BYTES: usize = 32;

/// A freshly generated secret, held in memory just long enough to print it
/// and derive its stored hash.
pub struct RawToken {
    hex: String,
}

impl RawToken {
    /// Generate 32 bytes of CSPRNG output, hex-encoded.
    pub fn generate() -> Self {
        let mut bytes = [0u8; TOKEN_BYTES];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self { hex: hex::encode(bytes) }
    }

    pub fn as_str(&self) -> &str {
        &self.hex
    }

    pub fn into_stored(self) -> StoredToken {
        StoredToken::from_raw(&self.hex)
    }
}

/// The SHA-256 hash of a bearer token, hex-encoded. Safe to persist and to
/// hold in process memory long-term.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredToken {
    hash_hex: String,
}

impl StoredToken {
    fn from_raw(raw_hex: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(raw_hex.as_bytes());
        Self { hash_hex: hex::encode(hasher.finalize()) }
    }

    /// Constant-time comparison against a presented raw token.
    pub fn verify(&self, presented: &str) -> bool {
        let candidate = Self::from_raw(presented);
        self.hash_hex.as_bytes().ct_eq(candidate.hash_hex.as_bytes()).into()
    }
}

/// On-disk shape of `token.yaml`: just the stored hash, plus a timestamp for
/// operator visibility into when it was last rotated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredTokenFile {
    pub token_hash: StoredToken,
    pub generated_at: chrono::DateTime<chrono::Utc>,
}

impl StoredTokenFile {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = fs::read_to_string(path)?;
        Ok(serde_yaml::from_str(&text)?)
    }

    /// Generate a new token, persist its hash at `path` (mode 0600), and
    /// return the raw token so the caller can show it to the operator once.
    pub fn generate_and_save(path: &Path) -> anyhow::Result<RawToken> {
        let raw = RawToken::generate();
        let file = StoredTokenFile {
            token_hash: StoredToken::from_raw(raw.as_str()),
            generated_at: chrono::Utc::now(),
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let text = serde_yaml::to_string(&file)?;
        fs::write(path, text)?;
        set_private_mode(path)?;
        Ok(raw)
    }
}

#[cfg(unix)]
fn set_private_mode(path: &Path) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600))
}

#[cfg(not(unix))]
fn set_private_mode(_path: &Path) -> io::Result<()> {
    Ok(())
}
