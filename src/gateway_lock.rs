// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! `server.lock`: records which process (if any) currently owns a gateway
//! data directory, so a second `sven serve` invocation can refuse to start
//! two daemons against the same transcript store, and `sven gateway status`
//! can report whether one is running.
//!
//! The lock is advisory, not a flock — staleness is detected by probing the
//! recorded port's `/api/health` endpoint rather than by OS-level file
//! locking, since the process that held the lock may have been on a
//! different machine's mounted volume or simply killed without a chance to
//! clean up.

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockFile {
    pub pid: u32,
    pub port: u16,
    pub started_at: chrono::DateTime<chrono::Utc>,
}

impl LockFile {
    pub fn new(port: u16) -> Self {
        Self {
            pid: std::process::id(),
            port,
            started_at: chrono::Utc::now(),
        }
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let text = serde_json::to_string_pretty(self)?;
        fs::write(path, text)?;
        set_private_mode(path)?;
        Ok(())
    }

    pub fn remove(path: &Path) {
        let _ = fs::remove_file(path);
    }

    /// True if no process answers `GET /api/health` on the recorded port
    /// within a short timeout — the lock's owner is gone or wedged.
    pub async fn is_stale(&self) -> bool {
        let url = format!("http://127.0.0.1:{}/api/health", self.port);
        let client = match reqwest::Client::builder()
            .timeout(Duration::from_millis(500))
            .build()
        {
            Ok(c) => c,
            Err(_) => return true,
        };
        match client.get(&url).send().await {
            Ok(resp) => !resp.status().is_success(),
            Err(_) => true,
        }
    }
}

#[cfg(unix)]
fn set_private_mode(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600))
}

#[cfg(not(unix))]
fn set_private_mode(_path: &Path) -> std::io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("server.lock");
        let lock = LockFile::new(4242);
        lock.save(&path).unwrap();

        let loaded = LockFile::load(&path).unwrap();
        assert_eq!(loaded.pid, lock.pid);
        assert_eq!(loaded.port, 4242);
    }

    #[tokio::test]
    async fn unreachable_port_is_stale() {
        let lock = LockFile {
            pid: 1,
            port: 1,
            started_at: chrono::Utc::now(),
        };
        assert!(lock.is_stale().await);
    }

    #[test]
    #[cfg(unix)]
    fn saved_file_is_mode_0600() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempdir().unwrap();
        let path = dir.path().join("server.lock");
        LockFile::new(1).save(&path).unwrap();
        let mode = fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);
    }
}
