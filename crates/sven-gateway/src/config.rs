// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Gateway configuration: where to bind, where the bearer token and session
//! store live, and how long to wait for in-flight turns on shutdown.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

fn default_bind() -> String {
    "127.0.0.1:0".to_string()
}

fn default_shutdown_deadline_secs() -> u64 {
    30
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Address to bind. Port `0` means "ask the OS for any free port", which
    /// is also the fallback when the requested port is already taken.
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Where the hashed bearer token is persisted. Defaults under the
    /// gateway's data directory.
    #[serde(default)]
    pub token_file: Option<PathBuf>,
    /// Skips token bootstrap and auth entirely. Only for local development —
    /// never set this on anything but loopback.
    #[serde(default)]
    pub insecure_dev_mode: bool,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            token_file: None,
            insecure_dev_mode: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default)]
    pub http: HttpConfig,
    /// Directory holding the transcript store, lockfile, and token file when
    /// no more specific path is given.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Upper bound on how long shutdown waits for in-flight `/submit` SSE
    /// streams to finish before force-closing connections.
    #[serde(default = "default_shutdown_deadline_secs")]
    pub shutdown_deadline_secs: u64,
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("sven")
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            http: HttpConfig::default(),
            data_dir: default_data_dir(),
            shutdown_deadline_secs: default_shutdown_deadline_secs(),
        }
    }
}

impl GatewayConfig {
    pub fn token_path(&self) -> PathBuf {
        self.http
            .token_file
            .clone()
            .unwrap_or_else(|| self.data_dir.join("gateway_token.yaml"))
    }

    pub fn lockfile_path(&self) -> PathBuf {
        self.data_dir.join("server.lock")
    }

    pub fn store_path(&self) -> PathBuf {
        self.data_dir.join("transcripts.sqlite")
    }

    pub fn preferences_path(&self) -> PathBuf {
        self.data_dir.join("preferences.json")
    }
}

/// Load gateway configuration from `path`, or fall back to defaults if no
/// path is given and none exists at the conventional location.
pub fn load(path: Option<&Path>) -> anyhow::Result<GatewayConfig> {
    let candidate = path.map(PathBuf::from).or_else(default_config_path);
    match candidate {
        Some(p) if p.is_file() => {
            let text = std::fs::read_to_string(&p)?;
            Ok(serde_yaml::from_str(&text)?)
        }
        _ => Ok(GatewayConfig::default()),
    }
}

fn default_config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(".config/sven/gateway.yaml"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_binds_loopback_any_port() {
        let cfg = GatewayConfig::default();
        assert_eq!(cfg.http.bind, "127.0.0.1:0");
        assert!(!cfg.http.insecure_dev_mode);
    }

    #[test]
    fn token_path_falls_back_to_data_dir() {
        let mut cfg = GatewayConfig::default();
        cfg.data_dir = PathBuf::from("/tmp/sven-test-data");
        assert_eq!(cfg.token_path(), PathBuf::from("/tmp/sven-test-data/gateway_token.yaml"));
    }

    #[test]
    fn explicit_token_file_overrides_data_dir() {
        let mut cfg = GatewayConfig::default();
        cfg.http.token_file = Some(PathBuf::from("/etc/sven/token.yaml"));
        assert_eq!(cfg.token_path(), PathBuf::from("/etc/sven/token.yaml"));
    }

    #[test]
    fn load_missing_path_returns_defaults() {
        let cfg = load(Some(Path::new("/tmp/sven_gateway_cfg_does_not_exist.yaml"))).unwrap();
        assert_eq!(cfg.http.bind, "127.0.0.1:0");
    }
}
