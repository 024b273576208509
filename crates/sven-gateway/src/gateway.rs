// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! Gateway startup — assembles the session store, auth state, and the HTTP
//! server, then blocks until shutdown.
//!
//! # Startup sequence
//!
//! [`run`] performs these steps in order, then blocks on the HTTP server:
//!
//! 1. Open the transcript store at `config.store_path()`.
//! 2. Spawn the tool-call scheduler's tick loop against that store.
//! 3. Load or generate the bearer token; print it **once** if new.
//! 4. Build [`AppState`] (store + default model config + session registry).
//! 5. Start the Axum server (blocks until Ctrl+C / SIGTERM), then stop the
//!    scheduler once it returns.
//!
//! # Token management
//!
//! ```text
//! First start:  token generated -> SHA-256 hash stored in token.yaml,
//!               raw token printed once (save it!)
//! Client use:   Authorization: Bearer <token>
//! Rotate:       sven gateway regenerate-token
//!               old token immediately invalid
//! ```

use std::net::SocketAddr;
use std::sync::Arc;

use tracing::info;

use crate::config::GatewayConfig;
use crate::crypto::token::StoredTokenFile;
use crate::http::auth::AuthState;
use crate::state::AppState;

/// Start the gateway against `agent_config`, the model/agent/tools
/// configuration new sessions are built with. Also spawns the process-wide
/// tool-call scheduler against the same store. Runs until Ctrl+C or
/// SIGTERM, honoring `config.shutdown_deadline_secs` for in-flight SSE
/// streams. `on_bound` is called once with the actual bound address (which
/// may differ from `config.http.bind` if the requested port fell back to an
/// OS-assigned one).
pub async fn run(
    config: GatewayConfig,
    agent_config: sven_config::Config,
    on_bound: impl FnOnce(SocketAddr) + Send + 'static,
) -> anyhow::Result<()> {
    std::fs::create_dir_all(&config.data_dir)?;

    let store = sven_memory::Store::open(config.store_path())
        .map_err(|e| anyhow::anyhow!("opening transcript store: {e}"))?;
    let scheduler_handle = crate::scheduler::spawn(store.clone(), &agent_config)?;
    let store = Arc::new(store);

    let auth = if config.http.insecure_dev_mode {
        info!("insecure_dev_mode: skipping bearer-token bootstrap, auth disabled");
        AuthState::with_defaults(crate::crypto::token::RawToken::generate().into_stored())
    } else {
        let token_path = config.token_path();
        let token_hash = if token_path.exists() {
            StoredTokenFile::load(&token_path)?.token_hash
        } else {
            info!("generating new gateway bearer token");
            let raw = StoredTokenFile::generate_and_save(&token_path)?;
            info!("=======================================================");
            info!("Gateway bearer token (shown once — save it now!):");
            info!("  {}", raw.as_str());
            info!("=======================================================");
            StoredTokenFile::load(&token_path)?.token_hash
        };
        AuthState::with_defaults(token_hash)
    };

    let state = Arc::new(AppState::new(
        store,
        Arc::new(agent_config),
        config.preferences_path(),
        auth.clone(),
    ));

    info!(bind = %config.http.bind, insecure_dev_mode = config.http.insecure_dev_mode, "starting HTTP gateway");
    let result = crate::http::serve(
        &config.http,
        state,
        auth,
        config.shutdown_deadline_secs,
        on_bound,
    )
    .await;
    scheduler_handle.stop().await;
    result
}

/// Regenerate the HTTP bearer token, printing the new raw token once.
pub fn regenerate_token(config: &GatewayConfig) -> anyhow::Result<()> {
    let raw = StoredTokenFile::generate_and_save(&config.token_path())?;
    println!("New bearer token (save it now — it won't be shown again):");
    println!("  {}", raw.as_str());
    println!();
    println!("Usage:  Authorization: Bearer {}", raw.as_str());
    Ok(())
}
