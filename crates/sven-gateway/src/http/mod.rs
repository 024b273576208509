// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Router assembly: binds the listener, wires middleware, and serves until
//! the process is asked to shut down.

pub mod auth;
pub mod handlers;
pub mod security;
pub mod sse;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::config::HttpConfig;
use crate::state::AppState;

/// Builds the full route tree over `state`. Split out from [`serve`] so
/// tests can exercise the router without binding a socket.
pub fn router(state: Arc<AppState>, auth: auth::AuthState, insecure_dev_mode: bool) -> Router {
    let api = Router::new()
        .route("/sessions", post(handlers::create_session).get(handlers::list_sessions))
        .route(
            "/sessions/:id",
            get(handlers::get_session).delete(handlers::delete_session),
        )
        .route("/sessions/:id/messages", get(handlers::get_messages))
        .route("/sessions/:id/submit", post(handlers::submit))
        .route("/sessions/:id/cancel", post(handlers::cancel))
        .route("/sessions/:id/ask-response", post(handlers::ask_response))
        .route("/sessions/:id/model", post(handlers::set_model))
        .route("/sessions/:id/title", post(handlers::set_title))
        .route("/sessions/:id/tags", post(handlers::set_tags))
        .route("/sessions/:id/branch", post(handlers::branch_session))
        .route("/config", get(handlers::get_config).post(handlers::set_config))
        .route("/mcp/tools", get(handlers::mcp_tools));

    let api = if insecure_dev_mode {
        api
    } else {
        api.layer(axum::middleware::from_fn_with_state(state.clone(), auth::bearer_auth_mw::<Arc<AppState>>))
    };

    // `/health` is merged in unauthenticated so a process supervisor can
    // probe liveness without a token.
    let api = Router::new()
        .route("/health", get(handlers::health))
        .merge(api);

    Router::new()
        .nest("/api", api)
        .layer(axum::middleware::from_fn(security::csrf_guard))
        .layer(axum::middleware::from_fn(security::security_headers))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Binds `config.bind`, falling back to an OS-assigned port on the same
/// host if the requested port is taken, then serves until the process
/// receives a shutdown signal. `on_bound` is called once with the actual
/// bound address before the server starts accepting connections.
pub async fn serve(
    config: &HttpConfig,
    state: Arc<AppState>,
    auth: auth::AuthState,
    shutdown_deadline_secs: u64,
    on_bound: impl FnOnce(SocketAddr) + Send + 'static,
) -> anyhow::Result<()> {
    let addr = bind_address(&config.bind)?;
    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(_) => {
            let mut fallback = addr;
            fallback.set_port(0);
            tokio::net::TcpListener::bind(fallback).await?
        }
    };
    let bound = listener.local_addr()?;
    tracing::info!(%bound, "gateway listening");
    on_bound(bound);

    let app = router(state, auth, config.insecure_dev_mode);
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal(shutdown_deadline_secs))
        .await?;
    Ok(())
}

fn bind_address(bind: &str) -> anyhow::Result<SocketAddr> {
    bind.parse()
        .map_err(|e| anyhow::anyhow!("invalid bind address {bind:?}: {e}"))
}

/// Waits for Ctrl+C / SIGTERM, then arms a hard deadline: if in-flight
/// `/submit` SSE streams haven't drained within `deadline_secs` of the
/// signal, the process exits immediately instead of hanging on open
/// connections indefinitely.
async fn shutdown_signal(deadline_secs: u64) {
    wait_for_signal().await;
    tracing::info!("shutdown signal received, draining in-flight requests");
    tokio::spawn(async move {
        tokio::time::sleep(std::time::Duration::from_secs(deadline_secs)).await;
        tracing::warn!(deadline_secs, "shutdown deadline elapsed, forcing exit");
        std::process::exit(0);
    });
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(_) => return,
    };
    tokio::select! {
        _ = sigterm.recv() => {}
        _ = tokio::signal::ctrl_c() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::token::RawToken;

    #[test]
    fn bind_address_parses_host_and_port() {
        let addr = bind_address("127.0.0.1:8080").unwrap();
        assert_eq!(addr.port(), 8080);
        assert!(addr.ip().is_loopback());
    }

    #[test]
    fn bind_address_rejects_garbage() {
        assert!(bind_address("not-an-address").is_err());
    }

    #[test]
    fn bind_address_accepts_ephemeral_port() {
        let addr = bind_address("127.0.0.1:0").unwrap();
        assert_eq!(addr.port(), 0);
    }

    fn test_state() -> Arc<AppState> {
        let store = Arc::new(sven_memory::Store::open_in_memory().unwrap());
        Arc::new(AppState::new(
            store,
            Arc::new(sven_config::Config::default()),
            std::path::PathBuf::from("/tmp/sven-gateway-test-prefs.json"),
            auth::AuthState::new(RawToken::generate().into_stored(), 60, 10),
        ))
    }

    #[test]
    fn router_builds_in_both_auth_modes() {
        let state = test_state();
        let auth = auth::AuthState::new(RawToken::generate().into_stored(), 60, 10);
        let _ = router(Arc::clone(&state), auth.clone(), false);
        let _ = router(state, auth, true);
    }
}
