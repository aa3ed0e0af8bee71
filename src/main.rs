//! Language Arcade · Lesson Backend
//!
//! - Axum HTTP API: lesson generation and answer feedback behind Firebase auth
//! - Daily per-user quota on both actions (Redis, with an in-process fallback)
//! - OpenAI chat completions for lesson plans and feedback
//! - Static SPA fallback (./static/index.html)
//!
//! Important env variables:
//!   PORT                 : u16 (default 8000)
//!   OPENAI_API_KEY       : required
//!   OPENAI_BASE_URL      : default "https://api.openai.com/v1"
//!   OPENAI_MODEL         : default "gpt-4o-mini"
//!   FIREBASE_PROJECT_ID  : or FIREBASE_SERVICE_ACCOUNT_JSON (its project_id is used)
//!   REDIS_URL            : or REDIS_HOST / REDIS_PORT / REDIS_USERNAME / REDIS_PASSWORD / REDIS_TLS
//!   CORS_ALLOWED_ORIGINS : comma separated (default localhost:3000)
//!   ARCADE_CONFIG_PATH   : path to TOML config (prompts + quota tuning)
//!   LOG_LEVEL            : tracing filter, e.g. "debug" or full directives
//!   LOG_FORMAT           : "pretty" (default) or "json"
//!
//! Without Redis every instance keeps its own quota counters, so the limits
//! only hold for a single-instance deployment.

mod auth;
mod config;
mod domain;
mod error;
mod logic;
mod openai;
mod protocol;
mod quota;
mod routes;
mod sanitize;
mod state;
mod telemetry;
mod util;

#[cfg(test)]
mod test_support;

use std::{net::SocketAddr, sync::Arc};
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::config::cors_origins_from_env;
use crate::routes::build_router;
use crate::state::AppState;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
  telemetry::init_tracing();

  // Shared application state (quota ledger, verifier, OpenAI client, prompts).
  let state = match AppState::from_env().await {
    Ok(s) => Arc::new(s),
    Err(e) => {
      error!(target: "arcade_backend", error = %e, "Startup configuration incomplete");
      return Err(e.into());
    }
  };

  // Build the HTTP router with routes, CORS and tracing layers.
  let app = build_router(state, &cors_origins_from_env());

  // Read port from env or default to 8000.
  let addr: SocketAddr = std::env::var("PORT")
    .ok()
    .and_then(|p| p.parse::<u16>().ok())
    .map(|port| SocketAddr::from(([0, 0, 0, 0], port)))
    .unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], 8000)));

  let listener = TcpListener::bind(addr).await?;
  info!(target: "arcade_backend", %addr, "HTTP server listening");
  axum::serve(listener, app)
    .with_graceful_shutdown(shutdown_signal())
    .await?;
  info!(target: "arcade_backend", "HTTP server stopped");
  Ok(())
}

async fn shutdown_signal() {
  if let Err(e) = tokio::signal::ctrl_c().await {
    error!(target: "arcade_backend", error = %e, "Failed to listen for shutdown signal");
    std::future::pending::<()>().await;
  }
}
