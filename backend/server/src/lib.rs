//! Backend of the UniLife Festival site.
//!
//!
//!
//! # General Infrastructure
//! - Browser UI talks to this server over JSON
//! - Identity is owned by an external identity platform, we only verify its bearer tokens
//! - Records live in Redis (or in memory for local development)
//! - Every request is independent, no in-process state beyond the store and verifier clients
//!
//!
//!
//! # Endpoints
//!
//! | Method | Path | Auth |
//! |---|---|---|
//! | GET | `/tickets` | Bearer |
//! | POST | `/tickets` | Bearer |
//! | DELETE | `/tickets/{id}` | Bearer |
//! | GET, POST | `/visitors` | none |
//! | GET | `/about`, `/recaps` | none |
//! | POST | `/about`, `/recaps` | Bearer, admin |
//! | DELETE | `/about/{id}`, `/recaps/{id}` | Bearer, admin |
//! | GET | `/healthz` | none |
//!
//! Failures answer `{ "message": "Error <action>", "error": "<cause>" }` with
//! 400, 401, 403, 404, 413 or 500.
//!
//!
//!
//! # Client Contract
//! - After any successful mutation the UI refetches the affected list, the server is the only
//!   source of truth
//! - Saving without an `id` creates, saving with one updates
//! - Failures are shown to the user as a toast carrying `message`
//!
//!
//!
//! # Configuration
//!
//! | Variable | Default |
//! |---|---|
//! | `RUST_PORT` | `1111` |
//! | `STORE_BACKEND` | `redis` (`memory` for local runs) |
//! | `REDIS_URL` | `redis://redis:6379` |
//! | `VERIFIER_URL` | `http://auth:9099/verify` |
//! | `VERIFIER_TIMEOUT_MS` | `2000` |
//! | `ALLOWED_ORIGIN` | `*` |
//!
//! Secret `/run/secrets/VERIFIER_API_KEY` is optional.
//!
//! Log level comes from `RUST_LOG`.
//! ```sh
//! RUST_LOG=info STORE_BACKEND=memory cargo run --bin unilife-server
//! ```
use std::{error::Error, sync::Arc, time::Duration};

use axum::{
    Router,
    http::{
        HeaderValue, Method,
        header::{AUTHORIZATION, CONTENT_TYPE},
    },
    routing::{delete, get},
};

use signal::{
    ctrl_c,
    unix::{SignalKind, signal},
};
use tokio::{net::TcpListener, signal};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt};

pub mod auth;
pub mod config;
pub mod content;
pub mod database;
pub mod error;
pub mod routes;
pub mod state;
pub mod store;
pub mod tickets;
pub mod utils;
pub mod visitors;

use routes::{
    delete_about_handler, delete_recap_handler, delete_ticket_handler, healthz_handler,
    list_about_handler, list_recaps_handler, list_tickets_handler, save_about_handler,
    save_recap_handler, save_ticket_handler, visit_handler, visitors_handler,
};
use state::State;

pub async fn start_server() -> Result<(), Box<dyn Error + Send + Sync>> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();

    info!("Initializing state...");
    let state = State::new().await?;

    info!("Starting server...");

    let app = app(state.clone());

    let address = format!("0.0.0.0:{}", state.config.port);
    info!("Binding to {address}");

    let listener = TcpListener::bind(&address).await?;
    info!("Server running on {address}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shut down");
    Ok(())
}

pub fn app(state: Arc<State>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(allowed_origin(&state.config.allowed_origin))
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([CONTENT_TYPE, AUTHORIZATION])
        .max_age(Duration::from_secs(60 * 60));

    Router::new()
        .route("/healthz", get(healthz_handler))
        .route("/tickets", get(list_tickets_handler).post(save_ticket_handler))
        .route("/tickets/{id}", delete(delete_ticket_handler))
        .route("/visitors", get(visitors_handler).post(visit_handler))
        .route("/about", get(list_about_handler).post(save_about_handler))
        .route("/about/{id}", delete(delete_about_handler))
        .route("/recaps", get(list_recaps_handler).post(save_recap_handler))
        .route("/recaps/{id}", delete(delete_recap_handler))
        .layer(cors)
        .with_state(state)
}

fn allowed_origin(origin: &str) -> AllowOrigin {
    if origin == "*" {
        return AllowOrigin::any();
    }

    match HeaderValue::from_str(origin) {
        Ok(origin) => AllowOrigin::exact(origin),
        Err(e) => {
            warn!("Invalid ALLOWED_ORIGIN {origin}: {e}, cross-origin requests disabled");
            AllowOrigin::list(Vec::<HeaderValue>::new())
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        ctrl_c().await.expect("Failed to install Ctrl+C handler");

        info!("Received Ctrl+C, shutting down");
    };

    #[cfg(unix)]
    let terminate = async {
        signal(SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;

        info!("Received terminate signal, shutting down");
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
