pub mod appresult;
pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod health;
pub mod rooms;
pub mod store;

use std::sync::Arc;

use axum::{extract::FromRef, routing::get, Router};

pub use appresult::{AppError, AppResult};
pub use config::Config;
pub use error::{ChatError, ChatResult};
pub use rooms::Hub;
pub use store::Store;

#[derive(Clone, FromRef)]
pub struct AppState {
    pub hub: Arc<Hub>,
    pub identity: auth::Identity,
}

/// Every route the service exposes, without the HTTP middleware layers.
pub fn app(app_state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health))
        .merge(rooms::router())
        .with_state(app_state)
}
