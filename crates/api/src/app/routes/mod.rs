use axum::{routing::get, Router};

pub mod items;
pub mod system;

/// Router for everything under `/api`.
pub fn router() -> Router {
    Router::new()
        .route("/pool", get(system::pool_stats))
        .nest("/items", items::router())
}
