use axum::Router;

pub mod calculator;
pub mod chat;
pub mod feedback;
pub mod memory;
pub mod system;

/// Router for everything under `/api`.
pub fn router() -> Router {
    Router::new()
        .merge(chat::router())
        .merge(feedback::router())
        .merge(calculator::router())
        .merge(memory::router())
}
