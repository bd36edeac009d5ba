mod dto;
pub mod handlers;
pub mod photos;
pub mod search;
pub mod services;
pub mod slug;

use crate::state::AppState;
use axum::Router;

pub fn router() -> Router<AppState> {
    Router::new()
        .merge(handlers::read_routes())
        .merge(handlers::write_routes())
}
