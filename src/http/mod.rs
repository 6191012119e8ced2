//! HTTP surface for triggering exports and fetching their files.

pub mod handlers;
pub mod routes;
pub mod state;

pub use routes::create_router;
pub use state::AppState;
