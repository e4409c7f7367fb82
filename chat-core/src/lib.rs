pub mod codec;
pub mod connections;
pub mod handler;
pub mod listener;
pub mod rate_limiter;
pub mod registry;
pub mod state;

pub use handler::run_connection;
pub use state::AppState;
