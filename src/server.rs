pub mod handlers;
pub mod middleware;
pub mod params;
pub mod router;
pub mod state;

pub use router::create_app;
pub use state::AppState;
