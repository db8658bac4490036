mod app;
mod middleware;
mod state;

pub use app::create_app;
pub use middleware::client_ip;
pub use state::AppState;
