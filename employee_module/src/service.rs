mod config;
mod handlers;
mod server;
mod state;
pub(crate) mod workers;

pub(crate) type BoxError = Box<dyn std::error::Error + Send + Sync>;

pub use config::{ServiceConfig, DEFAULT_AGENTS_CONFIG_PATH};
pub use server::{bootstrap, router, run_server};
pub use state::AppState;
pub use workers::{sleep_unless_stopped, WorkerControl};
