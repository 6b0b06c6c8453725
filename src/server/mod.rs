pub mod config;
mod audio_routes;
mod http_layers;
pub mod metrics;
pub mod server;
pub(self) mod session;
pub mod state;
pub(self) mod stream_audio;

pub use config::ServerConfig;
pub use http_layers::*;
pub use state::*;
#[allow(unused_imports)] // Used by main.rs
pub use server::{make_app, run_server};
