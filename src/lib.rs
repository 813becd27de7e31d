// valmon library: supervisor, metrics and monitoring service

pub mod error;
pub use error::{Result, ValmonError};

pub mod commands;
pub mod core;
pub mod ui;

pub use core::context::Context;

/// Log to stderr at `info` unless `RUST_LOG` says otherwise
pub fn init_logging() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();
}
