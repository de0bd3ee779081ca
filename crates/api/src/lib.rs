//! HTTP API: chat relay, feedback persistence, question memory and image
//! analysis forwarding.

pub mod app;
pub mod config;

pub use config::{ApiConfig, ConfigError};
