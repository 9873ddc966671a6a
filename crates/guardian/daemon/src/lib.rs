//! Guardian Daemon library
//!
//! This module provides the core components for the Guardian daemon:
//! - REST API handlers (status, SSE stream, overrides, audit)
//! - Layered configuration
//! - Server lifecycle management

pub mod api;
pub mod config;
pub mod error;
pub mod server;

pub use api::rest::state::AppState;
pub use api::create_router;
pub use config::DaemonConfig;
pub use error::{ApiError, DaemonError};
pub use server::Server;
