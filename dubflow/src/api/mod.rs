//! REST API server module.
//!
//! HTTP endpoints for submitting videos, polling job status and editing
//! transcripts and voice mappings.

pub mod error;
pub mod routes;
pub mod server;

pub use server::{ApiServer, ApiServerConfig, AppState};
