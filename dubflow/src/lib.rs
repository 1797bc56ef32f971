//! dubflow library crate.
//!
//! Video dubbing pipeline: uploads are hashed, queued and run through
//! transcription, translation, speech synthesis, mixing and optional lip-sync.

pub mod api;
pub mod cache;
pub mod config;
pub mod database;
pub mod domain;
pub mod error;
pub mod logging;
pub mod pipeline;
pub mod providers;
pub mod services;
pub mod storage;
pub mod utils;

pub use error::{Error, Result};
