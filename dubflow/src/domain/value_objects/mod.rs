//! Value objects shared by the domain layer.

pub mod language;
pub mod retry_policy;

pub use language::{normalize_language, normalize_transcript_language};
pub use retry_policy::RetryPolicy;
