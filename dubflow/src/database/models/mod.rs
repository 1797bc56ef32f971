//! Row models for the SQLite tables.

pub mod artifact;
pub mod cache;
pub mod job;
pub mod queue;
pub mod transcript;
pub mod voice_mapping;

pub use artifact::ArtifactDbModel;
pub use cache::CacheEntryDbModel;
pub use job::JobDbModel;
pub use queue::{QueueEntryDbModel, QueueState};
pub use transcript::TranscriptDbModel;
pub use voice_mapping::VoiceMappingDbModel;
