//! Repository layer for database access.
//!
//! Each table is accessed through an `async_trait` repository trait with a
//! SQLx implementation, so services can be exercised against any backing store.

pub mod artifact;
pub mod cache;
pub mod job;
pub mod queue;
pub mod transcript;
pub mod voice_mapping;

pub use artifact::*;
pub use cache::*;
pub use job::*;
pub use queue::*;
pub use transcript::*;
pub use voice_mapping::*;

use std::sync::Arc;

use super::DbPool;

/// All repositories, shared between the API, the queue and the workers.
#[derive(Clone)]
pub struct Repositories {
    pub jobs: Arc<dyn JobRepository>,
    pub transcripts: Arc<dyn TranscriptRepository>,
    pub voices: Arc<dyn VoiceMappingRepository>,
    pub artifacts: Arc<dyn ArtifactRepository>,
    pub cache: Arc<dyn CacheRepository>,
    pub queue: Arc<dyn QueueRepository>,
}

impl Repositories {
    /// SQLx-backed repositories sharing one pool.
    pub fn sqlx(pool: DbPool) -> Self {
        Self {
            jobs: Arc::new(SqlxJobRepository::new(pool.clone())),
            transcripts: Arc::new(SqlxTranscriptRepository::new(pool.clone())),
            voices: Arc::new(SqlxVoiceMappingRepository::new(pool.clone())),
            artifacts: Arc::new(SqlxArtifactRepository::new(pool.clone())),
            cache: Arc::new(SqlxCacheRepository::new(pool.clone())),
            queue: Arc::new(SqlxQueueRepository::new(pool)),
        }
    }
}
