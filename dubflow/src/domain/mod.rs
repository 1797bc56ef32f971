//! Domain layer for dubflow.
//!
//! Entities of the dubbing pipeline and the value objects they are built from.

pub mod artifact;
pub mod job;
pub mod stage;
pub mod transcript;
pub mod value_objects;
pub mod voice;

pub use artifact::{Artifact, ArtifactType, ready_video};
pub use job::{Job, JobStatus};
pub use stage::Stage;
pub use transcript::{ORIGINAL_LANGUAGE, Segment, Transcript};
pub use value_objects::*;
pub use voice::{VoiceAssignment, VoiceMapping};
