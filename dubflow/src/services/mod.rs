//! Service layer module.
//!
//! The container wires everything together; `dubbing` holds the operations
//! exposed over HTTP.

pub mod container;
pub mod dubbing;

pub use container::ServiceContainer;
pub use dubbing::{
    DubbingService, DubbingServiceConfig, JobStatusView, SubmitOutcome, Submission,
    VoiceMappingInput,
};
