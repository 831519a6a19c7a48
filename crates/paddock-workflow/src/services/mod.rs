//! External collaborators of the workflow.
//!
//! Each collaborator is a trait so the phases can run against real cloud
//! services or in-process fakes. Only the artifact store ships concrete
//! implementations here.

pub mod artifacts;
pub mod backend;
pub mod logs;
pub mod video;

pub use artifacts::{ArtifactStore, InMemoryArtifactStore, LocalArtifactStore};
pub use backend::{BackendJobDescription, ComputeBackend, TrainingJobRequest};
pub use logs::{LogSource, LogType};
pub use video::{VIEWING_URL_EXPIRY, VideoStreamService, retention_hours};
