use crate::error::ServiceError;
use async_trait::async_trait;
use paddock_core::JobKind;
use std::time::Duration;

/// Lifetime of a viewing URL handed out by the stream service.
pub const VIEWING_URL_EXPIRY: Duration = Duration::from_secs(12 * 60 * 60);

/// Hours of video the stream keeps for each job kind.
#[must_use]
pub const fn retention_hours(kind: JobKind) -> u32 {
    match kind {
        JobKind::Training => 24,
        JobKind::Evaluation | JobKind::Submission => 2,
    }
}

/// Live video stream of the running simulation.
#[async_trait]
pub trait VideoStreamService: Send + Sync {
    /// Creates a stream and returns its ARN.
    async fn create_stream(&self, name: &str, retention_hours: u32) -> Result<String, ServiceError>;

    /// Returns a viewing URL valid for `expires_in`.
    async fn viewing_url(&self, name: &str, expires_in: Duration) -> Result<String, ServiceError>;

    /// Deletes a stream. Fails with `ServiceError::NotFound` when it is already gone.
    async fn delete_stream(&self, arn: &str) -> Result<(), ServiceError>;
}
