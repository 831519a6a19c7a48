//! Object storage for heartbeat files, job configuration, metrics and logs.

use crate::error::ServiceError;
use async_trait::async_trait;
use paddock_core::split_location;
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::debug;

#[async_trait]
pub trait ArtifactStore: Send + Sync {
    async fn put(&self, location: &str, body: Vec<u8>) -> Result<(), ServiceError>;

    /// Reads an object. A missing object is `Ok(None)`, not an error.
    async fn get(&self, location: &str) -> Result<Option<Vec<u8>>, ServiceError>;

    /// Deletes an object. Deleting a missing object succeeds.
    async fn delete(&self, location: &str) -> Result<(), ServiceError>;

    async fn get_string(&self, location: &str) -> Result<Option<String>, ServiceError> {
        match self.get(location).await? {
            Some(bytes) => String::from_utf8(bytes)
                .map(Some)
                .map_err(|e| ServiceError::Rejected(format!("{location} is not UTF-8: {e}"))),
            None => Ok(None),
        }
    }
}

/// Stores `s3://bucket/key` objects as files under `root/bucket/key`.
#[derive(Debug, Clone)]
pub struct LocalArtifactStore {
    root: PathBuf,
}

impl LocalArtifactStore {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, location: &str) -> Result<PathBuf, ServiceError> {
        let (bucket, key) = split_location(location).map_err(|e| ServiceError::Rejected(e.to_string()))?;
        if key.is_empty() || key.ends_with('/') || key.split('/').any(|part| part == "..") {
            return Err(ServiceError::Rejected(format!("{location} does not name an object")));
        }
        Ok(self.root.join(bucket).join(key))
    }
}

fn io_error(location: &str, err: &std::io::Error) -> ServiceError {
    ServiceError::Unavailable(format!("{location}: {err}"))
}

#[async_trait]
impl ArtifactStore for LocalArtifactStore {
    async fn put(&self, location: &str, body: Vec<u8>) -> Result<(), ServiceError> {
        let path = self.path_for(location)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| io_error(location, &e))?;
        }
        tokio::fs::write(&path, body).await.map_err(|e| io_error(location, &e))?;
        debug!(location, path = %path.display(), "Wrote artifact");
        Ok(())
    }

    async fn get(&self, location: &str) -> Result<Option<Vec<u8>>, ServiceError> {
        let path = self.path_for(location)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_error(location, &e)),
        }
    }

    async fn delete(&self, location: &str) -> Result<(), ServiceError> {
        let path = self.path_for(location)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_error(location, &e)),
        }
    }
}

#[derive(Debug, Default)]
pub struct InMemoryArtifactStore {
    objects: Mutex<HashMap<String, Vec<u8>>>,
}

impl InMemoryArtifactStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn objects(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, Vec<u8>>>, ServiceError> {
        self.objects
            .lock()
            .map_err(|_| ServiceError::Unavailable("artifact store lock poisoned".to_string()))
    }

    #[must_use]
    pub fn contains(&self, location: &str) -> bool {
        self.objects().is_ok_and(|objects| objects.contains_key(location))
    }

    #[must_use]
    pub fn locations(&self) -> Vec<String> {
        let mut locations: Vec<String> =
            self.objects().map(|objects| objects.keys().cloned().collect()).unwrap_or_default();
        locations.sort();
        locations
    }
}

#[async_trait]
impl ArtifactStore for InMemoryArtifactStore {
    async fn put(&self, location: &str, body: Vec<u8>) -> Result<(), ServiceError> {
        self.objects()?.insert(location.to_string(), body);
        Ok(())
    }

    async fn get(&self, location: &str) -> Result<Option<Vec<u8>>, ServiceError> {
        Ok(self.objects()?.get(location).cloned())
    }

    async fn delete(&self, location: &str) -> Result<(), ServiceError> {
        self.objects()?.remove(location);
        Ok(())
    }
}
