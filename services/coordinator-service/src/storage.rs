use std::path::PathBuf;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tracing::warn;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialize: {0}")]
    Serde(#[from] serde_json::Error),
}

const SAVE_ATTEMPTS: u32 = 3;
const BACKOFF_BASE: Duration = Duration::from_millis(50);

/// JSON snapshot persistence for the coordinator's durable records. Each
/// named collection lives in its own file under the data directory; writes
/// go through a temp file and rename so readers never observe a torn file.
pub struct SnapshotStore {
    dir: PathBuf,
}

impl SnapshotStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.json"))
    }

    /// Load a collection, defaulting when the snapshot does not exist yet.
    pub async fn load<T: DeserializeOwned + Default>(&self, name: &str) -> Result<T, StorageError> {
        let path = self.path(name);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(T::default()),
            Err(err) => Err(err.into()),
        }
    }

    pub async fn save<T: Serialize>(&self, name: &str, value: &T) -> Result<(), StorageError> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let bytes = serde_json::to_vec_pretty(value)?;
        let tmp = self.dir.join(format!("{name}.{}.tmp", Uuid::new_v4()));
        tokio::fs::write(&tmp, &bytes).await?;
        tokio::fs::rename(&tmp, self.path(name)).await?;
        Ok(())
    }

    /// Save with a small fixed retry budget; a terminal failure is returned
    /// to the caller, which degrades to a partial-success response.
    pub async fn save_with_retry<T: Serialize>(
        &self,
        name: &str,
        value: &T,
    ) -> Result<(), StorageError> {
        let mut last = None;
        for attempt in 1..=SAVE_ATTEMPTS {
            match self.save(name, value).await {
                Ok(()) => return Ok(()),
                Err(err) => {
                    warn!(collection = name, attempt, error = %err, "snapshot save failed");
                    last = Some(err);
                    if attempt < SAVE_ATTEMPTS {
                        tokio::time::sleep(BACKOFF_BASE * attempt).await;
                    }
                }
            }
        }
        Err(last.expect("at least one attempt"))
    }
}
