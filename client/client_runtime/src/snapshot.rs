use std::collections::BTreeSet;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::fs;
use tracing::{debug, info, warn};

/// Collection holding page snapshots inside each environment directory.
pub const COLLECTION: &str = "page_snapshots";

const RECORD_EXT: &str = "json";
const TEMP_EXT: &str = "tmp";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotRecord {
    pub id: u64,
    pub created_at: DateTime<Utc>,
    pub data: Value,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("snapshot storage unavailable: {0}")]
    Unavailable(#[from] io::Error),

    #[error("invalid environment tag {0:?}")]
    InvalidEnvironment(String),
}

#[derive(Debug, Default)]
struct Index {
    next_id: u64,
    by_created_at: BTreeSet<(DateTime<Utc>, u64)>,
}

/// Durable per-environment collection of page snapshots, one JSON document
/// per record.
#[derive(Debug)]
pub struct SnapshotStore {
    dir: PathBuf,
    environment: String,
    index: Mutex<Index>,
}

impl SnapshotStore {
    /// Opens, creating if needed, the collection for `environment` under
    /// `root`. Existing records are indexed and id allocation resumes after
    /// the highest id found.
    pub async fn init(root: impl AsRef<Path>, environment: &str) -> Result<Self, StoreError> {
        validate_environment(environment)?;

        let dir = root.as_ref().join(environment).join(COLLECTION);
        fs::create_dir_all(&dir).await?;

        let mut index = Index {
            next_id: 1,
            ..Index::default()
        };

        let mut entries = fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let Some(id) = record_id(&path) else {
                if path.extension().and_then(|ext| ext.to_str()) == Some(TEMP_EXT) {
                    debug!(path = %path.display(), "ignoring interrupted snapshot write");
                }
                continue;
            };

            let record = read_record(&path).await?;
            if record.id != id {
                warn!(path = %path.display(), record_id = record.id, "snapshot id does not match file name");
            }
            index.by_created_at.insert((record.created_at, id));
            let after = id
                .checked_add(1)
                .ok_or_else(|| id_space_exhausted(&path))?;
            index.next_id = index.next_id.max(after);
        }

        info!(
            environment,
            dir = %dir.display(),
            records = index.by_created_at.len(),
            "snapshot store opened"
        );

        Ok(Self {
            dir,
            environment: environment.to_string(),
            index: Mutex::new(index),
        })
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    /// Stores `data` under a fresh id and returns that id once the record is
    /// durable.
    pub async fn put(&self, data: Value) -> Result<u64, StoreError> {
        let id = {
            let mut index = self.index.lock();
            let id = index.next_id;
            index.next_id = id
                .checked_add(1)
                .ok_or_else(|| id_space_exhausted(&self.dir))?;
            id
        };

        let record = SnapshotRecord {
            id,
            created_at: Utc::now(),
            data,
        };
        let bytes = serde_json::to_vec(&record).map_err(json_error)?;

        let path = self.record_path(id);
        let temp = path.with_extension(TEMP_EXT);
        fs::write(&temp, &bytes).await?;
        fs::rename(&temp, &path).await?;

        self.index.lock().by_created_at.insert((record.created_at, id));
        debug!(environment = %self.environment, snapshot_id = id, "snapshot stored");
        Ok(id)
    }

    pub async fn get(&self, id: u64) -> Result<Option<SnapshotRecord>, StoreError> {
        match read_record(&self.record_path(id)).await {
            Ok(record) => Ok(Some(record)),
            Err(StoreError::Unavailable(err)) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Ids of records created strictly before `cutoff`, oldest first.
    pub fn created_before(&self, cutoff: DateTime<Utc>) -> Vec<u64> {
        self.index
            .lock()
            .by_created_at
            .iter()
            .take_while(|(created_at, _)| *created_at < cutoff)
            .map(|(_, id)| *id)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.index.lock().by_created_at.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn record_path(&self, id: u64) -> PathBuf {
        self.dir.join(format!("{id}.{RECORD_EXT}"))
    }
}

fn validate_environment(environment: &str) -> Result<(), StoreError> {
    let invalid = environment.is_empty()
        || environment == "."
        || environment == ".."
        || environment.contains(['/', '\\']);
    if invalid {
        return Err(StoreError::InvalidEnvironment(environment.to_string()));
    }
    Ok(())
}

fn record_id(path: &Path) -> Option<u64> {
    if path.extension()?.to_str()? != RECORD_EXT {
        return None;
    }
    path.file_stem()?.to_str()?.parse().ok()
}

async fn read_record(path: &Path) -> Result<SnapshotRecord, StoreError> {
    let bytes = fs::read(path).await?;
    serde_json::from_slice(&bytes)
        .map_err(json_error)
        .map_err(StoreError::from)
}

fn id_space_exhausted(path: &Path) -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidData,
        format!("snapshot id space exhausted at {}", path.display()),
    )
}

fn json_error(err: serde_json::Error) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, err)
}
