use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::{ErrorKind, MigrationResult};
use crate::identifiers::IdentifierMapping;
use crate::migration_error;
use crate::store::{CheckpointStore, MigrationCursor};
use crate::types::{EntityType, SourceKey};

/// On-disk layout of a [`FileCheckpointStore`].
#[derive(Debug, Default, Serialize, Deserialize)]
struct Snapshot {
    #[serde(default)]
    mappings: Vec<IdentifierMapping>,
    #[serde(default)]
    cursors: BTreeMap<String, MigrationCursor>,
}

#[derive(Debug)]
struct Inner {
    snapshot: Snapshot,
    index: HashSet<(EntityType, SourceKey)>,
}

/// Checkpoint store persisted as a single JSON document.
///
/// Every write rewrites the document into a sibling temporary file and renames it over the
/// previous one, so a crash leaves either the old or the new state on disk.
#[derive(Debug, Clone)]
pub struct FileCheckpointStore {
    path: PathBuf,
    inner: Arc<Mutex<Inner>>,
}

impl FileCheckpointStore {
    /// Opens the store at `path`, starting empty if the file does not exist yet.
    pub async fn open(path: impl Into<PathBuf>) -> MigrationResult<Self> {
        let path = path.into();

        let snapshot = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice::<Snapshot>(&bytes).map_err(|err| {
                migration_error!(
                    ErrorKind::CheckpointStoreFailed,
                    "Checkpoint file is corrupted",
                    format!("could not parse `{}`", path.display()),
                    source: err
                )
            })?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %path.display(), "checkpoint file not found, starting from an empty state");
                Snapshot::default()
            }
            Err(err) => {
                return Err(migration_error!(
                    ErrorKind::CheckpointStoreFailed,
                    "Checkpoint file could not be read",
                    format!("could not read `{}`", path.display()),
                    source: err
                ));
            }
        };

        let index = snapshot
            .mappings
            .iter()
            .map(|mapping| (mapping.entity, mapping.source_key.clone()))
            .collect();

        Ok(Self {
            path,
            inner: Arc::new(Mutex::new(Inner { snapshot, index })),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn write(&self, snapshot: &Snapshot) -> MigrationResult<()> {
        let bytes = serde_json::to_vec_pretty(snapshot)?;

        let mut temporary = self.path.clone().into_os_string();
        temporary.push(".tmp");
        let temporary = PathBuf::from(temporary);

        let write = async {
            if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(&temporary, &bytes).await?;
            tokio::fs::rename(&temporary, &self.path).await
        };

        write.await.map_err(|err| {
            migration_error!(
                ErrorKind::CheckpointStoreFailed,
                "Checkpoint file could not be written",
                format!("could not write `{}`", self.path.display()),
                source: err
            )
        })?;

        debug!(path = %self.path.display(), "checkpoint file written");

        Ok(())
    }
}

impl CheckpointStore for FileCheckpointStore {
    async fn load_mappings(&self) -> MigrationResult<Vec<IdentifierMapping>> {
        let inner = self.inner.lock().await;

        Ok(inner.snapshot.mappings.clone())
    }

    async fn save_mappings(&self, mappings: Vec<IdentifierMapping>) -> MigrationResult<()> {
        let mut inner = self.inner.lock().await;

        let mut added = false;
        for mapping in mappings {
            if inner
                .index
                .insert((mapping.entity, mapping.source_key.clone()))
            {
                inner.snapshot.mappings.push(mapping);
                added = true;
            }
        }

        if added {
            self.write(&inner.snapshot).await?;
        }

        Ok(())
    }

    async fn load_cursors(&self) -> MigrationResult<BTreeMap<String, MigrationCursor>> {
        let inner = self.inner.lock().await;

        Ok(inner.snapshot.cursors.clone())
    }

    async fn save_cursor(&self, cursor: MigrationCursor) -> MigrationResult<()> {
        let mut inner = self.inner.lock().await;
        inner.snapshot.cursors.insert(cursor.stage.clone(), cursor);

        self.write(&inner.snapshot).await
    }

    async fn clear_cursors(&self) -> MigrationResult<()> {
        let mut inner = self.inner.lock().await;
        inner.snapshot.cursors.clear();

        self.write(&inner.snapshot).await
    }
}
