//! Snapshot lifecycle: on-disk recovery snapshots of full conversation
//! state. Snapshots are never consulted when building a prompt; the
//! boundary guard enforces that at prompt emission.

use crate::error::{ContextError, Result};
use crate::storage::{
    CheckpointSummary, Message, SnapshotData, SnapshotMetadata, SnapshotPurpose, StorageLayer,
};
use chrono::Utc;
use std::fs;
use std::path::{Path, PathBuf};
use uuid::Uuid;

pub struct SnapshotStore {
    session_id: Uuid,
    dir: PathBuf,
}

impl SnapshotStore {
    /// Store rooted at `<root>/sessions/<session_id>/snapshots/`. The
    /// directory is created on first write.
    pub fn new(root: &Path, session_id: Uuid) -> Self {
        Self {
            session_id,
            dir: root
                .join("sessions")
                .join(session_id.to_string())
                .join("snapshots"),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn snapshot_path(&self, id: Uuid) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }

    /// Create and persist a snapshot. The file is fully written and
    /// atomically renamed into place before this returns.
    pub fn create(
        &self,
        full_messages: &[Message],
        checkpoints: &[CheckpointSummary],
        active_recent_ids: Vec<Uuid>,
        purpose: SnapshotPurpose,
    ) -> Result<SnapshotData> {
        let total_tokens = full_messages
            .iter()
            .filter_map(|m| m.token_count)
            .sum::<u32>();

        let snapshot = SnapshotData {
            schema_version: 1,
            id: Uuid::new_v4(),
            session_id: self.session_id,
            created_at: Utc::now(),
            purpose,
            full_messages: full_messages
                .iter()
                .cloned()
                .map(|m| m.into_layer(StorageLayer::Snapshot))
                .collect(),
            checkpoints_copy: checkpoints.to_vec(),
            metadata: SnapshotMetadata {
                message_count: full_messages.len(),
                checkpoint_count: checkpoints.len(),
                total_tokens,
                active_recent_ids,
            },
        };

        fs::create_dir_all(&self.dir).map_err(ContextError::store)?;
        let path = self.snapshot_path(snapshot.id);
        let tmp = path.with_extension("json.tmp");
        let json = serde_json::to_string_pretty(&snapshot).map_err(ContextError::store)?;
        fs::write(&tmp, json).map_err(ContextError::store)?;
        fs::rename(&tmp, &path).map_err(ContextError::store)?;

        tracing::info!(
            snapshot_id = %snapshot.id,
            purpose = purpose.as_str(),
            messages = snapshot.metadata.message_count,
            checkpoints = snapshot.metadata.checkpoint_count,
            "snapshot persisted"
        );
        Ok(snapshot)
    }

    /// Load a snapshot and return the state to reinstall: the messages
    /// that were live in the active context at creation time, and the
    /// checkpoint copies. Returned messages are re-tagged for the active
    /// layer; installing them is the sanctioned transition.
    pub fn restore(&self, id: Uuid) -> Result<(Vec<Message>, Vec<CheckpointSummary>)> {
        let snapshot = self.load(id)?;

        let messages = snapshot
            .full_messages
            .into_iter()
            .filter(|m| snapshot.metadata.active_recent_ids.contains(&m.id))
            .map(|m| m.into_layer(StorageLayer::ActiveContext))
            .collect();

        Ok((messages, snapshot.checkpoints_copy))
    }

    /// Load the raw snapshot file.
    pub fn load(&self, id: Uuid) -> Result<SnapshotData> {
        let path = self.snapshot_path(id);
        let json = fs::read_to_string(&path).map_err(ContextError::store)?;
        serde_json::from_str(&json).map_err(ContextError::store)
    }

    /// All snapshots, newest first. Unreadable files are skipped with a
    /// warning.
    pub fn list(&self) -> Result<Vec<SnapshotData>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let mut snapshots = Vec::new();
        for entry in fs::read_dir(&self.dir).map_err(ContextError::store)? {
            let entry = entry.map_err(ContextError::store)?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match fs::read_to_string(&path)
                .map_err(|e| e.to_string())
                .and_then(|json| serde_json::from_str::<SnapshotData>(&json).map_err(|e| e.to_string()))
            {
                Ok(snapshot) => snapshots.push(snapshot),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "skipping unreadable snapshot");
                }
            }
        }
        snapshots.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(snapshots)
    }

    /// The most recent snapshot, if any.
    pub fn latest(&self) -> Result<Option<SnapshotData>> {
        Ok(self.list()?.into_iter().next())
    }

    pub fn count(&self) -> Result<usize> {
        Ok(self.list()?.len())
    }

    /// Delete the oldest snapshots beyond `keep`.
    pub fn prune(&self, keep: usize) -> Result<usize> {
        let snapshots = self.list()?;
        let mut removed = 0;
        for snapshot in snapshots.iter().skip(keep) {
            let path = self.snapshot_path(snapshot.id);
            if let Err(e) = fs::remove_file(&path) {
                tracing::warn!(path = %path.display(), error = %e, "failed to prune snapshot");
            } else {
                removed += 1;
            }
        }
        if removed > 0 {
            tracing::info!(removed, keep, "pruned old snapshots");
        }
        Ok(removed)
    }
}
