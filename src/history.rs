//! Session history: append-only durable log of every raw message and every
//! checkpointing event. Sole source of truth for audit and export; never
//! consulted when building a prompt.

use crate::error::{ContextError, Result};
use crate::storage::{CheckpointRecord, Message, SessionHistory, StorageLayer};
use chrono::Utc;
use std::fs;
use std::path::{Path, PathBuf};
use uuid::Uuid;

pub struct HistoryStore {
    path: PathBuf,
    history: SessionHistory,
}

impl HistoryStore {
    /// Open the history for a session, loading `history.json` when present.
    pub fn open(root: &Path, session_id: Uuid) -> Result<Self> {
        let dir = root.join("sessions").join(session_id.to_string());
        let path = dir.join("history.json");

        let history = if path.exists() {
            let json = fs::read_to_string(&path).map_err(ContextError::store)?;
            let loaded: SessionHistory =
                serde_json::from_str(&json).map_err(ContextError::store)?;
            tracing::info!(
                session_id = %session_id,
                messages = loaded.messages.len(),
                compressions = loaded.metadata.compression_count,
                "loaded session history"
            );
            loaded
        } else {
            SessionHistory::new(session_id)
        };

        Ok(Self { path, history })
    }

    pub fn session_id(&self) -> Uuid {
        self.history.session_id
    }

    /// Append a raw message. Never rejects on size; history grows
    /// monotonically.
    pub fn append(&mut self, message: &Message) {
        let tokens = message.token_count.unwrap_or(0) as u64;
        self.history
            .messages
            .push(message.clone().into_layer(StorageLayer::History));
        self.history.metadata.total_messages = self.history.messages.len();
        self.history.metadata.total_tokens += tokens;
        self.history.metadata.last_update = Utc::now();
    }

    /// Record one compression event and bump the session's count.
    pub fn record_checkpoint(&mut self, record: CheckpointRecord) {
        self.history.checkpoint_records.push(record);
        self.history.metadata.compression_count += 1;
        self.history.metadata.last_update = Utc::now();
    }

    pub fn compression_count(&self) -> u32 {
        self.history.metadata.compression_count
    }

    pub fn messages(&self) -> &[Message] {
        &self.history.messages
    }

    /// Index of a message in the canonical log, if present.
    pub fn index_of(&self, id: Uuid) -> Option<usize> {
        self.history.messages.iter().position(|m| m.id == id)
    }

    /// The entire history, for export.
    pub fn full(&self) -> &SessionHistory {
        &self.history
    }

    /// Persist to `history.json` (pretty JSON, write-then-atomic-rename).
    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(ContextError::store)?;
        }
        let json = serde_json::to_string_pretty(&self.history).map_err(ContextError::store)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json).map_err(ContextError::store)?;
        fs::rename(&tmp, &self.path).map_err(ContextError::store)?;
        Ok(())
    }

    /// Render the session as markdown: metadata header, every message in
    /// order, and a compression appendix.
    pub fn export_markdown(&self) -> String {
        let meta = &self.history.metadata;
        let mut out = String::new();
        out.push_str(&format!("# Session {}\n\n", self.history.session_id));
        out.push_str(&format!(
            "- Started: {}\n- Last update: {}\n- Messages: {}\n- Compressions: {}\n\n",
            meta.start_time.format("%Y-%m-%d %H:%M:%S UTC"),
            meta.last_update.format("%Y-%m-%d %H:%M:%S UTC"),
            meta.total_messages,
            meta.compression_count,
        ));

        out.push_str("## Conversation\n\n");
        for message in &self.history.messages {
            out.push_str(&format!(
                "### {} — {}\n\n{}\n\n",
                match message.role {
                    crate::storage::Role::System => "System",
                    crate::storage::Role::User => "User",
                    crate::storage::Role::Assistant => "Assistant",
                    crate::storage::Role::Tool => "Tool",
                },
                message.timestamp.format("%Y-%m-%d %H:%M:%S UTC"),
                message.content,
            ));
        }

        if !self.history.checkpoint_records.is_empty() {
            out.push_str("## Compression events\n\n");
            for record in &self.history.checkpoint_records {
                out.push_str(&format!(
                    "- {} — level {}: messages [{}..{}], {} → {} tokens (ratio {:.2})\n",
                    record.timestamp.format("%Y-%m-%d %H:%M:%S UTC"),
                    record.level.as_u8(),
                    record.message_index_range.0,
                    record.message_index_range.1,
                    record.original_tokens,
                    record.compressed_tokens,
                    record.ratio,
                ));
            }
        }

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::CompressionLevel;
    use proptest::prelude::*;

    fn open_store() -> (tempfile::TempDir, HistoryStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = HistoryStore::open(dir.path(), Uuid::new_v4()).unwrap();
        (dir, store)
    }

    fn record() -> CheckpointRecord {
        CheckpointRecord {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            message_index_range: (0, 7),
            original_tokens: 900,
            compressed_tokens: 120,
            ratio: 120.0 / 900.0,
            level: CompressionLevel::Detailed,
        }
    }

    #[test]
    fn test_append_grows_and_tags_history() {
        let (_dir, mut store) = open_store();
        store.append(&Message::user("one").with_token_count(2));
        store.append(&Message::assistant("two").with_token_count(3));

        assert_eq!(store.messages().len(), 2);
        assert_eq!(store.full().metadata.total_messages, 2);
        assert_eq!(store.full().metadata.total_tokens, 5);
        assert!(store
            .messages()
            .iter()
            .all(|m| m.origin == StorageLayer::History));
    }

    #[test]
    fn test_record_checkpoint_never_removes_messages() {
        let (_dir, mut store) = open_store();
        for i in 0..10 {
            store.append(&Message::assistant(format!("m{i}")));
        }
        store.record_checkpoint(record());

        assert_eq!(store.messages().len(), 10);
        assert_eq!(store.compression_count(), 1);
        assert_eq!(store.full().checkpoint_records.len(), 1);
    }

    #[test]
    fn test_save_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let session_id = Uuid::new_v4();

        let mut store = HistoryStore::open(dir.path(), session_id).unwrap();
        store.append(&Message::user("persist me").with_token_count(3));
        store.record_checkpoint(record());
        store.save().unwrap();

        let reloaded = HistoryStore::open(dir.path(), session_id).unwrap();
        assert_eq!(reloaded.full(), store.full());
        assert_eq!(reloaded.full().schema_version, 1);
    }

    #[test]
    fn test_export_markdown_contains_messages_and_events() {
        let (_dir, mut store) = open_store();
        store.append(&Message::user("what broke?"));
        store.append(&Message::assistant("the index was stale"));
        store.record_checkpoint(record());

        let md = store.export_markdown();
        assert!(md.contains("what broke?"));
        assert!(md.contains("the index was stale"));
        assert!(md.contains("## Compression events"));
        assert!(md.contains("900 → 120 tokens"));
    }

    proptest! {
        // Monotone history: appends only ever grow the log.
        #[test]
        fn prop_append_is_monotone(contents in proptest::collection::vec("[a-z]{1,12}", 1..20)) {
            let dir = tempfile::tempdir().unwrap();
            let mut store = HistoryStore::open(dir.path(), Uuid::new_v4()).unwrap();
            let mut last_len = 0;
            for content in &contents {
                store.append(&Message::user(content.clone()));
                prop_assert!(store.messages().len() > last_len);
                last_len = store.messages().len();
            }
            prop_assert_eq!(last_len, contents.len());
        }
    }
}
