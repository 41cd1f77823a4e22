//! Read-side mapping between platform user ids, the leader roster, and
//! Telegram chat ids.
//!
//! The relay only ever reads this data while handling a request; mutation
//! happens out-of-band through `taskrelay-mapctl`, which rewrites the backing
//! file atomically so a concurrently reloading server never sees a torn table.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};
use taskrelay_core::write_text_atomic;

/// Leader roster plus the user-to-chat routing table, mirroring the on-disk
/// JSON shape: `{"leaders": [...], "telegram_chats": {...}}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MappingTable {
    #[serde(default)]
    pub leaders: HashSet<String>,
    #[serde(default)]
    pub telegram_chats: HashMap<String, String>,
}

impl MappingTable {
    /// True iff `user_id` is registered as a leader. Empty or unknown ids
    /// are never leaders.
    pub fn is_leader(&self, user_id: &str) -> bool {
        !user_id.is_empty() && self.leaders.contains(user_id)
    }

    /// Returns the Telegram chat mapped to `user_id`, if any.
    pub fn resolve_chat(&self, user_id: &str) -> Option<String> {
        if user_id.is_empty() {
            return None;
        }
        self.telegram_chats.get(user_id).cloned()
    }

    pub fn add_leader(&mut self, user_id: &str) -> bool {
        self.leaders.insert(user_id.trim().to_string())
    }

    pub fn remove_leader(&mut self, user_id: &str) -> bool {
        self.leaders.remove(user_id.trim())
    }

    pub fn set_chat(&mut self, user_id: &str, chat_id: &str) -> Option<String> {
        self.telegram_chats
            .insert(user_id.trim().to_string(), chat_id.trim().to_string())
    }

    pub fn remove_chat(&mut self, user_id: &str) -> Option<String> {
        self.telegram_chats.remove(user_id.trim())
    }
}

/// Read access to the mapping table. One snapshot covers a whole request so
/// the authority check and recipient resolution always see the same table.
pub trait MappingStore: Send + Sync {
    fn snapshot(&self) -> Arc<MappingTable>;
}

/// Mapping store backed by an externally edited JSON file.
///
/// Every snapshot re-reads the file; the table is tiny and event volume is
/// low, so this keeps out-of-band edits live without a file watcher. Missing
/// or malformed data fails closed to an empty table instead of taking the
/// service down.
pub struct FileMappingStore {
    path: PathBuf,
    current: ArcSwap<MappingTable>,
}

impl FileMappingStore {
    pub fn new(path: PathBuf) -> Self {
        let initial = load_table_or_default(&path);
        Self {
            path,
            current: ArcSwap::from_pointee(initial),
        }
    }

    /// Re-reads the backing file and swaps the snapshot in one step;
    /// concurrent readers keep whichever table they already loaded.
    pub fn reload(&self) {
        let table = load_table_or_default(&self.path);
        self.current.store(Arc::new(table));
    }
}

impl MappingStore for FileMappingStore {
    fn snapshot(&self) -> Arc<MappingTable> {
        self.reload();
        self.current.load_full()
    }
}

/// Fixed in-memory store for tests and embedding.
pub struct StaticMappingStore {
    table: Arc<MappingTable>,
}

impl StaticMappingStore {
    pub fn new(table: MappingTable) -> Self {
        Self {
            table: Arc::new(table),
        }
    }
}

impl MappingStore for StaticMappingStore {
    fn snapshot(&self) -> Arc<MappingTable> {
        Arc::clone(&self.table)
    }
}

fn load_table_or_default(path: &Path) -> MappingTable {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
            return MappingTable::default();
        }
        Err(error) => {
            tracing::warn!(
                path = %path.display(),
                %error,
                "failed to read mapping file, denying all lookups"
            );
            return MappingTable::default();
        }
    };
    match serde_json::from_str(&raw) {
        Ok(table) => table,
        Err(error) => {
            tracing::warn!(
                path = %path.display(),
                %error,
                "failed to parse mapping file, denying all lookups"
            );
            MappingTable::default()
        }
    }
}

/// Loads the table for mutation. Unlike the read path this refuses to parse
/// past corruption, so an editing mistake cannot silently clobber the file.
pub fn load_for_edit(path: &Path) -> Result<MappingTable> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
            return Ok(MappingTable::default());
        }
        Err(error) => {
            return Err(error)
                .with_context(|| format!("failed to read mapping file {}", path.display()));
        }
    };
    serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse mapping file {}", path.display()))
}

pub fn save_table(path: &Path, table: &MappingTable) -> Result<()> {
    let mut payload =
        serde_json::to_string_pretty(table).context("failed to serialize mapping table")?;
    payload.push('\n');
    write_text_atomic(path, &payload)
        .with_context(|| format!("failed to write mapping file {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_table() -> MappingTable {
        let mut table = MappingTable::default();
        table.add_leader("123");
        table.set_chat("456", "987654321");
        table
    }

    #[test]
    fn unit_is_leader_matches_roster_only() {
        let table = sample_table();
        assert!(table.is_leader("123"));
        assert!(!table.is_leader("456"));
        assert!(!table.is_leader(""));
        assert!(!table.is_leader("999"));
    }

    #[test]
    fn unit_resolve_chat_returns_mapped_target() {
        let table = sample_table();
        assert_eq!(table.resolve_chat("456").as_deref(), Some("987654321"));
        assert_eq!(table.resolve_chat("123"), None);
        assert_eq!(table.resolve_chat(""), None);
    }

    #[test]
    fn unit_missing_file_defaults_to_empty_table() {
        let tempdir = tempfile::tempdir().expect("tempdir");
        let store = FileMappingStore::new(tempdir.path().join("absent.json"));
        let snapshot = store.snapshot();
        assert!(snapshot.leaders.is_empty());
        assert!(snapshot.telegram_chats.is_empty());
    }

    #[test]
    fn regression_malformed_file_fails_closed() {
        let tempdir = tempfile::tempdir().expect("tempdir");
        let path = tempdir.path().join("mappings.json");
        std::fs::write(&path, "{not json at all").expect("write");
        let store = FileMappingStore::new(path);
        let snapshot = store.snapshot();
        assert!(!snapshot.is_leader("123"));
        assert_eq!(snapshot.resolve_chat("456"), None);
    }

    #[test]
    fn unit_save_then_snapshot_round_trips() {
        let tempdir = tempfile::tempdir().expect("tempdir");
        let path = tempdir.path().join("mappings.json");
        save_table(&path, &sample_table()).expect("save");

        let store = FileMappingStore::new(path);
        let snapshot = store.snapshot();
        assert!(snapshot.is_leader("123"));
        assert_eq!(snapshot.resolve_chat("456").as_deref(), Some("987654321"));
    }

    #[test]
    fn unit_snapshot_picks_up_external_edits() {
        let tempdir = tempfile::tempdir().expect("tempdir");
        let path = tempdir.path().join("mappings.json");
        save_table(&path, &sample_table()).expect("save");
        let store = FileMappingStore::new(path.clone());
        assert!(store.snapshot().is_leader("123"));

        let mut edited = sample_table();
        edited.remove_leader("123");
        edited.add_leader("777");
        save_table(&path, &edited).expect("save edit");

        let snapshot = store.snapshot();
        assert!(!snapshot.is_leader("123"));
        assert!(snapshot.is_leader("777"));
    }

    #[test]
    fn unit_load_for_edit_rejects_corrupt_file() {
        let tempdir = tempfile::tempdir().expect("tempdir");
        let path = tempdir.path().join("mappings.json");
        std::fs::write(&path, "[1, 2").expect("write");
        assert!(load_for_edit(&path).is_err());
    }

    #[test]
    fn unit_load_for_edit_starts_empty_for_missing_file() {
        let tempdir = tempfile::tempdir().expect("tempdir");
        let table = load_for_edit(&tempdir.path().join("absent.json")).expect("load");
        assert_eq!(table, MappingTable::default());
    }
}
