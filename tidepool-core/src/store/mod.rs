//! Item data model and the persistent-store collaborator contract.
//!
//! The store owns the durable record of every item; coordinators keep
//! in-memory working copies while an item is active and write status
//! transitions back through the [`MediaStore`] trait. The relational
//! implementation lives with the embedding application; an in-memory
//! implementation ships here for tests and lightweight embedding.

pub mod memory;

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use memory::InMemoryMediaStore;

/// Opaque stable identifier for an item.
///
/// Assigned when an acquisition starts and preserved across process
/// restarts, so on-disk output directories stay valid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ItemId(Uuid);

impl ItemId {
    /// Generates a fresh random identifier.
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wraps an existing UUID, for stores deserializing persisted rows.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// 20-byte content address derived from the source descriptor.
///
/// Used for duplicate detection: unique among non-deleted items.
/// Serializes as a 40-character hex string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContentId([u8; 20]);

impl ContentId {
    /// Creates a content address from its 20 raw bytes.
    pub fn new(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }

    /// Returns reference to the underlying bytes.
    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }
}

impl Serialize for ContentId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for ContentId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        let decoded = hex::decode(&text).map_err(serde::de::Error::custom)?;
        let bytes: [u8; 20] = decoded
            .try_into()
            .map_err(|_| serde::de::Error::custom("content address must be 20 bytes"))?;
        Ok(Self(bytes))
    }
}

impl fmt::Display for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

/// Lifecycle status of an item.
///
/// Transitions only move forward: `Acquiring` → `Rendering` → `Ready`.
/// Deletion is reachable from every state and removes the item entirely.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Acquiring,
    Rendering,
    Ready,
}

/// One constituent file of an item.
///
/// Its position inside [`Item::files`] is the stable index used to derive
/// the per-file output directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemFile {
    /// Store-assigned numeric identifier (0 until first persisted)
    pub id: i64,
    /// Path relative to the item's acquired-file tree
    pub path: String,
    /// Relative path of a converted subtitle track, if one was uploaded
    pub subtitle: Option<String>,
}

/// A unit of acquired media tracked through the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Item {
    pub id: ItemId,
    pub content_id: ContentId,
    pub name: String,
    pub status: ItemStatus,
    /// Original source descriptor, kept so the acquisition can be resumed
    pub source: String,
    pub added_at: DateTime<Utc>,
    /// Constituent files in stable index order
    pub files: Vec<ItemFile>,
    pub poster: Option<String>,
}

/// Errors surfaced by persistent-store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Item {id} not found")]
    ItemNotFound { id: ItemId },

    #[error("File {id} not found")]
    FileNotFound { id: i64 },

    #[error("Store backend error: {reason}")]
    Backend { reason: String },
}

/// Persistent store for items and their constituent files.
///
/// Treated as the source of truth for item status, but not as a
/// distributed lock: in-flight coordination lives in the coordinators'
/// in-memory registries.
#[async_trait]
pub trait MediaStore: Send + Sync {
    /// Persists a new item together with its files, assigning file ids.
    async fn save_item(&self, item: &Item) -> Result<(), StoreError>;

    /// Loads one item with its files.
    ///
    /// # Errors
    /// - `StoreError::ItemNotFound` - No item with this identifier
    async fn item(&self, id: ItemId) -> Result<Item, StoreError>;

    /// Looks an item up by content address, for duplicate detection.
    async fn item_by_content(&self, content_id: ContentId)
    -> Result<Option<Item>, StoreError>;

    /// Lists all items currently in the given lifecycle status.
    async fn items_with_status(&self, status: ItemStatus) -> Result<Vec<Item>, StoreError>;

    /// Writes a status transition.
    async fn set_status(&self, id: ItemId, status: ItemStatus) -> Result<(), StoreError>;

    /// Records the poster image reference for an item.
    async fn set_poster(&self, id: ItemId, url: &str) -> Result<(), StoreError>;

    /// Deletes a single constituent file, e.g. after it failed video
    /// classification.
    async fn delete_file(&self, file_id: i64) -> Result<(), StoreError>;

    /// Deletes an item and all its files.
    async fn delete_item(&self, id: ItemId) -> Result<(), StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_id_displays_as_hex() {
        let mut bytes = [0u8; 20];
        bytes[0] = 0xde;
        bytes[1] = 0xad;
        bytes[19] = 0x0f;

        let content_id = ContentId::new(bytes);
        let hex = content_id.to_string();

        assert_eq!(hex.len(), 40);
        assert!(hex.starts_with("dead"));
        assert!(hex.ends_with("0f"));
    }

    #[test]
    fn test_content_id_serializes_as_hex_string() {
        let content_id = ContentId::new([0xab; 20]);
        let json = serde_json::to_string(&content_id).unwrap();
        assert_eq!(json, format!("\"{}\"", "ab".repeat(20)));

        let parsed: ContentId = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, content_id);

        assert!(serde_json::from_str::<ContentId>("\"abcd\"").is_err());
    }

    #[test]
    fn test_item_ids_are_unique_and_stable() {
        let a = ItemId::generate();
        let b = ItemId::generate();
        assert_ne!(a, b);

        let round_tripped: ItemId = serde_json::from_str(&serde_json::to_string(&a).unwrap()).unwrap();
        assert_eq!(a, round_tripped);
    }

    #[test]
    fn test_status_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&ItemStatus::Acquiring).unwrap(),
            "\"acquiring\""
        );
        assert_eq!(
            serde_json::to_string(&ItemStatus::Ready).unwrap(),
            "\"ready\""
        );
    }
}
