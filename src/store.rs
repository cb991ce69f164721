//! Generic document store adapter.
//!
//! The engine treats persistence as an asynchronous key-value store per
//! named collection, with four core operations (create / readAll /
//! update-with-merge / delete) plus a single-document read. `update` uses
//! merge semantics: fields absent from the patch are preserved, nested maps
//! are merged recursively, and dotted keys (`dailySummaries.<date>.stickSold`)
//! patch a single nested field without rewriting the whole document.
//!
//! There is no locking, versioning, or optimistic-concurrency check on any
//! collection; the app assumes a single active user. Multi-document commits
//! are sequences of independent writes (see `intents`).

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tracing::debug;
use uuid::Uuid;

use crate::error::StoreError;

// ---------------------------------------------------------------------------
// Documents
// ---------------------------------------------------------------------------

/// A stored document: server-assigned id plus its JSON body.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: String,
    pub data: Value,
}

impl Document {
    /// Deserialize the body into a typed model.
    pub fn parse<T: DeserializeOwned>(&self) -> Result<T, StoreError> {
        serde_json::from_value(self.data.clone())
            .map_err(|e| StoreError::Backend(format!("decode document {}: {e}", self.id)))
    }
}

// ---------------------------------------------------------------------------
// Store trait
// ---------------------------------------------------------------------------

#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Insert a new document with a server-assigned id.
    async fn create(&self, collection: &str, data: Value) -> Result<Document, StoreError>;

    /// Full collection scan — no filtering or pagination.
    async fn read_all(&self, collection: &str) -> Result<Vec<Document>, StoreError>;

    /// Single-document lookup by id.
    async fn read(&self, collection: &str, id: &str) -> Result<Option<Document>, StoreError>;

    /// Merge `patch` into the document, creating it if absent.
    async fn update(&self, collection: &str, id: &str, patch: Value) -> Result<(), StoreError>;

    /// Remove a document. Deleting a missing document is a no-op.
    async fn delete(&self, collection: &str, id: &str) -> Result<(), StoreError>;
}

// ---------------------------------------------------------------------------
// Merge semantics
// ---------------------------------------------------------------------------

/// Apply a merge patch to `target`.
///
/// Top-level keys containing `.` are field paths: intermediate maps are
/// created as needed and the leaf is replaced. Plain keys merge object
/// values recursively and replace everything else (scalars, arrays, nulls).
pub fn merge_patch(target: &mut Value, patch: &Value) {
    let Value::Object(patch_map) = patch else {
        *target = patch.clone();
        return;
    };
    if !target.is_object() {
        *target = Value::Object(Map::new());
    }
    if let Value::Object(map) = target {
        apply_patch_map(map, patch_map);
    }
}

fn apply_patch_map(map: &mut Map<String, Value>, patch: &Map<String, Value>) {
    for (key, value) in patch {
        if key.contains('.') {
            set_field_path(map, key, value.clone());
            continue;
        }
        match (map.get_mut(key), value) {
            (Some(Value::Object(existing)), Value::Object(incoming)) => {
                apply_patch_map(existing, incoming);
            }
            _ => {
                map.insert(key.clone(), value.clone());
            }
        }
    }
}

fn set_field_path(map: &mut Map<String, Value>, path: &str, value: Value) {
    let parts: Vec<&str> = path.split('.').collect();
    let mut current = map;
    for part in &parts[..parts.len() - 1] {
        let entry = current
            .entry(part.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !entry.is_object() {
            *entry = Value::Object(Map::new());
        }
        current = match entry {
            Value::Object(m) => m,
            _ => return,
        };
    }
    current.insert(parts[parts.len() - 1].to_string(), value);
}

// ---------------------------------------------------------------------------
// In-memory store
// ---------------------------------------------------------------------------

/// Process-local store used by tests and as a reference implementation of
/// the merge semantics.
#[derive(Default)]
pub struct MemoryStore {
    collections: Mutex<HashMap<String, BTreeMap<String, Value>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn create(&self, collection: &str, data: Value) -> Result<Document, StoreError> {
        let mut collections = self
            .collections
            .lock()
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        let id = Uuid::new_v4().to_string();
        collections
            .entry(collection.to_string())
            .or_default()
            .insert(id.clone(), data.clone());
        debug!(collection, id = %id, "document created");
        Ok(Document { id, data })
    }

    async fn read_all(&self, collection: &str) -> Result<Vec<Document>, StoreError> {
        let collections = self
            .collections
            .lock()
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(collections
            .get(collection)
            .map(|docs| {
                docs.iter()
                    .map(|(id, data)| Document {
                        id: id.clone(),
                        data: data.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn read(&self, collection: &str, id: &str) -> Result<Option<Document>, StoreError> {
        let collections = self
            .collections
            .lock()
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(collections.get(collection).and_then(|docs| {
            docs.get(id).map(|data| Document {
                id: id.to_string(),
                data: data.clone(),
            })
        }))
    }

    async fn update(&self, collection: &str, id: &str, patch: Value) -> Result<(), StoreError> {
        let mut collections = self
            .collections
            .lock()
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        let docs = collections.entry(collection.to_string()).or_default();
        let target = docs
            .entry(id.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        merge_patch(target, &patch);
        Ok(())
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<(), StoreError> {
        let mut collections = self
            .collections
            .lock()
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        if let Some(docs) = collections.get_mut(collection) {
            docs.remove(id);
        }
        Ok(())
    }
}

// ===========================================================================
// Tests
// ===========================================================================
