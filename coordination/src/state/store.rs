//! In-process transactional document store
//!
//! Key-path-addressed JSON documents with optimistic concurrency. Every
//! committed write bumps a global clock and stamps the touched documents with
//! it. A [`Transaction`] reads from a snapshot taken at `begin()`, buffers its
//! writes and validates at commit that nothing it read has changed since.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::{Arc, RwLock};

use serde::{de::DeserializeOwned, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use super::schema::paths;
use crate::events::{ChangeKind, DocumentEvent, EventBus, SharedEventBus};

/// Error type for document store operations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Conflicting concurrent write at {path}")]
    Conflict { path: String },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Document not found: {0}")]
    NotFound(String),

    #[error("Lock poisoned")]
    LockPoisoned,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    /// Whether a retry against fresh state may succeed
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict { .. })
    }
}

/// Result type for document store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Shared reference to DocumentStore
pub type SharedDocumentStore = Arc<DocumentStore>;

#[derive(Debug, Clone)]
struct Entry {
    version: u64,
    data: Value,
}

#[derive(Debug, Default)]
struct Inner {
    docs: BTreeMap<String, Entry>,
    /// Membership version per collection, bumped on child create/delete
    collections: HashMap<String, u64>,
    clock: u64,
}

impl Inner {
    fn children<'a>(
        &'a self,
        collection: &'a str,
    ) -> impl Iterator<Item = (&'a String, &'a Entry)> + 'a {
        let prefix = format!("{}/", collection);
        self.docs
            .range(prefix.clone()..)
            .take_while(move |(path, _)| path.starts_with(&prefix))
            .filter(move |(path, _)| !path[collection.len() + 1..].contains('/'))
    }

    fn collection_version(&self, collection: &str) -> u64 {
        self.collections.get(collection).copied().unwrap_or(0)
    }
}

#[derive(Debug, Clone)]
enum PendingWrite {
    Set(Value),
    Delete,
}

/// Thread-safe in-memory document store
pub struct DocumentStore {
    inner: RwLock<Inner>,
    bus: SharedEventBus,
}

impl DocumentStore {
    /// Create an empty store with its own event bus
    pub fn new() -> Self {
        Self::with_event_bus(EventBus::new().shared())
    }

    /// Create an empty store publishing to the given bus
    pub fn with_event_bus(bus: SharedEventBus) -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            bus,
        }
    }

    /// Create a shared reference to this store
    pub fn shared(self) -> SharedDocumentStore {
        Arc::new(self)
    }

    /// The bus committed writes are published on
    pub fn event_bus(&self) -> &SharedEventBus {
        &self.bus
    }

    /// Number of stored documents
    pub fn len(&self) -> StoreResult<usize> {
        let inner = self.inner.read().map_err(|_| StoreError::LockPoisoned)?;
        Ok(inner.docs.len())
    }

    /// Whether the store holds no documents
    pub fn is_empty(&self) -> StoreResult<bool> {
        Ok(self.len()? == 0)
    }

    // =========================================================================
    // Point operations
    // =========================================================================

    /// Read a raw document
    pub fn get_value(&self, path: &str) -> StoreResult<Option<Value>> {
        let inner = self.inner.read().map_err(|_| StoreError::LockPoisoned)?;
        Ok(inner.docs.get(path).map(|entry| entry.data.clone()))
    }

    /// Read and decode a document
    pub fn get<T: DeserializeOwned>(&self, path: &str) -> StoreResult<Option<T>> {
        self.get_value(path)?
            .map(|value| decode(path, value))
            .transpose()
    }

    /// Current version of a document, if present
    pub fn version(&self, path: &str) -> StoreResult<Option<u64>> {
        let inner = self.inner.read().map_err(|_| StoreError::LockPoisoned)?;
        Ok(inner.docs.get(path).map(|entry| entry.version))
    }

    /// Write a document, replacing any previous content
    pub fn set<T: Serialize>(&self, path: &str, value: &T) -> StoreResult<()> {
        let value = encode(path, value)?;
        self.apply(&HashMap::new(), &HashMap::new(), vec![(path.to_string(), PendingWrite::Set(value))])?;
        Ok(())
    }

    /// Merge top-level fields into a document, creating it when absent
    ///
    /// Last writer wins per field; only for advisory data that tolerates
    /// lost updates.
    pub fn merge(&self, path: &str, fields: Value) -> StoreResult<()> {
        let events = {
            let mut inner = self.inner.write().map_err(|_| StoreError::LockPoisoned)?;
            let current = inner.docs.get(path).map(|entry| entry.data.clone());
            let merged = merge_fields(path, current, fields)?;
            commit_locked(
                &mut inner,
                &HashMap::new(),
                &HashMap::new(),
                vec![(path.to_string(), PendingWrite::Set(merged))],
            )?
        };
        self.publish(events);
        Ok(())
    }

    /// Delete a document (no-op when absent)
    pub fn delete(&self, path: &str) -> StoreResult<()> {
        self.apply(&HashMap::new(), &HashMap::new(), vec![(path.to_string(), PendingWrite::Delete)])?;
        Ok(())
    }

    /// Decode every direct child of a collection, ordered by path
    pub fn list<T: DeserializeOwned>(&self, collection: &str) -> StoreResult<Vec<T>> {
        let inner = self.inner.read().map_err(|_| StoreError::LockPoisoned)?;
        inner
            .children(collection)
            .map(|(path, entry)| decode(path, entry.data.clone()))
            .collect()
    }

    /// Ids of every direct child of a collection
    pub fn list_ids(&self, collection: &str) -> StoreResult<Vec<String>> {
        let inner = self.inner.read().map_err(|_| StoreError::LockPoisoned)?;
        Ok(inner
            .children(collection)
            .map(|(path, _)| paths::document_id(path).to_string())
            .collect())
    }

    // =========================================================================
    // Transactions
    // =========================================================================

    /// Start a transaction reading from the current snapshot
    pub fn begin(&self) -> StoreResult<Transaction<'_>> {
        let inner = self.inner.read().map_err(|_| StoreError::LockPoisoned)?;
        Ok(Transaction {
            store: self,
            snapshot: inner.clock,
            reads: HashMap::new(),
            cache: HashMap::new(),
            collection_reads: HashMap::new(),
            writes: BTreeMap::new(),
        })
    }

    fn apply(
        &self,
        reads: &HashMap<String, Option<u64>>,
        collection_reads: &HashMap<String, u64>,
        writes: Vec<(String, PendingWrite)>,
    ) -> StoreResult<Vec<DocumentEvent>> {
        let events = {
            let mut inner = self.inner.write().map_err(|_| StoreError::LockPoisoned)?;
            commit_locked(&mut inner, reads, collection_reads, writes)?
        };
        self.publish(events.clone());
        Ok(events)
    }

    fn publish(&self, events: Vec<DocumentEvent>) {
        for event in events {
            self.bus.publish(event);
        }
    }

    // =========================================================================
    // Snapshots
    // =========================================================================

    /// Export every document as a `{path: document}` object
    pub fn export(&self) -> StoreResult<Value> {
        let inner = self.inner.read().map_err(|_| StoreError::LockPoisoned)?;
        let map: Map<String, Value> = inner
            .docs
            .iter()
            .map(|(path, entry)| (path.clone(), entry.data.clone()))
            .collect();
        Ok(Value::Object(map))
    }

    /// Import a `{path: document}` object, overwriting existing paths
    pub fn import(&self, snapshot: Value) -> StoreResult<usize> {
        let Value::Object(map) = snapshot else {
            return Err(StoreError::Deserialization(
                "snapshot must be a JSON object keyed by path".to_string(),
            ));
        };
        let writes: Vec<(String, PendingWrite)> = map
            .into_iter()
            .map(|(path, value)| (path, PendingWrite::Set(value)))
            .collect();
        let count = writes.len();
        self.apply(&HashMap::new(), &HashMap::new(), writes)?;
        Ok(count)
    }

    /// Write a snapshot of the store to a JSON file
    pub fn save_snapshot(&self, file: impl AsRef<Path>) -> StoreResult<()> {
        let snapshot = self.export()?;
        let bytes = serde_json::to_vec_pretty(&snapshot)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        std::fs::write(file, bytes)?;
        Ok(())
    }

    /// Load a store from a JSON snapshot file
    pub fn load_snapshot(file: impl AsRef<Path>) -> StoreResult<Self> {
        let bytes = std::fs::read(file)?;
        let snapshot: Value = serde_json::from_slice(&bytes)
            .map_err(|e| StoreError::Deserialization(e.to_string()))?;
        let store = Self::new();
        store.import(snapshot)?;
        Ok(store)
    }
}

impl Default for DocumentStore {
    fn default() -> Self {
        Self::new()
    }
}

fn commit_locked(
    inner: &mut Inner,
    reads: &HashMap<String, Option<u64>>,
    collection_reads: &HashMap<String, u64>,
    writes: Vec<(String, PendingWrite)>,
) -> StoreResult<Vec<DocumentEvent>> {
    for (path, observed) in reads {
        let current = inner.docs.get(path).map(|entry| entry.version);
        if current != *observed {
            return Err(StoreError::Conflict { path: path.clone() });
        }
    }
    for (collection, observed) in collection_reads {
        if inner.collection_version(collection) != *observed {
            return Err(StoreError::Conflict {
                path: collection.clone(),
            });
        }
    }

    if writes.is_empty() {
        return Ok(Vec::new());
    }

    inner.clock += 1;
    let version = inner.clock;
    let mut events = Vec::with_capacity(writes.len());

    for (path, write) in writes {
        let collection = paths::collection_of(&path).to_string();
        match write {
            PendingWrite::Set(data) => {
                let change = match inner.docs.insert(path.clone(), Entry { version, data }) {
                    Some(_) => ChangeKind::Updated,
                    None => {
                        inner.collections.insert(collection, version);
                        ChangeKind::Created
                    }
                };
                events.push(DocumentEvent::new(path, change, version));
            }
            PendingWrite::Delete => {
                if inner.docs.remove(&path).is_some() {
                    inner.collections.insert(collection, version);
                    events.push(DocumentEvent::new(path, ChangeKind::Deleted, version));
                }
            }
        }
    }

    debug!(version, writes = events.len(), "Committed writes");
    Ok(events)
}

fn encode<T: Serialize>(path: &str, value: &T) -> StoreResult<Value> {
    serde_json::to_value(value).map_err(|e| StoreError::Serialization(format!("{}: {}", path, e)))
}

fn decode<T: DeserializeOwned>(path: &str, value: Value) -> StoreResult<T> {
    serde_json::from_value(value)
        .map_err(|e| StoreError::Deserialization(format!("{}: {}", path, e)))
}

fn merge_fields(path: &str, current: Option<Value>, fields: Value) -> StoreResult<Value> {
    let Value::Object(fields) = fields else {
        return Err(StoreError::Serialization(format!(
            "{}: merge requires a JSON object",
            path
        )));
    };
    let mut base = match current {
        Some(Value::Object(map)) => map,
        Some(_) => {
            return Err(StoreError::Deserialization(format!(
                "{}: cannot merge into a non-object document",
                path
            )))
        }
        None => Map::new(),
    };
    base.extend(fields);
    Ok(Value::Object(base))
}

// =============================================================================
// Transaction
// =============================================================================

/// Optimistic transaction over a [`DocumentStore`]
///
/// Reads are repeatable and see this transaction's own writes. Reading a
/// document or collection changed after `begin()` fails fast with
/// [`StoreError::Conflict`]; so does `commit()` when anything read has
/// changed since it was read.
pub struct Transaction<'a> {
    store: &'a DocumentStore,
    snapshot: u64,
    reads: HashMap<String, Option<u64>>,
    cache: HashMap<String, Option<Value>>,
    collection_reads: HashMap<String, u64>,
    writes: BTreeMap<String, PendingWrite>,
}

impl<'a> Transaction<'a> {
    /// Read and decode a document
    pub fn get<T: DeserializeOwned>(&mut self, path: &str) -> StoreResult<Option<T>> {
        self.get_value(path)?
            .map(|value| decode(path, value))
            .transpose()
    }

    /// Read a raw document
    pub fn get_value(&mut self, path: &str) -> StoreResult<Option<Value>> {
        if let Some(write) = self.writes.get(path) {
            return Ok(match write {
                PendingWrite::Set(value) => Some(value.clone()),
                PendingWrite::Delete => None,
            });
        }
        if let Some(cached) = self.cache.get(path) {
            return Ok(cached.clone());
        }

        let inner = self.store.inner.read().map_err(|_| StoreError::LockPoisoned)?;
        let entry = inner.docs.get(path);
        if let Some(entry) = entry {
            if entry.version > self.snapshot {
                return Err(StoreError::Conflict {
                    path: path.to_string(),
                });
            }
        }
        let value = entry.map(|entry| entry.data.clone());
        self.reads
            .insert(path.to_string(), entry.map(|entry| entry.version));
        self.cache.insert(path.to_string(), value.clone());
        Ok(value)
    }

    /// Read and decode a document that must exist
    pub fn require<T: DeserializeOwned>(&mut self, path: &str) -> StoreResult<T> {
        self.get(path)?
            .ok_or_else(|| StoreError::NotFound(path.to_string()))
    }

    /// Decode every direct child of a collection, ordered by path
    ///
    /// Membership is validated at commit: a concurrent create or delete in
    /// the collection aborts this transaction.
    pub fn list<T: DeserializeOwned>(&mut self, collection: &str) -> StoreResult<Vec<T>> {
        let mut children: BTreeMap<String, Value> = BTreeMap::new();
        {
            let inner = self.store.inner.read().map_err(|_| StoreError::LockPoisoned)?;
            let membership = inner.collection_version(collection);
            if membership > self.snapshot {
                return Err(StoreError::Conflict {
                    path: collection.to_string(),
                });
            }
            for (path, entry) in inner.children(collection) {
                if entry.version > self.snapshot {
                    return Err(StoreError::Conflict { path: path.clone() });
                }
                if let Some(Some(cached)) = self.cache.get(path) {
                    children.insert(path.clone(), cached.clone());
                } else {
                    self.reads.insert(path.clone(), Some(entry.version));
                    self.cache.insert(path.clone(), Some(entry.data.clone()));
                    children.insert(path.clone(), entry.data.clone());
                }
            }
            self.collection_reads
                .insert(collection.to_string(), membership);
        }

        for (path, write) in &self.writes {
            if paths::collection_of(path) != collection {
                continue;
            }
            match write {
                PendingWrite::Set(value) => {
                    children.insert(path.clone(), value.clone());
                }
                PendingWrite::Delete => {
                    children.remove(path);
                }
            }
        }

        children
            .into_iter()
            .map(|(path, value)| decode(&path, value))
            .collect()
    }

    /// Buffer a full write
    pub fn set<T: Serialize>(&mut self, path: &str, value: &T) -> StoreResult<()> {
        let value = encode(path, value)?;
        self.writes
            .insert(path.to_string(), PendingWrite::Set(value));
        Ok(())
    }

    /// Buffer a top-level field merge against the transaction's view
    pub fn merge(&mut self, path: &str, fields: Value) -> StoreResult<()> {
        let current = self.get_value(path)?;
        let merged = merge_fields(path, current, fields)?;
        self.writes
            .insert(path.to_string(), PendingWrite::Set(merged));
        Ok(())
    }

    /// Buffer a delete
    pub fn delete(&mut self, path: &str) {
        self.writes.insert(path.to_string(), PendingWrite::Delete);
    }

    /// Whether any write is buffered
    pub fn has_writes(&self) -> bool {
        !self.writes.is_empty()
    }

    /// Validate reads and apply buffered writes atomically
    pub fn commit(self) -> StoreResult<Vec<DocumentEvent>> {
        let Transaction {
            store,
            reads,
            collection_reads,
            writes,
            ..
        } = self;
        store.apply(&reads, &collection_reads, writes.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Counter {
        value: u32,
    }

    #[test]
    fn test_point_crud() {
        let store = DocumentStore::new();
        store.set("a/x", &Counter { value: 1 }).unwrap();

        let got: Counter = store.get("a/x").unwrap().unwrap();
        assert_eq!(got.value, 1);

        store.delete("a/x").unwrap();
        assert!(store.get::<Counter>("a/x").unwrap().is_none());
        assert!(store.is_empty().unwrap());
    }

    #[test]
    fn test_list_direct_children_only() {
        let store = DocumentStore::new();
        store.set("c/1", &Counter { value: 1 }).unwrap();
        store.set("c/2", &Counter { value: 2 }).unwrap();
        store.set("c/1/sub/x", &Counter { value: 9 }).unwrap();
        store.set("c2/1", &Counter { value: 7 }).unwrap();

        let items: Vec<Counter> = store.list("c").unwrap();
        assert_eq!(items, vec![Counter { value: 1 }, Counter { value: 2 }]);
        assert_eq!(store.list_ids("c").unwrap(), vec!["1", "2"]);
    }

    #[test]
    fn test_merge_creates_and_preserves_fields() {
        let store = DocumentStore::new();
        store.merge("p/1", json!({"connected": false})).unwrap();
        store.merge("p/1", json!({"name": "Ann"})).unwrap();

        let doc = store.get_value("p/1").unwrap().unwrap();
        assert_eq!(doc, json!({"connected": false, "name": "Ann"}));
    }

    #[test]
    fn test_merge_rejects_non_object() {
        let store = DocumentStore::new();
        assert!(store.merge("p/1", json!(3)).is_err());
    }

    #[test]
    fn test_transaction_read_your_writes() {
        let store = DocumentStore::new();
        store.set("c/1", &Counter { value: 1 }).unwrap();

        let mut tx = store.begin().unwrap();
        tx.set("c/2", &Counter { value: 2 }).unwrap();
        tx.delete("c/1");

        let items: Vec<Counter> = tx.list("c").unwrap();
        assert_eq!(items, vec![Counter { value: 2 }]);
        assert!(tx.get::<Counter>("c/1").unwrap().is_none());

        tx.commit().unwrap();
        assert_eq!(store.list_ids("c").unwrap(), vec!["2"]);
    }

    #[test]
    fn test_conflicting_write_aborts_commit() {
        let store = DocumentStore::new();
        store.set("c/1", &Counter { value: 1 }).unwrap();

        let mut tx = store.begin().unwrap();
        let current: Counter = tx.require("c/1").unwrap();
        tx.set("c/1", &Counter { value: current.value + 1 }).unwrap();

        store.set("c/1", &Counter { value: 10 }).unwrap();

        let err = tx.commit().unwrap_err();
        assert!(err.is_conflict());
        let stored: Counter = store.get("c/1").unwrap().unwrap();
        assert_eq!(stored.value, 10);
    }

    #[test]
    fn test_read_after_concurrent_write_fails_fast() {
        let store = DocumentStore::new();
        store.set("c/1", &Counter { value: 1 }).unwrap();

        let mut tx = store.begin().unwrap();
        store.set("c/1", &Counter { value: 2 }).unwrap();

        assert!(tx.get::<Counter>("c/1").unwrap_err().is_conflict());
    }

    #[test]
    fn test_absent_read_conflicts_with_concurrent_create() {
        let store = DocumentStore::new();

        let mut tx = store.begin().unwrap();
        assert!(tx.get_value("logs/m1").unwrap().is_none());
        tx.set("logs/m1", &json!({"by": "first"})).unwrap();

        store.set("logs/m1", &json!({"by": "second"})).unwrap();

        assert!(tx.commit().unwrap_err().is_conflict());
        assert_eq!(
            store.get_value("logs/m1").unwrap(),
            Some(json!({"by": "second"}))
        );
    }

    #[test]
    fn test_collection_membership_conflict() {
        let store = DocumentStore::new();
        store.set("c/1", &Counter { value: 1 }).unwrap();

        let mut tx = store.begin().unwrap();
        let items: Vec<Counter> = tx.list("c").unwrap();
        assert_eq!(items.len(), 1);
        tx.set("summary", &json!({"count": items.len()})).unwrap();

        store.set("c/2", &Counter { value: 2 }).unwrap();

        assert!(tx.commit().unwrap_err().is_conflict());
    }

    #[test]
    fn test_unrelated_write_does_not_conflict() {
        let store = DocumentStore::new();
        store.set("c/1", &Counter { value: 1 }).unwrap();

        let mut tx = store.begin().unwrap();
        let _: Counter = tx.require("c/1").unwrap();
        tx.set("c/1", &Counter { value: 5 }).unwrap();

        store.set("other/1", &Counter { value: 3 }).unwrap();

        tx.commit().unwrap();
        let stored: Counter = store.get("c/1").unwrap().unwrap();
        assert_eq!(stored.value, 5);
    }

    #[tokio::test]
    async fn test_commit_publishes_events() {
        let store = DocumentStore::new();
        let mut rx = store.event_bus().subscribe();

        store.set("c/1", &Counter { value: 1 }).unwrap();
        store.set("c/1", &Counter { value: 2 }).unwrap();
        store.delete("c/1").unwrap();
        store.delete("c/1").unwrap();

        let created = rx.recv().await.unwrap();
        let updated = rx.recv().await.unwrap();
        let deleted = rx.recv().await.unwrap();
        assert_eq!(created.change, ChangeKind::Created);
        assert_eq!(updated.change, ChangeKind::Updated);
        assert_eq!(deleted.change, ChangeKind::Deleted);
        assert!(created.version < updated.version);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_snapshot_round_trip_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("store.json");

        let store = DocumentStore::new();
        store.set("c/1", &Counter { value: 4 }).unwrap();
        store.save_snapshot(&file).unwrap();

        let restored = DocumentStore::load_snapshot(&file).unwrap();
        let got: Counter = restored.get("c/1").unwrap().unwrap();
        assert_eq!(got.value, 4);
    }

    #[test]
    fn test_import_rejects_non_object() {
        let store = DocumentStore::new();
        assert!(store.import(json!([1, 2])).is_err());
    }
}
