//! Shared-store seam.
//!
//! The replicated dictionary is addressed by paths under four root
//! collections. Subscribers always receive the complete value of the
//! collection root, never a diff. `ReplicaTable` holds one JSON tree and
//! fans snapshots out to subscribers; `MemoryStore` shares one table between
//! any number of in-process clients.

use crate::error::StoreError;
use serde::{Deserialize, Serialize};
use serde_json::{Map as JsonMap, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Collection {
    Players,
    Bombs,
    Items,
    Blocks,
}

impl Collection {
    /// Subscription order. Blocks first so the other collections reconcile
    /// against the current obstacle set.
    pub const ALL: [Collection; 4] = [
        Collection::Blocks,
        Collection::Players,
        Collection::Items,
        Collection::Bombs,
    ];

    pub fn root(self) -> &'static str {
        match self {
            Collection::Players => "players",
            Collection::Bombs => "bombs",
            Collection::Items => "items",
            Collection::Blocks => "blocks",
        }
    }

    pub fn from_root(root: &str) -> Option<Self> {
        Collection::ALL
            .into_iter()
            .find(|collection| collection.root() == root)
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.root())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StorePath {
    pub collection: Collection,
    pub key: Option<String>,
    pub field: Option<String>,
}

impl StorePath {
    pub fn collection(collection: Collection) -> Self {
        Self {
            collection,
            key: None,
            field: None,
        }
    }

    pub fn entry(collection: Collection, key: impl Into<String>) -> Self {
        Self {
            collection,
            key: Some(key.into()),
            field: None,
        }
    }

    pub fn field(collection: Collection, key: impl Into<String>, field: impl Into<String>) -> Self {
        Self {
            collection,
            key: Some(key.into()),
            field: Some(field.into()),
        }
    }

    pub fn parse(path: &str) -> Option<Self> {
        let mut segments = path.trim_matches('/').split('/');
        let collection = Collection::from_root(segments.next()?)?;
        let key = segments.next().filter(|segment| !segment.is_empty());
        let field = segments.next().filter(|segment| !segment.is_empty());
        if segments.next().is_some() || (key.is_none() && field.is_some()) {
            return None;
        }

        Some(Self {
            collection,
            key: key.map(str::to_string),
            field: field.map(str::to_string),
        })
    }

    fn child(&self, segment: &str) -> Option<Self> {
        match (&self.key, &self.field) {
            (None, _) => Some(Self::entry(self.collection, segment)),
            (Some(key), None) => Some(Self::field(self.collection, key.clone(), segment)),
            (Some(_), Some(_)) => None,
        }
    }
}

impl fmt::Display for StorePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.collection.root())?;
        if let Some(key) = &self.key {
            write!(f, "/{key}")?;
        }
        if let Some(field) = &self.field {
            write!(f, "/{field}")?;
        }
        Ok(())
    }
}

/// Full value of one collection root. `Null` when the collection is empty.
#[derive(Debug, Clone, PartialEq)]
pub struct CollectionSnapshot {
    pub collection: Collection,
    pub value: Value,
}

impl CollectionSnapshot {
    pub fn empty(collection: Collection) -> Self {
        Self {
            collection,
            value: Value::Null,
        }
    }

    /// Keyed entries. Anything other than an object yields nothing.
    pub fn entries(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.value
            .as_object()
            .into_iter()
            .flat_map(|entries| entries.iter().map(|(key, value)| (key.as_str(), value)))
    }
}

/// One mutation as it travels to the transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum StoreWrite {
    Put {
        path: String,
        value: Value,
    },
    Update {
        path: String,
        fields: JsonMap<String, Value>,
    },
    Remove {
        path: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Subscription {
    id: u64,
    collection: Collection,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn collection(&self) -> Collection {
        self.collection
    }
}

pub type SnapshotSender = Sender<CollectionSnapshot>;

/// Field map for [`StoreClient::update`]. Anything but an object yields no
/// fields.
pub fn fields(value: Value) -> JsonMap<String, Value> {
    match value {
        Value::Object(fields) => fields,
        _ => JsonMap::new(),
    }
}

pub trait StoreClient {
    /// Replace the value at `path`. Writing `Null` deletes it.
    fn put(&mut self, path: &StorePath, value: Value) -> Result<(), StoreError>;

    /// Merge `fields` into the object at `path`, field by field.
    fn update(&mut self, path: &StorePath, fields: JsonMap<String, Value>)
        -> Result<(), StoreError>;

    /// Idempotent delete.
    fn remove(&mut self, path: &StorePath) -> Result<(), StoreError>;

    /// Delivers the current collection value immediately, then again after
    /// every change to it.
    fn subscribe(
        &mut self,
        collection: Collection,
        sink: SnapshotSender,
    ) -> Result<Subscription, StoreError>;

    fn unsubscribe(&mut self, subscription: Subscription);
}

#[derive(Debug, Default)]
pub struct ReplicaTable {
    roots: BTreeMap<Collection, Value>,
    subscribers: Vec<(Subscription, SnapshotSender)>,
    next_subscription_id: u64,
}

impl ReplicaTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, path: &StorePath) -> Option<&Value> {
        let root = self.roots.get(&path.collection)?;
        let Some(key) = path.key.as_deref() else {
            return Some(root);
        };
        let entry = root.get(key)?;
        match path.field.as_deref() {
            Some(field) => entry.get(field),
            None => Some(entry),
        }
    }

    pub fn snapshot(&self, collection: Collection) -> CollectionSnapshot {
        CollectionSnapshot {
            collection,
            value: self
                .roots
                .get(&collection)
                .cloned()
                .unwrap_or(Value::Null),
        }
    }

    pub fn put(&mut self, path: &StorePath, value: Value) {
        let before = self.snapshot(path.collection).value;
        write_value(
            self.roots.entry(path.collection).or_insert(Value::Null),
            path,
            value,
        );
        self.notify_if_changed(path.collection, &before);
    }

    pub fn update(&mut self, path: &StorePath, fields: JsonMap<String, Value>) {
        let before = self.snapshot(path.collection).value;
        for (segment, value) in fields {
            let Some(child) = path.child(&segment) else {
                log::warn!("ignoring update below field path {path}/{segment}");
                continue;
            };
            write_value(
                self.roots.entry(path.collection).or_insert(Value::Null),
                &child,
                value,
            );
        }
        self.notify_if_changed(path.collection, &before);
    }

    pub fn remove(&mut self, path: &StorePath) {
        self.put(path, Value::Null);
    }

    /// Replace a whole collection with a value received from elsewhere.
    pub fn replace_collection(&mut self, collection: Collection, value: Value) {
        self.put(&StorePath::collection(collection), value);
    }

    pub fn subscribe(&mut self, collection: Collection, sink: SnapshotSender) -> Subscription {
        self.next_subscription_id += 1;
        let subscription = Subscription {
            id: self.next_subscription_id,
            collection,
        };

        if sink.send(self.snapshot(collection)).is_ok() {
            self.subscribers.push((subscription, sink));
        }
        subscription
    }

    pub fn unsubscribe(&mut self, subscription: Subscription) {
        self.subscribers
            .retain(|(existing, _)| existing.id != subscription.id);
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    fn notify_if_changed(&mut self, collection: Collection, before: &Value) {
        let snapshot = self.snapshot(collection);
        if &snapshot.value == before {
            return;
        }

        // Receivers that went away drop their subscription.
        self.subscribers.retain(|(subscription, sink)| {
            subscription.collection != collection || sink.send(snapshot.clone()).is_ok()
        });
    }
}

fn write_value(root: &mut Value, path: &StorePath, value: Value) {
    let Some(key) = path.key.as_deref() else {
        *root = value;
        return;
    };

    if value.is_null() {
        remove_entry(root, key, path.field.as_deref());
        return;
    }

    match path.field.as_deref() {
        None => {
            ensure_object(root).insert(key.to_string(), value);
        }
        // Only whole-entry writes create keys. A late field write must not
        // bring back a removed entry as a fragment.
        Some(field) => match root.get_mut(key) {
            Some(entry) => {
                ensure_object(entry).insert(field.to_string(), value);
            }
            None => log::debug!("skipping write to {path}, the entry is gone"),
        },
    }
}

fn remove_entry(root: &mut Value, key: &str, field: Option<&str>) {
    let Value::Object(entries) = root else {
        return;
    };

    match field {
        None => {
            entries.remove(key);
        }
        Some(field) => {
            if let Some(Value::Object(fields)) = entries.get_mut(key) {
                fields.remove(field);
                if fields.is_empty() {
                    entries.remove(key);
                }
            }
        }
    }

    if entries.is_empty() {
        *root = Value::Null;
    }
}

fn ensure_object(value: &mut Value) -> &mut JsonMap<String, Value> {
    if !value.is_object() {
        *value = Value::Object(JsonMap::new());
    }
    match value {
        Value::Object(entries) => entries,
        _ => unreachable!("value was just replaced with an object"),
    }
}

/// In-process replicated store. Every handle returned by [`MemoryStore::connect`]
/// sees the same tree; availability and the write journal are per handle.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    table: Arc<Mutex<ReplicaTable>>,
    online: bool,
    journal: Vec<StoreWrite>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            table: Arc::new(Mutex::new(ReplicaTable::new())),
            online: true,
            journal: Vec::new(),
        }
    }

    pub fn connect(&self) -> Self {
        Self {
            table: Arc::clone(&self.table),
            online: true,
            journal: Vec::new(),
        }
    }

    pub fn set_online(&mut self, online: bool) {
        self.online = online;
    }

    pub fn is_online(&self) -> bool {
        self.online
    }

    /// Successful writes issued through this handle, oldest first.
    pub fn journal(&self) -> &[StoreWrite] {
        &self.journal
    }

    pub fn clear_journal(&mut self) {
        self.journal.clear();
    }

    pub fn get(&self, path: &StorePath) -> Option<Value> {
        self.table
            .lock()
            .ok()
            .and_then(|table| table.get(path).cloned())
    }

    pub fn snapshot(&self, collection: Collection) -> CollectionSnapshot {
        match self.table.lock() {
            Ok(table) => table.snapshot(collection),
            Err(_) => CollectionSnapshot::empty(collection),
        }
    }

    fn writable_table(&self) -> Result<MutexGuard<'_, ReplicaTable>, StoreError> {
        if !self.online {
            return Err(StoreError::unavailable("memory store handle is offline"));
        }
        self.table
            .lock()
            .map_err(|_| StoreError::unavailable("replica table mutex poisoned"))
    }
}

impl StoreClient for MemoryStore {
    fn put(&mut self, path: &StorePath, value: Value) -> Result<(), StoreError> {
        self.writable_table()?.put(path, value.clone());
        self.journal.push(StoreWrite::Put {
            path: path.to_string(),
            value,
        });
        Ok(())
    }

    fn update(
        &mut self,
        path: &StorePath,
        fields: JsonMap<String, Value>,
    ) -> Result<(), StoreError> {
        self.writable_table()?.update(path, fields.clone());
        self.journal.push(StoreWrite::Update {
            path: path.to_string(),
            fields,
        });
        Ok(())
    }

    fn remove(&mut self, path: &StorePath) -> Result<(), StoreError> {
        self.writable_table()?.remove(path);
        self.journal.push(StoreWrite::Remove {
            path: path.to_string(),
        });
        Ok(())
    }

    fn subscribe(
        &mut self,
        collection: Collection,
        sink: SnapshotSender,
    ) -> Result<Subscription, StoreError> {
        Ok(self.writable_table()?.subscribe(collection, sink))
    }

    fn unsubscribe(&mut self, subscription: Subscription) {
        if let Ok(mut table) = self.table.lock() {
            table.unsubscribe(subscription);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::mpsc::channel;

    #[test]
    fn path_parser_accepts_entry_and_field_paths() {
        let path = StorePath::parse("bombs/bomb_1/opacity").expect("field path parses");
        assert_eq!(path, StorePath::field(Collection::Bombs, "bomb_1", "opacity"));
        assert_eq!(path.to_string(), "bombs/bomb_1/opacity");

        assert_eq!(
            StorePath::parse("/blocks"),
            Some(StorePath::collection(Collection::Blocks))
        );
        assert_eq!(StorePath::parse("walls/1"), None);
        assert_eq!(StorePath::parse("bombs/a/b/c"), None);
    }

    #[test]
    fn subscribe_delivers_present_state_then_full_snapshots() {
        let mut table = ReplicaTable::new();
        table.put(&StorePath::entry(Collection::Items, "3,4"), json!({ "type": "bomb_up" }));

        let (sender, receiver) = channel();
        table.subscribe(Collection::Items, sender);
        let initial = receiver.try_recv().expect("initial snapshot");
        assert_eq!(initial.value, json!({ "3,4": { "type": "bomb_up" } }));

        table.put(&StorePath::entry(Collection::Items, "5,5"), json!({ "type": "fire_up" }));
        let next = receiver.try_recv().expect("change snapshot");
        assert_eq!(next.entries().count(), 2);
    }

    #[test]
    fn unchanged_writes_do_not_notify() {
        let mut table = ReplicaTable::new();
        let (sender, receiver) = channel();
        table.subscribe(Collection::Players, sender);
        receiver.try_recv().expect("initial snapshot");

        let path = StorePath::entry(Collection::Players, "p1");
        table.put(&path, json!({ "x": 1, "y": 1 }));
        table.put(&path, json!({ "x": 1, "y": 1 }));
        assert!(receiver.try_recv().is_ok());
        assert!(receiver.try_recv().is_err());
    }

    #[test]
    fn update_merges_fields_and_remove_prunes_empty_roots() {
        let mut table = ReplicaTable::new();
        let path = StorePath::entry(Collection::Bombs, "b1");
        table.put(&path, json!({ "x": 1, "y": 2, "timer": 3, "firePower": 1 }));
        table.update(&path, fields(json!({ "x": 4, "isTriggered": true })));

        let entry = table.get(&path).expect("entry exists");
        assert_eq!(entry["x"], 4);
        assert_eq!(entry["y"], 2);
        assert_eq!(entry["isTriggered"], true);

        table.remove(&path);
        table.remove(&path);
        assert_eq!(table.snapshot(Collection::Bombs).value, Value::Null);
    }

    #[test]
    fn field_writes_never_recreate_a_removed_entry() {
        let mut table = ReplicaTable::new();
        let (sender, receiver) = channel();
        table.subscribe(Collection::Bombs, sender);
        receiver.try_recv().expect("initial snapshot");

        table.update(
            &StorePath::entry(Collection::Bombs, "gone"),
            fields(json!({ "detonated": true })),
        );
        table.put(&StorePath::field(Collection::Bombs, "gone", "opacity"), json!(0.5));
        assert_eq!(table.snapshot(Collection::Bombs).value, Value::Null);
        assert!(receiver.try_recv().is_err());

        let path = StorePath::entry(Collection::Bombs, "live");
        table.put(&path, json!({ "x": 1, "y": 1 }));
        table.put(&StorePath::field(Collection::Bombs, "live", "opacity"), json!(0.5));
        assert_eq!(table.get(&path), Some(&json!({ "x": 1, "y": 1, "opacity": 0.5 })));
    }

    #[test]
    fn memory_store_handles_share_state_but_not_availability() {
        let host = MemoryStore::new();
        let mut left = host.connect();
        let mut right = host.connect();

        left.put(&StorePath::entry(Collection::Items, "1,1"), json!({ "type": "fire_up" }))
            .expect("left write succeeds");
        assert!(right
            .get(&StorePath::entry(Collection::Items, "1,1"))
            .is_some());

        right.set_online(false);
        let error = right
            .remove(&StorePath::entry(Collection::Items, "1,1"))
            .expect_err("offline handle fails");
        assert!(matches!(error, StoreError::Unavailable { .. }));
        assert!(right.journal().is_empty());
        assert_eq!(left.journal().len(), 1);
    }

    #[test]
    fn dropped_receivers_lose_their_subscription() {
        let mut table = ReplicaTable::new();
        let (sender, receiver) = channel();
        table.subscribe(Collection::Bombs, sender);
        drop(receiver);

        table.put(&StorePath::entry(Collection::Bombs, "b1"), json!({ "x": 0, "y": 0 }));
        assert_eq!(table.subscriber_count(), 0);
    }
}
