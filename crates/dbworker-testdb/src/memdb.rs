//! In-memory document database.
//!
//! Databases live in a process-wide registry keyed by name, the way a database
//! server outlives its client connections: every [`MemDb`] handle opened for
//! the same name sees the same collections until the database is dropped.

use crate::{DbError, Result};
use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use dbworker::Connect;
use parking_lot::{Mutex, RwLock, const_mutex};
use serde_json::{Map, Value};
use std::{collections::BTreeMap, sync::Arc};

/// A stored document.
pub type Document = Map<String, Value>;

/// Documents of one collection, keyed by the JSON text of their `_id`.
type Collection = BTreeMap<String, Document>;

#[derive(Debug, Default)]
struct Store {
    collections: RwLock<BTreeMap<String, Collection>>,
}

static SERVER: Mutex<BTreeMap<String, Arc<Store>>> = const_mutex(BTreeMap::new());

fn store(name: &str) -> Arc<Store> {
    Arc::clone(SERVER.lock().entry(name.to_string()).or_default())
}

/// Outcome of [`MemDb::insert_one`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InsertOneResult {
    pub inserted_id: Value,
}

/// How to reach a [`MemDb`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MemDbConfig {
    /// Database name.
    pub database: String,

    /// Makes [`Connect::connect`] fail, standing in for a server that is down.
    pub unreachable: bool,
}

impl MemDbConfig {
    pub fn new(database: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            unreachable: false,
        }
    }
}

/// A connected handle to an in-memory database.
///
/// Handles are safe to share between threads; reads and writes to the same
/// database are serialized by a read-write lock.
#[derive(Debug)]
pub struct MemDb {
    name: String,
    store: Arc<Store>,
    connected: AtomicBool,
    disconnects: AtomicUsize,
}

impl MemDb {
    /// Opens a handle to database `name`, creating it if needed.
    pub fn open(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            store: store(&name),
            name,
            connected: AtomicBool::new(true),
            disconnects: AtomicUsize::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// How many times this handle was disconnected successfully.
    pub fn disconnects(&self) -> usize {
        self.disconnects.load(Ordering::Acquire)
    }

    fn ensure_connected(&self) -> Result<()> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(DbError::Disconnected {
                database: self.name.clone(),
            })
        }
    }

    /// Stores `doc` in `collection`, creating the collection if needed.
    ///
    /// The document is normalized before it is stored: an `id` field is
    /// renamed to `_id` when the document has no `_id` of its own.
    ///
    /// # Errors
    ///
    /// Fails if `doc` is not an object, has no id, or its id is already taken.
    pub fn insert_one(&self, collection: &str, doc: Value) -> Result<InsertOneResult> {
        self.ensure_connected()?;
        let (inserted_id, doc) = normalize(doc)?;
        let key = inserted_id.to_string();

        let mut collections = self.store.collections.write();
        let docs = collections.entry(collection.to_string()).or_default();
        if docs.contains_key(&key) {
            return Err(DbError::DuplicateKey {
                collection: collection.to_string(),
                id: key,
            });
        }
        docs.insert(key, doc);
        Ok(InsertOneResult { inserted_id })
    }

    /// Inserts documents in order, stopping at the first failure.
    ///
    /// # Errors
    ///
    /// Returns the first insert error; earlier documents stay inserted.
    pub fn insert_many(
        &self,
        collection: &str,
        docs: impl IntoIterator<Item = Value>,
    ) -> Result<usize> {
        docs.into_iter().try_fold(0, |inserted, doc| {
            self.insert_one(collection, doc)?;
            Ok(inserted + 1)
        })
    }

    /// Looks a document up by `_id`.
    ///
    /// # Errors
    ///
    /// Fails only if the handle is disconnected. A missing collection is not
    /// an error.
    pub fn find_one(&self, collection: &str, id: &Value) -> Result<Option<Document>> {
        self.ensure_connected()?;
        let collections = self.store.collections.read();
        Ok(collections
            .get(collection)
            .and_then(|docs| docs.get(&id.to_string()))
            .cloned())
    }

    /// All documents of `collection`, ordered by the JSON text of their ids.
    ///
    /// # Errors
    ///
    /// Fails only if the handle is disconnected.
    pub fn find_all(&self, collection: &str) -> Result<Vec<Document>> {
        self.ensure_connected()?;
        let collections = self.store.collections.read();
        Ok(collections
            .get(collection)
            .map(|docs| docs.values().cloned().collect())
            .unwrap_or_default())
    }

    /// Removes a document by `_id`, returning whether it existed.
    ///
    /// # Errors
    ///
    /// Fails only if the handle is disconnected.
    pub fn delete_one(&self, collection: &str, id: &Value) -> Result<bool> {
        self.ensure_connected()?;
        let mut collections = self.store.collections.write();
        Ok(collections
            .get_mut(collection)
            .is_some_and(|docs| docs.remove(&id.to_string()).is_some()))
    }

    /// Number of documents in `collection`.
    ///
    /// # Errors
    ///
    /// Fails only if the handle is disconnected.
    pub fn count(&self, collection: &str) -> Result<usize> {
        self.ensure_connected()?;
        let collections = self.store.collections.read();
        Ok(collections.get(collection).map_or(0, BTreeMap::len))
    }

    /// Names of all collections, sorted.
    ///
    /// # Errors
    ///
    /// Fails only if the handle is disconnected.
    pub fn collection_names(&self) -> Result<Vec<String>> {
        self.ensure_connected()?;
        Ok(self.store.collections.read().keys().cloned().collect())
    }

    /// Deletes every collection and removes the database from the registry.
    /// Handles still open keep working against an empty database.
    ///
    /// # Errors
    ///
    /// Fails only if the handle is disconnected.
    pub fn drop_database(&self) -> Result<()> {
        self.ensure_connected()?;
        self.store.collections.write().clear();
        let mut server = SERVER.lock();
        if server
            .get(&self.name)
            .is_some_and(|store| Arc::ptr_eq(store, &self.store))
        {
            server.remove(&self.name);
        }
        Ok(())
    }
}

/// Checks that `doc` is storable and returns its id alongside it.
fn normalize(doc: Value) -> Result<(Value, Document)> {
    let Value::Object(mut doc) = doc else {
        return Err(DbError::NotADocument);
    };
    let id = match doc.get("_id") {
        Some(id) => id.clone(),
        None => {
            let id = doc.remove("id").ok_or(DbError::MissingId)?;
            doc.insert("_id".to_string(), id.clone());
            id
        }
    };
    Ok((id, doc))
}

impl Connect for MemDb {
    type Config = MemDbConfig;
    type Error = DbError;

    fn connect(config: &MemDbConfig) -> Result<Self> {
        if config.unreachable {
            return Err(DbError::Unreachable {
                database: config.database.clone(),
            });
        }
        #[cfg(feature = "tracing")]
        tracing::debug!("Connected to in-memory database `{}`", config.database);
        Ok(Self::open(config.database.clone()))
    }

    fn disconnect(&self) -> Result<()> {
        if !self.connected.swap(false, Ordering::AcqRel) {
            return Err(DbError::Disconnected {
                database: self.name.clone(),
            });
        }
        self.disconnects.fetch_add(1, Ordering::AcqRel);
        #[cfg(feature = "tracing")]
        tracing::debug!("Disconnected from in-memory database `{}`", self.name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn db(name: &str) -> MemDb {
        let db = MemDb::open(format!("memdb-{name}"));
        db.drop_database().unwrap();
        MemDb::open(format!("memdb-{name}"))
    }

    #[test]
    fn insert_then_find() {
        let db = db("insert_then_find");
        let res = db.insert_one("foo", json!({ "_id": 1, "name": "foo" })).unwrap();
        assert_eq!(res.inserted_id, json!(1));

        let doc = db.find_one("foo", &json!(1)).unwrap().unwrap();
        assert_eq!(Value::Object(doc), json!({ "_id": 1, "name": "foo" }));
        assert_eq!(db.find_one("foo", &json!(2)).unwrap(), None);
        assert_eq!(db.find_one("bar", &json!(1)).unwrap(), None);
    }

    #[test]
    fn id_field_is_normalized() {
        let db = db("id_field_is_normalized");
        db.insert_one("foo", json!({ "id": "a", "n": 1 })).unwrap();
        let doc = db.find_one("foo", &json!("a")).unwrap().unwrap();
        assert_eq!(Value::Object(doc), json!({ "_id": "a", "n": 1 }));
    }

    #[test]
    fn rejects_bad_documents() {
        let db = db("rejects_bad_documents");
        assert_eq!(
            db.insert_one("foo", json!([1, 2])),
            Err(DbError::NotADocument)
        );
        assert_eq!(
            db.insert_one("foo", json!({ "name": "x" })),
            Err(DbError::MissingId)
        );
        db.insert_one("foo", json!({ "_id": 3 })).unwrap();
        assert!(matches!(
            db.insert_one("foo", json!({ "_id": 3 })),
            Err(DbError::DuplicateKey { .. })
        ));
        assert_eq!(db.count("foo").unwrap(), 1);
    }

    #[test]
    fn ids_of_different_types_do_not_collide() {
        let db = db("ids_of_different_types_do_not_collide");
        db.insert_one("foo", json!({ "_id": 1 })).unwrap();
        db.insert_one("foo", json!({ "_id": "1" })).unwrap();
        assert_eq!(db.count("foo").unwrap(), 2);
        assert!(db.delete_one("foo", &json!("1")).unwrap());
        assert!(!db.delete_one("foo", &json!("1")).unwrap());
        assert_eq!(db.count("foo").unwrap(), 1);
    }

    #[test]
    fn insert_many_stops_at_first_failure() {
        let db = db("insert_many_stops_at_first_failure");
        let err = db
            .insert_many("foo", [json!({ "_id": 1 }), json!({ "_id": 1 }), json!({ "_id": 2 })])
            .unwrap_err();
        assert!(matches!(err, DbError::DuplicateKey { .. }));
        assert_eq!(db.find_all("foo").unwrap().len(), 1);
    }

    #[test]
    fn handles_share_a_database_until_dropped() {
        let first = db("handles_share");
        let second = MemDb::open("memdb-handles_share");
        first.insert_one("foo", json!({ "_id": 33 })).unwrap();
        assert_eq!(second.collection_names().unwrap(), vec!["foo".to_string()]);

        first.drop_database().unwrap();
        assert!(second.collection_names().unwrap().is_empty());
        let third = MemDb::open("memdb-handles_share");
        assert!(third.collection_names().unwrap().is_empty());
    }

    #[test]
    fn connect_and_disconnect() {
        let config = MemDbConfig {
            database: "memdb-connect".to_string(),
            unreachable: true,
        };
        assert!(matches!(
            MemDb::connect(&config),
            Err(DbError::Unreachable { .. })
        ));

        let db = MemDb::connect(&MemDbConfig::new("memdb-connect")).unwrap();
        assert!(db.is_connected());
        db.disconnect().unwrap();
        assert!(!db.is_connected());
        assert_eq!(db.disconnects(), 1);
        assert!(matches!(db.disconnect(), Err(DbError::Disconnected { .. })));
        assert!(matches!(db.count("foo"), Err(DbError::Disconnected { .. })));
        assert_eq!(db.disconnects(), 1);
    }
}
