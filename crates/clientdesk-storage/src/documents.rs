use crate::watch::{Subscription, Watchers};
use crate::{parse_timestamp, StorageError};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, warn};

pub const DOCUMENTS_SCHEMA_VERSION: i64 = 1;

/// Keys owned by the store; they are never taken from caller-supplied fields.
const RESERVED_KEYS: [&str; 3] = ["id", "createdAt", "updatedAt"];

pub type Fields = serde_json::Map<String, Value>;

#[derive(Debug, Clone, PartialEq)]
pub struct StoredDocument {
    pub id: String,
    pub fields: Fields,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl StoredDocument {
    /// Wire form: `{id, ...fields, createdAt, updatedAt}`.
    pub fn to_json(&self) -> Value {
        let mut object = Fields::new();
        object.insert("id".to_string(), Value::String(self.id.clone()));
        for (key, value) in &self.fields {
            object.insert(key.clone(), value.clone());
        }
        object.insert(
            "createdAt".to_string(),
            Value::String(self.created_at.to_rfc3339()),
        );
        object.insert(
            "updatedAt".to_string(),
            Value::String(self.updated_at.to_rfc3339()),
        );
        Value::Object(object)
    }

    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, StorageError> {
        serde_json::from_value(self.to_json())
            .map_err(|err| StorageError::Serialization(format!("document {}: {err}", self.id)))
    }
}

/// Document collections kept in SQLite. Every write stamps server time and
/// pushes the full collection to its watchers.
pub struct DocumentStore {
    conn: Mutex<Connection>,
    watchers: Mutex<HashMap<String, Watchers<[StoredDocument]>>>,
}

impl DocumentStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        Self::from_connection(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self, StorageError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, StorageError> {
        let store = Self {
            conn: Mutex::new(conn),
            watchers: Mutex::new(HashMap::new()),
        };
        store.migrate()?;
        Ok(store)
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StorageError> {
        self.conn.lock().map_err(|_| StorageError::LockPoisoned)
    }

    pub fn schema_version(&self) -> Result<i64, StorageError> {
        Ok(self
            .conn()?
            .query_row("PRAGMA user_version", [], |row| row.get(0))?)
    }

    pub fn migrate(&self) -> Result<(), StorageError> {
        let current = self.schema_version()?;
        if current > DOCUMENTS_SCHEMA_VERSION {
            return Err(StorageError::UnsupportedSchemaVersion {
                found: current,
                supported: DOCUMENTS_SCHEMA_VERSION,
            });
        }

        if current < 1 {
            let conn = self.conn()?;
            let sql = include_str!("../migrations/0001_documents.sql");
            conn.execute_batch(sql)?;
            conn.execute("PRAGMA user_version = 1", []).map(|_| ())?;
        }

        Ok(())
    }

    pub fn list(&self, collection: &str) -> Result<Vec<StoredDocument>, StorageError> {
        let conn = self.conn()?;
        let mut statement = conn.prepare(
            "
            SELECT doc_id, body_json, created_at, updated_at
            FROM documents
            WHERE collection = ?1
            ORDER BY seq ASC
            ",
        )?;
        let rows = statement.query_map([collection], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?;

        let mut documents = Vec::new();
        for row in rows {
            let (id, body_json, created_at, updated_at) = row?;
            documents.push(decode_row(id, &body_json, &created_at, &updated_at)?);
        }
        Ok(documents)
    }

    pub fn get(&self, collection: &str, id: &str) -> Result<Option<StoredDocument>, StorageError> {
        let conn = self.conn()?;
        get_locked(&conn, collection, id)
    }

    pub fn count(&self, collection: &str) -> Result<i64, StorageError> {
        let count = self.conn()?.query_row(
            "SELECT COUNT(*) FROM documents WHERE collection = ?1",
            [collection],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Stores a new document under a generated id and stamps `createdAt` and
    /// `updatedAt` with server time.
    pub fn insert(&self, collection: &str, fields: Fields) -> Result<StoredDocument, StorageError> {
        let now = Utc::now();
        let document = StoredDocument {
            id: uuid::Uuid::new_v4().to_string(),
            fields: strip_reserved(fields),
            created_at: now,
            updated_at: now,
        };
        let body_json = encode_fields(&document.fields)?;

        self.conn()?.execute(
            "
            INSERT INTO documents (collection, doc_id, body_json, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ",
            params![
                collection,
                document.id,
                body_json,
                document.created_at.to_rfc3339(),
                document.updated_at.to_rfc3339(),
            ],
        )?;

        debug!(event = "document_insert", collection, id = %document.id);
        self.publish(collection);
        Ok(document)
    }

    /// Merges `patch` into an existing document and refreshes `updatedAt`.
    /// Returns `None` when the document does not exist.
    pub fn update_fields(
        &self,
        collection: &str,
        id: &str,
        patch: Fields,
    ) -> Result<Option<StoredDocument>, StorageError> {
        let updated = {
            let conn = self.conn()?;
            let Some(mut document) = get_locked(&conn, collection, id)? else {
                return Ok(None);
            };
            for (key, value) in strip_reserved(patch) {
                document.fields.insert(key, value);
            }
            document.updated_at = Utc::now();
            let body_json = encode_fields(&document.fields)?;
            conn.execute(
                "
                UPDATE documents
                SET body_json = ?3, updated_at = ?4
                WHERE collection = ?1 AND doc_id = ?2
                ",
                params![collection, id, body_json, document.updated_at.to_rfc3339()],
            )?;
            document
        };

        debug!(event = "document_update", collection, id);
        self.publish(collection);
        Ok(Some(updated))
    }

    pub fn delete(&self, collection: &str, id: &str) -> Result<bool, StorageError> {
        let changes = self.conn()?.execute(
            "DELETE FROM documents WHERE collection = ?1 AND doc_id = ?2",
            params![collection, id],
        )?;
        if changes > 0 {
            debug!(event = "document_delete", collection, id);
            self.publish(collection);
        }
        Ok(changes > 0)
    }

    /// Subscribes to a collection. The listener receives the current
    /// documents immediately and again after every write to the collection.
    pub fn watch<F>(&self, collection: &str, listener: F) -> Result<Subscription, StorageError>
    where
        F: Fn(&[StoredDocument]) + Send + Sync + 'static,
    {
        let watchers = {
            let mut table = self.watchers.lock().map_err(|_| StorageError::LockPoisoned)?;
            table.entry(collection.to_string()).or_default().clone()
        };
        let listener: Arc<dyn Fn(&[StoredDocument]) + Send + Sync> = Arc::new(listener);
        let subscription = watchers.add(listener.clone());
        let snapshot = self.list(collection)?;
        listener(&snapshot);
        Ok(subscription)
    }

    pub fn watcher_count(&self, collection: &str) -> usize {
        self.watchers
            .lock()
            .ok()
            .and_then(|table| table.get(collection).map(|watchers| watchers.len()))
            .unwrap_or(0)
    }

    fn publish(&self, collection: &str) {
        let watchers = match self.watchers.lock() {
            Ok(table) => table.get(collection).cloned(),
            Err(_) => None,
        };
        let Some(watchers) = watchers.filter(|watchers| !watchers.is_empty()) else {
            return;
        };
        match self.list(collection) {
            Ok(snapshot) => watchers.notify(&snapshot),
            Err(err) => warn!(event = "publish_error", collection, error = %err),
        }
    }

    #[cfg(test)]
    pub(crate) fn break_schema_for_tests(&self) {
        self.conn()
            .expect("conn")
            .execute_batch("DROP TABLE documents")
            .expect("drop table");
    }
}

fn get_locked(
    conn: &Connection,
    collection: &str,
    id: &str,
) -> Result<Option<StoredDocument>, StorageError> {
    let row = conn
        .query_row(
            "
            SELECT body_json, created_at, updated_at
            FROM documents
            WHERE collection = ?1 AND doc_id = ?2
            ",
            params![collection, id],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            },
        )
        .optional()?;

    row.map(|(body_json, created_at, updated_at)| {
        decode_row(id.to_string(), &body_json, &created_at, &updated_at)
    })
    .transpose()
}

fn decode_row(
    id: String,
    body_json: &str,
    created_at: &str,
    updated_at: &str,
) -> Result<StoredDocument, StorageError> {
    let fields: Fields = serde_json::from_str(body_json)
        .map_err(|err| StorageError::Serialization(err.to_string()))?;
    Ok(StoredDocument {
        id,
        fields,
        created_at: parse_timestamp(created_at)?,
        updated_at: parse_timestamp(updated_at)?,
    })
}

fn encode_fields(fields: &Fields) -> Result<String, StorageError> {
    serde_json::to_string(fields).map_err(|err| StorageError::Serialization(err.to_string()))
}

fn strip_reserved(mut fields: Fields) -> Fields {
    for key in RESERVED_KEYS {
        fields.remove(key);
    }
    fields
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    fn fields(value: Value) -> Fields {
        match value {
            Value::Object(map) => map,
            other => panic!("expected object, got {other}"),
        }
    }

    #[test]
    fn migration_sets_schema_version() {
        let store = DocumentStore::open_in_memory().expect("open");
        assert_eq!(
            store.schema_version().expect("version"),
            DOCUMENTS_SCHEMA_VERSION
        );
        store.migrate().expect("re-run migrate");
    }

    #[test]
    fn insert_assigns_id_and_ignores_caller_timestamps() {
        let store = DocumentStore::open_in_memory().expect("open");
        let doc = store
            .insert(
                "orders",
                fields(json!({"id": "forged", "createdAt": "1999", "price": 12})),
            )
            .expect("insert");

        assert_ne!(doc.id, "forged");
        assert!(!doc.fields.contains_key("createdAt"));
        assert_eq!(doc.created_at, doc.updated_at);

        let json = doc.to_json();
        assert_eq!(json["price"], 12);
        assert_eq!(json["id"], Value::String(doc.id.clone()));
        assert!(json["createdAt"].is_string());
    }

    #[test]
    fn update_merges_and_bumps_updated_at() {
        let store = DocumentStore::open_in_memory().expect("open");
        let doc = store
            .insert("clients", fields(json!({"name": "Ana", "status": "New"})))
            .expect("insert");

        let updated = store
            .update_fields("clients", &doc.id, fields(json!({"status": "Done"})))
            .expect("update")
            .expect("exists");
        assert_eq!(updated.fields["name"], "Ana");
        assert_eq!(updated.fields["status"], "Done");
        assert!(updated.updated_at >= doc.updated_at);
        assert_eq!(updated.created_at, doc.created_at);

        assert!(store
            .update_fields("clients", "missing", Fields::new())
            .expect("update")
            .is_none());
    }

    #[test]
    fn collections_are_isolated_and_ordered() {
        let store = DocumentStore::open_in_memory().expect("open");
        let first = store.insert("orders", fields(json!({"n": 1}))).expect("insert");
        store.insert("deposits", fields(json!({"n": 2}))).expect("insert");
        let third = store.insert("orders", fields(json!({"n": 3}))).expect("insert");

        let orders = store.list("orders").expect("list");
        let ids: Vec<&str> = orders.iter().map(|doc| doc.id.as_str()).collect();
        assert_eq!(ids, [first.id.as_str(), third.id.as_str()]);
        assert_eq!(store.count("deposits").expect("count"), 1);

        assert!(store.delete("orders", &first.id).expect("delete"));
        assert!(!store.delete("orders", &first.id).expect("delete again"));
        assert_eq!(store.count("orders").expect("count"), 1);
    }

    #[test]
    fn watchers_receive_snapshot_on_subscribe_and_each_write() {
        let store = DocumentStore::open_in_memory().expect("open");
        let deliveries = Arc::new(AtomicUsize::new(0));
        let last_len = Arc::new(AtomicUsize::new(usize::MAX));

        let (d, l) = (deliveries.clone(), last_len.clone());
        let subscription = store
            .watch("clients", move |docs| {
                d.fetch_add(1, Ordering::SeqCst);
                l.store(docs.len(), Ordering::SeqCst);
            })
            .expect("watch");
        assert_eq!(deliveries.load(Ordering::SeqCst), 1);
        assert_eq!(last_len.load(Ordering::SeqCst), 0);

        store.insert("clients", fields(json!({"name": "Ana"}))).expect("insert");
        store.insert("orders", fields(json!({"n": 1}))).expect("other collection");
        assert_eq!(deliveries.load(Ordering::SeqCst), 2);
        assert_eq!(last_len.load(Ordering::SeqCst), 1);
        assert_eq!(store.watcher_count("clients"), 1);

        drop(subscription);
        store.insert("clients", fields(json!({"name": "Bo"}))).expect("insert");
        assert_eq!(deliveries.load(Ordering::SeqCst), 2);
        assert_eq!(store.watcher_count("clients"), 0);
    }

    #[test]
    fn file_backed_store_persists_across_reopen() {
        let dir = TempDir::new().expect("temp dir");
        let path = dir.path().join("nested/desk.sqlite3");
        let id = {
            let store = DocumentStore::open(&path).expect("open");
            store
                .insert("clients", fields(json!({"name": "Ana"})))
                .expect("insert")
                .id
        };
        let store = DocumentStore::open(&path).expect("reopen");
        let doc = store.get("clients", &id).expect("get").expect("exists");
        assert_eq!(doc.fields["name"], "Ana");
    }
}
