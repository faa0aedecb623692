//! SQLite-backed durable document store.
//!
//! Access lists and content are stored as JSON text columns. Access filtering
//! for listings uses SQLite's built-in `json_each`.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, params};
use serde_json::Value;

use crate::document::{DocumentAttribute, DocumentSnapshot, DocumentSummary, NewDocument};
use crate::error::{StoreError, StoreResult};
use crate::store::DocumentStore;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS documents (
    id TEXT PRIMARY KEY,
    author TEXT NOT NULL,
    title TEXT NOT NULL DEFAULT '',
    read_access TEXT NOT NULL DEFAULT '[]',
    write_access TEXT NOT NULL DEFAULT '[]',
    data TEXT NOT NULL DEFAULT 'null',
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_documents_author ON documents(author);
"#;

/// Raw column values of a `documents` row, decoded outside the row closure
/// so JSON errors surface as [`StoreError::Serialization`].
type DocumentRow = (String, String, String, String, String, String);

/// SQLite-backed document store.
///
/// The connection is wrapped in a `Mutex`; SQLite itself runs in serialized
/// threading mode.
pub struct SqliteDocumentStore {
    conn: Mutex<Connection>,
}

impl SqliteDocumentStore {
    /// Open or create a document database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> StoreResult<Self> {
        let conn = Connection::open(path.as_ref())?;
        // The auth tables may live in the same file behind another connection
        conn.busy_timeout(Duration::from_secs(5))?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        log::debug!("Opened document store at {:?}", path.as_ref());
        Ok(store)
    }

    /// Create an in-memory database for testing.
    pub fn in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> StoreResult<()> {
        self.conn()?.execute_batch(SCHEMA)?;
        Ok(())
    }

    fn conn(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Unavailable("document store connection poisoned".to_string()))
    }
}

impl DocumentStore for SqliteDocumentStore {
    fn find_one(&self, id: &str) -> StoreResult<Option<DocumentSnapshot>> {
        let row: Option<DocumentRow> = self
            .conn()?
            .query_row(
                "SELECT id, author, title, read_access, write_access, data
                 FROM documents WHERE id = ?",
                [id],
                |row| {
                    Ok((
                        row.get(0)?,
                        row.get(1)?,
                        row.get(2)?,
                        row.get(3)?,
                        row.get(4)?,
                        row.get(5)?,
                    ))
                },
            )
            .optional()?;

        row.map(decode_row).transpose()
    }

    fn insert(&self, document: NewDocument) -> StoreResult<String> {
        let id = uuid::Uuid::new_v4().to_string();
        let snapshot = document.into_snapshot(id.clone());
        let now = Utc::now().timestamp();

        self.conn()?.execute(
            "INSERT INTO documents (id, author, title, read_access, write_access, data, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                snapshot.id,
                snapshot.author,
                snapshot.title,
                serde_json::to_string(&snapshot.read_access)?,
                serde_json::to_string(&snapshot.write_access)?,
                serde_json::to_string(&snapshot.data)?,
                now,
                now
            ],
        )?;

        Ok(id)
    }

    fn update_content(&self, id: &str, data: &Value) -> StoreResult<bool> {
        let encoded = serde_json::to_string(data)?;
        let now = Utc::now().timestamp();
        let updated = self.conn()?.execute(
            "UPDATE documents SET data = ?, updated_at = ? WHERE id = ?",
            params![encoded, now, id],
        )?;
        Ok(updated > 0)
    }

    fn update_attribute(&self, id: &str, attribute: &DocumentAttribute) -> StoreResult<bool> {
        let now = Utc::now().timestamp();
        let conn = self.conn()?;
        let updated = match attribute {
            DocumentAttribute::Title(title) => conn.execute(
                "UPDATE documents SET title = ?, updated_at = ? WHERE id = ?",
                params![title, now, id],
            )?,
            DocumentAttribute::Access {
                read_access,
                write_access,
            } => conn.execute(
                "UPDATE documents SET read_access = ?, write_access = ?, updated_at = ? WHERE id = ?",
                params![
                    serde_json::to_string(read_access)?,
                    serde_json::to_string(write_access)?,
                    now,
                    id
                ],
            )?,
        };
        Ok(updated > 0)
    }

    fn delete(&self, id: &str) -> StoreResult<bool> {
        let deleted = self.conn()?.execute("DELETE FROM documents WHERE id = ?", [id])?;
        Ok(deleted > 0)
    }

    fn find_accessible(
        &self,
        identity: &str,
        title_query: Option<&str>,
    ) -> StoreResult<Vec<DocumentSummary>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, title FROM documents
             WHERE (author = ?1
                    OR EXISTS (SELECT 1 FROM json_each(documents.read_access) WHERE value = ?1)
                    OR EXISTS (SELECT 1 FROM json_each(documents.write_access) WHERE value = ?1))
               AND (?2 IS NULL OR instr(lower(title), lower(?2)) > 0)
             ORDER BY title, id",
        )?;

        let documents = stmt
            .query_map(params![identity, title_query], |row| {
                Ok(DocumentSummary {
                    id: row.get(0)?,
                    title: row.get(1)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(documents)
    }
}

fn decode_row(row: DocumentRow) -> StoreResult<DocumentSnapshot> {
    let (id, author, title, read_access, write_access, data) = row;
    Ok(DocumentSnapshot {
        id,
        author,
        title,
        read_access: serde_json::from_str::<BTreeSet<String>>(&read_access)?,
        write_access: serde_json::from_str::<BTreeSet<String>>(&write_access)?,
        data: serde_json::from_str(&data)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn new_doc(author: &str, title: &str) -> NewDocument {
        NewDocument {
            author: author.to_string(),
            title: title.to_string(),
            data: json!({"ops": [{"insert": "hello"}]}),
            ..Default::default()
        }
    }

    #[test]
    fn test_round_trip_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("docs.db");

        let id = {
            let store = SqliteDocumentStore::open(&path).unwrap();
            store.insert(new_doc("alice@example.com", "Plan")).unwrap()
        };

        let store = SqliteDocumentStore::open(&path).unwrap();
        let doc = store.find_one(&id).unwrap().unwrap();
        assert_eq!(doc.author, "alice@example.com");
        assert_eq!(doc.data, json!({"ops": [{"insert": "hello"}]}));
        assert!(doc.can_write("alice@example.com"));
    }

    #[test]
    fn test_update_content_replaces_wholesale() {
        let store = SqliteDocumentStore::in_memory().unwrap();
        let id = store.insert(new_doc("alice@example.com", "Plan")).unwrap();
        let data = json!({"ops": [{"insert": "x"}]});

        assert!(store.update_content(&id, &data).unwrap());
        assert!(store.update_content(&id, &data).unwrap());
        assert_eq!(store.find_one(&id).unwrap().unwrap().data, data);
        assert!(!store.update_content("missing", &data).unwrap());
    }

    #[test]
    fn test_update_attributes() {
        let store = SqliteDocumentStore::in_memory().unwrap();
        let id = store.insert(new_doc("alice@example.com", "Plan")).unwrap();

        store
            .update_attribute(&id, &DocumentAttribute::Title("Renamed".to_string()))
            .unwrap();
        store
            .update_attribute(
                &id,
                &DocumentAttribute::Access {
                    read_access: BTreeSet::from(["bob@example.com".to_string()]),
                    write_access: BTreeSet::new(),
                },
            )
            .unwrap();

        let doc = store.find_one(&id).unwrap().unwrap();
        assert_eq!(doc.title, "Renamed");
        assert!(doc.can_read("bob@example.com"));
        assert!(!doc.can_write("bob@example.com"));
    }

    #[test]
    fn test_find_accessible() {
        let store = SqliteDocumentStore::in_memory().unwrap();
        store.insert(new_doc("alice@example.com", "Roadmap")).unwrap();
        let shared = store.insert(new_doc("bob@example.com", "Road trip")).unwrap();
        store.insert(new_doc("bob@example.com", "Private")).unwrap();
        store
            .update_attribute(
                &shared,
                &DocumentAttribute::Access {
                    read_access: BTreeSet::new(),
                    write_access: BTreeSet::from(["alice@example.com".to_string()]),
                },
            )
            .unwrap();

        let all = store.find_accessible("alice@example.com", None).unwrap();
        let titles: Vec<_> = all.iter().map(|d| d.title.as_str()).collect();
        assert_eq!(titles, vec!["Road trip", "Roadmap"]);

        let trips = store.find_accessible("alice@example.com", Some("TRIP")).unwrap();
        assert_eq!(trips.len(), 1);
        assert_eq!(trips[0].id, shared);
    }

    #[test]
    fn test_delete() {
        let store = SqliteDocumentStore::in_memory().unwrap();
        let id = store.insert(new_doc("alice@example.com", "Plan")).unwrap();

        assert!(store.delete(&id).unwrap());
        assert!(store.find_one(&id).unwrap().is_none());
        assert!(!store.delete(&id).unwrap());
    }
}
