use crate::config::StorePaths;
use crate::document::{Document, Fields};
use anyhow::{anyhow, Context, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::sync::{Arc, Mutex};

pub(crate) const MIGRATIONS: &str = r#"
    PRAGMA journal_mode = WAL;

    CREATE TABLE IF NOT EXISTS documents (
        collection TEXT NOT NULL,
        id TEXT NOT NULL,
        fields TEXT NOT NULL,
        write_time TEXT NOT NULL,
        PRIMARY KEY (collection, id)
    );

    CREATE INDEX IF NOT EXISTS idx_documents_write_time
        ON documents(collection, write_time);

    -- Equality-query indexes. The set of (collection, field) pairs here must
    -- stay in sync with store::INDEXED_FIELDS.
    CREATE INDEX IF NOT EXISTS idx_memberships_user
        ON documents(json_extract(fields, '$.userId')) WHERE collection = 'memberships';
    CREATE INDEX IF NOT EXISTS idx_memberships_circle
        ON documents(json_extract(fields, '$.circleId')) WHERE collection = 'memberships';
    CREATE INDEX IF NOT EXISTS idx_circles_invite_code
        ON documents(json_extract(fields, '$.inviteCode')) WHERE collection = 'circles';
"#;

#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    pub fn connect(paths: &StorePaths) -> Result<Self> {
        std::fs::create_dir_all(&paths.data_dir).with_context(|| {
            format!("failed to create data directory {}", paths.data_dir.display())
        })?;
        let conn = Connection::open(&paths.db_path)?;
        Ok(Self::from_connection(conn))
    }

    pub fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
        }
    }

    pub fn ensure_migrations(&self) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute_batch(MIGRATIONS)?;
            Ok(())
        })
    }

    /// Top-level key merge into the stored document, creating it when absent.
    /// Returns the merged document as persisted.
    pub fn merge_document(
        &self,
        collection: &str,
        id: &str,
        incoming: &Fields,
        write_time: &str,
    ) -> Result<Document> {
        self.with_conn(|conn| {
            let existing: Option<String> = conn
                .query_row(
                    "SELECT fields FROM documents WHERE collection = ?1 AND id = ?2",
                    params![collection, id],
                    |row| row.get(0),
                )
                .optional()?;
            let mut fields: Fields = match existing {
                Some(raw) => serde_json::from_str(&raw)
                    .with_context(|| format!("corrupt document body {collection}/{id}"))?,
                None => Fields::new(),
            };
            for (key, value) in incoming {
                fields.insert(key.clone(), value.clone());
            }
            let raw = serde_json::to_string(&fields)?;
            conn.execute(
                r#"
                INSERT INTO documents (collection, id, fields, write_time)
                VALUES (?1, ?2, ?3, ?4)
                ON CONFLICT(collection, id) DO UPDATE SET
                    fields = excluded.fields,
                    write_time = excluded.write_time
                "#,
                params![collection, id, raw, write_time],
            )?;
            Ok(Document {
                id: id.to_string(),
                fields,
                write_time: write_time.to_string(),
            })
        })
    }

    pub fn get_document(&self, collection: &str, id: &str) -> Result<Option<Document>> {
        self.with_conn(|conn| {
            let row: Option<(String, String, String)> = conn
                .query_row(
                    "SELECT id, fields, write_time FROM documents WHERE collection = ?1 AND id = ?2",
                    params![collection, id],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
                )
                .optional()?;
            row.map(parse_row).transpose()
        })
    }

    /// Returns true when a document was actually removed.
    pub fn delete_document(&self, collection: &str, id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let affected = conn.execute(
                "DELETE FROM documents WHERE collection = ?1 AND id = ?2",
                params![collection, id],
            )?;
            Ok(affected > 0)
        })
    }

    /// Materializes a collection view: optional equality filter, ordered
    /// newest-first by the named field (falling back to write time), bounded
    /// by `limit`. Field names come from internal constants, never user input.
    pub fn list_query(
        &self,
        collection: &str,
        order_field: Option<&str>,
        limit: Option<usize>,
        filter: Option<(&str, &str)>,
    ) -> Result<Vec<Document>> {
        let order_clause = match order_field {
            Some(field) => format!("json_extract(fields, '$.{field}') DESC"),
            None => "write_time DESC".to_string(),
        };
        let filter_clause = match filter {
            Some((field, _)) => format!("AND json_extract(fields, '$.{field}') = ?2"),
            None => String::new(),
        };
        let sql = format!(
            r#"
            SELECT id, fields, write_time
            FROM documents
            WHERE collection = ?1 {filter_clause}
            ORDER BY {order_clause}
            LIMIT {}
            "#,
            limit.map(|n| n as i64).unwrap_or(-1)
        );

        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let map_row = |row: &rusqlite::Row<'_>| -> rusqlite::Result<(String, String, String)> {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?))
            };
            let mut documents = Vec::new();
            match filter {
                Some((_, value)) => {
                    let rows = stmt.query_map(params![collection, value], map_row)?;
                    for row in rows {
                        documents.push(parse_row(row?)?);
                    }
                }
                None => {
                    let rows = stmt.query_map(params![collection], map_row)?;
                    for row in rows {
                        documents.push(parse_row(row?)?);
                    }
                }
            }
            Ok(documents)
        })
    }

    fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let guard = self
            .conn
            .lock()
            .map_err(|_| anyhow!("database mutex poisoned"))?;
        f(&guard)
    }
}

fn parse_row((id, fields_raw, write_time): (String, String, String)) -> Result<Document> {
    let fields: Fields = serde_json::from_str(&fields_raw)
        .with_context(|| format!("corrupt document body for id {id}"))?;
    Ok(Document {
        id,
        fields,
        write_time,
    })
}
