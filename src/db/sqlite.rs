//! Embedded document store on SQLite.
//!
//! Documents are JSON bodies keyed by `(collection, id)` with a global update
//! sequence. Views are materialized lazily: each query first re-emits rows for
//! documents written since the view's last indexed sequence.

use rusqlite::types::ToSql;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::{Map, Value};
use tracing::debug;
use uuid::Uuid;

use super::views::{is_design_id, split_index, DesignDocument, IndexDefinition};
use super::{BulkAck, DocMeta, DocRow, Store, ViewKey, ViewQuery, ViewRow};
use crate::config::StoreConfig;
use crate::error::StoreError;

pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    pub fn open(config: &StoreConfig) -> Result<Self, StoreError> {
        if let Some(dir) = config.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)?;
        }
        let conn = Connection::open(&config.path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
        conn.busy_timeout(config.busy_timeout)?;
        Self::with_connection(conn)
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, StoreError> {
        init_schema(&conn)?;
        Ok(SqliteStore { conn })
    }

    fn require_collection(&self, name: &str) -> Result<(), StoreError> {
        if self.collection_exists(name)? {
            Ok(())
        } else {
            Err(StoreError::UnknownCollection(name.to_string()))
        }
    }

    fn load_view(&self, db: &str, index: &str) -> Result<IndexDefinition, StoreError> {
        let (design_id, view) = split_index(index)?;
        let design = match self.get_document(db, &design_id) {
            Ok(doc) => DesignDocument::from_value(doc)?,
            Err(StoreError::NotFound(_)) => return Err(StoreError::UnknownIndex(index.to_string())),
            Err(e) => return Err(e),
        };
        design
            .views
            .get(view)
            .cloned()
            .ok_or_else(|| StoreError::UnknownIndex(index.to_string()))
    }

    /// Bring a view's rows up to date with the document table.
    fn refresh_view(&self, db: &str, index: &str, def: &IndexDefinition) -> Result<(), StoreError> {
        let signature = def.signature();
        let state: Option<(String, i64)> = self
            .conn
            .query_row(
                "SELECT signature, indexed_seq FROM view_state WHERE collection = ?1 AND view = ?2",
                params![db, index],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .optional()?;

        let tx = self.conn.unchecked_transaction()?;
        let since = match state {
            Some((sig, seq)) if sig == signature => seq,
            _ => {
                tx.execute(
                    "DELETE FROM view_rows WHERE collection = ?1 AND view = ?2",
                    params![db, index],
                )?;
                tx.execute(
                    "INSERT OR REPLACE INTO view_state (collection, view, signature, indexed_seq)
                     VALUES (?1, ?2, ?3, 0)",
                    params![db, index, signature],
                )?;
                0
            }
        };

        let mut last_seq = since;
        let mut emitted = 0usize;
        {
            let mut select = tx.prepare(
                "SELECT seq, id, body FROM documents
                 WHERE collection = ?1 AND seq > ?2 ORDER BY seq",
            )?;
            let mut clear = tx.prepare(
                "DELETE FROM view_rows WHERE collection = ?1 AND view = ?2 AND doc_id = ?3",
            )?;
            let mut put = tx.prepare(
                "INSERT INTO view_rows (collection, view, sort_key, key, doc_id, value)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;

            let mut rows = select.query(params![db, since])?;
            while let Some(row) = rows.next()? {
                let seq: i64 = row.get(0)?;
                let id: String = row.get(1)?;
                let body: String = row.get(2)?;
                last_seq = seq;

                clear.execute(params![db, index, id])?;
                if is_design_id(&id) {
                    continue;
                }
                let doc: Value = serde_json::from_str(&body)?;
                if let Some((key, value)) = def.emit(&doc) {
                    put.execute(params![
                        db,
                        index,
                        key.encode(),
                        key.to_json(),
                        id,
                        serde_json::to_string(&value)?,
                    ])?;
                    emitted += 1;
                }
            }
        }

        if last_seq != since {
            tx.execute(
                "UPDATE view_state SET indexed_seq = ?3 WHERE collection = ?1 AND view = ?2",
                params![db, index, last_seq],
            )?;
            debug!("View {} indexed up to seq {} ({} rows emitted)", index, last_seq, emitted);
        }
        tx.commit()?;
        Ok(())
    }
}

impl Store for SqliteStore {
    fn ping(&self) -> Result<(), StoreError> {
        self.conn.query_row("SELECT 1", [], |r| r.get::<_, i64>(0))?;
        Ok(())
    }

    fn collection_exists(&self, name: &str) -> Result<bool, StoreError> {
        let found = self
            .conn
            .query_row("SELECT 1 FROM collections WHERE name = ?1", [name], |r| {
                r.get::<_, i64>(0)
            })
            .optional()?;
        Ok(found.is_some())
    }

    fn create_collection(&self, name: &str) -> Result<(), StoreError> {
        self.conn
            .execute("INSERT OR IGNORE INTO collections (name) VALUES (?1)", [name])?;
        Ok(())
    }

    fn bulk_insert(&self, db: &str, docs: &[Value]) -> Result<BulkAck, StoreError> {
        self.require_collection(db)?;
        let tx = self.conn.unchecked_transaction()?;
        let mut ack = BulkAck {
            docs: Vec::with_capacity(docs.len()),
        };
        for doc in docs {
            ack.docs.push(put_document(&tx, db, doc)?);
        }
        tx.commit()?;
        Ok(ack)
    }

    fn insert(&self, db: &str, doc: &Value) -> Result<DocMeta, StoreError> {
        self.require_collection(db)?;
        let tx = self.conn.unchecked_transaction()?;
        let meta = put_document(&tx, db, doc)?;
        tx.commit()?;
        Ok(meta)
    }

    fn get_document(&self, db: &str, id: &str) -> Result<Value, StoreError> {
        self.require_collection(db)?;
        let body: Option<String> = self
            .conn
            .query_row(
                "SELECT body FROM documents WHERE collection = ?1 AND id = ?2",
                params![db, id],
                |r| r.get(0),
            )
            .optional()?;
        match body {
            Some(b) => Ok(serde_json::from_str(&b)?),
            None => Err(StoreError::NotFound(id.to_string())),
        }
    }

    fn list_documents(
        &self,
        db: &str,
        startkey: Option<&str>,
        count: usize,
    ) -> Result<Vec<DocRow>, StoreError> {
        self.require_collection(db)?;
        let mut stmt = self.conn.prepare(
            "SELECT id, rev FROM documents
             WHERE collection = ?1 AND id >= ?2
             ORDER BY id LIMIT ?3",
        )?;
        let rows = stmt
            .query_map(
                params![db, startkey.unwrap_or(""), sql_limit(Some(count))],
                |row| {
                    let id: String = row.get(0)?;
                    Ok(DocRow {
                        key: id.clone(),
                        id,
                        rev: row.get(1)?,
                    })
                },
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn query_index(
        &self,
        db: &str,
        index: &str,
        query: &ViewQuery,
    ) -> Result<Vec<ViewRow>, StoreError> {
        self.require_collection(db)?;
        let def = self.load_view(db, index)?;
        self.refresh_view(db, index, &def)?;

        let mut conditions = vec!["r.collection = ?1".to_string(), "r.view = ?2".to_string()];
        let mut params: Vec<Box<dyn ToSql>> = vec![Box::new(db.to_string()), Box::new(index.to_string())];

        if let Some(key) = &query.key {
            conditions.push(format!("r.sort_key = ?{}", params.len() + 1));
            params.push(Box::new(key.encode()));
        }
        if let Some(start) = &query.startkey {
            let n = params.len() + 1;
            match &query.startkey_docid {
                Some(docid) => {
                    conditions.push(format!(
                        "(r.sort_key > ?{n} OR (r.sort_key = ?{n} AND r.doc_id >= ?{}))",
                        n + 1
                    ));
                    params.push(Box::new(start.encode()));
                    params.push(Box::new(docid.clone()));
                }
                None => {
                    conditions.push(format!("r.sort_key >= ?{n}"));
                    params.push(Box::new(start.encode()));
                }
            }
        }
        if let Some(end) = &query.endkey {
            conditions.push(format!("r.sort_key < ?{}", params.len() + 1));
            params.push(Box::new(end.encode()));
        }
        let where_clause = conditions.join(" AND ");
        let limit = sql_limit(query.limit);

        let reduce = query.reduce.unwrap_or(true) && def.reduce.is_some();
        let param_refs: Vec<&dyn ToSql> = params.iter().map(|p| p.as_ref()).collect();

        if reduce && query.group {
            let sql = format!(
                "SELECT r.key, SUM(CAST(r.value AS INTEGER)) FROM view_rows r
                 WHERE {} GROUP BY r.sort_key ORDER BY r.sort_key LIMIT {}",
                where_clause, limit
            );
            let mut stmt = self.conn.prepare(&sql)?;
            let raw = stmt
                .query_map(param_refs.as_slice(), |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
                })?
                .collect::<Result<Vec<_>, _>>()?;
            return raw
                .into_iter()
                .map(|(key, total)| {
                    Ok(ViewRow {
                        key: Some(ViewKey::from_json(&key)?),
                        value: Value::from(total),
                        id: None,
                        doc: None,
                    })
                })
                .collect();
        }

        if reduce {
            let sql = format!(
                "SELECT COUNT(*), COALESCE(SUM(CAST(r.value AS INTEGER)), 0) FROM view_rows r WHERE {}",
                where_clause
            );
            let (matched, total): (i64, i64) = self
                .conn
                .query_row(&sql, param_refs.as_slice(), |r| Ok((r.get(0)?, r.get(1)?)))?;
            if matched == 0 || query.limit == Some(0) {
                return Ok(Vec::new());
            }
            return Ok(vec![ViewRow {
                key: None,
                value: Value::from(total),
                id: None,
                doc: None,
            }]);
        }

        let (doc_col, join) = if query.include_docs {
            (
                "d.body",
                "LEFT JOIN documents d ON d.collection = r.collection AND d.id = r.doc_id",
            )
        } else {
            ("NULL", "")
        };
        let sql = format!(
            "SELECT r.key, r.doc_id, r.value, {} FROM view_rows r {}
             WHERE {} ORDER BY r.sort_key, r.doc_id LIMIT {}",
            doc_col, join, where_clause, limit
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let raw = stmt
            .query_map(param_refs.as_slice(), |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, Option<String>>(3)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        raw.into_iter()
            .map(|(key, id, value, doc)| {
                Ok(ViewRow {
                    key: Some(ViewKey::from_json(&key)?),
                    value: serde_json::from_str(&value)?,
                    id: Some(id),
                    doc: doc.map(|d| serde_json::from_str(&d)).transpose()?,
                })
            })
            .collect()
    }
}

fn init_schema(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS collections (
            name       TEXT PRIMARY KEY,
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS documents (
            seq        INTEGER PRIMARY KEY AUTOINCREMENT,
            collection TEXT NOT NULL REFERENCES collections(name),
            id         TEXT NOT NULL,
            rev        TEXT NOT NULL,
            body       TEXT NOT NULL,
            UNIQUE(collection, id)
        );

        CREATE TABLE IF NOT EXISTS view_state (
            collection  TEXT NOT NULL,
            view        TEXT NOT NULL,
            signature   TEXT NOT NULL,
            indexed_seq INTEGER NOT NULL DEFAULT 0,
            PRIMARY KEY (collection, view)
        );

        CREATE TABLE IF NOT EXISTS view_rows (
            collection TEXT NOT NULL,
            view       TEXT NOT NULL,
            sort_key   BLOB NOT NULL,
            key        TEXT NOT NULL,
            doc_id     TEXT NOT NULL,
            value      TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_view_rows_key ON view_rows(collection, view, sort_key, doc_id);
        CREATE INDEX IF NOT EXISTS idx_view_rows_doc ON view_rows(collection, view, doc_id);
        ",
    )?;
    Ok(())
}

/// Create or update one document inside the caller's transaction.
fn put_document(conn: &Connection, db: &str, doc: &Value) -> Result<DocMeta, StoreError> {
    let mut body: Map<String, Value> = doc
        .as_object()
        .cloned()
        .ok_or_else(|| StoreError::InvalidDocument("document must be a JSON object".into()))?;

    let id = match body.get("_id") {
        Some(Value::String(s)) if !s.is_empty() => s.clone(),
        Some(_) => return Err(StoreError::InvalidDocument("_id must be a non-empty string".into())),
        None => Uuid::new_v4().simple().to_string(),
    };
    let given_rev = match body.remove("_rev") {
        Some(Value::String(s)) => Some(s),
        Some(_) => return Err(StoreError::InvalidDocument("_rev must be a string".into())),
        None => None,
    };

    let current: Option<String> = conn
        .query_row(
            "SELECT rev FROM documents WHERE collection = ?1 AND id = ?2",
            params![db, id],
            |r| r.get(0),
        )
        .optional()?;

    let generation = match (&current, &given_rev) {
        (None, None) => 1,
        (Some(cur), Some(given)) if cur == given => rev_generation(cur) + 1,
        (Some(cur), _) => {
            return Err(StoreError::Conflict {
                id,
                expected: Some(cur.clone()),
            })
        }
        (None, Some(_)) => return Err(StoreError::Conflict { id, expected: None }),
    };

    body.insert("_id".into(), Value::String(id.clone()));
    let digest = md5::compute(serde_json::to_string(&body)?);
    let rev = format!("{}-{:x}", generation, digest);
    body.insert("_rev".into(), Value::String(rev.clone()));
    let json = serde_json::to_string(&body)?;

    // Re-inserting moves the document to the end of the update sequence.
    if current.is_some() {
        conn.execute(
            "DELETE FROM documents WHERE collection = ?1 AND id = ?2",
            params![db, id],
        )?;
    }
    conn.execute(
        "INSERT INTO documents (collection, id, rev, body) VALUES (?1, ?2, ?3, ?4)",
        params![db, id, rev, json],
    )?;

    Ok(DocMeta { id, rev })
}

fn rev_generation(rev: &str) -> u64 {
    rev.split('-').next().and_then(|g| g.parse().ok()).unwrap_or(0)
}

fn sql_limit(limit: Option<usize>) -> i64 {
    limit.map(|n| i64::try_from(n).unwrap_or(i64::MAX)).unwrap_or(-1)
}
