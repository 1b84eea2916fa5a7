use async_trait::async_trait;
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, Connection};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::debug;

use super::{apply_find, push_at_path, CompareOp, DocumentStore, Filter, FindQuery};
use crate::error::{Result, ScraperError};

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS documents (
        id          INTEGER PRIMARY KEY AUTOINCREMENT,
        collection  TEXT NOT NULL,
        body        TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS documents_by_collection ON documents (collection, id);
"#;

/// Durable store keeping every collection in one `documents` table.
///
/// Connection access is serialised and runs on the blocking pool. Equality
/// terms on indexed paths are pushed into SQL so only candidate rows are
/// decoded; the full filter is still applied to every candidate.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
    indexed: Arc<Mutex<HashMap<String, HashSet<String>>>>,
}

impl SqliteStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        // other processes (a serving API next to a run) share the file
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self::from_connection(conn))
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self::from_connection(conn))
    }

    fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
            indexed: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// SQL equality terms of `filter` that an index declared on `collection` can serve.
    fn indexed_terms(&self, collection: &str, filter: &Filter) -> Result<Vec<(String, SqlValue)>> {
        let indexed = self
            .indexed
            .lock()
            .map_err(|_| ScraperError::Store("sqlite index registry lock poisoned".into()))?;
        let Some(paths) = indexed.get(collection) else {
            return Ok(Vec::new());
        };

        let terms: Vec<&Filter> = match filter {
            Filter::And(filters) => filters.iter().collect(),
            other => vec![other],
        };
        let mut pushed = Vec::new();
        for term in terms {
            if let Filter::Compare { path, op: CompareOp::Eq, value } = term {
                if !paths.contains(path) {
                    continue;
                }
                if let Some(bound) = scalar_param(value) {
                    pushed.push((json_path_expr(path)?, bound));
                }
            }
        }
        Ok(pushed)
    }

    async fn with_conn<F, T>(&self, op: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|_| ScraperError::Store("sqlite connection lock poisoned".into()))?;
            op(&mut guard)
        })
        .await
        .map_err(|e| ScraperError::Store(format!("sqlite task failed: {e}")))?
    }
}

/// `json_extract` expression for a dotted path; segments are restricted to
/// identifier characters because the expression is spliced into SQL.
fn json_path_expr(path: &str) -> Result<String> {
    let valid = path
        .split('.')
        .all(|segment| !segment.is_empty() && segment.chars().all(|c| c.is_ascii_alphanumeric() || c == '_'));
    if !valid {
        return Err(ScraperError::Store(format!("unsupported index path '{path}'")));
    }
    Ok(format!("json_extract(body, '$.{path}')"))
}

fn index_name(paths: &[&str]) -> String {
    let columns: Vec<String> = paths.iter().map(|p| p.replace('.', "_")).collect();
    format!("documents_by_{}", columns.join("__"))
}

fn scalar_param(value: &Value) -> Option<SqlValue> {
    match value {
        Value::String(s) => Some(SqlValue::Text(s.clone())),
        Value::Number(n) => n.as_i64().map(SqlValue::Integer).or_else(|| n.as_f64().map(SqlValue::Real)),
        _ => None,
    }
}

/// Rows of `collection` satisfying every pushed-down term, in insertion order.
fn candidate_query(collection: &str, terms: Vec<(String, SqlValue)>) -> (String, Vec<SqlValue>) {
    let mut sql = String::from("SELECT id, body FROM documents WHERE collection = ?1");
    let mut bound = vec![SqlValue::Text(collection.to_string())];
    for (expr, value) in terms {
        bound.push(value);
        sql.push_str(&format!(" AND {expr} = ?{}", bound.len()));
    }
    sql.push_str(" ORDER BY id");
    (sql, bound)
}

fn load_candidates(conn: &Connection, collection: &str, terms: Vec<(String, SqlValue)>) -> Result<Vec<(i64, Value)>> {
    let (sql, bound) = candidate_query(collection, terms);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query(params_from_iter(bound))?;
    let mut documents = Vec::new();
    while let Some(row) = rows.next()? {
        let id: i64 = row.get(0)?;
        let body: String = row.get(1)?;
        documents.push((id, serde_json::from_str(&body)?));
    }
    Ok(documents)
}

#[async_trait]
impl DocumentStore for SqliteStore {
    async fn clear(&self, collection: &str) -> Result<()> {
        let collection = collection.to_string();
        self.with_conn(move |conn| {
            conn.execute("DELETE FROM documents WHERE collection = ?1", params![collection])?;
            Ok(())
        })
        .await
    }

    async fn insert_many(&self, collection: &str, documents: Vec<Value>) -> Result<()> {
        let collection = collection.to_string();
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            {
                let mut stmt = tx.prepare("INSERT INTO documents (collection, body) VALUES (?1, ?2)")?;
                for document in &documents {
                    stmt.execute(params![collection, serde_json::to_string(document)?])?;
                }
            }
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn push_each(&self, collection: &str, filter: &Filter, array_path: &str, values: Vec<Value>) -> Result<u64> {
        let terms = self.indexed_terms(collection, filter)?;
        let collection = collection.to_string();
        let filter = filter.clone();
        let array_path = array_path.to_string();
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            let mut matched = 0;
            for (id, mut document) in load_candidates(&tx, &collection, terms)? {
                if !filter.matches(&document) {
                    continue;
                }
                push_at_path(&mut document, &array_path, &values)?;
                tx.execute(
                    "UPDATE documents SET body = ?1 WHERE id = ?2",
                    params![serde_json::to_string(&document)?, id],
                )?;
                matched += 1;
            }
            tx.commit()?;
            Ok(matched)
        })
        .await
    }

    async fn replace_collection(&self, source: &str, target: &str) -> Result<usize> {
        let source = source.to_string();
        let target = target.to_string();
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            tx.execute("DELETE FROM documents WHERE collection = ?1", params![target])?;
            let copied = tx.execute(
                "INSERT INTO documents (collection, body) \
                 SELECT ?1, body FROM documents WHERE collection = ?2 ORDER BY id",
                params![target, source],
            )?;
            tx.commit()?;
            debug!(%source, collection = %target, copied, "replaced collection");
            Ok(copied)
        })
        .await
    }

    async fn drop_collection(&self, collection: &str) -> Result<()> {
        self.clear(collection).await
    }

    async fn find(&self, collection: &str, query: &FindQuery) -> Result<Vec<Value>> {
        let terms = self.indexed_terms(collection, &query.filter)?;
        let collection = collection.to_string();
        let query = query.clone();
        self.with_conn(move |conn| {
            let documents = load_candidates(conn, &collection, terms)?;
            Ok(apply_find(documents.iter().map(|(_, doc)| doc), &query))
        })
        .await
    }

    async fn count(&self, collection: &str, filter: &Filter) -> Result<u64> {
        let terms = self.indexed_terms(collection, filter)?;
        let collection = collection.to_string();
        let filter = filter.clone();
        self.with_conn(move |conn| {
            let documents = load_candidates(conn, &collection, terms)?;
            Ok(documents.iter().filter(|(_, doc)| filter.matches(doc)).count() as u64)
        })
        .await
    }

    async fn create_index(&self, collection: &str, paths: &[&str]) -> Result<()> {
        let columns = paths.iter().map(|p| json_path_expr(p)).collect::<Result<Vec<_>>>()?;
        let name = index_name(paths);
        let sql = format!("CREATE INDEX IF NOT EXISTS {name} ON documents (collection, {})", columns.join(", "));
        self.with_conn(move |conn| {
            conn.execute_batch(&sql)?;
            Ok(())
        })
        .await?;

        self.indexed
            .lock()
            .map_err(|_| ScraperError::Store("sqlite index registry lock poisoned".into()))?
            .entry(collection.to_string())
            .or_default()
            .extend(paths.iter().map(|p| p.to_string()));
        debug!(collection, index = %index_name(paths), "declared equality index");
        Ok(())
    }
}
