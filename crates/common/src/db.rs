//! SQLite access to the backing store of the application under test

use crate::types::{Row, SqlValue};
use crate::Result;
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Parameterized access to a relational store.
///
/// The harness only ever issues parameterized statements through this trait;
/// it never builds SQL from values.
pub trait BackingStore: Send + Sync {
    /// Run a statement and return the number of affected rows
    fn execute(&self, sql: &str, params: &[SqlValue]) -> Result<usize>;

    /// Run a query and collect every row
    fn query(&self, sql: &str, params: &[SqlValue]) -> Result<Vec<Row>>;
}

/// Database wrapper shared by all workers
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open or create database at path
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path.as_ref())?;

        // Enable WAL mode for better concurrency
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };

        db.init_schema()?;

        info!("Opened database at {:?}", path.as_ref());
        Ok(db)
    }

    /// Open in-memory database (for testing)
    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.init_schema()?;
        Ok(db)
    }

    /// Initialize the task schema used by the application under test
    fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock();

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS task (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                title TEXT NOT NULL,
                description TEXT,
                due_date TEXT,
                completed INTEGER NOT NULL DEFAULT 0
            );
            CREATE INDEX IF NOT EXISTS idx_task_title ON task(title);
            "#,
        )?;

        Ok(())
    }
}

impl BackingStore for Database {
    fn execute(&self, sql: &str, params: &[SqlValue]) -> Result<usize> {
        let conn = self.conn.lock();
        let affected = conn.execute(sql, params_from_iter(params.iter().map(to_value)))?;
        debug!(affected, "execute: {}", sql);
        Ok(affected)
    }

    fn query(&self, sql: &str, params: &[SqlValue]) -> Result<Vec<Row>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(sql)?;
        let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
        let width = columns.len();

        let raw = stmt
            .query_map(params_from_iter(params.iter().map(to_value)), |row| {
                (0..width)
                    .map(|i| row.get::<_, Value>(i))
                    .collect::<rusqlite::Result<Vec<_>>>()
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        debug!(rows = raw.len(), "query: {}", sql);

        Ok(raw
            .into_iter()
            .map(|values| Row::new(columns.clone(), values.into_iter().map(from_value).collect()))
            .collect())
    }
}

/// Store connection that is opened on first use.
///
/// Every worker shares one instance; the first caller opens the connection
/// while concurrent callers block on the same initialization.
pub struct LazyDatabase {
    path: PathBuf,
    cell: OnceCell<Database>,
}

impl LazyDatabase {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            cell: OnceCell::new(),
        }
    }

    /// Get the connection, opening it if this is the first call
    pub fn get(&self) -> Result<&Database> {
        self.cell.get_or_try_init(|| Database::open(&self.path))
    }

    pub fn is_connected(&self) -> bool {
        self.cell.get().is_some()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl BackingStore for LazyDatabase {
    fn execute(&self, sql: &str, params: &[SqlValue]) -> Result<usize> {
        self.get()?.execute(sql, params)
    }

    fn query(&self, sql: &str, params: &[SqlValue]) -> Result<Vec<Row>> {
        self.get()?.query(sql, params)
    }
}

fn to_value(value: &SqlValue) -> Value {
    match value {
        SqlValue::Null => Value::Null,
        SqlValue::Integer(i) => Value::Integer(*i),
        SqlValue::Real(f) => Value::Real(*f),
        SqlValue::Text(s) => Value::Text(s.clone()),
    }
}

fn from_value(value: Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Integer(i) => SqlValue::Integer(i),
        Value::Real(f) => SqlValue::Real(f),
        Value::Text(s) => SqlValue::Text(s),
        Value::Blob(b) => SqlValue::Text(String::from_utf8_lossy(&b).into_owned()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_execute_and_query() {
        let db = Database::open_memory().unwrap();

        let inserted = db
            .execute(
                "INSERT INTO task (title, description, due_date, completed) VALUES (?1, ?2, ?3, ?4)",
                &["Test Task A".into(), "Test Description A".into(), "2024-07-15".into(), false.into()],
            )
            .unwrap();
        assert_eq!(inserted, 1);

        let rows = db
            .query("SELECT title, due_date, completed FROM task WHERE title = ?1", &["Test Task A".into()])
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get_str("due_date"), Some("2024-07-15"));
        assert_eq!(rows[0].get_bool("completed"), Some(false));
    }

    #[test]
    fn test_returning_clause_yields_id() {
        let db = Database::open_memory().unwrap();
        let rows = db
            .query(
                "INSERT INTO task (title, completed) VALUES (?1, ?2) RETURNING id",
                &["Test Task B".into(), true.into()],
            )
            .unwrap();
        assert_eq!(rows[0].get_i64("id"), Some(1));
    }

    #[test]
    fn test_delete_nothing_is_zero_rows() {
        let db = Database::open_memory().unwrap();
        let affected = db
            .execute("DELETE FROM task WHERE title LIKE ?1", &["Nothing%".into()])
            .unwrap();
        assert_eq!(affected, 0);
    }

    #[test]
    fn test_lazy_database_opens_once() {
        let dir = tempfile::tempdir().unwrap();
        let lazy = Arc::new(LazyDatabase::new(dir.path().join("store.db")));
        assert!(!lazy.is_connected());

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let lazy = lazy.clone();
                std::thread::spawn(move || lazy.get().unwrap().conn.clone())
            })
            .collect();

        let conns: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        for conn in &conns[1..] {
            assert!(Arc::ptr_eq(&conns[0], conn));
        }
        assert!(lazy.is_connected());
    }
}
