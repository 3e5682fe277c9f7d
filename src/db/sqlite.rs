//! SQLite reference database
//!
//! Connections are opened read-only so candidate SQL can never modify the
//! reference data. Each query runs on the blocking pool under a timeout;
//! a query that overruns is interrupted.

use super::{CellValue, ResultTable, SqlExecutor};
use crate::error::{EvalError, Result};
use async_trait::async_trait;
use rusqlite::{Connection, InterruptHandle, OpenFlags};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, warn};

pub struct SqliteDatabase {
    conn: Arc<Mutex<Connection>>,
    interrupt: InterruptHandle,
    timeout: Duration,
}

impl SqliteDatabase {
    /// Open an existing database file read-only. The header is read up
    /// front so a file that is not a SQLite database fails here.
    pub fn open_read_only(path: impl AsRef<Path>, timeout: Duration) -> Result<Self> {
        let path = path.as_ref();
        let open_error = |e: rusqlite::Error| EvalError::Database(format!("Failed to open {}: {}", path.display(), e));
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(open_error)?;
        conn.busy_timeout(timeout)?;
        conn.query_row("SELECT count(*) FROM sqlite_master", [], |_| Ok(()))
            .map_err(open_error)?;

        debug!("Connected to {} (read-only)", path.display());
        Ok(Self::from_connection(conn, timeout))
    }

    /// Wrap an already-open connection
    pub fn from_connection(conn: Connection, timeout: Duration) -> Self {
        let interrupt = conn.get_interrupt_handle();
        Self {
            conn: Arc::new(Mutex::new(conn)),
            interrupt,
            timeout,
        }
    }
}

#[async_trait]
impl SqlExecutor for SqliteDatabase {
    async fn query(&self, sql: &str) -> Result<ResultTable> {
        let conn = Arc::clone(&self.conn);
        let sql = sql.to_string();
        let task = tokio::task::spawn_blocking(move || {
            let conn = conn
                .lock()
                .map_err(|_| EvalError::Database("Connection lock poisoned".to_string()))?;
            run_query(&conn, &sql)
        });

        match tokio::time::timeout(self.timeout, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => Err(EvalError::Execution(format!("Query task failed: {}", e))),
            Err(_) => {
                warn!("Query exceeded {:?}, interrupting", self.timeout);
                self.interrupt.interrupt();
                Err(EvalError::Timeout(self.timeout))
            }
        }
    }
}

fn run_query(conn: &Connection, sql: &str) -> Result<ResultTable> {
    let mut stmt = conn
        .prepare(sql)
        .map_err(|e| EvalError::Execution(e.to_string()))?;

    let column_count = stmt.column_count();
    if column_count == 0 {
        return Err(EvalError::Execution("Statement returns no result set".to_string()));
    }
    let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();

    let mut rows = stmt.query([]).map_err(|e| EvalError::Execution(e.to_string()))?;
    let mut table_rows = Vec::new();
    while let Some(row) = rows.next().map_err(|e| EvalError::Execution(e.to_string()))? {
        let mut cells = Vec::with_capacity(column_count);
        for idx in 0..column_count {
            cells.push(CellValue::from(row.get_ref(idx)?));
        }
        table_rows.push(cells);
    }

    Ok(ResultTable::new(columns, table_rows))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn fixture(dir: &TempDir) -> PathBuf {
        let path = dir.path().join("fixture.sqlite");
        let conn = Connection::open(&path).unwrap();
        conn.execute_batch(
            "CREATE TABLE head (head_ID INTEGER, name TEXT, age REAL);
             INSERT INTO head VALUES (1, 'Tiger Woods', 67.0), (2, 'Sergio Garcia', 68.0), (3, 'K. J. Choi', 43.0);",
        )
        .unwrap();
        path
    }

    #[tokio::test]
    async fn test_query_returns_columns_and_rows() {
        let dir = TempDir::new().unwrap();
        let db = SqliteDatabase::open_read_only(fixture(&dir), Duration::from_secs(5)).unwrap();

        let table = db.query("SELECT name, age FROM head ORDER BY head_ID").await.unwrap();
        assert_eq!(table.columns, vec!["name", "age"]);
        assert_eq!(table.row_count(), 3);
        assert_eq!(table.rows[0][0], CellValue::Text("Tiger Woods".to_string()));
        assert_eq!(table.rows[2][1], CellValue::Real(43.0));
    }

    #[tokio::test]
    async fn test_errors_and_non_queries() {
        let dir = TempDir::new().unwrap();
        let db = SqliteDatabase::open_read_only(fixture(&dir), Duration::from_secs(5)).unwrap();

        assert!(db.query("SELECT missing_column FROM head").await.is_err());
        assert!(db.query("Invalid SQL").await.is_err());
        assert!(db.query("DELETE FROM head").await.is_err());

        // Still intact: the connection is read-only
        let count = db.query("SELECT count(*) FROM head").await.unwrap();
        assert_eq!(count.rows[0][0], CellValue::Integer(3));
    }

    #[tokio::test]
    async fn test_in_memory_connection() {
        let conn = Connection::open_in_memory().unwrap();
        let db = SqliteDatabase::from_connection(conn, Duration::from_secs(5));
        let table = db.query("SELECT 1 AS one, NULL AS missing").await.unwrap();
        assert_eq!(table.columns, vec!["one", "missing"]);
        assert_eq!(table.rows, vec![vec![CellValue::Integer(1), CellValue::Null]]);
    }

    #[tokio::test]
    async fn test_runaway_query_is_interrupted() {
        let conn = Connection::open_in_memory().unwrap();
        let db = SqliteDatabase::from_connection(conn, Duration::from_millis(200));

        let err = db
            .query("WITH RECURSIVE c(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM c) SELECT count(*) FROM c")
            .await
            .unwrap_err();
        assert!(matches!(err, EvalError::Timeout(_)));

        // The interrupted statement releases the connection
        let table = db.query("SELECT 1").await.unwrap();
        assert_eq!(table.rows[0][0], CellValue::Integer(1));
    }

    #[test]
    fn test_non_sqlite_file_fails_to_open() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("notes.sqlite");
        std::fs::write(&path, "plain text, not a database\n".repeat(64)).unwrap();

        let err = SqliteDatabase::open_read_only(&path, Duration::from_secs(5)).err().unwrap();
        assert!(matches!(err, EvalError::Database(_)));
    }
}
