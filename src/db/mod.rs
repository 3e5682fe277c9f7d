//! Reference database access
//!
//! The selector and the equivalence checker only need "run this SQL and
//! give me the table back", which is what [`SqlExecutor`] provides.

pub mod locator;
pub mod sqlite;

pub use locator::DatabaseLocator;
pub use sqlite::SqliteDatabase;

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Executes SQL against one reference database
#[async_trait]
pub trait SqlExecutor: Send + Sync {
    /// Run `sql` and return its full result set. Statements that do not
    /// produce a result set are errors.
    async fn query(&self, sql: &str) -> Result<ResultTable>;
}

/// A single result cell as stored by the database
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CellValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl CellValue {
    /// String form used when comparing result sets, already trimmed.
    ///
    /// Integral reals keep a trailing `.0` so `2.0` and `2` stay distinct.
    pub fn to_comparable(&self) -> String {
        let text = match self {
            CellValue::Null => "None".to_string(),
            CellValue::Integer(i) => i.to_string(),
            CellValue::Real(r) => {
                if r.is_finite() && r.fract() == 0.0 && r.abs() < 1e16 {
                    format!("{:.1}", r)
                } else if r.is_nan() {
                    "nan".to_string()
                } else if r.is_infinite() {
                    (if *r > 0.0 { "inf" } else { "-inf" }).to_string()
                } else {
                    r.to_string()
                }
            }
            CellValue::Text(s) => s.clone(),
            CellValue::Blob(bytes) => String::from_utf8_lossy(bytes).into_owned(),
        };
        text.trim().to_string()
    }
}

impl From<rusqlite::types::ValueRef<'_>> for CellValue {
    fn from(value: rusqlite::types::ValueRef<'_>) -> Self {
        use rusqlite::types::ValueRef;
        match value {
            ValueRef::Null => CellValue::Null,
            ValueRef::Integer(i) => CellValue::Integer(i),
            ValueRef::Real(r) => CellValue::Real(r),
            ValueRef::Text(bytes) => CellValue::Text(String::from_utf8_lossy(bytes).into_owned()),
            ValueRef::Blob(bytes) => CellValue::Blob(bytes.to_vec()),
        }
    }
}

/// Column names plus rows, in the order the database returned them
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultTable {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<CellValue>>,
}

impl ResultTable {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<CellValue>>) -> Self {
        Self { columns, rows }
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }
}
