//! Query Equivalence Checking
//!
//! Decides whether generated SQL answers the question the same way as the
//! golden SQL by executing both on the reference database and comparing
//! the result tables. Column names are ignored; columns are matched by
//! position and every cell is compared in its trimmed string form.

use crate::candidate::GeneratedSql;
use crate::db::{ResultTable, SqlExecutor};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "reason", content = "detail")]
pub enum MismatchReason {
    InvalidGeneratedSql,
    GoldenExecutionError,
    GeneratedExecutionError,
    ColumnCountMismatch,
    DifferentResults,
    ComparisonError(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "verdict", content = "mismatch")]
pub enum ComparisonVerdict {
    Match,
    Mismatch(MismatchReason),
}

impl ComparisonVerdict {
    pub fn is_match(&self) -> bool {
        matches!(self, ComparisonVerdict::Match)
    }

    /// Short category name, used for grouping in summaries
    pub fn category(&self) -> &'static str {
        match self {
            ComparisonVerdict::Match => "Match",
            ComparisonVerdict::Mismatch(reason) => match reason {
                MismatchReason::InvalidGeneratedSql => "InvalidGeneratedSQL",
                MismatchReason::GoldenExecutionError => "GoldenExecutionError",
                MismatchReason::GeneratedExecutionError => "GeneratedExecutionError",
                MismatchReason::ColumnCountMismatch => "ColumnCountMismatch",
                MismatchReason::DifferentResults => "DifferentResults",
                MismatchReason::ComparisonError(_) => "ComparisonError",
            },
        }
    }
}

impl fmt::Display for ComparisonVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ComparisonVerdict::Match => write!(f, "Match"),
            ComparisonVerdict::Mismatch(MismatchReason::InvalidGeneratedSql) => {
                write!(f, "Mismatch (Invalid Generated SQL)")
            }
            ComparisonVerdict::Mismatch(MismatchReason::GoldenExecutionError) => {
                write!(f, "Mismatch (Golden SQL Execution Error)")
            }
            ComparisonVerdict::Mismatch(MismatchReason::GeneratedExecutionError) => {
                write!(f, "Mismatch (Generated SQL Execution Error)")
            }
            ComparisonVerdict::Mismatch(MismatchReason::ColumnCountMismatch) => {
                write!(f, "Mismatch (Different number of columns)")
            }
            ComparisonVerdict::Mismatch(MismatchReason::DifferentResults) => {
                write!(f, "Mismatch (Different Results)")
            }
            ComparisonVerdict::Mismatch(MismatchReason::ComparisonError(detail)) => {
                write!(f, "Mismatch (Error: {})", detail)
            }
        }
    }
}

/// Whether row order matters when comparing result tables
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RowOrderPolicy {
    /// Rows must appear in the same order
    #[default]
    Strict,
    /// Rows are sorted before comparison
    Unordered,
}

impl FromStr for RowOrderPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "strict" | "ordered" => Ok(RowOrderPolicy::Strict),
            "unordered" | "sorted" => Ok(RowOrderPolicy::Unordered),
            other => Err(format!("unknown row order policy '{}' (expected strict or unordered)", other)),
        }
    }
}

#[derive(Debug, Default, Clone)]
pub struct QueryEquivalenceChecker {
    row_order: RowOrderPolicy,
}

impl QueryEquivalenceChecker {
    pub fn new(row_order: RowOrderPolicy) -> Self {
        Self { row_order }
    }

    pub fn row_order(&self) -> RowOrderPolicy {
        self.row_order
    }

    pub async fn compare(
        &self,
        executor: &dyn SqlExecutor,
        golden_sql: &str,
        generated: &GeneratedSql,
    ) -> ComparisonVerdict {
        let generated_sql = match generated.as_sql() {
            Some(sql) if !sql.trim().is_empty() => sql,
            _ => {
                debug!("Generated SQL is invalid or empty");
                return ComparisonVerdict::Mismatch(MismatchReason::InvalidGeneratedSql);
            }
        };

        if golden_sql.trim().is_empty() {
            warn!("Golden SQL is empty");
            return ComparisonVerdict::Mismatch(MismatchReason::GoldenExecutionError);
        }
        let golden = match executor.query(golden_sql).await {
            Ok(table) => table,
            Err(e) => {
                warn!("Golden SQL execution failed: {}", e);
                return ComparisonVerdict::Mismatch(MismatchReason::GoldenExecutionError);
            }
        };

        let generated = match executor.query(generated_sql).await {
            Ok(table) => table,
            Err(e) => {
                debug!("Generated SQL execution failed: {} (query: {})", e, generated_sql);
                return ComparisonVerdict::Mismatch(MismatchReason::GeneratedExecutionError);
            }
        };

        self.compare_tables(&golden, &generated)
    }

    /// Compares two already-executed result tables
    pub fn compare_tables(&self, golden: &ResultTable, generated: &ResultTable) -> ComparisonVerdict {
        if golden.column_count() != generated.column_count() {
            debug!(
                "Column count differs: golden {} vs generated {}",
                golden.column_count(),
                generated.column_count()
            );
            return ComparisonVerdict::Mismatch(MismatchReason::ColumnCountMismatch);
        }

        let rows = self
            .comparable_rows(golden)
            .and_then(|golden_rows| Ok((golden_rows, self.comparable_rows(generated)?)));

        match rows {
            Ok((golden_rows, generated_rows)) if golden_rows == generated_rows => ComparisonVerdict::Match,
            Ok((golden_rows, generated_rows)) => {
                debug!(
                    "Result mismatch: golden {} row(s), generated {} row(s)",
                    golden_rows.len(),
                    generated_rows.len()
                );
                ComparisonVerdict::Mismatch(MismatchReason::DifferentResults)
            }
            Err(detail) => {
                warn!("Unexpected error in comparison: {}", detail);
                ComparisonVerdict::Mismatch(MismatchReason::ComparisonError(detail))
            }
        }
    }

    fn comparable_rows(&self, table: &ResultTable) -> Result<Vec<Vec<String>>, String> {
        let width = table.column_count();
        let mut rows = Vec::with_capacity(table.row_count());
        for (idx, row) in table.rows.iter().enumerate() {
            if row.len() != width {
                return Err(format!("row {} has {} cells, expected {}", idx, row.len(), width));
            }
            rows.push(row.iter().map(|cell| cell.to_comparable()).collect::<Vec<_>>());
        }

        if self.row_order == RowOrderPolicy::Unordered {
            rows.sort();
        }
        Ok(rows)
    }
}
