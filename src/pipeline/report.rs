//! Evaluation report and its sinks

use crate::candidate::{Explanation, GeneratedSql};
use crate::equivalence::ComparisonVerdict;
use crate::error::Result;
use crate::selection::SelectionFlag;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use tracing::info;
use uuid::Uuid;

/// Column order of the tabular report
pub const REPORT_COLUMNS: [&str; 7] = [
    "db_id",
    "question",
    "golden_sql",
    "generated_sql",
    "comparison",
    "technical_translation",
    "selection_flag",
];

/// Outcome for one dataset row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationRecord {
    /// Position of the row in the input dataset
    pub row_index: usize,
    pub db_id: String,
    pub question: String,
    pub golden_sql: String,
    pub generated_sql: GeneratedSql,
    pub verdict: ComparisonVerdict,
    pub explanation: Explanation,
    pub selection_flag: SelectionFlag,
}

impl EvaluationRecord {
    fn csv_fields(&self) -> [String; 7] {
        [
            self.db_id.clone(),
            self.question.clone(),
            self.golden_sql.clone(),
            self.generated_sql.render().to_string(),
            self.verdict.to_string(),
            self.explanation.render().to_string(),
            self.selection_flag.to_string(),
        ]
    }
}

/// A row that produced no record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkippedRow {
    pub row_index: usize,
    pub db_id: String,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Ordered by `row_index`
    pub records: Vec<EvaluationRecord>,
    pub skipped: Vec<SkippedRow>,
    /// Rows never started because the run was cancelled
    pub cancelled_rows: usize,
}

impl BatchReport {
    pub fn new(started_at: DateTime<Utc>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at,
            finished_at: started_at,
            records: Vec::new(),
            skipped: Vec::new(),
            cancelled_rows: 0,
        }
    }

    pub fn summary(&self) -> ReportSummary {
        let mut by_verdict = BTreeMap::new();
        let mut by_flag = BTreeMap::new();
        for record in &self.records {
            *by_verdict.entry(record.verdict.category().to_string()).or_insert(0) += 1;
            *by_flag.entry(record.selection_flag.to_string()).or_insert(0) += 1;
        }

        let evaluated = self.records.len();
        let matches = self.records.iter().filter(|r| r.verdict.is_match()).count();
        ReportSummary {
            total_rows: evaluated + self.skipped.len() + self.cancelled_rows,
            evaluated,
            matches,
            skipped: self.skipped.len(),
            cancelled: self.cancelled_rows,
            accuracy: if evaluated == 0 {
                0.0
            } else {
                matches as f64 / evaluated as f64
            },
            by_verdict,
            by_flag,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportSummary {
    pub total_rows: usize,
    pub evaluated: usize,
    pub matches: usize,
    pub skipped: usize,
    pub cancelled: usize,
    /// Matches over evaluated rows
    pub accuracy: f64,
    pub by_verdict: BTreeMap<String, usize>,
    pub by_flag: BTreeMap<String, usize>,
}

impl fmt::Display for ReportSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Rows:      {}", self.total_rows)?;
        writeln!(f, "Evaluated: {}", self.evaluated)?;
        writeln!(f, "Matches:   {}", self.matches)?;
        writeln!(f, "Skipped:   {}", self.skipped)?;
        if self.cancelled > 0 {
            writeln!(f, "Cancelled: {}", self.cancelled)?;
        }
        writeln!(f, "Accuracy:  {:.2}%", self.accuracy * 100.0)?;
        for (verdict, count) in &self.by_verdict {
            writeln!(f, "  {:<24} {}", verdict, count)?;
        }
        for (flag, count) in &self.by_flag {
            writeln!(f, "  {:<24} {}", flag, count)?;
        }
        Ok(())
    }
}

/// Destination for a finished report
pub trait ReportSink {
    fn write(&self, report: &BatchReport) -> Result<()>;
}

/// Writes the tabular report with a header row
pub fn write_csv<W: Write>(report: &BatchReport, writer: W) -> Result<()> {
    let mut wtr = csv::Writer::from_writer(writer);
    wtr.write_record(REPORT_COLUMNS)?;
    for record in &report.records {
        wtr.write_record(record.csv_fields())?;
    }
    wtr.flush()?;
    Ok(())
}

pub struct CsvReportSink {
    path: PathBuf,
}

impl CsvReportSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl ReportSink for CsvReportSink {
    fn write(&self, report: &BatchReport) -> Result<()> {
        let file = File::create(&self.path)?;
        write_csv(report, BufWriter::new(file))?;
        info!("Wrote {} record(s) to {}", report.records.len(), self.path.display());
        Ok(())
    }
}

/// Full report, including skipped rows and run metadata, as JSON
pub struct JsonReportSink {
    path: PathBuf,
}

impl JsonReportSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl ReportSink for JsonReportSink {
    fn write(&self, report: &BatchReport) -> Result<()> {
        let mut writer = BufWriter::new(File::create(&self.path)?);
        serde_json::to_writer_pretty(&mut writer, report)?;
        writer.flush()?;
        info!("Wrote report {} to {}", report.run_id, self.path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::equivalence::MismatchReason;
    use tempfile::TempDir;

    fn record(row_index: usize, verdict: ComparisonVerdict, flag: SelectionFlag) -> EvaluationRecord {
        EvaluationRecord {
            row_index,
            db_id: "dept_db".to_string(),
            question: "How many heads of the departments are older than 56?".to_string(),
            golden_sql: "SELECT count(*) FROM head WHERE age > 56".to_string(),
            generated_sql: GeneratedSql::Sql("SELECT count(*) FROM head WHERE age > 56".to_string()),
            verdict,
            explanation: Explanation::Text("Counts heads, older than 56".to_string()),
            selection_flag: flag,
        }
    }

    fn report() -> BatchReport {
        let mut report = BatchReport::new(Utc::now());
        report.records = vec![
            record(0, ComparisonVerdict::Match, SelectionFlag::ExecGuided),
            record(
                1,
                ComparisonVerdict::Mismatch(MismatchReason::DifferentResults),
                SelectionFlag::Consensus,
            ),
            EvaluationRecord {
                generated_sql: GeneratedSql::Invalid,
                explanation: Explanation::GenerationFailed,
                ..record(
                    3,
                    ComparisonVerdict::Mismatch(MismatchReason::InvalidGeneratedSql),
                    SelectionFlag::Divergent,
                )
            },
        ];
        report.skipped.push(SkippedRow {
            row_index: 2,
            db_id: "missing_db".to_string(),
            reason: "database not found".to_string(),
        });
        report
    }

    #[test]
    fn test_summary_counts() {
        let summary = report().summary();
        assert_eq!(summary.total_rows, 4);
        assert_eq!(summary.evaluated, 3);
        assert_eq!(summary.matches, 1);
        assert_eq!(summary.skipped, 1);
        assert!((summary.accuracy - 1.0 / 3.0).abs() < 1e-9);
        assert_eq!(summary.by_verdict.get("DifferentResults"), Some(&1));
        assert_eq!(summary.by_flag.get("EXEC_GUIDED"), Some(&1));
        assert!(summary.to_string().contains("Accuracy:  33.33%"));
    }

    #[test]
    fn test_empty_report_accuracy() {
        let summary = BatchReport::new(Utc::now()).summary();
        assert_eq!(summary.total_rows, 0);
        assert_eq!(summary.accuracy, 0.0);
    }

    #[test]
    fn test_csv_layout() {
        let mut buffer = Vec::new();
        write_csv(&report(), &mut buffer).unwrap();

        let mut rdr = csv::Reader::from_reader(buffer.as_slice());
        let headers: Vec<String> = rdr.headers().unwrap().iter().map(String::from).collect();
        assert_eq!(headers, REPORT_COLUMNS);

        let rows: Vec<csv::StringRecord> = rdr.records().map(|r| r.unwrap()).collect();
        assert_eq!(rows.len(), 3);
        assert_eq!(&rows[0][4], "Match");
        assert_eq!(&rows[0][5], "Counts heads, older than 56");
        assert_eq!(&rows[1][4], "Mismatch (Different Results)");
        assert_eq!(&rows[2][3], "Invalid SQL");
        assert_eq!(&rows[2][5], "Query generation failed");
        assert_eq!(&rows[2][6], "DIVERGENT");
    }

    #[test]
    fn test_json_sink_round_trips_run_metadata() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("report.json");
        let report = report();
        JsonReportSink::new(&path).write(&report).unwrap();

        let parsed: BatchReport = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(parsed.run_id, report.run_id);
        assert_eq!(parsed.records, report.records);
        assert_eq!(parsed.skipped, report.skipped);
    }

    #[test]
    fn test_csv_sink_writes_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out.csv");
        CsvReportSink::new(&path).write(&report()).unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.starts_with(
            "db_id,question,golden_sql,generated_sql,comparison,technical_translation,selection_flag"
        ));
    }
}
