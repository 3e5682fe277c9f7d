//! Batch Evaluation Pipeline
//!
//! For every dataset row: locate the reference database, extract the
//! schema context, generate candidates, select one, compare it with the
//! golden SQL and record the outcome. Row failures become verdicts or
//! flags on the record; only a missing database drops the row.

pub mod dataset;
pub mod report;

pub use dataset::{load_dataset, DatasetFormat, DatasetRow};
pub use report::{
    BatchReport, CsvReportSink, EvaluationRecord, JsonReportSink, ReportSink, ReportSummary, SkippedRow,
};

use crate::candidate::CandidateGenerator;
use crate::config::EvalConfig;
use crate::db::{DatabaseLocator, SqlExecutor, SqliteDatabase};
use crate::equivalence::QueryEquivalenceChecker;
use crate::error::Result;
use crate::llm::CompletionService;
use crate::schema_context::{SchemaContext, SchemaContextExtractor};
use crate::selection::{CandidateSelector, SelectionResult};
use chrono::Utc;
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, info_span, warn, Instrument};

/// Cooperative cancellation for a batch run. Rows already in flight finish;
/// rows not yet started are counted as cancelled.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

enum RowOutcome {
    Recorded(EvaluationRecord),
    Skipped(SkippedRow),
}

/// Everything a worker needs to evaluate one row
struct RowEvaluator {
    extractor: SchemaContextExtractor,
    generator: CandidateGenerator,
    selector: CandidateSelector,
    checker: QueryEquivalenceChecker,
    locator: DatabaseLocator,
    candidate_count: usize,
    query_timeout: Duration,
}

impl RowEvaluator {
    async fn evaluate_row(&self, row_index: usize, row: DatasetRow) -> RowOutcome {
        let skip = |reason: String| {
            warn!("Skipping row {} ({}): {}", row_index, row.db_id, reason);
            RowOutcome::Skipped(SkippedRow {
                row_index,
                db_id: row.db_id.clone(),
                reason,
            })
        };

        let path = match self.locator.locate(&row.db_id) {
            Some(path) => path,
            None => {
                let expected = self
                    .locator
                    .path_for(&row.db_id)
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|| "<invalid db_id>".to_string());
                return skip(format!("database not found at {}", expected));
            }
        };
        let database = match SqliteDatabase::open_read_only(&path, self.query_timeout) {
            Ok(database) => database,
            Err(e) => return skip(e.to_string()),
        };

        let schema = self.extractor.extract(&row.context);
        debug!("Schema has {} table(s)", schema.table_mappings().len());

        let candidates = self
            .generator
            .generate(&row.question, &schema, self.candidate_count)
            .await;

        let selection = self.selector.select(&candidates, Some(&database)).await;
        debug!("Selected candidate {} ({})", selection.index, selection.flag);

        let verdict = self.checker.compare(&database, &row.query, &selection.sql).await;
        info!("{}", verdict);

        RowOutcome::Recorded(EvaluationRecord {
            row_index,
            db_id: row.db_id,
            question: row.question,
            golden_sql: row.query,
            generated_sql: selection.sql,
            verdict,
            explanation: selection.explanation,
            selection_flag: selection.flag,
        })
    }
}

pub struct EvaluationPipeline {
    evaluator: Arc<RowEvaluator>,
    max_workers: usize,
    cancel: CancelFlag,
}

impl EvaluationPipeline {
    pub fn new(service: Arc<dyn CompletionService>, config: &EvalConfig) -> Result<Self> {
        config.validate()?;
        let generator = CandidateGenerator::new(
            service,
            Arc::new(config.throttle()),
            config.generator_settings(),
        );

        Ok(Self {
            evaluator: Arc::new(RowEvaluator {
                extractor: SchemaContextExtractor::new(),
                generator,
                selector: CandidateSelector::default(),
                checker: QueryEquivalenceChecker::new(config.row_order),
                locator: config.locator(),
                candidate_count: config.candidate_count,
                query_timeout: config.query_timeout(),
            }),
            max_workers: config.max_workers,
            cancel: CancelFlag::new(),
        })
    }

    /// Handle that stops the run from another task
    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    pub async fn evaluate_file(&self, dataset: &Path) -> Result<BatchReport> {
        let rows = load_dataset(dataset)?;
        Ok(self.evaluate(rows).await)
    }

    /// Evaluate every row. Records come back in input order regardless of
    /// which worker finished first.
    pub async fn evaluate(&self, rows: Vec<DatasetRow>) -> BatchReport {
        let mut report = BatchReport::new(Utc::now());
        let total = rows.len();
        info!(
            "Starting run {} over {} row(s) with {} worker(s)",
            report.run_id, total, self.max_workers
        );

        let workers = Arc::new(Semaphore::new(self.max_workers.max(1)));
        let mut tasks = JoinSet::new();
        let mut started = BTreeSet::new();
        let mut db_ids = Vec::with_capacity(total);

        for (row_index, row) in rows.into_iter().enumerate() {
            db_ids.push(row.db_id.clone());
            let permit = match Arc::clone(&workers).acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => break,
            };
            if self.cancel.is_cancelled() {
                report.cancelled_rows = total - row_index;
                warn!("Run cancelled, {} row(s) not started", report.cancelled_rows);
                break;
            }

            let evaluator = Arc::clone(&self.evaluator);
            let span = info_span!("row", index = row_index, db_id = %row.db_id);
            started.insert(row_index);
            tasks.spawn(
                async move {
                    let _permit = permit;
                    (row_index, evaluator.evaluate_row(row_index, row).await)
                }
                .instrument(span),
            );
        }

        let mut outcomes = Vec::with_capacity(started.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((row_index, outcome)) => {
                    started.remove(&row_index);
                    outcomes.push((row_index, outcome));
                }
                Err(e) => error!("Row worker failed: {}", e),
            }
        }
        // Anything still in `started` lost its worker
        for row_index in started {
            outcomes.push((
                row_index,
                RowOutcome::Skipped(SkippedRow {
                    row_index,
                    db_id: db_ids[row_index].clone(),
                    reason: "worker task failed".to_string(),
                }),
            ));
        }

        outcomes.sort_by_key(|(row_index, _)| *row_index);
        for (_, outcome) in outcomes {
            match outcome {
                RowOutcome::Recorded(record) => report.records.push(record),
                RowOutcome::Skipped(skipped) => report.skipped.push(skipped),
            }
        }

        report.finished_at = Utc::now();
        let summary = report.summary();
        info!(
            "Run {} finished: {}/{} matched, {} skipped, {} cancelled",
            report.run_id, summary.matches, summary.evaluated, summary.skipped, summary.cancelled
        );
        report
    }

    /// Translate one question outside a batch. Execution-guided when a
    /// database is given, consensus otherwise.
    pub async fn translate(
        &self,
        question: &str,
        schema: &SchemaContext,
        database: Option<&dyn SqlExecutor>,
    ) -> SelectionResult {
        let evaluator = &self.evaluator;
        let candidates = evaluator
            .generator
            .generate(question, schema, evaluator.candidate_count)
            .await;
        evaluator.selector.select(&candidates, database).await
    }
}
