use nl2sql_eval::config::{api_key_from_env, EvalConfig};
use nl2sql_eval::db::{SqlExecutor, SqliteDatabase};
use nl2sql_eval::equivalence::RowOrderPolicy;
use nl2sql_eval::llm::LlmClient;
use nl2sql_eval::pipeline::{CsvReportSink, EvaluationPipeline, JsonReportSink, ReportSink};
use nl2sql_eval::schema_context::{ContextValue, SchemaContextExtractor};
use nl2sql_eval::sql_normalizer::SqlNormalizer;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "nl2sql-eval")]
#[command(about = "Generate SQL from natural language and score it against golden queries")]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Evaluate a dataset of (db_id, question, query, context) rows
    Evaluate {
        /// Dataset file (.csv, .json or .jsonl)
        #[arg(short, long)]
        dataset: PathBuf,

        /// Where to write the report
        #[arg(short, long)]
        output: PathBuf,

        /// Directory holding <db_id>/<db_id>.sqlite databases
        #[arg(long)]
        database_root: Option<PathBuf>,

        /// JSON configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Candidates generated per question
        #[arg(long)]
        candidates: Option<usize>,

        /// Rows evaluated concurrently
        #[arg(long)]
        workers: Option<usize>,

        /// Row order policy when comparing results (strict or unordered)
        #[arg(long)]
        row_order: Option<RowOrderPolicy>,

        /// Model name (or set OPENAI_MODEL)
        #[arg(long)]
        model: Option<String>,

        /// Report format (default: from the output extension)
        #[arg(long, value_enum)]
        format: Option<ReportFormat>,
    },
    /// Translate a single question against a schema file
    Translate {
        /// The question in natural language
        #[arg(short, long)]
        question: String,

        /// File with CREATE TABLE statements (JSON list or plain DDL)
        #[arg(short, long)]
        schema: PathBuf,

        /// SQLite database for execution-guided selection
        #[arg(long)]
        database: Option<PathBuf>,

        /// JSON configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Candidates generated for the question
        #[arg(long)]
        candidates: Option<usize>,
    },
    /// Print the normalized form of a SQL statement
    Normalize {
        sql: String,
    },
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ReportFormat {
    Csv,
    Json,
}

impl ReportFormat {
    fn for_output(path: &Path) -> Self {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => ReportFormat::Json,
            _ => ReportFormat::Csv,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    match args.command {
        Commands::Evaluate {
            dataset,
            output,
            database_root,
            config,
            candidates,
            workers,
            row_order,
            model,
            format,
        } => {
            let mut config = EvalConfig::load(config.as_deref())?;
            if let Some(root) = database_root {
                config.database_root = root;
            }
            if let Some(candidates) = candidates {
                config.candidate_count = candidates;
            }
            if let Some(workers) = workers {
                config.max_workers = workers;
            }
            if let Some(row_order) = row_order {
                config.row_order = row_order;
            }
            if let Some(model) = model {
                config.model = model;
            }
            config.validate()?;

            let pipeline = build_pipeline(&config)?;
            let cancel = pipeline.cancel_flag();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("Interrupt received, finishing rows in flight");
                    cancel.cancel();
                }
            });

            info!("Evaluating {} against {}", dataset.display(), config.database_root.display());
            let report = pipeline
                .evaluate_file(&dataset)
                .await
                .with_context(|| format!("Failed to evaluate {}", dataset.display()))?;

            let format = format.unwrap_or_else(|| ReportFormat::for_output(&output));
            let sink: Box<dyn ReportSink> = match format {
                ReportFormat::Csv => Box::new(CsvReportSink::new(&output)),
                ReportFormat::Json => Box::new(JsonReportSink::new(&output)),
            };
            sink.write(&report)
                .with_context(|| format!("Failed to write report to {}", output.display()))?;

            println!("\n=== Evaluation Summary (run {}) ===", report.run_id);
            print!("{}", report.summary());
            println!("Report: {}", output.display());
        }
        Commands::Translate {
            question,
            schema,
            database,
            config,
            candidates,
        } => {
            let mut config = EvalConfig::load(config.as_deref())?;
            if let Some(candidates) = candidates {
                config.candidate_count = candidates;
            }
            config.validate()?;

            let context = read_schema_file(&schema)?;
            let schema_context = SchemaContextExtractor::new().extract(&context);
            if schema_context.is_empty() {
                warn!("No tables found in {}", schema.display());
            }

            let database = database
                .map(|path| SqliteDatabase::open_read_only(&path, config.query_timeout()))
                .transpose()?;
            let executor = database.as_ref().map(|db| db as &dyn SqlExecutor);

            let pipeline = build_pipeline(&config)?;
            let selection = pipeline.translate(&question, &schema_context, executor).await;

            println!("\n=== Translation ===");
            println!("SQL:         {}", selection.sql.render());
            println!("Explanation: {}", selection.explanation.render());
            println!("Selection:   {}", selection.flag);

            if let (Some(executor), Some(sql)) = (executor, selection.sql.as_sql()) {
                match executor.query(sql).await {
                    Ok(table) => {
                        println!("\n{}", table.columns.join(" | "));
                        for row in &table.rows {
                            let cells: Vec<String> = row.iter().map(|cell| cell.to_comparable()).collect();
                            println!("{}", cells.join(" | "));
                        }
                        println!("({} row(s))", table.row_count());
                    }
                    Err(e) => println!("\nExecution failed: {}", e),
                }
            }
        }
        Commands::Normalize { sql } => {
            println!("{}", SqlNormalizer::new().normalize(&sql));
        }
    }

    Ok(())
}

fn build_pipeline(config: &EvalConfig) -> Result<EvaluationPipeline> {
    let api_key = api_key_from_env()?;
    let client = LlmClient::new(
        api_key,
        config.model.clone(),
        config.base_url.clone(),
        config.generation_timeout(),
    )?;
    info!("Using model {}", client.model());
    Ok(EvaluationPipeline::new(Arc::new(client), config)?)
}

/// Schema files may hold a JSON list of statements or plain DDL
fn read_schema_file(path: &Path) -> Result<ContextValue> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read schema file {}", path.display()))?;
    Ok(serde_json::from_str::<Vec<String>>(&content)
        .map(ContextValue::Statements)
        .unwrap_or(ContextValue::Text(content)))
}
