pub mod candidate;
pub mod config;
pub mod db;
pub mod equivalence;
pub mod error;
pub mod llm;
pub mod pipeline;
pub mod schema_context;
pub mod selection;
pub mod sql_normalizer;
pub mod throttle;

pub use candidate::{Candidate, CandidateGenerator, Explanation, GeneratedSql};
pub use config::EvalConfig;
pub use equivalence::{ComparisonVerdict, MismatchReason, QueryEquivalenceChecker, RowOrderPolicy};
pub use error::{EvalError, Result};
pub use pipeline::{BatchReport, CancelFlag, EvaluationPipeline, EvaluationRecord};
pub use schema_context::{ContextValue, SchemaContext, SchemaContextExtractor};
pub use selection::{CandidateSelector, SelectionFlag, SelectionResult};
pub use sql_normalizer::SqlNormalizer;
