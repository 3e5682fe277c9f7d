//! Candidate Generation
//!
//! Asks the generation service for N independent (SQL, explanation)
//! translations of one question and turns each completion into a
//! [`Candidate`].

pub mod parser;
pub mod prompt;

use crate::error::EvalError;
use crate::llm::{CompletionRequest, CompletionService};
use crate::schema_context::SchemaContext;
use crate::throttle::RequestThrottle;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};

pub use parser::{parse_completion, ParsedCompletion};

/// Report text for a candidate without usable SQL
pub const INVALID_SQL: &str = "Invalid SQL";
/// Report text for a completion without an explanation segment
pub const EXPLANATION_NOT_FOUND: &str = "Technical explanation not found";
/// Report text for the fallback candidate when the request itself failed
pub const GENERATION_FAILED: &str = "Query generation failed";

/// SQL produced for a candidate
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GeneratedSql {
    Sql(String),
    /// The service produced nothing usable or declined to translate
    Invalid,
}

impl GeneratedSql {
    /// Classifies raw text: blank text or the decline marker is `Invalid`
    pub fn from_text(text: &str) -> Self {
        let trimmed = text.trim();
        if trimmed.is_empty() || trimmed.eq_ignore_ascii_case(INVALID_SQL) {
            GeneratedSql::Invalid
        } else {
            GeneratedSql::Sql(trimmed.to_string())
        }
    }

    pub fn as_sql(&self) -> Option<&str> {
        match self {
            GeneratedSql::Sql(sql) => Some(sql),
            GeneratedSql::Invalid => None,
        }
    }

    pub fn is_invalid(&self) -> bool {
        matches!(self, GeneratedSql::Invalid)
    }

    pub fn render(&self) -> &str {
        self.as_sql().unwrap_or(INVALID_SQL)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Explanation {
    Text(String),
    NotFound,
    /// Slot filled because the service returned fewer completions than asked
    NotReturned,
    GenerationFailed,
}

impl Explanation {
    pub fn render(&self) -> &str {
        match self {
            Explanation::Text(text) => text,
            Explanation::NotFound | Explanation::NotReturned => EXPLANATION_NOT_FOUND,
            Explanation::GenerationFailed => GENERATION_FAILED,
        }
    }
}

/// One generated translation. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    sql: GeneratedSql,
    explanation: Explanation,
}

impl Candidate {
    pub fn new(sql: GeneratedSql, explanation: Explanation) -> Self {
        Self { sql, explanation }
    }

    /// Convenience constructor for a candidate with SQL and explanation text
    pub fn with_sql(sql: impl Into<String>, explanation: impl Into<String>) -> Self {
        Self::new(
            GeneratedSql::from_text(&sql.into()),
            Explanation::Text(explanation.into()),
        )
    }

    /// The single candidate returned when the service request fails
    pub fn generation_failed() -> Self {
        Self::new(GeneratedSql::Invalid, Explanation::GenerationFailed)
    }

    /// Placeholder for a completion the service never returned
    pub fn not_returned() -> Self {
        Self::new(GeneratedSql::Invalid, Explanation::NotReturned)
    }

    /// True for placeholders added to reach the requested count. These
    /// never take part in consensus voting.
    pub fn is_padding(&self) -> bool {
        self.explanation == Explanation::NotReturned
    }

    pub fn sql(&self) -> &GeneratedSql {
        &self.sql
    }

    pub fn explanation(&self) -> &Explanation {
        &self.explanation
    }
}

/// Settings for a [`CandidateGenerator`]
#[derive(Debug, Clone)]
pub struct GeneratorSettings {
    pub max_tokens: u32,
    pub temperature: Option<f64>,
    pub timeout: Duration,
}

impl Default for GeneratorSettings {
    fn default() -> Self {
        Self {
            max_tokens: 500,
            temperature: None,
            timeout: Duration::from_secs(60),
        }
    }
}

pub struct CandidateGenerator {
    service: Arc<dyn CompletionService>,
    throttle: Arc<RequestThrottle>,
    settings: GeneratorSettings,
}

impl CandidateGenerator {
    pub fn new(
        service: Arc<dyn CompletionService>,
        throttle: Arc<RequestThrottle>,
        settings: GeneratorSettings,
    ) -> Self {
        Self {
            service,
            throttle,
            settings,
        }
    }

    pub fn build_request(&self, question: &str, schema: &SchemaContext, n: usize) -> CompletionRequest {
        CompletionRequest {
            system: prompt::system_message(schema),
            user: question.to_string(),
            max_tokens: self.settings.max_tokens,
            n,
            temperature: self.settings.temperature,
        }
    }

    /// Generate exactly `n` candidates (at least one) for `question`.
    ///
    /// If the request fails or times out, returns the single
    /// [`Candidate::generation_failed`] fallback instead of an error.
    pub async fn generate(&self, question: &str, schema: &SchemaContext, n: usize) -> Vec<Candidate> {
        let n = n.max(1);
        let request = self.build_request(question, schema, n);

        let completions = match self.request(&request).await {
            Ok(completions) => completions,
            Err(e) => {
                error!("Error generating SQL candidates: {}", e);
                return vec![Candidate::generation_failed()];
            }
        };

        if completions.len() != n {
            warn!(
                "Generation service returned {} completion(s), expected {}",
                completions.len(),
                n
            );
        }

        let mut candidates: Vec<Candidate> = completions
            .iter()
            .take(n)
            .map(|completion| Candidate::from(parse_completion(completion)))
            .collect();
        candidates.resize(n, Candidate::not_returned());

        debug!(
            "Generated {} candidate(s), {} with usable SQL",
            candidates.len(),
            candidates.iter().filter(|c| !c.sql().is_invalid()).count()
        );
        candidates
    }

    async fn request(&self, request: &CompletionRequest) -> crate::error::Result<Vec<String>> {
        let _permit = self.throttle.acquire().await?;
        match tokio::time::timeout(self.settings.timeout, self.service.complete(request)).await {
            Ok(result) => result,
            Err(_) => Err(EvalError::Timeout(self.settings.timeout)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use async_trait::async_trait;

    struct FixedService(Result<Vec<String>>);

    #[async_trait]
    impl CompletionService for FixedService {
        async fn complete(&self, _request: &CompletionRequest) -> Result<Vec<String>> {
            match &self.0 {
                Ok(completions) => Ok(completions.clone()),
                Err(e) => Err(EvalError::Llm(e.to_string())),
            }
        }
    }

    struct SlowService;

    #[async_trait]
    impl CompletionService for SlowService {
        async fn complete(&self, _request: &CompletionRequest) -> Result<Vec<String>> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(vec![])
        }
    }

    fn generator(service: impl CompletionService + 'static, timeout: Duration) -> CandidateGenerator {
        CandidateGenerator::new(
            Arc::new(service),
            Arc::new(RequestThrottle::unlimited()),
            GeneratorSettings {
                timeout,
                ..GeneratorSettings::default()
            },
        )
    }

    fn schema() -> SchemaContext {
        let mut schema = SchemaContext::new();
        schema.insert_table("head", vec!["age".to_string()]);
        schema
    }

    #[tokio::test]
    async fn test_exactly_n_candidates_with_malformed_completions() {
        let service = FixedService(Ok(vec![
            "{{{Technical Explanation: count}}}\n/** SELECT COUNT(*) FROM head **/".to_string(),
            "I am not sure".to_string(),
            "/** Invalid SQL **/".to_string(),
        ]));
        let candidates = generator(service, Duration::from_secs(5))
            .generate("How many heads?", &schema(), 3)
            .await;

        assert_eq!(candidates.len(), 3);
        assert_eq!(candidates[0].sql().as_sql(), Some("SELECT COUNT(*) FROM head"));
        assert_eq!(candidates[0].explanation().render(), "count");
        assert!(candidates[1].sql().is_invalid());
        assert!(candidates[2].sql().is_invalid());
    }

    #[tokio::test]
    async fn test_short_and_long_responses_are_fitted_to_n() {
        let one = FixedService(Ok(vec!["/** SELECT 1 **/".to_string()]));
        let candidates = generator(one, Duration::from_secs(5)).generate("q", &schema(), 3).await;
        assert_eq!(candidates.len(), 3);
        assert!(candidates[1].sql().is_invalid());
        assert!(candidates[1].is_padding());
        assert_eq!(candidates[2].explanation(), &Explanation::NotReturned);
        assert_eq!(candidates[2].explanation().render(), EXPLANATION_NOT_FOUND);
        assert!(!candidates[0].is_padding());

        let many = FixedService(Ok(vec!["/** SELECT 1 **/".to_string(); 5]));
        let candidates = generator(many, Duration::from_secs(5)).generate("q", &schema(), 2).await;
        assert_eq!(candidates.len(), 2);
    }

    #[tokio::test]
    async fn test_single_completion_wins_consensus_over_padding() {
        let one = FixedService(Ok(vec![
            "{{{Technical Explanation: count}}}\n/** SELECT count(*) FROM head WHERE age > 56 **/".to_string(),
        ]));
        let candidates = generator(one, Duration::from_secs(5)).generate("q", &schema(), 3).await;
        assert_eq!(candidates.len(), 3);

        let selected = crate::selection::CandidateSelector::default().select(&candidates, None).await;
        assert_eq!(selected.flag, crate::selection::SelectionFlag::Divergent);
        assert_eq!(selected.sql.as_sql(), Some("SELECT count(*) FROM head WHERE age > 56"));
        assert_eq!(selected.explanation.render(), "count");
    }

    #[tokio::test]
    async fn test_request_failure_yields_single_fallback() {
        let service = FixedService(Err(EvalError::Llm("connection refused".to_string())));
        let candidates = generator(service, Duration::from_secs(5)).generate("q", &schema(), 3).await;
        assert_eq!(candidates, vec![Candidate::generation_failed()]);
        assert_eq!(candidates[0].sql().render(), INVALID_SQL);
        assert_eq!(candidates[0].explanation().render(), GENERATION_FAILED);
    }

    #[tokio::test]
    async fn test_timeout_yields_single_fallback() {
        let candidates = generator(SlowService, Duration::from_millis(20))
            .generate("q", &schema(), 3)
            .await;
        assert_eq!(candidates, vec![Candidate::generation_failed()]);
    }

    #[test]
    fn test_request_contents() {
        let generator = generator(FixedService(Ok(vec![])), Duration::from_secs(1));
        let request = generator.build_request("How many heads?", &schema(), 4);
        assert_eq!(request.user, "How many heads?");
        assert_eq!(request.n, 4);
        assert_eq!(request.max_tokens, 500);
        assert!(request.system.contains("Table 'head': ['age']"));
    }

    #[test]
    fn test_generated_sql_classification() {
        assert!(GeneratedSql::from_text("  ").is_invalid());
        assert!(GeneratedSql::from_text("invalid sql").is_invalid());
        assert_eq!(GeneratedSql::from_text(" SELECT 1 ").as_sql(), Some("SELECT 1"));
    }
}
