//! Completion Parser
//!
//! Reads one free-text completion and pulls out the two delimited
//! segments the prompt asks for:
//!
//! ```text
//! {{{Technical Explanation: <explanation>}}}
//! /** <sql> **/
//! ```

use super::{Candidate, Explanation, GeneratedSql};
use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref EXPLANATION_SEGMENT: Regex =
        Regex::new(r"(?s)\{\{\{\s*(?:Technical Explanation:)?(.*?)\}\}\}").expect("explanation pattern is valid");
    static ref SQL_SEGMENT: Regex = Regex::new(r"(?s)/\*\*(.*?)\*\*/").expect("sql pattern is valid");
}

/// Outcome of parsing a single completion
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedCompletion {
    /// A usable SQL segment was found
    Parsed {
        sql: String,
        explanation: Option<String>,
    },
    /// No SQL segment, an empty one, or the model declined with `Invalid SQL`
    Malformed { explanation: Option<String> },
}

pub fn parse_completion(text: &str) -> ParsedCompletion {
    let explanation = EXPLANATION_SEGMENT
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|e| !e.is_empty());

    let sql = SQL_SEGMENT
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| GeneratedSql::from_text(m.as_str()));

    match sql {
        Some(GeneratedSql::Sql(sql)) => ParsedCompletion::Parsed { sql, explanation },
        _ => ParsedCompletion::Malformed { explanation },
    }
}

impl From<ParsedCompletion> for Candidate {
    fn from(parsed: ParsedCompletion) -> Self {
        let (sql, explanation) = match parsed {
            ParsedCompletion::Parsed { sql, explanation } => (GeneratedSql::Sql(sql), explanation),
            ParsedCompletion::Malformed { explanation } => (GeneratedSql::Invalid, explanation),
        };
        let explanation = explanation.map(Explanation::Text).unwrap_or(Explanation::NotFound);
        Candidate::new(sql, explanation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_well_formed_completion() {
        let text = "{{{Technical Explanation: Count heads older than 56.}}}\n/** SELECT COUNT(*) FROM head WHERE age > 56; **/";
        assert_eq!(
            parse_completion(text),
            ParsedCompletion::Parsed {
                sql: "SELECT COUNT(*) FROM head WHERE age > 56;".to_string(),
                explanation: Some("Count heads older than 56.".to_string()),
            }
        );
    }

    #[test]
    fn test_multiline_sql_segment() {
        let text = "/**\nSELECT name\nFROM head\n**/";
        match parse_completion(text) {
            ParsedCompletion::Parsed { sql, explanation } => {
                assert_eq!(sql, "SELECT name\nFROM head");
                assert_eq!(explanation, None);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_missing_sql_is_malformed() {
        let text = "{{{Technical Explanation: I could not find the table.}}}";
        assert_eq!(
            parse_completion(text),
            ParsedCompletion::Malformed {
                explanation: Some("I could not find the table.".to_string())
            }
        );
    }

    #[test]
    fn test_declined_translation_is_malformed() {
        assert_eq!(
            parse_completion("/** Invalid SQL **/"),
            ParsedCompletion::Malformed { explanation: None }
        );
        assert_eq!(parse_completion("Invalid SQL"), ParsedCompletion::Malformed { explanation: None });
        assert_eq!(parse_completion("/**   **/"), ParsedCompletion::Malformed { explanation: None });
    }

    #[test]
    fn test_candidate_conversion_uses_sentinels_only_for_rendering() {
        let candidate: Candidate = parse_completion("no delimiters at all").into();
        assert!(candidate.sql().is_invalid());
        assert_eq!(candidate.explanation(), &Explanation::NotFound);
        assert_eq!(candidate.sql().render(), "Invalid SQL");
        assert_eq!(candidate.explanation().render(), "Technical explanation not found");
    }
}
