//! SQL Normalizer
//!
//! Produces a canonical string for a SQL query so that candidates that only
//! differ in keyword casing, whitespace or trailing semicolons vote together.
//! The key is never executed.

use itertools::Itertools;
use sqlparser::dialect::SQLiteDialect;
use sqlparser::keywords::Keyword;
use sqlparser::parser::Parser;
use sqlparser::tokenizer::{Token, Tokenizer};
use tracing::debug;

#[derive(Debug, Default, Clone, Copy)]
pub struct SqlNormalizer;

impl SqlNormalizer {
    pub fn new() -> Self {
        Self
    }

    /// Canonical comparison key for `sql`.
    ///
    /// Falls back to the trimmed, lowercased input when the text cannot be
    /// tokenized or parsed.
    pub fn normalize(&self, sql: &str) -> String {
        match self.try_normalize(sql) {
            Ok(normalized) => normalized,
            Err(e) => {
                debug!("SQL parsing failed: {}, using lowercase fallback", e);
                sql.trim().to_lowercase()
            }
        }
    }

    fn try_normalize(&self, sql: &str) -> Result<String, String> {
        let dialect = SQLiteDialect {};
        let formatted = uppercase_keywords(&dialect, sql)?;

        let statements = Parser::parse_sql(&dialect, &formatted).map_err(|e| e.to_string())?;
        if statements.is_empty() {
            return Err("no statements".to_string());
        }

        Ok(statements.iter().map(|statement| statement.to_string()).join("; "))
    }
}

/// Uppercases unquoted keywords and collapses whitespace and comments to a
/// single space.
fn uppercase_keywords(dialect: &SQLiteDialect, sql: &str) -> Result<String, String> {
    let tokens = Tokenizer::new(dialect, sql)
        .tokenize()
        .map_err(|e| e.to_string())?;

    let mut formatted = String::with_capacity(sql.len());
    for token in tokens {
        match token {
            Token::Whitespace(_) => {
                if !formatted.is_empty() && !formatted.ends_with(' ') {
                    formatted.push(' ');
                }
            }
            Token::Word(word) if word.quote_style.is_none() && word.keyword != Keyword::NoKeyword => {
                formatted.push_str(&word.value.to_uppercase());
            }
            other => formatted.push_str(&other.to_string()),
        }
    }

    Ok(formatted.trim_end().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_casing_and_whitespace_collapse() {
        let normalizer = SqlNormalizer::new();
        let a = normalizer.normalize("SELECT count(*) FROM head WHERE age > 56");
        let b = normalizer.normalize("select COUNT(*)\n   from head\twhere age>56;");
        assert_eq!(a, b);
        assert_eq!(a, "SELECT COUNT(*) FROM head WHERE age > 56");
    }

    #[test]
    fn test_identifier_case_is_preserved() {
        let normalizer = SqlNormalizer::new();
        let a = normalizer.normalize("SELECT Singer_ID FROM singer");
        let b = normalizer.normalize("SELECT singer_id FROM singer");
        assert_ne!(a, b);
    }

    #[test]
    fn test_different_queries_stay_different() {
        let normalizer = SqlNormalizer::new();
        assert_ne!(
            normalizer.normalize("SELECT count(*) FROM head"),
            normalizer.normalize("SELECT count(*) FROM head WHERE age > 56")
        );
    }

    #[test]
    fn test_unparseable_falls_back_to_lowercase() {
        let normalizer = SqlNormalizer::new();
        assert_eq!(normalizer.normalize("  Invalid SQL  "), "invalid sql");
        assert_eq!(normalizer.normalize("SELEC * FORM t"), "selec * form t");
    }

    #[test]
    fn test_empty_input() {
        assert_eq!(SqlNormalizer::new().normalize("   "), "");
    }
}
