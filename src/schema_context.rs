//! Schema Context Extraction
//!
//! Turns the raw `context` value of a dataset row (a list of CREATE TABLE
//! statements, a serialized list, or a single blob of DDL) into table and
//! column mappings that the prompt builder can render.

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, warn};

lazy_static! {
    static ref CREATE_TABLE: Regex = Regex::new(
        r#"(?is)CREATE\s+(?:TEMP(?:ORARY)?\s+)?TABLE\s*(?:IF\s+NOT\s+EXISTS\s+)?["`\[]?(\w+)["`\]]?\s*\("#
    )
    .expect("CREATE TABLE pattern is valid");
}

/// Leading words of a clause that declare a table constraint rather than a column
const CONSTRAINT_KEYWORDS: &[&str] = &["PRIMARY", "FOREIGN", "UNIQUE", "CHECK", "CONSTRAINT"];

/// Raw schema context as it arrives from a dataset row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ContextValue {
    /// Already a sequence of table-definition statements
    Statements(Vec<String>),
    /// A single string: either a serialized sequence or one blob of DDL
    Text(String),
    /// Anything else (numbers, objects, null...)
    Other(serde_json::Value),
}

impl From<&str> for ContextValue {
    fn from(text: &str) -> Self {
        ContextValue::Text(text.to_string())
    }
}

/// Table and column names available to the generator for one row.
///
/// `table_mappings` is an identity map (name -> name, case preserved) and
/// every table in `column_mappings` is also present in `table_mappings`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SchemaContext {
    table_mappings: HashMap<String, String>,
    column_mappings: HashMap<String, Vec<String>>,
    /// Tables in the order they were first declared
    declaration_order: Vec<String>,
}

impl SchemaContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a table and its columns. Redeclaring a table replaces its
    /// columns but keeps its original position.
    pub fn insert_table(&mut self, name: impl Into<String>, columns: Vec<String>) {
        let name = name.into();
        if !self.table_mappings.contains_key(&name) {
            self.declaration_order.push(name.clone());
        }
        self.table_mappings.insert(name.clone(), name.clone());
        self.column_mappings.insert(name, columns);
    }

    pub fn table_mappings(&self) -> &HashMap<String, String> {
        &self.table_mappings
    }

    pub fn column_mappings(&self) -> &HashMap<String, Vec<String>> {
        &self.column_mappings
    }

    /// Tables with their columns, in declaration order
    pub fn tables(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.declaration_order.iter().map(move |name| {
            let columns = self
                .column_mappings
                .get(name)
                .map(|c| c.as_slice())
                .unwrap_or(&[]);
            (name.as_str(), columns)
        })
    }

    pub fn columns(&self, table: &str) -> Option<&[String]> {
        self.column_mappings.get(table).map(|c| c.as_slice())
    }

    /// True when `table` exists and declares every one of `columns`
    pub fn has_columns(&self, table: &str, columns: &[&str]) -> bool {
        match self.columns(table) {
            Some(declared) => columns
                .iter()
                .all(|wanted| declared.iter().any(|c| c == wanted)),
            None => false,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.table_mappings.is_empty()
    }

    /// Human-readable listing used inside the generation prompt
    pub fn describe(&self) -> String {
        let mut description = String::from("Available Tables and Columns:\n");
        for (table, columns) in self.tables() {
            description.push_str(&format!("Table '{}': {}\n", table, render_list(columns)));
        }
        description
    }

    /// Compact `{'table': ['col', ...]}` rendering used by the worked examples
    pub fn render_mapping(&self) -> String {
        let entries: Vec<String> = self
            .tables()
            .map(|(table, columns)| format!("'{}': {}", table, render_list(columns)))
            .collect();
        format!("{{{}}}", entries.join(", "))
    }
}

fn render_list(items: &[String]) -> String {
    let quoted: Vec<String> = items.iter().map(|item| format!("'{}'", item)).collect();
    format!("[{}]", quoted.join(", "))
}

/// Extracts structured schema information from raw context values
pub struct SchemaContextExtractor;

impl Default for SchemaContextExtractor {
    fn default() -> Self {
        SchemaContextExtractor
    }
}

impl SchemaContextExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a [`SchemaContext`] from a raw context value.
    ///
    /// Never fails: unsupported values produce an empty context and a
    /// warning, malformed statements are skipped.
    pub fn extract(&self, context: &ContextValue) -> SchemaContext {
        let statements = match context {
            ContextValue::Statements(statements) => statements.clone(),
            ContextValue::Text(text) => split_serialized_statements(text),
            ContextValue::Other(value) => {
                warn!("Unexpected schema context type: {}", json_kind(value));
                return SchemaContext::new();
            }
        };

        let mut schema = SchemaContext::new();
        for statement in &statements {
            for (table, columns) in parse_create_tables(statement) {
                schema.insert_table(table, columns);
            }
        }

        debug!(
            "Extracted {} table(s) from {} statement(s)",
            schema.table_mappings().len(),
            statements.len()
        );
        schema
    }
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

/// Interpret a string as a serialized list of statements, or as one statement
fn split_serialized_statements(text: &str) -> Vec<String> {
    let trimmed = text.trim();
    if trimmed.starts_with('[') {
        if let Ok(statements) = serde_json::from_str::<Vec<String>>(trimmed) {
            return statements;
        }
        if let Some(statements) = parse_quoted_list(trimmed) {
            return statements;
        }
    }
    vec![text.to_string()]
}

/// Parses a list literal of single- or double-quoted strings such as
/// `['CREATE TABLE a (x)', "CREATE TABLE b (y)"]`.
fn parse_quoted_list(text: &str) -> Option<Vec<String>> {
    let mut chars = text.chars().peekable();
    if chars.next()? != '[' {
        return None;
    }

    let mut items = Vec::new();
    loop {
        while chars.peek().is_some_and(|c| c.is_whitespace()) {
            chars.next();
        }
        match chars.next()? {
            ']' => break,
            quote @ ('\'' | '"') => {
                let mut item = String::new();
                loop {
                    match chars.next()? {
                        '\\' => match chars.next()? {
                            'n' => item.push('\n'),
                            't' => item.push('\t'),
                            other => item.push(other),
                        },
                        c if c == quote => break,
                        c => item.push(c),
                    }
                }
                items.push(item);

                while chars.peek().is_some_and(|c| c.is_whitespace()) {
                    chars.next();
                }
                match chars.next()? {
                    ',' => continue,
                    ']' => break,
                    _ => return None,
                }
            }
            _ => return None,
        }
    }

    if chars.any(|c| !c.is_whitespace()) {
        return None;
    }
    Some(items)
}

/// Finds every CREATE TABLE in `statement` and returns (table, columns)
/// pairs in order. Definitions whose body never closes are skipped.
fn parse_create_tables(statement: &str) -> Vec<(String, Vec<String>)> {
    let mut tables = Vec::new();
    let mut search_from = 0;

    while let Some(captures) = CREATE_TABLE.captures_at(statement, search_from) {
        let (Some(whole), Some(name)) = (captures.get(0), captures.get(1)) else {
            break;
        };
        let body_start = whole.end();
        match find_closing_paren(&statement[body_start..]) {
            Some(body_len) => {
                let body = &statement[body_start..body_start + body_len];
                tables.push((name.as_str().to_string(), column_names(body)));
                search_from = body_start + body_len + 1;
            }
            None => {
                debug!("Skipping unterminated definition of table '{}'", name.as_str());
                search_from = body_start;
            }
        }
    }

    tables
}

/// Byte length of the text before the `)` that closes an already-open paren
fn find_closing_paren(text: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut quote: Option<char> = None;

    for (idx, c) in text.char_indices() {
        if let Some(open) = quote {
            if c == open {
                quote = None;
            }
            continue;
        }
        match c {
            '\'' | '"' | '`' => quote = Some(c),
            '[' => quote = Some(']'),
            '(' => depth += 1,
            ')' if depth == 0 => return Some(idx),
            ')' => depth -= 1,
            _ => {}
        }
    }
    None
}

/// Splits a column-definition list on top-level commas
fn split_clauses(body: &str) -> Vec<&str> {
    let mut clauses = Vec::new();
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut start = 0;

    for (idx, c) in body.char_indices() {
        if let Some(open) = quote {
            if c == open {
                quote = None;
            }
            continue;
        }
        match c {
            '\'' | '"' | '`' => quote = Some(c),
            '[' => quote = Some(']'),
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                clauses.push(&body[start..idx]);
                start = idx + 1;
            }
            _ => {}
        }
    }
    clauses.push(&body[start..]);
    clauses
}

fn column_names(body: &str) -> Vec<String> {
    split_clauses(body)
        .into_iter()
        .filter_map(|clause| column_name(clause.trim()))
        .collect()
}

/// Column name of one clause: its first token with quoting removed
fn column_name(clause: &str) -> Option<String> {
    let first = clause.chars().next()?;
    let token = match first {
        '"' | '`' | '[' => {
            let close = if first == '[' { ']' } else { first };
            let rest = &clause[first.len_utf8()..];
            let end = rest.find(close).unwrap_or(rest.len());
            return Some(rest[..end].to_string()).filter(|name| !name.is_empty());
        }
        _ => clause
            .split(|c: char| c.is_whitespace() || c == '(')
            .next()
            .unwrap_or_default(),
    };

    if CONSTRAINT_KEYWORDS
        .iter()
        .any(|keyword| token.eq_ignore_ascii_case(keyword))
    {
        return None;
    }

    let name: String = token.chars().filter(|c| !matches!(c, '"' | '`')).collect();
    if name.is_empty() {
        None
    } else {
        Some(name)
    }
}
