//! Evaluation dataset loading (CSV, JSON array, JSON Lines)

use crate::error::{EvalError, Result};
use crate::schema_context::ContextValue;
use serde_json::Value;
use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;
use tracing::info;

pub const REQUIRED_COLUMNS: [&str; 4] = ["db_id", "question", "query", "context"];

/// One question to evaluate
#[derive(Debug, Clone, PartialEq)]
pub struct DatasetRow {
    pub db_id: String,
    pub question: String,
    /// Golden SQL
    pub query: String,
    pub context: ContextValue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatasetFormat {
    Csv,
    Json,
    JsonLines,
}

impl DatasetFormat {
    /// Picks the format from the file extension; anything unrecognized is CSV
    pub fn from_path(path: &Path) -> Self {
        match path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_lowercase())
            .as_deref()
        {
            Some("json") => DatasetFormat::Json,
            Some("jsonl") | Some("ndjson") => DatasetFormat::JsonLines,
            _ => DatasetFormat::Csv,
        }
    }
}

pub fn load_dataset(path: &Path) -> Result<Vec<DatasetRow>> {
    let file = File::open(path)
        .map_err(|e| EvalError::Dataset(format!("Failed to open {}: {}", path.display(), e)))?;
    let format = DatasetFormat::from_path(path);
    let rows = match format {
        DatasetFormat::Csv => read_csv(file)?,
        DatasetFormat::Json => read_json(file)?,
        DatasetFormat::JsonLines => read_json_lines(BufReader::new(file))?,
    };
    info!("Loaded {} row(s) from {} ({:?})", rows.len(), path.display(), format);
    Ok(rows)
}

pub fn read_csv(reader: impl Read) -> Result<Vec<DatasetRow>> {
    let mut rdr = csv::ReaderBuilder::new().flexible(true).from_reader(reader);
    let headers = rdr
        .headers()
        .map_err(|e| EvalError::Dataset(format!("Failed to read CSV headers: {}", e)))?
        .iter()
        .map(|s| s.trim().to_string())
        .collect::<Vec<_>>();

    let mut positions = [0usize; 4];
    for (slot, column) in positions.iter_mut().zip(REQUIRED_COLUMNS) {
        *slot = headers
            .iter()
            .position(|header| header == column)
            .ok_or_else(|| missing_column(column, None))?;
    }
    let [db_id, question, query, context] = positions;

    let mut rows = Vec::new();
    for (i, rec) in rdr.records().enumerate() {
        let rec = rec.map_err(|e| EvalError::Dataset(format!("Failed to read CSV row {}: {}", i, e)))?;
        let field = |idx: usize| rec.get(idx).unwrap_or_default().to_string();
        rows.push(DatasetRow {
            db_id: field(db_id).trim().to_string(),
            question: field(question),
            query: field(query),
            context: ContextValue::Text(field(context)),
        });
    }
    Ok(rows)
}

pub fn read_json(reader: impl Read) -> Result<Vec<DatasetRow>> {
    let value: Value = serde_json::from_reader(reader)
        .map_err(|e| EvalError::Dataset(format!("Invalid JSON dataset: {}", e)))?;
    let items = match value {
        Value::Array(items) => items,
        _ => return Err(EvalError::Dataset("JSON dataset must be an array of objects".to_string())),
    };
    items
        .into_iter()
        .enumerate()
        .map(|(i, item)| row_from_json(i, item))
        .collect()
}

pub fn read_json_lines(reader: impl BufRead) -> Result<Vec<DatasetRow>> {
    let mut rows = Vec::new();
    for (i, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let item: Value = serde_json::from_str(&line)
            .map_err(|e| EvalError::Dataset(format!("Invalid JSON on line {}: {}", i + 1, e)))?;
        rows.push(row_from_json(rows.len(), item)?);
    }
    Ok(rows)
}

fn row_from_json(index: usize, item: Value) -> Result<DatasetRow> {
    let mut object = match item {
        Value::Object(object) => object,
        other => {
            return Err(EvalError::Dataset(format!(
                "Row {} is not an object: {}",
                index, other
            )))
        }
    };

    let mut text = |column: &str| -> Result<String> {
        match object.remove(column) {
            Some(Value::String(s)) => Ok(s),
            Some(Value::Null) | None => Err(missing_column(column, Some(index))),
            Some(other) => Ok(other.to_string()),
        }
    };
    let db_id = text("db_id")?.trim().to_string();
    let question = text("question")?;
    let query = text("query")?;

    let context = object
        .remove("context")
        .ok_or_else(|| missing_column("context", Some(index)))?;
    let context = serde_json::from_value(context)?;

    Ok(DatasetRow {
        db_id,
        question,
        query,
        context,
    })
}

fn missing_column(column: &str, row: Option<usize>) -> EvalError {
    match row {
        Some(row) => EvalError::Dataset(format!("Row {} is missing required column '{}'", row, column)),
        None => EvalError::Dataset(format!("Dataset is missing required column '{}'", column)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use tempfile::TempDir;

    const HEAD_DDL: &str = "CREATE TABLE head (head_ID INT, name TEXT, born_state TEXT, age REAL)";

    #[test]
    fn test_csv_with_extra_columns_and_any_order() {
        let data = format!(
            "question,extra,db_id,context,query\n\"How many heads are older than 56?\",x,dept_db,\"['{}']\",SELECT count(*) FROM head WHERE age > 56\n",
            HEAD_DDL
        );
        let rows = read_csv(Cursor::new(data)).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].db_id, "dept_db");
        assert_eq!(rows[0].query, "SELECT count(*) FROM head WHERE age > 56");
        assert_eq!(rows[0].context, ContextValue::Text(format!("['{}']", HEAD_DDL)));
    }

    #[test]
    fn test_csv_missing_column_is_named() {
        let err = read_csv(Cursor::new("db_id,question,context\ndept_db,q,ddl\n")).unwrap_err();
        match err {
            EvalError::Dataset(message) => assert!(message.contains("'query'")),
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_json_context_variants() {
        let data = format!(
            r#"[
                {{"db_id": "dept_db", "question": "q1", "query": "SELECT 1", "context": ["{ddl}"]}},
                {{"db_id": "dept_db", "question": "q2", "query": "SELECT 2", "context": "{ddl}"}},
                {{"db_id": "dept_db", "question": "q3", "query": "SELECT 3", "context": 42}}
            ]"#,
            ddl = HEAD_DDL
        );
        let rows = read_json(Cursor::new(data)).unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].context, ContextValue::Statements(vec![HEAD_DDL.to_string()]));
        assert_eq!(rows[1].context, ContextValue::Text(HEAD_DDL.to_string()));
        assert!(matches!(rows[2].context, ContextValue::Other(_)));
    }

    #[test]
    fn test_json_lines_skip_blank_lines() {
        let data = "{\"db_id\": \"a\", \"question\": \"q\", \"query\": \"SELECT 1\", \"context\": []}\n\n\
                    {\"db_id\": \"b\", \"question\": \"q\", \"query\": \"SELECT 1\", \"context\": []}\n";
        let rows = read_json_lines(Cursor::new(data)).unwrap();
        assert_eq!(rows.iter().map(|r| r.db_id.as_str()).collect::<Vec<_>>(), vec!["a", "b"]);
    }

    #[test]
    fn test_json_missing_field() {
        let err = read_json(Cursor::new(r#"[{"db_id": "a", "question": "q", "context": []}]"#)).unwrap_err();
        assert!(err.to_string().contains("'query'"));
    }

    #[test]
    fn test_load_by_extension() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("dev.jsonl");
        std::fs::write(
            &path,
            "{\"db_id\": \"a\", \"question\": \"q\", \"query\": \"SELECT 1\", \"context\": \"\"}\n",
        )
        .unwrap();
        assert_eq!(DatasetFormat::from_path(&path), DatasetFormat::JsonLines);
        assert_eq!(load_dataset(&path).unwrap().len(), 1);
        assert!(load_dataset(&dir.path().join("missing.csv")).is_err());
    }
}
