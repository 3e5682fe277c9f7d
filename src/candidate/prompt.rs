//! Prompt construction for SQL candidate generation

use crate::schema_context::SchemaContext;

/// A worked example that is only shown when its table and columns exist
struct WorkedExample {
    table: &'static str,
    columns: &'static [&'static str],
    question: &'static str,
    explanation: &'static str,
    sql: &'static str,
}

const WORKED_EXAMPLES: &[WorkedExample] = &[
    WorkedExample {
        table: "head",
        columns: &["age"],
        question: "How many heads of the departments are older than 56?",
        explanation: "Count the number of department heads whose age is greater than 56 from the 'head' table.",
        sql: "SELECT COUNT(*) FROM head WHERE age > 56;",
    },
    WorkedExample {
        table: "head",
        columns: &["name", "born_state", "age"],
        question: "List the names, born states, and ages of heads sorted by age.",
        explanation: "Retrieve name, born state, and age of heads, ordered by age in ascending order.",
        sql: "SELECT name, born_state, age FROM head ORDER BY age;",
    },
    WorkedExample {
        table: "department",
        columns: &["num_employees"],
        question: "What is the average number of employees across departments?",
        explanation: "Calculate the average number of employees from the department table.",
        sql: "SELECT AVG(num_employees) FROM department;",
    },
];

/// Worked examples applicable to `schema`, rendered in the response format
pub fn few_shot_examples(schema: &SchemaContext) -> String {
    let mapping = schema.render_mapping();
    WORKED_EXAMPLES
        .iter()
        .filter(|example| schema.has_columns(example.table, example.columns))
        .map(|example| {
            format!(
                "User Question: {}\nAvailable Schema: {}\n{{{{{{Technical Explanation: {}}}}}}}\n/** {} **/\n",
                example.question, mapping, example.explanation, example.sql
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// System instructions for the generation service
pub fn system_message(schema: &SchemaContext) -> String {
    format!(
        "You are an expert SQL query translator for SQLite3. Your task is to convert natural language questions into precise SQL queries.\n\n\
         CRITICAL RULES:\n\
         1. USE ONLY the table and column names in the provided schema.\n\
         2. NEVER invent or modify table/column names.\n\
         3. Preserve EXACTLY the capitalization of table and column names.\n\
         4. If you cannot generate a valid query, respond with 'Invalid SQL'.\n\n\
         Available Schema:\n{}\n\n\
         EXAMPLE QUERIES:\n{}\n\n\
         Response Format:\n\
         {{{{{{Technical Explanation: <concise technical translation>}}}}}}\n\
         /** <Precise SQL Query> **/\n",
        schema.describe(),
        few_shot_examples(schema)
    )
}
