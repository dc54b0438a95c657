use minijinja::{Environment, context};
use regex::Regex;
use std::error::Error;
use std::fmt;
use std::sync::LazyLock;

use crate::db::schema::SchemaDescription;

pub const SQL_ASSISTANT_TEMPLATE: &str = r#"You are a SQL generation assistant for a DuckDB database that stores load-test results.
Write one read-only query that answers the user's question.

Adhere to these rules:
- Only write SELECT queries (a leading WITH clause is fine).
- Never write INSERT, UPDATE, DELETE, DROP, ALTER, CREATE, TRUNCATE or any other statement that changes data or schema.
- Only reference the table and columns listed below. Column names are case sensitive; quote them exactly as shown.
- Return exactly one statement inside a fenced code block that opens with ```sql on its own line and closes with ```.

### Schema
{{ schema }}
"#;

static SCHEMA_PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{-?\s*schema\s*-?\}\}").expect("valid placeholder pattern"));

/// The two messages sent to the completion backend for one turn.
#[derive(Debug, Clone, PartialEq)]
pub struct PromptPayload {
    pub system: String,
    pub user: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PromptError {
    Template(String),
}

impl fmt::Display for PromptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PromptError::Template(msg) => write!(f, "Prompt template error: {}", msg),
        }
    }
}

impl Error for PromptError {}

pub fn compose_prompt(schema: &SchemaDescription, question: &str) -> Result<PromptPayload, PromptError> {
    compose_with_template(SQL_ASSISTANT_TEMPLATE, schema, question)
}

pub fn compose_with_template(
    template: &str,
    schema: &SchemaDescription,
    question: &str,
) -> Result<PromptPayload, PromptError> {
    let placeholders = SCHEMA_PLACEHOLDER.find_iter(template).count();
    if placeholders != 1 {
        return Err(PromptError::Template(format!(
            "expected exactly one schema placeholder, found {}",
            placeholders
        )));
    }

    let env = Environment::new();
    let system = env
        .render_str(template, context! { schema => render_schema(schema) })
        .map_err(|e| PromptError::Template(e.to_string()))?;

    Ok(PromptPayload {
        system,
        user: question.to_string(),
    })
}

/// Text form of the schema block. Backticks are swapped for quotes so a
/// column name can never open or close a fence in the prompt.
pub fn render_schema(schema: &SchemaDescription) -> String {
    let table = neutralize(&schema.table);
    if schema.is_empty() {
        return format!("Table \"{}\": no columns are known for this table.", table);
    }

    let mut text = format!("Table \"{}\":\n", table);
    for column in &schema.columns {
        text.push_str(&format!(
            "- \"{}\" {}\n",
            neutralize(&column.name),
            neutralize(&column.data_type)
        ));
    }
    text.trim_end().to_string()
}

fn neutralize(text: &str) -> String {
    text.replace('`', "'")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::schema::ColumnType;

    fn metrics_schema() -> SchemaDescription {
        SchemaDescription {
            table: "PerformanceMetrics".to_string(),
            columns: vec![
                ColumnType { name: "API".to_string(), data_type: "VARCHAR".to_string() },
                ColumnType { name: "NinetyPercentile".to_string(), data_type: "DOUBLE".to_string() },
                ColumnType { name: "RunId".to_string(), data_type: "INTEGER".to_string() },
            ],
        }
    }

    const QUESTION: &str = "show me all APIs with 90th percentile greater than 400 for run 1";

    #[test]
    fn question_is_carried_verbatim() {
        let prompt = compose_prompt(&metrics_schema(), QUESTION).unwrap();

        assert_eq!(prompt.user, QUESTION);
        assert!(!prompt.system.contains("{{"));
    }

    #[test]
    fn schema_block_appears_once() {
        let prompt = compose_prompt(&metrics_schema(), QUESTION).unwrap();

        assert_eq!(prompt.system.matches("Table \"PerformanceMetrics\"").count(), 1);
        assert!(prompt.system.contains("- \"NinetyPercentile\" DOUBLE"));
        assert!(prompt.system.contains("```sql"));
    }

    #[test]
    fn empty_schema_still_composes() {
        let prompt = compose_prompt(&SchemaDescription::empty("PerformanceMetrics"), QUESTION).unwrap();

        assert_eq!(prompt.system.matches("Table \"PerformanceMetrics\"").count(), 1);
        assert!(prompt.system.contains("no columns are known"));
        assert_eq!(prompt.user, QUESTION);
    }

    #[test]
    fn hostile_column_names_cannot_break_the_template() {
        let schema = SchemaDescription {
            table: "PerformanceMetrics".to_string(),
            columns: vec![ColumnType {
                name: "```{{ schema }}{% raw %}".to_string(),
                data_type: "VARCHAR".to_string(),
            }],
        };

        let prompt = compose_prompt(&schema, QUESTION).unwrap();

        // Only the template's own fence marker survives
        assert_eq!(prompt.system.matches("```").count(), 2);
        assert!(prompt.system.contains("'''{{ schema }}{% raw %}"));
    }

    #[test]
    fn question_with_template_syntax_is_not_rendered() {
        let question = "what is {{ 7 * 7 }} in ``` fences?";

        let prompt = compose_prompt(&metrics_schema(), question).unwrap();

        assert_eq!(prompt.user, question);
    }

    #[test]
    fn templates_without_exactly_one_placeholder_are_refused() {
        let none = compose_with_template("no schema here", &metrics_schema(), QUESTION);
        let two = compose_with_template("{{ schema }} and {{schema}}", &metrics_schema(), QUESTION);

        assert!(matches!(none, Err(PromptError::Template(_))));
        assert!(matches!(two, Err(PromptError::Template(_))));
    }

    #[test]
    fn malformed_template_is_refused() {
        let result = compose_with_template("{{ schema }} {% if %}", &metrics_schema(), QUESTION);

        assert!(matches!(result, Err(PromptError::Template(_))));
    }
}
