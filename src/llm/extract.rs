const FENCE: &str = "```";
const CLOSING_FENCE: &str = "\n```";

/// Isolates the SQL statement in a model completion.
///
/// With a fence present, the statement starts on the line after the first
/// opening fence (skipping any language tag) and runs to the next closing
/// fence, or to the end of the text if the fence is never closed. Without a
/// fence the whole completion is the statement. The result is trimmed and may
/// be empty.
pub fn extract_sql(completion: &str) -> String {
    let Some(open) = completion.find(FENCE) else {
        return completion.trim().to_string();
    };

    let after_fence = open + FENCE.len();
    let start = match completion[after_fence..].find('\n') {
        Some(newline) => after_fence + newline + 1,
        None => after_fence,
    };

    let body = &completion[start..];
    let end = body.find(CLOSING_FENCE).unwrap_or(body.len());
    let statement = body[..end].trim();

    // A fence closed on the statement's own line
    statement
        .strip_suffix(FENCE)
        .unwrap_or(statement)
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fenced_block_with_language_tag() {
        let completion = "```sql\nSELECT API, NinetyPercentile FROM PerformanceMetrics WHERE NinetyPercentile > 400 AND RunId = 1\n```";

        assert_eq!(
            extract_sql(completion),
            "SELECT API, NinetyPercentile FROM PerformanceMetrics WHERE NinetyPercentile > 400 AND RunId = 1"
        );
    }

    #[test]
    fn fenced_block_without_tag_and_surrounding_prose() {
        let completion = "Here is the query you asked for:\n```\nSELECT *\nFROM PerformanceMetrics\n```\nIt lists every row.";

        assert_eq!(extract_sql(completion), "SELECT *\nFROM PerformanceMetrics");
    }

    #[test]
    fn only_the_first_block_is_used() {
        let completion = "```sql\nSELECT 1\n```\nor alternatively\n```sql\nSELECT 2\n```";

        assert_eq!(extract_sql(completion), "SELECT 1");
    }

    #[test]
    fn unfenced_text_is_taken_whole() {
        assert_eq!(extract_sql("  SELECT COUNT(*) FROM PerformanceMetrics;\n"), "SELECT COUNT(*) FROM PerformanceMetrics;");
        assert_eq!(extract_sql("I cannot answer that"), "I cannot answer that");
    }

    #[test]
    fn unclosed_fence_runs_to_the_end() {
        let completion = "```sql\nSELECT API FROM PerformanceMetrics\nWHERE RunId = 2";

        assert_eq!(extract_sql(completion), "SELECT API FROM PerformanceMetrics\nWHERE RunId = 2");
    }

    #[test]
    fn fence_closed_on_the_same_line() {
        assert_eq!(extract_sql("```sql\nSELECT 1```"), "SELECT 1");
    }

    #[test]
    fn fence_without_a_newline() {
        assert_eq!(extract_sql("```SELECT 1```"), "SELECT 1");
    }

    #[test]
    fn adjacent_fences_give_an_empty_statement() {
        assert_eq!(extract_sql("```sql\n```"), "");
        assert_eq!(extract_sql("```\n\n```"), "");
    }

    #[test]
    fn windows_line_endings() {
        assert_eq!(extract_sql("```sql\r\nSELECT 1\r\n```\r\n"), "SELECT 1");
    }
}
