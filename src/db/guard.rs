//! Read-only allow-list applied to model-authored SQL before it reaches the store.

/// Statements that may open a query.
const ALLOWED_LEADING: &[&str] = &["SELECT", "WITH"];

/// Keywords DuckDB accepts at the start of a statement. Text that opens with
/// anything else is not SQL and is left for the engine to reject.
const STATEMENT_KEYWORDS: &[&str] = &[
    "ABORT", "ALTER", "ANALYZE", "ATTACH", "BEGIN", "CALL", "CHECKPOINT", "COMMENT", "COMMIT",
    "COPY", "CREATE", "DEALLOCATE", "DELETE", "DESCRIBE", "DETACH", "DROP", "END", "EXECUTE",
    "EXPLAIN", "EXPORT", "FORCE", "FROM", "GRANT", "IMPORT", "INSERT", "INSTALL", "LOAD", "MERGE",
    "PIVOT", "PRAGMA", "PREPARE", "REINDEX", "RESET", "REVOKE", "ROLLBACK", "SELECT", "SET",
    "SHOW", "START", "SUMMARIZE", "TABLE", "TRUNCATE", "UNPIVOT", "UPDATE", "USE", "VACUUM",
    "VALUES", "WITH",
];

/// Keywords that write data, change the schema, control transactions or
/// reach outside the database.
const MUTATING_KEYWORDS: &[&str] = &[
    "INSERT", "UPDATE", "DELETE", "DROP", "ALTER", "CREATE", "REPLACE", "TRUNCATE", "ATTACH",
    "DETACH", "COPY", "EXPORT", "IMPORT", "INSTALL", "LOAD", "PRAGMA", "CALL", "MERGE", "GRANT",
    "REVOKE", "VACUUM", "CHECKPOINT", "REINDEX", "ANALYZE", "BEGIN", "COMMIT", "ROLLBACK",
];

/// DuckDB table functions that read arbitrary files from the host.
const FORBIDDEN_FUNCTION_PREFIXES: &[&str] = &["read_", "glob", "parquet_scan", "sniff_csv"];

/// Clause keywords after which a comma no longer separates FROM items.
const CLAUSE_KEYWORDS: &[&str] = &[
    "SELECT", "WHERE", "GROUP", "HAVING", "ORDER", "LIMIT", "OFFSET", "QUALIFY", "WINDOW", "UNION",
    "EXCEPT", "INTERSECT", "ON", "USING",
];

#[derive(Debug, Clone, PartialEq)]
pub enum StatementVerdict {
    Safe(String),
    Rejected(String),
}

/// Lexical units found outside comments.
#[derive(Debug, PartialEq)]
enum Token {
    Word(String),
    /// A double-quoted identifier, unescaped.
    Quoted(String),
    /// A single-quoted string literal.
    Str,
    Punct(char),
}

impl Token {
    fn is_word(&self, keyword: &str) -> bool {
        matches!(self, Token::Word(w) if w.eq_ignore_ascii_case(keyword))
    }
}

pub fn check_statement(sql: &str) -> StatementVerdict {
    let tokens = tokenize(sql);

    let Some(first) = tokens.iter().find_map(|t| match t {
        Token::Word(w) => Some(w),
        _ => None,
    }) else {
        return StatementVerdict::Rejected(
            "SQL query is empty; provide a SELECT or WITH ... SELECT statement".to_string(),
        );
    };

    let leading = first.to_ascii_uppercase();
    if STATEMENT_KEYWORDS.contains(&leading.as_str()) && !ALLOWED_LEADING.contains(&leading.as_str()) {
        return StatementVerdict::Rejected(format!(
            "Only SELECT and WITH ... SELECT statements are allowed; statement starts with {}",
            leading
        ));
    }

    if let Some(pos) = tokens.iter().position(|t| *t == Token::Punct(';')) {
        if tokens[pos + 1..].iter().any(|t| *t != Token::Punct(';')) {
            return StatementVerdict::Rejected(
                "Multi-statement SQL is not allowed; submit exactly one read-only statement".to_string(),
            );
        }
    }

    if let Some(keyword) = first_mutating_keyword(&tokens) {
        return StatementVerdict::Rejected(format!("Mutating SQL keyword `{}` is not allowed", keyword));
    }

    if let Some(function) = first_file_function(&tokens) {
        return StatementVerdict::Rejected(format!("File-reading function `{}` is not allowed", function));
    }

    if reads_path_literal(&tokens) {
        return StatementVerdict::Rejected("Reading a file by path is not allowed".to_string());
    }

    StatementVerdict::Safe(sql.trim().to_string())
}

fn first_mutating_keyword(tokens: &[Token]) -> Option<String> {
    tokens.iter().enumerate().find_map(|(i, token)| {
        let Token::Word(word) = token else { return None };
        let upper = word.to_ascii_uppercase();
        if !MUTATING_KEYWORDS.contains(&upper.as_str()) {
            return None;
        }
        // replace(...) the string function and SELECT * REPLACE (...) only read
        if upper == "REPLACE" && tokens.get(i + 1) == Some(&Token::Punct('(')) {
            return None;
        }
        Some(upper)
    })
}

fn first_file_function(tokens: &[Token]) -> Option<String> {
    tokens.iter().find_map(|token| {
        let name = match token {
            Token::Word(w) | Token::Quoted(w) => w.to_ascii_lowercase(),
            _ => return None,
        };
        FORBIDDEN_FUNCTION_PREFIXES
            .iter()
            .any(|p| name.starts_with(p))
            .then_some(name)
    })
}

/// DuckDB scans a string literal in table position as a file path:
/// `FROM 'data.csv'`, `JOIN 'x.parquet'` or `FROM t, 'y.json'`.
fn reads_path_literal(tokens: &[Token]) -> bool {
    let mut depth = 0usize;
    // Paren depths at which a FROM list is open
    let mut from_depths: Vec<usize> = Vec::new();
    let mut previous: Option<&Token> = None;

    for token in tokens {
        match token {
            Token::Punct('(') => depth += 1,
            Token::Punct(')') => {
                from_depths.retain(|d| *d < depth);
                depth = depth.saturating_sub(1);
            }
            Token::Word(_) if token.is_word("FROM") || token.is_word("JOIN") => {
                from_depths.retain(|d| *d != depth);
                from_depths.push(depth);
            }
            Token::Word(w) if CLAUSE_KEYWORDS.contains(&w.to_ascii_uppercase().as_str()) => {
                from_depths.retain(|d| *d != depth);
            }
            Token::Str => {
                let in_table_position = match previous {
                    Some(p) if p.is_word("FROM") || p.is_word("JOIN") => true,
                    Some(Token::Punct(',')) => from_depths.last() == Some(&depth),
                    _ => false,
                };
                if in_table_position {
                    return true;
                }
            }
            _ => {}
        }
        previous = Some(token);
    }

    false
}

fn tokenize(sql: &str) -> Vec<Token> {
    let chars: Vec<char> = sql.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            '-' if chars.get(i + 1) == Some(&'-') => {
                while i < chars.len() && chars[i] != '\n' {
                    i += 1;
                }
            }
            '/' if chars.get(i + 1) == Some(&'*') => {
                i += 2;
                while i < chars.len() && !(chars[i] == '*' && chars.get(i + 1) == Some(&'/')) {
                    i += 1;
                }
                i += 2;
            }
            '\'' => {
                // E'...' escape strings also accept backslash escapes
                let escape_string = i > 0
                    && matches!(chars[i - 1], 'E' | 'e')
                    && matches!(tokens.last(), Some(Token::Word(w)) if w.eq_ignore_ascii_case("e"));
                if escape_string {
                    tokens.pop();
                }
                i = skip_quoted(&chars, i, '\'', escape_string).0;
                tokens.push(Token::Str);
            }
            '"' => {
                let (next, ident) = skip_quoted(&chars, i, '"', false);
                i = next;
                tokens.push(Token::Quoted(ident));
            }
            c if c.is_alphanumeric() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                tokens.push(Token::Word(chars[start..i].iter().collect()));
            }
            c if c.is_whitespace() => i += 1,
            _ => {
                tokens.push(Token::Punct(c));
                i += 1;
            }
        }
    }

    tokens
}

/// Skips a quoted run starting at `start`. A doubled quote escapes itself.
/// Returns the index after the closing quote and the unescaped contents.
fn skip_quoted(chars: &[char], start: usize, quote: char, backslash_escapes: bool) -> (usize, String) {
    let mut contents = String::new();
    let mut i = start + 1;
    while i < chars.len() {
        let c = chars[i];
        if backslash_escapes && c == '\\' {
            if let Some(&escaped) = chars.get(i + 1) {
                contents.push(escaped);
            }
            i += 2;
            continue;
        }
        if c == quote {
            if chars.get(i + 1) == Some(&quote) {
                contents.push(quote);
                i += 2;
                continue;
            }
            break;
        }
        contents.push(c);
        i += 1;
    }
    (i + 1, contents)
}
