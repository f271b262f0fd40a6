//! Text-level safety filter for user-supplied SQL.
//!
//! The validator never parses SQL. It scans a copy of the query with string
//! literals and comments blanked out, so keywords hidden inside quotes or
//! comments are invisible to the checks while the text handed to the engine
//! stays exactly as the caller wrote it.

use std::sync::LazyLock;

use regex::Regex;

use crate::error::TabularError;

/// Keywords that, in statement position, could modify data or escape the cache file.
const DANGEROUS_KEYWORDS: &[&str] = &[
    "insert", "update", "delete", "drop", "alter", "create", "replace", "truncate", "copy",
    "attach", "detach", "pragma", "set", "call", "vacuum", "analyze", "grant", "revoke",
    "comment", "install", "load", "export", "import", "merge",
];

/// Tokens after which a bare word is read as an identifier, not a statement keyword.
const IDENT_CONTEXT_TOKENS: &[&str] = &[
    "select", "from", "join", "on", "as", "by", "where", "having", "and", "or", "not", "in",
    "between", "like", "ilike", "is", "when", "then", "else", "distinct", "all", "over",
    "partition", "using", "limit", "offset", "case", "end", "with", "recursive", "filter",
    "within", "respect", "ignore", "nulls", "asc", "desc", "group", "order", "into", ",", ".",
    "(", ")", "=", "<", ">", "!", "+", "-", "*", "/", "|", "&", "^", "~", "%",
];

static TOKEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[,;.()\[\]=<>!+\-*/|&^~%]|[^\s,;.()\[\]=<>!+\-*/|&^~%]+").expect("valid pattern")
});

static PATH_FUNCTION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\b(read_[a-z0-9_]+|[a-z0-9_]+_scan|glob|open_url|httpfs|read_csv|read_parquet|read_json)\s*\(",
    )
    .expect("valid pattern")
});

static ORDER_BY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\border\s+by\b").expect("valid pattern"));

/// Validate a caller-supplied query and return the text to execute.
///
/// The returned query is the caller's original text, trimmed, with a single
/// trailing semicolon removed.
pub fn validate_query(raw_query: Option<&str>) -> Result<String, TabularError> {
    let mut query = raw_query.map(str::trim).unwrap_or_default();
    if query.is_empty() {
        return Err(TabularError::validation("missing query"));
    }

    let stripped = strip_literals_and_comments(query);
    let mut checked = stripped.trim();
    if checked.is_empty() {
        return Err(TabularError::validation("invalid query"));
    }

    match checked.matches(';').count() {
        0 => {}
        1 => {
            if !checked.ends_with(';') {
                return Err(TabularError::validation("query must be a single statement"));
            }
            if !query.ends_with(';') {
                return Err(TabularError::validation("query must end with ';'"));
            }
            checked = checked[..checked.len() - 1].trim();
            query = query[..query.len() - 1].trim();
        }
        _ => return Err(TabularError::validation("query must be a single statement")),
    }
    if checked.is_empty() {
        return Err(TabularError::validation("invalid query"));
    }

    let first_token = checked
        .split_whitespace()
        .next()
        .unwrap_or_default()
        .to_ascii_lowercase();
    if !matches!(first_token.as_str(), "select" | "with") {
        return Err(TabularError::validation("only SELECT/CTE queries are allowed"));
    }

    let lowered = checked.to_lowercase();
    if find_dangerous_keyword(&lowered).is_some() {
        return Err(TabularError::validation("query must be read-only"));
    }
    if PATH_FUNCTION.is_match(&lowered) {
        return Err(TabularError::validation(
            "path-reading functions are not allowed",
        ));
    }

    Ok(query.to_string())
}

/// Blank out string literals and comments.
///
/// Each quoted literal collapses to a single space; comments vanish but keep
/// their newlines so line structure survives.
pub fn strip_literals_and_comments(sql: &str) -> String {
    #[derive(Clone, Copy, PartialEq, Eq)]
    enum State {
        Normal,
        Quoted(char),
        LineComment,
        BlockComment,
    }

    let chars: Vec<char> = sql.chars().collect();
    let mut out = String::with_capacity(sql.len());
    let mut state = State::Normal;
    let mut index = 0;

    while index < chars.len() {
        let ch = chars[index];
        let next = chars.get(index + 1).copied();
        match state {
            State::Normal => match (ch, next) {
                ('\'' | '"', _) => {
                    state = State::Quoted(ch);
                    out.push(' ');
                }
                ('-', Some('-')) => {
                    state = State::LineComment;
                    index += 1;
                }
                ('/', Some('*')) => {
                    state = State::BlockComment;
                    index += 1;
                }
                _ => out.push(ch),
            },
            State::Quoted(quote) => {
                if ch == quote && next == Some(quote) {
                    index += 1;
                } else if ch == quote {
                    state = State::Normal;
                }
            }
            State::LineComment => {
                if ch == '\n' {
                    state = State::Normal;
                    out.push('\n');
                }
            }
            State::BlockComment => {
                if ch == '*' && next == Some('/') {
                    state = State::Normal;
                    index += 1;
                } else if ch == '\n' {
                    out.push('\n');
                }
            }
        }
        index += 1;
    }

    out
}

/// Return the first dangerous keyword found in statement position.
pub fn find_dangerous_keyword(lowered_sql: &str) -> Option<String> {
    let mut previous: Option<&str> = None;
    for token in TOKEN.find_iter(lowered_sql).map(|found| found.as_str()) {
        if DANGEROUS_KEYWORDS.contains(&token)
            && !previous.is_some_and(|previous| IDENT_CONTEXT_TOKENS.contains(&previous))
        {
            return Some(token.to_string());
        }
        previous = Some(token);
    }
    None
}

/// Whether a query carries an explicit `ORDER BY` outside literals and comments.
pub fn has_order_by(query: &str) -> bool {
    let lowered = strip_literals_and_comments(query).to_lowercase();
    ORDER_BY.is_match(&lowered)
}
