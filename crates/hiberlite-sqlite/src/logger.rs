//! SQL statement logging.
//!
//! Every statement a [`PhysicalConnection`](crate::PhysicalConnection) runs goes
//! through its logger. With `show_sql` enabled statements are emitted at INFO on
//! the `hiberlite::sql` target; otherwise they are emitted at DEBUG so they stay
//! out of normal output.

/// Target used for SQL statement events.
pub const SQL_TARGET: &str = "hiberlite::sql";

const INDENT: &str = "    ";

/// Logs executed SQL statements.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SqlStatementLogger {
    show_sql: bool,
    format_sql: bool,
}

impl SqlStatementLogger {
    /// Create a logger.
    pub const fn new(show_sql: bool, format_sql: bool) -> Self {
        Self {
            show_sql,
            format_sql,
        }
    }

    /// Whether statements are shown at INFO level.
    pub const fn show_sql(&self) -> bool {
        self.show_sql
    }

    /// Whether shown statements are pretty-printed.
    pub const fn format_sql(&self) -> bool {
        self.format_sql
    }

    /// Render a statement the way it will be logged.
    pub fn render(&self, sql: &str) -> String {
        if self.format_sql {
            format_sql(sql)
        } else {
            sql.to_string()
        }
    }

    /// Log a statement about to be executed.
    pub fn log(&self, sql: &str) {
        if self.show_sql {
            let rendered = self.render(sql);
            tracing::info!(target: SQL_TARGET, "{}", rendered);
        } else {
            tracing::debug!(target: SQL_TARGET, sql = %sql, "Executing statement");
        }
    }
}

/// Pretty-print a SQL statement.
///
/// DML gets one line per clause (`SELECT`, `FROM`, `WHERE`, `SET`, `VALUES`, ...).
/// DDL gets one line per column definition inside the outermost parentheses.
/// Quoted strings and identifiers are copied verbatim.
pub fn format_sql(sql: &str) -> String {
    let tokens = tokenize(sql);
    let ddl = tokens
        .first()
        .is_some_and(|t| t.eq_ignore_ascii_case("CREATE"));

    let mut out = String::new();
    let mut depth = 0usize;
    let mut prev_upper = String::new();

    for token in tokens {
        let upper = token.to_ascii_uppercase();
        match token.as_str() {
            "(" => {
                if out.ends_with('"')
                    || matches!(
                        prev_upper.as_str(),
                        "VALUES" | "IN" | "KEY" | "AS" | "EXISTS" | "ON" | "UNIQUE"
                    )
                {
                    out.push(' ');
                }
                out.push('(');
                depth += 1;
                if ddl && depth == 1 {
                    newline(&mut out, depth);
                }
            }
            ")" => {
                depth = depth.saturating_sub(1);
                if ddl && depth == 0 {
                    newline(&mut out, depth);
                }
                out.push(')');
            }
            "," => {
                out.push(',');
                if ddl && depth == 1 {
                    newline(&mut out, depth);
                }
            }
            _ => {
                if !ddl && !out.is_empty() && is_clause_keyword(&upper) {
                    newline(&mut out, depth);
                } else if !(out.is_empty() || out.ends_with('(') || out.ends_with(' ')) {
                    out.push(' ');
                }
                out.push_str(&token);
            }
        }
        prev_upper = upper;
    }

    out
}

fn is_clause_keyword(upper: &str) -> bool {
    matches!(
        upper,
        "SELECT"
            | "FROM"
            | "WHERE"
            | "SET"
            | "VALUES"
            | "ORDER"
            | "GROUP"
            | "HAVING"
            | "LIMIT"
            | "OFFSET"
            | "RETURNING"
            | "UNION"
    )
}

fn newline(out: &mut String, depth: usize) {
    let trimmed = out.trim_end_matches(' ').len();
    out.truncate(trimmed);
    out.push('\n');
    out.push_str(&INDENT.repeat(depth));
}

fn tokenize(sql: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut chars = sql.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\'' | '"' => {
                flush(&mut current, &mut tokens);
                let mut quoted = String::from(c);
                while let Some(q) = chars.next() {
                    quoted.push(q);
                    if q == c {
                        // doubled quote is an escape, not the end
                        if chars.peek() == Some(&c) {
                            quoted.push(c);
                            chars.next();
                        } else {
                            break;
                        }
                    }
                }
                tokens.push(quoted);
            }
            '(' | ')' | ',' => {
                flush(&mut current, &mut tokens);
                tokens.push(c.to_string());
            }
            c if c.is_whitespace() => flush(&mut current, &mut tokens),
            c => current.push(c),
        }
    }
    flush(&mut current, &mut tokens);
    tokens
}

fn flush(current: &mut String, tokens: &mut Vec<String>) {
    if !current.is_empty() {
        tokens.push(std::mem::take(current));
    }
}
