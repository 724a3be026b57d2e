use crate::services::error::{EventError, EventResult};

const FORBIDDEN_KEYWORDS: &[&str] = &[
    "INSERT", "UPDATE", "DELETE", "MERGE", "DROP", "ALTER", "CREATE", "TRUNCATE", "GRANT",
    "REVOKE", "EXECUTE", "CALL", "COPY", "VACUUM", "SET", "LISTEN", "NOTIFY",
];

#[derive(Debug, Clone)]
pub struct GuardInfo {
    pub leading_keyword: String,
}

/// Validates that `sql` is a single read-only statement. Rejects anything it
/// cannot confidently classify rather than risk it reaching the database.
pub fn validate(sql: &str) -> EventResult<(String, GuardInfo)> {
    let trimmed = strip_trailing_semicolon(strip_comments(sql).trim());
    if trimmed.is_empty() {
        return Err(EventError::UnsafeSql("empty query".to_string()));
    }

    let tokens = tokenize(trimmed);
    if tokens.is_empty() {
        return Err(EventError::UnsafeSql("empty query".to_string()));
    }

    let leading = tokens[0].to_uppercase();
    if leading != "SELECT" && leading != "WITH" {
        return Err(EventError::UnsafeSql(format!(
            "statement must start with SELECT or WITH, found {leading}"
        )));
    }

    if contains_bare_statement_separator(trimmed) {
        return Err(EventError::UnsafeSql(
            "multiple statements are not allowed".to_string(),
        ));
    }

    for token in &tokens {
        let upper = token.to_uppercase();
        if FORBIDDEN_KEYWORDS.contains(&upper.as_str()) {
            return Err(EventError::UnsafeSql(format!(
                "forbidden keyword: {upper}"
            )));
        }
    }

    if leading == "WITH" && !tokens.iter().any(|t| t.eq_ignore_ascii_case("select")) {
        return Err(EventError::UnsafeSql(
            "WITH statement must resolve to a SELECT".to_string(),
        ));
    }

    Ok((
        trimmed.to_string(),
        GuardInfo {
            leading_keyword: leading,
        },
    ))
}

fn strip_trailing_semicolon(sql: &str) -> &str {
    sql.trim_end().trim_end_matches(';').trim_end()
}

/// Strips `--` line comments and `/* */` block comments while respecting
/// quoted strings and identifiers, so a comment marker inside a literal is
/// left untouched.
fn strip_comments(sql: &str) -> String {
    let mut out = String::with_capacity(sql.len());
    let mut chars = sql.chars().peekable();
    let mut in_single_quote = false;
    let mut in_double_quote = false;

    while let Some(c) = chars.next() {
        if in_single_quote {
            out.push(c);
            if c == '\'' {
                in_single_quote = false;
            }
            continue;
        }
        if in_double_quote {
            out.push(c);
            if c == '"' {
                in_double_quote = false;
            }
            continue;
        }
        match c {
            '\'' => {
                in_single_quote = true;
                out.push(c);
            }
            '"' => {
                in_double_quote = true;
                out.push(c);
            }
            '-' if chars.peek() == Some(&'-') => {
                for c in chars.by_ref() {
                    if c == '\n' {
                        out.push('\n');
                        break;
                    }
                }
            }
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                let mut prev = ' ';
                for c in chars.by_ref() {
                    if prev == '*' && c == '/' {
                        break;
                    }
                    prev = c;
                }
                out.push(' ');
            }
            _ => out.push(c),
        }
    }
    out
}

/// Splits on whitespace/punctuation outside quoted regions; good enough to
/// recognize standalone SQL keywords without matching substrings inside
/// identifiers like `update_count`.
fn tokenize(sql: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_single_quote = false;
    let mut in_double_quote = false;

    let flush = |current: &mut String, tokens: &mut Vec<String>| {
        if !current.is_empty() {
            tokens.push(std::mem::take(current));
        }
    };

    for c in sql.chars() {
        if in_single_quote {
            if c == '\'' {
                in_single_quote = false;
            }
            continue;
        }
        if in_double_quote {
            if c == '"' {
                in_double_quote = false;
            }
            continue;
        }
        match c {
            '\'' => {
                flush(&mut current, &mut tokens);
                in_single_quote = true;
            }
            '"' => {
                flush(&mut current, &mut tokens);
                in_double_quote = true;
            }
            c if c.is_alphanumeric() || c == '_' => current.push(c),
            _ => flush(&mut current, &mut tokens),
        }
    }
    flush(&mut current, &mut tokens);
    tokens
}

fn contains_bare_statement_separator(sql: &str) -> bool {
    let mut in_single_quote = false;
    let mut in_double_quote = false;
    for c in sql.chars() {
        match c {
            '\'' if !in_double_quote => in_single_quote = !in_single_quote,
            '"' if !in_single_quote => in_double_quote = !in_double_quote,
            ';' if !in_single_quote && !in_double_quote => return true,
            _ => {}
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_plain_select() {
        let (sql, info) = validate("SELECT station_id, water_level FROM water_level_readings")
            .expect("should validate");
        assert_eq!(sql, "SELECT station_id, water_level FROM water_level_readings");
        assert_eq!(info.leading_keyword, "SELECT");
    }

    #[test]
    fn accepts_cte_resolving_to_select() {
        let sql = "WITH recent AS (SELECT 1 AS x) SELECT x FROM recent";
        assert!(validate(sql).is_ok());
    }

    #[test]
    fn rejects_delete() {
        let err = validate("DELETE FROM users").unwrap_err();
        assert!(matches!(err, EventError::UnsafeSql(_)));
    }

    #[test]
    fn rejects_multi_statement() {
        let err = validate("SELECT 1; DROP TABLE users").unwrap_err();
        assert!(matches!(err, EventError::UnsafeSql(_)));
    }

    #[test]
    fn does_not_false_positive_on_identifier_containing_keyword() {
        let sql = "SELECT update_count, created_at FROM audit_log WHERE update_count > 0";
        assert!(validate(sql).is_ok());
    }

    #[test]
    fn strips_trailing_semicolon_and_comments() {
        let sql = "-- note\nSELECT 1 /* inline */ AS one;";
        let (validated, _) = validate(sql).expect("should validate");
        assert!(validated.starts_with("SELECT 1"));
        assert!(!validated.contains("note"));
        assert!(!validated.ends_with(';'));
    }

    #[test]
    fn rejects_empty_query() {
        assert!(validate("   ").is_err());
    }
}
