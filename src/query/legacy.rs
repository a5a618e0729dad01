//! Legacy query-string rendering (Lucene syntax)

use super::{Clause, FieldMapping, Occur, RangeOp};
use crate::predicate::SearchParameter;

const MATCH_ALL: &str = "*:*";
const MATCH_NONE: &str = "(*:* NOT *:*)";

/// Render a clause tree as a query string
pub fn render(clause: &Clause, fields: &FieldMapping) -> String {
    match clause {
        Clause::Bool { occur, clauses } => {
            if clauses.is_empty() {
                return MATCH_ALL.to_string();
            }
            let rendered: Vec<String> = clauses.iter().map(|c| render(c, fields)).collect();
            match occur {
                Occur::Must => format!("({})", rendered.join(" AND ")),
                Occur::Should => format!("({})", rendered.join(" OR ")),
                Occur::MustNot => format!("({MATCH_ALL} NOT {})", rendered.join(" NOT ")),
            }
        }
        Clause::Match { field, value } => {
            format!("{}:{}", fields.legacy_name(*field), quote(value))
        }
        Clause::Wildcard { field, pattern } => {
            format!("{}:{}", fields.legacy_name(*field), escape(pattern, true))
        }
        Clause::Range { field, op, value } => {
            let value = escape(value, false);
            let bounds = match op {
                RangeOp::Gt => format!("{{{value} TO *]"),
                RangeOp::Gte => format!("[{value} TO *]"),
                RangeOp::Lt => format!("[* TO {value}}}"),
                RangeOp::Lte => format!("[* TO {value}]"),
            };
            format!("{}:{bounds}", fields.legacy_name(*field))
        }
        Clause::Terms { field, values } => {
            if values.is_empty() {
                return MATCH_NONE.to_string();
            }
            let name = fields.legacy_name(*field);
            let terms: Vec<String> = values
                .iter()
                .map(|v| format!("{name}:{}", quote(v)))
                .collect();
            format!("({})", terms.join(" OR "))
        }
        Clause::Exists { field } => format!("{}:*", fields.legacy_name(*field)),
        Clause::GeoBoundingBox { envelope } => format!(
            "{}:[{},{} TO {},{}]",
            fields.legacy_name(SearchParameter::Geometry),
            envelope.min_lat,
            envelope.min_lon,
            envelope.max_lat,
            envelope.max_lon
        ),
    }
}

/// Quote a term as a phrase, escaping quotes and backslashes
fn quote(value: &str) -> String {
    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('"');
    for c in value.chars() {
        if matches!(c, '"' | '\\') {
            quoted.push('\\');
        }
        quoted.push(c);
    }
    quoted.push('"');
    quoted
}

/// Escape query-syntax characters; `*` and `?` survive when `wildcards` is set
fn escape(value: &str, wildcards: bool) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        let special = match c {
            '*' | '?' => !wildcards,
            '\\' | '+' | '-' | '!' | '(' | ')' | ':' | '^' | '[' | ']' | '"' | '{' | '}' | '~'
            | '&' | '|' | '/' => true,
            c => c.is_whitespace(),
        };
        if special {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wildcard_escaping_keeps_wildcards() {
        assert_eq!(escape("Puma con*lor?", true), "Puma\\ con*lor?");
        assert_eq!(escape("a*b", false), "a\\*b");
        assert_eq!(escape("2000-01-01", false), "2000\\-01\\-01");
    }

    #[test]
    fn quoting_escapes_quotes_and_backslashes() {
        assert_eq!(quote(r#"say "hi"\"#), r#""say \"hi\"\\""#);
    }
}
