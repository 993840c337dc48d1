//! NanoQL evaluation against log rows

use super::parser::{Expr, MatchExpr, MatchOp};
use crate::{level_name, LogRow};
use std::borrow::Cow;

/// Evaluate an AST against a row. `None` means match-all.
pub fn matches(expr: Option<&Expr>, row: &LogRow) -> bool {
    let Some(expr) = expr else {
        return true;
    };

    match expr {
        Expr::And(left, right) => matches(Some(left), row) && matches(Some(right), row),
        Expr::Or(left, right) => matches(Some(left), row) || matches(Some(right), row),
        Expr::Not(inner) => !matches(Some(inner), row),
        Expr::Match(m) => eval_match(m, row),
    }
}

fn eval_match(m: &MatchExpr, row: &LogRow) -> bool {
    // Full-text search across all fields
    if m.key.is_empty() {
        return full_text(&m.value, row);
    }

    let field = field_value(&m.key, row);
    match m.op {
        MatchOp::Eq => eq_ignore_case(&field, &m.value),
        MatchOp::Neq => !eq_ignore_case(&field, &m.value),
        MatchOp::Contains => contains_ignore_case(&field, &m.value),
    }
}

/// Resolve a field by name. Unknown fields resolve to the empty string, so a
/// match against them simply never succeeds.
fn field_value<'a>(key: &str, row: &'a LogRow) -> Cow<'a, str> {
    match key.to_ascii_lowercase().as_str() {
        "service" | "svc" => Cow::Borrowed(row.service.as_str()),
        "host" | "ip" | "hostname" => Cow::Borrowed(row.host.as_str()),
        "message" | "msg" => Cow::Borrowed(row.message.as_str()),
        "level" | "lvl" => Cow::Borrowed(level_name(row.level)),
        "timestamp" | "ts" => Cow::Owned(row.timestamp.to_string()),
        _ => Cow::Borrowed(""),
    }
}

fn full_text(needle: &str, row: &LogRow) -> bool {
    contains_ignore_case(&row.service, needle)
        || contains_ignore_case(&row.host, needle)
        || contains_ignore_case(&row.message, needle)
        || contains_ignore_case(level_name(row.level), needle)
}

fn eq_ignore_case(a: &str, b: &str) -> bool {
    a.to_lowercase() == b.to_lowercase()
}

fn contains_ignore_case(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.to_lowercase())
}
