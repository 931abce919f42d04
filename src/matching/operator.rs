//! Property and URL operator evaluation
//!
//! [`evaluate`] is a pure function over JSON values. Throughout this module
//! the *needle* is the value configured on a definition and the *haystack*
//! is the live value read from the event.

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::borrow::Cow;
use std::cmp::Ordering;
use tracing::warn;

/// Comparison operator used by property filters and URL matching.
///
/// URL matching only ever uses `Exact`, `Contains` and `Regex`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Operator {
    /// Strict equality
    #[default]
    #[serde(rename = "exact")]
    Exact,
    /// Negated strict equality
    #[serde(rename = "is_not")]
    IsNot,
    /// Case-sensitive substring
    #[serde(rename = "contains")]
    Contains,
    /// Case-insensitive substring
    #[serde(rename = "icontains")]
    IContains,
    /// Negated case-insensitive substring
    #[serde(rename = "not_icontains")]
    NotIContains,
    /// Regular expression match
    #[serde(rename = "regex")]
    Regex,
    /// Negated regular expression match
    #[serde(rename = "not_regex")]
    NotRegex,
    /// Live value greater than the configured value
    #[serde(rename = "gt")]
    GreaterThan,
    /// Live value less than the configured value
    #[serde(rename = "lt")]
    LessThan,
    /// Live value present and non-empty
    #[serde(rename = "is_set")]
    IsSet,
    /// Live value absent or empty
    #[serde(rename = "is_not_set")]
    IsNotSet,
    /// Any operator this exporter does not know; never matches
    #[serde(other)]
    Unknown,
}

/// Evaluates `operator` for a configured `needle` against a live `haystack`.
///
/// Absent live values are passed as `JsonValue::Null`.
///
/// # Examples
///
/// ```
/// use gclid_export::matching::{evaluate, Operator};
/// use serde_json::json;
///
/// assert!(evaluate(&json!("/insights"), &json!("https://x/insights"), Operator::Contains));
/// assert!(evaluate(&json!(10), &json!(15), Operator::GreaterThan));
/// assert!(evaluate(&serde_json::Value::Null, &json!(0), Operator::IsSet));
/// ```
pub fn evaluate(needle: &JsonValue, haystack: &JsonValue, operator: Operator) -> bool {
    match operator {
        Operator::Exact => strict_eq(needle, haystack),
        Operator::IsNot => !strict_eq(needle, haystack),
        Operator::Contains => match (as_text(needle), as_text(haystack)) {
            (Some(needle), Some(haystack)) => haystack.contains(needle.as_ref()),
            _ => false,
        },
        Operator::IContains => icontains(needle, haystack),
        Operator::NotIContains => !icontains(needle, haystack),
        Operator::Regex => regex_match(needle, haystack).unwrap_or(false),
        Operator::NotRegex => regex_match(needle, haystack).map_or(false, |m| !m),
        Operator::GreaterThan => compare(haystack, needle) == Some(Ordering::Greater),
        Operator::LessThan => compare(haystack, needle) == Some(Ordering::Less),
        Operator::IsSet => is_set(haystack),
        Operator::IsNotSet => !is_set(haystack),
        Operator::Unknown => false,
    }
}

/// True unless the value is null/absent or the empty string.
///
/// `0` and `false` count as set.
pub fn is_set(value: &JsonValue) -> bool {
    match value {
        JsonValue::Null => false,
        JsonValue::String(s) => !s.is_empty(),
        _ => true,
    }
}

fn strict_eq(a: &JsonValue, b: &JsonValue) -> bool {
    match (a, b) {
        // 1 and 1.0 are the same number
        (JsonValue::Number(a), JsonValue::Number(b)) => match (a.as_f64(), b.as_f64()) {
            (Some(a), Some(b)) => a == b,
            _ => a == b,
        },
        _ => a == b,
    }
}

/// Text view of a scalar. Null, arrays and objects have none.
fn as_text(value: &JsonValue) -> Option<Cow<'_, str>> {
    match value {
        JsonValue::String(s) => Some(Cow::Borrowed(s.as_str())),
        JsonValue::Number(n) => Some(Cow::Owned(n.to_string())),
        JsonValue::Bool(b) => Some(Cow::Owned(b.to_string())),
        _ => None,
    }
}

fn icontains(needle: &JsonValue, haystack: &JsonValue) -> bool {
    match (as_text(needle), as_text(haystack)) {
        (Some(needle), Some(haystack)) => haystack
            .to_lowercase()
            .contains(needle.to_lowercase().as_str()),
        _ => false,
    }
}

/// `None` when either side is not text or the pattern does not compile.
fn regex_match(needle: &JsonValue, haystack: &JsonValue) -> Option<bool> {
    let pattern = as_text(needle)?;
    let haystack = as_text(haystack)?;

    warn!(
        pattern = %pattern,
        "Evaluating regex filter locally; the Rust regex dialect may differ from the one the definition was authored against"
    );

    match Regex::new(&pattern) {
        Ok(regex) => Some(regex.is_match(&haystack)),
        Err(e) => {
            warn!(pattern = %pattern, error = %e, "Regex filter does not compile");
            None
        }
    }
}

fn as_number(value: &JsonValue) -> Option<f64> {
    match value {
        JsonValue::Number(n) => n.as_f64(),
        JsonValue::String(s) => s.trim().parse::<f64>().ok().filter(|n| n.is_finite()),
        _ => None,
    }
}

/// Numeric when both sides read as numbers, lexical when both are other
/// strings, otherwise incomparable.
fn compare(left: &JsonValue, right: &JsonValue) -> Option<Ordering> {
    if let (Some(l), Some(r)) = (as_number(left), as_number(right)) {
        return l.partial_cmp(&r);
    }
    match (left, right) {
        (JsonValue::String(l), JsonValue::String(r)) => Some(l.as_str().cmp(r.as_str())),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_exact_and_is_not() {
        assert!(evaluate(&json!("foo"), &json!("foo"), Operator::Exact));
        assert!(!evaluate(&json!("foo"), &json!("bar"), Operator::Exact));
        assert!(evaluate(&json!("foo"), &json!("bar"), Operator::IsNot));
        assert!(!evaluate(&json!("foo"), &json!("foo"), Operator::IsNot));
    }

    #[test]
    fn test_exact_does_not_coerce() {
        assert!(!evaluate(&json!("1"), &json!(1), Operator::Exact));
        assert!(!evaluate(&json!(true), &json!("true"), Operator::Exact));
        assert!(evaluate(&json!(1), &json!(1.0), Operator::Exact));
    }

    #[test]
    fn test_contains_is_case_sensitive() {
        assert!(evaluate(
            &json!("/insights"),
            &json!("https://x/insights"),
            Operator::Contains
        ));
        assert!(!evaluate(
            &json!("/Insights"),
            &json!("https://x/insights"),
            Operator::Contains
        ));
    }

    #[test]
    fn test_icontains_and_negation() {
        assert!(evaluate(&json!("HTTPS"), &json!("https://x"), Operator::IContains));
        assert!(!evaluate(&json!("HTTPS"), &json!("https://x"), Operator::NotIContains));
        assert!(evaluate(&json!("ftp"), &json!("https://x"), Operator::NotIContains));
    }

    #[test]
    fn test_contains_with_missing_live_value() {
        assert!(!evaluate(&json!("x"), &JsonValue::Null, Operator::Contains));
        assert!(!evaluate(&json!("x"), &JsonValue::Null, Operator::IContains));
        assert!(evaluate(&json!("x"), &JsonValue::Null, Operator::NotIContains));
    }

    #[test]
    fn test_regex_and_not_regex() {
        assert!(evaluate(&json!("^https://.*/docs$"), &json!("https://a.b/docs"), Operator::Regex));
        assert!(!evaluate(&json!("^/docs"), &json!("https://a.b/docs"), Operator::Regex));
        assert!(evaluate(&json!("^/docs"), &json!("https://a.b/docs"), Operator::NotRegex));
        assert!(!evaluate(&json!("docs"), &json!("https://a.b/docs"), Operator::NotRegex));
    }

    #[test]
    fn test_invalid_regex_never_matches() {
        assert!(!evaluate(&json!("(unclosed"), &json!("anything"), Operator::Regex));
        assert!(!evaluate(&json!("(unclosed"), &json!("anything"), Operator::NotRegex));
    }

    #[test]
    fn test_greater_and_less_than_numeric() {
        assert!(evaluate(&json!(10), &json!(15), Operator::GreaterThan));
        assert!(!evaluate(&json!(10), &json!(5), Operator::GreaterThan));
        assert!(evaluate(&json!(10), &json!(5), Operator::LessThan));
        assert!(!evaluate(&json!(10), &json!(10), Operator::LessThan));
        assert!(!evaluate(&json!(10), &json!(10), Operator::GreaterThan));
    }

    #[test]
    fn test_greater_than_numeric_strings_compare_as_numbers() {
        assert!(evaluate(&json!("9"), &json!("10"), Operator::GreaterThan));
        assert!(evaluate(&json!("10"), &json!(15), Operator::GreaterThan));
    }

    #[test]
    fn test_greater_than_plain_strings_compare_lexically() {
        assert!(evaluate(&json!("apple"), &json!("banana"), Operator::GreaterThan));
        assert!(evaluate(&json!("banana"), &json!("apple"), Operator::LessThan));
    }

    #[test]
    fn test_ordering_of_incomparable_values_is_false() {
        assert!(!evaluate(&json!(10), &json!("ten"), Operator::GreaterThan));
        assert!(!evaluate(&json!(10), &JsonValue::Null, Operator::LessThan));
        assert!(!evaluate(&json!(10), &json!(true), Operator::GreaterThan));
    }

    #[test]
    fn test_is_set_truth_table() {
        let unused = JsonValue::Null;
        assert!(evaluate(&unused, &json!(0), Operator::IsSet));
        assert!(evaluate(&unused, &json!(false), Operator::IsSet));
        assert!(evaluate(&unused, &json!("value"), Operator::IsSet));
        assert!(!evaluate(&unused, &json!(""), Operator::IsSet));
        assert!(!evaluate(&unused, &JsonValue::Null, Operator::IsSet));
    }

    #[test]
    fn test_is_not_set_truth_table() {
        let unused = JsonValue::Null;
        assert!(evaluate(&unused, &JsonValue::Null, Operator::IsNotSet));
        assert!(evaluate(&unused, &json!(""), Operator::IsNotSet));
        assert!(!evaluate(&unused, &json!(0), Operator::IsNotSet));
        assert!(!evaluate(&unused, &json!(false), Operator::IsNotSet));
    }

    #[test]
    fn test_unknown_operator_is_false() {
        assert!(!evaluate(&json!("a"), &json!("a"), Operator::Unknown));
    }

    #[test]
    fn test_operator_deserialization() {
        let op: Operator = serde_json::from_value(json!("icontains")).unwrap();
        assert_eq!(op, Operator::IContains);
        let op: Operator = serde_json::from_value(json!("is_not_set")).unwrap();
        assert_eq!(op, Operator::IsNotSet);
        let op: Operator = serde_json::from_value(json!("gt")).unwrap();
        assert_eq!(op, Operator::GreaterThan);
        let op: Operator = serde_json::from_value(json!("is_date_after")).unwrap();
        assert_eq!(op, Operator::Unknown);
    }
}
