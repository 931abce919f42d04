//! Timestamp parsing and formatting for the delivery target
//!
//! The webhook expects timestamps ending in the literal offset `+0000`.
//! Two formatting policies are supported and selected by configuration.

use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Offset suffix required by the delivery target.
pub const TARGET_OFFSET: &str = "+0000";

/// How event timestamps are rendered for delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimestampPolicy {
    /// Parse, drop sub-second precision, render as `YYYY-MM-DDTHH:mm:ss+0000`.
    /// Unparseable input is returned unchanged.
    #[default]
    Reformat,
    /// Rewrite only a trailing `Z`, `+00:00` or `+00` to `+0000`.
    RewriteOffset,
}

impl TimestampPolicy {
    /// Formats `input` according to this policy.
    ///
    /// # Examples
    ///
    /// ```
    /// use gclid_export::conversion::TimestampPolicy;
    ///
    /// let input = "2021-11-09T21:58:36.973000+00:00";
    /// assert_eq!(TimestampPolicy::Reformat.format(input), "2021-11-09T21:58:36+0000");
    /// assert_eq!(TimestampPolicy::RewriteOffset.format(input), "2021-11-09T21:58:36.973000+0000");
    /// ```
    pub fn format(&self, input: &str) -> String {
        match self {
            Self::Reformat => reformat(input),
            Self::RewriteOffset => rewrite_offset(input),
        }
    }

    /// Parses a policy name (`reformat` or `rewrite_offset`).
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().replace('-', "_").as_str() {
            "reformat" => Some(Self::Reformat),
            "rewrite_offset" => Some(Self::RewriteOffset),
            _ => None,
        }
    }
}

/// Parses an ISO-8601-like timestamp into UTC.
///
/// Accepts RFC 3339 (`Z` or `+HH:MM` offsets), the short `+HH` offset,
/// compact `+HHMM` offsets, naive date-times (taken as UTC) and bare dates
/// (taken as UTC midnight).
pub fn parse_timestamp(input: &str) -> Option<DateTime<Utc>> {
    let input = input.trim();
    if input.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(input) {
        return Some(dt.with_timezone(&Utc));
    }

    if has_short_offset(input) {
        if let Ok(dt) = DateTime::parse_from_rfc3339(&format!("{}:00", input)) {
            return Some(dt.with_timezone(&Utc));
        }
    }

    if let Ok(dt) = DateTime::parse_from_str(input, "%Y-%m-%dT%H:%M:%S%.f%z") {
        return Some(dt.with_timezone(&Utc));
    }

    for pattern in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(input, pattern) {
            return Some(naive.and_utc());
        }
    }

    NaiveDate::parse_from_str(input, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

/// True for inputs ending in a two-digit offset such as `+00` or `-05`.
fn has_short_offset(input: &str) -> bool {
    let bytes = input.as_bytes();
    let len = bytes.len();
    len > 3
        && input.contains('T')
        && matches!(bytes[len - 3], b'+' | b'-')
        && bytes[len - 2].is_ascii_digit()
        && bytes[len - 1].is_ascii_digit()
        && bytes[len - 4].is_ascii_digit()
}

/// Renders a watermark timestamp (RFC 3339, UTC, millisecond precision).
pub fn render_watermark(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn reformat(input: &str) -> String {
    match parse_timestamp(input) {
        Some(dt) => format!("{}{}", dt.format("%Y-%m-%dT%H:%M:%S"), TARGET_OFFSET),
        None => {
            warn!(timestamp = %input, "Received invalid date; passing it through unchanged");
            input.to_string()
        }
    }
}

fn rewrite_offset(input: &str) -> String {
    for marker in ["+00:00", "+00", "Z"] {
        if let Some(stem) = input.strip_suffix(marker) {
            return format!("{}{}", stem, TARGET_OFFSET);
        }
    }
    input.to_string()
}
