//! # Normalizer
//!
//! Projects an untyped upstream payload into a [`NewsItem`]. The function is
//! total: any field may be missing or of the wrong type and the result is
//! still fully populated. Untyped data never travels past this module.
//!
//! Field lookups follow the feed's loose conventions: a value counts as
//! present when it is a non-empty string, a non-zero number or `true`.
//! Everything else (`null`, `false`, `""`, `0`, arrays, objects) is treated
//! as absent and falls through to the next candidate or the default.

use chrono::{DateTime, SecondsFormat, Utc};
use rand::Rng;
use regex::Regex;
use serde_json::Value;
use static_init::dynamic;
use std::collections::HashSet;

use super::model::{Category, NewsItem, DEFAULT_SOURCE};

/// The untyped payload as received from upstream.
pub type RawFeedMessage = Value;

#[dynamic]
static CONTRACT_RE: Regex = Regex::new(r"0x[a-fA-F0-9]{40}").expect("contract pattern is valid");

// ASCII word boundary: a ticker directly followed by non-ASCII text still counts.
#[dynamic]
static TOKEN_RE: Regex = Regex::new(r"\$([A-Z]{2,10})(?-u:\b)").expect("token pattern is valid");

/// Keyword rules in priority order. The first rule with a matching keyword wins.
const CATEGORY_RULES: &[(Category, &[&str])] = &[
    (Category::Launch, &["launch", "launching"]),
    (Category::Airdrop, &["airdrop"]),
    (Category::Listing, &["listing", "listed on"]),
    (Category::Security, &["hack", "exploit", "vulnerability", "alert"]),
];

const ID_TOKEN_LEN: usize = 6;

/// Returns `true` when the payload should be relayed: `type == "news"` or a
/// present `text` field.
pub fn is_news(raw: &RawFeedMessage) -> bool {
    raw.get("type").and_then(Value::as_str) == Some("news") || lookup(raw, "text").is_some()
}

/// # Normalize
///
/// Maps a raw feed message onto the canonical schema.
///
/// Deterministic except for the generated id and the current-time fallback
/// for `timestamp`. Categorization and extraction scan the first present of
/// `text` and `title`; `body` only feeds the item body.
pub fn normalize(raw: &RawFeedMessage) -> NewsItem {
    let scan_text = text_field(raw, "text")
        .or_else(|| text_field(raw, "title"))
        .unwrap_or_default();

    let title = text_field(raw, "title")
        .or_else(|| text_field(raw, "user").map(|user| format!("@{}", user)));

    NewsItem {
        id: text_field(raw, "id")
            .or_else(|| text_field(raw, "tweetId"))
            .unwrap_or_else(generate_id),
        source: text_field(raw, "source").unwrap_or_else(|| DEFAULT_SOURCE.to_string()),
        title,
        body: text_field(raw, "text")
            .or_else(|| text_field(raw, "body"))
            .unwrap_or_default(),
        url: text_field(raw, "url").or_else(|| text_field(raw, "link")),
        timestamp: timestamp_field(raw, "timestamp")
            .or_else(|| timestamp_field(raw, "createdAt"))
            .unwrap_or_else(now_iso8601),
        category: categorize(&scan_text),
        contracts: extract_contracts(&scan_text),
        tokens: extract_tokens(&scan_text),
    }
}

/// Classifies text by keyword, case-insensitively, in fixed priority order.
pub fn categorize(text: &str) -> Category {
    let lowered = text.to_lowercase();
    CATEGORY_RULES
        .iter()
        .find(|(_, keywords)| keywords.iter().any(|k| lowered.contains(k)))
        .map(|(category, _)| *category)
        .unwrap_or(Category::General)
}

/// Every `0x` + 40 hex digit sequence in `text`, deduplicated in order of
/// first occurrence. Case of the digits is preserved.
pub fn extract_contracts(text: &str) -> Vec<String> {
    dedup_in_order(CONTRACT_RE.find_iter(text).map(|m| m.as_str()))
}

/// Every `$TICKER` (2 to 10 upper-case letters, word-bounded) in `text`,
/// without the `$`, deduplicated in order of first occurrence.
pub fn extract_tokens(text: &str) -> Vec<String> {
    dedup_in_order(
        TOKEN_RE
            .captures_iter(text)
            .filter_map(|caps| caps.get(1).map(|m| m.as_str())),
    )
}

/// Current time as an ISO-8601 string with millisecond precision.
pub fn now_iso8601() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn dedup_in_order<'a>(items: impl Iterator<Item = &'a str>) -> Vec<String> {
    let mut seen = HashSet::new();
    items
        .filter(|item| seen.insert(*item))
        .map(str::to_string)
        .collect()
}

fn generate_id() -> String {
    let mut rng = rand::rng();
    let token: String = (0..ID_TOKEN_LEN)
        .filter_map(|_| std::char::from_digit(rng.random_range(0..36), 36))
        .collect();
    format!("news-{}-{}", Utc::now().timestamp_millis(), token)
}

/// Returns the field only when it is "present" under the feed's conventions.
fn lookup<'a>(raw: &'a RawFeedMessage, key: &str) -> Option<&'a Value> {
    let value = raw.get(key)?;
    let present = match value {
        Value::String(s) => !s.is_empty(),
        Value::Number(n) => n.as_f64() != Some(0.0),
        Value::Bool(b) => *b,
        _ => false,
    };
    present.then_some(value)
}

fn text_field(raw: &RawFeedMessage, key: &str) -> Option<String> {
    lookup(raw, key).map(|value| match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    })
}

/// Strings pass through untouched; numbers are epoch milliseconds.
fn timestamp_field(raw: &RawFeedMessage, key: &str) -> Option<String> {
    match lookup(raw, key)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => {
            let millis = n.as_i64().or_else(|| n.as_f64().map(|f| f as i64))?;
            Some(
                DateTime::<Utc>::from_timestamp_millis(millis)
                    .map(|dt| dt.to_rfc3339_opts(SecondsFormat::Millis, true))
                    .unwrap_or_else(|| n.to_string()),
            )
        }
        _ => None,
    }
}
