//! # Canonical News Model
//!
//! The schema-stable record every subscriber receives. Field names and the
//! `null` conventions are part of the wire contract: `title` and `url` are
//! nullable, `contracts` and `tokens` are always present (possibly empty).

use serde::{Deserialize, Serialize};
use std::fmt;

/// Source label used when the upstream payload does not name one.
pub const DEFAULT_SOURCE: &str = "tree_of_alpha";

/// Identifier carried by the synthetic item sent on connect.
pub const WELCOME_ID: &str = "welcome";

/// Source label carried by the synthetic item sent on connect.
pub const WELCOME_SOURCE: &str = "system";

/// # News Category
///
/// Keyword-derived classification. Serialized in lower case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    /// Nothing more specific matched.
    #[default]
    General,
    /// Project or product launches.
    Launch,
    /// Token airdrops.
    Airdrop,
    /// Exchange listings.
    Listing,
    /// Hacks, exploits, vulnerabilities and alerts.
    Security,
}

impl Category {
    /// The wire name of the category.
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::General => "general",
            Category::Launch => "launch",
            Category::Airdrop => "airdrop",
            Category::Listing => "listing",
            Category::Security => "security",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// # News Item
///
/// A normalized upstream message. Built once by the normalizer and never
/// mutated afterwards; it has no identity beyond `id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewsItem {
    /// Upstream `id`/`tweetId`, or a generated `news-<millis>-<token>`.
    pub id: String,
    /// Upstream `source`, or [`DEFAULT_SOURCE`].
    pub source: String,
    /// Upstream `title`, else `@user`, else `null`.
    pub title: Option<String>,
    /// Upstream `text` or `body`, else empty.
    pub body: String,
    /// Upstream `url` or `link`, else `null`.
    pub url: Option<String>,
    /// ISO-8601 timestamp.
    pub timestamp: String,
    /// Keyword-derived category.
    pub category: Category,
    /// `0x`-prefixed 40-hex-digit addresses, first occurrence order, no duplicates.
    pub contracts: Vec<String>,
    /// `$TICKER` symbols without the `$`, first occurrence order, no duplicates.
    pub tokens: Vec<String>,
}

/// Title and body of the synthetic item every subscriber receives on connect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WelcomeMessage {
    /// Becomes the welcome item's `title`.
    pub title: String,
    /// Becomes the welcome item's `body`.
    pub body: String,
}

impl Default for WelcomeMessage {
    fn default() -> Self {
        Self {
            title: "Connected".to_string(),
            body: "Connected to AlfaDAO News Server. Streaming live crypto news from Tree of Alpha."
                .to_string(),
        }
    }
}

impl NewsItem {
    /// Builds the welcome item sent to a subscriber right after it connects.
    pub fn welcome(welcome: &WelcomeMessage) -> Self {
        Self {
            id: WELCOME_ID.to_string(),
            source: WELCOME_SOURCE.to_string(),
            title: Some(welcome.title.clone()),
            body: welcome.body.clone(),
            url: None,
            timestamp: super::normalizer::now_iso8601(),
            category: Category::General,
            contracts: Vec::new(),
            tokens: Vec::new(),
        }
    }

    /// Serializes the item into its wire form.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// First `max_chars` characters of the body (falling back to the title),
    /// used for log lines.
    pub fn preview(&self, max_chars: usize) -> String {
        let text = if self.body.is_empty() {
            self.title.as_deref().unwrap_or("")
        } else {
            self.body.as_str()
        };
        text.chars().take(max_chars).collect()
    }
}
