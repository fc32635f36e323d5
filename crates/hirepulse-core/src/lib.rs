//! Core domain model for hirepulse: canonical records, dedup keys and the
//! canonicalizer result type shared by every collector.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

pub const CRATE_NAME: &str = "hirepulse-core";

/// Leading glyph some job boards prefix to location strings.
pub const LOCATION_PIN: char = '📍';

/// Platform a social post was collected from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SocialSource {
    Reddit,
    Twitter,
}

impl SocialSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Reddit => "reddit",
            Self::Twitter => "twitter",
        }
    }
}

impl fmt::Display for SocialSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SocialSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "reddit" => Ok(Self::Reddit),
            "twitter" => Ok(Self::Twitter),
            other => Err(format!("unknown social source `{other}`")),
        }
    }
}

/// Polarity scores produced by the enrichment pass.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SentimentScore {
    pub compound: f64,
    pub pos: f64,
    pub neu: f64,
    pub neg: f64,
}

/// Canonical social-media post, stored as a document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SocialPost {
    pub source: SocialSource,
    pub source_method: String,
    pub source_query: String,
    pub source_specific_id: String,
    pub title: Option<String>,
    pub text: String,
    pub author: Option<String>,
    pub url: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub collected_at: DateTime<Utc>,
    /// Vendor metrics (score, upvote ratio, public metrics, ...).
    #[serde(default)]
    pub attributes: Map<String, JsonValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sentiment: Option<SentimentScore>,
}

impl SocialPost {
    pub fn dedup_key(&self) -> RecordKey {
        RecordKey::new(self.source.as_str(), &self.source_specific_id)
    }
}

/// Canonical job posting, stored as a relational row keyed by `job_url`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobPosting {
    pub title: String,
    pub company_name: Option<String>,
    pub location: Option<String>,
    pub salary_range: Option<String>,
    pub tags: Vec<String>,
    pub source: String,
    pub job_url: String,
    pub description: Option<String>,
    pub external_id: Option<String>,
    pub is_remote: bool,
    pub date_posted_epoch: Option<i64>,
    pub raw_api_response: Option<JsonValue>,
    pub collected_at: DateTime<Utc>,
}

impl JobPosting {
    pub const KEY_NAMESPACE: &'static str = "job_url";

    pub fn dedup_key(&self) -> RecordKey {
        RecordKey::new(Self::KEY_NAMESPACE, &self.job_url)
    }
}

/// Uniqueness key of a stored record: `(source, source_specific_id)` for
/// social posts, `("job_url", url)` for job postings.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordKey {
    pub namespace: String,
    pub id: String,
}

impl RecordKey {
    pub fn new(namespace: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            id: id.into(),
        }
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.namespace, self.id)
    }
}

/// Why a raw record was not turned into a canonical one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    MissingField(&'static str),
    NotARecord(String),
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingField(name) => write!(f, "missing required field `{name}`"),
            Self::NotARecord(detail) => write!(f, "not a record: {detail}"),
        }
    }
}

/// Canonicalizer output: a complete record or an explicit skip.
#[derive(Debug, Clone, PartialEq)]
pub enum Canonical<T> {
    Record(T),
    Skip(SkipReason),
}

impl<T> Canonical<T> {
    pub fn into_record(self) -> Option<T> {
        match self {
            Self::Record(record) => Some(record),
            Self::Skip(_) => None,
        }
    }

    pub fn is_skip(&self) -> bool {
        matches!(self, Self::Skip(_))
    }
}

/// Trimmed, non-empty text or `None`.
pub fn non_blank(value: Option<&str>) -> Option<String> {
    let trimmed = value?.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Location text with a leading pin glyph (and surrounding whitespace) removed.
pub fn strip_location_pin(location: &str) -> &str {
    location
        .trim_start()
        .trim_start_matches(LOCATION_PIN)
        .trim()
}

/// A posting is remote when it carries a `remote` tag (any case) or its
/// resolved location is exactly `Remote`.
pub fn derive_is_remote<S: AsRef<str>>(tags: &[S], location: Option<&str>) -> bool {
    tags.iter()
        .any(|tag| tag.as_ref().trim().eq_ignore_ascii_case("remote"))
        || location.is_some_and(|loc| strip_location_pin(loc) == "Remote")
}

/// Keep first occurrence order, drop blanks and exact repeats.
pub fn normalize_tags<I, S>(tags: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut out: Vec<String> = Vec::new();
    for tag in tags {
        let tag = tag.as_ref().trim();
        if !tag.is_empty() && !out.iter().any(|t| t == tag) {
            out.push(tag.to_string());
        }
    }
    out
}
