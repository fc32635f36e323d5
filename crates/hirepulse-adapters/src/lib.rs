//! Source adapter contract and the vendor adapters behind it.
//!
//! An adapter owns its credentials and HTTP client, lists the targets it
//! will fetch (subreddits, search queries, one API page, one HTML page) and
//! turns each raw vendor record into a canonical record or a skip.

pub mod cryptojobslist;
pub mod reddit;
pub mod twitter;
pub mod web3career;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hirepulse_core::Canonical;
use hirepulse_storage::FetchError;
use scraper::{ElementRef, Selector};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use cryptojobslist::{CryptoJobsListAdapter, CryptoJobsListConfig};
pub use reddit::{RedditAdapter, RedditConfig, RedditCredentials};
pub use twitter::{TwitterAdapter, TwitterConfig};
pub use web3career::{Web3CareerAdapter, Web3CareerConfig};

pub const CRATE_NAME: &str = "hirepulse-adapters";

/// One unit of fetching: a subreddit listing, a search keyword, an API page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchTarget {
    /// How records are found (`subreddit_new`, `search`, `search_recent`, ...).
    pub method: String,
    /// Subreddit, keyword, query string or URL.
    pub query: String,
}

impl FetchTarget {
    pub fn new(method: impl Into<String>, query: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            query: query.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum AdapterError {
    /// Network trouble, 5xx or rate limiting. The run may end early but the
    /// next scheduled run can succeed.
    #[error("transient fetch error: {0}")]
    Transient(FetchError),
    /// A request the vendor refuses (bad credentials, 4xx).
    #[error("fetch error: {0}")]
    Fetch(FetchError),
    /// The vendor answered but not in the shape we rely on.
    #[error("malformed response: {0}")]
    Malformed(String),
}

impl AdapterError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

impl From<FetchError> for AdapterError {
    fn from(err: FetchError) -> Self {
        if let FetchError::Decode { .. } = err {
            return Self::Malformed(err.to_string());
        }
        if err.is_transient() {
            Self::Transient(err)
        } else {
            Self::Fetch(err)
        }
    }
}

impl From<reqwest::Error> for AdapterError {
    fn from(err: reqwest::Error) -> Self {
        FetchError::Request(err).into()
    }
}

#[async_trait]
pub trait SourceAdapter: Send + Sync {
    type Raw: Send;
    type Record: Send + Sync;

    fn source_id(&self) -> &'static str;

    /// Targets in fetch order.
    fn targets(&self) -> Vec<FetchTarget>;

    /// Fixed politeness pause after `target` has been fetched and stored.
    fn pause_after(&self, _target: &FetchTarget) -> Duration {
        Duration::ZERO
    }

    /// Fetch one target. "Nothing new" is `Ok(vec![])`.
    async fn fetch(&self, target: &FetchTarget) -> Result<Vec<Self::Raw>, AdapterError>;

    fn canonicalize(
        &self,
        target: &FetchTarget,
        raw: Self::Raw,
        collected_at: DateTime<Utc>,
    ) -> Canonical<Self::Record>;
}

pub(crate) fn text_or_none(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

pub(crate) fn selector(css: &str) -> Result<Selector, AdapterError> {
    Selector::parse(css).map_err(|e| AdapterError::Malformed(format!("selector `{css}`: {e}")))
}

pub(crate) fn element_text(element: ElementRef<'_>) -> Option<String> {
    text_or_none(&element.text().collect::<String>())
}
