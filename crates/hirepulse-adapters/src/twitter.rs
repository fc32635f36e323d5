//! Twitter v2 recent search (last seven days).

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hirepulse_core::{non_blank, Canonical, SkipReason, SocialPost, SocialSource};
use hirepulse_storage::{FetchError, FetchedResponse, HttpFetcher};
use serde::Deserialize;
use serde_json::{Map, Value as JsonValue};
use tracing::{debug, info, warn};

use crate::{AdapterError, FetchTarget, SourceAdapter};

pub const SOURCE_ID: &str = "twitter";
pub const METHOD_SEARCH_RECENT: &str = "search_recent";

const SEARCH_URL: &str = "https://api.twitter.com/2/tweets/search/recent";
const TWEET_FIELDS: &str = "created_at,public_metrics,author_id,lang,geo";
const FALLBACK_RATE_LIMIT_WAIT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct TwitterConfig {
    pub queries: Vec<String>,
    pub max_results: u32,
    pub query_pause: Duration,
    /// Upper bound for the self-throttling sleep on HTTP 429.
    pub max_rate_limit_wait: Duration,
}

impl Default for TwitterConfig {
    fn default() -> Self {
        Self {
            queries: vec![
                "(#Web3Jobs OR #CryptoHiring OR #BlockchainCareers) -is:retweet lang:en".into(),
                "(\"web3 developer salary\" OR \"blockchain developer pay\") -is:retweet lang:en"
                    .into(),
                "(from:Coinbase OR from:binance OR from:ethereum) (hiring OR jobs OR career)"
                    .into(),
                "#DeFiJobs -is:retweet lang:en".into(),
            ],
            max_results: 10,
            query_pause: Duration::from_secs(1),
            max_rate_limit_wait: Duration::from_secs(900),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawTweet {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub author_id: Option<String>,
    #[serde(default)]
    pub lang: Option<String>,
    /// Kept as text so one badly formatted timestamp cannot fail the page.
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub public_metrics: Option<JsonValue>,
    #[serde(default)]
    pub geo: Option<JsonValue>,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    data: Option<Vec<RawTweet>>,
    #[serde(default)]
    errors: Option<Vec<JsonValue>>,
}

/// Tweets from a search response. API-level `errors` without `data` are
/// logged and treated as an empty result.
pub fn parse_search_response(body: &[u8]) -> Result<Vec<RawTweet>, AdapterError> {
    let response: SearchResponse = serde_json::from_slice(body)
        .map_err(|e| AdapterError::Malformed(format!("twitter search response: {e}")))?;
    match (response.data, response.errors) {
        (Some(tweets), _) => Ok(tweets),
        (None, Some(errors)) if !errors.is_empty() => {
            warn!(errors = %JsonValue::from(errors), "api returned errors for query");
            Ok(Vec::new())
        }
        _ => Ok(Vec::new()),
    }
}

pub fn canonicalize_tweet(
    target: &FetchTarget,
    raw: RawTweet,
    collected_at: DateTime<Utc>,
) -> Canonical<SocialPost> {
    let Some(id) = non_blank(raw.id.as_deref()) else {
        return Canonical::Skip(SkipReason::MissingField("id"));
    };

    let created_at = raw.created_at.as_deref().and_then(|text| {
        match DateTime::parse_from_rfc3339(text) {
            Ok(parsed) => Some(parsed.with_timezone(&Utc)),
            Err(err) => {
                debug!(tweet_id = %id, created_at = text, error = %err, "unparseable created_at");
                None
            }
        }
    });

    let mut attributes = Map::new();
    if let Some(author_id) = &raw.author_id {
        attributes.insert("author_id".into(), JsonValue::from(author_id.clone()));
    }
    if let Some(lang) = raw.lang {
        attributes.insert("language".into(), JsonValue::from(lang));
    }
    if let Some(metrics) = raw.public_metrics {
        attributes.insert("public_metrics".into(), metrics);
    }
    if let Some(geo) = raw.geo {
        attributes.insert("geo".into(), geo);
    }

    Canonical::Record(SocialPost {
        source: SocialSource::Twitter,
        source_method: target.method.clone(),
        source_query: target.query.clone(),
        url: Some(format!("https://twitter.com/i/web/status/{id}")),
        source_specific_id: id,
        title: None,
        text: raw.text.unwrap_or_default(),
        author: raw.author_id,
        created_at,
        collected_at,
        attributes,
        sentiment: None,
    })
}

#[derive(Debug)]
pub struct TwitterAdapter {
    http: HttpFetcher,
    bearer_token: String,
    config: TwitterConfig,
}

impl TwitterAdapter {
    pub fn new(http: HttpFetcher, bearer_token: String, config: TwitterConfig) -> Self {
        Self {
            http,
            bearer_token,
            config,
        }
    }

    async fn search_once(&self, query: &str) -> Result<FetchedResponse, FetchError> {
        // The endpoint rejects max_results outside 10..=100.
        let max_results = self.config.max_results.clamp(10, 100).to_string();
        let request = self
            .http
            .client()
            .get(SEARCH_URL)
            .query(&[
                ("query", query),
                ("max_results", max_results.as_str()),
                ("tweet.fields", TWEET_FIELDS),
            ])
            .bearer_auth(&self.bearer_token)
            .build()?;
        self.http.execute(SOURCE_ID, request).await
    }
}

#[async_trait]
impl SourceAdapter for TwitterAdapter {
    type Raw = RawTweet;
    type Record = SocialPost;

    fn source_id(&self) -> &'static str {
        SOURCE_ID
    }

    fn targets(&self) -> Vec<FetchTarget> {
        self.config
            .queries
            .iter()
            .map(|q| FetchTarget::new(METHOD_SEARCH_RECENT, q.as_str()))
            .collect()
    }

    fn pause_after(&self, _target: &FetchTarget) -> Duration {
        self.config.query_pause
    }

    /// On HTTP 429 the client waits for the advertised reset (capped) and
    /// retries the query once.
    async fn fetch(&self, target: &FetchTarget) -> Result<Vec<RawTweet>, AdapterError> {
        let response = match self.search_once(&target.query).await {
            Err(FetchError::RateLimited { reset_after, .. }) => {
                let wait = rate_limit_wait(reset_after, self.config.max_rate_limit_wait);
                info!(wait_secs = wait.as_secs(), "rate limit hit, pausing before retry");
                tokio::time::sleep(wait).await;
                self.search_once(&target.query).await?
            }
            other => other?,
        };
        let tweets = parse_search_response(&response.body)?;
        info!(received = tweets.len(), "tweets received");
        Ok(tweets)
    }

    fn canonicalize(
        &self,
        target: &FetchTarget,
        raw: RawTweet,
        collected_at: DateTime<Utc>,
    ) -> Canonical<SocialPost> {
        canonicalize_tweet(target, raw, collected_at)
    }
}

pub fn rate_limit_wait(reset_after: Option<Duration>, cap: Duration) -> Duration {
    reset_after.unwrap_or(FALLBACK_RATE_LIMIT_WAIT).min(cap)
}
