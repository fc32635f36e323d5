//! Reddit collector: "new" listings of a few subreddits plus keyword searches
//! restricted to the same subreddits, through the app-only OAuth API.

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hirepulse_core::{non_blank, Canonical, SkipReason, SocialPost, SocialSource};
use hirepulse_storage::HttpFetcher;
use reqwest::header::CONTENT_TYPE;
use serde::Deserialize;
use serde_json::{Map, Value as JsonValue};
use tracing::{debug, info};

use crate::{AdapterError, FetchTarget, SourceAdapter};

pub const SOURCE_ID: &str = "reddit";
pub const METHOD_NEW: &str = "subreddit_new";
pub const METHOD_SEARCH: &str = "search";

const TOKEN_URL: &str = "https://www.reddit.com/api/v1/access_token";
const API_BASE: &str = "https://oauth.reddit.com";
const PERMALINK_BASE: &str = "https://www.reddit.com";

#[derive(Debug, Clone)]
pub struct RedditCredentials {
    pub client_id: String,
    pub client_secret: String,
    pub user_agent: String,
}

#[derive(Debug, Clone)]
pub struct RedditConfig {
    pub subreddits: Vec<String>,
    pub keywords: Vec<String>,
    pub limit_per_target: u32,
    pub subreddit_pause: Duration,
    pub search_pause: Duration,
}

impl Default for RedditConfig {
    fn default() -> Self {
        Self {
            subreddits: vec!["ethereum".into(), "CryptoCurrency".into(), "web3".into()],
            keywords: vec![
                "web3 developer salary".into(),
                "Coinbase hiring".into(),
                "blockchain skill demand".into(),
                "remote web3 role".into(),
            ],
            limit_per_target: 15,
            subreddit_pause: Duration::from_secs(1),
            search_pause: Duration::from_secs(2),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawRedditPost {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub selftext: Option<String>,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub subreddit: Option<String>,
    #[serde(default)]
    pub permalink: Option<String>,
    #[serde(default)]
    pub score: Option<i64>,
    #[serde(default)]
    pub upvote_ratio: Option<f64>,
    #[serde(default)]
    pub num_comments: Option<i64>,
    #[serde(default)]
    pub created_utc: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct Listing {
    data: ListingData,
}

#[derive(Debug, Deserialize)]
struct ListingData {
    #[serde(default)]
    children: Vec<ListingChild>,
}

#[derive(Debug, Deserialize)]
struct ListingChild {
    #[serde(default)]
    kind: String,
    data: RawRedditPost,
}

#[derive(Debug, Deserialize)]
struct AccessToken {
    access_token: String,
}

/// Submissions (`t3`) from a listing or search response body.
pub fn parse_listing(body: &[u8]) -> Result<Vec<RawRedditPost>, AdapterError> {
    let listing: Listing = serde_json::from_slice(body)
        .map_err(|e| AdapterError::Malformed(format!("reddit listing: {e}")))?;
    Ok(listing
        .data
        .children
        .into_iter()
        .filter(|child| child.kind.is_empty() || child.kind == "t3")
        .map(|child| child.data)
        .collect())
}

pub fn canonicalize_post(
    target: &FetchTarget,
    raw: RawRedditPost,
    collected_at: DateTime<Utc>,
) -> Canonical<SocialPost> {
    let Some(id) = non_blank(raw.id.as_deref()) else {
        return Canonical::Skip(SkipReason::MissingField("id"));
    };

    let mut attributes = Map::new();
    if let Some(subreddit) = raw.subreddit {
        attributes.insert("subreddit".into(), JsonValue::from(subreddit));
    }
    if let Some(score) = raw.score {
        attributes.insert("score".into(), JsonValue::from(score));
    }
    if let Some(ratio) = raw.upvote_ratio {
        attributes.insert("upvote_ratio".into(), JsonValue::from(ratio));
    }
    if let Some(comments) = raw.num_comments {
        attributes.insert("num_comments".into(), JsonValue::from(comments));
    }

    let created_at = raw.created_utc.and_then(|secs| {
        let whole = secs.trunc() as i64;
        let nanos = ((secs.fract()) * 1e9).round() as u32;
        DateTime::from_timestamp(whole, nanos.min(999_999_999))
    });

    Canonical::Record(SocialPost {
        source: SocialSource::Reddit,
        source_method: target.method.clone(),
        source_query: target.query.clone(),
        source_specific_id: id,
        title: non_blank(raw.title.as_deref()),
        text: raw.selftext.unwrap_or_default(),
        author: Some(non_blank(raw.author.as_deref()).unwrap_or_else(|| "[deleted]".to_string())),
        url: non_blank(raw.permalink.as_deref()).map(|p| format!("{PERMALINK_BASE}{p}")),
        created_at,
        collected_at,
        attributes,
        sentiment: None,
    })
}

#[derive(Debug)]
pub struct RedditAdapter {
    http: HttpFetcher,
    config: RedditConfig,
    access_token: String,
}

impl RedditAdapter {
    /// Authenticate (read-only, client credentials). Failing here means the
    /// vendor is unusable for this run.
    pub async fn connect(
        http: HttpFetcher,
        credentials: &RedditCredentials,
        config: RedditConfig,
    ) -> Result<Self, AdapterError> {
        let request = http
            .client()
            .post(TOKEN_URL)
            .basic_auth(&credentials.client_id, Some(&credentials.client_secret))
            .header(reqwest::header::USER_AGENT, &credentials.user_agent)
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body("grant_type=client_credentials")
            .build()?;
        let token: AccessToken = http.execute(SOURCE_ID, request).await?.json()?;
        info!(user_agent = %credentials.user_agent, "authenticated with reddit (read-only)");

        Ok(Self {
            http,
            config,
            access_token: token.access_token,
        })
    }

    fn search_scope(&self) -> String {
        self.config.subreddits.join("+")
    }
}

#[async_trait]
impl SourceAdapter for RedditAdapter {
    type Raw = RawRedditPost;
    type Record = SocialPost;

    fn source_id(&self) -> &'static str {
        SOURCE_ID
    }

    fn targets(&self) -> Vec<FetchTarget> {
        self.config
            .subreddits
            .iter()
            .map(|sub| FetchTarget::new(METHOD_NEW, sub.as_str()))
            .chain(
                self.config
                    .keywords
                    .iter()
                    .map(|kw| FetchTarget::new(METHOD_SEARCH, kw.as_str())),
            )
            .collect()
    }

    fn pause_after(&self, target: &FetchTarget) -> Duration {
        if target.method == METHOD_SEARCH {
            self.config.search_pause
        } else {
            self.config.subreddit_pause
        }
    }

    async fn fetch(&self, target: &FetchTarget) -> Result<Vec<RawRedditPost>, AdapterError> {
        let limit = self.config.limit_per_target.to_string();
        let request = if target.method == METHOD_SEARCH {
            self.http
                .client()
                .get(format!("{API_BASE}/r/{}/search", self.search_scope()))
                .query(&[
                    ("q", target.query.as_str()),
                    ("sort", "new"),
                    ("restrict_sr", "1"),
                    ("limit", limit.as_str()),
                    ("raw_json", "1"),
                ])
        } else {
            self.http
                .client()
                .get(format!("{API_BASE}/r/{}/new", target.query))
                .query(&[("limit", limit.as_str()), ("raw_json", "1")])
        }
        .bearer_auth(&self.access_token)
        .build()?;

        let response = self.http.execute(SOURCE_ID, request).await?;
        let mut posts = parse_listing(&response.body)?;

        if target.method == METHOD_SEARCH {
            let before = posts.len();
            posts = dedup_within_batch(posts);
            if posts.len() < before {
                debug!(dropped = before - posts.len(), "repeated ids in search results");
            }
        }
        Ok(posts)
    }

    fn canonicalize(
        &self,
        target: &FetchTarget,
        raw: RawRedditPost,
        collected_at: DateTime<Utc>,
    ) -> Canonical<SocialPost> {
        canonicalize_post(target, raw, collected_at)
    }
}

/// Drop repeated submission ids, keeping the first.
pub fn dedup_within_batch(posts: Vec<RawRedditPost>) -> Vec<RawRedditPost> {
    let mut seen = HashSet::new();
    posts
        .into_iter()
        .filter(|post| match &post.id {
            Some(id) => seen.insert(id.clone()),
            None => true,
        })
        .collect()
}
