//! Persistence seams and HTTP fetch utilities for hirepulse.
//!
//! - [`HttpFetcher`] wraps a single reqwest client, classifies failures as
//!   transient or permanent and optionally archives every fetched body.
//! - [`sink`] holds the idempotent sink contract and the in-memory fake.
//! - [`postgres`] holds the Postgres-backed document and relational stores.

pub mod postgres;
pub mod sink;

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use chrono::{DateTime, Utc};
use reqwest::header::HeaderMap;
use reqwest::{StatusCode, Url};
use serde::de::DeserializeOwned;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info_span, warn, Instrument};
use uuid::Uuid;

pub use sink::{
    upsert_batch, InsertOutcome, MemorySink, RecordSink, SentimentBacklog, SinkError,
    UpdateOutcome, UpsertSummary,
};

pub const CRATE_NAME: &str = "hirepulse-storage";

/// Query parameters that must never reach a log line.
pub const SECRET_QUERY_PARAMS: &[&str] = &["token", "access_token", "api_key"];

#[derive(Debug, Clone)]
pub struct ArchivedResponse {
    pub content_hash: String,
    pub relative_path: PathBuf,
    pub absolute_path: PathBuf,
    pub byte_size: usize,
    pub deduplicated: bool,
}

/// Content-addressed archive of raw vendor responses, kept for audit.
#[derive(Debug, Clone)]
pub struct ResponseArchive {
    root: PathBuf,
}

impl ResponseArchive {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn sha256_hex(bytes: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        hex::encode(hasher.finalize())
    }

    /// `<YYYYmmdd>/<source_id>/<sha256>.<ext>`
    pub fn relative_path_for(
        fetched_at: DateTime<Utc>,
        source_id: &str,
        content_hash: &str,
        content_type: &str,
    ) -> PathBuf {
        PathBuf::from(fetched_at.format("%Y%m%d").to_string())
            .join(source_id)
            .join(format!("{content_hash}.{}", extension_for(content_type)))
    }

    /// Write `bytes` once per content hash. Concurrent or repeated writes of the
    /// same body resolve to the same file via temp-file + rename.
    pub async fn archive(
        &self,
        fetched_at: DateTime<Utc>,
        source_id: &str,
        content_type: &str,
        bytes: &[u8],
    ) -> anyhow::Result<ArchivedResponse> {
        let content_hash = Self::sha256_hex(bytes);
        let relative_path =
            Self::relative_path_for(fetched_at, source_id, &content_hash, content_type);
        let absolute_path = self.root.join(&relative_path);
        let archived = |deduplicated| ArchivedResponse {
            content_hash: content_hash.clone(),
            relative_path: relative_path.clone(),
            absolute_path: absolute_path.clone(),
            byte_size: bytes.len(),
            deduplicated,
        };

        let parent = absolute_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.root.clone());
        fs::create_dir_all(&parent)
            .await
            .with_context(|| format!("creating archive directory {}", parent.display()))?;

        if fs::try_exists(&absolute_path)
            .await
            .with_context(|| format!("checking archive path {}", absolute_path.display()))?
        {
            return Ok(archived(true));
        }

        let temp_path = parent.join(format!(".{}.partial", Uuid::new_v4()));
        let mut file = fs::OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&temp_path)
            .await
            .with_context(|| format!("opening {}", temp_path.display()))?;
        file.write_all(bytes)
            .await
            .with_context(|| format!("writing {}", temp_path.display()))?;
        file.flush()
            .await
            .with_context(|| format!("flushing {}", temp_path.display()))?;
        drop(file);

        match fs::rename(&temp_path, &absolute_path).await {
            Ok(()) => Ok(archived(false)),
            Err(err) => {
                let _ = fs::remove_file(&temp_path).await;
                if fs::try_exists(&absolute_path).await.unwrap_or(false) {
                    return Ok(archived(true));
                }
                Err(err).with_context(|| {
                    format!(
                        "renaming {} -> {}",
                        temp_path.display(),
                        absolute_path.display()
                    )
                })
            }
        }
    }
}

fn extension_for(content_type: &str) -> &'static str {
    let mime = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    match mime.as_str() {
        "text/html" => "html",
        "application/json" => "json",
        "text/plain" => "txt",
        _ => "bin",
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchDisposition {
    /// Worth trying again on a later run: network trouble, 5xx, 429.
    Transient,
    /// The request or response is wrong and will stay wrong.
    Permanent,
}

pub fn classify_status(status: StatusCode) -> FetchDisposition {
    if status.is_server_error()
        || status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
    {
        FetchDisposition::Transient
    } else {
        FetchDisposition::Permanent
    }
}

pub fn classify_reqwest_error(err: &reqwest::Error) -> FetchDisposition {
    if err.is_timeout() || err.is_connect() || err.is_request() || err.is_body() {
        FetchDisposition::Transient
    } else {
        FetchDisposition::Permanent
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http status {status} for {url}: {snippet}")]
    HttpStatus {
        status: u16,
        url: String,
        snippet: String,
    },
    #[error("rate limited by {url}")]
    RateLimited {
        url: String,
        reset_after: Option<Duration>,
    },
    #[error("undecodable response from {url}: {message}")]
    Decode { url: String, message: String },
}

impl FetchError {
    pub fn disposition(&self) -> FetchDisposition {
        match self {
            Self::Request(err) => classify_reqwest_error(err),
            Self::HttpStatus { status, .. } => StatusCode::from_u16(*status)
                .map(classify_status)
                .unwrap_or(FetchDisposition::Permanent),
            Self::RateLimited { .. } => FetchDisposition::Transient,
            Self::Decode { .. } => FetchDisposition::Permanent,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.disposition() == FetchDisposition::Transient
    }
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub user_agent: Option<String>,
    pub archive_dir: Option<PathBuf>,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(25),
            user_agent: None,
            archive_dir: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FetchedResponse {
    pub status: StatusCode,
    pub final_url: String,
    pub content_type: String,
    pub body: Vec<u8>,
    pub fetched_at: DateTime<Utc>,
}

impl FetchedResponse {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, FetchError> {
        serde_json::from_slice(&self.body).map_err(|err| FetchError::Decode {
            url: redact_url(&self.final_url),
            message: err.to_string(),
        })
    }
}

/// One reqwest client per collector run. Requests are executed one at a time;
/// there is no retry loop here, callers decide what a failure means.
#[derive(Debug)]
pub struct HttpFetcher {
    client: reqwest::Client,
    archive: Option<ResponseArchive>,
}

impl HttpFetcher {
    pub fn new(config: HttpClientConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout);

        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }

        let client = builder.build().context("building reqwest client")?;
        Ok(Self {
            client,
            archive: config.archive_dir.map(ResponseArchive::new),
        })
    }

    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    pub async fn get(&self, source_id: &str, url: &str) -> Result<FetchedResponse, FetchError> {
        let request = self.client.get(url).build()?;
        self.execute(source_id, request).await
    }

    /// Execute a prepared request; non-2xx statuses become typed errors.
    pub async fn execute(
        &self,
        source_id: &str,
        request: reqwest::Request,
    ) -> Result<FetchedResponse, FetchError> {
        let logged_url = redact_url(request.url().as_str());
        let span = info_span!("http_fetch", source_id, url = %logged_url);

        async move {
            // reqwest errors embed the full URL, query secrets included.
            let resp = self.client.execute(request).await.map_err(|e| e.without_url())?;
            let status = resp.status();
            let final_url = resp.url().to_string();

            if status == StatusCode::TOO_MANY_REQUESTS {
                let reset_after = rate_limit_reset(resp.headers(), Utc::now());
                warn!(?reset_after, "rate limited");
                return Err(FetchError::RateLimited {
                    url: redact_url(&final_url),
                    reset_after,
                });
            }

            if !status.is_success() {
                let body = resp.text().await.unwrap_or_default();
                return Err(FetchError::HttpStatus {
                    status: status.as_u16(),
                    url: redact_url(&final_url),
                    snippet: body.chars().take(500).collect(),
                });
            }

            let content_type = resp
                .headers()
                .get(reqwest::header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .unwrap_or("application/octet-stream")
                .to_string();
            let body = resp.bytes().await.map_err(|e| e.without_url())?.to_vec();
            let fetched_at = Utc::now();
            debug!(status = status.as_u16(), bytes = body.len(), "fetched");

            if let Some(archive) = &self.archive {
                if let Err(err) = archive
                    .archive(fetched_at, source_id, &content_type, &body)
                    .await
                {
                    warn!(error = %err, "failed to archive response body");
                }
            }

            Ok(FetchedResponse {
                status,
                final_url,
                content_type,
                body,
                fetched_at,
            })
        }
        .instrument(span)
        .await
    }
}

/// Delay advertised by a 429 response, from `retry-after` (seconds) or
/// `x-rate-limit-reset` (unix epoch seconds).
pub fn rate_limit_reset(headers: &HeaderMap, now: DateTime<Utc>) -> Option<Duration> {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<i64>().ok())
    };

    if let Some(secs) = header("retry-after") {
        return Some(Duration::from_secs(secs.max(0) as u64));
    }
    header("x-rate-limit-reset").map(|reset_epoch| {
        let wait = reset_epoch - now.timestamp();
        Duration::from_secs(wait.max(0) as u64)
    })
}

/// Replace secret query parameter values with `***`.
pub fn redact_url(raw: &str) -> String {
    let Ok(mut url) = Url::parse(raw) else {
        return raw.to_string();
    };
    if url.query().is_none() {
        return raw.to_string();
    }
    let pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| {
            let v = if SECRET_QUERY_PARAMS.contains(&k.as_ref()) {
                "***".to_string()
            } else {
                v.into_owned()
            };
            (k.into_owned(), v)
        })
        .collect();
    url.query_pairs_mut().clear().extend_pairs(pairs);
    url.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;
    use tempfile::tempdir;

    #[test]
    fn archive_hashing_is_stable() {
        let hash = ResponseArchive::sha256_hex(b"hello world");
        assert_eq!(
            hash,
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[tokio::test]
    async fn identical_bodies_are_archived_once() {
        let dir = tempdir().expect("tempdir");
        let archive = ResponseArchive::new(dir.path());
        let fetched_at = DateTime::parse_from_rfc3339("2026-02-24T12:00:00Z")
            .expect("ts")
            .with_timezone(&Utc);

        let first = archive
            .archive(fetched_at, "web3career", "application/json; charset=utf-8", b"[]")
            .await
            .expect("first archive");
        let second = archive
            .archive(fetched_at, "web3career", "application/json", b"[]")
            .await
            .expect("second archive");

        assert!(!first.deduplicated);
        assert!(second.deduplicated);
        assert_eq!(first.relative_path, second.relative_path);
        assert!(first
            .relative_path
            .to_string_lossy()
            .ends_with(&format!("{}.json", first.content_hash)));
        assert!(first.absolute_path.exists());
    }

    #[test]
    fn status_classification() {
        assert_eq!(
            classify_status(StatusCode::TOO_MANY_REQUESTS),
            FetchDisposition::Transient
        );
        assert_eq!(
            classify_status(StatusCode::BAD_GATEWAY),
            FetchDisposition::Transient
        );
        assert_eq!(
            classify_status(StatusCode::UNAUTHORIZED),
            FetchDisposition::Permanent
        );
        let decode = FetchError::Decode {
            url: "https://example.test".into(),
            message: "eof".into(),
        };
        assert!(!decode.is_transient());
    }

    #[test]
    fn token_is_redacted_from_urls() {
        let redacted = redact_url("https://web3.career/api/v1?token=s3cret&limit=100");
        assert!(!redacted.contains("s3cret"));
        assert!(redacted.contains("limit=100"));
        assert_eq!(redact_url("https://cryptojobslist.com/"), "https://cryptojobslist.com/");
    }

    #[test]
    fn rate_limit_reset_prefers_retry_after() {
        let now = Utc::now();
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-rate-limit-reset",
            HeaderValue::from_str(&(now.timestamp() + 30).to_string()).unwrap(),
        );
        assert_eq!(rate_limit_reset(&headers, now), Some(Duration::from_secs(30)));
        headers.insert("retry-after", HeaderValue::from_static("7"));
        assert_eq!(rate_limit_reset(&headers, now), Some(Duration::from_secs(7)));
        assert_eq!(rate_limit_reset(&HeaderMap::new(), now), None);
    }
}
