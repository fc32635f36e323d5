//! Process configuration: secrets from the environment (after `.env`),
//! tuning from an optional YAML file.

use std::path::{Path, PathBuf};
use std::time::Duration;

use dotenvy::dotenv;
use hirepulse_adapters::{
    CryptoJobsListConfig, RedditConfig, RedditCredentials, TwitterConfig, Web3CareerConfig,
};
use hirepulse_storage::HttpClientConfig;
use serde::Deserialize;
use thiserror::Error;

pub const SOCIAL_DATABASE_URL: &str = "SOCIAL_DATABASE_URL";
pub const JOBS_DATABASE_URL: &str = "JOBS_DATABASE_URL";
pub const REDDIT_CLIENT_ID: &str = "REDDIT_CLIENT_ID";
pub const REDDIT_CLIENT_SECRET: &str = "REDDIT_CLIENT_SECRET";
pub const REDDIT_USER_AGENT: &str = "REDDIT_USER_AGENT";
pub const TWITTER_BEARER_TOKEN: &str = "TWITTER_BEARER_TOKEN";
pub const WEB3_CAREER_API_KEY: &str = "WEB3_CAREER_API_KEY";
pub const CONFIG_PATH_VAR: &str = "HIREPULSE_CONFIG";
pub const SCHEDULE_CRON_VAR: &str = "HIREPULSE_SCHEDULE_CRON";

pub const DEFAULT_CONFIG_PATH: &str = "hirepulse.yaml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("reading config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parsing config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("invalid value for {field}: {message}")]
    Invalid { field: &'static str, message: String },
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RedditTuning {
    pub subreddits: Vec<String>,
    pub keywords: Vec<String>,
    pub limit: u32,
    pub subreddit_pause_secs: u64,
    pub search_pause_secs: u64,
}

impl Default for RedditTuning {
    fn default() -> Self {
        let defaults = RedditConfig::default();
        Self {
            subreddits: defaults.subreddits,
            keywords: defaults.keywords,
            limit: defaults.limit_per_target,
            subreddit_pause_secs: defaults.subreddit_pause.as_secs(),
            search_pause_secs: defaults.search_pause.as_secs(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct TwitterTuning {
    pub queries: Vec<String>,
    pub limit: u32,
    pub query_pause_secs: u64,
    pub max_rate_limit_wait_secs: u64,
}

impl Default for TwitterTuning {
    fn default() -> Self {
        let defaults = TwitterConfig::default();
        Self {
            queries: defaults.queries,
            limit: defaults.max_results,
            query_pause_secs: defaults.query_pause.as_secs(),
            max_rate_limit_wait_secs: defaults.max_rate_limit_wait.as_secs(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Web3CareerTuning {
    pub endpoint: String,
    pub limit: u32,
    pub show_description: bool,
}

impl Default for Web3CareerTuning {
    fn default() -> Self {
        let defaults = Web3CareerConfig::default();
        Self {
            endpoint: defaults.endpoint,
            limit: defaults.limit,
            show_description: defaults.show_description,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct CryptoJobsListTuning {
    pub page_url: String,
    pub base_url: String,
    pub user_agent: String,
}

impl Default for CryptoJobsListTuning {
    fn default() -> Self {
        let defaults = CryptoJobsListConfig::default();
        Self {
            page_url: defaults.page_url,
            base_url: defaults.base_url,
            user_agent: defaults.user_agent,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct EnrichmentTuning {
    pub batch_size: usize,
    pub min_text_chars: usize,
}

impl Default for EnrichmentTuning {
    fn default() -> Self {
        Self {
            batch_size: 50,
            min_text_chars: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct OrchestratorTuning {
    pub stage_timeout_secs: u64,
    pub inter_stage_pause_secs: u64,
    pub schedule_cron: String,
}

impl Default for OrchestratorTuning {
    fn default() -> Self {
        Self {
            stage_timeout_secs: 900,
            inter_stage_pause_secs: 5,
            schedule_cron: "0 0 */6 * * *".to_string(),
        }
    }
}

/// Non-secret knobs. Every field has a default, so an absent file or a
/// partial file is fine.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Tuning {
    pub http_timeout_secs: u64,
    pub archive_dir: Option<PathBuf>,
    pub reddit: RedditTuning,
    pub twitter: TwitterTuning,
    pub web3career: Web3CareerTuning,
    pub cryptojobslist: CryptoJobsListTuning,
    pub enrichment: EnrichmentTuning,
    pub orchestrator: OrchestratorTuning,
}

impl Default for Tuning {
    fn default() -> Self {
        Self {
            http_timeout_secs: 25,
            archive_dir: None,
            reddit: RedditTuning::default(),
            twitter: TwitterTuning::default(),
            web3career: Web3CareerTuning::default(),
            cryptojobslist: CryptoJobsListTuning::default(),
            enrichment: EnrichmentTuning::default(),
            orchestrator: OrchestratorTuning::default(),
        }
    }
}

impl Tuning {
    pub fn from_yaml_str(raw: &str, path: &Path) -> Result<Self, ConfigError> {
        let tuning: Self = serde_yaml::from_str(raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        tuning.validate()?;
        Ok(tuning)
    }

    /// Load `path`. A missing file yields defaults unless `required`.
    pub fn load(path: &Path, required: bool) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(raw) => Self::from_yaml_str(&raw, path),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound && !required => {
                Ok(Self::default())
            }
            Err(source) => Err(ConfigError::Io {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.http_timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "http_timeout_secs",
                message: "must be positive".into(),
            });
        }
        if self.orchestrator.stage_timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "orchestrator.stage_timeout_secs",
                message: "must be positive".into(),
            });
        }
        if self.enrichment.batch_size == 0 {
            return Err(ConfigError::Invalid {
                field: "enrichment.batch_size",
                message: "must be positive".into(),
            });
        }
        Ok(())
    }

    pub fn http_client(&self, user_agent: Option<String>) -> HttpClientConfig {
        HttpClientConfig {
            timeout: Duration::from_secs(self.http_timeout_secs),
            user_agent,
            archive_dir: self.archive_dir.clone(),
        }
    }

    pub fn reddit_config(&self) -> RedditConfig {
        RedditConfig {
            subreddits: self.reddit.subreddits.clone(),
            keywords: self.reddit.keywords.clone(),
            limit_per_target: self.reddit.limit,
            subreddit_pause: Duration::from_secs(self.reddit.subreddit_pause_secs),
            search_pause: Duration::from_secs(self.reddit.search_pause_secs),
        }
    }

    pub fn twitter_config(&self) -> TwitterConfig {
        TwitterConfig {
            queries: self.twitter.queries.clone(),
            max_results: self.twitter.limit,
            query_pause: Duration::from_secs(self.twitter.query_pause_secs),
            max_rate_limit_wait: Duration::from_secs(self.twitter.max_rate_limit_wait_secs),
        }
    }

    pub fn web3career_config(&self) -> Web3CareerConfig {
        Web3CareerConfig {
            endpoint: self.web3career.endpoint.clone(),
            limit: self.web3career.limit,
            show_description: self.web3career.show_description,
        }
    }

    pub fn cryptojobslist_config(&self) -> CryptoJobsListConfig {
        CryptoJobsListConfig {
            page_url: self.cryptojobslist.page_url.clone(),
            base_url: self.cryptojobslist.base_url.clone(),
            user_agent: self.cryptojobslist.user_agent.clone(),
        }
    }

    pub fn stage_timeout(&self) -> Duration {
        Duration::from_secs(self.orchestrator.stage_timeout_secs)
    }

    pub fn inter_stage_pause(&self) -> Duration {
        Duration::from_secs(self.orchestrator.inter_stage_pause_secs)
    }
}

/// Everything a stage may need. Secrets stay optional here; each stage asks
/// only for its own and fails with [`ConfigError::Missing`] otherwise.
#[derive(Clone)]
pub struct Settings {
    pub tuning: Tuning,
    social_database_url: Option<String>,
    jobs_database_url: Option<String>,
    reddit_client_id: Option<String>,
    reddit_client_secret: Option<String>,
    reddit_user_agent: Option<String>,
    twitter_bearer_token: Option<String>,
    web3_career_api_key: Option<String>,
}

impl std::fmt::Debug for Settings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let set = |v: &Option<String>| if v.is_some() { "<set>" } else { "<unset>" };
        f.debug_struct("Settings")
            .field("tuning", &self.tuning)
            .field("social_database_url", &set(&self.social_database_url))
            .field("jobs_database_url", &set(&self.jobs_database_url))
            .field("reddit_client_id", &set(&self.reddit_client_id))
            .field("reddit_client_secret", &set(&self.reddit_client_secret))
            .field("reddit_user_agent", &self.reddit_user_agent)
            .field("twitter_bearer_token", &set(&self.twitter_bearer_token))
            .field("web3_career_api_key", &set(&self.web3_career_api_key))
            .finish()
    }
}

impl Settings {
    /// Load `.env` if present, then read the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenv();
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let (path, required) = match var(CONFIG_PATH_VAR) {
            Some(path) => (PathBuf::from(path), true),
            None => (PathBuf::from(DEFAULT_CONFIG_PATH), false),
        };
        let mut tuning = Tuning::load(&path, required)?;
        if let Some(cron) = var(SCHEDULE_CRON_VAR) {
            tuning.orchestrator.schedule_cron = cron;
        }

        Ok(Self {
            tuning,
            social_database_url: var(SOCIAL_DATABASE_URL),
            jobs_database_url: var(JOBS_DATABASE_URL),
            reddit_client_id: var(REDDIT_CLIENT_ID),
            reddit_client_secret: var(REDDIT_CLIENT_SECRET),
            reddit_user_agent: var(REDDIT_USER_AGENT),
            twitter_bearer_token: var(TWITTER_BEARER_TOKEN),
            web3_career_api_key: var(WEB3_CAREER_API_KEY),
        })
    }

    fn require<'a>(value: &'a Option<String>, name: &'static str) -> Result<&'a str, ConfigError> {
        value.as_deref().ok_or(ConfigError::Missing(name))
    }

    pub fn social_database_url(&self) -> Result<&str, ConfigError> {
        Self::require(&self.social_database_url, SOCIAL_DATABASE_URL)
    }

    pub fn jobs_database_url(&self) -> Result<&str, ConfigError> {
        Self::require(&self.jobs_database_url, JOBS_DATABASE_URL)
    }

    pub fn reddit_credentials(&self) -> Result<RedditCredentials, ConfigError> {
        Ok(RedditCredentials {
            client_id: Self::require(&self.reddit_client_id, REDDIT_CLIENT_ID)?.to_string(),
            client_secret: Self::require(&self.reddit_client_secret, REDDIT_CLIENT_SECRET)?
                .to_string(),
            user_agent: Self::require(&self.reddit_user_agent, REDDIT_USER_AGENT)?.to_string(),
        })
    }

    pub fn twitter_bearer_token(&self) -> Result<&str, ConfigError> {
        Self::require(&self.twitter_bearer_token, TWITTER_BEARER_TOKEN)
    }

    pub fn web3_career_api_key(&self) -> Result<&str, ConfigError> {
        Self::require(&self.web3_career_api_key, WEB3_CAREER_API_KEY)
    }
}
