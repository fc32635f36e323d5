use std::fmt;

use hirepulse_core::SocialPost;
use hirepulse_storage::{RecordSink, SentimentBacklog, SinkError, UpdateOutcome};
use tracing::{debug, info, warn};

use crate::sentiment::PolarityModel;

pub const SENTIMENT_FIELD: &str = "sentiment";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnrichmentConfig {
    pub batch_size: usize,
    pub min_text_chars: usize,
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            batch_size: 50,
            min_text_chars: 5,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnrichmentSummary {
    /// Posts returned by the backlog query.
    pub considered: usize,
    pub updated: usize,
    /// Left without a score because the text is too short.
    pub too_short: usize,
    /// The update matched no stored post.
    pub not_found: usize,
    /// Scoring or update failures.
    pub errors: usize,
}

impl fmt::Display for EnrichmentSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "sentiment: processed={} updated={} skipped={} (too_short={} not_found={} errors={})",
            self.considered,
            self.updated,
            self.too_short + self.not_found + self.errors,
            self.too_short,
            self.not_found,
            self.errors,
        )
    }
}

/// Scores one batch of social posts that have no sentiment yet.
pub struct EnrichmentPass<'a, M: PolarityModel + ?Sized> {
    model: &'a M,
    config: EnrichmentConfig,
}

impl<'a, M: PolarityModel + ?Sized> EnrichmentPass<'a, M> {
    pub fn new(model: &'a M, config: EnrichmentConfig) -> Self {
        Self { model, config }
    }

    /// Only a failing backlog query is an error; everything per post is
    /// counted in the summary.
    pub async fn run<S>(&self, store: &S) -> Result<EnrichmentSummary, SinkError>
    where
        S: SentimentBacklog + RecordSink<SocialPost> + ?Sized,
    {
        let posts = store
            .posts_missing_sentiment(self.config.batch_size, self.config.min_text_chars)
            .await?;
        let mut summary = EnrichmentSummary {
            considered: posts.len(),
            ..Default::default()
        };
        info!(count = posts.len(), "posts awaiting sentiment");

        for post in posts {
            let key = post.dedup_key();
            // The backlog query already filters, but a concurrent writer may not.
            if post.sentiment.is_some() {
                debug!(%key, "already scored");
                continue;
            }
            let text = post.text.trim();
            if text.chars().count() < self.config.min_text_chars {
                summary.too_short += 1;
                continue;
            }

            let score = match self.model.polarity(text) {
                Ok(score) => score,
                Err(err) => {
                    warn!(%key, error = %err, "sentiment analysis failed");
                    summary.errors += 1;
                    continue;
                }
            };
            let value = match serde_json::to_value(score) {
                Ok(value) => value,
                Err(err) => {
                    warn!(%key, error = %err, "sentiment not encodable");
                    summary.errors += 1;
                    continue;
                }
            };

            match store.update_field(&key, SENTIMENT_FIELD, value).await {
                Ok(UpdateOutcome::Updated) => summary.updated += 1,
                Ok(UpdateOutcome::NotFound) => {
                    warn!(%key, "sentiment update matched no post");
                    summary.not_found += 1;
                }
                Err(err) => {
                    warn!(%key, error = %err, "sentiment update failed");
                    summary.errors += 1;
                }
            }
        }

        info!(
            updated = summary.updated,
            too_short = summary.too_short,
            errors = summary.errors,
            "sentiment pass finished"
        );
        Ok(summary)
    }
}
