//! Idempotent sink contract.
//!
//! Records are inserted one at a time; a uniqueness conflict or a failed
//! insert affects only that record and the batch carries on.

use std::collections::{BTreeMap, HashSet};
use std::marker::PhantomData;
use std::ops::AddAssign;
use std::sync::Mutex;

use async_trait::async_trait;
use hirepulse_core::{RecordKey, SocialPost};
use serde::Serialize;
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    Duplicate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    Updated,
    NotFound,
}

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("table `{0}` does not exist")]
    MissingTable(&'static str),
    #[error("field `{0}` cannot be updated on this store")]
    UnsupportedField(String),
    #[error("{matched} records matched {key}, expected exactly one")]
    Ambiguous { key: RecordKey, matched: u64 },
    #[error("encoding {key}: {source}")]
    Encode {
        key: RecordKey,
        #[source]
        source: serde_json::Error,
    },
    #[error("store rejected {key}: {reason}")]
    Rejected { key: RecordKey, reason: String },
}

#[async_trait]
pub trait RecordSink<R: Sync>: Send + Sync {
    /// Insert unless `key` already exists. Any error must leave previously
    /// committed records untouched.
    async fn insert_one(&self, key: &RecordKey, record: &R) -> Result<InsertOutcome, SinkError>;

    /// Set one field on exactly one record.
    async fn update_field(
        &self,
        key: &RecordKey,
        field: &str,
        value: JsonValue,
    ) -> Result<UpdateOutcome, SinkError>;
}

/// Social posts that still need a sentiment score.
#[async_trait]
pub trait SentimentBacklog: Send + Sync {
    /// Oldest unscored posts whose trimmed text has at least
    /// `min_text_chars` characters. Shorter posts are never returned, so
    /// they cannot crowd scorable ones out of a batch.
    async fn posts_missing_sentiment(
        &self,
        limit: usize,
        min_text_chars: usize,
    ) -> Result<Vec<SocialPost>, SinkError>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpsertSummary {
    pub inserted: usize,
    pub skipped: usize,
}

impl UpsertSummary {
    pub fn attempted(&self) -> usize {
        self.inserted + self.skipped
    }
}

impl AddAssign for UpsertSummary {
    fn add_assign(&mut self, rhs: Self) {
        self.inserted += rhs.inserted;
        self.skipped += rhs.skipped;
    }
}

/// Insert every record, counting conflicts and per-record failures as skipped.
pub async fn upsert_batch<R, S, F>(sink: &S, records: &[R], key_fn: F) -> UpsertSummary
where
    R: Sync,
    S: RecordSink<R> + ?Sized,
    F: Fn(&R) -> RecordKey,
{
    let mut summary = UpsertSummary::default();
    for record in records {
        let key = key_fn(record);
        match sink.insert_one(&key, record).await {
            Ok(InsertOutcome::Inserted) => summary.inserted += 1,
            Ok(InsertOutcome::Duplicate) => summary.skipped += 1,
            Err(err) => {
                warn!(%key, error = %err, "insert failed, record skipped");
                summary.skipped += 1;
            }
        }
    }
    summary
}

/// Set-backed fake store. Records are kept as JSON documents so field updates
/// behave like the document store.
#[derive(Debug)]
pub struct MemorySink<R> {
    documents: Mutex<BTreeMap<RecordKey, JsonValue>>,
    failing_keys: HashSet<RecordKey>,
    _record: PhantomData<fn() -> R>,
}

impl<R> Default for MemorySink<R> {
    fn default() -> Self {
        Self {
            documents: Mutex::new(BTreeMap::new()),
            failing_keys: HashSet::new(),
            _record: PhantomData,
        }
    }
}

impl<R> MemorySink<R> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts for these keys fail with [`SinkError::Rejected`].
    pub fn failing_on(keys: impl IntoIterator<Item = RecordKey>) -> Self {
        Self {
            failing_keys: keys.into_iter().collect(),
            ..Self::default()
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, key: &RecordKey) -> bool {
        self.lock().contains_key(key)
    }

    pub fn document(&self, key: &RecordKey) -> Option<JsonValue> {
        self.lock().get(key).cloned()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<RecordKey, JsonValue>> {
        self.documents
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl<R> RecordSink<R> for MemorySink<R>
where
    R: Serialize + Sync,
{
    async fn insert_one(&self, key: &RecordKey, record: &R) -> Result<InsertOutcome, SinkError> {
        if self.failing_keys.contains(key) {
            return Err(SinkError::Rejected {
                key: key.clone(),
                reason: "injected failure".to_string(),
            });
        }
        let document = serde_json::to_value(record).map_err(|source| SinkError::Encode {
            key: key.clone(),
            source,
        })?;
        let mut documents = self.lock();
        if documents.contains_key(key) {
            return Ok(InsertOutcome::Duplicate);
        }
        documents.insert(key.clone(), document);
        Ok(InsertOutcome::Inserted)
    }

    async fn update_field(
        &self,
        key: &RecordKey,
        field: &str,
        value: JsonValue,
    ) -> Result<UpdateOutcome, SinkError> {
        let mut documents = self.lock();
        let Some(document) = documents.get_mut(key) else {
            return Ok(UpdateOutcome::NotFound);
        };
        let Some(object) = document.as_object_mut() else {
            return Err(SinkError::UnsupportedField(field.to_string()));
        };
        object.insert(field.to_string(), value);
        Ok(UpdateOutcome::Updated)
    }
}

#[async_trait]
impl SentimentBacklog for MemorySink<SocialPost> {
    async fn posts_missing_sentiment(
        &self,
        limit: usize,
        min_text_chars: usize,
    ) -> Result<Vec<SocialPost>, SinkError> {
        let documents = self.lock();
        let mut out = Vec::new();
        for (key, document) in documents.iter() {
            if out.len() >= limit {
                break;
            }
            if document.get("sentiment").is_some_and(|v| !v.is_null()) {
                continue;
            }
            let text_chars = document
                .get("text")
                .and_then(JsonValue::as_str)
                .map_or(0, |text| text.trim().chars().count());
            if text_chars < min_text_chars {
                continue;
            }
            match serde_json::from_value::<SocialPost>(document.clone()) {
                Ok(post) => out.push(post),
                Err(err) => warn!(%key, error = %err, "undecodable document skipped"),
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use hirepulse_core::JobPosting;

    fn job(url: &str, title: &str) -> JobPosting {
        JobPosting {
            title: title.to_string(),
            company_name: Some("Acme DAO".into()),
            location: None,
            salary_range: None,
            tags: vec![],
            source: "Web3.Career".into(),
            job_url: url.to_string(),
            description: None,
            external_id: None,
            is_remote: false,
            date_posted_epoch: None,
            raw_api_response: None,
            collected_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn same_key_in_one_batch_is_stored_once() {
        let sink = MemorySink::<JobPosting>::new();
        let batch = vec![job("https://j/1", "A"), job("https://j/1", "B")];
        let summary = upsert_batch(&sink, &batch, JobPosting::dedup_key).await;
        assert_eq!(summary, UpsertSummary { inserted: 1, skipped: 1 });
        let stored = sink.document(&batch[0].dedup_key()).unwrap();
        assert_eq!(stored["title"], "A");
    }

    #[tokio::test]
    async fn same_key_across_batches_is_a_no_op() {
        let sink = MemorySink::<JobPosting>::new();
        let first = upsert_batch(&sink, &[job("https://j/1", "A")], JobPosting::dedup_key).await;
        let second = upsert_batch(
            &sink,
            &[job("https://j/1", "A (edited)"), job("https://j/2", "C")],
            JobPosting::dedup_key,
        )
        .await;
        assert_eq!(first.inserted, 1);
        assert_eq!(second, UpsertSummary { inserted: 1, skipped: 1 });
        assert_eq!(second.attempted(), 2);
        assert_eq!(sink.len(), 2);
        assert_eq!(
            sink.document(&job("https://j/1", "").dedup_key()).unwrap()["title"],
            "A"
        );
    }

    #[tokio::test]
    async fn one_failing_record_does_not_abort_the_batch() {
        let batch: Vec<JobPosting> = (0..10)
            .map(|i| job(&format!("https://j/{i}"), "T"))
            .collect();
        let sink = MemorySink::failing_on([batch[4].dedup_key()]);
        let summary = upsert_batch(&sink, &batch, JobPosting::dedup_key).await;
        assert_eq!(summary, UpsertSummary { inserted: 9, skipped: 1 });
        for (i, record) in batch.iter().enumerate() {
            assert_eq!(sink.contains(&record.dedup_key()), i != 4);
        }
    }

    #[tokio::test]
    async fn update_field_reports_missing_records() {
        let sink = MemorySink::<JobPosting>::new();
        upsert_batch(&sink, &[job("https://j/1", "A")], JobPosting::dedup_key).await;
        let key = job("https://j/1", "").dedup_key();
        let outcome = sink
            .update_field(&key, "description", JsonValue::from("filled"))
            .await
            .unwrap();
        assert_eq!(outcome, UpdateOutcome::Updated);
        assert_eq!(sink.document(&key).unwrap()["description"], "filled");

        let missing = job("https://j/404", "").dedup_key();
        let outcome = sink
            .update_field(&missing, "description", JsonValue::Null)
            .await
            .unwrap();
        assert_eq!(outcome, UpdateOutcome::NotFound);
    }
}
