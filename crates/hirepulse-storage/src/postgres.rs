//! Postgres-backed stores.
//!
//! `social_media_posts` is used as a document collection: each post is a
//! JSONB document plus the columns needed for the uniqueness constraint and
//! the sentiment backlog query. `job_postings` is a plain relational table
//! that operators create up front (see `schema/job_postings.sql`).

use std::time::Duration;

use async_trait::async_trait;
use hirepulse_core::{JobPosting, RecordKey, SocialPost};
use serde_json::Value as JsonValue;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::Row;
use tracing::{info, warn};

use crate::sink::{InsertOutcome, RecordSink, SentimentBacklog, SinkError, UpdateOutcome};

pub const SOCIAL_TABLE: &str = "social_media_posts";
pub const JOBS_TABLE: &str = "job_postings";

const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);

/// Open a small pool and prove the server answers before any vendor work.
pub async fn connect(database_url: &str) -> Result<PgPool, SinkError> {
    let pool = PgPoolOptions::new()
        .max_connections(2)
        .acquire_timeout(ACQUIRE_TIMEOUT)
        .connect(database_url)
        .await?;
    sqlx::query("SELECT 1").execute(&pool).await?;
    Ok(pool)
}

pub async fn table_exists(pool: &PgPool, table: &str) -> Result<bool, SinkError> {
    let row = sqlx::query(
        "SELECT EXISTS (SELECT FROM information_schema.tables WHERE table_name = $1) AS present",
    )
    .bind(table)
    .fetch_one(pool)
    .await?;
    Ok(row.try_get("present")?)
}

fn expect_single_match(key: &RecordKey, matched: u64) -> Result<UpdateOutcome, SinkError> {
    match matched {
        0 => Ok(UpdateOutcome::NotFound),
        1 => Ok(UpdateOutcome::Updated),
        n => Err(SinkError::Ambiguous {
            key: key.clone(),
            matched: n,
        }),
    }
}

#[derive(Debug, Clone)]
pub struct PgSocialStore {
    pool: PgPool,
}

impl PgSocialStore {
    /// Ensure the collection table and its compound unique index exist.
    pub async fn open(pool: PgPool) -> Result<Self, SinkError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS social_media_posts (
                id                    BIGSERIAL PRIMARY KEY,
                source                TEXT NOT NULL,
                source_specific_id    TEXT NOT NULL,
                source_method         TEXT NOT NULL,
                source_query          TEXT NOT NULL,
                document              JSONB NOT NULL,
                sentiment             JSONB,
                sentiment_analyzed_at TIMESTAMPTZ,
                collected_at          TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&pool)
        .await?;
        sqlx::query(
            r#"
            CREATE UNIQUE INDEX IF NOT EXISTS social_media_posts_source_id_key
                ON social_media_posts (source, source_specific_id)
            "#,
        )
        .execute(&pool)
        .await?;
        info!(table = SOCIAL_TABLE, "unique index on (source, source_specific_id) ensured");
        Ok(Self { pool })
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl RecordSink<SocialPost> for PgSocialStore {
    async fn insert_one(
        &self,
        key: &RecordKey,
        record: &SocialPost,
    ) -> Result<InsertOutcome, SinkError> {
        let document = serde_json::to_value(record).map_err(|source| SinkError::Encode {
            key: key.clone(),
            source,
        })?;
        let result = sqlx::query(
            r#"
            INSERT INTO social_media_posts
                (source, source_specific_id, source_method, source_query, document, collected_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (source, source_specific_id) DO NOTHING
            "#,
        )
        .bind(&key.namespace)
        .bind(&key.id)
        .bind(&record.source_method)
        .bind(&record.source_query)
        .bind(document)
        .bind(record.collected_at)
        .execute(&self.pool)
        .await?;

        Ok(if result.rows_affected() > 0 {
            InsertOutcome::Inserted
        } else {
            InsertOutcome::Duplicate
        })
    }

    async fn update_field(
        &self,
        key: &RecordKey,
        field: &str,
        value: JsonValue,
    ) -> Result<UpdateOutcome, SinkError> {
        let mut tx = self.pool.begin().await?;
        let result = if field == "sentiment" {
            sqlx::query(
                r#"
                UPDATE social_media_posts
                   SET sentiment = $1,
                       sentiment_analyzed_at = NOW(),
                       document = jsonb_set(document, '{sentiment}', $1, true)
                 WHERE source = $2
                   AND source_specific_id = $3
                "#,
            )
            .bind(&value)
            .bind(&key.namespace)
            .bind(&key.id)
            .execute(&mut *tx)
            .await?
        } else {
            sqlx::query(
                r#"
                UPDATE social_media_posts
                   SET document = jsonb_set(document, ARRAY[$1::text], $2, true)
                 WHERE source = $3
                   AND source_specific_id = $4
                "#,
            )
            .bind(field)
            .bind(&value)
            .bind(&key.namespace)
            .bind(&key.id)
            .execute(&mut *tx)
            .await?
        };

        let outcome = expect_single_match(key, result.rows_affected());
        if matches!(outcome, Ok(UpdateOutcome::Updated)) {
            tx.commit().await?;
        } else {
            tx.rollback().await?;
        }
        outcome
    }
}

#[async_trait]
impl SentimentBacklog for PgSocialStore {
    async fn posts_missing_sentiment(
        &self,
        limit: usize,
        min_text_chars: usize,
    ) -> Result<Vec<SocialPost>, SinkError> {
        let rows = sqlx::query(
            r#"
            SELECT source, source_specific_id, document
              FROM social_media_posts
             WHERE sentiment IS NULL
               AND char_length(btrim(coalesce(document->>'text', ''), E' \t\r\n\f')) >= $2
             ORDER BY collected_at ASC
             LIMIT $1
            "#,
        )
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .bind(i32::try_from(min_text_chars).unwrap_or(i32::MAX))
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let document: JsonValue = row.try_get("document")?;
            match serde_json::from_value::<SocialPost>(document) {
                Ok(post) => out.push(post),
                Err(err) => {
                    let source: String = row.try_get("source")?;
                    let id: String = row.try_get("source_specific_id")?;
                    warn!(source, id, error = %err, "undecodable social document skipped");
                }
            }
        }
        Ok(out)
    }
}

#[derive(Debug, Clone)]
pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    /// The jobs table is managed outside this tool; refuse to run without it.
    pub async fn open(pool: PgPool) -> Result<Self, SinkError> {
        if !table_exists(&pool, JOBS_TABLE).await? {
            return Err(SinkError::MissingTable(JOBS_TABLE));
        }
        info!(table = JOBS_TABLE, "table found");
        Ok(Self { pool })
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl RecordSink<JobPosting> for PgJobStore {
    /// One transaction per row: a failing row is rolled back alone.
    async fn insert_one(
        &self,
        key: &RecordKey,
        record: &JobPosting,
    ) -> Result<InsertOutcome, SinkError> {
        let mut tx = self.pool.begin().await?;
        let result = sqlx::query(
            r#"
            INSERT INTO job_postings (
                title, company_name, location, salary_range, tags, source,
                job_url, description, external_id, is_remote, date_posted_epoch,
                raw_api_response, collected_at
            ) VALUES (
                $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13
            )
            ON CONFLICT (job_url) DO NOTHING
            "#,
        )
        .bind(&record.title)
        .bind(&record.company_name)
        .bind(&record.location)
        .bind(&record.salary_range)
        .bind(&record.tags)
        .bind(&record.source)
        .bind(&key.id)
        .bind(&record.description)
        .bind(&record.external_id)
        .bind(record.is_remote)
        .bind(record.date_posted_epoch)
        .bind(&record.raw_api_response)
        .bind(record.collected_at)
        .execute(&mut *tx)
        .await;

        match result {
            Ok(done) => {
                tx.commit().await?;
                Ok(if done.rows_affected() > 0 {
                    InsertOutcome::Inserted
                } else {
                    InsertOutcome::Duplicate
                })
            }
            Err(err) => {
                if let Err(rollback_err) = tx.rollback().await {
                    warn!(%key, error = %rollback_err, "rollback failed");
                }
                Err(err.into())
            }
        }
    }

    /// Job rows are write-once.
    async fn update_field(
        &self,
        _key: &RecordKey,
        field: &str,
        _value: JsonValue,
    ) -> Result<UpdateOutcome, SinkError> {
        Err(SinkError::UnsupportedField(field.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_match_counts_map_to_outcomes() {
        let key = RecordKey::new("reddit", "abc");
        assert_eq!(
            expect_single_match(&key, 0).unwrap(),
            UpdateOutcome::NotFound
        );
        assert_eq!(expect_single_match(&key, 1).unwrap(), UpdateOutcome::Updated);
        assert!(matches!(
            expect_single_match(&key, 3),
            Err(SinkError::Ambiguous { matched: 3, .. })
        ));
    }

    #[tokio::test]
    async fn job_rows_reject_field_updates() {
        let pool = PgPoolOptions::new()
            .connect_lazy("postgres://hirepulse@localhost/hirepulse_jobs")
            .unwrap();
        let store = PgJobStore { pool };
        let key = RecordKey::new(JobPosting::KEY_NAMESPACE, "https://web3.career/j/1");
        let err = store
            .update_field(&key, "description", JsonValue::from("edited"))
            .await
            .unwrap_err();
        assert!(matches!(err, SinkError::UnsupportedField(field) if field == "description"));
    }
}
