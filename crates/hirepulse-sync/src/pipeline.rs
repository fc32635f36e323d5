//! Fetch, canonicalize, upsert: one vendor run.

use std::fmt;

use chrono::Utc;
use hirepulse_adapters::{
    AdapterError, CryptoJobsListAdapter, RedditAdapter, SourceAdapter, TwitterAdapter,
    Web3CareerAdapter,
};
use hirepulse_core::{Canonical, JobPosting, RecordKey, SocialPost};
use hirepulse_storage::postgres::{self, PgJobStore, PgSocialStore};
use hirepulse_storage::{upsert_batch, HttpFetcher, RecordSink, UpsertSummary};
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::config::Settings;
use crate::enrichment::{EnrichmentConfig, EnrichmentPass, EnrichmentSummary};
use crate::sentiment::LexiconModel;
use crate::{Disposition, PipelineError, Stage};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Completed,
    /// A fetch failed; targets after it were not attempted.
    EndedEarly { transient: bool, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestionSummary {
    pub source_id: &'static str,
    pub targets_attempted: usize,
    /// Raw records received from the vendor.
    pub processed: usize,
    /// Raw records that canonicalized to a skip.
    pub invalid: usize,
    pub upsert: UpsertSummary,
    pub outcome: RunOutcome,
}

impl IngestionSummary {
    fn new(source_id: &'static str) -> Self {
        Self {
            source_id,
            targets_attempted: 0,
            processed: 0,
            invalid: 0,
            upsert: UpsertSummary::default(),
            outcome: RunOutcome::Completed,
        }
    }

    pub fn inserted(&self) -> usize {
        self.upsert.inserted
    }

    /// Duplicates, failed inserts and invalid raw records.
    pub fn skipped(&self) -> usize {
        self.upsert.skipped + self.invalid
    }

    /// A transient early end still counts as success; the next run retries.
    pub fn succeeded(&self) -> bool {
        match &self.outcome {
            RunOutcome::Completed => true,
            RunOutcome::EndedEarly { transient, .. } => *transient,
        }
    }
}

impl fmt::Display for IngestionSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: processed={} inserted={} skipped={} (duplicate/error={} invalid={})",
            self.source_id,
            self.processed,
            self.inserted(),
            self.skipped(),
            self.upsert.skipped,
            self.invalid,
        )?;
        if let RunOutcome::EndedEarly { transient, reason } = &self.outcome {
            let kind = if *transient { "transient" } else { "fatal" };
            write!(f, "; ended early ({kind}): {reason}")?;
        }
        Ok(())
    }
}

/// Run every target of `adapter` in order, storing each target's records
/// before moving on. A fetch failure ends the run; what was already stored
/// stays stored.
pub async fn run_ingestion<A, S, K>(adapter: &A, sink: &S, key_fn: K) -> IngestionSummary
where
    A: SourceAdapter,
    S: RecordSink<A::Record> + ?Sized,
    K: Fn(&A::Record) -> RecordKey,
{
    let mut summary = IngestionSummary::new(adapter.source_id());
    let targets = adapter.targets();

    for (index, target) in targets.iter().enumerate() {
        let span = info_span!("target", method = %target.method, query = %target.query);
        summary.targets_attempted += 1;

        let raws = match adapter.fetch(target).instrument(span.clone()).await {
            Ok(raws) => raws,
            Err(err) => {
                end_early(&mut summary, &err);
                break;
            }
        };

        let collected_at = Utc::now();
        let mut records = Vec::with_capacity(raws.len());
        for raw in raws {
            summary.processed += 1;
            match adapter.canonicalize(target, raw, collected_at) {
                Canonical::Record(record) => records.push(record),
                Canonical::Skip(reason) => {
                    summary.invalid += 1;
                    debug!(parent: &span, %reason, "raw record skipped");
                }
            }
        }

        let batch = upsert_batch(sink, &records, &key_fn)
            .instrument(span.clone())
            .await;
        info!(
            parent: &span,
            inserted = batch.inserted,
            skipped = batch.skipped,
            "target stored"
        );
        summary.upsert += batch;

        if index + 1 < targets.len() {
            let pause = adapter.pause_after(target);
            if !pause.is_zero() {
                tokio::time::sleep(pause).await;
            }
        }
    }

    summary
}

fn end_early(summary: &mut IngestionSummary, err: &AdapterError) {
    let transient = match Disposition::for_fetch(err) {
        Disposition::EndRun { success } => success,
        Disposition::Abort | Disposition::HaltSequence => false,
    };
    if transient {
        warn!(source = summary.source_id, error = %err, "transient fetch failure, ending run early");
    } else {
        error!(source = summary.source_id, error = %err, "fetch failed, ending run");
    }
    summary.outcome = RunOutcome::EndedEarly {
        transient,
        reason: err.to_string(),
    };
}

/// Result of one stage invoked through [`run_stage`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageOutcome {
    Ingestion(IngestionSummary),
    Enrichment(EnrichmentSummary),
}

impl StageOutcome {
    pub fn succeeded(&self) -> bool {
        match self {
            Self::Ingestion(summary) => summary.succeeded(),
            Self::Enrichment(_) => true,
        }
    }
}

impl fmt::Display for StageOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ingestion(summary) => summary.fmt(f),
            Self::Enrichment(summary) => summary.fmt(f),
        }
    }
}

pub async fn run_stage(stage: Stage, settings: &Settings) -> Result<StageOutcome, PipelineError> {
    let span = info_span!("stage", stage = %stage);
    async move {
        info!("stage starting");
        let result = match stage {
            Stage::Web3Career => collect_web3career(settings).await.map(StageOutcome::Ingestion),
            Stage::CryptoJobsList => collect_cryptojobslist(settings)
                .await
                .map(StageOutcome::Ingestion),
            Stage::Reddit => collect_reddit(settings).await.map(StageOutcome::Ingestion),
            Stage::Twitter => collect_twitter(settings).await.map(StageOutcome::Ingestion),
            Stage::Sentiment => enrich_sentiment(settings).await.map(StageOutcome::Enrichment),
        };
        match result {
            Ok(outcome) => {
                info!(succeeded = outcome.succeeded(), "stage finished");
                Ok(outcome)
            }
            Err(err) => {
                let disposition = Disposition::for_pipeline(&err);
                error!(?disposition, error = %err, "stage aborted");
                Err(err)
            }
        }
    }
    .instrument(span)
    .await
}

fn http_fetcher(settings: &Settings, user_agent: Option<String>) -> Result<HttpFetcher, PipelineError> {
    HttpFetcher::new(settings.tuning.http_client(user_agent)).map_err(PipelineError::HttpClient)
}

async fn open_job_store(settings: &Settings) -> Result<PgJobStore, PipelineError> {
    let pool = postgres::connect(settings.jobs_database_url()?).await?;
    match PgJobStore::open(pool.clone()).await {
        Ok(store) => Ok(store),
        Err(err) => {
            pool.close().await;
            Err(err.into())
        }
    }
}

async fn open_social_store(settings: &Settings) -> Result<PgSocialStore, PipelineError> {
    let pool = postgres::connect(settings.social_database_url()?).await?;
    match PgSocialStore::open(pool.clone()).await {
        Ok(store) => Ok(store),
        Err(err) => {
            pool.close().await;
            Err(err.into())
        }
    }
}

pub async fn collect_web3career(settings: &Settings) -> Result<IngestionSummary, PipelineError> {
    let api_key = settings.web3_career_api_key()?.to_string();
    settings.jobs_database_url()?;
    let http = http_fetcher(settings, None)?;
    let adapter = Web3CareerAdapter::new(http, api_key, settings.tuning.web3career_config());

    let store = open_job_store(settings).await?;
    let summary = run_ingestion(&adapter, &store, JobPosting::dedup_key).await;
    store.close().await;
    Ok(summary)
}

pub async fn collect_cryptojobslist(
    settings: &Settings,
) -> Result<IngestionSummary, PipelineError> {
    settings.jobs_database_url()?;
    let http = http_fetcher(settings, None)?;
    let adapter = CryptoJobsListAdapter::new(http, settings.tuning.cryptojobslist_config());

    let store = open_job_store(settings).await?;
    let summary = run_ingestion(&adapter, &store, JobPosting::dedup_key).await;
    store.close().await;
    Ok(summary)
}

pub async fn collect_reddit(settings: &Settings) -> Result<IngestionSummary, PipelineError> {
    let credentials = settings.reddit_credentials()?;
    settings.social_database_url()?;
    let http = http_fetcher(settings, Some(credentials.user_agent.clone()))?;

    let store = open_social_store(settings).await?;
    let adapter =
        match RedditAdapter::connect(http, &credentials, settings.tuning.reddit_config()).await {
            Ok(adapter) => adapter,
            Err(err) => {
                store.close().await;
                return Err(PipelineError::Auth(err));
            }
        };
    let summary = run_ingestion(&adapter, &store, SocialPost::dedup_key).await;
    store.close().await;
    Ok(summary)
}

pub async fn collect_twitter(settings: &Settings) -> Result<IngestionSummary, PipelineError> {
    let bearer_token = settings.twitter_bearer_token()?.to_string();
    settings.social_database_url()?;
    let http = http_fetcher(settings, None)?;
    let adapter = TwitterAdapter::new(http, bearer_token, settings.tuning.twitter_config());

    let store = open_social_store(settings).await?;
    let summary = run_ingestion(&adapter, &store, SocialPost::dedup_key).await;
    store.close().await;
    Ok(summary)
}

pub async fn enrich_sentiment(settings: &Settings) -> Result<EnrichmentSummary, PipelineError> {
    settings.social_database_url()?;
    let model = LexiconModel::embedded()?;
    let config = EnrichmentConfig {
        batch_size: settings.tuning.enrichment.batch_size,
        min_text_chars: settings.tuning.enrichment.min_text_chars,
    };

    let store = open_social_store(settings).await?;
    let result = EnrichmentPass::new(&model, config).run(&store).await;
    store.close().await;
    Ok(result?)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use chrono::DateTime;
    use hirepulse_adapters::FetchTarget;
    use hirepulse_core::SkipReason;
    use hirepulse_storage::{FetchError, MemorySink};

    use super::*;

    fn job(url: &str, title: &str) -> JobPosting {
        JobPosting {
            title: title.to_string(),
            company_name: None,
            location: None,
            salary_range: None,
            tags: vec![],
            source: "CryptoJobsList".into(),
            job_url: url.to_string(),
            description: None,
            external_id: None,
            is_remote: false,
            date_posted_epoch: None,
            raw_api_response: None,
            collected_at: Utc::now(),
        }
    }

    enum Page {
        Rows(Vec<Option<JobPosting>>),
        Transient,
        Malformed,
    }

    /// Serves one canned page per target; `None` rows canonicalize to a skip.
    struct ScriptedJobs {
        pages: Vec<Page>,
        fetches: AtomicUsize,
    }

    impl ScriptedJobs {
        fn new(pages: Vec<Page>) -> Self {
            Self {
                pages,
                fetches: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl SourceAdapter for ScriptedJobs {
        type Raw = Option<JobPosting>;
        type Record = JobPosting;

        fn source_id(&self) -> &'static str {
            "scripted"
        }

        fn targets(&self) -> Vec<FetchTarget> {
            (0..self.pages.len())
                .map(|i| FetchTarget::new("page", i.to_string()))
                .collect()
        }

        fn pause_after(&self, _target: &FetchTarget) -> Duration {
            Duration::from_secs(2)
        }

        async fn fetch(&self, target: &FetchTarget) -> Result<Vec<Self::Raw>, AdapterError> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            let index: usize = target
                .query
                .parse()
                .map_err(|_| AdapterError::Malformed(format!("bad target {}", target.query)))?;
            match &self.pages[index] {
                Page::Rows(rows) => Ok(rows.clone()),
                Page::Transient => Err(AdapterError::Transient(FetchError::HttpStatus {
                    status: 503,
                    url: "https://cryptojobslist.com/".into(),
                    snippet: String::new(),
                })),
                Page::Malformed => Err(AdapterError::Malformed("job table missing".into())),
            }
        }

        fn canonicalize(
            &self,
            _target: &FetchTarget,
            raw: Self::Raw,
            _collected_at: DateTime<Utc>,
        ) -> Canonical<JobPosting> {
            match raw {
                Some(job) => Canonical::Record(job),
                None => Canonical::Skip(SkipReason::MissingField("title")),
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn duplicate_job_urls_insert_once() {
        let adapter = ScriptedJobs::new(vec![Page::Rows(vec![
            Some(job("https://x/jobs/1", "Rust Dev")),
            Some(job("https://x/jobs/1", "Rust Developer")),
        ])]);
        let sink = MemorySink::<JobPosting>::new();
        let summary = run_ingestion(&adapter, &sink, JobPosting::dedup_key).await;

        assert_eq!(summary.inserted(), 1);
        assert_eq!(summary.skipped(), 1);
        assert_eq!(summary.outcome, RunOutcome::Completed);
        assert_eq!(
            sink.document(&job("https://x/jobs/1", "").dedup_key()).unwrap()["title"],
            "Rust Dev"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failure_keeps_earlier_inserts() {
        let adapter = ScriptedJobs::new(vec![
            Page::Rows(vec![Some(job("https://x/1", "A")), None]),
            Page::Transient,
            Page::Rows(vec![Some(job("https://x/3", "C"))]),
        ]);
        let sink = MemorySink::<JobPosting>::new();
        let summary = run_ingestion(&adapter, &sink, JobPosting::dedup_key).await;

        assert_eq!(adapter.fetches.load(Ordering::SeqCst), 2);
        assert_eq!(summary.targets_attempted, 2);
        assert_eq!(summary.processed, 2);
        assert_eq!(summary.invalid, 1);
        assert_eq!(summary.inserted(), 1);
        assert_eq!(sink.len(), 1);
        assert!(matches!(
            summary.outcome,
            RunOutcome::EndedEarly { transient: true, .. }
        ));
        assert!(summary.succeeded());
    }

    #[tokio::test(start_paused = true)]
    async fn malformed_page_fails_the_run() {
        let adapter = ScriptedJobs::new(vec![Page::Malformed]);
        let sink = MemorySink::<JobPosting>::new();
        let summary = run_ingestion(&adapter, &sink, JobPosting::dedup_key).await;
        assert!(!summary.succeeded());
        assert!(sink.is_empty());
        assert!(summary.to_string().contains("ended early (fatal)"));
    }

    #[tokio::test(start_paused = true)]
    async fn pauses_only_between_targets() {
        let adapter =
            ScriptedJobs::new(vec![Page::Rows(vec![]), Page::Rows(vec![]), Page::Rows(vec![])]);
        let sink = MemorySink::<JobPosting>::new();
        let started = tokio::time::Instant::now();
        let summary = run_ingestion(&adapter, &sink, JobPosting::dedup_key).await;
        assert_eq!(summary.targets_attempted, 3);
        assert_eq!(started.elapsed(), Duration::from_secs(4));
    }

    #[test]
    fn summary_line_reports_counts() {
        let mut summary = IngestionSummary::new("reddit");
        summary.processed = 12;
        summary.invalid = 2;
        summary.upsert = UpsertSummary {
            inserted: 7,
            skipped: 3,
        };
        assert_eq!(
            summary.to_string(),
            "reddit: processed=12 inserted=7 skipped=5 (duplicate/error=3 invalid=2)"
        );
    }

    #[tokio::test]
    async fn unconfigured_stages_abort_before_any_io() {
        let settings = Settings::from_lookup(|_| None).unwrap();
        for stage in Stage::ALL {
            let err = run_stage(stage, &settings).await.unwrap_err();
            assert!(matches!(err, PipelineError::Config(_)), "{stage}: {err}");
            assert_eq!(Disposition::for_pipeline(&err), Disposition::Abort);
        }
    }
}
