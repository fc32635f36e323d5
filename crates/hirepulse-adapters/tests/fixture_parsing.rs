use std::path::PathBuf;

use chrono::Utc;
use hirepulse_adapters::{cryptojobslist, reddit, twitter, web3career, FetchTarget};
use hirepulse_core::{Canonical, JobPosting, SkipReason};

fn fixture(relative: &str) -> Vec<u8> {
    let path = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("../../fixtures")
        .join(relative);
    std::fs::read(&path).unwrap_or_else(|e| panic!("reading {}: {e}", path.display()))
}

#[test]
fn reddit_search_fixture_dedups_and_skips_idless_posts() {
    let posts = reddit::parse_listing(&fixture("reddit/search_listing.json")).expect("listing");
    assert_eq!(posts.len(), 4);

    let posts = reddit::dedup_within_batch(posts);
    assert_eq!(posts.len(), 3);

    let target = FetchTarget::new(reddit::METHOD_SEARCH, "web3 developer salary");
    let outcomes: Vec<_> = posts
        .into_iter()
        .map(|raw| reddit::canonicalize_post(&target, raw, Utc::now()))
        .collect();
    assert!(outcomes[2].is_skip());

    let records: Vec<_> = outcomes.into_iter().filter_map(Canonical::into_record).collect();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].source_query, "web3 developer salary");
    assert_eq!(records[0].attributes["subreddit"], "web3");
    assert_eq!(records[1].author.as_deref(), Some("[deleted]"));
}

#[test]
fn twitter_fixture_canonicalizes_every_tweet() {
    let tweets =
        twitter::parse_search_response(&fixture("twitter/search_recent.json")).expect("tweets");
    let target = FetchTarget::new(twitter::METHOD_SEARCH_RECENT, "#Web3Jobs");
    let posts: Vec<_> = tweets
        .into_iter()
        .filter_map(|raw| twitter::canonicalize_tweet(&target, raw, Utc::now()).into_record())
        .collect();

    assert_eq!(posts.len(), 2);
    assert_eq!(
        posts[0].url.as_deref(),
        Some("https://twitter.com/i/web/status/1760012345678901234")
    );
    assert!(posts[1].attributes.contains_key("geo"));
    assert!(!posts[0].attributes.contains_key("geo"));
}

#[test]
fn web3career_fixture_yields_complete_jobs_only() {
    let response: serde_json::Value =
        serde_json::from_slice(&fixture("web3career/api_response.json")).expect("json");
    let rows = web3career::extract_job_rows(&response).expect("rows");
    assert_eq!(rows.len(), 4);

    let outcomes: Vec<Canonical<JobPosting>> = rows
        .into_iter()
        .map(|row| web3career::canonicalize_entry(row, Utc::now()))
        .collect();
    assert_eq!(
        outcomes[2],
        Canonical::Skip(SkipReason::MissingField("apply_url"))
    );
    assert!(matches!(outcomes[3], Canonical::Skip(SkipReason::NotARecord(_))));

    let jobs: Vec<_> = outcomes.into_iter().filter_map(Canonical::into_record).collect();
    assert_eq!(jobs.len(), 2);
    assert!(jobs[0].is_remote);
    assert!(!jobs[1].is_remote);
    assert_eq!(jobs[1].external_id.as_deref(), Some("88121"));
    assert_eq!(jobs[1].date_posted_epoch, Some(1_771_808_400));
    assert_eq!(jobs[1].salary_range.as_deref(), Some("$140k - $190k"));
}

#[test]
fn cryptojobslist_fixture_parses_table_rows() {
    let html = String::from_utf8(fixture("cryptojobslist/homepage.html")).expect("utf8");
    let rows = cryptojobslist::parse_job_table(&html).expect("table");
    assert_eq!(rows.len(), 5, "ad row is skipped");

    let base = cryptojobslist::CryptoJobsListConfig::default().base_url;
    let outcomes: Vec<_> = rows
        .into_iter()
        .map(|row| cryptojobslist::canonicalize_row(&base, row, Utc::now()))
        .collect();
    assert!(outcomes[3].is_skip());

    let jobs: Vec<_> = outcomes.into_iter().filter_map(Canonical::into_record).collect();
    assert_eq!(jobs.len(), 4);

    let solidity = &jobs[0];
    assert_eq!(
        solidity.job_url,
        "https://cryptojobslist.com/jobs/senior-solidity-engineer-at-ledgerworks"
    );
    assert_eq!(solidity.company_name.as_deref(), Some("LedgerWorks"));
    assert_eq!(solidity.salary_range.as_deref(), Some("$150k - $200k"));
    assert_eq!(solidity.location.as_deref(), Some("Remote"));
    assert!(solidity.is_remote);

    let rust = &jobs[1];
    assert_eq!(rust.salary_range, None);
    assert_eq!(rust.location.as_deref(), Some("Lisbon, Portugal"));
    assert!(!rust.is_remote);

    let growth = &jobs[2];
    assert_eq!(growth.location.as_deref(), Some("Remote"));
    assert!(growth.is_remote);

    // Same link as the first row; the sink decides which one survives.
    assert_eq!(jobs[3].job_url, solidity.job_url);
}
