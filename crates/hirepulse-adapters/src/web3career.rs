//! Web3.Career job API.
//!
//! The endpoint answers with a heterogeneous top-level array; job rows sit at
//! index 2 by convention. That position is validated rather than trusted.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hirepulse_core::{
    derive_is_remote, non_blank, normalize_tags, Canonical, JobPosting, SkipReason,
};
use hirepulse_storage::HttpFetcher;
use serde_json::Value as JsonValue;
use tracing::{info, warn};

use crate::{AdapterError, FetchTarget, SourceAdapter};

pub const SOURCE_ID: &str = "web3career";
pub const SOURCE_NAME: &str = "Web3.Career";
pub const METHOD_API: &str = "api";

/// Conventional position of the job rows in the response array.
pub const JOB_ROWS_INDEX: usize = 2;

#[derive(Debug, Clone)]
pub struct Web3CareerConfig {
    pub endpoint: String,
    pub limit: u32,
    pub show_description: bool,
}

impl Default for Web3CareerConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://web3.career/api/v1".into(),
            limit: 100,
            show_description: true,
        }
    }
}

fn is_array_of_objects(value: &JsonValue) -> bool {
    value
        .as_array()
        .is_some_and(|items| !items.is_empty() && items.iter().any(JsonValue::is_object))
}

/// Locate the job rows in a decoded response.
///
/// Index 2 is used when it holds an array of objects. Otherwise the first
/// top-level array of objects is taken (with a warning). A response with
/// neither is malformed.
pub fn extract_job_rows(response: &JsonValue) -> Result<Vec<JsonValue>, AdapterError> {
    let Some(top) = response.as_array() else {
        return Err(AdapterError::Malformed(
            "web3career response is not a top-level array".into(),
        ));
    };

    if let Some(rows) = top.get(JOB_ROWS_INDEX).filter(|v| is_array_of_objects(v)) {
        return Ok(rows.as_array().cloned().unwrap_or_default());
    }

    match top.iter().position(is_array_of_objects) {
        Some(index) => {
            warn!(
                expected = JOB_ROWS_INDEX,
                found = index,
                "job rows not at the expected index, using first array of objects"
            );
            Ok(top[index].as_array().cloned().unwrap_or_default())
        }
        // An empty array at the expected index is "no jobs", not a shape change.
        None if top
            .get(JOB_ROWS_INDEX)
            .and_then(JsonValue::as_array)
            .is_some_and(Vec::is_empty) =>
        {
            Ok(Vec::new())
        }
        None => Err(AdapterError::Malformed(format!(
            "web3career response has no array of job objects ({} top-level entries)",
            top.len()
        ))),
    }
}

fn string_field(entry: &serde_json::Map<String, JsonValue>, name: &str) -> Option<String> {
    match entry.get(name)? {
        JsonValue::String(s) => non_blank(Some(s.as_str())),
        JsonValue::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn epoch_field(entry: &serde_json::Map<String, JsonValue>, name: &str) -> Option<i64> {
    match entry.get(name)? {
        JsonValue::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        JsonValue::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

pub fn canonicalize_entry(entry: JsonValue, collected_at: DateTime<Utc>) -> Canonical<JobPosting> {
    let Some(fields) = entry.as_object() else {
        let kind = match &entry {
            JsonValue::Null => "null",
            JsonValue::Bool(_) => "bool",
            JsonValue::Number(_) => "number",
            JsonValue::String(_) => "string",
            JsonValue::Array(_) => "array",
            JsonValue::Object(_) => "object",
        };
        return Canonical::Skip(SkipReason::NotARecord(format!("{kind} entry")));
    };

    let Some(title) = string_field(fields, "title") else {
        return Canonical::Skip(SkipReason::MissingField("title"));
    };
    let Some(job_url) = string_field(fields, "apply_url") else {
        return Canonical::Skip(SkipReason::MissingField("apply_url"));
    };

    let tags = normalize_tags(
        fields
            .get("tags")
            .and_then(JsonValue::as_array)
            .into_iter()
            .flatten()
            .filter_map(JsonValue::as_str),
    );
    let location = string_field(fields, "location");
    let is_remote = derive_is_remote(&tags, location.as_deref());

    Canonical::Record(JobPosting {
        title,
        company_name: string_field(fields, "company"),
        salary_range: string_field(fields, "salary_range"),
        description: string_field(fields, "description"),
        external_id: string_field(fields, "id"),
        date_posted_epoch: epoch_field(fields, "date_epoch"),
        source: SOURCE_NAME.to_string(),
        job_url,
        location,
        tags,
        is_remote,
        raw_api_response: Some(entry),
        collected_at,
    })
}

#[derive(Debug)]
pub struct Web3CareerAdapter {
    http: HttpFetcher,
    api_key: String,
    config: Web3CareerConfig,
}

impl Web3CareerAdapter {
    pub fn new(http: HttpFetcher, api_key: String, config: Web3CareerConfig) -> Self {
        Self {
            http,
            api_key,
            config,
        }
    }
}

#[async_trait]
impl SourceAdapter for Web3CareerAdapter {
    type Raw = JsonValue;
    type Record = JobPosting;

    fn source_id(&self) -> &'static str {
        SOURCE_ID
    }

    fn targets(&self) -> Vec<FetchTarget> {
        vec![FetchTarget::new(METHOD_API, self.config.endpoint.as_str())]
    }

    async fn fetch(&self, target: &FetchTarget) -> Result<Vec<JsonValue>, AdapterError> {
        let limit = self.config.limit.to_string();
        let show_description = self.config.show_description.to_string();
        let request = self
            .http
            .client()
            .get(&target.query)
            .query(&[
                ("token", self.api_key.as_str()),
                ("limit", limit.as_str()),
                ("show_description", show_description.as_str()),
            ])
            .build()?;

        let response: JsonValue = self.http.execute(SOURCE_ID, request).await?.json()?;
        let rows = extract_job_rows(&response)?;
        info!(entries = rows.len(), "potential job entries received");
        Ok(rows)
    }

    fn canonicalize(
        &self,
        _target: &FetchTarget,
        raw: JsonValue,
        collected_at: DateTime<Utc>,
    ) -> Canonical<JobPosting> {
        canonicalize_entry(raw, collected_at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn rows_are_read_from_index_two() {
        let response = json!([
            {"status": "ok"},
            "meta",
            [{"id": 1, "title": "Rust Engineer", "apply_url": "https://web3.career/r-1"}]
        ]);
        let rows = extract_job_rows(&response).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["title"], "Rust Engineer");
    }

    #[test]
    fn shifted_rows_fall_back_to_first_object_array() {
        let response = json!([
            "meta",
            [{"id": 7, "title": "Solidity Dev", "apply_url": "https://web3.career/s-7"}],
            "not rows"
        ]);
        let rows = extract_job_rows(&response).unwrap();
        assert_eq!(rows[0]["id"], 7);
    }

    #[test]
    fn response_without_rows_is_malformed() {
        assert!(matches!(
            extract_job_rows(&json!(["a", "b", ["c", "d"]])),
            Err(AdapterError::Malformed(_))
        ));
        assert!(matches!(
            extract_job_rows(&json!({"jobs": []})),
            Err(AdapterError::Malformed(_))
        ));
        assert!(extract_job_rows(&json!([{}, "x", []])).unwrap().is_empty());
    }

    #[test]
    fn entry_becomes_job_posting() {
        let entry = json!({
            "id": 8812,
            "title": "Senior Protocol Engineer",
            "company": "Acme Labs",
            "location": "Remote",
            "apply_url": "https://web3.career/senior-protocol-engineer-acme/8812",
            "tags": ["rust", "Remote", "rust"],
            "description": "<p>Build things</p>",
            "date_epoch": 1771934400
        });
        let job = canonicalize_entry(entry.clone(), Utc::now())
            .into_record()
            .unwrap();
        assert_eq!(job.source, "Web3.Career");
        assert_eq!(job.external_id.as_deref(), Some("8812"));
        assert_eq!(job.company_name.as_deref(), Some("Acme Labs"));
        assert_eq!(job.tags, vec!["rust".to_string(), "Remote".to_string()]);
        assert!(job.is_remote);
        assert_eq!(job.date_posted_epoch, Some(1_771_934_400));
        assert_eq!(job.raw_api_response, Some(entry));
    }

    #[test]
    fn entries_without_title_or_url_are_skipped() {
        let now = Utc::now();
        assert_eq!(
            canonicalize_entry(json!({"title": "x"}), now),
            Canonical::Skip(SkipReason::MissingField("apply_url"))
        );
        assert_eq!(
            canonicalize_entry(json!({"apply_url": "https://x"}), now),
            Canonical::Skip(SkipReason::MissingField("title"))
        );
        assert!(canonicalize_entry(json!("just text"), now).is_skip());
    }

    #[test]
    fn onsite_entry_is_not_remote() {
        let entry = json!({
            "title": "DevRel",
            "apply_url": "https://web3.career/devrel/1",
            "location": "Lisbon, Portugal",
            "tags": ["devrel"]
        });
        let job = canonicalize_entry(entry, Utc::now()).into_record().unwrap();
        assert!(!job.is_remote);
        assert_eq!(job.location.as_deref(), Some("Lisbon, Portugal"));
        assert!(job.external_id.is_none());
    }
}
