//! CryptoJobsList homepage scrape.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hirepulse_core::{
    derive_is_remote, non_blank, normalize_tags, strip_location_pin, Canonical, JobPosting,
    SkipReason,
};
use hirepulse_storage::HttpFetcher;
use reqwest::header::USER_AGENT;
use reqwest::Url;
use scraper::{ElementRef, Html};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::{element_text, selector, AdapterError, FetchTarget, SourceAdapter};

pub const SOURCE_ID: &str = "cryptojobslist";
pub const SOURCE_NAME: &str = "CryptoJobsList";
pub const METHOD_SCRAPE: &str = "homepage";

const TABLE_BODY: &str = "table.job-preview-inline-table tbody";
const JOB_ROW: &str = r#"tr[role="button"]"#;
const AD_ROW_CLASS: &str = "notAJobAd";

#[derive(Debug, Clone)]
pub struct CryptoJobsListConfig {
    pub page_url: String,
    /// Base for resolving relative job links.
    pub base_url: String,
    pub user_agent: String,
}

impl Default for CryptoJobsListConfig {
    fn default() -> Self {
        Self {
            page_url: "https://cryptojobslist.com/".into(),
            base_url: "https://cryptojobslist.com".into(),
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                         (KHTML, like Gecko) Chrome/108.0.0.0 Safari/537.36"
                .into(),
        }
    }
}

/// One table row as scraped, before URL resolution.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScrapedRow {
    pub title: Option<String>,
    pub company: Option<String>,
    pub href: Option<String>,
    pub tags: Vec<String>,
    pub salary: Option<String>,
    pub location: Option<String>,
}

/// Parse the job table. A page without the table is malformed; a table
/// without rows is an empty result.
pub fn parse_job_table(html: &str) -> Result<Vec<ScrapedRow>, AdapterError> {
    let document = Html::parse_document(html);
    let table_sel = selector(TABLE_BODY)?;
    let Some(table) = document.select(&table_sel).next() else {
        return Err(AdapterError::Malformed(format!(
            "job table not found with selector `{TABLE_BODY}`"
        )));
    };

    let row_sel = selector(JOB_ROW)?;
    let title_sel = selector("a.job-title-text")?;
    let company_sel = selector("a.job-company-name-text")?;
    let tag_sel = selector("td.job-tags span.category")?;
    let salary_sel = selector("td span.align-middle")?;
    let salary_icon_sel = selector(r#"svg[stroke="currentColor"]"#)?;
    let tags_td_sel = selector("td.job-tags")?;
    let td_sel = selector("td")?;
    let location_sel = selector("span.text-sm")?;

    let mut rows = Vec::new();
    for row in table.select(&row_sel) {
        if row.value().classes().any(|c| c == AD_ROW_CLASS) {
            continue;
        }

        let title_link = row.select(&title_sel).next();
        let title = title_link.and_then(element_text);
        let href = title_link
            .and_then(|a| a.value().attr("href"))
            .and_then(|h| non_blank(Some(h)));
        let company = row.select(&company_sel).next().and_then(element_text);
        let tags = normalize_tags(row.select(&tag_sel).filter_map(element_text));

        // Only the span next to the currency icon is a salary.
        let salary = row.select(&salary_sel).next().and_then(|span| {
            let icon_div = nearest_ancestor(span, "div")?;
            icon_div.select(&salary_icon_sel).next()?;
            element_text(span)
        });

        let location_td = match row.select(&tags_td_sel).next() {
            Some(tags_td) => tags_td
                .prev_siblings()
                .filter_map(ElementRef::wrap)
                .find(|el| el.value().name() == "td"),
            None => row.select(&td_sel).nth(4),
        };
        let mut location = location_td
            .and_then(|td| td.select(&location_sel).next())
            .and_then(element_text)
            .filter(|text| salary.as_deref() != Some(text.as_str()))
            .and_then(|text| non_blank(Some(strip_location_pin(&text))));
        if location.is_none() && tags.iter().any(|t| t == "Remote") {
            location = Some("Remote".to_string());
        }

        rows.push(ScrapedRow {
            title,
            company,
            href,
            tags,
            salary,
            location,
        });
    }
    Ok(rows)
}

fn nearest_ancestor<'a>(element: ElementRef<'a>, name: &str) -> Option<ElementRef<'a>> {
    element
        .ancestors()
        .filter_map(ElementRef::wrap)
        .find(|el| el.value().name() == name)
}

pub fn canonicalize_row(
    base_url: &str,
    row: ScrapedRow,
    collected_at: DateTime<Utc>,
) -> Canonical<JobPosting> {
    let Some(title) = row.title else {
        return Canonical::Skip(SkipReason::MissingField("title"));
    };
    let Some(href) = row.href else {
        return Canonical::Skip(SkipReason::MissingField("job_url"));
    };
    let job_url = match Url::parse(base_url).and_then(|base| base.join(&href)) {
        Ok(url) => url.to_string(),
        Err(err) => {
            return Canonical::Skip(SkipReason::NotARecord(format!(
                "unresolvable link `{href}`: {err}"
            )))
        }
    };

    let is_remote = derive_is_remote(&row.tags, row.location.as_deref());
    Canonical::Record(JobPosting {
        title,
        company_name: row.company,
        location: row.location,
        salary_range: row.salary,
        tags: row.tags,
        source: SOURCE_NAME.to_string(),
        job_url,
        description: None,
        external_id: None,
        is_remote,
        date_posted_epoch: None,
        raw_api_response: None,
        collected_at,
    })
}

#[derive(Debug)]
pub struct CryptoJobsListAdapter {
    http: HttpFetcher,
    config: CryptoJobsListConfig,
}

impl CryptoJobsListAdapter {
    pub fn new(http: HttpFetcher, config: CryptoJobsListConfig) -> Self {
        Self { http, config }
    }
}

#[async_trait]
impl SourceAdapter for CryptoJobsListAdapter {
    type Raw = ScrapedRow;
    type Record = JobPosting;

    fn source_id(&self) -> &'static str {
        SOURCE_ID
    }

    fn targets(&self) -> Vec<FetchTarget> {
        vec![FetchTarget::new(METHOD_SCRAPE, self.config.page_url.as_str())]
    }

    async fn fetch(&self, target: &FetchTarget) -> Result<Vec<ScrapedRow>, AdapterError> {
        let request = self
            .http
            .client()
            .get(&target.query)
            .header(USER_AGENT, &self.config.user_agent)
            .build()?;
        let page = self.http.execute(SOURCE_ID, request).await?;
        let rows = parse_job_table(&page.text())?;
        if rows.is_empty() {
            warn!("job table present but no job rows found");
        } else {
            info!(rows = rows.len(), "potential job rows found");
        }
        Ok(rows)
    }

    fn canonicalize(
        &self,
        _target: &FetchTarget,
        raw: ScrapedRow,
        collected_at: DateTime<Utc>,
    ) -> Canonical<JobPosting> {
        canonicalize_row(&self.config.base_url, raw, collected_at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: &str = "https://cryptojobslist.com";

    fn page(rows: &str) -> String {
        format!(
            r#"<html><body><table class="job-preview-inline-table"><tbody>{rows}</tbody></table></body></html>"#
        )
    }

    #[test]
    fn missing_table_is_malformed() {
        let err = parse_job_table("<html><body><p>maintenance</p></body></html>").unwrap_err();
        assert!(matches!(err, AdapterError::Malformed(_)));
    }

    #[test]
    fn ad_rows_are_skipped_and_salary_needs_the_icon() {
        let html = page(
            r#"
            <tr role="button" class="notAJobAd"><td><a class="job-title-text" href="/ad">Sponsor</a></td></tr>
            <tr role="button">
              <td><a class="job-title-text" href="/jobs/rust-dev">Rust Dev</a></td>
              <td><a class="job-company-name-text">Chain Co</a></td>
              <td><div><svg stroke="none"></svg><span class="align-middle">$1</span></div></td>
              <td><span class="text-sm">📍 Berlin</span></td>
              <td class="job-tags"><span class="category">Rust</span></td>
            </tr>"#,
        );
        let rows = parse_job_table(&html).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].title.as_deref(), Some("Rust Dev"));
        assert_eq!(rows[0].salary, None);
        assert_eq!(rows[0].location.as_deref(), Some("Berlin"));
    }

    #[test]
    fn location_falls_back_to_remote_tag() {
        let html = page(
            r#"
            <tr role="button">
              <td><a class="job-title-text" href="/jobs/defi-pm">DeFi PM</a></td>
              <td><div><svg stroke="currentColor"></svg><span class="align-middle">$120k - $150k</span></div></td>
              <td class="job-tags"><span class="category">Remote</span><span class="category">DeFi</span></td>
            </tr>"#,
        );
        let row = parse_job_table(&html).unwrap().remove(0);
        assert_eq!(row.salary.as_deref(), Some("$120k - $150k"));
        assert_eq!(row.location.as_deref(), Some("Remote"));

        let job = canonicalize_row(BASE, row, Utc::now()).into_record().unwrap();
        assert_eq!(job.job_url, "https://cryptojobslist.com/jobs/defi-pm");
        assert_eq!(job.source, "CryptoJobsList");
        assert!(job.is_remote);
        assert!(job.company_name.is_none());
    }

    #[test]
    fn rows_without_title_or_link_are_skipped() {
        let now = Utc::now();
        let no_title = ScrapedRow {
            href: Some("/jobs/x".into()),
            ..ScrapedRow::default()
        };
        assert_eq!(
            canonicalize_row(BASE, no_title, now),
            Canonical::Skip(SkipReason::MissingField("title"))
        );
        let no_link = ScrapedRow {
            title: Some("Engineer".into()),
            ..ScrapedRow::default()
        };
        assert_eq!(
            canonicalize_row(BASE, no_link, now),
            Canonical::Skip(SkipReason::MissingField("job_url"))
        );
    }
}
