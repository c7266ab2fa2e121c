//! Registry source reader
//!
//! Drives the COLA registry's advanced search: one POST for the first
//! results page, session-cookie GETs for the following pages, per-run
//! dedup by TTB id, and optional per-record detail enrichment.

mod detail;
mod listing;

use std::collections::HashSet;

use chrono::{Duration as ChronoDuration, NaiveDate, Utc};
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::StatusCode;
use thiserror::Error;

use crate::config::RegistryConfig;
use crate::model::ColaRecord;

pub(crate) const BASE_URL: &str = "https://ttbonline.gov/colasonline/";
const SEARCH_URL: &str = "https://ttbonline.gov/colasonline/publicSearchColasAdvancedProcess.do";
const PAGINATION_URL: &str = "https://ttbonline.gov/colasonline/publicPageAdvancedCola.do";

/// Completed-date search window, in days (15 years, inclusive).
const SEARCH_WINDOW_DAYS: i64 = 15 * 365 - 1;

#[derive(Debug, Error)]
pub enum ScrapeError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("registry returned status {0}")]
    Status(StatusCode),
}

/// Scraper for the public COLA registry.
pub struct ColaScraper {
    http: reqwest::Client,
    product_name: String,
    vendor_code: String,
    delay: std::time::Duration,
    fetch_details: bool,
    date_from: NaiveDate,
    date_to: NaiveDate,
}

impl ColaScraper {
    pub fn new(config: &RegistryConfig) -> Result<Self, ScrapeError> {
        let http = reqwest::Client::builder()
            .default_headers(browser_headers())
            .cookie_store(true)
            .timeout(std::time::Duration::from_secs(30))
            // The registry serves an incomplete TLS chain
            .danger_accept_invalid_certs(true)
            .build()?;

        let date_to = Utc::now().date_naive();
        let date_from = date_to - ChronoDuration::days(SEARCH_WINDOW_DAYS);

        tracing::info!("Initialized scraper for product: {}", config.product_name);
        tracing::debug!("Date range: {} to {}", date_from, date_to);
        tracing::debug!("Vendor code: {}", config.vendor_code);

        Ok(Self {
            http,
            product_name: config.product_name.clone(),
            vendor_code: config.vendor_code.clone(),
            delay: config.delay,
            fetch_details: config.fetch_details,
            date_from,
            date_to,
        })
    }

    /// Scrape every results page, dedup by TTB id, optionally enrich each
    /// new record from its detail page.
    ///
    /// Listing-page failures abort the run; detail-page failures degrade
    /// to the unenriched record.
    pub async fn scrape(&self) -> Result<Vec<ColaRecord>, ScrapeError> {
        let mut all_results: Vec<ColaRecord> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();
        let mut page = 1u32;

        tracing::info!("Starting scrape for product: {}", self.product_name);

        loop {
            tracing::info!("Fetching page {}...", page);
            let html = if page == 1 {
                self.fetch_first_page().await?
            } else {
                self.fetch_next_page().await?
            };

            let page_records = listing::parse_listing(&html);
            if page_records.is_empty() {
                tracing::warn!("No results found on this page");
                break;
            }

            let found = page_records.len();
            let (new_records, duplicates) = split_new(page_records, &mut seen);
            tracing::info!(
                "Found {} results on page {} ({} new, {} duplicates)",
                found,
                page,
                new_records.len(),
                duplicates
            );

            // An all-duplicates page means the pagination looped back
            if new_records.is_empty() {
                tracing::warn!("All results are duplicates - stopping pagination");
                break;
            }

            for mut record in new_records {
                if self.fetch_details {
                    tokio::time::sleep(self.delay).await;
                    self.enrich(&mut record).await;
                }
                all_results.push(record);
            }

            if !listing::has_next_page(&html) {
                tracing::info!("Reached last page");
                break;
            }

            page += 1;
            tracing::debug!("Waiting {:?} before next request", self.delay);
            tokio::time::sleep(self.delay).await;
        }

        tracing::info!("Scraping completed, total results: {}", all_results.len());
        Ok(all_results)
    }

    async fn fetch_first_page(&self) -> Result<String, ScrapeError> {
        let response = self
            .http
            .post(SEARCH_URL)
            .form(&self.search_form())
            .send()
            .await?;
        if response.status() != StatusCode::OK {
            return Err(ScrapeError::Status(response.status()));
        }
        Ok(response.text().await?)
    }

    async fn fetch_next_page(&self) -> Result<String, ScrapeError> {
        let response = self
            .http
            .get(PAGINATION_URL)
            .query(&[("action", "page"), ("pgfcn", "nextset")])
            .send()
            .await?;
        if response.status() != StatusCode::OK {
            return Err(ScrapeError::Status(response.status()));
        }
        Ok(response.text().await?)
    }

    /// Fetch and merge detail-page fields; failures leave the record as-is.
    async fn enrich(&self, record: &mut ColaRecord) {
        match self.fetch_detail_page(&record.url).await {
            Ok(html) => {
                record.merge_detail(detail::parse_detail(&html));
                tracing::debug!("Enriched record {}", record.ttb_id);
            }
            Err(e) => {
                tracing::warn!(
                    "Detail fetch failed for {}, keeping listing fields: {}",
                    record.ttb_id,
                    e
                );
            }
        }
    }

    async fn fetch_detail_page(&self, url: &str) -> Result<String, ScrapeError> {
        let response = self.http.get(url).send().await?;
        if response.status() != StatusCode::OK {
            return Err(ScrapeError::Status(response.status()));
        }
        Ok(response.text().await?)
    }

    fn search_form(&self) -> Vec<(&'static str, String)> {
        vec![
            (
                "searchCriteria.dateCompletedFrom",
                self.date_from.format("%m/%d/%Y").to_string(),
            ),
            (
                "searchCriteria.dateCompletedTo",
                self.date_to.format("%m/%d/%Y").to_string(),
            ),
            (
                "searchCriteria.productOrFancifulName",
                self.product_name.clone(),
            ),
            ("searchCriteria.productNameSearchType", "B".to_string()),
            ("searchCriteria.classTypeDesired", "desc".to_string()),
            ("searchCriteria.classTypeCode", String::new()),
            ("searchCriteria.ttbIdFrom", String::new()),
            ("searchCriteria.ttbIdTo", String::new()),
            ("searchCriteria.serialNumFrom", String::new()),
            ("searchCriteria.serialNumTo", String::new()),
            ("searchCriteria.permitId", String::new()),
            ("searchCriteria.vendorCode", self.vendor_code.clone()),
            ("action", "search".to_string()),
        ]
    }
}

/// Partition a page of records into unseen ones and a duplicate count.
fn split_new(
    records: Vec<ColaRecord>,
    seen: &mut HashSet<String>,
) -> (Vec<ColaRecord>, usize) {
    let total = records.len();
    let new_records: Vec<ColaRecord> = records
        .into_iter()
        .filter(|r| seen.insert(r.ttb_id.clone()))
        .collect();
    let duplicates = total - new_records.len();
    (new_records, duplicates)
}

fn browser_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(
        reqwest::header::ACCEPT,
        HeaderValue::from_static(
            "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,*/*;q=0.8",
        ),
    );
    headers.insert(
        reqwest::header::ACCEPT_LANGUAGE,
        HeaderValue::from_static("en-US,en;q=0.9"),
    );
    headers.insert(
        reqwest::header::ORIGIN,
        HeaderValue::from_static("https://ttbonline.gov"),
    );
    headers.insert(
        reqwest::header::REFERER,
        HeaderValue::from_static("https://ttbonline.gov/colasonline/publicSearchColasAdvanced.do"),
    );
    headers.insert(
        reqwest::header::USER_AGENT,
        HeaderValue::from_static(
            "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
             (KHTML, like Gecko) Chrome/141.0.0.0 Safari/537.36",
        ),
    );
    headers.insert(
        reqwest::header::UPGRADE_INSECURE_REQUESTS,
        HeaderValue::from_static("1"),
    );
    headers
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str) -> ColaRecord {
        ColaRecord::new(id, format!("{}viewColaDetails.do?ttbid={}", BASE_URL, id))
    }

    #[test]
    fn split_new_drops_ids_seen_earlier_in_the_run() {
        let mut seen = HashSet::new();
        let (first, dupes) = split_new(vec![record("a"), record("b")], &mut seen);
        assert_eq!(first.len(), 2);
        assert_eq!(dupes, 0);

        // Same page served again: everything is a duplicate
        let (second, dupes) = split_new(vec![record("a"), record("b")], &mut seen);
        assert!(second.is_empty());
        assert_eq!(dupes, 2);
    }

    #[test]
    fn split_new_dedups_within_a_single_page() {
        let mut seen = HashSet::new();
        let (records, dupes) = split_new(vec![record("a"), record("a"), record("b")], &mut seen);
        let ids: Vec<_> = records.iter().map(|r| r.ttb_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(dupes, 1);
    }

    #[test]
    fn search_form_covers_the_fifteen_year_window() {
        let config = RegistryConfig {
            product_name: "Shottys".to_string(),
            vendor_code: "23153".to_string(),
            delay: std::time::Duration::from_millis(0),
            fetch_details: false,
        };
        let scraper = ColaScraper::new(&config).unwrap();
        let form = scraper.search_form();

        let from = form
            .iter()
            .find(|(k, _)| *k == "searchCriteria.dateCompletedFrom")
            .map(|(_, v)| v.clone())
            .unwrap();
        let to = form
            .iter()
            .find(|(k, _)| *k == "searchCriteria.dateCompletedTo")
            .map(|(_, v)| v.clone())
            .unwrap();

        let from = NaiveDate::parse_from_str(&from, "%m/%d/%Y").unwrap();
        let to = NaiveDate::parse_from_str(&to, "%m/%d/%Y").unwrap();
        assert_eq!(to - from, ChronoDuration::days(SEARCH_WINDOW_DAYS));
        assert!(form.iter().any(|(k, v)| *k == "action" && v == "search"));
    }
}
