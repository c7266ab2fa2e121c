//! Airtable storage adapter
//!
//! REST client for the Airtable v0 API: paged listing, batch create,
//! update-by-id, batch delete, and best-effort PDF attachment upload via
//! the content endpoint.

use std::collections::HashSet;

use async_trait::async_trait;
use base64::Engine;
use serde::Deserialize;
use serde_json::{json, Map, Value};

use crate::config::AirtableConfig;
use crate::documents::DocumentFetcher;
use crate::model::{to_iso_date, ColaRecord};

use super::{StorageAdapter, StorageError, BATCH_SIZE};

const API_URL: &str = "https://api.airtable.com/v0";
const CONTENT_URL: &str = "https://content.airtable.com/v0";

/// Primary-key column in the store.
const ID_FIELD: &str = "TTB ID";

pub struct AirtableStore {
    http: reqwest::Client,
    config: AirtableConfig,
    /// When present, created and updated rows get the rendered COLA
    /// document attached (best-effort).
    documents: Option<DocumentFetcher>,
}

#[derive(Debug, Deserialize)]
struct RecordPage {
    records: Vec<StoredRecord>,
    offset: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StoredRecord {
    id: String,
    #[serde(default)]
    fields: Map<String, Value>,
}

impl AirtableStore {
    pub fn new(
        config: AirtableConfig,
        documents: Option<DocumentFetcher>,
    ) -> Result<Self, StorageError> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()?;
        tracing::info!(
            "Initialized Airtable adapter for base {}, table '{}'",
            config.base_id,
            config.table_name
        );
        Ok(Self {
            http,
            config,
            documents,
        })
    }

    /// Release held resources (the remote browser session, if any).
    pub async fn shutdown(&self) {
        if let Some(fetcher) = &self.documents {
            fetcher.disconnect().await;
        }
    }

    fn table_url(&self) -> String {
        format!(
            "{}/{}/{}",
            API_URL,
            self.config.base_id,
            urlencoding::encode(&self.config.table_name)
        )
    }

    async fn checked(response: reqwest::Response) -> Result<reqwest::Response, StorageError> {
        let status = response.status();
        if status.is_success() {
            Ok(response)
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(StorageError::Api { status, body })
        }
    }

    /// Page through the table, projecting only the id column.
    async fn list_rows(&self) -> Result<Vec<StoredRecord>, StorageError> {
        let mut rows = Vec::new();
        let mut offset: Option<String> = None;

        loop {
            let mut request = self
                .http
                .get(self.table_url())
                .bearer_auth(&self.config.api_key)
                .query(&[("fields[]", ID_FIELD), ("pageSize", "100")]);
            if let Some(token) = &offset {
                request = request.query(&[("offset", token.as_str())]);
            }

            let page: RecordPage = Self::checked(request.send().await?).await?.json().await?;
            rows.extend(page.records);

            offset = page.offset;
            if offset.is_none() {
                break;
            }
        }

        Ok(rows)
    }

    /// Look up the store's row id for a TTB id.
    async fn find_row_id(&self, ttb_id: &str) -> Result<Option<String>, StorageError> {
        let formula = format!("{{{}}} = {}", ID_FIELD, ttb_id);
        let page: RecordPage = Self::checked(
            self.http
                .get(self.table_url())
                .bearer_auth(&self.config.api_key)
                .query(&[("filterByFormula", formula.as_str()), ("pageSize", "1")])
                .send()
                .await?,
        )
        .await?
        .json()
        .await?;

        Ok(page.records.into_iter().next().map(|r| r.id))
    }

    async fn patch_row(&self, row_id: &str, fields: Value) -> Result<(), StorageError> {
        Self::checked(
            self.http
                .patch(format!("{}/{}", self.table_url(), row_id))
                .bearer_auth(&self.config.api_key)
                .json(&json!({ "fields": fields, "typecast": true }))
                .send()
                .await?,
        )
        .await?;
        Ok(())
    }

    /// Fetch the COLA document and upload it to the row's attachment
    /// field. Never fails the surrounding write.
    async fn attach_document(&self, fetcher: &DocumentFetcher, row_id: &str, ttb_id: &str) {
        let pdf = match fetcher.fetch_document(ttb_id).await {
            Ok(pdf) => pdf,
            Err(e) => {
                tracing::warn!("Document fetch failed for {}: {}", ttb_id, e);
                return;
            }
        };

        let upload_url = format!(
            "{}/{}/{}/{}/uploadAttachment",
            CONTENT_URL,
            self.config.base_id,
            row_id,
            urlencoding::encode(&self.config.document_field)
        );
        let body = json!({
            "contentType": "application/pdf",
            "filename": format!("{}.pdf", ttb_id),
            "file": base64::engine::general_purpose::STANDARD.encode(&pdf),
        });

        let result = self
            .http
            .post(upload_url)
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await;
        match result {
            Ok(response) if response.status().is_success() => {
                tracing::info!("Attached document to record {}", ttb_id);
            }
            Ok(response) => {
                tracing::warn!(
                    "Attachment upload for {} returned {}",
                    ttb_id,
                    response.status()
                );
            }
            Err(e) => tracing::warn!("Attachment upload failed for {}: {}", ttb_id, e),
        }
    }
}

#[async_trait]
impl StorageAdapter for AirtableStore {
    async fn existing_ids(&self) -> Result<HashSet<String>, StorageError> {
        tracing::debug!("Fetching existing TTB IDs from storage...");
        let rows = self.list_rows().await?;
        let ids: HashSet<String> = rows
            .iter()
            .filter_map(|row| row.fields.get(ID_FIELD))
            .filter_map(id_value_to_string)
            .collect();
        tracing::info!("Found {} existing records in storage", ids.len());
        Ok(ids)
    }

    async fn create_records(&self, records: &[ColaRecord]) -> Result<usize, StorageError> {
        if records.is_empty() {
            tracing::info!("No records to create");
            return Ok(0);
        }
        tracing::info!("Creating {} new records in storage...", records.len());

        let mut created = 0;
        let mut created_rows: Vec<(String, String)> = Vec::new();

        for (index, chunk) in records.chunks(BATCH_SIZE).enumerate() {
            let payload: Vec<Value> = chunk
                .iter()
                .map(|r| json!({ "fields": record_fields(r) }))
                .collect();

            let result = async {
                let response = Self::checked(
                    self.http
                        .post(self.table_url())
                        .bearer_auth(&self.config.api_key)
                        .json(&json!({ "records": payload, "typecast": true }))
                        .send()
                        .await?,
                )
                .await?;
                let batch: RecordPage = response.json().await?;
                Ok::<_, StorageError>(batch.records)
            }
            .await;

            // A failed batch is skipped; the rest of the run continues
            match result {
                Ok(rows) => {
                    created += rows.len();
                    tracing::debug!("Created batch {}: {} records", index + 1, rows.len());
                    for (row, record) in rows.iter().zip(chunk) {
                        created_rows.push((row.id.clone(), record.ttb_id.clone()));
                    }
                }
                Err(e) => {
                    tracing::error!("Failed to create batch {}: {}", index + 1, e);
                }
            }
        }

        tracing::info!("Created {} records in storage", created);

        if let Some(fetcher) = &self.documents {
            for (row_id, ttb_id) in &created_rows {
                self.attach_document(fetcher, row_id, ttb_id).await;
            }
        }

        Ok(created)
    }

    async fn update_record(&self, record: &ColaRecord) -> Result<bool, StorageError> {
        let row_id = match self.find_row_id(&record.ttb_id).await {
            Ok(Some(id)) => id,
            Ok(None) => {
                tracing::warn!("Record not found for update: {}", record.ttb_id);
                return Ok(false);
            }
            Err(e) => {
                tracing::error!("Lookup failed for {}: {}", record.ttb_id, e);
                return Ok(false);
            }
        };

        match self
            .patch_row(&row_id, Value::Object(record_fields(record)))
            .await
        {
            Ok(()) => {
                tracing::debug!("Updated record: {}", record.ttb_id);
                if let Some(fetcher) = &self.documents {
                    self.attach_document(fetcher, &row_id, &record.ttb_id).await;
                }
                Ok(true)
            }
            Err(e) => {
                tracing::error!("Failed to update record {}: {}", record.ttb_id, e);
                Ok(false)
            }
        }
    }

    async fn mark_deprecated(&self, ids: &[String]) -> Result<usize, StorageError> {
        if ids.is_empty() {
            tracing::info!("No records to mark as deprecated");
            return Ok(0);
        }
        tracing::info!("Marking {} records as deprecated...", ids.len());

        let mut marked = 0;
        for ttb_id in ids {
            match self.find_row_id(ttb_id).await {
                Ok(Some(row_id)) => {
                    match self.patch_row(&row_id, json!({ "Deprecated": true })).await {
                        Ok(()) => {
                            marked += 1;
                            tracing::debug!("Marked as deprecated: {}", ttb_id);
                        }
                        Err(e) => {
                            tracing::error!("Failed to mark {} as deprecated: {}", ttb_id, e)
                        }
                    }
                }
                Ok(None) => tracing::warn!("Record not found: {}", ttb_id),
                Err(e) => tracing::error!("Lookup failed for {}: {}", ttb_id, e),
            }
        }

        tracing::info!("Marked {} records as deprecated", marked);
        Ok(marked)
    }

    async fn delete_all(&self) -> Result<usize, StorageError> {
        tracing::warn!("Deleting ALL records from the store...");

        let row_ids: Vec<String> = self.list_rows().await?.into_iter().map(|r| r.id).collect();
        if row_ids.is_empty() {
            tracing::info!("No records to delete");
            return Ok(0);
        }

        let mut deleted = 0;
        for (index, chunk) in row_ids.chunks(BATCH_SIZE).enumerate() {
            let params: Vec<(&str, &str)> =
                chunk.iter().map(|id| ("records[]", id.as_str())).collect();

            let result = async {
                Self::checked(
                    self.http
                        .delete(self.table_url())
                        .bearer_auth(&self.config.api_key)
                        .query(&params)
                        .send()
                        .await?,
                )
                .await?;
                Ok::<_, StorageError>(())
            }
            .await;

            match result {
                Ok(()) => {
                    deleted += chunk.len();
                    tracing::debug!("Deleted batch {}: {} records", index + 1, chunk.len());
                }
                Err(e) => tracing::error!("Failed to delete batch {}: {}", index + 1, e),
            }
        }

        tracing::info!("Deleted {} records", deleted);
        Ok(deleted)
    }
}

/// Map a record onto the store's column names, omitting absent values.
fn record_fields(record: &ColaRecord) -> Map<String, Value> {
    let mut fields = Map::new();

    // The id column is numeric in the store
    if let Ok(id) = record.ttb_id.parse::<i64>() {
        fields.insert(ID_FIELD.to_string(), Value::from(id));
    }

    let mut put = |name: &str, value: &Option<String>| {
        if let Some(v) = value {
            fields.insert(name.to_string(), Value::from(v.clone()));
        }
    };

    put("Permit No", &record.permit_no);
    put("Serial Number", &record.serial_number);
    put("Fanciful Name", &record.fanciful_name);
    put("Brand Name", &record.brand_name);
    put("Origin Code", &record.origin_code);
    put("Origin Desc", &record.origin_desc);
    put("Class/Type", &record.class_type);
    put("Class/Type Desc", &record.class_type_desc);
    put("Status", &record.status);
    put("Vendor Code", &record.vendor_code);
    put("Type of Application", &record.type_of_application);
    put("For Sale In", &record.for_sale_in);
    put("Total Bottle Capacity", &record.total_bottle_capacity);
    put("Grape Varietals", &record.grape_varietals);
    put("Wine Vintage", &record.wine_vintage);
    put("Formula", &record.formula);
    put("Lab No", &record.lab_no);
    put("Qualifications", &record.qualifications);
    put("Applicant Name", &record.applicant_name);
    put("Applicant Address", &record.applicant_address);
    put("Applicant City", &record.applicant_city);
    put("Applicant State", &record.applicant_state);
    put("Applicant ZIP", &record.applicant_zip);
    put("Contact Name", &record.contact_name);
    put("Contact Phone", &record.contact_phone);
    put("Contact Email", &record.contact_email);

    // Dates go in as ISO or not at all
    if let Some(date) = record.completed_date.as_deref().and_then(to_iso_date) {
        fields.insert("Completed Date".to_string(), Value::from(date));
    } else if record.completed_date.is_some() {
        tracing::warn!(
            "Could not parse date: {}",
            record.completed_date.as_deref().unwrap_or_default()
        );
    }
    if let Some(date) = record.approval_date.as_deref().and_then(to_iso_date) {
        fields.insert("Approval Date".to_string(), Value::from(date));
    }

    fields.insert("URL".to_string(), Value::from(record.url.clone()));
    // Rows touched by a sync are live again by definition
    fields.insert("Deprecated".to_string(), Value::from(false));

    fields
}

/// The id column comes back as a number; tolerate strings too.
fn id_value_to_string(value: &Value) -> Option<String> {
    match value {
        Value::Number(n) => Some(n.to_string()),
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_record() -> ColaRecord {
        let mut record = ColaRecord::new(
            "25059001000222",
            "https://ttbonline.gov/colasonline/viewColaDetails.do?ttbid=25059001000222",
        );
        record.permit_no = Some("BWN-FL-21062".to_string());
        record.completed_date = Some("03/12/2025".to_string());
        record.brand_name = Some("SHOTTYS".to_string());
        record.status = Some("APPROVED".to_string());
        record
    }

    #[test]
    fn maps_id_as_number_and_dates_as_iso() {
        let fields = record_fields(&sample_record());
        assert_eq!(fields.get("TTB ID"), Some(&Value::from(25059001000222i64)));
        assert_eq!(fields.get("Completed Date"), Some(&Value::from("2025-03-12")));
        assert_eq!(fields.get("Deprecated"), Some(&Value::from(false)));
    }

    #[test]
    fn omits_absent_fields() {
        let fields = record_fields(&sample_record());
        assert!(fields.contains_key("Brand Name"));
        assert!(!fields.contains_key("Fanciful Name"));
        assert!(!fields.contains_key("Contact Email"));
        assert!(!fields.contains_key("Approval Date"));
    }

    #[test]
    fn unparseable_id_is_left_out() {
        let record = ColaRecord::new("not-a-number", "https://example.gov/x");
        let fields = record_fields(&record);
        assert!(!fields.contains_key("TTB ID"));
    }

    #[test]
    fn id_values_tolerate_both_shapes() {
        assert_eq!(
            id_value_to_string(&Value::from(25059001000222i64)).as_deref(),
            Some("25059001000222")
        );
        assert_eq!(
            id_value_to_string(&Value::from("25059001000222")).as_deref(),
            Some("25059001000222")
        );
        assert_eq!(id_value_to_string(&Value::Null), None);
        assert_eq!(id_value_to_string(&Value::from("")), None);
    }
}
