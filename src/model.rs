//! Data model for COLA registry records
//!
//! One `ColaRecord` per Certificate of Label Approval. Listing-page fields
//! are filled by the scraper; detail-page fields arrive later through
//! enrichment and stay `None` when enrichment is disabled or fails.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// A single COLA registry entry.
///
/// `ttb_id` is the sole identity: it is immutable once parsed and is the
/// only key used for dedup, merge and store lookups.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColaRecord {
    /// TTB ID number (unique, stable)
    pub ttb_id: String,

    // Fields from the listing page
    pub permit_no: Option<String>,
    pub serial_number: Option<String>,
    /// Completion date as shown by the registry (MM/DD/YYYY)
    pub completed_date: Option<String>,
    pub fanciful_name: Option<String>,
    pub brand_name: Option<String>,
    pub origin_code: Option<String>,
    pub origin_desc: Option<String>,
    pub class_type: Option<String>,
    pub class_type_desc: Option<String>,
    /// URL of the public detail page
    pub url: String,

    // Fields from the detail page (enrichment)
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub vendor_code: Option<String>,
    #[serde(default)]
    pub type_of_application: Option<String>,
    #[serde(default)]
    pub for_sale_in: Option<String>,
    #[serde(default)]
    pub total_bottle_capacity: Option<String>,
    #[serde(default)]
    pub grape_varietals: Option<String>,
    #[serde(default)]
    pub wine_vintage: Option<String>,
    #[serde(default)]
    pub formula: Option<String>,
    #[serde(default)]
    pub lab_no: Option<String>,
    #[serde(default)]
    pub approval_date: Option<String>,
    #[serde(default)]
    pub qualifications: Option<String>,

    // Applicant information
    #[serde(default)]
    pub applicant_name: Option<String>,
    #[serde(default)]
    pub applicant_address: Option<String>,
    #[serde(default)]
    pub applicant_city: Option<String>,
    #[serde(default)]
    pub applicant_state: Option<String>,
    #[serde(default)]
    pub applicant_zip: Option<String>,

    // Contact information
    #[serde(default)]
    pub contact_name: Option<String>,
    #[serde(default)]
    pub contact_phone: Option<String>,
    #[serde(default)]
    pub contact_email: Option<String>,

    /// Set by the incremental sync when the registry no longer returns
    /// this record; never set by the scraper itself.
    #[serde(default)]
    pub deprecated: bool,
}

impl ColaRecord {
    /// Create a record carrying only its identity and detail URL.
    pub fn new(ttb_id: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            ttb_id: ttb_id.into(),
            permit_no: None,
            serial_number: None,
            completed_date: None,
            fanciful_name: None,
            brand_name: None,
            origin_code: None,
            origin_desc: None,
            class_type: None,
            class_type_desc: None,
            url: url.into(),
            status: None,
            vendor_code: None,
            type_of_application: None,
            for_sale_in: None,
            total_bottle_capacity: None,
            grape_varietals: None,
            wine_vintage: None,
            formula: None,
            lab_no: None,
            approval_date: None,
            qualifications: None,
            applicant_name: None,
            applicant_address: None,
            applicant_city: None,
            applicant_state: None,
            applicant_zip: None,
            contact_name: None,
            contact_phone: None,
            contact_email: None,
            deprecated: false,
        }
    }

    /// Merge detail-page fields into this record.
    ///
    /// Only fields the detail parser actually found are written; a partial
    /// parse never clears values that are already present.
    pub fn merge_detail(&mut self, detail: DetailFields) {
        self.status = detail.status.or(self.status.take());
        self.vendor_code = detail.vendor_code.or(self.vendor_code.take());
        self.type_of_application = detail.type_of_application.or(self.type_of_application.take());
        self.for_sale_in = detail.for_sale_in.or(self.for_sale_in.take());
        self.total_bottle_capacity = detail
            .total_bottle_capacity
            .or(self.total_bottle_capacity.take());
        self.grape_varietals = detail.grape_varietals.or(self.grape_varietals.take());
        self.wine_vintage = detail.wine_vintage.or(self.wine_vintage.take());
        self.formula = detail.formula.or(self.formula.take());
        self.lab_no = detail.lab_no.or(self.lab_no.take());
        self.approval_date = detail.approval_date.or(self.approval_date.take());
        self.qualifications = detail.qualifications.or(self.qualifications.take());
        self.applicant_name = detail.applicant_name.or(self.applicant_name.take());
        self.applicant_address = detail.applicant_address.or(self.applicant_address.take());
        self.applicant_city = detail.applicant_city.or(self.applicant_city.take());
        self.applicant_state = detail.applicant_state.or(self.applicant_state.take());
        self.applicant_zip = detail.applicant_zip.or(self.applicant_zip.take());
        self.contact_name = detail.contact_name.or(self.contact_name.take());
        self.contact_phone = detail.contact_phone.or(self.contact_phone.take());
        self.contact_email = detail.contact_email.or(self.contact_email.take());
    }
}

/// Fields extracted from a single detail page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DetailFields {
    pub status: Option<String>,
    pub vendor_code: Option<String>,
    pub type_of_application: Option<String>,
    pub for_sale_in: Option<String>,
    pub total_bottle_capacity: Option<String>,
    pub grape_varietals: Option<String>,
    pub wine_vintage: Option<String>,
    pub formula: Option<String>,
    pub lab_no: Option<String>,
    pub approval_date: Option<String>,
    pub qualifications: Option<String>,
    pub applicant_name: Option<String>,
    pub applicant_address: Option<String>,
    pub applicant_city: Option<String>,
    pub applicant_state: Option<String>,
    pub applicant_zip: Option<String>,
    pub contact_name: Option<String>,
    pub contact_phone: Option<String>,
    pub contact_email: Option<String>,
}

/// Convert a registry date (MM/DD/YYYY) to ISO format (YYYY-MM-DD).
///
/// Returns `None` for anything that does not parse; callers treat that as
/// an absent date rather than an error.
pub fn to_iso_date(raw: &str) -> Option<String> {
    NaiveDate::parse_from_str(raw.trim(), "%m/%d/%Y")
        .ok()
        .map(|d| d.format("%Y-%m-%d").to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_detail_keeps_existing_values_on_partial_parse() {
        let mut record = ColaRecord::new("25059001000222", "https://example.gov/detail");
        record.status = Some("APPROVED".to_string());

        let detail = DetailFields {
            vendor_code: Some("23153".to_string()),
            ..Default::default()
        };
        record.merge_detail(detail);

        assert_eq!(record.status.as_deref(), Some("APPROVED"));
        assert_eq!(record.vendor_code.as_deref(), Some("23153"));
    }

    #[test]
    fn merge_detail_fills_all_enrichment_fields() {
        let mut record = ColaRecord::new("25059001000222", "https://example.gov/detail");
        let detail = DetailFields {
            status: Some("APPROVED".to_string()),
            type_of_application: Some("LABEL APPROVAL".to_string()),
            contact_email: Some("labels@example.com".to_string()),
            ..Default::default()
        };
        record.merge_detail(detail);

        assert_eq!(record.status.as_deref(), Some("APPROVED"));
        assert_eq!(record.type_of_application.as_deref(), Some("LABEL APPROVAL"));
        assert_eq!(record.contact_email.as_deref(), Some("labels@example.com"));
    }

    #[test]
    fn iso_date_conversion() {
        assert_eq!(to_iso_date("03/12/2025").as_deref(), Some("2025-03-12"));
        assert_eq!(to_iso_date(" 01/02/1999 ").as_deref(), Some("1999-01-02"));
        assert_eq!(to_iso_date("2025-03-12"), None);
        assert_eq!(to_iso_date("not a date"), None);
    }
}
