//! Detail-page parser
//!
//! The public detail page renders labeled cells (`div.label` followed by
//! `div.data`). Every field is optional: unknown labels are ignored and a
//! page that does not match expectations simply yields an empty set of
//! fields, never an error.

use regex::Regex;
use scraper::{ElementRef, Html, Selector};

use crate::model::DetailFields;

/// Extract enrichment fields from a detail page.
pub fn parse_detail(html: &str) -> DetailFields {
    let doc = Html::parse_document(html);
    let label_sel = Selector::parse("div.label").unwrap();

    let mut fields = DetailFields::default();

    for label in doc.select(&label_sel) {
        let key = normalized_text(&label).to_ascii_uppercase();
        let Some(value_el) = data_sibling(&label) else {
            continue;
        };

        let segments: Vec<String> = value_el
            .text()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| s.split_whitespace().collect::<Vec<_>>().join(" "))
            .collect();
        if segments.is_empty() {
            continue;
        }
        let value = segments.join(" ");

        match key.as_str() {
            "STATUS" => fields.status = Some(value),
            "VENDOR CODE" => fields.vendor_code = Some(value),
            "TYPE OF APPLICATION" => fields.type_of_application = Some(value),
            "FOR SALE IN" => fields.for_sale_in = Some(value),
            "TOTAL BOTTLE CAPACITY" => fields.total_bottle_capacity = Some(value),
            "GRAPE VARIETAL(S)" | "GRAPE VARIETALS" => fields.grape_varietals = Some(value),
            "WINE VINTAGE" => fields.wine_vintage = Some(value),
            "FORMULA" => fields.formula = Some(value),
            "LAB NO." | "LAB NO" => fields.lab_no = Some(value),
            "APPROVAL DATE" | "DATE APPROVED" => fields.approval_date = Some(value),
            "QUALIFICATIONS" => fields.qualifications = Some(value),
            "CONTACT NAME" => fields.contact_name = Some(value),
            "PHONE" | "PHONE NUMBER" => fields.contact_phone = Some(value),
            "EMAIL" | "EMAIL ADDRESS" => fields.contact_email = Some(value),
            "NAME AND ADDRESS OF APPLICANT" => apply_applicant_block(&segments, &mut fields),
            _ => {}
        }
    }

    fields
}

/// First element sibling of a label, accepted only if it is a data cell.
fn data_sibling<'a>(label: &ElementRef<'a>) -> Option<ElementRef<'a>> {
    for sibling in label.next_siblings() {
        if let Some(el) = ElementRef::wrap(sibling) {
            return el
                .value()
                .classes()
                .any(|c| c == "data")
                .then_some(el);
        }
    }
    None
}

/// Split the applicant block into name / street address / city-state-zip.
///
/// The block arrives as one line per `<br>`: company name first, then one
/// or more address lines, with "CITY, ST 12345" last when present.
fn apply_applicant_block(lines: &[String], fields: &mut DetailFields) {
    let city_re = Regex::new(r"^(.+?),\s*([A-Z]{2})\s+(\d{5}(?:-\d{4})?)$").unwrap();

    let mut lines = lines.to_vec();
    if lines.is_empty() {
        return;
    }

    fields.applicant_name = Some(lines.remove(0));

    if let Some(last) = lines.last() {
        if let Some(caps) = city_re.captures(last) {
            fields.applicant_city = Some(caps[1].to_string());
            fields.applicant_state = Some(caps[2].to_string());
            fields.applicant_zip = Some(caps[3].to_string());
            lines.pop();
        }
    }

    if !lines.is_empty() {
        fields.applicant_address = Some(lines.join(", "));
    }
}

fn normalized_text(el: &ElementRef) -> String {
    el.text()
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}
