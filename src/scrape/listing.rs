//! Listing-page parser
//!
//! Extracts result rows from the registry's advanced-search results table
//! and decides whether another page of results exists.

use regex::Regex;
use scraper::{ElementRef, Html, Selector};

use crate::model::ColaRecord;

use super::BASE_URL;

/// Extract COLA records from a listing page.
///
/// Rows that do not look like result rows (too few cells, no id link) are
/// skipped silently; the registry pads its tables with layout rows.
pub fn parse_listing(html: &str) -> Vec<ColaRecord> {
    let doc = Html::parse_document(html);
    let table_sel = Selector::parse(r#"table[width="785"]"#).unwrap();
    let row_sel = Selector::parse("tr").unwrap();
    let cell_sel = Selector::parse("td").unwrap();
    let link_sel = Selector::parse("a").unwrap();

    let mut results = Vec::new();

    for table in doc.select(&table_sel) {
        // First row is the header
        for row in table.select(&row_sel).skip(1) {
            let cells: Vec<ElementRef> = row.select(&cell_sel).collect();

            // Expected columns: TTB ID, Permit No, Serial Number,
            // Completed Date, Fanciful Name, Brand Name, Origin Code,
            // Origin Desc, Class/Type Code, Class/Type Desc
            if cells.len() < 10 {
                continue;
            }

            let Some(link) = cells[0].select(&link_sel).next() else {
                continue;
            };
            let ttb_id = normalized_text(&link);
            if ttb_id.is_empty() {
                continue;
            }

            let url = match link.value().attr("href") {
                Some(href) if !href.is_empty() => absolute_url(href),
                _ => format!(
                    "{}viewColaDetails.do?action=publicDisplaySearchAdvanced&ttbid={}",
                    BASE_URL, ttb_id
                ),
            };

            let mut record = ColaRecord::new(ttb_id, url);
            record.permit_no = cell_text(&cells[1]);
            record.serial_number = cell_text(&cells[2]);
            record.completed_date = cell_text(&cells[3]);
            record.fanciful_name = cell_text(&cells[4]);
            record.brand_name = cell_text(&cells[5]);
            record.origin_code = cell_text(&cells[6]);
            record.origin_desc = cell_text(&cells[7]);
            record.class_type = cell_text(&cells[8]);
            record.class_type_desc = cell_text(&cells[9]);

            tracing::debug!(
                "Parsed COLA row: {} - {}",
                record.ttb_id,
                record.brand_name.as_deref().unwrap_or("?")
            );
            results.push(record);
        }
    }

    tracing::debug!("Extracted {} records from page", results.len());
    results
}

/// Check whether the listing has a further page.
///
/// The registry renders a "X to Y of Z" range in its pagination block; a
/// live "Next" link is accepted as a fallback when the range is absent.
pub fn has_next_page(html: &str) -> bool {
    let doc = Html::parse_document(html);
    let div_sel = Selector::parse("div.pagination").unwrap();
    let link_sel = Selector::parse("a").unwrap();
    let range_re = Regex::new(r"(\d+)\s+to\s+(\d+)\s+of\s+(\d+)").unwrap();

    for div in doc.select(&div_sel) {
        let text: String = div.text().collect();

        if let Some(caps) = range_re.captures(&text) {
            let end: u64 = caps[2].parse().unwrap_or(0);
            let total: u64 = caps[3].parse().unwrap_or(0);
            return end < total;
        }

        for link in div.select(&link_sel) {
            let label: String = link.text().collect();
            if label.to_ascii_lowercase().contains("next") {
                if let Some(href) = link.value().attr("href") {
                    if !href.is_empty() && href != "#" {
                        return true;
                    }
                }
            }
        }
    }

    false
}

fn absolute_url(href: &str) -> String {
    if href.starts_with("http") {
        href.to_string()
    } else {
        format!("{}{}", BASE_URL, href.trim_start_matches('/'))
    }
}

fn normalized_text(el: &ElementRef) -> String {
    el.text()
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn cell_text(el: &ElementRef) -> Option<String> {
    let text = normalized_text(el);
    (!text.is_empty()).then_some(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    const LISTING_PAGE: &str = r#"
        <html><body>
        <div class="pagination">Displaying 1 to 2 of 4</div>
        <table width="785">
          <tr><th>TTB ID</th><th>Permit</th><th>Serial</th><th>Date</th>
              <th>Fanciful</th><th>Brand</th><th>OC</th><th>OD</th>
              <th>CT</th><th>CTD</th></tr>
          <tr>
            <td><a href="viewColaDetails.do?action=publicDisplaySearchAdvanced&amp;ttbid=25059001000222">25059001000222</a></td>
            <td>BWN-FL-21062</td><td>25S003</td><td>03/12/2025</td>
            <td>PEACH MANGO</td><td>SHOTTYS</td><td>16</td><td>FLORIDA</td>
            <td>82</td><td>TABLE FLAVORED WINE</td>
          </tr>
          <tr>
            <td><a href="viewColaDetails.do?action=publicDisplaySearchAdvanced&amp;ttbid=25059001000223">25059001000223</a></td>
            <td></td><td>25S004</td><td>03/13/2025</td>
            <td></td><td>SHOTTYS</td><td>16</td><td>FLORIDA</td>
            <td>82</td><td>TABLE FLAVORED WINE</td>
          </tr>
          <tr><td colspan="10">layout filler</td></tr>
        </table>
        </body></html>"#;

    #[test]
    fn parses_result_rows() {
        let records = parse_listing(LISTING_PAGE);
        assert_eq!(records.len(), 2);

        let first = &records[0];
        assert_eq!(first.ttb_id, "25059001000222");
        assert_eq!(first.permit_no.as_deref(), Some("BWN-FL-21062"));
        assert_eq!(first.completed_date.as_deref(), Some("03/12/2025"));
        assert_eq!(first.brand_name.as_deref(), Some("SHOTTYS"));
        assert!(first.url.contains("ttbid=25059001000222"));
        assert!(first.url.starts_with("https://ttbonline.gov/colasonline/"));
    }

    #[test]
    fn empty_cells_become_none() {
        let records = parse_listing(LISTING_PAGE);
        assert_eq!(records[1].permit_no, None);
        assert_eq!(records[1].fanciful_name, None);
    }

    #[test]
    fn rows_without_id_link_are_skipped() {
        let html = r#"<table width="785">
            <tr><th>h</th></tr>
            <tr><td>no link</td><td>b</td><td>c</td><td>d</td><td>e</td>
                <td>f</td><td>g</td><td>h</td><td>i</td><td>j</td></tr>
        </table>"#;
        assert!(parse_listing(html).is_empty());
    }

    #[test]
    fn next_page_from_range_text() {
        assert!(has_next_page(
            r#"<div class="pagination">1 to 25 of 52</div>"#
        ));
        assert!(!has_next_page(
            r#"<div class="pagination">26 to 52 of 52</div>"#
        ));
    }

    #[test]
    fn next_page_from_live_link() {
        assert!(has_next_page(
            r#"<div class="pagination"><a href="publicPageAdvancedCola.do?action=page">Next</a></div>"#
        ));
        assert!(!has_next_page(
            r##"<div class="pagination"><a href="#">Next</a></div>"##
        ));
        assert!(!has_next_page("<html><body>no pagination</body></html>"));
    }
}
