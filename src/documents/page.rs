//! Document page access
//!
//! `DocumentPage` is the seam between the challenge workflow and the
//! remote browser; `BrowserPage` is the real implementation on top of a
//! DevTools tab. Challenge detection itself is plain HTML inspection and
//! lives here as free functions so it can be exercised without a browser.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use headless_chrome::types::PrintToPdfOptions;
use headless_chrome::{Browser, Tab};
use scraper::{Html, Selector};

use super::DocumentError;

/// A loaded registry document page the workflow can inspect and drive.
#[async_trait]
pub trait DocumentPage: Send + Sync {
    /// Current HTML of the page.
    async fn content(&self) -> Result<String, DocumentError>;

    /// Fill the challenge answer field and submit it.
    async fn submit_answer(&self, answer: &str) -> Result<(), DocumentError>;

    /// Wait for auxiliary resources (label images, signature) to load.
    async fn settle(&self) -> Result<(), DocumentError>;

    /// Render the page to PDF bytes.
    async fn render_pdf(&self) -> Result<Vec<u8>, DocumentError>;
}

/// Detect a challenge page and return its embedded image data URI.
///
/// All three markers must be present: the challenge phrase, the puzzle
/// image carrying a `data:image` URI, and the answer input field.
pub fn detect_challenge(html: &str) -> Option<String> {
    let doc = Html::parse_document(html);

    let text: String = doc.root_element().text().collect();
    if !text.contains("What code is in the image?") {
        return None;
    }

    let input_sel = Selector::parse("input#ans").unwrap();
    if doc.select(&input_sel).next().is_none() {
        return None;
    }

    let img_sel = Selector::parse(r#"img[alt="bottle"]"#).unwrap();
    doc.select(&img_sel)
        .filter_map(|img| img.value().attr("src"))
        .find(|src| src.starts_with("data:image"))
        .map(|src| src.to_string())
}

/// Check whether the page is the actual document (not a challenge).
pub fn is_document_page(html: &str) -> bool {
    let doc = Html::parse_document(html);

    let text: String = doc.root_element().text().collect();
    if text.contains("What code is in the image?") {
        return false;
    }

    let form_sel = Selector::parse(r#"form[name="colaApplicationForm"]"#).unwrap();
    if doc.select(&form_sel).next().is_some() {
        return true;
    }

    let label_sel = Selector::parse("div.label").unwrap();
    if doc
        .select(&label_sel)
        .any(|el| el.text().collect::<String>().contains("TTB ID"))
    {
        return true;
    }

    let section_sel = Selector::parse("div.sectionhead").unwrap();
    doc.select(&section_sel)
        .any(|el| el.text().collect::<String>().contains("PART I - APPLICATION"))
}

/// A DevTools tab holding the document page.
///
/// The underlying library is blocking, so every operation hops to the
/// blocking pool.
pub struct BrowserPage {
    tab: Arc<Tab>,
}

impl BrowserPage {
    /// Open a new tab and navigate it to the given URL.
    pub async fn open(browser: Arc<Browser>, url: String) -> Result<Self, DocumentError> {
        let tab = run_blocking(move || {
            let tab = browser.new_tab()?;
            tab.navigate_to(&url)?;
            tab.wait_until_navigated()?;
            Ok(tab)
        })
        .await?;
        Ok(Self { tab })
    }

    /// Close the tab; errors are logged only, the document is already done.
    pub async fn close(self) {
        let tab = self.tab;
        let result = tokio::task::spawn_blocking(move || tab.close(true)).await;
        match result {
            Ok(Err(e)) => tracing::warn!("Error closing tab: {}", e),
            Err(e) => tracing::warn!("Error closing tab: {}", e),
            _ => {}
        }
    }
}

#[async_trait]
impl DocumentPage for BrowserPage {
    async fn content(&self) -> Result<String, DocumentError> {
        let tab = self.tab.clone();
        run_blocking(move || tab.get_content()).await
    }

    async fn submit_answer(&self, answer: &str) -> Result<(), DocumentError> {
        let tab = self.tab.clone();
        let answer = answer.to_string();
        run_blocking(move || {
            let input = tab.find_element("input#ans")?;
            input.click()?;
            input.type_into(&answer)?;
            tab.find_element("button#jar")?.click()?;
            tab.wait_until_navigated()?;
            // Give the follow-up page a moment to finish rendering
            std::thread::sleep(Duration::from_secs(1));
            Ok(())
        })
        .await
    }

    async fn settle(&self) -> Result<(), DocumentError> {
        let tab = self.tab.clone();
        run_blocking(move || {
            tab.wait_until_navigated()?;
            // Label images and signature load after the document itself
            std::thread::sleep(Duration::from_secs(2));
            Ok(())
        })
        .await
    }

    async fn render_pdf(&self) -> Result<Vec<u8>, DocumentError> {
        let tab = self.tab.clone();
        run_blocking(move || {
            tab.print_to_pdf(Some(PrintToPdfOptions {
                print_background: Some(true),
                paper_width: Some(8.5),
                paper_height: Some(11.0),
                margin_top: Some(0.5),
                margin_bottom: Some(0.5),
                margin_left: Some(0.5),
                margin_right: Some(0.5),
                ..Default::default()
            }))
        })
        .await
    }
}

async fn run_blocking<T, F>(f: F) -> Result<T, DocumentError>
where
    T: Send + 'static,
    F: FnOnce() -> anyhow::Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| DocumentError::Browser(format!("blocking task failed: {}", e)))?
        .map_err(|e| DocumentError::Browser(e.to_string()))
}
