//! Captcha-and-render helper
//!
//! Fetches the registry's COLA document pages through a remote browser,
//! solving the image challenge the registry interposes, and renders the
//! result to an in-memory PDF. Everything here is best-effort from the
//! caller's point of view: a failed document never blocks the record it
//! belongs to.

mod page;
mod solver;

pub use page::{detect_challenge, is_document_page, BrowserPage, DocumentPage};
pub use solver::{ChallengeSolver, SolverError, TwoCaptchaClient};

use std::sync::Arc;
use std::time::Duration;

use headless_chrome::Browser;
use thiserror::Error;
use tokio::sync::Mutex;

use crate::config::DocumentsConfig;

#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("remote browser error: {0}")]
    Browser(String),

    #[error("challenge not solved for {0}")]
    ChallengeFailed(String),

    #[error("solver error: {0}")]
    Solver(#[from] SolverError),
}

/// Where a document page stands in the challenge workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChallengeState {
    /// No challenge markers; the document was served directly
    Direct,
    /// Challenge markers present, answer not yet accepted
    Challenge,
    /// Challenge answered and the document page reached
    Solved,
    /// Attempts exhausted without reaching the document
    Failed,
}

/// Answer submission attempts before giving up on a page.
const MAX_CHALLENGE_ATTEMPTS: u32 = 3;
/// Remote browser connection attempts (serverless cold starts).
const MAX_CONNECT_ATTEMPTS: u32 = 5;

/// Drive a page through the challenge workflow until it is Direct,
/// Solved or Failed.
pub async fn resolve_challenge(
    page: &dyn DocumentPage,
    solver: &dyn ChallengeSolver,
    max_attempts: u32,
) -> Result<ChallengeState, DocumentError> {
    let html = page.content().await?;
    let Some(first_image) = detect_challenge(&html) else {
        tracing::debug!("No challenge present");
        return Ok(ChallengeState::Direct);
    };

    let mut state = ChallengeState::Challenge;
    let mut image = Some(first_image);

    for attempt in 1..=max_attempts {
        let Some(image_data) = image.take() else {
            break;
        };
        tracing::info!("Solving challenge (attempt {}/{})", attempt, max_attempts);

        let answer = match solver.solve(&image_data).await {
            Ok(answer) => answer,
            Err(e) => {
                tracing::error!("Challenge solver failed: {}", e);
                image = detect_challenge(&page.content().await?);
                continue;
            }
        };

        tracing::info!("Submitting challenge answer: {}", answer);
        if let Err(e) = page.submit_answer(&answer).await {
            tracing::error!("Error submitting answer: {}", e);
            image = detect_challenge(&page.content().await?);
            continue;
        }

        let html = page.content().await?;
        match detect_challenge(&html) {
            None if is_document_page(&html) => {
                tracing::info!("Challenge solved, document page reached");
                state = ChallengeState::Solved;
                break;
            }
            None => {
                // Markers gone but no document either; nothing left to retry
                tracing::warn!("Challenge submitted but document page not reached");
                break;
            }
            Some(next_image) => {
                tracing::warn!("Answer rejected, challenge served again");
                image = Some(next_image);
            }
        }
    }

    if state != ChallengeState::Solved {
        tracing::error!("Failed to solve challenge after {} attempts", max_attempts);
        state = ChallengeState::Failed;
    }
    Ok(state)
}

/// Fetches COLA documents as PDF byte buffers via a remote browser.
///
/// The browser connection is established lazily, reused across documents
/// within a run, and must be released with [`disconnect`] when the run
/// ends.
///
/// [`disconnect`]: DocumentFetcher::disconnect
pub struct DocumentFetcher {
    solver: Arc<dyn ChallengeSolver>,
    ws_endpoint: String,
    browser: Mutex<Option<Arc<Browser>>>,
}

impl DocumentFetcher {
    pub fn new(config: &DocumentsConfig) -> Result<Self, DocumentError> {
        let solver = TwoCaptchaClient::new(&config.solver_api_key, &config.solver_base_url)?;
        tracing::info!("Initialized document fetcher");
        Ok(Self {
            solver: Arc::new(solver),
            ws_endpoint: config.browser_ws_endpoint.clone(),
            browser: Mutex::new(None),
        })
    }

    /// Fetch one COLA document, handling any challenge in the way.
    pub async fn fetch_document(&self, ttb_id: &str) -> Result<Vec<u8>, DocumentError> {
        let url = format!(
            "{}viewColaDetails.do?action=publicFormDisplay&ttbid={}",
            crate::scrape::BASE_URL,
            ttb_id
        );
        tracing::info!("Fetching COLA document PDF for TTB ID: {}", ttb_id);

        let browser = self.browser().await?;
        let document_page = BrowserPage::open(browser, url).await?;
        let result = self.render_document(&document_page, ttb_id).await;
        document_page.close().await;
        result
    }

    async fn render_document(
        &self,
        document_page: &BrowserPage,
        ttb_id: &str,
    ) -> Result<Vec<u8>, DocumentError> {
        let state =
            resolve_challenge(document_page, self.solver.as_ref(), MAX_CHALLENGE_ATTEMPTS).await?;

        match state {
            ChallengeState::Direct | ChallengeState::Solved => {
                document_page.settle().await?;
                let pdf = document_page.render_pdf().await?;
                tracing::info!("Generated PDF for {}: {} bytes", ttb_id, pdf.len());
                Ok(pdf)
            }
            ChallengeState::Challenge | ChallengeState::Failed => {
                Err(DocumentError::ChallengeFailed(ttb_id.to_string()))
            }
        }
    }

    async fn browser(&self) -> Result<Arc<Browser>, DocumentError> {
        let mut guard = self.browser.lock().await;
        if let Some(browser) = guard.as_ref() {
            return Ok(browser.clone());
        }

        let browser = connect_with_retry(&self.ws_endpoint, MAX_CONNECT_ATTEMPTS).await?;
        *guard = Some(browser.clone());
        Ok(browser)
    }

    /// Release the browser connection. Safe to call when never connected.
    pub async fn disconnect(&self) {
        let mut guard = self.browser.lock().await;
        if guard.take().is_some() {
            tracing::info!("Browser session released");
        }
    }
}

/// Connect to the remote browser, retrying through cold starts with a
/// capped exponential backoff.
async fn connect_with_retry(
    ws_endpoint: &str,
    max_attempts: u32,
) -> Result<Arc<Browser>, DocumentError> {
    let mut last_error = String::new();

    for attempt in 1..=max_attempts {
        tracing::info!(
            "Remote browser connection attempt {}/{}...",
            attempt,
            max_attempts
        );

        let endpoint = ws_endpoint.to_string();
        match tokio::task::spawn_blocking(move || Browser::connect(endpoint)).await {
            Ok(Ok(browser)) => {
                tracing::info!("Remote browser connection established on attempt {}", attempt);
                return Ok(Arc::new(browser));
            }
            Ok(Err(e)) => {
                tracing::warn!("Connection attempt {} failed: {}", attempt, e);
                last_error = e.to_string();
            }
            Err(e) => {
                tracing::warn!("Connection attempt {} failed: {}", attempt, e);
                last_error = e.to_string();
            }
        }

        if attempt < max_attempts {
            let wait = Duration::from_secs(2u64.pow(attempt).min(30));
            tracing::info!("Waiting {:?} before retry...", wait);
            tokio::time::sleep(wait).await;
        }
    }

    Err(DocumentError::Browser(format!(
        "failed to connect after {} attempts: {}",
        max_attempts, last_error
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    use async_trait::async_trait;
    use std::sync::Mutex as StdMutex;

    const CHALLENGE_PAGE: &str = r#"
        <html><body>
        <p>What code is in the image?</p>
        <img alt="bottle" src="data:image/png;base64,iVBORw0KGgoAAAANSUhEUg">
        <input id="ans" name="answer">
        <button id="jar">Submit</button>
        </body></html>"#;

    const DOCUMENT_PAGE: &str = r#"
        <html><body>
        <form name="colaApplicationForm">
        <div class="sectionhead">PART I - APPLICATION</div>
        <div class="label">TTB ID</div><div class="data">25059001000222</div>
        </form>
        </body></html>"#;

    /// Page double: serves a fixed sequence of page states, advancing one
    /// state per submitted answer.
    struct ScriptedPage {
        states: Vec<&'static str>,
        cursor: StdMutex<usize>,
        answers: StdMutex<Vec<String>>,
    }

    impl ScriptedPage {
        fn new(states: Vec<&'static str>) -> Self {
            Self {
                states,
                cursor: StdMutex::new(0),
                answers: StdMutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl DocumentPage for ScriptedPage {
        async fn content(&self) -> Result<String, DocumentError> {
            let cursor = *self.cursor.lock().unwrap();
            let index = cursor.min(self.states.len() - 1);
            Ok(self.states[index].to_string())
        }

        async fn submit_answer(&self, answer: &str) -> Result<(), DocumentError> {
            self.answers.lock().unwrap().push(answer.to_string());
            *self.cursor.lock().unwrap() += 1;
            Ok(())
        }

        async fn settle(&self) -> Result<(), DocumentError> {
            Ok(())
        }

        async fn render_pdf(&self) -> Result<Vec<u8>, DocumentError> {
            Ok(b"%PDF-1.4 scripted".to_vec())
        }
    }

    struct StubSolver {
        answer: &'static str,
    }

    #[async_trait]
    impl ChallengeSolver for StubSolver {
        async fn solve(&self, _image: &str) -> Result<String, SolverError> {
            Ok(self.answer.to_string())
        }
    }

    struct BrokenSolver;

    #[async_trait]
    impl ChallengeSolver for BrokenSolver {
        async fn solve(&self, _image: &str) -> Result<String, SolverError> {
            Err(SolverError::Rejected("ERROR_ZERO_BALANCE".to_string()))
        }
    }

    #[tokio::test]
    async fn direct_page_skips_the_solver() {
        let page = ScriptedPage::new(vec![DOCUMENT_PAGE]);
        let state = resolve_challenge(&page, &BrokenSolver, 3).await.unwrap();
        assert_eq!(state, ChallengeState::Direct);
        assert!(page.answers.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn challenge_fixture_reaches_solved_with_nonempty_pdf() {
        let page = ScriptedPage::new(vec![CHALLENGE_PAGE, DOCUMENT_PAGE]);
        let solver = StubSolver { answer: "XK7P" };

        let state = resolve_challenge(&page, &solver, 3).await.unwrap();
        assert_eq!(state, ChallengeState::Solved);
        assert_eq!(*page.answers.lock().unwrap(), vec!["XK7P".to_string()]);

        let pdf = page.render_pdf().await.unwrap();
        assert!(!pdf.is_empty());
    }

    #[tokio::test]
    async fn repeated_challenges_consume_attempts_then_fail() {
        // The registry keeps serving the challenge no matter the answer
        let page = ScriptedPage::new(vec![CHALLENGE_PAGE, CHALLENGE_PAGE, CHALLENGE_PAGE, CHALLENGE_PAGE]);
        let solver = StubSolver { answer: "WRONG" };

        let state = resolve_challenge(&page, &solver, 3).await.unwrap();
        assert_eq!(state, ChallengeState::Failed);
        assert_eq!(page.answers.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn solver_failure_exhausts_attempts_without_submitting() {
        let page = ScriptedPage::new(vec![CHALLENGE_PAGE]);
        let state = resolve_challenge(&page, &BrokenSolver, 3).await.unwrap();
        assert_eq!(state, ChallengeState::Failed);
        assert!(page.answers.lock().unwrap().is_empty());
    }
}
