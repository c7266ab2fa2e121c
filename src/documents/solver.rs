//! Challenge solver client
//!
//! Wire client for the external image-captcha solving service: submit the
//! image, then poll for the answer with a bounded wait.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SolverError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("solver rejected request: {0}")]
    Rejected(String),

    #[error("solver timed out waiting for an answer")]
    Timeout,
}

/// Something that can turn a challenge image into its answer text.
#[async_trait]
pub trait ChallengeSolver: Send + Sync {
    /// Solve an image challenge. Accepts raw base64 or a full
    /// `data:image/...;base64,` URI.
    async fn solve(&self, image: &str) -> Result<String, SolverError>;
}

/// Poll cadence and bound: 2s apart, up to 2 minutes total.
const POLL_INTERVAL: Duration = Duration::from_secs(2);
const MAX_POLLS: u32 = 60;

/// Client for the 2Captcha-style HTTP API.
pub struct TwoCaptchaClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct SolverResponse {
    status: i32,
    request: String,
}

impl TwoCaptchaClient {
    pub fn new(api_key: &str, base_url: &str) -> Result<Self, SolverError> {
        let http = reqwest::Client::builder()
            // Generous: covers a full submit-and-poll cycle
            .timeout(Duration::from_secs(180))
            .build()?;
        tracing::info!("Initialized challenge solver client");
        Ok(Self {
            http,
            api_key: api_key.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn submit(&self, image_base64: &str) -> Result<String, SolverError> {
        let response: SolverResponse = self
            .http
            .post(format!("{}/in.php", self.base_url))
            .form(&[
                ("key", self.api_key.as_str()),
                ("method", "base64"),
                ("body", image_base64),
                ("json", "1"),
            ])
            .send()
            .await?
            .json()
            .await?;

        if response.status != 1 {
            return Err(SolverError::Rejected(response.request));
        }
        tracing::info!("Challenge submitted, id: {}", response.request);
        Ok(response.request)
    }

    async fn poll(&self, challenge_id: &str) -> Result<String, SolverError> {
        for attempt in 1..=MAX_POLLS {
            tokio::time::sleep(POLL_INTERVAL).await;

            let response: SolverResponse = self
                .http
                .get(format!("{}/res.php", self.base_url))
                .query(&[
                    ("key", self.api_key.as_str()),
                    ("action", "get"),
                    ("id", challenge_id),
                    ("json", "1"),
                ])
                .send()
                .await?
                .json()
                .await?;

            if response.status == 1 {
                tracing::info!("Challenge solved: {}", response.request);
                return Ok(response.request);
            }
            if response.request != "CAPCHA_NOT_READY" {
                return Err(SolverError::Rejected(response.request));
            }
            tracing::debug!("Answer not ready yet (poll {}/{})", attempt, MAX_POLLS);
        }

        Err(SolverError::Timeout)
    }
}

#[async_trait]
impl ChallengeSolver for TwoCaptchaClient {
    async fn solve(&self, image: &str) -> Result<String, SolverError> {
        // Strip the data URI prefix if present
        let body = if image.starts_with("data:image") {
            image.split_once(',').map(|(_, b)| b).unwrap_or(image)
        } else {
            image
        };

        tracing::info!("Submitting challenge image to solver...");
        let challenge_id = self.submit(body).await?;
        self.poll(&challenge_id).await
    }
}
