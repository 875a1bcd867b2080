//! Background removal stage
//!
//! Each image gets at most one remote segmentation call per attempt; a failed
//! image falls back to its original so the request keeps going. Results are
//! always index-aligned with the input, whatever order the calls finish in.

use crate::models::{BackgroundRemovalSummary, FallbackReason, ImageAsset, MaskedImageResult};
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use governor::{Quota, RateLimiter};
use photomesh_common::config::BackgroundRemovalConfig;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, StatusCode};
use std::num::NonZeroU32;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Background removal errors
///
/// Never fatal for a request: the orchestrator turns them into per-image
/// fallbacks.
#[derive(Debug, Error)]
pub enum BackgroundRemovalError {
    #[error("HTTP client setup failed: {0}")]
    Client(String),

    #[error("Request timed out")]
    Timeout,

    #[error("Network error: {0}")]
    Network(String),

    #[error("Rate limited by removal service")]
    RateLimited,

    #[error("Removal service returned {status}: {body}")]
    Http { status: u16, body: String },

    #[error("Removal service returned an empty body")]
    EmptyBody,

    #[error("Removal service returned a non-image body ({0} bytes)")]
    NotAnImage(usize),

    #[error("Failed to store masked image {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl BackgroundRemovalError {
    /// Whether another attempt may succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            BackgroundRemovalError::Timeout
            | BackgroundRemovalError::Network(_)
            | BackgroundRemovalError::RateLimited
            | BackgroundRemovalError::EmptyBody => true,
            BackgroundRemovalError::Http { status, .. } => *status >= 500,
            BackgroundRemovalError::Client(_)
            | BackgroundRemovalError::NotAnImage(_)
            | BackgroundRemovalError::Write { .. } => false,
        }
    }
}

/// Remote capability that isolates the subject of an image
#[async_trait]
pub trait BackgroundRemover: Send + Sync {
    /// Return the RGBA PNG for `image`
    async fn remove(&self, image: &ImageAsset, credential: &str) -> Result<Vec<u8>, BackgroundRemovalError>;
}

/// Photoroom `segment` API client
pub struct PhotoroomClient {
    http_client: Client,
    endpoint: String,
    max_attempts: u32,
    retry_delay: Duration,
    rate_limiter: Option<
        RateLimiter<
            governor::state::NotKeyed,
            governor::state::InMemoryState,
            governor::clock::DefaultClock,
        >,
    >,
}

impl PhotoroomClient {
    pub fn new(config: &BackgroundRemovalConfig, user_agent: &str) -> Result<Self, BackgroundRemovalError> {
        let http_client = Client::builder()
            .user_agent(user_agent)
            .timeout(Duration::from_secs(config.timeout_secs))
            .connect_timeout(Duration::from_secs(config.timeout_secs.min(10)))
            .build()
            .map_err(|e| BackgroundRemovalError::Client(e.to_string()))?;

        let rate_limiter = config
            .requests_per_second
            .and_then(NonZeroU32::new)
            .map(|rps| RateLimiter::direct(Quota::per_second(rps)));

        Ok(Self {
            http_client,
            endpoint: config.endpoint.clone(),
            max_attempts: config.max_attempts.max(1),
            retry_delay: DEFAULT_RETRY_DELAY,
            rate_limiter,
        })
    }

    /// Override the base delay between retries
    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn attempt(&self, image: &ImageAsset, credential: &str) -> Result<Vec<u8>, BackgroundRemovalError> {
        if let Some(limiter) = &self.rate_limiter {
            limiter.until_ready().await;
        }

        // Forms are consumed by send, so each attempt builds its own
        let mut part = Part::bytes(image.bytes.clone()).file_name(image.filename.clone());
        if let Some(content_type) = image.content_type.as_deref() {
            part = part
                .mime_str(content_type)
                .map_err(|e| BackgroundRemovalError::Client(e.to_string()))?;
        }
        let form = Form::new()
            .part("image_file", part)
            .text("format", "png")
            .text("channels", "rgba");

        let response = self
            .http_client
            .post(&self.endpoint)
            .header("x-api-key", credential)
            .multipart(form)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    BackgroundRemovalError::Timeout
                } else {
                    BackgroundRemovalError::Network(e.to_string())
                }
            })?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(BackgroundRemovalError::RateLimited);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BackgroundRemovalError::Http {
                status: status.as_u16(),
                body: truncate(&body, 200),
            });
        }

        let bytes = response.bytes().await.map_err(|e| {
            if e.is_timeout() {
                BackgroundRemovalError::Timeout
            } else {
                BackgroundRemovalError::Network(e.to_string())
            }
        })?;

        if bytes.is_empty() {
            return Err(BackgroundRemovalError::EmptyBody);
        }
        if !infer::is_image(&bytes) {
            return Err(BackgroundRemovalError::NotAnImage(bytes.len()));
        }

        Ok(bytes.to_vec())
    }
}

#[async_trait]
impl BackgroundRemover for PhotoroomClient {
    async fn remove(&self, image: &ImageAsset, credential: &str) -> Result<Vec<u8>, BackgroundRemovalError> {
        let mut attempt = 1;
        loop {
            match self.attempt(image, credential).await {
                Ok(bytes) => return Ok(bytes),
                Err(e) if e.is_retryable() && attempt < self.max_attempts => {
                    // 429 backs off exponentially, other transient errors wait the base delay
                    let delay = match e {
                        BackgroundRemovalError::RateLimited => self.retry_delay.saturating_mul(backoff_factor(attempt)),
                        _ => self.retry_delay,
                    };
                    debug!(
                        index = image.index,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Retrying background removal"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Runs background removal across a request's images
#[derive(Clone)]
pub struct BackgroundRemovalStage {
    remover: Arc<dyn BackgroundRemover>,
    max_concurrent: usize,
}

impl BackgroundRemovalStage {
    pub fn new(remover: Arc<dyn BackgroundRemover>, max_concurrent: usize) -> Self {
        Self {
            remover,
            max_concurrent: max_concurrent.max(1),
        }
    }

    /// Produce one [`MaskedImageResult`] per input image, in input order
    ///
    /// `raw_paths[i]` is where image `i` was persisted; fallbacks point
    /// there. Without a usable credential no remote call is made.
    pub async fn remove_backgrounds(
        &self,
        request_id: Uuid,
        images: &[ImageAsset],
        raw_paths: &[PathBuf],
        masked_dir: &Path,
        credential: Option<&str>,
    ) -> (Vec<MaskedImageResult>, BackgroundRemovalSummary) {
        let credential = credential.filter(|c| !c.trim().is_empty());

        let Some(credential) = credential else {
            info!(
                request_id = %request_id,
                count = images.len(),
                "No removal credential, using original images"
            );
            let results: Vec<_> = images
                .iter()
                .zip(raw_paths)
                .map(|(image, raw)| MaskedImageResult::Fallback {
                    index: image.index,
                    original: raw.clone(),
                    reason: FallbackReason::NoCredential,
                })
                .collect();
            let summary = BackgroundRemovalSummary::from_results(&results, false);
            return (results, summary);
        };

        // Calls are collected before streaming; `buffered` keeps output order
        // equal to input order
        let calls: Vec<_> = images
            .iter()
            .zip(raw_paths)
            .map(|(image, raw)| self.remove_one(request_id, image, raw, masked_dir, credential))
            .collect();
        let results: Vec<MaskedImageResult> = stream::iter(calls)
            .buffered(self.max_concurrent)
            .collect()
            .await;

        let summary = BackgroundRemovalSummary::from_results(&results, true);
        info!(
            request_id = %request_id,
            processed = summary.processed,
            failed = summary.failed,
            total = summary.total,
            "Background removal complete"
        );

        (results, summary)
    }

    async fn remove_one(
        &self,
        request_id: Uuid,
        image: &ImageAsset,
        raw_path: &Path,
        masked_dir: &Path,
        credential: &str,
    ) -> MaskedImageResult {
        let outcome = match self.remover.remove(image, credential).await {
            Ok(bytes) => store_masked(raw_path, masked_dir, &bytes).await,
            Err(e) => Err(e),
        };

        match outcome {
            Ok(path) => {
                debug!(request_id = %request_id, index = image.index, "Background removed");
                MaskedImageResult::Removed {
                    index: image.index,
                    path,
                }
            }
            Err(e) => {
                warn!(
                    request_id = %request_id,
                    index = image.index,
                    error = %e,
                    "Background removal failed, using original"
                );
                MaskedImageResult::Fallback {
                    index: image.index,
                    original: raw_path.to_path_buf(),
                    reason: FallbackReason::RemovalFailed(e.to_string()),
                }
            }
        }
    }
}

/// Write the masked PNG next to its siblings, named after the original
///
/// Written to a temporary name first so a reader never sees a partial file.
async fn store_masked(raw_path: &Path, masked_dir: &Path, bytes: &[u8]) -> Result<PathBuf, BackgroundRemovalError> {
    let stem = raw_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "image".to_string());
    let path = masked_dir.join(format!("{}.png", stem));
    let tmp_path = masked_dir.join(format!("{}.png.tmp", stem));

    tokio::fs::write(&tmp_path, bytes)
        .await
        .map_err(|source| BackgroundRemovalError::Write {
            path: tmp_path.clone(),
            source,
        })?;
    tokio::fs::rename(&tmp_path, &path)
        .await
        .map_err(|source| BackgroundRemovalError::Write {
            path: path.clone(),
            source,
        })?;

    Ok(path)
}

/// Multiplier for the delay after the given failed attempt (1, 2, 4, ...)
fn backoff_factor(attempt: u32) -> u32 {
    2u32.checked_pow(attempt.saturating_sub(1)).unwrap_or(u32::MAX)
}

fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}
