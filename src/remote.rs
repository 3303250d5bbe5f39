//! Remote face-swap model invoker.
//!
//! Wraps the single network round-trip to the hosted inference endpoint in
//! an explicit retry policy (bounded attempts, exponential backoff) and
//! normalizes every outcome into a [`SwapError`] taxonomy. The wrapper is
//! a sequential attempt loop with async sleeps between tries; it performs
//! no internal concurrency of its own.

use std::path::{Path, PathBuf};
use std::time::Duration;

use eyre::{Result, WrapErr};
use reqwest::multipart;

use crate::image_ops;
use crate::is_valid_input_file;

/// Default remote inference endpoint base URL.
pub const DEFAULT_ENDPOINT: &str = "http://127.0.0.1:7860";

/// Operation identifier selecting the face-swap pipeline on the remote host.
pub const DEFAULT_OPERATION: &str = "/predict";

/// Why a swap did not produce an output.
///
/// The variants mirror the wire-visible failure strings one-to-one; the
/// HTTP layer flattens them into a 500 body via [`SwapError::message`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SwapError {
    /// An input path was missing or not an allowed image type. No remote
    /// call was made.
    InvalidInput,
    /// Every remote attempt failed; carries the final attempt's error text.
    Remote(String),
    /// The remote call succeeded but returned no usable result path.
    NoResult,
    /// The output finalizer could not persist the result.
    SaveFailed,
}

impl SwapError {
    /// Human-readable reason string returned to clients.
    pub fn message(&self) -> String {
        match self {
            Self::InvalidInput => "Invalid input files".to_string(),
            Self::Remote(detail) => format!("Error: {}", detail),
            Self::NoResult => "Face swap failed".to_string(),
            Self::SaveFailed => "Failed to save output".to_string(),
        }
    }
}

impl std::fmt::Display for SwapError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message())
    }
}

impl std::error::Error for SwapError {}

/// Explicit retry policy: bounded attempts with exponential backoff.
///
/// Delays are `base_delay * multiplier^n` after the (n+1)th failed
/// attempt, so the defaults (3 attempts, 2s base, x2) sleep 2s then 4s.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(2),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Run `op` until it succeeds or the attempt budget is exhausted.
    ///
    /// Every failed attempt is retried after the current backoff delay;
    /// the final attempt's error is returned as-is.
    pub async fn run<T, F, Fut>(&self, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let mut delay = self.base_delay;
        let attempts = self.max_attempts.max(1);

        for attempt in 1..=attempts {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if attempt < attempts => {
                    tracing::warn!(
                        attempt,
                        max_attempts = attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "remote attempt failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    delay = delay.mul_f64(self.multiplier);
                }
                Err(e) => return Err(e),
            }
        }

        unreachable!("retry loop returns on the final attempt")
    }
}

/// Client for the hosted face-swap model.
pub struct RemoteSwapClient {
    endpoint: String,
    operation: String,
    client: reqwest::Client,
    retry: RetryPolicy,
    output_dir: PathBuf,
}

impl RemoteSwapClient {
    pub fn new(
        endpoint: &str,
        operation: &str,
        retry: RetryPolicy,
        output_dir: PathBuf,
    ) -> Self {
        Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            operation: operation.to_string(),
            client: reqwest::Client::new(),
            retry,
            output_dir,
        }
    }

    /// Swap the face from `source` onto `dest` and finalize the output.
    ///
    /// Fails fast on invalid inputs without touching the network. Transport
    /// errors are retried per the policy; post-call validation failures
    /// (missing result, unsaveable output) are not.
    pub async fn swap(
        &self,
        source: &Path,
        dest: &Path,
        source_face_index: u32,
        dest_face_index: u32,
    ) -> Result<PathBuf, SwapError> {
        if !is_valid_input_file(source) || !is_valid_input_file(dest) {
            return Err(SwapError::InvalidInput);
        }

        let result_path = self
            .retry
            .run(|| self.predict(source, dest, source_face_index, dest_face_index))
            .await
            .map_err(|e| SwapError::Remote(e.to_string()))?;

        // The model reports its result as a local path; an empty or stale
        // path means no face swap was produced.
        let result_path = match result_path {
            Some(p) if !p.as_os_str().is_empty() && p.exists() => p,
            _ => return Err(SwapError::NoResult),
        };

        image_ops::finalize_output(&result_path, &self.output_dir).ok_or(SwapError::SaveFailed)
    }

    /// One round-trip to the remote model.
    ///
    /// Posts both images plus the 1-based face indices as a multipart form
    /// and extracts the result path from the JSON reply. `Ok(None)` means
    /// the call itself succeeded but the model found nothing to swap.
    async fn predict(
        &self,
        source: &Path,
        dest: &Path,
        source_face_index: u32,
        dest_face_index: u32,
    ) -> Result<Option<PathBuf>> {
        let started = std::time::Instant::now();
        let outcome = self
            .predict_once(source, dest, source_face_index, dest_face_index)
            .await;
        crate::metrics::record_remote_call(outcome.is_ok(), started.elapsed().as_millis() as u64);
        outcome
    }

    async fn predict_once(
        &self,
        source: &Path,
        dest: &Path,
        source_face_index: u32,
        dest_face_index: u32,
    ) -> Result<Option<PathBuf>> {
        let form = multipart::Form::new()
            .part("source_image", file_part(source).await?)
            .part("dest_image", file_part(dest).await?)
            .text("source_face_index", source_face_index.to_string())
            .text("dest_face_index", dest_face_index.to_string());

        let url = format!("{}{}", self.endpoint, self.operation);
        let response = self
            .client
            .post(&url)
            .multipart(form)
            .send()
            .await
            .wrap_err("remote swap request failed")?
            .error_for_status()
            .wrap_err("remote swap returned an error status")?;

        let body: serde_json::Value = response
            .json()
            .await
            .wrap_err("failed to parse remote swap response")?;

        Ok(body
            .get("result")
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
            .map(PathBuf::from))
    }
}

/// Load a local file into a multipart part with its original filename.
async fn file_part(path: &Path) -> Result<multipart::Part> {
    let bytes = tokio::fs::read(path)
        .await
        .wrap_err_with(|| format!("failed to read {}", path.display()))?;
    let filename = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("image.png")
        .to_string();
    Ok(multipart::Part::bytes(bytes).file_name(filename))
}
