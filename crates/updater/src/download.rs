use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::CONTENT_LENGTH;
use reqwest::Client;
use tokio::io::AsyncWriteExt;
use tokio::task;

use crate::digest::sha256_file;
use crate::error::{Result, UpdateError};
use crate::progress::{ProgressSink, ProgressTracker};

const PROBE_TIMEOUT: Duration = Duration::from_secs(2);
const FETCH_TIMEOUT: Duration = Duration::from_secs(30);

const MAX_ATTEMPTS: u32 = 3;
const BACKOFF_UNIT: Duration = Duration::from_secs(1);

/// Outcome of a download run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadResult {
    pub success: bool,
    pub error_message: String,
}

impl DownloadResult {
    fn ok() -> Self {
        Self {
            success: true,
            error_message: String::new(),
        }
    }

    fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            error_message: message.into(),
        }
    }
}

/// Abstraction over fetching a remote package to disk.
#[async_trait]
pub trait PackageSource: Send + Sync {
    /// Content length advertised by the server, when it supplies one.
    async fn probe_length(&self, url: &str) -> Result<Option<u64>>;

    /// Stream the resource at `url` into `dest`, reporting progress as the
    /// byte count grows. Returns the number of bytes written.
    async fn fetch_to_file(
        &self,
        url: &str,
        dest: &Path,
        sink: &mut dyn ProgressSink,
    ) -> Result<u64>;
}

/// HTTP package source backed by a shared reqwest client.
#[derive(Clone)]
pub struct HttpPackageSource {
    client: Client,
}

impl HttpPackageSource {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl PackageSource for HttpPackageSource {
    async fn probe_length(&self, url: &str) -> Result<Option<u64>> {
        let response = self.client.head(url).timeout(PROBE_TIMEOUT).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(UpdateError::Status {
                status,
                body: String::new(),
            });
        }

        let length = response
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.parse::<u64>().ok());
        Ok(length)
    }

    async fn fetch_to_file(
        &self,
        url: &str,
        dest: &Path,
        sink: &mut dyn ProgressSink,
    ) -> Result<u64> {
        let response = self.client.get(url).timeout(FETCH_TIMEOUT).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(UpdateError::Status {
                status,
                body: String::new(),
            });
        }

        let total = response.content_length().unwrap_or(0);
        let mut tracker = ProgressTracker::new(total);
        let mut file = tokio::fs::File::create(dest).await?;
        let mut stream = response.bytes_stream();
        let mut written = 0u64;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
            if let Some(progress) = tracker.observe(written) {
                sink.report(progress);
            }
        }
        file.flush().await?;

        Ok(written)
    }
}

/// Downloads a remote package to a local path with bounded retry, size
/// verification, and SHA-256 verification.
pub struct Downloader<S> {
    source: S,
    max_attempts: u32,
    backoff_unit: Duration,
}

impl<S: PackageSource> Downloader<S> {
    pub fn new(source: S) -> Self {
        Self {
            source,
            max_attempts: MAX_ATTEMPTS,
            backoff_unit: BACKOFF_UNIT,
        }
    }

    /// Override the retry bound and backoff unit.
    pub fn with_retry_policy(mut self, max_attempts: u32, backoff_unit: Duration) -> Self {
        self.max_attempts = max_attempts;
        self.backoff_unit = backoff_unit;
        self
    }

    /// Fetch `url` into `destination` and verify its size and digest.
    ///
    /// An empty `expected_hash` skips digest verification; this is used for
    /// auxiliary files that carry no integrity record. A failed attempt never
    /// leaves a partial or corrupt file at `destination`.
    pub async fn fetch_and_verify(
        &self,
        url: &str,
        expected_hash: &str,
        destination: &Path,
        sink: &mut dyn ProgressSink,
    ) -> DownloadResult {
        let expected_len = match self.source.probe_length(url).await {
            Ok(length) => length,
            Err(err) => {
                return DownloadResult::failure(format!("failed to get file information: {err}"));
            }
        };

        for attempt in 1..=self.max_attempts {
            match self
                .attempt(url, expected_len, expected_hash, destination, sink)
                .await
            {
                Ok(()) => return DownloadResult::ok(),
                Err(err) => {
                    tracing::warn!(attempt, %err, "download attempt failed");
                    remove_if_exists(destination).await;
                    // Integrity mismatches retry immediately; transport and
                    // I/O failures back off scaled by the attempt number.
                    if !matches!(err, UpdateError::Integrity { .. }) && attempt < self.max_attempts
                    {
                        tokio::time::sleep(self.backoff_unit * attempt).await;
                    }
                }
            }
        }

        DownloadResult::failure("failed to download file after multiple attempts")
    }

    async fn attempt(
        &self,
        url: &str,
        expected_len: Option<u64>,
        expected_hash: &str,
        destination: &Path,
        sink: &mut dyn ProgressSink,
    ) -> Result<()> {
        let written = self.source.fetch_to_file(url, destination, sink).await?;

        if let Some(expected) = expected_len {
            if written != expected {
                return Err(UpdateError::Integrity {
                    expected: format!("{expected} bytes"),
                    actual: format!("{written} bytes"),
                });
            }
        }

        // Auxiliary files ship without a digest; transport success is enough.
        if expected_hash.is_empty() {
            return Ok(());
        }

        let path = destination.to_path_buf();
        let actual_hash = task::spawn_blocking(move || sha256_file(&path))
            .await
            .map_err(|err| UpdateError::Other(format!("task join error: {err}")))??;
        tracing::info!(hash = %actual_hash, "calculated package digest");

        if actual_hash != expected_hash {
            return Err(UpdateError::Integrity {
                expected: expected_hash.to_owned(),
                actual: actual_hash,
            });
        }

        Ok(())
    }
}

async fn remove_if_exists(path: &Path) {
    if let Err(err) = tokio::fs::remove_file(path).await {
        if err.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!(?path, %err, "failed to remove partial download");
        }
    }
}
