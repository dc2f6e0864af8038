use std::path::Path;
use std::time::Duration;

use futures::TryStreamExt;
use reqwest::header::AUTHORIZATION;
use reqwest::multipart::{Form, Part};
use reqwest::{Body, Client, StatusCode};
use serde::{Deserialize, Serialize};
use tokio_util::io::ReaderStream;

use crate::error::{Result, UpdateError};
use crate::progress::{ProgressSink, ProgressTracker};

const PREPARE_TIMEOUT: Duration = Duration::from_secs(5);
const TRANSFER_TIMEOUT: Duration = Duration::from_secs(30);
const UPLOAD_CHUNK_SIZE: usize = 16 * 1024;

/// Server-issued handle scoping exactly one upcoming upload. The device owns
/// its lifecycle; the client only carries the id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferHandle {
    pub transfer_id: String,
}

/// Prepares a transfer slot on the device and streams file bytes into it.
#[derive(Clone)]
pub struct TransferCoordinator {
    client: Client,
}

#[derive(Serialize)]
struct PrepareRequest<'a> {
    filename: &'a str,
    file_hash: &'a str,
    file_size: u64,
}

impl TransferCoordinator {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Declare filename, hash, and size for the upcoming upload and obtain a
    /// transfer slot. No internal retry.
    pub async fn prepare(
        &self,
        address: &str,
        port: u16,
        token: &str,
        filename: &str,
        content_hash: &str,
        size: u64,
    ) -> Result<TransferHandle> {
        let url = format!("http://{address}:{port}/prepare-transfer");
        let response = self
            .client
            .post(&url)
            .timeout(PREPARE_TIMEOUT)
            .header(AUTHORIZATION, format!("Bearer {token}"))
            .json(&PrepareRequest {
                filename,
                file_hash: content_hash,
                file_size: size,
            })
            .send()
            .await?;
        let status = response.status();
        let body = response.text().await?;
        parse_prepare(status, &body)
    }

    /// Upload the file into its prepared slot, reporting progress as bytes
    /// leave the local disk. Precondition violations are reported before any
    /// network call is made.
    pub async fn transfer<S>(
        &self,
        address: &str,
        port: u16,
        token: &str,
        file_path: &Path,
        handle: &TransferHandle,
        sink: S,
    ) -> Result<()>
    where
        S: ProgressSink + 'static,
    {
        let metadata = match tokio::fs::metadata(file_path).await {
            Ok(metadata) => metadata,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(UpdateError::Precondition(format!(
                    "file does not exist: {}",
                    file_path.display()
                )));
            }
            Err(err) => return Err(err.into()),
        };
        if !metadata.is_file() {
            return Err(UpdateError::Precondition(format!(
                "not a regular file: {}",
                file_path.display()
            )));
        }
        let total = metadata.len();
        if total == 0 {
            return Err(UpdateError::Precondition(format!(
                "file is empty: {}",
                file_path.display()
            )));
        }

        let filename = file_path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .ok_or_else(|| {
                UpdateError::Precondition(format!("invalid file path: {}", file_path.display()))
            })?;

        let file = tokio::fs::File::open(file_path).await?;
        let mut tracker = ProgressTracker::new(total);
        let mut sink = sink;
        let mut transferred = 0u64;
        let counted =
            ReaderStream::with_capacity(file, UPLOAD_CHUNK_SIZE).inspect_ok(move |chunk| {
                transferred += chunk.len() as u64;
                if let Some(progress) = tracker.observe(transferred) {
                    sink.report(progress);
                }
            });

        let part = Part::stream_with_length(Body::wrap_stream(counted), total).file_name(filename);
        let form = Form::new().part("file", part);

        let url = format!("http://{address}:{port}/transfer/{}", handle.transfer_id);
        let response = self
            .client
            .post(&url)
            .timeout(TRANSFER_TIMEOUT)
            .header(AUTHORIZATION, format!("Bearer {token}"))
            .multipart(form)
            .send()
            .await?;
        let status = response.status();
        let body = response.text().await?;
        parse_transfer_ack(status, &body)
    }
}

#[derive(Deserialize)]
struct PrepareBody {
    status: String,
    #[serde(default)]
    transfer_id: Option<String>,
}

fn parse_prepare(status: StatusCode, body: &str) -> Result<TransferHandle> {
    if status != StatusCode::OK {
        return Err(UpdateError::Status {
            status,
            body: body.to_owned(),
        });
    }

    let parsed: PrepareBody = serde_json::from_str(body)
        .map_err(|err| UpdateError::protocol(format!("invalid prepare response: {err}")))?;
    if parsed.status != "ready" {
        return Err(UpdateError::protocol(format!(
            "transfer slot not ready (status {:?})",
            parsed.status
        )));
    }
    let transfer_id = parsed
        .transfer_id
        .ok_or_else(|| UpdateError::protocol("prepare response missing transfer_id"))?;

    Ok(TransferHandle { transfer_id })
}

#[derive(Deserialize)]
struct TransferAck {
    status: String,
}

fn parse_transfer_ack(status: StatusCode, body: &str) -> Result<()> {
    if status != StatusCode::OK {
        return Err(UpdateError::Status {
            status,
            body: body.to_owned(),
        });
    }

    let parsed: TransferAck = serde_json::from_str(body)
        .map_err(|err| UpdateError::protocol(format!("invalid transfer response: {err}")))?;
    if parsed.status != "success" {
        return Err(UpdateError::protocol(format!(
            "transfer rejected by device (status {:?})",
            parsed.status
        )));
    }
    Ok(())
}
