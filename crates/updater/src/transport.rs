use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;

use crate::catalog::{parse_version_table, VersionTable};
use crate::download::{DownloadResult, Downloader, HttpPackageSource};
use crate::error::{Result, UpdateError};
use crate::progress::TransferProgress;
use crate::session::{Session, SessionNegotiator};
use crate::transfer::{TransferCoordinator, TransferHandle};
use crate::version::VersionCode;

const VERSION_TIMEOUT: Duration = Duration::from_secs(5);
const CATALOG_TIMEOUT: Duration = Duration::from_secs(5);

/// Everything the update workflow drives remotely: the device's main service,
/// the catalog host, and the device's update endpoint.
#[async_trait]
pub trait UpdateTransport: Send + Sync {
    /// Version the device is currently running (`GET /server_version`).
    async fn server_version(&self, address: &str, port: u16) -> Result<VersionCode>;

    /// Fetch and parse the remotely hosted version table.
    async fn version_table(&self, url: &str) -> Result<VersionTable>;

    /// Download a package to `destination`, verifying size and digest.
    async fn download_package(
        &self,
        url: &str,
        expected_hash: &str,
        destination: &Path,
    ) -> DownloadResult;

    /// Handshake with the device's update endpoint.
    async fn handshake(&self, address: &str, port: u16) -> Result<Session>;

    /// Declare the upcoming upload and obtain a transfer slot.
    async fn prepare_transfer(
        &self,
        address: &str,
        port: u16,
        token: &str,
        filename: &str,
        content_hash: &str,
        size: u64,
    ) -> Result<TransferHandle>;

    /// Upload the file into its prepared slot.
    async fn transfer_file(
        &self,
        address: &str,
        port: u16,
        token: &str,
        file_path: &Path,
        handle: &TransferHandle,
    ) -> Result<()>;
}

/// Production transport over HTTP, sharing one reqwest client across all
/// calls. Download and upload progress is logged.
pub struct HttpUpdateTransport {
    client: Client,
    downloader: Downloader<HttpPackageSource>,
    negotiator: SessionNegotiator,
    coordinator: TransferCoordinator,
}

impl HttpUpdateTransport {
    pub fn new() -> Self {
        Self::with_client(Client::new())
    }

    /// Build over a caller-configured client (proxies, TLS settings, ...).
    pub fn with_client(client: Client) -> Self {
        Self {
            downloader: Downloader::new(HttpPackageSource::new(client.clone())),
            negotiator: SessionNegotiator::new(client.clone()),
            coordinator: TransferCoordinator::new(client.clone()),
            client,
        }
    }
}

impl Default for HttpUpdateTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl UpdateTransport for HttpUpdateTransport {
    async fn server_version(&self, address: &str, port: u16) -> Result<VersionCode> {
        let url = format!("http://{address}:{port}/server_version");
        let response = self.client.get(&url).timeout(VERSION_TIMEOUT).send().await?;
        let status = response.status();
        let body = response.text().await?;
        parse_server_version(status, &body)
    }

    async fn version_table(&self, url: &str) -> Result<VersionTable> {
        let response = self.client.get(url).timeout(CATALOG_TIMEOUT).send().await?;
        let status = response.status();
        let body = response.text().await?;
        if status != StatusCode::OK {
            return Err(UpdateError::Status { status, body });
        }
        parse_version_table(&body)
    }

    async fn download_package(
        &self,
        url: &str,
        expected_hash: &str,
        destination: &Path,
    ) -> DownloadResult {
        let mut sink = |progress: TransferProgress| {
            tracing::info!(
                bytes = progress.bytes_transferred,
                total = progress.total_bytes,
                "download progress: {:.1}%",
                progress.percentage
            );
        };
        self.downloader
            .fetch_and_verify(url, expected_hash, destination, &mut sink)
            .await
    }

    async fn handshake(&self, address: &str, port: u16) -> Result<Session> {
        self.negotiator.handshake(address, port).await
    }

    async fn prepare_transfer(
        &self,
        address: &str,
        port: u16,
        token: &str,
        filename: &str,
        content_hash: &str,
        size: u64,
    ) -> Result<TransferHandle> {
        self.coordinator
            .prepare(address, port, token, filename, content_hash, size)
            .await
    }

    async fn transfer_file(
        &self,
        address: &str,
        port: u16,
        token: &str,
        file_path: &Path,
        handle: &TransferHandle,
    ) -> Result<()> {
        let sink = |progress: TransferProgress| {
            tracing::info!(
                bytes = progress.bytes_transferred,
                total = progress.total_bytes,
                "transfer progress: {:.1}%",
                progress.percentage
            );
        };
        self.coordinator
            .transfer(address, port, token, file_path, handle, sink)
            .await
    }
}

#[derive(Deserialize)]
struct VersionBody {
    version: String,
}

fn parse_server_version(status: StatusCode, body: &str) -> Result<VersionCode> {
    if status != StatusCode::OK {
        return Err(UpdateError::Status {
            status,
            body: body.to_owned(),
        });
    }
    let parsed: VersionBody = serde_json::from_str(body)
        .map_err(|err| UpdateError::protocol(format!("invalid server version response: {err}")))?;
    Ok(parsed.version.parse()?)
}
