use std::path::PathBuf;

use crate::transport::UpdateTransport;
use crate::version::VersionCode;

/// Parameters for one update run.
#[derive(Debug, Clone)]
pub struct UpdateRequest {
    /// Address of the device to update.
    pub device_address: String,
    /// Port of the device's main service (version queries).
    pub device_port: u16,
    /// Port of the device's update endpoint (handshake and transfer).
    pub update_port: u16,
    /// URL of the hosted version table.
    pub table_url: String,
    /// Directory downloaded packages are written to.
    pub update_dir: PathBuf,
    /// Version of this client. Carried for catalog compatibility records;
    /// not currently used for gating.
    pub client_version: VersionCode,
    /// Update even when the device already runs the target version.
    pub skip_version_check: bool,
    /// Update to this exact catalog version instead of the latest pointer.
    pub force_version: Option<VersionCode>,
}

/// Outcome of one update run.
#[derive(Debug, Clone)]
pub struct UpdateResult {
    pub success: bool,
    pub error_message: String,
    pub current_version: Option<VersionCode>,
    pub available_version: Option<VersionCode>,
    pub update_needed: bool,
}

impl UpdateResult {
    fn failure(
        message: impl Into<String>,
        current_version: Option<VersionCode>,
        available_version: Option<VersionCode>,
    ) -> Self {
        Self {
            success: false,
            error_message: message.into(),
            current_version,
            available_version,
            update_needed: false,
        }
    }
}

/// Drives the full update workflow: version negotiation, package download,
/// handshake, and file transfer.
///
/// The workflow is strictly sequential; every stage failure is terminal for
/// the run and is reported as a stage-named `UpdateResult`, never a panic.
/// Nothing is rolled back on failure: a downloaded but untransferred package
/// stays on disk so a retry does not re-download it.
pub struct Updater<T> {
    transport: T,
}

impl<T: UpdateTransport> Updater<T> {
    pub fn new(transport: T) -> Self {
        Self { transport }
    }

    pub async fn update(&self, request: &UpdateRequest) -> UpdateResult {
        tracing::info!(
            device = %request.device_address,
            client_version = %request.client_version,
            "starting update run"
        );

        let current_version = match self
            .transport
            .server_version(&request.device_address, request.device_port)
            .await
        {
            Ok(version) => version,
            Err(err) => {
                tracing::error!(%err, "could not query device version");
                return UpdateResult::failure("Failed to get current server version", None, None);
            }
        };

        let table = match self.transport.version_table(&request.table_url).await {
            Ok(table) => table,
            Err(err) => {
                return UpdateResult::failure(
                    format!("Failed to get version table: {err}"),
                    Some(current_version),
                    None,
                );
            }
        };

        let target_version = match request.force_version {
            Some(forced) => {
                if table.find(forced).is_none() {
                    return UpdateResult::failure(
                        format!("Forced version {forced} not found in version table"),
                        Some(current_version),
                        None,
                    );
                }
                forced
            }
            None => table.latest_version,
        };

        if !request.skip_version_check && current_version >= target_version {
            tracing::info!(%current_version, "device is already up to date");
            return UpdateResult {
                success: true,
                error_message: String::new(),
                current_version: Some(current_version),
                available_version: Some(target_version),
                update_needed: false,
            };
        }

        // The latest pointer can be stale relative to the entry list; search
        // explicitly instead of trusting catalog hygiene.
        let entry = match table.find(target_version) {
            Some(entry) => entry,
            None => {
                return UpdateResult::failure(
                    "Target version not found in version table",
                    Some(current_version),
                    Some(target_version),
                );
            }
        };

        // Past this point an update is known to be needed; failures still
        // report that so callers can distinguish "nothing to do" from
        // "needed but did not happen".
        let failure = |message: String| UpdateResult {
            success: false,
            error_message: message,
            current_version: Some(current_version),
            available_version: Some(target_version),
            update_needed: true,
        };

        if let Err(err) = tokio::fs::create_dir_all(&request.update_dir).await {
            return failure(format!("Failed to create update directory: {err}"));
        }
        let package_name = format!("xvc-server-{}.tar.xz", entry.version);
        let package_path = request.update_dir.join(&package_name);

        tracing::info!(url = %entry.update_url, "downloading update package");
        let download = self
            .transport
            .download_package(&entry.update_url, &entry.content_hash, &package_path)
            .await;
        if !download.success {
            return failure(format!(
                "Failed to download update: {}",
                download.error_message
            ));
        }

        tracing::info!("performing handshake with update endpoint");
        let session = match self
            .transport
            .handshake(&request.device_address, request.update_port)
            .await
        {
            Ok(session) => session,
            Err(err) => return failure(format!("Handshake failed: {err}")),
        };

        let package_size = match tokio::fs::metadata(&package_path).await {
            Ok(metadata) => metadata.len(),
            Err(err) => return failure(format!("Failed to read downloaded package: {err}")),
        };

        tracing::info!("preparing file transfer");
        let handle = match self
            .transport
            .prepare_transfer(
                &request.device_address,
                request.update_port,
                &session.token,
                &package_name,
                &entry.content_hash,
                package_size,
            )
            .await
        {
            Ok(handle) => handle,
            Err(err) => {
                tracing::error!(%err, "prepare-transfer rejected");
                return failure("Failed to prepare file transfer".to_owned());
            }
        };

        tracing::info!("transferring update package");
        if let Err(err) = self
            .transport
            .transfer_file(
                &request.device_address,
                request.update_port,
                &session.token,
                &package_path,
                &handle,
            )
            .await
        {
            tracing::error!(%err, "file transfer failed");
            return failure("File transfer failed".to_owned());
        }

        UpdateResult {
            success: true,
            error_message: String::new(),
            current_version: Some(current_version),
            available_version: Some(target_version),
            update_needed: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{UpdateInfo, VersionTable};
    use crate::download::DownloadResult;
    use crate::error::{Result, UpdateError};
    use crate::session::Session;
    use crate::transfer::TransferHandle;
    use async_trait::async_trait;
    use std::path::Path;
    use std::sync::Mutex;
    use std::time::{Duration, SystemTime};
    use tempfile::tempdir;

    fn version(text: &str) -> VersionCode {
        text.parse().unwrap()
    }

    fn entry(text: &str) -> UpdateInfo {
        UpdateInfo {
            version: version(text),
            release_date: "2025-05-01".into(),
            update_url: format!("https://cdn.example.com/xvc-server-{text}.tar.xz"),
            content_hash: "ab".repeat(32),
            min_client_version: version("1.0.0"),
            description: format!("release {text}"),
        }
    }

    fn table(latest: &str, entries: &[&str]) -> VersionTable {
        VersionTable {
            latest_version: version(latest),
            versions: entries.iter().map(|text| entry(text)).collect(),
        }
    }

    struct MockTransport {
        current_version: Option<VersionCode>,
        table: Option<VersionTable>,
        download_succeeds: bool,
        handshake_succeeds: bool,
        prepare_succeeds: bool,
        transfer_succeeds: bool,
        calls: Mutex<Vec<String>>,
        prepared: Mutex<Option<(String, String, u64)>>,
    }

    impl MockTransport {
        fn new(current: &str, table: VersionTable) -> Self {
            Self {
                current_version: Some(version(current)),
                table: Some(table),
                download_succeeds: true,
                handshake_succeeds: true,
                prepare_succeeds: true,
                transfer_succeeds: true,
                calls: Mutex::new(Vec::new()),
                prepared: Mutex::new(None),
            }
        }

        fn record(&self, name: &str) {
            self.calls.lock().unwrap().push(name.to_owned());
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl UpdateTransport for MockTransport {
        async fn server_version(&self, _address: &str, _port: u16) -> Result<VersionCode> {
            self.record("server_version");
            self.current_version
                .ok_or_else(|| UpdateError::Other("device unreachable".into()))
        }

        async fn version_table(&self, _url: &str) -> Result<VersionTable> {
            self.record("version_table");
            self.table
                .clone()
                .ok_or_else(|| UpdateError::Other("catalog unreachable".into()))
        }

        async fn download_package(
            &self,
            _url: &str,
            _expected_hash: &str,
            destination: &Path,
        ) -> DownloadResult {
            self.record("download_package");
            if self.download_succeeds {
                tokio::fs::write(destination, b"update package bytes")
                    .await
                    .unwrap();
                DownloadResult {
                    success: true,
                    error_message: String::new(),
                }
            } else {
                DownloadResult {
                    success: false,
                    error_message: "failed to download file after multiple attempts".into(),
                }
            }
        }

        async fn handshake(&self, _address: &str, _port: u16) -> Result<Session> {
            self.record("handshake");
            if self.handshake_succeeds {
                Ok(Session {
                    token: "mock-token".into(),
                    expires: SystemTime::now() + Duration::from_secs(300),
                })
            } else {
                Err(UpdateError::Other("handshake refused".into()))
            }
        }

        async fn prepare_transfer(
            &self,
            _address: &str,
            _port: u16,
            token: &str,
            filename: &str,
            content_hash: &str,
            size: u64,
        ) -> Result<TransferHandle> {
            self.record("prepare_transfer");
            assert_eq!(token, "mock-token");
            *self.prepared.lock().unwrap() =
                Some((filename.to_owned(), content_hash.to_owned(), size));
            if self.prepare_succeeds {
                Ok(TransferHandle {
                    transfer_id: "xfer-1".into(),
                })
            } else {
                Err(UpdateError::Other("no free slot".into()))
            }
        }

        async fn transfer_file(
            &self,
            _address: &str,
            _port: u16,
            token: &str,
            file_path: &Path,
            handle: &TransferHandle,
        ) -> Result<()> {
            self.record("transfer_file");
            assert_eq!(token, "mock-token");
            assert_eq!(handle.transfer_id, "xfer-1");
            assert!(file_path.exists());
            if self.transfer_succeeds {
                Ok(())
            } else {
                Err(UpdateError::Other("device rejected upload".into()))
            }
        }
    }

    fn request(update_dir: &Path) -> UpdateRequest {
        UpdateRequest {
            device_address: "192.0.2.10".into(),
            device_port: 8000,
            update_port: 8001,
            table_url: "https://cdn.example.com/versions.json".into(),
            update_dir: update_dir.to_path_buf(),
            client_version: version("1.0.0"),
            skip_version_check: false,
            force_version: None,
        }
    }

    #[tokio::test]
    async fn up_to_date_device_is_a_successful_no_op() {
        let dir = tempdir().unwrap();
        let transport = MockTransport::new("1.2.0", table("1.2.0", &["1.2.0", "1.1.0"]));
        let updater = Updater::new(transport);

        let result = updater.update(&request(dir.path())).await;

        assert!(result.success);
        assert!(!result.update_needed);
        assert_eq!(result.current_version, Some(version("1.2.0")));
        assert_eq!(result.available_version, Some(version("1.2.0")));
        assert_eq!(updater.transport.calls(), ["server_version", "version_table"]);
    }

    #[tokio::test]
    async fn newer_catalog_version_drives_the_full_workflow() {
        let dir = tempdir().unwrap();
        let transport = MockTransport::new("1.1.0", table("1.2.0", &["1.2.0", "1.1.0"]));
        let updater = Updater::new(transport);

        let result = updater.update(&request(dir.path())).await;

        assert!(result.success, "{}", result.error_message);
        assert!(result.update_needed);
        assert_eq!(result.current_version, Some(version("1.1.0")));
        assert_eq!(result.available_version, Some(version("1.2.0")));
        assert_eq!(
            updater.transport.calls(),
            [
                "server_version",
                "version_table",
                "download_package",
                "handshake",
                "prepare_transfer",
                "transfer_file"
            ]
        );

        let package = dir.path().join("xvc-server-1.2.0.tar.xz");
        assert!(package.exists());

        let prepared = updater.transport.prepared.lock().unwrap().clone().unwrap();
        assert_eq!(prepared.0, "xvc-server-1.2.0.tar.xz");
        assert_eq!(prepared.1, "ab".repeat(32));
        assert_eq!(prepared.2, b"update package bytes".len() as u64);
    }

    #[tokio::test]
    async fn unreachable_device_is_terminal_before_any_other_call() {
        let dir = tempdir().unwrap();
        let mut transport = MockTransport::new("1.0.0", table("1.2.0", &["1.2.0"]));
        transport.current_version = None;
        let updater = Updater::new(transport);

        let result = updater.update(&request(dir.path())).await;

        assert!(!result.success);
        assert_eq!(result.error_message, "Failed to get current server version");
        assert_eq!(updater.transport.calls(), ["server_version"]);
    }

    #[tokio::test]
    async fn unreachable_catalog_is_terminal() {
        let dir = tempdir().unwrap();
        let mut transport = MockTransport::new("1.0.0", table("1.2.0", &["1.2.0"]));
        transport.table = None;
        let updater = Updater::new(transport);

        let result = updater.update(&request(dir.path())).await;

        assert!(!result.success);
        assert!(result.error_message.starts_with("Failed to get version table"));
        assert_eq!(result.current_version, Some(version("1.0.0")));
    }

    #[tokio::test]
    async fn forced_version_missing_from_catalog_downloads_nothing() {
        let dir = tempdir().unwrap();
        let transport = MockTransport::new("1.0.0", table("1.2.0", &["1.2.0", "1.1.0"]));
        let updater = Updater::new(transport);

        let mut req = request(dir.path());
        req.force_version = Some(version("9.9.9"));
        let result = updater.update(&req).await;

        assert!(!result.success);
        assert!(result.error_message.contains("9.9.9"));
        assert!(result.error_message.contains("not found"));
        assert!(!updater
            .transport
            .calls()
            .contains(&"download_package".to_owned()));
    }

    #[tokio::test]
    async fn forced_downgrade_with_skipped_check_targets_the_forced_entry() {
        let dir = tempdir().unwrap();
        let transport = MockTransport::new("1.2.0", table("1.2.0", &["1.2.0", "1.1.0"]));
        let updater = Updater::new(transport);

        let mut req = request(dir.path());
        req.force_version = Some(version("1.1.0"));
        req.skip_version_check = true;
        let result = updater.update(&req).await;

        assert!(result.success, "{}", result.error_message);
        assert!(result.update_needed);
        assert_eq!(result.available_version, Some(version("1.1.0")));
        assert!(dir.path().join("xvc-server-1.1.0.tar.xz").exists());
    }

    #[tokio::test]
    async fn stale_latest_pointer_is_terminal() {
        let dir = tempdir().unwrap();
        // latest_version points at an entry the list no longer carries.
        let transport = MockTransport::new("1.0.0", table("2.0.0", &["1.2.0", "1.1.0"]));
        let updater = Updater::new(transport);

        let result = updater.update(&request(dir.path())).await;

        assert!(!result.success);
        assert_eq!(
            result.error_message,
            "Target version not found in version table"
        );
        assert!(!updater
            .transport
            .calls()
            .contains(&"download_package".to_owned()));
    }

    #[tokio::test]
    async fn download_failure_stops_before_handshake() {
        let dir = tempdir().unwrap();
        let mut transport = MockTransport::new("1.1.0", table("1.2.0", &["1.2.0"]));
        transport.download_succeeds = false;
        let updater = Updater::new(transport);

        let result = updater.update(&request(dir.path())).await;

        assert!(!result.success);
        assert!(result.error_message.starts_with("Failed to download update"));
        // The update was still needed, it just did not happen.
        assert!(result.update_needed);
        assert!(!updater.transport.calls().contains(&"handshake".to_owned()));
    }

    #[tokio::test]
    async fn handshake_failure_leaves_the_download_on_disk() {
        let dir = tempdir().unwrap();
        let mut transport = MockTransport::new("1.1.0", table("1.2.0", &["1.2.0"]));
        transport.handshake_succeeds = false;
        let updater = Updater::new(transport);

        let result = updater.update(&request(dir.path())).await;

        assert!(!result.success);
        assert!(result.error_message.starts_with("Handshake failed"));
        assert!(result.update_needed);
        assert!(!updater
            .transport
            .calls()
            .contains(&"prepare_transfer".to_owned()));
        // No rollback: the package stays for a retry without re-download.
        assert!(dir.path().join("xvc-server-1.2.0.tar.xz").exists());
    }

    #[tokio::test]
    async fn prepare_failure_is_terminal_with_stage_message() {
        let dir = tempdir().unwrap();
        let mut transport = MockTransport::new("1.1.0", table("1.2.0", &["1.2.0"]));
        transport.prepare_succeeds = false;
        let updater = Updater::new(transport);

        let result = updater.update(&request(dir.path())).await;

        assert!(!result.success);
        assert_eq!(result.error_message, "Failed to prepare file transfer");
        assert!(result.update_needed);
        assert!(!updater
            .transport
            .calls()
            .contains(&"transfer_file".to_owned()));
    }

    #[tokio::test]
    async fn transfer_failure_is_terminal_with_stage_message() {
        let dir = tempdir().unwrap();
        let mut transport = MockTransport::new("1.1.0", table("1.2.0", &["1.2.0"]));
        transport.transfer_succeeds = false;
        let updater = Updater::new(transport);

        let result = updater.update(&request(dir.path())).await;

        assert!(!result.success);
        assert_eq!(result.error_message, "File transfer failed");
        assert!(result.update_needed);
    }

    #[tokio::test]
    async fn pre_decision_failures_report_no_update_needed() {
        let dir = tempdir().unwrap();
        let mut transport = MockTransport::new("1.1.0", table("1.2.0", &["1.2.0"]));
        transport.table = None;
        let updater = Updater::new(transport);

        let result = updater.update(&request(dir.path())).await;

        assert!(!result.success);
        assert!(!result.update_needed);
    }
}
