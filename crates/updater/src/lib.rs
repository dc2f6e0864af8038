//! Self-update client for XVC capture devices.
//!
//! This crate negotiates firmware updates for a remote capture server: it
//! compares the device's running version against a hosted version table,
//! downloads the selected package with size and SHA-256 verification, then
//! pushes it to the device over a token-based handshake and chunked file
//! transfer protocol. Each update run is sequential and self-contained; no
//! sessions, catalogs, or digests are cached across runs.
//!
//! ```ignore
//! use xvc_updater::{HttpUpdateTransport, UpdateRequest, Updater};
//!
//! # async fn demo() {
//! let updater = Updater::new(HttpUpdateTransport::new());
//! let result = updater
//!     .update(&UpdateRequest {
//!         device_address: "192.168.177.100".into(),
//!         device_port: 8000,
//!         update_port: 8001,
//!         table_url: "https://cdn.example.com/versions.json".into(),
//!         update_dir: "updates".into(),
//!         client_version: "1.0.0".parse().unwrap(),
//!         skip_version_check: false,
//!         force_version: None,
//!     })
//!     .await;
//!
//! if result.success && !result.update_needed {
//!     println!("device is already up to date");
//! }
//! # }
//! ```

mod catalog;
mod digest;
mod download;
mod error;
mod progress;
mod session;
mod transfer;
mod transport;
mod updater;
mod version;

pub use catalog::{parse_version_table, UpdateInfo, VersionTable};
pub use digest::sha256_file;
pub use download::{DownloadResult, Downloader, HttpPackageSource, PackageSource};
pub use error::{Result, UpdateError};
pub use progress::{ProgressSink, ProgressTracker, TransferProgress};
pub use session::{Session, SessionNegotiator};
pub use transfer::{TransferCoordinator, TransferHandle};
pub use transport::{HttpUpdateTransport, UpdateTransport};
pub use updater::{UpdateRequest, UpdateResult, Updater};
pub use version::{ParseVersionError, VersionCode};
