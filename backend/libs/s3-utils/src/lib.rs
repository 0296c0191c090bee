/// Shared S3 utilities
///
/// Provides the object store abstraction used by the conversion service,
/// an AWS SDK backed client for S3-compatible servers and the multipart
/// upload protocol driver.
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::{Credentials, Region};
use aws_sdk_s3::Client;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

pub mod config;
pub mod error;
pub mod multipart;
pub mod operations;
pub mod store;

pub use config::S3Config;
pub use error::{StorageError, StorageResult};
pub use multipart::{MultipartApi, PartTag, UploadOptions, PART_SIZE};
pub use store::{local_file_name, presence, DownloadedFile, ObjectStore};

/// Timeout of the connectivity check
pub const PING_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Shared S3 client wrapper
#[derive(Clone)]
pub struct S3Client {
    client: Arc<Client>,
    config: S3Config,
    upload_options: UploadOptions,
}

impl S3Client {
    /// Create new S3 client from `S3_*` environment variables
    pub async fn from_env() -> StorageResult<Self> {
        let config = S3Config::from_env()?;
        Ok(Self::with_config(config).await)
    }

    /// Create new S3 client with custom configuration
    pub async fn with_config(config: S3Config) -> Self {
        let credentials = Credentials::new(
            config.access_key.clone(),
            config.secret.clone(),
            config.session_token(),
            None,
            "conversion_service_s3",
        );

        let sdk_config = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()))
            .credentials_provider(credentials)
            .endpoint_url(config.endpoint_url())
            .load()
            .await;

        let s3_config = aws_sdk_s3::config::Builder::from(&sdk_config)
            .force_path_style(config.force_path_style)
            .build();

        info!(
            endpoint = %config.endpoint_url(),
            path_style = config.force_path_style,
            "S3 client initialized"
        );

        Self {
            client: Arc::new(Client::from_conf(s3_config)),
            config,
            upload_options: UploadOptions::default(),
        }
    }

    /// Get reference to underlying AWS S3 client
    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Get S3 configuration
    pub fn config(&self) -> &S3Config {
        &self.config
    }

    pub fn upload_options(&self) -> &UploadOptions {
        &self.upload_options
    }

    /// Block until the server answers a ping, retrying every `interval`.
    ///
    /// Returns `false` when `shutdown` fires first.
    pub async fn wait_until_ready(
        &self,
        interval: Duration,
        mut shutdown: tokio::sync::watch::Receiver<bool>,
    ) -> bool {
        loop {
            match self.ping().await {
                Ok(()) => {
                    info!("Object storage is ready");
                    return true;
                }
                Err(e) => {
                    warn!(error = %e, "Object storage is not ready, retrying");
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        return false;
                    }
                }
            }
        }
    }
}
