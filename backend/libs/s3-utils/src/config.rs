/// S3 configuration shared across services
use crate::error::{StorageError, StorageResult};
use serde::Deserialize;
use std::path::PathBuf;

const MINIO_REGION: &str = "us-east-1";

#[derive(Debug, Clone, Deserialize)]
pub struct S3Config {
    /// Host (and optional port) of the S3-compatible server
    #[serde(default = "default_server_address")]
    pub server_address: String,
    #[serde(default)]
    pub access_key: String,
    #[serde(default)]
    pub secret: String,
    /// Session token, empty when static credentials are used
    #[serde(default)]
    pub token: String,
    #[serde(default)]
    pub region: String,
    #[serde(default)]
    pub disable_ssl: bool,
    /// Whether to use path-style URLs (false = virtual-hosted-style)
    #[serde(default)]
    pub force_path_style: bool,
    #[serde(default)]
    pub is_minio: bool,
    /// Local folder used for downloads and conversion scratch space
    #[serde(default = "default_local_files_folder")]
    pub local_files_folder: PathBuf,
}

fn default_server_address() -> String {
    "localhost".to_string()
}

fn default_local_files_folder() -> PathBuf {
    PathBuf::from(".")
}

impl S3Config {
    /// Load S3 configuration from `S3_*` environment variables
    pub fn from_env() -> StorageResult<Self> {
        let config: Self = envy::prefixed("S3_")
            .from_env()
            .map_err(|e| StorageError::Config(e.to_string()))?;

        config.finalize()
    }

    /// Apply MinIO overrides and validate
    pub fn finalize(mut self) -> StorageResult<Self> {
        if self.is_minio {
            self.token.clear();
            self.region = MINIO_REGION.to_string();
            self.disable_ssl = true;
            self.force_path_style = true;
        }

        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> StorageResult<()> {
        if self.server_address.is_empty() {
            return Err(StorageError::Config("address is empty".into()));
        }
        if self.access_key.is_empty() {
            return Err(StorageError::Config("access key is empty".into()));
        }
        if self.secret.is_empty() {
            return Err(StorageError::Config("secret is empty".into()));
        }
        if !self.is_minio && self.region.is_empty() {
            return Err(StorageError::Config("region is empty".into()));
        }
        if self.local_files_folder.as_os_str().is_empty() {
            return Err(StorageError::Config("local files folder is not set".into()));
        }
        Ok(())
    }

    /// Endpoint URL handed to the SDK
    pub fn endpoint_url(&self) -> String {
        if self.server_address.contains("://") {
            return self.server_address.clone();
        }

        let scheme = if self.disable_ssl { "http" } else { "https" };
        format!("{}://{}", scheme, self.server_address)
    }

    pub fn session_token(&self) -> Option<String> {
        if self.token.is_empty() {
            None
        } else {
            Some(self.token.clone())
        }
    }
}
