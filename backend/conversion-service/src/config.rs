//! Configuration for conversion service
//!
//! Every section is read from its own environment prefix with `envy`.
use crate::error::{AppError, Result};
use s3_utils::S3Config;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Worker pool and renderer settings (`CONVERTER_*`)
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    pub workers_count: usize,
    pub path_to_converter_executable: PathBuf,
    pub large_png_image_maximum_side_dimension: u32,
    pub small_png_image_maximum_side_dimension: u32,
    pub file_size_limit_settings_file: PathBuf,

    /// One renderer profile per worker, see LibreOffice bug 37531
    #[serde(default = "default_true")]
    pub use_libreoffice_multiple_user_installations: bool,
}

/// Inbound consumer group (`INPUT_KAFKA_*`)
#[derive(Debug, Clone, Deserialize)]
pub struct KafkaInputConfig {
    pub consumer_group_id: String,
    pub broker_address_list: Vec<String>,
    pub topic_list: Vec<String>,

    #[serde(default = "default_consume_delay_secs")]
    pub consume_delay_after_error_secs: u64,

    /// Maximum number of messages processed concurrently per claim batch
    #[serde(default = "default_claim_batch_size")]
    pub claim_batch_size: usize,

    #[serde(default = "default_claim_batch_window_ms")]
    pub claim_batch_window_ms: u64,
}

/// Result publisher (`OUTPUT_KAFKA_*`)
#[derive(Debug, Clone, Deserialize)]
pub struct KafkaOutputConfig {
    pub broker_address_list: Vec<String>,
    pub topic_list: Vec<String>,

    #[serde(default = "default_delivery_timeout_secs")]
    pub delivery_timeout_secs: u64,
}

/// Probe server (`HTTP_SERVER_*`)
#[derive(Debug, Clone, Deserialize)]
pub struct HttpServerConfig {
    #[serde(default = "default_http_host")]
    pub host: String,
    pub port: u16,

    #[serde(default = "default_http_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,
}

/// Logging (`LOGGER_*`)
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoggerConfig {
    #[serde(default)]
    pub is_debug_enabled: bool,
    #[serde(default)]
    pub json_format: bool,
}

fn default_true() -> bool {
    true
}

fn default_consume_delay_secs() -> u64 {
    5
}

fn default_claim_batch_size() -> usize {
    64
}

fn default_claim_batch_window_ms() -> u64 {
    100
}

fn default_delivery_timeout_secs() -> u64 {
    30
}

fn default_http_host() -> String {
    "0.0.0.0".to_string()
}

fn default_http_shutdown_timeout_secs() -> u64 {
    60
}

impl ServiceConfig {
    pub fn validate(&self) -> Result<()> {
        if self.workers_count < 1 {
            return Err(AppError::Config("workers count is wrong".into()));
        }
        if self.path_to_converter_executable.as_os_str().is_empty() {
            return Err(AppError::Config(
                "path to converter executable is not set".into(),
            ));
        }
        if self.large_png_image_maximum_side_dimension < 1 {
            return Err(AppError::Config(
                "large png image maximum side dimension is not valid".into(),
            ));
        }
        if self.small_png_image_maximum_side_dimension < 1 {
            return Err(AppError::Config(
                "small png image maximum side dimension is not valid".into(),
            ));
        }
        if self.file_size_limit_settings_file.as_os_str().is_empty() {
            return Err(AppError::Config(
                "file size limit settings file is not set".into(),
            ));
        }
        Ok(())
    }
}

impl KafkaInputConfig {
    pub fn validate(&self) -> Result<()> {
        if self.consumer_group_id.is_empty() {
            return Err(AppError::Config("consumer group id is empty".into()));
        }
        validate_lists(&self.broker_address_list, &self.topic_list)?;
        if self.claim_batch_size < 1 {
            return Err(AppError::Config("claim batch size is wrong".into()));
        }
        Ok(())
    }

    pub fn brokers(&self) -> String {
        self.broker_address_list.join(",")
    }

    pub fn consume_delay_after_error(&self) -> Duration {
        Duration::from_secs(self.consume_delay_after_error_secs)
    }

    pub fn claim_batch_window(&self) -> Duration {
        Duration::from_millis(self.claim_batch_window_ms)
    }
}

impl KafkaOutputConfig {
    pub fn validate(&self) -> Result<()> {
        validate_lists(&self.broker_address_list, &self.topic_list)
    }

    pub fn brokers(&self) -> String {
        self.broker_address_list.join(",")
    }

    pub fn delivery_timeout(&self) -> Duration {
        Duration::from_secs(self.delivery_timeout_secs)
    }
}

impl LoggerConfig {
    pub fn from_env() -> Result<Self> {
        load("LOGGER_")
    }
}

impl HttpServerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.host.is_empty() {
            return Err(AppError::Config("host is empty".into()));
        }
        if self.port < 1 {
            return Err(AppError::Config("port is empty".into()));
        }
        Ok(())
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn validate_lists(brokers: &[String], topics: &[String]) -> Result<()> {
    if brokers.iter().all(|b| b.trim().is_empty()) {
        return Err(AppError::Config("broker address list is empty".into()));
    }
    if topics.iter().all(|t| t.trim().is_empty()) {
        return Err(AppError::Config("topic list is empty".into()));
    }
    Ok(())
}

/// Main configuration struct, loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub service: ServiceConfig,
    pub storage: S3Config,
    pub input: KafkaInputConfig,
    pub output: KafkaOutputConfig,
    pub http: HttpServerConfig,
    pub logger: LoggerConfig,
}

impl Config {
    /// Load and validate every section
    pub fn from_env() -> Result<Self> {
        let config = Self {
            service: load("CONVERTER_")?,
            storage: S3Config::from_env()?,
            input: load("INPUT_KAFKA_")?,
            output: load("OUTPUT_KAFKA_")?,
            http: load("HTTP_SERVER_")?,
            logger: LoggerConfig::from_env()?,
        };

        config.service.validate()?;
        config.input.validate()?;
        config.output.validate()?;
        config.http.validate()?;

        Ok(config)
    }
}

fn load<T>(prefix: &str) -> Result<T>
where
    T: serde::de::DeserializeOwned,
{
    envy::prefixed(prefix)
        .from_env()
        .map_err(|e| AppError::Config(format!("{prefix}*: {e}")))
}
