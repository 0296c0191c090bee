//! Conversion Service
//!
//! Consumes conversion tasks from Kafka, renders each source document to PDF
//! and to a first-page PNG with LibreOffice, derives two scaled previews,
//! uploads the artifacts to S3 and publishes the outcome back to Kafka.

pub mod config;
pub mod error;
pub mod health;
pub mod imaging;
pub mod kafka;
pub mod limits;
pub mod metrics;
pub mod mime;
pub mod models;
pub mod pool;
pub mod renderer;
pub mod service;
pub mod worker;

// Public re-exports
pub use config::Config;
pub use error::{AppError, Result};
pub use health::Readiness;
pub use kafka::{KafkaResultPublisher, TaskConsumer};
pub use limits::FileSizeLimiter;
pub use metrics::Metrics;
pub use models::{ConversionResult, ConversionTask, ResultMessage};
pub use pool::{WorkerLease, WorkerPool};
pub use renderer::{LibreOffice, Renderer, TargetFormat};
pub use service::{Dispatcher, ResultPublisher, TaskReply};
pub use worker::{ConversionWorker, WorkerDeps, WorkerSettings};
