//! Liveness, readiness and metrics endpoints

use crate::error::{AppError, Result};
use crate::metrics::Metrics;
use crate::pool::WorkerPool;
use crate::service::ResultPublisher;
use actix_web::{web, HttpResponse};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Upper bound for each readiness step that may wait
pub const READINESS_TIMEOUT: Duration = Duration::from_secs(10);

const INPUT_NOT_READY: &str = "input kafka is not ready";
const OUTPUT_NOT_READY: &str = "output kafka is not ready";
const STORAGE_NOT_READY: &str = "storage is not ready";

#[derive(Clone)]
pub struct Readiness {
    input_ready: Arc<AtomicBool>,
    publisher: Arc<dyn ResultPublisher>,
    pool: WorkerPool,
    timeout: Duration,
}

impl Readiness {
    pub fn new(input_ready: Arc<AtomicBool>, publisher: Arc<dyn ResultPublisher>, pool: WorkerPool) -> Self {
        Self {
            input_ready,
            publisher,
            pool,
            timeout: READINESS_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Inbound consumer, then outbound topics, then a storage ping through an idle worker
    pub async fn check(&self) -> Result<()> {
        if !self.input_ready.load(Ordering::Acquire) {
            return Err(AppError::NotReady(INPUT_NOT_READY));
        }

        if let Err(e) = self.publisher.check_ready() {
            debug!(error = %e, "Output is not ready");
            return Err(AppError::NotReady(OUTPUT_NOT_READY));
        }

        let lease = tokio::time::timeout(self.timeout, self.pool.acquire())
            .await
            .map_err(|_| AppError::NotReady(STORAGE_NOT_READY))??;

        match tokio::time::timeout(self.timeout, lease.storage().ping()).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                debug!(error = %e, "Storage ping failed");
                Err(AppError::NotReady(STORAGE_NOT_READY))
            }
            Err(_) => Err(AppError::NotReady(STORAGE_NOT_READY)),
        }
    }
}

async fn live() -> HttpResponse {
    HttpResponse::Ok().finish()
}

async fn ready(readiness: web::Data<Readiness>) -> Result<HttpResponse> {
    readiness.check().await?;
    Ok(HttpResponse::Ok().finish())
}

async fn metrics(metrics: web::Data<Metrics>) -> Result<HttpResponse> {
    let (content_type, body) = metrics.render()?;
    Ok(HttpResponse::Ok().content_type(content_type).body(body))
}

/// Register the probe routes; expects `Readiness` and `Metrics` app data
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/live", web::get().to(live))
        .route("/ready", web::get().to(ready))
        .route("/metrics", web::get().to(metrics));
}
