use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};

use crate::error::{AppError, Result};

const PREFIX: &str = "conversion_service";
const LABEL_MIME_TYPE: &str = "mime_type";

/// Service metrics, registered on a private registry owned by this struct
#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pub incoming_kafka_messages: IntCounter,
    pub incoming_conversion_requests: IntCounterVec,
    pub pending_tasks: IntGauge,
    pub processed_conversion_requests: IntCounterVec,
    pub failed_conversion_requests: IntCounterVec,
    pub conversion_duration_by_worker: HistogramVec,
    pub conversion_duration_async: HistogramVec,
    pub kafka_consumer_errors: IntCounter,
    pub kafka_consumer_group_errors: IntCounter,
    pub kafka_producer_errors: IntCounter,
}

fn duration_buckets() -> Vec<f64> {
    vec![
        100.0, 250.0, 500.0, 1_000.0, 2_500.0, 5_000.0, 10_000.0, 30_000.0, 60_000.0, 120_000.0,
        300_000.0,
    ]
}

fn mime_counter(name: &str, help: &str) -> Result<IntCounterVec> {
    IntCounterVec::new(Opts::new(name, help).namespace(PREFIX), &[LABEL_MIME_TYPE]).map_err(into_app)
}

fn mime_histogram(name: &str, help: &str) -> Result<HistogramVec> {
    HistogramVec::new(
        HistogramOpts::new(name, help)
            .namespace(PREFIX)
            .buckets(duration_buckets()),
        &[LABEL_MIME_TYPE],
    )
    .map_err(into_app)
}

fn counter(name: &str, help: &str) -> Result<IntCounter> {
    IntCounter::with_opts(Opts::new(name, help).namespace(PREFIX)).map_err(into_app)
}

fn into_app(err: prometheus::Error) -> AppError {
    AppError::Internal(format!("metrics: {err}"))
}

impl Metrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let metrics = Self {
            incoming_kafka_messages: counter(
                "incoming_kafka_messages_count",
                "Messages received from the inbound topics",
            )?,
            incoming_conversion_requests: mime_counter(
                "incoming_conversion_requests_count",
                "Conversion tasks taken by a worker",
            )?,
            pending_tasks: IntGauge::with_opts(
                Opts::new("pending_tasks_count", "Tasks accepted and not yet finished")
                    .namespace(PREFIX),
            )
            .map_err(into_app)?,
            processed_conversion_requests: mime_counter(
                "processed_conversion_requests_count",
                "Conversion tasks finished successfully",
            )?,
            failed_conversion_requests: mime_counter(
                "failed_conversion_requests_count",
                "Conversion tasks finished with an error",
            )?,
            conversion_duration_by_worker: mime_histogram(
                "conversion_duration_by_worker_ms",
                "Time spent by a worker on a task",
            )?,
            conversion_duration_async: mime_histogram(
                "conversion_duration_async_ms",
                "Time from dispatch to result, including waiting for a worker",
            )?,
            kafka_consumer_errors: counter(
                "kafka_consumer_errors_count",
                "Errors reported by the inbound consumer",
            )?,
            kafka_consumer_group_errors: counter(
                "kafka_consumer_group_errors_count",
                "Claim batches that ended with an error",
            )?,
            kafka_producer_errors: counter(
                "kafka_producer_errors_count",
                "Result publications that failed",
            )?,
            registry,
        };

        metrics.register_all()?;
        Ok(metrics)
    }

    fn register_all(&self) -> Result<()> {
        let collectors: Vec<Box<dyn prometheus::core::Collector>> = vec![
            Box::new(self.incoming_kafka_messages.clone()),
            Box::new(self.incoming_conversion_requests.clone()),
            Box::new(self.pending_tasks.clone()),
            Box::new(self.processed_conversion_requests.clone()),
            Box::new(self.failed_conversion_requests.clone()),
            Box::new(self.conversion_duration_by_worker.clone()),
            Box::new(self.conversion_duration_async.clone()),
            Box::new(self.kafka_consumer_errors.clone()),
            Box::new(self.kafka_consumer_group_errors.clone()),
            Box::new(self.kafka_producer_errors.clone()),
        ];

        for collector in collectors {
            self.registry.register(collector).map_err(into_app)?;
        }

        #[cfg(target_os = "linux")]
        self.registry
            .register(Box::new(
                prometheus::process_collector::ProcessCollector::for_self(),
            ))
            .map_err(into_app)?;

        Ok(())
    }

    /// Render all metrics in the Prometheus text format
    pub fn render(&self) -> Result<(String, Vec<u8>)> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(into_app)?;
        Ok((encoder.format_type().to_string(), buffer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_render_with_prefix() {
        let metrics = Metrics::new().unwrap();
        metrics.incoming_kafka_messages.inc();
        metrics
            .incoming_conversion_requests
            .with_label_values(&["application/pdf"])
            .inc();
        metrics.pending_tasks.set(3);

        let (content_type, body) = metrics.render().unwrap();
        let text = String::from_utf8(body).unwrap();

        assert!(content_type.starts_with("text/plain"));
        assert!(text.contains("conversion_service_incoming_kafka_messages_count 1"));
        assert!(text.contains("conversion_service_pending_tasks_count 3"));
        assert!(text.contains("mime_type=\"application/pdf\""));
    }

    #[test]
    fn test_independent_registries() {
        let first = Metrics::new().unwrap();
        let second = Metrics::new().unwrap();
        first.kafka_producer_errors.inc();
        assert_eq!(second.kafka_producer_errors.get(), 0);
    }
}
