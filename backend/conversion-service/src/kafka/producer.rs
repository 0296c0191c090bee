//! Conversion result producer

use crate::config::KafkaOutputConfig;
use crate::error::{AppError, Result};
use crate::models::{ConversionResult, ConversionTask, ResultMessage};
use crate::service::ResultPublisher;
use async_trait::async_trait;
use rdkafka::message::{Header, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::ClientConfig;
use std::time::Duration;
use tracing::{debug, error, info};

pub const HEADER_WORKER_NUMBER: &str = "workerNumber";
pub const HEADER_WORK_TIME_BY_WORKER_MS: &str = "workTimeByWorkerMs";
pub const HEADER_WORK_TIME_ASYNC_MS: &str = "workTimeAsyncMs";

/// Publishes each result to every output topic
pub struct KafkaResultPublisher {
    producer: FutureProducer,
    topics: Vec<String>,
    delivery_timeout: Duration,
}

impl KafkaResultPublisher {
    pub fn new(config: &KafkaOutputConfig) -> Result<Self> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", config.brokers())
            .set("acks", "all")
            .set("retries", "3")
            .set("linger.ms", "10")
            .set(
                "message.timeout.ms",
                config.delivery_timeout().as_millis().to_string(),
            )
            .create()
            .map_err(|e| AppError::Kafka(e.to_string()))?;

        let topics: Vec<String> = config
            .topic_list
            .iter()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect();

        info!(brokers = %config.brokers(), topics = ?topics, "Kafka producer initialized");

        Ok(Self {
            producer,
            topics,
            delivery_timeout: config.delivery_timeout(),
        })
    }

    pub fn topics(&self) -> &[String] {
        &self.topics
    }

    /// Wait for queued messages to leave
    pub fn flush(&self, timeout: Duration) -> Result<()> {
        self.producer
            .flush(timeout)
            .map_err(|e| AppError::Kafka(e.to_string()))
    }
}

/// Diagnostic headers attached to every result message
pub fn build_headers(result: &ConversionResult) -> Vec<(&'static str, String)> {
    vec![
        (HEADER_WORKER_NUMBER, result.worker_number.to_string()),
        (HEADER_WORK_TIME_BY_WORKER_MS, result.work_time_by_worker_ms.to_string()),
        (HEADER_WORK_TIME_ASYNC_MS, result.work_time_async_ms.to_string()),
    ]
}

fn owned_headers(headers: &[(&'static str, String)]) -> OwnedHeaders {
    headers.iter().fold(OwnedHeaders::new(), |owned, (key, value)| {
        owned.insert(Header {
            key,
            value: Some(value),
        })
    })
}

#[async_trait]
impl ResultPublisher for KafkaResultPublisher {
    async fn publish(&self, task: &ConversionTask, result: &ConversionResult) -> Result<()> {
        let payload = serde_json::to_vec(&ResultMessage::new(task, result))?;
        let headers = build_headers(result);

        for topic in &self.topics {
            let record = FutureRecord::to(topic)
                .key(&task.file_path)
                .payload(&payload)
                .headers(owned_headers(&headers));

            match self.producer.send(record, self.delivery_timeout).await {
                Ok((partition, offset)) => {
                    debug!(
                        topic = %topic,
                        partition,
                        offset,
                        path = %task.file_path,
                        success = result.is_success(),
                        "Conversion result published"
                    );
                }
                Err((err, _)) => {
                    error!(topic = %topic, path = %task.file_path, error = %err, "Failed to publish conversion result");
                    return Err(AppError::Kafka(err.to_string()));
                }
            }
        }

        Ok(())
    }

    fn check_ready(&self) -> Result<()> {
        if self.topics.is_empty() {
            return Err(AppError::NoTopics);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rdkafka::message::Headers;

    #[test]
    fn test_headers_are_decimal_strings() {
        let result = ConversionResult {
            worker_number: 3,
            work_time_by_worker_ms: 1520,
            work_time_async_ms: 1604,
            ..Default::default()
        };

        assert_eq!(
            build_headers(&result),
            vec![
                ("workerNumber", "3".to_string()),
                ("workTimeByWorkerMs", "1520".to_string()),
                ("workTimeAsyncMs", "1604".to_string()),
            ]
        );
    }

    #[test]
    fn test_owned_headers_keep_order() {
        let headers = owned_headers(&build_headers(&ConversionResult::default()));
        assert_eq!(headers.count(), 3);

        let first = headers.get(0);
        assert_eq!(first.key, "workerNumber");
        assert_eq!(first.value, Some(&b"0"[..]));
    }

    #[test]
    fn test_not_ready_without_topics() {
        let config = KafkaOutputConfig {
            broker_address_list: vec!["localhost:1".into()],
            topic_list: vec![" ".into()],
            delivery_timeout_secs: 1,
        };

        let publisher = KafkaResultPublisher::new(&config).unwrap();
        assert!(matches!(publisher.check_ready(), Err(AppError::NoTopics)));
    }
}
