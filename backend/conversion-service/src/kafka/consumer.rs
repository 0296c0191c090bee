//! Conversion task consumer
//!
//! Messages are claimed in small batches and processed concurrently. Once
//! every message of a batch has been answered, each partition's offset is
//! committed up to its last contiguous success. Any failure pauses
//! consumption: the consumer leaves the group, waits, then rejoins and
//! resumes from the committed offsets.

use crate::config::KafkaInputConfig;
use crate::error::{AppError, Result};
use crate::metrics::Metrics;
use crate::models::ConversionTask;
use crate::service::Dispatcher;
use crate::worker::panic_message;
use rdkafka::consumer::{CommitMode, Consumer, ConsumerContext, Rebalance, StreamConsumer};
use rdkafka::error::KafkaResult;
use rdkafka::message::{Message, OwnedMessage};
use rdkafka::{ClientConfig, ClientContext, Offset, TopicPartitionList};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Flips the readiness flag as partitions are assigned and revoked, and
/// reports failed offset commits
pub struct ReadinessContext {
    ready: Arc<AtomicBool>,
    metrics: Metrics,
}

impl ClientContext for ReadinessContext {}

impl ConsumerContext for ReadinessContext {
    fn pre_rebalance<'a>(&self, rebalance: &Rebalance<'a>) {
        match rebalance {
            Rebalance::Revoke(partitions) => {
                self.ready.store(false, Ordering::Release);
                info!(partitions = partitions.count(), "Partitions revoked");
            }
            Rebalance::Error(e) => {
                self.ready.store(false, Ordering::Release);
                warn!(error = %e, "Rebalance failed");
            }
            Rebalance::Assign(_) => {}
        }
    }

    fn post_rebalance<'a>(&self, rebalance: &Rebalance<'a>) {
        if let Rebalance::Assign(partitions) = rebalance {
            self.ready.store(true, Ordering::Release);
            info!(partitions = partitions.count(), "Partitions assigned");
        }
    }

    fn commit_callback(&self, result: KafkaResult<()>, offsets: &TopicPartitionList) {
        if let Err(e) = result {
            self.metrics.kafka_consumer_errors.inc();
            warn!(error = %e, partitions = offsets.count(), "Offset commit failed");
        }
    }
}

type GroupConsumer = StreamConsumer<ReadinessContext>;

/// Where a message sits in its topic
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct MessagePosition {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
}

impl MessagePosition {
    fn of(message: &OwnedMessage) -> Self {
        Self {
            topic: message.topic().to_string(),
            partition: message.partition(),
            offset: message.offset(),
        }
    }
}

pub struct TaskConsumer {
    consumer: GroupConsumer,
    dispatcher: Dispatcher,
    metrics: Metrics,
    config: KafkaInputConfig,
    ready: Arc<AtomicBool>,
}

impl TaskConsumer {
    pub fn new(config: KafkaInputConfig, dispatcher: Dispatcher, metrics: Metrics) -> Result<Self> {
        let ready = Arc::new(AtomicBool::new(false));
        let context = ReadinessContext {
            ready: ready.clone(),
            metrics: metrics.clone(),
        };

        let consumer: GroupConsumer = ClientConfig::new()
            .set("bootstrap.servers", config.brokers())
            .set("group.id", &config.consumer_group_id)
            .set("client.id", "scid")
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", "earliest")
            .set("partition.assignment.strategy", "roundrobin")
            .set("session.timeout.ms", "45000")
            .set("max.poll.interval.ms", "600000")
            .set("enable.partition.eof", "false")
            .create_with_context(context)
            .map_err(kafka_error)?;

        info!(
            brokers = %config.brokers(),
            group = %config.consumer_group_id,
            topics = ?config.topic_list,
            "Kafka consumer created"
        );

        Ok(Self {
            consumer,
            dispatcher,
            metrics,
            config,
            ready,
        })
    }

    /// Shared flag for the readiness probe
    pub fn readiness(&self) -> Arc<AtomicBool> {
        self.ready.clone()
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    /// Consume until `shutdown` turns true
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        self.subscribe()?;
        info!("Kafka consumer loop started");

        loop {
            if *shutdown.borrow() {
                break;
            }

            let batch = tokio::select! {
                batch = self.next_batch() => batch,
                _ = shutdown.changed() => break,
            };

            let batch = match batch {
                Ok(batch) => batch,
                Err(e) => {
                    self.metrics.kafka_consumer_errors.inc();
                    warn!(error = %e, "Kafka receive error");
                    continue;
                }
            };

            if let Err(e) = self.process_batch(batch).await {
                self.metrics.kafka_consumer_group_errors.inc();
                error!(error = %e, "Claim batch failed, pausing consumption");

                self.unsubscribe();
                let delay = self.config.consume_delay_after_error();
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = shutdown.changed() => break,
                }
                self.subscribe()?;
            }
        }

        self.unsubscribe();
        info!("Kafka consumer loop stopped");
        Ok(())
    }

    fn subscribe(&self) -> Result<()> {
        let topics: Vec<&str> = self.config.topic_list.iter().map(String::as_str).collect();
        self.consumer.subscribe(&topics).map_err(kafka_error)
    }

    fn unsubscribe(&self) {
        self.consumer.unsubscribe();
        self.ready.store(false, Ordering::Release);
    }

    /// First message, then whatever else arrives within the batch window
    async fn next_batch(&self) -> Result<Vec<OwnedMessage>> {
        let first = self.consumer.recv().await.map_err(kafka_error)?;
        let mut batch = vec![first.detach()];

        let deadline = Instant::now() + self.config.claim_batch_window();
        while batch.len() < self.config.claim_batch_size {
            match tokio::time::timeout_at(deadline, self.consumer.recv()).await {
                Ok(Ok(message)) => batch.push(message.detach()),
                Ok(Err(e)) => {
                    self.metrics.kafka_consumer_errors.inc();
                    warn!(error = %e, "Kafka receive error inside claim batch");
                    break;
                }
                Err(_) => break,
            }
        }

        Ok(batch)
    }

    async fn process_batch(&self, batch: Vec<OwnedMessage>) -> Result<()> {
        debug!(messages = batch.len(), "Claim batch received");

        let mut positions = Vec::with_capacity(batch.len());
        let mut handles = Vec::with_capacity(batch.len());

        for message in batch {
            self.metrics.incoming_kafka_messages.inc();
            positions.push(MessagePosition::of(&message));

            let dispatcher = self.dispatcher.clone();
            handles.push(tokio::spawn(async move {
                let payload = message.payload().unwrap_or_default();
                process_payload(&dispatcher, payload).await
            }));
        }

        let mut outcomes = Vec::with_capacity(handles.len());
        let mut first_error = None;

        for (position, joined) in positions.into_iter().zip(futures::future::join_all(handles).await) {
            let outcome = joined.unwrap_or_else(|e| {
                Err(if e.is_panic() {
                    AppError::Panic(panic_message(e.into_panic().as_ref()))
                } else {
                    AppError::Internal(format!("message task failed: {e}"))
                })
            });

            match outcome {
                Ok(()) => outcomes.push((position, true)),
                Err(e) => {
                    warn!(
                        topic = %position.topic,
                        partition = position.partition,
                        offset = position.offset,
                        error = %e,
                        "Message was not processed"
                    );
                    outcomes.push((position, false));
                    first_error.get_or_insert(e);
                }
            }
        }

        self.commit(&committable_offsets(&outcomes))?;

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Blocks until the broker has acknowledged the offsets
    fn commit(&self, offsets: &[MessagePosition]) -> Result<()> {
        if offsets.is_empty() {
            return Ok(());
        }

        let mut list = TopicPartitionList::new();
        for position in offsets {
            list.add_partition_offset(&position.topic, position.partition, Offset::Offset(position.offset))
                .map_err(kafka_error)?;
        }

        self.consumer
            .commit(&list, CommitMode::Sync)
            .map_err(kafka_error)?;
        debug!(partitions = offsets.len(), "Offsets committed");
        Ok(())
    }
}

/// Decode one inbound payload, run it through the dispatcher and wait for the reply
pub async fn process_payload(dispatcher: &Dispatcher, payload: &[u8]) -> Result<()> {
    let task = ConversionTask::from_json(payload)?;
    debug!(mime_type = %task.mime_type, path = %task.file_path, "Task decoded");

    let reply = dispatcher
        .submit(task)
        .await?
        .await
        .map_err(|_| AppError::Internal("task reply channel closed".into()))?;

    reply.into_outcome()
}

/// Offsets to commit for a processed batch.
///
/// Per partition, the commit position moves past the longest run of
/// successes that starts at the lowest offset of the batch. The returned
/// offsets point at the next message to read.
pub fn committable_offsets(outcomes: &[(MessagePosition, bool)]) -> Vec<MessagePosition> {
    let mut partitions: BTreeMap<(&str, i32), Vec<(i64, bool)>> = BTreeMap::new();
    for (position, success) in outcomes {
        partitions
            .entry((position.topic.as_str(), position.partition))
            .or_default()
            .push((position.offset, *success));
    }

    partitions
        .into_iter()
        .filter_map(|((topic, partition), mut messages)| {
            messages.sort_unstable_by_key(|(offset, _)| *offset);
            messages
                .iter()
                .take_while(|(_, success)| *success)
                .last()
                .map(|(offset, _)| MessagePosition {
                    topic: topic.to_string(),
                    partition,
                    offset: offset + 1,
                })
        })
        .collect()
}

fn kafka_error(err: rdkafka::error::KafkaError) -> AppError {
    AppError::Kafka(err.to_string())
}
