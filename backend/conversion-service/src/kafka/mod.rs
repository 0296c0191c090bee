//! Kafka integration
//!
//! Tasks arrive through a consumer group and results leave through a
//! producer that writes the same payload to every output topic.

pub mod consumer;
pub mod producer;

pub use consumer::{committable_offsets, process_payload, MessagePosition, TaskConsumer};
pub use producer::{build_headers, KafkaResultPublisher};
