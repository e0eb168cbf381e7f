//! librdkafka binding of the logbus collaborator traits.

mod admin;
mod group;
mod partition;
mod producer;

use std::time::Duration;

use rdkafka::config::ClientConfig;
use rdkafka::error::{KafkaError, RDKafkaErrorCode};

use logbus_api::{Acks, BrokerError, StartOffset};

pub use admin::KafkaAdmin;
pub use group::KafkaGroupConsumer;
pub use partition::KafkaPartitionConsumer;
pub use producer::KafkaProducer;

// ═══════════════════════════════════════════════════════════════
//  KafkaConfig
// ═══════════════════════════════════════════════════════════════

fn default_operation_timeout_ms() -> u64 {
    30_000
}

fn default_message_timeout_ms() -> u64 {
    30_000
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct KafkaConfig {
    pub brokers: Vec<String>,
    pub client_id: String,
    /// Timeout of admin and metadata requests.
    #[serde(default = "default_operation_timeout_ms")]
    pub operation_timeout_ms: u64,
    /// `message.timeout.ms` of the producer.
    #[serde(default = "default_message_timeout_ms")]
    pub message_timeout_ms: u64,
}

impl KafkaConfig {
    pub fn new(brokers: Vec<String>, client_id: impl Into<String>) -> Self {
        Self {
            brokers,
            client_id: client_id.into(),
            operation_timeout_ms: default_operation_timeout_ms(),
            message_timeout_ms: default_message_timeout_ms(),
        }
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms)
    }

    fn client_config(&self) -> ClientConfig {
        let mut config = ClientConfig::new();
        config
            .set("bootstrap.servers", self.brokers.join(","))
            .set("client.id", &self.client_id);
        config
    }

    fn producer_config(&self, acks: Acks, idempotent: bool) -> ClientConfig {
        let mut config = self.client_config();
        config
            .set("acks", acks.as_str())
            .set("message.timeout.ms", self.message_timeout_ms.to_string())
            .set("enable.idempotence", idempotent.to_string());
        if idempotent {
            config.set("max.in.flight.requests.per.connection", "1");
        }
        config
    }

    fn consumer_config(&self, group: &str, reset: StartOffset) -> ClientConfig {
        let mut config = self.client_config();
        config
            .set("group.id", group)
            .set("enable.auto.commit", "true")
            .set("enable.auto.offset.store", "false")
            .set("auto.offset.reset", offset_reset(reset));
        config
    }
}

fn offset_reset(reset: StartOffset) -> &'static str {
    match reset {
        StartOffset::Newest => "latest",
        StartOffset::Oldest | StartOffset::At(_) => "earliest",
    }
}

// ═══════════════════════════════════════════════════════════════
//  Error mapping
// ═══════════════════════════════════════════════════════════════

pub(crate) fn map_code(code: RDKafkaErrorCode, context: &str) -> BrokerError {
    use RDKafkaErrorCode::*;
    let msg = format!("{context}: {code}");
    match code {
        BrokerTransportFailure | AllBrokersDown | OperationTimedOut | MessageTimedOut
        | RequestTimedOut | NotLeaderForPartition | LeaderNotAvailable | NetworkException
        | NotEnoughReplicas | NotEnoughReplicasAfterAppend | QueueFull => {
            BrokerError::connectivity(msg)
        }
        UnknownTopicOrPartition | UnknownTopic | TopicAlreadyExists => BrokerError::logic(msg),
        InvalidPartitions | InvalidReplicationFactor | InvalidConfig | InvalidRequest
        | PolicyViolation => BrokerError::validation(msg),
        MessageSizeTooLarge | InvalidMessage => BrokerError::delivery(msg),
        _ => BrokerError::logic(msg),
    }
}

pub(crate) fn map_error(err: KafkaError, context: &str) -> BrokerError {
    match err {
        KafkaError::ClientConfig(..) | KafkaError::ClientCreation(_) => {
            BrokerError::config(format!("{context}: {err}"))
        }
        other => match other.rdkafka_error_code() {
            Some(code) => map_code(code, context),
            None => BrokerError::connectivity(format!("{context}: {other}")),
        },
    }
}
