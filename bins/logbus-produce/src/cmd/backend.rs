use std::sync::Arc;

use broker_memory::{MemoryBroker, MemoryBrokerConfig, MemoryProducer};
use logbus_api::{BrokerError, RecordSink};
use logbus_engine::{Backend, Config};

/// Build the record sink selected by `backend`.
pub fn record_sink(config: &Config) -> Result<Arc<dyn RecordSink>, BrokerError> {
    match config.backend {
        Backend::Memory => {
            let broker = MemoryBroker::new(MemoryBrokerConfig {
                brokers: config.memory.brokers,
                default_partitions: config.memory.partitions,
                ..MemoryBrokerConfig::default()
            });
            tracing::info!(brokers = config.memory.brokers, "using in-process broker");
            Ok(Arc::new(
                MemoryProducer::new(broker).idempotent(config.producer.idempotent),
            ))
        }
        Backend::Kafka => kafka_sink(config),
    }
}

#[cfg(feature = "kafka")]
fn kafka_sink(config: &Config) -> Result<Arc<dyn RecordSink>, BrokerError> {
    let kafka = broker_kafka::KafkaConfig::new(config.brokers.clone(), config.client_id.clone());
    let producer = broker_kafka::KafkaProducer::new(
        &kafka,
        config.producer.acks,
        config.producer.idempotent,
    )?;
    Ok(Arc::new(producer))
}

#[cfg(not(feature = "kafka"))]
fn kafka_sink(_config: &Config) -> Result<Arc<dyn RecordSink>, BrokerError> {
    Err(BrokerError::config(
        "kafka backend not compiled in, rebuild with --features kafka",
    ))
}
