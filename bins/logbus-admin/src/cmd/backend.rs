use std::sync::Arc;

use broker_memory::{MemoryBroker, MemoryBrokerConfig};
use logbus_api::{BrokerError, ClusterAdmin};
use logbus_engine::{Backend, Config};

/// Admin client of the configured backend.
pub fn cluster_admin(config: &Config) -> Result<Arc<dyn ClusterAdmin>, BrokerError> {
    match config.backend {
        Backend::Memory => {
            tracing::info!(brokers = config.memory.brokers, "using in-process broker");
            Ok(Arc::new(MemoryBroker::new(MemoryBrokerConfig {
                brokers: config.memory.brokers,
                default_partitions: config.memory.partitions,
                ..MemoryBrokerConfig::default()
            })))
        }
        Backend::Kafka => kafka_admin(config),
    }
}

#[cfg(feature = "kafka")]
fn kafka_admin(config: &Config) -> Result<Arc<dyn ClusterAdmin>, BrokerError> {
    let kafka = broker_kafka::KafkaConfig::new(config.brokers.clone(), config.client_id.clone());
    Ok(Arc::new(broker_kafka::KafkaAdmin::new(kafka)?))
}

#[cfg(not(feature = "kafka"))]
fn kafka_admin(_config: &Config) -> Result<Arc<dyn ClusterAdmin>, BrokerError> {
    Err(BrokerError::config(
        "kafka backend not compiled in, rebuild with --features kafka",
    ))
}
