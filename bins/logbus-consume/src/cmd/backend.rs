use std::sync::Arc;

use broker_memory::{MemoryBroker, MemoryBrokerConfig, MemoryGroupConsumer, MemoryProducer};
use logbus_api::{BrokerError, GroupConsumer, PartitionConsumer, Record, RecordSink, Sequencer};
use logbus_engine::{Backend, Config};

/// Consumers of the configured backend.
pub enum Cluster {
    Memory(MemoryBroker),
    #[cfg(feature = "kafka")]
    Kafka(broker_kafka::KafkaConfig),
}

impl Cluster {
    /// Select the backend. The in-process broker is seeded with
    /// `memory.seed_records` records on `topic` so there is something to read.
    pub async fn connect(config: &Config, topic: &str) -> Result<Self, BrokerError> {
        match config.backend {
            Backend::Memory => {
                let broker = MemoryBroker::new(MemoryBrokerConfig {
                    brokers: config.memory.brokers,
                    default_partitions: config.memory.partitions,
                    ..MemoryBrokerConfig::default()
                });
                seed(&broker, topic, config.memory.seed_records).await?;
                Ok(Cluster::Memory(broker))
            }
            Backend::Kafka => kafka(config),
        }
    }

    pub fn partition_consumer(&self) -> Arc<dyn PartitionConsumer> {
        match self {
            Cluster::Memory(broker) => Arc::new(broker.clone()),
            #[cfg(feature = "kafka")]
            Cluster::Kafka(kafka) => Arc::new(broker_kafka::KafkaPartitionConsumer::new(kafka.clone())),
        }
    }

    pub fn group_consumer(&self, config: &Config) -> Result<Arc<dyn GroupConsumer>, BrokerError> {
        let consumer = &config.consumer;
        match self {
            Cluster::Memory(broker) => Ok(Arc::new(
                MemoryGroupConsumer::new(broker.clone(), &consumer.group, &consumer.name)
                    .with_offset_reset(consumer.offset_reset),
            )),
            #[cfg(feature = "kafka")]
            Cluster::Kafka(kafka) => Ok(Arc::new(broker_kafka::KafkaGroupConsumer::new(
                kafka,
                &consumer.group,
                consumer.offset_reset,
            )?)),
        }
    }
}

async fn seed(broker: &MemoryBroker, topic: &str, count: usize) -> Result<(), BrokerError> {
    if count == 0 {
        return Ok(());
    }
    let producer = MemoryProducer::new(broker.clone());
    let mut sequencer = Sequencer::new();
    for i in 0..count {
        let record = Record::new(topic, format!("seed-{i}")).with_key(i.to_string());
        producer.send(&record, sequencer.next()).await?;
    }
    tracing::info!(%topic, records = count, "in-process topic seeded");
    Ok(())
}

#[cfg(feature = "kafka")]
fn kafka(config: &Config) -> Result<Cluster, BrokerError> {
    let client_id = format!("{}-{}", config.client_id, config.consumer.name);
    Ok(Cluster::Kafka(broker_kafka::KafkaConfig::new(config.brokers.clone(), client_id)))
}

#[cfg(not(feature = "kafka"))]
fn kafka(_config: &Config) -> Result<Cluster, BrokerError> {
    Err(BrokerError::config(
        "kafka backend not compiled in, rebuild with --features kafka",
    ))
}
