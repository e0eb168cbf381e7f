use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use rdkafka::message::{Header, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::util::Timeout;

use logbus_api::{Acks, BrokerError, Delivered, Record, RecordSink, Sequence};

use crate::{KafkaConfig, map_error};

/// [`RecordSink`] over a librdkafka `FutureProducer`.
///
/// Idempotence and retries of connectivity failures inside
/// `message.timeout.ms` are handled by librdkafka; the pipeline sequence
/// number is not sent.
pub struct KafkaProducer {
    producer: FutureProducer,
    flush_timeout: Duration,
}

impl KafkaProducer {
    pub fn new(config: &KafkaConfig, acks: Acks, idempotent: bool) -> Result<Self, BrokerError> {
        let producer: FutureProducer = config
            .producer_config(acks, idempotent)
            .create()
            .map_err(|e| map_error(e, "create producer"))?;
        tracing::info!(brokers = %config.brokers.join(","), acks = acks.as_str(), idempotent, "kafka producer created");
        Ok(Self {
            producer,
            flush_timeout: config.operation_timeout(),
        })
    }
}

impl RecordSink for KafkaProducer {
    fn send<'a>(
        &'a self,
        record: &'a Record,
        _sequence: Sequence,
    ) -> Pin<Box<dyn Future<Output = Result<Delivered, BrokerError>> + Send + 'a>> {
        Box::pin(async move {
            let mut out = FutureRecord::<[u8], [u8]>::to(&record.topic)
                .payload(record.payload.as_slice())
                .timestamp(record.timestamp_ms);
            if let Some(key) = &record.key {
                out = out.key(key.as_slice());
            }
            if let Some(partition) = record.partition {
                out = out.partition(partition);
            }
            if !record.headers.is_empty() {
                let headers = record.headers.iter().fold(OwnedHeaders::new(), |h, (key, value)| {
                    h.insert(Header { key, value: Some(value) })
                });
                out = out.headers(headers);
            }

            match self.producer.send(out, Timeout::Never).await {
                Ok((partition, offset)) => Ok(Delivered { partition, offset }),
                Err((e, _)) => Err(map_error(e, &format!("produce to '{}'", record.topic))),
            }
        })
    }

    fn flush(&self) -> Pin<Box<dyn Future<Output = Result<(), BrokerError>> + Send + '_>> {
        let producer = self.producer.clone();
        let timeout = self.flush_timeout;
        Box::pin(async move {
            tokio::task::spawn_blocking(move || producer.flush(Timeout::After(timeout)))
                .await
                .map_err(|e| BrokerError::logic(format!("flush task failed: {e}")))?
                .map_err(|e| map_error(e, "flush"))
        })
    }
}
