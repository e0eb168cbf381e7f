use std::future::Future;
use std::pin::Pin;

use logbus_api::{BrokerError, Claim, PartitionConsumer, StartOffset};

use crate::log::LogClaim;
use crate::{MemoryBroker, unknown_topic};

impl PartitionConsumer for MemoryBroker {
    fn partitions<'a>(
        &'a self,
        topic: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<i32>, BrokerError>> + Send + 'a>> {
        Box::pin(async move {
            let t = self.topic(topic).ok_or_else(|| unknown_topic(topic))?;
            Ok((0..t.partition_count()).collect())
        })
    }

    fn consume_partition<'a>(
        &'a self,
        topic: &'a str,
        partition: i32,
        start: StartOffset,
    ) -> Pin<Box<dyn Future<Output = Result<Box<dyn Claim>, BrokerError>> + Send + 'a>> {
        Box::pin(async move {
            let t = self.topic(topic).ok_or_else(|| unknown_topic(topic))?;
            let log = t.partition(partition).ok_or_else(|| {
                BrokerError::validation(format!("topic '{topic}' has no partition {partition}"))
            })?;
            let high_watermark = log.high_watermark();
            let offset = match start {
                StartOffset::Oldest => 0,
                StartOffset::Newest => high_watermark,
                StartOffset::At(n) if (0..=high_watermark).contains(&n) => n,
                StartOffset::At(n) => {
                    return Err(BrokerError::validation(format!(
                        "offset {n} out of range [0, {high_watermark}] for {topic}/{partition}"
                    )));
                }
            };
            let claim: Box<dyn Claim> = Box::new(LogClaim::new(t, log, offset, self.inner.shutdown.child_token()));
            Ok(claim)
        })
    }
}

#[cfg(test)]
mod tests {
    use logbus_api::{Record, RecordSink, Sequencer};

    use super::*;
    use crate::MemoryProducer;

    #[tokio::test]
    async fn reads_from_requested_offset_and_ends_on_shutdown() {
        let broker = MemoryBroker::default();
        let producer = MemoryProducer::new(broker.clone());
        let mut sequencer = Sequencer::new();
        for v in ["a", "b", "c"] {
            producer.send(&Record::new("t", v).with_partition(1), sequencer.next()).await.unwrap();
        }

        let mut claim = broker.consume_partition("t", 1, StartOffset::At(1)).await.unwrap();
        assert_eq!(claim.initial_offset(), 1);
        assert_eq!(claim.recv().await.unwrap().payload, b"b");
        assert_eq!(claim.recv().await.unwrap().payload, b"c");

        broker.shutdown();
        assert!(claim.recv().await.is_none());
    }

    #[tokio::test]
    async fn newest_waits_for_new_records() {
        let broker = MemoryBroker::default();
        let producer = MemoryProducer::new(broker.clone());
        let mut sequencer = Sequencer::new();
        producer.send(&Record::new("t", "old").with_partition(0), sequencer.next()).await.unwrap();

        let mut claim = broker.consume_partition("t", 0, StartOffset::Newest).await.unwrap();
        let reader = tokio::spawn(async move { claim.recv().await });
        producer.send(&Record::new("t", "new").with_partition(0), sequencer.next()).await.unwrap();

        let msg = reader.await.unwrap().unwrap();
        assert_eq!((msg.offset, msg.payload.as_slice()), (1, b"new".as_slice()));
    }

    #[tokio::test]
    async fn out_of_range_offset_is_rejected() {
        let broker = MemoryBroker::default();
        MemoryProducer::new(broker.clone())
            .send(&Record::new("t", "x"), Sequencer::new().next())
            .await
            .unwrap();
        assert!(broker.consume_partition("t", 0, StartOffset::At(5)).await.is_err());
        assert!(broker.partitions("missing").await.is_err());
    }
}
