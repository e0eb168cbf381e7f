use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use broker_memory::{MemoryBroker, MemoryProducer};
use logbus_api::{BrokerError, ClaimedMessage, PartitionConsumer, Record, RecordSink, Sequencer, StartOffset};
use logbus_engine::MessageProcessor;
use logbus_engine::partition::{consume_all_partitions, consume_partition};

#[derive(Default)]
struct Count(AtomicU64);

impl MessageProcessor for Count {
    fn process<'a>(
        &'a self,
        _msg: &'a ClaimedMessage,
    ) -> Pin<Box<dyn Future<Output = Result<(), BrokerError>> + Send + 'a>> {
        Box::pin(async move {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }
}

async fn seed(broker: &MemoryBroker, topic: &str, per_partition: usize) {
    let producer = MemoryProducer::new(broker.clone());
    let mut sequencer = Sequencer::new();
    for p in 0..broker.config().default_partitions {
        for i in 0..per_partition {
            let record = Record::new(topic, i.to_string()).with_partition(p);
            producer.send(&record, sequencer.next()).await.unwrap();
        }
    }
}

#[tokio::test]
async fn single_partition_from_explicit_offset() {
    let broker = MemoryBroker::default();
    seed(&broker, "ticks", 5).await;

    let processor = Count::default();
    let token = CancellationToken::new();
    let stopper = {
        let broker = broker.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            broker.shutdown();
        })
    };

    let consumed = consume_partition(&broker, "ticks", 1, StartOffset::At(2), &processor, &token)
        .await
        .unwrap();
    stopper.await.unwrap();
    assert_eq!(consumed, 3);
}

#[tokio::test]
async fn unknown_partition_fails_to_open() {
    let broker = MemoryBroker::default();
    seed(&broker, "ticks", 1).await;
    let token = CancellationToken::new();
    let err = consume_partition(&broker, "ticks", 9, StartOffset::Oldest, &Count::default(), &token)
        .await
        .unwrap_err();
    assert!(err.message.contains("ticks/9"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn all_partitions_consumed_until_cancelled() {
    let broker = MemoryBroker::default();
    seed(&broker, "ticks", 4).await;

    let processor = Arc::new(Count::default());
    let token = CancellationToken::new();
    let consumer: Arc<dyn PartitionConsumer> = Arc::new(broker.clone());

    let task = tokio::spawn(consume_all_partitions(
        consumer,
        "ticks",
        StartOffset::Oldest,
        processor.clone(),
        token.clone(),
    ));

    tokio::time::timeout(Duration::from_secs(5), async {
        while processor.0.load(Ordering::SeqCst) < 12 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
    token.cancel();

    let per_partition = task.await.unwrap().unwrap();
    assert_eq!(per_partition.len(), 3);
    assert!(per_partition.values().all(|&n| n == 4));
}
