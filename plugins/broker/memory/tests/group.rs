use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use tokio_util::sync::CancellationToken;

use broker_memory::{MemoryBroker, MemoryGroupConsumer, MemoryProducer};
use logbus_api::{
    BrokerError, Claim, ClaimExit, ClaimHandler, ClusterAdmin, GroupConsumer, GroupSession,
    Record, RecordSink, Sequencer, StartOffset, TopicDetail,
};

/// Marks up to `limit` messages, then cancels `stop`.
struct TakeN {
    limit: usize,
    seen: Mutex<Vec<i64>>,
    stop: CancellationToken,
    fail_setup: bool,
}

impl TakeN {
    fn new(limit: usize, stop: CancellationToken) -> Self {
        Self {
            limit,
            seen: Mutex::new(Vec::new()),
            stop,
            fail_setup: false,
        }
    }

    fn seen(&self) -> Vec<i64> {
        self.seen.lock().unwrap().clone()
    }
}

impl ClaimHandler for TakeN {
    fn setup<'a>(
        &'a self,
        _session: &'a dyn GroupSession,
    ) -> Pin<Box<dyn Future<Output = Result<(), BrokerError>> + Send + 'a>> {
        Box::pin(async move {
            if self.fail_setup {
                return Err(BrokerError::config("setup refused"));
            }
            Ok(())
        })
    }

    fn cleanup<'a>(
        &'a self,
        _session: &'a dyn GroupSession,
    ) -> Pin<Box<dyn Future<Output = Result<(), BrokerError>> + Send + 'a>> {
        Box::pin(async { Ok(()) })
    }

    fn consume_claim<'a>(
        &'a self,
        session: &'a dyn GroupSession,
        claim: &'a mut dyn Claim,
    ) -> Pin<Box<dyn Future<Output = Result<ClaimExit, BrokerError>> + Send + 'a>> {
        Box::pin(async move {
            loop {
                let msg = tokio::select! {
                    biased;
                    _ = session.done().cancelled() => return Ok(ClaimExit::SessionDone),
                    msg = claim.recv() => match msg {
                        Some(m) => m,
                        None => return Ok(ClaimExit::ClaimClosed),
                    },
                };
                session.mark_message(&msg, "");
                let taken = {
                    let mut seen = self.seen.lock().unwrap();
                    seen.push(msg.offset);
                    seen.len()
                };
                if taken == self.limit {
                    self.stop.cancel();
                }
            }
        })
    }
}

async fn single_partition_topic(broker: &MemoryBroker, records: usize) {
    let detail = TopicDetail {
        partitions: 1,
        replication_factor: 1,
        config: BTreeMap::new(),
    };
    broker.create_topic("jobs", &detail).await.unwrap();
    let producer = MemoryProducer::new(broker.clone());
    let mut sequencer = Sequencer::new();
    for i in 0..records {
        producer
            .send(&Record::new("jobs", i.to_string()), sequencer.next())
            .await
            .unwrap();
    }
}

#[tokio::test]
async fn new_member_resumes_from_committed_offset() {
    let broker = MemoryBroker::default();
    single_partition_topic(&broker, 6).await;
    let topics = vec!["jobs".to_string()];

    let stop = CancellationToken::new();
    let first = Arc::new(TakeN::new(3, stop.clone()));
    let consumer = MemoryGroupConsumer::new(broker.clone(), "workers", "w1");
    consumer.consume(&topics, first.clone(), stop).await.unwrap();
    drop(consumer);
    assert_eq!(first.seen(), vec![0, 1, 2]);
    assert_eq!(broker.committed("workers", "jobs", 0), Some(3));

    let stop = CancellationToken::new();
    let second = Arc::new(TakeN::new(3, stop.clone()));
    let consumer = MemoryGroupConsumer::new(broker.clone(), "workers", "w2")
        .with_offset_reset(StartOffset::Newest);
    consumer.consume(&topics, second.clone(), stop).await.unwrap();
    assert_eq!(second.seen(), vec![3, 4, 5]);
    assert_eq!(broker.committed("workers", "jobs", 0), Some(6));
}

#[tokio::test]
async fn failed_setup_ends_generation_with_error() {
    let broker = MemoryBroker::default();
    single_partition_topic(&broker, 1).await;

    let stop = CancellationToken::new();
    let mut handler = TakeN::new(1, stop.clone());
    handler.fail_setup = true;
    let handler = Arc::new(handler);

    let consumer = MemoryGroupConsumer::new(broker.clone(), "workers", "w1");
    let err = consumer
        .consume(&["jobs".to_string()], handler.clone(), stop)
        .await
        .unwrap_err();
    assert!(err.is_fatal());
    assert!(handler.seen().is_empty());
    assert_eq!(broker.committed("workers", "jobs", 0), None);
}

#[tokio::test]
async fn deleting_topic_closes_claims() {
    let broker = MemoryBroker::default();
    single_partition_topic(&broker, 2).await;

    let stop = CancellationToken::new();
    let handler = Arc::new(TakeN::new(usize::MAX, stop.clone()));
    let consumer = MemoryGroupConsumer::new(broker.clone(), "workers", "w1");

    let deleter = {
        let broker = broker.clone();
        let handler = handler.clone();
        tokio::spawn(async move {
            while handler.seen().len() < 2 {
                tokio::task::yield_now().await;
            }
            broker.delete_topic("jobs").await.unwrap();
        })
    };

    consumer
        .consume(&["jobs".to_string()], handler.clone(), stop)
        .await
        .unwrap();
    deleter.await.unwrap();
    assert_eq!(handler.seen(), vec![0, 1]);
}
