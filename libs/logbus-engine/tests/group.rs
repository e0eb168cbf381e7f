use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use broker_memory::{MemoryBroker, MemoryGroupConsumer, MemoryProducer};
use logbus_api::{BrokerError, ClaimedMessage, ClusterAdmin, Record, RecordSink, Sequencer, TopicDetail};
use logbus_engine::{ClaimLoop, ConsumerConfig, GroupRunner, MessageProcessor, RunnerState};

/// Records the offsets it sees; cancels `stop` while processing `stop_at`.
struct Recorder {
    seen: Mutex<Vec<(i32, i64)>>,
    stop: CancellationToken,
    stop_at: Option<i64>,
}

impl Recorder {
    fn new(stop: CancellationToken, stop_at: Option<i64>) -> Self {
        Self {
            seen: Mutex::new(Vec::new()),
            stop,
            stop_at,
        }
    }

    fn offsets(&self, partition: i32) -> Vec<i64> {
        self.seen
            .lock()
            .unwrap()
            .iter()
            .filter(|(p, _)| *p == partition)
            .map(|(_, o)| *o)
            .collect()
    }
}

impl MessageProcessor for Recorder {
    fn process<'a>(
        &'a self,
        msg: &'a ClaimedMessage,
    ) -> Pin<Box<dyn Future<Output = Result<(), BrokerError>> + Send + 'a>> {
        Box::pin(async move {
            self.seen.lock().unwrap().push((msg.partition, msg.offset));
            if self.stop_at == Some(msg.offset) {
                self.stop.cancel();
            }
            Ok(())
        })
    }
}

async fn topic_with_records(broker: &MemoryBroker, topic: &str, partitions: i32, per_partition: i64) {
    let detail = TopicDetail {
        partitions,
        replication_factor: 1,
        config: BTreeMap::new(),
    };
    broker.create_topic(topic, &detail).await.unwrap();
    let producer = MemoryProducer::new(broker.clone());
    let mut sequencer = Sequencer::new();
    for p in 0..partitions {
        for i in 0..per_partition {
            let record = Record::new(topic, format!("{p}-{i}")).with_partition(p);
            producer.send(&record, sequencer.next()).await.unwrap();
        }
    }
}

async fn eventually(mut done: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !done() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached within 5s");
}

fn consumer_config(group: &str) -> ConsumerConfig {
    ConsumerConfig {
        group: group.to_string(),
        rejoin_backoff_min_ms: 10,
        rejoin_backoff_max_ms: 50,
        ..ConsumerConfig::default()
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn acknowledges_in_order_and_commits_next_offset() {
    let broker = MemoryBroker::default();
    topic_with_records(&broker, "events", 1, 10).await;

    let token = CancellationToken::new();
    let recorder = Arc::new(Recorder::new(token.clone(), None));
    let handler = Arc::new(ClaimLoop::new("c1", 3, RecorderRef(recorder.clone())));
    let consumer = Arc::new(MemoryGroupConsumer::new(broker.clone(), "billing", "c1"));
    let runner = GroupRunner::new(consumer, vec!["events".into()], handler.clone(), consumer_config("billing"));

    let stopper = {
        let broker = broker.clone();
        let token = token.clone();
        tokio::spawn(async move {
            eventually(|| broker.committed("billing", "events", 0) == Some(10)).await;
            token.cancel();
        })
    };

    runner.run(token).await.unwrap();
    stopper.await.unwrap();

    assert_eq!(recorder.offsets(0), (0..10).collect::<Vec<_>>());
    assert_eq!(broker.committed("billing", "events", 0), Some(10));
    assert_eq!(handler.progress().count(), 10);
    assert_eq!(runner.state(), RunnerState::Stopped);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn nothing_is_acknowledged_after_session_done() {
    let broker = MemoryBroker::default();
    topic_with_records(&broker, "events", 1, 10).await;

    let token = CancellationToken::new();
    let recorder = Arc::new(Recorder::new(token.clone(), Some(4)));
    let handler = Arc::new(ClaimLoop::new("c1", 100, RecorderRef(recorder.clone())));
    let consumer = Arc::new(MemoryGroupConsumer::new(broker.clone(), "audit", "c1"));
    let runner = GroupRunner::new(consumer, vec!["events".into()], handler, consumer_config("audit"));

    runner.run(token).await.unwrap();

    // Offset 4 was processed while the session ended, so it stays unacknowledged.
    assert_eq!(recorder.offsets(0), vec![0, 1, 2, 3, 4]);
    assert_eq!(broker.committed("audit", "events", 0), Some(4));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn second_member_splits_partitions_after_rebalance() {
    let broker = MemoryBroker::default();
    topic_with_records(&broker, "split", 4, 2).await;

    let first = Arc::new(MemoryGroupConsumer::new(broker.clone(), "workers", "a"));
    let second = Arc::new(MemoryGroupConsumer::new(broker.clone(), "workers", "b"));
    let stop_first = CancellationToken::new();
    let stop_second = CancellationToken::new();

    let runner = |consumer: Arc<MemoryGroupConsumer>, token: &CancellationToken| {
        let recorder = RecorderRef(Arc::new(Recorder::new(token.clone(), None)));
        GroupRunner::new(
            consumer,
            vec!["split".into()],
            Arc::new(ClaimLoop::new("member", 100, recorder)),
            consumer_config("workers"),
        )
    };

    let first_runner = runner(first.clone(), &stop_first);
    let mut first_state = first_runner.subscribe();
    let first_task = tokio::spawn({
        let token = stop_first.clone();
        async move { first_runner.run(token).await }
    });
    first_state
        .wait_for(|s| *s == RunnerState::Consuming)
        .await
        .unwrap();
    eventually(|| first.assignment().len() == 4).await;

    let second_runner = runner(second.clone(), &stop_second);
    let second_task = tokio::spawn({
        let token = stop_second.clone();
        async move { second_runner.run(token).await }
    });
    eventually(|| first.assignment().len() == 2 && second.assignment().len() == 2).await;

    let a: BTreeSet<_> = first.assignment().into_iter().collect();
    let b: BTreeSet<_> = second.assignment().into_iter().collect();
    assert!(a.is_disjoint(&b));
    assert_eq!(a.union(&b).count(), 4);

    stop_first.cancel();
    stop_second.cancel();
    first_task.await.unwrap().unwrap();
    second_task.await.unwrap().unwrap();
}

/// Shares one [`Recorder`] between the test and a [`ClaimLoop`].
struct RecorderRef(Arc<Recorder>);

impl MessageProcessor for RecorderRef {
    fn process<'a>(
        &'a self,
        msg: &'a ClaimedMessage,
    ) -> Pin<Box<dyn Future<Output = Result<(), BrokerError>> + Send + 'a>> {
        self.0.process(msg)
    }
}
