use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use logbus_api::{BrokerError, Delivered, Record, RecordSink, Sequence};

use crate::MemoryBroker;

/// Acknowledgments remembered per producer session for deduplication.
const DEDUPE_WINDOW: usize = 5;

/// Failures a [`MemoryProducer`] injects into upcoming sends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Faults {
    /// Next N sends fail before reaching the log.
    pub unavailable: usize,
    /// Next N sends are appended but their acknowledgment is lost.
    pub lost_acks: usize,
}

/// [`RecordSink`] appending to a [`MemoryBroker`].
///
/// Partition choice: explicit partition, else FNV-1a hash of the key, else
/// round-robin. In idempotent mode a retried sequence returns the original
/// acknowledgment instead of appending again. Sequences are matched per
/// producer session, against the last few acknowledged sends only.
pub struct MemoryProducer {
    broker: MemoryBroker,
    idempotent: bool,
    latency: Option<Duration>,
    faults: Mutex<Faults>,
    next_partition: AtomicUsize,
    written: Mutex<HashMap<u64, VecDeque<(u64, Delivered)>>>,
}

impl MemoryProducer {
    pub fn new(broker: MemoryBroker) -> Self {
        Self {
            broker,
            idempotent: false,
            latency: None,
            faults: Mutex::new(Faults::default()),
            next_partition: AtomicUsize::new(0),
            written: Mutex::new(HashMap::new()),
        }
    }

    pub fn idempotent(mut self, enabled: bool) -> Self {
        self.idempotent = enabled;
        self
    }

    /// Delay every send by `latency`.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn inject(&self, faults: Faults) {
        *lock(&self.faults) = faults;
    }

    fn take_fault(&self, pick: impl FnOnce(&mut Faults) -> &mut usize) -> bool {
        let mut faults = lock(&self.faults);
        let left = pick(&mut *faults);
        if *left > 0 {
            *left -= 1;
            true
        } else {
            false
        }
    }

    fn choose_partition(&self, record: &Record, count: i32) -> Result<i32, BrokerError> {
        if let Some(p) = record.partition {
            if p < 0 || p >= count {
                return Err(BrokerError::delivery(format!(
                    "partition {p} out of range for topic '{}' ({count} partitions)",
                    record.topic
                )));
            }
            return Ok(p);
        }
        if count <= 0 {
            return Err(BrokerError::delivery(format!("topic '{}' has no partitions", record.topic)));
        }
        Ok(match &record.key {
            Some(key) => {
                let p = fnv1a(key) as i32 % count;
                if p < 0 { -p } else { p }
            }
            None => (self.next_partition.fetch_add(1, Ordering::Relaxed) % count as usize) as i32,
        })
    }

    fn acknowledged(&self, sequence: Sequence) -> Option<Delivered> {
        lock(&self.written)
            .get(&sequence.producer)?
            .iter()
            .find(|(number, _)| *number == sequence.number)
            .map(|(_, delivered)| *delivered)
    }

    fn remember(&self, sequence: Sequence, delivered: Delivered) {
        let mut written = lock(&self.written);
        let window = written.entry(sequence.producer).or_default();
        window.push_back((sequence.number, delivered));
        if window.len() > DEDUPE_WINDOW {
            window.pop_front();
        }
    }

    async fn append(&self, record: &Record, sequence: Sequence) -> Result<Delivered, BrokerError> {
        if self.idempotent {
            if let Some(delivered) = self.acknowledged(sequence) {
                tracing::debug!(
                    producer = sequence.producer,
                    sequence = sequence.number,
                    "duplicate sequence, returning original ack"
                );
                return Ok(delivered);
            }
        }

        let max = self.broker.config().max_message_bytes;
        if record.payload.len() > max {
            return Err(BrokerError::delivery(format!(
                "message of {} bytes exceeds max.message.bytes {max}",
                record.payload.len()
            )));
        }

        let topic = self.broker.topic_or_create(&record.topic)?;
        let partition = self.choose_partition(record, topic.partition_count())?;
        let log = topic
            .partition(partition)
            .ok_or_else(|| BrokerError::delivery(format!("partition {partition} not available")))?;
        let offset = log.append(record).await;
        let delivered = Delivered { partition, offset };

        if self.idempotent {
            self.remember(sequence, delivered);
        }
        Ok(delivered)
    }
}

impl RecordSink for MemoryProducer {
    fn send<'a>(
        &'a self,
        record: &'a Record,
        sequence: Sequence,
    ) -> Pin<Box<dyn Future<Output = Result<Delivered, BrokerError>> + Send + 'a>> {
        Box::pin(async move {
            if let Some(latency) = self.latency {
                tokio::time::sleep(latency).await;
            }
            if self.take_fault(|f| &mut f.unavailable) {
                return Err(BrokerError::connectivity("broker not available"));
            }
            let delivered = self.append(record, sequence).await?;
            if self.take_fault(|f| &mut f.lost_acks) {
                return Err(BrokerError::connectivity("request timed out waiting for ack"));
            }
            Ok(delivered)
        })
    }

    fn flush(&self) -> Pin<Box<dyn Future<Output = Result<(), BrokerError>> + Send + '_>> {
        Box::pin(async { Ok(()) })
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match m.lock() {
        Ok(g) => g,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// 32-bit FNV-1a.
fn fnv1a(data: &[u8]) -> u32 {
    let mut hash: u32 = 0x811c_9dc5;
    for &b in data {
        hash ^= b as u32;
        hash = hash.wrapping_mul(0x0100_0193);
    }
    hash
}

#[cfg(test)]
mod tests {
    use logbus_api::Sequencer;

    use super::*;

    #[tokio::test]
    async fn key_maps_to_stable_partition() {
        let producer = MemoryProducer::new(MemoryBroker::default());
        let mut seq = Sequencer::new();
        let a = producer.send(&Record::new("t", "1").with_key("user-7"), seq.next()).await.unwrap();
        let b = producer.send(&Record::new("t", "2").with_key("user-7"), seq.next()).await.unwrap();
        assert_eq!(a.partition, b.partition);
        assert_eq!((a.offset, b.offset), (0, 1));
    }

    #[tokio::test]
    async fn keyless_records_round_robin() {
        let producer = MemoryProducer::new(MemoryBroker::default());
        let mut seq = Sequencer::new();
        let mut partitions = Vec::new();
        for _ in 0..6 {
            partitions.push(producer.send(&Record::new("t", "x"), seq.next()).await.unwrap().partition);
        }
        assert_eq!(partitions, vec![0, 1, 2, 0, 1, 2]);
    }

    #[tokio::test]
    async fn explicit_partition_out_of_range_fails() {
        let producer = MemoryProducer::new(MemoryBroker::default());
        let err = producer
            .send(&Record::new("t", "x").with_partition(7), Sequencer::new().next())
            .await
            .unwrap_err();
        assert!(!err.is_retriable());
    }

    #[tokio::test]
    async fn lost_ack_still_appends() {
        let broker = MemoryBroker::default();
        let producer = MemoryProducer::new(broker.clone());
        producer.inject(Faults { unavailable: 0, lost_acks: 1 });

        let err = producer
            .send(&Record::new("t", "x").with_partition(0), Sequencer::new().next())
            .await
            .unwrap_err();
        assert!(err.is_retriable());
        assert_eq!(broker.records("t", 0).await.len(), 1);
    }

    #[tokio::test]
    async fn retried_sequence_is_deduplicated_per_producer() {
        let broker = MemoryBroker::default();
        let producer = MemoryProducer::new(broker.clone()).idempotent(true);
        let mut orders = Sequencer::new();
        let mut payments = Sequencer::new();

        let first = orders.next();
        let a = producer.send(&Record::new("orders", "a").with_partition(0), first).await.unwrap();
        let again = producer.send(&Record::new("orders", "a").with_partition(0), first).await.unwrap();
        assert_eq!(a, again);
        assert_eq!(broker.records("orders", 0).await.len(), 1);

        let b = producer
            .send(&Record::new("payments", "b").with_partition(0), payments.next())
            .await
            .unwrap();
        assert_eq!(b, Delivered { partition: 0, offset: 0 });
        assert_eq!(broker.records("payments", 0).await.len(), 1);
    }

    #[tokio::test]
    async fn dedupe_window_is_bounded() {
        let producer = MemoryProducer::new(MemoryBroker::default()).idempotent(true);
        let mut seq = Sequencer::new();
        for _ in 0..DEDUPE_WINDOW * 3 {
            producer.send(&Record::new("t", "x").with_partition(0), seq.next()).await.unwrap();
        }
        assert_eq!(lock(&producer.written)[&seq.producer()].len(), DEDUPE_WINDOW);
    }

    #[test]
    fn fnv_reference_values() {
        assert_eq!(fnv1a(b""), 0x811c_9dc5);
        assert_eq!(fnv1a(b"a"), 0xe40c_292c);
    }
}
