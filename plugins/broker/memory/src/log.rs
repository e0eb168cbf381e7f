use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, RwLock as SyncRwLock};

use tokio::sync::{RwLock, watch};
use tokio_util::sync::CancellationToken;

use logbus_api::{Claim, ClaimedMessage, Headers, PartitionMetadata, Record};

// ═══════════════════════════════════════════════════════════════
//  PartitionLog
// ═══════════════════════════════════════════════════════════════

#[derive(Debug, Clone)]
struct StoredRecord {
    key: Option<Vec<u8>>,
    payload: Vec<u8>,
    headers: Headers,
    timestamp_ms: i64,
}

#[derive(Debug, Clone)]
pub(crate) struct Placement {
    pub leader: Option<i32>,
    pub replicas: Vec<i32>,
    pub isr: Vec<i32>,
}

impl Placement {
    /// Replicas `(p + i) % brokers + 1`, first replica leads, all in sync.
    pub fn round_robin(partition: i32, replication: i16, brokers: i32) -> Self {
        let replicas: Vec<i32> = (0..replication as i32)
            .map(|i| (partition + i) % brokers + 1)
            .collect();
        Self {
            leader: replicas.first().copied(),
            isr: replicas.clone(),
            replicas,
        }
    }
}

/// Append-only log of one partition. Offsets start at 0.
pub(crate) struct PartitionLog {
    id: i32,
    records: RwLock<Vec<StoredRecord>>,
    high_watermark: watch::Sender<i64>,
    placement: Mutex<Placement>,
}

impl PartitionLog {
    pub fn new(id: i32, placement: Placement) -> Self {
        let (high_watermark, _) = watch::channel(0);
        Self {
            id,
            records: RwLock::new(Vec::new()),
            high_watermark,
            placement: Mutex::new(placement),
        }
    }

    pub fn id(&self) -> i32 {
        self.id
    }

    pub async fn append(&self, record: &Record) -> i64 {
        let mut records = self.records.write().await;
        records.push(StoredRecord {
            key: record.key.clone(),
            payload: record.payload.clone(),
            headers: record.headers.clone(),
            timestamp_ms: record.timestamp_ms,
        });
        let len = records.len() as i64;
        self.high_watermark.send_replace(len);
        len - 1
    }

    /// Offset the next appended record gets.
    pub fn high_watermark(&self) -> i64 {
        *self.high_watermark.borrow()
    }

    async fn read(&self, topic: &str, offset: i64) -> Option<ClaimedMessage> {
        let records = self.records.read().await;
        let stored = records.get(usize::try_from(offset).ok()?)?;
        Some(ClaimedMessage {
            topic: topic.to_string(),
            partition: self.id,
            offset,
            key: stored.key.clone(),
            payload: stored.payload.clone(),
            headers: stored.headers.clone(),
            timestamp_ms: stored.timestamp_ms,
        })
    }

    pub async fn read_all(&self, topic: &str) -> Vec<ClaimedMessage> {
        let mut out = Vec::new();
        let mut offset = 0;
        while let Some(msg) = self.read(topic, offset).await {
            out.push(msg);
            offset += 1;
        }
        out
    }

    pub fn metadata(&self) -> PartitionMetadata {
        let placement = self.placement();
        PartitionMetadata {
            id: self.id,
            leader: placement.leader,
            replicas: placement.replicas,
            isr: placement.isr,
        }
    }

    pub fn placement(&self) -> Placement {
        match self.placement.lock() {
            Ok(p) => p.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn update_placement(&self, f: impl FnOnce(&mut Placement)) {
        match self.placement.lock() {
            Ok(mut p) => f(&mut p),
            Err(poisoned) => f(&mut poisoned.into_inner()),
        }
    }
}

// ═══════════════════════════════════════════════════════════════
//  Topic
// ═══════════════════════════════════════════════════════════════

pub(crate) struct Topic {
    pub name: String,
    pub replication: i16,
    pub config: Mutex<BTreeMap<String, String>>,
    partitions: SyncRwLock<Vec<Arc<PartitionLog>>>,
    /// Fired when the topic is deleted; open claims close.
    pub deleted: CancellationToken,
}

impl Topic {
    pub fn new(
        name: String,
        partitions: i32,
        replication: i16,
        brokers: i32,
        config: BTreeMap<String, String>,
    ) -> Self {
        let logs = (0..partitions)
            .map(|p| Arc::new(PartitionLog::new(p, Placement::round_robin(p, replication, brokers))))
            .collect();
        Self {
            name,
            replication,
            config: Mutex::new(config),
            partitions: SyncRwLock::new(logs),
            deleted: CancellationToken::new(),
        }
    }

    pub fn partition_count(&self) -> i32 {
        self.logs().len() as i32
    }

    pub fn partition(&self, id: i32) -> Option<Arc<PartitionLog>> {
        self.logs().get(usize::try_from(id).ok()?).cloned()
    }

    pub fn logs(&self) -> Vec<Arc<PartitionLog>> {
        match self.partitions.read() {
            Ok(logs) => logs.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn grow(&self, count: i32, brokers: i32) {
        let mut logs = match self.partitions.write() {
            Ok(logs) => logs,
            Err(poisoned) => poisoned.into_inner(),
        };
        for p in logs.len() as i32..count {
            logs.push(Arc::new(PartitionLog::new(
                p,
                Placement::round_robin(p, self.replication, brokers),
            )));
        }
    }

    pub fn config(&self) -> BTreeMap<String, String> {
        match self.config.lock() {
            Ok(c) => c.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════
//  LogClaim
// ═══════════════════════════════════════════════════════════════

/// Reads a partition log from an offset, waiting for new records.
///
/// Closes when `stop` fires or the topic is deleted.
pub(crate) struct LogClaim {
    topic: Arc<Topic>,
    log: Arc<PartitionLog>,
    initial: i64,
    next: i64,
    appended: watch::Receiver<i64>,
    stop: CancellationToken,
}

impl LogClaim {
    pub fn new(topic: Arc<Topic>, log: Arc<PartitionLog>, start: i64, stop: CancellationToken) -> Self {
        let appended = log.high_watermark.subscribe();
        Self {
            topic,
            log,
            initial: start,
            next: start,
            appended,
            stop,
        }
    }
}

impl Claim for LogClaim {
    fn topic(&self) -> &str {
        &self.topic.name
    }

    fn partition(&self) -> i32 {
        self.log.id
    }

    fn initial_offset(&self) -> i64 {
        self.initial
    }

    fn recv(&mut self) -> Pin<Box<dyn Future<Output = Option<ClaimedMessage>> + Send + '_>> {
        Box::pin(async move {
            loop {
                if self.stop.is_cancelled() || self.topic.deleted.is_cancelled() {
                    return None;
                }
                if let Some(msg) = self.log.read(&self.topic.name, self.next).await {
                    self.next += 1;
                    return Some(msg);
                }
                tokio::select! {
                    _ = self.stop.cancelled() => return None,
                    _ = self.topic.deleted.cancelled() => return None,
                    changed = self.appended.changed() => {
                        if changed.is_err() {
                            return None;
                        }
                    }
                }
            }
        })
    }
}
