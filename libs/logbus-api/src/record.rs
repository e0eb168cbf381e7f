use crate::error::BrokerError;

/// Current Unix time in milliseconds.
pub fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

/// Ordered record headers. Keys are unique: inserting an existing key
/// replaces its value in place.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: Vec<(String, Vec<u8>)>,
}

impl Headers {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Vec<u8>>) {
        let key = key.into();
        let value = value.into();
        if let Some(entry) = self.entries.iter_mut().find(|(k, _)| k == &key) {
            entry.1 = value;
        } else {
            self.entries.push((key, value));
        }
    }

    pub fn get(&self, key: &str) -> Option<&[u8]> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_slice())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[u8])> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Unit of data to transmit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub topic: String,
    /// `None` lets the broker client choose the partition.
    pub key: Option<Vec<u8>>,
    pub payload: Vec<u8>,
    pub headers: Headers,
    /// Explicit target partition, overrides key-based partitioning.
    pub partition: Option<i32>,
    pub timestamp_ms: i64,
}

impl Record {
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            key: None,
            payload: payload.into(),
            headers: Headers::new(),
            partition: None,
            timestamp_ms: now_ms(),
        }
    }

    pub fn with_key(mut self, key: impl Into<Vec<u8>>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn with_partition(mut self, partition: i32) -> Self {
        self.partition = Some(partition);
        self
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        self.headers.insert(key, value);
        self
    }

    pub fn with_timestamp(mut self, timestamp_ms: i64) -> Self {
        self.timestamp_ms = timestamp_ms;
        self
    }
}

/// Broker acknowledgment for a persisted record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Delivered {
    pub partition: i32,
    pub offset: i64,
}

/// A record the broker did not persist, kept for caller-side retry.
#[derive(Debug, Clone)]
pub struct FailedDelivery {
    pub record: Record,
    pub cause: BrokerError,
}

/// Terminal result of one submitted record.
#[derive(Debug, Clone)]
pub enum DeliveryOutcome {
    Success { partition: i32, offset: i64 },
    Failure { record: Record, cause: BrokerError },
    /// Not accepted within the deadline. The broker may still have the
    /// record if the deadline fired after it was sent.
    TimedOut { record: Record },
}

impl DeliveryOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, DeliveryOutcome::Success { .. })
    }
}

impl From<Delivered> for DeliveryOutcome {
    fn from(d: Delivered) -> Self {
        DeliveryOutcome::Success {
            partition: d.partition,
            offset: d.offset,
        }
    }
}

impl From<FailedDelivery> for DeliveryOutcome {
    fn from(f: FailedDelivery) -> Self {
        DeliveryOutcome::Failure {
            record: f.record,
            cause: f.cause,
        }
    }
}

/// A record received through a claim, with its delivery coordinates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimedMessage {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<Vec<u8>>,
    pub payload: Vec<u8>,
    pub headers: Headers,
    pub timestamp_ms: i64,
}

impl ClaimedMessage {
    /// Offset to commit once this message is processed.
    pub fn next_offset(&self) -> i64 {
        self.offset + 1
    }
}
