use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Deserialize;

use crate::error::BrokerError;
use crate::record::{Delivered, Record};

/// Acknowledgment level requested from the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Acks {
    /// Fire and forget.
    None,
    /// Leader has written the record.
    Leader,
    /// Every in-sync replica has written the record.
    #[default]
    All,
}

impl Acks {
    /// Value of the `acks` client property.
    pub fn as_str(&self) -> &'static str {
        match self {
            Acks::None => "0",
            Acks::Leader => "1",
            Acks::All => "all",
        }
    }
}

static NEXT_PRODUCER: AtomicU64 = AtomicU64::new(1);

/// Identity of one record send: the producer session it belongs to and
/// its position within that session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Sequence {
    pub producer: u64,
    pub number: u64,
}

/// Numbers the records of one producer session, starting at 1.
///
/// Every `Sequencer` gets a process-unique producer id, so sessions sharing
/// one sink never collide.
#[derive(Debug)]
pub struct Sequencer {
    producer: u64,
    last: u64,
}

impl Sequencer {
    pub fn new() -> Self {
        Self {
            producer: NEXT_PRODUCER.fetch_add(1, Ordering::Relaxed),
            last: 0,
        }
    }

    pub fn producer(&self) -> u64 {
        self.producer
    }

    pub fn next(&mut self) -> Sequence {
        self.last += 1;
        Sequence {
            producer: self.producer,
            number: self.last,
        }
    }
}

impl Default for Sequencer {
    fn default() -> Self {
        Self::new()
    }
}

/// Broker-facing producer. Implemented by broker bindings.
///
/// The delivery pipeline owns the outbound queue and concurrency; the sink
/// only performs one send per call.
pub trait RecordSink: Send + Sync {
    /// Send one record and wait for its acknowledgment.
    ///
    /// `sequence` is assigned by the caller once per record and repeated on
    /// every retry of that record, so idempotent sinks can deduplicate
    /// within the producer session.
    fn send<'a>(
        &'a self,
        record: &'a Record,
        sequence: Sequence,
    ) -> Pin<Box<dyn Future<Output = Result<Delivered, BrokerError>> + Send + 'a>>;

    /// Flush client-side buffers. Called once after the last send.
    fn flush(&self) -> Pin<Box<dyn Future<Output = Result<(), BrokerError>> + Send + '_>>;
}
