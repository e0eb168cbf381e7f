//! Data model and broker collaborator traits shared by the engine, the
//! broker bindings and the demo binaries.

pub mod admin;
pub mod consumer;
pub mod error;
pub mod producer;
pub mod record;

pub use admin::{ClusterAdmin, PartitionMetadata, TopicDetail, TopicMetadata};
pub use consumer::{
    Claim, ClaimExit, ClaimHandler, GroupConsumer, GroupSession, PartitionConsumer, StartOffset,
};
pub use error::{BrokerError, ErrorKind};
pub use producer::{Acks, RecordSink, Sequence, Sequencer};
pub use record::{
    ClaimedMessage, Delivered, DeliveryOutcome, FailedDelivery, Headers, Record, now_ms,
};
