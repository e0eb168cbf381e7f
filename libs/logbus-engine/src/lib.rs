pub mod admin;
pub mod claim;
pub mod config;
pub mod delivery;
pub mod error;
pub mod group;
pub mod partition;
pub mod retry;
pub mod sync_producer;

pub use claim::{ClaimLoop, LogProcessor, MessageProcessor, Progress, consume_claim};
pub use config::{Backend, Config, ConsumerConfig, MemoryConfig, ProducerConfig};
pub use delivery::{
    DeliveryPipeline, DeliveryReport, DrainHandle, DrainedOutcomes, OutcomeStreams, SubmitCounts,
    Submission, drain_outcomes,
};
pub use error::{AdminError, ConfigError, GroupError, PipelineError};
pub use group::{GroupRunner, RunnerState};
pub use sync_producer::{SendTally, SyncProducer};
