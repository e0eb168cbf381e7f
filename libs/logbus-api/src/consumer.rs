use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use crate::error::BrokerError;
use crate::record::ClaimedMessage;

/// Where a consumer starts when no committed offset exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StartOffset {
    /// First retained offset of the partition.
    #[default]
    Oldest,
    /// Only records produced after the consumer started.
    Newest,
    /// Explicit offset.
    #[serde(skip)]
    At(i64),
}

/// How a claim loop ended. Neither variant is an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimExit {
    /// The session reported done (rebalance or shutdown).
    SessionDone,
    /// The claim stream closed.
    ClaimClosed,
}

/// Ordered stream of messages for one partition.
///
/// Implemented by broker bindings. `recv` returning `None` ends the claim.
pub trait Claim: Send {
    fn topic(&self) -> &str;

    fn partition(&self) -> i32;

    /// Offset of the first message this claim delivers.
    fn initial_offset(&self) -> i64;

    fn recv(&mut self) -> Pin<Box<dyn Future<Output = Option<ClaimedMessage>> + Send + '_>>;
}

/// One generation of consumer-group membership.
pub trait GroupSession: Send + Sync {
    fn member_id(&self) -> &str;

    fn generation_id(&self) -> i32;

    /// Mark the message as processed; its next offset becomes committable.
    fn mark_message(&self, msg: &ClaimedMessage, metadata: &str);

    /// Fires on rebalance, error or shutdown.
    fn done(&self) -> &CancellationToken;
}

/// Consumer-group handler capability.
///
/// `setup` runs once per generation before any claim starts, `consume_claim`
/// runs once per assigned partition (concurrently), and `cleanup` runs after
/// every claim has returned.
pub trait ClaimHandler: Send + Sync {
    fn setup<'a>(
        &'a self,
        session: &'a dyn GroupSession,
    ) -> Pin<Box<dyn Future<Output = Result<(), BrokerError>> + Send + 'a>>;

    fn cleanup<'a>(
        &'a self,
        session: &'a dyn GroupSession,
    ) -> Pin<Box<dyn Future<Output = Result<(), BrokerError>> + Send + 'a>>;

    fn consume_claim<'a>(
        &'a self,
        session: &'a dyn GroupSession,
        claim: &'a mut dyn Claim,
    ) -> Pin<Box<dyn Future<Output = Result<ClaimExit, BrokerError>> + Send + 'a>>;
}

/// Group membership provided by the broker binding.
pub trait GroupConsumer: Send + Sync {
    /// Join the group and run exactly one generation: assign partitions,
    /// call the handler, commit marked offsets.
    ///
    /// Returns `Ok(())` when the generation ends normally (rebalance or
    /// `token` cancelled). The caller decides whether to join again.
    fn consume<'a>(
        &'a self,
        topics: &'a [String],
        handler: Arc<dyn ClaimHandler>,
        token: CancellationToken,
    ) -> Pin<Box<dyn Future<Output = Result<(), BrokerError>> + Send + 'a>>;
}

/// Direct partition access without group coordination.
pub trait PartitionConsumer: Send + Sync {
    fn partitions<'a>(
        &'a self,
        topic: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<i32>, BrokerError>> + Send + 'a>>;

    /// Open a stream over one partition. The stream ends when dropped.
    #[allow(clippy::type_complexity)]
    fn consume_partition<'a>(
        &'a self,
        topic: &'a str,
        partition: i32,
        start: StartOffset,
    ) -> Pin<Box<dyn Future<Output = Result<Box<dyn Claim>, BrokerError>> + Send + 'a>>;
}
