use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rdkafka::Offset;
use rdkafka::client::ClientContext;
use rdkafka::consumer::{BaseConsumer, CommitMode, Consumer, ConsumerContext, Rebalance, StreamConsumer};
use rdkafka::message::{BorrowedMessage, Headers as _, Message};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use logbus_api::{
    BrokerError, Claim, ClaimHandler, ClaimedMessage, GroupConsumer, GroupSession, Headers,
    StartOffset,
};

use crate::{KafkaConfig, map_error};

/// Per-partition buffer between the poll loop and a claim.
const CLAIM_BUFFER: usize = 256;
const SEEK_TIMEOUT: Duration = Duration::from_secs(5);

// ═══════════════════════════════════════════════════════════════
//  Rebalance context
// ═══════════════════════════════════════════════════════════════

/// Ends the running session when librdkafka revokes partitions.
#[derive(Default)]
pub(crate) struct GroupContext {
    session: Mutex<Option<CancellationToken>>,
}

impl GroupContext {
    fn set_session(&self, token: Option<CancellationToken>) {
        match self.session.lock() {
            Ok(mut s) => *s = token,
            Err(poisoned) => *poisoned.into_inner() = token,
        }
    }
}

impl ClientContext for GroupContext {}

impl ConsumerContext for GroupContext {
    fn pre_rebalance(&self, _consumer: &BaseConsumer<Self>, rebalance: &Rebalance<'_>) {
        if let Rebalance::Revoke(_) = rebalance {
            let session = match self.session.lock() {
                Ok(s) => s.clone(),
                Err(poisoned) => poisoned.into_inner().clone(),
            };
            if let Some(token) = session {
                tracing::info!("partitions revoked, ending session");
                token.cancel();
            }
        }
    }
}

pub(crate) fn to_claimed(msg: &BorrowedMessage<'_>) -> ClaimedMessage {
    let mut headers = Headers::new();
    if let Some(h) = msg.headers() {
        for header in h.iter() {
            headers.insert(header.key, header.value.unwrap_or_default());
        }
    }
    ClaimedMessage {
        topic: msg.topic().to_string(),
        partition: msg.partition(),
        offset: msg.offset(),
        key: msg.key().map(<[u8]>::to_vec),
        payload: msg.payload().map(<[u8]>::to_vec).unwrap_or_default(),
        headers,
        timestamp_ms: msg.timestamp().to_millis().unwrap_or_default(),
    }
}

// ═══════════════════════════════════════════════════════════════
//  Session and claims
// ═══════════════════════════════════════════════════════════════

type PartitionKey = (String, i32);

struct KafkaSession {
    consumer: Arc<StreamConsumer<GroupContext>>,
    member_id: String,
    generation: i32,
    done: CancellationToken,
    /// Next offset to consume per partition, as of the last mark.
    marked: Mutex<HashMap<PartitionKey, i64>>,
}

impl KafkaSession {
    fn marked(&self) -> HashMap<PartitionKey, i64> {
        match self.marked.lock() {
            Ok(m) => m.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl GroupSession for KafkaSession {
    fn member_id(&self) -> &str {
        &self.member_id
    }

    fn generation_id(&self) -> i32 {
        self.generation
    }

    fn mark_message(&self, msg: &ClaimedMessage, _metadata: &str) {
        if let Err(e) = self
            .consumer
            .store_offset(&msg.topic, msg.partition, msg.next_offset())
        {
            tracing::warn!(topic = %msg.topic, partition = msg.partition, offset = msg.offset, error = %e, "store offset failed");
            return;
        }
        let mut marked = match self.marked.lock() {
            Ok(m) => m,
            Err(poisoned) => poisoned.into_inner(),
        };
        marked.insert((msg.topic.clone(), msg.partition), msg.next_offset());
    }

    fn done(&self) -> &CancellationToken {
        &self.done
    }
}

struct ChannelClaim {
    topic: String,
    partition: i32,
    initial: i64,
    rx: mpsc::Receiver<ClaimedMessage>,
}

impl Claim for ChannelClaim {
    fn topic(&self) -> &str {
        &self.topic
    }

    fn partition(&self) -> i32 {
        self.partition
    }

    fn initial_offset(&self) -> i64 {
        self.initial
    }

    fn recv(&mut self) -> Pin<Box<dyn Future<Output = Option<ClaimedMessage>> + Send + '_>> {
        Box::pin(self.rx.recv())
    }
}

// ═══════════════════════════════════════════════════════════════
//  KafkaGroupConsumer
// ═══════════════════════════════════════════════════════════════

/// Consumer-group member over a librdkafka `StreamConsumer`.
///
/// Marked offsets are stored locally and committed by librdkafka's
/// auto-commit, plus a synchronous commit at the end of each generation.
pub struct KafkaGroupConsumer {
    consumer: Arc<StreamConsumer<GroupContext>>,
    member_id: String,
    subscribed: Mutex<Vec<String>>,
    generation: Mutex<i32>,
}

impl KafkaGroupConsumer {
    pub fn new(config: &KafkaConfig, group: &str, reset: StartOffset) -> Result<Self, BrokerError> {
        let consumer: StreamConsumer<GroupContext> = config
            .consumer_config(group, reset)
            .create_with_context(GroupContext::default())
            .map_err(|e| map_error(e, "create group consumer"))?;
        tracing::info!(%group, brokers = %config.brokers.join(","), "kafka group consumer created");
        Ok(Self {
            consumer: Arc::new(consumer),
            member_id: config.client_id.clone(),
            subscribed: Mutex::new(Vec::new()),
            generation: Mutex::new(0),
        })
    }

    fn ensure_subscribed(&self, topics: &[String]) -> Result<(), BrokerError> {
        let mut subscribed = match self.subscribed.lock() {
            Ok(s) => s,
            Err(poisoned) => poisoned.into_inner(),
        };
        if subscribed.as_slice() != topics {
            let names: Vec<&str> = topics.iter().map(String::as_str).collect();
            self.consumer
                .subscribe(&names)
                .map_err(|e| map_error(e, "subscribe"))?;
            *subscribed = topics.to_vec();
        }
        Ok(())
    }

    fn next_generation(&self) -> i32 {
        let mut g = match self.generation.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        *g += 1;
        *g
    }

    /// Open one claim channel per currently assigned partition.
    fn open_claims(
        &self,
    ) -> Result<(HashMap<PartitionKey, mpsc::Sender<ClaimedMessage>>, Vec<ChannelClaim>), BrokerError> {
        let assignment = self
            .consumer
            .assignment()
            .map_err(|e| map_error(e, "read assignment"))?;
        let positions = self.consumer.position().ok();

        let mut senders = HashMap::new();
        let mut claims = Vec::new();
        for elem in assignment.elements() {
            let (tx, rx) = mpsc::channel(CLAIM_BUFFER);
            let initial = positions
                .as_ref()
                .and_then(|p| p.find_partition(elem.topic(), elem.partition()))
                .and_then(|p| p.offset().to_raw())
                .unwrap_or(-1);
            senders.insert((elem.topic().to_string(), elem.partition()), tx);
            claims.push(ChannelClaim {
                topic: elem.topic().to_string(),
                partition: elem.partition(),
                initial,
                rx,
            });
        }
        Ok((senders, claims))
    }

    /// Seek still-assigned partitions back to their first unacknowledged
    /// offset. Messages polled but dropped with the claim buffers are then
    /// polled again by the next generation instead of skipped.
    fn rewind(&self, targets: &[(PartitionKey, i64)]) {
        if targets.is_empty() {
            return;
        }
        let assignment = match self.consumer.assignment() {
            Ok(a) => a,
            Err(e) => {
                tracing::warn!(error = %e, "read assignment for rewind failed");
                return;
            }
        };
        for ((topic, partition), offset) in targets {
            if assignment.find_partition(topic, *partition).is_none() {
                continue;
            }
            match self
                .consumer
                .seek(topic, *partition, Offset::Offset(*offset), SEEK_TIMEOUT)
            {
                Ok(()) => tracing::debug!(%topic, partition, offset, "rewound partition"),
                Err(e) => tracing::warn!(%topic, partition, offset, error = %e, "rewind failed"),
            }
        }
    }

    async fn run_generation(
        &self,
        topics: &[String],
        handler: Arc<dyn ClaimHandler>,
        token: &CancellationToken,
    ) -> Result<(), BrokerError> {
        self.ensure_subscribed(topics)?;

        // The assignment is known once the first message of the generation arrives.
        let first = tokio::select! {
            _ = token.cancelled() => return Ok(()),
            msg = self.consumer.recv() => msg.map(|m| to_claimed(&m)).map_err(|e| map_error(e, "poll"))?,
        };

        let done = token.child_token();
        self.consumer.context().set_session(Some(done.clone()));
        let session = Arc::new(KafkaSession {
            consumer: self.consumer.clone(),
            member_id: self.member_id.clone(),
            generation: self.next_generation(),
            done: done.clone(),
            marked: Mutex::new(HashMap::new()),
        });

        let first_position = [((first.topic.clone(), first.partition), first.offset)];
        let (mut senders, claims) = match self.open_claims() {
            Ok(opened) => opened,
            Err(e) => {
                done.cancel();
                self.consumer.context().set_session(None);
                self.rewind(&first_position);
                return Err(e);
            }
        };
        tracing::info!(generation = session.generation, partitions = claims.len(), "generation started");

        if let Err(e) = handler.setup(session.as_ref()).await {
            done.cancel();
            self.consumer.context().set_session(None);
            self.rewind(&first_position);
            return Err(e);
        }

        let mut tasks = JoinSet::new();
        for mut claim in claims {
            let handler = handler.clone();
            let session = session.clone();
            tasks.spawn(async move { handler.consume_claim(session.as_ref(), &mut claim).await });
        }

        let mut routed = HashMap::new();
        route(&senders, &mut routed, first, &done).await;
        let mut poll_error = None;
        while !done.is_cancelled() {
            let next = tokio::select! {
                biased;
                _ = done.cancelled() => break,
                msg = self.consumer.recv() => msg.map(|m| to_claimed(&m)),
            };
            match next {
                Ok(msg) => route(&senders, &mut routed, msg, &done).await,
                Err(e) => {
                    poll_error = Some(map_error(e, "poll"));
                    break;
                }
            }
        }
        done.cancel();
        senders.clear();

        let mut first_error = poll_error;
        while let Some(joined) = tasks.join_next().await {
            let result = joined.map_err(|e| BrokerError::logic(format!("claim task failed: {e}")));
            if let Err(e) = result.and_then(|r| r) {
                tracing::warn!(error = %e, "claim failed");
                first_error.get_or_insert(e);
            }
        }
        self.consumer.context().set_session(None);
        self.rewind(&rewind_targets(&routed, &session.marked()));

        let cleanup = handler.cleanup(session.as_ref()).await;
        if let Err(e) = self.consumer.commit_consumer_state(CommitMode::Sync) {
            tracing::warn!(error = %e, "commit at end of generation failed");
        }
        cleanup?;
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// Hand `msg` to its claim. A message for an unassigned partition means
/// the assignment changed under us and ends the session.
///
/// `routed` keeps the first offset polled per partition this generation.
async fn route(
    senders: &HashMap<PartitionKey, mpsc::Sender<ClaimedMessage>>,
    routed: &mut HashMap<PartitionKey, i64>,
    msg: ClaimedMessage,
    done: &CancellationToken,
) {
    routed
        .entry((msg.topic.clone(), msg.partition))
        .or_insert(msg.offset);
    let Some(tx) = senders.get(&(msg.topic.clone(), msg.partition)) else {
        tracing::debug!(topic = %msg.topic, partition = msg.partition, "message outside assignment");
        done.cancel();
        return;
    };
    tokio::select! {
        _ = done.cancelled() => {}
        _ = tx.send(msg) => {}
    }
}

/// Where each partition polled this generation resumes: after the last
/// marked message, or at the first polled offset when nothing was marked.
fn rewind_targets(
    routed: &HashMap<PartitionKey, i64>,
    marked: &HashMap<PartitionKey, i64>,
) -> Vec<(PartitionKey, i64)> {
    let mut targets: Vec<_> = routed
        .iter()
        .map(|(key, first)| {
            let resume = marked.get(key).copied().map_or(*first, |m| m.max(*first));
            (key.clone(), resume)
        })
        .collect();
    targets.sort();
    targets
}

impl GroupConsumer for KafkaGroupConsumer {
    fn consume<'a>(
        &'a self,
        topics: &'a [String],
        handler: Arc<dyn ClaimHandler>,
        token: CancellationToken,
    ) -> Pin<Box<dyn Future<Output = Result<(), BrokerError>> + Send + 'a>> {
        Box::pin(async move { self.run_generation(topics, handler, &token).await })
    }
}
