use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use logbus_api::{
    BrokerError, ClaimHandler, ClaimedMessage, GroupConsumer, GroupSession, StartOffset,
};

use crate::MemoryBroker;
use crate::log::LogClaim;

static NEXT_MEMBER: AtomicU64 = AtomicU64::new(1);

// ═══════════════════════════════════════════════════════════════
//  GroupState
// ═══════════════════════════════════════════════════════════════

/// Membership and committed offsets of one consumer group.
///
/// The generation advances only when a member joins or leaves; every
/// advance ends the running sessions of the other members.
pub(crate) struct GroupState {
    name: String,
    inner: Mutex<GroupInner>,
}

#[derive(Default)]
struct GroupInner {
    generation: i32,
    /// Member id → session token of its current generation.
    members: BTreeMap<String, CancellationToken>,
    committed: HashMap<(String, i32), i64>,
}

impl GroupState {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            inner: Mutex::new(GroupInner::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, GroupInner> {
        match self.inner.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Register `member` with a fresh session token. Returns the generation
    /// and the sorted member list it runs with.
    fn join(&self, member: &str, session: CancellationToken) -> (i32, Vec<String>) {
        let mut inner = self.lock();
        if !inner.members.contains_key(member) {
            inner.generation += 1;
            for (other, token) in &inner.members {
                tracing::debug!(group = %self.name, member = %other, "rebalance: ending session");
                token.cancel();
            }
            tracing::info!(group = %self.name, %member, generation = inner.generation, "member joined");
        }
        inner.members.insert(member.to_string(), session);
        (inner.generation, inner.members.keys().cloned().collect())
    }

    fn leave(&self, member: &str) {
        let mut inner = self.lock();
        if inner.members.remove(member).is_some() {
            inner.generation += 1;
            for token in inner.members.values() {
                token.cancel();
            }
            tracing::info!(group = %self.name, %member, generation = inner.generation, "member left");
        }
    }

    fn commit(&self, topic: &str, partition: i32, offset: i64) {
        let mut inner = self.lock();
        let slot = inner.committed.entry((topic.to_string(), partition)).or_insert(offset);
        if *slot < offset {
            *slot = offset;
        }
    }

    pub fn committed(&self, topic: &str, partition: i32) -> Option<i64> {
        self.lock().committed.get(&(topic.to_string(), partition)).copied()
    }
}

// ═══════════════════════════════════════════════════════════════
//  Session
// ═══════════════════════════════════════════════════════════════

struct MemorySession {
    member_id: String,
    generation: i32,
    group: Arc<GroupState>,
    done: CancellationToken,
}

impl GroupSession for MemorySession {
    fn member_id(&self) -> &str {
        &self.member_id
    }

    fn generation_id(&self) -> i32 {
        self.generation
    }

    fn mark_message(&self, msg: &ClaimedMessage, _metadata: &str) {
        self.group.commit(&msg.topic, msg.partition, msg.next_offset());
    }

    fn done(&self) -> &CancellationToken {
        &self.done
    }
}

// ═══════════════════════════════════════════════════════════════
//  MemoryGroupConsumer
// ═══════════════════════════════════════════════════════════════

/// One member of a consumer group on a [`MemoryBroker`].
pub struct MemoryGroupConsumer {
    broker: MemoryBroker,
    group: Arc<GroupState>,
    member_id: String,
    offset_reset: StartOffset,
    assignment: Mutex<Vec<(String, i32)>>,
}

impl MemoryGroupConsumer {
    pub fn new(broker: MemoryBroker, group: &str, client_id: &str) -> Self {
        let member_id = format!("{client_id}-{}", NEXT_MEMBER.fetch_add(1, Ordering::Relaxed));
        Self {
            group: broker.group_state(group),
            broker,
            member_id,
            offset_reset: StartOffset::Oldest,
            assignment: Mutex::new(Vec::new()),
        }
    }

    /// Start position for partitions without a committed offset.
    pub fn with_offset_reset(mut self, reset: StartOffset) -> Self {
        self.offset_reset = reset;
        self
    }

    pub fn member_id(&self) -> &str {
        &self.member_id
    }

    /// Partitions claimed in the most recent generation.
    pub fn assignment(&self) -> Vec<(String, i32)> {
        match self.assignment.lock() {
            Ok(a) => a.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn set_assignment(&self, assigned: Vec<(String, i32)>) {
        match self.assignment.lock() {
            Ok(mut a) => *a = assigned,
            Err(poisoned) => *poisoned.into_inner() = assigned,
        }
    }

    /// Open one claim per partition assigned to this member.
    fn claims(
        &self,
        topics: &[String],
        members: &[String],
        done: &CancellationToken,
    ) -> Result<Vec<LogClaim>, BrokerError> {
        let mut all = Vec::new();
        let mut sorted = topics.to_vec();
        sorted.sort();
        sorted.dedup();
        for name in &sorted {
            let topic = self.broker.topic_or_create(name)?;
            for log in topic.logs() {
                all.push((topic.clone(), log));
            }
        }

        let index = members
            .iter()
            .position(|m| *m == self.member_id)
            .ok_or_else(|| BrokerError::logic("member missing from its own generation"))?;

        let mut claims = Vec::new();
        let mut assigned = Vec::new();
        for (i, (topic, log)) in all.into_iter().enumerate() {
            if i % members.len() != index {
                continue;
            }
            let start = match self.group.committed(&topic.name, log.id()) {
                Some(offset) => offset,
                None => match self.offset_reset {
                    StartOffset::Oldest => 0,
                    StartOffset::Newest => log.high_watermark(),
                    StartOffset::At(n) => n.clamp(0, log.high_watermark()),
                },
            };
            assigned.push((topic.name.clone(), log.id()));
            claims.push(LogClaim::new(topic, log, start, done.clone()));
        }
        self.set_assignment(assigned);
        Ok(claims)
    }

    async fn run_generation(
        &self,
        topics: &[String],
        handler: Arc<dyn ClaimHandler>,
        token: &CancellationToken,
    ) -> Result<(), BrokerError> {
        let done = token.child_token();
        let (generation, members) = self.group.join(&self.member_id, done.clone());
        let session = Arc::new(MemorySession {
            member_id: self.member_id.clone(),
            generation,
            group: self.group.clone(),
            done: done.clone(),
        });

        let claims = match self.claims(topics, &members, &done) {
            Ok(c) => c,
            Err(e) => {
                done.cancel();
                return Err(e);
            }
        };
        tracing::info!(
            member = %self.member_id,
            generation,
            partitions = claims.len(),
            "generation started"
        );

        if let Err(e) = handler.setup(session.as_ref()).await {
            done.cancel();
            return Err(e);
        }

        let mut first_error = None;
        if claims.is_empty() {
            done.cancelled().await;
        } else {
            let mut tasks = JoinSet::new();
            for mut claim in claims {
                let handler = handler.clone();
                let session = session.clone();
                tasks.spawn(async move { handler.consume_claim(session.as_ref(), &mut claim).await });
            }
            while let Some(joined) = tasks.join_next().await {
                let result = joined.map_err(|e| BrokerError::logic(format!("claim task failed: {e}")));
                if let Err(e) = result.and_then(|r| r) {
                    tracing::warn!(member = %self.member_id, error = %e, "claim failed, ending session");
                    done.cancel();
                    first_error.get_or_insert(e);
                }
            }
        }
        done.cancel();

        handler.cleanup(session.as_ref()).await?;
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl GroupConsumer for MemoryGroupConsumer {
    fn consume<'a>(
        &'a self,
        topics: &'a [String],
        handler: Arc<dyn ClaimHandler>,
        token: CancellationToken,
    ) -> Pin<Box<dyn Future<Output = Result<(), BrokerError>> + Send + 'a>> {
        Box::pin(async move {
            let result = self.run_generation(topics, handler, &token).await;
            if token.is_cancelled() {
                self.group.leave(&self.member_id);
            }
            result
        })
    }
}

impl Drop for MemoryGroupConsumer {
    fn drop(&mut self) {
        self.group.leave(&self.member_id);
    }
}
