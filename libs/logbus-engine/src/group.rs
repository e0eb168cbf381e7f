//! Consumer-group rejoin state machine.
//!
//! ```text
//!            ┌──────────── Ok (rebalance) ───────────┐
//!            ▼                                        │
//!  ──▶ Joining ──setup──▶ Consuming ──generation end──┴──▶ Rejoining ──backoff──▶ Joining
//!            │                 │
//!            └── fatal error / token cancelled ──▶ Stopped
//! ```

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use backon::BackoffBuilder;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use logbus_api::{BrokerError, Claim, ClaimExit, ClaimHandler, GroupConsumer, GroupSession};

use crate::config::ConsumerConfig;
use crate::error::GroupError;
use crate::retry::rejoin_policy;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunnerState {
    Joining,
    Consuming,
    Rejoining,
    Stopped,
}

/// Keeps a member in its group across generations.
pub struct GroupRunner {
    consumer: Arc<dyn GroupConsumer>,
    topics: Vec<String>,
    handler: Arc<dyn ClaimHandler>,
    config: ConsumerConfig,
    state: Arc<watch::Sender<RunnerState>>,
}

impl GroupRunner {
    pub fn new(
        consumer: Arc<dyn GroupConsumer>,
        topics: Vec<String>,
        handler: Arc<dyn ClaimHandler>,
        config: ConsumerConfig,
    ) -> Self {
        let (state, _) = watch::channel(RunnerState::Joining);
        Self {
            consumer,
            topics,
            handler,
            config,
            state: Arc::new(state),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<RunnerState> {
        self.state.subscribe()
    }

    pub fn state(&self) -> RunnerState {
        *self.state.borrow()
    }

    /// Run generations until `token` is cancelled or a fatal error occurs.
    ///
    /// The generation itself is not raced against `token`: the group consumer
    /// observes it, so claims finish their in-flight message before the
    /// runner stops.
    pub async fn run(&self, token: CancellationToken) -> Result<(), GroupError> {
        let tracking: Arc<dyn ClaimHandler> = Arc::new(StateTracking {
            inner: self.handler.clone(),
            state: self.state.clone(),
        });
        let max_delay = self.config.rejoin_backoff_max();
        let mut backoff = rejoin_policy(&self.config).build();

        loop {
            if token.is_cancelled() {
                break;
            }

            self.set(RunnerState::Joining);
            tracing::info!(group = %self.config.group, name = %self.config.name, "joining group");

            match self.consumer.consume(&self.topics, tracking.clone(), token.clone()).await {
                Ok(()) => {
                    backoff = rejoin_policy(&self.config).build();
                    if token.is_cancelled() {
                        break;
                    }
                    tracing::info!(group = %self.config.group, "generation ended, rejoining");
                    self.set(RunnerState::Rejoining);
                }
                Err(e) if e.is_fatal() => {
                    tracing::error!(group = %self.config.group, error = %e, "fatal group error");
                    self.set(RunnerState::Stopped);
                    return Err(GroupError::Fatal {
                        group: self.config.group.clone(),
                        source: e,
                    });
                }
                Err(e) => {
                    if token.is_cancelled() {
                        break;
                    }
                    let delay = backoff.next().unwrap_or(max_delay);
                    tracing::error!(
                        group = %self.config.group,
                        error = %e,
                        retry_in_ms = delay.as_millis() as u64,
                        "generation failed"
                    );
                    self.set(RunnerState::Rejoining);
                    wait(delay, &token).await;
                }
            }
        }

        tracing::info!(group = %self.config.group, name = %self.config.name, "group runner stopped");
        self.set(RunnerState::Stopped);
        Ok(())
    }

    fn set(&self, state: RunnerState) {
        self.state.send_replace(state);
    }
}

async fn wait(delay: Duration, token: &CancellationToken) {
    tokio::select! {
        _ = token.cancelled() => {}
        _ = tokio::time::sleep(delay) => {}
    }
}

/// Publishes `Consuming` once a generation's setup ran.
struct StateTracking {
    inner: Arc<dyn ClaimHandler>,
    state: Arc<watch::Sender<RunnerState>>,
}

impl ClaimHandler for StateTracking {
    fn setup<'a>(
        &'a self,
        session: &'a dyn GroupSession,
    ) -> Pin<Box<dyn Future<Output = Result<(), BrokerError>> + Send + 'a>> {
        Box::pin(async move {
            self.inner.setup(session).await?;
            self.state.send_replace(RunnerState::Consuming);
            Ok(())
        })
    }

    fn cleanup<'a>(
        &'a self,
        session: &'a dyn GroupSession,
    ) -> Pin<Box<dyn Future<Output = Result<(), BrokerError>> + Send + 'a>> {
        self.inner.cleanup(session)
    }

    fn consume_claim<'a>(
        &'a self,
        session: &'a dyn GroupSession,
        claim: &'a mut dyn Claim,
    ) -> Pin<Box<dyn Future<Output = Result<ClaimExit, BrokerError>> + Send + 'a>> {
        self.inner.consume_claim(session, claim)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use super::*;

    /// Plays back one result per generation, then waits for cancellation.
    struct ScriptedGroup {
        script: Mutex<VecDeque<Result<(), BrokerError>>>,
        joins: Mutex<u32>,
    }

    impl ScriptedGroup {
        fn new(script: Vec<Result<(), BrokerError>>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                joins: Mutex::new(0),
            }
        }

        fn joins(&self) -> u32 {
            *self.joins.lock().unwrap()
        }
    }

    impl GroupConsumer for ScriptedGroup {
        fn consume<'a>(
            &'a self,
            _topics: &'a [String],
            _handler: Arc<dyn ClaimHandler>,
            token: CancellationToken,
        ) -> Pin<Box<dyn Future<Output = Result<(), BrokerError>> + Send + 'a>> {
            Box::pin(async move {
                *self.joins.lock().unwrap() += 1;
                let next = self.script.lock().unwrap().pop_front();
                match next {
                    Some(result) => result,
                    None => {
                        token.cancelled().await;
                        Ok(())
                    }
                }
            })
        }
    }

    struct Noop;

    impl ClaimHandler for Noop {
        fn setup<'a>(
            &'a self,
            _session: &'a dyn GroupSession,
        ) -> Pin<Box<dyn Future<Output = Result<(), BrokerError>> + Send + 'a>> {
            Box::pin(async { Ok(()) })
        }
        fn cleanup<'a>(
            &'a self,
            _session: &'a dyn GroupSession,
        ) -> Pin<Box<dyn Future<Output = Result<(), BrokerError>> + Send + 'a>> {
            Box::pin(async { Ok(()) })
        }
        fn consume_claim<'a>(
            &'a self,
            _session: &'a dyn GroupSession,
            _claim: &'a mut dyn Claim,
        ) -> Pin<Box<dyn Future<Output = Result<ClaimExit, BrokerError>> + Send + 'a>> {
            Box::pin(async { Ok(ClaimExit::ClaimClosed) })
        }
    }

    fn config() -> ConsumerConfig {
        ConsumerConfig {
            rejoin_backoff_min_ms: 1,
            rejoin_backoff_max_ms: 5,
            ..ConsumerConfig::default()
        }
    }

    #[tokio::test]
    async fn rejoins_after_rebalance_and_errors() {
        let group = Arc::new(ScriptedGroup::new(vec![
            Ok(()),
            Err(BrokerError::connectivity("coordinator not available")),
            Ok(()),
        ]));
        let runner = GroupRunner::new(group.clone(), vec!["t".into()], Arc::new(Noop), config());
        let token = CancellationToken::new();

        let stopper = token.clone();
        let watcher = group.clone();
        tokio::spawn(async move {
            while watcher.joins() < 4 {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
            stopper.cancel();
        });

        runner.run(token).await.unwrap();
        assert_eq!(group.joins(), 4);
        assert_eq!(runner.state(), RunnerState::Stopped);
    }

    #[tokio::test]
    async fn config_error_is_fatal() {
        let group = Arc::new(ScriptedGroup::new(vec![Err(BrokerError::config(
            "unknown topic",
        ))]));
        let runner = GroupRunner::new(group.clone(), vec!["t".into()], Arc::new(Noop), config());

        let err = runner.run(CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, GroupError::Fatal { ref source, .. } if source.is_fatal()));
        assert_eq!(group.joins(), 1);
        assert_eq!(runner.state(), RunnerState::Stopped);
    }

    #[tokio::test]
    async fn cancelled_token_never_joins() {
        let group = Arc::new(ScriptedGroup::new(vec![]));
        let runner = GroupRunner::new(group.clone(), vec!["t".into()], Arc::new(Noop), config());
        let token = CancellationToken::new();
        token.cancel();

        runner.run(token).await.unwrap();
        assert_eq!(group.joins(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_interrupts_backoff() {
        let group = Arc::new(ScriptedGroup::new(vec![Err(BrokerError::connectivity("down"))]));
        let cfg = ConsumerConfig {
            rejoin_backoff_min_ms: 60_000,
            rejoin_backoff_max_ms: 60_000,
            ..ConsumerConfig::default()
        };
        let runner = GroupRunner::new(group.clone(), vec!["t".into()], Arc::new(Noop), cfg);
        let mut states = runner.subscribe();
        let token = CancellationToken::new();

        let stopper = token.clone();
        tokio::spawn(async move {
            states.wait_for(|s| *s == RunnerState::Rejoining).await.unwrap();
            stopper.cancel();
        });

        runner.run(token).await.unwrap();
        assert_eq!(group.joins(), 1);
    }
}
