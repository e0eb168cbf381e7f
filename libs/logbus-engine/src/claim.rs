//! Claim Loop: processes one partition claim inside a group session.
//!
//! Per message: `Running → Processing → Acknowledged → Running`. The loop
//! terminates on session done or claim close. Session done always wins a
//! race with a ready message, and no message is acknowledged once done fired.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};

use logbus_api::{BrokerError, Claim, ClaimExit, ClaimHandler, ClaimedMessage, GroupSession};

/// Application logic applied to each claimed message.
pub trait MessageProcessor: Send + Sync {
    fn process<'a>(
        &'a self,
        msg: &'a ClaimedMessage,
    ) -> Pin<Box<dyn Future<Output = Result<(), BrokerError>> + Send + 'a>>;
}

/// Acknowledged-message counter shared by all claims of one handler.
#[derive(Debug)]
pub struct Progress {
    name: String,
    every: u64,
    count: AtomicU64,
}

impl Progress {
    pub fn new(name: impl Into<String>, every: u64) -> Self {
        Self {
            name: name.into(),
            every: every.max(1),
            count: AtomicU64::new(0),
        }
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    fn record(&self) {
        let n = self.count.fetch_add(1, Ordering::Relaxed) + 1;
        if n % self.every == 0 {
            tracing::info!(name = %self.name, consumed = n, "consume progress");
        }
    }
}

/// Run the claim loop until the session is done or the claim closes.
///
/// A processor error ends the loop with that error; the failing message is
/// not acknowledged.
pub async fn consume_claim(
    session: &dyn GroupSession,
    claim: &mut dyn Claim,
    processor: &dyn MessageProcessor,
    progress: &Progress,
) -> Result<ClaimExit, BrokerError> {
    let done = session.done();
    loop {
        if done.is_cancelled() {
            return Ok(ClaimExit::SessionDone);
        }

        let msg = tokio::select! {
            biased;
            _ = done.cancelled() => return Ok(ClaimExit::SessionDone),
            next = claim.recv() => match next {
                Some(msg) => msg,
                None => return Ok(ClaimExit::ClaimClosed),
            },
        };

        processor.process(&msg).await?;

        if done.is_cancelled() {
            tracing::debug!(
                topic = %msg.topic,
                partition = msg.partition,
                offset = msg.offset,
                "session done during processing, message left unacknowledged"
            );
            return Ok(ClaimExit::SessionDone);
        }

        session.mark_message(&msg, "");
        progress.record();
    }
}

/// [`ClaimHandler`] running [`consume_claim`] for every assigned partition.
pub struct ClaimLoop<P> {
    processor: P,
    progress: Progress,
}

impl<P: MessageProcessor> ClaimLoop<P> {
    pub fn new(name: impl Into<String>, progress_every: u64, processor: P) -> Self {
        Self {
            processor,
            progress: Progress::new(name, progress_every),
        }
    }

    pub fn progress(&self) -> &Progress {
        &self.progress
    }
}

impl<P: MessageProcessor> ClaimHandler for ClaimLoop<P> {
    fn setup<'a>(
        &'a self,
        session: &'a dyn GroupSession,
    ) -> Pin<Box<dyn Future<Output = Result<(), BrokerError>> + Send + 'a>> {
        Box::pin(async move {
            tracing::info!(
                name = %self.progress.name,
                member = session.member_id(),
                generation = session.generation_id(),
                "session started"
            );
            Ok(())
        })
    }

    fn cleanup<'a>(
        &'a self,
        session: &'a dyn GroupSession,
    ) -> Pin<Box<dyn Future<Output = Result<(), BrokerError>> + Send + 'a>> {
        Box::pin(async move {
            tracing::info!(
                name = %self.progress.name,
                generation = session.generation_id(),
                consumed = self.progress.count(),
                "session ended"
            );
            Ok(())
        })
    }

    fn consume_claim<'a>(
        &'a self,
        session: &'a dyn GroupSession,
        claim: &'a mut dyn Claim,
    ) -> Pin<Box<dyn Future<Output = Result<ClaimExit, BrokerError>> + Send + 'a>> {
        Box::pin(async move {
            let topic = claim.topic().to_string();
            let partition = claim.partition();
            tracing::debug!(%topic, partition, offset = claim.initial_offset(), "claim started");
            let exit = consume_claim(session, claim, &self.processor, &self.progress).await?;
            tracing::debug!(%topic, partition, ?exit, "claim finished");
            Ok(exit)
        })
    }
}

/// Logs every message and succeeds.
pub struct LogProcessor {
    name: String,
}

impl LogProcessor {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl MessageProcessor for LogProcessor {
    fn process<'a>(
        &'a self,
        msg: &'a ClaimedMessage,
    ) -> Pin<Box<dyn Future<Output = Result<(), BrokerError>> + Send + 'a>> {
        Box::pin(async move {
            tracing::info!(
                name = %self.name,
                topic = %msg.topic,
                partition = msg.partition,
                offset = msg.offset,
                value = %String::from_utf8_lossy(&msg.payload),
                "consumed"
            );
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use logbus_api::Headers;
    use tokio_util::sync::CancellationToken;

    use super::*;

    struct ScriptedClaim {
        messages: VecDeque<ClaimedMessage>,
        /// Keep the claim open after the script ran out.
        hang: bool,
    }

    impl Claim for ScriptedClaim {
        fn topic(&self) -> &str {
            "orders"
        }
        fn partition(&self) -> i32 {
            0
        }
        fn initial_offset(&self) -> i64 {
            0
        }
        fn recv(&mut self) -> Pin<Box<dyn Future<Output = Option<ClaimedMessage>> + Send + '_>> {
            Box::pin(async move {
                match self.messages.pop_front() {
                    Some(m) => Some(m),
                    None if self.hang => std::future::pending().await,
                    None => None,
                }
            })
        }
    }

    #[derive(Default)]
    struct RecordingSession {
        done: CancellationToken,
        marked: Mutex<Vec<i64>>,
    }

    impl GroupSession for RecordingSession {
        fn member_id(&self) -> &str {
            "member-1"
        }
        fn generation_id(&self) -> i32 {
            1
        }
        fn mark_message(&self, msg: &ClaimedMessage, _metadata: &str) {
            self.marked.lock().unwrap().push(msg.offset);
        }
        fn done(&self) -> &CancellationToken {
            &self.done
        }
    }

    /// Cancels the session while processing `cancel_at`; fails on `fail_at`.
    struct ScriptedProcessor<'s> {
        session: &'s RecordingSession,
        cancel_at: Option<i64>,
        fail_at: Option<i64>,
    }

    impl MessageProcessor for ScriptedProcessor<'_> {
        fn process<'a>(
            &'a self,
            msg: &'a ClaimedMessage,
        ) -> Pin<Box<dyn Future<Output = Result<(), BrokerError>> + Send + 'a>> {
            Box::pin(async move {
                if self.cancel_at == Some(msg.offset) {
                    self.session.done.cancel();
                }
                if self.fail_at == Some(msg.offset) {
                    return Err(BrokerError::logic("bad message"));
                }
                Ok(())
            })
        }
    }

    fn messages(n: i64) -> VecDeque<ClaimedMessage> {
        (0..n)
            .map(|offset| ClaimedMessage {
                topic: "orders".into(),
                partition: 0,
                offset,
                key: None,
                payload: format!("m{offset}").into_bytes(),
                headers: Headers::new(),
                timestamp_ms: 0,
            })
            .collect()
    }

    #[tokio::test]
    async fn acknowledges_in_receive_order_until_closed() {
        let session = RecordingSession::default();
        let mut claim = ScriptedClaim { messages: messages(5), hang: false };
        let processor = ScriptedProcessor { session: &session, cancel_at: None, fail_at: None };
        let progress = Progress::new("c", 2);

        let exit = consume_claim(&session, &mut claim, &processor, &progress).await.unwrap();

        assert_eq!(exit, ClaimExit::ClaimClosed);
        assert_eq!(*session.marked.lock().unwrap(), vec![0, 1, 2, 3, 4]);
        assert_eq!(progress.count(), 5);
    }

    #[tokio::test]
    async fn nothing_acknowledged_after_done() {
        let session = RecordingSession::default();
        let mut claim = ScriptedClaim { messages: messages(5), hang: true };
        let processor = ScriptedProcessor { session: &session, cancel_at: Some(2), fail_at: None };
        let progress = Progress::new("c", 100);

        let exit = consume_claim(&session, &mut claim, &processor, &progress).await.unwrap();

        assert_eq!(exit, ClaimExit::SessionDone);
        assert_eq!(*session.marked.lock().unwrap(), vec![0, 1]);
        // Messages 3 and 4 were never received.
        assert_eq!(claim.messages.len(), 2);
    }

    #[tokio::test]
    async fn done_before_start_receives_nothing() {
        let session = RecordingSession::default();
        session.done.cancel();
        let mut claim = ScriptedClaim { messages: messages(3), hang: false };
        let processor = ScriptedProcessor { session: &session, cancel_at: None, fail_at: None };

        let exit = consume_claim(&session, &mut claim, &processor, &Progress::new("c", 1))
            .await
            .unwrap();

        assert_eq!(exit, ClaimExit::SessionDone);
        assert_eq!(claim.messages.len(), 3);
        assert!(session.marked.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn processor_error_stops_without_ack() {
        let session = RecordingSession::default();
        let mut claim = ScriptedClaim { messages: messages(4), hang: false };
        let processor = ScriptedProcessor { session: &session, cancel_at: None, fail_at: Some(1) };

        let err = consume_claim(&session, &mut claim, &processor, &Progress::new("c", 1))
            .await
            .unwrap_err();

        assert_eq!(err.message, "bad message");
        assert_eq!(*session.marked.lock().unwrap(), vec![0]);
    }

    #[tokio::test]
    async fn idle_claim_ends_when_session_is_done() {
        let session = std::sync::Arc::new(RecordingSession::default());
        let mut claim = ScriptedClaim { messages: VecDeque::new(), hang: true };
        let handler = ClaimLoop::new("c", 10, LogProcessor::new("c"));

        let canceller = session.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            canceller.done.cancel();
        });

        let exit = handler.consume_claim(session.as_ref(), &mut claim).await.unwrap();
        assert_eq!(exit, ClaimExit::SessionDone);
        assert_eq!(handler.progress().count(), 0);
    }
}
