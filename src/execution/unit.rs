//! # Worker Execution Unit
//!
//! One long-lived execution context per dedicated worker. The unit owns its
//! logic instance, a bounded inbox and a cancellation token, and runs a single
//! loop task that processes messages one at a time in arrival order.
//!
//! ## State
//!
//! ```text
//! Created ──start──→ Running ──stop──→ StopRequested ──loop exits──→ Stopped
//!    └────────────────────stop──────────────────────────────────────────┘
//! ```
//!
//! State lives in a `watch` channel so transitions are atomic and observers can
//! await `Stopped` without polling. Cancellation is cooperative: the loop checks
//! the token between messages, never in the middle of one.

use futures::FutureExt;
use parking_lot::Mutex;
use serde::Serialize;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::error::{ExecutionError, ExecutionResult};
use super::logic::WorkerLogic;
use super::state::ExecutionState;
use crate::messaging::InboundMessage;
use crate::worker::WorkerIdentity;

/// Result of handing a message to a unit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalOutcome {
    /// Queued for the loop
    Accepted,
    /// The unit is not running; the message was dropped
    NotRunning(ExecutionState),
    /// The inbox is at capacity; the message was dropped
    InboxFull,
}

impl SignalOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted)
    }
}

/// Message counters of one execution context
#[derive(Debug, Default)]
pub struct ExecutionStats {
    processed: AtomicU64,
    failed: AtomicU64,
    panicked: AtomicU64,
}

/// Point-in-time copy of [`ExecutionStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ExecutionStatsSnapshot {
    pub processed: u64,
    pub failed: u64,
    pub panicked: u64,
}

impl ExecutionStats {
    pub(crate) fn record_failure(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ExecutionStatsSnapshot {
        ExecutionStatsSnapshot {
            processed: self.processed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            panicked: self.panicked.load(Ordering::Relaxed),
        }
    }
}

type PendingLoop = (mpsc::Receiver<InboundMessage>, Box<dyn WorkerLogic>);

/// Dedicated execution context of one worker
pub struct WorkerExecutionUnit {
    identity: WorkerIdentity,
    state: Arc<watch::Sender<ExecutionState>>,
    cancel: CancellationToken,
    inbox: mpsc::Sender<InboundMessage>,
    pending: Mutex<Option<PendingLoop>>,
    stats: Arc<ExecutionStats>,
}

impl std::fmt::Debug for WorkerExecutionUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerExecutionUnit")
            .field("identity", &self.identity)
            .field("state", &self.state())
            .field("stats", &self.stats.snapshot())
            .finish()
    }
}

impl WorkerExecutionUnit {
    /// Build a unit in `Created` state around its own logic instance
    pub fn new(identity: WorkerIdentity, logic: Box<dyn WorkerLogic>, inbox_capacity: usize) -> Self {
        let (inbox, receiver) = mpsc::channel(inbox_capacity.max(1));
        let (state, _) = watch::channel(ExecutionState::Created);

        Self {
            identity,
            state: Arc::new(state),
            cancel: CancellationToken::new(),
            inbox,
            pending: Mutex::new(Some((receiver, logic))),
            stats: Arc::new(ExecutionStats::default()),
        }
    }

    pub fn identity(&self) -> &WorkerIdentity {
        &self.identity
    }

    pub fn state(&self) -> ExecutionState {
        *self.state.borrow()
    }

    /// Receiver observing every state change
    pub fn subscribe(&self) -> watch::Receiver<ExecutionState> {
        self.state.subscribe()
    }

    pub fn stats(&self) -> ExecutionStatsSnapshot {
        self.stats.snapshot()
    }

    /// Start the loop. Idempotent while running; an error once stopping or stopped.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(&self) -> ExecutionResult<()> {
        let mut started = false;
        self.state.send_if_modified(|state| {
            if *state == ExecutionState::Created {
                *state = ExecutionState::Running;
                started = true;
                true
            } else {
                false
            }
        });

        if !started {
            return match self.state() {
                ExecutionState::Running => Ok(()),
                other => Err(self.invalid_transition(other, ExecutionState::Running)),
            };
        }

        let Some((inbox, logic)) = self.pending.lock().take() else {
            return Err(self.invalid_transition(ExecutionState::Running, ExecutionState::Running));
        };

        tokio::spawn(run_loop(
            self.identity.clone(),
            logic,
            inbox,
            self.cancel.clone(),
            Arc::clone(&self.state),
            Arc::clone(&self.stats),
        ));

        info!(worker_id = %self.identity, "Execution unit started");
        Ok(())
    }

    /// Request termination and return without waiting
    pub fn stop(&self) {
        let mut previous = None;
        self.state.send_if_modified(|state| match *state {
            ExecutionState::Created => {
                previous = Some(ExecutionState::Created);
                *state = ExecutionState::Stopped;
                true
            }
            ExecutionState::Running => {
                previous = Some(ExecutionState::Running);
                *state = ExecutionState::StopRequested;
                true
            }
            _ => false,
        });
        self.cancel.cancel();

        match previous {
            Some(ExecutionState::Created) => {
                self.pending.lock().take();
                debug!(worker_id = %self.identity, "Execution unit stopped before start");
            }
            Some(_) => debug!(worker_id = %self.identity, "Execution unit stop requested"),
            None => {}
        }
    }

    /// Request termination and wait until the loop has exited.
    ///
    /// A logic body that never returns delays this indefinitely; callers apply
    /// their own timeout.
    pub async fn stop_and_wait(&self) {
        self.stop();
        self.wait_stopped().await;
    }

    /// Wait until the unit reaches `Stopped`
    pub async fn wait_stopped(&self) {
        let mut receiver = self.state.subscribe();
        if receiver.wait_for(|state| state.is_terminal()).await.is_err() {
            warn!(worker_id = %self.identity, "Execution unit state channel closed");
        }
    }

    /// Hand one message to the loop without waiting for it to be processed
    pub fn signal(&self, message: InboundMessage) -> SignalOutcome {
        let state = self.state();
        if !state.accepts_messages() {
            return SignalOutcome::NotRunning(state);
        }

        match self.inbox.try_send(message) {
            Ok(()) => SignalOutcome::Accepted,
            Err(mpsc::error::TrySendError::Full(_)) => SignalOutcome::InboxFull,
            Err(mpsc::error::TrySendError::Closed(_)) => SignalOutcome::NotRunning(self.state()),
        }
    }

    fn invalid_transition(&self, from: ExecutionState, to: ExecutionState) -> ExecutionError {
        ExecutionError::InvalidTransition {
            worker_id: self.identity.to_string(),
            from,
            to,
        }
    }
}

impl Drop for WorkerExecutionUnit {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Sets `Stopped` however the loop task ends
struct StoppedGuard {
    identity: WorkerIdentity,
    state: Arc<watch::Sender<ExecutionState>>,
    stats: Arc<ExecutionStats>,
}

impl Drop for StoppedGuard {
    fn drop(&mut self) {
        self.state.send_replace(ExecutionState::Stopped);
        let stats = self.stats.snapshot();
        info!(
            worker_id = %self.identity,
            processed = stats.processed,
            failed = stats.failed,
            panicked = stats.panicked,
            "Execution unit stopped"
        );
    }
}

async fn run_loop(
    identity: WorkerIdentity,
    mut logic: Box<dyn WorkerLogic>,
    mut inbox: mpsc::Receiver<InboundMessage>,
    cancel: CancellationToken,
    state: Arc<watch::Sender<ExecutionState>>,
    stats: Arc<ExecutionStats>,
) {
    let _stopped = StoppedGuard {
        identity: identity.clone(),
        state,
        stats: Arc::clone(&stats),
    };

    loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => break,

            next = inbox.recv() => match next {
                Some(message) => {
                    execute_logic(&identity, logic.as_mut(), message, &stats).await;
                }
                None => break,
            },
        }
    }
}

/// Run one message through a logic instance, containing errors and panics
pub(crate) async fn execute_logic(
    identity: &WorkerIdentity,
    logic: &mut dyn WorkerLogic,
    message: InboundMessage,
    stats: &ExecutionStats,
) {
    let message_id = message.id.clone();
    let module = logic.name().to_string();

    match AssertUnwindSafe(logic.handle(message)).catch_unwind().await {
        Ok(Ok(())) => {
            stats.processed.fetch_add(1, Ordering::Relaxed);
            debug!(worker_id = %identity, message_id = %message_id, "Message processed");
        }
        Ok(Err(e)) => {
            stats.record_failure();
            error!(
                worker_id = %identity,
                message_id = %message_id,
                module = %module,
                error = %e,
                "Worker logic returned error"
            );
        }
        Err(panic) => {
            stats.panicked.fetch_add(1, Ordering::Relaxed);
            error!(
                worker_id = %identity,
                message_id = %message_id,
                module = %module,
                panic_msg = %panic_message(panic.as_ref()),
                "Worker logic panicked"
            );
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "Unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::time::Duration;
    use tokio::sync::Notify;

    /// Records handled message ids; panics on "panic", errors on "fail",
    /// blocks on "block" until released
    struct Recorder {
        seen: Arc<Mutex<Vec<String>>>,
        release: Arc<Notify>,
    }

    #[async_trait]
    impl WorkerLogic for Recorder {
        fn name(&self) -> &str {
            "recorder"
        }

        async fn handle(&mut self, message: InboundMessage) -> ExecutionResult<()> {
            match message.id.as_str() {
                "panic" => panic!("boom"),
                "fail" => return Err(ExecutionError::logic("failed on purpose")),
                "block" => self.release.notified().await,
                _ => {}
            }
            self.seen.lock().push(message.id);
            Ok(())
        }
    }

    fn unit_with_recorder(capacity: usize) -> (WorkerExecutionUnit, Arc<Mutex<Vec<String>>>, Arc<Notify>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let release = Arc::new(Notify::new());
        let logic = Recorder {
            seen: Arc::clone(&seen),
            release: Arc::clone(&release),
        };
        let unit = WorkerExecutionUnit::new(WorkerIdentity::new("w1").unwrap(), Box::new(logic), capacity);
        (unit, seen, release)
    }

    fn msg(id: &str) -> InboundMessage {
        InboundMessage::new(id, serde_json::Value::Null)
    }

    async fn wait_until(mut condition: impl FnMut() -> bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !condition() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    #[tokio::test]
    async fn test_signal_before_start_is_rejected() {
        let (unit, _, _) = unit_with_recorder(4);
        assert_eq!(
            unit.signal(msg("a")),
            SignalOutcome::NotRunning(ExecutionState::Created)
        );
    }

    #[tokio::test]
    async fn test_processes_in_arrival_order() {
        let (unit, seen, _) = unit_with_recorder(64);
        unit.start().unwrap();
        assert_eq!(unit.state(), ExecutionState::Running);

        for n in 0..20 {
            assert!(unit.signal(msg(&format!("m{n}"))).is_accepted());
        }
        wait_until(|| seen.lock().len() == 20).await;

        let expected: Vec<String> = (0..20).map(|n| format!("m{n}")).collect();
        assert_eq!(*seen.lock(), expected);
        assert_eq!(unit.stats().processed, 20);
    }

    #[tokio::test]
    async fn test_start_is_idempotent_while_running() {
        let (unit, _, _) = unit_with_recorder(4);
        unit.start().unwrap();
        unit.start().unwrap();
        assert_eq!(unit.state(), ExecutionState::Running);
    }

    #[tokio::test]
    async fn test_stop_and_wait_reaches_stopped() {
        let (unit, _, _) = unit_with_recorder(4);
        unit.start().unwrap();
        unit.stop_and_wait().await;

        assert_eq!(unit.state(), ExecutionState::Stopped);
        assert_eq!(
            unit.signal(msg("late")),
            SignalOutcome::NotRunning(ExecutionState::Stopped)
        );
        assert!(matches!(
            unit.start(),
            Err(ExecutionError::InvalidTransition { .. })
        ));
    }

    #[tokio::test]
    async fn test_stop_before_start_goes_straight_to_stopped() {
        let (unit, _, _) = unit_with_recorder(4);
        unit.stop();
        assert_eq!(unit.state(), ExecutionState::Stopped);
        unit.stop_and_wait().await;
    }

    #[tokio::test]
    async fn test_survives_errors_and_panics() {
        let (unit, seen, _) = unit_with_recorder(16);
        unit.start().unwrap();

        for id in ["a", "fail", "panic", "b"] {
            assert!(unit.signal(msg(id)).is_accepted());
        }
        wait_until(|| seen.lock().len() == 2).await;

        assert_eq!(*seen.lock(), vec!["a".to_string(), "b".to_string()]);
        let stats = unit.stats();
        assert_eq!(stats.processed, 2);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.panicked, 1);
        assert_eq!(unit.state(), ExecutionState::Running);
    }

    #[tokio::test]
    async fn test_full_inbox_is_reported() {
        let (unit, _, release) = unit_with_recorder(1);
        unit.start().unwrap();

        assert!(unit.signal(msg("block")).is_accepted());
        wait_until(|| unit.inbox.capacity() == 1).await;

        assert!(unit.signal(msg("queued")).is_accepted());
        assert_eq!(unit.signal(msg("overflow")), SignalOutcome::InboxFull);

        release.notify_one();
        unit.stop_and_wait().await;
    }

    #[tokio::test]
    async fn test_stop_waits_for_current_message() {
        let (unit, seen, release) = unit_with_recorder(4);
        unit.start().unwrap();
        assert!(unit.signal(msg("block")).is_accepted());
        wait_until(|| unit.inbox.capacity() == 4).await;

        unit.stop();
        assert_eq!(unit.state(), ExecutionState::StopRequested);

        release.notify_one();
        unit.wait_stopped().await;
        assert_eq!(*seen.lock(), vec!["block".to_string()]);
    }
}
