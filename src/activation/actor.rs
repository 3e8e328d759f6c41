//! Per-key activation: a turn loop over a bounded mailbox plus the background
//! task it owns.
//!
//! Pings and deactivation requests are processed one at a time by the turn
//! loop, so the activation's own fields need no locking. The background task is
//! the only concurrent party and it is reached solely through the cancellation
//! token.

use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::activation::policy::IdleEvictionPolicy;
use crate::activation::state::{ActivationInfo, ActivationState, DeactivationReason};
use crate::activation::task::{Heartbeat, run_background_task};
use crate::clock::Clock;
use crate::directory::DeactivationListener;
use crate::error::{ActivationError, HeartbeatError};

/// Everything an activation needs from its host.
#[derive(Clone)]
pub struct ActivationDeps {
    pub clock: Arc<dyn Clock>,
    pub policy: IdleEvictionPolicy,
    pub heartbeat: Arc<dyn Heartbeat>,
    pub heartbeat_interval: Duration,
    pub mailbox_capacity: usize,
    /// Notified once the drain completes, if it is still alive by then.
    pub listener: Weak<dyn DeactivationListener>,
}

/// How the background task ended during a drain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DrainOutcome {
    /// The task observed cancellation and returned normally.
    Clean,
    /// The task had already stopped on a heartbeat failure.
    HeartbeatFailed(HeartbeatError),
    /// The task panicked or was aborted.
    Aborted(String),
}

impl DrainOutcome {
    fn from_join(result: Result<Result<(), HeartbeatError>, JoinError>) -> Self {
        match result {
            Ok(Ok(())) => Self::Clean,
            Ok(Err(e)) => Self::HeartbeatFailed(e),
            Err(e) => Self::Aborted(e.to_string()),
        }
    }

    pub fn is_clean(&self) -> bool {
        matches!(self, Self::Clean)
    }
}

enum Command {
    Ping { reply: oneshot::Sender<()> },
    Deactivate { reason: DeactivationReason },
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ping { .. } => f.write_str("Ping"),
            Self::Deactivate { reason } => write!(f, "Deactivate({reason})"),
        }
    }
}

/// Cloneable handle to a running activation.
#[derive(Debug, Clone)]
pub struct ActivationHandle {
    key: Arc<str>,
    id: Uuid,
    created_at: DateTime<Utc>,
    mailbox: mpsc::Sender<Command>,
    state: watch::Receiver<ActivationState>,
    drain: Arc<OnceLock<DrainOutcome>>,
}

impl ActivationHandle {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn state(&self) -> ActivationState {
        *self.state.borrow()
    }

    /// Outcome of the drain, once the activation has terminated.
    pub fn drain_outcome(&self) -> Option<DrainOutcome> {
        self.drain.get().cloned()
    }

    pub fn info(&self) -> ActivationInfo {
        ActivationInfo {
            key: self.key.to_string(),
            id: self.id,
            created_at: self.created_at,
            state: self.state(),
        }
    }

    /// Keep-alive. Resolves when the ping's turn has run; an eviction it
    /// triggers is not awaited.
    pub async fn ping(&self) -> Result<(), ActivationError> {
        let (reply, done) = oneshot::channel();
        self.mailbox
            .send(Command::Ping { reply })
            .await
            .map_err(|_| self.terminated_error())?;
        done.await.map_err(|_| self.terminated_error())
    }

    /// Request deactivation and wait for the drain to finish.
    ///
    /// Safe to call repeatedly or concurrently: every caller waits on the same
    /// drain.
    pub async fn deactivate(&self, reason: DeactivationReason) {
        // A closed mailbox means a drain already ran or is running.
        let _ = self.mailbox.send(Command::Deactivate { reason }).await;
        self.terminated().await;
    }

    /// Wait until the activation reaches `Terminated`, or until its turn loop
    /// is gone without getting there.
    pub async fn terminated(&self) {
        let mut state = self.state.clone();
        if state.wait_for(|s| s.is_terminal()).await.is_err() {
            warn!(
                key = %self.key,
                activation_id = %self.id,
                state = %self.state(),
                "Turn loop exited before reaching Terminated"
            );
        }
    }

    /// True once the turn loop has stopped taking commands.
    pub fn is_closed(&self) -> bool {
        self.mailbox.is_closed()
    }

    fn terminated_error(&self) -> ActivationError {
        ActivationError::Terminated {
            key: self.key.to_string(),
        }
    }
}

/// Turn-loop side of an activation.
pub struct Activation {
    key: Arc<str>,
    id: Uuid,
    created_at: DateTime<Utc>,
    clock: Arc<dyn Clock>,
    policy: IdleEvictionPolicy,
    cancel: Option<CancellationToken>,
    task: Option<JoinHandle<Result<(), HeartbeatError>>>,
    state: watch::Sender<ActivationState>,
    drain: Arc<OnceLock<DrainOutcome>>,
    listener: Weak<dyn DeactivationListener>,
}

impl Activation {
    /// Start an activation for `key` and return its handle without waiting
    /// for the first heartbeat.
    pub fn activate(key: impl Into<String>, deps: ActivationDeps) -> ActivationHandle {
        let key: Arc<str> = Arc::from(key.into());
        let id = Uuid::new_v4();
        let created_at = deps.clock.now();
        let (state_tx, state_rx) = watch::channel(ActivationState::Activating);
        let (mailbox_tx, mailbox_rx) = mpsc::channel(deps.mailbox_capacity.max(1));
        let drain = Arc::new(OnceLock::new());

        let cancel = CancellationToken::new();
        let task = tokio::spawn(run_background_task(
            key.to_string(),
            Arc::clone(&deps.heartbeat),
            deps.heartbeat_interval,
            cancel.clone(),
        ));

        let activation = Activation {
            key: Arc::clone(&key),
            id,
            created_at,
            clock: deps.clock,
            policy: deps.policy,
            cancel: Some(cancel),
            task: Some(task),
            state: state_tx,
            drain: Arc::clone(&drain),
            listener: deps.listener,
        };
        activation.transition(ActivationState::Active);
        tokio::spawn(activation.run(mailbox_rx));

        info!(key = %key, activation_id = %id, created_at = %created_at, "Activated");

        ActivationHandle {
            key,
            id,
            created_at,
            mailbox: mailbox_tx,
            state: state_rx,
            drain,
        }
    }

    async fn run(mut self, mut mailbox: mpsc::Receiver<Command>) {
        while let Some(command) = mailbox.recv().await {
            debug!(key = %self.key, activation_id = %self.id, ?command, "Turn");

            let draining = match command {
                Command::Ping { reply } => {
                    // Leave `Active` before the caller hears back, so nobody
                    // resolves this activation after its evicting ping.
                    let draining = self
                        .on_ping()
                        .is_some_and(|reason| self.begin_drain(&reason));
                    let _ = reply.send(());
                    draining
                }
                Command::Deactivate { reason } => self.begin_drain(&reason),
            };

            if draining {
                self.finish_drain().await;
                Self::settle(&mut mailbox);
                return;
            }
        }

        if self.begin_drain(&DeactivationReason::Abandoned) {
            self.finish_drain().await;
        }
    }

    /// Answer whatever queued up behind the drain. Pings succeed; repeated
    /// deactivation requests are already satisfied.
    fn settle(mailbox: &mut mpsc::Receiver<Command>) {
        mailbox.close();
        while let Ok(command) = mailbox.try_recv() {
            if let Command::Ping { reply } = command {
                let _ = reply.send(());
            }
        }
    }

    fn on_ping(&self) -> Option<DeactivationReason> {
        let decision = self.policy.evaluate(self.created_at, self.clock.now());
        if let Some(reason) = &decision {
            info!(
                key = %self.key,
                activation_id = %self.id,
                %reason,
                "Idle threshold exceeded, requesting deactivation"
            );
        }
        decision
    }

    /// Move to `Deactivating` and signal cancellation. Returns false if a
    /// drain already started.
    fn begin_drain(&self, reason: &DeactivationReason) -> bool {
        if !self.state.borrow().is_serving() {
            return false;
        }
        self.transition(ActivationState::Deactivating);
        info!(key = %self.key, activation_id = %self.id, %reason, "Deactivating");

        if let Some(cancel) = &self.cancel {
            cancel.cancel();
        }
        true
    }

    /// Wait for the background task, release the token, notify the listener,
    /// and only then publish `Terminated`.
    async fn finish_drain(&mut self) {
        let outcome = match self.task.take() {
            Some(task) => DrainOutcome::from_join(task.await),
            None => DrainOutcome::Clean,
        };
        drop(self.cancel.take());

        match &outcome {
            DrainOutcome::Clean => {
                debug!(key = %self.key, activation_id = %self.id, "Background task drained")
            }
            DrainOutcome::HeartbeatFailed(e) => warn!(
                key = %self.key,
                activation_id = %self.id,
                error = %e,
                "Background task had stopped on a heartbeat failure"
            ),
            DrainOutcome::Aborted(e) => error!(
                key = %self.key,
                activation_id = %self.id,
                error = %e,
                "Background task did not shut down cleanly"
            ),
        }
        let _ = self.drain.set(outcome);

        if let Some(listener) = self.listener.upgrade() {
            listener.on_deactivated(&self.key, self.id).await;
        }
        self.transition(ActivationState::Terminated);
        info!(key = %self.key, activation_id = %self.id, "Deactivated");
    }

    fn transition(&self, target: ActivationState) {
        self.state.send_if_modified(|current| {
            if current.can_transition_to(target) {
                *current = target;
                true
            } else {
                warn!(
                    key = %self.key,
                    from = %current,
                    to = %target,
                    "Ignoring invalid activation transition"
                );
                false
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU64, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::clock::ManualClock;

    #[derive(Default)]
    struct RecordingListener {
        calls: Mutex<Vec<(String, Uuid)>>,
    }

    #[async_trait]
    impl DeactivationListener for RecordingListener {
        async fn on_deactivated(&self, key: &str, id: Uuid) {
            self.calls.lock().unwrap().push((key.to_string(), id));
        }
    }

    #[derive(Default)]
    struct CountingHeartbeat {
        beats: AtomicU64,
        fail: bool,
    }

    #[async_trait]
    impl Heartbeat for CountingHeartbeat {
        async fn beat(&self, key: &str, _tick: u64) -> Result<(), HeartbeatError> {
            self.beats.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(HeartbeatError::Failed {
                    key: key.to_string(),
                    reason: "sink closed".to_string(),
                });
            }
            Ok(())
        }
    }

    struct Fixture {
        clock: ManualClock,
        listener: Arc<RecordingListener>,
        heartbeat: Arc<CountingHeartbeat>,
    }

    impl Fixture {
        fn new() -> Self {
            Self::with_heartbeat(CountingHeartbeat::default())
        }

        fn with_heartbeat(heartbeat: CountingHeartbeat) -> Self {
            Self {
                clock: ManualClock::at_epoch(),
                listener: Arc::new(RecordingListener::default()),
                heartbeat: Arc::new(heartbeat),
            }
        }

        fn deps(&self) -> ActivationDeps {
            let listener: Weak<RecordingListener> = Arc::downgrade(&self.listener);
            ActivationDeps {
                clock: Arc::new(self.clock.clone()),
                policy: IdleEvictionPolicy::new(Duration::from_secs(60)),
                heartbeat: self.heartbeat.clone(),
                heartbeat_interval: Duration::from_secs(1),
                mailbox_capacity: 8,
                listener,
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn activate_is_immediately_active() {
        let fx = Fixture::new();
        fx.clock.set_secs(42);
        let handle = Activation::activate("1", fx.deps());

        assert_eq!(handle.state(), ActivationState::Active);
        assert_eq!(handle.created_at().timestamp(), 42);
        assert_eq!(handle.key(), "1");
        handle.deactivate(DeactivationReason::HostShutdown).await;
    }

    #[tokio::test(start_paused = true)]
    async fn ping_below_threshold_keeps_activation() {
        let fx = Fixture::new();
        let handle = Activation::activate("1", fx.deps());

        for secs in 1..=60 {
            fx.clock.set_secs(secs);
            handle.ping().await.unwrap();
        }

        assert_eq!(handle.state(), ActivationState::Active);
        assert!(fx.listener.calls.lock().unwrap().is_empty());
        handle.deactivate(DeactivationReason::HostShutdown).await;
    }

    #[tokio::test(start_paused = true)]
    async fn ping_past_threshold_evicts_without_blocking() {
        let fx = Fixture::new();
        let handle = Activation::activate("1", fx.deps());

        fx.clock.set_secs(61);
        handle.ping().await.unwrap();
        handle.terminated().await;

        assert_eq!(handle.state(), ActivationState::Terminated);
        assert_eq!(handle.drain_outcome(), Some(DrainOutcome::Clean));
        assert_eq!(
            *fx.listener.calls.lock().unwrap(),
            vec![("1".to_string(), handle.id())]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_pings_past_threshold_both_succeed() {
        let fx = Fixture::new();
        let handle = Activation::activate("1", fx.deps());

        fx.clock.set_secs(61);
        let (a, b) = tokio::join!(handle.ping(), handle.ping());
        assert_eq!(a, Ok(()));
        assert_eq!(b, Ok(()));

        handle.terminated().await;
        assert_eq!(fx.listener.calls.lock().unwrap().len(), 1);
        assert!(handle.is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn evicting_ping_returns_after_leaving_active() {
        let fx = Fixture::new();
        let handle = Activation::activate("1", fx.deps());

        fx.clock.set_secs(61);
        handle.ping().await.unwrap();

        assert_ne!(handle.state(), ActivationState::Active);
        handle.terminated().await;
        assert_eq!(handle.state(), ActivationState::Terminated);
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_listener_is_skipped() {
        let fx = Fixture::new();
        let handle = Activation::activate("1", fx.deps());
        drop(fx);

        handle.deactivate(DeactivationReason::HostShutdown).await;
        assert_eq!(handle.state(), ActivationState::Terminated);
        assert_eq!(handle.drain_outcome(), Some(DrainOutcome::Clean));
    }

    #[tokio::test(start_paused = true)]
    async fn unpinged_activation_never_evicts() {
        let fx = Fixture::new();
        let handle = Activation::activate("1", fx.deps());

        fx.clock.set_secs(86_400);
        tokio::time::sleep(Duration::from_secs(120)).await;

        assert_eq!(handle.state(), ActivationState::Active);
        handle.deactivate(DeactivationReason::HostShutdown).await;
    }

    #[tokio::test(start_paused = true)]
    async fn no_heartbeat_after_drain() {
        let fx = Fixture::new();
        let handle = Activation::activate("1", fx.deps());

        tokio::time::sleep(Duration::from_millis(2_500)).await;
        handle
            .deactivate(DeactivationReason::requested("test"))
            .await;
        let beats = fx.heartbeat.beats.load(Ordering::SeqCst);
        assert_eq!(beats, 3);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(fx.heartbeat.beats.load(Ordering::SeqCst), beats);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_deactivate_drains_once() {
        let fx = Fixture::new();
        let handle = Activation::activate("1", fx.deps());

        let a = handle.clone();
        let b = handle.clone();
        tokio::join!(
            a.deactivate(DeactivationReason::requested("a")),
            b.deactivate(DeactivationReason::requested("b")),
        );
        handle.deactivate(DeactivationReason::requested("late")).await;

        assert_eq!(handle.state(), ActivationState::Terminated);
        assert_eq!(fx.listener.calls.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn ping_after_termination_fails() {
        let fx = Fixture::new();
        let handle = Activation::activate("1", fx.deps());
        handle.deactivate(DeactivationReason::HostShutdown).await;

        let err = handle.ping().await.unwrap_err();
        assert_eq!(
            err,
            ActivationError::Terminated {
                key: "1".to_string()
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn heartbeat_failure_is_recorded_at_drain() {
        let fx = Fixture::with_heartbeat(CountingHeartbeat {
            fail: true,
            ..Default::default()
        });
        let handle = Activation::activate("1", fx.deps());

        tokio::time::sleep(Duration::from_secs(3)).await;
        handle.deactivate(DeactivationReason::HostShutdown).await;

        assert_eq!(fx.heartbeat.beats.load(Ordering::SeqCst), 1);
        assert!(matches!(
            handle.drain_outcome(),
            Some(DrainOutcome::HeartbeatFailed(_))
        ));
        assert_eq!(fx.listener.calls.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_every_handle_drains() {
        let fx = Fixture::new();
        let handle = Activation::activate("1", fx.deps());
        let watcher = handle.state.clone();
        drop(handle);

        let mut watcher = watcher;
        watcher.wait_for(|s| s.is_terminal()).await.unwrap();
        assert_eq!(fx.listener.calls.lock().unwrap().len(), 1);
    }
}
