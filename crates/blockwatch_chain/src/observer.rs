//! Block-time observation.
//!
//! An [`ObserverSession`] owns the baseline (last height and when it was
//! seen) and counts height transitions until it reaches its target. A
//! [`BlockTimeObserver`] feeds the session from one of two strategies:
//!
//! - **Poll**: query the current height on a fixed timer and record a
//!   transition whenever it differs from the baseline.
//! - **Push**: subscribe to new heights and record every delivered height.
//!
//! Both strategies share the session's transition logic. A failed height
//! query leaves the session untouched, so a caller can resume it by calling
//! [`BlockTimeObserver::observe`] again.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio::task::{JoinError, JoinHandle};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::ChainError;
use crate::source::{HeightSource, HeightSubscriber};

// ---------------------------------------------------------------------------
// Records and session state
// ---------------------------------------------------------------------------

/// One observed height transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ObservationRecord {
    pub session_id: Uuid,
    pub network: String,
    /// Baseline height before this transition. `None` for the first record of
    /// a push session, which never queries an initial height.
    pub previous: Option<u64>,
    pub height: u64,
    #[serde(rename = "elapsed_ms", serialize_with = "serialize_millis")]
    pub elapsed: Duration,
    pub observed_at: DateTime<Utc>,
}

fn serialize_millis<S>(elapsed: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_u64(u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX))
}

impl ObservationRecord {
    pub fn elapsed_ms(&self) -> u128 {
        self.elapsed.as_millis()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SessionState {
    Idle,
    Running,
    /// Target transition count reached.
    Terminal,
    /// Stopped through [`ObserverHandle::cancel`] before reaching the target.
    Cancelled,
}

/// Last recorded (height, time) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Baseline {
    pub height: Option<u64>,
    pub at: Instant,
}

/// Mutable state of one observation run.
#[derive(Debug, Clone)]
pub struct ObserverSession {
    id: Uuid,
    network: String,
    target: u32,
    transitions: u32,
    state: SessionState,
    baseline: Option<Baseline>,
}

impl ObserverSession {
    /// Create an idle session that stops after `target` transitions.
    pub fn new(network: impl Into<String>, target: u32) -> Result<Self, ChainError> {
        if target == 0 {
            return Err(ChainError::InvalidConfig(
                "block count must be at least 1".into(),
            ));
        }
        Ok(Self {
            id: Uuid::new_v4(),
            network: network.into(),
            target,
            transitions: 0,
            state: SessionState::Idle,
            baseline: None,
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn network(&self) -> &str {
        &self.network
    }

    pub fn target(&self) -> u32 {
        self.target
    }

    pub fn transitions(&self) -> u32 {
        self.transitions
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn baseline(&self) -> Option<Baseline> {
        self.baseline
    }

    /// Terminal or cancelled.
    pub fn is_finished(&self) -> bool {
        matches!(self.state, SessionState::Terminal | SessionState::Cancelled)
    }

    /// Record the baseline and move from idle to running.
    pub fn start(&mut self, height: Option<u64>, now: Instant) -> Result<(), ChainError> {
        if self.state != SessionState::Idle {
            return Err(ChainError::InvalidConfig(format!(
                "session {} already started ({:?})",
                self.id, self.state
            )));
        }
        self.baseline = Some(Baseline { height, at: now });
        self.state = SessionState::Running;
        Ok(())
    }

    /// Offer a polled sample. A record is produced only when the height
    /// differs from the baseline.
    pub fn observe_sample(&mut self, height: u64, now: Instant) -> Option<ObservationRecord> {
        if self.state != SessionState::Running {
            return None;
        }
        if self.baseline?.height == Some(height) {
            return None;
        }
        self.transition(height, now)
    }

    /// Offer a pushed height. Every delivery is a transition.
    pub fn observe_push(&mut self, height: u64, now: Instant) -> Option<ObservationRecord> {
        if self.state != SessionState::Running {
            return None;
        }
        self.transition(height, now)
    }

    /// Stop a session that has not finished yet.
    pub fn cancel(&mut self) {
        if !self.is_finished() {
            self.state = SessionState::Cancelled;
        }
    }

    fn transition(&mut self, height: u64, now: Instant) -> Option<ObservationRecord> {
        let baseline = self.baseline.as_mut()?;
        let record = ObservationRecord {
            session_id: self.id,
            network: self.network.clone(),
            previous: baseline.height,
            height,
            elapsed: now.saturating_duration_since(baseline.at),
            observed_at: Utc::now(),
        };
        baseline.height = Some(height);
        baseline.at = now;

        self.transitions += 1;
        if self.transitions >= self.target {
            self.state = SessionState::Terminal;
        }
        Some(record)
    }
}

// ---------------------------------------------------------------------------
// Strategy and failure policy
// ---------------------------------------------------------------------------

/// What to do when a polled height query fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    /// Return the error to the caller on the first failure.
    #[default]
    Halt,
    /// Skip failed ticks; give up after more than `max_consecutive` in a row.
    Retry { max_consecutive: u32 },
}

impl FailurePolicy {
    /// `0` means halt.
    pub fn from_max_failures(max_consecutive: u32) -> Self {
        if max_consecutive == 0 {
            Self::Halt
        } else {
            Self::Retry { max_consecutive }
        }
    }

    fn tolerates(self, consecutive_failures: u32) -> bool {
        match self {
            Self::Halt => false,
            Self::Retry { max_consecutive } => consecutive_failures <= max_consecutive,
        }
    }
}

/// Where new heights come from.
#[derive(Clone)]
pub enum HeightFeed {
    Poll {
        source: Arc<dyn HeightSource>,
        interval: Duration,
    },
    Push {
        subscriber: Arc<dyn HeightSubscriber>,
    },
}

impl std::fmt::Debug for HeightFeed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Poll { interval, .. } => f.debug_struct("Poll").field("interval", interval).finish(),
            Self::Push { .. } => f.write_str("Push"),
        }
    }
}

// ---------------------------------------------------------------------------
// Observer
// ---------------------------------------------------------------------------

/// Drives [`ObserverSession`]s from a [`HeightFeed`].
#[derive(Debug, Clone)]
pub struct BlockTimeObserver {
    feed: HeightFeed,
    policy: FailurePolicy,
}

impl BlockTimeObserver {
    pub fn new(feed: HeightFeed, policy: FailurePolicy) -> Self {
        Self { feed, policy }
    }

    pub fn polling(source: Arc<dyn HeightSource>, interval: Duration) -> Self {
        Self::new(HeightFeed::Poll { source, interval }, FailurePolicy::Halt)
    }

    pub fn push(subscriber: Arc<dyn HeightSubscriber>) -> Self {
        Self::new(HeightFeed::Push { subscriber }, FailurePolicy::Halt)
    }

    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Run `session` until it reaches its target, calling `on_record` for
    /// every transition.
    ///
    /// Errors leave the session as it was before the failing query, so a
    /// running session can be resumed with another call.
    pub async fn observe<F>(
        &self,
        session: &mut ObserverSession,
        mut on_record: F,
    ) -> Result<(), ChainError>
    where
        F: FnMut(&ObservationRecord) + Send,
    {
        if session.is_finished() {
            return Ok(());
        }
        match &self.feed {
            HeightFeed::Poll { source, interval } => {
                self.run_poll(session, source.as_ref(), *interval, &mut on_record)
                    .await
            }
            HeightFeed::Push { subscriber } => {
                run_push(session, subscriber.as_ref(), &mut on_record).await
            }
        }
    }

    async fn run_poll<F>(
        &self,
        session: &mut ObserverSession,
        source: &dyn HeightSource,
        interval: Duration,
        on_record: &mut F,
    ) -> Result<(), ChainError>
    where
        F: FnMut(&ObservationRecord) + Send,
    {
        if interval.is_zero() {
            return Err(ChainError::InvalidConfig(
                "poll interval must be greater than zero".into(),
            ));
        }

        if session.state() == SessionState::Idle {
            let height = source.current_height().await?;
            session.start(Some(height), Instant::now())?;
            info!(network = %session.network(), height, "Current block");
        }

        // First tick one period after start; dropping the interval stops it.
        let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut failures = 0u32;

        while session.state() == SessionState::Running {
            ticker.tick().await;
            match source.current_height().await {
                Ok(height) => {
                    failures = 0;
                    if let Some(record) = session.observe_sample(height, Instant::now()) {
                        emit(&record, on_record);
                    }
                }
                Err(e) => {
                    failures += 1;
                    if !self.policy.tolerates(failures) {
                        return Err(e);
                    }
                    warn!(
                        network = %session.network(),
                        failures,
                        "Height query failed, retrying on next tick: {e}"
                    );
                }
            }
        }
        debug!(network = %session.network(), "poll timer stopped");
        Ok(())
    }

    /// Run `session` on its own task.
    ///
    /// Records are forwarded through the returned handle. Cancelling or
    /// dropping the handle stops the session and releases its timer or
    /// subscription.
    pub fn spawn(self, mut session: ObserverSession) -> ObserverHandle {
        let (record_tx, record_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        let task = tokio::spawn(async move {
            let result = tokio::select! {
                res = self.observe(&mut session, |record| {
                    let _ = record_tx.send(record.clone());
                }) => res,
                _ = shutdown_rx => Err(ChainError::Cancelled),
            };
            if matches!(result, Err(ChainError::Cancelled)) {
                session.cancel();
                info!(network = %session.network(), session = %session.id(), "Observer cancelled");
            }
            SessionOutcome { session, result }
        });

        ObserverHandle {
            records: record_rx,
            shutdown: Some(shutdown_tx),
            task,
        }
    }
}

async fn run_push<F>(
    session: &mut ObserverSession,
    subscriber: &dyn HeightSubscriber,
    on_record: &mut F,
) -> Result<(), ChainError>
where
    F: FnMut(&ObservationRecord) + Send,
{
    let mut subscription = subscriber.subscribe().await?;
    if session.state() == SessionState::Idle {
        session.start(None, Instant::now())?;
    }

    while session.state() == SessionState::Running {
        match subscription.next().await {
            Some(Ok(height)) => {
                if let Some(record) = session.observe_push(height, Instant::now()) {
                    emit(&record, on_record);
                }
            }
            Some(Err(e)) => {
                subscription.unsubscribe().await;
                return Err(e);
            }
            None => {
                subscription.unsubscribe().await;
                return Err(ChainError::Subscription(
                    "height subscription ended".into(),
                ));
            }
        }
    }
    subscription.unsubscribe().await;
    debug!(network = %session.network(), "subscription removed");
    Ok(())
}

fn emit<F>(record: &ObservationRecord, on_record: &mut F)
where
    F: FnMut(&ObservationRecord),
{
    info!(
        network = %record.network,
        height = record.height,
        elapsed_ms = record.elapsed_ms() as u64,
        "New block"
    );
    on_record(record);
}

// ---------------------------------------------------------------------------
// Spawned sessions
// ---------------------------------------------------------------------------

/// Final state of a spawned session.
#[derive(Debug)]
pub struct SessionOutcome {
    pub session: ObserverSession,
    pub result: Result<(), ChainError>,
}

/// Handle to a session running on its own task.
pub struct ObserverHandle {
    records: mpsc::UnboundedReceiver<ObservationRecord>,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<SessionOutcome>,
}

impl ObserverHandle {
    /// Next record, or `None` once the session has stopped and all records
    /// were drained.
    pub async fn next_record(&mut self) -> Option<ObservationRecord> {
        self.records.recv().await
    }

    /// Request cancellation. Has no effect on a session that already ended.
    pub fn cancel(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
    }

    /// Wait for the session task to finish.
    pub async fn join(self) -> Result<SessionOutcome, JoinError> {
        let ObserverHandle {
            records: _records,
            shutdown: _shutdown,
            task,
        } = self;
        task.await
    }
}
