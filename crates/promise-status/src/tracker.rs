//! Promise status tracker
//!
//! Tracks one operation at a time and derives the snapshot an owner should
//! render. Each tracked operation runs in its own *cycle*: a generation
//! number, an event channel, and the timer and settlement tasks feeding it.
//! Replacing the operation or disposing the tracker drops the cycle, which
//! aborts its tasks and closes its channel, so nothing produced for an old
//! operation can reach the tracker again.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::config::TrackerConfig;
use crate::error::{Error, Result};
use crate::metrics::TrackerMetrics;
use crate::operation::{OperationId, Payload, TrackedOperation};
use crate::status::{Phase, Snapshot, StatusSnapshot};

/// Monotonic cycle counter
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Generation(u64);

impl Generation {
    fn next(self) -> Self {
        Generation(self.0 + 1)
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TimerKind {
    Reveal,
    Reset,
}

enum EventKind<T, E> {
    /// Timer fired; carries the ticket it was armed with
    Timer(TimerKind, u64),
    Settled(std::result::Result<T, E>),
}

/// Event tagged with the cycle it was created for
struct CycleEvent<T, E> {
    generation: Generation,
    operation: OperationId,
    kind: EventKind<T, E>,
}

/// Aborts the task when dropped.
struct TaskGuard(JoinHandle<()>);

impl Drop for TaskGuard {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// A running timer. Only an event carrying the same ticket may disarm it, so
/// a timer that fired just before being cancelled or replaced is ignored.
struct Armed {
    ticket: u64,
    _task: TaskGuard,
}

fn disarm(slot: &mut Option<Armed>, ticket: u64) -> bool {
    if slot.as_ref().map(|armed| armed.ticket) == Some(ticket) {
        *slot = None;
        true
    } else {
        false
    }
}

struct Cycle<T, E> {
    generation: Generation,
    operation: TrackedOperation<T, E>,
    phase: Phase,
    /// Whether a pending phase is visible yet
    revealed: bool,
    outcome: Option<std::result::Result<T, E>>,
    events_tx: mpsc::UnboundedSender<CycleEvent<T, E>>,
    events: mpsc::UnboundedReceiver<CycleEvent<T, E>>,
    /// Events received ahead of the one being processed
    backlog: VecDeque<CycleEvent<T, E>>,
    subscription: Option<TaskGuard>,
    reveal: Option<Armed>,
    reset: Option<Armed>,
    next_ticket: u64,
}

impl<T, E> Cycle<T, E> {
    fn is_busy(&self) -> bool {
        !self.backlog.is_empty()
            || self.subscription.is_some()
            || self.reveal.is_some()
            || self.reset.is_some()
    }

    /// Pull everything already delivered into the backlog and report whether
    /// a settlement is among it.
    fn settlement_queued(&mut self) -> bool {
        while let Ok(event) = self.events.try_recv() {
            self.backlog.push_back(event);
        }
        self.backlog
            .iter()
            .any(|event| matches!(event.kind, EventKind::Settled(_)))
    }

    fn is_current(&self, event: &CycleEvent<T, E>) -> bool {
        event.generation == self.generation && event.operation == self.operation.id()
    }
}

impl<T: Payload, E: Payload> Cycle<T, E> {
    fn start(generation: Generation, operation: &TrackedOperation<T, E>, delay: Option<Duration>) -> Self {
        let (events_tx, events) = mpsc::unbounded_channel();
        let mut cycle = Self {
            generation,
            operation: operation.clone(),
            phase: Phase::Pending,
            revealed: delay.is_none(),
            outcome: None,
            events_tx,
            events,
            backlog: VecDeque::new(),
            subscription: None,
            reveal: None,
            reset: None,
            next_ticket: 0,
        };
        cycle.subscription = Some(cycle.subscribe());
        if let Some(delay) = delay {
            cycle.reveal = Some(cycle.arm(TimerKind::Reveal, delay));
        }
        cycle
    }

    fn subscribe(&self) -> TaskGuard {
        let tx = self.events_tx.clone();
        let generation = self.generation;
        let operation = self.operation.id();
        let settlement = self.operation.settlement();
        TaskGuard(tokio::spawn(async move {
            let outcome = settlement.await;
            let _ = tx.send(CycleEvent {
                generation,
                operation,
                kind: EventKind::Settled(outcome),
            });
        }))
    }

    fn arm(&mut self, timer: TimerKind, delay: Duration) -> Armed {
        self.next_ticket += 1;
        let ticket = self.next_ticket;
        let tx = self.events_tx.clone();
        let generation = self.generation;
        let operation = self.operation.id();
        let task = TaskGuard(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(CycleEvent {
                generation,
                operation,
                kind: EventKind::Timer(timer, ticket),
            });
        }));
        Armed { ticket, _task: task }
    }
}

/// Derives the status snapshot of the current operation.
///
/// `evaluate` is called on every owner-side trigger and returns the snapshot
/// to render right away. `next_change` yields each later snapshot produced by
/// the operation settling or a timer firing. `dispose` ends tracking for good.
pub struct PromiseStatusTracker<T, E> {
    generation: Generation,
    cycle: Option<Cycle<T, E>>,
    config: TrackerConfig,
    disposed: bool,
    metrics: Option<Arc<TrackerMetrics>>,
}

impl<T: Payload, E: Payload> PromiseStatusTracker<T, E> {
    /// Create a tracker with nothing tracked yet
    pub fn new(config: TrackerConfig) -> Self {
        Self {
            generation: Generation::default(),
            cycle: None,
            config,
            disposed: false,
            metrics: None,
        }
    }

    /// Create a tracker reporting into `metrics`
    pub fn with_metrics(config: TrackerConfig, metrics: Arc<TrackerMetrics>) -> Self {
        let mut tracker = Self::new(config);
        tracker.metrics = Some(metrics);
        tracker
    }

    /// Re-evaluate after the owner's operation or configuration changed.
    ///
    /// A different operation (by identity) starts a new cycle; the same
    /// operation with new configuration only relabels and adjusts timers.
    /// Must be called from within a tokio runtime.
    #[instrument(skip_all, fields(operation = ?operation.map(|op| op.id())))]
    pub fn evaluate(
        &mut self,
        operation: Option<&TrackedOperation<T, E>>,
        config: &TrackerConfig,
    ) -> Result<Snapshot<T, E>> {
        if self.disposed {
            return Err(Error::Disposed);
        }

        self.config = config.clone();

        let same_operation = match (&self.cycle, operation) {
            (Some(cycle), Some(operation)) => cycle.operation == *operation,
            (None, None) => true,
            _ => false,
        };

        if same_operation {
            self.reconfigure();
        } else {
            self.start_cycle(operation);
        }

        Ok(self.snapshot())
    }

    /// Wait for the next change of the visible snapshot.
    ///
    /// Returns `None` once nothing further can happen without another
    /// `evaluate`: no operation is tracked, the tracker is disposed, or the
    /// settlement and every armed timer have been processed. Cancel safe.
    pub async fn next_change(&mut self) -> Option<Snapshot<T, E>> {
        loop {
            let cycle = self.cycle.as_mut()?;
            let event = match cycle.backlog.pop_front() {
                Some(event) => event,
                None if cycle.is_busy() => cycle.events.recv().await?,
                None => return None,
            };

            if matches!(event.kind, EventKind::Timer(TimerKind::Reveal, _)) && cycle.settlement_queued() {
                // Settlement already arrived; it wins over the reveal.
                cycle.reveal = None;
                debug!(generation = %cycle.generation, "Reveal superseded by queued settlement");
                continue;
            }

            if self.apply(event) {
                return Some(self.snapshot());
            }
        }
    }

    /// Snapshot the owner should currently render
    pub fn snapshot(&self) -> Snapshot<T, E> {
        let cycle = self.cycle.as_ref()?;
        let status = self.config.status_map.label(cycle.phase)?;
        match cycle.phase {
            Phase::Pending => cycle.revealed.then(|| StatusSnapshot::pending(status)),
            Phase::Fulfilled | Phase::Rejected => cycle.outcome.clone().map(|outcome| StatusSnapshot {
                status,
                value: Some(outcome),
            }),
            Phase::Idle => None,
        }
    }

    fn start_cycle(&mut self, operation: Option<&TrackedOperation<T, E>>) {
        self.end_cycle();
        self.generation = self.generation.next();

        let Some(operation) = operation else {
            debug!(generation = %self.generation, "No operation to track");
            return;
        };

        let cycle = Cycle::start(self.generation, operation, self.config.delay);

        if let Some(metrics) = &self.metrics {
            metrics.cycle_started();
        }

        info!(
            operation = %operation.id(),
            generation = %self.generation,
            delay_ms = ?self.config.delay.map(|d| d.as_millis()),
            "Tracking operation"
        );

        self.cycle = Some(cycle);
    }

    /// Same operation, new configuration: keep running timers on their
    /// original schedule, arm or cancel only the ones whose option appeared
    /// or disappeared.
    fn reconfigure(&mut self) {
        let Some(cycle) = self.cycle.as_mut() else {
            return;
        };

        match cycle.phase {
            Phase::Pending if !cycle.revealed && self.config.delay.is_none() => {
                cycle.reveal = None;
                cycle.revealed = true;
                debug!(generation = %cycle.generation, "Delay removed, revealing pending");
            }
            Phase::Fulfilled | Phase::Rejected => match self.config.reset_delay_for(cycle.phase) {
                Some(delay) if cycle.reset.is_none() => {
                    cycle.reset = Some(cycle.arm(TimerKind::Reset, delay));
                    debug!(generation = %cycle.generation, phase = %cycle.phase, "Reset delay added");
                }
                None if cycle.reset.is_some() => {
                    cycle.reset = None;
                    debug!(generation = %cycle.generation, phase = %cycle.phase, "Reset delay removed");
                }
                _ => {}
            },
            _ => {}
        }
    }

    /// Apply one event; returns whether the visible snapshot changed.
    fn apply(&mut self, event: CycleEvent<T, E>) -> bool {
        let Some(cycle) = self.cycle.as_mut() else {
            return false;
        };

        if !cycle.is_current(&event) {
            debug!(
                event_generation = %event.generation,
                generation = %cycle.generation,
                "Discarding stale event"
            );
            if let Some(metrics) = &self.metrics {
                metrics.stale_event();
            }
            return false;
        }

        match event.kind {
            EventKind::Timer(TimerKind::Reveal, ticket) => {
                if !disarm(&mut cycle.reveal, ticket) || cycle.phase != Phase::Pending || cycle.revealed {
                    return false;
                }
                cycle.revealed = true;
                if let Some(metrics) = &self.metrics {
                    metrics.pending_revealed();
                }
                debug!(generation = %cycle.generation, "Pending revealed");
                true
            }
            EventKind::Settled(outcome) => {
                cycle.subscription = None;
                if cycle.phase != Phase::Pending {
                    return false;
                }
                cycle.reveal = None;
                cycle.phase = if outcome.is_ok() {
                    Phase::Fulfilled
                } else {
                    Phase::Rejected
                };
                cycle.outcome = Some(outcome);

                if let Some(metrics) = &self.metrics {
                    if cycle.phase == Phase::Fulfilled {
                        metrics.fulfilled();
                    } else {
                        metrics.rejected();
                    }
                }

                if let Some(delay) = self.config.reset_delay_for(cycle.phase) {
                    cycle.reset = Some(cycle.arm(TimerKind::Reset, delay));
                }

                info!(
                    operation = %cycle.operation.id(),
                    generation = %cycle.generation,
                    phase = %cycle.phase,
                    "Operation settled"
                );
                true
            }
            EventKind::Timer(TimerKind::Reset, ticket) => {
                if !disarm(&mut cycle.reset, ticket) || !cycle.phase.is_settled() {
                    return false;
                }
                cycle.phase = Phase::Idle;
                cycle.outcome = None;
                if let Some(metrics) = &self.metrics {
                    metrics.reset();
                }
                debug!(generation = %cycle.generation, "Settled status reset");
                true
            }
        }
    }
}

impl<T, E> PromiseStatusTracker<T, E> {
    /// End tracking. Aborts every timer and the settlement subscription;
    /// no snapshot is produced afterwards. Disposing twice is an error.
    pub fn dispose(&mut self) -> Result<()> {
        if self.disposed {
            warn!(generation = %self.generation, "Tracker disposed twice");
            return Err(Error::AlreadyDisposed);
        }
        self.disposed = true;
        self.end_cycle();
        self.generation = self.generation.next();
        debug!(generation = %self.generation, "Tracker disposed");
        Ok(())
    }

    /// Current phase; `Idle` when nothing is tracked
    pub fn phase(&self) -> Phase {
        self.cycle.as_ref().map(|c| c.phase).unwrap_or(Phase::Idle)
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    pub fn current_operation(&self) -> Option<&TrackedOperation<T, E>> {
        self.cycle.as_ref().map(|c| &c.operation)
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    /// Whether `next_change` may still yield a snapshot
    pub fn has_pending_work(&self) -> bool {
        self.cycle.as_ref().map(|c| c.is_busy()).unwrap_or(false)
    }

    fn end_cycle(&mut self) {
        let Some(mut cycle) = self.cycle.take() else {
            return;
        };

        // Abort before draining so nothing lands after the count.
        cycle.subscription = None;
        cycle.reveal = None;
        cycle.reset = None;

        let mut discarded = cycle.backlog.len();
        while cycle.events.try_recv().is_ok() {
            discarded += 1;
        }

        if let Some(metrics) = &self.metrics {
            metrics.cycle_ended();
            for _ in 0..discarded {
                metrics.stale_event();
            }
        }

        debug!(
            operation = %cycle.operation.id(),
            generation = %cycle.generation,
            discarded,
            "Cycle ended"
        );
    }
}

impl<T, E> Drop for PromiseStatusTracker<T, E> {
    fn drop(&mut self) {
        self.end_cycle();
    }
}

impl<T, E> fmt::Debug for PromiseStatusTracker<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PromiseStatusTracker")
            .field("generation", &self.generation)
            .field("operation", &self.cycle.as_ref().map(|c| c.operation.id()))
            .field("phase", &self.phase())
            .field("disposed", &self.disposed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::{StatusLabel, StatusMap};

    type Tracker = PromiseStatusTracker<&'static str, String>;

    fn ms(value: u64) -> Duration {
        Duration::from_millis(value)
    }

    #[tokio::test(start_paused = true)]
    async fn test_pending_then_fulfilled() {
        let mut tracker = Tracker::new(TrackerConfig::new());
        let op = TrackedOperation::fulfilled("foo");
        let config = TrackerConfig::new();

        let first = tracker.evaluate(Some(&op), &config).unwrap();
        assert_eq!(first, Some(StatusSnapshot::pending(StatusLabel::text("pending"))));
        assert_eq!(tracker.phase(), Phase::Pending);

        let next = tracker.next_change().await;
        assert_eq!(
            next,
            Some(Some(StatusSnapshot::fulfilled(StatusLabel::text("fulfilled"), "foo")))
        );
        assert_eq!(tracker.phase(), Phase::Fulfilled);
        assert_eq!(tracker.next_change().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_operation_is_idle() {
        let mut tracker = Tracker::new(TrackerConfig::new());
        assert_eq!(tracker.evaluate(None, &TrackerConfig::new()).unwrap(), None);
        assert_eq!(tracker.phase(), Phase::Idle);
        assert!(!tracker.has_pending_work());
        assert_eq!(tracker.next_change().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_generation_bumps_on_identity_change_only() {
        let mut tracker = Tracker::new(TrackerConfig::new());
        let op = TrackedOperation::fulfilled("foo");
        let config = TrackerConfig::new();

        tracker.evaluate(Some(&op), &config).unwrap();
        let generation = tracker.generation();

        let relabel = TrackerConfig::new().with_status_map(StatusMap::default().with_pending("loading"));
        tracker.evaluate(Some(&op.clone()), &relabel).unwrap();
        assert_eq!(tracker.generation(), generation);

        tracker.evaluate(Some(&TrackedOperation::fulfilled("foo")), &config).unwrap();
        assert!(tracker.generation() > generation);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reveal_loses_to_queued_settlement() {
        let mut tracker = Tracker::new(TrackerConfig::new());
        let op = TrackedOperation::new(async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok("foo")
        });
        let config = TrackerConfig::new().with_delay(ms(50));

        assert_eq!(tracker.evaluate(Some(&op), &config).unwrap(), None);

        // Both the reveal timer and the settlement are due before we look.
        tokio::time::sleep(ms(60)).await;

        let next = tracker.next_change().await;
        assert_eq!(
            next,
            Some(Some(StatusSnapshot::fulfilled(StatusLabel::text("fulfilled"), "foo")))
        );
        assert_eq!(tracker.next_change().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispose_twice_is_rejected() {
        let mut tracker = Tracker::new(TrackerConfig::new());
        tracker.dispose().unwrap();
        assert!(matches!(tracker.dispose(), Err(Error::AlreadyDisposed)));
        assert!(matches!(
            tracker.evaluate(None, &TrackerConfig::new()),
            Err(Error::Disposed)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_metrics_follow_cycles() {
        let metrics = Arc::new(TrackerMetrics::new().unwrap());
        let mut tracker = Tracker::with_metrics(TrackerConfig::new(), Arc::clone(&metrics));
        let config = TrackerConfig::new();

        tracker.evaluate(Some(&TrackedOperation::fulfilled("foo")), &config).unwrap();
        assert_eq!(metrics.active_cycles(), 1);
        tracker.next_change().await;

        tracker.evaluate(Some(&TrackedOperation::rejected("boom".to_string())), &config).unwrap();
        assert_eq!(metrics.active_cycles(), 1);

        tracker.dispose().unwrap();
        assert_eq!(metrics.active_cycles(), 0);
    }
}
