use prometheus::{IntCounter, IntGauge, Registry};

use crate::error::Result;

/// Tracker metrics collector
#[derive(Clone)]
pub struct TrackerMetrics {
    /// Tracking cycles started (non-null operations handed in)
    cycles_started: IntCounter,

    /// Cycles currently tracking an operation
    active_cycles: IntGauge,

    /// Operations observed fulfilled
    fulfilled: IntCounter,

    /// Operations observed rejected
    rejected: IntCounter,

    /// Pending snapshots revealed after a delay
    pending_revealed: IntCounter,

    /// Settled snapshots cleared by an auto-reset
    resets: IntCounter,

    /// Events discarded because their cycle was superseded
    stale_events: IntCounter,

    registry: Registry,
}

impl TrackerMetrics {
    /// Create new metrics collector
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let cycles_started = IntCounter::new(
            "promise_status_cycles_started_total",
            "Total number of tracking cycles started",
        )?;
        registry.register(Box::new(cycles_started.clone()))?;

        let active_cycles = IntGauge::new(
            "promise_status_active_cycles",
            "Number of cycles currently tracking an operation",
        )?;
        registry.register(Box::new(active_cycles.clone()))?;

        let fulfilled = IntCounter::new(
            "promise_status_fulfilled_total",
            "Total number of tracked operations that fulfilled",
        )?;
        registry.register(Box::new(fulfilled.clone()))?;

        let rejected = IntCounter::new(
            "promise_status_rejected_total",
            "Total number of tracked operations that rejected",
        )?;
        registry.register(Box::new(rejected.clone()))?;

        let pending_revealed = IntCounter::new(
            "promise_status_pending_revealed_total",
            "Total number of pending statuses revealed after the delay",
        )?;
        registry.register(Box::new(pending_revealed.clone()))?;

        let resets = IntCounter::new(
            "promise_status_resets_total",
            "Total number of settled statuses cleared by auto-reset",
        )?;
        registry.register(Box::new(resets.clone()))?;

        let stale_events = IntCounter::new(
            "promise_status_stale_events_total",
            "Total number of events discarded from superseded cycles",
        )?;
        registry.register(Box::new(stale_events.clone()))?;

        Ok(Self {
            cycles_started,
            active_cycles,
            fulfilled,
            rejected,
            pending_revealed,
            resets,
            stale_events,
            registry,
        })
    }

    pub fn cycle_started(&self) {
        self.cycles_started.inc();
        self.active_cycles.inc();
    }

    pub fn cycle_ended(&self) {
        self.active_cycles.dec();
    }

    pub fn fulfilled(&self) {
        self.fulfilled.inc();
    }

    pub fn rejected(&self) {
        self.rejected.inc();
    }

    pub fn pending_revealed(&self) {
        self.pending_revealed.inc();
    }

    pub fn reset(&self) {
        self.resets.inc();
    }

    pub fn stale_event(&self) {
        self.stale_events.inc();
    }

    pub fn active_cycles(&self) -> i64 {
        self.active_cycles.get()
    }

    pub fn stale_events(&self) -> u64 {
        self.stale_events.get()
    }

    /// Registry for scraping
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Metric values as JSON
    pub fn gather_json(&self) -> serde_json::Value {
        let mut metrics = Vec::new();

        for family in self.registry.gather() {
            let value: f64 = family
                .get_metric()
                .iter()
                .map(|m| {
                    if m.has_counter() {
                        m.get_counter().get_value()
                    } else {
                        m.get_gauge().get_value()
                    }
                })
                .sum();
            metrics.push(serde_json::json!({
                "name": family.get_name(),
                "help": family.get_help(),
                "value": value,
            }));
        }

        serde_json::json!({
            "metrics": metrics
        })
    }
}
