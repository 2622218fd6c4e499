//! Promise status tracking
//!
//! Samples the progress of one asynchronous operation at a time and derives
//! a presentable status for it:
//! - Optional delay before `pending` is shown, so fast operations never flicker
//! - Optional auto-reset of fulfilled and rejected statuses
//! - Configurable outward labels per phase
//! - Replacing the operation or disposing the tracker silences everything
//!   scheduled for the previous one
//!
//! # Modules
//!
//! - `binding`: Driver task delivering snapshots to an owner callback
//! - `config`: Tracker options and their validation
//! - `error`: Error types and Result alias
//! - `metrics`: Prometheus counters for tracker activity
//! - `operation`: Tracked operation handles
//! - `status`: Phases, labels and snapshots
//! - `tracker`: The status state machine

pub mod binding;
pub mod config;
pub mod error;
pub mod metrics;
pub mod operation;
pub mod status;
pub mod tracker;

// Re-exports
pub use binding::PromiseStateBinding;
pub use config::{TrackerConfig, TrackerOptions};
pub use error::{Error, Result};
pub use metrics::TrackerMetrics;
pub use operation::{OperationId, Payload, TrackedOperation};
pub use status::{snapshot_to_json, Phase, Snapshot, StatusLabel, StatusMap, StatusSnapshot};
pub use tracker::{Generation, PromiseStatusTracker};
