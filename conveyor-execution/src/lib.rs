//! Worker runtime for Conveyor
//!
//! A [`Worker`] pulls tasks from a job queue, runs them against the function
//! registry and records every outcome. The [`Watchdog`] keeps the number of
//! live workers between a floor and a ceiling, launching new ones through a
//! [`WorkerLauncher`] and retiring surplus ones with sentinels or signals.

pub mod error;
pub mod launcher;
pub mod resources;
pub mod watchdog;
pub mod worker;

pub use error::{ExecutionError, ExecutionResult};
pub use launcher::{InProcessHandle, InProcessLauncher, ProcessLauncher, WorkerHandle, WorkerLauncher};
pub use resources::{select_idlest, ResourceSampler, ResourceSnapshot};
pub use watchdog::{
    decide, ControlLaw, Decision, DecisionReason, RetireMode, ScaleDecision, ScalingPolicy,
    Watchdog, WatchdogSettings,
};
pub use worker::{Worker, WorkerReport, WorkerSettings, WorkerState};
