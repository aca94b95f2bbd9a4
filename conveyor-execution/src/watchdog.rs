//! Watchdog and autoscaler
//!
//! Every `sample_time` the watchdog measures queue depth twice, derives the
//! per-worker drain rate and asks [`decide`] whether to add a worker, retire
//! one, or hold. The effective worker count always stays between
//! `initial_workers` and `max_workers`.

use conveyor_queue::{JobQueue, QueueItem, RETIRE_PRIORITY};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::ExecutionResult;
use crate::launcher::{WorkerHandle, WorkerLauncher};
use crate::resources::{select_idlest, ResourceSampler};

/// Grace given to workers still alive once the retirement window has passed
const STRAGGLER_GRACE: Duration = Duration::from_secs(1);
const RETIRE_POLL: Duration = Duration::from_millis(50);

/// How the drain rate maps to a scaling decision
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlLaw {
    /// Scale up while a backlog remains and workers drain slower than the
    /// setpoint; scale down once the queue is empty.
    #[default]
    Corrected,
    /// Scale up when the drain rate exceeds the setpoint, down when it falls
    /// below it.
    SourceCompatible,
}

/// How a surplus worker is retired
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetireMode {
    /// Push a poison pill; whichever worker pops it stops
    #[default]
    Sentinel,
    /// Terminate the least busy worker directly
    Signal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalingPolicy {
    pub initial_workers: usize,
    pub max_workers: usize,
    /// Target tasks drained per worker per sample window
    pub consume_rate: f64,
    #[serde(default)]
    pub control_law: ControlLaw,
}

impl Default for ScalingPolicy {
    fn default() -> Self {
        Self {
            initial_workers: 3,
            max_workers: 6,
            consume_rate: 10.0,
            control_law: ControlLaw::Corrected,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScaleDecision {
    Up,
    Down,
    Hold,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionReason {
    BelowFloor,
    AboveCeiling,
    /// Backlog remains and workers drain slower than the setpoint
    FallingBehind,
    /// Queue is empty
    Idle,
    DrainingAhead,
    DrainingBehind,
    AtFloor,
    AtCeiling,
    Steady,
}

impl fmt::Display for DecisionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            DecisionReason::BelowFloor => "below floor",
            DecisionReason::AboveCeiling => "above ceiling",
            DecisionReason::FallingBehind => "falling behind",
            DecisionReason::Idle => "idle",
            DecisionReason::DrainingAhead => "draining ahead of setpoint",
            DecisionReason::DrainingBehind => "draining behind setpoint",
            DecisionReason::AtFloor => "at floor",
            DecisionReason::AtCeiling => "at ceiling",
            DecisionReason::Steady => "steady",
        };
        write!(f, "{}", reason)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Decision {
    pub action: ScaleDecision,
    pub reason: DecisionReason,
    /// Tasks drained per effective worker during the window
    pub drain_rate: f64,
    /// Live workers minus retirements not yet observed
    pub effective: usize,
}

/// Scaling decision for one sample window.
///
/// `d0` and `d1` are the queue depths at the start and end of the window.
/// `pending_retirements` counts sentinels pushed for workers that are still
/// alive; they are not part of the effective pool.
pub fn decide(
    alive: usize,
    pending_retirements: usize,
    d0: usize,
    d1: usize,
    policy: &ScalingPolicy,
) -> Decision {
    let effective = alive.saturating_sub(pending_retirements);
    let drain_rate = (d0 as f64 - d1 as f64) / effective.max(1) as f64;
    let floor = policy.initial_workers;
    let ceiling = policy.max_workers;

    let (action, reason) = if effective < floor {
        (ScaleDecision::Up, DecisionReason::BelowFloor)
    } else {
        match policy.control_law {
            ControlLaw::Corrected => {
                if effective > ceiling {
                    (ScaleDecision::Down, DecisionReason::AboveCeiling)
                } else if d1 > 0 && drain_rate < policy.consume_rate {
                    if effective < ceiling {
                        (ScaleDecision::Up, DecisionReason::FallingBehind)
                    } else {
                        (ScaleDecision::Hold, DecisionReason::AtCeiling)
                    }
                } else if d1 == 0 && drain_rate <= policy.consume_rate {
                    if effective > floor {
                        (ScaleDecision::Down, DecisionReason::Idle)
                    } else {
                        (ScaleDecision::Hold, DecisionReason::AtFloor)
                    }
                } else {
                    (ScaleDecision::Hold, DecisionReason::Steady)
                }
            }
            ControlLaw::SourceCompatible => {
                let delta = drain_rate - policy.consume_rate;
                if effective >= ceiling {
                    if effective > floor {
                        (ScaleDecision::Down, DecisionReason::AboveCeiling)
                    } else {
                        (ScaleDecision::Hold, DecisionReason::AtCeiling)
                    }
                } else if delta > 0.0 {
                    (ScaleDecision::Up, DecisionReason::DrainingAhead)
                } else if delta < 0.0 && effective > floor {
                    (ScaleDecision::Down, DecisionReason::DrainingBehind)
                } else {
                    (ScaleDecision::Hold, DecisionReason::Steady)
                }
            }
        }
    };

    Decision {
        action,
        reason,
        drain_rate,
        effective,
    }
}

#[derive(Debug, Clone)]
pub struct WatchdogSettings {
    pub policy: ScalingPolicy,
    pub sample_time: Duration,
    pub poison_pill: String,
    pub retire_mode: RetireMode,
    /// How long retiring workers get before they are forced to stop
    pub graceful_timeout: Duration,
}

impl Default for WatchdogSettings {
    fn default() -> Self {
        Self {
            policy: ScalingPolicy::default(),
            sample_time: Duration::from_secs(1),
            poison_pill: "-STOP-".to_string(),
            retire_mode: RetireMode::Sentinel,
            graceful_timeout: Duration::from_secs(5),
        }
    }
}

/// Supervises a pool of workers fed from one job queue
pub struct Watchdog {
    settings: WatchdogSettings,
    queue: Arc<dyn JobQueue>,
    launcher: Box<dyn WorkerLauncher>,
    workers: Vec<Box<dyn WorkerHandle>>,
    pending_retirements: usize,
    next_id: usize,
    sampler: ResourceSampler,
    retiring: JoinSet<()>,
}

impl Watchdog {
    pub fn new(
        settings: WatchdogSettings,
        queue: Arc<dyn JobQueue>,
        launcher: Box<dyn WorkerLauncher>,
    ) -> Self {
        Self {
            settings,
            queue,
            launcher,
            workers: Vec::new(),
            pending_retirements: 0,
            next_id: 0,
            sampler: ResourceSampler::new(),
            retiring: JoinSet::new(),
        }
    }

    pub fn settings(&self) -> &WatchdogSettings {
        &self.settings
    }

    /// Workers tracked as alive at the last prune
    pub fn alive_workers(&self) -> usize {
        self.workers.len()
    }

    pub fn pending_retirements(&self) -> usize {
        self.pending_retirements
    }

    pub fn effective_workers(&self) -> usize {
        self.workers.len().saturating_sub(self.pending_retirements)
    }

    /// Launch the floor of the pool. A launch failure here is fatal.
    pub async fn start_initial(&mut self) -> ExecutionResult<()> {
        info!(
            initial_workers = self.settings.policy.initial_workers,
            max_workers = self.settings.policy.max_workers,
            "Starting worker pool"
        );
        while self.workers.len() < self.settings.policy.initial_workers {
            self.scale_up().await?;
        }
        Ok(())
    }

    /// Drop dead workers from the tracked set
    pub fn prune(&mut self) {
        let before = self.workers.len();
        self.workers.retain_mut(|worker| {
            let alive = worker.is_alive();
            if !alive {
                debug!(worker_id = worker.worker_id(), "Worker exited");
            }
            alive
        });
        let exited = before - self.workers.len();
        self.pending_retirements = self.pending_retirements.saturating_sub(exited);
    }

    /// One sample window: measure, decide, apply
    pub async fn tick(&mut self) -> ExecutionResult<Decision> {
        self.prune();
        let d0 = self.queue.len().await?;
        tokio::time::sleep(self.settings.sample_time).await;
        self.prune();
        let d1 = self.queue.len().await?;

        let decision = decide(
            self.workers.len(),
            self.pending_retirements,
            d0,
            d1,
            &self.settings.policy,
        );

        match decision.action {
            ScaleDecision::Up => {
                info!(
                    reason = %decision.reason,
                    drain_rate = decision.drain_rate,
                    workers = decision.effective,
                    "Scaling up"
                );
                self.scale_up().await?;
            }
            ScaleDecision::Down => {
                info!(
                    reason = %decision.reason,
                    drain_rate = decision.drain_rate,
                    workers = decision.effective,
                    "Scaling down"
                );
                self.retire_one().await?;
            }
            ScaleDecision::Hold => {
                debug!(
                    reason = %decision.reason,
                    drain_rate = decision.drain_rate,
                    workers = decision.effective,
                    "Holding"
                );
            }
        }
        Ok(decision)
    }

    async fn scale_up(&mut self) -> ExecutionResult<()> {
        let worker_id = self.next_id;
        let handle = self.launcher.launch(worker_id).await?;
        self.next_id += 1;
        self.workers.push(handle);
        Ok(())
    }

    async fn retire_one(&mut self) -> ExecutionResult<()> {
        match self.settings.retire_mode {
            RetireMode::Sentinel => {
                self.queue
                    .push_with_priority(
                        QueueItem::sentinel(self.settings.poison_pill.clone()),
                        RETIRE_PRIORITY,
                    )
                    .await?;
                self.pending_retirements += 1;
            }
            RetireMode::Signal => {
                let Some(index) = self.pick_idlest() else {
                    return Ok(());
                };
                let mut handle = self.workers.remove(index);
                let grace = self.settings.graceful_timeout;
                info!(worker_id = handle.worker_id(), pid = ?handle.pid(), "Terminating worker");
                self.retiring.spawn(async move {
                    if let Err(e) = handle.shutdown(grace).await {
                        warn!(worker_id = handle.worker_id(), error = %e, "Failed to stop worker");
                    }
                });
            }
        }
        Ok(())
    }

    /// Least busy worker by CPU then memory; without process ids the newest
    fn pick_idlest(&mut self) -> Option<usize> {
        let pids: Vec<u32> = self.workers.iter().filter_map(|w| w.pid()).collect();
        let snapshots = self.sampler.sample(&pids);
        select_idlest(&snapshots)
            .map(|index| snapshots[index].pid)
            .and_then(|pid| self.workers.iter().position(|w| w.pid() == Some(pid)))
            .or_else(|| self.workers.len().checked_sub(1))
    }

    /// Run until `shutdown` fires, then retire every worker
    pub async fn run(mut self, shutdown: CancellationToken) -> ExecutionResult<()> {
        self.start_initial().await?;

        let mut backoff = false;
        loop {
            if backoff {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(self.settings.sample_time) => {}
                }
            }

            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                result = self.tick() => {
                    backoff = result.is_err();
                    if let Err(e) = result {
                        warn!(error = %e, "Watchdog sample failed, skipping cycle");
                    }
                }
            }
        }

        info!("Watchdog stopping");
        self.retire_all().await;
        Ok(())
    }

    /// Push one sentinel per worker not already retiring and wait for them to
    /// exit; workers still alive after `graceful_timeout` are stopped directly.
    pub async fn retire_all(&mut self) {
        self.prune();
        let outstanding = self.effective_workers();
        for _ in 0..outstanding {
            let pill = QueueItem::sentinel(self.settings.poison_pill.clone());
            if let Err(e) = self.queue.push_with_priority(pill, RETIRE_PRIORITY).await {
                warn!(error = %e, "Failed to push retirement sentinel");
                break;
            }
            self.pending_retirements += 1;
        }

        let deadline = Instant::now() + self.settings.graceful_timeout;
        while !self.workers.is_empty() && Instant::now() < deadline {
            tokio::time::sleep(RETIRE_POLL).await;
            self.prune();
        }

        let forced = self.workers.len();
        for mut handle in self.workers.drain(..) {
            warn!(worker_id = handle.worker_id(), "Worker still running, forcing stop");
            if let Err(e) = handle.shutdown(STRAGGLER_GRACE).await {
                warn!(worker_id = handle.worker_id(), error = %e, "Failed to stop worker");
            }
        }
        while self.retiring.join_next().await.is_some() {}

        // no worker is left to consume these
        if forced > 0 {
            match self.queue.purge_sentinels(&self.settings.poison_pill).await {
                Ok(purged) => debug!(purged, "Removed leftover retirement sentinels"),
                Err(e) => warn!(error = %e, "Failed to remove leftover retirement sentinels"),
            }
        }

        self.pending_retirements = 0;
        info!("All workers retired");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ExecutionError;
    use crate::launcher::InProcessLauncher;
    use crate::worker::WorkerSettings;
    use async_trait::async_trait;
    use conveyor_core::default_registry;
    use conveyor_queue::{FifoQueue, PriorityQueue, ResultStore};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    fn policy(initial: usize, max: usize, rate: f64) -> ScalingPolicy {
        ScalingPolicy {
            initial_workers: initial,
            max_workers: max,
            consume_rate: rate,
            control_law: ControlLaw::Corrected,
        }
    }

    #[test]
    fn test_floor_forces_scale_up() {
        let decision = decide(1, 0, 0, 0, &policy(2, 4, 10.0));
        assert_eq!(decision.action, ScaleDecision::Up);
        assert_eq!(decision.reason, DecisionReason::BelowFloor);
    }

    #[test]
    fn test_pending_retirements_are_not_effective() {
        let decision = decide(3, 2, 0, 0, &policy(2, 4, 10.0));
        assert_eq!(decision.effective, 1);
        assert_eq!(decision.action, ScaleDecision::Up);
    }

    #[test]
    fn test_corrected_law() {
        let p = policy(2, 4, 10.0);

        // 100 -> 90 over 3 workers is below the setpoint with backlog left
        let behind = decide(3, 0, 100, 90, &p);
        assert_eq!(behind.action, ScaleDecision::Up);
        assert_eq!(behind.reason, DecisionReason::FallingBehind);

        let at_ceiling = decide(4, 0, 100, 90, &p);
        assert_eq!(at_ceiling.action, ScaleDecision::Hold);

        let idle = decide(3, 0, 0, 0, &p);
        assert_eq!(idle.action, ScaleDecision::Down);
        assert_eq!(idle.reason, DecisionReason::Idle);

        let at_floor = decide(2, 0, 0, 0, &p);
        assert_eq!(at_floor.action, ScaleDecision::Hold);

        // 200 -> 50 over 3 workers keeps up with the setpoint
        let keeping_up = decide(3, 0, 200, 50, &p);
        assert_eq!(keeping_up.action, ScaleDecision::Hold);
        assert_eq!(keeping_up.reason, DecisionReason::Steady);

        let over = decide(5, 0, 0, 0, &p);
        assert_eq!(over.action, ScaleDecision::Down);
        assert_eq!(over.reason, DecisionReason::AboveCeiling);
    }

    #[test]
    fn test_source_compatible_law() {
        let p = ScalingPolicy {
            control_law: ControlLaw::SourceCompatible,
            ..policy(2, 4, 10.0)
        };

        assert_eq!(decide(3, 0, 100, 40, &p).action, ScaleDecision::Up);
        assert_eq!(decide(3, 0, 100, 90, &p).action, ScaleDecision::Down);
        assert_eq!(decide(3, 0, 60, 30, &p).action, ScaleDecision::Hold);
        assert_eq!(decide(2, 0, 100, 90, &p).action, ScaleDecision::Hold);
        assert_eq!(decide(4, 0, 100, 0, &p).action, ScaleDecision::Down);
    }

    #[test]
    fn test_control_law_serde() {
        let law: ControlLaw = serde_json::from_str("\"source_compatible\"").unwrap();
        assert_eq!(law, ControlLaw::SourceCompatible);
        let mode: RetireMode = serde_json::from_str("\"signal\"").unwrap();
        assert_eq!(mode, RetireMode::Signal);
    }

    #[derive(Clone, Default)]
    struct Fleet {
        workers: Arc<Mutex<Vec<(Arc<AtomicBool>, Arc<AtomicBool>)>>>,
    }

    impl Fleet {
        fn launched(&self) -> usize {
            self.workers.lock().unwrap().len()
        }

        fn kill(&self, index: usize) {
            self.workers.lock().unwrap()[index].0.store(false, Ordering::SeqCst);
        }

        fn shut_down(&self) -> usize {
            self.workers
                .lock()
                .unwrap()
                .iter()
                .filter(|(_, shut)| shut.load(Ordering::SeqCst))
                .count()
        }
    }

    struct FakeHandle {
        worker_id: usize,
        alive: Arc<AtomicBool>,
        shut: Arc<AtomicBool>,
    }

    #[async_trait]
    impl WorkerHandle for FakeHandle {
        fn worker_id(&self) -> usize {
            self.worker_id
        }

        fn pid(&self) -> Option<u32> {
            None
        }

        fn is_alive(&mut self) -> bool {
            self.alive.load(Ordering::SeqCst)
        }

        fn terminate(&mut self) -> ExecutionResult<()> {
            self.alive.store(false, Ordering::SeqCst);
            Ok(())
        }

        async fn shutdown(&mut self, _grace: Duration) -> ExecutionResult<()> {
            self.alive.store(false, Ordering::SeqCst);
            self.shut.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    #[async_trait]
    impl WorkerLauncher for Fleet {
        async fn launch(&self, worker_id: usize) -> ExecutionResult<Box<dyn WorkerHandle>> {
            let alive = Arc::new(AtomicBool::new(true));
            let shut = Arc::new(AtomicBool::new(false));
            self.workers
                .lock()
                .unwrap()
                .push((alive.clone(), shut.clone()));
            Ok(Box::new(FakeHandle {
                worker_id,
                alive,
                shut,
            }))
        }
    }

    struct FailingLauncher;

    #[async_trait]
    impl WorkerLauncher for FailingLauncher {
        async fn launch(&self, worker_id: usize) -> ExecutionResult<Box<dyn WorkerHandle>> {
            Err(ExecutionError::LaunchFailed {
                worker_id,
                reason: "no binary".to_string(),
            })
        }
    }

    fn settings(initial: usize, max: usize, retire_mode: RetireMode) -> WatchdogSettings {
        WatchdogSettings {
            policy: policy(initial, max, 10.0),
            sample_time: Duration::from_secs(1),
            retire_mode,
            graceful_timeout: Duration::from_secs(1),
            ..WatchdogSettings::default()
        }
    }

    async fn fill(queue: &PriorityQueue, count: usize) {
        for n in 0..count {
            queue
                .push(QueueItem::task(&conveyor_core::TaskPayload::new(
                    "echo",
                    serde_json::json!(n),
                )))
                .await
                .unwrap();
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_backlog_scales_up_to_ceiling() {
        let queue = Arc::new(PriorityQueue::new());
        fill(&queue, 5).await;
        let fleet = Fleet::default();
        let mut watchdog = Watchdog::new(
            settings(2, 3, RetireMode::Sentinel),
            queue.clone(),
            Box::new(fleet.clone()),
        );

        watchdog.start_initial().await.unwrap();
        assert_eq!(fleet.launched(), 2);

        let decision = watchdog.tick().await.unwrap();
        assert_eq!(decision.action, ScaleDecision::Up);
        assert_eq!(watchdog.alive_workers(), 3);

        let decision = watchdog.tick().await.unwrap();
        assert_eq!(decision.action, ScaleDecision::Hold);
        assert_eq!(watchdog.alive_workers(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sentinel_retirement_is_counted_until_worker_exits() {
        let queue = Arc::new(PriorityQueue::new());
        let fleet = Fleet::default();
        let mut watchdog = Watchdog::new(
            settings(1, 3, RetireMode::Sentinel),
            queue.clone(),
            Box::new(fleet.clone()),
        );
        watchdog.start_initial().await.unwrap();
        fill(&queue, 2).await;
        watchdog.tick().await.unwrap();
        assert_eq!(watchdog.alive_workers(), 2);

        while queue.pop(Some(Duration::ZERO)).await.is_ok() {}

        let decision = watchdog.tick().await.unwrap();
        assert_eq!(decision.action, ScaleDecision::Down);
        assert_eq!(watchdog.pending_retirements(), 1);
        assert_eq!(watchdog.effective_workers(), 1);
        assert!(queue.pop(Some(Duration::ZERO)).await.unwrap().is_sentinel());

        fleet.kill(1);
        watchdog.prune();
        assert_eq!(watchdog.alive_workers(), 1);
        assert_eq!(watchdog.pending_retirements(), 0);

        let decision = watchdog.tick().await.unwrap();
        assert_eq!(decision.action, ScaleDecision::Hold);
    }

    #[tokio::test(start_paused = true)]
    async fn test_signal_retirement_stops_one_worker() {
        let queue = Arc::new(FifoQueue::new());
        let fleet = Fleet::default();
        let mut watchdog = Watchdog::new(
            settings(1, 3, RetireMode::Signal),
            queue.clone(),
            Box::new(fleet.clone()),
        );
        watchdog.start_initial().await.unwrap();
        watchdog.scale_up().await.unwrap();

        let decision = watchdog.tick().await.unwrap();
        assert_eq!(decision.action, ScaleDecision::Down);
        assert_eq!(watchdog.alive_workers(), 1);
        assert_eq!(watchdog.pending_retirements(), 0);
        assert_eq!(queue.len().await.unwrap(), 0);

        while watchdog.retiring.join_next().await.is_some() {}
        assert_eq!(fleet.shut_down(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retire_all_forces_stragglers() {
        let queue = Arc::new(FifoQueue::new());
        let fleet = Fleet::default();
        let mut watchdog = Watchdog::new(
            settings(2, 3, RetireMode::Sentinel),
            queue.clone(),
            Box::new(fleet.clone()),
        );
        watchdog.start_initial().await.unwrap();

        queue.push(QueueItem::sentinel("unrelated")).await.unwrap();
        watchdog.retire_all().await;
        // the unconsumed pills are gone, other items stay
        assert_eq!(queue.len().await.unwrap(), 1);
        assert_eq!(queue.pop(None).await.unwrap(), QueueItem::sentinel("unrelated"));
        assert_eq!(watchdog.alive_workers(), 0);
        assert_eq!(fleet.shut_down(), 2);
    }

    #[tokio::test]
    async fn test_launch_failure_is_fatal_at_startup() {
        let queue = Arc::new(FifoQueue::new());
        let watchdog = Watchdog::new(
            settings(1, 2, RetireMode::Sentinel),
            queue,
            Box::new(FailingLauncher),
        );
        let result = watchdog.run(CancellationToken::new()).await;
        assert!(matches!(result, Err(ExecutionError::LaunchFailed { .. })));
    }

    #[tokio::test]
    async fn test_run_retires_in_process_workers_on_shutdown() {
        let queue = Arc::new(FifoQueue::new());
        let store = Arc::new(ResultStore::new());
        let launcher = InProcessLauncher::new(
            Arc::new(default_registry()),
            queue.clone(),
            store.clone().into(),
            WorkerSettings {
                pop_timeout: Duration::from_millis(20),
                ..WorkerSettings::default()
            },
        );
        let watchdog = Watchdog::new(
            WatchdogSettings {
                sample_time: Duration::from_millis(20),
                graceful_timeout: Duration::from_secs(5),
                ..settings(2, 2, RetireMode::Sentinel)
            },
            queue.clone(),
            Box::new(launcher),
        );

        let shutdown = CancellationToken::new();
        let running = tokio::spawn(watchdog.run(shutdown.clone()));

        queue
            .push(QueueItem::task(&conveyor_core::TaskPayload::with_id(
                "job-1",
                "echo",
                serde_json::json!(["hi"]),
            )))
            .await
            .unwrap();
        store
            .fetch("job-1", Some(Duration::from_secs(5)))
            .await
            .unwrap();

        shutdown.cancel();
        running.await.unwrap().unwrap();
        assert_eq!(queue.len().await.unwrap(), 0);
    }
}
