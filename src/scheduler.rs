//! Collection scheduler.
//!
//! Fires a tick every `period` and launches one worker thread per target on
//! each tick. A tick never waits for the workers it launched: a slow target
//! does not hold back the others, and under [`OverlapPolicy::Allow`] the next
//! tick may start a fresh worker for a target whose previous worker is still
//! running.
//!
//! ```text
//!   idle ──tick──▶ collecting ──spawned──▶ idle ──tick──▶ ...
//!                    │
//!                    ├── worker(target 0) ──▶ sink
//!                    ├── worker(target 1) ──▶ sink
//!                    └── worker(target n) ──▶ sink
//! ```

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde::Deserialize;
use tracing::{debug, error, info, warn};

use crate::catalog::MetricCatalog;
use crate::driver::Driver;
use crate::error::CollectError;
use crate::sink::SinkHandle;
use crate::target::Target;
use crate::worker::{TargetWorker, WorkerReport};

/// Default time between ticks.
pub const DEFAULT_PERIOD: Duration = Duration::from_secs(10);
/// Default time to wait for in-flight workers on shutdown.
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Granularity of the stop-signal check while waiting for the next tick.
const SLEEP_SLICE: Duration = Duration::from_millis(100);

/// What to do when a tick finds the previous worker of a target still running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverlapPolicy {
    /// Start another worker anyway. Both may publish at the same time.
    #[default]
    Allow,
    /// Leave the target out of this tick.
    Skip,
}

impl FromStr for OverlapPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "allow" => Ok(OverlapPolicy::Allow),
            "skip" => Ok(OverlapPolicy::Skip),
            other => Err(format!("unknown overlap policy '{other}' (expected allow or skip)")),
        }
    }
}

impl fmt::Display for OverlapPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OverlapPolicy::Allow => f.write_str("allow"),
            OverlapPolicy::Skip => f.write_str("skip"),
        }
    }
}

/// Counters for one [`Scheduler::run`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub ticks: u64,
    pub workers_started: usize,
    /// Targets left out of a tick by [`OverlapPolicy::Skip`].
    pub workers_skipped: usize,
    /// Workers still running when the drain timeout expired.
    pub workers_abandoned: usize,
}

/// Periodic fan-out of target workers.
pub struct Scheduler {
    targets: Vec<Target>,
    catalog: Arc<MetricCatalog>,
    driver: Arc<dyn Driver>,
    sink: SinkHandle,
    period: Duration,
    overlap: OverlapPolicy,
    drain_timeout: Duration,
    /// Running workers per target, indexed like `targets`.
    active: Vec<Arc<AtomicUsize>>,
    ticks: AtomicU64,
}

impl Scheduler {
    pub fn new(
        targets: Vec<Target>,
        catalog: Arc<MetricCatalog>,
        driver: Arc<dyn Driver>,
        sink: SinkHandle,
    ) -> Self {
        let active = targets.iter().map(|_| Arc::default()).collect();
        Self {
            targets,
            catalog,
            driver,
            sink,
            period: DEFAULT_PERIOD,
            overlap: OverlapPolicy::default(),
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
            active,
            ticks: AtomicU64::new(0),
        }
    }

    /// Sets the tick period. Zero is bumped to one millisecond.
    pub fn with_period(mut self, period: Duration) -> Self {
        self.period = period.max(Duration::from_millis(1));
        self
    }

    pub fn with_overlap(mut self, overlap: OverlapPolicy) -> Self {
        self.overlap = overlap;
        self
    }

    pub fn with_drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = timeout;
        self
    }

    pub fn targets(&self) -> &[Target] {
        &self.targets
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Ticks until `running` is cleared, then drains in-flight workers.
    ///
    /// The first tick fires immediately. Deadlines are fixed-rate; ticks
    /// missed while the loop was late are dropped, not replayed.
    pub fn run(&self, running: &AtomicBool) -> RunSummary {
        let mut summary = RunSummary::default();
        let mut handles: Vec<JoinHandle<WorkerReport>> = Vec::new();
        let mut next_tick = Instant::now();

        info!(
            "Starting collection: {} targets, {} metrics, period={:?}, overlap={}",
            self.targets.len(),
            self.catalog.len(),
            self.period,
            self.overlap
        );

        while running.load(Ordering::SeqCst) {
            let now = Instant::now();
            if now >= next_tick {
                handles.retain(|h| !h.is_finished());
                let (started, skipped) = self.launch_tick(&mut handles);
                summary.ticks += 1;
                summary.workers_started += started;
                summary.workers_skipped += skipped;

                while next_tick <= now {
                    next_tick += self.period;
                }
            }

            let remaining = next_tick.saturating_duration_since(Instant::now());
            std::thread::sleep(remaining.min(SLEEP_SLICE));
        }

        summary.workers_abandoned = self.drain(handles);
        summary
    }

    /// Runs a single tick and waits for all of its workers.
    pub fn collect_once(&self) -> Vec<WorkerReport> {
        let mut handles = Vec::new();
        self.launch_tick(&mut handles);

        handles
            .into_iter()
            .filter_map(|h| match h.join() {
                Ok(report) => Some(report),
                Err(_) => {
                    error!("Worker thread panicked");
                    None
                }
            })
            .collect()
    }

    /// Launches one worker per target. Returns (started, skipped).
    fn launch_tick(&self, handles: &mut Vec<JoinHandle<WorkerReport>>) -> (usize, usize) {
        let tick = self.ticks.fetch_add(1, Ordering::SeqCst) + 1;
        let tick_at = Utc::now();
        let mut started = 0;
        let mut skipped = 0;

        debug!(tick, "Tick");

        for (idx, target) in self.targets.iter().enumerate() {
            let active = &self.active[idx];
            if self.overlap == OverlapPolicy::Skip && active.load(Ordering::SeqCst) > 0 {
                warn!(
                    tick,
                    target_name = %target,
                    "Previous collection still running, skipping target"
                );
                skipped += 1;
                continue;
            }

            active.fetch_add(1, Ordering::SeqCst);
            let guard = ActiveGuard(Arc::clone(active));
            let worker = TargetWorker::new(
                target.clone(),
                Arc::clone(&self.catalog),
                Arc::clone(&self.driver),
                Arc::clone(&self.sink),
            );

            let spawned = std::thread::Builder::new()
                .name(format!("worker-{idx}"))
                .spawn(move || {
                    let _guard = guard;
                    let report = worker.run(tick_at);
                    log_report(tick, &report);
                    report
                });

            match spawned {
                Ok(handle) => {
                    handles.push(handle);
                    started += 1;
                }
                Err(e) => error!(tick, target_name = %target, "Failed to spawn worker: {}", e),
            }
        }

        (started, skipped)
    }

    /// Waits up to the drain timeout for workers. Returns how many were
    /// still running and got abandoned.
    fn drain(&self, handles: Vec<JoinHandle<WorkerReport>>) -> usize {
        let pending = handles.iter().filter(|h| !h.is_finished()).count();
        if pending > 0 {
            info!(
                "Waiting up to {:?} for {} in-flight workers",
                self.drain_timeout, pending
            );
        }

        let deadline = Instant::now() + self.drain_timeout;
        while Instant::now() < deadline && handles.iter().any(|h| !h.is_finished()) {
            std::thread::sleep(Duration::from_millis(10));
        }

        let mut abandoned = 0;
        for handle in handles {
            if handle.is_finished() {
                if handle.join().is_err() {
                    error!("Worker thread panicked");
                }
            } else {
                abandoned += 1;
            }
        }

        if abandoned > 0 {
            warn!("Abandoned {} workers still running after drain timeout", abandoned);
        }
        abandoned
    }
}

/// Decrements a target's running-worker count when the worker ends,
/// including by panic or failed spawn.
struct ActiveGuard(Arc<AtomicUsize>);

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

fn log_report(tick: u64, report: &WorkerReport) {
    for e in &report.errors {
        match e {
            CollectError::Connection { .. } => {
                error!(tick, target_name = %report.target, kind = e.kind(), "{}", e)
            }
            _ => warn!(tick, target_name = %report.target, kind = e.kind(), "{}", e),
        }
    }

    if report.connected {
        info!(
            tick,
            target_name = %report.target,
            metrics = report.metrics_completed,
            rows = report.rows,
            published = report.published,
            errors = report.errors.len(),
            elapsed_ms = report.elapsed.as_millis() as u64,
            "Target collected"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::MetricDefinition;
    use crate::driver::mock::{MockDriver, MockResult, MockTarget};
    use crate::event::RawValue;
    use crate::sink::MemorySink;

    fn scheduler(driver: &MockDriver, targets: &[&str], sink: &Arc<MemorySink>) -> Scheduler {
        let catalog = MetricCatalog::new(vec![MetricDefinition::new("m", "q")]).unwrap();
        Scheduler::new(
            targets.iter().map(|t| Target::new(*t)).collect(),
            Arc::new(catalog),
            Arc::new(driver.clone()),
            Arc::clone(sink) as SinkHandle,
        )
    }

    fn one_row() -> MockResult {
        MockResult::new(&["N"]).row(vec![RawValue::Int(1)])
    }

    #[test]
    fn overlap_policy_parses() {
        assert_eq!("allow".parse::<OverlapPolicy>(), Ok(OverlapPolicy::Allow));
        assert_eq!(" Skip ".parse::<OverlapPolicy>(), Ok(OverlapPolicy::Skip));
        assert!("sometimes".parse::<OverlapPolicy>().is_err());
    }

    #[test]
    fn collect_once_runs_every_target() {
        let driver = MockDriver::new()
            .with_target("a", MockTarget::new().with_result("q", one_row()))
            .with_target("b", MockTarget::new().with_result("q", one_row()));
        let sink = Arc::new(MemorySink::new());

        let reports = scheduler(&driver, &["a", "b"], &sink).collect_once();

        assert_eq!(reports.len(), 2);
        assert_eq!(sink.len(), 2);
        assert_eq!(driver.opened(), 2);
        assert_eq!(driver.closed(), 2);
    }

    #[test]
    fn unreachable_target_is_retried_on_the_next_tick() {
        let driver = MockDriver::new()
            .with_target("down", MockTarget::unreachable("connection refused"))
            .with_target("up", MockTarget::new().with_result("q", one_row()));
        let sink = Arc::new(MemorySink::new());
        let scheduler = scheduler(&driver, &["down", "up"], &sink);

        for _ in 0..2 {
            let reports = scheduler.collect_once();
            let down = reports.iter().find(|r| r.target == "down").unwrap();
            assert_eq!(down.errors.len(), 1);
            assert_eq!(down.errors[0].kind(), "connection");
            assert_eq!(down.published, 0);
        }
        assert_eq!(sink.len(), 2);
    }

    #[test]
    fn run_ticks_until_stopped() {
        let driver = MockDriver::new().with_target("a", MockTarget::new().with_result("q", one_row()));
        let sink = Arc::new(MemorySink::new());
        let scheduler = scheduler(&driver, &["a"], &sink).with_period(Duration::from_millis(20));
        let running = Arc::new(AtomicBool::new(true));

        let stopper = {
            let running = Arc::clone(&running);
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(150));
                running.store(false, Ordering::SeqCst);
            })
        };
        let summary = scheduler.run(&running);
        stopper.join().unwrap();

        assert!(summary.ticks >= 2, "ticks: {}", summary.ticks);
        assert_eq!(summary.workers_abandoned, 0);
        assert_eq!(sink.len() as u64, summary.ticks);
    }

    #[test]
    fn skip_policy_does_not_overlap_a_busy_target() {
        let driver = MockDriver::new().with_target(
            "slow",
            MockTarget::new()
                .with_result("q", one_row())
                .with_delay(Duration::from_millis(400)),
        );
        let sink = Arc::new(MemorySink::new());
        let scheduler = scheduler(&driver, &["slow"], &sink)
            .with_period(Duration::from_millis(20))
            .with_overlap(OverlapPolicy::Skip)
            .with_drain_timeout(Duration::from_secs(5));
        let running = Arc::new(AtomicBool::new(true));

        let stopper = {
            let running = Arc::clone(&running);
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(150));
                running.store(false, Ordering::SeqCst);
            })
        };
        let summary = scheduler.run(&running);
        stopper.join().unwrap();

        assert_eq!(summary.workers_started, 1);
        assert!(summary.workers_skipped >= 1);
        assert_eq!(driver.opened(), 1);
        assert_eq!(driver.closed(), 1);
    }

    #[test]
    fn allow_policy_overlaps_a_busy_target() {
        let driver = MockDriver::new().with_target(
            "slow",
            MockTarget::new()
                .with_result("q", one_row())
                .with_delay(Duration::from_millis(300)),
        );
        let sink = Arc::new(MemorySink::new());
        let scheduler = scheduler(&driver, &["slow"], &sink)
            .with_period(Duration::from_millis(20))
            .with_drain_timeout(Duration::from_secs(5));
        let running = Arc::new(AtomicBool::new(true));

        let stopper = {
            let running = Arc::clone(&running);
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(150));
                running.store(false, Ordering::SeqCst);
            })
        };
        let summary = scheduler.run(&running);
        stopper.join().unwrap();

        assert!(summary.workers_started >= 2);
        assert_eq!(summary.workers_skipped, 0);
        assert_eq!(summary.workers_abandoned, 0);
        assert_eq!(sink.len(), summary.workers_started);
        assert_eq!(driver.closed(), summary.workers_started);
    }

    #[test]
    fn drain_timeout_abandons_slow_workers() {
        let driver = MockDriver::new().with_target(
            "slow",
            MockTarget::new()
                .with_result("q", one_row())
                .with_delay(Duration::from_secs(2)),
        );
        let sink = Arc::new(MemorySink::new());
        let scheduler = scheduler(&driver, &["slow"], &sink)
            .with_period(Duration::from_secs(60))
            .with_drain_timeout(Duration::from_millis(50));
        let running = Arc::new(AtomicBool::new(true));

        let stopper = {
            let running = Arc::clone(&running);
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(100));
                running.store(false, Ordering::SeqCst);
            })
        };
        let summary = scheduler.run(&running);
        stopper.join().unwrap();

        assert_eq!(summary.ticks, 1);
        assert_eq!(summary.workers_abandoned, 1);
    }
}
