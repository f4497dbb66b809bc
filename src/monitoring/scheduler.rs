//! Keeps exactly one periodic timer per active task.
//!
//! Each timer fires ticks; each tick hands a check to its own tokio task,
//! so a slow page never delays other timers or reconciliation. A check
//! still in flight for a task makes further ticks of that task no-ops,
//! across timer replacements as well.

use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{Mutex, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at, timeout};
use tracing::{debug, error, info, warn};

use super::runner::CheckOutcome;
use super::store::{StoreError, TaskStore};

/// Executes one check of one task.
#[async_trait]
pub trait CheckRunner: Send + Sync + 'static {
    async fn run_check(&self, task_id: i32) -> CheckOutcome;
}

/// When a newly created timer fires for the first time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FirstCheck {
    /// One full interval after the timer was created.
    #[default]
    AfterInterval,
    Immediate,
}

#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub reconcile_interval: Duration,
    pub first_check: FirstCheck,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            reconcile_interval: Duration::from_secs(300),
            first_check: FirstCheck::AfterInterval,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub added: usize,
    pub updated: usize,
    pub removed: usize,
}

impl ReconcileReport {
    pub fn is_empty(&self) -> bool {
        self.added == 0 && self.updated == 0 && self.removed == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    Running,
    Stopped,
}

struct TimerEntry {
    period: Duration,
    handle: JoinHandle<()>,
    shutdown_tx: oneshot::Sender<()>,
}

impl TimerEntry {
    fn cancel(self) {
        let _ = self.shutdown_tx.send(());
        self.handle.abort();
    }
}

struct Timers {
    state: State,
    entries: HashMap<i32, TimerEntry>,
    reconcile_loop: Option<(JoinHandle<()>, oneshot::Sender<()>)>,
}

/// Starts runs and tracks which tasks have one in flight.
struct Dispatcher {
    runner: Arc<dyn CheckRunner>,
    in_flight: DashMap<i32, ()>,
    active_runs: watch::Sender<usize>,
}

struct RunGuard {
    dispatcher: Arc<Dispatcher>,
    task_id: i32,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.dispatcher.in_flight.remove(&self.task_id);
        self.dispatcher.active_runs.send_modify(|n| *n -= 1);
    }
}

impl Dispatcher {
    /// Returns `false` when a run for `task_id` is already in flight.
    fn dispatch(self: &Arc<Self>, task_id: i32) -> bool {
        if self.in_flight.insert(task_id, ()).is_some() {
            debug!(task_id, "Previous check still running, tick dropped.");
            return false;
        }
        self.active_runs.send_modify(|n| *n += 1);
        let guard = RunGuard {
            dispatcher: self.clone(),
            task_id,
        };
        tokio::spawn(async move {
            let outcome = guard.dispatcher.runner.run_check(task_id).await;
            debug!(task_id, ?outcome, "Check finished.");
            drop(guard);
        });
        true
    }
}

fn spawn_timer(
    dispatcher: Arc<Dispatcher>,
    task_id: i32,
    period: Duration,
    first_check: FirstCheck,
) -> TimerEntry {
    let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();
    let start = match first_check {
        FirstCheck::AfterInterval => Instant::now() + period,
        FirstCheck::Immediate => Instant::now(),
    };
    let handle = tokio::spawn(async move {
        let mut ticker = interval_at(start, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown_rx => break,
                _ = ticker.tick() => {
                    dispatcher.dispatch(task_id);
                }
            }
        }
        debug!(task_id, "Timer stopped.");
    });
    TimerEntry {
        period,
        handle,
        shutdown_tx,
    }
}

pub struct MonitorScheduler {
    store: Arc<dyn TaskStore>,
    dispatcher: Arc<Dispatcher>,
    settings: SchedulerSettings,
    /// Never held across an await, so `stop` is never stuck behind the store.
    timers: Mutex<Timers>,
    /// Serializes store reads with applying them to `timers`.
    refresh: Mutex<()>,
}

impl MonitorScheduler {
    pub fn new(
        store: Arc<dyn TaskStore>,
        runner: Arc<dyn CheckRunner>,
        settings: SchedulerSettings,
    ) -> Self {
        let (active_runs, _) = watch::channel(0);
        Self {
            store,
            dispatcher: Arc::new(Dispatcher {
                runner,
                in_flight: DashMap::new(),
                active_runs,
            }),
            settings,
            timers: Mutex::new(Timers {
                state: State::Idle,
                entries: HashMap::new(),
                reconcile_loop: None,
            }),
            refresh: Mutex::new(()),
        }
    }

    /// Loads active tasks, creates their timers and starts the periodic
    /// reconcile loop. Calling it again while running is a no-op.
    ///
    /// A store failure here is fatal to startup and leaves the scheduler
    /// idle.
    pub async fn start(self: &Arc<Self>) -> Result<ReconcileReport, StoreError> {
        {
            let mut timers = self.timers.lock().await;
            match timers.state {
                State::Idle => timers.state = State::Running,
                State::Running => return Ok(ReconcileReport::default()),
                State::Stopped => {
                    warn!("Scheduler was stopped and cannot be restarted.");
                    return Ok(ReconcileReport::default());
                }
            }
        }

        let report = match self.reconcile().await {
            Ok(report) => report,
            Err(e) => {
                let mut timers = self.timers.lock().await;
                if timers.state == State::Running {
                    timers.state = State::Idle;
                }
                return Err(e);
            }
        };

        let mut timers = self.timers.lock().await;
        if timers.state == State::Running {
            timers.reconcile_loop = Some(self.spawn_reconcile_loop());
        }
        info!(
            timers = timers.entries.len(),
            reconcile_interval = ?self.settings.reconcile_interval,
            "Scheduler started."
        );
        Ok(report)
    }

    fn spawn_reconcile_loop(self: &Arc<Self>) -> (JoinHandle<()>, oneshot::Sender<()>) {
        let weak: Weak<Self> = Arc::downgrade(self);
        let period = self.settings.reconcile_interval;
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();
        let handle = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    biased;
                    _ = &mut shutdown_rx => break,
                    _ = ticker.tick() => {
                        let Some(scheduler) = weak.upgrade() else { break };
                        match scheduler.reconcile().await {
                            Ok(report) if report.is_empty() => {
                                debug!("Periodic reconcile found nothing to change.");
                            }
                            Ok(report) => info!(
                                added = report.added,
                                updated = report.updated,
                                removed = report.removed,
                                "Periodic reconcile adjusted timers."
                            ),
                            Err(e) => error!(error = %e, "Periodic reconcile failed."),
                        }
                    }
                }
            }
            debug!("Reconcile loop stopped.");
        });
        (handle, shutdown_tx)
    }

    /// Cancels all timers and the reconcile loop. Checks already running
    /// are left to finish.
    pub async fn stop(&self) {
        let mut timers = self.timers.lock().await;
        if timers.state == State::Stopped {
            return;
        }
        timers.state = State::Stopped;
        if let Some((handle, shutdown_tx)) = timers.reconcile_loop.take() {
            let _ = shutdown_tx.send(());
            handle.abort();
        }
        let cancelled = timers.entries.len();
        for (_, entry) in timers.entries.drain() {
            entry.cancel();
        }
        info!(cancelled, in_flight = self.in_flight_count(), "Scheduler stopped.");
    }

    /// Waits until no check is running, at most `deadline`. Returns `true`
    /// when every run finished in time.
    pub async fn drain(&self, deadline: Duration) -> bool {
        let mut active = self.dispatcher.active_runs.subscribe();
        match timeout(deadline, active.wait_for(|n| *n == 0)).await {
            Ok(_) => true,
            Err(_) => {
                warn!(
                    in_flight = self.in_flight_count(),
                    "Checks still running after the shutdown deadline."
                );
                false
            }
        }
    }

    pub async fn shutdown(&self, deadline: Duration) -> bool {
        self.stop().await;
        self.drain(deadline).await
    }

    /// Brings the timer set in line with the active tasks in the store.
    pub async fn reconcile(&self) -> Result<ReconcileReport, StoreError> {
        let _refresh = self.refresh.lock().await;
        if !self.is_running().await {
            return Ok(ReconcileReport::default());
        }

        let desired: HashMap<i32, Duration> = self
            .store
            .list_active_tasks()
            .await?
            .iter()
            .map(|task| (task.id, task.interval()))
            .collect();

        let mut timers = self.timers.lock().await;
        if timers.state != State::Running {
            debug!("Scheduler stopped during reconcile, result discarded.");
            return Ok(ReconcileReport::default());
        }
        let mut report = ReconcileReport::default();

        let stale: HashSet<i32> = timers
            .entries
            .keys()
            .filter(|id| !desired.contains_key(id))
            .copied()
            .collect();
        for task_id in stale {
            if let Some(entry) = timers.entries.remove(&task_id) {
                entry.cancel();
                report.removed += 1;
                info!(task_id, "Timer removed.");
            }
        }

        for (task_id, period) in desired {
            match timers.entries.get(&task_id).map(|entry| entry.period) {
                Some(current) if current == period => {}
                Some(_) => {
                    self.replace_timer(&mut timers, task_id, period);
                    report.updated += 1;
                }
                None => {
                    self.replace_timer(&mut timers, task_id, period);
                    report.added += 1;
                }
            }
        }

        Ok(report)
    }

    /// Re-reads one task and creates, replaces or removes its timer.
    pub async fn notify_task_changed(&self, task_id: i32) -> Result<(), StoreError> {
        let _refresh = self.refresh.lock().await;
        if !self.is_running().await {
            return Ok(());
        }

        let task = self.store.get_task(task_id).await?;
        let mut timers = self.timers.lock().await;
        if timers.state != State::Running {
            return Ok(());
        }
        match task {
            Some(task) if task.is_active => {
                let period = task.interval();
                let unchanged = timers
                    .entries
                    .get(&task_id)
                    .is_some_and(|entry| entry.period == period);
                if !unchanged {
                    self.replace_timer(&mut timers, task_id, period);
                }
            }
            _ => {
                if let Some(entry) = timers.entries.remove(&task_id) {
                    entry.cancel();
                    info!(task_id, "Timer removed.");
                }
            }
        }
        Ok(())
    }

    async fn is_running(&self) -> bool {
        self.timers.lock().await.state == State::Running
    }

    fn replace_timer(&self, timers: &mut Timers, task_id: i32, period: Duration) {
        if let Some(old) = timers.entries.remove(&task_id) {
            old.cancel();
        }
        let entry = spawn_timer(
            self.dispatcher.clone(),
            task_id,
            period,
            self.settings.first_check,
        );
        timers.entries.insert(task_id, entry);
        info!(task_id, interval = ?period, "Timer scheduled.");
    }

    /// Starts a check right away unless one is already running for the task.
    pub async fn trigger(&self, task_id: i32) -> bool {
        if self.timers.lock().await.state == State::Stopped {
            return false;
        }
        self.dispatcher.dispatch(task_id)
    }

    /// Task ids with a live timer and their periods, ordered by id.
    pub async fn scheduled_tasks(&self) -> Vec<(i32, Duration)> {
        let timers = self.timers.lock().await;
        let mut scheduled: Vec<(i32, Duration)> = timers
            .entries
            .iter()
            .map(|(id, entry)| (*id, entry.period))
            .collect();
        scheduled.sort_unstable_by_key(|(id, _)| *id);
        scheduled
    }

    pub fn is_check_running(&self, task_id: i32) -> bool {
        self.dispatcher.in_flight.contains_key(&task_id)
    }

    pub fn in_flight_count(&self) -> usize {
        self.dispatcher.in_flight.len()
    }
}

impl Drop for MonitorScheduler {
    fn drop(&mut self) {
        let timers = self.timers.get_mut();
        if let Some((handle, _)) = timers.reconcile_loop.take() {
            handle.abort();
        }
        for (_, entry) in timers.entries.drain() {
            entry.cancel();
        }
    }
}
