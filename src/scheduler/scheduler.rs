//! # Hierarchical task scheduler.
//!
//! Four priority queues serviced by a fixed worker pool, plus a deadline
//! monitor and a time-awareness loop.
//!
//! ## Architecture
//! ```text
//! task.enqueue ──► enqueue loop ──► enqueue_task() ──► [CRITICAL][HIGH][NORMAL][LOW]
//!                                                            │ pop highest non-empty
//!                                                            ▼
//!                                           worker 0..N ── CRITICAL over ceiling? ── re-queue + back off
//!                                                            │
//!                                      publish task.execute.<handler>
//!                                                            │
//!                          ┌─────────────── local Handler? ──┴── no ──► wait task.result (timeout)
//!                          ▼                                                    │
//!                  run_once (timeout, catch_unwind) ◄───────────────────────────┘
//!                          │
//!        ┌─────────────────┼──────────────────────────┐
//!        ▼                 ▼                          ▼
//!  task.completed    task.failed (terminal)    task.failed + will_retry
//!                                               (CRITICAL, retryable, < max) ──► backoff ──► CRITICAL queue
//!
//! monitor loop:  overdue QUEUED tasks ──► CRITICAL (task.escalated), preemption telemetry (task.preemption)
//! clock loop:    recurring jobs ──► new instance; maintenance schedules ──► once per day/week
//! ```
//!
//! ## Rules
//! - Queue state lives behind one mutex, never held across an await.
//! - A task is escalated at most once; CRITICAL tasks are never "escalated".
//! - Only CRITICAL failures that are retryable are retried, at most `max_critical_retries` times.
//! - Escalation is also applied right before every pop, so an overdue task is
//!   CRITICAL by its next dispatch opportunity even between monitor ticks.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use tokio::sync::{Notify, oneshot};
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::config::SchedulerConfig;
use super::handler::HandlerRef;
use super::maintenance::MaintenanceSchedule;
use super::queue::{Entry, PriorityQueues};
use super::runner::run_once;
use super::task::{TaskId, TaskRecord, TaskRequest, TaskStatus};
use crate::bus::body::{Preemption, TaskExecute, TaskResult};
use crate::bus::{Body, MessageBus, Priority, Subscription, topics};
use crate::error::{BusError, SchedulerError, TaskError};
use crate::runtime::LoopHandle;

/// Bus principal of the scheduler.
pub const SCHEDULER_SOURCE: &str = "scheduler";

/// Counters and gauges exposed by [`Scheduler::stats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    /// Queue depth, indexed by [`Priority::index`].
    pub queued: [usize; 4],
    /// Running tasks, indexed by [`Priority::index`].
    pub running: [usize; 4],
    pub completed: u64,
    pub failed: u64,
    pub retried: u64,
    pub escalated: u64,
    pub rejected: u64,
    pub cancelled: u64,
    pub deferred: u64,
    /// Monitor ticks that saw CRITICAL work waiting behind running NORMAL/LOW tasks.
    pub preemption_signals: u64,
    pub recurring_jobs: usize,
}

impl SchedulerStats {
    pub fn queued(&self, priority: Priority) -> usize {
        self.queued[priority.index()]
    }

    pub fn running(&self, priority: Priority) -> usize {
        self.running[priority.index()]
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct Counters {
    completed: u64,
    failed: u64,
    retried: u64,
    escalated: u64,
    rejected: u64,
    cancelled: u64,
    deferred: u64,
    preemption_signals: u64,
}

#[derive(Debug)]
struct RecurringJob {
    request: TaskRequest,
    interval: Duration,
    last_run: Instant,
    current: TaskId,
}

/// A message to publish once the state lock is released.
struct Notice {
    topic: &'static str,
    body: Body,
    priority: Priority,
    correlation: Option<Uuid>,
}

impl Notice {
    fn outcome(topic: &'static str, rec: &TaskRecord, will_retry: bool, took: Option<Duration>) -> Self {
        Self {
            topic,
            body: Body::TaskOutcome(rec.outcome(will_retry, took)),
            priority: rec.priority,
            correlation: rec.correlation_id,
        }
    }
}

#[derive(Default)]
struct State {
    queues: PriorityQueues,
    tasks: HashMap<TaskId, TaskRecord>,
    history: VecDeque<TaskId>,
    running: [usize; 4],
    recurring: HashMap<TaskId, RecurringJob>,
    maintenance: Vec<MaintenanceSchedule>,
    next_seq: u64,
    counters: Counters,
}

impl State {
    fn insert(&mut self, id: TaskId, req: &TaskRequest, now: Instant) -> &mut TaskRecord {
        self.next_seq += 1;
        let rec = TaskRecord::new(id, req, self.next_seq, now);
        self.queues.push(
            rec.priority,
            Entry {
                id,
                deadline: rec.deadline,
                seq: rec.seq,
            },
        );
        self.tasks.entry(id).or_insert(rec)
    }

    /// Queues `req` unless its priority queue already holds `limit` tasks.
    ///
    /// A refused request is counted and comes back as a cancelled record with the limit.
    fn admit(
        &mut self,
        id: TaskId,
        req: &TaskRequest,
        now: Instant,
        limit: Option<usize>,
    ) -> Result<&mut TaskRecord, (TaskRecord, usize)> {
        if let Some(capacity) = limit {
            if self.queues.len(req.priority) >= capacity {
                self.counters.rejected += 1;
                let mut rec = TaskRecord::new(id, req, 0, now);
                rec.status = TaskStatus::Cancelled;
                rec.error = Some(format!("{} queue full", req.priority));
                warn!(task_id = %id, handler = %req.handler, priority = %req.priority, "task rejected: queue full");
                return Err((rec, capacity));
            }
        }
        Ok(self.insert(id, req, now))
    }

    /// Records a terminal task in the bounded history, evicting the oldest.
    fn retire(&mut self, id: TaskId, limit: usize) {
        self.history.push_back(id);
        while self.history.len() > limit {
            if let Some(old) = self.history.pop_front() {
                self.tasks.remove(&old);
            }
        }
    }

    fn escalate_overdue(&mut self, now: Instant) -> Vec<Notice> {
        let overdue: Vec<(TaskId, Priority)> = self
            .tasks
            .values()
            .filter(|r| r.is_overdue(now) && !r.escalated && r.priority != Priority::Critical)
            .map(|r| (r.id, r.priority))
            .collect();

        let mut notices = Vec::with_capacity(overdue.len());
        for (id, from) in overdue {
            if !self.queues.promote(from, id) {
                continue;
            }
            let Some(rec) = self.tasks.get_mut(&id) else {
                continue;
            };
            rec.priority = Priority::Critical;
            rec.escalated = true;
            self.counters.escalated += 1;
            warn!(task_id = %id, from = %from, handler = %rec.handler, "deadline missed; escalated to critical");
            notices.push(Notice {
                priority: Priority::High,
                ..Notice::outcome(topics::TASK_ESCALATED, rec, false, None)
            });
        }
        notices
    }

    fn preemption(&mut self, threshold: usize) -> Option<Notice> {
        let waiting_critical = self.queues.len(Priority::Critical);
        let running_normal_low =
            self.running[Priority::Normal.index()] + self.running[Priority::Low.index()];
        if waiting_critical == 0 || running_normal_low < threshold.max(1) {
            return None;
        }
        self.counters.preemption_signals += 1;
        debug!(waiting_critical, running_normal_low, "critical work waiting behind normal/low tasks");
        Some(Notice {
            topic: topics::TASK_PREEMPTION,
            body: Body::Preemption(Preemption {
                waiting_critical,
                running_normal_low,
            }),
            priority: Priority::High,
            correlation: None,
        })
    }
}

enum Pick {
    Run(TaskRecord),
    Throttled,
}

struct Shared {
    bus: MessageBus,
    cfg: SchedulerConfig,
    state: Mutex<State>,
    handlers: RwLock<HashMap<String, HandlerRef>>,
    pending: Mutex<HashMap<TaskId, oneshot::Sender<TaskResult>>>,
    notify: Notify,
    closed: AtomicBool,
}

/// Cloneable handle to the scheduler.
#[derive(Clone)]
pub struct Scheduler {
    shared: Arc<Shared>,
}

impl Scheduler {
    pub fn new(bus: MessageBus, cfg: SchedulerConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                bus,
                cfg,
                state: Mutex::new(State::default()),
                handlers: RwLock::new(HashMap::new()),
                pending: Mutex::new(HashMap::new()),
                notify: Notify::new(),
                closed: AtomicBool::new(false),
            }),
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.shared.cfg
    }

    /// Registers an in-process executor, replacing any handler with the same name.
    pub fn register_handler(&self, handler: HandlerRef) -> Option<HandlerRef> {
        let name = handler.name().to_string();
        self.shared.handlers.write().insert(name, handler)
    }

    /// Queues a task (and registers a recurring job when `req.interval` is set).
    ///
    /// # Errors
    /// - [`SchedulerError::Closed`] after shutdown
    /// - [`SchedulerError::QueueFull`] when the target queue is at `max_queued`
    ///   (a `task.rejected` message is published as well)
    pub fn enqueue_task(&self, req: TaskRequest) -> Result<TaskId, SchedulerError> {
        self.shared.enqueue(req)
    }

    /// QUEUED → CANCELLED.
    pub fn cancel_task(&self, id: TaskId) -> Result<(), SchedulerError> {
        self.shared.park(id, TaskStatus::Cancelled)
    }

    /// QUEUED → DEFERRED.
    pub fn defer_task(&self, id: TaskId) -> Result<(), SchedulerError> {
        self.shared.park(id, TaskStatus::Deferred)
    }

    /// Stops re-enqueueing a recurring job (keyed by its first instance id).
    pub fn cancel_recurring(&self, job: TaskId) -> bool {
        self.shared.state.lock().recurring.remove(&job).is_some()
    }

    /// Registers a fixed-schedule maintenance job.
    pub fn add_maintenance(&self, schedule: MaintenanceSchedule) {
        self.shared.state.lock().maintenance.push(schedule);
    }

    /// Snapshot of a live or recently finished task.
    pub fn get_task(&self, id: TaskId) -> Option<TaskRecord> {
        self.shared.state.lock().tasks.get(&id).cloned()
    }

    pub fn stats(&self) -> SchedulerStats {
        let st = self.shared.state.lock();
        let c = st.counters;
        SchedulerStats {
            queued: st.queues.depths(),
            running: st.running,
            completed: c.completed,
            failed: c.failed,
            retried: c.retried,
            escalated: c.escalated,
            rejected: c.rejected,
            cancelled: c.cancelled,
            deferred: c.deferred,
            preemption_signals: c.preemption_signals,
            recurring_jobs: st.recurring.len(),
        }
    }

    /// Promotes overdue QUEUED tasks to CRITICAL. Returns how many moved.
    pub fn escalate_overdue(&self) -> usize {
        let notices = self.shared.state.lock().escalate_overdue(Instant::now());
        let n = notices.len();
        self.shared.publish_all(notices);
        n
    }

    /// Records one preemption signal if CRITICAL work waits behind NORMAL/LOW tasks.
    pub fn check_preemption(&self) -> bool {
        let notice = self
            .shared
            .state
            .lock()
            .preemption(self.shared.cfg.preemption_threshold);
        let hit = notice.is_some();
        self.shared.publish_all(notice.into_iter().collect());
        hit
    }

    /// Re-enqueues recurring jobs whose interval elapsed and whose last instance finished.
    pub fn tick_recurring(&self) -> Vec<TaskId> {
        self.shared.tick_recurring(Instant::now())
    }

    /// Enqueues maintenance jobs due at `now` that have not run in the current period.
    pub fn run_maintenance(&self, now: DateTime<Utc>) -> Vec<TaskId> {
        self.shared.run_maintenance(now)
    }

    /// Refuses further work. In-flight tasks are unaffected.
    pub fn close(&self) {
        self.shared.closed.store(true, Ordering::SeqCst);
    }

    /// Subscribes to `task.enqueue` / `task.result` and spawns all loops under `token`.
    pub fn start(&self, token: &CancellationToken) -> Result<Vec<LoopHandle>, BusError> {
        let bus = &self.shared.bus;
        let enqueue_sub = bus.subscribe(SCHEDULER_SOURCE, topics::TASK_ENQUEUE)?;
        let result_sub = bus.subscribe(SCHEDULER_SOURCE, topics::TASK_RESULT)?;

        let mut loops = Vec::with_capacity(self.shared.cfg.worker_count() + 4);
        let shared = &self.shared;
        loops.push(LoopHandle::spawn(
            "scheduler.enqueue",
            Arc::clone(shared).enqueue_loop(enqueue_sub, token.clone()),
        ));
        loops.push(LoopHandle::spawn(
            "scheduler.results",
            Arc::clone(shared).result_loop(result_sub, token.clone()),
        ));
        for idx in 0..shared.cfg.worker_count() {
            loops.push(LoopHandle::spawn(
                format!("scheduler.worker.{idx}"),
                Arc::clone(shared).worker_loop(idx, token.clone()),
            ));
        }
        loops.push(LoopHandle::spawn(
            "scheduler.monitor",
            Arc::clone(shared).monitor_loop(token.clone()),
        ));
        loops.push(LoopHandle::spawn(
            "scheduler.clock",
            Arc::clone(shared).clock_loop(token.clone()),
        ));
        info!(workers = shared.cfg.worker_count(), "scheduler started");
        Ok(loops)
    }
}

impl Shared {
    fn enqueue(&self, req: TaskRequest) -> Result<TaskId, SchedulerError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(SchedulerError::Closed);
        }
        let now = Instant::now();
        let id = Uuid::new_v4();
        let mut st = self.state.lock();

        let rec = match st.admit(id, &req, now, self.cfg.queue_limit()) {
            Ok(rec) => rec,
            Err((rejected, capacity)) => {
                drop(st);
                self.publish_all(vec![Notice::outcome(topics::TASK_REJECTED, &rejected, false, None)]);
                return Err(SchedulerError::QueueFull {
                    priority: req.priority,
                    capacity,
                });
            }
        };
        if let Some(interval) = req.interval {
            rec.recurring_id = Some(id);
            st.recurring.insert(
                id,
                RecurringJob {
                    request: req.clone(),
                    interval,
                    last_run: now,
                    current: id,
                },
            );
        }
        drop(st);

        debug!(task_id = %id, task_type = %req.task_type, handler = %req.handler, priority = %req.priority, "task queued");
        self.notify.notify_one();
        Ok(id)
    }

    fn park(&self, id: TaskId, to: TaskStatus) -> Result<(), SchedulerError> {
        let mut guard = self.state.lock();
        let st = &mut *guard;
        let rec = st
            .tasks
            .get_mut(&id)
            .ok_or(SchedulerError::NotFound { id })?;
        if rec.status != TaskStatus::Queued {
            return Err(SchedulerError::InvalidTransition {
                id,
                from: rec.status.as_str(),
                to: to.as_str(),
            });
        }
        rec.status = to;
        rec.completed_at = Some(Utc::now());
        let priority = rec.priority;
        st.queues.remove(priority, id);
        match to {
            TaskStatus::Deferred => st.counters.deferred += 1,
            _ => st.counters.cancelled += 1,
        }
        st.retire(id, self.cfg.history_limit);
        debug!(task_id = %id, status = %to, "task parked");
        Ok(())
    }

    /// Pops the next runnable task, escalating overdue work first.
    fn pick(&self, now: Instant) -> (Option<Pick>, Vec<Notice>) {
        let mut guard = self.state.lock();
        let st = &mut *guard;
        let notices = st.escalate_overdue(now);

        while let Some((priority, entry)) = st.queues.pop() {
            if priority == Priority::Critical {
                if let Some(cap) = self.cfg.critical_limit() {
                    if st.running[Priority::Critical.index()] >= cap {
                        st.queues.push(priority, entry);
                        return (Some(Pick::Throttled), notices);
                    }
                }
            }
            let Some(rec) = st.tasks.get_mut(&entry.id) else {
                continue;
            };
            if rec.status != TaskStatus::Queued {
                continue;
            }
            rec.status = TaskStatus::Running;
            rec.started_at = Some(Utc::now());
            st.running[priority.index()] += 1;
            return (Some(Pick::Run(rec.clone())), notices);
        }
        (None, notices)
    }

    async fn worker_loop(self: Arc<Self>, idx: usize, token: CancellationToken) {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let (pick, notices) = self.pick(Instant::now());
            self.publish_all(notices);

            match pick {
                Some(Pick::Run(rec)) => self.execute(rec, &token).await,
                Some(Pick::Throttled) => {
                    debug!(worker = idx, "critical ceiling reached; backing off");
                    tokio::select! {
                        _ = token.cancelled() => break,
                        _ = time::sleep(self.cfg.throttle_backoff) => {}
                    }
                }
                None => {
                    tokio::select! {
                        _ = token.cancelled() => break,
                        _ = &mut notified => {}
                    }
                }
            }
            if token.is_cancelled() {
                break;
            }
        }
        debug!(worker = idx, "worker stopped");
    }

    async fn execute(self: &Arc<Self>, rec: TaskRecord, token: &CancellationToken) {
        let exec = rec.execute_body();
        let started = Instant::now();
        let result = self.attempt(&rec, &exec, token).await;
        self.finish(rec.id, result, started.elapsed(), token);
    }

    /// Publishes `task.execute.<handler>` and obtains the attempt result.
    async fn attempt(
        &self,
        rec: &TaskRecord,
        exec: &TaskExecute,
        token: &CancellationToken,
    ) -> Result<(), TaskError> {
        let topic = topics::task_execute(&exec.handler);
        let local = self.handlers.read().get(&exec.handler).cloned();

        if let Some(handler) = local {
            self.dispatch(&topic, exec, rec.correlation_id);
            return run_once(handler.as_ref(), exec, token, self.cfg.timeout()).await;
        }
        if self.bus.consumer_count(&topic) == 0 {
            return Err(TaskError::NoExecutor {
                handler: exec.handler.clone(),
            });
        }

        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(exec.task_id, tx);
        self.dispatch(&topic, exec, rec.correlation_id);

        let timeout = self.cfg.reply_timeout();
        let res = tokio::select! {
            _ = token.cancelled() => Err(TaskError::Canceled),
            reply = time::timeout(timeout, rx) => match reply {
                Ok(Ok(reply)) => reply_result(reply),
                Ok(Err(_dropped)) => Err(TaskError::Canceled),
                Err(_elapsed) => Err(TaskError::Timeout { timeout }),
            },
        };
        self.pending.lock().remove(&exec.task_id);
        res
    }

    fn dispatch(&self, topic: &str, exec: &TaskExecute, correlation: Option<Uuid>) {
        debug!(task_id = %exec.task_id, topic, attempt = exec.attempt, "dispatching task");
        self.bus.publish(
            SCHEDULER_SOURCE,
            topic,
            Body::TaskExecute(exec.clone()),
            exec.priority,
            correlation,
        );
    }

    fn finish(
        self: &Arc<Self>,
        id: TaskId,
        result: Result<(), TaskError>,
        took: Duration,
        token: &CancellationToken,
    ) {
        let mut notices = Vec::new();
        let mut retry_after = None;
        {
            let mut guard = self.state.lock();
            let st = &mut *guard;
            let Some(rec) = st.tasks.get_mut(&id) else {
                return;
            };
            let slot = &mut st.running[rec.priority.index()];
            *slot = slot.saturating_sub(1);
            rec.completed_at = Some(Utc::now());

            match result {
                Ok(()) => {
                    rec.status = TaskStatus::Completed;
                    rec.error = None;
                    st.counters.completed += 1;
                    debug!(task_id = %id, handler = %rec.handler, took = ?took, "task completed");
                    notices.push(Notice::outcome(topics::TASK_COMPLETED, rec, false, Some(took)));
                }
                Err(TaskError::Canceled) => {
                    rec.status = TaskStatus::Cancelled;
                    rec.error = Some(TaskError::Canceled.to_string());
                    st.counters.cancelled += 1;
                    debug!(task_id = %id, "task cancelled in flight");
                }
                Err(e) => {
                    rec.error = Some(e.to_string());
                    let retry = rec.priority == Priority::Critical
                        && e.is_retryable()
                        && rec.retry_count < self.cfg.max_critical_retries;
                    if retry {
                        rec.retry_count += 1;
                        rec.status = TaskStatus::Queued;
                        rec.completed_at = None;
                        st.counters.retried += 1;
                        let delay = self.cfg.retry_backoff.next(rec.retry_count - 1);
                        retry_after = Some(delay);
                        info!(task_id = %id, handler = %rec.handler, retry = rec.retry_count, delay = ?delay, error = %e, "critical task failed; retrying");
                        let mut notice = Notice::outcome(topics::TASK_FAILED, rec, true, Some(took));
                        if let Body::TaskOutcome(outcome) = &mut notice.body {
                            outcome.status = TaskStatus::Failed;
                        }
                        notices.push(notice);
                    } else {
                        rec.status = TaskStatus::Failed;
                        st.counters.failed += 1;
                        warn!(task_id = %id, handler = %rec.handler, priority = %rec.priority, label = e.as_label(), error = %e, "task failed");
                        notices.push(Notice::outcome(topics::TASK_FAILED, rec, false, Some(took)));
                    }
                }
            }
            if retry_after.is_none() {
                st.retire(id, self.cfg.history_limit);
            }
        }

        self.publish_all(notices);
        if let Some(delay) = retry_after {
            let shared = Arc::clone(self);
            let token = token.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = token.cancelled() => {}
                    _ = time::sleep(delay) => shared.requeue(id),
                }
            });
        }
        self.notify.notify_one();
    }

    /// Puts a retried task back on the CRITICAL queue unless it was parked meanwhile.
    fn requeue(&self, id: TaskId) {
        let mut guard = self.state.lock();
        let st = &mut *guard;
        let Some(rec) = st.tasks.get(&id) else {
            return;
        };
        if rec.status != TaskStatus::Queued {
            return;
        }
        st.queues.push(
            Priority::Critical,
            Entry {
                id,
                deadline: rec.deadline,
                seq: rec.seq,
            },
        );
        drop(guard);
        self.notify.notify_one();
    }

    fn tick_recurring(&self, now: Instant) -> Vec<TaskId> {
        let mut guard = self.state.lock();
        let st = &mut *guard;
        let due: Vec<TaskId> = st
            .recurring
            .iter()
            .filter(|(_, job)| {
                now.duration_since(job.last_run) >= job.interval
                    && st
                        .tasks
                        .get(&job.current)
                        .is_none_or(|r| r.status.is_terminal())
            })
            .map(|(job_id, _)| *job_id)
            .collect();

        let limit = self.cfg.queue_limit();
        let mut spawned = Vec::with_capacity(due.len());
        let mut notices = Vec::new();
        for job_id in due {
            let Some(request) = st.recurring.get(&job_id).map(|j| j.request.clone()) else {
                continue;
            };
            let id = Uuid::new_v4();
            let admitted = match st.admit(id, &request, now, limit) {
                Ok(rec) => {
                    rec.recurring_id = Some(job_id);
                    true
                }
                Err((mut rejected, _)) => {
                    rejected.recurring_id = Some(job_id);
                    notices.push(Notice::outcome(topics::TASK_REJECTED, &rejected, false, None));
                    false
                }
            };
            // A rejected run is skipped; the job comes due again one interval later.
            if let Some(job) = st.recurring.get_mut(&job_id) {
                job.last_run = now;
                if admitted {
                    job.current = id;
                }
            }
            if admitted {
                debug!(job = %job_id, task_id = %id, handler = %request.handler, "recurring task re-enqueued");
                spawned.push(id);
            }
        }
        drop(guard);
        self.publish_all(notices);
        for _ in &spawned {
            self.notify.notify_one();
        }
        spawned
    }

    fn run_maintenance(&self, now: DateTime<Utc>) -> Vec<TaskId> {
        let mut guard = self.state.lock();
        let st = &mut *guard;
        let due: Vec<(String, TaskRequest)> = st
            .maintenance
            .iter_mut()
            .filter_map(|m| m.claim(now).then(|| (m.name.clone(), m.request.clone())))
            .collect();

        let at = Instant::now();
        let limit = self.cfg.queue_limit();
        let mut spawned = Vec::with_capacity(due.len());
        let mut notices = Vec::new();
        for (name, request) in due {
            let id = Uuid::new_v4();
            match st.admit(id, &request, at, limit) {
                Ok(_) => {
                    info!(job = %name, task_id = %id, "maintenance task enqueued");
                    spawned.push(id);
                }
                Err((rejected, _)) => {
                    warn!(job = %name, task_id = %id, "maintenance run skipped: queue full");
                    notices.push(Notice::outcome(topics::TASK_REJECTED, &rejected, false, None));
                }
            }
        }
        drop(guard);
        self.publish_all(notices);
        for _ in &spawned {
            self.notify.notify_one();
        }
        spawned
    }

    async fn enqueue_loop(self: Arc<Self>, sub: Subscription, token: CancellationToken) {
        loop {
            let msg = tokio::select! {
                _ = token.cancelled() => break,
                msg = sub.recv() => match msg {
                    Some(msg) => msg,
                    None => break,
                },
            };
            let Body::TaskEnqueue(req) = &msg.body else {
                continue;
            };
            let request = TaskRequest::from(req.clone()).with_correlation(msg.correlation_id);
            if let Err(e) = self.enqueue(request) {
                warn!(source = %msg.source, handler = %req.handler, label = e.as_label(), error = %e, "task.enqueue refused");
            }
        }
        self.closed.store(true, Ordering::SeqCst);
    }

    async fn result_loop(self: Arc<Self>, sub: Subscription, token: CancellationToken) {
        loop {
            let msg = tokio::select! {
                _ = token.cancelled() => break,
                msg = sub.recv() => match msg {
                    Some(msg) => msg,
                    None => break,
                },
            };
            let Body::TaskResult(reply) = &msg.body else {
                continue;
            };
            let waiter = self.pending.lock().remove(&reply.task_id);
            match waiter {
                Some(tx) => {
                    let _ = tx.send(reply.clone());
                }
                None => debug!(task_id = %reply.task_id, source = %msg.source, "unmatched task.result"),
            }
        }
    }

    async fn monitor_loop(self: Arc<Self>, token: CancellationToken) {
        let mut tick = time::interval(self.cfg.monitor_interval.max(Duration::from_millis(1)));
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = tick.tick() => {}
            }
            let notices = {
                let mut st = self.state.lock();
                let mut notices = st.escalate_overdue(Instant::now());
                notices.extend(st.preemption(self.cfg.preemption_threshold));
                notices
            };
            let escalated = notices.iter().any(|n| n.topic == topics::TASK_ESCALATED);
            self.publish_all(notices);
            if escalated {
                self.notify.notify_one();
            }
        }
    }

    async fn clock_loop(self: Arc<Self>, token: CancellationToken) {
        let mut tick = time::interval(self.cfg.time_tick.max(Duration::from_millis(1)));
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = tick.tick() => {}
            }
            self.tick_recurring(Instant::now());
            self.run_maintenance(Utc::now());
        }
    }

    fn publish_all(&self, notices: Vec<Notice>) {
        for n in notices {
            self.bus
                .publish(SCHEDULER_SOURCE, n.topic, n.body, n.priority, n.correlation);
        }
    }
}

fn reply_result(reply: TaskResult) -> Result<(), TaskError> {
    if reply.success {
        return Ok(());
    }
    let error = reply
        .error
        .unwrap_or_else(|| "executor reported failure".to_string());
    if reply.fatal {
        Err(TaskError::fatal(error))
    } else {
        Err(TaskError::fail(error))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{BusConfig, Message};
    use crate::scheduler::HandlerFn;
    use std::sync::atomic::AtomicU32;

    fn setup(cfg: SchedulerConfig) -> (MessageBus, Scheduler) {
        let bus = MessageBus::new(BusConfig::default());
        let sched = Scheduler::new(bus.clone(), cfg);
        (bus, sched)
    }

    fn outcome(msg: &Message) -> &crate::bus::body::TaskOutcome {
        match &msg.body {
            Body::TaskOutcome(o) => o,
            other => panic!("unexpected body {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn overdue_task_escalates_once() {
        let (bus, sched) = setup(SchedulerConfig::default());
        let escalations = bus.subscribe("t", topics::TASK_ESCALATED).unwrap();
        let id = sched
            .enqueue_task(TaskRequest::new("t", "h").with_deadline(Duration::from_secs(10)))
            .unwrap();

        assert_eq!(sched.escalate_overdue(), 0);
        time::advance(Duration::from_secs(11)).await;
        assert_eq!(sched.escalate_overdue(), 1);
        assert_eq!(sched.escalate_overdue(), 0);

        let rec = sched.get_task(id).unwrap();
        assert_eq!(rec.priority, Priority::Critical);
        assert_eq!(rec.original_priority, Priority::Normal);
        assert!(rec.escalated);
        assert_eq!(sched.stats().queued(Priority::Critical), 1);
        assert_eq!(sched.stats().escalated, 1);
        assert_eq!(escalations.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn already_critical_tasks_are_not_escalated() {
        let (_bus, sched) = setup(SchedulerConfig::default());
        sched
            .enqueue_task(
                TaskRequest::new("t", "h")
                    .with_priority(Priority::Critical)
                    .with_deadline(Duration::from_secs(1)),
            )
            .unwrap();
        time::advance(Duration::from_secs(2)).await;
        assert_eq!(sched.escalate_overdue(), 0);
        assert_eq!(sched.stats().escalated, 0);
    }

    #[tokio::test]
    async fn cancel_and_defer_only_from_queued() {
        let (_bus, sched) = setup(SchedulerConfig::default());
        let a = sched.enqueue_task(TaskRequest::new("t", "h")).unwrap();
        let b = sched.enqueue_task(TaskRequest::new("t", "h")).unwrap();

        sched.cancel_task(a).unwrap();
        sched.defer_task(b).unwrap();
        assert_eq!(sched.get_task(a).unwrap().status, TaskStatus::Cancelled);
        assert_eq!(sched.get_task(b).unwrap().status, TaskStatus::Deferred);
        assert_eq!(sched.stats().queued(Priority::Normal), 0);

        let err = sched.cancel_task(b).unwrap_err();
        assert_eq!(
            err,
            SchedulerError::InvalidTransition {
                id: b,
                from: "deferred",
                to: "cancelled"
            }
        );
        assert!(matches!(
            sched.cancel_task(Uuid::new_v4()),
            Err(SchedulerError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn bounded_queue_rejects_and_reports() {
        let (bus, sched) = setup(SchedulerConfig {
            max_queued: 1,
            ..SchedulerConfig::default()
        });
        let rejected = bus.subscribe("t", topics::TASK_REJECTED).unwrap();
        sched.enqueue_task(TaskRequest::new("t", "h")).unwrap();
        let err = sched.enqueue_task(TaskRequest::new("t", "h")).unwrap_err();
        assert!(matches!(err, SchedulerError::QueueFull { capacity: 1, .. }));
        assert_eq!(rejected.len(), 1);
        // other priorities are independent
        sched
            .enqueue_task(TaskRequest::new("t", "h").with_priority(Priority::Low))
            .unwrap();
    }

    #[tokio::test]
    async fn closed_scheduler_refuses_work() {
        let (_bus, sched) = setup(SchedulerConfig::default());
        sched.close();
        assert_eq!(
            sched.enqueue_task(TaskRequest::new("t", "h")),
            Err(SchedulerError::Closed)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn preemption_signal_needs_waiting_critical_and_busy_workers() {
        let (bus, sched) = setup(SchedulerConfig {
            workers: 2,
            critical_cap: 0,
            ..SchedulerConfig::default()
        });
        let gate = Arc::new(Notify::new());
        let g = gate.clone();
        sched.register_handler(HandlerFn::arc("slow", move |_t: TaskExecute, _c: CancellationToken| {
            let g = g.clone();
            async move {
                g.notified().await;
                Ok::<(), TaskError>(())
            }
        }));
        let preemptions = bus.subscribe("t", topics::TASK_PREEMPTION).unwrap();
        let token = CancellationToken::new();
        let _loops = sched.start(&token).unwrap();

        sched.enqueue_task(TaskRequest::new("t", "slow").with_priority(Priority::Low)).unwrap();
        sched.enqueue_task(TaskRequest::new("t", "slow").with_priority(Priority::Normal)).unwrap();
        time::sleep(Duration::from_millis(10)).await;
        assert!(!sched.check_preemption());

        sched.enqueue_task(TaskRequest::new("t", "slow").with_priority(Priority::Critical)).unwrap();
        time::sleep(Duration::from_millis(10)).await;
        assert_eq!(sched.stats().queued(Priority::Critical), 1);
        assert!(sched.check_preemption());
        assert_eq!(sched.stats().preemption_signals, 1);
        let signal = preemptions.try_recv().unwrap();
        assert_eq!(
            signal.body,
            Body::Preemption(Preemption {
                waiting_critical: 1,
                running_normal_low: 2
            })
        );
        token.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn external_executor_reply_completes_task() {
        let (bus, sched) = setup(SchedulerConfig::default());
        let executor = bus.subscribe("pipeline", "task.execute.*").unwrap();
        let done = bus.subscribe("t", topics::TASK_COMPLETED).unwrap();
        let token = CancellationToken::new();
        let _loops = sched.start(&token).unwrap();

        let id = sched.enqueue_task(TaskRequest::new("ingest", "pipeline")).unwrap();
        let msg = executor.recv().await.unwrap();
        assert_eq!(msg.topic, "task.execute.pipeline");
        bus.publish(
            "pipeline",
            topics::TASK_RESULT,
            Body::TaskResult(TaskResult {
                task_id: id,
                success: true,
                error: None,
                fatal: false,
            }),
            Priority::Normal,
            None,
        );
        let completed = done.recv().await.unwrap();
        assert_eq!(outcome(&completed).task_id, id);
        assert_eq!(sched.get_task(id).unwrap().status, TaskStatus::Completed);
        token.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn external_executor_silence_times_out() {
        let (bus, sched) = setup(SchedulerConfig {
            task_timeout: Duration::from_secs(5),
            ..SchedulerConfig::default()
        });
        let _executor = bus.subscribe("pipeline", "task.execute.pipeline").unwrap();
        let failed = bus.subscribe("t", topics::TASK_FAILED).unwrap();
        let token = CancellationToken::new();
        let _loops = sched.start(&token).unwrap();

        let id = sched.enqueue_task(TaskRequest::new("ingest", "pipeline")).unwrap();
        let msg = failed.recv().await.unwrap();
        let o = outcome(&msg);
        assert_eq!(o.task_id, id);
        assert!(!o.will_retry);
        assert!(o.error.as_deref().unwrap_or_default().contains("timed out"));
        token.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn missing_executor_fails_fast() {
        let (_bus, sched) = setup(SchedulerConfig::default());
        let token = CancellationToken::new();
        let _loops = sched.start(&token).unwrap();
        let id = sched.enqueue_task(TaskRequest::new("t", "nobody")).unwrap();
        time::sleep(Duration::from_millis(10)).await;
        let rec = sched.get_task(id).unwrap();
        assert_eq!(rec.status, TaskStatus::Failed);
        assert!(rec.error.unwrap().contains("no executor"));
        token.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn recurring_job_waits_for_interval_and_previous_instance() {
        let (_bus, sched) = setup(SchedulerConfig::default());
        let first = sched
            .enqueue_task(TaskRequest::new("t", "h").recurring(Duration::from_secs(60)))
            .unwrap();
        time::advance(Duration::from_secs(61)).await;
        // first instance still queued
        assert!(sched.tick_recurring().is_empty());

        sched.cancel_task(first).unwrap();
        let next = sched.tick_recurring();
        assert_eq!(next.len(), 1);
        assert_eq!(sched.get_task(next[0]).unwrap().recurring_id, Some(first));
        assert!(sched.tick_recurring().is_empty());

        assert!(sched.cancel_recurring(first));
        assert_eq!(sched.stats().recurring_jobs, 0);
    }

    #[tokio::test]
    async fn maintenance_runs_once_per_period() {
        use chrono::TimeZone;
        let (_bus, sched) = setup(SchedulerConfig::default());
        sched.add_maintenance(MaintenanceSchedule::daily(
            "compact",
            2,
            TaskRequest::new("maintenance", "compact").with_priority(Priority::Low),
        ));
        let morning = Utc.with_ymd_and_hms(2026, 10, 16, 6, 0, 0).unwrap();
        assert_eq!(sched.run_maintenance(morning).len(), 1);
        assert!(sched.run_maintenance(morning).is_empty());
        assert_eq!(sched.stats().queued(Priority::Low), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn recurring_run_respects_queue_limit() {
        let (bus, sched) = setup(SchedulerConfig {
            max_queued: 1,
            ..SchedulerConfig::default()
        });
        let rejected = bus.subscribe("t", topics::TASK_REJECTED).unwrap();
        let first = sched
            .enqueue_task(TaskRequest::new("t", "h").recurring(Duration::from_secs(60)))
            .unwrap();
        sched.cancel_task(first).unwrap();
        let filler = sched.enqueue_task(TaskRequest::new("t", "other")).unwrap();

        time::advance(Duration::from_secs(61)).await;
        assert!(sched.tick_recurring().is_empty());
        assert_eq!(sched.stats().queued(Priority::Normal), 1);
        assert_eq!(sched.stats().rejected, 1);
        let notice = rejected.try_recv().unwrap();
        assert_eq!(outcome(&notice).handler, "h");

        // the skipped run counts as this interval's run
        sched.cancel_task(filler).unwrap();
        time::advance(Duration::from_secs(30)).await;
        assert!(sched.tick_recurring().is_empty());
        time::advance(Duration::from_secs(31)).await;
        assert_eq!(sched.tick_recurring().len(), 1);
    }

    #[tokio::test]
    async fn maintenance_run_respects_queue_limit() {
        use chrono::TimeZone;
        let (bus, sched) = setup(SchedulerConfig {
            max_queued: 1,
            ..SchedulerConfig::default()
        });
        let rejected = bus.subscribe("t", topics::TASK_REJECTED).unwrap();
        sched
            .enqueue_task(TaskRequest::new("t", "h").with_priority(Priority::Low))
            .unwrap();
        sched.add_maintenance(MaintenanceSchedule::daily(
            "compact",
            2,
            TaskRequest::new("maintenance", "compact").with_priority(Priority::Low),
        ));

        let morning = Utc.with_ymd_and_hms(2026, 10, 16, 6, 0, 0).unwrap();
        assert!(sched.run_maintenance(morning).is_empty());
        assert!(sched.run_maintenance(morning).is_empty());
        assert_eq!(sched.stats().queued(Priority::Low), 1);
        assert_eq!(sched.stats().rejected, 1);
        assert_eq!(outcome(&rejected.try_recv().unwrap()).status, TaskStatus::Cancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn critical_retry_waits_for_backoff() {
        let (_bus, sched) = setup(SchedulerConfig {
            workers: 1,
            retry_backoff: crate::policies::BackoffPolicy::constant(Duration::from_secs(10)),
            ..SchedulerConfig::default()
        });
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        sched.register_handler(HandlerFn::arc("flaky", move |_t: TaskExecute, _x: CancellationToken| {
            let c = c.clone();
            async move {
                if c.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(TaskError::fail("first attempt"))
                } else {
                    Ok(())
                }
            }
        }));
        let token = CancellationToken::new();
        let _loops = sched.start(&token).unwrap();
        let id = sched
            .enqueue_task(TaskRequest::new("t", "flaky").with_priority(Priority::Critical))
            .unwrap();

        time::sleep(Duration::from_secs(5)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(sched.get_task(id).unwrap().status, TaskStatus::Queued);

        time::sleep(Duration::from_secs(6)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        let rec = sched.get_task(id).unwrap();
        assert_eq!(rec.status, TaskStatus::Completed);
        assert_eq!(rec.retry_count, 1);
        token.cancel();
    }

    #[test]
    fn reply_maps_to_task_error() {
        let id = Uuid::new_v4();
        let fatal = TaskResult {
            task_id: id,
            success: false,
            error: Some("disk gone".into()),
            fatal: true,
        };
        assert_eq!(reply_result(fatal), Err(TaskError::fatal("disk gone")));
        let ok = TaskResult {
            task_id: id,
            success: true,
            error: None,
            fatal: false,
        };
        assert_eq!(reply_result(ok), Ok(()));
    }
}
