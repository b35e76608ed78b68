//! Task scheduler: a fixed pool of worker threads pulling jobs from a shared queue.
//!
//! Each worker is a named OS thread with its own stack budget that drives a
//! current-thread tokio runtime, so jobs are plain futures and may use tokio
//! timers and channels. Workers wait on the shared queue for at most one poll
//! interval (or until the nearest restart timer is due), which bounds how
//! stale a periodic job's firing can be.
//!
//! Two job modes are supported:
//! - **One-shot**: runs once and is discarded.
//! - **Periodic** ("restart timer"): after every execution, success or
//!   failure, the job is parked until `interval` after that execution
//!   *started*, then re-enqueued.
//!
//! Failures and panics are caught at the worker boundary and logged; they
//! never take a worker down.

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use futures::future::BoxFuture;
use futures::FutureExt;
use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};
use voxkit_types::config::{SchedulerConfig, MIN_WORKER_STACK_SIZE};
use voxkit_types::error::SchedulerError;
use voxkit_types::scheduler::{JobId, JobMode, SchedulerHealth};

type JobFuture = BoxFuture<'static, anyhow::Result<()>>;
type JobFactory = Arc<dyn Fn() -> JobFuture + Send + Sync>;

enum JobBody {
    Once(JobFuture),
    Periodic {
        factory: JobFactory,
        interval: Duration,
    },
}

struct QueuedJob {
    id: JobId,
    name: Arc<str>,
    cancelled: Arc<AtomicBool>,
    body: JobBody,
}

impl QueuedJob {
    fn is_periodic(&self) -> bool {
        matches!(self.body, JobBody::Periodic { .. })
    }
}

/// A periodic job parked until its restart timer is due.
struct Parked {
    due: Instant,
    job: QueuedJob,
}

impl PartialEq for Parked {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due && self.job.id == other.job.id
    }
}

impl Eq for Parked {}

impl PartialOrd for Parked {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for Parked {
    // Reversed so the max-heap pops the earliest due time first.
    fn cmp(&self, other: &Self) -> CmpOrdering {
        other
            .due
            .cmp(&self.due)
            .then_with(|| other.job.id.cmp(&self.job.id))
    }
}

#[derive(Default)]
struct Counters {
    completed: AtomicU64,
    failed: AtomicU64,
    panicked: AtomicU64,
    rescheduled: AtomicU64,
}

struct Shared {
    sender: Sender<QueuedJob>,
    receiver: Receiver<QueuedJob>,
    timers: Mutex<BinaryHeap<Parked>>,
    shutting_down: AtomicBool,
    poll_interval: Duration,
    counters: Counters,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Shared {
    fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    /// Move every parked job whose restart timer has expired onto the queue.
    fn promote_due_timers(&self) {
        let now = Instant::now();
        let mut timers = lock(&self.timers);
        while timers.peek().is_some_and(|p| p.due <= now) {
            let Some(parked) = timers.pop() else { break };
            if parked.job.cancelled.load(Ordering::SeqCst) {
                debug!(job = %parked.job.id, name = %parked.job.name, "Dropping cancelled periodic job");
                continue;
            }
            // The receiver lives in `self`, so the channel cannot be disconnected.
            let _ = self.sender.send(parked.job);
        }
    }

    /// How long an idle worker may block before re-checking timers.
    fn idle_wait(&self) -> Duration {
        let timers = lock(&self.timers);
        match timers.peek() {
            Some(parked) => parked
                .due
                .saturating_duration_since(Instant::now())
                .min(self.poll_interval),
            None => self.poll_interval,
        }
    }

    fn park(&self, due: Instant, job: QueuedJob) {
        self.counters.rescheduled.fetch_add(1, Ordering::Relaxed);
        lock(&self.timers).push(Parked { due, job });
    }
}

/// Handle to a submitted job, used for cancellation.
#[derive(Debug, Clone)]
pub struct JobHandle {
    id: JobId,
    mode: JobMode,
    cancelled: Arc<AtomicBool>,
}

impl JobHandle {
    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn mode(&self) -> JobMode {
        self.mode
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }
}

/// Fixed worker pool with one-shot and self-restarting jobs.
pub struct Scheduler {
    shared: Arc<Shared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    worker_names: Vec<String>,
}

impl Scheduler {
    /// Spin up the configured workers.
    pub fn start(config: &SchedulerConfig) -> Result<Self, SchedulerError> {
        config
            .validate()
            .map_err(|e| SchedulerError::InvalidConfig(e.to_string()))?;

        let (sender, receiver) = channel::unbounded();
        let shared = Arc::new(Shared {
            sender,
            receiver,
            timers: Mutex::new(BinaryHeap::new()),
            shutting_down: AtomicBool::new(false),
            poll_interval: config.poll_interval(),
            counters: Counters::default(),
        });

        let scheduler = Self {
            shared: shared.clone(),
            workers: Mutex::new(Vec::with_capacity(config.workers.len())),
            worker_names: config.workers.iter().map(|w| w.name.clone()).collect(),
        };

        for worker in &config.workers {
            let name = worker.name.clone();
            let shared = shared.clone();
            let handle = std::thread::Builder::new()
                .name(worker.name.clone())
                .stack_size(worker.stack_size.max(MIN_WORKER_STACK_SIZE))
                .spawn(move || worker_loop(name, shared))
                .map_err(|source| SchedulerError::Spawn {
                    name: worker.name.clone(),
                    source,
                });
            match handle {
                Ok(h) => lock(&scheduler.workers).push(h),
                Err(e) => {
                    // Dropping the scheduler joins whatever already started.
                    return Err(e);
                }
            }
        }

        info!(
            workers = config.workers.len(),
            poll_interval_ms = config.poll_interval_ms,
            "Scheduler started"
        );
        Ok(scheduler)
    }

    /// Enqueue a one-shot job. Never blocks beyond queue insertion.
    pub fn submit<F>(&self, name: &str, job: F) -> Result<JobHandle, SchedulerError>
    where
        F: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.enqueue(name, JobMode::Once, JobBody::Once(job.boxed()))
    }

    /// Enqueue a one-shot job and receive its output through a channel.
    ///
    /// The receiver errors if the job is cancelled, panics, or is dropped at
    /// shutdown before running.
    pub fn submit_with_reply<F, T>(
        &self,
        name: &str,
        job: F,
    ) -> Result<(JobHandle, oneshot::Receiver<T>), SchedulerError>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let handle = self.submit(name, async move {
            let output = job.await;
            // The caller may have stopped waiting; that is not a job failure.
            let _ = tx.send(output);
            Ok(())
        })?;
        Ok((handle, rx))
    }

    /// Enqueue a self-restarting job. Each firing is at least `interval`
    /// after the previous firing started.
    pub fn submit_periodic<F, Fut>(
        &self,
        name: &str,
        interval: Duration,
        job: F,
    ) -> Result<JobHandle, SchedulerError>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        if interval.is_zero() {
            return Err(SchedulerError::InvalidConfig(
                "periodic job interval must be positive".to_string(),
            ));
        }
        let factory: JobFactory = Arc::new(move || job().boxed());
        self.enqueue(
            name,
            JobMode::Periodic { interval },
            JobBody::Periodic { factory, interval },
        )
    }

    fn enqueue(
        &self,
        name: &str,
        mode: JobMode,
        body: JobBody,
    ) -> Result<JobHandle, SchedulerError> {
        if self.shared.is_shutting_down() {
            return Err(SchedulerError::ShuttingDown);
        }
        let handle = JobHandle {
            id: JobId::next(),
            mode,
            cancelled: Arc::new(AtomicBool::new(false)),
        };
        let job = QueuedJob {
            id: handle.id,
            name: Arc::from(name),
            cancelled: handle.cancelled.clone(),
            body,
        };
        self.shared
            .sender
            .send(job)
            .map_err(|_| SchedulerError::ShuttingDown)?;
        debug!(job = %handle.id, name, "Job submitted");
        Ok(handle)
    }

    /// Best-effort cancellation. A running execution completes, but the job
    /// is not run again.
    pub fn cancel(&self, handle: &JobHandle) {
        if !handle.is_cancelled() {
            debug!(job = %handle.id, "Job cancelled");
        }
        handle.cancel();
    }

    /// Drain queued one-shot work, stop rescheduling periodic work, and join
    /// all workers. Idempotent.
    pub fn stop(&self) {
        if !self.shared.shutting_down.swap(true, Ordering::SeqCst) {
            info!("Scheduler: stopping workers");
        }

        let handles = std::mem::take(&mut *lock(&self.workers));
        let current = std::thread::current().id();
        for handle in handles {
            if handle.thread().id() == current {
                // Stop requested from inside a job; this worker exits on its own.
                continue;
            }
            let name = handle.thread().name().unwrap_or("worker").to_string();
            if handle.join().is_err() {
                error!(worker = %name, "Worker thread terminated abnormally");
            }
        }
        lock(&self.shared.timers).clear();
    }

    pub fn is_running(&self) -> bool {
        !self.shared.is_shutting_down()
    }

    pub fn worker_names(&self) -> &[String] {
        &self.worker_names
    }

    pub fn health(&self) -> SchedulerHealth {
        let counters = &self.shared.counters;
        SchedulerHealth {
            workers: self.worker_names.len(),
            is_shutting_down: self.shared.is_shutting_down(),
            queued: self.shared.receiver.len(),
            waiting_timers: lock(&self.shared.timers).len(),
            completed: counters.completed.load(Ordering::Relaxed),
            failed: counters.failed.load(Ordering::Relaxed),
            panicked: counters.panicked.load(Ordering::Relaxed),
            rescheduled: counters.rescheduled.load(Ordering::Relaxed),
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

fn worker_loop(name: String, shared: Arc<Shared>) {
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            error!(worker = %name, error = %e, "Worker failed to build its runtime");
            return;
        }
    };
    debug!(worker = %name, "Worker started");

    loop {
        shared.promote_due_timers();

        if shared.is_shutting_down() {
            while let Ok(job) = shared.receiver.try_recv() {
                if job.is_periodic() {
                    debug!(worker = %name, job = %job.id, "Shutdown: not running periodic job");
                    continue;
                }
                run_job(&runtime, &name, &shared, job);
            }
            break;
        }

        match shared.receiver.recv_timeout(shared.idle_wait()) {
            Ok(job) => run_job(&runtime, &name, &shared, job),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    debug!(worker = %name, "Worker exited");
}

fn run_job(runtime: &tokio::runtime::Runtime, worker: &str, shared: &Shared, job: QueuedJob) {
    if job.cancelled.load(Ordering::SeqCst) {
        debug!(worker, job = %job.id, name = %job.name, "Skipping cancelled job");
        return;
    }

    let QueuedJob {
        id,
        name,
        cancelled,
        body,
    } = job;
    let started = Instant::now();

    match body {
        JobBody::Once(fut) => execute(runtime, worker, shared, id, &name, fut),
        JobBody::Periodic { factory, interval } => {
            execute(runtime, worker, shared, id, &name, factory());
            if cancelled.load(Ordering::SeqCst) || shared.is_shutting_down() {
                debug!(worker, job = %id, name = %name, "Periodic job not rescheduled");
                return;
            }
            shared.park(
                started + interval,
                QueuedJob {
                    id,
                    name,
                    cancelled,
                    body: JobBody::Periodic { factory, interval },
                },
            );
        }
    }
}

fn execute(
    runtime: &tokio::runtime::Runtime,
    worker: &str,
    shared: &Shared,
    id: JobId,
    name: &str,
    fut: JobFuture,
) {
    let counters = &shared.counters;
    match runtime.block_on(AssertUnwindSafe(fut).catch_unwind()) {
        Ok(Ok(())) => {
            counters.completed.fetch_add(1, Ordering::Relaxed);
        }
        Ok(Err(e)) => {
            counters.failed.fetch_add(1, Ordering::Relaxed);
            warn!(worker, job = %id, name, error = %e, "Job failed");
        }
        Err(panic) => {
            counters.panicked.fetch_add(1, Ordering::Relaxed);
            warn!(worker, job = %id, name, panic = %panic_message(&panic), "Job panicked");
        }
    }
}

fn panic_message(payload: &Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
