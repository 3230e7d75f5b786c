// src/scheduler.rs - Bounded worker pool with per-task isolation and cooperative cancellation

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use rayon::ThreadPoolBuilder;
use serde::Serialize;

use crate::aggregate::{ResultAggregator, RunSummary, StitchSettings, TaskOutcome, TileResult};
use crate::errors::{OrthoError, Result};
use crate::pipeline::TileProcessor;
use crate::plan::TaskPlan;
use crate::raster::RasterSource;

/// Immutable scheduler settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerConfig {
    pub workers: usize,
    pub run_timeout: Option<Duration>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            workers: thread::available_parallelism().map(|n| n.get()).unwrap_or(1),
            run_timeout: None,
        }
    }
}

/// Shared stop flag. Checked before each task starts; running tasks are never interrupted.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TaskState {
    Pending,
    Running,
    Completed,
    Failed,
}

/// Per-task state, indexed by task id
struct TaskBoard {
    states: Mutex<Vec<TaskState>>,
}

impl TaskBoard {
    fn new(size: usize) -> Self {
        Self {
            states: Mutex::new(vec![TaskState::Pending; size]),
        }
    }

    fn set(&self, id: usize, state: TaskState) {
        let mut states = self.states.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(slot) = states.get_mut(id) {
            *slot = state;
        }
    }

    fn snapshot(&self) -> Vec<TaskState> {
        self.states.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

pub struct TileScheduler {
    config: SchedulerConfig,
    cancel: CancelToken,
}

impl TileScheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        Self {
            config,
            cancel: CancelToken::new(),
        }
    }

    /// Share an externally owned token (e.g. one tripped by a signal handler)
    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Run every ready task of the plan and fold the results.
    ///
    /// Only pool construction can fail; task errors and panics end up in the
    /// corresponding `TileResult`.
    pub fn run<P>(
        &self,
        raster: &dyn RasterSource,
        processor: &P,
        plan: TaskPlan,
        stitch: Option<StitchSettings>,
    ) -> Result<RunSummary>
    where
        P: TileProcessor + ?Sized,
    {
        let workers = self.config.workers.max(1);
        let pool = ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("tile-worker-{}", i))
            .build()
            .map_err(|e| OrthoError::Other(format!("Failed to build worker pool: {}", e)))?;

        let total_tasks = plan.total_tasks();
        let board_size = plan
            .ready
            .iter()
            .map(|t| t.id + 1)
            .chain(plan.rejected.iter().map(|r| r.id + 1))
            .max()
            .unwrap_or(0);
        let board = TaskBoard::new(board_size);
        let mut aggregator = ResultAggregator::new(total_tasks);

        for rejected in plan.rejected {
            board.set(rejected.id, TaskState::Failed);
            aggregator.push(TaskOutcome {
                task_id: rejected.id,
                window: None,
                result: TileResult::failed(rejected.error),
            });
        }

        info!("Scheduling {} task(s) on {} worker(s)", plan.ready.len(), workers);
        let deadline = self.config.run_timeout.map(|t| Instant::now() + t);
        let (tx, rx) = mpsc::channel::<TaskOutcome>();

        pool.scope(|scope| {
            for task in plan.ready {
                let tx = tx.clone();
                let board = &board;
                let cancel = &self.cancel;
                scope.spawn(move |_| {
                    if deadline.is_some_and(|d| Instant::now() >= d) && !cancel.is_cancelled() {
                        warn!("Run timeout reached, no further tasks will start");
                        cancel.cancel();
                    }
                    if cancel.is_cancelled() {
                        return;
                    }

                    board.set(task.id, TaskState::Running);
                    let result = match catch_unwind(AssertUnwindSafe(|| processor.run_task(raster, &task))) {
                        Ok(result) => result,
                        Err(payload) => TileResult::failed(format!("task panicked: {}", panic_message(payload.as_ref()))),
                    };

                    if result.success {
                        debug!("Task {} completed with {} object(s)", task.id, result.count);
                        board.set(task.id, TaskState::Completed);
                    } else {
                        warn!("Task {} failed: {}", task.id, result.error.as_deref().unwrap_or("unknown error"));
                        board.set(task.id, TaskState::Failed);
                    }

                    // The receiver outlives the scope
                    let _ = tx.send(TaskOutcome {
                        task_id: task.id,
                        window: Some(task.window),
                        result,
                    });
                });
            }
        });
        drop(tx);

        for outcome in rx {
            aggregator.push(outcome);
        }

        let pending_tasks: Vec<usize> = board
            .snapshot()
            .iter()
            .enumerate()
            .filter(|(_, state)| **state == TaskState::Pending)
            .map(|(id, _)| id)
            .collect();

        let mut summary = aggregator.finish(stitch);
        summary.cancelled = self.cancel.is_cancelled();
        if summary.cancelled {
            warn!("Run cancelled with {} task(s) never started", pending_tasks.len());
        }
        summary.pending_tasks = pending_tasks;
        Ok(summary)
    }
}
