//! Bounded worker pool for transfers.
//!
//! ```text
//!   producer (walk → date → plan)          worker 1 ─┐
//!        │  rendezvous channel, one plan      worker 2 ─┼─▶ results ─▶ on_result
//!        └──────────── per free worker ─────▶ worker N ─┘
//! ```
//!
//! Neither channel has a buffer. A plan is only pulled from the producer
//! once a worker is ready to take it, so the walk advances at transfer speed.
//! A worker holding a result cannot take new work until the calling thread
//! has seen that result, so a cancellation raised from a result always
//! lands before the next dispatch to that worker. The calling thread is the
//! only place aggregation happens.

use crate::transfer::{TransferPlan, TransferResult};
use crossbeam_channel::{Receiver, Sender, bounded, select};
use std::any::Any;
use std::num::NonZeroUsize;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

/// Run-scoped cooperative cancellation flag.
///
/// Cancelling stops new dispatch; transfers already started run to completion.
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

/// One item coming out of the planning pipeline.
#[derive(Debug)]
pub enum Work {
    /// A plan for a worker to execute.
    Dispatch(TransferPlan),
    /// A result settled during planning (walk or date errors); passed straight through.
    Settled(TransferResult),
}

/// Counts reported when the pool has drained.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Plans handed to workers.
    pub dispatched: usize,
    /// Whether dispatch stopped early because of cancellation.
    pub cancelled: bool,
}

/// Executes plans on a fixed number of threads.
#[derive(Debug, Clone, Copy)]
pub struct WorkerPool {
    workers: NonZeroUsize,
}

impl WorkerPool {
    pub fn new(workers: NonZeroUsize) -> Self {
        Self { workers }
    }

    pub fn workers(&self) -> usize {
        self.workers.get()
    }

    /// Pulls work from `items` and runs each plan through `execute` on a
    /// worker thread, handing every result to `on_result` on the calling
    /// thread in completion order.
    ///
    /// `cancel` is checked before each item is pulled. A panic inside
    /// `execute` becomes a failed result for that plan; sibling workers
    /// keep running.
    pub fn run<I, E, F>(
        &self,
        items: I,
        cancel: &CancelToken,
        execute: E,
        mut on_result: F,
    ) -> PoolStats
    where
        I: IntoIterator<Item = Work>,
        E: Fn(&TransferPlan) -> TransferResult + Sync,
        F: FnMut(TransferResult),
    {
        let workers = self.workers.get();
        let (job_tx, job_rx) = bounded::<TransferPlan>(0);
        let (result_tx, result_rx) = bounded::<TransferResult>(0);
        let mut stats = PoolStats::default();

        thread::scope(|scope| {
            for id in 0..workers {
                let job_rx = job_rx.clone();
                let result_tx = result_tx.clone();
                let execute = &execute;
                scope.spawn(move || worker_loop(id, job_rx, result_tx, execute));
            }
            drop(job_rx);
            drop(result_tx);

            let mut items = items.into_iter();
            'feed: loop {
                if cancel.is_cancelled() {
                    stats.cancelled = true;
                    tracing::debug!("cancellation requested, no further dispatch");
                    break;
                }
                let plan = match items.next() {
                    Some(Work::Dispatch(plan)) => plan,
                    Some(Work::Settled(result)) => {
                        on_result(result);
                        continue;
                    }
                    None => break,
                };

                // Wait for a free worker, draining results meanwhile so
                // workers never block on a full result channel.
                let mut pending = Some(plan);
                while let Some(plan) = pending.take() {
                    select! {
                        send(job_tx, plan) -> sent => match sent {
                            Ok(()) => stats.dispatched += 1,
                            Err(_) => {
                                tracing::error!("all workers exited early");
                                break 'feed;
                            }
                        },
                        recv(result_rx) -> result => match result {
                            Ok(result) => {
                                on_result(result);
                                if cancel.is_cancelled() {
                                    stats.cancelled = true;
                                    tracing::debug!(
                                        src = %plan.source.display(),
                                        "cancelled while waiting for a worker, plan dropped"
                                    );
                                    break 'feed;
                                }
                                pending = Some(plan);
                            }
                            Err(_) => {
                                tracing::error!("all workers exited early");
                                break 'feed;
                            }
                        }
                    }
                }
            }

            drop(job_tx);
            tracing::debug!(dispatched = stats.dispatched, "draining in-flight transfers");
            for result in result_rx.iter() {
                on_result(result);
            }
        });

        stats
    }
}

fn worker_loop<E>(
    id: usize,
    jobs: Receiver<TransferPlan>,
    results: Sender<TransferResult>,
    execute: &E,
) where
    E: Fn(&TransferPlan) -> TransferResult + Sync,
{
    for plan in jobs.iter() {
        let result = panic::catch_unwind(AssertUnwindSafe(|| execute(&plan))).unwrap_or_else(
            |payload| {
                let reason = format!("worker {id} panicked: {}", panic_message(payload.as_ref()));
                tracing::error!(src = %plan.source.display(), "{}", reason);
                TransferResult::failed(plan.source.clone(), Some(plan.destination.clone()), reason)
            },
        );
        if results.send(result).is_err() {
            break;
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}
