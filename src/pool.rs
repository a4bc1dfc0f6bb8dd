//! Bounded-parallelism task runner.
//!
//! A fixed set of workers drains a shared queue of zero-argument async tasks.
//! Each task runs on its own tokio task so a panic stays isolated to that
//! task, and a worker only takes the next queued task once the previous one
//! has settled. At most `limit` tasks are therefore active at any instant,
//! regardless of how many fail.

use futures::future::{join_all, BoxFuture};
use log::{info, warn};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use crate::error::{Result, SufferError};

/// A queued unit of work. Nothing runs until a worker calls it.
pub type PoolTask<T> = Box<dyn FnOnce() -> BoxFuture<'static, Result<T>> + Send>;

/// Outcome of running a batch through a [`TaskPool`].
#[derive(Debug)]
pub struct PoolOutcome<T> {
    /// One result per submitted task, in submission order.
    pub results: Vec<Result<T>>,
    pub succeeded: usize,
    pub failed: usize,
}

impl<T> PoolOutcome<T> {
    /// True when every task succeeded.
    pub fn is_complete(&self) -> bool {
        self.failed == 0
    }
}

/// Runs batches of tasks with at most `limit` in flight.
#[derive(Debug, Clone, Copy)]
pub struct TaskPool {
    limit: usize,
}

impl TaskPool {
    /// Create a pool. A limit of zero is treated as one.
    pub fn new(limit: usize) -> Self {
        Self {
            limit: limit.max(1),
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Run every task to completion and return once all have settled.
    ///
    /// A failing or panicking task does not cancel its siblings.
    pub async fn run<T: Send + 'static>(&self, tasks: Vec<PoolTask<T>>) -> PoolOutcome<T> {
        let total = tasks.len();
        if total == 0 {
            return PoolOutcome {
                results: Vec::new(),
                succeeded: 0,
                failed: 0,
            };
        }

        let start = Instant::now();
        let queue: Arc<Mutex<VecDeque<(usize, PoolTask<T>)>>> =
            Arc::new(Mutex::new(tasks.into_iter().enumerate().collect()));
        let worker_count = self.limit.min(total);

        let workers = (0..worker_count).map(|_| {
            let queue = Arc::clone(&queue);
            async move {
                let mut settled = Vec::new();
                while let Some((idx, task)) = next_task(&queue) {
                    let result = match tokio::spawn(async move { task().await }).await {
                        Ok(result) => result,
                        Err(e) => {
                            warn!("[TaskPool] Task {} join error: {}", idx, e);
                            Err(SufferError::TaskFailed {
                                message: e.to_string(),
                            })
                        }
                    };
                    settled.push((idx, result));
                }
                settled
            }
        });

        let mut slots: Vec<Option<Result<T>>> = (0..total).map(|_| None).collect();
        for (idx, result) in join_all(workers).await.into_iter().flatten() {
            slots[idx] = Some(result);
        }

        let results: Vec<Result<T>> = slots
            .into_iter()
            .map(|slot| {
                slot.unwrap_or_else(|| {
                    Err(SufferError::Internal {
                        message: "task was never settled".to_string(),
                    })
                })
            })
            .collect();
        let succeeded = results.iter().filter(|r| r.is_ok()).count();
        let failed = total - succeeded;

        info!(
            "[TaskPool] Settled {} tasks ({} ok, {} failed) with {} workers in {:.2}s",
            total,
            succeeded,
            failed,
            worker_count,
            start.elapsed().as_secs_f64()
        );

        PoolOutcome {
            results,
            succeeded,
            failed,
        }
    }
}

impl Default for TaskPool {
    fn default() -> Self {
        Self::new(6)
    }
}

fn next_task<T>(queue: &Mutex<VecDeque<(usize, PoolTask<T>)>>) -> Option<(usize, PoolTask<T>)> {
    queue
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .pop_front()
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn tracked_task(
        idx: usize,
        active: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
        fail: bool,
    ) -> PoolTask<usize> {
        Box::new(move || {
            async move {
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                active.fetch_sub(1, Ordering::SeqCst);
                if fail {
                    Err(SufferError::http("boom", Some(500)))
                } else {
                    Ok(idx)
                }
            }
            .boxed()
        })
    }

    #[tokio::test]
    async fn test_concurrency_never_exceeds_limit() {
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let tasks: Vec<PoolTask<usize>> = (0..20)
            .map(|i| tracked_task(i, Arc::clone(&active), Arc::clone(&peak), i % 3 == 0))
            .collect();

        let outcome = TaskPool::new(3).run(tasks).await;

        assert!(peak.load(Ordering::SeqCst) <= 3);
        assert_eq!(active.load(Ordering::SeqCst), 0);
        assert_eq!(outcome.results.len(), 20);
        assert_eq!(outcome.failed, 7);
        assert_eq!(outcome.succeeded, 13);
        assert!(!outcome.is_complete());
    }

    #[tokio::test]
    async fn test_results_in_submission_order() {
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let tasks: Vec<PoolTask<usize>> = (0..6)
            .map(|i| tracked_task(i, Arc::clone(&active), Arc::clone(&peak), false))
            .collect();

        let outcome = TaskPool::new(2).run(tasks).await;
        let values: Vec<usize> = outcome.results.into_iter().map(|r| r.unwrap()).collect();
        assert_eq!(values, vec![0, 1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn test_panicking_task_is_isolated() {
        let mut tasks: Vec<PoolTask<u32>> = Vec::new();
        tasks.push(Box::new(|| async { Ok::<u32, SufferError>(1) }.boxed()));
        tasks.push(Box::new(|| {
            async {
                let exploded = true;
                if exploded {
                    panic!("task exploded");
                }
                Ok::<u32, SufferError>(2)
            }
            .boxed()
        }));
        tasks.push(Box::new(|| async { Ok::<u32, SufferError>(3) }.boxed()));

        let outcome = TaskPool::new(1).run(tasks).await;
        assert_eq!(outcome.succeeded, 2);
        assert!(matches!(
            outcome.results[1],
            Err(SufferError::TaskFailed { .. })
        ));
        assert_eq!(*outcome.results[2].as_ref().unwrap(), 3);
    }

    #[tokio::test]
    async fn test_panic_while_building_future_is_isolated() {
        let mut tasks: Vec<PoolTask<u32>> = Vec::new();
        tasks.push(Box::new(|| async { Ok::<u32, SufferError>(1) }.boxed()));
        tasks.push(Box::new(|| -> BoxFuture<'static, Result<u32>> {
            panic!("could not build request")
        }));
        tasks.push(Box::new(|| async { Ok::<u32, SufferError>(3) }.boxed()));

        let outcome = TaskPool::new(2).run(tasks).await;
        assert_eq!(outcome.succeeded, 2);
        assert_eq!(outcome.failed, 1);
        assert!(matches!(
            outcome.results[1],
            Err(SufferError::TaskFailed { .. })
        ));
        assert_eq!(*outcome.results[2].as_ref().unwrap(), 3);
    }

    #[tokio::test]
    async fn test_empty_batch() {
        let outcome: PoolOutcome<()> = TaskPool::new(4).run(Vec::new()).await;
        assert!(outcome.results.is_empty());
        assert!(outcome.is_complete());
    }
}
