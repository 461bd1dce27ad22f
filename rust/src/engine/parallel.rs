//! Bounded worker pool for one evaluation wave at a time.
//!
//! Workers only compute: every task returns its result to the caller, which
//! merges results into shared state sequentially. A caller that merges into
//! shared state holds a [`RunSession`] for the whole run, so shutdown never
//! tears that state down under it.

use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{RwLock, TryLockError};
use std::time::{Duration, Instant};

use crate::models::EvaluationError;

use super::EngineError;

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Runs waves of independent tasks, in parallel when enabled.
pub struct ParallelEvaluator {
    /// `None` when running sequentially or after shutdown. Every in-flight
    /// wave holds a read guard.
    pool: RwLock<Option<ThreadPool>>,
    accepting: AtomicBool,
    in_flight: AtomicUsize,
    sessions: AtomicUsize,
    max_workers: usize,
}

/// An open run. Shutdown waits until every session is dropped.
pub struct RunSession<'a> {
    evaluator: &'a ParallelEvaluator,
}

impl Drop for RunSession<'_> {
    fn drop(&mut self) {
        self.evaluator.sessions.fetch_sub(1, Ordering::SeqCst);
    }
}

impl ParallelEvaluator {
    pub fn new(max_workers: usize, enabled: bool) -> Result<Self, EngineError> {
        let max_workers = max_workers.max(1);
        let pool = if enabled && max_workers > 1 {
            let pool = ThreadPoolBuilder::new()
                .num_threads(max_workers)
                .thread_name(|i| format!("constraint-worker-{}", i))
                .build()
                .map_err(|e| EngineError::WorkerPool(e.to_string()))?;
            Some(pool)
        } else {
            None
        };
        Ok(Self {
            pool: RwLock::new(pool),
            accepting: AtomicBool::new(true),
            in_flight: AtomicUsize::new(0),
            sessions: AtomicUsize::new(0),
            max_workers,
        })
    }

    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    pub fn is_parallel(&self) -> bool {
        self.pool
            .read()
            .map(|pool| pool.is_some())
            .unwrap_or(false)
    }

    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::SeqCst)
    }

    /// Open a run that will merge wave results into shared state.
    pub fn begin_session(&self) -> Result<RunSession<'_>, EngineError> {
        // Register before checking so shutdown either sees us or we see it
        self.sessions.fetch_add(1, Ordering::SeqCst);
        let session = RunSession { evaluator: self };
        if !self.is_accepting() {
            return Err(EngineError::ShutDown);
        }
        Ok(session)
    }

    /// Evaluate every task of one wave and block until all are done.
    ///
    /// Results come back in task order. A panicking task yields an
    /// `EvaluationError` with an empty constraint id. If shutdown began
    /// while the wave ran, its results are discarded and `ShutDown` is
    /// returned instead.
    pub fn run_wave<T, R, F>(
        &self,
        tasks: &[T],
        f: F,
    ) -> Result<Vec<Result<R, EvaluationError>>, EngineError>
    where
        T: Sync,
        R: Send,
        F: Fn(&T) -> Result<R, EvaluationError> + Sync,
    {
        if !self.is_accepting() {
            return Err(EngineError::ShutDown);
        }
        let pool = self
            .pool
            .read()
            .map_err(|_| EngineError::WorkerPool("worker pool lock poisoned".to_string()))?;
        if !self.is_accepting() {
            return Err(EngineError::ShutDown);
        }
        self.in_flight.fetch_add(1, Ordering::SeqCst);

        let run_one = |task: &T| -> Result<R, EvaluationError> {
            match catch_unwind(AssertUnwindSafe(|| f(task))) {
                Ok(result) => result,
                Err(payload) => Err(EvaluationError::new(
                    "",
                    format!("evaluation panicked: {}", panic_message(payload.as_ref())),
                )),
            }
        };
        let results: Vec<Result<R, EvaluationError>> = match pool.as_ref() {
            Some(pool) => pool.install(|| tasks.par_iter().map(run_one).collect()),
            None => tasks.iter().map(run_one).collect(),
        };

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        drop(pool);

        if !self.is_accepting() {
            return Err(EngineError::ShutDown);
        }
        Ok(results)
    }

    /// Stop accepting work, wait up to `grace` for open sessions and
    /// in-flight waves, then release the worker threads.
    ///
    /// `Ok` means nothing is running any more.
    pub fn shutdown(&self, grace: Duration) -> Result<(), EngineError> {
        self.accepting.store(false, Ordering::SeqCst);
        let deadline = Instant::now().checked_add(grace);
        loop {
            if self.sessions.load(Ordering::SeqCst) == 0 {
                match self.pool.try_write() {
                    Ok(mut pool) => {
                        pool.take();
                        return Ok(());
                    }
                    Err(TryLockError::Poisoned(poisoned)) => {
                        poisoned.into_inner().take();
                        return Ok(());
                    }
                    Err(TryLockError::WouldBlock) => {}
                }
            }
            if deadline.is_some_and(|d| Instant::now() >= d) {
                let waves = self.in_flight.load(Ordering::SeqCst);
                let sessions = self.sessions.load(Ordering::SeqCst);
                return Err(EngineError::ShutdownTimeout {
                    in_flight: waves.max(sessions),
                });
            }
            std::thread::sleep(Duration::from_millis(1));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_results_in_task_order() {
        let evaluator = ParallelEvaluator::new(4, true).unwrap();
        assert!(evaluator.is_parallel());
        let tasks: Vec<u64> = (0..64).collect();
        let results = evaluator.run_wave(&tasks, |&n| Ok(n * 2)).unwrap();
        let values: Vec<u64> = results.into_iter().map(|r| r.unwrap()).collect();
        assert_eq!(values, (0..64).map(|n| n * 2).collect::<Vec<_>>());
    }

    #[test]
    fn test_sequential_when_disabled() {
        let evaluator = ParallelEvaluator::new(8, false).unwrap();
        assert!(!evaluator.is_parallel());
        let results = evaluator.run_wave(&[1, 2, 3], |&n| Ok(n + 1)).unwrap();
        assert_eq!(results.into_iter().map(|r| r.unwrap()).collect::<Vec<_>>(), vec![2, 3, 4]);
    }

    #[test]
    fn test_errors_and_panics_are_contained() {
        let evaluator = ParallelEvaluator::new(2, true).unwrap();
        let results = evaluator
            .run_wave(&[0, 1, 2], |&n| match n {
                0 => Ok(n),
                1 => Err(EvaluationError::new("c1", "bad input")),
                _ => panic!("worker exploded"),
            })
            .unwrap();

        assert_eq!(results[0].as_ref().unwrap(), &0);
        assert_eq!(results[1].as_ref().unwrap_err().message, "bad input");
        let panicked = results[2].as_ref().unwrap_err();
        assert!(panicked.constraint_id.is_empty());
        assert!(panicked.message.contains("worker exploded"));
    }

    #[test]
    fn test_rejects_work_after_shutdown() {
        let evaluator = ParallelEvaluator::new(2, true).unwrap();
        evaluator.shutdown(Duration::from_millis(100)).unwrap();
        assert!(!evaluator.is_accepting());
        assert!(matches!(
            evaluator.run_wave(&[1], |&n| Ok(n)),
            Err(EngineError::ShutDown)
        ));
        // Idempotent
        evaluator.shutdown(Duration::ZERO).unwrap();
    }

    #[test]
    fn test_shutdown_waits_for_open_session() {
        let evaluator = ParallelEvaluator::new(2, true).unwrap();
        let session = evaluator.begin_session().unwrap();
        evaluator.run_wave(&[1], |&n| Ok(n)).unwrap();

        // No wave is running, but the session may still be merging
        let err = evaluator.shutdown(Duration::from_millis(10)).unwrap_err();
        assert!(matches!(err, EngineError::ShutdownTimeout { in_flight: 1 }));
        assert!(matches!(evaluator.begin_session(), Err(EngineError::ShutDown)));

        drop(session);
        evaluator.shutdown(Duration::ZERO).unwrap();
        assert!(!evaluator.is_parallel());
    }

    #[test]
    fn test_shutdown_times_out_on_stuck_wave() {
        let evaluator = Arc::new(ParallelEvaluator::new(2, true).unwrap());
        let started = Arc::new(AtomicBool::new(false));

        let worker = {
            let evaluator = Arc::clone(&evaluator);
            let started = Arc::clone(&started);
            std::thread::spawn(move || {
                evaluator.run_wave(&[1u32], |&n| {
                    started.store(true, Ordering::SeqCst);
                    std::thread::sleep(Duration::from_millis(300));
                    Ok(n)
                })
            })
        };
        while !started.load(Ordering::SeqCst) {
            std::thread::yield_now();
        }

        let err = evaluator.shutdown(Duration::from_millis(10)).unwrap_err();
        assert!(matches!(err, EngineError::ShutdownTimeout { in_flight: 1 }));

        // The abandoned wave must not hand back results
        let outcome = worker.join().unwrap();
        assert!(matches!(outcome, Err(EngineError::ShutDown)));
        evaluator.shutdown(Duration::from_millis(100)).unwrap();
    }
}
