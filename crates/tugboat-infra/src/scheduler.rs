//! Deferred-completion scheduling for the mock backend.
//!
//! The mock models eventual consistency by flipping a resource to its
//! terminal status some time after creation. Who decides "some time" is
//! injectable: `TokioScheduler` uses real (or paused) tokio timers,
//! `ManualScheduler` keeps its own simulated clock that tests advance
//! explicitly.

use std::time::Duration;

use parking_lot::Mutex;
use tracing::debug;

/// A deferred unit of work.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

pub trait CompletionScheduler: Send + Sync {
    /// Run `task` once `delay` has elapsed on this scheduler's clock.
    fn schedule(&self, delay: Duration, task: Task);
}

/// Spawns one tokio task per completion. Must be called from within a runtime.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioScheduler;

impl CompletionScheduler for TokioScheduler {
    fn schedule(&self, delay: Duration, task: Task) {
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            task();
        });
    }
}

struct Pending {
    due: Duration,
    seq: u64,
    task: Task,
}

#[derive(Default)]
struct ManualClock {
    now: Duration,
    next_seq: u64,
    pending: Vec<Pending>,
}

/// Simulated clock; nothing runs until [`advance`](Self::advance) is called.
#[derive(Default)]
pub struct ManualScheduler {
    clock: Mutex<ManualClock>,
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulated time elapsed so far.
    pub fn now(&self) -> Duration {
        self.clock.lock().now
    }

    /// Number of tasks not yet run.
    pub fn pending(&self) -> usize {
        self.clock.lock().pending.len()
    }

    /// Move the clock forward and run every task that became due, in
    /// due-time order (ties in scheduling order). Returns how many ran.
    pub fn advance(&self, by: Duration) -> usize {
        let mut due = {
            let mut clock = self.clock.lock();
            clock.now += by;
            let now = clock.now;
            let (ready, waiting): (Vec<_>, Vec<_>) =
                clock.pending.drain(..).partition(|p| p.due <= now);
            clock.pending = waiting;
            ready
        };
        due.sort_by_key(|p| (p.due, p.seq));
        let count = due.len();
        // Run outside the lock so tasks may schedule follow-ups.
        for pending in due {
            (pending.task)();
        }
        if count > 0 {
            debug!(ran = count, "manual scheduler advanced");
        }
        count
    }

    /// Run everything pending regardless of due time.
    pub fn run_all(&self) -> usize {
        let latest = {
            let clock = self.clock.lock();
            clock
                .pending
                .iter()
                .map(|p| p.due)
                .max()
                .map(|due| due.saturating_sub(clock.now))
        };
        match latest {
            Some(by) => self.advance(by),
            None => 0,
        }
    }
}

impl CompletionScheduler for ManualScheduler {
    fn schedule(&self, delay: Duration, task: Task) {
        let mut clock = self.clock.lock();
        let due = clock.now + delay;
        let seq = clock.next_seq;
        clock.next_seq += 1;
        clock.pending.push(Pending { due, seq, task });
    }
}
