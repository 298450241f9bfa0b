//! Connection roster and admission control.
//!
//! The roster and the capacity flag live under one mutex so their state is
//! always observed together. The accept loop waits on the paired condvar while
//! the flag is raised. Every worker reaps finished entries on its way out and,
//! if it removed any, lowers the flag and wakes all waiters; each waiter
//! re-checks capacity itself.

use std::io;
use std::mem;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::ids::ConnectionId;

/// Poll interval while joining threads against a deadline.
const JOIN_POLL: Duration = Duration::from_millis(5);

struct Worker {
    id: ConnectionId,
    handle: JoinHandle<()>,
    /// Set by the worker itself right before it reaps, so it counts as
    /// finished even though its thread is still alive at that point
    done: Arc<AtomicBool>,
}

impl Worker {
    fn finished(&self) -> bool {
        self.done.load(Ordering::Acquire) || self.handle.is_finished()
    }
}

struct Roster {
    workers: Vec<Worker>,
    limit: usize,
    at_capacity: bool,
}

pub(crate) struct Admission {
    roster: Mutex<Roster>,
    capacity_freed: Condvar,
}

impl Admission {
    pub(crate) fn new(limit: usize) -> Self {
        Self {
            roster: Mutex::new(Roster {
                workers: Vec::new(),
                limit: limit.max(1),
                at_capacity: false,
            }),
            capacity_freed: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Roster> {
        self.roster.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Block while the roster is at capacity and `running` holds.
    ///
    /// Returns the value of `running` once unblocked.
    pub(crate) fn wait_for_capacity(&self, running: &AtomicBool) -> bool {
        let mut roster = self.lock();
        while roster.at_capacity && running.load(Ordering::SeqCst) {
            debug!(
                active = roster.workers.len(),
                limit = roster.limit,
                "Connection limit reached, waiting for a slot"
            );
            roster = self
                .capacity_freed
                .wait(roster)
                .unwrap_or_else(PoisonError::into_inner);
        }
        running.load(Ordering::SeqCst)
    }

    /// Spawn a worker through `spawn` and add it to the roster.
    ///
    /// The roster lock is held across the spawn, so a worker that finishes
    /// immediately still finds itself in the roster when it reaps. Returns the
    /// roster size after admission.
    pub(crate) fn admit<F>(&self, id: ConnectionId, spawn: F) -> io::Result<usize>
    where
        F: FnOnce(Arc<AtomicBool>) -> io::Result<JoinHandle<()>>,
    {
        let mut roster = self.lock();
        let done = Arc::new(AtomicBool::new(false));
        let handle = spawn(Arc::clone(&done))?;
        roster.workers.push(Worker { id, handle, done });
        if roster.workers.len() >= roster.limit {
            roster.at_capacity = true;
        }
        Ok(roster.workers.len())
    }

    /// Drop finished workers. If any were removed, lower the capacity flag and
    /// wake every waiter. Returns the number removed.
    pub(crate) fn reap(&self) -> usize {
        let mut roster = self.lock();
        let before = roster.workers.len();
        roster.workers.retain(|w| !w.finished());
        let removed = before - roster.workers.len();
        if removed > 0 {
            roster.at_capacity = roster.workers.len() >= roster.limit;
            self.capacity_freed.notify_all();
        }
        removed
    }

    /// Wake every waiter so it re-checks its exit condition.
    pub(crate) fn wake_all(&self) {
        let _roster = self.lock();
        self.capacity_freed.notify_all();
    }

    /// Workers currently counted against the limit, finished or not.
    pub(crate) fn active(&self) -> usize {
        self.lock().workers.len()
    }

    pub(crate) fn set_limit(&self, limit: usize) {
        let mut roster = self.lock();
        roster.limit = limit.max(1);
        roster.at_capacity = roster.workers.len() >= roster.limit;
        self.capacity_freed.notify_all();
    }

    /// Take every worker out of the roster and join each one, waiting at most
    /// `timeout` per worker. Returns the number still running afterwards.
    pub(crate) fn drain(&self, timeout: Duration) -> usize {
        let workers = {
            let mut roster = self.lock();
            roster.at_capacity = false;
            self.capacity_freed.notify_all();
            mem::take(&mut roster.workers)
        };

        let mut still_running = 0;
        for worker in workers {
            if !join_with_timeout(worker.handle, timeout) {
                warn!(
                    connection_id = %worker.id,
                    "Connection thread did not finish before timeout"
                );
                still_running += 1;
            }
        }
        still_running
    }
}

/// Join `handle` if it finishes within `timeout`. Returns whether it did.
///
/// A thread that overruns is left detached.
pub(crate) fn join_with_timeout(handle: JoinHandle<()>, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while !handle.is_finished() {
        if Instant::now() >= deadline {
            return false;
        }
        thread::sleep(JOIN_POLL);
    }
    if handle.join().is_err() {
        warn!("Joined thread had panicked");
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    fn spawn_blocked(admission: &Admission) -> mpsc::Sender<()> {
        let (tx, rx) = mpsc::channel::<()>();
        admission
            .admit(ConnectionId::new(), move |done| {
                thread::Builder::new().spawn(move || {
                    let _ = rx.recv();
                    done.store(true, Ordering::Release);
                })
            })
            .unwrap();
        tx
    }

    #[test]
    fn test_flag_raised_at_limit_and_cleared_on_reap() {
        let admission = Admission::new(2);
        let running = AtomicBool::new(true);
        let first = spawn_blocked(&admission);
        let _second = spawn_blocked(&admission);
        assert_eq!(admission.active(), 2);
        assert!(admission.lock().at_capacity);

        first.send(()).unwrap();
        let deadline = Instant::now() + Duration::from_secs(2);
        while admission.reap() == 0 {
            assert!(Instant::now() < deadline, "worker was never reaped");
            thread::sleep(JOIN_POLL);
        }
        assert_eq!(admission.active(), 1);
        assert!(!admission.lock().at_capacity);
        assert!(admission.wait_for_capacity(&running));
    }

    #[test]
    fn test_waiter_released_on_stop() {
        let admission = Arc::new(Admission::new(1));
        let running = Arc::new(AtomicBool::new(true));
        let _blocker = spawn_blocked(&admission);

        let waiter = {
            let admission = Arc::clone(&admission);
            let running = Arc::clone(&running);
            thread::spawn(move || admission.wait_for_capacity(&running))
        };
        thread::sleep(Duration::from_millis(20));
        running.store(false, Ordering::SeqCst);
        admission.wake_all();
        assert!(!waiter.join().unwrap());
    }

    #[test]
    fn test_drain_reports_stragglers() {
        let admission = Admission::new(4);
        let blocker = spawn_blocked(&admission);
        assert_eq!(admission.drain(Duration::from_millis(20)), 1);
        assert_eq!(admission.active(), 0);
        drop(blocker);
    }
}
