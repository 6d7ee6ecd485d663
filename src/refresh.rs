//! Polling scheduler.
//!
//! Each owner (a subscription id, or the runtime's maintenance task) has at most one
//! active timer. Starting a timer for an owner that already has one replaces it.
//!
//! Timer semantics:
//! - the first tick fires one interval after `start`, never immediately;
//! - ticks never overlap: the loop awaits each tick future before waiting for the next;
//! - a tick is skipped while the owner's `busy` check reports work in flight;
//! - ticks missed while a slow tick was running are dropped, not replayed.

use std::{
    collections::HashMap,
    future::Future,
    sync::{
        Arc, Mutex,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use tokio::time::{MissedTickBehavior, interval_at};

use crate::platform::{
    Instant, MIN_TASK_INTERVAL,
    task::{self, JoinHandle},
};

/// Identifies one started timer. A stale handle cannot stop a replacement timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PollHandle {
    owner: u64,
    run: u64,
}

impl PollHandle {
    pub fn owner(self) -> u64 {
        self.owner
    }
}

struct ActiveTimer {
    run: u64,
    interval: Duration,
    task: JoinHandle<()>,
}

impl Drop for ActiveTimer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Registry of periodic timers keyed by owner.
#[derive(Clone, Default)]
pub struct PollingScheduler {
    timers: Arc<Mutex<HashMap<u64, ActiveTimer>>>,
    next_run: Arc<AtomicU64>,
}

impl PollingScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start (or replace) the timer for `owner`.
    ///
    /// `busy` is consulted at every tick; when it returns true the tick is skipped.
    /// Must be called from within a tokio runtime.
    pub fn start<B, T, Fut>(&self, owner: u64, interval: Duration, busy: B, tick: T) -> PollHandle
    where
        B: Fn() -> bool + Send + Sync + 'static,
        T: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let interval = interval.max(MIN_TASK_INTERVAL);
        let run = self.next_run.fetch_add(1, Ordering::Relaxed);

        let task = task::spawn(async move {
            let mut ticker = interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                if busy() {
                    crate::log_poll!("Skipping tick for owner {}: request in flight", owner);
                    continue;
                }
                crate::log_poll!("Tick for owner {}", owner);
                tick().await;
            }
        });

        let timer = ActiveTimer {
            run,
            interval,
            task,
        };
        if let Ok(mut timers) = self.timers.lock() {
            if timers.insert(owner, timer).is_some() {
                crate::log_poll!("Replaced timer for owner {} ({:?})", owner, interval);
            } else {
                crate::log_poll!("Started timer for owner {} ({:?})", owner, interval);
            }
        }

        PollHandle { owner, run }
    }

    /// Stop the timer identified by `handle`. Returns false if it was already replaced
    /// or stopped.
    pub fn stop(&self, handle: PollHandle) -> bool {
        let Ok(mut timers) = self.timers.lock() else {
            return false;
        };
        if timers
            .get(&handle.owner)
            .is_some_and(|timer| timer.run == handle.run)
        {
            timers.remove(&handle.owner);
            crate::log_poll!("Stopped timer for owner {}", handle.owner);
            return true;
        }
        false
    }

    /// Stop whatever timer `owner` has.
    pub fn stop_owner(&self, owner: u64) -> bool {
        let removed = self
            .timers
            .lock()
            .map(|mut timers| timers.remove(&owner))
            .ok()
            .flatten();
        // abort happens in ActiveTimer::drop, outside the lock
        removed.is_some()
    }

    pub fn stop_all(&self) {
        let drained: Vec<ActiveTimer> = match self.timers.lock() {
            Ok(mut timers) => timers.drain().map(|(_, timer)| timer).collect(),
            Err(_) => return,
        };
        crate::log_poll!("Stopping {} timer(s)", drained.len());
        drop(drained);
    }

    pub fn is_active(&self, handle: PollHandle) -> bool {
        self.timers
            .lock()
            .map(|timers| {
                timers
                    .get(&handle.owner)
                    .is_some_and(|timer| timer.run == handle.run && !timer.task.is_finished())
            })
            .unwrap_or(false)
    }

    /// The interval of `owner`'s active timer.
    pub fn interval_of(&self, owner: u64) -> Option<Duration> {
        self.timers
            .lock()
            .ok()
            .and_then(|timers| timers.get(&owner).map(|timer| timer.interval))
    }

    pub fn active_count(&self) -> usize {
        self.timers.lock().map(|timers| timers.len()).unwrap_or(0)
    }
}
