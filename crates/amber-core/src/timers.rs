//! # Timer Queue
//!
//! The host event loop, made explicit.
//!
//! Timers are one-shot callbacks ordered by deadline, then by insertion.
//! Nothing fires on its own: the host calls [`TimerQueue::run_due`] from its
//! loop. Time comes from a [`Clock`]; tests use [`ManualClock`].

use chrono::Utc;
use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;
use tracing::trace;

/// Source of the current time in milliseconds since the Unix epoch.
pub trait Clock {
    fn now_ms(&self) -> i64;
}

/// Wall-clock time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        Utc::now().timestamp_millis()
    }
}

/// A clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: Cell<i64>,
}

impl ManualClock {
    pub fn new(start_ms: i64) -> Rc<Self> {
        Rc::new(Self {
            now: Cell::new(start_ms),
        })
    }

    pub fn set(&self, now_ms: i64) {
        self.now.set(now_ms);
    }

    pub fn advance(&self, delta_ms: i64) {
        self.now.set(self.now.get().saturating_add(delta_ms));
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> i64 {
        self.now.get()
    }
}

/// Handle to a pending timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct TimerId(u64);

type TimerCallback = Box<dyn FnOnce()>;

/// One-shot timers driven by the host.
pub struct TimerQueue {
    clock: Rc<dyn Clock>,
    next_seq: Cell<u64>,
    timers: RefCell<BTreeMap<(i64, u64), TimerCallback>>,
}

impl TimerQueue {
    pub fn new(clock: Rc<dyn Clock>) -> Rc<Self> {
        Rc::new(Self {
            clock,
            next_seq: Cell::new(0),
            timers: RefCell::new(BTreeMap::new()),
        })
    }

    /// A queue on wall-clock time.
    pub fn system() -> Rc<Self> {
        Self::new(Rc::new(SystemClock))
    }

    pub fn now_ms(&self) -> i64 {
        self.clock.now_ms()
    }

    /// Run `callback` once `delay_ms` has elapsed. Negative delays are 0.
    pub fn set_timeout(&self, delay_ms: i64, callback: impl FnOnce() + 'static) -> TimerId {
        let deadline = self.now_ms().saturating_add(delay_ms.max(0));
        self.set_deadline(deadline, callback)
    }

    /// Run `callback` at an absolute time. Past deadlines fire on the next run.
    pub fn set_deadline(&self, deadline_ms: i64, callback: impl FnOnce() + 'static) -> TimerId {
        let seq = self.next_seq.get();
        self.next_seq.set(seq + 1);
        self.timers
            .borrow_mut()
            .insert((deadline_ms, seq), Box::new(callback));
        trace!(deadline_ms, seq, "timer armed");
        TimerId(seq)
    }

    /// Cancel a timer. Returns `false` if it already fired or was cleared.
    pub fn clear(&self, id: TimerId) -> bool {
        let mut timers = self.timers.borrow_mut();
        let key = timers.keys().find(|(_, seq)| *seq == id.0).copied();
        key.and_then(|key| timers.remove(&key)).is_some()
    }

    pub fn len(&self) -> usize {
        self.timers.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.timers.borrow().is_empty()
    }

    /// Earliest pending deadline.
    pub fn next_deadline(&self) -> Option<i64> {
        self.timers.borrow().keys().next().map(|(deadline, _)| *deadline)
    }

    /// Fire every timer whose deadline has passed, earliest first.
    ///
    /// Timers armed by a callback during this run wait for the next run.
    /// Returns the number of timers fired.
    pub fn run_due(&self) -> usize {
        let now = self.now_ms();
        let due: Vec<(i64, u64)> = self
            .timers
            .borrow()
            .range(..(now.saturating_add(1), 0))
            .map(|(key, _)| *key)
            .collect();

        let mut fired = 0;
        for key in due {
            let callback = self.timers.borrow_mut().remove(&key);
            if let Some(callback) = callback {
                callback();
                fired += 1;
            }
        }
        fired
    }
}

impl fmt::Debug for TimerQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimerQueue")
            .field("now_ms", &self.now_ms())
            .field("pending", &self.len())
            .finish()
    }
}

// =============================================================================
// TESTS
// =============================================================================
