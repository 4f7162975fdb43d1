//! # Deferred Scheduler
//!
//! Delayed method calls that survive serialization.
//!
//! A scheduler lives inside the object graph as a built-in value. Each
//! pending entry records an absolute `fire_at` time, a method name and its
//! arguments; none of that is a live closure, so it persists like any other
//! data. Entries are armed on the [`TimerQueue`] only once a target is
//! attached. After a reload, attaching the target again re-arms every entry
//! against its recorded deadline, so overdue work fires on the next run.
//!
//! Lifecycle per entry: pending, armed, fired. The entry is removed after
//! its call returns, whether the call succeeded or not, so a process that
//! stops mid-call repeats the call on resume rather than losing it.
//!
//! Adding or removing an entry changes persisted data. When the target is
//! an observed handle the change is reported through it and settles like
//! any other write.

use crate::builtins::Builtin;
use crate::observer::This;
use crate::timers::{TimerId, TimerQueue};
use crate::types::AmberError;
use crate::value::{Object, ObjectRef, Value, WeakObjectRef};
use std::fmt;
use std::rc::Rc;
use tracing::{debug, error, warn};

/// One deferred call, as persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduleEntry {
    /// Absolute deadline in milliseconds since the Unix epoch.
    pub fire_at: i64,
    pub method: String,
    pub args: Vec<Value>,
}

struct PendingEntry {
    seq: u64,
    entry: ScheduleEntry,
    timer: Option<TimerId>,
}

/// Scheduler state held inside a [`Builtin::Scheduler`] object.
pub struct DeferredScheduler {
    timers: Rc<TimerQueue>,
    entries: Vec<PendingEntry>,
    target: Option<This>,
    next_seq: u64,
}

impl DeferredScheduler {
    pub fn new(timers: Rc<TimerQueue>) -> Self {
        Self {
            timers,
            entries: Vec::new(),
            target: None,
            next_seq: 0,
        }
    }

    /// Rebuild a scheduler from persisted entries. Nothing is armed until a
    /// target is attached.
    pub fn from_entries(timers: Rc<TimerQueue>, entries: Vec<ScheduleEntry>) -> Self {
        let mut scheduler = Self::new(timers);
        for entry in entries {
            scheduler.push(entry);
        }
        scheduler
    }

    fn push(&mut self, entry: ScheduleEntry) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.entries.push(PendingEntry {
            seq,
            entry,
            timer: None,
        });
        seq
    }

    /// Pending entries in scheduling order.
    pub fn entries(&self) -> Vec<ScheduleEntry> {
        self.entries.iter().map(|p| p.entry.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn armed(&self) -> usize {
        self.entries.iter().filter(|p| p.timer.is_some()).count()
    }

    pub fn has_target(&self) -> bool {
        self.target.is_some()
    }

    /// Copy the entries without target or armed timers.
    pub(crate) fn detached_copy(&self) -> Self {
        Self::from_entries(Rc::clone(&self.timers), self.entries())
    }
}

impl fmt::Debug for DeferredScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeferredScheduler")
            .field("pending", &self.entries.len())
            .field("armed", &self.armed())
            .field("has_target", &self.target.is_some())
            .finish()
    }
}

// =============================================================================
// SCHEDULER HANDLE
// =============================================================================

/// Handle to a scheduler object in the graph.
#[derive(Debug, Clone)]
pub struct SchedulerRef {
    object: ObjectRef,
}

impl SchedulerRef {
    /// Create a new scheduler object.
    pub fn new(timers: &Rc<TimerQueue>) -> Self {
        let object = ObjectRef::new(Object::Builtin(Builtin::Scheduler(DeferredScheduler::new(
            Rc::clone(timers),
        ))));
        Self { object }
    }

    pub fn from_object(object: &ObjectRef) -> Option<Self> {
        matches!(&*object.borrow(), Object::Builtin(Builtin::Scheduler(_))).then(|| Self {
            object: object.clone(),
        })
    }

    pub fn from_value(value: &Value) -> Option<Self> {
        value.as_object().and_then(Self::from_object)
    }

    pub fn object(&self) -> &ObjectRef {
        &self.object
    }

    pub fn to_value(&self) -> Value {
        Value::Object(self.object.clone())
    }

    fn with<R>(&self, f: impl FnOnce(&mut DeferredScheduler) -> R) -> Option<R> {
        match &mut *self.object.borrow_mut() {
            Object::Builtin(Builtin::Scheduler(scheduler)) => Some(f(scheduler)),
            _ => None,
        }
    }

    /// Schedule `method(args)` to run after `delay_ms`. Armed immediately if
    /// a target is attached.
    pub fn schedule(&self, delay_ms: i64, method: &str, args: Vec<Value>) {
        let added = self.with(|scheduler| {
            let entry = ScheduleEntry {
                fire_at: scheduler.timers.now_ms().saturating_add(delay_ms.max(0)),
                method: method.to_string(),
                args,
            };
            debug!(method, fire_at = entry.fire_at, "deferred call scheduled");
            let seq = scheduler.push(entry);
            (seq, scheduler.target.clone())
        });
        let Some((seq, target)) = added else {
            return;
        };
        if let Some(target) = target {
            self.arm(seq);
            report_change(&target);
        }
    }

    /// Attach the object scheduled methods are called on and arm every
    /// pending entry. A detached receiver is rejected.
    pub fn set_target(&self, target: This) -> Result<(), AmberError> {
        if target.object().is_none() {
            return Err(AmberError::InvalidTarget(
                "scheduler target must be an object".to_string(),
            ));
        }
        let unarmed = self
            .with(|scheduler| {
                scheduler.target = Some(target);
                scheduler
                    .entries
                    .iter()
                    .filter(|p| p.timer.is_none())
                    .map(|p| p.seq)
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();
        for seq in unarmed {
            self.arm(seq);
        }
        Ok(())
    }

    /// Pending entries in scheduling order.
    pub fn pending(&self) -> Vec<ScheduleEntry> {
        self.with(|scheduler| scheduler.entries()).unwrap_or_default()
    }

    /// Cancel armed timers, keeping the entries. They re-arm on the next
    /// [`SchedulerRef::set_target`].
    pub fn disarm(&self) {
        self.with(|scheduler| {
            let timers = Rc::clone(&scheduler.timers);
            for pending in &mut scheduler.entries {
                if let Some(id) = pending.timer.take() {
                    timers.clear(id);
                }
            }
            scheduler.target = None;
        });
    }

    fn arm(&self, seq: u64) {
        let weak = self.object.downgrade();
        self.with(|scheduler| {
            let timers = Rc::clone(&scheduler.timers);
            if let Some(pending) = scheduler.entries.iter_mut().find(|p| p.seq == seq) {
                let id = timers.set_deadline(pending.entry.fire_at, move || fire(&weak, seq));
                pending.timer = Some(id);
            }
        });
    }
}

/// Settle a change to scheduler data through an observed target.
fn report_change(target: &This) {
    if let This::Observed(handle) = target {
        handle.record_change();
    }
}

/// Timer callback: call the entry's method on the target, then remove the
/// entry and report the removal.
fn fire(weak: &WeakObjectRef, seq: u64) {
    let Some(object) = weak.upgrade() else {
        return;
    };
    let Some(scheduler) = SchedulerRef::from_object(&object) else {
        return;
    };
    let due = scheduler
        .with(|state| {
            let pending = state.entries.iter_mut().find(|p| p.seq == seq)?;
            pending.timer = None;
            Some((pending.entry.clone(), state.target.clone()))
        })
        .flatten();
    let Some((entry, target)) = due else {
        return;
    };

    match &target {
        None => warn!(method = %entry.method, "deferred call fired without a target; dropped"),
        Some(target) => match target.call_method(&entry.method, &entry.args) {
            Ok(_) => debug!(method = %entry.method, "deferred call completed"),
            Err(AmberError::NotCallable(member)) => {
                error!(method = %entry.method, member = %member, "scheduled method does not exist");
            }
            Err(err) => warn!(method = %entry.method, error = %err, "deferred call failed"),
        },
    }

    let removed = scheduler
        .with(|state| {
            let index = state.entries.iter().position(|p| p.seq == seq)?;
            state.entries.remove(index);
            Some(())
        })
        .flatten();
    if let (Some(()), Some(target)) = (removed, &target) {
        report_change(target);
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::class::Class;
    use crate::timers::ManualClock;

    fn counter() -> Rc<Class> {
        Class::builder("Counter")
            .field("hits", 0)
            .method("hit", |this, args| {
                let step = args.first().and_then(Value::as_f64).unwrap_or(1.0);
                let hits = this.get("hits").raw().as_f64().unwrap_or(0.0);
                this.set("hits", hits + step)?;
                Ok(Value::Null)
            })
            .build()
    }

    #[test]
    fn entries_wait_for_a_target() {
        let clock = ManualClock::new(0);
        let timers = TimerQueue::new(clock.clone());
        let scheduler = SchedulerRef::new(&timers);
        scheduler.schedule(10, "hit", vec![]);

        clock.advance(50);
        assert_eq!(timers.run_due(), 0);
        assert_eq!(scheduler.pending().len(), 1);

        let target = counter().instantiate();
        scheduler
            .set_target(This::Raw(target.clone()))
            .expect("target");
        assert_eq!(timers.run_due(), 1);
        assert_eq!(target.get("hits"), Value::from(1));
        assert!(scheduler.pending().is_empty());
    }

    #[test]
    fn fire_at_is_absolute() {
        let clock = ManualClock::new(5_000);
        let timers = TimerQueue::new(clock.clone());
        let scheduler = SchedulerRef::new(&timers);
        scheduler.schedule(250, "hit", vec![Value::from(2)]);

        let pending = scheduler.pending();
        assert_eq!(pending[0].fire_at, 5_250);
        assert_eq!(pending[0].args, vec![Value::from(2)]);
    }

    #[test]
    fn entry_is_pending_while_its_call_runs() {
        let timers = TimerQueue::new(ManualClock::new(0));
        let scheduler = SchedulerRef::new(&timers);
        let seen = Rc::new(std::cell::Cell::new(usize::MAX));
        let (inner_scheduler, inner_seen) = (scheduler.clone(), seen.clone());
        let class = Class::builder("Watcher")
            .method("look", move |_, _| {
                inner_seen.set(inner_scheduler.pending().len());
                Ok(Value::Null)
            })
            .build();
        scheduler
            .set_target(This::Raw(class.instantiate()))
            .expect("target");
        scheduler.schedule(0, "look", vec![]);

        assert_eq!(timers.run_due(), 1);
        assert_eq!(seen.get(), 1);
        assert!(scheduler.pending().is_empty());
    }

    #[test]
    fn unknown_method_drops_entry() {
        let clock = ManualClock::new(0);
        let timers = TimerQueue::new(clock.clone());
        let scheduler = SchedulerRef::new(&timers);
        let target = counter().instantiate();
        scheduler.set_target(This::Raw(target)).expect("target");
        scheduler.schedule(0, "missing", vec![]);

        assert_eq!(timers.run_due(), 1);
        assert!(scheduler.pending().is_empty());
    }

    #[test]
    fn disarm_keeps_entries() {
        let clock = ManualClock::new(0);
        let timers = TimerQueue::new(clock.clone());
        let scheduler = SchedulerRef::new(&timers);
        let target = counter().instantiate();
        scheduler
            .set_target(This::Raw(target.clone()))
            .expect("target");
        scheduler.schedule(10, "hit", vec![]);

        scheduler.disarm();
        clock.advance(20);
        assert_eq!(timers.run_due(), 0);
        assert_eq!(scheduler.pending().len(), 1);

        scheduler.set_target(This::Raw(target.clone())).expect("target");
        assert_eq!(timers.run_due(), 1);
        assert_eq!(target.get("hits"), Value::from(1));
    }

    #[test]
    fn detached_target_is_rejected() {
        let timers = TimerQueue::new(ManualClock::new(0));
        let scheduler = SchedulerRef::new(&timers);
        assert!(scheduler.set_target(This::Detached).is_err());
    }
}
