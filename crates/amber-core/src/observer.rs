//! # Mutation Observer
//!
//! Path-tagged handles over an object graph that report every change.
//!
//! [`MutationObserver::observe`] wraps a root object in an [`Observed`]
//! handle. Reading a member through a handle returns primitives as-is and
//! wraps objects and callables in further handles whose path extends the
//! parent's. Writes, deletes and calls go through the handle and are
//! reported to the [`MutationSink`] before they are applied.
//!
//! ## Canonical handles
//!
//! Every raw target has one canonical handle core per observer, held in a
//! table of weak references keyed by identity. Reading the same object
//! twice, even along different paths, yields handles that are
//! [`Observed::same_target`]. Assigning a handle stores its raw object, so
//! the graph never contains handles.
//!
//! Class methods and natives are bound per receiver. A callable stored as
//! data is bound to the first receiver it was ever read against, so calling
//! it through another holder is reported as a call with a substituted
//! receiver.
//!
//! ## Settling
//!
//! A structural change (assign or delete) settles immediately when made at
//! the top level. Changes made while a call through a handle is running
//! settle once, when the outermost call returns. The sink is told through
//! [`MutationSink::settled`].

use crate::class::Callable;
use crate::primitives::INTERNAL_PREFIX;
use crate::types::{AmberError, CallbackError};
use crate::value::{MemberSource, ObjectId, ObjectRef, Value, WeakObjectRef};
use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::rc::{Rc, Weak};
use tracing::warn;

// =============================================================================
// EVENTS
// =============================================================================

/// One step of a mutation path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSegment {
    Key(String),
    /// Call on the receiver the callable was read from.
    Call,
    /// Call on a different receiver, described.
    CallWith(String),
}

impl PathSegment {
    pub fn key(name: impl Into<String>) -> Self {
        Self::Key(name.into())
    }
}

impl fmt::Display for PathSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Key(key) => f.write_str(key),
            Self::Call => f.write_str("call"),
            Self::CallWith(receiver) => write!(f, "call({receiver})"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationKind {
    Assign,
    Delete,
    Invoke,
}

/// A change about to be applied through an observed handle.
#[derive(Debug, Clone, PartialEq)]
pub struct MutationEvent {
    pub path: Vec<PathSegment>,
    pub kind: MutationKind,
    /// Assigned value, for [`MutationKind::Assign`].
    pub value: Option<Value>,
    /// Call arguments, for [`MutationKind::Invoke`].
    pub args: Vec<Value>,
}

impl MutationEvent {
    pub fn path_strings(&self) -> Vec<String> {
        self.path.iter().map(ToString::to_string).collect()
    }

    /// True if any key on the path belongs to the observation layer.
    pub fn touches_internal(&self) -> bool {
        self.path
            .iter()
            .any(|segment| matches!(segment, PathSegment::Key(k) if k.starts_with(INTERNAL_PREFIX)))
    }

    /// Assignments and deletions change structure; calls do not.
    pub fn is_structural(&self) -> bool {
        self.kind != MutationKind::Invoke
    }
}

/// Receives mutation events.
pub trait MutationSink {
    /// Called before each change is applied. Errors are logged and ignored.
    fn record(&self, event: &MutationEvent) -> Result<(), CallbackError>;

    /// Called once structural changes have settled.
    fn settled(&self) {}
}

struct FnSink<F>(F);

impl<F> MutationSink for FnSink<F>
where
    F: Fn(&MutationEvent) -> Result<(), CallbackError>,
{
    fn record(&self, event: &MutationEvent) -> Result<(), CallbackError> {
        (self.0)(event)
    }
}

// =============================================================================
// OBSERVER
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum CanonKey {
    Object(ObjectId),
    Callable(u64),
    Method { callable: u64, receiver: ObjectId },
}

enum Raw {
    Object(ObjectRef),
    Callable {
        callable: Callable,
        bound: Option<WeakObjectRef>,
    },
}

struct HandleCore {
    raw: Raw,
}

struct ObserverCore {
    sink: Rc<dyn MutationSink>,
    canon: RefCell<BTreeMap<CanonKey, Weak<HandleCore>>>,
    /// First receiver each callable was read against.
    origins: RefCell<BTreeMap<u64, WeakObjectRef>>,
    depth: Cell<u32>,
    dirty: Cell<bool>,
}

/// Produces observed handles and reports their mutations to one sink.
#[derive(Clone)]
pub struct MutationObserver {
    core: Rc<ObserverCore>,
}

impl MutationObserver {
    pub fn new(sink: Rc<dyn MutationSink>) -> Self {
        Self {
            core: Rc::new(ObserverCore {
                sink,
                canon: RefCell::new(BTreeMap::new()),
                origins: RefCell::new(BTreeMap::new()),
                depth: Cell::new(0),
                dirty: Cell::new(false),
            }),
        }
    }

    /// An observer whose sink is a plain closure.
    pub fn with_callback(
        callback: impl Fn(&MutationEvent) -> Result<(), CallbackError> + 'static,
    ) -> Self {
        Self::new(Rc::new(FnSink(callback)))
    }

    /// Wrap a root object. The handle's path is empty.
    pub fn observe(&self, object: &ObjectRef) -> Observed {
        let core = self
            .core
            .handle_for(CanonKey::Object(object.id()), || Raw::Object(object.clone()));
        Observed {
            core,
            path: Rc::from(Vec::new()),
            observer: Rc::clone(&self.core),
            via: None,
        }
    }

    /// Wrap any value at the root path.
    ///
    /// Primitives come back unchanged. A handle from this observer comes
    /// back as-is; a handle from another observer is re-wrapped by its raw
    /// target.
    pub fn wrap(&self, member: impl Into<Member>) -> Member {
        match member.into() {
            Member::Observed(handle) if Rc::ptr_eq(&handle.observer, &self.core) => {
                Member::Observed(handle)
            }
            other => wrap_value(&self.core, other.into_raw(), Vec::new(), None, MemberSource::Own),
        }
    }

    /// Run `f` as one unit: structural changes made inside settle once,
    /// when it returns.
    pub fn batch<R>(&self, f: impl FnOnce() -> R) -> R {
        self.core.enter();
        let result = f();
        self.core.leave();
        result
    }

    /// Number of live canonical handles.
    pub fn tracked(&self) -> usize {
        let mut canon = self.core.canon.borrow_mut();
        canon.retain(|_, weak| weak.strong_count() > 0);
        canon.len()
    }
}

impl fmt::Debug for MutationObserver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MutationObserver")
            .field("tracked", &self.core.canon.borrow().len())
            .field("depth", &self.core.depth.get())
            .finish()
    }
}

impl ObserverCore {
    /// Canonical core for `key`, creating it with `make` if none is alive.
    /// Dead entries are swept whenever a new one is inserted.
    fn handle_for(&self, key: CanonKey, make: impl FnOnce() -> Raw) -> Rc<HandleCore> {
        let mut canon = self.canon.borrow_mut();
        if let Some(existing) = canon.get(&key).and_then(Weak::upgrade) {
            return existing;
        }
        canon.retain(|_, weak| weak.strong_count() > 0);
        let core = Rc::new(HandleCore { raw: make() });
        canon.insert(key, Rc::downgrade(&core));
        core
    }

    fn emit(&self, event: &MutationEvent) {
        let sink = Rc::clone(&self.sink);
        match panic::catch_unwind(AssertUnwindSafe(|| sink.record(event))) {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                warn!(path = %join_path(&event.path), error = %err, "mutation sink failed");
            }
            Err(_) => warn!(path = %join_path(&event.path), "mutation sink panicked"),
        }
    }

    /// The receiver `callable` was first read against, recording `reader`
    /// if none is alive. Dead entries are swept whenever one is recorded.
    fn origin_for(&self, callable: u64, reader: Option<&ObjectRef>) -> Option<ObjectRef> {
        let mut origins = self.origins.borrow_mut();
        if let Some(origin) = origins.get(&callable).and_then(WeakObjectRef::upgrade) {
            return Some(origin);
        }
        let reader = reader?;
        origins.retain(|_, weak| weak.upgrade().is_some());
        origins.insert(callable, reader.downgrade());
        Some(reader.clone())
    }

    fn applied(&self, event: &MutationEvent) {
        if event.is_structural() {
            self.changed();
        }
    }

    /// Note a structural change, settling now unless a call is running.
    fn changed(&self) {
        self.dirty.set(true);
        if self.depth.get() == 0 {
            self.settle();
        }
    }

    fn settle(&self) {
        if !self.dirty.replace(false) {
            return;
        }
        let sink = Rc::clone(&self.sink);
        if panic::catch_unwind(AssertUnwindSafe(|| sink.settled())).is_err() {
            warn!("mutation sink panicked while settling");
        }
    }

    fn enter(&self) {
        self.depth.set(self.depth.get() + 1);
    }

    fn leave(&self) {
        let depth = self.depth.get().saturating_sub(1);
        self.depth.set(depth);
        if depth == 0 {
            self.settle();
        }
    }
}

fn wrap_value(
    observer: &Rc<ObserverCore>,
    value: Value,
    path: Vec<PathSegment>,
    parent: Option<&Observed>,
    source: MemberSource,
) -> Member {
    match value {
        Value::Object(object) => {
            let core =
                observer.handle_for(CanonKey::Object(object.id()), || Raw::Object(object.clone()));
            Member::Observed(Observed {
                core,
                path: path.into(),
                observer: Rc::clone(observer),
                via: None,
            })
        }
        Value::Callable(callable) => {
            let reader = parent.and_then(Observed::object);
            let origin = observer.origin_for(callable.id(), reader.as_ref());
            let bound = match source {
                MemberSource::Intrinsic => reader,
                _ => origin,
            };
            let key = match &bound {
                Some(receiver) => CanonKey::Method {
                    callable: callable.id(),
                    receiver: receiver.id(),
                },
                None => CanonKey::Callable(callable.id()),
            };
            let core = observer.handle_for(key, || Raw::Callable {
                callable: callable.clone(),
                bound: bound.as_ref().map(ObjectRef::downgrade),
            });
            Member::Observed(Observed {
                core,
                path: path.into(),
                observer: Rc::clone(observer),
                via: parent.map(|p| Rc::new(p.clone())),
            })
        }
        primitive => Member::Plain(primitive),
    }
}

fn join_path(path: &[PathSegment]) -> String {
    path.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(".")
}

// =============================================================================
// OBSERVED HANDLE
// =============================================================================

/// A path-tagged handle over an object or callable.
#[derive(Clone)]
pub struct Observed {
    core: Rc<HandleCore>,
    path: Rc<[PathSegment]>,
    observer: Rc<ObserverCore>,
    /// Handle the callable was read from.
    via: Option<Rc<Observed>>,
}

impl Observed {
    pub fn path(&self) -> &[PathSegment] {
        &self.path
    }

    pub fn path_string(&self) -> String {
        join_path(&self.path)
    }

    /// The raw value behind the handle.
    pub fn raw(&self) -> Value {
        match &self.core.raw {
            Raw::Object(object) => Value::Object(object.clone()),
            Raw::Callable { callable, .. } => Value::Callable(callable.clone()),
        }
    }

    /// The raw object behind the handle, if it wraps an object.
    pub fn object(&self) -> Option<ObjectRef> {
        match &self.core.raw {
            Raw::Object(object) => Some(object.clone()),
            Raw::Callable { .. } => None,
        }
    }

    pub fn is_callable(&self) -> bool {
        matches!(self.core.raw, Raw::Callable { .. })
    }

    /// True if both handles share one canonical core.
    pub fn same_target(&self, other: &Observed) -> bool {
        Rc::ptr_eq(&self.core, &other.core)
    }

    pub fn type_name(&self) -> String {
        self.raw().type_name()
    }

    pub fn keys(&self) -> Vec<String> {
        self.object().map(|object| object.keys()).unwrap_or_default()
    }

    fn child_path(&self, segment: PathSegment) -> Vec<PathSegment> {
        let mut path = self.path.to_vec();
        path.push(segment);
        path
    }

    /// Read a member. Missing members read as `Null`.
    pub fn get(&self, key: &str) -> Member {
        let Some(object) = self.object() else {
            return Member::Plain(Value::Null);
        };
        let (value, source) = object.get_member(key);
        wrap_value(
            &self.observer,
            value,
            self.child_path(PathSegment::key(key)),
            Some(self),
            source,
        )
    }

    /// Read a member along a dotted path.
    pub fn get_path(&self, path: &str) -> Member {
        let mut current = Member::Observed(self.clone());
        for key in path.split('.').filter(|k| !k.is_empty()) {
            current = match current {
                Member::Observed(handle) => handle.get(key),
                Member::Plain(_) => return Member::Plain(Value::Null),
            };
        }
        current
    }

    /// Write a member. Handles are stored as their raw target.
    pub fn set(&self, key: &str, value: impl Into<Member>) -> Result<(), AmberError> {
        let object = self.expect_object()?;
        let value = value.into().into_raw();
        let event = MutationEvent {
            path: self.child_path(PathSegment::key(key)),
            kind: MutationKind::Assign,
            value: Some(value.clone()),
            args: Vec::new(),
        };
        self.observer.emit(&event);
        object.set(key, value)?;
        self.observer.applied(&event);
        Ok(())
    }

    /// Delete a member. Returns whether anything was removed.
    pub fn delete(&self, key: &str) -> Result<bool, AmberError> {
        let object = self.expect_object()?;
        let event = MutationEvent {
            path: self.child_path(PathSegment::key(key)),
            kind: MutationKind::Delete,
            value: None,
            args: Vec::new(),
        };
        self.observer.emit(&event);
        let removed = object.delete(key);
        self.observer.applied(&event);
        Ok(removed)
    }

    /// Call with the receiver this callable was read from.
    pub fn call(&self, args: &[Value]) -> Result<Member, AmberError> {
        let receiver = match &self.via {
            Some(parent) => This::Observed((**parent).clone()),
            None => self.bound_receiver(),
        };
        self.call_with(&receiver, args)
    }

    /// Call with an explicit receiver.
    ///
    /// Reported as `Call` when the receiver is the object the callable is
    /// bound to, otherwise as `CallWith`.
    pub fn call_with(&self, receiver: &This, args: &[Value]) -> Result<Member, AmberError> {
        let Raw::Callable { callable, bound } = &self.core.raw else {
            return Err(AmberError::NotCallable(self.path_string()));
        };
        let bound = bound.as_ref().and_then(WeakObjectRef::upgrade);
        let same_receiver = match (&bound, receiver.object()) {
            (Some(bound), Some(receiver)) => bound.ptr_eq(&receiver),
            (None, None) => true,
            _ => false,
        };
        let marker = if same_receiver {
            PathSegment::Call
        } else {
            PathSegment::CallWith(receiver.describe())
        };
        let path = self.child_path(marker);
        let event = MutationEvent {
            path: path.clone(),
            kind: MutationKind::Invoke,
            value: None,
            args: args.to_vec(),
        };
        self.observer.emit(&event);

        self.observer.enter();
        let result = callable.invoke(receiver, args);
        if result.is_ok() && callable.mutates_receiver() {
            self.observer.dirty.set(true);
        }
        self.observer.leave();

        Ok(wrap_value(
            &self.observer,
            result?,
            path,
            None,
            MemberSource::Own,
        ))
    }

    /// Read member `name` and call it on this handle.
    pub fn call_method(&self, name: &str, args: &[Value]) -> Result<Member, AmberError> {
        match self.get(name) {
            Member::Observed(method) if method.is_callable() => method.call(args),
            _ => Err(AmberError::NotCallable(join_path(
                &self.child_path(PathSegment::key(name)),
            ))),
        }
    }

    /// Report a change made to the graph behind this handle without going
    /// through it, so it settles like any other write.
    pub(crate) fn record_change(&self) {
        self.observer.changed();
    }

    fn bound_receiver(&self) -> This {
        match &self.core.raw {
            Raw::Callable {
                bound: Some(bound), ..
            } => bound.upgrade().map_or(This::Detached, This::Raw),
            _ => This::Detached,
        }
    }

    fn expect_object(&self) -> Result<ObjectRef, AmberError> {
        self.object().ok_or_else(|| {
            AmberError::InvalidTarget(format!("`{}` is not an object", self.path_string()))
        })
    }
}

impl fmt::Debug for Observed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Observed")
            .field("path", &self.path_string())
            .field("target", &self.type_name())
            .finish()
    }
}

// =============================================================================
// MEMBER
// =============================================================================

/// Result of reading through a handle: a primitive, or a further handle.
#[derive(Clone, Debug)]
pub enum Member {
    Plain(Value),
    Observed(Observed),
}

impl Member {
    /// The raw value, unwrapping handles.
    pub fn raw(&self) -> Value {
        match self {
            Self::Plain(value) => value.clone(),
            Self::Observed(handle) => handle.raw(),
        }
    }

    pub fn into_raw(self) -> Value {
        match self {
            Self::Plain(value) => value,
            Self::Observed(handle) => handle.raw(),
        }
    }

    pub fn observed(&self) -> Option<&Observed> {
        match self {
            Self::Observed(handle) => Some(handle),
            Self::Plain(_) => None,
        }
    }

    pub fn into_observed(self) -> Option<Observed> {
        match self {
            Self::Observed(handle) => Some(handle),
            Self::Plain(_) => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Plain(Value::Null))
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Plain(value) => value.as_f64(),
            Self::Observed(_) => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Plain(value) => value.as_bool(),
            Self::Observed(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Plain(value) => value.as_str(),
            Self::Observed(_) => None,
        }
    }
}

impl From<Value> for Member {
    fn from(value: Value) -> Self {
        Self::Plain(value)
    }
}

impl From<Observed> for Member {
    fn from(handle: Observed) -> Self {
        Self::Observed(handle)
    }
}

impl From<&Observed> for Member {
    fn from(handle: &Observed) -> Self {
        Self::Observed(handle.clone())
    }
}

impl From<ObjectRef> for Member {
    fn from(object: ObjectRef) -> Self {
        Self::Plain(Value::Object(object))
    }
}

impl From<f64> for Member {
    fn from(n: f64) -> Self {
        Self::Plain(Value::Number(n))
    }
}

impl From<i32> for Member {
    fn from(n: i32) -> Self {
        Self::Plain(Value::from(n))
    }
}

impl From<i64> for Member {
    fn from(n: i64) -> Self {
        Self::Plain(Value::from(n))
    }
}

impl From<bool> for Member {
    fn from(b: bool) -> Self {
        Self::Plain(Value::Bool(b))
    }
}

impl From<&str> for Member {
    fn from(s: &str) -> Self {
        Self::Plain(Value::from(s))
    }
}

impl From<String> for Member {
    fn from(s: String) -> Self {
        Self::Plain(Value::String(s))
    }
}

// =============================================================================
// RECEIVER
// =============================================================================

/// The receiver a method runs against.
///
/// Methods called through an observed handle get `Observed`, so their own
/// writes are reported with full paths. Scheduled calls on a raw target and
/// direct invocations get `Raw`.
#[derive(Clone, Debug)]
pub enum This {
    Detached,
    Raw(ObjectRef),
    Observed(Observed),
}

impl This {
    pub fn object(&self) -> Option<ObjectRef> {
        match self {
            Self::Detached => None,
            Self::Raw(object) => Some(object.clone()),
            Self::Observed(handle) => handle.object(),
        }
    }

    /// The receiver as a plain value; `Null` when detached.
    pub fn raw_value(&self) -> Value {
        self.object().map(Value::Object).unwrap_or_default()
    }

    /// Short description used in detached-call markers.
    pub fn describe(&self) -> String {
        match self {
            Self::Detached => "undefined".to_string(),
            Self::Raw(object) => format!("[{}]", object.type_name()),
            Self::Observed(handle) if handle.path().is_empty() => {
                format!("[{}]", handle.type_name())
            }
            Self::Observed(handle) => handle.path_string(),
        }
    }

    pub fn get(&self, key: &str) -> Member {
        match self {
            Self::Detached => Member::Plain(Value::Null),
            Self::Raw(object) => Member::Plain(object.get(key)),
            Self::Observed(handle) => handle.get(key),
        }
    }

    pub fn set(&self, key: &str, value: impl Into<Member>) -> Result<(), AmberError> {
        match self {
            Self::Detached => Err(AmberError::InvalidTarget(format!(
                "cannot set `{key}` without a receiver"
            ))),
            Self::Raw(object) => object.set(key, value.into().into_raw()),
            Self::Observed(handle) => handle.set(key, value),
        }
    }

    pub fn delete(&self, key: &str) -> Result<bool, AmberError> {
        match self {
            Self::Detached => Err(AmberError::InvalidTarget(format!(
                "cannot delete `{key}` without a receiver"
            ))),
            Self::Raw(object) => Ok(object.delete(key)),
            Self::Observed(handle) => handle.delete(key),
        }
    }

    /// Look up `name` on the receiver and call it.
    pub fn call_method(&self, name: &str, args: &[Value]) -> Result<Member, AmberError> {
        match self {
            Self::Detached => Err(AmberError::NotCallable(name.to_string())),
            Self::Raw(object) => match object.get(name) {
                Value::Callable(callable) => callable.invoke(self, args).map(Member::Plain),
                _ => Err(AmberError::NotCallable(name.to_string())),
            },
            Self::Observed(handle) => handle.call_method(name, args),
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::class::Class;

    type Log = Rc<RefCell<Vec<MutationEvent>>>;

    fn recording() -> (MutationObserver, Log) {
        let log: Log = Rc::new(RefCell::new(Vec::new()));
        let sink = log.clone();
        let observer = MutationObserver::with_callback(move |event| {
            sink.borrow_mut().push(event.clone());
            Ok(())
        });
        (observer, log)
    }

    fn paths(log: &Log) -> Vec<Vec<String>> {
        log.borrow().iter().map(MutationEvent::path_strings).collect()
    }

    struct Counting(Cell<u32>);

    impl MutationSink for Counting {
        fn record(&self, _: &MutationEvent) -> Result<(), CallbackError> {
            Ok(())
        }
        fn settled(&self) {
            self.0.set(self.0.get() + 1);
        }
    }

    #[test]
    fn nested_write_reports_full_path() {
        let (observer, log) = recording();
        let root = Value::map([("a", Value::map([("b", Value::empty_map())]))]);
        let handle = observer.observe(root.as_object().expect("object"));

        let b = handle.get("a").into_observed().expect("a").get("b");
        b.observed().expect("b").set("c", 5).expect("set");

        assert_eq!(paths(&log), vec![vec!["a", "b", "c"]]);
        assert_eq!(log.borrow()[0].kind, MutationKind::Assign);
        assert_eq!(log.borrow()[0].value, Some(Value::from(5)));
        assert_eq!(root.get("a").get("b").get("c"), Value::from(5));
    }

    #[test]
    fn primitives_are_not_wrapped() {
        let (observer, _) = recording();
        assert!(matches!(observer.wrap(Value::from(3)), Member::Plain(Value::Number(_))));
        assert!(observer.wrap(Value::Null).is_null());
    }

    #[test]
    fn repeated_reads_share_a_core() {
        let (observer, _) = recording();
        let root = Value::map([("a", Value::empty_map())]);
        let handle = observer.observe(root.as_object().expect("object"));

        let first = handle.get("a").into_observed().expect("a");
        let second = handle.get("a").into_observed().expect("a");
        assert!(first.same_target(&second));

        let rewrapped = observer.wrap(first.clone()).into_observed().expect("handle");
        assert!(rewrapped.same_target(&first));
    }

    #[test]
    fn sink_errors_do_not_block_writes() {
        let observer = MutationObserver::with_callback(|_| Err("sink down".into()));
        let root = Value::empty_map();
        let handle = observer.observe(root.as_object().expect("object"));
        handle.set("x", 1).expect("set");
        assert_eq!(root.get("x"), Value::from(1));
    }

    #[test]
    #[allow(clippy::panic)]
    fn sink_panics_do_not_block_writes() {
        let observer = MutationObserver::with_callback(|_| panic!("sink exploded"));
        let root = Value::empty_map();
        let handle = observer.observe(root.as_object().expect("object"));
        handle.set("x", 1).expect("set");
        assert_eq!(root.get("x"), Value::from(1));
    }

    #[test]
    fn method_calls_report_call_then_inner_writes() {
        let (observer, log) = recording();
        let class = Class::builder("Counter")
            .field("n", 0)
            .method("bump", |this, _| {
                let n = this.get("n").as_f64().unwrap_or(0.0);
                this.set("n", n + 1.0)?;
                Ok(Value::from(n + 1.0))
            })
            .build();
        let counter = class.instantiate();
        let handle = observer.observe(&counter);

        let result = handle.call_method("bump", &[]).expect("call");
        assert_eq!(result.as_f64(), Some(1.0));
        assert_eq!(paths(&log), vec![vec!["bump", "call"], vec!["n"]]);
        assert_eq!(log.borrow()[0].kind, MutationKind::Invoke);
    }

    #[test]
    fn detached_calls_are_marked() {
        let (observer, log) = recording();
        let class = Class::builder("Thing")
            .method("touch", |_, _| Ok(Value::Null))
            .build();
        let root = Value::map([
            ("a", Value::Object(class.instantiate())),
            ("b", Value::Object(class.instantiate())),
        ]);
        let handle = observer.observe(root.as_object().expect("object"));
        let a = handle.get("a").into_observed().expect("a");
        let b = handle.get("b").into_observed().expect("b");

        let touch = b.get("touch").into_observed().expect("method");
        touch.call(&[]).expect("bound call");
        touch
            .call_with(&This::Observed(a.clone()), &[Value::from(1)])
            .expect("detached call");

        assert_eq!(
            paths(&log),
            vec![vec!["b", "touch", "call"], vec!["b", "touch", "call(a)"]]
        );
        assert_eq!(log.borrow()[1].args, vec![Value::from(1)]);
    }

    #[test]
    fn reassigned_method_carries_the_new_receiver() {
        let (observer, log) = recording();
        let class = Class::builder("Thing")
            .method("touch", |_, _| Ok(Value::Null))
            .build();
        let root = Value::map([
            ("a", Value::Object(class.instantiate())),
            ("b", Value::empty_map()),
        ]);
        let handle = observer.observe(root.as_object().expect("object"));
        let a = handle.get("a").into_observed().expect("a");
        let b = handle.get("b").into_observed().expect("b");

        let touch = a.get("touch").into_observed().expect("method");
        touch.call(&[]).expect("call");
        b.set("touch", &touch).expect("reassign");
        let borrowed = b.get("touch").into_observed().expect("method");
        assert!(borrowed.same_target(&touch));
        b.call_method("touch", &[Value::from(2)]).expect("borrowed call");

        assert_eq!(
            paths(&log),
            vec![
                vec!["a", "touch", "call"],
                vec!["b", "touch"],
                vec!["b", "touch", "call(b)"],
            ]
        );
    }

    #[test]
    fn data_callables_keep_their_first_receiver() {
        let (observer, log) = recording();
        let shout = Callable::native("shout", |_, _| Ok(Value::Null));
        let root = Value::map([
            ("x", Value::map([("f", Value::Callable(shout.clone()))])),
            ("y", Value::map([("f", Value::Callable(shout))])),
        ]);
        let handle = observer.observe(root.as_object().expect("object"));

        let first = handle.get_path("x.f").into_observed().expect("f");
        first.call(&[]).expect("call");
        handle.get("y").into_observed().expect("y").call_method("f", &[]).expect("call");

        assert_eq!(
            paths(&log),
            vec![vec!["x", "f", "call"], vec!["y", "f", "call(y)"]]
        );
    }

    #[test]
    fn changing_natives_settle() {
        let sink = Rc::new(Counting(Cell::new(0)));
        let observer = MutationObserver::new(sink.clone());
        let root = Value::map([
            ("items", Value::list(vec![])),
            ("index", Value::builtin(crate::builtins::Builtin::Map(Vec::new()))),
        ]);
        let handle = observer.observe(root.as_object().expect("object"));

        let index = handle.get("index").into_observed().expect("index");
        index.call_method("has", &[Value::from("k")]).expect("has");
        assert_eq!(sink.0.get(), 0);

        let items = handle.get("items").into_observed().expect("items");
        items.call_method("push", &[Value::from(1)]).expect("push");
        assert_eq!(sink.0.get(), 1);
    }

    #[test]
    fn native_methods_mutate_the_raw_receiver() {
        let (observer, log) = recording();
        let root = Value::map([("items", Value::list(vec![]))]);
        let handle = observer.observe(root.as_object().expect("object"));

        let items = handle.get("items").into_observed().expect("items");
        items.call_method("push", &[Value::from("x")]).expect("push");

        assert_eq!(root.get("items").get("0"), Value::from("x"));
        assert_eq!(paths(&log), vec![vec!["items", "push", "call"]]);
    }

    #[test]
    fn calling_a_non_callable_fails() {
        let (observer, _) = recording();
        let root = Value::map([("x", Value::from(1))]);
        let handle = observer.observe(root.as_object().expect("object"));
        assert!(matches!(
            handle.call_method("x", &[]),
            Err(AmberError::NotCallable(path)) if path == "x"
        ));
    }

    #[test]
    fn settled_fires_once_per_outer_call() {
        let sink = Rc::new(Counting(Cell::new(0)));
        let observer = MutationObserver::new(sink.clone());
        let class = Class::builder("Pair")
            .field("a", 0)
            .field("b", 0)
            .method("both", |this, _| {
                this.set("a", 1)?;
                this.set("b", 2)?;
                Ok(Value::Null)
            })
            .method("noop", |_, _| Ok(Value::Null))
            .build();
        let pair = class.instantiate();
        let handle = observer.observe(&pair);

        handle.call_method("both", &[]).expect("call");
        assert_eq!(sink.0.get(), 1);
        handle.call_method("noop", &[]).expect("call");
        assert_eq!(sink.0.get(), 1);
        handle.set("a", 5).expect("set");
        assert_eq!(sink.0.get(), 2);
    }

    #[test]
    fn dead_handles_are_swept() {
        let (observer, _) = recording();
        let root = Value::map([("a", Value::empty_map()), ("b", Value::empty_map())]);
        let handle = observer.observe(root.as_object().expect("object"));
        drop(handle.get("a"));
        let _b = handle.get("b");
        assert_eq!(observer.tracked(), 2);
    }
}
