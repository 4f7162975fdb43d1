//! # Value Model
//!
//! The closed set of node kinds every Amber component operates on.
//!
//! A [`Value`] is either a primitive (`Null`, `Bool`, `Number`, `String`),
//! a shared identity-bearing [`ObjectRef`], or a [`Callable`]. Objects hold
//! one [`Object`] variant behind a `RefCell`; two `ObjectRef`s are the same
//! object only when they point at the same cell.
//!
//! The graph is single-threaded (`Rc`/`RefCell`). Cycles are representable
//! in memory but rejected by the serializer.

use crate::builtins::{self, Builtin};
use crate::class::{Callable, Class};
use crate::types::AmberError;
use std::cell::{Ref, RefCell, RefMut};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

/// Identity of an object cell, unique for the lifetime of the process.
pub type ObjectId = u64;

static NEXT_IDENTITY: AtomicU64 = AtomicU64::new(1);

/// Allocate a fresh identity for an object or callable.
pub(crate) fn next_identity() -> u64 {
    NEXT_IDENTITY.fetch_add(1, Ordering::Relaxed)
}

// =============================================================================
// VALUE
// =============================================================================

/// A node in an Amber object graph.
///
/// Equality (`==`) is deep and structural for objects, identity-based for
/// callables. Use [`Value::same_value`] for identity comparison.
#[derive(Clone, Debug, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Object(ObjectRef),
    Callable(Callable),
}

impl Value {
    /// Create a new list object.
    pub fn list(items: Vec<Value>) -> Self {
        Self::Object(ObjectRef::new(Object::List(items)))
    }

    /// Create a new plain map object.
    pub fn map<K: Into<String>>(entries: impl IntoIterator<Item = (K, Value)>) -> Self {
        let fields = entries
            .into_iter()
            .map(|(key, value)| (key.into(), value))
            .collect();
        Self::Object(ObjectRef::new(Object::Map(fields)))
    }

    /// Create a new empty plain map object.
    pub fn empty_map() -> Self {
        Self::Object(ObjectRef::new(Object::Map(BTreeMap::new())))
    }

    /// Wrap a built-in value in a new object.
    pub fn builtin(builtin: Builtin) -> Self {
        Self::Object(ObjectRef::new(Object::Builtin(builtin)))
    }

    /// Create an opaque, unrepresentable object.
    pub fn opaque(kind: OpaqueKind) -> Self {
        Self::Object(ObjectRef::new(Object::Opaque(kind)))
    }

    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// True for `Null`, `Bool`, `Number` and `String`.
    #[must_use]
    pub fn is_primitive(&self) -> bool {
        !matches!(self, Self::Object(_) | Self::Callable(_))
    }

    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_object(&self) -> Option<&ObjectRef> {
        match self {
            Self::Object(object) => Some(object),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_callable(&self) -> Option<&Callable> {
        match self {
            Self::Callable(callable) => Some(callable),
            _ => None,
        }
    }

    /// Read a member of an object value. Primitives have no members.
    pub fn get(&self, key: &str) -> Value {
        self.as_object()
            .map(|object| object.get(key))
            .unwrap_or_default()
    }

    /// Human-readable type name used in log placeholders.
    pub fn type_name(&self) -> String {
        match self {
            Self::Null => "null".to_string(),
            Self::Bool(_) => "boolean".to_string(),
            Self::Number(_) => "number".to_string(),
            Self::String(_) => "string".to_string(),
            Self::Object(object) => object.type_name(),
            Self::Callable(_) => "Function".to_string(),
        }
    }

    /// Identity comparison: primitives by value, objects and callables by
    /// reference. `NaN` is the same value as `NaN`.
    pub fn same_value(&self, other: &Value) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Number(a), Self::Number(b)) => a == b || (a.is_nan() && b.is_nan()),
            (Self::String(a), Self::String(b)) => a == b,
            (Self::Object(a), Self::Object(b)) => a.ptr_eq(b),
            (Self::Callable(a), Self::Callable(b)) => a.ptr_eq(b),
            _ => false,
        }
    }

    /// Copy the object tree into fresh cells. Callables keep their identity.
    pub fn deep_clone(&self) -> Value {
        match self {
            Self::Object(object) => Self::Object(object.deep_clone()),
            other => other.clone(),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Object(a), Self::Object(b)) => a.ptr_eq(b) || *a.borrow() == *b.borrow(),
            _ => self.same_value(other),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Self::Number(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Self::Number(f64::from(n))
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Self::Number(n as f64)
    }
}

impl From<u32> for Value {
    fn from(n: u32) -> Self {
        Self::Number(f64::from(n))
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<ObjectRef> for Value {
    fn from(object: ObjectRef) -> Self {
        Self::Object(object)
    }
}

impl From<Callable> for Value {
    fn from(callable: Callable) -> Self {
        Self::Callable(callable)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Self::list(items)
    }
}

impl From<Builtin> for Value {
    fn from(builtin: Builtin) -> Self {
        Self::builtin(builtin)
    }
}

// =============================================================================
// OBJECTS
// =============================================================================

/// Live objects that cannot be written to text. They serialize as `null`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpaqueKind {
    /// Pending asynchronous work.
    Promise,
    /// A unique token; the description is informational only.
    Symbol(String),
    /// A handle to an external resource.
    Handle(String),
}

impl OpaqueKind {
    fn type_name(&self) -> &'static str {
        match self {
            Self::Promise => "Promise",
            Self::Symbol(_) => "Symbol",
            Self::Handle(_) => "Handle",
        }
    }
}

/// An instance of a registered domain [`Class`].
#[derive(Clone)]
pub struct Instance {
    class: Rc<Class>,
    /// Field values, ordered by name.
    pub fields: BTreeMap<String, Value>,
}

impl Instance {
    pub fn new(class: Rc<Class>, fields: BTreeMap<String, Value>) -> Self {
        Self { class, fields }
    }

    pub fn class(&self) -> &Rc<Class> {
        &self.class
    }
}

impl fmt::Debug for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Instance")
            .field("class", &self.class.name())
            .field("fields", &self.fields)
            .finish()
    }
}

/// The content of an object cell.
#[derive(Debug)]
pub enum Object {
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
    Instance(Instance),
    Builtin(Builtin),
    Opaque(OpaqueKind),
}

impl Object {
    /// Type name: `Array`, `Object`, the class name, or the built-in tag.
    pub fn type_name(&self) -> String {
        match self {
            Self::List(_) => "Array".to_string(),
            Self::Map(_) => "Object".to_string(),
            Self::Instance(instance) => instance.class.name().to_string(),
            Self::Builtin(builtin) => builtin.tag().to_string(),
            Self::Opaque(kind) => kind.type_name().to_string(),
        }
    }
}

impl PartialEq for Object {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::List(a), Self::List(b)) => a == b,
            (Self::Map(a), Self::Map(b)) => a == b,
            (Self::Instance(a), Self::Instance(b)) => {
                a.class.name() == b.class.name() && a.fields == b.fields
            }
            (Self::Builtin(a), Self::Builtin(b)) => a == b,
            (Self::Opaque(a), Self::Opaque(b)) => a == b,
            _ => false,
        }
    }
}

/// Where a member read was resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum MemberSource {
    /// Stored as data on the object itself.
    Own,
    /// Provided by the object's class or kind (methods, natives).
    Intrinsic,
    /// Not present.
    Missing,
}

struct ObjectCell {
    id: ObjectId,
    data: RefCell<Object>,
}

/// Shared handle to an object cell.
#[derive(Clone)]
pub struct ObjectRef(Rc<ObjectCell>);

/// Non-owning handle to an object cell.
#[derive(Clone)]
pub struct WeakObjectRef(Weak<ObjectCell>);

impl WeakObjectRef {
    pub fn upgrade(&self) -> Option<ObjectRef> {
        self.0.upgrade().map(ObjectRef)
    }
}

impl fmt::Debug for WeakObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("WeakObjectRef")
    }
}

impl ObjectRef {
    pub fn new(object: Object) -> Self {
        Self(Rc::new(ObjectCell {
            id: next_identity(),
            data: RefCell::new(object),
        }))
    }

    pub fn id(&self) -> ObjectId {
        self.0.id
    }

    pub fn borrow(&self) -> Ref<'_, Object> {
        self.0.data.borrow()
    }

    pub fn borrow_mut(&self) -> RefMut<'_, Object> {
        self.0.data.borrow_mut()
    }

    pub fn ptr_eq(&self, other: &ObjectRef) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub fn downgrade(&self) -> WeakObjectRef {
        WeakObjectRef(Rc::downgrade(&self.0))
    }

    pub fn type_name(&self) -> String {
        self.borrow().type_name()
    }

    /// True if this object is an instance of the class with the given name.
    pub fn is_instance_of(&self, class_name: &str) -> bool {
        matches!(&*self.borrow(), Object::Instance(i) if i.class.name() == class_name)
    }

    /// Read a member: own data first, then class methods and natives.
    pub fn get(&self, key: &str) -> Value {
        self.get_member(key).0
    }

    pub(crate) fn get_member(&self, key: &str) -> (Value, MemberSource) {
        let own = {
            let object = self.borrow();
            match &*object {
                Object::List(items) if key == "length" => Some(Value::Number(items.len() as f64)),
                Object::List(items) => parse_index(key).and_then(|i| items.get(i).cloned()),
                Object::Map(fields) => fields.get(key).cloned(),
                Object::Instance(instance) => instance.fields.get(key).cloned(),
                Object::Builtin(builtin) => builtin.property(key),
                Object::Opaque(_) => None,
            }
        };
        if let Some(value) = own {
            return (value, MemberSource::Own);
        }

        let intrinsic = {
            let object = self.borrow();
            match &*object {
                Object::Instance(instance) => instance.class.method(key),
                other => builtins::natives::lookup(other, key),
            }
        };
        match intrinsic {
            Some(callable) => (Value::Callable(callable), MemberSource::Intrinsic),
            None => (Value::Null, MemberSource::Missing),
        }
    }

    /// Write a member.
    ///
    /// Lists accept an existing index or the index one past the end.
    /// Built-ins and opaque objects have no writable members.
    pub fn set(&self, key: &str, value: Value) -> Result<(), AmberError> {
        let mut object = self.borrow_mut();
        match &mut *object {
            Object::List(items) => match parse_index(key) {
                Some(index) if index < items.len() => items[index] = value,
                Some(index) if index == items.len() => items.push(value),
                _ => return Err(AmberError::invalid_member("Array", key)),
            },
            Object::Map(fields) => {
                fields.insert(key.to_string(), value);
            }
            Object::Instance(instance) => {
                instance.fields.insert(key.to_string(), value);
            }
            other => return Err(AmberError::invalid_member(other.type_name(), key)),
        }
        Ok(())
    }

    /// Delete a member. Deleting a list index leaves a `Null` hole.
    /// Returns `false` if nothing was removed.
    pub fn delete(&self, key: &str) -> bool {
        let mut object = self.borrow_mut();
        match &mut *object {
            Object::List(items) => match parse_index(key).and_then(|i| items.get_mut(i)) {
                Some(slot) => {
                    *slot = Value::Null;
                    true
                }
                None => false,
            },
            Object::Map(fields) => fields.remove(key).is_some(),
            Object::Instance(instance) => instance.fields.remove(key).is_some(),
            Object::Builtin(_) | Object::Opaque(_) => false,
        }
    }

    /// Own member names: list indices or field names.
    pub fn keys(&self) -> Vec<String> {
        match &*self.borrow() {
            Object::List(items) => (0..items.len()).map(|i| i.to_string()).collect(),
            Object::Map(fields) => fields.keys().cloned().collect(),
            Object::Instance(instance) => instance.fields.keys().cloned().collect(),
            Object::Builtin(_) | Object::Opaque(_) => Vec::new(),
        }
    }

    /// Values directly reachable from this object.
    pub fn children(&self) -> Vec<Value> {
        match &*self.borrow() {
            Object::List(items) => items.clone(),
            Object::Map(fields) => fields.values().cloned().collect(),
            Object::Instance(instance) => instance.fields.values().cloned().collect(),
            Object::Builtin(builtin) => builtin.children(),
            Object::Opaque(_) => Vec::new(),
        }
    }

    /// Copy this object and everything below it into fresh cells.
    pub fn deep_clone(&self) -> ObjectRef {
        let copy = match &*self.borrow() {
            Object::List(items) => Object::List(items.iter().map(Value::deep_clone).collect()),
            Object::Map(fields) => Object::Map(deep_clone_fields(fields)),
            Object::Instance(instance) => Object::Instance(Instance::new(
                Rc::clone(&instance.class),
                deep_clone_fields(&instance.fields),
            )),
            Object::Builtin(builtin) => Object::Builtin(builtin.deep_clone()),
            Object::Opaque(kind) => Object::Opaque(kind.clone()),
        };
        ObjectRef::new(copy)
    }
}

impl fmt::Debug for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.data.try_borrow() {
            Ok(object) => f
                .debug_tuple("ObjectRef")
                .field(&self.id())
                .field(&*object)
                .finish(),
            Err(_) => write!(f, "ObjectRef({}, <borrowed>)", self.id()),
        }
    }
}

pub(crate) fn deep_clone_fields(fields: &BTreeMap<String, Value>) -> BTreeMap<String, Value> {
    fields
        .iter()
        .map(|(key, value)| (key.clone(), value.deep_clone()))
        .collect()
}

fn parse_index(key: &str) -> Option<usize> {
    if key.len() > 1 && key.starts_with('0') {
        return None;
    }
    key.parse().ok()
}

/// Visit every object reachable from `root` once, parents before children.
pub fn for_each_object(root: &Value, visit: &mut dyn FnMut(&ObjectRef)) {
    let mut seen = BTreeSet::new();
    let mut stack: Vec<Value> = vec![root.clone()];
    while let Some(value) = stack.pop() {
        let Value::Object(object) = value else {
            continue;
        };
        if !seen.insert(object.id()) {
            continue;
        }
        visit(&object);
        let mut children = object.children();
        children.reverse();
        stack.extend(children);
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn list_members_and_length() {
        let list = Value::list(vec![Value::from(1), Value::from("two")]);
        assert_eq!(list.get("0"), Value::Number(1.0));
        assert_eq!(list.get("1"), Value::from("two"));
        assert_eq!(list.get("length"), Value::Number(2.0));
        assert_eq!(list.get("2"), Value::Null);
    }

    #[test]
    fn list_set_rejects_gaps() {
        let list = Value::list(vec![]);
        let object = list.as_object().expect("object");
        object.set("0", Value::from(true)).expect("append");
        assert!(object.set("5", Value::from(true)).is_err());
        assert!(object.set("name", Value::from(true)).is_err());
        assert_eq!(object.keys(), vec!["0".to_string()]);
    }

    #[test]
    fn delete_on_list_leaves_hole() {
        let list = Value::list(vec![Value::from(1), Value::from(2)]);
        let object = list.as_object().expect("object");
        assert!(object.delete("0"));
        assert_eq!(list.get("0"), Value::Null);
        assert_eq!(list.get("length"), Value::Number(2.0));
    }

    #[test]
    fn deep_equality_versus_identity() {
        let a = Value::map([("x", Value::from(1))]);
        let b = Value::map([("x", Value::from(1))]);
        assert_eq!(a, b);
        assert!(!a.same_value(&b));
        assert!(a.same_value(&a.clone()));
    }

    #[test]
    fn deep_clone_allocates_new_cells() {
        let inner = Value::list(vec![Value::from(1)]);
        let outer = Value::map([("inner", inner.clone())]);
        let copy = outer.deep_clone();

        assert_eq!(copy, outer);
        assert!(!copy.get("inner").same_value(&inner));
    }

    #[test]
    fn nan_is_same_value_as_nan() {
        assert!(Value::Number(f64::NAN).same_value(&Value::Number(f64::NAN)));
    }

    #[test]
    fn for_each_object_visits_shared_nodes_once() {
        let shared = Value::empty_map();
        let root = Value::list(vec![shared.clone(), shared.clone()]);
        let mut count = 0;
        for_each_object(&root, &mut |_| count += 1);
        assert_eq!(count, 2);
    }

    #[test]
    fn index_keys_must_be_canonical() {
        assert_eq!(parse_index("0"), Some(0));
        assert_eq!(parse_index("12"), Some(12));
        assert_eq!(parse_index("01"), None);
        assert_eq!(parse_index("-1"), None);
    }
}
