//! # Domain Classes and Callables
//!
//! A [`Class`] describes a persistable domain type: a field template copied
//! into each new instance, a method table, an explicit list of the classes
//! its instances may contain, and an optional legacy self-serialization hook.
//!
//! A [`Callable`] is a function value with a stable identity. Natives receive
//! the raw receiver; methods receive the receiver as the caller supplied it
//! (see [`This`]).

use crate::observer::This;
use crate::types::AmberError;
use crate::value::{Instance, Object, ObjectRef, Value, deep_clone_fields, next_identity};
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

/// Body of a native function: raw receiver, arguments.
pub type NativeFn = dyn Fn(&Value, &[Value]) -> Result<Value, AmberError>;

/// Body of a user method: receiver as requested, arguments.
pub type MethodFn = dyn Fn(&This, &[Value]) -> Result<Value, AmberError>;

/// Legacy self-serialization hook. Its output replaces the payload.
pub type LegacyHook = dyn Fn(&Instance) -> Value;

// =============================================================================
// CALLABLE
// =============================================================================

enum Body {
    Native(Box<NativeFn>),
    Method(Box<MethodFn>),
}

struct CallableInner {
    id: u64,
    name: String,
    body: Body,
    mutates: bool,
}

/// A function value. Cloning shares identity.
#[derive(Clone)]
pub struct Callable(Rc<CallableInner>);

impl Callable {
    /// A function that operates on the raw receiver.
    pub fn native(
        name: impl Into<String>,
        body: impl Fn(&Value, &[Value]) -> Result<Value, AmberError> + 'static,
    ) -> Self {
        Self::with_body(name.into(), Body::Native(Box::new(body)), false)
    }

    /// A native that changes its receiver in place. Calls to it through an
    /// observed handle count as structural changes.
    pub fn native_mut(
        name: impl Into<String>,
        body: impl Fn(&Value, &[Value]) -> Result<Value, AmberError> + 'static,
    ) -> Self {
        Self::with_body(name.into(), Body::Native(Box::new(body)), true)
    }

    /// A function that receives the caller's receiver, observed or not.
    pub fn method(
        name: impl Into<String>,
        body: impl Fn(&This, &[Value]) -> Result<Value, AmberError> + 'static,
    ) -> Self {
        Self::with_body(name.into(), Body::Method(Box::new(body)), false)
    }

    fn with_body(name: String, body: Body, mutates: bool) -> Self {
        Self(Rc::new(CallableInner {
            id: next_identity(),
            name,
            body,
            mutates,
        }))
    }

    pub fn id(&self) -> u64 {
        self.0.id
    }

    pub fn name(&self) -> &str {
        &self.0.name
    }

    pub fn is_native(&self) -> bool {
        matches!(self.0.body, Body::Native(_))
    }

    pub fn mutates_receiver(&self) -> bool {
        self.0.mutates
    }

    pub fn ptr_eq(&self, other: &Callable) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    /// Invoke with the given receiver.
    ///
    /// Natives always see the raw receiver object, even when handed an
    /// observed one.
    pub fn invoke(&self, receiver: &This, args: &[Value]) -> Result<Value, AmberError> {
        match &self.0.body {
            Body::Native(body) => body(&receiver.raw_value(), args),
            Body::Method(body) => body(receiver, args),
        }
    }
}

impl fmt::Debug for Callable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Callable({}#{})", self.0.name, self.0.id)
    }
}

// =============================================================================
// CLASS
// =============================================================================

/// A persistable domain type.
pub struct Class {
    name: String,
    template: BTreeMap<String, Value>,
    methods: BTreeMap<String, Callable>,
    dependencies: RefCell<Vec<Rc<Class>>>,
    legacy_hook: Option<Box<LegacyHook>>,
}

impl Class {
    pub fn builder(name: impl Into<String>) -> ClassBuilder {
        ClassBuilder {
            name: name.into(),
            template: BTreeMap::new(),
            methods: BTreeMap::new(),
            dependencies: Vec::new(),
            legacy_hook: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Look up a method by name.
    pub fn method(&self, name: &str) -> Option<Callable> {
        self.methods.get(name).cloned()
    }

    pub fn method_names(&self) -> Vec<&str> {
        self.methods.keys().map(String::as_str).collect()
    }

    /// Classes whose instances may appear inside instances of this one.
    pub fn dependencies(&self) -> Vec<Rc<Class>> {
        self.dependencies.borrow().clone()
    }

    /// Declare a dependency after construction. Needed for mutually
    /// referencing classes; registration rejects the resulting cycle.
    pub fn add_dependency(&self, dependency: &Rc<Class>) {
        self.dependencies.borrow_mut().push(Rc::clone(dependency));
    }

    pub fn has_legacy_hook(&self) -> bool {
        self.legacy_hook.is_some()
    }

    /// Run the legacy self-serialization hook, if the class has one.
    pub fn legacy_json(&self, instance: &Instance) -> Option<Value> {
        self.legacy_hook.as_ref().map(|hook| hook(instance))
    }

    /// A deep copy of the field template.
    pub fn fresh_fields(&self) -> BTreeMap<String, Value> {
        deep_clone_fields(&self.template)
    }

    /// Construct a new instance with template fields.
    pub fn instantiate(self: &Rc<Self>) -> ObjectRef {
        ObjectRef::new(Object::Instance(Instance::new(
            Rc::clone(self),
            self.fresh_fields(),
        )))
    }

    /// Construct a new instance, overlaying `fields` on the template.
    pub fn instantiate_with(self: &Rc<Self>, fields: BTreeMap<String, Value>) -> ObjectRef {
        let mut merged = self.fresh_fields();
        merged.extend(fields);
        ObjectRef::new(Object::Instance(Instance::new(Rc::clone(self), merged)))
    }
}

impl fmt::Debug for Class {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let dependencies: Vec<String> = self
            .dependencies
            .borrow()
            .iter()
            .map(|dep| dep.name.clone())
            .collect();
        f.debug_struct("Class")
            .field("name", &self.name)
            .field("fields", &self.template.keys().collect::<Vec<_>>())
            .field("methods", &self.methods.keys().collect::<Vec<_>>())
            .field("dependencies", &dependencies)
            .finish()
    }
}

/// Builder for [`Class`].
pub struct ClassBuilder {
    name: String,
    template: BTreeMap<String, Value>,
    methods: BTreeMap<String, Callable>,
    dependencies: Vec<Rc<Class>>,
    legacy_hook: Option<Box<LegacyHook>>,
}

impl ClassBuilder {
    /// Add a field with its initial value. Object values are deep-copied
    /// into every new instance.
    #[must_use]
    pub fn field(mut self, name: impl Into<String>, initial: impl Into<Value>) -> Self {
        self.template.insert(name.into(), initial.into());
        self
    }

    #[must_use]
    pub fn method(
        mut self,
        name: impl Into<String>,
        body: impl Fn(&This, &[Value]) -> Result<Value, AmberError> + 'static,
    ) -> Self {
        let name = name.into();
        self.methods
            .insert(name.clone(), Callable::method(name, body));
        self
    }

    #[must_use]
    pub fn depends_on(mut self, dependency: &Rc<Class>) -> Self {
        self.dependencies.push(Rc::clone(dependency));
        self
    }

    /// Install a legacy self-serialization hook.
    #[must_use]
    pub fn legacy_json(mut self, hook: impl Fn(&Instance) -> Value + 'static) -> Self {
        self.legacy_hook = Some(Box::new(hook));
        self
    }

    pub fn build(self) -> Rc<Class> {
        Rc::new(Class {
            name: self.name,
            template: self.template,
            methods: self.methods,
            dependencies: RefCell::new(self.dependencies),
            legacy_hook: self.legacy_hook,
        })
    }
}

// =============================================================================
// TESTS
// =============================================================================
