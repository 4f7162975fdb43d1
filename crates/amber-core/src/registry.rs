//! # Type Registry
//!
//! The table of [`TypeDescriptor`]s the serializer consults.
//!
//! Lookup order is fixed: user registrations first, in registration order,
//! then the built-ins in theirs. A value is written with the first
//! descriptor whose predicate accepts it.
//!
//! Domain classes are registered through [`TypeRegistry::register_domain_type`],
//! which follows each class's declared dependencies so one call on the root
//! class covers the whole tree. Dependency cycles are rejected here rather
//! than discovered during serialization.

use crate::builtins::descriptors;
use crate::class::Class;
use crate::timers::TimerQueue;
use crate::types::AmberError;
use crate::value::{Object, ObjectRef, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;
use tracing::debug;

/// Tells whether a value belongs to a type.
pub type Predicate = dyn Fn(&Value) -> bool;
/// Rebuilds a value from its payload. Receives the member key.
pub type Reviver = dyn Fn(&str, Value) -> Result<Value, AmberError>;
/// Produces the payload for a value. Receives the member key.
pub type Replacer = dyn Fn(&str, &Value) -> Result<Value, AmberError>;

// =============================================================================
// TYPE DESCRIPTOR
// =============================================================================

/// How one type is recognised, written and read back.
pub struct TypeDescriptor {
    name: String,
    predicate: Box<Predicate>,
    reviver: Box<Reviver>,
    replacer: Box<Replacer>,
    origin: Option<Rc<Class>>,
}

impl TypeDescriptor {
    pub fn new(
        name: impl Into<String>,
        predicate: impl Fn(&Value) -> bool + 'static,
        reviver: impl Fn(&str, Value) -> Result<Value, AmberError> + 'static,
        replacer: impl Fn(&str, &Value) -> Result<Value, AmberError> + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            predicate: Box::new(predicate),
            reviver: Box::new(reviver),
            replacer: Box::new(replacer),
            origin: None,
        }
    }

    /// Descriptor for instances of a domain class.
    ///
    /// The payload is the instance's field map. Reviving overlays the
    /// payload on a fresh instance, so fields added to the class since the
    /// data was written get their template value.
    pub fn for_class(class: &Rc<Class>) -> Self {
        let name = class.name().to_string();
        let matches_name = name.clone();
        let revive_class = Rc::clone(class);
        let mut descriptor = Self::new(
            name,
            move |value| {
                value
                    .as_object()
                    .is_some_and(|object| object.is_instance_of(&matches_name))
            },
            move |_key, payload| {
                let Some(object) = payload.as_object() else {
                    return Err(AmberError::revive(
                        revive_class.name(),
                        format!("expected fields, got {}", payload.type_name()),
                    ));
                };
                let fields = match &*object.borrow() {
                    Object::Map(fields) => fields.clone(),
                    other => {
                        return Err(AmberError::revive(
                            revive_class.name(),
                            format!("expected fields, got {}", other.type_name()),
                        ));
                    }
                };
                Ok(Value::Object(revive_class.instantiate_with(fields)))
            },
            |_key, value| {
                let fields = value
                    .as_object()
                    .and_then(|object| match &*object.borrow() {
                        Object::Instance(instance) => Some(instance.fields.clone()),
                        _ => None,
                    })
                    .unwrap_or_default();
                Ok(Value::map(fields))
            },
        );
        descriptor.origin = Some(Rc::clone(class));
        descriptor
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn matches(&self, value: &Value) -> bool {
        (self.predicate)(value)
    }

    pub fn revive(&self, key: &str, payload: Value) -> Result<Value, AmberError> {
        (self.reviver)(key, payload)
    }

    pub fn replace(&self, key: &str, value: &Value) -> Result<Value, AmberError> {
        (self.replacer)(key, value)
    }

    fn describes(&self, class: &Rc<Class>) -> bool {
        self.origin
            .as_ref()
            .is_some_and(|origin| Rc::ptr_eq(origin, class))
    }
}

impl fmt::Debug for TypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeDescriptor")
            .field("name", &self.name)
            .field("domain", &self.origin.is_some())
            .finish()
    }
}

// =============================================================================
// TYPE REGISTRY
// =============================================================================

/// Ordered set of descriptors with unique names.
pub struct TypeRegistry {
    custom: Vec<TypeDescriptor>,
    builtins: Vec<TypeDescriptor>,
    timers: Rc<TimerQueue>,
}

impl TypeRegistry {
    /// A registry holding the built-in descriptors. Revived schedulers are
    /// bound to `timers`.
    pub fn new(timers: Rc<TimerQueue>) -> Self {
        Self::with_singletons(timers, BTreeMap::new())
    }

    /// A registry that also resolves the given process-wide singletons by
    /// name. A singleton is written as its name and read back as the very
    /// same object.
    pub fn with_singletons(timers: Rc<TimerQueue>, singletons: BTreeMap<String, ObjectRef>) -> Self {
        let builtins = descriptors::builtin_descriptors(&timers, singletons);
        Self {
            custom: Vec::new(),
            builtins,
            timers,
        }
    }

    pub fn timers(&self) -> &Rc<TimerQueue> {
        &self.timers
    }

    /// Add a descriptor after all existing user registrations.
    pub fn register(&mut self, descriptor: TypeDescriptor) -> Result<(), AmberError> {
        if self.get(descriptor.name()).is_some() {
            return Err(AmberError::DuplicateType(descriptor.name().to_string()));
        }
        debug!(name = descriptor.name(), "type registered");
        self.custom.push(descriptor);
        Ok(())
    }

    /// Register a domain class and every class it depends on.
    ///
    /// Dependencies are registered before their dependents. Re-registering
    /// the same class is a no-op; a different type under the same name is
    /// a [`AmberError::DuplicateType`].
    pub fn register_domain_type(&mut self, class: &Rc<Class>) -> Result<(), AmberError> {
        let mut visiting = Vec::new();
        self.register_class(class, &mut visiting)
    }

    fn register_class(
        &mut self,
        class: &Rc<Class>,
        visiting: &mut Vec<Rc<Class>>,
    ) -> Result<(), AmberError> {
        if let Some(start) = visiting.iter().position(|c| Rc::ptr_eq(c, class)) {
            let mut chain: Vec<&str> = visiting[start..].iter().map(|c| c.name()).collect();
            chain.push(class.name());
            return Err(AmberError::DependencyCycle(chain.join(" -> ")));
        }
        if let Some(existing) = self.get(class.name()) {
            return if existing.describes(class) {
                Ok(())
            } else {
                Err(AmberError::DuplicateType(class.name().to_string()))
            };
        }

        visiting.push(Rc::clone(class));
        for dependency in class.dependencies() {
            self.register_class(&dependency, visiting)?;
        }
        visiting.pop();

        self.register(TypeDescriptor::for_class(class))
    }

    /// Descriptor by name.
    pub fn get(&self, name: &str) -> Option<&TypeDescriptor> {
        self.iter().find(|descriptor| descriptor.name() == name)
    }

    /// First descriptor whose predicate accepts `value`.
    pub fn find(&self, value: &Value) -> Option<&TypeDescriptor> {
        self.iter().find(|descriptor| descriptor.matches(value))
    }

    /// All descriptors in lookup order.
    pub fn iter(&self) -> impl Iterator<Item = &TypeDescriptor> {
        self.custom.iter().chain(self.builtins.iter())
    }

    pub fn names(&self) -> Vec<&str> {
        self.iter().map(TypeDescriptor::name).collect()
    }

    pub fn len(&self) -> usize {
        self.custom.len() + self.builtins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for TypeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeRegistry")
            .field("types", &self.names())
            .finish()
    }
}

// =============================================================================
// TESTS
// =============================================================================
