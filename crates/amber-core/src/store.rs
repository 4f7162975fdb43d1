//! # Store
//!
//! One persistent, observed root object.
//!
//! A `Store` composes a registry-bound [`Serializer`], a [`JsonStorage`]
//! namespace that uses it, and a root domain instance that is only ever
//! exposed through an [`Observed`] handle. On open, the root is revived
//! from storage, or built fresh from the root class when nothing usable
//! is stored.
//!
//! Every mutation made through the handle becomes a log line for the
//! registered listeners:
//!
//! ```text
//! player.hp = 5
//! delete player.buff
//! player.heal(10)
//! player.heal.call(enemy, 10)
//! inventory.push([Item])
//! ```
//!
//! A full snapshot is written after every settled structural change.
//! Calls alone never write.

use crate::class::Class;
use crate::config::StoreConfig;
use crate::observer::{
    MutationEvent, MutationKind, MutationObserver, MutationSink, Observed, PathSegment, This,
};
use crate::registry::TypeRegistry;
use crate::scheduler::SchedulerRef;
use crate::serializer::{Codec, Serializer};
use crate::storage::{BackingStore, JsonStorage};
use crate::types::{AmberError, CallbackError};
use crate::value::{ObjectRef, Value, WeakObjectRef, for_each_object};
use std::cell::RefCell;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;
use tracing::{info, trace, warn};

/// Identifies a registered mutation listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ListenerId(u64);

type Listener = Rc<dyn Fn(&str)>;

#[derive(Default)]
struct Listeners {
    next_id: u64,
    entries: Vec<(ListenerId, Listener)>,
}

// =============================================================================
// STORE
// =============================================================================

/// A persisted, observed root instance.
pub struct Store<B: BackingStore + 'static> {
    storage: Rc<RefCell<JsonStorage<B>>>,
    serializer: Rc<Serializer>,
    observer: MutationObserver,
    root_class: Rc<Class>,
    root: ObjectRef,
    handle: Observed,
    listeners: Rc<RefCell<Listeners>>,
    config: StoreConfig,
}

impl<B: BackingStore + 'static> Store<B> {
    /// Open the store, registering `root_class` and its dependencies.
    ///
    /// Stored state that is not an instance of the root class is logged and
    /// replaced by a fresh instance.
    pub fn open(
        backend: B,
        mut registry: TypeRegistry,
        root_class: &Rc<Class>,
        config: StoreConfig,
    ) -> Result<Self, AmberError> {
        registry.register_domain_type(root_class)?;
        let serializer = Rc::new(Serializer::new(Rc::new(registry)));
        let storage = JsonStorage::with_codec(
            backend,
            config.namespace.clone(),
            Rc::clone(&serializer) as Rc<dyn Codec>,
        );

        let root = match storage.get(&config.state_key)? {
            Some(Value::Object(object)) if object.is_instance_of(root_class.name()) => {
                info!(namespace = %config.namespace, class = root_class.name(), "state restored");
                object
            }
            None | Some(Value::Null) => {
                info!(namespace = %config.namespace, class = root_class.name(), "fresh state");
                root_class.instantiate()
            }
            Some(other) => {
                warn!(
                    namespace = %config.namespace,
                    expected = root_class.name(),
                    found = %other.type_name(),
                    "stored state has the wrong type; starting fresh"
                );
                root_class.instantiate()
            }
        };

        let storage = Rc::new(RefCell::new(storage));
        let listeners = Rc::new(RefCell::new(Listeners::default()));
        let sink = StoreSink {
            storage: Rc::clone(&storage),
            root: root.downgrade(),
            state_key: config.state_key.clone(),
            listeners: Rc::clone(&listeners),
            log_mutations: config.log_mutations,
        };
        let observer = MutationObserver::new(Rc::new(sink));
        let handle = observer.observe(&root);

        Ok(Self {
            storage,
            serializer,
            observer,
            root_class: Rc::clone(root_class),
            root,
            handle,
            listeners,
            config,
        })
    }

    /// The observed root. Every call returns the same canonical handle.
    pub fn state(&self) -> Observed {
        self.handle.clone()
    }

    pub fn root_class(&self) -> &Rc<Class> {
        &self.root_class
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn serializer(&self) -> &Rc<Serializer> {
        &self.serializer
    }

    pub fn observer(&self) -> &MutationObserver {
        &self.observer
    }

    /// Receive one log line per reported mutation.
    ///
    /// Listeners run in registration order. A panicking listener is logged
    /// and skipped; the mutation is applied regardless.
    pub fn on_mutation(&self, listener: impl Fn(&str) + 'static) -> ListenerId {
        let mut listeners = self.listeners.borrow_mut();
        let id = ListenerId(listeners.next_id);
        listeners.next_id += 1;
        listeners.entries.push((id, Rc::new(listener)));
        id
    }

    /// Returns `false` if the listener was not registered.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.borrow_mut();
        let before = listeners.entries.len();
        listeners.entries.retain(|(entry, _)| *entry != id);
        listeners.entries.len() != before
    }

    /// Replace the root's fields with a fresh instance's, in place.
    ///
    /// The handle returned by [`Store::state`] stays valid. Schedulers in
    /// the old state are disarmed first so none of their timers fire into
    /// the new state.
    pub fn reset(&self) -> Result<(), AmberError> {
        disarm_schedulers(&self.root);

        let fresh = self.root_class.fresh_fields();
        let stale: Vec<String> = self
            .root
            .keys()
            .into_iter()
            .filter(|key| !fresh.contains_key(key))
            .collect();

        self.observer.batch(|| -> Result<(), AmberError> {
            for key in &stale {
                self.handle.delete(key)?;
            }
            for (key, value) in fresh {
                self.handle.set(&key, value)?;
            }
            Ok(())
        })?;
        info!(namespace = %self.config.namespace, class = self.root_class.name(), "state reset");
        Ok(())
    }

    /// Write a snapshot now.
    pub fn flush(&self) -> Result<(), AmberError> {
        self.storage
            .borrow_mut()
            .set(&self.config.state_key, &Value::Object(self.root.clone()))
    }

    /// The current state as serialized text.
    pub fn snapshot(&self) -> Result<String, AmberError> {
        self.serializer.serialize(&Value::Object(self.root.clone()))
    }

    /// Attach `owner` as the target of the scheduler stored in `owner.field`
    /// and arm its pending entries. Scheduled calls are reported through
    /// the owner's handle.
    pub fn attach_scheduler(&self, owner: &Observed, field: &str) -> Result<(), AmberError> {
        let scheduler = owner
            .get(field)
            .observed()
            .and_then(Observed::object)
            .and_then(|object| SchedulerRef::from_object(&object))
            .ok_or_else(|| {
                AmberError::InvalidTarget(format!(
                    "`{}` is not a scheduler",
                    owner.get(field).raw().type_name()
                ))
            })?;
        scheduler.set_target(This::Observed(owner.clone()))
    }
}

impl<B: BackingStore + 'static> Drop for Store<B> {
    fn drop(&mut self) {
        // Schedulers hold their target; drop that link so the graph can go.
        disarm_schedulers(&self.root);
    }
}

impl<B: BackingStore + 'static> fmt::Debug for Store<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("namespace", &self.config.namespace)
            .field("class", &self.root_class.name())
            .field("listeners", &self.listeners.borrow().entries.len())
            .finish_non_exhaustive()
    }
}

fn disarm_schedulers(root: &ObjectRef) {
    for_each_object(&Value::Object(root.clone()), &mut |object| {
        if let Some(scheduler) = SchedulerRef::from_object(object) {
            scheduler.disarm();
        }
    });
}

// =============================================================================
// SINK
// =============================================================================

struct StoreSink<B> {
    storage: Rc<RefCell<JsonStorage<B>>>,
    root: WeakObjectRef,
    state_key: String,
    listeners: Rc<RefCell<Listeners>>,
    log_mutations: bool,
}

impl<B: BackingStore> MutationSink for StoreSink<B> {
    fn record(&self, event: &MutationEvent) -> Result<(), CallbackError> {
        if !self.log_mutations || event.touches_internal() {
            return Ok(());
        }
        let line = describe_mutation(event);
        trace!(target: "amber::mutation", %line, "mutation");

        let listeners: Vec<Listener> = self
            .listeners
            .borrow()
            .entries
            .iter()
            .map(|(_, listener)| Rc::clone(listener))
            .collect();
        for listener in listeners {
            if panic::catch_unwind(AssertUnwindSafe(|| listener(&line))).is_err() {
                warn!(line = %line, "mutation listener panicked");
            }
        }
        Ok(())
    }

    fn settled(&self) {
        let Some(root) = self.root.upgrade() else {
            return;
        };
        let written = self
            .storage
            .borrow_mut()
            .set(&self.state_key, &Value::Object(root));
        if let Err(err) = written {
            warn!(error = %err, "snapshot write failed");
        }
    }
}

// =============================================================================
// LOG LINES
// =============================================================================

/// Render a mutation as one human-readable line.
pub fn describe_mutation(event: &MutationEvent) -> String {
    match event.kind {
        MutationKind::Assign => format!(
            "{} = {}",
            join(&event.path),
            render(event.value.as_ref().unwrap_or(&Value::Null))
        ),
        MutationKind::Delete => format!("delete {}", join(&event.path)),
        MutationKind::Invoke => {
            let args: Vec<String> = event.args.iter().map(render).collect();
            let args = args.join(", ");
            match event.path.split_last() {
                Some((PathSegment::CallWith(receiver), callee)) if args.is_empty() => {
                    format!("{}.call({receiver})", join(callee))
                }
                Some((PathSegment::CallWith(receiver), callee)) => {
                    format!("{}.call({receiver}, {args})", join(callee))
                }
                Some((PathSegment::Call, callee)) => format!("{}({args})", join(callee)),
                _ => format!("{}({args})", join(&event.path)),
            }
        }
    }
}

fn join(path: &[PathSegment]) -> String {
    path.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(".")
}

fn render(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => serde_json::to_string(s).unwrap_or_else(|_| format!("{s:?}")),
        Value::Object(object) => format!("[{}]", object.type_name()),
        Value::Callable(_) => "[Function]".to_string(),
    }
}

// =============================================================================
// TESTS
// =============================================================================
