//! # amber-core
//!
//! Persistence substrate for in-memory object graphs.
//!
//! This crate lets an application keep its whole state as one object graph
//! rooted at a domain instance, and:
//! - write it to JSON text and read it back with type identity preserved
//! - observe every change made to it, down to the exact member path
//! - schedule delayed method calls that survive a save and reload
//!
//! ## Layout
//!
//! - `value`, `class`: the closed value model and domain classes
//! - `registry`, `serializer`, `builtins`: type-tagged JSON encoding
//! - `observer`: path-tagged handles and mutation events
//! - `timers`, `scheduler`: host-driven timers and persistent deferred calls
//! - `storage`, `store`: namespaced JSON storage and the observed root
//!
//! ## Constraints
//!
//! - Single-threaded: `Rc`/`RefCell` throughout, nothing is `Send`
//! - Synchronous: timers fire only when the host runs the queue
//! - Cycles are never written; the serializer reports them

// =============================================================================
// MODULES
// =============================================================================

pub mod builtins;
pub mod class;
pub mod config;
pub mod observer;
pub mod primitives;
pub mod registry;
pub mod scheduler;
pub mod serializer;
pub mod storage;
pub mod store;
pub mod timers;
pub mod types;
pub mod value;

// =============================================================================
// RE-EXPORTS: Core Types
// =============================================================================

pub use types::{AmberError, CallbackError};
pub use value::{Instance, Object, ObjectId, ObjectRef, OpaqueKind, Value, WeakObjectRef};

// =============================================================================
// RE-EXPORTS: Classes and Serialization
// =============================================================================

pub use builtins::{BigInt, Builtin, ErrorValue, NumberFormat, Pattern, TypedArray};
pub use class::{Callable, Class, ClassBuilder};
pub use registry::{TypeDescriptor, TypeRegistry};
pub use serializer::{Codec, Serializer, StructuralCodec};

// =============================================================================
// RE-EXPORTS: Observation and Scheduling
// =============================================================================

pub use observer::{
    Member, MutationEvent, MutationKind, MutationObserver, MutationSink, Observed, PathSegment,
    This,
};
pub use scheduler::{DeferredScheduler, ScheduleEntry, SchedulerRef};
pub use timers::{Clock, ManualClock, SystemClock, TimerId, TimerQueue};

// =============================================================================
// RE-EXPORTS: Storage
// =============================================================================

pub use config::StoreConfig;
pub use storage::{BackingStore, JsonStorage, MemoryBackend, RedbBackend};
pub use store::{ListenerId, Store, describe_mutation};
