//! # Wire Primitives
//!
//! Fixed names and limits shared by the serializer, observer and store.
//! These are compiled in and immutable at runtime.

/// Field carrying the type tag of a serialized envelope.
///
/// Domain objects must not use this name for their own fields.
pub const TYPE_TAG_FIELD: &str = "$type";

/// Field carrying the payload of a serialized envelope.
///
/// Domain objects must not use this name for their own fields.
pub const PAYLOAD_FIELD: &str = "$payload";

/// Member names starting with this prefix belong to the observation layer,
/// not to domain data. Mutations under them are left out of the log.
pub const INTERNAL_PREFIX: &str = "__";

/// Key handed to revivers and replacers for the root value.
pub const ROOT_KEY: &str = "";

/// Default namespace used by [`crate::StoreConfig`].
pub const DEFAULT_NAMESPACE: &str = "amber";

/// Default key of the root state inside a namespace.
pub const DEFAULT_STATE_KEY: &str = "state";

/// Maximum nesting depth accepted when reading serialized text.
///
/// Bounds recursion on hostile or corrupted input.
pub const MAX_NESTING_DEPTH: usize = 256;
