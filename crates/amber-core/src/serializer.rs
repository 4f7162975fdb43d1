//! # Serializer
//!
//! Turns an object graph into JSON text and back, preserving type identity
//! through the [`TypeRegistry`].
//!
//! A node with a matching descriptor is written as an envelope
//! `{"$type": name, "$payload": replace(key, node)}`; the payload is walked
//! like any other value. Everything else is written structurally. Reading
//! works bottom-up: children are revived before the envelope that contains
//! them.
//!
//! Lossy cases are deliberate and silent: callables and opaque objects are
//! written as `null`, and envelopes with an unregistered tag read back as
//! `null`. A cycle in the graph is an error.

use crate::primitives::{MAX_NESTING_DEPTH, PAYLOAD_FIELD, ROOT_KEY, TYPE_TAG_FIELD};
use crate::registry::TypeRegistry;
use crate::types::AmberError;
use crate::value::{Object, ObjectId, ObjectRef, Value};
use serde_json::{Map, Number, Value as Json};
use std::collections::BTreeMap;
use std::rc::Rc;
use tracing::debug;

/// Conversion between values and JSON trees.
pub trait Codec {
    fn encode(&self, value: &Value) -> Result<Json, AmberError>;
    fn decode(&self, json: Json) -> Result<Value, AmberError>;
}

/// Plain structural codec: no type tags are written or interpreted.
#[derive(Debug, Default, Clone, Copy)]
pub struct StructuralCodec;

impl Codec for StructuralCodec {
    fn encode(&self, value: &Value) -> Result<Json, AmberError> {
        Encoder::new(None).encode(ROOT_KEY, value)
    }

    fn decode(&self, json: Json) -> Result<Value, AmberError> {
        Decoder { registry: None }.decode(ROOT_KEY, json, 0)
    }
}

/// Registry-aware codec that preserves type identity.
#[derive(Debug, Clone)]
pub struct Serializer {
    registry: Rc<TypeRegistry>,
}

impl Serializer {
    pub fn new(registry: Rc<TypeRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Rc<TypeRegistry> {
        &self.registry
    }

    /// Write a value as compact JSON text.
    pub fn serialize(&self, value: &Value) -> Result<String, AmberError> {
        let json = self.encode(value)?;
        serde_json::to_string(&json).map_err(|e| AmberError::SerializationError(e.to_string()))
    }

    /// Write a value as indented JSON text.
    pub fn serialize_pretty(&self, value: &Value) -> Result<String, AmberError> {
        let json = self.encode(value)?;
        serde_json::to_string_pretty(&json)
            .map_err(|e| AmberError::SerializationError(e.to_string()))
    }

    /// Read a value from JSON text.
    pub fn deserialize(&self, text: &str) -> Result<Value, AmberError> {
        let json: Json = serde_json::from_str(text)
            .map_err(|e| AmberError::DeserializationError(e.to_string()))?;
        self.decode(json)
    }
}

impl Codec for Serializer {
    fn encode(&self, value: &Value) -> Result<Json, AmberError> {
        Encoder::new(Some(&self.registry)).encode(ROOT_KEY, value)
    }

    fn decode(&self, json: Json) -> Result<Value, AmberError> {
        Decoder {
            registry: Some(&self.registry),
        }
        .decode(ROOT_KEY, json, 0)
    }
}

// =============================================================================
// ENCODER
// =============================================================================

/// Shape of an object once its borrow is released.
enum Shape {
    List(Vec<Value>),
    Fields(BTreeMap<String, Value>),
    Value(Value),
}

struct Encoder<'a> {
    registry: Option<&'a TypeRegistry>,
    /// Objects on the current path, for cycle detection.
    stack: Vec<ObjectId>,
}

impl<'a> Encoder<'a> {
    fn new(registry: Option<&'a TypeRegistry>) -> Self {
        Self {
            registry,
            stack: Vec::new(),
        }
    }

    fn encode(&mut self, key: &str, value: &Value) -> Result<Json, AmberError> {
        Ok(match value {
            Value::Null => Json::Null,
            Value::Bool(b) => Json::Bool(*b),
            Value::Number(n) => number(*n),
            Value::String(s) => Json::String(s.clone()),
            Value::Callable(callable) => {
                debug!(key, callable = callable.name(), "callable written as null");
                Json::Null
            }
            Value::Object(object) => {
                if self.stack.contains(&object.id()) {
                    return Err(AmberError::CyclicGraph(key.to_string()));
                }
                if self.stack.len() >= MAX_NESTING_DEPTH {
                    return Err(AmberError::SerializationError(format!(
                        "nesting deeper than {MAX_NESTING_DEPTH} at `{key}`"
                    )));
                }
                self.stack.push(object.id());
                let result = self.encode_object(key, value, object);
                self.stack.pop();
                result?
            }
        })
    }

    fn encode_object(
        &mut self,
        key: &str,
        value: &Value,
        object: &ObjectRef,
    ) -> Result<Json, AmberError> {
        if let Some(registry) = self.registry {
            if let Some(descriptor) = registry.find(value) {
                let payload = match legacy_payload(object) {
                    Some(payload) => payload,
                    None => descriptor.replace(key, value)?,
                };
                let payload = self.encode(key, &payload)?;
                return Ok(envelope(descriptor.name(), payload));
            }
            if let Some((tag, payload)) = tagged_fields(object, registry) {
                let payload = self.encode(key, &payload)?;
                return Ok(envelope(&tag, payload));
            }
        }

        let shape = match &*object.borrow() {
            Object::List(items) => Shape::List(items.clone()),
            Object::Map(fields) => Shape::Fields(fields.clone()),
            Object::Instance(instance) => match instance.class().legacy_json(instance) {
                Some(json) => Shape::Value(json),
                None => Shape::Fields(instance.fields.clone()),
            },
            Object::Builtin(builtin) => Shape::Value(builtin.structural()),
            Object::Opaque(kind) => {
                debug!(key, ?kind, "opaque object written as null");
                Shape::Value(Value::Null)
            }
        };

        match shape {
            Shape::List(items) => {
                let mut out = Vec::with_capacity(items.len());
                for (index, item) in items.iter().enumerate() {
                    out.push(self.encode(&index.to_string(), item)?);
                }
                Ok(Json::Array(out))
            }
            Shape::Fields(fields) => {
                let mut out = Map::new();
                for (name, field) in &fields {
                    out.insert(name.clone(), self.encode(name, field)?);
                }
                Ok(Json::Object(out))
            }
            Shape::Value(value) => self.encode(key, &value),
        }
    }
}

/// Output of the class's legacy hook, which replaces the registry payload.
fn legacy_payload(object: &ObjectRef) -> Option<Value> {
    match &*object.borrow() {
        Object::Instance(instance) => instance.class().legacy_json(instance),
        _ => None,
    }
}

/// Plain fields already shaped as an envelope with a registered tag, as
/// read back by a codec that does not interpret tags.
fn tagged_fields(object: &ObjectRef, registry: &TypeRegistry) -> Option<(String, Value)> {
    let data = object.borrow();
    let Object::Map(fields) = &*data else {
        return None;
    };
    if fields.len() != 2 || !fields.contains_key(PAYLOAD_FIELD) {
        return None;
    }
    let tag = fields.get(TYPE_TAG_FIELD)?.as_str()?;
    registry.get(tag)?;
    Some((tag.to_string(), fields.get(PAYLOAD_FIELD).cloned().unwrap_or_default()))
}

fn envelope(tag: &str, payload: Json) -> Json {
    let mut out = Map::new();
    out.insert(TYPE_TAG_FIELD.to_string(), Json::String(tag.to_string()));
    out.insert(PAYLOAD_FIELD.to_string(), payload);
    Json::Object(out)
}

/// Integral values inside the exactly representable range are written
/// without a fraction. Negative zero keeps its sign as `-0.0`. Non-finite
/// numbers have no JSON form and become null.
fn number(n: f64) -> Json {
    const MAX_SAFE: f64 = 9_007_199_254_740_991.0;
    let negative_zero = n == 0.0 && n.is_sign_negative();
    if n.is_finite() && n.fract() == 0.0 && n.abs() <= MAX_SAFE && !negative_zero {
        return Json::from(n as i64);
    }
    Number::from_f64(n).map_or(Json::Null, Json::Number)
}

// =============================================================================
// DECODER
// =============================================================================

struct Decoder<'a> {
    registry: Option<&'a TypeRegistry>,
}

impl Decoder<'_> {
    fn decode(&self, key: &str, json: Json, depth: usize) -> Result<Value, AmberError> {
        if depth > MAX_NESTING_DEPTH {
            return Err(AmberError::DeserializationError(format!(
                "nesting deeper than {MAX_NESTING_DEPTH} at `{key}`"
            )));
        }
        Ok(match json {
            Json::Null => Value::Null,
            Json::Bool(b) => Value::Bool(b),
            Json::Number(n) => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
            Json::String(s) => Value::String(s),
            Json::Array(items) => {
                let mut out = Vec::with_capacity(items.len());
                for (index, item) in items.into_iter().enumerate() {
                    out.push(self.decode(&index.to_string(), item, depth + 1)?);
                }
                Value::list(out)
            }
            Json::Object(mut fields) => {
                if let Some(registry) = self.registry {
                    if let Some(tag) = envelope_tag(&fields) {
                        let payload = fields.remove(PAYLOAD_FIELD).unwrap_or(Json::Null);
                        let payload = self.decode(key, payload, depth + 1)?;
                        return match registry.get(&tag) {
                            Some(descriptor) => descriptor.revive(key, payload),
                            None => {
                                debug!(key, tag = %tag, "unregistered type tag read as null");
                                Ok(Value::Null)
                            }
                        };
                    }
                }
                let mut out = BTreeMap::new();
                for (name, field) in fields {
                    let value = self.decode(&name, field, depth + 1)?;
                    out.insert(name, value);
                }
                Value::map(out)
            }
        })
    }
}

fn envelope_tag(fields: &Map<String, Json>) -> Option<String> {
    if fields.len() != 2 || !fields.contains_key(PAYLOAD_FIELD) {
        return None;
    }
    fields
        .get(TYPE_TAG_FIELD)
        .and_then(Json::as_str)
        .map(str::to_string)
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtins::Builtin;
    use crate::class::{Callable, Class};
    use crate::timers::{ManualClock, TimerQueue};
    use crate::value::OpaqueKind;

    fn serializer_with(classes: &[&Rc<Class>]) -> Serializer {
        let mut registry = TypeRegistry::new(TimerQueue::new(ManualClock::new(0)));
        for class in classes {
            registry.register_domain_type(class).expect("register");
        }
        Serializer::new(Rc::new(registry))
    }

    #[test]
    fn negative_zero_keeps_its_sign() {
        let serializer = serializer_with(&[]);
        let text = serializer
            .serialize(&Value::list(vec![Value::from(-0.0), Value::from(0.0)]))
            .expect("serialize");
        assert_eq!(text, "[-0.0,0]");

        let back = serializer.deserialize(&text).expect("deserialize");
        let back = back.as_object().expect("list").get("0");
        let n = back.as_f64().expect("number");
        assert!(n == 0.0 && n.is_sign_negative());
    }

    #[test]
    fn primitives_are_plain_json() {
        let serializer = serializer_with(&[]);
        let value = Value::map([
            ("n", Value::from(3)),
            ("f", Value::from(0.5)),
            ("s", Value::from("x")),
            ("b", Value::from(true)),
            ("z", Value::Null),
        ]);
        assert_eq!(
            serializer.serialize(&value).expect("serialize"),
            r#"{"b":true,"f":0.5,"n":3,"s":"x","z":null}"#
        );
    }

    #[test]
    fn domain_instances_are_tagged() {
        let point = Class::builder("Point").field("x", 1).build();
        let serializer = serializer_with(&[&point]);
        let text = serializer
            .serialize(&Value::Object(point.instantiate()))
            .expect("serialize");
        assert_eq!(text, r#"{"$type":"Point","$payload":{"x":1}}"#);

        let back = serializer.deserialize(&text).expect("deserialize");
        assert!(back.as_object().expect("object").is_instance_of("Point"));
    }

    #[test]
    fn unknown_tags_read_as_null() {
        let serializer = serializer_with(&[]);
        let back = serializer
            .deserialize(r#"{"keep":1,"lost":{"$type":"Gone","$payload":{}}}"#)
            .expect("deserialize");
        assert_eq!(back.get("keep"), Value::from(1));
        assert!(back.get("lost").is_null());
    }

    #[test]
    fn unrepresentable_values_become_null() {
        let serializer = serializer_with(&[]);
        let value = Value::list(vec![
            Value::Callable(Callable::native("f", |_, _| Ok(Value::Null))),
            Value::opaque(OpaqueKind::Promise),
        ]);
        assert_eq!(serializer.serialize(&value).expect("serialize"), "[null,null]");
    }

    #[test]
    fn cycles_are_errors() {
        let serializer = serializer_with(&[]);
        let outer = Value::empty_map();
        let object = outer.as_object().expect("object");
        object.set("self", outer.clone()).expect("set");

        let err = serializer.serialize(&outer).expect_err("cycle");
        assert!(matches!(err, AmberError::CyclicGraph(key) if key == "self"));
        object.delete("self");
    }

    #[test]
    fn shared_subtrees_are_not_cycles() {
        let serializer = serializer_with(&[]);
        let shared = Value::list(vec![Value::from(1)]);
        let value = Value::list(vec![shared.clone(), shared]);
        assert_eq!(serializer.serialize(&value).expect("serialize"), "[[1],[1]]");
    }

    #[test]
    fn legacy_hook_replaces_payload_once() {
        let calls = Rc::new(std::cell::Cell::new(0));
        let counter = calls.clone();
        let legacy = Class::builder("Legacy")
            .field("secret", 1)
            .legacy_json(move |_| {
                counter.set(counter.get() + 1);
                Value::map([("v", Value::from(2))])
            })
            .build();
        let serializer = serializer_with(&[&legacy]);

        let text = serializer
            .serialize(&Value::Object(legacy.instantiate()))
            .expect("serialize");
        assert_eq!(text, r#"{"$type":"Legacy","$payload":{"v":2}}"#);
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn structural_codec_ignores_tags() {
        let codec = StructuralCodec;
        let json = serde_json::json!({"$type": "Date", "$payload": "2024-01-01T00:00:00.000Z"});
        let value = codec.decode(json.clone()).expect("decode");
        assert_eq!(value.get("$type"), Value::from("Date"));
        assert_eq!(codec.encode(&value).expect("encode"), json);
    }

    #[test]
    fn structural_codec_flattens_builtins() {
        let codec = StructuralCodec;
        let set = Value::builtin(Builtin::Set(vec![Value::from(1), Value::from(2)]));
        assert_eq!(codec.encode(&set).expect("encode"), serde_json::json!([1, 2]));
    }

    #[test]
    fn pre_tagged_fields_pass_through() {
        let serializer = serializer_with(&[]);
        let raw = StructuralCodec
            .decode(serde_json::json!({"$type": "BigInt", "$payload": "12"}))
            .expect("decode");
        let text = serializer.serialize(&raw).expect("serialize");
        let back = serializer.deserialize(&text).expect("deserialize");
        assert_eq!(back.type_name(), "BigInt");
    }

    #[test]
    fn malformed_text_is_an_error() {
        let serializer = serializer_with(&[]);
        assert!(matches!(
            serializer.deserialize("{not json"),
            Err(AmberError::DeserializationError(_))
        ));
    }
}
