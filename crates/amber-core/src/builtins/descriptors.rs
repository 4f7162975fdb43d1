//! Descriptors for the built-in kinds.
//!
//! Payload shapes:
//!
//! | Tag | Payload |
//! |-----|---------|
//! | `Singleton` | name string |
//! | `Date` | RFC 3339 string, millisecond precision |
//! | `Map` | list of `[key, value]` pairs |
//! | `Set` | list of members |
//! | `Int8Array` … `Float64Array` | list of numbers |
//! | `RegExp` | `{source, flags}` |
//! | `BigInt` | decimal string |
//! | `NumberFormat` | `{locale, minimumFractionDigits, maximumFractionDigits, useGrouping}` |
//! | `Error` | `{name, message, stack?, fileName?, lineNumber?, columnNumber?}` |
//! | `Scheduler` | list of `{fireAt, method, args}` |

use super::{
    BigInt, Builtin, ErrorValue, NumberFormat, Pattern, TYPED_ARRAY_TAGS, TypedArray,
    format_date, parse_date,
};
use crate::registry::TypeDescriptor;
use crate::scheduler::{DeferredScheduler, ScheduleEntry};
use crate::timers::TimerQueue;
use crate::types::AmberError;
use crate::value::{Object, ObjectRef, Value};
use std::collections::BTreeMap;
use std::rc::Rc;

/// All built-in descriptors, in lookup order.
pub(crate) fn builtin_descriptors(
    timers: &Rc<TimerQueue>,
    singletons: BTreeMap<String, ObjectRef>,
) -> Vec<TypeDescriptor> {
    let mut descriptors = vec![singleton(singletons), date(), map(), set()];
    descriptors.extend(TYPED_ARRAY_TAGS.into_iter().map(typed_array));
    descriptors.extend([
        regexp(),
        bigint(),
        number_format(),
        error(),
        scheduler(timers),
    ]);
    descriptors
}

/// Apply `f` to the built-in held by an object value, if any.
fn with_builtin<R>(value: &Value, f: impl FnOnce(&Builtin) -> Option<R>) -> Option<R> {
    let object = value.as_object()?;
    match &*object.borrow() {
        Object::Builtin(builtin) => f(builtin),
        _ => None,
    }
}

fn is_builtin(value: &Value, tag: &str) -> bool {
    with_builtin(value, |builtin| (builtin.tag() == tag).then_some(())).is_some()
}

fn not_builtin(tag: &str) -> AmberError {
    AmberError::SerializationError(format!("value is not a {tag}"))
}

fn payload_str(tag: &str, payload: &Value) -> Result<String, AmberError> {
    payload
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| AmberError::revive(tag, format!("expected string, got {}", payload.type_name())))
}

fn payload_list(tag: &str, payload: &Value) -> Result<Vec<Value>, AmberError> {
    let object = payload
        .as_object()
        .ok_or_else(|| AmberError::revive(tag, format!("expected list, got {}", payload.type_name())))?;
    match &*object.borrow() {
        Object::List(items) => Ok(items.clone()),
        other => Err(AmberError::revive(
            tag,
            format!("expected list, got {}", other.type_name()),
        )),
    }
}

fn optional_str(payload: &Value, key: &str) -> Option<String> {
    payload.get(key).as_str().map(str::to_string)
}

fn optional_u32(payload: &Value, key: &str) -> Option<u32> {
    payload.get(key).as_f64().map(|n| n as u32)
}

fn optional_value<T: Into<Value>>(value: Option<T>) -> Value {
    value.map(Into::into).unwrap_or_default()
}

// =============================================================================
// SINGLETON
// =============================================================================

fn singleton(table: BTreeMap<String, ObjectRef>) -> TypeDescriptor {
    let table = Rc::new(table);
    let lookup = Rc::clone(&table);
    let names = Rc::clone(&table);
    TypeDescriptor::new(
        "Singleton",
        move |value| {
            value
                .as_object()
                .is_some_and(|object| lookup.values().any(|s| s.ptr_eq(object)))
        },
        move |_key, payload| {
            let name = payload_str("Singleton", &payload)?;
            table
                .get(&name)
                .map(|object| Value::Object(object.clone()))
                .ok_or_else(|| AmberError::revive("Singleton", format!("no singleton named {name:?}")))
        },
        move |_key, value| {
            names
                .iter()
                .find(|(_, object)| value.as_object().is_some_and(|o| o.ptr_eq(object)))
                .map(|(name, _)| Value::from(name.as_str()))
                .ok_or_else(|| not_builtin("Singleton"))
        },
    )
}

// =============================================================================
// DATE / MAP / SET / TYPED ARRAYS
// =============================================================================

fn date() -> TypeDescriptor {
    TypeDescriptor::new(
        "Date",
        |value| is_builtin(value, "Date"),
        |_key, payload| {
            let text = payload_str("Date", &payload)?;
            Ok(Value::builtin(Builtin::Date(parse_date(&text)?)))
        },
        |_key, value| {
            with_builtin(value, |builtin| match builtin {
                Builtin::Date(date) => Some(Value::from(format_date(date))),
                _ => None,
            })
            .ok_or_else(|| not_builtin("Date"))
        },
    )
}

fn map() -> TypeDescriptor {
    TypeDescriptor::new(
        "Map",
        |value| is_builtin(value, "Map"),
        |_key, payload| {
            let mut entries = Vec::new();
            for pair in payload_list("Map", &payload)? {
                let pair = payload_list("Map", &pair)?;
                let mut pair = pair.into_iter();
                let key = pair.next().unwrap_or_default();
                let value = pair.next().unwrap_or_default();
                entries.push((key, value));
            }
            Ok(Value::builtin(Builtin::Map(entries)))
        },
        |_key, value| {
            with_builtin(value, |builtin| match builtin {
                Builtin::Map(entries) => Some(Value::list(
                    entries
                        .iter()
                        .map(|(k, v)| Value::list(vec![k.clone(), v.clone()]))
                        .collect(),
                )),
                _ => None,
            })
            .ok_or_else(|| not_builtin("Map"))
        },
    )
}

fn set() -> TypeDescriptor {
    TypeDescriptor::new(
        "Set",
        |value| is_builtin(value, "Set"),
        |_key, payload| Ok(Value::builtin(Builtin::Set(payload_list("Set", &payload)?))),
        |_key, value| {
            with_builtin(value, |builtin| match builtin {
                Builtin::Set(items) => Some(Value::list(items.clone())),
                _ => None,
            })
            .ok_or_else(|| not_builtin("Set"))
        },
    )
}

fn typed_array(tag: &'static str) -> TypeDescriptor {
    TypeDescriptor::new(
        tag,
        move |value| is_builtin(value, tag),
        move |_key, payload| {
            let numbers: Vec<f64> = payload_list(tag, &payload)?
                .iter()
                .map(|n| n.as_f64().unwrap_or(0.0))
                .collect();
            TypedArray::from_f64(tag, &numbers)
                .map(|array| Value::builtin(Builtin::TypedArray(array)))
                .ok_or_else(|| AmberError::revive(tag, "unknown array kind"))
        },
        move |_key, value| {
            with_builtin(value, |builtin| match builtin {
                Builtin::TypedArray(array) => Some(Value::list(
                    array.to_f64().into_iter().map(Value::Number).collect(),
                )),
                _ => None,
            })
            .ok_or_else(|| not_builtin(tag))
        },
    )
}

// =============================================================================
// REGEXP / BIGINT / NUMBERFORMAT / ERROR
// =============================================================================

fn regexp() -> TypeDescriptor {
    TypeDescriptor::new(
        "RegExp",
        |value| is_builtin(value, "RegExp"),
        |_key, payload| {
            let source = payload_str("RegExp", &payload.get("source"))?;
            let flags = optional_str(&payload, "flags").unwrap_or_default();
            Ok(Value::builtin(Builtin::RegExp(Pattern::new(source, flags)?)))
        },
        |_key, value| {
            with_builtin(value, |builtin| match builtin {
                Builtin::RegExp(pattern) => Some(Value::map([
                    ("source", Value::from(pattern.source())),
                    ("flags", Value::from(pattern.flags())),
                ])),
                _ => None,
            })
            .ok_or_else(|| not_builtin("RegExp"))
        },
    )
}

fn bigint() -> TypeDescriptor {
    TypeDescriptor::new(
        "BigInt",
        |value| is_builtin(value, "BigInt"),
        |_key, payload| {
            let n: BigInt = payload_str("BigInt", &payload)?.parse()?;
            Ok(Value::builtin(Builtin::BigInt(n)))
        },
        |_key, value| {
            with_builtin(value, |builtin| match builtin {
                Builtin::BigInt(n) => Some(Value::from(n.as_str())),
                _ => None,
            })
            .ok_or_else(|| not_builtin("BigInt"))
        },
    )
}

fn number_format() -> TypeDescriptor {
    TypeDescriptor::new(
        "NumberFormat",
        |value| is_builtin(value, "NumberFormat"),
        |_key, payload| {
            let locale = payload_str("NumberFormat", &payload.get("locale"))?;
            let minimum = payload.get("minimumFractionDigits").as_f64().unwrap_or(0.0);
            let maximum = payload.get("maximumFractionDigits").as_f64().unwrap_or(3.0);
            let grouping = payload.get("useGrouping").as_bool().unwrap_or(true);
            Ok(Value::builtin(Builtin::NumberFormat(
                NumberFormat::new(locale)
                    .with_fraction_digits(minimum as u8, maximum as u8)
                    .with_grouping(grouping),
            )))
        },
        |_key, value| {
            with_builtin(value, |builtin| match builtin {
                Builtin::NumberFormat(format) => Some(Value::map([
                    ("locale", Value::from(format.locale())),
                    (
                        "minimumFractionDigits",
                        Value::from(u32::from(format.minimum_fraction_digits())),
                    ),
                    (
                        "maximumFractionDigits",
                        Value::from(u32::from(format.maximum_fraction_digits())),
                    ),
                    ("useGrouping", Value::from(format.use_grouping())),
                ])),
                _ => None,
            })
            .ok_or_else(|| not_builtin("NumberFormat"))
        },
    )
}

fn error() -> TypeDescriptor {
    TypeDescriptor::new(
        "Error",
        |value| is_builtin(value, "Error"),
        |_key, payload| {
            let error = ErrorValue {
                name: optional_str(&payload, "name").unwrap_or_else(|| "Error".to_string()),
                message: optional_str(&payload, "message").unwrap_or_default(),
                stack: optional_str(&payload, "stack"),
                file_name: optional_str(&payload, "fileName"),
                line_number: optional_u32(&payload, "lineNumber"),
                column_number: optional_u32(&payload, "columnNumber"),
            };
            Ok(Value::builtin(Builtin::Error(error)))
        },
        |_key, value| {
            with_builtin(value, |builtin| match builtin {
                Builtin::Error(error) => Some(Value::map([
                    ("name", Value::from(error.name.as_str())),
                    ("message", Value::from(error.message.as_str())),
                    ("stack", optional_value(error.stack.clone())),
                    ("fileName", optional_value(error.file_name.clone())),
                    ("lineNumber", optional_value(error.line_number)),
                    ("columnNumber", optional_value(error.column_number)),
                ])),
                _ => None,
            })
            .ok_or_else(|| not_builtin("Error"))
        },
    )
}

// =============================================================================
// SCHEDULER
// =============================================================================

fn scheduler(timers: &Rc<TimerQueue>) -> TypeDescriptor {
    let timers = Rc::clone(timers);
    TypeDescriptor::new(
        "Scheduler",
        |value| is_builtin(value, "Scheduler"),
        move |_key, payload| {
            let mut entries = Vec::new();
            for item in payload_list("Scheduler", &payload)? {
                let method = payload_str("Scheduler", &item.get("method"))?;
                let fire_at = item.get("fireAt").as_f64().ok_or_else(|| {
                    AmberError::revive("Scheduler", format!("entry {method:?} has no fireAt"))
                })?;
                let args = match item.get("args") {
                    Value::Null => Vec::new(),
                    args => payload_list("Scheduler", &args)?,
                };
                entries.push(ScheduleEntry {
                    fire_at: fire_at as i64,
                    method,
                    args,
                });
            }
            Ok(Value::builtin(Builtin::Scheduler(DeferredScheduler::from_entries(
                Rc::clone(&timers),
                entries,
            ))))
        },
        |_key, value| {
            with_builtin(value, |builtin| match builtin {
                Builtin::Scheduler(scheduler) => Some(Value::list(
                    scheduler
                        .entries()
                        .into_iter()
                        .map(|entry| {
                            Value::map([
                                ("fireAt", Value::from(entry.fire_at)),
                                ("method", Value::from(entry.method)),
                                ("args", Value::list(entry.args)),
                            ])
                        })
                        .collect(),
                )),
                _ => None,
            })
            .ok_or_else(|| not_builtin("Scheduler"))
        },
    )
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timers::ManualClock;

    fn descriptors() -> Vec<TypeDescriptor> {
        builtin_descriptors(&TimerQueue::new(ManualClock::new(0)), BTreeMap::new())
    }

    fn by_name<'a>(all: &'a [TypeDescriptor], name: &str) -> &'a TypeDescriptor {
        all.iter().find(|d| d.name() == name).expect("descriptor")
    }

    #[test]
    fn lookup_order_starts_with_singletons() {
        let all = descriptors();
        assert_eq!(all[0].name(), "Singleton");
        assert_eq!(all.last().expect("last").name(), "Scheduler");
        assert_eq!(all.len(), 4 + TYPED_ARRAY_TAGS.len() + 5);
    }

    #[test]
    fn bad_date_payload_is_a_revive_error() {
        let all = descriptors();
        let err = by_name(&all, "Date")
            .revive("when", Value::from("not a date"))
            .expect_err("bad date");
        assert!(matches!(err, AmberError::Revive { tag, .. } if tag == "Date"));
    }

    #[test]
    fn bad_pattern_payload_is_a_revive_error() {
        let all = descriptors();
        let payload = Value::map([("source", Value::from("(")), ("flags", Value::from(""))]);
        assert!(by_name(&all, "RegExp").revive("re", payload).is_err());
    }

    #[test]
    fn singleton_resolves_by_name() {
        let world = ObjectRef::new(Object::Map(BTreeMap::new()));
        let table = BTreeMap::from([("world".to_string(), world.clone())]);
        let all = builtin_descriptors(&TimerQueue::new(ManualClock::new(0)), table);
        let descriptor = by_name(&all, "Singleton");

        let value = Value::Object(world.clone());
        assert!(descriptor.matches(&value));
        assert!(!descriptor.matches(&Value::empty_map()));
        assert_eq!(descriptor.replace("", &value).expect("name"), Value::from("world"));
        let revived = descriptor.revive("", Value::from("world")).expect("revive");
        assert!(revived.same_value(&value));
        assert!(descriptor.revive("", Value::from("moon")).is_err());
    }

    #[test]
    fn error_payload_keeps_source_location() {
        let all = descriptors();
        let descriptor = by_name(&all, "Error");
        let mut error = ErrorValue::new("RangeError", "too far");
        error.line_number = Some(12);
        let value = Value::builtin(Builtin::Error(error));

        let payload = descriptor.replace("", &value).expect("payload");
        assert_eq!(payload.get("lineNumber"), Value::from(12));
        let revived = descriptor.revive("", payload).expect("revive");
        assert_eq!(revived, value);
    }
}
