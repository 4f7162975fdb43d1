//! Native methods of lists and built-ins.
//!
//! Natives are created once per thread and cached, so reading `list.push`
//! twice yields the same callable.

use crate::builtins::Builtin;
use crate::class::Callable;
use crate::scheduler::SchedulerRef;
use crate::types::AmberError;
use crate::value::{Object, ObjectRef, Value};
use std::cell::RefCell;
use std::collections::BTreeMap;

type NativeBody = fn(&Value, &[Value]) -> Result<Value, AmberError>;

thread_local! {
    static NATIVES: RefCell<BTreeMap<(&'static str, &'static str), Callable>> =
        const { RefCell::new(BTreeMap::new()) };
}

/// Find the native method `name` for this kind of object.
pub(crate) fn lookup(object: &Object, name: &str) -> Option<Callable> {
    let family = match object {
        Object::List(_) => "Array",
        Object::Builtin(Builtin::Map(_)) => "Map",
        Object::Builtin(Builtin::Set(_)) => "Set",
        Object::Builtin(Builtin::RegExp(_)) => "RegExp",
        Object::Builtin(Builtin::NumberFormat(_)) => "NumberFormat",
        Object::Builtin(Builtin::Scheduler(_)) => "Scheduler",
        _ => return None,
    };
    let (name, body, mutates) = native_body(family, name)?;
    Some(NATIVES.with(|cache| {
        cache
            .borrow_mut()
            .entry((family, name))
            .or_insert_with(|| {
                if mutates {
                    Callable::native_mut(name, body)
                } else {
                    Callable::native(name, body)
                }
            })
            .clone()
    }))
}

/// Name, body, and whether the native changes its receiver.
fn native_body(family: &str, name: &str) -> Option<(&'static str, NativeBody, bool)> {
    let found: (&'static str, NativeBody, bool) = match (family, name) {
        ("Array", "push") => ("push", array_push, true),
        ("Array", "pop") => ("pop", array_pop, true),
        ("Map", "set") => ("set", map_set, true),
        ("Map", "get") => ("get", map_get, false),
        ("Map", "has") => ("has", map_has, false),
        ("Map", "delete") => ("delete", map_delete, true),
        ("Map", "clear") => ("clear", map_clear, true),
        ("Set", "add") => ("add", set_add, true),
        ("Set", "has") => ("has", set_has, false),
        ("Set", "delete") => ("delete", set_delete, true),
        ("Set", "clear") => ("clear", set_clear, true),
        ("RegExp", "test") => ("test", regexp_test, false),
        ("NumberFormat", "format") => ("format", number_format, false),
        ("Scheduler", "schedule") => ("schedule", scheduler_schedule, true),
        // The target is runtime state; it is never persisted.
        ("Scheduler", "setTarget") => ("setTarget", scheduler_set_target, false),
        _ => return None,
    };
    Some(found)
}

fn receiver<'a>(this: &'a Value, method: &str) -> Result<&'a ObjectRef, AmberError> {
    this.as_object()
        .ok_or_else(|| AmberError::InvalidTarget(format!("{method} called on {}", this.type_name())))
}

fn wrong_receiver(method: &str, object: &Object) -> AmberError {
    AmberError::InvalidTarget(format!("{method} called on {}", object.type_name()))
}

fn arg(args: &[Value], index: usize) -> Value {
    args.get(index).cloned().unwrap_or_default()
}

// =============================================================================
// ARRAY
// =============================================================================

fn with_list<R>(
    this: &Value,
    method: &str,
    f: impl FnOnce(&mut Vec<Value>) -> R,
) -> Result<R, AmberError> {
    let object = receiver(this, method)?;
    let mut data = object.borrow_mut();
    match &mut *data {
        Object::List(items) => Ok(f(items)),
        other => Err(wrong_receiver(method, other)),
    }
}

fn array_push(this: &Value, args: &[Value]) -> Result<Value, AmberError> {
    with_list(this, "push", |items| {
        items.extend(args.iter().cloned());
        Value::Number(items.len() as f64)
    })
}

fn array_pop(this: &Value, _args: &[Value]) -> Result<Value, AmberError> {
    with_list(this, "pop", |items| items.pop().unwrap_or_default())
}

// =============================================================================
// MAP
// =============================================================================

fn with_map<R>(
    this: &Value,
    method: &str,
    f: impl FnOnce(&mut Vec<(Value, Value)>) -> R,
) -> Result<R, AmberError> {
    let object = receiver(this, method)?;
    let mut data = object.borrow_mut();
    match &mut *data {
        Object::Builtin(Builtin::Map(entries)) => Ok(f(entries)),
        other => Err(wrong_receiver(method, other)),
    }
}

fn map_set(this: &Value, args: &[Value]) -> Result<Value, AmberError> {
    let (key, value) = (arg(args, 0), arg(args, 1));
    with_map(this, "set", |entries| {
        match entries.iter_mut().find(|(k, _)| k.same_value(&key)) {
            Some(entry) => entry.1 = value,
            None => entries.push((key, value)),
        }
    })?;
    Ok(this.clone())
}

fn map_get(this: &Value, args: &[Value]) -> Result<Value, AmberError> {
    let key = arg(args, 0);
    with_map(this, "get", |entries| {
        entries
            .iter()
            .find(|(k, _)| k.same_value(&key))
            .map(|(_, v)| v.clone())
            .unwrap_or_default()
    })
}

fn map_has(this: &Value, args: &[Value]) -> Result<Value, AmberError> {
    let key = arg(args, 0);
    with_map(this, "has", |entries| {
        Value::Bool(entries.iter().any(|(k, _)| k.same_value(&key)))
    })
}

fn map_delete(this: &Value, args: &[Value]) -> Result<Value, AmberError> {
    let key = arg(args, 0);
    with_map(this, "delete", |entries| {
        let before = entries.len();
        entries.retain(|(k, _)| !k.same_value(&key));
        Value::Bool(entries.len() != before)
    })
}

fn map_clear(this: &Value, _args: &[Value]) -> Result<Value, AmberError> {
    with_map(this, "clear", Vec::clear)?;
    Ok(Value::Null)
}

// =============================================================================
// SET
// =============================================================================

fn with_set<R>(
    this: &Value,
    method: &str,
    f: impl FnOnce(&mut Vec<Value>) -> R,
) -> Result<R, AmberError> {
    let object = receiver(this, method)?;
    let mut data = object.borrow_mut();
    match &mut *data {
        Object::Builtin(Builtin::Set(items)) => Ok(f(items)),
        other => Err(wrong_receiver(method, other)),
    }
}

fn set_add(this: &Value, args: &[Value]) -> Result<Value, AmberError> {
    let value = arg(args, 0);
    with_set(this, "add", |items| {
        if !items.iter().any(|item| item.same_value(&value)) {
            items.push(value);
        }
    })?;
    Ok(this.clone())
}

fn set_has(this: &Value, args: &[Value]) -> Result<Value, AmberError> {
    let value = arg(args, 0);
    with_set(this, "has", |items| {
        Value::Bool(items.iter().any(|item| item.same_value(&value)))
    })
}

fn set_delete(this: &Value, args: &[Value]) -> Result<Value, AmberError> {
    let value = arg(args, 0);
    with_set(this, "delete", |items| {
        let before = items.len();
        items.retain(|item| !item.same_value(&value));
        Value::Bool(items.len() != before)
    })
}

fn set_clear(this: &Value, _args: &[Value]) -> Result<Value, AmberError> {
    with_set(this, "clear", Vec::clear)?;
    Ok(Value::Null)
}

// =============================================================================
// REGEXP / NUMBERFORMAT
// =============================================================================

fn regexp_test(this: &Value, args: &[Value]) -> Result<Value, AmberError> {
    let object = receiver(this, "test")?;
    let data = object.borrow();
    let Object::Builtin(Builtin::RegExp(pattern)) = &*data else {
        return Err(wrong_receiver("test", &data));
    };
    let text = match arg(args, 0) {
        Value::String(s) => s,
        other => other.type_name(),
    };
    Ok(Value::Bool(pattern.is_match(&text)))
}

fn number_format(this: &Value, args: &[Value]) -> Result<Value, AmberError> {
    let object = receiver(this, "format")?;
    let data = object.borrow();
    let Object::Builtin(Builtin::NumberFormat(format)) = &*data else {
        return Err(wrong_receiver("format", &data));
    };
    let n = arg(args, 0).as_f64().unwrap_or(f64::NAN);
    Ok(Value::from(format.format(n)))
}

// =============================================================================
// SCHEDULER
// =============================================================================

fn scheduler_ref(this: &Value, method: &str) -> Result<SchedulerRef, AmberError> {
    let object = receiver(this, method)?;
    SchedulerRef::from_object(object).ok_or_else(|| wrong_receiver(method, &object.borrow()))
}

/// `schedule(delayMs, method, ...args)`
fn scheduler_schedule(this: &Value, args: &[Value]) -> Result<Value, AmberError> {
    let scheduler = scheduler_ref(this, "schedule")?;
    let delay = arg(args, 0).as_f64().unwrap_or(0.0);
    let method = match arg(args, 1) {
        Value::String(name) => name,
        other => {
            return Err(AmberError::NotCallable(format!(
                "schedule expects a method name, got {}",
                other.type_name()
            )));
        }
    };
    let rest = args.get(2..).unwrap_or_default().to_vec();
    scheduler.schedule(delay as i64, &method, rest);
    Ok(Value::Null)
}

/// `setTarget(object)` with the raw target. Prefer
/// [`SchedulerRef::set_target`] with an observed handle so that scheduled
/// calls are reported.
fn scheduler_set_target(this: &Value, args: &[Value]) -> Result<Value, AmberError> {
    let scheduler = scheduler_ref(this, "setTarget")?;
    match arg(args, 0) {
        Value::Object(target) => {
            scheduler.set_target(crate::observer::This::Raw(target))?;
            Ok(Value::Null)
        }
        other => Err(AmberError::InvalidTarget(format!(
            "scheduler target must be an object, got {}",
            other.type_name()
        ))),
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observer::This;

    fn call(target: &Value, name: &str, args: &[Value]) -> Value {
        let callable = target.get(name);
        let callable = callable.as_callable().expect("native");
        let object = target.as_object().expect("object").clone();
        callable.invoke(&This::Raw(object), args).expect("call")
    }

    #[test]
    fn natives_are_cached() {
        let a = Value::list(vec![]);
        let b = Value::list(vec![]);
        assert!(a.get("push").same_value(&b.get("push")));
    }

    #[test]
    fn array_push_and_pop() {
        let list = Value::list(vec![]);
        assert_eq!(call(&list, "push", &[Value::from(1), Value::from(2)]), Value::from(2));
        assert_eq!(call(&list, "pop", &[]), Value::from(2));
        assert_eq!(list.get("length"), Value::from(1));
    }

    #[test]
    fn map_keys_compare_by_identity() {
        let map = Value::builtin(Builtin::Map(Vec::new()));
        let key = Value::empty_map();
        call(&map, "set", &[key.clone(), Value::from("a")]);
        call(&map, "set", &[Value::empty_map(), Value::from("b")]);
        call(&map, "set", &[key.clone(), Value::from("c")]);

        assert_eq!(map.get("size"), Value::from(2));
        assert_eq!(call(&map, "get", &[key.clone()]), Value::from("c"));
        assert_eq!(call(&map, "delete", &[key.clone()]), Value::Bool(true));
        assert_eq!(call(&map, "has", &[key]), Value::Bool(false));
    }

    #[test]
    fn set_ignores_duplicates() {
        let set = Value::builtin(Builtin::Set(Vec::new()));
        call(&set, "add", &[Value::from(1)]);
        call(&set, "add", &[Value::from(1)]);
        assert_eq!(set.get("size"), Value::from(1));
        call(&set, "clear", &[]);
        assert_eq!(set.get("size"), Value::from(0));
    }

    #[test]
    fn only_changing_natives_mutate() {
        let list = Value::list(vec![]);
        let map = Value::builtin(Builtin::Map(Vec::new()));
        let mutates = |target: &Value, name: &str| {
            target
                .get(name)
                .as_callable()
                .expect("native")
                .mutates_receiver()
        };
        assert!(mutates(&list, "push"));
        assert!(mutates(&map, "set"));
        assert!(!mutates(&map, "get"));
        assert!(!mutates(&map, "has"));
    }

    #[test]
    fn unknown_native_is_missing() {
        let list = Value::list(vec![]);
        assert!(list.get("frobnicate").is_null());
    }
}
