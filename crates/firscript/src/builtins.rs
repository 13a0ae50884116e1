use std::rc::Rc;

use strum::{Display, EnumIter, EnumString, IntoEnumIterator, IntoStaticStr};

use crate::{
    error::{ExcKind, Raise, RunResult},
    eval::Evaluator,
    value::{CallArgs, Dict, DictKey, Value, ValueIter, Vars},
};

/// The allow-listed builtin functions exposed to every script.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, EnumIter, IntoStaticStr)]
#[strum(serialize_all = "lowercase")]
pub enum Builtins {
    Int,
    Float,
    Str,
    Bool,
    List,
    Dict,
    Tuple,
    Len,
    Range,
    Print,
    Abs,
    Min,
    Max,
    Sum,
    Round,
    Sorted,
    Enumerate,
    Zip,
    Map,
    Filter,
    Isinstance,
    Iter,
    Next,
}

/// Host primitives scripts must never reach.
///
/// Each is installed into the script scope as a shim of the same name whose
/// invocation raises `NotAllowedError`, so a script that touches one fails at
/// the call site without executing any side effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, EnumIter, IntoStaticStr)]
#[strum(serialize_all = "lowercase")]
pub enum DeniedBuiltin {
    Eval,
    Exec,
    Compile,
    Open,
    Input,
    #[strum(serialize = "__import__")]
    Import,
    Importlib,
    Getattr,
    Setattr,
    Delattr,
    Vars,
    Globals,
    Locals,
    Exit,
    Quit,
    Help,
    Breakpoint,
}

/// Seeds a fresh scope with the allow-listed builtins and the deny shims.
///
/// Namespaces are merged in afterwards by the execution context and win on
/// name collisions.
pub(crate) fn install_builtins(vars: &mut Vars) {
    for builtin in Builtins::iter() {
        let name: &'static str = builtin.into();
        vars.insert(Rc::from(name), Value::Builtin(builtin));
    }
    for denied in DeniedBuiltin::iter() {
        let name: &'static str = denied.into();
        vars.insert(Rc::from(name), Value::Denied(denied));
    }
}

pub(crate) fn call_builtin(builtin: Builtins, args: CallArgs, ev: &mut Evaluator) -> RunResult<Value> {
    match builtin {
        Builtins::Int => builtin_int(&args),
        Builtins::Float => builtin_float(&args),
        Builtins::Str => {
            args.no_kwargs("str")?;
            match args.pos.as_slice() {
                [] => Ok(Value::str("")),
                [value] => Ok(Value::str(value.str_value())),
                _ => Err(Raise::type_error("str() takes at most 1 argument").into()),
            }
        }
        Builtins::Bool => {
            args.no_kwargs("bool")?;
            match args.pos.as_slice() {
                [] => Ok(Value::Bool(false)),
                [value] => Ok(Value::Bool(value.is_truthy())),
                _ => Err(Raise::type_error("bool() takes at most 1 argument").into()),
            }
        }
        Builtins::List => {
            args.no_kwargs("list")?;
            match args.pos.as_slice() {
                [] => Ok(Value::list(Vec::new())),
                [value] => Ok(Value::list(value.iter_values()?)),
                _ => Err(Raise::type_error("list() takes at most 1 argument").into()),
            }
        }
        Builtins::Dict => builtin_dict(args),
        Builtins::Tuple => {
            args.no_kwargs("tuple")?;
            match args.pos.as_slice() {
                [] => Ok(Value::Tuple(Rc::from(Vec::new()))),
                [value] => Ok(Value::Tuple(Rc::from(value.iter_values()?))),
                _ => Err(Raise::type_error("tuple() takes at most 1 argument").into()),
            }
        }
        Builtins::Len => {
            args.no_kwargs("len")?;
            args.expect_len("len", 1)?;
            Ok(Value::Int(i64::try_from(args.pos[0].len()?).unwrap_or(i64::MAX)))
        }
        Builtins::Range => builtin_range(&args),
        Builtins::Print => builtin_print(&args, ev),
        Builtins::Abs => {
            args.no_kwargs("abs")?;
            args.expect_len("abs", 1)?;
            match &args.pos[0] {
                Value::Int(i) => Ok(Value::Int(i.checked_abs().unwrap_or(i64::MAX))),
                Value::Bool(b) => Ok(Value::Int(i64::from(*b))),
                Value::Float(f) => Ok(Value::Float(f.abs())),
                other => Err(Raise::type_error(format!("bad operand type for abs(): '{}'", other.type_name())).into()),
            }
        }
        Builtins::Min => builtin_min_max(&args, "min", std::cmp::Ordering::Less),
        Builtins::Max => builtin_min_max(&args, "max", std::cmp::Ordering::Greater),
        Builtins::Sum => builtin_sum(&args),
        Builtins::Round => builtin_round(&args),
        Builtins::Sorted => builtin_sorted(args, ev),
        Builtins::Enumerate => builtin_enumerate(&args),
        Builtins::Zip => {
            args.no_kwargs("zip")?;
            let iterables = args
                .pos
                .iter()
                .map(Value::iter_values)
                .collect::<Result<Vec<_>, _>>()?;
            let shortest = iterables.iter().map(Vec::len).min().unwrap_or(0);
            let items = (0..shortest)
                .map(|i| Value::Tuple(Rc::from(iterables.iter().map(|it| it[i].clone()).collect::<Vec<_>>())))
                .collect();
            Ok(Value::list(items))
        }
        Builtins::Map => {
            args.no_kwargs("map")?;
            args.expect_len("map", 2)?;
            let func = args.pos[0].clone();
            let mut items = Vec::new();
            for value in args.pos[1].iter_values()? {
                items.push(ev.call_value(&func, CallArgs::positional([value]))?);
            }
            Ok(Value::list(items))
        }
        Builtins::Filter => {
            args.no_kwargs("filter")?;
            args.expect_len("filter", 2)?;
            let func = args.pos[0].clone();
            let mut items = Vec::new();
            for value in args.pos[1].iter_values()? {
                let keep = match &func {
                    Value::None => value.is_truthy(),
                    func => ev.call_value(func, CallArgs::positional([value.clone()]))?.is_truthy(),
                };
                if keep {
                    items.push(value);
                }
            }
            Ok(Value::list(items))
        }
        Builtins::Isinstance => builtin_isinstance(&args),
        Builtins::Iter => {
            args.no_kwargs("iter")?;
            args.expect_len("iter", 1)?;
            match &args.pos[0] {
                iter @ Value::Iter(_) => Ok(iter.clone()),
                value => Ok(Value::Iter(Rc::new(std::cell::RefCell::new(ValueIter::new(
                    value.iter_state()?,
                ))))),
            }
        }
        Builtins::Next => {
            args.no_kwargs("next")?;
            if args.pos.is_empty() || args.pos.len() > 2 {
                return Err(Raise::type_error("next() takes 1 or 2 arguments").into());
            }
            let Value::Iter(state) = &args.pos[0] else {
                return Err(Raise::type_error(format!("'{}' object is not an iterator", args.pos[0].type_name())).into());
            };
            match state.borrow_mut().next_value() {
                Some(value) => Ok(value),
                None => match args.pos.get(1) {
                    Some(default) => Ok(default.clone()),
                    None => Err(Raise::new(ExcKind::StopIteration, "").into()),
                },
            }
        }
    }
}

fn builtin_int(args: &CallArgs) -> RunResult<Value> {
    args.no_kwargs("int")?;
    match args.pos.as_slice() {
        [] => Ok(Value::Int(0)),
        [Value::Int(i)] => Ok(Value::Int(*i)),
        [Value::Bool(b)] => Ok(Value::Int(i64::from(*b))),
        [Value::Float(f)] => Ok(Value::Int(*f as i64)),
        [Value::Str(s)] => s
            .trim()
            .parse::<i64>()
            .map(Value::Int)
            .map_err(|_| Raise::value_error(format!("invalid literal for int(): '{s}'")).into()),
        [other] => Err(Raise::type_error(format!("int() argument must be a number or string, not '{}'", other.type_name())).into()),
        _ => Err(Raise::type_error("int() takes at most 1 argument").into()),
    }
}

fn builtin_float(args: &CallArgs) -> RunResult<Value> {
    args.no_kwargs("float")?;
    match args.pos.as_slice() {
        [] => Ok(Value::Float(0.0)),
        [Value::Float(f)] => Ok(Value::Float(*f)),
        [Value::Int(i)] => Ok(Value::Float(*i as f64)),
        [Value::Bool(b)] => Ok(Value::Float(f64::from(i32::from(*b)))),
        [Value::Str(s)] => s
            .trim()
            .parse::<f64>()
            .map(Value::Float)
            .map_err(|_| Raise::value_error(format!("could not convert string to float: '{s}'")).into()),
        [other] => Err(Raise::type_error(format!("float() argument must be a number or string, not '{}'", other.type_name())).into()),
        _ => Err(Raise::type_error("float() takes at most 1 argument").into()),
    }
}

fn builtin_dict(args: CallArgs) -> RunResult<Value> {
    let mut dict = Dict::new();
    match args.pos.as_slice() {
        [] => {}
        [Value::Dict(source)] => {
            dict = source.borrow().clone();
        }
        [pairs] => {
            for pair in pairs.iter_values()? {
                let items = pair.iter_values().map_err(|_| {
                    Raise::type_error("dict() update sequence elements must be key/value pairs")
                })?;
                let [key, value] = items.as_slice() else {
                    return Err(Raise::value_error("dict() update sequence element is not a pair").into());
                };
                dict.insert(DictKey::from_value(key)?, value.clone());
            }
        }
        _ => return Err(Raise::type_error("dict() takes at most 1 positional argument").into()),
    }
    for (name, value) in args.kwargs {
        dict.insert(DictKey::Str(name), value);
    }
    Ok(Value::dict(dict))
}

fn builtin_range(args: &CallArgs) -> RunResult<Value> {
    args.no_kwargs("range")?;
    let ints = args
        .pos
        .iter()
        .map(|v| v.as_int("range() argument"))
        .collect::<Result<Vec<_>, _>>()?;
    let (start, stop, step) = match ints.as_slice() {
        [stop] => (0, *stop, 1),
        [start, stop] => (*start, *stop, 1),
        [start, stop, step] => (*start, *stop, *step),
        _ => return Err(Raise::type_error("range() takes 1 to 3 arguments").into()),
    };
    if step == 0 {
        return Err(Raise::value_error("range() arg 3 must not be zero").into());
    }
    Ok(Value::Range { start, stop, step })
}

fn builtin_print(args: &CallArgs, ev: &mut Evaluator) -> RunResult<Value> {
    let mut sep = " ".to_owned();
    let mut end = String::new();
    for (name, value) in &args.kwargs {
        match &**name {
            "sep" => sep = value.str_value(),
            "end" => {
                end = value.str_value();
                if end.ends_with('\n') {
                    end.pop();
                }
            }
            other => return Err(Raise::type_error(format!("print() got an unexpected keyword argument '{other}'")).into()),
        }
    }
    let line = args.pos.iter().map(Value::str_value).collect::<Vec<_>>().join(&sep) + &end;
    ev.print_line(&line);
    Ok(Value::None)
}

fn builtin_min_max(args: &CallArgs, name: &str, want: std::cmp::Ordering) -> RunResult<Value> {
    args.no_kwargs(name)?;
    let values = match args.pos.as_slice() {
        [] => return Err(Raise::type_error(format!("{name}() expected at least 1 argument")).into()),
        [iterable] => iterable.iter_values()?,
        many => many.to_vec(),
    };
    let mut values = values.into_iter();
    let Some(mut best) = values.next() else {
        return Err(Raise::value_error(format!("{name}() arg is an empty sequence")).into());
    };
    for value in values {
        match value.py_cmp(&best) {
            Some(ordering) if ordering == want => best = value,
            Some(_) => {}
            None => {
                return Err(Raise::type_error(format!(
                    "'{}' not supported between instances of '{}' and '{}'",
                    if want == std::cmp::Ordering::Less { "<" } else { ">" },
                    value.type_name(),
                    best.type_name()
                ))
                .into());
            }
        }
    }
    Ok(best)
}

fn builtin_sum(args: &CallArgs) -> RunResult<Value> {
    args.no_kwargs("sum")?;
    if args.pos.is_empty() || args.pos.len() > 2 {
        return Err(Raise::type_error("sum() takes 1 or 2 arguments").into());
    }
    let mut total = match args.pos.get(1) {
        Some(start) => start.clone(),
        None => Value::Int(0),
    };
    for value in args.pos[0].iter_values()? {
        total = match (&total, &value) {
            (Value::Int(a), Value::Int(b)) => Value::Int(a.checked_add(*b).ok_or_else(int_overflow)?),
            _ => match (total.as_number(), value.as_number()) {
                (Some(a), Some(b)) => Value::Float(a + b),
                _ => {
                    return Err(Raise::type_error(format!(
                        "unsupported operand type(s) for +: '{}' and '{}'",
                        total.type_name(),
                        value.type_name()
                    ))
                    .into());
                }
            },
        };
    }
    Ok(total)
}

fn builtin_round(args: &CallArgs) -> RunResult<Value> {
    args.no_kwargs("round")?;
    if args.pos.is_empty() || args.pos.len() > 2 {
        return Err(Raise::type_error("round() takes 1 or 2 arguments").into());
    }
    let digits = match args.pos.get(1) {
        Some(value) => Some(value.as_int("round() ndigits")?),
        None => None,
    };
    match (&args.pos[0], digits) {
        (Value::Int(i), _) => Ok(Value::Int(*i)),
        (Value::Bool(b), _) => Ok(Value::Int(i64::from(*b))),
        (Value::Float(f), None) => Ok(Value::Int(f.round() as i64)),
        (Value::Float(f), Some(digits)) => {
            let factor = 10f64.powi(i32::try_from(digits).unwrap_or(0));
            Ok(Value::Float((f * factor).round() / factor))
        }
        (other, _) => Err(Raise::type_error(format!("type {} doesn't define round()", other.type_name())).into()),
    }
}

fn builtin_sorted(args: CallArgs, ev: &mut Evaluator) -> RunResult<Value> {
    args.expect_len("sorted", 1)?;
    let mut key_fn = None;
    let mut reverse = false;
    for (name, value) in &args.kwargs {
        match &**name {
            "key" => {
                if !matches!(value, Value::None) {
                    key_fn = Some(value.clone());
                }
            }
            "reverse" => reverse = value.is_truthy(),
            other => {
                return Err(Raise::type_error(format!("sorted() got an unexpected keyword argument '{other}'")).into());
            }
        }
    }
    let values = args.pos[0].iter_values()?;
    let mut decorated = Vec::with_capacity(values.len());
    for value in values {
        let key = match &key_fn {
            Some(func) => ev.call_value(func, CallArgs::positional([value.clone()]))?,
            None => value.clone(),
        };
        decorated.push((key, value));
    }
    let mut incomparable = None;
    decorated.sort_by(|(a, _), (b, _)| {
        a.py_cmp(b).unwrap_or_else(|| {
            incomparable.get_or_insert_with(|| (a.type_name(), b.type_name()));
            std::cmp::Ordering::Equal
        })
    });
    if let Some((a, b)) = incomparable {
        return Err(Raise::type_error(format!("'<' not supported between instances of '{b}' and '{a}'")).into());
    }
    if reverse {
        decorated.reverse();
    }
    Ok(Value::list(decorated.into_iter().map(|(_, value)| value).collect()))
}

fn builtin_enumerate(args: &CallArgs) -> RunResult<Value> {
    let mut start = match args.kwarg("start") {
        Some(value) => value.as_int("enumerate() start")?,
        None => 0,
    };
    if let Some((name, _)) = args.kwargs.iter().find(|(name, _)| &**name != "start") {
        return Err(Raise::type_error(format!("enumerate() got an unexpected keyword argument '{name}'")).into());
    }
    if args.pos.len() == 2 {
        start = args.pos[1].as_int("enumerate() start")?;
    } else if args.pos.len() != 1 {
        return Err(Raise::type_error("enumerate() takes 1 or 2 arguments").into());
    }
    let items = args.pos[0]
        .iter_values()?
        .into_iter()
        .enumerate()
        .map(|(i, value)| Value::Tuple(Rc::from(vec![Value::Int(start + i as i64), value])))
        .collect();
    Ok(Value::list(items))
}

fn builtin_isinstance(args: &CallArgs) -> RunResult<Value> {
    args.no_kwargs("isinstance")?;
    args.expect_len("isinstance", 2)?;
    let matched = match &args.pos[1] {
        Value::Builtin(builtin) => type_matches(&args.pos[0], *builtin)?,
        Value::Tuple(types) => {
            let mut matched = false;
            for ty in types.iter() {
                let Value::Builtin(builtin) = ty else {
                    return Err(Raise::type_error("isinstance() arg 2 must be a type or tuple of types").into());
                };
                if type_matches(&args.pos[0], *builtin)? {
                    matched = true;
                    break;
                }
            }
            matched
        }
        _ => return Err(Raise::type_error("isinstance() arg 2 must be a type or tuple of types").into()),
    };
    Ok(Value::Bool(matched))
}

fn type_matches(value: &Value, builtin: Builtins) -> Result<bool, Raise> {
    Ok(match builtin {
        // bool is a subtype of int, as in Python.
        Builtins::Int => matches!(value, Value::Int(_) | Value::Bool(_)),
        Builtins::Float => matches!(value, Value::Float(_)),
        Builtins::Str => matches!(value, Value::Str(_)),
        Builtins::Bool => matches!(value, Value::Bool(_)),
        Builtins::List => matches!(value, Value::List(_)),
        Builtins::Dict => matches!(value, Value::Dict(_)),
        Builtins::Tuple => matches!(value, Value::Tuple(_)),
        Builtins::Range => matches!(value, Value::Range { .. }),
        other => {
            return Err(Raise::type_error(format!("isinstance() arg 2 must be a type, not the {other} function")));
        }
    })
}

/// Arithmetic on `i64` exceeded its range; the engine has no bignum tower.
pub(crate) fn int_overflow() -> Raise {
    Raise::new(ExcKind::RuntimeError, "integer overflow")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_names_round_trip() {
        assert_eq!(Builtins::Isinstance.to_string(), "isinstance");
        assert_eq!("len".parse::<Builtins>().unwrap(), Builtins::Len);
        assert_eq!(DeniedBuiltin::Import.to_string(), "__import__");
        assert_eq!("open".parse::<DeniedBuiltin>().unwrap(), DeniedBuiltin::Open);
    }

    #[test]
    fn install_seeds_allow_and_deny_lists() {
        let mut vars = Vars::default();
        install_builtins(&mut vars);
        assert!(matches!(vars.get("len"), Some(Value::Builtin(Builtins::Len))));
        assert!(matches!(vars.get("open"), Some(Value::Denied(DeniedBuiltin::Open))));
        assert!(matches!(vars.get("eval"), Some(Value::Denied(DeniedBuiltin::Eval))));
    }
}
