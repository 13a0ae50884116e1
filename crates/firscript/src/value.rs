use std::{cell::RefCell, cmp::Ordering, fmt, rc::Rc};

use ahash::AHashMap;
use indexmap::IndexMap;
use smallvec::SmallVec;

use crate::{
    context::ExecutionContext,
    error::{Raise, RunResult, ScriptOrigin},
    expressions::FunctionDef,
    namespace::NamespaceHandle,
};

/// Variable table type used for module globals and function locals.
pub(crate) type Vars = AHashMap<Rc<str>, Value>;

/// A module-level scope, shared by every function the module defines.
///
/// Module execution uses one table as both globals and locals, which is what
/// makes `global`-declared rebinds inside `setup()` visible to `process()`.
pub(crate) type Globals = Rc<RefCell<Vars>>;

/// An insertion-ordered script dictionary.
pub type Dict = IndexMap<DictKey, Value>;

/// The hashable key subset of [`Value`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DictKey {
    None,
    Bool(bool),
    Int(i64),
    /// Bit pattern of the float, so `Eq`/`Hash` stay total.
    Float(u64),
    Str(Rc<str>),
}

impl DictKey {
    pub(crate) fn from_value(value: &Value) -> Result<Self, Raise> {
        match value {
            Value::None => Ok(Self::None),
            Value::Bool(b) => Ok(Self::Bool(*b)),
            Value::Int(i) => Ok(Self::Int(*i)),
            Value::Float(f) => Ok(Self::Float(f.to_bits())),
            Value::Str(s) => Ok(Self::Str(Rc::clone(s))),
            other => Err(Raise::type_error(format!("unhashable type: '{}'", other.type_name()))),
        }
    }

    #[must_use]
    pub fn to_value(&self) -> Value {
        match self {
            Self::None => Value::None,
            Self::Bool(b) => Value::Bool(*b),
            Self::Int(i) => Value::Int(*i),
            Self::Float(bits) => Value::Float(f64::from_bits(*bits)),
            Self::Str(s) => Value::Str(Rc::clone(s)),
        }
    }

    #[must_use]
    pub fn str(s: impl Into<Rc<str>>) -> Self {
        Self::Str(s.into())
    }
}

impl fmt::Display for DictKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_value().repr())
    }
}

/// A user-defined function (or lambda) bound to its defining module.
///
/// The captured `globals` is what lets a function exported by a library keep
/// working when called from an importing script or from the driver.
pub struct ScriptFunction {
    pub(crate) def: Rc<FunctionDef>,
    pub(crate) globals: Globals,
    /// Default values, evaluated once at definition time, aligned with the
    /// tail of the parameter list.
    pub(crate) defaults: Vec<Value>,
    pub(crate) origin: Rc<ScriptOrigin>,
}

impl fmt::Debug for ScriptFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ScriptFunction({})", self.def.name)
    }
}

/// Arguments of a call: positionals plus keywords, already evaluated.
#[derive(Debug, Clone, Default)]
pub struct CallArgs {
    pub pos: SmallVec<[Value; 4]>,
    pub kwargs: Vec<(Rc<str>, Value)>,
}

impl CallArgs {
    #[must_use]
    pub fn positional(pos: impl IntoIterator<Item = Value>) -> Self {
        Self {
            pos: pos.into_iter().collect(),
            kwargs: Vec::new(),
        }
    }

    /// Rejects keyword arguments for callables that take none.
    pub fn no_kwargs(&self, callee: &str) -> Result<(), Raise> {
        match self.kwargs.first() {
            Some((name, _)) => Err(Raise::type_error(format!(
                "{callee}() got an unexpected keyword argument '{name}'"
            ))),
            None => Ok(()),
        }
    }

    /// Requires an exact positional arity.
    pub fn expect_len(&self, callee: &str, len: usize) -> Result<(), Raise> {
        if self.pos.len() == len {
            Ok(())
        } else {
            Err(Raise::type_error(format!(
                "{callee}() takes {len} argument(s) but {} were given",
                self.pos.len()
            )))
        }
    }

    #[must_use]
    pub fn kwarg(&self, name: &str) -> Option<&Value> {
        self.kwargs.iter().find(|(key, _)| &**key == name).map(|(_, value)| value)
    }
}

/// A host-provided callable value, such as the `import_script` capability.
#[derive(Clone)]
pub struct NativeFunction {
    pub(crate) name: Rc<str>,
    pub(crate) func: Rc<dyn Fn(CallArgs) -> RunResult<Value>>,
}

impl fmt::Debug for NativeFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NativeFunction({})", self.name)
    }
}

/// A dot-accessible view over a library's exported mapping.
///
/// `get_export()` wraps a plain dict in one of these so importing scripts
/// (and drivers) can use attribute syntax: `util.add(2, 3)`.
#[derive(Debug, Clone)]
pub struct AttrView {
    entries: IndexMap<Rc<str>, Value>,
}

impl AttrView {
    pub(crate) fn from_dict(dict: &Dict) -> Option<Self> {
        let mut entries = IndexMap::with_capacity(dict.len());
        for (key, value) in dict {
            match key {
                DictKey::Str(name) => {
                    entries.insert(Rc::clone(name), value.clone());
                }
                _ => return None,
            }
        }
        Some(Self { entries })
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.entries.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(name, value)| (&**name, value))
    }
}

/// An in-flight iterator value, as produced by the `iter()` builtin.
#[derive(Debug)]
pub struct ValueIter {
    state: IterState,
}

impl ValueIter {
    pub(crate) fn new(state: IterState) -> Self {
        Self { state }
    }

    pub(crate) fn next_value(&mut self) -> Option<Value> {
        self.state.next_value()
    }
}

/// State of an in-flight iterator produced by `iter()` or a `for` loop.
#[derive(Debug)]
pub(crate) enum IterState {
    /// Snapshot of the values of a list/tuple/dict-keys/string.
    Values { items: Vec<Value>, index: usize },
    Range { next: i64, stop: i64, step: i64 },
}

impl IterState {
    pub(crate) fn next_value(&mut self) -> Option<Value> {
        match self {
            Self::Values { items, index } => {
                let value = items.get(*index).cloned();
                if value.is_some() {
                    *index += 1;
                }
                value
            }
            Self::Range { next, stop, step } => {
                let done = if *step >= 0 { *next >= *stop } else { *next <= *stop };
                if done {
                    None
                } else {
                    let value = *next;
                    *next += *step;
                    Some(Value::Int(value))
                }
            }
        }
    }
}

/// Primary runtime value type.
///
/// Immediate values are stored inline; compound values share ownership via
/// `Rc` with interior mutability where the script can mutate them. The whole
/// engine is single-threaded (driver calls are strictly sequential), so
/// `Rc<RefCell<…>>` is sufficient.
#[derive(Clone)]
pub enum Value {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Rc<str>),
    List(Rc<RefCell<Vec<Value>>>),
    Tuple(Rc<[Value]>),
    Dict(Rc<RefCell<Dict>>),
    Range {
        start: i64,
        stop: i64,
        step: i64,
    },
    Function(Rc<ScriptFunction>),
    /// An allow-listed builtin such as `len` or `print`.
    Builtin(crate::builtins::Builtins),
    /// A deny-listed builtin shim; calling it raises `NotAllowedError`.
    Denied(crate::builtins::DeniedBuiltin),
    NativeFn(NativeFunction),
    /// An opaque namespace object (`ta`, `strategy`, …).
    Namespace(NamespaceHandle),
    /// Dot-accessible wrapper around a library's exported mapping.
    Attrs(Rc<AttrView>),
    /// Handle to another script's execution context, as returned by
    /// `import_script` for indicator/strategy targets.
    Script(Rc<RefCell<ExecutionContext>>),
    Iter(Rc<RefCell<ValueIter>>),
}

impl Value {
    #[must_use]
    pub fn str(s: impl Into<Rc<str>>) -> Self {
        Self::Str(s.into())
    }

    #[must_use]
    pub fn list(items: Vec<Self>) -> Self {
        Self::List(Rc::new(RefCell::new(items)))
    }

    #[must_use]
    pub fn dict(dict: Dict) -> Self {
        Self::Dict(Rc::new(RefCell::new(dict)))
    }

    /// Wraps a host closure as a callable script value.
    pub fn native(name: impl Into<Rc<str>>, func: impl Fn(CallArgs) -> RunResult<Self> + 'static) -> Self {
        Self::NativeFn(NativeFunction {
            name: name.into(),
            func: Rc::new(func),
        })
    }

    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::None => "NoneType",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Str(_) => "str",
            Self::List(_) => "list",
            Self::Tuple(_) => "tuple",
            Self::Dict(_) => "dict",
            Self::Range { .. } => "range",
            Self::Function(_) => "function",
            Self::Builtin(_) | Self::Denied(_) | Self::NativeFn(_) => "builtin_function_or_method",
            Self::Namespace(_) => "namespace",
            Self::Attrs(_) => "namespace",
            Self::Script(_) => "script",
            Self::Iter(_) => "iterator",
        }
    }

    #[must_use]
    pub fn is_truthy(&self) -> bool {
        match self {
            Self::None => false,
            Self::Bool(b) => *b,
            Self::Int(i) => *i != 0,
            Self::Float(f) => *f != 0.0,
            Self::Str(s) => !s.is_empty(),
            Self::List(items) => !items.borrow().is_empty(),
            Self::Tuple(items) => !items.is_empty(),
            Self::Dict(dict) => !dict.borrow().is_empty(),
            Self::Range { start, stop, step } => {
                if *step >= 0 { start < stop } else { start > stop }
            }
            _ => true,
        }
    }

    /// Numeric view used by arithmetic and comparisons: bools count as ints.
    pub(crate) fn as_number(&self) -> Option<f64> {
        match self {
            Self::Bool(b) => Some(f64::from(i32::from(*b))),
            Self::Int(i) => Some(*i as f64),
            Self::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub(crate) fn as_int(&self, what: &str) -> Result<i64, Raise> {
        match self {
            Self::Bool(b) => Ok(i64::from(*b)),
            Self::Int(i) => Ok(*i),
            other => Err(Raise::type_error(format!(
                "{what} must be an integer, not '{}'",
                other.type_name()
            ))),
        }
    }

    /// Python `==` semantics for the supported value kinds.
    #[must_use]
    pub fn py_eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::None, Self::None) => true,
            (Self::Str(a), Self::Str(b)) => a == b,
            (Self::List(a), Self::List(b)) => {
                if Rc::ptr_eq(a, b) {
                    return true;
                }
                let (a, b) = (a.borrow(), b.borrow());
                a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| x.py_eq(y))
            }
            (Self::Tuple(a), Self::Tuple(b)) => a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| x.py_eq(y)),
            (Self::Dict(a), Self::Dict(b)) => {
                if Rc::ptr_eq(a, b) {
                    return true;
                }
                let (a, b) = (a.borrow(), b.borrow());
                a.len() == b.len() && a.iter().all(|(key, value)| b.get(key).is_some_and(|v| value.py_eq(v)))
            }
            (Self::Function(a), Self::Function(b)) => Rc::ptr_eq(a, b),
            (Self::Namespace(a), Self::Namespace(b)) => Rc::ptr_eq(&a.0, &b.0),
            (Self::Builtin(a), Self::Builtin(b)) => a == b,
            (
                Self::Range {
                    start: a1,
                    stop: a2,
                    step: a3,
                },
                Self::Range {
                    start: b1,
                    stop: b2,
                    step: b3,
                },
            ) => a1 == b1 && a2 == b2 && a3 == b3,
            _ => match (self.as_number(), other.as_number()) {
                (Some(a), Some(b)) => a == b,
                _ => false,
            },
        }
    }

    /// Python ordering (`<`, `<=`, …) where defined.
    pub(crate) fn py_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Self::Str(a), Self::Str(b)) => Some(a.cmp(b)),
            (Self::List(a), Self::List(b)) => {
                let (a, b) = (a.borrow(), b.borrow());
                cmp_sequences(&a, &b)
            }
            (Self::Tuple(a), Self::Tuple(b)) => cmp_sequences(a, b),
            _ => match (self.as_number(), other.as_number()) {
                (Some(a), Some(b)) => a.partial_cmp(&b),
                _ => None,
            },
        }
    }

    /// Formats the value the way Python's `repr()` would.
    #[must_use]
    pub fn repr(&self) -> String {
        let mut out = String::new();
        self.repr_fmt(&mut out);
        out
    }

    fn repr_fmt(&self, out: &mut String) {
        use std::fmt::Write as _;
        match self {
            Self::None => out.push_str("None"),
            Self::Bool(true) => out.push_str("True"),
            Self::Bool(false) => out.push_str("False"),
            Self::Int(i) => {
                let _ = write!(out, "{i}");
            }
            Self::Float(f) => out.push_str(&format_float(*f)),
            Self::Str(s) => string_repr_fmt(s, out),
            Self::List(items) => {
                out.push('[');
                for (i, item) in items.borrow().iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    item.repr_fmt(out);
                }
                out.push(']');
            }
            Self::Tuple(items) => {
                out.push('(');
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    item.repr_fmt(out);
                }
                if items.len() == 1 {
                    out.push(',');
                }
                out.push(')');
            }
            Self::Dict(dict) => {
                out.push('{');
                for (i, (key, value)) in dict.borrow().iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    key.to_value().repr_fmt(out);
                    out.push_str(": ");
                    value.repr_fmt(out);
                }
                out.push('}');
            }
            Self::Range { start, stop, step } => {
                if *step == 1 {
                    let _ = write!(out, "range({start}, {stop})");
                } else {
                    let _ = write!(out, "range({start}, {stop}, {step})");
                }
            }
            Self::Function(func) => {
                let _ = write!(out, "<function {}>", func.def.name);
            }
            Self::Builtin(builtin) => {
                let _ = write!(out, "<built-in function {builtin}>");
            }
            Self::Denied(denied) => {
                let _ = write!(out, "<built-in function {denied}>");
            }
            Self::NativeFn(native) => {
                let _ = write!(out, "<built-in function {}>", native.name);
            }
            Self::Namespace(_) => out.push_str("<namespace>"),
            Self::Attrs(view) => {
                out.push_str("namespace(");
                for (i, (name, value)) in view.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    let _ = write!(out, "{name}=");
                    value.repr_fmt(out);
                }
                out.push(')');
            }
            Self::Script(ctx) => match ctx.try_borrow() {
                Ok(ctx) => {
                    let _ = write!(out, "<script '{}'>", ctx.display_name());
                }
                Err(_) => out.push_str("<script>"),
            },
            Self::Iter(_) => out.push_str("<iterator>"),
        }
    }

    /// `str()` conversion: strings unquoted, everything else like `repr()`.
    #[must_use]
    pub fn str_value(&self) -> String {
        match self {
            Self::Str(s) => s.to_string(),
            other => other.repr(),
        }
    }

    /// Converts the value into JSON for driver-side serialization of outputs
    /// and metadata. Callables and opaque handles degrade to their repr.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::None => serde_json::Value::Null,
            Self::Bool(b) => serde_json::Value::Bool(*b),
            Self::Int(i) => serde_json::Value::from(*i),
            Self::Float(f) => serde_json::Number::from_f64(*f).map_or(serde_json::Value::Null, serde_json::Value::Number),
            Self::Str(s) => serde_json::Value::String(s.to_string()),
            Self::List(items) => serde_json::Value::Array(items.borrow().iter().map(Self::to_json).collect()),
            Self::Tuple(items) => serde_json::Value::Array(items.iter().map(Self::to_json).collect()),
            Self::Dict(dict) => serde_json::Value::Object(
                dict.borrow()
                    .iter()
                    .map(|(key, value)| (key.to_value().str_value(), value.to_json()))
                    .collect(),
            ),
            Self::Attrs(view) => serde_json::Value::Object(
                view.iter().map(|(name, value)| (name.to_owned(), value.to_json())).collect(),
            ),
            other => serde_json::Value::String(other.repr()),
        }
    }

    /// Whether the value can be invoked.
    #[must_use]
    pub fn is_callable(&self) -> bool {
        matches!(
            self,
            Self::Function(_) | Self::Builtin(_) | Self::Denied(_) | Self::NativeFn(_)
        )
    }

    pub(crate) fn iter_state(&self) -> Result<IterState, Raise> {
        match self {
            Self::List(items) => Ok(IterState::Values {
                items: items.borrow().clone(),
                index: 0,
            }),
            Self::Tuple(items) => Ok(IterState::Values {
                items: items.to_vec(),
                index: 0,
            }),
            Self::Str(s) => Ok(IterState::Values {
                items: s.chars().map(|c| Self::str(c.to_string())).collect(),
                index: 0,
            }),
            Self::Dict(dict) => Ok(IterState::Values {
                items: dict.borrow().keys().map(DictKey::to_value).collect(),
                index: 0,
            }),
            Self::Range { start, stop, step } => Ok(IterState::Range {
                next: *start,
                stop: *stop,
                step: *step,
            }),
            other => Err(Raise::type_error(format!(
                "'{}' object is not iterable",
                other.type_name()
            ))),
        }
    }

    /// Materializes an iterable into a vector of values. Draining an
    /// in-flight iterator consumes its remaining items.
    pub(crate) fn iter_values(&self) -> Result<Vec<Self>, Raise> {
        if let Self::Iter(state) = self {
            let mut values = Vec::new();
            while let Some(value) = state.borrow_mut().next_value() {
                values.push(value);
            }
            return Ok(values);
        }
        let mut state = self.iter_state()?;
        let mut values = Vec::new();
        while let Some(value) = state.next_value() {
            values.push(value);
        }
        Ok(values)
    }

    pub(crate) fn len(&self) -> Result<usize, Raise> {
        match self {
            Self::Str(s) => Ok(s.chars().count()),
            Self::List(items) => Ok(items.borrow().len()),
            Self::Tuple(items) => Ok(items.len()),
            Self::Dict(dict) => Ok(dict.borrow().len()),
            Self::Range { start, stop, step } => {
                if *step == 0 {
                    return Err(Raise::value_error("range() arg 3 must not be zero"));
                }
                let span = if *step > 0 { stop - start } else { start - stop };
                let step = step.abs();
                Ok(usize::try_from((span + step - 1).max(0) / step).unwrap_or(0))
            }
            other => Err(Raise::type_error(format!(
                "object of type '{}' has no len()",
                other.type_name()
            ))),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.repr())
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::str(v)
    }
}

fn cmp_sequences(a: &[Value], b: &[Value]) -> Option<Ordering> {
    for (x, y) in a.iter().zip(b.iter()) {
        if x.py_eq(y) {
            continue;
        }
        return x.py_cmp(y);
    }
    Some(a.len().cmp(&b.len()))
}

/// Shortest round-trip float formatting, with Python spellings for the
/// non-finite values.
#[must_use]
pub(crate) fn format_float(f: f64) -> String {
    if f.is_nan() {
        "nan".to_owned()
    } else if f.is_infinite() {
        if f > 0.0 { "inf".to_owned() } else { "-inf".to_owned() }
    } else {
        ryu::Buffer::new().format(f).to_owned()
    }
}

/// Python-style single-quoted string repr with minimal escaping.
fn string_repr_fmt(s: &str, out: &mut String) {
    out.push('\'');
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\'' => out.push_str("\\'"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c => out.push(c),
        }
    }
    out.push('\'');
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repr_matches_python_spellings() {
        assert_eq!(Value::None.repr(), "None");
        assert_eq!(Value::Bool(true).repr(), "True");
        assert_eq!(Value::Float(1.5).repr(), "1.5");
        assert_eq!(Value::Float(2.0).repr(), "2.0");
        assert_eq!(Value::str("a'b\n").repr(), "'a\\'b\\n'");
        let list = Value::list(vec![Value::Int(1), Value::str("x")]);
        assert_eq!(list.repr(), "[1, 'x']");
    }

    #[test]
    fn numeric_equality_crosses_int_and_float() {
        assert!(Value::Int(2).py_eq(&Value::Float(2.0)));
        assert!(Value::Bool(true).py_eq(&Value::Int(1)));
        assert!(!Value::Int(2).py_eq(&Value::str("2")));
    }

    #[test]
    fn range_len_handles_steps() {
        let r = Value::Range { start: 0, stop: 10, step: 3 };
        assert_eq!(r.len().unwrap(), 4);
        let r = Value::Range { start: 10, stop: 0, step: -2 };
        assert_eq!(r.len().unwrap(), 5);
        let r = Value::Range { start: 5, stop: 5, step: 1 };
        assert_eq!(r.len().unwrap(), 0);
    }

    #[test]
    fn attr_view_requires_string_keys() {
        let mut dict = Dict::new();
        dict.insert(DictKey::str("inc"), Value::Int(1));
        assert!(AttrView::from_dict(&dict).is_some());
        dict.insert(DictKey::Int(3), Value::Int(2));
        assert!(AttrView::from_dict(&dict).is_none());
    }
}
