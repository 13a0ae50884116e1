use indexmap::IndexMap;

use crate::{
    error::{Raise, RunResult},
    namespace::Namespace,
    value::{CallArgs, Dict, DictKey, Value},
};

/// One recorded input declaration.
#[derive(Debug, Clone)]
struct InputDecl {
    type_name: &'static str,
    default: Value,
    value: Value,
}

/// The `input` namespace: declared, overridable script parameters.
///
/// `input.int("length", 14)` returns the driver-supplied override when one
/// exists, the declared default otherwise, and records the declaration so
/// the driver can enumerate it through `generate_metadata()`. The validator
/// guarantees these calls only ever run inside `setup()`.
#[derive(Debug)]
pub struct InputNamespace {
    overrides: IndexMap<String, Value>,
    declared: IndexMap<String, InputDecl>,
}

impl InputNamespace {
    #[must_use]
    pub fn new(overrides: IndexMap<String, Value>) -> Self {
        Self {
            overrides,
            declared: IndexMap::new(),
        }
    }

    fn declare(&mut self, type_name: &'static str, args: &CallArgs) -> RunResult<Value> {
        if args.pos.is_empty() || args.pos.len() > 2 {
            return Err(Raise::type_error(format!("input.{type_name}() takes a name and an optional default")).into());
        }
        let Value::Str(name) = &args.pos[0] else {
            return Err(Raise::type_error(format!(
                "input.{type_name}() name must be a string, not '{}'",
                args.pos[0].type_name()
            ))
            .into());
        };
        let default = args
            .pos
            .get(1)
            .or_else(|| args.kwarg("default"))
            .cloned()
            .unwrap_or(Value::None);
        let value = self.overrides.get(&**name).cloned().unwrap_or_else(|| default.clone());
        self.declared.insert(
            name.to_string(),
            InputDecl {
                type_name,
                default,
                value: value.clone(),
            },
        );
        Ok(value)
    }
}

impl Namespace for InputNamespace {
    fn label(&self) -> &'static str {
        "input"
    }

    fn call(&mut self, method: &str, args: CallArgs) -> RunResult<Value> {
        match method {
            "int" => self.declare("int", &args),
            "float" => self.declare("float", &args),
            "bool" => self.declare("bool", &args),
            "text" => self.declare("text", &args),
            "source" => self.declare("source", &args),
            other => Err(Raise::attribute_error(format!("'input' object has no attribute '{other}'")).into()),
        }
    }

    fn generate_metadata(&self) -> Option<Value> {
        if self.declared.is_empty() {
            return None;
        }
        let mut out = Dict::with_capacity(self.declared.len());
        for (name, decl) in &self.declared {
            let mut entry = Dict::with_capacity(3);
            entry.insert(DictKey::str("type"), Value::str(decl.type_name));
            entry.insert(DictKey::str("default"), decl.default.clone());
            entry.insert(DictKey::str("value"), decl.value.clone());
            out.insert(DictKey::str(name.as_str()), Value::dict(entry));
        }
        Some(Value::dict(out))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn override_wins_over_default() {
        let mut overrides = IndexMap::new();
        overrides.insert("length".to_owned(), Value::Int(21));
        let mut input = InputNamespace::new(overrides);
        let value = input
            .call("int", CallArgs::positional([Value::str("length"), Value::Int(14)]))
            .unwrap();
        assert!(value.py_eq(&Value::Int(21)));
        let metadata = input.generate_metadata().expect("metadata");
        let Value::Dict(dict) = metadata else { panic!("expected dict") };
        let entry = dict.borrow().get(&DictKey::str("length")).cloned().expect("entry");
        let Value::Dict(entry) = entry else { panic!("expected dict entry") };
        assert!(entry.borrow().get(&DictKey::str("default")).unwrap().py_eq(&Value::Int(14)));
    }
}
