use indexmap::IndexMap;

use crate::{
    namespace::{Namespace, NamespaceHandle, SharedDict},
    namespaces,
    value::Value,
};

/// Mapping from namespace name to the value installed under it, plus the
/// `shared` dictionary handed to every namespace the registry constructs.
///
/// The registry is agnostic to namespace semantics; only names and the
/// optional `generate_output()` / `generate_metadata()` protocol matter.
#[derive(Debug, Default)]
pub struct NamespaceRegistry {
    entries: IndexMap<String, Value>,
    shared: SharedDict,
}

impl NamespaceRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The registry-owned shared dictionary. Namespaces constructed by
    /// [`register_defaults`](Self::register_defaults) all hold a handle to
    /// this same map.
    #[must_use]
    pub fn shared(&self) -> &SharedDict {
        &self.shared
    }

    /// Installs (or replaces) a namespace value under `name`.
    ///
    /// The value is usually a [`Namespace`] object handle but may be any
    /// callable or plain value; registration never fails and later
    /// registrations override earlier ones.
    pub fn register(&mut self, name: impl Into<String>, value: Value) {
        self.entries.insert(name.into(), value);
    }

    /// Convenience wrapper for registering a [`Namespace`] implementation.
    pub fn register_namespace(&mut self, name: impl Into<String>, namespace: impl Namespace) {
        self.register(name, Value::Namespace(NamespaceHandle::new(namespace)));
    }

    /// Installs the canonical default namespaces (`ta`, `input`, `chart`,
    /// `color`, `strategy`, `data`, `log`).
    ///
    /// `input_overrides` supplies driver-side values for declared inputs;
    /// `column_mapping` remaps the well-known bar columns onto the driver's
    /// column names.
    pub fn register_defaults(
        &mut self,
        input_overrides: IndexMap<String, Value>,
        column_mapping: IndexMap<String, String>,
    ) {
        namespaces::register_defaults(self, input_overrides, column_mapping);
    }

    /// Retrieves one namespace, or `None` when nothing is registered under
    /// the name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.entries.get(name)
    }

    /// Returns a fresh shallow copy of the namespace mapping for use as an
    /// execution context's bundle.
    #[must_use]
    pub fn build(&self) -> IndexMap<String, Value> {
        self.entries.clone()
    }

    /// Collects non-null `generate_output()` results from a namespace
    /// bundle, keyed by namespace name.
    #[must_use]
    pub fn generate_outputs(namespaces: &IndexMap<String, Value>) -> IndexMap<String, Value> {
        let mut outputs = IndexMap::new();
        for (name, value) in namespaces {
            if let Value::Namespace(handle) = value
                && let Some(output) = handle.generate_output()
            {
                outputs.insert(name.clone(), output);
            }
        }
        outputs
    }

    /// Collects non-null `generate_metadata()` results from a namespace
    /// bundle, keyed by namespace name.
    #[must_use]
    pub fn generate_metadatas(namespaces: &IndexMap<String, Value>) -> IndexMap<String, Value> {
        let mut metadatas = IndexMap::new();
        for (name, value) in namespaces {
            if let Value::Namespace(handle) = value
                && let Some(metadata) = handle.generate_metadata()
            {
                metadatas.insert(name.clone(), metadata);
            }
        }
        metadatas
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RunResult;
    use crate::value::CallArgs;

    #[derive(Debug)]
    struct Probe;

    impl Namespace for Probe {
        fn label(&self) -> &'static str {
            "probe"
        }

        fn call(&mut self, _method: &str, _args: CallArgs) -> RunResult<Value> {
            Ok(Value::None)
        }

        fn generate_output(&self) -> Option<Value> {
            Some(Value::Int(7))
        }
    }

    #[test]
    fn later_registration_overrides_earlier() {
        let mut registry = NamespaceRegistry::new();
        registry.register_defaults(IndexMap::new(), IndexMap::new());
        registry.register_namespace("ta", Probe);
        let bundle = registry.build();
        match bundle.get("ta") {
            Some(Value::Namespace(handle)) => assert_eq!(handle.label(), "probe"),
            other => panic!("expected probe namespace, got {other:?}"),
        }
    }

    #[test]
    fn outputs_skip_namespaces_without_the_hook() {
        let mut registry = NamespaceRegistry::new();
        registry.register_namespace("probe", Probe);
        registry.register("value", Value::Int(3));
        let bundle = registry.build();
        let outputs = NamespaceRegistry::generate_outputs(&bundle);
        assert_eq!(outputs.len(), 1);
        assert!(outputs.get("probe").is_some_and(|v| v.py_eq(&Value::Int(7))));
    }
}
