use std::{cell::RefCell, rc::Rc};

use indexmap::IndexMap;

use crate::{
    builtins::install_builtins,
    error::{ErrorKind, ExcKind, RunError, ScriptError, ScriptOrigin, ScriptResult},
    eval::Evaluator,
    expressions::Node,
    io::{PrintHandle, PrintWriter, StdPrint},
    namespace::NamespaceHandle,
    parse::parse_program,
    registry::NamespaceRegistry,
    value::{AttrView, CallArgs, Globals, Value, Vars},
};

use crate::analyze::{EXPORT_NAME, PROCESS_FN, SETUP_FN};

/// A prepared, restricted scope for one script, plus the operations the
/// driver (or the importer) performs against it.
///
/// The context owns a single globals table that is also the module-level
/// locals table: top-level assignments land in it, and functions declared
/// with `global` write back into it, so state set up in `setup()` persists
/// across every later `process()` call.
pub struct ExecutionContext {
    source: String,
    display_name: String,
    origin: Rc<ScriptOrigin>,
    namespaces: IndexMap<String, Value>,
    globals: Globals,
    program: Option<Vec<Node>>,
    print: PrintHandle,
}

impl std::fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("display_name", &self.display_name)
            .field("compiled", &self.program.is_some())
            .finish_non_exhaustive()
    }
}

impl ExecutionContext {
    /// Creates a context over `source` with a namespace bundle, typically
    /// obtained from [`NamespaceRegistry::build`].
    ///
    /// `display_name` identifies the script in every error the context
    /// produces.
    #[must_use]
    pub fn new(source: impl Into<String>, namespaces: IndexMap<String, Value>, display_name: impl Into<String>) -> Self {
        let source = source.into();
        let display_name = display_name.into();
        let origin = ScriptOrigin::new(display_name.clone(), &source);
        Self {
            source,
            display_name,
            origin,
            namespaces,
            globals: Rc::new(RefCell::new(Vars::default())),
            program: None,
            print: Rc::new(RefCell::new(StdPrint)),
        }
    }

    #[must_use]
    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    /// The namespace bundle this context was built with.
    #[must_use]
    pub fn namespaces(&self) -> &IndexMap<String, Value> {
        &self.namespaces
    }

    /// One namespace entry, e.g. `ctx.namespace("data")`.
    #[must_use]
    pub fn namespace(&self, name: &str) -> Option<&Value> {
        self.namespaces.get(name)
    }

    /// The handle of a namespace entry, for driver-side downcasting.
    #[must_use]
    pub fn namespace_handle(&self, name: &str) -> Option<&NamespaceHandle> {
        match self.namespaces.get(name) {
            Some(Value::Namespace(handle)) => Some(handle),
            _ => None,
        }
    }

    /// Adds one extra entry to the namespace bundle prior to compilation.
    ///
    /// The importer uses this to inject the `import_script` capability; the
    /// entry is merged into the script scope exactly like a namespace.
    pub fn add_bundle_entry(&mut self, name: impl Into<String>, value: Value) {
        self.namespaces.insert(name.into(), value);
    }

    /// Redirects `print()` output, e.g. to [`crate::CollectStringPrint`] in
    /// tests.
    pub fn set_print_writer(&mut self, writer: impl PrintWriter + 'static) {
        self.print = Rc::new(RefCell::new(writer));
    }

    /// Compiles the source and executes its top level once.
    ///
    /// The prepared scope starts from the restricted builtin set (allow-list
    /// plus deny shims), then the namespace bundle is merged in, namespaces
    /// winning on collisions. Top-level `def`s and bindings (including a
    /// library's `export`) are live in the globals table afterwards.
    pub fn compile(&mut self) -> ScriptResult<()> {
        let program = parse_program(&self.source).map_err(|failure| {
            let line_str = self.origin.line_text(failure.loc.line);
            ScriptError::runtime(
                ErrorKind::Compilation,
                &self.display_name,
                failure.message,
                Some(failure.loc),
                line_str,
            )
        })?;

        let mut vars = Vars::default();
        install_builtins(&mut vars);
        for (name, value) in &self.namespaces {
            vars.insert(Rc::from(name.as_str()), value.clone());
        }
        self.globals = Rc::new(RefCell::new(vars));

        let mut evaluator = Evaluator::new(Rc::clone(&self.origin), Rc::clone(&self.print));
        evaluator
            .exec_module(&program, &self.globals)
            .map_err(|err| self.translate(err))?;
        self.program = Some(program);
        Ok(())
    }

    /// Invokes the top-level `setup()` function, if the script defines one.
    pub fn run_setup(&mut self) -> ScriptResult<()> {
        self.invoke_global(SETUP_FN).map(|_| ())
    }

    /// Invokes the top-level `process()` function, if the script defines
    /// one, returning its return value.
    pub fn run_process(&mut self) -> ScriptResult<Value> {
        self.invoke_global(PROCESS_FN)
    }

    fn invoke_global(&mut self, name: &str) -> ScriptResult<Value> {
        if self.program.is_none() {
            return Err(ScriptError::runtime(
                ErrorKind::ScriptRuntime,
                &self.display_name,
                format!("cannot call {name}() before compile()"),
                None,
                None,
            ));
        }
        let callable = match self.globals.borrow().get(name) {
            Some(value) if value.is_callable() => value.clone(),
            _ => return Ok(Value::None),
        };
        self.call(&callable, Vec::new())
    }

    /// Calls a callable script value (e.g. a function from an export) with
    /// positional arguments.
    pub fn call(&mut self, callable: &Value, args: Vec<Value>) -> ScriptResult<Value> {
        let mut evaluator = Evaluator::new(Rc::clone(&self.origin), Rc::clone(&self.print));
        evaluator
            .call_value(callable, CallArgs::positional(args))
            .map_err(|err| self.translate(err))
    }

    /// The top-level binding named `export`, or `None`.
    ///
    /// A plain string-keyed dict is wrapped into a dot-accessible view (one
    /// level deep); any other value is returned unchanged.
    #[must_use]
    pub fn get_export(&self) -> Option<Value> {
        let export = self.globals.borrow().get(EXPORT_NAME).cloned()?;
        if let Value::Dict(dict) = &export
            && let Some(view) = AttrView::from_dict(&dict.borrow())
        {
            return Some(Value::Attrs(Rc::new(view)));
        }
        Some(export)
    }

    /// Collects `generate_output()` contributions from the bundled
    /// namespaces.
    #[must_use]
    pub fn generate_outputs(&self) -> IndexMap<String, Value> {
        NamespaceRegistry::generate_outputs(&self.namespaces)
    }

    /// Collects `generate_metadata()` contributions from the bundled
    /// namespaces.
    #[must_use]
    pub fn generate_metadatas(&self) -> IndexMap<String, Value> {
        NamespaceRegistry::generate_metadatas(&self.namespaces)
    }

    /// Reads a global binding, mainly for tests and tooling.
    #[must_use]
    pub fn global(&self, name: &str) -> Option<Value> {
        self.globals.borrow().get(name).cloned()
    }

    /// Translates an evaluator failure into the public error type, applying
    /// the location policy: report the deepest frame raised in this script,
    /// falling back to the outermost frame of the chain.
    fn translate(&self, err: RunError) -> ScriptError {
        match err {
            RunError::Engine(inner) => *inner,
            RunError::Raise(raise) => {
                let kind = if raise.kind == ExcKind::NotAllowed {
                    ErrorKind::NotAllowed
                } else {
                    ErrorKind::ScriptRuntime
                };
                let message = if raise.kind == ExcKind::NotAllowed {
                    raise.message.to_string()
                } else {
                    raise.to_string()
                };
                let (loc, line_str) = match raise.reporting_frame(&self.display_name) {
                    Some(frame) => (Some(frame.loc), frame.origin.line_text(frame.loc.line)),
                    None => (None, None),
                };
                ScriptError::runtime(kind, &self.display_name, message, loc, line_str)
            }
        }
    }
}
