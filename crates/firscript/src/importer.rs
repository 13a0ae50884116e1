use std::{
    cell::{Ref, RefCell, RefMut},
    rc::Rc,
};

use ahash::AHashMap;
use indexmap::IndexMap;

use crate::{
    analyze::IMPORT_SCRIPT,
    context::ExecutionContext,
    error::{Raise, RunError, ScriptError, ScriptResult},
    registry::NamespaceRegistry,
    script::{Script, ScriptKind, ScriptParser},
    value::{CallArgs, Value},
};

/// A pool of named scripts plus the machinery that resolves
/// `import_script(name)` lazily from inside running scripts.
///
/// The importer parses each added script, designates one main script, builds
/// a driveable [`ExecutionContext`] for it, and memoizes the value of every
/// import it resolves. An explicit in-resolution stack makes cycles an
/// immediate, typed error.
///
/// State lives behind `Rc<RefCell<…>>` because the `import_script`
/// capability injected into script scopes must re-enter the importer while a
/// script is executing; no borrow is held across a nested compile or setup.
#[derive(Debug)]
pub struct Importer {
    state: Rc<RefCell<ImporterState>>,
}

#[derive(Debug)]
struct ImporterState {
    parser: ScriptParser,
    registry: NamespaceRegistry,
    scripts: IndexMap<String, Script>,
    main_name: Option<String>,
    /// Names currently being resolved, outermost first. A name re-entering
    /// the stack is a circular import.
    import_stack: Vec<String>,
    /// Memoized import results; a script's top level runs at most once per
    /// driver run.
    resolved: AHashMap<String, Value>,
}

impl Importer {
    #[must_use]
    pub fn new(registry: NamespaceRegistry) -> Self {
        Self {
            state: Rc::new(RefCell::new(ImporterState {
                parser: ScriptParser::new(),
                registry,
                scripts: IndexMap::new(),
                main_name: None,
                import_stack: Vec::new(),
                resolved: AHashMap::new(),
            })),
        }
    }

    /// Shared view of the registry, e.g. to inspect defaults.
    #[must_use]
    pub fn registry(&self) -> Ref<'_, NamespaceRegistry> {
        Ref::map(self.state.borrow(), |state| &state.registry)
    }

    /// Mutable view of the registry, to inject custom namespaces after
    /// construction. Must not be held across an engine call.
    #[must_use]
    pub fn registry_mut(&self) -> RefMut<'_, NamespaceRegistry> {
        RefMut::map(self.state.borrow_mut(), |state| &mut state.registry)
    }

    /// Parses `source` and stores it under `name`.
    pub fn add_script(&self, name: &str, source: &str) -> ScriptResult<()> {
        self.add_script_with_kind(name, source, None, false)
    }

    /// Parses `source`, stores it under `name`, and marks it as the main
    /// script.
    pub fn add_main_script(&self, name: &str, source: &str) -> ScriptResult<()> {
        self.add_script_with_kind(name, source, None, true)
    }

    /// Parses and stores a script, optionally checking it against an
    /// expected kind and/or marking it as the main script.
    pub fn add_script_with_kind(
        &self,
        name: &str,
        source: &str,
        kind: Option<ScriptKind>,
        is_main: bool,
    ) -> ScriptResult<()> {
        let script = {
            let state = self.state.borrow();
            state.parser.parse(source, name, kind)?
        };
        self.add_parsed_script(script, is_main);
        Ok(())
    }

    /// Stores a prebuilt [`Script`] under its own id.
    pub fn add_parsed_script(&self, script: Script, is_main: bool) {
        let mut state = self.state.borrow_mut();
        let name = script.id().to_owned();
        state.scripts.insert(name.clone(), script);
        if is_main {
            state.main_name = Some(name);
        }
    }

    /// Marks a previously added script as the main script.
    pub fn set_main_script(&self, name: &str) {
        self.state.borrow_mut().main_name = Some(name.to_owned());
    }

    /// The designated main script name, falling back to the sole registered
    /// script when none was marked.
    fn resolve_main_name(&self) -> ScriptResult<String> {
        let state = self.state.borrow();
        if let Some(name) = &state.main_name {
            return Ok(name.clone());
        }
        if state.scripts.len() == 1 {
            return Ok(state.scripts.keys().next().expect("one script").clone());
        }
        Err(ScriptError::entrypoint_not_found())
    }

    /// Builds and compiles the execution context of the main script.
    ///
    /// The context's namespace bundle is a fresh [`NamespaceRegistry::build`]
    /// mapping plus exactly one non-namespace entry: the `import_script`
    /// capability bound to this importer.
    pub fn build_main_script(&self) -> ScriptResult<ExecutionContext> {
        let main_name = self.resolve_main_name()?;
        let (source, bundle) = {
            let state = self.state.borrow();
            let script = state
                .scripts
                .get(&main_name)
                .ok_or_else(|| ScriptError::entrypoint_not_found())?;
            (script.source().to_owned(), state.registry.build())
        };
        let mut ctx = ExecutionContext::new(source, bundle, &main_name);
        self.install_capability(&mut ctx);
        ctx.compile()?;
        Ok(ctx)
    }

    /// Resolves a named script to its import value.
    ///
    /// Libraries resolve to their (wrapped) `export`; indicators and
    /// strategies are compiled, have `setup()` run once, and resolve to a
    /// handle on their own execution context. Results are memoized, so a
    /// script's top level executes at most once per run.
    pub fn import_script(&self, name: &str) -> ScriptResult<Value> {
        import_script_impl(&self.state, name)
    }

    fn install_capability(&self, ctx: &mut ExecutionContext) {
        install_capability(&self.state, ctx);
    }
}

/// Adds the `import_script` entry to a context's bundle. This happens after
/// registry build, so the capability is never confused with a namespace.
fn install_capability(state: &Rc<RefCell<ImporterState>>, ctx: &mut ExecutionContext) {
    let capability = capability_value(state);
    ctx.add_bundle_entry(IMPORT_SCRIPT, capability);
}

fn capability_value(state: &Rc<RefCell<ImporterState>>) -> Value {
    let state = Rc::clone(state);
    Value::native(IMPORT_SCRIPT, move |args: CallArgs| {
        args.no_kwargs(IMPORT_SCRIPT)?;
        args.expect_len(IMPORT_SCRIPT, 1)?;
        let Value::Str(name) = &args.pos[0] else {
            return Err(Raise::type_error(format!(
                "{IMPORT_SCRIPT}() argument must be a script name string, not '{}'",
                args.pos[0].type_name()
            ))
            .into());
        };
        import_script_impl(&state, name).map_err(RunError::from)
    })
}

fn import_script_impl(state: &Rc<RefCell<ImporterState>>, name: &str) -> ScriptResult<Value> {
    if let Some(value) = state.borrow().resolved.get(name) {
        return Ok(value.clone());
    }

    {
        let mut st = state.borrow_mut();
        if st.import_stack.iter().any(|entry| entry == name) {
            let current = current_script_name(&st);
            return Err(ScriptError::circular_import(&current, name));
        }
        if !st.scripts.contains_key(name) {
            let current = current_script_name(&st);
            return Err(ScriptError::script_not_found(&current, name));
        }
        st.import_stack.push(name.to_owned());
    }

    // The stack entry must be popped on success and failure alike, and no
    // borrow may be held while the imported script compiles or runs (it may
    // call import_script itself).
    let result = resolve_script(state, name);
    state.borrow_mut().import_stack.pop();
    let value = result?;
    state.borrow_mut().resolved.insert(name.to_owned(), value.clone());
    Ok(value)
}

fn resolve_script(state: &Rc<RefCell<ImporterState>>, name: &str) -> ScriptResult<Value> {
    let (source, kind, bundle) = {
        let st = state.borrow();
        let script = st.scripts.get(name).expect("checked by import_script_impl");
        (script.source().to_owned(), script.kind(), st.registry.build())
    };
    let mut ctx = ExecutionContext::new(source, bundle, name);
    install_capability(state, &mut ctx);
    ctx.compile()?;
    match kind {
        ScriptKind::Library => Ok(ctx.get_export().unwrap_or(Value::None)),
        ScriptKind::Indicator | ScriptKind::Strategy => {
            ctx.run_setup()?;
            Ok(Value::Script(Rc::new(RefCell::new(ctx))))
        }
    }
}

/// The script whose resolution (or whose execution) triggered the current
/// call: top of the import stack, else the main script.
fn current_script_name(state: &ImporterState) -> String {
    state
        .import_stack
        .last()
        .cloned()
        .or_else(|| state.main_name.clone())
        .unwrap_or_else(|| "<main>".to_owned())
}
