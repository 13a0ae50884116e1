use firscript::{CallArgs, ErrorKind, Importer, Namespace, NamespaceRegistry, Raise, RunResult, Value};

/// Counts how often scripts call `counter.bump()`, to observe how many times
/// an imported script's top level actually executes.
#[derive(Debug, Default)]
struct CounterNamespace {
    count: i64,
}

impl Namespace for CounterNamespace {
    fn label(&self) -> &'static str {
        "counter"
    }

    fn call(&mut self, method: &str, _args: CallArgs) -> RunResult<Value> {
        match method {
            "bump" => {
                self.count += 1;
                Ok(Value::Int(self.count))
            }
            other => Err(Raise::attribute_error(format!("'counter' object has no attribute '{other}'")).into()),
        }
    }
}

fn importer() -> Importer {
    Importer::new(NamespaceRegistry::new())
}

#[test]
fn library_imports_resolve_to_the_export_value() {
    let imp = importer();
    imp.add_script("util", "export = {\"add\": lambda a, b: a + b}\n")
        .expect("util parses");
    imp.add_main_script(
        "main",
        "def setup():\n    global u\n    u = import_script(\"util\")\n\ndef process():\n    return u.add(2, 3)\n",
    )
    .expect("main parses");

    let mut ctx = imp.build_main_script().expect("main builds");
    ctx.run_setup().expect("setup resolves the import");
    let result = ctx.run_process().expect("process runs");
    assert!(result.py_eq(&Value::Int(5)), "got {result:?}");
}

#[test]
fn imports_are_memoized_across_setup_and_process() {
    let mut registry = NamespaceRegistry::new();
    registry.register_namespace("counter", CounterNamespace::default());
    let imp = Importer::new(registry);

    imp.add_script("lib", "counter.bump()\nexport = {\"x\": 1}\n")
        .expect("lib parses");
    imp.add_main_script(
        "main",
        concat!(
            "def setup():\n",
            "    global a, b\n",
            "    a = import_script(\"lib\")\n",
            "    b = import_script(\"lib\")\n",
            "\n",
            "def process():\n",
            "    c = import_script(\"lib\")\n",
            "    return c.x\n",
        ),
    )
    .expect("main parses");

    let mut ctx = imp.build_main_script().expect("main builds");
    ctx.run_setup().expect("setup runs");
    let first = ctx.run_process().expect("first bar");
    let second = ctx.run_process().expect("second bar");
    assert!(first.py_eq(&Value::Int(1)) && second.py_eq(&Value::Int(1)));

    let handle = match imp.registry().get("counter") {
        Some(Value::Namespace(handle)) => handle.clone(),
        other => panic!("expected counter namespace, got {other:?}"),
    };
    let counter = handle.downcast_mut::<CounterNamespace>().expect("downcast");
    assert_eq!(counter.count, 1, "library top level must execute exactly once");
}

#[test]
fn mutual_imports_raise_a_circular_import_error() {
    let imp = importer();
    imp.add_main_script(
        "a",
        "def setup():\n    global other\n    other = import_script(\"b\")\n\ndef process():\n    pass\n",
    )
    .expect("a parses");
    imp.add_script(
        "b",
        "def setup():\n    global other\n    other = import_script(\"a\")\n\ndef process():\n    pass\n",
    )
    .expect("b parses");

    let mut ctx = imp.build_main_script().expect("a compiles");
    let err = ctx.run_setup().expect_err("cycle detected");
    assert_eq!(err.kind(), ErrorKind::CircularImport);
    assert!(
        err.message().contains("'a'") && err.message().contains("'b'"),
        "cycle error should name both scripts, got: {}",
        err.message()
    );
}

#[test]
fn unknown_imports_raise_script_not_found() {
    let imp = importer();
    imp.add_main_script(
        "main",
        "def setup():\n    global x\n    x = import_script(\"nope\")\n\ndef process():\n    pass\n",
    )
    .expect("main parses");

    let mut ctx = imp.build_main_script().expect("main builds");
    let err = ctx.run_setup().expect_err("missing script");
    assert_eq!(err.kind(), ErrorKind::ScriptNotFound);
    assert!(err.message().contains("nope"), "got: {}", err.message());
}

#[test]
fn build_requires_a_designated_main_script() {
    let imp = importer();
    imp.add_script("one", "export = 1\n").expect("one parses");
    imp.add_script("two", "export = 2\n").expect("two parses");
    let err = imp.build_main_script().expect_err("ambiguous main");
    assert_eq!(err.kind(), ErrorKind::EntrypointNotFound);
}

#[test]
fn a_sole_script_becomes_the_main_script() {
    let imp = importer();
    imp.add_script(
        "only",
        "def setup():\n    pass\n\ndef process():\n    return 9\n",
    )
    .expect("only parses");
    let mut ctx = imp.build_main_script().expect("sole script is the main");
    let result = ctx.run_process().expect("process runs");
    assert!(result.py_eq(&Value::Int(9)));
}

#[test]
fn imported_indicators_resolve_to_a_driveable_handle() {
    let imp = importer();
    imp.add_script(
        "ind",
        "def setup():\n    global base\n    base = 2\n\ndef process():\n    return base + 1\n",
    )
    .expect("ind parses");
    imp.add_main_script(
        "main",
        "def setup():\n    global h\n    h = import_script(\"ind\")\n\ndef process():\n    return h.run_process()\n",
    )
    .expect("main parses");

    let mut ctx = imp.build_main_script().expect("main builds");
    ctx.run_setup().expect("setup imports the indicator and runs its setup");
    let result = ctx.run_process().expect("process drives the handle");
    assert!(result.py_eq(&Value::Int(3)), "got {result:?}");
}

#[test]
fn driver_can_resolve_imports_directly() {
    let imp = importer();
    imp.add_script("util", "export = {\"n\": 41}\n").expect("util parses");
    let value = imp.import_script("util").expect("resolves");
    let Value::Attrs(view) = value else { panic!("expected wrapped export") };
    assert!(view.get("n").unwrap().py_eq(&Value::Int(41)));
}
