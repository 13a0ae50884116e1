use firscript::{ErrorKind, ExecutionContext, Value};
use indexmap::IndexMap;

fn context(source: &str) -> ExecutionContext {
    ExecutionContext::new(source, IndexMap::new(), "main")
}

#[test]
fn filesystem_access_raises_not_allowed_at_the_call_site() {
    let source = "def setup():\n    open(\"/etc/passwd\")\n";
    let mut ctx = context(source);
    ctx.compile().expect("compiles");
    let err = ctx.run_setup().expect_err("open is denied");
    assert_eq!(err.kind(), ErrorKind::NotAllowed);
    assert_eq!(err.line_no(), Some(2));
    assert!(err.message().contains("open"), "got: {}", err.message());
}

#[test]
fn denied_calls_abort_before_later_side_effects() {
    let source = concat!(
        "def setup():\n",
        "    global trace\n",
        "    trace = []\n",
        "    eval(\"1 + 1\")\n",
        "    trace.append(1)\n",
    );
    let mut ctx = context(source);
    ctx.compile().expect("compiles");
    let err = ctx.run_setup().expect_err("eval is denied");
    assert_eq!(err.kind(), ErrorKind::NotAllowed);
    let trace = ctx.global("trace").expect("trace was bound before the denied call");
    assert_eq!(trace.len().unwrap(), 0, "statements after the denied call must not run");
}

#[test]
fn every_deny_listed_primitive_raises() {
    let calls = [
        "eval(\"1\")",
        "exec(\"1\")",
        "compile(\"1\")",
        "open(\"f\")",
        "input(\"? \")",
        "__import__(\"os\")",
        "getattr(1, \"real\")",
        "setattr(1, \"real\", 2)",
        "delattr(1, \"real\")",
        "vars()",
        "globals()",
        "locals()",
        "breakpoint()",
    ];
    for call in calls {
        let source = format!("def setup():\n    {call}\n");
        let mut ctx = context(&source);
        ctx.compile().expect("compiles");
        let err = ctx.run_setup().expect_err("denied builtin");
        assert_eq!(err.kind(), ErrorKind::NotAllowed, "{call} should be denied");
        assert_eq!(err.line_no(), Some(2), "{call} should fail at its call site");
    }
}

#[test]
fn deny_shims_are_values_until_called() {
    // Referencing a denied name is harmless; only invocation raises.
    let source = "def setup():\n    global f\n    f = open\n";
    let mut ctx = context(source);
    ctx.compile().expect("compiles");
    ctx.run_setup().expect("referencing the shim is fine");
    let shim = ctx.global("f").expect("bound");
    assert!(matches!(shim, Value::Denied(_)));
}

#[test]
fn namespaces_override_builtins_on_name_collision() {
    let mut namespaces = IndexMap::new();
    namespaces.insert("open".to_owned(), Value::Int(7));
    let mut ctx = ExecutionContext::new("export = open\n", namespaces, "main");
    ctx.compile().expect("compiles");
    let export = ctx.get_export().expect("export bound");
    assert!(export.py_eq(&Value::Int(7)), "namespace entry must win, got {export:?}");
}
