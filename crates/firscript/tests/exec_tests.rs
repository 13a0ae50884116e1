use std::{cell::RefCell, rc::Rc};

use firscript::{ErrorKind, ExecutionContext, NamespaceRegistry, PrintWriter, Value};
use indexmap::IndexMap;

fn context(source: &str) -> ExecutionContext {
    ExecutionContext::new(source, IndexMap::new(), "main")
}

#[test]
fn library_export_functions_are_callable_from_the_driver() {
    let source = "def f(x):\n    return x + 1\nexport = {\"inc\": f}\n";
    let mut ctx = context(source);
    ctx.compile().expect("compiles");
    let export = ctx.get_export().expect("export bound");
    let Value::Attrs(view) = &export else {
        panic!("expected dot-accessible export, got {export:?}");
    };
    let inc = view.get("inc").expect("inc entry").clone();
    let result = ctx.call(&inc, vec![Value::Int(41)]).expect("call succeeds");
    assert!(result.py_eq(&Value::Int(42)), "got {result:?}");
}

#[test]
fn export_view_supports_every_string_key() {
    let source = "export = {\"a\": 1, \"b\": \"two\", \"c\": [3]}\n";
    let mut ctx = context(source);
    ctx.compile().expect("compiles");
    let Some(Value::Attrs(view)) = ctx.get_export() else {
        panic!("expected wrapped export");
    };
    assert!(view.get("a").unwrap().py_eq(&Value::Int(1)));
    assert!(view.get("b").unwrap().py_eq(&Value::str("two")));
    assert!(view.get("c").is_some());
    assert!(view.get("missing").is_none());
}

#[test]
fn non_mapping_exports_are_returned_unchanged() {
    let source = "def f():\n    return 7\nexport = f\n";
    let mut ctx = context(source);
    ctx.compile().expect("compiles");
    let export = ctx.get_export().expect("export bound");
    assert!(matches!(export, Value::Function(_)), "got {export:?}");
    let result = ctx.call(&export, vec![]).expect("callable export");
    assert!(result.py_eq(&Value::Int(7)));
}

#[test]
fn setup_state_is_visible_to_process() {
    let source = "def setup():\n    global counter\n    counter = 10\n\ndef process():\n    global counter\n    counter = counter + 1\n    return counter\n";
    let mut ctx = context(source);
    ctx.compile().expect("compiles");
    ctx.run_setup().expect("setup runs");
    let first = ctx.run_process().expect("process runs");
    assert!(first.py_eq(&Value::Int(11)), "got {first:?}");
    let second = ctx.run_process().expect("process runs again");
    assert!(second.py_eq(&Value::Int(12)), "state persists across bars, got {second:?}");
}

#[test]
fn runtime_errors_carry_the_failing_line() {
    let source = "def setup():\n    pass\n\ndef process():\n    x = 1\n    return x + \"a\"\n";
    let mut ctx = context(source);
    ctx.compile().expect("compiles");
    ctx.run_setup().expect("setup runs");
    let err = ctx.run_process().expect_err("type error");
    assert_eq!(err.kind(), ErrorKind::ScriptRuntime);
    assert_eq!(err.line_no(), Some(6));
    assert_eq!(err.line_str(), Some("    return x + \"a\""));
    assert!(err.message().contains("TypeError"), "got: {}", err.message());
}

#[test]
fn errors_inside_called_functions_report_the_inner_line() {
    let source = "def helper():\n    return unknown_name\n\ndef setup():\n    pass\n\ndef process():\n    return helper()\n";
    let mut ctx = context(source);
    ctx.compile().expect("compiles");
    let err = ctx.run_process().expect_err("name error");
    assert_eq!(err.kind(), ErrorKind::ScriptRuntime);
    assert_eq!(err.line_no(), Some(2), "deepest frame in this script wins");
    assert!(err.message().contains("NameError"), "got: {}", err.message());
}

#[test]
fn syntactic_failures_at_compile_are_compilation_errors() {
    let mut ctx = context("def setup(:\n    pass\n");
    let err = ctx.compile().expect_err("syntax error");
    assert_eq!(err.kind(), ErrorKind::Compilation);
}

#[test]
fn top_level_execution_failures_are_runtime_errors() {
    let mut ctx = context("export = 1 / 0\n");
    let err = ctx.compile().expect_err("division by zero at top level");
    assert_eq!(err.kind(), ErrorKind::ScriptRuntime);
    assert!(err.message().contains("ZeroDivisionError"), "got: {}", err.message());
    assert_eq!(err.line_no(), Some(1));
}

/// Test writer sharing its buffer with the asserting test body.
struct SharedPrint(Rc<RefCell<String>>);

impl PrintWriter for SharedPrint {
    fn write_line(&mut self, line: &str) {
        let mut buffer = self.0.borrow_mut();
        buffer.push_str(line);
        buffer.push('\n');
    }
}

#[test]
fn print_goes_through_the_configured_writer() {
    let source = "def setup():\n    print(\"ready\", 2, sep=\"-\")\n\ndef process():\n    pass\n";
    let buffer = Rc::new(RefCell::new(String::new()));
    let mut ctx = context(source);
    ctx.set_print_writer(SharedPrint(Rc::clone(&buffer)));
    ctx.compile().expect("compiles");
    ctx.run_setup().expect("setup runs");
    assert_eq!(buffer.borrow().as_str(), "ready-2\n");
}

#[test]
fn control_flow_and_builtins_behave_like_python() {
    let source = concat!(
        "def setup():\n",
        "    pass\n",
        "\n",
        "def process():\n",
        "    total = 0\n",
        "    for i in range(5):\n",
        "        if i % 2 == 0:\n",
        "            total += i\n",
        "    values = [3, 1, 2]\n",
        "    ordered = sorted(values)\n",
        "    doubled = map(lambda v: v * 2, ordered)\n",
        "    return [total, ordered[0], sum(doubled), len(values), max(values), min(values)]\n",
    );
    let mut ctx = context(source);
    ctx.compile().expect("compiles");
    let result = ctx.run_process().expect("process runs");
    let expected = Value::list(vec![
        Value::Int(6),
        Value::Int(1),
        Value::Int(12),
        Value::Int(3),
        Value::Int(3),
        Value::Int(1),
    ]);
    assert!(result.py_eq(&expected), "got {result:?}");
}

#[test]
fn floor_division_and_modulo_follow_python_sign_rules() {
    let source = "export = [-7 // 2, -7 % 2, 7 // -2, 7 % -2, 2 ** 10, 7 / 2]\n";
    let mut ctx = context(source);
    ctx.compile().expect("compiles");
    let export = ctx.get_export().expect("export bound");
    let expected = Value::list(vec![
        Value::Int(-4),
        Value::Int(1),
        Value::Int(-4),
        Value::Int(-1),
        Value::Int(1024),
        Value::Float(3.5),
    ]);
    assert!(export.py_eq(&expected), "got {export:?}");
}

#[test]
fn i64_min_literal_is_in_range() {
    let mut ctx = context("export = -9223372036854775808\n");
    ctx.compile().expect("i64::MIN is representable");
    let export = ctx.get_export().expect("export bound");
    assert!(export.py_eq(&Value::Int(i64::MIN)), "got {export:?}");

    // One past the magnitude of i64::MIN is genuinely out of range.
    let mut ctx = context("export = -9223372036854775809\n");
    let err = ctx.compile().expect_err("beyond i64");
    assert_eq!(err.kind(), ErrorKind::Compilation);
    assert!(err.message().contains("out of supported range"), "got: {}", err.message());
}

#[test]
fn overflowing_integer_division_raises_instead_of_panicking() {
    for op in ["//", "%"] {
        let source = format!("x = -9223372036854775807 - 1\nexport = x {op} -1\n");
        let mut ctx = context(&source);
        let err = ctx.compile().expect_err("i64::MIN divided by -1 overflows");
        assert_eq!(err.kind(), ErrorKind::ScriptRuntime, "{op} must raise");
        assert!(err.message().contains("integer overflow"), "got: {}", err.message());
    }
}

#[test]
fn modulo_by_large_divisors_stays_in_range() {
    let source = "export = [9223372036854775806 % 9223372036854775807, -1 % 9223372036854775807]\n";
    let mut ctx = context(source);
    ctx.compile().expect("compiles");
    let export = ctx.get_export().expect("export bound");
    let expected = Value::list(vec![Value::Int(9223372036854775806), Value::Int(9223372036854775806)]);
    assert!(export.py_eq(&expected), "got {export:?}");
}

#[test]
fn fstrings_and_string_methods_work() {
    let source = "name = \"world\"\nexport = f\"hello {name}\".upper()\n";
    let mut ctx = context(source);
    ctx.compile().expect("compiles");
    let export = ctx.get_export().expect("export bound");
    assert!(export.py_eq(&Value::str("HELLO WORLD")), "got {export:?}");
}

#[test]
fn unbound_local_reads_are_reported() {
    let source = "def setup():\n    pass\n\ndef process():\n    y = x + 1\n    x = 2\n    return y\n";
    let mut ctx = context(source);
    ctx.compile().expect("compiles");
    let err = ctx.run_process().expect_err("x is local for the whole body");
    assert!(err.message().contains("UnboundLocalError"), "got: {}", err.message());
}

#[test]
fn outputs_require_generating_namespaces() {
    let mut registry = NamespaceRegistry::new();
    registry.register_defaults(IndexMap::new(), IndexMap::new());
    let mut ctx = ExecutionContext::new("export = 1\n", registry.build(), "main");
    ctx.compile().expect("compiles");
    assert!(ctx.generate_outputs().is_empty(), "nothing plotted or ordered yet");
    assert!(ctx.generate_metadatas().is_empty(), "no inputs declared yet");
}
