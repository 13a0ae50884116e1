use firscript::{ErrorKind, ScriptError, ScriptKind, ScriptParser};

fn parse(source: &str) -> Result<firscript::Script, ScriptError> {
    ScriptParser::new().parse(source, "test", None)
}

fn parse_as(source: &str, kind: ScriptKind) -> Result<firscript::Script, ScriptError> {
    ScriptParser::new().parse(source, "test", Some(kind))
}

const INDICATOR: &str = "def setup():\n    pass\n\ndef process():\n    return ta.sma(data.series(\"close\"), 3)\n";

#[test]
fn indicator_classification() {
    let script = parse(INDICATOR).expect("indicator parses");
    assert_eq!(script.kind(), ScriptKind::Indicator);
}

#[test]
fn one_strategy_call_flips_classification() {
    let source = "def setup():\n    pass\n\ndef process():\n    strategy.long()\n";
    let script = parse(source).expect("strategy parses");
    assert_eq!(script.kind(), ScriptKind::Strategy);
}

#[test]
fn library_classification() {
    let script = parse("export = {\"answer\": 42}\n").expect("library parses");
    assert_eq!(script.kind(), ScriptKind::Library);
    assert!(script.metadata().exports.contains("export"));
}

#[test]
fn syntax_error_carries_location() {
    let err = parse("def setup(:\n    pass\n").expect_err("syntax error");
    assert_eq!(err.kind(), ErrorKind::Parse);
    assert!(err.line().is_some(), "syntax errors should carry a line");
    assert!(err.col().is_some(), "syntax errors should carry a column");
}

#[test]
fn unsupported_constructs_are_parse_errors() {
    let err = parse("class Foo:\n    pass\n").expect_err("classes rejected");
    assert_eq!(err.kind(), ErrorKind::Parse);
    assert!(err.message().contains("class definitions"), "got: {}", err.message());

    let err = parse("import os\n").expect_err("imports rejected");
    assert_eq!(err.kind(), ErrorKind::Parse);
    assert!(err.message().contains("import_script"), "got: {}", err.message());
}

#[test]
fn missing_kind_for_shapeless_script() {
    let err = parse("x = 1\n").expect_err("no classification criteria");
    assert_eq!(err.kind(), ErrorKind::MissingKind);
    assert!(err.line().is_some() && err.col().is_some());
}

#[test]
fn conflicting_kind_when_process_is_missing() {
    let err = parse("def setup():\n    pass\n").expect_err("partial shape");
    assert_eq!(err.kind(), ErrorKind::ConflictingKind);
}

#[test]
fn kind_hint_must_not_contradict_inference() {
    let source = "def setup():\n    pass\n\ndef process():\n    strategy.long()\n";
    let err = parse_as(source, ScriptKind::Indicator).expect_err("hint contradicts strategy use");
    assert_eq!(err.kind(), ErrorKind::ConflictingKind);

    let script = parse_as(source, ScriptKind::Strategy).expect("matching hint accepted");
    assert_eq!(script.kind(), ScriptKind::Strategy);
}

#[test]
fn strategy_hint_without_required_functions() {
    let err = parse_as("x = 1\n", ScriptKind::Strategy).expect_err("no setup/process");
    assert_eq!(err.kind(), ErrorKind::MissingRequiredFunctions);

    let err = parse_as("export = 1\n", ScriptKind::Strategy).expect_err("classifies as a library");
    assert_eq!(err.kind(), ErrorKind::ConflictingKind);
}

#[test]
fn library_hint_with_setup_is_conflicting() {
    let err = parse_as("def setup():\n    pass\n", ScriptKind::Library).expect_err("library with setup");
    assert_eq!(err.kind(), ErrorKind::ConflictingKind);
}

#[test]
fn library_without_export_has_no_exports() {
    let err = parse_as("x = 1\n", ScriptKind::Library).expect_err("no export binding");
    assert_eq!(err.kind(), ErrorKind::NoExports);
}

#[test]
fn library_with_two_exports_is_rejected() {
    let err = parse("export = 1\nexport = 2\n").expect_err("double export");
    assert_eq!(err.kind(), ErrorKind::MultipleExports);
    assert_eq!(err.line(), Some(2));
}

#[test]
fn input_calls_outside_setup_are_rejected() {
    let source = "def setup():\n    pass\n\ndef process():\n    n = input.int(\"n\", 14)\n    return n\n";
    let err = parse(source).expect_err("input in process");
    assert_eq!(err.kind(), ErrorKind::InvalidInputUsage);
    assert_eq!(err.line(), Some(5));
    assert!(err.col().is_some());
}

#[test]
fn input_calls_inside_setup_are_fine() {
    let source = "def setup():\n    global n\n    n = input.int(\"n\", 14)\n\ndef process():\n    return n\n";
    parse(source).expect("input in setup is legal");
}

#[test]
fn library_top_level_input_is_rejected() {
    let source = "n = input.int(\"n\", 14)\nexport = {\"n\": 1}\n";
    let err = parse(source).expect_err("library has no setup to host inputs");
    assert_eq!(err.kind(), ErrorKind::InvalidInputUsage);
}

#[test]
fn top_level_variables_are_rejected_in_indicators() {
    let source = "counter = 0\n\ndef setup():\n    pass\n\ndef process():\n    pass\n";
    let err = parse(source).expect_err("top-level state");
    assert_eq!(err.kind(), ErrorKind::StrategyGlobalVariable);
    assert_eq!(err.line(), Some(1));
}

#[test]
fn import_bindings_and_export_are_allowed_at_top_level() {
    let source = "util = import_script(\"util\")\nexport = {\"marker\": 1}\n\ndef setup():\n    pass\n\ndef process():\n    pass\n";
    let script = parse(source).expect("import alias and export are fine");
    assert_eq!(script.metadata().imports.get("util").map(String::as_str), Some("util"));
}

#[test]
fn strategy_namespace_in_library_is_rejected() {
    let source = "export = {\"x\": 1}\nstrategy.close()\n";
    let err = parse(source).expect_err("strategy use in library");
    assert_eq!(err.kind(), ErrorKind::StrategyFunctionInIndicator);
    assert_eq!(err.line(), Some(2));
}

#[test]
fn reserved_names_are_rejected() {
    let err = parse("export = __foo__\n").expect_err("reserved export source");
    assert_eq!(err.kind(), ErrorKind::ReservedVariableName);

    let err = parse("export = {\"__k__\": 1}\n").expect_err("reserved dict key");
    assert_eq!(err.kind(), ErrorKind::ReservedVariableName);

    let err = parse("__bar__ = 1\nexport = 2\n").expect_err("reserved top-level binding");
    assert_eq!(err.kind(), ErrorKind::ReservedVariableName);
    assert_eq!(err.line(), Some(1));
}

#[test]
fn self_import_is_a_static_circular_import() {
    let source = "me = import_script(\"test\")\n\ndef setup():\n    pass\n\ndef process():\n    pass\n";
    let err = parse(source).expect_err("self import");
    assert_eq!(err.kind(), ErrorKind::CircularImport);
}

#[test]
fn error_display_names_the_family() {
    let err = parse("x = 1\n").expect_err("missing kind");
    let display = err.to_string();
    assert!(display.starts_with("MissingKindError"), "got: {display}");
    assert!(display.contains("'test'"), "got: {display}");
}
