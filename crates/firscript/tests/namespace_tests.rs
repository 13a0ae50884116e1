use firscript::{
    namespaces::{BarRecord, DataNamespace},
    CallArgs, Importer, Namespace, NamespaceRegistry, Raise, RunResult, Value,
};
use indexmap::IndexMap;

fn bar(ts: i64, close: f64) -> BarRecord {
    let mut bar = BarRecord::new();
    bar.insert("timestamp".to_owned(), Value::Int(ts));
    bar.insert("close".to_owned(), Value::Float(close));
    bar
}

fn default_importer() -> Importer {
    let mut registry = NamespaceRegistry::new();
    registry.register_defaults(IndexMap::new(), IndexMap::new());
    Importer::new(registry)
}

fn push_bar(ctx: &firscript::ExecutionContext, record: BarRecord) {
    let handle = ctx.namespace_handle("data").expect("data namespace").clone();
    let mut data = handle.downcast_mut::<DataNamespace>().expect("downcast data");
    data.push_bar(record);
}

#[test]
fn defaults_install_the_canonical_namespace_set() {
    let mut registry = NamespaceRegistry::new();
    registry.register_defaults(IndexMap::new(), IndexMap::new());
    let bundle = registry.build();
    for name in ["ta", "input", "chart", "color", "strategy", "data", "log"] {
        assert!(
            matches!(bundle.get(name), Some(Value::Namespace(_))),
            "missing default namespace {name}"
        );
    }
}

#[test]
fn indicator_reads_bars_and_computes_sma() {
    let imp = default_importer();
    imp.add_main_script(
        "sma2",
        "def setup():\n    pass\n\ndef process():\n    return ta.sma(data.series(\"close\"), 2)\n",
    )
    .expect("indicator parses");

    let mut ctx = imp.build_main_script().expect("builds");
    ctx.run_setup().expect("setup runs");

    push_bar(&ctx, bar(1, 10.0));
    let first = ctx.run_process().expect("first bar");
    assert!(first.py_eq(&Value::None), "one bar is not enough for sma(2)");

    push_bar(&ctx, bar(2, 14.0));
    let second = ctx.run_process().expect("second bar");
    assert!(second.py_eq(&Value::Float(12.0)), "got {second:?}");
}

#[test]
fn strategy_orders_are_stamped_with_the_bar_timestamp() {
    let imp = default_importer();
    imp.add_main_script(
        "strat",
        concat!(
            "def setup():\n",
            "    pass\n",
            "\n",
            "def process():\n",
            "    if data.close > 10:\n",
            "        strategy.long(2)\n",
            "    return strategy.position\n",
        ),
    )
    .expect("strategy parses");

    let mut ctx = imp.build_main_script().expect("builds");
    ctx.run_setup().expect("setup runs");

    push_bar(&ctx, bar(100, 9.0));
    let flat = ctx.run_process().expect("below threshold");
    assert!(flat.py_eq(&Value::Float(0.0)));

    push_bar(&ctx, bar(200, 12.0));
    let long = ctx.run_process().expect("above threshold");
    assert!(long.py_eq(&Value::Float(2.0)));

    let outputs = ctx.generate_outputs();
    let orders = outputs.get("strategy").expect("strategy output");
    let orders_json = orders.to_json();
    let order = &orders_json.as_array().expect("orders list")[0];
    assert_eq!(order["action"], "long");
    assert_eq!(order["timestamp"], 200);
}

#[test]
fn input_overrides_replace_defaults_and_show_in_metadata() {
    let mut overrides = IndexMap::new();
    overrides.insert("length".to_owned(), Value::Int(5));
    let mut registry = NamespaceRegistry::new();
    registry.register_defaults(overrides, IndexMap::new());
    let imp = Importer::new(registry);

    imp.add_main_script(
        "main",
        concat!(
            "def setup():\n",
            "    global length\n",
            "    length = input.int(\"length\", 14)\n",
            "\n",
            "def process():\n",
            "    return length\n",
        ),
    )
    .expect("parses");

    let mut ctx = imp.build_main_script().expect("builds");
    ctx.run_setup().expect("setup declares the input");
    let value = ctx.run_process().expect("process runs");
    assert!(value.py_eq(&Value::Int(5)), "override wins, got {value:?}");

    let metadata = ctx.generate_metadatas();
    let inputs = metadata.get("input").expect("input metadata").to_json();
    assert_eq!(inputs["length"]["type"], "int");
    assert_eq!(inputs["length"]["default"], 14);
    assert_eq!(inputs["length"]["value"], 5);
}

#[test]
fn chart_plots_and_log_records_reach_the_outputs() {
    let imp = default_importer();
    imp.add_main_script(
        "plotter",
        concat!(
            "def setup():\n",
            "    pass\n",
            "\n",
            "def process():\n",
            "    chart.plot(data.close, title=\"close\", color=color.red)\n",
            "    log.info(\"bar processed\")\n",
        ),
    )
    .expect("parses");

    let mut ctx = imp.build_main_script().expect("builds");
    ctx.run_setup().expect("setup runs");
    push_bar(&ctx, bar(7, 42.0));
    ctx.run_process().expect("process runs");

    let outputs = ctx.generate_outputs();
    let chart = outputs.get("chart").expect("chart output").to_json();
    assert_eq!(chart["close"]["points"][0]["value"], 42.0);
    assert_eq!(chart["close"]["points"][0]["timestamp"], 7);
    assert_eq!(chart["close"]["color"], "#ff3b30");

    let log = outputs.get("log").expect("log output").to_json();
    assert_eq!(log[0]["level"], "INFO");
    assert_eq!(log[0]["message"], "bar processed");
}

#[test]
fn column_mapping_renames_driver_columns() {
    let mut mapping = IndexMap::new();
    mapping.insert("close".to_owned(), "Adj Close".to_owned());
    let mut registry = NamespaceRegistry::new();
    registry.register_defaults(IndexMap::new(), mapping);
    let imp = Importer::new(registry);
    imp.add_main_script(
        "main",
        "def setup():\n    pass\n\ndef process():\n    return data.close\n",
    )
    .expect("parses");

    let mut ctx = imp.build_main_script().expect("builds");
    let mut record = BarRecord::new();
    record.insert("Adj Close".to_owned(), Value::Float(3.5));
    push_bar(&ctx, record);
    let value = ctx.run_process().expect("process runs");
    assert!(value.py_eq(&Value::Float(3.5)), "got {value:?}");
}

/// A replacement `ta` namespace whose `sma` always answers 1.0.
#[derive(Debug)]
struct FlatTa;

impl Namespace for FlatTa {
    fn label(&self) -> &'static str {
        "ta"
    }

    fn call(&mut self, method: &str, _args: CallArgs) -> RunResult<Value> {
        match method {
            "sma" => Ok(Value::Float(1.0)),
            other => Err(Raise::attribute_error(format!("'ta' object has no attribute '{other}'")).into()),
        }
    }
}

#[test]
fn registered_namespaces_override_defaults() {
    let mut registry = NamespaceRegistry::new();
    registry.register_defaults(IndexMap::new(), IndexMap::new());
    registry.register_namespace("ta", FlatTa);
    let imp = Importer::new(registry);
    imp.add_main_script(
        "main",
        "def setup():\n    pass\n\ndef process():\n    return ta.sma([2.0, 4.0], 2)\n",
    )
    .expect("parses");

    let mut ctx = imp.build_main_script().expect("builds");
    let value = ctx.run_process().expect("process runs");
    assert!(value.py_eq(&Value::Float(1.0)), "custom ta must win, got {value:?}");
}
