use indexmap::IndexMap;

use crate::{
    error::{Raise, RunResult},
    namespace::{Namespace, SharedDict},
    namespaces::SHARED_CURRENT_BAR,
    value::{CallArgs, Dict, DictKey, Value},
};

#[derive(Debug)]
struct PlotSeries {
    color: Option<Value>,
    points: Vec<(Value, Value)>,
}

/// The `chart` namespace: per-bar plotted series.
///
/// `chart.plot(value, title="fast", color=color.red)` appends one point,
/// stamped with the current bar's timestamp from the shared dictionary.
/// `generate_output()` reports every series with its points and color.
#[derive(Debug)]
pub struct ChartNamespace {
    shared: SharedDict,
    series: IndexMap<String, PlotSeries>,
}

impl ChartNamespace {
    #[must_use]
    pub fn new(shared: SharedDict) -> Self {
        Self {
            shared,
            series: IndexMap::new(),
        }
    }

    fn current_timestamp(&self) -> Value {
        if let Some(Value::Dict(bar)) = self.shared.get(SHARED_CURRENT_BAR)
            && let Some(timestamp) = bar.borrow().get(&DictKey::str("timestamp"))
        {
            return timestamp.clone();
        }
        Value::None
    }
}

impl Namespace for ChartNamespace {
    fn label(&self) -> &'static str {
        "chart"
    }

    fn call(&mut self, method: &str, args: CallArgs) -> RunResult<Value> {
        match method {
            "plot" => {
                if args.pos.len() != 1 {
                    return Err(Raise::type_error("plot() takes exactly 1 positional argument").into());
                }
                let mut title = "plot".to_owned();
                let mut color = None;
                for (name, value) in &args.kwargs {
                    match &**name {
                        "title" => title = value.str_value(),
                        "color" => color = Some(value.clone()),
                        other => {
                            return Err(
                                Raise::type_error(format!("plot() got an unexpected keyword argument '{other}'")).into()
                            );
                        }
                    }
                }
                let timestamp = self.current_timestamp();
                let series = self.series.entry(title).or_insert_with(|| PlotSeries {
                    color: None,
                    points: Vec::new(),
                });
                if color.is_some() {
                    series.color = color;
                }
                series.points.push((timestamp, args.pos[0].clone()));
                Ok(Value::None)
            }
            other => Err(Raise::attribute_error(format!("'chart' object has no attribute '{other}'")).into()),
        }
    }

    fn generate_output(&self) -> Option<Value> {
        if self.series.is_empty() {
            return None;
        }
        let mut out = Dict::with_capacity(self.series.len());
        for (title, series) in &self.series {
            let points = series
                .points
                .iter()
                .map(|(timestamp, value)| {
                    let mut point = Dict::with_capacity(2);
                    point.insert(DictKey::str("timestamp"), timestamp.clone());
                    point.insert(DictKey::str("value"), value.clone());
                    Value::dict(point)
                })
                .collect();
            let mut entry = Dict::with_capacity(2);
            entry.insert(DictKey::str("color"), series.color.clone().unwrap_or(Value::None));
            entry.insert(DictKey::str("points"), Value::list(points));
            out.insert(DictKey::str(title.as_str()), Value::dict(entry));
        }
        Some(Value::dict(out))
    }
}
