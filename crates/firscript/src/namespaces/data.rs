use indexmap::IndexMap;

use crate::{
    error::{Raise, RunResult},
    namespace::{Namespace, SharedDict},
    namespaces::{SHARED_CURRENT_BAR, SHARED_SERIES},
    value::{CallArgs, Dict, DictKey, Value},
};

/// One bar record as the driver supplies it: column name to value.
pub type BarRecord = IndexMap<String, Value>;

/// The `data` namespace: the driver's window into the bar series.
///
/// The driver mutates this namespace between `run_process()` calls. Scripts
/// read the current bar through attributes (`data.close`) and whole columns
/// through `data.series("close")`. Column lists are live `Value::List`s, so
/// the copy published into the shared dictionary and the copies handed to
/// scripts all observe every new bar.
#[derive(Debug)]
pub struct DataNamespace {
    /// Logical column name → driver column name.
    column_map: IndexMap<String, String>,
    /// Current bar, keyed by logical column name.
    current: BarRecord,
    /// Live per-column series, keyed by logical column name.
    columns: IndexMap<String, Value>,
    bar_count: usize,
    shared: SharedDict,
}

impl DataNamespace {
    /// Well-known bar columns, pre-created so scripts can read them (as
    /// `None`) before the driver supplies the first bar.
    const STANDARD_COLUMNS: [&'static str; 5] = ["open", "high", "low", "close", "volume"];

    #[must_use]
    pub fn new(shared: SharedDict, column_mapping: IndexMap<String, String>) -> Self {
        let mut ns = Self {
            column_map: column_mapping,
            current: BarRecord::new(),
            columns: IndexMap::new(),
            bar_count: 0,
            shared,
        };
        ns.shared.insert(SHARED_SERIES, Value::dict(Dict::new()));
        for name in Self::STANDARD_COLUMNS {
            drop(ns.column(name));
        }
        ns
    }

    /// Maps a driver column name back to its logical name.
    fn logical_name<'a>(&'a self, driver_name: &'a str) -> &'a str {
        self.column_map
            .iter()
            .find_map(|(logical, driver)| (driver == driver_name).then_some(logical.as_str()))
            .unwrap_or(driver_name)
    }

    /// Replaces the current bar without touching the historical series.
    pub fn set_current_bar(&mut self, bar: BarRecord) {
        self.current = bar
            .into_iter()
            .map(|(name, value)| (self.logical_name(&name).to_owned(), value))
            .collect();
        self.publish_current();
    }

    /// Sets the current bar and appends it to every column series.
    pub fn push_bar(&mut self, bar: BarRecord) {
        self.set_current_bar(bar);
        self.bar_count += 1;
        for (name, value) in self.current.clone() {
            self.column(&name).push(value);
        }
    }

    /// Replaces the whole historical frame. The last record becomes the
    /// current bar.
    pub fn set_all_bars(&mut self, bars: Vec<BarRecord>) {
        for column in self.columns.values() {
            if let Value::List(items) = column {
                items.borrow_mut().clear();
            }
        }
        self.bar_count = 0;
        if bars.is_empty() {
            self.current = BarRecord::new();
            return;
        }
        for bar in bars {
            self.push_bar(bar);
        }
    }

    /// The live list backing a column, created (and published) on first use.
    fn column(&mut self, name: &str) -> std::cell::RefMut<'_, Vec<Value>> {
        if !self.columns.contains_key(name) {
            let list = Value::list(Vec::new());
            if let Some(Value::Dict(series)) = self.shared.get(SHARED_SERIES) {
                series.borrow_mut().insert(DictKey::str(name), list.clone());
            }
            self.columns.insert(name.to_owned(), list);
        }
        match &self.columns[name] {
            Value::List(items) => items.borrow_mut(),
            _ => unreachable!("columns only hold lists"),
        }
    }

    fn publish_current(&self) {
        let mut dict = Dict::with_capacity(self.current.len());
        for (name, value) in &self.current {
            dict.insert(DictKey::str(name.as_str()), value.clone());
        }
        self.shared.insert(SHARED_CURRENT_BAR, Value::dict(dict));
    }
}

impl Namespace for DataNamespace {
    fn label(&self) -> &'static str {
        "data"
    }

    fn attr(&self, name: &str) -> Option<Value> {
        if name == "bar_index" {
            return Some(Value::Int(i64::try_from(self.bar_count).unwrap_or(0).saturating_sub(1)));
        }
        if let Some(value) = self.current.get(name) {
            return Some(value.clone());
        }
        // A known column with no current bar yet reads as None.
        if self.columns.contains_key(name) {
            return Some(Value::None);
        }
        None
    }

    fn call(&mut self, method: &str, args: CallArgs) -> RunResult<Value> {
        match method {
            "series" => {
                args.no_kwargs("series")?;
                args.expect_len("series", 1)?;
                let Value::Str(name) = &args.pos[0] else {
                    return Err(Raise::type_error("series() argument must be a column name string").into());
                };
                let name = name.to_string();
                if !self.columns.contains_key(&name) {
                    // Creates and publishes an empty live column.
                    drop(self.column(&name));
                }
                Ok(self.columns[name.as_str()].clone())
            }
            "bar_count" => {
                args.no_kwargs("bar_count")?;
                args.expect_len("bar_count", 0)?;
                Ok(Value::Int(i64::try_from(self.bar_count).unwrap_or(0)))
            }
            other => Err(Raise::attribute_error(format!("'data' object has no attribute '{other}'")).into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bar(close: f64, ts: i64) -> BarRecord {
        let mut bar = BarRecord::new();
        bar.insert("timestamp".to_owned(), Value::Int(ts));
        bar.insert("close".to_owned(), Value::Float(close));
        bar
    }

    #[test]
    fn pushed_bars_extend_the_live_series() {
        let shared = SharedDict::new();
        let mut data = DataNamespace::new(shared.clone(), IndexMap::new());
        data.push_bar(bar(10.0, 1));
        let series = match data.call("series", CallArgs::positional([Value::str("close")])).unwrap() {
            Value::List(items) => Value::List(items),
            other => panic!("expected list, got {other:?}"),
        };
        data.push_bar(bar(11.0, 2));
        // The handed-out series observes the new bar.
        assert_eq!(series.len().unwrap(), 2);
        assert!(data.attr("close").unwrap().py_eq(&Value::Float(11.0)));
        assert!(shared.get(SHARED_CURRENT_BAR).is_some());
    }

    #[test]
    fn column_mapping_renames_driver_columns() {
        let mut mapping = IndexMap::new();
        mapping.insert("close".to_owned(), "Close".to_owned());
        let mut data = DataNamespace::new(SharedDict::new(), mapping);
        let mut record = BarRecord::new();
        record.insert("Close".to_owned(), Value::Float(42.0));
        data.push_bar(record);
        assert!(data.attr("close").unwrap().py_eq(&Value::Float(42.0)));
    }
}
