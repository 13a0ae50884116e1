use std::{cell::RefCell, fmt, rc::Rc};

use crate::{
    error::{Raise, RunResult},
    io::{LogLevel, LogSink, StderrLog},
    namespace::Namespace,
    value::{CallArgs, Dict, DictKey, Value},
};

/// The `log` namespace: leveled script logging.
///
/// Records every entry for `generate_output()` and forwards it to the
/// configured [`LogSink`] (stderr by default).
pub struct LogNamespace {
    sink: Rc<RefCell<dyn LogSink>>,
    records: Vec<(LogLevel, String)>,
}

impl fmt::Debug for LogNamespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LogNamespace({} records)", self.records.len())
    }
}

impl LogNamespace {
    #[must_use]
    pub fn new() -> Self {
        Self::with_sink(StderrLog)
    }

    pub fn with_sink(sink: impl LogSink + 'static) -> Self {
        Self {
            sink: Rc::new(RefCell::new(sink)),
            records: Vec::new(),
        }
    }

    fn emit(&mut self, level: LogLevel, args: &CallArgs) -> RunResult<Value> {
        args.no_kwargs("log")?;
        if args.pos.is_empty() {
            return Err(Raise::type_error("log calls need at least one argument").into());
        }
        let message = args.pos.iter().map(Value::str_value).collect::<Vec<_>>().join(" ");
        self.sink.borrow_mut().log(level, &message);
        self.records.push((level, message));
        Ok(Value::None)
    }
}

impl Default for LogNamespace {
    fn default() -> Self {
        Self::new()
    }
}

impl Namespace for LogNamespace {
    fn label(&self) -> &'static str {
        "log"
    }

    fn call(&mut self, method: &str, args: CallArgs) -> RunResult<Value> {
        match method {
            "info" => self.emit(LogLevel::Info, &args),
            "warning" | "warn" => self.emit(LogLevel::Warning, &args),
            "error" => self.emit(LogLevel::Error, &args),
            other => Err(Raise::attribute_error(format!("'log' object has no attribute '{other}'")).into()),
        }
    }

    fn generate_output(&self) -> Option<Value> {
        if self.records.is_empty() {
            return None;
        }
        let records = self
            .records
            .iter()
            .map(|(level, message)| {
                let mut entry = Dict::with_capacity(2);
                entry.insert(DictKey::str("level"), Value::str(level.to_string()));
                entry.insert(DictKey::str("message"), Value::str(message.as_str()));
                Value::dict(entry)
            })
            .collect();
        Some(Value::list(records))
    }
}
