use crate::{
    error::{Raise, RunResult},
    namespace::{Namespace, SharedDict},
    namespaces::SHARED_CURRENT_BAR,
    value::{CallArgs, Dict, DictKey, Value},
};

/// A recorded trading action.
#[derive(Debug, Clone)]
struct Order {
    action: &'static str,
    qty: f64,
    timestamp: Value,
    comment: Option<String>,
}

/// The `strategy` namespace: order recording and position tracking.
///
/// `strategy.long()` / `strategy.short()` open (or add to) a position,
/// `strategy.close()` flattens it. Every action is stamped with the current
/// bar's timestamp, read back from the shared dictionary where the data
/// namespace publishes it. The recorded orders are the namespace's
/// `generate_output()` contribution.
#[derive(Debug)]
pub struct StrategyNamespace {
    shared: SharedDict,
    orders: Vec<Order>,
    position: f64,
}

impl StrategyNamespace {
    #[must_use]
    pub fn new(shared: SharedDict) -> Self {
        Self {
            shared,
            orders: Vec::new(),
            position: 0.0,
        }
    }

    /// Net position size: positive long, negative short.
    #[must_use]
    pub fn position(&self) -> f64 {
        self.position
    }

    fn current_timestamp(&self) -> Value {
        if let Some(Value::Dict(bar)) = self.shared.get(SHARED_CURRENT_BAR)
            && let Some(timestamp) = bar.borrow().get(&DictKey::str("timestamp"))
        {
            return timestamp.clone();
        }
        Value::None
    }

    fn record(&mut self, action: &'static str, args: &CallArgs) -> RunResult<Value> {
        let qty = match args.pos.first().or_else(|| args.kwarg("qty")) {
            Some(value) => value
                .as_number()
                .ok_or_else(|| Raise::type_error(format!("{action}() qty must be a number")))?,
            None => 1.0,
        };
        if args.pos.len() > 1 {
            return Err(Raise::type_error(format!("{action}() takes at most 1 positional argument")).into());
        }
        let comment = match args.kwarg("comment") {
            Some(Value::Str(text)) => Some(text.to_string()),
            Some(other) => {
                return Err(Raise::type_error(format!(
                    "{action}() comment must be a string, not '{}'",
                    other.type_name()
                ))
                .into());
            }
            None => None,
        };
        match action {
            "long" => self.position += qty,
            "short" => self.position -= qty,
            _ => self.position = 0.0,
        }
        self.orders.push(Order {
            action,
            qty,
            timestamp: self.current_timestamp(),
            comment,
        });
        Ok(Value::None)
    }
}

impl Namespace for StrategyNamespace {
    fn label(&self) -> &'static str {
        "strategy"
    }

    fn attr(&self, name: &str) -> Option<Value> {
        match name {
            "position" => Some(Value::Float(self.position)),
            _ => None,
        }
    }

    fn call(&mut self, method: &str, args: CallArgs) -> RunResult<Value> {
        match method {
            "long" => self.record("long", &args),
            "short" => self.record("short", &args),
            "close" => self.record("close", &args),
            "position" => {
                args.no_kwargs("position")?;
                args.expect_len("position", 0)?;
                Ok(Value::Float(self.position))
            }
            other => Err(Raise::attribute_error(format!("'strategy' object has no attribute '{other}'")).into()),
        }
    }

    fn generate_output(&self) -> Option<Value> {
        if self.orders.is_empty() {
            return None;
        }
        let orders = self
            .orders
            .iter()
            .map(|order| {
                let mut entry = Dict::with_capacity(4);
                entry.insert(DictKey::str("action"), Value::str(order.action));
                entry.insert(DictKey::str("qty"), Value::Float(order.qty));
                entry.insert(DictKey::str("timestamp"), order.timestamp.clone());
                if let Some(comment) = &order.comment {
                    entry.insert(DictKey::str("comment"), Value::str(comment.as_str()));
                }
                Value::dict(entry)
            })
            .collect();
        Some(Value::list(orders))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn orders_accumulate_position() {
        let mut strategy = StrategyNamespace::new(SharedDict::new());
        strategy.call("long", CallArgs::positional([Value::Float(2.0)])).unwrap();
        strategy.call("short", CallArgs::positional([])).unwrap();
        assert!((strategy.position() - 1.0).abs() < f64::EPSILON);
        strategy.call("close", CallArgs::positional([])).unwrap();
        assert!(strategy.position().abs() < f64::EPSILON);
        let output = strategy.generate_output().expect("orders recorded");
        assert_eq!(output.len().unwrap(), 3);
    }
}
