use crate::{
    error::{Raise, RunResult},
    namespace::Namespace,
    value::{CallArgs, Value},
};

/// The `ta` namespace: pure technical-analysis math over series values.
///
/// Every function takes a series (any iterable of numbers; `None` entries
/// are treated as gaps and skipped) and returns a float, or `None` when the
/// series is too short for the requested length.
#[derive(Debug, Default)]
pub struct TaNamespace;

impl TaNamespace {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Namespace for TaNamespace {
    fn label(&self) -> &'static str {
        "ta"
    }

    fn call(&mut self, method: &str, args: CallArgs) -> RunResult<Value> {
        match method {
            "sma" => {
                let (series, length) = series_and_length(&args, "sma")?;
                Ok(sma(&series, length).map_or(Value::None, Value::Float))
            }
            "ema" => {
                let (series, length) = series_and_length(&args, "ema")?;
                Ok(ema(&series, length).map_or(Value::None, Value::Float))
            }
            "rsi" => {
                let (series, length) = series_and_length(&args, "rsi")?;
                Ok(rsi(&series, length).map_or(Value::None, Value::Float))
            }
            "highest" => {
                let (series, length) = series_and_length(&args, "highest")?;
                Ok(window(&series, length)
                    .map_or(Value::None, |w| Value::Float(w.iter().copied().fold(f64::MIN, f64::max))))
            }
            "lowest" => {
                let (series, length) = series_and_length(&args, "lowest")?;
                Ok(window(&series, length)
                    .map_or(Value::None, |w| Value::Float(w.iter().copied().fold(f64::MAX, f64::min))))
            }
            "change" => {
                args.no_kwargs("change")?;
                if args.pos.is_empty() || args.pos.len() > 2 {
                    return Err(Raise::type_error("change() takes a series and an optional distance").into());
                }
                let series = numbers(&args.pos[0], "change")?;
                let distance = match args.pos.get(1) {
                    Some(value) => usize::try_from(value.as_int("change() distance")?).unwrap_or(0).max(1),
                    None => 1,
                };
                if series.len() <= distance {
                    return Ok(Value::None);
                }
                Ok(Value::Float(series[series.len() - 1] - series[series.len() - 1 - distance]))
            }
            "crossover" => crossing(&args, "crossover", true),
            "crossunder" => crossing(&args, "crossunder", false),
            other => Err(Raise::attribute_error(format!("'ta' object has no attribute '{other}'")).into()),
        }
    }
}

/// Extracts the numeric entries of a series value, skipping `None` gaps.
fn numbers(series: &Value, what: &str) -> Result<Vec<f64>, Raise> {
    let values = series
        .iter_values()
        .map_err(|_| Raise::type_error(format!("{what}() series must be iterable, not '{}'", series.type_name())))?;
    let mut out = Vec::with_capacity(values.len());
    for value in values {
        match value {
            Value::None => {}
            other => out.push(other.as_number().ok_or_else(|| {
                Raise::type_error(format!("{what}() series must contain numbers, not '{}'", other.type_name()))
            })?),
        }
    }
    Ok(out)
}

fn series_and_length(args: &CallArgs, what: &str) -> RunResult<(Vec<f64>, usize)> {
    args.no_kwargs(what)?;
    args.expect_len(what, 2)?;
    let series = numbers(&args.pos[0], what)?;
    let length = args.pos[1].as_int(&format!("{what}() length"))?;
    if length <= 0 {
        return Err(Raise::value_error(format!("{what}() length must be positive")).into());
    }
    Ok((series, usize::try_from(length).unwrap_or(usize::MAX)))
}

/// Last `length` values, or `None` when the series is shorter.
fn window(series: &[f64], length: usize) -> Option<&[f64]> {
    if series.len() < length {
        None
    } else {
        Some(&series[series.len() - length..])
    }
}

fn sma(series: &[f64], length: usize) -> Option<f64> {
    let window = window(series, length)?;
    Some(window.iter().sum::<f64>() / length as f64)
}

/// Classic exponential moving average: seeded with an SMA over the first
/// `length` values, then smoothed with `alpha = 2 / (length + 1)`.
fn ema(series: &[f64], length: usize) -> Option<f64> {
    if series.len() < length {
        return None;
    }
    let alpha = 2.0 / (length as f64 + 1.0);
    let mut value = series[..length].iter().sum::<f64>() / length as f64;
    for sample in &series[length..] {
        value = alpha * sample + (1.0 - alpha) * value;
    }
    Some(value)
}

/// Wilder's RSI over the last `length` deltas.
fn rsi(series: &[f64], length: usize) -> Option<f64> {
    if series.len() < length + 1 {
        return None;
    }
    let window = &series[series.len() - (length + 1)..];
    let mut gains = 0.0;
    let mut losses = 0.0;
    for pair in window.windows(2) {
        let delta = pair[1] - pair[0];
        if delta >= 0.0 {
            gains += delta;
        } else {
            losses -= delta;
        }
    }
    let periods = length as f64;
    let avg_gain = gains / periods;
    let avg_loss = losses / periods;
    if avg_loss == 0.0 {
        return Some(100.0);
    }
    let rs = avg_gain / avg_loss;
    Some(100.0 - 100.0 / (1.0 + rs))
}

/// `crossover(a, b)`: series `a` crossed above `b` on the last bar (below
/// for `crossunder`). `b` may be a scalar level or a second series.
fn crossing(args: &CallArgs, what: &str, above: bool) -> RunResult<Value> {
    args.no_kwargs(what)?;
    args.expect_len(what, 2)?;
    let a = numbers(&args.pos[0], what)?;
    let b = match &args.pos[1] {
        scalar @ (Value::Int(_) | Value::Float(_) | Value::Bool(_)) => {
            let level = scalar.as_number().expect("checked numeric");
            vec![level; a.len()]
        }
        series => numbers(series, what)?,
    };
    if a.len() < 2 || b.len() < 2 {
        return Ok(Value::Bool(false));
    }
    let (a_prev, a_cur) = (a[a.len() - 2], a[a.len() - 1]);
    let (b_prev, b_cur) = (b[b.len() - 2], b[b.len() - 1]);
    let crossed = if above {
        a_prev <= b_prev && a_cur > b_cur
    } else {
        a_prev >= b_prev && a_cur < b_cur
    };
    Ok(Value::Bool(crossed))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sma_needs_a_full_window() {
        assert_eq!(sma(&[1.0, 2.0, 3.0, 4.0], 2), Some(3.5));
        assert_eq!(sma(&[1.0], 2), None);
    }

    #[test]
    fn rsi_is_100_without_losses() {
        assert_eq!(rsi(&[1.0, 2.0, 3.0, 4.0], 3), Some(100.0));
    }

    #[test]
    fn crossover_detects_the_last_bar_only() {
        let args = CallArgs::positional([
            Value::list(vec![Value::Float(1.0), Value::Float(3.0)]),
            Value::list(vec![Value::Float(2.0), Value::Float(2.0)]),
        ]);
        let crossed = crossing(&args, "crossover", true).unwrap();
        assert!(crossed.py_eq(&Value::Bool(true)));
    }
}
