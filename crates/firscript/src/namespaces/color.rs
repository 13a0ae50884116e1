use crate::{
    error::{Raise, RunResult},
    namespace::Namespace,
    value::{CallArgs, Value},
};

/// Named color constants plus `color.rgb(r, g, b)`.
///
/// Colors are plain hex strings; the chart namespace and the driver treat
/// them opaquely.
#[derive(Debug, Default)]
pub struct ColorNamespace;

const NAMED: &[(&str, &str)] = &[
    ("red", "#ff3b30"),
    ("green", "#34c759"),
    ("blue", "#007aff"),
    ("orange", "#ff9500"),
    ("yellow", "#ffcc00"),
    ("purple", "#af52de"),
    ("teal", "#5ac8fa"),
    ("gray", "#8e8e93"),
    ("black", "#000000"),
    ("white", "#ffffff"),
];

impl ColorNamespace {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Namespace for ColorNamespace {
    fn label(&self) -> &'static str {
        "color"
    }

    fn attr(&self, name: &str) -> Option<Value> {
        NAMED
            .iter()
            .find_map(|(known, hex)| (*known == name).then(|| Value::str(*hex)))
    }

    fn call(&mut self, method: &str, args: CallArgs) -> RunResult<Value> {
        match method {
            "rgb" => {
                args.no_kwargs("rgb")?;
                args.expect_len("rgb", 3)?;
                let mut channels = [0u8; 3];
                for (slot, value) in channels.iter_mut().zip(&args.pos) {
                    let channel = value.as_int("rgb() channel")?;
                    if !(0..=255).contains(&channel) {
                        return Err(Raise::value_error("rgb() channels must be in 0..=255").into());
                    }
                    *slot = channel as u8;
                }
                Ok(Value::str(format!("#{:02x}{:02x}{:02x}", channels[0], channels[1], channels[2])))
            }
            other => Err(Raise::attribute_error(format!("'color' object has no attribute '{other}'")).into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rgb_formats_hex() {
        let mut color = ColorNamespace::new();
        let value = color
            .call(
                "rgb",
                CallArgs::positional([Value::Int(255), Value::Int(0), Value::Int(128)]),
            )
            .unwrap();
        assert!(value.py_eq(&Value::str("#ff0080")));
        assert!(color.attr("red").is_some());
        assert!(color.attr("chartreuse").is_none());
    }
}
