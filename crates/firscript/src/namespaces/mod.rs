//! Default implementations of the canonical script namespaces.
//!
//! The engine core treats namespaces opaquely; these are the working
//! defaults [`NamespaceRegistry::register_defaults`] installs. Each instance
//! is constructed with the registry's shared dictionary, which is the only
//! channel between namespaces: `data` publishes the current bar and the live
//! column series there, and `strategy`/`chart` read the bar timestamp back
//! out when recording.

mod chart;
mod color;
mod data;
mod input;
mod log;
mod strategy;
mod ta;

use indexmap::IndexMap;

pub use self::{
    chart::ChartNamespace,
    color::ColorNamespace,
    data::{BarRecord, DataNamespace},
    input::InputNamespace,
    log::LogNamespace,
    strategy::StrategyNamespace,
    ta::TaNamespace,
};
use crate::{registry::NamespaceRegistry, value::Value};

/// Shared-dictionary key under which `data` publishes the current bar.
pub(crate) const SHARED_CURRENT_BAR: &str = "data.current";

/// Shared-dictionary key under which `data` publishes the live column
/// series (a dict of column name to list).
pub(crate) const SHARED_SERIES: &str = "data.series";

/// Installs the canonical namespace set.
pub(crate) fn register_defaults(
    registry: &mut NamespaceRegistry,
    input_overrides: IndexMap<String, Value>,
    column_mapping: IndexMap<String, String>,
) {
    let shared = registry.shared().clone();
    registry.register_namespace("ta", TaNamespace::new());
    registry.register_namespace("input", InputNamespace::new(input_overrides));
    registry.register_namespace("chart", ChartNamespace::new(shared.clone()));
    registry.register_namespace("color", ColorNamespace::new());
    registry.register_namespace("strategy", StrategyNamespace::new(shared.clone()));
    registry.register_namespace("data", DataNamespace::new(shared, column_mapping));
    registry.register_namespace("log", LogNamespace::new());
}
