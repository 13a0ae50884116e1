use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString, IntoStaticStr};

use crate::{analyze::analyze, error::ScriptError, parse::parse_program};

/// The three script disciplines the validator distinguishes.
///
/// Classification is purely syntactic: `setup` + `process` make a strategy
/// or an indicator (split on whether the tree touches `strategy.*`), and a
/// lone top-level `export` assignment makes a library.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, IntoStaticStr, Serialize, Deserialize)]
pub enum ScriptKind {
    #[strum(serialize = "strategy")]
    #[serde(rename = "strategy")]
    Strategy,
    #[strum(serialize = "indicator")]
    #[serde(rename = "indicator")]
    Indicator,
    #[strum(serialize = "library")]
    #[serde(rename = "library")]
    Library,
}

/// Everything the validator derives from a script's source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptMetadata {
    /// Caller-supplied identifier, typically the registration name.
    pub id: String,
    /// Optional descriptive name; may equal `id`.
    pub name: Option<String>,
    pub kind: ScriptKind,
    /// Top-level symbol names the script assigns to. Always contains
    /// `"export"` for a library.
    pub exports: IndexSet<String>,
    /// Local alias → imported script name, for `alias = import_script("name")`
    /// bindings recognized syntactically.
    pub imports: IndexMap<String, String>,
}

/// An immutable, validated script: the source text plus its metadata.
///
/// A `Script` is only ever produced by a successful parse and validation.
#[derive(Debug, Clone)]
pub struct Script {
    source: String,
    metadata: ScriptMetadata,
}

impl Script {
    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    #[must_use]
    pub fn metadata(&self) -> &ScriptMetadata {
        &self.metadata
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.metadata.id
    }

    #[must_use]
    pub fn kind(&self) -> ScriptKind {
        self.metadata.kind
    }

    /// Sets the descriptive name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.metadata.name = Some(name.into());
        self
    }
}

/// Parses and validates scripts.
///
/// The parser is pure with respect to the source text: it reads no files and
/// consults no registry.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScriptParser;

impl ScriptParser {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Parses `source` under the id `script_id`, classifying the script and
    /// enforcing the structural rules of its kind.
    ///
    /// When `kind` is given, the inferred classification must not contradict
    /// it; for shapes the inference cannot classify on its own, the requested
    /// kind's own requirements are checked instead.
    pub fn parse(&self, source: &str, script_id: &str, kind: Option<ScriptKind>) -> Result<Script, ScriptError> {
        let nodes = parse_program(source).map_err(|failure| failure.into_script_error(script_id))?;
        let metadata = analyze(&nodes, script_id, kind)?;
        Ok(Script {
            source: source.to_owned(),
            metadata,
        })
    }
}
