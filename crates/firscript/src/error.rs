use std::{borrow::Cow, fmt, rc::Rc};

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString, IntoStaticStr};

/// Result type alias for the driver-facing engine operations.
pub type ScriptResult<T> = Result<T, ScriptError>;

/// A line/column position inside a script source, both 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CodeLoc {
    pub line: u32,
    pub col: u32,
}

impl CodeLoc {
    #[must_use]
    pub const fn new(line: u32, col: u32) -> Self {
        Self { line, col }
    }
}

impl fmt::Display for CodeLoc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}, col {}", self.line, self.col)
    }
}

/// The typed error families the engine raises.
///
/// Uses strum derives so the conventional `…Error` spellings are available
/// via `Display` and `FromStr`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, IntoStaticStr, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Surface-syntax failure, including constructs outside the embedded subset.
    #[strum(serialize = "ParseError")]
    Parse,
    /// No classification criteria matched the script's shape.
    #[strum(serialize = "MissingKindError")]
    MissingKind,
    /// Classification criteria matched partially or contradict a requested kind.
    #[strum(serialize = "ConflictingKindError")]
    ConflictingKind,
    /// A strategy or indicator lacks a top-level `setup` or `process` function.
    #[strum(serialize = "MissingRequiredFunctionsError")]
    MissingRequiredFunctions,
    /// A library never assigns `export` at top level.
    #[strum(serialize = "NoExportsError")]
    NoExports,
    /// A library assigns `export` more than once at top level.
    #[strum(serialize = "MultipleExportsError")]
    MultipleExports,
    /// An `input.*` call outside the `setup` function body.
    #[strum(serialize = "InvalidInputUsageError")]
    InvalidInputUsage,
    /// A top-level assignment in a strategy/indicator other than `export` or
    /// an `import_script` binding.
    #[strum(serialize = "StrategyGlobalVariableError")]
    StrategyGlobalVariable,
    /// A `strategy.*` reference inside an indicator or library.
    #[strum(serialize = "StrategyFunctionInIndicatorError")]
    StrategyFunctionInIndicator,
    /// A dunder-style `__name__` used as a top-level binding or export key.
    #[strum(serialize = "ReservedVariableNameError")]
    ReservedVariableName,
    /// A script import cycle, detected statically or while resolving.
    #[strum(serialize = "CircularImportError")]
    CircularImport,
    /// The source failed to compile when an execution context was built.
    #[strum(serialize = "CompilationError")]
    Compilation,
    /// A script raised (or triggered) an error while executing.
    #[strum(serialize = "ScriptRuntimeError")]
    ScriptRuntime,
    /// A script called a deny-listed builtin.
    #[strum(serialize = "NotAllowedError")]
    NotAllowed,
    /// `import_script` named a script that was never registered.
    #[strum(serialize = "ScriptNotFoundError")]
    ScriptNotFound,
    /// The importer was asked to build without a main script.
    #[strum(serialize = "EntrypointNotFoundError")]
    EntrypointNotFound,
}

impl ErrorKind {
    /// Whether errors of this kind are produced by the parser/validator
    /// (carrying `line`/`col`) rather than at runtime (`line_no`/`line_str`).
    #[must_use]
    pub fn is_parse_time(self) -> bool {
        matches!(
            self,
            Self::Parse
                | Self::MissingKind
                | Self::ConflictingKind
                | Self::MissingRequiredFunctions
                | Self::NoExports
                | Self::MultipleExports
                | Self::InvalidInputUsage
                | Self::StrategyGlobalVariable
                | Self::StrategyFunctionInIndicator
                | Self::ReservedVariableName
        )
    }
}

/// The single public error type of the engine.
///
/// Every failure carries its kind, the id of the script it concerns, and a
/// message. Parse-time kinds additionally pin the offending node's
/// line/column; runtime kinds carry the failing line number and the source
/// line text extracted from the script.
#[derive(Debug, Clone)]
pub struct ScriptError {
    kind: ErrorKind,
    source_id: String,
    message: String,
    loc: Option<CodeLoc>,
    line_str: Option<String>,
}

impl ScriptError {
    pub(crate) fn parse(
        kind: ErrorKind,
        source_id: impl Into<String>,
        message: impl Into<String>,
        loc: Option<CodeLoc>,
    ) -> Self {
        Self {
            kind,
            source_id: source_id.into(),
            message: message.into(),
            loc,
            line_str: None,
        }
    }

    pub(crate) fn runtime(
        kind: ErrorKind,
        source_id: impl Into<String>,
        message: impl Into<String>,
        loc: Option<CodeLoc>,
        line_str: Option<String>,
    ) -> Self {
        Self {
            kind,
            source_id: source_id.into(),
            message: message.into(),
            loc,
            line_str,
        }
    }

    pub(crate) fn script_not_found(current: &str, name: &str) -> Self {
        Self::runtime(
            ErrorKind::ScriptNotFound,
            current,
            format!("no script registered under the name '{name}'"),
            None,
            None,
        )
    }

    pub(crate) fn entrypoint_not_found() -> Self {
        Self::runtime(
            ErrorKind::EntrypointNotFound,
            "<importer>",
            "no main script has been registered",
            None,
            None,
        )
    }

    pub(crate) fn circular_import(current: &str, offending: &str) -> Self {
        Self::runtime(
            ErrorKind::CircularImport,
            current,
            format!("import cycle detected: '{current}' imports '{offending}' which is already being resolved"),
            None,
            None,
        )
    }

    /// The typed family this error belongs to.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Id of the script the error was raised for.
    #[must_use]
    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    /// The inner message, without location decoration.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// 1-based line of the offending node, when known.
    #[must_use]
    pub fn line(&self) -> Option<u32> {
        self.loc.map(|loc| loc.line)
    }

    /// 1-based column of the offending node, when known.
    #[must_use]
    pub fn col(&self) -> Option<u32> {
        self.loc.map(|loc| loc.col)
    }

    /// Alias of [`line`](Self::line) using the runtime-error vocabulary.
    #[must_use]
    pub fn line_no(&self) -> Option<u32> {
        self.line()
    }

    /// Source text of the failing line, trailing newline stripped.
    /// Only populated on runtime-kind errors.
    #[must_use]
    pub fn line_str(&self) -> Option<&str> {
        self.line_str.as_deref()
    }
}

impl fmt::Display for ScriptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} in '{}'", self.kind, self.source_id)?;
        if let Some(loc) = self.loc {
            if self.kind.is_parse_time() {
                write!(f, " at {loc}")?;
            } else {
                write!(f, ", line {}", loc.line)?;
            }
        }
        write!(f, ": {}", self.message)?;
        if let Some(line_str) = &self.line_str {
            write!(f, "\n    {line_str}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ScriptError {}

/// Script-level exception kinds, the vocabulary user code fails with before
/// the context boundary translates a [`Raise`] into a [`ScriptError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, IntoStaticStr)]
pub enum ExcKind {
    TypeError,
    ValueError,
    NameError,
    UnboundLocalError,
    AttributeError,
    KeyError,
    IndexError,
    ZeroDivisionError,
    StopIteration,
    RuntimeError,
    /// A deny-listed builtin was invoked. Translated to
    /// [`ErrorKind::NotAllowed`] rather than [`ErrorKind::ScriptRuntime`].
    NotAllowed,
}

/// Identity of the script a stack frame belongs to.
///
/// One `ScriptOrigin` is allocated per execution context and shared (via
/// `Rc`) by every function value the context defines, so a frame chain can
/// name the script each frame came from even across `import_script`
/// boundaries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptOrigin {
    pub(crate) display_name: String,
    pub(crate) source: Rc<str>,
}

impl ScriptOrigin {
    pub(crate) fn new(display_name: impl Into<String>, source: &str) -> Rc<Self> {
        Rc::new(Self {
            display_name: display_name.into(),
            source: Rc::from(source),
        })
    }

    /// Extracts the text of a 1-based line, trailing newline stripped.
    pub(crate) fn line_text(&self, line: u32) -> Option<String> {
        self.source
            .split('\n')
            .nth(line.saturating_sub(1) as usize)
            .map(|text| text.strip_suffix('\r').unwrap_or(text).to_owned())
    }
}

/// One entry of a raise's frame chain: where, in which script.
#[derive(Debug, Clone)]
pub struct FrameLoc {
    pub(crate) origin: Rc<ScriptOrigin>,
    pub(crate) loc: CodeLoc,
}

/// A script-level exception in flight.
///
/// Frames accumulate deepest-first while the raise unwinds through function
/// calls; the execution context picks the reporting frame per its location
/// policy when translating to a [`ScriptError`].
#[derive(Debug, Clone)]
pub struct Raise {
    pub kind: ExcKind,
    pub message: Cow<'static, str>,
    pub(crate) frames: Vec<FrameLoc>,
}

impl Raise {
    #[must_use]
    pub fn new(kind: ExcKind, message: impl Into<Cow<'static, str>>) -> Self {
        Self {
            kind,
            message: message.into(),
            frames: Vec::new(),
        }
    }

    #[must_use]
    pub fn type_error(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ExcKind::TypeError, message)
    }

    #[must_use]
    pub fn value_error(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ExcKind::ValueError, message)
    }

    #[must_use]
    pub fn attribute_error(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ExcKind::AttributeError, message)
    }

    pub(crate) fn not_allowed(name: &str) -> Self {
        Self::new(ExcKind::NotAllowed, format!("'{name}' is not available in sandboxed scripts"))
    }

    /// Appends a frame unless the identical location is already the deepest
    /// entry (statement and expression evaluation both stamp on the way out).
    pub(crate) fn push_frame(&mut self, origin: &Rc<ScriptOrigin>, loc: CodeLoc) {
        if let Some(last) = self.frames.last()
            && last.loc == loc
            && Rc::ptr_eq(&last.origin, origin)
        {
            return;
        }
        self.frames.push(FrameLoc {
            origin: Rc::clone(origin),
            loc,
        });
    }

    /// The frame to report for a context named `display_name`: the deepest
    /// frame raised in that script, else the outermost frame of the chain.
    pub(crate) fn reporting_frame(&self, display_name: &str) -> Option<&FrameLoc> {
        self.frames
            .iter()
            .find(|frame| frame.origin.display_name == display_name)
            .or_else(|| self.frames.last())
    }
}

impl fmt::Display for Raise {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// Error channel of the evaluator and of native host functions.
///
/// `Raise` is a script-level exception that the owning context will translate
/// at its boundary. `Engine` wraps an already-typed [`ScriptError`] (for
/// example from a nested `import_script`) which must propagate unchanged so
/// the driver sees the most specific type.
#[derive(Debug, Clone)]
pub enum RunError {
    Raise(Raise),
    Engine(Box<ScriptError>),
}

impl From<Raise> for RunError {
    fn from(raise: Raise) -> Self {
        Self::Raise(raise)
    }
}

impl From<ScriptError> for RunError {
    fn from(err: ScriptError) -> Self {
        Self::Engine(Box::new(err))
    }
}

/// Result type alias used throughout evaluation.
pub type RunResult<T> = Result<T, RunError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_kind_display_uses_conventional_names() {
        assert_eq!(ErrorKind::CircularImport.to_string(), "CircularImportError");
        assert_eq!(ErrorKind::Parse.to_string(), "ParseError");
        assert_eq!(ErrorKind::NotAllowed.to_string(), "NotAllowedError");
    }

    #[test]
    fn reporting_frame_prefers_matching_script() {
        let lib = ScriptOrigin::new("lib", "x = 1\n");
        let main = ScriptOrigin::new("main", "u = 2\nv = 3\n");
        let mut raise = Raise::type_error("boom");
        raise.push_frame(&lib, CodeLoc::new(1, 1));
        raise.push_frame(&main, CodeLoc::new(2, 1));

        let frame = raise.reporting_frame("main").expect("frame");
        assert_eq!(frame.loc.line, 2);
        // No frame for an unknown script: fall back to the outermost.
        let frame = raise.reporting_frame("other").expect("frame");
        assert_eq!(frame.origin.display_name, "main");
    }

    #[test]
    fn line_text_strips_newline() {
        let origin = ScriptOrigin::new("s", "a = 1\nb = 2\n");
        assert_eq!(origin.line_text(2).as_deref(), Some("b = 2"));
        assert_eq!(origin.line_text(9), None);
    }
}
