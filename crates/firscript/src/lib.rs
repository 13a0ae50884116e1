#![doc = include_str!("../../../README.md")]

mod analyze;
mod builtins;
mod context;
mod error;
mod eval;
mod expressions;
mod importer;
mod io;
mod namespace;
pub mod namespaces;
mod parse;
mod registry;
mod script;
mod value;

pub use crate::{
    builtins::{Builtins, DeniedBuiltin},
    context::ExecutionContext,
    error::{CodeLoc, ErrorKind, ExcKind, FrameLoc, Raise, RunError, RunResult, ScriptError, ScriptOrigin, ScriptResult},
    importer::Importer,
    io::{CollectLog, CollectStringPrint, LogLevel, LogSink, NoPrint, PrintWriter, StderrLog, StdPrint},
    namespace::{Namespace, NamespaceHandle, SharedDict},
    registry::NamespaceRegistry,
    script::{Script, ScriptKind, ScriptMetadata, ScriptParser},
    value::{AttrView, CallArgs, Dict, DictKey, NativeFunction, ScriptFunction, Value, ValueIter},
};
