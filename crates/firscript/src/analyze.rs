use indexmap::{IndexMap, IndexSet};

use crate::{
    error::{CodeLoc, ErrorKind, ScriptError},
    expressions::{AssignTarget, Expr, ExprLoc, FStringPart, Node},
    script::{ScriptKind, ScriptMetadata},
};

/// Names of the two functions a strategy/indicator must define.
pub(crate) const SETUP_FN: &str = "setup";
pub(crate) const PROCESS_FN: &str = "process";

/// The top-level binding a library exposes.
pub(crate) const EXPORT_NAME: &str = "export";

/// The capability name scripts call to resolve other scripts.
pub(crate) const IMPORT_SCRIPT: &str = "import_script";

/// Whether a name uses the reserved dunder spelling (`__…__`).
pub(crate) fn is_reserved_name(name: &str) -> bool {
    name.len() >= 4 && name.starts_with("__") && name.ends_with("__")
}

/// Classifies and validates a lowered script, producing its metadata.
///
/// This is the second half of parsing: the tree is walked to determine the
/// script kind (or check a requested one), extract exports and import
/// aliases, and enforce the structural rules of the scripting discipline.
pub(crate) fn analyze(
    nodes: &[Node],
    source_id: &str,
    kind_hint: Option<ScriptKind>,
) -> Result<ScriptMetadata, ScriptError> {
    let analyzer = Analyzer { source_id, nodes };
    analyzer.run(kind_hint)
}

struct Analyzer<'a> {
    source_id: &'a str,
    nodes: &'a [Node],
}

impl Analyzer<'_> {
    fn run(&self, kind_hint: Option<ScriptKind>) -> Result<ScriptMetadata, ScriptError> {
        let has_setup = self.has_top_level_fn(SETUP_FN);
        let has_process = self.has_top_level_fn(PROCESS_FN);
        let strategy_use = self.find_attr_root("strategy");
        let export_assigns = self.top_level_assigns_to(EXPORT_NAME);

        let kind = self.classify(kind_hint, has_setup, has_process, strategy_use.is_some(), !export_assigns.is_empty())?;

        match kind {
            ScriptKind::Strategy => {
                if !(has_setup && has_process) {
                    return Err(self.error(
                        ErrorKind::MissingRequiredFunctions,
                        "a strategy must define both setup() and process() at top level",
                        CodeLoc::new(1, 1),
                    ));
                }
            }
            ScriptKind::Indicator => {
                if !(has_setup && has_process) {
                    return Err(self.error(
                        ErrorKind::MissingRequiredFunctions,
                        "an indicator must define both setup() and process() at top level",
                        CodeLoc::new(1, 1),
                    ));
                }
                if let Some(loc) = strategy_use {
                    return Err(self.error(
                        ErrorKind::StrategyFunctionInIndicator,
                        "indicators may not use the strategy namespace",
                        loc,
                    ));
                }
            }
            ScriptKind::Library => {
                if has_setup || has_process {
                    return Err(self.error(
                        ErrorKind::ConflictingKind,
                        "a library may not define setup() or process()",
                        CodeLoc::new(1, 1),
                    ));
                }
                if let Some(loc) = strategy_use {
                    return Err(self.error(
                        ErrorKind::StrategyFunctionInIndicator,
                        "libraries may not use the strategy namespace",
                        loc,
                    ));
                }
                match export_assigns.as_slice() {
                    [] => {
                        return Err(self.error(
                            ErrorKind::NoExports,
                            "a library must assign export exactly once at top level",
                            CodeLoc::new(1, 1),
                        ));
                    }
                    [_] => {}
                    [.., last] => {
                        return Err(self.error(
                            ErrorKind::MultipleExports,
                            "a library must assign export exactly once at top level",
                            *last,
                        ));
                    }
                }
            }
        }

        self.check_input_discipline()?;
        self.check_reserved_names()?;
        if matches!(kind, ScriptKind::Strategy | ScriptKind::Indicator) {
            self.check_top_level_assignments()?;
        }

        let (exports, imports) = self.extract_bindings(kind);
        if let Some((alias, loc)) = imports
            .iter()
            .find_map(|(alias, name)| (name.as_str() == self.source_id).then_some(alias))
            .and_then(|alias| self.import_binding_loc(alias).map(|loc| (alias.clone(), loc)))
        {
            return Err(self.error(
                ErrorKind::CircularImport,
                format!("script '{}' imports itself (as '{alias}')", self.source_id),
                loc,
            ));
        }

        Ok(ScriptMetadata {
            id: self.source_id.to_owned(),
            name: None,
            kind,
            exports,
            imports,
        })
    }

    fn classify(
        &self,
        kind_hint: Option<ScriptKind>,
        has_setup: bool,
        has_process: bool,
        uses_strategy: bool,
        has_export: bool,
    ) -> Result<ScriptKind, ScriptError> {
        let inferred = if has_setup && has_process {
            Some(if uses_strategy {
                ScriptKind::Strategy
            } else {
                ScriptKind::Indicator
            })
        } else if !has_setup && !has_process && has_export {
            Some(ScriptKind::Library)
        } else {
            None
        };

        let origin = CodeLoc::new(1, 1);
        match (inferred, kind_hint) {
            (Some(kind), None) => Ok(kind),
            (Some(kind), Some(hint)) if kind == hint => Ok(kind),
            (Some(kind), Some(hint)) => Err(self.error(
                ErrorKind::ConflictingKind,
                format!("script classifies as {kind} but {hint} was requested"),
                origin,
            )),
            (None, Some(hint)) => Ok(hint),
            (None, None) => {
                if has_setup || has_process {
                    let missing = if has_setup { PROCESS_FN } else { SETUP_FN };
                    Err(self.error(
                        ErrorKind::ConflictingKind,
                        format!("script defines {}() but not {missing}()", if has_setup { SETUP_FN } else { PROCESS_FN }),
                        origin,
                    ))
                } else {
                    Err(self.error(
                        ErrorKind::MissingKind,
                        "script defines neither setup()/process() nor a top-level export",
                        origin,
                    ))
                }
            }
        }
    }

    fn error(&self, kind: ErrorKind, message: impl Into<String>, loc: CodeLoc) -> ScriptError {
        ScriptError::parse(kind, self.source_id, message, Some(loc))
    }

    fn has_top_level_fn(&self, name: &str) -> bool {
        self.nodes
            .iter()
            .any(|node| matches!(node, Node::FunctionDef(def) if &*def.name == name))
    }

    /// Locations of every top-level assignment whose target is `name`.
    fn top_level_assigns_to(&self, name: &str) -> Vec<CodeLoc> {
        self.nodes
            .iter()
            .filter_map(|node| match node {
                Node::Assign {
                    target: AssignTarget::Name(target),
                    ..
                } if &*target.name == name => Some(target.loc),
                Node::Assign {
                    target: AssignTarget::Tuple(targets),
                    ..
                } => targets.iter().find(|t| &*t.name == name).map(|t| t.loc),
                _ => None,
            })
            .collect()
    }

    /// First attribute access anywhere in the tree whose root identifier is
    /// `root` (e.g. `strategy` in `strategy.long()` or `strategy.pos.size`).
    fn find_attr_root(&self, root: &str) -> Option<CodeLoc> {
        let mut found = None;
        walk_exprs(self.nodes, &mut |expr| {
            if found.is_none()
                && let Some(ident) = attr_chain_root(expr)
                && &*ident.name == root
            {
                found = Some(expr.loc);
            }
        });
        found
    }

    /// `input.*` calls are only legal inside the top-level `setup` body.
    fn check_input_discipline(&self) -> Result<(), ScriptError> {
        let mut offending = None;
        for node in self.nodes {
            if let Node::FunctionDef(def) = node
                && &*def.name == SETUP_FN
            {
                continue;
            }
            find_input_call(std::slice::from_ref(node), &mut offending);
        }
        if let Some(loc) = offending {
            return Err(self.error(
                ErrorKind::InvalidInputUsage,
                "input declarations are only allowed inside setup()",
                loc,
            ));
        }
        Ok(())
    }

    /// Reserved `__…__` spellings may not be bound at top level, exported by
    /// name, or used as string keys in an exported dict literal.
    fn check_reserved_names(&self) -> Result<(), ScriptError> {
        for node in self.nodes {
            match node {
                Node::FunctionDef(def) => {
                    if is_reserved_name(&def.name) {
                        return Err(self.reserved(&def.name, def.loc));
                    }
                }
                Node::Assign { target, value } => {
                    let targets: Vec<_> = match target {
                        AssignTarget::Name(name) => vec![name],
                        AssignTarget::Tuple(names) => names.iter().collect(),
                        AssignTarget::Subscript { .. } => vec![],
                    };
                    for ident in &targets {
                        if is_reserved_name(&ident.name) {
                            return Err(self.reserved(&ident.name, ident.loc));
                        }
                    }
                    if targets.iter().any(|t| &*t.name == EXPORT_NAME) {
                        self.check_export_value(value)?;
                    }
                }
                Node::OpAssign { target, .. } => {
                    if is_reserved_name(&target.name) {
                        return Err(self.reserved(&target.name, target.loc));
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Checks the right-hand side of an `export = …` assignment.
    fn check_export_value(&self, value: &ExprLoc) -> Result<(), ScriptError> {
        match &value.expr {
            Expr::Name(ident) if is_reserved_name(&ident.name) => Err(self.reserved(&ident.name, ident.loc)),
            Expr::Dict(pairs) => {
                for (key, _) in pairs {
                    if let Expr::Literal(crate::expressions::Literal::Str(key_str)) = &key.expr
                        && is_reserved_name(key_str)
                    {
                        return Err(self.reserved(key_str, key.loc));
                    }
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn reserved(&self, name: &str, loc: CodeLoc) -> ScriptError {
        self.error(
            ErrorKind::ReservedVariableName,
            format!("'{name}' uses a reserved dunder name"),
            loc,
        )
    }

    /// Strategies and indicators may only bind functions, `export`, and
    /// `import_script` aliases at top level.
    fn check_top_level_assignments(&self) -> Result<(), ScriptError> {
        for node in self.nodes {
            let loc = match node {
                Node::Assign {
                    target: AssignTarget::Name(target),
                    value,
                } => {
                    if &*target.name == EXPORT_NAME || is_import_script_call(value) {
                        continue;
                    }
                    target.loc
                }
                Node::Assign { target: AssignTarget::Tuple(targets), .. } => {
                    targets.first().map_or(CodeLoc::new(1, 1), |t| t.loc)
                }
                Node::Assign {
                    target: AssignTarget::Subscript { loc, .. },
                    ..
                } => *loc,
                Node::OpAssign { target, .. } => target.loc,
                Node::OpAssignSubscr { loc, .. } => *loc,
                _ => continue,
            };
            return Err(self.error(
                ErrorKind::StrategyGlobalVariable,
                "top-level variables are not allowed in strategies and indicators; declare state inside setup() with global",
                loc,
            ));
        }
        Ok(())
    }

    /// Collects exported names and `alias = import_script("name")` bindings.
    fn extract_bindings(&self, kind: ScriptKind) -> (IndexSet<String>, IndexMap<String, String>) {
        let mut exports = IndexSet::new();
        let mut imports = IndexMap::new();
        for node in self.nodes {
            match node {
                Node::Assign {
                    target: AssignTarget::Name(target),
                    value,
                } => {
                    if let Some(name) = import_script_target(value) {
                        imports.insert(target.name.to_string(), name);
                    } else if kind == ScriptKind::Library || &*target.name == EXPORT_NAME {
                        exports.insert(target.name.to_string());
                    }
                }
                Node::Assign {
                    target: AssignTarget::Tuple(targets),
                    ..
                } if kind == ScriptKind::Library => {
                    exports.extend(targets.iter().map(|t| t.name.to_string()));
                }
                Node::FunctionDef(def) if kind == ScriptKind::Library => {
                    exports.insert(def.name.to_string());
                }
                _ => {}
            }
        }
        (exports, imports)
    }

    fn import_binding_loc(&self, alias: &str) -> Option<CodeLoc> {
        self.nodes.iter().find_map(|node| match node {
            Node::Assign {
                target: AssignTarget::Name(target),
                ..
            } if &*target.name == alias => Some(target.loc),
            _ => None,
        })
    }
}

/// Root identifier of an attribute chain, if the expression is one.
fn attr_chain_root(expr: &ExprLoc) -> Option<&crate::expressions::Identifier> {
    let mut object = match &expr.expr {
        Expr::AttrGet { object, .. } | Expr::AttrCall { object, .. } => object,
        _ => return None,
    };
    loop {
        match &object.expr {
            Expr::AttrGet { object: inner, .. } | Expr::AttrCall { object: inner, .. } => object = inner,
            Expr::Name(ident) => return Some(ident),
            _ => return None,
        }
    }
}

/// Whether the expression is a call of the form `import_script(…)`.
fn is_import_script_call(expr: &ExprLoc) -> bool {
    matches!(
        &expr.expr,
        Expr::Call { callable, .. } if matches!(&callable.expr, Expr::Name(ident) if &*ident.name == IMPORT_SCRIPT)
    )
}

/// Extracts the script name from `import_script("name")` when the sole
/// argument is a string literal. Opaque argument forms still work at
/// runtime; they are just not recorded in the metadata.
fn import_script_target(expr: &ExprLoc) -> Option<String> {
    if let Expr::Call { callable, args } = &expr.expr
        && let Expr::Name(ident) = &callable.expr
        && &*ident.name == IMPORT_SCRIPT
        && args.kwargs.is_empty()
        && let [arg] = args.pos.as_slice()
        && let Expr::Literal(crate::expressions::Literal::Str(name)) = &arg.expr
    {
        return Some(name.to_string());
    }
    None
}

/// Records the first `input.*` call found outside a permitted position.
fn find_input_call(nodes: &[Node], offending: &mut Option<CodeLoc>) {
    walk_exprs(nodes, &mut |expr| {
        if offending.is_none()
            && matches!(&expr.expr, Expr::AttrCall { .. })
            && let Some(ident) = attr_chain_root(expr)
            && &*ident.name == "input"
        {
            *offending = Some(expr.loc);
        }
    });
}

/// Calls `f` for every expression in the statements, including expressions
/// nested inside function bodies and lambdas.
fn walk_exprs(nodes: &[Node], f: &mut impl FnMut(&ExprLoc)) {
    for node in nodes {
        match node {
            Node::FunctionDef(def) => {
                for param in &def.params {
                    if let Some(default) = &param.default {
                        walk_expr(default, f);
                    }
                }
                walk_exprs(&def.body, f);
            }
            Node::Assign { target, value } => {
                if let AssignTarget::Subscript { object, index, .. } = target {
                    walk_expr(object, f);
                    walk_expr(index, f);
                }
                walk_expr(value, f);
            }
            Node::OpAssign { value, .. } => walk_expr(value, f),
            Node::OpAssignSubscr {
                object, index, value, ..
            } => {
                walk_expr(object, f);
                walk_expr(index, f);
                walk_expr(value, f);
            }
            Node::Return { value, .. } => {
                if let Some(value) = value {
                    walk_expr(value, f);
                }
            }
            Node::If { test, body, or_else } | Node::While { test, body, or_else } => {
                walk_expr(test, f);
                walk_exprs(body, f);
                walk_exprs(or_else, f);
            }
            Node::For { iter, body, or_else, .. } => {
                walk_expr(iter, f);
                walk_exprs(body, f);
                walk_exprs(or_else, f);
            }
            Node::Expr(expr) => walk_expr(expr, f),
            Node::Global { .. } | Node::Break(_) | Node::Continue(_) | Node::Pass => {}
        }
    }
}

fn walk_expr(expr: &ExprLoc, f: &mut impl FnMut(&ExprLoc)) {
    f(expr);
    match &expr.expr {
        Expr::Literal(_) | Expr::Name(_) => {}
        Expr::FString(parts) => {
            for part in parts {
                if let FStringPart::Expr(inner) = part {
                    walk_expr(inner, f);
                }
            }
        }
        Expr::Call { callable, args } => {
            walk_expr(callable, f);
            walk_args(args, f);
        }
        Expr::AttrCall { object, args, .. } => {
            walk_expr(object, f);
            walk_args(args, f);
        }
        Expr::AttrGet { object, .. } => walk_expr(object, f),
        Expr::Op { left, right, .. } => {
            walk_expr(left, f);
            walk_expr(right, f);
        }
        Expr::Cmp { left, comparisons } => {
            walk_expr(left, f);
            for (_, comparator) in comparisons {
                walk_expr(comparator, f);
            }
        }
        Expr::Not(inner) | Expr::UnaryMinus(inner) | Expr::UnaryPlus(inner) => walk_expr(inner, f),
        Expr::List(items) | Expr::Tuple(items) => {
            for item in items {
                walk_expr(item, f);
            }
        }
        Expr::Dict(pairs) => {
            for (key, value) in pairs {
                walk_expr(key, f);
                walk_expr(value, f);
            }
        }
        Expr::Subscript { object, index } => {
            walk_expr(object, f);
            walk_expr(index, f);
        }
        Expr::Ternary { test, body, orelse } => {
            walk_expr(test, f);
            walk_expr(body, f);
            walk_expr(orelse, f);
        }
        Expr::Lambda(def) => {
            for param in &def.params {
                if let Some(default) = &param.default {
                    walk_expr(default, f);
                }
            }
            walk_exprs(&def.body, f);
        }
    }
}

fn walk_args(args: &crate::expressions::ArgExprs, f: &mut impl FnMut(&ExprLoc)) {
    for arg in &args.pos {
        walk_expr(arg, f);
    }
    for (_, arg) in &args.kwargs {
        walk_expr(arg, f);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse::parse_program;

    fn analyze_src(source: &str, kind: Option<ScriptKind>) -> Result<ScriptMetadata, ScriptError> {
        let nodes = parse_program(source).map_err(|e| e.into_script_error("test"))?;
        analyze(&nodes, "test", kind)
    }

    #[test]
    fn classifies_indicator() {
        let meta = analyze_src("def setup():\n    pass\n\ndef process():\n    return ta.sma(data.close, 3)\n", None)
            .expect("indicator");
        assert_eq!(meta.kind, ScriptKind::Indicator);
    }

    #[test]
    fn classifies_strategy_on_any_strategy_reference() {
        let meta = analyze_src(
            "def setup():\n    pass\n\ndef process():\n    strategy.long()\n",
            None,
        )
        .expect("strategy");
        assert_eq!(meta.kind, ScriptKind::Strategy);
    }

    #[test]
    fn classifies_library() {
        let meta = analyze_src("export = {\"a\": 1}\n", None).expect("library");
        assert_eq!(meta.kind, ScriptKind::Library);
        assert!(meta.exports.contains("export"));
    }

    #[test]
    fn setup_without_process_is_conflicting() {
        let err = analyze_src("def setup():\n    pass\n", None).expect_err("conflict");
        assert_eq!(err.kind(), ErrorKind::ConflictingKind);
    }

    #[test]
    fn empty_script_has_missing_kind() {
        let err = analyze_src("x = 1\n", None).expect_err("missing");
        assert_eq!(err.kind(), ErrorKind::MissingKind);
    }

    #[test]
    fn import_aliases_are_recorded() {
        let meta = analyze_src(
            "util = import_script(\"util\")\n\ndef setup():\n    pass\n\ndef process():\n    pass\n",
            None,
        )
        .expect("indicator");
        assert_eq!(meta.imports.get("util").map(String::as_str), Some("util"));
    }

    #[test]
    fn self_import_is_a_static_cycle() {
        let err = analyze_src(
            "me = import_script(\"test\")\n\ndef setup():\n    pass\n\ndef process():\n    pass\n",
            None,
        )
        .expect_err("cycle");
        assert_eq!(err.kind(), ErrorKind::CircularImport);
    }

    #[test]
    fn reserved_name_patterns() {
        assert!(is_reserved_name("__x__"));
        assert!(is_reserved_name("__name__"));
        assert!(!is_reserved_name("__x"));
        assert!(!is_reserved_name("x__"));
        assert!(!is_reserved_name("export"));
    }
}
