use std::rc::Rc;

use ahash::AHashSet;

use crate::error::CodeLoc;

/// An identifier occurrence with its source location.
#[derive(Debug, Clone)]
pub(crate) struct Identifier {
    pub name: Rc<str>,
    pub loc: CodeLoc,
}

/// A literal constant in the source.
#[derive(Debug, Clone)]
pub(crate) enum Literal {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Rc<str>),
}

/// Binary operators of the executed subset.
///
/// `And`/`Or` live here too; the evaluator special-cases them for
/// short-circuiting before the right operand is touched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Operator {
    Add,
    Sub,
    Mult,
    Div,
    FloorDiv,
    Mod,
    Pow,
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CmpOperator {
    Eq,
    NotEq,
    Lt,
    LtE,
    Gt,
    GtE,
    Is,
    IsNot,
    In,
    NotIn,
}

/// One component of an f-string.
#[derive(Debug, Clone)]
pub(crate) enum FStringPart {
    Literal(Rc<str>),
    /// A `{expr}` interpolation, rendered with `str()` semantics.
    Expr(Box<ExprLoc>),
}

/// Call arguments: positionals plus `key=value` keywords.
#[derive(Debug, Clone, Default)]
pub(crate) struct ArgExprs {
    pub pos: Vec<ExprLoc>,
    pub kwargs: Vec<(Rc<str>, ExprLoc)>,
}

/// A function parameter with an optional default expression.
///
/// Defaults are evaluated once, when the `def` executes, matching Python.
#[derive(Debug, Clone)]
pub(crate) struct Param {
    pub name: Rc<str>,
    pub default: Option<ExprLoc>,
}

/// A lowered function definition (`def` or `lambda`).
///
/// `global_names` and `assigned_names` are computed at lowering time from the
/// direct body (nested definitions excluded) so the evaluator can apply
/// Python's whole-body binding rule without re-walking the tree per call.
#[derive(Debug)]
pub(crate) struct FunctionDef {
    pub name: Rc<str>,
    pub params: Vec<Param>,
    pub body: Vec<Node>,
    pub loc: CodeLoc,
    /// Names declared `global` anywhere in the direct body.
    pub global_names: AHashSet<Rc<str>>,
    /// Names assigned anywhere in the direct body and not declared `global`.
    pub assigned_names: AHashSet<Rc<str>>,
}

/// An expression with its source location.
#[derive(Debug, Clone)]
pub(crate) struct ExprLoc {
    pub loc: CodeLoc,
    pub expr: Expr,
}

impl ExprLoc {
    pub fn new(loc: CodeLoc, expr: Expr) -> Self {
        Self { loc, expr }
    }
}

#[derive(Debug, Clone)]
pub(crate) enum Expr {
    Literal(Literal),
    Name(Identifier),
    FString(Vec<FStringPart>),
    /// A call whose callee is an arbitrary expression (usually a name).
    Call {
        callable: Box<ExprLoc>,
        args: ArgExprs,
    },
    /// A method-style call, `obj.attr(args)`. Kept separate from
    /// [`Expr::Call`] so namespace dispatch never materializes a bound
    /// method value.
    AttrCall {
        object: Box<ExprLoc>,
        attr: Rc<str>,
        args: ArgExprs,
    },
    AttrGet {
        object: Box<ExprLoc>,
        attr: Rc<str>,
    },
    Op {
        left: Box<ExprLoc>,
        op: Operator,
        right: Box<ExprLoc>,
    },
    /// Comparison chain: `a < b <= c` evaluates each operand once and
    /// short-circuits on the first false link.
    Cmp {
        left: Box<ExprLoc>,
        comparisons: Vec<(CmpOperator, ExprLoc)>,
    },
    Not(Box<ExprLoc>),
    UnaryMinus(Box<ExprLoc>),
    UnaryPlus(Box<ExprLoc>),
    List(Vec<ExprLoc>),
    Tuple(Vec<ExprLoc>),
    Dict(Vec<(ExprLoc, ExprLoc)>),
    Subscript {
        object: Box<ExprLoc>,
        index: Box<ExprLoc>,
    },
    /// Conditional expression: `body if test else orelse`.
    Ternary {
        test: Box<ExprLoc>,
        body: Box<ExprLoc>,
        orelse: Box<ExprLoc>,
    },
    Lambda(Rc<FunctionDef>),
}

/// The left-hand side of an assignment.
#[derive(Debug, Clone)]
pub(crate) enum AssignTarget {
    Name(Identifier),
    /// `a, b = …` — names only, no nesting.
    Tuple(Vec<Identifier>),
    Subscript {
        object: ExprLoc,
        index: ExprLoc,
        loc: CodeLoc,
    },
}

/// A lowered statement.
#[derive(Debug, Clone)]
pub(crate) enum Node {
    FunctionDef(Rc<FunctionDef>),
    Assign {
        target: AssignTarget,
        value: ExprLoc,
    },
    /// Augmented assignment to a plain name: `x += v`.
    OpAssign {
        target: Identifier,
        op: Operator,
        value: ExprLoc,
    },
    /// Augmented assignment through a subscript: `xs[i] += v`.
    OpAssignSubscr {
        object: ExprLoc,
        index: ExprLoc,
        op: Operator,
        value: ExprLoc,
        loc: CodeLoc,
    },
    Global {
        names: Vec<Rc<str>>,
        loc: CodeLoc,
    },
    Return {
        value: Option<ExprLoc>,
        loc: CodeLoc,
    },
    If {
        test: ExprLoc,
        body: Vec<Node>,
        or_else: Vec<Node>,
    },
    While {
        test: ExprLoc,
        body: Vec<Node>,
        or_else: Vec<Node>,
    },
    For {
        target: ForTarget,
        iter: ExprLoc,
        body: Vec<Node>,
        or_else: Vec<Node>,
    },
    Break(CodeLoc),
    Continue(CodeLoc),
    Expr(ExprLoc),
    Pass,
}

/// Loop variable(s) of a `for` statement.
#[derive(Debug, Clone)]
pub(crate) enum ForTarget {
    Name(Identifier),
    Tuple(Vec<Identifier>),
}

impl Node {
    /// Location of the statement, where one is recorded.
    pub fn loc(&self) -> Option<CodeLoc> {
        match self {
            Self::FunctionDef(def) => Some(def.loc),
            Self::Assign { value, .. } | Self::OpAssign { value, .. } => Some(value.loc),
            Self::OpAssignSubscr { loc, .. }
            | Self::Global { loc, .. }
            | Self::Return { loc, .. }
            | Self::Break(loc)
            | Self::Continue(loc) => Some(*loc),
            Self::If { test, .. } | Self::While { test, .. } => Some(test.loc),
            Self::For { iter, .. } => Some(iter.loc),
            Self::Expr(expr) => Some(expr.loc),
            Self::Pass => None,
        }
    }
}
