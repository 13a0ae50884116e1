use std::{borrow::Cow, rc::Rc};

use ahash::AHashSet;
use ruff_python_ast::{
    self as ast, BoolOp, CmpOp, Expr as AstExpr, InterpolatedStringElement, Number, Operator as AstOperator, Stmt,
    UnaryOp,
};
use ruff_python_parser::parse_module;
use ruff_text_size::{Ranged, TextRange};

use crate::{
    error::{CodeLoc, ErrorKind, ScriptError},
    expressions::{
        ArgExprs, AssignTarget, CmpOperator, Expr, ExprLoc, ForTarget, FStringPart, FunctionDef, Identifier, Literal,
        Node, Operator, Param,
    },
};

/// Maximum nesting depth for AST structures during lowering, preventing
/// stack overflow on pathological inputs like `((((x,),),),)`.
pub(crate) const MAX_NESTING_DEPTH: u16 = 150;

/// A failure while lowering source into the executable tree.
///
/// Both surface-syntax failures and uses of constructs outside the embedded
/// subset surface as the same public error family.
#[derive(Debug, Clone)]
pub(crate) struct ParseFailure {
    pub message: Cow<'static, str>,
    pub loc: CodeLoc,
}

impl ParseFailure {
    pub(crate) fn syntax(message: impl Into<Cow<'static, str>>, loc: CodeLoc) -> Self {
        Self {
            message: message.into(),
            loc,
        }
    }

    fn not_supported(what: impl std::fmt::Display, loc: CodeLoc) -> Self {
        Self {
            message: format!("{what} is not supported in scripts").into(),
            loc,
        }
    }

    pub(crate) fn into_script_error(self, source_id: &str) -> ScriptError {
        ScriptError::parse(ErrorKind::Parse, source_id, self.message, Some(self.loc))
    }
}

/// Parses source text into the lowered statement tree.
pub(crate) fn parse_program(code: &str) -> Result<Vec<Node>, ParseFailure> {
    let mut parser = Parser::new(code);
    let parsed =
        parse_module(code).map_err(|e| ParseFailure::syntax(e.to_string(), parser.convert_range(e.range())))?;
    let module = parsed.into_syntax();
    parser.parse_statements(module.body)
}

pub(crate) struct Parser<'a> {
    line_ends: Vec<usize>,
    code: &'a str,
    /// Remaining nesting depth budget for recursive structures.
    depth_remaining: u16,
}

impl<'a> Parser<'a> {
    fn new(code: &'a str) -> Self {
        // Position of each line break, to convert byte offsets into
        // line/column numbers.
        let mut line_ends = vec![];
        for (i, c) in code.char_indices() {
            if c == '\n' {
                line_ends.push(i);
            }
        }
        Self {
            line_ends,
            code,
            depth_remaining: MAX_NESTING_DEPTH,
        }
    }

    fn convert_range(&self, range: TextRange) -> CodeLoc {
        let start = usize::from(range.start());
        let (line_no, line_start) = self.index_to_position(start);
        let col = self.code[line_start..start].chars().count() + 1;
        CodeLoc::new(
            u32::try_from(line_no + 1).unwrap_or(u32::MAX),
            u32::try_from(col).unwrap_or(u32::MAX),
        )
    }

    /// Maps a byte offset to `(0-based line, line start offset)`.
    fn index_to_position(&self, index: usize) -> (usize, usize) {
        let mut line_start = 0;
        for (line_no, line_end) in self.line_ends.iter().enumerate() {
            if index <= *line_end {
                return (line_no, line_start);
            }
            line_start = *line_end + 1;
        }
        (self.line_ends.len(), line_start)
    }

    fn decr_depth_remaining(&mut self, get_range: impl FnOnce() -> TextRange) -> Result<(), ParseFailure> {
        if let Some(depth_remaining) = self.depth_remaining.checked_sub(1) {
            self.depth_remaining = depth_remaining;
            Ok(())
        } else {
            let loc = self.convert_range(get_range());
            Err(ParseFailure::syntax("too many nested expressions", loc))
        }
    }

    fn identifier(&self, name: &str, range: TextRange) -> Identifier {
        Identifier {
            name: Rc::from(name),
            loc: self.convert_range(range),
        }
    }

    fn parse_statements(&mut self, statements: Vec<Stmt>) -> Result<Vec<Node>, ParseFailure> {
        statements.into_iter().map(|s| self.parse_statement(s)).collect()
    }

    fn parse_statement(&mut self, statement: Stmt) -> Result<Node, ParseFailure> {
        self.decr_depth_remaining(|| statement.range())?;
        let result = self.parse_statement_impl(statement);
        self.depth_remaining += 1;
        result
    }

    fn parse_statement_impl(&mut self, statement: Stmt) -> Result<Node, ParseFailure> {
        match statement {
            Stmt::FunctionDef(function) => {
                let loc = self.convert_range(function.range);
                if function.is_async {
                    return Err(ParseFailure::not_supported("async def", loc));
                }
                if !function.decorator_list.is_empty() {
                    return Err(ParseFailure::not_supported("function decorators", loc));
                }
                let params = self.parse_parameters(&function.parameters)?;
                let name: Rc<str> = Rc::from(function.name.id.as_str());
                let body = self.parse_statements(function.body)?;
                Ok(Node::FunctionDef(Rc::new(make_function_def(name, params, body, loc))))
            }
            Stmt::Return(ast::StmtReturn { value, range, .. }) => {
                let loc = self.convert_range(range);
                let value = value.map(|v| self.parse_expression(*v)).transpose()?;
                Ok(Node::Return { value, loc })
            }
            Stmt::Assign(ast::StmtAssign {
                targets, value, range, ..
            }) => {
                let loc = self.convert_range(range);
                let mut targets = targets;
                if targets.len() != 1 {
                    return Err(ParseFailure::not_supported("chained assignment (a = b = …)", loc));
                }
                let target = self.parse_assign_target(targets.remove(0))?;
                let value = self.parse_expression(*value)?;
                Ok(Node::Assign { target, value })
            }
            Stmt::AugAssign(ast::StmtAugAssign {
                target,
                op,
                value,
                range,
                ..
            }) => {
                let loc = self.convert_range(range);
                let op = convert_op(op, loc)?;
                let rhs = self.parse_expression(*value)?;
                match *target {
                    AstExpr::Name(ast::ExprName {
                        id, range: name_range, ..
                    }) => Ok(Node::OpAssign {
                        target: self.identifier(id.as_str(), name_range),
                        op,
                        value: rhs,
                    }),
                    AstExpr::Subscript(ast::ExprSubscript {
                        value: obj,
                        slice,
                        range: sub_range,
                        ..
                    }) => Ok(Node::OpAssignSubscr {
                        object: self.parse_expression(*obj)?,
                        index: self.parse_expression(*slice)?,
                        op,
                        value: rhs,
                        loc: self.convert_range(sub_range),
                    }),
                    other => Err(ParseFailure::syntax(
                        format!("invalid augmented assignment target: {}", describe_expr(&other)),
                        loc,
                    )),
                }
            }
            // Annotations have no runtime effect; `x: T = v` lowers to a
            // plain assignment and a bare `x: T` to `pass`.
            Stmt::AnnAssign(ast::StmtAnnAssign { target, value, .. }) => match value {
                Some(value) => {
                    let target = self.parse_assign_target(*target)?;
                    let value = self.parse_expression(*value)?;
                    Ok(Node::Assign { target, value })
                }
                None => Ok(Node::Pass),
            },
            Stmt::For(ast::StmtFor {
                is_async,
                target,
                iter,
                body,
                orelse,
                range,
                ..
            }) => {
                if is_async {
                    return Err(ParseFailure::not_supported("async for", self.convert_range(range)));
                }
                Ok(Node::For {
                    target: self.parse_for_target(*target)?,
                    iter: self.parse_expression(*iter)?,
                    body: self.parse_statements(body)?,
                    or_else: self.parse_statements(orelse)?,
                })
            }
            Stmt::While(ast::StmtWhile { test, body, orelse, .. }) => Ok(Node::While {
                test: self.parse_expression(*test)?,
                body: self.parse_statements(body)?,
                or_else: self.parse_statements(orelse)?,
            }),
            Stmt::If(ast::StmtIf {
                test,
                body,
                elif_else_clauses,
                ..
            }) => Ok(Node::If {
                test: self.parse_expression(*test)?,
                body: self.parse_statements(body)?,
                or_else: self.parse_elif_else_clauses(elif_else_clauses)?,
            }),
            Stmt::Global(ast::StmtGlobal { names, range, .. }) => {
                let names = names.iter().map(|id| Rc::from(&self.code[id.range])).collect();
                Ok(Node::Global {
                    names,
                    loc: self.convert_range(range),
                })
            }
            Stmt::Expr(ast::StmtExpr { value, .. }) => self.parse_expression(*value).map(Node::Expr),
            Stmt::Pass(_) => Ok(Node::Pass),
            Stmt::Break(b) => Ok(Node::Break(self.convert_range(b.range))),
            Stmt::Continue(c) => Ok(Node::Continue(self.convert_range(c.range))),
            Stmt::Import(ast::StmtImport { range, .. }) | Stmt::ImportFrom(ast::StmtImportFrom { range, .. }) => {
                Err(ParseFailure::syntax(
                    "module imports are not available in scripts; use import_script(name)",
                    self.convert_range(range),
                ))
            }
            other => {
                let loc = self.convert_range(other.range());
                Err(ParseFailure::not_supported(describe_stmt(&other), loc))
            }
        }
    }

    /// Folds ruff's flat elif/else clause list into nested `If` nodes.
    fn parse_elif_else_clauses(&mut self, clauses: Vec<ast::ElifElseClause>) -> Result<Vec<Node>, ParseFailure> {
        let mut tail: Vec<Node> = Vec::new();
        for clause in clauses.into_iter().rev() {
            match clause.test {
                Some(test) => {
                    let test = self.parse_expression(test)?;
                    let body = self.parse_statements(clause.body)?;
                    let or_else = tail;
                    tail = vec![Node::If { test, body, or_else }];
                }
                None => {
                    tail = self.parse_statements(clause.body)?;
                }
            }
        }
        Ok(tail)
    }

    fn parse_assign_target(&mut self, target: AstExpr) -> Result<AssignTarget, ParseFailure> {
        match target {
            AstExpr::Name(ast::ExprName { id, range, .. }) => Ok(AssignTarget::Name(self.identifier(id.as_str(), range))),
            AstExpr::Tuple(ast::ExprTuple { elts, range, .. }) | AstExpr::List(ast::ExprList { elts, range, .. }) => {
                let names = elts
                    .into_iter()
                    .map(|elt| match elt {
                        AstExpr::Name(ast::ExprName { id, range, .. }) => Ok(self.identifier(id.as_str(), range)),
                        other => Err(ParseFailure::not_supported(
                            "nested unpacking targets",
                            self.convert_range(other.range()),
                        )),
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                if names.is_empty() {
                    return Err(ParseFailure::syntax("empty assignment target", self.convert_range(range)));
                }
                Ok(AssignTarget::Tuple(names))
            }
            AstExpr::Subscript(ast::ExprSubscript {
                value, slice, range, ..
            }) => Ok(AssignTarget::Subscript {
                object: self.parse_expression(*value)?,
                index: self.parse_expression(*slice)?,
                loc: self.convert_range(range),
            }),
            AstExpr::Attribute(ast::ExprAttribute { range, .. }) => Err(ParseFailure::not_supported(
                "attribute assignment",
                self.convert_range(range),
            )),
            other => Err(ParseFailure::syntax(
                format!("invalid assignment target: {}", describe_expr(&other)),
                self.convert_range(other.range()),
            )),
        }
    }

    fn parse_for_target(&mut self, target: AstExpr) -> Result<ForTarget, ParseFailure> {
        match self.parse_assign_target(target)? {
            AssignTarget::Name(name) => Ok(ForTarget::Name(name)),
            AssignTarget::Tuple(names) => Ok(ForTarget::Tuple(names)),
            AssignTarget::Subscript { loc, .. } => Err(ParseFailure::not_supported("subscript loop targets", loc)),
        }
    }

    fn parse_parameters(&mut self, params: &ast::Parameters) -> Result<Vec<Param>, ParseFailure> {
        let loc = self.convert_range(params.range);
        if params.vararg.is_some() || params.kwarg.is_some() {
            return Err(ParseFailure::not_supported("*args/**kwargs parameters", loc));
        }
        if !params.kwonlyargs.is_empty() {
            return Err(ParseFailure::not_supported("keyword-only parameters", loc));
        }
        params
            .posonlyargs
            .iter()
            .chain(params.args.iter())
            .map(|p| {
                let default = match &p.default {
                    Some(expr) => Some(self.parse_expression((**expr).clone())?),
                    None => None,
                };
                Ok(Param {
                    name: Rc::from(p.parameter.name.id.as_str()),
                    default,
                })
            })
            .collect()
    }

    fn parse_expressions(&mut self, exprs: Vec<AstExpr>) -> Result<Vec<ExprLoc>, ParseFailure> {
        exprs.into_iter().map(|e| self.parse_expression(e)).collect()
    }

    fn parse_expression(&mut self, expression: AstExpr) -> Result<ExprLoc, ParseFailure> {
        self.decr_depth_remaining(|| expression.range())?;
        let result = self.parse_expression_impl(expression);
        self.depth_remaining += 1;
        result
    }

    fn parse_expression_impl(&mut self, expression: AstExpr) -> Result<ExprLoc, ParseFailure> {
        match expression {
            AstExpr::BoolOp(ast::ExprBoolOp { op, values, range, .. }) => {
                // Right-fold `a and b and c` into nested binary operations so
                // evaluation can short-circuit pairwise.
                let op = convert_bool_op(op);
                let loc = self.convert_range(range);
                let mut values_iter = values.into_iter().rev();
                let last = values_iter.next().expect("boolean op with no operands");
                let mut result = self.parse_expression(last)?;
                for value in values_iter {
                    let left = Box::new(self.parse_expression(value)?);
                    result = ExprLoc::new(
                        loc,
                        Expr::Op {
                            left,
                            op,
                            right: Box::new(result),
                        },
                    );
                }
                Ok(result)
            }
            AstExpr::BinOp(ast::ExprBinOp {
                left, op, right, range, ..
            }) => {
                let loc = self.convert_range(range);
                let left = Box::new(self.parse_expression(*left)?);
                let right = Box::new(self.parse_expression(*right)?);
                let op = convert_op(op, loc)?;
                Ok(ExprLoc::new(loc, Expr::Op { left, op, right }))
            }
            AstExpr::UnaryOp(ast::ExprUnaryOp { op, operand, range, .. }) => {
                let loc = self.convert_range(range);
                // Fold `-` applied directly to a numeric literal into the
                // literal itself. The range check must see the negated value:
                // the magnitude of i64::MIN on its own exceeds i64::MAX, so
                // `-9223372036854775808` would otherwise be rejected even
                // though it is in range.
                if matches!(op, UnaryOp::USub)
                    && let AstExpr::NumberLiteral(ast::ExprNumberLiteral { value, .. }) = &*operand
                {
                    match value {
                        Number::Int(i) => {
                            let negated = match i.as_i64() {
                                Some(v) => -v,
                                None => match parse_int_magnitude(&i.to_string()) {
                                    Some(magnitude) if magnitude == 1u128 << 63 => i64::MIN,
                                    _ => {
                                        return Err(ParseFailure::syntax(
                                            format!("integer literal out of supported range: -{i}"),
                                            loc,
                                        ));
                                    }
                                },
                            };
                            return Ok(ExprLoc::new(loc, Expr::Literal(Literal::Int(negated))));
                        }
                        Number::Float(f) => {
                            return Ok(ExprLoc::new(loc, Expr::Literal(Literal::Float(-f))));
                        }
                        Number::Complex { .. } => {}
                    }
                }
                let operand = Box::new(self.parse_expression(*operand)?);
                match op {
                    UnaryOp::Not => Ok(ExprLoc::new(loc, Expr::Not(operand))),
                    UnaryOp::USub => Ok(ExprLoc::new(loc, Expr::UnaryMinus(operand))),
                    UnaryOp::UAdd => Ok(ExprLoc::new(loc, Expr::UnaryPlus(operand))),
                    UnaryOp::Invert => Err(ParseFailure::not_supported("the ~ operator", loc)),
                }
            }
            AstExpr::Lambda(ast::ExprLambda {
                parameters, body, range, ..
            }) => {
                let loc = self.convert_range(range);
                let params = match parameters {
                    Some(params) => self.parse_parameters(&params)?,
                    None => Vec::new(),
                };
                let body_expr = self.parse_expression(*body)?;
                let return_loc = body_expr.loc;
                let body = vec![Node::Return {
                    value: Some(body_expr),
                    loc: return_loc,
                }];
                Ok(ExprLoc::new(
                    loc,
                    Expr::Lambda(Rc::new(make_function_def(Rc::from("<lambda>"), params, body, loc))),
                ))
            }
            AstExpr::If(ast::ExprIf {
                test, body, orelse, range, ..
            }) => Ok(ExprLoc::new(
                self.convert_range(range),
                Expr::Ternary {
                    test: Box::new(self.parse_expression(*test)?),
                    body: Box::new(self.parse_expression(*body)?),
                    orelse: Box::new(self.parse_expression(*orelse)?),
                },
            )),
            AstExpr::Dict(ast::ExprDict { items, range, .. }) => {
                let loc = self.convert_range(range);
                let mut pairs = Vec::with_capacity(items.len());
                for ast::DictItem { key, value } in items {
                    let Some(key) = key else {
                        return Err(ParseFailure::not_supported("** unpacking in dict literals", loc));
                    };
                    pairs.push((self.parse_expression(key)?, self.parse_expression(value)?));
                }
                Ok(ExprLoc::new(loc, Expr::Dict(pairs)))
            }
            AstExpr::Compare(ast::ExprCompare {
                left,
                ops,
                comparators,
                range,
                ..
            }) => {
                let loc = self.convert_range(range);
                let left = Box::new(self.parse_expression(*left)?);
                let comparisons = ops
                    .into_vec()
                    .into_iter()
                    .zip(comparators.into_vec())
                    .map(|(op, comparator)| Ok((convert_compare_op(op), self.parse_expression(comparator)?)))
                    .collect::<Result<Vec<_>, ParseFailure>>()?;
                Ok(ExprLoc::new(loc, Expr::Cmp { left, comparisons }))
            }
            AstExpr::Call(ast::ExprCall {
                func, arguments, range, ..
            }) => {
                let loc = self.convert_range(range);
                let ast::Arguments { args, keywords, .. } = arguments;
                let mut pos = Vec::new();
                for arg in args.into_vec() {
                    if matches!(arg, AstExpr::Starred(_)) {
                        return Err(ParseFailure::not_supported("*args unpacking in calls", loc));
                    }
                    pos.push(self.parse_expression(arg)?);
                }
                let mut kwargs = Vec::new();
                for keyword in keywords.into_vec() {
                    let Some(key) = keyword.arg else {
                        return Err(ParseFailure::not_supported("**kwargs unpacking in calls", loc));
                    };
                    kwargs.push((Rc::from(key.id.as_str()), self.parse_expression(keyword.value)?));
                }
                let args = ArgExprs { pos, kwargs };
                match *func {
                    AstExpr::Attribute(ast::ExprAttribute { value, attr, .. }) => Ok(ExprLoc::new(
                        loc,
                        Expr::AttrCall {
                            object: Box::new(self.parse_expression(*value)?),
                            attr: Rc::from(attr.id.as_str()),
                            args,
                        },
                    )),
                    other => Ok(ExprLoc::new(
                        loc,
                        Expr::Call {
                            callable: Box::new(self.parse_expression(other)?),
                            args,
                        },
                    )),
                }
            }
            AstExpr::FString(ast::ExprFString { value, range, .. }) => self.parse_fstring(&value, range),
            AstExpr::StringLiteral(ast::ExprStringLiteral { value, range, .. }) => Ok(ExprLoc::new(
                self.convert_range(range),
                Expr::Literal(Literal::Str(Rc::from(value.to_string().as_str()))),
            )),
            AstExpr::NumberLiteral(ast::ExprNumberLiteral { value, range, .. }) => {
                let loc = self.convert_range(range);
                let literal = match value {
                    Number::Int(i) => Literal::Int(i.as_i64().ok_or_else(|| {
                        ParseFailure::syntax(format!("integer literal out of supported range: {i}"), loc)
                    })?),
                    Number::Float(f) => Literal::Float(f),
                    Number::Complex { .. } => {
                        return Err(ParseFailure::not_supported("complex literals", loc));
                    }
                };
                Ok(ExprLoc::new(loc, Expr::Literal(literal)))
            }
            AstExpr::BooleanLiteral(ast::ExprBooleanLiteral { value, range, .. }) => Ok(ExprLoc::new(
                self.convert_range(range),
                Expr::Literal(Literal::Bool(value)),
            )),
            AstExpr::NoneLiteral(ast::ExprNoneLiteral { range, .. }) => {
                Ok(ExprLoc::new(self.convert_range(range), Expr::Literal(Literal::None)))
            }
            AstExpr::Attribute(ast::ExprAttribute { value, attr, range, .. }) => Ok(ExprLoc::new(
                self.convert_range(range),
                Expr::AttrGet {
                    object: Box::new(self.parse_expression(*value)?),
                    attr: Rc::from(attr.id.as_str()),
                },
            )),
            AstExpr::Subscript(ast::ExprSubscript {
                value, slice, range, ..
            }) => {
                let loc = self.convert_range(range);
                if matches!(*slice, AstExpr::Slice(_)) {
                    return Err(ParseFailure::not_supported("slice expressions", loc));
                }
                Ok(ExprLoc::new(
                    loc,
                    Expr::Subscript {
                        object: Box::new(self.parse_expression(*value)?),
                        index: Box::new(self.parse_expression(*slice)?),
                    },
                ))
            }
            AstExpr::Name(ast::ExprName { id, range, .. }) => {
                let loc = self.convert_range(range);
                Ok(ExprLoc::new(loc, Expr::Name(self.identifier(id.as_str(), range))))
            }
            AstExpr::List(ast::ExprList { elts, range, .. }) => {
                let loc = self.convert_range(range);
                Ok(ExprLoc::new(loc, Expr::List(self.parse_expressions(elts)?)))
            }
            AstExpr::Tuple(ast::ExprTuple { elts, range, .. }) => {
                let loc = self.convert_range(range);
                Ok(ExprLoc::new(loc, Expr::Tuple(self.parse_expressions(elts)?)))
            }
            other => {
                let loc = self.convert_range(other.range());
                Err(ParseFailure::not_supported(describe_expr(&other), loc))
            }
        }
    }

    fn parse_fstring(&mut self, value: &ast::FStringValue, range: TextRange) -> Result<ExprLoc, ParseFailure> {
        let loc = self.convert_range(range);
        let mut parts = Vec::new();
        for fstring_part in value {
            match fstring_part {
                ast::FStringPart::Literal(lit) => {
                    let text = lit.value.to_string();
                    if !text.is_empty() {
                        parts.push(FStringPart::Literal(Rc::from(text.as_str())));
                    }
                }
                ast::FStringPart::FString(fstring) => {
                    for element in &fstring.elements {
                        match element {
                            InterpolatedStringElement::Literal(lit) => {
                                parts.push(FStringPart::Literal(Rc::from(lit.value.to_string().as_str())));
                            }
                            InterpolatedStringElement::Interpolation(interp) => {
                                if interp.format_spec.is_some() || interp.debug_text.is_some() {
                                    return Err(ParseFailure::not_supported(
                                        "f-string format specifiers",
                                        self.convert_range(interp.range),
                                    ));
                                }
                                let expr = self.parse_expression((*interp.expression).clone())?;
                                parts.push(FStringPart::Expr(Box::new(expr)));
                            }
                        }
                    }
                }
            }
        }
        // A single literal part degrades to a plain string literal.
        if parts.len() == 1
            && let FStringPart::Literal(text) = &parts[0]
        {
            return Ok(ExprLoc::new(loc, Expr::Literal(Literal::Str(Rc::clone(text)))));
        }
        Ok(ExprLoc::new(loc, Expr::FString(parts)))
    }
}

/// Builds a [`FunctionDef`], computing the binding sets Python scoping needs:
/// names declared `global` and names assigned in the direct body.
fn make_function_def(name: Rc<str>, params: Vec<Param>, body: Vec<Node>, loc: CodeLoc) -> FunctionDef {
    let mut global_names = AHashSet::new();
    let mut assigned_names = AHashSet::new();
    collect_bindings(&body, &mut global_names, &mut assigned_names);
    for name in &global_names {
        assigned_names.remove(name);
    }
    FunctionDef {
        name,
        params,
        body,
        loc,
        global_names,
        assigned_names,
    }
}

fn collect_bindings(body: &[Node], global_names: &mut AHashSet<Rc<str>>, assigned_names: &mut AHashSet<Rc<str>>) {
    for node in body {
        match node {
            Node::Global { names, .. } => global_names.extend(names.iter().map(Rc::clone)),
            Node::Assign { target, .. } => match target {
                AssignTarget::Name(name) => {
                    assigned_names.insert(Rc::clone(&name.name));
                }
                AssignTarget::Tuple(names) => {
                    assigned_names.extend(names.iter().map(|n| Rc::clone(&n.name)));
                }
                AssignTarget::Subscript { .. } => {}
            },
            Node::OpAssign { target, .. } => {
                assigned_names.insert(Rc::clone(&target.name));
            }
            Node::For { target, body, or_else, .. } => {
                match target {
                    ForTarget::Name(name) => {
                        assigned_names.insert(Rc::clone(&name.name));
                    }
                    ForTarget::Tuple(names) => {
                        assigned_names.extend(names.iter().map(|n| Rc::clone(&n.name)));
                    }
                }
                collect_bindings(body, global_names, assigned_names);
                collect_bindings(or_else, global_names, assigned_names);
            }
            Node::If { body, or_else, .. } | Node::While { body, or_else, .. } => {
                collect_bindings(body, global_names, assigned_names);
                collect_bindings(or_else, global_names, assigned_names);
            }
            // A nested def binds its own name in the enclosing scope but its
            // body belongs to the inner scope.
            Node::FunctionDef(def) => {
                assigned_names.insert(Rc::clone(&def.name));
            }
            _ => {}
        }
    }
}

/// Parses an integer literal's magnitude, handling radix prefixes and
/// underscore separators. The literal text comes from ruff's `Int` display,
/// which preserves the source spelling.
fn parse_int_magnitude(s: &str) -> Option<u128> {
    let cleaned: String = s.chars().filter(|c| *c != '_').collect();
    let cleaned = cleaned.as_str();
    if cleaned.len() >= 2 {
        let prefix = &cleaned[..2];
        let digits = &cleaned[2..];
        match prefix.to_ascii_lowercase().as_str() {
            "0x" => return u128::from_str_radix(digits, 16).ok(),
            "0o" => return u128::from_str_radix(digits, 8).ok(),
            "0b" => return u128::from_str_radix(digits, 2).ok(),
            _ => {}
        }
    }
    cleaned.parse::<u128>().ok()
}

fn convert_op(op: AstOperator, loc: CodeLoc) -> Result<Operator, ParseFailure> {
    match op {
        AstOperator::Add => Ok(Operator::Add),
        AstOperator::Sub => Ok(Operator::Sub),
        AstOperator::Mult => Ok(Operator::Mult),
        AstOperator::Div => Ok(Operator::Div),
        AstOperator::FloorDiv => Ok(Operator::FloorDiv),
        AstOperator::Mod => Ok(Operator::Mod),
        AstOperator::Pow => Ok(Operator::Pow),
        AstOperator::MatMult => Err(ParseFailure::not_supported("the @ operator", loc)),
        AstOperator::LShift | AstOperator::RShift | AstOperator::BitOr | AstOperator::BitXor | AstOperator::BitAnd => {
            Err(ParseFailure::not_supported("bitwise operators", loc))
        }
    }
}

fn convert_bool_op(op: BoolOp) -> Operator {
    match op {
        BoolOp::And => Operator::And,
        BoolOp::Or => Operator::Or,
    }
}

fn convert_compare_op(op: CmpOp) -> CmpOperator {
    match op {
        CmpOp::Eq => CmpOperator::Eq,
        CmpOp::NotEq => CmpOperator::NotEq,
        CmpOp::Lt => CmpOperator::Lt,
        CmpOp::LtE => CmpOperator::LtE,
        CmpOp::Gt => CmpOperator::Gt,
        CmpOp::GtE => CmpOperator::GtE,
        CmpOp::Is => CmpOperator::Is,
        CmpOp::IsNot => CmpOperator::IsNot,
        CmpOp::In => CmpOperator::In,
        CmpOp::NotIn => CmpOperator::NotIn,
    }
}

fn describe_stmt(stmt: &Stmt) -> &'static str {
    match stmt {
        Stmt::ClassDef(_) => "class definitions",
        Stmt::Try(_) => "try/except",
        Stmt::With(_) => "with statements",
        Stmt::Raise(_) => "raise statements",
        Stmt::Assert(_) => "assert statements",
        Stmt::Delete(_) => "del statements",
        Stmt::Match(_) => "match statements",
        Stmt::Nonlocal(_) => "nonlocal declarations",
        Stmt::TypeAlias(_) => "type alias statements",
        _ => "this statement form",
    }
}

fn describe_expr(expr: &AstExpr) -> &'static str {
    match expr {
        AstExpr::ListComp(_) | AstExpr::SetComp(_) | AstExpr::DictComp(_) | AstExpr::Generator(_) => "comprehensions",
        AstExpr::Slice(_) => "slice expressions",
        AstExpr::Starred(_) => "starred expressions",
        AstExpr::Named(_) => "assignment expressions (:=)",
        AstExpr::Await(_) => "await expressions",
        AstExpr::Yield(_) | AstExpr::YieldFrom(_) => "yield expressions",
        AstExpr::Set(_) => "set literals",
        AstExpr::BytesLiteral(_) => "bytes literals",
        AstExpr::EllipsisLiteral(_) => "the ellipsis literal",
        AstExpr::Lambda(_) => "lambda expressions",
        AstExpr::Attribute(_) => "attribute expressions",
        AstExpr::Name(_) => "name expressions",
        _ => "this expression form",
    }
}
