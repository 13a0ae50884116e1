use std::{cell::RefCell, cmp::Ordering, rc::Rc};

use crate::{
    builtins::{call_builtin, int_overflow},
    error::{ExcKind, Raise, RunError, RunResult, ScriptOrigin},
    expressions::{
        ArgExprs, AssignTarget, CmpOperator, Expr, ExprLoc, ForTarget, FStringPart, FunctionDef, Identifier, Literal,
        Node, Operator,
    },
    io::PrintHandle,
    value::{CallArgs, Dict, DictKey, Globals, IterState, ScriptFunction, Value, ValueIter, Vars},
};

/// Call-depth cap; exceeding it raises a script-level `RuntimeError`.
const MAX_CALL_DEPTH: usize = 200;

/// Statement-level control flow.
pub(crate) enum Flow {
    Normal,
    Break,
    Continue,
    Return(Value),
}

/// The variable scope a block executes in.
///
/// At module level there is no frame: the globals table doubles as the local
/// table, which is exactly what persists `setup()`'s `global` rebinds for
/// `process()`. Inside a function call, a frame supplies the locals plus the
/// definition's binding sets.
pub(crate) struct Scope<'a> {
    globals: &'a Globals,
    frame: Option<Frame<'a>>,
}

struct Frame<'a> {
    locals: &'a RefCell<Vars>,
    def: &'a FunctionDef,
}

impl<'a> Scope<'a> {
    pub(crate) fn module(globals: &'a Globals) -> Self {
        Self { globals, frame: None }
    }
}

/// Tree-walking executor for the lowered statement tree.
///
/// The evaluator carries no variable state of its own; scopes are threaded
/// through execution and function values carry their defining module's
/// globals, so one evaluator can run code that crosses script boundaries.
pub(crate) struct Evaluator {
    origin: Rc<ScriptOrigin>,
    print: PrintHandle,
    depth: usize,
}

impl Evaluator {
    pub(crate) fn new(origin: Rc<ScriptOrigin>, print: PrintHandle) -> Self {
        Self {
            origin,
            print,
            depth: 0,
        }
    }

    /// Executes statements at module level against `globals`.
    pub(crate) fn exec_module(&mut self, nodes: &[Node], globals: &Globals) -> RunResult<()> {
        let scope = Scope::module(globals);
        self.exec_block(nodes, &scope).map(|_| ())
    }

    pub(crate) fn print_line(&self, line: &str) {
        self.print.borrow_mut().write_line(line);
    }

    fn exec_block(&mut self, nodes: &[Node], scope: &Scope) -> RunResult<Flow> {
        for node in nodes {
            match self.exec_node(node, scope)? {
                Flow::Normal => {}
                flow => return Ok(flow),
            }
        }
        Ok(Flow::Normal)
    }

    fn exec_node(&mut self, node: &Node, scope: &Scope) -> RunResult<Flow> {
        match self.exec_node_inner(node, scope) {
            Err(RunError::Raise(mut raise)) => {
                if let Some(loc) = node.loc() {
                    raise.push_frame(&self.origin, loc);
                }
                Err(RunError::Raise(raise))
            }
            other => other,
        }
    }

    fn exec_node_inner(&mut self, node: &Node, scope: &Scope) -> RunResult<Flow> {
        match node {
            Node::FunctionDef(def) => {
                let function = self.make_function(def, scope)?;
                self.store_name(&def.name, function, scope);
                Ok(Flow::Normal)
            }
            Node::Assign { target, value } => {
                let value = self.eval(value, scope)?;
                self.assign_target(target, value, scope)?;
                Ok(Flow::Normal)
            }
            Node::OpAssign { target, op, value } => {
                let current = self.load_name(target, scope)?;
                let rhs = self.eval(value, scope)?;
                let result = self.binary_op(*op, current, rhs)?;
                self.store_name(&target.name, result, scope);
                Ok(Flow::Normal)
            }
            Node::OpAssignSubscr {
                object,
                index,
                op,
                value,
                ..
            } => {
                let object = self.eval(object, scope)?;
                let index = self.eval(index, scope)?;
                let current = subscript_get(&object, &index)?;
                let rhs = self.eval(value, scope)?;
                let result = self.binary_op(*op, current, rhs)?;
                subscript_set(&object, &index, result)?;
                Ok(Flow::Normal)
            }
            // Handled statically via the definition's binding sets.
            Node::Global { .. } | Node::Pass => Ok(Flow::Normal),
            Node::Return { value, .. } => {
                let value = match value {
                    Some(value) => self.eval(value, scope)?,
                    None => Value::None,
                };
                Ok(Flow::Return(value))
            }
            Node::If { test, body, or_else } => {
                if self.eval(test, scope)?.is_truthy() {
                    self.exec_block(body, scope)
                } else {
                    self.exec_block(or_else, scope)
                }
            }
            Node::While { test, body, or_else } => {
                let mut broke = false;
                while self.eval(test, scope)?.is_truthy() {
                    match self.exec_block(body, scope)? {
                        Flow::Normal | Flow::Continue => {}
                        Flow::Break => {
                            broke = true;
                            break;
                        }
                        flow @ Flow::Return(_) => return Ok(flow),
                    }
                }
                if !broke {
                    return self.exec_block(or_else, scope);
                }
                Ok(Flow::Normal)
            }
            Node::For {
                target,
                iter,
                body,
                or_else,
            } => {
                let iterable = self.eval(iter, scope)?;
                let mut iter = LoopIter::new(&iterable)?;
                let mut broke = false;
                while let Some(value) = iter.next_value() {
                    self.assign_for_target(target, value, scope)?;
                    match self.exec_block(body, scope)? {
                        Flow::Normal | Flow::Continue => {}
                        Flow::Break => {
                            broke = true;
                            break;
                        }
                        flow @ Flow::Return(_) => return Ok(flow),
                    }
                }
                if !broke {
                    return self.exec_block(or_else, scope);
                }
                Ok(Flow::Normal)
            }
            Node::Break(_) => Ok(Flow::Break),
            Node::Continue(_) => Ok(Flow::Continue),
            Node::Expr(expr) => {
                self.eval(expr, scope)?;
                Ok(Flow::Normal)
            }
        }
    }

    fn make_function(&mut self, def: &Rc<FunctionDef>, scope: &Scope) -> RunResult<Value> {
        // Defaults are evaluated once, at definition time.
        let mut defaults = Vec::new();
        for param in &def.params {
            if let Some(default) = &param.default {
                defaults.push(self.eval(default, scope)?);
            } else if !defaults.is_empty() {
                return Err(Raise::new(
                    ExcKind::TypeError,
                    "parameter without a default follows parameter with a default",
                )
                .into());
            }
        }
        Ok(Value::Function(Rc::new(ScriptFunction {
            def: Rc::clone(def),
            globals: Rc::clone(scope.globals),
            defaults,
            origin: Rc::clone(&self.origin),
        })))
    }

    pub(crate) fn eval(&mut self, expr: &ExprLoc, scope: &Scope) -> RunResult<Value> {
        match self.eval_inner(expr, scope) {
            Err(RunError::Raise(mut raise)) => {
                raise.push_frame(&self.origin, expr.loc);
                Err(RunError::Raise(raise))
            }
            other => other,
        }
    }

    fn eval_inner(&mut self, expr: &ExprLoc, scope: &Scope) -> RunResult<Value> {
        match &expr.expr {
            Expr::Literal(literal) => Ok(literal_value(literal)),
            Expr::Name(ident) => self.load_name(ident, scope),
            Expr::FString(parts) => {
                let mut out = String::new();
                for part in parts {
                    match part {
                        FStringPart::Literal(text) => out.push_str(text),
                        FStringPart::Expr(inner) => out.push_str(&self.eval(inner, scope)?.str_value()),
                    }
                }
                Ok(Value::str(out))
            }
            Expr::Call { callable, args } => {
                let callee = self.eval(callable, scope)?;
                let args = self.eval_args(args, scope)?;
                self.call_value(&callee, args)
            }
            Expr::AttrCall { object, attr, args } => {
                let object = self.eval(object, scope)?;
                let args = self.eval_args(args, scope)?;
                self.attr_call(&object, attr, args)
            }
            Expr::AttrGet { object, attr } => {
                let object = self.eval(object, scope)?;
                attr_get(&object, attr)
            }
            Expr::Op { left, op, right } => match op {
                Operator::And => {
                    let left = self.eval(left, scope)?;
                    if left.is_truthy() { self.eval(right, scope) } else { Ok(left) }
                }
                Operator::Or => {
                    let left = self.eval(left, scope)?;
                    if left.is_truthy() { Ok(left) } else { self.eval(right, scope) }
                }
                op => {
                    let left = self.eval(left, scope)?;
                    let right = self.eval(right, scope)?;
                    self.binary_op(*op, left, right)
                }
            },
            Expr::Cmp { left, comparisons } => {
                let mut prev = self.eval(left, scope)?;
                for (op, comparator) in comparisons {
                    let right = self.eval(comparator, scope)?;
                    if !compare(*op, &prev, &right)? {
                        return Ok(Value::Bool(false));
                    }
                    prev = right;
                }
                Ok(Value::Bool(true))
            }
            Expr::Not(inner) => Ok(Value::Bool(!self.eval(inner, scope)?.is_truthy())),
            Expr::UnaryMinus(inner) => match self.eval(inner, scope)? {
                Value::Int(i) => Ok(Value::Int(i.checked_neg().ok_or_else(int_overflow)?)),
                Value::Bool(b) => Ok(Value::Int(-i64::from(b))),
                Value::Float(f) => Ok(Value::Float(-f)),
                other => Err(Raise::type_error(format!("bad operand type for unary -: '{}'", other.type_name())).into()),
            },
            Expr::UnaryPlus(inner) => match self.eval(inner, scope)? {
                Value::Bool(b) => Ok(Value::Int(i64::from(b))),
                value @ (Value::Int(_) | Value::Float(_)) => Ok(value),
                other => Err(Raise::type_error(format!("bad operand type for unary +: '{}'", other.type_name())).into()),
            },
            Expr::List(items) => {
                let values = items
                    .iter()
                    .map(|item| self.eval(item, scope))
                    .collect::<RunResult<Vec<_>>>()?;
                Ok(Value::list(values))
            }
            Expr::Tuple(items) => {
                let values = items
                    .iter()
                    .map(|item| self.eval(item, scope))
                    .collect::<RunResult<Vec<_>>>()?;
                Ok(Value::Tuple(Rc::from(values)))
            }
            Expr::Dict(pairs) => {
                let mut dict = Dict::with_capacity(pairs.len());
                for (key, value) in pairs {
                    let key = DictKey::from_value(&self.eval(key, scope)?)?;
                    dict.insert(key, self.eval(value, scope)?);
                }
                Ok(Value::dict(dict))
            }
            Expr::Subscript { object, index } => {
                let object = self.eval(object, scope)?;
                let index = self.eval(index, scope)?;
                Ok(subscript_get(&object, &index)?)
            }
            Expr::Ternary { test, body, orelse } => {
                if self.eval(test, scope)?.is_truthy() {
                    self.eval(body, scope)
                } else {
                    self.eval(orelse, scope)
                }
            }
            Expr::Lambda(def) => self.make_function(def, scope),
        }
    }

    fn eval_args(&mut self, args: &ArgExprs, scope: &Scope) -> RunResult<CallArgs> {
        let mut out = CallArgs::default();
        for arg in &args.pos {
            out.pos.push(self.eval(arg, scope)?);
        }
        for (name, arg) in &args.kwargs {
            out.kwargs.push((Rc::clone(name), self.eval(arg, scope)?));
        }
        Ok(out)
    }

    /// Invokes any callable value with already-evaluated arguments.
    pub(crate) fn call_value(&mut self, callee: &Value, args: CallArgs) -> RunResult<Value> {
        match callee {
            Value::Function(func) => self.call_script_function(func, args),
            Value::Builtin(builtin) => call_builtin(*builtin, args, self),
            Value::Denied(denied) => {
                let name: &'static str = (*denied).into();
                Err(Raise::not_allowed(name).into())
            }
            Value::NativeFn(native) => (native.func)(args),
            other => Err(Raise::type_error(format!("'{}' object is not callable", other.type_name())).into()),
        }
    }

    fn call_script_function(&mut self, func: &Rc<ScriptFunction>, args: CallArgs) -> RunResult<Value> {
        if self.depth >= MAX_CALL_DEPTH {
            return Err(Raise::new(ExcKind::RuntimeError, "maximum call depth exceeded").into());
        }
        let locals = RefCell::new(self.bind_params(func, args)?);
        let scope = Scope {
            globals: &func.globals,
            frame: Some(Frame {
                locals: &locals,
                def: &func.def,
            }),
        };
        // Execution continues in the function's defining script, which may
        // not be the one currently running (imported library functions).
        let saved_origin = std::mem::replace(&mut self.origin, Rc::clone(&func.origin));
        self.depth += 1;
        let result = self.exec_block(&func.def.body, &scope);
        self.depth -= 1;
        self.origin = saved_origin;
        match result? {
            Flow::Return(value) => Ok(value),
            _ => Ok(Value::None),
        }
    }

    fn bind_params(&self, func: &ScriptFunction, args: CallArgs) -> Result<Vars, Raise> {
        let def = &func.def;
        let name = &def.name;
        if args.pos.len() > def.params.len() {
            return Err(Raise::type_error(format!(
                "{name}() takes {} positional argument(s) but {} were given",
                def.params.len(),
                args.pos.len()
            )));
        }
        for (kwarg, _) in &args.kwargs {
            if !def.params.iter().any(|p| p.name == *kwarg) {
                return Err(Raise::type_error(format!(
                    "{name}() got an unexpected keyword argument '{kwarg}'"
                )));
            }
        }
        let first_default = def.params.len() - func.defaults.len();
        let mut locals = Vars::with_capacity(def.params.len());
        for (i, param) in def.params.iter().enumerate() {
            let positional = args.pos.get(i);
            let keyword = args.kwarg(&param.name);
            let value = match (positional, keyword) {
                (Some(_), Some(_)) => {
                    return Err(Raise::type_error(format!(
                        "{name}() got multiple values for argument '{}'",
                        param.name
                    )));
                }
                (Some(value), None) | (None, Some(value)) => value.clone(),
                (None, None) => match i.checked_sub(first_default).and_then(|d| func.defaults.get(d)) {
                    Some(default) => default.clone(),
                    None => {
                        return Err(Raise::type_error(format!(
                            "{name}() missing required argument: '{}'",
                            param.name
                        )));
                    }
                },
            };
            locals.insert(Rc::clone(&param.name), value);
        }
        Ok(locals)
    }

    fn load_name(&self, ident: &Identifier, scope: &Scope) -> RunResult<Value> {
        let name = &*ident.name;
        if let Some(frame) = &scope.frame {
            if !frame.def.global_names.contains(name) {
                if let Some(value) = frame.locals.borrow().get(name) {
                    return Ok(value.clone());
                }
                // Assigned somewhere in this function: the name is local for
                // the whole body, so a read before the store is unbound.
                if frame.def.assigned_names.contains(name) {
                    return Err(Raise::new(
                        ExcKind::UnboundLocalError,
                        format!("local variable '{name}' referenced before assignment"),
                    )
                    .into());
                }
            }
        }
        match scope.globals.borrow().get(name) {
            Some(value) => Ok(value.clone()),
            None => Err(Raise::new(ExcKind::NameError, format!("name '{name}' is not defined")).into()),
        }
    }

    fn store_name(&self, name: &Rc<str>, value: Value, scope: &Scope) {
        if let Some(frame) = &scope.frame
            && !frame.def.global_names.contains(&**name)
        {
            frame.locals.borrow_mut().insert(Rc::clone(name), value);
            return;
        }
        scope.globals.borrow_mut().insert(Rc::clone(name), value);
    }

    fn assign_target(&mut self, target: &AssignTarget, value: Value, scope: &Scope) -> RunResult<()> {
        match target {
            AssignTarget::Name(ident) => {
                self.store_name(&ident.name, value, scope);
                Ok(())
            }
            AssignTarget::Tuple(names) => self.unpack_into(names, value, scope),
            AssignTarget::Subscript { object, index, .. } => {
                let object = self.eval(object, scope)?;
                let index = self.eval(index, scope)?;
                subscript_set(&object, &index, value)?;
                Ok(())
            }
        }
    }

    fn assign_for_target(&mut self, target: &ForTarget, value: Value, scope: &Scope) -> RunResult<()> {
        match target {
            ForTarget::Name(ident) => {
                self.store_name(&ident.name, value, scope);
                Ok(())
            }
            ForTarget::Tuple(names) => self.unpack_into(names, value, scope),
        }
    }

    fn unpack_into(&mut self, names: &[Identifier], value: Value, scope: &Scope) -> RunResult<()> {
        let values = value.iter_values().map_err(|_| {
            Raise::type_error(format!("cannot unpack non-iterable {} value", value.type_name()))
        })?;
        if values.len() != names.len() {
            return Err(Raise::value_error(format!(
                "expected {} values to unpack, got {}",
                names.len(),
                values.len()
            ))
            .into());
        }
        for (ident, value) in names.iter().zip(values) {
            self.store_name(&ident.name, value, scope);
        }
        Ok(())
    }

    fn attr_call(&mut self, object: &Value, attr: &str, args: CallArgs) -> RunResult<Value> {
        match object {
            Value::Namespace(handle) => handle.call(attr, args),
            Value::Attrs(view) => match view.get(attr) {
                Some(value) => self.call_value(&value.clone(), args),
                None => Err(Raise::attribute_error(format!("namespace has no attribute '{attr}'")).into()),
            },
            Value::Script(ctx) => match attr {
                "run_setup" => {
                    ctx.borrow_mut().run_setup()?;
                    Ok(Value::None)
                }
                "run_process" => Ok(ctx.borrow_mut().run_process()?),
                "get_export" => Ok(ctx.borrow().get_export().unwrap_or(Value::None)),
                other => Err(Raise::attribute_error(format!("script handle has no attribute '{other}'")).into()),
            },
            Value::Dict(_) | Value::List(_) | Value::Str(_) => self.value_method(object, attr, args),
            other => {
                // Fall back to attribute lookup so callable attributes work.
                let callee = attr_get(other, attr)?;
                self.call_value(&callee, args)
            }
        }
    }

    /// Methods of the builtin container and string types.
    fn value_method(&mut self, object: &Value, attr: &str, args: CallArgs) -> RunResult<Value> {
        args.no_kwargs(attr)?;
        match object {
            Value::List(items) => match attr {
                "append" => {
                    args.expect_len("append", 1)?;
                    items.borrow_mut().push(args.pos[0].clone());
                    Ok(Value::None)
                }
                "extend" => {
                    args.expect_len("extend", 1)?;
                    let values = args.pos[0].iter_values()?;
                    items.borrow_mut().extend(values);
                    Ok(Value::None)
                }
                "pop" => {
                    let index = match args.pos.as_slice() {
                        [] => None,
                        [index] => Some(index.as_int("pop() index")?),
                        _ => return Err(Raise::type_error("pop() takes at most 1 argument").into()),
                    };
                    let mut items = items.borrow_mut();
                    let len = items.len();
                    if len == 0 {
                        return Err(Raise::new(ExcKind::IndexError, "pop from empty list").into());
                    }
                    let index = normalize_index(index.unwrap_or(-1), len)
                        .ok_or_else(|| Raise::new(ExcKind::IndexError, "pop index out of range"))?;
                    Ok(items.remove(index))
                }
                "clear" => {
                    args.expect_len("clear", 0)?;
                    items.borrow_mut().clear();
                    Ok(Value::None)
                }
                "index" => {
                    args.expect_len("index", 1)?;
                    let found = items.borrow().iter().position(|item| item.py_eq(&args.pos[0]));
                    match found {
                        Some(i) => Ok(Value::Int(i64::try_from(i).unwrap_or(i64::MAX))),
                        None => Err(Raise::value_error(format!("{} is not in list", args.pos[0].repr())).into()),
                    }
                }
                "count" => {
                    args.expect_len("count", 1)?;
                    let count = items.borrow().iter().filter(|item| item.py_eq(&args.pos[0])).count();
                    Ok(Value::Int(i64::try_from(count).unwrap_or(i64::MAX)))
                }
                other => Err(Raise::attribute_error(format!("'list' object has no attribute '{other}'")).into()),
            },
            Value::Dict(dict) => match attr {
                "get" => {
                    if args.pos.is_empty() || args.pos.len() > 2 {
                        return Err(Raise::type_error("get() takes 1 or 2 arguments").into());
                    }
                    let key = DictKey::from_value(&args.pos[0])?;
                    match dict.borrow().get(&key) {
                        Some(value) => Ok(value.clone()),
                        None => Ok(args.pos.get(1).cloned().unwrap_or(Value::None)),
                    }
                }
                "keys" => {
                    args.expect_len("keys", 0)?;
                    Ok(Value::list(dict.borrow().keys().map(DictKey::to_value).collect()))
                }
                "values" => {
                    args.expect_len("values", 0)?;
                    Ok(Value::list(dict.borrow().values().cloned().collect()))
                }
                "items" => {
                    args.expect_len("items", 0)?;
                    Ok(Value::list(
                        dict.borrow()
                            .iter()
                            .map(|(key, value)| Value::Tuple(Rc::from(vec![key.to_value(), value.clone()])))
                            .collect(),
                    ))
                }
                "pop" => {
                    if args.pos.is_empty() || args.pos.len() > 2 {
                        return Err(Raise::type_error("pop() takes 1 or 2 arguments").into());
                    }
                    let key = DictKey::from_value(&args.pos[0])?;
                    match dict.borrow_mut().shift_remove(&key) {
                        Some(value) => Ok(value),
                        None => match args.pos.get(1) {
                            Some(default) => Ok(default.clone()),
                            None => Err(Raise::new(ExcKind::KeyError, key.to_value().repr()).into()),
                        },
                    }
                }
                "update" => {
                    args.expect_len("update", 1)?;
                    let Value::Dict(other) = &args.pos[0] else {
                        return Err(Raise::type_error("update() argument must be a dict").into());
                    };
                    let entries: Vec<_> = other.borrow().iter().map(|(k, v)| (k.clone(), v.clone())).collect();
                    dict.borrow_mut().extend(entries);
                    Ok(Value::None)
                }
                "clear" => {
                    args.expect_len("clear", 0)?;
                    dict.borrow_mut().clear();
                    Ok(Value::None)
                }
                other => Err(Raise::attribute_error(format!("'dict' object has no attribute '{other}'")).into()),
            },
            Value::Str(s) => self.str_method(s, attr, &args),
            _ => unreachable!("value_method called for unsupported receiver"),
        }
    }

    fn str_method(&mut self, s: &Rc<str>, attr: &str, args: &CallArgs) -> RunResult<Value> {
        match attr {
            "upper" => {
                args.expect_len("upper", 0)?;
                Ok(Value::str(s.to_uppercase()))
            }
            "lower" => {
                args.expect_len("lower", 0)?;
                Ok(Value::str(s.to_lowercase()))
            }
            "strip" => {
                args.expect_len("strip", 0)?;
                Ok(Value::str(s.trim()))
            }
            "split" => match args.pos.as_slice() {
                [] => Ok(Value::list(s.split_whitespace().map(Value::str).collect())),
                [Value::Str(sep)] => {
                    if sep.is_empty() {
                        return Err(Raise::value_error("empty separator").into());
                    }
                    Ok(Value::list(s.split(&**sep).map(Value::str).collect()))
                }
                _ => Err(Raise::type_error("split() separator must be a string").into()),
            },
            "join" => {
                args.expect_len("join", 1)?;
                let mut parts = Vec::new();
                for value in args.pos[0].iter_values()? {
                    match value {
                        Value::Str(part) => parts.push(part.to_string()),
                        other => {
                            return Err(Raise::type_error(format!(
                                "sequence item: expected str instance, {} found",
                                other.type_name()
                            ))
                            .into());
                        }
                    }
                }
                Ok(Value::str(parts.join(s)))
            }
            "startswith" | "endswith" => {
                args.expect_len(attr, 1)?;
                let Value::Str(prefix) = &args.pos[0] else {
                    return Err(Raise::type_error(format!("{attr}() argument must be a string")).into());
                };
                let matched = if attr == "startswith" {
                    s.starts_with(&**prefix)
                } else {
                    s.ends_with(&**prefix)
                };
                Ok(Value::Bool(matched))
            }
            "replace" => {
                args.expect_len("replace", 2)?;
                let (Value::Str(from), Value::Str(to)) = (&args.pos[0], &args.pos[1]) else {
                    return Err(Raise::type_error("replace() arguments must be strings").into());
                };
                Ok(Value::str(s.replace(&**from, to)))
            }
            other => Err(Raise::attribute_error(format!("'str' object has no attribute '{other}'")).into()),
        }
    }

    fn binary_op(&mut self, op: Operator, left: Value, right: Value) -> RunResult<Value> {
        let result = match op {
            Operator::Add => add_values(&left, &right),
            Operator::Sub => numeric_op(&left, &right, "-", i64::checked_sub, |a, b| a - b),
            Operator::Mult => mult_values(&left, &right),
            Operator::Div => div_values(&left, &right),
            Operator::FloorDiv => floordiv_values(&left, &right),
            Operator::Mod => mod_values(&left, &right),
            Operator::Pow => pow_values(&left, &right),
            Operator::And | Operator::Or => unreachable!("short-circuit operators evaluated in eval_inner"),
        };
        result.map_err(RunError::Raise)
    }
}

/// Iteration driver for `for` loops: shares state with explicit `iter()`
/// values, snapshots everything else.
enum LoopIter {
    Owned(IterState),
    Shared(Rc<RefCell<ValueIter>>),
}

impl LoopIter {
    fn new(iterable: &Value) -> Result<Self, Raise> {
        match iterable {
            Value::Iter(state) => Ok(Self::Shared(Rc::clone(state))),
            other => Ok(Self::Owned(other.iter_state()?)),
        }
    }

    fn next_value(&mut self) -> Option<Value> {
        match self {
            Self::Owned(state) => state.next_value(),
            Self::Shared(state) => state.borrow_mut().next_value(),
        }
    }
}

fn literal_value(literal: &Literal) -> Value {
    match literal {
        Literal::None => Value::None,
        Literal::Bool(b) => Value::Bool(*b),
        Literal::Int(i) => Value::Int(*i),
        Literal::Float(f) => Value::Float(*f),
        Literal::Str(s) => Value::Str(Rc::clone(s)),
    }
}

/// Attribute read on any value.
pub(crate) fn attr_get(object: &Value, attr: &str) -> RunResult<Value> {
    match object {
        Value::Namespace(handle) => handle.attr(attr).ok_or_else(|| {
            Raise::attribute_error(format!("'{}' object has no attribute '{attr}'", handle.label())).into()
        }),
        Value::Attrs(view) => view
            .get(attr)
            .cloned()
            .ok_or_else(|| Raise::attribute_error(format!("namespace has no attribute '{attr}'")).into()),
        Value::Script(ctx) => match attr {
            "export" => Ok(ctx.borrow().get_export().unwrap_or(Value::None)),
            other => Err(Raise::attribute_error(format!("script handle has no attribute '{other}'")).into()),
        },
        other => Err(Raise::attribute_error(format!(
            "'{}' object has no attribute '{attr}'",
            other.type_name()
        ))
        .into()),
    }
}

fn compare(op: CmpOperator, left: &Value, right: &Value) -> Result<bool, Raise> {
    match op {
        CmpOperator::Eq => Ok(left.py_eq(right)),
        CmpOperator::NotEq => Ok(!left.py_eq(right)),
        CmpOperator::Lt | CmpOperator::LtE | CmpOperator::Gt | CmpOperator::GtE => {
            let symbol = match op {
                CmpOperator::Lt => "<",
                CmpOperator::LtE => "<=",
                CmpOperator::Gt => ">",
                _ => ">=",
            };
            let ordering = left.py_cmp(right).ok_or_else(|| {
                Raise::type_error(format!(
                    "'{symbol}' not supported between instances of '{}' and '{}'",
                    left.type_name(),
                    right.type_name()
                ))
            })?;
            Ok(match op {
                CmpOperator::Lt => ordering == Ordering::Less,
                CmpOperator::LtE => ordering != Ordering::Greater,
                CmpOperator::Gt => ordering == Ordering::Greater,
                _ => ordering != Ordering::Less,
            })
        }
        CmpOperator::Is => Ok(py_is(left, right)),
        CmpOperator::IsNot => Ok(!py_is(left, right)),
        CmpOperator::In => contains(right, left),
        CmpOperator::NotIn => contains(right, left).map(|found| !found),
    }
}

fn py_is(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::None, Value::None) => true,
        (Value::Bool(a), Value::Bool(b)) => a == b,
        (Value::Int(a), Value::Int(b)) => a == b,
        (Value::Str(a), Value::Str(b)) => Rc::ptr_eq(a, b),
        (Value::List(a), Value::List(b)) => Rc::ptr_eq(a, b),
        (Value::Dict(a), Value::Dict(b)) => Rc::ptr_eq(a, b),
        (Value::Tuple(a), Value::Tuple(b)) => Rc::ptr_eq(a, b),
        (Value::Function(a), Value::Function(b)) => Rc::ptr_eq(a, b),
        _ => false,
    }
}

fn contains(container: &Value, needle: &Value) -> Result<bool, Raise> {
    match container {
        Value::Str(haystack) => match needle {
            Value::Str(sub) => Ok(haystack.contains(&**sub)),
            other => Err(Raise::type_error(format!(
                "'in <string>' requires string as left operand, not {}",
                other.type_name()
            ))),
        },
        Value::List(items) => Ok(items.borrow().iter().any(|item| item.py_eq(needle))),
        Value::Tuple(items) => Ok(items.iter().any(|item| item.py_eq(needle))),
        Value::Dict(dict) => {
            let key = DictKey::from_value(needle)?;
            Ok(dict.borrow().contains_key(&key))
        }
        Value::Range { start, stop, step } => {
            let Value::Int(i) = needle else { return Ok(false) };
            let in_span = if *step > 0 { i >= start && i < stop } else { i <= start && i > stop };
            Ok(in_span && (i - start) % step == 0)
        }
        other => Err(Raise::type_error(format!(
            "argument of type '{}' is not iterable",
            other.type_name()
        ))),
    }
}

pub(crate) fn subscript_get(object: &Value, index: &Value) -> Result<Value, Raise> {
    match object {
        Value::List(items) => {
            let items = items.borrow();
            let i = sequence_index(index, items.len(), "list")?;
            Ok(items[i].clone())
        }
        Value::Tuple(items) => {
            let i = sequence_index(index, items.len(), "tuple")?;
            Ok(items[i].clone())
        }
        Value::Str(s) => {
            let chars: Vec<char> = s.chars().collect();
            let i = sequence_index(index, chars.len(), "string")?;
            Ok(Value::str(chars[i].to_string()))
        }
        Value::Dict(dict) => {
            let key = DictKey::from_value(index)?;
            dict.borrow()
                .get(&key)
                .cloned()
                .ok_or_else(|| Raise::new(ExcKind::KeyError, key.to_value().repr()))
        }
        other => Err(Raise::type_error(format!(
            "'{}' object is not subscriptable",
            other.type_name()
        ))),
    }
}

fn subscript_set(object: &Value, index: &Value, value: Value) -> Result<(), Raise> {
    match object {
        Value::List(items) => {
            let mut items = items.borrow_mut();
            let i = sequence_index(index, items.len(), "list")?;
            items[i] = value;
            Ok(())
        }
        Value::Dict(dict) => {
            let key = DictKey::from_value(index)?;
            dict.borrow_mut().insert(key, value);
            Ok(())
        }
        other => Err(Raise::type_error(format!(
            "'{}' object does not support item assignment",
            other.type_name()
        ))),
    }
}

fn sequence_index(index: &Value, len: usize, what: &str) -> Result<usize, Raise> {
    let i = index.as_int(&format!("{what} index"))?;
    normalize_index(i, len).ok_or_else(|| Raise::new(ExcKind::IndexError, format!("{what} index out of range")))
}

/// Maps a possibly negative index into `0..len`.
fn normalize_index(index: i64, len: usize) -> Option<usize> {
    let len = i64::try_from(len).ok()?;
    let index = if index < 0 { index + len } else { index };
    if (0..len).contains(&index) {
        usize::try_from(index).ok()
    } else {
        None
    }
}

fn type_error_for(op: &str, left: &Value, right: &Value) -> Raise {
    Raise::type_error(format!(
        "unsupported operand type(s) for {op}: '{}' and '{}'",
        left.type_name(),
        right.type_name()
    ))
}

fn add_values(left: &Value, right: &Value) -> Result<Value, Raise> {
    match (left, right) {
        (Value::Str(a), Value::Str(b)) => {
            let mut s = a.to_string();
            s.push_str(b);
            Ok(Value::str(s))
        }
        (Value::List(a), Value::List(b)) => {
            let mut items = a.borrow().clone();
            items.extend(b.borrow().iter().cloned());
            Ok(Value::list(items))
        }
        (Value::Tuple(a), Value::Tuple(b)) => {
            let mut items = a.to_vec();
            items.extend(b.iter().cloned());
            Ok(Value::Tuple(Rc::from(items)))
        }
        _ => numeric_op(left, right, "+", i64::checked_add, |a, b| a + b),
    }
}

fn mult_values(left: &Value, right: &Value) -> Result<Value, Raise> {
    match (left, right) {
        (Value::Str(s), Value::Int(n)) | (Value::Int(n), Value::Str(s)) => {
            Ok(Value::str(s.repeat(usize::try_from(*n).unwrap_or(0))))
        }
        (Value::List(items), Value::Int(n)) | (Value::Int(n), Value::List(items)) => {
            let source = items.borrow();
            let count = usize::try_from(*n).unwrap_or(0);
            let mut out = Vec::with_capacity(source.len() * count);
            for _ in 0..count {
                out.extend(source.iter().cloned());
            }
            Ok(Value::list(out))
        }
        _ => numeric_op(left, right, "*", i64::checked_mul, |a, b| a * b),
    }
}

/// Applies an arithmetic operator with Python's numeric promotion: int when
/// both operands are int-ish, float otherwise.
fn numeric_op(
    left: &Value,
    right: &Value,
    symbol: &str,
    int_op: fn(i64, i64) -> Option<i64>,
    float_op: fn(f64, f64) -> f64,
) -> Result<Value, Raise> {
    match (int_pair(left, right), left.as_number(), right.as_number()) {
        (Some((a, b)), _, _) => Ok(Value::Int(int_op(a, b).ok_or_else(int_overflow)?)),
        (None, Some(a), Some(b)) => Ok(Value::Float(float_op(a, b))),
        _ => Err(type_error_for(symbol, left, right)),
    }
}

fn int_pair(left: &Value, right: &Value) -> Option<(i64, i64)> {
    let as_int = |value: &Value| match value {
        Value::Int(i) => Some(*i),
        Value::Bool(b) => Some(i64::from(*b)),
        _ => None,
    };
    Some((as_int(left)?, as_int(right)?))
}

fn div_values(left: &Value, right: &Value) -> Result<Value, Raise> {
    match (left.as_number(), right.as_number()) {
        (Some(a), Some(b)) => {
            if b == 0.0 {
                Err(Raise::new(ExcKind::ZeroDivisionError, "division by zero"))
            } else {
                Ok(Value::Float(a / b))
            }
        }
        _ => Err(type_error_for("/", left, right)),
    }
}

fn floordiv_values(left: &Value, right: &Value) -> Result<Value, Raise> {
    if let Some((a, b)) = int_pair(left, right) {
        if b == 0 {
            return Err(Raise::new(ExcKind::ZeroDivisionError, "integer division or modulo by zero"));
        }
        // Python floor division rounds toward negative infinity. Checked
        // ops: i64::MIN // -1 exceeds i64 and must raise, not panic.
        let quotient = a.checked_div(b).ok_or_else(int_overflow)?;
        let remainder = a.checked_rem(b).ok_or_else(int_overflow)?;
        let quotient = if remainder != 0 && (remainder < 0) != (b < 0) {
            quotient - 1
        } else {
            quotient
        };
        return Ok(Value::Int(quotient));
    }
    match (left.as_number(), right.as_number()) {
        (Some(a), Some(b)) => {
            if b == 0.0 {
                Err(Raise::new(ExcKind::ZeroDivisionError, "float floor division by zero"))
            } else {
                Ok(Value::Float((a / b).floor()))
            }
        }
        _ => Err(type_error_for("//", left, right)),
    }
}

fn mod_values(left: &Value, right: &Value) -> Result<Value, Raise> {
    if let Some((a, b)) = int_pair(left, right) {
        if b == 0 {
            return Err(Raise::new(ExcKind::ZeroDivisionError, "integer division or modulo by zero"));
        }
        // The result takes the sign of the divisor, as in Python. Adding `b`
        // only when the signs differ keeps |result| < |b|, so the correction
        // itself cannot overflow; checked_rem turns i64::MIN % -1 into a
        // typed error instead of a panic.
        let remainder = a.checked_rem(b).ok_or_else(int_overflow)?;
        let remainder = if remainder != 0 && (remainder < 0) != (b < 0) {
            remainder + b
        } else {
            remainder
        };
        return Ok(Value::Int(remainder));
    }
    match (left.as_number(), right.as_number()) {
        (Some(a), Some(b)) => {
            if b == 0.0 {
                Err(Raise::new(ExcKind::ZeroDivisionError, "float modulo"))
            } else {
                Ok(Value::Float(a - b * (a / b).floor()))
            }
        }
        _ => Err(type_error_for("%", left, right)),
    }
}

fn pow_values(left: &Value, right: &Value) -> Result<Value, Raise> {
    if let Some((a, b)) = int_pair(left, right) {
        if b >= 0 {
            let exp = u32::try_from(b).map_err(|_| int_overflow())?;
            return Ok(Value::Int(a.checked_pow(exp).ok_or_else(int_overflow)?));
        }
        return Ok(Value::Float((a as f64).powf(b as f64)));
    }
    match (left.as_number(), right.as_number()) {
        (Some(a), Some(b)) => Ok(Value::Float(a.powf(b))),
        _ => Err(type_error_for("**", left, right)),
    }
}
