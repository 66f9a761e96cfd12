//! Main compilation logic for transforming trees into compiled expressions.

use smallvec::SmallVec;

use super::compiled::CompiledExpr;
use crate::ast::node::{Args, Expr, IdentName, Node, Params};
use crate::env::Env;
use crate::error::{CompileError, EvalError};
use crate::function::{Arity, Function};
use crate::generator::FunctionGenerator;
use crate::handler::ClosureHandler;
use crate::jit::{JitContext, JitSlot};
use crate::{AstRef, Line, Shared, ValueType};

type ArgValues<V> = SmallVec<[V; 4]>;

/// Compiles one tree for a generator.
///
/// The compiler tracks the names bound by enclosing `let` nodes and closure parameters, so
/// a local binding named like a static function is called as the local value.
pub(crate) struct Compiler<'g, V> {
    generator: &'g FunctionGenerator<V>,
    jit: Option<Shared<JitContext<V>>>,
    scope: Vec<IdentName>,
}

/// A compiled closure literal. Each evaluation of the literal instantiates a function
/// capturing the environment it was evaluated in.
struct ClosureTemplate<V> {
    name: IdentName,
    line: Line,
    params: Params,
    body: CompiledExpr<V>,
    jit: Option<Shared<JitSlot<V>>>,
}

impl<V: ValueType> ClosureTemplate<V> {
    fn instantiate(self: &Shared<Self>, captured: Env<V>) -> Function<V> {
        let template = Shared::clone(self);
        let func = Shared::new(move |args: &[V]| {
            let env = template
                .params
                .iter()
                .zip(args)
                .fold(captured.clone(), |env, (param, arg)| env.bind(param.clone(), arg.clone()));
            (template.body)(&env)
        });
        Function::closure(
            self.params.len(),
            func,
            self.name.clone(),
            self.line,
            self.jit.clone(),
        )
    }
}

impl<'g, V: ValueType> Compiler<'g, V> {
    pub(crate) fn new(generator: &'g FunctionGenerator<V>) -> Self {
        Self {
            generator,
            jit: generator.jit_context(),
            scope: Vec::new(),
        }
    }

    fn in_scope(&self, name: &str) -> bool {
        self.scope.iter().any(|bound| bound == name)
    }

    fn closure_handler(&self, node: &Node<V>) -> Result<Shared<dyn ClosureHandler<V>>, CompileError> {
        self.generator
            .closure_handler
            .clone()
            .ok_or(CompileError::MissingCapability {
                node: node.kind(),
                capability: "closure handler",
                line: node.line,
            })
    }

    /// Compiles a single node into a compiled expression.
    pub(crate) fn compile(&mut self, node: &AstRef<V>) -> Result<CompiledExpr<V>, CompileError> {
        if let Some(custom) = &self.generator.custom_generator
            && let Some(result) = custom.generate(node, self.generator)
        {
            return result;
        }

        let line = node.line;
        match &node.expr {
            Expr::Ident(name) => self.compile_ident(name, line),
            Expr::Const(value) => {
                let value = value.clone();
                Ok(Shared::new(move |_| Ok(value.clone())))
            }
            Expr::Let { name, value, inner } => self.compile_let(node, name, value, inner),
            Expr::If {
                cond,
                then,
                otherwise,
            } => {
                let to_bool = self.generator.to_bool.ok_or(CompileError::MissingCapability {
                    node: node.kind(),
                    capability: "boolean coercion",
                    line,
                })?;
                let cond = self.compile(cond)?;
                let then = self.compile(then)?;
                let otherwise = self.compile(otherwise)?;

                Ok(Shared::new(move |env| {
                    let value = cond(env)?;
                    match to_bool(&value) {
                        Some(true) => then(env),
                        Some(false) => otherwise(env),
                        None => Err(EvalError::NotABool {
                            value: format!("{:?}", value),
                            line,
                        }),
                    }
                }))
            }
            Expr::Unary { op, value } => {
                let imp = self
                    .generator
                    .unary_operator(op)
                    .map(|op| Shared::clone(&op.imp))
                    .ok_or_else(|| CompileError::UnknownUnary {
                        op: op.to_string(),
                        line,
                    })?;
                let value = self.compile(value)?;

                Ok(Shared::new(move |env| {
                    let value = value(env)?;
                    imp(&value).map_err(|e| e.at(line))
                }))
            }
            Expr::Operate { op, a, b } => {
                let imp = self
                    .generator
                    .operator(op)
                    .map(|op| Shared::clone(&op.imp))
                    .ok_or_else(|| CompileError::UnknownOperator {
                        op: op.to_string(),
                        line,
                    })?;
                let a = self.compile(a)?;
                let b = self.compile(b)?;

                Ok(Shared::new(move |env| {
                    let a = a(env)?;
                    let b = b(env)?;
                    imp(&a, &b).map_err(|e| e.at(line))
                }))
            }
            Expr::Closure { params, body } => {
                let handler = self.closure_handler(node)?;
                let template = self.closure_template(IdentName::new_static("closure"), node.line, params, body)?;
                Ok(Shared::new(move |env| {
                    Ok(handler.from_closure(template.instantiate(env.clone())))
                }))
            }
            Expr::List(items) => {
                let handler = self.generator.list_handler.clone().ok_or(CompileError::MissingCapability {
                    node: node.kind(),
                    capability: "list handler",
                    line,
                })?;
                let items = self.compile_args(items)?;

                Ok(Shared::new(move |env| {
                    let values = items.iter().map(|item| item(env)).collect::<Result<Vec<_>, _>>()?;
                    Ok(handler.from_list(values))
                }))
            }
            Expr::ListAccess { list, index } => {
                let handler = self.generator.list_handler.clone().ok_or(CompileError::MissingCapability {
                    node: node.kind(),
                    capability: "list handler",
                    line,
                })?;
                let list = self.compile(list)?;
                let index = self.compile(index)?;

                Ok(Shared::new(move |env| {
                    let list = list(env)?;
                    let index = index(env)?;
                    handler
                        .access_list(&list, &index)
                        .map_err(|message| EvalError::List { message, line })
                }))
            }
            Expr::Map(entries) => {
                let handler = self.generator.map_handler.clone().ok_or(CompileError::MissingCapability {
                    node: node.kind(),
                    capability: "map handler",
                    line,
                })?;
                let entries = entries
                    .iter()
                    .map(|(key, value)| Ok((key.clone(), self.compile(value)?)))
                    .collect::<Result<Vec<_>, CompileError>>()?;

                Ok(Shared::new(move |env| {
                    let values = entries
                        .iter()
                        .map(|(key, value)| Ok((key.clone(), value(env)?)))
                        .collect::<Result<Vec<_>, EvalError>>()?;
                    Ok(handler.from_map(values))
                }))
            }
            Expr::MapAccess { map, key } => {
                let handler = self.generator.map_handler.clone().ok_or(CompileError::MissingCapability {
                    node: node.kind(),
                    capability: "map handler",
                    line,
                })?;
                let map = self.compile(map)?;
                let key = key.clone();

                Ok(Shared::new(move |env| {
                    let map = map(env)?;
                    handler
                        .access_map(&map, &key)
                        .map_err(|message| EvalError::Map { message, line })
                }))
            }
            Expr::Call { func, args } => self.compile_call(node, func, args),
            Expr::MethodCall { value, name, args } => self.compile_method_call(node, value, name, args),
        }
    }

    fn compile_args(&mut self, args: &Args<V>) -> Result<Vec<CompiledExpr<V>>, CompileError> {
        args.iter().map(|arg| self.compile(arg)).collect()
    }

    /// Identifiers resolve to the environment first, then to registered constants and
    /// finally to static functions as closure values.
    fn compile_ident(&mut self, name: &IdentName, line: Line) -> Result<CompiledExpr<V>, CompileError> {
        let fallback = if self.in_scope(name) {
            None
        } else {
            self.generator.constants.get(name).cloned().or_else(|| {
                let function = self.generator.static_functions.get(name)?;
                let handler = self.generator.closure_handler.as_ref()?;
                Some(handler.from_closure(function.clone()))
            })
        };
        let name = name.clone();

        Ok(Shared::new(move |env| match env.get(&name) {
            Some(value) => Ok(value),
            None => fallback.clone().ok_or_else(|| EvalError::NotFound {
                name: name.to_string(),
                line,
            }),
        }))
    }

    fn compile_let(
        &mut self,
        node: &Node<V>,
        name: &IdentName,
        value: &AstRef<V>,
        inner: &AstRef<V>,
    ) -> Result<CompiledExpr<V>, CompileError> {
        let name = name.clone();

        // A closure bound by `let` sees its own name, so it can call itself.
        if let Expr::Closure { params, body } = &value.expr {
            let handler = self.closure_handler(node)?;
            self.scope.push(name.clone());
            let template = self.closure_template(name.clone(), value.line, params, body)?;
            let inner = self.compile(inner)?;
            self.scope.pop();

            return Ok(Shared::new(move |env| {
                let handler = Shared::clone(&handler);
                let template = Shared::clone(&template);
                let scope = env.bind_recursive(name.clone(), move |here: &Env<V>| {
                    handler.from_closure(template.instantiate(here.clone()))
                });
                inner(&scope)
            }));
        }

        let value = self.compile(value)?;
        self.scope.push(name.clone());
        let inner = self.compile(inner)?;
        self.scope.pop();

        Ok(Shared::new(move |env| {
            let value = value(env)?;
            inner(&env.bind(name.clone(), value))
        }))
    }

    fn closure_template(
        &mut self,
        name: IdentName,
        line: Line,
        params: &Params,
        body: &AstRef<V>,
    ) -> Result<Shared<ClosureTemplate<V>>, CompileError> {
        let depth = self.scope.len();
        self.scope.extend(params.iter().cloned());
        let compiled = self.compile(body)?;
        self.scope.truncate(depth);

        let jit = self
            .jit
            .as_ref()
            .map(|context| Shared::new(JitSlot::new(Shared::clone(params), Shared::clone(body), Shared::clone(context))));

        Ok(Shared::new(ClosureTemplate {
            name,
            line,
            params: Shared::clone(params),
            body: compiled,
            jit,
        }))
    }

    fn compile_call(&mut self, node: &Node<V>, func: &AstRef<V>, args: &Args<V>) -> Result<CompiledExpr<V>, CompileError> {
        let line = node.line;

        if let Expr::Ident(name) = &func.expr
            && !self.in_scope(name)
            && let Some(function) = self.generator.static_functions.get(name)
        {
            if let Arity::Fixed(expected) = function.arity()
                && expected != args.len()
            {
                return Err(CompileError::ArityMismatch {
                    name: name.to_string(),
                    expected,
                    got: args.len(),
                    line,
                });
            }

            let function = function.clone();
            let args = self.compile_args(args)?;
            return Ok(Shared::new(move |env| {
                let values = eval_args(&args, env)?;
                function.eval(&values).map_err(|e| e.at(line))
            }));
        }

        let handler = self.closure_handler(node)?;
        let callee = func.to_string();
        let func = self.compile(func)?;
        let args = self.compile_args(args)?;

        Ok(Shared::new(move |env| {
            let value = func(env)?;
            let function = handler.to_closure(&value).ok_or_else(|| EvalError::NotAFunction {
                callee: callee.clone(),
                line,
            })?;
            if !function.arity().accepts(args.len()) {
                return Err(EvalError::ArityMismatch {
                    callee: callee.clone(),
                    expected: function.arity().fixed().unwrap_or_default(),
                    got: args.len(),
                    line,
                });
            }
            let values = eval_args(&args, env)?;
            function.eval(&values).map_err(|e| e.at(line))
        }))
    }

    /// Method calls first look for a closure stored in a map field of that name and fall back
    /// to the method handler.
    fn compile_method_call(
        &mut self,
        node: &Node<V>,
        value: &AstRef<V>,
        name: &IdentName,
        args: &Args<V>,
    ) -> Result<CompiledExpr<V>, CompileError> {
        let line = node.line;
        let fields = self
            .generator
            .map_handler
            .clone()
            .zip(self.generator.closure_handler.clone());
        let methods = self.generator.method_handler.clone();
        if fields.is_none() && methods.is_none() {
            return Err(CompileError::MissingCapability {
                node: node.kind(),
                capability: "method handler",
                line,
            });
        }

        let value = self.compile(value)?;
        let args = self.compile_args(args)?;
        let name = name.clone();

        Ok(Shared::new(move |env| {
            let value = value(env)?;
            let values = eval_args(&args, env)?;

            if let Some((maps, closures)) = &fields
                && maps.is_map(&value)
                && let Ok(field) = maps.access_map(&value, &name)
                && let Some(function) = closures.to_closure(&field)
            {
                if !function.arity().accepts(values.len()) {
                    return Err(EvalError::ArityMismatch {
                        callee: name.to_string(),
                        expected: function.arity().fixed().unwrap_or_default(),
                        got: values.len(),
                        line,
                    });
                }
                return function.eval(&values).map_err(|e| e.at(line));
            }

            match &methods {
                Some(methods) => methods.call_method(&value, &name, &values).map_err(|e| e.at(line)),
                None => Err(EvalError::Method {
                    name: name.to_string(),
                    message: "method not found".to_string(),
                    line,
                }),
            }
        }))
    }
}

#[inline]
fn eval_args<V>(args: &[CompiledExpr<V>], env: &Env<V>) -> Result<ArgValues<V>, EvalError> {
    args.iter().map(|arg| arg(env)).collect()
}
