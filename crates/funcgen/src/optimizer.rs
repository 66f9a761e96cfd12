use smol_str::SmolStr;
use tracing::debug;

use crate::ast::node::{Args, Expr, IdentName, Node};
use crate::error::OptimizeError;
use crate::function::Arity;
use crate::generator::FunctionGenerator;
use crate::{AstRef, Line, Shared, ValueType};

/// Constant folding pass run before code generation.
///
/// The optimizer rewrites a tree bottom-up and returns a new tree. Subtrees that were not
/// rewritten are shared with the input. It folds:
///
/// - identifiers naming a registered constant, unless bound by an enclosing `let` or closure
/// - pure operators and all unary operators applied to constants
/// - `(c1 op x) op c2` and `(x op c1) op c2` for pure commutative operators, by combining
///   the two constants
/// - conditionals with a constant condition, keeping only the selected branch
/// - list and map literals of constants
/// - calls of pure static functions with constant arguments
#[derive(Debug)]
pub struct Optimizer<'g, V> {
    generator: &'g FunctionGenerator<V>,
    scope: Vec<IdentName>,
}

fn constant<V>(line: Line, value: V) -> AstRef<V> {
    Shared::new(Node::new(line, Expr::Const(value)))
}

/// Returns `node` itself if no child changed, a new node built by `expr` otherwise.
fn rebuild<V>(node: &AstRef<V>, unchanged: bool, expr: impl FnOnce() -> Expr<V>) -> AstRef<V> {
    if unchanged {
        Shared::clone(node)
    } else {
        Shared::new(Node::new(node.line, expr()))
    }
}

fn same_args<V>(a: &Args<V>, b: &Args<V>) -> bool {
    a.iter().zip(b.iter()).all(|(a, b)| Shared::ptr_eq(a, b))
}

fn all_const<V: Clone>(nodes: &Args<V>) -> Option<Vec<V>> {
    nodes.iter().map(|node| node.as_const().cloned()).collect()
}

impl<'g, V: ValueType> Optimizer<'g, V> {
    pub fn new(generator: &'g FunctionGenerator<V>) -> Self {
        Self {
            generator,
            scope: Vec::new(),
        }
    }

    fn in_scope(&self, name: &str) -> bool {
        self.scope.iter().any(|bound| bound == name)
    }

    fn optimize_args(&mut self, args: &Args<V>) -> Result<Args<V>, OptimizeError> {
        args.iter().map(|arg| self.optimize(arg)).collect()
    }

    pub fn optimize(&mut self, node: &AstRef<V>) -> Result<AstRef<V>, OptimizeError> {
        let line = node.line;
        match &node.expr {
            Expr::Ident(name) => match self.generator.constants.get(name) {
                Some(value) if !self.in_scope(name) => Ok(constant(line, value.clone())),
                _ => Ok(Shared::clone(node)),
            },
            Expr::Const(_) => Ok(Shared::clone(node)),
            Expr::Let { name, value, inner } => {
                let depth = self.scope.len();
                let recursive = matches!(value.expr, Expr::Closure { .. });
                if recursive {
                    self.scope.push(name.clone());
                }
                let new_value = self.optimize(value)?;
                if !recursive {
                    self.scope.push(name.clone());
                }
                let new_inner = self.optimize(inner)?;
                self.scope.truncate(depth);

                let unchanged = Shared::ptr_eq(value, &new_value) && Shared::ptr_eq(inner, &new_inner);
                Ok(rebuild(node, unchanged, || Expr::Let {
                    name: name.clone(),
                    value: new_value,
                    inner: new_inner,
                }))
            }
            Expr::If {
                cond,
                then,
                otherwise,
            } => {
                let new_cond = self.optimize(cond)?;
                if let (Some(value), Some(to_bool)) = (new_cond.as_const(), self.generator.to_bool) {
                    return match to_bool(value) {
                        Some(true) => self.optimize(then),
                        Some(false) => self.optimize(otherwise),
                        None => Err(OptimizeError::NotABool {
                            value: format!("{:?}", value),
                            line,
                        }),
                    };
                }

                let new_then = self.optimize(then)?;
                let new_otherwise = self.optimize(otherwise)?;
                let unchanged = Shared::ptr_eq(cond, &new_cond)
                    && Shared::ptr_eq(then, &new_then)
                    && Shared::ptr_eq(otherwise, &new_otherwise);
                Ok(rebuild(node, unchanged, || Expr::If {
                    cond: new_cond,
                    then: new_then,
                    otherwise: new_otherwise,
                }))
            }
            Expr::Unary { op, value } => {
                let new_value = self.optimize(value)?;
                if let Some(operand) = new_value.as_const()
                    && let Some(operator) = self.generator.unary_operator(op)
                {
                    let folded = operator.apply(operand).map_err(|source| OptimizeError::Unary {
                        op: op.to_string(),
                        source,
                        line,
                    })?;
                    return Ok(constant(line, folded));
                }

                Ok(rebuild(node, Shared::ptr_eq(value, &new_value), || Expr::Unary {
                    op: op.clone(),
                    value: new_value,
                }))
            }
            Expr::Operate { op, a, b } => {
                let new_a = self.optimize(a)?;
                let new_b = self.optimize(b)?;
                if let Some(folded) = self.fold_operate(line, op, &new_a, &new_b)? {
                    return Ok(folded);
                }

                let unchanged = Shared::ptr_eq(a, &new_a) && Shared::ptr_eq(b, &new_b);
                Ok(rebuild(node, unchanged, || Expr::Operate {
                    op: op.clone(),
                    a: new_a,
                    b: new_b,
                }))
            }
            Expr::Closure { params, body } => {
                let depth = self.scope.len();
                self.scope.extend(params.iter().cloned());
                let new_body = self.optimize(body)?;
                self.scope.truncate(depth);

                Ok(rebuild(node, Shared::ptr_eq(body, &new_body), || Expr::Closure {
                    params: Shared::clone(params),
                    body: new_body,
                }))
            }
            Expr::List(items) => {
                let new_items = self.optimize_args(items)?;
                if let Some(handler) = &self.generator.list_handler
                    && let Some(values) = all_const(&new_items)
                {
                    return Ok(constant(line, handler.from_list(values)));
                }

                Ok(rebuild(node, same_args(items, &new_items), || Expr::List(new_items)))
            }
            Expr::ListAccess { list, index } => {
                let new_list = self.optimize(list)?;
                let new_index = self.optimize(index)?;
                let unchanged = Shared::ptr_eq(list, &new_list) && Shared::ptr_eq(index, &new_index);
                Ok(rebuild(node, unchanged, || Expr::ListAccess {
                    list: new_list,
                    index: new_index,
                }))
            }
            Expr::Map(entries) => {
                let new_entries = entries
                    .iter()
                    .map(|(key, value)| Ok((key.clone(), self.optimize(value)?)))
                    .collect::<Result<Vec<_>, OptimizeError>>()?;
                if let Some(handler) = &self.generator.map_handler
                    && let Some(values) = new_entries
                        .iter()
                        .map(|(key, value)| value.as_const().map(|v| (key.clone(), v.clone())))
                        .collect::<Option<Vec<_>>>()
                {
                    return Ok(constant(line, handler.from_map(values)));
                }

                let unchanged = entries
                    .iter()
                    .zip(new_entries.iter())
                    .all(|((_, a), (_, b))| Shared::ptr_eq(a, b));
                Ok(rebuild(node, unchanged, || Expr::Map(new_entries)))
            }
            Expr::MapAccess { map, key } => {
                let new_map = self.optimize(map)?;
                Ok(rebuild(node, Shared::ptr_eq(map, &new_map), || Expr::MapAccess {
                    map: new_map,
                    key: key.clone(),
                }))
            }
            Expr::Call { func, args } => {
                let new_args = self.optimize_args(args)?;

                if let Expr::Ident(name) = &func.expr
                    && !self.in_scope(name)
                    && let Some(function) = self.generator.static_functions.get(name)
                {
                    if function.is_pure() {
                        if let Arity::Fixed(expected) = function.arity()
                            && expected != new_args.len()
                        {
                            return Err(OptimizeError::ArityMismatch {
                                name: name.to_string(),
                                expected,
                                got: new_args.len(),
                                line,
                            });
                        }
                        if let Some(values) = all_const(&new_args) {
                            let folded = function.eval(&values).map_err(|source| OptimizeError::Call {
                                name: name.to_string(),
                                source,
                                line,
                            })?;
                            debug!(function = %name, args = values.len(), "folded constant function call");
                            return Ok(constant(func.line.or(line), folded));
                        }
                    }

                    // A static function name is never replaced by a constant of the same name.
                    return Ok(rebuild(node, same_args(args, &new_args), || Expr::Call {
                        func: Shared::clone(func),
                        args: new_args,
                    }));
                }

                let new_func = self.optimize(func)?;
                let unchanged = Shared::ptr_eq(func, &new_func) && same_args(args, &new_args);
                Ok(rebuild(node, unchanged, || Expr::Call {
                    func: new_func,
                    args: new_args,
                }))
            }
            Expr::MethodCall { value, name, args } => {
                let new_value = self.optimize(value)?;
                let new_args = self.optimize_args(args)?;
                let unchanged = Shared::ptr_eq(value, &new_value) && same_args(args, &new_args);
                Ok(rebuild(node, unchanged, || Expr::MethodCall {
                    value: new_value,
                    name: name.clone(),
                    args: new_args,
                }))
            }
        }
    }

    /// Folds an operation whose operands are already optimized. Returns `None` if no rule
    /// applies.
    fn fold_operate(
        &self,
        line: Line,
        op: &SmolStr,
        a: &AstRef<V>,
        b: &AstRef<V>,
    ) -> Result<Option<AstRef<V>>, OptimizeError> {
        let Some(operator) = self.generator.operator(op) else {
            return Ok(None);
        };
        let Some(b_const) = b.as_const() else {
            return Ok(None);
        };
        if !operator.is_pure {
            return Ok(None);
        }

        let apply = |x: &V, y: &V| {
            operator.apply(x, y).map_err(|source| OptimizeError::Operator {
                op: op.to_string(),
                source,
                line,
            })
        };

        if let Some(a_const) = a.as_const() {
            return Ok(Some(constant(line, apply(a_const, b_const)?)));
        }

        if !operator.is_commutative {
            return Ok(None);
        }
        let Expr::Operate {
            op: inner_op,
            a: inner_a,
            b: inner_b,
        } = &a.expr
        else {
            return Ok(None);
        };
        if inner_op != op {
            return Ok(None);
        }

        let (new_a, new_b) = if let Some(c) = inner_a.as_const() {
            (constant(line, apply(c, b_const)?), Shared::clone(inner_b))
        } else if let Some(c) = inner_b.as_const() {
            (Shared::clone(inner_a), constant(line, apply(c, b_const)?))
        } else {
            return Ok(None);
        };

        // Every step merges two constants, so this terminates.
        let folded = self.fold_operate(line, op, &new_a, &new_b)?;
        Ok(Some(folded.unwrap_or_else(|| {
            Shared::new(Node::new(
                line,
                Expr::Operate {
                    op: op.clone(),
                    a: new_a,
                    b: new_b,
                },
            ))
        })))
    }
}
