use std::fmt::{self, Debug, Display, Formatter};

use smol_str::SmolStr;

use super::Line;
use crate::Shared;

pub type IdentName = SmolStr;
pub type Params = Shared<[IdentName]>;
pub type Args<V> = Vec<Shared<Node<V>>>;

/// A node of the expression tree.
///
/// Trees are immutable once built. Rewrites such as constant folding produce new nodes and
/// share every untouched subtree with the input.
#[derive(Debug, Clone, PartialEq)]
pub struct Node<V> {
    pub line: Line,
    pub expr: Expr<V>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr<V> {
    Ident(IdentName),
    Const(V),
    Let {
        name: IdentName,
        value: Shared<Node<V>>,
        inner: Shared<Node<V>>,
    },
    If {
        cond: Shared<Node<V>>,
        then: Shared<Node<V>>,
        otherwise: Shared<Node<V>>,
    },
    Unary {
        op: SmolStr,
        value: Shared<Node<V>>,
    },
    Operate {
        op: SmolStr,
        a: Shared<Node<V>>,
        b: Shared<Node<V>>,
    },
    Closure {
        params: Params,
        body: Shared<Node<V>>,
    },
    List(Args<V>),
    ListAccess {
        list: Shared<Node<V>>,
        index: Shared<Node<V>>,
    },
    Map(Vec<(IdentName, Shared<Node<V>>)>),
    MapAccess {
        map: Shared<Node<V>>,
        key: IdentName,
    },
    Call {
        func: Shared<Node<V>>,
        args: Args<V>,
    },
    MethodCall {
        value: Shared<Node<V>>,
        name: IdentName,
        args: Args<V>,
    },
}

impl<V> Node<V> {
    pub fn new(line: Line, expr: Expr<V>) -> Self {
        Self { line, expr }
    }

    /// Returns the constant held by this node, if it is one.
    #[inline(always)]
    pub fn as_const(&self) -> Option<&V> {
        match &self.expr {
            Expr::Const(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_ident(&self) -> Option<&IdentName> {
        match &self.expr {
            Expr::Ident(name) => Some(name),
            _ => None,
        }
    }

    /// Short, stable name of the node variant for diagnostics.
    pub fn kind(&self) -> &'static str {
        match &self.expr {
            Expr::Ident(_) => "identifier",
            Expr::Const(_) => "constant",
            Expr::Let { .. } => "let",
            Expr::If { .. } => "if",
            Expr::Unary { .. } => "unary operation",
            Expr::Operate { .. } => "operation",
            Expr::Closure { .. } => "closure",
            Expr::List(_) => "list literal",
            Expr::ListAccess { .. } => "list access",
            Expr::Map(_) => "map literal",
            Expr::MapAccess { .. } => "map access",
            Expr::Call { .. } => "function call",
            Expr::MethodCall { .. } => "method call",
        }
    }

    /// Counts the nodes of this tree.
    pub fn node_count(&self) -> usize {
        1 + match &self.expr {
            Expr::Ident(_) | Expr::Const(_) => 0,
            Expr::Let { value, inner, .. } => value.node_count() + inner.node_count(),
            Expr::If {
                cond,
                then,
                otherwise,
            } => cond.node_count() + then.node_count() + otherwise.node_count(),
            Expr::Unary { value, .. } => value.node_count(),
            Expr::Operate { a, b, .. } => a.node_count() + b.node_count(),
            Expr::Closure { body, .. } => body.node_count(),
            Expr::List(items) => items.iter().map(|n| n.node_count()).sum(),
            Expr::ListAccess { list, index } => list.node_count() + index.node_count(),
            Expr::Map(entries) => entries.iter().map(|(_, n)| n.node_count()).sum(),
            Expr::MapAccess { map, .. } => map.node_count(),
            Expr::Call { func, args } => {
                func.node_count() + args.iter().map(|n| n.node_count()).sum::<usize>()
            }
            Expr::MethodCall { value, args, .. } => {
                value.node_count() + args.iter().map(|n| n.node_count()).sum::<usize>()
            }
        }
    }
}

fn write_args<V: Debug>(f: &mut Formatter<'_>, args: &[Shared<Node<V>>]) -> fmt::Result {
    for (i, arg) in args.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{}", arg)?;
    }
    Ok(())
}

impl<V: Debug> Display for Node<V> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match &self.expr {
            Expr::Ident(name) => write!(f, "{}", name),
            Expr::Const(value) => write!(f, "{:?}", value),
            Expr::Let { name, value, inner } => write!(f, "let {}={}; {}", name, value, inner),
            Expr::If {
                cond,
                then,
                otherwise,
            } => write!(f, "if {} then {} else {}", cond, then, otherwise),
            Expr::Unary { op, value } => write!(f, "{}{}", op, value),
            Expr::Operate { op, a, b } => write!(f, "({}{}{})", a, op, b),
            Expr::Closure { params, body } => {
                write!(f, "(")?;
                for (i, param) in params.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", param)?;
                }
                write!(f, ")->{}", body)
            }
            Expr::List(items) => {
                write!(f, "[")?;
                write_args(f, items)?;
                write!(f, "]")
            }
            Expr::ListAccess { list, index } => write!(f, "{}[{}]", list, index),
            Expr::Map(entries) => {
                write!(f, "{{")?;
                for (i, (key, value)) in entries.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}:{}", key, value)?;
                }
                write!(f, "}}")
            }
            Expr::MapAccess { map, key } => write!(f, "{}.{}", map, key),
            Expr::Call { func, args } => {
                write!(f, "{}(", func)?;
                write_args(f, args)?;
                write!(f, ")")
            }
            Expr::MethodCall { value, name, args } => {
                write!(f, "{}.{}(", value, name)?;
                write_args(f, args)?;
                write!(f, ")")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::build;

    #[test]
    fn test_display_operation() {
        let node = build::operate("+", build::constant(1), build::ident("x"));
        assert_eq!(node.to_string(), "(1+x)");
    }

    #[test]
    fn test_display_closure_and_call() {
        let node = build::call(
            build::closure(&["a", "b"], build::operate("*", build::ident("a"), build::ident("b"))),
            vec![build::constant(2), build::constant(3)],
        );
        assert_eq!(node.to_string(), "(a, b)->(a*b)(2, 3)");
    }

    #[test]
    fn test_node_count() {
        let node: Shared<Node<i64>> = build::let_(
            "a",
            build::constant(1),
            build::operate("+", build::ident("a"), build::constant(2)),
        );
        assert_eq!(node.node_count(), 5);
    }
}
