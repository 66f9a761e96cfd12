//! Constructors for building trees by hand.
//!
//! Parsers usually create nodes directly; these helpers keep tests and host glue code
//! short. Every node is created without a line; use [`at`] to attach one.

use super::Line;
use super::node::{Expr, IdentName, Node};
use crate::Shared;

type NodeRef<V> = Shared<Node<V>>;

fn node<V>(expr: Expr<V>) -> NodeRef<V> {
    Shared::new(Node::new(Line::UNKNOWN, expr))
}

/// Returns a copy of `node` tagged with `line`.
pub fn at<V: Clone>(line: u32, node: NodeRef<V>) -> NodeRef<V> {
    Shared::new(Node::new(Line::new(line), node.expr.clone()))
}

pub fn ident<V>(name: &str) -> NodeRef<V> {
    node(Expr::Ident(IdentName::new(name)))
}

pub fn constant<V>(value: V) -> NodeRef<V> {
    node(Expr::Const(value))
}

pub fn let_<V>(name: &str, value: NodeRef<V>, inner: NodeRef<V>) -> NodeRef<V> {
    node(Expr::Let {
        name: IdentName::new(name),
        value,
        inner,
    })
}

pub fn if_<V>(cond: NodeRef<V>, then: NodeRef<V>, otherwise: NodeRef<V>) -> NodeRef<V> {
    node(Expr::If {
        cond,
        then,
        otherwise,
    })
}

pub fn unary<V>(op: &str, value: NodeRef<V>) -> NodeRef<V> {
    node(Expr::Unary {
        op: op.into(),
        value,
    })
}

pub fn operate<V>(op: &str, a: NodeRef<V>, b: NodeRef<V>) -> NodeRef<V> {
    node(Expr::Operate {
        op: op.into(),
        a,
        b,
    })
}

pub fn closure<V>(params: &[&str], body: NodeRef<V>) -> NodeRef<V> {
    node(Expr::Closure {
        params: params.iter().map(|p| IdentName::new(p)).collect(),
        body,
    })
}

pub fn list<V>(items: Vec<NodeRef<V>>) -> NodeRef<V> {
    node(Expr::List(items))
}

pub fn list_access<V>(list: NodeRef<V>, index: NodeRef<V>) -> NodeRef<V> {
    node(Expr::ListAccess { list, index })
}

pub fn map<V>(entries: Vec<(&str, NodeRef<V>)>) -> NodeRef<V> {
    node(Expr::Map(
        entries
            .into_iter()
            .map(|(key, value)| (IdentName::new(key), value))
            .collect(),
    ))
}

pub fn map_access<V>(map: NodeRef<V>, key: &str) -> NodeRef<V> {
    node(Expr::MapAccess {
        map,
        key: IdentName::new(key),
    })
}

pub fn call<V>(func: NodeRef<V>, args: Vec<NodeRef<V>>) -> NodeRef<V> {
    node(Expr::Call { func, args })
}

/// Call of a function referenced by name, the common case `f(a, b)`.
pub fn call_named<V>(name: &str, args: Vec<NodeRef<V>>) -> NodeRef<V> {
    call(ident(name), args)
}

pub fn method_call<V>(value: NodeRef<V>, name: &str, args: Vec<NodeRef<V>>) -> NodeRef<V> {
    node(Expr::MethodCall {
        value,
        name: IdentName::new(name),
        args,
    })
}
