use std::fmt::Write;

use rustc_hash::FxHashMap;
use smol_str::SmolStr;

use super::JitRequest;
use crate::ast::node::{Expr, Node};
use crate::error::JitError;

/// How a binary operator is written in C.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BinaryTemplate {
    /// `(a op b)`
    Infix(SmolStr),
    /// `name(a, b)`
    Call(SmolStr),
}

/// How a unary operator is written in C.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnaryTemplate {
    /// `(op a)`
    Prefix(SmolStr),
    /// `name(a)`
    Call(SmolStr),
}

#[derive(Debug, Clone)]
pub(crate) struct Templates {
    pub(crate) binary: FxHashMap<SmolStr, BinaryTemplate>,
    pub(crate) unary: FxHashMap<SmolStr, UnaryTemplate>,
}

impl Default for Templates {
    fn default() -> Self {
        let binary = [
            ("+", BinaryTemplate::Infix("+".into())),
            ("-", BinaryTemplate::Infix("-".into())),
            ("*", BinaryTemplate::Infix("*".into())),
            ("/", BinaryTemplate::Infix("/".into())),
            ("%", BinaryTemplate::Call("fmod".into())),
            ("^", BinaryTemplate::Call("pow".into())),
        ]
        .into_iter()
        .map(|(symbol, template)| (SmolStr::new(symbol), template))
        .collect();
        let unary = [("-", UnaryTemplate::Prefix("-".into()))]
            .into_iter()
            .map(|(symbol, template)| (SmolStr::new(symbol), template))
            .collect();

        Self { binary, unary }
    }
}

/// C translation unit exporting a single entry point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CSource {
    pub symbol: String,
    pub code: String,
}

/// Emits the C function `double <symbol>(const double *args)` computing the request body.
///
/// Only identifiers naming a parameter, constants with a native representation and
/// operators with a template can be translated. Every operator must have an operand
/// derived from a parameter: a subtree of constants alone is evaluated by the host
/// operators, whose result may not be a native number.
pub(crate) fn emit<V>(request: &JitRequest<'_, V>, templates: &Templates, symbol: &str) -> Result<CSource, JitError> {
    let mut body = String::new();
    if !emit_node(request, templates, request.body, &mut body)? {
        return Err(constant_subtree(request.body));
    }

    let mut code = String::with_capacity(body.len() + 128);
    let _ = writeln!(code, "#include <math.h>");
    let _ = writeln!(code);
    let _ = writeln!(code, "double {}(const double *args) {{", symbol);
    for i in 0..request.params.len() {
        let _ = writeln!(code, "    const double p{i} = args[{i}];");
    }
    let _ = writeln!(code, "    return {};", body);
    let _ = writeln!(code, "}}");

    Ok(CSource {
        symbol: symbol.to_string(),
        code,
    })
}

/// Writes the C expression for `node`, returns `true` if its value depends on a parameter.
fn emit_node<V>(
    request: &JitRequest<'_, V>,
    templates: &Templates,
    node: &Node<V>,
    out: &mut String,
) -> Result<bool, JitError> {
    match &node.expr {
        Expr::Ident(name) => {
            let index = request
                .params
                .iter()
                .position(|param| param == name)
                .ok_or_else(|| unsupported(node, format!("free variable {}", name)))?;
            let _ = write!(out, "p{}", index);
            Ok(true)
        }
        Expr::Const(value) => {
            let native = request
                .marshal
                .constant_to_native(value)
                .ok_or_else(|| unsupported(node, "non numeric constant".to_string()))?;
            write_f64(out, native);
            Ok(false)
        }
        Expr::Unary { op, value } => {
            let (open, close) = match templates.unary.get(op) {
                Some(UnaryTemplate::Prefix(c_op)) => (format!("({}", c_op), ")"),
                Some(UnaryTemplate::Call(func)) => (format!("{}(", func), ")"),
                None => return Err(unsupported(node, format!("unary operator {}", op))),
            };
            out.push_str(&open);
            if !emit_node(request, templates, value, out)? {
                return Err(constant_subtree(node));
            }
            out.push_str(close);
            Ok(true)
        }
        Expr::Operate { op, a, b } => {
            let (open, separator) = match templates.binary.get(op) {
                Some(BinaryTemplate::Infix(c_op)) => ("(".to_string(), format!(" {} ", c_op)),
                Some(BinaryTemplate::Call(func)) => (format!("{}(", func), ", ".to_string()),
                None => return Err(unsupported(node, format!("operator {}", op))),
            };
            out.push_str(&open);
            let a = emit_node(request, templates, a, out)?;
            out.push_str(&separator);
            let b = emit_node(request, templates, b, out)?;
            out.push(')');
            if !(a || b) {
                return Err(constant_subtree(node));
            }
            Ok(true)
        }
        _ => Err(unsupported(node, node.kind().to_string())),
    }
}

fn constant_subtree<V>(node: &Node<V>) -> JitError {
    unsupported(node, format!("{} without a parameter", node.kind()))
}

fn unsupported<V>(node: &Node<V>, what: String) -> JitError {
    JitError::Unsupported { what, line: node.line }
}

fn write_f64(out: &mut String, value: f64) {
    if value.is_nan() {
        out.push_str("NAN");
    } else if value.is_infinite() {
        out.push_str(if value > 0.0 { "INFINITY" } else { "(-INFINITY)" });
    } else if value < 0.0 {
        let _ = write!(out, "({:?})", value);
    } else {
        let _ = write!(out, "{:?}", value);
    }
}
