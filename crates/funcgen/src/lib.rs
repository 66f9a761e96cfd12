//! `funcgen` turns expression syntax trees into executable closures over a value type
//! chosen by the host application.
//!
//! The host registers operators, named functions, constants and a handful of value-kind
//! capabilities (closures, lists, maps, boolean coercion) on a [`FunctionGenerator`]. The
//! generator then compiles an [`AstNode`] produced by an external parser into an
//! [`Expression`], optionally folding constants first. Closures that become hot can be
//! escalated to natively compiled code through the [`jit`] module.
//!
//! ## Examples
//!
//! ```rust
//! use funcgen::{Env, FunctionGenerator, ast::build};
//!
//! let mut generator = FunctionGenerator::<f64>::new();
//! generator
//!     .add_op("+", true, |a, b| Ok(a + b))
//!     .add_op("*", true, |a, b| Ok(a * b));
//!
//! // 1 + 2 * x
//! let ast = build::operate("+", build::constant(1.0), build::operate("*", build::constant(2.0), build::ident("x")));
//! let expression = generator.generate(&ast).unwrap();
//!
//! let env = Env::new().bind("x", 3.0);
//! assert_eq!(expression.eval(&env).unwrap(), 7.0);
//! ```
pub mod ast;
mod compiler;
mod env;
mod error;
mod function;
mod generator;
mod handler;
pub mod jit;
mod optimizer;
mod options;

use std::fmt::Debug;

pub use ast::Line;
pub use ast::node::Expr as AstExpr;
pub use ast::node::IdentName;
pub use ast::node::Node as AstNode;
pub use compiler::{CompiledExpr, Expression};
pub use env::Env;
pub use error::{CompileError, Error, EvalError, JitError, OptimizeError};
pub use function::{Arity, Function};
pub use generator::{FunctionGenerator, Operator, UnaryOperator};
pub use handler::{
    ClosureHandler, CustomGenerator, ListHandler, MapHandler, MethodHandler, NumberParser,
    StringConverter, ToBool,
};
pub use jit::{JitMarshal, JitOptions, JitState};
pub use optimizer::Optimizer;
pub use options::Options;

/// Reference-counted handle used for every structure shared between compiled closures.
///
/// Compiled expressions may be evaluated from several threads at once, so this is always
/// an atomically counted pointer.
pub type Shared<T> = std::sync::Arc<T>;

/// Shared handle to an AST node.
pub type AstRef<V> = Shared<AstNode<V>>;

/// Bounds every value representation must satisfy to flow through the generator.
pub trait ValueType: Clone + Debug + Send + Sync + 'static {}

impl<T: Clone + Debug + Send + Sync + 'static> ValueType for T {}

pub type FgResult<V> = Result<V, Error>;
