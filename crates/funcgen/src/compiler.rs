//! Closure-based code generation.
//!
//! Every node of a tree is compiled to a closure taking the environment to evaluate in.
//! Operators, functions and handlers are resolved once while compiling, so evaluating a
//! compiled expression never looks anything up by name except variables.
//!
//! ## Example
//!
//! ```rust
//! use funcgen::{Env, FunctionGenerator, ast::build};
//!
//! let mut generator = FunctionGenerator::<i64>::new();
//! generator.add_op("+", true, |a, b| Ok(a + b));
//!
//! // let a = 2; a + 3
//! let ast = build::let_("a", build::constant(2), build::operate("+", build::ident("a"), build::constant(3)));
//! let expression = generator.generate(&ast).unwrap();
//! assert_eq!(expression.eval(&Env::new()).unwrap(), 5);
//! ```

mod compile;
pub(crate) mod compiled;

pub(crate) use compile::Compiler;
pub use compiled::{CompiledExpr, Expression};
