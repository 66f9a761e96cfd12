//! Reference value representation for `funcgen`.
//!
//! [`Value`] is a dynamically typed value with lazy, memoizing [`List`]s and persistent
//! [`Map`]s. [`new_generator`] returns a [`FunctionGenerator`](funcgen::FunctionGenerator)
//! preloaded with the usual operators, constants and functions over it, with every value-kind
//! capability registered.
//!
//! ## Examples
//!
//! ```rust
//! use funcgen::{Env, ast::build};
//! use funcgen_value::{Value, new_generator};
//!
//! // list(5).map(x -> x * x).reduce((a, b) -> a + b)
//! let ast = build::method_call(
//!     build::method_call(
//!         build::call_named("list", vec![build::constant(Value::Int(5))]),
//!         "map",
//!         vec![build::closure(&["x"], build::operate("*", build::ident("x"), build::ident("x")))],
//!     ),
//!     "reduce",
//!     vec![build::closure(&["a", "b"], build::operate("+", build::ident("a"), build::ident("b")))],
//! );
//!
//! let expression = new_generator().generate(&ast).unwrap();
//! assert_eq!(expression.eval(&Env::new()).unwrap(), Value::Int(30));
//! ```
mod error;
mod generator;
mod list;
mod map;
mod methods;
mod value;

pub use error::Error;
pub use generator::{ValueHandler, new_generator};
pub use list::{List, Sink};
pub use map::Map;
pub use methods::call_method;
pub use value::Value;
