//! Value-kind capabilities supplied by the host.
//!
//! The generator never inspects values itself. Everything beyond calling operators is
//! delegated to these capabilities, and a node kind whose capability is not registered
//! cannot be compiled.

use crate::ast::node::{IdentName, Node};
use crate::compiler::CompiledExpr;
use crate::error::{CompileError, EvalError};
use crate::function::Function;
use crate::generator::FunctionGenerator;

/// Converts between functions and values.
pub trait ClosureHandler<V>: Send + Sync {
    fn from_closure(&self, function: Function<V>) -> V;

    /// Returns the function held by `value`, or `None` if it is not callable.
    fn to_closure(&self, value: &V) -> Option<Function<V>>;
}

/// Creates lists from literals and indexes into them.
pub trait ListHandler<V>: Send + Sync {
    fn from_list(&self, items: Vec<V>) -> V;

    fn access_list(&self, list: &V, index: &V) -> Result<V, String>;
}

/// Creates maps from literals and reads their fields.
pub trait MapHandler<V>: Send + Sync {
    fn from_map(&self, entries: Vec<(IdentName, V)>) -> V;

    fn access_map(&self, map: &V, key: &str) -> Result<V, String>;

    fn is_map(&self, value: &V) -> bool;
}

/// Dispatches method calls that are not calls of a closure stored in a map field.
pub trait MethodHandler<V>: Send + Sync {
    fn call_method(&self, value: &V, name: &str, args: &[V]) -> Result<V, EvalError>;
}

/// Hook consulted before the built-in generation of every node.
pub trait CustomGenerator<V>: Send + Sync {
    /// Returns `None` to fall back to the built-in generation of `node`.
    fn generate(
        &self,
        node: &Node<V>,
        generator: &FunctionGenerator<V>,
    ) -> Option<Result<CompiledExpr<V>, CompileError>>;
}

/// Coerces a value to a boolean, `None` if the value has no truth value.
pub type ToBool<V> = fn(&V) -> Option<bool>;

/// Parses a number literal, for use by parsers building trees for this generator.
pub type NumberParser<V> = fn(&str) -> Result<V, String>;

/// Converts a string literal into a value.
pub type StringConverter<V> = fn(String) -> V;
