//! Compiled expression types.

use std::fmt::{self, Debug, Formatter};
use std::panic::{AssertUnwindSafe, catch_unwind};

use crate::env::Env;
use crate::error::{Error, EvalError, panic_message};
use crate::{AstRef, IdentName, Line, Shared, ValueType};

/// A compiled node: evaluates the node in the given environment.
pub type CompiledExpr<V> = Shared<dyn Fn(&Env<V>) -> Result<V, EvalError> + Send + Sync>;

/// An expression ready to be evaluated, produced by
/// [`FunctionGenerator::generate`](crate::FunctionGenerator::generate).
///
/// Expressions are immutable and can be evaluated concurrently from several threads.
pub struct Expression<V> {
    compiled: CompiledExpr<V>,
    ast: AstRef<V>,
}

impl<V> Clone for Expression<V> {
    fn clone(&self) -> Self {
        Self {
            compiled: Shared::clone(&self.compiled),
            ast: Shared::clone(&self.ast),
        }
    }
}

impl<V: ValueType> Expression<V> {
    pub(crate) fn new(compiled: CompiledExpr<V>, ast: AstRef<V>) -> Self {
        Self { compiled, ast }
    }

    /// Evaluates the expression.
    ///
    /// Every fault, including a panic raised by a host callback, is returned as an error.
    pub fn eval(&self, env: &Env<V>) -> Result<V, Error> {
        catch_unwind(AssertUnwindSafe(|| (self.compiled)(env)))
            .unwrap_or_else(|payload| {
                Err(EvalError::Panic {
                    message: panic_message(payload),
                    line: Line::UNKNOWN,
                })
            })
            .map_err(Error::from)
    }

    /// Evaluates the expression with the given variables in a fresh root environment.
    pub fn eval_with<I, K>(&self, vars: I) -> Result<V, Error>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<IdentName>,
    {
        self.eval(&Env::from_map(vars))
    }

    /// The tree this expression was compiled from, after optimization.
    pub fn ast(&self) -> &AstRef<V> {
        &self.ast
    }

    pub fn compiled(&self) -> &CompiledExpr<V> {
        &self.compiled
    }
}

impl<V: Debug> Debug for Expression<V> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Expression").field("ast", &format_args!("{}", self.ast)).finish()
    }
}
