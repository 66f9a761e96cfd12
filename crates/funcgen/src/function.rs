use std::fmt::{self, Debug, Display, Formatter};
use std::panic::{AssertUnwindSafe, catch_unwind};

use crate::ast::node::IdentName;
use crate::error::{Error, EvalError, panic_message};
use crate::jit::{JitSlot, JitState};
use crate::{Line, Shared, ValueType};

pub(crate) type FunctionImpl<V> = dyn Fn(&[V]) -> Result<V, EvalError> + Send + Sync;

/// Number of arguments a function accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Arity {
    Fixed(usize),
    Variadic,
}

impl Arity {
    #[inline(always)]
    pub fn accepts(self, args: usize) -> bool {
        match self {
            Arity::Fixed(n) => n == args,
            Arity::Variadic => true,
        }
    }

    pub fn fixed(self) -> Option<usize> {
        match self {
            Arity::Fixed(n) => Some(n),
            Arity::Variadic => None,
        }
    }
}

impl Display for Arity {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Arity::Fixed(n) => write!(f, "{}", n),
            Arity::Variadic => write!(f, "any"),
        }
    }
}

/// A callable value: a host function registered by name or a closure produced by a
/// closure literal.
pub struct Function<V> {
    func: Shared<FunctionImpl<V>>,
    args: Arity,
    is_pure: bool,
    /// Callee named in arity errors.
    name: IdentName,
    line: Line,
    pub(crate) jit: Option<Shared<JitSlot<V>>>,
}

impl<V> Clone for Function<V> {
    fn clone(&self) -> Self {
        Self {
            func: Shared::clone(&self.func),
            args: self.args,
            is_pure: self.is_pure,
            name: self.name.clone(),
            line: self.line,
            jit: self.jit.clone(),
        }
    }
}

impl<V: ValueType> Function<V> {
    /// Creates a function. A pure function's result depends only on its arguments, which
    /// allows the optimizer to call it ahead of time when all arguments are constant.
    pub fn new<F>(args: Arity, is_pure: bool, func: F) -> Self
    where
        F: Fn(&[V]) -> Result<V, EvalError> + Send + Sync + 'static,
    {
        Self {
            func: Shared::new(func),
            args,
            is_pure,
            name: IdentName::new_static("function"),
            line: Line::UNKNOWN,
            jit: None,
        }
    }

    /// Pure function of exactly one argument.
    pub fn simple<F>(func: F) -> Self
    where
        F: Fn(&V) -> Result<V, EvalError> + Send + Sync + 'static,
    {
        Self::new(Arity::Fixed(1), true, move |args| func(&args[0]))
    }

    pub(crate) fn closure(
        args: usize,
        func: Shared<FunctionImpl<V>>,
        name: IdentName,
        line: Line,
        jit: Option<Shared<JitSlot<V>>>,
    ) -> Self {
        Self {
            func,
            args: Arity::Fixed(args),
            is_pure: false,
            name,
            line,
            jit,
        }
    }

    /// Sets the name reported when the function is called with the wrong number of arguments.
    pub fn named(mut self, name: &str) -> Self {
        self.name = IdentName::new(name);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn arity(&self) -> Arity {
        self.args
    }

    pub fn is_pure(&self) -> bool {
        self.is_pure
    }

    /// Calls the function.
    ///
    /// Closures that were escalated to native code run through the native entry point as
    /// long as every argument can be marshalled; any other call takes the interpreted path.
    pub fn eval(&self, args: &[V]) -> Result<V, EvalError> {
        if !self.args.accepts(args.len()) {
            return Err(EvalError::ArityMismatch {
                callee: self.name.to_string(),
                expected: self.args.fixed().unwrap_or_default(),
                got: args.len(),
                line: self.line,
            });
        }

        if let Some(slot) = &self.jit {
            if let Some(value) = slot.call_native(args) {
                return Ok(value);
            }
            JitSlot::record_call(slot);
        }

        (self.func)(args)
    }

    /// Calls the function from host code, converting a panic raised by a host callback into
    /// an error.
    pub fn call(&self, args: &[V]) -> Result<V, Error> {
        catch_unwind(AssertUnwindSafe(|| self.eval(args)))
            .unwrap_or_else(|payload| {
                Err(EvalError::Panic {
                    message: panic_message(payload),
                    line: Line::UNKNOWN,
                })
            })
            .map_err(Error::from)
    }

    /// Escalation state of a closure. Functions that are not closure literals never leave
    /// [`JitState::NotRequested`].
    pub fn jit_state(&self) -> JitState {
        self.jit
            .as_ref()
            .map(|slot| slot.state())
            .unwrap_or(JitState::NotRequested)
    }

    /// Returns `true` if this closure currently dispatches to native code.
    pub fn is_native(&self) -> bool {
        self.jit.as_ref().is_some_and(|slot| slot.is_ready())
    }

    /// Returns `true` if both handles call the same code.
    pub fn ptr_eq(&self, other: &Function<V>) -> bool {
        Shared::ptr_eq(&self.func, &other.func)
    }
}

impl<V> Debug for Function<V> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Function")
            .field("name", &self.name)
            .field("args", &self.args)
            .field("is_pure", &self.is_pure)
            .field("jit", &self.jit.as_ref().map(|slot| slot.id()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn sum() -> Function<i64> {
        Function::new(Arity::Variadic, true, |args: &[i64]| Ok(args.iter().sum()))
    }

    #[rstest]
    #[case::fixed_match(Arity::Fixed(2), 2, true)]
    #[case::fixed_mismatch(Arity::Fixed(2), 3, false)]
    #[case::variadic_empty(Arity::Variadic, 0, true)]
    #[case::variadic_many(Arity::Variadic, 9, true)]
    fn test_arity_accepts(#[case] arity: Arity, #[case] args: usize, #[case] expected: bool) {
        assert_eq!(arity.accepts(args), expected);
    }

    #[test]
    fn test_variadic_function() {
        assert_eq!(sum().eval(&[1, 2, 3]).unwrap(), 6);
        assert_eq!(sum().eval(&[]).unwrap(), 0);
    }

    #[test]
    fn test_arity_mismatch() {
        let double = Function::simple(|a: &i64| Ok(a * 2));
        assert_eq!(double.eval(&[4]).unwrap(), 8);
        assert!(matches!(
            double.eval(&[1, 2]),
            Err(EvalError::ArityMismatch { expected: 1, got: 2, .. })
        ));
    }

    #[test]
    fn test_arity_mismatch_names_callee() {
        let double = Function::simple(|a: &i64| Ok(a * 2)).named("double");
        assert_eq!(
            double.eval(&[1, 2]).unwrap_err().to_string(),
            "unknown line: wrong number of arguments in call to double, expected 1, got 2"
        );
    }

    #[test]
    fn test_call_catches_panic() {
        let boom = Function::new(Arity::Fixed(0), false, |_: &[i64]| panic!("boom"));
        let err = boom.call(&[]).unwrap_err();
        assert!(matches!(err, Error::Eval(EvalError::Panic { ref message, .. }) if message == "boom"));
    }

    #[test]
    fn test_host_function_has_no_jit_state() {
        assert_eq!(sum().jit_state(), JitState::NotRequested);
        assert!(!sum().is_native());
    }

    #[test]
    fn test_ptr_eq() {
        let f = sum();
        assert!(f.ptr_eq(&f.clone()));
        assert!(!f.ptr_eq(&sum()));
    }
}
