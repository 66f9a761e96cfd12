use miette::Diagnostic;
use thiserror::Error;

use crate::ast::Line;

type Message = String;
type Name = String;

/// Faults detected while turning a tree into closures. Never retried.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CompileError {
    #[error("{line}: operator \"{op}\" is not registered")]
    UnknownOperator { op: Name, line: Line },
    #[error("{line}: unary operator \"{op}\" is not registered")]
    UnknownUnary { op: Name, line: Line },
    #[error("{line}: wrong number of arguments in call to {name}, expected {expected}, got {got}")]
    ArityMismatch {
        name: Name,
        expected: usize,
        got: usize,
        line: Line,
    },
    #[error("{line}: not supported: {node} requires a registered {capability}")]
    MissingCapability {
        node: &'static str,
        capability: &'static str,
        line: Line,
    },
    #[error("{line}: custom generator failed: {message}")]
    Custom { message: Message, line: Line },
    #[error("panic while generating code: {message}")]
    Panic { message: Message },
}

impl CompileError {
    pub fn line(&self) -> Line {
        match self {
            CompileError::UnknownOperator { line, .. }
            | CompileError::UnknownUnary { line, .. }
            | CompileError::ArityMismatch { line, .. }
            | CompileError::MissingCapability { line, .. }
            | CompileError::Custom { line, .. } => *line,
            CompileError::Panic { .. } => Line::UNKNOWN,
        }
    }
}

/// Faults raised while evaluating a compiled expression.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EvalError {
    #[error("{line}: variable '{name}' not found")]
    NotFound { name: Name, line: Line },
    #[error("{line}: wrong number of arguments in call to {callee}, expected {expected}, got {got}")]
    ArityMismatch {
        callee: Name,
        expected: usize,
        got: usize,
        line: Line,
    },
    #[error("{line}: not a function: {callee}")]
    NotAFunction { callee: Name, line: Line },
    #[error("{line}: condition is not a bool: {value}")]
    NotABool { value: Message, line: Line },
    #[error("{line}: list error: {message}")]
    List { message: Message, line: Line },
    #[error("{line}: map error: {message}")]
    Map { message: Message, line: Line },
    #[error("{line}: error calling {name}: {message}")]
    Method {
        name: Name,
        message: Message,
        line: Line,
    },
    #[error("{line}: {message}")]
    Custom { message: Message, line: Line },
    #[error("{line}: panic in host code: {message}")]
    Panic { message: Message, line: Line },
}

impl EvalError {
    /// Creates a fault raised by host code: an operator, a function or a value method.
    pub fn custom(message: impl Into<Message>) -> Self {
        EvalError::Custom {
            message: message.into(),
            line: Line::UNKNOWN,
        }
    }

    pub fn method(name: impl Into<Name>, message: impl Into<Message>) -> Self {
        EvalError::Method {
            name: name.into(),
            message: message.into(),
            line: Line::UNKNOWN,
        }
    }

    pub fn line(&self) -> Line {
        match self {
            EvalError::NotFound { line, .. }
            | EvalError::ArityMismatch { line, .. }
            | EvalError::NotAFunction { line, .. }
            | EvalError::NotABool { line, .. }
            | EvalError::List { line, .. }
            | EvalError::Map { line, .. }
            | EvalError::Method { line, .. }
            | EvalError::Custom { line, .. }
            | EvalError::Panic { line, .. } => *line,
        }
    }

    fn line_mut(&mut self) -> &mut Line {
        match self {
            EvalError::NotFound { line, .. }
            | EvalError::ArityMismatch { line, .. }
            | EvalError::NotAFunction { line, .. }
            | EvalError::NotABool { line, .. }
            | EvalError::List { line, .. }
            | EvalError::Map { line, .. }
            | EvalError::Method { line, .. }
            | EvalError::Custom { line, .. }
            | EvalError::Panic { line, .. } => line,
        }
    }

    /// Attaches `line` unless a more precise line is already known.
    #[cold]
    pub fn at(mut self, line: Line) -> Self {
        let current = self.line_mut();
        *current = current.or(line);
        self
    }
}

/// Faults raised while folding constants ahead of code generation.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum OptimizeError {
    #[error("{line}: error in const operation {op}: {source}")]
    Operator {
        op: Name,
        source: EvalError,
        line: Line,
    },
    #[error("{line}: error in const unary operation {op}: {source}")]
    Unary {
        op: Name,
        source: EvalError,
        line: Line,
    },
    #[error("{line}: error in const function call {name}: {source}")]
    Call {
        name: Name,
        source: EvalError,
        line: Line,
    },
    #[error("{line}: number of args wrong in call to {name}, expected {expected}, got {got}")]
    ArityMismatch {
        name: Name,
        expected: usize,
        got: usize,
        line: Line,
    },
    #[error("{line}: if condition is not a bool: {value}")]
    NotABool { value: Message, line: Line },
}

impl OptimizeError {
    pub fn line(&self) -> Line {
        match self {
            OptimizeError::Operator { line, .. }
            | OptimizeError::Unary { line, .. }
            | OptimizeError::Call { line, .. }
            | OptimizeError::ArityMismatch { line, .. }
            | OptimizeError::NotABool { line, .. } => *line,
        }
    }
}

/// Faults of the native escalation pipeline. Recoverable: the interpreted closure stays
/// authoritative and these never reach the caller of an expression.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum JitError {
    #[error("{line}: node not supported by the jit: {what}")]
    Unsupported { what: Message, line: Line },
    #[error("value cannot be marshalled to a native number: {0}")]
    Marshal(Message),
    #[error("function is not a closure literal and cannot be escalated")]
    NotEscalatable,
    #[error("jit escalation is disabled")]
    Disabled,
    #[error("dynamic loading of compiled code is not supported on this platform")]
    UnsupportedPlatform,
    #[error("no native compiler found")]
    CompilerNotFound,
    #[error("io error: {0}")]
    Io(Message),
    #[error("native compiler exited with {status}: {stderr}")]
    Compiler { status: Message, stderr: Message },
    #[error("native compiler did not finish within {0:?}")]
    Timeout(std::time::Duration),
    #[error("failed to load compiled artifact: {0}")]
    Load(Message),
    #[error("symbol {0} not found in compiled artifact")]
    Symbol(Name),
    #[error("escalation was cancelled")]
    Cancelled,
    #[error("jit queue is full")]
    QueueFull,
    #[error("jit worker is not running")]
    WorkerStopped,
}

impl From<std::io::Error> for JitError {
    fn from(err: std::io::Error) -> Self {
        JitError::Io(err.to_string())
    }
}

/// Error returned to the host by [`FunctionGenerator::generate`](crate::FunctionGenerator::generate)
/// and [`Expression::eval`](crate::Expression::eval).
#[derive(Error, Diagnostic, Debug, Clone, PartialEq)]
pub enum Error {
    #[error(transparent)]
    #[diagnostic(code(funcgen::compile))]
    Compile(#[from] CompileError),
    #[error(transparent)]
    #[diagnostic(code(funcgen::eval))]
    Eval(#[from] EvalError),
    #[error(transparent)]
    #[diagnostic(code(funcgen::optimize), help("the failing call is evaluated ahead of time because it only has constant arguments"))]
    Optimize(#[from] OptimizeError),
}

impl Error {
    /// Source line the fault originates from, when the tree recorded one.
    pub fn line(&self) -> Option<u32> {
        match self {
            Error::Compile(err) => err.line().get(),
            Error::Eval(err) => err.line().get(),
            Error::Optimize(err) => err.line().get(),
        }
    }
}

pub(crate) fn panic_message(payload: Box<dyn std::any::Any + Send>) -> Message {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_panic_message() {
        let payload = std::panic::catch_unwind(|| panic!("failed at {}", 3)).unwrap_err();
        assert_eq!(panic_message(payload), "failed at 3");
    }

    #[test]
    fn test_eval_error_at_keeps_known_line() {
        let err = EvalError::custom("boom").at(Line::new(3)).at(Line::new(9));
        assert_eq!(err.line(), Line::new(3));
        assert_eq!(err.to_string(), "line 3: boom");
    }

    #[rstest]
    #[case::compile(
        Error::from(CompileError::UnknownOperator { op: "#".to_string(), line: Line::new(2) }),
        Some(2)
    )]
    #[case::eval(
        Error::from(EvalError::NotFound { name: "x".to_string(), line: Line::new(5) }),
        Some(5)
    )]
    #[case::optimize(
        Error::from(OptimizeError::NotABool { value: "1".to_string(), line: Line::UNKNOWN }),
        None
    )]
    fn test_error_line(#[case] err: Error, #[case] expected: Option<u32>) {
        assert_eq!(err.line(), expected);
    }

    #[test]
    fn test_error_message() {
        let err = Error::from(EvalError::ArityMismatch {
            callee: "fact".to_string(),
            expected: 1,
            got: 2,
            line: Line::new(1),
        });
        assert_eq!(
            err.to_string(),
            "line 1: wrong number of arguments in call to fact, expected 1, got 2"
        );
    }
}
