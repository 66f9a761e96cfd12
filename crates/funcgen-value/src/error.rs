use funcgen::EvalError;
use thiserror::Error;

/// Faults raised by list and map methods.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("method {name} not found on {kind}")]
    MethodNotFound { kind: &'static str, name: String },
    #[error("number of args wrong in {name}, expected {expected}, got {got}")]
    ArityMismatch {
        name: String,
        expected: usize,
        got: usize,
    },
    #[error("{position}. argument of {name} needs to be a closure")]
    NotAClosure { name: String, position: usize },
    #[error("{position}. argument of {name} needs to be a closure with {expected} arguments")]
    ClosureArity {
        name: String,
        position: usize,
        expected: usize,
    },
    #[error("closure in {0} does not return a bool")]
    NotABool(String),
    #[error("{name} requires {expected} as argument")]
    InvalidType { name: String, expected: &'static str },
    #[error("error in {0}, no items in list")]
    NoItems(String),
    #[error("key {0} not found in map")]
    KeyNotFound(String),
    #[error("index {index} out of bounds, list has {len} items")]
    IndexOutOfBounds { index: i64, len: usize },
    #[error(transparent)]
    Eval(#[from] EvalError),
}

impl Error {
    pub(crate) fn invalid_type(name: &str, expected: &'static str) -> Self {
        Error::InvalidType {
            name: name.to_string(),
            expected,
        }
    }

    /// Converts the fault into an evaluation fault raised by method `name`.
    ///
    /// Faults raised by user closures inside the method pass through unchanged.
    pub fn into_eval(self, name: &str) -> EvalError {
        match self {
            Error::Eval(err) => err,
            err => EvalError::method(name, err.to_string()),
        }
    }
}

impl From<Error> for EvalError {
    fn from(err: Error) -> Self {
        match err {
            Error::Eval(err) => err,
            err => EvalError::custom(err.to_string()),
        }
    }
}
