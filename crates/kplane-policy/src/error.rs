//! Policy compilation and evaluation errors.

use thiserror::Error;

pub type PolicyResult<T> = Result<T, PolicyError>;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum PolicyError {
    #[error("expression is {len} bytes, limit is {limit}")]
    TooLong { len: usize, limit: usize },

    #[error("expression nests deeper than {limit}")]
    TooDeep { limit: usize },

    #[error("lex error at {pos}: {message}")]
    Lex { pos: usize, message: String },

    #[error("parse error at {pos}: {message}")]
    Parse { pos: usize, message: String },

    #[error("unknown identifier `{0}`")]
    UnknownIdentifier(String),

    #[error("unknown function `{0}`")]
    UnknownFunction(String),

    #[error("function `{name}` expects {expected} argument(s), got {got}")]
    Arity {
        name: String,
        expected: String,
        got: usize,
    },

    #[error("type error: {0}")]
    Type(String),

    #[error("evaluation error: {0}")]
    Eval(String),

    #[error("evaluation exceeded {limit} steps")]
    StepBudget { limit: u64 },

    #[error("policy must evaluate to a boolean or a number, got {0}")]
    ResultType(String),
}
