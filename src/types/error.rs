use thiserror::Error;

use crate::parse::ParseErrors;

/// Broad classification of an [`EngineError`], mirroring the stages a rule
/// set moves through: configuration, build, and evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Configuration,
    Parse,
    Build,
    Resolution,
    Type,
    Runtime,
    Aggregate,
}

/// Errors produced anywhere in the engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Invalid pool sizing or execution model code.
    #[error("invalid configuration: {reason}")]
    Config {
        /// What was rejected.
        reason: String,
    },

    /// The source failed to lex or parse; all positions are batched.
    #[error(transparent)]
    Parse(#[from] ParseErrors),

    /// The source parsed to zero rules where that is not allowed.
    #[error("source contains no rules; call clear() to empty the pool instead")]
    NoRules,

    /// A name was not bound in the data context.
    #[error("unresolved name '{name}'")]
    Unresolved {
        /// The name that failed to resolve.
        name: String,
    },

    /// A field or method was not found on a fact.
    #[error("no member '{member}' on {target}")]
    UnknownMember {
        /// Description of the fact that was accessed.
        target: String,
        /// The missing field or method name.
        member: String,
    },

    /// A sequence index was outside the valid range.
    #[error("index {index} out of range for {target} of length {len}")]
    IndexOutOfRange {
        target: String,
        index: i64,
        len: usize,
    },

    /// A map lookup used a key with no entry.
    #[error("key \"{key}\" not found in {target}")]
    KeyNotFound { target: String, key: String },

    /// Operands or assignment targets of an incompatible type.
    #[error("type error: {message}")]
    Type { message: String },

    /// A callable was invoked with the wrong number of arguments.
    #[error("'{name}' expects {expected} argument(s), got {actual}")]
    Arity {
        name: String,
        expected: usize,
        actual: usize,
    },

    /// Integer division or modulo by zero.
    #[error("division by zero")]
    DivisionByZero,

    /// An error raised by a host callable.
    #[error("host call failed: {message}")]
    Host { message: String },

    /// Multiple failures collected from a concurrent scope, in source order.
    #[error("{} error(s) in concurrent scope; first: {}", .errors.len(), .errors[0])]
    Aggregate { errors: Vec<EngineError> },
}

impl EngineError {
    /// Build a [`EngineError::Host`] from any displayable host failure.
    pub fn host(message: impl Into<String>) -> Self {
        EngineError::Host {
            message: message.into(),
        }
    }

    /// Collapse the errors of a concurrent scope: none is success, one is
    /// returned as itself, several become an [`EngineError::Aggregate`]
    /// preserving the given (source) order.
    pub(crate) fn from_scope(mut errors: Vec<EngineError>) -> Result<(), EngineError> {
        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(EngineError::Aggregate { errors }),
        }
    }

    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::Config { .. } => ErrorKind::Configuration,
            EngineError::Parse(_) => ErrorKind::Parse,
            EngineError::NoRules => ErrorKind::Build,
            EngineError::Unresolved { .. }
            | EngineError::UnknownMember { .. }
            | EngineError::IndexOutOfRange { .. }
            | EngineError::KeyNotFound { .. } => ErrorKind::Resolution,
            EngineError::Type { .. } | EngineError::Arity { .. } => ErrorKind::Type,
            EngineError::DivisionByZero | EngineError::Host { .. } => ErrorKind::Runtime,
            EngineError::Aggregate { .. } => ErrorKind::Aggregate,
        }
    }
}
