//! Error types for taskboard operations.
//!
//! Each concern has its own enum so callers can match precisely; the
//! crate-level [`Error`] wraps all of them and classifies the failure with
//! [`Error::kind`]. Configuration errors must abort startup, lookup errors
//! are recoverable request-level failures.
//!
//! # Examples
//!
//! ```
//! use taskboard::error::{Error, ErrorKind, TrackerError};
//!
//! let err: Error = TrackerError::TaskNotFound {
//!     task_id: "missing".to_string(),
//!     from_cache: false,
//! }
//! .into();
//! assert_eq!(err.kind(), ErrorKind::Lookup);
//! assert_eq!(err.error_code(), -32602);
//! assert!(err.to_string().contains("missing"));
//! ```

use thiserror::Error;

/// Failures while classifying a callable declaration.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClassifyError {
    /// The declaration has no body to invoke.
    #[error("\"{name}\" is not callable")]
    NotCallable {
        /// Qualified name of the declaration.
        name: String,
    },

    /// The declaration cannot be resolved to a stable, module-level path.
    #[error("\"{name}\" is not a supported callable: {reason}")]
    UnsupportedCallable {
        /// Qualified name of the declaration.
        name: String,
        /// Why the declaration was rejected.
        reason: String,
    },
}

/// Failures while binding call arguments to a parameter list.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BindError {
    /// More positional arguments than declared parameters.
    #[error("{callable}() takes {expected} positional arguments but {given} were given")]
    TooManyPositional {
        /// Callable being bound.
        callable: String,
        /// Number of explicit parameters.
        expected: usize,
        /// Number of positional arguments supplied.
        given: usize,
    },

    /// A keyword argument names no declared parameter.
    #[error("{callable}() got an unexpected keyword argument '{name}'")]
    UnknownArgument {
        /// Callable being bound.
        callable: String,
        /// Offending keyword.
        name: String,
    },

    /// A parameter received both a positional and a keyword value.
    #[error("{callable}() got multiple values for argument '{name}'")]
    DuplicateArgument {
        /// Callable being bound.
        callable: String,
        /// Parameter bound twice.
        name: String,
    },

    /// A required parameter has neither a value nor a default.
    #[error("{callable}() missing required argument '{name}'")]
    MissingArgument {
        /// Callable being bound.
        callable: String,
        /// Parameter left unbound.
        name: String,
    },

    /// An instance or class method was invoked without its receiver.
    #[error("{callable}() requires a receiver")]
    MissingReceiver {
        /// Callable being bound.
        callable: String,
    },

    /// A free function or static method was handed a receiver.
    #[error("{callable}() does not take a receiver")]
    UnexpectedReceiver {
        /// Callable being bound.
        callable: String,
    },
}

/// Failure converting a string-encoded value to a declared parameter type.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("cannot convert \"{value}\" to {type_name} for parameter '{param}': {reason}")]
pub struct ConversionError {
    /// Parameter the value was meant for.
    pub param: String,
    /// Declared type name.
    pub type_name: String,
    /// The raw input.
    pub value: String,
    /// Parser message.
    pub reason: String,
}

/// Failures raised by the definition registry.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// The callable could not be classified.
    #[error(transparent)]
    Classify(#[from] ClassifyError),

    /// The callable is synchronous, definitions must be asynchronous.
    #[error("\"{name}\" is not a coroutine")]
    NotACoroutine {
        /// Qualified name of the callable.
        name: String,
    },

    /// The declared target parameter is unknown or is the implicit receiver.
    #[error("\"{param}\" is not a valid target parameter of \"{callable}\"")]
    InvalidTargetParameter {
        /// Qualified name of the callable.
        callable: String,
        /// The rejected parameter name.
        param: String,
    },

    /// A parameter lacks a declared type.
    #[error("No typing information available for parameter \"{param}\" in function \"{callable}\"")]
    MissingTypeAnnotation {
        /// Qualified name of the callable.
        callable: String,
        /// The unannotated parameter.
        param: String,
    },

    /// No definition is registered under this identifier.
    #[error("unknown definition id \"{id}\"")]
    UnknownDefinition {
        /// The identifier that was looked up.
        id: String,
    },

    /// Arguments could not be bound to the definition's parameters.
    #[error(transparent)]
    Bind(#[from] BindError),
}

/// Failures raised by the target enumerator.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TargetError {
    /// No target enumerator has been registered.
    #[error("task target function has not been declared")]
    NotRegistered,

    /// The callable could not be classified.
    #[error(transparent)]
    Classify(#[from] ClassifyError),

    /// The callable has a shape that cannot be used as an enumerator here.
    #[error("\"{name}\" is not a supported target function ({shape})")]
    NotAFunction {
        /// Qualified name of the callable.
        name: String,
        /// Human readable shape.
        shape: String,
    },

    /// The enumerator is an instance method but no receiver was supplied.
    #[error("function \"{name}\" is a method, but no class instance has been provided")]
    ReceiverRequired {
        /// Qualified name of the callable.
        name: String,
    },

    /// A receiver was supplied to an enumerator that does not take one.
    #[error("function \"{name}\" does not take a class instance")]
    UnexpectedReceiver {
        /// Qualified name of the callable.
        name: String,
    },

    /// The enumerator declares input parameters.
    #[error("task target functions must not require input arguments, but \"{name}\" has the following input parameters: {params}")]
    InvalidSignature {
        /// Qualified name of the callable.
        name: String,
        /// Comma separated parameter names.
        params: String,
    },

    /// The enumerator has no declared return type.
    #[error("no typing information available for return value of function \"{name}\"")]
    MissingReturnAnnotation {
        /// Qualified name of the callable.
        name: String,
    },

    /// The enumerator does not return an ordered sequence.
    #[error("function \"{name}\" does not return a list (found {found})")]
    WrongReturnType {
        /// Qualified name of the callable.
        name: String,
        /// What was declared or returned instead.
        found: String,
    },

    /// The enumerator body itself failed.
    #[error("target function \"{name}\" failed: {message}")]
    Invocation {
        /// Qualified name of the callable.
        name: String,
        /// Error reported by the body.
        message: String,
    },
}

/// Failures raised by the live task tracker.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TrackerError {
    /// No live (or cached) task carries this identity.
    #[error("{}", task_not_found(.task_id, .from_cache))]
    TaskNotFound {
        /// The task identity that was looked up.
        task_id: String,
        /// Whether only the cache was searched.
        from_cache: bool,
    },

    /// The task is alive but was not created from a definition.
    #[error("task \"{task_id}\" was not created from a registered definition")]
    NotTracked {
        /// The task identity.
        task_id: String,
    },

    /// The task's bound target differs from the one supplied by the caller.
    #[error("Incorrect target (\"{target}\") for task \"{task_id}\"")]
    TargetMismatch {
        /// The task identity.
        task_id: String,
        /// The target supplied by the caller.
        target: String,
    },

    /// The definition id given to `cancel` is unknown.
    #[error("unknown definition id \"{id}\"")]
    UnknownDefinition {
        /// The identifier that was looked up.
        id: String,
    },

    /// The invocation snapshot lacks the definition's target parameter.
    #[error("task \"{task_id}\" has no bound value for target parameter \"{param}\"")]
    MissingTarget {
        /// The task identity.
        task_id: String,
        /// The declared target parameter.
        param: String,
    },
}

fn task_not_found(task_id: &str, from_cache: &bool) -> String {
    if *from_cache {
        format!("No task with ID \"{task_id}\" has been found in the internal cache.")
    } else {
        format!("No task with ID \"{task_id}\" has been found.")
    }
}

/// Failures raised by the operator console.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BoardError {
    /// A target position outside the current target list.
    #[error("Invalid target position {pos} (only {len} targets)")]
    InvalidTargetPosition {
        /// The requested position.
        pos: usize,
        /// Number of known targets.
        len: usize,
    },

    /// No definition is registered under this identifier.
    #[error("Unknown function ID \"{id}\"")]
    UnknownDefinition {
        /// The identifier that was looked up.
        id: String,
    },

    /// The process-held instance is not of the definition's owner type.
    #[error("Function \"{callable}\" is not a method of class \"{found}\" (expected \"{expected}\")")]
    ReceiverMismatch {
        /// Qualified name of the definition.
        callable: String,
        /// Owner type of the definition.
        expected: String,
        /// Type of the held instance, or `None`.
        found: String,
    },

    /// A submitted value names no declared parameter.
    #[error("\"{callable}\" has no parameter named \"{param}\"")]
    UnknownParameter {
        /// Qualified name of the definition.
        callable: String,
        /// The offending form field.
        param: String,
    },

    /// A string value could not be converted to its declared type.
    #[error(transparent)]
    Conversion(#[from] ConversionError),
}

/// Failures while loading configuration.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("failed to read config file {path}: {error}")]
    Io {
        /// Path that was read.
        path: String,
        /// Underlying I/O message.
        error: String,
    },

    /// The configuration could not be parsed.
    #[error("failed to parse config: {0}")]
    Parse(String),

    /// Logging could not be initialised.
    #[error("invalid logging configuration: {0}")]
    Logging(String),
}

/// Coarse classification of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// A programming mistake in the declarations; abort startup.
    Configuration,
    /// A recoverable request-level failure.
    Lookup,
    /// A failure reported by user code (enumerator body, binding).
    Runtime,
}

/// Crate-level error type.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// See [`ClassifyError`].
    #[error(transparent)]
    Classify(#[from] ClassifyError),
    /// See [`BindError`].
    #[error(transparent)]
    Bind(#[from] BindError),
    /// See [`RegistryError`].
    #[error(transparent)]
    Registry(#[from] RegistryError),
    /// See [`TargetError`].
    #[error(transparent)]
    Target(#[from] TargetError),
    /// See [`TrackerError`].
    #[error(transparent)]
    Tracker(#[from] TrackerError),
    /// See [`BoardError`].
    #[error(transparent)]
    Board(#[from] BoardError),
    /// See [`ConfigError`].
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Classifies the failure.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Classify(_) | Self::Config(_) => ErrorKind::Configuration,
            Self::Bind(_) => ErrorKind::Runtime,
            Self::Registry(err) => match err {
                RegistryError::UnknownDefinition { .. } => ErrorKind::Lookup,
                RegistryError::Bind(_) => ErrorKind::Runtime,
                _ => ErrorKind::Configuration,
            },
            Self::Target(err) => match err {
                TargetError::Invocation { .. } => ErrorKind::Runtime,
                _ => ErrorKind::Configuration,
            },
            Self::Tracker(_) => ErrorKind::Lookup,
            Self::Board(err) => match err {
                BoardError::Conversion(_) | BoardError::UnknownParameter { .. } => {
                    ErrorKind::Runtime
                },
                _ => ErrorKind::Lookup,
            },
        }
    }

    /// Maps the failure to a JSON-RPC style error code.
    ///
    /// - `-32602` (Invalid params): lookup and runtime failures caused by
    ///   the request.
    /// - `-32603` (Internal error): configuration failures.
    pub fn error_code(&self) -> i32 {
        match self.kind() {
            ErrorKind::Lookup | ErrorKind::Runtime => -32602,
            ErrorKind::Configuration => -32603,
        }
    }

    /// Returns `true` if the hosting process should refuse to start.
    pub fn is_fatal(&self) -> bool {
        self.kind() == ErrorKind::Configuration
    }
}
