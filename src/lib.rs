//! Operator console for declared units of async work.
//!
//! A process declares asynchronous callables ("definitions"), each with one
//! parameter designated as its target, plus a single target enumerator
//! producing the valid targets. The console can then list every running
//! task created from a definition together with the arguments it was
//! started with, start new tasks from string-typed operator input, and
//! cancel tasks after checking they run on the expected target.
//!
//! # Overview
//!
//! Callables are declared explicitly: owner type, binding marker, typed
//! parameters and return type are stated when the [`Callable`] is built,
//! and [`classify`](classify::classify) derives one of four shapes from
//! that declaration. Tasks run on a [`TaskHost`], which keeps a live-task
//! table with the invocation snapshot of every task spawned from a
//! definition; the [`TaskTracker`] reads those snapshots back.
//!
//! # Module Organization
//!
//! - [`value`] - Argument values, receivers and type tokens
//! - [`params`] - Parameter descriptors, declared types, string conversion
//! - [`callable`] - Declarations, bodies and argument binding
//! - [`classify`] - Callable shapes
//! - [`registry`] - Definition catalog and the entry-point wrapper
//! - [`targets`] - Target enumerator and sorted target lists
//! - [`host`] - Live-task table over tokio
//! - [`tracker`] - Live task to definition mapping with a per-task cache
//! - [`board`] - The operator console context and its read models
//! - [`config`] - TOML and environment configuration
//! - [`error`] - Error types with JSON-RPC style code mapping

pub mod board;
pub mod callable;
pub mod classify;
pub mod config;
pub mod error;
pub mod host;
#[cfg(feature = "logging")]
pub mod logging;
pub mod params;
pub mod registry;
pub mod targets;
pub mod tracker;
pub mod value;

// Re-exports for ergonomic access
pub use board::{CancelForm, Overview, StartForm, TaskBoard, TaskRow};
pub use callable::{BoundArguments, Callable};
pub use classify::{CallableShape, Classification};
pub use config::{BoardConfig, LoggingConfig};
pub use error::{Error, ErrorKind, Result};
pub use host::{TaskHandle, TaskHost, TaskId, TaskOutcome};
pub use registry::{DefinitionId, DefinitionRegistry};
pub use targets::{TargetEnumerator, TargetList};
pub use tracker::{TaskTracker, TrackedTaskInfo};
pub use value::{ArgValue, Receiver, TypeToken};

/// Everything needed to declare definitions and build a board.
pub mod prelude {
    pub use crate::board::TaskBoard;
    pub use crate::callable::{BoundArguments, Callable};
    pub use crate::config::BoardConfig;
    pub use crate::host::TaskHost;
    pub use crate::params::{ParamType, ReturnType};
    pub use crate::registry::DefinitionRegistry;
    pub use crate::targets::TargetEnumerator;
    pub use crate::value::{ArgValue, Receiver};
}
