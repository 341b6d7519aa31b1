//! Operator console.
//!
//! [`TaskBoard`] is the context object every request goes through: it owns
//! the definition registry, the target enumerator, the task host and the
//! tracker, plus the instance the process hands to instance methods. All
//! inputs that come from an operator are strings; the board resolves target
//! positions, converts values to their declared types and produces the
//! read models ([`Overview`], [`CancelForm`], [`StartForm`]) a presentation
//! layer renders.
//!
//! # Examples
//!
//! ```
//! use std::sync::Arc;
//! use taskboard::prelude::*;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> taskboard::Result<()> {
//! let registry = Arc::new(DefinitionRegistry::new());
//! let targets = Arc::new(TargetEnumerator::new());
//!
//! targets.register(
//!     Callable::function(module_path!(), "devices")
//!         .returns(ReturnType::List)
//!         .sync(|_| Ok(vec!["ABC", "DEF"].into())),
//! )?;
//! let ping = Callable::function(module_path!(), "ping")
//!     .param("device", ParamType::Str)
//!     .param_with_default("count", ParamType::Int, 3)
//!     .coroutine(|_| async { Ok(()) });
//! let id = registry.register(ping, "device")?;
//!
//! let board = TaskBoard::new(BoardConfig::default(), registry, targets, TaskHost::new(), None)?;
//! let handle = board.start_at(1, id.as_str(), [("count", "5")])?;
//! handle.wait().await;
//! assert!(board.overview()?.rows.is_empty());
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use indexmap::IndexMap;
use serde::Serialize;

use crate::callable::BoundArguments;
use crate::config::BoardConfig;
use crate::error::{BoardError, Result, TrackerError};
use crate::host::{TaskHandle, TaskHost, TaskId};
use crate::params::{InputKind, ParamDescriptor};
use crate::registry::{DefinitionId, DefinitionRecord, DefinitionRegistry};
use crate::targets::{TargetEnumerator, TargetList};
use crate::tracker::{TaskTracker, TrackedTaskInfo};
use crate::value::{ArgValue, Receiver};

/// One registered definition as listed on the overview.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DefinitionSummary {
    /// Definition identifier.
    pub definition_id: DefinitionId,
    /// `Owner::name` or `name`.
    pub qualified_name: String,
    /// Declaring module path.
    pub module: String,
    /// Name of the target parameter.
    pub target_param: String,
    /// Caller-supplied parameter names.
    pub params: Vec<String>,
    /// Description such as `method of class Process`.
    pub type_info: Option<String>,
}

impl From<&DefinitionRecord> for DefinitionSummary {
    fn from(record: &DefinitionRecord) -> Self {
        Self {
            definition_id: record.id().clone(),
            qualified_name: record.qualified_name(),
            module: record.module().to_string(),
            target_param: record.target_param().to_string(),
            params: record.declared_params().map(|p| p.name.clone()).collect(),
            type_info: record.type_info(),
        }
    }
}

/// One running task as listed on the overview.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskRow {
    /// Target the task operates on.
    pub target: ArgValue,
    /// Position of the target in the current target list, `None` if the
    /// enumerator no longer produces it.
    pub target_pos: Option<usize>,
    /// `Owner::name` or `name`.
    pub qualified_name: String,
    /// Declaring module path.
    pub module: String,
    /// Task identity.
    pub task_id: TaskId,
    /// Definition the task runs.
    pub definition_id: DefinitionId,
    /// Bound arguments, implicit receiver hidden.
    pub params: BoundArguments,
    /// Description such as `method of class Process`.
    pub type_info: Option<String>,
}

/// Everything the console's main view shows.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Overview {
    /// Board title.
    pub name: String,
    /// Registered definitions in registration order.
    pub definitions: Vec<DefinitionSummary>,
    /// Current target list, sorted.
    pub targets: Vec<ArgValue>,
    /// Tracked tasks sorted by target.
    pub rows: Vec<TaskRow>,
}

/// Confirmation view before cancelling a task.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CancelForm {
    /// Target resolved from the position.
    pub target: ArgValue,
    /// Position in the target list.
    pub target_pos: usize,
    /// Task identity.
    pub task_id: TaskId,
    /// Definition the task runs.
    pub definition_id: DefinitionId,
    /// `Owner::name` or `name`.
    pub qualified_name: String,
    /// Declaring module path.
    pub module: String,
    /// Bound arguments, implicit receiver hidden.
    pub params: BoundArguments,
    /// Description such as `method of class Process`.
    pub type_info: Option<String>,
}

/// One input field of a [`StartForm`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FormField {
    /// Parameter name.
    pub name: String,
    /// Declared type name.
    pub type_name: String,
    /// Input control hint.
    pub input_kind: InputKind,
    /// Value used when the field is left empty.
    pub default: Option<ArgValue>,
    /// `true` when there is no default.
    pub required: bool,
}

impl From<&ParamDescriptor> for FormField {
    fn from(param: &ParamDescriptor) -> Self {
        Self {
            name: param.name.clone(),
            type_name: param.ty.type_name().to_string(),
            input_kind: param.input_kind(),
            default: param.default.clone(),
            required: param.is_required(),
        }
    }
}

/// Input view before starting a task.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StartForm {
    /// Definition to start.
    pub definition_id: DefinitionId,
    /// `Owner::name` or `name`.
    pub qualified_name: String,
    /// Declaring module path.
    pub module: String,
    /// Description such as `method of class Process`.
    pub type_info: Option<String>,
    /// Target resolved from the position.
    pub target: ArgValue,
    /// Position in the target list.
    pub target_pos: usize,
    /// Name of the target parameter.
    pub target_param: String,
    /// Fields for every other caller-supplied parameter.
    pub fields: Vec<FormField>,
}

/// The operator console context.
#[derive(Debug)]
pub struct TaskBoard {
    config: BoardConfig,
    registry: Arc<DefinitionRegistry>,
    targets: Arc<TargetEnumerator>,
    host: TaskHost,
    tracker: TaskTracker,
    receiver: Option<Receiver>,
    static_targets: Option<TargetList>,
}

impl TaskBoard {
    /// Builds the board after running the startup checks.
    ///
    /// `receiver` is the instance handed to instance methods, both
    /// definitions and an instance-method target enumerator.
    ///
    /// # Errors
    ///
    /// Fails with a configuration error if the target enumerator is missing
    /// or invalid, or if a definition has an unannotated parameter. With
    /// `static_targets` set, a failing enumerator also fails construction.
    pub fn new(
        config: BoardConfig,
        registry: Arc<DefinitionRegistry>,
        targets: Arc<TargetEnumerator>,
        host: TaskHost,
        receiver: Option<Receiver>,
    ) -> Result<Self> {
        targets.check()?;
        registry.validate_all()?;

        let tracker = TaskTracker::new(Arc::clone(&registry), host.clone());
        let mut board = Self {
            config,
            registry,
            targets,
            host,
            tracker,
            receiver,
            static_targets: None,
        };
        if board.config.static_targets {
            board.static_targets = Some(board.compute_targets()?);
        }

        tracing::info!(
            name = %board.config.name,
            definitions = board.registry.len(),
            static_targets = board.config.static_targets,
            "task board ready"
        );
        Ok(board)
    }

    /// Configuration the board was built with.
    pub fn config(&self) -> &BoardConfig {
        &self.config
    }

    /// The definition registry.
    pub fn registry(&self) -> &Arc<DefinitionRegistry> {
        &self.registry
    }

    /// The target enumerator.
    pub fn targets(&self) -> &Arc<TargetEnumerator> {
        &self.targets
    }

    /// The task host.
    pub fn host(&self) -> &TaskHost {
        &self.host
    }

    /// The tracker.
    pub fn tracker(&self) -> &TaskTracker {
        &self.tracker
    }

    /// The process-held instance, if any.
    pub fn receiver(&self) -> Option<&Receiver> {
        self.receiver.as_ref()
    }

    fn compute_targets(&self) -> Result<TargetList> {
        let needs_receiver = self
            .targets
            .context()
            .is_some_and(|class| class.shape.needs_receiver());
        let receiver = if needs_receiver {
            self.receiver.as_ref()
        } else {
            None
        };
        Ok(self.targets.list(receiver)?.into())
    }

    /// Current sorted target list.
    ///
    /// # Errors
    ///
    /// Propagates enumerator failures.
    pub fn target_list(&self) -> Result<TargetList> {
        match &self.static_targets {
            Some(list) => Ok(list.clone()),
            None => self.compute_targets(),
        }
    }

    fn target_at(list: &TargetList, pos: usize) -> Result<ArgValue> {
        list.get(pos).cloned().ok_or_else(|| {
            BoardError::InvalidTargetPosition {
                pos,
                len: list.len(),
            }
            .into()
        })
    }

    fn definition(&self, id: &str) -> Result<Arc<DefinitionRecord>> {
        self.registry.lookup(id).ok_or_else(|| {
            BoardError::UnknownDefinition { id: id.to_string() }.into()
        })
    }

    fn check_receiver(&self, record: &DefinitionRecord) -> Result<()> {
        let Some(owner) = record.shape().owner() else {
            return Ok(());
        };
        match &self.receiver {
            Some(receiver) if receiver.is_instance_of(&owner) => Ok(()),
            other => Err(BoardError::ReceiverMismatch {
                callable: record.qualified_name(),
                expected: owner.to_string(),
                found: other
                    .as_ref()
                    .map_or_else(|| "None".to_string(), |r| r.type_token().to_string()),
            }
            .into()),
        }
    }

    /// Builds the main view.
    ///
    /// # Errors
    ///
    /// Propagates enumerator and tracker failures.
    pub fn overview(&self) -> Result<Overview> {
        let targets = self.target_list()?;
        let mut tracked = self.tracker.get_all()?;
        tracked.sort_by(|a, b| {
            a.target
                .cmp(&b.target)
                .then_with(|| a.qualified_name.cmp(&b.qualified_name))
                .then_with(|| a.task_id.cmp(&b.task_id))
        });

        let mut cursor = targets.cursor();
        let rows = tracked
            .into_iter()
            .map(|info| {
                let target_pos = cursor.seek(&info.target);
                row(info, target_pos)
            })
            .collect();

        Ok(Overview {
            name: self.config.name.clone(),
            definitions: self
                .registry
                .all()
                .values()
                .map(|record| DefinitionSummary::from(record.as_ref()))
                .collect(),
            targets: targets.as_slice().to_vec(),
            rows,
        })
    }

    /// Builds the cancel confirmation view from the tracker cache.
    ///
    /// # Errors
    ///
    /// - [`BoardError::InvalidTargetPosition`] for an out-of-range position.
    /// - [`TrackerError::TaskNotFound`] if the task is not in the cache.
    pub fn cancel_form(&self, target_pos: usize, task_id: &str) -> Result<CancelForm> {
        let target = Self::target_at(&self.target_list()?, target_pos)?;
        let id = parse_task_id(task_id, true)?;
        let info = self.tracker.get_by_id(&id, true)?;
        Ok(CancelForm {
            target,
            target_pos,
            task_id: id,
            params: info.visible_params(),
            type_info: info.type_info(),
            definition_id: info.definition_id,
            qualified_name: info.qualified_name,
            module: info.module,
        })
    }

    /// Cancels a task after checking it runs on the target at `target_pos`.
    ///
    /// # Errors
    ///
    /// - [`BoardError::InvalidTargetPosition`] for an out-of-range position.
    /// - Any [`TaskTracker::cancel`] failure.
    pub fn cancel_at(&self, target_pos: usize, task_id: &str, definition_id: &str) -> Result<()> {
        let target = Self::target_at(&self.target_list()?, target_pos)?;
        let id = parse_task_id(task_id, false)?;
        self.tracker
            .cancel(&id, &target, &DefinitionId::from(definition_id))?;
        Ok(())
    }

    /// Builds the start view for a definition and target.
    ///
    /// # Errors
    ///
    /// - [`BoardError::InvalidTargetPosition`] for an out-of-range position.
    /// - [`BoardError::UnknownDefinition`] for an unknown identifier.
    /// - [`BoardError::ReceiverMismatch`] if the definition belongs to a type
    ///   the process-held instance is not.
    pub fn start_form(&self, target_pos: usize, definition_id: &str) -> Result<StartForm> {
        let target = Self::target_at(&self.target_list()?, target_pos)?;
        let record = self.definition(definition_id)?;
        self.check_receiver(&record)?;

        Ok(StartForm {
            definition_id: record.id().clone(),
            qualified_name: record.qualified_name(),
            module: record.module().to_string(),
            type_info: record.type_info(),
            target,
            target_pos,
            target_param: record.target_param().to_string(),
            fields: record
                .declared_params()
                .filter(|p| p.name != record.target_param())
                .map(FormField::from)
                .collect(),
        })
    }

    /// Starts a definition on a target with string-encoded values.
    ///
    /// An empty value leaves the parameter to its default. Instance methods
    /// receive the process-held instance.
    ///
    /// # Errors
    ///
    /// - [`BoardError::UnknownDefinition`] for an unknown identifier.
    /// - [`BoardError::ReceiverMismatch`] if the held instance does not fit.
    /// - [`BoardError::UnknownParameter`] for a value naming no parameter
    ///   (or naming the target parameter).
    /// - [`BoardError::Conversion`] if a value does not parse.
    /// - A binding error if a required parameter is left empty.
    pub fn start_task<I, K, V>(&self, definition_id: &str, target: ArgValue, values: I) -> Result<TaskHandle>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let record = self.definition(definition_id)?;
        self.check_receiver(&record)?;

        let mut keyword = IndexMap::new();
        for (name, raw) in values {
            let (name, raw) = (name.as_ref(), raw.as_ref());
            let param = record
                .declared_params()
                .find(|p| p.name == name && p.name != record.target_param())
                .ok_or_else(|| BoardError::UnknownParameter {
                    callable: record.qualified_name(),
                    param: name.to_string(),
                })?;
            if raw.is_empty() {
                continue;
            }
            let value = param.ty.parse_str(name, raw).map_err(BoardError::from)?;
            keyword.insert(name.to_string(), value);
        }
        keyword.insert(record.target_param().to_string(), target.clone());

        let receiver = if record.shape().needs_receiver() {
            self.receiver.clone().map(ArgValue::Receiver)
        } else {
            None
        };

        let handle = self
            .registry
            .invoke(&self.host, record.id(), receiver, Vec::new(), keyword)?;
        tracing::info!(
            task_id = %handle.id(),
            callable = %record.qualified_name(),
            task_target = %target,
            "started task"
        );
        Ok(handle)
    }

    /// [`TaskBoard::start_task`] with the target resolved from its position.
    ///
    /// # Errors
    ///
    /// [`BoardError::InvalidTargetPosition`] for an out-of-range position,
    /// then any [`TaskBoard::start_task`] failure.
    pub fn start_at<I, K, V>(&self, target_pos: usize, definition_id: &str, values: I) -> Result<TaskHandle>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let target = Self::target_at(&self.target_list()?, target_pos)?;
        self.start_task(definition_id, target, values)
    }
}

fn row(info: TrackedTaskInfo, target_pos: Option<usize>) -> TaskRow {
    TaskRow {
        target_pos,
        params: info.visible_params(),
        type_info: info.type_info(),
        target: info.target,
        qualified_name: info.qualified_name,
        module: info.module,
        task_id: info.task_id,
        definition_id: info.definition_id,
    }
}

fn parse_task_id(raw: &str, from_cache: bool) -> std::result::Result<TaskId, TrackerError> {
    raw.parse().map_err(|_| TrackerError::TaskNotFound {
        task_id: raw.to_string(),
        from_cache,
    })
}
