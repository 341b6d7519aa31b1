//! Live task tracking.
//!
//! [`TaskTracker`] recognises which live tasks were created from a
//! registered definition, recovers their bound arguments from the
//! invocation snapshot, and caches the answer per task. The cache entry of
//! a task is dropped by a completion callback when the task terminates, so
//! a finished task disappears from every view.

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;

use crate::callable::BoundArguments;
use crate::classify::CallableShape;
use crate::error::TrackerError;
use crate::host::{LiveTask, TaskHost, TaskId};
use crate::registry::{DefinitionId, DefinitionRegistry};
use crate::value::ArgValue;

/// What the tracker knows about a task created from a definition.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackedTaskInfo {
    /// Task identity.
    pub task_id: TaskId,
    /// Definition the task runs.
    pub definition_id: DefinitionId,
    /// `Owner::name` or `name`.
    pub qualified_name: String,
    /// Declaring module path.
    pub module: String,
    /// Arguments after binding, receiver included.
    pub bound: BoundArguments,
    /// Value bound to the target parameter.
    pub target: ArgValue,
    /// Name of the target parameter.
    pub target_param: String,
    /// Shape of the definition.
    #[serde(skip)]
    pub shape: CallableShape,
    /// Name of the implicit receiver parameter, if any.
    #[serde(skip)]
    pub implicit_param: Option<String>,
}

impl TrackedTaskInfo {
    /// Bound arguments an operator should see: the implicit receiver is
    /// hidden.
    pub fn visible_params(&self) -> BoundArguments {
        self.bound.without(self.implicit_param.as_deref())
    }

    /// Description such as `method of class Process`.
    pub fn type_info(&self) -> Option<String> {
        self.shape.type_info()
    }
}

type Cache = DashMap<TaskId, Option<TrackedTaskInfo>>;

/// Maps live tasks to the definitions they run.
#[derive(Debug, Clone)]
pub struct TaskTracker {
    registry: Arc<DefinitionRegistry>,
    host: TaskHost,
    cache: Arc<Cache>,
}

impl TaskTracker {
    /// Creates a tracker over a registry and a host.
    pub fn new(registry: Arc<DefinitionRegistry>, host: TaskHost) -> Self {
        Self {
            registry,
            host,
            cache: Arc::new(DashMap::new()),
        }
    }

    /// Classifies one live task.
    ///
    /// Returns `None` for tasks not created from a registered definition.
    /// Repeated calls for the same task return the cached answer and do not
    /// add further completion callbacks.
    ///
    /// # Errors
    ///
    /// Returns [`TrackerError::MissingTarget`] if the invocation snapshot
    /// lacks the definition's target parameter; nothing is cached then.
    pub fn get(&self, task: &LiveTask) -> Result<Option<TrackedTaskInfo>, TrackerError> {
        let id = task.id();
        if let Some(cached) = self.cache.get(&id) {
            return Ok(cached.clone());
        }

        let info = match task.invocation() {
            None => None,
            Some(invocation) => {
                let Some(record) = self.registry.lookup(&invocation.definition_id) else {
                    tracing::debug!(
                        task_id = %id,
                        definition_id = %invocation.definition_id,
                        "task runs an unregistered definition"
                    );
                    return Ok(None);
                };
                let target = invocation
                    .bound
                    .get(record.target_param())
                    .cloned()
                    .ok_or_else(|| TrackerError::MissingTarget {
                        task_id: id.to_string(),
                        param: record.target_param().to_string(),
                    })?;
                Some(TrackedTaskInfo {
                    task_id: id,
                    definition_id: invocation.definition_id.clone(),
                    qualified_name: invocation.qualified_name.clone(),
                    module: invocation.module.clone(),
                    bound: invocation.bound.clone(),
                    target,
                    target_param: record.target_param().to_string(),
                    shape: record.shape(),
                    implicit_param: record
                        .classification()
                        .implicit_param()
                        .map(|p| p.name.clone()),
                })
            },
        };

        match self.cache.entry(id) {
            Entry::Occupied(existing) => return Ok(existing.get().clone()),
            Entry::Vacant(slot) => {
                slot.insert(info.clone());
            },
        }

        // The callback may run right away if the task already finished, so
        // no cache guard may be held here.
        let cache = Arc::clone(&self.cache);
        task.add_done_callback(move |id, _| {
            cache.remove(&id);
        });

        Ok(info)
    }

    /// Tracked information for every live task created from a definition.
    ///
    /// # Errors
    ///
    /// Propagates the first [`TaskTracker::get`] failure.
    pub fn get_all(&self) -> Result<Vec<TrackedTaskInfo>, TrackerError> {
        let mut tracked = Vec::new();
        for task in self.host.live_tasks() {
            if let Some(info) = self.get(&task)? {
                tracked.push(info);
            }
        }
        Ok(tracked)
    }

    /// Looks up a task by identity.
    ///
    /// With `from_cache`, only tasks previously seen by [`TaskTracker::get`]
    /// and still live are found.
    ///
    /// # Errors
    ///
    /// - [`TrackerError::TaskNotFound`] if no such task is known.
    /// - [`TrackerError::NotTracked`] if the task was not created from a
    ///   definition.
    pub fn get_by_id(&self, task_id: &TaskId, from_cache: bool) -> Result<TrackedTaskInfo, TrackerError> {
        let not_found = || TrackerError::TaskNotFound {
            task_id: task_id.to_string(),
            from_cache,
        };
        let not_tracked = || TrackerError::NotTracked {
            task_id: task_id.to_string(),
        };

        if from_cache {
            let cached = self.cache.get(task_id).ok_or_else(not_found)?;
            return cached.clone().ok_or_else(not_tracked);
        }

        let task = self.host.find(task_id).ok_or_else(not_found)?;
        self.get(&task)?.ok_or_else(not_tracked)
    }

    /// Cancels a live task after checking its bound target.
    ///
    /// # Errors
    ///
    /// - [`TrackerError::TaskNotFound`] if the task is not live.
    /// - [`TrackerError::UnknownDefinition`] if `definition_id` is unknown.
    /// - [`TrackerError::NotTracked`] if the task was not created from a
    ///   definition.
    /// - [`TrackerError::TargetMismatch`] if the task's target differs from
    ///   `target`; the task is left running.
    pub fn cancel(
        &self,
        task_id: &TaskId,
        target: &ArgValue,
        definition_id: &DefinitionId,
    ) -> Result<(), TrackerError> {
        let task = self.host.find(task_id).ok_or_else(|| TrackerError::TaskNotFound {
            task_id: task_id.to_string(),
            from_cache: false,
        })?;
        let record = self
            .registry
            .lookup(definition_id)
            .ok_or_else(|| TrackerError::UnknownDefinition {
                id: definition_id.to_string(),
            })?;
        let info = self.get(&task)?.ok_or_else(|| TrackerError::NotTracked {
            task_id: task_id.to_string(),
        })?;

        if info.bound.get(record.target_param()) != Some(target) {
            return Err(TrackerError::TargetMismatch {
                task_id: task_id.to_string(),
                target: target.to_string(),
            });
        }

        tracing::info!(
            task_id = %task_id,
            callable = %info.qualified_name,
            task_target = %target,
            "cancelling task"
        );
        task.cancel();
        Ok(())
    }

    /// Number of cached entries.
    pub fn cached_len(&self) -> usize {
        self.cache.len()
    }
}
