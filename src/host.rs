//! Host task runtime.
//!
//! Tokio does not let a program enumerate its running tasks or attach
//! completion callbacks to them, so [`TaskHost`] keeps its own live-task
//! table on top of `tokio::spawn`. Every spawned task gets a [`TaskId`], a
//! cancellation token and an optional [`Invocation`] snapshot recorded
//! before the body is first polled.
//!
//! A task is live until its body returns, fails (a panic counts as a
//! failure) or is cancelled. At that point it is removed from the table
//! first, then its completion callbacks run exactly once, then waiters on
//! [`TaskHandle::wait`] are released.
//!
//! # Examples
//!
//! ```
//! use taskboard::host::{TaskHost, TaskOutcome};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let host = TaskHost::new();
//! let handle = host.spawn("sleeper", Box::pin(async {
//!     tokio::time::sleep(std::time::Duration::from_secs(60)).await;
//!     Ok(())
//! }));
//!
//! assert_eq!(host.len(), 1);
//! assert!(host.cancel(handle.id()));
//! assert_eq!(handle.wait().await, TaskOutcome::Cancelled);
//! assert!(host.is_empty());
//! # }
//! ```

use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::str::FromStr;
use std::sync::Arc;

use dashmap::DashMap;
use futures::FutureExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::callable::{BoundArguments, WorkFuture};
use crate::registry::DefinitionId;

/// Identity of a task spawned on a [`TaskHost`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(Uuid);

impl TaskId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TaskId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Snapshot of how a task was created from a definition.
#[derive(Debug, Clone, PartialEq)]
pub struct Invocation {
    /// Definition the task runs.
    pub definition_id: DefinitionId,
    /// `Owner::name` or `name`.
    pub qualified_name: String,
    /// Declaring module path.
    pub module: String,
    /// Arguments after binding, defaults included.
    pub bound: BoundArguments,
}

/// How a task ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    /// The body returned `Ok`.
    Completed,
    /// The body returned an error.
    Failed(String),
    /// The task was cancelled.
    Cancelled,
}

impl TaskOutcome {
    /// Returns `true` for [`TaskOutcome::Cancelled`].
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

type DoneCallback = Box<dyn FnOnce(TaskId, &TaskOutcome) + Send>;

#[derive(Default)]
struct Completion {
    outcome: Option<TaskOutcome>,
    callbacks: Vec<DoneCallback>,
}

struct TaskSlot {
    id: TaskId,
    name: String,
    invocation: Option<Invocation>,
    cancel: CancellationToken,
    completion: Mutex<Completion>,
    join: Mutex<Option<JoinHandle<()>>>,
    done: watch::Sender<Option<TaskOutcome>>,
}

/// A task as seen through the host's live-task table.
#[derive(Clone)]
pub struct LiveTask {
    slot: Arc<TaskSlot>,
}

impl LiveTask {
    /// Task identity.
    pub fn id(&self) -> TaskId {
        self.slot.id
    }

    /// Name given at spawn time.
    pub fn name(&self) -> &str {
        &self.slot.name
    }

    /// Invocation snapshot, `None` for tasks not created from a definition.
    pub fn invocation(&self) -> Option<&Invocation> {
        self.slot.invocation.as_ref()
    }

    /// Returns `true` once the task has terminated.
    pub fn is_done(&self) -> bool {
        self.slot.completion.lock().outcome.is_some()
    }

    /// Requests cancellation.
    pub fn cancel(&self) {
        self.slot.cancel.cancel();
    }

    /// Registers a callback run once when the task terminates.
    ///
    /// If the task already terminated, the callback runs immediately on the
    /// calling thread.
    pub fn add_done_callback<F>(&self, callback: F)
    where
        F: FnOnce(TaskId, &TaskOutcome) + Send + 'static,
    {
        let mut completion = self.slot.completion.lock();
        match completion.outcome.clone() {
            Some(outcome) => {
                drop(completion);
                callback(self.slot.id, &outcome);
            },
            None => completion.callbacks.push(Box::new(callback)),
        }
    }

    /// A handle that waits for this task to terminate.
    pub fn handle(&self) -> TaskHandle {
        TaskHandle {
            id: self.slot.id,
            done: self.slot.done.subscribe(),
        }
    }
}

impl fmt::Debug for LiveTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LiveTask")
            .field("id", &self.slot.id)
            .field("name", &self.slot.name)
            .field("tracked", &self.slot.invocation.is_some())
            .finish()
    }
}

/// Handle returned by the spawn methods.
#[derive(Debug, Clone)]
pub struct TaskHandle {
    id: TaskId,
    done: watch::Receiver<Option<TaskOutcome>>,
}

impl TaskHandle {
    /// Task identity.
    pub fn id(&self) -> TaskId {
        self.id
    }

    /// Waits until the task terminates and its callbacks have run.
    pub async fn wait(mut self) -> TaskOutcome {
        match self.done.wait_for(Option::is_some).await {
            Ok(outcome) => outcome.clone().unwrap_or(TaskOutcome::Cancelled),
            // Sender dropped without an outcome: the runtime shut down.
            Err(_) => TaskOutcome::Cancelled,
        }
    }
}

#[derive(Default)]
struct HostInner {
    tasks: DashMap<TaskId, Arc<TaskSlot>>,
}

impl HostInner {
    fn finish(&self, id: TaskId, outcome: TaskOutcome) {
        let Some((_, slot)) = self.tasks.remove(&id) else {
            return;
        };

        match &outcome {
            TaskOutcome::Completed => tracing::debug!(task_id = %id, name = %slot.name, "task completed"),
            TaskOutcome::Failed(error) => {
                tracing::warn!(task_id = %id, name = %slot.name, error = %error, "task failed")
            },
            TaskOutcome::Cancelled => tracing::debug!(task_id = %id, name = %slot.name, "task cancelled"),
        }

        let callbacks = {
            let mut completion = slot.completion.lock();
            completion.outcome = Some(outcome.clone());
            std::mem::take(&mut completion.callbacks)
        };
        for callback in callbacks {
            callback(id, &outcome);
        }

        slot.join.lock().take();
        slot.done.send_replace(Some(outcome));
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    let detail = payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string payload");
    format!("task panicked: {detail}")
}

/// Live-task table over the tokio runtime.
///
/// Cloning is cheap; clones share the same table.
#[derive(Clone, Default)]
pub struct TaskHost {
    inner: Arc<HostInner>,
}

impl TaskHost {
    /// Creates an empty host.
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawns an untracked task.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(&self, name: impl Into<String>, work: WorkFuture) -> TaskHandle {
        self.spawn_slot(name.into(), None, work)
    }

    /// Spawns a task created from a definition, recording its invocation.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn_invocation(&self, invocation: Invocation, work: WorkFuture) -> TaskHandle {
        let name = invocation.qualified_name.clone();
        self.spawn_slot(name, Some(invocation), work)
    }

    fn spawn_slot(&self, name: String, invocation: Option<Invocation>, work: WorkFuture) -> TaskHandle {
        let id = TaskId::new();
        let token = CancellationToken::new();
        let (done, waiter) = watch::channel(None);
        let slot = Arc::new(TaskSlot {
            id,
            name,
            invocation,
            cancel: token.clone(),
            completion: Mutex::new(Completion::default()),
            join: Mutex::new(None),
            done,
        });

        tracing::debug!(task_id = %id, name = %slot.name, "spawning task");
        self.inner.tasks.insert(id, Arc::clone(&slot));

        let inner = Arc::clone(&self.inner);
        let join = tokio::spawn(async move {
            let outcome = tokio::select! {
                biased;
                () = token.cancelled() => TaskOutcome::Cancelled,
                result = AssertUnwindSafe(work).catch_unwind() => match result {
                    Ok(Ok(())) => TaskOutcome::Completed,
                    Ok(Err(e)) => TaskOutcome::Failed(format!("{e:#}")),
                    Err(panic) => TaskOutcome::Failed(panic_message(panic.as_ref())),
                },
            };
            inner.finish(id, outcome);
        });

        // The task may already have finished; keep the handle only while live.
        if !slot.done.borrow().is_some() {
            *slot.join.lock() = Some(join);
        }

        TaskHandle { id, done: waiter }
    }

    /// Snapshot of all live tasks.
    pub fn live_tasks(&self) -> Vec<LiveTask> {
        self.inner
            .tasks
            .iter()
            .map(|entry| LiveTask {
                slot: Arc::clone(entry.value()),
            })
            .collect()
    }

    /// Finds a live task by identity.
    pub fn find(&self, id: &TaskId) -> Option<LiveTask> {
        self.inner.tasks.get(id).map(|entry| LiveTask {
            slot: Arc::clone(entry.value()),
        })
    }

    /// Requests cancellation of a live task; `false` if it is not live.
    pub fn cancel(&self, id: TaskId) -> bool {
        match self.find(&id) {
            Some(task) => {
                task.cancel();
                true
            },
            None => false,
        }
    }

    /// Registers a completion callback on a live task; `false` if it is not
    /// live.
    pub fn add_done_callback<F>(&self, id: TaskId, callback: F) -> bool
    where
        F: FnOnce(TaskId, &TaskOutcome) + Send + 'static,
    {
        match self.find(&id) {
            Some(task) => {
                task.add_done_callback(callback);
                true
            },
            None => false,
        }
    }

    /// Waits for a live task to terminate; `None` if it is not live.
    pub async fn join(&self, id: TaskId) -> Option<TaskOutcome> {
        let handle = self.find(&id)?.handle();
        Some(handle.wait().await)
    }

    /// Number of live tasks.
    pub fn len(&self) -> usize {
        self.inner.tasks.len()
    }

    /// Returns `true` when no task is live.
    pub fn is_empty(&self) -> bool {
        self.inner.tasks.is_empty()
    }
}

impl fmt::Debug for TaskHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHost")
            .field("live", &self.inner.tasks.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn forever() -> WorkFuture {
        Box::pin(async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(())
        })
    }

    async fn explode() -> anyhow::Result<()> {
        tokio::task::yield_now().await;
        panic!("boom")
    }

    #[tokio::test]
    async fn completed_tasks_leave_the_table() {
        let host = TaskHost::new();
        let handle = host.spawn("quick", Box::pin(async { Ok(()) }));
        assert_eq!(handle.clone().wait().await, TaskOutcome::Completed);
        assert!(host.find(&handle.id()).is_none());
        assert!(host.is_empty());
    }

    #[tokio::test]
    async fn failures_are_reported() {
        let host = TaskHost::new();
        let handle = host.spawn("boom", Box::pin(async { Err::<(), _>(anyhow::anyhow!("boom")) }));
        assert_eq!(handle.wait().await, TaskOutcome::Failed("boom".to_string()));
    }

    #[tokio::test]
    async fn cancellation_stops_the_body() {
        let host = TaskHost::new();
        let handle = host.spawn("forever", forever());
        let task = host.find(&handle.id()).unwrap();
        assert!(!task.is_done());
        assert_eq!(task.name(), "forever");
        assert!(task.invocation().is_none());

        assert!(host.cancel(handle.id()));
        assert!(handle.clone().wait().await.is_cancelled());
        assert!(task.is_done());
        assert!(!host.cancel(handle.id()));
    }

    #[tokio::test]
    async fn callbacks_run_exactly_once() {
        let host = TaskHost::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let handle = host.spawn("forever", forever());
        let task = host.find(&handle.id()).unwrap();

        let counter = Arc::clone(&calls);
        task.add_done_callback(move |_, outcome| {
            assert!(outcome.is_cancelled());
            counter.fetch_add(1, Ordering::SeqCst);
        });
        task.cancel();
        handle.wait().await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // Registered after termination: runs immediately.
        let counter = Arc::clone(&calls);
        task.add_done_callback(move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn live_tasks_lists_every_running_task() {
        let host = TaskHost::new();
        let a = host.spawn("a", forever());
        let b = host.spawn("b", forever());
        let mut ids: Vec<TaskId> = host.live_tasks().iter().map(LiveTask::id).collect();
        ids.sort();
        let mut expected = vec![a.id(), b.id()];
        expected.sort();
        assert_eq!(ids, expected);

        host.cancel(a.id());
        host.cancel(b.id());
        a.wait().await;
        b.wait().await;
        assert!(host.live_tasks().is_empty());
    }

    #[tokio::test]
    async fn join_by_id() {
        let host = TaskHost::new();
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let handle = host.spawn("gated", Box::pin(async move {
            rx.await?;
            Ok::<(), anyhow::Error>(())
        }));
        let flagged = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&flagged);
        assert!(host.add_done_callback(handle.id(), move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        let (outcome, sent) = tokio::join!(host.join(handle.id()), async { tx.send(()) });
        assert!(sent.is_ok());
        assert_eq!(outcome, Some(TaskOutcome::Completed));
        assert_eq!(flagged.load(Ordering::SeqCst), 1);
        assert_eq!(host.join(handle.id()).await, None);
        assert!(!host.add_done_callback(handle.id(), |_, _| {}));
    }

    #[tokio::test]
    async fn panicking_tasks_fail_and_leave_the_table() {
        let host = TaskHost::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let handle = host.spawn("panics", Box::pin(explode()));
        let counter = Arc::clone(&calls);
        assert!(host.add_done_callback(handle.id(), move |_, outcome| {
            assert!(matches!(outcome, TaskOutcome::Failed(_)));
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        let outcome = tokio::time::timeout(Duration::from_secs(5), handle.wait())
            .await
            .expect("panicking task never terminated");
        assert_eq!(outcome, TaskOutcome::Failed("task panicked: boom".to_string()));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(host.is_empty());
    }

    #[test]
    fn task_ids_round_trip_through_strings() {
        let id = TaskId::new();
        assert_eq!(id.to_string().parse::<TaskId>().unwrap(), id);
        assert!("not-a-uuid".parse::<TaskId>().is_err());
    }
}
