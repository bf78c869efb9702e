use std::any::Any;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::task::{AbortHandle, JoinError, JoinHandle};
use uuid::Uuid;

/// 协作任务标识
/// 每个经由 TaskRegistry 派生的任务都会分配一个，用于追踪父子血缘关系。
///
/// Tokio tasks started without the registry (a server's per-request handlers,
/// say) are identified by their tokio task id, so each one keeps its own
/// correlation id. [`TaskId::ROOT`] is left for code outside any task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskId(Kind);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Kind {
    Root,
    Registered(Uuid),
    Foreign(tokio::task::Id),
}

impl TaskId {
    /// Reported for code that runs outside any task (the outermost driver).
    pub const ROOT: TaskId = TaskId(Kind::Root);

    pub(crate) fn new() -> Self {
        Self(Kind::Registered(Uuid::new_v4()))
    }

    pub(crate) fn foreign(id: tokio::task::Id) -> Self {
        Self(Kind::Foreign(id))
    }

    pub fn is_root(&self) -> bool {
        matches!(self.0, Kind::Root)
    }

    /// Spawned through a `TaskRegistry`.
    pub fn is_registered(&self) -> bool {
        matches!(self.0, Kind::Registered(_))
    }

    /// A plain tokio task the registry did not spawn.
    pub fn is_foreign(&self) -> bool {
        matches!(self.0, Kind::Foreign(_))
    }

    pub fn as_uuid(&self) -> Option<Uuid> {
        match self.0 {
            Kind::Registered(uuid) => Some(uuid),
            _ => None,
        }
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Kind::Root => f.write_str("root"),
            Kind::Registered(uuid) => fmt::Display::fmt(&uuid, f),
            Kind::Foreign(id) => write!(f, "tokio-{}", id),
        }
    }
}

tokio::task_local! {
    pub(crate) static CURRENT_TASK: TaskId;
}

/// Id of the task currently being polled: the registered task if there is
/// one, else the running tokio task, else [`TaskId::ROOT`].
pub fn current_task() -> TaskId {
    CURRENT_TASK.try_with(|id| *id).unwrap_or_else(|_| runtime_task())
}

/// The running tokio task as seen from outside any registry.
pub(crate) fn runtime_task() -> TaskId {
    tokio::task::try_id().map(TaskId::foreign).unwrap_or(TaskId::ROOT)
}

/// Handle to a task spawned through a `TaskRegistry`.
///
/// Dropping the handle detaches the task; it keeps running until its work
/// completes. Awaiting the handle yields the task's output, or the tokio
/// `JoinError` if it panicked or was aborted.
#[derive(Debug)]
pub struct TaskHandle<T> {
    id: TaskId,
    inner: JoinHandle<T>,
}

impl<T> TaskHandle<T> {
    pub(crate) fn new(id: TaskId, inner: JoinHandle<T>) -> Self {
        Self { id, inner }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn is_finished(&self) -> bool {
        self.inner.is_finished()
    }

    /// Requests cooperative cancellation. Takes effect at the task's next suspension point.
    pub fn abort(&self) {
        self.inner.abort();
    }

    pub fn abort_handle(&self) -> AbortHandle {
        self.inner.abort_handle()
    }
}

impl<T> Future for TaskHandle<T> {
    type Output = Result<T, JoinError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.inner).poll(cx)
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
