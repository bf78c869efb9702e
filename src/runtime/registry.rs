use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Arc, LazyLock, Mutex, MutexGuard, PoisonError};
use dashmap::DashMap;
use tokio::runtime::Handle;
use tracing::{debug, trace};
use crate::error::SpawnError;
use crate::runtime::correlation::CorrelationId;
use crate::runtime::task::{CURRENT_TASK, TaskHandle, TaskId, current_task, runtime_task};

static GLOBAL: LazyLock<Arc<TaskRegistry>> = LazyLock::new(|| Arc::new(TaskRegistry::new()));

/// How many tokio tasks outside the registry keep a correlation id by default.
pub const DEFAULT_FOREIGN_CAPACITY: usize = 4096;

/// 任务血缘注册表
///
/// Records, for every task it spawns, the task that spawned it, and resolves
/// the correlation id shared by a whole call tree. The registry never owns a
/// task: each spawned future carries a guard that releases the task's entries
/// once the future is gone and no descendant of it is still registered.
///
/// Plain tokio tasks that were not spawned here have no completion hook. Their
/// correlation ids are kept for the most recent `foreign_capacity` of them.
#[derive(Debug)]
pub struct TaskRegistry {
    ancestry: DashMap<TaskId, Lineage>,
    correlation: DashMap<TaskId, CorrelationId>,
    foreign: Mutex<VecDeque<TaskId>>,
    foreign_capacity: usize,
}

#[derive(Debug)]
struct Lineage {
    // written once at spawn
    parent: TaskId,
    running: bool,
    // registered children still tracked
    children: usize,
}

/// Releases a task's bookkeeping when its future goes away.
struct Registration {
    registry: Arc<TaskRegistry>,
    id: TaskId,
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.registry.evict(self.id);
    }
}

impl Default for TaskRegistry {
    fn default() -> Self {
        Self::with_foreign_capacity(DEFAULT_FOREIGN_CAPACITY)
    }
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_foreign_capacity(foreign_capacity: usize) -> Self {
        Self {
            ancestry: DashMap::new(),
            correlation: DashMap::new(),
            foreign: Mutex::new(VecDeque::new()),
            foreign_capacity,
        }
    }

    /// The process-wide registry used by the free functions of this module.
    pub fn global() -> &'static Arc<TaskRegistry> {
        &GLOBAL
    }

    /// Launches `work` as a new task whose parent is the currently running task.
    ///
    /// Returns immediately; the work runs when the scheduler polls it.
    pub fn spawn<F>(self: &Arc<Self>, work: F) -> Result<TaskHandle<F::Output>, SpawnError>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let runtime = Handle::try_current()?;
        let parent = self.resolve(current_task());
        let id = TaskId::new();

        if let Some(mut lineage) = self.ancestry.get_mut(&parent) {
            lineage.children += 1;
        }
        self.ancestry.insert(
            id,
            Lineage {
                parent,
                running: true,
                children: 0,
            },
        );

        let registration = Registration {
            registry: Arc::clone(self),
            id,
        };
        let inner = runtime.spawn(CURRENT_TASK.scope(id, async move {
            let _registration = registration;
            work.await
        }));

        trace!(task = %id, parent = %parent, "spawned task");
        Ok(TaskHandle::new(id, inner))
    }

    /// Recorded parent of `task`. Finished tasks keep answering while any of
    /// their descendants is still running.
    pub fn parent_of(&self, task: TaskId) -> Option<TaskId> {
        self.ancestry.get(&task).map(|lineage| lineage.parent)
    }

    /// Parent of the currently running task.
    pub fn current_parent(&self) -> Option<TaskId> {
        self.parent_of(self.resolve(current_task()))
    }

    /// Resolves the correlation id of the current call tree.
    ///
    /// Walks parent links from the current task until a task with an id is
    /// found, caching that id on the current task. When no ancestor has one, a
    /// fresh id is generated and stored on the root-most ancestor, so every
    /// descendant converges on the same value.
    pub fn current_id(&self) -> CorrelationId {
        let origin = self.resolve(current_task());
        let mut cursor = origin;

        loop {
            let found = self.correlation.get(&cursor).map(|entry| entry.value().clone());
            if let Some(correlation_id) = found {
                if cursor != origin {
                    self.cache(origin, || correlation_id.clone());
                }
                return correlation_id;
            }
            match self.parent_of(cursor) {
                Some(parent) => cursor = parent,
                None => break,
            }
        }

        let root = cursor;
        let correlation_id = self.cache(root, || {
            let generated = CorrelationId::generate();
            debug!(task = %root, correlation_id = %generated, "generated correlation id");
            generated
        });
        if root != origin {
            self.cache(origin, || correlation_id.clone());
        }
        correlation_id
    }

    /// Pins the current task to `correlation_id`, e.g. to continue a trace
    /// received from an inbound request. Replaces any previous value.
    ///
    /// Descendants that have not resolved their id yet pick up the new value;
    /// ones that already did keep theirs.
    pub fn set_current_id(&self, correlation_id: impl Into<CorrelationId>) {
        let task = self.resolve(current_task());
        let correlation_id = correlation_id.into();
        debug!(task = %task, correlation_id = %correlation_id, "adopted correlation id");
        if self.correlation.insert(task, correlation_id).is_none() && task.is_foreign() {
            self.track_foreign(task);
        }
    }

    /// Number of registered tasks still running.
    pub fn len(&self) -> usize {
        self.ancestry.iter().filter(|entry| entry.running).count()
    }

    /// True once every registered task and its bookkeeping is gone.
    pub fn is_empty(&self) -> bool {
        self.ancestry.is_empty()
    }

    /// Tokio tasks outside the registry currently holding a correlation id.
    pub fn foreign_len(&self) -> usize {
        self.foreign_order().len()
    }

    // A registered task of another registry counts as the tokio task it runs on.
    fn resolve(&self, task: TaskId) -> TaskId {
        if task.is_registered() && !self.ancestry.contains_key(&task) {
            runtime_task()
        } else {
            task
        }
    }

    fn cache(&self, task: TaskId, make: impl FnOnce() -> CorrelationId) -> CorrelationId {
        let mut inserted = false;
        let correlation_id = self
            .correlation
            .entry(task)
            .or_insert_with(|| {
                inserted = true;
                make()
            })
            .value()
            .clone();
        if inserted && task.is_foreign() {
            self.track_foreign(task);
        }
        correlation_id
    }

    fn track_foreign(&self, task: TaskId) {
        let mut order = self.foreign_order();
        order.push_back(task);
        while order.len() > self.foreign_capacity {
            let Some(oldest) = order.pop_front() else {
                break;
            };
            self.correlation.remove(&oldest);
            trace!(task = %oldest, "dropped correlation id of foreign task");
        }
    }

    fn foreign_order(&self) -> MutexGuard<'_, VecDeque<TaskId>> {
        self.foreign.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // Marks `task` finished and removes every entry no live descendant needs.
    fn evict(&self, task: TaskId) {
        let mut cursor = task;
        let mut finished = true;
        loop {
            let removed = self.ancestry.remove_if_mut(&cursor, |_, lineage| {
                if finished {
                    lineage.running = false;
                } else {
                    lineage.children = lineage.children.saturating_sub(1);
                }
                !lineage.running && lineage.children == 0
            });
            let Some((_, lineage)) = removed else {
                break;
            };

            self.correlation.remove(&cursor);
            trace!(task = %cursor, "evicted task");
            if !lineage.parent.is_registered() {
                break;
            }
            cursor = lineage.parent;
            finished = false;
        }
    }
}

/// Spawns `work` on the process-wide registry.
pub fn spawn<F>(work: F) -> Result<TaskHandle<F::Output>, SpawnError>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    TaskRegistry::global().spawn(work)
}

pub fn parent_of(task: TaskId) -> Option<TaskId> {
    TaskRegistry::global().parent_of(task)
}

pub fn current_correlation_id() -> CorrelationId {
    TaskRegistry::global().current_id()
}

pub fn set_current_correlation_id(correlation_id: impl Into<CorrelationId>) {
    TaskRegistry::global().set_current_id(correlation_id)
}
