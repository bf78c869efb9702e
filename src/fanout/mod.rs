pub mod deferred;

use std::sync::Arc;
use std::time::Duration;
use futures_util::StreamExt;
use futures_util::stream::FuturesUnordered;
use tokio::task::AbortHandle;
use tokio::time::{self, Instant};
use tracing::{debug, warn};
use crate::error::{CapturedFailure, FanOutError, TimeoutError};
use crate::fanout::deferred::DeferredCall;
use crate::runtime::registry::TaskRegistry;
use crate::runtime::task::{TaskId, current_task};

/// How a fan-out waits for its calls.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JoinOptions {
    /// Stop waiting and return the first call failure as an error.
    pub raise_on_error: bool,
    /// Overall deadline for the whole batch, not per call.
    pub timeout: Option<Duration>,
    /// Abort tasks that are no longer waited for instead of leaving them running.
    pub cancel_abandoned: bool,
}

impl JoinOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise_on_error(mut self, raise_on_error: bool) -> Self {
        self.raise_on_error = raise_on_error;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn cancel_abandoned(mut self, cancel_abandoned: bool) -> Self {
        self.cancel_abandoned = cancel_abandoned;
        self
    }
}

/// The result of one call in a fan-out, in the slot of the call that produced it.
#[derive(Debug)]
pub enum Outcome<T> {
    Value(T),
    Failed(CapturedFailure),
    TimedOut(TimeoutError),
}

impl<T> Outcome<T> {
    pub fn is_value(&self) -> bool {
        matches!(self, Outcome::Value(_))
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Outcome::Failed(_))
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Outcome::TimedOut(_))
    }

    pub fn value(&self) -> Option<&T> {
        match self {
            Outcome::Value(v) => Some(v),
            _ => None,
        }
    }

    pub fn into_value(self) -> Option<T> {
        match self {
            Outcome::Value(v) => Some(v),
            _ => None,
        }
    }

    pub fn into_result(self) -> anyhow::Result<T> {
        match self {
            Outcome::Value(v) => Ok(v),
            Outcome::Failed(failure) => Err(failure.into()),
            Outcome::TimedOut(timeout) => Err(timeout.into()),
        }
    }
}

/// Runs every call concurrently on the process-wide registry. See [`join_in`].
pub async fn join<T>(calls: Vec<DeferredCall<T>>, options: JoinOptions) -> Result<Vec<Outcome<T>>, FanOutError>
where
    T: Send + 'static,
{
    join_in(TaskRegistry::global(), calls, options).await
}

/// 扇出并汇合
///
/// Spawns one task per call, in input order, as children of the current task,
/// then waits for all of them up to `options.timeout`. The returned vector has
/// exactly one [`Outcome`] per call, in input order regardless of completion
/// order. Calls still running at the deadline are reported as
/// [`Outcome::TimedOut`] and abandoned.
///
/// Only scheduling failures, and call failures when `raise_on_error` is set,
/// are returned as `Err`.
pub async fn join_in<T>(
    registry: &Arc<TaskRegistry>,
    calls: Vec<DeferredCall<T>>,
    options: JoinOptions,
) -> Result<Vec<Outcome<T>>, FanOutError>
where
    T: Send + 'static,
{
    if calls.is_empty() {
        return Ok(Vec::new());
    }

    let mut targets = Vec::with_capacity(calls.len());
    let mut handles = Vec::with_capacity(calls.len());
    for (index, call) in calls.into_iter().enumerate() {
        let (target, body) = call.into_parts();
        let spawned = registry.spawn(async move {
            body().await.map_err(|cause| CapturedFailure::new(current_task(), cause))
        });
        match spawned {
            Ok(handle) => handles.push(handle),
            Err(source) => {
                if options.cancel_abandoned {
                    handles.iter().for_each(|h| h.abort());
                }
                return Err(FanOutError::Spawn { index, source });
            }
        }
        targets.push(target);
    }

    let ids: Vec<TaskId> = handles.iter().map(|h| h.id()).collect();
    let aborts: Vec<AbortHandle> = handles.iter().map(|h| h.abort_handle()).collect();
    let deadline = options.timeout.map(|t| Instant::now() + t);
    debug!(calls = ids.len(), timeout_ms = options.timeout.map(|t| t.as_millis() as u64), "fan-out started");

    let mut pending: FuturesUnordered<_> = handles
        .into_iter()
        .enumerate()
        .map(|(index, handle)| async move { (index, handle.await) })
        .collect();
    let mut slots: Vec<Option<Outcome<T>>> = (0..ids.len()).map(|_| None).collect();

    loop {
        let next = match deadline {
            Some(deadline) => match time::timeout_at(deadline, pending.next()).await {
                Ok(next) => next,
                Err(_) => break,
            },
            None => pending.next().await,
        };
        let Some((index, joined)) = next else {
            break;
        };

        let result = match joined {
            Ok(result) => result,
            Err(err) => Err(CapturedFailure::from_join_error(ids[index], err)),
        };
        match result {
            Ok(value) => slots[index] = Some(Outcome::Value(value)),
            Err(failure) if options.raise_on_error => {
                drop(pending);
                if options.cancel_abandoned {
                    aborts.iter().for_each(AbortHandle::abort);
                }
                warn!(index, task = %ids[index], error = %failure, "call failed, abandoning fan-out");
                return Err(FanOutError::Call { index, failure });
            }
            Err(failure) => {
                debug!(index, task = %ids[index], error = %failure, "call failed");
                slots[index] = Some(Outcome::Failed(failure));
            }
        }
    }
    // dropping the remaining handles detaches the unfinished tasks
    drop(pending);

    let results = slots
        .into_iter()
        .zip(targets)
        .enumerate()
        .map(|(index, (slot, target))| match slot {
            Some(outcome) => outcome,
            None => {
                if options.cancel_abandoned {
                    aborts[index].abort();
                }
                warn!(index, task = %ids[index], "call did not finish before the deadline");
                Outcome::TimedOut(TimeoutError::new(target, options.timeout))
            }
        })
        .collect();
    Ok(results)
}
