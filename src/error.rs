use std::fmt;
use std::time::Duration;
use thiserror::Error;
use crate::fanout::deferred::CallTarget;
use crate::runtime::task::{TaskId, panic_message};

/// The scheduler could not accept a new task at all.
#[derive(Debug, Error)]
pub enum SpawnError {
    #[error("no tokio runtime is available to spawn on")]
    NoRuntime(#[from] tokio::runtime::TryCurrentError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// The call returned an error.
    Error,
    Panic,
    /// The task was aborted before producing a value.
    Cancelled,
}

/// 并发调用中捕获的失败
///
/// Raised inside a spawned task and handed back to the joiner with the
/// original error preserved as its source.
#[derive(Debug, Error)]
#[error("call in task {task} failed: {cause:#}")]
pub struct CapturedFailure {
    task: TaskId,
    kind: FailureKind,
    #[source]
    cause: anyhow::Error,
}

impl CapturedFailure {
    pub fn new(task: TaskId, cause: anyhow::Error) -> Self {
        Self {
            task,
            kind: FailureKind::Error,
            cause,
        }
    }

    pub(crate) fn from_join_error(task: TaskId, err: tokio::task::JoinError) -> Self {
        if err.is_panic() {
            let message = panic_message(&*err.into_panic());
            Self {
                task,
                kind: FailureKind::Panic,
                cause: anyhow::anyhow!("task panicked: {}", message),
            }
        } else {
            Self {
                task,
                kind: FailureKind::Cancelled,
                cause: anyhow::anyhow!("task was cancelled"),
            }
        }
    }

    /// The task the failure was raised in.
    pub fn task(&self) -> TaskId {
        self.task
    }

    pub fn kind(&self) -> FailureKind {
        self.kind
    }

    pub fn cause(&self) -> &anyhow::Error {
        &self.cause
    }

    pub fn into_cause(self) -> anyhow::Error {
        self.cause
    }
}

/// A call that had not finished when the join deadline passed.
///
/// Endpoint and operation fields are best-effort: they are whatever the
/// originating call exposed through its [`CallTarget`].
#[derive(Debug, Clone, PartialEq)]
pub struct TimeoutError {
    target: CallTarget,
    timeout: Option<Duration>,
}

impl TimeoutError {
    pub fn new(target: CallTarget, timeout: Option<Duration>) -> Self {
        Self { target, timeout }
    }

    pub fn target(&self) -> &CallTarget {
        &self.target
    }

    pub fn ip(&self) -> Option<&str> {
        self.target.ip.as_deref()
    }

    pub fn port(&self) -> Option<u16> {
        self.target.port
    }

    pub fn service(&self) -> Option<&str> {
        self.target.service.as_deref()
    }

    pub fn operation(&self) -> Option<&str> {
        self.target.operation.as_deref()
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }
}

impl fmt::Display for TimeoutError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("timed out")?;
        if let (Some(operation), Some(service), Some(ip), Some(port)) =
            (self.operation(), self.service(), self.ip(), self.port())
        {
            write!(f, " while executing {} on {} ({}:{})", operation, service, ip, port)?;
        }
        if let Some(timeout) = self.timeout {
            write!(f, " after {:?} seconds", timeout.as_secs_f64())?;
        }
        Ok(())
    }
}

impl std::error::Error for TimeoutError {}

/// Errors that abort a whole fan-out instead of being reported per call.
#[derive(Debug, Error)]
pub enum FanOutError {
    #[error("failed to schedule call {index}")]
    Spawn {
        index: usize,
        #[source]
        source: SpawnError,
    },
    #[error("call {index} failed: {failure}")]
    Call {
        index: usize,
        #[source]
        failure: CapturedFailure,
    },
}
