use std::fmt;
use std::future::Future;
use std::sync::Arc;
use anyhow::Result;
use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use serde::{Serialize, Deserialize};
use crate::runtime::offload::OffloadPool;

pub(crate) type CallBody<T> = Box<dyn FnOnce() -> BoxFuture<'static, Result<T>> + Send>;

/// What a deferred call is aimed at, as far as the caller knows.
/// Every field is optional; timeouts report whatever is present.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallTarget {
    pub ip: Option<String>,
    pub port: Option<u16>,
    pub service: Option<String>,
    pub operation: Option<String>,
}

impl CallTarget {
    pub fn endpoint(ip: &str, port: u16) -> Self {
        Self {
            ip: Some(ip.to_string()),
            port: Some(port),
            ..Self::default()
        }
    }

    pub fn service(mut self, service: &str) -> Self {
        self.service = Some(service.to_string());
        self
    }

    pub fn operation(mut self, operation: &str) -> Self {
        self.operation = Some(operation.to_string());
        self
    }
}

/// 延迟调用
/// A zero-argument call that has not started yet. The body is only invoked
/// once the fan-out has spawned a task for it.
pub struct DeferredCall<T> {
    target: CallTarget,
    body: CallBody<T>,
}

impl<T: Send + 'static> DeferredCall<T> {
    pub fn new<F, Fut>(call: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        Self {
            target: CallTarget::default(),
            body: Box::new(move || call().boxed()),
        }
    }

    /// A call whose body is CPU-bound and runs on `pool` instead of the scheduler.
    pub fn offloaded<F>(pool: Arc<OffloadPool>, work: F) -> Self
    where
        F: FnOnce() -> Result<T> + Send + 'static,
    {
        Self::new(move || async move { pool.run_cpu_bound(work).await? })
    }

    pub fn with_target(mut self, target: CallTarget) -> Self {
        self.target = target;
        self
    }

    pub fn target(&self) -> &CallTarget {
        &self.target
    }

    /// Runs the call on the current task without spawning.
    pub async fn invoke(self) -> Result<T> {
        (self.body)().await
    }

    pub(crate) fn into_parts(self) -> (CallTarget, CallBody<T>) {
        (self.target, self.body)
    }
}

impl<T> fmt::Debug for DeferredCall<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeferredCall")
            .field("target", &self.target)
            .finish_non_exhaustive()
    }
}
