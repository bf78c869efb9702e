//! Concurrency coordination for fanning one logical call out to many remote
//! endpoints: task ancestry, call-tree correlation ids, timeout-bounded
//! fan-out joins, CPU-bound offload and per-node request cloning.

pub mod config;
pub mod dispatch;
pub mod error;
pub mod fanout;
pub mod runtime;

pub use config::{ScatterConfig, load_config_from_yaml};
pub use dispatch::dispatcher::{Dispatcher, build_dispatcher};
pub use dispatch::node::Node;
pub use dispatch::operation::{EndpointMeta, Operation, Service, Transport};
pub use error::{CapturedFailure, FailureKind, FanOutError, SpawnError, TimeoutError};
pub use fanout::deferred::{CallTarget, DeferredCall};
pub use fanout::{JoinOptions, Outcome, join, join_in};
pub use runtime::correlation::CorrelationId;
pub use runtime::offload::{OffloadError, OffloadPool};
pub use runtime::registry::TaskRegistry;
pub use runtime::task::{TaskHandle, TaskId, current_task};
