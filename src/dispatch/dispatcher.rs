use std::sync::Arc;
use serde_json::Value;
use tracing::{debug, info_span, Instrument};
use crate::dispatch::node::Node;
use crate::dispatch::operation::Operation;
use crate::error::FanOutError;
use crate::fanout::{JoinOptions, Outcome, join_in};
use crate::runtime::registry::TaskRegistry;

/// 多节点调度器
///
/// Sends one clone of an operation to every node and gathers one outcome per
/// node, in node order. Dispatching never mutates the template, so a single
/// dispatcher can be shared and invoked concurrently.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    operation: Operation,
    nodes: Arc<[Node]>,
    options: JoinOptions,
    registry: Arc<TaskRegistry>,
}

pub fn build_dispatcher(operation: Operation, nodes: Vec<Node>, options: JoinOptions) -> Dispatcher {
    Dispatcher {
        operation,
        nodes: nodes.into(),
        options,
        registry: Arc::clone(TaskRegistry::global()),
    }
}

impl Dispatcher {
    /// Spawns the per-node calls through `registry` instead of the process-wide one.
    pub fn with_registry(mut self, registry: Arc<TaskRegistry>) -> Self {
        self.registry = registry;
        self
    }

    pub fn operation(&self) -> &Operation {
        &self.operation
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn options(&self) -> JoinOptions {
        self.options
    }

    /// The per-node clones a dispatch would send, in node order.
    pub fn clones(&self) -> Vec<Operation> {
        self.nodes.iter().map(|node| self.operation.for_node(node)).collect()
    }

    pub async fn dispatch(&self, args: Value) -> Result<Vec<Outcome<Value>>, FanOutError> {
        let calls: Vec<_> = self
            .clones()
            .iter()
            .map(|clone| clone.deferred(args.clone()))
            .collect();

        let span = info_span!(
            "dispatch",
            service = %self.operation.service().name(),
            operation = %self.operation.name(),
            nodes = self.nodes.len(),
        );
        async move {
            let results = join_in(&self.registry, calls, self.options).await?;
            let ok = results.iter().filter(|r| r.is_value()).count();
            debug!(ok, total = results.len(), "dispatch finished");
            Ok::<_, FanOutError>(results)
        }
        .instrument(span)
        .await
    }
}
