use std::collections::BTreeMap;
use std::fmt::Debug;
use std::sync::Arc;
use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use crate::dispatch::node::Node;
use crate::fanout::deferred::{CallTarget, DeferredCall};

/// 传输层接口：负责把一次操作真正发到远端
#[async_trait]
pub trait Transport: Send + Sync + Debug {
    async fn invoke(&self, operation: &Operation, args: Value) -> Result<Value>;
}

/// Where a service lives, plus whatever else the transport needs to reach it.
#[derive(Debug, Clone, PartialEq)]
pub struct EndpointMeta {
    pub ip: String,
    pub port: u16,
    pub attributes: Arc<BTreeMap<String, Value>>,
}

impl EndpointMeta {
    pub fn new(ip: &str, port: u16) -> Self {
        Self {
            ip: ip.to_string(),
            port,
            attributes: Arc::new(BTreeMap::new()),
        }
    }

    pub fn with_attribute(mut self, key: &str, value: impl Into<Value>) -> Self {
        Arc::make_mut(&mut self.attributes).insert(key.to_string(), value.into());
        self
    }

    /// Copy pointing at another endpoint; attributes stay shared.
    pub fn with_endpoint(&self, ip: &str, port: u16) -> Self {
        Self {
            ip: ip.to_string(),
            port,
            attributes: Arc::clone(&self.attributes),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Service {
    name: String,
    meta: Arc<EndpointMeta>,
    transport: Arc<dyn Transport>,
}

impl Service {
    pub fn new(name: &str, meta: EndpointMeta, transport: Arc<dyn Transport>) -> Self {
        Self {
            name: name.to_string(),
            meta: Arc::new(meta),
            transport,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn meta(&self) -> &Arc<EndpointMeta> {
        &self.meta
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// Copy with a fresh endpoint metadata; the transport stays shared.
    pub fn with_endpoint(&self, ip: &str, port: u16) -> Self {
        Self {
            name: self.name.clone(),
            meta: Arc::new(self.meta.with_endpoint(ip, port)),
            transport: Arc::clone(&self.transport),
        }
    }
}

/// 操作模板
///
/// Cloning an operation for a node copies three levels (operation, service,
/// endpoint metadata) and replaces only ip and port. Everything else,
/// including the transport and attribute maps, stays shared with the
/// template, and the template itself is never touched.
#[derive(Debug, Clone)]
pub struct Operation {
    name: String,
    service: Arc<Service>,
    attributes: Arc<BTreeMap<String, Value>>,
}

impl Operation {
    pub fn new(name: &str, service: Service) -> Self {
        Self {
            name: name.to_string(),
            service: Arc::new(service),
            attributes: Arc::new(BTreeMap::new()),
        }
    }

    pub fn with_attribute(mut self, key: &str, value: impl Into<Value>) -> Self {
        Arc::make_mut(&mut self.attributes).insert(key.to_string(), value.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn service(&self) -> &Arc<Service> {
        &self.service
    }

    pub fn attributes(&self) -> &Arc<BTreeMap<String, Value>> {
        &self.attributes
    }

    pub fn endpoint(&self) -> &EndpointMeta {
        &self.service.meta
    }

    /// Copy-on-write access to this operation's endpoint. Only this value
    /// sees the change; templates and sibling clones keep their own.
    pub fn endpoint_mut(&mut self) -> &mut EndpointMeta {
        let service = Arc::make_mut(&mut self.service);
        Arc::make_mut(&mut service.meta)
    }

    pub fn with_endpoint(&self, ip: &str, port: u16) -> Self {
        Self {
            name: self.name.clone(),
            service: Arc::new(self.service.with_endpoint(ip, port)),
            attributes: Arc::clone(&self.attributes),
        }
    }

    pub fn for_node(&self, node: &Node) -> Self {
        self.with_endpoint(node.ip(), node.port())
    }

    pub fn target(&self) -> CallTarget {
        CallTarget::endpoint(&self.endpoint().ip, self.endpoint().port)
            .service(self.service.name())
            .operation(&self.name)
    }

    pub async fn invoke(&self, args: Value) -> Result<Value> {
        self.service.transport.invoke(self, args).await
    }

    /// Asynchronous invocation handle: the call only starts when the returned
    /// [`DeferredCall`] is spawned or invoked.
    pub fn deferred(&self, args: Value) -> DeferredCall<Value> {
        let operation = self.clone();
        DeferredCall::new(move || async move { operation.invoke(args).await }).with_target(self.target())
    }
}
