use std::sync::Arc;
use anyhow::{Result, anyhow};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use crate::dispatch::operation::{Operation, Transport};
use crate::runtime::registry::TaskRegistry;

pub const CORRELATION_HEADER: &str = "X-Correlation-Id";

/// JSON-over-HTTP transport.
///
/// `POST http://{ip}:{port}/{service}/{operation}` with the call arguments as
/// the JSON body; the call tree's correlation id travels in
/// [`CORRELATION_HEADER`]. Extra headers may be set through a `headers`
/// object in the endpoint attributes.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    registry: Arc<TaskRegistry>,
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpTransport {
    pub fn new() -> Self {
        Self::with_client(Client::new())
    }

    pub fn with_client(client: Client) -> Self {
        Self {
            client,
            registry: Arc::clone(TaskRegistry::global()),
        }
    }

    pub fn with_registry(mut self, registry: Arc<TaskRegistry>) -> Self {
        self.registry = registry;
        self
    }

    pub fn url_for(operation: &Operation) -> String {
        let meta = operation.endpoint();
        format!(
            "http://{}:{}/{}/{}",
            meta.ip,
            meta.port,
            operation.service().name(),
            operation.name()
        )
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn invoke(&self, operation: &Operation, args: Value) -> Result<Value> {
        let url = Self::url_for(operation);
        let correlation_id = self.registry.current_id();

        let mut builder = self
            .client
            .post(&url)
            .header(CORRELATION_HEADER, correlation_id.as_str())
            .json(&args);

        if let Some(headers) = operation.endpoint().attributes.get("headers").and_then(|v| v.as_object()) {
            for (k, v) in headers {
                if let Some(v_str) = v.as_str() {
                    builder = builder.header(k, v_str);
                }
            }
        }

        let response = builder.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(anyhow!("{} returned HTTP {}", url, status));
        }

        // Empty or non-JSON bodies come back as null.
        let data = response.json::<Value>().await.unwrap_or(Value::Null);
        Ok(data)
    }
}
