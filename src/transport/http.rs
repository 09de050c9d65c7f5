//! HTTP transport over reqwest.
//!
//! Organs expose `POST {base_url}/tools/{operation}/call` and a liveness
//! endpoint at `GET {base_url}{health_path}`. Native tools are hosted the same
//! way under the tool server's base URL.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde_json::{Map, Value};

use super::{DispatchError, OrganTransport};
use crate::config::{GatewayConfig, NativeToolConfig, OrganConfig};
use crate::resilience::timeouts::with_deadline;

const USER_AGENT: &str = concat!("organ-gateway/", env!("CARGO_PKG_VERSION"));

/// Transport that reaches organs and tool servers over HTTP.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    organs: HashMap<String, OrganConfig>,
    tools: HashMap<String, NativeToolConfig>,
    dispatch_timeout: Duration,
    probe_timeout: Duration,
}

impl HttpTransport {
    pub fn from_config(config: &GatewayConfig) -> Result<Self, DispatchError> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| DispatchError::Connection(e.to_string()))?;

        Ok(Self {
            client,
            organs: config
                .organs
                .iter()
                .map(|o| (o.name.clone(), o.clone()))
                .collect(),
            tools: config
                .native_tools
                .iter()
                .map(|t| (t.name.clone(), t.clone()))
                .collect(),
            dispatch_timeout: Duration::from_secs(config.timeouts.dispatch_secs),
            probe_timeout: Duration::from_secs(config.timeouts.probe_secs),
        })
    }

    async fn post_call(
        &self,
        base_url: &str,
        name: &str,
        params: &Map<String, Value>,
    ) -> Result<Value, DispatchError> {
        let url = format!("{}/tools/{}/call", base_url.trim_end_matches('/'), name);
        with_deadline(self.dispatch_timeout, async {
            let response = self
                .client
                .post(&url)
                .json(params)
                .send()
                .await
                .map_err(|e| DispatchError::Connection(e.to_string()))?;
            read_response(response).await
        })
        .await
    }
}

/// Map a status and body text to the dispatch error taxonomy.
///
/// Auth failures and missing routes are faults of the organ, so they feed the
/// breaker and advance the chain like a 5xx.
fn classify_status(status: StatusCode, body: &str) -> DispatchError {
    let message = if body.is_empty() {
        status.canonical_reason().unwrap_or("error").to_string()
    } else {
        body.chars().take(512).collect()
    };

    match status {
        // Only a rejection of the params themselves is the caller's fault.
        StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => DispatchError::InvalidRequest(message),
        s => DispatchError::Upstream {
            status: s.as_u16(),
            message,
        },
    }
}

fn parse_body(status: StatusCode, bytes: &[u8]) -> Result<Value, DispatchError> {
    if bytes.is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_slice(bytes).map_err(|e| DispatchError::Upstream {
        status: status.as_u16(),
        message: format!("invalid JSON body: {}", e),
    })
}

async fn read_response(response: Response) -> Result<Value, DispatchError> {
    let status = response.status();
    let bytes = response
        .bytes()
        .await
        .map_err(|e| DispatchError::Connection(e.to_string()))?;

    if status.is_success() {
        parse_body(status, &bytes)
    } else {
        Err(classify_status(status, &String::from_utf8_lossy(&bytes)))
    }
}

#[async_trait]
impl OrganTransport for HttpTransport {
    async fn dispatch(
        &self,
        resource: &str,
        operation: &str,
        params: &Map<String, Value>,
    ) -> Result<Value, DispatchError> {
        let organ = self
            .organs
            .get(resource)
            .ok_or_else(|| DispatchError::UnknownResource(resource.to_string()))?;
        tracing::debug!(resource = %resource, operation = %operation, "Dispatching to organ");
        self.post_call(&organ.base_url, operation, params).await
    }

    async fn invoke_tool(&self, tool: &str, params: &Map<String, Value>) -> Result<Value, DispatchError> {
        let server = self
            .tools
            .get(tool)
            .ok_or_else(|| DispatchError::UnknownResource(tool.to_string()))?;
        tracing::debug!(tool = %tool, "Invoking native tool");
        self.post_call(&server.base_url, tool, params).await
    }

    async fn probe(&self, resource: &str) -> Result<Option<Value>, DispatchError> {
        let organ = self
            .organs
            .get(resource)
            .ok_or_else(|| DispatchError::UnknownResource(resource.to_string()))?;
        let url = format!("{}{}", organ.base_url.trim_end_matches('/'), organ.health_path);

        with_deadline(self.probe_timeout, async {
            let response = self
                .client
                .get(&url)
                .send()
                .await
                .map_err(|e| DispatchError::Connection(e.to_string()))?;
            let status = response.status();
            let bytes = response
                .bytes()
                .await
                .map_err(|e| DispatchError::Connection(e.to_string()))?;

            if !status.is_success() {
                return Err(DispatchError::Upstream {
                    status: status.as_u16(),
                    message: "health check failed".to_string(),
                });
            }
            // A non-JSON body is still a healthy answer.
            Ok(serde_json::from_slice(&bytes).ok())
        })
        .await
    }
}
