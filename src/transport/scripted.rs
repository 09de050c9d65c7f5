//! In-process transport with canned replies, for unit tests.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value};

use super::{DispatchError, OrganTransport};

type Reply = Result<Value, DispatchError>;

#[derive(Default)]
pub struct ScriptedTransport {
    replies: Mutex<HashMap<String, Reply>>,
    probes: Mutex<HashMap<String, Result<Option<Value>, DispatchError>>>,
    delays: Mutex<HashMap<String, Duration>>,
    calls: Mutex<Vec<(String, Map<String, Value>)>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reply for every call to `target` until replaced.
    pub fn reply(&self, target: &str, reply: Reply) {
        self.replies.lock().unwrap().insert(target.to_string(), reply);
    }

    pub fn fail(&self, target: &str) {
        self.reply(target, Err(DispatchError::Connection("connection refused".into())));
    }

    pub fn probe_reply(&self, resource: &str, reply: Result<Option<Value>, DispatchError>) {
        self.probes.lock().unwrap().insert(resource.to_string(), reply);
    }

    /// Hold calls to `target` for `delay` before replying.
    pub fn delay(&self, target: &str, delay: Duration) {
        self.delays.lock().unwrap().insert(target.to_string(), delay);
    }

    /// Targets called so far, in order.
    pub fn called(&self) -> Vec<String> {
        self.calls.lock().unwrap().iter().map(|(t, _)| t.clone()).collect()
    }

    pub fn params_for(&self, target: &str) -> Option<Map<String, Value>> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .find(|(t, _)| t == target)
            .map(|(_, p)| p.clone())
    }

    async fn answer(&self, target: &str, params: &Map<String, Value>) -> Reply {
        self.calls
            .lock()
            .unwrap()
            .push((target.to_string(), params.clone()));
        let delay = self.delays.lock().unwrap().get(target).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.replies
            .lock()
            .unwrap()
            .get(target)
            .cloned()
            .unwrap_or_else(|| Err(DispatchError::UnknownResource(target.to_string())))
    }
}

#[async_trait]
impl OrganTransport for ScriptedTransport {
    async fn dispatch(&self, resource: &str, _operation: &str, params: &Map<String, Value>) -> Reply {
        self.answer(resource, params).await
    }

    async fn invoke_tool(&self, tool: &str, params: &Map<String, Value>) -> Reply {
        self.answer(tool, params).await
    }

    async fn probe(&self, resource: &str) -> Result<Option<Value>, DispatchError> {
        self.probes
            .lock()
            .unwrap()
            .get(resource)
            .cloned()
            .unwrap_or(Ok(None))
    }
}
