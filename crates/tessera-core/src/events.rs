//! # Events
//!
//! Declarative event descriptors. An event is either emitted through the
//! substrate (`call_event`) or, for `custom` events, dispatched to a
//! handler running in a read-only (`run_event`) or mutating
//! (`execute_event`) session.

use crate::access::CallerPattern;
use crate::engine::Engine;
use crate::ledger::Stub;
use crate::session::Session;
use crate::types::{Result, TesseraError};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::fmt;
use std::sync::Arc;

/// Kind of an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    Log,
    Transaction,
    Custom,
}

/// Handler of a custom event.
#[derive(Clone)]
pub struct EventHandler(Arc<dyn Fn(&mut Session<'_>, &Value) -> Result<()> + Send + Sync>);

impl EventHandler {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&mut Session<'_>, &Value) -> Result<()> + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    fn call(&self, session: &mut Session<'_>, payload: &Value) -> Result<()> {
        (self.0)(session, payload)
    }
}

impl fmt::Debug for EventHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("EventHandler(..)")
    }
}

/// A declared event.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub tag: String,
    pub label: String,
    #[serde(default)]
    pub description: String,
    /// Prefix of the log line written when the event fires.
    #[serde(default)]
    pub base_log: String,
    #[serde(rename = "type")]
    pub event_type: EventType,
    /// Intended receivers. `None` means everyone.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receivers: Option<Vec<CallerPattern>>,
    /// Target channel of a cross-ledger `transaction` event.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    /// Target chaincode of a cross-ledger `transaction` event.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chaincode: Option<String>,
    #[serde(skip)]
    pub custom_function: Option<EventHandler>,
}

impl Event {
    pub fn new(tag: &str, label: &str, event_type: EventType) -> Self {
        Self {
            tag: tag.to_string(),
            label: label.to_string(),
            description: String::new(),
            base_log: String::new(),
            event_type,
            receivers: None,
            channel: None,
            chaincode: None,
            custom_function: None,
        }
    }

    #[must_use]
    pub fn description(mut self, description: &str) -> Self {
        self.description = description.to_string();
        self
    }

    #[must_use]
    pub fn base_log(mut self, base_log: &str) -> Self {
        self.base_log = base_log.to_string();
        self
    }

    #[must_use]
    pub fn receivers(mut self, receivers: Vec<CallerPattern>) -> Self {
        self.receivers = Some(receivers);
        self
    }

    /// Cross-ledger target of a `transaction` event.
    #[must_use]
    pub fn target(mut self, channel: &str, chaincode: &str) -> Self {
        self.channel = Some(channel.to_string());
        self.chaincode = Some(chaincode.to_string());
        self
    }

    #[must_use]
    pub fn handler(mut self, handler: EventHandler) -> Self {
        self.custom_function = Some(handler);
        self
    }

    /// Descriptor returned by `getEvents`.
    #[must_use]
    pub fn descriptor(&self) -> Value {
        let mut out = serde_json::to_value(self).unwrap_or_else(|_| json!({}));
        if let Value::Object(map) = &mut out {
            map.insert(
                "hasCustomFunction".into(),
                Value::Bool(self.custom_function.is_some()),
            );
        }
        out
    }
}

impl Session<'_> {
    /// Emit an event through the substrate, published on commit.
    pub fn call_event(&mut self, tag: &str, payload: &Value) -> Result<()> {
        let event = self.engine().event(tag)?.clone();
        let body = match event.event_type {
            EventType::Transaction => json!({
                "channel": event.channel,
                "chaincode": event.chaincode,
                "payload": payload,
            }),
            EventType::Log | EventType::Custom => payload.clone(),
        };
        let bytes = serde_json::to_vec(&body)
            .map_err(|e| TesseraError::internal(format!("failed to encode event: {}", e)))?;
        self.stub_mut().set_event(&event.tag, bytes)?;
        tracing::info!(event = %event.tag, "{}", event.base_log);
        Ok(())
    }
}

impl Engine {
    /// Run a custom event handler in a read-only session.
    pub fn run_event(&self, stub: &mut dyn Stub, tag: &str, payload: &Value) -> Result<()> {
        self.dispatch_event(stub, tag, payload, true)
    }

    /// Run a custom event handler in a mutating session.
    pub fn execute_event(&self, stub: &mut dyn Stub, tag: &str, payload: &Value) -> Result<()> {
        self.dispatch_event(stub, tag, payload, false)
    }

    fn dispatch_event(
        &self,
        stub: &mut dyn Stub,
        tag: &str,
        payload: &Value,
        read_only: bool,
    ) -> Result<()> {
        let event = self.event(tag)?;
        let handler = match (&event.event_type, &event.custom_function) {
            (EventType::Custom, Some(handler)) => handler.clone(),
            _ => {
                return Err(TesseraError::bad_request(format!(
                    "event '{}' has no custom function",
                    tag
                )));
            }
        };
        let mut session = self.session(stub, tag, read_only);
        handler
            .call(&mut session, payload)
            .map_err(|e| e.wrap(format!("event '{}'", tag)))
    }
}
