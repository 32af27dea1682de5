//! Outbound message hand-off.
//!
//! `SendMessage` actions are rendered and passed to a
//! [`NotificationDispatcher`]. Delivery belongs to the host.

use careplan_core::MessageChannel;
use indexmap::IndexMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// A rendered message ready for delivery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboundMessage {
    pub channel: MessageChannel,
    pub recipient: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    pub body: String,
    /// Flow that produced the message
    pub flow_id: String,
    pub trigger_id: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// Receives messages produced by `SendMessage` actions.
///
/// Fire-and-forget: an `Err` only reports that the hand-off itself was
/// refused.
pub trait NotificationDispatcher: Send + Sync {
    fn dispatch(&self, message: OutboundMessage) -> Result<(), String>;
}

/// Renders `{{name}}` placeholders from firing parameters.
#[derive(Debug, Default, Clone, Copy)]
pub struct MessageRenderer;

impl MessageRenderer {
    pub fn new() -> Self {
        Self
    }

    /// Placeholders with no matching parameter are left in place.
    pub fn render(&self, template: &str, data: &IndexMap<String, serde_json::Value>) -> String {
        let mut result = template.to_string();

        for (key, value) in data {
            let placeholder = format!("{{{{{}}}}}", key);
            if !result.contains(&placeholder) {
                continue;
            }
            let replacement = match value {
                serde_json::Value::String(s) => s.clone(),
                serde_json::Value::Number(n) => n.to_string(),
                serde_json::Value::Bool(b) => b.to_string(),
                serde_json::Value::Null => String::new(),
                _ => value.to_string(),
            };
            result = result.replace(&placeholder, &replacement);
        }

        result
    }
}

/// Dispatcher that keeps every message in memory.
#[derive(Debug, Default)]
pub struct RecordingDispatcher {
    sent: Mutex<Vec<OutboundMessage>>,
    reject: bool,
}

impl RecordingDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// A dispatcher that refuses every message.
    pub fn rejecting() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            reject: true,
        }
    }

    pub fn sent(&self) -> Vec<OutboundMessage> {
        self.sent.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.sent.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sent.lock().is_empty()
    }
}

impl NotificationDispatcher for RecordingDispatcher {
    fn dispatch(&self, message: OutboundMessage) -> Result<(), String> {
        if self.reject {
            return Err(format!("{} channel unavailable", message.channel));
        }
        self.sent.lock().push(message);
        Ok(())
    }
}
