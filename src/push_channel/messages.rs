//! Push channel wire messages

use crate::error::{Error, Result};
use crate::models::{DetectionResult, MetricsPatch, Zone};
use crate::store::AggregateStore;
use serde::{Deserialize, Serialize};

/// Server → client
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundMessage {
    Detection {
        camera_id: String,
        data: DetectionResult,
        #[serde(default)]
        timestamp: Option<serde_json::Value>,
    },
    Metrics {
        data: MetricsPatch,
    },
    Zones {
        data: Vec<Zone>,
    },
}

const KNOWN_TYPES: [&str; 3] = ["detection", "metrics", "zones"];

/// Client → server
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundMessage {
    Subscribe { cameras: Vec<String> },
}

impl OutboundMessage {
    pub fn to_text(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Decode one text frame
///
/// `Ok(None)` for well-formed messages of a type this client does not handle.
pub fn decode(text: &str) -> Result<Option<InboundMessage>> {
    let value: serde_json::Value =
        serde_json::from_str(text).map_err(|e| Error::MalformedMessage(e.to_string()))?;

    let msg_type = value
        .get("type")
        .and_then(|t| t.as_str())
        .ok_or_else(|| Error::MalformedMessage("missing \"type\"".to_string()))?;

    if !KNOWN_TYPES.contains(&msg_type) {
        tracing::debug!(msg_type = %msg_type, "Ignoring unhandled push message type");
        return Ok(None);
    }

    serde_json::from_value(value)
        .map(Some)
        .map_err(|e| Error::MalformedMessage(e.to_string()))
}

/// Apply a decoded message to the store
pub fn apply(store: &AggregateStore, msg: InboundMessage) {
    match msg {
        InboundMessage::Detection { camera_id, data, .. } => {
            let alerts = store.record_push_detection(&camera_id, data);
            tracing::debug!(camera_id = %camera_id, alerts = alerts, "Push detection applied");
        }
        InboundMessage::Metrics { data } => store.merge_metrics(&data),
        InboundMessage::Zones { data } => store.replace_zones(data),
    }
}
