//! Wire frames exchanged with a hub endpoint.
//!
//! Frames travel as JSON text messages. The server pushes `event` frames,
//! answers `invocation` frames with a matching `completion`, and either side
//! may ping.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum WireFrame {
    /// Client → server named method call.
    Invocation {
        id: u64,
        method: String,
        #[serde(default)]
        args: Vec<Value>,
    },

    /// Server → client result for a prior invocation.
    Completion {
        id: u64,
        #[serde(default)]
        result: Option<Value>,
        #[serde(default)]
        error: Option<String>,
    },

    /// Server → client domain event push.
    Event { name: String, payload: Value },

    /// Client → server declaration of the event names it consumes.
    Subscribe { events: Vec<String> },

    /// Heartbeat.
    Ping,
    Pong,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn event_frame_round_trips_through_json() {
        let text = r#"{"type":"event","name":"CapacityAlert","payload":{"PercentageFull":97.0}}"#;
        let frame: WireFrame = serde_json::from_str(text).unwrap();
        assert_eq!(
            frame,
            WireFrame::Event {
                name: "CapacityAlert".to_string(),
                payload: json!({"PercentageFull": 97.0}),
            }
        );
    }

    #[test]
    fn completion_without_result_or_error_parses() {
        let frame: WireFrame = serde_json::from_str(r#"{"type":"completion","id":7}"#).unwrap();
        assert_eq!(
            frame,
            WireFrame::Completion {
                id: 7,
                result: None,
                error: None,
            }
        );
    }
}
