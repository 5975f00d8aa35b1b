//! Lifecycle event vocabulary shared by the alert store, the notification
//! fan-out, and the web edge. Serialized as `type`-tagged JSON so observers
//! can dispatch without sniffing fields.

use serde::{Deserialize, Serialize};

use crate::snapshot::{AircraftSnapshot, FlightKey};

/// Events emitted as aircraft move through the alert lifecycle.
///
/// `ApproachAlert` and `Landed` are broadcast to every observer; `AckOk` is
/// addressed to the acknowledging requester only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AlertEvent {
    ApproachAlert {
        key: FlightKey,
        callsign: Option<String>,
        hex: Option<String>,
    },
    Landed {
        key: FlightKey,
        callsign: Option<String>,
        hex: Option<String>,
    },
    AckOk {
        key: FlightKey,
    },
}

impl AlertEvent {
    pub fn approach_alert(key: FlightKey, snapshot: &AircraftSnapshot) -> Self {
        AlertEvent::ApproachAlert {
            key,
            callsign: snapshot.callsign.clone(),
            hex: snapshot.hex.clone(),
        }
    }

    pub fn landed(key: FlightKey, snapshot: &AircraftSnapshot) -> Self {
        AlertEvent::Landed {
            key,
            callsign: snapshot.callsign.clone(),
            hex: snapshot.hex.clone(),
        }
    }

    pub fn key(&self) -> &FlightKey {
        match self {
            AlertEvent::ApproachAlert { key, .. } => key,
            AlertEvent::Landed { key, .. } => key,
            AlertEvent::AckOk { key } => key,
        }
    }
}

/// Point-in-time listing entry for one tracked aircraft, used to seed a
/// newly connected observer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertSummary {
    pub key: FlightKey,
    pub callsign: Option<String>,
    pub hex: Option<String>,
}

impl AlertSummary {
    pub fn new(key: FlightKey, snapshot: &AircraftSnapshot) -> Self {
        AlertSummary {
            key,
            callsign: snapshot.callsign.clone(),
            hex: snapshot.hex.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_approach_alert_json_shape() {
        let event = AlertEvent::ApproachAlert {
            key: FlightKey::from("a1b2c3"),
            callsign: Some("UAL123".to_string()),
            hex: Some("a1b2c3".to_string()),
        };
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({
                "type": "approach_alert",
                "key": "a1b2c3",
                "callsign": "UAL123",
                "hex": "a1b2c3",
            })
        );
    }

    #[test]
    fn test_ack_ok_json_shape() {
        let event = AlertEvent::AckOk {
            key: FlightKey::from("a1b2c3"),
        };
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({ "type": "ack_ok", "key": "a1b2c3" })
        );
    }

    #[test]
    fn test_landed_roundtrip() {
        let event = AlertEvent::Landed {
            key: FlightKey::from("abc123"),
            callsign: None,
            hex: Some("abc123".to_string()),
        };
        let text = serde_json::to_string(&event).unwrap();
        let parsed: AlertEvent = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed, event);
    }
}
