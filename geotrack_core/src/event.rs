//! Condition events and their wire encoding.
//!
//! The payload is UTF-8 JSON with camelCase fields. The target entity id is
//! not part of the payload; it travels as the transport's routing key.
//!
//! ```text
//! {"kind":"init","condition":"normal","nodeType":"substation","region":"WA","latitude":47.6,"longitude":-122.1}
//! {"kind":"update","condition":"moderate"}
//! ```

use geotrack_env::EntityId;
use serde::{Deserialize, Serialize};

use crate::condition::Condition;

/// Whether an event creates the record or updates it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Init,
    Update,
}

/// Static site attributes carried only by Init events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SiteInfo {
    pub node_type: String,
    pub region: String,
    pub latitude: f64,
    pub longitude: f64,
}

/// The body of a condition event, as stored in incident history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventBody {
    pub kind: EventKind,
    pub condition: Condition,

    #[serde(flatten)]
    pub site: Option<SiteInfo>,
}

/// One dispatched message: the routing target plus the event body.
#[derive(Debug, Clone, PartialEq)]
pub struct ConditionEvent {
    pub target: EntityId,
    pub body: EventBody,
}

impl ConditionEvent {
    /// Creates the initialization event for a tracker.
    pub fn init(target: EntityId, condition: Condition, site: SiteInfo) -> Self {
        Self {
            target,
            body: EventBody {
                kind: EventKind::Init,
                condition,
                site: Some(site),
            },
        }
    }

    /// Creates a condition update event.
    pub fn update(target: EntityId, condition: Condition) -> Self {
        Self {
            target,
            body: EventBody {
                kind: EventKind::Update,
                condition,
                site: None,
            },
        }
    }

    pub fn kind(&self) -> EventKind {
        self.body.kind
    }

    pub fn condition(&self) -> Condition {
        self.body.condition
    }

    /// Serializes the body into payload bytes.
    pub fn to_payload(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(&self.body)
    }

    /// Rebuilds an event from its routing target and payload bytes.
    pub fn from_payload(target: EntityId, payload: &[u8]) -> Result<Self, serde_json::Error> {
        let body: EventBody = serde_json::from_slice(payload)?;
        Ok(Self { target, body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn site() -> SiteInfo {
        SiteInfo {
            node_type: "substation".to_string(),
            region: "WA".to_string(),
            latitude: 47.61,
            longitude: -122.05,
        }
    }

    #[test]
    fn test_init_payload_fields() {
        let event = ConditionEvent::init(EntityId::new("98072"), Condition::Normal, site());
        let payload = event.to_payload().unwrap();
        let json: serde_json::Value = serde_json::from_slice(&payload).unwrap();

        assert_eq!(json["kind"], "init");
        assert_eq!(json["condition"], "normal");
        assert_eq!(json["nodeType"], "substation");
        assert_eq!(json["region"], "WA");
        assert_eq!(json["latitude"], 47.61);
        assert_eq!(json["longitude"], -122.05);
        assert!(json.get("target").is_none());
    }

    #[test]
    fn test_update_payload_has_no_site_fields() {
        let event = ConditionEvent::update(EntityId::new("10122"), Condition::Severe);
        let text = String::from_utf8(event.to_payload().unwrap()).unwrap();

        assert_eq!(text, r#"{"kind":"update","condition":"severe"}"#);

        let decoded = ConditionEvent::from_payload(EntityId::new("10122"), text.as_bytes()).unwrap();
        assert_eq!(decoded, event);
    }

    #[test]
    fn test_malformed_payload_is_rejected() {
        let result = ConditionEvent::from_payload(EntityId::new("1"), br#"{"kind":"update","condition":"purple"}"#);
        assert!(result.is_err());
    }
}
