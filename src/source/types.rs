//! Wire types for the Gotify stream and application API

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Auxiliary attribute value: a printable scalar or a nested map
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(from = "serde_json::Value")]
pub enum Extra {
    Scalar(String),
    Nested(BTreeMap<String, Extra>),
}

impl From<serde_json::Value> for Extra {
    fn from(value: serde_json::Value) -> Self {
        use serde_json::Value;

        match value {
            Value::Object(map) => {
                Extra::Nested(map.into_iter().map(|(k, v)| (k, Extra::from(v))).collect())
            }
            Value::String(s) => Extra::Scalar(s),
            other => Extra::Scalar(other.to_string()),
        }
    }
}

impl From<&str> for Extra {
    fn from(value: &str) -> Self {
        Extra::Scalar(value.to_string())
    }
}

/// A message frame pushed by the Gotify stream
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Event {
    #[serde(default)]
    pub id: u32,

    #[serde(rename = "appid", default)]
    pub app_id: u32,

    #[serde(default)]
    pub title: String,

    #[serde(rename = "message", default)]
    pub body: String,

    #[serde(default)]
    pub priority: u32,

    /// Sorted by key so rendering is deterministic
    #[serde(default)]
    pub extras: BTreeMap<String, Extra>,

    #[serde(default)]
    pub date: Option<DateTime<FixedOffset>>,
}

/// Application record returned by `GET /application`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityMetadata {
    pub id: u32,

    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub description: String,
}

/// An event joined with its application's metadata
#[derive(Debug, Clone, PartialEq)]
pub struct EnrichedMessage {
    pub event: Event,
    pub app_name: String,
    pub app_description: String,
}

impl EnrichedMessage {
    pub fn new(event: Event, app: &EntityMetadata) -> Self {
        Self {
            event,
            app_name: app.name.clone(),
            app_description: app.description.clone(),
        }
    }

    pub fn app_id(&self) -> u32 {
        self.event.app_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_from_stream_frame() {
        let frame = r#"{
            "id": 25,
            "appid": 5,
            "message": "Backup finished",
            "title": "Backup",
            "priority": 8,
            "extras": {
                "client::display": { "contentType": "text/markdown" },
                "count": 3,
                "ok": true
            },
            "date": "2018-02-27T19:36:10.5045044+01:00"
        }"#;

        let event: Event = serde_json::from_str(frame).unwrap();
        assert_eq!(event.id, 25);
        assert_eq!(event.app_id, 5);
        assert_eq!(event.body, "Backup finished");
        assert_eq!(event.priority, 8);
        assert_eq!(event.extras["count"], Extra::Scalar("3".to_string()));
        assert_eq!(event.extras["ok"], Extra::Scalar("true".to_string()));
        match &event.extras["client::display"] {
            Extra::Nested(map) => {
                assert_eq!(map["contentType"], Extra::from("text/markdown"));
            }
            other => panic!("expected nested extras, got {:?}", other),
        }
        assert!(event.date.is_some());
    }

    #[test]
    fn test_event_with_missing_fields() {
        let event: Event = serde_json::from_str(r#"{"appid": 1, "message": "hi"}"#).unwrap();
        assert_eq!(event.app_id, 1);
        assert!(event.title.is_empty());
        assert!(event.extras.is_empty());
        assert!(event.date.is_none());
    }

    #[test]
    fn test_application_list_ignores_unknown_fields() {
        let body = r#"[{"id":1,"token":"AbC","name":"Backup","description":"nightly","internal":false}]"#;
        let apps: Vec<EntityMetadata> = serde_json::from_str(body).unwrap();
        assert_eq!(apps[0].name, "Backup");
        assert_eq!(apps[0].description, "nightly");
    }
}
