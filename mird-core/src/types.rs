//! Core domain types for mird
//!
//! These types are the wire and storage format shared by the analytics
//! client and the collector.
//!
//! ## Terminology
//!
//! | Term | Definition |
//! |------|------------|
//! | **Consent** | Per-category permission (essential, functional, analytics) |
//! | **Session** | A window of activity identified by a rotating UUID |
//! | **Event Record** | One observation: a page view, an interaction, or a session end |
//! | **Server Log Entry** | An Event Record enriched by the collector |
//!
//! Field names on the wire are camelCase (`sessionId`, `pageViewCount`) because
//! the records originate in the browser; the collector adds snake_case fields
//! (`server_timestamp`, `anonymized_ip`).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

// ============================================
// Consent
// ============================================

/// The visitor's cookie-category choices.
///
/// `essential` is always `true`: it deserializes to `true` whatever is stored
/// and every constructor sets it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsentRecord {
    #[serde(default = "always_true", deserialize_with = "force_true")]
    pub essential: bool,
    #[serde(default)]
    pub functional: bool,
    #[serde(default)]
    pub analytics: bool,
    /// Whether the visitor has made any choice yet
    #[serde(default)]
    pub accepted: bool,
    /// When the choice was made
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

impl Default for ConsentRecord {
    fn default() -> Self {
        Self {
            essential: true,
            functional: false,
            analytics: false,
            accepted: false,
            timestamp: None,
        }
    }
}

impl ConsentRecord {
    /// A record with the given optional categories, not yet accepted.
    pub fn with_choices(functional: bool, analytics: bool) -> Self {
        Self {
            functional,
            analytics,
            ..Self::default()
        }
    }
}

fn always_true() -> bool {
    true
}

fn force_true<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    let _ = bool::deserialize(deserializer)?;
    Ok(true)
}

// ============================================
// Session
// ============================================

/// A bounded window of visitor activity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    /// UUID v4 string
    pub id: String,
    /// Page views seen in this session
    pub page_view_count: u32,
    /// When this session object was created or resumed
    pub start_time: DateTime<Utc>,
}

impl Session {
    /// A brand-new session with a fresh id and no page views.
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            page_view_count: 0,
            start_time: now,
        }
    }
}

// ============================================
// Page context
// ============================================

/// What the browser knows about the current page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageContext {
    /// Location path, e.g. `/index.html`
    pub path: String,
    /// Document title
    pub title: String,
    /// Document referrer, empty when none
    pub referrer: String,
}

// ============================================
// Event records
// ============================================

/// One analytics observation as sent by the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventRecord {
    pub timestamp: DateTime<Utc>,
    pub session_id: String,
    #[serde(flatten)]
    pub kind: EventKind,
}

/// Type-specific part of an [`EventRecord`], tagged by `type` on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    /// A page view
    Pageview {
        page: String,
        title: String,
        referrer: String,
        #[serde(rename = "pageViewCount")]
        page_view_count: u32,
    },
    /// An interaction
    Event {
        category: String,
        action: String,
        label: Option<String>,
        value: Option<f64>,
        page: String,
    },
    /// The visitor left the page
    SessionEnd {
        #[serde(rename = "pageViewCount")]
        page_view_count: u32,
    },
}

impl EventKind {
    /// Wire name of the variant
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Pageview { .. } => "pageview",
            EventKind::Event { .. } => "event",
            EventKind::SessionEnd { .. } => "session_end",
        }
    }
}

impl EventRecord {
    /// Wire name of the record type
    pub fn event_type(&self) -> &'static str {
        self.kind.as_str()
    }
}

/// A line of the collector's main log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerLogEntry {
    #[serde(flatten)]
    pub record: EventRecord,
    /// Collector wall clock when the record was received
    pub server_timestamp: DateTime<Utc>,
    /// Connecting address with host bits zeroed, or `"unknown"`
    pub anonymized_ip: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ts() -> DateTime<Utc> {
        "2025-05-28T10:15:00.000Z".parse().unwrap()
    }

    #[test]
    fn test_consent_essential_forced_true() {
        let stored = json!({
            "essential": false,
            "functional": true,
            "analytics": true,
            "accepted": true,
            "timestamp": "2025-05-28T10:15:00.000Z"
        });
        let consent: ConsentRecord = serde_json::from_value(stored).unwrap();
        assert!(consent.essential);
        assert!(consent.analytics);
        assert_eq!(consent.timestamp, Some(ts()));

        let sparse: ConsentRecord = serde_json::from_value(json!({"analytics": true})).unwrap();
        assert!(sparse.essential);
        assert!(!sparse.accepted);
    }

    #[test]
    fn test_pageview_wire_format() {
        let record = EventRecord {
            timestamp: ts(),
            session_id: "abc".to_string(),
            kind: EventKind::Pageview {
                page: "/".to_string(),
                title: "Mastering IR Derivatives".to_string(),
                referrer: String::new(),
                page_view_count: 2,
            },
        };

        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["type"], "pageview");
        assert_eq!(value["sessionId"], "abc");
        assert_eq!(value["pageViewCount"], 2);
        assert_eq!(value["title"], "Mastering IR Derivatives");
    }

    #[test]
    fn test_event_with_nulls_from_browser() {
        let raw = r#"{"type":"event","category":"Engagement","action":"Video Preview Click",
            "label":null,"value":null,"page":"/","timestamp":"2025-05-28T10:15:00.000Z",
            "sessionId":"s-1"}"#;
        let record: EventRecord = serde_json::from_str(raw).unwrap();

        assert_eq!(record.event_type(), "event");
        match record.kind {
            EventKind::Event { label, value, .. } => {
                assert!(label.is_none());
                assert!(value.is_none());
            }
            other => panic!("unexpected kind {other:?}"),
        }
    }

    #[test]
    fn test_server_log_entry_reads_enriched_line() {
        let line = r#"{"type":"session_end","timestamp":"2025-05-28T10:15:00.000Z",
            "sessionId":"s-1","pageViewCount":3,
            "server_timestamp":"2025-05-28T10:15:01+00:00","anonymized_ip":"203.0.113.0"}"#;
        let entry: ServerLogEntry = serde_json::from_str(line).unwrap();

        assert_eq!(entry.anonymized_ip, "203.0.113.0");
        assert_eq!(
            entry.record.kind,
            EventKind::SessionEnd { page_view_count: 3 }
        );
    }

    #[test]
    fn test_new_session_ids_differ() {
        let a = Session::new(ts());
        let b = Session::new(ts());
        assert_ne!(a.id, b.id);
        assert_eq!(a.page_view_count, 0);
    }
}
