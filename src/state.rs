//! Recorded state snapshots.
//!
//! A snapshot is what the history source recorded for one entity at one
//! instant: the state value (`on`, `off`, `open`, ...) plus the attribute
//! mapping that came with it (`brightness`, `current_position`, ...).
//! Snapshots are opaque to the scheduler; only the dispatch policy looks
//! inside them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// State attribute holding a light's brightness.
pub const ATTR_BRIGHTNESS: &str = "brightness";
/// State attribute holding a light's RGB color.
pub const ATTR_RGB_COLOR: &str = "rgb_color";
/// State attribute holding a cover's position.
pub const ATTR_CURRENT_POSITION: &str = "current_position";
/// State attribute holding a cover's tilt position.
pub const ATTR_CURRENT_TILT_POSITION: &str = "current_tilt_position";

/// State value plus attributes, as recorded by the history source.
///
/// # Examples
///
/// ```
/// use presence_sim::StateSnapshot;
///
/// let snap = StateSnapshot::new("on").with_attribute("brightness", 128);
/// assert!(snap.is("on"));
/// assert_eq!(snap.attribute("brightness"), Some(&serde_json::json!(128)));
/// ```
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StateSnapshot {
    /// The state value.
    pub state: String,

    /// Attributes recorded with the state.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub attributes: Map<String, Value>,
}

impl StateSnapshot {
    /// Snapshot with no attributes.
    #[must_use]
    pub fn new(state: impl Into<String>) -> Self {
        Self {
            state: state.into(),
            attributes: Map::new(),
        }
    }

    /// Builder-style attribute setter.
    #[must_use]
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Case-sensitive state comparison.
    #[must_use]
    pub fn is(&self, state: &str) -> bool {
        self.state == state
    }

    /// Raw attribute value.
    #[must_use]
    pub fn attribute(&self, key: &str) -> Option<&Value> {
        self.attributes.get(key).filter(|v| !v.is_null())
    }

    /// True if `key` was recorded.
    #[must_use]
    pub fn has_attribute(&self, key: &str) -> bool {
        self.attribute(key).is_some()
    }

    /// Recorded `brightness`.
    #[must_use]
    pub fn brightness(&self) -> Option<&Value> {
        self.attribute(ATTR_BRIGHTNESS)
    }

    /// Recorded `rgb_color`.
    #[must_use]
    pub fn rgb_color(&self) -> Option<&Value> {
        self.attribute(ATTR_RGB_COLOR)
    }

    /// Recorded cover position.
    #[must_use]
    pub fn current_position(&self) -> Option<&Value> {
        self.attribute(ATTR_CURRENT_POSITION)
    }

    /// Recorded cover tilt.
    #[must_use]
    pub fn current_tilt_position(&self) -> Option<&Value> {
        self.attribute(ATTR_CURRENT_TILT_POSITION)
    }
}

/// One recorded state transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord {
    /// When the source recorded the transition.
    pub recorded_at: DateTime<Utc>,

    /// The state the entity transitioned to.
    #[serde(flatten)]
    pub snapshot: StateSnapshot,
}

impl HistoryRecord {
    /// A transition to `snapshot` recorded at `recorded_at`.
    #[must_use]
    pub const fn new(recorded_at: DateTime<Utc>, snapshot: StateSnapshot) -> Self {
        Self { recorded_at, snapshot }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn test_null_attribute_is_absent() {
        let snap = StateSnapshot::new("on").with_attribute(ATTR_BRIGHTNESS, Value::Null);
        assert!(!snap.has_attribute(ATTR_BRIGHTNESS));
        assert_eq!(snap.brightness(), None);
    }

    #[test]
    fn test_cover_accessors() {
        let snap = StateSnapshot::new("open")
            .with_attribute(ATTR_CURRENT_POSITION, 40)
            .with_attribute(ATTR_CURRENT_TILT_POSITION, 75);
        assert_eq!(snap.current_position(), Some(&json!(40)));
        assert_eq!(snap.current_tilt_position(), Some(&json!(75)));
        assert!(snap.is("open"));
        assert!(!snap.is("Open"));
    }

    #[test]
    fn test_history_record_json_shape() {
        let at = Utc.with_ymd_and_hms(2023, 1, 1, 10, 0, 0).unwrap();
        let record: HistoryRecord = serde_json::from_value(json!({
            "recorded_at": "2023-01-01T10:00:00Z",
            "state": "on",
            "attributes": { "brightness": 200, "rgb_color": [255, 120, 0] }
        }))
        .unwrap();
        assert_eq!(record.recorded_at, at);
        assert!(record.snapshot.is("on"));
        assert_eq!(record.snapshot.rgb_color(), Some(&json!([255, 120, 0])));

        let bare: HistoryRecord = serde_json::from_value(json!({
            "recorded_at": "2023-01-01T10:00:00Z",
            "state": "off"
        }))
        .unwrap();
        assert!(bare.snapshot.attributes.is_empty());
    }
}
