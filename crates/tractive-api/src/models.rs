// REST payload types
//
// Models for the cloud's JSON API. Fields use `#[serde(default)]`
// liberally because payloads vary across tracker hardware generations,
// and every type keeps a `#[serde(flatten)]` catch-all so nothing the
// cloud sends is silently dropped.

use serde::{Deserialize, Serialize};

/// Tracker summary from `GET user/{uid}/trackers`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tracker {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(rename = "_type", default)]
    pub object_type: String,
    /// Catch-all for undocumented fields.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Full tracker object from `GET tracker/{id}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackerDetail {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(default)]
    pub hw_edition: Option<String>,
    #[serde(default)]
    pub model_number: Option<String>,
    #[serde(default)]
    pub fw_version: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub battery_save_mode: Option<bool>,
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Hardware report from `GET device_hw_report/{id}/`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HardwareReport {
    /// Battery charge in percent.
    #[serde(default)]
    pub battery_level: Option<i64>,
    #[serde(default)]
    pub clip_mounted_state: Option<bool>,
    /// Unix timestamp of the report.
    #[serde(default)]
    pub time: Option<i64>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Position fix, used both by `GET device_pos_report/{id}` and by the
/// entries of the position history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    /// Unix timestamp of the fix.
    #[serde(default)]
    pub time: Option<i64>,
    /// `[latitude, longitude]`.
    #[serde(default)]
    pub latlong: Option<[f64; 2]>,
    /// Speed in m/s, when moving.
    #[serde(default)]
    pub speed: Option<f64>,
    #[serde(default)]
    pub altitude: Option<f64>,
    /// Position accuracy in meters.
    #[serde(default)]
    pub pos_uncertainty: Option<f64>,
    /// `"GPS"`, `"WIFI"`, etc.
    #[serde(default)]
    pub sensor_used: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Trackable object (pet) summary from `GET user/{uid}/trackable_objects`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackableObject {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(rename = "_type", default)]
    pub object_type: String,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Full trackable object from `GET trackable_object/{id}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackableObjectDetail {
    #[serde(rename = "_id")]
    pub id: String,
    /// The tracker currently assigned to this pet.
    #[serde(default)]
    pub device_id: Option<String>,
    /// Pet profile (name, breed, ...). Shape varies; left loose.
    #[serde(default)]
    pub details: serde_json::Value,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Account detail from `GET user/{uid}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Health/activity overview from the wellness API surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthOverview {
    #[serde(default)]
    pub pet_id: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Acknowledgment of a device command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandResponse {
    #[serde(default)]
    pub pending: Option<bool>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn tracker_keeps_unknown_fields() {
        let json = r#"{"_id": "TRACKER1", "_type": "tracker", "fw": "3.2"}"#;
        let tracker: Tracker = serde_json::from_str(json).unwrap();
        assert_eq!(tracker.id, "TRACKER1");
        assert_eq!(tracker.object_type, "tracker");
        assert_eq!(tracker.extra["fw"], "3.2");
    }

    #[test]
    fn position_report_decodes() {
        let json = r#"{
            "time": 1719000000,
            "latlong": [48.2082, 16.3738],
            "speed": 1.2,
            "altitude": 171.0,
            "sensor_used": "GPS"
        }"#;
        let pos: Position = serde_json::from_str(json).unwrap();
        assert_eq!(pos.time, Some(1_719_000_000));
        let latlong = pos.latlong.unwrap();
        assert!((latlong[0] - 48.2082).abs() < 1e-9);
        assert_eq!(pos.sensor_used.as_deref(), Some("GPS"));
    }

    #[test]
    fn hardware_report_tolerates_missing_fields() {
        let report: HardwareReport = serde_json::from_str("{}").unwrap();
        assert!(report.battery_level.is_none());
        assert!(report.time.is_none());
    }
}
