use std::sync::Arc;
use std::time::SystemTime;
use serde::{Deserialize, Serialize};

use crate::error::DeviceError;

/// Unit of a weight measurement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Unit {
    #[default]
    #[serde(rename = "--")]
    Unknown,
    #[serde(rename = "g")]
    Grams,
    #[serde(rename = "oz")]
    Oz,
}

impl std::fmt::Display for Unit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let result = match self {
            Unit::Unknown => "--",
            Unit::Grams => "g",
            Unit::Oz => "oz",
        };

        write!(f, "{}", result)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceState {
    Scanning,
    Connected,
    Disconnected,
}

/// Latest known state of the link to the scale, with the error that caused it (if any).
#[derive(Debug, Clone)]
pub struct ConnectionStatus {
    pub state: DeviceState,
    pub error: Option<Arc<DeviceError>>,
}

impl ConnectionStatus {
    pub fn new(state: DeviceState, error: Option<DeviceError>) -> Self {
        ConnectionStatus { state, error: error.map(Arc::new) }
    }
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.error {
            None => write!(f, "{:?}", self.state),
            Some(err) => write!(f, "{:?} ({})", self.state, err),
        }
    }
}

/// A weight measurement, one per decoded notification frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DataPoint {
    pub timestamp: SystemTime,
    pub weight: f64,
    pub unit: Unit,
}

impl DataPoint {
    pub fn value(&self) -> f64 {
        self.weight
    }
}

/// Buzzer-on-touch setting to enforce on the first frame of every connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "camelCase")]
pub enum BuzzerSetting {
    #[default]
    Unset,
    On,
    Off,
}

impl BuzzerSetting {
    /// Returns true if a device reporting `buzzing` has to be toggled to honor this setting.
    pub fn mismatches(&self, buzzing: bool) -> bool {
        match self {
            BuzzerSetting::Unset => false,
            BuzzerSetting::On => !buzzing,
            BuzzerSetting::Off => buzzing,
        }
    }
}

/// Identifies the peripheral to connect to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceIdentity {
    pub name: String,
    #[serde(default)]
    pub id: Option<String>,
}

impl DeviceIdentity {
    /// Names compare case-insensitively. When an id is configured it has to match as well.
    pub fn matches(&self, name: Option<&str>, id: &str) -> bool {
        let name_matches = name.map_or(false, |name| name.eq_ignore_ascii_case(&self.name));

        match &self.id {
            None => name_matches,
            Some(expected_id) => name_matches && id.eq_ignore_ascii_case(expected_id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(name: &str, id: Option<&str>) -> DeviceIdentity {
        DeviceIdentity { name: name.to_string(), id: id.map(str::to_string) }
    }

    #[test]
    fn name_matching_ignores_case() {
        let identity = identity("FELICITA", None);
        assert!(identity.matches(Some("felicita"), "aa:bb"));
        assert!(identity.matches(Some("Felicita"), "cc:dd"));
        assert!(!identity.matches(Some("ACAIA"), "aa:bb"));
        assert!(!identity.matches(None, "aa:bb"));
    }

    #[test]
    fn name_and_id_must_both_match_when_both_are_set() {
        let identity = identity("FELICITA", Some("AA:BB:CC:DD:EE:FF"));
        assert!(identity.matches(Some("felicita"), "aa:bb:cc:dd:ee:ff"));
        assert!(!identity.matches(Some("felicita"), "11:22:33:44:55:66"));
        assert!(!identity.matches(Some("other"), "aa:bb:cc:dd:ee:ff"));
    }

    #[test]
    fn buzzer_setting_mismatch() {
        assert!(!BuzzerSetting::Unset.mismatches(true));
        assert!(!BuzzerSetting::Unset.mismatches(false));
        assert!(BuzzerSetting::On.mismatches(false));
        assert!(!BuzzerSetting::On.mismatches(true));
        assert!(BuzzerSetting::Off.mismatches(true));
        assert!(!BuzzerSetting::Off.mismatches(false));
    }

    #[test]
    fn unit_serializes_to_device_symbols() {
        assert_eq!(serde_json::to_string(&Unit::Grams).unwrap(), "\"g\"");
        assert_eq!(serde_json::to_string(&Unit::Oz).unwrap(), "\"oz\"");
        assert_eq!(Unit::Unknown.to_string(), "--");
    }
}
