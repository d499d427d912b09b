use serde::{Deserialize, Serialize};

use crate::device::codec::BatteryCalibration;
use crate::device::constants::{DEFAULT_DEVICE_NAME, RECONNECT_DELAY, WRITE_DEADLINE};
use crate::device::settle::SettlePolicy;
use crate::device::types::{BuzzerSetting, DeviceIdentity};

/// Everything a session needs, fixed at construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ScaleConfig {
    pub identity: DeviceIdentity,
    pub force_buzzer: BuzzerSetting,
    pub battery: BatteryCalibration,
    pub settle: SettlePolicy,
    pub reconnect_delay_ms: u64,
    pub write_deadline_ms: u64,
}

impl Default for ScaleConfig {
    fn default() -> Self {
        ScaleConfig {
            identity: DeviceIdentity {
                name: DEFAULT_DEVICE_NAME.to_string(),
                id: None,
            },
            force_buzzer: BuzzerSetting::Unset,
            battery: BatteryCalibration::default(),
            settle: SettlePolicy::default(),
            reconnect_delay_ms: RECONNECT_DELAY,
            write_deadline_ms: WRITE_DEADLINE,
        }
    }
}

impl ScaleConfig {
    pub fn with_device_name(mut self, name: Option<String>) -> Self {
        if let Some(name) = name {
            self.identity.name = name;
        }
        self
    }

    pub fn with_device_id(mut self, id: Option<String>) -> Self {
        if id.is_some() {
            self.identity.id = id;
        }
        self
    }

    pub fn with_force_buzzer(mut self, setting: Option<BuzzerSetting>) -> Self {
        if let Some(setting) = setting {
            self.force_buzzer = setting;
        }
        self
    }
}
