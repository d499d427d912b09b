use serde::{Deserialize, Serialize};

use crate::device::constants::{
    BUZZER_ON, COMMAND_RESET_TIMER, COMMAND_START_TIMER, COMMAND_STOP_TIMER, COMMAND_TARE,
    COMMAND_TOGGLE_BUZZER, COMMAND_TOGGLE_PRECISION, COMMAND_TOGGLE_UNIT, FRAME_LEN,
    MAX_BATTERY_LEVEL, MIN_BATTERY_LEVEL,
};
use crate::device::types::Unit;
use crate::error::DecodeError;

/// Commands understood by the scale. Every command is a single opcode byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    StartTimer,
    StopTimer,
    ResetTimer,
    ToggleBuzzer,
    TogglePrecision,
    Tare,
    ToggleUnit,
}

impl Command {
    pub fn opcode(&self) -> u8 {
        match self {
            Command::StartTimer => COMMAND_START_TIMER,
            Command::StopTimer => COMMAND_STOP_TIMER,
            Command::ResetTimer => COMMAND_RESET_TIMER,
            Command::ToggleBuzzer => COMMAND_TOGGLE_BUZZER,
            Command::TogglePrecision => COMMAND_TOGGLE_PRECISION,
            Command::Tare => COMMAND_TARE,
            Command::ToggleUnit => COMMAND_TOGGLE_UNIT,
        }
    }
}

pub fn encode_command(command: Command) -> [u8; 1] {
    [command.opcode()]
}

/// Everything carried by one notification frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Frame {
    pub weight: f64,
    pub unit: Unit,
    pub buzzer_on: bool,
    pub battery_raw: u8,
}

// Frame layout:
//   [2..9]  weight, 7 ASCII digits with two implied decimals
//   [9..11] unit hint, "g " or "oz"
//   [14]    buzzer flag
//   [15]    raw battery level
pub fn decode_frame(data: &[u8]) -> Result<Frame, DecodeError> {
    if data.len() != FRAME_LEN {
        return Err(DecodeError::Length(data.len()));
    }

    let weight_field = String::from_utf8_lossy(&data[2..9]);
    let weight = weight_field
        .parse::<i64>()
        .map_err(|_| DecodeError::Weight(weight_field.to_string()))?;

    Ok(Frame {
        weight: weight as f64 / 100.0,
        unit: parse_unit(&data[9..11]),
        buzzer_on: parse_buzzer_flag(data[14]),
        battery_raw: data[15],
    })
}

pub fn parse_unit(data: &[u8]) -> Unit {
    if data.len() != 2 {
        return Unit::Unknown;
    }

    let hint = String::from_utf8_lossy(data).to_lowercase();
    if hint.contains('g') {
        Unit::Grams
    } else if hint.contains("oz") {
        Unit::Oz
    } else {
        Unit::Unknown
    }
}

pub fn parse_buzzer_flag(data: u8) -> bool {
    data == BUZZER_ON
}

/// Raw battery range mapped onto [0, 1]. Firmware revisions disagree on the bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatteryCalibration {
    pub min: u8,
    pub max: u8,
}

impl Default for BatteryCalibration {
    fn default() -> Self {
        BatteryCalibration {
            min: MIN_BATTERY_LEVEL,
            max: MAX_BATTERY_LEVEL,
        }
    }
}

impl BatteryCalibration {
    pub fn normalize(&self, raw: u8) -> f64 {
        if raw <= self.min {
            return 0.0;
        }
        if raw >= self.max {
            return 1.0;
        }

        let range = f64::from(self.max) - f64::from(self.min);
        let fraction = (f64::from(raw) - f64::from(self.min)) / range;
        (fraction * 100.0).round() / 100.0
    }
}
