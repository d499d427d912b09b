use btleplug::api::bleuuid::uuid_from_u16;
use uuid::Uuid;

/**
 * The advertised name of the scale, used when no name override is configured.
 */
pub const DEFAULT_DEVICE_NAME: &str = "FELICITA";

/**
 * How long (milliseconds) to wait after a disconnect before scanning again.
 */
pub const RECONNECT_DELAY: u64 = 100;

/**
 * How long (milliseconds) a write to a characteristic may take.
 */
pub const WRITE_DEADLINE: u64 = 2000;

/**
 * How often (milliseconds) the observed buzzer flag is polled while waiting for it to settle.
 */
pub const SETTLE_DELAY: u64 = 50;

/**
 * How many times the observed buzzer flag is polled before giving up.
 */
pub const SETTLE_RETRIES: u32 = 100;

/**
 * The transfer size requested on connect.
 */
pub const MTU: u16 = 500;

/**
 * 16-bit UUID of the BLE service carrying the scale data.
 */
pub const DATA_SERVICE: u16 = 0xffe0;

/**
 * 16-bit UUID of the characteristic that notifies frames and accepts commands.
 */
pub const DATA_CHARACTERISTIC: u16 = 0xffe1;

/**
 * Every notification frame has exactly this many bytes.
 */
pub const FRAME_LEN: usize = 18;

/**
 * Value of the buzzer byte when buzzing on touch is enabled.
 */
pub const BUZZER_ON: u8 = 0x22;

/**
 * Raw battery bytes at or below MIN_BATTERY_LEVEL read as empty, at or above MAX_BATTERY_LEVEL as full.
 */
pub const MIN_BATTERY_LEVEL: u8 = 129;
pub const MAX_BATTERY_LEVEL: u8 = 158;

pub const COMMAND_START_TIMER: u8 = 0x52; // R
pub const COMMAND_STOP_TIMER: u8 = 0x53; // S
pub const COMMAND_RESET_TIMER: u8 = 0x43; // C
pub const COMMAND_TOGGLE_BUZZER: u8 = 0x42; // B
pub const COMMAND_TOGGLE_PRECISION: u8 = 0x44; // D
pub const COMMAND_TARE: u8 = 0x54; // T
pub const COMMAND_TOGGLE_UNIT: u8 = 0x55; // U

pub fn make_data_service_uuid() -> Uuid {
    uuid_from_u16(DATA_SERVICE)
}

pub fn make_data_characteristic_uuid() -> Uuid {
    uuid_from_u16(DATA_CHARACTERISTIC)
}
