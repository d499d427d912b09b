use std::time::Duration;
use async_trait::async_trait;
use futures::channel::mpsc::Sender;

use crate::device::types::{ConnectionStatus, DataPoint, Unit};
use crate::error::DeviceError;
use crate::scale::sink::Handler;

/// Basic coffee scale control.
#[async_trait]
pub trait Basic: Send + Sync {
    fn connection_status(&self) -> ConnectionStatus;

    /// Battery level in [0, 1].
    fn battery_level(&self) -> f64;

    fn battery_level_raw(&self) -> u8;

    fn unit(&self) -> Unit;

    /// Switches between grams and ounces. Does nothing if the scale already reports `unit`.
    async fn set_unit(&self, unit: Unit) -> Result<(), DeviceError>;

    async fn tare(&self) -> Result<(), DeviceError>;

    /// Toggles the weight precision between 0.1 and 0.01.
    async fn toggle_precision(&self) -> Result<(), DeviceError>;

    fn add_state_change_handler(&self, handler: Handler<ConnectionStatus>);

    /// State changes are dropped while `channel` is full.
    fn add_state_change_channel(&self, channel: Sender<ConnectionStatus>);

    fn add_data_handler(&self, handler: Handler<DataPoint>);

    /// Measurements are dropped while `channel` is full.
    fn add_data_channel(&self, channel: Sender<DataPoint>);

    /// Terminates the connection to the device. Calling this more than once is harmless.
    async fn close(&self) -> Result<(), DeviceError>;
}

/// Audible signaling.
#[async_trait]
pub trait Buzzer: Send + Sync {
    /// Whether the scale beeps on user interaction, as last reported by the device.
    fn is_buzzing_on_touch(&self) -> bool;

    async fn toggle_buzzing_on_touch(&self) -> Result<(), DeviceError>;

    /// Beeps `n` times, leaving the buzz-on-touch setting as it was.
    async fn buzz(&self, n: i32) -> Result<(), DeviceError>;
}

/// Timer / stopwatch.
#[async_trait]
pub trait Timer: Send + Sync {
    async fn start_timer(&self) -> Result<(), DeviceError>;

    async fn stop_timer(&self) -> Result<(), DeviceError>;

    async fn reset_timer(&self) -> Result<(), DeviceError>;

    fn elapsed_time(&self) -> Duration;
}

/// A scale with all capabilities.
pub trait Scale: Basic + Buzzer + Timer {}

impl<T: Basic + Buzzer + Timer + ?Sized> Scale for T {}
