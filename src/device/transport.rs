//! The seam between the connection state machine and the platform BLE stack.

use async_trait::async_trait;
use futures::stream::BoxStream;
use uuid::Uuid;

use crate::error::DeviceError;

/// A peripheral seen while scanning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeripheralInfo {
    pub id: String,
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    PoweredOn,
    PoweredOff,
    /// Discovery ended without being asked to.
    ScanStopped,
    Discovered(PeripheralInfo),
    /// The link to the peripheral with this id was lost.
    Disconnected(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharacteristicInfo {
    pub uuid: Uuid,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceInfo {
    pub uuid: Uuid,
    pub characteristics: Vec<CharacteristicInfo>,
}

/// A BLE central.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Adapter and discovery events. Called once per session.
    async fn events(&self) -> Result<BoxStream<'static, TransportEvent>, DeviceError>;

    async fn start_scan(&self) -> Result<(), DeviceError>;

    async fn stop_scan(&self) -> Result<(), DeviceError>;

    async fn connect(&self, peripheral: &PeripheralInfo) -> Result<Box<dyn Link>, DeviceError>;
}

/// An established connection to one peripheral.
#[async_trait]
pub trait Link: Send + Sync {
    async fn negotiate_mtu(&self, mtu: u16) -> Result<(), DeviceError>;

    async fn discover_services(&self) -> Result<Vec<ServiceInfo>, DeviceError>;

    async fn discover_descriptors(&self, service: Uuid, characteristic: Uuid) -> Result<Vec<Uuid>, DeviceError>;

    /// Notifications of `characteristic`. The stream ends when the link drops.
    async fn subscribe(&self, characteristic: Uuid) -> Result<BoxStream<'static, Vec<u8>>, DeviceError>;

    async fn write(&self, characteristic: Uuid, data: &[u8]) -> Result<(), DeviceError>;

    async fn disconnect(&self) -> Result<(), DeviceError>;
}
