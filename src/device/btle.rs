use async_trait::async_trait;
use btleplug::api::{Central, CentralEvent, CentralState, Characteristic, Manager as _, Peripheral as _, ScanFilter, WriteType};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::stream::{self, BoxStream, StreamExt};
use log::{debug, info, warn};
use uuid::Uuid;

use crate::device::transport::{CharacteristicInfo, Link, PeripheralInfo, ServiceInfo, Transport, TransportEvent};
use crate::error::DeviceError;

/// `Transport` on top of the first adapter btleplug reports.
pub struct BtleTransport {
    adapter: Adapter,
}

impl BtleTransport {
    pub async fn new() -> Result<Self, DeviceError> {
        let manager = Manager::new().await?;
        let adapter = manager.adapters().await?
            .into_iter()
            .next()
            .ok_or(DeviceError::NoAdapter)?;

        info!("Using adapter {}", adapter.adapter_info().await.unwrap_or("UNKNOWN".to_string()));
        Ok(BtleTransport { adapter })
    }

    async fn find_peripheral(&self, id: &str) -> Result<Option<Peripheral>, DeviceError> {
        let peripherals = self.adapter.peripherals().await?;
        Ok(peripherals.into_iter().find(|p| p.id().to_string() == id))
    }
}

async fn describe(adapter: &Adapter, event: CentralEvent) -> Option<TransportEvent> {
    match event {
        CentralEvent::StateUpdate(CentralState::PoweredOn) => Some(TransportEvent::PoweredOn),
        CentralEvent::StateUpdate(CentralState::PoweredOff) => Some(TransportEvent::PoweredOff),
        CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => {
            let peripheral = adapter.peripheral(&id).await.ok()?;
            let name = match peripheral.properties().await {
                Ok(properties) => properties.and_then(|p| p.local_name),
                Err(err) => {
                    warn!("Could not query peripheral for properties: {:?}", err);
                    None
                },
            };
            Some(TransportEvent::Discovered(PeripheralInfo { id: id.to_string(), name }))
        },
        CentralEvent::DeviceDisconnected(id) => Some(TransportEvent::Disconnected(id.to_string())),
        _ => None,
    }
}

#[async_trait]
impl Transport for BtleTransport {
    async fn events(&self) -> Result<BoxStream<'static, TransportEvent>, DeviceError> {
        let events = self.adapter.events().await?;

        // State updates only report changes, so report an adapter that is already on
        let initial = match self.adapter.adapter_state().await {
            Ok(CentralState::PoweredOn) => vec![TransportEvent::PoweredOn],
            Ok(state) => {
                info!("Adapter is {:?}, waiting for it to power on", state);
                vec![]
            },
            Err(err) => {
                warn!("Failed to query adapter state, assuming it is powered on: {:?}", err);
                vec![TransportEvent::PoweredOn]
            },
        };

        let adapter = self.adapter.clone();
        let events = events.filter_map(move |event| {
            let adapter = adapter.clone();
            async move { describe(&adapter, event).await }
        });

        Ok(stream::iter(initial).chain(events).boxed())
    }

    async fn start_scan(&self) -> Result<(), DeviceError> {
        info!("Scanning...");
        self.adapter.start_scan(ScanFilter::default()).await?;
        Ok(())
    }

    async fn stop_scan(&self) -> Result<(), DeviceError> {
        self.adapter.stop_scan().await?;
        Ok(())
    }

    async fn connect(&self, peripheral: &PeripheralInfo) -> Result<Box<dyn Link>, DeviceError> {
        let found = self.find_peripheral(&peripheral.id).await?
            .ok_or(DeviceError::Btle { source: btleplug::Error::DeviceNotFound })?;

        info!("Connecting to peripheral {}...", peripheral.id);
        found.connect().await?;
        Ok(Box::new(BtleLink { peripheral: found }))
    }
}

pub struct BtleLink {
    peripheral: Peripheral,
}

impl BtleLink {
    fn characteristic(&self, uuid: Uuid) -> Result<Characteristic, DeviceError> {
        self.peripheral.characteristics()
            .into_iter()
            .find(|c| c.uuid == uuid)
            .ok_or(DeviceError::MissingCharacteristic)
    }
}

#[async_trait]
impl Link for BtleLink {
    async fn negotiate_mtu(&self, mtu: u16) -> Result<(), DeviceError> {
        // btleplug leaves the MTU exchange to the platform stack
        debug!("Requested MTU {} is negotiated by the platform", mtu);
        Ok(())
    }

    async fn discover_services(&self) -> Result<Vec<ServiceInfo>, DeviceError> {
        self.peripheral.discover_services().await?;

        Ok(self.peripheral.services()
            .into_iter()
            .map(|service| ServiceInfo {
                uuid: service.uuid,
                characteristics: service.characteristics
                    .iter()
                    .map(|c| CharacteristicInfo { uuid: c.uuid })
                    .collect(),
            })
            .collect())
    }

    async fn discover_descriptors(&self, service: Uuid, characteristic: Uuid) -> Result<Vec<Uuid>, DeviceError> {
        // descriptors are discovered together with the services
        let characteristic = self.characteristic(characteristic)?;
        if characteristic.service_uuid != service {
            return Err(DeviceError::MissingCharacteristic);
        }

        Ok(characteristic.descriptors.iter().map(|d| d.uuid).collect())
    }

    async fn subscribe(&self, characteristic: Uuid) -> Result<BoxStream<'static, Vec<u8>>, DeviceError> {
        let data_char = self.characteristic(characteristic)?;
        self.peripheral.subscribe(&data_char).await?;

        let notifications = self.peripheral.notifications().await?;
        Ok(notifications
            .filter_map(move |data| async move {
                if data.uuid == characteristic { Some(data.value) } else { None }
            })
            .boxed())
    }

    async fn write(&self, characteristic: Uuid, data: &[u8]) -> Result<(), DeviceError> {
        let data_char = self.characteristic(characteristic)?;
        self.peripheral.write(&data_char, data, WriteType::WithResponse).await?;
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), DeviceError> {
        self.peripheral.disconnect().await?;
        Ok(())
    }
}
