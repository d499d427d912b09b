use std::sync::Arc;
use futures::StreamExt;
use futures::stream::BoxStream;
use log::{debug, info, warn};
use tokio_util::sync::CancellationToken;
use tokio::time::{sleep, Duration};

use crate::device::constants::{make_data_characteristic_uuid, make_data_service_uuid, MTU};
use crate::device::transport::{Link, PeripheralInfo, Transport, TransportEvent};
use crate::device::types::{ConnectionStatus, DeviceState};
use crate::error::DeviceError;
use crate::scale::felicita::Session;

enum ConnectionState {
    /// Waiting for the adapter to power on.
    Idle,
    Scanning,
    Connecting {
        peripheral: PeripheralInfo,
    },
    Connected {
        peripheral: PeripheralInfo,
        link: Arc<dyn Link>,
        notifications: BoxStream<'static, Vec<u8>>,
    },
    Disconnected {
        error: Option<Arc<DeviceError>>,
    },
    /// The adapter powered off. Published as disconnected, then waits in `Idle`.
    AdapterOff,
    Closed,
}

impl ConnectionState {
    fn name(&self) -> &'static str {
        match self {
            ConnectionState::Idle => "idle",
            ConnectionState::Scanning => "scanning",
            ConnectionState::Connecting { .. } => "connecting",
            ConnectionState::Connected { .. } => "connected",
            ConnectionState::Disconnected { .. } => "disconnected",
            ConnectionState::AdapterOff => "adapter off",
            ConnectionState::Closed => "closed",
        }
    }

    // Idle and Connecting are not visible to callers
    fn status(&self) -> Option<ConnectionStatus> {
        match self {
            ConnectionState::Scanning => Some(ConnectionStatus::new(DeviceState::Scanning, None)),
            ConnectionState::Connected { .. } => Some(ConnectionStatus::new(DeviceState::Connected, None)),
            ConnectionState::Disconnected { error } => Some(ConnectionStatus {
                state: DeviceState::Disconnected,
                error: error.clone(),
            }),
            ConnectionState::AdapterOff | ConnectionState::Closed => {
                Some(ConnectionStatus::new(DeviceState::Disconnected, None))
            },
            ConnectionState::Idle | ConnectionState::Connecting { .. } => None,
        }
    }
}

fn disconnected(error: DeviceError) -> ConnectionState {
    ConnectionState::Disconnected { error: Some(Arc::new(error)) }
}

async fn subscribe_data(link: &dyn Link) -> Result<BoxStream<'static, Vec<u8>>, DeviceError> {
    let service_uuid = make_data_service_uuid();
    let data_uuid = make_data_characteristic_uuid();

    link.negotiate_mtu(MTU).await.map_err(DeviceError::during("set MTU"))?;

    info!("Connected; Discovering services...");
    let services = link.discover_services().await.map_err(DeviceError::during("discover services"))?;

    let service = services.iter()
        .find(|service| service.uuid == service_uuid)
        .ok_or(DeviceError::MissingService)
        .map_err(DeviceError::during("discover services"))?;

    let characteristic = service.characteristics.iter()
        .find(|characteristic| characteristic.uuid == data_uuid)
        .ok_or(DeviceError::MissingCharacteristic)
        .map_err(DeviceError::during("discover characteristics"))?;

    let descriptors = link.discover_descriptors(service.uuid, characteristic.uuid).await
        .map_err(DeviceError::during("discover descriptors"))?;
    debug!("Characteristic {:?} has {} descriptors", characteristic.uuid, descriptors.len());

    info!("Subscribing to characteristic {:?} {:?}", service.uuid, characteristic.uuid);
    link.subscribe(characteristic.uuid).await.map_err(DeviceError::during("subscribe characteristic"))
}

async fn connect_peripheral(transport: &dyn Transport, peripheral: &PeripheralInfo) -> Result<(Arc<dyn Link>, BoxStream<'static, Vec<u8>>), DeviceError> {
    let link: Arc<dyn Link> = Arc::from(
        transport.connect(peripheral).await.map_err(DeviceError::during("connect"))?
    );

    match subscribe_data(link.as_ref()).await {
        Ok(notifications) => Ok((link, notifications)),
        Err(err) => {
            release_link(link.as_ref()).await;
            Err(err)
        },
    }
}

async fn release_link(link: &dyn Link) {
    if let Err(err) = link.disconnect().await {
        warn!("Failed to disconnect peripheral: {:?}", err);
    }
}

struct ConnectionMachine {
    transport: Arc<dyn Transport>,
    session: Arc<Session>,
    cancel: CancellationToken,
}

impl ConnectionMachine {
    async fn start_scanning(&self) -> ConnectionState {
        match self.transport.start_scan().await {
            Ok(()) => ConnectionState::Scanning,
            Err(err) => {
                warn!("Scanning failed {:?}", err);
                disconnected(err)
            },
        }
    }

    async fn stop_scanning(&self) {
        if let Err(err) = self.transport.stop_scan().await {
            warn!("Failed to stop scanning: {:?}", err);
        }
    }

    async fn disconnect(&self, link: &dyn Link) {
        self.session.detach().await;
        release_link(link).await;
    }

    async fn advance_state(&self, events: &mut BoxStream<'static, TransportEvent>, state: ConnectionState) -> ConnectionState {
        match state {
            ConnectionState::Idle => {
                tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => ConnectionState::Closed,
                    event = events.next() => match event {
                        Some(TransportEvent::PoweredOn) => self.start_scanning().await,
                        Some(event) => {
                            debug!("Ignoring {:?} while the adapter is off", event);
                            ConnectionState::Idle
                        },
                        None => {
                            warn!("{}", DeviceError::TransportClosed);
                            ConnectionState::Closed
                        },
                    },
                }
            },
            ConnectionState::Scanning => {
                tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => {
                        self.stop_scanning().await;
                        ConnectionState::Closed
                    },
                    event = events.next() => match event {
                        Some(TransportEvent::Discovered(peripheral)) => {
                            let identity = &self.session.config().identity;
                            // several scales may be advertising at the same time
                            if !identity.matches(peripheral.name.as_deref(), &peripheral.id) {
                                debug!("Ignoring peripheral {} {:?}", peripheral.id, peripheral.name);
                                return ConnectionState::Scanning;
                            }

                            info!("Using peripheral {} {:?}", peripheral.id, peripheral.name);
                            self.stop_scanning().await;
                            ConnectionState::Connecting { peripheral }
                        },
                        Some(TransportEvent::PoweredOff) => {
                            warn!("Adapter powered off while scanning");
                            ConnectionState::AdapterOff
                        },
                        Some(TransportEvent::ScanStopped) => {
                            warn!("Scanning stopped unexpectedly");
                            ConnectionState::Disconnected { error: None }
                        },
                        Some(_) => ConnectionState::Scanning,
                        None => {
                            warn!("{}", DeviceError::TransportClosed);
                            ConnectionState::Closed
                        },
                    },
                }
            },
            ConnectionState::Connecting { peripheral } => {
                let transport = Arc::clone(&self.transport);

                tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => ConnectionState::Closed,
                    result = connect_peripheral(transport.as_ref(), &peripheral) => match result {
                        Ok((link, notifications)) => {
                            self.session.attach(Arc::clone(&link)).await;
                            info!("Peripheral ready");
                            ConnectionState::Connected { peripheral, link, notifications }
                        },
                        Err(err) => {
                            warn!("Connecting to peripheral failed: {}", err);
                            disconnected(err)
                        },
                    },
                }
            },
            ConnectionState::Connected { peripheral, link, mut notifications } => {
                // adapter events go first, the scale notifies continuously
                tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => {
                        self.disconnect(link.as_ref()).await;
                        info!("Released peripheral {}", peripheral.id);
                        ConnectionState::Closed
                    },
                    event = events.next() => match event {
                        Some(TransportEvent::Disconnected(id)) if id == peripheral.id => {
                            warn!("Connection lost");
                            self.disconnect(link.as_ref()).await;
                            ConnectionState::Disconnected { error: None }
                        },
                        Some(TransportEvent::PoweredOff) => {
                            warn!("Adapter powered off");
                            self.disconnect(link.as_ref()).await;
                            ConnectionState::AdapterOff
                        },
                        Some(_) => ConnectionState::Connected { peripheral, link, notifications },
                        None => {
                            warn!("{}", DeviceError::TransportClosed);
                            self.disconnect(link.as_ref()).await;
                            ConnectionState::Closed
                        },
                    },
                    data = notifications.next() => match data {
                        Some(data) => {
                            self.session.receive_frame(&data).await;
                            ConnectionState::Connected { peripheral, link, notifications }
                        },
                        None => {
                            warn!("Connection lost");
                            self.disconnect(link.as_ref()).await;
                            ConnectionState::Disconnected { error: None }
                        },
                    },
                }
            },
            ConnectionState::Disconnected { .. } => {
                self.session.detach().await;
                let delay = sleep(Duration::from_millis(self.session.config().reconnect_delay_ms));
                tokio::pin!(delay);

                loop {
                    tokio::select! {
                        biased;
                        _ = self.cancel.cancelled() => return ConnectionState::Closed,
                        event = events.next() => match event {
                            Some(TransportEvent::PoweredOff) => {
                                warn!("Adapter powered off");
                                return ConnectionState::AdapterOff;
                            },
                            Some(event) => debug!("Ignoring {:?} while disconnected", event),
                            None => {
                                warn!("{}", DeviceError::TransportClosed);
                                return ConnectionState::Closed;
                            },
                        },
                        _ = &mut delay => return self.start_scanning().await,
                    }
                }
            },
            ConnectionState::AdapterOff => {
                self.session.detach().await;
                ConnectionState::Idle
            },
            ConnectionState::Closed => ConnectionState::Closed,
        }
    }
}

/// Drives the connection until `cancel` fires or the transport goes away.
///
/// The state machine heals itself: every lost or failed connection ends in `Disconnected`,
/// which goes back to scanning after the reconnect delay. A powered off adapter waits for
/// it to power on again.
pub async fn run_connection(
    transport: Arc<dyn Transport>,
    mut events: BoxStream<'static, TransportEvent>,
    session: Arc<Session>,
    cancel: CancellationToken,
) {
    let machine = ConnectionMachine { transport, session: Arc::clone(&session), cancel };
    let mut connection_state = ConnectionState::Idle;
    let mut previous_device_state: Option<DeviceState> = None;

    loop {
        connection_state = machine.advance_state(&mut events, connection_state).await;

        if let Some(status) = connection_state.status() {
            if previous_device_state != Some(status.state) || status.error.is_some() {
                debug!("Connection state is now {}", connection_state.name());
                previous_device_state = Some(status.state);
                session.set_status(status);
            }
        }

        if let ConnectionState::Closed = connection_state {
            break;
        }
    }

    info!("Connection task stopped");
}

#[cfg(test)]
pub(crate) mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use async_trait::async_trait;
    use futures::channel::mpsc::{self, UnboundedReceiver, UnboundedSender};
    use uuid::Uuid;

    use crate::config::types::ScaleConfig;
    use crate::device::codec::tests::frame;
    use crate::device::transport::{CharacteristicInfo, ServiceInfo};
    use crate::device::types::DeviceIdentity;
    use crate::scale::felicita::FelicitaScale;
    use crate::scale::traits::{Basic, Buzzer};
    use super::*;

    /// What the fake peripheral does on the next connect.
    pub(crate) enum Script {
        Ready,
        NoService,
        SubscribeFails,
    }

    #[derive(Default)]
    pub(crate) struct Log {
        pub(crate) scans: u32,
        pub(crate) stops: u32,
        pub(crate) connects: Vec<String>,
        pub(crate) writes: Vec<u8>,
        pub(crate) disconnects: u32,
    }

    pub(crate) struct FakeTransport {
        events: Mutex<Option<UnboundedReceiver<TransportEvent>>>,
        scripts: Mutex<VecDeque<Script>>,
        pub(crate) notifiers: Mutex<Vec<UnboundedSender<Vec<u8>>>>,
        pub(crate) log: Arc<Mutex<Log>>,
    }

    impl FakeTransport {
        pub(crate) fn new(scripts: Vec<Script>) -> (Arc<FakeTransport>, UnboundedSender<TransportEvent>) {
            let (tx, rx) = mpsc::unbounded();
            let transport = FakeTransport {
                events: Mutex::new(Some(rx)),
                scripts: Mutex::new(scripts.into()),
                notifiers: Mutex::new(Vec::new()),
                log: Arc::new(Mutex::new(Log::default())),
            };
            (Arc::new(transport), tx)
        }

        /// Pushes a frame through the most recent connection.
        pub(crate) fn notify(&self, data: Vec<u8>) {
            let notifiers = self.notifiers.lock().unwrap();
            notifiers.last().unwrap().unbounded_send(data).unwrap();
        }

        /// Drops the most recent link, ending its notification stream.
        pub(crate) fn drop_link(&self) {
            self.notifiers.lock().unwrap().pop();
        }
    }

    #[async_trait]
    impl Transport for FakeTransport {
        async fn events(&self) -> Result<BoxStream<'static, TransportEvent>, DeviceError> {
            let rx = self.events.lock().unwrap().take().ok_or(DeviceError::TransportClosed)?;
            Ok(rx.boxed())
        }

        async fn start_scan(&self) -> Result<(), DeviceError> {
            self.log.lock().unwrap().scans += 1;
            Ok(())
        }

        async fn stop_scan(&self) -> Result<(), DeviceError> {
            self.log.lock().unwrap().stops += 1;
            Ok(())
        }

        async fn connect(&self, peripheral: &PeripheralInfo) -> Result<Box<dyn Link>, DeviceError> {
            self.log.lock().unwrap().connects.push(peripheral.id.clone());
            let script = self.scripts.lock().unwrap().pop_front().unwrap_or(Script::Ready);
            let (tx, rx) = mpsc::unbounded();
            self.notifiers.lock().unwrap().push(tx);

            Ok(Box::new(FakeLink {
                script,
                notifications: Mutex::new(Some(rx)),
                log: Arc::clone(&self.log),
            }))
        }
    }

    struct FakeLink {
        script: Script,
        notifications: Mutex<Option<UnboundedReceiver<Vec<u8>>>>,
        log: Arc<Mutex<Log>>,
    }

    #[async_trait]
    impl Link for FakeLink {
        async fn negotiate_mtu(&self, mtu: u16) -> Result<(), DeviceError> {
            assert_eq!(mtu, 500);
            Ok(())
        }

        async fn discover_services(&self) -> Result<Vec<ServiceInfo>, DeviceError> {
            let service_uuid = match self.script {
                Script::NoService => Uuid::nil(),
                _ => make_data_service_uuid(),
            };
            Ok(vec![ServiceInfo {
                uuid: service_uuid,
                characteristics: vec![CharacteristicInfo { uuid: make_data_characteristic_uuid() }],
            }])
        }

        async fn discover_descriptors(&self, _service: Uuid, _characteristic: Uuid) -> Result<Vec<Uuid>, DeviceError> {
            Ok(vec![])
        }

        async fn subscribe(&self, characteristic: Uuid) -> Result<BoxStream<'static, Vec<u8>>, DeviceError> {
            assert_eq!(characteristic, make_data_characteristic_uuid());
            if let Script::SubscribeFails = self.script {
                return Err(DeviceError::Btle { source: btleplug::Error::NotConnected });
            }
            let rx = self.notifications.lock().unwrap().take().ok_or(DeviceError::NotReady)?;
            Ok(rx.boxed())
        }

        async fn write(&self, characteristic: Uuid, data: &[u8]) -> Result<(), DeviceError> {
            assert_eq!(characteristic, make_data_characteristic_uuid());
            self.log.lock().unwrap().writes.extend_from_slice(data);
            Ok(())
        }

        async fn disconnect(&self) -> Result<(), DeviceError> {
            self.log.lock().unwrap().disconnects += 1;
            Ok(())
        }
    }

    pub(crate) fn fast_config() -> ScaleConfig {
        let mut config = ScaleConfig::default();
        config.reconnect_delay_ms = 5;
        config.settle.interval_ms = 2;
        config.settle.retries = 200;
        config
    }

    pub(crate) fn discovered(id: &str, name: &str) -> TransportEvent {
        TransportEvent::Discovered(PeripheralInfo { id: id.to_string(), name: Some(name.to_string()) })
    }

    /// Polls `condition` for up to two seconds.
    pub(crate) async fn eventually<F: Fn() -> bool>(condition: F) {
        for _ in 0..400 {
            if condition() {
                return;
            }
            sleep(Duration::from_millis(5)).await;
        }
        panic!("condition was not met in time");
    }

    fn recorder(scale: &FelicitaScale) -> Arc<Mutex<Vec<ConnectionStatus>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let handler_seen = Arc::clone(&seen);
        scale.add_state_change_handler(Box::new(move |status| handler_seen.lock().unwrap().push(status)));
        seen
    }

    fn states(seen: &Arc<Mutex<Vec<ConnectionStatus>>>) -> Vec<DeviceState> {
        seen.lock().unwrap().iter().map(|status| status.state).collect()
    }

    #[tokio::test]
    async fn connects_to_the_matching_peripheral_only() {
        let (transport, events) = FakeTransport::new(vec![]);
        let scale = FelicitaScale::with_transport(fast_config(), transport.clone()).await.unwrap();
        let seen = recorder(&scale);

        events.unbounded_send(TransportEvent::PoweredOn).unwrap();
        events.unbounded_send(discovered("11:11", "ACAIA")).unwrap();
        events.unbounded_send(discovered("22:22", "felicita")).unwrap();

        eventually(|| scale.connection_status().state == DeviceState::Connected).await;
        assert_eq!(transport.log.lock().unwrap().connects, vec!["22:22".to_string()]);
        assert_eq!(transport.log.lock().unwrap().stops, 1);
        assert_eq!(states(&seen), vec![DeviceState::Scanning, DeviceState::Connected]);

        scale.close().await.unwrap();
    }

    #[tokio::test]
    async fn configured_id_rejects_peripherals_with_the_right_name() {
        let mut config = fast_config();
        config.identity = DeviceIdentity { name: "FELICITA".to_string(), id: Some("AA:AA".to_string()) };

        let (transport, events) = FakeTransport::new(vec![]);
        let scale = FelicitaScale::with_transport(config, transport.clone()).await.unwrap();

        events.unbounded_send(TransportEvent::PoweredOn).unwrap();
        events.unbounded_send(discovered("bb:bb", "FELICITA")).unwrap();
        events.unbounded_send(discovered("aa:aa", "FELICITA")).unwrap();

        eventually(|| scale.connection_status().state == DeviceState::Connected).await;
        assert_eq!(transport.log.lock().unwrap().connects, vec!["aa:aa".to_string()]);

        scale.close().await.unwrap();
    }

    #[tokio::test]
    async fn rescans_and_reconnects_after_link_loss() {
        let (transport, events) = FakeTransport::new(vec![]);
        let scale = FelicitaScale::with_transport(fast_config(), transport.clone()).await.unwrap();
        let seen = recorder(&scale);

        events.unbounded_send(TransportEvent::PoweredOn).unwrap();
        events.unbounded_send(discovered("22:22", "FELICITA")).unwrap();
        eventually(|| scale.connection_status().state == DeviceState::Connected).await;

        transport.drop_link();
        eventually(|| scale.connection_status().state == DeviceState::Scanning).await;
        assert_eq!(transport.log.lock().unwrap().scans, 2);
        assert!(matches!(scale.tare().await, Err(DeviceError::NotReady)));

        events.unbounded_send(discovered("22:22", "FELICITA")).unwrap();
        eventually(|| scale.connection_status().state == DeviceState::Connected).await;
        scale.tare().await.unwrap();

        assert_eq!(states(&seen), vec![
            DeviceState::Scanning,
            DeviceState::Connected,
            DeviceState::Disconnected,
            DeviceState::Scanning,
            DeviceState::Connected,
        ]);
        assert_eq!(transport.log.lock().unwrap().connects.len(), 2);

        scale.close().await.unwrap();
    }

    #[tokio::test]
    async fn transport_disconnect_event_ends_the_connection() {
        let (transport, events) = FakeTransport::new(vec![]);
        let scale = FelicitaScale::with_transport(fast_config(), transport.clone()).await.unwrap();

        events.unbounded_send(TransportEvent::PoweredOn).unwrap();
        events.unbounded_send(discovered("22:22", "FELICITA")).unwrap();
        eventually(|| scale.connection_status().state == DeviceState::Connected).await;

        events.unbounded_send(TransportEvent::Disconnected("22:22".to_string())).unwrap();
        eventually(|| scale.connection_status().state == DeviceState::Scanning).await;
        assert_eq!(transport.log.lock().unwrap().disconnects, 1);

        scale.close().await.unwrap();
    }

    #[tokio::test]
    async fn connect_failures_are_published_and_retried() {
        let (transport, events) = FakeTransport::new(vec![Script::NoService, Script::SubscribeFails]);
        let scale = FelicitaScale::with_transport(fast_config(), transport.clone()).await.unwrap();
        let seen = recorder(&scale);

        events.unbounded_send(TransportEvent::PoweredOn).unwrap();
        events.unbounded_send(discovered("22:22", "FELICITA")).unwrap();
        eventually(|| seen.lock().unwrap().len() >= 3).await;

        {
            let seen = seen.lock().unwrap();
            assert_eq!(seen[1].state, DeviceState::Disconnected);
            let error = seen[1].error.as_ref().expect("connect error is published");
            assert!(matches!(error.as_ref(), DeviceError::Connect { step: "discover services", .. }));
            assert_eq!(seen[2].state, DeviceState::Scanning);
        }

        events.unbounded_send(discovered("22:22", "FELICITA")).unwrap();
        eventually(|| seen.lock().unwrap().len() >= 5).await;
        {
            let seen = seen.lock().unwrap();
            let error = seen[3].error.as_ref().expect("subscribe error is published");
            assert!(matches!(error.as_ref(), DeviceError::Connect { step: "subscribe characteristic", .. }));
        }
        assert_eq!(transport.log.lock().unwrap().disconnects, 2);

        events.unbounded_send(discovered("22:22", "FELICITA")).unwrap();
        eventually(|| scale.connection_status().state == DeviceState::Connected).await;

        scale.close().await.unwrap();
    }

    #[tokio::test]
    async fn powered_off_adapter_waits_for_power_on() {
        let (transport, events) = FakeTransport::new(vec![]);
        let scale = FelicitaScale::with_transport(fast_config(), transport.clone()).await.unwrap();
        let seen = recorder(&scale);

        events.unbounded_send(TransportEvent::PoweredOn).unwrap();
        eventually(|| scale.connection_status().state == DeviceState::Scanning).await;
        events.unbounded_send(TransportEvent::PoweredOff).unwrap();
        eventually(|| scale.connection_status().state == DeviceState::Disconnected).await;

        // many times the reconnect delay
        sleep(Duration::from_millis(100)).await;
        assert_eq!(scale.connection_status().state, DeviceState::Disconnected);
        assert_eq!(transport.log.lock().unwrap().scans, 1);
        assert_eq!(states(&seen), vec![DeviceState::Scanning, DeviceState::Disconnected]);

        events.unbounded_send(TransportEvent::PoweredOn).unwrap();
        eventually(|| scale.connection_status().state == DeviceState::Scanning).await;
        assert_eq!(transport.log.lock().unwrap().scans, 2);

        scale.close().await.unwrap();
    }

    #[tokio::test]
    async fn powered_off_adapter_drops_the_connection() {
        let (transport, events) = FakeTransport::new(vec![]);
        let scale = FelicitaScale::with_transport(fast_config(), transport.clone()).await.unwrap();

        events.unbounded_send(TransportEvent::PoweredOn).unwrap();
        events.unbounded_send(discovered("22:22", "FELICITA")).unwrap();
        eventually(|| scale.connection_status().state == DeviceState::Connected).await;

        events.unbounded_send(TransportEvent::PoweredOff).unwrap();
        eventually(|| scale.connection_status().state == DeviceState::Disconnected).await;
        sleep(Duration::from_millis(100)).await;

        assert_eq!(scale.connection_status().state, DeviceState::Disconnected);
        assert_eq!(transport.log.lock().unwrap().disconnects, 1);
        assert_eq!(transport.log.lock().unwrap().scans, 1);
        assert!(matches!(scale.tare().await, Err(DeviceError::NotReady)));

        scale.close().await.unwrap();
    }

    #[tokio::test]
    async fn link_events_are_handled_while_frames_keep_arriving() {
        let (transport, events) = FakeTransport::new(vec![]);
        let scale = FelicitaScale::with_transport(fast_config(), transport.clone()).await.unwrap();

        events.unbounded_send(TransportEvent::PoweredOn).unwrap();
        events.unbounded_send(discovered("22:22", "FELICITA")).unwrap();
        eventually(|| scale.connection_status().state == DeviceState::Connected).await;

        let frames = Arc::new(Mutex::new(0));
        let handler_frames = Arc::clone(&frames);
        scale.add_data_handler(Box::new(move |_| *handler_frames.lock().unwrap() += 1));

        for _ in 0..200 {
            transport.notify(frame("0012345", "g ", 0x00, 150));
        }
        events.unbounded_send(TransportEvent::Disconnected("22:22".to_string())).unwrap();

        eventually(|| transport.log.lock().unwrap().disconnects == 1).await;
        assert!(*frames.lock().unwrap() < 200);
        scale.close().await.unwrap();
    }

    #[tokio::test]
    async fn close_releases_the_peripheral() {
        let (transport, events) = FakeTransport::new(vec![]);
        let scale = FelicitaScale::with_transport(fast_config(), transport.clone()).await.unwrap();

        events.unbounded_send(TransportEvent::PoweredOn).unwrap();
        events.unbounded_send(discovered("22:22", "FELICITA")).unwrap();
        eventually(|| scale.connection_status().state == DeviceState::Connected).await;

        scale.close().await.unwrap();
        assert_eq!(scale.connection_status().state, DeviceState::Disconnected);
        assert_eq!(transport.log.lock().unwrap().disconnects, 1);
        assert!(matches!(scale.toggle_buzzing_on_touch().await, Err(DeviceError::NotReady)));

        // the second close is a no-op
        scale.close().await.unwrap();
    }

    #[tokio::test]
    async fn frames_update_session_state() {
        let (transport, events) = FakeTransport::new(vec![]);
        let scale = FelicitaScale::with_transport(fast_config(), transport.clone()).await.unwrap();

        events.unbounded_send(TransportEvent::PoweredOn).unwrap();
        events.unbounded_send(discovered("22:22", "FELICITA")).unwrap();
        eventually(|| scale.connection_status().state == DeviceState::Connected).await;

        transport.notify(frame("0012345", "g ", 0x22, 150));
        eventually(|| scale.battery_level_raw() == 150).await;
        assert!(scale.is_buzzing_on_touch());

        scale.close().await.unwrap();
    }
}
