use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};
use async_trait::async_trait;
use futures::channel::mpsc::Sender;
use log::{debug, info, warn};
use tokio::spawn;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use crate::config::types::ScaleConfig;
use crate::device::btle::BtleTransport;
use crate::device::codec::{decode_frame, encode_command, Command};
use crate::device::connection::run_connection;
use crate::device::constants::make_data_characteristic_uuid;
use crate::device::settle;
use crate::device::transport::{Link, Transport};
use crate::device::types::{ConnectionStatus, DataPoint, DeviceState, Unit};
use crate::error::{readable_thread_panic_error, DeviceError};
use crate::scale::sink::{Handler, Sink, Sinks};
use crate::scale::traits::{Basic, Buzzer, Timer};
use crate::timer::Stopwatch;

const UNIT_UNKNOWN: u8 = 0;
const UNIT_GRAMS: u8 = 1;
const UNIT_OZ: u8 = 2;

fn unit_to_u8(unit: Unit) -> u8 {
    match unit {
        Unit::Unknown => UNIT_UNKNOWN,
        Unit::Grams => UNIT_GRAMS,
        Unit::Oz => UNIT_OZ,
    }
}

fn unit_from_u8(value: u8) -> Unit {
    match value {
        UNIT_GRAMS => Unit::Grams,
        UNIT_OZ => Unit::Oz,
        _ => Unit::Unknown,
    }
}

/// State shared between the connection task (the only writer of device state) and callers.
pub struct Session {
    config: ScaleConfig,
    status: Mutex<ConnectionStatus>,
    battery_raw: AtomicU8,
    buzzing_on_touch: AtomicBool,
    unit: AtomicU8,
    // cleared on every (re)connect, set by the first frame
    has_received_data: AtomicBool,
    link: RwLock<Option<Arc<dyn Link>>>,
    timer: Mutex<Stopwatch>,
    state_sinks: Sinks<ConnectionStatus>,
    data_sinks: Sinks<DataPoint>,
}

impl Session {
    fn new(config: ScaleConfig) -> Self {
        Session {
            config,
            status: Mutex::new(ConnectionStatus::new(DeviceState::Disconnected, None)),
            battery_raw: AtomicU8::new(0),
            buzzing_on_touch: AtomicBool::new(false),
            unit: AtomicU8::new(UNIT_UNKNOWN),
            has_received_data: AtomicBool::new(false),
            link: RwLock::new(None),
            timer: Mutex::new(Stopwatch::default()),
            state_sinks: Sinks::new("state change"),
            data_sinks: Sinks::new("data"),
        }
    }

    pub fn config(&self) -> &ScaleConfig {
        &self.config
    }

    pub fn set_status(&self, status: ConnectionStatus) {
        info!("Connection status: {}", status);
        *self.status.lock().expect("Failed to lock status") = status.clone();
        self.state_sinks.dispatch(status);
    }

    fn status(&self) -> ConnectionStatus {
        self.status.lock().expect("Failed to lock status").clone()
    }

    /// Makes `link` the target of all commands.
    pub async fn attach(&self, link: Arc<dyn Link>) {
        self.has_received_data.store(false, Ordering::SeqCst);
        *self.link.write().await = Some(link);
    }

    pub async fn detach(&self) {
        self.link.write().await.take();
    }

    pub async fn write(&self, command: Command) -> Result<(), DeviceError> {
        let link = self.link.read().await.clone().ok_or(DeviceError::NotReady)?;
        let deadline = Duration::from_millis(self.config.write_deadline_ms);

        debug!("Sending {:?}", command);
        match timeout(deadline, link.write(make_data_characteristic_uuid(), &encode_command(command))).await {
            Ok(result) => result,
            Err(_) => Err(DeviceError::WriteTimeout(deadline)),
        }
    }

    /// Handles one notification. Malformed frames are dropped.
    pub async fn receive_frame(&self, data: &[u8]) {
        let frame = match decode_frame(data) {
            Ok(frame) => frame,
            Err(err) => {
                debug!("Dropping frame: {}", err);
                return;
            },
        };

        self.battery_raw.store(frame.battery_raw, Ordering::SeqCst);
        self.buzzing_on_touch.store(frame.buzzer_on, Ordering::SeqCst);
        self.unit.store(unit_to_u8(frame.unit), Ordering::SeqCst);

        if !self.has_received_data.swap(true, Ordering::SeqCst) {
            self.force_buzzer_setting(frame.buzzer_on).await;
        }

        self.data_sinks.dispatch(DataPoint {
            timestamp: SystemTime::now(),
            weight: frame.weight,
            unit: frame.unit,
        });
    }

    async fn force_buzzer_setting(&self, buzzing: bool) {
        let setting = self.config.force_buzzer;
        if !setting.mismatches(buzzing) {
            return;
        }

        info!("Forcing buzzer setting to {:?}", setting);
        if let Err(err) = self.write(Command::ToggleBuzzer).await {
            warn!("Failed to force buzzer setting to {:?}: {}", setting, err);
        }
    }
}

/// A FELICITA bluetooth scale.
///
/// The connection is maintained by a background task that keeps rescanning and reconnecting
/// until `close` is called.
pub struct FelicitaScale {
    session: Arc<Session>,
    cancel: CancellationToken,
    closed: AtomicBool,
    connection_task: Mutex<Option<JoinHandle<()>>>,
}

impl FelicitaScale {
    /// Connects through the first bluetooth adapter of this machine.
    pub async fn new(config: ScaleConfig) -> Result<Self, DeviceError> {
        let transport = BtleTransport::new().await?;
        Self::with_transport(config, Arc::new(transport)).await
    }

    pub async fn with_transport(config: ScaleConfig, transport: Arc<dyn Transport>) -> Result<Self, DeviceError> {
        info!("Looking for scale {:?}", config.identity);
        let events = transport.events().await?;
        let session = Arc::new(Session::new(config));
        let cancel = CancellationToken::new();

        let connection_task = spawn(run_connection(transport, events, Arc::clone(&session), cancel.clone()));

        Ok(FelicitaScale {
            session,
            cancel,
            closed: AtomicBool::new(false),
            connection_task: Mutex::new(Some(connection_task)),
        })
    }
}

#[async_trait]
impl Basic for FelicitaScale {
    fn connection_status(&self) -> ConnectionStatus {
        self.session.status()
    }

    fn battery_level(&self) -> f64 {
        self.session.config.battery.normalize(self.battery_level_raw())
    }

    fn battery_level_raw(&self) -> u8 {
        self.session.battery_raw.load(Ordering::SeqCst)
    }

    fn unit(&self) -> Unit {
        unit_from_u8(self.session.unit.load(Ordering::SeqCst))
    }

    async fn set_unit(&self, unit: Unit) -> Result<(), DeviceError> {
        let current = self.unit();
        if current != Unit::Unknown && current == unit {
            return Ok(());
        }

        // the device only knows "toggle"
        self.session.write(Command::ToggleUnit).await
    }

    async fn tare(&self) -> Result<(), DeviceError> {
        self.session.write(Command::Tare).await
    }

    async fn toggle_precision(&self) -> Result<(), DeviceError> {
        self.session.write(Command::TogglePrecision).await
    }

    fn add_state_change_handler(&self, handler: Handler<ConnectionStatus>) {
        self.session.state_sinks.add(Sink::Handler(handler));
    }

    fn add_state_change_channel(&self, channel: Sender<ConnectionStatus>) {
        self.session.state_sinks.add(Sink::Channel(channel));
    }

    fn add_data_handler(&self, handler: Handler<DataPoint>) {
        self.session.data_sinks.add(Sink::Handler(handler));
    }

    fn add_data_channel(&self, channel: Sender<DataPoint>) {
        self.session.data_sinks.add(Sink::Channel(channel));
    }

    async fn close(&self) -> Result<(), DeviceError> {
        if self.closed.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst).is_err() {
            debug!("Scale session already closed");
            return Ok(());
        }

        info!("Closing scale session");
        self.cancel.cancel();

        let handle = self.connection_task.lock().expect("Failed to lock connection task").take();
        if let Some(handle) = handle {
            if let Err(err) = handle.await {
                if err.is_panic() {
                    warn!("Connection task failed: {}", readable_thread_panic_error(&err.into_panic()));
                }
            }
        }

        Ok(())
    }
}

#[async_trait]
impl Buzzer for FelicitaScale {
    fn is_buzzing_on_touch(&self) -> bool {
        self.session.buzzing_on_touch.load(Ordering::SeqCst)
    }

    async fn toggle_buzzing_on_touch(&self) -> Result<(), DeviceError> {
        self.session.write(Command::ToggleBuzzer).await
    }

    async fn buzz(&self, n: i32) -> Result<(), DeviceError> {
        settle::buzz(self, n, &self.session.config.settle).await
    }
}

#[async_trait]
impl Timer for FelicitaScale {
    async fn start_timer(&self) -> Result<(), DeviceError> {
        self.session.write(Command::StartTimer).await?;
        self.session.timer.lock().expect("Failed to lock timer").start();
        Ok(())
    }

    async fn stop_timer(&self) -> Result<(), DeviceError> {
        self.session.write(Command::StopTimer).await?;
        self.session.timer.lock().expect("Failed to lock timer").stop();
        Ok(())
    }

    async fn reset_timer(&self) -> Result<(), DeviceError> {
        self.session.write(Command::ResetTimer).await?;
        self.session.timer.lock().expect("Failed to lock timer").reset();
        Ok(())
    }

    fn elapsed_time(&self) -> Duration {
        self.session.timer.lock().expect("Failed to lock timer").elapsed()
    }
}

impl Drop for FelicitaScale {
    fn drop(&mut self) {
        // the connection task must not outlive the scale
        self.cancel.cancel();
    }
}
