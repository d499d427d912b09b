use std::any::Any;
use std::io;
use std::str::Utf8Error;
use std::time::Duration;
use thiserror::Error;
use btleplug;
use serde_json;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to determine path to config file")]
    NoConfigPath,

    #[error("Failed to encode/decode config as utf-8: {source}")]
    Utf8Error { #[from] source: Utf8Error },

    #[error("Failed to read/write config file: {source}")]
    IOError { #[from] source: io::Error },

    #[error("Failed to parse/build config file: {source}")]
    JsonError { #[from] source: serde_json::Error },
}

impl ConfigError {
    pub fn is_file_not_found_error(&self) -> bool {
        match self {
            ConfigError::IOError { source } => source.kind() == io::ErrorKind::NotFound,
            _ => false,
        }
    }
}

#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("Error communicating with device (btleplug): {source}")]
    Btle { #[from] source: btleplug::Error },

    #[error("No bluetooth adapter available")]
    NoAdapter,

    #[error("Failed to {step}: {source}")]
    Connect { step: &'static str, #[source] source: Box<DeviceError> },

    #[error("The scale data service is not available")]
    MissingService,

    #[error("A required bluetooth characteristic is not available")]
    MissingCharacteristic,

    #[error("Failed to write to uninitialized device")]
    NotReady,

    #[error("Writing to the data characteristic took longer than {0:?}")]
    WriteTimeout(Duration),

    #[error("Target buzzer state {target} was not reached within {budget:?}")]
    SettleTimeout { target: bool, budget: Duration },

    #[error("Invalid number of beeps requested: {0}")]
    InvalidBuzzCount(i32),

    #[error("The bluetooth transport stopped delivering events")]
    TransportClosed,
}

impl DeviceError {
    /// Wraps an error raised during one step of the connect sequence.
    pub fn during(step: &'static str) -> impl FnOnce(DeviceError) -> DeviceError {
        move |source| DeviceError::Connect { step, source: Box::new(source) }
    }
}

/// Frame decoding failures. These never leave the session: bad frames are dropped.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Frame has {0} bytes, expected 18")]
    Length(usize),

    #[error("Weight field {0:?} is not numeric")]
    Weight(String),
}

#[derive(Error, Debug)]
pub enum AppRunError {
    #[error("Failed to start scale session: {source}")]
    Device { #[from] source: DeviceError },

    #[error("Failed to start application (config): {source}")]
    ConfigError { #[from] source: ConfigError },

    #[error("Failed to start HTTP surface: {source}")]
    Http { #[from] source: warp::Error },

    #[error("Failed to install signal handler: {source}")]
    Signal { #[from] source: io::Error },

    #[error("Scale did not connect within {0:?}")]
    ConnectTimeout(Duration),
}

pub fn readable_thread_panic_error(error: &Box<dyn Any + Send + 'static>) -> String {
    let mut stringified = String::from("???");

    if let Some(s) = error.downcast_ref::<&str>() {
        stringified = format!("{}", s);
    }
    else if let Some(s) = error.downcast_ref::<String>() {
        stringified = format!("{}", s);
    }

    format!("panic from task: [{}]", stringified)
}
