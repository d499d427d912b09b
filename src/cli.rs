use std::io;
use std::path::PathBuf;
use clap::Args;

use crate::config::io::load;
use crate::config::types::ScaleConfig;
use crate::device::types::BuzzerSetting;
use crate::error::ConfigError;

/// Options shared by the command line front ends.
#[derive(Debug, Args)]
pub struct DeviceArgs {
    /// Name of remote peripheral [default: FELICITA]
    #[arg(long)]
    pub name: Option<String>,

    /// Address of remote peripheral (MAC on Linux, UUID on macOS)
    #[arg(long)]
    pub addr: Option<String>,

    /// JSON config file [default: $FELICITA_SCALE_CONFIG, then the user config directory]
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Enforce the buzz-on-touch setting whenever the scale connects
    #[arg(long, value_enum)]
    pub force_buzzer: Option<BuzzerSetting>,

    /// Log debug messages
    #[arg(long)]
    pub debug: bool,
}

impl DeviceArgs {
    /// The config file (or defaults) with the command line overrides applied.
    pub async fn load_config(&self) -> Result<ScaleConfig, ConfigError> {
        let config = load(self.config.clone()).await?;

        Ok(config
            .with_device_name(self.name.clone())
            .with_device_id(self.addr.clone())
            .with_force_buzzer(self.force_buzzer))
    }
}

/// Resolves on SIGINT, or SIGTERM where available.
pub async fn shutdown_signal() -> Result<(), io::Error> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut terminate = signal(SignalKind::terminate())?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => result,
            _ = terminate.recv() => Ok(()),
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await
    }
}
