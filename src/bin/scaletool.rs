use std::time::{Duration, Instant};
use clap::{Parser, ValueEnum};
use log::{error, info};
use tokio::time::sleep;

use felicita_scale::cli::DeviceArgs;
use felicita_scale::device::types::{DeviceState, Unit};
use felicita_scale::error::AppRunError;
use felicita_scale::init_logging;
use felicita_scale::scale::{Basic, Buzzer, FelicitaScale};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum UnitArg {
    G,
    Oz,
}

impl From<UnitArg> for Unit {
    fn from(unit: UnitArg) -> Self {
        match unit {
            UnitArg::G => Unit::Grams,
            UnitArg::Oz => Unit::Oz,
        }
    }
}

/// Connects to a FELICITA scale, applies the requested changes and disconnects.
#[derive(Debug, Parser)]
#[command(version)]
struct Args {
    #[command(flatten)]
    device: DeviceArgs,

    /// Toggle the weight precision
    #[arg(short = 'p', long)]
    toggle_precision: bool,

    /// Toggle buzz-on-touch
    #[arg(short = 'b', long)]
    toggle_buzzer: bool,

    /// Tare the scale
    #[arg(long)]
    tare: bool,

    /// Switch the display unit
    #[arg(long, value_enum)]
    unit: Option<UnitArg>,

    /// Beep this many times
    #[arg(long)]
    buzz: Option<i32>,

    /// Give up if the scale is not connected after this many seconds
    #[arg(long, default_value_t = 30)]
    timeout: u64,
}

async fn wait_until_connected(scale: &FelicitaScale, timeout: Duration) -> Result<(), AppRunError> {
    let started = Instant::now();

    loop {
        let status = scale.connection_status();
        if status.state == DeviceState::Connected {
            return Ok(());
        }

        if started.elapsed() >= timeout {
            return Err(AppRunError::ConnectTimeout(timeout));
        }

        info!("Waiting for scale: {}", status);
        sleep(Duration::from_secs(1)).await;
    }
}

async fn apply(scale: &FelicitaScale, args: &Args) -> Result<(), AppRunError> {
    wait_until_connected(scale, Duration::from_secs(args.timeout)).await?;

    if args.toggle_precision {
        info!("Toggling precision");
        scale.toggle_precision().await?;
    }

    if args.toggle_buzzer {
        info!("Toggling buzz-on-touch");
        scale.toggle_buzzing_on_touch().await?;
    }

    if args.tare {
        info!("Taring");
        scale.tare().await?;
    }

    if let Some(unit) = args.unit {
        let unit = Unit::from(unit);
        info!("Switching unit to {}", unit);
        scale.set_unit(unit).await?;
    }

    if let Some(n) = args.buzz {
        info!("Buzzing {} time(s)", n);
        scale.buzz(n).await?;
    }

    Ok(())
}

async fn run(args: Args) -> Result<(), AppRunError> {
    let config = args.device.load_config().await?;
    let scale = FelicitaScale::new(config).await?;

    let result = apply(&scale, &args).await;
    scale.close().await?;
    result
}

#[tokio::main]
async fn main() -> Result<(), AppRunError> {
    let args = Args::parse();
    init_logging(args.device.debug);

    let result = run(args).await;
    if let Err(err) = &result {
        error!("{}", err);
    }
    result
}
