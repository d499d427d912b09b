use std::net::SocketAddr;
use std::sync::Arc;
use clap::Parser;
use futures::channel::mpsc::channel;
use futures::StreamExt;
use log::{error, info, warn};
use tokio::spawn;
use tokio_util::sync::CancellationToken;

use felicita_scale::api;
use felicita_scale::cli::{shutdown_signal, DeviceArgs};
use felicita_scale::error::AppRunError;
use felicita_scale::init_logging;
use felicita_scale::scale::{Basic, Buzzer, FelicitaScale, Timer};

/// Logs every measurement and connection change of a FELICITA scale until interrupted.
#[derive(Debug, Parser)]
#[command(version)]
struct Args {
    #[command(flatten)]
    device: DeviceArgs,

    /// Serve POST /toggle_buzzer on this address
    #[arg(long)]
    listen: Option<SocketAddr>,

    /// Print measurements to stdout as JSON lines
    #[arg(long)]
    json: bool,
}

async fn run(args: Args) -> Result<(), AppRunError> {
    let config = args.device.load_config().await?;
    let scale = Arc::new(FelicitaScale::new(config).await?);

    let weak_scale = Arc::downgrade(&scale);
    let json = args.json;
    scale.add_data_handler(Box::new(move |data| {
        let Some(scale) = weak_scale.upgrade() else { return };

        if json {
            match serde_json::to_string(&data) {
                Ok(line) => println!("{}", line),
                Err(err) => warn!("Failed to encode measurement: {}", err),
            }
            return;
        }

        info!(
            "{} {} | {} | battery {:.0}% | buzzer {} | timer {}",
            data.value(),
            data.unit,
            scale.connection_status(),
            scale.battery_level() * 100.0,
            if scale.is_buzzing_on_touch() { "on" } else { "off" },
            humantime::format_duration(scale.elapsed_time()),
        );
    }));

    let (state_sender, mut state_receiver) = channel(16);
    scale.add_state_change_channel(state_sender);
    let state_task = spawn(async move {
        while let Some(status) = state_receiver.next().await {
            info!("Connection status: {}", status);
        }
    });

    let http_cancel = CancellationToken::new();
    let http_task = match args.listen {
        Some(addr) => {
            let shutdown = http_cancel.clone();
            let (_, server) = api::bind(scale.clone(), addr, async move { shutdown.cancelled().await })?;
            Some(spawn(server))
        },
        None => None,
    };

    shutdown_signal().await?;
    info!("Shutting down");

    http_cancel.cancel();
    if let Some(http_task) = http_task {
        if let Err(err) = http_task.await {
            warn!("HTTP task failed: {}", err);
        }
    }

    scale.close().await?;

    // the session still holds the channel sender, dropping the scale ends the consumer
    drop(scale);
    if let Err(err) = state_task.await {
        warn!("State consumer failed: {}", err);
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), AppRunError> {
    let args = Args::parse();
    init_logging(args.device.debug);
    info!(concat!("felicita-scale logger ", env!("CARGO_PKG_VERSION")));

    let result = run(args).await;
    if let Err(err) = &result {
        error!("{}", err);
    }
    result
}
