//! `premix`: drive the premix output sink from the command line.
//!
//! - `list-devices`: registered sink devices and sound-card outputs.
//! - `render`: stream a sine tone, one premix buffer per row, through a sink
//!   device and log each row as it starts playing.
//! - `inspect`: decode a rendered WAV/FLAC file.

mod cli;
mod config;
mod runtime;

use anyhow::Result;
use clap::Parser;
use premix_sink::{CancelToken, DeviceRegistry};
use tracing_subscriber::EnvFilter;

use crate::config::{FileConfig, RenderConfig};

fn main() -> Result<()> {
    let args = cli::Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,premix=info")),
        )
        .init();

    let registry = DeviceRegistry::with_defaults();
    match args.cmd {
        cli::Command::ListDevices => runtime::list_devices(&registry)?,
        cli::Command::Inspect { path } => runtime::inspect(&path)?,
        cli::Command::Render(render) => {
            let file = match render.config.as_deref() {
                Some(path) => FileConfig::load(path)?,
                None => FileConfig::default(),
            };
            let cfg = RenderConfig::resolve(&render, file)?;
            let stats_json = cfg.stats_json;

            let cancel = CancelToken::new();
            let cancel_for_signal = cancel.clone();
            if let Err(e) = ctrlc::set_handler(move || {
                tracing::info!("interrupt received; cancelling");
                cancel_for_signal.cancel();
            }) {
                tracing::warn!("ctrl-c handler not installed: {e}");
            }

            let report = runtime::render(&registry, cfg, &cancel)?;
            if stats_json {
                runtime::print_status_json(&report.status)?;
            }
        }
    }
    Ok(())
}
