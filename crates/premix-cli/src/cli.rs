use std::path::PathBuf;

use clap::{Args as ClapArgs, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "premix", version)]
pub struct Args {
    #[command(subcommand)]
    pub cmd: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List sound-card outputs and registered sink devices
    ListDevices,

    /// Render a test tone through a sink device
    Render(RenderArgs),

    /// Decode a rendered WAV/FLAC file and print what it contains
    Inspect {
        /// Path to a rendered file
        path: PathBuf,
    },
}

/// Render options. Unset flags fall back to the config file, then to defaults.
#[derive(ClapArgs, Debug, Default, Clone)]
pub struct RenderArgs {
    /// Optional TOML config file
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Registered sink device (cpal, cpal-queue, file)
    #[arg(long)]
    pub device: Option<String>,

    /// Output path for the file device (.wav or .flac)
    #[arg(long)]
    pub out: Option<PathBuf>,

    /// Sound-card selector by substring match
    #[arg(long)]
    pub hardware: Option<String>,

    #[arg(long)]
    pub channels: Option<u16>,

    /// Sample rate in Hz
    #[arg(long)]
    pub rate: Option<u32>,

    /// Bits per sample (8, 16, 24, 32)
    #[arg(long)]
    pub bits: Option<u16>,

    /// Length of the rendered tone
    #[arg(long)]
    pub seconds: Option<f32>,

    /// Tone frequency in Hz
    #[arg(long)]
    pub freq: Option<f32>,

    /// Premix buffers ("rows") produced per second
    #[arg(long)]
    pub rows_per_second: Option<u32>,

    /// Engine poll interval in microseconds
    #[arg(long)]
    pub poll_us: Option<u64>,

    /// Buffers written ahead of playback before the producer blocks
    #[arg(long)]
    pub pending_depth: Option<usize>,

    /// Print the final sink status as JSON
    #[arg(long)]
    pub stats_json: bool,
}
