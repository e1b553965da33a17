// Commandline argument parser using clap for AmbiTrack

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser, Clone)]
#[clap(version, about)]
pub struct TrackArgs {
    /// RON file with tracking configuration; defaults are used without it
    #[arg(short = 'c', long = "config", global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand, long_about)]
    /// Which task to perform
    pub command: CommandTask,
}

#[derive(Debug, Subcommand, Clone)]
pub enum CommandTask {
    /// Run the estimator on a synthetic head tracker and report what it publishes
    #[command(about)]
    Simulate(SimulateCommand),

    /// Feed recorded or live tracker lines to the estimator
    #[command(about)]
    Replay(ReplayCommand),

    /// Render a head-tracked FOA file through the sound field rotator
    #[command(about)]
    Render(RenderCommand),

    /// List the serial devices a tracker could be read from
    #[command(about)]
    Devices,

    /// Print the effective configuration as RON
    #[command(about)]
    DumpConfig,
}

#[derive(Debug, Args, Clone)]
pub struct SimulateCommand {
    /// How long to run, in seconds
    #[arg(short, long, default_value_t = 5.0)]
    pub seconds: f64,
}

#[derive(Debug, Args, Clone)]
pub struct ReplayCommand {
    /// File of protocol lines, or - for standard input
    #[arg(short, long, default_value = "-", conflicts_with = "device")]
    pub input: String,

    /// Serial device delivering protocol lines
    #[arg(short, long)]
    pub device: Option<String>,

    /// Baud rate of the serial device
    #[arg(short, long, default_value_t = 115200)]
    pub baud: u32,

    /// Play frames back at the pace they were recorded
    #[arg(short, long)]
    pub realtime: bool,
}

#[derive(Debug, Args, Clone)]
pub struct RenderCommand {
    /// Filename for the rotated FOA audio to be written to
    #[arg(short = 'o', long = "out")]
    pub outfile: PathBuf,

    /// FOA file to rotate; a test tone straight ahead is used without it
    #[arg(short = 'i', long = "input")]
    pub infile: Option<PathBuf>,

    /// Length of the test tone, in seconds
    #[arg(short, long, default_value_t = 4.0)]
    pub seconds: f32,
}
