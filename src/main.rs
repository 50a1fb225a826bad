use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod cli;

#[derive(Parser)]
#[command(name = "ptzcam-recorder")]
#[command(about = "Record a PTZ webcam with hardware encoding when available")]
#[command(version)]
struct Cli {
    /// Configuration file (default: <config dir>/ptzcam-recorder/config.json)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show which hardware encoders are available
    Encoders,

    /// List video capture nodes and audio sources
    Devices,

    /// Record until Ctrl-C or for a fixed duration
    Record {
        /// Stop after this many seconds
        #[arg(short, long)]
        seconds: Option<u64>,

        #[arg(long, default_value = "3840")]
        width: u32,

        #[arg(long, default_value = "2160")]
        height: u32,

        #[arg(long, default_value = "30")]
        fps: u32,

        /// Skip hardware capture
        #[arg(long)]
        software: bool,

        /// Video device node (default: looked up by the configured name hint)
        #[arg(short, long)]
        device: Option<String>,

        /// Audio source name (default: looked up by the configured name hint)
        #[arg(short, long)]
        audio: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    ptzcam_recorder::init_tracing();

    let cli = Cli::parse();
    let config = cli::load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Encoders => cli::show_encoders(config).await,
        Commands::Devices => cli::list_devices(config).await,
        Commands::Record {
            seconds,
            width,
            height,
            fps,
            software,
            device,
            audio,
        } => {
            let options = ptzcam_recorder::RecordingOptions {
                width,
                height,
                fps,
                prefer_hardware: !software,
                device_path: device,
                audio_device: audio,
            };
            cli::record(config, options, seconds).await
        }
    }
}
