use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::server::ClientPolicy;
use crate::viewport::ClickMode;

#[derive(Parser)]
#[command(name = "depthgram")]
#[command(about = "📱 Phone camera + depth viewer with tap-to-measure", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Log level (error, warn, info, debug, trace). Defaults to RUST_LOG, then info
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Listen for the phone and show its stream
    Serve {
        /// JSON config file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Address to bind to
        #[arg(long)]
        host: Option<String>,

        /// Port to listen on
        #[arg(short, long)]
        port: Option<u16>,

        /// What a click sends to the device
        #[arg(short = 'm', long, value_enum)]
        click_mode: Option<ClickMode>,

        /// Receiver for legacy "x,y" taps (required with --click-mode legacy)
        #[arg(long)]
        legacy_target: Option<String>,

        /// What happens when a second phone connects
        #[arg(long, value_enum)]
        client_policy: Option<ClientPolicy>,

        /// Force a graphics protocol (sixel, kitty, iterm2, halfblocks)
        #[arg(short, long)]
        graphics: Option<String>,

        /// No terminal UI; log frames and distances instead
        #[arg(long)]
        headless: bool,

        /// Where logs go while the terminal UI is up
        #[arg(long, default_value = "depthgram.log")]
        log_file: PathBuf,
    },

    /// Send a one-shot legacy "x,y" tap
    Tap {
        /// Sensor pixel as "x,y"
        point: String,

        /// Address of the legacy receiver to signal
        #[arg(short, long)]
        addr: String,
    },

    /// Pretend to be the phone: stream synthetic frames and distances
    Simulate {
        /// Viewer address to connect to
        #[arg(short, long, default_value = "127.0.0.1:9999")]
        addr: String,

        /// Frames per second
        #[arg(long, default_value_t = crate::screen::DEFAULT_SIM_FPS)]
        fps: u32,

        /// Frame width in pixels
        #[arg(long, default_value_t = crate::screen::DEFAULT_SIM_WIDTH)]
        width: u32,

        /// Frame height in pixels
        #[arg(long, default_value_t = crate::screen::DEFAULT_SIM_HEIGHT)]
        height: u32,

        /// Stop after this many frames
        #[arg(long)]
        frames: Option<u64>,

        /// Also send vector-form distances under this message type
        #[arg(long)]
        vector_distance_type: Option<i32>,
    },
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
