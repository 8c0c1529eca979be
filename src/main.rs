mod cli;
mod config;
mod error;
mod logging;
mod protocol;
mod screen;
mod server;
mod simulator;
mod tui;
mod viewport;

use anyhow::{Context, Result};
use cli::{Cli, Commands};
use config::Config;
use protocol::OutboundCommand;
use server::sender::{send_legacy, CommandSender};
use server::{ConnectionManager, LinkEvent};
use tokio::sync::mpsc;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse_args();
    let log_level = cli.log_level.as_deref();

    match cli.command {
        Commands::Serve {
            config,
            host,
            port,
            click_mode,
            legacy_target,
            client_policy,
            graphics,
            headless,
            log_file,
        } => {
            let mut config = Config::load(config.as_deref())?;
            if let Some(host) = host {
                config.network.host = host;
            }
            if let Some(port) = port {
                config.network.port = port;
            }
            if let Some(mode) = click_mode {
                config.viewer.click_mode = mode;
            }
            if legacy_target.is_some() {
                config.network.legacy_target = legacy_target;
            }
            if let Some(policy) = client_policy {
                config.network.client_policy = policy;
            }
            if graphics.is_some() {
                config.viewer.graphics = graphics;
            }
            config.validate()?;

            // The terminal UI owns the screen, so logs go to a file
            let log_target = (!headless).then_some(log_file.as_path());
            logging::init(log_level, log_target)?;

            serve(config, headless).await?;
        }
        Commands::Tap { point, addr } => {
            logging::init(log_level, None)?;
            let command = OutboundCommand::parse_legacy(&point)?;
            send_legacy(&addr, &command)
                .await
                .with_context(|| format!("Failed to signal {}", addr))?;
            println!("✅ Sent {} to {}", point.trim(), addr);
        }
        Commands::Simulate {
            addr,
            fps,
            width,
            height,
            frames,
            vector_distance_type,
        } => {
            logging::init(log_level, None)?;
            simulator::run(simulator::SimulatorOptions {
                addr,
                fps,
                width,
                height,
                frames,
                vector_distance_type,
            })
            .await?;
        }
    }

    Ok(())
}

async fn serve(config: Config, headless: bool) -> Result<()> {
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let manager = ConnectionManager::start(
        &config.network.host,
        config.network.port,
        config.wire_options(),
        config.network.client_policy,
        event_tx,
    )
    .await
    .with_context(|| format!("Failed to listen on {}", config.listen_addr()))?;

    let sender = CommandSender::new(manager.current(), config.legacy_target());
    tokio::spawn(manager.run());

    if headless {
        return log_events(event_rx).await;
    }

    // Graphics query must happen before the terminal enters raw mode
    let picker = screen::viewer::create_picker(config.viewer.graphics.as_deref());
    let mut ui = tui::ViewerUI::new(picker, sender, config.viewer.click_mode);
    ui.run(event_rx).await
}

async fn log_events(mut events: mpsc::UnboundedReceiver<LinkEvent>) -> Result<()> {
    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else { return Ok(()) };
                match event {
                    LinkEvent::Connected { id, peer } => info!(id, %peer, "device connected"),
                    LinkEvent::Frame { id, frame } => info!(
                        id,
                        width = frame.width,
                        height = frame.height,
                        jpeg_bytes = frame.image.len(),
                        "frame"
                    ),
                    LinkEvent::Distance { id, distance } => {
                        info!(id, distance = distance.distance(), ?distance, "distance")
                    }
                    LinkEvent::Disconnected { id, reason } => info!(id, %reason, "device disconnected"),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("shutting down");
                return Ok(());
            }
        }
    }
}
