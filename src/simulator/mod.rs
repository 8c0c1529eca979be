//! Stand-in for the phone: connects to a viewer, streams synthetic frames
//! and distance samples, and logs the commands that come back.

use anyhow::{Context, Result};
use bytes::Bytes;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::error::LinkError;
use crate::protocol::{
    decode_tag, DistanceMessage, FrameMessage, Intrinsics, OutboundCommand, MSG_DISTANCE,
    MSG_DISTANCE_SCALAR,
};
use crate::screen::synthetic::{jpeg_encode, test_pattern};
use crate::server::reader::{read_exact, read_word};

/// Every this many frames a scalar (Type 5) sample replaces the full one.
const SCALAR_EVERY: u64 = 5;

#[derive(Debug, Clone)]
pub struct SimulatorOptions {
    pub addr: String,
    pub fps: u32,
    pub width: u32,
    pub height: u32,
    pub frames: Option<u64>,
    pub vector_distance_type: Option<i32>,
}

/// Pinhole intrinsics for a ~65° horizontal field of view.
pub fn intrinsics_for(width: u32, height: u32) -> Intrinsics {
    let focal = width as f32 * 0.78;
    Intrinsics {
        fx: focal,
        fy: focal,
        cx: width as f32 / 2.0,
        cy: height as f32 / 2.0,
    }
}

/// Distance sample for frame `seq`: a slow sweep between 0.5 m and 2.5 m.
pub fn distance_for(seq: u64) -> DistanceMessage {
    let phase = (seq % 200) as f32 / 200.0 * std::f32::consts::TAU;
    let distance = 1.5 + phase.sin();
    DistanceMessage::Full {
        distance,
        dx: 0.05 * phase.cos(),
        dy: 0.0,
        dz: distance,
    }
}

/// Read framed commands until the viewer hangs up.
pub async fn read_commands<R>(mut reader: R, commands: mpsc::UnboundedSender<OutboundCommand>) -> LinkError
where
    R: AsyncRead + Unpin,
{
    loop {
        let result = async {
            let msg_type = decode_tag(read_word(&mut reader).await?);
            let expected = OutboundCommand::body_len(msg_type)?;
            let declared = decode_tag(read_word(&mut reader).await?);
            let body = read_exact(&mut reader, expected).await?;
            OutboundCommand::decode(msg_type, declared, &body)
        }
        .await;

        match result {
            Ok(command) => {
                if commands.send(command).is_err() {
                    return LinkError::ConnectionClosed;
                }
            }
            Err(e) => return e,
        }
    }
}

pub async fn run(options: SimulatorOptions) -> Result<()> {
    anyhow::ensure!(options.fps > 0, "fps must be positive");
    anyhow::ensure!(
        options.width > 0 && options.height > 0,
        "frame size must be positive"
    );

    let stream = TcpStream::connect(&options.addr)
        .await
        .with_context(|| format!("Failed to connect to viewer at {}", options.addr))?;
    stream.set_nodelay(true)?;
    info!(addr = %options.addr, width = options.width, height = options.height, fps = options.fps, "simulated device connected");

    let (read_half, mut write_half) = stream.into_split();
    let (command_tx, mut command_rx) = mpsc::unbounded_channel();
    let command_task = tokio::spawn(async move {
        let reason = read_commands(read_half, command_tx).await;
        match reason {
            LinkError::ConnectionClosed => info!("viewer closed the connection"),
            other => warn!(error = %other, "stopped reading commands"),
        }
    });

    let frame_interval = Duration::from_millis(1000 / options.fps as u64);
    let intrinsics = intrinsics_for(options.width, options.height);
    let mut seq: u64 = 0;

    loop {
        if options.frames.is_some_and(|limit| seq >= limit) {
            break;
        }
        let frame_start = Instant::now();

        let rgb = test_pattern(options.width, options.height, seq);
        let jpeg = jpeg_encode(&rgb, options.width, options.height)?;
        let frame = FrameMessage {
            intrinsics,
            width: options.width as i32,
            height: options.height as i32,
            image: Bytes::from(jpeg),
        };
        write_half
            .write_all(&frame.encode())
            .await
            .context("viewer went away")?;

        let sample = distance_for(seq);
        let wire = if seq % SCALAR_EVERY == SCALAR_EVERY - 1 {
            DistanceMessage::Scalar {
                distance: sample.distance(),
            }
            .encode_tagged(MSG_DISTANCE_SCALAR)
        } else {
            sample.encode_tagged(MSG_DISTANCE)
        };
        write_half.write_all(&wire).await.context("viewer went away")?;

        if let Some(tag) = options.vector_distance_type {
            let vector = DistanceMessage::Vector {
                x: 0.0,
                y: 0.0,
                z: sample.distance(),
            };
            write_half
                .write_all(&vector.encode_tagged(tag))
                .await
                .context("viewer went away")?;
        }

        while let Ok(command) = command_rx.try_recv() {
            log_command(&command, options.width, options.height);
        }

        seq += 1;
        let elapsed = frame_start.elapsed();
        if elapsed < frame_interval {
            tokio::time::sleep(frame_interval - elapsed).await;
        }
    }

    info!(frames = seq, "simulation finished");
    let _ = write_half.shutdown().await;
    command_task.abort();
    Ok(())
}

fn log_command(command: &OutboundCommand, width: u32, height: u32) {
    match *command {
        OutboundCommand::Point { x, y } => info!(x, y, "tap at sensor pixel"),
        OutboundCommand::PointPair { x1, y1, x2, y2 } => {
            let (w, h) = (width as f32, height as f32);
            let span = ((x2 - x1) * w).hypot((y2 - y1) * h);
            info!(x1, y1, x2, y2, span_px = span, "measure between points");
        }
        OutboundCommand::LegacyText { x, y } => info!(x, y, "legacy tap"),
    }
}
