//! Standalone client binary.
//!
//! Usage:
//!   cargo run -p gravwell_client -- [--config client.json] [--url tcp://127.0.0.1:40000] [--tick-hz 30]
//!
//! The client connects to the server, predicts the local ship from stdin
//! input and logs what it would draw.
//!
//! Console commands:
//!   thrust <0..1>   - Set throttle
//!   turn <-1..1>    - Set turn rate (negative is clockwise)
//!   stop            - Release all controls
//!   status          - Log client status
//!   quit            - Exit client

use std::{
    env,
    io::{BufRead, Write},
    path::PathBuf,
};

use anyhow::{bail, Context};
use gravwell_client::{
    input::{ChannelInput, InputState},
    GameClient,
};
use gravwell_shared::{
    config::ClientConfig,
    render::{RenderFrame, RenderSink},
};
use tokio::sync::mpsc;
use tracing::info;

fn parse_args() -> anyhow::Result<ClientConfig> {
    let args: Vec<String> = env::args().collect();
    let mut config_path: Option<PathBuf> = None;
    let mut url: Option<String> = None;
    let mut tick_hz: Option<u32> = None;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--config" if i + 1 < args.len() => {
                config_path = Some(PathBuf::from(&args[i + 1]));
                i += 2;
            }
            "--url" if i + 1 < args.len() => {
                url = Some(args[i + 1].clone());
                i += 2;
            }
            "--tick-hz" if i + 1 < args.len() => {
                tick_hz = Some(args[i + 1].parse().context("--tick-hz")?);
                i += 2;
            }
            other => bail!("unrecognized argument {other:?}"),
        }
    }

    let mut cfg = match config_path {
        Some(path) => ClientConfig::from_json_file(&path)?,
        None => ClientConfig::default(),
    };
    if let Some(url) = url {
        cfg.server_url = url;
    }
    if let Some(hz) = tick_hz {
        cfg.tick_hz = hz;
    }
    Ok(cfg)
}

/// Logs a one-line summary every `every` frames.
struct TraceRenderer {
    frames: u64,
    every: u64,
}

impl RenderSink for TraceRenderer {
    fn render(&mut self, frame: &RenderFrame<'_>) {
        self.frames += 1;
        if self.frames % self.every != 0 {
            return;
        }
        let ship = frame.ship();
        let world = frame.world();
        info!(
            tick = frame.local.tick,
            x = ship.pos.x,
            y = ship.pos.y,
            energy = ship.energy,
            pallets = world.active_pallets(),
            done = world.done,
            win = world.win,
            "Frame"
        );
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cfg = parse_args()?;
    info!(server = %cfg.server_url, tick_hz = cfg.tick_hz, "Starting client");

    let render_hz = u64::from(cfg.render_hz.max(1));
    let mut client = GameClient::with_tcp(cfg);
    let stop = client.stop_handle();
    let status = client.status_requests();

    let (input_tx, input_rx) = mpsc::channel::<InputState>(32);

    // Spawn stdin reader thread.
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        let mut stdout = std::io::stdout();
        let mut held = InputState::default();
        loop {
            print!("] ");
            let _ = stdout.flush();
            let mut line = String::new();
            match stdin.lock().read_line(&mut line) {
                Ok(0) | Err(_) => break,
                Ok(_) => {}
            }
            let mut words = line.split_whitespace();
            let value = |w: Option<&str>| w.and_then(|v| v.parse::<f32>().ok());
            match words.next() {
                Some("thrust") => match value(words.next()) {
                    Some(v) => held.thrust = v.clamp(0.0, 1.0),
                    None => println!("usage: thrust <0..1>"),
                },
                Some("turn") => match value(words.next()) {
                    Some(v) => held.turn = v.clamp(-1.0, 1.0),
                    None => println!("usage: turn <-1..1>"),
                },
                Some("stop") => held = InputState::default(),
                Some("status") => {
                    status.notify_one();
                    continue;
                }
                Some("quit") | Some("exit") => break,
                Some(other) => {
                    println!("Unknown command: {other}");
                    continue;
                }
                None => continue,
            }
            if input_tx.blocking_send(held).is_err() {
                break;
            }
        }
        stop.stop();
    });

    println!("Type 'thrust 1', 'turn -0.5', 'stop', 'status' or 'quit'.");
    println!();

    let mut input = ChannelInput::new(input_rx);
    let mut renderer = TraceRenderer {
        frames: 0,
        every: render_hz * 5,
    };
    client.run(&mut input, &mut renderer).await?;

    for line in client.status_lines() {
        println!("{line}");
    }
    Ok(())
}
