//! Gate controller probe
//!
//! Opens the serial port, optionally sends one command once the controller
//! has booted, and prints every frame with its classification.
//!
//! Usage:
//!   cargo run --bin gate-probe -- --device /dev/ttyACM0 --send sensors
//!   cargo run --bin gate-probe -- --send open --duration 20

use anyhow::Context;
use clap::{Parser, ValueEnum};
use parkgate::io::protocol::{classify, Command};
use parkgate::io::serial_link::{FrameReader, LinkConnector, ReadOutcome, SerialConnector};
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ProbeCommand {
    Open,
    Close,
    Sensors,
}

impl From<ProbeCommand> for Command {
    fn from(cmd: ProbeCommand) -> Self {
        match cmd {
            ProbeCommand::Open => Command::Open,
            ProbeCommand::Close => Command::Close,
            ProbeCommand::Sensors => Command::Sensors,
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "gate-probe", about = "Gate controller link probe")]
struct Args {
    #[arg(long, default_value = "/dev/ttyACM0")]
    device: String,

    #[arg(long, default_value = "9600")]
    baud: u32,

    /// Command to send after the boot delay
    #[arg(long, value_enum)]
    send: Option<ProbeCommand>,

    /// Wait this long after opening before sending (controller resets on open)
    #[arg(long, default_value = "2000")]
    boot_delay_ms: u64,

    /// How long to listen, in seconds
    #[arg(long, default_value = "10")]
    duration: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    println!("\nGate probe");
    println!("  Device:   {} @ {} baud", args.device, args.baud);
    println!("  Send:     {:?}", args.send);
    println!("  Duration: {}s\n", args.duration);

    let connector = SerialConnector::new(&args.device, args.baud);
    let stream = connector.open().await.with_context(|| format!("Failed to open {}", args.device))?;
    let (read_half, mut write_half) = tokio::io::split(stream);
    let mut reader = FrameReader::new(read_half, Duration::from_millis(200));

    let started = Instant::now();
    let deadline = started + Duration::from_secs(args.duration);
    let send_at = started + Duration::from_millis(args.boot_delay_ms);
    let mut pending = args.send.map(Command::from);
    let mut frames = 0u64;

    while Instant::now() < deadline {
        if let Some(cmd) = pending {
            if Instant::now() >= send_at {
                write_half
                    .write_all(cmd.frame().as_bytes())
                    .await
                    .with_context(|| format!("Failed to send {cmd}"))?;
                write_half.flush().await?;
                println!("[{:>7} ms] TX {}", started.elapsed().as_millis(), cmd);
                pending = None;
            }
        }

        match reader.read_frame().await {
            ReadOutcome::Line(line) => {
                frames += 1;
                println!(
                    "[{:>7} ms] RX {:<40} -> {:?}",
                    started.elapsed().as_millis(),
                    line,
                    classify(&line)
                );
            }
            ReadOutcome::NoData => {}
            ReadOutcome::LinkError => {
                println!("[{:>7} ms] link error, stopping", started.elapsed().as_millis());
                break;
            }
        }
    }

    println!("\n{} frames in {:.1}s", frames, started.elapsed().as_secs_f64());
    Ok(())
}
