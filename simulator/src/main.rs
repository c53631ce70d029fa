mod telemetry;

use anyhow::Context;
use clap::Parser;
use rand::Rng;
use std::io::Write;
use std::time::{Duration, Instant};
use telemetry::{generate_garbage, generate_reading};
use tracing::{info, warn};

/// Emulates the sensor node: writes JSON readings to a serial device.
#[derive(Parser, Debug)]
#[command(name = "simulator")]
struct Args {
    /// Serial device to write to, or `-` for stdout
    #[arg(long, env = "SIM_PORT")]
    port: String,

    /// Serial baud rate
    #[arg(long, env = "BAUD", default_value_t = 115200)]
    baud: u32,

    /// Readings per second
    #[arg(long, env = "RATE", default_value_t = 1.0)]
    rate: f64,

    /// Device id placed in every reading
    #[arg(long, env = "DEVICE_ID", default_value = "esp32_1")]
    device_id: String,

    /// Fraction of lines replaced with noise
    #[arg(long, env = "GARBAGE_RATIO", default_value_t = 0.0)]
    garbage_ratio: f64,

    /// Stop after this many lines
    #[arg(long)]
    count: Option<u64>,
}

fn open_output(args: &Args) -> anyhow::Result<Box<dyn Write>> {
    if args.port == "-" {
        return Ok(Box::new(std::io::stdout()));
    }

    let port = serialport::new(&args.port, args.baud)
        .timeout(Duration::from_secs(1))
        .open()
        .with_context(|| format!("Failed to open serial port {}", args.port))?;
    Ok(Box::new(port))
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Logs go to stderr so `--port -` output stays clean
    tracing_subscriber::fmt().with_writer(std::io::stderr).init();

    anyhow::ensure!(args.rate > 0.0, "rate must be positive");
    anyhow::ensure!(
        (0.0..=1.0).contains(&args.garbage_ratio),
        "garbage ratio must be within [0, 1]"
    );

    info!(
        "Starting simulator on {} @ {}, {} line(s)/s, garbage ratio {}",
        args.port, args.baud, args.rate, args.garbage_ratio
    );

    let mut output = open_output(&args)?;
    let interval = Duration::from_secs_f64(1.0 / args.rate);
    let mut rng = rand::thread_rng();
    let mut sent = 0u64;

    while args.count.map_or(true, |count| sent < count) {
        let started = Instant::now();

        let line = if rng.gen_bool(args.garbage_ratio) {
            generate_garbage(&mut rng)
        } else {
            generate_reading(&mut rng, &args.device_id).to_line()?
        };

        match output.write_all(line.as_bytes()).and_then(|_| output.flush()) {
            Ok(()) => {
                sent += 1;
                if sent % 100 == 0 {
                    info!("Sent {} lines", sent);
                }
            }
            Err(e) => warn!("Failed to write line: {}", e),
        }

        let elapsed = started.elapsed();
        if elapsed < interval {
            std::thread::sleep(interval - elapsed);
        }
    }

    info!("Done, sent {} lines", sent);
    Ok(())
}
