//! Command-line front-end (C10, §4.9) wiring configuration, logging, and a `Device` into the
//! `pcmflash-core` session operations.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use pcmflash_core::device::mock::MockDevice;
use pcmflash_core::{AtomicCancellationToken, Device, ExecutableRelativeFileSource, Logger, PcmSession};
use pcmflash_device_serial::SerialDevice;
use pcmflash_protocol::{CalibrationRange, PcmInfo, Response, WriteTarget};

fn format_response<T: std::fmt::Display>(r: &Response<T>) -> String {
    match r {
        Response::Success(v) => v.to_string(),
        other => other.to_string(),
    }
}

#[derive(Parser)]
#[command(name = "pcmflash-cli", about = "Reflash and query a GM-style VPW PCM")]
struct Cli {
    /// Serial device path, e.g. /dev/ttyUSB0 or COM3.
    #[arg(long, env = "PCMFLASH_PORT", default_value = "/dev/ttyUSB0")]
    port: String,

    #[arg(long, env = "PCMFLASH_BAUD", default_value_t = 115_200)]
    baud: u32,

    /// Repeatable: -v, -vv, -vvv raise log verbosity.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Use the in-memory mock device instead of a real serial port.
    #[arg(long)]
    mock: bool,

    #[arg(long, default_value_t = 0x000000)]
    image_base: u32,
    #[arg(long, default_value_t = 0x080000)]
    image_size: u32,
    #[arg(long, default_value_t = 0xFF9150)]
    kernel_base: u32,
    #[arg(long, default_value_t = 0)]
    key_algorithm: u16,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print VIN, serial number, BCC, MEC, and OS/HW/CAL identifiers.
    Info,
    /// Run the seed/key unlock exchange.
    Unlock,
    /// Negotiate 4x VPW bus speed with the PCM, if the device supports it.
    NegotiateSpeed,
    /// Upload an executable kernel payload to PCM RAM and start it.
    UploadKernel {
        path: PathBuf,
        #[arg(value_parser = parse_hex_u32)]
        address: u32,
    },
    /// Upload the read kernel and stream the flash image to a local file.
    ReadFlash { out_file: PathBuf },
    /// Upload the write kernel and stream a local image into the PCM.
    WriteFlash {
        in_file: PathBuf,
        #[arg(long, num_args = 2, value_names = ["START", "END"], value_parser = parse_hex_u32)]
        calibration: Option<Vec<u32>>,
    },
}

fn parse_hex_u32(s: &str) -> Result<u32, String> {
    let s = s.strip_prefix("0x").unwrap_or(s);
    u32::from_str_radix(s, 16).map_err(|e| e.to_string())
}

struct ProgressLogger {
    bar: ProgressBar,
}

impl ProgressLogger {
    fn new() -> Self {
        let bar = ProgressBar::new(100);
        bar.set_style(
            ProgressStyle::with_template("{msg} [{bar:40}] {pos}%")
                .unwrap_or_else(|_| ProgressStyle::default_bar()),
        );
        ProgressLogger { bar }
    }
}

impl Logger for ProgressLogger {
    fn user(&self, msg: &str) {
        match parse_trailing_percent(msg) {
            Some(percent) => {
                self.bar.set_message(msg.to_string());
                self.bar.set_position(percent as u64);
            }
            None => self.bar.println(msg),
        }
    }

    fn debug(&self, msg: &str) {
        tracing::debug!(target: "pcmflash::cli", "{msg}");
    }
}

fn parse_trailing_percent(msg: &str) -> Option<u32> {
    msg.rsplit(' ').next()?.strip_suffix('%')?.parse().ok()
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let cancellation = Arc::new(AtomicCancellationToken::new());
    let ctrlc_token = cancellation.clone();
    ctrlc::set_handler(move || ctrlc_token.cancel()).context("installing Ctrl-C handler")?;

    let mut device: Box<dyn Device> = if cli.mock {
        Box::new(MockDevice::new(76, true))
    } else {
        Box::new(SerialDevice::new(cli.port.clone(), cli.baud))
    };
    if !device.initialize().await {
        bail!("failed to initialize device at {}", cli.port);
    }

    let info = PcmInfo {
        image_base_address: cli.image_base,
        image_size: cli.image_size,
        kernel_base_address: cli.kernel_base,
        key_algorithm_id: cli.key_algorithm,
    };

    let logger = Arc::new(ProgressLogger::new());
    let file_source = Arc::new(ExecutableRelativeFileSource);
    let mut session = PcmSession::new(device, info, logger.clone(), file_source, cancellation.clone());

    let result = run_command(&mut session, cli.command).await;
    session.shutdown().await;
    result
}

async fn run_command(session: &mut PcmSession, command: Command) -> Result<()> {
    match command {
        Command::Info => {
            for (label, value) in [
                ("VIN", format_response(&session.query_vin().await)),
                ("serial", format_response(&session.query_serial().await)),
                ("BCC", format_response(&session.query_bcc().await)),
                ("MEC", format_response(&session.query_mec().await)),
                ("OS id", format_response(&session.query_os_id().await)),
                ("HW id", format_response(&session.query_hw_id().await)),
                ("CAL id", format_response(&session.query_cal_id().await)),
            ] {
                println!("{label}: {value}");
            }
            Ok(())
        }
        Command::Unlock => {
            let result = session.unlock().await;
            if !result.is_success() {
                bail!("unlock failed: {result}");
            }
            println!("unlocked");
            Ok(())
        }
        Command::NegotiateSpeed => {
            let ok = session.negotiate_high_speed().await;
            if !ok {
                bail!("PCM refused 4x speed negotiation");
            }
            println!("bus speed: {:?}", session.bus_speed());
            Ok(())
        }
        Command::UploadKernel { path, address } => {
            let bytes = tokio::fs::read(&path).await.with_context(|| format!("reading {}", path.display()))?;
            let result = session.pcm_execute(&bytes, address).await;
            if !result.is_success() {
                bail!("kernel upload failed: {result}");
            }
            println!("kernel running at {address:#08X}");
            Ok(())
        }
        Command::ReadFlash { out_file } => {
            let result = session.read_contents().await;
            let image = result.into_value().context("read_flash did not succeed")?;
            tokio::fs::write(&out_file, &image)
                .await
                .with_context(|| format!("writing {}", out_file.display()))?;
            println!("wrote {} bytes to {}", image.len(), out_file.display());
            Ok(())
        }
        Command::WriteFlash { in_file, calibration } => {
            let file = tokio::fs::File::open(&in_file)
                .await
                .with_context(|| format!("opening {}", in_file.display()))?;
            let mut reader = tokio::io::BufReader::new(file);
            let target = match calibration {
                Some(bounds) if bounds.len() == 2 => WriteTarget::Calibration(CalibrationRange {
                    start_address: bounds[0],
                    end_address: bounds[1],
                }),
                _ => WriteTarget::Full,
            };
            let kernel_path = PathBuf::from("kernels/write_kernel.bin");
            let result = session.write(target, &kernel_path, &mut reader).await;
            if !result.is_success() {
                bail!("write failed: {result}");
            }
            println!("write complete");
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_hex_addresses_with_or_without_a_0x_prefix() {
        assert_eq!(parse_hex_u32("0xFF9150"), Ok(0xFF_9150));
        assert_eq!(parse_hex_u32("ff9150"), Ok(0xFF_9150));
    }

    #[test]
    fn rejects_a_non_hex_address() {
        assert!(parse_hex_u32("not-hex").is_err());
    }

    #[test]
    fn extracts_a_trailing_percent_token() {
        assert_eq!(parse_trailing_percent("reading flash 42%"), Some(42));
        assert_eq!(parse_trailing_percent("connecting to PCM"), None);
    }

    #[test]
    fn formats_a_success_response_as_its_value_and_others_as_their_status() {
        assert_eq!(format_response(&Response::success("1G1YY22G965100001".to_string())), "1G1YY22G965100001");
        assert_eq!(format_response(&Response::<String>::timeout("no reply")), "timeout: no reply");
    }
}
