use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use color_eyre::eyre::eyre;
use halshare_core::{DeviceAddress, SampleStats};
use halshare_reader::report;
use halshare_reader::{
    Choice, Clock, Config, CsvSink, FixedDevice, MemorySink, MockTransport, Reader, RecordSink,
    ScanSelector, SelectionConfig, SessionOutcome, SystemClock, Transport, TransportConfig,
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "halshare-reader")]
#[command(about = "Download stored skin temperatures from Halshare TM2101-SR sensors")]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, default_value = "halshare.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List advertising sensors, strongest signal first
    Scan {
        /// Scan duration in seconds
        #[arg(long)]
        secs: Option<u64>,
    },
    /// Download the stored log of one sensor and export it as CSV
    Fetch {
        /// Sensor address; skips scanning
        #[arg(short, long)]
        address: Option<DeviceAddress>,
        /// Take the Nth sensor of the scan listing instead of prompting
        #[arg(long, conflicts_with = "address")]
        pick: Option<usize>,
        /// Seconds to wait for the end-of-data marker
        #[arg(long)]
        timeout: Option<u64>,
        /// Wearer name written to every row
        #[arg(long)]
        wearer: Option<String>,
        /// CSV file to write
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Print the report without writing a file
        #[arg(long)]
        dry_run: bool,
    },
}

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;

    let filter = std::env::var("RUST_LOG")
        .unwrap_or_else(|_| "halshare_reader=info,halshare_core=info".to_owned());
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_span_events(tracing_subscriber::fmt::format::FmtSpan::CLOSE)
        .init();

    let cli = Cli::parse();

    let config = if cli.config.exists() {
        info!(path = ?cli.config, "Loading configuration");
        Config::load(&cli.config)?
    } else {
        info!("No configuration file found, using defaults");
        Config::default()
    };

    let cancel = CancellationToken::new();
    let cancel_on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl+C, cancelling");
            cancel_on_signal.cancel();
        }
    });

    let capacity = config.session.channel_capacity;
    match config.transport {
        TransportConfig::Mock { .. } => {
            info!("Using mock transport");
            let transport = MockTransport::from_config(&config.transport, capacity)
                .ok_or_else(|| eyre!("mock transport misconfigured"))?;
            run(cli.command, config, transport, cancel).await
        }
        TransportConfig::Ble => run_ble(cli.command, config, cancel).await,
    }
}

#[cfg(feature = "ble")]
async fn run_ble(
    command: Command,
    config: Config,
    cancel: CancellationToken,
) -> color_eyre::Result<()> {
    use halshare_reader::transport::ble::BleTransport;

    info!("Using BLE transport");
    let discovery = config.device.selection.scan_duration();
    let transport = BleTransport::new(discovery, config.session.channel_capacity).await?;
    run(command, config, transport, cancel).await
}

#[cfg(not(feature = "ble"))]
async fn run_ble(
    _command: Command,
    _config: Config,
    _cancel: CancellationToken,
) -> color_eyre::Result<()> {
    Err(eyre!(
        "built without BLE support; rebuild with `--features ble` or set [transport] type = \"mock\""
    ))
}

async fn run<T: Transport>(
    command: Command,
    config: Config,
    transport: T,
    cancel: CancellationToken,
) -> color_eyre::Result<()> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let mut reader = Reader::new(transport, &config, clock);
    let selection = &config.device.selection;

    match command {
        Command::Scan { secs } => {
            let duration = secs.map_or(selection.scan_duration(), Duration::from_secs);
            let prefix = selection.name_prefix();

            let ranked = reader.scan(duration, prefix, &cancel).await?;

            if ranked.is_empty() {
                println!("No sensors found matching '{prefix}'");
            } else {
                print!("{}", report::render_devices(&ranked));
            }
            Ok(())
        }
        Command::Fetch {
            address,
            pick,
            timeout,
            wearer,
            output,
            dry_run,
        } => {
            let device = match (address, selection) {
                (Some(address), _) => Some(address),
                (None, SelectionConfig::Fixed { address }) if pick.is_none() => {
                    let fixed = FixedDevice(address.parse()?);
                    reader.select(&fixed, &cancel).await?
                }
                (None, selection) => {
                    let selector = ScanSelector {
                        name_prefix: selection.name_prefix().to_string(),
                        scan_duration: selection.scan_duration(),
                        choice: pick.map_or(Choice::Interactive, Choice::Index),
                    };
                    reader.select(&selector, &cancel).await?
                }
            };

            let Some(device) = device else {
                println!("No sensor selected");
                return Ok(());
            };

            if let Some(secs) = timeout {
                reader = reader.with_timeout(Duration::from_secs(secs));
            }
            if let Some(wearer) = wearer {
                reader = reader.with_wearer_name(wearer);
            }

            let fetch = Fetch {
                output,
                dry_run,
                preview_rows: config.output.preview_rows,
                directory: config.output.directory.clone(),
            };
            fetch.run(&reader, &device, &cancel).await
        }
    }
}

struct Fetch {
    output: Option<PathBuf>,
    dry_run: bool,
    preview_rows: usize,
    directory: PathBuf,
}

impl Fetch {
    async fn run<T: Transport>(
        &self,
        reader: &Reader<T>,
        device: &DeviceAddress,
        cancel: &CancellationToken,
    ) -> color_eyre::Result<()> {
        let fetched = reader.read(device, cancel).await?;
        let acquisition = &fetched.acquisition;

        println!("Device: {}", fetched.device);
        print!("{}", report::render_samples(&acquisition.samples));
        if let Some(stats) = SampleStats::from_samples(&acquisition.samples) {
            print!("{}", report::render_stats(&stats));
        }

        match acquisition.outcome {
            SessionOutcome::Completed => {}
            SessionOutcome::TimedOut => {
                warn!(
                    samples = acquisition.samples.len(),
                    "End of data never arrived, samples cannot be placed in time"
                );
            }
            SessionOutcome::Failed => {
                let reason = acquisition
                    .error
                    .as_ref()
                    .map_or_else(|| "unknown error".to_string(), ToString::to_string);
                error!(error = %reason, "Acquisition failed");
                return Err(eyre!("acquisition from {} failed: {reason}", fetched.device));
            }
        }

        if let Some(e) = &fetched.timeline_error {
            return Err(eyre!("could not place samples in time: {e}"));
        }

        if fetched.records.is_empty() {
            println!("No records to export");
            return Ok(());
        }

        println!("{}", report::render_preview(&fetched.records, self.preview_rows));

        if self.dry_run {
            let sink = MemorySink::default();
            let stored = sink.store_records(&fetched.records).await?;
            info!(stored, "Dry run, nothing written");
            return Ok(());
        }

        let sink = match &self.output {
            Some(path) => CsvSink::new(path),
            None => CsvSink::timestamped(&self.directory, &SystemClock.now()),
        };
        let stored = sink.store_records(&fetched.records).await?;
        println!("Saved {stored} records to {}", sink.path().display());

        Ok(())
    }
}
