use std::io::{self, BufRead, Write};
use std::time::Duration;

use async_trait::async_trait;
use halshare_core::DeviceAddress;
use tracing::{info, warn};

use crate::report;
use crate::transport::{ConnectionError, DiscoveredDevice, Transport};

#[derive(Debug, thiserror::Error)]
pub enum SelectError {
    #[error("Scan failed: {0}")]
    Scan(#[from] ConnectionError),

    #[error("Failed to read selection: {0}")]
    Prompt(#[from] io::Error),
}

/// Decides which sensor a session connects to.
#[async_trait]
pub trait DeviceSelector: Send + Sync {
    /// Returns `None` when no sensor was chosen.
    async fn select<T: Transport>(
        &self,
        transport: &T,
    ) -> Result<Option<DeviceAddress>, SelectError>;
}

/// Always the same, preconfigured sensor.
#[derive(Debug, Clone)]
pub struct FixedDevice(pub DeviceAddress);

#[async_trait]
impl DeviceSelector for FixedDevice {
    async fn select<T: Transport>(
        &self,
        _transport: &T,
    ) -> Result<Option<DeviceAddress>, SelectError> {
        Ok(Some(self.0.clone()))
    }
}

/// Which of the ranked candidates to take.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Choice {
    /// Best signal.
    Strongest,
    /// 1-based position in the ranked list.
    Index(usize),
    /// Ask on the terminal.
    Interactive,
}

/// Scan for advertising sensors and pick one.
#[derive(Debug, Clone)]
pub struct ScanSelector {
    pub name_prefix: String,
    pub scan_duration: Duration,
    pub choice: Choice,
}

#[async_trait]
impl DeviceSelector for ScanSelector {
    async fn select<T: Transport>(
        &self,
        transport: &T,
    ) -> Result<Option<DeviceAddress>, SelectError> {
        info!(
            name_prefix = %self.name_prefix,
            scan_secs = self.scan_duration.as_secs(),
            "Scanning for sensors"
        );

        let devices = transport.scan(self.scan_duration).await?;
        let candidates = rank_devices(devices, &self.name_prefix);

        if candidates.is_empty() {
            warn!(name_prefix = %self.name_prefix, "No matching sensors found");
            return Ok(None);
        }

        info!(count = candidates.len(), "Sensors found");

        let index = match self.choice {
            Choice::Strongest => Some(0),
            Choice::Index(n) if (1..=candidates.len()).contains(&n) => Some(n - 1),
            Choice::Index(n) => {
                warn!(choice = n, count = candidates.len(), "Selection out of range");
                None
            }
            Choice::Interactive => {
                let listing = report::render_devices(&candidates);
                let count = candidates.len();
                tokio::task::spawn_blocking(move || {
                    let stdin = io::stdin();
                    let mut stdout = io::stdout();
                    prompt_choice(&listing, count, &mut stdin.lock(), &mut stdout)
                })
                .await
                .map_err(io::Error::other)??
            }
        };

        Ok(index.map(|i| candidates[i].address.clone()))
    }
}

/// Keep sensors whose advertised name starts with `name_prefix`, strongest
/// signal first. Devices without an RSSI sort last.
pub fn rank_devices(devices: Vec<DiscoveredDevice>, name_prefix: &str) -> Vec<DiscoveredDevice> {
    let mut matching: Vec<_> = devices
        .into_iter()
        .filter(|d| d.name.as_deref().is_some_and(|n| n.starts_with(name_prefix)))
        .collect();

    matching.sort_by(|a, b| b.rssi.cmp(&a.rssi));
    matching
}

/// Show the listing and read a 1-based choice until a valid one is entered.
///
/// Returns the 0-based index, or `None` once input is exhausted.
fn prompt_choice(
    listing: &str,
    count: usize,
    input: &mut impl BufRead,
    output: &mut impl Write,
) -> io::Result<Option<usize>> {
    writeln!(output, "{listing}")?;

    let mut line = String::new();
    loop {
        write!(output, "Select a sensor (1-{count}) > ")?;
        output.flush()?;

        line.clear();
        if input.read_line(&mut line)? == 0 {
            return Ok(None);
        }

        match line.trim().parse::<usize>() {
            Ok(n) if (1..=count).contains(&n) => return Ok(Some(n - 1)),
            Ok(_) => writeln!(output, "Enter a number between 1 and {count}")?,
            Err(_) => writeln!(output, "Enter a valid number")?,
        }
    }
}
