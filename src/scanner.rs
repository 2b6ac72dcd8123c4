/// LAN discovery of unclaimed plugs
///
/// The scanner only reads the network. It never touches the device store.
use crate::{
    device::DeviceClient,
    error::OneLightResult,
    metrics,
    models::{Candidate, MacAddress},
};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Smallest window a caller may ask for.
const MIN_WINDOW: Duration = Duration::from_millis(1);

/// What a scan produced
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanOutcome {
    /// Distinct devices in order of first answer
    pub candidates: Vec<Candidate>,
    /// Window actually used after bounding
    pub window_ms: u64,
}

impl ScanOutcome {
    /// No device answered inside the window
    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }
}

/// Drives discovery broadcasts and deduplicates the answers
#[derive(Clone)]
pub struct DiscoveryScanner {
    client: Arc<dyn DeviceClient>,
    default_window: Duration,
    max_window: Duration,
}

impl DiscoveryScanner {
    pub fn new(client: Arc<dyn DeviceClient>, default_window: Duration, max_window: Duration) -> Self {
        Self {
            client,
            default_window,
            max_window,
        }
    }

    /// Clamp a requested window into the allowed range
    pub fn bounded_window(&self, requested: Option<Duration>) -> Duration {
        requested
            .unwrap_or(self.default_window)
            .clamp(MIN_WINDOW, self.max_window)
    }

    /// Scan for `window` (bounded) and return the distinct candidates
    pub async fn scan(&self, window: Option<Duration>) -> OneLightResult<ScanOutcome> {
        let window = self.bounded_window(window);
        let mut responses = self.client.discover(window).await?;

        let mut seen: HashSet<MacAddress> = HashSet::new();
        let mut candidates = Vec::new();

        while let Some(response) = responses.next().await {
            let mac = match MacAddress::parse(&response.mac) {
                Ok(mac) => mac,
                Err(_) => {
                    debug!("Dropping answer from {} with mac '{}'", response.ip, response.mac);
                    continue;
                }
            };
            if response.ip.trim().is_empty() {
                debug!("Dropping answer for {} without an ip", mac);
                continue;
            }
            if !seen.insert(mac.clone()) {
                continue;
            }

            candidates.push(Candidate {
                ip: response.ip,
                mac,
                model: response.model,
            });
        }

        metrics::SCANS_TOTAL.inc();
        metrics::SCAN_CANDIDATES_TOTAL.inc_by(candidates.len() as u64);

        if candidates.is_empty() {
            info!("Scan of {:?} found no candidates", window);
        } else {
            info!("Scan of {:?} found {} candidate(s)", window, candidates.len());
        }

        Ok(ScanOutcome {
            candidates,
            window_ms: window.as_millis() as u64,
        })
    }
}
