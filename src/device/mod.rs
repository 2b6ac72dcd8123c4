/// Device clients
///
/// Every plug model family speaks through the same capability set:
/// broadcast discovery, relay-state query and relay-state set.
/// Implementations exist for real Kasa plugs on the LAN and for an
/// in-process simulated fleet.

pub mod interfaces;
pub mod kasa;
pub mod protocol;
pub mod simulated;

pub use kasa::KasaClient;
pub use simulated::SimulatedFleet;

use crate::error::OneLightResult;
use crate::models::DeviceStatus;
use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// One answer to a discovery broadcast, before any normalisation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryResponse {
    pub ip: String,
    pub mac: String,
    pub model: String,
}

/// Responses arriving within a discovery window; ends when the window closes
pub type DiscoveryStream = BoxStream<'static, DiscoveryResponse>;

/// Result of a relay-state query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayReading {
    pub status: DeviceStatus,
    pub reachable: bool,
}

/// Vendor protocol capabilities for a single plug family
///
/// Every call is bounded by a timeout owned by the implementation.
#[async_trait]
pub trait DeviceClient: Send + Sync {
    /// Broadcast a discovery request and yield responses until `timeout` elapses.
    /// Silence is not an error: the stream simply ends empty.
    async fn discover(&self, timeout: Duration) -> OneLightResult<DiscoveryStream>;

    /// Query the relay state. Fails with `DeviceUnreachable` on timeout or refusal.
    async fn get_status(&self, ip: &str) -> OneLightResult<RelayReading>;

    /// Set the relay and return the state the plug confirmed.
    /// Fails with `DeviceUnreachable` on timeout, `Protocol` on a bad answer.
    async fn set_relay(&self, ip: &str, on: bool) -> OneLightResult<DeviceStatus>;
}

/// Model families sharing one wire protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelFamily {
    /// HS1xx, KP1xx and EP1x single-relay plugs
    KasaPlug,
    /// Anything we do not recognise
    Unrecognized,
}

impl ModelFamily {
    pub fn from_model(model: &str) -> Self {
        let model = model.trim().to_ascii_uppercase();
        const PLUG_PREFIXES: [&str; 3] = ["HS1", "KP1", "EP1"];

        if PLUG_PREFIXES.iter().any(|p| model.starts_with(p)) {
            ModelFamily::KasaPlug
        } else {
            ModelFamily::Unrecognized
        }
    }
}

/// Chooses the client for a device by its model
#[derive(Clone)]
pub struct DeviceClients {
    default: Arc<dyn DeviceClient>,
    by_family: HashMap<ModelFamily, Arc<dyn DeviceClient>>,
}

impl DeviceClients {
    /// All families, and discovery, go through `default` until overridden
    pub fn new(default: Arc<dyn DeviceClient>) -> Self {
        Self {
            default,
            by_family: HashMap::new(),
        }
    }

    pub fn with_family(mut self, family: ModelFamily, client: Arc<dyn DeviceClient>) -> Self {
        self.by_family.insert(family, client);
        self
    }

    /// Client used to broadcast discovery requests
    pub fn discovery(&self) -> Arc<dyn DeviceClient> {
        self.default.clone()
    }

    pub fn for_model(&self, model: &str) -> Arc<dyn DeviceClient> {
        self.by_family
            .get(&ModelFamily::from_model(model))
            .cloned()
            .unwrap_or_else(|| self.default.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_family() {
        assert_eq!(ModelFamily::from_model("HS100"), ModelFamily::KasaPlug);
        assert_eq!(ModelFamily::from_model("hs110(EU)"), ModelFamily::KasaPlug);
        assert_eq!(ModelFamily::from_model("KP115"), ModelFamily::KasaPlug);
        assert_eq!(ModelFamily::from_model("LB130"), ModelFamily::Unrecognized);
        assert_eq!(ModelFamily::from_model(""), ModelFamily::Unrecognized);
    }

    #[tokio::test]
    async fn test_client_selected_by_model() {
        let plugs = Arc::new(SimulatedFleet::new());
        let others = Arc::new(SimulatedFleet::new());
        plugs.add_plug("10.0.0.2", "AA:BB:CC:DD:EE:01", "HS100").await;
        others.add_plug("10.0.0.2", "AA:BB:CC:DD:EE:01", "HS100").await;
        others.set_online("10.0.0.2", false).await;

        let clients = DeviceClients::new(others.clone())
            .with_family(ModelFamily::KasaPlug, plugs.clone());

        assert!(clients.for_model("HS100").get_status("10.0.0.2").await.is_ok());
        assert!(clients.for_model("LB130").get_status("10.0.0.2").await.is_err());
    }
}
