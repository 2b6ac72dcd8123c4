/// Simulated plug fleet
///
/// Virtual plugs addressed by ip that behave like the real thing from the
/// service's point of view: they answer discovery, report and switch their
/// relay, and can be taken offline or made to answer garbage.

use crate::{
    device::{DeviceClient, DiscoveryResponse, DiscoveryStream, RelayReading},
    error::{OneLightError, OneLightResult},
    models::DeviceStatus,
};
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::sync::RwLock;

#[derive(Debug, Clone)]
struct SimulatedPlug {
    mac: String,
    model: String,
    relay_on: bool,
    online: bool,
    malformed: bool,
    commands: u64,
}

/// In-process DeviceClient backed by virtual plugs
#[derive(Debug, Default)]
pub struct SimulatedFleet {
    plugs: RwLock<BTreeMap<String, SimulatedPlug>>,
    latency: Duration,
}

impl SimulatedFleet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every call waits this long before the plug "answers"
    pub fn with_latency(latency: Duration) -> Self {
        Self {
            plugs: RwLock::new(BTreeMap::new()),
            latency,
        }
    }

    /// Add a plug, relay off and online
    pub async fn add_plug(&self, ip: &str, mac: &str, model: &str) {
        self.plugs.write().await.insert(
            ip.to_string(),
            SimulatedPlug {
                mac: mac.to_string(),
                model: model.to_string(),
                relay_on: false,
                online: true,
                malformed: false,
                commands: 0,
            },
        );
    }

    pub async fn set_online(&self, ip: &str, online: bool) {
        if let Some(plug) = self.plugs.write().await.get_mut(ip) {
            plug.online = online;
        }
    }

    /// Make the plug answer with something undecodable
    pub async fn set_malformed(&self, ip: &str, malformed: bool) {
        if let Some(plug) = self.plugs.write().await.get_mut(ip) {
            plug.malformed = malformed;
        }
    }

    /// Flip the relay by hand, behind the service's back
    pub async fn press_button(&self, ip: &str, on: bool) {
        if let Some(plug) = self.plugs.write().await.get_mut(ip) {
            plug.relay_on = on;
        }
    }

    /// Physical relay state, as the plug itself knows it
    pub async fn relay_state(&self, ip: &str) -> Option<bool> {
        self.plugs.read().await.get(ip).map(|p| p.relay_on)
    }

    /// Number of relay commands the plug has executed
    pub async fn command_count(&self, ip: &str) -> u64 {
        self.plugs.read().await.get(ip).map(|p| p.commands).unwrap_or(0)
    }

    async fn answer_delay(&self) {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
    }

    fn reachable<'a>(
        plugs: &'a mut BTreeMap<String, SimulatedPlug>,
        ip: &str,
    ) -> OneLightResult<&'a mut SimulatedPlug> {
        let plug = plugs
            .get_mut(ip)
            .filter(|p| p.online)
            .ok_or_else(|| OneLightError::DeviceUnreachable(format!("{} did not answer", ip)))?;

        if plug.malformed {
            return Err(OneLightError::Protocol(format!("{} sent an undecodable response", ip)));
        }
        Ok(plug)
    }
}

#[async_trait]
impl DeviceClient for SimulatedFleet {
    async fn discover(&self, timeout: Duration) -> OneLightResult<DiscoveryStream> {
        if self.latency > timeout {
            return Ok(stream::empty().boxed());
        }
        self.answer_delay().await;

        let answers: Vec<DiscoveryResponse> = self
            .plugs
            .read()
            .await
            .iter()
            .filter(|(_, p)| p.online)
            .map(|(ip, p)| DiscoveryResponse {
                ip: ip.clone(),
                mac: p.mac.clone(),
                model: p.model.clone(),
            })
            .collect();

        Ok(stream::iter(answers).boxed())
    }

    async fn get_status(&self, ip: &str) -> OneLightResult<RelayReading> {
        self.answer_delay().await;

        let mut plugs = self.plugs.write().await;
        let plug = Self::reachable(&mut plugs, ip)?;
        Ok(RelayReading {
            status: DeviceStatus::from_relay(plug.relay_on),
            reachable: true,
        })
    }

    async fn set_relay(&self, ip: &str, on: bool) -> OneLightResult<DeviceStatus> {
        self.answer_delay().await;

        let mut plugs = self.plugs.write().await;
        let plug = Self::reachable(&mut plugs, ip)?;
        plug.relay_on = on;
        plug.commands += 1;
        Ok(DeviceStatus::from_relay(plug.relay_on))
    }
}
