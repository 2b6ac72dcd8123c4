/// Relay control for owned devices
///
/// Persisted status only changes on a device answer: `on`/`off` together with
/// `last_seen` on success, `unreachable` alone when the plug cannot be reached.
/// A protocol error leaves the row untouched.
use crate::{
    device::DeviceClients,
    error::{OneLightError, OneLightResult},
    guard::{Action, AuthorizedDevice},
    locks::KeyedLocks,
    metrics,
    models::{Device, DeviceStatus},
    store::DeviceStore,
};
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct DeviceController {
    store: Arc<dyn DeviceStore>,
    clients: DeviceClients,
    locks: KeyedLocks<i64>,
}

impl DeviceController {
    pub fn new(store: Arc<dyn DeviceStore>, clients: DeviceClients) -> Self {
        Self {
            store,
            clients,
            locks: KeyedLocks::new(),
        }
    }

    /// Per-device locks, for collaborators that also talk to owned plugs
    pub fn device_locks(&self) -> KeyedLocks<i64> {
        self.locks.clone()
    }

    /// Switch the relay and persist what the plug confirmed
    pub async fn toggle(&self, target: &AuthorizedDevice, desired_on: bool) -> OneLightResult<Device> {
        if target.action() != Action::Control {
            return Err(OneLightError::Unauthorized(format!(
                "Device {} was authorized for {}, not control",
                target.id(),
                target.action()
            )));
        }

        let device = target.device();
        let _guard = self.locks.lock(device.id).await;

        let client = self.clients.for_model(&device.model);
        let answer = client.set_relay(&device.ip, desired_on).await;

        let updated = self.persist(device, "set_relay", answer).await?;
        info!(
            "User {} switched device {} {}",
            target.user_id(),
            device.id,
            updated.status
        );
        Ok(updated)
    }

    /// Read the relay and persist it; same failure contract as `toggle`
    pub async fn refresh_status(&self, target: &AuthorizedDevice) -> OneLightResult<Device> {
        let device = target.device();
        let _guard = self.locks.lock(device.id).await;

        let client = self.clients.for_model(&device.model);
        let answer = client.get_status(&device.ip).await.map(|reading| reading.status);

        let updated = self.persist(device, "get_status", answer).await?;
        debug!("Device {} reports {}", device.id, updated.status);
        Ok(updated)
    }

    async fn persist(
        &self,
        device: &Device,
        action: &str,
        answer: OneLightResult<DeviceStatus>,
    ) -> OneLightResult<Device> {
        match answer {
            Ok(status) => {
                metrics::record_device_command(action, "ok");
                self.store.record_contact(device.id, status, Utc::now()).await
            }
            Err(OneLightError::DeviceUnreachable(reason)) => {
                metrics::record_device_command(action, "unreachable");
                warn!("Device {} at {} unreachable: {}", device.id, device.ip, reason);
                self.store.mark_unreachable(device.id).await?;
                Err(OneLightError::DeviceUnreachable(reason))
            }
            Err(e) => {
                metrics::record_device_command(action, "error");
                warn!("Device {} {} failed: {}", device.id, action, e);
                Err(e)
            }
        }
    }
}
