/// Claiming discovered plugs
///
/// Turns a scan candidate plus an owner into a provisioned device, then
/// reads its relay once so the first listing already shows a real relay state.
use crate::{
    device::DeviceClients,
    error::{OneLightError, OneLightResult},
    locks::KeyedLocks,
    metrics,
    models::{Candidate, Device, MacAddress, NewDevice},
    store::DeviceStore,
};
use chrono::Utc;
use std::net::IpAddr;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Registers candidates for their owners
pub struct ProvisioningRegistrar {
    store: Arc<dyn DeviceStore>,
    clients: DeviceClients,
    mac_locks: KeyedLocks<MacAddress>,
    /// Shared with the controller so the first status read never interleaves
    /// with a toggle of the same device
    device_locks: KeyedLocks<i64>,
}

impl ProvisioningRegistrar {
    pub fn new(
        store: Arc<dyn DeviceStore>,
        clients: DeviceClients,
        device_locks: KeyedLocks<i64>,
    ) -> Self {
        Self {
            store,
            clients,
            mac_locks: KeyedLocks::new(),
            device_locks,
        }
    }

    /// Claim `candidate` for `owner_id`.
    ///
    /// A blank `name` falls back to the model. Fails with
    /// `DuplicateRegistration` when the mac is already provisioned.
    /// A failed initial status read is logged and leaves the device `unreachable`.
    pub async fn register(
        &self,
        candidate: Candidate,
        owner_id: i64,
        name: Option<&str>,
    ) -> OneLightResult<Device> {
        let ip = candidate.ip.trim();
        if ip.is_empty() {
            return Err(OneLightError::Validation("Candidate has no ip".to_string()));
        }
        if ip.parse::<IpAddr>().is_err() {
            return Err(OneLightError::Validation(format!(
                "Candidate ip '{}' is not an address",
                ip
            )));
        }

        if self.store.get_user(owner_id).await?.is_none() {
            metrics::record_registration("rejected");
            return Err(OneLightError::ConstraintViolation(format!(
                "Owner {} does not exist",
                owner_id
            )));
        }

        let model = match candidate.model.trim() {
            "" => "unknown".to_string(),
            m => m.to_string(),
        };
        let name = name
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| model.clone());

        let device = {
            let _guard = self.mac_locks.lock(candidate.mac.clone()).await;
            let inserted = self
                .store
                .insert_provisioned_device(NewDevice {
                    name,
                    model,
                    owner_id,
                    ip: ip.to_string(),
                    mac: candidate.mac.clone(),
                })
                .await;

            match inserted {
                Ok(device) => device,
                Err(e) => {
                    let outcome = match e {
                        OneLightError::DuplicateRegistration(_) => "duplicate",
                        _ => "failed",
                    };
                    metrics::record_registration(outcome);
                    warn!("Registration of {} for user {} failed: {}", candidate.mac, owner_id, e);
                    return Err(e);
                }
            }
        };

        metrics::record_registration("created");
        info!(
            "Provisioned device {} (id={}, mac={}) for owner {}",
            device.name, device.id, device.mac, owner_id
        );

        Ok(self.initial_status(device).await)
    }

    /// Populate status/last_seen; never fails the registration
    async fn initial_status(&self, device: Device) -> Device {
        let _guard = self.device_locks.lock(device.id).await;
        let client = self.clients.for_model(&device.model);

        let recorded = match client.get_status(&device.ip).await {
            Ok(reading) => {
                metrics::record_device_command("initial_status", "ok");
                self.store
                    .record_contact(device.id, reading.status, Utc::now())
                    .await
            }
            Err(e) => {
                metrics::record_device_command("initial_status", "failed");
                warn!(
                    "Initial status read of device {} at {} failed: {}",
                    device.id, device.ip, e
                );
                self.store.mark_unreachable(device.id).await
            }
        };

        match recorded {
            Ok(updated) => updated,
            Err(e) => {
                error!("Could not record initial status for device {}: {}", device.id, e);
                device
            }
        }
    }
}
