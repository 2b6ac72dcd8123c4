/// Ownership checks
///
/// Every per-device operation goes through `OwnershipGuard::authorize` first.
/// The controller only accepts an `AuthorizedDevice`, which nothing outside
/// this module can construct.
use crate::{
    error::{OneLightError, OneLightResult},
    metrics,
    models::Device,
    store::DeviceStore,
};
use std::fmt;
use std::sync::Arc;
use tracing::warn;

/// What the caller intends to do with the device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    View,
    ReadStatus,
    Control,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Action::View => "view",
            Action::ReadStatus => "read_status",
            Action::Control => "control",
        };
        f.write_str(name)
    }
}

/// A device the caller has been proven to own
#[derive(Debug, Clone)]
pub struct AuthorizedDevice {
    device: Device,
    user_id: i64,
    action: Action,
}

impl AuthorizedDevice {
    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn id(&self) -> i64 {
        self.device.id
    }

    pub fn user_id(&self) -> i64 {
        self.user_id
    }

    pub fn action(&self) -> Action {
        self.action
    }

    pub fn into_device(self) -> Device {
        self.device
    }
}

/// Resolves a device and checks the caller owns it
#[derive(Clone)]
pub struct OwnershipGuard {
    store: Arc<dyn DeviceStore>,
}

impl OwnershipGuard {
    pub fn new(store: Arc<dyn DeviceStore>) -> Self {
        Self { store }
    }

    /// `NotFound` if the device does not exist, `Unauthorized` if someone
    /// else owns it. The same rule applies to every action.
    pub async fn authorize(
        &self,
        user_id: i64,
        device_id: i64,
        action: Action,
    ) -> OneLightResult<AuthorizedDevice> {
        let device = self
            .store
            .get_device(device_id)
            .await?
            .ok_or_else(|| OneLightError::NotFound(format!("Device {}", device_id)))?;

        if device.owner_id != user_id {
            metrics::AUTHORIZATION_DENIALS_TOTAL.inc();
            warn!(
                "User {} denied {} on device {} owned by {}",
                user_id, action, device_id, device.owner_id
            );
            return Err(OneLightError::Unauthorized(format!(
                "User {} does not own device {}",
                user_id, device_id
            )));
        }

        Ok(AuthorizedDevice {
            device,
            user_id,
            action,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{MacAddress, NewDevice};
    use crate::store::sqlite::tests::{memory_store, seed_user};

    async fn setup() -> (Arc<dyn DeviceStore>, OwnershipGuard, i64, i64, i64) {
        let store: Arc<dyn DeviceStore> = Arc::new(memory_store().await);
        let alice = seed_user(store.as_ref(), "alice").await;
        let bob = seed_user(store.as_ref(), "bob").await;
        let device = store
            .insert_provisioned_device(NewDevice {
                name: "Hall".to_string(),
                model: "HS100".to_string(),
                owner_id: alice.id,
                ip: "192.168.1.50".to_string(),
                mac: MacAddress::parse("AA:BB:CC:DD:EE:FF").unwrap(),
            })
            .await
            .unwrap();

        let guard = OwnershipGuard::new(store.clone());
        (store, guard, alice.id, bob.id, device.id)
    }

    #[tokio::test]
    async fn test_owner_is_authorized_for_every_action() {
        let (_store, guard, alice, _bob, device) = setup().await;

        for action in [Action::View, Action::ReadStatus, Action::Control] {
            let authorized = guard.authorize(alice, device, action).await.unwrap();
            assert_eq!(authorized.id(), device);
            assert_eq!(authorized.user_id(), alice);
            assert_eq!(authorized.action(), action);
        }
    }

    #[tokio::test]
    async fn test_other_user_is_refused() {
        let (_store, guard, _alice, bob, device) = setup().await;

        for action in [Action::View, Action::ReadStatus, Action::Control] {
            let err = guard.authorize(bob, device, action).await.unwrap_err();
            assert!(matches!(err, OneLightError::Unauthorized(_)));
        }
    }

    #[tokio::test]
    async fn test_missing_device_is_not_found() {
        let (_store, guard, alice, _bob, device) = setup().await;

        let err = guard.authorize(alice, device + 1, Action::View).await.unwrap_err();
        assert!(matches!(err, OneLightError::NotFound(_)));
    }
}
