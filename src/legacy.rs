/// Single-plug routes from before multi-device support
///
/// Each call resolves the configured default device and then takes the
/// same guard + controller path as `/devices/:id`.
use crate::{
    controller::DeviceController,
    error::{OneLightError, OneLightResult},
    guard::{Action, AuthorizedDevice, OwnershipGuard},
    models::{Device, DeviceStatus},
};
use std::sync::Arc;

/// Answer of the legacy reachability check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LegacyPing {
    Reachable,
    Unreachable,
}

impl LegacyPing {
    /// Historical body: the plug's "HTTP-ish" code as text
    pub fn code(&self) -> &'static str {
        match self {
            LegacyPing::Reachable => "200",
            LegacyPing::Unreachable => "400",
        }
    }
}

#[derive(Clone)]
pub struct LegacyAdapter {
    default_device_id: Option<i64>,
    guard: OwnershipGuard,
    controller: Arc<DeviceController>,
}

impl LegacyAdapter {
    pub fn new(
        default_device_id: Option<i64>,
        guard: OwnershipGuard,
        controller: Arc<DeviceController>,
    ) -> Self {
        Self {
            default_device_id,
            guard,
            controller,
        }
    }

    async fn resolve(&self, user_id: i64, action: Action) -> OneLightResult<AuthorizedDevice> {
        let device_id = self.default_device_id.ok_or_else(|| {
            OneLightError::NotFound("No default device configured".to_string())
        })?;
        self.guard.authorize(user_id, device_id, action).await
    }

    pub async fn turn_on(&self, user_id: i64) -> OneLightResult<Device> {
        let target = self.resolve(user_id, Action::Control).await?;
        self.controller.toggle(&target, true).await
    }

    pub async fn turn_off(&self, user_id: i64) -> OneLightResult<Device> {
        let target = self.resolve(user_id, Action::Control).await?;
        self.controller.toggle(&target, false).await
    }

    /// Reachability check; an unreachable plug is recorded, not an error
    pub async fn ping(&self, user_id: i64) -> OneLightResult<LegacyPing> {
        let target = self.resolve(user_id, Action::ReadStatus).await?;
        match self.controller.refresh_status(&target).await {
            Ok(_) => Ok(LegacyPing::Reachable),
            Err(OneLightError::DeviceUnreachable(_)) => Ok(LegacyPing::Unreachable),
            Err(e) => Err(e),
        }
    }

    /// Fresh relay state as `hs100: ON|OFF`
    pub async fn state_line(&self, user_id: i64) -> OneLightResult<String> {
        let target = self.resolve(user_id, Action::ReadStatus).await?;
        let device = self.controller.refresh_status(&target).await?;
        let label = match device.status {
            DeviceStatus::On => "ON",
            _ => "OFF",
        };
        Ok(format!("hs100: {}", label))
    }
}
