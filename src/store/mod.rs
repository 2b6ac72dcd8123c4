/// Device persistence
///
/// The rest of the service only talks to storage through [`DeviceStore`], so
/// handlers, the registrar and the controller never see SQL errors directly.

pub mod sqlite;

pub use sqlite::SqliteDeviceStore;

use crate::error::OneLightResult;
use crate::models::{Device, DeviceStatus, MacAddress, NewDevice, NewUser, User};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Persistence backend for users and devices
#[async_trait]
pub trait DeviceStore: Send + Sync {
    /// Create a user (used by the signup collaborator and by tests)
    async fn create_user(&self, user: NewUser) -> OneLightResult<User>;

    /// Fetch a user by id
    async fn get_user(&self, id: i64) -> OneLightResult<Option<User>>;

    /// Delete a user; their devices go with them
    async fn delete_user(&self, id: i64) -> OneLightResult<()>;

    /// Atomically check that no provisioned device holds the mac and insert
    /// a new provisioned device with status `unknown` and no `last_seen`.
    ///
    /// Fails with `DuplicateRegistration` when the mac is already claimed and
    /// with `ConstraintViolation` when the owner does not exist.
    async fn insert_provisioned_device(&self, device: NewDevice) -> OneLightResult<Device>;

    /// Fetch a device by id
    async fn get_device(&self, id: i64) -> OneLightResult<Option<Device>>;

    /// All devices owned by a user, oldest first
    async fn list_devices_by_owner(&self, owner_id: i64) -> OneLightResult<Vec<Device>>;

    /// The provisioned device holding this mac, if any
    async fn find_provisioned_by_mac(&self, mac: &MacAddress) -> OneLightResult<Option<Device>>;

    /// Provisioned devices last known at this ip
    async fn find_provisioned_by_ip(&self, ip: &str) -> OneLightResult<Vec<Device>>;

    /// Record a successful contact: status and last_seen change together.
    /// Only `on`/`off` are accepted here.
    async fn record_contact(
        &self,
        id: i64,
        status: DeviceStatus,
        seen_at: DateTime<Utc>,
    ) -> OneLightResult<Device>;

    /// Record a failed contact: status becomes `unreachable`, last_seen is kept
    async fn mark_unreachable(&self, id: i64) -> OneLightResult<Device>;
}
