/// SQLite-backed device store
use crate::{
    error::{OneLightError, OneLightResult},
    models::{Device, DeviceStatus, MacAddress, NewDevice, NewUser, User},
    store::DeviceStore,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, Sqlite, SqlitePool, Transaction};

const DEVICE_COLUMNS: &str =
    "id, name, model, owner_id, ip, mac, status, last_seen, provisioned, created_at";

/// Device row as stored
#[derive(Debug, FromRow)]
struct DeviceRow {
    id: i64,
    name: String,
    model: String,
    owner_id: Option<i64>,
    ip: String,
    mac: String,
    status: String,
    last_seen: Option<DateTime<Utc>>,
    provisioned: bool,
    created_at: DateTime<Utc>,
}

impl TryFrom<DeviceRow> for Device {
    type Error = OneLightError;

    fn try_from(row: DeviceRow) -> Result<Self, Self::Error> {
        let owner_id = row.owner_id.ok_or_else(|| {
            OneLightError::ConstraintViolation(format!("Device {} has no owner", row.id))
        })?;
        let mac = MacAddress::parse(&row.mac).map_err(|_| {
            OneLightError::ConstraintViolation(format!("Device {} has a corrupt mac", row.id))
        })?;

        Ok(Device {
            id: row.id,
            name: row.name,
            model: row.model,
            owner_id,
            ip: row.ip,
            mac,
            status: row.status.parse()?,
            last_seen: row.last_seen,
            provisioned: row.provisioned,
            created_at: row.created_at,
        })
    }
}

/// User row as stored
#[derive(Debug, FromRow)]
struct UserRow {
    id: i64,
    username: String,
    email: String,
    password_hash: String,
    created_at: DateTime<Utc>,
}

impl From<UserRow> for User {
    fn from(row: UserRow) -> Self {
        User {
            id: row.id,
            username: row.username,
            email: row.email,
            password_hash: row.password_hash,
            created_at: row.created_at,
        }
    }
}

/// Device store over a SQLite pool
#[derive(Clone)]
pub struct SqliteDeviceStore {
    db: SqlitePool,
}

impl SqliteDeviceStore {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    async fn fetch_device(&self, id: i64) -> OneLightResult<Device> {
        self.get_device(id)
            .await?
            .ok_or_else(|| OneLightError::NotFound(format!("Device {}", id)))
    }

    /// Check-then-insert on an already-open write transaction
    async fn insert_in_transaction(
        tx: &mut Transaction<'_, Sqlite>,
        device: &NewDevice,
    ) -> OneLightResult<i64> {
        let owner: Option<(i64,)> = sqlx::query_as("SELECT id FROM users WHERE id = ?1")
            .bind(device.owner_id)
            .fetch_optional(&mut **tx)
            .await?;
        if owner.is_none() {
            return Err(OneLightError::ConstraintViolation(format!(
                "Owner {} does not exist",
                device.owner_id
            )));
        }

        let existing: Option<(i64,)> =
            sqlx::query_as("SELECT id FROM devices WHERE mac = ?1 AND provisioned = 1")
                .bind(device.mac.as_str())
                .fetch_optional(&mut **tx)
                .await?;
        if existing.is_some() {
            return Err(OneLightError::DuplicateRegistration(device.mac.to_string()));
        }

        let result = sqlx::query(
            r#"
            INSERT INTO devices (name, model, owner_id, ip, mac, status, last_seen, provisioned, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, 'unknown', NULL, 1, ?6)
            "#,
        )
        .bind(&device.name)
        .bind(&device.model)
        .bind(device.owner_id)
        .bind(&device.ip)
        .bind(device.mac.as_str())
        .bind(Utc::now())
        .execute(&mut **tx)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(db) = &e {
                if db.is_unique_violation() {
                    return OneLightError::DuplicateRegistration(device.mac.to_string());
                }
            }
            OneLightError::from(e)
        })?;

        Ok(result.last_insert_rowid())
    }
}

#[async_trait]
impl DeviceStore for SqliteDeviceStore {
    async fn create_user(&self, user: NewUser) -> OneLightResult<User> {
        let row: UserRow = sqlx::query_as(
            r#"
            INSERT INTO users (username, email, password_hash, created_at)
            VALUES (?1, ?2, ?3, ?4)
            RETURNING id, username, email, password_hash, created_at
            "#,
        )
        .bind(&user.username)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(Utc::now())
        .fetch_one(&self.db)
        .await?;

        Ok(row.into())
    }

    async fn get_user(&self, id: i64) -> OneLightResult<Option<User>> {
        let row: Option<UserRow> = sqlx::query_as(
            "SELECT id, username, email, password_hash, created_at FROM users WHERE id = ?1",
        )
        .bind(id)
        .fetch_optional(&self.db)
        .await?;

        Ok(row.map(User::from))
    }

    async fn delete_user(&self, id: i64) -> OneLightResult<()> {
        let result = sqlx::query("DELETE FROM users WHERE id = ?1")
            .bind(id)
            .execute(&self.db)
            .await?;

        if result.rows_affected() == 0 {
            return Err(OneLightError::NotFound(format!("User {}", id)));
        }
        Ok(())
    }

    async fn insert_provisioned_device(&self, device: NewDevice) -> OneLightResult<Device> {
        // IMMEDIATE takes the write lock up front so two registrations of the
        // same mac cannot both pass the existence check. Dropping `tx` before
        // commit rolls it back, including when the caller is cancelled.
        let mut tx = self.db.begin_with("BEGIN IMMEDIATE").await?;
        let id = Self::insert_in_transaction(&mut tx, &device).await?;
        tx.commit().await?;

        self.fetch_device(id).await
    }

    async fn get_device(&self, id: i64) -> OneLightResult<Option<Device>> {
        let row: Option<DeviceRow> =
            sqlx::query_as(&format!("SELECT {} FROM devices WHERE id = ?1", DEVICE_COLUMNS))
                .bind(id)
                .fetch_optional(&self.db)
                .await?;

        row.map(Device::try_from).transpose()
    }

    async fn list_devices_by_owner(&self, owner_id: i64) -> OneLightResult<Vec<Device>> {
        let rows: Vec<DeviceRow> = sqlx::query_as(&format!(
            "SELECT {} FROM devices WHERE owner_id = ?1 ORDER BY id",
            DEVICE_COLUMNS
        ))
        .bind(owner_id)
        .fetch_all(&self.db)
        .await?;

        rows.into_iter().map(Device::try_from).collect()
    }

    async fn find_provisioned_by_mac(&self, mac: &MacAddress) -> OneLightResult<Option<Device>> {
        let row: Option<DeviceRow> = sqlx::query_as(&format!(
            "SELECT {} FROM devices WHERE mac = ?1 AND provisioned = 1",
            DEVICE_COLUMNS
        ))
        .bind(mac.as_str())
        .fetch_optional(&self.db)
        .await?;

        row.map(Device::try_from).transpose()
    }

    async fn find_provisioned_by_ip(&self, ip: &str) -> OneLightResult<Vec<Device>> {
        let rows: Vec<DeviceRow> = sqlx::query_as(&format!(
            "SELECT {} FROM devices WHERE ip = ?1 AND provisioned = 1 ORDER BY id",
            DEVICE_COLUMNS
        ))
        .bind(ip)
        .fetch_all(&self.db)
        .await?;

        rows.into_iter().map(Device::try_from).collect()
    }

    async fn record_contact(
        &self,
        id: i64,
        status: DeviceStatus,
        seen_at: DateTime<Utc>,
    ) -> OneLightResult<Device> {
        if !matches!(status, DeviceStatus::On | DeviceStatus::Off) {
            return Err(OneLightError::ConstraintViolation(format!(
                "A successful contact cannot leave status '{}'",
                status
            )));
        }

        let result = sqlx::query("UPDATE devices SET status = ?1, last_seen = ?2 WHERE id = ?3")
            .bind(status.as_str())
            .bind(seen_at)
            .bind(id)
            .execute(&self.db)
            .await?;

        if result.rows_affected() == 0 {
            return Err(OneLightError::NotFound(format!("Device {}", id)));
        }
        self.fetch_device(id).await
    }

    async fn mark_unreachable(&self, id: i64) -> OneLightResult<Device> {
        let result = sqlx::query("UPDATE devices SET status = 'unreachable' WHERE id = ?1")
            .bind(id)
            .execute(&self.db)
            .await?;

        if result.rows_affected() == 0 {
            return Err(OneLightError::NotFound(format!("Device {}", id)));
        }
        self.fetch_device(id).await
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::db;
    use std::time::Duration;
    use tempfile::tempdir;

    pub(crate) async fn memory_store() -> SqliteDeviceStore {
        SqliteDeviceStore::new(db::create_memory_pool().await.unwrap())
    }

    pub(crate) async fn seed_user(store: &dyn DeviceStore, name: &str) -> User {
        store
            .create_user(NewUser {
                username: name.to_string(),
                email: format!("{}@example.com", name),
                password_hash: "$2b$12$opaque".to_string(),
            })
            .await
            .unwrap()
    }

    fn plug(owner_id: i64, mac: &str) -> NewDevice {
        NewDevice {
            name: "Desk Lamp".to_string(),
            model: "HS100".to_string(),
            owner_id,
            ip: "192.168.1.50".to_string(),
            mac: MacAddress::parse(mac).unwrap(),
        }
    }

    #[tokio::test]
    async fn test_insert_and_fetch_device() {
        let store = memory_store().await;
        let alice = seed_user(&store, "alice").await;

        let device = store
            .insert_provisioned_device(plug(alice.id, "aa:bb:cc:dd:ee:ff"))
            .await
            .unwrap();

        assert!(device.provisioned);
        assert_eq!(device.owner_id, alice.id);
        assert_eq!(device.status, DeviceStatus::Unknown);
        assert_eq!(device.last_seen, None);
        assert_eq!(device.mac.as_str(), "AA:BB:CC:DD:EE:FF");

        let fetched = store.get_device(device.id).await.unwrap().unwrap();
        assert_eq!(fetched, device);
        assert!(store.get_device(device.id + 100).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_mac_is_rejected() {
        let store = memory_store().await;
        let alice = seed_user(&store, "alice").await;
        let bob = seed_user(&store, "bob").await;

        store
            .insert_provisioned_device(plug(alice.id, "aa:bb:cc:dd:ee:ff"))
            .await
            .unwrap();
        let err = store
            .insert_provisioned_device(plug(bob.id, "AA-BB-CC-DD-EE-FF"))
            .await
            .unwrap_err();

        assert!(matches!(err, OneLightError::DuplicateRegistration(_)));
        assert!(store.list_devices_by_owner(bob.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_find_provisioned_by_ip() {
        let store = memory_store().await;
        let alice = seed_user(&store, "alice").await;
        let device = store
            .insert_provisioned_device(plug(alice.id, "aa:bb:cc:dd:ee:ff"))
            .await
            .unwrap();

        let found = store.find_provisioned_by_ip("192.168.1.50").await.unwrap();
        assert_eq!(found, vec![device]);
        assert!(store.find_provisioned_by_ip("192.168.1.51").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_registration_releases_write_lock() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cancel.sqlite");
        let pool = db::create_pool(
            &path,
            db::DatabaseOptions {
                max_connections: 1,
                enable_wal: true,
            },
        )
        .await
        .unwrap();
        db::run_migrations(&pool).await.unwrap();
        let store = SqliteDeviceStore::new(pool);
        let alice = seed_user(&store, "alice").await;

        // Another connection holds the write lock while the registration waits
        let other = db::create_pool(&path, db::DatabaseOptions::default()).await.unwrap();
        let holder = other.begin_with("BEGIN IMMEDIATE").await.unwrap();

        let cancelled = tokio::time::timeout(
            Duration::from_millis(100),
            store.insert_provisioned_device(plug(alice.id, "aa:bb:cc:dd:ee:01")),
        )
        .await;
        assert!(cancelled.is_err());

        holder.rollback().await.unwrap();

        // Same store, same single connection: the dropped transaction is gone
        let device = store
            .insert_provisioned_device(plug(alice.id, "aa:bb:cc:dd:ee:02"))
            .await
            .unwrap();
        store
            .record_contact(device.id, DeviceStatus::On, Utc::now())
            .await
            .unwrap();

        // And other connections can write again
        sqlx::query("UPDATE devices SET name = 'Porch' WHERE id = ?1")
            .bind(device.id)
            .execute(&other)
            .await
            .unwrap();

        let cancelled_mac = MacAddress::parse("aa:bb:cc:dd:ee:01").unwrap();
        assert!(store
            .find_provisioned_by_mac(&cancelled_mac)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_missing_owner_is_a_constraint_violation() {
        let store = memory_store().await;

        let err = store
            .insert_provisioned_device(plug(42, "aa:bb:cc:dd:ee:ff"))
            .await
            .unwrap_err();
        assert!(matches!(err, OneLightError::ConstraintViolation(_)));
    }

    #[tokio::test]
    async fn test_contact_updates_status_and_last_seen_together() {
        let store = memory_store().await;
        let alice = seed_user(&store, "alice").await;
        let device = store
            .insert_provisioned_device(plug(alice.id, "aa:bb:cc:dd:ee:ff"))
            .await
            .unwrap();

        let seen = Utc::now();
        let on = store.record_contact(device.id, DeviceStatus::On, seen).await.unwrap();
        assert_eq!(on.status, DeviceStatus::On);
        assert_eq!(on.last_seen, Some(seen));

        let lost = store.mark_unreachable(device.id).await.unwrap();
        assert_eq!(lost.status, DeviceStatus::Unreachable);
        assert_eq!(lost.last_seen, Some(seen));

        let err = store
            .record_contact(device.id, DeviceStatus::Unreachable, Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, OneLightError::ConstraintViolation(_)));
    }

    #[tokio::test]
    async fn test_list_is_scoped_to_owner() {
        let store = memory_store().await;
        let alice = seed_user(&store, "alice").await;
        let bob = seed_user(&store, "bob").await;

        store
            .insert_provisioned_device(plug(alice.id, "aa:bb:cc:dd:ee:01"))
            .await
            .unwrap();
        store
            .insert_provisioned_device(plug(alice.id, "aa:bb:cc:dd:ee:02"))
            .await
            .unwrap();
        store
            .insert_provisioned_device(plug(bob.id, "aa:bb:cc:dd:ee:03"))
            .await
            .unwrap();

        let mine = store.list_devices_by_owner(alice.id).await.unwrap();
        assert_eq!(mine.len(), 2);
        assert!(mine.iter().all(|d| d.owner_id == alice.id));
    }

    #[tokio::test]
    async fn test_deleting_user_cascades_to_devices() {
        let store = memory_store().await;
        let alice = seed_user(&store, "alice").await;
        let device = store
            .insert_provisioned_device(plug(alice.id, "aa:bb:cc:dd:ee:ff"))
            .await
            .unwrap();

        store.delete_user(alice.id).await.unwrap();

        assert!(store.get_user(alice.id).await.unwrap().is_none());
        assert!(store.get_device(device.id).await.unwrap().is_none());
        assert!(store
            .find_provisioned_by_mac(&device.mac)
            .await
            .unwrap()
            .is_none());
    }
}
