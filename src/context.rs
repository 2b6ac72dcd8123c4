/// Application context and dependency injection
use crate::{
    config::{DeviceBackend, ServerConfig},
    controller::DeviceController,
    db,
    device::{DeviceClient, DeviceClients, KasaClient, SimulatedFleet},
    error::OneLightResult,
    guard::OwnershipGuard,
    legacy::LegacyAdapter,
    registrar::ProvisioningRegistrar,
    scanner::DiscoveryScanner,
    store::{DeviceStore, SqliteDeviceStore},
};
use sqlx::SqlitePool;
use std::sync::Arc;

/// Plugs the simulated backend starts with
const DEMO_PLUGS: [(&str, &str, &str); 3] = [
    ("192.168.0.21", "50:C7:BF:00:00:21", "HS100(US)"),
    ("192.168.0.22", "50:C7:BF:00:00:22", "HS103(US)"),
    ("192.168.0.23", "50:C7:BF:00:00:23", "KP115(EU)"),
];

/// Application context holding all shared services
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<ServerConfig>,
    pub db: SqlitePool,
    pub store: Arc<dyn DeviceStore>,
    pub scanner: Arc<DiscoveryScanner>,
    pub registrar: Arc<ProvisioningRegistrar>,
    pub guard: OwnershipGuard,
    pub controller: Arc<DeviceController>,
    pub legacy: LegacyAdapter,
}

impl AppContext {
    /// Create a new application context from configuration
    pub async fn new(config: ServerConfig) -> OneLightResult<Self> {
        // Validate configuration
        config.validate()?;

        tokio::fs::create_dir_all(&config.storage.data_directory).await?;

        let db = db::create_pool(&config.storage.device_db, db::DatabaseOptions::default()).await?;
        db::run_migrations(&db).await?;
        db::test_connection(&db).await?;

        let clients = Self::build_clients(&config).await;
        Ok(Self::from_parts(config, db, clients))
    }

    /// Wire services over an existing pool and client set
    pub fn from_parts(config: ServerConfig, db: SqlitePool, clients: DeviceClients) -> Self {
        let store: Arc<dyn DeviceStore> = Arc::new(SqliteDeviceStore::new(db.clone()));

        let scanner = Arc::new(DiscoveryScanner::new(
            clients.discovery(),
            config.devices.scan_timeout,
            config.devices.scan_max_timeout,
        ));
        let guard = OwnershipGuard::new(store.clone());
        let controller = Arc::new(DeviceController::new(store.clone(), clients.clone()));
        let registrar = Arc::new(ProvisioningRegistrar::new(
            store.clone(),
            clients,
            controller.device_locks(),
        ));
        let legacy = LegacyAdapter::new(
            config.legacy.default_device_id,
            guard.clone(),
            controller.clone(),
        );

        Self {
            config: Arc::new(config),
            db,
            store,
            scanner,
            registrar,
            guard,
            controller,
            legacy,
        }
    }

    async fn build_clients(config: &ServerConfig) -> DeviceClients {
        let client: Arc<dyn DeviceClient> = match config.devices.backend {
            DeviceBackend::Kasa => {
                tracing::info!(
                    "Talking to Kasa plugs on port {} via {:?}",
                    config.devices.port,
                    config.devices.broadcast_targets
                );
                Arc::new(KasaClient::new(
                    config.devices.port,
                    config.devices.broadcast_targets.clone(),
                    config.devices.device_timeout,
                ))
            }
            DeviceBackend::Simulated => {
                let fleet = SimulatedFleet::new();
                for (ip, mac, model) in DEMO_PLUGS {
                    fleet.add_plug(ip, mac, model).await;
                }
                tracing::info!("Using simulated fleet with {} plugs", DEMO_PLUGS.len());
                Arc::new(fleet)
            }
        };

        DeviceClients::new(client)
    }

    /// Get the base service URL
    pub fn service_url(&self) -> String {
        format!("http://{}:{}", self.config.service.hostname, self.config.service.port)
    }
}
