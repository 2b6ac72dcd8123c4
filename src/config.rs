/// Configuration management for OneLight
use crate::error::{OneLightError, OneLightResult};
use serde::{Deserialize, Serialize};
use std::env;
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::time::Duration;

/// Main server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub service: ServiceConfig,
    pub storage: StorageConfig,
    pub authentication: AuthConfig,
    pub devices: DeviceConfig,
    pub legacy: LegacyConfig,
    pub logging: LoggingConfig,
}

/// Service-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub hostname: String,
    pub port: u16,
    pub version: String,
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub data_directory: PathBuf,
    pub device_db: PathBuf,
}

/// Authentication configuration
///
/// Logins are handled by an external service; we only verify the tokens it issues.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    pub jwt_secret: String,
}

/// Which DeviceClient implementation talks to plugs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceBackend {
    /// Real plugs on the LAN
    Kasa,
    /// In-process virtual plugs
    Simulated,
}

/// Device network configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    pub backend: DeviceBackend,
    pub broadcast_targets: Vec<Ipv4Addr>,
    pub port: u16,
    pub scan_timeout: Duration,
    pub scan_max_timeout: Duration,
    pub device_timeout: Duration,
}

/// Legacy single-device routes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LegacyConfig {
    /// Device id the fixed legacy routes act on
    pub default_device_id: Option<i64>,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Filter used when `RUST_LOG` is unset
    pub level: String,
    /// One JSON object per line instead of human-readable text
    pub json: bool,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            backend: DeviceBackend::Kasa,
            broadcast_targets: vec![Ipv4Addr::BROADCAST],
            port: 9999,
            scan_timeout: Duration::from_millis(3000),
            scan_max_timeout: Duration::from_millis(10_000),
            device_timeout: Duration::from_millis(2000),
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> OneLightResult<Self> {
        dotenv::dotenv().ok();

        let hostname = env::var("ONELIGHT_HOSTNAME").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = env::var("ONELIGHT_PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse()
            .map_err(|_| OneLightError::Validation("Invalid port number".to_string()))?;
        let version = env!("CARGO_PKG_VERSION").to_string();

        let data_directory: PathBuf = env::var("ONELIGHT_DATA_DIRECTORY")
            .unwrap_or_else(|_| "./data".to_string())
            .into();
        let device_db = env::var("ONELIGHT_DB_LOCATION")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_directory.join("onelight.sqlite"));

        let jwt_secret = env::var("ONELIGHT_JWT_SECRET")
            .map_err(|_| OneLightError::Validation("JWT secret required".to_string()))?;

        let backend = match env::var("ONELIGHT_DEVICE_BACKEND")
            .unwrap_or_else(|_| "kasa".to_string())
            .to_lowercase()
            .as_str()
        {
            "kasa" => DeviceBackend::Kasa,
            "simulated" => DeviceBackend::Simulated,
            other => {
                return Err(OneLightError::Validation(format!(
                    "Unknown device backend '{}'",
                    other
                )))
            }
        };

        let broadcast_targets = match env::var("ONELIGHT_BROADCAST_TARGETS") {
            Ok(raw) if !raw.trim().is_empty() => parse_targets(&raw)?,
            _ => crate::device::interfaces::detect_broadcast_targets(),
        };
        let device_port = env::var("ONELIGHT_DISCOVERY_PORT")
            .unwrap_or_else(|_| "9999".to_string())
            .parse()
            .map_err(|_| OneLightError::Validation("Invalid discovery port".to_string()))?;

        let scan_timeout = millis_var("ONELIGHT_SCAN_TIMEOUT_MS", 3000)?;
        let scan_max_timeout = millis_var("ONELIGHT_SCAN_MAX_TIMEOUT_MS", 10_000)?;
        let device_timeout = millis_var("ONELIGHT_DEVICE_TIMEOUT_MS", 2000)?;

        let default_device_id = match env::var("ONELIGHT_DEFAULT_DEVICE_ID") {
            Ok(raw) if !raw.trim().is_empty() => Some(raw.trim().parse().map_err(|_| {
                OneLightError::Validation("Invalid default device id".to_string())
            })?),
            _ => None,
        };

        let log_level = env::var("ONELIGHT_LOG_LEVEL")
            .unwrap_or_else(|_| "onelight=debug,tower_http=debug".to_string());
        let log_json = env::var("ONELIGHT_LOG_FORMAT")
            .map(|f| f.eq_ignore_ascii_case("json"))
            .unwrap_or(false);

        Ok(ServerConfig {
            service: ServiceConfig {
                hostname,
                port,
                version,
            },
            storage: StorageConfig {
                data_directory,
                device_db,
            },
            authentication: AuthConfig { jwt_secret },
            devices: DeviceConfig {
                backend,
                broadcast_targets,
                port: device_port,
                scan_timeout,
                scan_max_timeout,
                device_timeout,
            },
            legacy: LegacyConfig { default_device_id },
            logging: LoggingConfig {
                level: log_level,
                json: log_json,
            },
        })
    }

    /// Validate configuration
    pub fn validate(&self) -> OneLightResult<()> {
        if self.service.hostname.is_empty() {
            return Err(OneLightError::Validation("Hostname cannot be empty".to_string()));
        }

        if self.authentication.jwt_secret.len() < 32 {
            return Err(OneLightError::Validation(
                "JWT secret must be at least 32 characters".to_string(),
            ));
        }

        let devices = &self.devices;
        if devices.scan_timeout.is_zero() || devices.device_timeout.is_zero() {
            return Err(OneLightError::Validation(
                "Device and scan timeouts must be non-zero".to_string(),
            ));
        }
        if devices.scan_timeout > devices.scan_max_timeout {
            return Err(OneLightError::Validation(
                "Default scan window exceeds the maximum scan window".to_string(),
            ));
        }
        if devices.broadcast_targets.is_empty() {
            return Err(OneLightError::Validation(
                "At least one broadcast target is required".to_string(),
            ));
        }

        Ok(())
    }
}

fn millis_var(name: &str, default: u64) -> OneLightResult<Duration> {
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Duration::from_millis)
            .map_err(|_| OneLightError::Validation(format!("Invalid value for {}", name))),
        Err(_) => Ok(Duration::from_millis(default)),
    }
}

fn parse_targets(raw: &str) -> OneLightResult<Vec<Ipv4Addr>> {
    raw.split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse()
                .map_err(|_| OneLightError::Validation(format!("Invalid broadcast target '{}'", s)))
        })
        .collect()
}
