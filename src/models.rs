/// Domain models shared by the store, the device clients and the API
use crate::error::{OneLightError, OneLightResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Relay state as last observed by the service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceStatus {
    Unknown,
    On,
    Off,
    Unreachable,
}

impl DeviceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceStatus::Unknown => "unknown",
            DeviceStatus::On => "on",
            DeviceStatus::Off => "off",
            DeviceStatus::Unreachable => "unreachable",
        }
    }

    pub fn from_relay(on: bool) -> Self {
        if on {
            DeviceStatus::On
        } else {
            DeviceStatus::Off
        }
    }
}

impl fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeviceStatus {
    type Err = OneLightError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unknown" => Ok(DeviceStatus::Unknown),
            "on" => Ok(DeviceStatus::On),
            "off" => Ok(DeviceStatus::Off),
            "unreachable" => Ok(DeviceStatus::Unreachable),
            other => Err(OneLightError::ConstraintViolation(format!(
                "Unknown device status '{}'",
                other
            ))),
        }
    }
}

/// Hardware address in canonical `AA:BB:CC:DD:EE:FF` form
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MacAddress(String);

impl MacAddress {
    /// Parse a mac written with `:`/`-` separators or none, in any case
    pub fn parse(raw: &str) -> OneLightResult<Self> {
        let hex: String = raw
            .trim()
            .chars()
            .filter(|c| *c != ':' && *c != '-')
            .collect();

        if hex.len() != 12 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(OneLightError::Validation(format!("Invalid mac address '{}'", raw)));
        }

        let upper = hex.to_ascii_uppercase();
        let octets: Vec<&str> = (0..6).map(|i| &upper[i * 2..i * 2 + 2]).collect();
        Ok(MacAddress(octets.join(":")))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for MacAddress {
    type Error = OneLightError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        MacAddress::parse(&value)
    }
}

impl From<MacAddress> for String {
    fn from(mac: MacAddress) -> Self {
        mac.0
    }
}

/// A user as seen by the ownership model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
}

/// Input for creating a user (signup lives elsewhere)
#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub password_hash: String,
}

/// A persisted plug
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    pub id: i64,
    pub name: String,
    pub model: String,
    pub owner_id: i64,
    pub ip: String,
    pub mac: MacAddress,
    pub status: DeviceStatus,
    pub last_seen: Option<DateTime<Utc>>,
    pub provisioned: bool,
    pub created_at: DateTime<Utc>,
}

/// A discovered, not yet claimed device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    pub ip: String,
    pub mac: MacAddress,
    pub model: String,
}

/// Everything needed to persist a freshly claimed device
#[derive(Debug, Clone)]
pub struct NewDevice {
    pub name: String,
    pub model: String,
    pub owner_id: i64,
    pub ip: String,
    pub mac: MacAddress,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mac_normalisation() {
        let canonical = "AA:BB:CC:DD:EE:FF";
        for raw in ["aa:bb:cc:dd:ee:ff", "AA-BB-CC-DD-EE-FF", "aabbccddeeff", " Aa:bB:cc:DD:ee:Ff "] {
            assert_eq!(MacAddress::parse(raw).unwrap().as_str(), canonical);
        }
    }

    #[test]
    fn test_mac_rejects_garbage() {
        assert!(MacAddress::parse("").is_err());
        assert!(MacAddress::parse("AA:BB:CC:DD:EE").is_err());
        assert!(MacAddress::parse("GG:BB:CC:DD:EE:FF").is_err());
    }

    #[test]
    fn test_status_round_trip_through_text() {
        for status in [
            DeviceStatus::Unknown,
            DeviceStatus::On,
            DeviceStatus::Off,
            DeviceStatus::Unreachable,
        ] {
            assert_eq!(status.as_str().parse::<DeviceStatus>().unwrap(), status);
        }
        assert!("flickering".parse::<DeviceStatus>().is_err());
    }
}
