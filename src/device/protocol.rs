/// Kasa legacy wire protocol
///
/// Requests and responses are JSON documents obfuscated with an XOR autokey
/// cipher seeded with 171. Over TCP each payload is preceded by its length:
///
/// ```text
/// [0..4]  payload length (u32 BE)
/// [4..]   encrypted JSON
/// ```
///
/// UDP discovery datagrams carry the encrypted JSON with no length prefix.

use crate::error::{OneLightError, OneLightResult};
use serde::Deserialize;
use serde_json::{json, Value};

/// Initial key of the autokey cipher.
const INITIAL_KEY: u8 = 171;

/// TCP length prefix size.
pub const LENGTH_PREFIX: usize = 4;

/// Largest response we are willing to buffer from a plug.
pub const MAX_RESPONSE_SIZE: usize = 64 * 1024;

pub fn encrypt(plain: &[u8]) -> Vec<u8> {
    let mut key = INITIAL_KEY;
    plain
        .iter()
        .map(|b| {
            key ^= b;
            key
        })
        .collect()
}

pub fn decrypt(cipher: &[u8]) -> Vec<u8> {
    let mut key = INITIAL_KEY;
    cipher
        .iter()
        .map(|c| {
            let plain = key ^ c;
            key = *c;
            plain
        })
        .collect()
}

/// Encrypt and prefix with the big-endian length for a TCP exchange
pub fn frame(request: &Value) -> Vec<u8> {
    let body = encrypt(request.to_string().as_bytes());
    let mut out = Vec::with_capacity(LENGTH_PREFIX + body.len());
    out.extend_from_slice(&(body.len() as u32).to_be_bytes());
    out.extend_from_slice(&body);
    out
}

/// Read the payload length out of a TCP frame header
pub fn frame_len(header: [u8; LENGTH_PREFIX]) -> OneLightResult<usize> {
    let len = u32::from_be_bytes(header) as usize;
    if len == 0 || len > MAX_RESPONSE_SIZE {
        return Err(OneLightError::Protocol(format!(
            "Response length {} out of range",
            len
        )));
    }
    Ok(len)
}

pub fn sysinfo_request() -> Value {
    json!({ "system": { "get_sysinfo": {} } })
}

/// Set the relay and read back sysinfo in the same round trip
pub fn set_relay_request(on: bool) -> Value {
    let state = u8::from(on);
    json!({
        "system": {
            "set_relay_state": { "state": state },
            "get_sysinfo": {}
        }
    })
}

#[derive(Debug, Deserialize)]
struct Envelope {
    system: SystemSection,
}

#[derive(Debug, Deserialize)]
struct SystemSection {
    get_sysinfo: Option<SysInfo>,
    set_relay_state: Option<CommandAck>,
}

#[derive(Debug, Deserialize)]
struct CommandAck {
    #[serde(default)]
    err_code: i64,
    err_msg: Option<String>,
}

/// The subset of `get_sysinfo` we care about
#[derive(Debug, Clone, Deserialize)]
pub struct SysInfo {
    #[serde(default)]
    pub err_code: i64,
    pub model: Option<String>,
    pub mac: Option<String>,
    pub mic_mac: Option<String>,
    pub relay_state: Option<u8>,
    pub alias: Option<String>,
}

impl SysInfo {
    /// Model without the region suffix, e.g. `HS100(US)` -> `HS100`
    pub fn base_model(&self) -> Option<String> {
        self.model
            .as_deref()
            .map(|m| m.split('(').next().unwrap_or(m).trim().to_string())
            .filter(|m| !m.is_empty())
    }

    pub fn hardware_mac(&self) -> Option<&str> {
        self.mac.as_deref().or(self.mic_mac.as_deref())
    }

    pub fn relay_on(&self) -> OneLightResult<bool> {
        match self.relay_state {
            Some(0) => Ok(false),
            Some(1) => Ok(true),
            Some(other) => Err(OneLightError::Protocol(format!(
                "Unexpected relay_state {}",
                other
            ))),
            None => Err(OneLightError::Protocol("Missing relay_state".to_string())),
        }
    }
}

fn parse_envelope(plain: &[u8]) -> OneLightResult<Envelope> {
    serde_json::from_slice(plain)
        .map_err(|e| OneLightError::Protocol(format!("Undecodable response: {}", e)))
}

fn checked_sysinfo(section: SystemSection) -> OneLightResult<SysInfo> {
    let info = section
        .get_sysinfo
        .ok_or_else(|| OneLightError::Protocol("Missing get_sysinfo".to_string()))?;
    if info.err_code != 0 {
        return Err(OneLightError::Protocol(format!(
            "get_sysinfo failed with err_code {}",
            info.err_code
        )));
    }
    Ok(info)
}

/// Decode a decrypted `get_sysinfo` response
pub fn parse_sysinfo(plain: &[u8]) -> OneLightResult<SysInfo> {
    checked_sysinfo(parse_envelope(plain)?.system)
}

/// Decode a decrypted set-relay response and return the confirmed relay state
pub fn parse_set_relay(plain: &[u8]) -> OneLightResult<bool> {
    let system = parse_envelope(plain)?.system;

    let ack = system
        .set_relay_state
        .as_ref()
        .ok_or_else(|| OneLightError::Protocol("Missing set_relay_state".to_string()))?;
    if ack.err_code != 0 {
        return Err(OneLightError::Protocol(format!(
            "set_relay_state failed with err_code {}: {}",
            ack.err_code,
            ack.err_msg.as_deref().unwrap_or("no message")
        )));
    }

    checked_sysinfo(system)?.relay_on()
}
