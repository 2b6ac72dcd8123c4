/// Kasa LAN client
///
/// Discovery broadcasts an encrypted `get_sysinfo` datagram to every
/// configured target on the vendor port and collects whatever answers
/// before the window closes. If nothing has answered halfway through the
/// window, the datagram is sent once more to the fallback target. Status and relay commands use one short TCP
/// exchange per call, bounded by the configured device timeout.

use crate::{
    device::{protocol, DeviceClient, DiscoveryResponse, DiscoveryStream, RelayReading},
    error::{OneLightError, OneLightResult},
    models::DeviceStatus,
};
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde_json::Value;
use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, UdpSocket};
use tokio::time::{timeout, Instant};
use tracing::{debug, warn};

/// Largest discovery datagram we accept.
const MAX_DATAGRAM_SIZE: usize = 4096;

/// Client for the legacy Kasa protocol
#[derive(Debug, Clone)]
pub struct KasaClient {
    port: u16,
    broadcast_targets: Vec<Ipv4Addr>,
    fallback_target: Option<Ipv4Addr>,
    call_timeout: Duration,
}

/// Open discovery socket and the instant its window closes
struct DiscoveryWindow {
    socket: UdpSocket,
    deadline: Instant,
    buf: Vec<u8>,
    /// Where and when to resend the request if the window is still silent
    retry: Option<(SocketAddr, Instant)>,
    request: Vec<u8>,
}

impl KasaClient {
    /// The fallback target defaults to the global broadcast unless it is
    /// already one of `broadcast_targets`
    pub fn new(port: u16, broadcast_targets: Vec<Ipv4Addr>, call_timeout: Duration) -> Self {
        let fallback_target =
            (!broadcast_targets.contains(&Ipv4Addr::BROADCAST)).then_some(Ipv4Addr::BROADCAST);
        Self {
            port,
            broadcast_targets,
            fallback_target,
            call_timeout,
        }
    }

    pub fn with_fallback_target(mut self, target: Option<Ipv4Addr>) -> Self {
        self.fallback_target = target;
        self
    }

    fn device_addr(&self, ip: &str) -> OneLightResult<SocketAddr> {
        let ip = ip
            .parse()
            .map_err(|_| OneLightError::DeviceUnreachable(format!("Invalid device address '{}'", ip)))?;
        Ok(SocketAddr::new(ip, self.port))
    }

    /// One request/response exchange, bounded by the call timeout
    async fn exchange(&self, ip: &str, request: &Value) -> OneLightResult<Vec<u8>> {
        let addr = self.device_addr(ip)?;
        let framed = protocol::frame(request);

        match timeout(self.call_timeout, Self::round_trip(addr, &framed)).await {
            Ok(result) => result,
            Err(_) => Err(OneLightError::DeviceUnreachable(format!(
                "{} did not answer within {:?}",
                addr, self.call_timeout
            ))),
        }
    }

    async fn round_trip(addr: SocketAddr, framed: &[u8]) -> OneLightResult<Vec<u8>> {
        let unreachable =
            |e: std::io::Error| OneLightError::DeviceUnreachable(format!("{}: {}", addr, e));

        let mut stream = TcpStream::connect(addr).await.map_err(unreachable)?;
        stream.write_all(framed).await.map_err(unreachable)?;

        let mut header = [0u8; protocol::LENGTH_PREFIX];
        stream.read_exact(&mut header).await.map_err(unreachable)?;
        let len = protocol::frame_len(header)?;

        let mut body = vec![0u8; len];
        stream.read_exact(&mut body).await.map_err(unreachable)?;

        debug!("Received {} byte response from {}", len, addr);
        Ok(protocol::decrypt(&body))
    }

    /// Turn one datagram into a discovery response, if it is a plug answer
    fn decode_datagram(data: &[u8], from: SocketAddr) -> Option<DiscoveryResponse> {
        let plain = protocol::decrypt(data);
        let info = match protocol::parse_sysinfo(&plain) {
            Ok(info) => info,
            Err(e) => {
                debug!("Ignoring discovery datagram from {}: {}", from, e);
                return None;
            }
        };

        let mac = info.hardware_mac()?.to_string();
        Some(DiscoveryResponse {
            ip: from.ip().to_string(),
            mac,
            model: info.base_model().unwrap_or_else(|| "unknown".to_string()),
        })
    }
}

#[async_trait]
impl DeviceClient for KasaClient {
    async fn discover(&self, window: Duration) -> OneLightResult<DiscoveryStream> {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).await?;
        socket.set_broadcast(true)?;

        let request = protocol::encrypt(protocol::sysinfo_request().to_string().as_bytes());
        for target in &self.broadcast_targets {
            if let Err(e) = socket.send_to(&request, (*target, self.port)).await {
                warn!("Discovery request to {} failed: {}", target, e);
            }
        }

        let started = Instant::now();
        let state = DiscoveryWindow {
            socket,
            deadline: started + window,
            buf: vec![0u8; MAX_DATAGRAM_SIZE],
            retry: self
                .fallback_target
                .map(|target| (SocketAddr::from((target, self.port)), started + window / 2)),
            request,
        };

        let responses = stream::unfold(state, |mut state| async move {
            loop {
                let now = Instant::now();
                if now >= state.deadline {
                    return None;
                }

                if let Some((target, at)) = state.retry {
                    if now >= at {
                        state.retry = None;
                        debug!("No discovery answers yet, retrying via {}", target);
                        if let Err(e) = state.socket.send_to(&state.request, target).await {
                            warn!("Discovery retry to {} failed: {}", target, e);
                        }
                        continue;
                    }
                }

                let wake = match state.retry {
                    Some((_, at)) => at.min(state.deadline),
                    None => state.deadline,
                };

                match timeout(wake - now, state.socket.recv_from(&mut state.buf)).await {
                    Err(_) => continue,
                    Ok(Err(e)) => {
                        warn!("Discovery socket error: {}", e);
                        return None;
                    }
                    Ok(Ok((n, from))) => {
                        if let Some(response) = Self::decode_datagram(&state.buf[..n], from) {
                            // Someone answered, the primary targets work
                            state.retry = None;
                            return Some((response, state));
                        }
                    }
                }
            }
        });

        Ok(responses.boxed())
    }

    async fn get_status(&self, ip: &str) -> OneLightResult<RelayReading> {
        let plain = self.exchange(ip, &protocol::sysinfo_request()).await?;
        let on = protocol::parse_sysinfo(&plain)?.relay_on()?;

        Ok(RelayReading {
            status: DeviceStatus::from_relay(on),
            reachable: true,
        })
    }

    async fn set_relay(&self, ip: &str, on: bool) -> OneLightResult<DeviceStatus> {
        let plain = self.exchange(ip, &protocol::set_relay_request(on)).await?;
        let confirmed = protocol::parse_set_relay(&plain)?;

        if confirmed != on {
            return Err(OneLightError::Protocol(format!(
                "{} acknowledged the command but reports relay {}",
                ip,
                if confirmed { "on" } else { "off" }
            )));
        }
        Ok(DeviceStatus::from_relay(confirmed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    /// Serve one framed exchange on a local listener with a canned answer
    async fn fake_plug(answer: &'static str) -> (u16, tokio::task::JoinHandle<Value>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut header = [0u8; 4];
            socket.read_exact(&mut header).await.unwrap();
            let mut body = vec![0u8; u32::from_be_bytes(header) as usize];
            socket.read_exact(&mut body).await.unwrap();

            let reply = protocol::encrypt(answer.as_bytes());
            socket
                .write_all(&(reply.len() as u32).to_be_bytes())
                .await
                .unwrap();
            socket.write_all(&reply).await.unwrap();

            serde_json::from_slice(&protocol::decrypt(&body)).unwrap()
        });

        (port, handle)
    }

    fn client(port: u16) -> KasaClient {
        KasaClient::new(port, vec![Ipv4Addr::LOCALHOST], Duration::from_millis(500))
            .with_fallback_target(None)
    }

    const SYSINFO_ANSWER: &[u8] =
        br#"{"system":{"get_sysinfo":{"err_code":0,"model":"HS100(US)","mac":"aa:bb:cc:dd:ee:ff","relay_state":0}}}"#;

    #[tokio::test]
    async fn test_get_status_over_tcp() {
        let (port, plug) = fake_plug(
            r#"{"system":{"get_sysinfo":{"err_code":0,"relay_state":1,"mac":"AA:BB:CC:DD:EE:FF"}}}"#,
        )
        .await;

        let reading = client(port).get_status("127.0.0.1").await.unwrap();
        assert_eq!(reading.status, DeviceStatus::On);
        assert!(reading.reachable);
        assert_eq!(plug.await.unwrap(), protocol::sysinfo_request());
    }

    #[tokio::test]
    async fn test_set_relay_confirms_state() {
        let (port, plug) = fake_plug(
            r#"{"system":{"set_relay_state":{"err_code":0},"get_sysinfo":{"err_code":0,"relay_state":0}}}"#,
        )
        .await;

        let status = client(port).set_relay("127.0.0.1", false).await.unwrap();
        assert_eq!(status, DeviceStatus::Off);
        assert_eq!(plug.await.unwrap(), protocol::set_relay_request(false));
    }

    #[tokio::test]
    async fn test_malformed_answer_is_protocol_error() {
        let (port, _plug) = fake_plug(r#"{"system":{"set_relay_state":{"err_code":-3}}}"#).await;

        let err = client(port).set_relay("127.0.0.1", true).await.unwrap_err();
        assert!(matches!(err, OneLightError::Protocol(_)));
    }

    #[tokio::test]
    async fn test_refused_connection_is_unreachable() {
        // Bind then drop to get a port nobody listens on
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };

        let err = client(port).get_status("127.0.0.1").await.unwrap_err();
        assert!(matches!(err, OneLightError::DeviceUnreachable(_)));
    }

    #[tokio::test]
    async fn test_silent_device_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let _hold = tokio::spawn(async move {
            let (_socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        let started = Instant::now();
        let err = client(port).get_status("127.0.0.1").await.unwrap_err();
        assert!(matches!(err, OneLightError::DeviceUnreachable(_)));
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_discovery_collects_answers_until_window_closes() {
        let responder = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = responder.local_addr().unwrap().port();

        tokio::spawn(async move {
            let mut buf = [0u8; 1024];
            let (_, from) = responder.recv_from(&mut buf).await.unwrap();
            let answer = protocol::encrypt(SYSINFO_ANSWER);
            responder.send_to(&answer, from).await.unwrap();
            responder.send_to(b"garbage", from).await.unwrap();
        });

        let found: Vec<DiscoveryResponse> = client(port)
            .discover(Duration::from_millis(300))
            .await
            .unwrap()
            .collect()
            .await;

        assert_eq!(
            found,
            vec![DiscoveryResponse {
                ip: "127.0.0.1".to_string(),
                mac: "aa:bb:cc:dd:ee:ff".to_string(),
                model: "HS100".to_string(),
            }]
        );
    }

    #[tokio::test]
    async fn test_discovery_with_no_answers_is_empty() {
        let silent = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = silent.local_addr().unwrap().port();

        let found: Vec<DiscoveryResponse> = client(port)
            .discover(Duration::from_millis(100))
            .await
            .unwrap()
            .collect()
            .await;
        assert!(found.is_empty());
    }

    #[test]
    fn test_fallback_defaults_to_global_broadcast() {
        let subnet = KasaClient::new(9999, vec![Ipv4Addr::new(192, 168, 1, 255)], Duration::from_secs(1));
        assert_eq!(subnet.fallback_target, Some(Ipv4Addr::BROADCAST));

        let global = KasaClient::new(9999, vec![Ipv4Addr::BROADCAST], Duration::from_secs(1));
        assert_eq!(global.fallback_target, None);
    }

    #[tokio::test]
    async fn test_silent_targets_fall_back() {
        let responder = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = responder.local_addr().unwrap().port();

        let requests = tokio::spawn(async move {
            let mut buf = [0u8; 1024];
            let (_, from) = responder.recv_from(&mut buf).await.unwrap();
            responder
                .send_to(&protocol::encrypt(SYSINFO_ANSWER), from)
                .await
                .unwrap();
            from
        });

        // Nothing listens on the documentation-range primary target
        let found: Vec<DiscoveryResponse> =
            KasaClient::new(port, vec![Ipv4Addr::new(192, 0, 2, 1)], Duration::from_millis(500))
                .with_fallback_target(Some(Ipv4Addr::LOCALHOST))
                .discover(Duration::from_millis(400))
                .await
                .unwrap()
                .collect()
                .await;

        assert_eq!(found.len(), 1);
        assert_eq!(found[0].mac, "aa:bb:cc:dd:ee:ff");
        requests.await.unwrap();
    }
}
