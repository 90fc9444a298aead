//! OPC-UA device session over tokio TCP

use super::cert::CertificateBundle;
use super::packet::{self, Acknowledge, OpenChannel};
use async_trait::async_trait;
use icsprobe_core::{
    DeviceSession, Error, MemoryWindow, MessageSecurityMode, Result, SecurityPolicy, SessionInfo,
    SessionState, TransportKind,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

/// Connection parameters for an OPC-UA server
#[derive(Debug, Clone)]
pub struct OpcUaConfig {
    pub endpoint_url: String,
    pub security_policy: SecurityPolicy,
    pub security_mode: MessageSecurityMode,
    pub certificate: Option<CertificateBundle>,
    /// Namespace index holding the memory block variables
    pub namespace: u16,
}

impl OpcUaConfig {
    /// Config with security disabled and namespace 2
    pub fn new<S: Into<String>>(endpoint_url: S) -> Self {
        Self {
            endpoint_url: endpoint_url.into(),
            security_policy: SecurityPolicy::None,
            security_mode: MessageSecurityMode::None,
            certificate: None,
            namespace: 2,
        }
    }

    pub fn with_security(mut self, policy: SecurityPolicy, mode: MessageSecurityMode) -> Self {
        self.security_policy = policy;
        self.security_mode = mode;
        self
    }

    pub fn with_certificate(mut self, bundle: CertificateBundle) -> Self {
        self.certificate = Some(bundle);
        self
    }

    pub fn with_namespace(mut self, namespace: u16) -> Self {
        self.namespace = namespace;
        self
    }
}

/// Reduce an `opc.tcp://` endpoint URL to its host:port authority
fn socket_address(endpoint_url: &str) -> Result<String> {
    let rest = endpoint_url.strip_prefix("opc.tcp://").ok_or_else(|| {
        Error::invalid_parameter(
            "endpoint",
            format!("'{}' must start with opc.tcp://", endpoint_url),
        )
    })?;
    let authority = rest.split('/').next().unwrap_or(rest);
    if authority.is_empty() {
        return Err(Error::invalid_parameter("endpoint", "missing host"));
    }
    if authority.contains(':') {
        Ok(authority.to_string())
    } else {
        Ok(format!("{}:{}", authority, packet::OPC_TCP_PORT))
    }
}

/// One OPC-UA session to a server.
///
/// Memory windows map onto ByteString variables: the block number is
/// the numeric node id within the configured namespace, and the
/// offset/length select bytes through an index range. Requests are
/// strictly sequential; a mid-exchange I/O failure tears the session
/// down to `Disconnected` along with its secure channel.
pub struct OpcUaSession {
    config: OpcUaConfig,
    stream: Option<TcpStream>,
    state: SessionState,
    channel: Option<OpenChannel>,
    ack: Option<Acknowledge>,
    sequence: u32,
    request_id: u32,
}

impl OpcUaSession {
    pub fn new(config: OpcUaConfig) -> Self {
        Self {
            config,
            stream: None,
            state: SessionState::Disconnected,
            channel: None,
            ack: None,
            sequence: 1,
            request_id: 1,
        }
    }

    /// Transport limits acknowledged by the server, once connected
    pub fn acknowledge(&self) -> Option<&Acknowledge> {
        self.ack.as_ref()
    }

    /// Hello/Acknowledge probe without opening a secure channel.
    ///
    /// Reports the server's transport limits, useful for checking that
    /// an endpoint speaks OPC-UA binary before committing to a session.
    pub async fn probe(endpoint_url: &str) -> Result<Acknowledge> {
        let addr = socket_address(endpoint_url)?;
        let mut stream = TcpStream::connect(&addr).await.map_err(|e| {
            Error::connect_hint(
                format!("{}: {}", addr, e),
                "verify the endpoint URL; OPC-UA servers listen on 4840 by default",
            )
        })?;
        let reply = Self::exchange_inner(&mut stream, &packet::hello(endpoint_url)).await?;
        packet::parse_acknowledge(&reply)
    }

    /// Point the session at a different server.
    ///
    /// An active secure channel that no longer matches the new
    /// endpoint or security parameters is closed first so the old
    /// connection is never silently leaked.
    pub async fn retarget(&mut self, config: OpcUaConfig) {
        let same_target = self.config.endpoint_url == config.endpoint_url
            && self.config.security_policy == config.security_policy
            && self.config.security_mode == config.security_mode;
        if !same_target {
            self.disconnect().await;
        }
        self.config = config;
    }

    fn next_ids(&mut self) -> (u32, u32) {
        self.sequence += 1;
        self.request_id += 1;
        (self.sequence, self.request_id)
    }

    fn require_connected(&self) -> Result<OpenChannel> {
        match (self.state, self.channel) {
            (SessionState::Connected, Some(channel)) => Ok(channel),
            _ => Err(Error::NotConnected),
        }
    }

    fn session_info(&self) -> SessionInfo {
        let identity = match (&self.channel, &self.ack) {
            (Some(channel), Some(ack)) => format!(
                "OPC-UA channel {}, send buffer {}, receive buffer {}",
                channel.channel_id, ack.send_buffer_size, ack.receive_buffer_size
            ),
            _ => "OPC-UA (not connected)".to_string(),
        };
        SessionInfo {
            transport: TransportKind::OpcUa,
            endpoint: self.config.endpoint_url.clone(),
            identity,
        }
    }

    fn fail_connect(&mut self, err: Error) -> Error {
        self.state = SessionState::Disconnected;
        self.stream = None;
        err
    }

    /// Send one message and read back the full response message.
    ///
    /// Any I/O failure here is unrecoverable for the session.
    async fn exchange(&mut self, request: &[u8]) -> Result<Vec<u8>> {
        let stream = self.stream.as_mut().ok_or(Error::NotConnected)?;
        let result = Self::exchange_inner(stream, request).await;
        if result.is_err() {
            warn!(endpoint = %self.config.endpoint_url, "I/O failure, tearing session down");
            self.stream = None;
            self.channel = None;
            self.state = SessionState::Disconnected;
        }
        result
    }

    async fn exchange_inner(stream: &mut TcpStream, request: &[u8]) -> Result<Vec<u8>> {
        stream.write_all(request).await?;

        let mut header = [0u8; 8];
        stream.read_exact(&mut header).await?;
        let total =
            u32::from_le_bytes([header[4], header[5], header[6], header[7]]) as usize;
        if total < 8 {
            return Err(Error::protocol("message shorter than its own header"));
        }
        let mut frame = vec![0u8; total];
        frame[..8].copy_from_slice(&header);
        stream.read_exact(&mut frame[8..]).await?;
        Ok(frame)
    }
}

#[async_trait]
impl DeviceSession for OpcUaSession {
    async fn connect(&mut self) -> Result<SessionInfo> {
        if self.state == SessionState::Connected {
            debug!(endpoint = %self.config.endpoint_url, "connect is a no-op, already connected");
            return Ok(self.session_info());
        }

        if self.config.security_policy.requires_certificate() && self.config.certificate.is_none()
        {
            return Err(Error::connect_hint(
                format!(
                    "security policy {} requires a client certificate",
                    self.config.security_policy
                ),
                "generate one with the gen-cert command, or use security policy None",
            ));
        }
        let client_certificate = match &self.config.certificate {
            Some(bundle) => Some(bundle.der()?),
            None => None,
        };

        let addr = socket_address(&self.config.endpoint_url)?;
        self.state = SessionState::Connecting;
        let mut stream = match TcpStream::connect(&addr).await {
            Ok(stream) => stream,
            Err(e) => {
                return Err(self.fail_connect(Error::connect_hint(
                    format!("{}: {}", addr, e),
                    "verify the endpoint URL; OPC-UA servers listen on 4840 by default",
                )))
            }
        };

        let hello = packet::hello(&self.config.endpoint_url);
        let ack = match Self::exchange_inner(&mut stream, &hello).await {
            Ok(reply) => match packet::parse_acknowledge(&reply) {
                Ok(ack) => ack,
                Err(e) => {
                    return Err(self.fail_connect(Error::connect(format!(
                        "transport negotiation with {} failed: {}",
                        addr, e
                    ))))
                }
            },
            Err(e) => {
                return Err(self.fail_connect(Error::connect(format!(
                    "transport negotiation with {} failed: {}",
                    addr, e
                ))))
            }
        };

        let open = packet::open_channel_request(
            self.config.security_policy,
            self.config.security_mode,
            client_certificate.as_deref(),
            None,
        );
        let channel = match Self::exchange_inner(&mut stream, &open).await {
            Ok(reply) => match packet::parse_open_channel_response(&reply) {
                Ok(channel) => channel,
                Err(e) => {
                    return Err(self.fail_connect(Error::connect_hint(
                        e.to_string(),
                        "server rejected the secure channel; check the security policy and \
                         mode against the server's endpoints, or add the client certificate \
                         to the server's trust list",
                    )))
                }
            },
            Err(e) => {
                return Err(self.fail_connect(Error::connect(format!(
                    "OpenSecureChannel with {} failed: {}",
                    addr, e
                ))))
            }
        };

        self.stream = Some(stream);
        self.channel = Some(channel);
        self.ack = Some(ack);
        self.sequence = 1;
        self.request_id = 1;
        self.state = SessionState::Connected;
        info!(
            endpoint = %self.config.endpoint_url,
            channel_id = channel.channel_id,
            policy = %self.config.security_policy,
            "OPC-UA session established"
        );

        Ok(self.session_info())
    }

    async fn read(&mut self, window: &MemoryWindow) -> Result<Vec<u8>> {
        let channel = self.require_connected()?;
        window.validate()?;

        let range = packet::index_range(window.offset, window.length);
        let (sequence, request_id) = self.next_ids();
        let request = packet::read_request(
            &channel,
            sequence,
            request_id,
            self.config.namespace,
            u32::from(window.block),
            &range,
        );
        let response = self.exchange(&request).await?;
        let data = packet::parse_read_response(&response)?;
        if data.len() != usize::from(window.length) {
            return Err(Error::ShortRead {
                expected: usize::from(window.length),
                actual: data.len(),
            });
        }
        Ok(data)
    }

    async fn write(&mut self, window: &MemoryWindow, data: &[u8]) -> Result<()> {
        let channel = self.require_connected()?;
        window.validate_write(data)?;

        let range = packet::index_range(window.offset, window.length);
        let (sequence, request_id) = self.next_ids();
        let request = packet::write_request(
            &channel,
            sequence,
            request_id,
            self.config.namespace,
            u32::from(window.block),
            &range,
            data,
        );
        let response = self.exchange(&request).await?;
        packet::parse_write_response(&response)
    }

    async fn disconnect(&mut self) {
        if let (Some(mut stream), Some(channel)) = (self.stream.take(), self.channel.take()) {
            // best-effort close, the server drops the channel either way
            let (sequence, request_id) = self.next_ids();
            let close = packet::close_channel_request(&channel, sequence, request_id);
            let _ = stream.write_all(&close).await;
            info!(endpoint = %self.config.endpoint_url, "OPC-UA session closed");
        }
        self.channel = None;
        self.state = SessionState::Disconnected;
    }

    fn state(&self) -> SessionState {
        self.state
    }

    fn transport(&self) -> TransportKind {
        TransportKind::OpcUa
    }

    fn current_endpoint(&self) -> Option<&str> {
        Some(&self.config.endpoint_url)
    }
}
