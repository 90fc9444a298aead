//! S7 device session over tokio TCP

use super::packet;
use async_trait::async_trait;
use icsprobe_core::{
    DeviceSession, Error, MemoryWindow, Result, SessionInfo, SessionState, TransportKind,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

/// Connection parameters for an S7 PLC
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct S7Config {
    pub host: String,
    pub port: u16,
    pub rack: u16,
    pub slot: u16,
}

impl S7Config {
    /// Config with the default S7 port, rack 0, slot 0
    pub fn new<S: Into<String>>(host: S) -> Self {
        Self {
            host: host.into(),
            port: packet::ISO_TCP_PORT,
            rack: 0,
            slot: 0,
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_rack_slot(mut self, rack: u16, slot: u16) -> Self {
        self.rack = rack;
        self.slot = slot;
        self
    }

    fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// One S7comm session to a PLC.
///
/// Holds at most one TCP connection; requests are strictly sequential.
/// A mid-exchange I/O failure tears the session down to `Disconnected`
/// because the PLC's COTP association is gone with the socket.
pub struct S7Session {
    config: S7Config,
    endpoint: String,
    stream: Option<TcpStream>,
    state: SessionState,
    pdu_size: u16,
    pdu_ref: u16,
}

impl S7Session {
    pub fn new(config: S7Config) -> Self {
        let endpoint = config.endpoint();
        Self {
            config,
            endpoint,
            stream: None,
            state: SessionState::Disconnected,
            pdu_size: packet::REQUESTED_PDU_SIZE,
            pdu_ref: 0,
        }
    }

    /// Negotiated PDU size, meaningful once connected
    pub fn pdu_size(&self) -> u16 {
        self.pdu_size
    }

    /// Point the session at a different PLC.
    ///
    /// An active session to another endpoint is disconnected first so
    /// the old connection is never silently leaked.
    pub async fn retarget(&mut self, config: S7Config) {
        if self.config != config {
            self.disconnect().await;
            self.endpoint = config.endpoint();
            self.config = config;
        }
    }

    fn next_pdu_ref(&mut self) -> u16 {
        self.pdu_ref = self.pdu_ref.wrapping_add(1);
        self.pdu_ref
    }

    fn require_connected(&self) -> Result<()> {
        if self.state == SessionState::Connected {
            Ok(())
        } else {
            Err(Error::NotConnected)
        }
    }

    /// Send one TPKT frame and read back the full response frame.
    ///
    /// Any I/O failure here is unrecoverable for the session.
    async fn exchange(&mut self, request: &[u8]) -> Result<Vec<u8>> {
        let stream = self.stream.as_mut().ok_or(Error::NotConnected)?;
        let result = Self::exchange_inner(stream, request).await;
        if result.is_err() {
            warn!(endpoint = %self.endpoint, "I/O failure, tearing session down");
            self.stream = None;
            self.state = SessionState::Disconnected;
        }
        result
    }

    async fn exchange_inner(stream: &mut TcpStream, request: &[u8]) -> Result<Vec<u8>> {
        stream.write_all(request).await?;

        let mut header = [0u8; 4];
        stream.read_exact(&mut header).await?;
        let total = usize::from(u16::from_be_bytes([header[2], header[3]]));
        if total < 4 {
            return Err(Error::protocol("TPKT frame shorter than its own header"));
        }
        let mut frame = vec![0u8; total];
        frame[..4].copy_from_slice(&header);
        stream.read_exact(&mut frame[4..]).await?;
        Ok(frame)
    }

    /// Largest data slice carried by one read-var PDU
    fn read_chunk_size(&self) -> u16 {
        self.pdu_size.saturating_sub(packet::READ_OVERHEAD).max(1)
    }

    /// Largest data slice carried by one write-var PDU
    fn write_chunk_size(&self) -> u16 {
        self.pdu_size.saturating_sub(packet::WRITE_OVERHEAD).max(1)
    }
}

#[async_trait]
impl DeviceSession for S7Session {
    async fn connect(&mut self) -> Result<SessionInfo> {
        if self.state == SessionState::Connected {
            debug!(endpoint = %self.endpoint, "connect is a no-op, already connected");
            return Ok(SessionInfo {
                transport: TransportKind::S7,
                endpoint: self.endpoint.clone(),
                identity: format!("S7 PDU size {}", self.pdu_size),
            });
        }

        self.state = SessionState::Connecting;
        let mut stream = TcpStream::connect(&self.endpoint).await.map_err(|e| {
            self.state = SessionState::Disconnected;
            Error::connect_hint(
                format!("{}: {}", self.endpoint, e),
                "verify host and port; S7comm listens on 102 by default",
            )
        })?;

        // COTP connection setup carries the rack/slot TSAP; a refusal
        // here usually means the TSAP is wrong for this CPU.
        let cr = packet::connect_request(self.config.rack, self.config.slot);
        let confirm = Self::exchange_inner(&mut stream, &cr).await.map_err(|e| {
            self.state = SessionState::Disconnected;
            Error::connect_hint(
                format!("COTP negotiation with {} failed: {}", self.endpoint, e),
                "wrong rack/slot? S7-300 is usually rack 0 slot 2, S7-1200/1500 rack 0 slot 0",
            )
        })?;
        packet::parse_connect_confirm(&confirm).map_err(|e| {
            self.state = SessionState::Disconnected;
            Error::connect_hint(
                e.to_string(),
                "wrong rack/slot? S7-300 is usually rack 0 slot 2, S7-1200/1500 rack 0 slot 0",
            )
        })?;

        let setup = packet::setup_request(1, packet::REQUESTED_PDU_SIZE);
        let ack = Self::exchange_inner(&mut stream, &setup).await.map_err(|e| {
            self.state = SessionState::Disconnected;
            Error::connect(format!("S7 setup communication failed: {}", e))
        })?;
        let negotiated = packet::parse_setup_response(&ack).map_err(|e| {
            self.state = SessionState::Disconnected;
            Error::connect(format!("S7 setup communication failed: {}", e))
        })?;

        self.pdu_size = negotiated.min(packet::REQUESTED_PDU_SIZE);
        self.pdu_ref = 1;
        self.stream = Some(stream);
        self.state = SessionState::Connected;
        info!(
            endpoint = %self.endpoint,
            pdu_size = self.pdu_size,
            "S7 session established"
        );

        Ok(SessionInfo {
            transport: TransportKind::S7,
            endpoint: self.endpoint.clone(),
            identity: format!("S7 PDU size {}", self.pdu_size),
        })
    }

    async fn read(&mut self, window: &MemoryWindow) -> Result<Vec<u8>> {
        self.require_connected()?;
        window.validate()?;

        let chunk = self.read_chunk_size();
        let mut out = Vec::with_capacity(usize::from(window.length));
        let mut remaining = window.length;
        let mut offset = window.offset;

        while remaining > 0 {
            let this_len = remaining.min(chunk);
            let piece = MemoryWindow::new(window.block, offset, this_len);
            let pdu_ref = self.next_pdu_ref();
            let request = packet::read_request(pdu_ref, &piece)?;
            let response = self.exchange(&request).await?;
            let data = packet::parse_read_response(&response)?;
            if data.len() != usize::from(this_len) {
                return Err(Error::ShortRead {
                    expected: usize::from(this_len),
                    actual: data.len(),
                });
            }
            out.extend_from_slice(&data);
            remaining -= this_len;
            offset += u32::from(this_len);
        }

        Ok(out)
    }

    async fn write(&mut self, window: &MemoryWindow, data: &[u8]) -> Result<()> {
        self.require_connected()?;
        window.validate_write(data)?;

        let chunk = usize::from(self.write_chunk_size());
        let mut offset = window.offset;
        for piece in data.chunks(chunk) {
            let piece_window = MemoryWindow::new(window.block, offset, piece.len() as u16);
            let pdu_ref = self.next_pdu_ref();
            let request = packet::write_request(pdu_ref, &piece_window, piece)?;
            let response = self.exchange(&request).await?;
            packet::parse_write_response(&response)?;
            offset += piece.len() as u32;
        }

        Ok(())
    }

    async fn disconnect(&mut self) {
        if self.stream.take().is_some() {
            info!(endpoint = %self.endpoint, "S7 session closed");
        }
        self.state = SessionState::Disconnected;
    }

    fn state(&self) -> SessionState {
        self.state
    }

    fn transport(&self) -> TransportKind {
        TransportKind::S7
    }

    fn current_endpoint(&self) -> Option<&str> {
        Some(&self.endpoint)
    }
}
