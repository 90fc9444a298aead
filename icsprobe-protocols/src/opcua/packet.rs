//! OPC-UA binary message structures and parsing
//!
//! All integers are little-endian per the OPC-UA binary encoding.
//! Builders emit complete messages (header included), parsers consume
//! complete messages, so the response builders double as a mock server
//! for tests.

use bytes::{BufMut, Bytes, BytesMut};
use icsprobe_core::{Error, MessageSecurityMode, Result, SecurityPolicy};

/// Default OPC-UA TCP port
pub const OPC_TCP_PORT: u16 = 4840;

/// Transport protocol version sent in Hello
pub const PROTOCOL_VERSION: u32 = 0;

/// Buffer sizes advertised in Hello
pub const DEFAULT_BUFFER_SIZE: u32 = 65_536;

/// Requested secure channel lifetime in milliseconds
pub const CHANNEL_LIFETIME_MS: u32 = 3_600_000;

/// Message type tags (first three header bytes)
pub mod msg_type {
    pub const HELLO: &[u8; 3] = b"HEL";
    pub const ACKNOWLEDGE: &[u8; 3] = b"ACK";
    pub const ERROR: &[u8; 3] = b"ERR";
    pub const OPEN_CHANNEL: &[u8; 3] = b"OPN";
    pub const CLOSE_CHANNEL: &[u8; 3] = b"CLO";
    pub const MESSAGE: &[u8; 3] = b"MSG";
}

/// Binary encoding ids for the service structures we exchange
mod encoding_id {
    pub const OPEN_CHANNEL_REQUEST: u16 = 446;
    pub const OPEN_CHANNEL_RESPONSE: u16 = 449;
    pub const CLOSE_CHANNEL_REQUEST: u16 = 452;
    pub const READ_REQUEST: u16 = 631;
    pub const READ_RESPONSE: u16 = 634;
    pub const WRITE_REQUEST: u16 = 673;
    pub const WRITE_RESPONSE: u16 = 676;
    pub const SERVICE_FAULT: u16 = 397;
}

/// Attribute id of a variable's Value attribute
const ATTRIBUTE_VALUE: u32 = 13;

/// Variant type id for ByteString
const VARIANT_BYTESTRING: u8 = 15;

/// Human-readable name for common status codes
pub fn status_name(code: u32) -> &'static str {
    match code {
        0x0000_0000 => "Good",
        0x8013_0000 => "BadSecurityChecksFailed",
        0x801A_0000 => "BadCertificateUntrusted",
        0x801F_0000 => "BadUserAccessDenied",
        0x8034_0000 => "BadNodeIdUnknown",
        0x8036_0000 => "BadIndexRangeInvalid",
        0x8055_0000 => "BadSecurityPolicyRejected",
        0x8073_0000 => "BadWriteNotSupported",
        0x807E_0000 => "BadTcpMessageTypeInvalid",
        0x8082_0000 => "BadConnectionRejected",
        _ => "unknown status",
    }
}

/// Transport limits acknowledged by the server
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Acknowledge {
    pub protocol_version: u32,
    pub receive_buffer_size: u32,
    pub send_buffer_size: u32,
    pub max_message_size: u32,
    pub max_chunk_count: u32,
}

/// Secure channel identifiers returned by OpenSecureChannel
#[derive(Debug, Clone, Copy)]
pub struct OpenChannel {
    pub channel_id: u32,
    pub token_id: u32,
}

fn finish_message(kind: &[u8; 3], body: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(8 + body.len());
    buf.put_slice(kind);
    buf.put_u8(b'F'); // final chunk
    buf.put_u32_le(8 + body.len() as u32);
    buf.put_slice(body);
    buf.freeze()
}

fn put_string(buf: &mut BytesMut, value: Option<&str>) {
    match value {
        Some(s) => {
            buf.put_i32_le(s.len() as i32);
            buf.put_slice(s.as_bytes());
        }
        None => buf.put_i32_le(-1),
    }
}

fn put_bytestring(buf: &mut BytesMut, value: Option<&[u8]>) {
    match value {
        Some(b) => {
            buf.put_i32_le(b.len() as i32);
            buf.put_slice(b);
        }
        None => buf.put_i32_le(-1),
    }
}

/// Numeric node id in its most compact encoding
fn put_node_id(buf: &mut BytesMut, namespace: u16, id: u32) {
    if namespace == 0 && id <= 0xFF {
        buf.put_u8(0x00); // two-byte encoding
        buf.put_u8(id as u8);
    } else if namespace <= 0xFF && id <= 0xFFFF {
        buf.put_u8(0x01); // four-byte encoding
        buf.put_u8(namespace as u8);
        buf.put_u16_le(id as u16);
    } else {
        buf.put_u8(0x02); // numeric encoding
        buf.put_u16_le(namespace);
        buf.put_u32_le(id);
    }
}

fn put_encoding_id(buf: &mut BytesMut, id: u16) {
    buf.put_u8(0x01);
    buf.put_u8(0x00);
    buf.put_u16_le(id);
}

/// Minimal request header: null auth token, no diagnostics
fn put_request_header(buf: &mut BytesMut, request_handle: u32) {
    buf.put_u8(0x00); // auth token: two-byte node id
    buf.put_u8(0x00);
    buf.put_u64_le(0); // timestamp (null)
    buf.put_u32_le(request_handle);
    buf.put_u32_le(0); // return diagnostics
    buf.put_i32_le(-1); // audit entry id
    buf.put_u32_le(0); // timeout hint
    buf.put_u8(0x00); // additional header: null node id
    buf.put_u8(0x00);
    buf.put_u8(0x00); // no body
}

/// Bounds-checked little-endian reader
struct Decoder<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Decoder<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.pos + n > self.buf.len() {
            return Err(Error::protocol("truncated OPC-UA message"));
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn i32(&mut self) -> Result<i32> {
        let b = self.take(4)?;
        Ok(i32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn u64(&mut self) -> Result<u64> {
        let b = self.take(8)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(b);
        Ok(u64::from_le_bytes(raw))
    }

    fn string(&mut self) -> Result<Option<String>> {
        let len = self.i32()?;
        if len < 0 {
            return Ok(None);
        }
        let bytes = self.take(len as usize)?;
        String::from_utf8(bytes.to_vec())
            .map(Some)
            .map_err(|_| Error::protocol("non-UTF8 string in OPC-UA message"))
    }

    fn bytestring(&mut self) -> Result<Option<Vec<u8>>> {
        let len = self.i32()?;
        if len < 0 {
            return Ok(None);
        }
        Ok(Some(self.take(len as usize)?.to_vec()))
    }

    /// Numeric node id in any of the three compact encodings
    fn node_id(&mut self) -> Result<(u16, u32)> {
        match self.u8()? {
            0x00 => Ok((0, u32::from(self.u8()?))),
            0x01 => {
                let ns = u16::from(self.u8()?);
                Ok((ns, u32::from(self.u16()?)))
            }
            0x02 => {
                let ns = self.u16()?;
                Ok((ns, self.u32()?))
            }
            other => Err(Error::protocol(format!(
                "unsupported node id encoding 0x{:02X}",
                other
            ))),
        }
    }

    /// Response header; fails when the service result is not Good
    fn response_header(&mut self) -> Result<()> {
        self.u64()?; // timestamp
        self.u32()?; // request handle
        let service_result = self.u32()?;
        self.u8()?; // service diagnostics (empty DiagnosticInfo)
        let string_table = self.i32()?;
        for _ in 0..string_table.max(0) {
            self.string()?;
        }
        self.node_id()?; // additional header type id
        self.u8()?; // additional header encoding
        if service_result != 0 {
            return Err(Error::protocol(format!(
                "service failed: {} (0x{:08X})",
                status_name(service_result),
                service_result
            )));
        }
        Ok(())
    }
}

/// Split a complete message into its type tag and body
pub fn split_message(frame: &[u8]) -> Result<([u8; 3], &[u8])> {
    if frame.len() < 8 {
        return Err(Error::protocol("truncated OPC-UA message header"));
    }
    let declared = u32::from_le_bytes([frame[4], frame[5], frame[6], frame[7]]) as usize;
    if declared != frame.len() {
        return Err(Error::protocol(format!(
            "message size {} does not match frame length {}",
            declared,
            frame.len()
        )));
    }
    Ok(([frame[0], frame[1], frame[2]], &frame[8..]))
}

/// Build a Hello message advertising our transport limits
pub fn hello(endpoint_url: &str) -> Bytes {
    let mut body = BytesMut::with_capacity(32 + endpoint_url.len());
    body.put_u32_le(PROTOCOL_VERSION);
    body.put_u32_le(DEFAULT_BUFFER_SIZE);
    body.put_u32_le(DEFAULT_BUFFER_SIZE);
    body.put_u32_le(0); // max message size (no limit)
    body.put_u32_le(0); // max chunk count (no limit)
    put_string(&mut body, Some(endpoint_url));
    finish_message(msg_type::HELLO, &body)
}

/// Extract the endpoint URL from a Hello message (mock server side)
pub fn parse_hello(frame: &[u8]) -> Result<String> {
    let (kind, body) = split_message(frame)?;
    if &kind != msg_type::HELLO {
        return Err(Error::protocol("expected Hello message"));
    }
    let mut dec = Decoder::new(body);
    dec.u32()?;
    dec.u32()?;
    dec.u32()?;
    dec.u32()?;
    dec.u32()?;
    Ok(dec.string()?.unwrap_or_default())
}

/// Build an Acknowledge message (mock server side)
pub fn acknowledge(ack: &Acknowledge) -> Bytes {
    let mut body = BytesMut::with_capacity(20);
    body.put_u32_le(ack.protocol_version);
    body.put_u32_le(ack.receive_buffer_size);
    body.put_u32_le(ack.send_buffer_size);
    body.put_u32_le(ack.max_message_size);
    body.put_u32_le(ack.max_chunk_count);
    finish_message(msg_type::ACKNOWLEDGE, &body)
}

/// Parse an Acknowledge or Error reply to Hello
pub fn parse_acknowledge(frame: &[u8]) -> Result<Acknowledge> {
    let (kind, body) = split_message(frame)?;
    if &kind == msg_type::ERROR {
        return Err(parse_error_body(body));
    }
    if &kind != msg_type::ACKNOWLEDGE {
        return Err(Error::protocol(format!(
            "expected Acknowledge, got {:?}",
            String::from_utf8_lossy(&kind)
        )));
    }
    let mut dec = Decoder::new(body);
    Ok(Acknowledge {
        protocol_version: dec.u32()?,
        receive_buffer_size: dec.u32()?,
        send_buffer_size: dec.u32()?,
        max_message_size: dec.u32()?,
        max_chunk_count: dec.u32()?,
    })
}

/// Build an Error message (mock server side)
pub fn error_message(code: u32, reason: &str) -> Bytes {
    let mut body = BytesMut::with_capacity(8 + reason.len());
    body.put_u32_le(code);
    put_string(&mut body, Some(reason));
    finish_message(msg_type::ERROR, &body)
}

fn parse_error_body(body: &[u8]) -> Error {
    let mut dec = Decoder::new(body);
    match (dec.u32(), dec.string()) {
        (Ok(code), Ok(reason)) => Error::protocol(format!(
            "server error: {} (0x{:08X}){}",
            status_name(code),
            code,
            reason.map(|r| format!(": {r}")).unwrap_or_default()
        )),
        _ => Error::protocol("malformed server Error message"),
    }
}

/// Build an OpenSecureChannel request.
///
/// For policy `None` the certificate fields are null; signed policies
/// carry the client certificate DER and the server certificate
/// thumbprint so the server can render a verdict.
pub fn open_channel_request(
    policy: SecurityPolicy,
    mode: MessageSecurityMode,
    client_certificate: Option<&[u8]>,
    server_thumbprint: Option<&[u8]>,
) -> Bytes {
    let mut body = BytesMut::with_capacity(128);
    body.put_u32_le(0); // secure channel id (0 until issued)
    put_string(&mut body, Some(policy.uri()));
    put_bytestring(&mut body, client_certificate);
    put_bytestring(&mut body, server_thumbprint);
    body.put_u32_le(1); // sequence number
    body.put_u32_le(1); // request id
    put_encoding_id(&mut body, encoding_id::OPEN_CHANNEL_REQUEST);
    put_request_header(&mut body, 1);
    body.put_u32_le(PROTOCOL_VERSION);
    body.put_u32_le(0); // request type: issue
    body.put_u32_le(mode.wire_value());
    put_bytestring(&mut body, None); // client nonce
    body.put_u32_le(CHANNEL_LIFETIME_MS);
    finish_message(msg_type::OPEN_CHANNEL, &body)
}

/// Build an OpenSecureChannel response (mock server side)
pub fn open_channel_response(channel_id: u32, token_id: u32) -> Bytes {
    let mut body = BytesMut::with_capacity(96);
    body.put_u32_le(channel_id);
    put_string(&mut body, Some(SecurityPolicy::None.uri()));
    put_bytestring(&mut body, None);
    put_bytestring(&mut body, None);
    body.put_u32_le(1);
    body.put_u32_le(1);
    put_encoding_id(&mut body, encoding_id::OPEN_CHANNEL_RESPONSE);
    // response header
    body.put_u64_le(0);
    body.put_u32_le(1);
    body.put_u32_le(0); // service result: Good
    body.put_u8(0x00);
    body.put_i32_le(-1);
    body.put_u8(0x00);
    body.put_u8(0x00);
    body.put_u8(0x00);
    // body
    body.put_u32_le(PROTOCOL_VERSION);
    body.put_u32_le(channel_id);
    body.put_u32_le(token_id);
    body.put_u64_le(0); // created at
    body.put_u32_le(CHANNEL_LIFETIME_MS);
    put_bytestring(&mut body, None); // server nonce
    finish_message(msg_type::OPEN_CHANNEL, &body)
}

/// Parse an OpenSecureChannel response or the server's rejection
pub fn parse_open_channel_response(frame: &[u8]) -> Result<OpenChannel> {
    let (kind, body) = split_message(frame)?;
    if &kind == msg_type::ERROR {
        return Err(parse_error_body(body));
    }
    if &kind != msg_type::OPEN_CHANNEL {
        return Err(Error::protocol("expected OpenSecureChannel response"));
    }
    let mut dec = Decoder::new(body);
    dec.u32()?; // secure channel id (repeated below)
    dec.string()?; // policy uri
    dec.bytestring()?; // server certificate
    dec.bytestring()?; // client thumbprint
    dec.u32()?; // sequence number
    dec.u32()?; // request id
    let (_, type_id) = dec.node_id()?;
    if type_id == u32::from(encoding_id::SERVICE_FAULT) {
        dec.response_header()?;
        return Err(Error::protocol("OpenSecureChannel faulted"));
    }
    if type_id != u32::from(encoding_id::OPEN_CHANNEL_RESPONSE) {
        return Err(Error::protocol("unexpected OpenSecureChannel payload"));
    }
    dec.response_header()?;
    dec.u32()?; // server protocol version
    let channel_id = dec.u32()?;
    let token_id = dec.u32()?;
    Ok(OpenChannel {
        channel_id,
        token_id,
    })
}

/// Build a CloseSecureChannel request, sent best-effort on disconnect
pub fn close_channel_request(channel: &OpenChannel, sequence: u32, request_id: u32) -> Bytes {
    let mut body = BytesMut::with_capacity(48);
    body.put_u32_le(channel.channel_id);
    body.put_u32_le(channel.token_id);
    body.put_u32_le(sequence);
    body.put_u32_le(request_id);
    put_encoding_id(&mut body, encoding_id::CLOSE_CHANNEL_REQUEST);
    put_request_header(&mut body, request_id);
    finish_message(msg_type::CLOSE_CHANNEL, &body)
}

/// OPC-UA index range selecting `length` bytes starting at `offset`
pub fn index_range(offset: u32, length: u16) -> String {
    if length == 1 {
        format!("{}", offset)
    } else {
        let last = offset.saturating_add(u32::from(length.max(1)) - 1);
        format!("{}:{}", offset, last)
    }
}

fn start_service_message(channel: &OpenChannel, sequence: u32, request_id: u32) -> BytesMut {
    let mut body = BytesMut::with_capacity(96);
    body.put_u32_le(channel.channel_id);
    body.put_u32_le(channel.token_id);
    body.put_u32_le(sequence);
    body.put_u32_le(request_id);
    body
}

/// Build a Read request for a byte range of a ByteString variable
pub fn read_request(
    channel: &OpenChannel,
    sequence: u32,
    request_id: u32,
    namespace: u16,
    node: u32,
    range: &str,
) -> Bytes {
    let mut body = start_service_message(channel, sequence, request_id);
    put_encoding_id(&mut body, encoding_id::READ_REQUEST);
    put_request_header(&mut body, request_id);
    body.put_u64_le(0); // max age (f64 0.0)
    body.put_u32_le(3); // timestamps to return: neither
    body.put_i32_le(1); // one node to read
    put_node_id(&mut body, namespace, node);
    body.put_u32_le(ATTRIBUTE_VALUE);
    put_string(&mut body, Some(range));
    body.put_u16_le(0); // data encoding: null qualified name
    put_string(&mut body, None);
    finish_message(msg_type::MESSAGE, &body)
}

/// Parse the read request issued by a client (mock server side)
pub fn parse_read_request(frame: &[u8]) -> Result<(u16, u32, Option<String>)> {
    let mut dec = service_body(frame, encoding_id::READ_REQUEST)?;
    skip_request_header(&mut dec)?;
    dec.u64()?;
    dec.u32()?;
    let count = dec.i32()?;
    if count != 1 {
        return Err(Error::protocol("expected exactly one node to read"));
    }
    let (ns, id) = dec.node_id()?;
    dec.u32()?; // attribute id
    let range = dec.string()?;
    Ok((ns, id, range))
}

/// Build a Read response carrying `data` (mock server side)
pub fn read_response(channel: &OpenChannel, sequence: u32, request_id: u32, data: &[u8]) -> Bytes {
    let mut body = start_service_message(channel, sequence, request_id);
    put_encoding_id(&mut body, encoding_id::READ_RESPONSE);
    put_response_header(&mut body, request_id, 0);
    body.put_i32_le(1); // one result
    body.put_u8(0x01); // data value mask: value only
    body.put_u8(VARIANT_BYTESTRING);
    put_bytestring(&mut body, Some(data));
    body.put_i32_le(-1); // no diagnostic infos
    finish_message(msg_type::MESSAGE, &body)
}

/// Build a Read response carrying a per-node status (mock server side)
pub fn read_response_error(
    channel: &OpenChannel,
    sequence: u32,
    request_id: u32,
    status: u32,
) -> Bytes {
    let mut body = start_service_message(channel, sequence, request_id);
    put_encoding_id(&mut body, encoding_id::READ_RESPONSE);
    put_response_header(&mut body, request_id, 0);
    body.put_i32_le(1);
    body.put_u8(0x02); // data value mask: status only
    body.put_u32_le(status);
    body.put_i32_le(-1);
    finish_message(msg_type::MESSAGE, &body)
}

/// Extract the ByteString payload from a Read response
pub fn parse_read_response(frame: &[u8]) -> Result<Vec<u8>> {
    let mut dec = service_response_body(frame, encoding_id::READ_RESPONSE)?;
    dec.response_header()?;
    let count = dec.i32()?;
    if count != 1 {
        return Err(Error::protocol("expected exactly one read result"));
    }
    let mask = dec.u8()?;
    if mask & 0x02 != 0 {
        let status = dec.u32()?;
        return Err(Error::protocol(format!(
            "read rejected: {} (0x{:08X})",
            status_name(status),
            status
        )));
    }
    if mask & 0x01 == 0 {
        return Err(Error::protocol("read result carries no value"));
    }
    let variant_type = dec.u8()?;
    if variant_type != VARIANT_BYTESTRING {
        return Err(Error::protocol(format!(
            "expected ByteString value, got variant type {}",
            variant_type
        )));
    }
    dec.bytestring()?
        .ok_or_else(|| Error::protocol("read returned a null ByteString"))
}

/// Build a Write request replacing a byte range of a ByteString variable
pub fn write_request(
    channel: &OpenChannel,
    sequence: u32,
    request_id: u32,
    namespace: u16,
    node: u32,
    range: &str,
    data: &[u8],
) -> Bytes {
    let mut body = start_service_message(channel, sequence, request_id);
    put_encoding_id(&mut body, encoding_id::WRITE_REQUEST);
    put_request_header(&mut body, request_id);
    body.put_i32_le(1); // one node to write
    put_node_id(&mut body, namespace, node);
    body.put_u32_le(ATTRIBUTE_VALUE);
    put_string(&mut body, Some(range));
    body.put_u8(0x01); // data value mask: value only
    body.put_u8(VARIANT_BYTESTRING);
    put_bytestring(&mut body, Some(data));
    finish_message(msg_type::MESSAGE, &body)
}

/// Parse the write request issued by a client (mock server side)
pub fn parse_write_request(frame: &[u8]) -> Result<(u16, u32, Option<String>, Vec<u8>)> {
    let mut dec = service_body(frame, encoding_id::WRITE_REQUEST)?;
    skip_request_header(&mut dec)?;
    let count = dec.i32()?;
    if count != 1 {
        return Err(Error::protocol("expected exactly one node to write"));
    }
    let (ns, id) = dec.node_id()?;
    dec.u32()?; // attribute id
    let range = dec.string()?;
    let mask = dec.u8()?;
    if mask & 0x01 == 0 {
        return Err(Error::protocol("write carries no value"));
    }
    dec.u8()?; // variant type
    let data = dec
        .bytestring()?
        .ok_or_else(|| Error::protocol("write carries a null ByteString"))?;
    Ok((ns, id, range, data))
}

/// Build a Write response with one status code (mock server side)
pub fn write_response(channel: &OpenChannel, sequence: u32, request_id: u32, status: u32) -> Bytes {
    let mut body = start_service_message(channel, sequence, request_id);
    put_encoding_id(&mut body, encoding_id::WRITE_RESPONSE);
    put_response_header(&mut body, request_id, 0);
    body.put_i32_le(1);
    body.put_u32_le(status);
    body.put_i32_le(-1);
    finish_message(msg_type::MESSAGE, &body)
}

/// Check the single status code in a Write response
pub fn parse_write_response(frame: &[u8]) -> Result<()> {
    let mut dec = service_response_body(frame, encoding_id::WRITE_RESPONSE)?;
    dec.response_header()?;
    let count = dec.i32()?;
    if count != 1 {
        return Err(Error::protocol("expected exactly one write result"));
    }
    let status = dec.u32()?;
    if status != 0 {
        return Err(Error::protocol(format!(
            "write rejected: {} (0x{:08X})",
            status_name(status),
            status
        )));
    }
    Ok(())
}

fn put_response_header(buf: &mut BytesMut, request_handle: u32, service_result: u32) {
    buf.put_u64_le(0);
    buf.put_u32_le(request_handle);
    buf.put_u32_le(service_result);
    buf.put_u8(0x00);
    buf.put_i32_le(-1);
    buf.put_u8(0x00);
    buf.put_u8(0x00);
    buf.put_u8(0x00);
}

fn skip_request_header(dec: &mut Decoder<'_>) -> Result<()> {
    dec.node_id()?; // auth token
    dec.u64()?;
    dec.u32()?;
    dec.u32()?;
    dec.string()?;
    dec.u32()?;
    dec.node_id()?;
    dec.u8()?;
    Ok(())
}

/// Open a decoder positioned after the secure conversation headers,
/// verifying the message type id matches `expected`.
fn service_body(frame: &[u8], expected: u16) -> Result<Decoder<'_>> {
    let (kind, body) = split_message(frame)?;
    if &kind == msg_type::ERROR {
        return Err(parse_error_body(body));
    }
    if &kind != msg_type::MESSAGE {
        return Err(Error::protocol("expected secure conversation message"));
    }
    let mut dec = Decoder::new(body);
    dec.u32()?; // channel id
    dec.u32()?; // token id
    dec.u32()?; // sequence number
    dec.u32()?; // request id
    let (_, type_id) = dec.node_id()?;
    if type_id != u32::from(expected) {
        return Err(Error::protocol(format!(
            "unexpected service type id {} (wanted {})",
            type_id, expected
        )));
    }
    Ok(dec)
}

/// Like `service_body`, but a ServiceFault in place of the expected
/// response surfaces its service result.
fn service_response_body(frame: &[u8], expected: u16) -> Result<Decoder<'_>> {
    let (kind, body) = split_message(frame)?;
    if &kind == msg_type::ERROR {
        return Err(parse_error_body(body));
    }
    if &kind != msg_type::MESSAGE {
        return Err(Error::protocol("expected secure conversation message"));
    }
    let mut dec = Decoder::new(body);
    dec.u32()?;
    dec.u32()?;
    dec.u32()?;
    dec.u32()?;
    let (_, type_id) = dec.node_id()?;
    if type_id == u32::from(encoding_id::SERVICE_FAULT) {
        dec.response_header()?;
        return Err(Error::protocol("service faulted with Good status"));
    }
    if type_id != u32::from(expected) {
        return Err(Error::protocol(format!(
            "unexpected service type id {} (wanted {})",
            type_id, expected
        )));
    }
    Ok(dec)
}

#[cfg(test)]
mod tests {
    use super::*;

    const CHANNEL: OpenChannel = OpenChannel {
        channel_id: 7,
        token_id: 11,
    };

    #[test]
    fn test_hello_round_trip() {
        let frame = hello("opc.tcp://plc:4840");
        assert_eq!(parse_hello(&frame).unwrap(), "opc.tcp://plc:4840");
    }

    #[test]
    fn test_acknowledge_round_trip() {
        let ack = Acknowledge {
            protocol_version: 0,
            receive_buffer_size: 8192,
            send_buffer_size: 8192,
            max_message_size: 0,
            max_chunk_count: 0,
        };
        assert_eq!(parse_acknowledge(&acknowledge(&ack)).unwrap(), ack);
    }

    #[test]
    fn test_error_reply_to_hello_surfaces_reason() {
        let frame = error_message(0x8082_0000, "no sessions available");
        match parse_acknowledge(&frame) {
            Err(Error::Protocol(msg)) => {
                assert!(msg.contains("BadConnectionRejected"));
                assert!(msg.contains("no sessions available"));
            }
            other => panic!("expected Protocol error, got {:?}", other),
        }
    }

    #[test]
    fn test_open_channel_round_trip() {
        let request = open_channel_request(
            SecurityPolicy::None,
            MessageSecurityMode::None,
            None,
            None,
        );
        let (kind, _) = split_message(&request).unwrap();
        assert_eq!(&kind, msg_type::OPEN_CHANNEL);

        let channel = parse_open_channel_response(&open_channel_response(42, 9)).unwrap();
        assert_eq!(channel.channel_id, 42);
        assert_eq!(channel.token_id, 9);
    }

    #[test]
    fn test_open_channel_error_reply() {
        let frame = error_message(0x8055_0000, "policy rejected");
        match parse_open_channel_response(&frame) {
            Err(Error::Protocol(msg)) => assert!(msg.contains("BadSecurityPolicyRejected")),
            other => panic!("expected Protocol error, got {:?}", other),
        }
    }

    #[test]
    fn test_index_range_forms() {
        assert_eq!(index_range(5, 1), "5");
        assert_eq!(index_range(0, 4), "0:3");
        assert_eq!(index_range(10, 2), "10:11");
    }

    #[test]
    fn test_read_request_round_trip() {
        let frame = read_request(&CHANNEL, 2, 2, 2, 1, "0:63");
        let (ns, node, range) = parse_read_request(&frame).unwrap();
        assert_eq!((ns, node), (2, 1));
        assert_eq!(range.as_deref(), Some("0:63"));
    }

    #[test]
    fn test_read_response_round_trip() {
        let frame = read_response(&CHANNEL, 2, 2, &[1, 2, 3]);
        assert_eq!(parse_read_response(&frame).unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn test_read_response_status_surfaces() {
        let frame = read_response_error(&CHANNEL, 2, 2, 0x8034_0000);
        match parse_read_response(&frame) {
            Err(Error::Protocol(msg)) => assert!(msg.contains("BadNodeIdUnknown")),
            other => panic!("expected Protocol error, got {:?}", other),
        }
    }

    #[test]
    fn test_write_request_round_trip() {
        let frame = write_request(&CHANNEL, 3, 3, 2, 1, "8:11", &[9, 9, 9, 9]);
        let (ns, node, range, data) = parse_write_request(&frame).unwrap();
        assert_eq!((ns, node), (2, 1));
        assert_eq!(range.as_deref(), Some("8:11"));
        assert_eq!(data, vec![9, 9, 9, 9]);
    }

    #[test]
    fn test_write_response_status() {
        assert!(parse_write_response(&write_response(&CHANNEL, 3, 3, 0)).is_ok());
        match parse_write_response(&write_response(&CHANNEL, 3, 3, 0x8073_0000)) {
            Err(Error::Protocol(msg)) => assert!(msg.contains("BadWriteNotSupported")),
            other => panic!("expected Protocol error, got {:?}", other),
        }
    }

    #[test]
    fn test_node_id_encodings() {
        let mut buf = BytesMut::new();
        put_node_id(&mut buf, 0, 5);
        assert_eq!(&buf[..], &[0x00, 0x05]);

        let mut buf = BytesMut::new();
        put_node_id(&mut buf, 2, 300);
        assert_eq!(&buf[..], &[0x01, 0x02, 0x2C, 0x01]);

        let mut buf = BytesMut::new();
        put_node_id(&mut buf, 300, 70_000);
        assert_eq!(buf[0], 0x02);

        for bytes in [
            vec![0x00, 0x05],
            vec![0x01, 0x02, 0x2C, 0x01],
        ] {
            let mut dec = Decoder::new(&bytes);
            let (ns, id) = dec.node_id().unwrap();
            assert!(ns <= 2 && (id == 5 || id == 300));
        }
    }

    #[test]
    fn test_truncated_message_rejected() {
        let frame = read_response(&CHANNEL, 2, 2, &[1, 2, 3]);
        assert!(parse_read_response(&frame[..frame.len() - 2]).is_err());
    }
}
