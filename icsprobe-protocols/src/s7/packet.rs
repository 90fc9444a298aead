//! S7comm packet structures and parsing
//!
//! Every S7 exchange travels inside a TPKT frame (RFC 1006) carrying a
//! COTP TPDU. Connection setup uses COTP CR/CC with TSAP parameters;
//! all subsequent S7 PDUs ride in COTP DT TPDUs. Builders emit complete
//! TPKT frames, parsers consume complete TPKT frames, so the two sides
//! are symmetric and the response builders double as a mock PLC for
//! tests.

use bytes::{BufMut, Bytes, BytesMut};
use icsprobe_core::{Error, MemoryWindow, Result};

/// Default ISO-on-TCP port
pub const ISO_TCP_PORT: u16 = 102;

/// TPKT version (always 3)
pub const TPKT_VERSION: u8 = 0x03;

/// S7 protocol identifier (first byte of every S7 header)
pub const S7_PROTOCOL_ID: u8 = 0x32;

/// PDU size requested during setup communication
pub const REQUESTED_PDU_SIZE: u16 = 960;

/// Per-PDU overhead of a read-var response (headers + item prefix)
pub const READ_OVERHEAD: u16 = 18;

/// Per-PDU overhead of a write-var request
pub const WRITE_OVERHEAD: u16 = 28;

/// COTP TPDU codes
pub mod cotp {
    /// Connection Request
    pub const CR: u8 = 0xE0;
    /// Connection Confirm
    pub const CC: u8 = 0xD0;
    /// Data Transfer
    pub const DT: u8 = 0xF0;
}

/// S7 header message types (ROSCTR)
pub mod rosctr {
    pub const JOB: u8 = 0x01;
    pub const ACK_DATA: u8 = 0x03;
}

/// S7 function codes
pub mod function {
    pub const SETUP_COMMUNICATION: u8 = 0xF0;
    pub const READ_VAR: u8 = 0x04;
    pub const WRITE_VAR: u8 = 0x05;
}

/// Area code for data blocks
pub const AREA_DB: u8 = 0x84;

/// Largest byte offset encodable in the 3-byte S7ANY bit address
pub const MAX_DB_BYTE_OFFSET: u32 = 0x001F_FFFF;

/// Transport size "byte" used in variable items
pub const TRANSPORT_BYTE: u8 = 0x02;

/// Per-item return code for success
pub const RETCODE_SUCCESS: u8 = 0xFF;

/// Human-readable meaning of an S7 per-item return code
pub fn retcode_reason(code: u8) -> &'static str {
    match code {
        0x01 => "hardware fault",
        0x03 => "access denied",
        0x05 => "address out of range",
        0x06 => "data type not supported",
        0x07 => "data size mismatch",
        0x0A => "object does not exist (DB not present?)",
        RETCODE_SUCCESS => "success",
        _ => "unknown item error",
    }
}

/// Human-readable meaning of an S7 header error class
pub fn error_class_reason(class: u8) -> &'static str {
    match class {
        0x00 => "no error",
        0x81 => "application relationship error",
        0x82 => "object definition error",
        0x83 => "no resources available",
        0x84 => "error on service processing",
        0x85 => "error on supplies",
        0x87 => "access error",
        _ => "unknown error class",
    }
}

fn tpkt_wrap(payload: &[u8]) -> Bytes {
    let total = payload.len() + 4;
    let mut buf = BytesMut::with_capacity(total);
    buf.put_u8(TPKT_VERSION);
    buf.put_u8(0x00);
    buf.put_u16(total as u16);
    buf.put_slice(payload);
    buf.freeze()
}

/// COTP data-transfer prefix (length, DT code, end-of-transmission)
fn cotp_dt(buf: &mut BytesMut) {
    buf.put_u8(0x02);
    buf.put_u8(cotp::DT);
    buf.put_u8(0x80);
}

/// Remote TSAP derived from rack and slot (PG connection type)
fn remote_tsap(rack: u16, slot: u16) -> u16 {
    0x0100 | (rack * 0x20 + slot)
}

/// Build a COTP Connection Request frame for the given rack/slot
pub fn connect_request(rack: u16, slot: u16) -> Bytes {
    let mut cotp = BytesMut::with_capacity(18);
    cotp.put_u8(17); // COTP header length (excluding this byte)
    cotp.put_u8(cotp::CR);
    cotp.put_u16(0x0000); // destination reference
    cotp.put_u16(0x0001); // source reference
    cotp.put_u8(0x00); // class 0
    cotp.put_slice(&[0xC0, 0x01, 0x0A]); // TPDU size 1024
    cotp.put_slice(&[0xC1, 0x02, 0x01, 0x00]); // source TSAP 0x0100
    cotp.put_u8(0xC2);
    cotp.put_u8(0x02);
    cotp.put_u16(remote_tsap(rack, slot));
    tpkt_wrap(&cotp)
}

/// Build a COTP Connection Confirm frame (mock PLC side)
pub fn connect_confirm() -> Bytes {
    let mut cotp = BytesMut::with_capacity(18);
    cotp.put_u8(17);
    cotp.put_u8(cotp::CC);
    cotp.put_u16(0x0001);
    cotp.put_u16(0x0001);
    cotp.put_u8(0x00);
    cotp.put_slice(&[0xC0, 0x01, 0x0A]);
    cotp.put_slice(&[0xC1, 0x02, 0x01, 0x00]);
    cotp.put_slice(&[0xC2, 0x02, 0x01, 0x00]);
    tpkt_wrap(&cotp)
}

/// Validate a COTP Connection Confirm
pub fn parse_connect_confirm(frame: &[u8]) -> Result<()> {
    let cotp = strip_tpkt(frame)?;
    if cotp.len() < 2 {
        return Err(Error::protocol("truncated COTP TPDU"));
    }
    if cotp[1] != cotp::CC {
        return Err(Error::protocol(format!(
            "expected COTP connection confirm, got TPDU code 0x{:02X}",
            cotp[1]
        )));
    }
    Ok(())
}

/// Build a setup-communication job negotiating the PDU size
pub fn setup_request(pdu_ref: u16, requested_pdu: u16) -> Bytes {
    let mut body = BytesMut::with_capacity(25);
    cotp_dt(&mut body);
    put_s7_header(&mut body, rosctr::JOB, pdu_ref, 8, 0);
    body.put_u8(function::SETUP_COMMUNICATION);
    body.put_u8(0x00); // reserved
    body.put_u16(0x0001); // max AMQ calling
    body.put_u16(0x0001); // max AMQ called
    body.put_u16(requested_pdu);
    tpkt_wrap(&body)
}

/// Build a setup-communication ack (mock PLC side)
pub fn setup_response(pdu_ref: u16, negotiated_pdu: u16) -> Bytes {
    let mut body = BytesMut::with_capacity(27);
    cotp_dt(&mut body);
    put_s7_ack_header(&mut body, pdu_ref, 8, 0, 0x00, 0x00);
    body.put_u8(function::SETUP_COMMUNICATION);
    body.put_u8(0x00);
    body.put_u16(0x0001);
    body.put_u16(0x0001);
    body.put_u16(negotiated_pdu);
    tpkt_wrap(&body)
}

/// Extract the negotiated PDU size from a setup-communication ack
pub fn parse_setup_response(frame: &[u8]) -> Result<u16> {
    let pdu = parse_ack_pdu(frame)?;
    if pdu.params.len() < 8 || pdu.params[0] != function::SETUP_COMMUNICATION {
        return Err(Error::protocol("malformed setup communication ack"));
    }
    Ok(u16::from_be_bytes([pdu.params[6], pdu.params[7]]))
}

/// Build a read-var job for one DB window
pub fn read_request(pdu_ref: u16, window: &MemoryWindow) -> Result<Bytes> {
    check_addressable(window)?;
    let mut body = BytesMut::with_capacity(31);
    cotp_dt(&mut body);
    put_s7_header(&mut body, rosctr::JOB, pdu_ref, 14, 0);
    body.put_u8(function::READ_VAR);
    body.put_u8(0x01); // item count
    put_item(&mut body, window);
    Ok(tpkt_wrap(&body))
}

/// Build a read-var ack carrying `data` (mock PLC side)
pub fn read_response(pdu_ref: u16, data: &[u8]) -> Bytes {
    let data_len = 4 + data.len() as u16;
    let mut body = BytesMut::with_capacity(21 + data.len());
    cotp_dt(&mut body);
    put_s7_ack_header(&mut body, pdu_ref, 2, data_len, 0x00, 0x00);
    body.put_u8(function::READ_VAR);
    body.put_u8(0x01);
    body.put_u8(RETCODE_SUCCESS);
    body.put_u8(0x04); // transport size: bits
    body.put_u16(data.len() as u16 * 8); // length in bits
    body.put_slice(data);
    tpkt_wrap(&body)
}

/// Build a read-var ack reporting a per-item failure (mock PLC side)
pub fn read_response_error(pdu_ref: u16, retcode: u8) -> Bytes {
    let mut body = BytesMut::with_capacity(21);
    cotp_dt(&mut body);
    put_s7_ack_header(&mut body, pdu_ref, 2, 4, 0x00, 0x00);
    body.put_u8(function::READ_VAR);
    body.put_u8(0x01);
    body.put_u8(retcode);
    body.put_u8(0x00);
    body.put_u16(0x0000);
    tpkt_wrap(&body)
}

/// Extract the data bytes from a read-var ack
pub fn parse_read_response(frame: &[u8]) -> Result<Vec<u8>> {
    let pdu = parse_ack_pdu(frame)?;
    if pdu.params.len() < 2 || pdu.params[0] != function::READ_VAR {
        return Err(Error::protocol("malformed read var ack"));
    }
    if pdu.data.len() < 4 {
        return Err(Error::protocol("truncated read var data item"));
    }
    let retcode = pdu.data[0];
    if retcode != RETCODE_SUCCESS {
        return Err(Error::protocol(format!(
            "read rejected: {} (code 0x{:02X})",
            retcode_reason(retcode),
            retcode
        )));
    }
    let bit_length = u16::from_be_bytes([pdu.data[2], pdu.data[3]]);
    let byte_length = usize::from(bit_length / 8);
    let payload = &pdu.data[4..];
    if payload.len() < byte_length {
        return Err(Error::ShortRead {
            expected: byte_length,
            actual: payload.len(),
        });
    }
    Ok(payload[..byte_length].to_vec())
}

/// Build a write-var job carrying `data` for one DB window
pub fn write_request(pdu_ref: u16, window: &MemoryWindow, data: &[u8]) -> Result<Bytes> {
    check_addressable(window)?;
    let mut body = BytesMut::with_capacity(35 + data.len());
    cotp_dt(&mut body);
    put_s7_header(&mut body, rosctr::JOB, pdu_ref, 14, 4 + data.len() as u16);
    body.put_u8(function::WRITE_VAR);
    body.put_u8(0x01);
    put_item(&mut body, window);
    body.put_u8(0x00); // reserved
    body.put_u8(0x04); // transport size: bits
    body.put_u16(data.len() as u16 * 8);
    body.put_slice(data);
    Ok(tpkt_wrap(&body))
}

/// Build a write-var ack (mock PLC side)
pub fn write_response(pdu_ref: u16, retcode: u8) -> Bytes {
    let mut body = BytesMut::with_capacity(18);
    cotp_dt(&mut body);
    put_s7_ack_header(&mut body, pdu_ref, 2, 1, 0x00, 0x00);
    body.put_u8(function::WRITE_VAR);
    body.put_u8(0x01);
    body.put_u8(retcode);
    tpkt_wrap(&body)
}

/// Validate a write-var ack
pub fn parse_write_response(frame: &[u8]) -> Result<()> {
    let pdu = parse_ack_pdu(frame)?;
    if pdu.params.len() < 2 || pdu.params[0] != function::WRITE_VAR {
        return Err(Error::protocol("malformed write var ack"));
    }
    let retcode = *pdu
        .data
        .first()
        .ok_or_else(|| Error::protocol("write var ack missing return code"))?;
    if retcode != RETCODE_SUCCESS {
        return Err(Error::protocol(format!(
            "write rejected: {} (code 0x{:02X})",
            retcode_reason(retcode),
            retcode
        )));
    }
    Ok(())
}

/// Reject windows whose last byte falls outside the 3-byte bit
/// address space before any PDU is built.
fn check_addressable(window: &MemoryWindow) -> Result<()> {
    let last = u64::from(window.offset) + u64::from(window.length.max(1)) - 1;
    if last > u64::from(MAX_DB_BYTE_OFFSET) {
        return Err(Error::invalid_window(format!(
            "{} exceeds the S7 addressable range (max byte offset {})",
            window, MAX_DB_BYTE_OFFSET
        )));
    }
    Ok(())
}

/// 12-byte any-type variable item addressing a DB byte range
fn put_item(buf: &mut BytesMut, window: &MemoryWindow) {
    buf.put_u8(0x12); // variable specification
    buf.put_u8(0x0A); // address length
    buf.put_u8(0x10); // syntax id: S7ANY
    buf.put_u8(TRANSPORT_BYTE);
    buf.put_u16(window.length);
    buf.put_u16(window.block);
    buf.put_u8(AREA_DB);
    // 3-byte bit address: byte offset * 8
    let bit_address = window.offset * 8;
    buf.put_u8((bit_address >> 16) as u8);
    buf.put_u16(bit_address as u16);
}

fn put_s7_header(buf: &mut BytesMut, rosctr: u8, pdu_ref: u16, param_len: u16, data_len: u16) {
    buf.put_u8(S7_PROTOCOL_ID);
    buf.put_u8(rosctr);
    buf.put_u16(0x0000); // redundancy identification
    buf.put_u16(pdu_ref);
    buf.put_u16(param_len);
    buf.put_u16(data_len);
}

fn put_s7_ack_header(
    buf: &mut BytesMut,
    pdu_ref: u16,
    param_len: u16,
    data_len: u16,
    error_class: u8,
    error_code: u8,
) {
    put_s7_header(buf, rosctr::ACK_DATA, pdu_ref, param_len, data_len);
    buf.put_u8(error_class);
    buf.put_u8(error_code);
}

struct AckPdu<'a> {
    params: &'a [u8],
    data: &'a [u8],
}

fn strip_tpkt(frame: &[u8]) -> Result<&[u8]> {
    if frame.len() < 4 {
        return Err(Error::protocol("truncated TPKT frame"));
    }
    if frame[0] != TPKT_VERSION {
        return Err(Error::protocol(format!(
            "unexpected TPKT version 0x{:02X}",
            frame[0]
        )));
    }
    let declared = usize::from(u16::from_be_bytes([frame[2], frame[3]]));
    if declared != frame.len() {
        return Err(Error::protocol(format!(
            "TPKT length {} does not match frame length {}",
            declared,
            frame.len()
        )));
    }
    Ok(&frame[4..])
}

/// Parse an ack-data PDU out of a TPKT frame, checking COTP framing
/// and the S7 header error class/code.
fn parse_ack_pdu(frame: &[u8]) -> Result<AckPdu<'_>> {
    let cotp = strip_tpkt(frame)?;
    if cotp.len() < 3 || cotp[1] != cotp::DT {
        return Err(Error::protocol("expected COTP data TPDU"));
    }
    let s7 = &cotp[3..];
    if s7.len() < 12 {
        return Err(Error::protocol("truncated S7 header"));
    }
    if s7[0] != S7_PROTOCOL_ID {
        return Err(Error::protocol("missing S7 protocol id"));
    }
    if s7[1] != rosctr::ACK_DATA {
        return Err(Error::protocol(format!(
            "expected ack-data PDU, got ROSCTR 0x{:02X}",
            s7[1]
        )));
    }
    let param_len = usize::from(u16::from_be_bytes([s7[6], s7[7]]));
    let data_len = usize::from(u16::from_be_bytes([s7[8], s7[9]]));
    let error_class = s7[10];
    let error_code = s7[11];
    if error_class != 0x00 || error_code != 0x00 {
        return Err(Error::protocol(format!(
            "device reported {}: class 0x{:02X}, code 0x{:02X}",
            error_class_reason(error_class),
            error_class,
            error_code
        )));
    }
    let body = &s7[12..];
    if body.len() < param_len + data_len {
        return Err(Error::protocol("S7 PDU shorter than declared lengths"));
    }
    Ok(AckPdu {
        params: &body[..param_len],
        data: &body[param_len..param_len + data_len],
    })
}
