//! LLRP parameter encoding and decoding.
//!
//! Message bodies are sequences of parameters in one of two shapes:
//!
//! ```text
//! TLV:  rsvd(6) | type(10) | length(16) | value...        (length includes header)
//! TV:   1 | type(7) | value                               (fixed size per type)
//! ```
//!
//! TLV parameters may nest. TV parameters carry no length, so a TV type whose
//! size is not known here cannot be skipped and aborts decoding of the
//! enclosing parameter.
//!
//! All functions in this module are pure; no I/O is performed.

use bytes::{Buf, BufMut, BytesMut};

use llrp_core::error::{Error, Result};

/// TLV parameter type numbers used by this connector.
pub mod tlv {
    pub const UTC_TIMESTAMP: u16 = 128;
    pub const UPTIME: u16 = 129;
    pub const GENERAL_DEVICE_CAPABILITIES: u16 = 137;
    pub const RO_SPEC: u16 = 177;
    pub const RO_BOUNDARY_SPEC: u16 = 178;
    pub const RO_SPEC_START_TRIGGER: u16 = 179;
    pub const RO_SPEC_STOP_TRIGGER: u16 = 182;
    pub const AI_SPEC: u16 = 183;
    pub const AI_SPEC_STOP_TRIGGER: u16 = 184;
    pub const INVENTORY_PARAMETER_SPEC: u16 = 186;
    pub const IDENTIFICATION: u16 = 218;
    pub const KEEPALIVE_SPEC: u16 = 220;
    pub const ANTENNA_PROPERTIES: u16 = 221;
    pub const ANTENNA_CONFIGURATION: u16 = 222;
    pub const EVENTS_AND_REPORTS: u16 = 226;
    pub const RO_REPORT_SPEC: u16 = 237;
    pub const TAG_REPORT_CONTENT_SELECTOR: u16 = 238;
    pub const TAG_REPORT_DATA: u16 = 240;
    pub const EPC_DATA: u16 = 241;
    pub const READER_EVENT_NOTIFICATION_SPEC: u16 = 244;
    pub const EVENT_NOTIFICATION_STATE: u16 = 245;
    pub const READER_EVENT_NOTIFICATION_DATA: u16 = 246;
    pub const REPORT_BUFFER_LEVEL_WARNING_EVENT: u16 = 250;
    pub const REPORT_BUFFER_OVERFLOW_ERROR_EVENT: u16 = 251;
    pub const READER_EXCEPTION_EVENT: u16 = 252;
    pub const RO_SPEC_EVENT: u16 = 249;
    pub const AI_SPEC_EVENT: u16 = 254;
    pub const ANTENNA_EVENT: u16 = 255;
    pub const CONNECTION_ATTEMPT_EVENT: u16 = 256;
    pub const CONNECTION_CLOSE_EVENT: u16 = 257;
    pub const LLRP_STATUS: u16 = 287;
    pub const FIELD_ERROR: u16 = 288;
    pub const PARAMETER_ERROR: u16 = 289;
}

/// TV parameter type numbers.
pub mod tv {
    pub const ANTENNA_ID: u8 = 1;
    pub const FIRST_SEEN_TIMESTAMP_UTC: u8 = 2;
    pub const FIRST_SEEN_TIMESTAMP_UPTIME: u8 = 3;
    pub const LAST_SEEN_TIMESTAMP_UTC: u8 = 4;
    pub const LAST_SEEN_TIMESTAMP_UPTIME: u8 = 5;
    pub const PEAK_RSSI: u8 = 6;
    pub const CHANNEL_INDEX: u8 = 7;
    pub const TAG_SEEN_COUNT: u8 = 8;
    pub const RO_SPEC_ID: u8 = 9;
    pub const INVENTORY_PARAMETER_SPEC_ID: u8 = 10;
    pub const C1G2_CRC: u8 = 11;
    pub const C1G2_PC: u8 = 12;
    pub const EPC_96: u8 = 13;
    pub const SPEC_INDEX: u8 = 14;
    pub const CLIENT_REQUEST_OP_SPEC_RESULT: u8 = 15;
    pub const ACCESS_SPEC_ID: u8 = 16;
    pub const OP_SPEC_ID: u8 = 17;
    pub const C1G2_SINGULATION_DETAILS: u8 = 18;
    pub const C1G2_XPC_W1: u8 = 19;
    pub const C1G2_XPC_W2: u8 = 20;
}

/// Size of a TV parameter's value (excluding the type byte).
pub fn tv_value_len(tv_type: u8) -> Option<usize> {
    use tv::*;
    match tv_type {
        ANTENNA_ID | CHANNEL_INDEX | TAG_SEEN_COUNT | INVENTORY_PARAMETER_SPEC_ID | C1G2_CRC
        | C1G2_PC | SPEC_INDEX | CLIENT_REQUEST_OP_SPEC_RESULT | OP_SPEC_ID | C1G2_XPC_W1
        | C1G2_XPC_W2 => Some(2),
        FIRST_SEEN_TIMESTAMP_UTC
        | FIRST_SEEN_TIMESTAMP_UPTIME
        | LAST_SEEN_TIMESTAMP_UTC
        | LAST_SEEN_TIMESTAMP_UPTIME => Some(8),
        PEAK_RSSI => Some(1),
        RO_SPEC_ID | ACCESS_SPEC_ID | C1G2_SINGULATION_DETAILS => Some(4),
        EPC_96 => Some(12),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Encoding
// ---------------------------------------------------------------------------

/// Append a TLV parameter whose body is written by `body`.
///
/// The length field is back-patched once the body is known.
pub fn put_tlv(buf: &mut BytesMut, param_type: u16, body: impl FnOnce(&mut BytesMut)) {
    let start = buf.len();
    buf.put_u16(param_type & 0x03FF);
    buf.put_u16(0);
    body(buf);
    let len = (buf.len() - start) as u16;
    buf[start + 2..start + 4].copy_from_slice(&len.to_be_bytes());
}

/// Encode an `LLRPStatus` parameter.
pub fn put_status(buf: &mut BytesMut, code: u16, description: &str) {
    put_tlv(buf, tlv::LLRP_STATUS, |b| {
        b.put_u16(code);
        b.put_u16(description.len() as u16);
        b.put_slice(description.as_bytes());
    });
}

// ---------------------------------------------------------------------------
// Decoding
// ---------------------------------------------------------------------------

/// A parameter's type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    Tlv(u16),
    Tv(u8),
}

/// One decoded parameter: its type and a view of its value bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Param<'a> {
    pub kind: ParamKind,
    pub value: &'a [u8],
}

impl Param<'_> {
    pub fn is_tlv(&self, t: u16) -> bool {
        self.kind == ParamKind::Tlv(t)
    }

    pub fn is_tv(&self, t: u8) -> bool {
        self.kind == ParamKind::Tv(t)
    }
}

/// Iterates over a run of sibling parameters.
pub struct ParamIter<'a> {
    buf: &'a [u8],
    failed: bool,
}

/// Iterate over the parameters contained in `buf`.
pub fn params(buf: &[u8]) -> ParamIter<'_> {
    ParamIter { buf, failed: false }
}

impl<'a> Iterator for ParamIter<'a> {
    type Item = Result<Param<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.buf.is_empty() {
            return None;
        }
        let result = self.next_param();
        if result.is_err() {
            self.failed = true;
        }
        Some(result)
    }
}

impl<'a> ParamIter<'a> {
    fn next_param(&mut self) -> Result<Param<'a>> {
        let first = self.buf[0];
        if first & 0x80 != 0 {
            let tv_type = first & 0x7F;
            let len = tv_value_len(tv_type).ok_or_else(|| {
                Error::Protocol(format!("unknown TV parameter type {}", tv_type))
            })?;
            ensure(self.buf, 1 + len, "TV parameter")?;
            let value = &self.buf[1..1 + len];
            self.buf = &self.buf[1 + len..];
            return Ok(Param {
                kind: ParamKind::Tv(tv_type),
                value,
            });
        }

        ensure(self.buf, 4, "TLV header")?;
        let param_type = u16::from_be_bytes([self.buf[0], self.buf[1]]) & 0x03FF;
        let len = u16::from_be_bytes([self.buf[2], self.buf[3]]) as usize;
        if len < 4 {
            return Err(Error::Protocol(format!(
                "TLV parameter {} has length {}",
                param_type, len
            )));
        }
        ensure(self.buf, len, "TLV parameter")?;
        let value = &self.buf[4..len];
        self.buf = &self.buf[len..];
        Ok(Param {
            kind: ParamKind::Tlv(param_type),
            value,
        })
    }
}

/// Fail with a protocol error unless `buf` holds at least `n` bytes.
pub fn ensure(buf: &[u8], n: usize, what: &str) -> Result<()> {
    if buf.len() < n {
        return Err(Error::Protocol(format!(
            "truncated {}: need {} bytes, have {}",
            what,
            n,
            buf.len()
        )));
    }
    Ok(())
}

pub fn read_u8(buf: &mut &[u8], what: &str) -> Result<u8> {
    ensure(buf, 1, what)?;
    Ok(buf.get_u8())
}

pub fn read_u16(buf: &mut &[u8], what: &str) -> Result<u16> {
    ensure(buf, 2, what)?;
    Ok(buf.get_u16())
}

pub fn read_u32(buf: &mut &[u8], what: &str) -> Result<u32> {
    ensure(buf, 4, what)?;
    Ok(buf.get_u32())
}

pub fn read_u64(buf: &mut &[u8], what: &str) -> Result<u64> {
    ensure(buf, 8, what)?;
    Ok(buf.get_u64())
}

/// Read a u16-length-prefixed UTF-8 string, replacing invalid sequences.
pub fn read_utf8(buf: &mut &[u8], what: &str) -> Result<String> {
    let len = read_u16(buf, what)? as usize;
    ensure(buf, len, what)?;
    let s = String::from_utf8_lossy(&buf[..len]).into_owned();
    buf.advance(len);
    Ok(s)
}

/// Uppercase hex rendering used for EPCs and reader ids.
pub fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02X}", b)).collect()
}

// ---------------------------------------------------------------------------
// LLRPStatus
// ---------------------------------------------------------------------------

/// `M_Success`.
pub const STATUS_SUCCESS: u16 = 0;

/// The `LLRPStatus` parameter carried by every response message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LlrpStatus {
    pub code: u16,
    pub description: String,
    /// Field or parameter the reader blamed, when it said.
    pub detail: Option<String>,
}

impl LlrpStatus {
    pub fn success() -> Self {
        Self {
            code: STATUS_SUCCESS,
            description: String::new(),
            detail: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.code == STATUS_SUCCESS
    }

    /// Standard name of the status code.
    pub fn name(&self) -> &'static str {
        status_name(self.code)
    }

    /// Decode from an `LLRPStatus` TLV value.
    pub fn decode(value: &[u8]) -> Result<Self> {
        let mut buf = value;
        let code = read_u16(&mut buf, "LLRPStatus")?;
        let description = read_utf8(&mut buf, "LLRPStatus description")?;

        let mut detail = None;
        for p in params(buf) {
            let p = p?;
            let mut v = p.value;
            if p.is_tlv(tlv::FIELD_ERROR) {
                let field = read_u16(&mut v, "FieldError")?;
                let err = read_u16(&mut v, "FieldError")?;
                detail = Some(format!("field {} ({})", field, status_name(err)));
            } else if p.is_tlv(tlv::PARAMETER_ERROR) {
                let param = read_u16(&mut v, "ParameterError")?;
                let err = read_u16(&mut v, "ParameterError")?;
                detail = Some(format!("parameter {} ({})", param, status_name(err)));
            }
        }

        Ok(Self {
            code,
            description,
            detail,
        })
    }

    /// Find and decode the `LLRPStatus` among a message's parameters.
    pub fn find(body: &[u8]) -> Result<Self> {
        for p in params(body) {
            let p = p?;
            if p.is_tlv(tlv::LLRP_STATUS) {
                return Self::decode(p.value);
            }
        }
        Err(Error::Protocol("response without LLRPStatus".into()))
    }
}

impl std::fmt::Display for LlrpStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.name(), self.code)?;
        if !self.description.is_empty() {
            write!(f, ": {}", self.description)?;
        }
        if let Some(detail) = &self.detail {
            write!(f, " [{}]", detail)?;
        }
        Ok(())
    }
}

/// Map an LLRP status code to its name.
pub fn status_name(code: u16) -> &'static str {
    match code {
        0 => "M_Success",
        100 => "M_ParameterError",
        101 => "M_FieldError",
        102 => "M_UnexpectedParameter",
        103 => "M_MissingParameter",
        104 => "M_DuplicateParameter",
        105 => "M_OverflowParameter",
        106 => "M_OverflowField",
        107 => "M_UnknownParameter",
        108 => "M_UnknownField",
        109 => "M_UnsupportedMessage",
        110 => "M_UnsupportedVersion",
        111 => "M_UnsupportedParameter",
        200 => "P_ParameterError",
        201 => "P_FieldError",
        202 => "P_UnexpectedParameter",
        203 => "P_MissingParameter",
        204 => "P_DuplicateParameter",
        205 => "P_OverflowParameter",
        206 => "P_OverflowField",
        207 => "P_UnknownParameter",
        208 => "P_UnknownField",
        209 => "P_UnsupportedParameter",
        300 => "A_Invalid",
        301 => "A_OutOfRange",
        401 => "R_DeviceError",
        _ => "Unknown",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tlv_length_is_back_patched() {
        let mut buf = BytesMut::new();
        put_tlv(&mut buf, tlv::KEEPALIVE_SPEC, |b| {
            b.put_u8(1);
            b.put_u32(5000);
        });
        assert_eq!(&buf[..], &[0x00, 0xDC, 0x00, 0x09, 0x01, 0x00, 0x00, 0x13, 0x88]);
    }

    #[test]
    fn nested_tlv_lengths() {
        let mut buf = BytesMut::new();
        put_tlv(&mut buf, tlv::RO_BOUNDARY_SPEC, |b| {
            put_tlv(b, tlv::RO_SPEC_START_TRIGGER, |b| b.put_u8(1));
            put_tlv(b, tlv::RO_SPEC_STOP_TRIGGER, |b| {
                b.put_u8(0);
                b.put_u32(0);
            });
        });
        assert_eq!(u16::from_be_bytes([buf[2], buf[3]]) as usize, buf.len());

        let outer: Vec<_> = params(&buf).collect::<Result<_>>().unwrap();
        assert_eq!(outer.len(), 1);
        let inner: Vec<_> = params(outer[0].value).collect::<Result<_>>().unwrap();
        assert_eq!(inner.len(), 2);
        assert!(inner[0].is_tlv(tlv::RO_SPEC_START_TRIGGER));
        assert_eq!(inner[0].value, &[1]);
        assert!(inner[1].is_tlv(tlv::RO_SPEC_STOP_TRIGGER));
    }

    #[test]
    fn mixed_tv_and_tlv() {
        let mut buf = BytesMut::new();
        buf.put_u8(0x80 | tv::ANTENNA_ID);
        buf.put_u16(3);
        buf.put_u8(0x80 | tv::PEAK_RSSI);
        buf.put_u8(0xC8);
        put_status(&mut buf, 0, "");

        let ps: Vec<_> = params(&buf).collect::<Result<_>>().unwrap();
        assert_eq!(ps.len(), 3);
        assert!(ps[0].is_tv(tv::ANTENNA_ID));
        assert_eq!(ps[0].value, &[0, 3]);
        assert!(ps[1].is_tv(tv::PEAK_RSSI));
        assert_eq!(ps[1].value[0] as i8, -56);
        assert!(ps[2].is_tlv(tlv::LLRP_STATUS));
    }

    #[test]
    fn unknown_tv_stops_iteration_with_error() {
        let buf = [0x80 | 0x7E, 0x00, 0x01];
        let mut it = params(&buf);
        assert!(matches!(it.next(), Some(Err(Error::Protocol(_)))));
        assert!(it.next().is_none());
    }

    #[test]
    fn truncated_tlv_is_error() {
        // Claims 12 bytes, only 6 present.
        let buf = [0x01, 0x1F, 0x00, 0x0C, 0x00, 0x00];
        assert!(matches!(params(&buf).next(), Some(Err(Error::Protocol(_)))));
    }

    #[test]
    fn tlv_length_below_header_is_error() {
        let buf = [0x01, 0x1F, 0x00, 0x02];
        assert!(matches!(params(&buf).next(), Some(Err(Error::Protocol(_)))));
    }

    #[test]
    fn status_round_trip_with_description() {
        let mut buf = BytesMut::new();
        put_status(&mut buf, 100, "ROSpec 1234 already exists");
        let status = LlrpStatus::find(&buf).unwrap();
        assert!(!status.is_success());
        assert_eq!(status.code, 100);
        assert_eq!(status.name(), "M_ParameterError");
        assert_eq!(status.description, "ROSpec 1234 already exists");
        assert_eq!(
            status.to_string(),
            "M_ParameterError (100): ROSpec 1234 already exists"
        );
    }

    #[test]
    fn status_with_field_error_detail() {
        let mut buf = BytesMut::new();
        put_tlv(&mut buf, tlv::LLRP_STATUS, |b| {
            b.put_u16(101);
            b.put_u16(0);
            put_tlv(b, tlv::FIELD_ERROR, |b| {
                b.put_u16(2);
                b.put_u16(300);
            });
        });
        let status = LlrpStatus::find(&buf).unwrap();
        assert_eq!(status.detail.as_deref(), Some("field 2 (A_Invalid)"));
    }

    #[test]
    fn missing_status_is_error() {
        assert!(matches!(
            LlrpStatus::find(&[]),
            Err(Error::Protocol(msg)) if msg.contains("without LLRPStatus")
        ));
    }

    #[test]
    fn hex_rendering() {
        assert_eq!(to_hex(&[0xE2, 0x00, 0x1A]), "E2001A");
        assert_eq!(to_hex(&[]), "");
    }
}
