//! Capability negotiation.
//!
//! The client offers a request mask (what it may ask the server to do) and a
//! response mask (what it does not want the server to send) in the
//! CAPABILITY token that follows the login record. The server answers with its
//! own pair, which the session keeps for diagnostics.

use bytes::{Buf, BufMut};

use crate::codec::{self, ByteOrder, decode_framed};
use crate::error::ProtocolError;

/// Request capability: language requests.
pub const REQ_LANG: u8 = 1;
/// Request capability: RPC requests.
pub const REQ_RPC: u8 = 2;
/// Request capability: event notifications.
pub const REQ_EVT: u8 = 3;
/// Request capability: multiple statements per request.
pub const REQ_MSTMT: u8 = 4;
/// Request capability: bulk copy.
pub const REQ_BCP: u8 = 5;
/// Request capability: cursors.
pub const REQ_CURSOR: u8 = 6;
/// Request capability: dynamic SQL.
pub const REQ_DYNF: u8 = 7;
/// Request capability: MSG token.
pub const REQ_MSG: u8 = 8;
/// Request capability: PARAM tokens for RPC.
pub const REQ_PARAM: u8 = 9;
/// Request capability: `tinyint`.
pub const DATA_INT1: u8 = 10;
/// Request capability: `smallint`.
pub const DATA_INT2: u8 = 11;
/// Request capability: `int`.
pub const DATA_INT4: u8 = 12;
/// Request capability: `bit`.
pub const DATA_BIT: u8 = 13;
/// Request capability: `char`.
pub const DATA_CHAR: u8 = 14;
/// Request capability: `varchar`.
pub const DATA_VCHAR: u8 = 15;
/// Request capability: `binary`.
pub const DATA_BIN: u8 = 16;
/// Request capability: `varbinary`.
pub const DATA_VBIN: u8 = 17;
/// Request capability: `money`.
pub const DATA_MNY8: u8 = 18;
/// Request capability: `smallmoney`.
pub const DATA_MNY4: u8 = 19;
/// Request capability: `datetime`.
pub const DATA_DATE8: u8 = 20;
/// Request capability: `smalldatetime`.
pub const DATA_DATE4: u8 = 21;
/// Request capability: `real`.
pub const DATA_FLT4: u8 = 22;
/// Request capability: `float`.
pub const DATA_FLT8: u8 = 23;
/// Request capability: `numeric`.
pub const DATA_NUM: u8 = 24;
/// Request capability: `text`.
pub const DATA_TEXT: u8 = 25;
/// Request capability: `image`.
pub const DATA_IMAGE: u8 = 26;
/// Request capability: `decimal`.
pub const DATA_DEC: u8 = 27;
/// Request capability: long character data.
pub const DATA_LCHAR: u8 = 28;
/// Request capability: long binary data.
pub const DATA_LBIN: u8 = 29;
/// Request capability: nullable integers.
pub const DATA_INTN: u8 = 30;
/// Request capability: nullable datetimes.
pub const DATA_DATETIMEN: u8 = 31;
/// Request capability: nullable money.
pub const DATA_MONEYN: u8 = 32;
/// Request capability: nullable floats.
pub const DATA_FLTN: u8 = 49;
/// Request capability: nullable bits.
pub const DATA_BITN: u8 = 50;
/// Request capability: `bigint`.
pub const DATA_INT8: u8 = 51;
/// Request capability: wide tables (ROWFMT2/PARAMFMT2).
pub const WIDETABLES: u8 = 59;
/// Request capability: `unsigned smallint`.
pub const DATA_UINT2: u8 = 61;
/// Request capability: `unsigned int`.
pub const DATA_UINT4: u8 = 62;
/// Request capability: `unsigned bigint`.
pub const DATA_UINT8: u8 = 63;
/// Request capability: nullable unsigned integers.
pub const DATA_UINTN: u8 = 64;
/// Request capability: `date`.
pub const DATA_DATE: u8 = 71;
/// Request capability: `time`.
pub const DATA_TIME: u8 = 72;
/// Request capability: `unitext`.
pub const DATA_UNITEXT: u8 = 80;
/// Request capability: `bigdatetime`.
pub const DATA_BIGDATETIME: u8 = 93;
/// Request capability: microsecond time types.
pub const DATA_USECS: u8 = 94;

/// Response capability: do not send MSG tokens.
pub const RES_NOMSG: u8 = 1;
/// Response capability: do not send EED tokens.
pub const RES_NOEED: u8 = 2;
/// Response capability: do not send PARAM tokens.
pub const RES_NOPARAM: u8 = 3;

const CAP_REQUEST: u8 = 1;
const CAP_RESPONSE: u8 = 2;

/// A capability bit mask of fixed byte width.
///
/// Bit `n` lives in byte `len - 1 - n / 8` under mask `1 << (n % 8)`, so the
/// highest-numbered capabilities come first on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CapabilityMask {
    bytes: Vec<u8>,
}

impl CapabilityMask {
    /// Width the client uses for both of its masks.
    pub const CLIENT_WIDTH: usize = 14;

    /// An empty mask of `width` bytes.
    #[must_use]
    pub fn new(width: usize) -> Self {
        Self {
            bytes: vec![0; width],
        }
    }

    /// Build a mask from raw wire bytes.
    #[must_use]
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            bytes: bytes.into(),
        }
    }

    /// Raw wire bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    fn locate(&self, bit: u8) -> Option<(usize, u8)> {
        let byte = usize::from(bit / 8);
        (byte < self.bytes.len()).then(|| (self.bytes.len() - 1 - byte, 1 << (bit % 8)))
    }

    /// Set `bit`. Bits beyond the mask width are ignored.
    pub fn set(&mut self, bit: u8) {
        if let Some((index, mask)) = self.locate(bit) {
            self.bytes[index] |= mask;
        }
    }

    /// Builder form of [`CapabilityMask::set`].
    #[must_use]
    pub fn with(mut self, bit: u8) -> Self {
        self.set(bit);
        self
    }

    /// Check whether `bit` is set.
    #[must_use]
    pub fn contains(&self, bit: u8) -> bool {
        self.locate(bit)
            .is_some_and(|(index, mask)| self.bytes[index] & mask != 0)
    }
}

/// The request/response mask pair carried by a CAPABILITY token.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Capabilities {
    /// What the client may request.
    pub request: CapabilityMask,
    /// What the server should not send.
    pub response: CapabilityMask,
}

impl Capabilities {
    /// The capabilities this client advertises at login.
    #[must_use]
    pub fn client_default() -> Self {
        let request = [
            REQ_LANG,
            REQ_RPC,
            REQ_MSTMT,
            REQ_PARAM,
            DATA_INT1,
            DATA_INT2,
            DATA_INT4,
            DATA_BIT,
            DATA_CHAR,
            DATA_VCHAR,
            DATA_BIN,
            DATA_VBIN,
            DATA_MNY8,
            DATA_MNY4,
            DATA_DATE8,
            DATA_DATE4,
            DATA_FLT4,
            DATA_FLT8,
            DATA_NUM,
            DATA_TEXT,
            DATA_IMAGE,
            DATA_DEC,
            DATA_LCHAR,
            DATA_LBIN,
            DATA_INTN,
            DATA_DATETIMEN,
            DATA_MONEYN,
            DATA_FLTN,
            DATA_BITN,
            DATA_INT8,
            WIDETABLES,
            DATA_UINT2,
            DATA_UINT4,
            DATA_UINT8,
            DATA_UINTN,
            DATA_DATE,
            DATA_TIME,
            DATA_UNITEXT,
            DATA_BIGDATETIME,
            DATA_USECS,
        ]
        .into_iter()
        .fold(CapabilityMask::new(CapabilityMask::CLIENT_WIDTH), CapabilityMask::with);

        let response = CapabilityMask::new(CapabilityMask::CLIENT_WIDTH).with(RES_NOMSG);

        Self { request, response }
    }

    /// Decode the token body after the tag.
    pub fn decode(src: &mut impl Buf, order: ByteOrder) -> Result<Self, ProtocolError> {
        let declared = order.get_u16(src)? as usize;
        decode_framed(src, declared, "CAPABILITY", |body| {
            let mut request = None;
            let mut response = None;
            while body.has_remaining() {
                let kind = codec::get_u8(body)?;
                let mask = CapabilityMask::from_bytes(codec::get_bytes_u8(body)?.to_vec());
                match kind {
                    CAP_REQUEST => request = Some(mask),
                    CAP_RESPONSE => response = Some(mask),
                    other => {
                        return Err(ProtocolError::InvalidField {
                            field: "capability type",
                            value: u32::from(other),
                        });
                    }
                }
            }
            Ok(Self {
                request: request.unwrap_or_else(|| CapabilityMask::new(0)),
                response: response.unwrap_or_else(|| CapabilityMask::new(0)),
            })
        })
    }

    /// Encode the token body after the tag.
    pub fn encode(&self, dst: &mut impl BufMut, order: ByteOrder) -> Result<(), ProtocolError> {
        let mut body = Vec::with_capacity(4 + self.request.bytes.len() + self.response.bytes.len());
        body.push(CAP_REQUEST);
        codec::put_bytes_u8(&mut body, &self.request.bytes)?;
        body.push(CAP_RESPONSE);
        codec::put_bytes_u8(&mut body, &self.response.bytes)?;
        order.put_bytes_u16(dst, &body)
    }
}

impl Default for Capabilities {
    fn default() -> Self {
        Self::client_default()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_bit_positions() {
        let mask = CapabilityMask::new(2).with(0).with(9);
        assert_eq!(mask.as_bytes(), &[0x02, 0x01]);
        assert!(mask.contains(9));
        assert!(!mask.contains(8));
        assert!(!mask.contains(200));
    }

    #[test]
    fn test_client_default_mask() {
        let caps = Capabilities::client_default();
        assert!(caps.request.contains(REQ_LANG));
        assert!(caps.request.contains(WIDETABLES));
        assert!(caps.request.contains(DATA_BIGDATETIME));
        assert!(!caps.request.contains(REQ_CURSOR));
        assert!(caps.response.contains(RES_NOMSG));
    }

    #[test]
    fn test_capability_body() {
        let caps = Capabilities {
            request: CapabilityMask::from_bytes(vec![0x01, 0x02]),
            response: CapabilityMask::from_bytes(vec![0x04]),
        };
        let mut buf = Vec::new();
        caps.encode(&mut buf, ByteOrder::Little).unwrap();
        assert_eq!(buf, [7, 0, 1, 2, 0x01, 0x02, 2, 1, 0x04]);

        let mut cursor = &buf[..];
        assert_eq!(Capabilities::decode(&mut cursor, ByteOrder::Little).unwrap(), caps);
    }

    #[test]
    fn test_unknown_capability_type() {
        let bytes = [3u8, 0, 9, 1, 0];
        let mut cursor = &bytes[..];
        assert!(Capabilities::decode(&mut cursor, ByteOrder::Little).is_err());
    }
}
