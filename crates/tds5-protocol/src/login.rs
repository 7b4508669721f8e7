//! TDS 5.0 login record.
//!
//! The login record is a fixed 568-byte structure of padded fields followed by
//! a CAPABILITY token, sent as one LOGIN message. String fields are zero
//! padded to their width and trailed by a length byte; the packet size is
//! written as ASCII digits.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::capability::Capabilities;
use crate::charset::Charset;
use crate::codec::{self, ByteOrder, get_padded, put_padded};
use crate::error::ProtocolError;
use crate::packet::DEFAULT_PACKET_SIZE;
use crate::token::TokenType;

/// TDS protocol version 5.0.
pub const TDS_VERSION: [u8; 4] = [5, 0, 0, 0];

/// Length of the fixed part of the login record.
pub const LOGIN_RECORD_LEN: usize = 568;

const NAME_WIDTH: usize = 30;
const PROGRAM_NAME_WIDTH: usize = 10;
const PACKET_SIZE_WIDTH: usize = 6;
const REMOTE_PASSWORD_WIDTH: usize = 253;

/// Conversion bytes (int2, int4, char, flt, date, usedb) for each byte order.
const CONVERSION_LITTLE: [u8; 6] = [3, 1, 6, 10, 9, 1];
const CONVERSION_BIG: [u8; 6] = [2, 0, 6, 4, 8, 1];

/// noshort, flt4, date4.
const SHORT_FORMATS: [u8; 3] = [0, 0x0D, 0x11];

/// Contents of a login request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginRecord {
    /// Client host name.
    pub host_name: String,
    /// Login name.
    pub user_name: String,
    /// Password, sent in the clear inside the (possibly TLS) stream.
    pub password: String,
    /// Client process id as text.
    pub host_process: String,
    /// Application name.
    pub app_name: String,
    /// Server name.
    pub server_name: String,
    /// Client library name.
    pub library_name: String,
    /// Client library version.
    pub library_version: [u8; 4],
    /// Requested language, empty for the server default.
    pub language: String,
    /// Requested charset.
    pub charset: String,
    /// Requested packet size.
    pub packet_size: u32,
    /// Byte order the server should use for integers and floats.
    pub byte_order: ByteOrder,
    /// Capabilities offered after the fixed record.
    pub capabilities: Capabilities,
}

impl Default for LoginRecord {
    fn default() -> Self {
        Self {
            host_name: String::new(),
            user_name: String::new(),
            password: String::new(),
            host_process: String::new(),
            app_name: String::new(),
            server_name: String::new(),
            library_name: "CT-Library".into(),
            library_version: [0x0F, 0x07, 0x00, 0x0D],
            language: String::new(),
            charset: Charset::DEFAULT_NAME.into(),
            packet_size: DEFAULT_PACKET_SIZE as u32,
            byte_order: ByteOrder::Little,
            capabilities: Capabilities::client_default(),
        }
    }
}

impl LoginRecord {
    /// Encode the record and its CAPABILITY token as one message payload.
    ///
    /// Login strings are sent in the requested charset, falling back to
    /// `iso_1` for unknown names.
    pub fn encode(&self) -> Result<Bytes, ProtocolError> {
        let charset = Charset::from_name(&self.charset).unwrap_or_default();
        let text = |s: &str| charset.encode(s);

        let mut dst = BytesMut::with_capacity(LOGIN_RECORD_LEN + 40);
        put_padded(&mut dst, &text(&self.host_name), NAME_WIDTH);
        put_padded(&mut dst, &text(&self.user_name), NAME_WIDTH);
        put_padded(&mut dst, &text(&self.password), NAME_WIDTH);
        put_padded(&mut dst, &text(&self.host_process), NAME_WIDTH);
        dst.put_slice(match self.byte_order {
            ByteOrder::Little => &CONVERSION_LITTLE,
            ByteOrder::Big => &CONVERSION_BIG,
        });
        // ldmpld, interface spare (2), type, bufsize (4), spare (3)
        dst.put_bytes(0, 1 + 2 + 4 + 3);
        put_padded(&mut dst, &text(&self.app_name), NAME_WIDTH);
        put_padded(&mut dst, &text(&self.server_name), NAME_WIDTH);

        // Remote password block: server name (empty) then password.
        let password = text(&self.password);
        let len = password.len().min(REMOTE_PASSWORD_WIDTH);
        dst.put_u8(0);
        dst.put_u8(len as u8);
        dst.put_slice(&password[..len]);
        dst.put_bytes(0, REMOTE_PASSWORD_WIDTH - len);
        dst.put_u8((len + 2) as u8);

        dst.put_slice(&TDS_VERSION);
        put_padded(&mut dst, &text(&self.library_name), PROGRAM_NAME_WIDTH);
        dst.put_slice(&self.library_version);
        dst.put_slice(&SHORT_FORMATS);
        put_padded(&mut dst, &text(&self.language), NAME_WIDTH);
        // setlang
        dst.put_u8(u8::from(!self.language.is_empty()));
        // oldsecure (2), seclogin, secbulk, halogin, hasessionid (6), haspare (2)
        dst.put_bytes(0, 2 + 1 + 1 + 1 + 6 + 2);
        put_padded(&mut dst, &text(&self.charset), NAME_WIDTH);
        // setcharset
        dst.put_u8(1);
        put_padded(&mut dst, self.packet_size.to_string().as_bytes(), PACKET_SIZE_WIDTH);
        dst.put_bytes(0, 4);

        debug_assert_eq!(dst.len(), LOGIN_RECORD_LEN);

        dst.put_u8(TokenType::Capability as u8);
        self.capabilities.encode(&mut dst, self.byte_order)?;
        Ok(dst.freeze())
    }

    /// Decode a login message payload, as a server would.
    pub fn decode(src: &mut impl Buf) -> Result<Self, ProtocolError> {
        codec::ensure(src, LOGIN_RECORD_LEN)?;
        let mut fixed = src.copy_to_bytes(LOGIN_RECORD_LEN);
        let raw_text = |b: Bytes| String::from_utf8_lossy(&b).into_owned();

        let host_name = get_padded(&mut fixed, NAME_WIDTH)?;
        let user_name = get_padded(&mut fixed, NAME_WIDTH)?;
        let password = get_padded(&mut fixed, NAME_WIDTH)?;
        let host_process = get_padded(&mut fixed, NAME_WIDTH)?;
        let conversion = codec::get_bytes(&mut fixed, CONVERSION_LITTLE.len())?;
        let byte_order = match conversion[0] {
            3 => ByteOrder::Little,
            2 => ByteOrder::Big,
            other => {
                return Err(ProtocolError::InvalidField {
                    field: "login int2 byte order",
                    value: u32::from(other),
                });
            }
        };
        fixed.advance(1 + 2 + 4 + 3);
        let app_name = get_padded(&mut fixed, NAME_WIDTH)?;
        let server_name = get_padded(&mut fixed, NAME_WIDTH)?;
        fixed.advance(1 + 1 + REMOTE_PASSWORD_WIDTH + 1);

        let tds_version = codec::get_bytes(&mut fixed, 4)?;
        if tds_version[..] != TDS_VERSION {
            return Err(ProtocolError::InvalidField {
                field: "login TDS version",
                value: u32::from(tds_version[0]),
            });
        }
        let library_name = get_padded(&mut fixed, PROGRAM_NAME_WIDTH)?;
        let mut library_version = [0u8; 4];
        fixed.copy_to_slice(&mut library_version);
        fixed.advance(SHORT_FORMATS.len());
        let language = get_padded(&mut fixed, NAME_WIDTH)?;
        fixed.advance(1 + 2 + 1 + 1 + 1 + 6 + 2);
        let charset = get_padded(&mut fixed, NAME_WIDTH)?;
        fixed.advance(1);
        let packet_size = get_padded(&mut fixed, PACKET_SIZE_WIDTH)?;
        let packet_size = std::str::from_utf8(&packet_size)
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(0);

        let tag = codec::get_u8(src)?;
        if tag != TokenType::Capability as u8 {
            return Err(ProtocolError::UnknownToken(tag));
        }
        let capabilities = Capabilities::decode(src, byte_order)?;

        Ok(Self {
            host_name: raw_text(host_name),
            user_name: raw_text(user_name),
            password: raw_text(password),
            host_process: raw_text(host_process),
            app_name: raw_text(app_name),
            server_name: raw_text(server_name),
            library_name: raw_text(library_name),
            library_version,
            language: raw_text(language),
            charset: raw_text(charset),
            packet_size,
            byte_order,
            capabilities,
        })
    }
}
