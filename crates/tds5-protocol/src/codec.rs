//! Codec utilities for TDS 5.0 encoding and decoding.
//!
//! TDS 5.0 lets the client choose the byte order of integers and floats in
//! the login record; the server then answers in that order. Every multi-byte
//! read and write in the token layer therefore goes through [`ByteOrder`].
//! Packet headers are the one exception and are always big-endian.

use bytes::{Buf, BufMut, Bytes};

use crate::error::ProtocolError;

/// Byte order used for integers and floats inside the token stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ByteOrder {
    /// Least significant byte first.
    #[default]
    Little,
    /// Most significant byte first.
    Big,
}

/// Fail with [`ProtocolError::UnexpectedEof`] unless `n` bytes are available.
#[inline]
pub fn ensure(src: &impl Buf, n: usize) -> Result<(), ProtocolError> {
    if src.remaining() < n {
        Err(ProtocolError::UnexpectedEof)
    } else {
        Ok(())
    }
}

/// Read a single byte.
pub fn get_u8(src: &mut impl Buf) -> Result<u8, ProtocolError> {
    ensure(src, 1)?;
    Ok(src.get_u8())
}

/// Read exactly `len` bytes.
pub fn get_bytes(src: &mut impl Buf, len: usize) -> Result<Bytes, ProtocolError> {
    ensure(src, len)?;
    Ok(src.copy_to_bytes(len))
}

macro_rules! ordered {
    ($get:ident, $put:ident, $ty:ty, $get_le:ident, $get_be:ident, $put_le:ident, $put_be:ident) => {
        #[doc = concat!("Read a `", stringify!($ty), "` in this byte order.")]
        pub fn $get(self, src: &mut impl Buf) -> Result<$ty, ProtocolError> {
            ensure(src, std::mem::size_of::<$ty>())?;
            Ok(match self {
                Self::Little => src.$get_le(),
                Self::Big => src.$get_be(),
            })
        }

        #[doc = concat!("Write a `", stringify!($ty), "` in this byte order.")]
        pub fn $put(self, dst: &mut impl BufMut, value: $ty) {
            match self {
                Self::Little => dst.$put_le(value),
                Self::Big => dst.$put_be(value),
            }
        }
    };
}

impl ByteOrder {
    ordered!(get_u16, put_u16, u16, get_u16_le, get_u16, put_u16_le, put_u16);
    ordered!(get_i16, put_i16, i16, get_i16_le, get_i16, put_i16_le, put_i16);
    ordered!(get_u32, put_u32, u32, get_u32_le, get_u32, put_u32_le, put_u32);
    ordered!(get_i32, put_i32, i32, get_i32_le, get_i32, put_i32_le, put_i32);
    ordered!(get_u64, put_u64, u64, get_u64_le, get_u64, put_u64_le, put_u64);
    ordered!(get_i64, put_i64, i64, get_i64_le, get_i64, put_i64_le, put_i64);
    ordered!(get_f32, put_f32, f32, get_f32_le, get_f32, put_f32_le, put_f32);
    ordered!(get_f64, put_f64, f64, get_f64_le, get_f64, put_f64_le, put_f64);

    /// Read a byte string with a 2-byte length prefix.
    pub fn get_bytes_u16(self, src: &mut impl Buf) -> Result<Bytes, ProtocolError> {
        let len = self.get_u16(src)? as usize;
        get_bytes(src, len)
    }

    /// Read a byte string with a 4-byte length prefix.
    pub fn get_bytes_u32(self, src: &mut impl Buf) -> Result<Bytes, ProtocolError> {
        let len = self.get_u32(src)? as usize;
        get_bytes(src, len)
    }

    /// Write a byte string with a 2-byte length prefix.
    pub fn put_bytes_u16(self, dst: &mut impl BufMut, bytes: &[u8]) -> Result<(), ProtocolError> {
        let len = u16::try_from(bytes.len())
            .map_err(|_| ProtocolError::ValueOutOfRange("u16 length prefix"))?;
        self.put_u16(dst, len);
        dst.put_slice(bytes);
        Ok(())
    }

    /// Write a byte string with a 4-byte length prefix.
    pub fn put_bytes_u32(self, dst: &mut impl BufMut, bytes: &[u8]) -> Result<(), ProtocolError> {
        let len = u32::try_from(bytes.len())
            .map_err(|_| ProtocolError::ValueOutOfRange("u32 length prefix"))?;
        self.put_u32(dst, len);
        dst.put_slice(bytes);
        Ok(())
    }
}

/// Read a byte string with a 1-byte length prefix.
pub fn get_bytes_u8(src: &mut impl Buf) -> Result<Bytes, ProtocolError> {
    let len = get_u8(src)? as usize;
    get_bytes(src, len)
}

/// Write a byte string with a 1-byte length prefix.
pub fn put_bytes_u8(dst: &mut impl BufMut, bytes: &[u8]) -> Result<(), ProtocolError> {
    let len =
        u8::try_from(bytes.len()).map_err(|_| ProtocolError::ValueOutOfRange("u8 length prefix"))?;
    dst.put_u8(len);
    dst.put_slice(bytes);
    Ok(())
}

/// Write a fixed-width login field followed by its length byte.
///
/// The value is truncated to `width` bytes and zero padded. `width` never
/// exceeds 255 in the login record.
pub fn put_padded(dst: &mut impl BufMut, value: &[u8], width: usize) {
    let len = value.len().min(width);
    dst.put_slice(&value[..len]);
    dst.put_bytes(0, width - len);
    dst.put_u8(len as u8);
}

/// Read a fixed-width login field written by [`put_padded`].
pub fn get_padded(src: &mut impl Buf, width: usize) -> Result<Bytes, ProtocolError> {
    ensure(src, width + 1)?;
    let mut field = src.copy_to_bytes(width);
    let len = src.get_u8() as usize;
    if len > width {
        return Err(ProtocolError::InvalidField {
            field: "padded field length",
            value: len as u32,
        });
    }
    field.truncate(len);
    Ok(field)
}

/// Decode a structure whose byte length was declared up front.
///
/// An incomplete buffer is reported as [`ProtocolError::UnexpectedEof`] so
/// that streaming callers can wait for more data. Once the declared bytes are
/// present, content that overruns or underruns them is a
/// [`ProtocolError::LengthMismatch`].
pub(crate) fn decode_framed<T>(
    src: &mut impl Buf,
    declared: usize,
    token: &'static str,
    decode: impl FnOnce(&mut Bytes) -> Result<T, ProtocolError>,
) -> Result<T, ProtocolError> {
    ensure(src, declared)?;
    let mut body = src.copy_to_bytes(declared);
    let value = decode(&mut body).map_err(|e| match e {
        ProtocolError::UnexpectedEof => ProtocolError::LengthMismatch {
            token,
            declared,
            needed: declared + 1,
        },
        other => other,
    })?;
    if body.has_remaining() {
        return Err(ProtocolError::LengthMismatch {
            token,
            declared,
            needed: declared - body.remaining(),
        });
    }
    Ok(value)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use bytes::BytesMut;

    #[test]
    fn test_byte_order_integers() {
        let mut buf = BytesMut::new();
        ByteOrder::Little.put_u16(&mut buf, 0x0102);
        ByteOrder::Big.put_u16(&mut buf, 0x0102);
        assert_eq!(&buf[..], &[0x02, 0x01, 0x01, 0x02]);

        let mut cursor = buf.freeze();
        assert_eq!(ByteOrder::Little.get_u16(&mut cursor).unwrap(), 0x0102);
        assert_eq!(ByteOrder::Big.get_u16(&mut cursor).unwrap(), 0x0102);
    }

    #[test]
    fn test_short_read_is_eof() {
        let mut cursor: &[u8] = &[0x01, 0x02, 0x03];
        assert_eq!(
            ByteOrder::Big.get_i32(&mut cursor),
            Err(ProtocolError::UnexpectedEof)
        );
    }

    #[test]
    fn test_float_big_endian() {
        let mut buf = BytesMut::new();
        ByteOrder::Big.put_f64(&mut buf, 1.5);
        assert_eq!(buf[0], 0x3F);
        let mut cursor = buf.freeze();
        assert_eq!(ByteOrder::Big.get_f64(&mut cursor).unwrap(), 1.5);
    }

    #[test]
    fn test_length_prefixed() {
        let mut buf = BytesMut::new();
        put_bytes_u8(&mut buf, b"abc").unwrap();
        ByteOrder::Little.put_bytes_u16(&mut buf, b"de").unwrap();
        ByteOrder::Big.put_bytes_u32(&mut buf, b"f").unwrap();

        let mut cursor = buf.freeze();
        assert_eq!(&get_bytes_u8(&mut cursor).unwrap()[..], b"abc");
        assert_eq!(&ByteOrder::Little.get_bytes_u16(&mut cursor).unwrap()[..], b"de");
        assert_eq!(&ByteOrder::Big.get_bytes_u32(&mut cursor).unwrap()[..], b"f");
    }

    #[test]
    fn test_u8_prefix_overflow() {
        let mut buf = BytesMut::new();
        let long = vec![b'x'; 256];
        assert!(put_bytes_u8(&mut buf, &long).is_err());
    }

    #[test]
    fn test_padded_field() {
        let mut buf = BytesMut::new();
        put_padded(&mut buf, b"sa", 30);
        assert_eq!(buf.len(), 31);
        assert_eq!(buf[30], 2);

        let mut cursor = buf.freeze();
        assert_eq!(&get_padded(&mut cursor, 30).unwrap()[..], b"sa");
    }

    #[test]
    fn test_decode_framed_detects_overrun() {
        let mut cursor: &[u8] = &[0x01, 0x02, 0xFF];
        let result = decode_framed(&mut cursor, 2, "TEST", |body| {
            ByteOrder::Little.get_u32(body)
        });
        assert!(matches!(
            result,
            Err(ProtocolError::LengthMismatch { declared: 2, .. })
        ));

        let mut cursor: &[u8] = &[0x01, 0x02, 0x03];
        let result = decode_framed(&mut cursor, 3, "TEST", |body| get_u8(body));
        assert!(matches!(result, Err(ProtocolError::LengthMismatch { needed: 1, .. })));

        let mut cursor: &[u8] = &[0x01];
        let result = decode_framed(&mut cursor, 3, "TEST", |body| get_u8(body));
        assert_eq!(result, Err(ProtocolError::UnexpectedEof));
    }

    #[test]
    fn test_padded_field_truncates() {
        let mut buf = BytesMut::new();
        put_padded(&mut buf, b"abcdefghijkl", 10);
        assert_eq!(buf.len(), 11);
        assert_eq!(buf[10], 10);
        assert_eq!(&buf[..10], b"abcdefghij");
    }
}
