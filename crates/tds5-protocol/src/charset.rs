//! Server character sets.
//!
//! ASE names its character sets (`iso_1`, `utf8`, `cp1252`, ...) rather than
//! using code page numbers. The login record requests one by name and the
//! server confirms or replaces it through an environment change. Character
//! data (`CHAR`, `VARCHAR`, `TEXT` and language text) is encoded in that
//! charset; `UNICHAR`, `UNIVARCHAR` and `UNITEXT` are always UTF-16.

use encoding_rs::Encoding;

use crate::codec::ByteOrder;
use crate::error::ProtocolError;

/// A named ASE character set bound to a concrete encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Charset {
    name: &'static str,
    encoding: &'static Encoding,
}

/// Map an ASE charset name to the encoding that implements it.
fn lookup(name: &str) -> Option<(&'static str, &'static Encoding)> {
    let lowered = name.trim().to_ascii_lowercase();
    let found = match lowered.as_str() {
        "iso_1" => ("iso_1", encoding_rs::WINDOWS_1252),
        "utf8" => ("utf8", encoding_rs::UTF_8),
        "ascii_8" => ("ascii_8", encoding_rs::WINDOWS_1252),
        "cp1250" => ("cp1250", encoding_rs::WINDOWS_1250),
        "cp1251" => ("cp1251", encoding_rs::WINDOWS_1251),
        "cp1252" => ("cp1252", encoding_rs::WINDOWS_1252),
        "cp1253" => ("cp1253", encoding_rs::WINDOWS_1253),
        "cp1254" => ("cp1254", encoding_rs::WINDOWS_1254),
        "cp1255" => ("cp1255", encoding_rs::WINDOWS_1255),
        "cp1256" => ("cp1256", encoding_rs::WINDOWS_1256),
        "cp1257" => ("cp1257", encoding_rs::WINDOWS_1257),
        "cp1258" => ("cp1258", encoding_rs::WINDOWS_1258),
        "cp874" => ("cp874", encoding_rs::WINDOWS_874),
        "cp866" => ("cp866", encoding_rs::IBM866),
        "iso88592" => ("iso88592", encoding_rs::ISO_8859_2),
        "iso88595" => ("iso88595", encoding_rs::ISO_8859_5),
        "iso88596" => ("iso88596", encoding_rs::ISO_8859_6),
        "iso88597" => ("iso88597", encoding_rs::ISO_8859_7),
        "iso88598" => ("iso88598", encoding_rs::ISO_8859_8),
        "iso15" => ("iso15", encoding_rs::ISO_8859_15),
        "koi8" => ("koi8", encoding_rs::KOI8_R),
        "mac" => ("mac", encoding_rs::MACINTOSH),
        "sjis" => ("sjis", encoding_rs::SHIFT_JIS),
        "eucjis" => ("eucjis", encoding_rs::EUC_JP),
        "eucgb" => ("eucgb", encoding_rs::GBK),
        "cp936" => ("cp936", encoding_rs::GBK),
        "gb18030" => ("gb18030", encoding_rs::GB18030),
        "big5" => ("big5", encoding_rs::BIG5),
        "cp950" => ("cp950", encoding_rs::BIG5),
        "eucksc" => ("eucksc", encoding_rs::EUC_KR),
        "cp949" => ("cp949", encoding_rs::EUC_KR),
        _ => return None,
    };
    Some(found)
}

impl Charset {
    /// The charset requested when none is configured.
    pub const DEFAULT_NAME: &'static str = "iso_1";

    /// Look up a charset by its ASE name (case-insensitive).
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        lookup(name).map(|(name, encoding)| Self { name, encoding })
    }

    /// The ASE name of this charset.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// The encoding used for character data.
    #[must_use]
    pub fn encoding(&self) -> &'static Encoding {
        self.encoding
    }

    /// Decode character data. Unmappable bytes become U+FFFD.
    #[must_use]
    pub fn decode(&self, bytes: &[u8]) -> String {
        let (text, _, _) = self.encoding.decode(bytes);
        text.into_owned()
    }

    /// Encode text for the server. Unmappable characters become numeric
    /// character references, which is what `encoding_rs` does for legacy
    /// encodings.
    #[must_use]
    pub fn encode(&self, text: &str) -> Vec<u8> {
        let (bytes, _, _) = self.encoding.encode(text);
        bytes.into_owned()
    }
}

impl Default for Charset {
    fn default() -> Self {
        Self {
            name: Self::DEFAULT_NAME,
            encoding: encoding_rs::WINDOWS_1252,
        }
    }
}

/// Decode UTF-16 text in the given byte order.
pub fn decode_utf16(bytes: &[u8], order: ByteOrder) -> Result<String, ProtocolError> {
    if bytes.len() % 2 != 0 {
        return Err(ProtocolError::StringEncoding("odd UTF-16 byte length"));
    }
    let units = bytes.chunks_exact(2).map(|pair| match order {
        ByteOrder::Little => u16::from_le_bytes([pair[0], pair[1]]),
        ByteOrder::Big => u16::from_be_bytes([pair[0], pair[1]]),
    });
    char::decode_utf16(units)
        .collect::<Result<String, _>>()
        .map_err(|_| ProtocolError::StringEncoding("invalid UTF-16"))
}

/// Encode text as UTF-16 in the given byte order.
#[must_use]
pub fn encode_utf16(text: &str, order: ByteOrder) -> Vec<u8> {
    let mut out = Vec::with_capacity(text.len() * 2);
    for unit in text.encode_utf16() {
        match order {
            ByteOrder::Little => out.extend_from_slice(&unit.to_le_bytes()),
            ByteOrder::Big => out.extend_from_slice(&unit.to_be_bytes()),
        }
    }
    out
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_is_case_insensitive() {
        let cs = Charset::from_name("UTF8").unwrap();
        assert_eq!(cs.name(), "utf8");
        assert!(Charset::from_name("klingon").is_none());
    }

    #[test]
    fn test_iso_1_decodes_latin1() {
        let cs = Charset::default();
        assert_eq!(cs.decode(&[0x63, 0x61, 0x66, 0xE9]), "café");
        assert_eq!(cs.encode("café"), vec![0x63, 0x61, 0x66, 0xE9]);
    }

    #[test]
    fn test_sjis_roundtrip() {
        let cs = Charset::from_name("sjis").unwrap();
        let bytes = cs.encode("日本");
        assert_eq!(cs.decode(&bytes), "日本");
    }

    #[test]
    fn test_utf16_both_orders() {
        for order in [ByteOrder::Little, ByteOrder::Big] {
            let bytes = encode_utf16("héllo 世界", order);
            assert_eq!(decode_utf16(&bytes, order).unwrap(), "héllo 世界");
        }
        assert!(decode_utf16(&[0x00], ByteOrder::Little).is_err());
    }
}
