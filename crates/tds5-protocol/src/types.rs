//! TDS 5.0 datatype identifiers.

use crate::error::ProtocolError;

/// Usertype the server reports for `UNICHAR` columns.
pub const USER_TYPE_UNICHAR: i32 = 34;
/// Usertype the server reports for `UNIVARCHAR` columns.
pub const USER_TYPE_UNIVARCHAR: i32 = 35;
/// Usertype of `timestamp` columns (varbinary(8)).
pub const USER_TYPE_TIMESTAMP: i32 = 80;

/// Wire datatype of a column or parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum DataType {
    /// `tinyint`.
    Int1 = 0x30,
    /// `smallint`.
    Int2 = 0x34,
    /// `int`.
    Int4 = 0x38,
    /// `bigint`.
    Int8 = 0xBF,
    /// Nullable signed integer (1, 2, 4 or 8 bytes).
    IntN = 0x26,
    /// `unsigned smallint`.
    UInt2 = 0x41,
    /// `unsigned int`.
    UInt4 = 0x42,
    /// `unsigned bigint`.
    UInt8 = 0x43,
    /// Nullable unsigned integer.
    UIntN = 0x44,
    /// `real`.
    Flt4 = 0x3B,
    /// `float`.
    Flt8 = 0x3E,
    /// Nullable float (4 or 8 bytes).
    FltN = 0x6D,
    /// `bit`.
    Bit = 0x32,
    /// `char`.
    Char = 0x2F,
    /// `varchar`.
    VarChar = 0x27,
    /// Long character data with 4-byte lengths.
    LongChar = 0xAF,
    /// `binary`.
    Binary = 0x2D,
    /// `varbinary`.
    VarBinary = 0x25,
    /// Long binary data with 4-byte lengths; also carries `unichar`/`univarchar`.
    LongBinary = 0xE1,
    /// `text`.
    Text = 0x23,
    /// `image`.
    Image = 0x22,
    /// `unitext`.
    UniText = 0xAE,
    /// `money`.
    Money = 0x3C,
    /// `smallmoney`.
    ShortMoney = 0x7A,
    /// Nullable money (4 or 8 bytes).
    MoneyN = 0x6E,
    /// `datetime`.
    DateTime = 0x3D,
    /// `smalldatetime`.
    ShortDate = 0x3A,
    /// Nullable datetime (4 or 8 bytes).
    DateTimeN = 0x6F,
    /// `date`.
    Date = 0x31,
    /// `time`.
    Time = 0x33,
    /// Nullable date.
    DateN = 0x7B,
    /// Nullable time.
    TimeN = 0x93,
    /// Nullable `bigdatetime`.
    BigDateTimeN = 0xBB,
    /// Nullable `bigtime`.
    BigTimeN = 0xBC,
    /// `numeric`.
    NumN = 0x6C,
    /// `decimal`.
    DecN = 0x6A,
}

/// How a datatype's length is described in formats and rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LengthKind {
    /// Fixed width, no length on the wire.
    Fixed(usize),
    /// One-byte maximum length in the format, one-byte length per value.
    Byte,
    /// As [`LengthKind::Byte`], plus precision and scale bytes in the format.
    Decimal,
    /// As [`LengthKind::Byte`], plus a precision byte in the format.
    BigTime,
    /// Four-byte maximum length in the format, four-byte length per value.
    Long,
    /// Text pointer layout: format carries a table name, values a text pointer
    /// and timestamp ahead of the four-byte length.
    Blob,
}

impl DataType {
    /// Create a datatype from its wire byte.
    pub fn from_u8(value: u8) -> Result<Self, ProtocolError> {
        Ok(match value {
            0x30 => Self::Int1,
            0x34 => Self::Int2,
            0x38 => Self::Int4,
            0xBF => Self::Int8,
            0x26 => Self::IntN,
            0x41 => Self::UInt2,
            0x42 => Self::UInt4,
            0x43 => Self::UInt8,
            0x44 => Self::UIntN,
            0x3B => Self::Flt4,
            0x3E => Self::Flt8,
            0x6D => Self::FltN,
            0x32 => Self::Bit,
            0x2F => Self::Char,
            0x27 => Self::VarChar,
            0xAF => Self::LongChar,
            0x2D => Self::Binary,
            0x25 => Self::VarBinary,
            0xE1 => Self::LongBinary,
            0x23 => Self::Text,
            0x22 => Self::Image,
            0xAE => Self::UniText,
            0x3C => Self::Money,
            0x7A => Self::ShortMoney,
            0x6E => Self::MoneyN,
            0x3D => Self::DateTime,
            0x3A => Self::ShortDate,
            0x6F => Self::DateTimeN,
            0x31 => Self::Date,
            0x33 => Self::Time,
            0x7B => Self::DateN,
            0x93 => Self::TimeN,
            0xBB => Self::BigDateTimeN,
            0xBC => Self::BigTimeN,
            0x6C => Self::NumN,
            0x6A => Self::DecN,
            _ => return Err(ProtocolError::UnsupportedDataType(value)),
        })
    }

    /// Length layout of this datatype.
    #[must_use]
    pub const fn length_kind(self) -> LengthKind {
        match self {
            Self::Int1 | Self::Bit => LengthKind::Fixed(1),
            Self::Int2 | Self::UInt2 => LengthKind::Fixed(2),
            Self::Int4
            | Self::UInt4
            | Self::Flt4
            | Self::ShortMoney
            | Self::ShortDate
            | Self::Date
            | Self::Time => LengthKind::Fixed(4),
            Self::Int8 | Self::UInt8 | Self::Flt8 | Self::Money | Self::DateTime => {
                LengthKind::Fixed(8)
            }
            Self::IntN
            | Self::UIntN
            | Self::FltN
            | Self::MoneyN
            | Self::DateTimeN
            | Self::DateN
            | Self::TimeN
            | Self::Char
            | Self::VarChar
            | Self::Binary
            | Self::VarBinary => LengthKind::Byte,
            Self::NumN | Self::DecN => LengthKind::Decimal,
            Self::BigDateTimeN | Self::BigTimeN => LengthKind::BigTime,
            Self::LongChar | Self::LongBinary => LengthKind::Long,
            Self::Text | Self::Image | Self::UniText => LengthKind::Blob,
        }
    }

    /// Whether values of this type can be NULL on the wire.
    #[must_use]
    pub const fn is_nullable(self) -> bool {
        !matches!(self.length_kind(), LengthKind::Fixed(_))
    }

    /// Short lower-case name used in diagnostics.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Int1 => "int1",
            Self::Int2 => "int2",
            Self::Int4 => "int4",
            Self::Int8 => "int8",
            Self::IntN => "intn",
            Self::UInt2 => "uint2",
            Self::UInt4 => "uint4",
            Self::UInt8 => "uint8",
            Self::UIntN => "uintn",
            Self::Flt4 => "flt4",
            Self::Flt8 => "flt8",
            Self::FltN => "fltn",
            Self::Bit => "bit",
            Self::Char => "char",
            Self::VarChar => "varchar",
            Self::LongChar => "longchar",
            Self::Binary => "binary",
            Self::VarBinary => "varbinary",
            Self::LongBinary => "longbinary",
            Self::Text => "text",
            Self::Image => "image",
            Self::UniText => "unitext",
            Self::Money => "money",
            Self::ShortMoney => "shortmoney",
            Self::MoneyN => "moneyn",
            Self::DateTime => "datetime",
            Self::ShortDate => "shortdate",
            Self::DateTimeN => "datetimen",
            Self::Date => "date",
            Self::Time => "time",
            Self::DateN => "daten",
            Self::TimeN => "timen",
            Self::BigDateTimeN => "bigdatetimen",
            Self::BigTimeN => "bigtimen",
            Self::NumN => "numn",
            Self::DecN => "decn",
        }
    }
}
