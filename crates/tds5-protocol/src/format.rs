//! Row and parameter format tokens.
//!
//! A format token describes the columns of the data tokens that follow it:
//! `ROWFMT`/`ROWFMT2` precede `ROW` tokens and `PARAMFMT`/`PARAMFMT2`
//! precede `PARAMS`. The "2" variants carry 4-byte lengths and status words
//! and, for rows, the catalog/schema/table/column names of each column. They
//! are used when the wide-table capability is negotiated.

use bitflags::bitflags;
use bytes::{Buf, BufMut, BytesMut};
use rust_decimal::Decimal;

use crate::codec::{self, decode_framed, get_bytes_u8, put_bytes_u8};
use crate::error::ProtocolError;
use crate::token::TokenContext;
use crate::types::{DataType, LengthKind};
use crate::value::SqlValue;

bitflags! {
    /// Column and parameter status bits.
    ///
    /// Row and parameter formats share the low bit with different meanings:
    /// hidden for row columns, output for parameters.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ColumnStatus: u32 {
        /// Hidden (browse mode key) column.
        const HIDDEN = 0x01;
        /// Output (return) parameter.
        const OUTPUT = 0x01;
        /// Key column.
        const KEY = 0x02;
        /// Version (timestamp) column.
        const VERSION = 0x04;
        /// Updatable column.
        const UPDATABLE = 0x10;
        /// NULL allowed.
        const NULLABLE = 0x20;
        /// Identity column.
        const IDENTITY = 0x40;
        /// Blank-padded `char` column.
        const PADCHAR = 0x80;
    }
}

/// Description of one column or parameter.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ColumnFormat {
    /// Column label or parameter name.
    pub name: String,
    /// Catalog name (wide row formats only).
    pub catalog: String,
    /// Schema name (wide row formats only).
    pub schema: String,
    /// Table name (wide row formats only).
    pub table: String,
    /// Underlying column name (wide row formats only).
    pub column: String,
    /// Status bits.
    pub status: ColumnStatus,
    /// Server usertype.
    pub user_type: i32,
    /// Wire datatype.
    pub data_type: Option<DataType>,
    /// Maximum length in bytes.
    pub max_length: u32,
    /// Precision for `numeric`/`decimal` and the big time types.
    pub precision: u8,
    /// Scale for `numeric`/`decimal`.
    pub scale: u8,
    /// Table name carried by `text`/`image` formats.
    pub blob_table: String,
    /// Locale information (normally empty).
    pub locale: String,
}

/// Format of the rows in the current result set.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RowFormat {
    /// Whether this arrived as (or should be written as) `ROWFMT2`.
    pub wide: bool,
    /// Column descriptions in order.
    pub columns: Vec<ColumnFormat>,
}

/// Format of the parameters in the following `PARAMS` token.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ParamFormat {
    /// Whether this arrived as (or should be written as) `PARAMFMT2`.
    pub wide: bool,
    /// Parameter descriptions in order.
    pub columns: Vec<ColumnFormat>,
}

/// Magnitude bytes used by the server for a `numeric` of the given precision.
#[must_use]
pub fn numeric_magnitude_len(precision: u8) -> usize {
    let precision = u64::from(precision.clamp(1, 38));
    (precision * 332_193).div_ceil(800_000) as usize
}

impl ColumnFormat {
    /// The wire datatype, or an error for formats built without one.
    pub fn data_type(&self) -> Result<DataType, ProtocolError> {
        self.data_type.ok_or(ProtocolError::InvalidField {
            field: "column datatype",
            value: 0,
        })
    }

    /// Whether the column allows NULL.
    #[must_use]
    pub fn is_nullable(&self) -> bool {
        self.status.contains(ColumnStatus::NULLABLE)
    }

    /// Build a parameter format able to carry `value`.
    ///
    /// NULL parameters without a better hint are sent as a nullable 4-byte
    /// integer, which the server converts implicitly.
    #[must_use]
    pub fn for_param(name: &str, value: &SqlValue, output: bool, ctx: &TokenContext) -> Self {
        let (data_type, max_length, precision, scale) = match value {
            SqlValue::Null => (DataType::IntN, 4, 0, 0),
            SqlValue::Bool(_) => (DataType::Bit, 1, 0, 0),
            SqlValue::TinyInt(_) => (DataType::IntN, 1, 0, 0),
            SqlValue::SmallInt(_) => (DataType::IntN, 2, 0, 0),
            SqlValue::Int(_) => (DataType::IntN, 4, 0, 0),
            SqlValue::BigInt(_) => (DataType::IntN, 8, 0, 0),
            SqlValue::UnsignedSmallInt(_) => (DataType::UIntN, 2, 0, 0),
            SqlValue::UnsignedInt(_) => (DataType::UIntN, 4, 0, 0),
            SqlValue::UnsignedBigInt(_) => (DataType::UIntN, 8, 0, 0),
            SqlValue::Real(_) => (DataType::FltN, 4, 0, 0),
            SqlValue::Float(_) => (DataType::FltN, 8, 0, 0),
            SqlValue::Decimal(d) => {
                let scale = d.scale().min(Decimal::MAX_SCALE) as u8;
                (
                    DataType::NumN,
                    (numeric_magnitude_len(38) + 1) as u32,
                    38,
                    scale,
                )
            }
            SqlValue::String(s) => {
                let len = ctx.charset.encode(s).len();
                if len <= 255 {
                    (DataType::VarChar, 255, 0, 0)
                } else {
                    (DataType::LongChar, len as u32, 0, 0)
                }
            }
            SqlValue::Binary(b) => {
                if b.len() <= 255 {
                    (DataType::VarBinary, 255, 0, 0)
                } else {
                    (DataType::LongBinary, b.len() as u32, 0, 0)
                }
            }
            SqlValue::DateTime(_) => (DataType::DateTimeN, 8, 0, 0),
            SqlValue::Date(_) => (DataType::DateN, 4, 0, 0),
            SqlValue::Time(_) => (DataType::TimeN, 4, 0, 0),
        };

        let mut status = ColumnStatus::NULLABLE;
        if output {
            status |= ColumnStatus::OUTPUT;
        }

        Self {
            name: name.to_owned(),
            status,
            data_type: Some(data_type),
            max_length,
            precision,
            scale,
            ..Self::default()
        }
    }

    fn decode_type_info(&mut self, src: &mut impl Buf, ctx: &TokenContext) -> Result<(), ProtocolError> {
        let data_type = DataType::from_u8(codec::get_u8(src)?)?;
        self.data_type = Some(data_type);
        match data_type.length_kind() {
            LengthKind::Fixed(n) => self.max_length = n as u32,
            LengthKind::Byte => self.max_length = u32::from(codec::get_u8(src)?),
            LengthKind::Decimal => {
                self.max_length = u32::from(codec::get_u8(src)?);
                self.precision = codec::get_u8(src)?;
                self.scale = codec::get_u8(src)?;
            }
            LengthKind::BigTime => {
                self.max_length = u32::from(codec::get_u8(src)?);
                self.precision = codec::get_u8(src)?;
            }
            LengthKind::Long => self.max_length = ctx.byte_order.get_u32(src)?,
            LengthKind::Blob => {
                self.max_length = ctx.byte_order.get_u32(src)?;
                let name = ctx.byte_order.get_bytes_u16(src)?;
                self.blob_table = ctx.charset.decode(&name);
            }
        }
        let locale = get_bytes_u8(src)?;
        self.locale = ctx.charset.decode(&locale);
        Ok(())
    }

    fn encode_type_info(&self, dst: &mut impl BufMut, ctx: &TokenContext) -> Result<(), ProtocolError> {
        let data_type = self.data_type()?;
        dst.put_u8(data_type as u8);
        match data_type.length_kind() {
            LengthKind::Fixed(_) => {}
            LengthKind::Byte => dst.put_u8(byte_length(self.max_length)?),
            LengthKind::Decimal => {
                dst.put_u8(byte_length(self.max_length)?);
                dst.put_u8(self.precision);
                dst.put_u8(self.scale);
            }
            LengthKind::BigTime => {
                dst.put_u8(byte_length(self.max_length)?);
                dst.put_u8(self.precision);
            }
            LengthKind::Long => ctx.byte_order.put_u32(dst, self.max_length),
            LengthKind::Blob => {
                ctx.byte_order.put_u32(dst, self.max_length);
                ctx.byte_order
                    .put_bytes_u16(dst, &ctx.charset.encode(&self.blob_table))?;
            }
        }
        put_bytes_u8(dst, &ctx.charset.encode(&self.locale))
    }
}

fn byte_length(max_length: u32) -> Result<u8, ProtocolError> {
    u8::try_from(max_length).map_err(|_| ProtocolError::ValueOutOfRange("one-byte column length"))
}

fn get_name(src: &mut impl Buf, ctx: &TokenContext) -> Result<String, ProtocolError> {
    Ok(ctx.charset.decode(&get_bytes_u8(src)?))
}

fn put_name(dst: &mut impl BufMut, name: &str, ctx: &TokenContext) -> Result<(), ProtocolError> {
    put_bytes_u8(dst, &ctx.charset.encode(name))
}

#[derive(Clone, Copy)]
enum Layout {
    Row,
    Row2,
    Param,
    Param2,
}

impl Layout {
    const fn token_name(self) -> &'static str {
        match self {
            Self::Row => "ROWFMT",
            Self::Row2 => "ROWFMT2",
            Self::Param => "PARAMFMT",
            Self::Param2 => "PARAMFMT2",
        }
    }

    const fn is_wide(self) -> bool {
        matches!(self, Self::Row2 | Self::Param2)
    }
}

fn decode_columns(
    src: &mut impl Buf,
    layout: Layout,
    ctx: &TokenContext,
) -> Result<Vec<ColumnFormat>, ProtocolError> {
    let declared = if layout.is_wide() {
        ctx.byte_order.get_u32(src)? as usize
    } else {
        ctx.byte_order.get_u16(src)? as usize
    };

    decode_framed(src, declared, layout.token_name(), |body| {
        let count = ctx.byte_order.get_u16(body)? as usize;
        let mut columns = Vec::with_capacity(count.min(1024));
        for _ in 0..count {
            let mut column = ColumnFormat {
                name: get_name(body, ctx)?,
                ..ColumnFormat::default()
            };
            if let Layout::Row2 = layout {
                column.catalog = get_name(body, ctx)?;
                column.schema = get_name(body, ctx)?;
                column.table = get_name(body, ctx)?;
                column.column = get_name(body, ctx)?;
            }
            let status = if layout.is_wide() {
                ctx.byte_order.get_u32(body)?
            } else {
                u32::from(codec::get_u8(body)?)
            };
            column.status = ColumnStatus::from_bits_retain(status);
            column.user_type = ctx.byte_order.get_i32(body)?;
            column.decode_type_info(body, ctx)?;
            columns.push(column);
        }
        Ok(columns)
    })
}

fn encode_columns(
    dst: &mut BytesMut,
    tag: u8,
    layout: Layout,
    columns: &[ColumnFormat],
    ctx: &TokenContext,
) -> Result<(), ProtocolError> {
    let mut body = BytesMut::new();
    let count = u16::try_from(columns.len())
        .map_err(|_| ProtocolError::ValueOutOfRange("column count"))?;
    ctx.byte_order.put_u16(&mut body, count);

    for column in columns {
        put_name(&mut body, &column.name, ctx)?;
        if let Layout::Row2 = layout {
            put_name(&mut body, &column.catalog, ctx)?;
            put_name(&mut body, &column.schema, ctx)?;
            put_name(&mut body, &column.table, ctx)?;
            put_name(&mut body, &column.column, ctx)?;
        }
        if layout.is_wide() {
            ctx.byte_order.put_u32(&mut body, column.status.bits());
        } else {
            body.put_u8(column.status.bits() as u8);
        }
        ctx.byte_order.put_i32(&mut body, column.user_type);
        column.encode_type_info(&mut body, ctx)?;
    }

    dst.put_u8(tag);
    if layout.is_wide() {
        ctx.byte_order.put_bytes_u32(dst, &body)
    } else {
        ctx.byte_order.put_bytes_u16(dst, &body)
    }
}

impl RowFormat {
    /// Decode a `ROWFMT` (or `ROWFMT2` when `wide`) body, after the tag.
    pub fn decode(src: &mut impl Buf, wide: bool, ctx: &TokenContext) -> Result<Self, ProtocolError> {
        let layout = if wide { Layout::Row2 } else { Layout::Row };
        Ok(Self {
            wide,
            columns: decode_columns(src, layout, ctx)?,
        })
    }

    /// Encode the token including its tag.
    pub fn encode(&self, dst: &mut BytesMut, ctx: &TokenContext) -> Result<(), ProtocolError> {
        if self.wide {
            encode_columns(dst, crate::token::TokenType::RowFormat2 as u8, Layout::Row2, &self.columns, ctx)
        } else {
            encode_columns(dst, crate::token::TokenType::RowFormat as u8, Layout::Row, &self.columns, ctx)
        }
    }

    /// Index of the column labelled `name` (case-insensitive).
    #[must_use]
    pub fn position(&self, name: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|c| c.name.eq_ignore_ascii_case(name))
    }
}

impl ParamFormat {
    /// Decode a `PARAMFMT` (or `PARAMFMT2` when `wide`) body, after the tag.
    pub fn decode(src: &mut impl Buf, wide: bool, ctx: &TokenContext) -> Result<Self, ProtocolError> {
        let layout = if wide { Layout::Param2 } else { Layout::Param };
        Ok(Self {
            wide,
            columns: decode_columns(src, layout, ctx)?,
        })
    }

    /// Encode the token including its tag.
    pub fn encode(&self, dst: &mut BytesMut, ctx: &TokenContext) -> Result<(), ProtocolError> {
        if self.wide {
            encode_columns(dst, crate::token::TokenType::ParamFormat2 as u8, Layout::Param2, &self.columns, ctx)
        } else {
            encode_columns(dst, crate::token::TokenType::ParamFormat as u8, Layout::Param, &self.columns, ctx)
        }
    }
}
