//! Column and parameter values.
//!
//! Decoding is a pure function of the column format, the raw bytes and the
//! session [`TokenContext`] (byte order and charset). No culture-aware text
//! parsing is involved at any point.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use rust_decimal::Decimal;

use crate::charset::{decode_utf16, encode_utf16};
use crate::codec::{self, ByteOrder};
use crate::error::ProtocolError;
use crate::format::{ColumnFormat, numeric_magnitude_len};
use crate::token::TokenContext;
use crate::types::{DataType, LengthKind, USER_TYPE_UNICHAR, USER_TYPE_UNIVARCHAR};

/// Days between 0000-01-01 and 1900-01-01 in the `bigdatetime` calendar.
pub const BIGDATETIME_DAY_BIAS: i64 = 693_961;

const TICKS_PER_SECOND: i64 = 300;
const TICKS_PER_DAY: i64 = TICKS_PER_SECOND * 86_400;
const MICROS_PER_DAY: i64 = 86_400_000_000;
const TEXT_POINTER_LEN: usize = 16;
const TEXT_TIMESTAMP_LEN: usize = 8;

/// A decoded SQL value.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    /// SQL NULL.
    Null,
    /// `bit`.
    Bool(bool),
    /// `tinyint`.
    TinyInt(u8),
    /// `smallint`.
    SmallInt(i16),
    /// `int`.
    Int(i32),
    /// `bigint`.
    BigInt(i64),
    /// `unsigned smallint`.
    UnsignedSmallInt(u16),
    /// `unsigned int`.
    UnsignedInt(u32),
    /// `unsigned bigint`.
    UnsignedBigInt(u64),
    /// `real`.
    Real(f32),
    /// `float`.
    Float(f64),
    /// `numeric`, `decimal`, `money` and `smallmoney`.
    Decimal(Decimal),
    /// Character data in any charset or UTF-16.
    String(String),
    /// Binary data.
    Binary(Bytes),
    /// `datetime`, `smalldatetime` and `bigdatetime`.
    DateTime(NaiveDateTime),
    /// `date`.
    Date(NaiveDate),
    /// `time` and `bigtime`.
    Time(NaiveTime),
}

fn base_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(1900, 1, 1).unwrap_or_default()
}

fn date_from_days(days: i64) -> Result<NaiveDate, ProtocolError> {
    base_date()
        .checked_add_signed(Duration::days(days))
        .ok_or(ProtocolError::ValueOutOfRange("date"))
}

fn days_from_date(date: NaiveDate) -> i64 {
    date.signed_duration_since(base_date()).num_days()
}

fn time_from_ticks(ticks: i64) -> Result<NaiveTime, ProtocolError> {
    if !(0..TICKS_PER_DAY).contains(&ticks) {
        return Err(ProtocolError::ValueOutOfRange("time ticks"));
    }
    let nanos = ticks * 10_000_000 / 3;
    NaiveTime::from_num_seconds_from_midnight_opt(
        (nanos / 1_000_000_000) as u32,
        (nanos % 1_000_000_000) as u32,
    )
    .ok_or(ProtocolError::ValueOutOfRange("time"))
}

/// Ticks of 1/300 second since midnight, rounded to the nearest tick.
fn ticks_from_time(time: NaiveTime) -> i64 {
    let secs = i64::from(time.num_seconds_from_midnight());
    let nanos = i64::from(time.nanosecond().min(999_999_999));
    secs * TICKS_PER_SECOND + (nanos * 3 + 5_000_000) / 10_000_000
}

fn time_from_micros(micros: i64) -> Result<NaiveTime, ProtocolError> {
    if !(0..MICROS_PER_DAY).contains(&micros) {
        return Err(ProtocolError::ValueOutOfRange("bigtime"));
    }
    NaiveTime::from_num_seconds_from_midnight_opt(
        (micros / 1_000_000) as u32,
        ((micros % 1_000_000) * 1_000) as u32,
    )
    .ok_or(ProtocolError::ValueOutOfRange("bigtime"))
}

fn micros_from_time(time: NaiveTime) -> i64 {
    i64::from(time.num_seconds_from_midnight()) * 1_000_000
        + i64::from(time.nanosecond().min(999_999_999)) / 1_000
}

fn is_unichar(column: &ColumnFormat) -> bool {
    matches!(column.user_type, USER_TYPE_UNICHAR | USER_TYPE_UNIVARCHAR)
}

impl SqlValue {
    /// Check whether this value is NULL.
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Short name of the value's kind, for diagnostics.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::TinyInt(_) => "tinyint",
            Self::SmallInt(_) => "smallint",
            Self::Int(_) => "int",
            Self::BigInt(_) => "bigint",
            Self::UnsignedSmallInt(_) => "unsigned smallint",
            Self::UnsignedInt(_) => "unsigned int",
            Self::UnsignedBigInt(_) => "unsigned bigint",
            Self::Real(_) => "real",
            Self::Float(_) => "float",
            Self::Decimal(_) => "decimal",
            Self::String(_) => "string",
            Self::Binary(_) => "binary",
            Self::DateTime(_) => "datetime",
            Self::Date(_) => "date",
            Self::Time(_) => "time",
        }
    }

    /// The value as a wide integer, for integer and bit values.
    #[must_use]
    pub fn as_i128(&self) -> Option<i128> {
        Some(match *self {
            Self::Bool(b) => i128::from(b),
            Self::TinyInt(v) => i128::from(v),
            Self::SmallInt(v) => i128::from(v),
            Self::Int(v) => i128::from(v),
            Self::BigInt(v) => i128::from(v),
            Self::UnsignedSmallInt(v) => i128::from(v),
            Self::UnsignedInt(v) => i128::from(v),
            Self::UnsignedBigInt(v) => i128::from(v),
            _ => return None,
        })
    }

    /// The value as an `i64`, when it is an integer that fits.
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        self.as_i128().and_then(|v| i64::try_from(v).ok())
    }

    /// The value as an `f64`, for numeric values.
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Real(v) => Some(f64::from(*v)),
            Self::Float(v) => Some(*v),
            Self::Decimal(d) => d.to_string().parse().ok(),
            other => other.as_i128().map(|v| v as f64),
        }
    }

    /// The value as a string slice, for character values.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Decode one value described by `column`.
    pub fn decode(
        src: &mut impl Buf,
        column: &ColumnFormat,
        ctx: &TokenContext,
    ) -> Result<Self, ProtocolError> {
        let data_type = column.data_type()?;
        let order = ctx.byte_order;

        let len = match data_type.length_kind() {
            LengthKind::Fixed(n) => n,
            LengthKind::Byte | LengthKind::Decimal | LengthKind::BigTime => {
                codec::get_u8(src)? as usize
            }
            LengthKind::Long => order.get_u32(src)? as usize,
            LengthKind::Blob => {
                let pointer_len = codec::get_u8(src)? as usize;
                if pointer_len == 0 {
                    return Ok(Self::Null);
                }
                codec::get_bytes(src, pointer_len + TEXT_TIMESTAMP_LEN)?;
                order.get_u32(src)? as usize
            }
        };

        if len == 0 && data_type.is_nullable() {
            return Ok(Self::Null);
        }

        let mut raw = codec::get_bytes(src, len)?;
        decode_raw(&mut raw, len, data_type, column, ctx)
    }

    /// Encode this value for `column`, including its length prefix.
    pub fn encode(
        &self,
        dst: &mut impl BufMut,
        column: &ColumnFormat,
        ctx: &TokenContext,
    ) -> Result<(), ProtocolError> {
        let data_type = column.data_type()?;
        let order = ctx.byte_order;

        if self.is_null() {
            match data_type.length_kind() {
                LengthKind::Fixed(_) => {
                    return Err(ProtocolError::TypeMismatch {
                        value: "null",
                        data_type: data_type.name(),
                    });
                }
                LengthKind::Long => order.put_u32(dst, 0),
                LengthKind::Byte
                | LengthKind::Decimal
                | LengthKind::BigTime
                | LengthKind::Blob => dst.put_u8(0),
            }
            return Ok(());
        }

        let mut raw = BytesMut::new();
        self.encode_raw(&mut raw, data_type, column, ctx)?;

        match data_type.length_kind() {
            LengthKind::Fixed(n) => {
                if raw.len() != n {
                    return Err(ProtocolError::ValueOutOfRange(data_type.name()));
                }
            }
            LengthKind::Byte | LengthKind::Decimal | LengthKind::BigTime => {
                let len = u8::try_from(raw.len())
                    .map_err(|_| ProtocolError::ValueOutOfRange(data_type.name()))?;
                dst.put_u8(len);
            }
            LengthKind::Long => {}
            LengthKind::Blob => {
                dst.put_u8(TEXT_POINTER_LEN as u8);
                dst.put_bytes(0, TEXT_POINTER_LEN + TEXT_TIMESTAMP_LEN);
            }
        }
        if let LengthKind::Long | LengthKind::Blob = data_type.length_kind() {
            let len = u32::try_from(raw.len())
                .map_err(|_| ProtocolError::ValueOutOfRange(data_type.name()))?;
            order.put_u32(dst, len);
        }
        dst.put_slice(&raw);
        Ok(())
    }

    fn mismatch(&self, data_type: DataType) -> ProtocolError {
        ProtocolError::TypeMismatch {
            value: self.kind(),
            data_type: data_type.name(),
        }
    }

    fn encode_raw(
        &self,
        raw: &mut BytesMut,
        data_type: DataType,
        column: &ColumnFormat,
        ctx: &TokenContext,
    ) -> Result<(), ProtocolError> {
        let order = ctx.byte_order;
        let width = column.max_length as usize;

        match data_type {
            DataType::Int1 | DataType::Int2 | DataType::Int4 | DataType::Int8 | DataType::IntN
            | DataType::UInt2 | DataType::UInt4 | DataType::UInt8 | DataType::UIntN
            | DataType::Bit => {
                let v = self.as_i128().ok_or_else(|| self.mismatch(data_type))?;
                let width = match data_type.length_kind() {
                    LengthKind::Fixed(n) => n,
                    _ => width,
                };
                let signed = matches!(
                    data_type,
                    DataType::Int2 | DataType::Int4 | DataType::Int8 | DataType::IntN
                );
                put_integer(raw, v, width, signed, order)
                    .ok_or(ProtocolError::ValueOutOfRange(data_type.name()))?;
            }
            DataType::Flt4 | DataType::Flt8 | DataType::FltN => {
                let v = self.as_f64().ok_or_else(|| self.mismatch(data_type))?;
                let width = match data_type.length_kind() {
                    LengthKind::Fixed(n) => n,
                    _ => width,
                };
                match width {
                    4 => order.put_f32(raw, v as f32),
                    8 => order.put_f64(raw, v),
                    _ => return Err(ProtocolError::ValueOutOfRange(data_type.name())),
                }
            }
            DataType::NumN | DataType::DecN => {
                let d = self.decimal().ok_or_else(|| self.mismatch(data_type))?;
                put_numeric(raw, d, column.precision, column.scale)?;
            }
            DataType::Money | DataType::ShortMoney | DataType::MoneyN => {
                let d = self.decimal().ok_or_else(|| self.mismatch(data_type))?;
                let width = match data_type.length_kind() {
                    LengthKind::Fixed(n) => n,
                    _ => width,
                };
                put_money(raw, d, width, order)?;
            }
            DataType::Char | DataType::VarChar | DataType::LongChar | DataType::Text => {
                let s = self.as_str().ok_or_else(|| self.mismatch(data_type))?;
                raw.put_slice(&ctx.charset.encode(s));
            }
            DataType::UniText => {
                let s = self.as_str().ok_or_else(|| self.mismatch(data_type))?;
                raw.put_slice(&encode_utf16(s, order));
            }
            DataType::LongBinary if is_unichar(column) => {
                let s = self.as_str().ok_or_else(|| self.mismatch(data_type))?;
                raw.put_slice(&encode_utf16(s, order));
            }
            DataType::Binary | DataType::VarBinary | DataType::LongBinary | DataType::Image => {
                match self {
                    Self::Binary(b) => raw.put_slice(b),
                    _ => return Err(self.mismatch(data_type)),
                }
            }
            DataType::DateTime | DataType::ShortDate | DataType::DateTimeN => {
                let dt = self.datetime().ok_or_else(|| self.mismatch(data_type))?;
                let width = match data_type.length_kind() {
                    LengthKind::Fixed(n) => n,
                    _ => width,
                };
                put_datetime(raw, dt, width, order)?;
            }
            DataType::BigDateTimeN => {
                let dt = self.datetime().ok_or_else(|| self.mismatch(data_type))?;
                let days = days_from_date(dt.date()) + BIGDATETIME_DAY_BIAS;
                let micros = days * MICROS_PER_DAY + micros_from_time(dt.time());
                let micros = u64::try_from(micros)
                    .map_err(|_| ProtocolError::ValueOutOfRange("bigdatetime"))?;
                order.put_u64(raw, micros);
            }
            DataType::Date | DataType::DateN => {
                let date = match self {
                    Self::Date(d) => *d,
                    Self::DateTime(dt) => dt.date(),
                    _ => return Err(self.mismatch(data_type)),
                };
                let days = i32::try_from(days_from_date(date))
                    .map_err(|_| ProtocolError::ValueOutOfRange("date"))?;
                order.put_i32(raw, days);
            }
            DataType::Time | DataType::TimeN => {
                let time = self.time().ok_or_else(|| self.mismatch(data_type))?;
                // Rounding can reach the next midnight; clamp to the last tick.
                let ticks = ticks_from_time(time).min(TICKS_PER_DAY - 1);
                order.put_i32(raw, ticks as i32);
            }
            DataType::BigTimeN => {
                let time = self.time().ok_or_else(|| self.mismatch(data_type))?;
                order.put_u64(raw, micros_from_time(time) as u64);
            }
        }
        Ok(())
    }

    fn decimal(&self) -> Option<Decimal> {
        match self {
            Self::Decimal(d) => Some(*d),
            other => other.as_i128().and_then(|v| i64::try_from(v).ok()).map(Decimal::from),
        }
    }

    fn datetime(&self) -> Option<NaiveDateTime> {
        match self {
            Self::DateTime(dt) => Some(*dt),
            Self::Date(d) => Some(d.and_time(NaiveTime::MIN)),
            _ => None,
        }
    }

    fn time(&self) -> Option<NaiveTime> {
        match self {
            Self::Time(t) => Some(*t),
            Self::DateTime(dt) => Some(dt.time()),
            _ => None,
        }
    }
}

fn decode_raw(
    raw: &mut Bytes,
    len: usize,
    data_type: DataType,
    column: &ColumnFormat,
    ctx: &TokenContext,
) -> Result<SqlValue, ProtocolError> {
    let order = ctx.byte_order;
    let bad_length = || ProtocolError::InvalidField {
        field: "value length",
        value: len as u32,
    };

    Ok(match data_type {
        DataType::Int1 => SqlValue::TinyInt(codec::get_u8(raw)?),
        DataType::Int2 => SqlValue::SmallInt(order.get_i16(raw)?),
        DataType::Int4 => SqlValue::Int(order.get_i32(raw)?),
        DataType::Int8 => SqlValue::BigInt(order.get_i64(raw)?),
        DataType::IntN => match len {
            1 => SqlValue::TinyInt(codec::get_u8(raw)?),
            2 => SqlValue::SmallInt(order.get_i16(raw)?),
            4 => SqlValue::Int(order.get_i32(raw)?),
            8 => SqlValue::BigInt(order.get_i64(raw)?),
            _ => return Err(bad_length()),
        },
        DataType::UInt2 => SqlValue::UnsignedSmallInt(order.get_u16(raw)?),
        DataType::UInt4 => SqlValue::UnsignedInt(order.get_u32(raw)?),
        DataType::UInt8 => SqlValue::UnsignedBigInt(order.get_u64(raw)?),
        DataType::UIntN => match len {
            1 => SqlValue::TinyInt(codec::get_u8(raw)?),
            2 => SqlValue::UnsignedSmallInt(order.get_u16(raw)?),
            4 => SqlValue::UnsignedInt(order.get_u32(raw)?),
            8 => SqlValue::UnsignedBigInt(order.get_u64(raw)?),
            _ => return Err(bad_length()),
        },
        DataType::Flt4 => SqlValue::Real(order.get_f32(raw)?),
        DataType::Flt8 => SqlValue::Float(order.get_f64(raw)?),
        DataType::FltN => match len {
            4 => SqlValue::Real(order.get_f32(raw)?),
            8 => SqlValue::Float(order.get_f64(raw)?),
            _ => return Err(bad_length()),
        },
        DataType::Bit => SqlValue::Bool(codec::get_u8(raw)? != 0),
        DataType::Char | DataType::VarChar | DataType::LongChar | DataType::Text => {
            SqlValue::String(ctx.charset.decode(raw))
        }
        DataType::UniText => SqlValue::String(decode_utf16(raw, order)?),
        DataType::LongBinary if is_unichar(column) => SqlValue::String(decode_utf16(raw, order)?),
        DataType::Binary | DataType::VarBinary | DataType::LongBinary | DataType::Image => {
            SqlValue::Binary(raw.split_to(raw.len()))
        }
        DataType::Money => SqlValue::Decimal(get_money8(raw, order)?),
        DataType::ShortMoney => SqlValue::Decimal(Decimal::new(i64::from(order.get_i32(raw)?), 4)),
        DataType::MoneyN => match len {
            4 => SqlValue::Decimal(Decimal::new(i64::from(order.get_i32(raw)?), 4)),
            8 => SqlValue::Decimal(get_money8(raw, order)?),
            _ => return Err(bad_length()),
        },
        DataType::DateTime => SqlValue::DateTime(get_datetime8(raw, order)?),
        DataType::ShortDate => SqlValue::DateTime(get_shortdate(raw, order)?),
        DataType::DateTimeN => match len {
            4 => SqlValue::DateTime(get_shortdate(raw, order)?),
            8 => SqlValue::DateTime(get_datetime8(raw, order)?),
            _ => return Err(bad_length()),
        },
        DataType::Date | DataType::DateN => {
            SqlValue::Date(date_from_days(i64::from(order.get_i32(raw)?))?)
        }
        DataType::Time | DataType::TimeN => {
            SqlValue::Time(time_from_ticks(i64::from(order.get_i32(raw)?))?)
        }
        DataType::BigDateTimeN => {
            let micros = i64::try_from(order.get_u64(raw)?)
                .map_err(|_| ProtocolError::ValueOutOfRange("bigdatetime"))?;
            let days = micros.div_euclid(MICROS_PER_DAY) - BIGDATETIME_DAY_BIAS;
            let date = date_from_days(days)?;
            let time = time_from_micros(micros.rem_euclid(MICROS_PER_DAY))?;
            SqlValue::DateTime(date.and_time(time))
        }
        DataType::BigTimeN => {
            let micros = i64::try_from(order.get_u64(raw)?)
                .map_err(|_| ProtocolError::ValueOutOfRange("bigtime"))?;
            SqlValue::Time(time_from_micros(micros)?)
        }
        DataType::NumN | DataType::DecN => SqlValue::Decimal(get_numeric(raw, column.scale)?),
    })
}

fn put_integer(raw: &mut BytesMut, v: i128, width: usize, signed: bool, order: ByteOrder) -> Option<()> {
    match (width, signed) {
        (1, _) => raw.put_u8(u8::try_from(v).ok()?),
        (2, true) => order.put_i16(raw, i16::try_from(v).ok()?),
        (2, false) => order.put_u16(raw, u16::try_from(v).ok()?),
        (4, true) => order.put_i32(raw, i32::try_from(v).ok()?),
        (4, false) => order.put_u32(raw, u32::try_from(v).ok()?),
        (8, true) => order.put_i64(raw, i64::try_from(v).ok()?),
        (8, false) => order.put_u64(raw, u64::try_from(v).ok()?),
        _ => return None,
    }
    Some(())
}

fn get_money8(raw: &mut Bytes, order: ByteOrder) -> Result<Decimal, ProtocolError> {
    let high = i64::from(order.get_i32(raw)?);
    let low = i64::from(order.get_u32(raw)?);
    Ok(Decimal::new((high << 32) | low, 4))
}

fn put_money(raw: &mut BytesMut, value: Decimal, width: usize, order: ByteOrder) -> Result<(), ProtocolError> {
    let mut scaled = value.round_dp(4);
    scaled.rescale(4);
    let units = i64::try_from(scaled.mantissa()).map_err(|_| ProtocolError::ValueOutOfRange("money"))?;
    match width {
        4 => {
            let units = i32::try_from(units).map_err(|_| ProtocolError::ValueOutOfRange("smallmoney"))?;
            order.put_i32(raw, units);
        }
        8 => {
            order.put_i32(raw, (units >> 32) as i32);
            order.put_u32(raw, units as u32);
        }
        _ => return Err(ProtocolError::ValueOutOfRange("money")),
    }
    Ok(())
}

fn get_numeric(raw: &mut Bytes, scale: u8) -> Result<Decimal, ProtocolError> {
    let negative = codec::get_u8(raw)? != 0;
    if raw.remaining() > 16 {
        return Err(ProtocolError::ValueOutOfRange("numeric"));
    }
    let mut magnitude: u128 = 0;
    while raw.has_remaining() {
        magnitude = (magnitude << 8) | u128::from(raw.get_u8());
    }
    let magnitude = i128::try_from(magnitude).map_err(|_| ProtocolError::ValueOutOfRange("numeric"))?;
    let mantissa = if negative { -magnitude } else { magnitude };
    Decimal::try_from_i128_with_scale(mantissa, u32::from(scale))
        .map_err(|_| ProtocolError::ValueOutOfRange("numeric"))
}

fn put_numeric(raw: &mut BytesMut, value: Decimal, precision: u8, scale: u8) -> Result<(), ProtocolError> {
    let mut scaled = value.round_dp(u32::from(scale));
    scaled.rescale(u32::from(scale));
    let mantissa = scaled.mantissa();
    let magnitude = mantissa.unsigned_abs().to_be_bytes();
    let len = numeric_magnitude_len(precision);
    let (overflow, digits) = magnitude.split_at(magnitude.len() - len);
    if overflow.iter().any(|&b| b != 0) {
        return Err(ProtocolError::ValueOutOfRange("numeric"));
    }
    raw.put_u8(u8::from(mantissa < 0));
    raw.put_slice(digits);
    Ok(())
}

fn get_datetime8(raw: &mut Bytes, order: ByteOrder) -> Result<NaiveDateTime, ProtocolError> {
    let days = i64::from(order.get_i32(raw)?);
    let ticks = i64::from(order.get_u32(raw)?);
    Ok(date_from_days(days)?.and_time(time_from_ticks(ticks)?))
}

fn get_shortdate(raw: &mut Bytes, order: ByteOrder) -> Result<NaiveDateTime, ProtocolError> {
    let days = i64::from(order.get_u16(raw)?);
    let minutes = u32::from(order.get_u16(raw)?);
    let time = NaiveTime::from_num_seconds_from_midnight_opt(minutes * 60, 0)
        .ok_or(ProtocolError::ValueOutOfRange("smalldatetime"))?;
    Ok(date_from_days(days)?.and_time(time))
}

fn put_datetime(raw: &mut BytesMut, dt: NaiveDateTime, width: usize, order: ByteOrder) -> Result<(), ProtocolError> {
    let mut days = days_from_date(dt.date());
    match width {
        4 => {
            let minutes = dt.time().num_seconds_from_midnight() / 60;
            let days = u16::try_from(days).map_err(|_| ProtocolError::ValueOutOfRange("smalldatetime"))?;
            order.put_u16(raw, days);
            order.put_u16(raw, minutes as u16);
        }
        8 => {
            let mut ticks = ticks_from_time(dt.time());
            if ticks >= TICKS_PER_DAY {
                days += 1;
                ticks -= TICKS_PER_DAY;
            }
            let days = i32::try_from(days).map_err(|_| ProtocolError::ValueOutOfRange("datetime"))?;
            order.put_i32(raw, days);
            order.put_u32(raw, ticks as u32);
        }
        _ => return Err(ProtocolError::ValueOutOfRange("datetime")),
    }
    Ok(())
}

impl From<bool> for SqlValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<u8> for SqlValue {
    fn from(v: u8) -> Self {
        Self::TinyInt(v)
    }
}

impl From<i16> for SqlValue {
    fn from(v: i16) -> Self {
        Self::SmallInt(v)
    }
}

impl From<i32> for SqlValue {
    fn from(v: i32) -> Self {
        Self::Int(v)
    }
}

impl From<i64> for SqlValue {
    fn from(v: i64) -> Self {
        Self::BigInt(v)
    }
}

impl From<f32> for SqlValue {
    fn from(v: f32) -> Self {
        Self::Real(v)
    }
}

impl From<f64> for SqlValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<Decimal> for SqlValue {
    fn from(v: Decimal) -> Self {
        Self::Decimal(v)
    }
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        Self::String(v.to_owned())
    }
}

impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<Vec<u8>> for SqlValue {
    fn from(v: Vec<u8>) -> Self {
        Self::Binary(Bytes::from(v))
    }
}

impl From<NaiveDateTime> for SqlValue {
    fn from(v: NaiveDateTime) -> Self {
        Self::DateTime(v)
    }
}

impl From<NaiveDate> for SqlValue {
    fn from(v: NaiveDate) -> Self {
        Self::Date(v)
    }
}

impl From<NaiveTime> for SqlValue {
    fn from(v: NaiveTime) -> Self {
        Self::Time(v)
    }
}

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}
