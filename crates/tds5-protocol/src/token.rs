//! TDS 5.0 token definitions and parsing.
//!
//! A reassembled message is a sequence of tokens, each introduced by a
//! one-byte tag. Most tokens carry their own length prefix; `ROW` and
//! `PARAMS` do not and can only be read with the format token that preceded
//! them, which is why decoding takes a [`TokenContext`].
//!
//! [`TokenParser`] consumes bytes incrementally: it yields a token as soon as
//! its last byte has arrived and reports `None` while a token is incomplete.

use std::sync::Arc;

use bitflags::bitflags;
use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::capability::Capabilities;
use crate::charset::Charset;
use crate::codec::{self, ByteOrder, decode_framed, get_bytes_u8, put_bytes_u8};
use crate::error::ProtocolError;
use crate::format::{ParamFormat, RowFormat};
use crate::value::SqlValue;

/// Token tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
#[non_exhaustive]
pub enum TokenType {
    /// Wide parameter format.
    ParamFormat2 = 0x20,
    /// Language command.
    Language = 0x21,
    /// Wide row format.
    RowFormat2 = 0x61,
    /// Generic message.
    Msg = 0x65,
    /// Logout request.
    Logout = 0x71,
    /// Procedure return status.
    ReturnStatus = 0x79,
    /// Browse-mode table names.
    TabName = 0xA4,
    /// Browse-mode column information.
    ColInfo = 0xA5,
    /// Option set/get.
    OptionCmd = 0xA6,
    /// ORDER BY column list.
    OrderBy = 0xA9,
    /// Error message (legacy layout).
    Error = 0xAA,
    /// Informational message (legacy layout).
    Info = 0xAB,
    /// Login acknowledgement.
    LoginAck = 0xAD,
    /// Format control strings.
    Control = 0xAE,
    /// Row data.
    Row = 0xD1,
    /// Parameter data.
    Params = 0xD7,
    /// Capability masks.
    Capability = 0xE2,
    /// Environment change.
    EnvChange = 0xE3,
    /// Extended error data.
    Eed = 0xE5,
    /// Procedure invocation.
    DbRpc = 0xE6,
    /// Parameter format.
    ParamFormat = 0xEC,
    /// Row format.
    RowFormat = 0xEE,
    /// End of statement.
    Done = 0xFD,
    /// End of procedure.
    DoneProc = 0xFE,
    /// End of statement inside a procedure.
    DoneInProc = 0xFF,
}

impl TokenType {
    /// Create a token type from its tag.
    pub fn from_u8(value: u8) -> Result<Self, ProtocolError> {
        Ok(match value {
            0x20 => Self::ParamFormat2,
            0x21 => Self::Language,
            0x61 => Self::RowFormat2,
            0x65 => Self::Msg,
            0x71 => Self::Logout,
            0x79 => Self::ReturnStatus,
            0xA4 => Self::TabName,
            0xA5 => Self::ColInfo,
            0xA6 => Self::OptionCmd,
            0xA9 => Self::OrderBy,
            0xAA => Self::Error,
            0xAB => Self::Info,
            0xAD => Self::LoginAck,
            0xAE => Self::Control,
            0xD1 => Self::Row,
            0xD7 => Self::Params,
            0xE2 => Self::Capability,
            0xE3 => Self::EnvChange,
            0xE5 => Self::Eed,
            0xE6 => Self::DbRpc,
            0xEC => Self::ParamFormat,
            0xEE => Self::RowFormat,
            0xFD => Self::Done,
            0xFE => Self::DoneProc,
            0xFF => Self::DoneInProc,
            _ => return Err(ProtocolError::UnknownToken(value)),
        })
    }
}

/// Per-session decoding context.
///
/// Carries the negotiated byte order and charset and the most recent row and
/// parameter formats. [`TokenContext::observe`] keeps the formats current.
#[derive(Debug, Clone, Default)]
pub struct TokenContext {
    /// Byte order of integers and floats in the token stream.
    pub byte_order: ByteOrder,
    /// Charset of character data.
    pub charset: Charset,
    /// Format of subsequent `ROW` tokens.
    pub row_format: Option<Arc<RowFormat>>,
    /// Format of subsequent `PARAMS` tokens.
    pub param_format: Option<Arc<ParamFormat>>,
}

impl TokenContext {
    /// A context with no formats yet.
    #[must_use]
    pub fn new(byte_order: ByteOrder, charset: Charset) -> Self {
        Self {
            byte_order,
            charset,
            row_format: None,
            param_format: None,
        }
    }

    /// Record the format carried by `token`, if any.
    pub fn observe(&mut self, token: &Token) {
        match token {
            Token::RowFormat(format) => self.row_format = Some(Arc::clone(format)),
            Token::ParamFormat(format) => self.param_format = Some(Arc::clone(format)),
            _ => {}
        }
    }

    /// Forget cached formats, as at the start of a new request.
    pub fn reset_formats(&mut self) {
        self.row_format = None;
        self.param_format = None;
    }
}

bitflags! {
    /// DONE token status bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct DoneStatus: u16 {
        /// More results follow in this message.
        const MORE = 0x0001;
        /// The statement failed.
        const ERROR = 0x0002;
        /// A transaction is in progress.
        const INXACT = 0x0004;
        /// Issued from inside a procedure.
        const PROC = 0x0008;
        /// The row count is valid.
        const COUNT = 0x0010;
        /// Acknowledges an attention.
        const ATTN = 0x0020;
        /// Event notification follows.
        const EVENT = 0x0040;
    }
}

/// Transaction state reported by DONE and EED tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u16)]
pub enum TranState {
    /// No transaction active.
    #[default]
    NotInTransaction = 0,
    /// Transaction completed.
    Succeed = 1,
    /// Transaction in progress.
    InProgress = 2,
    /// The statement aborted; the transaction is still active.
    StatementAbort = 3,
    /// The transaction aborted.
    TransactionAbort = 4,
}

impl TranState {
    /// Create a transaction state from its wire value.
    pub fn from_u16(value: u16) -> Result<Self, ProtocolError> {
        Ok(match value {
            0 => Self::NotInTransaction,
            1 => Self::Succeed,
            2 => Self::InProgress,
            3 => Self::StatementAbort,
            4 => Self::TransactionAbort,
            _ => {
                return Err(ProtocolError::InvalidField {
                    field: "transaction state",
                    value: u32::from(value),
                });
            }
        })
    }
}

/// DONE, DONEPROC and DONEINPROC body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Done {
    /// Status bits.
    pub status: DoneStatus,
    /// Transaction state.
    pub tran_state: TranState,
    /// Rows affected, valid when [`DoneStatus::COUNT`] is set.
    pub count: i32,
}

impl Done {
    /// Create a done body.
    #[must_use]
    pub const fn new(status: DoneStatus, tran_state: TranState, count: i32) -> Self {
        Self {
            status,
            tran_state,
            count,
        }
    }

    /// Whether more results follow.
    #[must_use]
    pub fn has_more(&self) -> bool {
        self.status.contains(DoneStatus::MORE)
    }

    /// Whether the count field is meaningful.
    #[must_use]
    pub fn has_count(&self) -> bool {
        self.status.contains(DoneStatus::COUNT)
    }

    /// Whether this acknowledges an attention.
    #[must_use]
    pub fn is_attention_ack(&self) -> bool {
        self.status.contains(DoneStatus::ATTN)
    }

    /// Whether the statement failed.
    #[must_use]
    pub fn is_error(&self) -> bool {
        self.status.contains(DoneStatus::ERROR)
    }

    fn decode(src: &mut impl Buf, order: ByteOrder) -> Result<Self, ProtocolError> {
        codec::ensure(src, 8)?;
        let status = DoneStatus::from_bits_retain(order.get_u16(src)?);
        let tran_state = TranState::from_u16(order.get_u16(src)?)?;
        let count = order.get_i32(src)?;
        Ok(Self::new(status, tran_state, count))
    }

    fn encode(&self, dst: &mut impl BufMut, order: ByteOrder) {
        order.put_u16(dst, self.status.bits());
        order.put_u16(dst, self.tran_state as u16);
        order.put_i32(dst, self.count);
    }
}

/// A server message from an EED, INFO or ERROR token.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ServerMessage {
    /// Message number.
    pub number: i32,
    /// Error state.
    pub state: u8,
    /// Severity class.
    pub severity: u8,
    /// SQLSTATE (EED only).
    pub sql_state: String,
    /// EED status bits (EED only).
    pub status: u8,
    /// Transaction state (EED only).
    pub tran_state: u16,
    /// Message text.
    pub text: String,
    /// Server name.
    pub server: String,
    /// Procedure name, empty outside procedures.
    pub procedure: String,
    /// Line number.
    pub line: u16,
}

impl ServerMessage {
    /// Severity at and above which a message is an error.
    pub const ERROR_SEVERITY: u8 = 11;
    /// Severity at and above which the session can no longer be used.
    pub const FATAL_SEVERITY: u8 = 19;

    /// Whether this message aborts the statement batch.
    #[must_use]
    pub fn is_error(&self) -> bool {
        self.severity >= Self::ERROR_SEVERITY
    }

    /// Whether this message dooms the session.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        self.severity >= Self::FATAL_SEVERITY
    }

    fn decode_body(body: &mut Bytes, extended: bool, ctx: &TokenContext) -> Result<Self, ProtocolError> {
        let order = ctx.byte_order;
        let mut msg = Self {
            number: order.get_i32(body)?,
            state: codec::get_u8(body)?,
            severity: codec::get_u8(body)?,
            ..Self::default()
        };
        if extended {
            msg.sql_state = ctx.charset.decode(&get_bytes_u8(body)?);
            msg.status = codec::get_u8(body)?;
            msg.tran_state = order.get_u16(body)?;
        }
        msg.text = ctx.charset.decode(&order.get_bytes_u16(body)?);
        msg.server = ctx.charset.decode(&get_bytes_u8(body)?);
        msg.procedure = ctx.charset.decode(&get_bytes_u8(body)?);
        msg.line = order.get_u16(body)?;
        Ok(msg)
    }

    fn encode_body(&self, extended: bool, ctx: &TokenContext) -> Result<Vec<u8>, ProtocolError> {
        let order = ctx.byte_order;
        let mut body = Vec::new();
        order.put_i32(&mut body, self.number);
        body.put_u8(self.state);
        body.put_u8(self.severity);
        if extended {
            put_bytes_u8(&mut body, &ctx.charset.encode(&self.sql_state))?;
            body.put_u8(self.status);
            order.put_u16(&mut body, self.tran_state);
        }
        order.put_bytes_u16(&mut body, &ctx.charset.encode(&self.text))?;
        put_bytes_u8(&mut body, &ctx.charset.encode(&self.server))?;
        put_bytes_u8(&mut body, &ctx.charset.encode(&self.procedure))?;
        order.put_u16(&mut body, self.line);
        Ok(body)
    }
}

/// LOGINACK status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum LoginStatus {
    /// Login accepted.
    Succeed = 5,
    /// Login rejected.
    Fail = 6,
    /// Server requests a security negotiation.
    Negotiate = 7,
}

/// Login acknowledgement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginAck {
    /// Outcome.
    pub status: LoginStatus,
    /// TDS version the server speaks.
    pub tds_version: [u8; 4],
    /// Server product name.
    pub program_name: String,
    /// Server product version.
    pub program_version: [u8; 4],
}

impl LoginAck {
    /// Server product version as dotted text.
    #[must_use]
    pub fn version_string(&self) -> String {
        let [a, b, c, d] = self.program_version;
        format!("{a}.{b}.{c}.{d}")
    }
}

/// Environment change kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EnvChangeType {
    /// Current database.
    Database,
    /// Language.
    Language,
    /// Character set.
    Charset,
    /// Packet size.
    PacketSize,
    /// A kind this client does not interpret.
    Other(u8),
}

impl EnvChangeType {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Database,
            2 => Self::Language,
            3 => Self::Charset,
            4 => Self::PacketSize,
            other => Self::Other(other),
        }
    }

    fn to_u8(self) -> u8 {
        match self {
            Self::Database => 1,
            Self::Language => 2,
            Self::Charset => 3,
            Self::PacketSize => 4,
            Self::Other(other) => other,
        }
    }
}

/// One environment change entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvChange {
    /// What changed.
    pub kind: EnvChangeType,
    /// New value.
    pub new_value: String,
    /// Previous value.
    pub old_value: String,
}

/// Data of a ROW or PARAMS token.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Row {
    /// Values in format order.
    pub values: Vec<SqlValue>,
}

/// Language command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Language {
    /// Whether PARAMFMT/PARAMS follow.
    pub has_args: bool,
    /// Command text.
    pub text: String,
}

/// Procedure invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DbRpc {
    /// Procedure name.
    pub name: String,
    /// Whether PARAMFMT/PARAMS follow.
    pub has_params: bool,
}

/// MSG token body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Msg {
    /// Status byte.
    pub status: u8,
    /// Message id.
    pub id: u16,
}

/// OPTIONCMD token body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OptionCmd {
    /// Command (set, default, list, info).
    pub command: u8,
    /// Option identifier.
    pub option: u8,
    /// Raw argument.
    pub argument: Bytes,
}

/// A decoded token.
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    /// Language command.
    Language(Language),
    /// Procedure invocation.
    DbRpc(DbRpc),
    /// Row format (`ROWFMT` or `ROWFMT2`).
    RowFormat(Arc<RowFormat>),
    /// Parameter format (`PARAMFMT` or `PARAMFMT2`).
    ParamFormat(Arc<ParamFormat>),
    /// Row data.
    Row(Row),
    /// Parameter data, for output parameters or request parameters.
    Params(Row),
    /// Procedure return status.
    ReturnStatus(i32),
    /// Extended error data.
    Eed(ServerMessage),
    /// Informational message.
    Info(ServerMessage),
    /// Error message.
    Error(ServerMessage),
    /// Login acknowledgement.
    LoginAck(LoginAck),
    /// Environment changes.
    EnvChange(Vec<EnvChange>),
    /// Capability masks.
    Capability(Capabilities),
    /// Generic message.
    Msg(Msg),
    /// Option command.
    OptionCmd(OptionCmd),
    /// ORDER BY column numbers.
    OrderBy(Bytes),
    /// Format control strings, one per column.
    Control(Vec<Bytes>),
    /// Browse-mode table names (kept opaque).
    TabName(Bytes),
    /// Browse-mode column information (kept opaque).
    ColInfo(Bytes),
    /// Logout request with its option byte.
    Logout(u8),
    /// End of statement.
    Done(Done),
    /// End of procedure.
    DoneProc(Done),
    /// End of statement inside a procedure.
    DoneInProc(Done),
}

impl Token {
    /// The tag this token is written with.
    #[must_use]
    pub fn token_type(&self) -> TokenType {
        match self {
            Self::Language(_) => TokenType::Language,
            Self::DbRpc(_) => TokenType::DbRpc,
            Self::RowFormat(f) if f.wide => TokenType::RowFormat2,
            Self::RowFormat(_) => TokenType::RowFormat,
            Self::ParamFormat(f) if f.wide => TokenType::ParamFormat2,
            Self::ParamFormat(_) => TokenType::ParamFormat,
            Self::Row(_) => TokenType::Row,
            Self::Params(_) => TokenType::Params,
            Self::ReturnStatus(_) => TokenType::ReturnStatus,
            Self::Eed(_) => TokenType::Eed,
            Self::Info(_) => TokenType::Info,
            Self::Error(_) => TokenType::Error,
            Self::LoginAck(_) => TokenType::LoginAck,
            Self::EnvChange(_) => TokenType::EnvChange,
            Self::Capability(_) => TokenType::Capability,
            Self::Msg(_) => TokenType::Msg,
            Self::OptionCmd(_) => TokenType::OptionCmd,
            Self::OrderBy(_) => TokenType::OrderBy,
            Self::Control(_) => TokenType::Control,
            Self::TabName(_) => TokenType::TabName,
            Self::ColInfo(_) => TokenType::ColInfo,
            Self::Logout(_) => TokenType::Logout,
            Self::Done(_) => TokenType::Done,
            Self::DoneProc(_) => TokenType::DoneProc,
            Self::DoneInProc(_) => TokenType::DoneInProc,
        }
    }

    /// Check if this is one of the DONE family.
    #[must_use]
    pub fn as_done(&self) -> Option<&Done> {
        match self {
            Self::Done(d) | Self::DoneProc(d) | Self::DoneInProc(d) => Some(d),
            _ => None,
        }
    }

    /// Decode one token, tag included.
    ///
    /// Returns [`ProtocolError::UnexpectedEof`] when `src` holds only part of
    /// the token.
    pub fn decode(src: &mut impl Buf, ctx: &TokenContext) -> Result<Self, ProtocolError> {
        let order = ctx.byte_order;
        let tag = TokenType::from_u8(codec::get_u8(src)?)?;

        Ok(match tag {
            TokenType::Language => {
                let declared = order.get_u32(src)? as usize;
                decode_framed(src, declared, "LANGUAGE", |body| {
                    let status = codec::get_u8(body)?;
                    let text = ctx.charset.decode(body);
                    body.advance(body.remaining());
                    Ok(Self::Language(Language {
                        has_args: status & 0x01 != 0,
                        text,
                    }))
                })?
            }
            TokenType::DbRpc => {
                let declared = order.get_u16(src)? as usize;
                decode_framed(src, declared, "DBRPC", |body| {
                    let name = ctx.charset.decode(&get_bytes_u8(body)?);
                    let options = order.get_u16(body)?;
                    Ok(Self::DbRpc(DbRpc {
                        name,
                        has_params: options & 0x02 != 0,
                    }))
                })?
            }
            TokenType::RowFormat => Self::RowFormat(Arc::new(RowFormat::decode(src, false, ctx)?)),
            TokenType::RowFormat2 => Self::RowFormat(Arc::new(RowFormat::decode(src, true, ctx)?)),
            TokenType::ParamFormat => {
                Self::ParamFormat(Arc::new(ParamFormat::decode(src, false, ctx)?))
            }
            TokenType::ParamFormat2 => {
                Self::ParamFormat(Arc::new(ParamFormat::decode(src, true, ctx)?))
            }
            TokenType::Row => {
                let format = ctx.row_format.as_ref().ok_or(ProtocolError::MissingFormat("ROW"))?;
                let values = format
                    .columns
                    .iter()
                    .map(|column| SqlValue::decode(src, column, ctx))
                    .collect::<Result<_, _>>()?;
                Self::Row(Row { values })
            }
            TokenType::Params => {
                let format = ctx
                    .param_format
                    .as_ref()
                    .ok_or(ProtocolError::MissingFormat("PARAMS"))?;
                let values = format
                    .columns
                    .iter()
                    .map(|column| SqlValue::decode(src, column, ctx))
                    .collect::<Result<_, _>>()?;
                Self::Params(Row { values })
            }
            TokenType::ReturnStatus => Self::ReturnStatus(order.get_i32(src)?),
            TokenType::Eed => {
                let declared = order.get_u16(src)? as usize;
                decode_framed(src, declared, "EED", |body| {
                    ServerMessage::decode_body(body, true, ctx).map(Self::Eed)
                })?
            }
            TokenType::Info | TokenType::Error => {
                let declared = order.get_u16(src)? as usize;
                let name = if tag == TokenType::Info { "INFO" } else { "ERROR" };
                let msg = decode_framed(src, declared, name, |body| {
                    ServerMessage::decode_body(body, false, ctx)
                })?;
                if tag == TokenType::Info {
                    Self::Info(msg)
                } else {
                    Self::Error(msg)
                }
            }
            TokenType::LoginAck => {
                let declared = order.get_u16(src)? as usize;
                decode_framed(src, declared, "LOGINACK", |body| {
                    let status = match codec::get_u8(body)? {
                        5 => LoginStatus::Succeed,
                        6 => LoginStatus::Fail,
                        7 => LoginStatus::Negotiate,
                        other => {
                            return Err(ProtocolError::InvalidField {
                                field: "login ack status",
                                value: u32::from(other),
                            });
                        }
                    };
                    let tds_version = get_array(body)?;
                    let program_name = ctx.charset.decode(&get_bytes_u8(body)?);
                    let program_version = get_array(body)?;
                    Ok(Self::LoginAck(LoginAck {
                        status,
                        tds_version,
                        program_name,
                        program_version,
                    }))
                })?
            }
            TokenType::EnvChange => {
                let declared = order.get_u16(src)? as usize;
                decode_framed(src, declared, "ENVCHANGE", |body| {
                    let mut changes = Vec::new();
                    while body.has_remaining() {
                        let kind = EnvChangeType::from_u8(codec::get_u8(body)?);
                        let new_value = ctx.charset.decode(&get_bytes_u8(body)?);
                        let old_value = ctx.charset.decode(&get_bytes_u8(body)?);
                        changes.push(EnvChange {
                            kind,
                            new_value,
                            old_value,
                        });
                    }
                    Ok(Self::EnvChange(changes))
                })?
            }
            TokenType::Capability => Self::Capability(Capabilities::decode(src, order)?),
            TokenType::Msg => {
                let declared = codec::get_u8(src)? as usize;
                decode_framed(src, declared, "MSG", |body| {
                    Ok(Self::Msg(Msg {
                        status: codec::get_u8(body)?,
                        id: order.get_u16(body)?,
                    }))
                })?
            }
            TokenType::OptionCmd => {
                let declared = order.get_u16(src)? as usize;
                decode_framed(src, declared, "OPTIONCMD", |body| {
                    Ok(Self::OptionCmd(OptionCmd {
                        command: codec::get_u8(body)?,
                        option: codec::get_u8(body)?,
                        argument: get_bytes_u8(body)?,
                    }))
                })?
            }
            TokenType::OrderBy => Self::OrderBy(order.get_bytes_u16(src)?),
            TokenType::Control => {
                let declared = order.get_u16(src)? as usize;
                decode_framed(src, declared, "CONTROL", |body| {
                    let mut formats = Vec::new();
                    while body.has_remaining() {
                        formats.push(get_bytes_u8(body)?);
                    }
                    Ok(Self::Control(formats))
                })?
            }
            TokenType::TabName => Self::TabName(order.get_bytes_u16(src)?),
            TokenType::ColInfo => Self::ColInfo(order.get_bytes_u16(src)?),
            TokenType::Logout => Self::Logout(codec::get_u8(src)?),
            TokenType::Done => Self::Done(Done::decode(src, order)?),
            TokenType::DoneProc => Self::DoneProc(Done::decode(src, order)?),
            TokenType::DoneInProc => Self::DoneInProc(Done::decode(src, order)?),
        })
    }

    /// Encode this token, tag included.
    pub fn encode(&self, dst: &mut BytesMut, ctx: &TokenContext) -> Result<(), ProtocolError> {
        let order = ctx.byte_order;

        match self {
            Self::RowFormat(format) => return format.encode(dst, ctx),
            Self::ParamFormat(format) => return format.encode(dst, ctx),
            _ => {}
        }

        dst.put_u8(self.token_type() as u8);
        match self {
            Self::RowFormat(_) | Self::ParamFormat(_) => {}
            Self::Language(lang) => {
                let text = ctx.charset.encode(&lang.text);
                let len = u32::try_from(text.len() + 1)
                    .map_err(|_| ProtocolError::ValueOutOfRange("language text"))?;
                order.put_u32(dst, len);
                dst.put_u8(u8::from(lang.has_args));
                dst.put_slice(&text);
            }
            Self::DbRpc(rpc) => {
                let mut body = Vec::new();
                put_bytes_u8(&mut body, &ctx.charset.encode(&rpc.name))?;
                order.put_u16(&mut body, if rpc.has_params { 0x02 } else { 0 });
                order.put_bytes_u16(dst, &body)?;
            }
            Self::Row(row) => {
                let format = ctx.row_format.as_ref().ok_or(ProtocolError::MissingFormat("ROW"))?;
                encode_values(dst, &row.values, &format.columns, ctx)?;
            }
            Self::Params(row) => {
                let format = ctx
                    .param_format
                    .as_ref()
                    .ok_or(ProtocolError::MissingFormat("PARAMS"))?;
                encode_values(dst, &row.values, &format.columns, ctx)?;
            }
            Self::ReturnStatus(status) => order.put_i32(dst, *status),
            Self::Eed(msg) => order.put_bytes_u16(dst, &msg.encode_body(true, ctx)?)?,
            Self::Info(msg) | Self::Error(msg) => {
                order.put_bytes_u16(dst, &msg.encode_body(false, ctx)?)?;
            }
            Self::LoginAck(ack) => {
                let mut body = Vec::new();
                body.put_u8(ack.status as u8);
                body.put_slice(&ack.tds_version);
                put_bytes_u8(&mut body, &ctx.charset.encode(&ack.program_name))?;
                body.put_slice(&ack.program_version);
                order.put_bytes_u16(dst, &body)?;
            }
            Self::EnvChange(changes) => {
                let mut body = Vec::new();
                for change in changes {
                    body.put_u8(change.kind.to_u8());
                    put_bytes_u8(&mut body, &ctx.charset.encode(&change.new_value))?;
                    put_bytes_u8(&mut body, &ctx.charset.encode(&change.old_value))?;
                }
                order.put_bytes_u16(dst, &body)?;
            }
            Self::Capability(caps) => caps.encode(dst, order)?,
            Self::Msg(msg) => {
                dst.put_u8(3);
                dst.put_u8(msg.status);
                order.put_u16(dst, msg.id);
            }
            Self::OptionCmd(opt) => {
                let mut body = vec![opt.command, opt.option];
                put_bytes_u8(&mut body, &opt.argument)?;
                order.put_bytes_u16(dst, &body)?;
            }
            Self::OrderBy(columns) => order.put_bytes_u16(dst, columns)?,
            Self::Control(formats) => {
                let mut body = Vec::new();
                for f in formats {
                    put_bytes_u8(&mut body, f)?;
                }
                order.put_bytes_u16(dst, &body)?;
            }
            Self::TabName(raw) | Self::ColInfo(raw) => order.put_bytes_u16(dst, raw)?,
            Self::Logout(options) => dst.put_u8(*options),
            Self::Done(done) | Self::DoneProc(done) | Self::DoneInProc(done) => {
                done.encode(dst, order);
            }
        }
        Ok(())
    }
}

fn get_array<const N: usize>(src: &mut impl Buf) -> Result<[u8; N], ProtocolError> {
    codec::ensure(src, N)?;
    let mut out = [0u8; N];
    src.copy_to_slice(&mut out);
    Ok(out)
}

fn encode_values(
    dst: &mut BytesMut,
    values: &[SqlValue],
    columns: &[crate::format::ColumnFormat],
    ctx: &TokenContext,
) -> Result<(), ProtocolError> {
    if values.len() != columns.len() {
        return Err(ProtocolError::InvalidField {
            field: "value count",
            value: values.len() as u32,
        });
    }
    for (value, column) in values.iter().zip(columns) {
        value.encode(dst, column, ctx)?;
    }
    Ok(())
}

/// Incremental token reader for one response stream.
///
/// Bytes are pushed as packets arrive; [`TokenParser::next_token`] yields
/// each complete token in order and updates the context with any format it
/// carries.
#[derive(Debug, Default)]
pub struct TokenParser {
    buf: BytesMut,
    ctx: TokenContext,
}

impl TokenParser {
    /// Create a parser with the given context.
    #[must_use]
    pub fn new(ctx: TokenContext) -> Self {
        Self {
            buf: BytesMut::new(),
            ctx,
        }
    }

    /// Append received bytes.
    pub fn push(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Decode the next complete token, or `None` if more bytes are needed.
    pub fn next_token(&mut self) -> Result<Option<Token>, ProtocolError> {
        if self.buf.is_empty() {
            return Ok(None);
        }

        let mut cursor = &self.buf[..];
        match Token::decode(&mut cursor, &self.ctx) {
            Ok(token) => {
                let consumed = self.buf.len() - cursor.len();
                self.buf.advance(consumed);
                self.ctx.observe(&token);
                Ok(Some(token))
            }
            Err(ProtocolError::UnexpectedEof) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Fail if bytes of an incomplete token remain, as at end of message.
    pub fn finish(&self) -> Result<(), ProtocolError> {
        if self.buf.is_empty() {
            Ok(())
        } else {
            Err(ProtocolError::TrailingBytes(self.buf.len()))
        }
    }

    /// Whether undecoded bytes are buffered.
    #[must_use]
    pub fn has_remaining(&self) -> bool {
        !self.buf.is_empty()
    }

    /// Discard buffered bytes.
    pub fn clear(&mut self) {
        self.buf.clear();
    }

    /// The current context.
    #[must_use]
    pub fn context(&self) -> &TokenContext {
        &self.ctx
    }

    /// Mutable access to the context, for byte order or charset changes.
    pub fn context_mut(&mut self) -> &mut TokenContext {
        &mut self.ctx
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::capability::CapabilityMask;
    use crate::format::{ColumnFormat, ColumnStatus};
    use crate::types::DataType;

    fn roundtrip(token: Token, ctx: &TokenContext) {
        let mut buf = BytesMut::new();
        token.encode(&mut buf, ctx).unwrap();
        let mut cursor = buf.freeze();
        let decoded = Token::decode(&mut cursor, ctx).unwrap();
        assert_eq!(decoded, token);
        assert!(!cursor.has_remaining(), "trailing bytes after {:?}", token.token_type());
    }

    fn message(text: &str, severity: u8) -> ServerMessage {
        ServerMessage {
            number: 4002,
            state: 1,
            severity,
            text: text.into(),
            server: "ASE".into(),
            procedure: String::new(),
            line: 1,
            ..ServerMessage::default()
        }
    }

    fn int_format() -> RowFormat {
        RowFormat {
            wide: false,
            columns: vec![
                ColumnFormat {
                    name: "id".into(),
                    status: ColumnStatus::NULLABLE,
                    data_type: Some(DataType::IntN),
                    max_length: 4,
                    ..ColumnFormat::default()
                },
                ColumnFormat {
                    name: "name".into(),
                    status: ColumnStatus::NULLABLE,
                    data_type: Some(DataType::VarChar),
                    max_length: 30,
                    ..ColumnFormat::default()
                },
            ],
        }
    }

    #[test]
    fn test_unknown_tag_is_fatal() {
        let ctx = TokenContext::default();
        let mut cursor: &[u8] = &[0x01, 0x00];
        assert_eq!(
            Token::decode(&mut cursor, &ctx),
            Err(ProtocolError::UnknownToken(0x01))
        );
    }

    #[test]
    fn test_done_layout() {
        let ctx = TokenContext::default();
        let mut buf = BytesMut::new();
        Token::Done(Done::new(DoneStatus::COUNT | DoneStatus::MORE, TranState::InProgress, 7))
            .encode(&mut buf, &ctx)
            .unwrap();
        assert_eq!(&buf[..], &[0xFD, 0x11, 0x00, 0x02, 0x00, 7, 0, 0, 0]);
    }

    #[test]
    fn test_message_tokens_roundtrip() {
        for order in [ByteOrder::Little, ByteOrder::Big] {
            let ctx = TokenContext::new(order, Charset::default());
            roundtrip(Token::Info(message("Changed database context", 10)), &ctx);
            roundtrip(Token::Error(message("Login failed.", 14)), &ctx);

            let mut eed = message("Login failed.", 14);
            eed.sql_state = "ZZZZZ".into();
            eed.status = 0x01;
            eed.tran_state = 1;
            eed.procedure = "sp_who".into();
            roundtrip(Token::Eed(eed), &ctx);
        }
    }

    #[test]
    fn test_session_tokens_roundtrip() {
        let ctx = TokenContext::default();
        roundtrip(
            Token::LoginAck(LoginAck {
                status: LoginStatus::Succeed,
                tds_version: [5, 0, 0, 0],
                program_name: "sql server".into(),
                program_version: [16, 0, 4, 2],
            }),
            &ctx,
        );
        roundtrip(
            Token::EnvChange(vec![
                EnvChange {
                    kind: EnvChangeType::Database,
                    new_value: "pubs2".into(),
                    old_value: "master".into(),
                },
                EnvChange {
                    kind: EnvChangeType::PacketSize,
                    new_value: "2048".into(),
                    old_value: "512".into(),
                },
            ]),
            &ctx,
        );
        roundtrip(Token::Capability(Capabilities::client_default()), &ctx);
        roundtrip(
            Token::Capability(Capabilities {
                request: CapabilityMask::from_bytes(vec![1, 2, 3]),
                response: CapabilityMask::from_bytes(vec![0]),
            }),
            &ctx,
        );
        roundtrip(Token::ReturnStatus(-6), &ctx);
        roundtrip(Token::Msg(Msg { status: 1, id: 7 }), &ctx);
        roundtrip(
            Token::OptionCmd(OptionCmd {
                command: 1,
                option: 15,
                argument: Bytes::from_static(&[1]),
            }),
            &ctx,
        );
        roundtrip(Token::OrderBy(Bytes::from_static(&[1, 2])), &ctx);
        roundtrip(
            Token::Control(vec![Bytes::from_static(b"fmt"), Bytes::new()]),
            &ctx,
        );
        roundtrip(Token::TabName(Bytes::from_static(b"\x05authors")), &ctx);
        roundtrip(Token::ColInfo(Bytes::from_static(&[1, 1, 0])), &ctx);
        roundtrip(Token::Logout(0), &ctx);
        roundtrip(Token::DoneProc(Done::new(DoneStatus::PROC, TranState::Succeed, 0)), &ctx);
        roundtrip(
            Token::DoneInProc(Done::new(DoneStatus::COUNT | DoneStatus::MORE, TranState::NotInTransaction, 12)),
            &ctx,
        );
    }

    #[test]
    fn test_request_tokens_roundtrip() {
        let ctx = TokenContext::default();
        roundtrip(
            Token::Language(Language {
                has_args: true,
                text: "select * from t where id = @id".into(),
            }),
            &ctx,
        );
        roundtrip(
            Token::DbRpc(DbRpc {
                name: "sp_who".into(),
                has_params: false,
            }),
            &ctx,
        );
    }

    #[test]
    fn test_row_requires_format() {
        let ctx = TokenContext::default();
        let mut cursor: &[u8] = &[0xD1, 0x04, 0x01, 0x00, 0x00, 0x00];
        assert_eq!(
            Token::decode(&mut cursor, &ctx),
            Err(ProtocolError::MissingFormat("ROW"))
        );
    }

    #[test]
    fn test_rows_roundtrip_with_context() {
        let mut ctx = TokenContext::default();
        let format = Token::RowFormat(Arc::new(int_format()));
        roundtrip(format.clone(), &ctx);
        ctx.observe(&format);

        roundtrip(
            Token::Row(Row {
                values: vec![SqlValue::Int(1), SqlValue::String("Header".into())],
            }),
            &ctx,
        );
        roundtrip(
            Token::Row(Row {
                values: vec![SqlValue::Null, SqlValue::Null],
            }),
            &ctx,
        );

        let params = Token::ParamFormat(Arc::new(ParamFormat {
            wide: true,
            columns: vec![ColumnFormat::for_param("@out", &SqlValue::Int(0), true, &ctx)],
        }));
        roundtrip(params.clone(), &ctx);
        ctx.observe(&params);
        roundtrip(
            Token::Params(Row {
                values: vec![SqlValue::Int(99)],
            }),
            &ctx,
        );
    }

    #[test]
    fn test_row_value_count_mismatch() {
        let mut ctx = TokenContext::default();
        ctx.observe(&Token::RowFormat(Arc::new(int_format())));
        let mut buf = BytesMut::new();
        let result = Token::Row(Row {
            values: vec![SqlValue::Int(1)],
        })
        .encode(&mut buf, &ctx);
        assert!(result.is_err());
    }

    #[test]
    fn test_parser_waits_for_complete_token() {
        let mut ctx = TokenContext::default();
        let mut stream = BytesMut::new();
        let format = Token::RowFormat(Arc::new(int_format()));
        format.encode(&mut stream, &ctx).unwrap();
        ctx.observe(&format);
        Token::Row(Row {
            values: vec![SqlValue::Int(5), SqlValue::String("Row1".into())],
        })
        .encode(&mut stream, &ctx)
        .unwrap();
        Token::Done(Done::new(DoneStatus::COUNT, TranState::NotInTransaction, 1))
            .encode(&mut stream, &ctx)
            .unwrap();

        let mut parser = TokenParser::new(TokenContext::default());
        let mut tokens = Vec::new();
        // Feed one byte at a time.
        for byte in stream.iter() {
            parser.push(&[*byte]);
            while let Some(token) = parser.next_token().unwrap() {
                tokens.push(token);
            }
        }
        parser.finish().unwrap();

        assert_eq!(tokens.len(), 3);
        assert!(matches!(tokens[0], Token::RowFormat(_)));
        assert!(matches!(&tokens[1], Token::Row(row) if row.values[1] == SqlValue::String("Row1".into())));
        assert_eq!(tokens[2].as_done().map(|d| d.count), Some(1));
    }

    #[test]
    fn test_parser_reports_trailing_bytes() {
        let mut parser = TokenParser::default();
        parser.push(&[0xFD, 0x00]);
        assert_eq!(parser.next_token().unwrap(), None);
        assert_eq!(parser.finish(), Err(ProtocolError::TrailingBytes(2)));
    }

    #[test]
    fn test_envchange_length_mismatch() {
        let ctx = TokenContext::default();
        // Declares 4 bytes; entry claims a 5-byte value.
        let mut cursor: &[u8] = &[0xE3, 4, 0, 1, 5, b'a', b'b'];
        assert!(matches!(
            Token::decode(&mut cursor, &ctx),
            Err(ProtocolError::LengthMismatch { token: "ENVCHANGE", .. })
        ));
    }

    #[test]
    fn test_token_type_matches_tag() {
        for tag in 0u8..=255 {
            if let Ok(ty) = TokenType::from_u8(tag) {
                assert_eq!(ty as u8, tag);
            }
        }
    }
}
