//! Request builders.
//!
//! A language request is a LANGUAGE token; a procedure call is a DBRPC token.
//! Either is followed by PARAMFMT and PARAMS when parameters are supplied.

use std::sync::Arc;

use bytes::{Bytes, BytesMut};

use crate::error::ProtocolError;
use crate::format::{ColumnFormat, ParamFormat};
use crate::token::{DbRpc, Language, Row, Token, TokenContext};
use crate::value::SqlValue;

/// A named request parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct RpcParam {
    /// Parameter name, including the leading `@`.
    pub name: String,
    /// Value sent to the server.
    pub value: SqlValue,
    /// Whether the server should return this parameter.
    pub output: bool,
}

impl RpcParam {
    /// An input parameter.
    pub fn input(name: impl Into<String>, value: impl Into<SqlValue>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            output: false,
        }
    }

    /// An output parameter; `value` gives its type and initial value.
    pub fn output(name: impl Into<String>, value: impl Into<SqlValue>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            output: true,
        }
    }
}

fn encode_params(dst: &mut BytesMut, params: &[RpcParam], ctx: &TokenContext) -> Result<(), ProtocolError> {
    let format = ParamFormat {
        wide: false,
        columns: params
            .iter()
            .map(|p| ColumnFormat::for_param(&p.name, &p.value, p.output, ctx))
            .collect(),
    };
    let format = Token::ParamFormat(Arc::new(format));
    format.encode(dst, ctx)?;

    let mut ctx = ctx.clone();
    ctx.observe(&format);
    Token::Params(Row {
        values: params.iter().map(|p| p.value.clone()).collect(),
    })
    .encode(dst, &ctx)
}

/// A SQL batch, optionally with parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct LanguageRequest {
    /// SQL text.
    pub text: String,
    /// Parameters referenced by the text.
    pub params: Vec<RpcParam>,
}

impl LanguageRequest {
    /// A batch without parameters.
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            params: Vec::new(),
        }
    }

    /// Add a parameter.
    #[must_use]
    pub fn param(mut self, param: RpcParam) -> Self {
        self.params.push(param);
        self
    }

    /// Encode the request tokens.
    pub fn encode(&self, ctx: &TokenContext) -> Result<Bytes, ProtocolError> {
        let mut dst = BytesMut::new();
        Token::Language(Language {
            has_args: !self.params.is_empty(),
            text: self.text.clone(),
        })
        .encode(&mut dst, ctx)?;
        if !self.params.is_empty() {
            encode_params(&mut dst, &self.params, ctx)?;
        }
        Ok(dst.freeze())
    }
}

/// A stored procedure call.
#[derive(Debug, Clone, PartialEq)]
pub struct RpcRequest {
    /// Procedure name.
    pub name: String,
    /// Parameters in declaration order.
    pub params: Vec<RpcParam>,
}

impl RpcRequest {
    /// A call without parameters.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            params: Vec::new(),
        }
    }

    /// Add a parameter.
    #[must_use]
    pub fn param(mut self, param: RpcParam) -> Self {
        self.params.push(param);
        self
    }

    /// Encode the request tokens.
    pub fn encode(&self, ctx: &TokenContext) -> Result<Bytes, ProtocolError> {
        let mut dst = BytesMut::new();
        Token::DbRpc(DbRpc {
            name: self.name.clone(),
            has_params: !self.params.is_empty(),
        })
        .encode(&mut dst, ctx)?;
        if !self.params.is_empty() {
            encode_params(&mut dst, &self.params, ctx)?;
        }
        Ok(dst.freeze())
    }
}
