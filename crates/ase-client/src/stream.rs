//! Lazy reading of one response.
//!
//! Tokens are decoded packet by packet as the caller asks for items, so a
//! large result set never has to fit in memory. Informational messages are
//! yielded in stream position; error messages are collected and raised
//! together once the response is complete.

use std::sync::Arc;

use tds5_protocol::{Done, RowFormat, ServerMessage, Token};

use crate::error::{DatabaseErrors, Error, Result};
use crate::events::TraceGuard;
use crate::row::{OutputParameter, OutputParameters, Row};
use crate::session::Session;

/// Which DONE variant closed a statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DoneKind {
    /// End of a language statement (`DONE`).
    Statement,
    /// End of a procedure (`DONEPROC`).
    Procedure,
    /// End of a statement inside a procedure (`DONEINPROC`).
    InProcedure,
}

/// One item of a response, in server order.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseItem {
    /// A new result set begins with this format.
    Format(Arc<RowFormat>),
    /// A row of the current result set.
    Row(Row),
    /// An informational message (severity below 11).
    Message(ServerMessage),
    /// A statement or procedure finished.
    Done(DoneKind, Done),
    /// Procedure return status.
    ReturnStatus(i32),
    /// Output parameters of a procedure.
    OutputParameters(OutputParameters),
}

/// Results of one request, read on demand.
///
/// The stream borrows its session mutably. Dropping it before the end
/// leaves the rest of the response unread; the session drains it before the
/// next request.
pub struct ResultStream<'a> {
    session: &'a mut Session,
    errors: Vec<ServerMessage>,
    records_affected: Option<u64>,
    return_status: Option<i32>,
    output: OutputParameters,
    finished: bool,
    _trace: TraceGuard,
}

impl<'a> ResultStream<'a> {
    pub(crate) fn new(session: &'a mut Session, trace: TraceGuard) -> Self {
        Self {
            session,
            errors: Vec::new(),
            records_affected: None,
            return_status: None,
            output: OutputParameters::default(),
            finished: false,
            _trace: trace,
        }
    }

    /// Read the next item.
    ///
    /// Returns `Ok(None)` at the end of a clean response. At the end of a
    /// response that carried errors, fails with [`Error::Database`] holding
    /// all of them; a cancelled response fails with [`Error::Cancelled`].
    pub async fn next(&mut self) -> Result<Option<ResponseItem>> {
        while !self.finished {
            let token = match self.session.next_token().await {
                Ok(Some(token)) => token,
                Ok(None) => {
                    self.finished = true;
                    let errors = std::mem::take(&mut self.errors);
                    let fatal = errors.iter().any(ServerMessage::is_fatal);
                    let result = self.session.complete_response(errors);
                    if fatal {
                        if let Err(e) = result {
                            return Err(self.session.doom(e));
                        }
                    }
                    return result.map(|()| None);
                }
                Err(e) => {
                    self.finished = true;
                    // A fatal server error usually precedes the disconnect.
                    if self.errors.iter().any(ServerMessage::is_fatal) {
                        tracing::debug!(error = %e, "read failed after fatal server error");
                        let errors = std::mem::take(&mut self.errors);
                        return Err(Error::Database(DatabaseErrors::new(errors)));
                    }
                    return Err(e);
                }
            };
            if let Some(item) = self.handle(token) {
                return Ok(Some(item));
            }
        }
        Ok(None)
    }

    fn handle(&mut self, token: Token) -> Option<ResponseItem> {
        match token {
            Token::RowFormat(format) => Some(ResponseItem::Format(format)),
            Token::Row(row) => {
                let format = self.session.parser().context().row_format.clone()?;
                Some(ResponseItem::Row(Row::new(format, row.values)))
            }
            Token::Params(row) => {
                let names: Vec<String> = self
                    .session
                    .parser()
                    .context()
                    .param_format
                    .as_ref()
                    .map(|format| format.columns.iter().map(|c| c.name.clone()).collect())
                    .unwrap_or_default();
                let params = OutputParameters(
                    row.values
                        .into_iter()
                        .enumerate()
                        .map(|(i, value)| OutputParameter {
                            name: names.get(i).cloned().unwrap_or_default(),
                            value,
                        })
                        .collect(),
                );
                self.output.0.extend(params.iter().cloned());
                Some(ResponseItem::OutputParameters(params))
            }
            Token::ReturnStatus(status) => {
                self.return_status = Some(status);
                Some(ResponseItem::ReturnStatus(status))
            }
            Token::Info(message) | Token::Eed(message) | Token::Error(message) => {
                self.session.emit_message(&message);
                if message.is_error() {
                    tracing::debug!(
                        number = message.number,
                        severity = message.severity,
                        "server error collected"
                    );
                    self.errors.push(message);
                    None
                } else {
                    Some(ResponseItem::Message(message))
                }
            }
            Token::Done(done) => Some(self.done(DoneKind::Statement, done)),
            Token::DoneProc(done) => Some(self.done(DoneKind::Procedure, done)),
            Token::DoneInProc(done) => Some(self.done(DoneKind::InProcedure, done)),
            Token::EnvChange(changes) => {
                self.session.apply_env_changes(&changes);
                None
            }
            other => {
                tracing::trace!(token = ?other.token_type(), "skipping token");
                None
            }
        }
    }

    fn done(&mut self, kind: DoneKind, done: Done) -> ResponseItem {
        // DONEPROC repeats the count of the procedure's last statement.
        if done.has_count() && kind != DoneKind::Procedure {
            let count = u64::try_from(done.count).unwrap_or(0);
            *self.records_affected.get_or_insert(0) += count;
        }
        ResponseItem::Done(kind, done)
    }

    /// Read up to the next row, skipping other items.
    pub async fn next_row(&mut self) -> Result<Option<Row>> {
        while let Some(item) = self.next().await? {
            if let ResponseItem::Row(row) = item {
                return Ok(Some(row));
            }
        }
        Ok(None)
    }

    /// Read the rest of the response and return the rows affected.
    pub async fn finish(mut self) -> Result<Option<u64>> {
        while self.next().await?.is_some() {}
        Ok(self.records_affected)
    }

    /// Read the rest of the response, keeping every row.
    pub async fn collect_rows(mut self) -> Result<Vec<Row>> {
        let mut rows = Vec::new();
        while let Some(item) = self.next().await? {
            if let ResponseItem::Row(row) = item {
                rows.push(row);
            }
        }
        Ok(rows)
    }

    /// Sum of row counts reported so far, `None` if no statement reported
    /// one.
    #[must_use]
    pub fn records_affected(&self) -> Option<u64> {
        self.records_affected
    }

    /// Procedure return status, once read.
    #[must_use]
    pub fn return_status(&self) -> Option<i32> {
        self.return_status
    }

    /// Output parameters read so far.
    #[must_use]
    pub fn output_parameters(&self) -> &OutputParameters {
        &self.output
    }

    /// Whether the whole response has been read.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.finished
    }
}

impl std::fmt::Debug for ResultStream<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultStream")
            .field("errors", &self.errors.len())
            .field("records_affected", &self.records_affected)
            .field("finished", &self.finished)
            .finish_non_exhaustive()
    }
}
