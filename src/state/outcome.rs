//! Response collector: turns the backend messages for one round trip into
//! a [`RawOutcome`].
//!
//! A round trip ends at ReadyForQuery. A simple Query may carry several
//! statements; the collector keeps the last outcome, except that the first
//! error wins. COPY responses are handed out immediately, since the caller
//! has to run the copy sub-protocol before the round trip can finish.

use crate::error::{Error, Result};
use crate::protocol::backend::{
    CommandComplete, DataRow, ErrorResponse, RawMessage, ReadyForQuery, RowDescription, msg_type,
};
use crate::protocol::types::TransactionStatus;
use crate::result::{Column, ExecStatus, RawOutcome, RawRow};

/// What the collector needs next.
#[derive(Debug)]
pub enum Collect {
    /// Keep feeding messages.
    Pending,
    /// The server entered COPY OUT; CopyData messages follow.
    CopyOut(RawOutcome),
    /// The server entered COPY IN and waits for data.
    CopyIn(RawOutcome),
    /// ReadyForQuery arrived; take the outcome with [`OutcomeCollector::finish`].
    Ready,
}

#[derive(Debug, Default)]
pub struct OutcomeCollector {
    columns: Option<Vec<Column>>,
    rows: Vec<RawRow>,
    last: Option<RawOutcome>,
    error: Option<RawOutcome>,
    transaction_status: TransactionStatus,
}

impl OutcomeCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Transaction status reported by the closing ReadyForQuery.
    pub fn transaction_status(&self) -> TransactionStatus {
        self.transaction_status
    }

    fn complete(&mut self, outcome: RawOutcome) {
        self.rows = Vec::new();
        self.columns = None;
        self.last = Some(outcome);
    }

    /// Process a message from the server.
    pub fn step(&mut self, msg: RawMessage<'_>) -> Result<Collect> {
        match msg.type_byte {
            msg_type::PARSE_COMPLETE
            | msg_type::BIND_COMPLETE
            | msg_type::CLOSE_COMPLETE
            | msg_type::NO_DATA
            | msg_type::PARAMETER_DESCRIPTION
            | msg_type::PORTAL_SUSPENDED => {}
            msg_type::ROW_DESCRIPTION => {
                let desc = RowDescription::parse(msg.payload)?;
                let columns = desc
                    .fields()
                    .iter()
                    .map(|f| Column {
                        name: String::from_utf8_lossy(f.name).into_owned(),
                        table_oid: f.table_oid(),
                        column_id: f.column_id(),
                        type_oid: f.type_oid(),
                        type_size: f.type_size(),
                        type_modifier: f.type_modifier(),
                        format: f.format(),
                    })
                    .collect();
                self.columns = Some(columns);
            }
            msg_type::DATA_ROW => {
                let row = DataRow::parse(msg.payload)?;
                self.rows.push(row.to_values()?);
            }
            msg_type::COMMAND_COMPLETE => {
                let tag = CommandComplete::parse(msg.payload)?.tag.to_string();
                let outcome = match self.columns.take() {
                    Some(columns) => RawOutcome {
                        command_tag: Some(tag),
                        columns,
                        rows: std::mem::take(&mut self.rows),
                        ..RawOutcome::new(ExecStatus::TuplesOk)
                    },
                    None => RawOutcome::command(tag),
                };
                self.complete(outcome);
            }
            msg_type::EMPTY_QUERY_RESPONSE => {
                self.complete(RawOutcome::new(ExecStatus::EmptyQuery));
            }
            msg_type::ERROR_RESPONSE => {
                let ErrorResponse(fields) = ErrorResponse::parse(msg.payload)?;
                self.rows = Vec::new();
                self.columns = None;
                if self.error.is_none() {
                    self.error = Some(RawOutcome::error(fields));
                }
            }
            msg_type::COPY_OUT_RESPONSE => {
                return Ok(Collect::CopyOut(RawOutcome::new(ExecStatus::CopyOut)));
            }
            msg_type::COPY_IN_RESPONSE => {
                return Ok(Collect::CopyIn(RawOutcome::new(ExecStatus::CopyIn)));
            }
            msg_type::READY_FOR_QUERY => {
                let ready = ReadyForQuery::parse(msg.payload)?;
                self.transaction_status = ready.transaction_status().unwrap_or_default();
                return Ok(Collect::Ready);
            }
            msg_type::COPY_BOTH_RESPONSE => {
                return Err(Error::FeatureNotSupported(
                    "COPY BOTH (replication) is not supported".into(),
                ));
            }
            other => {
                return Err(Error::Protocol(format!(
                    "Unexpected message in statement response: '{}'",
                    other as char
                )));
            }
        }
        Ok(Collect::Pending)
    }

    /// The outcome of the round trip: the first error if any, otherwise the
    /// last completed statement.
    ///
    /// A round trip that completed nothing (Parse + Sync) counts as a
    /// command with no tag.
    pub fn finish(self) -> RawOutcome {
        self.error
            .or(self.last)
            .unwrap_or_else(|| RawOutcome::new(ExecStatus::CommandOk))
    }
}
