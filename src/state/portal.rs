//! Portal state machine: row-limited reads from a bound statement.
//!
//! A portal is established with `[Parse] Bind Describe(portal) Flush`
//! and then read in chunks with `Execute(max_rows) Flush`. PortalSuspended
//! marks the end of a chunk; CommandComplete marks exhaustion. The portal
//! is released with `Close(portal) Sync`.

use crate::buffer_set::BufferSet;
use crate::error::{Error, Result, ServerError};
use crate::handler::RowHandler;
use crate::protocol::backend::{
    BindComplete, CloseComplete, CommandComplete, DataRow, ErrorResponse, NoData, ParseComplete,
    PortalSuspended, RawMessage, ReadyForQuery, RowDescription, msg_type,
};
use crate::protocol::frontend::{
    write_bind, write_close_portal, write_execute, write_flush, write_parse, write_sync,
    write_describe_portal,
};
use crate::protocol::types::TransactionStatus;
use crate::statement::StatementDescription;
use crate::types::{ConnInfo, Value, natural_oid};

use super::action::Action;
use super::extended::encode_params;
use super::parse_async_message;

/// Portal flow state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Initial,
    WaitingParse,
    WaitingBind,
    WaitingRowDesc,
    Bound,
    StartFetch,
    FetchingRows,
    SuspendedChunk,
    Complete,
    Closing,
    WaitingReady,
    DrainAfterError,
    Finished,
}

/// Outcome of one fetch chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    /// The row limit was reached; more rows may remain.
    Suspended,
    /// The portal is exhausted.
    Complete,
}

/// Portal protocol flow.
///
/// The driver runs three phases, each stepped to `Action::Finished`:
/// bind (constructor), any number of fetches (`start_fetch`), and close
/// (`start_close`).
pub struct PortalFlow {
    state: State,
    error: Option<ServerError>,
    transaction_status: Option<TransactionStatus>,
    last_fetch: Option<FetchOutcome>,
    rows_affected: Option<u64>,
}

impl PortalFlow {
    /// Bind a prepared statement to the unnamed portal:
    /// Bind + Describe(portal) + Flush.
    pub fn bind_statement(
        info: &ConnInfo,
        buffer_set: &mut BufferSet,
        description: &StatementDescription,
        params: &[Value],
    ) -> Result<Self> {
        let (formats, encoded) = encode_params(info, description.param_oids(), params)?;
        let results = super::extended::result_formats(info, description);

        buffer_set.write_buffer.clear();
        write_bind(
            &mut buffer_set.write_buffer,
            "",
            description.name(),
            &formats,
            &encoded,
            &results,
        );
        write_describe_portal(&mut buffer_set.write_buffer, "");
        write_flush(&mut buffer_set.write_buffer);

        Ok(Self {
            state: State::Initial,
            error: None,
            transaction_status: None,
            last_fetch: None,
            rows_affected: None,
        })
    }

    /// Parse raw SQL and bind it to the unnamed portal:
    /// Parse + Bind + Describe(portal) + Flush.
    pub fn bind_sql(
        info: &ConnInfo,
        buffer_set: &mut BufferSet,
        sql: &str,
        params: &[Value],
    ) -> Result<Self> {
        let param_oids: Vec<u32> = params.iter().map(natural_oid).collect();
        let (formats, encoded) = encode_params(info, &param_oids, params)?;

        buffer_set.write_buffer.clear();
        write_parse(&mut buffer_set.write_buffer, "", sql, &param_oids);
        write_bind(&mut buffer_set.write_buffer, "", "", &formats, &encoded, &[]);
        write_describe_portal(&mut buffer_set.write_buffer, "");
        write_flush(&mut buffer_set.write_buffer);

        Ok(Self {
            state: State::Initial,
            error: None,
            transaction_status: None,
            last_fetch: None,
            rows_affected: None,
        })
    }

    /// Begin a fetch of up to `max_rows` rows (0 = all remaining).
    pub fn start_fetch(&mut self, buffer_set: &mut BufferSet, max_rows: u32) {
        buffer_set.write_buffer.clear();
        write_execute(&mut buffer_set.write_buffer, "", max_rows);
        write_flush(&mut buffer_set.write_buffer);
        self.last_fetch = None;
        self.state = State::StartFetch;
    }

    /// Begin releasing the portal: Close(portal) + Sync.
    pub fn start_close(&mut self, buffer_set: &mut BufferSet) {
        buffer_set.write_buffer.clear();
        write_close_portal(&mut buffer_set.write_buffer, "");
        write_sync(&mut buffer_set.write_buffer);
        self.state = State::Closing;
    }

    /// The server error latched during the exchange, if any.
    pub fn take_error(&mut self) -> Option<ServerError> {
        self.error.take()
    }

    /// Outcome of the last completed fetch.
    pub fn last_fetch(&self) -> Option<FetchOutcome> {
        self.last_fetch
    }

    /// Rows affected, reported when the portal completed.
    pub fn rows_affected(&self) -> Option<u64> {
        self.rows_affected
    }

    /// Step one fetch/bind/close exchange with row delivery.
    pub fn step_with_handler<H: RowHandler>(
        &mut self,
        info: &ConnInfo,
        handler: &mut H,
        buffer_set: &mut BufferSet,
    ) -> Result<Action> {
        match self.state {
            State::Initial => {
                self.state = State::WaitingParse;
                return Ok(Action::WriteAndReadMessage);
            }
            State::StartFetch => {
                self.state = State::FetchingRows;
                return Ok(Action::WriteAndReadMessage);
            }
            State::Closing => {
                self.state = State::WaitingReady;
                return Ok(Action::WriteAndReadMessage);
            }
            _ => {}
        }

        let type_byte = buffer_set.type_byte;

        if RawMessage::is_async_type(type_byte) {
            let msg = parse_async_message(type_byte, &buffer_set.read_buffer)?;
            return Ok(Action::HandleAsync(msg));
        }

        if type_byte == msg_type::ERROR_RESPONSE {
            let error = ErrorResponse::parse(&buffer_set.read_buffer)?.0;
            if self.error.is_none() {
                self.error = Some(error);
            }
            // The pipeline used Flush, not Sync; the server discards
            // input until a Sync arrives, so send one to re-synchronize.
            buffer_set.write_buffer.clear();
            write_sync(&mut buffer_set.write_buffer);
            self.state = State::DrainAfterError;
            return Ok(Action::WriteAndReadMessage);
        }

        match self.state {
            State::WaitingParse => {
                if type_byte == msg_type::PARSE_COMPLETE {
                    ParseComplete::parse(&buffer_set.read_buffer)?;
                    self.state = State::WaitingBind;
                    Ok(Action::ReadMessage)
                } else {
                    // Bind-only pipelines skip ParseComplete
                    self.state = State::WaitingBind;
                    self.step_with_handler(info, handler, buffer_set)
                }
            }
            State::WaitingBind => {
                if type_byte != msg_type::BIND_COMPLETE {
                    return Err(Error::Protocol(format!(
                        "expected BindComplete, got '{}'",
                        type_byte as char
                    )));
                }
                BindComplete::parse(&buffer_set.read_buffer)?;
                self.state = State::WaitingRowDesc;
                Ok(Action::ReadMessage)
            }
            State::WaitingRowDesc => match type_byte {
                msg_type::ROW_DESCRIPTION => {
                    buffer_set.column_buffer.clear();
                    let payload = std::mem::take(&mut buffer_set.read_buffer);
                    buffer_set.column_buffer.extend_from_slice(&payload);
                    buffer_set.read_buffer = payload;
                    {
                        let cols = RowDescription::parse(&buffer_set.column_buffer)?;
                        handler.result_start(&cols)?;
                    }
                    self.state = State::Bound;
                    Ok(Action::Finished)
                }
                msg_type::NO_DATA => {
                    NoData::parse(&buffer_set.read_buffer)?;
                    buffer_set.column_buffer.clear();
                    self.state = State::Bound;
                    Ok(Action::Finished)
                }
                other => Err(Error::Protocol(format!(
                    "expected RowDescription or NoData, got '{}'",
                    other as char
                ))),
            },
            State::FetchingRows => match type_byte {
                msg_type::DATA_ROW => {
                    let cols = RowDescription::parse(&buffer_set.column_buffer)?;
                    let row = DataRow::parse(&buffer_set.read_buffer)?;
                    handler.row(info, &cols, row)?;
                    Ok(Action::ReadMessage)
                }
                msg_type::PORTAL_SUSPENDED => {
                    PortalSuspended::parse(&buffer_set.read_buffer)?;
                    self.last_fetch = Some(FetchOutcome::Suspended);
                    self.state = State::SuspendedChunk;
                    Ok(Action::Finished)
                }
                msg_type::COMMAND_COMPLETE => {
                    let complete = CommandComplete::parse(&buffer_set.read_buffer)?;
                    self.rows_affected = complete.rows_affected();
                    handler.result_end(complete)?;
                    self.last_fetch = Some(FetchOutcome::Complete);
                    self.state = State::Complete;
                    Ok(Action::Finished)
                }
                msg_type::EMPTY_QUERY_RESPONSE => {
                    self.last_fetch = Some(FetchOutcome::Complete);
                    self.state = State::Complete;
                    Ok(Action::Finished)
                }
                other => Err(Error::Protocol(format!(
                    "unexpected message in portal fetch: '{}'",
                    other as char
                ))),
            },
            State::WaitingReady | State::DrainAfterError => match type_byte {
                msg_type::CLOSE_COMPLETE => {
                    CloseComplete::parse(&buffer_set.read_buffer)?;
                    Ok(Action::ReadMessage)
                }
                msg_type::READY_FOR_QUERY => {
                    let ready = ReadyForQuery::parse(&buffer_set.read_buffer)?;
                    self.transaction_status = Some(ready.transaction_status().unwrap_or_default());
                    self.state = State::Finished;
                    Ok(Action::Finished)
                }
                // After an error everything else is discarded output
                _ if self.state == State::DrainAfterError => Ok(Action::ReadMessage),
                other => Err(Error::Protocol(format!(
                    "expected ReadyForQuery, got '{}'",
                    other as char
                ))),
            },
            _ => Err(Error::Protocol(format!("unexpected state {:?}", self.state))),
        }
    }
}

impl PortalFlow {
    /// Transaction status from the Sync's ReadyForQuery (set once the
    /// close or error-recovery phase finishes).
    pub fn transaction_status(&self) -> Option<TransactionStatus> {
        self.transaction_status
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::CollectHandler;

    fn int4_row_description() -> Vec<u8> {
        let mut payload = Vec::new();
        payload.extend_from_slice(&1_u16.to_be_bytes());
        payload.extend_from_slice(b"n\0");
        payload.extend_from_slice(&0_u32.to_be_bytes());
        payload.extend_from_slice(&0_i16.to_be_bytes());
        payload.extend_from_slice(&23_u32.to_be_bytes());
        payload.extend_from_slice(&4_i16.to_be_bytes());
        payload.extend_from_slice(&(-1_i32).to_be_bytes());
        payload.extend_from_slice(&1_u16.to_be_bytes());
        payload
    }

    fn binary_row(n: i32) -> Vec<u8> {
        let mut payload = 1_u16.to_be_bytes().to_vec();
        payload.extend_from_slice(&4_i32.to_be_bytes());
        payload.extend_from_slice(&n.to_be_bytes());
        payload
    }

    fn feed<H: RowHandler>(
        flow: &mut PortalFlow,
        info: &ConnInfo,
        handler: &mut H,
        set: &mut BufferSet,
        type_byte: u8,
        payload: &[u8],
    ) -> Action {
        set.type_byte = type_byte;
        set.read_buffer.clear();
        set.read_buffer.extend_from_slice(payload);
        flow.step_with_handler(info, handler, set).unwrap()
    }

    #[test]
    fn chunked_fetches() {
        let info = ConnInfo::new();
        let mut handler: CollectHandler<(i32,)> = CollectHandler::new();
        let mut set = BufferSet::new();
        let mut flow = PortalFlow::bind_sql(&info, &mut set, "select n", &[]).unwrap();

        // Bind phase
        assert!(matches!(
            flow.step_with_handler(&info, &mut handler, &mut set).unwrap(),
            Action::WriteAndReadMessage
        ));
        feed(&mut flow, &info, &mut handler, &mut set, b'1', b"");
        feed(&mut flow, &info, &mut handler, &mut set, b'2', b"");
        let desc = int4_row_description();
        assert!(matches!(
            feed(&mut flow, &info, &mut handler, &mut set, b'T', &desc),
            Action::Finished
        ));

        // First chunk: two rows then suspended
        flow.start_fetch(&mut set, 2);
        assert!(matches!(
            flow.step_with_handler(&info, &mut handler, &mut set).unwrap(),
            Action::WriteAndReadMessage
        ));
        feed(&mut flow, &info, &mut handler, &mut set, b'D', &binary_row(1));
        feed(&mut flow, &info, &mut handler, &mut set, b'D', &binary_row(2));
        assert!(matches!(
            feed(&mut flow, &info, &mut handler, &mut set, b's', b""),
            Action::Finished
        ));
        assert_eq!(flow.last_fetch(), Some(FetchOutcome::Suspended));

        // Second chunk: one row then complete
        flow.start_fetch(&mut set, 2);
        flow.step_with_handler(&info, &mut handler, &mut set).unwrap();
        feed(&mut flow, &info, &mut handler, &mut set, b'D', &binary_row(3));
        assert!(matches!(
            feed(&mut flow, &info, &mut handler, &mut set, b'C', b"SELECT 3\0"),
            Action::Finished
        ));
        assert_eq!(flow.last_fetch(), Some(FetchOutcome::Complete));

        // Close
        flow.start_close(&mut set);
        flow.step_with_handler(&info, &mut handler, &mut set).unwrap();
        feed(&mut flow, &info, &mut handler, &mut set, b'3', b"");
        assert!(matches!(
            feed(&mut flow, &info, &mut handler, &mut set, b'Z', b"I"),
            Action::Finished
        ));

        assert_eq!(handler.into_rows(), vec![(1,), (2,), (3,)]);
    }

    #[test]
    fn error_triggers_sync_recovery() {
        let info = ConnInfo::new();
        let mut handler: CollectHandler<(i32,)> = CollectHandler::new();
        let mut set = BufferSet::new();
        let mut flow = PortalFlow::bind_sql(&info, &mut set, "select nope", &[]).unwrap();
        flow.step_with_handler(&info, &mut handler, &mut set).unwrap();

        set.type_byte = b'E';
        set.read_buffer = b"SERROR\0VERROR\0C42703\0Mbad column\0\0".to_vec();
        let action = flow.step_with_handler(&info, &mut handler, &mut set).unwrap();
        // Sync goes out to re-synchronize
        assert!(matches!(action, Action::WriteAndReadMessage));
        assert_eq!(set.write_buffer[0], b'S');

        assert!(matches!(
            feed(&mut flow, &info, &mut handler, &mut set, b'Z', b"I"),
            Action::Finished
        ));
        assert_eq!(flow.take_error().unwrap().code(), "42703");
    }
}
