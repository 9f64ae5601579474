//! Simple query protocol state machine.

use crate::buffer_set::BufferSet;
use crate::error::{Error, Result, ServerError};
use crate::handler::RowHandler;
use crate::protocol::backend::{
    CommandComplete, DataRow, EmptyQueryResponse, ErrorResponse, RawMessage, ReadyForQuery,
    RowDescription, msg_type,
};
use crate::protocol::frontend::{copy::write_copy_fail, write_query};
use crate::protocol::types::TransactionStatus;
use crate::types::ConnInfo;

use super::action::Action;
use super::{StateMachine, parse_async_message};

/// Simple query state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Initial,
    WaitingResponse,
    ProcessingRows,
    DrainingCopyOut,
    Finished,
}

/// Simple query protocol flow.
///
/// Sends Query and walks RowDescription/DataRow/CommandComplete
/// sequences (one per statement for multi-statement SQL) until
/// ReadyForQuery. A server error is latched and the stream is drained
/// to ReadyForQuery so the connection ends in a known state; the driver
/// surfaces the latched error afterwards.
///
/// COPY responses are handled defensively: COPY FROM STDIN is refused
/// with CopyFail and COPY TO STDOUT data is discarded. The dedicated
/// copy entry points expose real streaming.
pub struct SimpleQueryFlow<'a, H> {
    state: State,
    handler: &'a mut H,
    info: &'a ConnInfo,
    error: Option<ServerError>,
    transaction_status: Option<TransactionStatus>,
}

impl<'a, H: RowHandler> SimpleQueryFlow<'a, H> {
    /// Create the flow and fill the write buffer with Query(sql).
    pub fn new(
        handler: &'a mut H,
        info: &'a ConnInfo,
        buffer_set: &mut BufferSet,
        sql: &str,
    ) -> Self {
        buffer_set.write_buffer.clear();
        write_query(&mut buffer_set.write_buffer, sql);
        Self {
            state: State::Initial,
            handler,
            info,
            error: None,
            transaction_status: None,
        }
    }

    /// The server error latched during the exchange, if any.
    pub fn take_error(&mut self) -> Option<ServerError> {
        self.error.take()
    }

    fn latch_error(&mut self, payload: &[u8]) -> Result<Action> {
        let error = ErrorResponse::parse(payload)?.0;
        if self.error.is_none() {
            self.error = Some(error);
        }
        // Keep reading; the server sends ReadyForQuery after an error
        self.state = State::WaitingResponse;
        Ok(Action::ReadMessage)
    }

    fn handle_response(&mut self, buffer_set: &mut BufferSet) -> Result<Action> {
        let payload = &buffer_set.read_buffer;

        match buffer_set.type_byte {
            msg_type::ROW_DESCRIPTION => {
                buffer_set.column_buffer.clear();
                buffer_set.column_buffer.extend_from_slice(payload);
                if self.error.is_none() {
                    let cols = RowDescription::parse(&buffer_set.column_buffer)?;
                    self.handler.result_start(&cols)?;
                }
                self.state = State::ProcessingRows;
                Ok(Action::ReadMessage)
            }
            msg_type::COMMAND_COMPLETE => {
                if self.error.is_none() {
                    let complete = CommandComplete::parse(payload)?;
                    self.handler.result_end(complete)?;
                }
                // More statements may follow in a multi-statement query
                self.state = State::WaitingResponse;
                Ok(Action::ReadMessage)
            }
            msg_type::EMPTY_QUERY_RESPONSE => {
                EmptyQueryResponse::parse(payload)?;
                self.state = State::WaitingResponse;
                Ok(Action::ReadMessage)
            }
            msg_type::COPY_IN_RESPONSE => {
                // Refuse: the caller went through query(), not copy_in()
                buffer_set.write_buffer.clear();
                write_copy_fail(
                    &mut buffer_set.write_buffer,
                    "COPY FROM STDIN requires the copy interface",
                );
                self.state = State::WaitingResponse;
                Ok(Action::WriteAndReadMessage)
            }
            msg_type::COPY_OUT_RESPONSE => {
                self.state = State::DrainingCopyOut;
                Ok(Action::ReadMessage)
            }
            msg_type::COPY_BOTH_RESPONSE => Err(Error::Protocol(
                "unexpected CopyBothResponse outside replication".into(),
            )),
            msg_type::READY_FOR_QUERY => {
                let ready = ReadyForQuery::parse(payload)?;
                self.transaction_status = Some(ready.transaction_status().unwrap_or_default());
                self.state = State::Finished;
                Ok(Action::Finished)
            }
            other => Err(Error::Protocol(format!(
                "unexpected message in query response: '{}'",
                other as char
            ))),
        }
    }

    fn handle_rows(&mut self, buffer_set: &mut BufferSet) -> Result<Action> {
        let payload = &buffer_set.read_buffer;

        match buffer_set.type_byte {
            msg_type::DATA_ROW => {
                if self.error.is_none() {
                    let cols = RowDescription::parse(&buffer_set.column_buffer)?;
                    let row = DataRow::parse(payload)?;
                    self.handler.row(self.info, &cols, row)?;
                }
                Ok(Action::ReadMessage)
            }
            msg_type::COMMAND_COMPLETE => {
                if self.error.is_none() {
                    let complete = CommandComplete::parse(payload)?;
                    self.handler.result_end(complete)?;
                }
                self.state = State::WaitingResponse;
                Ok(Action::ReadMessage)
            }
            msg_type::READY_FOR_QUERY => {
                let ready = ReadyForQuery::parse(payload)?;
                self.transaction_status = Some(ready.transaction_status().unwrap_or_default());
                self.state = State::Finished;
                Ok(Action::Finished)
            }
            other => Err(Error::Protocol(format!(
                "unexpected message in row stream: '{}'",
                other as char
            ))),
        }
    }

    fn handle_copy_out(&mut self, buffer_set: &BufferSet) -> Result<Action> {
        match buffer_set.type_byte {
            msg_type::COPY_DATA => Ok(Action::ReadMessage),
            msg_type::COPY_DONE => {
                self.state = State::WaitingResponse;
                Ok(Action::ReadMessage)
            }
            other => Err(Error::Protocol(format!(
                "unexpected message in COPY OUT stream: '{}'",
                other as char
            ))),
        }
    }
}

impl<H: RowHandler> StateMachine for SimpleQueryFlow<'_, H> {
    fn step(&mut self, buffer_set: &mut BufferSet) -> Result<Action> {
        if self.state == State::Initial {
            self.state = State::WaitingResponse;
            return Ok(Action::WriteAndReadMessage);
        }

        let type_byte = buffer_set.type_byte;

        if RawMessage::is_async_type(type_byte) {
            let msg = parse_async_message(type_byte, &buffer_set.read_buffer)?;
            return Ok(Action::HandleAsync(msg));
        }

        if type_byte == msg_type::ERROR_RESPONSE {
            return self.latch_error(&buffer_set.read_buffer);
        }

        match self.state {
            State::WaitingResponse => self.handle_response(buffer_set),
            State::ProcessingRows => self.handle_rows(buffer_set),
            State::DrainingCopyOut => self.handle_copy_out(buffer_set),
            _ => Err(Error::Protocol(format!("unexpected state {:?}", self.state))),
        }
    }

    fn transaction_status(&self) -> Option<TransactionStatus> {
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
        payload.extend_from_slice(&0_u16.to_be_bytes());
        payload
    }

    fn data_row(text: &str) -> Vec<u8> {
        let mut payload = Vec::new();
        payload.extend_from_slice(&1_u16.to_be_bytes());
        payload.extend_from_slice(&(text.len() as i32).to_be_bytes());
        payload.extend_from_slice(text.as_bytes());
        payload
    }

    fn feed<H: RowHandler>(
        flow: &mut SimpleQueryFlow<'_, H>,
        set: &mut BufferSet,
        type_byte: u8,
        payload: &[u8],
    ) -> Result<Action> {
        set.type_byte = type_byte;
        set.read_buffer.clear();
        set.read_buffer.extend_from_slice(payload);
        flow.step(set)
    }

    #[test]
    fn select_flow() {
        let info = ConnInfo::new();
        let mut handler: CollectHandler<(i32,)> = CollectHandler::new();
        let mut set = BufferSet::new();
        let mut flow = SimpleQueryFlow::new(&mut handler, &info, &mut set, "SELECT 42");

        assert!(matches!(flow.step(&mut set).unwrap(), Action::WriteAndReadMessage));
        assert_eq!(set.write_buffer[0], b'Q');

        let desc = int4_row_description();
        assert!(matches!(
            feed(&mut flow, &mut set, b'T', &desc).unwrap(),
            Action::ReadMessage
        ));
        assert!(matches!(
            feed(&mut flow, &mut set, b'D', &data_row("42")).unwrap(),
            Action::ReadMessage
        ));
        assert!(matches!(
            feed(&mut flow, &mut set, b'C', b"SELECT 1\0").unwrap(),
            Action::ReadMessage
        ));
        assert!(matches!(
            feed(&mut flow, &mut set, b'Z', b"I").unwrap(),
            Action::Finished
        ));

        assert_eq!(flow.transaction_status(), Some(TransactionStatus::Idle));
        assert!(flow.take_error().is_none());
        drop(flow);
        assert_eq!(handler.into_rows(), vec![(42,)]);
    }

    #[test]
    fn error_latches_and_drains_to_ready() {
        let info = ConnInfo::new();
        let mut handler = crate::handler::DropHandler::new();
        let mut set = BufferSet::new();
        let mut flow = SimpleQueryFlow::new(&mut handler, &info, &mut set, "SELECT nope");
        flow.step(&mut set).unwrap();

        let action = feed(
            &mut flow,
            &mut set,
            b'E',
            b"SERROR\0VERROR\0C42703\0Mcolumn does not exist\0\0",
        )
        .unwrap();
        assert!(matches!(action, Action::ReadMessage));

        assert!(matches!(
            feed(&mut flow, &mut set, b'Z', b"I").unwrap(),
            Action::Finished
        ));
        let error = flow.take_error().unwrap();
        assert_eq!(error.code(), "42703");
    }

    #[test]
    fn notification_between_messages_is_surfaced() {
        let info = ConnInfo::new();
        let mut handler = crate::handler::DropHandler::new();
        let mut set = BufferSet::new();
        let mut flow = SimpleQueryFlow::new(&mut handler, &info, &mut set, "SELECT 1");
        flow.step(&mut set).unwrap();

        let mut payload = 321_u32.to_be_bytes().to_vec();
        payload.extend_from_slice(b"jobs\0ping\0");
        match feed(&mut flow, &mut set, b'A', &payload).unwrap() {
            Action::HandleAsync(super::super::AsyncMessage::Notification(notification)) => {
                assert_eq!(notification.pid, 321);
                assert_eq!(notification.channel, "jobs");
                assert_eq!(notification.payload, "ping");
            }
            other => panic!("unexpected action: {other:?}"),
        }
    }

    #[test]
    fn multi_statement_results() {
        let info = ConnInfo::new();
        let mut handler: CollectHandler<(i32,)> = CollectHandler::new();
        let mut set = BufferSet::new();
        let mut flow =
            SimpleQueryFlow::new(&mut handler, &info, &mut set, "SELECT 1; SELECT 2");
        flow.step(&mut set).unwrap();

        let desc = int4_row_description();
        feed(&mut flow, &mut set, b'T', &desc).unwrap();
        feed(&mut flow, &mut set, b'D', &data_row("1")).unwrap();
        feed(&mut flow, &mut set, b'C', b"SELECT 1\0").unwrap();
        feed(&mut flow, &mut set, b'T', &desc).unwrap();
        feed(&mut flow, &mut set, b'D', &data_row("2")).unwrap();
        feed(&mut flow, &mut set, b'C', b"SELECT 1\0").unwrap();
        assert!(matches!(
            feed(&mut flow, &mut set, b'Z', b"T").unwrap(),
            Action::Finished
        ));
        assert_eq!(flow.transaction_status(), Some(TransactionStatus::InTransaction));
        drop(flow);
        assert_eq!(handler.into_rows(), vec![(1,), (2,)]);
    }
}
