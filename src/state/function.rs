//! Function call (fastpath) state machine.
//!
//! Carries FunctionCall / FunctionCallResponse pairs, used for large
//! object operations. Per-call payloads are capped by the driver to
//! keep individual messages under the server's read buffer.

use crate::buffer_set::BufferSet;
use crate::error::{Error, Result, ServerError};
use crate::protocol::backend::{
    ErrorResponse, FunctionCallResponse, RawMessage, ReadyForQuery, msg_type,
};
use crate::protocol::frontend::copy::write_function_call;
use crate::protocol::types::{FormatCode, Oid, TransactionStatus};

use super::action::Action;
use super::{StateMachine, parse_async_message};

/// Function call state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Initial,
    WaitingResponse,
    WaitingReady,
    Finished,
}

/// Function call flow.
pub struct FunctionCallFlow {
    state: State,
    result: Option<Option<Vec<u8>>>,
    error: Option<ServerError>,
    transaction_status: Option<TransactionStatus>,
}

impl FunctionCallFlow {
    /// Create the flow and fill the write buffer with the FunctionCall.
    ///
    /// All arguments and the result use binary format.
    pub fn new(
        buffer_set: &mut BufferSet,
        function_oid: Oid,
        args: &[Option<Vec<u8>>],
    ) -> Self {
        buffer_set.write_buffer.clear();
        let formats = vec![FormatCode::Binary; args.len()];
        write_function_call(
            &mut buffer_set.write_buffer,
            function_oid,
            &formats,
            args,
            FormatCode::Binary,
        );
        Self {
            state: State::Initial,
            result: None,
            error: None,
            transaction_status: None,
        }
    }

    /// The function result (`None` for SQL NULL), once finished.
    pub fn take_result(&mut self) -> Option<Option<Vec<u8>>> {
        self.result.take()
    }

    /// The server error latched during the exchange, if any.
    pub fn take_error(&mut self) -> Option<ServerError> {
        self.error.take()
    }
}

impl StateMachine for FunctionCallFlow {
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
            let error = ErrorResponse::parse(&buffer_set.read_buffer)?.0;
            if self.error.is_none() {
                self.error = Some(error);
            }
            self.state = State::WaitingReady;
            return Ok(Action::ReadMessage);
        }

        match self.state {
            State::WaitingResponse => match type_byte {
                msg_type::FUNCTION_CALL_RESPONSE => {
                    let response = FunctionCallResponse::parse(&buffer_set.read_buffer)?;
                    self.result = Some(response.value.map(<[u8]>::to_vec));
                    self.state = State::WaitingReady;
                    Ok(Action::ReadMessage)
                }
                other => Err(Error::Protocol(format!(
                    "expected FunctionCallResponse, got '{}'",
                    other as char
                ))),
            },
            State::WaitingReady => match type_byte {
                msg_type::READY_FOR_QUERY => {
                    let ready = ReadyForQuery::parse(&buffer_set.read_buffer)?;
                    self.transaction_status = Some(ready.transaction_status().unwrap_or_default());
                    self.state = State::Finished;
                    Ok(Action::Finished)
                }
                other => Err(Error::Protocol(format!(
                    "expected ReadyForQuery, got '{}'",
                    other as char
                ))),
            },
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

    #[test]
    fn call_and_result() {
        let mut set = BufferSet::new();
        let mut flow = FunctionCallFlow::new(
            &mut set,
            764,
            &[Some((-1_i32).to_be_bytes().to_vec())],
        );

        assert!(matches!(flow.step(&mut set).unwrap(), Action::WriteAndReadMessage));
        assert_eq!(set.write_buffer[0], b'F');

        set.type_byte = b'V';
        set.read_buffer.clear();
        set.read_buffer.extend_from_slice(&4_i32.to_be_bytes());
        set.read_buffer.extend_from_slice(&16385_i32.to_be_bytes());
        assert!(matches!(flow.step(&mut set).unwrap(), Action::ReadMessage));

        set.type_byte = b'Z';
        set.read_buffer = b"I".to_vec();
        assert!(matches!(flow.step(&mut set).unwrap(), Action::Finished));

        assert_eq!(
            flow.take_result().unwrap().unwrap(),
            16385_i32.to_be_bytes()
        );
    }

    #[test]
    fn error_drains() {
        let mut set = BufferSet::new();
        let mut flow = FunctionCallFlow::new(&mut set, 999, &[]);
        flow.step(&mut set).unwrap();

        set.type_byte = b'E';
        set.read_buffer = b"SERROR\0VERROR\0C42883\0Mno such function\0\0".to_vec();
        flow.step(&mut set).unwrap();

        set.type_byte = b'Z';
        set.read_buffer = b"I".to_vec();
        assert!(matches!(flow.step(&mut set).unwrap(), Action::Finished));
        assert_eq!(flow.take_error().unwrap().code(), "42883");
    }
}
