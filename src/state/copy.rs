//! COPY sub-protocol state machines.
//!
//! All three COPY variants begin with a Query whose response is a
//! Copy*Response. COPY IN then streams CopyData frames to the server,
//! COPY OUT streams them from the server, and COPY BOTH does both
//! (streaming replication). The flows here handle entry, completion and
//! error draining; the drivers move the data itself.

use crate::buffer_set::BufferSet;
use crate::error::{Error, Result, ServerError};
use crate::handler::CopySink;
use crate::protocol::backend::{
    CommandComplete, CopyBothResponse, CopyDone, CopyInResponse, CopyOutResponse, ErrorResponse,
    RawMessage, ReadyForQuery, msg_type,
};
use crate::protocol::frontend::{write_copy_done, write_copy_fail, write_query};
use crate::protocol::types::TransactionStatus;

use super::action::Action;
use super::{StateMachine, parse_async_message};

/// COPY FROM STDIN state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InState {
    Initial,
    WaitingCopyIn,
    Streaming,
    WaitingComplete,
    WaitingReady,
    Finished,
}

/// COPY FROM STDIN flow.
///
/// Phase one (constructor + step to Finished) enters the copy: the
/// server answers Query(sql) with CopyInResponse. The driver then sends
/// CopyData frames directly. Phase two (`finish` or `fail` + step to
/// Finished) closes the stream and drains to ReadyForQuery.
pub struct CopyInFlow {
    state: InState,
    response: Option<CopyInResponse>,
    error: Option<ServerError>,
    rows_affected: Option<u64>,
    transaction_status: Option<TransactionStatus>,
}

impl CopyInFlow {
    /// Create the flow and fill the write buffer with Query(sql).
    pub fn new(buffer_set: &mut BufferSet, sql: &str) -> Self {
        buffer_set.write_buffer.clear();
        write_query(&mut buffer_set.write_buffer, sql);
        Self {
            state: InState::Initial,
            response: None,
            error: None,
            rows_affected: None,
            transaction_status: None,
        }
    }

    /// The CopyInResponse, available once the entry phase finished.
    pub fn response(&self) -> Option<&CopyInResponse> {
        self.response.as_ref()
    }

    /// Whether the copy entered streaming (no error during entry).
    pub fn is_streaming(&self) -> bool {
        self.state == InState::Streaming
    }

    /// The server error latched during the exchange, if any.
    pub fn take_error(&mut self) -> Option<ServerError> {
        self.error.take()
    }

    /// Rows copied, reported by CommandComplete.
    pub fn rows_affected(&self) -> Option<u64> {
        self.rows_affected
    }

    /// End the stream successfully: CopyDone.
    pub fn finish(&mut self, buffer_set: &mut BufferSet) {
        buffer_set.write_buffer.clear();
        write_copy_done(&mut buffer_set.write_buffer);
        self.state = InState::WaitingComplete;
    }

    /// Abort the stream: CopyFail(message).
    pub fn fail(&mut self, buffer_set: &mut BufferSet, message: &str) {
        buffer_set.write_buffer.clear();
        write_copy_fail(&mut buffer_set.write_buffer, message);
        self.state = InState::WaitingComplete;
    }
}

impl StateMachine for CopyInFlow {
    fn step(&mut self, buffer_set: &mut BufferSet) -> Result<Action> {
        match self.state {
            InState::Initial => {
                self.state = InState::WaitingCopyIn;
                return Ok(Action::WriteAndReadMessage);
            }
            InState::WaitingComplete if !buffer_set.write_buffer.is_empty() => {
                // CopyDone/CopyFail queued by finish()/fail()
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
            self.state = InState::WaitingReady;
            return Ok(Action::ReadMessage);
        }

        match self.state {
            InState::WaitingCopyIn => match type_byte {
                msg_type::COPY_IN_RESPONSE => {
                    self.response = Some(CopyInResponse::parse(&buffer_set.read_buffer)?);
                    self.state = InState::Streaming;
                    Ok(Action::Finished)
                }
                other => Err(Error::Protocol(format!(
                    "expected CopyInResponse, got '{}'",
                    other as char
                ))),
            },
            InState::WaitingComplete => match type_byte {
                msg_type::COMMAND_COMPLETE => {
                    let complete = CommandComplete::parse(&buffer_set.read_buffer)?;
                    self.rows_affected = complete.rows_affected();
                    self.state = InState::WaitingReady;
                    Ok(Action::ReadMessage)
                }
                other => Err(Error::Protocol(format!(
                    "expected CommandComplete, got '{}'",
                    other as char
                ))),
            },
            InState::WaitingReady => match type_byte {
                msg_type::READY_FOR_QUERY => {
                    let ready = ReadyForQuery::parse(&buffer_set.read_buffer)?;
                    self.transaction_status = Some(ready.transaction_status().unwrap_or_default());
                    self.state = InState::Finished;
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

/// COPY TO STDOUT state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutState {
    Initial,
    WaitingCopyOut,
    Streaming,
    WaitingComplete,
    WaitingReady,
    Finished,
}

/// COPY TO STDOUT flow.
///
/// Streams each CopyData frame into the caller's sink until CopyDone,
/// then drains CommandComplete and ReadyForQuery.
pub struct CopyOutFlow<'a, S> {
    state: OutState,
    sink: &'a mut S,
    response: Option<CopyOutResponse>,
    error: Option<ServerError>,
    rows_affected: Option<u64>,
    transaction_status: Option<TransactionStatus>,
}

impl<'a, S: CopySink> CopyOutFlow<'a, S> {
    /// Create the flow and fill the write buffer with Query(sql).
    pub fn new(sink: &'a mut S, buffer_set: &mut BufferSet, sql: &str) -> Self {
        buffer_set.write_buffer.clear();
        write_query(&mut buffer_set.write_buffer, sql);
        Self {
            state: OutState::Initial,
            sink,
            response: None,
            error: None,
            rows_affected: None,
            transaction_status: None,
        }
    }

    /// The CopyOutResponse, once received.
    pub fn response(&self) -> Option<&CopyOutResponse> {
        self.response.as_ref()
    }

    /// The server error latched during the exchange, if any.
    pub fn take_error(&mut self) -> Option<ServerError> {
        self.error.take()
    }

    /// Rows copied, reported by CommandComplete.
    pub fn rows_affected(&self) -> Option<u64> {
        self.rows_affected
    }
}

impl<S: CopySink> StateMachine for CopyOutFlow<'_, S> {
    fn step(&mut self, buffer_set: &mut BufferSet) -> Result<Action> {
        if self.state == OutState::Initial {
            self.state = OutState::WaitingCopyOut;
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
            self.state = OutState::WaitingReady;
            return Ok(Action::ReadMessage);
        }

        match self.state {
            OutState::WaitingCopyOut => match type_byte {
                msg_type::COPY_OUT_RESPONSE => {
                    self.response = Some(CopyOutResponse::parse(&buffer_set.read_buffer)?);
                    self.state = OutState::Streaming;
                    Ok(Action::ReadMessage)
                }
                other => Err(Error::Protocol(format!(
                    "expected CopyOutResponse, got '{}'",
                    other as char
                ))),
            },
            OutState::Streaming => match type_byte {
                msg_type::COPY_DATA => {
                    self.sink.chunk(&buffer_set.read_buffer)?;
                    Ok(Action::ReadMessage)
                }
                msg_type::COPY_DONE => {
                    CopyDone::parse(&buffer_set.read_buffer)?;
                    self.state = OutState::WaitingComplete;
                    Ok(Action::ReadMessage)
                }
                other => Err(Error::Protocol(format!(
                    "unexpected message in COPY OUT stream: '{}'",
                    other as char
                ))),
            },
            OutState::WaitingComplete => match type_byte {
                msg_type::COMMAND_COMPLETE => {
                    let complete = CommandComplete::parse(&buffer_set.read_buffer)?;
                    self.rows_affected = complete.rows_affected();
                    self.state = OutState::WaitingReady;
                    Ok(Action::ReadMessage)
                }
                other => Err(Error::Protocol(format!(
                    "expected CommandComplete, got '{}'",
                    other as char
                ))),
            },
            OutState::WaitingReady => match type_byte {
                msg_type::READY_FOR_QUERY => {
                    let ready = ReadyForQuery::parse(&buffer_set.read_buffer)?;
                    self.transaction_status = Some(ready.transaction_status().unwrap_or_default());
                    self.state = OutState::Finished;
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

/// COPY BOTH (replication) state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BothState {
    Initial,
    WaitingCopyBoth,
    Streaming,
    Draining,
    WaitingReady,
    Finished,
}

/// COPY BOTH flow for streaming replication transports.
///
/// After entry, both directions are active: the driver reads CopyData
/// frames and may interleave its own (e.g. standby status updates).
/// Ending the session requires the client to send CopyDone and drain
/// the remaining server frames through ReadyForQuery.
pub struct CopyBothFlow {
    state: BothState,
    response: Option<CopyBothResponse>,
    error: Option<ServerError>,
    transaction_status: Option<TransactionStatus>,
}

impl CopyBothFlow {
    /// Create the flow and fill the write buffer with Query(sql).
    pub fn new(buffer_set: &mut BufferSet, sql: &str) -> Self {
        buffer_set.write_buffer.clear();
        write_query(&mut buffer_set.write_buffer, sql);
        Self {
            state: BothState::Initial,
            response: None,
            error: None,
            transaction_status: None,
        }
    }

    /// The CopyBothResponse, available once the entry phase finished.
    pub fn response(&self) -> Option<&CopyBothResponse> {
        self.response.as_ref()
    }

    /// Whether both directions are active.
    pub fn is_streaming(&self) -> bool {
        self.state == BothState::Streaming
    }

    /// The server error latched during the exchange, if any.
    pub fn take_error(&mut self) -> Option<ServerError> {
        self.error.take()
    }

    /// Begin ending the session: CopyDone.
    pub fn finish(&mut self, buffer_set: &mut BufferSet) {
        buffer_set.write_buffer.clear();
        write_copy_done(&mut buffer_set.write_buffer);
        self.state = BothState::Draining;
    }
}

impl StateMachine for CopyBothFlow {
    fn step(&mut self, buffer_set: &mut BufferSet) -> Result<Action> {
        match self.state {
            BothState::Initial => {
                self.state = BothState::WaitingCopyBoth;
                return Ok(Action::WriteAndReadMessage);
            }
            BothState::Draining if !buffer_set.write_buffer.is_empty() => {
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
            self.state = BothState::WaitingReady;
            return Ok(Action::ReadMessage);
        }

        match self.state {
            BothState::WaitingCopyBoth => match type_byte {
                msg_type::COPY_BOTH_RESPONSE => {
                    self.response = Some(CopyBothResponse::parse(&buffer_set.read_buffer)?);
                    self.state = BothState::Streaming;
                    Ok(Action::Finished)
                }
                other => Err(Error::Protocol(format!(
                    "expected CopyBothResponse, got '{}'",
                    other as char
                ))),
            },
            BothState::Draining => match type_byte {
                // Remaining server frames are discarded during shutdown
                msg_type::COPY_DATA | msg_type::COPY_DONE => Ok(Action::ReadMessage),
                msg_type::COMMAND_COMPLETE => Ok(Action::ReadMessage),
                msg_type::READY_FOR_QUERY => {
                    let ready = ReadyForQuery::parse(&buffer_set.read_buffer)?;
                    self.transaction_status = Some(ready.transaction_status().unwrap_or_default());
                    self.state = BothState::Finished;
                    Ok(Action::Finished)
                }
                other => Err(Error::Protocol(format!(
                    "unexpected message draining COPY BOTH: '{}'",
                    other as char
                ))),
            },
            BothState::WaitingReady => match type_byte {
                msg_type::READY_FOR_QUERY => {
                    let ready = ReadyForQuery::parse(&buffer_set.read_buffer)?;
                    self.transaction_status = Some(ready.transaction_status().unwrap_or_default());
                    self.state = BothState::Finished;
                    Ok(Action::Finished)
                }
                // Discard whatever else the server sent before its error
                _ => Ok(Action::ReadMessage),
            },
            _ => Err(Error::Protocol(format!("unexpected state {:?}", self.state))),
        }
    }

    fn transaction_status(&self) -> Option<TransactionStatus> {
        self.transaction_status
    }
}
