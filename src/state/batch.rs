//! Batch state machine: several extended pipelines, one trailing Sync.
//!
//! The driver queues `[Parse] Bind Execute` groups for each statement
//! and ends the batch with a single Sync. Responses arrive in queue
//! order. After an ErrorResponse the server discards the remaining
//! pipelines until the Sync, so later statements are reported as
//! skipped.

use crate::buffer_set::BufferSet;
use crate::error::{Error, Result, ServerError};
use crate::protocol::backend::{
    BindComplete, CommandComplete, EmptyQueryResponse, ErrorResponse, NoData, ParseComplete,
    RawMessage, ReadyForQuery, RowDescription, msg_type,
};
use crate::protocol::types::TransactionStatus;

use super::action::Action;
use super::{StateMachine, parse_async_message};

/// Per-statement outcome of a batch.
#[derive(Debug, Clone, PartialEq)]
pub enum BatchOutcome {
    /// The statement completed; carries rows affected when reported.
    Completed(Option<u64>),
    /// The statement failed with a server error.
    Failed(ServerError),
    /// The statement was discarded because an earlier one failed.
    Skipped,
}

/// Batch state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Initial,
    Processing,
    Finished,
}

/// Batch protocol flow.
///
/// Rows produced by batch statements are discarded; the batch interface
/// reports completion status and affected counts per statement.
pub struct BatchFlow {
    state: State,
    queued: usize,
    outcomes: Vec<BatchOutcome>,
    transaction_status: Option<TransactionStatus>,
}

impl BatchFlow {
    /// Create a flow for a batch of `queued` statements. The driver has
    /// already filled the write buffer with the pipelines and Sync.
    pub fn new(queued: usize) -> Self {
        Self {
            state: State::Initial,
            queued,
            outcomes: Vec::with_capacity(queued),
            transaction_status: None,
        }
    }

    /// Take the per-statement outcomes, in queue order.
    pub fn take_outcomes(&mut self) -> Vec<BatchOutcome> {
        std::mem::take(&mut self.outcomes)
    }

    /// The first error in the batch, if any statement failed.
    pub fn first_error(&self) -> Option<&ServerError> {
        self.outcomes.iter().find_map(|outcome| match outcome {
            BatchOutcome::Failed(error) => Some(error),
            _ => None,
        })
    }

    fn failed(&self) -> bool {
        self.outcomes
            .iter()
            .any(|o| matches!(o, BatchOutcome::Failed(_)))
    }
}

impl StateMachine for BatchFlow {
    fn step(&mut self, buffer_set: &mut BufferSet) -> Result<Action> {
        if self.state == State::Initial {
            self.state = State::Processing;
            return Ok(Action::WriteAndReadMessage);
        }

        let type_byte = buffer_set.type_byte;

        if RawMessage::is_async_type(type_byte) {
            let msg = parse_async_message(type_byte, &buffer_set.read_buffer)?;
            return Ok(Action::HandleAsync(msg));
        }

        if type_byte == msg_type::ERROR_RESPONSE {
            let error = ErrorResponse::parse(&buffer_set.read_buffer)?.0;
            if !self.failed() {
                self.outcomes.push(BatchOutcome::Failed(error));
            }
            return Ok(Action::ReadMessage);
        }

        match type_byte {
            msg_type::PARSE_COMPLETE => {
                ParseComplete::parse(&buffer_set.read_buffer)?;
                Ok(Action::ReadMessage)
            }
            msg_type::BIND_COMPLETE => {
                BindComplete::parse(&buffer_set.read_buffer)?;
                Ok(Action::ReadMessage)
            }
            msg_type::NO_DATA => {
                NoData::parse(&buffer_set.read_buffer)?;
                Ok(Action::ReadMessage)
            }
            msg_type::ROW_DESCRIPTION => {
                RowDescription::parse(&buffer_set.read_buffer)?;
                Ok(Action::ReadMessage)
            }
            msg_type::DATA_ROW => Ok(Action::ReadMessage),
            msg_type::COMMAND_COMPLETE => {
                let complete = CommandComplete::parse(&buffer_set.read_buffer)?;
                self.outcomes
                    .push(BatchOutcome::Completed(complete.rows_affected()));
                Ok(Action::ReadMessage)
            }
            msg_type::EMPTY_QUERY_RESPONSE => {
                EmptyQueryResponse::parse(&buffer_set.read_buffer)?;
                self.outcomes.push(BatchOutcome::Completed(None));
                Ok(Action::ReadMessage)
            }
            msg_type::READY_FOR_QUERY => {
                let ready = ReadyForQuery::parse(&buffer_set.read_buffer)?;
                self.transaction_status = Some(ready.transaction_status().unwrap_or_default());
                // Statements after a failure never produced responses
                while self.outcomes.len() < self.queued {
                    self.outcomes.push(BatchOutcome::Skipped);
                }
                self.state = State::Finished;
                Ok(Action::Finished)
            }
            other => Err(Error::Protocol(format!(
                "unexpected message in batch: '{}'",
                other as char
            ))),
        }
    }

    fn transaction_status(&self) -> Option<TransactionStatus> {
        self.transaction_status
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(flow: &mut BatchFlow, set: &mut BufferSet, type_byte: u8, payload: &[u8]) -> Action {
        set.type_byte = type_byte;
        set.read_buffer.clear();
        set.read_buffer.extend_from_slice(payload);
        flow.step(set).unwrap()
    }

    #[test]
    fn error_mid_batch_skips_remainder() {
        let mut flow = BatchFlow::new(3);
        let mut set = BufferSet::new();
        assert!(matches!(flow.step(&mut set).unwrap(), Action::WriteAndReadMessage));

        // First INSERT succeeds
        feed(&mut flow, &mut set, b'1', b"");
        feed(&mut flow, &mut set, b'2', b"");
        feed(&mut flow, &mut set, b'n', b"");
        feed(&mut flow, &mut set, b'C', b"INSERT 0 1\0");

        // Second INSERT violates NOT NULL
        feed(&mut flow, &mut set, b'1', b"");
        feed(&mut flow, &mut set, b'2', b"");
        feed(
            &mut flow,
            &mut set,
            b'E',
            b"SERROR\0VERROR\0C23502\0Mnull value in column\0\0",
        );

        // Server discards the third statement, then Sync's ReadyForQuery
        assert!(matches!(feed(&mut flow, &mut set, b'Z', b"I"), Action::Finished));

        let outcomes = flow.take_outcomes();
        assert_eq!(outcomes.len(), 3);
        assert_eq!(outcomes[0], BatchOutcome::Completed(Some(1)));
        assert!(matches!(&outcomes[1], BatchOutcome::Failed(e) if e.code() == "23502"));
        assert_eq!(outcomes[2], BatchOutcome::Skipped);
        assert_eq!(flow.transaction_status(), Some(TransactionStatus::Idle));
    }

    #[test]
    fn all_statements_complete() {
        let mut flow = BatchFlow::new(2);
        let mut set = BufferSet::new();
        flow.step(&mut set).unwrap();

        for _ in 0..2 {
            feed(&mut flow, &mut set, b'1', b"");
            feed(&mut flow, &mut set, b'2', b"");
            feed(&mut flow, &mut set, b'n', b"");
            feed(&mut flow, &mut set, b'C', b"INSERT 0 1\0");
        }
        assert!(matches!(feed(&mut flow, &mut set, b'Z', b"T"), Action::Finished));

        let outcomes = flow.take_outcomes();
        assert_eq!(
            outcomes,
            vec![
                BatchOutcome::Completed(Some(1)),
                BatchOutcome::Completed(Some(1))
            ]
        );
    }
}
