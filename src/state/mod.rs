//! Sans-I/O state machines for the PostgreSQL protocol.
//!
//! These state machines hold the protocol logic without performing any
//! I/O. They produce [`Action`] values that tell the driver what to do
//! next; the sync and tokio drivers share them.

pub mod action;
pub mod batch;
pub mod copy;
pub mod extended;
pub mod function;
pub mod portal;
pub mod simple;
pub mod startup;

pub use action::{Action, AsyncMessage, Notification};
pub use batch::{BatchFlow, BatchOutcome};
pub use copy::{CopyBothFlow, CopyInFlow, CopyOutFlow};
pub use extended::ExtendedQueryFlow;
pub use function::FunctionCallFlow;
pub use portal::PortalFlow;
pub use simple::SimpleQueryFlow;
pub use startup::StartupFlow;

use crate::buffer_set::BufferSet;
use crate::error::Result;
use crate::protocol::backend::auth::{NotificationResponse, ParameterStatus};
use crate::protocol::backend::error::NoticeResponse;
use crate::protocol::backend::msg_type;
use crate::protocol::types::TransactionStatus;

/// Trait for state machines driven by a connection.
///
/// The driver:
/// 1. calls `step()` to get the next action
/// 2. performs the action (read/write/TLS handshake/async dispatch)
/// 3. repeats until `Action::Finished`
pub trait StateMachine {
    /// Process input and return the next action to perform.
    fn step(&mut self, buffer_set: &mut BufferSet) -> Result<Action>;

    /// Transaction status from the final ReadyForQuery.
    fn transaction_status(&self) -> Option<TransactionStatus>;
}

/// Parse an async message payload into an [`AsyncMessage`].
///
/// Shared by every flow; callers have already checked
/// `RawMessage::is_async_type`.
pub(crate) fn parse_async_message(type_byte: u8, payload: &[u8]) -> Result<AsyncMessage> {
    match type_byte {
        msg_type::NOTICE_RESPONSE => {
            let notice = NoticeResponse::parse(payload)?;
            Ok(AsyncMessage::Notice(notice.0))
        }
        msg_type::PARAMETER_STATUS => {
            let param = ParameterStatus::parse(payload)?;
            Ok(AsyncMessage::ParameterChanged {
                name: param.name.to_string(),
                value: param.value.to_string(),
            })
        }
        msg_type::NOTIFICATION_RESPONSE => {
            let notification = NotificationResponse::parse(payload)?;
            Ok(AsyncMessage::Notification(action::Notification {
                pid: notification.pid,
                channel: notification.channel.to_string(),
                payload: notification.payload.to_string(),
            }))
        }
        other => Err(crate::error::Error::Protocol(format!(
            "not an async message type: '{}'",
            other as char
        ))),
    }
}
