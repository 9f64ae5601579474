//! Action types for state machine I/O requests.

use crate::error::ServerError;

/// Action requested by a state machine.
///
/// The driver performs the requested I/O against the transport and then
/// calls `step()` again.
#[derive(Debug)]
pub enum Action {
    /// Write `buffer_set.write_buffer` to the server, then step again.
    Write,

    /// Write `buffer_set.write_buffer`, then read a single byte and hand
    /// it to the machine. Used for SSL negotiation ('S' or 'N').
    WriteAndReadByte,

    /// Read one message into `buffer_set`, then step again.
    ReadMessage,

    /// Write `buffer_set.write_buffer`, then read one message.
    WriteAndReadMessage,

    /// Upgrade the transport via a TLS handshake, then step again.
    TlsHandshake,

    /// An asynchronous message was received. Handle it, read the next
    /// message, then step again.
    HandleAsync(AsyncMessage),

    /// The state machine has finished successfully.
    Finished,
}

/// An asynchronous notification delivered by LISTEN/NOTIFY.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    /// PID of the notifying backend process
    pub pid: u32,
    /// Channel name
    pub channel: String,
    /// Notification payload
    pub payload: String,
}

/// Asynchronous message from the server.
///
/// These can arrive between any two messages of a response stream and
/// do not affect the logical result sequence.
#[derive(Debug, Clone)]
pub enum AsyncMessage {
    /// Notification from LISTEN/NOTIFY.
    Notification(Notification),

    /// Non-fatal notice/warning from the server.
    Notice(ServerError),

    /// Server parameter value changed.
    ParameterChanged {
        /// Parameter name
        name: String,
        /// New value
        value: String,
    },
}
