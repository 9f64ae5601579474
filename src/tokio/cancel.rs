//! Out-of-band query cancellation for the async driver.

use crate::config::Config;
use crate::error::Result;
use crate::protocol::frontend::write_cancel_request;

use super::stream::Stream;

/// Handle for cancelling a query running on another connection.
///
/// Opens a short-lived secondary connection to the same endpoint and
/// sends CancelRequest; the cancelled query fails with SQLSTATE 57014
/// on the main connection, surfaced as a cancellation error after the
/// drain to ReadyForQuery.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    config: Config,
    pid: u32,
    secret_key: u32,
}

impl CancelHandle {
    pub(crate) fn new(config: &Config, pid: u32, secret_key: u32) -> Self {
        let config = Config {
            host: config.host.clone(),
            port: config.port,
            socket: config.socket.clone(),
            connect_timeout: config.connect_timeout,
            ..Config::default()
        };
        Self {
            config,
            pid,
            secret_key,
        }
    }

    /// Backend process id this handle targets.
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Fire the cancel request.
    pub async fn cancel(&self) -> Result<()> {
        let mut stream = Stream::connect(&self.config).await?;
        let mut request = Vec::with_capacity(16);
        write_cancel_request(&mut request, self.pid, self.secret_key);
        stream.write_all(&request, self.config.write_timeout).await?;
        tracing::debug!(pid = self.pid, "sent cancel request");
        Ok(())
    }
}
