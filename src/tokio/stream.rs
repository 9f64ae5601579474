//! Async transport: TCP, Unix socket, optional TLS.

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, UnixStream};

use crate::buffer_set::BufferSet;
use crate::config::Config;
use crate::error::{Error, Result};

/// Async byte stream to the server.
pub enum Stream {
    /// Plain TCP
    Tcp(TcpStream),
    /// Unix-domain socket
    Unix(UnixStream),
    /// TLS over TCP
    #[cfg(feature = "tokio-tls")]
    Tls(Box<tokio_native_tls::TlsStream<TcpStream>>),
}

/// Run a future against an optional deadline, mapping expiry to
/// [`Error::Timeout`].
async fn with_deadline<T>(
    timeout: Option<Duration>,
    fut: impl Future<Output = std::io::Result<T>>,
) -> Result<T> {
    match timeout {
        None => fut.await.map_err(Error::Io),
        Some(duration) => match tokio::time::timeout(duration, fut).await {
            Ok(result) => result.map_err(Error::Io),
            Err(_) => Err(Error::Timeout),
        },
    }
}

impl Stream {
    /// Dial the endpoint described by the configuration.
    pub async fn connect(config: &Config) -> Result<Self> {
        if let Some(path) = &config.socket {
            let connect = UnixStream::connect(path);
            let stream = match config.connect_timeout {
                None => connect.await?,
                Some(duration) => tokio::time::timeout(duration, connect)
                    .await
                    .map_err(|_| Error::Timeout)??,
            };
            return Ok(Stream::Unix(stream));
        }

        if config.host.is_empty() {
            return Err(Error::InvalidUsage("no host or socket configured".into()));
        }

        let connect = TcpStream::connect((config.host.as_str(), config.port));
        let stream = match config.connect_timeout {
            None => connect.await?,
            Some(duration) => tokio::time::timeout(duration, connect)
                .await
                .map_err(|_| Error::Timeout)??,
        };
        stream.set_nodelay(true)?;
        if config.tcp_keepalive {
            let sock = socket2::SockRef::from(&stream);
            sock.set_keepalive(true)?;
        }
        Ok(Stream::Tcp(stream))
    }

    /// Write and flush the whole buffer.
    pub async fn write_all(&mut self, buf: &[u8], timeout: Option<Duration>) -> Result<()> {
        match self {
            Stream::Tcp(s) => {
                with_deadline(timeout, async {
                    s.write_all(buf).await?;
                    s.flush().await
                })
                .await
            }
            Stream::Unix(s) => {
                with_deadline(timeout, async {
                    s.write_all(buf).await?;
                    s.flush().await
                })
                .await
            }
            #[cfg(feature = "tokio-tls")]
            Stream::Tls(s) => {
                with_deadline(timeout, async {
                    s.write_all(buf).await?;
                    s.flush().await
                })
                .await
            }
        }
    }

    async fn read_exact(&mut self, buf: &mut [u8], timeout: Option<Duration>) -> Result<()> {
        match self {
            Stream::Tcp(s) => with_deadline(timeout, async {
                s.read_exact(buf).await.map(|_| ())
            })
            .await,
            Stream::Unix(s) => with_deadline(timeout, async {
                s.read_exact(buf).await.map(|_| ())
            })
            .await,
            #[cfg(feature = "tokio-tls")]
            Stream::Tls(s) => with_deadline(timeout, async {
                s.read_exact(buf).await.map(|_| ())
            })
            .await,
        }
    }

    /// Read a single byte (the SSLRequest response).
    pub async fn read_u8(&mut self, timeout: Option<Duration>) -> Result<u8> {
        let mut byte = [0u8; 1];
        self.read_exact(&mut byte, timeout).await?;
        Ok(byte[0])
    }

    /// Read one backend message into the buffer set.
    pub async fn read_message(
        &mut self,
        buffer_set: &mut BufferSet,
        max_message_size: usize,
        timeout: Option<Duration>,
    ) -> Result<()> {
        let type_byte = self.read_u8(timeout).await?;
        self.finish_message(type_byte, buffer_set, max_message_size, timeout)
            .await
    }

    /// Read the rest of a message whose type byte was already consumed.
    ///
    /// An idle wait applies its deadline to the one-byte type read (a
    /// cancelled one-byte read consumes nothing) and then reads the
    /// remainder with the normal socket timeout.
    pub async fn finish_message(
        &mut self,
        type_byte: u8,
        buffer_set: &mut BufferSet,
        max_message_size: usize,
        timeout: Option<Duration>,
    ) -> Result<()> {
        buffer_set.type_byte = type_byte;

        let mut length = [0u8; 4];
        self.read_exact(&mut length, timeout).await?;
        let length = i32::from_be_bytes(length);
        if length < 4 {
            return Err(Error::Protocol(format!("invalid message length: {length}")));
        }
        let payload_len = length as usize - 4;
        if payload_len > max_message_size {
            return Err(Error::Protocol(format!(
                "message of {payload_len} bytes exceeds the {max_message_size} byte limit"
            )));
        }

        buffer_set.read_buffer.clear();
        buffer_set.read_buffer.resize(payload_len, 0);
        self.read_exact(&mut buffer_set.read_buffer, timeout).await?;
        Ok(())
    }

    /// Whether a TLS handshake can be performed on this stream.
    pub fn supports_tls() -> bool {
        cfg!(feature = "tokio-tls")
    }

    /// Upgrade the TCP stream to TLS after an accepted SSLRequest.
    #[cfg(feature = "tokio-tls")]
    pub async fn upgrade_to_tls(self, config: &Config) -> Result<Self> {
        let Stream::Tcp(tcp) = self else {
            return Err(Error::InvalidUsage("TLS requires a TCP transport".into()));
        };

        let connector = crate::tls::build_tls_connector(config)?;
        let connector = tokio_native_tls::TlsConnector::from(connector);
        let stream = connector
            .connect(&config.host, tcp)
            .await
            .map_err(Error::Tls)?;
        Ok(Stream::Tls(Box::new(stream)))
    }

    /// tls-server-end-point binding data, for SCRAM channel binding.
    pub fn certificate_hash(&self) -> Option<Vec<u8>> {
        #[cfg(feature = "tokio-tls")]
        if let Stream::Tls(stream) = self {
            return stream
                .get_ref()
                .tls_server_end_point()
                .ok()
                .flatten();
        }
        None
    }
}
