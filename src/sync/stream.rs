//! Blocking transport: TCP, Unix socket, optional TLS.

use std::io::{Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::os::unix::net::UnixStream;
use std::time::Duration;

use crate::buffer_set::BufferSet;
use crate::config::Config;
use crate::error::{Error, Result};

/// Blocking byte stream to the server.
pub enum Stream {
    /// Plain TCP
    Tcp(TcpStream),
    /// Unix-domain socket
    Unix(UnixStream),
    /// TLS over TCP
    #[cfg(feature = "sync-tls")]
    Tls(Box<native_tls::TlsStream<TcpStream>>),
}

impl Stream {
    /// Dial the endpoint described by the configuration.
    ///
    /// A Unix socket path wins over host/port. TCP gets nodelay and,
    /// when configured, keepalive.
    pub fn connect(config: &Config) -> Result<Self> {
        if let Some(path) = &config.socket {
            let stream = UnixStream::connect(path)?;
            return Ok(Stream::Unix(stream));
        }

        if config.host.is_empty() {
            return Err(Error::InvalidUsage("no host or socket configured".into()));
        }

        let addrs: Vec<_> = (config.host.as_str(), config.port)
            .to_socket_addrs()?
            .collect();
        if addrs.is_empty() {
            return Err(Error::InvalidUsage(format!(
                "host resolves to no addresses: {}",
                config.host
            )));
        }

        let mut last_error = None;
        for addr in addrs {
            let attempt = match config.connect_timeout {
                Some(timeout) => TcpStream::connect_timeout(&addr, timeout),
                None => TcpStream::connect(addr),
            };
            match attempt {
                Ok(stream) => {
                    stream.set_nodelay(true)?;
                    if config.tcp_keepalive {
                        let sock = socket2::SockRef::from(&stream);
                        sock.set_keepalive(true)?;
                    }
                    return Ok(Stream::Tcp(stream));
                }
                Err(e) => last_error = Some(e),
            }
        }
        Err(last_error
            .map(Error::Io)
            .unwrap_or_else(|| Error::InvalidUsage("connect failed".into())))
    }

    /// Apply the configured read/write deadlines to the socket.
    pub fn apply_timeouts(&self, config: &Config) -> Result<()> {
        self.set_read_timeout(config.read_timeout)?;
        match self {
            Stream::Tcp(s) => s.set_write_timeout(config.write_timeout)?,
            Stream::Unix(s) => s.set_write_timeout(config.write_timeout)?,
            #[cfg(feature = "sync-tls")]
            Stream::Tls(s) => s.get_ref().set_write_timeout(config.write_timeout)?,
        }
        Ok(())
    }

    /// Set (or clear) the read deadline.
    pub fn set_read_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        match self {
            Stream::Tcp(s) => s.set_read_timeout(timeout)?,
            Stream::Unix(s) => s.set_read_timeout(timeout)?,
            #[cfg(feature = "sync-tls")]
            Stream::Tls(s) => s.get_ref().set_read_timeout(timeout)?,
        }
        Ok(())
    }

    fn read_exact(&mut self, buf: &mut [u8]) -> std::io::Result<()> {
        match self {
            Stream::Tcp(s) => s.read_exact(buf),
            Stream::Unix(s) => s.read_exact(buf),
            #[cfg(feature = "sync-tls")]
            Stream::Tls(s) => s.read_exact(buf),
        }
    }

    /// Write and flush the whole buffer.
    pub fn write_all(&mut self, buf: &[u8]) -> Result<()> {
        let result = match self {
            Stream::Tcp(s) => s.write_all(buf).and_then(|()| s.flush()),
            Stream::Unix(s) => s.write_all(buf).and_then(|()| s.flush()),
            #[cfg(feature = "sync-tls")]
            Stream::Tls(s) => s.write_all(buf).and_then(|()| s.flush()),
        };
        result.map_err(map_io_error)
    }

    /// Read a single byte (the SSLRequest response).
    pub fn read_u8(&mut self) -> Result<u8> {
        let mut byte = [0u8; 1];
        self.read_exact(&mut byte).map_err(map_io_error)?;
        Ok(byte[0])
    }

    /// Read one backend message into the buffer set.
    ///
    /// The frame is `u8 type || i32 length(incl. itself) || payload`.
    /// Lengths outside `4..=max_message_size` are fatal protocol errors.
    pub fn read_message(&mut self, buffer_set: &mut BufferSet, max_message_size: usize) -> Result<()> {
        let type_byte = self.read_u8()?;
        self.finish_message(type_byte, buffer_set, max_message_size)
    }

    /// Read the rest of a message whose type byte was already consumed.
    ///
    /// Lets an idle wait apply a deadline to the one-byte type read -
    /// which cannot leave a partial frame behind - and then read the
    /// remainder without racing the deadline.
    pub fn finish_message(
        &mut self,
        type_byte: u8,
        buffer_set: &mut BufferSet,
        max_message_size: usize,
    ) -> Result<()> {
        buffer_set.type_byte = type_byte;

        let mut length = [0u8; 4];
        self.read_exact(&mut length).map_err(map_io_error)?;
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
        self.read_exact(&mut buffer_set.read_buffer)
            .map_err(map_io_error)?;
        Ok(())
    }

    /// Whether a TLS handshake can be performed on this stream.
    pub fn supports_tls() -> bool {
        cfg!(feature = "sync-tls")
    }

    /// Upgrade the TCP stream to TLS after an accepted SSLRequest.
    #[cfg(feature = "sync-tls")]
    pub fn upgrade_to_tls(self, config: &Config) -> Result<Self> {
        let Stream::Tcp(tcp) = self else {
            return Err(Error::InvalidUsage("TLS requires a TCP transport".into()));
        };

        let connector = crate::tls::build_tls_connector(config)?;
        let stream = connector
            .connect(&config.host, tcp)
            .map_err(|e| match e {
                native_tls::HandshakeError::Failure(e) => Error::Tls(e),
                native_tls::HandshakeError::WouldBlock(_) => {
                    Error::Protocol("unexpected WouldBlock during TLS handshake".into())
                }
            })?;
        Ok(Stream::Tls(Box::new(stream)))
    }

    /// tls-server-end-point binding data, for SCRAM channel binding.
    pub fn certificate_hash(&self) -> Option<Vec<u8>> {
        #[cfg(feature = "sync-tls")]
        if let Stream::Tls(stream) = self {
            return stream.tls_server_end_point().ok().flatten();
        }
        None
    }
}

/// Map transport errors, turning deadline expiry into [`Error::Timeout`].
pub fn map_io_error(e: std::io::Error) -> Error {
    match e.kind() {
        std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut => Error::Timeout,
        _ => Error::Io(e),
    }
}
