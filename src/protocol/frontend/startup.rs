//! Startup-phase and termination messages.
//!
//! Startup-phase messages carry no type byte; the server recognizes them
//! by a fixed protocol-version or request-code integer after the length.

use crate::error::{Error, Result};
use crate::protocol::codec::{MessageBuilder, read_cstr, read_i32, read_u32};

/// Protocol version 3.0 (0x00030000)
pub const PROTOCOL_VERSION: i32 = 196608;

/// SSL request code
pub const SSL_REQUEST_CODE: i32 = 80877103;

/// Cancel request code
pub const CANCEL_REQUEST_CODE: i32 = 80877102;

/// GSSAPI encryption request code
pub const GSSENC_REQUEST_CODE: i32 = 80877104;

/// Write an SSLRequest message.
///
/// Sent before StartupMessage to request TLS. The server responds with a
/// single byte: 'S' (accepted) or 'N' (rejected).
pub fn write_ssl_request(buf: &mut Vec<u8>) {
    let mut msg = MessageBuilder::new_startup(buf);
    msg.write_i32(SSL_REQUEST_CODE);
    msg.finish();
}

/// Write a GSSENCRequest message.
///
/// Sent before StartupMessage to request GSSAPI encryption. The server
/// responds with a single byte: 'G' (accepted) or 'N' (rejected).
pub fn write_gssenc_request(buf: &mut Vec<u8>) {
    let mut msg = MessageBuilder::new_startup(buf);
    msg.write_i32(GSSENC_REQUEST_CODE);
    msg.finish();
}

/// Write a StartupMessage.
///
/// Parameters is a list of (name, value) pairs. "user" is required;
/// "database", "application_name", "client_encoding", "options" etc.
/// are optional.
pub fn write_startup(buf: &mut Vec<u8>, params: &[(&str, &str)]) {
    let mut msg = MessageBuilder::new_startup(buf);
    msg.write_i32(PROTOCOL_VERSION);

    for (name, value) in params {
        msg.write_cstr(name);
        msg.write_cstr(value);
    }

    msg.write_u8(0);
    msg.finish();
}

/// Write a CancelRequest message.
///
/// Sent on a NEW connection to cancel a query running on another
/// connection. The server closes the connection with no response.
pub fn write_cancel_request(buf: &mut Vec<u8>, pid: u32, secret_key: u32) {
    let mut msg = MessageBuilder::new_startup(buf);
    msg.write_i32(CANCEL_REQUEST_CODE);
    msg.write_i32(pid as i32);
    msg.write_i32(secret_key as i32);
    msg.finish();
}

/// Write a Terminate message for a clean close.
pub fn write_terminate(buf: &mut Vec<u8>) {
    let msg = MessageBuilder::new(buf, super::msg_type::TERMINATE);
    msg.finish();
}

/// A parsed startup-phase request.
///
/// Used by tests and by anything that needs to recognize the tagless
/// startup messages on the read side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartupRequest {
    /// StartupMessage with protocol version and parameter map
    Startup { params: Vec<(String, String)> },
    /// SSLRequest
    Ssl,
    /// GSSENCRequest
    GssEnc,
    /// CancelRequest
    Cancel { pid: u32, secret_key: u32 },
}

impl StartupRequest {
    /// Parse the body of a startup-phase message (after the length field).
    pub fn parse(body: &[u8]) -> Result<Self> {
        let (code, rest) = read_i32(body)?;
        match code {
            PROTOCOL_VERSION => {
                let mut params = Vec::new();
                let mut data = rest;
                while !data.is_empty() && data[0] != 0 {
                    let (name, remaining) = read_cstr(data)?;
                    let (value, remaining) = read_cstr(remaining)?;
                    params.push((name.to_string(), value.to_string()));
                    data = remaining;
                }
                Ok(StartupRequest::Startup { params })
            }
            SSL_REQUEST_CODE => Ok(StartupRequest::Ssl),
            GSSENC_REQUEST_CODE => Ok(StartupRequest::GssEnc),
            CANCEL_REQUEST_CODE => {
                let (pid, rest) = read_u32(rest)?;
                let (secret_key, _) = read_u32(rest)?;
                Ok(StartupRequest::Cancel { pid, secret_key })
            }
            _ => Err(Error::Protocol(format!("unknown startup request code: {code}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ssl_request() {
        let mut buf = Vec::new();
        write_ssl_request(&mut buf);

        assert_eq!(buf.len(), 8);
        assert_eq!(&buf[0..4], &8_i32.to_be_bytes());
        assert_eq!(&buf[4..8], &SSL_REQUEST_CODE.to_be_bytes());
        assert_eq!(StartupRequest::parse(&buf[4..]).unwrap(), StartupRequest::Ssl);
    }

    #[test]
    fn startup_round_trip() {
        let mut buf = Vec::new();
        write_startup(&mut buf, &[("user", "postgres"), ("database", "test")]);

        let len = i32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]);
        assert_eq!(len as usize, buf.len());

        match StartupRequest::parse(&buf[4..]).unwrap() {
            StartupRequest::Startup { params } => {
                assert_eq!(
                    params,
                    vec![
                        ("user".to_string(), "postgres".to_string()),
                        ("database".to_string(), "test".to_string()),
                    ]
                );
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn cancel_request_round_trip() {
        let mut buf = Vec::new();
        write_cancel_request(&mut buf, 4242, 0xfeed_face);
        assert_eq!(buf.len(), 16);
        assert_eq!(
            StartupRequest::parse(&buf[4..]).unwrap(),
            StartupRequest::Cancel {
                pid: 4242,
                secret_key: 0xfeed_face
            }
        );
    }

    #[test]
    fn terminate() {
        let mut buf = Vec::new();
        write_terminate(&mut buf);

        assert_eq!(buf.len(), 5);
        assert_eq!(buf[0], b'X');
        assert_eq!(&buf[1..5], &4_i32.to_be_bytes());
    }
}
