//! Startup and authentication backend messages.

use zerocopy::{FromBytes, Immutable, KnownLayout};

use crate::error::{Error, Result};
use crate::protocol::codec::{read_cstr, read_i32, read_u32};
use crate::protocol::types::{TransactionStatus, U32BE};

/// Authentication method constants.
pub mod auth_type {
    pub const OK: i32 = 0;
    pub const KERBEROS_V5: i32 = 2;
    pub const CLEARTEXT_PASSWORD: i32 = 3;
    pub const MD5_PASSWORD: i32 = 5;
    pub const GSS: i32 = 7;
    pub const GSS_CONTINUE: i32 = 8;
    pub const SSPI: i32 = 9;
    pub const SASL: i32 = 10;
    pub const SASL_CONTINUE: i32 = 11;
    pub const SASL_FINAL: i32 = 12;
}

/// Authentication message from the server.
#[derive(Debug)]
pub enum AuthenticationMessage<'a> {
    /// Authentication successful
    Ok,
    /// Kerberos V5 authentication required
    KerberosV5,
    /// Cleartext password required
    CleartextPassword,
    /// MD5 password required (with 4-byte salt)
    Md5Password { salt: [u8; 4] },
    /// GSS authentication
    Gss,
    /// GSS continue (with additional data)
    GssContinue { data: &'a [u8] },
    /// SSPI authentication
    Sspi,
    /// SASL authentication required (with list of mechanisms)
    Sasl { mechanisms: Vec<&'a str> },
    /// SASL continue (with server-first-message)
    SaslContinue { data: &'a [u8] },
    /// SASL final (with server-final-message)
    SaslFinal { data: &'a [u8] },
}

impl<'a> AuthenticationMessage<'a> {
    /// Parse an Authentication message from payload bytes.
    ///
    /// The leading i32 selects the method; only MD5 and the SASL family
    /// carry a body beyond it.
    pub fn parse(payload: &'a [u8]) -> Result<Self> {
        let (code, body) = read_i32(payload)?;

        if let Some(message) = Self::from_bare_code(code) {
            return Ok(message);
        }

        match code {
            auth_type::MD5_PASSWORD => Ok(AuthenticationMessage::Md5Password {
                salt: md5_salt(body)?,
            }),
            auth_type::GSS_CONTINUE => Ok(AuthenticationMessage::GssContinue { data: body }),
            auth_type::SASL => Ok(AuthenticationMessage::Sasl {
                mechanisms: sasl_mechanism_list(body)?,
            }),
            auth_type::SASL_CONTINUE => Ok(AuthenticationMessage::SaslContinue { data: body }),
            auth_type::SASL_FINAL => Ok(AuthenticationMessage::SaslFinal { data: body }),
            other => Err(Error::Protocol(format!(
                "authentication request {other} is not part of protocol 3.0"
            ))),
        }
    }

    /// Methods whose message is just the code, with no body.
    fn from_bare_code(code: i32) -> Option<Self> {
        Some(match code {
            auth_type::OK => AuthenticationMessage::Ok,
            auth_type::KERBEROS_V5 => AuthenticationMessage::KerberosV5,
            auth_type::CLEARTEXT_PASSWORD => AuthenticationMessage::CleartextPassword,
            auth_type::GSS => AuthenticationMessage::Gss,
            auth_type::SSPI => AuthenticationMessage::Sspi,
            _ => return None,
        })
    }
}

/// The 4-byte salt carried by AuthenticationMD5Password.
fn md5_salt(body: &[u8]) -> Result<[u8; 4]> {
    body.first_chunk::<4>().copied().ok_or_else(|| {
        Error::Protocol(format!(
            "AuthenticationMD5Password carries a 4-byte salt, got {} bytes",
            body.len()
        ))
    })
}

/// The mechanism list carried by AuthenticationSASL: NUL-terminated
/// names, closed by an empty name.
fn sasl_mechanism_list(body: &[u8]) -> Result<Vec<&str>> {
    let mut mechanisms = Vec::new();
    let mut rest = body;
    loop {
        if rest.first().is_none_or(|&byte| byte == 0) {
            return Ok(mechanisms);
        }
        let (name, tail) = read_cstr(rest)?;
        mechanisms.push(name);
        rest = tail;
    }
}

/// BackendKeyData message - process ID and secret key for cancellation.
#[derive(Debug, Clone, Copy, FromBytes, KnownLayout, Immutable)]
#[repr(C, packed)]
pub struct BackendKeyData {
    /// Process ID of the backend
    pub pid: U32BE,
    /// Secret key for cancellation
    pub secret_key: U32BE,
}

impl BackendKeyData {
    /// Parse a BackendKeyData message from payload bytes.
    pub fn parse(payload: &[u8]) -> Result<&Self> {
        Self::ref_from_bytes(payload)
            .map_err(|e| Error::Protocol(format!("BackendKeyData: {e:?}")))
    }

    /// Get the process ID.
    pub fn process_id(&self) -> u32 {
        self.pid.get()
    }

    /// Get the secret key.
    pub fn secret(&self) -> u32 {
        self.secret_key.get()
    }
}

/// ParameterStatus message - server parameter name and value.
#[derive(Debug, Clone)]
pub struct ParameterStatus<'a> {
    /// Parameter name
    pub name: &'a str,
    /// Parameter value
    pub value: &'a str,
}

impl<'a> ParameterStatus<'a> {
    /// Parse a ParameterStatus message from payload bytes.
    pub fn parse(payload: &'a [u8]) -> Result<Self> {
        let (name, rest) = read_cstr(payload)?;
        let (value, _) = read_cstr(rest)?;
        Ok(Self { name, value })
    }
}

/// ReadyForQuery message - server is ready for a new command.
#[derive(Debug, Clone, Copy, FromBytes, KnownLayout, Immutable)]
#[repr(C, packed)]
pub struct ReadyForQuery {
    /// Transaction status byte
    pub status: u8,
}

impl ReadyForQuery {
    /// Parse a ReadyForQuery message from payload bytes.
    pub fn parse(payload: &[u8]) -> Result<&Self> {
        Self::ref_from_bytes(payload)
            .map_err(|e| Error::Protocol(format!("ReadyForQuery: {e:?}")))
    }

    /// Get the transaction status.
    pub fn transaction_status(&self) -> Option<TransactionStatus> {
        TransactionStatus::from_byte(self.status)
    }
}

/// NotificationResponse message - asynchronous LISTEN/NOTIFY payload.
#[derive(Debug, Clone)]
pub struct NotificationResponse<'a> {
    /// PID of the notifying backend
    pub pid: u32,
    /// Channel name
    pub channel: &'a str,
    /// Notification payload
    pub payload: &'a str,
}

impl<'a> NotificationResponse<'a> {
    /// Parse a NotificationResponse message from payload bytes.
    pub fn parse(payload: &'a [u8]) -> Result<Self> {
        let (pid, rest) = read_u32(payload)?;
        let (channel, rest) = read_cstr(rest)?;
        let (body, _) = read_cstr(rest)?;
        Ok(Self {
            pid,
            channel,
            payload: body,
        })
    }
}

/// NegotiateProtocolVersion message - server rejected protocol options.
#[derive(Debug, Clone)]
pub struct NegotiateProtocolVersion<'a> {
    /// Newest minor protocol version supported
    pub newest_minor_version: u32,
    /// Unrecognized protocol options
    pub unrecognized_options: Vec<&'a str>,
}

impl<'a> NegotiateProtocolVersion<'a> {
    /// Parse a NegotiateProtocolVersion message from payload bytes.
    pub fn parse(payload: &'a [u8]) -> Result<Self> {
        let (newest_minor_version, rest) = read_u32(payload)?;
        let (num_options, mut rest) = read_u32(rest)?;

        let mut unrecognized_options = Vec::with_capacity(num_options as usize);
        for _ in 0..num_options {
            let (option, remaining) = read_cstr(rest)?;
            unrecognized_options.push(option);
            rest = remaining;
        }

        Ok(Self {
            newest_minor_version,
            unrecognized_options,
        })
    }
}
