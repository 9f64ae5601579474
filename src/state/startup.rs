//! Connection startup and authentication state machine.

use crate::buffer_set::BufferSet;
use crate::config::{Config, SslMode};
use crate::error::{Error, Result};
use crate::protocol::backend::{
    AuthenticationMessage, BackendKeyData, ErrorResponse, NegotiateProtocolVersion, RawMessage,
    ReadyForQuery, msg_type,
};
use crate::protocol::backend::auth::ParameterStatus;
use crate::protocol::frontend::auth::ScramClient;
use crate::protocol::frontend::{
    auth::md5_password, startup::write_ssl_request, write_password, write_sasl_initial_response,
    write_sasl_response, write_startup,
};
use crate::protocol::types::TransactionStatus;

use super::action::Action;
use super::{StateMachine, parse_async_message};

/// Connection state during startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Initial,
    WaitingSslResponse,
    WaitingTlsHandshake,
    WaitingAuthRead,
    WaitingAuth,
    SaslInProgressRead,
    SaslInProgress,
    WaitingAuthResultRead,
    WaitingAuthResult,
    WaitingReady,
    Finished,
}

/// Startup and authentication flow.
///
/// Drives SSLRequest negotiation, StartupMessage, the authentication
/// loop (cleartext, MD5, SCRAM-SHA-256 with optional channel binding),
/// and collects BackendKeyData plus the initial parameter snapshot,
/// finishing at the first ReadyForQuery.
pub struct StartupFlow {
    state: State,
    config: Config,
    tls_supported: bool,
    backend_key: Option<(u32, u32)>,
    server_params: Vec<(String, String)>,
    transaction_status: Option<TransactionStatus>,
    scram: Option<ScramClient>,
    /// SSL response byte, set by the driver after WriteAndReadByte
    ssl_response: u8,
    /// TLS certificate hash for channel binding, set after the handshake
    certificate_hash: Option<Vec<u8>>,
}

impl StartupFlow {
    /// Create a new startup flow.
    ///
    /// `tls_supported` reflects whether the driver can perform a TLS
    /// handshake (the relevant cargo feature is enabled).
    pub fn new(config: Config, tls_supported: bool) -> Self {
        Self {
            state: State::Initial,
            config,
            tls_supported,
            backend_key: None,
            server_params: Vec::new(),
            transaction_status: None,
            scram: None,
            ssl_response: 0,
            certificate_hash: None,
        }
    }

    /// Backend process id and secret key, for cancellation.
    pub fn backend_key(&self) -> Option<(u32, u32)> {
        self.backend_key
    }

    /// Take the collected server parameters.
    pub fn take_server_params(&mut self) -> Vec<(String, String)> {
        std::mem::take(&mut self.server_params)
    }

    /// Set the SSL response byte (driver calls this after WriteAndReadByte).
    pub fn set_ssl_response(&mut self, response: u8) {
        self.ssl_response = response;
    }

    /// Provide the server certificate's signature hash after the TLS
    /// handshake, enabling SCRAM-SHA-256-PLUS channel binding.
    pub fn set_certificate_hash(&mut self, hash: Option<Vec<u8>>) {
        self.certificate_hash = hash;
    }

    fn handle_initial(&mut self, buffer_set: &mut BufferSet) -> Result<Action> {
        buffer_set.write_buffer.clear();

        let send_ssl_request = match self.config.ssl_mode {
            SslMode::Disable | SslMode::Allow => false,
            SslMode::Prefer => self.tls_supported,
            mode if mode.is_required() && !self.tls_supported => {
                return Err(Error::Unsupported(
                    "sslmode requires TLS but no TLS feature is enabled".into(),
                ));
            }
            _ => true,
        };

        if send_ssl_request {
            write_ssl_request(&mut buffer_set.write_buffer);
            self.state = State::WaitingSslResponse;
            Ok(Action::WriteAndReadByte)
        } else {
            self.write_startup_message(&mut buffer_set.write_buffer);
            self.state = State::WaitingAuthRead;
            Ok(Action::Write)
        }
    }

    fn handle_ssl_response(&mut self, buffer_set: &mut BufferSet) -> Result<Action> {
        match self.ssl_response {
            b'S' => {
                self.state = State::WaitingTlsHandshake;
                Ok(Action::TlsHandshake)
            }
            b'N' => {
                if self.config.ssl_mode.is_required() {
                    return Err(Error::Auth(
                        "server refused SSL but sslmode requires it".into(),
                    ));
                }
                buffer_set.write_buffer.clear();
                self.write_startup_message(&mut buffer_set.write_buffer);
                self.state = State::WaitingAuthRead;
                Ok(Action::Write)
            }
            other => Err(Error::Protocol(format!("unexpected SSL response: {other}"))),
        }
    }

    fn handle_tls_handshake_complete(&mut self, buffer_set: &mut BufferSet) -> Result<Action> {
        buffer_set.write_buffer.clear();
        self.write_startup_message(&mut buffer_set.write_buffer);
        self.state = State::WaitingAuthRead;
        Ok(Action::Write)
    }

    fn write_startup_message(&self, write_buffer: &mut Vec<u8>) {
        write_startup(write_buffer, &self.config.startup_params());
    }

    fn password(&self) -> Result<&str> {
        self.config
            .password
            .as_deref()
            .ok_or_else(|| Error::Auth("password required but not provided".into()))
    }

    fn handle_auth_message(&mut self, buffer_set: &mut BufferSet) -> Result<Action> {
        let type_byte = buffer_set.type_byte;

        if type_byte == msg_type::NEGOTIATE_PROTOCOL_VERSION {
            let negotiate = NegotiateProtocolVersion::parse(&buffer_set.read_buffer)?;
            return Err(Error::Protocol(format!(
                "server negotiated protocol 3.{}; unrecognized options: {:?}",
                negotiate.newest_minor_version, negotiate.unrecognized_options
            )));
        }

        if type_byte != msg_type::AUTHENTICATION {
            return Err(Error::Protocol(format!(
                "expected Authentication message, got '{}'",
                type_byte as char
            )));
        }

        let auth = AuthenticationMessage::parse(&buffer_set.read_buffer)?;

        match auth {
            AuthenticationMessage::Ok => {
                self.state = State::WaitingReady;
                Ok(Action::ReadMessage)
            }
            AuthenticationMessage::CleartextPassword => {
                let password = self.password()?.to_string();
                buffer_set.write_buffer.clear();
                write_password(&mut buffer_set.write_buffer, &password);
                self.state = State::WaitingAuthResultRead;
                Ok(Action::Write)
            }
            AuthenticationMessage::Md5Password { salt } => {
                let hashed = md5_password(&self.config.user, self.password()?, &salt);
                buffer_set.write_buffer.clear();
                write_password(&mut buffer_set.write_buffer, &hashed);
                self.state = State::WaitingAuthResultRead;
                Ok(Action::Write)
            }
            AuthenticationMessage::Sasl { mechanisms } => {
                let plus = mechanisms.contains(&"SCRAM-SHA-256-PLUS");
                let plain = mechanisms.contains(&"SCRAM-SHA-256");
                if !plus && !plain {
                    return Err(Error::Auth(format!(
                        "no supported SASL mechanism; server offers {mechanisms:?}"
                    )));
                }

                let scram = match (&self.certificate_hash, plus) {
                    (Some(hash), true) => {
                        ScramClient::new_with_channel_binding(self.password()?, hash)
                    }
                    _ if plain => ScramClient::new(self.password()?),
                    _ => {
                        return Err(Error::Auth(
                            "server requires channel binding but no TLS certificate is available"
                                .into(),
                        ));
                    }
                };

                let client_first = scram.client_first_message();
                buffer_set.write_buffer.clear();
                write_sasl_initial_response(
                    &mut buffer_set.write_buffer,
                    scram.mechanism(),
                    client_first.as_bytes(),
                );

                self.scram = Some(scram);
                self.state = State::SaslInProgressRead;
                Ok(Action::Write)
            }
            other => Err(Error::Unsupported(format!(
                "unsupported authentication method: {other:?}"
            ))),
        }
    }

    fn handle_sasl_message(&mut self, buffer_set: &mut BufferSet) -> Result<Action> {
        if buffer_set.type_byte != msg_type::AUTHENTICATION {
            return Err(Error::Protocol(format!(
                "expected Authentication message, got '{}'",
                buffer_set.type_byte as char
            )));
        }

        let auth = AuthenticationMessage::parse(&buffer_set.read_buffer)?;

        match auth {
            AuthenticationMessage::SaslContinue { data } => {
                let scram = self
                    .scram
                    .as_mut()
                    .ok_or_else(|| Error::Protocol("SCRAM exchange not initialized".into()))?;

                let server_first = simdutf8::compat::from_utf8(data)
                    .map_err(|e| Error::Auth(format!("invalid server-first-message: {e}")))?;

                let client_final = scram
                    .process_server_first(server_first)
                    .map_err(Error::Auth)?;

                buffer_set.write_buffer.clear();
                write_sasl_response(&mut buffer_set.write_buffer, client_final.as_bytes());
                self.state = State::SaslInProgressRead;
                Ok(Action::Write)
            }
            AuthenticationMessage::SaslFinal { data } => {
                let scram = self
                    .scram
                    .as_ref()
                    .ok_or_else(|| Error::Protocol("SCRAM exchange not initialized".into()))?;

                let server_final = simdutf8::compat::from_utf8(data)
                    .map_err(|e| Error::Auth(format!("invalid server-final-message: {e}")))?;

                scram.verify_server_final(server_final).map_err(Error::Auth)?;

                self.state = State::WaitingAuthResult;
                Ok(Action::ReadMessage)
            }
            other => Err(Error::Protocol(format!("unexpected SASL message: {other:?}"))),
        }
    }

    fn handle_auth_result(&mut self, buffer_set: &BufferSet) -> Result<Action> {
        if buffer_set.type_byte != msg_type::AUTHENTICATION {
            return Err(Error::Protocol(format!(
                "expected AuthenticationOk, got '{}'",
                buffer_set.type_byte as char
            )));
        }

        match AuthenticationMessage::parse(&buffer_set.read_buffer)? {
            AuthenticationMessage::Ok => {
                self.state = State::WaitingReady;
                Ok(Action::ReadMessage)
            }
            other => Err(Error::Auth(format!("unexpected auth result: {other:?}"))),
        }
    }

    fn handle_ready_message(&mut self, buffer_set: &BufferSet) -> Result<Action> {
        let payload = &buffer_set.read_buffer;

        match buffer_set.type_byte {
            msg_type::BACKEND_KEY_DATA => {
                let key = BackendKeyData::parse(payload)?;
                self.backend_key = Some((key.process_id(), key.secret()));
                Ok(Action::ReadMessage)
            }
            msg_type::PARAMETER_STATUS => {
                let param = ParameterStatus::parse(payload)?;
                self.server_params
                    .push((param.name.to_string(), param.value.to_string()));
                Ok(Action::ReadMessage)
            }
            msg_type::READY_FOR_QUERY => {
                let ready = ReadyForQuery::parse(payload)?;
                self.transaction_status = Some(ready.transaction_status().unwrap_or_default());
                self.state = State::Finished;
                Ok(Action::Finished)
            }
            other => Err(Error::Protocol(format!(
                "unexpected message during startup: '{}'",
                other as char
            ))),
        }
    }
}

impl StateMachine for StartupFlow {
    fn step(&mut self, buffer_set: &mut BufferSet) -> Result<Action> {
        // States that act before any message has been read
        match self.state {
            State::Initial => return self.handle_initial(buffer_set),
            State::WaitingSslResponse => return self.handle_ssl_response(buffer_set),
            State::WaitingTlsHandshake => return self.handle_tls_handshake_complete(buffer_set),
            State::WaitingAuthRead => {
                self.state = State::WaitingAuth;
                return Ok(Action::ReadMessage);
            }
            State::SaslInProgressRead => {
                self.state = State::SaslInProgress;
                return Ok(Action::ReadMessage);
            }
            State::WaitingAuthResultRead => {
                self.state = State::WaitingAuthResult;
                return Ok(Action::ReadMessage);
            }
            _ => {}
        }

        let type_byte = buffer_set.type_byte;

        // ParameterStatus during WaitingReady is part of normal startup
        if RawMessage::is_async_type(type_byte)
            && !(self.state == State::WaitingReady && type_byte == msg_type::PARAMETER_STATUS)
        {
            let msg = parse_async_message(type_byte, &buffer_set.read_buffer)?;
            return Ok(Action::HandleAsync(msg));
        }

        if type_byte == msg_type::ERROR_RESPONSE {
            let error = ErrorResponse::parse(&buffer_set.read_buffer)?;
            return Err(error.into_error());
        }

        match self.state {
            State::WaitingAuth => self.handle_auth_message(buffer_set),
            State::SaslInProgress => self.handle_sasl_message(buffer_set),
            State::WaitingAuthResult => self.handle_auth_result(buffer_set),
            State::WaitingReady => self.handle_ready_message(buffer_set),
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

    fn feed(flow: &mut StartupFlow, set: &mut BufferSet, type_byte: u8, payload: &[u8]) -> Action {
        set.type_byte = type_byte;
        set.read_buffer.clear();
        set.read_buffer.extend_from_slice(payload);
        flow.step(set).unwrap()
    }

    fn config() -> Config {
        Config {
            host: "localhost".into(),
            user: "alice".into(),
            database: Some("app".into()),
            password: Some("secret".into()),
            ssl_mode: SslMode::Disable,
            ..Config::default()
        }
    }

    #[test]
    fn cleartext_auth_to_ready() {
        let mut flow = StartupFlow::new(config(), false);
        let mut set = BufferSet::new();

        // Initial: writes StartupMessage
        assert!(matches!(flow.step(&mut set).unwrap(), Action::Write));
        assert!(!set.write_buffer.is_empty());
        assert!(matches!(flow.step(&mut set).unwrap(), Action::ReadMessage));

        // Server asks for a cleartext password
        let action = feed(&mut flow, &mut set, b'R', &3_i32.to_be_bytes());
        assert!(matches!(action, Action::Write));
        assert_eq!(set.write_buffer[0], b'p');
        assert!(matches!(flow.step(&mut set).unwrap(), Action::ReadMessage));

        // AuthenticationOk
        let action = feed(&mut flow, &mut set, b'R', &0_i32.to_be_bytes());
        assert!(matches!(action, Action::ReadMessage));

        // BackendKeyData
        let mut key = Vec::new();
        key.extend_from_slice(&99_u32.to_be_bytes());
        key.extend_from_slice(&7_u32.to_be_bytes());
        assert!(matches!(feed(&mut flow, &mut set, b'K', &key), Action::ReadMessage));

        // ParameterStatus
        assert!(matches!(
            feed(&mut flow, &mut set, b'S', b"server_version\x0016.2\x00"),
            Action::ReadMessage
        ));

        // ReadyForQuery
        assert!(matches!(feed(&mut flow, &mut set, b'Z', b"I"), Action::Finished));
        assert_eq!(flow.backend_key(), Some((99, 7)));
        assert_eq!(flow.transaction_status(), Some(TransactionStatus::Idle));
        assert_eq!(
            flow.take_server_params(),
            vec![("server_version".to_string(), "16.2".to_string())]
        );
    }

    #[test]
    fn md5_auth_produces_hashed_password() {
        let mut flow = StartupFlow::new(config(), false);
        let mut set = BufferSet::new();
        flow.step(&mut set).unwrap();
        flow.step(&mut set).unwrap();

        let mut payload = 5_i32.to_be_bytes().to_vec();
        payload.extend_from_slice(&[9, 8, 7, 6]);
        let action = feed(&mut flow, &mut set, b'R', &payload);
        assert!(matches!(action, Action::Write));
        // "md5" + 32 hex chars, NUL terminated
        assert_eq!(&set.write_buffer[5..8], b"md5");
        assert_eq!(set.write_buffer.len(), 1 + 4 + 35 + 1);
    }

    #[test]
    fn scram_requires_known_mechanism() {
        let mut flow = StartupFlow::new(config(), false);
        let mut set = BufferSet::new();
        flow.step(&mut set).unwrap();
        flow.step(&mut set).unwrap();

        let mut payload = 10_i32.to_be_bytes().to_vec();
        payload.extend_from_slice(b"OTHER-MECH\0\0");
        set.type_byte = b'R';
        set.read_buffer = payload;
        assert!(matches!(flow.step(&mut set), Err(Error::Auth(_))));
    }

    #[test]
    fn server_error_during_startup_fails() {
        let mut flow = StartupFlow::new(config(), false);
        let mut set = BufferSet::new();
        flow.step(&mut set).unwrap();
        flow.step(&mut set).unwrap();

        set.type_byte = b'E';
        set.read_buffer = b"SFATAL\0VFATAL\0C28P01\0Mpassword authentication failed\0\0".to_vec();
        let err = flow.step(&mut set).unwrap_err();
        assert_eq!(err.sqlstate(), Some("28P01"));
        assert!(err.is_fatal());
    }

    #[test]
    fn ssl_refusal_fails_when_required() {
        let mut config = config();
        config.ssl_mode = SslMode::Require;
        let mut flow = StartupFlow::new(config, true);
        let mut set = BufferSet::new();

        assert!(matches!(flow.step(&mut set).unwrap(), Action::WriteAndReadByte));
        flow.set_ssl_response(b'N');
        assert!(matches!(flow.step(&mut set), Err(Error::Auth(_))));
    }

    #[test]
    fn ssl_acceptance_triggers_handshake() {
        let mut config = config();
        config.ssl_mode = SslMode::Prefer;
        let mut flow = StartupFlow::new(config, true);
        let mut set = BufferSet::new();

        assert!(matches!(flow.step(&mut set).unwrap(), Action::WriteAndReadByte));
        assert_eq!(set.write_buffer.len(), 8);
        flow.set_ssl_response(b'S');
        assert!(matches!(flow.step(&mut set).unwrap(), Action::TlsHandshake));
        assert!(matches!(flow.step(&mut set).unwrap(), Action::Write));
    }
}
