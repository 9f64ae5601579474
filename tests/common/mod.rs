//! In-process mock PostgreSQL server for integration tests.
//!
//! Each test scripts the server side of the conversation over a real
//! loopback socket, so the full client stack - framing, state machines,
//! drivers - is exercised without a database.

#![allow(dead_code)]

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::thread::JoinHandle;

use pglink::Config;
use pglink::protocol::frontend::startup::StartupRequest;

/// A scripted server accepting a fixed number of connections.
pub struct MockServer {
    addr: SocketAddr,
    handle: Option<JoinHandle<()>>,
}

impl MockServer {
    /// Start a server whose script handles one connection.
    pub fn start(script: impl FnOnce(&mut MockConn) + Send + 'static) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind mock server");
        let addr = listener.local_addr().expect("local addr");
        let handle = std::thread::spawn(move || {
            let (stream, _) = listener.accept().expect("accept");
            let mut conn = MockConn { stream };
            script(&mut conn);
        });
        Self {
            addr,
            handle: Some(handle),
        }
    }

    /// Start a server running the script once per accepted connection.
    ///
    /// Connections are served concurrently so several client
    /// connections can be in flight at once (pool tests).
    pub fn start_serial(
        connections: usize,
        script: impl Fn(&mut MockConn, usize) + Send + Sync + 'static,
    ) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind mock server");
        let addr = listener.local_addr().expect("local addr");
        let script = std::sync::Arc::new(script);
        let handle = std::thread::spawn(move || {
            let mut workers = Vec::new();
            for index in 0..connections {
                let (stream, _) = listener.accept().expect("accept");
                let script = std::sync::Arc::clone(&script);
                workers.push(std::thread::spawn(move || {
                    let mut conn = MockConn { stream };
                    script(&mut conn, index);
                }));
            }
            for worker in workers {
                worker.join().expect("mock connection script");
            }
        });
        Self {
            addr,
            handle: Some(handle),
        }
    }

    /// Client configuration pointing at this server.
    pub fn config(&self) -> Config {
        Config {
            host: self.addr.ip().to_string(),
            port: self.addr.port(),
            user: "tester".into(),
            database: Some("testdb".into()),
            ssl_mode: pglink::SslMode::Disable,
            ..Config::default()
        }
    }

    /// Wait for the script to finish, propagating its panics.
    pub fn join(mut self) {
        if let Some(handle) = self.handle.take() {
            handle.join().expect("mock server script");
        }
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            if !std::thread::panicking() {
                handle.join().expect("mock server script");
            }
        }
    }
}

/// One scripted server-side connection.
pub struct MockConn {
    stream: TcpStream,
}

impl MockConn {
    // === reading client messages ===

    /// Read the tagless startup-phase message.
    pub fn read_startup(&mut self) -> StartupRequest {
        let mut len = [0u8; 4];
        self.stream.read_exact(&mut len).expect("startup length");
        let len = i32::from_be_bytes(len) as usize;
        let mut body = vec![0u8; len - 4];
        self.stream.read_exact(&mut body).expect("startup body");
        StartupRequest::parse(&body).expect("startup request")
    }

    /// Read one tagged frontend message.
    pub fn read_message(&mut self) -> (u8, Vec<u8>) {
        self.try_read_message().expect("unexpected EOF from client")
    }

    /// Read one tagged frontend message, or `None` on clean EOF.
    pub fn try_read_message(&mut self) -> Option<(u8, Vec<u8>)> {
        let mut header = [0u8; 5];
        match self.stream.read_exact(&mut header) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return None,
            Err(e) => panic!("message header: {e}"),
        }
        let len = i32::from_be_bytes([header[1], header[2], header[3], header[4]]) as usize;
        let mut payload = vec![0u8; len - 4];
        self.stream.read_exact(&mut payload).expect("message payload");
        Some((header[0], payload))
    }

    /// Read one message, asserting its tag.
    pub fn expect(&mut self, tag: u8) -> Vec<u8> {
        let (got, payload) = self.read_message();
        assert_eq!(
            got as char, tag as char,
            "expected frontend message '{}', got '{}'",
            tag as char, got as char
        );
        payload
    }

    /// Read messages up to and including Sync.
    pub fn read_until_sync(&mut self) -> Vec<(u8, Vec<u8>)> {
        let mut messages = Vec::new();
        loop {
            let (tag, payload) = self.read_message();
            let done = tag == b'S';
            messages.push((tag, payload));
            if done {
                return messages;
            }
        }
    }

    /// True once the client has hung up.
    pub fn read_eof(&mut self) -> bool {
        let mut byte = [0u8; 1];
        matches!(self.stream.read(&mut byte), Ok(0))
    }

    // === writing backend messages ===

    /// Send one tagged backend message.
    pub fn send(&mut self, tag: u8, payload: &[u8]) {
        let mut frame = Vec::with_capacity(payload.len() + 5);
        frame.push(tag);
        frame.extend_from_slice(&((payload.len() + 4) as i32).to_be_bytes());
        frame.extend_from_slice(payload);
        self.stream.write_all(&frame).expect("send backend message");
    }

    /// AuthenticationOk.
    pub fn send_auth_ok(&mut self) {
        self.send(b'R', &0_i32.to_be_bytes());
    }

    /// AuthenticationCleartextPassword.
    pub fn send_auth_cleartext(&mut self) {
        self.send(b'R', &3_i32.to_be_bytes());
    }

    /// ParameterStatus.
    pub fn send_parameter_status(&mut self, name: &str, value: &str) {
        let mut payload = Vec::new();
        payload.extend_from_slice(name.as_bytes());
        payload.push(0);
        payload.extend_from_slice(value.as_bytes());
        payload.push(0);
        self.send(b'S', &payload);
    }

    /// BackendKeyData.
    pub fn send_backend_key(&mut self, pid: u32, secret: u32) {
        let mut payload = Vec::new();
        payload.extend_from_slice(&pid.to_be_bytes());
        payload.extend_from_slice(&secret.to_be_bytes());
        self.send(b'K', &payload);
    }

    /// ReadyForQuery with the given status byte.
    pub fn send_ready(&mut self, status: u8) {
        self.send(b'Z', &[status]);
    }

    /// The standard startup exchange: trust auth, a couple of
    /// parameters, key data, ready.
    pub fn handshake(&mut self) {
        self.handshake_with_key(4242, 0x5eed)
    }

    /// Startup exchange with explicit backend key data.
    pub fn handshake_with_key(&mut self, pid: u32, secret: u32) {
        match self.read_startup() {
            StartupRequest::Startup { params } => {
                assert!(params.iter().any(|(k, v)| k == "user" && v == "tester"));
            }
            other => panic!("expected StartupMessage, got {other:?}"),
        }
        self.send_auth_ok();
        self.send_parameter_status("server_version", "16.2");
        self.send_parameter_status("client_encoding", "UTF8");
        self.send_backend_key(pid, secret);
        self.send_ready(b'I');
    }

    /// RowDescription with one int4 column in the given format.
    pub fn send_int4_row_description(&mut self, name: &str, format: u16) {
        let mut payload = Vec::new();
        payload.extend_from_slice(&1_u16.to_be_bytes());
        payload.extend_from_slice(name.as_bytes());
        payload.push(0);
        payload.extend_from_slice(&0_u32.to_be_bytes());
        payload.extend_from_slice(&0_i16.to_be_bytes());
        payload.extend_from_slice(&23_u32.to_be_bytes());
        payload.extend_from_slice(&4_i16.to_be_bytes());
        payload.extend_from_slice(&(-1_i32).to_be_bytes());
        payload.extend_from_slice(&format.to_be_bytes());
        self.send(b'T', &payload);
    }

    /// RowDescription with one text column.
    pub fn send_text_row_description(&mut self, name: &str) {
        let mut payload = Vec::new();
        payload.extend_from_slice(&1_u16.to_be_bytes());
        payload.extend_from_slice(name.as_bytes());
        payload.push(0);
        payload.extend_from_slice(&0_u32.to_be_bytes());
        payload.extend_from_slice(&0_i16.to_be_bytes());
        payload.extend_from_slice(&25_u32.to_be_bytes());
        payload.extend_from_slice(&(-1_i16).to_be_bytes());
        payload.extend_from_slice(&(-1_i32).to_be_bytes());
        payload.extend_from_slice(&0_u16.to_be_bytes());
        self.send(b'T', &payload);
    }

    /// DataRow from per-column values (`None` = NULL).
    pub fn send_data_row(&mut self, values: &[Option<&[u8]>]) {
        let mut payload = Vec::new();
        payload.extend_from_slice(&(values.len() as u16).to_be_bytes());
        for value in values {
            match value {
                None => payload.extend_from_slice(&(-1_i32).to_be_bytes()),
                Some(bytes) => {
                    payload.extend_from_slice(&(bytes.len() as i32).to_be_bytes());
                    payload.extend_from_slice(bytes);
                }
            }
        }
        self.send(b'D', &payload);
    }

    /// CommandComplete with the given tag text.
    pub fn send_command_complete(&mut self, tag: &str) {
        let mut payload = tag.as_bytes().to_vec();
        payload.push(0);
        self.send(b'C', &payload);
    }

    /// ErrorResponse with severity ERROR.
    pub fn send_error(&mut self, code: &str, message: &str) {
        let mut payload = Vec::new();
        for (field, value) in [
            (b'S', "ERROR"),
            (b'V', "ERROR"),
            (b'C', code),
            (b'M', message),
        ] {
            payload.push(field);
            payload.extend_from_slice(value.as_bytes());
            payload.push(0);
        }
        payload.push(0);
        self.send(b'E', &payload);
    }

    /// NoticeResponse with severity NOTICE.
    pub fn send_notice(&mut self, message: &str) {
        let mut payload = Vec::new();
        for (field, value) in [(b'S', "NOTICE"), (b'V', "NOTICE"), (b'C', "00000"), (b'M', message)]
        {
            payload.push(field);
            payload.extend_from_slice(value.as_bytes());
            payload.push(0);
        }
        payload.push(0);
        self.send(b'N', &payload);
    }

    /// NotificationResponse.
    pub fn send_notification(&mut self, pid: u32, channel: &str, body: &str) {
        let mut payload = Vec::new();
        payload.extend_from_slice(&pid.to_be_bytes());
        payload.extend_from_slice(channel.as_bytes());
        payload.push(0);
        payload.extend_from_slice(body.as_bytes());
        payload.push(0);
        self.send(b'A', &payload);
    }

    /// ParseComplete.
    pub fn send_parse_complete(&mut self) {
        self.send(b'1', &[]);
    }

    /// BindComplete.
    pub fn send_bind_complete(&mut self) {
        self.send(b'2', &[]);
    }

    /// CloseComplete.
    pub fn send_close_complete(&mut self) {
        self.send(b'3', &[]);
    }

    /// NoData.
    pub fn send_no_data(&mut self) {
        self.send(b'n', &[]);
    }

    /// ParameterDescription with the given OIDs.
    pub fn send_parameter_description(&mut self, oids: &[u32]) {
        let mut payload = Vec::new();
        payload.extend_from_slice(&(oids.len() as u16).to_be_bytes());
        for oid in oids {
            payload.extend_from_slice(&oid.to_be_bytes());
        }
        self.send(b't', &payload);
    }

    /// CopyInResponse (text format).
    pub fn send_copy_in_response(&mut self, columns: u16) {
        let mut payload = vec![0u8];
        payload.extend_from_slice(&columns.to_be_bytes());
        for _ in 0..columns {
            payload.extend_from_slice(&0_u16.to_be_bytes());
        }
        self.send(b'G', &payload);
    }

    /// CopyOutResponse (text format).
    pub fn send_copy_out_response(&mut self, columns: u16) {
        let mut payload = vec![0u8];
        payload.extend_from_slice(&columns.to_be_bytes());
        for _ in 0..columns {
            payload.extend_from_slice(&0_u16.to_be_bytes());
        }
        self.send(b'H', &payload);
    }

    /// CopyData.
    pub fn send_copy_data(&mut self, data: &[u8]) {
        self.send(b'd', data);
    }

    /// CopyDone.
    pub fn send_copy_done(&mut self) {
        self.send(b'c', &[]);
    }
}
