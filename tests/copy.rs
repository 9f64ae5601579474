//! COPY sub-protocol scenarios.

mod common;

use common::MockServer;
use pglink::copy::BINARY_SIGNATURE;
use pglink::protocol::types::oid;
use pglink::sync::Conn;
use pglink::Value;

#[test]
fn copy_in_text_chunks() {
    let server = MockServer::start(|conn| {
        conn.handshake();

        let query = conn.expect(b'Q');
        assert!(query.starts_with(b"COPY t FROM STDIN"));
        conn.send_copy_in_response(2);

        let (tag, chunk) = conn.read_message();
        assert_eq!(tag, b'd');
        assert_eq!(chunk, b"1\tone\n");
        let (tag, chunk) = conn.read_message();
        assert_eq!(tag, b'd');
        assert_eq!(chunk, b"2\ttwo\n");

        assert_eq!(conn.read_message().0, b'c');
        conn.send_command_complete("COPY 2");
        conn.send_ready(b'I');

        assert_eq!(conn.read_message().0, b'X');
    });

    let mut conn = Conn::connect(server.config()).unwrap();
    let mut writer = conn.copy_in("COPY t FROM STDIN").unwrap();
    assert!(!writer.is_binary());
    writer.send(b"1\tone\n").unwrap();
    writer.send(b"2\ttwo\n").unwrap();
    let rows = writer.finish().unwrap();
    assert_eq!(rows, Some(2));
    conn.close().unwrap();
    server.join();
}

#[test]
fn copy_in_abort_with_copy_fail() {
    let server = MockServer::start(|conn| {
        conn.handshake();
        conn.expect(b'Q');
        conn.send_copy_in_response(1);

        let (tag, payload) = conn.read_message();
        assert_eq!(tag, b'f');
        assert!(payload.starts_with(b"bad input"));

        conn.send_error("57014", "COPY from stdin failed: bad input");
        conn.send_ready(b'I');
        assert_eq!(conn.read_message().0, b'X');
    });

    let mut conn = Conn::connect(server.config()).unwrap();
    let writer = conn.copy_in("COPY t FROM STDIN").unwrap();
    writer.abort("bad input").unwrap();
    assert!(!conn.is_broken());
    conn.close().unwrap();
    server.join();
}

#[test]
fn copy_out_streams_to_sink() {
    let server = MockServer::start(|conn| {
        conn.handshake();
        conn.expect(b'Q');
        conn.send_copy_out_response(1);
        conn.send_copy_data(b"alpha\n");
        conn.send_copy_data(b"beta\n");
        conn.send_copy_done();
        conn.send_command_complete("COPY 2");
        conn.send_ready(b'I');
        assert_eq!(conn.read_message().0, b'X');
    });

    let mut conn = Conn::connect(server.config()).unwrap();
    let mut sink: Vec<u8> = Vec::new();
    let rows = conn.copy_out("COPY t TO STDOUT", &mut sink).unwrap();
    assert_eq!(rows, Some(2));
    assert_eq!(sink, b"alpha\nbeta\n");
    conn.close().unwrap();
    server.join();
}

#[test]
fn binary_copy_encodes_typed_rows() {
    let server = MockServer::start(|conn| {
        conn.handshake();
        conn.expect(b'Q');

        // Binary CopyInResponse
        let mut payload = vec![1u8];
        payload.extend_from_slice(&2_u16.to_be_bytes());
        payload.extend_from_slice(&1_u16.to_be_bytes());
        payload.extend_from_slice(&1_u16.to_be_bytes());
        conn.send(b'G', &payload);

        // Collect the whole stream across CopyData frames
        let mut stream = Vec::new();
        loop {
            let (tag, chunk) = conn.read_message();
            match tag {
                b'd' => stream.extend_from_slice(&chunk),
                b'c' => break,
                other => panic!("unexpected tag '{}'", other as char),
            }
        }

        assert!(stream.starts_with(BINARY_SIGNATURE));
        assert!(stream.ends_with(&(-1_i16).to_be_bytes()));
        // Row 1: field count, then framed int4 7 and framed "seven"
        let row = &stream[19..];
        assert_eq!(&row[0..2], &2_i16.to_be_bytes());
        assert_eq!(&row[6..10], &7_i32.to_be_bytes());

        conn.send_command_complete("COPY 2");
        conn.send_ready(b'I');
        assert_eq!(conn.read_message().0, b'X');
    });

    let mut conn = Conn::connect(server.config()).unwrap();
    let mut writer = conn.copy_in("COPY t FROM STDIN (FORMAT binary)").unwrap();
    assert!(writer.is_binary());

    let info = pglink::ConnInfo::new();
    let mut encoder = writer.binary_encoder(vec![oid::INT4, oid::TEXT]);
    let mut buf = Vec::new();
    encoder
        .write_row(&info, &[Value::from(7_i32), Value::from("seven")], &mut buf)
        .unwrap();
    encoder
        .write_row(&info, &[Value::from(8_i32), Value::Null], &mut buf)
        .unwrap();
    encoder.write_trailer(&mut buf);

    writer.send(&buf).unwrap();
    let rows = writer.finish().unwrap();
    assert_eq!(rows, Some(2));
    conn.close().unwrap();
    server.join();
}

#[test]
fn copy_out_server_error_is_surfaced() {
    let server = MockServer::start(|conn| {
        conn.handshake();
        conn.expect(b'Q');
        conn.send_copy_out_response(1);
        conn.send_copy_data(b"partial\n");
        conn.send_error("22P04", "incorrect binary data format");
        conn.send_ready(b'I');
        assert_eq!(conn.read_message().0, b'X');
    });

    let mut conn = Conn::connect(server.config()).unwrap();
    let mut sink: Vec<u8> = Vec::new();
    let error = conn.copy_out("COPY t TO STDOUT", &mut sink).unwrap_err();
    assert_eq!(error.sqlstate(), Some("22P04"));
    assert!(!conn.is_broken());
    conn.close().unwrap();
    server.join();
}
