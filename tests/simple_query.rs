//! Simple-protocol scenarios against the mock server.

mod common;

use common::MockServer;
use pglink::protocol::types::TransactionStatus;
use pglink::sync::Conn;
use pglink::{Error, Value};

#[test]
fn select_one_value() {
    let server = MockServer::start(|conn| {
        conn.handshake();

        let query = conn.expect(b'Q');
        assert_eq!(query, b"select 42\0");

        conn.send_int4_row_description("?column?", 0);
        conn.send_data_row(&[Some(b"42")]);
        conn.send_command_complete("SELECT 1");
        conn.send_ready(b'I');

        assert_eq!(conn.read_message().0, b'X');
    });

    let mut conn = Conn::connect(server.config()).unwrap();
    let rows: Vec<(i32,)> = conn.query_collect("select 42").unwrap();
    assert_eq!(rows, vec![(42,)]);
    assert_eq!(conn.transaction_status(), TransactionStatus::Idle);
    conn.close().unwrap();
    server.join();
}

#[test]
fn server_error_leaves_connection_usable() {
    let server = MockServer::start(|conn| {
        conn.handshake();

        conn.expect(b'Q');
        conn.send_error("42703", "column \"nope\" does not exist");
        conn.send_ready(b'I');

        conn.expect(b'Q');
        conn.send_int4_row_description("n", 0);
        conn.send_data_row(&[Some(b"7")]);
        conn.send_command_complete("SELECT 1");
        conn.send_ready(b'I');

        assert_eq!(conn.read_message().0, b'X');
    });

    let mut conn = Conn::connect(server.config()).unwrap();
    let error = conn.query_drop("select nope").unwrap_err();
    assert_eq!(error.sqlstate(), Some("42703"));
    assert!(!conn.is_broken());

    let rows: Vec<(i32,)> = conn.query_collect("select 7").unwrap();
    assert_eq!(rows, vec![(7,)]);
    conn.close().unwrap();
    server.join();
}

#[test]
fn fatal_error_breaks_connection() {
    let server = MockServer::start(|conn| {
        conn.handshake();
        conn.expect(b'Q');
        let mut payload = Vec::new();
        for (field, value) in [
            (b'S', "FATAL"),
            (b'V', "FATAL"),
            (b'C', "57P01"),
            (b'M', "terminating connection"),
        ] {
            payload.push(field);
            payload.extend_from_slice(value.as_bytes());
            payload.push(0);
        }
        payload.push(0);
        conn.send(b'E', &payload);
    });

    let mut conn = Conn::connect(server.config()).unwrap();
    let error = conn.query_drop("select 1").unwrap_err();
    assert!(error.is_fatal());
    assert!(conn.is_broken());
    assert!(matches!(conn.query_drop("select 1"), Err(Error::Broken)));
    drop(conn);
    server.join();
}

#[test]
fn multi_statement_query_yields_all_results() {
    let server = MockServer::start(|conn| {
        conn.handshake();
        conn.expect(b'Q');

        conn.send_int4_row_description("a", 0);
        conn.send_data_row(&[Some(b"1")]);
        conn.send_command_complete("SELECT 1");

        conn.send_int4_row_description("b", 0);
        conn.send_data_row(&[Some(b"2")]);
        conn.send_data_row(&[Some(b"3")]);
        conn.send_command_complete("SELECT 2");

        conn.send_ready(b'T');
        assert_eq!(conn.read_message().0, b'X');
    });

    let mut conn = Conn::connect(server.config()).unwrap();
    let rows: Vec<(i32,)> = conn.query_collect("select 1; select 2, 3").unwrap();
    assert_eq!(rows, vec![(1,), (2,), (3,)]);
    assert_eq!(
        conn.transaction_status(),
        TransactionStatus::InTransaction
    );
    conn.close().unwrap();
    server.join();
}

#[test]
fn null_requires_option_destination() {
    let server = MockServer::start(|conn| {
        conn.handshake();

        for _ in 0..2 {
            conn.expect(b'Q');
            conn.send_text_row_description("name");
            conn.send_data_row(&[None]);
            conn.send_command_complete("SELECT 1");
            conn.send_ready(b'I');
        }

        assert_eq!(conn.read_message().0, b'X');
    });

    let mut conn = Conn::connect(server.config()).unwrap();

    let rows: Vec<(Option<String>,)> = conn.query_collect("select name").unwrap();
    assert_eq!(rows, vec![(None,)]);

    // A scalar destination rejects the NULL
    let error = conn.query_collect::<(String,)>("select name").unwrap_err();
    assert!(matches!(error, Error::Decode(_)));

    conn.close().unwrap();
    server.join();
}

#[test]
fn parameter_status_updates_snapshot() {
    let server = MockServer::start(|conn| {
        conn.handshake();
        conn.expect(b'Q');
        conn.send_parameter_status("TimeZone", "UTC");
        conn.send_command_complete("SET");
        conn.send_ready(b'I');
        assert_eq!(conn.read_message().0, b'X');
    });

    let mut conn = Conn::connect(server.config()).unwrap();
    assert_eq!(conn.parameter("server_version"), Some("16.2"));
    conn.query_drop("set timezone = 'UTC'").unwrap();
    assert_eq!(conn.parameter("TimeZone"), Some("UTC"));
    conn.close().unwrap();
    server.join();
}

#[test]
fn text_array_with_quoting_and_null() {
    let server = MockServer::start(|conn| {
        conn.handshake();
        conn.expect(b'Q');

        // One text[] column (oid 1009), text format
        let mut payload = Vec::new();
        payload.extend_from_slice(&1_u16.to_be_bytes());
        payload.extend_from_slice(b"strings\0");
        payload.extend_from_slice(&0_u32.to_be_bytes());
        payload.extend_from_slice(&0_i16.to_be_bytes());
        payload.extend_from_slice(&1009_u32.to_be_bytes());
        payload.extend_from_slice(&(-1_i16).to_be_bytes());
        payload.extend_from_slice(&(-1_i32).to_be_bytes());
        payload.extend_from_slice(&0_u16.to_be_bytes());
        conn.send(b'T', &payload);

        conn.send_data_row(&[Some(b"{a,b,\"c,d\",NULL}")]);
        conn.send_command_complete("SELECT 1");
        conn.send_ready(b'I');
        assert_eq!(conn.read_message().0, b'X');
    });

    let mut conn = Conn::connect(server.config()).unwrap();
    let rows: Vec<(pglink::types::ArrayValue,)> = conn
        .query_collect("SELECT '{a,b,\"c,d\",NULL}'::text[]")
        .unwrap();
    let array = &rows[0].0;
    assert_eq!(array.elements.len(), 4);
    assert_eq!(
        array.elements[2],
        pglink::Value::Present(pglink::PgValue::Text("c,d".into()))
    );
    assert!(array.elements[3].is_null());
    conn.close().unwrap();
    server.join();
}

#[test]
fn exec_uses_extended_protocol_with_binary_values() {
    let server = MockServer::start(|conn| {
        conn.handshake();

        // Prepare: Parse + Describe + Sync
        let messages = conn.read_until_sync();
        assert_eq!(messages[0].0, b'P');
        assert_eq!(messages[1].0, b'D');
        conn.send_parse_complete();
        conn.send_parameter_description(&[23]);
        conn.send_int4_row_description("n", 1);
        conn.send_ready(b'I');

        // Execute: Bind + Execute + Sync
        let messages = conn.read_until_sync();
        assert_eq!(messages[0].0, b'B');
        assert_eq!(messages[1].0, b'E');
        conn.send_bind_complete();
        conn.send_data_row(&[Some(&5_i32.to_be_bytes())]);
        conn.send_command_complete("SELECT 1");
        conn.send_ready(b'I');

        assert_eq!(conn.read_message().0, b'X');
    });

    let mut conn = Conn::connect(server.config()).unwrap();
    let rows: Vec<(i32,)> = conn
        .exec_collect("select $1::int", &[Value::from(5_i32)])
        .unwrap();
    assert_eq!(rows, vec![(5,)]);
    conn.close().unwrap();
    server.join();
}
