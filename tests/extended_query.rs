//! Extended-protocol scenarios: statement cache, parameters, portals.

mod common;

use common::MockServer;
use pglink::protocol::codec::read_cstr;
use pglink::sync::Conn;
use pglink::{Config, StatementCacheMode, Value};

/// Parse payload: statement name then query text.
fn parse_names(payload: &[u8]) -> (String, String) {
    let (name, rest) = read_cstr(payload).unwrap();
    let (query, _) = read_cstr(rest).unwrap();
    (name.to_string(), query.to_string())
}

#[test]
fn generate_series_with_parameter() {
    let server = MockServer::start(|conn| {
        conn.handshake();

        let messages = conn.read_until_sync();
        let (name, query) = parse_names(&messages[0].1);
        assert!(name.starts_with("plk_s"));
        assert_eq!(query, "select n from generate_series(0,$1::int) n");
        conn.send_parse_complete();
        conn.send_parameter_description(&[23]);
        conn.send_int4_row_description("n", 1);
        conn.send_ready(b'I');

        let messages = conn.read_until_sync();
        assert_eq!(messages[0].0, b'B');
        // Bind names the prepared statement
        let (portal, rest) = read_cstr(&messages[0].1).unwrap();
        let (statement, _) = read_cstr(rest).unwrap();
        assert_eq!(portal, "");
        assert_eq!(statement, name);

        conn.send_bind_complete();
        for n in 0..=5_i32 {
            conn.send_data_row(&[Some(&n.to_be_bytes())]);
        }
        conn.send_command_complete("SELECT 6");
        conn.send_ready(b'I');

        assert_eq!(conn.read_message().0, b'X');
    });

    let mut conn = Conn::connect(server.config()).unwrap();
    let rows: Vec<(i32,)> = conn
        .exec_collect(
            "select n from generate_series(0,$1::int) n",
            &[Value::from(5_i32)],
        )
        .unwrap();
    assert_eq!(rows, vec![(0,), (1,), (2,), (3,), (4,), (5,)]);
    conn.close().unwrap();
    server.join();
}

#[test]
fn statement_cache_reuses_prepared_statement() {
    let server = MockServer::start(|conn| {
        conn.handshake();

        // First use parses and describes once
        let messages = conn.read_until_sync();
        assert_eq!(messages[0].0, b'P');
        conn.send_parse_complete();
        conn.send_parameter_description(&[]);
        conn.send_int4_row_description("n", 1);
        conn.send_ready(b'I');

        for _ in 0..2 {
            let messages = conn.read_until_sync();
            // No further Parse: the cached name is bound directly
            assert_eq!(messages[0].0, b'B');
            conn.send_bind_complete();
            conn.send_data_row(&[Some(&1_i32.to_be_bytes())]);
            conn.send_command_complete("SELECT 1");
            conn.send_ready(b'I');
        }

        assert_eq!(conn.read_message().0, b'X');
    });

    let mut conn = Conn::connect(server.config()).unwrap();
    for _ in 0..2 {
        let rows: Vec<(i32,)> = conn.exec_collect("select 1", &[]).unwrap();
        assert_eq!(rows, vec![(1,)]);
    }
    conn.close().unwrap();
    server.join();
}

#[test]
fn describe_mode_reparses_each_time() {
    let server = MockServer::start(|conn| {
        conn.handshake();

        // First use: Parse("") + Describe + Sync
        let messages = conn.read_until_sync();
        let (name, _) = parse_names(&messages[0].1);
        assert_eq!(name, "");
        conn.send_parse_complete();
        conn.send_parameter_description(&[]);
        conn.send_int4_row_description("n", 1);
        conn.send_ready(b'I');

        // Execution re-parses the unnamed statement, skipping Describe
        let messages = conn.read_until_sync();
        assert_eq!(messages[0].0, b'P');
        assert_eq!(messages[1].0, b'B');
        assert_eq!(messages[2].0, b'E');
        conn.send_parse_complete();
        conn.send_bind_complete();
        conn.send_data_row(&[Some(&9_i32.to_be_bytes())]);
        conn.send_command_complete("SELECT 1");
        conn.send_ready(b'I');

        assert_eq!(conn.read_message().0, b'X');
    });

    let config = Config {
        statement_cache_mode: StatementCacheMode::Describe,
        ..server.config()
    };
    let mut conn = Conn::connect(config).unwrap();
    let rows: Vec<(i32,)> = conn.exec_collect("select 9", &[]).unwrap();
    assert_eq!(rows, vec![(9,)]);
    conn.close().unwrap();
    server.join();
}

#[test]
fn cache_invalidation_retries_once() {
    let server = MockServer::start(|conn| {
        conn.handshake();

        // First prepare + execute succeeds
        conn.read_until_sync();
        conn.send_parse_complete();
        conn.send_parameter_description(&[]);
        conn.send_int4_row_description("n", 1);
        conn.send_ready(b'I');

        conn.read_until_sync();
        conn.send_bind_complete();
        conn.send_data_row(&[Some(&1_i32.to_be_bytes())]);
        conn.send_command_complete("SELECT 1");
        conn.send_ready(b'I');

        // Second execute fails with a cached-plan error at Bind
        conn.read_until_sync();
        conn.send_error("0A000", "cached plan must not change result type");
        conn.send_ready(b'I');

        // The client retries: fresh Parse + Describe, then Bind + Execute
        let messages = conn.read_until_sync();
        assert_eq!(messages[0].0, b'P');
        conn.send_parse_complete();
        conn.send_parameter_description(&[]);
        conn.send_int4_row_description("n", 1);
        conn.send_ready(b'I');

        let messages = conn.read_until_sync();
        assert_eq!(messages[0].0, b'B');
        conn.send_bind_complete();
        conn.send_data_row(&[Some(&2_i32.to_be_bytes())]);
        conn.send_command_complete("SELECT 1");
        conn.send_ready(b'I');

        assert_eq!(conn.read_message().0, b'X');
    });

    let mut conn = Conn::connect(server.config()).unwrap();
    let rows: Vec<(i32,)> = conn.exec_collect("select n", &[]).unwrap();
    assert_eq!(rows, vec![(1,)]);
    // DDL happened server-side; the retry is transparent
    let rows: Vec<(i32,)> = conn.exec_collect("select n", &[]).unwrap();
    assert_eq!(rows, vec![(2,)]);
    conn.close().unwrap();
    server.join();
}

#[test]
fn portal_fetches_in_chunks() {
    let server = MockServer::start(|conn| {
        conn.handshake();

        // Prepare
        conn.read_until_sync();
        conn.send_parse_complete();
        conn.send_parameter_description(&[]);
        conn.send_int4_row_description("n", 1);
        conn.send_ready(b'I');

        // Bind + Describe(portal) + Flush
        let bind = conn.expect(b'B');
        let (portal, _) = read_cstr(&bind).unwrap();
        assert_eq!(portal, "");
        conn.expect(b'D');
        conn.expect(b'H');
        conn.send_bind_complete();
        conn.send_int4_row_description("n", 1);

        // First Execute(2) + Flush: two rows then suspended
        conn.expect(b'E');
        conn.expect(b'H');
        conn.send_data_row(&[Some(&1_i32.to_be_bytes())]);
        conn.send_data_row(&[Some(&2_i32.to_be_bytes())]);
        conn.send(b's', &[]);

        // Second Execute(2) + Flush: final row and completion
        conn.expect(b'E');
        conn.expect(b'H');
        conn.send_data_row(&[Some(&3_i32.to_be_bytes())]);
        conn.send_command_complete("SELECT 3");

        // Close(portal) + Sync
        conn.expect(b'C');
        conn.expect(b'S');
        conn.send_close_complete();
        conn.send_ready(b'I');

        assert_eq!(conn.read_message().0, b'X');
    });

    let mut conn = Conn::connect(server.config()).unwrap();
    let mut handler: pglink::CollectHandler<(i32,)> = pglink::CollectHandler::new();
    let mut portal = conn.portal("select n", &[], &mut handler).unwrap();
    assert!(portal.fetch(2).unwrap());
    assert!(!portal.fetch(2).unwrap());
    assert_eq!(portal.rows_affected(), Some(3));
    portal.close().unwrap();
    assert_eq!(handler.into_rows(), vec![(1,), (2,), (3,)]);
    conn.close().unwrap();
    server.join();
}
