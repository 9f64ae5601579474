//! LISTEN/NOTIFY scenarios.

mod common;

use std::time::Duration;

use common::MockServer;
use pglink::sync::Conn;

#[test]
fn notification_after_listen() {
    let server = MockServer::start(|conn| {
        conn.handshake();

        let query = conn.expect(b'Q');
        assert_eq!(query, b"LISTEN chan\0");
        conn.send_command_complete("LISTEN");
        conn.send_ready(b'I');

        // Another session runs NOTIFY; the server pushes it while this
        // client is idle
        conn.send_notification(777, "chan", "hello");

        assert_eq!(conn.read_message().0, b'X');
    });

    let mut conn = Conn::connect(server.config()).unwrap();
    conn.query_drop("LISTEN chan").unwrap();

    let notification = conn
        .wait_for_notification(Duration::from_secs(5))
        .unwrap()
        .expect("notification should arrive");
    assert_eq!(notification.pid, 777);
    assert_eq!(notification.channel, "chan");
    assert_eq!(notification.payload, "hello");

    conn.close().unwrap();
    server.join();
}

#[test]
fn notification_during_query_is_not_lost() {
    let server = MockServer::start(|conn| {
        conn.handshake();

        conn.expect(b'Q');
        conn.send_command_complete("LISTEN");
        conn.send_ready(b'I');

        // The notification arrives in the middle of another query's
        // response stream
        conn.expect(b'Q');
        conn.send_int4_row_description("n", 0);
        conn.send_notification(888, "chan", "mid-query");
        conn.send_data_row(&[Some(b"1")]);
        conn.send_command_complete("SELECT 1");
        conn.send_ready(b'I');

        assert_eq!(conn.read_message().0, b'X');
    });

    let mut conn = Conn::connect(server.config()).unwrap();
    conn.query_drop("LISTEN chan").unwrap();

    let rows: Vec<(i32,)> = conn.query_collect("select 1").unwrap();
    assert_eq!(rows, vec![(1,)]);

    // Delivered from the queue without touching the socket
    let notification = conn
        .wait_for_notification(Duration::from_millis(10))
        .unwrap()
        .expect("queued notification");
    assert_eq!(notification.pid, 888);
    assert_eq!(notification.payload, "mid-query");

    conn.close().unwrap();
    server.join();
}

#[test]
fn wait_times_out_quietly() {
    let server = MockServer::start(|conn| {
        conn.handshake();
        assert_eq!(conn.read_message().0, b'X');
    });

    let mut conn = Conn::connect(server.config()).unwrap();
    let got = conn
        .wait_for_notification(Duration::from_millis(50))
        .unwrap();
    assert!(got.is_none());
    assert!(!conn.is_broken());
    conn.close().unwrap();
    server.join();
}

#[test]
fn notice_goes_to_sink() {
    let server = MockServer::start(|conn| {
        conn.handshake();
        conn.expect(b'Q');
        conn.send_notice("relation already exists, skipping");
        conn.send_command_complete("CREATE TABLE");
        conn.send_ready(b'I');
        assert_eq!(conn.read_message().0, b'X');
    });

    let mut conn = Conn::connect(server.config()).unwrap();

    let seen = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
    let sink_seen = std::sync::Arc::clone(&seen);
    conn.set_notice_sink(Box::new(move |notice| {
        sink_seen.lock().unwrap().push(notice.message().to_string());
    }));

    conn.query_drop("create table if not exists t ()").unwrap();
    assert_eq!(
        seen.lock().unwrap().as_slice(),
        ["relation already exists, skipping"]
    );

    conn.close().unwrap();
    server.join();
}
