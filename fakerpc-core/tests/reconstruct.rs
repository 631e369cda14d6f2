//! Reconstruction of request/response pairs from recorded logs

use std::net::SocketAddr;

use fakerpc_core::{Connections, FakeRpcError, Log, Transmission};

fn cli(port: u16) -> SocketAddr {
    SocketAddr::from(([192, 168, 14, 186], port))
}

fn srv() -> SocketAddr {
    SocketAddr::from(([192, 168, 16, 50], 80))
}

fn recorded_log() -> Log {
    let pairs: &[(u16, &str, &str)] = &[
        (
            46793,
            "POST /1 HTTP/1.1\r\n\r\nHAI",
            "HTTP/1.1 200 OK\nContent-Length: 4\r\n\r\nHAAI",
        ),
        (
            46793,
            "POST /2 HTTP/1.1\nContent-Length: 4\nConnection: close\r\n\r\nBAAI",
            "HTTP/1.1 200 OK\nContent-Length: 5\r\n\r\nBAAAI",
        ),
        (
            46794,
            "POST /3 HTTP/1.1\nConnection: close\r\n\r\nHAI",
            "HTTP/1.1 200 OK\r\n\r\n",
        ),
        (
            46795,
            "POST /4 HTTP/1.1\nContent-Length: 4\r\n\r\nHAAICho3wama",
            "HTTP/1.1 200 OK\nContent-Length: 5\r\n\r\nHAAAI",
        ),
        (
            46795,
            "POST /5 HTTP/1.1\nContent-Length: 6\nConnection: close\r\n\r\nBAAAAIEichee6e",
            "HTTP/1.1 200 OK\nContent-Length: 7\r\n\r\nBAIBAAI",
        ),
    ];

    let mut log = Log::new();
    for (port, req, res) in pairs {
        log.push(Transmission::new(cli(*port), srv()).with_raw(*req));
        log.push(Transmission::new(srv(), cli(*port)).with_raw(*res));
    }
    log
}

#[test]
fn test_groups_follow_first_appearance() {
    let conns = Connections::from_log(&recorded_log()).unwrap();

    // (path, body, close, response)
    let expected: Vec<Vec<(&str, &str, bool, &str)>> = vec![
        vec![
            ("/1", "HAI", false, "HTTP/1.1 200 OK\nContent-Length: 4\r\n\r\nHAAI"),
            ("/2", "BAAI", true, "HTTP/1.1 200 OK\nContent-Length: 5\r\n\r\nBAAAI"),
        ],
        vec![("/3", "HAI", true, "HTTP/1.1 200 OK\r\n\r\n")],
        vec![
            ("/4", "HAAI", false, "HTTP/1.1 200 OK\nContent-Length: 5\r\n\r\nHAAAI"),
            ("/5", "BAAAAI", true, "HTTP/1.1 200 OK\nContent-Length: 7\r\n\r\nBAIBAAI"),
        ],
    ];

    assert_eq!(conns.len(), expected.len());
    assert_eq!(conns.total(), 5);
    for (i, (group, exp)) in conns.iter().zip(&expected).enumerate() {
        assert_eq!(group.len(), exp.len(), "group {i}");
        for (j, (conn, (path, body, close, res))) in group.iter().zip(exp).enumerate() {
            assert_eq!(conn.request.method, http::Method::POST, "conn[{i}][{j}]");
            assert_eq!(conn.request.path(), *path, "conn[{i}][{j}]");
            assert_eq!(conn.request.close, *close, "conn[{i}][{j}]");
            assert_eq!(&conn.request_body[..], body.as_bytes(), "conn[{i}][{j}]");
            assert_eq!(&conn.response[..], res.as_bytes(), "conn[{i}][{j}]");
        }
    }
}

#[test]
fn test_reconstruction_is_deterministic() {
    let log = recorded_log();
    assert_eq!(
        Connections::from_log(&log).unwrap(),
        Connections::from_log(&log).unwrap()
    );
}

#[test]
fn test_invalid_logs_fail_whole_reconstruction() {
    let one = |raw: &str| {
        let mut log = Log::new();
        log.push(Transmission::new(cli(46793), srv()).with_raw(raw));
        log
    };

    let cases = vec![
        (Log::new(), "EMPTY_CAPTURE"),
        (one(""), "MALFORMED_REQUEST"),
        (one("Ic0aethu"), "MALFORMED_REQUEST"),
        (
            one("HTTP/1.1 200 OK\nContent-Length: 4\r\n\r\nX"),
            "MALFORMED_REQUEST",
        ),
        (
            one("POST / HTTP/1.1\r\nContent-Length: 4\r\n\r\nX"),
            "TRUNCATED_BODY",
        ),
    ];

    for (i, (log, code)) in cases.into_iter().enumerate() {
        let err = Connections::from_log(&log).unwrap_err();
        assert_eq!(err.error_code(), code, "case {i}: {err}");
    }
}

#[test]
fn test_truncated_body_after_valid_pairs() {
    let mut log = recorded_log();
    log.push(
        Transmission::new(cli(46796), srv())
            .with_raw("POST /6 HTTP/1.1\r\nContent-Length: 10\r\n\r\nshort"),
    );

    match Connections::from_log(&log) {
        Err(FakeRpcError::TruncatedBody { index, .. }) => assert_eq!(index, 10),
        other => panic!("expected truncated body, got {other:?}"),
    }
}
