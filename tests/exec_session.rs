//! Exec sessions end to end against a mock daemon over TCP.

use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;

use exec_hijack::config::{load_config_str, ClientConfig};
use exec_hijack::hijack::HijackError;
use exec_hijack::net::{Connector, EndpointConnector};
use exec_hijack::Exec;

mod common;
use common::{start_mock_daemon, Behavior, FailingInput};

fn exec_for(address: String, handshake_wait_ms: u64) -> Exec {
    let mut config = ClientConfig::default();
    config.endpoint.address = address;
    config.endpoint.api_version = Some("v1.41".to_string());
    config.timeouts.handshake_wait_ms = handshake_wait_ms;

    let connector: Arc<dyn Connector> = Arc::new(EndpointConnector::from_config(&config).unwrap());
    Exec::new("4f2a9c", connector, &config)
}

#[tokio::test]
async fn test_start_relays_input_and_streams_output() {
    let daemon = start_mock_daemon(Behavior::Echo).await;
    let exec = exec_for(daemon.address(), 3000);

    let mut session = exec
        .start(false, true, Some(Box::new(Cursor::new(b"hello\nexit\n".to_vec()))))
        .await
        .unwrap();
    assert_eq!(session.status().as_u16(), 200);
    assert_eq!(
        session.headers().get("content-type").unwrap(),
        "application/vnd.docker.raw-stream"
    );

    let output = tokio::time::timeout(Duration::from_secs(5), session.read_output_to_end())
        .await
        .expect("output did not end")
        .unwrap();
    assert_eq!(&output[..], b"hello\nexit\nbye\n");

    tokio::time::timeout(Duration::from_secs(2), async {
        while !session.input_finished() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("relay did not finish");
    assert_eq!(session.finish().await.unwrap(), Some(11));

    let requests = daemon.requests();
    assert_eq!(requests.len(), 1);
    let head = &requests[0].head;
    assert!(head.starts_with("POST /v1.41/exec/4f2a9c/start HTTP/1.1\r\n"));
    assert!(head.contains("upgrade: tcp\r\n"));
    assert!(head.contains("connection: Upgrade\r\n"));
    assert!(head.contains("content-type: application/json\r\n"));
    assert_eq!(requests[0].body, br#"{"Detach":false,"Tty":true}"#.to_vec());
}

#[tokio::test]
async fn test_start_without_input_still_streams_output() {
    let daemon = start_mock_daemon(Behavior::Greet(b"no stdin attached\n")).await;
    let exec = exec_for(daemon.address(), 3000);

    let mut session = exec.start(true, false, None).await.unwrap();
    let output = session.read_output_to_end().await.unwrap();
    assert_eq!(&output[..], b"no stdin attached\n");
    assert!(session.finish().await.is_ok());
    assert_eq!(
        daemon.requests()[0].body,
        br#"{"Detach":true,"Tty":false}"#.to_vec()
    );
}

#[tokio::test]
async fn test_finish_stops_a_running_session() {
    let daemon = start_mock_daemon(Behavior::Echo).await;
    let exec = exec_for(daemon.address(), 3000);

    // Input that stays open until the session is finished.
    let (_producer, source) = tokio::io::duplex(16);
    let session = exec.start(false, false, Some(Box::new(source))).await.unwrap();
    assert!(!session.input_finished());

    let finished = tokio::time::timeout(Duration::from_secs(2), session.finish())
        .await
        .expect("finish hung");
    assert_eq!(finished.unwrap(), None);
}

#[tokio::test]
async fn test_finish_reports_input_failure() {
    let daemon = start_mock_daemon(Behavior::Echo).await;
    let exec = exec_for(daemon.address(), 3000);

    let session = exec
        .start(false, false, Some(Box::new(FailingInput::after(b"ls"))))
        .await
        .unwrap();
    tokio::time::timeout(Duration::from_secs(2), async {
        while !session.input_finished() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("relay did not stop on input failure");

    let err = session.finish().await.unwrap_err();
    assert!(matches!(err, HijackError::Transport(_)), "got {:?}", err);
}

#[tokio::test]
async fn test_start_rejected_by_daemon() {
    let daemon =
        start_mock_daemon(Behavior::Reply(404, r#"{"message":"No such exec instance"}"#)).await;
    let exec = exec_for(daemon.address(), 3000);

    let err = exec.start(false, false, None).await.unwrap_err();
    match err {
        HijackError::Protocol { status, body } => {
            assert_eq!(status, 404);
            assert_eq!(&body[..], br#"{"message":"No such exec instance"}"#);
        }
        other => panic!("expected a protocol error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_start_without_response_reports_no_upgrade() {
    let daemon = start_mock_daemon(Behavior::Silent).await;
    let exec = exec_for(daemon.address(), 100);

    let err = exec.start(false, false, None).await.unwrap_err();
    assert!(matches!(err, HijackError::NoUpgrade(100)));
}

#[tokio::test]
async fn test_inspect() {
    let daemon = start_mock_daemon(Behavior::Reply(
        200,
        r#"{"ID":"4f2a9c","Running":false,"ExitCode":0}"#,
    ))
    .await;
    let exec = exec_for(daemon.address(), 3000);

    let info = exec.inspect().await.unwrap();
    assert_eq!(info["ID"], "4f2a9c");
    assert_eq!(info["ExitCode"], 0);
    assert!(daemon.requests()[0]
        .head
        .starts_with("GET /v1.41/exec/4f2a9c/json HTTP/1.1\r\n"));
}

#[tokio::test]
async fn test_inspect_unexpected_status() {
    let daemon = start_mock_daemon(Behavior::Reply(500, r#"{"message":"boom"}"#)).await;
    let exec = exec_for(daemon.address(), 3000);

    let err = exec.inspect().await.unwrap_err();
    match err {
        HijackError::UnexpectedStatus {
            uri,
            expected,
            actual,
            body,
        } => {
            assert_eq!(uri, "/v1.41/exec/4f2a9c/json");
            assert_eq!(expected, 200);
            assert_eq!(actual, 500);
            assert_eq!(&body[..], br#"{"message":"boom"}"#);
        }
        other => panic!("expected an unexpected-status error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_config_file_drives_the_client() {
    let daemon = start_mock_daemon(Behavior::Greet(b"ok\n")).await;
    let config = load_config_str(&format!(
        "[endpoint]\naddress = \"{}\"\n\n[relay]\nchunk_size = 2\n",
        daemon.address()
    ))
    .unwrap();

    let connector = Arc::new(EndpointConnector::from_config(&config).unwrap());
    let exec = Exec::new("4f2a9c", connector, &config);
    assert_eq!(exec.base_path(), "/exec/4f2a9c");

    let mut session = exec.start(false, false, None).await.unwrap();
    assert_eq!(&session.read_output_to_end().await.unwrap()[..], b"ok\n");
}
