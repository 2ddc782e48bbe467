//! Live session transport tests against a local websocket server

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use secrecy::SecretString;
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::Message;

use oracle_voice::voice::encode_capture_frame;
use oracle_voice::{Error, LiveConnector, SessionConfig, SessionConnector, SessionEvent};

#[tokio::test]
async fn test_live_session_round_trip() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();

        let setup = ws.next().await.unwrap().unwrap();
        let setup: Value = serde_json::from_str(setup.to_text().unwrap()).unwrap();
        ws.send(Message::Text(r#"{"setupComplete":{}}"#.into()))
            .await
            .unwrap();

        let input = ws.next().await.unwrap().unwrap();
        let input: Value = serde_json::from_str(input.to_text().unwrap()).unwrap();

        let content =
            br#"{"serverContent":{"outputTranscription":{"text":"hi"},"turnComplete":true}}"#;
        ws.send(Message::Binary(content.to_vec().into()))
            .await
            .unwrap();
        ws.close(None).await.unwrap();

        (setup, input)
    });

    let connector = LiveConnector::new(SecretString::from("test-key"))
        .with_endpoint(format!("ws://{addr}/live"));
    let (tx, mut rx) = mpsc::channel(16);

    let session = connector
        .connect(SessionConfig::new("test-model", "Be kind.", "Kore"), tx)
        .await
        .unwrap();

    assert_eq!(rx.recv().await, Some(SessionEvent::Open));

    let blob = encode_capture_frame(&[0.25; 8]);
    session.send_realtime_input(blob.clone()).unwrap();

    let Some(SessionEvent::Message(message)) = rx.recv().await else {
        panic!("expected server content");
    };
    assert_eq!(message.output_transcription.as_deref(), Some("hi"));
    assert!(message.turn_complete);

    assert_eq!(rx.recv().await, Some(SessionEvent::Closed));

    let (setup, input) = server.await.unwrap();
    assert_eq!(setup["setup"]["model"], "models/test-model");
    assert_eq!(setup["setup"]["systemInstruction"]["parts"][0]["text"], "Be kind.");
    assert_eq!(input["realtimeInput"]["mediaChunks"][0]["data"], blob.data);
}

#[tokio::test]
async fn test_client_close_ends_link() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        let _setup = ws.next().await;

        // Wait for the client's close frame
        while let Some(Ok(message)) = ws.next().await {
            if message.is_close() {
                return true;
            }
        }
        false
    });

    let connector =
        LiveConnector::new(SecretString::from("k")).with_endpoint(format!("ws://{addr}/"));
    let (tx, _rx) = mpsc::channel(16);
    let mut session = connector
        .connect(SessionConfig::new("m", "x", "Kore"), tx)
        .await
        .unwrap();

    session.close();
    assert!(server.await.unwrap());
    assert!(matches!(
        session.send_realtime_input(encode_capture_frame(&[0.0])),
        Err(Error::Session(_))
    ));
}

#[tokio::test]
async fn test_connect_refused_is_session_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let connector =
        LiveConnector::new(SecretString::from("k")).with_endpoint(format!("ws://{addr}/"));
    let (tx, _rx) = mpsc::channel(1);

    let result = connector
        .connect(SessionConfig::new("m", "x", "Kore"), tx)
        .await;
    assert!(matches!(result, Err(Error::Session(_))));
}

#[tokio::test]
async fn test_stalled_upgrade_times_out() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    // Accept the TCP connection but never answer the websocket upgrade
    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        tokio::time::sleep(Duration::from_secs(30)).await;
        drop(stream);
    });

    let connector = LiveConnector::new(SecretString::from("k"))
        .with_endpoint(format!("ws://{addr}/"))
        .with_connect_timeout(Duration::from_millis(200));
    let (tx, _rx) = mpsc::channel(1);

    let result = tokio::time::timeout(
        Duration::from_secs(5),
        connector.connect(SessionConfig::new("m", "x", "Kore"), tx),
    )
    .await
    .expect("connect should give up on its own");
    assert!(matches!(result, Err(Error::Session(_))));

    server.abort();
}
