//! End-to-end tests for the WebSocket transport: direct handshake,
//! probe/upgrade choreography from a live polling session, and the
//! upgrade timeout, driven with a real WebSocket client.

use std::{
    net::SocketAddr,
    sync::{Arc, OnceLock},
    time::Duration,
};

use engineio_server::{PacketType, Payload, ServerBuilder, Session};
use futures::{SinkExt, StreamExt};
use testresult::TestResult;
use tokio::net::TcpListener;
use tokio_tungstenite::{connect_async, tungstenite::Message};

fn init_tracing() {
    static ONCE: OnceLock<()> = OnceLock::new();
    ONCE.get_or_init(|| {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
            )
            .with_test_writer()
            .init();
    });
}

fn echo_server() -> ServerBuilder {
    ServerBuilder::new(|session: Arc<Session>| async move {
        while let Ok(msg) = session.recv().await {
            if session.send(msg).await.is_err() {
                break;
            }
        }
    })
}

async fn start_server(builder: ServerBuilder) -> SocketAddr {
    let router = builder.into_router();
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local_addr");
    tokio::spawn(async move {
        axum::serve(listener, router).await.expect("serve");
    });
    addr
}

fn ws_url(addr: SocketAddr, sid: Option<&str>) -> String {
    match sid {
        Some(sid) => format!("ws://{addr}/engine.io/?transport=websocket&sid={sid}"),
        None => format!("ws://{addr}/engine.io/?transport=websocket"),
    }
}

fn session_url(addr: SocketAddr, sid: &str) -> String {
    format!("http://{addr}/engine.io/?transport=polling&sid={sid}")
}

/// Polling handshake, returning the session id.
async fn polling_handshake(client: &reqwest::Client, addr: SocketAddr) -> String {
    let body = client
        .get(format!("http://{addr}/engine.io/?transport=polling"))
        .send()
        .await
        .expect("handshake request")
        .bytes()
        .await
        .expect("handshake body");
    let payload = Payload::decode(&body).expect("handshake payload");
    let handshake: serde_json::Value =
        serde_json::from_slice(payload.packets()[0].data()).expect("handshake json");
    handshake["sid"].as_str().expect("sid").to_owned()
}

type WsClient =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// Read the next text frame off the client socket.
async fn next_text(ws: &mut WsClient) -> String {
    let frame = tokio::time::timeout(Duration::from_secs(5), ws.next())
        .await
        .expect("frame before timeout")
        .expect("stream still open")
        .expect("frame");
    frame.into_text().expect("text frame")
}

// ─── Tests ───────────────────────────────────────────────────────────

#[tokio::test]
async fn direct_websocket_handshake_opens_with_json() -> TestResult {
    init_tracing();
    let addr = start_server(echo_server()).await;

    let (mut ws, _) = connect_async(ws_url(addr, None)).await?;
    let open = next_text(&mut ws).await;
    assert!(open.starts_with('0'), "expected OPEN frame, got {open}");

    let handshake: serde_json::Value = serde_json::from_str(&open[1..])?;
    assert_eq!(handshake["sid"].as_str().expect("sid").len(), 20);
    assert_eq!(handshake["upgrades"][0], "websocket");

    Ok(())
}

#[tokio::test]
async fn direct_websocket_echoes_messages() -> TestResult {
    init_tracing();
    let addr = start_server(echo_server()).await;

    let (mut ws, _) = connect_async(ws_url(addr, None)).await?;
    let _open = next_text(&mut ws).await;

    ws.send(Message::Text("4hello".into())).await?;
    assert_eq!(next_text(&mut ws).await, "4hello");

    ws.send(Message::Text("4again".into())).await?;
    assert_eq!(next_text(&mut ws).await, "4again");

    Ok(())
}

#[tokio::test]
async fn websocket_ping_is_answered_with_pong() -> TestResult {
    init_tracing();
    let addr = start_server(echo_server()).await;

    let (mut ws, _) = connect_async(ws_url(addr, None)).await?;
    let _open = next_text(&mut ws).await;

    ws.send(Message::Text("2abc".into())).await?;
    assert_eq!(next_text(&mut ws).await, "3abc");

    Ok(())
}

#[tokio::test]
async fn websocket_with_unknown_sid_gets_error_envelope() -> TestResult {
    init_tracing();
    let addr = start_server(echo_server()).await;

    let (mut ws, _) = connect_async(ws_url(addr, Some("bogus"))).await?;
    let frame = tokio::time::timeout(Duration::from_secs(5), ws.next())
        .await?
        .expect("frame")?;
    assert_eq!(
        frame.into_text()?,
        r#"{"code":1,"message":"Session ID unknown"}"#
    );

    match ws.next().await {
        None | Some(Ok(Message::Close(_))) | Some(Err(_)) => {}
        Some(Ok(other)) => panic!("expected the stream to close, got {other:?}"),
    }

    Ok(())
}

#[tokio::test]
async fn upgrade_probe_completes_pending_poll_and_switches_transport() -> TestResult {
    init_tracing();
    let addr = start_server(echo_server()).await;
    let client = reqwest::Client::new();
    let sid = polling_handshake(&client, addr).await;

    // Park a long-poll GET before probing.
    let pending_get = tokio::spawn({
        let client = client.clone();
        let url = session_url(addr, &sid);
        async move {
            client
                .get(url)
                .send()
                .await
                .expect("pending get")
                .text()
                .await
                .expect("pending get body")
        }
    });
    tokio::time::sleep(Duration::from_millis(100)).await;

    let (mut ws, _) = connect_async(ws_url(addr, Some(&sid))).await?;

    // Probe: ping "probe" is mirrored and a NOOP releases the poll.
    ws.send(Message::Text("2probe".into())).await?;
    assert_eq!(next_text(&mut ws).await, "3probe");
    assert_eq!(pending_get.await?, "1:6");

    // Commit the upgrade; traffic now flows over the socket.
    ws.send(Message::Text("5".into())).await?;
    ws.send(Message::Text("4after".into())).await?;
    assert_eq!(next_text(&mut ws).await, "4after");

    // The polling side is no longer served.
    let resp = client.get(session_url(addr, &sid)).send().await?;
    assert_eq!(resp.status(), 400);

    Ok(())
}

#[tokio::test]
async fn messages_queued_before_upgrade_are_not_lost() -> TestResult {
    init_tracing();
    let addr = start_server(echo_server()).await;
    let client = reqwest::Client::new();
    let sid = polling_handshake(&client, addr).await;

    // The echo handler queues a reply on the polling transport.
    let resp = client
        .post(session_url(addr, &sid))
        .body("8:4queued.")
        .send()
        .await?;
    assert_eq!(resp.text().await?, "ok");
    tokio::time::sleep(Duration::from_millis(100)).await;

    let (mut ws, _) = connect_async(ws_url(addr, Some(&sid))).await?;
    ws.send(Message::Text("2probe".into())).await?;
    assert_eq!(next_text(&mut ws).await, "3probe");
    ws.send(Message::Text("5".into())).await?;

    // With no GET outstanding, the writer drains the queue: the queued
    // message and then the probe NOOP arrive over the socket.
    let mut drained = Vec::new();
    for _ in 0..2 {
        drained.push(next_text(&mut ws).await);
    }
    assert!(
        drained.contains(&"4queued.".to_owned()),
        "queued message lost across upgrade: {drained:?}"
    );

    Ok(())
}

#[tokio::test]
async fn stalled_probe_times_out_and_keeps_polling_alive() -> TestResult {
    init_tracing();
    let addr = start_server(echo_server().upgrade_timeout(Duration::from_millis(200))).await;
    let client = reqwest::Client::new();
    let sid = polling_handshake(&client, addr).await;

    let (mut ws, _) = connect_async(ws_url(addr, Some(&sid))).await?;
    // Send nothing: the server must drop the candidate socket.
    let outcome = tokio::time::timeout(Duration::from_secs(2), ws.next()).await?;
    match outcome {
        None | Some(Ok(Message::Close(_))) | Some(Err(_)) => {}
        Some(Ok(other)) => panic!("expected the stream to close, got {other:?}"),
    }

    // The polling session is untouched and can still echo.
    let resp = client
        .post(session_url(addr, &sid))
        .body("6:4still")
        .send()
        .await?;
    assert_eq!(resp.text().await?, "ok");
    let body = client
        .get(session_url(addr, &sid))
        .send()
        .await?
        .bytes()
        .await?;
    let payload = Payload::decode(&body)?;
    assert_eq!(payload.packets()[0].packet_type(), PacketType::Message);
    assert_eq!(payload.packets()[0].data(), b"still");

    Ok(())
}

#[tokio::test]
async fn client_close_packet_ends_the_session() -> TestResult {
    init_tracing();
    let addr = start_server(echo_server()).await;

    let (mut ws, _) = connect_async(ws_url(addr, None)).await?;
    let _open = next_text(&mut ws).await;

    ws.send(Message::Text("1".into())).await?;

    // The writer task shuts the socket down as the session closes.
    let outcome = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match ws.next().await {
                None | Some(Ok(Message::Close(_))) | Some(Err(_)) => break,
                Some(Ok(_)) => {}
            }
        }
    })
    .await;
    assert!(outcome.is_ok(), "socket did not close after CLOSE packet");

    Ok(())
}
