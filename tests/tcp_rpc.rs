//! TCP transport integration tests — frame→dispatch→response round-trips
//! against a live listener.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;

use mprpc::message::{write_frame, Message};
use mprpc::transport::TcpClientTransport;
use mprpc::{Client, Error, MethodDispatcher, RpcConfig, Server};

fn test_dispatcher() -> Arc<MethodDispatcher> {
    Arc::new(
        MethodDispatcher::new()
            .method("echo", |params| async move {
                Ok(params.into_iter().next().unwrap_or(Value::Null))
            })
            .method("boom", |_params| async move {
                Err(Error::dispatch("handler raised"))
            }),
    )
}

/// Helper: spin up a server on a random port, return (addr, server).
async fn start_test_server() -> (std::net::SocketAddr, Arc<Server>) {
    mprpc::observability::init_tracing();

    // Bind temporarily to get a free port, then drop immediately
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let server = Server::new();
    server
        .clone()
        .listen_addr(addr, Some(test_dispatcher()))
        .await
        .unwrap();
    (addr, server)
}

/// Helper: read one length-prefixed frame off the stream and decode it.
async fn read_reply(stream: &mut TcpStream) -> Message {
    let mut len_buf = [0u8; 4];
    stream.read_exact(&mut len_buf).await.unwrap();
    let frame_len = u32::from_be_bytes(len_buf) as usize;
    let mut payload = vec![0u8; frame_len];
    stream.read_exact(&mut payload).await.unwrap();
    Message::decode(&payload).unwrap()
}

#[tokio::test]
async fn raw_frame_round_trip() {
    let (addr, server) = start_test_server().await;
    let mut stream = TcpStream::connect(addr).await.unwrap();

    let request = Message::Request {
        id: 1,
        method: "echo".to_string(),
        params: vec![json!("hello")],
    }
    .encode()
    .unwrap();
    write_frame(&mut stream, &request).await.unwrap();

    let reply = read_reply(&mut stream).await;
    assert_eq!(
        reply,
        Message::Response {
            id: 1,
            error: None,
            result: Some(json!("hello")),
        }
    );

    server.close().await;
}

#[tokio::test]
async fn client_session_round_trip() {
    let (addr, server) = start_test_server().await;

    let transport = Arc::new(TcpClientTransport::new(addr, RpcConfig::default()));
    let client = Client::connect(transport).await.unwrap();

    let result = client
        .call_timeout("echo", vec![json!(123)], Duration::from_secs(5))
        .await
        .unwrap();
    assert_eq!(result, json!(123));

    let err = client
        .call_timeout("boom", vec![], Duration::from_secs(5))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Remote(_)));

    client.close().await.unwrap();
    server.close().await;
}

#[tokio::test]
async fn out_of_order_completion_correlates_by_id() {
    // Slow handler first, fast handler second: the replies arrive out of
    // order but each call resolves with its own value.
    let dispatcher = Arc::new(
        MethodDispatcher::new()
            .method("slow", |params| async move {
                tokio::time::sleep(Duration::from_millis(150)).await;
                Ok(params.into_iter().next().unwrap_or(Value::Null))
            })
            .method("fast", |params| async move {
                Ok(params.into_iter().next().unwrap_or(Value::Null))
            }),
    );

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let server = Server::new();
    server.clone().listen_addr(addr, Some(dispatcher)).await.unwrap();

    // Two connections so the slow call does not head-of-line block the
    // fast one inside a single delivery loop.
    let slow_client = Client::connect(Arc::new(TcpClientTransport::new(
        addr,
        RpcConfig::default(),
    )))
    .await
    .unwrap();
    let fast_client = Client::connect(Arc::new(TcpClientTransport::new(
        addr,
        RpcConfig::default(),
    )))
    .await
    .unwrap();

    let slow = {
        let client = slow_client.clone();
        tokio::spawn(async move {
            client
                .call_timeout("slow", vec![json!("s")], Duration::from_secs(5))
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    let fast = fast_client
        .call_timeout("fast", vec![json!("f")], Duration::from_secs(5))
        .await
        .unwrap();

    assert_eq!(fast, json!("f"));
    assert_eq!(slow.await.unwrap().unwrap(), json!("s"));

    server.close().await;
}

#[tokio::test]
async fn notify_never_gets_a_reply() {
    let (addr, server) = start_test_server().await;
    let mut stream = TcpStream::connect(addr).await.unwrap();

    let notify = Message::Notify {
        method: "echo".to_string(),
        params: vec![json!("x")],
    }
    .encode()
    .unwrap();
    write_frame(&mut stream, &notify).await.unwrap();

    // No frame may arrive on this connection.
    let mut buf = [0u8; 1];
    let read = tokio::time::timeout(Duration::from_millis(300), stream.read(&mut buf)).await;
    assert!(read.is_err(), "unexpected reply frame after a notify");

    server.close().await;
}

#[tokio::test]
async fn undecodable_frame_does_not_drop_the_connection() {
    let (addr, server) = start_test_server().await;
    let mut stream = TcpStream::connect(addr).await.unwrap();

    write_frame(&mut stream, b"garbage").await.unwrap();

    let request = Message::Request {
        id: 2,
        method: "echo".to_string(),
        params: vec![json!("after garbage")],
    }
    .encode()
    .unwrap();
    write_frame(&mut stream, &request).await.unwrap();

    let reply = read_reply(&mut stream).await;
    assert_eq!(
        reply,
        Message::Response {
            id: 2,
            error: None,
            result: Some(json!("after garbage")),
        }
    );

    server.close().await;
}

#[tokio::test]
async fn bind_conflict_is_a_bind_error() {
    let (addr, server) = start_test_server().await;

    let other = Server::new();
    let err = other
        .clone()
        .listen_addr(addr, Some(test_dispatcher()))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Bind(_)));

    server.close().await;
}

#[tokio::test]
async fn listen_with_dispatcher_twice_is_a_configuration_error() {
    let (_addr, server) = start_test_server().await;

    // First listen already bound a dispatcher; a second implicit serve
    // must fail before any new transport is registered.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr2 = listener.local_addr().unwrap();
    drop(listener);

    let err = server
        .clone()
        .listen_addr(addr2, Some(test_dispatcher()))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Configuration(_)));

    server.close().await;
}

#[tokio::test]
async fn close_stops_accepting_connections() {
    let (addr, server) = start_test_server().await;
    server.close().await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    // The listener is gone: either the connect is refused outright, or an
    // accepted-then-dropped socket yields EOF before any reply.
    match TcpStream::connect(addr).await {
        Err(_) => {}
        Ok(mut stream) => {
            let request = Message::Request {
                id: 9,
                method: "echo".to_string(),
                params: vec![],
            }
            .encode()
            .unwrap();
            let _ = write_frame(&mut stream, &request).await;
            let mut buf = [0u8; 1];
            let read =
                tokio::time::timeout(Duration::from_millis(300), stream.read(&mut buf)).await;
            match read {
                Ok(Ok(0)) | Ok(Err(_)) | Err(_) => {}
                Ok(Ok(_)) => panic!("server replied after close"),
            }
        }
    }
}
