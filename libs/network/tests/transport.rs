//! Transport behaviour over in-memory connections.

use async_trait::async_trait;
use bytes::Bytes;
use network::{
    dial, handler_fn, Acceptor, AcceptorOptions, BoundDelegate, DialOptions, End, Message,
    MemoryNetwork, Request, Response, TransportError, INBOUND_QUEUE,
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use types::FrontierError;

#[derive(Default)]
struct Recorder {
    offline: AtomicUsize,
    heartbeats: AtomicUsize,
    registrations: Mutex<Vec<String>>,
}

#[async_trait]
impl BoundDelegate for Recorder {
    async fn get_client_id(&self, meta: &[u8], wanted: Option<u64>) -> Result<u64, FrontierError> {
        if meta == b"deny" {
            return Err(FrontierError::ServiceNotOnline);
        }
        Ok(wanted.unwrap_or(1000))
    }

    async fn connection_offline(&self, _end: &End) {
        self.offline.fetch_add(1, Ordering::SeqCst);
    }

    async fn heartbeat(&self, _end: &End) {
        self.heartbeats.fetch_add(1, Ordering::SeqCst);
    }

    async fn remote_registration(&self, _end: &End, _stream_id: u64, method: &str) {
        self.registrations.lock().push(method.to_string());
    }
}

async fn pair(options: DialOptions) -> (Arc<Recorder>, Acceptor, End, End) {
    let net = MemoryNetwork::new();
    let listener = net.listen("gateway").unwrap();
    let recorder = Arc::new(Recorder::default());
    let acceptor = Acceptor::new(listener, recorder.clone(), AcceptorOptions::default());
    let dialed = dial(&net, "gateway", options).await.unwrap();
    let accepted = acceptor.accept().await.unwrap();
    (recorder, acceptor, dialed, accepted)
}

async fn eventually(mut check: impl FnMut() -> bool) {
    for _ in 0..200 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached");
}

#[tokio::test]
async fn test_handshake_assigns_wanted_id() {
    let (_, _acceptor, dialed, accepted) =
        pair(DialOptions::default().with_client_id(42).with_meta("m")).await;
    assert_eq!(dialed.client_id(), 42);
    assert_eq!(accepted.client_id(), 42);
    assert_eq!(accepted.meta().as_ref(), b"m");
    assert!(accepted.remote_addr().starts_with("mem:"));
    assert_eq!(accepted.network(), "mem");
}

#[tokio::test]
async fn test_rejected_handshake_carries_reason() {
    let net = MemoryNetwork::new();
    let listener = net.listen("gateway").unwrap();
    let _acceptor = Acceptor::new(listener, Arc::new(Recorder::default()), AcceptorOptions::default());

    let err = dial(&net, "gateway", DialOptions::default().with_meta("deny"))
        .await
        .unwrap_err();
    assert_eq!(err, TransportError::Rejected("service not online".to_string()));
}

#[tokio::test]
async fn test_call_reaches_registered_handler() {
    let (recorder, _acceptor, dialed, accepted) = pair(DialOptions::default()).await;

    dialed
        .register("echo", handler_fn(|req: Request| async move {
            Response::ok(req.data).with_custom(req.custom)
        }))
        .unwrap();
    eventually(|| recorder.registrations.lock().contains(&"echo".to_string())).await;

    let response = accepted
        .call(Request::new("echo", "hi").with_custom(vec![1u8, 2]))
        .await
        .unwrap();
    assert_eq!(response.data.as_ref(), b"hi");
    assert_eq!(response.custom.as_ref(), &[1, 2]);

    let err = accepted.call(Request::new("missing", "")).await.unwrap_err();
    assert_eq!(FrontierError::from(err), FrontierError::RpcNotOnline);
}

#[tokio::test]
async fn test_accepted_end_holds_requests_until_hijacked() {
    let (_, _acceptor, dialed, accepted) = pair(DialOptions::default()).await;

    let call = tokio::spawn(async move { dialed.call(Request::new("anything", "x")).await });
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!call.is_finished());

    accepted
        .hijack(handler_fn(|req: Request| async move {
            Response::ok(format!("{}:{}", req.method, String::from_utf8_lossy(&req.data)))
        }))
        .unwrap();

    let response = call.await.unwrap().unwrap();
    assert_eq!(response.data.as_ref(), b"anything:x");
}

#[tokio::test]
async fn test_publish_is_acknowledged() {
    let (_, _acceptor, dialed, accepted) = pair(DialOptions::default()).await;

    let consumer = tokio::spawn(async move {
        let first = accepted.receive().await.unwrap();
        assert_eq!(first.topic(), "t");
        first.done();
        let second = accepted.receive().await.unwrap();
        second.error(FrontierError::TopicNotOnline);
        let third = accepted.receive().await.unwrap();
        drop(third);
    });

    dialed.publish(Message::new("t", "a")).await.unwrap();
    let err = dialed.publish(Message::new("u", "b")).await.unwrap_err();
    assert_eq!(FrontierError::from(err), FrontierError::TopicNotOnline);
    assert!(dialed.publish(Message::new("v", "c")).await.is_err());
    consumer.await.unwrap();
}

#[tokio::test]
async fn test_streams_carry_raw_and_close_together() {
    let (_, _acceptor, dialed, accepted) = pair(DialOptions::default()).await;

    let opened = dialed.open_stream("echo-service", "meta").await.unwrap();
    let peer_side = accepted.accept_stream().await.unwrap();
    assert_eq!(peer_side.peer(), "echo-service");
    assert_eq!(peer_side.meta().as_ref(), b"meta");
    assert_eq!(opened.stream_id() % 2, 1);
    assert_eq!(accepted.list_streams().len(), 1);

    opened.write_raw(Bytes::from_static(b"raw")).await.unwrap();
    assert_eq!(peer_side.read_raw().await.unwrap().as_ref(), b"raw");

    opened.close();
    tokio::time::timeout(Duration::from_secs(1), peer_side.closed())
        .await
        .unwrap();
    assert!(peer_side.read_raw().await.is_none());
    assert!(!accepted.is_closed());
}

#[tokio::test]
async fn test_close_fails_pending_calls_and_fires_offline_once() {
    let (recorder, _acceptor, dialed, accepted) = pair(DialOptions::default()).await;

    let pending = tokio::spawn({
        let dialed = dialed.clone();
        async move { dialed.call(Request::new("never", "")).await }
    });
    tokio::time::sleep(Duration::from_millis(20)).await;

    accepted.close();
    let err = pending.await.unwrap().unwrap_err();
    assert!(err.is_transport_level());

    tokio::time::timeout(Duration::from_secs(1), dialed.closed())
        .await
        .unwrap();
    eventually(|| recorder.offline.load(Ordering::SeqCst) == 1).await;
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(recorder.offline.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_heartbeats_reach_delegate() {
    let (recorder, _acceptor, _dialed, _accepted) =
        pair(DialOptions::default().with_heartbeat_interval(Duration::from_millis(20))).await;
    eventually(|| recorder.heartbeats.load(Ordering::SeqCst) >= 2).await;
}

#[tokio::test]
async fn test_closed_acceptor_returns_none() {
    let (_, acceptor, _dialed, _accepted) = pair(DialOptions::default()).await;
    acceptor.close();
    assert!(acceptor.accept().await.is_none());
}

#[tokio::test]
async fn test_full_raw_queue_stalls_the_connection() {
    let (_, _acceptor, dialed, accepted) = pair(DialOptions::default()).await;
    accepted
        .register("ping", handler_fn(|_request: Request| async { Response::ok("pong") }))
        .unwrap();

    let backlog = INBOUND_QUEUE + 8;
    for i in 0..backlog {
        dialed.write_raw(Bytes::from(i.to_string())).await.unwrap();
    }
    let call = tokio::spawn({
        let dialed = dialed.clone();
        async move { dialed.call(Request::new("ping", "")).await }
    });

    // The reader is parked behind the raw queue, so the request is not read yet
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(!call.is_finished());

    for i in 0..backlog {
        assert_eq!(accepted.read_raw().await.unwrap(), Bytes::from(i.to_string()));
    }
    let response = tokio::time::timeout(Duration::from_secs(2), call)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(response.data.as_ref(), b"pong");
}

#[tokio::test]
async fn test_stream_backlog_refuses_unaccepted_opens() {
    let (_, _acceptor, dialed, accepted) = pair(DialOptions::default()).await;

    for _ in 0..INBOUND_QUEUE {
        dialed.open_stream("svc", "").await.unwrap();
    }
    let err = dialed.open_stream("svc", "").await.unwrap_err();
    assert_eq!(err, TransportError::Remote("stream backlog full".to_string()));

    // Accepting one frees a slot
    accepted.accept_stream().await.unwrap();
    dialed.open_stream("svc", "").await.unwrap();
}
