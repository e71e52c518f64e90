//! End-to-end NETCONF session tests against the scripted in-memory server.

mod support;

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::timeout;

use netman::protocol::message::CAP_BASE_1_1;
use netman::{ClientConfig, Error, Session};

use support::{Mode, ServerConfig};

const TICK: Duration = Duration::from_secs(2);

async fn open(config: ServerConfig) -> (Session, Arc<std::sync::atomic::AtomicUsize>) {
    let (transport, seen) = support::spawn(config);
    let session = timeout(TICK, Session::open(transport, ClientConfig::default()))
        .await
        .expect("open timeout")
        .expect("open session");
    (session, seen)
}

#[tokio::test]
async fn hello_then_get_over_chunked_framing() {
    let (session, _) = open(ServerConfig::base_1_1(Mode::Echo)).await;
    assert_eq!(session.session_id(), Some(4));
    assert!(session.has_capability(CAP_BASE_1_1));

    let reply = timeout(TICK, session.execute("<get><response/></get>"))
        .await
        .expect("execute timeout")
        .expect("execute");
    assert_eq!(reply.data.as_deref(), Some("<get><response/></get>"));
}

#[tokio::test]
async fn end_of_message_only_server() {
    let (session, _) = open(ServerConfig::base_1_0(Mode::Echo)).await;
    assert!(!session.has_capability(CAP_BASE_1_1));

    let data = timeout(TICK, session.get(None))
        .await
        .expect("get timeout")
        .expect("get");
    assert_eq!(data.as_deref(), Some("<get/>"));
}

#[tokio::test]
async fn three_interleaved_asyncs_deliver_without_blocking() {
    let (session, seen) = open(ServerConfig::base_1_1(Mode::ReverseBatch(3))).await;

    let mut sinks = Vec::new();
    for n in 1..=3 {
        let (tx, rx) = mpsc::channel(1);
        timeout(TICK, session.execute_async(format!("<get><test{n}/></get>"), tx))
            .await
            .expect("submit timeout")
            .expect("submit");
        sinks.push(rx);
    }

    // Replies are correlated to sinks in FIFO order, so the server's reverse
    // send order delivers the last request's payload to the first sink. Each
    // sink still receives exactly one reply, and the three payloads arrive
    // without any sink blocking another.
    let mut bodies = BTreeSet::new();
    for rx in &mut sinks {
        let reply = timeout(TICK, rx.recv())
            .await
            .expect("reply timeout")
            .expect("sink closed early");
        bodies.insert(reply.data.expect("reply data"));
    }
    let expected: BTreeSet<String> = (1..=3)
        .map(|n| format!("<get><test{n}/></get>"))
        .collect();
    assert_eq!(bodies, expected);
    assert_eq!(seen.load(std::sync::atomic::Ordering::Relaxed), 3);

    // Every sink is single-shot: nothing further arrives.
    for rx in &mut sinks {
        assert!(rx.try_recv().is_err());
    }
}

#[tokio::test]
async fn concurrent_callers_each_get_their_own_replies() {
    const CALLERS: usize = 4;
    const REQUESTS: usize = 5;

    let (session, seen) = open(ServerConfig::base_1_1(Mode::Echo)).await;
    let session = Arc::new(session);

    let mut tasks = Vec::new();
    for caller in 0..CALLERS {
        let session = session.clone();
        tasks.push(tokio::spawn(async move {
            for i in 0..REQUESTS {
                let body = format!("<get><t-{caller}-{i}/></get>");
                let reply = session.execute(body.as_str()).await.expect("execute");
                assert_eq!(reply.data.as_deref(), Some(body.as_str()));
            }
        }));
    }
    for joined in timeout(TICK, futures::future::join_all(tasks))
        .await
        .expect("callers timeout")
    {
        joined.expect("caller");
    }
    assert_eq!(
        seen.load(std::sync::atomic::Ordering::Relaxed),
        CALLERS * REQUESTS
    );
}

#[tokio::test]
async fn rpc_error_is_surfaced_to_the_caller() {
    let (session, _) = open(ServerConfig::base_1_1(Mode::Fail)).await;
    let err = timeout(TICK, session.execute("<get/>"))
        .await
        .expect("execute timeout")
        .expect_err("must fail");
    match err {
        Error::Rpc(rpc_error) => {
            assert_eq!(rpc_error.to_string(), "netconf rpc [error] 'save failed'");
            assert_eq!(rpc_error.tag, "operation-failed");
        }
        other => panic!("expected rpc error, got {other:?}"),
    }
}

#[tokio::test]
async fn subscribed_notifications_are_delivered() {
    let (session, _) = open(ServerConfig::base_1_1(Mode::NotifyBurst(1))).await;

    let (tx, mut rx) = mpsc::channel(8);
    let reply = timeout(TICK, session.subscribe("<create-subscription/>", tx))
        .await
        .expect("subscribe timeout")
        .expect("subscribe");
    assert!(reply.ok);

    let notification = timeout(TICK, rx.recv())
        .await
        .expect("notification timeout")
        .expect("notification");
    assert_eq!(notification.event_time, "2024-02-01T00:00:00Z");
    assert_eq!(
        notification.event,
        r#"<linkUp xmlns="urn:example:events"><seq>0</seq></linkUp>"#
    );
}

#[tokio::test]
async fn notifications_overflowing_the_sink_are_dropped_and_counted() {
    const BURST: usize = 5;
    let (session, _) = open(ServerConfig::base_1_1(Mode::NotifyBurst(BURST))).await;

    // Capacity one and never drained: the first notification is accepted,
    // the rest are dropped.
    let (tx, mut rx) = mpsc::channel(1);
    timeout(TICK, session.subscribe("<create-subscription/>", tx))
        .await
        .expect("subscribe timeout")
        .expect("subscribe");

    timeout(TICK, async {
        while session.dropped_notifications() < (BURST - 1) as u64 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("drop counter timeout");
    assert_eq!(session.dropped_notifications(), (BURST - 1) as u64);

    // The one accepted notification is still readable.
    let first = rx.try_recv().expect("first notification");
    assert!(first.event.contains("<seq>0</seq>"));
}

#[tokio::test]
async fn closing_with_a_pending_async_closes_the_sink() {
    let (session, _) = open(ServerConfig::base_1_1(Mode::Silent)).await;

    let (tx, mut rx) = mpsc::channel(1);
    timeout(TICK, session.execute_async("<get/>", tx))
        .await
        .expect("submit timeout")
        .expect("submit");

    timeout(TICK, session.close()).await.expect("close timeout").expect("close");
    let got = timeout(TICK, rx.recv()).await.expect("sink timeout");
    assert!(got.is_none(), "sink must close without a reply");

    // Repeated close is a no-op.
    session.close().await.expect("second close");
}

#[tokio::test]
async fn blocked_execute_observes_session_closure() {
    let (session, _) = open(ServerConfig::base_1_1(Mode::Silent)).await;
    let session = Arc::new(session);

    let waiter = {
        let session = session.clone();
        tokio::spawn(async move { session.execute("<get/>").await })
    };
    // Give the request time to reach the wire before closing.
    tokio::time::sleep(Duration::from_millis(50)).await;
    session.close().await.expect("close");

    let result = timeout(TICK, waiter).await.expect("waiter timeout").expect("join");
    assert!(matches!(result, Err(Error::SessionClosed)));
}

#[tokio::test]
async fn missing_server_hello_times_out() {
    // No server task at all: the hello never arrives.
    let (transport, _server_side) = tokio::io::duplex(64 * 1024);
    let config = ClientConfig {
        hello_timeout: Duration::from_millis(200),
        ..ClientConfig::default()
    };
    let err = Session::open(transport, config).await.expect_err("must time out");
    assert!(matches!(err, Error::HelloTimeout));
    assert_eq!(err.to_string(), "failed to get hello from server");
}
