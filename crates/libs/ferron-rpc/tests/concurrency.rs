//! Multiplexing and teardown behavior with several calls in flight.

use std::sync::Arc;
use std::time::Duration;

use ferron_rpc::{Client, CodecKind, Registry, RpcError, Server, ServiceHandler};

fn slow_registry() -> Arc<Registry> {
    let registry = Registry::new();
    registry
        .register(
            "Slow",
            ServiceHandler::new().method("Sleep", |ms: u64| {
                std::thread::sleep(Duration::from_millis(ms));
                Ok::<_, String>(ms)
            }),
        )
        .expect("register slow");
    registry
        .register(
            "Echo",
            ServiceHandler::new().method("Echo", |s: String| Ok::<_, String>(format!("{s}{s}"))),
        )
        .expect("register echo");
    Arc::new(registry)
}

fn connect(kind: CodecKind) -> Client {
    let (client_side, server_side) = tokio::io::duplex(64 * 1024);
    let server = Server::new(slow_registry());
    tokio::spawn(async move {
        server.serve_conn(server_side, kind).await;
    });
    Client::from_stream(client_side, kind)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn replies_correlate_regardless_of_completion_order() {
    let client = connect(CodecKind::Binary);

    // Issued longest-first, so completions arrive in reverse of issue
    // order; every caller must still receive its own reply.
    let first = client.go("Slow.Sleep", 150_u64).await.expect("issue first");
    let second = client.go("Slow.Sleep", 75_u64).await.expect("issue second");
    let third = client.go("Slow.Sleep", 5_u64).await.expect("issue third");
    assert_ne!(first.seq(), second.seq());
    assert_ne!(second.seq(), third.seq());

    let (a, b, c) = tokio::join!(first.join::<u64>(), second.join::<u64>(), third.join::<u64>());
    assert_eq!(a.expect("first reply"), 150);
    assert_eq!(b.expect("second reply"), 75);
    assert_eq!(c.expect("third reply"), 5);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_callers_each_get_their_own_reply() {
    let client = Arc::new(connect(CodecKind::Json));

    let mut workers = Vec::new();
    for n in 0..8 {
        let client = Arc::clone(&client);
        workers.push(tokio::spawn(async move {
            let input = format!("w{n}");
            let reply: String = client.call("Echo.Echo", &input).await.expect("echo call");
            assert_eq!(reply, format!("{input}{input}"));
        }));
    }
    for worker in workers {
        worker.await.expect("worker task");
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn close_fans_out_to_every_outstanding_call_once() {
    let client = connect(CodecKind::Binary);

    let first = client.go("Slow.Sleep", 300_u64).await.expect("issue first");
    let second = client.go("Slow.Sleep", 300_u64).await.expect("issue second");
    let third = client.go("Slow.Sleep", 300_u64).await.expect("issue third");

    client.close();

    for handle in [first, second, third] {
        let err = handle.join::<u64>().await.expect_err("must be torn down");
        assert_eq!(err, RpcError::ConnectionClosed);
    }

    // A dead client rejects every later call with the same error.
    let err = client
        .call::<String>("Echo.Echo", "late")
        .await
        .expect_err("must be rejected");
    assert_eq!(err, RpcError::ConnectionClosed);
}

#[tokio::test]
async fn peer_disappearing_is_terminal_for_all_callers() {
    let (client_side, server_side) = tokio::io::duplex(1024);
    drop(server_side);
    let client = Client::from_stream(client_side, CodecKind::Binary);

    let err = match client.go("Echo.Echo", "x").await {
        Ok(handle) => handle.join::<String>().await.expect_err("peer is gone"),
        Err(err) => err,
    };
    assert!(err.is_connection_fatal());

    let err = client
        .call::<String>("Echo.Echo", "x")
        .await
        .expect_err("must stay rejected");
    assert_eq!(err, RpcError::ConnectionClosed);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn abandoned_call_does_not_disturb_siblings() {
    let client = connect(CodecKind::Binary);

    let slow = client.go("Slow.Sleep", 200_u64).await.expect("issue slow");
    let quick = client.go("Echo.Echo", "hi").await.expect("issue quick");
    slow.abandon();

    let reply: String = quick.join().await.expect("quick reply");
    assert_eq!(reply, "hihi");

    // The late response for the abandoned seq is read and dropped; the
    // connection keeps working afterwards.
    tokio::time::sleep(Duration::from_millis(300)).await;
    let reply: String = client.call("Echo.Echo", "again").await.expect("follow-up");
    assert_eq!(reply, "againagain");
}
