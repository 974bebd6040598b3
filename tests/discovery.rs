//! Discovery client integration tests against a scriptable fake sentinel.


use std::time::Duration;

use harness::{EchoBackend, FakeSentinel};
use sentinel_proxy::{find_primary, DiscoveryError};
use tokio::net::TcpListener;
use tokio_test::assert_ok;

const IO_TIMEOUT: Duration = Duration::from_millis(100);

/// Bind and immediately drop a listener to get an address with nothing
/// listening on it.
async fn dead_addr() -> std::net::SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr
}

#[tokio::test]
async fn returns_the_reported_primary_when_reachable() {
    let backend = EchoBackend::spawn().await.unwrap();
    let sentinel = FakeSentinel::spawn(Some(backend.addr)).await.unwrap();

    let found = assert_ok!(
        find_primary(&sentinel.addr.to_string(), "test-primary", IO_TIMEOUT).await
    );
    assert_eq!(found, Some(backend.addr));
}

#[tokio::test]
async fn unreachable_primary_is_never_returned() {
    let sentinel = FakeSentinel::spawn(Some(dead_addr().await)).await.unwrap();

    let found = assert_ok!(
        find_primary(&sentinel.addr.to_string(), "test-primary", IO_TIMEOUT).await
    );
    assert_eq!(found, None);
}

#[tokio::test]
async fn malformed_reply_yields_no_result() {
    let sentinel = FakeSentinel::spawn(None).await.unwrap();
    sentinel.report_raw("not a sentinel reply at all");

    let found = assert_ok!(
        find_primary(&sentinel.addr.to_string(), "test-primary", IO_TIMEOUT).await
    );
    assert_eq!(found, None);
}

#[tokio::test]
async fn error_reply_yields_no_result() {
    // The default reply is `-ERR No such master with that name`.
    let sentinel = FakeSentinel::spawn(None).await.unwrap();

    let found = assert_ok!(
        find_primary(&sentinel.addr.to_string(), "unknown-name", IO_TIMEOUT).await
    );
    assert_eq!(found, None);
}

#[tokio::test]
async fn unreachable_sentinel_yields_no_result() {
    let sentinel_addr = dead_addr().await;

    let found = assert_ok!(
        find_primary(&sentinel_addr.to_string(), "test-primary", IO_TIMEOUT).await
    );
    assert_eq!(found, None);
}

#[tokio::test]
async fn unresolvable_sentinel_host_is_an_error() {
    let err = find_primary("sentinel.invalid:26379", "test-primary", IO_TIMEOUT)
        .await
        .unwrap_err();
    assert!(matches!(err, DiscoveryError::Resolve(addr, _) if addr.contains("sentinel.invalid")));
}

#[tokio::test]
async fn each_poll_counts_one_query_per_sentinel() {
    let backend = EchoBackend::spawn().await.unwrap();
    let sentinel = FakeSentinel::spawn(Some(backend.addr)).await.unwrap();

    for _ in 0..3 {
        assert_ok!(find_primary(&sentinel.addr.to_string(), "test-primary", IO_TIMEOUT).await);
    }

    assert_eq!(
        sentinel.queries.load(std::sync::atomic::Ordering::Relaxed),
        3
    );
}
