//! Tests for session refresh coalescing

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::Barrier;

use super::fixtures::{BASE_URL, MockTransport, credentials};
use crate::http::HttpMethod;
use crate::session::SessionCoordinator;

fn coordinator(transport: MockTransport) -> (Arc<MockTransport>, Arc<SessionCoordinator<MockTransport>>) {
    let transport = Arc::new(transport);
    let session = SessionCoordinator::new(
        Arc::clone(&transport),
        format!("{BASE_URL}/"),
        credentials("csrf-0", "sid-0"),
    )
    .unwrap();
    (transport, Arc::new(session))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_concurrent_expiry_refreshes_once() {
    let (transport, session) = coordinator(MockTransport::new());
    let barrier = Arc::new(Barrier::new(2));

    let handles: Vec<_> = (0..2)
        .map(|_| {
            let session = Arc::clone(&session);
            let barrier = Arc::clone(&barrier);
            tokio::spawn(async move {
                let (observed, _) = session.snapshot().await;
                barrier.wait().await;
                session.refresh_after(observed).await
            })
        })
        .collect();

    for handle in handles {
        assert_eq!(handle.await.unwrap().unwrap(), 1);
    }

    assert_eq!(transport.get_count(), 1);
    let (epoch, creds) = session.snapshot().await;
    assert_eq!(epoch, 1);
    assert_eq!(creds.csrf_token, "csrf-1");
    assert_eq!(creds.session_id, "sid-1");
}

#[tokio::test]
async fn test_stale_epoch_reuses_completed_refresh() {
    let (transport, session) = coordinator(MockTransport::new());

    assert_eq!(session.refresh().await.unwrap(), 1);
    assert_eq!(session.refresh_after(0).await.unwrap(), 1);
    assert_eq!(transport.get_count(), 1);

    assert_eq!(session.refresh_after(1).await.unwrap(), 2);
    assert_eq!(transport.get_count(), 2);
    assert_eq!(session.snapshot().await.1.csrf_token, "csrf-2");
}

#[tokio::test]
async fn test_failed_refresh_keeps_credentials() {
    let (transport, session) = coordinator(MockTransport::new().with_home_status(401));

    let err = session.refresh().await.unwrap_err();
    assert!(err.is_auth_expired());
    assert_eq!(transport.get_count(), 1);

    let (epoch, creds) = session.snapshot().await;
    assert_eq!(epoch, 0);
    assert_eq!(creds.csrf_token, "csrf-0");
}

#[tokio::test]
async fn test_page_without_tokens_is_auth_expired() {
    let (_, session) = coordinator(MockTransport::new().with_home_status(200));
    let err = session.refresh().await.unwrap_err();
    assert!(err.is_auth_expired());
    assert!(err.to_string().contains("CSRF token not found"));
}

#[tokio::test]
async fn test_initialize_fetches_tokens_with_cookies() {
    let transport = Arc::new(MockTransport::new());
    let cookies = BTreeMap::from([
        ("SID".to_string(), "abc".to_string()),
        ("HSID".to_string(), "def".to_string()),
    ]);

    let session = SessionCoordinator::initialize(Arc::clone(&transport), format!("{BASE_URL}/"), cookies)
        .await
        .unwrap();

    let (epoch, creds) = session.snapshot().await;
    assert_eq!(epoch, 0);
    assert_eq!(creds.csrf_token, "csrf-1");
    assert_eq!(creds.cookie_header(), "HSID=def; SID=abc");

    let requests = transport.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].method, HttpMethod::Get);
    assert_eq!(requests[0].url, "https://notebooklm.test/");
    assert_eq!(requests[0].header("Cookie"), Some("HSID=def; SID=abc"));
}

#[test]
fn test_credentials_debug_redacts_csrf() {
    let creds = credentials("very-secret", "sid");
    let shown = format!("{creds:?}");
    assert!(!shown.contains("very-secret"));
    assert!(shown.contains("SID"));
}
