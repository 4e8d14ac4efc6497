// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::atomic::{AtomicU32, Ordering};

use axum::http::StatusCode;
use axum::routing::post;
use axum::Json;
use axum_test::TestServer;
use reqwest::Url;

use super::*;
use crate::credential::epoch_secs;
use crate::error::{classify, ErrorCode};

const SESSION: &str = "sess-7f3a";
const HOST: &str = "acme.example.com";

// -- Callback router ----------------------------------------------------------

#[tokio::test]
async fn callback_rejects_mismatched_session() -> anyhow::Result<()> {
    let (tx, mut rx) = oneshot::channel();
    let server = TestServer::new(callback_router(SESSION.to_owned(), tx))?;

    let resp = server.get("/callback").add_query_param("session_id", "forged").await;
    resp.assert_status(StatusCode::FORBIDDEN);
    assert!(resp.text().contains("invalid session"));

    let resp = server.get("/callback").await;
    resp.assert_status(StatusCode::FORBIDDEN);

    assert!(rx.try_recv().is_err(), "a rejected callback must not complete the login");
    Ok(())
}

#[tokio::test]
async fn duplicate_valid_callbacks_fire_once() -> anyhow::Result<()> {
    let (tx, mut rx) = oneshot::channel();
    let server = TestServer::new(callback_router(SESSION.to_owned(), tx))?;

    let first = server.get("/callback").add_query_param("session_id", SESSION).await;
    first.assert_status(StatusCode::OK);
    assert!(first.text().contains("Successfully authenticated"));
    assert!(rx.try_recv().is_ok());

    let second = server.get("/callback").add_query_param("session_id", SESSION).await;
    second.assert_status(StatusCode::OK);
    assert_eq!(second.text(), first.text());
    Ok(())
}

// -- Full flow ----------------------------------------------------------------

struct MockBackend {
    base: Url,
    exchanges: Arc<AtomicU32>,
    refreshes: Arc<AtomicU32>,
    port: Arc<Mutex<Option<u16>>>,
}

/// Backend whose `auth_url` points straight at the local callback, so a
/// "browser" only has to GET it.
async fn mock_backend(token_response: serde_json::Value) -> anyhow::Result<MockBackend> {
    let exchanges = Arc::new(AtomicU32::new(0));
    let refreshes = Arc::new(AtomicU32::new(0));
    let port = Arc::new(Mutex::new(None));

    let port_clone = Arc::clone(&port);
    let exchanges_clone = Arc::clone(&exchanges);
    let refreshes_clone = Arc::clone(&refreshes);
    let app = Router::new()
        .route(
            "/auth/cli/session",
            post(move |Json(body): Json<serde_json::Value>| {
                let port = Arc::clone(&port_clone);
                async move {
                    let callback_port = body["port"].as_u64().unwrap_or(0);
                    *port.lock() = u16::try_from(callback_port).ok();
                    Json(serde_json::json!({
                        "session_id": SESSION,
                        "auth_url": format!("http://127.0.0.1:{callback_port}/callback?session_id={SESSION}"),
                    }))
                }
            }),
        )
        .route(
            "/auth/cli/token",
            post(move |Json(body): Json<serde_json::Value>| {
                let exchanges = Arc::clone(&exchanges_clone);
                let token_response = token_response.clone();
                async move {
                    exchanges.fetch_add(1, Ordering::SeqCst);
                    if body["session_id"] != SESSION {
                        return (StatusCode::BAD_REQUEST, Json(serde_json::json!({})));
                    }
                    (StatusCode::OK, Json(token_response))
                }
            }),
        )
        .route(
            "/auth/refresh_token",
            get(move || {
                let refreshes = Arc::clone(&refreshes_clone);
                async move {
                    let n = refreshes.fetch_add(1, Ordering::SeqCst) + 1;
                    Json(serde_json::json!({ "accessToken": format!("refreshed-{n}"), "expiresIn": 3600 }))
                }
            }),
        );
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        axum::serve(listener, app).await.ok();
    });
    Ok(MockBackend { base: Url::parse(&format!("http://{addr}"))?, exchanges, refreshes, port })
}

fn tokens() -> serde_json::Value {
    serde_json::json!({
        "access_token": "acc-1",
        "refresh_token": "ref-1",
        "expires_in": 3600,
        "query_parameters": { "orgId": "org-123" },
    })
}

/// Launcher that plays the browser: visits each URL derived from the auth URL.
fn browser_visiting(
    urls: fn(&str) -> Vec<String>,
    result: fn() -> std::io::Result<()>,
) -> BrowserLauncher {
    Arc::new(move |auth_url: &str| {
        let targets = urls(auth_url);
        tokio::spawn(async move {
            let Ok(http) = crate::transport::http_client(Duration::from_secs(5)) else {
                return;
            };
            for url in targets {
                let _ = http.get(url).send().await;
            }
        });
        result()
    })
}

fn flow(backend: &MockBackend, store: &CredentialStore, launcher: BrowserLauncher) -> anyhow::Result<LoginFlow> {
    Ok(LoginFlow::new(AuthApi::new(backend.base.clone())?, store.clone(), Printer::new(false, true))
        .with_launcher(launcher))
}

#[tokio::test]
async fn login_exchanges_once_and_stores_credentials() -> anyhow::Result<()> {
    let backend = mock_backend(tokens()).await?;
    let dir = tempfile::tempdir()?;
    let store = CredentialStore::new(dir.path());
    // Valid callback twice: only one exchange may follow.
    let launcher = browser_visiting(|url| vec![url.to_owned(), url.to_owned()], || Ok(()));

    let creds = flow(&backend, &store, launcher)?.run(HOST, &CancellationToken::new()).await?;

    assert_eq!(creds.access_token, "acc-1");
    assert_eq!(backend.exchanges.load(Ordering::SeqCst), 1);
    let saved = store.get(HOST)?.ok_or_else(|| anyhow::anyhow!("not stored"))?;
    assert_eq!(saved.refresh_token(), Some("ref-1"));
    assert!(saved.expires_at > epoch_secs());
    assert_eq!(saved.query_parameters.get("orgId").map(String::as_str), Some("org-123"));
    assert_eq!(store.active_host()?.as_deref(), Some(HOST));
    Ok(())
}

#[tokio::test]
async fn login_without_lifetime_refreshes_on_first_use() -> anyhow::Result<()> {
    let backend = mock_backend(serde_json::json!({ "access_token": "acc-1", "refresh_token": "ref-1" })).await?;
    let dir = tempfile::tempdir()?;
    let store = CredentialStore::new(dir.path());
    let launcher = browser_visiting(|url| vec![url.to_owned()], || Ok(()));

    flow(&backend, &store, launcher)?.run(HOST, &CancellationToken::new()).await?;
    let saved = store.get(HOST)?.ok_or_else(|| anyhow::anyhow!("not stored"))?;
    assert_ne!(saved.expires_at, 0);
    assert!(saved.is_expired_at(epoch_secs()));

    let manager = crate::credential::lifecycle::TokenManager::new(store.clone(), Some(backend.base.clone()));
    assert_eq!(manager.get_valid_token(HOST).await?, "refreshed-1");
    assert_eq!(backend.refreshes.load(Ordering::SeqCst), 1);
    Ok(())
}

#[tokio::test]
async fn forged_callback_does_not_complete_login() -> anyhow::Result<()> {
    let backend = mock_backend(tokens()).await?;
    let dir = tempfile::tempdir()?;
    let store = CredentialStore::new(dir.path());
    let launcher = browser_visiting(
        |url| vec![url.replace(SESSION, "forged"), url.to_owned()],
        || Ok(()),
    );

    flow(&backend, &store, launcher)?.run(HOST, &CancellationToken::new()).await?;
    assert_eq!(backend.exchanges.load(Ordering::SeqCst), 1);
    Ok(())
}

#[tokio::test]
async fn browser_launch_failure_is_not_fatal() -> anyhow::Result<()> {
    let backend = mock_backend(tokens()).await?;
    let dir = tempfile::tempdir()?;
    let store = CredentialStore::new(dir.path());
    // The user opens the printed URL by hand.
    let launcher = browser_visiting(
        |url| vec![url.to_owned()],
        || Err(std::io::Error::new(std::io::ErrorKind::NotFound, "no browser")),
    );

    let creds = flow(&backend, &store, launcher)?.run(HOST, &CancellationToken::new()).await?;
    assert_eq!(creds.access_token, "acc-1");
    Ok(())
}

#[tokio::test]
async fn exchange_error_field_is_terminal() -> anyhow::Result<()> {
    let backend = mock_backend(serde_json::json!({ "error": "access_denied" })).await?;
    let dir = tempfile::tempdir()?;
    let store = CredentialStore::new(dir.path());
    let launcher = browser_visiting(|url| vec![url.to_owned()], || Ok(()));

    let err = flow(&backend, &store, launcher)?
        .run(HOST, &CancellationToken::new())
        .await
        .err()
        .ok_or_else(|| anyhow::anyhow!("login succeeded"))?;
    assert_eq!(classify(&err), ErrorCode::Auth);
    assert!(err.to_string().contains("access_denied"));
    assert_eq!(backend.exchanges.load(Ordering::SeqCst), 1);
    assert!(store.load()?.is_none());
    Ok(())
}

/// Wait for the aborted callback listener to release `port`.
async fn port_released(port: u16) -> bool {
    for _ in 0..50 {
        if TcpListener::bind(("127.0.0.1", port)).await.is_ok() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

#[tokio::test]
async fn login_times_out_and_releases_port() -> anyhow::Result<()> {
    let backend = mock_backend(tokens()).await?;
    let dir = tempfile::tempdir()?;
    let store = CredentialStore::new(dir.path());
    let launcher = browser_visiting(|_| Vec::new(), || Ok(()));
    let options =
        LoginOptions { timeout: Duration::from_millis(150), heartbeat: Duration::from_millis(40) };

    let login = flow(&backend, &store, launcher)?.with_options(options);
    let err = login
        .run(HOST, &CancellationToken::new())
        .await
        .err()
        .ok_or_else(|| anyhow::anyhow!("login succeeded"))?;
    assert_eq!(classify(&err), ErrorCode::Auth);
    assert!(err.to_string().contains("timed out"));
    assert_eq!(backend.exchanges.load(Ordering::SeqCst), 0);
    // Ticks at 40, 80 and 120ms fall inside the 150ms wait.
    assert!(login.heartbeats() >= 1, "no heartbeat while waiting");

    let port = (*backend.port.lock()).ok_or_else(|| anyhow::anyhow!("no session created"))?;
    assert!(port_released(port).await);
    Ok(())
}

#[tokio::test]
async fn login_cancellation_is_clean() -> anyhow::Result<()> {
    let backend = mock_backend(tokens()).await?;
    let dir = tempfile::tempdir()?;
    let store = CredentialStore::new(dir.path());
    let launcher = browser_visiting(|_| Vec::new(), || Ok(()));
    let cancel = CancellationToken::new();

    let canceller = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        canceller.cancel();
    });

    let err = flow(&backend, &store, launcher)?
        .run(HOST, &cancel)
        .await
        .err()
        .ok_or_else(|| anyhow::anyhow!("login succeeded"))?;
    assert_eq!(classify(&err), ErrorCode::Cancelled);
    assert_eq!(backend.exchanges.load(Ordering::SeqCst), 0);

    let port = (*backend.port.lock()).ok_or_else(|| anyhow::anyhow!("no session created"))?;
    assert!(port_released(port).await);
    Ok(())
}
