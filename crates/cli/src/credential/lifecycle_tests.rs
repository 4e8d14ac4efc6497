// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use axum::http::{HeaderMap, StatusCode};
use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;

use super::*;
use crate::error::{classify, ErrorCode};

const HOST: &str = "api.acme.example.com";

/// Start a mock refresh endpoint returning `(status, body)` and counting calls.
///
/// Requests without the expected refresh cookie get a 400.
async fn mock_refresh_server(status: u16, body: String) -> anyhow::Result<(Url, Arc<AtomicU32>)> {
    let calls = Arc::new(AtomicU32::new(0));
    let calls_clone = Arc::clone(&calls);
    let app = Router::new().route(
        "/auth/refresh_token",
        get(move |headers: HeaderMap| {
            let calls = Arc::clone(&calls_clone);
            let body = body.clone();
            async move {
                calls.fetch_add(1, Ordering::Relaxed);
                let cookie = headers.get("cookie").and_then(|v| v.to_str().ok()).unwrap_or("");
                if cookie != "refresh_token=stored-refresh" {
                    return (StatusCode::BAD_REQUEST, String::new());
                }
                (StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR), body)
            }
        }),
    );
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr: SocketAddr = listener.local_addr()?;
    tokio::spawn(async move {
        axum::serve(listener, app).await.ok();
    });
    Ok((Url::parse(&format!("http://{addr}"))?, calls))
}

fn stored(expires_at: i64, refresh: Option<&str>) -> HostCredentials {
    HostCredentials {
        access_token: "stored-access".to_owned(),
        refresh_token: refresh.map(str::to_owned),
        expires_at,
        query_parameters: BTreeMap::from([("orgId".to_owned(), "org-old".to_owned())]),
    }
}

#[tokio::test]
async fn missing_credentials_is_auth_error() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let manager = TokenManager::new(CredentialStore::new(dir.path()), None);

    let err = manager.get_valid_token(HOST).await.err().ok_or_else(|| anyhow::anyhow!("ok"))?;
    assert_eq!(classify(&err), ErrorCode::Auth);
    assert!(err.to_string().contains("keel auth login"));
    Ok(())
}

#[tokio::test]
async fn unexpired_token_returned_without_network() -> anyhow::Result<()> {
    let (base, calls) = mock_refresh_server(200, "{}".to_owned()).await?;
    let dir = tempfile::tempdir()?;
    let store = CredentialStore::new(dir.path());
    store.save_one(HOST, stored(epoch_secs() + 3600, Some("stored-refresh")))?;

    let manager = TokenManager::new(store, Some(base));
    assert_eq!(manager.get_valid_token(HOST).await?, "stored-access");
    assert_eq!(calls.load(Ordering::Relaxed), 0);
    Ok(())
}

#[tokio::test]
async fn never_expiring_token_returned() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let store = CredentialStore::new(dir.path());
    store.save_one(HOST, stored(0, None))?;

    let manager = TokenManager::new(store, None);
    assert_eq!(manager.get_valid_token(HOST).await?, "stored-access");
    Ok(())
}

#[tokio::test]
async fn expired_with_refresh_token_refreshes_once_and_persists() -> anyhow::Result<()> {
    let body = serde_json::json!({
        "accessToken": "fresh-access",
        "expiresIn": 3600,
        "queryParameters": { "orgId": "org-new" }
    })
    .to_string();
    let (base, calls) = mock_refresh_server(200, body).await?;
    let dir = tempfile::tempdir()?;
    let store = CredentialStore::new(dir.path());
    store.save_one(HOST, stored(epoch_secs() - 1, Some("stored-refresh")))?;

    let manager = TokenManager::new(store.clone(), Some(base));
    assert_eq!(manager.get_valid_token(HOST).await?, "fresh-access");
    assert_eq!(calls.load(Ordering::Relaxed), 1);

    let saved = store.get(HOST)?.ok_or_else(|| anyhow::anyhow!("credentials removed"))?;
    assert_eq!(saved.access_token, "fresh-access");
    assert_eq!(saved.refresh_token(), Some("stored-refresh"));
    assert!(saved.expires_at > epoch_secs());
    assert_eq!(saved.query_parameters.get("orgId").map(String::as_str), Some("org-new"));

    // The refreshed token is now valid; no second refresh.
    assert_eq!(manager.get_valid_token(HOST).await?, "fresh-access");
    assert_eq!(calls.load(Ordering::Relaxed), 1);
    Ok(())
}

#[tokio::test]
async fn refresh_without_lifetime_refreshes_again_on_next_use() -> anyhow::Result<()> {
    let body = serde_json::json!({ "accessToken": "short-lived" }).to_string();
    let (base, calls) = mock_refresh_server(200, body).await?;
    let dir = tempfile::tempdir()?;
    let store = CredentialStore::new(dir.path());
    store.save_one(HOST, stored(epoch_secs() - 1, Some("stored-refresh")))?;

    let manager = TokenManager::new(store.clone(), Some(base));
    assert_eq!(manager.get_valid_token(HOST).await?, "short-lived");

    let saved = store.get(HOST)?.ok_or_else(|| anyhow::anyhow!("credentials removed"))?;
    assert_ne!(saved.expires_at, 0, "a missing lifetime must not mean never expires");
    assert!(saved.is_expired_at(epoch_secs()));

    manager.get_valid_token(HOST).await?;
    assert_eq!(calls.load(Ordering::Relaxed), 2);
    Ok(())
}

#[tokio::test]
async fn refresh_without_query_parameters_keeps_existing() -> anyhow::Result<()> {
    let body = serde_json::json!({ "accessToken": "fresh", "expiresIn": 60 }).to_string();
    let (base, _calls) = mock_refresh_server(200, body).await?;
    let dir = tempfile::tempdir()?;
    let store = CredentialStore::new(dir.path());
    store.save_one(HOST, stored(epoch_secs() - 10, Some("stored-refresh")))?;

    TokenManager::new(store.clone(), Some(base)).get_valid_token(HOST).await?;

    let saved = store.get(HOST)?.ok_or_else(|| anyhow::anyhow!("credentials removed"))?;
    assert_eq!(saved.query_parameters.get("orgId").map(String::as_str), Some("org-old"));
    Ok(())
}

#[tokio::test]
async fn expired_without_refresh_token_fails_without_network() -> anyhow::Result<()> {
    let (base, calls) = mock_refresh_server(200, "{}".to_owned()).await?;
    let dir = tempfile::tempdir()?;
    let store = CredentialStore::new(dir.path());
    store.save_one(HOST, stored(epoch_secs() - 1, None))?;

    let manager = TokenManager::new(store, Some(base));
    let err = manager.get_valid_token(HOST).await.err().ok_or_else(|| anyhow::anyhow!("ok"))?;
    assert_eq!(classify(&err), ErrorCode::Auth);
    assert!(err.to_string().contains("expired"));
    assert_eq!(calls.load(Ordering::Relaxed), 0);
    Ok(())
}

#[tokio::test]
async fn rejected_refresh_is_auth_error_and_keeps_secrets_out() -> anyhow::Result<()> {
    let (base, calls) = mock_refresh_server(401, "{}".to_owned()).await?;
    let dir = tempfile::tempdir()?;
    let store = CredentialStore::new(dir.path());
    store.save_one(HOST, stored(epoch_secs() - 1, Some("stored-refresh")))?;

    let manager = TokenManager::new(store.clone(), Some(base));
    let err = manager.get_valid_token(HOST).await.err().ok_or_else(|| anyhow::anyhow!("ok"))?;
    assert_eq!(classify(&err), ErrorCode::Auth);
    assert_eq!(calls.load(Ordering::Relaxed), 1);
    let text = format!("{err:#}");
    assert!(!text.contains("stored-refresh"));
    assert!(!text.contains("stored-access"));

    // The stored record is untouched.
    let saved = store.get(HOST)?.ok_or_else(|| anyhow::anyhow!("credentials removed"))?;
    assert_eq!(saved.access_token, "stored-access");
    assert_eq!(saved.refresh_token(), Some("stored-refresh"));
    Ok(())
}
