// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Interactive browser login.
//!
//! A local callback listener is bound on an ephemeral port and a session
//! tied to that port is created on the backend. The user authenticates in
//! the browser, which redirects to `/callback?session_id=...`; the session
//! is then exchanged for a token pair and stored.

use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use parking_lot::Mutex;
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::credential::backend::AuthApi;
use crate::credential::persist::CredentialStore;
use crate::credential::{expires_at_from, HostCredentials};
use crate::error::CliError;
use crate::transport::auth::constant_time_eq;
use crate::ui::Printer;

const SUCCESS_PAGE: &str = "<!DOCTYPE html>
<html>
<head><title>keel</title></head>
<body style=\"font-family: sans-serif; text-align: center; margin-top: 4em\">
<h2>Successfully authenticated</h2>
<p>You can close this window and return to the terminal.</p>
</body>
</html>
";

/// Grace period for the browser's success-page response before the
/// callback listener is torn down.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Timing knobs of the login wait loop.
#[derive(Debug, Clone, Copy)]
pub struct LoginOptions {
    /// Absolute limit on waiting for the browser callback.
    pub timeout: Duration,
    /// Interval between "still waiting" messages.
    pub heartbeat: Duration,
}

impl Default for LoginOptions {
    fn default() -> Self {
        Self { timeout: Duration::from_secs(10 * 60), heartbeat: Duration::from_secs(30) }
    }
}

/// Opens a URL for the user.
pub type BrowserLauncher = Arc<dyn Fn(&str) -> std::io::Result<()> + Send + Sync>;

/// Launch the platform's default browser at `url`.
pub fn open_browser(url: &str) -> std::io::Result<()> {
    // macOS has `open`, Windows goes through the URL protocol handler, and
    // everything else is expected to provide `xdg-open`.
    let mut cmd = if cfg!(target_os = "macos") {
        let mut cmd = Command::new("open");
        cmd.arg(url);
        cmd
    } else if cfg!(target_os = "windows") {
        let mut cmd = Command::new("rundll32");
        cmd.args(["url.dll,FileProtocolHandler", url]);
        cmd
    } else {
        let mut cmd = Command::new("xdg-open");
        cmd.arg(url);
        cmd
    };
    cmd.stdin(Stdio::null()).stdout(Stdio::null()).stderr(Stdio::null()).spawn().map(|_| ())
}

#[derive(Deserialize)]
struct CallbackParams {
    session_id: Option<String>,
}

struct CallbackState {
    session_id: String,
    /// Fires once on the first valid callback.
    done: Mutex<Option<oneshot::Sender<()>>>,
}

async fn callback(
    State(state): State<Arc<CallbackState>>,
    Query(params): Query<CallbackParams>,
) -> Response {
    let presented = params.session_id.unwrap_or_default();
    if !constant_time_eq(&presented, &state.session_id) {
        tracing::warn!("login callback rejected: session mismatch");
        return (StatusCode::FORBIDDEN, "invalid session").into_response();
    }
    if let Some(tx) = state.done.lock().take() {
        let _ = tx.send(());
    }
    Html(SUCCESS_PAGE).into_response()
}

/// Router serving `GET /callback` for one login session.
///
/// `done` fires on the first callback carrying `session_id`; repeats get
/// the same page without firing again.
pub(crate) fn callback_router(session_id: String, done: oneshot::Sender<()>) -> Router {
    let state = Arc::new(CallbackState { session_id, done: Mutex::new(Some(done)) });
    Router::new().route("/callback", get(callback)).with_state(state)
}

/// The running callback listener. Dropping it closes the port.
struct CallbackServer {
    shutdown: CancellationToken,
    task: JoinHandle<std::io::Result<()>>,
}

impl CallbackServer {
    fn start(listener: TcpListener, app: Router) -> Self {
        let shutdown = CancellationToken::new();
        let signal = shutdown.clone().cancelled_owned();
        let task = tokio::spawn(async move {
            axum::serve(listener, app).with_graceful_shutdown(signal).await
        });
        Self { shutdown, task }
    }

    /// Stop accepting and give in-flight responses a moment to finish.
    async fn stop(mut self) {
        self.shutdown.cancel();
        let _ = tokio::time::timeout(SHUTDOWN_GRACE, &mut self.task).await;
    }
}

impl Drop for CallbackServer {
    fn drop(&mut self) {
        self.shutdown.cancel();
        self.task.abort();
    }
}

/// One interactive login against a backend.
pub struct LoginFlow {
    api: AuthApi,
    store: CredentialStore,
    printer: Printer,
    launcher: BrowserLauncher,
    options: LoginOptions,
    heartbeats: AtomicU32,
}

impl LoginFlow {
    pub fn new(api: AuthApi, store: CredentialStore, printer: Printer) -> Self {
        Self {
            api,
            store,
            printer,
            launcher: Arc::new(open_browser),
            options: LoginOptions::default(),
            heartbeats: AtomicU32::new(0),
        }
    }

    pub fn with_launcher(mut self, launcher: BrowserLauncher) -> Self {
        self.launcher = launcher;
        self
    }

    pub fn with_options(mut self, options: LoginOptions) -> Self {
        self.options = options;
        self
    }

    /// "Still waiting" messages emitted so far.
    pub fn heartbeats(&self) -> u32 {
        self.heartbeats.load(Ordering::Relaxed)
    }

    /// Run the flow for `host`, store the resulting credentials and make
    /// `host` the active default.
    pub async fn run(&self, host: &str, cancel: &CancellationToken) -> anyhow::Result<HostCredentials> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let port = listener.local_addr()?.port();
        tracing::debug!(host, port, "login callback listener bound");

        // The session must exist before the listener accepts anything.
        let session = self.api.create_session(port).await?;
        let (done_tx, done_rx) = oneshot::channel();
        let mut server =
            CallbackServer::start(listener, callback_router(session.session_id.clone(), done_tx));

        self.printer.progress(&format!(
            "Opening browser to authenticate with {}...",
            self.printer.emphasis(host)
        ));
        if let Err(e) = (self.launcher)(&session.auth_url) {
            tracing::debug!(err = %e, "browser launch failed");
            self.printer.progress("Could not open a browser. Visit this URL to continue:");
            self.printer.progress(&format!("  {}", session.auth_url));
        }

        self.wait_for_callback(done_rx, &mut server, cancel).await?;
        server.stop().await;

        let exchanged = self.api.exchange(&session.session_id).await?;
        if let Some(reason) = exchanged.error.as_deref().filter(|e| !e.is_empty()) {
            return Err(CliError::auth(format!("authentication failed: {reason}")).into());
        }
        if exchanged.access_token.is_empty() {
            return Err(CliError::protocol("token response has no access_token").into());
        }

        let creds = HostCredentials {
            access_token: exchanged.access_token,
            refresh_token: exchanged.refresh_token.filter(|t| !t.is_empty()),
            expires_at: expires_at_from(exchanged.expires_in),
            query_parameters: exchanged.query_parameters,
        };
        self.store.save_one(host, creds.clone())?;
        self.store.set_active_host(host)?;
        tracing::info!(host, expires_at = creds.expires_at, "login complete");
        self.printer.success(&format!("Logged in to {}", self.printer.emphasis(host)));
        Ok(creds)
    }

    async fn wait_for_callback(
        &self,
        mut done: oneshot::Receiver<()>,
        server: &mut CallbackServer,
        cancel: &CancellationToken,
    ) -> anyhow::Result<()> {
        let deadline = tokio::time::sleep(self.options.timeout);
        tokio::pin!(deadline);
        let start = tokio::time::Instant::now() + self.options.heartbeat;
        let mut heartbeat = tokio::time::interval_at(start, self.options.heartbeat);

        loop {
            tokio::select! {
                res = &mut done => {
                    return res.map_err(|_| anyhow::anyhow!("callback listener closed"));
                }
                res = &mut server.task => {
                    let err = match res {
                        Ok(Ok(())) => anyhow::anyhow!("callback listener stopped unexpectedly"),
                        Ok(Err(e)) => anyhow::Error::new(e).context("callback listener failed"),
                        Err(e) => anyhow::Error::new(e).context("callback listener failed"),
                    };
                    return Err(err);
                }
                _ = cancel.cancelled() => {
                    return Err(CliError::cancelled("login cancelled").into());
                }
                _ = &mut deadline => {
                    return Err(CliError::auth(format!(
                        "login timed out after {}s waiting for browser authentication",
                        self.options.timeout.as_secs()
                    ))
                    .into());
                }
                _ = heartbeat.tick() => {
                    self.heartbeats.fetch_add(1, Ordering::Relaxed);
                    self.printer.progress("Still waiting for authentication...");
                }
            }
        }
    }
}

#[cfg(test)]
#[path = "login_tests.rs"]
mod tests;
