//! Loopback HTTP server that receives the OAuth redirect.
//!
//! Per spec, this listens on a fixed port (18080) and path (`/callback`)
//! and validates the `state` query parameter against the value the caller
//! generated before sending the user to the provider's authorization URL.
//! Unlike a one-shot accept loop, this is a long-lived object:
//! `start`/`wait_for_code`/`stop` can be called independently, and `stop`
//! is idempotent so callers don't need to track whether they already
//! called it.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::TokioIo;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::{oneshot, Mutex};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Error)]
pub enum CallbackError {
    #[error("provider denied authorization: {0}")]
    Denied(String),

    #[error("state parameter did not match")]
    StateMismatch,

    #[error("callback did not include an authorization code")]
    MissingCode,

    #[error("timed out waiting for the oauth callback")]
    Timeout,

    #[error("callback server not running")]
    NotStarted,

    #[error("callback server error: {0}")]
    Server(String),
}

type CodeResult = Result<String, CallbackError>;

struct Running {
    cancel: CancellationToken,
    code_rx: oneshot::Receiver<CodeResult>,
    join: tokio::task::JoinHandle<()>,
}

/// A loopback callback server bound to one fixed `(port, path)`.
pub struct OAuthCallbackServer {
    port: u16,
    path: String,
    running: Mutex<Option<Running>>,
}

impl OAuthCallbackServer {
    pub fn new(port: u16, path: impl Into<String>) -> Self {
        Self {
            port,
            path: path.into(),
            running: Mutex::new(None),
        }
    }

    /// The redirect URI to register with the OAuth provider and pass as
    /// `redirect_uri` in the authorization request.
    pub fn redirect_uri(&self) -> String {
        format!("http://127.0.0.1:{}{}", self.port, self.path)
    }

    /// Starts listening for the callback, validating against `expected_state`.
    /// Calling `start` while already running is a no-op.
    pub async fn start(&self, expected_state: String) -> Result<(), CallbackError> {
        let mut guard = self.running.lock().await;
        if guard.is_some() {
            return Ok(());
        }

        let listener = TcpListener::bind(("127.0.0.1", self.port))
            .await
            .map_err(|e| CallbackError::Server(e.to_string()))?;

        let cancel = CancellationToken::new();
        let (code_tx, code_rx) = oneshot::channel();
        let code_tx = Arc::new(Mutex::new(Some(code_tx)));

        let path = self.path.clone();
        let cancel_for_loop = cancel.clone();
        let join = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel_for_loop.cancelled() => break,
                    accepted = listener.accept() => {
                        let Ok((stream, _addr)) = accepted else { break };
                        let io = TokioIo::new(stream);
                        let path = path.clone();
                        let expected_state = expected_state.clone();
                        let code_tx = code_tx.clone();
                        tokio::spawn(async move {
                            let service = service_fn(move |req: Request<Incoming>| {
                                let path = path.clone();
                                let expected_state = expected_state.clone();
                                let code_tx = code_tx.clone();
                                async move { handle_request(req, &path, &expected_state, code_tx).await }
                            });
                            let _ = hyper::server::conn::http1::Builder::new()
                                .serve_connection(io, service)
                                .await;
                        });
                    }
                }
            }
        });

        *guard = Some(Running { cancel, code_rx, join });
        Ok(())
    }

    /// Blocks until the callback delivers a code, the provider denies
    /// access, or `timeout` elapses.
    pub async fn wait_for_code(&self, timeout: Duration) -> Result<String, CallbackError> {
        let mut guard = self.running.lock().await;
        let running = guard.as_mut().ok_or(CallbackError::NotStarted)?;

        match tokio::time::timeout(timeout, &mut running.code_rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(CallbackError::Server("callback channel closed".into())),
            Err(_) => Err(CallbackError::Timeout),
        }
    }

    /// Stops the listener and releases the port. Safe to call more than
    /// once, and safe to call even if `start` was never called.
    pub async fn stop(&self) {
        let mut guard = self.running.lock().await;
        if let Some(running) = guard.take() {
            running.cancel.cancel();
            let _ = running.join.await;
        }
    }
}

async fn handle_request(
    req: Request<Incoming>,
    expected_path: &str,
    expected_state: &str,
    code_tx: Arc<Mutex<Option<oneshot::Sender<CodeResult>>>>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let full_url = format!("http://127.0.0.1{}", req.uri());
    let parsed = url::Url::parse(&full_url);

    if req.uri().path() != expected_path {
        return Ok(text_response(404, "not found"));
    }

    let Ok(parsed) = parsed else {
        return Ok(text_response(400, "malformed callback URL"));
    };

    let mut code = None;
    let mut state = None;
    let mut error = None;
    for (key, value) in parsed.query_pairs() {
        match key.as_ref() {
            "code" => code = Some(value.into_owned()),
            "state" => state = Some(value.into_owned()),
            "error" => error = Some(value.into_owned()),
            _ => {}
        }
    }

    let result = if let Some(error) = error {
        Err(CallbackError::Denied(error))
    } else if state.as_deref() != Some(expected_state) {
        Err(CallbackError::StateMismatch)
    } else if let Some(code) = code {
        Ok(code)
    } else {
        Err(CallbackError::MissingCode)
    };

    let body = match &result {
        Ok(_) => success_html(),
        Err(err) => error_html(err),
    };

    if let Some(sender) = code_tx.lock().await.take() {
        let _ = sender.send(result);
    }

    Ok(html_response(body))
}

fn success_html() -> String {
    "<html><body><h1>Authentication successful</h1>\
     <p>You may close this window and return to the application.</p></body></html>"
        .to_string()
}

fn error_html(err: &CallbackError) -> String {
    format!(
        "<html><body><h1>Authentication failed</h1><p>{err}</p></body></html>"
    )
}

fn html_response(body: String) -> Response<Full<Bytes>> {
    Response::builder()
        .status(200)
        .header("content-type", "text/html; charset=utf-8")
        .body(Full::new(Bytes::from(body)))
        .expect("building a static html response never fails")
}

fn text_response(status: u16, body: &'static str) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .header("content-type", "text/plain; charset=utf-8")
        .body(Full::new(Bytes::from_static(body.as_bytes())))
        .expect("building a static text response never fails")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn redirect_uri_matches_port_and_path() {
        let server = OAuthCallbackServer::new(18080, "/callback");
        assert_eq!(server.redirect_uri(), "http://127.0.0.1:18080/callback");
    }

    #[tokio::test]
    async fn wait_for_code_without_start_errors() {
        let server = OAuthCallbackServer::new(0, "/callback");
        let result = server.wait_for_code(Duration::from_millis(10)).await;
        assert!(matches!(result, Err(CallbackError::NotStarted)));
    }

    #[tokio::test]
    async fn full_roundtrip_delivers_code() {
        let server = OAuthCallbackServer::new(0, "/callback");
        // port 0 means the OS assigns one; re-bind manually to learn it.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let server = OAuthCallbackServer::new(port, "/callback");
        server.start("xyz-state".to_string()).await.unwrap();

        let redirect_uri = server.redirect_uri();
        let url = format!("{redirect_uri}?code=abc123&state=xyz-state");
        tokio::spawn(async move {
            let _ = reqwest::get(url).await;
        });

        let code = server.wait_for_code(Duration::from_secs(5)).await.unwrap();
        assert_eq!(code, "abc123");
        server.stop().await;
    }

    #[tokio::test]
    async fn state_mismatch_is_reported() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let server = OAuthCallbackServer::new(port, "/callback");
        server.start("expected".to_string()).await.unwrap();

        let url = format!("{}?code=abc&state=wrong", server.redirect_uri());
        tokio::spawn(async move {
            let _ = reqwest::get(url).await;
        });

        let result = server.wait_for_code(Duration::from_secs(5)).await;
        assert!(matches!(result, Err(CallbackError::StateMismatch)));
        server.stop().await;
    }

    #[tokio::test]
    async fn stop_is_idempotent() {
        let server = OAuthCallbackServer::new(0, "/callback");
        server.stop().await;
        server.stop().await;
    }
}
