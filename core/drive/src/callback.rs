//! Loopback HTTP receiver for the OAuth2 redirect.
//!
//! Binds an ephemeral port on 127.0.0.1, serves a single callback and shuts
//! down once the authorization code (or a denial) has arrived.

use axum::extract::{Query, State};
use axum::response::Html;
use axum::routing::get;
use axum::Router;
use serde::Deserialize;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use photodrive_common::{Error, Result};

/// Query parameters Google appends to the redirect URL.
#[derive(Debug, Clone, Deserialize)]
struct CallbackParams {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
}

type CallbackSender = Arc<Mutex<Option<oneshot::Sender<CallbackParams>>>>;

/// One-shot HTTP server receiving the OAuth2 redirect.
pub struct LoopbackReceiver {
    listener: TcpListener,
    addr: SocketAddr,
}

impl LoopbackReceiver {
    /// Bind an ephemeral port on the loopback interface.
    pub async fn bind() -> Result<Self> {
        let listener = TcpListener::bind(("127.0.0.1", 0)).await?;
        let addr = listener.local_addr()?;
        debug!("OAuth2 callback listening on {}", addr);
        Ok(Self { listener, addr })
    }

    /// Redirect URL to register with the authorization request.
    pub fn redirect_url(&self) -> String {
        format!("http://{}/", self.addr)
    }

    /// Serve until the first callback arrives and return its code.
    ///
    /// # Errors
    /// - The user denied consent (`error=` in the callback)
    /// - The callback `state` does not match `expected_state`
    /// - The callback carries no code
    pub async fn wait_for_code(self, expected_state: &str) -> Result<String> {
        let (tx, rx) = oneshot::channel();
        let sender: CallbackSender = Arc::new(Mutex::new(Some(tx)));

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let app = Router::new()
            .route("/", get(handle_callback))
            .with_state(sender);

        let server = tokio::spawn(async move {
            axum::serve(self.listener, app)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
        });

        let received = rx.await;
        let _ = shutdown_tx.send(());
        if let Ok(Err(e)) = server.await {
            warn!("OAuth2 callback server stopped with error: {}", e);
        }

        let params = received.map_err(|_| {
            Error::Authentication("Callback server stopped before receiving a code".to_string())
        })?;

        if let Some(error) = params.error {
            return Err(Error::Authentication(format!(
                "Authorization denied: {}",
                error
            )));
        }

        if params.state.as_deref() != Some(expected_state) {
            return Err(Error::Authentication(
                "Callback state does not match the authorization request".to_string(),
            ));
        }

        params.code.ok_or_else(|| {
            Error::Authentication("Callback did not include an authorization code".to_string())
        })
    }
}

async fn handle_callback(
    State(sender): State<CallbackSender>,
    Query(params): Query<CallbackParams>,
) -> Html<&'static str> {
    let page = if params.error.is_some() {
        "<html><body>Authorization was denied. You can close this window.</body></html>"
    } else {
        "<html><body>Authorization complete. You can close this window.</body></html>"
    };

    let tx = match sender.lock() {
        Ok(mut guard) => guard.take(),
        Err(poisoned) => poisoned.into_inner().take(),
    };
    if let Some(tx) = tx {
        let _ = tx.send(params);
    }

    Html(page)
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn callback(query: &'static str) -> Result<String> {
        let receiver = LoopbackReceiver::bind().await.unwrap();
        let url = format!("{}?{}", receiver.redirect_url(), query);

        let waiter = tokio::spawn(async move { receiver.wait_for_code("xyz").await });
        let response = reqwest::get(&url).await.unwrap();
        assert!(response.status().is_success());

        waiter.await.unwrap()
    }

    #[tokio::test]
    async fn test_redirect_url_is_loopback() {
        let receiver = LoopbackReceiver::bind().await.unwrap();
        let url = receiver.redirect_url();
        assert!(url.starts_with("http://127.0.0.1:"));
        assert!(url.ends_with('/'));
    }

    #[tokio::test]
    async fn test_receives_code() {
        let code = callback("code=4%2Fabc&state=xyz").await.unwrap();
        assert_eq!(code, "4/abc");
    }

    #[tokio::test]
    async fn test_denied_consent() {
        let err = callback("error=access_denied&state=xyz").await.unwrap_err();
        assert!(matches!(err, Error::Authentication(ref msg) if msg.contains("access_denied")));
    }

    #[tokio::test]
    async fn test_state_mismatch() {
        let err = callback("code=abc&state=forged").await.unwrap_err();
        assert!(matches!(err, Error::Authentication(_)));
    }
}
