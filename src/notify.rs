//! Alert delivery.
//!
//! Sending is best-effort: [`dispatch`] logs failures and never retries, so
//! a flaky network can't abort a run or change its exit code.

use crate::config::TelegramConfig;
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

/// Errors from a single delivery attempt.
#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("telegram request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("unexpected status code '{status}': {body}")]
    UnexpectedStatus { status: u16, body: String },
}

/// Sink for alert text.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, text: &str) -> Result<(), NotifyError>;
}

/// Send `text` and swallow the outcome, logging any failure.
///
/// Returns whether delivery succeeded, for reporting only.
pub async fn dispatch(notifier: &dyn Notifier, text: &str) -> bool {
    match notifier.send(text).await {
        Ok(()) => true,
        Err(e) => {
            tracing::error!(error = %e, "failed to deliver alert");
            false
        }
    }
}

/// Dry-run sink: prints the alert to stdout instead of sending it.
#[derive(Debug, Default)]
pub struct StdoutNotifier;

#[async_trait]
impl Notifier for StdoutNotifier {
    async fn send(&self, text: &str) -> Result<(), NotifyError> {
        println!("[DRY-RUN] {text}");
        Ok(())
    }
}

/// Request body of the Bot API `sendMessage` method.
#[derive(Debug, Serialize)]
struct SendMessage<'a> {
    chat_id: &'a str,
    text: &'a str,
}

/// Delivers alerts through the Telegram Bot API.
///
/// With no bot token or chat id configured, sends are logged locally and
/// otherwise skipped.
#[derive(Debug, Clone)]
pub struct TelegramNotifier {
    config: TelegramConfig,
    client: reqwest::Client,
}

impl TelegramNotifier {
    pub fn new(config: TelegramConfig, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "failed to build http client, using defaults");
                reqwest::Client::new()
            });
        Self { config, client }
    }

    pub fn is_configured(&self) -> bool {
        !self.config.bot_token.is_empty() && !self.config.chat_id.is_empty()
    }

    /// `{base_url}/{bot_token}/sendMessage`
    fn endpoint(&self) -> String {
        format!(
            "{}/{}/sendMessage",
            self.config.base_url.trim_end_matches('/'),
            self.config.bot_token
        )
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn send(&self, text: &str) -> Result<(), NotifyError> {
        tracing::info!(text, "TELEGRAM");
        if !self.is_configured() {
            tracing::debug!("telegram bot token or chat id not set, not sending");
            return Ok(());
        }
        post_message(&self.client, &self.endpoint(), &self.config.chat_id, text).await
    }
}

/// POST one message as JSON. Anything but 200 is a failure carrying the response body.
async fn post_message(
    client: &reqwest::Client,
    endpoint: &str,
    chat_id: &str,
    text: &str,
) -> Result<(), NotifyError> {
    let resp = client
        .post(endpoint)
        .json(&SendMessage { chat_id, text })
        .send()
        .await?;

    let status = resp.status();
    if status != StatusCode::OK {
        let body = resp.text().await.unwrap_or_default();
        return Err(NotifyError::UnexpectedStatus {
            status: status.as_u16(),
            body,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{extract::State, http::HeaderMap, routing::post, Json, Router};
    use std::sync::{Arc, Mutex};

    type Captured = Arc<Mutex<Vec<(Option<String>, serde_json::Value)>>>;

    /// Serve `router` on an ephemeral local port, returning its base URL.
    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}")
    }

    /// Fake Bot API that records every request to `/my-bot/sendMessage`.
    async fn recording_api() -> (String, Captured) {
        let captured: Captured = Arc::default();
        let router = Router::new()
            .route(
                "/my-bot/sendMessage",
                post(
                    |State(captured): State<Captured>,
                     headers: HeaderMap,
                     Json(body): Json<serde_json::Value>| async move {
                        let content_type = headers
                            .get("content-type")
                            .and_then(|v| v.to_str().ok())
                            .map(str::to_string);
                        captured.lock().unwrap().push((content_type, body));
                        "{\"ok\":true}"
                    },
                ),
            )
            .with_state(Arc::clone(&captured));
        (serve(router).await, captured)
    }

    fn telegram(base_url: &str, bot_token: &str, chat_id: &str) -> TelegramNotifier {
        TelegramNotifier::new(
            TelegramConfig {
                base_url: base_url.to_string(),
                bot_token: bot_token.to_string(),
                chat_id: chat_id.to_string(),
            },
            Duration::from_secs(5),
        )
    }

    #[tokio::test]
    async fn test_post_message_sends_json_body() {
        let (base, captured) = recording_api().await;
        let client = reqwest::Client::new();

        post_message(&client, &format!("{base}/my-bot/sendMessage"), "my-chat", "my-text")
            .await
            .unwrap();

        let requests = captured.lock().unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].0.as_deref(), Some("application/json"));
        assert_eq!(
            requests[0].1,
            serde_json::json!({"chat_id": "my-chat", "text": "my-text"})
        );
    }

    #[tokio::test]
    async fn test_post_message_non_200_carries_body() {
        let router = Router::new().route(
            "/my-bot/sendMessage",
            post(|| async {
                (
                    axum::http::StatusCode::INTERNAL_SERVER_ERROR,
                    "payload-with-error",
                )
            }),
        );
        let base = serve(router).await;

        let err = post_message(
            &reqwest::Client::new(),
            &format!("{base}/my-bot/sendMessage"),
            "my-chat",
            "my-text",
        )
        .await
        .unwrap_err();

        assert!(matches!(err, NotifyError::UnexpectedStatus { status: 500, .. }));
        assert_eq!(
            err.to_string(),
            "unexpected status code '500': payload-with-error"
        );
    }

    #[tokio::test]
    async fn test_telegram_notifier_builds_endpoint_from_config() {
        let (base, captured) = recording_api().await;
        let notifier = telegram(&format!("{base}/"), "my-bot", "my-chat");

        notifier.send("Hello world").await.unwrap();

        let requests = captured.lock().unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].1["text"], "Hello world");
        assert_eq!(requests[0].1["chat_id"], "my-chat");
    }

    #[tokio::test]
    async fn test_unconfigured_telegram_is_a_noop() {
        let (base, captured) = recording_api().await;

        assert!(telegram(&base, "", "my-chat").send("hi").await.is_ok());
        assert!(telegram(&base, "my-bot", "").send("hi").await.is_ok());
        assert!(captured.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_transport_failure_is_an_error() {
        // Bind then drop to get a port nothing listens on.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = telegram(&format!("http://{addr}"), "my-bot", "my-chat")
            .send("hi")
            .await
            .unwrap_err();
        assert!(matches!(err, NotifyError::Transport(_)));
    }

    #[tokio::test]
    async fn test_dispatch_swallows_failures() {
        let router = Router::new().route(
            "/my-bot/sendMessage",
            post(|| async { (axum::http::StatusCode::FORBIDDEN, "bot was blocked") }),
        );
        let base = serve(router).await;

        assert!(!dispatch(&telegram(&base, "my-bot", "my-chat"), "hi").await);
        assert!(dispatch(&StdoutNotifier, "hi").await);
    }
}
