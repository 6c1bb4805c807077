//! Slack alerts for scheduled upgrades.
//!
//! Messages go to an Incoming Webhook as `{"text": ..., "blocks": [...]}`.
//! `text` is the notification/fallback line, `blocks` the rendered card.

use crate::chain::{truncate_body, UpgradePlan};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("webhook request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("webhook returned {status}: {body}")]
    Rejected { status: u16, body: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
    NewUpgrade,
    Reminder,
}

impl NotificationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            NotificationKind::NewUpgrade => "new_upgrade",
            NotificationKind::Reminder => "reminder",
        }
    }
}

impl std::fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Sends upgrade alerts for a chain.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(
        &self,
        chain_id: &str,
        kind: NotificationKind,
        plan: &UpgradePlan,
        current_height: u64,
    ) -> Result<(), NotifyError>;
}

/// Webhook payload.
#[derive(Debug, Clone, Serialize)]
pub struct SlackMessage {
    pub text: String,
    pub blocks: Vec<Value>,
}

/// Render the alert for `kind`.
pub fn build_message(
    chain_id: &str,
    kind: NotificationKind,
    plan: &UpgradePlan,
    current_height: u64,
) -> SlackMessage {
    let remaining = plan.blocks_remaining(current_height);

    let (text, header) = match kind {
        NotificationKind::NewUpgrade => (
            format!(
                "{} upgrade `{}` scheduled at block height {} ({} blocks remaining)",
                chain_id, plan.name, plan.height, remaining
            ),
            format!("New chain upgrade in {}", chain_id),
        ),
        NotificationKind::Reminder => (
            format!(
                "{} chain upgrade `{}` taking place in {} blocks! @here",
                chain_id, plan.name, remaining
            ),
            format!("Reminder of chain upgrade in {}", chain_id),
        ),
    };

    let mut fields = vec![
        field("Name", &plan.name),
        field("Height", &plan.height.to_string()),
        field("Current Height", &current_height.to_string()),
        field("Blocks Remaining", &remaining.to_string()),
    ];
    if let Some(info) = plan.info() {
        fields.push(field("Info", info));
    }

    let blocks = vec![
        json!({
            "type": "header",
            "text": { "type": "plain_text", "text": header, "emoji": false },
        }),
        json!({ "type": "section", "fields": fields }),
    ];

    SlackMessage { text, blocks }
}

fn field(label: &str, value: &str) -> Value {
    json!({ "type": "mrkdwn", "text": format!("{}\n`{}`", label, value) })
}

/// [`Notifier`] that posts to a Slack Incoming Webhook.
#[derive(Clone)]
pub struct SlackNotifier {
    http: reqwest::Client,
    webhook_url: String,
}

impl SlackNotifier {
    /// `http` should carry a request timeout so a stalled webhook can't hold a tick.
    pub fn new(http: reqwest::Client, webhook_url: String) -> Self {
        Self { http, webhook_url }
    }

    pub async fn send(&self, message: &SlackMessage) -> Result<(), NotifyError> {
        let resp = self
            .http
            .post(&self.webhook_url)
            .json(message)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(NotifyError::Rejected {
                status: status.as_u16(),
                body: truncate_body(&body),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl Notifier for SlackNotifier {
    async fn notify(
        &self,
        chain_id: &str,
        kind: NotificationKind,
        plan: &UpgradePlan,
        current_height: u64,
    ) -> Result<(), NotifyError> {
        let message = build_message(chain_id, kind, plan, current_height);
        self.send(&message).await?;
        debug!(chain = %chain_id, kind = %kind, upgrade = %plan.name, "slack message sent");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::State;
    use axum::http::StatusCode;
    use axum::routing::post;
    use axum::{Json, Router};
    use std::sync::Arc;
    use tokio::sync::Mutex;

    fn plan() -> UpgradePlan {
        UpgradePlan {
            name: "v2".to_string(),
            height: 1000,
            info: Some("https://github.com/example/releases/v2".to_string()),
        }
    }

    #[test]
    fn test_new_upgrade_message() {
        let msg = build_message("chain-a", NotificationKind::NewUpgrade, &plan(), 900);
        assert!(msg.text.contains("chain-a"));
        assert!(msg.text.contains("`v2`"));
        assert!(msg.text.contains("1000"));
        assert!(msg.text.contains("100 blocks remaining"));
        assert!(!msg.text.contains("@here"));

        assert_eq!(msg.blocks[0]["text"]["text"], "New chain upgrade in chain-a");
        let fields = msg.blocks[1]["fields"].as_array().unwrap();
        assert_eq!(fields.len(), 5);
        assert_eq!(fields[0]["text"], "Name\n`v2`");
        assert_eq!(fields[3]["text"], "Blocks Remaining\n`100`");
    }

    #[test]
    fn test_reminder_message() {
        let mut plan = plan();
        plan.info = None;
        let msg = build_message("chain-a", NotificationKind::Reminder, &plan, 960);
        assert_eq!(msg.text, "chain-a chain upgrade `v2` taking place in 40 blocks! @here");
        assert_eq!(msg.blocks[0]["text"]["text"], "Reminder of chain upgrade in chain-a");
        assert_eq!(msg.blocks[1]["fields"].as_array().unwrap().len(), 4);
    }

    type Received = Arc<Mutex<Vec<Value>>>;

    async fn spawn_webhook(status: StatusCode) -> (String, Received) {
        spawn_webhook_replying(status, "ok".to_string()).await
    }

    async fn spawn_webhook_replying(status: StatusCode, reply: String) -> (String, Received) {
        let received: Received = Arc::new(Mutex::new(Vec::new()));
        let handler = move |State(seen): State<Received>, Json(body): Json<Value>| {
            let reply = reply.clone();
            async move {
                seen.lock().await.push(body);
                (status, reply)
            }
        };
        let app = Router::new()
            .route("/hook", post(handler))
            .with_state(received.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{}/hook", addr), received)
    }

    #[tokio::test]
    async fn test_slack_notifier_posts_json() {
        let (url, received) = spawn_webhook(StatusCode::OK).await;
        let notifier = SlackNotifier::new(reqwest::Client::new(), url);

        notifier
            .notify("chain-a", NotificationKind::NewUpgrade, &plan(), 900)
            .await
            .unwrap();

        let seen = received.lock().await;
        assert_eq!(seen.len(), 1);
        assert!(seen[0]["text"].as_str().unwrap().contains("chain-a"));
        assert_eq!(seen[0]["blocks"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_slack_notifier_rejected() {
        let (url, _) = spawn_webhook(StatusCode::FORBIDDEN).await;
        let notifier = SlackNotifier::new(reqwest::Client::new(), url);

        let err = notifier
            .notify("chain-a", NotificationKind::Reminder, &plan(), 960)
            .await
            .unwrap_err();
        assert!(matches!(err, NotifyError::Rejected { status: 403, .. }));
    }

    #[tokio::test]
    async fn test_rejected_body_is_truncated() {
        let page = "<html>".repeat(1_000);
        let (url, _) = spawn_webhook_replying(StatusCode::BAD_GATEWAY, page).await;
        let notifier = SlackNotifier::new(reqwest::Client::new(), url);

        match notifier
            .notify("chain-a", NotificationKind::NewUpgrade, &plan(), 900)
            .await
        {
            Err(NotifyError::Rejected { status, body }) => {
                assert_eq!(status, 502);
                assert!(body.len() <= 256 + 3);
                assert!(body.ends_with("..."));
            }
            other => panic!("expected rejected webhook, got {:?}", other),
        }
    }
}
