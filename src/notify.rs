//! Notification gateway.
//!
//! Notifications go out on NATS as `notifications.user.<id>` and
//! `notifications.admins`. Delivery is best effort: callers go through
//! [`fan_out`], which logs failures instead of returning them.

use async_trait::async_trait;
use serde::Serialize;
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Notification { pub title: String, pub message: String, pub payload: serde_json::Value }

#[async_trait]
pub trait NotificationGateway: Send + Sync {
    async fn notify_user(&self, user_id: Uuid, notification: &Notification) -> anyhow::Result<()>;
    async fn notify_admins(&self, notification: &Notification) -> anyhow::Result<()>;
}

/// Sends one notification to the customer and one to every admin.
pub async fn fan_out(gateway: &dyn NotificationGateway, user_id: Uuid, to_user: &Notification, to_admins: &Notification) {
    if let Err(e) = gateway.notify_user(user_id, to_user).await {
        tracing::warn!(%user_id, error = %e, "failed to notify customer");
    }
    if let Err(e) = gateway.notify_admins(to_admins).await {
        tracing::warn!(error = %e, "failed to notify admins");
    }
}

pub struct NatsNotifier { client: Option<async_nats::Client> }

impl NatsNotifier {
    pub fn new(client: Option<async_nats::Client>) -> Self { Self { client } }

    /// An unreachable server degrades to log-only delivery.
    pub async fn connect(url: Option<&str>) -> Self {
        let client = match url {
            Some(url) => match async_nats::connect(url).await {
                Ok(c) => Some(c),
                Err(e) => { tracing::warn!(%url, error = %e, "NATS unavailable, notifications will only be logged"); None }
            },
            None => None,
        };
        Self { client }
    }

    async fn publish(&self, subject: String, notification: &Notification) -> anyhow::Result<()> {
        match &self.client {
            Some(client) => client.publish(subject, serde_json::to_vec(notification)?.into()).await?,
            None => tracing::debug!(%subject, title = %notification.title, "notification (no NATS)"),
        }
        Ok(())
    }
}

#[async_trait]
impl NotificationGateway for NatsNotifier {
    async fn notify_user(&self, user_id: Uuid, notification: &Notification) -> anyhow::Result<()> {
        self.publish(format!("notifications.user.{}", user_id), notification).await
    }

    async fn notify_admins(&self, notification: &Notification) -> anyhow::Result<()> {
        self.publish("notifications.admins".to_string(), notification).await
    }
}
