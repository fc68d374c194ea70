//! Outbound notification senders.
//!
//! Email and SMS are collaborators behind the [`Notifier`] trait; the default
//! implementations record the delivery intent in the log and the activity
//! stream. Dispatch is fire-and-forget: a status change that succeeds is
//! never rolled back because a notification failed.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::events::{log_activity, EventBus, Loggable, Severity};

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Notification {
    pub id: Uuid,
    #[schema(example = "ada@example.com")]
    pub recipient: String,
    #[schema(example = "Your reimbursement was approved")]
    pub subject: String,
    pub body: String,
}

impl Notification {
    pub fn new(recipient: impl Into<String>, subject: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            recipient: recipient.into(),
            subject: subject.into(),
            body: body.into(),
        }
    }
}

impl Loggable for Notification {
    fn entity_type() -> &'static str { "notification" }
    fn subject_id(&self) -> Uuid { self.id }
    fn severity(&self) -> Severity { Severity::Noise }
}

#[derive(thiserror::Error, Debug)]
#[error("notification delivery failed: {0}")]
pub struct NotifyError(pub String);

#[async_trait]
pub trait Notifier: Send + Sync {
    fn channel(&self) -> &'static str;
    async fn send(&self, notification: &Notification) -> Result<(), NotifyError>;
}

/// Default email sender: logs the intent. Wire a real provider here without
/// touching any caller.
#[derive(Debug, Default)]
pub struct LogEmailNotifier;

#[async_trait]
impl Notifier for LogEmailNotifier {
    fn channel(&self) -> &'static str {
        "email"
    }

    async fn send(&self, notification: &Notification) -> Result<(), NotifyError> {
        tracing::info!(
            recipient = %notification.recipient,
            subject = %notification.subject,
            "email notification dispatched"
        );
        Ok(())
    }
}

/// Default SMS sender: logs the intent.
#[derive(Debug, Default)]
pub struct LogSmsNotifier;

#[async_trait]
impl Notifier for LogSmsNotifier {
    fn channel(&self) -> &'static str {
        "sms"
    }

    async fn send(&self, notification: &Notification) -> Result<(), NotifyError> {
        tracing::info!(
            recipient = %notification.recipient,
            "sms notification dispatched"
        );
        Ok(())
    }
}

pub struct NotifierSet {
    pub email: Box<dyn Notifier>,
    pub sms: Box<dyn Notifier>,
}

impl Default for NotifierSet {
    fn default() -> Self {
        Self {
            email: Box::new(LogEmailNotifier),
            sms: Box::new(LogSmsNotifier),
        }
    }
}

/// Fire-and-forget dispatch after a successful mutation. Failures are logged
/// and recorded in the activity stream; the caller's write stands either way.
pub fn dispatch(
    notifiers: &std::sync::Arc<NotifierSet>,
    event_bus: &EventBus,
    channel: &'static str,
    notification: Notification,
    actor_id: Option<Uuid>,
) {
    let notifiers = notifiers.clone();
    let event_bus = event_bus.clone();

    tokio::spawn(async move {
        let notifier = match channel {
            "sms" => &notifiers.sms,
            _ => &notifiers.email,
        };

        match notifier.send(&notification).await {
            Ok(()) => log_activity(&event_bus, "sent", actor_id, &notification),
            Err(err) => {
                tracing::warn!(channel, error = %err, "notification delivery failed");
                log_activity(&event_bus, "failed", actor_id, &notification);
            }
        }
    });
}
