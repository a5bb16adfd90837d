//! # Relay Notification
//!
//! Email is the only channel between a poster and a respondent; neither side
//! sees the other's address. Delivery goes through a `RelayTransport` when
//! one is configured. Each call site states what a failed delivery means for
//! its request through `OnFailure`.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::{AppError, Result};
use crate::models::{Conversation, Post};
use crate::traits::RelayTransport;

const SUBJECT_PREFIX: &str = "[Chavrusashaft]";

/// A plain-text email.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayMessage {
    pub to: String,
    pub subject: String,
    pub body: String,
}

/// What a failed or impossible delivery does to the triggering request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnFailure {
    /// The request succeeds; the caller reports a warning.
    Warn,
    /// The request fails.
    Fail,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Sent,
    NotConfigured,
    Failed,
}

#[derive(Clone, Default)]
pub struct Relay {
    transport: Option<Arc<dyn RelayTransport>>,
}

impl Relay {
    pub fn new(transport: Option<Arc<dyn RelayTransport>>) -> Self {
        Self { transport }
    }

    pub fn is_configured(&self) -> bool {
        self.transport.is_some()
    }

    /// Sends `message`. Under `OnFailure::Warn` this never errors; under
    /// `OnFailure::Fail` anything but `Delivery::Sent` becomes `AppError::Relay`.
    pub async fn dispatch(&self, message: &RelayMessage, on_failure: OnFailure) -> Result<Delivery> {
        let Some(transport) = &self.transport else {
            debug!(subject = %message.subject, "relay not configured, skipping email");
            return match on_failure {
                OnFailure::Warn => Ok(Delivery::NotConfigured),
                OnFailure::Fail => Err(AppError::Relay("Email relay is not configured.".into())),
            };
        };

        match transport.send(message).await {
            Ok(()) => Ok(Delivery::Sent),
            Err(err) => {
                warn!(error = ?err, subject = %message.subject, "relay email failed");
                match on_failure {
                    OnFailure::Warn => Ok(Delivery::Failed),
                    OnFailure::Fail => Err(AppError::Relay("Relay email delivery failed.".into())),
                }
            }
        }
    }
}

pub fn manage_url(base_url: &str, token: &str) -> String {
    format!("{}/manage/{}", base_url.trim_end_matches('/'), token)
}

/// Confirmation to the poster that the post is live.
pub fn post_live(post: &Post, manage_url: &str) -> RelayMessage {
    let body = [
        "Your learning request is now active on Chavrusashaft.".to_owned(),
        String::new(),
        format!("Topic: {}", post.topic),
        format!("Active until: {}", post.expires_at.format("%B %-d, %Y")),
        String::new(),
        format!("Manage link: {manage_url}"),
    ];
    RelayMessage {
        to: post.email.clone(),
        subject: format!("{SUBJECT_PREFIX} Your post is live"),
        body: body.join("\n"),
    }
}

/// Tells the poster someone responded. Carries the manage link, not the
/// respondent's address.
pub fn response_notice(post: &Post, conversation: &Conversation, manage_url: &str) -> RelayMessage {
    let mut lines = vec![
        "You received a new response to your learning request.".to_owned(),
        String::new(),
        format!("Category: {}", post.category),
        format!("Topic: {}", post.topic),
        String::new(),
        "Message:".to_owned(),
        conversation.message.clone(),
        String::new(),
    ];
    if !conversation.time_zone.is_empty() {
        lines.push(format!("Responder time zone: {}", conversation.time_zone));
    }
    if !conversation.availability.is_empty() {
        lines.push(format!("Responder availability: {}", conversation.availability));
    }
    lines.push(format!("Manage your post: {manage_url}"));

    RelayMessage {
        to: post.email.clone(),
        subject: format!("{SUBJECT_PREFIX} New response to: {}", post.topic),
        body: lines.join("\n"),
    }
}

/// The poster's reply, routed to the respondent.
pub fn owner_reply(post: &Post, conversation: &Conversation, message: &str) -> RelayMessage {
    let body = [
        "You received a reply from the post owner.".to_owned(),
        String::new(),
        format!("Category: {}", post.category),
        format!("Topic: {}", post.topic),
        String::new(),
        "Reply:".to_owned(),
        message.to_owned(),
        String::new(),
        "If you want to share direct contact, include it in your next message.".to_owned(),
    ];
    RelayMessage {
        to: conversation.responder_email.clone(),
        subject: format!("{SUBJECT_PREFIX} Reply about: {}", post.topic),
        body: body.join("\n"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::MockRelayTransport;

    fn message() -> RelayMessage {
        RelayMessage {
            to: "poster@mail.test".into(),
            subject: "subject".into(),
            body: "body".into(),
        }
    }

    fn failing() -> Relay {
        let mut transport = MockRelayTransport::new();
        transport
            .expect_send()
            .returning(|_| Err(anyhow::anyhow!("connection refused")));
        Relay::new(Some(Arc::new(transport)))
    }

    #[tokio::test]
    async fn test_unconfigured_relay_warns_or_fails() {
        let relay = Relay::default();
        assert!(!relay.is_configured());
        assert_eq!(relay.dispatch(&message(), OnFailure::Warn).await.unwrap(), Delivery::NotConfigured);
        assert!(matches!(
            relay.dispatch(&message(), OnFailure::Fail).await,
            Err(AppError::Relay(_))
        ));
    }

    #[tokio::test]
    async fn test_transport_failure_follows_policy() {
        assert_eq!(failing().dispatch(&message(), OnFailure::Warn).await.unwrap(), Delivery::Failed);
        assert!(matches!(
            failing().dispatch(&message(), OnFailure::Fail).await,
            Err(AppError::Relay(_))
        ));
    }

    #[tokio::test]
    async fn test_successful_send() {
        let mut transport = MockRelayTransport::new();
        transport
            .expect_send()
            .withf(|m| m.to == "poster@mail.test")
            .times(1)
            .returning(|_| Ok(()));
        let relay = Relay::new(Some(Arc::new(transport)));
        assert_eq!(relay.dispatch(&message(), OnFailure::Fail).await.unwrap(), Delivery::Sent);
    }

    #[test]
    fn test_manage_url_trims_trailing_slash() {
        assert_eq!(manage_url("https://board.test/", "abc"), "https://board.test/manage/abc");
    }
}
