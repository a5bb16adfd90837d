//! # cb-relay-smtp
//!
//! SMTP implementation of `RelayTransport`.
//! Credentials that are missing or still hold sample values mean the relay
//! is not configured, and no transport is built at all.

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use cb_core::relay::RelayMessage;
use cb_core::traits::RelayTransport;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, info, warn};

/// Bounds connect, greeting and each socket operation.
const SMTP_TIMEOUT: Duration = Duration::from_secs(15);

pub struct SmtpSettings {
    pub host: Option<String>,
    pub port: u16,
    pub user: Option<String>,
    pub pass: Option<SecretString>,
    /// Implicit TLS (usually port 465). Otherwise STARTTLS is required.
    pub secure: bool,
    /// Sender address; defaults to the SMTP user.
    pub from: Option<String>,
}

/// True when any credential is missing or still holds a sample value.
pub fn looks_like_placeholder(host: &str, user: &str, pass: &str) -> bool {
    host.is_empty()
        || user.is_empty()
        || pass.is_empty()
        || host.contains("example.com")
        || user.contains("your_smtp_user")
        || pass.contains("your_smtp_password")
}

pub struct SmtpRelay {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpRelay {
    /// Builds the transport, or returns `None` when relay is not configured
    /// or has no usable sender address.
    pub fn from_settings(settings: &SmtpSettings) -> anyhow::Result<Option<Self>> {
        let host = settings.host.as_deref().unwrap_or_default().trim();
        let user = settings.user.as_deref().unwrap_or_default().trim();
        let pass = settings.pass.as_ref().map(|p| p.expose_secret()).unwrap_or_default();
        if looks_like_placeholder(host, user, pass) {
            debug!("SMTP credentials absent or placeholders, relay disabled");
            return Ok(None);
        }

        let from_address = settings
            .from
            .as_deref()
            .map(str::trim)
            .filter(|f| !f.is_empty())
            .unwrap_or(user);
        let Ok(from) = from_address.parse::<Mailbox>() else {
            warn!(
                sender = from_address,
                "relay sender is not an email address, set RELAY_FROM_EMAIL; relay disabled"
            );
            return Ok(None);
        };

        let builder = if settings.secure {
            AsyncSmtpTransport::<Tokio1Executor>::relay(host)
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host)
        }
        .with_context(|| format!("invalid SMTP host {host}"))?;

        let transport = builder
            .port(settings.port)
            .credentials(Credentials::new(user.to_owned(), pass.to_owned()))
            .timeout(Some(SMTP_TIMEOUT))
            .build();

        info!(host, port = settings.port, secure = settings.secure, "SMTP relay configured");
        Ok(Some(Self { transport, from }))
    }
}

#[async_trait]
impl RelayTransport for SmtpRelay {
    async fn send(&self, message: &RelayMessage) -> anyhow::Result<()> {
        let to: Mailbox = message
            .to
            .parse()
            .with_context(|| format!("invalid recipient address {}", message.to))?;
        let email = Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(message.subject.clone())
            .header(ContentType::TEXT_PLAIN)
            .body(message.body.clone())?;

        self.transport.send(email).await.context("SMTP send failed")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(host: &str, user: &str, pass: &str) -> SmtpSettings {
        SmtpSettings {
            host: Some(host.to_owned()),
            port: 587,
            user: Some(user.to_owned()),
            pass: Some(SecretString::from(pass.to_owned())),
            secure: false,
            from: None,
        }
    }

    #[test]
    fn test_placeholders_disable_relay() {
        assert!(looks_like_placeholder("", "user", "pass"));
        assert!(looks_like_placeholder("smtp.example.com", "user", "pass"));
        assert!(looks_like_placeholder("smtp.mail.test", "your_smtp_user", "pass"));
        assert!(looks_like_placeholder("smtp.mail.test", "user", "your_smtp_password"));
        assert!(!looks_like_placeholder("smtp.mail.test", "user", "hunter2"));
    }

    #[test]
    fn test_from_settings_without_credentials_is_none() {
        let missing = SmtpSettings {
            host: None,
            port: 587,
            user: None,
            pass: None,
            secure: false,
            from: None,
        };
        assert!(SmtpRelay::from_settings(&missing).unwrap().is_none());
        assert!(SmtpRelay::from_settings(&settings("smtp.example.com", "u", "p")).unwrap().is_none());
    }

    #[test]
    fn test_sender_must_be_a_mailbox() {
        // SMTP users such as `apikey` are not addresses.
        let api_key_user = settings("smtp.mail.test", "apikey", "hunter2");
        assert!(SmtpRelay::from_settings(&api_key_user).unwrap().is_none());

        let bad_from = SmtpSettings {
            from: Some("board".to_owned()),
            ..settings("smtp.mail.test", "board@mail.test", "hunter2")
        };
        assert!(SmtpRelay::from_settings(&bad_from).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_explicit_sender_overrides_user() {
        let relay = SmtpSettings {
            from: Some("Chavrusa Board <board@mail.test>".to_owned()),
            ..settings("smtp.mail.test", "apikey", "hunter2")
        };
        let relay = SmtpRelay::from_settings(&relay).unwrap().unwrap();
        assert_eq!(relay.from.email.to_string(), "board@mail.test");
    }
}
