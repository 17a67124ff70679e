//! Alert delivery.
//!
//! Alerts are one-shot e-mails. Delivery failures are reported to the
//! caller as `NotifyError` and are never retried.

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use moodwatch_core::EmotionLabel;
use thiserror::Error;

use crate::config::MailConfig;

const ALERT_SUBJECT: &str = "Alert: Negative Emotion Detected!";

#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("invalid mail address '{address}': {source}")]
    Address {
        address: String,
        #[source]
        source: lettre::address::AddressError,
    },
    #[error("mail is not configured: {0}")]
    NotConfigured(&'static str),
    #[error("failed to build message: {0}")]
    Message(#[from] lettre::error::Error),
    #[error("smtp: {0}")]
    Smtp(#[from] lettre::transport::smtp::Error),
}

/// Sends an alert for a detected emotion.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_alert(&self, label: EmotionLabel) -> Result<(), NotifyError>;

    /// Whether alerts actually leave the process.
    fn delivers(&self) -> bool {
        true
    }
}

/// Alert body text for `label`.
pub fn alert_body(label: EmotionLabel) -> String {
    format!("A negative emotion was detected in your child: {label}")
}

/// SMTP notifier backed by lettre's tokio transport.
pub struct SmtpNotifier {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    to: Mailbox,
}

impl SmtpNotifier {
    /// Build the transport and parse both addresses. Nothing is sent here.
    pub fn new(config: &MailConfig) -> Result<Self, NotifyError> {
        let sender = config
            .sender()
            .ok_or(NotifyError::NotConfigured("MAIL_USERNAME or MAIL_SENDER"))?;
        let recipient = config
            .recipient
            .as_deref()
            .ok_or(NotifyError::NotConfigured("PARENT_EMAIL"))?;

        let from = parse_mailbox(sender)?;
        let to = parse_mailbox(recipient)?;

        let mut builder = if config.use_tls {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.server)?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.server)
        };
        builder = builder.port(config.port).timeout(Some(config.timeout));

        if let (Some(user), Some(pass)) = (&config.username, &config.password) {
            builder = builder.credentials(Credentials::new(user.clone(), pass.clone()));
        }

        tracing::info!(
            server = %config.server,
            port = config.port,
            tls = config.use_tls,
            to = %to,
            "smtp notifier configured"
        );

        Ok(Self {
            transport: builder.build(),
            from,
            to,
        })
    }

    fn message(&self, label: EmotionLabel) -> Result<Message, NotifyError> {
        Ok(Message::builder()
            .from(self.from.clone())
            .to(self.to.clone())
            .subject(ALERT_SUBJECT)
            .header(ContentType::TEXT_PLAIN)
            .body(alert_body(label))?)
    }
}

#[async_trait]
impl Notifier for SmtpNotifier {
    async fn send_alert(&self, label: EmotionLabel) -> Result<(), NotifyError> {
        let message = self.message(label)?;
        let response = self.transport.send(message).await?;
        tracing::info!(emotion = %label, code = %response.code(), "alert e-mail sent");
        Ok(())
    }
}

/// Stand-in used when mail is not configured: alerts are only logged.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send_alert(&self, label: EmotionLabel) -> Result<(), NotifyError> {
        tracing::warn!(emotion = %label, "alert raised but mail delivery is disabled");
        Ok(())
    }

    fn delivers(&self) -> bool {
        false
    }
}

fn parse_mailbox(address: &str) -> Result<Mailbox, NotifyError> {
    address.parse().map_err(|source| NotifyError::Address {
        address: address.to_string(),
        source,
    })
}
