//! Outgoing mail for password resets.

use anyhow::Context;
use async_trait::async_trait;
use lettre::{
    message::header::ContentType, transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use tracing::info;

use crate::config::MailConfig;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailMessage {
    pub recipient: String,
    pub subject: String,
    /// Name of the message layout, e.g. `password-reset`.
    pub template: &'static str,
    pub reset_url: String,
}

impl MailMessage {
    fn text_body(&self) -> String {
        format!(
            "Hello,\n\n\
             You have requested a password reset. Follow the link below within the \
             next hour to choose a new password:\n\n{}\n\n\
             If you didn't request this email, please ignore it.\n",
            self.reset_url
        )
    }
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, message: MailMessage) -> anyhow::Result<()>;
}

pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from_address: String,
}

impl SmtpMailer {
    pub fn new(host: &str, cfg: &MailConfig) -> anyhow::Result<Self> {
        let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host)
            .with_context(|| format!("smtp relay {host}"))?
            .port(cfg.port)
            .credentials(Credentials::new(cfg.username.clone(), cfg.password.clone()))
            .build();
        Ok(Self {
            transport,
            from_address: cfg.from_address.clone(),
        })
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, message: MailMessage) -> anyhow::Result<()> {
        let email = Message::builder()
            .from(self.from_address.parse().context("parse from address")?)
            .to(message.recipient.parse().context("parse recipient address")?)
            .subject(&message.subject)
            .header(ContentType::TEXT_PLAIN)
            .body(message.text_body())
            .context("build message")?;

        self.transport.send(email).await.context("smtp send")?;
        info!(to = %message.recipient, template = message.template, "mail sent");
        Ok(())
    }
}

/// Writes messages to the log instead of delivering them. Used when no SMTP
/// relay is configured.
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, message: MailMessage) -> anyhow::Result<()> {
        info!(
            to = %message.recipient,
            subject = %message.subject,
            template = message.template,
            reset_url = %message.reset_url,
            "mail delivery disabled; logging message"
        );
        Ok(())
    }
}
