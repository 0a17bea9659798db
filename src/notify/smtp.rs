//! SMTP mail transport.
//!
//! Connects with implicit TLS (SMTPS) and authenticates with the configured
//! username and the password resolved from `smtp.password_env`.

use anyhow::{Context, Result};
use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use secrecy::{ExposeSecret, SecretString};
use tracing::debug;

use super::{ComposedEmail, MailTransport};
use crate::config::SmtpConfig;

pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
}

impl SmtpMailer {
    pub fn new(cfg: &SmtpConfig, password: SecretString) -> Result<Self> {
        let transport = AsyncSmtpTransport::<Tokio1Executor>::relay(&cfg.server)
            .with_context(|| format!("Invalid SMTP server: {}", cfg.server))?
            .port(cfg.port)
            .credentials(Credentials::new(
                cfg.username.clone(),
                password.expose_secret().clone(),
            ))
            .build();

        Ok(Self { transport })
    }
}

/// Turn a composed email into a MIME message.
fn build_message(email: &ComposedEmail) -> Result<Message> {
    let message = Message::builder()
        .from(email.from.parse::<Mailbox>().with_context(|| format!("Invalid sender: {}", email.from))?)
        .to(email.to.parse::<Mailbox>().with_context(|| format!("Invalid recipient: {}", email.to))?)
        .subject(email.subject.clone())
        .header(ContentType::TEXT_PLAIN)
        .body(email.body.clone())
        .context("Failed to build email")?;
    Ok(message)
}

#[async_trait]
impl MailTransport for SmtpMailer {
    async fn send(&self, email: &ComposedEmail) -> Result<()> {
        let message = build_message(email)?;
        let response = self
            .transport
            .send(message)
            .await
            .with_context(|| format!("SMTP delivery to {} failed", email.to))?;
        debug!(code = %response.code(), "SMTP accepted message");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn email() -> ComposedEmail {
        ComposedEmail {
            from: "PiggyBank <bot@example.com>".into(),
            to: "me@example.com".into(),
            subject: "Order placed".into(),
            body: "You deposited 100.00".into(),
        }
    }

    #[test]
    fn test_build_message_headers() {
        let message = build_message(&email()).unwrap();
        let raw = String::from_utf8(message.formatted()).unwrap();
        assert!(raw.contains("From: PiggyBank <bot@example.com>"));
        assert!(raw.contains("To: me@example.com"));
        assert!(raw.contains("Subject: Order placed"));
        assert!(raw.contains("You deposited 100.00"));
    }

    #[test]
    fn test_build_message_rejects_bad_address() {
        let mut bad = email();
        bad.to = "not an address".into();
        assert!(build_message(&bad).is_err());
    }

    #[tokio::test]
    async fn test_mailer_builds_without_connecting() {
        let cfg = SmtpConfig {
            server: "smtp.example.com".into(),
            port: 465,
            username: "bot@example.com".into(),
            password_env: "UNUSED".into(),
            sender_name: "PiggyBank".into(),
            sender_email: "bot@example.com".into(),
        };
        assert!(SmtpMailer::new(&cfg, SecretString::new("pw".into())).is_ok());
    }
}
