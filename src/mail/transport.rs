use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use lettre::message::{Mailbox, Message, MultiPart};
use lettre::transport::smtp::{authentication::Credentials, AsyncSmtpTransport};
use lettre::{AsyncTransport, Tokio1Executor};
use tracing::info;

use crate::environment::Config;
use crate::TARGET_PIPELINE;

pub const PLAIN_TEXT_NOTICE: &str =
    "This email contains an HTML version. If you see this text, your client does not support HTML.";

/// Delivers one rendered HTML email.
#[async_trait]
pub trait MailTransport: Send + Sync {
    async fn send(&self, subject: &str, html: &str) -> Result<()>;
}

/// Authenticated STARTTLS SMTP delivery.
pub struct SmtpMailer {
    mailer: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    to: Mailbox,
}

impl SmtpMailer {
    /// Fails when credentials or addresses are missing; secrets are never
    /// defaulted.
    pub fn from_config(cfg: &Config) -> Result<Self> {
        let (user, pass) = match (&cfg.smtp_user, &cfg.smtp_pass) {
            (Some(user), Some(pass)) => (user.clone(), pass.clone()),
            _ => return Err(anyhow!("SMTP_USER/SMTP_PASS missing in configuration.")),
        };
        let from_addr = cfg.smtp_from.clone().unwrap_or_else(|| user.clone());
        let to_addr = cfg
            .smtp_to
            .clone()
            .ok_or_else(|| anyhow!("SMTP_TO missing in configuration."))?;

        let from: Mailbox = from_addr
            .parse()
            .with_context(|| format!("invalid sender address '{}'", from_addr))?;
        let to: Mailbox = to_addr
            .parse()
            .with_context(|| format!("invalid recipient address '{}'", to_addr))?;

        let mailer = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&cfg.smtp_host)
            .with_context(|| format!("invalid SMTP_HOST '{}'", cfg.smtp_host))?
            .port(cfg.smtp_port)
            .credentials(Credentials::new(user, pass))
            .build();

        Ok(SmtpMailer { mailer, from, to })
    }
}

/// Multipart message with a plain-text notice and the HTML alternative.
pub fn build_message(from: &Mailbox, to: &Mailbox, subject: &str, html: &str) -> Result<Message> {
    let subject = if subject.trim().is_empty() {
        "[NEWSFEED]"
    } else {
        subject
    };
    Message::builder()
        .from(from.clone())
        .to(to.clone())
        .subject(subject)
        .multipart(MultiPart::alternative_plain_html(
            PLAIN_TEXT_NOTICE.to_string(),
            html.to_string(),
        ))
        .context("build email")
}

#[async_trait]
impl MailTransport for SmtpMailer {
    async fn send(&self, subject: &str, html: &str) -> Result<()> {
        let message = build_message(&self.from, &self.to, subject, html)?;
        self.mailer.send(message).await.context("send email")?;
        info!(target: TARGET_PIPELINE, "Sent '{}' to {}", subject, self.to);
        Ok(())
    }
}
