use async_trait::async_trait;
use lettre::message::{header, Mailbox, Message};
use lettre::transport::smtp::{authentication::Credentials, AsyncSmtpTransport};
use lettre::{AsyncTransport, Tokio1Executor};

use super::{deliver_with_retry, Channel, ChannelRuntime, SendError, ValidationOutcome};
use crate::config::EmailConfig;
use crate::pipeline::types::{Alert, DeliveryOutcome};

const NAME: &str = "email";

/// SMTP delivery. The transport is built once; a bad host leaves the channel
/// invalid instead of failing construction.
pub struct EmailChannel {
    cfg: EmailConfig,
    rt: ChannelRuntime,
    mailer: Result<AsyncSmtpTransport<Tokio1Executor>, String>,
}

impl EmailChannel {
    pub fn new(cfg: EmailConfig, rt: ChannelRuntime) -> Self {
        let mailer = build_mailer(&cfg);
        Self { cfg, rt, mailer }
    }

    fn mailboxes(&self) -> Result<(Mailbox, Mailbox), String> {
        let from: Mailbox = self
            .cfg
            .from
            .parse()
            .map_err(|e| format!("invalid NOTIFY_EMAIL_FROM: {e}"))?;
        let to: Mailbox = self
            .cfg
            .to
            .parse()
            .map_err(|e| format!("invalid NOTIFY_EMAIL_TO: {e}"))?;
        Ok((from, to))
    }
}

fn build_mailer(cfg: &EmailConfig) -> Result<AsyncSmtpTransport<Tokio1Executor>, String> {
    if cfg.smtp_host.trim().is_empty() {
        return Err("SMTP_HOST missing".to_string());
    }
    let creds = Credentials::new(cfg.smtp_user.clone(), cfg.smtp_pass.clone());
    AsyncSmtpTransport::<Tokio1Executor>::relay(cfg.smtp_host.trim())
        .map(|b| b.credentials(creds).build())
        .map_err(|e| format!("invalid SMTP_HOST: {e}"))
}

fn email_subject(alert: &Alert) -> String {
    format!(
        "{} alert: {} ({:.0}%)",
        alert.category,
        alert.subject,
        alert.confidence * 100.0
    )
}

#[async_trait]
impl Channel for EmailChannel {
    fn name(&self) -> &str {
        NAME
    }

    fn is_enabled(&self) -> bool {
        self.cfg.enabled
    }

    async fn validate(&self) -> ValidationOutcome {
        if let Err(e) = &self.mailer {
            return ValidationOutcome::invalid(NAME, e.clone());
        }
        if self.cfg.smtp_user.trim().is_empty() || self.cfg.smtp_pass.is_empty() {
            return ValidationOutcome::invalid(NAME, "SMTP_USER/SMTP_PASS missing");
        }
        match self.mailboxes() {
            Ok(_) => ValidationOutcome::ok(NAME),
            Err(e) => ValidationOutcome::invalid(NAME, e),
        }
    }

    async fn send(&self, alert: &Alert) -> DeliveryOutcome {
        let mailer = match &self.mailer {
            Ok(m) => m,
            Err(e) => return DeliveryOutcome::failed(NAME, e.clone(), 0, 0),
        };
        let (from, to) = match self.mailboxes() {
            Ok(v) => v,
            Err(e) => return DeliveryOutcome::failed(NAME, e, 0, 0),
        };
        let msg = match Message::builder()
            .from(from)
            .to(to)
            .subject(email_subject(alert))
            .header(header::ContentType::TEXT_PLAIN)
            .body(alert.formatted_message.clone())
        {
            Ok(m) => m,
            Err(e) => return DeliveryOutcome::failed(NAME, format!("build email: {e}"), 0, 0),
        };

        let msg = &msg;
        deliver_with_retry(NAME, &self.rt, move || async move {
            match mailer.send(msg.clone()).await {
                Ok(resp) => Ok(resp.message().next().map(|line| line.to_string())),
                Err(e) if e.is_permanent() => Err(SendError::permanent(format!("smtp: {e}"))),
                Err(e) => Err(SendError::retryable(format!("smtp: {e}"))),
            }
        })
        .await
    }
}
