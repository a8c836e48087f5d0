//! Failure notification by email.
//!
//! [`SmtpNotifier`] wraps the `lettre` async SMTP transport. When `SMTP_HOST`
//! is not set, [`EmailConfig::from_env`] returns `None` and the worker falls
//! back to [`LogNotifier`], which only writes the message to the log.

use std::sync::Arc;

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use tracing::info;
use vframe_models::User;

use crate::error::{WorkerError, WorkerResult};
use crate::ports::Notifier;

/// Default SMTP port (STARTTLS).
const DEFAULT_SMTP_PORT: u16 = 587;

/// Default sender address when `SMTP_FROM` is not set.
const DEFAULT_FROM_ADDRESS: &str = "noreply@vframe.local";

/// SMTP settings.
#[derive(Debug, Clone)]
pub struct EmailConfig {
    pub smtp_host: String,
    pub smtp_port: u16,
    pub from_address: String,
    pub smtp_user: Option<String>,
    pub smtp_password: Option<String>,
}

impl EmailConfig {
    /// Load configuration from environment variables.
    ///
    /// Returns `None` if `SMTP_HOST` is not set.
    pub fn from_env() -> Option<Self> {
        let smtp_host = std::env::var("SMTP_HOST").ok().filter(|h| !h.is_empty())?;
        Some(Self {
            smtp_host,
            smtp_port: std::env::var("SMTP_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(DEFAULT_SMTP_PORT),
            from_address: std::env::var("SMTP_FROM")
                .unwrap_or_else(|_| DEFAULT_FROM_ADDRESS.to_string()),
            smtp_user: std::env::var("SMTP_USER").ok(),
            smtp_password: std::env::var("SMTP_PASSWORD").ok(),
        })
    }
}

/// Pick the SMTP notifier when configured, the log notifier otherwise.
pub fn notifier_from_env() -> Arc<dyn Notifier> {
    match EmailConfig::from_env() {
        Some(config) => {
            info!(host = %config.smtp_host, "SMTP notifications enabled");
            Arc::new(SmtpNotifier::new(config))
        }
        None => {
            info!("SMTP_HOST not set, failure notifications will only be logged");
            Arc::new(LogNotifier)
        }
    }
}

/// Subject and body of the email sent when a job fails.
pub fn failure_email(user: &User, filename: &str, message: &str) -> (String, String) {
    let subject = format!("Video processing failed: {}", filename);
    let body = format!(
        "Hello {},\n\nUnfortunately an error occurred while processing your video '{}'.\n\nError details: {}\n\nThe VFrame Team",
        user.name, filename, message
    );
    (subject, body)
}

/// Sends notification emails via SMTP.
pub struct SmtpNotifier {
    config: EmailConfig,
}

impl SmtpNotifier {
    pub fn new(config: EmailConfig) -> Self {
        Self { config }
    }

    fn build(&self, to: &str, subject: &str, body: &str) -> WorkerResult<Message> {
        let from: Mailbox = self
            .config
            .from_address
            .parse()
            .map_err(|e| WorkerError::notification_failed(format!("from address: {}", e)))?;
        let to: Mailbox = to
            .parse()
            .map_err(|e| WorkerError::notification_failed(format!("recipient: {}", e)))?;

        Message::builder()
            .from(from)
            .to(to)
            .subject(subject)
            .header(ContentType::TEXT_PLAIN)
            .body(body.to_string())
            .map_err(|e| WorkerError::notification_failed(e.to_string()))
    }
}

#[async_trait]
impl Notifier for SmtpNotifier {
    async fn send_email(&self, to: &str, subject: &str, body: &str) -> WorkerResult<()> {
        let email = self.build(to, subject, body)?;

        let mut transport_builder =
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&self.config.smtp_host)
                .map_err(|e| WorkerError::notification_failed(e.to_string()))?
                .port(self.config.smtp_port);

        if let (Some(user), Some(pass)) = (&self.config.smtp_user, &self.config.smtp_password) {
            transport_builder =
                transport_builder.credentials(Credentials::new(user.clone(), pass.clone()));
        }

        transport_builder
            .build()
            .send(email)
            .await
            .map_err(|e| WorkerError::notification_failed(e.to_string()))?;

        info!(to, subject, "Notification email sent");
        Ok(())
    }
}

/// Writes notifications to the log instead of sending them.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send_email(&self, to: &str, subject: &str, body: &str) -> WorkerResult<()> {
        info!(to, subject, body, "Email notification (SMTP not configured)");
        Ok(())
    }
}
