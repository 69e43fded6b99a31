//! SMTP email notifier via `lettre`.

use async_trait::async_trait;
use cadence_core::ports::{Notification, Notifier, NotifyError};
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

use crate::config::EmailConfig;

const SUBMISSION_PORT: u16 = 587;
const IMPLICIT_TLS_PORT: u16 = 465;

/// Sends one email per completed or failed task.
#[derive(Debug)]
pub struct EmailNotifier {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    to: Vec<Mailbox>,
}

fn mailbox(addr: &str) -> Result<Mailbox, NotifyError> {
    addr.parse()
        .map_err(|e: lettre::address::AddressError| NotifyError::Config(format!("{addr}: {e}")))
}

impl EmailNotifier {
    /// Port 465 uses implicit TLS, other ports STARTTLS unless `tls = false`.
    /// `SMTP_USERNAME` and `SMTP_PASSWORD` are used as credentials when both
    /// are set.
    pub fn from_config(config: &EmailConfig) -> Result<Self, NotifyError> {
        let from = mailbox(&config.from)?;
        let to = config
            .to
            .iter()
            .map(|addr| mailbox(addr))
            .collect::<Result<Vec<_>, _>>()?;
        if to.is_empty() {
            return Err(NotifyError::Config(
                "at least one recipient is required".to_string(),
            ));
        }

        let host = config.smtp_host.as_str();
        let port = config.smtp_port.unwrap_or(SUBMISSION_PORT);
        let mut builder = if port == IMPLICIT_TLS_PORT {
            AsyncSmtpTransport::<Tokio1Executor>::relay(host)
                .map_err(|e| NotifyError::Config(e.to_string()))?
        } else if config.tls.unwrap_or(true) {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host)
                .map_err(|e| NotifyError::Config(e.to_string()))?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(host)
        }
        .port(port);

        if let (Ok(username), Ok(password)) =
            (std::env::var("SMTP_USERNAME"), std::env::var("SMTP_PASSWORD"))
        {
            builder = builder.credentials(Credentials::new(username, password));
        }

        Ok(Self {
            transport: builder.build(),
            from,
            to,
        })
    }

    fn message(&self, notification: &Notification) -> Result<Message, NotifyError> {
        let mut builder = Message::builder().from(self.from.clone());
        for recipient in &self.to {
            builder = builder.to(recipient.clone());
        }
        builder
            .subject(notification.subject())
            .body(notification.body())
            .map_err(|e| NotifyError::Delivery(e.to_string()))
    }
}

#[async_trait]
impl Notifier for EmailNotifier {
    async fn notify(&self, notification: &Notification) -> Result<(), NotifyError> {
        let email = self.message(notification)?;
        self.transport
            .send(email)
            .await
            .map_err(|e| NotifyError::Delivery(e.to_string()))?;

        tracing::info!(
            channel = "email",
            task_id = %notification.task_id,
            recipients = self.to.len(),
            "notification delivered"
        );
        Ok(())
    }

    fn channel_name(&self) -> &str {
        "email"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cadence_core::{Outcome, TaskId};

    fn config(to: &[&str]) -> EmailConfig {
        EmailConfig {
            smtp_host: "localhost".to_string(),
            smtp_port: Some(2525),
            tls: Some(false),
            from: "Cadence <cadence@example.com>".to_string(),
            to: to.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn builds_message_for_failure() {
        let notifier = EmailNotifier::from_config(&config(&["ops@example.com"])).unwrap();
        let notification =
            Notification::new(TaskId::new(3), "Cleanup", Outcome::failure("no space left"));

        let message = notifier.message(&notification).unwrap();
        let raw = String::from_utf8(message.formatted()).unwrap();
        assert!(raw.contains("Subject: Task Cleanup failed"));
        assert!(raw.contains("Error: no space left"));
        assert!(raw.contains("ops@example.com"));
    }

    #[test]
    fn rejects_bad_addresses() {
        assert!(matches!(
            EmailNotifier::from_config(&config(&["not-an-email"])),
            Err(NotifyError::Config(_))
        ));
        assert!(matches!(
            EmailNotifier::from_config(&config(&[])),
            Err(NotifyError::Config(_))
        ));
    }
}
