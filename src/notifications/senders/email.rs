use async_trait::async_trait;
use lettre::message::{Mailbox, header::ContentType};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use std::time::Duration;

use super::{NotificationSender, SenderError};
use crate::notifications::models::ChannelConfig;

/// Delivers notifications over SMTP, either with implicit TLS or STARTTLS.
pub struct EmailSender {
    timeout: Duration,
}

impl EmailSender {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

fn mailbox(address: &str) -> Result<Mailbox, SenderError> {
    address
        .parse::<Mailbox>()
        .map_err(|e| SenderError::InvalidConfiguration(format!("Invalid address '{address}': {e}")))
}

#[async_trait]
impl NotificationSender for EmailSender {
    async fn send(
        &self,
        config: &ChannelConfig,
        subject: &str,
        body: &str,
    ) -> Result<(), SenderError> {
        let ChannelConfig::Email {
            smtp_server,
            smtp_port,
            smtp_user,
            smtp_password,
            receiver_email,
            is_ssl,
        } = config
        else {
            return Err(SenderError::InvalidConfiguration(
                "Expected Email config, but found a different type.".to_string(),
            ));
        };

        let message = Message::builder()
            .from(mailbox(smtp_user)?)
            .to(mailbox(receiver_email)?)
            .subject(subject)
            .header(ContentType::TEXT_PLAIN)
            .body(body.to_string())
            .map_err(|e| SenderError::InvalidConfiguration(format!("Invalid message: {e}")))?;

        let builder = if *is_ssl {
            AsyncSmtpTransport::<Tokio1Executor>::relay(smtp_server)
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(smtp_server)
        }
        .map_err(|e| SenderError::InvalidConfiguration(format!("Invalid SMTP server: {e}")))?;

        let mailer = builder
            .port(*smtp_port)
            .credentials(Credentials::new(smtp_user.clone(), smtp_password.clone()))
            .timeout(Some(self.timeout))
            .build();

        mailer
            .send(message)
            .await
            .map_err(|e| SenderError::SendFailed(format!("SMTP delivery failed: {e}")))?;

        Ok(())
    }
}
