use async_trait::async_trait;
use thiserror::Error;

use super::models::ChannelConfig;

pub mod email;
pub mod webhook;

#[derive(Error, Debug)]
pub enum SenderError {
    #[error("Failed to send notification: {0}")]
    SendFailed(String),
    #[error("Invalid configuration for sender: {0}")]
    InvalidConfiguration(String),
    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),
    #[error("Templating error: {0}")]
    TemplatingError(String),
}

/// A sender for one channel type (email, webhook).
#[async_trait]
pub trait NotificationSender: Send + Sync {
    /// Sends `subject` and `body` using the decrypted channel `config`.
    async fn send(
        &self,
        config: &ChannelConfig,
        subject: &str,
        body: &str,
    ) -> Result<(), SenderError>;
}
