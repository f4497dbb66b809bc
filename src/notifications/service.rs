use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use sea_orm::{DatabaseConnection, DbErr};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info, warn};

use super::encryption::{ChannelCipher, CipherError};
use super::models::{ChannelConfig, Destination};
use super::senders::{
    NotificationSender, SenderError, email::EmailSender, webhook::WebhookSender,
};
use super::{Notifier, templates};
use crate::db::entities::prelude::NotificationChannelModel;
use crate::db::services::notification_channel_service;

#[derive(Error, Debug)]
pub enum NotificationError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] DbErr),
    #[error("Encryption error: {0}")]
    EncryptionError(#[from] CipherError),
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
    #[error("Channel not found: {0}")]
    NotFound(i32),
    #[error("Channel {0} is disabled")]
    ChannelInactive(i32),
    #[error("No notification channel available for user {0}")]
    NoChannel(i32),
    #[error("Unsupported channel type: {0}")]
    UnsupportedChannel(String),
    #[error("Sender error: {0}")]
    SenderError(#[from] SenderError),
    #[error("Templating error: {0}")]
    TemplatingError(#[from] tera::Error),
    #[error("Permission denied")]
    PermissionDenied,
}

/// Resolves a [`Destination`] to a channel and sends through it.
///
/// Lookup order: the channel named by the destination, then the user's
/// first active channel, then the SMTP fallback from configuration.
pub struct NotificationService {
    db: Arc<DatabaseConnection>,
    cipher: Arc<ChannelCipher>,
    fallback: Option<ChannelConfig>,
    email: EmailSender,
    webhook: WebhookSender,
}

impl NotificationService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        cipher: Arc<ChannelCipher>,
        fallback: Option<ChannelConfig>,
        send_timeout: Duration,
    ) -> Result<Self, NotificationError> {
        let client = Client::builder()
            .timeout(send_timeout)
            .build()
            .map_err(SenderError::from)?;
        Ok(Self {
            db,
            cipher,
            fallback,
            email: EmailSender::new(send_timeout),
            webhook: WebhookSender::new(client),
        })
    }

    pub async fn send_notification(
        &self,
        destination: &Destination,
        subject: &str,
        body: &str,
    ) -> Result<(), NotificationError> {
        let config = self.resolve_config(destination).await?;
        self.dispatch(&config, subject, body).await
    }

    pub async fn create_channel(
        &self,
        user_id: i32,
        name: &str,
        config: &ChannelConfig,
    ) -> Result<NotificationChannelModel, NotificationError> {
        let channel =
            notification_channel_service::create_channel(&self.db, &self.cipher, user_id, name, config)
                .await?;
        info!(user_id, channel_id = channel.id, channel_type = %channel.channel_type, "Notification channel created.");
        Ok(channel)
    }

    /// Sends a short test message through one of the user's channels.
    pub async fn test_channel(&self, user_id: i32, channel_id: i32) -> Result<(), NotificationError> {
        let channel = self.owned_channel(user_id, channel_id).await?;
        let config = notification_channel_service::open_channel_config(&self.cipher, &channel)?;
        let sent_at = Utc::now().format("%Y-%m-%d %H:%M:%S UTC").to_string();
        let body = templates::render_test_message(&channel.name, &sent_at)?;
        self.dispatch(&config, "webmonitor test message", &body).await
    }

    pub(crate) async fn resolve_config(
        &self,
        destination: &Destination,
    ) -> Result<ChannelConfig, NotificationError> {
        let channel = match destination.channel_id {
            Some(channel_id) => {
                match notification_channel_service::get_channel_by_id(&self.db, channel_id).await? {
                    Some(channel) => {
                        if channel.user_id != destination.user_id {
                            return Err(NotificationError::PermissionDenied);
                        }
                        if !channel.is_active {
                            return Err(NotificationError::ChannelInactive(channel_id));
                        }
                        Some(channel)
                    }
                    // A deleted channel falls back to the user's default target.
                    None => {
                        warn!(
                            user_id = destination.user_id,
                            channel_id, "Configured notification channel no longer exists."
                        );
                        let default = notification_channel_service::find_active_channel_for_user(
                            &self.db,
                            destination.user_id,
                        )
                        .await?;
                        if default.is_none() && self.fallback.is_none() {
                            return Err(NotificationError::NotFound(channel_id));
                        }
                        default
                    }
                }
            }
            None => {
                notification_channel_service::find_active_channel_for_user(
                    &self.db,
                    destination.user_id,
                )
                .await?
            }
        };

        match channel {
            Some(channel) => {
                let config =
                    notification_channel_service::open_channel_config(&self.cipher, &channel)?;
                if config.channel_type() != channel.channel_type {
                    return Err(NotificationError::UnsupportedChannel(channel.channel_type));
                }
                Ok(config)
            }
            None => self
                .fallback
                .clone()
                .ok_or(NotificationError::NoChannel(destination.user_id)),
        }
    }

    async fn owned_channel(
        &self,
        user_id: i32,
        channel_id: i32,
    ) -> Result<NotificationChannelModel, NotificationError> {
        let channel = notification_channel_service::get_channel_by_id(&self.db, channel_id)
            .await?
            .ok_or(NotificationError::NotFound(channel_id))?;
        if channel.user_id != user_id {
            return Err(NotificationError::PermissionDenied);
        }
        Ok(channel)
    }

    async fn dispatch(
        &self,
        config: &ChannelConfig,
        subject: &str,
        body: &str,
    ) -> Result<(), NotificationError> {
        match config {
            ChannelConfig::Email { .. } => self.email.send(config, subject, body).await?,
            ChannelConfig::Webhook { .. } => self.webhook.send(config, subject, body).await?,
        }
        Ok(())
    }
}

#[async_trait]
impl Notifier for NotificationService {
    async fn notify(&self, destination: &Destination, subject: &str, body: &str) -> bool {
        match self.send_notification(destination, subject, body).await {
            Ok(()) => {
                info!(user_id = destination.user_id, "Notification sent.");
                true
            }
            Err(NotificationError::NoChannel(user_id)) => {
                warn!(user_id, "No notification channel configured, notification dropped.");
                false
            }
            Err(e) => {
                error!(user_id = destination.user_id, error = %e, "Failed to send notification.");
                false
            }
        }
    }
}
