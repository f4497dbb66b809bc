//! Persistence of notification channels. Channel parameters are sealed
//! with the [`ChannelCipher`] before they reach the database.

use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter,
    QueryOrder, Set,
};

use crate::db::entities::{notification_channel, prelude::*};
use crate::notifications::encryption::ChannelCipher;
use crate::notifications::models::ChannelConfig;
use crate::notifications::service::NotificationError;

pub async fn create_channel(
    db: &DatabaseConnection,
    cipher: &ChannelCipher,
    user_id: i32,
    name: &str,
    config: &ChannelConfig,
) -> Result<NotificationChannelModel, NotificationError> {
    let sealed = cipher.seal(&serde_json::to_vec(config)?)?;
    let now = Utc::now();
    let channel = notification_channel::ActiveModel {
        user_id: Set(user_id),
        name: Set(name.to_string()),
        channel_type: Set(config.channel_type().to_string()),
        config: Set(sealed),
        is_active: Set(true),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    };
    Ok(channel.insert(db).await?)
}

pub async fn get_channel_by_id(
    db: &DatabaseConnection,
    channel_id: i32,
) -> Result<Option<NotificationChannelModel>, DbErr> {
    notification_channel::Entity::find_by_id(channel_id)
        .one(db)
        .await
}

/// The channel used when a destination does not name one: the user's
/// oldest active channel.
pub async fn find_active_channel_for_user(
    db: &DatabaseConnection,
    user_id: i32,
) -> Result<Option<NotificationChannelModel>, DbErr> {
    notification_channel::Entity::find()
        .filter(notification_channel::Column::UserId.eq(user_id))
        .filter(notification_channel::Column::IsActive.eq(true))
        .order_by_asc(notification_channel::Column::Id)
        .one(db)
        .await
}

pub async fn set_channel_active(
    db: &DatabaseConnection,
    channel_id: i32,
    is_active: bool,
) -> Result<Option<NotificationChannelModel>, DbErr> {
    let Some(channel) = get_channel_by_id(db, channel_id).await? else {
        return Ok(None);
    };
    let mut active: notification_channel::ActiveModel = channel.into();
    active.is_active = Set(is_active);
    active.updated_at = Set(Utc::now());
    Ok(Some(active.update(db).await?))
}

pub fn open_channel_config(
    cipher: &ChannelCipher,
    channel: &NotificationChannelModel,
) -> Result<ChannelConfig, NotificationError> {
    let plaintext = cipher.open(&channel.config)?;
    Ok(serde_json::from_slice(&plaintext)?)
}
