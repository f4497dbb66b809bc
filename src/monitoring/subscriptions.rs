use std::sync::Arc;
use tracing::info;

use super::store::{NewSubscription, TaskStore};
use crate::db::entities::prelude::*;
use crate::error::AppError;

/// Lets users follow public tasks they do not own.
pub struct SubscriptionService {
    store: Arc<dyn TaskStore>,
    max_per_user: u64,
}

impl SubscriptionService {
    pub fn new(store: Arc<dyn TaskStore>, max_per_user: u64) -> Self {
        Self {
            store,
            max_per_user,
        }
    }

    pub async fn subscribe(
        &self,
        user_id: i32,
        task_id: i32,
        notification_channel_id: i32,
    ) -> Result<SubscriptionModel, AppError> {
        let task = self
            .store
            .get_task(task_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Monitor task {task_id}")))?;
        if !task.is_public || !task.is_active {
            return Err(AppError::InvalidInput(
                "Only active public tasks can be subscribed to".to_string(),
            ));
        }

        let existing = self.store.find_subscription(user_id, task_id).await?;
        if existing.as_ref().is_some_and(|s| s.is_active) {
            return Err(AppError::Conflict(format!(
                "Already subscribed to task {task_id}"
            )));
        }

        let active = self.store.count_active_subscriptions(user_id).await?;
        if active >= self.max_per_user {
            return Err(AppError::LimitReached(format!(
                "At most {} active subscriptions are allowed",
                self.max_per_user
            )));
        }

        let subscription = match existing {
            Some(inactive) => self
                .store
                .set_subscription_active(inactive.id, true, Some(notification_channel_id))
                .await?
                .ok_or_else(|| AppError::NotFound(format!("Subscription {}", inactive.id)))?,
            None => {
                self.store
                    .create_subscription(NewSubscription {
                        user_id,
                        task_id,
                        notification_channel_id,
                    })
                    .await?
            }
        };
        info!(user_id, task_id, subscription_id = subscription.id, "Subscribed to task.");
        Ok(subscription)
    }

    pub async fn unsubscribe(&self, user_id: i32, task_id: i32) -> Result<(), AppError> {
        let subscription = self
            .store
            .find_subscription(user_id, task_id)
            .await?
            .filter(|s| s.is_active)
            .ok_or_else(|| AppError::NotFound(format!("Subscription to task {task_id}")))?;
        self.store
            .set_subscription_active(subscription.id, false, None)
            .await?;
        info!(user_id, task_id, "Unsubscribed from task.");
        Ok(())
    }

    pub async fn list_for_user(&self, user_id: i32) -> Result<Vec<SubscriptionModel>, AppError> {
        Ok(self.store.list_subscriptions_for_user(user_id).await?)
    }
}
