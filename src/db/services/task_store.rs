use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, IntoActiveModel,
    PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, Set, TransactionTrait,
    sea_query::Expr,
};
use std::sync::Arc;

use crate::db::entities::{monitor_log, monitor_task, prelude::*, subscription};
use crate::monitoring::store::{
    MonitorTaskChanges, NewCheckLog, NewMonitorTask, NewSubscription, StoreError, TaskStore,
};

/// [`TaskStore`] backed by a relational database through sea-orm.
#[derive(Clone)]
pub struct SeaOrmTaskStore {
    db: Arc<DatabaseConnection>,
}

impl SeaOrmTaskStore {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl TaskStore for SeaOrmTaskStore {
    async fn create_task(&self, task: NewMonitorTask) -> Result<MonitorTaskModel, StoreError> {
        let now = Utc::now();
        let model = monitor_task::ActiveModel {
            owner_id: Set(task.owner_id),
            name: Set(task.name),
            url: Set(task.url),
            selector: Set(task.selector),
            interval_seconds: Set(task.interval_seconds),
            is_active: Set(task.is_active),
            is_public: Set(task.is_public),
            notification_channel_id: Set(task.notification_channel_id),
            last_content: Set(None),
            last_check: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        };
        Ok(model.insert(&*self.db).await?)
    }

    async fn get_task(&self, task_id: i32) -> Result<Option<MonitorTaskModel>, StoreError> {
        Ok(monitor_task::Entity::find_by_id(task_id)
            .one(&*self.db)
            .await?)
    }

    async fn list_tasks_for_owner(
        &self,
        owner_id: i32,
    ) -> Result<Vec<MonitorTaskModel>, StoreError> {
        Ok(monitor_task::Entity::find()
            .filter(monitor_task::Column::OwnerId.eq(owner_id))
            .order_by_asc(monitor_task::Column::Id)
            .all(&*self.db)
            .await?)
    }

    async fn list_active_tasks(&self) -> Result<Vec<MonitorTaskModel>, StoreError> {
        Ok(monitor_task::Entity::find()
            .filter(monitor_task::Column::IsActive.eq(true))
            .order_by_asc(monitor_task::Column::Id)
            .all(&*self.db)
            .await?)
    }

    async fn update_task(
        &self,
        task_id: i32,
        changes: MonitorTaskChanges,
    ) -> Result<Option<MonitorTaskModel>, StoreError> {
        let Some(current) = monitor_task::Entity::find_by_id(task_id)
            .one(&*self.db)
            .await?
        else {
            return Ok(None);
        };

        let mut active = current.into_active_model();
        if let Some(name) = changes.name {
            active.name = Set(name);
        }
        if let Some(url) = changes.url {
            active.url = Set(url);
        }
        if let Some(selector) = changes.selector {
            active.selector = Set(selector);
        }
        if let Some(interval_seconds) = changes.interval_seconds {
            active.interval_seconds = Set(interval_seconds);
        }
        if let Some(is_active) = changes.is_active {
            active.is_active = Set(is_active);
        }
        if let Some(is_public) = changes.is_public {
            active.is_public = Set(is_public);
        }
        if let Some(channel_id) = changes.notification_channel_id {
            active.notification_channel_id = Set(channel_id);
        }
        active.updated_at = Set(Utc::now());
        Ok(Some(active.update(&*self.db).await?))
    }

    async fn delete_task(&self, task_id: i32) -> Result<bool, StoreError> {
        let txn = self.db.begin().await?;
        monitor_log::Entity::delete_many()
            .filter(monitor_log::Column::TaskId.eq(task_id))
            .exec(&txn)
            .await?;
        subscription::Entity::delete_many()
            .filter(subscription::Column::TaskId.eq(task_id))
            .exec(&txn)
            .await?;
        let result = monitor_task::Entity::delete_by_id(task_id)
            .exec(&txn)
            .await?;
        txn.commit().await?;
        Ok(result.rows_affected > 0)
    }

    async fn record_observation(
        &self,
        task_id: i32,
        content: &str,
        checked_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        // Single UPDATE so content and check time never diverge.
        let result = monitor_task::Entity::update_many()
            .col_expr(monitor_task::Column::LastContent, Expr::value(content.to_owned()))
            .col_expr(monitor_task::Column::LastCheck, Expr::value(checked_at))
            .filter(monitor_task::Column::Id.eq(task_id))
            .exec(&*self.db)
            .await?;
        if result.rows_affected == 0 {
            return Err(StoreError::NotFound(format!("monitor task {task_id}")));
        }
        Ok(())
    }

    async fn append_log(&self, entry: NewCheckLog) -> Result<MonitorLogModel, StoreError> {
        let model = monitor_log::ActiveModel {
            task_id: Set(entry.task_id),
            old_content: Set(entry.old_content),
            new_content: Set(entry.new_content),
            is_changed: Set(entry.is_changed),
            error_message: Set(entry.error_message),
            check_time: Set(entry.check_time),
            ..Default::default()
        };
        Ok(model.insert(&*self.db).await?)
    }

    async fn list_logs(
        &self,
        task_id: i32,
        offset: u64,
        limit: u64,
    ) -> Result<Vec<MonitorLogModel>, StoreError> {
        Ok(monitor_log::Entity::find()
            .filter(monitor_log::Column::TaskId.eq(task_id))
            .order_by_desc(monitor_log::Column::CheckTime)
            .order_by_desc(monitor_log::Column::Id)
            .offset(offset)
            .limit(limit)
            .all(&*self.db)
            .await?)
    }

    async fn create_subscription(
        &self,
        new: NewSubscription,
    ) -> Result<SubscriptionModel, StoreError> {
        if self.find_subscription(new.user_id, new.task_id).await?.is_some() {
            return Err(StoreError::Conflict(format!(
                "user {} already subscribed to task {}",
                new.user_id, new.task_id
            )));
        }
        let model = subscription::ActiveModel {
            user_id: Set(new.user_id),
            task_id: Set(new.task_id),
            notification_channel_id: Set(new.notification_channel_id),
            is_active: Set(true),
            created_at: Set(Utc::now()),
            ..Default::default()
        };
        Ok(model.insert(&*self.db).await?)
    }

    async fn find_subscription(
        &self,
        user_id: i32,
        task_id: i32,
    ) -> Result<Option<SubscriptionModel>, StoreError> {
        Ok(subscription::Entity::find()
            .filter(subscription::Column::UserId.eq(user_id))
            .filter(subscription::Column::TaskId.eq(task_id))
            .one(&*self.db)
            .await?)
    }

    async fn count_active_subscriptions(&self, user_id: i32) -> Result<u64, StoreError> {
        Ok(subscription::Entity::find()
            .filter(subscription::Column::UserId.eq(user_id))
            .filter(subscription::Column::IsActive.eq(true))
            .count(&*self.db)
            .await?)
    }

    async fn set_subscription_active(
        &self,
        subscription_id: i32,
        is_active: bool,
        notification_channel_id: Option<i32>,
    ) -> Result<Option<SubscriptionModel>, StoreError> {
        let Some(current) = subscription::Entity::find_by_id(subscription_id)
            .one(&*self.db)
            .await?
        else {
            return Ok(None);
        };
        let mut active = current.into_active_model();
        active.is_active = Set(is_active);
        if let Some(channel_id) = notification_channel_id {
            active.notification_channel_id = Set(channel_id);
        }
        Ok(Some(active.update(&*self.db).await?))
    }

    async fn list_subscriptions_for_user(
        &self,
        user_id: i32,
    ) -> Result<Vec<SubscriptionModel>, StoreError> {
        Ok(subscription::Entity::find()
            .filter(subscription::Column::UserId.eq(user_id))
            .order_by_asc(subscription::Column::Id)
            .all(&*self.db)
            .await?)
    }

    async fn active_subscriptions_for_task(
        &self,
        task_id: i32,
    ) -> Result<Vec<SubscriptionModel>, StoreError> {
        Ok(subscription::Entity::find()
            .filter(subscription::Column::TaskId.eq(task_id))
            .filter(subscription::Column::IsActive.eq(true))
            .order_by_asc(subscription::Column::Id)
            .all(&*self.db)
            .await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::testing::memory_db;
    use crate::monitoring::testing::sample_task;

    async fn store() -> SeaOrmTaskStore {
        SeaOrmTaskStore::new(Arc::new(memory_db().await))
    }

    #[tokio::test]
    async fn observation_updates_content_and_check_time_together() {
        let store = store().await;
        let task = store.create_task(sample_task(1)).await.unwrap();
        assert_eq!(task.last_content, None);

        let at = Utc::now();
        store.record_observation(task.id, "v2", at).await.unwrap();
        let reloaded = store.get_task(task.id).await.unwrap().unwrap();
        assert_eq!(reloaded.last_content.as_deref(), Some("v2"));
        assert_eq!(
            reloaded.last_check.map(|t| t.timestamp()),
            Some(at.timestamp())
        );

        let err = store.record_observation(999, "x", at).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn update_applies_only_given_fields() {
        let store = store().await;
        let task = store.create_task(sample_task(1)).await.unwrap();
        let updated = store
            .update_task(
                task.id,
                MonitorTaskChanges {
                    interval_seconds: Some(60),
                    notification_channel_id: Some(Some(4)),
                    ..Default::default()
                },
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.interval_seconds, 60);
        assert_eq!(updated.notification_channel_id, Some(4));
        assert_eq!(updated.name, task.name);
        assert!(store.update_task(999, MonitorTaskChanges::default()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn active_listing_skips_paused_tasks() {
        let store = store().await;
        let active = store.create_task(sample_task(1)).await.unwrap();
        let mut paused = sample_task(1);
        paused.is_active = false;
        store.create_task(paused).await.unwrap();

        let ids: Vec<i32> = store
            .list_active_tasks()
            .await
            .unwrap()
            .into_iter()
            .map(|t| t.id)
            .collect();
        assert_eq!(ids, vec![active.id]);
        assert_eq!(store.list_tasks_for_owner(1).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn delete_removes_logs_and_subscriptions() {
        let store = store().await;
        let task = store.create_task(sample_task(1)).await.unwrap();
        store
            .append_log(NewCheckLog::failure(task.id, "timeout".into(), Utc::now()))
            .await
            .unwrap();
        store
            .create_subscription(NewSubscription {
                user_id: 2,
                task_id: task.id,
                notification_channel_id: 1,
            })
            .await
            .unwrap();

        assert!(store.delete_task(task.id).await.unwrap());
        assert!(store.list_logs(task.id, 0, 10).await.unwrap().is_empty());
        assert_eq!(store.count_active_subscriptions(2).await.unwrap(), 0);
        assert!(!store.delete_task(task.id).await.unwrap());
    }

    #[tokio::test]
    async fn logs_are_paged_newest_first() {
        let store = store().await;
        let task = store.create_task(sample_task(1)).await.unwrap();
        let at = Utc::now();
        for message in ["first", "second"] {
            store
                .append_log(NewCheckLog::failure(task.id, message.into(), at))
                .await
                .unwrap();
        }

        let logs = store.list_logs(task.id, 0, 10).await.unwrap();
        let messages: Vec<_> = logs.iter().filter_map(|l| l.error_message.as_deref()).collect();
        assert_eq!(messages, vec!["second", "first"]);
        assert_eq!(store.list_logs(task.id, 1, 10).await.unwrap().len(), 1);
        assert!(
            store
                .list_logs(task.id, i64::MAX as u64, 10)
                .await
                .unwrap()
                .is_empty()
        );
    }

    #[tokio::test]
    async fn subscriptions_are_unique_and_countable() {
        let store = store().await;
        let task = store.create_task(sample_task(1)).await.unwrap();
        let new = NewSubscription {
            user_id: 2,
            task_id: task.id,
            notification_channel_id: 1,
        };
        let sub = store.create_subscription(new.clone()).await.unwrap();
        assert!(matches!(
            store.create_subscription(new).await,
            Err(StoreError::Conflict(_))
        ));
        assert_eq!(store.count_active_subscriptions(2).await.unwrap(), 1);

        store.set_subscription_active(sub.id, false, None).await.unwrap();
        assert_eq!(store.count_active_subscriptions(2).await.unwrap(), 0);
        assert!(store.active_subscriptions_for_task(task.id).await.unwrap().is_empty());
        assert_eq!(store.list_subscriptions_for_user(2).await.unwrap().len(), 1);
    }
}
