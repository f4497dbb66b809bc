//! The task store boundary.
//!
//! The store owns every persisted task, check log entry and subscription.
//! The scheduler only ever keeps a cache derived from `list_active_tasks`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::DbErr;
use std::collections::BTreeMap;
use thiserror::Error;
use tokio::sync::RwLock;

use crate::db::entities::prelude::*;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] DbErr),
    #[error("Not Found: {0}")]
    NotFound(String),
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// A task definition that already passed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMonitorTask {
    pub owner_id: i32,
    pub name: String,
    pub url: String,
    pub selector: String,
    pub interval_seconds: i32,
    pub is_active: bool,
    pub is_public: bool,
    pub notification_channel_id: Option<i32>,
}

/// Configuration changes to an existing task. `None` leaves a field as is.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MonitorTaskChanges {
    pub name: Option<String>,
    pub url: Option<String>,
    pub selector: Option<String>,
    pub interval_seconds: Option<i32>,
    pub is_active: Option<bool>,
    pub is_public: Option<bool>,
    pub notification_channel_id: Option<Option<i32>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewCheckLog {
    pub task_id: i32,
    pub old_content: Option<String>,
    pub new_content: Option<String>,
    pub is_changed: bool,
    pub error_message: Option<String>,
    pub check_time: DateTime<Utc>,
}

impl NewCheckLog {
    pub fn failure(task_id: i32, error_message: String, check_time: DateTime<Utc>) -> Self {
        Self {
            task_id,
            old_content: None,
            new_content: None,
            is_changed: false,
            error_message: Some(error_message),
            check_time,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewSubscription {
    pub user_id: i32,
    pub task_id: i32,
    pub notification_channel_id: i32,
}

#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn create_task(&self, task: NewMonitorTask) -> Result<MonitorTaskModel, StoreError>;

    async fn get_task(&self, task_id: i32) -> Result<Option<MonitorTaskModel>, StoreError>;

    async fn list_tasks_for_owner(&self, owner_id: i32)
    -> Result<Vec<MonitorTaskModel>, StoreError>;

    async fn list_active_tasks(&self) -> Result<Vec<MonitorTaskModel>, StoreError>;

    async fn update_task(
        &self,
        task_id: i32,
        changes: MonitorTaskChanges,
    ) -> Result<Option<MonitorTaskModel>, StoreError>;

    /// Removes the task together with its log entries and subscriptions.
    async fn delete_task(&self, task_id: i32) -> Result<bool, StoreError>;

    /// Atomically stores the latest observed content and check time.
    async fn record_observation(
        &self,
        task_id: i32,
        content: &str,
        checked_at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    async fn append_log(&self, entry: NewCheckLog) -> Result<MonitorLogModel, StoreError>;

    /// Log entries of one task, newest first.
    async fn list_logs(
        &self,
        task_id: i32,
        offset: u64,
        limit: u64,
    ) -> Result<Vec<MonitorLogModel>, StoreError>;

    async fn create_subscription(
        &self,
        subscription: NewSubscription,
    ) -> Result<SubscriptionModel, StoreError>;

    async fn find_subscription(
        &self,
        user_id: i32,
        task_id: i32,
    ) -> Result<Option<SubscriptionModel>, StoreError>;

    async fn count_active_subscriptions(&self, user_id: i32) -> Result<u64, StoreError>;

    async fn set_subscription_active(
        &self,
        subscription_id: i32,
        is_active: bool,
        notification_channel_id: Option<i32>,
    ) -> Result<Option<SubscriptionModel>, StoreError>;

    async fn list_subscriptions_for_user(
        &self,
        user_id: i32,
    ) -> Result<Vec<SubscriptionModel>, StoreError>;

    async fn active_subscriptions_for_task(
        &self,
        task_id: i32,
    ) -> Result<Vec<SubscriptionModel>, StoreError>;
}

#[derive(Default)]
struct MemoryState {
    tasks: BTreeMap<i32, MonitorTaskModel>,
    logs: Vec<MonitorLogModel>,
    subscriptions: BTreeMap<i32, SubscriptionModel>,
    next_task_id: i32,
    next_log_id: i32,
    next_subscription_id: i32,
}

/// A process-local store. Every mutation takes the single write lock,
/// which serializes writes for all tasks.
#[derive(Default)]
pub struct MemoryTaskStore {
    state: RwLock<MemoryState>,
}

impl MemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TaskStore for MemoryTaskStore {
    async fn create_task(&self, task: NewMonitorTask) -> Result<MonitorTaskModel, StoreError> {
        let mut state = self.state.write().await;
        state.next_task_id += 1;
        let now = Utc::now();
        let model = MonitorTaskModel {
            id: state.next_task_id,
            owner_id: task.owner_id,
            name: task.name,
            url: task.url,
            selector: task.selector,
            interval_seconds: task.interval_seconds,
            is_active: task.is_active,
            is_public: task.is_public,
            notification_channel_id: task.notification_channel_id,
            last_content: None,
            last_check: None,
            created_at: now,
            updated_at: now,
        };
        state.tasks.insert(model.id, model.clone());
        Ok(model)
    }

    async fn get_task(&self, task_id: i32) -> Result<Option<MonitorTaskModel>, StoreError> {
        Ok(self.state.read().await.tasks.get(&task_id).cloned())
    }

    async fn list_tasks_for_owner(
        &self,
        owner_id: i32,
    ) -> Result<Vec<MonitorTaskModel>, StoreError> {
        let state = self.state.read().await;
        Ok(state
            .tasks
            .values()
            .filter(|t| t.owner_id == owner_id)
            .cloned()
            .collect())
    }

    async fn list_active_tasks(&self) -> Result<Vec<MonitorTaskModel>, StoreError> {
        let state = self.state.read().await;
        Ok(state.tasks.values().filter(|t| t.is_active).cloned().collect())
    }

    async fn update_task(
        &self,
        task_id: i32,
        changes: MonitorTaskChanges,
    ) -> Result<Option<MonitorTaskModel>, StoreError> {
        let mut state = self.state.write().await;
        let Some(task) = state.tasks.get_mut(&task_id) else {
            return Ok(None);
        };
        if let Some(name) = changes.name {
            task.name = name;
        }
        if let Some(url) = changes.url {
            task.url = url;
        }
        if let Some(selector) = changes.selector {
            task.selector = selector;
        }
        if let Some(interval_seconds) = changes.interval_seconds {
            task.interval_seconds = interval_seconds;
        }
        if let Some(is_active) = changes.is_active {
            task.is_active = is_active;
        }
        if let Some(is_public) = changes.is_public {
            task.is_public = is_public;
        }
        if let Some(channel_id) = changes.notification_channel_id {
            task.notification_channel_id = channel_id;
        }
        task.updated_at = Utc::now();
        Ok(Some(task.clone()))
    }

    async fn delete_task(&self, task_id: i32) -> Result<bool, StoreError> {
        let mut state = self.state.write().await;
        if state.tasks.remove(&task_id).is_none() {
            return Ok(false);
        }
        state.logs.retain(|l| l.task_id != task_id);
        state.subscriptions.retain(|_, s| s.task_id != task_id);
        Ok(true)
    }

    async fn record_observation(
        &self,
        task_id: i32,
        content: &str,
        checked_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        let task = state
            .tasks
            .get_mut(&task_id)
            .ok_or_else(|| StoreError::NotFound(format!("monitor task {task_id}")))?;
        task.last_content = Some(content.to_owned());
        task.last_check = Some(checked_at);
        Ok(())
    }

    async fn append_log(&self, entry: NewCheckLog) -> Result<MonitorLogModel, StoreError> {
        let mut state = self.state.write().await;
        if !state.tasks.contains_key(&entry.task_id) {
            return Err(StoreError::NotFound(format!("monitor task {}", entry.task_id)));
        }
        state.next_log_id += 1;
        let model = MonitorLogModel {
            id: state.next_log_id,
            task_id: entry.task_id,
            old_content: entry.old_content,
            new_content: entry.new_content,
            is_changed: entry.is_changed,
            error_message: entry.error_message,
            check_time: entry.check_time,
        };
        state.logs.push(model.clone());
        Ok(model)
    }

    async fn list_logs(
        &self,
        task_id: i32,
        offset: u64,
        limit: u64,
    ) -> Result<Vec<MonitorLogModel>, StoreError> {
        let state = self.state.read().await;
        let mut logs: Vec<MonitorLogModel> = state
            .logs
            .iter()
            .filter(|l| l.task_id == task_id)
            .cloned()
            .collect();
        logs.sort_by(|a, b| (b.check_time, b.id).cmp(&(a.check_time, a.id)));
        Ok(logs
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .collect())
    }

    async fn create_subscription(
        &self,
        subscription: NewSubscription,
    ) -> Result<SubscriptionModel, StoreError> {
        let mut state = self.state.write().await;
        if state
            .subscriptions
            .values()
            .any(|s| s.user_id == subscription.user_id && s.task_id == subscription.task_id)
        {
            return Err(StoreError::Conflict(format!(
                "user {} already subscribed to task {}",
                subscription.user_id, subscription.task_id
            )));
        }
        state.next_subscription_id += 1;
        let model = SubscriptionModel {
            id: state.next_subscription_id,
            user_id: subscription.user_id,
            task_id: subscription.task_id,
            notification_channel_id: subscription.notification_channel_id,
            is_active: true,
            created_at: Utc::now(),
        };
        state.subscriptions.insert(model.id, model.clone());
        Ok(model)
    }

    async fn find_subscription(
        &self,
        user_id: i32,
        task_id: i32,
    ) -> Result<Option<SubscriptionModel>, StoreError> {
        let state = self.state.read().await;
        Ok(state
            .subscriptions
            .values()
            .find(|s| s.user_id == user_id && s.task_id == task_id)
            .cloned())
    }

    async fn count_active_subscriptions(&self, user_id: i32) -> Result<u64, StoreError> {
        let state = self.state.read().await;
        Ok(state
            .subscriptions
            .values()
            .filter(|s| s.user_id == user_id && s.is_active)
            .count() as u64)
    }

    async fn set_subscription_active(
        &self,
        subscription_id: i32,
        is_active: bool,
        notification_channel_id: Option<i32>,
    ) -> Result<Option<SubscriptionModel>, StoreError> {
        let mut state = self.state.write().await;
        let Some(subscription) = state.subscriptions.get_mut(&subscription_id) else {
            return Ok(None);
        };
        subscription.is_active = is_active;
        if let Some(channel_id) = notification_channel_id {
            subscription.notification_channel_id = channel_id;
        }
        Ok(Some(subscription.clone()))
    }

    async fn list_subscriptions_for_user(
        &self,
        user_id: i32,
    ) -> Result<Vec<SubscriptionModel>, StoreError> {
        let state = self.state.read().await;
        Ok(state
            .subscriptions
            .values()
            .filter(|s| s.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn active_subscriptions_for_task(
        &self,
        task_id: i32,
    ) -> Result<Vec<SubscriptionModel>, StoreError> {
        let state = self.state.read().await;
        Ok(state
            .subscriptions
            .values()
            .filter(|s| s.task_id == task_id && s.is_active)
            .cloned()
            .collect())
    }
}
