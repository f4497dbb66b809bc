use reqwest::Url;
use std::sync::Arc;
use tracing::{info, warn};

use super::extractor::validate_locator;
use super::scheduler::MonitorScheduler;
use super::store::{MonitorTaskChanges, NewMonitorTask, TaskStore};
use crate::db::entities::prelude::*;
use crate::error::AppError;

const MAX_NAME_LEN: usize = 200;
const MAX_URL_LEN: usize = 500;
const MAX_HISTORY_PAGE: u64 = 100;

#[derive(Debug, Clone, Copy)]
pub struct TaskLimits {
    pub min_interval_seconds: i32,
    pub max_interval_seconds: i32,
    pub default_interval_seconds: i32,
}

impl Default for TaskLimits {
    fn default() -> Self {
        Self {
            min_interval_seconds: 10,
            max_interval_seconds: 86_400,
            default_interval_seconds: 300,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct CreateTaskRequest {
    pub name: String,
    pub url: String,
    pub selector: String,
    pub interval_seconds: Option<i32>,
    pub is_public: bool,
    pub notification_channel_id: Option<i32>,
}

#[derive(Debug, Clone, Default)]
pub struct UpdateTaskRequest {
    pub name: Option<String>,
    pub url: Option<String>,
    pub selector: Option<String>,
    pub interval_seconds: Option<i32>,
    pub is_public: Option<bool>,
    pub notification_channel_id: Option<Option<i32>>,
}

/// Validates and persists task configuration, then tells the scheduler.
///
/// Scheduler refresh failures are logged only; the periodic reconcile
/// picks the change up later.
pub struct TaskManager {
    store: Arc<dyn TaskStore>,
    scheduler: Arc<MonitorScheduler>,
    limits: TaskLimits,
}

impl TaskManager {
    pub fn new(
        store: Arc<dyn TaskStore>,
        scheduler: Arc<MonitorScheduler>,
        limits: TaskLimits,
    ) -> Self {
        Self {
            store,
            scheduler,
            limits,
        }
    }

    pub async fn create_task(
        &self,
        owner_id: i32,
        request: CreateTaskRequest,
    ) -> Result<MonitorTaskModel, AppError> {
        let interval_seconds = request
            .interval_seconds
            .unwrap_or(self.limits.default_interval_seconds);
        validate_name(&request.name)?;
        validate_url(&request.url)?;
        validate_selector(&request.selector)?;
        self.validate_interval(interval_seconds)?;

        let task = self
            .store
            .create_task(NewMonitorTask {
                owner_id,
                name: request.name.trim().to_string(),
                url: request.url.trim().to_string(),
                selector: request.selector,
                interval_seconds,
                is_active: true,
                is_public: request.is_public,
                notification_channel_id: request.notification_channel_id,
            })
            .await?;
        info!(task_id = task.id, owner_id, interval_seconds, "Monitor task created.");
        self.refresh_timer(task.id).await;
        Ok(task)
    }

    pub async fn update_task(
        &self,
        owner_id: i32,
        task_id: i32,
        request: UpdateTaskRequest,
    ) -> Result<MonitorTaskModel, AppError> {
        self.get_task(owner_id, task_id).await?;
        if let Some(name) = &request.name {
            validate_name(name)?;
        }
        if let Some(url) = &request.url {
            validate_url(url)?;
        }
        if let Some(selector) = &request.selector {
            validate_selector(selector)?;
        }
        if let Some(interval_seconds) = request.interval_seconds {
            self.validate_interval(interval_seconds)?;
        }

        let changes = MonitorTaskChanges {
            name: request.name.map(|n| n.trim().to_string()),
            url: request.url.map(|u| u.trim().to_string()),
            selector: request.selector,
            interval_seconds: request.interval_seconds,
            is_active: None,
            is_public: request.is_public,
            notification_channel_id: request.notification_channel_id,
        };
        let task = self
            .store
            .update_task(task_id, changes)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Monitor task {task_id}")))?;
        info!(task_id, "Monitor task updated.");
        self.refresh_timer(task_id).await;
        Ok(task)
    }

    /// Pauses or resumes a task.
    pub async fn set_active(
        &self,
        owner_id: i32,
        task_id: i32,
        is_active: bool,
    ) -> Result<MonitorTaskModel, AppError> {
        self.get_task(owner_id, task_id).await?;
        let task = self
            .store
            .update_task(
                task_id,
                MonitorTaskChanges {
                    is_active: Some(is_active),
                    ..Default::default()
                },
            )
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Monitor task {task_id}")))?;
        info!(task_id, is_active, "Monitor task state changed.");
        self.refresh_timer(task_id).await;
        Ok(task)
    }

    pub async fn delete_task(&self, owner_id: i32, task_id: i32) -> Result<(), AppError> {
        self.get_task(owner_id, task_id).await?;
        if !self.store.delete_task(task_id).await? {
            return Err(AppError::NotFound(format!("Monitor task {task_id}")));
        }
        info!(task_id, "Monitor task deleted.");
        self.refresh_timer(task_id).await;
        Ok(())
    }

    pub async fn get_task(&self, owner_id: i32, task_id: i32) -> Result<MonitorTaskModel, AppError> {
        match self.store.get_task(task_id).await? {
            Some(task) if task.owner_id == owner_id => Ok(task),
            _ => Err(AppError::NotFound(format!("Monitor task {task_id}"))),
        }
    }

    pub async fn list_tasks(&self, owner_id: i32) -> Result<Vec<MonitorTaskModel>, AppError> {
        Ok(self.store.list_tasks_for_owner(owner_id).await?)
    }

    /// Check log of a task, newest first. `page` starts at 1.
    pub async fn history(
        &self,
        owner_id: i32,
        task_id: i32,
        page: u64,
        per_page: u64,
    ) -> Result<Vec<MonitorLogModel>, AppError> {
        self.get_task(owner_id, task_id).await?;
        let per_page = per_page.clamp(1, MAX_HISTORY_PAGE);
        // SQL offsets are signed 64-bit.
        let offset = page
            .saturating_sub(1)
            .saturating_mul(per_page)
            .min(i64::MAX as u64);
        Ok(self.store.list_logs(task_id, offset, per_page).await?)
    }

    async fn refresh_timer(&self, task_id: i32) {
        if let Err(e) = self.scheduler.notify_task_changed(task_id).await {
            warn!(task_id, error = %e, "Failed to refresh timer, periodic reconcile will retry.");
        }
    }

    fn validate_interval(&self, interval_seconds: i32) -> Result<(), AppError> {
        let TaskLimits {
            min_interval_seconds: min,
            max_interval_seconds: max,
            ..
        } = self.limits;
        if !(min..=max).contains(&interval_seconds) {
            return Err(AppError::InvalidInput(format!(
                "Interval must be between {min} and {max} seconds, got {interval_seconds}"
            )));
        }
        Ok(())
    }
}

fn validate_name(name: &str) -> Result<(), AppError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(AppError::InvalidInput("Task name is required".to_string()));
    }
    if name.chars().count() > MAX_NAME_LEN {
        return Err(AppError::InvalidInput(format!(
            "Task name must be at most {MAX_NAME_LEN} characters"
        )));
    }
    Ok(())
}

fn validate_url(url: &str) -> Result<(), AppError> {
    let url = url.trim();
    if url.len() > MAX_URL_LEN {
        return Err(AppError::InvalidInput(format!(
            "URL must be at most {MAX_URL_LEN} characters"
        )));
    }
    let parsed =
        Url::parse(url).map_err(|e| AppError::InvalidInput(format!("Invalid URL '{url}': {e}")))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(AppError::InvalidInput(format!(
            "URL scheme must be http or https, got '{}'",
            parsed.scheme()
        )));
    }
    Ok(())
}

fn validate_selector(selector: &str) -> Result<(), AppError> {
    validate_locator(selector).map_err(|e| AppError::InvalidInput(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitoring::scheduler::SchedulerSettings;
    use crate::monitoring::store::{MemoryTaskStore, NewCheckLog};
    use crate::monitoring::testing::CountingRunner;
    use chrono::Utc;
    use std::time::Duration;

    async fn manager() -> (TaskManager, Arc<MonitorScheduler>, Arc<MemoryTaskStore>) {
        let store = Arc::new(MemoryTaskStore::new());
        let scheduler = Arc::new(MonitorScheduler::new(
            store.clone(),
            Arc::new(CountingRunner::default()),
            SchedulerSettings::default(),
        ));
        scheduler.start().await.unwrap();
        let manager = TaskManager::new(store.clone(), scheduler.clone(), TaskLimits::default());
        (manager, scheduler, store)
    }

    fn request() -> CreateTaskRequest {
        CreateTaskRequest {
            name: "Price".into(),
            url: "https://shop.example.com/item/1".into(),
            selector: "span.price".into(),
            ..Default::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn created_task_gets_a_timer_with_the_default_interval() {
        let (manager, scheduler, _) = manager().await;
        let task = manager.create_task(1, request()).await.unwrap();
        assert_eq!(task.interval_seconds, 300);
        assert!(task.is_active);
        assert_eq!(
            scheduler.scheduled_tasks().await,
            vec![(task.id, Duration::from_secs(300))]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn invalid_configuration_is_rejected_before_persisting() {
        let (manager, scheduler, store) = manager().await;
        let cases = [
            CreateTaskRequest { interval_seconds: Some(5), ..request() },
            CreateTaskRequest { interval_seconds: Some(86_401), ..request() },
            CreateTaskRequest { url: "ftp://example.com".into(), ..request() },
            CreateTaskRequest { url: "not a url".into(), ..request() },
            CreateTaskRequest { selector: "div[[[".into(), ..request() },
            CreateTaskRequest { name: "   ".into(), ..request() },
            CreateTaskRequest { name: "n".repeat(201), ..request() },
        ];
        for case in cases {
            let err = manager.create_task(1, case).await.unwrap_err();
            assert!(matches!(err, AppError::InvalidInput(_)), "{err}");
        }
        assert!(store.list_tasks_for_owner(1).await.unwrap().is_empty());
        assert!(scheduler.scheduled_tasks().await.is_empty());

        let edge = CreateTaskRequest { interval_seconds: Some(10), ..request() };
        assert!(manager.create_task(1, edge).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn pause_resume_and_interval_updates_reach_the_scheduler() {
        let (manager, scheduler, _) = manager().await;
        let task = manager.create_task(1, request()).await.unwrap();

        manager
            .update_task(
                1,
                task.id,
                UpdateTaskRequest { interval_seconds: Some(60), ..Default::default() },
            )
            .await
            .unwrap();
        assert_eq!(
            scheduler.scheduled_tasks().await,
            vec![(task.id, Duration::from_secs(60))]
        );

        manager.set_active(1, task.id, false).await.unwrap();
        assert!(scheduler.scheduled_tasks().await.is_empty());
        manager.set_active(1, task.id, true).await.unwrap();
        assert_eq!(scheduler.scheduled_tasks().await.len(), 1);

        manager.delete_task(1, task.id).await.unwrap();
        assert!(scheduler.scheduled_tasks().await.is_empty());
        assert!(matches!(
            manager.get_task(1, task.id).await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn other_owners_cannot_touch_a_task() {
        let (manager, _, _) = manager().await;
        let task = manager.create_task(1, request()).await.unwrap();
        assert!(matches!(
            manager.set_active(2, task.id, false).await,
            Err(AppError::NotFound(_))
        ));
        assert!(matches!(
            manager.delete_task(2, task.id).await,
            Err(AppError::NotFound(_))
        ));
        assert!(manager.get_task(1, task.id).await.unwrap().is_active);
    }

    #[tokio::test(start_paused = true)]
    async fn history_pages_newest_first() {
        let (manager, _, store) = manager().await;
        let task = manager.create_task(1, request()).await.unwrap();
        let t0 = Utc::now();
        for i in 0..5 {
            store
                .append_log(NewCheckLog::failure(
                    task.id,
                    format!("e{i}"),
                    t0 + chrono::Duration::seconds(i),
                ))
                .await
                .unwrap();
        }

        let first = manager.history(1, task.id, 1, 2).await.unwrap();
        let second = manager.history(1, task.id, 2, 2).await.unwrap();
        let messages: Vec<_> = first
            .iter()
            .chain(second.iter())
            .filter_map(|l| l.error_message.clone())
            .collect();
        assert_eq!(messages, vec!["e4", "e3", "e2", "e1"]);
    }

    #[tokio::test]
    async fn history_beyond_the_last_page_is_empty() {
        let (manager, _, store) = manager().await;
        let task = manager.create_task(1, request()).await.unwrap();
        store
            .append_log(NewCheckLog::failure(task.id, "e0".to_string(), Utc::now()))
            .await
            .unwrap();

        assert!(manager.history(1, task.id, 3, 100).await.unwrap().is_empty());
        assert!(manager.history(1, task.id, u64::MAX, 100).await.unwrap().is_empty());
        assert_eq!(manager.history(1, task.id, 0, 100).await.unwrap().len(), 1);
    }
}
