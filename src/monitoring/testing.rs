//! Fakes for the monitor's collaborators.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use super::extractor::{ContentExtractor, ExtractError, Extraction};
use super::runner::CheckOutcome;
use super::scheduler::CheckRunner;
use super::store::{
    MemoryTaskStore, MonitorTaskChanges, NewCheckLog, NewMonitorTask, NewSubscription,
    StoreError, TaskStore,
};
use crate::db::entities::prelude::*;
use crate::notifications::{Destination, Notifier};

pub fn sample_task(owner_id: i32) -> NewMonitorTask {
    NewMonitorTask {
        owner_id,
        name: "Release notes".to_string(),
        url: "https://example.com/releases".to_string(),
        selector: "#latest".to_string(),
        interval_seconds: 300,
        is_active: true,
        is_public: false,
        notification_channel_id: None,
    }
}

/// Returns scripted results in order; `NotFound` once the script runs out.
#[derive(Default)]
pub struct FakeExtractor {
    script: Mutex<VecDeque<Result<String, ExtractError>>>,
    delay: Duration,
    calls: AtomicUsize,
}

impl FakeExtractor {
    pub fn new(script: Vec<Result<&str, ExtractError>>) -> Self {
        Self {
            script: Mutex::new(
                script
                    .into_iter()
                    .map(|r| r.map(str::to_string))
                    .collect(),
            ),
            ..Default::default()
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ContentExtractor for FakeExtractor {
    async fn extract(&self, _url: &str, locator: &str) -> Result<Extraction, ExtractError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let next = self.script.lock().unwrap().pop_front();
        match next {
            Some(Ok(content)) => Ok(Extraction {
                content,
                title: "Releases".to_string(),
            }),
            Some(Err(e)) => Err(e),
            None => Err(ExtractError::NotFound(locator.to_string())),
        }
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    failing_users: HashSet<i32>,
    sent: Mutex<Vec<(Destination, String, String)>>,
}

impl RecordingNotifier {
    pub fn failing_for(users: &[i32]) -> Self {
        Self {
            failing_users: users.iter().copied().collect(),
            ..Default::default()
        }
    }

    /// Successful deliveries so far.
    pub fn sent(&self) -> Vec<(Destination, String, String)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, destination: &Destination, subject: &str, body: &str) -> bool {
        if self.failing_users.contains(&destination.user_id) {
            return false;
        }
        self.sent
            .lock()
            .unwrap()
            .push((*destination, subject.to_string(), body.to_string()));
        true
    }
}

/// A runner that only counts, optionally taking `delay` per run.
#[derive(Default)]
pub struct CountingRunner {
    delay: Duration,
    started: Mutex<HashMap<i32, usize>>,
    finished: AtomicUsize,
    running: AtomicUsize,
    max_running: AtomicUsize,
}

impl CountingRunner {
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Default::default()
        }
    }

    pub fn runs(&self, task_id: i32) -> usize {
        self.started
            .lock()
            .unwrap()
            .get(&task_id)
            .copied()
            .unwrap_or(0)
    }

    pub fn finished(&self) -> usize {
        self.finished.load(Ordering::SeqCst)
    }

    pub fn max_running(&self) -> usize {
        self.max_running.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CheckRunner for CountingRunner {
    async fn run_check(&self, task_id: i32) -> CheckOutcome {
        *self.started.lock().unwrap().entry(task_id).or_default() += 1;
        let now_running = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_running.fetch_max(now_running, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.running.fetch_sub(1, Ordering::SeqCst);
        self.finished.fetch_add(1, Ordering::SeqCst);
        CheckOutcome::Unchanged
    }
}

/// A `MemoryTaskStore` with switches for outages, lost observation writes
/// and slow task listing.
#[derive(Default)]
pub struct FaultyStore {
    inner: MemoryTaskStore,
    unavailable: AtomicBool,
    lose_observations: AtomicBool,
    list_delay_ms: AtomicU64,
}

impl FaultyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent call fail until switched back.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Makes `record_observation` fail while everything else keeps working.
    pub fn set_lose_observations(&self, lose: bool) {
        self.lose_observations.store(lose, Ordering::SeqCst);
    }

    /// Delays every `list_active_tasks` call.
    pub fn set_list_delay(&self, delay: Duration) {
        self.list_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("store switched off".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl TaskStore for FaultyStore {
    async fn create_task(&self, task: NewMonitorTask) -> Result<MonitorTaskModel, StoreError> {
        self.check()?;
        self.inner.create_task(task).await
    }

    async fn get_task(&self, task_id: i32) -> Result<Option<MonitorTaskModel>, StoreError> {
        self.check()?;
        self.inner.get_task(task_id).await
    }

    async fn list_tasks_for_owner(
        &self,
        owner_id: i32,
    ) -> Result<Vec<MonitorTaskModel>, StoreError> {
        self.check()?;
        self.inner.list_tasks_for_owner(owner_id).await
    }

    async fn list_active_tasks(&self) -> Result<Vec<MonitorTaskModel>, StoreError> {
        let delay = self.list_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        self.check()?;
        self.inner.list_active_tasks().await
    }

    async fn update_task(
        &self,
        task_id: i32,
        changes: MonitorTaskChanges,
    ) -> Result<Option<MonitorTaskModel>, StoreError> {
        self.check()?;
        self.inner.update_task(task_id, changes).await
    }

    async fn delete_task(&self, task_id: i32) -> Result<bool, StoreError> {
        self.check()?;
        self.inner.delete_task(task_id).await
    }

    async fn record_observation(
        &self,
        task_id: i32,
        content: &str,
        checked_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.check()?;
        if self.lose_observations.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable(format!(
                "observation for task {task_id} was not written"
            )));
        }
        self.inner.record_observation(task_id, content, checked_at).await
    }

    async fn append_log(&self, entry: NewCheckLog) -> Result<MonitorLogModel, StoreError> {
        self.check()?;
        self.inner.append_log(entry).await
    }

    async fn list_logs(
        &self,
        task_id: i32,
        offset: u64,
        limit: u64,
    ) -> Result<Vec<MonitorLogModel>, StoreError> {
        self.check()?;
        self.inner.list_logs(task_id, offset, limit).await
    }

    async fn create_subscription(
        &self,
        subscription: NewSubscription,
    ) -> Result<SubscriptionModel, StoreError> {
        self.check()?;
        self.inner.create_subscription(subscription).await
    }

    async fn find_subscription(
        &self,
        user_id: i32,
        task_id: i32,
    ) -> Result<Option<SubscriptionModel>, StoreError> {
        self.check()?;
        self.inner.find_subscription(user_id, task_id).await
    }

    async fn count_active_subscriptions(&self, user_id: i32) -> Result<u64, StoreError> {
        self.check()?;
        self.inner.count_active_subscriptions(user_id).await
    }

    async fn set_subscription_active(
        &self,
        subscription_id: i32,
        is_active: bool,
        notification_channel_id: Option<i32>,
    ) -> Result<Option<SubscriptionModel>, StoreError> {
        self.check()?;
        self.inner
            .set_subscription_active(subscription_id, is_active, notification_channel_id)
            .await
    }

    async fn list_subscriptions_for_user(
        &self,
        user_id: i32,
    ) -> Result<Vec<SubscriptionModel>, StoreError> {
        self.check()?;
        self.inner.list_subscriptions_for_user(user_id).await
    }

    async fn active_subscriptions_for_task(
        &self,
        task_id: i32,
    ) -> Result<Vec<SubscriptionModel>, StoreError> {
        self.check()?;
        self.inner.active_subscriptions_for_task(task_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn switched_off_store_fails_every_call_until_restored() {
        let store = FaultyStore::new();
        let task = store.create_task(sample_task(1)).await.unwrap();

        store.set_unavailable(true);
        assert!(matches!(
            store.get_task(task.id).await,
            Err(StoreError::Unavailable(_))
        ));
        assert!(store.list_active_tasks().await.is_err());
        assert!(store.create_task(sample_task(1)).await.is_err());

        store.set_unavailable(false);
        assert_eq!(store.list_active_tasks().await.unwrap().len(), 1);
    }
}
