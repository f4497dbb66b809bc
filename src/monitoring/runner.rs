//! One check of one task: extract, compare, persist, log, notify.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use super::change_detector::{Change, detect_change};
use super::extractor::{ContentExtractor, ExtractError, Extraction};
use super::scheduler::CheckRunner;
use super::store::{NewCheckLog, StoreError, TaskStore};
use crate::db::entities::prelude::MonitorTaskModel;
use crate::notifications::{ChangeNotice, Destination, Notifier, templates};

/// What a single check did. Every failure is folded into a variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckOutcome {
    /// The task no longer exists or is paused. Nothing was recorded.
    Skipped,
    ExtractionFailed { error: String },
    /// Content equals the stored content, or this was the first observation.
    Unchanged,
    Changed { delivered: usize, failed: usize },
    StoreFailed { error: String },
}

#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("Monitor task {0} not found")]
    TaskNotFound(i32),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Extract(#[from] ExtractError),
}

#[derive(Debug, Clone)]
pub struct RunnerSettings {
    pub fetch_timeout: Duration,
    pub notify_timeout: Duration,
}

impl Default for RunnerSettings {
    fn default() -> Self {
        Self {
            fetch_timeout: Duration::from_secs(60),
            notify_timeout: Duration::from_secs(30),
        }
    }
}

pub struct TaskRunner {
    store: Arc<dyn TaskStore>,
    extractor: Arc<dyn ContentExtractor>,
    notifier: Arc<dyn Notifier>,
    settings: RunnerSettings,
}

impl TaskRunner {
    pub fn new(
        store: Arc<dyn TaskStore>,
        extractor: Arc<dyn ContentExtractor>,
        notifier: Arc<dyn Notifier>,
        settings: RunnerSettings,
    ) -> Self {
        Self {
            store,
            extractor,
            notifier,
            settings,
        }
    }

    /// Runs one check. Never returns an error and never panics on
    /// collaborator failures; the outcome says what happened.
    pub async fn run_check(&self, task_id: i32) -> CheckOutcome {
        let task = match self.store.get_task(task_id).await {
            Ok(Some(task)) if task.is_active => task,
            Ok(_) => {
                debug!(task_id, "Task missing or inactive, check skipped.");
                return CheckOutcome::Skipped;
            }
            Err(e) => {
                error!(task_id, error = %e, "Failed to load task.");
                return CheckOutcome::StoreFailed {
                    error: e.to_string(),
                };
            }
        };

        let check_time = Utc::now();
        let extraction = match self.extract(&task).await {
            Ok(extraction) => extraction,
            Err(e) => {
                warn!(task_id, url = %task.url, error = %e, "Content extraction failed.");
                self.append_log_best_effort(NewCheckLog::failure(
                    task_id,
                    format!("Extraction failed: {e}"),
                    check_time,
                ))
                .await;
                return CheckOutcome::ExtractionFailed {
                    error: e.to_string(),
                };
            }
        };

        let change = detect_change(task.last_content.as_deref(), &extraction.content);

        if let Err(e) = self
            .store
            .record_observation(task_id, &extraction.content, check_time)
            .await
        {
            error!(task_id, error = %e, "Failed to store observed content, notification withheld.");
            self.append_log_best_effort(NewCheckLog::failure(
                task_id,
                format!("Failed to store content: {e}"),
                check_time,
            ))
            .await;
            return CheckOutcome::StoreFailed {
                error: e.to_string(),
            };
        }

        self.append_log_best_effort(NewCheckLog {
            task_id,
            old_content: task.last_content.clone(),
            new_content: Some(extraction.content.clone()),
            is_changed: change.is_changed(),
            error_message: None,
            check_time,
        })
        .await;

        match change {
            Change::Baseline => {
                info!(task_id, "Baseline content recorded.");
                CheckOutcome::Unchanged
            }
            Change::Unchanged => {
                debug!(task_id, "Content unchanged.");
                CheckOutcome::Unchanged
            }
            Change::Changed => {
                info!(task_id, "Content changed.");
                let (delivered, failed) = self.notify_change(&task, &extraction, check_time).await;
                CheckOutcome::Changed { delivered, failed }
            }
        }
    }

    /// Extracts the task's content without recording anything.
    pub async fn probe(&self, task_id: i32) -> Result<Extraction, ProbeError> {
        let task = self
            .store
            .get_task(task_id)
            .await?
            .ok_or(ProbeError::TaskNotFound(task_id))?;
        Ok(self.extract(&task).await?)
    }

    async fn extract(&self, task: &MonitorTaskModel) -> Result<Extraction, ExtractError> {
        let fetch_timeout = self.settings.fetch_timeout;
        timeout(
            fetch_timeout,
            self.extractor.extract(&task.url, &task.selector),
        )
        .await
        .unwrap_or(Err(ExtractError::Timeout(fetch_timeout)))
    }

    async fn append_log_best_effort(&self, entry: NewCheckLog) {
        let task_id = entry.task_id;
        if let Err(e) = self.store.append_log(entry).await {
            error!(task_id, error = %e, "Failed to append check log entry.");
        }
    }

    async fn notify_change(
        &self,
        task: &MonitorTaskModel,
        extraction: &Extraction,
        check_time: DateTime<Utc>,
    ) -> (usize, usize) {
        let notice = ChangeNotice {
            task_name: task.name.clone(),
            url: task.url.clone(),
            title: if extraction.title.is_empty() {
                task.name.clone()
            } else {
                extraction.title.clone()
            },
            old_content: task.last_content.clone().unwrap_or_default(),
            new_content: extraction.content.clone(),
            check_time: check_time.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
        };
        let (subject, body) = templates::render_change_notice(&notice).unwrap_or_else(|e| {
            warn!(task_id = task.id, error = %e, "Failed to render change notice, using plain text.");
            (
                format!("{} - content update", notice.title),
                notice.new_content.clone(),
            )
        });

        let destinations = self.destinations(task).await;
        let notifier = &self.notifier;
        let notify_timeout = self.settings.notify_timeout;
        let (subject, body) = (&subject, &body);

        let results = join_all(destinations.iter().map(|destination| async move {
            match timeout(notify_timeout, notifier.notify(destination, subject, body)).await {
                Ok(delivered) => delivered,
                Err(_) => {
                    warn!(user_id = destination.user_id, "Notification timed out.");
                    false
                }
            }
        }))
        .await;

        let delivered = results.iter().filter(|ok| **ok).count();
        let failed = results.len() - delivered;
        if failed > 0 {
            warn!(task_id = task.id, delivered, failed, "Some notifications were not delivered.");
        } else {
            info!(task_id = task.id, delivered, "Change notifications delivered.");
        }
        (delivered, failed)
    }

    /// The owner first, then active subscribers of a public task.
    async fn destinations(&self, task: &MonitorTaskModel) -> Vec<Destination> {
        let mut destinations = vec![Destination {
            user_id: task.owner_id,
            channel_id: task.notification_channel_id,
        }];
        if !task.is_public {
            return destinations;
        }
        match self.store.active_subscriptions_for_task(task.id).await {
            Ok(subscriptions) => destinations.extend(
                subscriptions
                    .into_iter()
                    .filter(|s| s.user_id != task.owner_id)
                    .map(|s| Destination {
                        user_id: s.user_id,
                        channel_id: Some(s.notification_channel_id),
                    }),
            ),
            Err(e) => {
                error!(task_id = task.id, error = %e, "Failed to load subscribers, notifying owner only.");
            }
        }
        destinations
    }
}

#[async_trait]
impl CheckRunner for TaskRunner {
    async fn run_check(&self, task_id: i32) -> CheckOutcome {
        TaskRunner::run_check(self, task_id).await
    }
}
