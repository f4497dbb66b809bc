pub mod change_detector;
pub mod extractor;
pub mod runner;
pub mod scheduler;
pub mod store;
pub mod subscriptions;
pub mod tasks;
#[cfg(test)]
pub(crate) mod testing;

pub use runner::{CheckOutcome, RunnerSettings, TaskRunner};
pub use scheduler::{FirstCheck, MonitorScheduler, ReconcileReport, SchedulerSettings};
pub use store::{StoreError, TaskStore};
