pub mod monitor_log;
pub mod monitor_task;
pub mod notification_channel;
pub mod subscription;

// Prelude module for easy importing of all entities and their related types
pub mod prelude {
    pub use super::monitor_task::Model as MonitorTaskModel;

    pub use super::monitor_log::Model as MonitorLogModel;

    pub use super::subscription::Model as SubscriptionModel;

    pub use super::notification_channel::Model as NotificationChannelModel;
}
