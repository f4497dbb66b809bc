pub mod notification_channel_service;
pub mod task_store;

pub use task_store::SeaOrmTaskStore;
