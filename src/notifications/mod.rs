use async_trait::async_trait;

pub mod encryption;
pub mod models;
pub mod senders;
pub mod service;
pub mod templates;

pub use models::{ChangeNotice, ChannelConfig, Destination};
pub use service::{NotificationError, NotificationService};

/// Delivers a message to a user. Failures are reported through the
/// return value and never abort the caller.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Returns `true` when the message was handed to the channel.
    async fn notify(&self, destination: &Destination, subject: &str, body: &str) -> bool;
}
