pub mod db;
pub mod error;
pub mod monitoring;
pub mod notifications;
pub mod server;
