use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Channel parameters. Serialized to JSON and sealed before being stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ChannelConfig {
    #[serde(rename_all = "camelCase")]
    Email {
        smtp_server: String,
        smtp_port: u16,
        smtp_user: String,
        smtp_password: String,
        receiver_email: String,
        #[serde(default = "default_true")]
        is_ssl: bool,
    },
    #[serde(rename_all = "camelCase")]
    Webhook {
        url: String,
        method: String, // "GET" or "POST"
        headers: Option<HashMap<String, String>>,
        body_template: Option<String>, // Tera template rendered with `subject` and `body`
    },
}

fn default_true() -> bool {
    true
}

impl ChannelConfig {
    pub fn channel_type(&self) -> &'static str {
        match self {
            ChannelConfig::Email { .. } => "email",
            ChannelConfig::Webhook { .. } => "webhook",
        }
    }
}

/// Where a notification should go: a user, optionally pinned to one of
/// their channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Destination {
    pub user_id: i32,
    pub channel_id: Option<i32>,
}

/// Everything the change email talks about.
#[derive(Debug, Clone, Serialize)]
pub struct ChangeNotice {
    pub task_name: String,
    pub url: String,
    pub title: String,
    pub old_content: String,
    pub new_content: String,
    pub check_time: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn email_config_reads_camel_case_json() {
        let json = r#"{
            "type": "email",
            "smtpServer": "smtp.example.com",
            "smtpPort": 465,
            "smtpUser": "bot@example.com",
            "smtpPassword": "pw",
            "receiverEmail": "me@example.com"
        }"#;
        let config: ChannelConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.channel_type(), "email");
        match config {
            ChannelConfig::Email { smtp_port, is_ssl, .. } => {
                assert_eq!(smtp_port, 465);
                assert!(is_ssl);
            }
            other => panic!("unexpected config {other:?}"),
        }
    }
}
