use async_trait::async_trait;
use reqwest::{Client, Method, header};
use tera::{Context, Tera};

use super::{NotificationSender, SenderError};
use crate::notifications::models::ChannelConfig;

const DEFAULT_BODY_TEMPLATE: &str = r#"{"subject": {{ subject | json_encode }}, "body": {{ body | json_encode }} }"#;

/// A sender for pushing notifications via a custom webhook.
pub struct WebhookSender {
    client: Client,
}

impl WebhookSender {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

/// Renders the POST body. `subject` and `body` are available to templates.
pub fn render_body(
    template: Option<&str>,
    subject: &str,
    body: &str,
) -> Result<String, SenderError> {
    let mut context = Context::new();
    context.insert("subject", subject);
    context.insert("body", body);
    Tera::one_off(template.unwrap_or(DEFAULT_BODY_TEMPLATE), &context, false)
        .map_err(|e| SenderError::TemplatingError(e.to_string()))
}

#[async_trait]
impl NotificationSender for WebhookSender {
    async fn send(
        &self,
        config: &ChannelConfig,
        subject: &str,
        body: &str,
    ) -> Result<(), SenderError> {
        let ChannelConfig::Webhook {
            url,
            method,
            headers,
            body_template,
        } = config
        else {
            return Err(SenderError::InvalidConfiguration(
                "Expected Webhook config, but found a different type.".to_string(),
            ));
        };

        let http_method = match method.to_uppercase().as_str() {
            "POST" => Method::POST,
            "GET" => Method::GET,
            _ => {
                return Err(SenderError::InvalidConfiguration(format!(
                    "Unsupported HTTP method: {method}"
                )));
            }
        };

        let mut request_builder = self.client.request(http_method.clone(), url);

        if let Some(h) = headers {
            let mut header_map = header::HeaderMap::new();
            for (key, value) in h {
                let header_name = header::HeaderName::from_bytes(key.as_bytes()).map_err(|e| {
                    SenderError::InvalidConfiguration(format!("Invalid header name: {e}"))
                })?;
                let header_value = header::HeaderValue::from_str(value).map_err(|e| {
                    SenderError::InvalidConfiguration(format!("Invalid header value: {e}"))
                })?;
                header_map.insert(header_name, header_value);
            }
            request_builder = request_builder.headers(header_map);
        }

        if http_method == Method::POST {
            let rendered_body = render_body(body_template.as_deref(), subject, body)?;
            request_builder = request_builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(rendered_body);
        } else {
            request_builder = request_builder.query(&[("subject", subject)]);
        }

        let response = request_builder.send().await?;
        let status = response.status();

        if !status.is_success() {
            let error_body = response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to read error body".to_string());
            return Err(SenderError::SendFailed(format!(
                "Webhook returned non-success status: {status}. Body: {error_body}"
            )));
        }

        Ok(())
    }
}
