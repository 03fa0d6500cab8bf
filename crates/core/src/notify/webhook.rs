//! Generic HTTP webhook notifier.

use async_trait::async_trait;
use reqwest::{Client, Method};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use super::notifier::{Notifier, NotifyError};

/// Webhook endpoint settings.
///
/// `{{title}}` and `{{message}}` are substituted in the URL (URL-encoded) and
/// in the body (JSON-escaped when the content type is JSON).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookConfig {
    #[serde(default)]
    pub url: String,

    #[serde(default = "default_method")]
    pub method: String,

    #[serde(default = "default_content_type")]
    pub content_type: String,

    #[serde(default = "default_body")]
    pub body: String,

    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

fn default_method() -> String {
    "POST".to_string()
}

fn default_content_type() -> String {
    "application/json".to_string()
}

fn default_body() -> String {
    r#"{"title": "{{title}}", "message": "{{message}}"}"#.to_string()
}

fn default_timeout() -> u64 {
    30
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            method: default_method(),
            content_type: default_content_type(),
            body: default_body(),
            timeout_secs: default_timeout(),
        }
    }
}

impl WebhookConfig {
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }
}

/// Sends notifications to a configurable HTTP endpoint.
pub struct WebhookNotifier {
    client: Client,
    method: Method,
    config: WebhookConfig,
}

impl WebhookNotifier {
    pub fn new(config: WebhookConfig) -> Result<Self, NotifyError> {
        if config.url.trim().is_empty() {
            return Err(NotifyError::Config("webhook url is empty".to_string()));
        }

        let method = Method::from_bytes(config.method.trim().to_uppercase().as_bytes())
            .map_err(|_| NotifyError::Config(format!("invalid method: {}", config.method)))?;

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| NotifyError::Config(e.to_string()))?;

        Ok(Self {
            client,
            method,
            config,
        })
    }

    fn render_url(&self, title: &str, message: &str) -> String {
        self.config
            .url
            .replace("{{title}}", &urlencoding::encode(title))
            .replace("{{message}}", &urlencoding::encode(message))
    }

    fn render_body(&self, title: &str, message: &str) -> String {
        if self.config.content_type.contains("json") {
            self.config
                .body
                .replace("{{title}}", &json_escape(title))
                .replace("{{message}}", &json_escape(message))
        } else {
            self.config
                .body
                .replace("{{title}}", title)
                .replace("{{message}}", message)
        }
    }
}

/// Escape for embedding inside an existing JSON string literal.
fn json_escape(value: &str) -> String {
    let quoted = serde_json::Value::String(value.to_string()).to_string();
    quoted[1..quoted.len() - 1].to_string()
}

#[async_trait]
impl Notifier for WebhookNotifier {
    fn name(&self) -> &str {
        "webhook"
    }

    async fn send(&self, title: &str, message: &str) -> Result<(), NotifyError> {
        let url = self.render_url(title, message);

        let mut request = self.client.request(self.method.clone(), &url);
        if self.method != Method::GET && !self.config.body.is_empty() {
            request = request
                .header(reqwest::header::CONTENT_TYPE, &self.config.content_type)
                .body(self.render_body(title, message));
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                NotifyError::Timeout
            } else {
                NotifyError::ConnectionFailed(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(NotifyError::Rejected {
                status: status.as_u16(),
                body: body.chars().take(200).collect(),
            });
        }

        debug!("Webhook notification delivered");
        Ok(())
    }
}
