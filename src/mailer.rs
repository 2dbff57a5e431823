// --------------------------------------------------
// Outbound email.
//
// Delivery is best effort: callers log a MailError and move on,
// a failed notification never undoes the change that triggered it.
// --------------------------------------------------

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Datelike, Utc};
use reqwest::Client;
use serde::Serialize;
use serde_json::json;
use thiserror::Error;
use tracing::info;

use crate::clock::Clock;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct EmailContent {
    pub title: String,
    pub message: String, // HTML fragment
    pub action_text: Option<String>,
    pub action_url: Option<String>,
}

impl EmailContent {
    pub fn new(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            message: message.into(),
            action_text: None,
            action_url: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum MailError {
    #[error("mail relay request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("mail relay rejected message: HTTP {0}")]
    Rejected(u16),
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, to: &str, subject: &str, content: &EmailContent) -> Result<(), MailError>;
}

pub fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// Wrap a message in the standard branded layout, stamped with the year of `now`.
pub fn render_html(content: &EmailContent, now: DateTime<Utc>) -> String {
    let action = match (&content.action_text, &content.action_url) {
        (Some(text), Some(url)) => format!(
            r#"<div style="text-align: center; margin: 30px 0;"><a href="{}" style="background-color: #4CAF50; color: white; text-decoration: none; padding: 12px 24px; border-radius: 5px; display: inline-block;">{}</a></div>"#,
            escape_html(url),
            escape_html(text)
        ),
        _ => String::new(),
    };

    format!(
        r#"<div style="font-family: Arial, sans-serif; max-width: 600px; margin: auto; border: 1px solid #e0e0e0; border-radius: 8px; overflow: hidden;">
  <div style="background-color: #4CAF50; color: white; padding: 20px; text-align: center;">
    <h1 style="margin: 0; font-size: 24px;">{title}</h1>
  </div>
  <div style="padding: 20px; color: #333; line-height: 1.5;">
    <p>{message}</p>
    {action}
  </div>
  <div style="background-color: #f2f2f2; padding: 10px; text-align: center; font-size: 12px; color: #666;">
    &copy; {year} Working Status. All rights reserved.
  </div>
</div>"#,
        title = escape_html(&content.title),
        message = content.message,
        action = action,
        year = now.year(),
    )
}

// Used when no relay is configured: the mail only shows up in the logs
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, to: &str, subject: &str, content: &EmailContent) -> Result<(), MailError> {
        info!(%to, %subject, title = %content.title, "email not delivered (no relay configured)");
        Ok(())
    }
}

/// Posts rendered messages to an HTTP mail relay.
pub struct RelayMailer {
    client: Client,
    endpoint: String,
    from: String,
    clock: Arc<dyn Clock>,
}

impl RelayMailer {
    pub fn new(endpoint: impl Into<String>, from: impl Into<String>, clock: Arc<dyn Clock>) -> Self {
        Self {
            client: Client::new(),
            endpoint: endpoint.into(),
            from: from.into(),
            clock,
        }
    }
}

#[async_trait]
impl Mailer for RelayMailer {
    async fn send(&self, to: &str, subject: &str, content: &EmailContent) -> Result<(), MailError> {
        let body = json!({
            "from": self.from,
            "to": to,
            "subject": subject,
            "html": render_html(content, self.clock.now()),
        });

        let resp = self.client.post(&self.endpoint).json(&body).send().await?;
        if !resp.status().is_success() {
            return Err(MailError::Rejected(resp.status().as_u16()));
        }

        info!(%to, %subject, "email sent");
        Ok(())
    }
}

#[cfg(test)]
pub use recording::RecordingMailer;

#[cfg(test)]
mod recording {
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::{EmailContent, MailError, Mailer};

    #[derive(Debug, Clone)]
    pub struct SentMail {
        pub to: String,
        pub subject: String,
        pub content: EmailContent,
    }

    // Keeps every message; addresses in `failing` get a Rejected error instead
    #[derive(Default)]
    pub struct RecordingMailer {
        sent: Mutex<Vec<SentMail>>,
        failing: Mutex<Vec<String>>,
    }

    impl RecordingMailer {
        pub fn fail_for(&self, address: &str) {
            self.failing.lock().unwrap().push(address.to_string());
        }

        pub fn heal(&self) {
            self.failing.lock().unwrap().clear();
        }

        pub fn sent(&self) -> Vec<SentMail> {
            self.sent.lock().unwrap().clone()
        }

        pub fn take(&self) -> Vec<SentMail> {
            std::mem::take(&mut *self.sent.lock().unwrap())
        }
    }

    #[async_trait]
    impl Mailer for RecordingMailer {
        async fn send(&self, to: &str, subject: &str, content: &EmailContent) -> Result<(), MailError> {
            if self.failing.lock().unwrap().iter().any(|a| a == to) {
                return Err(MailError::Rejected(550));
            }
            self.sent.lock().unwrap().push(SentMail {
                to: to.to_string(),
                subject: subject.to_string(),
                content: content.clone(),
            });
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn escapes_markup() {
        assert_eq!(escape_html("<b>Q&A</b>"), "&lt;b&gt;Q&amp;A&lt;/b&gt;");
    }

    fn sent_at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2031, 3, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn renders_title_and_optional_action() {
        let plain = EmailContent::new("1 Hour Remaining", "Only <strong>1 hour</strong> left");
        let html = render_html(&plain, sent_at());
        assert!(html.contains("1 Hour Remaining"));
        assert!(html.contains("<strong>1 hour</strong>"));
        assert!(!html.contains("<a href"));

        let mut linked = plain.clone();
        linked.action_text = Some("Open task".into());
        linked.action_url = Some("https://example.com/tasks/1".into());
        assert!(render_html(&linked, sent_at()).contains(r#"<a href="https://example.com/tasks/1""#));
    }

    #[test]
    fn footer_year_comes_from_send_time() {
        let html = render_html(&EmailContent::new("Hi", "there"), sent_at());
        assert!(html.contains("&copy; 2031 Working Status"));
    }
}
