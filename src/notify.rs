//! Outbound notifications: Telegram messages and IndexNow pings.
//!
//! Both sinks are best effort. Each request is retried with the default
//! [`Backoff`] and a failure that survives the retries is logged, never
//! returned: a missed notification must not fail an otherwise finished entry.

use crate::api::SHORT_TIMEOUT;
use crate::retry::Backoff;
use reqwest::Client;
use std::error::Error;
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};
use url::Url;

/// Random extra delay added to each notification retry.
const NOTIFY_JITTER: Duration = Duration::from_millis(250);

/// IndexNow endpoints pinged for every new article.
pub const INDEXNOW_ENDPOINTS: [&str; 6] = [
    "https://api.indexnow.org/indexnow",
    "https://www.bing.com/indexnow",
    "https://searchadvisor.naver.com/indexnow",
    "https://search.seznam.cz/indexnow",
    "https://yandex.com/indexnow",
    "https://indexnow.yep.com/indexnow",
];

/// A sink for human-readable status messages.
pub trait Notify {
    /// Deliver `message`. Never fails; delivery problems are logged.
    async fn notify(&self, message: &str);
}

/// Used when no messaging credentials are configured.
#[derive(Debug, Default)]
pub struct LogOnly;

impl Notify for LogOnly {
    async fn notify(&self, message: &str) {
        debug!(%message, "Notification not sent (no messaging sink configured)");
    }
}

/// Telegram bot `sendMessage` sink.
#[derive(Debug, Clone)]
pub struct Telegram {
    http: Client,
    endpoint: String,
    chat_id: String,
    site_url: String,
    backoff: Backoff,
}

impl Telegram {
    pub fn new(
        token: &str,
        chat_id: impl Into<String>,
        site_url: impl Into<String>,
    ) -> Result<Self, Box<dyn Error>> {
        Ok(Self {
            http: Client::builder().timeout(SHORT_TIMEOUT).build()?,
            endpoint: format!("https://api.telegram.org/bot{token}/sendMessage"),
            chat_id: chat_id.into(),
            site_url: site_url.into(),
            backoff: Backoff::default().with_jitter(NOTIFY_JITTER),
        })
    }

    /// Message body as sent: the site URL on the first line, then `message`.
    pub fn text_for(&self, message: &str) -> String {
        format!("{}\n{}", self.site_url, message)
    }

    async fn send_once(&self, text: &str) -> Result<(), Box<dyn Error>> {
        let response = self
            .http
            .post(&self.endpoint)
            .form(&[("chat_id", self.chat_id.as_str()), ("text", text)])
            .send()
            .await?;
        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(format!("Telegram returned {status}: {body}").into())
        }
    }
}

impl Notify for Telegram {
    #[instrument(level = "info", skip_all, fields(chat_id = %self.chat_id))]
    async fn notify(&self, message: &str) {
        let text = self.text_for(message);
        match self.backoff.retry(|| self.send_once(&text)).await {
            Ok(()) => info!("Telegram message sent"),
            Err(e) => error!(error = %e, "Telegram message could not be delivered"),
        }
    }
}

/// Pings IndexNow endpoints about a new URL.
#[derive(Debug, Clone)]
pub struct IndexNow {
    http: Client,
    key: String,
    endpoints: Vec<String>,
    backoff: Backoff,
}

impl IndexNow {
    pub fn new(key: impl Into<String>) -> Result<Self, Box<dyn Error>> {
        Ok(Self {
            http: Client::builder().timeout(SHORT_TIMEOUT).build()?,
            key: key.into(),
            endpoints: INDEXNOW_ENDPOINTS.iter().map(|s| s.to_string()).collect(),
            backoff: Backoff::default().with_jitter(NOTIFY_JITTER),
        })
    }

    /// `{endpoint}?url={article_url}&key={key}` with proper escaping.
    pub fn ping_url(endpoint: &str, article_url: &str, key: &str) -> Result<Url, url::ParseError> {
        Url::parse_with_params(endpoint, &[("url", article_url), ("key", key)])
    }

    async fn ping_once(&self, url: &Url) -> Result<(), Box<dyn Error>> {
        let response = self.http.get(url.clone()).send().await?;
        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(format!("status {status}: {body}").into())
        }
    }

    /// Ping every endpoint independently and return how many accepted the URL.
    #[instrument(level = "info", skip_all, fields(%article_url))]
    pub async fn submit(&self, article_url: &str) -> usize {
        let mut accepted = 0;
        for endpoint in &self.endpoints {
            let url = match Self::ping_url(endpoint, article_url, &self.key) {
                Ok(url) => url,
                Err(e) => {
                    warn!(%endpoint, error = %e, "Invalid IndexNow endpoint");
                    continue;
                }
            };
            match self.backoff.retry(|| self.ping_once(&url)).await {
                Ok(()) => {
                    accepted += 1;
                    info!(%endpoint, "IndexNow notified");
                }
                Err(e) => error!(%endpoint, error = %e, "IndexNow notification failed"),
            }
        }
        accepted
    }
}
