//! History page loading over HTTP.
//!
//! [`HistoryLoader`] is a single request/response call with typed failures.
//! It never retries; the topic stream owns the retry policy.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use log::{debug, warn};
use serde::Deserialize;
use thiserror::Error;

use crate::auth::CredentialSlot;
use crate::models::{ChatItem, HistoryPage, PageToken, Topic, TopicRoutes};

/// Why a history page request failed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HistoryFetchError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Server error ({status_code}): {message}")]
    Server { status_code: u16, message: String },

    #[error("Malformed response: {0}")]
    Malformed(String),
}

impl HistoryFetchError {
    /// Network trouble, timeouts, 5xx and 429 are worth retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Network(_) | Self::Timeout(_) => true,
            Self::Server { status_code, .. } => *status_code >= 500 || *status_code == 429,
            Self::NotFound(_) | Self::Unauthorized(_) | Self::Malformed(_) => false,
        }
    }

    fn from_status(status: reqwest::StatusCode, body: String, resource: &str) -> Self {
        match status.as_u16() {
            401 | 403 => Self::Unauthorized(format!("{} ({})", resource, status)),
            404 => Self::NotFound(resource.to_string()),
            code => Self::Server {
                status_code: code,
                message: if body.trim().is_empty() {
                    status.to_string()
                } else {
                    body
                },
            },
        }
    }
}

/// Source of older items for a topic.
#[async_trait]
pub trait HistoryLoader: Send + Sync + 'static {
    /// Fetch the page identified by `page`. `HistoryPage::next == None`
    /// marks the end of history.
    async fn load_page(
        &self,
        topic: &Topic,
        page: &PageToken,
    ) -> Result<HistoryPage, HistoryFetchError>;
}

/// Response body of the history endpoint.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HistoryResponse {
    #[serde(alias = "content")]
    items: Vec<ChatItem>,
    #[serde(default, alias = "has_more")]
    has_more: bool,
    #[serde(default, alias = "next_cursor")]
    next_cursor: Option<String>,
}

/// Turn a response body into a page, deriving the next token from the
/// requested one.
pub(crate) fn parse_history_body(
    body: &str,
    requested: &PageToken,
) -> Result<HistoryPage, HistoryFetchError> {
    let response: HistoryResponse = serde_json::from_str(body)
        .map_err(|e| HistoryFetchError::Malformed(e.to_string()))?;

    let next = if !response.has_more {
        None
    } else if let Some(cursor) = response.next_cursor {
        Some(PageToken::Cursor(cursor))
    } else {
        match requested {
            PageToken::Page(n) => Some(PageToken::Page(n + 1)),
            PageToken::Cursor(_) => {
                return Err(HistoryFetchError::Malformed(
                    "hasMore is set but nextCursor is missing".into(),
                ))
            },
        }
    };

    Ok(HistoryPage::new(response.items, next))
}

/// [`HistoryLoader`] over the REST endpoint:
/// `GET {base_url}{resource}?page=<n>&size=<s>` or `?cursor=<c>&size=<s>`.
#[derive(Clone)]
pub struct HttpHistoryLoader {
    base_url: String,
    http_client: reqwest::Client,
    credentials: CredentialSlot,
    routes: TopicRoutes,
    page_size: u32,
    timeout: Duration,
}

impl HttpHistoryLoader {
    pub fn new(
        base_url: impl Into<String>,
        http_client: reqwest::Client,
        credentials: CredentialSlot,
        routes: TopicRoutes,
        page_size: u32,
        timeout: Duration,
    ) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http_client,
            credentials,
            routes,
            page_size: page_size.max(1),
            timeout,
        }
    }

    fn query(&self, page: &PageToken) -> Vec<(&'static str, String)> {
        let size = ("size", self.page_size.to_string());
        match page {
            PageToken::Page(n) => vec![("page", n.to_string()), size],
            PageToken::Cursor(c) => vec![("cursor", c.clone()), size],
        }
    }
}

#[async_trait]
impl HistoryLoader for HttpHistoryLoader {
    async fn load_page(
        &self,
        topic: &Topic,
        page: &PageToken,
    ) -> Result<HistoryPage, HistoryFetchError> {
        let resource = self.routes.history_resource(topic);
        let url = format!("{}{}", self.base_url, resource);

        let auth = self
            .credentials
            .resolve()
            .await
            .map_err(|e| HistoryFetchError::Unauthorized(e.to_string()))?;

        let mut request = self.http_client.get(&url).query(&self.query(page));
        request = auth.apply_to_request(request);
        if !crate::ChatLinkTimeouts::is_no_timeout(self.timeout) {
            request = request.timeout(self.timeout);
        }

        let start = Instant::now();
        debug!("[chat-link] GET {} {} topic={}", url, page, topic);

        let response = request.send().await.map_err(|e| {
            warn!(
                "[chat-link] History request failed: topic={} {} error={} duration_ms={}",
                topic,
                page,
                e,
                start.elapsed().as_millis()
            );
            if e.is_timeout() {
                HistoryFetchError::Timeout(url.clone())
            } else {
                HistoryFetchError::Network(e.to_string())
            }
        })?;

        let status = response.status();
        let body = response.text().await.map_err(|e| {
            if e.is_timeout() {
                HistoryFetchError::Timeout(url.clone())
            } else {
                HistoryFetchError::Network(e.to_string())
            }
        })?;

        if !status.is_success() {
            warn!(
                "[chat-link] History server error: topic={} status={} duration_ms={}",
                topic,
                status,
                start.elapsed().as_millis()
            );
            return Err(HistoryFetchError::from_status(status, body, &resource));
        }

        let page = parse_history_body(&body, page)?;
        debug!(
            "[chat-link] History page: topic={} items={} end={} duration_ms={}",
            topic,
            page.items.len(),
            page.is_end_of_history(),
            start.elapsed().as_millis()
        );
        Ok(page)
    }
}
