//! Main chat-link client with builder pattern.
//!
//! Ties the pieces together: one lazily started [`ConnectionManager`], one
//! [`HistoryLoader`] and a shared [`CredentialSlot`] used by both.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::OnceCell;

use crate::{
    auth::{ArcDynAuthProvider, AuthProvider, CredentialSlot, ResolvedAuth},
    connection::{ConnectionManager, ConnectionState},
    error::{ChatLinkError, Result},
    event_handlers::EventHandlers,
    history::{HistoryLoader, HttpHistoryLoader},
    models::{ConnectionOptions, StreamOptions, SubscriptionInfo, Topic, TopicRoutes},
    reconcile::TopicStream,
    timeouts::ChatLinkTimeouts,
    transport::{Connector, StompWsConnector},
};

/// Main chat-link client.
///
/// Use [`ChatLinkClientBuilder`] to construct instances with custom configuration.
///
/// # Examples
///
/// ```rust,no_run
/// use chat_link::{ChatLinkClient, Topic};
///
/// # async fn example() -> chat_link::Result<()> {
/// let client = ChatLinkClient::builder()
///     .base_url("https://chat.example.com")
///     .jwt_token("eyJ...")
///     .build()?;
///
/// let mut stream = client.topic_stream(Topic::chat("42")).await?;
/// while let Some(snapshot) = stream.changed().await {
///     println!("{} items, live={}", snapshot.items.len(), snapshot.is_live);
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct ChatLinkClient {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    base_url: String,
    credentials: CredentialSlot,
    connector: Arc<dyn Connector>,
    history_loader: Arc<dyn HistoryLoader>,
    connection_options: ConnectionOptions,
    stream_options: StreamOptions,
    routes: TopicRoutes,
    timeouts: ChatLinkTimeouts,
    event_handlers: EventHandlers,
    connection: OnceCell<Arc<ConnectionManager>>,
    /// Set by `disconnect`; the client does not connect again afterwards.
    disconnected: AtomicBool,
}

impl ChatLinkClient {
    /// Create a new builder for configuring the client
    pub fn builder() -> ChatLinkClientBuilder {
        ChatLinkClientBuilder::new()
    }

    pub fn base_url(&self) -> &str {
        &self.inner.base_url
    }

    /// Get the configured timeouts
    pub fn timeouts(&self) -> &ChatLinkTimeouts {
        &self.inner.timeouts
    }

    /// The shared connection, started on first use.
    pub async fn connection(&self) -> Arc<ConnectionManager> {
        let inner = &self.inner;
        inner
            .connection
            .get_or_init(|| async {
                log::debug!("[chat-link] Starting connection to {}", inner.base_url);
                Arc::new(
                    ConnectionManager::connect(
                        Arc::clone(&inner.connector),
                        inner.credentials.clone(),
                        inner.connection_options.clone(),
                        inner.timeouts.clone(),
                        inner.event_handlers.clone(),
                        inner.routes.clone(),
                    )
                    .await,
                )
            })
            .await
            .clone()
    }

    /// Open a reconciled stream on `topic` with the client's stream options.
    pub async fn topic_stream(&self, topic: Topic) -> Result<TopicStream> {
        self.topic_stream_with_options(topic, self.inner.stream_options.clone())
            .await
    }

    pub async fn topic_stream_with_options(
        &self,
        topic: Topic,
        options: StreamOptions,
    ) -> Result<TopicStream> {
        if self.inner.disconnected.load(Ordering::Acquire) {
            return Err(ChatLinkError::Closed(
                "Client is disconnected; build a new client to reconnect".into(),
            ));
        }
        let connection = self.connection().await;
        TopicStream::open(
            connection,
            Arc::clone(&self.inner.history_loader),
            topic,
            options,
        )
        .await
    }

    /// Reconnect with the freshly resolved credential. No-op before the
    /// connection has started.
    pub async fn on_credential_change(&self) {
        if let Some(connection) = self.inner.connection.get() {
            connection.on_credential_change().await;
        }
    }

    /// Swap the credential used by the broker and the history endpoint.
    pub async fn rotate_credentials(&self, auth: impl Into<ResolvedAuth>) {
        self.inner.credentials.replace(auth);
        self.on_credential_change().await;
    }

    /// Close the broker connection. Open streams stop receiving live items.
    ///
    /// Terminal for this client: later [`topic_stream`](Self::topic_stream)
    /// calls fail with [`ChatLinkError::Closed`].
    pub async fn disconnect(&self) {
        self.inner.disconnected.store(true, Ordering::Release);
        if let Some(connection) = self.inner.connection.get() {
            connection.disconnect().await;
        }
    }

    /// `None` until the first stream has been opened.
    pub fn connection_state(&self) -> Option<ConnectionState> {
        self.inner.connection.get().map(|c| c.state())
    }

    pub async fn list_subscriptions(&self) -> Vec<SubscriptionInfo> {
        match self.inner.connection.get() {
            Some(connection) => connection.list_subscriptions().await,
            None => Vec::new(),
        }
    }
}

/// Builder for configuring [`ChatLinkClient`] instances.
pub struct ChatLinkClientBuilder {
    base_url: Option<String>,
    auth: ResolvedAuth,
    timeouts: ChatLinkTimeouts,
    connection_options: ConnectionOptions,
    stream_options: StreamOptions,
    routes: TopicRoutes,
    event_handlers: EventHandlers,
    http_client: Option<reqwest::Client>,
    connector: Option<Arc<dyn Connector>>,
    history_loader: Option<Arc<dyn HistoryLoader>>,
}

impl ChatLinkClientBuilder {
    fn new() -> Self {
        Self {
            base_url: None,
            auth: ResolvedAuth::default(),
            timeouts: ChatLinkTimeouts::default(),
            connection_options: ConnectionOptions::default(),
            stream_options: StreamOptions::default(),
            routes: TopicRoutes::default(),
            event_handlers: EventHandlers::default(),
            http_client: None,
            connector: None,
            history_loader: None,
        }
    }

    /// Base URL of the backend, e.g. `https://chat.example.com`. The
    /// WebSocket endpoint is derived from it.
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Set JWT token authentication
    pub fn jwt_token(mut self, token: impl Into<String>) -> Self {
        self.auth = AuthProvider::jwt_token(token.into()).into();
        self
    }

    /// Set authentication provider directly
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// use chat_link::{ChatLinkClient, AuthProvider};
    ///
    /// # fn example() -> chat_link::Result<()> {
    /// let client = ChatLinkClient::builder()
    ///     .base_url("http://localhost:8080")
    ///     .auth(AuthProvider::basic_auth("alice".to_string(), "secret".to_string()))
    ///     .build()?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn auth(mut self, auth: AuthProvider) -> Self {
        self.auth = auth.into();
        self
    }

    /// Resolve credentials on every connect, reconnect and history request.
    pub fn auth_provider(mut self, provider: ArcDynAuthProvider) -> Self {
        self.auth = provider.into();
        self
    }

    pub fn timeouts(mut self, timeouts: ChatLinkTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn connection_options(mut self, options: ConnectionOptions) -> Self {
        self.connection_options = options;
        self
    }

    pub fn stream_options(mut self, options: StreamOptions) -> Self {
        self.stream_options = options;
        self
    }

    /// Destination and history path templates.
    pub fn routes(mut self, routes: TopicRoutes) -> Self {
        self.routes = routes;
        self
    }

    pub fn event_handlers(mut self, handlers: EventHandlers) -> Self {
        self.event_handlers = handlers;
        self
    }

    /// Reuse an existing HTTP client for history requests.
    pub fn http_client(mut self, client: reqwest::Client) -> Self {
        self.http_client = Some(client);
        self
    }

    /// Replace the WebSocket transport, e.g. with an in-memory broker.
    pub fn connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = Some(connector);
        self
    }

    /// Replace the REST history loader.
    pub fn history_loader(mut self, loader: Arc<dyn HistoryLoader>) -> Self {
        self.history_loader = Some(loader);
        self
    }

    /// Build the client. Nothing connects until the first stream opens.
    pub fn build(self) -> Result<ChatLinkClient> {
        let base_url = self
            .base_url
            .ok_or_else(|| ChatLinkError::ConfigurationError("base_url is required".into()))?;
        let base_url = base_url.trim_end_matches('/').to_string();

        let credentials = CredentialSlot::new(self.auth);

        let connector: Arc<dyn Connector> = match self.connector {
            Some(connector) => connector,
            None => Arc::new(StompWsConnector::new(
                &base_url,
                &self.connection_options,
                &self.timeouts,
            )?),
        };

        let history_loader: Arc<dyn HistoryLoader> = match self.history_loader {
            Some(loader) => loader,
            None => {
                let http_client = match self.http_client {
                    Some(client) => client,
                    None => reqwest::Client::builder()
                        .connect_timeout(self.timeouts.connection_timeout)
                        .pool_max_idle_per_host(4)
                        .pool_idle_timeout(Duration::from_secs(90))
                        .build()
                        .map_err(|e| ChatLinkError::ConfigurationError(e.to_string()))?,
                };
                Arc::new(HttpHistoryLoader::new(
                    base_url.clone(),
                    http_client,
                    credentials.clone(),
                    self.routes.clone(),
                    self.stream_options.page_size,
                    self.timeouts.history_timeout,
                ))
            },
        };

        Ok(ChatLinkClient {
            inner: Arc::new(ClientInner {
                base_url,
                credentials,
                connector,
                history_loader,
                connection_options: self.connection_options,
                stream_options: self.stream_options,
                routes: self.routes,
                timeouts: self.timeouts,
                event_handlers: self.event_handlers,
                connection: OnceCell::new(),
                disconnected: AtomicBool::new(false),
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_pattern() {
        let client = ChatLinkClient::builder()
            .base_url("http://localhost:8080/")
            .jwt_token("test_token")
            .timeouts(ChatLinkTimeouts::fast())
            .build()
            .unwrap();

        assert_eq!(client.base_url(), "http://localhost:8080");
        assert!(client.connection_state().is_none());
    }

    #[test]
    fn test_builder_missing_url() {
        let result = ChatLinkClient::builder().build();
        assert!(matches!(result, Err(ChatLinkError::ConfigurationError(_))));
    }

    #[test]
    fn test_builder_rejects_bad_url() {
        let result = ChatLinkClient::builder().base_url("not a url").build();
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_idle_client_operations_are_noops() {
        let client = ChatLinkClient::builder()
            .base_url("http://localhost:8080")
            .build()
            .unwrap();

        client.on_credential_change().await;
        client.disconnect().await;
        assert!(client.list_subscriptions().await.is_empty());
        assert!(client.connection_state().is_none());

        let reopened = client.topic_stream(Topic::chat("1")).await;
        assert!(matches!(reopened, Err(ChatLinkError::Closed(_))));
        assert!(client.connection_state().is_none());
    }
}
