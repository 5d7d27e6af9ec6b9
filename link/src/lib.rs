//! # chat-link
//!
//! Real-time chat and notification sync for Rust applications.
//!
//! A single STOMP-over-WebSocket connection carries every topic the
//! application watches. Each topic is exposed as a [`TopicStream`]: REST
//! history pages and live pushes merged into one ordered, deduplicated list
//! that survives reconnects and credential rotation.
//!
//! ## Features
//!
//! - One shared connection with exponential-backoff reconnection
//! - Coalesced subscriptions, replayed automatically after every reconnect
//! - Immediate reconnection when credentials change
//! - Paged history with bounded retry and cancellation
//! - STOMP heart-beats in both directions
//!
//! ## Example
//!
//! ```rust,no_run
//! use chat_link::{ChatLinkClient, LoadMoreOutcome, Topic};
//!
//! #[tokio::main]
//! async fn main() -> chat_link::Result<()> {
//!     let client = ChatLinkClient::builder()
//!         .base_url("https://chat.example.com")
//!         .jwt_token("eyJ...")
//!         .build()?;
//!
//!     let stream = client.topic_stream(Topic::chat("42")).await?;
//!     stream.send_item("hello").await?;
//!
//!     while let LoadMoreOutcome::Loaded { added } = stream.load_more().await {
//!         println!("loaded {} older items", added);
//!     }
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod client;
pub mod connection;
pub mod error;
pub mod event_handlers;
pub mod history;
pub mod models;
pub mod reconcile;
mod registry;
pub mod stomp;
pub mod timeouts;
pub mod transport;

pub use auth::{ArcDynAuthProvider, AuthProvider, CredentialSlot, DynamicAuthProvider, ResolvedAuth};
pub use client::{ChatLinkClient, ChatLinkClientBuilder};
pub use connection::{ConnectionManager, ConnectionState, TopicSubscription};
pub use error::{ChatLinkError, Result};
pub use event_handlers::{ConnectionError, DisconnectReason, EventHandlers};
pub use history::{HistoryFetchError, HistoryLoader, HttpHistoryLoader};
pub use models::{
    ChatItem, ConnectionOptions, HistoryPage, ItemId, LiveEnvelope, OrderingKey, OutgoingItem,
    PageToken, StreamOptions, SubscriptionInfo, Topic, TopicRoutes,
};
pub use reconcile::{LoadMoreOutcome, StreamPhase, StreamSnapshot, TopicStream};
pub use registry::TopicEvent;
pub use timeouts::{ChatLinkTimeouts, ChatLinkTimeoutsBuilder};
pub use transport::{Connector, SessionEvent, StompWsConnector, TransportSession};
