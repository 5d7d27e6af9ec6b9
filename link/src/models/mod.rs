//! Data models for the chat-link client library.
//!
//! Defines topics, items, live payload envelopes, history pages and the
//! option structs used to configure connections and streams.

pub mod chat_item;
pub mod connection_options;
pub mod history_page;
pub mod live_envelope;
pub mod outgoing_item;
pub mod stream_options;
pub mod subscription_info;
pub mod topic;
pub mod topic_routes;


pub use chat_item::{ChatItem, ItemId, OrderingKey};
pub use connection_options::ConnectionOptions;
pub use history_page::{HistoryPage, PageToken};
pub use live_envelope::LiveEnvelope;
pub use outgoing_item::OutgoingItem;
pub use stream_options::StreamOptions;
pub use subscription_info::SubscriptionInfo;
pub use topic::Topic;
pub use topic_routes::TopicRoutes;
