//! Topic subscription registry.
//!
//! Maps topics to wire subscriptions and local handlers. Several handlers on
//! one topic share a single STOMP subscription; every handler receives every
//! item. The registry never touches the transport: operations return the
//! frames the connection task must send, so the task stays the only writer
//! to the socket and the registry the only owner of the subscription set.

use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, HashMap};
use std::time::{SystemTime, UNIX_EPOCH};

use log::{debug, error, warn};
use tokio::sync::mpsc;

use crate::error::{ChatLinkError, Result};
use crate::event_handlers::DisconnectReason;
use crate::models::{LiveEnvelope, SubscriptionInfo, Topic, TopicRoutes};
use crate::stomp::{self, Frame};

/// Events delivered to one topic handler.
#[derive(Debug, Clone)]
pub enum TopicEvent {
    /// The topic is subscribed on a live session.
    Live,
    /// An item, edit or delete pushed by the broker.
    Envelope(LiveEnvelope),
    /// The session dropped; the topic will be resubscribed on reconnect.
    Interrupted(DisconnectReason),
    /// The connection gave up. No further events follow.
    Failed(ChatLinkError),
}

pub(crate) type HandlerId = u64;

#[inline]
fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

struct TopicEntry {
    wire_id: String,
    destination: String,
    handlers: BTreeMap<HandlerId, mpsc::Sender<TopicEvent>>,
    /// Subscribed on the current session.
    live: bool,
    created_at_ms: u64,
    last_event_time_ms: Option<u64>,
}

impl TopicEntry {
    /// Send `event` to every handler, dropping handlers whose receiver is gone.
    async fn broadcast(&mut self, event: TopicEvent) {
        let mut gone = Vec::new();
        for (id, tx) in &self.handlers {
            if tx.send(event.clone()).await.is_err() {
                gone.push(*id);
            }
        }
        for id in gone {
            debug!("[chat-link] Handler {} on {} dropped", id, self.wire_id);
            self.handlers.remove(&id);
        }
    }
}

pub(crate) struct SubscriptionRegistry {
    routes: TopicRoutes,
    topics: HashMap<Topic, TopicEntry>,
    wire_index: HashMap<String, Topic>,
    next_wire: u64,
    next_handler: HandlerId,
    online: bool,
}

impl SubscriptionRegistry {
    pub fn new(routes: TopicRoutes) -> Self {
        Self {
            routes,
            topics: HashMap::new(),
            wire_index: HashMap::new(),
            next_wire: 1,
            next_handler: 1,
            online: false,
        }
    }

    /// Register a handler for `topic`.
    ///
    /// Returns the handler id and, when the topic has to be subscribed on the
    /// current session, the `SUBSCRIBE` frame to send. Offline registrations
    /// are subscribed by the next [`replay`](Self::replay).
    pub async fn add(
        &mut self,
        topic: Topic,
        tx: mpsc::Sender<TopicEvent>,
    ) -> Result<(HandlerId, Option<Frame>)> {
        let handler_id = self.next_handler;
        self.next_handler += 1;

        let online = self.online;
        let entry = match self.topics.entry(topic.clone()) {
            Entry::Occupied(occupied) => occupied.into_mut(),
            Entry::Vacant(vacant) => {
                let wire_id = format!("sub-{}", self.next_wire);
                self.next_wire += 1;
                if self.wire_index.contains_key(&wire_id) {
                    error!("[chat-link] Wire id {} already in use", wire_id);
                    debug_assert!(false, "duplicate wire id {}", wire_id);
                    return Err(ChatLinkError::DuplicateSubscriptionError(wire_id));
                }
                self.wire_index.insert(wire_id.clone(), topic.clone());
                vacant.insert(TopicEntry {
                    wire_id,
                    destination: self.routes.destination(&topic),
                    handlers: BTreeMap::new(),
                    live: false,
                    created_at_ms: now_ms(),
                    last_event_time_ms: None,
                })
            },
        };
        entry.handlers.insert(handler_id, tx.clone());

        let frame = if online && !entry.live {
            entry.live = true;
            debug!("[chat-link] Subscribing {} as {}", topic, entry.wire_id);
            Some(stomp::subscribe_frame(&entry.wire_id, &entry.destination))
        } else {
            debug!(
                "[chat-link] Handler {} joined {} ({} handler(s))",
                handler_id,
                topic,
                entry.handlers.len()
            );
            None
        };

        if online && tx.send(TopicEvent::Live).await.is_err() {
            entry.handlers.remove(&handler_id);
        }
        Ok((handler_id, frame))
    }

    /// Remove one handler. Returns the `UNSUBSCRIBE` frame when the last
    /// handler of a live topic went away.
    pub fn remove(&mut self, topic: &Topic, handler_id: HandlerId) -> Option<Frame> {
        let entry = self.topics.get_mut(topic)?;
        if entry.handlers.remove(&handler_id).is_none() {
            debug!("[chat-link] Ignoring stale unsubscribe for {} handler {}", topic, handler_id);
            return None;
        }
        if !entry.handlers.is_empty() {
            return None;
        }
        self.drop_topic(topic)
    }

    fn drop_topic(&mut self, topic: &Topic) -> Option<Frame> {
        let entry = self.topics.remove(topic)?;
        self.wire_index.remove(&entry.wire_id);
        debug!("[chat-link] Topic {} has no handlers, releasing {}", topic, entry.wire_id);
        if entry.live && self.online {
            Some(stomp::unsubscribe_frame(&entry.wire_id))
        } else {
            None
        }
    }

    /// Drop handlers whose receiver is gone and release emptied topics.
    pub fn prune(&mut self) -> Vec<Frame> {
        let mut empty = Vec::new();
        for (topic, entry) in self.topics.iter_mut() {
            entry.handlers.retain(|_, tx| !tx.is_closed());
            if entry.handlers.is_empty() {
                empty.push(topic.clone());
            }
        }
        empty.iter().filter_map(|t| self.drop_topic(t)).collect()
    }

    /// A new session is up: subscribe every topic that still has handlers.
    ///
    /// Returns the frames in wire id order. Call [`announce_live`](Self::announce_live)
    /// once they are sent.
    pub fn replay(&mut self) -> Vec<Frame> {
        let _ = self.prune();
        self.online = true;

        let mut entries: Vec<&mut TopicEntry> = self.topics.values_mut().collect();
        entries.sort_by(|a, b| wire_seq(&a.wire_id).cmp(&wire_seq(&b.wire_id)));

        entries
            .into_iter()
            .map(|entry| {
                entry.live = true;
                stomp::subscribe_frame(&entry.wire_id, &entry.destination)
            })
            .collect()
    }

    /// Tell every handler its topic is live.
    pub async fn announce_live(&mut self) {
        for entry in self.topics.values_mut() {
            entry.broadcast(TopicEvent::Live).await;
        }
    }

    /// The session is gone. Nothing is subscribed until the next replay.
    pub async fn mark_offline(&mut self, reason: &DisconnectReason) {
        if !self.online {
            return;
        }
        self.online = false;
        for entry in self.topics.values_mut() {
            entry.live = false;
            entry.broadcast(TopicEvent::Interrupted(reason.clone())).await;
        }
    }

    /// The connection gave up: fail and forget every handler.
    pub async fn fail_all(&mut self, err: ChatLinkError) {
        self.online = false;
        for (_, mut entry) in self.topics.drain() {
            entry.broadcast(TopicEvent::Failed(err.clone())).await;
        }
        self.wire_index.clear();
    }

    /// Deliver a `MESSAGE` frame to the handlers of its topic.
    ///
    /// Matched by the `subscription` header, falling back to `destination`.
    /// Undecodable payloads are logged and dropped.
    pub async fn route(&mut self, frame: &Frame) {
        let topic = frame
            .header("subscription")
            .and_then(|id| self.wire_index.get(id))
            .or_else(|| {
                let dest = frame.header("destination")?;
                self.topics
                    .iter()
                    .find(|(_, e)| e.destination == dest)
                    .map(|(t, _)| t)
            })
            .cloned();

        let Some(topic) = topic else {
            debug!(
                "[chat-link] No topic for MESSAGE subscription={:?} destination={:?}",
                frame.header("subscription"),
                frame.header("destination")
            );
            return;
        };

        let envelope = match LiveEnvelope::decode(&frame.body) {
            Ok(env) => env,
            Err(e) => {
                warn!("[chat-link] Dropping payload on {}: {}", topic, e);
                return;
            },
        };

        if let Some(entry) = self.topics.get_mut(&topic) {
            entry.last_event_time_ms = Some(now_ms());
            entry.broadcast(TopicEvent::Envelope(envelope)).await;
        }
    }

    pub fn list(&self) -> Vec<SubscriptionInfo> {
        let mut infos: Vec<SubscriptionInfo> = self
            .topics
            .iter()
            .map(|(topic, entry)| SubscriptionInfo {
                topic: topic.clone(),
                wire_id: entry.wire_id.clone(),
                destination: entry.destination.clone(),
                handlers: entry.handlers.len(),
                live: entry.live,
                created_at_ms: entry.created_at_ms,
                last_event_time_ms: entry.last_event_time_ms,
            })
            .collect();
        infos.sort_by(|a, b| wire_seq(&a.wire_id).cmp(&wire_seq(&b.wire_id)));
        infos
    }

    pub fn is_empty(&self) -> bool {
        self.topics.is_empty()
    }
}

fn wire_seq(wire_id: &str) -> u64 {
    wire_id
        .strip_prefix("sub-")
        .and_then(|n| n.parse().ok())
        .unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stomp::Command;

    fn message(subscription: &str, destination: &str, body: &str) -> Frame {
        Frame::new(Command::Message)
            .with_header("subscription", subscription)
            .with_header("destination", destination)
            .with_body(body)
    }

    #[tokio::test]
    async fn test_handlers_on_one_topic_share_a_wire_subscription() {
        let mut reg = SubscriptionRegistry::new(TopicRoutes::default());
        reg.replay();
        let (tx1, mut rx1) = mpsc::channel(8);
        let (tx2, mut rx2) = mpsc::channel(8);

        let (h1, f1) = reg.add(Topic::chat("1"), tx1).await.unwrap();
        let (h2, f2) = reg.add(Topic::chat("1"), tx2).await.unwrap();
        assert_ne!(h1, h2);
        let f1 = f1.expect("first handler subscribes");
        assert_eq!(f1.header("destination"), Some("/topic/chat/1"));
        assert!(f2.is_none(), "second handler must coalesce");
        assert!(matches!(rx1.recv().await, Some(TopicEvent::Live)));
        assert!(matches!(rx2.recv().await, Some(TopicEvent::Live)));

        reg.route(&message("sub-1", "/topic/chat/1", r#"{"id":"9","createdAt":5,"content":"x"}"#))
            .await;
        assert!(matches!(rx1.recv().await, Some(TopicEvent::Envelope(_))));
        assert!(matches!(rx2.recv().await, Some(TopicEvent::Envelope(_))));

        assert!(reg.remove(&Topic::chat("1"), h1).is_none());
        let unsub = reg.remove(&Topic::chat("1"), h2).expect("last handler unsubscribes");
        assert_eq!(unsub.command, Command::Unsubscribe);
        assert_eq!(unsub.header("id"), Some("sub-1"));
        assert!(reg.is_empty());
    }

    #[tokio::test]
    async fn test_offline_add_is_replayed_and_removed_topic_is_not() {
        let mut reg = SubscriptionRegistry::new(TopicRoutes::default());
        let (tx, _rx) = mpsc::channel(8);
        let (tx_gone, _rx_gone) = mpsc::channel(8);

        let (_, frame) = reg.add(Topic::chat("1"), tx).await.unwrap();
        assert!(frame.is_none());
        let (h, _) = reg.add(Topic::notifications("u"), tx_gone).await.unwrap();
        assert!(reg.remove(&Topic::notifications("u"), h).is_none());

        let frames = reg.replay();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].header("destination"), Some("/topic/chat/1"));
        assert!(reg.list()[0].live);
    }

    #[tokio::test]
    async fn test_replay_after_drop_resubscribes_every_topic() {
        let mut reg = SubscriptionRegistry::new(TopicRoutes::default());
        reg.replay();
        let (tx1, mut rx1) = mpsc::channel(8);
        let (tx2, _rx2) = mpsc::channel(8);
        reg.add(Topic::chat("a"), tx1).await.unwrap();
        reg.add(Topic::notifications("b"), tx2).await.unwrap();
        let _ = rx1.recv().await;

        reg.mark_offline(&DisconnectReason::new("network")).await;
        assert!(matches!(rx1.recv().await, Some(TopicEvent::Interrupted(_))));
        assert!(reg.list().iter().all(|s| !s.live));

        let frames = reg.replay();
        let ids: Vec<_> = frames.iter().map(|f| f.header("id").unwrap().to_string()).collect();
        assert_eq!(ids, vec!["sub-1", "sub-2"]);

        reg.announce_live().await;
        assert!(matches!(rx1.recv().await, Some(TopicEvent::Live)));
    }

    #[tokio::test]
    async fn test_route_falls_back_to_destination_and_drops_malformed() {
        let mut reg = SubscriptionRegistry::new(TopicRoutes::default());
        reg.replay();
        let (tx, mut rx) = mpsc::channel(8);
        reg.add(Topic::chat("7"), tx).await.unwrap();
        let _ = rx.recv().await;

        let frame = Frame::new(Command::Message)
            .with_header("destination", "/topic/chat/7")
            .with_body(r#"{"command":"delete","id":"3"}"#);
        reg.route(&frame).await;
        match rx.recv().await {
            Some(TopicEvent::Envelope(LiveEnvelope::Delete { id })) => assert_eq!(id.as_str(), "3"),
            other => panic!("unexpected {:?}", other),
        }

        reg.route(&message("sub-1", "/topic/chat/7", "{not json")).await;
        reg.route(&message("sub-99", "/nowhere", "{}")).await;
        assert!(rx.try_recv().is_err());
        assert!(reg.list()[0].last_event_time_ms.is_some());
    }

    #[tokio::test]
    async fn test_dropped_receivers_are_pruned() {
        let mut reg = SubscriptionRegistry::new(TopicRoutes::default());
        reg.replay();
        let (tx, rx) = mpsc::channel(8);
        reg.add(Topic::chat("1"), tx).await.unwrap();
        drop(rx);

        let frames = reg.prune();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].command, Command::Unsubscribe);
        assert!(reg.is_empty());
    }

    #[tokio::test]
    async fn test_fail_all_notifies_and_clears() {
        let mut reg = SubscriptionRegistry::new(TopicRoutes::default());
        let (tx, mut rx) = mpsc::channel(8);
        reg.add(Topic::chat("1"), tx).await.unwrap();

        reg.fail_all(ChatLinkError::TransportError("gave up".into())).await;
        assert!(matches!(rx.recv().await, Some(TopicEvent::Failed(_))));
        assert!(reg.is_empty());
    }

    #[tokio::test]
    async fn test_wire_ids_are_never_reused() {
        let mut reg = SubscriptionRegistry::new(TopicRoutes::default());
        let (tx, _rx) = mpsc::channel(8);
        let (h, _) = reg.add(Topic::chat("1"), tx.clone()).await.unwrap();
        reg.remove(&Topic::chat("1"), h);
        reg.add(Topic::chat("1"), tx).await.unwrap();
        assert_eq!(reg.list()[0].wire_id, "sub-2");
    }
}
