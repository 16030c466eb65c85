//! Event channel plumbing: the subscription registry that decides which
//! synchronizer sees an inbound event, and the emitter used for outbound ones.
//!
//! Subscriptions live in an arena indexed by slot; each slot carries a
//! generation so a stale [`SubscriptionId`] never matches a reused slot.

use std::{collections::HashMap, sync::Arc};

use anyhow::anyhow;
use shared::{
    domain::ConversationId,
    protocol::{InboundEvent, OutboundEvent},
};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::ClientError;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Topic {
    ConversationList,
    Conversation(ConversationId),
    Call,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId {
    index: u32,
    generation: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub subscription: SubscriptionId,
    pub topic: Topic,
}

#[derive(Debug, Default)]
struct Slot {
    generation: u32,
    topic: Option<Topic>,
}

#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    slots: Vec<Slot>,
    free: Vec<u32>,
    by_topic: HashMap<Topic, Vec<SubscriptionId>>,
}

impl SubscriptionRegistry {
    pub fn subscribe(&mut self, topic: Topic) -> SubscriptionId {
        let index = match self.free.pop() {
            Some(index) => index,
            None => {
                self.slots.push(Slot::default());
                (self.slots.len() - 1) as u32
            }
        };
        let slot = &mut self.slots[index as usize];
        slot.topic = Some(topic.clone());
        let id = SubscriptionId {
            index,
            generation: slot.generation,
        };
        self.by_topic.entry(topic).or_default().push(id);
        id
    }

    /// Frees the slot immediately; returns the topic it was attached to.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> Option<Topic> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        let topic = slot.topic.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index);

        if let Some(ids) = self.by_topic.get_mut(&topic) {
            ids.retain(|existing| *existing != id);
            if ids.is_empty() {
                self.by_topic.remove(&topic);
            }
        }
        Some(topic)
    }

    pub fn is_active(&self, id: SubscriptionId) -> bool {
        self.topic(id).is_some()
    }

    pub fn topic(&self, id: SubscriptionId) -> Option<&Topic> {
        self.slots
            .get(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.topic.as_ref())
    }

    pub fn subscribers(&self, topic: &Topic) -> &[SubscriptionId] {
        self.by_topic.get(topic).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.by_topic.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.by_topic.is_empty()
    }

    /// Subscriptions that must see `event`, in delivery order.
    ///
    /// `chatUpdated` reaches the list before the open conversation, so a read
    /// receipt produced by the conversation lands after the list upsert.
    /// Server `error` events carry no entity and go to every conversation and
    /// the call.
    pub fn deliveries(&self, event: &InboundEvent) -> Vec<Delivery> {
        let topics = match event {
            InboundEvent::ChatUpdated(update) => vec![
                Topic::ConversationList,
                Topic::Conversation(update.conversation_id.clone()),
            ],
            InboundEvent::IncomingCall(_)
            | InboundEvent::Offer(_)
            | InboundEvent::Answer(_)
            | InboundEvent::IceCandidate(_)
            | InboundEvent::CallEnded(_)
            | InboundEvent::CallRejected(_) => vec![Topic::Call],
            InboundEvent::Error(_) => {
                let mut open: Vec<&ConversationId> = self
                    .by_topic
                    .keys()
                    .filter_map(|topic| match topic {
                        Topic::Conversation(id) => Some(id),
                        _ => None,
                    })
                    .collect();
                open.sort();
                let mut topics: Vec<Topic> =
                    open.into_iter().cloned().map(Topic::Conversation).collect();
                topics.push(Topic::Call);
                topics
            }
        };

        topics
            .into_iter()
            .flat_map(|topic| {
                self.subscribers(&topic)
                    .iter()
                    .map(move |subscription| Delivery {
                        subscription: *subscription,
                        topic: topic.clone(),
                    })
                    .collect::<Vec<_>>()
            })
            .collect()
    }
}

/// Outbound half of the event channel. Emitting never blocks.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: OutboundEvent) -> anyhow::Result<()>;
}

impl EventSink for mpsc::UnboundedSender<OutboundEvent> {
    fn emit(&self, event: OutboundEvent) -> anyhow::Result<()> {
        self.send(event)
            .map_err(|err| anyhow!("outbound queue closed, dropped {}", err.0.name()))
    }
}

#[derive(Clone)]
pub struct EventEmitter {
    sink: Arc<dyn EventSink>,
}

impl EventEmitter {
    pub fn new(sink: Arc<dyn EventSink>) -> Self {
        Self { sink }
    }

    pub fn emit(&self, event: OutboundEvent) -> Result<(), ClientError> {
        let name = event.name();
        debug!(event = name, "channel: emit");
        self.sink.emit(event).map_err(|err| {
            warn!(event = name, "channel: emit failed: {err}");
            ClientError::ChannelClosed
        })
    }
}

pub struct EventChannel {
    registry: SubscriptionRegistry,
    emitter: EventEmitter,
}

impl EventChannel {
    pub fn new(sink: Arc<dyn EventSink>) -> Self {
        Self {
            registry: SubscriptionRegistry::default(),
            emitter: EventEmitter::new(sink),
        }
    }

    pub fn emitter(&self) -> EventEmitter {
        self.emitter.clone()
    }

    pub fn subscribe(&mut self, topic: Topic) -> SubscriptionId {
        debug!(?topic, "channel: subscribe");
        self.registry.subscribe(topic)
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> Option<Topic> {
        let topic = self.registry.unsubscribe(id);
        debug!(?topic, "channel: unsubscribe");
        topic
    }

    pub fn is_active(&self, id: SubscriptionId) -> bool {
        self.registry.is_active(id)
    }

    pub fn deliveries(&self, event: &InboundEvent) -> Vec<Delivery> {
        self.registry.deliveries(event)
    }

    pub fn registry(&self) -> &SubscriptionRegistry {
        &self.registry
    }
}

#[cfg(test)]
#[path = "tests/channel_tests.rs"]
mod tests;
