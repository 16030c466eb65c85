//! Pending/confirmed message logs for one conversation.
//!
//! `confirmed` is server truth and only ever grows at the tail. `pending` is
//! an overlay of optimistic sends keyed by [`TempId`]. The rendered view is
//! always `confirmed ++ pending`. Incoming confirmations are run through
//! [`plan`] first, which is pure, and then applied with [`MessageLog::apply`].

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use shared::domain::{MessageId, MessageRecord, TempId, UserId};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MessageKey {
    Confirmed(MessageId),
    Pending(TempId),
}

/// A message as rendered to the consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub key: MessageKey,
    pub sender_id: UserId,
    pub content: String,
    pub emoji: Option<String>,
    pub created_at: DateTime<Utc>,
    pub is_read: bool,
    pub is_sent_by_user: bool,
}

impl Message {
    pub fn is_pending(&self) -> bool {
        matches!(self.key, MessageKey::Pending(_))
    }

    pub fn confirmed_id(&self) -> Option<&MessageId> {
        match &self.key {
            MessageKey::Confirmed(id) => Some(id),
            MessageKey::Pending(_) => None,
        }
    }
}

impl From<&MessageRecord> for Message {
    fn from(record: &MessageRecord) -> Self {
        Self {
            key: MessageKey::Confirmed(record.id.clone()),
            sender_id: record.sender_id.clone(),
            content: record.content.clone(),
            emoji: record.emoji.clone(),
            created_at: record.created_at,
            is_read: record.is_read,
            is_sent_by_user: record.is_sent_by_user,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingMessage {
    pub temp_id: TempId,
    pub sender_id: UserId,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl From<&PendingMessage> for Message {
    fn from(pending: &PendingMessage) -> Self {
        Self {
            key: MessageKey::Pending(pending.temp_id.clone()),
            sender_id: pending.sender_id.clone(),
            content: pending.content.clone(),
            emoji: None,
            created_at: pending.created_at,
            is_read: false,
            is_sent_by_user: true,
        }
    }
}

/// What a confirmation does to the log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcilePlan {
    /// Pending entry replaced by this confirmation.
    pub retire: Option<TempId>,
    /// False when the confirmed id is already present.
    pub append: bool,
}

impl ReconcilePlan {
    pub fn is_noop(&self) -> bool {
        self.retire.is_none() && !self.append
    }
}

/// Decides how `record` merges into `log`.
///
/// A pending entry is only ever matched by `temp_id` and only when the
/// confirmation was sent by the local user; two pending messages with the
/// same text never collide.
pub fn plan(
    log: &MessageLog,
    record: &MessageRecord,
    temp_id: Option<&TempId>,
    from_local_user: bool,
) -> ReconcilePlan {
    let retire = temp_id
        .filter(|_| from_local_user)
        .filter(|temp_id| log.has_pending(temp_id))
        .cloned();
    ReconcilePlan {
        retire,
        append: !log.has_confirmed(&record.id),
    }
}

#[derive(Debug, Default)]
pub struct MessageLog {
    confirmed: Vec<MessageRecord>,
    confirmed_ids: HashSet<MessageId>,
    pending: Vec<PendingMessage>,
}

impl MessageLog {
    /// Starts from a fetched history. Later duplicates of an id are dropped.
    pub fn from_history(records: Vec<MessageRecord>) -> Self {
        let mut log = Self::default();
        for record in records {
            if log.confirmed_ids.insert(record.id.clone()) {
                log.confirmed.push(record);
            }
        }
        log
    }

    pub fn has_confirmed(&self, id: &MessageId) -> bool {
        self.confirmed_ids.contains(id)
    }

    pub fn has_pending(&self, temp_id: &TempId) -> bool {
        self.pending.iter().any(|entry| &entry.temp_id == temp_id)
    }

    pub fn confirmed(&self) -> &[MessageRecord] {
        &self.confirmed
    }

    pub fn pending(&self) -> &[PendingMessage] {
        &self.pending
    }

    pub fn push_pending(&mut self, pending: PendingMessage) {
        self.pending.push(pending);
    }

    pub fn apply(&mut self, plan: &ReconcilePlan, record: MessageRecord) {
        if let Some(temp_id) = &plan.retire {
            self.retire(temp_id);
        }
        if plan.append && self.confirmed_ids.insert(record.id.clone()) {
            self.confirmed.push(record);
        }
    }

    pub fn retire(&mut self, temp_id: &TempId) -> bool {
        let before = self.pending.len();
        self.pending.retain(|entry| &entry.temp_id != temp_id);
        self.pending.len() != before
    }

    pub fn retire_all(&mut self) -> Vec<TempId> {
        self.pending.drain(..).map(|entry| entry.temp_id).collect()
    }

    /// Returns whether any entry changed.
    pub fn mark_all_read(&mut self) -> bool {
        let mut changed = false;
        for record in self.confirmed.iter_mut().filter(|record| !record.is_read) {
            record.is_read = true;
            changed = true;
        }
        changed
    }

    pub fn render(&self) -> Vec<Message> {
        self.confirmed
            .iter()
            .map(Message::from)
            .chain(self.pending.iter().map(Message::from))
            .collect()
    }
}

#[cfg(test)]
#[path = "tests/reconcile_tests.rs"]
mod tests;
