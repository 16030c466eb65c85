//! The open conversation: fetched history, optimistic sends and their
//! server confirmations.

use std::sync::Arc;

use chrono::Utc;
use shared::{
    domain::{ConversationId, MessageRecord, Partner, TempId},
    protocol::{ChatUpdated, OutboundEvent, Recipient, SendMessage},
};
use tracing::{debug, info, warn};

use crate::{
    api::ChatApi,
    channel::{EventChannel, EventEmitter, SubscriptionId, Topic},
    config::SendFailurePolicy,
    error::ClientError,
    reconcile::{self, Message, MessageLog, PendingMessage, ReconcilePlan},
    session::SessionContext,
};

/// Returned when the server accepted a mark-as-read; the list applies it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadReceipt {
    pub conversation_id: ConversationId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Confirmation {
    pub plan: ReconcilePlan,
    pub read_receipt: Option<ReadReceipt>,
}

impl Confirmation {
    pub fn changed(&self) -> bool {
        !self.plan.is_noop()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendFailureOutcome {
    pub error: ClientError,
    pub retracted: Vec<TempId>,
}

struct OpenConversation {
    conversation_id: ConversationId,
    partner: Partner,
    log: MessageLog,
    subscription: SubscriptionId,
}

pub struct ConversationSynchronizer {
    session: Arc<SessionContext>,
    api: Arc<dyn ChatApi>,
    emitter: EventEmitter,
    policy: SendFailurePolicy,
    open: Option<OpenConversation>,
}

impl ConversationSynchronizer {
    pub fn new(
        session: Arc<SessionContext>,
        api: Arc<dyn ChatApi>,
        emitter: EventEmitter,
        policy: SendFailurePolicy,
    ) -> Self {
        Self {
            session,
            api,
            emitter,
            policy,
            open: None,
        }
    }

    /// Fetches history and makes `conversation_id` the open conversation.
    ///
    /// The previous conversation is only detached once the fetch succeeded,
    /// so a failed open leaves it in place. The returned receipt is `None`
    /// when the follow-up mark-as-read failed.
    pub async fn open(
        &mut self,
        channel: &mut EventChannel,
        conversation_id: &ConversationId,
    ) -> Result<Option<ReadReceipt>, ClientError> {
        if !self.session.is_authenticated() {
            return Err(ClientError::fetch("open conversation", "not authenticated"));
        }
        let detail = self
            .api
            .fetch_conversation(conversation_id)
            .await
            .map_err(|err| {
                warn!(%conversation_id, "chat: history fetch failed: {err:#}");
                ClientError::fetch("open conversation", format!("{err:#}"))
            })?;

        self.close(channel);
        let subscription = channel.subscribe(Topic::Conversation(conversation_id.clone()));
        let log = MessageLog::from_history(detail.messages);
        info!(
            %conversation_id,
            messages = log.confirmed().len(),
            "chat: conversation opened"
        );
        self.open = Some(OpenConversation {
            conversation_id: conversation_id.clone(),
            partner: detail.partner,
            log,
            subscription,
        });

        Ok(self.mark_as_read().await)
    }

    /// Detaches the open conversation. Later events for it are not routed.
    pub fn close(&mut self, channel: &mut EventChannel) -> Option<ConversationId> {
        let open = self.open.take()?;
        channel.unsubscribe(open.subscription);
        debug!(conversation_id = %open.conversation_id, "chat: conversation closed");
        Some(open.conversation_id)
    }

    pub fn send(&mut self, content: &str) -> Result<TempId, ClientError> {
        if content.trim().is_empty() {
            return Err(ClientError::EmptyMessage);
        }
        let open = self.open.as_mut().ok_or(ClientError::NoOpenConversation)?;

        let temp_id = TempId::generate();
        open.log.push_pending(PendingMessage {
            temp_id: temp_id.clone(),
            sender_id: self.session.user_id.clone(),
            content: content.to_string(),
            created_at: Utc::now(),
        });

        let event = OutboundEvent::SendMessage(SendMessage {
            recipient: Recipient::User(open.partner.id.clone()),
            content: content.to_string(),
            temp_id: Some(temp_id.clone()),
        });
        if let Err(err) = self.emitter.emit(event) {
            open.log.retire(&temp_id);
            return Err(ClientError::SendFailure {
                temp_id: Some(temp_id),
                message: err.to_string(),
            });
        }
        debug!(conversation_id = %open.conversation_id, %temp_id, "chat: message sent");
        Ok(temp_id)
    }

    /// Merges a `chatUpdated` push for the open conversation. Returns `None`
    /// when the push belongs to another conversation.
    pub async fn on_confirmed(&mut self, update: &ChatUpdated) -> Option<Confirmation> {
        let open = self
            .open
            .as_mut()
            .filter(|open| open.conversation_id == update.conversation_id)?;

        open.partner.id = update.partner_id.clone();
        open.partner.name = update.partner_name.clone();
        open.partner.profile_pic = update.partner_profile_pic.clone();

        let preview = &update.last_message;
        let sender_id = match &preview.sender_id {
            Some(sender_id) => sender_id.clone(),
            None if preview.is_sent_by_user => self.session.user_id.clone(),
            None => update.partner_id.clone(),
        };
        let from_local_user = self.session.is_local_user(&sender_id);
        let record = MessageRecord {
            id: preview.id.clone(),
            sender_id,
            content: preview.content.clone(),
            emoji: preview.emoji.clone(),
            created_at: preview.created_at,
            is_read: from_local_user,
            is_sent_by_user: from_local_user,
        };

        let plan = reconcile::plan(
            &open.log,
            &record,
            preview.temp_id.as_ref(),
            from_local_user,
        );
        debug!(
            conversation_id = %open.conversation_id,
            message_id = %record.id,
            retire = ?plan.retire,
            append = plan.append,
            "chat: confirmation"
        );
        open.log.apply(&plan, record);

        let read_receipt = if plan.append && !from_local_user {
            self.mark_as_read().await
        } else {
            None
        };
        Some(Confirmation { plan, read_receipt })
    }

    /// Failure is logged and leaves state unchanged.
    pub async fn mark_as_read(&mut self) -> Option<ReadReceipt> {
        let conversation_id = self.open.as_ref()?.conversation_id.clone();
        if let Err(err) = self.api.mark_messages_as_read(&conversation_id).await {
            warn!(%conversation_id, "chat: mark as read failed: {err:#}");
            return None;
        }
        let open = self
            .open
            .as_mut()
            .filter(|open| open.conversation_id == conversation_id)?;
        open.log.mark_all_read();
        Some(ReadReceipt { conversation_id })
    }

    pub fn on_send_failure(&mut self, message: &str) -> SendFailureOutcome {
        let retracted = match (self.policy, self.open.as_mut()) {
            (SendFailurePolicy::RetractAll, Some(open)) => open.log.retire_all(),
            _ => Vec::new(),
        };
        warn!(
            policy = ?self.policy,
            retracted = retracted.len(),
            "chat: send failed: {message}"
        );
        let temp_id = match retracted.as_slice() {
            [only] => Some(only.clone()),
            _ => None,
        };
        SendFailureOutcome {
            error: ClientError::SendFailure {
                temp_id,
                message: message.to_string(),
            },
            retracted,
        }
    }

    pub fn open_conversation_id(&self) -> Option<&ConversationId> {
        self.open.as_ref().map(|open| &open.conversation_id)
    }

    pub fn partner(&self) -> Option<&Partner> {
        self.open.as_ref().map(|open| &open.partner)
    }

    pub fn subscription(&self) -> Option<SubscriptionId> {
        self.open.as_ref().map(|open| open.subscription)
    }

    pub fn pending_count(&self) -> usize {
        self.open
            .as_ref()
            .map(|open| open.log.pending().len())
            .unwrap_or_default()
    }

    /// `confirmed ++ pending` for the open conversation.
    pub fn messages(&self) -> Vec<Message> {
        self.open
            .as_ref()
            .map(|open| open.log.render())
            .unwrap_or_default()
    }
}

#[cfg(test)]
#[path = "tests/conversation_tests.rs"]
mod tests;
