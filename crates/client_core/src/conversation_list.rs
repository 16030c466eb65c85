use std::sync::Arc;

use shared::{
    domain::{ConversationId, ConversationSummary},
    protocol::ChatUpdated,
};
use tracing::{debug, info, warn};

use crate::{
    api::ChatApi,
    channel::{EventChannel, SubscriptionId, Topic},
    error::ClientError,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListChange {
    Inserted(ConversationId),
    Replaced(ConversationId),
}

/// Ordered conversation summaries, newest activity first, one per id.
pub struct ConversationListSynchronizer {
    api: Arc<dyn ChatApi>,
    summaries: Vec<ConversationSummary>,
    subscription: SubscriptionId,
}

impl ConversationListSynchronizer {
    /// Subscribes to list updates right away, so pushes that land before
    /// the first successful load still build up the list.
    pub fn new(api: Arc<dyn ChatApi>, channel: &mut EventChannel) -> Self {
        Self {
            api,
            summaries: Vec::new(),
            subscription: channel.subscribe(Topic::ConversationList),
        }
    }

    /// Replaces local state with the server's list. On failure the last
    /// known list is kept.
    pub async fn load(&mut self) -> Result<&[ConversationSummary], ClientError> {
        let fetched = self.api.fetch_conversations().await.map_err(|err| {
            warn!("chat: conversation list fetch failed: {err:#}");
            ClientError::fetch("load conversations", format!("{err:#}"))
        })?;

        let mut summaries: Vec<ConversationSummary> = Vec::with_capacity(fetched.len());
        for summary in fetched {
            match summaries
                .iter_mut()
                .find(|existing| existing.conversation_id == summary.conversation_id)
            {
                Some(existing) => *existing = summary,
                None => summaries.push(summary),
            }
        }
        sort_by_activity(&mut summaries);
        self.summaries = summaries;
        info!(count = self.summaries.len(), "chat: conversation list loaded");
        Ok(&self.summaries)
    }

    pub fn apply_update(&mut self, update: &ChatUpdated) -> ListChange {
        let summary = ConversationSummary {
            conversation_id: update.conversation_id.clone(),
            partner_id: update.partner_id.clone(),
            partner_name: update.partner_name.clone(),
            partner_profile_pic: update.partner_profile_pic.clone(),
            last_message: Some(update.last_message.clone()),
            unread_count: update.unread_count,
        };

        let change = match self
            .summaries
            .iter_mut()
            .find(|existing| existing.conversation_id == update.conversation_id)
        {
            Some(existing) => {
                *existing = summary;
                ListChange::Replaced(update.conversation_id.clone())
            }
            None => {
                self.summaries.insert(0, summary);
                ListChange::Inserted(update.conversation_id.clone())
            }
        };
        sort_by_activity(&mut self.summaries);
        debug!(conversation_id = %update.conversation_id, ?change, "chat: list updated");
        change
    }

    /// Zeroes the unread badge after a read receipt. Returns whether it changed.
    pub fn clear_unread(&mut self, conversation_id: &ConversationId) -> bool {
        match self
            .summaries
            .iter_mut()
            .find(|summary| &summary.conversation_id == conversation_id)
        {
            Some(summary) if summary.unread_count > 0 => {
                summary.unread_count = 0;
                true
            }
            _ => false,
        }
    }

    pub async fn delete(&mut self, conversation_id: &ConversationId) -> Result<(), ClientError> {
        self.api
            .delete_conversation(conversation_id)
            .await
            .map_err(|err| {
                warn!(%conversation_id, "chat: delete failed: {err:#}");
                ClientError::fetch("delete conversation", format!("{err:#}"))
            })?;
        self.remove(conversation_id);
        info!(%conversation_id, "chat: conversation deleted");
        Ok(())
    }

    pub fn remove(&mut self, conversation_id: &ConversationId) -> Option<ConversationSummary> {
        let index = self
            .summaries
            .iter()
            .position(|summary| &summary.conversation_id == conversation_id)?;
        Some(self.summaries.remove(index))
    }

    pub fn summaries(&self) -> &[ConversationSummary] {
        &self.summaries
    }

    pub fn get(&self, conversation_id: &ConversationId) -> Option<&ConversationSummary> {
        self.summaries
            .iter()
            .find(|summary| &summary.conversation_id == conversation_id)
    }

    pub fn subscription(&self) -> SubscriptionId {
        self.subscription
    }
}

/// Stable sort, newest first. Summaries without a last message go last.
fn sort_by_activity(summaries: &mut [ConversationSummary]) {
    summaries.sort_by(|a, b| b.last_activity().cmp(&a.last_activity()));
}

#[cfg(test)]
#[path = "tests/conversation_list_tests.rs"]
mod tests;
