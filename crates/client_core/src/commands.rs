//! Commands queued from a front end to the client worker.

use shared::domain::{ConversationId, UserId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientCommand {
    LoadConversations,
    OpenConversation {
        conversation_id: ConversationId,
    },
    CloseConversation,
    SendMessage {
        content: String,
    },
    StartConversation {
        identifier: String,
        content: String,
    },
    DeleteConversation {
        conversation_id: ConversationId,
    },
    StartCall {
        peer_id: UserId,
    },
    AcceptCall,
    RejectCall {
        peer_id: UserId,
    },
    EndCall,
    Shutdown,
}
