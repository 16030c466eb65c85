use peer_media::RemoteTrack;
use shared::domain::{ConversationId, ConversationSummary, Partner, UserId};

use crate::{
    call::{CallEndReason, CallStatus},
    error::ClientError,
    reconcile::Message,
};

/// Notifications published to consumers of [`crate::ChatClient`].
#[derive(Debug, Clone)]
pub enum ClientEvent {
    ConversationsUpdated(Vec<ConversationSummary>),
    /// A conversation created by `start_conversation` showed up in the list.
    ConversationStarted {
        conversation_id: ConversationId,
    },
    ConversationUpdated {
        conversation_id: ConversationId,
        partner: Partner,
        messages: Vec<Message>,
    },
    ConversationClosed {
        conversation_id: ConversationId,
    },
    MessagesRead {
        conversation_id: ConversationId,
    },
    CallStatusChanged(CallStatus),
    IncomingCall {
        caller_id: UserId,
        caller_name: Option<String>,
    },
    RemoteTrackAdded {
        peer_id: UserId,
        track: RemoteTrack,
    },
    CallEnded {
        peer_id: UserId,
        reason: CallEndReason,
    },
    Error(ClientError),
    Disconnected,
}
