use serde::{Deserialize, Serialize};

use crate::{
    domain::{ConversationId, MessagePreview, TempId, UserId},
    error::{ApiFailure, ResponseStatus},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SdpType {
    Offer,
    Answer,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub sdp_type: SdpType,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Answer,
            sdp: sdp.into(),
        }
    }
}

/// Network-path (ICE) candidate exchanged during call negotiation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(rename = "sdpMid", default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(
        rename = "sdpMLineIndex",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub sdp_mline_index: Option<u16>,
}

impl IceCandidate {
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid: None,
            sdp_mline_index: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatUpdated {
    #[serde(alias = "chatGroupId")]
    pub conversation_id: ConversationId,
    pub partner_id: UserId,
    pub partner_name: String,
    #[serde(default)]
    pub partner_profile_pic: Option<String>,
    pub last_message: MessagePreview,
    #[serde(default)]
    pub unread_count: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncomingCall {
    pub caller_id: UserId,
    #[serde(default)]
    pub caller_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteOffer {
    pub caller_id: UserId,
    pub offer: SessionDescription,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteAnswer {
    pub answerer_id: UserId,
    pub answer: SessionDescription,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteCandidate {
    pub sender_id: UserId,
    pub candidate: IceCandidate,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallEnded {
    pub sender_id: UserId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallRejected {
    pub rejecter_id: UserId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerError {
    pub message: String,
}

/// Events pushed by the server over the event channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum InboundEvent {
    ChatUpdated(ChatUpdated),
    IncomingCall(IncomingCall),
    Offer(RemoteOffer),
    Answer(RemoteAnswer),
    IceCandidate(RemoteCandidate),
    CallEnded(CallEnded),
    CallRejected(CallRejected),
    Error(ServerError),
}

impl InboundEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::ChatUpdated(_) => "chatUpdated",
            Self::IncomingCall(_) => "incomingCall",
            Self::Offer(_) => "offer",
            Self::Answer(_) => "answer",
            Self::IceCandidate(_) => "iceCandidate",
            Self::CallEnded(_) => "callEnded",
            Self::CallRejected(_) => "callRejected",
            Self::Error(_) => "error",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Recipient {
    #[serde(rename = "recipientId")]
    User(UserId),
    /// Free-form identifier (e.g. an email) used to open a new conversation.
    #[serde(rename = "receiverIdentifier")]
    Identifier(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessage {
    #[serde(flatten)]
    pub recipient: Recipient,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temp_id: Option<TempId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallTarget {
    pub recipient_id: UserId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalOffer {
    pub recipient_id: UserId,
    pub offer: SessionDescription,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalAnswer {
    pub caller_id: UserId,
    pub answer: SessionDescription,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalCandidate {
    pub recipient_id: UserId,
    pub candidate: IceCandidate,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RejectCall {
    pub caller_id: UserId,
}

/// Events emitted by the client over the event channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum OutboundEvent {
    SendMessage(SendMessage),
    StartCall(CallTarget),
    Offer(LocalOffer),
    Answer(LocalAnswer),
    IceCandidate(LocalCandidate),
    RejectCall(RejectCall),
    EndCall(CallTarget),
}

impl OutboundEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::SendMessage(_) => "sendMessage",
            Self::StartCall(_) => "startCall",
            Self::Offer(_) => "offer",
            Self::Answer(_) => "answer",
            Self::IceCandidate(_) => "iceCandidate",
            Self::RejectCall(_) => "rejectCall",
            Self::EndCall(_) => "endCall",
        }
    }
}

/// Response wrapper used by every HTTP endpoint of the chat API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiEnvelope<T> {
    pub status: ResponseStatus,
    #[serde(default)]
    pub message: String,
    #[serde(default = "Option::default")]
    pub data: Option<T>,
    #[serde(default)]
    pub errors: Option<serde_json::Value>,
}

impl<T> ApiEnvelope<T> {
    pub fn success(data: T) -> Self {
        Self {
            status: ResponseStatus::Success,
            message: String::new(),
            data: Some(data),
            errors: None,
        }
    }

    /// Payload of a successful response; anything else is a failure.
    pub fn into_data(self) -> Result<T, ApiFailure> {
        self.into_result()?
            .ok_or_else(|| ApiFailure::new(ResponseStatus::Success, "response carried no data"))
    }

    /// Success check for endpoints whose payload is irrelevant.
    pub fn into_result(self) -> Result<Option<T>, ApiFailure> {
        if self.status != ResponseStatus::Success {
            let message = if self.message.is_empty() {
                "request failed".to_string()
            } else {
                self.message
            };
            return Err(ApiFailure::new(self.status, message));
        }
        Ok(self.data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::MessageId;
    use serde_json::json;

    #[test]
    fn decodes_chat_updated_frame_with_temp_id() {
        let frame = json!({
            "event": "chatUpdated",
            "data": {
                "conversationId": "c1",
                "partnerId": "u2",
                "partnerName": "Bob",
                "partnerProfilePic": null,
                "lastMessage": {
                    "id": "m1",
                    "content": "hi",
                    "emoji": "",
                    "createdAt": "2024-05-01T10:00:00Z",
                    "isSentByUser": true,
                    "senderId": "u1",
                    "tempId": "t1"
                },
                "unreadCount": 0
            }
        });
        let event: InboundEvent = serde_json::from_value(frame).expect("decode");
        let InboundEvent::ChatUpdated(update) = event else {
            panic!("unexpected event");
        };
        assert_eq!(update.last_message.id, MessageId::new("m1"));
        assert_eq!(update.last_message.temp_id, Some(TempId::new("t1")));
        assert_eq!(update.last_message.sender_id, Some(UserId::new("u1")));
    }

    #[test]
    fn encodes_send_message_with_flattened_recipient() {
        let event = OutboundEvent::SendMessage(SendMessage {
            recipient: Recipient::User(UserId::new("u2")),
            content: "hi".to_string(),
            temp_id: Some(TempId::new("t1")),
        });
        assert_eq!(
            serde_json::to_value(&event).expect("encode"),
            json!({
                "event": "sendMessage",
                "data": {"recipientId": "u2", "content": "hi", "tempId": "t1"}
            })
        );

        let new_chat = OutboundEvent::SendMessage(SendMessage {
            recipient: Recipient::Identifier("bob@example.com".to_string()),
            content: "hello".to_string(),
            temp_id: None,
        });
        assert_eq!(
            serde_json::to_value(&new_chat).expect("encode"),
            json!({
                "event": "sendMessage",
                "data": {"receiverIdentifier": "bob@example.com", "content": "hello"}
            })
        );
    }

    #[test]
    fn encodes_candidate_with_browser_field_names() {
        let event = OutboundEvent::IceCandidate(LocalCandidate {
            recipient_id: UserId::new("u2"),
            candidate: IceCandidate {
                candidate: "candidate:1 1 udp 2122260223 10.0.0.2 54321 typ host".to_string(),
                sdp_mid: Some("0".to_string()),
                sdp_mline_index: Some(0),
            },
        });
        let value = serde_json::to_value(&event).expect("encode");
        assert_eq!(value["data"]["candidate"]["sdpMid"], "0");
        assert_eq!(value["data"]["candidate"]["sdpMLineIndex"], 0);
        assert_eq!(value["data"]["recipientId"], "u2");
    }

    #[test]
    fn non_success_envelope_is_a_failure() {
        let envelope: ApiEnvelope<Vec<u32>> = serde_json::from_value(json!({
            "status": "error",
            "message": "Chat not found",
            "data": null,
            "errors": null
        }))
        .expect("decode");
        let failure = envelope.into_data().expect_err("must fail");
        assert_eq!(failure.message, "Chat not found");
    }
}
