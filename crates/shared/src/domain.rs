use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

id_newtype!(UserId);
id_newtype!(ConversationId);
id_newtype!(MessageId);
id_newtype!(TempId);

impl TempId {
    /// Fresh correlation id for an optimistic message.
    pub fn generate() -> Self {
        Self(format!("temp-{}", Uuid::new_v4()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Partner {
    pub id: UserId,
    pub name: String,
    #[serde(default)]
    pub profile_pic: Option<String>,
}

/// A server-confirmed message as delivered by history fetches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRecord {
    pub id: MessageId,
    pub sender_id: UserId,
    pub content: String,
    #[serde(default, deserialize_with = "empty_string_as_none")]
    pub emoji: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub is_read: bool,
    #[serde(default)]
    pub is_sent_by_user: bool,
}

/// Last-message preview carried by conversation summaries and `chatUpdated` pushes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePreview {
    pub id: MessageId,
    pub content: String,
    #[serde(default, deserialize_with = "empty_string_as_none")]
    pub emoji: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub is_sent_by_user: bool,
    #[serde(default)]
    pub sender_id: Option<UserId>,
    #[serde(default)]
    pub is_read: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temp_id: Option<TempId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationSummary {
    #[serde(alias = "chatGroupId")]
    pub conversation_id: ConversationId,
    pub partner_id: UserId,
    pub partner_name: String,
    #[serde(default)]
    pub partner_profile_pic: Option<String>,
    #[serde(default)]
    pub last_message: Option<MessagePreview>,
    #[serde(default)]
    pub unread_count: u32,
}

impl ConversationSummary {
    pub fn last_activity(&self) -> Option<DateTime<Utc>> {
        self.last_message.as_ref().map(|message| message.created_at)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationDetail {
    #[serde(alias = "chatGroupId")]
    pub conversation_id: ConversationId,
    pub partner: Partner,
    #[serde(default)]
    pub messages: Vec<MessageRecord>,
}

fn empty_string_as_none<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = Option::<String>::deserialize(deserializer)?;
    Ok(value.filter(|text| !text.is_empty()))
}
