//! Client core for realtime chat: the event channel, the conversation list
//! and open-conversation synchronizers, and the call negotiation machine,
//! multiplexed by [`ChatClient`].

pub mod api;
pub mod call;
pub mod channel;
pub mod client;
pub mod commands;
pub mod config;
pub mod conversation;
pub mod conversation_list;
pub mod error;
pub mod events;
pub mod format;
pub mod reconcile;
pub mod session;
pub mod transport;

pub use api::{ChatApi, HttpChatApi, MissingChatApi};
pub use call::{CallEndReason, CallStatus};
pub use client::{ChatClient, ClientDependencies, ClientOptions};
pub use commands::ClientCommand;
pub use config::{load_settings, SendFailurePolicy, Settings};
pub use error::ClientError;
pub use events::ClientEvent;
pub use format::format_timestamp;
pub use reconcile::{Message, MessageKey};
pub use session::SessionContext;

#[cfg(test)]
#[path = "tests/support.rs"]
pub(crate) mod test_support;
