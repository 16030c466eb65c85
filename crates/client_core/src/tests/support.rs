//! Recording fakes shared by the unit tests.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use peer_media::{
    LocalMediaStream, LocalTrack, MediaConstraints, MediaDevices, PeerConnection,
    PeerConnectionConfig, PeerConnectionEvent, PeerConnectionFactory, TrackKind,
};
use shared::{
    domain::{
        ConversationDetail, ConversationId, ConversationSummary, MessageId, MessagePreview,
        MessageRecord, Partner, TempId, UserId,
    },
    protocol::{ChatUpdated, IceCandidate, OutboundEvent, SessionDescription},
};
use tokio::sync::{broadcast, mpsc};
use url::Url;

use crate::{
    api::ChatApi,
    channel::{EventChannel, EventEmitter},
    session::SessionContext,
};

pub fn at(minute: u32) -> DateTime<Utc> {
    format!("2024-05-01T10:{minute:02}:00Z")
        .parse()
        .expect("timestamp")
}

pub fn session() -> Arc<SessionContext> {
    Arc::new(SessionContext::new(
        UserId::new("u1"),
        "token",
        Url::parse("http://127.0.0.1:1").expect("api url"),
        Url::parse("ws://127.0.0.1:1/chat").expect("ws url"),
    ))
}

pub fn preview(id: &str, sender: &str, minute: u32, temp_id: Option<&str>) -> MessagePreview {
    MessagePreview {
        id: MessageId::new(id),
        content: format!("message {id}"),
        emoji: None,
        created_at: at(minute),
        is_sent_by_user: sender == "u1",
        sender_id: Some(UserId::new(sender)),
        is_read: false,
        temp_id: temp_id.map(TempId::new),
    }
}

pub fn summary(conversation_id: &str, minute: Option<u32>) -> ConversationSummary {
    ConversationSummary {
        conversation_id: ConversationId::new(conversation_id),
        partner_id: UserId::new(format!("p-{conversation_id}")),
        partner_name: format!("Partner {conversation_id}"),
        partner_profile_pic: None,
        last_message: minute.map(|minute| preview(&format!("m-{conversation_id}"), "u2", minute, None)),
        unread_count: 1,
    }
}

pub fn chat_updated(
    conversation_id: &str,
    message_id: &str,
    sender: &str,
    minute: u32,
    temp_id: Option<&str>,
) -> ChatUpdated {
    ChatUpdated {
        conversation_id: ConversationId::new(conversation_id),
        partner_id: UserId::new("u2"),
        partner_name: "Bob".to_string(),
        partner_profile_pic: None,
        last_message: preview(message_id, sender, minute, temp_id),
        unread_count: u32::from(sender != "u1"),
    }
}

pub fn record(id: &str, sender: &str, minute: u32, is_read: bool) -> MessageRecord {
    MessageRecord {
        id: MessageId::new(id),
        sender_id: UserId::new(sender),
        content: format!("message {id}"),
        emoji: None,
        created_at: at(minute),
        is_read,
        is_sent_by_user: sender == "u1",
    }
}

pub fn detail(conversation_id: &str, messages: Vec<MessageRecord>) -> ConversationDetail {
    ConversationDetail {
        conversation_id: ConversationId::new(conversation_id),
        partner: Partner {
            id: UserId::new("u2"),
            name: "Bob".to_string(),
            profile_pic: None,
        },
        messages,
    }
}

pub fn channel() -> (EventChannel, mpsc::UnboundedReceiver<OutboundEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (EventChannel::new(Arc::new(tx)), rx)
}

pub fn emitter() -> (EventEmitter, mpsc::UnboundedReceiver<OutboundEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (EventEmitter::new(Arc::new(tx)), rx)
}

pub fn drain(rx: &mut mpsc::UnboundedReceiver<OutboundEvent>) -> Vec<OutboundEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

pub fn drain_names(rx: &mut mpsc::UnboundedReceiver<OutboundEvent>) -> Vec<&'static str> {
    drain(rx).iter().map(OutboundEvent::name).collect()
}

#[derive(Default)]
pub struct FakeChatApi {
    pub summaries: Mutex<Vec<ConversationSummary>>,
    pub details: Mutex<HashMap<ConversationId, ConversationDetail>>,
    pub fail_list: AtomicBool,
    pub fail_mark_read: AtomicBool,
    pub mark_read_calls: Mutex<Vec<ConversationId>>,
    pub deleted: Mutex<Vec<ConversationId>>,
}

impl FakeChatApi {
    pub fn with_detail(self, detail: ConversationDetail) -> Self {
        self.details
            .lock()
            .expect("details")
            .insert(detail.conversation_id.clone(), detail);
        self
    }

    pub fn with_summaries(self, summaries: Vec<ConversationSummary>) -> Self {
        *self.summaries.lock().expect("summaries") = summaries;
        self
    }

    pub fn mark_read_count(&self) -> usize {
        self.mark_read_calls.lock().expect("mark read calls").len()
    }
}

#[async_trait]
impl ChatApi for FakeChatApi {
    async fn fetch_conversations(&self) -> Result<Vec<ConversationSummary>> {
        if self.fail_list.load(Ordering::SeqCst) {
            return Err(anyhow!("connection refused"));
        }
        Ok(self.summaries.lock().expect("summaries").clone())
    }

    async fn fetch_conversation(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<ConversationDetail> {
        self.details
            .lock()
            .expect("details")
            .get(conversation_id)
            .cloned()
            .ok_or_else(|| anyhow!("Error: Chat not found"))
    }

    async fn mark_messages_as_read(&self, conversation_id: &ConversationId) -> Result<()> {
        if self.fail_mark_read.load(Ordering::SeqCst) {
            return Err(anyhow!("server unavailable"));
        }
        self.mark_read_calls
            .lock()
            .expect("mark read calls")
            .push(conversation_id.clone());
        Ok(())
    }

    async fn delete_conversation(&self, conversation_id: &ConversationId) -> Result<()> {
        self.deleted
            .lock()
            .expect("deleted")
            .push(conversation_id.clone());
        Ok(())
    }
}

pub struct FakeStream {
    pub stopped: AtomicBool,
}

#[async_trait]
impl LocalMediaStream for FakeStream {
    fn tracks(&self) -> Vec<LocalTrack> {
        vec![
            LocalTrack {
                track_id: "audio-0".to_string(),
                kind: TrackKind::Audio,
            },
            LocalTrack {
                track_id: "video-0".to_string(),
                kind: TrackKind::Video,
            },
        ]
    }

    async fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub struct FakeMediaDevices {
    pub deny: AtomicBool,
    pub streams: Mutex<Vec<Arc<FakeStream>>>,
}

impl FakeMediaDevices {
    pub fn denying() -> Self {
        let devices = Self::default();
        devices.deny.store(true, Ordering::SeqCst);
        devices
    }

    pub fn acquired(&self) -> usize {
        self.streams.lock().expect("streams").len()
    }

    pub fn all_stopped(&self) -> bool {
        self.streams
            .lock()
            .expect("streams")
            .iter()
            .all(|stream| stream.stopped.load(Ordering::SeqCst))
    }
}

#[async_trait]
impl MediaDevices for FakeMediaDevices {
    async fn acquire(&self, _constraints: MediaConstraints) -> Result<Arc<dyn LocalMediaStream>> {
        if self.deny.load(Ordering::SeqCst) {
            return Err(anyhow!("permission denied"));
        }
        let stream = Arc::new(FakeStream {
            stopped: AtomicBool::new(false),
        });
        self.streams.lock().expect("streams").push(Arc::clone(&stream));
        Ok(stream)
    }
}

/// Peer connection that records every call in order.
pub struct FakePeerConnection {
    pub ops: Mutex<Vec<String>>,
    pub events: broadcast::Sender<PeerConnectionEvent>,
    pub closed: AtomicBool,
    pub fail_remote: AtomicBool,
}

impl FakePeerConnection {
    fn new() -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            ops: Mutex::new(Vec::new()),
            events,
            closed: AtomicBool::new(false),
            fail_remote: AtomicBool::new(false),
        }
    }

    pub fn ops(&self) -> Vec<String> {
        self.ops.lock().expect("ops").clone()
    }

    pub fn candidate_ops(&self) -> Vec<String> {
        self.ops()
            .into_iter()
            .filter(|op| op.starts_with("add_candidate:") || op.starts_with("set_remote:"))
            .collect()
    }

    fn record(&self, op: impl Into<String>) {
        self.ops.lock().expect("ops").push(op.into());
    }
}

#[async_trait]
impl PeerConnection for FakePeerConnection {
    async fn add_local_stream(&self, stream: Arc<dyn LocalMediaStream>) -> Result<()> {
        self.record(format!("add_stream:{}", stream.tracks().len()));
        Ok(())
    }

    async fn create_offer(&self) -> Result<SessionDescription> {
        self.record("create_offer");
        Ok(SessionDescription::offer("local-offer"))
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        self.record("create_answer");
        Ok(SessionDescription::answer("local-answer"))
    }

    async fn set_local_description(&self, description: SessionDescription) -> Result<()> {
        self.record(format!("set_local:{}", description.sdp));
        Ok(())
    }

    async fn set_remote_description(&self, description: SessionDescription) -> Result<()> {
        if self.fail_remote.load(Ordering::SeqCst) {
            return Err(anyhow!("malformed sdp"));
        }
        self.record(format!("set_remote:{}", description.sdp));
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        self.record(format!("add_candidate:{}", candidate.candidate));
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        self.record("close");
        Ok(())
    }

    fn subscribe_events(&self) -> broadcast::Receiver<PeerConnectionEvent> {
        self.events.subscribe()
    }
}

#[derive(Default)]
pub struct FakePeerConnectionFactory {
    pub created: Mutex<Vec<Arc<FakePeerConnection>>>,
    pub fail_remote: AtomicBool,
}

impl FakePeerConnectionFactory {
    pub fn last(&self) -> Arc<FakePeerConnection> {
        self.created
            .lock()
            .expect("created")
            .last()
            .cloned()
            .expect("a peer connection was created")
    }

    pub fn count(&self) -> usize {
        self.created.lock().expect("created").len()
    }
}

#[async_trait]
impl PeerConnectionFactory for FakePeerConnectionFactory {
    async fn create(&self, _config: PeerConnectionConfig) -> Result<Arc<dyn PeerConnection>> {
        let connection = Arc::new(FakePeerConnection::new());
        connection
            .fail_remote
            .store(self.fail_remote.load(Ordering::SeqCst), Ordering::SeqCst);
        self.created
            .lock()
            .expect("created")
            .push(Arc::clone(&connection));
        Ok(connection)
    }
}
