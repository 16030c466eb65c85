use std::sync::Arc;

use peer_media::{
    MediaDevices, MissingMediaDevices, MissingPeerConnectionFactory, PeerConnectionConfig,
    PeerConnectionFactory,
};
use shared::{
    domain::{ConversationId, ConversationSummary, TempId, UserId},
    protocol::{ChatUpdated, InboundEvent, OutboundEvent, Recipient, SendMessage},
};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use crate::{
    api::{ChatApi, HttpChatApi},
    call::{CallNegotiator, CallStatus, PeerSignal},
    channel::{EventChannel, EventSink, Topic},
    commands::ClientCommand,
    config::{SendFailurePolicy, Settings},
    conversation::{ConversationSynchronizer, ReadReceipt},
    conversation_list::{ConversationListSynchronizer, ListChange},
    error::ClientError,
    events::ClientEvent,
    reconcile::Message,
    session::SessionContext,
};

/// External collaborators the client drives.
pub struct ClientDependencies {
    pub api: Arc<dyn ChatApi>,
    pub media_devices: Arc<dyn MediaDevices>,
    pub peer_connections: Arc<dyn PeerConnectionFactory>,
}

impl ClientDependencies {
    /// HTTP api with no media backend; calls fail with `MediaAccessDenied`.
    pub fn http(session: Arc<SessionContext>) -> Self {
        Self {
            api: Arc::new(HttpChatApi::new(session)),
            media_devices: Arc::new(MissingMediaDevices),
            peer_connections: Arc::new(MissingPeerConnectionFactory),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub peer_connection: PeerConnectionConfig,
    pub send_failure_policy: SendFailurePolicy,
    pub event_buffer: usize,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            peer_connection: PeerConnectionConfig::default(),
            send_failure_policy: SendFailurePolicy::default(),
            event_buffer: 1024,
        }
    }
}

impl From<&Settings> for ClientOptions {
    fn from(settings: &Settings) -> Self {
        Self {
            peer_connection: settings.peer_connection_config(),
            send_failure_policy: settings.send_failure_policy,
            event_buffer: settings.event_buffer,
        }
    }
}

/// Owns the event channel and the three synchronizers. Every handler takes
/// `&mut self` and runs to completion before the next event is looked at.
pub struct ChatClient {
    session: Arc<SessionContext>,
    channel: EventChannel,
    list: ConversationListSynchronizer,
    conversation: ConversationSynchronizer,
    call: CallNegotiator,
    events: broadcast::Sender<ClientEvent>,
    peer_signals: mpsc::UnboundedReceiver<PeerSignal>,
    pending_new_conversation: Option<String>,
}

impl ChatClient {
    pub fn new(
        session: Arc<SessionContext>,
        sink: Arc<dyn EventSink>,
        dependencies: ClientDependencies,
        options: ClientOptions,
    ) -> Self {
        let (events, _) = broadcast::channel(options.event_buffer.max(1));
        let (peer_signals_tx, peer_signals) = mpsc::unbounded_channel();
        let mut channel = EventChannel::new(sink);
        channel.subscribe(Topic::Call);

        let list = ConversationListSynchronizer::new(Arc::clone(&dependencies.api), &mut channel);
        let conversation = ConversationSynchronizer::new(
            Arc::clone(&session),
            dependencies.api,
            channel.emitter(),
            options.send_failure_policy,
        );
        let call = CallNegotiator::new(
            channel.emitter(),
            dependencies.media_devices,
            dependencies.peer_connections,
            options.peer_connection,
            events.clone(),
            peer_signals_tx,
        );

        Self {
            session,
            channel,
            list,
            conversation,
            call,
            events,
            peer_signals,
            pending_new_conversation: None,
        }
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ClientEvent> {
        self.events.subscribe()
    }

    pub fn session(&self) -> &SessionContext {
        &self.session
    }

    pub fn summaries(&self) -> &[ConversationSummary] {
        self.list.summaries()
    }

    pub fn open_conversation_id(&self) -> Option<&ConversationId> {
        self.conversation.open_conversation_id()
    }

    pub fn messages(&self) -> Vec<Message> {
        self.conversation.messages()
    }

    pub fn call_status(&self) -> CallStatus {
        self.call.status()
    }

    pub async fn load_conversations(&mut self) -> Result<(), ClientError> {
        let summaries = self.list.load().await?.to_vec();
        self.publish(ClientEvent::ConversationsUpdated(summaries));
        Ok(())
    }

    pub async fn open_conversation(
        &mut self,
        conversation_id: &ConversationId,
    ) -> Result<(), ClientError> {
        let receipt = self
            .conversation
            .open(&mut self.channel, conversation_id)
            .await?;
        self.publish_conversation();
        if let Some(receipt) = receipt {
            self.apply_read_receipt(receipt);
        }
        Ok(())
    }

    pub fn close_conversation(&mut self) {
        if let Some(conversation_id) = self.conversation.close(&mut self.channel) {
            self.publish(ClientEvent::ConversationClosed { conversation_id });
        }
    }

    pub fn send_message(&mut self, content: &str) -> Result<TempId, ClientError> {
        let temp_id = self.conversation.send(content)?;
        self.publish_conversation();
        Ok(temp_id)
    }

    /// Messages someone by free-form identifier. The conversation the server
    /// creates is reported as `ConversationStarted` once its summary arrives.
    pub fn start_conversation(&mut self, identifier: &str, content: &str) -> Result<(), ClientError> {
        if content.trim().is_empty() {
            return Err(ClientError::EmptyMessage);
        }
        let identifier = identifier.trim();
        if identifier.is_empty() {
            return Err(ClientError::SendFailure {
                temp_id: None,
                message: "recipient identifier must not be empty".to_string(),
            });
        }
        self.channel
            .emitter()
            .emit(OutboundEvent::SendMessage(SendMessage {
                recipient: Recipient::Identifier(identifier.to_string()),
                content: content.to_string(),
                temp_id: None,
            }))?;
        info!(identifier, "chat: starting conversation");
        self.pending_new_conversation = Some(identifier.to_string());
        Ok(())
    }

    pub async fn delete_conversation(
        &mut self,
        conversation_id: &ConversationId,
    ) -> Result<(), ClientError> {
        self.list.delete(conversation_id).await?;
        if self.conversation.open_conversation_id() == Some(conversation_id) {
            self.close_conversation();
        }
        self.publish(ClientEvent::ConversationsUpdated(self.list.summaries().to_vec()));
        Ok(())
    }

    pub async fn start_call(&mut self, peer_id: UserId) -> Result<(), ClientError> {
        self.call.start(peer_id).await
    }

    pub async fn accept_call(&mut self) -> Result<(), ClientError> {
        self.call.accept().await
    }

    pub async fn reject_call(&mut self, peer_id: &UserId) -> Result<(), ClientError> {
        self.call.reject(peer_id).await
    }

    pub async fn end_call(&mut self) -> Result<(), ClientError> {
        self.call.end().await
    }

    /// Routes one inbound event to every subscription its topic matches.
    pub async fn handle_inbound(&mut self, event: InboundEvent) {
        let deliveries = self.channel.deliveries(&event);
        if deliveries.is_empty() {
            debug!(event = event.name(), "chat: no subscriber for event");
        }

        let mut failure_reported = false;
        for delivery in deliveries {
            if !self.channel.is_active(delivery.subscription) {
                continue;
            }
            match (&delivery.topic, &event) {
                (Topic::ConversationList, InboundEvent::ChatUpdated(update)) => {
                    self.on_list_update(update);
                }
                (Topic::Conversation(_), InboundEvent::ChatUpdated(update)) => {
                    self.on_conversation_update(update).await;
                }
                (Topic::Conversation(_), InboundEvent::Error(error)) => {
                    let outcome = self.conversation.on_send_failure(&error.message);
                    if !outcome.retracted.is_empty() {
                        self.publish_conversation();
                    }
                    self.publish(ClientEvent::Error(outcome.error));
                    failure_reported = true;
                }
                (Topic::Call, InboundEvent::Error(error)) => {
                    if self.call.on_server_error(&error.message).await {
                        self.publish(ClientEvent::Error(ClientError::SignalingApplyFailure(
                            error.message.clone(),
                        )));
                        failure_reported = true;
                    }
                }
                (Topic::Call, _) => self.dispatch_call(&event).await,
                _ => {}
            }
        }

        if let InboundEvent::Error(error) = &event {
            let starting = self.pending_new_conversation.take();
            if !failure_reported {
                warn!("chat: server error: {}", error.message);
                let err = match starting {
                    Some(_) => ClientError::SendFailure {
                        temp_id: None,
                        message: error.message.clone(),
                    },
                    None => ClientError::ServerError(error.message.clone()),
                };
                self.publish(ClientEvent::Error(err));
            }
        }
    }

    pub async fn handle_peer_signal(&mut self, signal: PeerSignal) {
        self.call.on_peer_event(signal).await;
    }

    pub async fn execute(&mut self, command: ClientCommand) -> Result<(), ClientError> {
        match command {
            ClientCommand::LoadConversations => self.load_conversations().await,
            ClientCommand::OpenConversation { conversation_id } => {
                self.open_conversation(&conversation_id).await
            }
            ClientCommand::CloseConversation => {
                self.close_conversation();
                Ok(())
            }
            ClientCommand::SendMessage { content } => self.send_message(&content).map(|_| ()),
            ClientCommand::StartConversation {
                identifier,
                content,
            } => self.start_conversation(&identifier, &content),
            ClientCommand::DeleteConversation { conversation_id } => {
                self.delete_conversation(&conversation_id).await
            }
            ClientCommand::StartCall { peer_id } => self.start_call(peer_id).await,
            ClientCommand::AcceptCall => self.accept_call().await,
            ClientCommand::RejectCall { peer_id } => self.reject_call(&peer_id).await,
            ClientCommand::EndCall => self.end_call().await,
            ClientCommand::Shutdown => Ok(()),
        }
    }

    /// Processes inbound events, peer-connection events and commands until
    /// the event stream closes or a `Shutdown` command arrives.
    pub async fn run(
        mut self,
        mut inbound: mpsc::UnboundedReceiver<InboundEvent>,
        mut commands: mpsc::UnboundedReceiver<ClientCommand>,
    ) {
        loop {
            tokio::select! {
                event = inbound.recv() => match event {
                    Some(event) => self.handle_inbound(event).await,
                    None => {
                        warn!("chat: event channel closed");
                        self.publish(ClientEvent::Disconnected);
                        break;
                    }
                },
                Some(signal) = self.peer_signals.recv() => self.handle_peer_signal(signal).await,
                command = commands.recv() => match command {
                    Some(ClientCommand::Shutdown) | None => break,
                    Some(command) => {
                        if let Err(err) = self.execute(command).await {
                            self.publish(ClientEvent::Error(err));
                        }
                    }
                },
            }
        }

        if self.call.status() != CallStatus::Idle {
            let _ = self.call.end().await;
        }
        info!("chat: client stopped");
    }

    fn on_list_update(&mut self, update: &ChatUpdated) {
        if let ListChange::Inserted(conversation_id) = self.list.apply_update(update) {
            if let Some(identifier) = self.pending_new_conversation.take() {
                info!(%conversation_id, identifier = %identifier, "chat: conversation started");
                self.publish(ClientEvent::ConversationStarted { conversation_id });
            }
        }
        self.publish(ClientEvent::ConversationsUpdated(self.list.summaries().to_vec()));
    }

    async fn on_conversation_update(&mut self, update: &ChatUpdated) {
        let Some(confirmation) = self.conversation.on_confirmed(update).await else {
            return;
        };
        self.publish_conversation();
        if let Some(receipt) = confirmation.read_receipt {
            self.apply_read_receipt(receipt);
        }
    }

    async fn dispatch_call(&mut self, event: &InboundEvent) {
        match event {
            InboundEvent::IncomingCall(incoming) => self.call.on_incoming_call(incoming),
            InboundEvent::Offer(offer) => self.call.on_offer(offer).await,
            InboundEvent::Answer(answer) => self.call.on_answer(answer).await,
            InboundEvent::IceCandidate(candidate) => self.call.on_candidate(candidate).await,
            InboundEvent::CallEnded(ended) => self.call.on_call_ended(&ended.sender_id).await,
            InboundEvent::CallRejected(rejected) => {
                self.call.on_call_rejected(&rejected.rejecter_id).await
            }
            InboundEvent::ChatUpdated(_) | InboundEvent::Error(_) => {}
        }
    }

    fn apply_read_receipt(&mut self, receipt: ReadReceipt) {
        if self.list.clear_unread(&receipt.conversation_id) {
            self.publish(ClientEvent::ConversationsUpdated(self.list.summaries().to_vec()));
        }
        self.publish(ClientEvent::MessagesRead {
            conversation_id: receipt.conversation_id,
        });
    }

    fn publish_conversation(&self) {
        let (Some(conversation_id), Some(partner)) = (
            self.conversation.open_conversation_id(),
            self.conversation.partner(),
        ) else {
            return;
        };
        self.publish(ClientEvent::ConversationUpdated {
            conversation_id: conversation_id.clone(),
            partner: partner.clone(),
            messages: self.conversation.messages(),
        });
    }

    fn publish(&self, event: ClientEvent) {
        let _ = self.events.send(event);
    }
}

#[cfg(test)]
#[path = "tests/client_tests.rs"]
mod tests;
