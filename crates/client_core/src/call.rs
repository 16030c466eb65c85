//! Call negotiation state machine.
//!
//! A [`CallSession`] exists from the first call intent (local start or an
//! inbound signal) until the call ends; `Idle` means no session. A remote
//! offer is answered as soon as it applies; accepting only attaches local
//! media. Remote candidates are queued on the session until a remote
//! description has been applied, then drained once in arrival order.
//!
//! Peer-connection events are forwarded by a spawned task into the client's
//! queue, tagged with the generation of the session that created them. Every
//! teardown bumps the generation, so events from a dead connection are dropped.

use std::{collections::VecDeque, fmt, sync::Arc};

use peer_media::{
    ConnectionState, LocalMediaStream, MediaConstraints, MediaDevices, PeerConnection,
    PeerConnectionConfig, PeerConnectionEvent, PeerConnectionFactory,
};
use shared::{
    domain::UserId,
    protocol::{
        CallTarget, IceCandidate, IncomingCall, LocalAnswer, LocalCandidate, LocalOffer,
        OutboundEvent, RejectCall, RemoteAnswer, RemoteCandidate, RemoteOffer, SessionDescription,
    },
};
use tokio::{
    sync::{broadcast, mpsc},
    task::JoinHandle,
};
use tracing::{debug, info, warn};

use crate::{channel::EventEmitter, error::ClientError, events::ClientEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallStatus {
    Idle,
    Calling,
    Incoming,
    InCall,
    /// Only ever reported as a transition; the resting state is `Idle`.
    Ended,
}

impl fmt::Display for CallStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Idle => "idle",
            Self::Calling => "calling",
            Self::Incoming => "incoming",
            Self::InCall => "in-call",
            Self::Ended => "ended",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallEndReason {
    LocalHangup,
    PeerEnded,
    PeerRejected,
    ConnectionFailed,
    SignalingFailure,
    MediaFailure,
}

/// A peer-connection event tagged with the session generation it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerSignal {
    pub generation: u64,
    pub event: PeerConnectionEvent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Calling,
    Incoming,
    InCall,
}

struct CallSession {
    peer_id: UserId,
    phase: Phase,
    /// Local media has been attached.
    accepted: bool,
    generation: u64,
    connection: Option<Arc<dyn PeerConnection>>,
    media: Option<Arc<dyn LocalMediaStream>>,
    forwarder: Option<JoinHandle<()>>,
    remote_description_set: bool,
    pending_candidates: VecDeque<IceCandidate>,
}

impl CallSession {
    fn new(peer_id: UserId, phase: Phase, generation: u64) -> Self {
        Self {
            peer_id,
            phase,
            accepted: false,
            generation,
            connection: None,
            media: None,
            forwarder: None,
            remote_description_set: false,
            pending_candidates: VecDeque::new(),
        }
    }

    fn status(&self) -> CallStatus {
        match self.phase {
            Phase::Calling => CallStatus::Calling,
            Phase::Incoming => CallStatus::Incoming,
            Phase::InCall => CallStatus::InCall,
        }
    }
}

pub struct CallNegotiator {
    emitter: EventEmitter,
    media_devices: Arc<dyn MediaDevices>,
    peer_connections: Arc<dyn PeerConnectionFactory>,
    config: PeerConnectionConfig,
    events: broadcast::Sender<ClientEvent>,
    peer_signals: mpsc::UnboundedSender<PeerSignal>,
    generation: u64,
    session: Option<CallSession>,
}

impl CallNegotiator {
    pub fn new(
        emitter: EventEmitter,
        media_devices: Arc<dyn MediaDevices>,
        peer_connections: Arc<dyn PeerConnectionFactory>,
        config: PeerConnectionConfig,
        events: broadcast::Sender<ClientEvent>,
        peer_signals: mpsc::UnboundedSender<PeerSignal>,
    ) -> Self {
        Self {
            emitter,
            media_devices,
            peer_connections,
            config,
            events,
            peer_signals,
            generation: 0,
            session: None,
        }
    }

    pub fn status(&self) -> CallStatus {
        self.session
            .as_ref()
            .map(CallSession::status)
            .unwrap_or(CallStatus::Idle)
    }

    pub fn peer_id(&self) -> Option<&UserId> {
        self.session.as_ref().map(|session| &session.peer_id)
    }

    pub fn current_generation(&self) -> u64 {
        self.generation
    }

    pub fn pending_candidate_count(&self) -> usize {
        self.session
            .as_ref()
            .map(|session| session.pending_candidates.len())
            .unwrap_or_default()
    }

    pub async fn start(&mut self, peer_id: UserId) -> Result<(), ClientError> {
        if self.session.is_some() {
            return Err(self.invalid("start a call"));
        }

        let media = self
            .media_devices
            .acquire(MediaConstraints::audio_video())
            .await
            .map_err(|err| {
                warn!(peer_id = %peer_id, "call: media acquisition failed: {err:#}");
                ClientError::MediaAccessDenied(format!("{err:#}"))
            })?;

        self.open_session(peer_id.clone(), Phase::Calling);
        if let Some(session) = self.session.as_mut() {
            session.media = Some(Arc::clone(&media));
            session.accepted = true;
        }

        let offer = match self.prepare_offer(media).await {
            Ok(offer) => offer,
            Err(err) => {
                self.teardown(CallEndReason::SignalingFailure).await;
                return Err(err);
            }
        };

        let emitted = self
            .emitter
            .emit(OutboundEvent::StartCall(CallTarget {
                recipient_id: peer_id.clone(),
            }))
            .and_then(|()| {
                self.emitter.emit(OutboundEvent::Offer(LocalOffer {
                    recipient_id: peer_id.clone(),
                    offer,
                }))
            });
        if let Err(err) = emitted {
            self.teardown(CallEndReason::SignalingFailure).await;
            return Err(err);
        }

        info!(peer_id = %peer_id, "call: calling");
        self.publish(ClientEvent::CallStatusChanged(CallStatus::Calling));
        Ok(())
    }

    async fn prepare_offer(
        &mut self,
        media: Arc<dyn LocalMediaStream>,
    ) -> Result<SessionDescription, ClientError> {
        let connection = self.ensure_connection().await?;
        connection
            .add_local_stream(media)
            .await
            .map_err(|err| ClientError::signaling("attach local media", format!("{err:#}")))?;
        let offer = connection
            .create_offer()
            .await
            .map_err(|err| ClientError::signaling("create offer", format!("{err:#}")))?;
        connection
            .set_local_description(offer.clone())
            .await
            .map_err(|err| ClientError::signaling("set local offer", format!("{err:#}")))?;
        Ok(offer)
    }

    /// Acquires local media for an inbound call and attaches it. Valid while
    /// ringing, or after the remote offer was already answered.
    pub async fn accept(&mut self) -> Result<(), ClientError> {
        let Some(session) = self.session.as_ref() else {
            return Err(self.invalid("accept a call"));
        };
        if session.phase == Phase::Calling || session.accepted {
            return Err(self.invalid("accept a call"));
        }
        let peer_id = session.peer_id.clone();
        let ringing = session.phase == Phase::Incoming;

        let media = match self
            .media_devices
            .acquire(MediaConstraints::audio_video())
            .await
        {
            Ok(media) => media,
            Err(err) => {
                warn!(peer_id = %peer_id, "call: media acquisition failed: {err:#}");
                let notice = if ringing {
                    OutboundEvent::RejectCall(RejectCall {
                        caller_id: peer_id,
                    })
                } else {
                    OutboundEvent::EndCall(CallTarget {
                        recipient_id: peer_id,
                    })
                };
                if let Err(err) = self.emitter.emit(notice) {
                    warn!("call: could not notify peer of declined call: {err}");
                }
                self.teardown(CallEndReason::MediaFailure).await;
                return Err(ClientError::MediaAccessDenied(format!("{err:#}")));
            }
        };
        if let Some(session) = self.session.as_mut() {
            session.media = Some(Arc::clone(&media));
        }

        let attached = match self.ensure_connection().await {
            Ok(connection) => connection
                .add_local_stream(media)
                .await
                .map_err(|err| ClientError::signaling("attach local media", format!("{err:#}"))),
            Err(err) => Err(err),
        };
        if let Err(err) = attached {
            self.teardown(CallEndReason::SignalingFailure).await;
            return Err(err);
        }

        if let Some(session) = self.session.as_mut() {
            session.accepted = true;
        }
        info!(peer_id = %peer_id, ringing, "call: accepted");
        Ok(())
    }

    pub async fn reject(&mut self, peer_id: &UserId) -> Result<(), ClientError> {
        match self.session.as_ref() {
            Some(session)
                if session.phase == Phase::Incoming && &session.peer_id == peer_id => {}
            _ => return Err(self.invalid("reject a call")),
        }
        let emitted = self.emitter.emit(OutboundEvent::RejectCall(RejectCall {
            caller_id: peer_id.clone(),
        }));
        if let Err(err) = &emitted {
            warn!("call: could not notify caller of rejection: {err}");
        }
        info!(peer_id = %peer_id, "call: rejected");
        self.teardown(CallEndReason::LocalHangup).await;
        emitted
    }

    pub async fn end(&mut self) -> Result<(), ClientError> {
        let Some(session) = self.session.as_ref() else {
            return Err(self.invalid("end a call"));
        };
        let emitted = self.emitter.emit(OutboundEvent::EndCall(CallTarget {
            recipient_id: session.peer_id.clone(),
        }));
        if let Err(err) = &emitted {
            warn!("call: could not notify peer of hangup: {err}");
        }
        self.teardown(CallEndReason::LocalHangup).await;
        emitted
    }

    pub fn on_incoming_call(&mut self, incoming: &IncomingCall) {
        match self.session.as_mut() {
            None => {
                self.open_session(incoming.caller_id.clone(), Phase::Incoming);
                info!(caller_id = %incoming.caller_id, "call: incoming");
                self.publish(ClientEvent::IncomingCall {
                    caller_id: incoming.caller_id.clone(),
                    caller_name: incoming.caller_name.clone(),
                });
                self.publish(ClientEvent::CallStatusChanged(CallStatus::Incoming));
            }
            Some(session)
                if session.peer_id == incoming.caller_id
                    && session.phase == Phase::Incoming =>
            {
                debug!(caller_id = %incoming.caller_id, "call: duplicate incoming call");
            }
            Some(session) => {
                info!(
                    caller_id = %incoming.caller_id,
                    status = %session.status(),
                    "call: ignoring incoming call while busy"
                );
            }
        }
    }

    pub async fn on_offer(&mut self, offer: &RemoteOffer) {
        if self.session.is_none() {
            self.on_incoming_call(&IncomingCall {
                caller_id: offer.caller_id.clone(),
                caller_name: None,
            });
        }
        let Some(session) = self.active_session_for(&offer.caller_id, "offer") else {
            return;
        };
        if session.phase != Phase::Incoming || session.remote_description_set {
            let status = session.status();
            self.fail_signaling(format!("unexpected offer while {status}"))
                .await;
            return;
        }

        if let Err(err) = self.apply_remote(offer.offer.clone()).await {
            self.fail_with(err).await;
            return;
        }
        debug!(caller_id = %offer.caller_id, "call: remote offer applied");
        if let Err(err) = self.answer().await {
            self.publish(ClientEvent::Error(err));
            return;
        }
        self.drain_candidates().await;
    }

    pub async fn on_answer(&mut self, answer: &RemoteAnswer) {
        let Some(session) = self.active_session_for(&answer.answerer_id, "answer") else {
            return;
        };
        if session.phase != Phase::Calling || session.remote_description_set {
            let status = session.status();
            self.fail_signaling(format!("unexpected answer while {status}"))
                .await;
            return;
        }

        if let Err(err) = self.apply_remote(answer.answer.clone()).await {
            self.fail_with(err).await;
            return;
        }
        self.enter_in_call();
        self.drain_candidates().await;
    }

    pub async fn on_candidate(&mut self, remote: &RemoteCandidate) {
        let Some(session) = self.active_session_for(&remote.sender_id, "iceCandidate") else {
            return;
        };
        if !session.remote_description_set {
            session.pending_candidates.push_back(remote.candidate.clone());
            debug!(
                buffered = session.pending_candidates.len(),
                "call: candidate buffered"
            );
            return;
        }
        if let Some(connection) = session.connection.clone() {
            if let Err(err) = connection.add_ice_candidate(remote.candidate.clone()).await {
                warn!("call: failed to add remote candidate: {err:#}");
            }
        }
    }

    pub async fn on_call_ended(&mut self, peer_id: &UserId) {
        if self.active_session_for(peer_id, "callEnded").is_some() {
            info!(peer_id = %peer_id, "call: ended by peer");
            self.teardown(CallEndReason::PeerEnded).await;
        }
    }

    pub async fn on_call_rejected(&mut self, peer_id: &UserId) {
        if self.active_session_for(peer_id, "callRejected").is_some() {
            info!(peer_id = %peer_id, "call: rejected by peer");
            self.teardown(CallEndReason::PeerRejected).await;
        }
    }

    /// A server error only aborts an outgoing call that has not connected.
    /// Returns whether the call was torn down.
    pub async fn on_server_error(&mut self, message: &str) -> bool {
        if self.status() != CallStatus::Calling {
            return false;
        }
        warn!("call: server rejected call setup: {message}");
        self.teardown(CallEndReason::SignalingFailure).await;
        true
    }

    pub async fn on_peer_event(&mut self, signal: PeerSignal) {
        let Some(session) = self
            .session
            .as_ref()
            .filter(|session| session.generation == signal.generation)
        else {
            debug!(
                generation = signal.generation,
                current = self.generation,
                "call: dropping stale peer event"
            );
            return;
        };
        let peer_id = session.peer_id.clone();

        match signal.event {
            PeerConnectionEvent::LocalCandidate(candidate) => {
                if let Err(err) = self.emitter.emit(OutboundEvent::IceCandidate(LocalCandidate {
                    recipient_id: peer_id,
                    candidate,
                })) {
                    warn!("call: could not send local candidate: {err}");
                }
            }
            PeerConnectionEvent::StateChanged(state) if state.is_terminal() => {
                info!(peer_id = %peer_id, ?state, "call: connection lost");
                self.teardown(CallEndReason::ConnectionFailed).await;
            }
            PeerConnectionEvent::StateChanged(ConnectionState::Connected) => {
                self.enter_in_call();
            }
            PeerConnectionEvent::StateChanged(state) => {
                debug!(?state, "call: connection state");
            }
            PeerConnectionEvent::RemoteTrack(track) => {
                debug!(track_id = %track.track_id, "call: remote track");
                self.publish(ClientEvent::RemoteTrackAdded { peer_id, track });
            }
        }
    }

    async fn answer(&mut self) -> Result<(), ClientError> {
        let Some((peer_id, connection)) = self.session.as_ref().and_then(|session| {
            session
                .connection
                .clone()
                .map(|connection| (session.peer_id.clone(), connection))
        }) else {
            return Err(ClientError::signaling("answer", "no peer connection"));
        };

        let answer = match create_answer(connection.as_ref()).await {
            Ok(answer) => answer,
            Err(err) => {
                self.teardown(CallEndReason::SignalingFailure).await;
                return Err(err);
            }
        };
        if let Err(err) = self.emitter.emit(OutboundEvent::Answer(LocalAnswer {
            caller_id: peer_id,
            answer,
        })) {
            self.teardown(CallEndReason::SignalingFailure).await;
            return Err(err);
        }
        self.enter_in_call();
        Ok(())
    }

    async fn apply_remote(&mut self, description: SessionDescription) -> Result<(), ClientError> {
        let connection = self.ensure_connection().await?;
        connection
            .set_remote_description(description)
            .await
            .map_err(|err| ClientError::signaling("apply remote description", format!("{err:#}")))?;
        if let Some(session) = self.session.as_mut() {
            session.remote_description_set = true;
        }
        Ok(())
    }

    /// Applies candidates that arrived before the remote description, in
    /// arrival order, and empties the buffer.
    async fn drain_candidates(&mut self) {
        let Some((connection, buffered)) = self.session.as_mut().and_then(|session| {
            let connection = session.connection.clone()?;
            Some((connection, std::mem::take(&mut session.pending_candidates)))
        }) else {
            return;
        };
        if !buffered.is_empty() {
            debug!(count = buffered.len(), "call: draining buffered candidates");
        }
        for candidate in buffered {
            if let Err(err) = connection.add_ice_candidate(candidate).await {
                warn!("call: failed to add buffered candidate: {err:#}");
            }
        }
    }

    async fn ensure_connection(&mut self) -> Result<Arc<dyn PeerConnection>, ClientError> {
        let Some(session) = self.session.as_ref() else {
            return Err(ClientError::signaling("connect", "no active call"));
        };
        if let Some(connection) = &session.connection {
            return Ok(Arc::clone(connection));
        }
        let generation = session.generation;

        let connection = self
            .peer_connections
            .create(self.config.clone())
            .await
            .map_err(|err| ClientError::signaling("create peer connection", format!("{err:#}")))?;
        let forwarder = spawn_forwarder(&connection, generation, self.peer_signals.clone());

        match self.session.as_mut() {
            Some(session) => {
                session.connection = Some(Arc::clone(&connection));
                session.forwarder = Some(forwarder);
            }
            None => forwarder.abort(),
        }
        Ok(connection)
    }

    fn open_session(&mut self, peer_id: UserId, phase: Phase) {
        self.generation = self.generation.wrapping_add(1);
        self.session = Some(CallSession::new(peer_id, phase, self.generation));
    }

    fn enter_in_call(&mut self) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        if session.phase == Phase::InCall {
            return;
        }
        session.phase = Phase::InCall;
        info!(peer_id = %session.peer_id, "call: in call");
        self.publish(ClientEvent::CallStatusChanged(CallStatus::InCall));
    }

    /// The session if `peer_id` is its peer. Signals from anyone else are
    /// logged and dropped.
    fn active_session_for(&mut self, peer_id: &UserId, signal: &str) -> Option<&mut CallSession> {
        match self.session.as_mut() {
            Some(session) if &session.peer_id == peer_id => Some(session),
            Some(session) => {
                info!(
                    signal,
                    from = %peer_id,
                    active = %session.peer_id,
                    "call: ignoring signal from non-active peer"
                );
                None
            }
            None => {
                debug!(signal, from = %peer_id, "call: ignoring signal while idle");
                None
            }
        }
    }

    async fn fail_signaling(&mut self, reason: String) {
        self.fail_with(ClientError::SignalingApplyFailure(reason))
            .await;
    }

    async fn fail_with(&mut self, err: ClientError) {
        warn!("call: {err}");
        self.teardown(CallEndReason::SignalingFailure).await;
        self.publish(ClientEvent::Error(err));
    }

    /// Releases everything the session owns and returns to idle.
    async fn teardown(&mut self, reason: CallEndReason) {
        let Some(session) = self.session.take() else {
            return;
        };
        self.generation = self.generation.wrapping_add(1);

        if let Some(forwarder) = session.forwarder {
            forwarder.abort();
        }
        if let Some(media) = session.media {
            media.stop().await;
        }
        if let Some(connection) = session.connection {
            if let Err(err) = connection.close().await {
                warn!("call: failed to close peer connection: {err:#}");
            }
        }
        info!(peer_id = %session.peer_id, ?reason, "call: ended");

        self.publish(ClientEvent::CallEnded {
            peer_id: session.peer_id,
            reason,
        });
        self.publish(ClientEvent::CallStatusChanged(CallStatus::Ended));
        self.publish(ClientEvent::CallStatusChanged(CallStatus::Idle));
    }

    fn invalid(&self, operation: &'static str) -> ClientError {
        let status = self.status();
        debug!(operation, %status, "call: invalid transition");
        ClientError::InvalidCallTransition { operation, status }
    }

    fn publish(&self, event: ClientEvent) {
        let _ = self.events.send(event);
    }
}

async fn create_answer(connection: &dyn PeerConnection) -> Result<SessionDescription, ClientError> {
    let answer = connection
        .create_answer()
        .await
        .map_err(|err| ClientError::signaling("create answer", format!("{err:#}")))?;
    connection
        .set_local_description(answer.clone())
        .await
        .map_err(|err| ClientError::signaling("set local answer", format!("{err:#}")))?;
    Ok(answer)
}

fn spawn_forwarder(
    connection: &Arc<dyn PeerConnection>,
    generation: u64,
    signals: mpsc::UnboundedSender<PeerSignal>,
) -> JoinHandle<()> {
    let mut events = connection.subscribe_events();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => {
                    if signals.send(PeerSignal { generation, event }).is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "call: peer event forwarder lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

#[cfg(test)]
#[path = "tests/call_tests.rs"]
mod tests;
