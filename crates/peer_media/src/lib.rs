use std::sync::Arc;

use anyhow::anyhow;
use async_trait::async_trait;
use shared::protocol::{IceCandidate, SessionDescription};
use tokio::sync::broadcast;

pub const DEFAULT_ICE_SERVER: &str = "stun:stun.l.google.com:19302";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerConnectionConfig {
    pub ice_servers: Vec<String>,
}

impl Default for PeerConnectionConfig {
    fn default() -> Self {
        Self {
            ice_servers: vec![DEFAULT_ICE_SERVER.to_string()],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MediaConstraints {
    pub audio: bool,
    pub video: bool,
}

impl MediaConstraints {
    pub fn audio_video() -> Self {
        Self {
            audio: true,
            video: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackKind {
    Audio,
    Video,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalTrack {
    pub track_id: String,
    pub kind: TrackKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteTrack {
    pub track_id: String,
    pub kind: TrackKind,
    pub stream_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl ConnectionState {
    /// States after which the connection can no longer carry the call.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Disconnected | Self::Failed | Self::Closed)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerConnectionEvent {
    LocalCandidate(IceCandidate),
    StateChanged(ConnectionState),
    RemoteTrack(RemoteTrack),
}

/// Captured camera/microphone stream owned by the active call.
#[async_trait]
pub trait LocalMediaStream: Send + Sync {
    fn tracks(&self) -> Vec<LocalTrack>;
    async fn stop(&self);
}

#[async_trait]
pub trait MediaDevices: Send + Sync {
    async fn acquire(&self, constraints: MediaConstraints)
        -> anyhow::Result<Arc<dyn LocalMediaStream>>;
}

#[async_trait]
pub trait PeerConnection: Send + Sync {
    async fn add_local_stream(&self, stream: Arc<dyn LocalMediaStream>) -> anyhow::Result<()>;
    async fn create_offer(&self) -> anyhow::Result<SessionDescription>;
    async fn create_answer(&self) -> anyhow::Result<SessionDescription>;
    async fn set_local_description(&self, description: SessionDescription)
        -> anyhow::Result<()>;
    async fn set_remote_description(
        &self,
        description: SessionDescription,
    ) -> anyhow::Result<()>;
    async fn add_ice_candidate(&self, candidate: IceCandidate) -> anyhow::Result<()>;
    async fn close(&self) -> anyhow::Result<()>;
    fn subscribe_events(&self) -> broadcast::Receiver<PeerConnectionEvent>;
}

#[async_trait]
pub trait PeerConnectionFactory: Send + Sync {
    async fn create(&self, config: PeerConnectionConfig)
        -> anyhow::Result<Arc<dyn PeerConnection>>;
}

pub struct MissingMediaDevices;

#[async_trait]
impl MediaDevices for MissingMediaDevices {
    async fn acquire(
        &self,
        _constraints: MediaConstraints,
    ) -> anyhow::Result<Arc<dyn LocalMediaStream>> {
        Err(anyhow!("no media devices available"))
    }
}

pub struct MissingPeerConnectionFactory;

#[async_trait]
impl PeerConnectionFactory for MissingPeerConnectionFactory {
    async fn create(
        &self,
        _config: PeerConnectionConfig,
    ) -> anyhow::Result<Arc<dyn PeerConnection>> {
        Err(anyhow!("peer connection backend is unavailable"))
    }
}
