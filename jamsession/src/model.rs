use std::fmt;

use crate::track::TrackMetadata;

/// Identifier of one playback session (one transport + one queue + one player).
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Self {
        SessionId(id.into())
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lifecycle states reported by the streaming transport.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransportState {
    Signalling,
    Connecting,
    Ready,
    Disconnected,
    Destroyed,
}

impl fmt::Display for TransportState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransportState::Signalling => "Signalling",
            TransportState::Connecting => "Connecting",
            TransportState::Ready => "Ready",
            TransportState::Disconnected => "Disconnected",
            TransportState::Destroyed => "Destroyed",
        };
        f.write_str(name)
    }
}

/// Details attached to a transition into [`TransportState::Disconnected`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DisconnectInfo {
    /// Close code of the underlying connection, when one was received.
    pub close_code: Option<u16>,
    /// True when the connection dropped without a clean close handshake.
    pub abrupt: bool,
}

/// Event emitted on the transport state stream.
#[derive(Clone, Debug)]
pub struct TransportStateChange {
    pub from: TransportState,
    pub to: TransportState,
    /// Populated only for transitions into `Disconnected`.
    pub disconnect: Option<DisconnectInfo>,
}

/// States of the single-slot player.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PlayerState {
    Idle,
    Buffering,
    Playing,
    Paused,
    /// Paused by the pipeline because the transport has no subscribers.
    AutoPaused,
}

impl fmt::Display for PlayerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PlayerState::Idle => "Idle",
            PlayerState::Buffering => "Buffering",
            PlayerState::Playing => "Playing",
            PlayerState::Paused => "Paused",
            PlayerState::AutoPaused => "AutoPaused",
        };
        f.write_str(name)
    }
}

/// Event emitted on the player stream.
#[derive(Clone, Debug)]
pub enum PlayerEvent {
    StateChanged {
        from: PlayerState,
        to: PlayerState,
    },
    /// The active track failed. The player slot is already back to Idle
    /// when this is observed; no separate StateChanged event follows.
    TrackError {
        message: String,
    },
}

/// Session-level events broadcast to outer layers (UI, metrics, relays).
#[derive(Clone, Debug)]
pub enum SessionEvent {
    TrackStarted {
        id: SessionId,
        track: TrackMetadata,
    },
    TrackFinished {
        id: SessionId,
    },
    QueueUpdated {
        id: SessionId,
        queue_length: usize,
    },
    SessionClosed {
        id: SessionId,
    },
}
