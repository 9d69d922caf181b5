//! Per-session playback queue control for JamCast.
//!
//! One session pairs one streaming transport with one queue and one player.
//! [`QueueController`] is the state machine in the middle: it sequences
//! tracks, survives transport drops with graduated rejoin backoff, and
//! leaves quietly after a configured idle period. [`SessionRegistry`] owns
//! the live controllers.
//!
//! The transport, the player's audio pipeline, and the chat surface stay
//! behind the capability traits in [`capabilities`]; this crate ships a
//! default player state machine ([`SessionPlayer`]) and a log-only notifier.

pub mod capabilities;
pub mod controller;
pub mod errors;
pub mod events;
pub mod model;
pub mod player;
pub mod queue;
pub mod registry;
pub mod track;

pub use capabilities::{AudioPlayer, LogNotifier, NoticeHandle, Notifier, StreamTransport};
pub use controller::{ControllerSettings, FATAL_CLOSE_CODE, QueueController};
pub use errors::SessionError;
pub use events::SessionEventBus;
pub use model::{
    DisconnectInfo, PlayerEvent, PlayerState, SessionEvent, SessionId, TransportState,
    TransportStateChange,
};
pub use player::SessionPlayer;
pub use queue::TrackQueue;
pub use registry::SessionRegistry;
pub use track::{PlayableItem, Resource, TrackMetadata};
