//! Collaborator contracts consumed by the queue controller.
//!
//! The controller never talks to a concrete transport, player, or chat
//! surface. It drives these capability traits so that every backend (and
//! every test double) plugs in behind the same seams.

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::errors::SessionError;
use crate::model::{PlayerEvent, PlayerState, TransportState, TransportStateChange};
use crate::track::Resource;

/// The streaming connection produced audio is sent over.
///
/// The transport owns its connection lifecycle; the controller only observes
/// state changes and may request a rejoin or a teardown.
#[async_trait]
pub trait StreamTransport: Send + Sync {
    /// Current lifecycle state.
    fn state(&self) -> TransportState;

    /// Rejoin attempts performed since the last successful join.
    fn rejoin_attempts(&self) -> u32;

    /// Listening humans on the far side of the connection. The session
    /// itself does not count.
    fn audience(&self) -> usize;

    /// Requests a reconnection of the underlying session.
    async fn rejoin(&self) -> Result<(), SessionError>;

    /// Tears the connection down. Idempotent.
    async fn destroy(&self) -> Result<(), SessionError>;

    /// Subscribes to the transport state stream.
    fn subscribe(&self) -> broadcast::Receiver<TransportStateChange>;
}

/// The single-slot player a session feeds resources to.
#[async_trait]
pub trait AudioPlayer: Send + Sync {
    /// Current player state.
    fn state(&self) -> PlayerState;

    /// Hands a resource to the player, replacing whatever is in the slot.
    async fn play(&self, resource: Resource) -> Result<(), SessionError>;

    /// Forces the player back to Idle, discarding the slot.
    async fn stop(&self) -> Result<(), SessionError>;

    /// Pauses the active track.
    async fn pause(&self) -> Result<(), SessionError>;

    /// Resumes a paused track.
    async fn resume(&self) -> Result<(), SessionError>;

    /// Subscribes to the player event stream (state changes and errors).
    fn subscribe(&self) -> broadcast::Receiver<PlayerEvent>;
}

/// Opaque handle to a notice previously sent through a [`Notifier`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NoticeHandle(pub u64);

/// Outbound notice port for session announcements.
///
/// Everything sent through this port is best-effort: the controller logs
/// failures and carries on; playback control flow never depends on a notice
/// being delivered or deleted.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Sends a text notice, returning a handle usable for later deletion.
    async fn send(&self, text: &str) -> Result<NoticeHandle, SessionError>;

    /// Deletes a previously sent notice.
    async fn delete(&self, notice: NoticeHandle) -> Result<(), SessionError>;
}

/// Notifier that writes notices to the log and forgets them.
///
/// Useful as a default wiring when a session has no chat surface attached.
#[derive(Debug, Default, Clone)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, text: &str) -> Result<NoticeHandle, SessionError> {
        tracing::info!(notice = text, "session notice");
        Ok(NoticeHandle(0))
    }

    async fn delete(&self, _notice: NoticeHandle) -> Result<(), SessionError> {
        Ok(())
    }
}
