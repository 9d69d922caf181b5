//! Default single-slot player implementation.
//!
//! [`SessionPlayer`] is the state machine half of a player: it validates
//! transitions, tracks the active resource slot, and emits events for every
//! change. The audio pipeline behind it is external; it drives the machine
//! through the `mark_*` methods while the controller drives it through the
//! [`AudioPlayer`] commands.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::capabilities::AudioPlayer;
use crate::errors::SessionError;
use crate::model::{PlayerEvent, PlayerState};
use crate::track::Resource;

/// Capacity of the player event channel. Lagging receivers lose events.
const EVENT_CHANNEL_CAPACITY: usize = 64;

struct PlayerInner {
    state: PlayerState,
    slot: Option<Resource>,
}

/// Command-driven single-slot player state machine.
pub struct SessionPlayer {
    inner: Mutex<PlayerInner>,
    events: broadcast::Sender<PlayerEvent>,
}

impl SessionPlayer {
    pub fn new() -> Arc<Self> {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Arc::new(SessionPlayer {
            inner: Mutex::new(PlayerInner {
                state: PlayerState::Idle,
                slot: None,
            }),
            events,
        })
    }

    /// Resource currently in the slot, if any.
    pub fn current(&self) -> Option<Resource> {
        self.inner.lock().expect("Player mutex poisoned").slot.clone()
    }

    fn emit(&self, event: PlayerEvent) {
        // Nobody listening is fine; the send error only means that.
        let _ = self.events.send(event);
    }

    /// Applies a validated transition, emitting a state-change event.
    fn transition(
        &self,
        command: &str,
        allowed_from: &[PlayerState],
        to: PlayerState,
        slot: Option<Option<Resource>>,
    ) -> Result<(), SessionError> {
        let from = {
            let mut inner = self.inner.lock().expect("Player mutex poisoned");
            if !allowed_from.contains(&inner.state) {
                return Err(SessionError::player_command(command, inner.state));
            }
            let from = inner.state;
            inner.state = to;
            if let Some(slot) = slot {
                inner.slot = slot;
            }
            from
        };
        if from != to {
            self.emit(PlayerEvent::StateChanged { from, to });
        }
        Ok(())
    }

    // =========================================================================
    // Pipeline-side markers
    // =========================================================================

    /// The pipeline started producing audio for the buffered resource.
    pub fn mark_playing(&self) -> Result<(), SessionError> {
        self.transition(
            "mark_playing",
            &[PlayerState::Buffering],
            PlayerState::Playing,
            None,
        )
    }

    /// The pipeline paused itself because the transport has no subscribers.
    pub fn mark_auto_paused(&self) -> Result<(), SessionError> {
        self.transition(
            "mark_auto_paused",
            &[PlayerState::Playing],
            PlayerState::AutoPaused,
            None,
        )
    }

    /// The active track played to completion.
    pub fn mark_finished(&self) -> Result<(), SessionError> {
        self.transition(
            "mark_finished",
            &[
                PlayerState::Buffering,
                PlayerState::Playing,
                PlayerState::Paused,
                PlayerState::AutoPaused,
            ],
            PlayerState::Idle,
            Some(None),
        )
    }

    /// The active track failed.
    ///
    /// Emits a single [`PlayerEvent::TrackError`]; the slot is cleared and
    /// the state returns to Idle without a separate state-change event, so
    /// observers do not mistake the failure for a normal completion.
    pub fn fail(&self, message: impl ToString) {
        {
            let mut inner = self.inner.lock().expect("Player mutex poisoned");
            inner.state = PlayerState::Idle;
            inner.slot = None;
        }
        self.emit(PlayerEvent::TrackError {
            message: message.to_string(),
        });
    }
}

#[async_trait]
impl AudioPlayer for SessionPlayer {
    fn state(&self) -> PlayerState {
        self.inner.lock().expect("Player mutex poisoned").state
    }

    async fn play(&self, resource: Resource) -> Result<(), SessionError> {
        self.transition(
            "play",
            &[
                PlayerState::Idle,
                PlayerState::Buffering,
                PlayerState::Playing,
                PlayerState::Paused,
                PlayerState::AutoPaused,
            ],
            PlayerState::Buffering,
            Some(Some(resource)),
        )
    }

    async fn stop(&self) -> Result<(), SessionError> {
        // Stopping an idle player is a no-op, not an error.
        if self.state() == PlayerState::Idle {
            return Ok(());
        }
        self.transition(
            "stop",
            &[
                PlayerState::Buffering,
                PlayerState::Playing,
                PlayerState::Paused,
                PlayerState::AutoPaused,
            ],
            PlayerState::Idle,
            Some(None),
        )
    }

    async fn pause(&self) -> Result<(), SessionError> {
        self.transition("pause", &[PlayerState::Playing], PlayerState::Paused, None)
    }

    async fn resume(&self) -> Result<(), SessionError> {
        self.transition(
            "resume",
            &[PlayerState::Paused, PlayerState::AutoPaused],
            PlayerState::Playing,
            None,
        )
    }

    fn subscribe(&self) -> broadcast::Receiver<PlayerEvent> {
        self.events.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::track::TrackMetadata;

    fn resource() -> Resource {
        Resource::new(TrackMetadata::new("t"))
    }

    #[tokio::test]
    async fn play_buffers_and_emits() {
        let player = SessionPlayer::new();
        let mut rx = player.subscribe();

        player.play(resource()).await.unwrap();
        assert_eq!(player.state(), PlayerState::Buffering);
        assert!(player.current().is_some());

        match rx.try_recv().unwrap() {
            PlayerEvent::StateChanged { from, to } => {
                assert_eq!(from, PlayerState::Idle);
                assert_eq!(to, PlayerState::Buffering);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn full_track_lifecycle() {
        let player = SessionPlayer::new();
        player.play(resource()).await.unwrap();
        player.mark_playing().unwrap();
        assert_eq!(player.state(), PlayerState::Playing);
        player.mark_finished().unwrap();
        assert_eq!(player.state(), PlayerState::Idle);
        assert!(player.current().is_none());
    }

    #[tokio::test]
    async fn pause_only_from_playing() {
        let player = SessionPlayer::new();
        assert!(player.pause().await.is_err());

        player.play(resource()).await.unwrap();
        assert!(player.pause().await.is_err());

        player.mark_playing().unwrap();
        player.pause().await.unwrap();
        assert_eq!(player.state(), PlayerState::Paused);

        player.resume().await.unwrap();
        assert_eq!(player.state(), PlayerState::Playing);
    }

    #[tokio::test]
    async fn resume_from_auto_paused() {
        let player = SessionPlayer::new();
        player.play(resource()).await.unwrap();
        player.mark_playing().unwrap();
        player.mark_auto_paused().unwrap();
        assert_eq!(player.state(), PlayerState::AutoPaused);
        player.resume().await.unwrap();
        assert_eq!(player.state(), PlayerState::Playing);
    }

    #[tokio::test]
    async fn stop_is_idempotent() {
        let player = SessionPlayer::new();
        player.stop().await.unwrap();

        player.play(resource()).await.unwrap();
        player.stop().await.unwrap();
        assert_eq!(player.state(), PlayerState::Idle);
        player.stop().await.unwrap();
    }

    #[tokio::test]
    async fn fail_emits_error_without_state_change() {
        let player = SessionPlayer::new();
        player.play(resource()).await.unwrap();
        player.mark_playing().unwrap();

        let mut rx = player.subscribe();
        player.fail("decoder exploded");
        assert_eq!(player.state(), PlayerState::Idle);

        match rx.try_recv().unwrap() {
            PlayerEvent::TrackError { message } => assert_eq!(message, "decoder exploded"),
            other => panic!("unexpected event: {other:?}"),
        }
        assert!(rx.try_recv().is_err(), "no trailing state-change expected");
    }

    #[tokio::test]
    async fn mark_finished_from_idle_is_rejected() {
        let player = SessionPlayer::new();
        assert!(player.mark_finished().is_err());
    }
}
