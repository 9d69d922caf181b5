//! Minimal end-to-end wiring of one playback session.
//!
//! Builds a registry, a loopback transport, the default player state
//! machine and a log notifier, enqueues two tracks, and walks them through
//! the player the way a real audio pipeline would.
//!
//! Run with: `cargo run --example session_demo`

use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;

use jamsession::capabilities::{AudioPlayer, LogNotifier, Notifier, StreamTransport};
use jamsession::controller::{ControllerSettings, QueueController};
use jamsession::errors::SessionError;
use jamsession::model::{SessionId, TransportState, TransportStateChange};
use jamsession::player::SessionPlayer;
use jamsession::registry::SessionRegistry;
use jamsession::track::{PlayableItem, Resource, TrackMetadata};

/// In-process transport that is always connected with one listener.
struct LoopbackTransport {
    state: Mutex<TransportState>,
    attempts: AtomicU32,
    tx: broadcast::Sender<TransportStateChange>,
}

impl LoopbackTransport {
    fn new() -> Arc<Self> {
        Arc::new(LoopbackTransport {
            state: Mutex::new(TransportState::Ready),
            attempts: AtomicU32::new(0),
            tx: broadcast::channel(16).0,
        })
    }
}

#[async_trait]
impl StreamTransport for LoopbackTransport {
    fn state(&self) -> TransportState {
        *self.state.lock().unwrap()
    }

    fn rejoin_attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    fn audience(&self) -> usize {
        1
    }

    async fn rejoin(&self) -> Result<(), SessionError> {
        Ok(())
    }

    async fn destroy(&self) -> Result<(), SessionError> {
        *self.state.lock().unwrap() = TransportState::Destroyed;
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<TransportStateChange> {
        self.tx.subscribe()
    }
}

/// Track whose resource production always succeeds.
struct DemoTrack(TrackMetadata);

impl DemoTrack {
    fn new(title: &str, artist: &str) -> Arc<Self> {
        let mut metadata = TrackMetadata::new(title);
        metadata.artist = Some(artist.to_string());
        Arc::new(DemoTrack(metadata))
    }
}

#[async_trait]
impl PlayableItem for DemoTrack {
    fn metadata(&self) -> &TrackMetadata {
        &self.0
    }

    async fn create_resource(&self) -> Result<Resource, SessionError> {
        Ok(Resource::new(self.0.clone()))
    }
}

#[tokio::main]
async fn main() {
    let config = jamconfig::get_config();
    jamconfig::init_logging(&config);

    let registry = SessionRegistry::new();
    let transport = LoopbackTransport::new();
    let player = SessionPlayer::new();

    let controller = QueueController::spawn(
        SessionId::new("demo"),
        transport as Arc<dyn StreamTransport>,
        player.clone() as Arc<dyn AudioPlayer>,
        Arc::new(LogNotifier) as Arc<dyn Notifier>,
        &registry,
        ControllerSettings::from_config(&config),
    );
    registry.insert(controller.clone()).unwrap();

    controller
        .enqueue(vec![
            DemoTrack::new("First Light", "The Examples") as Arc<dyn PlayableItem>,
            DemoTrack::new("Second Wind", "The Examples") as Arc<dyn PlayableItem>,
        ])
        .await;

    // Stand in for the audio pipeline: start each buffered track, let it
    // "play" briefly, then report completion so the queue advances.
    for _ in 0..2 {
        tokio::time::sleep(Duration::from_millis(100)).await;
        player.mark_playing().ok();
        tokio::time::sleep(Duration::from_millis(500)).await;
        player.mark_finished().ok();
    }

    tokio::time::sleep(Duration::from_millis(100)).await;
    tracing::info!(
        remaining = controller.track_count(),
        "Demo queue drained; session will idle out on its own"
    );

    registry.remove(controller.session_id());
}
