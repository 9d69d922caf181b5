//! Per-session playback queue controller.
//!
//! One [`QueueController`] drives one session: it owns the ordered track
//! list, feeds resources one at a time to the player, reacts to transport
//! and player events, and tears the session down after a configured idle
//! period. All mutable session state lives behind the controller's own
//! lock; nothing outside the controller ever aliases it.
//!
//! ## Event flow
//!
//! Two listener tasks forward the transport and player event streams into
//! the two handler entry points ([`handle_transport_event`] and
//! [`handle_player_event`]). Events from one stream are processed in
//! emission order; long waits (rejoin backoff, the ready-watch) run in
//! their own tasks so they never stall event delivery.
//!
//! [`handle_transport_event`]: QueueController::handle_transport_event
//! [`handle_player_event`]: QueueController::handle_player_event

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::capabilities::{AudioPlayer, Notifier, StreamTransport};
use crate::errors::SessionError;
use crate::events::SessionEventBus;
use crate::model::{
    DisconnectInfo, PlayerEvent, PlayerState, SessionEvent, SessionId, TransportState,
    TransportStateChange,
};
use crate::queue::TrackQueue;
use crate::registry::SessionRegistry;
use crate::track::{PlayableItem, Resource, TrackMetadata};

/// Close code the streaming service sends when a session is kicked for good.
pub const FATAL_CLOSE_CODE: u16 = 4014;

/// Rejoin attempts allowed before the transport is torn down instead.
const REJOIN_ATTEMPT_CEILING: u32 = 5;

/// Delay unit of the graduated rejoin backoff: attempt n waits `(n+1)` units.
const REJOIN_BACKOFF_STEP: Duration = Duration::from_secs(5);

/// Upper bound on waiting for a connecting transport to reach Ready.
const READY_WAIT_TIMEOUT: Duration = Duration::from_secs(20);

/// Attempts at producing a resource for one head item before it is dropped.
const RESOURCE_ATTEMPT_CEILING: u32 = 3;

/// Delay unit between resource production attempts for the same item.
const RESOURCE_RETRY_STEP: Duration = Duration::from_millis(500);

/// Settings read once when a controller is constructed.
#[derive(Clone, Debug)]
pub struct ControllerSettings {
    /// Volume percentage applied to every new session.
    pub default_volume: u8,
    /// How long an emptied session stays alive before leaving.
    pub idle_stay: Duration,
    /// How long a "now playing" notice lives when pruning is enabled.
    pub prune_delay: Duration,
}

impl ControllerSettings {
    pub fn from_config(config: &jamconfig::Config) -> Self {
        ControllerSettings {
            default_volume: config.get_default_volume(),
            idle_stay: Duration::from_secs(config.get_idle_stay_secs()),
            prune_delay: Duration::from_secs(config.get_prune_delay_secs()),
        }
    }
}

impl Default for ControllerSettings {
    fn default() -> Self {
        ControllerSettings {
            default_volume: 50,
            idle_stay: Duration::from_secs(300),
            prune_delay: Duration::from_secs(5),
        }
    }
}

/// Mutable session state. Only the controller touches this, and never
/// while suspended at an await point.
struct ControllerState {
    tracks: TrackQueue,
    looping: bool,
    muted: bool,
    pruning: bool,
    volume: u8,
    current: Option<Resource>,
    /// At most one outstanding idle shutdown, cancelled by enqueue.
    idle_timer: Option<JoinHandle<()>>,
    /// Consecutive production failures for the current head item.
    resource_failures: u32,
    /// Set by `stop()` while the player is active, so the resulting Idle
    /// transition is not mistaken for a finished track.
    user_stop_requested: bool,
}

/// Drives one session's playback queue.
pub struct QueueController {
    session_id: SessionId,
    transport: Arc<dyn StreamTransport>,
    player: Arc<dyn AudioPlayer>,
    notifier: Arc<dyn Notifier>,
    registry: Weak<SessionRegistry>,
    events: SessionEventBus,
    settings: ControllerSettings,
    state: Mutex<ControllerState>,
    /// Held for the whole of "produce resource, hand it to the player".
    creation_lock: AtomicBool,
    /// One-shot guard around the bounded wait for Ready.
    ready_watch_active: AtomicBool,
    /// Ensures the session leaves the registry exactly once.
    deregistered: AtomicBool,
    shutdown_token: CancellationToken,
}

/// Releases the creation lock on every exit path, including panics.
struct CreationLockGuard<'a>(&'a AtomicBool);

impl Drop for CreationLockGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl QueueController {
    /// Creates the controller and starts its event listener tasks.
    ///
    /// The caller still has to [`insert`](SessionRegistry::insert) the
    /// returned controller into the registry; the registry is the sole
    /// owner of the controller's lifetime.
    pub fn spawn(
        session_id: SessionId,
        transport: Arc<dyn StreamTransport>,
        player: Arc<dyn AudioPlayer>,
        notifier: Arc<dyn Notifier>,
        registry: &Arc<SessionRegistry>,
        settings: ControllerSettings,
    ) -> Arc<Self> {
        let controller = Arc::new(QueueController {
            state: Mutex::new(ControllerState {
                tracks: TrackQueue::new(),
                looping: false,
                muted: false,
                pruning: false,
                volume: settings.default_volume,
                current: None,
                idle_timer: None,
                resource_failures: 0,
                user_stop_requested: false,
            }),
            events: registry.events().clone(),
            registry: Arc::downgrade(registry),
            creation_lock: AtomicBool::new(false),
            ready_watch_active: AtomicBool::new(false),
            deregistered: AtomicBool::new(false),
            shutdown_token: CancellationToken::new(),
            session_id,
            transport,
            player,
            notifier,
            settings,
        });

        controller.spawn_listeners();
        controller
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    fn spawn_listeners(self: &Arc<Self>) {
        let controller = Arc::clone(self);
        let token = self.shutdown_token.clone();
        let mut transport_rx = self.transport.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    event = transport_rx.recv() => match event {
                        Ok(change) => controller.handle_transport_event(change).await,
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!(session = %controller.session_id, skipped, "Transport event stream lagged");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            }
        });

        let controller = Arc::clone(self);
        let token = self.shutdown_token.clone();
        let mut player_rx = self.player.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    event = player_rx.recv() => match event {
                        Ok(event) => controller.handle_player_event(event).await,
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!(session = %controller.session_id, skipped, "Player event stream lagged");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            }
        });
    }

    fn emit(&self, event: SessionEvent) {
        self.events.broadcast(event);
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, ControllerState> {
        self.state.lock().expect("Controller state mutex poisoned")
    }

    // =========================================================================
    // Control surface
    // =========================================================================

    /// Appends items to the queue tail and (re)starts playback if idle.
    ///
    /// Always cancels a pending idle shutdown, even for an empty batch.
    /// Returns once a sequencing attempt has been made, which is not
    /// necessarily when audio becomes audible.
    pub async fn enqueue(self: &Arc<Self>, items: Vec<Arc<dyn PlayableItem>>) {
        let queue_length = {
            let mut state = self.lock_state();
            if let Some(timer) = state.idle_timer.take() {
                timer.abort();
                debug!(session = %self.session_id, "Cancelled pending idle shutdown");
            }
            state.tracks.enqueue_many(items);
            state.tracks.len()
        };
        self.emit(SessionEvent::QueueUpdated {
            id: self.session_id.clone(),
            queue_length,
        });
        self.process_queue().await;
    }

    /// Clears the queue, stops the player, and schedules the idle shutdown.
    pub async fn stop(self: &Arc<Self>) {
        if self.shutdown_token.is_cancelled() {
            return;
        }

        let player_active = self.player.state() != PlayerState::Idle;
        let pruning = {
            let mut state = self.lock_state();
            state.tracks.clear();
            state.looping = false;
            if player_active {
                state.user_stop_requested = true;
            }
            state.pruning
        };

        if let Err(err) = self.player.stop().await {
            warn!(session = %self.session_id, error = %err, "Failed to stop the player");
        }

        if !pruning {
            if let Err(err) = self.notifier.send("Queue ended.").await {
                warn!(session = %self.session_id, error = %err, "Failed to send queue-ended notice");
            }
        }

        let mut state = self.lock_state();
        if state.idle_timer.is_some() {
            return;
        }
        let controller = Arc::clone(self);
        let stay = self.settings.idle_stay;
        state.idle_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(stay).await;
            controller.idle_timer_fired().await;
        }));
    }

    /// Stops the active track without clearing the queue; playback advances
    /// to the next item through the player's Idle transition.
    pub async fn skip(&self) -> Result<(), SessionError> {
        self.player.stop().await
    }

    pub async fn pause(&self) -> Result<(), SessionError> {
        self.player.pause().await
    }

    pub async fn resume(&self) -> Result<(), SessionError> {
        self.player.resume().await
    }

    pub fn looping(&self) -> bool {
        self.lock_state().looping
    }

    pub fn set_looping(&self, looping: bool) {
        self.lock_state().looping = looping;
    }

    pub fn pruning(&self) -> bool {
        self.lock_state().pruning
    }

    pub fn set_pruning(&self, pruning: bool) {
        self.lock_state().pruning = pruning;
    }

    pub fn muted(&self) -> bool {
        self.lock_state().muted
    }

    /// Mutes or unmutes the active resource. The stored volume is kept so
    /// unmuting restores it.
    pub fn set_muted(&self, muted: bool) {
        let active = {
            let mut state = self.lock_state();
            state.muted = muted;
            let volume = state.volume;
            state.current.clone().map(|resource| (resource, volume))
        };
        if let Some((resource, volume)) = active {
            if muted {
                resource.mute();
            } else {
                resource.set_volume_logarithmic(volume);
            }
        }
    }

    pub fn volume(&self) -> u8 {
        self.lock_state().volume
    }

    /// Sets the session volume and re-applies it to the active resource.
    pub fn set_volume(&self, percent: u8) {
        let resource = {
            let mut state = self.lock_state();
            state.volume = percent;
            if state.muted { None } else { state.current.clone() }
        };
        if let Some(resource) = resource {
            resource.set_volume_logarithmic(percent);
        }
    }

    /// Metadata of every queued item, in play order.
    pub fn queue_snapshot(&self) -> Vec<TrackMetadata> {
        self.lock_state().tracks.snapshot()
    }

    pub fn track_count(&self) -> usize {
        self.lock_state().tracks.len()
    }

    /// Metadata of the resource currently handed to the player.
    pub fn current_track(&self) -> Option<TrackMetadata> {
        self.lock_state()
            .current
            .as_ref()
            .map(|resource| resource.metadata().clone())
    }

    // =========================================================================
    // Sequencing
    // =========================================================================

    /// Advances the queue: produces a resource for the head item and hands
    /// it to the player.
    ///
    /// A silent no-op while a sequencing attempt is already in flight or
    /// the player is busy; stops the session instead of playing when the
    /// queue is empty or nobody is listening.
    pub async fn process_queue(self: &Arc<Self>) {
        if self.creation_lock.load(Ordering::SeqCst) || self.player.state() != PlayerState::Idle {
            return;
        }

        if self.lock_state().tracks.is_empty() || self.transport.audience() == 0 {
            self.stop().await;
            return;
        }

        if self
            .creation_lock
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }
        let guard = CreationLockGuard(&self.creation_lock);

        loop {
            let Some(item) = self.lock_state().tracks.head() else {
                drop(guard);
                self.stop().await;
                return;
            };
            let title = item.metadata().title.clone();

            match item.create_resource().await {
                Ok(resource) => {
                    let (volume, muted) = {
                        let mut state = self.lock_state();
                        state.resource_failures = 0;
                        state.current = Some(resource.clone());
                        (state.volume, state.muted)
                    };
                    if let Err(err) = self.player.play(resource.clone()).await {
                        error!(
                            session = %self.session_id,
                            track = %title,
                            error = %err,
                            "Player refused the resource; dropping track"
                        );
                        let mut state = self.lock_state();
                        state.current = None;
                        state.tracks.drop_head();
                        continue;
                    }
                    if muted {
                        resource.mute();
                    } else {
                        resource.set_volume_logarithmic(volume);
                    }
                    debug!(session = %self.session_id, track = %title, "Handed resource to player");
                    return;
                }
                Err(err) => {
                    warn!(
                        session = %self.session_id,
                        track = %title,
                        error = %err,
                        "Failed to produce a resource"
                    );
                    let failures = {
                        let mut state = self.lock_state();
                        state.resource_failures += 1;
                        state.resource_failures
                    };
                    if failures >= RESOURCE_ATTEMPT_CEILING {
                        warn!(
                            session = %self.session_id,
                            track = %title,
                            attempts = failures,
                            "Giving up on track after repeated production failures"
                        );
                        let queue_length = {
                            let mut state = self.lock_state();
                            state.tracks.drop_head();
                            state.resource_failures = 0;
                            state.tracks.len()
                        };
                        self.emit(SessionEvent::QueueUpdated {
                            id: self.session_id.clone(),
                            queue_length,
                        });
                        continue;
                    }
                    tokio::time::sleep(RESOURCE_RETRY_STEP * failures).await;
                }
            }
        }
    }

    // =========================================================================
    // Player events
    // =========================================================================

    /// Entry point for the player event stream.
    pub async fn handle_player_event(self: &Arc<Self>, event: PlayerEvent) {
        match event {
            PlayerEvent::StateChanged {
                from,
                to: PlayerState::Idle,
            } if from != PlayerState::Idle => {
                self.on_track_ended().await;
            }
            PlayerEvent::StateChanged {
                from: PlayerState::Buffering,
                to: PlayerState::Playing,
            } => {
                self.announce_now_playing().await;
            }
            PlayerEvent::StateChanged { .. } => {}
            PlayerEvent::TrackError { message } => {
                self.on_track_failed(message).await;
            }
        }
    }

    /// A track finished or was force-stopped.
    async fn on_track_ended(self: &Arc<Self>) {
        let (resume, queue_length) = {
            let mut state = self.lock_state();
            if state.user_stop_requested {
                // stop() already cleared the queue and scheduled the idle
                // shutdown; this Idle transition is its echo.
                state.user_stop_requested = false;
                state.current = None;
                return;
            }
            let had_resource = state.current.take().is_some();
            if state.looping && !state.tracks.is_empty() {
                state.tracks.rotate_head_to_tail();
            } else {
                state.tracks.drop_head();
            }
            (
                !state.tracks.is_empty() && had_resource,
                state.tracks.len(),
            )
        };

        self.emit(SessionEvent::TrackFinished {
            id: self.session_id.clone(),
        });
        self.emit(SessionEvent::QueueUpdated {
            id: self.session_id.clone(),
            queue_length,
        });

        if resume {
            self.process_queue().await;
        } else {
            self.stop().await;
        }
    }

    /// The active track failed: forced skip, then keep sequencing.
    async fn on_track_failed(self: &Arc<Self>, message: String) {
        error!(session = %self.session_id, error = %message, "Active track failed; skipping");
        let queue_length = {
            let mut state = self.lock_state();
            state.current = None;
            if state.looping && !state.tracks.is_empty() {
                state.tracks.rotate_head_to_tail();
            } else {
                state.tracks.drop_head();
            }
            state.tracks.len()
        };
        self.emit(SessionEvent::QueueUpdated {
            id: self.session_id.clone(),
            queue_length,
        });
        self.process_queue().await;
    }

    async fn announce_now_playing(self: &Arc<Self>) {
        let (metadata, pruning) = {
            let state = self.lock_state();
            (
                state.current.as_ref().map(|r| r.metadata().clone()),
                state.pruning,
            )
        };
        let Some(metadata) = metadata else {
            return;
        };

        self.emit(SessionEvent::TrackStarted {
            id: self.session_id.clone(),
            track: metadata.clone(),
        });

        match self.notifier.send(&metadata.now_playing_notice()).await {
            Ok(notice) if pruning => {
                let controller = Arc::clone(self);
                tokio::spawn(async move {
                    tokio::time::sleep(controller.settings.prune_delay).await;
                    if let Err(err) = controller.notifier.delete(notice).await {
                        debug!(
                            session = %controller.session_id,
                            error = %err,
                            "Ignoring now-playing prune failure"
                        );
                    }
                });
            }
            Ok(_) => {}
            Err(err) => {
                warn!(session = %self.session_id, error = %err, "Failed to send now-playing notice");
            }
        }
    }

    // =========================================================================
    // Transport events
    // =========================================================================

    /// Entry point for the transport event stream.
    pub async fn handle_transport_event(self: &Arc<Self>, change: TransportStateChange) {
        debug!(
            session = %self.session_id,
            from = %change.from,
            to = %change.to,
            "Transport state changed"
        );
        match change.to {
            TransportState::Disconnected => {
                self.on_transport_disconnected(change.disconnect).await;
            }
            TransportState::Ready => {
                // Nothing to drive here; playback advances on player events.
            }
            TransportState::Connecting | TransportState::Signalling => {
                self.spawn_ready_watch();
            }
            TransportState::Destroyed => {}
        }
    }

    async fn on_transport_disconnected(self: &Arc<Self>, disconnect: Option<DisconnectInfo>) {
        if let Some(info) = &disconnect {
            if info.abrupt && info.close_code == Some(FATAL_CLOSE_CODE) {
                warn!(
                    session = %self.session_id,
                    close_code = FATAL_CLOSE_CODE,
                    "Transport closed by the service; leaving session"
                );
                if !self.deregister() {
                    error!(session = %self.session_id, "Deregistration failed; forcing a full stop");
                    self.stop().await;
                }
                return;
            }
        }

        let attempts = self.transport.rejoin_attempts();
        if attempts >= REJOIN_ATTEMPT_CEILING {
            warn!(
                session = %self.session_id,
                attempts,
                "Rejoin budget exhausted; destroying transport"
            );
            if let Err(err) = self.transport.destroy().await {
                debug!(session = %self.session_id, error = %err, "Ignoring transport destroy failure");
            }
            self.deregister();
            return;
        }

        let delay = REJOIN_BACKOFF_STEP * (attempts + 1);
        info!(
            session = %self.session_id,
            attempt = attempts + 1,
            delay_secs = delay.as_secs(),
            "Transport lost; scheduling rejoin"
        );
        let controller = Arc::clone(self);
        tokio::spawn(async move {
            tokio::select! {
                _ = controller.shutdown_token.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }
            if let Err(err) = controller.transport.rejoin().await {
                warn!(session = %controller.session_id, error = %err, "Rejoin request failed");
            }
        });
    }

    /// Starts the bounded wait for Ready, unless one is already running.
    fn spawn_ready_watch(self: &Arc<Self>) {
        if self
            .ready_watch_active
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }

        let controller = Arc::clone(self);
        tokio::spawn(async move {
            let outcome =
                tokio::time::timeout(READY_WAIT_TIMEOUT, controller.wait_until_ready()).await;
            if outcome.is_err() {
                warn!(
                    session = %controller.session_id,
                    "Transport did not reach Ready in time; tearing down"
                );
                if controller.transport.state() != TransportState::Destroyed {
                    if let Err(err) = controller.transport.destroy().await {
                        debug!(
                            session = %controller.session_id,
                            error = %err,
                            "Ignoring transport destroy failure"
                        );
                    }
                }
            }
            controller.ready_watch_active.store(false, Ordering::SeqCst);
        });
    }

    async fn wait_until_ready(&self) {
        if self.transport.state() == TransportState::Ready {
            return;
        }
        let mut rx = self.transport.subscribe();
        // Re-check after subscribing so a transition between the first check
        // and the subscription cannot be missed.
        if self.transport.state() == TransportState::Ready {
            return;
        }
        loop {
            match rx.recv().await {
                Ok(change) if change.to == TransportState::Ready => return,
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(_)) => {
                    if self.transport.state() == TransportState::Ready {
                        return;
                    }
                }
                Err(broadcast::error::RecvError::Closed) => {
                    // Stream gone; only the timeout can end the watch now.
                    std::future::pending::<()>().await;
                }
            }
        }
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    async fn idle_timer_fired(self: Arc<Self>) {
        self.lock_state().idle_timer = None;

        if self.transport.state() != TransportState::Destroyed {
            if let Err(err) = self.transport.destroy().await {
                debug!(session = %self.session_id, error = %err, "Ignoring transport destroy failure");
            }
        }

        // Re-check at fire time: playback may have resumed after the timer
        // was scheduled.
        let queue_empty = self.lock_state().tracks.is_empty();
        if self.player.state() == PlayerState::Playing || !queue_empty {
            debug!(
                session = %self.session_id,
                "Playback resumed before the idle timer fired; keeping session"
            );
            return;
        }

        info!(session = %self.session_id, "Session idle past the stay duration; leaving");
        self.deregister();
        if let Err(err) = self.notifier.send("Leaving due to inactivity.").await {
            warn!(session = %self.session_id, error = %err, "Failed to send inactivity notice");
        }
    }

    /// Removes this session from the registry, at most once.
    ///
    /// Returns false when the removal could not happen: the registry is
    /// gone or the session was not registered.
    fn deregister(self: &Arc<Self>) -> bool {
        if self
            .deregistered
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return true;
        }
        match self.registry.upgrade() {
            Some(registry) => registry.remove(&self.session_id).is_some(),
            None => false,
        }
    }

    /// Tears the controller down: cancels listener tasks and timers, clears
    /// the queue, and stops the player. Called by the registry on removal.
    pub(crate) fn shutdown(self: &Arc<Self>) {
        // Mark first so any later deregister call is a no-op.
        self.deregistered.store(true, Ordering::SeqCst);
        self.shutdown_token.cancel();
        {
            let mut state = self.lock_state();
            if let Some(timer) = state.idle_timer.take() {
                timer.abort();
            }
            state.tracks.clear();
            state.current = None;
        }
        let player = Arc::clone(&self.player);
        let session_id = self.session_id.clone();
        tokio::spawn(async move {
            if let Err(err) = player.stop().await {
                debug!(session = %session_id, error = %err, "Ignoring player stop failure during shutdown");
            }
        });
    }
}

impl std::fmt::Debug for QueueController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueController")
            .field("session_id", &self.session_id)
            .field("creation_lock", &self.creation_lock.load(Ordering::SeqCst))
            .field("deregistered", &self.deregistered.load(Ordering::SeqCst))
            .finish()
    }
}
