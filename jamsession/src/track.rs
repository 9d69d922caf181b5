//! Playable items and the single-use resources produced from them.
//!
//! A [`PlayableItem`] is a logical track sitting in a queue. Producing its
//! byte stream is the business of the enqueueing layer; this module only
//! defines the contract plus the [`Resource`] handle the controller owns
//! while the track plays.

use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::SessionError;

/// Exponent mapping a linear volume fraction onto a perceptual loudness curve.
const LOG_VOLUME_EXPONENT: f64 = 1.660964;

/// Descriptive metadata of a playable track.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TrackMetadata {
    pub title: String,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub source_url: Option<String>,
    pub duration_secs: Option<u64>,
    /// Display name of whoever enqueued the track.
    pub requested_by: Option<String>,
}

impl TrackMetadata {
    pub fn new(title: impl Into<String>) -> Self {
        TrackMetadata {
            title: title.into(),
            ..Default::default()
        }
    }

    /// Builds the announcement text shown when this track starts playing.
    pub fn now_playing_notice(&self) -> String {
        match &self.artist {
            Some(artist) => format!("Now playing: {} by {}", self.title, artist),
            None => format!("Now playing: {}", self.title),
        }
    }
}

/// A logical track: can produce a one-shot streamable resource and carries
/// the metadata used for announcements and queue displays.
#[async_trait]
pub trait PlayableItem: Send + Sync {
    /// Descriptive metadata of this track.
    fn metadata(&self) -> &TrackMetadata;

    /// Produces the single-use playable resource for this item.
    ///
    /// A fresh resource is produced for every playback attempt, including
    /// loop repeats; a resource is never reused across attempts.
    async fn create_resource(&self) -> Result<Resource, SessionError>;
}

/// Single-use playable handle bound to exactly one [`PlayableItem`].
///
/// The resource carries the track metadata and a shared gain cell the audio
/// pipeline reads on every chunk. The controller owns the resource while the
/// track plays and discards it when the track finishes, errors, or is
/// skipped.
#[derive(Clone, Debug)]
pub struct Resource {
    metadata: TrackMetadata,
    gain: Arc<RwLock<f64>>,
}

impl Resource {
    pub fn new(metadata: TrackMetadata) -> Self {
        Resource {
            metadata,
            gain: Arc::new(RwLock::new(1.0)),
        }
    }

    pub fn metadata(&self) -> &TrackMetadata {
        &self.metadata
    }

    /// Current gain multiplier, as read by the audio pipeline.
    pub fn gain(&self) -> f64 {
        *self.gain.read().expect("Gain lock poisoned")
    }

    /// Applies a volume percentage on the logarithmic loudness scale.
    ///
    /// 100 maps to unity gain, 0 to silence; intermediate values follow
    /// `(percent / 100) ^ 1.660964` so that halving the percentage sounds
    /// like half as loud rather than measuring half the amplitude.
    pub fn set_volume_logarithmic(&self, percent: u8) {
        let fraction = f64::from(percent) / 100.0;
        let gain = fraction.powf(LOG_VOLUME_EXPONENT);
        *self.gain.write().expect("Gain lock poisoned") = gain;
    }

    /// Drives the gain to zero without forgetting the configured volume.
    pub fn mute(&self) {
        *self.gain.write().expect("Gain lock poisoned") = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_volume_is_unity_gain() {
        let resource = Resource::new(TrackMetadata::new("t"));
        resource.set_volume_logarithmic(100);
        assert!((resource.gain() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn zero_volume_is_silence() {
        let resource = Resource::new(TrackMetadata::new("t"));
        resource.set_volume_logarithmic(0);
        assert_eq!(resource.gain(), 0.0);
    }

    #[test]
    fn half_volume_is_perceptually_half() {
        let resource = Resource::new(TrackMetadata::new("t"));
        resource.set_volume_logarithmic(50);
        // 0.5 ^ 1.660964 is roughly 0.316, i.e. about -10 dB
        assert!((resource.gain() - 0.316).abs() < 0.005);
    }

    #[test]
    fn mute_preserves_nothing_but_silences() {
        let resource = Resource::new(TrackMetadata::new("t"));
        resource.set_volume_logarithmic(80);
        resource.mute();
        assert_eq!(resource.gain(), 0.0);
        resource.set_volume_logarithmic(80);
        assert!(resource.gain() > 0.0);
    }

    #[test]
    fn now_playing_notice_formats() {
        let mut metadata = TrackMetadata::new("Song");
        assert_eq!(metadata.now_playing_notice(), "Now playing: Song");
        metadata.artist = Some("Band".to_string());
        assert_eq!(metadata.now_playing_notice(), "Now playing: Song by Band");
    }
}
