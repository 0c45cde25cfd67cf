//! Typed session state parsed from receiver broadcasts and responses.
//!
//! Values are compared against the previous snapshot before observers are
//! notified, so the equality semantics here are load-bearing: receivers
//! re-broadcast status on every internal event and the duplicates must be
//! suppressed.

use crate::{
    message::EndpointId,
    payload::{media, multizone, receiver},
    types::{AppId, AppSessionId, MediaSessionId},
};
use std::collections::BTreeSet;
use tokio::time::Instant;

/// A running application instance on the receiver.
#[derive(Clone, Debug)]
pub struct CastApp {
    pub id: AppId,

    pub session_id: AppSessionId,

    /// Destination endpoint for media and per-app connection messages.
    pub transport_id: EndpointId,

    pub display_name: String,
    pub status_text: String,

    pub namespaces: BTreeSet<String>,
}

/// Apps are compared by session: a relaunch of the same app id is a
/// different instance.
impl PartialEq for CastApp {
    fn eq(&self, other: &CastApp) -> bool {
        self.session_id == other.session_id
    }
}

impl Eq for CastApp {}

impl From<&receiver::Application> for CastApp {
    fn from(app: &receiver::Application) -> CastApp {
        CastApp {
            id: app.app_id.clone(),
            session_id: app.app_session_id.clone(),
            transport_id: app.transport_id.clone(),
            display_name: app.display_name.clone(),
            status_text: app.status_text.clone(),
            namespaces: app.namespaces.iter()
                           .map(|ns| ns.name.to_string())
                           .collect(),
        }
    }
}

/// Device-level status from the receiver namespace.
#[derive(Clone, Debug, PartialEq)]
pub struct CastStatus {
    /// Volume level in `[0, 1]`.
    pub volume: f32,
    pub muted: bool,
    pub apps: Vec<CastApp>,
}

impl From<&receiver::Status> for CastStatus {
    fn from(status: &receiver::Status) -> CastStatus {
        CastStatus {
            volume: status.volume.level.unwrap_or(0.0),
            muted: status.volume.muted.unwrap_or(false),
            apps: status.applications.iter().map(CastApp::from).collect(),
        }
    }
}

/// Status of the media item loaded in an app.
#[derive(Clone, Debug)]
pub struct CastMediaStatus {
    pub media_session_id: MediaSessionId,

    pub player_state: media::PlayerState,

    /// Playback position in seconds at `observed_at`.
    pub current_time: f64,

    pub playback_rate: f64,

    pub idle_reason: Option<media::IdleReason>,

    pub media: Option<media::Media>,

    /// When this snapshot was taken, for [`Self::adjusted_current_time`].
    pub observed_at: Instant,
}

impl CastMediaStatus {
    /// `current_time` projected to the present moment: while playing, the
    /// position advances with the wall clock between receiver updates.
    pub fn adjusted_current_time(&self) -> f64 {
        match self.player_state {
            media::PlayerState::Playing =>
                self.current_time + self.observed_at.elapsed().as_secs_f64() * self.playback_rate,
            _ => self.current_time,
        }
    }

    pub fn is_playing(&self) -> bool {
        self.player_state == media::PlayerState::Playing
    }

    pub(crate) fn from_entry(entry: &media::StatusEntry, observed_at: Instant)
    -> CastMediaStatus {
        CastMediaStatus {
            media_session_id: entry.media_session_id,
            player_state: entry.player_state.clone(),
            current_time: entry.current_time.unwrap_or(0.0),
            playback_rate: entry.playback_rate,
            idle_reason: entry.idle_reason.clone(),
            media: entry.media.clone(),
            observed_at,
        }
    }
}

/// The observation timestamp is bookkeeping, not state: two snapshots that
/// differ only in `observed_at` would replay identical notifications.
impl PartialEq for CastMediaStatus {
    fn eq(&self, other: &CastMediaStatus) -> bool {
        self.media_session_id == other.media_session_id
            && self.player_state == other.player_state
            && self.current_time == other.current_time
            && self.playback_rate == other.playback_rate
            && self.idle_reason == other.idle_reason
            && self.media == other.media
    }
}

/// One member of an audio group.
#[derive(Clone, Debug, PartialEq)]
pub struct CastMultizoneDevice {
    pub id: String,
    pub name: String,
    pub capabilities: u32,

    pub volume: f32,
    pub muted: bool,
}

impl From<&multizone::Device> for CastMultizoneDevice {
    fn from(device: &multizone::Device) -> CastMultizoneDevice {
        CastMultizoneDevice {
            id: device.device_id.clone(),
            name: device.name.clone(),
            capabilities: device.capabilities,
            volume: device.volume.level.unwrap_or(0.0),
            muted: device.volume.muted.unwrap_or(false),
        }
    }
}

/// Membership and per-member volume of an audio group.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CastMultizoneStatus {
    pub devices: Vec<CastMultizoneDevice>,
}

impl From<&multizone::Status> for CastMultizoneStatus {
    fn from(status: &multizone::Status) -> CastMultizoneStatus {
        CastMultizoneStatus {
            devices: status.devices.iter().map(CastMultizoneDevice::from).collect(),
        }
    }
}

impl CastMultizoneStatus {
    /// Replace or append `device`, preserving list order.
    pub(crate) fn upsert(&mut self, device: CastMultizoneDevice) {
        match self.devices.iter_mut().find(|d| d.id == device.id) {
            Some(existing) => *existing = device,
            None => self.devices.push(device),
        }
    }

    pub(crate) fn remove(&mut self, device_id: &str) {
        self.devices.retain(|d| d.id != device_id);
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;

    fn app(session_id: &str, status_text: &str) -> CastApp {
        CastApp {
            id: "CC1AD845".to_string(),
            session_id: session_id.to_string(),
            transport_id: "T".into(),
            display_name: "Default Media Receiver".to_string(),
            status_text: status_text.to_string(),
            namespaces: BTreeSet::new(),
        }
    }

    #[test]
    fn app_equality_is_by_session() {
        assert_eq!(app("S1", "Ready"), app("S1", "Now Playing"));
        assert_ne!(app("S1", "Ready"), app("S2", "Ready"));
    }

    #[test]
    fn cast_status_from_receiver_status() {
        let raw: receiver::Status = serde_json::from_value(json!({
            "volume": {"level": 0.5, "muted": false},
            "applications": [{
                "appId": "CC1AD845",
                "sessionId": "S",
                "transportId": "T",
                "namespaces": [{"name": "urn:x-cast:com.google.cast.media"}],
            }],
        })).unwrap();

        let status = CastStatus::from(&raw);
        assert_eq!(status.volume, 0.5);
        assert!(!status.muted);
        assert_eq!(status.apps.len(), 1);
        assert_eq!(status.apps[0].transport_id.as_str(), "T");
        assert!(status.apps[0].namespaces.contains("urn:x-cast:com.google.cast.media"));
    }

    #[test]
    fn media_status_equality_ignores_observation_time() {
        let entry: media::StatusEntry = serde_json::from_value(json!({
            "mediaSessionId": 7,
            "playerState": "PLAYING",
            "currentTime": 12.5,
        })).unwrap();

        let a = CastMediaStatus::from_entry(&entry, Instant::now());
        let b = CastMediaStatus::from_entry(
            &entry, Instant::now() + std::time::Duration::from_secs(30));

        assert_eq!(a, b);
    }

    #[tokio::test(start_paused = true)]
    async fn adjusted_current_time_advances_while_playing() {
        let entry: media::StatusEntry = serde_json::from_value(json!({
            "mediaSessionId": 7,
            "playerState": "PLAYING",
            "currentTime": 10.0,
        })).unwrap();
        let status = CastMediaStatus::from_entry(&entry, Instant::now());

        tokio::time::advance(std::time::Duration::from_secs(5)).await;
        assert_eq!(status.adjusted_current_time(), 15.0);

        let paused = CastMediaStatus {
            player_state: media::PlayerState::Paused,
            .. status
        };
        tokio::time::advance(std::time::Duration::from_secs(5)).await;
        assert_eq!(paused.adjusted_current_time(), 10.0);
    }

    #[test]
    fn multizone_upsert_and_remove() {
        let mut status = CastMultizoneStatus::default();

        status.upsert(CastMultizoneDevice {
            id: "a".to_string(),
            name: "Kitchen".to_string(),
            capabilities: 4,
            volume: 0.3,
            muted: false,
        });
        status.upsert(CastMultizoneDevice {
            id: "a".to_string(),
            name: "Kitchen".to_string(),
            capabilities: 4,
            volume: 0.6,
            muted: false,
        });

        assert_eq!(status.devices.len(), 1);
        assert_eq!(status.devices[0].volume, 0.6);

        status.remove("a");
        assert!(status.devices.is_empty());
    }
}
