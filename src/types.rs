use crate::Result;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

pub type AppId = String;
pub type AppIdConst = &'static str;

/// Opaque identifier of a launched application instance.
pub type AppSessionId = String;

/// Integer identifying a loaded media item inside an app.
pub type MediaSessionId = i32;

pub type MessageType = String;
pub type MessageTypeConst = &'static str;

pub type NamespaceConst = &'static str;

pub type EndpointIdConst = &'static str;

/// Capability bits advertised by a device in its mDNS TXT record.
pub mod capability {
    pub const VIDEO_OUT: u32 = 1 << 0;
    pub const VIDEO_IN: u32 = 1 << 1;
    pub const AUDIO_OUT: u32 = 1 << 2;
    pub const AUDIO_IN: u32 = 1 << 3;

    /// The device fronts a group of audio devices with per-device volume.
    pub const MULTIZONE_GROUP: u32 = 1 << 5;
}

/// A cast device as produced by discovery. Immutable input to the engine;
/// the scanner itself lives outside this crate.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct CastDevice {
    pub id: String,
    pub name: String,
    pub model_name: String,

    pub host_name: String,

    /// Typically 8009.
    pub port: u16,

    /// Bit set of `capability` values.
    pub capabilities: u32,
}

impl CastDevice {
    pub fn has_capability(&self, cap: u32) -> bool {
        self.capabilities & cap != 0
    }

    pub fn is_multizone_group(&self) -> bool {
        self.has_capability(capability::MULTIZONE_GROUP)
    }

    /// Resolves `host_name:port` to the first reachable socket address.
    pub async fn resolve_addr(&self) -> Result<SocketAddr> {
        let mut addrs = tokio::net::lookup_host((self.host_name.as_str(), self.port))
            .await
            .map_err(|err| crate::Error::Connection(
                format!("resolving {host}:{port}: {err}",
                        host = self.host_name, port = self.port)))?;

        addrs.next().ok_or_else(|| crate::Error::Connection(
            format!("no addresses for {host}:{port}",
                    host = self.host_name, port = self.port)))
    }
}

impl PartialEq for CastDevice {
    fn eq(&self, other: &CastDevice) -> bool {
        self.id == other.id
    }
}

impl Eq for CastDevice {}

#[cfg(test)]
mod test {
    use super::*;

    fn device(id: &str, capabilities: u32) -> CastDevice {
        CastDevice {
            id: id.to_string(),
            name: "Living Room".to_string(),
            model_name: "Chromecast".to_string(),
            host_name: "living-room.local".to_string(),
            port: 8009,
            capabilities,
        }
    }

    #[test]
    fn capability_bits() {
        let audio = device("a", capability::AUDIO_OUT);
        assert!(audio.has_capability(capability::AUDIO_OUT));
        assert!(!audio.has_capability(capability::VIDEO_OUT));
        assert!(!audio.is_multizone_group());

        let group = device("g", capability::AUDIO_OUT | capability::MULTIZONE_GROUP);
        assert!(group.is_multizone_group());
    }

    #[test]
    fn device_equality_is_by_id() {
        let a = device("x", capability::AUDIO_OUT);
        let b = device("x", capability::VIDEO_OUT | capability::AUDIO_OUT);
        let c = device("y", capability::AUDIO_OUT);

        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
