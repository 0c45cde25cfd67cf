use crate::types::{AppId, AppSessionId,
                   MediaSessionId,
                   MessageType, MessageTypeConst,
                   NamespaceConst};
use rand::Rng;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_with::skip_serializing_none;
use std::{
    fmt::{self, Debug, Display},
    sync::atomic::{AtomicU32, Ordering},
};

/// u32 that represents a request_id in the Cast protocol.
///
/// Zero is only used in broadcast responses with no corresponding request.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
#[serde(transparent)]
pub struct RequestId(u32);

pub(crate) struct RequestIdGen(AtomicU32);

impl RequestId {
    pub const BROADCAST: RequestId = RequestId(Self::BROADCAST_U32);
    const BROADCAST_U32: u32 = 0;
}

impl RequestIdGen {
    /// Initial ids are drawn from this range so that a receiver replaying
    /// buffered frames from a previous session is unlikely to collide with
    /// ids issued in this one.
    const SEED_RANGE: u32 = 800;

    pub(crate) fn new() -> RequestIdGen {
        RequestIdGen::with_seed(rand::thread_rng().gen_range(0..Self::SEED_RANGE))
    }

    pub(crate) fn with_seed(seed: u32) -> RequestIdGen {
        RequestIdGen(AtomicU32::new(seed))
    }

    pub(crate) fn take_next(&self) -> RequestId {
        loop {
            let id = self.0.fetch_add(1, Ordering::SeqCst);
            if id == RequestId::BROADCAST_U32 {
                // Receivers use 0 for broadcast messages, take the next value.
                continue;
            }

            return RequestId(id);
        }
    }
}

#[skip_serializing_none]
#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Payload<T>
{
    pub request_id: Option<RequestId>,

    #[serde(rename = "type")]
    pub typ: MessageType,

    #[serde(flatten)]
    pub inner: T,
}

pub type PayloadDyn = Payload<serde_json::Value>;

pub trait RequestInner: Debug + Serialize
{
    const CHANNEL_NAMESPACE: NamespaceConst;
    const TYPE_NAME: MessageTypeConst;
}

pub trait ResponseInner: Debug + DeserializeOwned
{
    const CHANNEL_NAMESPACE: NamespaceConst;
    const TYPE_NAMES: &'static [MessageTypeConst];
}

pub const USER_AGENT: &str = "castv2-rs";

impl RequestId {
    pub fn inner(self) -> u32 {
        self.0
    }

    pub fn is_broadcast(self) -> bool {
        self == RequestId::BROADCAST
    }

    pub fn is_rpc(self) -> bool {
        self != RequestId::BROADCAST
    }
}

impl From<RequestId> for u32 {
    fn from(id: RequestId) -> u32 {
        id.0
    }
}

impl Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

pub mod connection {
    use super::*;

    pub const CHANNEL_NAMESPACE: NamespaceConst = "urn:x-cast:com.google.cast.tp.connection";

    pub const MESSAGE_TYPE_CONNECT: MessageTypeConst = "CONNECT";
    pub const MESSAGE_TYPE_CLOSE: MessageTypeConst = "CLOSE";

    #[derive(Debug, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct ConnectRequest {
        pub user_agent: String,
    }

    impl RequestInner for ConnectRequest {
        const CHANNEL_NAMESPACE: NamespaceConst = CHANNEL_NAMESPACE;
        const TYPE_NAME: MessageTypeConst = MESSAGE_TYPE_CONNECT;
    }

    /// Sent to an app transport (or the device) when leaving it.
    #[derive(Debug, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct CloseRequest {}

    impl RequestInner for CloseRequest {
        const CHANNEL_NAMESPACE: NamespaceConst = CHANNEL_NAMESPACE;
        const TYPE_NAME: MessageTypeConst = MESSAGE_TYPE_CLOSE;
    }
}

pub mod heartbeat {
    use super::*;

    pub const CHANNEL_NAMESPACE: NamespaceConst = "urn:x-cast:com.google.cast.tp.heartbeat";

    pub const MESSAGE_TYPE_PING: MessageTypeConst = "PING";
    pub const MESSAGE_TYPE_PONG: MessageTypeConst = "PONG";

    #[derive(Debug, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct Ping {}

    impl RequestInner for Ping {
        const CHANNEL_NAMESPACE: NamespaceConst = CHANNEL_NAMESPACE;
        const TYPE_NAME: MessageTypeConst = MESSAGE_TYPE_PING;
    }

    #[derive(Debug, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct Pong {}

    impl RequestInner for Pong {
        const CHANNEL_NAMESPACE: NamespaceConst = CHANNEL_NAMESPACE;
        const TYPE_NAME: MessageTypeConst = MESSAGE_TYPE_PONG;
    }
}

/// Messages and types for the media namespace, as used by the Default Media
/// Receiver app.
///
/// Reference: <https://developers.google.com/cast/docs/reference/web_receiver/cast.framework.messages>
pub mod media {
    use super::*;

    pub const CHANNEL_NAMESPACE: NamespaceConst = "urn:x-cast:com.google.cast.media";

    pub const MESSAGE_REQUEST_TYPE_GET_STATUS: MessageTypeConst = "GET_STATUS";
    pub const MESSAGE_REQUEST_TYPE_LOAD: MessageTypeConst = "LOAD";
    pub const MESSAGE_REQUEST_TYPE_PLAY: MessageTypeConst = "PLAY";
    pub const MESSAGE_REQUEST_TYPE_PAUSE: MessageTypeConst = "PAUSE";
    pub const MESSAGE_REQUEST_TYPE_STOP: MessageTypeConst = "STOP";
    pub const MESSAGE_REQUEST_TYPE_SEEK: MessageTypeConst = "SEEK";
    pub const MESSAGE_REQUEST_TYPE_QUEUE_LOAD: MessageTypeConst = "QUEUE_LOAD";

    // QUEUE_NEXT / QUEUE_PREV are expressed as `QUEUE_UPDATE` with
    // QueueUpdateRequestArgs::jump_next() / jump_prev().
    pub const MESSAGE_REQUEST_TYPE_QUEUE_UPDATE: MessageTypeConst = "QUEUE_UPDATE";

    pub const MESSAGE_REQUEST_TYPE_SET_PLAYBACK_RATE: MessageTypeConst = "SET_PLAYBACK_RATE";

    pub const MESSAGE_RESPONSE_TYPE_MEDIA_STATUS: MessageTypeConst = "MEDIA_STATUS";
    pub const MESSAGE_RESPONSE_TYPE_LOAD_CANCELLED: MessageTypeConst = "LOAD_CANCELLED";
    pub const MESSAGE_RESPONSE_TYPE_LOAD_FAILED: MessageTypeConst = "LOAD_FAILED";
    pub const MESSAGE_RESPONSE_TYPE_INVALID_PLAYER_STATE: MessageTypeConst
        = "INVALID_PLAYER_STATE";
    pub const MESSAGE_RESPONSE_TYPE_INVALID_REQUEST: MessageTypeConst = "INVALID_REQUEST";

    mod shared {
        use super::*;

        #[skip_serializing_none]
        #[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
        pub struct Image {
            pub url: String,
            pub width: Option<u32>,
            pub height: Option<u32>,
        }

        #[skip_serializing_none]
        #[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
        #[serde(rename_all = "camelCase")]
        pub struct Media {
            /// Typically a URL for the content.
            pub content_id: String,
            pub content_type: MimeType,

            /// If missing, `content_id` is used as a URL.
            pub content_url: Option<String>,

            #[serde(default)]
            pub custom_data: CustomData,

            pub duration: Option<Seconds>,
            pub media_category: Option<MediaCategory>,
            pub metadata: Option<Metadata>,
            pub stream_type: Option<StreamType>,
        }

        impl Media {
            pub fn from_url(url: impl Into<String>) -> Media {
                Self::from_content_id(url)
            }

            pub fn from_content_id(content_id: impl Into<String>) -> Media {
                Media {
                    content_id: content_id.into(),
                    content_type: MimeType::default(),
                    content_url: None,
                    custom_data: CustomData::default(),
                    duration: None,
                    media_category: None,
                    metadata: None,
                    stream_type: None,
                }
            }

            pub fn with_content_type(mut self, content_type: impl Into<MimeType>) -> Media {
                self.content_type = content_type.into();
                self
            }

            pub fn with_stream_type(mut self, stream_type: StreamType) -> Media {
                self.stream_type = Some(stream_type);
                self
            }
        }

        #[skip_serializing_none]
        #[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
        #[serde(rename_all = "camelCase")]
        pub struct Metadata {
            pub metadata_type: u32,

            pub album_artist: Option<String>,
            pub album_name: Option<String>,
            pub artist: Option<String>,
            pub composer: Option<String>,

            #[serde(default)]
            pub images: Vec<Image>,

            pub release_date: Option<String>,
            pub series_title: Option<String>,
            pub subtitle: Option<String>,
            pub title: Option<String>,
            pub track_number: Option<u32>,
        }

        impl Metadata {
            /// `metadataType` 0, the generic media metadata.
            pub fn generic() -> Metadata {
                Metadata {
                    metadata_type: 0,
                    album_artist: None,
                    album_name: None,
                    artist: None,
                    composer: None,
                    images: Vec::new(),
                    release_date: None,
                    series_title: None,
                    subtitle: None,
                    title: None,
                    track_number: None,
                }
            }
        }

        #[skip_serializing_none]
        #[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
        #[serde(rename_all = "camelCase")]
        pub struct QueueItem {
            /// Wrapped by some receivers in a JSON string; ignored on error.
            #[serde(default)]
            pub autoplay: Option<bool>,

            #[serde(default)]
            pub custom_data: CustomData,

            /// Must be missing for load requests, is assigned by the
            /// receiver, then will be present in responses.
            pub item_id: Option<ItemId>,
            pub media: Option<Media>,

            pub preload_time: Option<Seconds>,
            pub start_time: Option<Seconds>,
        }

        impl QueueItem {
            pub fn from_url(url: &str) -> QueueItem {
                QueueItem {
                    media: Some(Media::from_url(url)),
                    .. QueueItem::default()
                }
            }
        }

        #[derive(Clone, Debug, Deserialize, Serialize)]
        #[serde(rename_all = "camelCase")]
        pub struct Status {
            #[serde(rename = "status")]
            pub entries: Vec<StatusEntry>,
        }

        impl Status {
            pub fn first_media_session_id(&self) -> Option<MediaSessionId> {
                self.entries.first().map(|s| s.media_session_id)
            }
        }

        #[derive(Clone, Debug, Deserialize, Serialize)]
        #[serde(rename_all = "camelCase")]
        pub struct StatusEntry {
            pub media_session_id: MediaSessionId,

            pub current_item_id: Option<ItemId>,
            pub current_time: Option<Seconds>,
            pub idle_reason: Option<IdleReason>,
            pub media: Option<Media>,

            #[serde(default = "default_playback_rate")]
            pub playback_rate: f64,

            pub player_state: PlayerState,
            pub repeat_mode: Option<RepeatMode>,

            /// Bit field.
            /// * `1` `Pause`;
            /// * `2` `Seek`;
            /// * `4` `Stream volume`;
            /// * `8` `Stream mute`;
            /// * `16` `Skip forward`;
            /// * `32` `Skip backward`.
            #[serde(default)]
            pub supported_media_commands: u32,
        }

        fn default_playback_rate() -> f64 {
            1.0
        }

        #[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
        #[serde(rename_all = "SCREAMING_SNAKE_CASE")]
        pub enum IdleReason {
            Cancelled,
            Interrupted,
            Finished,
            Error,

            #[serde(untagged, skip_serializing)]
            Unknown(String),
        }

        #[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
        #[serde(rename_all = "SCREAMING_SNAKE_CASE")]
        pub enum MediaCategory {
            Audio,
            Video,
            Image,

            #[serde(untagged, skip_serializing)]
            Unknown(String),
        }

        #[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
        #[serde(rename_all = "SCREAMING_SNAKE_CASE")]
        pub enum PlayerState {
            Idle,
            Playing,
            Paused,
            Buffering,

            #[serde(untagged, skip_serializing)]
            Unknown(String),
        }

        #[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
        #[serde(rename_all = "SCREAMING_SNAKE_CASE")]
        pub enum StreamType {
            Buffered,
            Live,
            Other,

            #[serde(untagged, skip_serializing)]
            Unknown(String),
        }

        #[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
        #[serde(rename_all = "SCREAMING_SNAKE_CASE")]
        pub enum RepeatMode {
            #[serde(rename = "REPEAT_OFF")]
            Off,

            #[serde(rename = "REPEAT_ALL")]
            All,

            #[serde(rename = "REPEAT_ALL_AND_SHUFFLE")]
            AllAndShuffle,

            #[serde(rename = "REPEAT_SINGLE")]
            Single,

            #[serde(untagged, skip_serializing)]
            Unknown(String),
        }

        impl Default for RepeatMode {
            fn default() -> RepeatMode {
                RepeatMode::Off
            }
        }

        #[derive(Debug, Serialize)]
        #[serde(rename_all = "camelCase")]
        pub struct MediaRequestCommon {
            pub custom_data: CustomData,
            pub media_session_id: MediaSessionId,
        }

        #[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
        #[serde(transparent)]
        pub struct CustomData(pub serde_json::Value);

        impl Default for CustomData {
            fn default() -> CustomData {
                CustomData::new()
            }
        }

        impl CustomData {
            pub fn new() -> CustomData {
                CustomData(serde_json::Value::Null)
            }
        }

        pub type ItemId = i32;
        pub type Seconds = f64;

        pub type MimeType = String;
    }
    pub use self::shared::*;

    pub mod small_debug {
        use crate::util::fmt::{opt_field, DebugNoAlternate};
        use super::*;

        pub struct MediaStatus<'a>(pub &'a super::Status);
        pub struct MediaStatusEntries<'a>(pub &'a [super::StatusEntry]);
        pub struct MediaStatusEntry<'a>(pub &'a super::StatusEntry);
        pub struct Metadata<'a>(pub &'a super::Metadata);

        impl<'a> Debug for MediaStatus<'a> {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.debug_struct("media::Status")
                    .field("entries", &MediaStatusEntries(&self.0.entries))
                    .finish()
            }
        }

        impl<'a> Debug for MediaStatusEntries<'a> {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                let mut d = f.debug_list();
                for item in self.0 {
                    d.entry(&MediaStatusEntry(item));
                }
                d.finish()
            }
        }

        impl<'a> Debug for MediaStatusEntry<'a> {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.debug_struct("MediaStatusEntry")
                    .field("media_session_id", &self.0.media_session_id)
                    .field("player_state", &self.0.player_state)
                    .field("current_time",
                           &DebugNoAlternate(&self.0.current_time))
                    .field("idle_reason",
                           &DebugNoAlternate(&self.0.idle_reason))
                    .field("media",
                           &self.0.media.as_ref().map(|m| &m.content_id))
                    .field("metadata",
                           &self.0.media.as_ref()
                                .and_then(|m| m.metadata.as_ref())
                                .map(Metadata))
                    .finish()
            }
        }

        impl<'a> Debug for Metadata<'a> {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                let mut s = f.debug_struct("Metadata");

                opt_field(&mut s, "artist", &self.0.artist);
                opt_field(&mut s, "album_name", &self.0.album_name);
                opt_field(&mut s, "title", &self.0.title);
                opt_field(&mut s, "subtitle", &self.0.subtitle);

                s.finish()
            }
        }
    }

    macro_rules! simple_media_request {
        ($name: ident, $msg_type_name: path) => {
            #[derive(Debug, Serialize)]
            pub struct $name(pub MediaRequestCommon);

            impl RequestInner for $name {
                const CHANNEL_NAMESPACE: NamespaceConst = CHANNEL_NAMESPACE;
                const TYPE_NAME: MessageTypeConst = $msg_type_name;
            }
        };
    }



    #[skip_serializing_none]
    #[derive(Debug, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct LoadRequest {
        #[serde(flatten)]
        pub args: LoadRequestArgs,

        #[serde(rename = "sessionId")]
        pub app_session_id: AppSessionId,
    }

    #[skip_serializing_none]
    #[derive(Debug, Deserialize, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct LoadRequestArgs {
        pub autoplay: Option<bool>,
        pub current_time: Option<Seconds>,
        pub custom_data: CustomData,
        pub media: Media,
        pub playback_rate: Option<f64>,
    }

    impl RequestInner for LoadRequest {
        const CHANNEL_NAMESPACE: NamespaceConst = CHANNEL_NAMESPACE;
        const TYPE_NAME: MessageTypeConst = MESSAGE_REQUEST_TYPE_LOAD;
    }

    impl LoadRequestArgs {
        pub fn from_media(media: Media) -> LoadRequestArgs {
            LoadRequestArgs {
                media,
                autoplay: Some(true),
                current_time: None,
                custom_data: CustomData::default(),
                playback_rate: None,
            }
        }

        pub fn from_url(url: &str) -> LoadRequestArgs {
            Self::from_media(Media::from_url(url))
        }
    }

    #[derive(Debug, Deserialize)]
    #[serde(tag = "type",
            rename_all = "camelCase")]
    pub enum LoadResponse {
        #[serde(rename = "MEDIA_STATUS")]
        Ok(Status),

        #[serde(rename = "LOAD_CANCELLED")]
        LoadCancelled,

        #[serde(rename = "LOAD_FAILED")]
        LoadFailed,

        #[serde(rename = "INVALID_PLAYER_STATE")]
        InvalidPlayerState,

        #[serde(rename = "INVALID_REQUEST")]
        InvalidRequest { reason: String },
    }

    impl ResponseInner for LoadResponse {
        const CHANNEL_NAMESPACE: NamespaceConst = CHANNEL_NAMESPACE;
        const TYPE_NAMES: &'static [MessageTypeConst] = &[
            MESSAGE_RESPONSE_TYPE_MEDIA_STATUS,
            MESSAGE_RESPONSE_TYPE_LOAD_CANCELLED,
            MESSAGE_RESPONSE_TYPE_LOAD_FAILED,
            MESSAGE_RESPONSE_TYPE_INVALID_PLAYER_STATE,
            MESSAGE_RESPONSE_TYPE_INVALID_REQUEST,
        ];
    }



    #[derive(Debug, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct GetStatusRequest {
        pub media_session_id: Option<MediaSessionId>,
    }

    impl RequestInner for GetStatusRequest {
        const CHANNEL_NAMESPACE: NamespaceConst = CHANNEL_NAMESPACE;
        const TYPE_NAME: MessageTypeConst = MESSAGE_REQUEST_TYPE_GET_STATUS;
    }

    #[derive(Debug, Deserialize)]
    #[serde(tag = "type",
            rename_all = "camelCase")]
    pub enum GetStatusResponse {
        #[serde(rename = "MEDIA_STATUS")]
        Ok(Status),

        #[serde(rename = "INVALID_PLAYER_STATE")]
        InvalidPlayerState,

        #[serde(rename = "INVALID_REQUEST")]
        InvalidRequest { reason: String },
    }

    impl ResponseInner for GetStatusResponse {
        const CHANNEL_NAMESPACE: NamespaceConst = CHANNEL_NAMESPACE;
        const TYPE_NAMES: &'static [MessageTypeConst] = &[
            MESSAGE_RESPONSE_TYPE_MEDIA_STATUS,
            MESSAGE_RESPONSE_TYPE_INVALID_PLAYER_STATE,
            MESSAGE_RESPONSE_TYPE_INVALID_REQUEST,
        ];
    }



    #[skip_serializing_none]
    #[derive(Debug, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct QueueLoadRequest {
        #[serde(flatten)]
        pub args: QueueLoadRequestArgs,

        #[serde(rename = "sessionId")]
        pub app_session_id: AppSessionId,
    }

    #[skip_serializing_none]
    #[derive(Debug, Deserialize, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct QueueLoadRequestArgs {
        pub current_time: Option<Seconds>,
        pub custom_data: CustomData,
        pub items: Vec<QueueItem>,
        pub repeat_mode: Option<RepeatMode>,

        /// Treated as 0 if None.
        pub start_index: Option<u32>,
    }

    impl RequestInner for QueueLoadRequest {
        const CHANNEL_NAMESPACE: NamespaceConst = CHANNEL_NAMESPACE;
        const TYPE_NAME: MessageTypeConst = MESSAGE_REQUEST_TYPE_QUEUE_LOAD;
    }

    impl QueueLoadRequestArgs {
        pub fn from_items(items: Vec<QueueItem>) -> QueueLoadRequestArgs {
            QueueLoadRequestArgs {
                current_time: None,
                custom_data: CustomData::default(),
                items,
                repeat_mode: None,
                start_index: None,
            }
        }
    }



    #[skip_serializing_none]
    #[derive(Debug, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct QueueUpdateRequest {
        #[serde(flatten)]
        pub args: QueueUpdateRequestArgs,

        pub media_session_id: MediaSessionId,
    }

    #[skip_serializing_none]
    #[derive(Debug, Deserialize, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct QueueUpdateRequestArgs {
        pub current_item_id: Option<ItemId>,
        pub current_time: Option<Seconds>,
        pub custom_data: CustomData,

        /// Play the item forward or back by this offset in the queue items
        /// list.
        pub jump: Option<i32>,
        pub repeat_mode: Option<RepeatMode>,
    }

    impl RequestInner for QueueUpdateRequest {
        const CHANNEL_NAMESPACE: NamespaceConst = CHANNEL_NAMESPACE;
        const TYPE_NAME: MessageTypeConst = MESSAGE_REQUEST_TYPE_QUEUE_UPDATE;
    }

    impl QueueUpdateRequestArgs {
        pub fn jump_item(item_id: ItemId) -> QueueUpdateRequestArgs {
            QueueUpdateRequestArgs {
                current_item_id: Some(item_id),
                .. Self::empty()
            }
        }

        pub fn jump_next() -> QueueUpdateRequestArgs {
            Self::jump_offset(1)
        }

        pub fn jump_offset(offset: i32) -> QueueUpdateRequestArgs {
            QueueUpdateRequestArgs {
                jump: Some(offset),
                .. Self::empty()
            }
        }

        pub fn jump_prev() -> QueueUpdateRequestArgs {
            Self::jump_offset(-1)
        }

        pub fn empty() -> QueueUpdateRequestArgs {
            QueueUpdateRequestArgs {
                current_item_id: None,
                current_time: None,
                custom_data: CustomData::default(),
                jump: None,
                repeat_mode: None,
            }
        }
    }



    #[derive(Debug, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct SeekRequest {
        pub media_session_id: MediaSessionId,
        pub custom_data: CustomData,

        pub current_time: Option<Seconds>,
        pub resume_state: Option<ResumeState>,
    }

    impl RequestInner for SeekRequest {
        const CHANNEL_NAMESPACE: NamespaceConst = CHANNEL_NAMESPACE;
        const TYPE_NAME: MessageTypeConst = MESSAGE_REQUEST_TYPE_SEEK;
    }

    #[derive(Clone, Copy, Debug, Serialize)]
    pub enum ResumeState {
        #[serde(rename = "PLAYBACK_PAUSE")]
        Pause,

        #[serde(rename = "PLAYBACK_START")]
        Start,
    }


    #[skip_serializing_none]
    #[derive(Debug, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct SetPlaybackRateRequest {
        pub media_session_id: MediaSessionId,

        #[serde(flatten)]
        pub args: SetPlaybackRateRequestArgs,
    }

    #[skip_serializing_none]
    #[derive(Debug, Deserialize, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct SetPlaybackRateRequestArgs {
        pub custom_data: CustomData,

        pub playback_rate: Option<f64>,

        /// Only used if `playback_rate` is `None`.
        pub relative_playback_rate: Option<f64>,
    }

    impl RequestInner for SetPlaybackRateRequest {
        const CHANNEL_NAMESPACE: NamespaceConst = CHANNEL_NAMESPACE;
        const TYPE_NAME: MessageTypeConst = MESSAGE_REQUEST_TYPE_SET_PLAYBACK_RATE;
    }



    simple_media_request!(PlayRequest,  MESSAGE_REQUEST_TYPE_PLAY);
    simple_media_request!(PauseRequest, MESSAGE_REQUEST_TYPE_PAUSE);
    simple_media_request!(StopRequest,  MESSAGE_REQUEST_TYPE_STOP);
}

pub mod receiver {
    use super::*;
    use std::collections::HashMap;

    pub const CHANNEL_NAMESPACE: NamespaceConst = "urn:x-cast:com.google.cast.receiver";

    pub const MESSAGE_REQUEST_TYPE_LAUNCH: MessageTypeConst = "LAUNCH";
    pub const MESSAGE_REQUEST_TYPE_STOP: MessageTypeConst = "STOP";
    pub const MESSAGE_REQUEST_TYPE_GET_STATUS: MessageTypeConst = "GET_STATUS";
    pub const MESSAGE_REQUEST_TYPE_SET_VOLUME: MessageTypeConst = "SET_VOLUME";
    pub const MESSAGE_REQUEST_TYPE_GET_APP_AVAILABILITY: MessageTypeConst
        = "GET_APP_AVAILABILITY";

    pub const MESSAGE_RESPONSE_TYPE_RECEIVER_STATUS: MessageTypeConst = "RECEIVER_STATUS";
    pub const MESSAGE_RESPONSE_TYPE_LAUNCH_ERROR: MessageTypeConst = "LAUNCH_ERROR";
    pub const MESSAGE_RESPONSE_TYPE_INVALID_REQUEST: MessageTypeConst = "INVALID_REQUEST";

    mod shared {
        use super::*;

        #[derive(Clone, Debug, Deserialize, Serialize)]
        #[serde(rename_all = "camelCase")]
        pub struct StatusWrapper {
            pub status: Status,
        }

        #[derive(Clone, Debug, Deserialize, Serialize)]
        #[serde(rename_all = "camelCase")]
        pub struct Status {
            #[serde(default)]
            pub applications: Vec<Application>,

            #[serde(default)]
            pub is_active_input: bool,

            #[serde(default)]
            pub is_stand_by: bool,

            /// Volume parameters of the currently active cast device.
            pub volume: Volume,
        }

        #[derive(Clone, Debug, Deserialize, Serialize)]
        #[serde(rename_all = "camelCase")]
        pub struct Application {
            pub app_id: AppId,

            #[serde(rename = "sessionId")]
            pub app_session_id: AppSessionId,
            pub transport_id: crate::message::EndpointId,

            #[serde(default)]
            pub namespaces: Vec<AppNamespace>,

            #[serde(default)]
            pub display_name: String,

            #[serde(default)]
            pub status_text: String,

            #[serde(default)]
            pub is_idle_screen: bool,
        }

        impl Application {
            pub fn has_namespace(&self, ns: &str) -> bool {
                self.namespaces.iter().any(|app_ns| app_ns == ns)
            }
        }

        #[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
        #[serde(rename_all = "camelCase")]
        pub struct AppNamespace {
            pub name: std::borrow::Cow<'static, str>,
        }

        impl AppNamespace {
            pub const fn from_const(s: &'static str) -> AppNamespace {
                AppNamespace {
                    name: std::borrow::Cow::Borrowed(s),
                }
            }
        }

        impl From<&str> for AppNamespace {
            fn from(s: &str) -> AppNamespace {
                AppNamespace::from(s.to_string())
            }
        }

        impl From<String> for AppNamespace {
            fn from(s: String) -> AppNamespace {
                AppNamespace { name: s.into() }
            }
        }

        impl PartialEq<str> for AppNamespace {
            fn eq(&self, other: &str) -> bool {
                self.name == other
            }
        }

        impl PartialEq<AppNamespace> for str {
            fn eq(&self, other: &AppNamespace) -> bool {
                self == other.name
            }
        }

        /// Volume options of a cast device or a multizone member.
        #[skip_serializing_none]
        #[derive(Clone, Debug, Deserialize, Serialize)]
        #[serde(rename_all = "camelCase")]
        pub struct Volume {
            /// Volume level in `[0, 1]`.
            pub level: Option<f32>,
            /// Mute/unmute state.
            pub muted: Option<bool>,

            pub control_type: Option<String>,
            pub step_interval: Option<f32>,
        }

        impl Volume {
            pub fn from_level(level: f32) -> Volume {
                Volume {
                    level: Some(level),
                    muted: None,
                    control_type: None,
                    step_interval: None,
                }
            }

            pub fn from_muted(muted: bool) -> Volume {
                Volume {
                    level: None,
                    muted: Some(muted),
                    control_type: None,
                    step_interval: None,
                }
            }
        }
    }
    pub use self::shared::*;

    pub mod small_debug {
        use super::*;

        pub struct ReceiverStatus<'a>(pub &'a super::Status);
        pub struct Applications<'a>(pub &'a [super::Application]);
        pub struct Application<'a>(pub &'a super::Application);
        pub struct Volume<'a>(pub &'a super::Volume);

        impl<'a> Debug for ReceiverStatus<'a> {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.debug_struct("receiver::Status")
                    .field("applications", &Applications(&self.0.applications))
                    .field("volume", &Volume(&self.0.volume))
                    .finish()
            }
        }

        impl<'a> Debug for Applications<'a> {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                let mut d = f.debug_list();
                for item in self.0 {
                    d.entry(&Application(item));
                }
                d.finish()
            }
        }

        impl<'a> Debug for Application<'a> {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.debug_struct("Application")
                    .field("app_id", &self.0.app_id)
                    .field("app_session_id", &self.0.app_session_id)
                    .field("display_name", &self.0.display_name)
                    .field("status_text", &self.0.status_text)
                    .finish()
            }
        }

        impl<'a> Debug for Volume<'a> {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                write!(f, "Volume {{ level: {level}, muted: {muted} }}",
                       level = match self.0.level {
                           None => "None".to_string(),
                           Some(l) => format!("{l:.2}"),
                       },
                       muted = match self.0.muted {
                           None => "None".to_string(),
                           Some(m) => format!("{m}"),
                       })
            }
        }
    }

    #[derive(Debug, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct GetStatusRequest {}

    impl RequestInner for GetStatusRequest {
        const CHANNEL_NAMESPACE: NamespaceConst = CHANNEL_NAMESPACE;
        const TYPE_NAME: MessageTypeConst = MESSAGE_REQUEST_TYPE_GET_STATUS;
    }

    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct GetStatusResponse(pub StatusWrapper);

    impl ResponseInner for GetStatusResponse {
        const CHANNEL_NAMESPACE: NamespaceConst = CHANNEL_NAMESPACE;
        const TYPE_NAMES: &'static [MessageTypeConst] = &[MESSAGE_RESPONSE_TYPE_RECEIVER_STATUS];
    }



    #[derive(Debug, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct LaunchRequest {
        pub app_id: AppId,
    }

    impl RequestInner for LaunchRequest {
        const CHANNEL_NAMESPACE: NamespaceConst = CHANNEL_NAMESPACE;
        const TYPE_NAME: MessageTypeConst = MESSAGE_REQUEST_TYPE_LAUNCH;
    }

    #[derive(Debug, Deserialize)]
    #[serde(tag = "type",
            rename_all = "camelCase")]
    pub enum LaunchResponse {
        #[serde(rename = "RECEIVER_STATUS")]
        Ok(StatusWrapper),

        #[serde(rename = "LAUNCH_ERROR")]
        Error {
            reason: String,
        },

        #[serde(rename = "INVALID_REQUEST")]
        InvalidRequest {
            reason: String,
        },
    }

    impl ResponseInner for LaunchResponse {
        const CHANNEL_NAMESPACE: NamespaceConst = CHANNEL_NAMESPACE;
        const TYPE_NAMES: &'static [MessageTypeConst] = &[
            MESSAGE_RESPONSE_TYPE_INVALID_REQUEST,
            MESSAGE_RESPONSE_TYPE_LAUNCH_ERROR,
            MESSAGE_RESPONSE_TYPE_RECEIVER_STATUS,
        ];
    }



    #[derive(Debug, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct StopRequest {
        #[serde(rename = "sessionId")]
        pub app_session_id: AppSessionId,
    }

    impl RequestInner for StopRequest {
        const CHANNEL_NAMESPACE: NamespaceConst = CHANNEL_NAMESPACE;
        const TYPE_NAME: MessageTypeConst = MESSAGE_REQUEST_TYPE_STOP;
    }

    #[derive(Debug, Deserialize)]
    #[serde(tag = "type",
            rename_all = "camelCase")]
    pub enum StopResponse {
        #[serde(rename = "RECEIVER_STATUS")]
        Ok(StatusWrapper),

        #[serde(rename = "INVALID_REQUEST")]
        InvalidRequest {
            reason: String,
        },
    }

    impl ResponseInner for StopResponse {
        const CHANNEL_NAMESPACE: NamespaceConst = CHANNEL_NAMESPACE;
        const TYPE_NAMES: &'static [MessageTypeConst] = &[
            MESSAGE_RESPONSE_TYPE_RECEIVER_STATUS,
            MESSAGE_RESPONSE_TYPE_INVALID_REQUEST,
        ];
    }



    #[derive(Debug, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct SetVolumeRequest {
        pub volume: Volume,
    }

    impl RequestInner for SetVolumeRequest {
        const CHANNEL_NAMESPACE: NamespaceConst = CHANNEL_NAMESPACE;
        const TYPE_NAME: MessageTypeConst = MESSAGE_REQUEST_TYPE_SET_VOLUME;
    }

    #[derive(Debug, Deserialize)]
    #[serde(tag = "type",
            rename_all = "camelCase")]
    pub enum SetVolumeResponse {
        #[serde(rename = "RECEIVER_STATUS")]
        Ok(StatusWrapper),

        #[serde(rename = "INVALID_REQUEST")]
        InvalidRequest {
            reason: String,
        },
    }

    impl ResponseInner for SetVolumeResponse {
        const CHANNEL_NAMESPACE: NamespaceConst = CHANNEL_NAMESPACE;
        const TYPE_NAMES: &'static [MessageTypeConst] = &[
            MESSAGE_RESPONSE_TYPE_RECEIVER_STATUS,
            MESSAGE_RESPONSE_TYPE_INVALID_REQUEST,
        ];
    }



    #[derive(Debug, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct AppAvailabilityRequest {
        pub app_id: Vec<AppId>,
    }

    impl RequestInner for AppAvailabilityRequest {
        const CHANNEL_NAMESPACE: NamespaceConst = CHANNEL_NAMESPACE;
        const TYPE_NAME: MessageTypeConst = MESSAGE_REQUEST_TYPE_GET_APP_AVAILABILITY;
    }

    #[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
    pub enum AppAvailability {
        #[serde(rename = "APP_AVAILABLE")]
        Available,

        #[serde(rename = "APP_UNAVAILABLE")]
        Unavailable,

        #[serde(untagged, skip_serializing)]
        Unknown(String),
    }

    impl AppAvailability {
        pub fn is_available(&self) -> bool {
            matches!(self, AppAvailability::Available)
        }
    }

    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct AppAvailabilityResponse {
        #[serde(default)]
        pub availability: HashMap<AppId, AppAvailability>,
    }

    impl ResponseInner for AppAvailabilityResponse {
        const CHANNEL_NAMESPACE: NamespaceConst = CHANNEL_NAMESPACE;
        const TYPE_NAMES: &'static [MessageTypeConst] = &[
            MESSAGE_REQUEST_TYPE_GET_APP_AVAILABILITY,
        ];
    }
}

/// Messages for multizone (audio group) receivers: per-member volume and
/// membership events.
pub mod multizone {
    use super::*;

    pub const CHANNEL_NAMESPACE: NamespaceConst = "urn:x-cast:com.google.cast.multizone";

    pub const MESSAGE_REQUEST_TYPE_GET_STATUS: MessageTypeConst = "GET_STATUS";
    pub const MESSAGE_REQUEST_TYPE_SET_VOLUME: MessageTypeConst = "SET_VOLUME";

    pub const MESSAGE_RESPONSE_TYPE_MULTIZONE_STATUS: MessageTypeConst = "MULTIZONE_STATUS";
    pub const MESSAGE_TYPE_DEVICE_ADDED: MessageTypeConst = "DEVICE_ADDED";
    pub const MESSAGE_TYPE_DEVICE_UPDATED: MessageTypeConst = "DEVICE_UPDATED";
    pub const MESSAGE_TYPE_DEVICE_REMOVED: MessageTypeConst = "DEVICE_REMOVED";

    #[derive(Clone, Debug, Deserialize, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct Status {
        #[serde(default)]
        pub devices: Vec<Device>,
    }

    #[derive(Clone, Debug, Deserialize, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct Device {
        pub device_id: String,

        #[serde(default)]
        pub name: String,

        #[serde(default)]
        pub capabilities: u32,

        pub volume: receiver::Volume,
    }

    #[derive(Debug, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct GetStatusRequest {}

    impl RequestInner for GetStatusRequest {
        const CHANNEL_NAMESPACE: NamespaceConst = CHANNEL_NAMESPACE;
        const TYPE_NAME: MessageTypeConst = MESSAGE_REQUEST_TYPE_GET_STATUS;
    }

    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct GetStatusResponse {
        pub status: Status,
    }

    impl ResponseInner for GetStatusResponse {
        const CHANNEL_NAMESPACE: NamespaceConst = CHANNEL_NAMESPACE;
        const TYPE_NAMES: &'static [MessageTypeConst] = &[
            MESSAGE_RESPONSE_TYPE_MULTIZONE_STATUS,
        ];
    }

    /// `SET_VOLUME` scoped to a single group member.
    #[derive(Debug, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct SetVolumeRequest {
        pub device_id: String,
        pub volume: receiver::Volume,
    }

    impl RequestInner for SetVolumeRequest {
        const CHANNEL_NAMESPACE: NamespaceConst = CHANNEL_NAMESPACE;
        const TYPE_NAME: MessageTypeConst = MESSAGE_REQUEST_TYPE_SET_VOLUME;
    }

    // Unsolicited membership events; routed by `type`, never correlated.

    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct StatusPayload {
        pub status: Status,
    }

    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct DevicePayload {
        pub device: Device,
    }

    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct DeviceRemovedPayload {
        pub device_id: String,
    }
}

/// One-shot device information queries.
pub mod discovery {
    use super::*;

    pub const CHANNEL_NAMESPACE: NamespaceConst = "urn:x-cast:com.google.cast.discovery";

    pub const MESSAGE_REQUEST_TYPE_GET_DEVICE_INFO: MessageTypeConst = "GET_DEVICE_INFO";
    pub const MESSAGE_RESPONSE_TYPE_DEVICE_INFO: MessageTypeConst = "DEVICE_INFO";

    #[derive(Debug, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct GetDeviceInfoRequest {}

    impl RequestInner for GetDeviceInfoRequest {
        const CHANNEL_NAMESPACE: NamespaceConst = CHANNEL_NAMESPACE;
        const TYPE_NAME: MessageTypeConst = MESSAGE_REQUEST_TYPE_GET_DEVICE_INFO;
    }

    /// The device info schema varies by firmware; kept dynamic.
    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct DeviceInfoResponse {
        #[serde(default)]
        pub device_info: serde_json::Value,
    }

    impl ResponseInner for DeviceInfoResponse {
        const CHANNEL_NAMESPACE: NamespaceConst = CHANNEL_NAMESPACE;
        const TYPE_NAMES: &'static [MessageTypeConst] = &[
            MESSAGE_RESPONSE_TYPE_DEVICE_INFO,
        ];
    }
}

/// Device setup queries (config and per-app device id).
pub mod setup {
    use super::*;

    pub const CHANNEL_NAMESPACE: NamespaceConst = "urn:x-cast:com.google.cast.setup";

    pub const MESSAGE_REQUEST_TYPE_GET_DEVICE_CONFIG: MessageTypeConst = "GET_DEVICE_CONFIG";
    pub const MESSAGE_REQUEST_TYPE_GET_APP_DEVICE_ID: MessageTypeConst = "GET_APP_DEVICE_ID";

    #[derive(Debug, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct GetDeviceConfigRequest {}

    impl RequestInner for GetDeviceConfigRequest {
        const CHANNEL_NAMESPACE: NamespaceConst = CHANNEL_NAMESPACE;
        const TYPE_NAME: MessageTypeConst = MESSAGE_REQUEST_TYPE_GET_DEVICE_CONFIG;
    }

    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct DeviceConfigResponse {
        #[serde(flatten)]
        pub config: serde_json::Value,
    }

    impl ResponseInner for DeviceConfigResponse {
        const CHANNEL_NAMESPACE: NamespaceConst = CHANNEL_NAMESPACE;
        const TYPE_NAMES: &'static [MessageTypeConst] = &[
            MESSAGE_REQUEST_TYPE_GET_DEVICE_CONFIG,
        ];
    }

    #[derive(Debug, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct GetAppDeviceIdRequest {
        pub app_id: AppId,
    }

    impl RequestInner for GetAppDeviceIdRequest {
        const CHANNEL_NAMESPACE: NamespaceConst = CHANNEL_NAMESPACE;
        const TYPE_NAME: MessageTypeConst = MESSAGE_REQUEST_TYPE_GET_APP_DEVICE_ID;
    }

    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct AppDeviceIdResponse {
        #[serde(flatten)]
        pub info: serde_json::Value,
    }

    impl ResponseInner for AppDeviceIdResponse {
        const CHANNEL_NAMESPACE: NamespaceConst = CHANNEL_NAMESPACE;
        const TYPE_NAMES: &'static [MessageTypeConst] = &[
            MESSAGE_REQUEST_TYPE_GET_APP_DEVICE_ID,
        ];
    }
}

/// The deviceauth namespace carries protobuf (`BINARY`) payloads only; its
/// messages live in [`crate::cast::cast_channel`].
pub mod deviceauth {
    use super::NamespaceConst;

    pub const CHANNEL_NAMESPACE: NamespaceConst = "urn:x-cast:com.google.cast.tp.deviceauth";
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_id_gen_seeded() {
        let gen = RequestIdGen::with_seed(5);
        assert_eq!(gen.take_next().inner(), 5);
        assert_eq!(gen.take_next().inner(), 6);
        assert_eq!(gen.take_next().inner(), 7);
    }

    #[test]
    fn request_id_gen_overflow_skips_broadcast() {
        let gen = RequestIdGen::with_seed(u32::MAX);
        assert_eq!(gen.take_next().inner(), u32::MAX);
        // Wraps to 0, which is reserved for broadcasts, so 1 comes next.
        assert_eq!(gen.take_next().inner(), 1);
        assert_eq!(gen.take_next().inner(), 2);
    }

    #[test]
    fn request_id_gen_random_seed_in_range() {
        for _ in 0..100 {
            // Seeds are drawn from [0, SEED_RANGE); a 0 seed yields 1.
            let first = RequestIdGen::new().take_next().inner();
            assert!(first >= 1 && first < RequestIdGen::SEED_RANGE,
                    "first id {first} outside expected range");
        }
    }

    #[test]
    fn launch_request_envelope() {
        let payload = Payload {
            request_id: Some(RequestId(3)),
            typ: receiver::LaunchRequest::TYPE_NAME.to_string(),
            inner: receiver::LaunchRequest {
                app_id: "CC1AD845".to_string(),
            },
        };

        let value = serde_json::to_value(&payload).unwrap();
        assert_eq!(value, json!({
            "type": "LAUNCH",
            "requestId": 3,
            "appId": "CC1AD845",
        }));
    }

    #[test]
    fn pong_envelope_omits_request_id() {
        let payload = Payload {
            request_id: None,
            typ: heartbeat::MESSAGE_TYPE_PONG.to_string(),
            inner: heartbeat::Pong {},
        };

        let value = serde_json::to_value(&payload).unwrap();
        assert_eq!(value, json!({"type": "PONG"}));
    }

    #[test]
    fn load_request_json_shape() {
        let args = media::LoadRequestArgs::from_media(
            media::Media::from_url("http://x/y.mp3")
                .with_content_type("audio/mpeg")
                .with_stream_type(media::StreamType::Live));

        let payload = Payload {
            request_id: Some(RequestId(8)),
            typ: media::LoadRequest::TYPE_NAME.to_string(),
            inner: media::LoadRequest {
                args,
                app_session_id: "S".to_string(),
            },
        };

        let value = serde_json::to_value(&payload).unwrap();
        assert_eq!(value["type"], "LOAD");
        assert_eq!(value["sessionId"], "S");
        assert_eq!(value["autoplay"], true);
        assert_eq!(value["media"]["contentId"], "http://x/y.mp3");
        assert_eq!(value["media"]["contentType"], "audio/mpeg");
        assert_eq!(value["media"]["streamType"], "LIVE");
    }

    #[test]
    fn receiver_status_parses_minimal_json() {
        let raw = json!({
            "type": "RECEIVER_STATUS",
            "requestId": 0,
            "status": {
                "volume": {"level": 0.5, "muted": false},
                "applications": [],
            },
        });

        let wrapper: receiver::StatusWrapper = serde_json::from_value(raw).unwrap();
        assert_eq!(wrapper.status.volume.level, Some(0.5));
        assert_eq!(wrapper.status.volume.muted, Some(false));
        assert!(wrapper.status.applications.is_empty());
    }

    #[test]
    fn media_status_parses_minimal_entry() {
        let raw = json!({
            "type": "MEDIA_STATUS",
            "requestId": 2,
            "status": [
                {"mediaSessionId": 7, "playerState": "PLAYING"},
            ],
        });

        let status: media::Status = serde_json::from_value(raw).unwrap();
        assert_eq!(status.first_media_session_id(), Some(7));
        assert_eq!(status.entries[0].player_state, media::PlayerState::Playing);
        assert_eq!(status.entries[0].playback_rate, 1.0);
    }

    #[test]
    fn unknown_player_state_is_tolerated() {
        let raw = json!({
            "status": [
                {"mediaSessionId": 1, "playerState": "DREAMING"},
            ],
        });

        let status: media::Status = serde_json::from_value(raw).unwrap();
        assert_eq!(status.entries[0].player_state,
                   media::PlayerState::Unknown("DREAMING".to_string()));
    }

    #[test]
    fn app_availability_response_parses() {
        let raw = json!({
            "type": "GET_APP_AVAILABILITY",
            "requestId": 4,
            "availability": {
                "CC1AD845": "APP_AVAILABLE",
                "ZZZZZZZZ": "APP_UNAVAILABLE",
            },
        });

        let resp: receiver::AppAvailabilityResponse = serde_json::from_value(raw).unwrap();
        assert!(resp.availability["CC1AD845"].is_available());
        assert!(!resp.availability["ZZZZZZZZ"].is_available());
    }

    #[test]
    fn multizone_set_volume_json_shape() {
        let payload = Payload {
            request_id: Some(RequestId(9)),
            typ: multizone::SetVolumeRequest::TYPE_NAME.to_string(),
            inner: multizone::SetVolumeRequest {
                device_id: "dev-1".to_string(),
                volume: receiver::Volume::from_level(0.25),
            },
        };

        let value = serde_json::to_value(&payload).unwrap();
        assert_eq!(value, json!({
            "type": "SET_VOLUME",
            "requestId": 9,
            "deviceId": "dev-1",
            "volume": {"level": 0.25},
        }));
    }
}
