//! The engine facade: one TLS connection to a cast device, driven by a
//! single I/O task that owns the framed stream, the pending-request map and
//! the heartbeat timers.

use crate::{
    cast::cast_channel,
    codec::CastMessageCodec,
    message::{CastMessage, CastMessagePayload, EndpointId},
    payload::{self,
              media, multizone, receiver,
              Payload, PayloadDyn, RequestId, RequestIdGen,
              RequestInner, ResponseInner},
    status::{CastApp, CastMediaStatus, CastMultizoneDevice, CastMultizoneStatus, CastStatus},
    types::{AppId, CastDevice, MediaSessionId, MessageTypeConst, NamespaceConst},
    util::named,
    Error, Result,
};
use futures::{
    future::Either, SinkExt, StreamExt,
    stream::{SplitSink, SplitStream},
};
use once_cell::sync::Lazy;
use pin_project_lite::pin_project;
use protobuf::Message;
use serde::Deserialize;
use std::{
    any::{self, Any},
    collections::{HashMap, HashSet},
    fmt::Debug,
    net::{IpAddr, SocketAddr},
    pin::Pin,
    sync::{Arc, atomic::{AtomicUsize, Ordering}},
};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    pin,
    sync::{broadcast, mpsc, oneshot, watch},
    time::{Duration, Instant},
};
use tokio_stream::wrappers::IntervalStream;
use tokio_util::{
    codec::Framed,
    time::delay_queue::{DelayQueue, Expired as DelayExpired},
};

pub struct Client {
    /// Some(_) from `.connect()` until `.disconnect()`.
    task_join_handle: Option<tokio::task::JoinHandle<Result<()>>>,

    task_cmd_tx: Option<tokio::sync::mpsc::Sender<TaskCommand>>,

    next_command_id: AtomicUsize,

    /// Chosen once per client instance; every outbound message uses it as
    /// the source endpoint.
    sender: EndpointId,

    shared: Arc<Shared>,

    config: Arc<Config>,
}

#[derive(Clone, Debug)]
pub struct Config {
    pub addr: SocketAddr,

    /// `EndpointId` used as the sender, and source of messages we send.
    ///
    /// `None` generates `sender-<UUIDv4>` at client construction.
    pub sender: Option<EndpointId>,

    /// Fixes the first request id instead of drawing it randomly from
    /// `[0, 800)`. Test harnesses use this for determinism.
    pub request_id_seed: Option<u32>,
}

/// Lifecycle of the connection to one device.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ConnectionState {
    Disconnected,
    /// TCP + TLS in progress.
    Connecting,
    /// Transport open; auth and device CONNECT sent, awaiting the first PONG.
    Authenticating,
    Connected,
    Disconnecting,
}

/// Notifications delivered over the client's broadcast channel.
///
/// Emission never blocks the I/O task; a slow subscriber lags and drops the
/// oldest events.
#[derive(Clone, Debug)]
pub enum Event {
    WillConnect,
    DidConnect,
    DidDisconnect,
    ConnectionFailed(Error),
    DeviceStatusChanged(CastStatus),
    MediaStatusChanged(CastMediaStatus),
    MultizoneStatusChanged(CastMultizoneStatus),
}

/// State shared between the facade and the I/O task. Status fields are only
/// written from the task; the facade reads snapshots and hands out watch
/// subscriptions.
struct Shared {
    state_tx: watch::Sender<ConnectionState>,
    status_tx: watch::Sender<Option<CastStatus>>,
    media_status_tx: watch::Sender<Option<CastMediaStatus>>,
    multizone_status_tx: watch::Sender<Option<CastMultizoneStatus>>,
    connected_app_tx: watch::Sender<Option<CastApp>>,

    event_tx: broadcast::Sender<Event>,

    request_id_gen: RequestIdGen,
}

pin_project! {
    struct Task<S: TokioAsyncStream> {
        #[pin]
        conn_framed_sink: SplitSink<Framed<S, CastMessageCodec>, CastMessage>,

        #[pin]
        conn_framed_stream: MessageEventStream<S>,

        #[pin]
        task_cmd_rx: tokio_stream::wrappers::ReceiverStream<TaskCommand>,

        #[pin]
        timeout_queue: DelayQueue<RequestId>,

        #[pin]
        ping_interval: IntervalStream,

        #[pin]
        watchdog_interval: IntervalStream,

        need_flush: bool,
        requests_map: HashMap<RequestId, RequestState>,

        last_activity: Instant,
        got_pong: bool,

        sender: EndpointId,
        shared: Arc<Shared>,
    }
}

/// The framed read side, mapped to task events with an explicit EOF marker
/// so a half-closed socket is observed instead of silently going quiet.
type MessageEventStream<S> = futures::stream::Chain<
    futures::stream::Map<SplitStream<Framed<S, CastMessageCodec>>,
                         fn(Result<CastMessage>) -> TaskEvent>,
    futures::stream::Once<std::future::Ready<TaskEvent>>>;

#[derive(Debug)]
struct RequestState {
    response_ns: NamespaceConst,
    response_type_names: &'static [MessageTypeConst],
    delay_key: tokio_util::time::delay_queue::Key,

    #[allow(dead_code)] // Just for debugging for now.
    deadline: Instant,

    result_sender: TaskCommandResultSender,
}

#[derive(Debug)]
struct TaskCommandResultSender {
    command_id: CommandId,
    result_tx: oneshot::Sender<TaskCommandResult>,
}

#[derive(Debug)]
struct TaskCommand {
    command: TaskCommandType,
    result_sender: TaskCommandResultSender,
}

#[derive(Debug)]
enum TaskCommandType {
    CastRpc(Box<CastRpc>),
    CastSend(Box<CastSend>),
    SetConnectedApp(Option<CastApp>),
    Shutdown,
}

#[derive(Debug)]
struct CastRpc {
    request_message: CastMessage,
    request_id: RequestId,
    response_ns: NamespaceConst,
    response_type_names: &'static [MessageTypeConst],
}

#[derive(Debug)]
struct CastSend {
    request_message: CastMessage,
    request_id: RequestId,
}

#[derive(Debug)]
struct TaskResponseBox {
    type_name: &'static str,
    value: Box<dyn Any + Send + Sync>,
}

type TaskCommandResult = Result<TaskResponseBox>;

pub trait TokioAsyncStream: AsyncRead + AsyncWrite + Unpin {}

impl<T> TokioAsyncStream for T
where T: AsyncRead + AsyncWrite + Unpin
{}

type CommandId = usize;

/// Duration for the Task to do something locally. (Probably a bit high).
const LOCAL_TASK_COMMAND_TIMEOUT: Duration = Duration::from_millis(1_000);

/// Duration for an RPC request and response to the device.
const RPC_TIMEOUT: Duration = Duration::from_secs(30);

/// PING cadence, and how often the liveness watchdog looks at the clock.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);

/// The session is torn down when nothing arrives for this long.
const HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(20);

const DATA_BUFFER_LEN: usize = 64 * 1024;

const EVENT_CHANNEL_CAPACITY: usize = 32;

static JSON_NAMESPACES: Lazy<HashSet<NamespaceConst>> = Lazy::<HashSet<NamespaceConst>>::new(|| {
    HashSet::from([
        payload::connection::CHANNEL_NAMESPACE,
        payload::heartbeat::CHANNEL_NAMESPACE,
        payload::media::CHANNEL_NAMESPACE,
        payload::receiver::CHANNEL_NAMESPACE,
        payload::multizone::CHANNEL_NAMESPACE,
        payload::discovery::CHANNEL_NAMESPACE,
        payload::setup::CHANNEL_NAMESPACE,
    ])
});

/// Well known cast receiver app IDs
pub mod app {
    use crate::types::AppIdConst;

    pub const DEFAULT_MEDIA_RECEIVER: AppIdConst = "CC1AD845";
    pub const BACKDROP_ID: AppIdConst = "E8C28D3C";
    pub const YOUTUBE_ID: AppIdConst = "233637DE";
}

/// Envelope fields shared by every JSON payload. Parsed separately from the
/// full value because correlation needs `requestId` before the inner message
/// shape is known.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Envelope {
    #[serde(default)]
    request_id: Option<RequestId>,

    #[serde(rename = "type", default)]
    typ: Option<String>,
}

impl Config {
    pub fn new(addr: SocketAddr) -> Config {
        Config {
            addr,
            sender: None,
            request_id_seed: None,
        }
    }

    /// Config for a discovered device, resolving its host name.
    pub async fn for_device(device: &CastDevice) -> Result<Config> {
        Ok(Config::new(device.resolve_addr().await?))
    }

    /// Builds a client and connects it in one step.
    pub async fn connect(self) -> Result<Client> {
        let mut client = Client::new(self);
        client.connect().await?;
        Ok(client)
    }
}

impl Client {
    pub fn new(config: Config) -> Client {
        let sender = config.sender.clone().unwrap_or_else(
            || EndpointId::from(format!("sender-{}", uuid::Uuid::new_v4())));

        let request_id_gen = match config.request_id_seed {
            Some(seed) => RequestIdGen::with_seed(seed),
            None => RequestIdGen::new(),
        };

        let shared = Arc::new(Shared {
            state_tx: watch::channel(ConnectionState::Disconnected).0,
            status_tx: watch::channel(None).0,
            media_status_tx: watch::channel(None).0,
            multizone_status_tx: watch::channel(None).0,
            connected_app_tx: watch::channel(None).0,
            event_tx: broadcast::channel(EVENT_CHANNEL_CAPACITY).0,
            request_id_gen,
        });

        Client {
            task_join_handle: None,
            task_cmd_tx: None,
            next_command_id: AtomicUsize::new(1),
            sender,
            shared,
            config: Arc::new(config),
        }
    }

    /// The source endpoint id used for every message this client sends.
    pub fn sender_id(&self) -> &EndpointId {
        &self.sender
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.shared.event_tx.subscribe()
    }

    pub fn state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state_tx.subscribe()
    }

    pub fn status(&self) -> watch::Receiver<Option<CastStatus>> {
        self.shared.status_tx.subscribe()
    }

    pub fn media_status(&self) -> watch::Receiver<Option<CastMediaStatus>> {
        self.shared.media_status_tx.subscribe()
    }

    pub fn multizone_status(&self) -> watch::Receiver<Option<CastMultizoneStatus>> {
        self.shared.multizone_status_tx.subscribe()
    }

    pub fn connected_app(&self) -> watch::Receiver<Option<CastApp>> {
        self.shared.connected_app_tx.subscribe()
    }

    /// Opens TCP + TLS to the configured address and starts the I/O task.
    ///
    /// Resolves once the transport is open; `Event::DidConnect` (driven by
    /// the first heartbeat PONG) signals the session is fully up.
    #[named]
    pub async fn connect(&mut self) -> Result<()> {
        const METHOD_PATH: &str = method_path!("Client");

        if self.is_running() {
            return Err(Error::Session("already connected".to_string()));
        }

        self.shared.emit(Event::WillConnect);
        self.shared.set_state(ConnectionState::Connecting);

        let conn = match tls_connect(&self.config).await {
            Ok(conn) => conn,
            Err(err) => {
                tracing::warn!(target: METHOD_PATH,
                               ?err,
                               "connect failed");
                self.shared.emit(Event::ConnectionFailed(err.clone()));
                self.shared.set_state(ConnectionState::Disconnected);
                return Err(err);
            },
        };

        self.start_task(conn)
    }

    /// Starts the engine over an already-established stream.
    ///
    /// This is the seam the tests drive with in-memory duplex streams; it is
    /// also usable with externally negotiated transports.
    pub fn connect_via<S>(&mut self, conn: S) -> Result<()>
    where S: TokioAsyncStream + Send + 'static
    {
        if self.is_running() {
            return Err(Error::Session("already connected".to_string()));
        }

        self.shared.emit(Event::WillConnect);
        self.shared.set_state(ConnectionState::Connecting);

        self.start_task(conn)
    }

    fn start_task<S>(&mut self, conn: S) -> Result<()>
    where S: TokioAsyncStream + Send + 'static
    {
        // A previous task may have torn itself down (heartbeat timeout);
        // drop its remains before spawning a replacement.
        if let Some(handle) = self.task_join_handle.take() {
            handle.abort();
        }

        let (task_cmd_tx, task_cmd_rx) = mpsc::channel(/* buffer: */ 32);

        let task = Task::new(conn, task_cmd_rx,
                             Arc::clone(&self.shared), self.sender.clone());

        self.task_cmd_tx = Some(task_cmd_tx);
        self.task_join_handle = Some(tokio::spawn(task.main()));

        Ok(())
    }

    fn is_running(&self) -> bool {
        self.task_cmd_tx.as_ref().map(|tx| !tx.is_closed()).unwrap_or(false)
    }

    /// Tears the session down. Safe to call repeatedly; later calls are
    /// no-ops.
    #[named]
    pub async fn disconnect(&mut self) -> Result<()> {
        const METHOD_PATH: &str = method_path!("Client");

        let Some(join_fut) = self.task_join_handle.take() else {
            return Ok(());
        };

        // Best effort: the task may already be gone after a heartbeat
        // timeout or transport error.
        let _ = self.task_cmd::<()>(TaskCommandType::Shutdown).await;

        let abort = join_fut.abort_handle();
        match tokio::time::timeout(LOCAL_TASK_COMMAND_TIMEOUT, join_fut).await {
            Ok(Ok(Ok(()))) => {},
            Ok(Ok(Err(err))) =>
                tracing::warn!(target: METHOD_PATH,
                               ?err,
                               "task finished with error"),
            Ok(Err(join_err)) =>
                tracing::warn!(target: METHOD_PATH,
                               ?join_err,
                               "task join error"),
            Err(_elapsed) => {
                tracing::warn!(target: METHOD_PATH,
                               "task did not stop in time; aborting");
                abort.abort();
            },
        }

        self.task_cmd_tx = None;

        Ok(())
    }
}

/// Receiver-namespace operations.
impl Client {
    pub async fn receiver_status(&mut self) -> Result<CastStatus> {
        let payload_req = receiver::GetStatusRequest {};

        let resp: Payload<receiver::GetStatusResponse> =
            self.json_rpc(payload_req, EndpointId::PLATFORM_RECEIVER).await?;

        Ok(CastStatus::from(&resp.inner.0.status))
    }

    /// Launches `app_id`, joins the app's transport and returns the running
    /// app. The returned value is the parsed application entry, not the raw
    /// receiver response.
    #[named]
    pub async fn launch(&mut self, app_id: impl Into<AppId>) -> Result<CastApp> {
        const METHOD_PATH: &str = method_path!("Client");

        let app_id: AppId = app_id.into();
        let payload_req = receiver::LaunchRequest {
            app_id: app_id.clone(),
        };

        let resp: Payload<receiver::LaunchResponse> =
            self.json_rpc(payload_req, EndpointId::PLATFORM_RECEIVER).await?;

        let status = match resp.inner {
            receiver::LaunchResponse::Ok(wrapper) => wrapper.status,
            receiver::LaunchResponse::Error { reason }
            | receiver::LaunchResponse::InvalidRequest { reason } =>
                return Err(Error::Launch(reason)),
        };

        let Some(application) =
            status.applications.iter().find(|app| app.app_id == app_id) else
        {
            return Err(Error::Launch(format!(
                "launched app {app_id:?} missing from receiver status")));
        };

        let app = CastApp::from(application);

        tracing::debug!(target: METHOD_PATH,
                        app_id,
                        app_session_id = app.session_id,
                        transport_id = %app.transport_id,
                        "launched app");

        self.join_app(&app).await?;

        Ok(app)
    }

    /// Joins `app`, or the first app in the current device status when
    /// `None`. Returns the joined app; `Ok(None)` when there is nothing to
    /// join.
    pub async fn join(&mut self, app: Option<CastApp>) -> Result<Option<CastApp>> {
        let app = match app {
            Some(app) => Some(app),
            None => self.shared.status_tx.borrow()
                        .as_ref()
                        .and_then(|status| status.apps.first().cloned()),
        };

        let Some(app) = app else {
            return Ok(None);
        };

        self.join_app(&app).await?;
        Ok(Some(app))
    }

    /// Sends CLOSE to the app's transport and forgets it.
    pub async fn leave(&mut self, app: &CastApp) -> Result<()> {
        self.json_send(payload::connection::CloseRequest {},
                       app.transport_id.clone()).await?;

        let is_current = self.shared.connected_app_tx.borrow()
                             .as_ref().map_or(false, |current| current == app);
        if is_current {
            let _: Box<()> = self.task_cmd(
                TaskCommandType::SetConnectedApp(None)).await?;
        }

        Ok(())
    }

    pub async fn stop_app(&mut self, app: &CastApp) -> Result<()> {
        let payload_req = receiver::StopRequest {
            app_session_id: app.session_id.clone(),
        };

        let resp: Payload<receiver::StopResponse> =
            self.json_rpc(payload_req, EndpointId::PLATFORM_RECEIVER).await?;

        match resp.inner {
            receiver::StopResponse::Ok(_) => {},
            receiver::StopResponse::InvalidRequest { reason } =>
                return Err(Error::Session(reason)),
        }

        let is_current = self.shared.connected_app_tx.borrow()
                             .as_ref().map_or(false, |current| current == app);
        if is_current {
            let _: Box<()> = self.task_cmd(
                TaskCommandType::SetConnectedApp(None)).await?;
        }

        Ok(())
    }

    /// Stops whichever app this client is joined to; a no-op when none.
    pub async fn stop_current_app(&mut self) -> Result<()> {
        let app = self.shared.connected_app_tx.borrow().clone();
        match app {
            Some(app) => self.stop_app(&app).await,
            None => Ok(()),
        }
    }

    pub async fn set_volume(&mut self, level: f32) -> Result<()> {
        self.set_receiver_volume(receiver::Volume::from_level(level)).await
    }

    pub async fn set_muted(&mut self, muted: bool) -> Result<()> {
        self.set_receiver_volume(receiver::Volume::from_muted(muted)).await
    }

    async fn set_receiver_volume(&mut self, volume: receiver::Volume) -> Result<()> {
        let payload_req = receiver::SetVolumeRequest { volume };

        let resp: Payload<receiver::SetVolumeResponse> =
            self.json_rpc(payload_req, EndpointId::PLATFORM_RECEIVER).await?;

        match resp.inner {
            receiver::SetVolumeResponse::Ok(_) => Ok(()),
            receiver::SetVolumeResponse::InvalidRequest { reason } =>
                Err(Error::Session(reason)),
        }
    }

    /// Per-app-id availability on this device.
    pub async fn app_availability(&mut self, app_ids: Vec<AppId>)
    -> Result<HashMap<AppId, bool>> {
        let payload_req = receiver::AppAvailabilityRequest { app_id: app_ids };

        let resp: Payload<receiver::AppAvailabilityResponse> =
            self.json_rpc(payload_req, EndpointId::PLATFORM_RECEIVER).await?;

        Ok(resp.inner.availability.into_iter()
               .map(|(app_id, availability)| (app_id, availability.is_available()))
               .collect())
    }
}

/// Media-namespace operations.
impl Client {
    /// Loads media into `app` and returns the first reported media status.
    pub async fn load(&mut self, args: media::LoadRequestArgs, app: &CastApp)
    -> Result<CastMediaStatus> {
        let payload_req = media::LoadRequest {
            args,
            app_session_id: app.session_id.clone(),
        };

        let resp: Payload<media::LoadResponse> =
            self.json_rpc(payload_req, app.transport_id.clone()).await?;

        let status = match resp.inner {
            media::LoadResponse::Ok(status) => status,
            media::LoadResponse::LoadCancelled =>
                return Err(Error::Load("LOAD_CANCELLED".to_string())),
            media::LoadResponse::LoadFailed =>
                return Err(Error::Load("LOAD_FAILED".to_string())),
            media::LoadResponse::InvalidPlayerState =>
                return Err(Error::Load("INVALID_PLAYER_STATE".to_string())),
            media::LoadResponse::InvalidRequest { reason } =>
                return Err(Error::Load(reason)),
        };

        status.entries.first()
              .map(|entry| CastMediaStatus::from_entry(entry, Instant::now()))
              .ok_or_else(|| Error::Load("load response with no media status".to_string()))
    }

    /// Loads a queue of items and returns the first reported media status.
    pub async fn queue_load(&mut self, args: media::QueueLoadRequestArgs, app: &CastApp)
    -> Result<CastMediaStatus> {
        let payload_req = media::QueueLoadRequest {
            args,
            app_session_id: app.session_id.clone(),
        };

        let resp: Payload<media::LoadResponse> =
            self.json_rpc(payload_req, app.transport_id.clone()).await?;

        let status = match resp.inner {
            media::LoadResponse::Ok(status) => status,
            media::LoadResponse::LoadCancelled =>
                return Err(Error::Load("LOAD_CANCELLED".to_string())),
            media::LoadResponse::LoadFailed =>
                return Err(Error::Load("LOAD_FAILED".to_string())),
            media::LoadResponse::InvalidPlayerState =>
                return Err(Error::Load("INVALID_PLAYER_STATE".to_string())),
            media::LoadResponse::InvalidRequest { reason } =>
                return Err(Error::Load(reason)),
        };

        status.entries.first()
              .map(|entry| CastMediaStatus::from_entry(entry, Instant::now()))
              .ok_or_else(|| Error::Load("load response with no media status".to_string()))
    }

    /// Fetches the media status for `app` (all sessions).
    pub async fn request_media_status(&mut self, app: &CastApp)
    -> Result<CastMediaStatus> {
        let status = self.media_status_rpc(app, None).await?;

        status.entries.first()
              .map(|entry| CastMediaStatus::from_entry(entry, Instant::now()))
              .ok_or_else(|| Error::Session("no media status entries".to_string()))
    }

    pub async fn play(&mut self) -> Result<()> {
        let Some((app, media_session_id)) =
            self.cached_or_fetched_media_session().await? else
        {
            return Ok(());
        };

        self.simple_media_rpc(
            media::PlayRequest(media::MediaRequestCommon {
                custom_data: media::CustomData::default(),
                media_session_id,
            }),
            &app).await
    }

    pub async fn pause(&mut self) -> Result<()> {
        let Some((app, media_session_id)) =
            self.cached_or_fetched_media_session().await? else
        {
            return Ok(());
        };

        self.simple_media_rpc(
            media::PauseRequest(media::MediaRequestCommon {
                custom_data: media::CustomData::default(),
                media_session_id,
            }),
            &app).await
    }

    pub async fn stop(&mut self) -> Result<()> {
        let Some((app, media_session_id)) =
            self.cached_or_fetched_media_session().await? else
        {
            return Ok(());
        };

        self.simple_media_rpc(
            media::StopRequest(media::MediaRequestCommon {
                custom_data: media::CustomData::default(),
                media_session_id,
            }),
            &app).await
    }

    pub async fn seek(&mut self, seconds: f64) -> Result<()> {
        let Some((app, media_session_id)) =
            self.cached_or_fetched_media_session().await? else
        {
            return Ok(());
        };

        self.simple_media_rpc(
            media::SeekRequest {
                media_session_id,
                custom_data: media::CustomData::default(),
                current_time: Some(seconds),
                resume_state: None,
            },
            &app).await
    }

    pub async fn set_playback_rate(&mut self, rate: f64) -> Result<()> {
        let Some((app, media_session_id)) =
            self.cached_or_fetched_media_session().await? else
        {
            return Ok(());
        };

        self.simple_media_rpc(
            media::SetPlaybackRateRequest {
                media_session_id,
                args: media::SetPlaybackRateRequestArgs {
                    custom_data: media::CustomData::default(),
                    playback_rate: Some(rate),
                    relative_playback_rate: None,
                },
            },
            &app).await
    }

    /// Jump forward (positive) or back (negative) in the loaded queue.
    pub async fn queue_jump(&mut self, offset: i32) -> Result<()> {
        let Some((app, media_session_id)) =
            self.cached_or_fetched_media_session().await? else
        {
            return Ok(());
        };

        self.simple_media_rpc(
            media::QueueUpdateRequest {
                args: media::QueueUpdateRequestArgs::jump_offset(offset),
                media_session_id,
            },
            &app).await
    }

    async fn simple_media_rpc<Req>(&mut self, req: Req, app: &CastApp) -> Result<()>
    where Req: RequestInner
    {
        let _resp: Payload<media::GetStatusResponse> =
            self.json_rpc(req, app.transport_id.clone()).await?;
        Ok(())
    }

    async fn media_status_rpc(&mut self,
                              app: &CastApp,
                              media_session_id: Option<MediaSessionId>)
    -> Result<media::Status> {
        let payload_req = media::GetStatusRequest { media_session_id };

        let resp: Payload<media::GetStatusResponse> =
            self.json_rpc(payload_req, app.transport_id.clone()).await?;

        match resp.inner {
            media::GetStatusResponse::Ok(status) => Ok(status),
            media::GetStatusResponse::InvalidPlayerState =>
                Err(Error::Session("INVALID_PLAYER_STATE".to_string())),
            media::GetStatusResponse::InvalidRequest { reason } =>
                Err(Error::Session(reason)),
        }
    }

    /// Media controls need a media session. Uses the cached status when
    /// present; otherwise asks the app first. `Ok(None)` means nothing is
    /// loaded and the control should be a silent no-op.
    async fn cached_or_fetched_media_session(&mut self)
    -> Result<Option<(CastApp, MediaSessionId)>> {
        let Some(app) = self.shared.connected_app_tx.borrow().clone() else {
            return Ok(None);
        };

        let cached = self.shared.media_status_tx.borrow()
                         .as_ref().map(|status| status.media_session_id);
        if let Some(media_session_id) = cached {
            return Ok(Some((app, media_session_id)));
        }

        let status = self.media_status_rpc(&app, None).await?;
        Ok(status.first_media_session_id()
                 .map(|media_session_id| (app, media_session_id)))
    }
}

/// Multizone, discovery and setup operations.
impl Client {
    pub async fn request_multizone_status(&mut self) -> Result<CastMultizoneStatus> {
        let payload_req = multizone::GetStatusRequest {};

        let resp: Payload<multizone::GetStatusResponse> =
            self.json_rpc(payload_req, EndpointId::PLATFORM_RECEIVER).await?;

        Ok(CastMultizoneStatus::from(&resp.inner.status))
    }

    pub async fn set_device_volume(&mut self,
                                   device: &CastMultizoneDevice,
                                   level: f32)
    -> Result<()> {
        self.json_send(
            multizone::SetVolumeRequest {
                device_id: device.id.clone(),
                volume: receiver::Volume::from_level(level),
            },
            EndpointId::PLATFORM_RECEIVER).await
    }

    pub async fn set_device_muted(&mut self,
                                  device: &CastMultizoneDevice,
                                  muted: bool)
    -> Result<()> {
        self.json_send(
            multizone::SetVolumeRequest {
                device_id: device.id.clone(),
                volume: receiver::Volume::from_muted(muted),
            },
            EndpointId::PLATFORM_RECEIVER).await
    }

    pub async fn device_info(&mut self) -> Result<serde_json::Value> {
        let payload_req = payload::discovery::GetDeviceInfoRequest {};

        let resp: Payload<payload::discovery::DeviceInfoResponse> =
            self.json_rpc(payload_req, EndpointId::PLATFORM_RECEIVER).await?;

        Ok(resp.inner.device_info)
    }

    pub async fn device_config(&mut self) -> Result<serde_json::Value> {
        let payload_req = payload::setup::GetDeviceConfigRequest {};

        let resp: Payload<payload::setup::DeviceConfigResponse> =
            self.json_rpc(payload_req, EndpointId::PLATFORM_RECEIVER).await?;

        Ok(resp.inner.config)
    }

    pub async fn app_device_id(&mut self, app_id: impl Into<AppId>)
    -> Result<serde_json::Value> {
        let payload_req = payload::setup::GetAppDeviceIdRequest {
            app_id: app_id.into(),
        };

        let resp: Payload<payload::setup::AppDeviceIdResponse> =
            self.json_rpc(payload_req, EndpointId::PLATFORM_RECEIVER).await?;

        Ok(resp.inner.info)
    }
}

/// Internals.
impl Client {
    async fn join_app(&mut self, app: &CastApp) -> Result<()> {
        self.json_send(
            payload::connection::ConnectRequest {
                user_agent: payload::USER_AGENT.to_string(),
            },
            app.transport_id.clone()).await?;

        let _: Box<()> = self.task_cmd(
            TaskCommandType::SetConnectedApp(Some(app.clone()))).await?;

        Ok(())
    }

    fn response_from_dyn<Resp>(&self, payload_dyn: Box<PayloadDyn>)
    -> Result<Payload<Resp>>
    where Resp: ResponseInner
    {
        Ok(Payload::<Resp> {
            request_id: payload_dyn.request_id,
            typ: payload_dyn.typ,
            inner: serde_json::from_value(payload_dyn.inner)?,
        })
    }

    async fn json_send<Req>(&mut self, req: Req, destination: EndpointId)
    -> Result<()>
    where Req: RequestInner
    {
        let (request_message, request_id) = self.cast_request_from_inner(req, destination)?;

        let cmd_type = TaskCommandType::CastSend(Box::new(CastSend {
            request_message,
            request_id,
        }));

        let _resp: Box<()> = self.task_cmd(cmd_type).await?;

        Ok(())
    }

    #[named]
    async fn json_rpc<Req, Resp>(&mut self, req: Req, destination: EndpointId)
    -> Result<Payload<Resp>>
    where Req: RequestInner,
          Resp: ResponseInner
    {
        let start = Instant::now();

        let (request_message, request_id) = self.cast_request_from_inner(req, destination)?;

        let response_ns = Resp::CHANNEL_NAMESPACE;
        let response_type_names = Resp::TYPE_NAMES;

        let cmd_type = TaskCommandType::CastRpc(Box::new(CastRpc {
            request_message,
            request_id,
            response_ns,
            response_type_names,
        }));

        let resp_dyn: Box<PayloadDyn> = self.task_cmd(cmd_type).await?;
        let resp: Payload<Resp> = self.response_from_dyn(resp_dyn)?;

        let elapsed = start.elapsed();

        tracing::debug!(target: method_path!("Client"),
                        ?elapsed,
                        response_ns,
                        response_type_name = resp.typ,
                        expected_response_type_names = ?response_type_names,
                        %request_id,
                        "json_rpc response");

        Ok(resp)
    }

    #[named]
    fn cast_request_from_inner<Req>(&self, req: Req, destination: EndpointId)
    -> Result<(CastMessage, RequestId)>
    where Req: RequestInner
    {
        let request_id = self.shared.request_id_gen.take_next();
        let payload = Payload::<Req> {
            request_id: Some(request_id),
            typ: Req::TYPE_NAME.to_string(),
            inner: req,
        };

        let request_namespace = Req::CHANNEL_NAMESPACE;

        let payload_json = serde_json::to_string(&payload)?;

        tracing::trace!(target: method_path!("Client"),
                        payload_json,
                        %request_id,
                        request_type = payload.typ,
                        request_namespace,
                        sender = %self.sender,
                        %destination,
                        "payload json");

        let request_message = CastMessage {
            namespace: request_namespace.into(),
            source: self.sender.clone(),
            destination,
            payload: payload_json.into(),
        };

        Ok((request_message, request_id))
    }

    async fn task_cmd<R>(&self, cmd_type: TaskCommandType)
    -> Result<Box<R>>
    where R: Any + Send + Sync
    {
        let Some(task_cmd_tx) = self.task_cmd_tx.as_ref() else {
            return Err(Error::Session("not connected".to_string()));
        };

        let command_id = self.take_command_id();
        let (result_tx, result_rx) = oneshot::channel::<TaskCommandResult>();

        let cmd = TaskCommand {
            command: cmd_type,
            result_sender: TaskCommandResultSender {
                command_id,
                result_tx,
            },
        };
        let command_timeout: Duration = match &cmd.command {
            // The task enforces the RPC timeout itself; this is a backstop.
            TaskCommandType::CastRpc(_) => RPC_TIMEOUT + LOCAL_TASK_COMMAND_TIMEOUT,
            TaskCommandType::CastSend(_) => RPC_TIMEOUT,
            TaskCommandType::SetConnectedApp(_) => LOCAL_TASK_COMMAND_TIMEOUT,
            TaskCommandType::Shutdown => LOCAL_TASK_COMMAND_TIMEOUT,
        };

        task_cmd_tx.send_timeout(cmd, LOCAL_TASK_COMMAND_TIMEOUT).await
            .map_err(|_| Error::Session(
                "engine task is not accepting commands".to_string()))?;

        let response: TaskResponseBox =
            tokio::time::timeout(command_timeout, result_rx).await
                .map_err(|_| Error::Request(format!(
                    "command {command_id} timed out")))?
                .map_err(|_| Error::Session(
                    "connection closed before the response arrived".to_string()))??;

        response.downcast::<R>()
    }

    fn take_command_id(&self) -> CommandId {
        self.next_command_id.fetch_add(1, Ordering::SeqCst)
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        if let Some(handle) = self.task_join_handle.take() {
            // Dropping the task releases the stream and timers.
            handle.abort();
            tracing::debug!("Client dropped while running; aborted I/O task");
        }
    }
}

impl Shared {
    fn emit(&self, event: Event) {
        // Send only fails with no subscribers, which is fine.
        let _ = self.event_tx.send(event);
    }

    fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    fn set_state(&self, next: ConnectionState) {
        self.state_tx.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                tracing::debug!(from = ?*current, to = ?next, "connection state");
                *current = next;
                true
            }
        });
    }

    /// Each setter diffs against the previous value; receivers re-broadcast
    /// status on every internal event and observers must not see duplicates.
    fn set_status(&self, new: Option<CastStatus>) {
        let changed = self.status_tx.send_if_modified(|current| {
            if *current == new {
                false
            } else {
                *current = new.clone();
                true
            }
        });
        if changed {
            if let Some(status) = new {
                self.emit(Event::DeviceStatusChanged(status));
            }
        }
    }

    fn set_media_status(&self, new: Option<CastMediaStatus>) {
        let changed = self.media_status_tx.send_if_modified(|current| {
            if *current == new {
                false
            } else {
                *current = new.clone();
                true
            }
        });
        if changed {
            if let Some(status) = new {
                self.emit(Event::MediaStatusChanged(status));
            }
        }
    }

    fn set_multizone_status(&self, new: Option<CastMultizoneStatus>) {
        let changed = self.multizone_status_tx.send_if_modified(|current| {
            if *current == new {
                false
            } else {
                *current = new.clone();
                true
            }
        });
        if changed {
            if let Some(status) = new {
                self.emit(Event::MultizoneStatusChanged(status));
            }
        }
    }
}

#[named]
async fn tls_connect(config: &Config)
-> Result<impl TokioAsyncStream>
{
    const FUNCTION_PATH: &str = function_path!();

    let addr = &config.addr;
    let ip: IpAddr = addr.ip();
    let port: u16 = addr.port();

    let mut tls_config = rustls::ClientConfig::builder()
        .dangerous().with_custom_certificate_verifier(Arc::new(
            crate::util::rustls::danger::NoCertificateVerification::new_ring()))
        .with_no_client_auth();

    tls_config.enable_early_data = true;
    let tls_config = Arc::new(tls_config);

    let connector = tokio_rustls::TlsConnector::from(tls_config);

    let ip_rustls = rustls::pki_types::IpAddr::from(ip);
    let domain = rustls::pki_types::ServerName::IpAddress(ip_rustls);

    let _conn_span = tracing::info_span!(
        target: FUNCTION_PATH,
        "Connecting to cast device",
        %addr, %ip, port,
    ).entered();

    let tcp_stream = tokio::net::TcpStream::connect(addr).await
        .map_err(|err| Error::Connection(format!("tcp connect: {err}")))?;

    tracing::debug!(target: FUNCTION_PATH,
                    "TcpStream connected");

    let tls_stream = connector.connect(domain, tcp_stream).await
        .map_err(|err| Error::Connection(format!("tls handshake: {err}")))?;

    tracing::debug!(target: FUNCTION_PATH,
                    "TlsStream connected");

    Ok(tls_stream)
}

#[derive(Debug)]
enum TaskEvent {
    Cmd(TaskCommand),
    Flush(Result<()>),
    MessageRead(Result<CastMessage>),
    Eof,
    RpcTimeout(DelayExpired<RequestId>),
    PingTick,
    WatchdogTick,
}

#[derive(Debug)]
enum Flow {
    Continue,
    Stop(StopReason),
}

#[derive(Debug)]
enum StopReason {
    ShutdownCommand,
    HeartbeatTimeout,
    TransportError(Error),
    Eof,
    RemoteClosed,
}

impl<S: TokioAsyncStream> Task<S> {
    pub fn new(
        conn: S,
        task_cmd_rx: tokio::sync::mpsc::Receiver<TaskCommand>,
        shared: Arc<Shared>,
        sender: EndpointId,
    ) -> Task<S> {
        let task_cmd_rx = tokio_stream::wrappers::ReceiverStream::new(task_cmd_rx);

        let timeout_queue = DelayQueue::<RequestId>::with_capacity(4);

        let cast_message_codec = CastMessageCodec;
        let conn_framed = tokio_util::codec::Framed::with_capacity(
            conn, cast_message_codec, DATA_BUFFER_LEN);

        let (conn_framed_sink, conn_framed_stream) = conn_framed.split();

        let conn_framed_stream = conn_framed_stream
            .map(TaskEvent::MessageRead as fn(Result<CastMessage>) -> TaskEvent)
            .chain(futures::stream::once(std::future::ready(TaskEvent::Eof)));

        let ping_interval =
            IntervalStream::new(tokio::time::interval(HEARTBEAT_INTERVAL));
        let watchdog_interval =
            IntervalStream::new(tokio::time::interval(HEARTBEAT_INTERVAL));

        Task {
            conn_framed_sink,
            conn_framed_stream,

            task_cmd_rx,
            timeout_queue,

            ping_interval,
            watchdog_interval,

            need_flush: false,
            requests_map: HashMap::new(),

            last_activity: Instant::now(),
            got_pong: false,

            sender,
            shared,
        }
    }

    #[named]
    async fn main(self) -> Result<()> {
        const METHOD_PATH: &str = method_path!("Task");

        pin! {
            let this = self;
        }

        if let Err(err) = this.as_mut().startup().await {
            tracing::warn!(target: METHOD_PATH,
                           ?err,
                           "startup failed");
            this.as_mut().teardown(StopReason::TransportError(err)).await;
            return Ok(());
        }

        while let Some(event) = this.as_mut().take_next_event().await {
            tracing::trace!(target: METHOD_PATH,
                            ?event,
                            "event");

            let flow = match event {
                TaskEvent::Cmd(cmd) => match cmd.command {
                    TaskCommandType::CastRpc(rpc) => {
                        this.as_mut().handle_rpc_cmd(rpc, cmd.result_sender).await
                    },

                    TaskCommandType::CastSend(send) => {
                        this.as_mut().handle_send(send, cmd.result_sender).await
                    },

                    TaskCommandType::SetConnectedApp(app) => {
                        this.as_mut().handle_set_connected_app(app, cmd.result_sender)
                    },

                    TaskCommandType::Shutdown => {
                        tracing::info!(target: METHOD_PATH,
                                       "shutdown on command");
                        Self::respond_generic(cmd.result_sender, Ok(()));
                        Flow::Stop(StopReason::ShutdownCommand)
                    },
                },

                TaskEvent::MessageRead(read_res) => match read_res {
                    Ok(msg) => {
                        *this.as_mut().project().last_activity = Instant::now();
                        this.as_mut().handle_msg_read(msg).await
                    },
                    Err(err) => {
                        tracing::warn!(target: METHOD_PATH,
                                       ?err,
                                       "message read error");
                        Flow::Stop(StopReason::TransportError(err))
                    },
                },

                TaskEvent::Eof => {
                    tracing::info!(target: METHOD_PATH,
                                   "connection closed by peer");
                    Flow::Stop(StopReason::Eof)
                },

                TaskEvent::RpcTimeout(expired) => {
                    this.as_mut().handle_rpc_timeout(expired);
                    Flow::Continue
                },

                TaskEvent::PingTick => {
                    this.as_mut().send_ping().await;
                    Flow::Continue
                },

                TaskEvent::WatchdogTick => this.as_mut().check_liveness(),

                TaskEvent::Flush(res) => {
                    if let Err(err) = res {
                        tracing::warn!(target: METHOD_PATH,
                                       ?err,
                                       "flush error");
                        *this.as_mut().project().need_flush = false;
                        Flow::Stop(StopReason::TransportError(err))
                    } else {
                        *this.as_mut().project().need_flush = false;
                        Flow::Continue
                    }
                },
            };

            if let Flow::Stop(reason) = flow {
                this.as_mut().teardown(reason).await;
                return Ok(());
            }
        }

        tracing::info!(target: METHOD_PATH,
                       "shutdown on event stream closed");
        this.as_mut().teardown(StopReason::ShutdownCommand).await;

        Ok(())
    }

    /// Actions of the `Authenticating` state: device CONNECT, the auth
    /// challenge and an initial status request. The heartbeat timers are
    /// already armed; `Connected` is entered by the first PONG.
    #[named]
    async fn startup(mut self: Pin<&mut Self>) -> Result<()> {
        const METHOD_PATH: &str = method_path!("Task");

        self.shared.set_state(ConnectionState::Authenticating);

        let connect_msg = self.build_json_msg(
            payload::connection::ConnectRequest {
                user_agent: payload::USER_AGENT.to_string(),
            },
            EndpointId::PLATFORM_RECEIVER)?;
        self.as_mut().send_raw(connect_msg, Self::write_deadline()).await?;

        let auth_msg = self.auth_challenge_message()?;
        self.as_mut().send_raw(auth_msg, Self::write_deadline()).await?;

        let status_msg = self.build_json_msg(
            receiver::GetStatusRequest {},
            EndpointId::PLATFORM_RECEIVER)?;
        self.as_mut().send_raw(status_msg, Self::write_deadline()).await?;

        tracing::debug!(target: METHOD_PATH,
                        "startup messages queued");

        Ok(())
    }

    async fn take_next_event(self: Pin<&mut Self>) -> Option<TaskEvent> {
        let mut proj = self.project();

        let conn_flush_stream = if *proj.need_flush {
            let fut = proj.conn_framed_sink.flush();
            let stream = futures::stream::once(fut);
            Either::Left(stream)
        } else {
            Either::Right(futures::stream::empty())
        };

        // Streams polled in order with current implementation on first
        // poll of Merge.
        let streams = (
            &mut (conn_flush_stream.map(TaskEvent::Flush)),
            &mut (proj.task_cmd_rx.map(TaskEvent::Cmd)),
            &mut (proj.timeout_queue.map(TaskEvent::RpcTimeout)),
            &mut (proj.ping_interval.map(|_| TaskEvent::PingTick)),
            &mut (proj.watchdog_interval.map(|_| TaskEvent::WatchdogTick)),
            proj.conn_framed_stream,
        );

        let mut merged = futures_concurrency::stream::Merge::merge(streams);

        merged.next().await
    }

    #[named]
    async fn handle_send(mut self: Pin<&mut Self>,
                         send: Box<CastSend>, result_sender: TaskCommandResultSender)
    -> Flow {
        const METHOD_PATH: &str = method_path!("Task");

        let CastSend {
            request_message,
            request_id,
        } = *send;

        let command_id = &result_sender.command_id;

        tracing::debug!(target: METHOD_PATH,
                        %request_id,
                        command_id,
                        ?request_message,
                        "msg send");

        let res = self.as_mut().send_raw(request_message, Self::write_deadline()).await;

        match res {
            Ok(()) => {
                Self::respond_send(result_sender, Ok(()));
                Flow::Continue
            },
            Err(err) => {
                tracing::warn!(target: METHOD_PATH,
                               ?err,
                               %request_id,
                               command_id,
                               "send_raw error");
                Self::respond_send(result_sender, Err(err.clone()));
                // A write error terminates the connection.
                Flow::Stop(StopReason::TransportError(err))
            },
        }
    }

    #[named]
    async fn handle_rpc_cmd(mut self: Pin<&mut Self>,
                            rpc: Box<CastRpc>, result_sender: TaskCommandResultSender)
    -> Flow {
        const METHOD_PATH: &str = method_path!("Task");

        let deadline = Instant::now() + RPC_TIMEOUT;

        let CastRpc {
            request_message,
            request_id,
            response_ns,
            response_type_names,
        } = *rpc;

        let command_id = result_sender.command_id;

        tracing::trace!(target: METHOD_PATH,
                        ?deadline,
                        %request_id,
                        command_id,
                        ?request_message,
                        response_ns,
                        ?response_type_names,
                        "rpc send");

        // Register state and the timeout before the write is enqueued, so a
        // response racing the write still finds its handler.
        let delay_key = self.as_mut().project()
                            .timeout_queue.insert_at(request_id, deadline);

        let state = RequestState {
            deadline,
            delay_key,

            response_ns,
            response_type_names,
            result_sender,
        };

        self.as_mut().requests_map.insert(request_id, state);

        if let Err(err) = self.as_mut().send_raw(request_message, deadline).await {
            tracing::warn!(target: METHOD_PATH,
                           ?err,
                           %request_id,
                           command_id,
                           response_ns,
                           "send_raw error");

            let mut proj = self.as_mut().project();
            if let Some(state) = proj.requests_map.remove(&request_id) {
                proj.timeout_queue.as_mut().try_remove(&state.delay_key);
                Self::respond_rpc(state.result_sender, Err(err.clone()));
            }
            return Flow::Stop(StopReason::TransportError(err));
        }

        Flow::Continue
    }

    fn handle_set_connected_app(self: Pin<&mut Self>,
                                app: Option<CastApp>,
                                result_sender: TaskCommandResultSender)
    -> Flow {
        let shared = Arc::clone(&self.shared);

        let changed = shared.connected_app_tx.send_if_modified(|current| {
            if *current == app {
                false
            } else {
                *current = app.clone();
                true
            }
        });

        if changed {
            // A different app means any cached media session is stale.
            shared.set_media_status(None);
        }

        Self::respond_generic(result_sender, Ok(()));
        Flow::Continue
    }

    #[named]
    async fn send_logged(mut self: Pin<&mut Self>, msg: CastMessage) {
        const METHOD_PATH: &str = method_path!("Task");

        let msg_debug = format!("{msg:#?}");

        tracing::trace!(target: METHOD_PATH,
                        ?msg,
                        "msg send");

        let res = self.as_mut().send_raw(msg, Self::write_deadline()).await;

        if let Err(ref err) = res {
            tracing::warn!(target: METHOD_PATH,
                           ?err,
                           msg = msg_debug,
                           "send_raw error");
        }
    }

    async fn send_raw(self: Pin<&mut Self>, msg: CastMessage, deadline: Instant
    ) -> Result<()> {
        let mut proj = self.project();

        *proj.need_flush = true;

        let fut = proj.conn_framed_sink.feed(msg);
        tokio::time::timeout_at(deadline, fut).await
            .map_err(|_| Error::Write("write timed out".to_string()))?
            .map_err(|err| match err {
                Error::Write(_) => err,
                other => Error::Write(other.to_string()),
            })?;

        Ok(())
    }

    fn write_deadline() -> Instant {
        Instant::now() + RPC_TIMEOUT
    }

    #[named]
    async fn handle_msg_read(mut self: Pin<&mut Self>, msg: CastMessage) -> Flow {
        const METHOD_PATH: &str = method_path!("Task");

        tracing::trace!(target: METHOD_PATH,
                        ?msg,
                        "message read");

        let msg_ns = msg.namespace.as_str();

        let pd_json_str = match &msg.payload {
            CastMessagePayload::Binary(bytes) => {
                if msg_ns == payload::deviceauth::CHANNEL_NAMESPACE {
                    self.handle_auth_response(bytes);
                } else {
                    tracing::debug!(target: METHOD_PATH,
                                    msg_ns,
                                    "binary message on unexpected namespace; dropping");
                }
                return Flow::Continue;
            },
            CastMessagePayload::String(s) => s.as_str(),
        };

        if !JSON_NAMESPACES.contains(msg_ns) {
            // Not an error: the namespace may be unknown or its channel
            // gone. Only this frame is dropped; later frames from the same
            // read batch are still handled.
            tracing::trace!(target: METHOD_PATH,
                            msg_ns,
                            "message namespace not known; dropping frame");
            return Flow::Continue;
        }

        let pd_all_dyn: serde_json::Value = match serde_json::from_str(pd_json_str) {
            Err(err) => {
                tracing::warn!(target: METHOD_PATH,
                               ?err, ?msg,
                               "error deserializing json as Value");
                return Flow::Continue;
            },
            Ok(pd) => pd,
        };
        let envelope: Envelope = match serde_json::from_str(pd_json_str) {
            Err(err) => {
                tracing::warn!(target: METHOD_PATH,
                               ?err, ?msg,
                               "error deserializing message envelope");
                return Flow::Continue;
            },
            Ok(envelope) => envelope,
        };

        let pd_type = envelope.typ.clone().unwrap_or_default();

        // Channel handling first: status broadcasts must land whether or
        // not they are also a correlated response.
        let flow = self.as_mut().route_to_channel(
            msg_ns, &pd_type, &pd_all_dyn, &msg.source).await;
        if let Flow::Stop(_) = flow {
            return flow;
        }

        // Then request correlation.
        let request_id = match envelope.request_id {
            Some(id) if id.is_rpc() => id,
            _ => return Flow::Continue,
        };

        let mut proj = self.as_mut().project();

        let Some(request_state) = proj.requests_map.remove(&request_id) else {
            // Normal for requests the task sent itself (initial GET_STATUS)
            // and for late responses whose timeout already fired.
            tracing::trace!(target: METHOD_PATH,
                            %request_id, pd_type,
                            "no pending request state");
            return Flow::Continue;
        };

        if proj.timeout_queue.as_mut().try_remove(&request_state.delay_key).is_none() {
            tracing::warn!(target: METHOD_PATH,
                           ?request_state,
                           %request_id, pd_type,
                           "timeout_queue missing expected delay key");
        }

        let result: Result<PayloadDyn> =
            if request_state.response_ns != msg_ns {
                Err(Error::Request(format!(
                    "reply on unexpected namespace: \
                     request_id {request_id}, \
                     expected {expected:?}, got {msg_ns:?}",
                    expected = request_state.response_ns)))
            } else {
                Ok(Payload {
                    request_id: envelope.request_id,
                    typ: pd_type,
                    inner: pd_all_dyn,
                })
            };

        Self::respond_rpc(request_state.result_sender, result);

        Flow::Continue
    }

    /// Per-namespace inbound handling: heartbeat replies, connection
    /// lifecycle, and typed status updates into the session state.
    #[named]
    async fn route_to_channel(mut self: Pin<&mut Self>,
                              msg_ns: &str,
                              pd_type: &str,
                              pd_all_dyn: &serde_json::Value,
                              source: &EndpointId)
    -> Flow {
        const METHOD_PATH: &str = method_path!("Task");

        match msg_ns {
            payload::heartbeat::CHANNEL_NAMESPACE => {
                if pd_type == payload::heartbeat::MESSAGE_TYPE_PING {
                    self.handle_read_ping(source.clone()).await;
                } else if pd_type == payload::heartbeat::MESSAGE_TYPE_PONG {
                    self.handle_read_pong();
                }
                Flow::Continue
            },

            payload::connection::CHANNEL_NAMESPACE => {
                if pd_type == payload::connection::MESSAGE_TYPE_CLOSE {
                    return self.handle_connection_close(source);
                }
                Flow::Continue
            },

            receiver::CHANNEL_NAMESPACE => {
                if pd_type == receiver::MESSAGE_RESPONSE_TYPE_RECEIVER_STATUS {
                    match serde_json::from_value::<receiver::StatusWrapper>(
                        pd_all_dyn.clone())
                    {
                        Ok(wrapper) => {
                            tracing::debug!(
                                target: METHOD_PATH,
                                status = ?receiver::small_debug::ReceiverStatus(&wrapper.status),
                                "receiver status");
                            self.shared.set_status(
                                Some(CastStatus::from(&wrapper.status)));
                        },
                        Err(err) =>
                            tracing::warn!(target: METHOD_PATH,
                                           ?err,
                                           "bad RECEIVER_STATUS payload"),
                    }
                }
                Flow::Continue
            },

            media::CHANNEL_NAMESPACE => {
                if pd_type == media::MESSAGE_RESPONSE_TYPE_MEDIA_STATUS {
                    match serde_json::from_value::<media::Status>(pd_all_dyn.clone()) {
                        Ok(status) => {
                            tracing::debug!(
                                target: METHOD_PATH,
                                status = ?media::small_debug::MediaStatus(&status),
                                "media status");
                            let new = status.entries.first().map(
                                |entry| CastMediaStatus::from_entry(
                                    entry, Instant::now()));
                            self.shared.set_media_status(new);
                        },
                        Err(err) =>
                            tracing::warn!(target: METHOD_PATH,
                                           ?err,
                                           "bad MEDIA_STATUS payload"),
                    }
                }
                Flow::Continue
            },

            multizone::CHANNEL_NAMESPACE => {
                self.handle_multizone(pd_type, pd_all_dyn);
                Flow::Continue
            },

            // Response-only namespaces; nothing arrives unsolicited.
            payload::discovery::CHANNEL_NAMESPACE
            | payload::setup::CHANNEL_NAMESPACE => Flow::Continue,

            _ => Flow::Continue,
        }
    }

    #[named]
    fn handle_multizone(self: Pin<&mut Self>,
                        pd_type: &str,
                        pd_all_dyn: &serde_json::Value) {
        const METHOD_PATH: &str = method_path!("Task");

        let shared = &self.shared;

        let current = || -> CastMultizoneStatus {
            shared.multizone_status_tx.borrow().clone().unwrap_or_default()
        };

        match pd_type {
            multizone::MESSAGE_RESPONSE_TYPE_MULTIZONE_STATUS => {
                match serde_json::from_value::<multizone::StatusPayload>(
                    pd_all_dyn.clone())
                {
                    Ok(payload) => shared.set_multizone_status(
                        Some(CastMultizoneStatus::from(&payload.status))),
                    Err(err) =>
                        tracing::warn!(target: METHOD_PATH,
                                       ?err,
                                       "bad MULTIZONE_STATUS payload"),
                }
            },

            multizone::MESSAGE_TYPE_DEVICE_ADDED
            | multizone::MESSAGE_TYPE_DEVICE_UPDATED => {
                match serde_json::from_value::<multizone::DevicePayload>(
                    pd_all_dyn.clone())
                {
                    Ok(payload) => {
                        let mut status = current();
                        status.upsert(CastMultizoneDevice::from(&payload.device));
                        shared.set_multizone_status(Some(status));
                    },
                    Err(err) =>
                        tracing::warn!(target: METHOD_PATH,
                                       ?err, pd_type,
                                       "bad multizone device payload"),
                }
            },

            multizone::MESSAGE_TYPE_DEVICE_REMOVED => {
                match serde_json::from_value::<multizone::DeviceRemovedPayload>(
                    pd_all_dyn.clone())
                {
                    Ok(payload) => {
                        let mut status = current();
                        status.remove(&payload.device_id);
                        shared.set_multizone_status(Some(status));
                    },
                    Err(err) =>
                        tracing::warn!(target: METHOD_PATH,
                                       ?err,
                                       "bad DEVICE_REMOVED payload"),
                }
            },

            _ => tracing::trace!(target: METHOD_PATH,
                                 pd_type,
                                 "multizone message ignored"),
        }
    }

    #[named]
    fn handle_connection_close(self: Pin<&mut Self>, source: &EndpointId) -> Flow {
        const METHOD_PATH: &str = method_path!("Task");

        if source == &EndpointId::PLATFORM_RECEIVER {
            tracing::warn!(target: METHOD_PATH,
                           "platform closed the virtual connection");
            return Flow::Stop(StopReason::RemoteClosed);
        }

        let shared = &self.shared;

        let is_current_app = shared.connected_app_tx.borrow()
            .as_ref().map_or(false, |app| &app.transport_id == source);

        if is_current_app {
            tracing::info!(target: METHOD_PATH,
                           %source,
                           "app transport closed; clearing connected app");
            shared.connected_app_tx.send_replace(None);
            shared.set_media_status(None);
        } else {
            tracing::debug!(target: METHOD_PATH,
                            %source,
                            "CLOSE from endpoint we are not joined to");
        }

        Flow::Continue
    }

    #[named]
    fn handle_rpc_timeout(mut self: Pin<&mut Self>, expired: DelayExpired<RequestId>) {
        const METHOD_PATH: &str = method_path!("Task");

        let deadline = expired.deadline();
        let delay_key = expired.key();
        let request_id = expired.get_ref();

        let proj = self.as_mut().project();

        let Some(request_state) = proj.requests_map.remove(request_id) else {
            panic!("{METHOD_PATH}: missing request_state in requests_map\n\
                    request_id: {request_id}");
        };

        assert_eq!(delay_key, request_state.delay_key);

        tracing::warn!(target: METHOD_PATH,
                       ?deadline,
                       %request_id,
                       ?request_state,
                       "rpc timeout");

        let err = Error::Request(format!(
            "request {request_id} timed out after {RPC_TIMEOUT:?}"));
        Self::respond_rpc(request_state.result_sender, Err(err));
    }

    async fn send_ping(mut self: Pin<&mut Self>) {
        let msg = match self.uncorrelated_msg(payload::heartbeat::Ping {}) {
            Ok(msg) => msg,
            Err(err) => {
                tracing::error!(?err, "ping serialize error");
                return;
            },
        };

        self.as_mut().send_logged(msg).await;
    }

    #[named]
    async fn handle_read_ping(mut self: Pin<&mut Self>, destination: EndpointId) {
        const METHOD_PATH: &str = method_path!("Task");

        let mut msg = match self.uncorrelated_msg(payload::heartbeat::Pong {}) {
            Ok(msg) => msg,
            Err(err) => {
                tracing::error!(target: METHOD_PATH,
                                ?err,
                                "pong serialize error");
                return;
            },
        };
        msg.destination = destination;

        self.as_mut().send_logged(msg).await;
    }

    /// The first PONG is the signal that the session is fully usable.
    #[named]
    fn handle_read_pong(mut self: Pin<&mut Self>) {
        const METHOD_PATH: &str = method_path!("Task");

        let proj = self.as_mut().project();
        if *proj.got_pong {
            return;
        }
        *proj.got_pong = true;

        tracing::info!(target: METHOD_PATH,
                       "first heartbeat PONG");

        if proj.shared.state() == ConnectionState::Authenticating {
            proj.shared.set_state(ConnectionState::Connected);
            proj.shared.emit(Event::DidConnect);
        }
    }

    #[named]
    fn check_liveness(self: Pin<&mut Self>) -> Flow {
        const METHOD_PATH: &str = method_path!("Task");

        let idle = self.last_activity.elapsed();
        if idle > HEARTBEAT_TIMEOUT {
            tracing::warn!(target: METHOD_PATH,
                           ?idle,
                           "no inbound activity; session timed out");
            Flow::Stop(StopReason::HeartbeatTimeout)
        } else {
            Flow::Continue
        }
    }

    #[named]
    fn handle_auth_response(&self, bytes: &[u8]) {
        const METHOD_PATH: &str = method_path!("Task");

        match cast_channel::DeviceAuthMessage::parse_from_bytes(bytes) {
            Ok(auth) if auth.error.is_some() => {
                // Auth errors do not fail the session in practice.
                tracing::warn!(target: METHOD_PATH,
                               error = ?auth.error,
                               "device auth error; continuing");
            },
            Ok(_auth) => {
                tracing::debug!(target: METHOD_PATH,
                                "device auth response ok");
            },
            Err(err) => {
                tracing::warn!(target: METHOD_PATH,
                               ?err,
                               "device auth response failed to parse");
            },
        }
    }

    /// Cancels pending requests, stops the heartbeat, closes the transport
    /// and clears session state. Pending handlers are dropped, not invoked;
    /// the disconnect events are the user-visible signal.
    #[named]
    async fn teardown(mut self: Pin<&mut Self>, reason: StopReason) {
        const METHOD_PATH: &str = method_path!("Task");

        let shared = Arc::clone(&self.shared);
        let was_connected = shared.state() == ConnectionState::Connected;

        tracing::info!(target: METHOD_PATH,
                       ?reason,
                       was_connected,
                       "tearing down session");

        shared.set_state(ConnectionState::Disconnecting);

        if matches!(reason, StopReason::ShutdownCommand) {
            // Best-effort leave: CLOSE the app connection and the device
            // connection before the stream goes away.
            let mut close_targets: Vec<EndpointId> = Vec::with_capacity(2);
            if let Some(app) = shared.connected_app_tx.borrow().as_ref() {
                close_targets.push(app.transport_id.clone());
            }
            close_targets.push(EndpointId::PLATFORM_RECEIVER);

            for destination in close_targets {
                if let Ok(mut msg) =
                    self.uncorrelated_msg(payload::connection::CloseRequest {})
                {
                    msg.destination = destination;
                    let _ = self.as_mut().project().conn_framed_sink.feed(msg).await;
                }
            }
            let _ = self.as_mut().project().conn_framed_sink.flush().await;
        }

        {
            let mut proj = self.as_mut().project();
            proj.requests_map.clear();
            proj.timeout_queue.as_mut().clear();
        }

        let _ = self.as_mut().project().conn_framed_sink.close().await;

        shared.set_status(None);
        shared.set_media_status(None);
        shared.set_multizone_status(None);
        shared.connected_app_tx.send_replace(None);

        shared.set_state(ConnectionState::Disconnected);

        match reason {
            StopReason::ShutdownCommand | StopReason::HeartbeatTimeout => {
                shared.emit(Event::DidDisconnect);
            },
            StopReason::Eof | StopReason::RemoteClosed => {
                shared.emit(Event::ConnectionFailed(Error::Connection(
                    "connection closed by receiver".to_string())));
                if was_connected {
                    shared.emit(Event::DidDisconnect);
                }
            },
            StopReason::TransportError(err) => {
                shared.emit(Event::ConnectionFailed(err));
            },
        }
    }

    fn build_json_msg<Req>(&self, req: Req, destination: EndpointId)
    -> Result<CastMessage>
    where Req: RequestInner
    {
        let request_id = self.shared.request_id_gen.take_next();
        let payload = Payload::<Req> {
            request_id: Some(request_id),
            typ: Req::TYPE_NAME.to_string(),
            inner: req,
        };

        let payload_json = serde_json::to_string(&payload)?;

        Ok(CastMessage {
            namespace: Req::CHANNEL_NAMESPACE.into(),
            source: self.sender.clone(),
            destination,
            payload: payload_json.into(),
        })
    }

    /// PING / PONG / CLOSE, addressed to the platform by default.
    /// Heartbeats and closes carry no request id.
    fn uncorrelated_msg<Req>(&self, req: Req) -> Result<CastMessage>
    where Req: RequestInner
    {
        let payload = Payload::<Req> {
            request_id: None,
            typ: Req::TYPE_NAME.to_string(),
            inner: req,
        };

        let payload_json = serde_json::to_string(&payload)?;

        Ok(CastMessage {
            namespace: Req::CHANNEL_NAMESPACE.into(),
            source: self.sender.clone(),
            destination: EndpointId::PLATFORM_RECEIVER,
            payload: payload_json.into(),
        })
    }

    fn respond_rpc(result_sender: TaskCommandResultSender,
                   result: Result<PayloadDyn>)
    {
        Self::respond_generic(result_sender, result);
    }

    fn respond_send(result_sender: TaskCommandResultSender,
                    result: Result<()>)
    {
        Self::respond_generic(result_sender, result);
    }

    fn respond_generic<R>(result_sender: TaskCommandResultSender,
                          result: Result<R>)
    where R: Any + Debug + Send + Sync
    {
        let command_id = result_sender.command_id;
        let result_ok = result.is_ok();
        let result_variant = if result_ok { "Ok"  }
                             else         { "Err" };

        let boxed = result.map(|response| TaskResponseBox::new(response));

        match result_sender.result_tx.send(boxed) {
            Ok(()) =>
                tracing::trace!(
                    command_id,
                    result_variant,
                    "Task::respond: sent result ok"),
            Err(unsent) =>
                tracing::trace!(
                    command_id,
                    result_variant,
                    ?unsent,
                    "Task::respond: result channel dropped"),
        }
    }

    fn auth_challenge_message(&self) -> Result<CastMessage> {
        let mut auth = cast_channel::DeviceAuthMessage::new();
        auth.challenge =
            protobuf::MessageField::some(cast_channel::AuthChallenge::new());

        let bytes = auth.write_to_bytes()?;

        Ok(CastMessage {
            namespace: payload::deviceauth::CHANNEL_NAMESPACE.into(),
            source: self.sender.clone(),
            destination: EndpointId::PLATFORM_RECEIVER,
            payload: bytes.into(),
        })
    }
}

impl TaskResponseBox {
    pub fn new<R>(response: R) -> TaskResponseBox
    where R: Any + Send + Sync
    {
        TaskResponseBox {
            type_name: any::type_name::<R>(),
            value: Box::new(response) as Box<dyn Any + Send + Sync>,
        }
    }

    pub fn downcast<R>(self) -> Result<Box<R>>
    where R: Any + Send + Sync
    {
        let TaskResponseBox { type_name, value } = self;

        value.downcast::<R>()
             .map_err(|_as_any| Error::Session(format!(
                 "command response type didn't match: \
                  expected {expected:?}, got {ty:?}",
                 expected = any::type_name::<R>(),
                 ty = type_name)))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;
    use tokio::io::DuplexStream;

    /// The device side of an in-memory connection, speaking the real codec.
    struct FakeReceiver {
        framed: Framed<DuplexStream, CastMessageCodec>,
    }

    impl FakeReceiver {
        async fn next_frame(&mut self) -> CastMessage {
            self.framed.next().await
                .expect("peer closed")
                .expect("frame decodes")
        }

        /// Next JSON frame. Skips the binary auth challenge and answers
        /// PINGs along the way, so sessions stay alive under the paused
        /// test clock.
        async fn next_json(&mut self) -> (serde_json::Value, CastMessage) {
            loop {
                let frame = self.next_frame().await;
                let text = match &frame.payload {
                    CastMessagePayload::String(s) => s.clone(),
                    CastMessagePayload::Binary(_) => continue,
                };
                let value: serde_json::Value = serde_json::from_str(&text).unwrap();
                if value["type"] == "PING" {
                    self.pong(frame.source.clone()).await;
                    continue;
                }
                return (value, frame);
            }
        }

        async fn next_json_of_type(&mut self, typ: &str)
        -> (serde_json::Value, CastMessage) {
            loop {
                let (value, frame) = self.next_json().await;
                if value["type"] == typ {
                    return (value, frame);
                }
            }
        }

        async fn send_json(&mut self,
                           namespace: NamespaceConst,
                           destination: EndpointId,
                           value: serde_json::Value) {
            let msg = CastMessage {
                namespace: namespace.into(),
                source: EndpointId::PLATFORM_RECEIVER,
                destination,
                payload: CastMessagePayload::String(value.to_string()),
            };
            self.framed.send(msg).await.unwrap();
        }

        async fn pong(&mut self, destination: EndpointId) {
            self.send_json(payload::heartbeat::CHANNEL_NAMESPACE,
                           destination,
                           json!({"type": "PONG"})).await;
        }
    }

    fn test_client() -> (Client, FakeReceiver) {
        let mut client = Client::new(Config {
            addr: "127.0.0.1:8009".parse().unwrap(),
            sender: None,
            request_id_seed: Some(1),
        });

        let (near, far) = tokio::io::duplex(DATA_BUFFER_LEN);
        client.connect_via(near).unwrap();

        let receiver = FakeReceiver {
            framed: Framed::new(far, CastMessageCodec),
        };

        (client, receiver)
    }

    /// Drives the startup handshake to the `Connected` state: consumes the
    /// CONNECT / auth / GET_STATUS traffic, answers the first PING.
    async fn connected_client() -> (Client, FakeReceiver) {
        let (client, mut receiver) = test_client();

        loop {
            let frame = receiver.next_frame().await;
            let CastMessagePayload::String(text) = &frame.payload else {
                continue;
            };
            let value: serde_json::Value = serde_json::from_str(text).unwrap();
            if value["type"] == "PING" {
                let reply_to = frame.source.clone();
                receiver.pong(reply_to).await;
                break;
            }
        }

        let mut state = client.state();
        state.wait_for(|s| *s == ConnectionState::Connected).await.unwrap();

        (client, receiver)
    }

    fn media_app() -> CastApp {
        CastApp {
            id: app::DEFAULT_MEDIA_RECEIVER.to_string(),
            session_id: "S".to_string(),
            transport_id: "T".into(),
            display_name: "Default Media Receiver".to_string(),
            status_text: String::new(),
            namespaces: [media::CHANNEL_NAMESPACE.to_string()].into_iter().collect(),
        }
    }

    async fn join_test_app(client: &mut Client, receiver: &mut FakeReceiver)
    -> CastApp {
        let app = media_app();
        let join_fut = client.join(Some(app.clone()));
        let drain_fut = async {
            receiver.next_json_of_type("CONNECT").await;
        };
        let (joined, ()) = tokio::join!(join_fut, drain_fut);
        joined.unwrap().unwrap();
        app
    }

    fn receiver_status_json(level: f64) -> serde_json::Value {
        json!({
            "type": "RECEIVER_STATUS",
            "requestId": 0,
            "status": {
                "volume": {"level": level, "muted": false},
                "applications": [],
            },
        })
    }

    async fn next_device_status(events: &mut broadcast::Receiver<Event>)
    -> CastStatus {
        loop {
            match events.recv().await.expect("event stream open") {
                Event::DeviceStatusChanged(status) => return status,
                _ => {},
            }
        }
    }

    async fn next_media_status(events: &mut broadcast::Receiver<Event>)
    -> CastMediaStatus {
        loop {
            match events.recv().await.expect("event stream open") {
                Event::MediaStatusChanged(status) => return status,
                _ => {},
            }
        }
    }

    async fn next_multizone_status(events: &mut broadcast::Receiver<Event>)
    -> CastMultizoneStatus {
        loop {
            match events.recv().await.expect("event stream open") {
                Event::MultizoneStatusChanged(status) => return status,
                _ => {},
            }
        }
    }

    #[tokio::test]
    async fn device_status_update_notifies_once() {
        let (client, mut receiver) = connected_client().await;
        let mut events = client.subscribe();
        let dest = client.sender_id().clone();

        receiver.send_json(receiver::CHANNEL_NAMESPACE, dest.clone(),
                           receiver_status_json(0.5)).await;
        // Identical re-broadcast must be suppressed.
        receiver.send_json(receiver::CHANNEL_NAMESPACE, dest.clone(),
                           receiver_status_json(0.5)).await;
        receiver.send_json(receiver::CHANNEL_NAMESPACE, dest,
                           receiver_status_json(0.6)).await;

        let first = next_device_status(&mut events).await;
        assert_eq!(first.volume, 0.5);
        assert!(!first.muted);
        assert!(first.apps.is_empty());

        let second = next_device_status(&mut events).await;
        assert_eq!(second.volume, 0.6);

        let status_rx = client.status();
        assert_eq!(status_rx.borrow().as_ref().unwrap().volume, 0.6);
    }

    #[tokio::test]
    async fn launch_joins_app_and_returns_it() {
        let (mut client, mut receiver) = connected_client().await;
        let dest = client.sender_id().clone();

        let launch_fut = client.launch(app::DEFAULT_MEDIA_RECEIVER);
        let receiver_fut = async {
            let (value, frame) = receiver.next_json_of_type("LAUNCH").await;
            assert_eq!(frame.namespace.as_str(), receiver::CHANNEL_NAMESPACE);
            assert_eq!(frame.destination, EndpointId::PLATFORM_RECEIVER);
            assert_eq!(value["appId"], "CC1AD845");
            let request_id = value["requestId"].clone();
            assert!(request_id.is_u64());

            receiver.send_json(receiver::CHANNEL_NAMESPACE, dest.clone(), json!({
                "type": "RECEIVER_STATUS",
                "requestId": request_id,
                "status": {
                    "volume": {"level": 1.0, "muted": false},
                    "applications": [{
                        "appId": "CC1AD845",
                        "sessionId": "S",
                        "transportId": "T",
                        "displayName": "Default Media Receiver",
                        "namespaces": [{"name": "urn:x-cast:com.google.cast.media"}],
                    }],
                },
            })).await;

            let (_cvalue, cframe) = receiver.next_json_of_type("CONNECT").await;
            assert_eq!(cframe.namespace.as_str(),
                       payload::connection::CHANNEL_NAMESPACE);
            assert_eq!(cframe.destination.as_str(), "T");
        };

        let (launched, ()) = tokio::join!(launch_fut, receiver_fut);
        let launched = launched.unwrap();
        assert_eq!(launched.id, "CC1AD845");
        assert_eq!(launched.session_id, "S");
        assert_eq!(launched.transport_id.as_str(), "T");

        let app_rx = client.connected_app();
        assert_eq!(app_rx.borrow().as_ref(), Some(&launched));
    }

    #[tokio::test]
    async fn launch_error_is_surfaced() {
        let (mut client, mut receiver) = connected_client().await;
        let dest = client.sender_id().clone();

        let launch_fut = client.launch("ZZZZZZZZ");
        let receiver_fut = async {
            let (value, _frame) = receiver.next_json_of_type("LAUNCH").await;
            receiver.send_json(receiver::CHANNEL_NAMESPACE, dest.clone(), json!({
                "type": "LAUNCH_ERROR",
                "requestId": value["requestId"].clone(),
                "reason": "NOT_FOUND",
            })).await;
        };

        let (res, ()) = tokio::join!(launch_fut, receiver_fut);
        assert!(matches!(res, Err(Error::Launch(ref reason)) if reason == "NOT_FOUND"),
                "got {res:?}");
    }

    #[tokio::test]
    async fn load_media_reports_status() {
        let (mut client, mut receiver) = connected_client().await;
        let app = join_test_app(&mut client, &mut receiver).await;
        let mut events = client.subscribe();

        let args = media::LoadRequestArgs::from_media(
            media::Media::from_url("http://x/y.mp3")
                .with_content_type("audio/mpeg")
                .with_stream_type(media::StreamType::Live));

        let load_fut = client.load(args, &app);
        let receiver_fut = async {
            let (value, frame) = receiver.next_json_of_type("LOAD").await;
            assert_eq!(frame.namespace.as_str(), media::CHANNEL_NAMESPACE);
            assert_eq!(frame.destination.as_str(), "T");
            assert_eq!(value["sessionId"], "S");
            assert_eq!(value["autoplay"], true);
            assert_eq!(value["media"]["contentId"], "http://x/y.mp3");
            assert_eq!(value["media"]["contentType"], "audio/mpeg");
            assert_eq!(value["media"]["streamType"], "LIVE");

            receiver.send_json(media::CHANNEL_NAMESPACE, frame.source.clone(), json!({
                "type": "MEDIA_STATUS",
                "requestId": value["requestId"].clone(),
                "status": [{"mediaSessionId": 7, "playerState": "PLAYING"}],
            })).await;
        };

        let (loaded, ()) = tokio::join!(load_fut, receiver_fut);
        let status = loaded.unwrap();
        assert_eq!(status.media_session_id, 7);
        assert!(status.is_playing());

        let observed = next_media_status(&mut events).await;
        assert_eq!(observed.media_session_id, 7);

        let media_rx = client.media_status();
        assert_eq!(media_rx.borrow().as_ref().unwrap().media_session_id, 7);
    }

    #[tokio::test]
    async fn pause_fetches_media_session_first() {
        let (mut client, mut receiver) = connected_client().await;
        let app = join_test_app(&mut client, &mut receiver).await;
        let _ = app;

        let pause_fut = client.pause();
        let receiver_fut = async {
            // No cached media session: a GET_STATUS must come first.
            let (value, frame) = receiver.next_json_of_type("GET_STATUS").await;
            assert_eq!(frame.namespace.as_str(), media::CHANNEL_NAMESPACE);
            assert_eq!(frame.destination.as_str(), "T");
            receiver.send_json(media::CHANNEL_NAMESPACE, frame.source.clone(), json!({
                "type": "MEDIA_STATUS",
                "requestId": value["requestId"].clone(),
                "status": [{"mediaSessionId": 7, "playerState": "PLAYING"}],
            })).await;

            let (pvalue, pframe) = receiver.next_json_of_type("PAUSE").await;
            assert_eq!(pvalue["mediaSessionId"], 7);
            receiver.send_json(media::CHANNEL_NAMESPACE, pframe.source.clone(), json!({
                "type": "MEDIA_STATUS",
                "requestId": pvalue["requestId"].clone(),
                "status": [{"mediaSessionId": 7, "playerState": "PAUSED"}],
            })).await;
        };

        let (res, ()) = tokio::join!(pause_fut, receiver_fut);
        res.unwrap();
    }

    #[tokio::test]
    async fn media_controls_without_app_are_noops() {
        let (mut client, _receiver) = connected_client().await;

        client.play().await.unwrap();
        client.pause().await.unwrap();
        client.stop().await.unwrap();
        client.seek(10.0).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn heartbeat_timeout_disconnects_and_clears_state() {
        let (client, mut receiver) = connected_client().await;
        let mut events = client.subscribe();
        let dest = client.sender_id().clone();

        receiver.send_json(receiver::CHANNEL_NAMESPACE, dest,
                           receiver_status_json(0.5)).await;
        next_device_status(&mut events).await;

        // Withhold all inbound traffic from here on. The watchdog fires
        // once nothing has arrived for 20 s.
        loop {
            match events.recv().await.unwrap() {
                Event::DidDisconnect => break,
                _ => {},
            }
        }

        let state_rx = client.state();
        assert_eq!(*state_rx.borrow(), ConnectionState::Disconnected);

        let status_rx = client.status();
        assert!(status_rx.borrow().is_none());
        let media_rx = client.media_status();
        assert!(media_rx.borrow().is_none());
        let app_rx = client.connected_app();
        assert!(app_rx.borrow().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn request_timeout_leaves_session_up() {
        let (mut client, mut receiver) = connected_client().await;

        let avail_fut = client.app_availability(vec!["X".to_string()]);
        let keep_alive = async {
            loop {
                // Answers PINGs, swallows the availability request.
                let (_value, _frame) = receiver.next_json().await;
            }
        };

        tokio::select! {
            res = avail_fut => {
                assert!(matches!(res, Err(Error::Request(_))), "got {res:?}");
            },
            _ = keep_alive => unreachable!(),
        }

        let state_rx = client.state();
        assert_eq!(*state_rx.borrow(), ConnectionState::Connected);
    }

    #[tokio::test]
    async fn disconnect_is_idempotent() {
        let (mut client, receiver) = connected_client().await;
        let mut events = client.subscribe();

        client.disconnect().await.unwrap();
        client.disconnect().await.unwrap();

        let state_rx = client.state();
        assert_eq!(*state_rx.borrow(), ConnectionState::Disconnected);

        let mut did_disconnects = 0;
        while let Ok(event) = events.try_recv() {
            if matches!(event, Event::DidDisconnect) {
                did_disconnects += 1;
            }
        }
        assert_eq!(did_disconnects, 1);

        drop(receiver);
    }

    #[tokio::test]
    async fn unknown_namespace_frame_is_dropped_not_fatal() {
        let (client, mut receiver) = connected_client().await;
        let mut events = client.subscribe();
        let dest = client.sender_id().clone();

        receiver.send_json("urn:x-cast:com.example.custom", dest.clone(),
                           json!({"type": "MYSTERY"})).await;
        receiver.send_json(receiver::CHANNEL_NAMESPACE, dest,
                           receiver_status_json(0.5)).await;

        // The frame after the unknown-namespace one still lands.
        let status = next_device_status(&mut events).await;
        assert_eq!(status.volume, 0.5);
    }

    #[tokio::test]
    async fn multizone_membership_events_update_status() {
        let (client, mut receiver) = connected_client().await;
        let mut events = client.subscribe();
        let dest = client.sender_id().clone();

        receiver.send_json(multizone::CHANNEL_NAMESPACE, dest.clone(), json!({
            "type": "MULTIZONE_STATUS",
            "status": {"devices": [{
                "deviceId": "a",
                "name": "Kitchen",
                "capabilities": 4,
                "volume": {"level": 0.3, "muted": false},
            }]},
        })).await;
        receiver.send_json(multizone::CHANNEL_NAMESPACE, dest.clone(), json!({
            "type": "DEVICE_UPDATED",
            "device": {
                "deviceId": "a",
                "name": "Kitchen",
                "capabilities": 4,
                "volume": {"level": 0.9, "muted": false},
            },
        })).await;
        receiver.send_json(multizone::CHANNEL_NAMESPACE, dest, json!({
            "type": "DEVICE_REMOVED",
            "deviceId": "a",
        })).await;

        let first = next_multizone_status(&mut events).await;
        assert_eq!(first.devices.len(), 1);
        assert_eq!(first.devices[0].volume, 0.3);

        let second = next_multizone_status(&mut events).await;
        assert_eq!(second.devices[0].volume, 0.9);

        let third = next_multizone_status(&mut events).await;
        assert!(third.devices.is_empty());
    }

    #[tokio::test]
    async fn peer_eof_fails_the_connection() {
        let (client, receiver) = connected_client().await;
        let mut events = client.subscribe();

        drop(receiver);

        let mut saw_connection_failed = false;
        loop {
            match events.recv().await.unwrap() {
                Event::ConnectionFailed(Error::Connection(_)) =>
                    saw_connection_failed = true,
                Event::DidDisconnect => break,
                _ => {},
            }
        }
        assert!(saw_connection_failed);

        let state_rx = client.state();
        assert_eq!(*state_rx.borrow(), ConnectionState::Disconnected);
    }
}
