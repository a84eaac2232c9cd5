//! Session-gated push subscription.
//!
//! One socket per authenticated session:
//!
//! - a new session epoch requests a descriptor, opens the socket and sends
//!   the descriptor's opening frame;
//! - a close or error schedules a reconnect with [`ReconnectBackoff`], and
//!   every reconnect requests a fresh descriptor;
//! - the descriptor is renewed every `renewal_interval` regardless of drops;
//! - logout aborts the socket task and cancels both timers.
//!
//! Each socket task carries a generation number. Anything a task reports
//! after its generation was superseded is ignored, so at most one socket is
//! ever live.

use crate::backoff::ReconnectBackoff;
use crate::extract::{interpret, PushRoute};
use crate::sources::{CollectionResolver, SubscriptionSource};
use crate::{PushError, PushResult};
use futures_util::{SinkExt, StreamExt};
use http_gateway::SubscriptionDescriptor;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use session_lifecycle::{SessionState, TimerSlot};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::header::SEC_WEBSOCKET_PROTOCOL;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub const GRAPHQL_WS_PROTOCOL: &str = "graphql-ws";

/// Subscriptions expire server-side after an hour.
pub const DEFAULT_RENEWAL_INTERVAL: Duration = Duration::from_secs(55 * 60);

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

const EVENT_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone)]
pub struct PushConfig {
    /// Subscription channel, the device id.
    pub channel: String,
    pub subprotocol: String,
    pub renewal_interval: Duration,
    /// Upper bound on the websocket handshake.
    pub connect_timeout: Duration,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
}

impl PushConfig {
    pub fn new(channel: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            subprotocol: GRAPHQL_WS_PROTOCOL.to_string(),
            renewal_interval: DEFAULT_RENEWAL_INTERVAL,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            backoff_base: Duration::from_secs(1),
            backoff_max: Duration::from_secs(30),
        }
    }
}

/// What the channel tells the player.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PushEvent {
    /// Start streaming `media`. `collection_id` is set when the media came
    /// from resolving a pushed collection.
    Play {
        media: Vec<String>,
        collection_id: Option<String>,
    },
    Connected,
    Disconnected {
        reason: String,
    },
}

struct ConnectionState {
    authenticated: bool,
    epoch: u64,
    /// Bumped whenever the current socket is replaced or torn down.
    generation: u64,
    socket: Option<JoinHandle<()>>,
    connected: bool,
    backoff: ReconnectBackoff,
}

struct Inner {
    config: PushConfig,
    source: Arc<dyn SubscriptionSource>,
    resolver: Arc<dyn CollectionResolver>,
    session: watch::Receiver<SessionState>,
    state: Mutex<ConnectionState>,
    events: broadcast::Sender<PushEvent>,
    reconnect: TimerSlot,
    renewal: TimerSlot,
    shutdown: CancellationToken,
    supervisor: Mutex<Option<JoinHandle<()>>>,
}

/// Push subscription that follows the session.
///
/// Call [`start`](Self::start) once; call [`shutdown`](Self::shutdown) to
/// release the socket task.
#[derive(Clone)]
pub struct PushChannel {
    inner: Arc<Inner>,
}

impl PushChannel {
    pub fn new(
        config: PushConfig,
        source: Arc<dyn SubscriptionSource>,
        resolver: Arc<dyn CollectionResolver>,
        session: watch::Receiver<SessionState>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let backoff = ReconnectBackoff::new(config.backoff_base, config.backoff_max);

        Self {
            inner: Arc::new(Inner {
                config,
                source,
                resolver,
                session,
                state: Mutex::new(ConnectionState {
                    authenticated: false,
                    epoch: 0,
                    generation: 0,
                    socket: None,
                    connected: false,
                    backoff,
                }),
                events,
                reconnect: TimerSlot::new(),
                renewal: TimerSlot::new(),
                shutdown: CancellationToken::new(),
                supervisor: Mutex::new(None),
            }),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PushEvent> {
        self.inner.events.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.inner.state.lock().connected
    }

    /// Follow the session state until [`shutdown`](Self::shutdown).
    pub fn start(&self) {
        let mut supervisor = self.inner.supervisor.lock();
        if supervisor.is_some() {
            return;
        }

        let weak = Arc::downgrade(&self.inner);
        let mut session = self.inner.session.clone();
        let shutdown = self.inner.shutdown.clone();
        *supervisor = Some(tokio::spawn(async move {
            loop {
                let state = *session.borrow_and_update();
                match weak.upgrade() {
                    Some(inner) => PushChannel { inner }.on_session_state(state),
                    None => break,
                }

                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    changed = session.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
            }
            debug!("Push supervisor stopped");
        }));
    }

    /// Tear everything down. The channel does not reconnect afterwards.
    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();
        if let Some(task) = self.inner.supervisor.lock().take() {
            task.abort();
        }

        let was_connected = {
            let mut state = self.inner.state.lock();
            state.authenticated = false;
            self.close_socket_locked(&mut state)
        };
        if was_connected {
            self.emit(PushEvent::Disconnected {
                reason: "shutdown".to_string(),
            });
        }
        info!("Push channel shut down");
    }

    fn on_session_state(&self, session: SessionState) {
        let mut state = self.inner.state.lock();

        if session.authenticated {
            if state.authenticated && state.epoch == session.epoch {
                return;
            }
            info!(epoch = session.epoch, "Session active, opening push channel");
            state.authenticated = true;
            state.epoch = session.epoch;
            state.backoff.reset();
            let was_connected = self.close_socket_locked(&mut state);
            drop(state);

            if was_connected {
                self.emit(PushEvent::Disconnected {
                    reason: "session changed".to_string(),
                });
            }
            self.spawn_connect();
        } else if state.authenticated {
            info!("Session ended, tearing down push channel");
            state.authenticated = false;
            let was_connected = self.close_socket_locked(&mut state);
            drop(state);

            if was_connected {
                self.emit(PushEvent::Disconnected {
                    reason: "logged out".to_string(),
                });
            }
        }
    }

    /// Abort the socket task and cancel both timers. Returns whether a socket
    /// was open.
    fn close_socket_locked(&self, state: &mut ConnectionState) -> bool {
        state.generation += 1;
        if let Some(task) = state.socket.take() {
            task.abort();
        }
        self.inner.reconnect.cancel();
        self.inner.renewal.cancel();
        std::mem::replace(&mut state.connected, false)
    }

    fn active_epoch(&self) -> Option<u64> {
        let state = self.inner.state.lock();
        state.authenticated.then_some(state.epoch)
    }

    fn spawn_connect(&self) {
        let channel = self.clone();
        tokio::spawn(async move { channel.connect().await });
    }

    /// Request a descriptor and open a socket with it.
    async fn connect(&self) {
        let Some(epoch) = self.active_epoch() else {
            debug!("Not authenticated, skipping push connect");
            return;
        };

        let result = match self
            .inner
            .source
            .request_subscription(&self.inner.config.channel)
            .await
        {
            Ok(descriptor) => self.open(descriptor, epoch),
            Err(err) => Err(err),
        };

        if let Err(err) = result {
            if err.is_transient() {
                warn!(error = %err, "Push subscription failed");
            } else {
                error!(error = %err, "Push subscription refused");
            }
            self.schedule_reconnect(epoch);
        }
    }

    fn open(&self, descriptor: SubscriptionDescriptor, epoch: u64) -> PushResult<()> {
        let request = client_request(&descriptor.url, &self.inner.config.subprotocol)?;
        let opening = opening_frame(&descriptor.body);

        let mut state = self.inner.state.lock();
        if !state.authenticated || state.epoch != epoch {
            debug!("Session changed during subscribe, discarding descriptor");
            return Ok(());
        }

        // A renewal replaces the live socket without reporting a disconnect.
        self.close_socket_locked(&mut state);
        let generation = state.generation;
        self.arm_renewal();

        let channel = self.clone();
        state.socket = Some(tokio::spawn(async move {
            channel.run_socket(generation, request, opening).await
        }));
        debug!(generation, "Opening push socket");
        Ok(())
    }

    fn arm_renewal(&self) {
        let weak = Arc::downgrade(&self.inner);
        self.inner
            .renewal
            .arm(self.inner.config.renewal_interval, async move {
                let Some(inner) = weak.upgrade() else {
                    return;
                };
                info!("Renewing push subscription");
                PushChannel { inner }.connect().await;
            });
    }

    fn schedule_reconnect(&self, epoch: u64) {
        let mut state = self.inner.state.lock();
        if state.authenticated && state.epoch == epoch {
            self.schedule_reconnect_locked(&mut state);
        }
    }

    fn schedule_reconnect_locked(&self, state: &mut ConnectionState) {
        let attempt = state.backoff.attempt();
        let delay = state.backoff.next_delay();
        info!(
            delay_ms = delay.as_millis() as u64,
            attempt, "Scheduling push reconnect"
        );

        let weak = Arc::downgrade(&self.inner);
        self.inner.reconnect.arm(delay, async move {
            if let Some(inner) = weak.upgrade() {
                PushChannel { inner }.connect().await;
            }
        });
    }

    async fn run_socket(self, generation: u64, request: Request, opening: String) {
        let reason = match self.drive_socket(generation, request, opening).await {
            Ok(reason) => reason,
            Err(err) => {
                warn!(error = %err, transient = err.is_transient(), generation, "Push socket failed");
                err.to_string()
            }
        };
        self.on_socket_ended(generation, reason);
    }

    /// Connect, send the opening frame, then pump frames until the socket
    /// ends. Returns the close reason.
    async fn drive_socket(
        &self,
        generation: u64,
        request: Request,
        opening: String,
    ) -> PushResult<String> {
        let timeout = self.inner.config.connect_timeout;
        let (stream, _response) = tokio::time::timeout(timeout, connect_async(request))
            .await
            .map_err(|_| PushError::ConnectTimeout(timeout))??;
        let (mut write, mut read) = stream.split();

        write.send(Message::Text(opening)).await?;
        self.on_open(generation);

        while let Some(message) = read.next().await {
            match message? {
                Message::Text(text) => self.on_frame(&text),
                Message::Binary(bytes) => match String::from_utf8(bytes) {
                    Ok(text) => self.on_frame(&text),
                    Err(_) => debug!("Ignoring non-UTF-8 binary frame"),
                },
                Message::Ping(payload) => write.send(Message::Pong(payload)).await?,
                Message::Close(frame) => {
                    let reason = frame
                        .map(|frame| frame.reason.to_string())
                        .filter(|reason| !reason.is_empty())
                        .unwrap_or_else(|| "closed by server".to_string());
                    info!(reason = %reason, "Push socket closed by server");
                    return Ok(reason);
                }
                _ => {}
            }
        }
        Ok("stream ended".to_string())
    }

    fn on_open(&self, generation: u64) {
        {
            let mut state = self.inner.state.lock();
            if state.generation != generation {
                return;
            }
            state.backoff.reset();
            state.connected = true;
        }
        info!(generation, "Push socket open");
        self.emit(PushEvent::Connected);
    }

    fn on_frame(&self, text: &str) {
        if self.active_epoch().is_none() {
            debug!("Ignoring push frame while unauthenticated");
            return;
        }

        match interpret(text) {
            Ok(PushRoute::Media(media)) => {
                info!(count = media.len(), "Push: play media list");
                self.emit(PushEvent::Play {
                    media,
                    collection_id: None,
                });
            }
            Ok(PushRoute::Collection(collection_id)) => {
                info!(collection_id = %collection_id, "Push: resolving collection");
                self.spawn_resolve(collection_id);
            }
            Err(err) => warn!(error = %err, "Dropping push frame"),
        }
    }

    fn spawn_resolve(&self, collection_id: String) {
        let channel = self.clone();
        tokio::spawn(async move {
            let resolved = channel
                .inner
                .resolver
                .resolve_collection(&collection_id)
                .await;
            match resolved {
                Ok(media) if media.is_empty() => {
                    info!(collection_id = %collection_id, "Pushed collection has no media");
                }
                Ok(media) => {
                    if channel.active_epoch().is_some() {
                        channel.emit(PushEvent::Play {
                            media,
                            collection_id: Some(collection_id),
                        });
                    }
                }
                Err(err) => warn!(error = %err, "Failed to resolve pushed collection"),
            }
        });
    }

    fn on_socket_ended(&self, generation: u64, reason: String) {
        let was_connected = {
            let mut state = self.inner.state.lock();
            if state.generation != generation {
                debug!(generation, "Superseded push socket ended");
                return;
            }
            state.socket = None;
            let was_connected = std::mem::replace(&mut state.connected, false);
            if state.authenticated {
                self.schedule_reconnect_locked(&mut state);
            }
            was_connected
        };

        if was_connected {
            self.emit(PushEvent::Disconnected { reason });
        }
    }

    fn emit(&self, event: PushEvent) {
        // No receivers is fine.
        let _ = self.inner.events.send(event);
    }
}

fn client_request(url: &str, subprotocol: &str) -> PushResult<Request> {
    let mut request = url
        .into_client_request()
        .map_err(|e| PushError::InvalidEndpoint(format!("{e}")))?;
    let protocol = HeaderValue::from_str(subprotocol)
        .map_err(|e| PushError::InvalidEndpoint(format!("bad subprotocol: {e}")))?;
    request.headers_mut().insert(SEC_WEBSOCKET_PROTOCOL, protocol);
    Ok(request)
}

/// A string body is already the encoded frame; anything else is encoded.
fn opening_frame(body: &Value) -> String {
    match body {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}
