//! Websocket session management
//!
//! The session owns the socket lifecycle: the authentication handshake, the
//! read loop routing incoming frames, the single-writer send path, the
//! keepalive pings and the reconnection policy. The read loop is the only
//! producer into the correlator and the subscription registry, callers hand
//! off through channels.

use crate::codec;
use crate::correlator::Correlator;
use crate::errors::{HassError, HassResult};
use crate::subscriptions::{EventCallback, EventFilter, SubscriptionHandle, SubscriptionRegistry};
use crate::types::{
    Ask, Auth, ClientConfig, Command, ReconnectOptions, Response, Subscribe, Unsubscribe,
};

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use log::{debug, info, warn};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc::{channel, Receiver, Sender};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

pub(crate) type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Lifecycle of the single logical connection owned by a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Authenticating,
    Connected,
    Closing,
}

pub(crate) struct Session {
    config: ClientConfig,
    state: Mutex<SessionState>,
    // sticky once close() is called, until the next explicit connect()
    closed: AtomicBool,
    // bumped on every successful handshake so tasks of a previous
    // connection can tell they are stale
    generation: AtomicU64,
    // highest generation whose teardown already ran, so the keepalive
    // task, the read loop and close() never tear one connection down twice
    torn_down: AtomicU64,
    pub(crate) correlator: Correlator,
    pub(crate) subscriptions: SubscriptionRegistry,
    // present only while connected, all socket writes funnel through it
    writer: Mutex<Option<Sender<Message>>>,
    read_task: Mutex<Option<JoinHandle<()>>>,
    reconnect_task: Mutex<Option<JoinHandle<()>>>,
}

impl Session {
    pub(crate) fn new(config: ClientConfig) -> Arc<Self> {
        Arc::new(Session {
            config,
            state: Mutex::new(SessionState::Disconnected),
            closed: AtomicBool::new(false),
            generation: AtomicU64::new(0),
            torn_down: AtomicU64::new(0),
            correlator: Correlator::new(),
            subscriptions: SubscriptionRegistry::new(),
            writer: Mutex::new(None),
            read_task: Mutex::new(None),
            reconnect_task: Mutex::new(None),
        })
    }

    pub(crate) fn state(&self) -> SessionState {
        *self.state.lock()
    }

    fn set_state(&self, state: SessionState) {
        *self.state.lock() = state;
    }

    pub(crate) fn is_connected(&self) -> bool {
        self.state() == SessionState::Connected
    }

    /// Explicit connect requested by the facade. An explicit connect takes
    /// over from any pending automatic reconnection attempt.
    pub(crate) async fn connect(self: &Arc<Self>) -> HassResult<()> {
        if let Some(task) = self.reconnect_task.lock().take() {
            task.abort();
        }
        self.closed.store(false, Ordering::SeqCst);
        self.establish().await
    }

    /// Open the socket and run the authentication handshake. On success the
    /// read, write and keepalive tasks are running and the state is Connected.
    async fn establish(self: &Arc<Self>) -> HassResult<()> {
        // only one connection attempt at a time, and never on top of a
        // live connection
        {
            let mut state = self.state.lock();
            if *state != SessionState::Disconnected {
                return Err(HassError::Generic(
                    "connect called on a session that is not disconnected".to_owned(),
                ));
            }
            *state = SessionState::Connecting;
        }
        let url = self.config.websocket_url();
        let ws = match connect_async(url.as_str()).await {
            Ok((ws, _)) => ws,
            Err(err) => {
                self.set_state(SessionState::Disconnected);
                return Err(err.into());
            }
        };
        let (mut sink, mut stream) = ws.split();

        self.set_state(SessionState::Authenticating);
        if let Err(err) = self.authenticate(&mut sink, &mut stream).await {
            self.set_state(SessionState::Disconnected);
            let _ = sink.send(Message::Close(None)).await;
            return Err(err);
        }

        let (writer_tx, writer_rx) = channel::<Message>(20);
        *self.writer.lock() = Some(writer_tx);
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.set_state(SessionState::Connected);
        info!("connected to {}", url);

        tokio::spawn(write_loop(sink, writer_rx));
        *self.read_task.lock() = Some(tokio::spawn(Arc::clone(self).read_loop(stream, generation)));
        if let Some(interval) = self.config.keepalive_interval {
            tokio::spawn(Arc::clone(self).keepalive_loop(interval, generation));
        }
        Ok(())
    }

    /// First frame from the gateway must be auth_required, reply with the
    /// stored token, then expect auth_ok. Anything else ends the attempt:
    /// a malformed frame is fatal here, unlike in the steady state.
    async fn authenticate(
        &self,
        sink: &mut SplitSink<WsStream, Message>,
        stream: &mut SplitStream<WsStream>,
    ) -> HassResult<()> {
        match self.next_frame(stream).await? {
            Response::AuthRequired(msg) => {
                debug!("authentication requested by gateway (ha {})", msg.ha_version);
            }
            other => {
                return Err(HassError::ProtocolError(format!(
                    "expected auth_required as the first frame, got {:?}",
                    other
                )))
            }
        }

        let auth = Command::AuthInit(Auth {
            msg_type: "auth".to_owned(),
            access_token: self.config.token.clone(),
        });
        sink.send(codec::encode(&auth)?).await.map_err(HassError::from)?;

        match self.next_frame(stream).await? {
            Response::AuthOk(_) => Ok(()),
            Response::AuthInvalid(err) => Err(HassError::AuthenticationFailed(err.message)),
            other => Err(HassError::ProtocolError(format!(
                "expected the auth verdict, got {:?}",
                other
            ))),
        }
    }

    /// Read one handshake frame within the auth deadline
    async fn next_frame(&self, stream: &mut SplitStream<WsStream>) -> HassResult<Response> {
        let frame = tokio::time::timeout(self.config.auth_timeout, stream.next())
            .await
            .map_err(|_| HassError::AuthenticationFailed("handshake timed out".to_owned()))?;
        match frame {
            Some(Ok(Message::Text(data))) => match codec::decode(data.as_str()) {
                Response::Malformed(detail) => Err(HassError::ProtocolError(detail)),
                response => Ok(response),
            },
            Some(Ok(other)) => Err(HassError::ProtocolError(format!(
                "unexpected websocket message during handshake: {:?}",
                other
            ))),
            Some(Err(err)) => Err(err.into()),
            None => Err(HassError::ConnectionClosed),
        }
    }

    /// Steady-state read path: result and pong frames resolve the
    /// correlator, event frames fan out through the registry, malformed
    /// frames are logged and skipped
    async fn read_loop(self: Arc<Self>, mut stream: SplitStream<WsStream>, generation: u64) {
        let reason = loop {
            match stream.next().await {
                Some(Ok(Message::Text(data))) => match codec::decode(data.as_str()) {
                    Response::Result(result) => {
                        let id = result.id;
                        self.correlator.resolve(id, Ok(Response::Result(result)));
                    }
                    Response::Pong(pong) => {
                        let id = pong.id;
                        self.correlator.resolve(id, Ok(Response::Pong(pong)));
                    }
                    Response::Event(event) => self.subscriptions.dispatch(event),
                    Response::Malformed(detail) => {
                        warn!("skipping malformed frame: {}", detail);
                    }
                    other => warn!("unexpected frame outside the handshake: {:?}", other),
                },
                Some(Ok(Message::Close(_))) | None => break HassError::ConnectionClosed,
                Some(Ok(_)) => {}
                Some(Err(err)) => break HassError::from(err),
            }
        };
        self.handle_disconnect(generation, reason);
    }

    /// Leaving the connected state: fail every pending caller, then either
    /// finish the explicit close or schedule a reconnection attempt. The
    /// teardown of one connection generation runs at most once, whichever of
    /// the read loop, the keepalive task or close() gets there first wins.
    fn handle_disconnect(self: &Arc<Self>, generation: u64, reason: HassError) {
        if self.torn_down.fetch_max(generation, Ordering::SeqCst) >= generation {
            return;
        }
        *self.writer.lock() = None;

        if self.closed.load(Ordering::SeqCst) {
            self.correlator.fail_all(|| HassError::Cancelled);
            self.set_state(SessionState::Disconnected);
            return;
        }

        warn!("connection lost: {}", reason);
        self.correlator.fail_all(|| HassError::ConnectionClosed);
        self.set_state(SessionState::Disconnected);

        if let Some(policy) = self.config.reconnect.clone() {
            let session = Arc::clone(self);
            let task = tokio::spawn(session.reconnect_loop(policy));
            *self.reconnect_task.lock() = Some(task);
        }
    }

    /// Exponential backoff with jitter, independent of the read/write
    /// loops and cancelled by an explicit close. Gives up permanently when
    /// the gateway rejects the credentials.
    async fn reconnect_loop(self: Arc<Self>, policy: ReconnectOptions) {
        let mut delay = policy.initial_delay;
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            let jitter_ms = policy.jitter.as_millis() as u64;
            let jitter = Duration::from_millis(if jitter_ms > 0 {
                fastrand::u64(0..=jitter_ms)
            } else {
                0
            });
            tokio::time::sleep(delay + jitter).await;

            // stand down after an explicit close, and after an explicit
            // connect() that raced this timer
            if self.closed.load(Ordering::SeqCst) || self.state() != SessionState::Disconnected {
                return;
            }

            debug!("reconnect attempt {}", attempt);
            match self.establish().await {
                Ok(()) => {
                    info!("reconnected after {} attempt(s)", attempt);
                    self.resubscribe().await;
                    return;
                }
                Err(HassError::AuthenticationFailed(msg)) => {
                    warn!("credentials rejected while reconnecting, giving up: {}", msg);
                    return;
                }
                Err(err) => warn!("reconnect attempt {} failed: {}", attempt, err),
            }
            delay = (delay * 2).min(policy.max_delay);
        }
    }

    /// Replay the active subscriptions on the fresh connection. The gateway
    /// assigns new wire ids, the handles held by callers stay valid.
    async fn resubscribe(self: &Arc<Self>) {
        for (handle, filter, callback) in self.subscriptions.drain() {
            match self.establish_subscription(handle, &filter, callback).await {
                Ok(wire_id) => debug!("replayed subscription {:?} as {}", handle, wire_id),
                Err(err) => warn!("failed to replay subscription {:?}: {}", handle, err),
            }
        }
    }

    pub(crate) fn next_id(&self) -> u64 {
        self.correlator.allocate()
    }

    /// send a command and wait for the matching result with the configured
    /// default deadline
    pub(crate) async fn command(&self, cmd: Command) -> HassResult<Response> {
        self.command_with_timeout(cmd, self.config.call_timeout).await
    }

    /// Register with the correlator before the frame hits the wire so the
    /// result can never race the registration. Timeout and cancellation
    /// deregister the slot.
    pub(crate) async fn command_with_timeout(
        &self,
        cmd: Command,
        timeout: Duration,
    ) -> HassResult<Response> {
        if self.state() != SessionState::Connected {
            return Err(HassError::NotConnected);
        }
        let id = cmd
            .id()
            .ok_or_else(|| HassError::Generic("command carries no sequence".to_owned()))?;

        let rx = self.correlator.register(id);
        let frame = match codec::encode(&cmd) {
            Ok(frame) => frame,
            Err(err) => {
                self.correlator.forget(id);
                return Err(err);
            }
        };

        let writer = self.writer.lock().clone();
        let Some(writer) = writer else {
            self.correlator.forget(id);
            return Err(HassError::NotConnected);
        };
        if writer.send(frame).await.is_err() {
            self.correlator.forget(id);
            return Err(HassError::ConnectionClosed);
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(outcome)) => outcome,
            // the slot vanished without a resolution, the connection is gone
            Ok(Err(_)) => Err(HassError::ConnectionClosed),
            Err(_) => {
                self.correlator.forget(id);
                Err(HassError::Timeout)
            }
        }
    }

    /// Subscribe to the event bus and register the callback under a fresh
    /// stable handle
    pub(crate) async fn subscribe(
        &self,
        filter: EventFilter,
        callback: EventCallback,
    ) -> HassResult<SubscriptionHandle> {
        let handle = self.subscriptions.next_handle();
        self.establish_subscription(handle, &filter, callback).await?;
        Ok(handle)
    }

    async fn establish_subscription(
        &self,
        handle: SubscriptionHandle,
        filter: &EventFilter,
        callback: EventCallback,
    ) -> HassResult<u64> {
        let id = self.next_id();
        let cmd = Command::SubscribeEvent(Subscribe {
            id,
            msg_type: "subscribe_events".to_owned(),
            event_type: filter.event_type.clone(),
        });
        // register before the frame hits the wire, events may start
        // streaming the moment the gateway accepts the subscription
        self.subscriptions
            .insert(handle, id, filter.clone(), callback);
        let outcome = match self.command(cmd).await {
            Ok(Response::Result(result)) if result.is_ok() => return Ok(id),
            Ok(Response::Result(result)) => Err(HassError::ResponseError(result)),
            Ok(unknown) => Err(HassError::UnknownPayloadReceived(unknown)),
            Err(err) => Err(err),
        };
        self.subscriptions.remove(handle);
        outcome
    }

    /// Remove the subscription and tell the gateway, a second call with the
    /// same handle is a no-op
    pub(crate) async fn unsubscribe(&self, handle: SubscriptionHandle) -> HassResult<()> {
        let Some(wire_id) = self.subscriptions.remove(handle) else {
            return Ok(());
        };
        if self.state() != SessionState::Connected {
            // the server side subscription died with the connection
            return Ok(());
        }
        let id = self.next_id();
        let cmd = Command::Unsubscribe(Unsubscribe {
            id,
            msg_type: "unsubscribe_events".to_owned(),
            subscription: wire_id,
        });
        match self.command(cmd).await? {
            Response::Result(result) if result.is_ok() => Ok(()),
            Response::Result(result) => Err(HassError::ResponseError(result)),
            unknown => Err(HassError::UnknownPayloadReceived(unknown)),
        }
    }

    /// Explicit close: cancel pending callers, the reconnect timer and the
    /// read loop, then let the writer shut the socket down. The session ends
    /// up Disconnected and may be connected again later.
    pub(crate) fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.set_state(SessionState::Closing);
        if let Some(task) = self.reconnect_task.lock().take() {
            task.abort();
        }
        if let Some(task) = self.read_task.lock().take() {
            task.abort();
        }
        // claim the teardown of the current connection so a read loop that
        // was already past its abort point does not run it again
        self.torn_down
            .fetch_max(self.generation.load(Ordering::SeqCst), Ordering::SeqCst);
        self.correlator.fail_all(|| HassError::Cancelled);
        self.subscriptions.clear();
        // dropping the sender makes the write loop emit a Close frame
        *self.writer.lock() = None;
        self.set_state(SessionState::Disconnected);
    }

    /// Application level ping/pong heartbeat. A missing pong tears the
    /// connection down through the regular disconnect path.
    async fn keepalive_loop(self: Arc<Self>, interval: Duration, generation: u64) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // the first tick completes immediately
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if self.generation.load(Ordering::SeqCst) != generation
                || self.state() != SessionState::Connected
            {
                return;
            }
            let ping = Command::Ping(Ask {
                id: self.next_id(),
                msg_type: "ping".to_owned(),
            });
            match self
                .command_with_timeout(ping, self.config.keepalive_timeout)
                .await
            {
                Ok(_) => {}
                Err(err) => {
                    if self.generation.load(Ordering::SeqCst) != generation {
                        return;
                    }
                    warn!("keepalive ping failed ({}), dropping the connection", err);
                    // the read loop is parked on an unresponsive socket, it
                    // will not notice the loss on its own
                    if let Some(task) = self.read_task.lock().take() {
                        task.abort();
                    }
                    self.handle_disconnect(generation, HassError::ConnectionClosed);
                    return;
                }
            }
        }
    }

    pub(crate) fn config(&self) -> &ClientConfig {
        &self.config
    }
}

/// Single writer for the socket, all outgoing frames are serialized through
/// one channel so partial frames never interleave
async fn write_loop(mut sink: SplitSink<WsStream, Message>, mut frames: Receiver<Message>) {
    while let Some(frame) = frames.recv().await {
        if sink.send(frame).await.is_err() {
            return;
        }
    }
    // channel closed: the session is shutting this connection down
    let _ = sink.send(Message::Close(None)).await;
}
