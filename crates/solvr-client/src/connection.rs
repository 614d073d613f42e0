//! Connection manager owning the single TCP channel to the solvr server.
//!
//! One [`ConnectionManager`] is created at startup and cloned into every UI
//! context that needs it. Clones share the same connection. Writes from many
//! tasks are serialized behind one lock, so two commands never interleave on
//! the wire. Inbound bytes are framed, decoded and published to the
//! [`EventDispatcher`] on the read task.
//!
//! Teardown always runs in the same order: stop the read loop, close the
//! write half, then release the connection state.

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use bytes::BytesMut;
use futures_util::SinkExt;
use solvr_protocol::{CommandCodec, FrameAssembler, FramingMode, InboundEvent, OutboundCommand};
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::codec::FramedWrite;
use tracing::{debug, info, trace, warn};

use crate::dispatcher::EventDispatcher;
use crate::error::{ConfigError, ConnectError, RequestError, SendError};

/// Bytes requested from the socket per read
const READ_BUFFER_SIZE: usize = 4096;

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 8080;

/// Host and port of the solvr server.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl Default for Endpoint {
    fn default() -> Self {
        Self::new(DEFAULT_HOST, DEFAULT_PORT)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl FromStr for Endpoint {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ConfigError::InvalidEndpoint(s.to_string());

        let (host, port) = s.rsplit_once(':').ok_or_else(invalid)?;
        if host.is_empty() {
            return Err(invalid());
        }
        let port = port.parse::<u16>().map_err(|_| invalid())?;

        Ok(Self::new(host, port))
    }
}

/// Lifecycle of the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
        }
    }
}

/// Tunables for a [`ConnectionManager`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionOptions {
    pub framing: FramingMode,
    pub connect_timeout: Duration,
    pub send_timeout: Duration,
    pub response_timeout: Duration,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            framing: FramingMode::default(),
            connect_timeout: Duration::from_secs(5),
            send_timeout: Duration::from_secs(5),
            response_timeout: Duration::from_secs(10),
        }
    }
}

type Writer = FramedWrite<OwnedWriteHalf, CommandCodec>;

/// Commands whose replies share event kinds; one `request` per group may be in flight.
const RESPONSE_GROUPS: usize = 4;

fn response_group(command: &OutboundCommand) -> usize {
    match command {
        OutboundCommand::Login { .. } => 0,
        OutboundCommand::Register { .. } => 1,
        OutboundCommand::ResetRequestCode { .. } | OutboundCommand::ResetConfirm { .. } => 2,
        OutboundCommand::SolveLinear { .. } | OutboundCommand::SolveQuadratic { .. } => 3,
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct Inner {
    options: ConnectionOptions,
    dispatcher: EventDispatcher,
    state: watch::Sender<ConnectionState>,
    endpoint: Mutex<Option<Endpoint>>,
    /// Lock order: `writer` before `reader`.
    writer: tokio::sync::Mutex<Option<Writer>>,
    reader: Mutex<Option<JoinHandle<()>>>,
    assembler: Mutex<FrameAssembler>,
    /// Bumped on every connect and teardown so a stale read loop cannot
    /// tear down a newer connection.
    generation: AtomicU64,
    /// Id of the connect attempt that owns the `Connecting` state. Only
    /// changed while the watch sender is held.
    attempt: AtomicU64,
    in_flight: [tokio::sync::Mutex<()>; RESPONSE_GROUPS],
}

impl Inner {
    fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    fn set_state(&self, state: ConnectionState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            trace!("Connection state {} -> {}", previous, state);
        }
    }

    /// Move `Disconnected` to `Connecting` and return the new attempt id.
    fn claim_attempt(&self) -> Option<u64> {
        let mut attempt = None;
        self.state.send_if_modified(|state| {
            if *state != ConnectionState::Disconnected {
                return false;
            }
            *state = ConnectionState::Connecting;
            attempt = Some(self.attempt.fetch_add(1, Ordering::SeqCst) + 1);
            true
        });
        attempt
    }

    /// Move `Connecting` to `target` if `attempt` still owns it.
    fn finish_attempt(&self, attempt: u64, target: ConnectionState) -> bool {
        self.state.send_if_modified(|state| {
            if *state == ConnectionState::Connecting
                && self.attempt.load(Ordering::SeqCst) == attempt
            {
                *state = target;
                true
            } else {
                false
            }
        })
    }

    /// Cancel whichever attempt is in progress.
    fn cancel_attempt(&self) {
        self.state.send_if_modified(|state| {
            if *state == ConnectionState::Connecting {
                *state = ConnectionState::Disconnected;
                true
            } else {
                false
            }
        });
    }

    fn on_receive(&self, bytes: &[u8]) {
        let frames = {
            let mut assembler = lock(&self.assembler);
            assembler.append(bytes);
            assembler.take_ready_frames()
        };

        for frame in frames {
            match solvr_protocol::decode(&frame) {
                Ok(event) => {
                    debug!("Server sent: {}", event);
                    self.dispatcher.publish(&event);
                }
                Err(e) => warn!("Discarding frame: {}", e),
            }
        }
    }

    /// Called from the read loop when the peer closed or the socket failed.
    async fn connection_lost(&self, generation: u64) {
        let mut writer = self.writer.lock().await;
        if self.generation.load(Ordering::SeqCst) != generation {
            return;
        }
        self.generation.fetch_add(1, Ordering::SeqCst);

        // Our own handle; dropping it detaches the running task.
        drop(lock(&self.reader).take());
        drop(writer.take());
        drop(writer);

        self.set_state(ConnectionState::Disconnected);
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        let reader = self
            .reader
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = reader {
            handle.abort();
        }
        // `writer` is dropped after this, once the read loop has been told to stop.
    }
}

async fn read_loop(inner: Weak<Inner>, mut reader: OwnedReadHalf, generation: u64) {
    let mut buf = BytesMut::with_capacity(READ_BUFFER_SIZE);

    loop {
        buf.clear();
        let result = reader.read_buf(&mut buf).await;

        let Some(inner) = inner.upgrade() else {
            break;
        };

        match result {
            Ok(0) => {
                info!("Server closed the connection");
                inner.connection_lost(generation).await;
                break;
            }
            Ok(n) => {
                trace!("Read {} bytes", n);
                inner.on_receive(&buf);
            }
            Err(e) => {
                warn!("Read from server failed: {}", e);
                inner.connection_lost(generation).await;
                break;
            }
        }
    }
}

/// Handle to the process-wide connection to the solvr server.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

impl fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("state", &self.state())
            .field("endpoint", &self.endpoint())
            .field("options", &self.inner.options)
            .finish_non_exhaustive()
    }
}

impl ConnectionManager {
    #[must_use]
    pub fn new(options: ConnectionOptions, dispatcher: EventDispatcher) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);

        Self {
            inner: Arc::new(Inner {
                options,
                dispatcher,
                state,
                endpoint: Mutex::new(None),
                writer: tokio::sync::Mutex::new(None),
                reader: Mutex::new(None),
                assembler: Mutex::new(FrameAssembler::new(options.framing)),
                generation: AtomicU64::new(0),
                attempt: AtomicU64::new(0),
                in_flight: std::array::from_fn(|_| tokio::sync::Mutex::new(())),
            }),
        }
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.inner.state()
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Endpoint of the current or most recent connection attempt.
    #[must_use]
    pub fn endpoint(&self) -> Option<Endpoint> {
        lock(&self.inner.endpoint).clone()
    }

    /// Receiver that observes every state transition.
    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    #[must_use]
    pub fn dispatcher(&self) -> &EventDispatcher {
        &self.inner.dispatcher
    }

    /// Open the connection and start the read loop.
    ///
    /// # Errors
    ///
    /// Returns `ConnectError::AlreadyConnected` unless the manager is
    /// disconnected, `Unreachable` or `Timeout` if the server cannot be
    /// reached, and `Cancelled` if [`disconnect`](Self::disconnect) ran while
    /// the attempt was in progress.
    pub async fn connect(&self, endpoint: Endpoint) -> Result<(), ConnectError> {
        let Some(attempt) = self.inner.claim_attempt() else {
            let current = self.endpoint().unwrap_or(endpoint);
            return Err(ConnectError::AlreadyConnected(current));
        };

        *lock(&self.inner.endpoint) = Some(endpoint.clone());
        info!("Connecting to {}", endpoint);

        let timeout = self.inner.options.connect_timeout;
        let connect = TcpStream::connect((endpoint.host.as_str(), endpoint.port));
        let stream = match tokio::time::timeout(timeout, connect).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(source)) => {
                self.inner
                    .finish_attempt(attempt, ConnectionState::Disconnected);
                return Err(ConnectError::Unreachable { endpoint, source });
            }
            Err(_) => {
                self.inner
                    .finish_attempt(attempt, ConnectionState::Disconnected);
                return Err(ConnectError::Timeout { endpoint, timeout });
            }
        };

        if let Err(e) = stream.set_nodelay(true) {
            debug!("Could not disable Nagle's algorithm: {}", e);
        }

        let (read_half, write_half) = stream.into_split();
        let framing = self.inner.options.framing;

        let mut writer = self.inner.writer.lock().await;
        if !self.inner.finish_attempt(attempt, ConnectionState::Connected) {
            return Err(ConnectError::Cancelled(endpoint));
        }

        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        *lock(&self.inner.assembler) = FrameAssembler::new(framing);
        *writer = Some(FramedWrite::new(write_half, CommandCodec::new(framing)));

        let handle = tokio::spawn(read_loop(
            Arc::downgrade(&self.inner),
            read_half,
            generation,
        ));
        *lock(&self.inner.reader) = Some(handle);
        drop(writer);

        info!("Connected to {} ({} framing)", endpoint, framing);
        Ok(())
    }

    /// Encode `command` and write it to the server.
    ///
    /// Returns once the bytes have been handed to the socket; the reply, if
    /// any, arrives later through the dispatcher.
    ///
    /// # Errors
    ///
    /// Returns `SendError::NotConnected` (nothing is written) unless connected,
    /// `SendError::Encode` if a field contains a protocol delimiter, and
    /// `Timeout`/`Io` if the write fails. After a failed write the connection
    /// is torn down, since a partial frame may already be on the wire.
    pub async fn send(&self, command: OutboundCommand) -> Result<(), SendError> {
        if !self.is_connected() {
            return Err(SendError::NotConnected);
        }

        let mut slot = self.inner.writer.lock().await;
        let Some(writer) = slot.as_mut() else {
            return Err(SendError::NotConnected);
        };

        debug!("Sending {}", command);
        let timeout = self.inner.options.send_timeout;
        let error = match tokio::time::timeout(timeout, writer.send(command)).await {
            Ok(Ok(())) => return Ok(()),
            Ok(Err(e)) => SendError::from(e),
            Err(_) => SendError::Timeout(timeout),
        };

        if !matches!(error, SendError::Encode(_)) {
            warn!("Write to server failed, closing connection: {}", error);
            drop(slot);
            self.disconnect().await;
        }

        Err(error)
    }

    /// Send `command` and wait for the server's reply to it.
    ///
    /// The protocol carries no request ids, so only one request per reply
    /// group (login, register, reset, equation) is in flight at a time; later
    /// callers wait their turn. Replies to plain [`send`](Self::send) calls of
    /// the same group cannot be told apart.
    ///
    /// # Errors
    ///
    /// Returns `RequestError::Send` if the command could not be written,
    /// `Timeout` if no reply arrives within the response timeout, and
    /// `ConnectionClosed` if the connection drops first.
    pub async fn request(&self, command: OutboundCommand) -> Result<InboundEvent, RequestError> {
        let _turn = self.inner.in_flight[response_group(&command)].lock().await;

        let mut replies = self
            .inner
            .dispatcher
            .subscribe_channel(command.response_kinds());
        let mut state = self.watch_state();

        self.send(command).await?;

        let wait = async {
            loop {
                tokio::select! {
                    biased;
                    reply = replies.recv() => {
                        return reply.ok_or(RequestError::ConnectionClosed);
                    }
                    changed = state.changed() => {
                        if changed.is_err() || *state.borrow() == ConnectionState::Disconnected {
                            return Err(RequestError::ConnectionClosed);
                        }
                    }
                }
            }
        };

        let timeout = self.inner.options.response_timeout;
        tokio::time::timeout(timeout, wait)
            .await
            .map_err(|_| RequestError::Timeout(timeout))?
    }

    /// Feed bytes delivered by the transport through framing, decoding and dispatch.
    ///
    /// The read loop calls this for every socket read. Frames that do not
    /// decode are logged and dropped.
    pub fn on_receive(&self, bytes: &[u8]) {
        self.inner.on_receive(bytes);
    }

    /// Close the connection. Does nothing if already disconnected.
    pub async fn disconnect(&self) {
        let mut slot = self.inner.writer.lock().await;
        let reader = lock(&self.inner.reader).take();

        if reader.is_none() && slot.is_none() {
            self.inner.cancel_attempt();
            return;
        }
        self.inner.generation.fetch_add(1, Ordering::SeqCst);

        if let Some(handle) = reader {
            handle.abort();
            let _ = handle.await;
        }

        if let Some(mut writer) = slot.take() {
            let timeout = self.inner.options.send_timeout;
            match tokio::time::timeout(timeout, writer.close()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => debug!("Error while closing connection: {}", e),
                Err(_) => debug!("Closing connection timed out after {:?}", timeout),
            }
        }
        drop(slot);

        *lock(&self.inner.assembler) = FrameAssembler::new(self.inner.options.framing);
        self.inner.set_state(ConnectionState::Disconnected);

        match self.endpoint() {
            Some(endpoint) => info!("Disconnected from {}", endpoint),
            None => info!("Disconnected"),
        }
    }

    /// Orderly process-exit teardown: disconnect, then drop every subscription.
    pub async fn shutdown(&self) {
        self.disconnect().await;
        self.inner.dispatcher.clear();
        debug!("Connection manager shut down");
    }
}
