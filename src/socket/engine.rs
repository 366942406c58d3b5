//! Socket state machine.
//!
//! One [`Socket`] exists per connection identifier. It turns stream
//! operations into AT exchanges on the shared [`CommandChannel`] and turns
//! the identifier-tagged URCs back into buffered bytes and end-of-stream.
//!
//! # States
//!
//! ```text
//! Configuring ──► Idle ──► Connecting ──► Connected ──► Closing ──► Closed
//!                  ▲            │              │                      ▲
//!                  └────────────┘              └── NO CARRIER / #SS:0 ┘
//! ```
//!
//! | Transition | Trigger | Commands |
//! |------------|---------|----------|
//! | Configuring → Idle | [`Socket::configure`] | `AT#SCFGEXT`, `AT#SCFGEXT2` |
//! | Idle → Connected | [`Socket::connect`] | `AT#SD` |
//! | Connected → Closed | [`Socket::close`] | `AT#SH` |
//! | Connected → Closed | `NO CARRIER: <id>` or `#SS: <id>,0` | none |
//!
//! # Receive Path
//!
//! URC handlers only forward parsed notifications to a per-connection pump
//! task. The pump appends data to the [`ReceiveBuffer`], issues `AT#SRECV`
//! in fetch mode while the buffer has room, and applies the link-dropped
//! transition. The pump closes the buffer when it stops, so bytes received
//! before a drop remain readable ahead of end-of-stream.
//!
//! A failed `AT#SRECV` is retried a few times after a short delay. Once the
//! retries are spent, the next [`Socket::read`] on an empty buffer resumes
//! fetching.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::{Instant, sleep_until};
use tracing::{debug, info, trace, warn};

use crate::error::{Error, Result};
use crate::identifiers::ConnId;
use crate::protocol::command::{MAX_RECV_LEN, MAX_SEND_LEN};
use crate::protocol::notification::{self, SocketNotification};
use crate::protocol::{Captures, Command, decode_hex};
use crate::transport::{CommandChannel, NotificationHandler};

use super::buffer::ReceiveBuffer;
use super::options::{ConnectOptions, ReceiveMode};
use super::pool::PoolInner;

// ============================================================================
// Constants
// ============================================================================

/// Default timeout for `AT#SD`.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(140);

/// Default receive buffer threshold.
pub const DEFAULT_RECV_BUFFER_CAPACITY: usize = 64 * 1024;

/// Default maximum bytes per `AT#SSENDEXT`.
pub const DEFAULT_SEND_CHUNK_SIZE: usize = MAX_SEND_LEN;

/// Delay before the pump retries a failed `AT#SRECV`.
const FETCH_RETRY_DELAY: Duration = Duration::from_millis(200);

/// Consecutive failed fetches before the pump waits for the reader.
const MAX_FETCH_RETRIES: u32 = 3;

// ============================================================================
// SocketState
// ============================================================================

/// Local lifecycle state of a socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SocketState {
    /// Link configuration not yet applied.
    Configuring,
    /// Ready to connect.
    Idle,
    /// `AT#SD` in flight.
    Connecting,
    /// Connection established.
    Connected,
    /// `AT#SH` in flight.
    Closing,
    /// Terminal; the identifier must be freed before reuse.
    Closed,
}

impl fmt::Display for SocketState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Configuring => "Configuring",
            Self::Idle => "Idle",
            Self::Connecting => "Connecting",
            Self::Connected => "Connected",
            Self::Closing => "Closing",
            Self::Closed => "Closed",
        };
        f.write_str(name)
    }
}

// ============================================================================
// RemoteSocketState
// ============================================================================

/// Socket state as reported by `AT#SS`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RemoteSocketState {
    /// `0`: socket closed.
    Closed,
    /// `1`: socket with an active data transfer connection.
    Connected,
    /// `2`: socket suspended.
    Suspended,
    /// `3`: socket suspended with pending data.
    SuspendedWithPendingData,
    /// `4`: socket listening.
    Listening,
    /// `5`: incoming connection waiting to be accepted.
    IncomingRequest,
    /// `6`: resolving DNS.
    ResolvingDns,
    /// `7`: connecting.
    Connecting,
}

impl RemoteSocketState {
    /// Returns `true` unless the modem reports the link closed.
    #[inline]
    #[must_use]
    pub fn is_open(self) -> bool {
        self != Self::Closed
    }
}

impl TryFrom<u8> for RemoteSocketState {
    type Error = Error;

    fn try_from(code: u8) -> Result<Self> {
        Ok(match code {
            0 => Self::Closed,
            1 => Self::Connected,
            2 => Self::Suspended,
            3 => Self::SuspendedWithPendingData,
            4 => Self::Listening,
            5 => Self::IncomingRequest,
            6 => Self::ResolvingDns,
            7 => Self::Connecting,
            other => {
                return Err(Error::protocol(format!("unknown socket state code {other}")));
            }
        })
    }
}

// ============================================================================
// SocketSettings
// ============================================================================

/// Per-socket knobs derived from the modem configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct SocketSettings {
    pub receive_mode: ReceiveMode,
    pub connect_timeout: Duration,
    pub recv_buffer_capacity: usize,
    pub send_chunk_size: usize,
}

impl Default for SocketSettings {
    fn default() -> Self {
        Self {
            receive_mode: ReceiveMode::default(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            recv_buffer_capacity: DEFAULT_RECV_BUFFER_CAPACITY,
            send_chunk_size: DEFAULT_SEND_CHUNK_SIZE,
        }
    }
}

// ============================================================================
// Stream Traits
// ============================================================================

/// Byte sink half of a stream.
#[async_trait]
pub trait ByteSink: Send + Sync {
    /// Sends all of `data`, in order. Returns the number of bytes sent.
    async fn send(&self, data: &[u8]) -> Result<usize>;

    /// Ends the stream.
    async fn finish(&self) -> Result<()>;
}

/// Byte source half of a stream.
#[async_trait]
pub trait ByteSource: Send + Sync {
    /// Receives the next bytes; `None` at end-of-stream.
    async fn recv(&self) -> Result<Option<Vec<u8>>>;
}

// ============================================================================
// Types
// ============================================================================

/// Input of the receive pump.
#[derive(Debug)]
enum LinkEvent {
    /// Parsed per-socket URC.
    Notification(SocketNotification),
    /// The reader drained the buffer or is waiting on an empty one.
    Resume,
}

/// Shared socket state.
struct SocketInner {
    conn_id: ConnId,
    channel: Arc<dyn CommandChannel>,
    settings: SocketSettings,
    state: Mutex<SocketState>,
    remote: Mutex<Option<ConnectOptions>>,
    /// Serializes configure, connect, write and close.
    op_lock: tokio::sync::Mutex<()>,
    rx: ReceiveBuffer,
    /// Feeds the pump while URC handlers are registered.
    events: Mutex<Option<mpsc::UnboundedSender<LinkEvent>>>,
    pool: Weak<PoolInner>,
}

// ============================================================================
// Socket
// ============================================================================

/// A stream connection multiplexed over the modem link.
///
/// Cloning yields another handle to the same socket.
#[derive(Clone)]
pub struct Socket {
    inner: Arc<SocketInner>,
}

impl fmt::Debug for Socket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Socket")
            .field("conn_id", &self.inner.conn_id)
            .field("state", &self.state())
            .field("buffered", &self.inner.rx.len())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Socket - Constructor
// ============================================================================

impl Socket {
    /// Creates a socket in `Configuring`.
    pub(crate) fn new(
        conn_id: ConnId,
        channel: Arc<dyn CommandChannel>,
        settings: SocketSettings,
        pool: Weak<PoolInner>,
    ) -> Self {
        Self {
            inner: Arc::new(SocketInner {
                conn_id,
                channel,
                settings,
                state: Mutex::new(SocketState::Configuring),
                remote: Mutex::new(None),
                op_lock: tokio::sync::Mutex::new(()),
                rx: ReceiveBuffer::new(settings.recv_buffer_capacity),
                events: Mutex::new(None),
                pool,
            }),
        }
    }
}

// ============================================================================
// Socket - Accessors
// ============================================================================

impl Socket {
    /// Returns the connection identifier.
    #[inline]
    #[must_use]
    pub fn conn_id(&self) -> ConnId {
        self.inner.conn_id
    }

    /// Returns the current state.
    #[inline]
    #[must_use]
    pub fn state(&self) -> SocketState {
        *self.inner.state.lock()
    }

    /// Returns `true` while connected.
    #[inline]
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state() == SocketState::Connected
    }

    /// Returns the options of the last successful connect.
    #[inline]
    #[must_use]
    pub fn remote(&self) -> Option<ConnectOptions> {
        self.inner.remote.lock().clone()
    }

    /// Returns the number of received bytes not yet read.
    #[inline]
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.inner.rx.len()
    }

    /// Returns `true` if both handles refer to the same socket.
    #[inline]
    #[must_use]
    pub(crate) fn same_as(&self, other: &Socket) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

// ============================================================================
// Socket - Lifecycle
// ============================================================================

impl Socket {
    /// Applies the one-time link configuration.
    ///
    /// Failures are logged; the socket becomes `Idle` either way. A no-op
    /// unless the socket is still `Configuring`.
    pub async fn configure(&self) {
        let _guard = self.inner.op_lock.lock().await;
        self.inner.configure_locked().await;
    }

    /// Opens the connection.
    ///
    /// The data-available and link-dropped handlers are registered before
    /// `AT#SD` is issued.
    ///
    /// # Errors
    ///
    /// - [`Error::AlreadyConnected`] unless the socket is `Idle`
    /// - [`Error::InvalidArgument`] for invalid options
    /// - [`Error::Channel`] / [`Error::CommandTimeout`] if `AT#SD` fails;
    ///   the socket stays `Idle`
    pub async fn connect(&self, options: ConnectOptions) -> Result<()> {
        let inner = &self.inner;
        let _guard = inner.op_lock.lock().await;

        inner.configure_locked().await;

        let state = self.state();
        if state != SocketState::Idle {
            return Err(Error::already_connected(inner.conn_id, state));
        }

        options.validate()?;
        let local_port = options.resolve_local_port();

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        inner.register_handlers(&events_tx)?;
        *inner.events.lock() = Some(events_tx);
        inner.set_state(SocketState::Connecting);

        info!(
            conn_id = %inner.conn_id,
            host = %options.host,
            port = options.port,
            protocol = %options.protocol,
            local_port,
            "Connecting"
        );

        let command = Command::socket_dial(inner.conn_id, &options, local_port)
            .with_timeout(inner.settings.connect_timeout);

        match inner.channel.issue(command).await {
            Ok(_) => {
                *inner.remote.lock() = Some(options);
                inner.set_state(SocketState::Connected);
                tokio::spawn(SocketInner::run_pump(Arc::clone(inner), events_rx));
                info!(conn_id = %inner.conn_id, "Connected");
                Ok(())
            }

            Err(e) => {
                inner.teardown_handlers();
                inner.set_state(SocketState::Idle);
                warn!(conn_id = %inner.conn_id, error = %e, "Connect failed");
                Err(e)
            }
        }
    }

    /// Closes the connection.
    ///
    /// Handlers are removed before `AT#SH` is issued. The socket ends up
    /// `Closed` whether or not `AT#SH` succeeds. Closing a closed socket
    /// completes immediately without a command.
    ///
    /// # Errors
    ///
    /// Returns the `AT#SH` failure.
    pub async fn close(&self) -> Result<()> {
        let inner = &self.inner;
        let _guard = inner.op_lock.lock().await;

        match self.state() {
            SocketState::Closed => {
                trace!(conn_id = %inner.conn_id, "Already closed");
                return Ok(());
            }

            SocketState::Configuring | SocketState::Idle => {
                inner.set_state(SocketState::Closed);
                inner.rx.close();
                return Ok(());
            }

            SocketState::Connecting | SocketState::Connected | SocketState::Closing => {}
        }

        inner.set_state(SocketState::Closing);
        inner.teardown_handlers();

        let result = inner
            .channel
            .issue(Command::socket_shutdown(inner.conn_id))
            .await
            .map(|_| ());

        inner.set_state(SocketState::Closed);

        match &result {
            Ok(()) => info!(conn_id = %inner.conn_id, "Closed"),
            Err(e) => warn!(conn_id = %inner.conn_id, error = %e, "Close command failed"),
        }

        result
    }

    /// Closes the socket and returns its identifier to the pool.
    ///
    /// # Errors
    ///
    /// Returns the close failure; the identifier is released regardless.
    pub async fn free(&self) -> Result<()> {
        let closed = self.close().await;

        if let Some(pool) = self.inner.pool.upgrade() {
            pool.release(self)?;
        }

        closed
    }

    /// Polls `AT#SS` and applies the link-dropped transition if the modem
    /// reports the socket closed.
    ///
    /// # Errors
    ///
    /// - [`Error::Channel`] / [`Error::CommandTimeout`] if `AT#SS` fails
    /// - [`Error::Protocol`] for an unknown state code
    pub async fn check_connection(&self) -> Result<RemoteSocketState> {
        let inner = &self.inner;

        let caps = inner
            .channel
            .issue(Command::socket_status(inner.conn_id)?)
            .await?;
        let remote = RemoteSocketState::try_from(caps.require::<u8>(2, "socket state")?)?;

        trace!(conn_id = %inner.conn_id, remote = ?remote, "Socket status");

        if !remote.is_open() {
            inner.link_dropped(None);
        }

        Ok(remote)
    }
}

// ============================================================================
// Socket - Data
// ============================================================================

impl Socket {
    /// Writes `data`, split into `AT#SSENDEXT` exchanges.
    ///
    /// Completes after the modem acknowledged every chunk. An empty write
    /// completes immediately.
    ///
    /// # Errors
    ///
    /// - [`Error::NotConnected`] unless connected
    /// - [`Error::Channel`] / [`Error::CommandTimeout`] if a chunk fails;
    ///   the socket stays connected
    pub async fn write(&self, data: &[u8]) -> Result<usize> {
        let inner = &self.inner;
        let _guard = inner.op_lock.lock().await;

        if self.state() != SocketState::Connected {
            return Err(Error::not_connected(inner.conn_id));
        }

        if data.is_empty() {
            return Ok(0);
        }

        for chunk in data.chunks(inner.settings.send_chunk_size) {
            trace!(conn_id = %inner.conn_id, bytes = chunk.len(), "Sending chunk");

            if let Err(e) = inner
                .channel
                .issue(Command::socket_send(inner.conn_id, chunk.to_vec()))
                .await
            {
                warn!(conn_id = %inner.conn_id, error = %e, "Write failed");
                return Err(e);
            }
        }

        Ok(data.len())
    }

    /// Waits for received bytes and returns everything buffered.
    ///
    /// Returns `None` at end-of-stream, after all buffered bytes were read.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotConnected`] if the socket never connected.
    pub async fn read(&self) -> Result<Option<Vec<u8>>> {
        let inner = &self.inner;

        match self.state() {
            SocketState::Configuring | SocketState::Idle | SocketState::Connecting => {
                return Err(Error::not_connected(inner.conn_id));
            }
            SocketState::Connected | SocketState::Closing | SocketState::Closed => {}
        }

        let fetching = inner.settings.receive_mode == ReceiveMode::Fetch;

        // Parking on an empty buffer must not wait on a fetch that failed.
        if fetching && inner.rx.is_empty() {
            inner.send_event(LinkEvent::Resume);
        }

        let data = inner.rx.read().await;

        if data.is_some() && fetching {
            inner.send_event(LinkEvent::Resume);
        }

        Ok(data)
    }
}

// ============================================================================
// Socket - Stream Traits
// ============================================================================

#[async_trait]
impl ByteSink for Socket {
    async fn send(&self, data: &[u8]) -> Result<usize> {
        self.write(data).await
    }

    async fn finish(&self) -> Result<()> {
        self.close().await
    }
}

#[async_trait]
impl ByteSource for Socket {
    async fn recv(&self) -> Result<Option<Vec<u8>>> {
        self.read().await
    }
}

// ============================================================================
// SocketInner
// ============================================================================

impl SocketInner {
    fn set_state(&self, state: SocketState) {
        let previous = std::mem::replace(&mut *self.state.lock(), state);
        if previous != state {
            debug!(conn_id = %self.conn_id, from = %previous, to = %state, "Socket state");
        }
    }

    /// Caller holds `op_lock`.
    async fn configure_locked(&self) {
        if *self.state.lock() != SocketState::Configuring {
            return;
        }

        let commands = [
            Command::socket_config_ext(self.conn_id, self.settings.receive_mode),
            Command::socket_config_ext2(self.conn_id),
        ];

        for command in commands {
            let line = command.line().to_string();
            if let Err(e) = self.channel.issue(command).await {
                warn!(conn_id = %self.conn_id, command = %line, error = %e, "Socket configuration failed");
            }
        }

        self.set_state(SocketState::Idle);
    }

    fn register_handlers(&self, events: &mpsc::UnboundedSender<LinkEvent>) -> Result<()> {
        let conn_id = self.conn_id;
        let mode = self.settings.receive_mode;

        let ring_pattern = notification::socket_ring_pattern(conn_id, mode)?;
        let close_pattern = notification::socket_close_pattern(conn_id)?;

        let ring_tx = events.clone();
        let on_ring: NotificationHandler = Arc::new(move |caps: &Captures| {
            match SocketNotification::from_ring(caps, mode) {
                Ok(parsed) => {
                    let _ = ring_tx.send(LinkEvent::Notification(parsed));
                }
                Err(e) => warn!(conn_id = %conn_id, error = %e, "Dropping malformed ring"),
            }
        });

        let close_tx = events.clone();
        let on_close: NotificationHandler = Arc::new(move |caps: &Captures| {
            match SocketNotification::from_close(caps) {
                Ok(parsed) => {
                    let _ = close_tx.send(LinkEvent::Notification(parsed));
                }
                Err(e) => warn!(conn_id = %conn_id, error = %e, "Dropping malformed close"),
            }
        });

        self.channel.register_notification(
            &notification::socket_ring_name(conn_id),
            ring_pattern,
            on_ring,
        );
        self.channel.register_notification(
            &notification::socket_close_name(conn_id),
            close_pattern,
            on_close,
        );

        Ok(())
    }

    /// Removes the URC handlers and stops feeding the pump.
    fn teardown_handlers(&self) {
        self.channel
            .deregister_notification(&notification::socket_ring_name(self.conn_id));
        self.channel
            .deregister_notification(&notification::socket_close_name(self.conn_id));
        self.events.lock().take();
    }

    fn send_event(&self, event: LinkEvent) {
        if let Some(events) = self.events.lock().as_ref() {
            let _ = events.send(event);
        }
    }

    /// Connected → Closed without `AT#SH`.
    fn link_dropped(&self, cause: Option<u32>) {
        {
            let mut state = self.state.lock();
            if *state != SocketState::Connected {
                return;
            }
            *state = SocketState::Closed;
        }

        self.teardown_handlers();
        info!(conn_id = %self.conn_id, cause = ?cause, "Link dropped");
    }

    /// Drains link events until every sender is gone, then ends the stream.
    async fn run_pump(inner: Arc<Self>, mut events: mpsc::UnboundedReceiver<LinkEvent>) {
        let mut unfetched = 0usize;
        let mut failures = 0u32;
        let mut retry_at: Option<Instant> = None;

        loop {
            let retry = async move {
                match retry_at {
                    Some(deadline) => sleep_until(deadline).await,
                    None => std::future::pending().await,
                }
            };

            let event = tokio::select! {
                event = events.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
                () = retry => LinkEvent::Resume,
            };

            let fetched = match event {
                LinkEvent::Notification(SocketNotification::Data(bytes)) => {
                    inner.rx.push(&bytes);
                    continue;
                }

                LinkEvent::Notification(SocketNotification::Available(len)) => {
                    unfetched = len;
                    inner.fetch_pending(&mut unfetched).await
                }

                LinkEvent::Resume => {
                    if unfetched == 0 {
                        continue;
                    }
                    inner.fetch_pending(&mut unfetched).await
                }

                LinkEvent::Notification(SocketNotification::Dropped { cause }) => {
                    inner.link_dropped(Some(cause));
                    continue;
                }
            };

            if fetched {
                failures = 0;
                retry_at = None;
            } else {
                failures += 1;
                if failures <= MAX_FETCH_RETRIES {
                    retry_at = Some(Instant::now() + FETCH_RETRY_DELAY);
                } else {
                    warn!(conn_id = %inner.conn_id, pending = unfetched, "Fetch retries exhausted, waiting for reader");
                    failures = 0;
                    retry_at = None;
                }
            }
        }

        inner.rx.close();
        debug!(conn_id = %inner.conn_id, "Receive pump stopped");
    }

    /// Pulls pending bytes with `AT#SRECV` while the buffer has room.
    ///
    /// Returns `false` when an exchange failed and bytes are still pending.
    async fn fetch_pending(&self, unfetched: &mut usize) -> bool {
        while *unfetched > 0 {
            let room = self.rx.room();
            if room == 0 {
                debug!(conn_id = %self.conn_id, pending = *unfetched, "Receive buffer full, deferring fetch");
                return true;
            }

            let len = (*unfetched).min(room).min(MAX_RECV_LEN);

            let command = match Command::socket_receive(self.conn_id, len) {
                Ok(command) => command,
                Err(e) => {
                    warn!(conn_id = %self.conn_id, error = %e, "Invalid fetch command");
                    *unfetched = 0;
                    return true;
                }
            };

            let caps = match self.channel.issue(command).await {
                Ok(caps) => caps,
                Err(e) => {
                    warn!(conn_id = %self.conn_id, error = %e, pending = *unfetched, "Fetch failed");
                    return false;
                }
            };

            let data = match decode_hex(caps.get(3).unwrap_or_default()) {
                Ok(data) => data,
                Err(e) => {
                    warn!(conn_id = %self.conn_id, error = %e, "Dropping malformed fetch response");
                    return false;
                }
            };

            *unfetched = caps
                .parse::<usize>(4)
                .unwrap_or_else(|| unfetched.saturating_sub(data.len()));

            if data.is_empty() {
                *unfetched = 0;
                return true;
            }

            self.rx.push(&data);
        }

        true
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    use proptest::prelude::*;
    use tokio::time::timeout;

    use crate::protocol::encode_hex;
    use crate::transport::mock::{Reply, ScriptedChannel};

    fn conn(value: u8) -> ConnId {
        ConnId::new(value).expect("valid id")
    }

    fn socket_with(channel: &Arc<ScriptedChannel>, settings: SocketSettings) -> Socket {
        let channel: Arc<dyn CommandChannel> = Arc::clone(channel) as Arc<dyn CommandChannel>;
        Socket::new(conn(1), channel, settings, Weak::new())
    }

    fn socket(channel: &Arc<ScriptedChannel>) -> Socket {
        socket_with(channel, SocketSettings::default())
    }

    async fn connected(channel: &Arc<ScriptedChannel>, settings: SocketSettings) -> Socket {
        let socket = socket_with(channel, settings);
        socket
            .connect(ConnectOptions::tcp("example.com", 80))
            .await
            .expect("connect");
        channel.clear();
        socket
    }

    /// Replies to `AT#SRECV=<id>,<n>` with `n` bytes from `source`.
    fn fetch_responder(source: Vec<u8>) -> impl FnMut(&str) -> Reply + Send + 'static {
        let mut offset = 0usize;
        move |line: &str| {
            let Some(args) = line.strip_prefix("AT#SRECV=") else {
                return Reply::Ok;
            };
            let len: usize = args
                .split(',')
                .nth(1)
                .and_then(|n| n.parse().ok())
                .unwrap_or(0);
            let end = (offset + len).min(source.len());
            let chunk = &source[offset..end];
            offset = end;
            Reply::Text(format!(
                "#SRECV: 1,{},{}\r\n\r\nOK\r\n",
                chunk.len(),
                encode_hex(chunk)
            ))
        }
    }

    #[test]
    fn test_state_display() {
        assert_eq!(SocketState::Connected.to_string(), "Connected");
        assert_eq!(SocketState::Closing.to_string(), "Closing");
    }

    #[test]
    fn test_remote_state_codes() {
        assert_eq!(
            RemoteSocketState::try_from(0).expect("code"),
            RemoteSocketState::Closed
        );
        assert_eq!(
            RemoteSocketState::try_from(7).expect("code"),
            RemoteSocketState::Connecting
        );
        assert!(RemoteSocketState::try_from(8).is_err());
        assert!(RemoteSocketState::Suspended.is_open());
    }

    #[tokio::test]
    async fn test_configure_issues_link_commands_once() {
        let channel = ScriptedChannel::new();
        let socket = socket(&channel);

        socket.configure().await;
        socket.configure().await;

        assert_eq!(channel.lines(), vec!["AT#SCFGEXT=1,2,1,0", "AT#SCFGEXT2=1,1,1"]);
        assert_eq!(socket.state(), SocketState::Idle);
    }

    #[tokio::test]
    async fn test_configure_failure_still_idle() {
        let channel = ScriptedChannel::with_responder(|_| Reply::Error("ERROR".into()));
        let socket = socket(&channel);

        socket.configure().await;
        assert_eq!(socket.state(), SocketState::Idle);
    }

    #[tokio::test]
    async fn test_connect_scenario() {
        let channel = ScriptedChannel::new();
        let socket = socket(&channel);
        socket.configure().await;
        channel.clear();

        socket
            .connect(ConnectOptions::tcp("example.com", 80))
            .await
            .expect("connect");

        let issued = channel.issued();
        assert_eq!(issued.len(), 1);
        assert_eq!(issued[0].line, "AT#SD=1,0,80,\"example.com\",0,80,1");
        assert!(socket.is_connected());
        assert_eq!(socket.remote(), Some(ConnectOptions::tcp("example.com", 80)));
    }

    #[tokio::test]
    async fn test_handlers_registered_before_dial() {
        let channel = ScriptedChannel::new();
        let socket = socket(&channel);

        socket
            .connect(ConnectOptions::tcp("example.com", 80))
            .await
            .expect("connect");

        let dial = channel
            .issued()
            .into_iter()
            .find(|i| i.line.starts_with("AT#SD="))
            .expect("dial issued");
        assert_eq!(dial.registered, vec!["socketClose-1", "socketRing-1"]);
    }

    #[tokio::test]
    async fn test_connect_failure_reverts_to_idle() {
        let channel = ScriptedChannel::with_responder(|line| {
            if line.starts_with("AT#SD=") {
                Reply::Error("+CME ERROR: 559".into())
            } else {
                Reply::Ok
            }
        });
        let socket = socket(&channel);

        let err = socket
            .connect(ConnectOptions::tcp("example.com", 80))
            .await
            .unwrap_err();

        match err {
            Error::Channel { command, .. } => {
                assert_eq!(command, "AT#SD=1,0,80,\"example.com\",0,80,1");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(socket.state(), SocketState::Idle);
        assert!(channel.registered().is_empty());

        // Identifier still usable
        channel.set_responder(|_| Reply::Ok);
        socket
            .connect(ConnectOptions::tcp("example.com", 80))
            .await
            .expect("retry");
    }

    #[tokio::test]
    async fn test_connect_twice_rejected() {
        let channel = ScriptedChannel::new();
        let socket = connected(&channel, SocketSettings::default()).await;

        let err = socket
            .connect(ConnectOptions::tcp("example.com", 80))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::AlreadyConnected {
                state: SocketState::Connected,
                ..
            }
        ));
        assert!(channel.lines().is_empty());
    }

    #[tokio::test]
    async fn test_connect_invalid_options_issues_nothing() {
        let channel = ScriptedChannel::new();
        let socket = socket(&channel);
        socket.configure().await;
        channel.clear();

        let err = socket
            .connect(ConnectOptions::tcp("", 80))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument { .. }));
        assert!(channel.lines().is_empty());
        assert_eq!(socket.state(), SocketState::Idle);
    }

    #[tokio::test]
    async fn test_udp_connect_uses_ephemeral_port() {
        let channel = ScriptedChannel::new();
        let socket = socket(&channel);

        socket
            .connect(ConnectOptions::udp("10.0.0.1", 5683))
            .await
            .expect("connect");

        let dial = channel
            .lines()
            .into_iter()
            .find(|l| l.starts_with("AT#SD="))
            .expect("dial");
        let fields: Vec<&str> = dial.split(',').collect();
        assert_eq!(fields[1], "1");
        let local_port: u16 = fields[5].parse().expect("local port");
        assert!(local_port >= 1024);
    }

    #[tokio::test]
    async fn test_write_before_connect_rejected() {
        let channel = ScriptedChannel::new();
        let socket = socket(&channel);
        socket.configure().await;
        channel.clear();

        assert!(matches!(
            socket.write(b"hello").await,
            Err(Error::NotConnected { .. })
        ));
        assert!(matches!(socket.read().await, Err(Error::NotConnected { .. })));
        assert!(channel.lines().is_empty());
    }

    #[tokio::test]
    async fn test_write_scenario() {
        let channel = ScriptedChannel::new();
        let socket = connected(&channel, SocketSettings::default()).await;

        assert_eq!(socket.write(b"hello").await.expect("write"), 5);

        let issued = channel.issued();
        assert_eq!(issued.len(), 1);
        assert_eq!(issued[0].line, "AT#SSENDEXT=1,5");
        assert_eq!(issued[0].payload.as_deref(), Some(&b"hello"[..]));
    }

    #[tokio::test]
    async fn test_empty_write_issues_nothing() {
        let channel = ScriptedChannel::new();
        let socket = connected(&channel, SocketSettings::default()).await;

        assert_eq!(socket.write(b"").await.expect("write"), 0);
        assert!(channel.lines().is_empty());
    }

    #[tokio::test]
    async fn test_large_write_is_chunked() {
        let channel = ScriptedChannel::new();
        let socket = connected(&channel, SocketSettings::default()).await;

        let data: Vec<u8> = (0..3200u32).map(|i| (i % 251) as u8).collect();
        socket.write(&data).await.expect("write");

        assert_eq!(
            channel.lines(),
            vec!["AT#SSENDEXT=1,1500", "AT#SSENDEXT=1,1500", "AT#SSENDEXT=1,200"]
        );
        let sent: Vec<u8> = channel
            .issued()
            .into_iter()
            .filter_map(|i| i.payload)
            .flatten()
            .collect();
        assert_eq!(sent, data);
    }

    #[tokio::test]
    async fn test_write_failure_keeps_connection() {
        let channel = ScriptedChannel::new();
        let socket = connected(&channel, SocketSettings::default()).await;

        channel.set_responder(|_| Reply::Error("ERROR".into()));
        assert!(socket.write(b"x").await.is_err());
        assert!(socket.is_connected());
    }

    #[tokio::test]
    async fn test_inline_ring_delivers_bytes() {
        let channel = ScriptedChannel::new();
        let socket = connected(&channel, SocketSettings::default()).await;

        assert!(channel.inject("SRING: 1,5,68656C6C6F\r\n"));

        let data = timeout(Duration::from_secs(1), socket.read())
            .await
            .expect("read in time")
            .expect("read");
        assert_eq!(data, Some(b"hello".to_vec()));
    }

    #[tokio::test]
    async fn test_ring_for_other_socket_ignored() {
        let channel = ScriptedChannel::new();
        let socket = connected(&channel, SocketSettings::default()).await;

        assert!(!channel.inject("SRING: 2,1,41\r\n"));
        assert_eq!(socket.buffered(), 0);
    }

    #[tokio::test]
    async fn test_malformed_ring_dropped() {
        let channel = ScriptedChannel::new();
        let socket = connected(&channel, SocketSettings::default()).await;

        assert!(channel.inject("SRING: 1,2,ABC\r\n"));
        assert!(channel.inject("SRING: 1,1,41\r\n"));

        let data = timeout(Duration::from_secs(1), socket.read())
            .await
            .expect("read in time")
            .expect("read");
        assert_eq!(data, Some(b"A".to_vec()));
        assert!(socket.is_connected());
    }

    #[tokio::test]
    async fn test_link_dropped_scenario() {
        let channel = ScriptedChannel::new();
        let socket = connected(&channel, SocketSettings::default()).await;

        assert!(channel.inject("SRING: 1,2,6869\r\n"));
        assert!(channel.inject("NO CARRIER: 1,0\r\n"));

        // Bytes received before the drop come first, then end-of-stream.
        let first = timeout(Duration::from_secs(1), socket.read())
            .await
            .expect("read in time")
            .expect("read");
        assert_eq!(first, Some(b"hi".to_vec()));

        let second = timeout(Duration::from_secs(1), socket.read())
            .await
            .expect("read in time")
            .expect("read");
        assert_eq!(second, None);

        assert_eq!(socket.state(), SocketState::Closed);
        assert!(channel.registered().is_empty());
        assert!(!channel.lines().iter().any(|l| l.starts_with("AT#SH")));
    }

    #[tokio::test]
    async fn test_close_deregisters_before_shutdown() {
        let channel = ScriptedChannel::new();
        let socket = connected(&channel, SocketSettings::default()).await;

        socket.close().await.expect("close");

        let issued = channel.issued();
        assert_eq!(issued.len(), 1);
        assert_eq!(issued[0].line, "AT#SH=1");
        assert!(issued[0].registered.is_empty());
        assert_eq!(socket.state(), SocketState::Closed);

        let eof = timeout(Duration::from_secs(1), socket.read())
            .await
            .expect("read in time")
            .expect("read");
        assert_eq!(eof, None);
    }

    #[tokio::test]
    async fn test_close_failure_still_closed() {
        let channel = ScriptedChannel::new();
        let socket = connected(&channel, SocketSettings::default()).await;

        channel.set_responder(|_| Reply::Timeout);
        assert!(socket.close().await.unwrap_err().is_timeout());
        assert_eq!(socket.state(), SocketState::Closed);
    }

    #[tokio::test]
    async fn test_close_idempotent() {
        let channel = ScriptedChannel::new();
        let socket = connected(&channel, SocketSettings::default()).await;

        socket.close().await.expect("close");
        channel.clear();
        socket.close().await.expect("close again");
        assert!(channel.lines().is_empty());
    }

    #[tokio::test]
    async fn test_close_idle_issues_nothing() {
        let channel = ScriptedChannel::new();
        let socket = socket(&channel);
        socket.configure().await;
        channel.clear();

        socket.close().await.expect("close");
        assert_eq!(socket.state(), SocketState::Closed);
        assert!(channel.lines().is_empty());

        // A closed socket is not reusable until freed.
        assert!(matches!(
            socket.connect(ConnectOptions::tcp("example.com", 80)).await,
            Err(Error::AlreadyConnected {
                state: SocketState::Closed,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_check_connection_detects_drop() {
        let channel = ScriptedChannel::new();
        let socket = connected(&channel, SocketSettings::default()).await;

        channel.set_responder(|_| Reply::Text("#SS: 1,0\r\n\r\nOK\r\n".into()));
        let remote = socket.check_connection().await.expect("status");

        assert_eq!(remote, RemoteSocketState::Closed);
        assert_eq!(socket.state(), SocketState::Closed);
        assert_eq!(channel.lines(), vec!["AT#SS=1"]);
    }

    #[tokio::test]
    async fn test_check_connection_open_keeps_state() {
        let channel = ScriptedChannel::new();
        let socket = connected(&channel, SocketSettings::default()).await;

        channel.set_responder(|_| {
            Reply::Text("#SS: 1,2,10.0.0.2,80,93.184.216.34,80\r\n\r\nOK\r\n".into())
        });
        let remote = socket.check_connection().await.expect("status");

        assert_eq!(remote, RemoteSocketState::Suspended);
        assert!(socket.is_connected());
    }

    #[tokio::test]
    async fn test_fetch_mode_pulls_announced_bytes() {
        let settings = SocketSettings {
            receive_mode: ReceiveMode::Fetch,
            ..SocketSettings::default()
        };
        let channel = ScriptedChannel::new();
        let socket = connected(&channel, settings).await;
        channel.set_responder(fetch_responder(b"hello".to_vec()));

        assert!(channel.inject("SRING: 1,5\r\n"));

        let data = timeout(Duration::from_secs(1), socket.read())
            .await
            .expect("read in time")
            .expect("read");
        assert_eq!(data, Some(b"hello".to_vec()));
        assert_eq!(channel.lines(), vec!["AT#SRECV=1,5"]);
    }

    #[tokio::test]
    async fn test_fetch_mode_respects_capacity() {
        let settings = SocketSettings {
            receive_mode: ReceiveMode::Fetch,
            recv_buffer_capacity: 4,
            ..SocketSettings::default()
        };
        let channel = ScriptedChannel::new();
        let socket = connected(&channel, settings).await;

        let source: Vec<u8> = (b'a'..=b'j').collect();
        channel.set_responder(fetch_responder(source.clone()));

        assert!(channel.inject("SRING: 1,10\r\n"));

        let mut received = Vec::new();
        while received.len() < source.len() {
            let chunk = timeout(Duration::from_secs(1), socket.read())
                .await
                .expect("read in time")
                .expect("read")
                .expect("data");
            assert!(chunk.len() <= 4);
            received.extend(chunk);
        }

        assert_eq!(received, source);
        assert!(
            channel
                .lines()
                .iter()
                .all(|l| l.starts_with("AT#SRECV=1,") && !l.ends_with(",10"))
        );
    }

    #[tokio::test]
    async fn test_fetch_mode_retries_failed_fetch() {
        let settings = SocketSettings {
            receive_mode: ReceiveMode::Fetch,
            ..SocketSettings::default()
        };
        let channel = ScriptedChannel::new();
        let socket = connected(&channel, settings).await;

        let mut first = true;
        let mut fetch = fetch_responder(b"hello".to_vec());
        channel.set_responder(move |line: &str| {
            if line.starts_with("AT#SRECV=") && std::mem::take(&mut first) {
                return Reply::Timeout;
            }
            fetch(line)
        });

        assert!(channel.inject("SRING: 1,5\r\n"));

        let data = timeout(Duration::from_secs(2), socket.read())
            .await
            .expect("read in time")
            .expect("read");
        assert_eq!(data, Some(b"hello".to_vec()));
        assert_eq!(channel.lines(), vec!["AT#SRECV=1,5", "AT#SRECV=1,5"]);
    }

    #[tokio::test]
    async fn test_fetch_mode_reader_resumes_after_retries_exhausted() {
        let settings = SocketSettings {
            receive_mode: ReceiveMode::Fetch,
            ..SocketSettings::default()
        };
        let channel = ScriptedChannel::new();
        let socket = connected(&channel, settings).await;

        channel.set_responder(|_| Reply::Error("ERROR".into()));
        assert!(channel.inject("SRING: 1,5\r\n"));

        let stalled = timeout(Duration::from_secs(1), socket.read()).await;
        assert!(stalled.is_err());
        let attempts = channel.lines().len();
        assert!(attempts > MAX_FETCH_RETRIES as usize);

        tokio::time::sleep(FETCH_RETRY_DELAY * 2).await;
        assert_eq!(channel.lines().len(), attempts);

        channel.set_responder(fetch_responder(b"hello".to_vec()));
        let data = timeout(Duration::from_secs(1), socket.read())
            .await
            .expect("read in time")
            .expect("read");
        assert_eq!(data, Some(b"hello".to_vec()));
        assert_eq!(channel.lines().len(), attempts + 1);
    }

    #[tokio::test]
    async fn test_stream_traits() {
        let channel = ScriptedChannel::new();
        let socket = connected(&channel, SocketSettings::default()).await;

        let sink: &dyn ByteSink = &socket;
        assert_eq!(sink.send(b"abc").await.expect("send"), 3);

        assert!(channel.inject("SRING: 1,3,78797A\r\n"));
        let source: &dyn ByteSource = &socket;
        let data = timeout(Duration::from_secs(1), source.recv())
            .await
            .expect("recv in time")
            .expect("recv");
        assert_eq!(data, Some(b"xyz".to_vec()));

        sink.finish().await.expect("finish");
        assert_eq!(socket.state(), SocketState::Closed);
    }

    proptest! {
        #[test]
        fn prop_writes_preserve_order(
            writes in proptest::collection::vec(proptest::collection::vec(any::<u8>(), 0..2000), 1..6),
            chunk in 1usize..=1500,
        ) {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();

            let sent = runtime.block_on(async {
                let settings = SocketSettings {
                    send_chunk_size: chunk,
                    ..SocketSettings::default()
                };
                let channel = ScriptedChannel::new();
                let socket = connected(&channel, settings).await;

                for data in &writes {
                    socket.write(data).await.unwrap();
                }

                channel
                    .issued()
                    .into_iter()
                    .map(|i| {
                        let payload = i.payload.unwrap_or_default();
                        assert_eq!(i.line, format!("AT#SSENDEXT=1,{}", payload.len()));
                        assert!(!payload.is_empty() && payload.len() <= chunk);
                        payload
                    })
                    .collect::<Vec<_>>()
                    .concat()
            });

            prop_assert_eq!(sent, writes.concat());
        }
    }
}
