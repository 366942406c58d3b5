//! AT command channel over a serial byte stream.
//!
//! [`AtChannel`] is the concrete [`CommandChannel`]: it owns the serial
//! stream through a tokio task and arbitrates the single command slot.
//!
//! # Event Loop
//!
//! The spawned task handles:
//!
//! - Outgoing commands, one exchange at a time, in submission order
//! - Two-stage exchanges (line, `> ` prompt, raw payload, final result)
//! - Incoming bytes: URCs first, then the in-flight command's response,
//!   then error final results
//! - Per-command timeouts
//!
//! # Input Matching
//!
//! Leading blank lines are skipped. A complete line that matches nothing
//! while the link is idle is discarded. While a command is in flight and a
//! final result has arrived without completing it, a registered URC found
//! at a later line start is cut out of the response and dispatched, and the
//! response is matched again. Failing that, the first line is skipped
//! (stray echo, unregistered URCs). Otherwise the loop waits for more bytes.

// ============================================================================
// Imports
// ============================================================================

use std::io;
use std::ops::Range;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{Notify, mpsc, oneshot};
use tokio::time::{Instant, sleep_until};
use tracing::{debug, error, trace, warn};

use crate::error::{Error, Result};
use crate::protocol::{Captures, Command, Expect, Pattern};

use super::channel::{CommandChannel, NotificationHandler};

// ============================================================================
// Constants
// ============================================================================

/// Default timeout for command execution.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(5);

/// Bytes read from the serial stream per poll.
const READ_CHUNK_SIZE: usize = 512;

/// Unmatched input beyond this size is dropped.
const MAX_INPUT_BUFFER: usize = 16 * 1024;

/// Idle timer when no command is in flight.
const IDLE_PARK: Duration = Duration::from_secs(3600);

// ============================================================================
// Types
// ============================================================================

/// Registered URC handlers by name.
type NotificationMap = FxHashMap<String, Registration>;

/// One named URC registration.
struct Registration {
    pattern: Pattern,
    handler: NotificationHandler,
}

/// A command waiting for the slot.
struct Submission {
    command: Command,
    response_tx: oneshot::Sender<Result<Captures>>,
}

/// Progress of the in-flight exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    /// Waiting for `> ` before writing the payload.
    AwaitPrompt,
    /// Waiting for the final response.
    AwaitFinal,
}

/// The in-flight exchange.
struct Exchange {
    command: Command,
    stage: Stage,
    response_tx: oneshot::Sender<Result<Captures>>,
    deadline: Instant,
    timeout: Duration,
}

impl Exchange {
    /// Matches the current stage's expectation at buffer start.
    fn match_stage(&self, buf: &[u8]) -> Option<(usize, Captures)> {
        match self.stage {
            Stage::AwaitPrompt => Expect::Prompt.match_prefix(buf),
            Stage::AwaitFinal => self.command.expect().match_prefix(buf),
        }
    }

    /// Resolves the caller's future.
    fn complete(self, result: Result<Captures>) {
        // Caller may have given up waiting.
        let _ = self.response_tx.send(result);
    }
}

// ============================================================================
// AtChannel
// ============================================================================

/// Command channel bound to one serial stream.
///
/// # Thread Safety
///
/// `AtChannel` is `Send + Sync`; share it behind an `Arc`.
pub struct AtChannel {
    /// Queue feeding the event loop.
    command_tx: mpsc::UnboundedSender<Submission>,
    /// URC registrations (shared with event loop).
    notifications: Arc<Mutex<NotificationMap>>,
    /// Stops the event loop.
    shutdown: Arc<Notify>,
}

impl AtChannel {
    /// Spawns the event loop over a bidirectional stream.
    ///
    /// Must be called within a tokio runtime.
    pub fn spawn<S>(stream: S) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        Self::spawn_with_timeout(stream, DEFAULT_COMMAND_TIMEOUT)
    }

    /// Spawns the event loop with a custom default command timeout.
    pub fn spawn_with_timeout<S>(stream: S, default_timeout: Duration) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, writer) = tokio::io::split(stream);
        Self::from_split(reader, writer, default_timeout)
    }

    /// Spawns the event loop over separate read and write halves.
    pub fn from_split<R, W>(reader: R, writer: W, default_timeout: Duration) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let notifications = Arc::new(Mutex::new(NotificationMap::default()));
        let shutdown = Arc::new(Notify::new());

        tokio::spawn(Self::run_event_loop(
            reader,
            writer,
            command_rx,
            Arc::clone(&notifications),
            Arc::clone(&shutdown),
            default_timeout,
        ));

        Self {
            command_tx,
            notifications,
            shutdown,
        }
    }

    /// Returns the number of registered notification handlers.
    #[inline]
    #[must_use]
    pub fn notification_count(&self) -> usize {
        self.notifications.lock().len()
    }

    /// Event loop that owns the serial stream.
    async fn run_event_loop<R, W>(
        mut reader: R,
        mut writer: W,
        mut command_rx: mpsc::UnboundedReceiver<Submission>,
        notifications: Arc<Mutex<NotificationMap>>,
        shutdown: Arc<Notify>,
        default_timeout: Duration,
    ) where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut inbuf: Vec<u8> = Vec::with_capacity(READ_CHUNK_SIZE);
        let mut chunk = [0u8; READ_CHUNK_SIZE];
        let mut pending: Option<Exchange> = None;

        loop {
            let deadline = pending
                .as_ref()
                .map_or_else(|| Instant::now() + IDLE_PARK, |exchange| exchange.deadline);

            tokio::select! {
                // Bytes from the modem
                read = reader.read(&mut chunk) => {
                    match read {
                        Ok(0) => {
                            debug!("Serial stream ended");
                            break;
                        }

                        Ok(n) => {
                            trace!(bytes = n, data = %String::from_utf8_lossy(&chunk[..n]).escape_debug(), "Received");
                            inbuf.extend_from_slice(&chunk[..n]);

                            if let Err(e) = Self::process_input(
                                &mut inbuf,
                                &mut pending,
                                &mut writer,
                                &notifications,
                            ).await {
                                error!(error = %e, "Serial write failed");
                                break;
                            }

                            if inbuf.len() > MAX_INPUT_BUFFER {
                                warn!(bytes = inbuf.len(), "Dropping unmatched input");
                                inbuf.clear();
                            }
                        }

                        Err(e) => {
                            error!(error = %e, "Serial read failed");
                            break;
                        }
                    }
                }

                // Next command, only when the slot is free
                submission = command_rx.recv(), if pending.is_none() => {
                    match submission {
                        Some(submission) => {
                            pending = Self::start_exchange(submission, &mut writer, default_timeout).await;
                        }

                        None => {
                            debug!("Command channel closed");
                            break;
                        }
                    }
                }

                // Timeout of the in-flight command
                () = sleep_until(deadline), if pending.is_some() => {
                    if let Some(exchange) = pending.take() {
                        let timeout_ms = exchange.timeout.as_millis() as u64;
                        warn!(command = %exchange.command, timeout_ms, "Command timed out");

                        if !inbuf.is_empty() {
                            debug!(bytes = inbuf.len(), "Discarding partial response");
                            inbuf.clear();
                        }

                        let err = Error::command_timeout(exchange.command.line(), timeout_ms);
                        exchange.complete(Err(err));
                    }
                }

                () = shutdown.notified() => {
                    debug!("Shutdown requested");
                    let _ = writer.shutdown().await;
                    break;
                }
            }
        }

        Self::fail_pending(pending, &mut command_rx);

        debug!("Event loop terminated");
    }

    /// Writes a command line and arms its exchange.
    async fn start_exchange<W>(
        submission: Submission,
        writer: &mut W,
        default_timeout: Duration,
    ) -> Option<Exchange>
    where
        W: AsyncWrite + Unpin,
    {
        let Submission {
            command,
            response_tx,
        } = submission;

        let timeout = command.timeout().unwrap_or(default_timeout);
        let stage = if command.payload().is_some() {
            Stage::AwaitPrompt
        } else {
            Stage::AwaitFinal
        };

        trace!(command = %command, "Sending command");

        if let Err(e) = Self::write_line(writer, command.line()).await {
            warn!(command = %command, error = %e, "Failed to write command");
            let _ = response_tx.send(Err(Error::Io(e)));
            return None;
        }

        Some(Exchange {
            command,
            stage,
            response_tx,
            deadline: Instant::now() + timeout,
            timeout,
        })
    }

    /// Writes `line` followed by the `\r` terminator.
    async fn write_line<W>(writer: &mut W, line: &str) -> io::Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        writer.write_all(line.as_bytes()).await?;
        writer.write_all(b"\r").await?;
        writer.flush().await
    }

    /// Consumes everything recognizable at the front of `inbuf`.
    async fn process_input<W>(
        inbuf: &mut Vec<u8>,
        pending: &mut Option<Exchange>,
        writer: &mut W,
        notifications: &Mutex<NotificationMap>,
    ) -> io::Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        loop {
            let blank = inbuf
                .iter()
                .take_while(|&&b| b == b'\r' || b == b'\n')
                .count();
            inbuf.drain(..blank);

            if inbuf.is_empty() {
                return Ok(());
            }

            // URCs take precedence: they can arrive mid-exchange
            if let Some((consumed, name, caps, handler)) =
                Self::match_notification(inbuf, notifications)
            {
                inbuf.drain(..consumed);
                trace!(name = %name, "Dispatching notification");
                handler(&caps);
                continue;
            }

            if let Some(exchange) = pending.as_mut() {
                if let Some((consumed, caps)) = exchange.match_stage(inbuf) {
                    inbuf.drain(..consumed);

                    match exchange.stage {
                        Stage::AwaitPrompt => {
                            exchange.stage = Stage::AwaitFinal;
                            let payload = exchange.command.payload().unwrap_or_default();
                            trace!(bytes = payload.len(), "Prompt received, writing payload");
                            writer.write_all(payload).await?;
                            writer.flush().await?;
                        }

                        Stage::AwaitFinal => {
                            if let Some(exchange) = pending.take() {
                                trace!(command = %exchange.command, "Command completed");
                                exchange.complete(Ok(caps));
                            }
                        }
                    }
                    continue;
                }

                if let Some((consumed, message)) = match_final_error(inbuf) {
                    inbuf.drain(..consumed);
                    if let Some(exchange) = pending.take() {
                        debug!(command = %exchange.command, message = %message, "Command failed");
                        let err = Error::channel(exchange.command.line(), message);
                        exchange.complete(Err(err));
                    }
                    continue;
                }

                if final_result_follows(inbuf) {
                    if let Some((range, name, caps, handler)) =
                        Self::match_embedded_notification(inbuf, notifications)
                    {
                        inbuf.drain(range);
                        trace!(name = %name, "Dispatching notification inside response");
                        handler(&caps);
                        continue;
                    }

                    if let Some(line) = take_line(inbuf) {
                        debug!(line = %String::from_utf8_lossy(&line).trim_end(), "Skipping unexpected line");
                    }
                    continue;
                }

                return Ok(());
            }

            match take_line(inbuf) {
                Some(line) => {
                    warn!(line = %String::from_utf8_lossy(&line).trim_end(), "Discarding unsolicited line");
                }
                None => return Ok(()),
            }
        }
    }

    /// Finds the registration matching the front of `buf`.
    fn match_notification(
        buf: &[u8],
        notifications: &Mutex<NotificationMap>,
    ) -> Option<(usize, String, Captures, NotificationHandler)> {
        let notifications = notifications.lock();
        notifications.iter().find_map(|(name, registration)| {
            registration
                .pattern
                .match_prefix(buf)
                .map(|(consumed, caps)| {
                    (consumed, name.clone(), caps, Arc::clone(&registration.handler))
                })
        })
    }

    /// Finds a registration matching at a later line start of `buf`.
    ///
    /// Returns the byte range of the URC so it can be cut out of a
    /// partially received response.
    fn match_embedded_notification(
        buf: &[u8],
        notifications: &Mutex<NotificationMap>,
    ) -> Option<(Range<usize>, String, Captures, NotificationHandler)> {
        let mut start = 0usize;

        while let Some(offset) = buf[start..].iter().position(|&b| b == b'\n') {
            start += offset + 1;
            if start >= buf.len() {
                break;
            }

            if let Some((consumed, name, caps, handler)) =
                Self::match_notification(&buf[start..], notifications)
            {
                return Some((start..start + consumed, name, caps, handler));
            }
        }

        None
    }

    /// Fails the in-flight and all queued commands with `ChannelClosed`.
    fn fail_pending(
        pending: Option<Exchange>,
        command_rx: &mut mpsc::UnboundedReceiver<Submission>,
    ) {
        let mut count = 0usize;

        if let Some(exchange) = pending {
            exchange.complete(Err(Error::ChannelClosed));
            count += 1;
        }

        command_rx.close();
        while let Ok(submission) = command_rx.try_recv() {
            let _ = submission.response_tx.send(Err(Error::ChannelClosed));
            count += 1;
        }

        if count > 0 {
            debug!(count, "Failed pending commands on shutdown");
        }
    }
}

// ============================================================================
// AtChannel - CommandChannel
// ============================================================================

#[async_trait]
impl CommandChannel for AtChannel {
    async fn issue(&self, command: Command) -> Result<Captures> {
        let (response_tx, response_rx) = oneshot::channel();

        self.command_tx
            .send(Submission {
                command,
                response_tx,
            })
            .map_err(|_| Error::ChannelClosed)?;

        response_rx.await?
    }

    fn register_notification(&self, name: &str, pattern: Pattern, handler: NotificationHandler) {
        debug!(name, pattern = pattern.as_str(), "Registering notification");
        self.notifications
            .lock()
            .insert(name.to_string(), Registration { pattern, handler });
    }

    fn deregister_notification(&self, name: &str) -> bool {
        let removed = self.notifications.lock().remove(name).is_some();
        if removed {
            debug!(name, "Deregistered notification");
        }
        removed
    }

    fn shutdown(&self) {
        self.shutdown.notify_one();
    }
}

// ============================================================================
// Line Helpers
// ============================================================================

/// Matches `ERROR`, `+CME ERROR: <e>` or `+CMS ERROR: <e>` at buffer start.
fn match_final_error(buf: &[u8]) -> Option<(usize, String)> {
    let end = buf.windows(2).position(|w| w == b"\r\n")?;
    let line = &buf[..end];

    let is_error = line == b"ERROR"
        || line.starts_with(b"+CME ERROR:")
        || line.starts_with(b"+CMS ERROR:");

    is_error.then(|| (end + 2, String::from_utf8_lossy(line).into_owned()))
}

/// Returns `true` if a final result line follows the first line.
fn final_result_follows(buf: &[u8]) -> bool {
    let Some(first_end) = buf.iter().position(|&b| b == b'\n') else {
        return false;
    };

    buf[first_end + 1..]
        .split(|&b| b == b'\n')
        .map(|line| line.strip_suffix(b"\r").unwrap_or(line))
        .any(|line| {
            line == b"OK"
                || line == b"ERROR"
                || line.starts_with(b"+CME ERROR:")
                || line.starts_with(b"+CMS ERROR:")
        })
}

/// Removes and returns the first complete line.
fn take_line(buf: &mut Vec<u8>) -> Option<Vec<u8>> {
    let end = buf.iter().position(|&b| b == b'\n')?;
    Some(buf.drain(..=end).collect())
}

// ============================================================================
// Tests
// ============================================================================
