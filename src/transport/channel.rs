//! Command channel contract.
//!
//! The socket engine and the modem facade talk to the modem exclusively
//! through [`CommandChannel`]. Implementations guarantee that at most one
//! exchange is in flight on the link and that notification handlers run
//! independently of command issuance.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;
use crate::protocol::{Captures, Command, Pattern};

// ============================================================================
// Types
// ============================================================================

/// Notification handler callback type.
///
/// Called with the matched groups of each unsolicited line matching the
/// registered pattern. Handlers run on the channel's event loop and must
/// not block; anything that needs another command is handed off to a task.
pub type NotificationHandler = Arc<dyn Fn(&Captures) + Send + Sync>;

// ============================================================================
// CommandChannel
// ============================================================================

/// Serializes AT exchanges on the shared link and dispatches URCs.
#[async_trait]
pub trait CommandChannel: Send + Sync {
    /// Issues a command and waits for its completion.
    ///
    /// Commands are executed one at a time in submission order.
    ///
    /// # Errors
    ///
    /// - [`Error::Channel`](crate::Error::Channel) if the modem answers with an error
    /// - [`Error::CommandTimeout`](crate::Error::CommandTimeout) if no response arrives in time
    /// - [`Error::ChannelClosed`](crate::Error::ChannelClosed) if the channel is shut down
    async fn issue(&self, command: Command) -> Result<Captures>;

    /// Registers (or replaces) a named notification handler.
    fn register_notification(&self, name: &str, pattern: Pattern, handler: NotificationHandler);

    /// Removes a named notification handler.
    ///
    /// Returns `true` if a handler was registered under `name`. Lines read
    /// after this returns are no longer dispatched to the handler.
    fn deregister_notification(&self, name: &str) -> bool;

    /// Stops the channel; pending and queued commands fail.
    fn shutdown(&self) {}
}
