//! Socket engine.
//!
//! Stream sockets on top of the modem's AT socket commands.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `options` | [`ConnectOptions`], [`Protocol`], [`ReceiveMode`] |
//! | `buffer` | [`ReceiveBuffer`] between URCs and the reader |
//! | `engine` | [`Socket`] state machine |
//! | `pool` | [`ConnectionPool`] of connection identifiers |

// ============================================================================
// Submodules
// ============================================================================

/// Receive buffer with flow control.
pub mod buffer;

/// Socket state machine.
pub mod engine;

/// Connection parameters.
pub mod options;

/// Connection identifier table.
pub mod pool;

// ============================================================================
// Re-exports
// ============================================================================

pub use buffer::ReceiveBuffer;
pub use engine::{
    ByteSink, ByteSource, DEFAULT_CONNECT_TIMEOUT, DEFAULT_RECV_BUFFER_CAPACITY,
    DEFAULT_SEND_CHUNK_SIZE, RemoteSocketState, Socket, SocketState,
};
pub use options::{ConnectOptions, Protocol, ReceiveMode};
pub use pool::ConnectionPool;

pub(crate) use engine::SocketSettings;
