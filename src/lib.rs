//! Telit Modem - Async socket driver for Telit cellular modems.
//!
//! This library drives the socket and network commands of a Telit modem
//! over its AT command interface and exposes ordinary stream sockets.
//!
//! # Architecture
//!
//! One serial link carries everything:
//!
//! - **Channel**: single event loop owning the link, one command in flight,
//!   unsolicited result codes (URCs) dispatched to registered handlers
//! - **Socket engine**: per-connection state machine over `AT#SD`,
//!   `AT#SSENDEXT`, `AT#SH`, fed by `SRING` and `NO CARRIER` URCs
//! - **Pool**: connection identifiers `1..=6`, lowest free first
//! - **Modem**: facade for identification, APN, PDP, registration and SMS
//!
//! # Quick Start
//!
//! ```no_run
//! use telit_modem::{ConnectOptions, Modem, PdpType, Result};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let serial = tokio::fs::OpenOptions::new()
//!         .read(true)
//!         .write(true)
//!         .open("/dev/ttyUSB2")
//!         .await?;
//!
//!     let modem = Modem::builder().open(serial).await?;
//!     modem.set_apn("internet", PdpType::Ip).await?;
//!     modem.enable_pdp(Default::default()).await?;
//!
//!     let socket = modem.socket(None).await?;
//!     socket.connect(ConnectOptions::tcp("whois.iana.org", 43)).await?;
//!     socket.write(b"example.com\r\n").await?;
//!
//!     while let Some(chunk) = socket.read().await? {
//!         print!("{}", String::from_utf8_lossy(&chunk));
//!     }
//!
//!     modem.shutdown().await
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`modem`] | Session facade: [`Modem`], [`ModemBuilder`], [`ModemConfig`] |
//! | [`socket`] | [`Socket`], [`ConnectionPool`], [`ConnectOptions`] |
//! | [`error`] | Error types and [`Result`] alias |
//! | [`identifiers`] | [`ConnId`], [`ContextId`] |
//! | [`protocol`] | AT commands, patterns, URC parsing |
//! | [`transport`] | Serial command channel |

// ============================================================================
// Modules
// ============================================================================

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Range-checked identifiers.
pub mod identifiers;

/// Modem session facade.
///
/// Use [`Modem::builder()`] to open a session.
pub mod modem;

/// AT protocol message types.
pub mod protocol;

/// Socket engine and connection pool.
pub mod socket;

/// Serial transport layer.
///
/// Owns the single command link and dispatches URCs.
pub mod transport;

// ============================================================================
// Re-exports
// ============================================================================

// Modem types
pub use modem::{
    Modem, ModemBuilder, ModemConfig, NetworkRegistration, PdpType, ReceivedSms,
    RegistrationState, ServiceCenter,
};

// Socket types
pub use socket::{
    ByteSink, ByteSource, ConnectOptions, ConnectionPool, Protocol, ReceiveMode,
    RemoteSocketState, Socket, SocketState,
};

// Transport types
pub use transport::{AtChannel, CommandChannel};

// Error types
pub use error::{Error, Result};

// Identifier types
pub use identifiers::{ConnId, ContextId};
