//! Telit modem session module.
//!
//! This module provides the main entry point: a [`Modem`] bound to one
//! serial link, handing out sockets from its connection pool.
//!
//! # Components
//!
//! | Type | Description |
//! |------|-------------|
//! | [`Modem`] | Session over one serial link |
//! | [`ModemBuilder`] | Fluent configuration builder |
//! | [`ModemConfig`] | Serializable tunables |
//! | [`PdpType`] | PDP context type |
//! | [`RegistrationState`] | Network registration state |
//! | [`ReceivedSms`] | Delivered SMS in PDU form |
//!
//! # Example
//!
//! ```no_run
//! use telit_modem::{Modem, Result};
//!
//! # async fn example(serial: tokio::io::DuplexStream) -> Result<()> {
//! let modem = Modem::builder().open(serial).await?;
//!
//! let registration = modem.network_registration().await?;
//! println!("Network: {}", registration.state);
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Submodules
// ============================================================================

/// Fluent builder pattern for session configuration.
pub mod builder;

/// Serializable session configuration.
pub mod config;

/// Core modem implementation.
pub mod core;

/// PDP context and registration types.
pub mod network;

/// SMS delivery types.
pub mod sms;

// ============================================================================
// Re-exports
// ============================================================================

pub use builder::ModemBuilder;
pub use config::ModemConfig;
pub use core::Modem;
pub use network::{NetworkRegistration, PdpType, RegistrationState};
pub use sms::{ReceivedSms, ServiceCenter};
