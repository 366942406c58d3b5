//! AT command definitions.
//!
//! A [`Command`] is one exchange on the serial link: a command line, the
//! response shape that completes it, and optionally a raw payload sent after
//! the modem's `> ` data prompt.
//!
//! # Socket Commands
//!
//! | Constructor | Line | Completes on |
//! |-------------|------|--------------|
//! | [`Command::socket_config_ext`] | `AT#SCFGEXT=<id>,<ring>,1,0` | `OK` |
//! | [`Command::socket_config_ext2`] | `AT#SCFGEXT2=<id>,1,1` | `OK` |
//! | [`Command::socket_dial`] | `AT#SD=<id>,<proto>,<port>,"<host>",0,<lport>,1` | `OK` |
//! | [`Command::socket_send`] | `AT#SSENDEXT=<id>,<len>` + payload | `> ` then `OK` |
//! | [`Command::socket_shutdown`] | `AT#SH=<id>` | `OK` |
//! | [`Command::socket_status`] | `AT#SS=<id>` | `#SS: <id>,<state>` `OK` |
//! | [`Command::socket_receive`] | `AT#SRECV=<id>,<len>` | `#SRECV: <id>,<len>,<hex>` `OK` |
//!
//! # Modem Commands
//!
//! | Constructor | Line |
//! |-------------|------|
//! | [`Command::disable_echo`] | `ATE0` |
//! | [`Command::model`] | `AT+GMM` |
//! | [`Command::define_pdp_context`] | `AT+CGDCONT=<cid>,"<type>","<apn>"` |
//! | [`Command::context_activation`] | `AT#SGACT=<cid>,<0/1>` |
//! | [`Command::registration_status`] | `AT+CREG?` |
//! | [`Command::registration_reporting`] | `AT+CREG=<0/1>` |
//! | [`Command::sms_pdu_mode`] | `AT+CMGF=0` |
//! | [`Command::sms_direct_delivery`] | `AT+CNMI=2,2` |
//! | [`Command::service_center`] | `AT+CSCA?` |
//! | [`Command::set_service_center`] | `AT+CSCA="<number>"[,<type>]` |

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::time::Duration;

use crate::error::Result;
use crate::identifiers::{ConnId, ContextId};
use crate::socket::{ConnectOptions, ReceiveMode};

use super::response::{Captures, Pattern};

// ============================================================================
// Constants
// ============================================================================

/// Data prompt sent by the modem after `AT#SSENDEXT`.
pub const DATA_PROMPT: &[u8] = b"> ";

/// Maximum payload accepted by one `AT#SSENDEXT`.
pub const MAX_SEND_LEN: usize = 1500;

/// Maximum payload returned by one `AT#SRECV`.
pub const MAX_RECV_LEN: usize = 1500;

/// `AT#SD` closure type: let the server close the connection.
const CLOSURE_MODE_REMOTE: u8 = 0;

/// `AT#SD` connection mode: command mode, not online data mode.
const CONNECTION_MODE_COMMAND: u8 = 1;

/// `AT#SCFGEXT` receive data mode: hex.
const RECV_DATA_MODE_HEX: u8 = 1;

/// `AT#SCFGEXT` keepalive: off.
const KEEPALIVE_DISABLED: u8 = 0;

/// `AT#SCFGEXT2` buffer start: timeout restarts on each received byte.
const BUFFER_START_ON_DATA: u8 = 1;

/// `AT#SCFGEXT2` abort connection attempt: allowed.
const ABORT_CONN_ATTEMPT_ENABLED: u8 = 1;

// ============================================================================
// Expect
// ============================================================================

/// Response shape that completes a command.
#[derive(Debug, Clone)]
pub enum Expect {
    /// Plain `OK` final result.
    Ok,
    /// The `> ` data prompt.
    Prompt,
    /// Information response matched by a pattern (including its final `OK`).
    Pattern(Pattern),
}

impl Expect {
    /// Creates a pattern expectation.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Regex`](crate::Error::Regex) for an invalid pattern.
    pub fn pattern(source: impl Into<String>) -> Result<Self> {
        Pattern::new(source).map(Self::Pattern)
    }

    /// Matches at the start of `buf`.
    #[must_use]
    pub fn match_prefix(&self, buf: &[u8]) -> Option<(usize, Captures)> {
        match self {
            Self::Ok => buf
                .starts_with(b"OK\r\n")
                .then(|| (4, Captures::empty())),
            Self::Prompt => buf
                .starts_with(DATA_PROMPT)
                .then(|| (DATA_PROMPT.len(), Captures::empty())),
            Self::Pattern(pattern) => pattern.match_prefix(buf),
        }
    }
}

// ============================================================================
// Command
// ============================================================================

/// One command/response exchange.
#[derive(Debug, Clone)]
pub struct Command {
    /// Command line without terminator.
    line: String,
    /// Final response shape.
    expect: Expect,
    /// Raw bytes written after the data prompt.
    payload: Option<Vec<u8>>,
    /// Overrides the channel's default timeout.
    timeout: Option<Duration>,
}

impl Command {
    /// Creates a command.
    #[inline]
    #[must_use]
    pub fn new(line: impl Into<String>, expect: Expect) -> Self {
        Self {
            line: line.into(),
            expect,
            payload: None,
            timeout: None,
        }
    }

    /// Creates a command completed by `OK`.
    #[inline]
    #[must_use]
    pub fn ok(line: impl Into<String>) -> Self {
        Self::new(line, Expect::Ok)
    }

    /// Attaches a payload sent after the data prompt.
    #[inline]
    #[must_use]
    pub fn with_payload(mut self, payload: Vec<u8>) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Sets a per-command timeout.
    #[inline]
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Returns the command line.
    #[inline]
    #[must_use]
    pub fn line(&self) -> &str {
        &self.line
    }

    /// Returns the final response shape.
    #[inline]
    #[must_use]
    pub fn expect(&self) -> &Expect {
        &self.expect
    }

    /// Returns the payload, if any.
    #[inline]
    #[must_use]
    pub fn payload(&self) -> Option<&[u8]> {
        self.payload.as_deref()
    }

    /// Returns the per-command timeout, if any.
    #[inline]
    #[must_use]
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.line)?;
        if let Some(payload) = &self.payload {
            write!(f, " <{} bytes>", payload.len())?;
        }
        Ok(())
    }
}

// ============================================================================
// Socket Commands
// ============================================================================

impl Command {
    /// `AT#SCFGEXT`: ring format, hex receive mode, keepalive off.
    #[must_use]
    pub fn socket_config_ext(conn_id: ConnId, mode: ReceiveMode) -> Self {
        Self::ok(format!(
            "AT#SCFGEXT={conn_id},{},{RECV_DATA_MODE_HEX},{KEEPALIVE_DISABLED}",
            mode.ring_mode()
        ))
    }

    /// `AT#SCFGEXT2`: buffer timeout restart on data, connection abort allowed.
    #[must_use]
    pub fn socket_config_ext2(conn_id: ConnId) -> Self {
        Self::ok(format!(
            "AT#SCFGEXT2={conn_id},{BUFFER_START_ON_DATA},{ABORT_CONN_ATTEMPT_ENABLED}"
        ))
    }

    /// `AT#SD`: opens the remote connection in command mode.
    #[must_use]
    pub fn socket_dial(conn_id: ConnId, options: &ConnectOptions, local_port: u16) -> Self {
        Self::ok(format!(
            "AT#SD={conn_id},{},{},\"{}\",{CLOSURE_MODE_REMOTE},{local_port},{CONNECTION_MODE_COMMAND}",
            options.protocol.code(),
            options.port,
            options.host,
        ))
    }

    /// `AT#SSENDEXT`: announces `data.len()` bytes, then sends them after the prompt.
    #[must_use]
    pub fn socket_send(conn_id: ConnId, data: Vec<u8>) -> Self {
        Self::ok(format!("AT#SSENDEXT={conn_id},{}", data.len())).with_payload(data)
    }

    /// `AT#SH`: closes the connection.
    #[must_use]
    pub fn socket_shutdown(conn_id: ConnId) -> Self {
        Self::ok(format!("AT#SH={conn_id}"))
    }

    /// `AT#SS`: queries the connection state.
    ///
    /// Captures: `1` = conn id, `2` = state code.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Regex`](crate::Error::Regex) if the pattern fails to compile.
    pub fn socket_status(conn_id: ConnId) -> Result<Self> {
        Ok(Self::new(
            format!("AT#SS={conn_id}"),
            Expect::pattern(r"#SS: (\d+),(\d+)[^\r\n]*\r\n(?:\r\n)?OK\r\n")?,
        ))
    }

    /// `AT#SRECV`: fetches up to `len` buffered bytes.
    ///
    /// Captures: `1` = conn id, `2` = length, `3` = hex payload,
    /// `4` = bytes still pending (optional).
    ///
    /// # Errors
    ///
    /// Returns [`Error::Regex`](crate::Error::Regex) if the pattern fails to compile.
    pub fn socket_receive(conn_id: ConnId, len: usize) -> Result<Self> {
        Ok(Self::new(
            format!("AT#SRECV={conn_id},{len}"),
            Expect::pattern(
                r"#SRECV: (\d+),(\d+),([0-9A-Fa-f]*)(?:,(\d+))?\r\n(?:\r\n)?OK\r\n",
            )?,
        ))
    }
}

// ============================================================================
// Modem Commands
// ============================================================================

impl Command {
    /// `ATE0`: disables command echo. Tolerates the echo of itself.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Regex`](crate::Error::Regex) if the pattern fails to compile.
    pub fn disable_echo() -> Result<Self> {
        Ok(Self::new("ATE0", Expect::pattern(r"(?:ATE0\r*\n*)?OK\r\n")?))
    }

    /// `AT+GMM`: model identification.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Regex`](crate::Error::Regex) if the pattern fails to compile.
    pub fn model() -> Result<Self> {
        Ok(Self::new(
            "AT+GMM",
            Expect::pattern(r"([^\r\n]+)\r\n(?:\r\n)?OK\r\n")?,
        ))
    }

    /// `AT+CGDCONT`: defines the PDP context.
    #[must_use]
    pub fn define_pdp_context(cid: ContextId, pdp_type: &str, apn: &str) -> Self {
        Self::ok(format!("AT+CGDCONT={cid},\"{pdp_type}\",\"{apn}\""))
    }

    /// `AT#SGACT`: activates or deactivates a context.
    ///
    /// Activation captures the assigned address in group `1`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Regex`](crate::Error::Regex) if the pattern fails to compile.
    pub fn context_activation(cid: ContextId, active: bool) -> Result<Self> {
        if active {
            Ok(Self::new(
                format!("AT#SGACT={cid},1"),
                Expect::pattern(r"#SGACT: ([^\r\n]+)\r\n(?:\r\n)?OK\r\n")?,
            ))
        } else {
            Ok(Self::ok(format!("AT#SGACT={cid},0")))
        }
    }

    /// `AT+CREG?`: network registration status.
    ///
    /// Captures: `1` = reporting mode, `2` = registration state.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Regex`](crate::Error::Regex) if the pattern fails to compile.
    pub fn registration_status() -> Result<Self> {
        Ok(Self::new(
            "AT+CREG?",
            Expect::pattern(r"\+CREG: (\d+),(\d+)[^\r\n]*\r\n(?:\r\n)?OK\r\n")?,
        ))
    }

    /// `AT+CREG`: enables or disables unsolicited registration reports.
    #[must_use]
    pub fn registration_reporting(enabled: bool) -> Self {
        Self::ok(format!("AT+CREG={}", u8::from(enabled)))
    }

    /// `AT+CMGF=0`: SMS PDU mode.
    #[must_use]
    pub fn sms_pdu_mode() -> Self {
        Self::ok("AT+CMGF=0")
    }

    /// `AT+CNMI=2,2`: route incoming SMS directly to the terminal.
    #[must_use]
    pub fn sms_direct_delivery() -> Self {
        Self::ok("AT+CNMI=2,2")
    }

    /// `AT+CSCA?`: SMS service center address.
    ///
    /// Captures: `1` = number, `2` = type of address (optional).
    ///
    /// # Errors
    ///
    /// Returns [`Error::Regex`](crate::Error::Regex) if the pattern fails to compile.
    pub fn service_center() -> Result<Self> {
        Ok(Self::new(
            "AT+CSCA?",
            Expect::pattern(r#"\+CSCA: "([^"\r\n]*)"(?:,(\d+))?\r\n(?:\r\n)?OK\r\n"#)?,
        ))
    }

    /// `AT+CSCA`: sets the SMS service center address.
    #[must_use]
    pub fn set_service_center(number: &str, address_type: Option<u8>) -> Self {
        match address_type {
            Some(address_type) => Self::ok(format!("AT+CSCA=\"{number}\",{address_type}")),
            None => Self::ok(format!("AT+CSCA=\"{number}\"")),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
