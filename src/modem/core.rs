//! Modem session.
//!
//! [`Modem`] owns the command channel and the connection pool of one
//! serial link, and exposes the one-shot commands around the socket engine:
//! identification, APN and PDP context handling, network registration and
//! SMS delivery.
//!
//! # Example
//!
//! ```no_run
//! use telit_modem::{ConnectOptions, Modem, PdpType, Result};
//!
//! # async fn example(serial: tokio::io::DuplexStream) -> Result<()> {
//! let modem = Modem::builder().open(serial).await?;
//!
//! modem.set_apn("internet", PdpType::Ip).await?;
//! let ip = modem.enable_pdp(Default::default()).await?;
//! println!("IP address: {ip}");
//!
//! let socket = modem.socket(None).await?;
//! socket.connect(ConnectOptions::tcp("example.com", 80)).await?;
//! socket.write(b"GET / HTTP/1.0\r\n\r\n").await?;
//! while let Some(chunk) = socket.read().await? {
//!     print!("{}", String::from_utf8_lossy(&chunk));
//! }
//! modem.free(&socket).await?;
//!
//! modem.shutdown().await?;
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::identifiers::{ConnId, ContextId};
use crate::protocol::notification::{self, CARRIER_LOST, NETWORK_REGISTRATION, RECEIVED_SMS};
use crate::protocol::{Captures, Command};
use crate::socket::{ConnectionPool, Socket};
use crate::transport::{AtChannel, CommandChannel, NotificationHandler};

use super::builder::ModemBuilder;
use super::config::ModemConfig;
use super::network::{NetworkRegistration, PdpType, RegistrationState};
use super::sms::{ReceivedSms, ServiceCenter};

// ============================================================================
// Types
// ============================================================================

/// Shared modem state.
struct ModemInner {
    /// Command channel of the serial link.
    channel: Arc<dyn CommandChannel>,

    /// Socket table.
    pool: ConnectionPool,

    /// Validated configuration.
    config: ModemConfig,

    /// Address assigned by the last PDP activation.
    ip: Mutex<Option<String>>,
}

// ============================================================================
// Modem
// ============================================================================

/// Telit modem session over one serial link.
///
/// Cloning yields another handle to the same session.
#[derive(Clone)]
pub struct Modem {
    inner: Arc<ModemInner>,
}

impl fmt::Debug for Modem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Modem")
            .field("sockets", &self.inner.pool.socket_count())
            .field("ip", &self.ip())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Modem - Constructors
// ============================================================================

impl Modem {
    /// Creates a session builder.
    #[inline]
    #[must_use]
    pub fn builder() -> ModemBuilder {
        ModemBuilder::new()
    }

    /// Opens a session over an already opened serial stream.
    ///
    /// Spawns the channel event loop and disables command echo.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] for an invalid configuration
    /// - [`Error::Channel`] / [`Error::CommandTimeout`] if `ATE0` fails
    pub async fn open<S>(stream: S, config: ModemConfig) -> Result<Self>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        config.validate()?;
        let channel = AtChannel::spawn_with_timeout(stream, config.command_timeout);
        Self::with_channel(Arc::new(channel), config).await
    }

    /// Opens a session over an existing command channel.
    ///
    /// # Errors
    ///
    /// Same as [`Modem::open`].
    pub async fn with_channel(
        channel: Arc<dyn CommandChannel>,
        config: ModemConfig,
    ) -> Result<Self> {
        config.validate()?;

        let pool = ConnectionPool::new(
            Arc::clone(&channel),
            config.socket_settings(),
            config.max_sockets,
        );

        let modem = Self {
            inner: Arc::new(ModemInner {
                channel,
                pool,
                config,
                ip: Mutex::new(None),
            }),
        };

        modem.register_carrier_lost()?;

        if let Err(e) = modem.inner.channel.issue(Command::disable_echo()?).await {
            modem.inner.channel.shutdown();
            return Err(e);
        }

        info!(max_sockets = modem.inner.config.max_sockets, "Modem ready");
        Ok(modem)
    }

    /// Polls every connected socket on an untagged `NO CARRIER`.
    fn register_carrier_lost(&self) -> Result<()> {
        let pool = self.inner.pool.downgrade();

        let handler: NotificationHandler = Arc::new(move |_: &Captures| {
            let Some(pool) = ConnectionPool::upgrade(&pool) else {
                return;
            };

            debug!("Carrier lost, polling sockets");
            tokio::spawn(async move {
                let dropped = pool.check_connections().await;
                if !dropped.is_empty() {
                    info!(dropped = ?dropped, "Sockets reported closed");
                }
            });
        });

        self.inner.channel.register_notification(
            CARRIER_LOST,
            notification::carrier_lost_pattern()?,
            handler,
        );
        Ok(())
    }
}

// ============================================================================
// Modem - Accessors
// ============================================================================

impl Modem {
    /// Returns the configuration.
    #[inline]
    #[must_use]
    pub fn config(&self) -> &ModemConfig {
        &self.inner.config
    }

    /// Returns the connection pool.
    #[inline]
    #[must_use]
    pub fn pool(&self) -> &ConnectionPool {
        &self.inner.pool
    }

    /// Returns the address of the active PDP context, if any.
    #[inline]
    #[must_use]
    pub fn ip(&self) -> Option<String> {
        self.inner.ip.lock().clone()
    }

    /// Issues an arbitrary command on the link.
    ///
    /// # Errors
    ///
    /// See [`CommandChannel::issue`].
    pub async fn execute(&self, command: Command) -> Result<Captures> {
        self.inner.channel.issue(command).await
    }
}

// ============================================================================
// Modem - Identification
// ============================================================================

impl Modem {
    /// Returns the model name (`AT+GMM`).
    ///
    /// # Errors
    ///
    /// Returns the command failure.
    pub async fn model(&self) -> Result<String> {
        let caps = self.execute(Command::model()?).await?;
        caps.get_str(1)
            .map(|model| model.trim().to_string())
            .ok_or_else(|| Error::protocol("empty model response"))
    }
}

// ============================================================================
// Modem - Packet Data
// ============================================================================

impl Modem {
    /// Defines PDP context `1` with the given APN.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidArgument`] for an empty APN or one containing quotes
    /// - the command failure
    pub async fn set_apn(&self, apn: &str, pdp_type: PdpType) -> Result<()> {
        if apn.is_empty() {
            return Err(Error::invalid_argument("APN is required"));
        }
        if apn.chars().any(|c| c == '"' || c.is_control()) {
            return Err(Error::invalid_argument(format!("invalid APN {apn:?}")));
        }

        self.execute(Command::define_pdp_context(
            ContextId::default(),
            pdp_type.as_str(),
            apn,
        ))
        .await?;

        info!(apn, pdp_type = %pdp_type, "APN set");
        Ok(())
    }

    /// Activates a PDP context and returns the assigned address.
    ///
    /// # Errors
    ///
    /// Returns the command failure.
    pub async fn enable_pdp(&self, cid: ContextId) -> Result<String> {
        let caps = self.execute(Command::context_activation(cid, true)?).await?;
        let ip = caps
            .get_str(1)
            .map(|ip| ip.trim().trim_matches('"').to_string())
            .ok_or_else(|| Error::protocol("missing address in #SGACT response"))?;

        *self.inner.ip.lock() = Some(ip.clone());
        info!(cid = %cid, ip = %ip, "PDP context active");
        Ok(ip)
    }

    /// Deactivates a PDP context.
    ///
    /// # Errors
    ///
    /// Returns the command failure.
    pub async fn disable_pdp(&self, cid: ContextId) -> Result<()> {
        self.execute(Command::context_activation(cid, false)?).await?;
        self.inner.ip.lock().take();
        info!(cid = %cid, "PDP context inactive");
        Ok(())
    }
}

// ============================================================================
// Modem - Network Registration
// ============================================================================

impl Modem {
    /// Queries the registration state (`AT+CREG?`).
    ///
    /// # Errors
    ///
    /// - the command failure
    /// - [`Error::Protocol`] for an unknown state code
    pub async fn network_registration(&self) -> Result<NetworkRegistration> {
        let caps = self.execute(Command::registration_status()?).await?;

        Ok(NetworkRegistration {
            reporting: caps.require(1, "reporting mode")?,
            state: RegistrationState::try_from(caps.require::<u8>(2, "registration state")?)?,
        })
    }

    /// Reports registration changes to `callback` (`AT+CREG=1`).
    ///
    /// # Errors
    ///
    /// Returns the command failure; the handler is removed again.
    pub async fn subscribe_network_registration<F>(&self, callback: F) -> Result<()>
    where
        F: Fn(RegistrationState) + Send + Sync + 'static,
    {
        let handler: NotificationHandler = Arc::new(move |caps: &Captures| {
            match caps
                .require::<u8>(1, "registration state")
                .and_then(RegistrationState::try_from)
            {
                Ok(state) => callback(state),
                Err(e) => warn!(error = %e, "Dropping malformed +CREG"),
            }
        });

        self.inner.channel.register_notification(
            NETWORK_REGISTRATION,
            notification::registration_pattern()?,
            handler,
        );

        if let Err(e) = self.execute(Command::registration_reporting(true)).await {
            self.inner
                .channel
                .deregister_notification(NETWORK_REGISTRATION);
            return Err(e);
        }

        debug!("Subscribed to network registration");
        Ok(())
    }

    /// Stops registration reports (`AT+CREG=0`), then removes the handler.
    ///
    /// # Errors
    ///
    /// Returns the command failure; the handler stays registered.
    pub async fn unsubscribe_network_registration(&self) -> Result<()> {
        self.execute(Command::registration_reporting(false)).await?;
        self.inner
            .channel
            .deregister_notification(NETWORK_REGISTRATION);
        debug!("Unsubscribed from network registration");
        Ok(())
    }
}

// ============================================================================
// Modem - SMS
// ============================================================================

impl Modem {
    /// Delivers incoming SMS to `callback` in PDU form.
    ///
    /// Sends `AT+CMGF=0` and `AT+CNMI=2,2`, then registers the `+CMT` handler.
    ///
    /// # Errors
    ///
    /// Returns the command failure.
    pub async fn enable_sms<F>(&self, callback: F) -> Result<()>
    where
        F: Fn(ReceivedSms) + Send + Sync + 'static,
    {
        self.execute(Command::sms_pdu_mode()).await?;
        self.execute(Command::sms_direct_delivery()).await?;

        let handler: NotificationHandler =
            Arc::new(move |caps: &Captures| match ReceivedSms::from_captures(caps) {
                Ok(sms) => callback(sms),
                Err(e) => warn!(error = %e, "Dropping malformed +CMT"),
            });

        self.inner.channel.register_notification(
            RECEIVED_SMS,
            notification::sms_pattern()?,
            handler,
        );

        info!("SMS delivery enabled");
        Ok(())
    }

    /// Stops SMS delivery to the callback.
    ///
    /// Returns `false` if delivery was not enabled.
    pub fn disable_sms(&self) -> bool {
        self.inner.channel.deregister_notification(RECEIVED_SMS)
    }

    /// Queries the SMS service center address (`AT+CSCA?`).
    ///
    /// # Errors
    ///
    /// Returns the command failure.
    pub async fn service_center(&self) -> Result<ServiceCenter> {
        let caps = self.execute(Command::service_center()?).await?;

        Ok(ServiceCenter {
            number: caps.get_str(1).unwrap_or_default().to_string(),
            address_type: caps.parse(2),
        })
    }

    /// Sets the SMS service center address (`AT+CSCA`).
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidArgument`] for an empty number or one containing quotes
    /// - the command failure
    pub async fn set_service_center(&self, number: &str, address_type: Option<u8>) -> Result<()> {
        if number.is_empty() || number.chars().any(|c| c == '"' || c.is_control()) {
            return Err(Error::invalid_argument(format!(
                "invalid service center number {number:?}"
            )));
        }

        self.execute(Command::set_service_center(number, address_type))
            .await?;
        Ok(())
    }
}

// ============================================================================
// Modem - Sockets
// ============================================================================

impl Modem {
    /// Returns the socket for `conn_id`, or binds the lowest free one.
    ///
    /// # Errors
    ///
    /// See [`ConnectionPool::acquire`].
    pub async fn socket(&self, conn_id: Option<ConnId>) -> Result<Socket> {
        self.inner.pool.acquire(conn_id).await
    }

    /// Closes a socket and releases its identifier.
    ///
    /// # Errors
    ///
    /// See [`ConnectionPool::free`].
    pub async fn free(&self, socket: &Socket) -> Result<()> {
        self.inner.pool.free(socket).await
    }

    /// Closes every socket, then stops the channel.
    ///
    /// # Errors
    ///
    /// Returns the first socket close failure; the channel stops regardless.
    pub async fn shutdown(&self) -> Result<()> {
        let failures = self.inner.pool.close_all().await;

        self.inner.channel.deregister_notification(CARRIER_LOST);
        self.inner.channel.deregister_notification(NETWORK_REGISTRATION);
        self.inner.channel.deregister_notification(RECEIVED_SMS);
        self.inner.channel.shutdown();

        info!(failures = failures.len(), "Modem shut down");

        match failures.into_iter().next() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream, duplex};
    use tokio::time::timeout;

    use crate::socket::{ConnectOptions, SocketState};
    use crate::transport::mock::{Reply, ScriptedChannel};

    async fn modem_with(channel: &Arc<ScriptedChannel>) -> Modem {
        let modem = Modem::with_channel(
            Arc::clone(channel) as Arc<dyn CommandChannel>,
            ModemConfig::default(),
        )
        .await
        .expect("modem");
        channel.clear();
        modem
    }

    #[tokio::test]
    async fn test_open_disables_echo_and_registers_carrier_lost() {
        let channel = ScriptedChannel::new();
        Modem::with_channel(
            Arc::clone(&channel) as Arc<dyn CommandChannel>,
            ModemConfig::default(),
        )
        .await
        .expect("modem");

        assert_eq!(channel.lines(), vec!["ATE0"]);
        assert_eq!(channel.registered(), vec![CARRIER_LOST]);
    }

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let channel = ScriptedChannel::new();
        let err = Modem::with_channel(
            Arc::clone(&channel) as Arc<dyn CommandChannel>,
            ModemConfig::default().with_max_sockets(0),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, Error::Config { .. }));
        assert!(channel.lines().is_empty());
    }

    #[tokio::test]
    async fn test_model() {
        let channel = ScriptedChannel::new();
        let modem = modem_with(&channel).await;
        channel.set_responder(|_| Reply::Text("LE910C4-WWX\r\n\r\nOK\r\n".into()));

        assert_eq!(modem.model().await.expect("model"), "LE910C4-WWX");
        assert_eq!(channel.lines(), vec!["AT+GMM"]);
    }

    #[tokio::test]
    async fn test_set_apn() {
        let channel = ScriptedChannel::new();
        let modem = modem_with(&channel).await;

        modem.set_apn("internet", PdpType::Ipv4v6).await.expect("apn");
        assert_eq!(channel.lines(), vec!["AT+CGDCONT=1,\"IPV4V6\",\"internet\""]);

        assert!(matches!(
            modem.set_apn("", PdpType::Ip).await,
            Err(Error::InvalidArgument { .. })
        ));
        assert_eq!(channel.lines().len(), 1);
    }

    #[tokio::test]
    async fn test_pdp_activation_stores_ip() {
        let channel = ScriptedChannel::new();
        let modem = modem_with(&channel).await;
        channel.set_responder(|line| {
            if line == "AT#SGACT=1,1" {
                Reply::Text("#SGACT: 10.64.12.7\r\n\r\nOK\r\n".into())
            } else {
                Reply::Ok
            }
        });

        let ip = modem.enable_pdp(ContextId::default()).await.expect("pdp");
        assert_eq!(ip, "10.64.12.7");
        assert_eq!(modem.ip().as_deref(), Some("10.64.12.7"));

        modem.disable_pdp(ContextId::default()).await.expect("pdp off");
        assert_eq!(modem.ip(), None);
        assert_eq!(channel.lines(), vec!["AT#SGACT=1,1", "AT#SGACT=1,0"]);
    }

    #[tokio::test]
    async fn test_network_registration_query() {
        let channel = ScriptedChannel::new();
        let modem = modem_with(&channel).await;
        channel.set_responder(|_| Reply::Text("+CREG: 0,5\r\n\r\nOK\r\n".into()));

        let registration = modem.network_registration().await.expect("creg");
        assert_eq!(registration.reporting, 0);
        assert_eq!(registration.state, RegistrationState::RegisteredRoaming);
    }

    #[tokio::test]
    async fn test_network_registration_subscription() {
        let channel = ScriptedChannel::new();
        let modem = modem_with(&channel).await;

        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = Arc::clone(&seen);
        modem
            .subscribe_network_registration(move |state| seen_clone.lock().push(state))
            .await
            .expect("subscribe");

        assert!(channel.inject("+CREG: 2\r\n"));
        assert!(channel.inject("+CREG: 1\r\n"));
        assert_eq!(
            *seen.lock(),
            vec![RegistrationState::Searching, RegistrationState::RegisteredHome]
        );

        modem
            .unsubscribe_network_registration()
            .await
            .expect("unsubscribe");
        assert!(!channel.inject("+CREG: 5\r\n"));
        assert_eq!(channel.lines(), vec!["AT+CREG=1", "AT+CREG=0"]);
    }

    #[tokio::test]
    async fn test_subscription_failure_removes_handler() {
        let channel = ScriptedChannel::new();
        let modem = modem_with(&channel).await;
        channel.set_responder(|_| Reply::Error("ERROR".into()));

        assert!(modem.subscribe_network_registration(|_| {}).await.is_err());
        assert_eq!(channel.registered(), vec![CARRIER_LOST]);
    }

    #[tokio::test]
    async fn test_sms_delivery() {
        let channel = ScriptedChannel::new();
        let modem = modem_with(&channel).await;

        let received = Arc::new(Mutex::new(Vec::new()));
        let received_clone = Arc::clone(&received);
        modem
            .enable_sms(move |sms| received_clone.lock().push(sms))
            .await
            .expect("sms");
        assert_eq!(channel.lines(), vec!["AT+CMGF=0", "AT+CNMI=2,2"]);

        assert!(channel.inject("+CMT: \"\",2\r\n00FF\r\n"));
        assert_eq!(received.lock()[0].pdu, vec![0x00, 0xFF]);

        assert!(modem.disable_sms());
        assert!(!channel.inject("+CMT: \"\",2\r\n00FF\r\n"));
        assert!(!modem.disable_sms());
    }

    #[tokio::test]
    async fn test_service_center() {
        let channel = ScriptedChannel::new();
        let modem = modem_with(&channel).await;
        channel.set_responder(|line| {
            if line == "AT+CSCA?" {
                Reply::Text("+CSCA: \"+491710760000\",145\r\n\r\nOK\r\n".into())
            } else {
                Reply::Ok
            }
        });

        let center = modem.service_center().await.expect("csca");
        assert_eq!(center.number, "+491710760000");
        assert_eq!(center.address_type, Some(145));

        modem
            .set_service_center("+491710760000", None)
            .await
            .expect("set csca");
        assert_eq!(channel.lines().last().map(String::as_str), Some("AT+CSCA=\"+491710760000\""));
    }

    #[tokio::test]
    async fn test_bare_no_carrier_polls_connected_sockets() {
        let channel = ScriptedChannel::new();
        let modem = modem_with(&channel).await;

        let socket = modem.socket(None).await.expect("socket");
        socket
            .connect(ConnectOptions::tcp("example.com", 80))
            .await
            .expect("connect");
        let idle = modem.socket(None).await.expect("socket");
        channel.clear();

        channel.set_responder(|_| Reply::Text("#SS: 1,0\r\n\r\nOK\r\n".into()));
        assert!(channel.inject("NO CARRIER\r\n"));

        let eof = timeout(Duration::from_secs(1), socket.read())
            .await
            .expect("read in time")
            .expect("read");
        assert_eq!(eof, None);
        assert_eq!(socket.state(), SocketState::Closed);
        assert_eq!(idle.state(), SocketState::Idle);
        assert_eq!(channel.lines(), vec!["AT#SS=1"]);
    }

    #[tokio::test]
    async fn test_shutdown_closes_sockets() {
        let channel = ScriptedChannel::new();
        let modem = modem_with(&channel).await;

        for _ in 0..2 {
            modem
                .socket(None)
                .await
                .expect("socket")
                .connect(ConnectOptions::tcp("example.com", 80))
                .await
                .expect("connect");
        }
        channel.clear();

        modem.shutdown().await.expect("shutdown");

        let mut lines = channel.lines();
        lines.sort();
        assert_eq!(lines, vec!["AT#SH=1", "AT#SH=2"]);
        assert_eq!(modem.pool().socket_count(), 0);
        assert!(channel.registered().is_empty());
    }

    /// Reads one `\r`-terminated command line from the fake modem side.
    async fn read_line(device: &mut DuplexStream) -> String {
        let mut line = Vec::new();
        loop {
            match device.read_u8().await.expect("read") {
                b'\r' => return String::from_utf8(line).expect("utf8"),
                byte => line.push(byte),
            }
        }
    }

    #[tokio::test]
    async fn test_open_over_serial_stream() {
        let (host, mut device) = duplex(1024);

        let device_task = tokio::spawn(async move {
            assert_eq!(read_line(&mut device).await, "ATE0");
            device.write_all(b"ATE0\r\r\nOK\r\n").await.expect("write");

            assert_eq!(read_line(&mut device).await, "AT+GMM");
            device
                .write_all(b"\r\nLE910C1-EU\r\n\r\nOK\r\n")
                .await
                .expect("write");
            device
        });

        let modem = Modem::open(host, ModemConfig::default()).await.expect("open");
        assert_eq!(modem.model().await.expect("model"), "LE910C1-EU");

        let _device = device_task.await.expect("device task");
    }
}
