use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::channel::Channel;
use crate::connection::{Connection, Dialer, Protocol};
use crate::deadline::{self, Deadlines};
use crate::error::{Error, Result, WriteFailure};

/// Channel over exactly one socket connection
///
/// When `timeout` is non-zero, every read and write gets a deadline of now
/// plus `timeout` until the caller sets a deadline of its own. A write that
/// fails because the connection broke before anything was sent is repeated
/// on a freshly dialed connection, for as long as the write deadline allows.
/// Without any write deadline it is repeated once. Other write failures are
/// returned as they are.
///
/// After a reconnect the addresses reported are those of the new connection.
pub struct SocketChannel {
    peer_addr: String,
    conn: Option<Box<dyn Connection>>,
    timeout: Duration,
    dialer: Arc<dyn Dialer>,
    manual_deadline: bool,
    deadlines: Deadlines,
    closed: bool,
}

impl SocketChannel {
    /// Dial `addr` (`host:port`) over `protocol`
    pub async fn dial(protocol: Protocol, addr: &str, timeout: Duration) -> Result<Self> {
        Self::builder()
            .protocol(protocol)
            .address(addr)
            .timeout(timeout)
            .connect()
            .await
    }

    /// Wrap an established connection; reconnects go to its peer address
    pub fn from_connection(
        conn: impl Connection + 'static,
        protocol: Protocol,
        timeout: Duration,
    ) -> Result<Self> {
        Self::builder()
            .protocol(protocol)
            .timeout(timeout)
            .wrap(Box::new(conn))
    }

    /// Create a builder for configuring the channel
    pub fn builder() -> SocketChannelBuilder {
        SocketChannelBuilder::new()
    }

    /// Address reconnects are dialed to
    pub fn peer_address(&self) -> &str {
        &self.peer_addr
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn connection(&mut self) -> Result<&mut Box<dyn Connection>> {
        self.conn.as_mut().ok_or(Error::ConnectionClosed)
    }

    fn connection_ref(&self) -> Result<&dyn Connection> {
        self.conn.as_deref().ok_or(Error::ConnectionClosed)
    }

    fn auto_deadline(&self) -> Option<Instant> {
        if self.manual_deadline {
            None
        } else {
            deadline::after(self.timeout)
        }
    }

    fn dial_timeout(&self) -> Option<Duration> {
        (!self.timeout.is_zero()).then_some(self.timeout)
    }

    /// Close and drop the current connection after a broken write
    async fn discard(&mut self) {
        if let Some(mut conn) = self.conn.take() {
            if let Err(e) = conn.close().await {
                debug!(peer = %self.peer_addr, error = %e, "closing broken connection failed");
            }
        }
    }

    async fn reconnect(&mut self) -> Result<()> {
        let mut conn = self
            .dialer
            .dial(&self.peer_addr, self.dial_timeout())
            .await?;
        if self.manual_deadline {
            conn.set_read_deadline(self.deadlines.read)?;
            conn.set_write_deadline(self.deadlines.write)?;
        }
        info!(peer = %self.peer_addr, "reconnected");
        self.conn = Some(conn);
        Ok(())
    }
}

#[async_trait::async_trait]
impl Channel for SocketChannel {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let deadline = self.auto_deadline();
        let conn = self.connection()?;
        if deadline.is_some() {
            conn.set_read_deadline(deadline)?;
        }
        conn.read(buf).await
    }

    async fn write(&mut self, buf: &[u8]) -> Result<usize> {
        let auto = self.auto_deadline();
        let deadline = if self.manual_deadline {
            self.deadlines.write
        } else {
            auto
        };

        let mut redialed = false;
        loop {
            if self.conn.is_none() {
                if self.closed {
                    return Err(Error::ConnectionClosed);
                }
                self.reconnect().await?;
            }

            let conn = self.connection()?;
            if auto.is_some() {
                conn.set_write_deadline(auto)?;
            }
            let err = match conn.write(buf).await {
                Ok(n) => return Ok(n),
                Err(err) => err,
            };
            if conn.classify_write_error(&err) == WriteFailure::Terminal {
                return Err(err);
            }

            warn!(peer = %self.peer_addr, error = %err, "connection broke before write");
            self.discard().await;
            // Without a deadline the buffer gets one more connection, no more.
            let give_up = match deadline {
                Some(at) => Instant::now() >= at,
                None => redialed,
            };
            if give_up {
                return Err(err);
            }
            redialed = true;
        }
    }

    async fn close(&mut self) -> Result<()> {
        let was_closed = std::mem::replace(&mut self.closed, true);
        match self.conn.take() {
            Some(mut conn) => conn.close().await,
            None if was_closed => Err(Error::ConnectionClosed),
            None => Ok(()),
        }
    }

    fn local_addr(&self) -> Result<SocketAddr> {
        self.connection_ref()?.local_addr()
    }

    fn remote_addr(&self) -> Result<SocketAddr> {
        self.connection_ref()?.peer_addr()
    }

    fn set_deadline(&mut self, deadline: Instant) -> Result<()> {
        self.manual_deadline = true;
        self.deadlines.set(Some(deadline));
        self.connection()?.set_deadline(Some(deadline))
    }

    fn set_read_deadline(&mut self, deadline: Instant) -> Result<()> {
        self.manual_deadline = true;
        self.deadlines.read = Some(deadline);
        self.connection()?.set_read_deadline(Some(deadline))
    }

    fn set_write_deadline(&mut self, deadline: Instant) -> Result<()> {
        self.manual_deadline = true;
        self.deadlines.write = Some(deadline);
        self.connection()?.set_write_deadline(Some(deadline))
    }

    /// Connected from construction on, so there is nothing to wait for.
    async fn wait_for_non_empty(&mut self, _deadline: Duration) -> Result<()> {
        Ok(())
    }

    fn next_backend(&mut self) {}

    fn num_backends(&self) -> u64 {
        1
    }

    fn subchannels(&mut self) -> Vec<&mut dyn Channel> {
        vec![self as &mut dyn Channel]
    }
}

/// Builder for configuring a socket channel
pub struct SocketChannelBuilder {
    address: Option<String>,
    protocol: Protocol,
    dialer: Option<Arc<dyn Dialer>>,
    timeout: Duration,
}

impl Default for SocketChannelBuilder {
    fn default() -> Self {
        Self {
            address: None,
            protocol: Protocol::Tcp,
            dialer: None,
            timeout: Duration::ZERO,
        }
    }
}

impl SocketChannelBuilder {
    /// Create a new builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the `host:port` to connect and reconnect to
    pub fn address(mut self, addr: impl Into<String>) -> Self {
        self.address = Some(addr.into());
        self
    }

    /// Set the transport used to dial, TCP unless told otherwise
    pub fn protocol(mut self, protocol: Protocol) -> Self {
        self.protocol = protocol;
        self
    }

    /// Dial through a custom dialer instead of the protocol's own
    pub fn dialer(mut self, dialer: Arc<dyn Dialer>) -> Self {
        self.dialer = Some(dialer);
        self
    }

    /// Set the per-operation timeout; zero disables automatic deadlines
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Dial the configured address
    pub async fn connect(self) -> Result<SocketChannel> {
        let addr = self
            .address
            .clone()
            .ok_or_else(|| Error::custom("Address not set"))?;
        let timeout = (!self.timeout.is_zero()).then_some(self.timeout);
        let conn = self.resolve_dialer().dial(&addr, timeout).await?;
        self.wrap(conn)
    }

    /// Build around an established connection
    ///
    /// Without an explicit address, reconnects go to the connection's peer.
    pub fn wrap(self, conn: Box<dyn Connection>) -> Result<SocketChannel> {
        let peer_addr = match self.address.clone() {
            Some(addr) => addr,
            None => conn.peer_addr()?.to_string(),
        };
        Ok(SocketChannel {
            peer_addr,
            conn: Some(conn),
            timeout: self.timeout,
            dialer: self.resolve_dialer(),
            manual_deadline: false,
            deadlines: Deadlines::default(),
            closed: false,
        })
    }

    fn resolve_dialer(&self) -> Arc<dyn Dialer> {
        match &self.dialer {
            Some(dialer) => dialer.clone(),
            None => Arc::new(self.protocol),
        }
    }
}
