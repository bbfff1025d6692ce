use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, instrument};

use crate::error::{Error, Result, WriteFailure};

pub mod tcp;
pub mod udp;

pub use self::tcp::TcpConnection;
pub use self::udp::UdpConnection;

/// A single live byte-stream connection to one peer
///
/// This is the resource a channel routes its traffic through. Deadlines are
/// absolute and stay armed until replaced; `None` clears them.
#[async_trait::async_trait]
pub trait Connection: Send + Sync {
    /// Read into `buf`, honouring the read deadline
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Write the whole of `buf`, honouring the write deadline
    ///
    /// Must fail with [`Error::ClosedPipe`] only if no byte of `buf` was
    /// transmitted and the connection can no longer be used.
    async fn write(&mut self, buf: &[u8]) -> Result<usize>;

    /// Release the connection. Closing twice fails with [`Error::ConnectionClosed`].
    async fn close(&mut self) -> Result<()>;

    fn local_addr(&self) -> Result<SocketAddr>;

    fn peer_addr(&self) -> Result<SocketAddr>;

    fn set_read_deadline(&mut self, deadline: Option<Instant>) -> Result<()>;

    fn set_write_deadline(&mut self, deadline: Option<Instant>) -> Result<()>;

    fn set_deadline(&mut self, deadline: Option<Instant>) -> Result<()> {
        self.set_read_deadline(deadline)?;
        self.set_write_deadline(deadline)
    }

    /// Decide whether a failed write may be repeated on a new connection
    fn classify_write_error(&self, err: &Error) -> WriteFailure {
        WriteFailure::of(err)
    }
}

/// Knows how to open a [`Connection`] to an address
#[async_trait::async_trait]
pub trait Dialer: Send + Sync {
    async fn dial(&self, addr: &str, timeout: Option<Duration>) -> Result<Box<dyn Connection>>;
}

/// Transport family of a socket channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    Tcp,
    Udp,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Tcp => "tcp",
            Protocol::Udp => "udp",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Protocol {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "tcp" => Ok(Protocol::Tcp),
            "udp" => Ok(Protocol::Udp),
            other => Err(Error::UnknownScheme(other.to_string())),
        }
    }
}

#[async_trait::async_trait]
impl Dialer for Protocol {
    #[instrument(level = "debug", skip(self), fields(protocol = %self))]
    async fn dial(&self, addr: &str, timeout: Option<Duration>) -> Result<Box<dyn Connection>> {
        debug!("dialing");
        let conn: Box<dyn Connection> = match self {
            Protocol::Tcp => Box::new(TcpConnection::connect(addr, timeout).await?),
            Protocol::Udp => Box::new(UdpConnection::connect(addr, timeout).await?),
        };
        Ok(conn)
    }
}
