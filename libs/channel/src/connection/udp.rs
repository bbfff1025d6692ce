use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;

use tokio::net::{lookup_host, UdpSocket};
use tokio::time::Instant;

use crate::connection::Connection;
use crate::deadline::{run_until, run_within, Deadlines};
use crate::error::{Error, Result};

/// Connected UDP socket exposed as a connection
///
/// Each write is one datagram, so a send either goes out whole or not at all.
pub struct UdpConnection {
    socket: Option<UdpSocket>,
    local_addr: SocketAddr,
    peer_addr: SocketAddr,
    deadlines: Deadlines,
}

impl UdpConnection {
    /// Bind an ephemeral local port and connect it to `addr` (`host:port`)
    pub async fn connect(addr: &str, timeout: Option<Duration>) -> Result<Self> {
        let socket = run_within(timeout, async {
            let peer = lookup_host(addr)
                .await?
                .next()
                .ok_or_else(|| Error::InvalidAddress(addr.to_string()))?;
            let local: SocketAddr = match peer {
                SocketAddr::V4(_) => (Ipv4Addr::UNSPECIFIED, 0).into(),
                SocketAddr::V6(_) => (Ipv6Addr::UNSPECIFIED, 0).into(),
            };
            let socket = UdpSocket::bind(local).await?;
            socket.connect(peer).await?;
            Ok::<_, Error>(socket)
        })
        .await?;
        Self::from_socket(socket)
    }

    /// Wrap a socket that is already connected to its peer
    pub fn from_socket(socket: UdpSocket) -> Result<Self> {
        Ok(Self {
            local_addr: socket.local_addr()?,
            peer_addr: socket.peer_addr()?,
            socket: Some(socket),
            deadlines: Deadlines::default(),
        })
    }

    fn socket(&mut self) -> Result<&mut UdpSocket> {
        self.socket.as_mut().ok_or(Error::ConnectionClosed)
    }
}

#[async_trait::async_trait]
impl Connection for UdpConnection {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let deadline = self.deadlines.read;
        let socket = self.socket()?;
        run_until(deadline, async { Ok::<_, Error>(socket.recv(buf).await?) }).await
    }

    async fn write(&mut self, buf: &[u8]) -> Result<usize> {
        let deadline = self.deadlines.write;
        let socket = self.socket()?;
        run_until(deadline, async {
            match socket.send(buf).await {
                Ok(n) if n == buf.len() => Ok(n),
                Ok(_) => Err(io::Error::from(io::ErrorKind::WriteZero).into()),
                // An ICMP unreachable from an earlier datagram surfaces here,
                // before this one was handed to the kernel.
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::ConnectionRefused | io::ErrorKind::BrokenPipe
                    ) =>
                {
                    Err(Error::ClosedPipe)
                }
                Err(e) => Err(e.into()),
            }
        })
        .await
    }

    async fn close(&mut self) -> Result<()> {
        self.socket.take().map(drop).ok_or(Error::ConnectionClosed)
    }

    fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.local_addr)
    }

    fn peer_addr(&self) -> Result<SocketAddr> {
        Ok(self.peer_addr)
    }

    fn set_read_deadline(&mut self, deadline: Option<Instant>) -> Result<()> {
        self.socket()?;
        self.deadlines.read = deadline;
        Ok(())
    }

    fn set_write_deadline(&mut self, deadline: Option<Instant>) -> Result<()> {
        self.socket()?;
        self.deadlines.write = deadline;
        Ok(())
    }
}
