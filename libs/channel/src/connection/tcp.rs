use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::Instant;

use crate::connection::Connection;
use crate::deadline::{run_until, run_within, Deadlines};
use crate::error::{Error, Result};

/// TCP connection with socket-style deadlines
///
/// Addresses are captured at connect time so they stay readable after close.
pub struct TcpConnection {
    stream: Option<TcpStream>,
    local_addr: SocketAddr,
    peer_addr: SocketAddr,
    deadlines: Deadlines,
}

impl TcpConnection {
    /// Connect to `addr` (`host:port`), giving up after `timeout` if set
    pub async fn connect(addr: &str, timeout: Option<Duration>) -> Result<Self> {
        let stream = run_within(timeout, async {
            Ok::<_, Error>(TcpStream::connect(addr).await?)
        })
        .await?;
        Self::from_stream(stream)
    }

    /// Create from an existing TcpStream
    pub fn from_stream(stream: TcpStream) -> Result<Self> {
        Ok(Self {
            local_addr: stream.local_addr()?,
            peer_addr: stream.peer_addr()?,
            stream: Some(stream),
            deadlines: Deadlines::default(),
        })
    }

    fn stream(&mut self) -> Result<&mut TcpStream> {
        self.stream.as_mut().ok_or(Error::ConnectionClosed)
    }
}

/// Errors meaning the peer is gone and nothing of the current write went out
fn is_broken_pipe(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::BrokenPipe | io::ErrorKind::ConnectionReset | io::ErrorKind::NotConnected
    )
}

#[async_trait::async_trait]
impl Connection for TcpConnection {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let deadline = self.deadlines.read;
        let stream = self.stream()?;
        run_until(deadline, async { Ok::<_, Error>(stream.read(buf).await?) }).await
    }

    async fn write(&mut self, buf: &[u8]) -> Result<usize> {
        let deadline = self.deadlines.write;
        let stream = self.stream()?;
        run_until(deadline, async {
            let mut sent = 0;
            while sent < buf.len() {
                match stream.write(&buf[sent..]).await {
                    Ok(0) => return Err(io::Error::from(io::ErrorKind::WriteZero).into()),
                    Ok(n) => sent += n,
                    Err(e) if sent == 0 && is_broken_pipe(&e) => return Err(Error::ClosedPipe),
                    Err(e) => return Err(e.into()),
                }
            }
            stream.flush().await?;
            Ok::<_, Error>(sent)
        })
        .await
    }

    async fn close(&mut self) -> Result<()> {
        let mut stream = self.stream.take().ok_or(Error::ConnectionClosed)?;
        stream.shutdown().await?;
        Ok(())
    }

    fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.local_addr)
    }

    fn peer_addr(&self) -> Result<SocketAddr> {
        Ok(self.peer_addr)
    }

    fn set_read_deadline(&mut self, deadline: Option<Instant>) -> Result<()> {
        self.stream()?;
        self.deadlines.read = deadline;
        Ok(())
    }

    fn set_write_deadline(&mut self, deadline: Option<Instant>) -> Result<()> {
        self.stream()?;
        self.deadlines.write = deadline;
        Ok(())
    }
}
