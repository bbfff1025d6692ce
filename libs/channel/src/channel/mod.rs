use std::net::SocketAddr;
use std::time::Duration;

use tokio::time::Instant;

use crate::error::Result;

pub mod pool;
pub mod socket;

pub use self::pool::{PoolChannel, SwitchPolicy};
pub use self::socket::{SocketChannel, SocketChannelBuilder};

/// Bidirectional byte stream over one or more interchangeable backends
///
/// Every implementation upholds the same contract:
///
/// - A read failure is always returned to the caller. Reads are never retried.
/// - A write either hands the whole buffer to one backend or returns an error.
///   It is only repeated when the backend reports that nothing was delivered.
/// - Addresses describe the backend that is active right now, which may change
///   after a reconnect.
/// - Setting a deadline explicitly turns off the channel's own per-operation
///   timeout handling for the rest of its life.
///
/// Methods take `&mut self`, so one instance has at most one operation in
/// flight. Share a channel between tasks behind a `tokio::sync::Mutex`.
#[async_trait::async_trait]
pub trait Channel: Send + Sync {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize>;

    async fn write(&mut self, buf: &[u8]) -> Result<usize>;

    /// Release every backend
    async fn close(&mut self) -> Result<()>;

    fn local_addr(&self) -> Result<SocketAddr>;

    fn remote_addr(&self) -> Result<SocketAddr>;

    fn set_deadline(&mut self, deadline: Instant) -> Result<()>;

    fn set_read_deadline(&mut self, deadline: Instant) -> Result<()>;

    fn set_write_deadline(&mut self, deadline: Instant) -> Result<()>;

    /// Wait until at least one backend is connected, or fail once `deadline`
    /// has passed
    async fn wait_for_non_empty(&mut self, deadline: Duration) -> Result<()>;

    /// Hint that traffic should move to another backend. May do nothing.
    fn next_backend(&mut self);

    /// Number of backends currently connected
    fn num_backends(&self) -> u64;

    /// Leaf channels making up this one, e.g. for broadcasting to every backend
    fn subchannels(&mut self) -> Vec<&mut dyn Channel>;
}
