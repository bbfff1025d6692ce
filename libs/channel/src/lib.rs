//! Constellation Channel - Byte-stream channels over interchangeable backends
//!
//! A [`Channel`] reads and writes bytes without the caller knowing whether a
//! single socket or a pool of equivalent backends sits behind it. Writes that
//! fail before anything was sent are retried on a fresh connection; reads
//! always report their errors.
//!
//! Channels are usually created from an address through a [`Registry`]:
//!
//! ```no_run
//! use std::time::Duration;
//!
//! use constellation_channel::{default_registry, Channel};
//!
//! # async fn example() -> constellation_channel::Result<()> {
//! let registry = default_registry();
//!
//! // Explicit scheme
//! let mut channel = registry
//!     .resolve("tcp://127.0.0.1:8080", Duration::from_secs(5))
//!     .await?;
//! channel.write(b"hello").await?;
//!
//! // Bare host:port is dialed over TCP, then UDP
//! let mut fallback = registry.resolve("127.0.0.1:9000", Duration::ZERO).await?;
//! let mut buf = [0u8; 512];
//! let n = fallback.read(&mut buf).await?;
//! # let _ = n;
//! # Ok(())
//! # }
//! ```

pub mod channel;
pub mod config;
pub mod connection;
pub mod deadline;
pub mod error;
pub mod registry;

#[cfg(test)]
mod testing;

// Re-exports for convenience
pub use channel::{Channel, PoolChannel, SocketChannel, SwitchPolicy};
pub use config::ChannelConfig;
pub use connection::{Connection, Dialer, Protocol};
pub use error::{Error, Result, WriteFailure};
pub use registry::{default_registry, Constructor, Registry};
