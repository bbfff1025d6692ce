//! Turning addresses into channels.
//!
//! A [`Registry`] maps a URL scheme such as `tcp` to the [`Constructor`] that
//! builds channels for it. Transports register themselves while the
//! application starts up; afterwards the registry is only read.
//! [`default_registry`] is the process-wide instance with the built-in `tcp`
//! and `udp` schemes.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use tracing::debug;
use url::Url;

use crate::channel::{Channel, SocketChannel};
use crate::config::ChannelConfig;
use crate::connection::Protocol;
use crate::error::{Error, Result};

/// Builds a channel for an address of one scheme
#[async_trait::async_trait]
pub trait Constructor: Send + Sync {
    async fn construct(&self, url: &Url, timeout: Duration) -> Result<Box<dyn Channel>>;
}

/// `tcp://host:port` and `udp://host:port` dial a [`SocketChannel`]
#[async_trait::async_trait]
impl Constructor for Protocol {
    async fn construct(&self, url: &Url, timeout: Duration) -> Result<Box<dyn Channel>> {
        let addr = host_port(url)?;
        Ok(Box::new(SocketChannel::dial(*self, &addr, timeout).await?))
    }
}

fn host_port(url: &Url) -> Result<String> {
    let host = url
        .host_str()
        .filter(|host| !host.is_empty())
        .ok_or_else(|| Error::InvalidAddress(format!("{url}: missing host")))?;
    let port = url
        .port()
        .ok_or_else(|| Error::InvalidAddress(format!("{url}: missing port")))?;
    Ok(format!("{host}:{port}"))
}

/// Scheme-to-constructor table
///
/// Registering needs `&mut self`, so it is finished before the registry is
/// shared for resolving.
#[derive(Clone, Default)]
pub struct Registry {
    constructors: HashMap<String, Arc<dyn Constructor>>,
}

impl Registry {
    /// An empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with the `tcp` and `udp` schemes
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Protocol::Tcp.as_str(), Protocol::Tcp);
        registry.register(Protocol::Udp.as_str(), Protocol::Udp);
        registry
    }

    /// Register `constructor` for `scheme`
    ///
    /// Schemes are case-sensitive. Registering a scheme again replaces the
    /// earlier constructor.
    pub fn register(&mut self, scheme: impl Into<String>, constructor: impl Constructor + 'static) {
        let scheme = scheme.into();
        let replaced = self
            .constructors
            .insert(scheme.clone(), Arc::new(constructor))
            .is_some();
        debug!(scheme = %scheme, replaced, "registered channel constructor");
    }

    /// Registered schemes, sorted
    pub fn schemes(&self) -> Vec<&str> {
        let mut schemes: Vec<&str> = self.constructors.keys().map(String::as_str).collect();
        schemes.sort_unstable();
        schemes
    }

    /// Build a channel with the constructor registered for `url`'s scheme
    pub async fn resolve_url(&self, url: &Url, timeout: Duration) -> Result<Box<dyn Channel>> {
        let constructor = self
            .constructors
            .get(url.scheme())
            .ok_or_else(|| Error::UnknownScheme(url.scheme().to_string()))?;
        constructor.construct(url, timeout).await
    }

    /// Build a channel from an address string
    ///
    /// `scheme://host[:port]` goes through [`Registry::resolve_url`]. Anything
    /// else is taken as a bare `host:port`, dialed over TCP and then over UDP.
    /// In that case the parse error is dropped and the UDP dial error is
    /// returned.
    pub async fn resolve(&self, address: &str, timeout: Duration) -> Result<Box<dyn Channel>> {
        match Url::parse(address) {
            Ok(url) if url.has_host() => self.resolve_url(&url, timeout).await,
            _ => {
                debug!(address, "no scheme://host, dialing as host:port");
                match SocketChannel::dial(Protocol::Tcp, address, timeout).await {
                    Ok(channel) => Ok(Box::new(channel)),
                    Err(e) => {
                        debug!(address, error = %e, "tcp dial failed, trying udp");
                        Ok(Box::new(
                            SocketChannel::dial(Protocol::Udp, address, timeout).await?,
                        ))
                    }
                }
            }
        }
    }

    /// Resolve the configured address with the configured timeout
    pub async fn connect(&self, config: &ChannelConfig) -> Result<Box<dyn Channel>> {
        self.resolve(&config.address, config.timeout).await
    }
}

/// The process-wide registry with the built-in schemes
pub fn default_registry() -> &'static Registry {
    static DEFAULT: OnceLock<Registry> = OnceLock::new();
    DEFAULT.get_or_init(Registry::with_builtins)
}
