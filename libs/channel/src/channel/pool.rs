use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, warn};

use crate::channel::{Channel, SocketChannel};
use crate::connection::Dialer;
use crate::deadline::{self, Deadlines};
use crate::error::{Error, Result};

/// When a pool moves traffic to its next backend
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SwitchPolicy {
    /// Only on [`Channel::next_backend`] or after a failed write
    #[default]
    Manual,
    /// Additionally after every successful write
    EverySend,
}

/// Channel spread over several equivalent backends
///
/// Traffic goes to one active backend at a time. A write the active backend
/// reports as undelivered is repeated on the next backend, at most once per
/// backend. Any other write failure is returned, and the following write goes
/// to a different backend. Reads use the active backend and never retry.
///
/// Addresses that could not be reached yet are kept and redialed while
/// [`Channel::wait_for_non_empty`] waits.
pub struct PoolChannel {
    backends: Vec<Box<dyn Channel>>,
    active: usize,
    policy: SwitchPolicy,
    pending: Vec<String>,
    dialer: Option<Arc<dyn Dialer>>,
    timeout: Duration,
    redial_interval: Duration,
    manual_deadline: bool,
    deadlines: Deadlines,
    closed: bool,
}

impl PoolChannel {
    pub fn new(policy: SwitchPolicy) -> Self {
        Self {
            backends: Vec::new(),
            active: 0,
            policy,
            pending: Vec::new(),
            dialer: None,
            timeout: Duration::ZERO,
            redial_interval: Duration::from_millis(100),
            manual_deadline: false,
            deadlines: Deadlines::default(),
            closed: false,
        }
    }

    /// Dial every address through `dialer`, keeping the unreachable ones for later
    pub async fn dial_all<I, S>(
        dialer: Arc<dyn Dialer>,
        addrs: I,
        timeout: Duration,
        policy: SwitchPolicy,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut pool = Self::new(policy);
        pool.dialer = Some(dialer);
        pool.timeout = timeout;
        pool.pending = addrs.into_iter().map(Into::into).collect();
        pool.redial_pending().await;
        pool
    }

    /// Set how often pending addresses are redialed while waiting
    pub fn with_redial_interval(mut self, interval: Duration) -> Self {
        self.redial_interval = interval;
        self
    }

    pub fn add_backend(&mut self, backend: impl Channel + 'static) {
        self.push(Box::new(backend));
    }

    /// Addresses not connected yet
    pub fn pending(&self) -> &[String] {
        &self.pending
    }

    pub fn policy(&self) -> SwitchPolicy {
        self.policy
    }

    fn push(&mut self, mut backend: Box<dyn Channel>) {
        if self.manual_deadline {
            let index = self.backends.len();
            let Deadlines { read, write } = self.deadlines;
            if let Some(Err(e)) = read.map(|at| backend.set_read_deadline(at)) {
                warn!(backend = index, error = %e, "backend rejected read deadline");
            }
            if let Some(Err(e)) = write.map(|at| backend.set_write_deadline(at)) {
                warn!(backend = index, error = %e, "backend rejected write deadline");
            }
        }
        self.backends.push(backend);
    }

    fn advance(&mut self) {
        if !self.backends.is_empty() {
            self.active = (self.active + 1) % self.backends.len();
        }
    }

    fn active(&mut self) -> Result<&mut Box<dyn Channel>> {
        if self.closed {
            return Err(Error::ConnectionClosed);
        }
        self.backends.get_mut(self.active).ok_or(Error::NoBackends)
    }

    fn active_ref(&self) -> Result<&dyn Channel> {
        if self.closed {
            return Err(Error::ConnectionClosed);
        }
        self.backends
            .get(self.active)
            .map(|backend| &**backend)
            .ok_or(Error::NoBackends)
    }

    async fn redial_pending(&mut self) {
        let Some(dialer) = self.dialer.clone() else {
            return;
        };
        for addr in std::mem::take(&mut self.pending) {
            let dialed = SocketChannel::builder()
                .address(addr.as_str())
                .dialer(dialer.clone())
                .timeout(self.timeout)
                .connect()
                .await;
            match dialed {
                Ok(channel) => {
                    debug!(peer = %addr, "backend connected");
                    self.push(Box::new(channel));
                }
                Err(e) => {
                    debug!(peer = %addr, error = %e, "backend unreachable");
                    self.pending.push(addr);
                }
            }
        }
    }

    fn each_backend(&mut self, mut f: impl FnMut(&mut dyn Channel) -> Result<()>) -> Result<()> {
        if self.closed {
            return Err(Error::ConnectionClosed);
        }
        let mut first = None;
        for backend in &mut self.backends {
            if let Err(e) = f(&mut **backend) {
                first.get_or_insert(e);
            }
        }
        first.map_or(Ok(()), Err)
    }
}

#[async_trait::async_trait]
impl Channel for PoolChannel {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.active()?.read(buf).await
    }

    async fn write(&mut self, buf: &[u8]) -> Result<usize> {
        let mut attempts = 0;
        loop {
            let index = self.active;
            let err = match self.active()?.write(buf).await {
                Ok(n) => {
                    if self.policy == SwitchPolicy::EverySend {
                        self.advance();
                    }
                    return Ok(n);
                }
                Err(err) => err,
            };

            self.advance();
            attempts += 1;
            if !err.is_retryable() || attempts >= self.backends.len() {
                return Err(err);
            }
            warn!(backend = index, error = %err, "write not delivered, trying next backend");
        }
    }

    async fn close(&mut self) -> Result<()> {
        if std::mem::replace(&mut self.closed, true) {
            return Err(Error::ConnectionClosed);
        }
        self.pending.clear();
        let mut first = None;
        for mut backend in self.backends.drain(..) {
            if let Err(e) = backend.close().await {
                first.get_or_insert(e);
            }
        }
        first.map_or(Ok(()), Err)
    }

    fn local_addr(&self) -> Result<SocketAddr> {
        self.active_ref()?.local_addr()
    }

    fn remote_addr(&self) -> Result<SocketAddr> {
        self.active_ref()?.remote_addr()
    }

    fn set_deadline(&mut self, deadline: Instant) -> Result<()> {
        self.manual_deadline = true;
        self.deadlines.set(Some(deadline));
        self.each_backend(|backend| backend.set_deadline(deadline))
    }

    fn set_read_deadline(&mut self, deadline: Instant) -> Result<()> {
        self.manual_deadline = true;
        self.deadlines.read = Some(deadline);
        self.each_backend(|backend| backend.set_read_deadline(deadline))
    }

    fn set_write_deadline(&mut self, deadline: Instant) -> Result<()> {
        self.manual_deadline = true;
        self.deadlines.write = Some(deadline);
        self.each_backend(|backend| backend.set_write_deadline(deadline))
    }

    async fn wait_for_non_empty(&mut self, deadline: Duration) -> Result<()> {
        if self.closed {
            return Err(Error::ConnectionClosed);
        }
        let until = deadline::deadline_in(deadline);
        loop {
            if !self.backends.is_empty() {
                return Ok(());
            }
            self.redial_pending().await;
            if !self.backends.is_empty() {
                return Ok(());
            }

            let now = Instant::now();
            if now >= until {
                return Err(Error::DeadlineExceeded);
            }
            let next = now.checked_add(self.redial_interval).unwrap_or(until);
            tokio::time::sleep_until(until.min(next)).await;
        }
    }

    fn next_backend(&mut self) {
        self.advance();
    }

    /// Leaves count until the pool is closed, including a leaf whose last
    /// redial failed, since its next write dials again.
    fn num_backends(&self) -> u64 {
        self.backends
            .iter()
            .map(|backend| backend.num_backends())
            .sum()
    }

    fn subchannels(&mut self) -> Vec<&mut dyn Channel> {
        self.backends
            .iter_mut()
            .flat_map(|backend| backend.subchannels())
            .collect()
    }
}
