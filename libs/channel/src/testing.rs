//! Scripted in-memory connections for exercising channel behaviour.

use std::collections::VecDeque;
use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::Instant;

use crate::connection::{Connection, Dialer};
use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Sent,
    ClosedPipe,
    Reset,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Op {
    Dial(u16),
    Write(u16, Vec<u8>),
    ReadDeadline(u16, Option<Instant>),
    WriteDeadline(u16, Option<Instant>),
    Close(u16),
}

#[derive(Default)]
struct State {
    log: Vec<Op>,
    writes: VecDeque<Outcome>,
    always: Option<Outcome>,
    next_id: u16,
    fail_dials: bool,
    fail_reads: bool,
}

/// Shared script driving every mock connection a [`MockDialer`] hands out
#[derive(Clone, Default)]
pub struct Script(Arc<Mutex<State>>);

impl Script {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue outcomes for the next writes, across connections
    pub fn then(&self, outcomes: &[Outcome]) -> &Self {
        self.0.lock().unwrap().writes.extend(outcomes);
        self
    }

    /// Outcome of every write once the queue is drained
    pub fn always(&self, outcome: Outcome) -> &Self {
        self.0.lock().unwrap().always = Some(outcome);
        self
    }

    pub fn fail_dials(&self) -> &Self {
        self.0.lock().unwrap().fail_dials = true;
        self
    }

    pub fn allow_dials(&self) -> &Self {
        self.0.lock().unwrap().fail_dials = false;
        self
    }

    pub fn fail_reads(&self) -> &Self {
        self.0.lock().unwrap().fail_reads = true;
        self
    }

    pub fn log(&self) -> Vec<Op> {
        self.0.lock().unwrap().log.clone()
    }

    pub fn dials(&self) -> usize {
        self.log().iter().filter(|op| matches!(op, Op::Dial(_))).count()
    }

    pub fn write_deadlines(&self) -> Vec<Option<Instant>> {
        self.log()
            .into_iter()
            .filter_map(|op| match op {
                Op::WriteDeadline(_, at) => Some(at),
                _ => None,
            })
            .collect()
    }

    /// A connection that counts as already dialed
    pub fn connection(&self) -> MockConnection {
        let mut state = self.0.lock().unwrap();
        state.next_id += 1;
        MockConnection {
            id: state.next_id,
            script: self.clone(),
            open: true,
        }
    }

    fn record(&self, op: Op) {
        self.0.lock().unwrap().log.push(op);
    }

    fn next_write(&self) -> Outcome {
        let mut state = self.0.lock().unwrap();
        let fallback = state.always.unwrap_or(Outcome::Sent);
        state.writes.pop_front().unwrap_or(fallback)
    }
}

pub struct MockConnection {
    pub id: u16,
    script: Script,
    open: bool,
}

impl MockConnection {
    fn check_open(&self) -> Result<()> {
        if self.open {
            Ok(())
        } else {
            Err(Error::ConnectionClosed)
        }
    }
}

#[async_trait::async_trait]
impl Connection for MockConnection {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.check_open()?;
        if self.script.0.lock().unwrap().fail_reads {
            return Err(io::Error::from(io::ErrorKind::ConnectionReset).into());
        }
        let data = b"data";
        let n = data.len().min(buf.len());
        buf[..n].copy_from_slice(&data[..n]);
        Ok(n)
    }

    async fn write(&mut self, buf: &[u8]) -> Result<usize> {
        self.check_open()?;
        self.script.record(Op::Write(self.id, buf.to_vec()));
        match self.script.next_write() {
            Outcome::Sent => Ok(buf.len()),
            Outcome::ClosedPipe => Err(Error::ClosedPipe),
            Outcome::Reset => Err(io::Error::from(io::ErrorKind::ConnectionReset).into()),
        }
    }

    async fn close(&mut self) -> Result<()> {
        self.check_open()?;
        self.open = false;
        self.script.record(Op::Close(self.id));
        Ok(())
    }

    fn local_addr(&self) -> Result<SocketAddr> {
        Ok(SocketAddr::from(([127, 0, 0, 1], 40000 + self.id)))
    }

    fn peer_addr(&self) -> Result<SocketAddr> {
        Ok(SocketAddr::from(([127, 0, 0, 1], 9000 + self.id)))
    }

    fn set_read_deadline(&mut self, deadline: Option<Instant>) -> Result<()> {
        self.check_open()?;
        self.script.record(Op::ReadDeadline(self.id, deadline));
        Ok(())
    }

    fn set_write_deadline(&mut self, deadline: Option<Instant>) -> Result<()> {
        self.check_open()?;
        self.script.record(Op::WriteDeadline(self.id, deadline));
        Ok(())
    }
}

/// Dialer handing out [`MockConnection`]s, optionally after a delay
#[derive(Clone)]
pub struct MockDialer {
    pub script: Script,
    pub delay: Duration,
}

impl MockDialer {
    pub fn new(script: &Script) -> Self {
        Self {
            script: script.clone(),
            delay: Duration::ZERO,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[async_trait::async_trait]
impl Dialer for MockDialer {
    async fn dial(&self, _addr: &str, _timeout: Option<Duration>) -> Result<Box<dyn Connection>> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.script.0.lock().unwrap().fail_dials {
            return Err(io::Error::from(io::ErrorKind::ConnectionRefused).into());
        }
        let conn = self.script.connection();
        self.script.record(Op::Dial(conn.id));
        Ok(Box::new(conn))
    }
}
