//! Client side of the store-node protocol
//!
//! Each evaluation borrows one pooled TCP connection, sends one
//! `BUCKET.EVAL` command and waits for one reply. There is exactly one
//! attempt per evaluation: any failure is reported to the caller, who decides
//! what a missing answer means.

use super::StateStore;
use crate::transport::store_node::protocol;
use crate::transport::store_node::resp::{self, RespValue};
use async_trait::async_trait;
use bytes::{Buf, BytesMut};
use parking_lot::Mutex;
use quotajail::{BucketKey, BucketState, Limits, Outcome, Policy, StoreError};
use std::io;
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

const READ_CHUNK: usize = 512;
const MAX_REPLY_SIZE: usize = 64 * 1024;

#[derive(Clone, Debug)]
pub struct RemoteStoreConfig {
    pub max_idle_connections: usize,
    /// Pooled connections idle for longer are closed instead of reused.
    /// Keep it below the store node's read timeout.
    pub idle_timeout: Duration,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    pub tcp_nodelay: bool,
}

impl Default for RemoteStoreConfig {
    fn default() -> Self {
        Self {
            max_idle_connections: 32,
            idle_timeout: Duration::from_secs(90),
            connect_timeout: Duration::from_millis(500),
            request_timeout: Duration::from_millis(500),
            tcp_nodelay: true,
        }
    }
}

/// [`StateStore`] backed by a store node
///
/// # Example
///
/// ```ignore
/// let store = RemoteStore::new("10.0.0.5:6379", RemoteStoreConfig::default());
/// let outcome = store.evaluate(&key, limits, policy, now).await?;
/// ```
pub struct RemoteStore {
    addr: String,
    config: RemoteStoreConfig,
    idle: Mutex<Vec<Connection>>,
}

struct Connection {
    stream: TcpStream,
    buf: BytesMut,
    last_used: Instant,
}

impl Connection {
    /// Whether the connection can still carry a command
    ///
    /// A pooled connection has no reply pending, so any readable byte or an
    /// end of stream means the node has hung up or is out of sync.
    fn is_reusable(&self) -> bool {
        let mut byte = [0u8; 1];
        match self.stream.try_read(&mut byte) {
            Err(e) => e.kind() == io::ErrorKind::WouldBlock,
            Ok(_) => false,
        }
    }

    async fn round_trip(&mut self, command: &RespValue) -> io::Result<RespValue> {
        self.stream.write_all(&command.to_bytes()).await?;

        loop {
            match resp::parse(&self.buf) {
                Ok(Some((value, consumed))) => {
                    self.buf.advance(consumed);
                    if !self.buf.is_empty() {
                        return Err(invalid_data("unsolicited bytes after reply"));
                    }
                    self.last_used = Instant::now();
                    return Ok(value);
                }
                Ok(None) => {}
                Err(e) => return Err(invalid_data(e.to_string())),
            }

            if self.buf.len() > MAX_REPLY_SIZE {
                return Err(invalid_data("reply too large"));
            }

            if self.stream.read_buf(&mut self.buf).await? == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "store node closed the connection",
                ));
            }
        }
    }
}

fn invalid_data(message: impl Into<String>) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, message.into())
}

impl RemoteStore {
    pub fn new(addr: impl Into<String>, config: RemoteStoreConfig) -> Self {
        Self {
            addr: addr.into(),
            idle: Mutex::new(Vec::with_capacity(config.max_idle_connections)),
            config,
        }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Number of pooled connections currently idle
    pub fn idle_connections(&self) -> usize {
        self.idle.lock().len()
    }

    /// Fetch the stored state of `key` without modifying it
    pub async fn snapshot(&self, key: &BucketKey) -> Result<Option<BucketState>, StoreError> {
        let reply = self.send(protocol::get_command(key)).await?;
        protocol::state_from_reply(&reply).map_err(StoreError::Protocol)
    }

    async fn send(&self, command: RespValue) -> Result<RespValue, StoreError> {
        let reply = timeout(self.config.request_timeout, self.exchange(&command))
            .await
            .map_err(|_| StoreError::Timeout)??;

        match reply {
            RespValue::Error(message) => Err(StoreError::Rejected(message)),
            reply => Ok(reply),
        }
    }

    // A connection only goes back to the pool after a complete reply; one
    // abandoned mid-exchange is dropped with this future.
    async fn exchange(&self, command: &RespValue) -> Result<RespValue, StoreError> {
        let mut conn = match self.checkout() {
            Some(conn) => conn,
            None => self.connect().await?,
        };

        let reply = conn.round_trip(command).await.map_err(|e| {
            if e.kind() == io::ErrorKind::InvalidData {
                StoreError::Protocol(e.to_string())
            } else {
                StoreError::Unavailable(e)
            }
        })?;

        self.checkin(conn);
        Ok(reply)
    }

    // Expired or closed connections are dropped here, so a node that timed
    // out an idle connection is never reported as unavailable.
    fn checkout(&self) -> Option<Connection> {
        let mut idle = self.idle.lock();
        while let Some(conn) = idle.pop() {
            if conn.last_used.elapsed() < self.config.idle_timeout && conn.is_reusable() {
                return Some(conn);
            }
            debug!("Discarding stale store connection to {}", self.addr);
        }
        None
    }

    fn checkin(&self, conn: Connection) {
        let mut idle = self.idle.lock();
        if idle.len() < self.config.max_idle_connections {
            idle.push(conn);
        }
    }

    async fn connect(&self) -> Result<Connection, StoreError> {
        let stream = timeout(self.config.connect_timeout, TcpStream::connect(&self.addr))
            .await
            .map_err(|_| StoreError::Timeout)??;
        stream.set_nodelay(self.config.tcp_nodelay)?;
        debug!("Opened store connection to {}", self.addr);

        Ok(Connection {
            stream,
            buf: BytesMut::with_capacity(READ_CHUNK),
            last_used: Instant::now(),
        })
    }
}

fn unexpected(reply: &RespValue) -> StoreError {
    StoreError::Protocol(format!("unexpected reply: {reply:?}"))
}

#[async_trait]
impl StateStore for RemoteStore {
    async fn evaluate(
        &self,
        key: &BucketKey,
        limits: Limits,
        policy: Policy,
        now: i64,
    ) -> Result<Outcome, StoreError> {
        let reply = self
            .send(protocol::eval_command(key, limits, policy, now))
            .await?;

        match reply {
            RespValue::Integer(code) => protocol::outcome_from_code(code)
                .ok_or_else(|| StoreError::Protocol(format!("unknown outcome code {code}"))),
            other => Err(unexpected(&other)),
        }
    }

    async fn ping(&self) -> Result<(), StoreError> {
        match self.send(RespValue::command(["PING"])).await? {
            RespValue::SimpleString(reply) if reply == "PONG" => Ok(()),
            other => Err(unexpected(&other)),
        }
    }
}
