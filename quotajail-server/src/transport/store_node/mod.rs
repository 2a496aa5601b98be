//! Store node transport: the shared state store for a replica fleet
//!
//! A replica started with `--store-node` exposes its [`ShardedStore`] over
//! RESP (Redis Serialization Protocol). Other replicas reach it through
//! [`RemoteStore`](crate::store::RemoteStore); every evaluation runs here,
//! under the store's per-key lock, so the whole fleet sees one serialized
//! history per bucket.
//!
//! # Supported Commands
//!
//! - `BUCKET.EVAL subject action capacity refill_rate requested now max_violations ban_duration`
//! - `BUCKET.GET subject action` - Inspect a bucket
//! - `PING [message]` - Health check
//! - `QUIT` - Close connection
//!
//! # Example Usage
//!
//! ```bash
//! redis-cli -p 6379
//! > BUCKET.EVAL user:123 login 5 1 1 1700000000 5 60
//! (integer) 1
//! > BUCKET.GET user:123 login
//! 1) "4"
//! 2) (integer) 1700000000
//! 3) (integer) 0
//! 4) (integer) 0
//! ```

pub mod protocol;
pub mod resp;

use self::resp::RespValue;
use super::Transport;
use anyhow::{Context, Result};
use async_trait::async_trait;
use bytes::{Buf, BytesMut};
use quotajail::{BucketKey, Limits, Policy, ShardedStore, Store};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tracing::{debug, error, info};

const MAX_BUFFER_SIZE: usize = 64 * 1024; // 64KB max buffer per connection
const READ_TIMEOUT: Duration = Duration::from_secs(300);

/// Store node transport implementation
pub struct StoreNodeTransport {
    addr: SocketAddr,
    store: Arc<ShardedStore>,
}

impl StoreNodeTransport {
    pub fn new(host: &str, port: u16, store: Arc<ShardedStore>) -> Result<Self> {
        let addr = format!("{host}:{port}")
            .parse()
            .with_context(|| format!("Invalid address: {host}:{port}"))?;
        Ok(Self { addr, store })
    }
}

#[async_trait]
impl Transport for StoreNodeTransport {
    async fn start(self) -> Result<()> {
        let listener = TcpListener::bind(&self.addr)
            .await
            .with_context(|| format!("Failed to bind to {}", self.addr))?;

        info!("Store node listening on {}", self.addr);

        loop {
            let (socket, addr) = listener.accept().await?;
            let store = Arc::clone(&self.store);

            tokio::spawn(async move {
                if let Err(e) = handle_connection(socket, addr, store).await {
                    error!("Error handling store connection from {}: {}", addr, e);
                }
            });
        }
    }
}

async fn handle_connection(
    mut socket: TcpStream,
    addr: SocketAddr,
    store: Arc<ShardedStore>,
) -> Result<()> {
    debug!("New store connection from {}", addr);
    socket.set_nodelay(true)?;

    let mut buffer = BytesMut::with_capacity(4096);
    let mut replies = Vec::new();

    loop {
        let n = match timeout(READ_TIMEOUT, socket.read_buf(&mut buffer)).await {
            Ok(Ok(n)) => n,
            Ok(Err(e)) => return Err(e.into()),
            Err(_) => {
                debug!("Store connection {} idle for 5 minutes, closing", addr);
                return Ok(());
            }
        };

        if n == 0 {
            debug!("Store connection closed by client {}", addr);
            return Ok(());
        }

        if buffer.len() > MAX_BUFFER_SIZE {
            error!("Store connection {} exceeded buffer size limit", addr);
            return Err(anyhow::anyhow!("Buffer size limit exceeded"));
        }

        // Answer every complete command in the buffer, in order
        let mut quit = false;
        while let Some((value, consumed)) = resp::parse(&buffer)? {
            buffer.advance(consumed);

            let (reply, is_quit) = match value {
                RespValue::Array(args) if is_command(&args, "QUIT") => {
                    (RespValue::SimpleString("OK".to_string()), true)
                }
                value => (process_command(value, &store), false),
            };
            reply.encode(&mut replies);

            if is_quit {
                quit = true;
                break;
            }
        }

        if !replies.is_empty() {
            socket.write_all(&replies).await?;
            replies.clear();
        }

        if quit {
            debug!("Closing store connection for {} after QUIT", addr);
            return Ok(());
        }
    }
}

fn is_command(args: &[RespValue], name: &str) -> bool {
    matches!(args.first(), Some(RespValue::BulkString(Some(cmd))) if cmd.eq_ignore_ascii_case(name))
}

pub(crate) fn process_command(value: RespValue, store: &ShardedStore) -> RespValue {
    let args = match value {
        RespValue::Array(args) => args,
        _ => return RespValue::error("expected array of commands"),
    };

    let command = match args.first() {
        Some(RespValue::BulkString(Some(cmd))) => cmd.to_ascii_uppercase(),
        Some(_) => return RespValue::error("invalid command format"),
        None => return RespValue::error("empty command"),
    };

    match command.as_str() {
        "PING" => handle_ping(&args),
        protocol::EVAL => handle_eval(&args[1..], store),
        protocol::GET => handle_get(&args[1..], store),
        _ => RespValue::error(format!("unknown command '{command}'")),
    }
}

fn handle_ping(args: &[RespValue]) -> RespValue {
    match args.len() {
        1 => RespValue::SimpleString("PONG".to_string()),
        2 => args[1].clone(),
        _ => RespValue::error("wrong number of arguments for 'ping' command"),
    }
}

fn handle_eval(args: &[RespValue], store: &ShardedStore) -> RespValue {
    if args.len() != protocol::EVAL_ARITY {
        return RespValue::error("wrong number of arguments for 'bucket.eval' command");
    }

    let key = match parse_key(&args[0], &args[1]) {
        Ok(key) => key,
        Err(reply) => return reply,
    };

    let parsed = (|| {
        let capacity = parse_integer(&args[2], "capacity", 1)?;
        let refill_rate = parse_integer(&args[3], "refill_rate", 0)?;
        let requested = parse_integer(&args[4], "requested", 0)?;
        let now = parse_integer(&args[5], "now", i64::MIN)?;
        let max_violations = parse_integer(&args[6], "max_violations", 1)?;
        let ban_duration = parse_integer(&args[7], "ban_duration", 0)?;

        let max_violations = u32::try_from(max_violations)
            .map_err(|_| RespValue::error("invalid max_violations"))?;

        Ok::<_, RespValue>((
            Limits::new(capacity, refill_rate).requested(requested),
            Policy::new(max_violations, ban_duration),
            now,
        ))
    })();

    let (limits, policy, now) = match parsed {
        Ok(parsed) => parsed,
        Err(reply) => return reply,
    };

    match store.evaluate(&key, limits, policy, now) {
        Ok(outcome) => RespValue::Integer(protocol::outcome_code(outcome)),
        Err(e) => RespValue::error(e.to_string()),
    }
}

fn handle_get(args: &[RespValue], store: &ShardedStore) -> RespValue {
    if args.len() != protocol::GET_ARITY {
        return RespValue::error("wrong number of arguments for 'bucket.get' command");
    }

    let key = match parse_key(&args[0], &args[1]) {
        Ok(key) => key,
        Err(reply) => return reply,
    };

    match store.snapshot(&key) {
        Ok(state) => protocol::state_reply(state),
        Err(e) => RespValue::error(e.to_string()),
    }
}

fn parse_key(subject: &RespValue, action: &RespValue) -> Result<BucketKey, RespValue> {
    match (subject, action) {
        (RespValue::BulkString(Some(subject)), RespValue::BulkString(Some(action)))
            if !subject.is_empty() && !action.is_empty() =>
        {
            Ok(BucketKey::new(subject.as_str(), action.as_str()))
        }
        _ => Err(RespValue::error("invalid key")),
    }
}

fn parse_integer(value: &RespValue, name: &str, min: i64) -> Result<i64, RespValue> {
    let parsed = match value {
        RespValue::BulkString(Some(s)) => s.parse().ok(),
        RespValue::Integer(n) => Some(*n),
        _ => None,
    };

    match parsed {
        Some(n) if n >= min => Ok(n),
        _ => Err(RespValue::error(format!("invalid {name}"))),
    }
}
