/// Redis cache adapter speaking RESP2 over a single TCP connection
use crate::adapter::base::AdapterCore;
use crate::adapter::resp::{RespEncoder, RespParser, RespValue};
use crate::adapter::{Adapter, CacheAdapter, KeyTtl, Metrics};
use crate::config::ServiceConfig;
use crate::error::{ThroomError, ThroomResult};
use crate::health::HealthStatus;
use async_trait::async_trait;
use bytes::BytesMut;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;

/// One established connection plus its unparsed read buffer
struct Connection {
    stream: TcpStream,
    buffer: BytesMut,
}

impl Connection {
    fn new(stream: TcpStream) -> Self {
        Self {
            stream,
            buffer: BytesMut::with_capacity(4096),
        }
    }

    /// Write one command and read exactly one reply
    async fn request(&mut self, command: &RespValue) -> ThroomResult<RespValue> {
        let mut out = BytesMut::new();
        RespEncoder::encode_into(&mut out, command);
        self.stream.write_all(&out).await?;

        loop {
            if let Some(reply) =
                RespParser::parse(&mut self.buffer).map_err(|e| ThroomError::protocol(e.to_string()))?
            {
                return Ok(reply);
            }

            if self.stream.read_buf(&mut self.buffer).await? == 0 {
                return Err(ThroomError::connection_failed(
                    "connection closed by server",
                ));
            }
        }
    }

    /// Send a command whose only acceptable answer is `+OK`
    async fn expect_ok(&mut self, command: &RespValue) -> ThroomResult<()> {
        match self.request(command).await? {
            RespValue::SimpleString(s) if s == "OK" => Ok(()),
            RespValue::Error(message) => Err(reply_error(message)),
            other => Err(ThroomError::protocol(format!("unexpected reply: {:?}", other))),
        }
    }
}

/// Map a `-ERR ...` reply onto the error taxonomy
fn reply_error(message: String) -> ThroomError {
    let kind = message.split_whitespace().next().unwrap_or_default();
    match kind {
        "NOAUTH" | "WRONGPASS" | "NOPERM" => ThroomError::unauthorized(message),
        "LOADING" | "BUSY" | "MASTERDOWN" => ThroomError::service_unavailable(message),
        _ => ThroomError::backend(message),
    }
}

/// Cache adapter for a single Redis server
///
/// After a successful `connect` the adapter stays open until `disconnect`.
/// A connection lost in between is re-established by the next command.
pub struct RedisAdapter {
    core: AdapterCore,
    connection: Mutex<Option<Connection>>,
    open: AtomicBool,
}

impl RedisAdapter {
    pub fn new(config: ServiceConfig) -> Self {
        Self {
            core: AdapterCore::new(config),
            connection: Mutex::new(None),
            open: AtomicBool::new(false),
        }
    }

    /// Open the socket and run the AUTH/SELECT handshake
    async fn handshake(&self) -> ThroomResult<Connection> {
        let config = self.core.config();
        let address = config.address();

        let stream = TcpStream::connect(&address)
            .await
            .map_err(|e| ThroomError::connection_failed(format!("{}: {}", address, e)))?;
        stream.set_nodelay(true)?;
        let mut conn = Connection::new(stream);

        if let Some(password) = &config.password {
            let auth = match &config.username {
                Some(username) => {
                    RespEncoder::create_command("AUTH", &[username.as_str(), password.as_str()])
                }
                None => RespEncoder::create_command("AUTH", &[password.as_str()]),
            };
            conn.expect_ok(&auth).await?;
        }

        match config.database.as_deref() {
            Some(db) if db.parse::<u32>().is_ok() => {
                conn.expect_ok(&RespEncoder::create_command("SELECT", &[db]))
                    .await?;
            }
            Some(db) => {
                tracing::warn!(address = %address, "Ignoring non-numeric Redis database {:?}", db);
            }
            None => {}
        }

        Ok(conn)
    }

    /// Run one command through the shared connection, re-running the
    /// handshake first if the previous connection was dropped.
    ///
    /// I/O failures and timeouts drop the connection, since its reply stream
    /// can no longer be trusted, and mark the adapter disconnected.
    async fn command(&self, operation: &str, args: &[&str]) -> ThroomResult<RespValue> {
        if !self.open.load(Ordering::Acquire) {
            return Err(self.not_connected());
        }
        let command = RespEncoder::create_command(operation, args);

        let result = self
            .core
            .observe(operation, async {
                let mut guard = self.connection.lock().await;
                if guard.is_none() {
                    // disconnect may have won the race for the lock
                    if !self.open.load(Ordering::Acquire) {
                        return Err(self.not_connected());
                    }
                    *guard = Some(self.handshake().await?);
                    self.core.set_connected(true);
                    tracing::info!(address = %self.core.config().address(), "Reconnected to Redis");
                }
                let Some(conn) = guard.as_mut() else {
                    return Err(self.not_connected());
                };

                match conn.request(&command).await {
                    Ok(RespValue::Error(message)) => Err(reply_error(message)),
                    Ok(reply) => Ok(reply),
                    Err(e) => {
                        *guard = None;
                        Err(e)
                    }
                }
            })
            .await;

        if let Err(e) = &result {
            if matches!(
                e,
                ThroomError::Timeout { .. }
                    | ThroomError::Network(_)
                    | ThroomError::ConnectionFailed { .. }
                    | ThroomError::Protocol(_)
            ) {
                self.drop_connection(e).await;
            }
        }

        result
    }

    fn not_connected(&self) -> ThroomError {
        ThroomError::connection_failed(format!(
            "redis adapter at {} is not connected",
            self.core.config().address()
        ))
    }

    async fn drop_connection(&self, cause: &ThroomError) {
        self.connection.lock().await.take();
        if self.core.is_connected() {
            tracing::warn!(
                address = %self.core.config().address(),
                "Dropping Redis connection: {}",
                cause
            );
        }
        self.core.set_connected(false);
    }

    fn integer(reply: RespValue) -> ThroomResult<i64> {
        reply
            .as_integer()
            .ok_or_else(|| ThroomError::protocol(format!("expected integer reply, got {:?}", reply)))
    }
}

#[async_trait]
impl Adapter for RedisAdapter {
    async fn connect(&self, timeout: Duration) -> ThroomResult<()> {
        let address = self.core.config().address();
        let conn = tokio::time::timeout(timeout, self.handshake())
            .await
            .map_err(|_| ThroomError::timeout(format!("connect to {}", address)))??;

        *self.connection.lock().await = Some(conn);
        self.open.store(true, Ordering::Release);
        self.core.set_connected(true);
        tracing::info!(address = %address, "Connected to Redis");
        Ok(())
    }

    async fn disconnect(&self) -> ThroomResult<()> {
        self.open.store(false, Ordering::Release);
        if let Some(mut conn) = self.connection.lock().await.take() {
            let _ = conn.stream.shutdown().await;
            tracing::info!(address = %self.core.config().address(), "Disconnected from Redis");
        }
        self.core.set_connected(false);
        Ok(())
    }

    async fn ping(&self) -> ThroomResult<()> {
        match self.command("PING", &[]).await? {
            RespValue::SimpleString(s) if s == "PONG" => Ok(()),
            other => Err(ThroomError::protocol(format!("unexpected PING reply: {:?}", other))),
        }
    }

    async fn health_check(&self) -> ThroomResult<HealthStatus> {
        Ok(self.core.track_health(self.ping()).await)
    }

    fn health_check_failed(&self, reason: String, response_time: Duration) -> HealthStatus {
        self.core.health_failed(reason, response_time)
    }

    fn adapter_type(&self) -> &str {
        self.core.adapter_type()
    }

    fn metrics(&self) -> Metrics {
        self.core.metrics()
    }

    fn is_connected(&self) -> bool {
        self.core.is_connected()
    }

    fn config(&self) -> &ServiceConfig {
        self.core.config()
    }
}

#[async_trait]
impl CacheAdapter for RedisAdapter {
    async fn get(&self, key: &str) -> ThroomResult<Option<String>> {
        match self.command("GET", &[key]).await? {
            RespValue::BulkString(None) => Ok(None),
            RespValue::BulkString(Some(data)) => String::from_utf8(data.to_vec())
                .map(Some)
                .map_err(|e| ThroomError::protocol(e.to_string())),
            other => Err(ThroomError::protocol(format!("unexpected GET reply: {:?}", other))),
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> ThroomResult<()> {
        let reply = match ttl.filter(|t| !t.is_zero()) {
            Some(ttl) => {
                let millis = ttl.as_millis().max(1).to_string();
                self.command("SET", &[key, value, "PX", &millis]).await?
            }
            None => self.command("SET", &[key, value]).await?,
        };

        match reply {
            RespValue::SimpleString(s) if s == "OK" => Ok(()),
            other => Err(ThroomError::protocol(format!("unexpected SET reply: {:?}", other))),
        }
    }

    async fn delete(&self, key: &str) -> ThroomResult<bool> {
        Ok(Self::integer(self.command("DEL", &[key]).await?)? > 0)
    }

    async fn exists(&self, key: &str) -> ThroomResult<bool> {
        Ok(Self::integer(self.command("EXISTS", &[key]).await?)? > 0)
    }

    async fn keys(&self, pattern: &str) -> ThroomResult<Vec<String>> {
        match self.command("KEYS", &[pattern]).await? {
            RespValue::Array(Some(items)) => items
                .iter()
                .map(|item| {
                    item.as_str()
                        .map(str::to_string)
                        .ok_or_else(|| ThroomError::protocol("non-string key in KEYS reply"))
                })
                .collect(),
            RespValue::Array(None) => Ok(Vec::new()),
            other => Err(ThroomError::protocol(format!("unexpected KEYS reply: {:?}", other))),
        }
    }

    async fn ttl(&self, key: &str) -> ThroomResult<KeyTtl> {
        match Self::integer(self.command("PTTL", &[key]).await?)? {
            -2 => Ok(KeyTtl::Missing),
            -1 => Ok(KeyTtl::Persistent),
            millis if millis >= 0 => Ok(KeyTtl::Expires(Duration::from_millis(millis as u64))),
            other => Err(ThroomError::protocol(format!("unexpected PTTL reply: {}", other))),
        }
    }

    async fn expire(&self, key: &str, ttl: Duration) -> ThroomResult<bool> {
        let millis = ttl.as_millis().to_string();
        Ok(Self::integer(self.command("PEXPIRE", &[key, &millis]).await?)? == 1)
    }
}
