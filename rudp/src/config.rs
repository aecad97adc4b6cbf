use anyhow::{Context, Result};
use std::env;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

const DEFAULT_RESEND_DELAY: u64 = 500; // ms
const DEFAULT_MAX_RETRANSMISSIONS: u32 = 4;
const DEFAULT_HEARTBEAT_INTERVAL: u64 = 3000; // ms
const DEFAULT_HANDSHAKE_ATTEMPTS: u32 = 4;

#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionConfig {
    /// How long to wait for an acknowledgment before resending a reliable packet
    resend_delay: Duration,

    /// How many times a reliable packet is resent before the connection is closed
    max_retransmissions: u32,

    /// How often to send a heartbeat once the connection is open
    heartbeat_interval: Duration,

    /// How many SYN (client) or SYN-ACK (server) packets are sent before giving up
    handshake_attempts: u32,

    /// The local address clients bind to, defaults to an ephemeral port
    bind_addr: Option<SocketAddr>,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            resend_delay: Duration::from_millis(DEFAULT_RESEND_DELAY),
            max_retransmissions: DEFAULT_MAX_RETRANSMISSIONS,
            heartbeat_interval: Duration::from_millis(DEFAULT_HEARTBEAT_INTERVAL),
            handshake_attempts: DEFAULT_HANDSHAKE_ATTEMPTS,
            bind_addr: None,
        }
    }
}

fn parse_env<T>(name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(value) => Ok(Some(
            value
                .parse::<T>()
                .with_context(|| format!("invalid value for {}: {}", name, value))?,
        )),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(err) => Err(err).with_context(|| format!("could not read {}", name)),
    }
}

impl ConnectionConfig {
    /// Reads overrides for the defaults from RUDP_* environment variables
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Some(ms) = parse_env::<u64>("RUDP_RESEND_DELAY_MS")? {
            config = config.with_resend_delay(Duration::from_millis(ms));
        }

        if let Some(count) = parse_env::<u32>("RUDP_MAX_RETRANSMISSIONS")? {
            config = config.with_max_retransmissions(count);
        }

        if let Some(ms) = parse_env::<u64>("RUDP_HEARTBEAT_INTERVAL_MS")? {
            config = config.with_heartbeat_interval(Duration::from_millis(ms));
        }

        if let Some(count) = parse_env::<u32>("RUDP_HANDSHAKE_ATTEMPTS")? {
            config = config.with_handshake_attempts(count);
        }

        if let Some(addr) = parse_env::<SocketAddr>("RUDP_BIND_ADDR")? {
            config = config.with_bind_addr(addr);
        }

        Ok(config)
    }

    pub fn resend_delay(&self) -> Duration {
        self.resend_delay
    }

    pub fn with_resend_delay(mut self, value: Duration) -> Self {
        assert!(value > Duration::from_millis(0));
        self.resend_delay = value;

        self
    }

    pub fn max_retransmissions(&self) -> u32 {
        self.max_retransmissions
    }

    pub fn with_max_retransmissions(mut self, value: u32) -> Self {
        self.max_retransmissions = value;

        self
    }

    pub fn heartbeat_interval(&self) -> Duration {
        self.heartbeat_interval
    }

    pub fn with_heartbeat_interval(mut self, value: Duration) -> Self {
        assert!(value > Duration::from_millis(0));
        self.heartbeat_interval = value;

        self
    }

    pub fn handshake_attempts(&self) -> u32 {
        self.handshake_attempts
    }

    pub fn with_handshake_attempts(mut self, value: u32) -> Self {
        assert!(value >= 1);
        self.handshake_attempts = value;

        self
    }

    pub fn bind_addr(&self) -> Option<SocketAddr> {
        self.bind_addr
    }

    pub fn with_bind_addr(mut self, value: SocketAddr) -> Self {
        self.bind_addr = Some(value);

        self
    }
}
