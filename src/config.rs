use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use zeroize::Zeroizing;

use crate::stats::{NoopStats, StatsSink};
use crate::Error;

/// Smallest MTU we agree to work with. A ClientHello must fit unfragmented.
pub const MIN_MTU: usize = 256;

/// Connection and engine configuration.
#[derive(Clone)]
pub struct Config {
    mtu: usize,
    max_queue_rx: usize,
    max_queue_tx: usize,
    max_reassembly_bytes: usize,
    flight_start_rto: Duration,
    flight_max_rto: Duration,
    flight_retries: usize,
    handshake_timeout: Duration,
    require_cookie: bool,
    cookie_rotation_interval: Duration,
    cookie_retry_tolerance: usize,
    idle_timeout: Duration,
    close_linger: Duration,
    max_half_open: usize,
    max_connections: usize,
    psk: Option<Arc<Zeroizing<Vec<u8>>>>,
    stats_sink: Arc<dyn StatsSink>,
}

impl Config {
    /// Create a new configuration builder.
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder {
            mtu: 1150,
            max_queue_rx: 30,
            max_queue_tx: 16,
            max_reassembly_bytes: 64 * 1024,
            flight_start_rto: Duration::from_secs(1),
            flight_max_rto: Duration::from_secs(60),
            flight_retries: 4,
            handshake_timeout: Duration::from_secs(40),
            require_cookie: true,
            cookie_rotation_interval: Duration::from_secs(30),
            cookie_retry_tolerance: 1,
            idle_timeout: Duration::from_secs(300),
            close_linger: Duration::from_secs(4),
            max_half_open: 256,
            max_connections: 4096,
            psk: None,
            stats_sink: None,
        }
    }

    /// Max transmission unit.
    ///
    /// The largest size UDP packets we will produce.
    #[inline(always)]
    pub fn mtu(&self) -> usize {
        self.mtu
    }

    /// Max amount of pending handshake messages, and of early records
    /// buffered before the handshake completes.
    #[inline(always)]
    pub fn max_queue_rx(&self) -> usize {
        self.max_queue_rx
    }

    /// Max amount of outgoing datagrams to buffer.
    #[inline(always)]
    pub fn max_queue_tx(&self) -> usize {
        self.max_queue_tx
    }

    /// Max bytes held in handshake reassembly per connection.
    #[inline(always)]
    pub fn max_reassembly_bytes(&self) -> usize {
        self.max_reassembly_bytes
    }

    /// Time of first retry.
    ///
    /// Every flight restarts with this value. Doubled for every retry.
    #[inline(always)]
    pub fn flight_start_rto(&self) -> Duration {
        self.flight_start_rto
    }

    /// Cap for the doubled retry timeout.
    #[inline(always)]
    pub fn flight_max_rto(&self) -> Duration {
        self.flight_max_rto
    }

    /// Max number of retries per flight.
    #[inline(always)]
    pub fn flight_retries(&self) -> usize {
        self.flight_retries
    }

    /// Timeout for the entire handshake, regardless of flights.
    #[inline(always)]
    pub fn handshake_timeout(&self) -> Duration {
        self.handshake_timeout
    }

    /// Whether a server demands a cookie round-trip before committing state.
    #[inline(always)]
    pub fn require_cookie(&self) -> bool {
        self.require_cookie
    }

    /// How often the cookie secret rotates.
    #[inline(always)]
    pub fn cookie_rotation_interval(&self) -> Duration {
        self.cookie_rotation_interval
    }

    /// Additional cookie requests a client tolerates in one handshake.
    ///
    /// The first request is always accepted. With the default of 1, a
    /// second request (secret rotated mid-handshake) is answered and a
    /// third fails the connection.
    #[inline(always)]
    pub fn cookie_retry_tolerance(&self) -> usize {
        self.cookie_retry_tolerance
    }

    /// Close connections without authenticated traffic for this long.
    #[inline(always)]
    pub fn idle_timeout(&self) -> Duration {
        self.idle_timeout
    }

    /// Bounded wait for the peer to acknowledge a close.
    #[inline(always)]
    pub fn close_linger(&self) -> Duration {
        self.close_linger
    }

    /// Max concurrent server side handshakes.
    #[inline(always)]
    pub fn max_half_open(&self) -> usize {
        self.max_half_open
    }

    /// Max connections held by one engine.
    #[inline(always)]
    pub fn max_connections(&self) -> usize {
        self.max_connections
    }

    /// Optional pre-shared key mixed into the key schedule.
    #[inline(always)]
    pub fn psk(&self) -> Option<&[u8]> {
        self.psk.as_ref().map(|p| p.as_slice())
    }

    /// Receiver of statistics events.
    #[inline(always)]
    pub fn stats(&self) -> &dyn StatsSink {
        &*self.stats_sink
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("mtu", &self.mtu)
            .field("max_queue_rx", &self.max_queue_rx)
            .field("max_queue_tx", &self.max_queue_tx)
            .field("flight_start_rto", &self.flight_start_rto)
            .field("flight_max_rto", &self.flight_max_rto)
            .field("flight_retries", &self.flight_retries)
            .field("handshake_timeout", &self.handshake_timeout)
            .field("require_cookie", &self.require_cookie)
            .field("psk", &self.psk.is_some())
            .finish_non_exhaustive()
    }
}

/// Builder for [`Config`].
pub struct ConfigBuilder {
    mtu: usize,
    max_queue_rx: usize,
    max_queue_tx: usize,
    max_reassembly_bytes: usize,
    flight_start_rto: Duration,
    flight_max_rto: Duration,
    flight_retries: usize,
    handshake_timeout: Duration,
    require_cookie: bool,
    cookie_rotation_interval: Duration,
    cookie_retry_tolerance: usize,
    idle_timeout: Duration,
    close_linger: Duration,
    max_half_open: usize,
    max_connections: usize,
    psk: Option<Vec<u8>>,
    stats_sink: Option<Arc<dyn StatsSink>>,
}

impl ConfigBuilder {
    /// Set the max transmission unit (MTU).
    ///
    /// Defaults to 1150.
    pub fn mtu(mut self, mtu: usize) -> Self {
        self.mtu = mtu;
        self
    }

    /// Set the max amount of pending inbound handshake messages.
    ///
    /// Defaults to 30.
    pub fn max_queue_rx(mut self, max_queue_rx: usize) -> Self {
        self.max_queue_rx = max_queue_rx;
        self
    }

    /// Set the max amount of outgoing datagrams to buffer.
    ///
    /// Defaults to 16.
    pub fn max_queue_tx(mut self, max_queue_tx: usize) -> Self {
        self.max_queue_tx = max_queue_tx;
        self
    }

    /// Set the cap on bytes held in handshake reassembly.
    ///
    /// Defaults to 64 KiB.
    pub fn max_reassembly_bytes(mut self, bytes: usize) -> Self {
        self.max_reassembly_bytes = bytes;
        self
    }

    /// Set the time of first retry.
    ///
    /// Defaults to 1 second.
    pub fn flight_start_rto(mut self, rto: Duration) -> Self {
        self.flight_start_rto = rto;
        self
    }

    /// Set the cap of the retry timeout.
    ///
    /// Defaults to 60 seconds.
    pub fn flight_max_rto(mut self, rto: Duration) -> Self {
        self.flight_max_rto = rto;
        self
    }

    /// Set the max number of retries per flight.
    ///
    /// Defaults to 4.
    pub fn flight_retries(mut self, retries: usize) -> Self {
        self.flight_retries = retries;
        self
    }

    /// Set the timeout for the entire handshake, regardless of flights.
    ///
    /// Defaults to 40 seconds.
    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Set whether servers demand a cookie round-trip.
    ///
    /// Defaults to true.
    pub fn require_cookie(mut self, require: bool) -> Self {
        self.require_cookie = require;
        self
    }

    /// Set how often the cookie secret rotates.
    ///
    /// Defaults to 30 seconds.
    pub fn cookie_rotation_interval(mut self, interval: Duration) -> Self {
        self.cookie_rotation_interval = interval;
        self
    }

    /// Set how many additional cookie requests a client tolerates.
    ///
    /// Defaults to 1.
    pub fn cookie_retry_tolerance(mut self, tolerance: usize) -> Self {
        self.cookie_retry_tolerance = tolerance;
        self
    }

    /// Set the idle timeout.
    ///
    /// Defaults to 300 seconds.
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Set the bounded wait for close acknowledgment.
    ///
    /// Defaults to 4 seconds.
    pub fn close_linger(mut self, linger: Duration) -> Self {
        self.close_linger = linger;
        self
    }

    /// Set the max concurrent server side handshakes.
    ///
    /// Defaults to 256.
    pub fn max_half_open(mut self, max: usize) -> Self {
        self.max_half_open = max;
        self
    }

    /// Set the max connections per engine.
    ///
    /// Defaults to 4096.
    pub fn max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    /// Set a pre-shared key that both peers mix into the key schedule.
    ///
    /// Peers with different keys fail the handshake at Finished.
    pub fn psk(mut self, psk: &[u8]) -> Self {
        self.psk = Some(psk.to_vec());
        self
    }

    /// Set the statistics sink.
    ///
    /// Defaults to a sink that discards everything.
    pub fn with_stats_sink(mut self, sink: Arc<dyn StatsSink>) -> Self {
        self.stats_sink = Some(sink);
        self
    }

    /// Build the configuration.
    ///
    /// Returns `Error::ConfigError` for values the engine cannot work with.
    pub fn build(self) -> Result<Config, Error> {
        if self.mtu < MIN_MTU {
            return Err(Error::ConfigError(format!(
                "mtu {} below minimum {}",
                self.mtu, MIN_MTU
            )));
        }
        if self.mtu > u16::MAX as usize {
            return Err(Error::ConfigError(format!("mtu {} too large", self.mtu)));
        }
        if self.flight_start_rto.is_zero() {
            return Err(Error::ConfigError("flight_start_rto is zero".to_string()));
        }
        if self.flight_max_rto < self.flight_start_rto {
            return Err(Error::ConfigError(
                "flight_max_rto below flight_start_rto".to_string(),
            ));
        }
        if self.max_queue_tx == 0 || self.max_queue_rx == 0 {
            return Err(Error::ConfigError("queue sizes must be > 0".to_string()));
        }
        if self.cookie_rotation_interval.is_zero() {
            return Err(Error::ConfigError(
                "cookie_rotation_interval is zero".to_string(),
            ));
        }

        Ok(Config {
            mtu: self.mtu,
            max_queue_rx: self.max_queue_rx,
            max_queue_tx: self.max_queue_tx,
            max_reassembly_bytes: self.max_reassembly_bytes,
            flight_start_rto: self.flight_start_rto,
            flight_max_rto: self.flight_max_rto,
            flight_retries: self.flight_retries,
            handshake_timeout: self.handshake_timeout,
            require_cookie: self.require_cookie,
            cookie_rotation_interval: self.cookie_rotation_interval,
            cookie_retry_tolerance: self.cookie_retry_tolerance,
            idle_timeout: self.idle_timeout,
            close_linger: self.close_linger,
            max_half_open: self.max_half_open,
            max_connections: self.max_connections,
            psk: self.psk.map(|p| Arc::new(Zeroizing::new(p))),
            stats_sink: self.stats_sink.unwrap_or_else(|| Arc::new(NoopStats)),
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Config::builder()
            .build()
            .expect("Default config should always validate")
    }
}
