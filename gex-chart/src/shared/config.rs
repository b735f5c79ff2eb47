/// Engine and connection configuration
///
/// Defaults suit a local feed bridge; every field can be overridden with the
/// `with_*` builders or from `GEX_CHART_*` environment variables.
use std::time::Duration;

/// Capped exponential retry policy for the push transport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Delay before the first retry
    pub base_delay: Duration,
    /// Ceiling for retry delays, also the cadence of background push probes
    pub max_delay: Duration,
    /// Failed attempts tolerated in `Reconnecting` before falling back
    pub retry_budget: u32,
    /// Consecutive poll failures tolerated in `Polling` before `Disconnected`
    pub failure_threshold: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            retry_budget: 3,
            failure_threshold: 3,
        }
    }
}

impl RetryPolicy {
    /// `base × 2^attempt`, capped at `max_delay`
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

/// Chart engine configuration
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Instrument symbol
    pub symbol: String,
    /// Duration of one bar
    pub bar_interval: Duration,
    /// Maximum number of completed bars retained
    pub history_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            symbol: "SPY".to_string(),
            bar_interval: Duration::from_secs(60),
            history_capacity: 2000,
        }
    }
}

impl EngineConfig {
    /// Create a new configuration for a symbol
    pub fn new(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            ..Default::default()
        }
    }

    /// Read `GEX_CHART_SYMBOL` and `GEX_CHART_INTERVAL_SECS`, falling back to defaults
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(symbol) = std::env::var("GEX_CHART_SYMBOL") {
            config.symbol = symbol.to_uppercase();
        }
        if let Some(secs) = env_parse::<u64>("GEX_CHART_INTERVAL_SECS").filter(|s| *s > 0) {
            config.bar_interval = Duration::from_secs(secs);
        }
        config
    }

    /// Set bar interval
    pub fn with_bar_interval(mut self, interval: Duration) -> Self {
        self.bar_interval = interval;
        self
    }

    /// Set completed-bar retention
    pub fn with_history_capacity(mut self, capacity: usize) -> Self {
        self.history_capacity = capacity.max(1);
        self
    }
}

/// Transport configuration for the connection manager
///
/// URLs may contain a `{symbol}` placeholder.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionConfig {
    /// Live push WebSocket URL
    pub ws_url: String,
    /// Polling fallback endpoint; without it, exhausted retries go straight to `Disconnected`
    pub poll_url: Option<String>,
    /// Historical bars endpoint
    pub history_url: String,
    /// Ping interval to keep the push connection alive
    pub ping_interval: Duration,
    /// Per-attempt push handshake timeout
    pub connect_timeout: Duration,
    /// Push stream idle timeout
    pub read_timeout: Duration,
    /// Fixed polling cadence while `Polling`
    pub poll_interval: Duration,
    /// Per-request poll timeout
    pub poll_timeout: Duration,
    /// Historical fetch timeout
    pub request_timeout: Duration,
    /// Retry and degradation policy
    pub retry: RetryPolicy,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            ws_url: "ws://127.0.0.1:9001".to_string(),
            poll_url: Some("http://127.0.0.1:9002/snapshot/{symbol}".to_string()),
            history_url: "http://127.0.0.1:9002/bars/{symbol}".to_string(),
            ping_interval: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            read_timeout: Duration::from_secs(120),
            poll_interval: Duration::from_secs(5),
            poll_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(10),
            retry: RetryPolicy::default(),
        }
    }
}

impl ConnectionConfig {
    /// Create a new configuration with custom push URL
    pub fn new(ws_url: impl Into<String>) -> Self {
        Self {
            ws_url: ws_url.into(),
            ..Default::default()
        }
    }

    /// Read `GEX_CHART_WS_URL`, `GEX_CHART_POLL_URL`, `GEX_CHART_HISTORY_URL` and
    /// `GEX_CHART_POLL_SECS`, falling back to defaults. An empty poll URL disables polling.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(url) = std::env::var("GEX_CHART_WS_URL") {
            config.ws_url = url;
        }
        if let Ok(url) = std::env::var("GEX_CHART_POLL_URL") {
            config.poll_url = Some(url).filter(|u| !u.trim().is_empty());
        }
        if let Ok(url) = std::env::var("GEX_CHART_HISTORY_URL") {
            config.history_url = url;
        }
        if let Some(secs) = env_parse::<u64>("GEX_CHART_POLL_SECS").filter(|s| *s > 0) {
            config.poll_interval = Duration::from_secs(secs);
        }
        config
    }

    /// Set polling endpoint
    pub fn with_poll_url(mut self, url: Option<String>) -> Self {
        self.poll_url = url;
        self
    }

    /// Set historical bars endpoint
    pub fn with_history_url(mut self, url: impl Into<String>) -> Self {
        self.history_url = url.into();
        self
    }

    /// Set ping interval
    pub fn with_ping_interval(mut self, interval: Duration) -> Self {
        self.ping_interval = interval;
        self
    }

    /// Set per-attempt connect timeout
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set push idle timeout
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Set polling cadence
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Set per-request poll timeout
    pub fn with_poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout = timeout;
        self
    }

    /// Set retry policy
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

/// Substitute the `{symbol}` placeholder in an endpoint template
pub fn endpoint_for(template: &str, symbol: &str) -> String {
    template.replace("{symbol}", symbol)
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}
