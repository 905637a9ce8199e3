use std::path::PathBuf;
use std::time::Duration;

/// Transport settings for [`crate::Client`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub dial_timeout: Duration,
    pub tls_handshake_timeout: Duration,
    /// Limit on waiting for response headers once the request is sent.
    pub response_header_timeout: Duration,
    /// Pooled connections idle for longer than this are closed on checkout.
    pub idle_timeout: Duration,
    pub max_idle_per_host: usize,
    /// Accept any server certificate.
    pub insecure: bool,
    /// PEM bundle used instead of the bundled web PKI roots.
    pub ca_file: Option<PathBuf>,
    pub user_agent: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            dial_timeout: Duration::from_secs(30),
            tls_handshake_timeout: Duration::from_secs(10),
            response_header_timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(90),
            max_idle_per_host: 100,
            insecure: false,
            ca_file: None,
            user_agent: concat!("httpmetrics/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl ClientConfig {
    /// Defaults overridden by `HTTPMETRICS_*` environment variables.
    ///
    /// Durations accept `5s`, `3000ms` or bare seconds. Values that do not
    /// parse keep the default.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            dial_timeout: parse_duration_env("HTTPMETRICS_DIAL_TIMEOUT", defaults.dial_timeout),
            tls_handshake_timeout: parse_duration_env(
                "HTTPMETRICS_TLS_TIMEOUT",
                defaults.tls_handshake_timeout,
            ),
            response_header_timeout: parse_duration_env(
                "HTTPMETRICS_RESPONSE_TIMEOUT",
                defaults.response_header_timeout,
            ),
            idle_timeout: parse_duration_env("HTTPMETRICS_IDLE_TIMEOUT", defaults.idle_timeout),
            max_idle_per_host: parse_usize_env("HTTPMETRICS_MAX_IDLE", defaults.max_idle_per_host),
            insecure: parse_bool_env("HTTPMETRICS_INSECURE", defaults.insecure),
            ca_file: std::env::var_os("HTTPMETRICS_CA_FILE")
                .filter(|v| !v.is_empty())
                .map(PathBuf::from),
            user_agent: defaults.user_agent,
        }
    }

    pub fn with_dial_timeout(mut self, timeout: Duration) -> Self {
        self.dial_timeout = timeout;
        self
    }

    pub fn with_tls_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.tls_handshake_timeout = timeout;
        self
    }

    pub fn with_response_header_timeout(mut self, timeout: Duration) -> Self {
        self.response_header_timeout = timeout;
        self
    }

    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    pub fn with_max_idle_per_host(mut self, max: usize) -> Self {
        self.max_idle_per_host = max;
        self
    }

    pub fn with_insecure(mut self, insecure: bool) -> Self {
        self.insecure = insecure;
        self
    }

    pub fn with_ca_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.ca_file = Some(path.into());
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }
}

fn parse_duration(v: &str) -> Option<Duration> {
    let v = v.trim();
    if let Some(s) = v.strip_suffix("ms") {
        s.trim().parse::<u64>().ok().map(Duration::from_millis)
    } else if let Some(s) = v.strip_suffix('s') {
        s.trim().parse::<u64>().ok().map(Duration::from_secs)
    } else {
        v.parse::<u64>().ok().map(Duration::from_secs)
    }
}

fn parse_duration_env(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|v| parse_duration(&v))
        .unwrap_or(default)
}

fn parse_usize_env(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn parse_bool(v: &str) -> Option<bool> {
    match v.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn parse_bool_env(key: &str, default: bool) -> bool {
    std::env::var(key)
        .ok()
        .and_then(|v| parse_bool(&v))
        .unwrap_or(default)
}
