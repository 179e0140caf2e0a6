use std::time::Duration;

/// Connection settings for [`HassClient`](crate::HassClient)
///
/// The defaults target a local Home Assistant instance on port 8123 without
/// TLS, with a 30 seconds per-command deadline and an application level ping
/// every 55 seconds. Reconnection is opt-in through [`ClientConfig::with_reconnect`].
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub host: String,
    pub port: u16,
    pub ssl: bool,
    pub token: String,
    /// default deadline applied by `call` and the typed commands
    pub call_timeout: Duration,
    /// deadline for each frame of the authentication handshake
    pub auth_timeout: Duration,
    /// interval between keepalive pings, None disables the keepalive task
    pub keepalive_interval: Option<Duration>,
    /// how long to wait for the pong before declaring the connection dead
    pub keepalive_timeout: Duration,
    /// when set, lost connections are re-established with backoff
    pub reconnect: Option<ReconnectOptions>,
}

impl ClientConfig {
    pub fn new(host: impl Into<String>, port: u16, token: impl Into<String>) -> Self {
        ClientConfig {
            host: host.into(),
            port,
            ssl: false,
            token: token.into(),
            call_timeout: Duration::from_secs(30),
            auth_timeout: Duration::from_secs(10),
            keepalive_interval: Some(Duration::from_secs(55)),
            keepalive_timeout: Duration::from_secs(10),
            reconnect: None,
        }
    }

    pub fn with_ssl(mut self) -> Self {
        self.ssl = true;
        self
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    pub fn with_keepalive(mut self, interval: Option<Duration>) -> Self {
        self.keepalive_interval = interval;
        self
    }

    pub fn with_reconnect(mut self, options: ReconnectOptions) -> Self {
        self.reconnect = Some(options);
        self
    }

    pub(crate) fn websocket_url(&self) -> String {
        let protocol = if self.ssl { "wss" } else { "ws" };
        format!("{}://{}:{}/api/websocket", protocol, self.host, self.port)
    }
}

/// Backoff policy for automatic reconnection
///
/// The delay starts at `initial_delay`, doubles on every failed attempt up to
/// `max_delay`, and a uniform random amount up to `jitter` is added so that
/// many clients do not hammer the gateway at the same instant.
#[derive(Debug, Clone)]
pub struct ReconnectOptions {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub jitter: Duration,
}

impl Default for ReconnectOptions {
    fn default() -> Self {
        ReconnectOptions {
            initial_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(60),
            jitter: Duration::from_secs(1),
        }
    }
}
