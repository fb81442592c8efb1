//! Client configuration.
//!
//! Provides a fluent API for configuring and creating [`Client`] instances.
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//!
//! use rainbow_bridge::Client;
//!
//! # fn example() -> rainbow_bridge::Result<()> {
//! let client = Client::builder()
//!     .url("wss://bridge.example.com/ws")
//!     .max_reconnect_attempts(10)
//!     .request_timeout(Some(Duration::from_secs(60)))
//!     .build()?;
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::env;
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;
use url::Url;

use crate::client::Client;
use crate::error::{Error, Result};
use crate::protocol::{ChatCodec, Codec};
use crate::transport::reconnect::{DEFAULT_DELAY, DEFAULT_MAX_ATTEMPTS};

// ============================================================================
// Constants
// ============================================================================

/// Environment variable holding the endpoint URL.
pub const ENDPOINT_ENV: &str = "RAINBOW_BRIDGE_WS_URL";

/// Endpoint used when none is configured.
pub const DEFAULT_ENDPOINT: &str = "ws://localhost:8001/ws";

/// Default limit for waiting on a reply.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Default limit for the opening handshake.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default number of buffered unsolicited messages per subscriber.
pub const DEFAULT_NOTIFICATION_CAPACITY: usize = 64;

// ============================================================================
// ClientConfig
// ============================================================================

/// Validated client settings.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Endpoint URL (`ws` or `wss`).
    pub url: Url,
    /// Consecutive reconnects after an unclean close.
    pub max_reconnect_attempts: u32,
    /// Delay before each reconnect.
    pub reconnect_delay: Duration,
    /// Reply limit, `None` waits forever.
    pub request_timeout: Option<Duration>,
    /// Opening handshake limit.
    pub connect_timeout: Duration,
    /// Buffer size of the notification channel.
    pub notification_capacity: usize,
}

// ============================================================================
// ClientBuilder
// ============================================================================

/// Builder for configuring a [`Client`] instance.
///
/// Use [`Client::builder()`] to create a new builder.
#[derive(Debug, Clone)]
pub struct ClientBuilder {
    url: String,
    max_reconnect_attempts: u32,
    reconnect_delay: Duration,
    request_timeout: Option<Duration>,
    connect_timeout: Duration,
    notification_capacity: usize,
    codec: Arc<dyn Codec>,
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self {
            url: DEFAULT_ENDPOINT.to_string(),
            max_reconnect_attempts: DEFAULT_MAX_ATTEMPTS,
            reconnect_delay: DEFAULT_DELAY,
            request_timeout: Some(DEFAULT_REQUEST_TIMEOUT),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            notification_capacity: DEFAULT_NOTIFICATION_CAPACITY,
            codec: Arc::new(ChatCodec),
        }
    }
}

impl ClientBuilder {
    /// Creates a builder with default settings and the default endpoint.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a builder whose endpoint comes from `RAINBOW_BRIDGE_WS_URL`.
    ///
    /// Falls back to [`DEFAULT_ENDPOINT`] when the variable is unset or empty.
    #[must_use]
    pub fn from_env() -> Self {
        Self::with_endpoint_override(env::var(ENDPOINT_ENV).ok())
    }

    fn with_endpoint_override(value: Option<String>) -> Self {
        let builder = Self::default();
        match value {
            Some(url) if !url.trim().is_empty() => {
                debug!(%url, "Endpoint taken from environment");
                builder.url(url.trim())
            }
            _ => builder,
        }
    }

    /// Sets the endpoint URL.
    ///
    /// # Arguments
    ///
    /// * `url` - WebSocket URL (e.g., "ws://localhost:8001/ws")
    #[inline]
    #[must_use]
    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    /// Sets the number of consecutive reconnects after an unclean close.
    ///
    /// `0` disables automatic reconnects.
    #[inline]
    #[must_use]
    pub fn max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.max_reconnect_attempts = attempts;
        self
    }

    /// Sets the fixed delay before each reconnect.
    #[inline]
    #[must_use]
    pub fn reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    /// Sets the reply limit. `None` waits until the connection goes away.
    #[inline]
    #[must_use]
    pub fn request_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Sets the opening handshake limit.
    #[inline]
    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Sets how many unsolicited messages a slow subscriber may lag behind.
    #[inline]
    #[must_use]
    pub fn notification_capacity(mut self, capacity: usize) -> Self {
        self.notification_capacity = capacity;
        self
    }

    /// Sets the wire codec. Defaults to [`ChatCodec`].
    #[must_use]
    pub fn codec(mut self, codec: impl Codec) -> Self {
        self.codec = Arc::new(codec);
        self
    }

    /// Sets a wire codec the caller keeps a handle to.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use std::sync::Arc;
    ///
    /// use rainbow_bridge::{AskCodec, Client, SessionContext};
    ///
    /// # fn example() -> rainbow_bridge::Result<()> {
    /// let codec = Arc::new(AskCodec::new(SessionContext::new("user-1", "conv-1")));
    /// let client = Client::builder().shared_codec(codec.clone()).build()?;
    ///
    /// codec.set_contextual_data("age", serde_json::json!(42));
    /// # Ok(())
    /// # }
    /// ```
    #[must_use]
    pub fn shared_codec<C: Codec>(mut self, codec: Arc<C>) -> Self {
        self.codec = codec;
        self
    }

    /// Validates the settings.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] if the URL is not `ws`/`wss`, or a timeout or
    ///   capacity is zero
    /// - [`Error::Url`] if the URL does not parse
    pub fn config(&self) -> Result<ClientConfig> {
        Ok(ClientConfig {
            url: self.validate_url()?,
            max_reconnect_attempts: self.max_reconnect_attempts,
            reconnect_delay: self.reconnect_delay,
            request_timeout: self.validate_request_timeout()?,
            connect_timeout: self.validate_connect_timeout()?,
            notification_capacity: self.validate_notification_capacity()?,
        })
    }

    /// Builds the client with validation.
    ///
    /// The client starts disconnected; call [`Client::connect`] to open it.
    ///
    /// # Errors
    ///
    /// See [`ClientBuilder::config`].
    pub fn build(self) -> Result<Client> {
        let config = self.config()?;
        Ok(Client::new(config, self.codec))
    }
}

// ============================================================================
// Validation
// ============================================================================

impl ClientBuilder {
    fn validate_url(&self) -> Result<Url> {
        let url = Url::parse(&self.url)?;

        match url.scheme() {
            "ws" | "wss" => Ok(url),
            scheme => Err(Error::config(format!(
                "Unsupported URL scheme '{scheme}' in {}\n\
                 Use a ws:// or wss:// endpoint, e.g. \"{DEFAULT_ENDPOINT}\"",
                self.url
            ))),
        }
    }

    fn validate_request_timeout(&self) -> Result<Option<Duration>> {
        match self.request_timeout {
            Some(timeout) if timeout.is_zero() => Err(Error::config(
                "Request timeout must be greater than zero.\n\
                 Use .request_timeout(None) to wait without a limit.",
            )),
            other => Ok(other),
        }
    }

    fn validate_connect_timeout(&self) -> Result<Duration> {
        if self.connect_timeout.is_zero() {
            return Err(Error::config("Connect timeout must be greater than zero."));
        }
        Ok(self.connect_timeout)
    }

    fn validate_notification_capacity(&self) -> Result<usize> {
        if self.notification_capacity == 0 {
            return Err(Error::config(
                "Notification capacity must be greater than zero.",
            ));
        }
        Ok(self.notification_capacity)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use parking_lot::{Mutex, MutexGuard};

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    /// Sets or clears the endpoint variable and restores it on drop.
    struct EndpointEnvGuard {
        previous: Option<String>,
        _lock: MutexGuard<'static, ()>,
    }

    impl EndpointEnvGuard {
        fn new(value: Option<&str>) -> Self {
            let lock = ENV_LOCK.lock();
            let previous = env::var(ENDPOINT_ENV).ok();
            // SAFETY: ENV_LOCK serialises every test that touches this variable.
            unsafe {
                match value {
                    Some(value) => env::set_var(ENDPOINT_ENV, value),
                    None => env::remove_var(ENDPOINT_ENV),
                }
            }
            Self {
                previous,
                _lock: lock,
            }
        }
    }

    impl Drop for EndpointEnvGuard {
        fn drop(&mut self) {
            // SAFETY: the lock is still held.
            unsafe {
                match &self.previous {
                    Some(value) => env::set_var(ENDPOINT_ENV, value),
                    None => env::remove_var(ENDPOINT_ENV),
                }
            }
        }
    }

    fn env_url() -> String {
        ClientBuilder::from_env()
            .config()
            .expect("valid")
            .url
            .to_string()
    }

    #[test]
    fn test_from_env_uses_variable() {
        let _env = EndpointEnvGuard::new(Some("  wss://bridge.example.com/ws  "));
        assert_eq!(env_url(), "wss://bridge.example.com/ws");
    }

    #[test]
    fn test_from_env_unset_uses_default() {
        let _env = EndpointEnvGuard::new(None);
        assert_eq!(env_url(), DEFAULT_ENDPOINT);
    }

    #[test]
    fn test_from_env_empty_uses_default() {
        {
            let _env = EndpointEnvGuard::new(Some(""));
            assert_eq!(env_url(), DEFAULT_ENDPOINT);
        }
        let _env = EndpointEnvGuard::new(Some("   "));
        assert_eq!(env_url(), DEFAULT_ENDPOINT);
    }

    #[test]
    fn test_endpoint_override() {
        let custom = ClientBuilder::with_endpoint_override(Some("ws://10.0.0.2:9000/ws".into()));
        assert_eq!(custom.url, "ws://10.0.0.2:9000/ws");
        assert_eq!(ClientBuilder::with_endpoint_override(None).url, DEFAULT_ENDPOINT);
    }

    #[test]
    fn test_defaults() {
        let config = ClientBuilder::new().config().expect("valid");
        assert_eq!(config.url.as_str(), DEFAULT_ENDPOINT);
        assert_eq!(config.max_reconnect_attempts, 5);
        assert_eq!(config.reconnect_delay, Duration::from_millis(3000));
        assert_eq!(config.request_timeout, Some(DEFAULT_REQUEST_TIMEOUT));
        assert_eq!(config.connect_timeout, DEFAULT_CONNECT_TIMEOUT);
    }

    #[test]
    fn test_setters() {
        let config = ClientBuilder::new()
            .url("wss://bridge.example.com/ws")
            .max_reconnect_attempts(2)
            .reconnect_delay(Duration::from_millis(50))
            .request_timeout(None)
            .connect_timeout(Duration::from_secs(1))
            .notification_capacity(4)
            .config()
            .expect("valid");

        assert_eq!(config.url.scheme(), "wss");
        assert_eq!(config.max_reconnect_attempts, 2);
        assert_eq!(config.reconnect_delay, Duration::from_millis(50));
        assert_eq!(config.request_timeout, None);
        assert_eq!(config.connect_timeout, Duration::from_secs(1));
        assert_eq!(config.notification_capacity, 4);
    }

    #[test]
    fn test_rejects_http_scheme() {
        let err = ClientBuilder::new()
            .url("http://localhost:8001/ws")
            .config()
            .unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
        assert!(err.to_string().contains("'http'"));
    }

    #[test]
    fn test_rejects_unparseable_url() {
        let err = ClientBuilder::new().url("not a url").config().unwrap_err();
        assert!(matches!(err, Error::Url(_)));
    }

    #[test]
    fn test_rejects_zero_values() {
        assert!(
            ClientBuilder::new()
                .request_timeout(Some(Duration::ZERO))
                .config()
                .is_err()
        );
        assert!(
            ClientBuilder::new()
                .connect_timeout(Duration::ZERO)
                .config()
                .is_err()
        );
        assert!(
            ClientBuilder::new()
                .notification_capacity(0)
                .config()
                .is_err()
        );
    }

    #[test]
    fn test_zero_reconnect_attempts_is_valid() {
        let config = ClientBuilder::new()
            .max_reconnect_attempts(0)
            .config()
            .expect("valid");
        assert_eq!(config.max_reconnect_attempts, 0);
    }
}
