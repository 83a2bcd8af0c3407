//! Configuration for an authority.

use std::time::Duration;

use crate::authority::retry::RetryPolicy;
use crate::error::{Error, Result};
use crate::message::Node;

/// Default watch expiry, matching the discovery protocol's conventional
/// 15 second resource timeout.
pub const DEFAULT_WATCH_EXPIRY: Duration = Duration::from_secs(15);

/// Configuration for one authority, covering one discovery session with one
/// management server.
#[derive(Debug, Clone)]
pub struct AuthorityConfig {
    /// Node identification sent to the management server.
    pub node: Node,

    /// How long a requested resource may go unanswered before its watchers
    /// are told the watch expired.
    pub watch_expiry: Duration,

    /// Backoff behavior when reconnecting to the management server.
    pub retry_policy: RetryPolicy,
}

impl AuthorityConfig {
    /// Create a configuration with the given node identification, the
    /// default watch expiry, and the default retry policy.
    ///
    /// # Example
    ///
    /// ```
    /// use xds_authority::{AuthorityConfig, Node};
    ///
    /// let node = Node::new("grpc", "1.0")
    ///     .with_id("my-node")
    ///     .with_cluster("my-cluster");
    ///
    /// let config = AuthorityConfig::new(node);
    /// ```
    pub fn new(node: Node) -> Self {
        Self {
            node,
            watch_expiry: DEFAULT_WATCH_EXPIRY,
            retry_policy: RetryPolicy::default(),
        }
    }

    /// Set the watch expiry duration.
    pub fn with_watch_expiry(mut self, watch_expiry: Duration) -> Self {
        self.watch_expiry = watch_expiry;
        self
    }

    /// Set the retry policy.
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.watch_expiry.is_zero() {
            return Err(Error::Config("watch_expiry must be greater than zero".into()));
        }
        if self.node.user_agent_name.is_empty() {
            return Err(Error::Config("node user_agent_name must not be empty".into()));
        }
        Ok(())
    }
}

/// Address of one management server, consumed by transport constructors.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    uri: String,
}

impl ServerConfig {
    /// Create a server config for the given URI.
    pub fn new(uri: impl Into<String>) -> Self {
        Self { uri: uri.into() }
    }

    /// The server URI.
    pub fn uri(&self) -> &str {
        &self.uri
    }
}
