//! Configuration types for directory searches.

use ldap3::Scope;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Deserializer};
use std::time::Duration;
use validator::Validate;

/// Default LDAP port used when none is configured.
pub const DEFAULT_PORT: u16 = 389;
/// Default maximum number of entries returned by one search.
pub const DEFAULT_SIZE_LIMIT: u16 = 50;
/// Default server-side search time limit (seconds).
pub const DEFAULT_TIME_LIMIT_SECS: u16 = 10;
/// Default transport connection timeout (seconds).
pub const DEFAULT_CONNECTION_TIMEOUT_SECS: u64 = 10;

/// Represents the search scope for LDAP queries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SearchScope {
    /// Base object only.
    Base,
    /// One level below the base.
    OneLevel,
    /// Entire subtree.
    #[default]
    Subtree,
}

impl SearchScope {
    /// Maps the numeric LDAP scope (`0`, `1`, `2`), falling back to subtree for anything else.
    #[must_use]
    pub const fn from_raw(value: i32) -> Self {
        match value {
            0 => Self::Base,
            1 => Self::OneLevel,
            _ => Self::Subtree,
        }
    }

    /// Numeric LDAP scope value.
    #[must_use]
    pub const fn as_raw(self) -> u32 {
        match self {
            Self::Base => 0,
            Self::OneLevel => 1,
            Self::Subtree => 2,
        }
    }
}

impl From<i32> for SearchScope {
    fn from(value: i32) -> Self {
        Self::from_raw(value)
    }
}

impl From<SearchScope> for Scope {
    fn from(scope: SearchScope) -> Self {
        match scope {
            SearchScope::Base => Scope::Base,
            SearchScope::OneLevel => Scope::OneLevel,
            SearchScope::Subtree => Scope::Subtree,
        }
    }
}

/// Configuration for opening a [`Directory`](crate::Directory).
///
/// Zero values for port, size limit and time limit mean "use the default"; defaults are
/// applied once by [`Directory::open`](crate::Directory::open) and the configuration is
/// read-only afterwards.
#[derive(Debug, Deserialize, Validate)]
pub struct DirectoryConfig {
    /// Directory server host; absent selects the native backend where available.
    #[validate(length(min = 1, max = 253))]
    #[serde(default, deserialize_with = "empty_as_none")]
    host: Option<String>,

    #[serde(default)]
    port: u16,

    #[serde(default, deserialize_with = "empty_as_none")]
    bind_dn: Option<String>,

    #[serde(default)]
    bind_password: Option<SecretString>,

    #[serde(default)]
    scope: SearchScope,

    #[serde(default)]
    size_limit: u16,

    #[serde(default)]
    time_limit: u16,

    #[serde(default)]
    only_current_domain: bool,

    #[serde(default)]
    use_tls: bool,

    #[serde(default = "default_tls_verify")]
    tls_verify: bool,

    #[validate(range(min = 1, max = 300))]
    #[serde(default = "default_connection_timeout_secs")]
    connection_timeout_secs: u64,
}

/// An empty string means the value was left unset.
fn empty_as_none<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<String>::deserialize(deserializer)?;
    Ok(value.filter(|value| !value.is_empty()))
}

const fn default_tls_verify() -> bool {
    true
}

const fn default_connection_timeout_secs() -> u64 {
    DEFAULT_CONNECTION_TIMEOUT_SECS
}

impl DirectoryConfig {
    /// Creates an empty configuration (no host, no credentials, all limits defaulted).
    #[must_use]
    pub fn new() -> Self {
        Self {
            host: None,
            port: 0,
            bind_dn: None,
            bind_password: None,
            scope: SearchScope::default(),
            size_limit: 0,
            time_limit: 0,
            only_current_domain: false,
            use_tls: false,
            tls_verify: default_tls_verify(),
            connection_timeout_secs: default_connection_timeout_secs(),
        }
    }

    /// Returns the configured host, if any.
    #[must_use]
    pub fn host(&self) -> Option<&str> {
        self.host.as_deref()
    }

    /// Returns the port (zero until defaults are applied).
    #[must_use]
    pub const fn port(&self) -> u16 {
        self.port
    }

    /// Returns the bind identity.
    #[must_use]
    pub fn bind_dn(&self) -> Option<&str> {
        self.bind_dn.as_deref()
    }

    /// Returns the bind credential.
    #[must_use]
    pub fn bind_password(&self) -> Option<&str> {
        self.bind_password
            .as_ref()
            .map(|password| password.expose_secret())
    }

    /// Returns the search scope.
    #[must_use]
    pub const fn scope(&self) -> SearchScope {
        self.scope
    }

    /// Returns the result size limit.
    #[must_use]
    pub const fn size_limit(&self) -> u16 {
        self.size_limit
    }

    /// Returns the server-side time limit in seconds.
    #[must_use]
    pub const fn time_limit(&self) -> u16 {
        self.time_limit
    }

    /// Returns whether searches must stay within the bound domain.
    #[must_use]
    pub const fn only_current_domain(&self) -> bool {
        self.only_current_domain
    }

    /// Returns whether the transport uses `ldaps://`.
    #[must_use]
    pub const fn use_tls(&self) -> bool {
        self.use_tls
    }

    /// Returns whether TLS certificate verification is enabled.
    #[must_use]
    pub const fn tls_verify(&self) -> bool {
        self.tls_verify
    }

    /// Returns the connection timeout duration.
    #[must_use]
    pub fn connection_timeout(&self) -> Duration {
        Duration::from_secs(self.connection_timeout_secs)
    }

    /// Sets the directory server host. An empty host clears it.
    #[must_use]
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        let host = host.into();
        self.host = (!host.is_empty()).then_some(host);
        self
    }

    /// Sets the server port.
    #[must_use]
    pub const fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Sets the bind identity and credential.
    #[must_use]
    pub fn with_credentials(
        mut self,
        bind_dn: impl Into<String>,
        bind_password: impl Into<String>,
    ) -> Self {
        self.bind_dn = Some(bind_dn.into());
        self.bind_password = Some(SecretString::from(bind_password.into()));
        self
    }

    /// Sets the search scope.
    #[must_use]
    pub const fn with_scope(mut self, scope: SearchScope) -> Self {
        self.scope = scope;
        self
    }

    /// Sets the result size limit.
    #[must_use]
    pub const fn with_size_limit(mut self, size_limit: u16) -> Self {
        self.size_limit = size_limit;
        self
    }

    /// Sets the server-side time limit in seconds.
    #[must_use]
    pub const fn with_time_limit(mut self, seconds: u16) -> Self {
        self.time_limit = seconds;
        self
    }

    /// Restricts searches to the bound domain (no referral chasing).
    #[must_use]
    pub const fn with_only_current_domain(mut self, only_current_domain: bool) -> Self {
        self.only_current_domain = only_current_domain;
        self
    }

    /// Switches the transport to `ldaps://`.
    #[must_use]
    pub const fn with_tls(mut self, use_tls: bool) -> Self {
        self.use_tls = use_tls;
        self
    }

    /// Enables or disables TLS certificate verification.
    #[must_use]
    pub const fn with_tls_verification(mut self, verify: bool) -> Self {
        self.tls_verify = verify;
        self
    }

    /// Overrides the connection timeout in seconds.
    #[must_use]
    pub const fn with_connection_timeout_secs(mut self, seconds: u64) -> Self {
        self.connection_timeout_secs = seconds;
        self
    }

    pub(crate) fn with_defaults(mut self) -> Self {
        if self.port == 0 {
            self.port = DEFAULT_PORT;
        }
        if self.size_limit == 0 {
            self.size_limit = DEFAULT_SIZE_LIMIT;
        }
        if self.time_limit == 0 {
            self.time_limit = DEFAULT_TIME_LIMIT_SECS;
        }
        self
    }

    /// Host, bind identity and bind credential are all present and non-empty.
    pub(crate) fn has_explicit_credentials(&self) -> bool {
        let filled = |value: Option<&str>| value.is_some_and(|value| !value.is_empty());
        filled(self.host()) && filled(self.bind_dn()) && filled(self.bind_password())
    }
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self::new()
    }
}
