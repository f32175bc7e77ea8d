//! Backend selection and the search entry point.

use crate::{
    config::DirectoryConfig, connection::ConnectionBackend, record::DirectoryRecord, Result,
};
use async_trait::async_trait;
use dirsearch_core::Error;
use std::sync::Arc;
use tracing::debug;
use validator::Validate;

#[cfg(windows)]
use crate::native::NativeBackend;

/// Search over a directory, materializing entries into caller records.
#[async_trait]
pub trait DirectorySearch {
    /// Searches below the base derived from `domain` and appends one `T` per entry to `out`.
    ///
    /// `filter` is passed to the server unchanged; use [`escape_filter`](crate::escape_filter)
    /// for untrusted fragments. Records already in `out` are kept.
    ///
    /// # Errors
    ///
    /// [`Error::SizeLimitExceeded`] is returned after the entries received so far have been
    /// appended. Any other error aborts the search.
    async fn search<T>(&self, domain: &str, out: &mut Vec<T>, filter: &str) -> Result<()>
    where
        T: DirectoryRecord;
}

/// Which backend a [`Directory`] uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    /// Explicit bind over an LDAP protocol connection.
    Connection,
    /// Native directory API with the current process identity.
    Native,
}

/// Picks a backend: explicit credentials win, otherwise a missing host selects the native
/// backend where the platform provides one.
pub(crate) fn select_backend(config: &DirectoryConfig, native_supported: bool) -> Result<BackendKind> {
    if config.has_explicit_credentials() {
        Ok(BackendKind::Connection)
    } else if native_supported && config.host().is_none() {
        Ok(BackendKind::Native)
    } else {
        Err(Error::Unsupported)
    }
}

/// An opened directory, bound to one backend for its whole lifetime.
pub enum Directory {
    /// LDAP connection backend.
    Connection(ConnectionBackend),
    /// Native directory backend.
    #[cfg(windows)]
    Native(NativeBackend),
}

impl Directory {
    /// Validates `config`, applies defaults and selects the backend.
    ///
    /// No network activity happens here; every search opens and releases its own session.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ValidationError`] for invalid configuration values and
    /// [`Error::Unsupported`] when no backend can serve the configuration on this platform.
    pub fn open(config: DirectoryConfig) -> Result<Self> {
        config.validate()?;
        let config = Arc::new(config.with_defaults());
        let kind = select_backend(&config, cfg!(windows))?;
        debug!(?kind, host = config.host().unwrap_or_default(), "opened directory");

        match kind {
            BackendKind::Connection => Ok(Self::Connection(ConnectionBackend::new(config))),
            #[cfg(windows)]
            BackendKind::Native => Ok(Self::Native(NativeBackend::new(config))),
            #[cfg(not(windows))]
            BackendKind::Native => Err(Error::Unsupported),
        }
    }

    /// Returns the selected backend.
    #[must_use]
    pub fn kind(&self) -> BackendKind {
        match self {
            Self::Connection(_) => BackendKind::Connection,
            #[cfg(windows)]
            Self::Native(_) => BackendKind::Native,
        }
    }
}

#[async_trait]
impl DirectorySearch for Directory {
    async fn search<T>(&self, domain: &str, out: &mut Vec<T>, filter: &str) -> Result<()>
    where
        T: DirectoryRecord,
    {
        match self {
            Self::Connection(backend) => backend.search(domain, out, filter).await,
            #[cfg(windows)]
            Self::Native(backend) => backend.search(domain, out, filter).await,
        }
    }
}
