//! Typed directory searches against Active Directory style services.
//!
//! A caller declares a record type with [`directory_record!`], opens a [`Directory`] from a
//! [`DirectoryConfig`], and receives one record per matching entry. Searches run either over
//! an explicitly bound LDAP connection or, on Windows, through the native directory API
//! using the identity of the current process.

#![deny(missing_docs)]

mod config;
mod connection;
mod directory;
mod dn;
#[cfg(any(windows, test))]
mod native;
mod record;

pub use config::{
    DirectoryConfig, SearchScope, DEFAULT_CONNECTION_TIMEOUT_SECS, DEFAULT_PORT,
    DEFAULT_SIZE_LIMIT, DEFAULT_TIME_LIMIT_SECS,
};
pub use connection::{escape_filter, ConnectionBackend, DN_ATTRIBUTE};
pub use directory::{BackendKind, Directory, DirectorySearch};
pub use dirsearch_core::{Error, Sid};
pub use dn::{DistinguishedName, RelativeDistinguishedName};
#[cfg(windows)]
pub use native::{NativeBackend, NATIVE_ATTRIBUTES};
pub use record::{AttributeMap, AttributeMapBuilder, AttributeValue, DirectoryRecord, SearchResults};

/// Convenient result alias that reuses the core error type.
pub type Result<T> = dirsearch_core::Result<T>;
