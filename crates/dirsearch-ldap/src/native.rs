//! Native backend: searches through the Windows LDAP API with the process identity.
//!
//! Every handle obtained from the API is owned by a guard that releases it on drop, so the
//! session, the result message, attribute iterators, attribute names and value arrays are
//! freed exactly once on every exit path, innermost first.

use crate::{
    config::DirectoryConfig,
    directory::DirectorySearch,
    dn::DistinguishedName,
    record::{in_context, AttributeValue, DirectoryRecord, SearchResults},
    Result,
};
use async_trait::async_trait;
use dirsearch_core::Error;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[cfg(windows)]
mod wldap32;

/// Attributes requested by the native backend, independent of the record declaration.
pub const NATIVE_ATTRIBUTES: [&str; 7] = [
    "objectSid",
    "displayName",
    "objectCategory",
    "sAMAccountType",
    "name",
    "userPrincipalName",
    "mail",
];

const SID_ATTRIBUTE: &str = "objectSid";
const CURRENT_IDENTITY: &str = "<current process identity>";
const DEFAULT_HOST: &str = "<default>";

const LDAP_SUCCESS: u32 = 0x00;
const LDAP_SIZELIMIT_EXCEEDED: u32 = 0x04;

const OPT_SIZELIMIT: i32 = 0x03;
const OPT_TIMELIMIT: i32 = 0x04;
const OPT_PROTOCOL_VERSION: i32 = 0x11;
const LDAP_VERSION3: u32 = 3;

/// Address of a handle owned by the native library. Zero is null.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct Handle(usize);

impl Handle {
    pub(crate) const NULL: Self = Self(0);

    fn is_null(self) -> bool {
        self.0 == 0
    }
}

/// Calls into the platform LDAP library. Return codes are raw LDAP result codes.
#[cfg_attr(test, mockall::automock)]
pub(crate) trait LdapApi: Send + Sync {
    fn init(&self, host: &str, port: u16) -> Handle;
    fn last_error(&self) -> u32;
    fn set_option(&self, session: Handle, option: i32, value: u32) -> u32;
    fn disable_referrals(&self, session: Handle) -> u32;
    fn connect(&self, session: Handle) -> u32;
    fn bind_negotiate(&self, session: Handle) -> u32;
    #[allow(clippy::too_many_arguments)]
    fn search(
        &self,
        session: Handle,
        base_dn: &str,
        scope: u32,
        filter: &str,
        attributes: &[String],
        message: &mut Handle,
    ) -> u32;
    fn first_entry(&self, session: Handle, message: Handle) -> Handle;
    fn next_entry(&self, session: Handle, entry: Handle) -> Handle;
    fn first_attribute(&self, session: Handle, entry: Handle, ber: &mut Handle) -> Handle;
    fn next_attribute(&self, session: Handle, entry: Handle, ber: Handle) -> Handle;
    fn attribute_name(&self, name: Handle) -> String;
    fn text_values(&self, session: Handle, entry: Handle, name: Handle) -> Handle;
    fn first_text_value(&self, values: Handle) -> Option<String>;
    fn binary_values(&self, session: Handle, entry: Handle, name: Handle) -> Handle;
    fn first_binary_value(&self, values: Handle) -> Option<Vec<u8>>;
    fn free_attribute_name(&self, name: Handle);
    fn free_text_values(&self, values: Handle) -> u32;
    fn free_binary_values(&self, values: Handle) -> u32;
    fn free_ber(&self, ber: Handle);
    fn free_message(&self, message: Handle) -> u32;
    fn unbind(&self, session: Handle) -> u32;
}

/// Backend that binds with the current process identity through the platform directory API.
pub struct NativeBackend {
    config: Arc<DirectoryConfig>,
    api: Arc<dyn LdapApi>,
}

impl NativeBackend {
    #[cfg(windows)]
    pub(crate) fn new(config: Arc<DirectoryConfig>) -> Self {
        Self {
            config,
            api: Arc::new(wldap32::Wldap32),
        }
    }

    #[cfg(test)]
    pub(crate) fn with_api(config: DirectoryConfig, api: Arc<dyn LdapApi>) -> Self {
        Self {
            config: Arc::new(config.with_defaults()),
            api,
        }
    }

    /// Configuration the backend was opened with (defaults applied).
    #[must_use]
    pub fn config(&self) -> &DirectoryConfig {
        &self.config
    }
}

#[async_trait]
impl DirectorySearch for NativeBackend {
    async fn search<T>(&self, domain: &str, out: &mut Vec<T>, filter: &str) -> Result<()>
    where
        T: DirectoryRecord,
    {
        let config = Arc::clone(&self.config);
        let api = Arc::clone(&self.api);
        let base_dn = DistinguishedName::from_domain("DC", domain).to_string();
        let filter = filter.to_owned();
        debug!(base_dn = %base_dn, filter = %filter, "starting native directory search");

        let (records, outcome) = tokio::task::spawn_blocking(move || {
            let mut records = Vec::new();
            let outcome = search_blocking::<T>(&*api, &config, &base_dn, &filter, &mut records);
            (records, outcome)
        })
        .await
        .map_err(|err| Error::InternalError(format!("native search task failed: {err}")))?;

        let truncated = outcome?;
        let returned = records.len();
        out.extend(records);

        if truncated {
            info!(returned, "native directory search truncated by size limit");
            return Err(Error::SizeLimitExceeded);
        }
        Ok(())
    }
}

/// Runs one search on the calling thread. Returns whether the size limit truncated it.
pub(crate) fn search_blocking<T: DirectoryRecord>(
    api: &dyn LdapApi,
    config: &DirectoryConfig,
    base_dn: &str,
    filter: &str,
    records: &mut Vec<T>,
) -> Result<bool> {
    let mut results =
        SearchResults::new(records).map_err(|err| in_context("native search", err))?;

    let session = Session::open(api, config.host(), config.port())?;
    session.set_option(OPT_PROTOCOL_VERSION, LDAP_VERSION3)?;
    session.set_option(OPT_SIZELIMIT, u32::from(config.size_limit()))?;
    session.set_option(OPT_TIMELIMIT, u32::from(config.time_limit()))?;
    if config.only_current_domain() {
        session.disable_referrals()?;
    }
    session.connect()?;
    session.bind_current_identity()?;

    let attributes: Vec<String> = NATIVE_ATTRIBUTES.iter().map(ToString::to_string).collect();
    let (message, truncated) =
        session.search(base_dn, config.scope().as_raw(), filter, &attributes)?;

    for entry in message.entries() {
        let mut record = results.new_record();
        for attribute in entry.attributes() {
            let name = attribute.name();
            if name == SID_ATTRIBUTE {
                if let Some(bytes) = entry.first_binary_value(&attribute) {
                    results.set_field(&mut record, &name, AttributeValue::Binary(&bytes));
                }
            } else if let Some(text) = entry.first_text_value(&attribute) {
                results.set_field(&mut record, &name, AttributeValue::Text(&text));
            }
        }
        results.append(record);
    }

    Ok(truncated)
}

fn check(operation: &str, code: u32) -> Result<()> {
    if code == LDAP_SUCCESS {
        Ok(())
    } else {
        Err(native_error(operation, code))
    }
}

fn native_error(operation: &str, code: u32) -> Error {
    Error::Native {
        operation: operation.to_string(),
        code,
    }
}

/// Owned session; unbinding frees it.
struct Session<'a> {
    api: &'a dyn LdapApi,
    handle: Handle,
    address: String,
}

impl<'a> Session<'a> {
    fn open(api: &'a dyn LdapApi, host: Option<&str>, port: u16) -> Result<Self> {
        let address = format!("{}:{port}", host.unwrap_or(DEFAULT_HOST));
        let handle = api.init(host.unwrap_or_default(), port);
        if handle.is_null() {
            return Err(Error::ConnectionFailed {
                address,
                message: native_error("ldap_init", api.last_error()).to_string(),
            });
        }
        Ok(Self {
            api,
            handle,
            address,
        })
    }

    fn set_option(&self, option: i32, value: u32) -> Result<()> {
        check("ldap_set_option", self.api.set_option(self.handle, option, value))
    }

    fn disable_referrals(&self) -> Result<()> {
        check("ldap_set_option", self.api.disable_referrals(self.handle))
    }

    fn connect(&self) -> Result<()> {
        check("ldap_connect", self.api.connect(self.handle)).map_err(|err| {
            Error::ConnectionFailed {
                address: self.address.clone(),
                message: err.to_string(),
            }
        })
    }

    fn bind_current_identity(&self) -> Result<()> {
        check("ldap_bind_s", self.api.bind_negotiate(self.handle)).map_err(|err| {
            Error::BindFailed {
                identity: CURRENT_IDENTITY.to_string(),
                message: format!("{err} on {}", self.address),
            }
        })
    }

    fn search(
        &self,
        base_dn: &str,
        scope: u32,
        filter: &str,
        attributes: &[String],
    ) -> Result<(Message<'_>, bool)> {
        let mut handle = Handle::NULL;
        let code = self
            .api
            .search(self.handle, base_dn, scope, filter, attributes, &mut handle);
        // The message may be allocated even when the call fails.
        let message = Message {
            api: self.api,
            session: self.handle,
            handle,
        };

        match code {
            LDAP_SUCCESS => Ok((message, false)),
            LDAP_SIZELIMIT_EXCEEDED => Ok((message, true)),
            code => Err(native_error("ldap_search_s", code)),
        }
    }
}

impl Drop for Session<'_> {
    fn drop(&mut self) {
        let code = self.api.unbind(self.handle);
        if code != LDAP_SUCCESS {
            warn!(code, address = %self.address, "failed to release native directory session");
        }
    }
}

/// Owned search result message; borrows the session so it is freed first.
struct Message<'s> {
    api: &'s dyn LdapApi,
    session: Handle,
    handle: Handle,
}

impl Message<'_> {
    fn entries(&self) -> Entries<'_> {
        Entries {
            api: self.api,
            session: self.session,
            message: self.handle,
            cursor: Handle::NULL,
            started: false,
        }
    }
}

impl Drop for Message<'_> {
    fn drop(&mut self) {
        if self.handle.is_null() {
            return;
        }
        let code = self.api.free_message(self.handle);
        if code != LDAP_SUCCESS {
            warn!(code, "failed to release native search result");
        }
    }
}

struct Entries<'m> {
    api: &'m dyn LdapApi,
    session: Handle,
    message: Handle,
    cursor: Handle,
    started: bool,
}

impl<'m> Iterator for Entries<'m> {
    type Item = Entry<'m>;

    fn next(&mut self) -> Option<Entry<'m>> {
        let next = if !self.started {
            self.started = true;
            if self.message.is_null() {
                return None;
            }
            self.api.first_entry(self.session, self.message)
        } else if self.cursor.is_null() {
            return None;
        } else {
            self.api.next_entry(self.session, self.cursor)
        };
        self.cursor = next;

        (!next.is_null()).then_some(Entry {
            api: self.api,
            session: self.session,
            handle: next,
        })
    }
}

/// Entry inside a message; freed with the message.
struct Entry<'m> {
    api: &'m dyn LdapApi,
    session: Handle,
    handle: Handle,
}

impl Entry<'_> {
    fn attributes(&self) -> Attributes<'_> {
        Attributes {
            api: self.api,
            session: self.session,
            entry: self.handle,
            ber: Handle::NULL,
            started: false,
        }
    }

    fn first_text_value(&self, attribute: &AttributeName<'_>) -> Option<String> {
        let values = TextValues {
            api: self.api,
            handle: self
                .api
                .text_values(self.session, self.handle, attribute.handle),
        };
        if values.handle.is_null() {
            return None;
        }
        self.api.first_text_value(values.handle)
    }

    fn first_binary_value(&self, attribute: &AttributeName<'_>) -> Option<Vec<u8>> {
        let values = BinaryValues {
            api: self.api,
            handle: self
                .api
                .binary_values(self.session, self.handle, attribute.handle),
        };
        if values.handle.is_null() {
            return None;
        }
        self.api.first_binary_value(values.handle)
    }
}

/// Attribute iterator over one entry; owns the BER cursor.
struct Attributes<'e> {
    api: &'e dyn LdapApi,
    session: Handle,
    entry: Handle,
    ber: Handle,
    started: bool,
}

impl<'e> Iterator for Attributes<'e> {
    type Item = AttributeName<'e>;

    fn next(&mut self) -> Option<AttributeName<'e>> {
        let name = if self.started {
            if self.ber.is_null() {
                return None;
            }
            self.api.next_attribute(self.session, self.entry, self.ber)
        } else {
            self.started = true;
            self.api
                .first_attribute(self.session, self.entry, &mut self.ber)
        };

        (!name.is_null()).then_some(AttributeName {
            api: self.api,
            handle: name,
        })
    }
}

impl Drop for Attributes<'_> {
    fn drop(&mut self) {
        if !self.ber.is_null() {
            self.api.free_ber(self.ber);
        }
    }
}

/// Attribute name allocated by the library.
struct AttributeName<'e> {
    api: &'e dyn LdapApi,
    handle: Handle,
}

impl AttributeName<'_> {
    fn name(&self) -> String {
        self.api.attribute_name(self.handle)
    }
}

impl Drop for AttributeName<'_> {
    fn drop(&mut self) {
        self.api.free_attribute_name(self.handle);
    }
}

struct TextValues<'e> {
    api: &'e dyn LdapApi,
    handle: Handle,
}

impl Drop for TextValues<'_> {
    fn drop(&mut self) {
        if !self.handle.is_null() {
            let code = self.api.free_text_values(self.handle);
            if code != LDAP_SUCCESS {
                warn!(code, "failed to release native attribute values");
            }
        }
    }
}

struct BinaryValues<'e> {
    api: &'e dyn LdapApi,
    handle: Handle,
}

impl Drop for BinaryValues<'_> {
    fn drop(&mut self) {
        if !self.handle.is_null() {
            let code = self.api.free_binary_values(self.handle);
            if code != LDAP_SUCCESS {
                warn!(code, "failed to release native attribute values");
            }
        }
    }
}
