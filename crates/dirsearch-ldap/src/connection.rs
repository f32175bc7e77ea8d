//! Connection backend: explicit bind and search over the LDAP protocol.

use crate::{
    config::{DirectoryConfig, SearchScope},
    directory::DirectorySearch,
    dn::DistinguishedName,
    record::{in_context, AttributeValue, DirectoryRecord, SearchResults},
    Result,
};
use async_trait::async_trait;
use dirsearch_core::Error;
use ldap3::{LdapConnAsync, LdapConnSettings, SearchEntry, SearchOptions};
use native_tls::TlsConnector;
use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};
use url::Url;

/// Pseudo-attribute resolving to the entry's own distinguished name.
pub const DN_ATTRIBUTE: &str = "DN";

const RC_SUCCESS: u32 = 0;
const RC_SIZE_LIMIT_EXCEEDED: u32 = 4;

/// Escapes a filter fragment (`*`, `(`, `)`, `\` and NUL) for safe interpolation.
#[must_use]
pub fn escape_filter(value: &str) -> Cow<'_, str> {
    ldap3::ldap_escape(value)
}

/// Entry as returned by the protocol library.
#[derive(Debug, Clone, Default)]
pub(crate) struct LdapEntry {
    pub(crate) dn: String,
    pub(crate) attributes: HashMap<String, Vec<String>>,
    pub(crate) binary_attributes: HashMap<String, Vec<Vec<u8>>>,
}

impl LdapEntry {
    /// First value of `attribute`; only the first value of multi-valued attributes is used.
    fn first(&self, attribute: &str) -> Option<AttributeValue<'_>> {
        if let Some(values) = self.attributes.get(attribute) {
            return Some(AttributeValue::Text(
                values.first().map_or("", String::as_str),
            ));
        }
        if let Some(values) = self.binary_attributes.get(attribute) {
            return Some(AttributeValue::Binary(
                values.first().map_or(&[][..], Vec::as_slice),
            ));
        }
        (attribute == DN_ATTRIBUTE).then_some(AttributeValue::Text(self.dn.as_str()))
    }
}

impl From<SearchEntry> for LdapEntry {
    fn from(entry: SearchEntry) -> Self {
        Self {
            dn: entry.dn,
            attributes: entry.attrs,
            binary_attributes: entry.bin_attrs,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SearchRequest {
    pub(crate) base_dn: String,
    pub(crate) scope: SearchScope,
    pub(crate) filter: String,
    pub(crate) attributes: Vec<String>,
    pub(crate) size_limit: i32,
    pub(crate) time_limit: i32,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct SearchResponse {
    pub(crate) entries: Vec<LdapEntry>,
    pub(crate) size_limit_exceeded: bool,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub(crate) trait LdapSession: Send {
    async fn simple_bind(&mut self, dn: &str, password: &str) -> Result<()>;
    async fn search(&mut self, request: &SearchRequest) -> Result<SearchResponse>;
    async fn unbind(&mut self) -> Result<()>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub(crate) trait LdapConnector: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn LdapSession>>;
}

/// Backend that binds with explicit credentials and searches over one protocol connection.
pub struct ConnectionBackend {
    config: Arc<DirectoryConfig>,
    connector: Box<dyn LdapConnector>,
}

impl ConnectionBackend {
    pub(crate) fn new(config: Arc<DirectoryConfig>) -> Self {
        let connector: Box<dyn LdapConnector> = Box::new(RealLdapConnector::new(config.clone()));
        Self { config, connector }
    }

    #[cfg(test)]
    pub(crate) fn with_connector(config: DirectoryConfig, connector: Box<dyn LdapConnector>) -> Self {
        Self {
            config: Arc::new(config.with_defaults()),
            connector,
        }
    }

    /// Configuration the backend was opened with (defaults applied).
    #[must_use]
    pub fn config(&self) -> &DirectoryConfig {
        &self.config
    }

    async fn bind_and_search(
        &self,
        session: &mut dyn LdapSession,
        request: &SearchRequest,
    ) -> Result<SearchResponse> {
        session
            .simple_bind(
                self.config.bind_dn().unwrap_or_default(),
                self.config.bind_password().unwrap_or_default(),
            )
            .await?;
        session.search(request).await
    }
}

#[async_trait]
impl DirectorySearch for ConnectionBackend {
    async fn search<T>(&self, domain: &str, out: &mut Vec<T>, filter: &str) -> Result<()>
    where
        T: DirectoryRecord,
    {
        let base_dn = DistinguishedName::from_domain("dc", domain);
        let mut results = SearchResults::new(out).map_err(|err| in_context("ldap search", err))?;

        let request = SearchRequest {
            base_dn: base_dn.to_string(),
            scope: self.config.scope(),
            filter: filter.to_string(),
            attributes: results.attribute_list().to_vec(),
            size_limit: i32::from(self.config.size_limit()),
            time_limit: i32::from(self.config.time_limit()),
        };
        debug!(
            base_dn = %request.base_dn,
            filter = %request.filter,
            scope = ?request.scope,
            attributes = request.attributes.len(),
            "starting directory search"
        );

        let mut session = self.connector.connect().await?;
        let outcome = self.bind_and_search(&mut *session, &request).await;
        if let Err(err) = session.unbind().await {
            warn!(error = %err, "failed to release directory connection");
        }
        let response = outcome?;

        for entry in &response.entries {
            let mut record = results.new_record();
            for attribute in &request.attributes {
                if let Some(value) = entry.first(attribute) {
                    results.set_field(&mut record, attribute, value);
                }
            }
            results.append(record);
        }

        if response.size_limit_exceeded {
            info!(
                base_dn = %request.base_dn,
                returned = response.entries.len(),
                "directory search truncated by size limit"
            );
            return Err(Error::SizeLimitExceeded);
        }
        Ok(())
    }
}

/// Real LDAP connector backed by `ldap3`.
struct RealLdapConnector {
    config: Arc<DirectoryConfig>,
}

impl RealLdapConnector {
    fn new(config: Arc<DirectoryConfig>) -> Self {
        Self { config }
    }

    fn address(&self) -> Result<Url> {
        let host = self
            .config
            .host()
            .ok_or_else(|| Error::ConfigError("directory host is not configured".to_string()))?;
        let scheme = if self.config.use_tls() { "ldaps" } else { "ldap" };
        Ok(Url::parse(&format!(
            "{scheme}://{host}:{}",
            self.config.port()
        ))?)
    }
}

#[async_trait]
impl LdapConnector for RealLdapConnector {
    async fn connect(&self) -> Result<Box<dyn LdapSession>> {
        let address = self.address()?;
        let settings = build_ldap_settings(&self.config)?;
        let (conn, ldap) = LdapConnAsync::with_settings(settings, address.as_str())
            .await
            .map_err(|err| Error::ConnectionFailed {
                address: address.to_string(),
                message: err.to_string(),
            })?;
        ldap3::drive!(conn);
        Ok(Box::new(RealLdapSession { inner: ldap }))
    }
}

struct RealLdapSession {
    inner: ldap3::Ldap,
}

#[async_trait]
impl LdapSession for RealLdapSession {
    async fn simple_bind(&mut self, dn: &str, password: &str) -> Result<()> {
        let bind_failed = |message: String| Error::BindFailed {
            identity: dn.to_string(),
            message,
        };
        self.inner
            .simple_bind(dn, password)
            .await
            .map_err(|err| bind_failed(err.to_string()))?
            .success()
            .map_err(|err| bind_failed(err.to_string()))?;
        Ok(())
    }

    async fn search(&mut self, request: &SearchRequest) -> Result<SearchResponse> {
        let options = SearchOptions::new()
            .sizelimit(request.size_limit)
            .timelimit(request.time_limit);
        let ldap3::SearchResult(entries, status) = self
            .inner
            .with_search_options(options)
            .search(
                &request.base_dn,
                request.scope.into(),
                &request.filter,
                request.attributes.clone(),
            )
            .await
            .map_err(map_ldap_error)?;

        let size_limit_exceeded = match status.rc {
            RC_SUCCESS => false,
            RC_SIZE_LIMIT_EXCEEDED => true,
            rc => {
                return Err(Error::SearchFailed(format!(
                    "LDAP Result Code {rc}: {}",
                    status.text
                )))
            }
        };

        Ok(SearchResponse {
            entries: entries
                .into_iter()
                .map(SearchEntry::construct)
                .map(LdapEntry::from)
                .collect(),
            size_limit_exceeded,
        })
    }

    async fn unbind(&mut self) -> Result<()> {
        self.inner.unbind().await.map_err(map_ldap_error)
    }
}

fn build_ldap_settings(config: &DirectoryConfig) -> Result<LdapConnSettings> {
    let mut settings = LdapConnSettings::new().set_conn_timeout(config.connection_timeout());

    if config.use_tls() && !config.tls_verify() {
        let connector = TlsConnector::builder()
            .danger_accept_invalid_certs(true)
            .build()
            .map_err(|err| {
                Error::ConfigError(format!("failed to construct TLS connector: {err}"))
            })?;
        settings = settings.set_connector(connector).set_no_tls_verify(true);
    }

    Ok(settings)
}

fn map_ldap_error(err: ldap3::LdapError) -> Error {
    Error::SearchFailed(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory_record;
    use dirsearch_core::Sid;

    #[derive(Debug, Default, PartialEq)]
    struct Account {
        name: String,
        mail: String,
        sid: Sid,
    }

    directory_record!(Account {
        name: text => "sAMAccountName",
        mail: text => "mail",
        sid: sid => "objectSid",
    });

    #[derive(Debug, Default)]
    struct Located {
        dn: String,
        cn: String,
    }

    directory_record!(Located {
        dn: text => DN_ATTRIBUTE,
        cn: text => "cn",
    });

    #[derive(Debug, Default)]
    #[allow(dead_code)]
    struct Clashing {
        first: String,
        second: String,
    }

    directory_record!(Clashing {
        first: text => "cn",
        second: text => "cn",
    });

    const SID_BYTES: [u8; 16] = [1, 2, 0, 0, 0, 0, 0, 5, 21, 0, 0, 0, 0, 2, 0, 0];

    fn sample_config() -> DirectoryConfig {
        DirectoryConfig::new()
            .with_host("dc1.example.com")
            .with_credentials("cn=reader,dc=example,dc=com", "secret")
    }

    fn account_entry(login: &str) -> LdapEntry {
        let mut attributes = HashMap::new();
        attributes.insert("sAMAccountName".to_string(), vec![login.to_string()]);
        attributes.insert(
            "mail".to_string(),
            vec![format!("{login}@example.com"), format!("{login}@corp.example.com")],
        );
        let mut binary_attributes = HashMap::new();
        binary_attributes.insert("objectSid".to_string(), vec![SID_BYTES.to_vec()]);
        LdapEntry {
            dn: format!("cn={login},cn=Users,dc=example,dc=com"),
            attributes,
            binary_attributes,
        }
    }

    fn session_returning(response: Result<SearchResponse>) -> MockLdapSession {
        let mut session = MockLdapSession::new();
        session.expect_simple_bind().times(1).returning(|_, _| Ok(()));
        session
            .expect_search()
            .times(1)
            .return_once(move |_| response);
        session.expect_unbind().times(1).returning(|| Ok(()));
        session
    }

    fn connector_for(session: MockLdapSession) -> Box<MockLdapConnector> {
        let mut connector = MockLdapConnector::new();
        connector
            .expect_connect()
            .times(1)
            .return_once(move || Ok(Box::new(session)));
        Box::new(connector)
    }

    #[tokio::test]
    async fn search_materializes_entries() {
        let mut session = MockLdapSession::new();
        session
            .expect_simple_bind()
            .withf(|dn, password| dn == "cn=reader,dc=example,dc=com" && password == "secret")
            .times(1)
            .returning(|_, _| Ok(()));
        session
            .expect_search()
            .withf(|request| {
                request.base_dn == "dc=example,dc=com"
                    && request.filter == "(objectClass=user)"
                    && request.scope == SearchScope::Subtree
                    && request.attributes == ["sAMAccountName", "mail", "objectSid"]
                    && request.size_limit == 50
                    && request.time_limit == 10
            })
            .times(1)
            .returning(|_| {
                Ok(SearchResponse {
                    entries: vec![account_entry("jdoe"), account_entry("asmith")],
                    size_limit_exceeded: false,
                })
            });
        session.expect_unbind().times(1).returning(|| Ok(()));

        let backend = ConnectionBackend::with_connector(sample_config(), connector_for(session));
        let mut accounts: Vec<Account> = Vec::new();
        backend
            .search("example.com", &mut accounts, "(objectClass=user)")
            .await
            .unwrap();

        assert_eq!(accounts.len(), 2);
        assert_eq!(accounts[0].name, "jdoe");
        assert_eq!(accounts[0].mail, "jdoe@example.com");
        assert_eq!(accounts[0].sid.to_string(), "S-1-5-21-512");
        assert_eq!(accounts[1].name, "asmith");
    }

    #[tokio::test]
    async fn size_limit_returns_partial_results() {
        let session = session_returning(Ok(SearchResponse {
            entries: vec![account_entry("jdoe")],
            size_limit_exceeded: true,
        }));

        let backend = ConnectionBackend::with_connector(
            sample_config().with_size_limit(1),
            connector_for(session),
        );
        let mut accounts: Vec<Account> = Vec::new();
        let err = backend
            .search("example.com", &mut accounts, "(objectClass=user)")
            .await
            .unwrap_err();

        assert_eq!(err, Error::SizeLimitExceeded);
        assert!(err.is_partial());
        assert_eq!(accounts.len(), 1);
        assert_eq!(accounts[0].name, "jdoe");
    }

    #[tokio::test]
    async fn search_failure_still_releases_connection() {
        let session = session_returning(Err(Error::SearchFailed(
            "LDAP Result Code 32: no such object".to_string(),
        )));

        let backend = ConnectionBackend::with_connector(sample_config(), connector_for(session));
        let mut accounts: Vec<Account> = Vec::new();
        let err = backend
            .search("example.com", &mut accounts, "(objectClass=user)")
            .await
            .unwrap_err();

        assert!(matches!(err, Error::SearchFailed(_)));
        assert!(accounts.is_empty());
    }

    #[tokio::test]
    async fn bind_failure_skips_search_and_releases_connection() {
        let mut session = MockLdapSession::new();
        session.expect_simple_bind().times(1).returning(|dn, _| {
            Err(Error::BindFailed {
                identity: dn.to_string(),
                message: "invalidCredentials".to_string(),
            })
        });
        session.expect_search().never();
        session.expect_unbind().times(1).returning(|| Ok(()));

        let backend = ConnectionBackend::with_connector(sample_config(), connector_for(session));
        let mut accounts: Vec<Account> = Vec::new();
        let err = backend
            .search("example.com", &mut accounts, "(objectClass=user)")
            .await
            .unwrap_err();

        assert_eq!(
            err,
            Error::BindFailed {
                identity: "cn=reader,dc=example,dc=com".to_string(),
                message: "invalidCredentials".to_string(),
            }
        );
    }

    #[tokio::test]
    async fn unbind_failure_does_not_mask_results() {
        let mut session = MockLdapSession::new();
        session.expect_simple_bind().returning(|_, _| Ok(()));
        session.expect_search().returning(|_| {
            Ok(SearchResponse {
                entries: vec![account_entry("jdoe")],
                size_limit_exceeded: false,
            })
        });
        session
            .expect_unbind()
            .times(1)
            .returning(|| Err(Error::SearchFailed("connection closed".to_string())));

        let backend = ConnectionBackend::with_connector(sample_config(), connector_for(session));
        let mut accounts: Vec<Account> = Vec::new();
        backend
            .search("example.com", &mut accounts, "(objectClass=user)")
            .await
            .unwrap();
        assert_eq!(accounts.len(), 1);
    }

    #[tokio::test]
    async fn dn_pseudo_attribute_resolves_to_entry_dn() {
        let session = session_returning(Ok(SearchResponse {
            entries: vec![LdapEntry {
                dn: "cn=Domain Admins,cn=Users,dc=example,dc=com".to_string(),
                attributes: HashMap::from([(
                    "cn".to_string(),
                    vec!["Domain Admins".to_string()],
                )]),
                binary_attributes: HashMap::new(),
            }],
            size_limit_exceeded: false,
        }));

        let backend = ConnectionBackend::with_connector(sample_config(), connector_for(session));
        let mut groups: Vec<Located> = Vec::new();
        backend
            .search("example.com", &mut groups, "(objectClass=group)")
            .await
            .unwrap();

        assert_eq!(groups[0].dn, "cn=Domain Admins,cn=Users,dc=example,dc=com");
        assert_eq!(groups[0].cn, "Domain Admins");
    }

    #[tokio::test]
    async fn invalid_record_fails_before_connecting() {
        let mut connector = MockLdapConnector::new();
        connector.expect_connect().never();

        let backend = ConnectionBackend::with_connector(sample_config(), Box::new(connector));
        let mut output: Vec<Clashing> = Vec::new();
        let err = backend
            .search("example.com", &mut output, "(cn=*)")
            .await
            .unwrap_err();

        assert!(matches!(err, Error::InvalidRecord(message) if message.starts_with("ldap search:")));
    }

    #[tokio::test]
    async fn connection_failure_propagates() {
        let mut connector = MockLdapConnector::new();
        connector.expect_connect().times(1).returning(|| {
            Err(Error::ConnectionFailed {
                address: "ldap://dc1.example.com:389".to_string(),
                message: "connection refused".to_string(),
            })
        });

        let backend = ConnectionBackend::with_connector(sample_config(), Box::new(connector));
        let mut accounts: Vec<Account> = Vec::new();
        let err = backend
            .search("example.com", &mut accounts, "(objectClass=user)")
            .await
            .unwrap_err();

        assert!(matches!(err, Error::ConnectionFailed { .. }));
    }

    #[test]
    fn first_value_lookup() {
        let entry = account_entry("jdoe");
        assert_eq!(
            entry.first("mail"),
            Some(AttributeValue::Text("jdoe@example.com"))
        );
        assert_eq!(
            entry.first("objectSid"),
            Some(AttributeValue::Binary(&SID_BYTES[..]))
        );
        assert_eq!(
            entry.first(DN_ATTRIBUTE),
            Some(AttributeValue::Text("cn=jdoe,cn=Users,dc=example,dc=com"))
        );
        assert_eq!(entry.first("telephoneNumber"), None);
    }

    #[test]
    fn address_uses_scheme_host_and_port() {
        let config = Arc::new(sample_config().with_defaults());
        let connector = RealLdapConnector::new(config);
        assert_eq!(
            connector.address().unwrap().as_str(),
            "ldap://dc1.example.com:389"
        );

        let config = Arc::new(sample_config().with_tls(true).with_port(636).with_defaults());
        let connector = RealLdapConnector::new(config);
        assert_eq!(
            connector.address().unwrap().as_str(),
            "ldaps://dc1.example.com:636"
        );
    }

    #[test]
    fn escape_filter_escapes_special_characters() {
        assert_eq!(escape_filter("jdoe"), "jdoe");
        assert_eq!(escape_filter("a*(b)\\"), "a\\2a\\28b\\29\\5c");
    }
}
