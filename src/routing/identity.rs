//! Instance identity extraction.
//!
//! The `cryostat-svc-ns` / `cryostat-svc-name` headers win when both are
//! present. Otherwise both values come from the `ns` / `name` query
//! parameters, which is also how WebSocket upgrades carry them since browsers
//! cannot set custom headers on the handshake.

use std::fmt;

use axum::http::{HeaderMap, Uri};

use crate::error::ProxyError;

pub const NAMESPACE_HEADER: &str = "cryostat-svc-ns";
pub const NAME_HEADER: &str = "cryostat-svc-name";
pub const NAMESPACE_PARAM: &str = "ns";
pub const NAME_PARAM: &str = "name";

/// Maximum length of a DNS label.
const MAX_LABEL_LEN: usize = 63;

/// The (namespace, name) pair naming a Cryostat instance's Service.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InstanceIdentity {
    namespace: String,
    name: String,
}

impl InstanceIdentity {
    /// Build an identity, rejecting empty or malformed parts.
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Result<Self, ProxyError> {
        let namespace = namespace.into();
        let name = name.into();
        validate_label("namespace", &namespace)?;
        validate_label("name", &name)?;
        Ok(Self { namespace, name })
    }

    /// Resolve the identity of an inbound request.
    pub fn from_request(headers: &HeaderMap, uri: &Uri) -> Result<Self, ProxyError> {
        let from_headers = (
            header_value(headers, NAMESPACE_HEADER),
            header_value(headers, NAME_HEADER),
        );
        match from_headers {
            (Some(ns), Some(name)) => Self::new(ns, name),
            _ => {
                let query = uri.query().unwrap_or_default();
                Self::new(
                    query_value(query, NAMESPACE_PARAM).unwrap_or_default(),
                    query_value(query, NAME_PARAM).unwrap_or_default(),
                )
            }
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// In-cluster host name of the Service.
    pub fn host(&self) -> String {
        format!("{}.{}", self.name, self.namespace)
    }
}

impl fmt::Display for InstanceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// First value of a header, if present, valid UTF-8 and non-empty.
fn header_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

/// First non-empty occurrence of a query parameter.
fn query_value(query: &str, key: &str) -> Option<String> {
    url::form_urlencoded::parse(query.as_bytes())
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.into_owned())
        .filter(|v| !v.is_empty())
}

/// RFC 1123 label: lowercase alphanumerics and '-', alphanumeric at both ends.
fn validate_label(field: &str, value: &str) -> Result<(), ProxyError> {
    if value.is_empty() {
        return Err(ProxyError::Validation(format!("missing {field}")));
    }
    let bytes = value.as_bytes();
    let valid = bytes.len() <= MAX_LABEL_LEN
        && bytes
            .iter()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || *b == b'-')
        && bytes[0] != b'-'
        && bytes[bytes.len() - 1] != b'-';
    if valid {
        Ok(())
    } else {
        Err(ProxyError::Validation(format!("malformed {field} {value:?}")))
    }
}
