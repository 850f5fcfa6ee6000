//! Node records and the registry key schema
//!
//! Every registered node lives at `"<namespace>/<service>/<name>"` with the
//! stringified URI as the raw value.

use http::Uri;

use crate::error::{Error, Result};

/// A registered endpoint within a service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    /// Node name, unique within its service
    pub name: String,
    /// Address of the node
    pub uri: Uri,
}

/// Build the registry key for a node.
pub fn node_key(namespace: &str, service: &str, name: &str) -> String {
    format!("{namespace}/{service}/{name}")
}

/// Extract the node name (last path segment) from a registry key.
pub fn name_from_key(key: &str) -> &str {
    key.rsplit('/').next().unwrap_or(key)
}

pub(crate) fn validate_service(service: &str) -> Result<()> {
    if service.is_empty() || service.contains('/') {
        return Err(Error::InvalidService(service.to_string()));
    }
    Ok(())
}

pub(crate) fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() || name.contains('/') {
        return Err(Error::InvalidName(name.to_string()));
    }
    Ok(())
}

/// Parse and validate an absolute URI.
pub(crate) fn parse_uri(uri: &str) -> Result<Uri> {
    let parsed: Uri = uri.parse()?;
    if parsed.scheme().is_none() || parsed.authority().is_none() {
        return Err(Error::RelativeUri(uri.to_string()));
    }
    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_key() {
        assert_eq!(node_key("svc", "api", "n1"), "svc/api/n1");
    }

    #[test]
    fn test_name_from_key() {
        assert_eq!(name_from_key("svc/api/n1"), "n1");
        assert_eq!(name_from_key("bare"), "bare");
    }

    #[test]
    fn test_validate_segments() {
        assert!(validate_service("api").is_ok());
        assert!(validate_service("").is_err());
        assert!(validate_service("a/b").is_err());
        assert!(validate_name("n1").is_ok());
        assert!(validate_name("n/1").is_err());
    }

    #[test]
    fn test_parse_uri() {
        assert!(parse_uri("http://a:80").is_ok());
        assert!(parse_uri("not a uri").is_err());
        assert!(matches!(parse_uri("/relative"), Err(Error::RelativeUri(_))));
    }
}
