//! Impersonation headers understood by the Kubernetes API server

use http::HeaderMap;
use http::header::{HeaderName, HeaderValue};
use kubegate_types::Identity;

pub const IMPERSONATE_USER: &str = "impersonate-user";
pub const IMPERSONATE_UID: &str = "impersonate-uid";
pub const IMPERSONATE_GROUP: &str = "impersonate-group";

/// Covers `Impersonate-User`, `-Uid`, `-Group` and every `Impersonate-Extra-*`
const IMPERSONATE_PREFIX: &str = "impersonate-";

/// Check if a header would change who the API server thinks is calling
pub fn is_impersonation_header(name: &HeaderName) -> bool {
    // HeaderName is always lowercase
    name.as_str().starts_with(IMPERSONATE_PREFIX)
}

/// Remove all impersonation headers
pub fn strip(headers: &mut HeaderMap) {
    let names: Vec<HeaderName> = headers
        .keys()
        .filter(|name| is_impersonation_header(name))
        .cloned()
        .collect();

    for name in names {
        headers.remove(&name);
    }
}

/// Replace whatever impersonation the headers carry with `identity`.
///
/// An empty user adds no `Impersonate-User`; every group becomes its own
/// `Impersonate-Group` value.
pub fn apply(headers: &mut HeaderMap, identity: &Identity) -> Result<(), http::header::InvalidHeaderValue> {
    strip(headers);

    if !identity.user.is_empty() {
        headers.insert(IMPERSONATE_USER, HeaderValue::from_str(&identity.user)?);
    }
    for group in &identity.groups {
        headers.append(IMPERSONATE_GROUP, HeaderValue::from_str(group)?);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn values(headers: &HeaderMap, name: &str) -> Vec<String> {
        headers
            .get_all(name)
            .iter()
            .map(|v| v.to_str().unwrap().to_string())
            .collect()
    }

    #[test]
    fn test_apply_user_and_groups() {
        let mut headers = HeaderMap::new();
        let identity = Identity::new("alice", vec!["dev".to_string(), "ops".to_string()]);
        apply(&mut headers, &identity).unwrap();

        assert_eq!(values(&headers, "Impersonate-User"), vec!["alice"]);
        assert_eq!(values(&headers, "Impersonate-Group"), vec!["dev", "ops"]);
    }

    #[test]
    fn test_apply_replaces_spoofed_headers() {
        let mut headers = HeaderMap::new();
        headers.insert("Impersonate-User", HeaderValue::from_static("admin"));
        headers.insert("Impersonate-Uid", HeaderValue::from_static("0"));
        headers.append("Impersonate-Group", HeaderValue::from_static("system:masters"));
        headers.insert("Impersonate-Extra-Scopes", HeaderValue::from_static("all"));
        headers.insert("Accept", HeaderValue::from_static("application/json"));

        apply(&mut headers, &Identity::default()).unwrap();

        assert!(headers.get("Impersonate-User").is_none());
        assert!(headers.get("Impersonate-Uid").is_none());
        assert!(headers.get("Impersonate-Group").is_none());
        assert!(headers.get("Impersonate-Extra-Scopes").is_none());
        assert_eq!(values(&headers, "Accept"), vec!["application/json"]);
    }

    #[test]
    fn test_groups_without_user() {
        let mut headers = HeaderMap::new();
        apply(&mut headers, &Identity::new("", vec!["viewers".to_string()])).unwrap();

        assert!(headers.get("Impersonate-User").is_none());
        assert_eq!(values(&headers, "Impersonate-Group"), vec!["viewers"]);
    }

    #[test]
    fn test_invalid_value_is_rejected() {
        let mut headers = HeaderMap::new();
        let identity = Identity::new("bad\nuser", vec![]);
        assert!(apply(&mut headers, &identity).is_err());
    }
}
