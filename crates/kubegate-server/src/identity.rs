use async_trait::async_trait;
use http::HeaderMap;
use kubegate_types::Identity;
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("identity header {0} is not valid UTF-8")]
    InvalidHeader(String),

    #[error("identity header {0} is missing")]
    Missing(String),
}

/// Decides who a request is impersonated as.
///
/// Empty results mean "no impersonation"; the request then runs with the
/// gateway's own credential.
#[async_trait]
pub trait IdentityResolver: Send + Sync {
    async fn resolve_user(&self, headers: &HeaderMap) -> Result<String, IdentityError>;

    async fn resolve_groups(&self, headers: &HeaderMap) -> Result<Vec<String>, IdentityError>;

    async fn resolve(&self, headers: &HeaderMap) -> Result<Identity, IdentityError> {
        let user = self.resolve_user(headers).await?;
        let groups = self.resolve_groups(headers).await?;
        Ok(Identity::new(user, groups))
    }
}

/// Settings of [`HeaderIdentityResolver`]
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    pub impersonate_user: bool,
    pub impersonate_groups: bool,
    /// Trusted header carrying the user name
    pub user_header: String,
    /// Trusted header carrying comma separated group names
    pub groups_header: String,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            impersonate_user: false,
            impersonate_groups: false,
            user_header: "X-Kubegate-User".to_string(),
            groups_header: "X-Kubegate-Groups".to_string(),
        }
    }
}

/// Reads the identity from headers set by a trusted front proxy.
///
/// With either flag enabled a request must name a user or at least one
/// group; it never falls back to the gateway's own credential.
#[derive(Clone, Debug, Default)]
pub struct HeaderIdentityResolver {
    config: IdentityConfig,
}

impl HeaderIdentityResolver {
    pub fn new(config: IdentityConfig) -> Self {
        Self { config }
    }

    fn header<'a>(headers: &'a HeaderMap, name: &str) -> Result<Option<&'a str>, IdentityError> {
        headers
            .get(name)
            .map(|value| {
                value
                    .to_str()
                    .map_err(|_| IdentityError::InvalidHeader(name.to_string()))
            })
            .transpose()
    }
}

#[async_trait]
impl IdentityResolver for HeaderIdentityResolver {
    async fn resolve_user(&self, headers: &HeaderMap) -> Result<String, IdentityError> {
        if !self.config.impersonate_user {
            return Ok(String::new());
        }

        match Self::header(headers, &self.config.user_header)?.map(str::trim) {
            Some(user) if !user.is_empty() => Ok(user.to_string()),
            _ => Err(IdentityError::Missing(self.config.user_header.clone())),
        }
    }

    async fn resolve_groups(&self, headers: &HeaderMap) -> Result<Vec<String>, IdentityError> {
        if !self.config.impersonate_groups {
            return Ok(Vec::new());
        }

        let groups = Self::header(headers, &self.config.groups_header)?.unwrap_or_default();
        Ok(groups
            .split(',')
            .map(str::trim)
            .filter(|group| !group.is_empty())
            .map(str::to_string)
            .collect())
    }

    async fn resolve(&self, headers: &HeaderMap) -> Result<Identity, IdentityError> {
        let identity = Identity::new(self.resolve_user(headers).await?, self.resolve_groups(headers).await?);

        if identity.is_empty() && (self.config.impersonate_user || self.config.impersonate_groups) {
            return Err(IdentityError::Missing(self.config.groups_header.clone()));
        }
        Ok(identity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    fn headers() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("X-Kubegate-User", HeaderValue::from_static("alice"));
        headers.insert("X-Kubegate-Groups", HeaderValue::from_static("g1, g2,,"));
        headers
    }

    #[tokio::test]
    async fn test_disabled_flags_yield_empty_identity() {
        let resolver = HeaderIdentityResolver::default();
        assert!(resolver.resolve(&headers()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_resolve_user_and_groups() {
        let resolver = HeaderIdentityResolver::new(IdentityConfig {
            impersonate_user: true,
            impersonate_groups: true,
            ..Default::default()
        });

        let identity = resolver.resolve(&headers()).await.unwrap();
        assert_eq!(identity.user, "alice");
        assert_eq!(identity.groups, vec!["g1", "g2"]);
    }

    #[tokio::test]
    async fn test_groups_only() {
        let resolver = HeaderIdentityResolver::new(IdentityConfig {
            impersonate_groups: true,
            ..Default::default()
        });

        let identity = resolver.resolve(&headers()).await.unwrap();
        assert!(identity.user.is_empty());
        assert_eq!(identity.groups.len(), 2);
    }

    #[tokio::test]
    async fn test_missing_user_is_rejected() {
        let resolver = HeaderIdentityResolver::new(IdentityConfig {
            impersonate_user: true,
            impersonate_groups: true,
            ..Default::default()
        });

        let err = resolver.resolve(&HeaderMap::new()).await.unwrap_err();
        assert!(matches!(err, IdentityError::Missing(header) if header == "X-Kubegate-User"));

        let mut blank = HeaderMap::new();
        blank.insert("X-Kubegate-User", HeaderValue::from_static("  "));
        blank.insert("X-Kubegate-Groups", HeaderValue::from_static("g1"));
        assert!(matches!(resolver.resolve(&blank).await, Err(IdentityError::Missing(_))));
    }

    #[tokio::test]
    async fn test_groups_only_requires_a_group() {
        let resolver = HeaderIdentityResolver::new(IdentityConfig {
            impersonate_groups: true,
            ..Default::default()
        });

        let mut headers = HeaderMap::new();
        headers.insert("X-Kubegate-Groups", HeaderValue::from_static(" , "));
        let err = resolver.resolve(&headers).await.unwrap_err();
        assert!(matches!(err, IdentityError::Missing(header) if header == "X-Kubegate-Groups"));
    }

    #[tokio::test]
    async fn test_invalid_header() {
        let resolver = HeaderIdentityResolver::new(IdentityConfig {
            impersonate_user: true,
            ..Default::default()
        });

        let mut headers = HeaderMap::new();
        headers.insert("X-Kubegate-User", HeaderValue::from_bytes(b"al\xffce").unwrap());
        assert!(resolver.resolve_user(&headers).await.is_err());
    }
}
