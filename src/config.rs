//! Gateway configuration file

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use kubegate_k8s::ClusterCredentials;
use kubegate_server::IdentityConfig;
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub cluster: ClusterCredentials,
    pub api: ApiConfig,
    pub server: ServerConfig,
    pub identity: IdentityConfig,
    pub telemetry: TelemetryConfig,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub listen: SocketAddr,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([127, 0, 0, 1], 8080)),
        }
    }
}

/// Companion proxy listener
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub enabled: bool,
    pub port: u16,
    /// Pause between attempts to (re)start the listener
    pub retry_interval_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: 8443,
            retry_interval_secs: 5,
        }
    }
}

/// Console log rendering
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Pretty on a terminal, JSON otherwise
    #[default]
    Auto,
    Pretty,
    Json,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OtlpProtocol {
    Grpc,
    #[default]
    Http,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Filter directives used when neither `--log-level` nor `RUST_LOG` is set
    pub filter: Option<String>,
    pub format: LogFormat,
    /// Span collector; `OTEL_EXPORTER_OTLP_*ENDPOINT` is used when unset
    pub otlp_endpoint: Option<String>,
    pub otlp_protocol: OtlpProtocol,
    pub service_name: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            filter: None,
            format: LogFormat::Auto,
            otlp_endpoint: None,
            otlp_protocol: OtlpProtocol::Http,
            service_name: "kubegate".to_string(),
        }
    }
}

impl ServerConfig {
    pub fn addr(&self) -> SocketAddr {
        SocketAddr::from(([0, 0, 0, 0], self.port))
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_secs(self.retry_interval_secs.max(1))
    }
}

impl GatewayConfig {
    /// Load from `path`; a missing file yields the defaults
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };

        Self::parse(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn parse(contents: &str) -> Result<Self, toml::de::Error> {
        let mut config: Self = toml::from_str(contents)?;
        if let ClusterCredentials::Path { path, .. } = &mut config.cluster {
            *path = expand_home(path);
        }
        Ok(config)
    }
}

/// Resolve a leading `~` against the home directory
fn expand_home(path: &Path) -> PathBuf {
    match (path.strip_prefix("~"), dirs::home_dir()) {
        (Ok(rest), Some(home)) => home.join(rest),
        _ => path.to_path_buf(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_gives_defaults() {
        let config = GatewayConfig::load(Path::new("/nonexistent/kubegate.toml")).unwrap();
        assert!(matches!(config.cluster, ClusterCredentials::InCluster));
        assert_eq!(config.api.listen.to_string(), "127.0.0.1:8080");
        assert!(!config.server.enabled);
        assert!(!config.identity.impersonate_user);
        assert_eq!(config.telemetry.format, LogFormat::Auto);
        assert_eq!(config.telemetry.service_name, "kubegate");
        assert!(config.telemetry.otlp_endpoint.is_none());
    }

    #[test]
    fn test_full_config() {
        let config = GatewayConfig::parse(
            r#"
            [cluster]
            provider = "path"
            path = "/etc/kubegate/kubeconfig"
            context = "prod"

            [api]
            listen = "0.0.0.0:9090"

            [server]
            enabled = true
            port = 9443
            retry_interval_secs = 0

            [identity]
            impersonate_user = true
            impersonate_groups = true
            groups_header = "X-Forwarded-Groups"

            [telemetry]
            filter = "info,kubegate_k8s=debug"
            format = "json"
            otlp_endpoint = "http://collector:4317"
            otlp_protocol = "grpc"
            "#,
        )
        .unwrap();

        let ClusterCredentials::Path { path, context } = &config.cluster else {
            panic!("expected path credentials");
        };
        assert_eq!(path, Path::new("/etc/kubegate/kubeconfig"));
        assert_eq!(context.as_deref(), Some("prod"));

        assert_eq!(config.api.listen.port(), 9090);
        assert!(config.server.enabled);
        assert_eq!(config.server.addr().port(), 9443);
        assert_eq!(config.server.retry_interval(), Duration::from_secs(1));
        assert!(config.identity.impersonate_groups);
        assert_eq!(config.identity.user_header, "X-Kubegate-User");
        assert_eq!(config.identity.groups_header, "X-Forwarded-Groups");

        assert_eq!(config.telemetry.filter.as_deref(), Some("info,kubegate_k8s=debug"));
        assert_eq!(config.telemetry.format, LogFormat::Json);
        assert_eq!(config.telemetry.otlp_endpoint.as_deref(), Some("http://collector:4317"));
        assert_eq!(config.telemetry.otlp_protocol, OtlpProtocol::Grpc);
        assert_eq!(config.telemetry.service_name, "kubegate");
    }

    #[test]
    fn test_kubeconfig_path_expands_home() {
        let config = GatewayConfig::parse("[cluster]\nprovider = \"path\"\npath = \"~/.kube/config\"\n").unwrap();
        let ClusterCredentials::Path { path, .. } = config.cluster else {
            panic!("expected path credentials");
        };

        match dirs::home_dir() {
            Some(home) => assert_eq!(path, home.join(".kube").join("config")),
            None => assert_eq!(path, Path::new("~/.kube/config")),
        }
        assert_eq!(expand_home(Path::new("/etc/kubeconfig")), Path::new("/etc/kubeconfig"));
    }

    #[test]
    fn test_sample_config_parses() {
        let config = GatewayConfig::parse(include_str!("../kubegate.toml")).unwrap();
        assert!(!config.server.enabled);
        assert!(!matches!(config.cluster, ClusterCredentials::Path { ref path, .. } if path.starts_with("~")));
    }

    #[test]
    fn test_unknown_provider_is_rejected() {
        assert!(GatewayConfig::parse("[cluster]\nprovider = \"vault\"\n").is_err());
        assert!(GatewayConfig::parse("[telemetry]\nformat = \"xml\"\n").is_err());
    }
}
