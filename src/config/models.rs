use serde::{Deserialize, Serialize};

pub const DEFAULT_UPSTREAM_HOSTNAME: &str = "registry-1.docker.io";
pub const DEFAULT_TOKEN_HOSTNAME: &str = "auth.docker.io";
pub const DEFAULT_SEARCH_HOSTNAME: &str = "index.docker.io";
pub const DEFAULT_AUTH_ENDPOINT: &str = "auth.docker.io/token";

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub listen_addr: String,
    pub tls: Option<TlsConfig>,
    pub upstream: UpstreamConfig,
    pub admission: AdmissionConfig,
    pub rejection: RejectionConfig,
    pub rewrite: RewriteConfig,
    /// Strips `content-security-policy` from mirrored responses.
    pub debug: bool,
    pub metrics: MetricsConfig,
    pub logging: LoggingConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8080".to_string(),
            tls: None,
            upstream: UpstreamConfig::default(),
            admission: AdmissionConfig::default(),
            rejection: RejectionConfig::default(),
            rewrite: RewriteConfig::default(),
            debug: false,
            metrics: MetricsConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Create a new server configuration builder
    pub fn builder() -> ServerConfigBuilder {
        ServerConfigBuilder::default()
    }
}

/// Builder for ServerConfig, mostly used by tests and embedders.
#[derive(Default)]
pub struct ServerConfigBuilder {
    config: ServerConfig,
}

impl ServerConfigBuilder {
    pub fn listen_addr(mut self, addr: impl Into<String>) -> Self {
        self.config.listen_addr = addr.into();
        self
    }

    /// Set the default upstream hostname. An empty string leaves the proxy
    /// without a default target.
    pub fn upstream_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.config.upstream.hostname = hostname.into();
        self
    }

    pub fn upstream_protocol(mut self, protocol: UpstreamProtocol) -> Self {
        self.config.upstream.protocol = protocol;
        self
    }

    /// Replace the ordered path overrides.
    pub fn routes(mut self, routes: Vec<RouteOverride>) -> Self {
        self.config.upstream.routes = routes;
        self
    }

    pub fn admission(mut self, admission: AdmissionConfig) -> Self {
        self.config.admission = admission;
        self
    }

    pub fn redirect(mut self, url: impl Into<String>, keep_path: bool) -> Self {
        self.config.rejection.redirect_url = Some(url.into());
        self.config.rejection.keep_path = keep_path;
        self
    }

    pub fn origin_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.config.rewrite.origin_hostname = Some(hostname.into());
        self
    }

    pub fn body_scope(mut self, scope: BodyRewriteScope) -> Self {
        self.config.rewrite.body_scope = scope;
        self
    }

    pub fn debug(mut self, debug: bool) -> Self {
        self.config.debug = debug;
        self
    }

    pub fn build(self) -> ServerConfig {
        self.config
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct TlsConfig {
    pub cert_path: String,
    pub key_path: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpstreamProtocol {
    Http,
    #[default]
    Https,
}

impl UpstreamProtocol {
    pub fn scheme(&self) -> &'static str {
        match self {
            UpstreamProtocol::Http => "http",
            UpstreamProtocol::Https => "https",
        }
    }
}

impl std::str::FromStr for UpstreamProtocol {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // Accept the "https:" form as well, URL.protocol style.
        match s.trim().trim_end_matches(':').to_ascii_lowercase().as_str() {
            "http" => Ok(UpstreamProtocol::Http),
            "https" => Ok(UpstreamProtocol::Https),
            other => Err(format!("unsupported upstream protocol '{other}'")),
        }
    }
}

impl std::fmt::Display for UpstreamProtocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.scheme())
    }
}

/// Path-based upstream override: requests whose path contains `path_contains`
/// go to `hostname` instead of the default upstream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteOverride {
    pub path_contains: String,
    pub hostname: String,
}

impl RouteOverride {
    pub fn new(path_contains: impl Into<String>, hostname: impl Into<String>) -> Self {
        Self {
            path_contains: path_contains.into(),
            hostname: hostname.into(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct UpstreamConfig {
    pub hostname: String,
    pub protocol: UpstreamProtocol,
    /// Evaluated top to bottom, first match wins.
    pub routes: Vec<RouteOverride>,
    pub max_redirects: usize,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            hostname: DEFAULT_UPSTREAM_HOSTNAME.to_string(),
            protocol: UpstreamProtocol::Https,
            routes: vec![
                RouteOverride::new("/token", DEFAULT_TOKEN_HOSTNAME),
                RouteOverride::new("/search", DEFAULT_SEARCH_HOSTNAME),
            ],
            max_redirects: 10,
        }
    }
}

/// Optional regular expressions; `None` means no constraint.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct AdmissionConfig {
    pub path_pattern: Option<String>,
    pub user_agent_allow: Option<String>,
    pub user_agent_deny: Option<String>,
    pub ip_allow: Option<String>,
    pub ip_deny: Option<String>,
    pub region_allow: Option<String>,
    pub region_deny: Option<String>,
    pub client_ip_header: String,
    pub region_header: String,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            path_pattern: None,
            user_agent_allow: None,
            user_agent_deny: None,
            ip_allow: None,
            ip_deny: None,
            region_allow: None,
            region_deny: None,
            client_ip_header: "cf-connecting-ip".to_string(),
            region_header: "cf-ipcountry".to_string(),
        }
    }
}

impl AdmissionConfig {
    /// All configured patterns with the option name they came from.
    pub fn patterns(&self) -> impl Iterator<Item = (&'static str, &str)> {
        [
            ("path_pattern", &self.path_pattern),
            ("user_agent_allow", &self.user_agent_allow),
            ("user_agent_deny", &self.user_agent_deny),
            ("ip_allow", &self.ip_allow),
            ("ip_deny", &self.ip_deny),
            ("region_allow", &self.region_allow),
            ("region_deny", &self.region_deny),
        ]
        .into_iter()
        .filter_map(|(name, pattern)| pattern.as_deref().map(|p| (name, p)))
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct RejectionConfig {
    pub redirect_url: Option<String>,
    pub keep_path: bool,
    pub redirect_status: u16,
    /// HTML file served to rejected clients when no redirect is configured.
    pub decoy_page: Option<String>,
}

impl Default for RejectionConfig {
    fn default() -> Self {
        Self {
            redirect_url: None,
            keep_path: false,
            redirect_status: 302,
            decoy_page: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BodyRewriteScope {
    /// Only rewrite upstream hostnames immediately followed by the path pattern
    /// (when one is configured).
    #[default]
    PathScoped,
    Everywhere,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct RewriteConfig {
    pub origin_hostname: Option<String>,
    /// Token endpoint in `www-authenticate` challenges, pointed back at the mirror.
    pub auth_endpoint: String,
    pub body_scope: BodyRewriteScope,
    pub textual_content_types: Vec<String>,
}

impl Default for RewriteConfig {
    fn default() -> Self {
        Self {
            origin_hostname: None,
            auth_endpoint: DEFAULT_AUTH_ENDPOINT.to_string(),
            body_scope: BodyRewriteScope::PathScoped,
            textual_content_types: vec!["text/".to_string()],
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub path: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            path: "/-/metrics".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct LoggingConfig {
    pub format: LogFormat,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_yaml_yields_docker_hub_defaults() {
        let config: ServerConfig = serde_yaml::from_str("{}").unwrap();
        assert_eq!(config.upstream.hostname, DEFAULT_UPSTREAM_HOSTNAME);
        assert_eq!(config.upstream.protocol, UpstreamProtocol::Https);
        assert_eq!(config.upstream.routes.len(), 2);
        assert_eq!(config.upstream.routes[0].path_contains, "/token");
        assert_eq!(config.admission.client_ip_header, "cf-connecting-ip");
        assert_eq!(config.rejection.redirect_status, 302);
        assert_eq!(config.rewrite.body_scope, BodyRewriteScope::PathScoped);
        assert!(!config.debug);
    }

    #[test]
    fn test_partial_yaml_keeps_other_defaults() {
        let yaml = r#"
upstream:
  hostname: ghcr.io
  protocol: http
admission:
  ip_deny: "^10\\."
rewrite:
  body_scope: everywhere
"#;
        let config: ServerConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.upstream.hostname, "ghcr.io");
        assert_eq!(config.upstream.protocol, UpstreamProtocol::Http);
        assert_eq!(config.upstream.max_redirects, 10);
        assert_eq!(config.admission.ip_deny.as_deref(), Some("^10\\."));
        assert_eq!(config.admission.region_header, "cf-ipcountry");
        assert_eq!(config.rewrite.body_scope, BodyRewriteScope::Everywhere);
    }

    #[test]
    fn test_protocol_parsing() {
        assert_eq!("https:".parse::<UpstreamProtocol>(), Ok(UpstreamProtocol::Https));
        assert_eq!("HTTP".parse::<UpstreamProtocol>(), Ok(UpstreamProtocol::Http));
        assert!("ftp".parse::<UpstreamProtocol>().is_err());
    }

    #[test]
    fn test_admission_patterns_lists_only_configured() {
        let admission = AdmissionConfig {
            ip_allow: Some("^1\\.".to_string()),
            region_deny: Some("CN".to_string()),
            ..Default::default()
        };
        let names: Vec<_> = admission.patterns().map(|(name, _)| name).collect();
        assert_eq!(names, vec!["ip_allow", "region_deny"]);
    }
}
