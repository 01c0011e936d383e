use crate::config::{RouteOverride, UpstreamConfig};

/// Picks the upstream hostname for a request path.
#[derive(Debug, Clone)]
pub struct UpstreamRouter {
    overrides: Vec<RouteOverride>,
    default_hostname: Option<String>,
}

impl UpstreamRouter {
    pub fn new(overrides: Vec<RouteOverride>, default_hostname: impl Into<String>) -> Self {
        let default_hostname = default_hostname.into();
        Self {
            overrides,
            default_hostname: (!default_hostname.is_empty()).then_some(default_hostname),
        }
    }

    pub fn from_config(config: &UpstreamConfig) -> Self {
        Self::new(config.routes.clone(), config.hostname.clone())
    }

    /// First override whose fragment occurs in `path` wins; otherwise the
    /// default. `None` when neither applies.
    pub fn resolve(&self, path: &str) -> Option<&str> {
        self.overrides
            .iter()
            .find(|route| path.contains(&route.path_contains))
            .map(|route| route.hostname.as_str())
            .or(self.default_hostname.as_deref())
    }
}
