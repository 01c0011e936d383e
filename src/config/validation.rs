use regex::Regex;
use std::net::SocketAddr;
use std::path::Path;
use thiserror::Error;
use url::Url;

use crate::config::models::{RejectionConfig, RouteOverride, ServerConfig, TlsConfig};

#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("Configuration validation failed: {message}")]
    ValidationFailed { message: String },

    #[error("Invalid field '{field}': {message}")]
    InvalidField { field: String, message: String },

    #[error("Invalid pattern in '{field}': {source}")]
    InvalidPattern {
        field: String,
        #[source]
        source: regex::Error,
    },

    #[error("Invalid URL in field '{field}': {url} - {reason}")]
    InvalidUrl {
        field: String,
        url: String,
        reason: String,
    },

    #[error("Invalid listen address: {address} - {reason}")]
    InvalidListenAddress { address: String, reason: String },

    #[error("Invalid TLS configuration: {message}")]
    InvalidTls { message: String },
}

pub type ValidationResult<T> = Result<T, ValidationError>;

/// Configuration validator with detailed error reporting
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate a complete server configuration
    pub fn validate(config: &ServerConfig) -> ValidationResult<()> {
        let mut errors = Vec::new();

        if let Err(e) = Self::validate_listen_address(&config.listen_addr) {
            errors.push(e);
        }

        for (i, route) in config.upstream.routes.iter().enumerate() {
            if let Err(e) = Self::validate_route_override(i, route) {
                errors.push(e);
            }
        }

        if !Self::routes_token_requests(&config.upstream.routes) {
            tracing::warn!(
                upstream = %config.upstream.hostname,
                "No upstream.routes entry matches /token; registry auth will go to the default upstream"
            );
        }

        for (field, pattern) in config.admission.patterns() {
            if let Err(source) = Regex::new(pattern) {
                errors.push(ValidationError::InvalidPattern {
                    field: format!("admission.{field}"),
                    source,
                });
            }
        }

        // The body rewrite reuses the path pattern without its leading anchor.
        if let Some(path_pattern) = &config.admission.path_pattern {
            let scoped = path_pattern.strip_prefix('^').unwrap_or(path_pattern);
            if let Err(source) = Regex::new(scoped) {
                errors.push(ValidationError::InvalidPattern {
                    field: "admission.path_pattern (body scope)".to_string(),
                    source,
                });
            }
        }

        for (field, header) in [
            ("admission.client_ip_header", &config.admission.client_ip_header),
            ("admission.region_header", &config.admission.region_header),
        ] {
            if header.parse::<http::HeaderName>().is_err() {
                errors.push(ValidationError::InvalidField {
                    field: field.to_string(),
                    message: format!("'{header}' is not a valid HTTP header name"),
                });
            }
        }

        errors.extend(Self::validate_rejection(&config.rejection));

        if config.rewrite.auth_endpoint.is_empty() {
            errors.push(ValidationError::InvalidField {
                field: "rewrite.auth_endpoint".to_string(),
                message: "Auth endpoint cannot be empty".to_string(),
            });
        }

        if config.metrics.enabled && !config.metrics.path.starts_with('/') {
            errors.push(ValidationError::InvalidField {
                field: "metrics.path".to_string(),
                message: "Metrics path must start with '/'".to_string(),
            });
        }

        if let Some(tls_config) = &config.tls {
            if let Err(e) = Self::validate_tls_config(tls_config) {
                errors.push(e);
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ValidationError::ValidationFailed {
                message: Self::format_multiple_errors(errors),
            })
        }
    }

    /// Validate listen address format
    fn validate_listen_address(address: &str) -> ValidationResult<()> {
        if address.parse::<SocketAddr>().is_err() {
            return Err(ValidationError::InvalidListenAddress {
                address: address.to_string(),
                reason: "Must be in format 'IP:PORT' (e.g., '127.0.0.1:3000' or '0.0.0.0:8080')"
                    .to_string(),
            });
        }
        Ok(())
    }

    fn validate_route_override(index: usize, route: &RouteOverride) -> ValidationResult<()> {
        if route.path_contains.is_empty() {
            return Err(ValidationError::InvalidField {
                field: format!("upstream.routes[{index}].path_contains"),
                message: "Path fragment cannot be empty".to_string(),
            });
        }
        if route.hostname.is_empty() {
            return Err(ValidationError::InvalidField {
                field: format!("upstream.routes[{index}].hostname"),
                message: "Override hostname cannot be empty".to_string(),
            });
        }
        Ok(())
    }

    fn validate_rejection(config: &RejectionConfig) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if let Some(target) = &config.redirect_url {
            if let Err(e) = Self::validate_url(target, "rejection.redirect_url") {
                errors.push(e);
            }
        }

        if !Self::is_valid_redirect_status_code(config.redirect_status) {
            errors.push(ValidationError::InvalidField {
                field: "rejection.redirect_status".to_string(),
                message: format!(
                    "Status code {} is not a valid redirect code. Use 301, 302, 303, 307, or 308",
                    config.redirect_status
                ),
            });
        }

        if let Some(page) = &config.decoy_page {
            if !Path::new(page).exists() {
                errors.push(ValidationError::InvalidField {
                    field: "rejection.decoy_page".to_string(),
                    message: format!("File not found: {page}"),
                });
            }
        }

        errors
    }

    /// Whether some override catches `/token` requests, so registry auth
    /// reaches a token service instead of the default upstream.
    pub fn routes_token_requests(routes: &[RouteOverride]) -> bool {
        routes
            .iter()
            .any(|route| !route.path_contains.is_empty() && "/token".contains(&route.path_contains))
    }

    /// Validate URL format
    fn validate_url(url_str: &str, context: &str) -> ValidationResult<()> {
        match Url::parse(url_str) {
            Ok(url) => {
                if url.scheme() != "http" && url.scheme() != "https" {
                    return Err(ValidationError::InvalidUrl {
                        field: context.to_string(),
                        url: url_str.to_string(),
                        reason: "URL must use http:// or https:// scheme".to_string(),
                    });
                }

                if url.host().is_none() {
                    return Err(ValidationError::InvalidUrl {
                        field: context.to_string(),
                        url: url_str.to_string(),
                        reason: "URL must have a valid host".to_string(),
                    });
                }

                Ok(())
            }
            Err(e) => Err(ValidationError::InvalidUrl {
                field: context.to_string(),
                url: url_str.to_string(),
                reason: format!("Invalid URL format: {e}"),
            }),
        }
    }

    fn validate_tls_config(config: &TlsConfig) -> ValidationResult<()> {
        if !Path::new(&config.cert_path).exists() {
            return Err(ValidationError::InvalidTls {
                message: format!("Certificate file not found: {}", config.cert_path),
            });
        }

        if !Path::new(&config.key_path).exists() {
            return Err(ValidationError::InvalidTls {
                message: format!("Private key file not found: {}", config.key_path),
            });
        }

        Ok(())
    }

    /// Check if status code is valid for redirects
    fn is_valid_redirect_status_code(code: u16) -> bool {
        matches!(code, 301 | 302 | 303 | 307 | 308)
    }

    /// Format multiple validation errors into a single message
    fn format_multiple_errors(errors: Vec<ValidationError>) -> String {
        let mut message = format!("Found {} validation error(s):\n", errors.len());
        for (i, error) in errors.iter().enumerate() {
            message.push_str(&format!("  {}. {}\n", i + 1, error));
        }
        message
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::models::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(ConfigValidator::validate(&ServerConfig::default()).is_ok());
    }

    #[test]
    fn test_invalid_listen_address() {
        let config = ServerConfig::builder().listen_addr("invalid_address").build();

        let result = ConfigValidator::validate(&config);
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("Invalid listen address")
        );
    }

    #[test]
    fn test_invalid_pattern_is_reported_with_field() {
        let config = ServerConfig::builder()
            .admission(AdmissionConfig {
                ip_deny: Some("([unclosed".to_string()),
                ..Default::default()
            })
            .build();

        let message = ConfigValidator::validate(&config).unwrap_err().to_string();
        assert!(message.contains("admission.ip_deny"));
    }

    #[test]
    fn test_invalid_redirect_url() {
        let config = ServerConfig::builder().redirect("not_a_url", false).build();

        let message = ConfigValidator::validate(&config).unwrap_err().to_string();
        assert!(message.contains("Invalid URL"));
    }

    #[test]
    fn test_errors_are_aggregated() {
        let mut config = ServerConfig::builder()
            .listen_addr("nope")
            .redirect("ftp://example.org", true)
            .build();
        config.rejection.redirect_status = 200;
        config.upstream.routes.push(RouteOverride::new("", "x.example.com"));

        let message = ConfigValidator::validate(&config).unwrap_err().to_string();
        assert!(message.contains("Found 4 validation error(s)"));
    }

    #[test]
    fn test_empty_default_upstream_is_allowed() {
        // Requests are rejected at runtime instead.
        let config = ServerConfig::builder().upstream_hostname("").build();
        assert!(ConfigValidator::validate(&config).is_ok());
    }

    #[test]
    fn test_missing_token_route_is_only_a_warning() {
        assert!(ConfigValidator::routes_token_requests(
            &ServerConfig::default().upstream.routes
        ));
        assert!(ConfigValidator::routes_token_requests(&[RouteOverride::new(
            "token",
            "auth.example.com"
        )]));
        assert!(!ConfigValidator::routes_token_requests(&[RouteOverride::new(
            "/search",
            "index.docker.io"
        )]));

        let mut config = ServerConfig::builder().upstream_hostname("ghcr.io").build();
        config.upstream.routes.clear();
        assert!(!ConfigValidator::routes_token_requests(&config.upstream.routes));
        assert!(ConfigValidator::validate(&config).is_ok());
    }

    #[test]
    fn test_invalid_header_name() {
        let mut config = ServerConfig::default();
        config.admission.client_ip_header = "bad header".to_string();
        assert!(ConfigValidator::validate(&config).is_err());
    }
}
