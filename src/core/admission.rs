//! Request admission: path, user-agent, client IP and region predicates.
//!
//! Every predicate is optional. Allow and deny patterns for the same
//! dimension are independent; the first failing predicate rejects.

use regex::Regex;

use crate::config::AdmissionConfig;

/// The request attributes the filter looks at. Missing headers are `None`
/// and are matched as the empty string.
#[derive(Debug, Clone, Default)]
pub struct ClientInfo {
    pub path: String,
    pub user_agent: Option<String>,
    pub ip: Option<String>,
    pub region: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    MissingHost,
    NoUpstream,
    PathMismatch,
    UserAgentNotAllowed,
    UserAgentDenied,
    IpNotAllowed,
    IpDenied,
    RegionNotAllowed,
    RegionDenied,
}

impl RejectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectReason::MissingHost => "missing_host",
            RejectReason::NoUpstream => "no_upstream",
            RejectReason::PathMismatch => "path_mismatch",
            RejectReason::UserAgentNotAllowed => "user_agent_not_allowed",
            RejectReason::UserAgentDenied => "user_agent_denied",
            RejectReason::IpNotAllowed => "ip_not_allowed",
            RejectReason::IpDenied => "ip_denied",
            RejectReason::RegionNotAllowed => "region_not_allowed",
            RejectReason::RegionDenied => "region_denied",
        }
    }
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Admit,
    Reject(RejectReason),
}

impl Admission {
    pub fn is_admitted(&self) -> bool {
        matches!(self, Admission::Admit)
    }
}

#[derive(Debug, Clone, Default)]
struct PatternPair {
    allow: Option<Regex>,
    deny: Option<Regex>,
}

enum ListVerdict {
    Pass,
    NotAllowed,
    Denied,
}

impl PatternPair {
    fn compile(allow: Option<&str>, deny: Option<&str>) -> Result<Self, regex::Error> {
        Ok(Self {
            allow: allow.map(Regex::new).transpose()?,
            deny: deny.map(Regex::new).transpose()?,
        })
    }

    fn check(&self, value: &str) -> ListVerdict {
        if let Some(allow) = &self.allow {
            if !allow.is_match(value) {
                return ListVerdict::NotAllowed;
            }
        }
        if let Some(deny) = &self.deny {
            if deny.is_match(value) {
                return ListVerdict::Denied;
            }
        }
        ListVerdict::Pass
    }
}

#[derive(Debug, Clone, Default)]
pub struct AdmissionFilter {
    path: Option<Regex>,
    user_agent: PatternPair,
    ip: PatternPair,
    region: PatternPair,
}

impl AdmissionFilter {
    pub fn new(config: &AdmissionConfig) -> Result<Self, regex::Error> {
        Ok(Self {
            path: config.path_pattern.as_deref().map(Regex::new).transpose()?,
            user_agent: PatternPair::compile(
                config.user_agent_allow.as_deref(),
                config.user_agent_deny.as_deref(),
            )?,
            ip: PatternPair::compile(config.ip_allow.as_deref(), config.ip_deny.as_deref())?,
            region: PatternPair::compile(
                config.region_allow.as_deref(),
                config.region_deny.as_deref(),
            )?,
        })
    }

    /// `upstream` is the router's choice; `None` is itself a rejection.
    pub fn evaluate(&self, upstream: Option<&str>, client: &ClientInfo) -> Admission {
        if upstream.is_none_or(str::is_empty) {
            return Admission::Reject(RejectReason::NoUpstream);
        }

        if let Some(path) = &self.path {
            if !path.is_match(&client.path) {
                return Admission::Reject(RejectReason::PathMismatch);
            }
        }

        let user_agent = client
            .user_agent
            .as_deref()
            .unwrap_or_default()
            .to_lowercase();
        match self.user_agent.check(&user_agent) {
            ListVerdict::Pass => {}
            ListVerdict::NotAllowed => return Admission::Reject(RejectReason::UserAgentNotAllowed),
            ListVerdict::Denied => return Admission::Reject(RejectReason::UserAgentDenied),
        }

        match self.ip.check(client.ip.as_deref().unwrap_or_default()) {
            ListVerdict::Pass => {}
            ListVerdict::NotAllowed => return Admission::Reject(RejectReason::IpNotAllowed),
            ListVerdict::Denied => return Admission::Reject(RejectReason::IpDenied),
        }

        match self.region.check(client.region.as_deref().unwrap_or_default()) {
            ListVerdict::Pass => Admission::Admit,
            ListVerdict::NotAllowed => Admission::Reject(RejectReason::RegionNotAllowed),
            ListVerdict::Denied => Admission::Reject(RejectReason::RegionDenied),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const UPSTREAM: Option<&str> = Some("registry-1.docker.io");

    fn filter(config: AdmissionConfig) -> AdmissionFilter {
        AdmissionFilter::new(&config).unwrap()
    }

    fn client(ip: &str, user_agent: &str, region: &str) -> ClientInfo {
        ClientInfo {
            path: "/v2/".to_string(),
            user_agent: Some(user_agent.to_string()),
            ip: Some(ip.to_string()),
            region: Some(region.to_string()),
        }
    }

    #[test]
    fn test_no_patterns_admits() {
        let filter = AdmissionFilter::default();
        assert!(filter.evaluate(UPSTREAM, &ClientInfo::default()).is_admitted());
    }

    #[test]
    fn test_missing_upstream_rejects() {
        let filter = AdmissionFilter::default();
        assert_eq!(
            filter.evaluate(None, &ClientInfo::default()),
            Admission::Reject(RejectReason::NoUpstream)
        );
        assert_eq!(
            filter.evaluate(Some(""), &ClientInfo::default()),
            Admission::Reject(RejectReason::NoUpstream)
        );
    }

    #[test]
    fn test_path_pattern() {
        let filter = filter(AdmissionConfig {
            path_pattern: Some("^/v2/library".to_string()),
            ..Default::default()
        });
        let mut info = ClientInfo::default();
        info.path = "/v2/library/ubuntu/manifests/latest".to_string();
        assert!(filter.evaluate(UPSTREAM, &info).is_admitted());

        info.path = "/v2/someone/else".to_string();
        assert_eq!(
            filter.evaluate(UPSTREAM, &info),
            Admission::Reject(RejectReason::PathMismatch)
        );
    }

    #[test]
    fn test_user_agent_is_lowercased() {
        let filter = filter(AdmissionConfig {
            user_agent_allow: Some("^docker/".to_string()),
            user_agent_deny: Some("curl".to_string()),
            ..Default::default()
        });
        assert!(
            filter
                .evaluate(UPSTREAM, &client("1.1.1.1", "Docker/24.0.7 go/go1.20", "US"))
                .is_admitted()
        );
        assert_eq!(
            filter.evaluate(UPSTREAM, &client("1.1.1.1", "Mozilla/5.0", "US")),
            Admission::Reject(RejectReason::UserAgentNotAllowed)
        );
        assert_eq!(
            filter.evaluate(UPSTREAM, &client("1.1.1.1", "docker/1 (CURL)", "US")),
            Admission::Reject(RejectReason::UserAgentDenied)
        );
    }

    #[test]
    fn test_ip_deny() {
        let filter = filter(AdmissionConfig {
            ip_deny: Some(r"^10\.".to_string()),
            ..Default::default()
        });
        assert_eq!(
            filter.evaluate(UPSTREAM, &client("10.0.0.5", "docker", "US")),
            Admission::Reject(RejectReason::IpDenied)
        );
        assert!(
            filter
                .evaluate(UPSTREAM, &client("192.168.0.5", "docker", "US"))
                .is_admitted()
        );
    }

    #[test]
    fn test_deny_applies_even_when_allowed() {
        let filter = filter(AdmissionConfig {
            ip_allow: Some(r"^10\.".to_string()),
            ip_deny: Some(r"^10\.0\.0\.5$".to_string()),
            ..Default::default()
        });
        assert_eq!(
            filter.evaluate(UPSTREAM, &client("10.0.0.5", "docker", "US")),
            Admission::Reject(RejectReason::IpDenied)
        );
        assert!(
            filter
                .evaluate(UPSTREAM, &client("10.0.0.6", "docker", "US"))
                .is_admitted()
        );
        assert_eq!(
            filter.evaluate(UPSTREAM, &client("11.0.0.6", "docker", "US")),
            Admission::Reject(RejectReason::IpNotAllowed)
        );
    }

    #[test]
    fn test_region_lists() {
        let filter = filter(AdmissionConfig {
            region_allow: Some("^(US|DE|KR)$".to_string()),
            region_deny: Some("^DE$".to_string()),
            ..Default::default()
        });
        assert!(
            filter
                .evaluate(UPSTREAM, &client("1.1.1.1", "docker", "KR"))
                .is_admitted()
        );
        assert_eq!(
            filter.evaluate(UPSTREAM, &client("1.1.1.1", "docker", "DE")),
            Admission::Reject(RejectReason::RegionDenied)
        );
        assert_eq!(
            filter.evaluate(UPSTREAM, &client("1.1.1.1", "docker", "FR")),
            Admission::Reject(RejectReason::RegionNotAllowed)
        );
    }

    #[test]
    fn test_missing_headers_match_as_empty() {
        let allow = filter(AdmissionConfig {
            ip_allow: Some(r"^\d".to_string()),
            ..Default::default()
        });
        assert_eq!(
            allow.evaluate(UPSTREAM, &ClientInfo::default()),
            Admission::Reject(RejectReason::IpNotAllowed)
        );

        let deny = filter(AdmissionConfig {
            user_agent_deny: Some("bot".to_string()),
            ip_deny: Some(r"^\d".to_string()),
            ..Default::default()
        });
        assert!(deny.evaluate(UPSTREAM, &ClientInfo::default()).is_admitted());
    }

    #[test]
    fn test_invalid_pattern_fails_to_compile() {
        let result = AdmissionFilter::new(&AdmissionConfig {
            region_deny: Some("(".to_string()),
            ..Default::default()
        });
        assert!(result.is_err());
    }
}
