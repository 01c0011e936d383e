use axum::body::Body as AxumBody;
use axum::response::Response as AxumResponse;
use http::header::{self, HeaderMap, HeaderName, HeaderValue};
use http::uri::{Authority, PathAndQuery};
use http::{Method, Request, Response, StatusCode, Uri};
use http_body_util::BodyExt;
use thiserror::Error;

use crate::config::{BodyRewriteScope, ServerConfig, UpstreamProtocol};
use crate::core::admission::{Admission, AdmissionFilter, ClientInfo};
use crate::core::rejection::{DecoyPage, RejectionPolicy};
use crate::core::rewrite::HostRewriter;
use crate::core::router::UpstreamRouter;

/// Headers that describe a single connection and are never forwarded.
const HOP_BY_HOP_HEADERS: [&str; 7] = [
    "connection",
    "keep-alive",
    "proxy-connection",
    "transfer-encoding",
    "te",
    "trailer",
    "upgrade",
];

#[derive(Error, Debug)]
pub enum ProxyError {
    #[error("Invalid upstream URI: {0}")]
    InvalidUri(#[from] http::Error),

    #[error("Invalid rewrite pattern: {0}")]
    Pattern(#[from] regex::Error),

    #[error("Invalid header name: {0}")]
    HeaderName(#[from] http::header::InvalidHeaderName),

    #[error("Failed to read upstream body: {0}")]
    Body(#[source] axum::Error),
}

/// The client-facing and upstream hostnames of one mirrored request.
#[derive(Debug, Clone, Copy)]
pub struct MirrorTarget<'a> {
    pub origin: &'a str,
    pub upstream: &'a str,
}

/// One immutable configuration generation, compiled. Every request works on
/// a single `ProxyService` from start to finish.
#[derive(Debug)]
pub struct ProxyService {
    router: UpstreamRouter,
    admission: AdmissionFilter,
    rejection: RejectionPolicy,
    protocol: UpstreamProtocol,
    origin_override: Option<String>,
    auth_endpoint: String,
    body_scope: Option<String>,
    textual_content_types: Vec<String>,
    strip_csp: bool,
    client_ip_header: HeaderName,
    region_header: HeaderName,
}

impl ProxyService {
    pub fn new(config: &ServerConfig, decoy: DecoyPage) -> Result<Self, ProxyError> {
        let body_scope = match config.rewrite.body_scope {
            BodyRewriteScope::PathScoped => config
                .admission
                .path_pattern
                .as_deref()
                .map(|pattern| pattern.strip_prefix('^').unwrap_or(pattern).to_string()),
            BodyRewriteScope::Everywhere => None,
        };
        if let Some(suffix) = &body_scope {
            // Fail now rather than on the first textual response.
            regex::Regex::new(suffix)?;
        }

        Ok(Self {
            router: UpstreamRouter::from_config(&config.upstream),
            admission: AdmissionFilter::new(&config.admission)?,
            rejection: RejectionPolicy::new(&config.rejection, decoy),
            protocol: config.upstream.protocol,
            origin_override: config
                .rewrite
                .origin_hostname
                .as_deref()
                .filter(|host| !host.is_empty())
                .map(str::to_ascii_lowercase),
            auth_endpoint: config.rewrite.auth_endpoint.clone(),
            body_scope,
            textual_content_types: config.rewrite.textual_content_types.clone(),
            strip_csp: config.debug,
            client_ip_header: config.admission.client_ip_header.parse()?,
            region_header: config.admission.region_header.parse()?,
        })
    }

    pub fn route(&self, path: &str) -> Option<&str> {
        self.router.resolve(path)
    }

    pub fn admit(&self, upstream: Option<&str>, client: &ClientInfo) -> Admission {
        self.admission.evaluate(upstream, client)
    }

    pub fn reject(&self, path: &str) -> AxumResponse {
        self.rejection.respond(path)
    }

    pub fn client_info<B>(&self, req: &Request<B>) -> ClientInfo {
        let header_text = |name: &HeaderName| {
            req.headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };
        ClientInfo {
            path: req.uri().path().to_string(),
            user_agent: header_text(&header::USER_AGENT),
            ip: header_text(&self.client_ip_header),
            region: header_text(&self.region_header),
        }
    }

    /// The hostname the client used to reach us, without port.
    pub fn origin_hostname<B>(&self, req: &Request<B>) -> Option<String> {
        if let Some(host) = &self.origin_override {
            return Some(host.clone());
        }
        req.headers()
            .get(header::HOST)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<Authority>().ok())
            .map(|authority| authority.host().to_ascii_lowercase())
            .or_else(|| req.uri().host().map(str::to_ascii_lowercase))
            .filter(|host| !host.is_empty())
    }

    /// Same path and query, upstream scheme and host.
    pub fn upstream_uri(&self, uri: &Uri, upstream: &str) -> Result<Uri, ProxyError> {
        let path_and_query = uri
            .path_and_query()
            .cloned()
            .unwrap_or_else(|| PathAndQuery::from_static("/"));
        Ok(Uri::builder()
            .scheme(self.protocol.scheme())
            .authority(upstream)
            .path_and_query(path_and_query)
            .build()?)
    }

    /// Builds the outbound request. The body stream is moved, never buffered.
    pub fn upstream_request(
        &self,
        req: Request<AxumBody>,
        target: MirrorTarget<'_>,
    ) -> Result<Request<AxumBody>, ProxyError> {
        let uri = self.upstream_uri(req.uri(), target.upstream)?;
        let (parts, body) = req.into_parts();

        let rewriter = HostRewriter::new(target.origin, target.upstream)?;
        let mut headers = rewriter.rewrite_headers(&parts.headers);
        headers.remove(header::HOST);
        strip_hop_by_hop(&mut headers);
        // Textual bodies are rewritten byte for byte, so ask for them unencoded.
        headers.insert(header::ACCEPT_ENCODING, HeaderValue::from_static("identity"));

        let mut outbound = Request::new(body);
        *outbound.method_mut() = parts.method;
        *outbound.uri_mut() = uri;
        *outbound.headers_mut() = headers;
        Ok(outbound)
    }

    /// Rewrites upstream hostnames back to the origin. Only textual bodies are
    /// read into memory; everything else streams through untouched.
    pub async fn mirror_response(
        &self,
        response: Response<AxumBody>,
        target: MirrorTarget<'_>,
        method: &Method,
    ) -> Result<AxumResponse, ProxyError> {
        let (mut parts, body) = response.into_parts();

        let header_rewriter = HostRewriter::new(target.upstream, target.origin)?;
        let mut headers = header_rewriter.rewrite_headers(&parts.headers);
        strip_hop_by_hop(&mut headers);
        if self.strip_csp {
            headers.remove(header::CONTENT_SECURITY_POLICY);
        }
        self.rewrite_auth_challenge(&mut headers, target.origin);

        let has_body = method != Method::HEAD
            && parts.status != StatusCode::NO_CONTENT
            && parts.status != StatusCode::NOT_MODIFIED;
        if !has_body || !self.is_textual(&headers) {
            parts.headers = headers;
            return Ok(Response::from_parts(parts, body));
        }

        let bytes = body.collect().await.map_err(ProxyError::Body)?.to_bytes();
        let text = String::from_utf8_lossy(&bytes);
        let body_rewriter = match &self.body_scope {
            Some(suffix) => HostRewriter::scoped(target.upstream, target.origin, suffix)?,
            None => header_rewriter,
        };
        let rewritten = body_rewriter.rewrite(&text).into_owned();

        headers.insert(header::CONTENT_LENGTH, HeaderValue::from(rewritten.len()));
        parts.headers = headers;
        Ok(Response::from_parts(parts, AxumBody::from(rewritten)))
    }

    fn is_textual(&self, headers: &HeaderMap) -> bool {
        headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|content_type| {
                self.textual_content_types
                    .iter()
                    .any(|textual| content_type.contains(textual.as_str()))
            })
    }

    /// Points registry token challenges back at the mirror's own `/token`.
    fn rewrite_auth_challenge(&self, headers: &mut HeaderMap, origin: &str) {
        if !headers.contains_key(header::WWW_AUTHENTICATE) {
            return;
        }
        let replacement = format!("{origin}/token");
        let challenges: Vec<HeaderValue> = headers
            .get_all(header::WWW_AUTHENTICATE)
            .iter()
            .map(|value| match value.to_str() {
                Ok(text) if text.contains(self.auth_endpoint.as_str()) => {
                    HeaderValue::from_str(&text.replacen(self.auth_endpoint.as_str(), &replacement, 1))
                        .unwrap_or_else(|_| value.clone())
                }
                _ => value.clone(),
            })
            .collect();

        headers.remove(header::WWW_AUTHENTICATE);
        for challenge in challenges {
            headers.append(header::WWW_AUTHENTICATE, challenge);
        }
    }
}

fn strip_hop_by_hop(headers: &mut HeaderMap) {
    for name in HOP_BY_HOP_HEADERS {
        headers.remove(name);
    }
}
