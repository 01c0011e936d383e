use std::path::Path;

use axum::body::Body as AxumBody;
use axum::response::{IntoResponse, Response as AxumResponse};
use bytes::Bytes;
use http::{StatusCode, header};

use crate::config::RejectionConfig;

const BUILTIN_DECOY_PAGE: &str = include_str!("../../assets/decoy.html");

/// Static HTML served to rejected clients.
#[derive(Debug, Clone)]
pub struct DecoyPage(Bytes);

impl DecoyPage {
    pub fn builtin() -> Self {
        Self(Bytes::from_static(BUILTIN_DECOY_PAGE.as_bytes()))
    }

    pub fn from_html(html: impl Into<String>) -> Self {
        Self(Bytes::from(html.into()))
    }

    /// Reads the page from disk, or falls back to the built-in page.
    pub async fn load(path: Option<&Path>) -> std::io::Result<Self> {
        match path {
            Some(path) => Ok(Self(Bytes::from(tokio::fs::read(path).await?))),
            None => Ok(Self::builtin()),
        }
    }

    pub fn response(&self) -> AxumResponse {
        (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/html; charset=utf-8")],
            self.0.clone(),
        )
            .into_response()
    }
}

#[derive(Debug, Clone)]
struct RedirectTarget {
    url: String,
    keep_path: bool,
    status: StatusCode,
}

/// What a rejected request gets back: a redirect when configured, the decoy
/// page otherwise.
#[derive(Debug, Clone)]
pub struct RejectionPolicy {
    redirect: Option<RedirectTarget>,
    decoy: DecoyPage,
}

impl RejectionPolicy {
    pub fn new(config: &RejectionConfig, decoy: DecoyPage) -> Self {
        let redirect = config.redirect_url.as_ref().map(|url| RedirectTarget {
            url: url.clone(),
            keep_path: config.keep_path,
            status: StatusCode::from_u16(config.redirect_status).unwrap_or(StatusCode::FOUND),
        });
        Self { redirect, decoy }
    }

    pub fn respond(&self, path: &str) -> AxumResponse {
        let Some(target) = &self.redirect else {
            return self.decoy.response();
        };

        let location = if target.keep_path {
            join_redirect_path(&target.url, path)
        } else {
            target.url.clone()
        };
        tracing::debug!("Redirecting rejected request to: {} with status: {}", location, target.status);

        AxumResponse::builder()
            .status(target.status)
            .header(header::LOCATION, location)
            .body(AxumBody::empty())
            .unwrap_or_else(|err| {
                tracing::error!("Failed to build redirect response: {}", err);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error").into_response()
            })
    }
}

/// `https://example.org/` + `//foo//bar` -> `https://example.org/foo/bar`.
/// Slash runs are collapsed in the appended part only, never in the scheme.
pub fn join_redirect_path(base: &str, path: &str) -> String {
    let mut joined = base.trim_end_matches('/').to_string();
    let mut previous_slash = false;
    for c in std::iter::once('/').chain(path.chars()) {
        if c == '/' && previous_slash {
            continue;
        }
        previous_slash = c == '/';
        joined.push(c);
    }
    joined
}
