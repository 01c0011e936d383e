use axum::body::Body as AxumBody;
use hyper::{Request, Response};
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Errors raised while talking to an upstream registry
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum HttpClientError {
    /// Connecting to the upstream or reading its response head failed
    #[error("Connection error: {0}")]
    ConnectionError(String),

    /// The upstream kept redirecting past the configured limit
    #[error("Too many redirects (limit {limit}), last location: {location}")]
    TooManyRedirects { limit: usize, location: String },
}

pub type HttpClientResult<T> = Result<T, HttpClientError>;

/// Type alias for async upstream responses
pub type HttpResponseFuture<'a> =
    Pin<Box<dyn Future<Output = HttpClientResult<Response<AxumBody>>> + Send + 'a>>;

/// HttpClient is the port for fetching from upstream registries
pub trait HttpClient: Send + Sync + 'static {
    /// Send a fully prepared request upstream.
    ///
    /// Redirects are followed by the implementation; the returned response
    /// is the final one, with its body still streaming.
    fn send_request<'a>(&'a self, req: Request<AxumBody>) -> HttpResponseFuture<'a>;
}
