use anyhow::Result;
use axum::body::Body as AxumBody;
use hyper::{Request, Response};
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

use crate::core::ProxyError;
use crate::ports::http_client::HttpClientError;

/// Failures that end a request with a generic 500
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum HandlerError {
    #[error("Proxy error: {0}")]
    Proxy(#[from] ProxyError),

    #[error("Upstream error: {0}")]
    Upstream(#[from] HttpClientError),
}

/// Type alias for HTTP server run futures
pub type ServerRunFuture<'a> = Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;

/// Type alias for HTTP handler response futures
pub type HandlerResponseFuture<'a> =
    Pin<Box<dyn Future<Output = Result<Response<AxumBody>, HandlerError>> + Send + 'a>>;

/// HttpServer defines the port (interface) for accepting client traffic
pub trait HttpServer: Send + Sync + 'static {
    /// Run the HTTP server
    ///
    /// # Returns
    /// A future that resolves when the server shuts down or encounters an error
    fn run<'a>(&'a self) -> ServerRunFuture<'a>;
}

/// HttpHandler defines the port for handling one client request
pub trait HttpHandler: Send + Sync + 'static {
    fn handle_request<'a>(&'a self, req: Request<AxumBody>) -> HandlerResponseFuture<'a>;
}
