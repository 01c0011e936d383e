use axum::body::Body as AxumBody;
use http::header::{self, HeaderMap};
use http::{Method, StatusCode, Uri};
use hyper::{Request, Response};
use hyper_rustls::HttpsConnector;
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
use url::Url;

use crate::ports::http_client::{HttpClient, HttpClientError, HttpClientResult, HttpResponseFuture};

/// Headers that must not follow a redirect onto another host.
const CREDENTIAL_HEADERS: [header::HeaderName; 2] = [header::AUTHORIZATION, header::COOKIE];

/// Upstream client over hyper with rustls. Redirects are followed here so
/// clients of the mirror only ever see the final upstream response.
pub struct HyperHttpClient {
    client: Client<HttpsConnector<HttpConnector>, AxumBody>,
    max_redirects: usize,
}

impl HyperHttpClient {
    pub fn new(max_redirects: usize) -> anyhow::Result<Self> {
        let https = hyper_rustls::HttpsConnectorBuilder::new()
            .with_native_roots()?
            .https_or_http()
            .enable_http1()
            .enable_http2()
            .build();
        let client = Client::builder(TokioExecutor::new()).build(https);

        tracing::info!("Created upstream client (max redirects: {})", max_redirects);
        Ok(Self {
            client,
            max_redirects,
        })
    }

    async fn fetch(&self, req: Request<AxumBody>) -> HttpClientResult<Response<AxumBody>> {
        let method = req.method().clone();
        let uri = req.uri().clone();
        tracing::debug!("Sending upstream request: {} {}", method, uri);

        let response = self.client.request(req).await.map_err(|err| {
            HttpClientError::ConnectionError(format!("{method} {uri}: {err}"))
        })?;
        tracing::debug!("Upstream responded to {} {}: status={}", method, uri, response.status());
        Ok(response.map(AxumBody::new))
    }

    async fn send_following_redirects(
        &self,
        req: Request<AxumBody>,
    ) -> HttpClientResult<Response<AxumBody>> {
        let mut method = req.method().clone();
        let mut uri = req.uri().clone();
        let mut headers = req.headers().clone();
        let mut response = self.fetch(req).await?;

        for _ in 0..self.max_redirects {
            let Some((next, next_method)) = self.follow_up(&response, &uri, &method) else {
                return Ok(response);
            };

            if next_method != method {
                headers.remove(header::CONTENT_LENGTH);
                headers.remove(header::CONTENT_TYPE);
            }
            if next.host() != uri.host() {
                for name in &CREDENTIAL_HEADERS {
                    headers.remove(name);
                }
            }
            method = next_method;
            uri = next;

            tracing::debug!("Following upstream redirect to {}", uri);
            response = self.fetch(rebuild_request(&method, &uri, &headers)).await?;
        }

        match self.follow_up(&response, &uri, &method) {
            Some((location, _)) => Err(HttpClientError::TooManyRedirects {
                limit: self.max_redirects,
                location: location.to_string(),
            }),
            None => Ok(response),
        }
    }

    /// Where and how to go next, or `None` when `response` is final.
    fn follow_up<B>(
        &self,
        response: &Response<B>,
        uri: &Uri,
        method: &Method,
    ) -> Option<(Uri, Method)> {
        let next = redirect_target(response, uri)?;
        let Some(next_method) = redirect_method(response.status(), method) else {
            tracing::debug!(
                "Not following {} for {} {}: body cannot be replayed",
                response.status(),
                method,
                uri
            );
            return None;
        };
        Some((next, next_method))
    }
}

impl HttpClient for HyperHttpClient {
    fn send_request<'a>(&'a self, req: Request<AxumBody>) -> HttpResponseFuture<'a> {
        Box::pin(self.send_following_redirects(req))
    }
}

/// Absolute location of a redirect response, resolved against `current`.
fn redirect_target<B>(response: &Response<B>, current: &Uri) -> Option<Uri> {
    if !matches!(
        response.status(),
        StatusCode::MOVED_PERMANENTLY
            | StatusCode::FOUND
            | StatusCode::SEE_OTHER
            | StatusCode::TEMPORARY_REDIRECT
            | StatusCode::PERMANENT_REDIRECT
    ) {
        return None;
    }
    let location = response.headers().get(header::LOCATION)?.to_str().ok()?;
    let resolved = Url::parse(location)
        .or_else(|_| Url::parse(&current.to_string()).and_then(|base| base.join(location)));
    match resolved {
        Ok(url) => url.as_str().parse().ok(),
        Err(err) => {
            tracing::warn!("Ignoring unparseable upstream redirect {:?}: {}", location, err);
            None
        }
    }
}

/// Method for the follow-up request, or `None` when the original body would
/// have to be sent again.
fn redirect_method(status: StatusCode, method: &Method) -> Option<Method> {
    let bodiless = *method == Method::GET || *method == Method::HEAD;
    match status {
        StatusCode::SEE_OTHER if *method == Method::HEAD => Some(Method::HEAD),
        StatusCode::SEE_OTHER => Some(Method::GET),
        StatusCode::MOVED_PERMANENTLY | StatusCode::FOUND if !bodiless => Some(Method::GET),
        _ if bodiless => Some(method.clone()),
        _ => None,
    }
}

fn rebuild_request(method: &Method, uri: &Uri, headers: &HeaderMap) -> Request<AxumBody> {
    let mut req = Request::new(AxumBody::empty());
    *req.method_mut() = method.clone();
    *req.uri_mut() = uri.clone();
    *req.headers_mut() = headers.clone();
    req
}
