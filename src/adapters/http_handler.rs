use std::sync::{Arc, RwLock};

use axum::body::Body as AxumBody;
use axum::response::Response as AxumResponse;
use hyper::Request;

use crate::core::{Admission, ClientInfo, MirrorTarget, ProxyService, RejectReason};
use crate::metrics::{self, RequestOutcome, UpstreamTimer};
use crate::ports::http_client::HttpClient;
use crate::ports::http_server::{HandlerError, HandlerResponseFuture, HttpHandler};

/// Runs one request through Router, Admission, the request transformer, the
/// upstream call and the response transformer.
#[derive(Clone)]
pub struct MirrorHandler {
    proxy_service_holder: Arc<RwLock<Arc<ProxyService>>>,
    http_client: Arc<dyn HttpClient>,
}

impl MirrorHandler {
    pub fn new(
        proxy_service_holder: Arc<RwLock<Arc<ProxyService>>>,
        http_client: Arc<dyn HttpClient>,
    ) -> Self {
        Self {
            proxy_service_holder,
            http_client,
        }
    }

    /// The configuration generation this request will use from start to finish.
    fn snapshot(&self) -> Arc<ProxyService> {
        match self.proxy_service_holder.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    async fn mirror(
        &self,
        service: &ProxyService,
        req: Request<AxumBody>,
        client: &ClientInfo,
        url: &str,
    ) -> Result<AxumResponse, HandlerError> {
        let Some(origin) = service.origin_hostname(&req) else {
            return Ok(reject(service, client, url, RejectReason::MissingHost));
        };

        let routed = service.route(&client.path);
        let upstream = match (routed, service.admit(routed, client)) {
            (Some(upstream), Admission::Admit) => upstream,
            (_, Admission::Reject(reason)) => return Ok(reject(service, client, url, reason)),
            (None, Admission::Admit) => {
                return Ok(reject(service, client, url, RejectReason::NoUpstream));
            }
        };
        tracing::debug!(upstream = %upstream, origin = %origin, path = %client.path, "Routing request");

        let method = req.method().clone();
        let target = MirrorTarget {
            origin: &origin,
            upstream,
        };
        let outbound = service.upstream_request(req, target)?;

        let response = {
            let _timer = UpstreamTimer::new(upstream);
            self.http_client.send_request(outbound).await?
        };
        metrics::increment_upstream_response_total(upstream, response.status().as_u16());

        let response = service.mirror_response(response, target, &method).await?;
        metrics::increment_request_total(RequestOutcome::Forwarded);
        Ok(response)
    }
}

fn reject(
    service: &ProxyService,
    client: &ClientInfo,
    url: &str,
    reason: RejectReason,
) -> AxumResponse {
    tracing::warn!(
        client_ip = client.ip.as_deref().unwrap_or_default(),
        user_agent = client.user_agent.as_deref().unwrap_or_default(),
        url = %url,
        reason = %reason,
        "Invalid"
    );
    metrics::increment_request_total(RequestOutcome::Rejected);
    metrics::increment_rejection_total(reason);
    service.reject(&client.path)
}

impl HttpHandler for MirrorHandler {
    fn handle_request<'a>(&'a self, req: Request<AxumBody>) -> HandlerResponseFuture<'a> {
        Box::pin(async move {
            let service = self.snapshot();
            let client = service.client_info(&req);
            let url = req.uri().to_string();

            let result = self.mirror(&service, req, &client, &url).await;
            if let Err(err) = &result {
                tracing::error!(
                    client_ip = client.ip.as_deref().unwrap_or_default(),
                    user_agent = client.user_agent.as_deref().unwrap_or_default(),
                    url = %url,
                    error = %err,
                    "Fetch error"
                );
                metrics::increment_request_total(RequestOutcome::Failed);
            }
            result
        })
    }
}
