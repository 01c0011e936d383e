use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use axum::body::Body as AxumBody;
use axum::routing::get;
use axum::{
    Router,
    http::Request,
    response::{IntoResponse, Response as AxumResponse},
};
use axum_server::tls_rustls::RustlsConfig;
use hyper::StatusCode;
use metrics_exporter_prometheus::PrometheusHandle;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use crate::adapters::http_handler::MirrorHandler;
use crate::config::models::{ServerConfig, TlsConfig};
use crate::core::ProxyService;
use crate::ports::http_client::HttpClient;
use crate::ports::http_server::{HttpHandler, HttpServer, ServerRunFuture};

const SHUTDOWN_GRACE_PERIOD: Duration = Duration::from_secs(30);

/// The listening side. Listen address, TLS and the metrics route are fixed
/// at startup; everything the handler uses is swapped through the holder.
pub struct HyperServer {
    proxy_service_holder: Arc<RwLock<Arc<ProxyService>>>,
    http_client: Arc<dyn HttpClient>,
    config: Arc<ServerConfig>,
    metrics_handle: Option<PrometheusHandle>,
}

impl HyperServer {
    pub fn with_dependencies(
        proxy_service_holder: Arc<RwLock<Arc<ProxyService>>>,
        http_client: Arc<dyn HttpClient>,
        config: Arc<ServerConfig>,
        metrics_handle: Option<PrometheusHandle>,
    ) -> Self {
        Self {
            proxy_service_holder,
            http_client,
            config,
            metrics_handle,
        }
    }

    fn build_app(&self) -> Router {
        let handler = MirrorHandler::new(
            self.proxy_service_holder.clone(),
            self.http_client.clone(),
        );

        let mut router = Router::new();
        if let Some(handle) = self.metrics_handle.clone() {
            tracing::info!("Serving metrics on {}", self.config.metrics.path);
            router = router.route(
                &self.config.metrics.path,
                get(move || std::future::ready(handle.render())),
            );
        }

        router
            .fallback(move |req: Request<AxumBody>| handle_request(handler.clone(), req))
            .layer(TraceLayer::new_for_http())
    }

    async fn serve(&self) -> Result<()> {
        let app = self.build_app();
        let addr: SocketAddr = self
            .config
            .listen_addr
            .parse()
            .with_context(|| format!("Invalid listen address: {}", self.config.listen_addr))?;

        if let Some(tls_config) = &self.config.tls {
            tracing::info!("Starting server with TLS on {}", addr);
            let tls_acceptor = load_rustls_config(tls_config).await?;

            let handle = axum_server::Handle::new();
            let shutdown_handle = handle.clone();
            tokio::spawn(async move {
                shutdown_signal().await;
                shutdown_handle.graceful_shutdown(Some(SHUTDOWN_GRACE_PERIOD));
            });

            axum_server::bind_rustls(addr, tls_acceptor)
                .handle(handle)
                .serve(app.into_make_service())
                .await
                .map_err(|e| anyhow!("TLS Server error: {}", e))?;
        } else {
            tracing::info!("Starting server without TLS on {}", addr);
            let listener = TcpListener::bind(addr)
                .await
                .with_context(|| format!("Failed to bind to address: {}", addr))?;

            axum::serve(listener, app.into_make_service())
                .with_graceful_shutdown(shutdown_signal())
                .await
                .map_err(|e| anyhow!("HTTP Server error: {}", e))?;
        }

        tracing::info!("Server stopped");
        Ok(())
    }
}

impl HttpServer for HyperServer {
    fn run<'a>(&'a self) -> ServerRunFuture<'a> {
        Box::pin(self.serve())
    }
}

async fn load_rustls_config(tls_config: &TlsConfig) -> Result<RustlsConfig> {
    let cert_path = &tls_config.cert_path;
    let key_path = &tls_config.key_path;
    let cert_data = tokio::fs::read(cert_path)
        .await
        .with_context(|| format!("Failed to read certificate file: {}", cert_path))?;
    let key_data = tokio::fs::read(key_path)
        .await
        .with_context(|| format!("Failed to read key file: {}", key_path))?;
    let cert_chain: Vec<CertificateDer<'static>> =
        rustls_pemfile::certs(&mut cert_data.as_slice())
            .collect::<Result<_, _>>()
            .context("Failed to parse certificate PEM")?;
    let key_der: PrivateKeyDer<'static> = rustls_pemfile::private_key(&mut key_data.as_slice())
        .with_context(|| format!("Failed to parse private key file: {}", key_path))?
        .ok_or_else(|| anyhow!("No private key found in {}", key_path))?;

    // The crypto provider is installed once in main.
    let server_config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(cert_chain, key_der)
        .context("Failed to create TLS server config")?;

    Ok(RustlsConfig::from_config(Arc::new(server_config)))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", err);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                tracing::error!("Failed to listen for SIGTERM: {}", err);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("Shutdown signal received, draining connections...");
}

/// The single failure boundary: the handler has already logged the error, the
/// client only learns that something went wrong.
async fn handle_request(
    handler: MirrorHandler,
    req: Request<AxumBody>,
) -> Result<AxumResponse, Infallible> {
    match handler.handle_request(req).await {
        Ok(response) => Ok(response),
        Err(_) => Ok((StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error").into_response()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::DecoyPage;
    use crate::ports::http_client::{HttpClientError, HttpResponseFuture};
    use http_body_util::BodyExt;
    use metrics_exporter_prometheus::PrometheusBuilder;
    use std::sync::Mutex;
    use tower::ServiceExt;
    use tracing::field::{Field, Visit};
    use tracing_subscriber::layer::{Context, SubscriberExt};
    use tracing_subscriber::Layer;

    /// Collects the message of every event emitted while installed.
    #[derive(Clone, Default)]
    struct CapturedMessages(Arc<Mutex<Vec<String>>>);

    impl CapturedMessages {
        fn count(&self, message: &str) -> usize {
            self.0.lock().unwrap().iter().filter(|m| *m == message).count()
        }
    }

    struct MessageVisitor(Option<String>);

    impl Visit for MessageVisitor {
        fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
            if field.name() == "message" {
                self.0 = Some(format!("{value:?}"));
            }
        }
    }

    impl<S: tracing::Subscriber> Layer<S> for CapturedMessages {
        fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
            let mut visitor = MessageVisitor(None);
            event.record(&mut visitor);
            if let Some(message) = visitor.0 {
                self.0.lock().unwrap().push(message);
            }
        }
    }

    struct FailingClient;

    impl HttpClient for FailingClient {
        fn send_request<'a>(&'a self, _req: Request<AxumBody>) -> HttpResponseFuture<'a> {
            Box::pin(async {
                Err(HttpClientError::ConnectionError(
                    "dns error: registry-1.docker.io".to_string(),
                ))
            })
        }
    }

    fn server(config: ServerConfig, metrics_handle: Option<PrometheusHandle>) -> HyperServer {
        let service = ProxyService::new(&config, DecoyPage::builtin()).unwrap();
        HyperServer::with_dependencies(
            Arc::new(RwLock::new(Arc::new(service))),
            Arc::new(FailingClient),
            Arc::new(config),
            metrics_handle,
        )
    }

    fn request(path: &str) -> Request<AxumBody> {
        Request::builder()
            .uri(path)
            .header(hyper::header::HOST, "mirror.example.com")
            .body(AxumBody::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn test_upstream_failure_becomes_generic_500() {
        let messages = CapturedMessages::default();
        let _guard =
            tracing::subscriber::set_default(tracing_subscriber::registry().with(messages.clone()));
        let app = server(ServerConfig::default(), None).build_app();

        let response = app.oneshot(request("/v2/")).await.unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"Internal Server Error");
        assert_eq!(messages.count("Fetch error"), 1);
    }

    #[tokio::test]
    async fn test_metrics_route_only_when_enabled() {
        let mut config = ServerConfig::default();
        config.metrics.enabled = true;
        let handle = PrometheusBuilder::new().build_recorder().handle();
        let app = server(config, Some(handle)).build_app();

        let response = app.oneshot(request("/-/metrics")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        // Without a handle the path falls through to the mirror.
        let app = server(ServerConfig::default(), None).build_app();
        let response = app.oneshot(request("/-/metrics")).await.unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
