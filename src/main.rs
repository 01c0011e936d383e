use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::{Arc, RwLock};

use anyhow::Context;
use clap::Parser;

use regmirror::config::{ConfigValidator, load_with_env};
use regmirror::ports::http_client::HttpClient;
use regmirror::ports::http_server::HttpServer;
use regmirror::{ConfigWatcher, HyperHttpClient, HyperServer, compile_generation, metrics, tracing_setup};

#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// YAML configuration file; defaults and environment apply when it is missing
    #[clap(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Validate the configuration and exit
    #[clap(long)]
    check: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let args = Args::parse();

    let config = load_with_env(&args.config)
        .await
        .with_context(|| format!("Failed to load configuration from {}", args.config.display()))?;

    if args.check {
        return Ok(match ConfigValidator::validate(&config) {
            Ok(()) => {
                println!("Configuration OK");
                ExitCode::SUCCESS
            }
            Err(err) => {
                eprintln!("{err}");
                ExitCode::FAILURE
            }
        });
    }

    tracing_setup::init_tracing(config.logging.format)
        .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {}", e))?;

    if rustls::crypto::aws_lc_rs::default_provider()
        .install_default()
        .is_err()
    {
        tracing::debug!("rustls crypto provider already installed");
    }

    let service = compile_generation(&config).await?;
    tracing::info!(
        upstream = %config.upstream.hostname,
        protocol = %config.upstream.protocol,
        routes = config.upstream.routes.len(),
        "Mirror configured"
    );
    let proxy_service_holder = Arc::new(RwLock::new(Arc::new(service)));

    let metrics_handle = if config.metrics.enabled {
        Some(metrics::install_prometheus_recorder()?)
    } else {
        None
    };

    let http_client: Arc<dyn HttpClient> =
        Arc::new(HyperHttpClient::new(config.upstream.max_redirects)?);

    let _watcher = if args.config.exists() {
        Some(ConfigWatcher::spawn(
            args.config.clone(),
            proxy_service_holder.clone(),
        )?)
    } else {
        None
    };

    let server = HyperServer::with_dependencies(
        proxy_service_holder,
        http_client,
        Arc::new(config),
        metrics_handle,
    );
    server.run().await?;

    Ok(ExitCode::SUCCESS)
}
