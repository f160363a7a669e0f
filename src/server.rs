use std::sync::Arc;

use riptide_core::control::{Control, ControlOptions, Orchestrator, Service};
use riptide_core::errors::ControlError;
use riptide_core::orchestrators::dummy::DummyOrchestrator;
use riptide_core::outputs::whep::{WhepConfig, WhepServer};
use riptide_core::protocols::ftl::FtlServer;
use riptide_core::services::dummy::DummyService;
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

use crate::config::{Config, OutputSource};

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("unknown service type {0:?}")]
    UnknownService(String),

    #[error("unknown orchestrator type {0:?}")]
    UnknownOrchestrator(String),

    #[error("unknown input type {0:?}")]
    UnknownInput(String),

    #[error("unknown output type {0:?}")]
    UnknownOutput(String),

    #[error("http server type {0:?} is not supported by this build")]
    UnsupportedHttpServerType(String),

    #[error("failed to bind {address}: {source}")]
    Bind {
        address: String,
        source: std::io::Error,
    },

    #[error(transparent)]
    Control(#[from] ControlError),
}

pub async fn run(config: Config) -> Result<(), ServerError> {
    let hostname = hostname::get()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "localhost".to_string());
    debug!("Server hostname: {hostname}");

    if config.control.http_server_type != "http" {
        return Err(ServerError::UnsupportedHttpServerType(
            config.control.http_server_type.clone(),
        ));
    }

    let service_kind = config
        .control
        .service
        .clone()
        .unwrap_or_else(|| config.service.kind.clone());
    let service: Arc<dyn Service> = match service_kind.as_str() {
        "dummy" => Arc::new(DummyService::new()),
        other => return Err(ServerError::UnknownService(other.to_string())),
    };

    let orchestrator_kind = config
        .control
        .orchestrator
        .clone()
        .unwrap_or_else(|| config.orchestrator.kind.clone());
    let orchestrator: Arc<dyn Orchestrator> = match orchestrator_kind.as_str() {
        "dummy" => Arc::new(DummyOrchestrator::new()),
        other => return Err(ServerError::UnknownOrchestrator(other.to_string())),
    };

    // The WHEP output doubles as the thumbnail loopback target.
    let whep_output = config
        .output
        .sources
        .iter()
        .find(|source| source.kind == "whep");
    let whep_endpoint =
        whep_output.map(|source| format!("{}/whep/endpoint", public_base(source)));

    let control = Control::new(
        service,
        orchestrator,
        ControlOptions {
            hostname,
            whep_endpoint,
        },
    );
    control.connect().await?;

    let cancel = control.shutdown_token();

    for source in &config.input.sources {
        match source.kind.as_str() {
            "ftl" => {
                let listener = bind(&source.address).await?;
                let server = FtlServer::new(control.clone());
                let cancel = cancel.clone();
                tokio::spawn(async move {
                    server.listen(listener, cancel).await;
                });
            }
            "fs" | "janus" | "rtmp" | "whip" => {
                warn!(
                    "input type {:?} is not built into this server, skipping",
                    source.kind
                );
            }
            other => return Err(ServerError::UnknownInput(other.to_string())),
        }
    }

    for source in &config.output.sources {
        match source.kind.as_str() {
            "whep" => {
                let listener = bind(&source.address).await?;
                let server = WhepServer::new(
                    control.clone(),
                    WhepConfig {
                        public_base: public_base(source),
                    },
                );
                let cancel = cancel.clone();
                tokio::spawn(async move {
                    server.listen(listener, cancel).await;
                });
            }
            "hls" => {
                warn!("output type \"hls\" is not built into this server, skipping");
            }
            other => return Err(ServerError::UnknownOutput(other.to_string())),
        }
    }

    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("Received interrupt"),
        _ = terminate_signal() => info!("Received terminate"),
        _ = cancel.cancelled() => {}
    }

    info!("Shutting down");
    control.shutdown().await;
    Ok(())
}

fn public_base(source: &OutputSource) -> String {
    source
        .server
        .clone()
        .unwrap_or_else(|| format!("http://{}", source.address))
}

async fn bind(address: &str) -> Result<TcpListener, ServerError> {
    TcpListener::bind(address)
        .await
        .map_err(|source| ServerError::Bind {
            address: address.to_string(),
            source,
        })
}

async fn terminate_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                warn!(%err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    }
    #[cfg(not(unix))]
    std::future::pending::<()>().await;
}
