use std::sync::Arc;

use axum::Router;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::api::RoleController;
use crate::cache::JobCache;
use crate::config::{Role, ServiceConfig};
use crate::controller::{
    GatewayController, PullerController, ReceiverController, SenderController,
};
use crate::error::{RelayError, Result};
use crate::repo::{HttpJobRepository, JobRepository};
use crate::shutdown::install_shutdown_handler;
use crate::transport::{
    HttpFileReceiver, HttpFileSource, HttpNextStage, HttpPeer, JwtTokenSource, TokenSource,
};

/// One running stage: its controller plus the HTTP server in front of it.
pub struct Service {
    config: ServiceConfig,
    controller: RoleController,
}

impl Service {
    /// Validate `config` and wire the clients the configured role needs.
    pub fn new(config: ServiceConfig) -> Result<Self> {
        config.validate()?;

        let tokens: Option<Arc<dyn TokenSource>> = match JwtTokenSource::from_config(&config.auth)? {
            Some(source) => {
                tracing::info!(issuer = source.issuer(), "Outbound calls carry bearer tokens");
                Some(Arc::new(source))
            }
            None => None,
        };
        let peer = |url: &str| -> Result<HttpPeer> {
            HttpPeer::new(url, config.http_timeout(), tokens.clone())
                .map_err(|e| RelayError::transport(format!("failed to set up client for {}", url), e))
        };

        let repo: Arc<dyn JobRepository> =
            Arc::new(HttpJobRepository::new(peer(&config.job_repo_url)?));
        let peer_url = config.peer_url.clone().unwrap_or_default();
        let next_stage_url = config.next_stage_url.clone().unwrap_or_default();
        let hostname = config.hostname.as_str();

        let controller = match config.role {
            Role::Sender => {
                let receiver = HttpFileReceiver::new(peer(&peer_url)?, config.read_retry.retry());
                RoleController::Sender(Arc::new(SenderController::new(
                    hostname,
                    repo,
                    Arc::new(receiver),
                )))
            }
            Role::Receiver => RoleController::Receiver(Arc::new(ReceiverController::new(
                hostname,
                config.folders.base_folder.clone().unwrap_or_default(),
                repo,
                Arc::new(HttpNextStage::new(peer(&next_stage_url)?)),
                JobCache::shared(config.cache_capacity),
            ))),
            Role::Gateway => RoleController::Gateway(Arc::new(GatewayController::new(
                hostname,
                config.folders.archive_folder.clone().unwrap_or_default(),
                repo,
                Arc::new(HttpNextStage::new(peer(&next_stage_url)?)),
                JobCache::shared(config.cache_capacity),
            ))),
            Role::Puller => RoleController::Puller(Arc::new(PullerController::new(
                hostname,
                config.folders.output_folder.clone().unwrap_or_default(),
                repo,
                Arc::new(HttpFileSource::new(peer(&peer_url)?)),
            ))),
        };

        Ok(Self { config, controller })
    }

    /// Build a service around an already wired controller.
    pub fn with_controller(config: ServiceConfig, controller: RoleController) -> Self {
        Self { config, controller }
    }

    pub fn controller(&self) -> &RoleController {
        &self.controller
    }

    pub fn router(&self) -> Router {
        self.controller.router()
    }

    /// Serve until SIGINT or SIGTERM.
    pub async fn run(self) -> Result<()> {
        let shutdown = install_shutdown_handler(self.config.role)?;
        let listener = TcpListener::bind(self.config.listen_addr).await.map_err(|e| {
            tracing::error!(addr = %self.config.listen_addr, error = %e, "Failed to bind");
            RelayError::Io(e)
        })?;
        self.serve(listener, shutdown).await
    }

    /// Run startup recovery once, then serve on `listener` until `shutdown`
    /// is cancelled.
    ///
    /// Recovery runs alongside the server because it can call back into
    /// this service through a peer.
    pub async fn serve(self, listener: TcpListener, shutdown: CancellationToken) -> Result<()> {
        let addr = listener.local_addr()?;
        tracing::info!(
            addr = %addr,
            role = ?self.config.role,
            hostname = %self.config.hostname,
            "Starting job relay service"
        );

        let stage = self.controller.stage();
        tokio::spawn(async move {
            match stage.retry_on_startup().await {
                Ok(()) => tracing::info!(owner = %stage.owner(), "Startup retry finished"),
                Err(e) => tracing::warn!(owner = %stage.owner(), error = %e, "Startup retry had failures"),
            }
        });

        axum::serve(listener, self.router())
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await?;

        tracing::info!("Service shut down");
        Ok(())
    }
}
