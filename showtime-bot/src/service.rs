//! Service wiring.
//!
//! ```text
//! Transport ──events──▶ SessionLifecycleManager ──inbound──▶ IdentityLanes
//!                              │  ▲                               │
//!                       status │  │ current_session()             ▼
//!                              ▼  └──────────────────── MessageOrchestrator ◀── RefreshScheduler
//!                          observers                   (caches, store, retry)
//! ```

use anyhow::Context;
use showtime_common::Config;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::catalog::{DetailSource, HttpCatalogSource, HttpDetailSource};
use crate::cli::CliTransport;
use crate::dispatch::IdentityLanes;
use crate::llm::OpenAiCompatibleGenerator;
use crate::orchestrator::{MessageOrchestrator, Sources};
use crate::schedule::{RefreshJob, RefreshScheduler};
use crate::session::{SessionHandle, SessionLifecycleManager, SessionState};
use crate::sweeper::{EvictionSweeper, SweeperHandle};
use crate::transport::Transport;

/// Every running component of the bot.
pub struct Service {
    session: SessionHandle,
    orchestrator: Arc<MessageOrchestrator>,
    scheduler: RefreshScheduler,
    manager: JoinHandle<()>,
    sweeper: SweeperHandle,
    lanes: IdentityLanes,
    tasks: Vec<JoinHandle<()>>,
}

impl Service {
    /// Build and spawn the components. The session is not connected until
    /// [`SessionHandle::initialize`] is called.
    pub fn start(config: &Config, transport: Arc<dyn Transport>, sources: Sources) -> Self {
        let (inbound_tx, inbound_rx) = mpsc::channel(config.dispatch.inbound_buffer.max(1));

        let (manager, session) =
            SessionLifecycleManager::new(config.session.clone(), transport, inbound_tx);
        let orchestrator = Arc::new(MessageOrchestrator::new(config, sources, session.clone()));

        let sweeper = EvictionSweeper::new()
            .register(orchestrator.conversations(), config.conversation.sweep_period())
            .register(
                Arc::new(orchestrator.detail_cache()),
                config.cache.detail_sweep_period(),
            )
            .spawn();

        let lanes = IdentityLanes::new(
            orchestrator.clone(),
            config.dispatch.lane_idle(),
            config.dispatch.lane_queue_depth,
        );
        let mut tasks = vec![lanes.clone().spawn(inbound_rx), spawn_status_logger(&session)];
        if config.session.prewarm_catalog {
            tasks.push(orchestrator.spawn_prewarm());
        }

        let scheduler = RefreshScheduler::new(orchestrator.clone());
        for job in &config.schedule.jobs {
            match RefreshJob::from_config(job) {
                Ok(job) => {
                    scheduler.add(job);
                }
                Err(e) => warn!(job_id = %job.id, error = %e, "Skipping invalid refresh job"),
            }
        }

        let manager = manager.spawn();
        info!(
            sweepers = sweeper.task_count(),
            jobs = scheduler.list().len(),
            "Service components started"
        );

        Self {
            session,
            orchestrator,
            scheduler,
            manager,
            sweeper,
            lanes,
            tasks,
        }
    }

    pub fn session(&self) -> &SessionHandle {
        &self.session
    }

    pub fn orchestrator(&self) -> &Arc<MessageOrchestrator> {
        &self.orchestrator
    }

    pub fn scheduler(&self) -> &RefreshScheduler {
        &self.scheduler
    }

    /// Close the session and stop every background task.
    pub async fn shutdown(self) {
        if self.session.shutdown().await.is_ok() {
            if let Err(e) = self.manager.await {
                warn!(error = %e, "Session manager task ended abnormally");
            }
        }
        self.scheduler.clear();
        self.sweeper.shutdown();
        for task in &self.tasks {
            task.abort();
        }
        self.lanes.shutdown();
        info!("Service stopped");
    }
}

/// Log status changes; the pairing code is surfaced here for the operator.
fn spawn_status_logger(session: &SessionHandle) -> JoinHandle<()> {
    let (_, mut rx) = session.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(update) => {
                    if let Some(code) = &update.pairing_code {
                        info!(pairing_code = %code, "Link the device with this pairing code");
                    } else if update.state == SessionState::Failed {
                        warn!(message = %update.message, "Session failed");
                    }
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Status logger lagged");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

/// Sources built from configuration.
pub fn sources_from_config(config: &Config) -> anyhow::Result<Sources> {
    let timeout = config.retry.call_timeout();
    let listings_url = config
        .catalog
        .listings_url
        .clone()
        .context("catalog.listings_url is not set (or SHOWTIME_CATALOG_URL)")?;

    let details = match config.catalog.details_url.clone() {
        Some(url) => Some(Arc::new(HttpDetailSource::new(url, timeout)?) as Arc<dyn DetailSource>),
        None => None,
    };

    if config.llm.api_key.is_none() {
        warn!("No LLM API key configured, replies will fail until one is set");
    }

    Ok(Sources {
        catalog: Arc::new(HttpCatalogSource::new(listings_url, timeout)?),
        details,
        generator: Arc::new(OpenAiCompatibleGenerator::new(&config.llm, timeout)?),
    })
}

/// Run the bot on the terminal transport until ctrl-c.
pub async fn start_service(config: &Config) -> anyhow::Result<()> {
    let sources = sources_from_config(config)?;
    let service = Service::start(config, Arc::new(CliTransport::new()), sources);

    service.session().initialize().await?;
    info!("Showtime bot running, press ctrl-c to stop");

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    service.shutdown().await;
    Ok(())
}
