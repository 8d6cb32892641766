//! Serve mode: opens the cluster store, wires the backends named in
//! one.toml into the lifecycle orchestrator, and serves the REST API
//! alongside the self-destruct runner.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::info;

use one_api::{ApiState, Authenticator};
use one_backends::{GitMirrorHost, JenkinsCi, LocalCi, LocalCluster, LocalDns};
use one_core::config::CiConfig;
use one_core::OneConfig;
use one_lifecycle::{
    CiOrchestrator, Collaborators, EnvironmentLifecycle, LifecycleSettings, NamespaceLockTable,
};
use one_state::ClusterStore;

use crate::self_destruct::{SelfDestructRunner, parse_schedule};

/// Build the API state for `config` on top of `store`.
pub fn assemble(config: &OneConfig, store: ClusterStore) -> anyhow::Result<ApiState> {
    let cluster = LocalCluster::new(store);
    cluster.seed_templates(&config.source_namespace, &config.ingress_templates)?;
    info!(
        source = %config.source_namespace,
        rules = config.ingress_templates.len(),
        "ingress templates seeded"
    );

    let ci: Arc<dyn CiOrchestrator> = match &config.ci {
        CiConfig::Local => {
            info!("using in-process ci registry");
            Arc::new(LocalCi::new())
        }
        CiConfig::Jenkins(jenkins) => {
            info!(url = %jenkins.url, folder_template = %jenkins.folder_template, "using jenkins");
            Arc::new(JenkinsCi::new(jenkins)?)
        }
    };

    let backends = Collaborators {
        git: Arc::new(GitMirrorHost::new(config.git.mirror_dir.clone())),
        ci,
        cluster: Arc::new(cluster),
        dns: Arc::new(LocalDns::new(&config.dns)),
    };
    let lifecycle = EnvironmentLifecycle::new(
        LifecycleSettings::from_config(config),
        backends,
        Arc::new(NamespaceLockTable::new()),
    );

    Ok(ApiState {
        lifecycle,
        auth: Arc::new(Authenticator::from_config(&config.auth)),
    })
}

/// Run the daemon until Ctrl-C.
pub async fn run(config_path: &Path, port: u16, data_dir: PathBuf) -> anyhow::Result<()> {
    info!("one daemon starting");

    let config = OneConfig::from_file(config_path)?;
    info!(
        path = ?config_path,
        repositories = config.repositories.len(),
        max_universe = config.capacity.max_universe,
        max_stable_universe = config.capacity.max_stable_universe,
        "configuration loaded"
    );

    parse_schedule(&config.self_destruct.schedule).map_err(|e| {
        anyhow::anyhow!("invalid self-destruct schedule {:?}: {e}", config.self_destruct.schedule)
    })?;

    std::fs::create_dir_all(&data_dir)?;
    let db_path = data_dir.join("one.redb");
    let store = ClusterStore::open(&db_path)?;
    info!(path = ?db_path, "cluster store opened");

    let state = assemble(&config, store.clone())?;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut runner = SelfDestructRunner::new(state.lifecycle.clone(), store);
    let interval = Duration::from_secs(config.self_destruct.check_interval_secs.max(1));
    let runner_handle = tokio::spawn(async move { runner.run(interval, shutdown_rx).await });

    let router = one_api::build_router(state);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(%addr, "API server starting");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("shutdown signal received");
            }
        })
        .await?;

    let _ = shutdown_tx.send(true);
    let _ = runner_handle.await;
    info!("one daemon stopped");
    Ok(())
}
