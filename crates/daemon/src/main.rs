// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `outpostd`: the infrastructure job agent.

use std::process::ExitCode;
use std::sync::Arc;

use outpost_adapters::{KubeSecretProvider, KubernetesBackend, TracingMetricsSink};
use outpost_daemon::lifecycle::{self, Config, LifecycleError};
use outpost_daemon::{env, ListenCtx, Listener, WsTransport};
use outpost_engine::{RuntimeDeps, Transport};
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> ExitCode {
    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("outpostd: {e}");
            return ExitCode::FAILURE;
        }
    };
    let _log_guard = match lifecycle::init_logging(&config.log_path) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("outpostd: {e}");
            return ExitCode::FAILURE;
        }
    };

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "daemon failed");
            eprintln!("outpostd: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(config: Config) -> Result<(), LifecycleError> {
    info!(state_dir = %config.state_dir.display(), "starting outpostd");

    let client = kube::Client::try_default()
        .await
        .map_err(|e| LifecycleError::Kubernetes(e.to_string()))?;
    let kube_config = env::kube_config();
    let deps = RuntimeDeps {
        secrets: Arc::new(KubeSecretProvider::new(client.clone(), kube_config.namespace.clone())),
        backend: Arc::new(KubernetesBackend::new(client, kube_config)),
        metrics: Arc::new(TracingMetricsSink),
    };

    let transport = env::control_url().map(|url| {
        info!(%url, "control plane configured");
        Arc::new(WsTransport::new(url, env::control_token())) as Arc<dyn Transport>
    });
    if transport.is_none() {
        warn!("OUTPOST_CONTROL_URL not set, running without a control plane");
    }

    let shutdown = CancellationToken::new();
    let started = lifecycle::startup(&config, deps, transport, shutdown.clone()).await?;
    let mut daemon = started.daemon;

    let ctx = Arc::new(ListenCtx {
        runtime: Arc::clone(&daemon.runtime),
        shutdown: shutdown.clone(),
        auth_token: config.auth_token.clone(),
        ipc_timeout: config.ipc_timeout,
    });
    let listener = tokio::spawn(Listener::new(started.unix, started.tcp, ctx).run(shutdown.clone()));
    info!(socket = %config.socket_path.display(), tcp_port = ?config.tcp_port, "daemon ready");

    tokio::select! {
        _ = shutdown.cancelled() => info!("shutdown requested over the admin socket"),
        _ = wait_for_signal() => {}
    }

    daemon.shutdown()?;
    let _ = listener.await;
    Ok(())
}

/// Resolve on SIGTERM or SIGINT.
async fn wait_for_signal() {
    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(e) => {
            warn!(error = %e, "failed to install SIGTERM handler");
            let _ = tokio::signal::ctrl_c().await;
            info!("received SIGINT");
            return;
        }
    };
    tokio::select! {
        _ = sigterm.recv() => info!("received SIGTERM"),
        _ = tokio::signal::ctrl_c() => info!("received SIGINT"),
    }
}
