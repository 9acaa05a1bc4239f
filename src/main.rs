//! Composes the proxy: a route index shared between two reconcilers (pods and
//! services) and the HTTP data plane, all torn down on SIGINT/SIGTERM.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

use std::net::SocketAddr;
use std::path::PathBuf;

use annogate_core::RouteIndex;
use annogate_k8s::{
    watch::Watch, watcher, Api, Client, Config, KubeConfigOptions, Kubeconfig, Pod, Reconciler,
    Service,
};
use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, info_span, Instrument};

#[derive(Debug, Parser)]
#[clap(
    name = "annogate",
    about = "Annotation-driven cluster-aware HTTP reverse proxy"
)]
struct Args {
    /// TCP port the proxy listens on.
    #[clap(long, short = 'p', default_value = "8080")]
    port: u16,

    /// Path to a kubeconfig file. In-cluster configuration is used when
    /// unset.
    #[clap(long, short = 'k')]
    kubeconfig: Option<PathBuf>,

    #[clap(long, default_value = "annogate=info,warn", env = "ANNOGATE_LOG")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let Args {
        port,
        kubeconfig,
        log_level,
    } = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_new(&log_level).context("invalid log level")?,
        )
        .init();

    let client = init_client(kubeconfig)
        .await
        .context("failed to initialize the cluster client")?;

    // The index is the only state shared between the reconcilers and the
    // request path.
    let index = RouteIndex::shared();

    let pods = Watch::from(watcher::watcher(
        Api::<Pod>::all(client.clone()),
        watcher::Config::default(),
    ));
    tokio::spawn(
        Reconciler::new(index.clone(), client.clone())
            .run(pods)
            .instrument(info_span!("pods")),
    );

    let services = Watch::from(watcher::watcher(
        Api::<Service>::all(client.clone()),
        watcher::Config::default(),
    ));
    tokio::spawn(
        Reconciler::new(index.clone(), client)
            .run(services)
            .instrument(info_span!("services")),
    );

    let (close, release) = drain::channel();
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        .context("failed to register the SIGTERM handler")?;
    tokio::spawn(async move {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
        info!("shutdown signal received; draining");
        close.drain().await;
    });

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    annogate_proxy::serve(addr, index, release)
        .await
        .context("proxy server failed")?;

    info!("shutdown complete");
    Ok(())
}

/// Builds a cluster client from an explicit kubeconfig path, or from the
/// inferred environment (in-cluster service account, falling back to the
/// ambient kubeconfig).
async fn init_client(kubeconfig: Option<PathBuf>) -> Result<Client> {
    let config = match kubeconfig {
        Some(path) => {
            let kubeconfig = Kubeconfig::read_from(&path)
                .with_context(|| format!("failed to read kubeconfig at {}", path.display()))?;
            Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default()).await?
        }
        None => Config::infer().await?,
    };
    Ok(Client::try_from(config)?)
}
