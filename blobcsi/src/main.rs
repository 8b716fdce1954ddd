mod cli;
mod config;
mod logging;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use libblobcsi::credentials::{CredentialSources, DirSecretStore, SecretStore};
use libblobcsi::executor::{
    LocalMountExecutor, MountExecutor, MountProxyHandler, ProxyMountExecutor,
};
use libblobcsi::probe::HostProbe;
use libblobcsi::transport::{self, CsiDispatcher, QuicServer, RequestHandler};
use libblobcsi::{BlobDriver, ExecutorMode};
use tracing::info;

use crate::cli::{Cli, Command, MountProxyArgs, NodeArgs, TlsArgs};
use crate::config::CloudConfig;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.log_format)?;

    match cli.command {
        Command::Node(args) => run_node(args).await,
        Command::MountProxy(args) => run_mount_proxy(args).await,
        Command::Version => {
            println!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn server_tls(tls: &TlsArgs) -> Result<rustls::ServerConfig> {
    let chain = transport::load_certs(&tls.tls_cert).context("Failed to load TLS certificate")?;
    let key = transport::load_private_key(&tls.tls_key).context("Failed to load TLS key")?;
    transport::server_config(chain, key).context("Failed to build TLS server config")
}

async fn run_node(args: NodeArgs) -> Result<()> {
    let cloud = args
        .cloud_config
        .as_deref()
        .map(CloudConfig::load)
        .transpose()?;
    let options = args.driver_options(cloud)?;

    let executor: Arc<dyn MountExecutor> = match &options.executor {
        ExecutorMode::Local => Arc::new(LocalMountExecutor::new(options.blobfuse_path.clone())),
        ExecutorMode::Proxy {
            endpoint,
            server_name,
        } => {
            let ca = args
                .mount_proxy_ca
                .as_deref()
                .context("--mount-proxy requires --mount-proxy-ca")?;
            let roots = transport::load_certs(ca).context("Failed to load mount proxy CA")?;
            let tls = transport::client_config(roots)?;
            Arc::new(ProxyMountExecutor::new(
                *endpoint,
                server_name.clone(),
                tls,
                options.proxy_connect_timeout,
                options.proxy_mount_timeout,
            ))
        }
    };

    let sources = CredentialSources {
        secret_store: args
            .secrets_root
            .clone()
            .map(|root| Arc::new(DirSecretStore::new(root)) as Arc<dyn SecretStore>),
        ..Default::default()
    };

    info!(
        node_id = %options.node_id,
        driver = %options.driver_name,
        executor = ?options.executor,
        "starting node plugin"
    );
    let driver = Arc::new(BlobDriver::new(
        options,
        sources,
        executor,
        Arc::new(HostProbe::new()),
    ));
    let server = QuicServer::new(
        args.listen,
        server_tls(&args.tls)?,
        Arc::new(CsiDispatcher::new(driver)),
    )?;
    serve_until_shutdown(server).await
}

async fn run_mount_proxy(args: MountProxyArgs) -> Result<()> {
    info!(helper = %args.blobfuse_path.display(), "starting mount proxy");
    let executor = Arc::new(LocalMountExecutor::new(args.blobfuse_path.clone()));
    let server = QuicServer::new(
        args.listen,
        server_tls(&args.tls)?,
        Arc::new(MountProxyHandler::new(executor)),
    )?;
    serve_until_shutdown(server).await
}

async fn serve_until_shutdown<H: RequestHandler>(server: QuicServer<H>) -> Result<()> {
    tokio::select! {
        res = server.serve() => res.context("QUIC server stopped"),
        res = tokio::signal::ctrl_c() => {
            res.context("Failed to listen for shutdown signal")?;
            info!("shutting down");
            server.endpoint().close(0u32.into(), b"shutdown");
            Ok(())
        }
    }
}
