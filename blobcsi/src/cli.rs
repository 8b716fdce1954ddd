use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Result, bail};
use clap::{Args, Parser, Subcommand};
use libblobcsi::options::{DEFAULT_DRIVER_NAME, DEFAULT_SECRET_NAMESPACE};
use libblobcsi::{DriverOptions, ExecutorMode};

use crate::config::CloudConfig;
use crate::logging::LogFormat;

#[derive(Parser, Debug)]
#[command(name = "blobcsi", about = "Blob storage CSI node plugin")]
pub struct Cli {
    /// Log output format
    #[arg(long, value_enum, default_value = "text", global = true)]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Serve the node and identity services
    Node(NodeArgs),
    /// Run blobfuse on behalf of a node plugin
    MountProxy(MountProxyArgs),
    /// Print the version
    Version,
}

#[derive(Args, Debug)]
pub struct TlsArgs {
    /// PEM certificate chain presented by the QUIC server
    #[arg(long, value_name = "FILE")]
    pub tls_cert: PathBuf,

    /// PEM private key for the certificate
    #[arg(long, value_name = "FILE")]
    pub tls_key: PathBuf,
}

#[derive(Args, Debug)]
pub struct NodeArgs {
    #[arg(long, default_value = "0.0.0.0:7000")]
    pub listen: SocketAddr,

    #[arg(long)]
    pub node_id: String,

    #[arg(long, default_value = DEFAULT_DRIVER_NAME)]
    pub driver_name: String,

    /// JSON cloud provider config supplying resourceGroup and storageEndpointSuffix
    #[arg(long, value_name = "FILE")]
    pub cloud_config: Option<PathBuf>,

    /// Overrides the cloud config resource group
    #[arg(long)]
    pub resource_group: Option<String>,

    /// Overrides the cloud config storage endpoint suffix
    #[arg(long)]
    pub storage_endpoint_suffix: Option<String>,

    /// Hand blobfuse mounts to a mount-proxy server instead of running them here
    #[arg(long, value_name = "ADDR")]
    pub mount_proxy: Option<SocketAddr>,

    #[arg(long, default_value = "localhost")]
    pub mount_proxy_server_name: String,

    /// PEM CA bundle used to verify the mount proxy
    #[arg(long, value_name = "FILE")]
    pub mount_proxy_ca: Option<PathBuf>,

    #[arg(long, default_value_t = 5)]
    pub proxy_connect_timeout_secs: u64,

    #[arg(long, default_value_t = 120)]
    pub proxy_mount_timeout_secs: u64,

    #[arg(long, default_value = "blobfuse")]
    pub blobfuse_path: PathBuf,

    /// Parent directory of blobfuse cache directories
    #[arg(long, default_value = "/mnt")]
    pub tmp_root: PathBuf,

    /// Directory laid out as <namespace>/<name>/<key> holding storage secrets
    #[arg(long, value_name = "DIR")]
    pub secrets_root: Option<PathBuf>,

    #[arg(long, default_value = DEFAULT_SECRET_NAMESPACE)]
    pub default_secret_namespace: String,

    /// Only create target directories. Testing only.
    #[arg(long)]
    pub mock_mount: bool,

    #[command(flatten)]
    pub tls: TlsArgs,
}

impl NodeArgs {
    /// Flags win over the cloud config, which wins over built-in defaults.
    pub fn driver_options(&self, cloud: Option<CloudConfig>) -> Result<DriverOptions> {
        let cloud = cloud.unwrap_or_default();
        let defaults = DriverOptions::default();

        let executor = match self.mount_proxy {
            None => ExecutorMode::Local,
            Some(_) if self.mount_proxy_ca.is_none() => {
                bail!("--mount-proxy requires --mount-proxy-ca")
            }
            Some(endpoint) => ExecutorMode::Proxy {
                endpoint,
                server_name: self.mount_proxy_server_name.clone(),
            },
        };

        let storage_endpoint_suffix = self
            .storage_endpoint_suffix
            .clone()
            .or_else(|| Some(cloud.storage_endpoint_suffix).filter(|s| !s.is_empty()))
            .unwrap_or(defaults.storage_endpoint_suffix);

        Ok(DriverOptions {
            driver_name: self.driver_name.clone(),
            node_id: self.node_id.clone(),
            resource_group: self
                .resource_group
                .clone()
                .unwrap_or(cloud.resource_group),
            storage_endpoint_suffix,
            executor,
            proxy_connect_timeout: Duration::from_secs(self.proxy_connect_timeout_secs),
            proxy_mount_timeout: Duration::from_secs(self.proxy_mount_timeout_secs),
            blobfuse_path: self.blobfuse_path.clone(),
            tmp_root: self.tmp_root.clone(),
            mock_mount: self.mock_mount,
            default_secret_namespace: self.default_secret_namespace.clone(),
        })
    }
}

#[derive(Args, Debug)]
pub struct MountProxyArgs {
    #[arg(long, default_value = "127.0.0.1:7100")]
    pub listen: SocketAddr,

    #[arg(long, default_value = "blobfuse")]
    pub blobfuse_path: PathBuf,

    #[command(flatten)]
    pub tls: TlsArgs,
}
