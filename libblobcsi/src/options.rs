//! Node plugin configuration.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_DRIVER_NAME: &str = "blob.csi.azure.com";
pub const DEFAULT_STORAGE_ENDPOINT_SUFFIX: &str = "core.windows.net";
pub const DEFAULT_SECRET_NAMESPACE: &str = "default";
pub const DEFAULT_PROXY_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_PROXY_MOUNT_TIMEOUT: Duration = Duration::from_secs(120);

/// How blobfuse mounts are carried out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutorMode {
    /// Run the mount helper as a child process of the plugin.
    Local,
    /// Hand the mount to a `mount-proxy` server reached over QUIC.
    Proxy {
        endpoint: SocketAddr,
        server_name: String,
    },
}

#[derive(Debug, Clone)]
pub struct DriverOptions {
    pub driver_name: String,
    pub node_id: String,
    /// Used when a volume ID leaves its resource group segment empty.
    pub resource_group: String,
    pub storage_endpoint_suffix: String,
    pub executor: ExecutorMode,
    pub proxy_connect_timeout: Duration,
    pub proxy_mount_timeout: Duration,
    pub blobfuse_path: PathBuf,
    /// Parent of the per-mount blobfuse cache directories.
    pub tmp_root: PathBuf,
    /// Only create target directories instead of mounting. Testing only.
    pub mock_mount: bool,
    pub default_secret_namespace: String,
}

impl Default for DriverOptions {
    fn default() -> Self {
        Self {
            driver_name: DEFAULT_DRIVER_NAME.to_owned(),
            node_id: String::new(),
            resource_group: String::new(),
            storage_endpoint_suffix: DEFAULT_STORAGE_ENDPOINT_SUFFIX.to_owned(),
            executor: ExecutorMode::Local,
            proxy_connect_timeout: DEFAULT_PROXY_CONNECT_TIMEOUT,
            proxy_mount_timeout: DEFAULT_PROXY_MOUNT_TIMEOUT,
            blobfuse_path: PathBuf::from("blobfuse"),
            tmp_root: PathBuf::from("/mnt"),
            mock_mount: false,
            default_secret_namespace: DEFAULT_SECRET_NAMESPACE.to_owned(),
        }
    }
}
