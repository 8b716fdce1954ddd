//! Blob storage node plugin.
//!
//! [`BlobDriver`] implements [`CsiIdentity`] and [`CsiNode`]. Staging mounts a
//! blob container at the staging path, through blobfuse for the `fuse`
//! protocol or the kernel NFS client for `nfs`. Publishing bind-mounts the
//! staged path into a Pod.
//!
//! Stage and unstage for the same volume ID never run concurrently: the
//! second request fails with [`CsiError::OperationInProgress`] and the caller
//! retries.

use std::collections::HashMap;
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use tracing::{debug, error, info, instrument, warn};

use crate::attributes::{AttributeKey, RequestSecrets, VolumeAttributes};
use crate::credentials::{CredentialBundle, CredentialResolver, CredentialSources, redact_env};
use crate::error::CsiError;
use crate::executor::{ExecutorError, MountExecutor};
use crate::identity::CsiIdentity;
use crate::locks::VolumeLockTable;
use crate::mount_options::{self, EngineDefaults, USE_ADLS_OPTION, join_mount_options};
use crate::node::CsiNode;
use crate::options::DriverOptions;
use crate::probe::{FileSystemProbe, is_corrupted_mount_error};
use crate::types::*;

/// Options required by NFSv3 blob endpoints.
const NFS_MOUNT_OPTIONS: &str = "sec=sys,vers=3,nolock";

pub struct BlobDriver {
    options: DriverOptions,
    credentials: CredentialResolver,
    executor: Arc<dyn MountExecutor>,
    probe: Arc<dyn FileSystemProbe>,
    locks: VolumeLockTable,
}

impl BlobDriver {
    pub fn new(
        options: DriverOptions,
        sources: CredentialSources,
        executor: Arc<dyn MountExecutor>,
        probe: Arc<dyn FileSystemProbe>,
    ) -> Self {
        let credentials = CredentialResolver::new(&options, sources);
        Self {
            options,
            credentials,
            executor,
            probe,
            locks: VolumeLockTable::new(),
        }
    }

    pub fn options(&self) -> &DriverOptions {
        &self.options
    }

    /// Prepare `target` for a mount.
    ///
    /// Returns `true` when a healthy mount is already in place. A mount that
    /// no longer responds, or whose stat fails with a corruption error, is
    /// unmounted so the caller can mount over it.
    async fn ensure_mount_point(&self, target: &Path) -> Result<bool, CsiError> {
        let unhealthy = match self.probe.is_mount_point(target).await {
            Ok(true) if self.probe.path_healthy(target).await => return Ok(true),
            Ok(true) => {
                warn!(target = %target.display(), "mount point is not readable, unmounting");
                true
            }
            Ok(false) => false,
            Err(e) if is_corrupted_mount_error(&e) => {
                warn!(target = %target.display(), error = %e, "detected corrupted mount");
                true
            }
            Err(e) => {
                return Err(CsiError::Internal(format!(
                    "check mount point {}: {e}",
                    target.display()
                )));
            }
        };

        if unhealthy {
            self.probe
                .unmount(target)
                .await
                .map_err(|e| CsiError::UnmountFailed {
                    path: target.display().to_string(),
                    reason: e.to_string(),
                })?;
        }

        tokio::fs::create_dir_all(target)
            .await
            .map_err(|e| CsiError::MountExecutionFailed {
                path: target.display().to_string(),
                reason: format!("create target directory: {e}"),
            })?;
        Ok(false)
    }

    /// Unmount `target` if mounted and remove it. A missing target is fine.
    async fn cleanup_mount_point(&self, target: &Path) -> Result<(), CsiError> {
        let mounted = match self.probe.is_mount_point(target).await {
            Ok(mounted) => mounted,
            Err(e) if is_corrupted_mount_error(&e) => {
                warn!(target = %target.display(), error = %e, "detected corrupted mount");
                true
            }
            Err(e) => {
                return Err(CsiError::UnmountFailed {
                    path: target.display().to_string(),
                    reason: e.to_string(),
                });
            }
        };

        if mounted {
            self.probe
                .unmount(target)
                .await
                .map_err(|e| CsiError::UnmountFailed {
                    path: target.display().to_string(),
                    reason: e.to_string(),
                })?;
        } else {
            debug!(target = %target.display(), "not mounted, skipping unmount");
        }

        match tokio::fs::remove_dir(target).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CsiError::UnmountFailed {
                path: target.display().to_string(),
                reason: format!("remove directory: {e}"),
            }),
        }
    }

    /// Restore `target` to its pre-stage state after `cause` and return the
    /// error to report.
    ///
    /// If the target ended up mounted it is unmounted once. A target that is
    /// still mounted afterwards is reported as [`CsiError::Unrecoverable`]
    /// and left in place; otherwise the directory is removed.
    async fn rollback(&self, target: &Path, cause: CsiError) -> CsiError {
        let path = target.display().to_string();
        match self.probe.is_mount_point(target).await {
            Ok(true) => {
                if let Err(e) = self.probe.unmount(target).await {
                    error!(%path, error = %e, "rollback unmount failed");
                }
                match self.probe.is_mount_point(target).await {
                    Ok(false) => {}
                    Ok(true) => {
                        error!(%path, "target still mounted after rollback unmount");
                        return CsiError::Unrecoverable {
                            path,
                            reason: cause.to_string(),
                        };
                    }
                    Err(e) => {
                        error!(%path, error = %e, "mount point re-check failed");
                        return CsiError::Unrecoverable {
                            path,
                            reason: cause.to_string(),
                        };
                    }
                }
            }
            Ok(false) => {}
            Err(e) => warn!(%path, error = %e, "mount point check failed during rollback"),
        }

        match tokio::fs::remove_dir(target).await {
            Ok(()) => debug!(%path, "removed target directory"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(%path, error = %e, "could not remove target directory"),
        }
        cause
    }

    /// Everything after the target directory exists. Failures here are
    /// rolled back by the caller.
    async fn mount_volume(
        &self,
        volume_id: &str,
        target: &Path,
        protocol: Protocol,
        capability: &VolumeCapability,
        attributes: &VolumeAttributes,
        secrets: &RequestSecrets,
    ) -> Result<(), CsiError> {
        let bundle = self
            .credentials
            .resolve(volume_id, protocol, attributes, secrets)
            .await?;
        let server = match attributes.server() {
            Some(server) => server.to_owned(),
            None => format!(
                "{}.blob.{}",
                bundle.account_name,
                attributes
                    .storage_endpoint_suffix()
                    .unwrap_or(&self.options.storage_endpoint_suffix)
            ),
        };

        match protocol {
            Protocol::Nfs => self.mount_nfs(target, &server, &bundle, capability).await,
            Protocol::Fuse => {
                self.mount_blobfuse(volume_id, target, &server, bundle, capability, attributes)
                    .await
            }
        }
    }

    async fn mount_nfs(
        &self,
        target: &Path,
        server: &str,
        bundle: &CredentialBundle,
        capability: &VolumeCapability,
    ) -> Result<(), CsiError> {
        let source = format!(
            "{server}:/{}/{}",
            bundle.account_name, bundle.container_name
        );
        let options =
            join_mount_options(&capability.mount_flags, &[NFS_MOUNT_OPTIONS.to_owned()]);
        info!(%source, target = %target.display(), ?options, "mounting nfs");

        if self.options.mock_mount {
            warn!("mock mount enabled, skipping nfs mount");
            return Ok(());
        }

        self.probe
            .mount_nfs(&source, target, &options)
            .await
            .map_err(|e| CsiError::MountExecutionFailed {
                path: target.display().to_string(),
                reason: format!("mount {source}: {e}"),
            })?;

        // NFSv3 root folder is world-writable.
        tokio::fs::set_permissions(target, std::fs::Permissions::from_mode(0o777))
            .await
            .map_err(|e| CsiError::MountExecutionFailed {
                path: target.display().to_string(),
                reason: format!("chmod 0777: {e}"),
            })
    }

    async fn mount_blobfuse(
        &self,
        volume_id: &str,
        target: &Path,
        server: &str,
        bundle: CredentialBundle,
        capability: &VolumeCapability,
        attributes: &VolumeAttributes,
    ) -> Result<(), CsiError> {
        let mut flags = join_mount_options(&capability.mount_flags, &[]);
        if attributes.ephemeral {
            flags = join_mount_options(&flags, &attributes.ephemeral_mount_options());
        }
        if attributes.is_hns_enabled {
            flags = join_mount_options(&flags, &[USE_ADLS_OPTION.to_owned()]);
        }

        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        let tmp_path = format!("{}/{volume_id}#{now}", self.options.tmp_root.display());
        let defaults = EngineDefaults::new(&tmp_path, &bundle.container_name);
        let options = mount_options::build(&flags, &defaults);

        let mut args = target.display().to_string();
        for opt in &options {
            args.push(' ');
            args.push_str(opt);
        }

        let mut auth_env = bundle.auth_env;
        auth_env.push(format!("AZURE_STORAGE_ACCOUNT={}", bundle.account_name));
        auth_env.push(format!("AZURE_STORAGE_BLOB_ENDPOINT={server}"));
        info!(%args, env = ?redact_env(&auth_env), "mounting blobfuse");

        if self.options.mock_mount {
            warn!("mock mount enabled, skipping blobfuse, this is only for testing");
            return Ok(());
        }

        match self.executor.mount(&args, &auth_env).await {
            Ok(output) => {
                debug!(%output, "mount helper finished");
                Ok(())
            }
            Err(ExecutorError::Timeout(after)) => {
                // The proxy may still have completed the mount.
                if matches!(self.probe.is_mount_point(target).await, Ok(true))
                    && self.probe.path_healthy(target).await
                {
                    warn!(?after, "mount call timed out but target is mounted");
                    return Ok(());
                }
                Err(CsiError::MountExecutionFailed {
                    path: target.display().to_string(),
                    reason: ExecutorError::Timeout(after).to_string(),
                })
            }
            Err(e) => Err(CsiError::MountExecutionFailed {
                path: target.display().to_string(),
                reason: e.to_string(),
            }),
        }
    }

    /// Rewrite an ephemeral volume's context for staging at the publish
    /// target: secrets come from the Pod's namespace, only from a secret, and
    /// the account is never taken from the attributes.
    fn ephemeral_context(context: &HashMap<String, String>) -> HashMap<String, String> {
        let pod_namespace = context
            .iter()
            .find(|(k, _)| AttributeKey::parse(k) == Some(AttributeKey::PodNamespace))
            .map(|(_, v)| v.clone())
            .unwrap_or_default();

        let mut rewritten: HashMap<String, String> = context
            .iter()
            .filter(|(k, _)| {
                !matches!(
                    AttributeKey::parse(k),
                    Some(
                        AttributeKey::SecretNamespace
                            | AttributeKey::GetAccountKeyFromSecret
                            | AttributeKey::StorageAccount
                    )
                )
            })
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        rewritten.insert(AttributeKey::SecretNamespace.as_str().to_owned(), pod_namespace);
        rewritten.insert(
            AttributeKey::GetAccountKeyFromSecret.as_str().to_owned(),
            "true".to_owned(),
        );
        rewritten.insert(AttributeKey::StorageAccount.as_str().to_owned(), String::new());
        rewritten
    }
}

// ---------------------------------------------------------------------------
// CsiIdentity
// ---------------------------------------------------------------------------

#[async_trait]
impl CsiIdentity for BlobDriver {
    async fn get_plugin_info(&self) -> Result<PluginInfo, CsiError> {
        Ok(PluginInfo {
            name: self.options.driver_name.clone(),
            vendor_version: env!("CARGO_PKG_VERSION").to_owned(),
        })
    }

    async fn get_plugin_capabilities(&self) -> Result<Vec<PluginCapability>, CsiError> {
        Ok(vec![
            PluginCapability::ControllerService,
            PluginCapability::VolumeAccessibilityConstraints,
        ])
    }
}

// ---------------------------------------------------------------------------
// CsiNode
// ---------------------------------------------------------------------------

#[async_trait]
impl CsiNode for BlobDriver {
    #[instrument(skip_all, fields(volume_id = %req.volume_id, target = %req.staging_target_path))]
    async fn stage_volume(&self, req: NodeStageVolumeRequest) -> Result<(), CsiError> {
        if req.volume_id.is_empty() {
            return Err(CsiError::invalid("Volume ID missing in request"));
        }
        if req.staging_target_path.is_empty() {
            return Err(CsiError::invalid("Staging target not provided"));
        }
        let Some(capability) = &req.volume_capability else {
            return Err(CsiError::invalid("Volume capability not provided"));
        };
        let attributes = VolumeAttributes::from_map(&req.volume_context);
        let protocol = Protocol::parse(attributes.protocol.as_deref().unwrap_or_default())?;
        let secrets = RequestSecrets::from_map(&req.secrets);

        let volume_id = req.volume_id.as_str();
        let _guard = self
            .locks
            .try_lock(volume_id)
            .ok_or_else(|| CsiError::OperationInProgress(volume_id.to_owned()))?;

        let target = Path::new(&req.staging_target_path);
        if self.ensure_mount_point(target).await? {
            info!("already mounted");
            return Ok(());
        }

        match self
            .mount_volume(volume_id, target, protocol, capability, &attributes, &secrets)
            .await
        {
            Ok(()) => {
                info!(%protocol, "volume staged");
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "stage failed, rolling back");
                Err(self.rollback(target, e).await)
            }
        }
    }

    #[instrument(skip(self))]
    async fn unstage_volume(
        &self,
        volume_id: &VolumeId,
        staging_target_path: &str,
    ) -> Result<(), CsiError> {
        if volume_id.is_empty() {
            return Err(CsiError::invalid("Volume ID missing in request"));
        }
        if staging_target_path.is_empty() {
            return Err(CsiError::invalid("Staging target not provided"));
        }
        let _guard = self
            .locks
            .try_lock(volume_id.as_str())
            .ok_or_else(|| CsiError::OperationInProgress(volume_id.to_string()))?;

        self.cleanup_mount_point(Path::new(staging_target_path))
            .await?;
        info!("volume unstaged");
        Ok(())
    }

    #[instrument(skip_all, fields(volume_id = %req.volume_id, target = %req.target_path))]
    async fn publish_volume(&self, req: NodePublishVolumeRequest) -> Result<(), CsiError> {
        let Some(capability) = req.volume_capability else {
            return Err(CsiError::invalid("Volume capability missing in request"));
        };
        if req.volume_id.is_empty() {
            return Err(CsiError::invalid("Volume ID missing in request"));
        }
        if req.target_path.is_empty() {
            return Err(CsiError::invalid("Target path not provided"));
        }

        if VolumeAttributes::from_map(&req.volume_context).ephemeral {
            let volume_context = Self::ephemeral_context(&req.volume_context);
            info!("ephemeral volume, staging at the publish target");
            return self
                .stage_volume(NodeStageVolumeRequest {
                    volume_id: req.volume_id,
                    staging_target_path: req.target_path,
                    volume_capability: Some(capability),
                    volume_context,
                    secrets: req.secrets,
                })
                .await;
        }

        if req.staging_target_path.is_empty() {
            return Err(CsiError::invalid("Staging target not provided"));
        }

        let target = Path::new(&req.target_path);
        if self.ensure_mount_point(target).await? {
            info!("already mounted");
            return Ok(());
        }
        if self.options.mock_mount {
            warn!("mock mount enabled, skipping bind mount");
            return Ok(());
        }

        if let Err(e) = self
            .probe
            .bind_mount(Path::new(&req.staging_target_path), target, req.read_only)
            .await
        {
            if let Err(remove) = tokio::fs::remove_dir(target).await {
                return Err(CsiError::Internal(format!(
                    "could not remove mount target {}: {remove}",
                    req.target_path
                )));
            }
            return Err(CsiError::MountExecutionFailed {
                path: req.target_path.clone(),
                reason: format!("bind mount {}: {e}", req.staging_target_path),
            });
        }

        info!(read_only = req.read_only, "volume published (bind-mount)");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn unpublish_volume(
        &self,
        volume_id: &VolumeId,
        target_path: &str,
    ) -> Result<(), CsiError> {
        if volume_id.is_empty() {
            return Err(CsiError::invalid("Volume ID missing in request"));
        }
        if target_path.is_empty() {
            return Err(CsiError::invalid("Target path missing in request"));
        }
        self.cleanup_mount_point(Path::new(target_path)).await?;
        info!("volume unpublished");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn get_volume_stats(
        &self,
        volume_id: &VolumeId,
        volume_path: &str,
    ) -> Result<VolumeStats, CsiError> {
        if volume_id.is_empty() {
            return Err(CsiError::invalid("Volume ID missing in request"));
        }
        if volume_path.is_empty() {
            return Err(CsiError::invalid("Volume path missing in request"));
        }
        match tokio::fs::metadata(volume_path).await {
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(CsiError::NotFound(format!(
                    "path {volume_path} does not exist"
                )));
            }
            Err(e) => {
                return Err(CsiError::Internal(format!("stat {volume_path}: {e}")));
            }
        }

        let stat = nix::sys::statvfs::statvfs(volume_path)
            .map_err(|e| CsiError::Internal(format!("statvfs {volume_path}: {e}")))?;
        let block = stat.fragment_size() as u64;
        let blocks = stat.blocks() as u64;
        let files = stat.files() as u64;

        Ok(VolumeStats {
            usage: vec![
                VolumeUsage {
                    unit: UsageUnit::Bytes,
                    available: stat.blocks_available() as u64 * block,
                    total: blocks * block,
                    used: blocks.saturating_sub(stat.blocks_free() as u64) * block,
                },
                VolumeUsage {
                    unit: UsageUnit::Inodes,
                    available: stat.files_free() as u64,
                    total: files,
                    used: files.saturating_sub(stat.files_free() as u64),
                },
            ],
        })
    }

    async fn get_capabilities(&self) -> Result<Vec<NodeCapability>, CsiError> {
        Ok(vec![
            NodeCapability::StageUnstageVolume,
            NodeCapability::GetVolumeStats,
            NodeCapability::SingleNodeMultiWriter,
        ])
    }

    async fn get_info(&self) -> Result<NodeInfo, CsiError> {
        Ok(NodeInfo {
            node_id: self.options.node_id.clone(),
        })
    }
}
