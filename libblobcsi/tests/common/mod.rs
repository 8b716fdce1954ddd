#![allow(dead_code)]

//! In-memory fakes for the node plugin's capabilities.

use std::collections::{HashMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use libblobcsi::credentials::{
    CloudAccountResolver, CredentialError, CredentialSources, KeyVaultClient, SecretStore,
};
use libblobcsi::executor::{ExecutorError, MountExecutor};
use libblobcsi::probe::FileSystemProbe;
use libblobcsi::{BlobDriver, DriverOptions, NodeStageVolumeRequest, VolumeCapability};
use tokio::sync::Notify;

#[derive(Default)]
struct ProbeState {
    mounted: HashSet<PathBuf>,
    unhealthy: HashSet<PathBuf>,
    corrupted: HashSet<PathBuf>,
    bind_mounts: Vec<(PathBuf, PathBuf, bool)>,
    nfs_mounts: Vec<(String, PathBuf, Vec<String>)>,
    unmounts: Vec<PathBuf>,
}

/// Mount table kept in memory. Directories are still real.
#[derive(Default)]
pub struct FakeProbe {
    state: Mutex<ProbeState>,
    fail_unmount: std::sync::atomic::AtomicBool,
}

impl FakeProbe {
    pub fn mark_mounted(&self, path: &Path) {
        self.state.lock().unwrap().mounted.insert(path.to_owned());
    }

    pub fn mark_unhealthy(&self, path: &Path) {
        let mut state = self.state.lock().unwrap();
        state.mounted.insert(path.to_owned());
        state.unhealthy.insert(path.to_owned());
    }

    pub fn mark_corrupted(&self, path: &Path) {
        self.state.lock().unwrap().corrupted.insert(path.to_owned());
    }

    pub fn fail_unmount(&self) {
        self.fail_unmount.store(true, Ordering::SeqCst);
    }

    pub fn is_mounted(&self, path: &Path) -> bool {
        self.state.lock().unwrap().mounted.contains(path)
    }

    pub fn unmounts(&self) -> Vec<PathBuf> {
        self.state.lock().unwrap().unmounts.clone()
    }

    pub fn bind_mounts(&self) -> Vec<(PathBuf, PathBuf, bool)> {
        self.state.lock().unwrap().bind_mounts.clone()
    }

    pub fn nfs_mounts(&self) -> Vec<(String, PathBuf, Vec<String>)> {
        self.state.lock().unwrap().nfs_mounts.clone()
    }
}

#[async_trait]
impl FileSystemProbe for FakeProbe {
    async fn is_mount_point(&self, path: &Path) -> io::Result<bool> {
        let state = self.state.lock().unwrap();
        if state.corrupted.contains(path) {
            return Err(io::Error::from_raw_os_error(nix::libc::ENOTCONN));
        }
        Ok(state.mounted.contains(path))
    }

    async fn unmount(&self, path: &Path) -> io::Result<()> {
        let mut state = self.state.lock().unwrap();
        state.unmounts.push(path.to_owned());
        if self.fail_unmount.load(Ordering::SeqCst) {
            return Err(io::Error::from_raw_os_error(nix::libc::EBUSY));
        }
        state.mounted.remove(path);
        state.unhealthy.remove(path);
        state.corrupted.remove(path);
        Ok(())
    }

    async fn path_healthy(&self, path: &Path) -> bool {
        !self.state.lock().unwrap().unhealthy.contains(path)
    }

    async fn bind_mount(&self, source: &Path, target: &Path, read_only: bool) -> io::Result<()> {
        let mut state = self.state.lock().unwrap();
        state
            .bind_mounts
            .push((source.to_owned(), target.to_owned(), read_only));
        state.mounted.insert(target.to_owned());
        Ok(())
    }

    async fn mount_nfs(&self, source: &str, target: &Path, options: &[String]) -> io::Result<()> {
        let mut state = self.state.lock().unwrap();
        state
            .nfs_mounts
            .push((source.to_owned(), target.to_owned(), options.to_vec()));
        state.mounted.insert(target.to_owned());
        Ok(())
    }
}

/// What the fake mount helper does when called.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MountBehavior {
    Succeed,
    Fail,
    /// Mounts the target, then reports failure.
    FailAfterMounting,
    Timeout,
    /// Mounts the target, then the wait times out.
    TimeoutAfterMounting,
}

/// Blocks the first mount call until released.
pub struct Gate {
    pub entered: Arc<Notify>,
    pub release: Arc<Notify>,
}

pub struct FakeExecutor {
    probe: Arc<FakeProbe>,
    behavior: MountBehavior,
    calls: Mutex<Vec<(String, Vec<String>)>>,
    gate: Mutex<Option<Gate>>,
}

impl FakeExecutor {
    pub fn new(probe: Arc<FakeProbe>, behavior: MountBehavior) -> Self {
        Self {
            probe,
            behavior,
            calls: Mutex::new(Vec::new()),
            gate: Mutex::new(None),
        }
    }

    /// Make the next mount call wait. Returns `(entered, release)`.
    pub fn gate_next(&self) -> (Arc<Notify>, Arc<Notify>) {
        let entered = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        *self.gate.lock().unwrap() = Some(Gate {
            entered: Arc::clone(&entered),
            release: Arc::clone(&release),
        });
        (entered, release)
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn calls(&self) -> Vec<(String, Vec<String>)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl MountExecutor for FakeExecutor {
    async fn mount(&self, args: &str, auth_env: &[String]) -> Result<String, ExecutorError> {
        self.calls
            .lock()
            .unwrap()
            .push((args.to_owned(), auth_env.to_vec()));

        let gate = self.gate.lock().unwrap().take();
        if let Some(gate) = gate {
            gate.entered.notify_one();
            gate.release.notified().await;
        }

        let target = PathBuf::from(args.split_whitespace().next().unwrap_or_default());
        match self.behavior {
            MountBehavior::Succeed => {
                self.probe.mark_mounted(&target);
                Ok("mounted".to_owned())
            }
            MountBehavior::Fail => Err(ExecutorError::Failed {
                reason: "exit status: 1".to_owned(),
                output: "authentication failed".to_owned(),
            }),
            MountBehavior::FailAfterMounting => {
                self.probe.mark_mounted(&target);
                Err(ExecutorError::Failed {
                    reason: "exit status: 1".to_owned(),
                    output: "fuse: init failed".to_owned(),
                })
            }
            MountBehavior::Timeout => Err(ExecutorError::Timeout(
                std::time::Duration::from_secs(5),
            )),
            MountBehavior::TimeoutAfterMounting => {
                self.probe.mark_mounted(&target);
                Err(ExecutorError::Timeout(std::time::Duration::from_secs(5)))
            }
        }
    }
}

#[derive(Default)]
pub struct FakeSecretStore {
    secrets: Mutex<HashMap<(String, String), (String, String)>>,
    pub calls: AtomicUsize,
}

impl FakeSecretStore {
    pub fn insert(&self, namespace: &str, name: &str, account: &str, key: &str) {
        self.secrets.lock().unwrap().insert(
            (namespace.to_owned(), name.to_owned()),
            (account.to_owned(), key.to_owned()),
        );
    }
}

#[async_trait]
impl SecretStore for FakeSecretStore {
    async fn get_secret(
        &self,
        name: &str,
        namespace: &str,
    ) -> Result<(String, String), CredentialError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.secrets
            .lock()
            .unwrap()
            .get(&(namespace.to_owned(), name.to_owned()))
            .cloned()
            .ok_or_else(|| CredentialError::SecretNotFound {
                namespace: namespace.to_owned(),
                name: name.to_owned(),
            })
    }
}

#[derive(Default)]
pub struct FakeKeyVault {
    pub value: Mutex<Option<String>>,
    pub calls: AtomicUsize,
}

#[async_trait]
impl KeyVaultClient for FakeKeyVault {
    async fn get_secret(&self, url: &str, _: &str, _: &str) -> Result<String, CredentialError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.value
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| CredentialError::Backend(format!("no secret at {url}")))
    }
}

#[derive(Default)]
pub struct FakeCloud {
    pub key: Mutex<Option<String>>,
    pub calls: AtomicUsize,
}

#[async_trait]
impl CloudAccountResolver for FakeCloud {
    async fn get_storage_access_key(
        &self,
        _account_name: &str,
        _resource_group: &str,
    ) -> Result<String, CredentialError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.key
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| CredentialError::Backend("authorization failed".to_owned()))
    }
}

pub struct Harness {
    pub driver: Arc<BlobDriver>,
    pub probe: Arc<FakeProbe>,
    pub executor: Arc<FakeExecutor>,
    pub store: Arc<FakeSecretStore>,
    pub vault: Arc<FakeKeyVault>,
    pub cloud: Arc<FakeCloud>,
    pub dir: tempfile::TempDir,
}

impl Harness {
    pub fn new(behavior: MountBehavior) -> Self {
        Self::with_options(behavior, DriverOptions::default())
    }

    pub fn with_options(behavior: MountBehavior, options: DriverOptions) -> Self {
        let probe = Arc::new(FakeProbe::default());
        let executor = Arc::new(FakeExecutor::new(Arc::clone(&probe), behavior));
        let store = Arc::new(FakeSecretStore::default());
        let vault = Arc::new(FakeKeyVault::default());
        let cloud = Arc::new(FakeCloud::default());
        let sources = CredentialSources {
            key_vault: Some(vault.clone()),
            secret_store: Some(store.clone()),
            cloud: Some(cloud.clone()),
        };
        let driver = Arc::new(BlobDriver::new(
            DriverOptions {
                node_id: "node-1".to_owned(),
                ..options
            },
            sources,
            executor.clone(),
            probe.clone(),
        ));
        Self {
            driver,
            probe,
            executor,
            store,
            vault,
            cloud,
            dir: tempfile::tempdir().expect("tempdir"),
        }
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }
}

pub fn map(entries: &[(&str, &str)]) -> HashMap<String, String> {
    entries
        .iter()
        .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
        .collect()
}

pub fn stage_request(
    volume_id: &str,
    target: &Path,
    context: &[(&str, &str)],
    secrets: &[(&str, &str)],
) -> NodeStageVolumeRequest {
    NodeStageVolumeRequest {
        volume_id: volume_id.into(),
        staging_target_path: target.display().to_string(),
        volume_capability: Some(VolumeCapability::default()),
        volume_context: map(context),
        secrets: map(secrets),
    }
}
