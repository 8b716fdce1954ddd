//! File-backed [`SecretStore`].
//!
//! Secrets are laid out the way a projected secret volume is:
//!
//! ```text
//! <root>/<namespace>/<name>/<key>
//! ```
//!
//! with one file per data key holding the raw value.

use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use tracing::debug;

use super::{CredentialError, SecretStore, storage_account_from_secrets};

pub struct DirSecretStore {
    root: PathBuf,
}

impl DirSecretStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    async fn read_data(
        &self,
        name: &str,
        namespace: &str,
    ) -> Result<HashMap<String, String>, CredentialError> {
        let dir = self.root.join(namespace).join(name);
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(CredentialError::SecretNotFound {
                    namespace: namespace.to_owned(),
                    name: name.to_owned(),
                });
            }
            Err(e) => {
                return Err(CredentialError::Backend(format!(
                    "read secret dir {}: {e}",
                    dir.display()
                )));
            }
        };

        let mut data = HashMap::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| CredentialError::Backend(e.to_string()))?
        {
            let path = entry.path();
            // Projected volumes keep their payload behind `..data` symlinks.
            let Some(key) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if key.starts_with('.') || !path.is_file() {
                continue;
            }
            let value = tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| CredentialError::Backend(format!("read {}: {e}", path.display())))?;
            data.insert(key.to_owned(), value);
        }
        debug!(namespace, name, keys = data.len(), "secret loaded");
        Ok(data)
    }
}

#[async_trait]
impl SecretStore for DirSecretStore {
    async fn get_secret(
        &self,
        name: &str,
        namespace: &str,
    ) -> Result<(String, String), CredentialError> {
        let data = self.read_data(name, namespace).await?;
        storage_account_from_secrets(&format!("{namespace}/{name}"), &data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_secret(root: &std::path::Path, ns: &str, name: &str, data: &[(&str, &str)]) {
        let dir = root.join(ns).join(name);
        std::fs::create_dir_all(&dir).unwrap();
        for (k, v) in data {
            std::fs::write(dir.join(k), v).unwrap();
        }
    }

    #[tokio::test]
    async fn reads_account_and_key() {
        let tmp = tempfile::tempdir().unwrap();
        write_secret(
            tmp.path(),
            "default",
            "azure-storage-account-acct-secret",
            &[("azurestorageaccountname", "acct\n"), ("azurestorageaccountkey", "k")],
        );
        let store = DirSecretStore::new(tmp.path());
        let (name, key) = store
            .get_secret("azure-storage-account-acct-secret", "default")
            .await
            .unwrap();
        assert_eq!(name, "acct");
        assert_eq!(key, "k");
    }

    #[tokio::test]
    async fn missing_secret_is_not_found() {
        let tmp = tempfile::tempdir().unwrap();
        let store = DirSecretStore::new(tmp.path());
        let err = store.get_secret("nope", "default").await.unwrap_err();
        assert!(matches!(err, CredentialError::SecretNotFound { .. }));
    }

    #[tokio::test]
    async fn missing_key_field_is_reported() {
        let tmp = tempfile::tempdir().unwrap();
        write_secret(tmp.path(), "ns", "s", &[("accountname", "acct")]);
        let store = DirSecretStore::new(tmp.path());
        let err = store.get_secret("s", "ns").await.unwrap_err();
        assert!(err.to_string().contains("azurestorageaccountkey"), "{err}");
    }
}
