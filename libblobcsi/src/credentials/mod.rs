//! Storage credential resolution.
//!
//! A FUSE mount needs the account, the container and one form of key
//! material handed to blobfuse as environment entries. Key material is
//! looked up through an ordered list of [`ResolutionStrategy`] tiers; the
//! first tier that produces a definitive answer wins:
//!
//! 1. key vault reference (`keyvaulturl` attribute),
//! 2. inline request secrets,
//! 3. named secret (`secretname` attribute or
//!    `azure-storage-account-<account>-secret`), skipped for managed identity,
//! 4. account key from the cloud control plane, when the named secret could
//!    not be read and secret-only lookup was not requested.
//!
//! NFS mounts skip all of the above.

mod secret_store;

pub use secret_store::DirSecretStore;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, instrument, warn};

use crate::attributes::{
    RequestSecrets, SECRET_ACCOUNT_KEY, SECRET_ACCOUNT_NAME, SecretKey, VolumeAttributes,
};
use crate::error::CsiError;
use crate::options::DriverOptions;
use crate::types::Protocol;
use crate::volume_id::VolumeIdentity;

/// Default name of the secret holding an account's key.
pub fn default_secret_name(account_name: &str) -> String {
    format!("azure-storage-account-{account_name}-secret")
}

/// A SAS token always carries the signed-version query parameter.
pub fn is_sas_token(value: &str) -> bool {
    value.contains("?sv=")
}

/// Replace the value of every `KEY=VALUE` entry, for logging.
pub fn redact_env(env: &[String]) -> Vec<String> {
    env.iter()
        .map(|entry| match entry.split_once('=') {
            Some((key, _)) => format!("{key}=***"),
            None => entry.clone(),
        })
        .collect()
}

/// Errors reported by the credential capabilities.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CredentialError {
    #[error("{0} is not configured")]
    NotConfigured(&'static str),

    #[error("could not get secret({namespace}/{name}): not found")]
    SecretNotFound { namespace: String, name: String },

    #[error("could not find {field} field in secret({secret})")]
    MissingField { field: &'static str, secret: String },

    #[error("no key for storage account({account}) under resource group({resource_group}): {reason}")]
    NoAccountKey {
        account: String,
        resource_group: String,
        reason: String,
    },

    #[error("{0}")]
    Backend(String),
}

/// Kubernetes-style secret lookup.
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Return `(account_name, account_key)` held by the named secret.
    async fn get_secret(&self, name: &str, namespace: &str)
    -> Result<(String, String), CredentialError>;
}

/// Key vault secret lookup.
#[async_trait]
pub trait KeyVaultClient: Send + Sync {
    /// Return the secret value. Empty `name`/`version` select the defaults.
    async fn get_secret(&self, url: &str, name: &str, version: &str)
    -> Result<String, CredentialError>;
}

/// Cloud control-plane access to account keys.
#[async_trait]
pub trait CloudAccountResolver: Send + Sync {
    async fn get_storage_access_key(
        &self,
        account_name: &str,
        resource_group: &str,
    ) -> Result<String, CredentialError>;
}

/// Extract `(account_name, account_key)` from a secret's data map.
pub fn storage_account_from_secrets(
    secret: &str,
    data: &HashMap<String, String>,
) -> Result<(String, String), CredentialError> {
    let mut account_name = String::new();
    let mut account_key = String::new();
    let mut entries: Vec<_> = data.iter().collect();
    entries.sort_by(|a, b| a.0.cmp(b.0));
    for (key, value) in entries {
        match SecretKey::parse(key) {
            Some(SecretKey::AccountName) => account_name = value.clone(),
            Some(SecretKey::AccountKey) => account_key = value.clone(),
            _ => {}
        }
    }

    if account_name.is_empty() {
        return Err(CredentialError::MissingField {
            field: SECRET_ACCOUNT_NAME,
            secret: secret.to_owned(),
        });
    }
    if account_key.is_empty() {
        return Err(CredentialError::MissingField {
            field: SECRET_ACCOUNT_KEY,
            secret: secret.to_owned(),
        });
    }
    Ok((account_name.trim().to_owned(), account_key))
}

/// Credential sources handed to the resolver at construction time.
#[derive(Clone, Default)]
pub struct CredentialSources {
    pub key_vault: Option<Arc<dyn KeyVaultClient>>,
    pub secret_store: Option<Arc<dyn SecretStore>>,
    pub cloud: Option<Arc<dyn CloudAccountResolver>>,
}

/// Account, container and `KEY=VALUE` auth environment for one mount.
#[derive(Clone, PartialEq, Eq)]
pub struct CredentialBundle {
    pub account_name: String,
    pub container_name: String,
    pub auth_env: Vec<String>,
}

impl std::fmt::Debug for CredentialBundle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialBundle")
            .field("account_name", &self.account_name)
            .field("container_name", &self.container_name)
            .field("auth_env", &redact_env(&self.auth_env))
            .finish()
    }
}

/// Key material produced by a resolution tier.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyMaterial {
    /// Overrides the account name when set.
    pub account_name: Option<String>,
    pub account_key: Option<String>,
    pub sas_token: Option<String>,
}

/// Outcome of one resolution tier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Resolved(KeyMaterial),
    NotApplicable,
}

/// Inputs shared by every tier.
#[derive(Debug)]
pub struct ResolutionRequest<'a> {
    pub account_name: &'a str,
    pub resource_group: &'a str,
    pub secret_namespace: &'a str,
    pub attributes: &'a VolumeAttributes,
    pub secrets: &'a RequestSecrets,
}

/// One tier of the credential fallback chain.
#[async_trait]
pub trait ResolutionStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    async fn resolve(&self, req: &ResolutionRequest<'_>) -> Result<Resolution, CredentialError>;
}

struct KeyVaultTier {
    client: Option<Arc<dyn KeyVaultClient>>,
}

#[async_trait]
impl ResolutionStrategy for KeyVaultTier {
    fn name(&self) -> &'static str {
        "key vault"
    }

    async fn resolve(&self, req: &ResolutionRequest<'_>) -> Result<Resolution, CredentialError> {
        let Some(url) = req.attributes.key_vault_url() else {
            return Ok(Resolution::NotApplicable);
        };
        if req.secrets.provided {
            warn!(%url, "both key vault and inline secrets supplied, using key vault");
        }
        let client = self
            .client
            .as_ref()
            .ok_or(CredentialError::NotConfigured("key vault client"))?;
        let value = client
            .get_secret(
                url,
                req.attributes
                    .key_vault_secret_name
                    .as_deref()
                    .unwrap_or_default(),
                req.attributes
                    .key_vault_secret_version
                    .as_deref()
                    .unwrap_or_default(),
            )
            .await?;

        let mut material = KeyMaterial::default();
        if is_sas_token(&value) {
            material.sas_token = Some(value);
        } else {
            material.account_key = Some(value);
        }
        Ok(Resolution::Resolved(material))
    }
}

struct InlineSecretTier;

#[async_trait]
impl ResolutionStrategy for InlineSecretTier {
    fn name(&self) -> &'static str {
        "inline secrets"
    }

    async fn resolve(&self, req: &ResolutionRequest<'_>) -> Result<Resolution, CredentialError> {
        if !req.secrets.provided {
            return Ok(Resolution::NotApplicable);
        }
        Ok(Resolution::Resolved(KeyMaterial {
            account_name: req.secrets.account_name.clone(),
            account_key: req.secrets.account_key.clone(),
            sas_token: req.secrets.sas_token.clone(),
        }))
    }
}

struct NamedSecretTier {
    store: Option<Arc<dyn SecretStore>>,
}

#[async_trait]
impl ResolutionStrategy for NamedSecretTier {
    fn name(&self) -> &'static str {
        "named secret"
    }

    async fn resolve(&self, req: &ResolutionRequest<'_>) -> Result<Resolution, CredentialError> {
        if req.attributes.uses_msi() {
            debug!("managed identity requested, skipping account key lookup");
            return Ok(Resolution::NotApplicable);
        }
        let secret_name = match req.attributes.secret_name() {
            Some(name) => name.to_owned(),
            None if !req.account_name.is_empty() => default_secret_name(req.account_name),
            None => return Ok(Resolution::NotApplicable),
        };

        let result = match &self.store {
            Some(store) => store.get_secret(&secret_name, req.secret_namespace).await,
            None => Err(CredentialError::NotConfigured("secret store")),
        };
        match result {
            Ok((name, key)) => Ok(Resolution::Resolved(KeyMaterial {
                account_name: (!name.is_empty()).then_some(name),
                account_key: (!key.is_empty()).then_some(key),
                ..KeyMaterial::default()
            })),
            Err(e) if req.attributes.get_account_key_from_secret => Err(e),
            Err(e) => {
                debug!(
                    account = req.account_name,
                    namespace = req.secret_namespace,
                    secret = %secret_name,
                    error = %e,
                    "get account key from secret failed, use cluster identity instead"
                );
                Ok(Resolution::NotApplicable)
            }
        }
    }
}

struct CloudAccountTier {
    cloud: Option<Arc<dyn CloudAccountResolver>>,
}

#[async_trait]
impl ResolutionStrategy for CloudAccountTier {
    fn name(&self) -> &'static str {
        "cloud account"
    }

    async fn resolve(&self, req: &ResolutionRequest<'_>) -> Result<Resolution, CredentialError> {
        if req.attributes.uses_msi()
            || req.attributes.get_account_key_from_secret
            || req.account_name.is_empty()
        {
            return Ok(Resolution::NotApplicable);
        }
        let cloud = self
            .cloud
            .as_ref()
            .ok_or(CredentialError::NotConfigured("cloud account resolver"))?;
        let key = cloud
            .get_storage_access_key(req.account_name, req.resource_group)
            .await
            .map_err(|e| CredentialError::NoAccountKey {
                account: req.account_name.to_owned(),
                resource_group: req.resource_group.to_owned(),
                reason: e.to_string(),
            })?;
        Ok(Resolution::Resolved(KeyMaterial {
            account_key: Some(key),
            ..KeyMaterial::default()
        }))
    }
}

/// Produces the [`CredentialBundle`] for a stage request.
pub struct CredentialResolver {
    default_resource_group: String,
    default_secret_namespace: String,
    strategies: Vec<Box<dyn ResolutionStrategy>>,
}

impl CredentialResolver {
    pub fn new(options: &DriverOptions, sources: CredentialSources) -> Self {
        Self {
            default_resource_group: options.resource_group.clone(),
            default_secret_namespace: options.default_secret_namespace.clone(),
            strategies: vec![
                Box::new(KeyVaultTier {
                    client: sources.key_vault,
                }),
                Box::new(InlineSecretTier),
                Box::new(NamedSecretTier {
                    store: sources.secret_store,
                }),
                Box::new(CloudAccountTier {
                    cloud: sources.cloud,
                }),
            ],
        }
    }

    /// Resolve account, container and auth env for `volume_id`.
    ///
    /// A volume ID that does not parse is only a warning as long as the
    /// attributes name the container.
    #[instrument(skip_all, fields(volume_id = %volume_id, protocol = %protocol))]
    pub async fn resolve(
        &self,
        volume_id: &str,
        protocol: Protocol,
        attributes: &VolumeAttributes,
        secrets: &RequestSecrets,
    ) -> Result<CredentialBundle, CsiError> {
        let parsed = VolumeIdentity::parse(volume_id);
        let (resource_group, mut account_name, mut container_name) = match &parsed {
            Ok(id) => (
                id.resource_group_or(&self.default_resource_group).to_owned(),
                id.account_name.clone(),
                id.container_name.clone(),
            ),
            Err(e) => {
                warn!(error = %e, "ignoring volume id parse error");
                (self.default_resource_group.clone(), String::new(), String::new())
            }
        };
        if let Some(container) = &attributes.container_name {
            container_name = container.clone();
        }
        if let Some(account) = &attributes.storage_account {
            account_name = account.clone();
        }

        Self::require_container(&parsed, volume_id, &container_name)?;

        // Identity entries are kept whichever tier supplies the key.
        let mut auth_env = attributes.identity_env.clone();
        auth_env.extend(secrets.identity_env.iter().cloned());
        debug!(auth_env = ?redact_env(&auth_env), "identity auth env");

        if protocol == Protocol::Nfs {
            return Ok(CredentialBundle {
                account_name,
                container_name,
                auth_env,
            });
        }

        let secret_namespace = attributes
            .secret_namespace()
            .unwrap_or(&self.default_secret_namespace)
            .to_owned();
        let request = ResolutionRequest {
            account_name: &account_name,
            resource_group: &resource_group,
            secret_namespace: &secret_namespace,
            attributes,
            secrets,
        };

        let mut material = KeyMaterial::default();
        for strategy in &self.strategies {
            match strategy.resolve(&request).await {
                Ok(Resolution::Resolved(found)) => {
                    debug!(tier = strategy.name(), "credentials resolved");
                    material = found;
                    break;
                }
                Ok(Resolution::NotApplicable) => continue,
                Err(e) => {
                    return Err(CsiError::CredentialResolutionFailed(format!(
                        "{}: {e}",
                        strategy.name()
                    )));
                }
            }
        }

        if let Some(name) = material.account_name.take() {
            account_name = name;
        }

        let sas_token = material.sas_token.filter(|t| !t.is_empty());
        let account_key = material.account_key.filter(|k| !k.is_empty());
        match (sas_token, account_key) {
            (Some(_), Some(_)) => {
                return Err(CsiError::CredentialResolutionFailed(format!(
                    "both a SAS token and an account key were supplied for storage account({account_name})"
                )));
            }
            (Some(sas), None) => auth_env.push(format!("AZURE_STORAGE_SAS_TOKEN={sas}")),
            (None, Some(key)) => auth_env.push(format!("AZURE_STORAGE_ACCESS_KEY={key}")),
            (None, None) if attributes.has_identity_credential(secrets) => {}
            (None, None) => {
                return Err(CsiError::CredentialResolutionFailed(format!(
                    "no key material found for storage account({account_name}) under resource group({resource_group})"
                )));
            }
        }

        Ok(CredentialBundle {
            account_name,
            container_name,
            auth_env,
        })
    }

    fn require_container(
        parsed: &Result<VolumeIdentity, CsiError>,
        volume_id: &str,
        container_name: &str,
    ) -> Result<(), CsiError> {
        if !container_name.is_empty() {
            return Ok(());
        }
        match parsed {
            Err(e) => Err(e.clone()),
            Ok(_) => Err(CsiError::MissingContainerName(volume_id.to_owned())),
        }
    }
}
