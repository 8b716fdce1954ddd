//! Typed views of the volume context and the request secrets.
//!
//! Both maps arrive as loosely keyed strings. They are parsed once into
//! [`VolumeAttributes`] and [`RequestSecrets`]; keys match
//! case-insensitively and unknown keys are ignored. Entries are applied in
//! key order so that duplicates differing only in case resolve
//! deterministically (last one wins).

use std::collections::HashMap;

/// Attribute keys understood by the node plugin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttributeKey {
    ContainerName,
    KeyVaultUrl,
    KeyVaultSecretName,
    KeyVaultSecretVersion,
    StorageAccount,
    SecretName,
    SecretNamespace,
    GetAccountKeyFromSecret,
    AuthType,
    IdentityClientId,
    IdentityObjectId,
    IdentityResourceId,
    MsiEndpoint,
    SpnClientId,
    SpnTenantId,
    AadEndpoint,
    Server,
    Protocol,
    StorageEndpointSuffix,
    Ephemeral,
    PodNamespace,
    MountOptions,
    IsHnsEnabled,
}

impl AttributeKey {
    pub fn parse(key: &str) -> Option<Self> {
        let key = match key.to_ascii_lowercase().as_str() {
            "containername" => Self::ContainerName,
            "keyvaulturl" => Self::KeyVaultUrl,
            "keyvaultsecretname" => Self::KeyVaultSecretName,
            "keyvaultsecretversion" => Self::KeyVaultSecretVersion,
            // `storageaccountname` is accepted for compatibility.
            "storageaccount" | "storageaccountname" => Self::StorageAccount,
            "secretname" => Self::SecretName,
            "secretnamespace" => Self::SecretNamespace,
            "getaccountkeyfromsecret" => Self::GetAccountKeyFromSecret,
            "azurestorageauthtype" => Self::AuthType,
            "azurestorageidentityclientid" => Self::IdentityClientId,
            "azurestorageidentityobjectid" => Self::IdentityObjectId,
            "azurestorageidentityresourceid" => Self::IdentityResourceId,
            "msiendpoint" => Self::MsiEndpoint,
            "azurestoragespnclientid" => Self::SpnClientId,
            "azurestoragespntenantid" => Self::SpnTenantId,
            "azurestorageaadendpoint" => Self::AadEndpoint,
            "server" => Self::Server,
            "protocol" => Self::Protocol,
            "storageendpointsuffix" => Self::StorageEndpointSuffix,
            "csi.storage.k8s.io/ephemeral" => Self::Ephemeral,
            "csi.storage.k8s.io/pod.namespace" => Self::PodNamespace,
            "mountoptions" => Self::MountOptions,
            "ishnsenabled" => Self::IsHnsEnabled,
            _ => return None,
        };
        Some(key)
    }

    /// Canonical spelling, used when the driver rewrites a context.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ContainerName => "containername",
            Self::KeyVaultUrl => "keyvaulturl",
            Self::KeyVaultSecretName => "keyvaultsecretname",
            Self::KeyVaultSecretVersion => "keyvaultsecretversion",
            Self::StorageAccount => "storageaccount",
            Self::SecretName => "secretname",
            Self::SecretNamespace => "secretnamespace",
            Self::GetAccountKeyFromSecret => "getaccountkeyfromsecret",
            Self::AuthType => "azurestorageauthtype",
            Self::IdentityClientId => "azurestorageidentityclientid",
            Self::IdentityObjectId => "azurestorageidentityobjectid",
            Self::IdentityResourceId => "azurestorageidentityresourceid",
            Self::MsiEndpoint => "msiendpoint",
            Self::SpnClientId => "azurestoragespnclientid",
            Self::SpnTenantId => "azurestoragespntenantid",
            Self::AadEndpoint => "azurestorageaadendpoint",
            Self::Server => "server",
            Self::Protocol => "protocol",
            Self::StorageEndpointSuffix => "storageendpointsuffix",
            Self::Ephemeral => "csi.storage.k8s.io/ephemeral",
            Self::PodNamespace => "csi.storage.k8s.io/pod.namespace",
            Self::MountOptions => "mountoptions",
            Self::IsHnsEnabled => "ishnsenabled",
        }
    }

    /// Environment variable the attribute is forwarded as, for the
    /// identity-based auth attributes.
    fn auth_env_name(self) -> Option<&'static str> {
        match self {
            Self::AuthType => Some("AZURE_STORAGE_AUTH_TYPE"),
            Self::IdentityClientId => Some("AZURE_STORAGE_IDENTITY_CLIENT_ID"),
            Self::IdentityObjectId => Some("AZURE_STORAGE_IDENTITY_OBJECT_ID"),
            Self::IdentityResourceId => Some("AZURE_STORAGE_IDENTITY_RESOURCE_ID"),
            Self::MsiEndpoint => Some("MSI_ENDPOINT"),
            Self::SpnClientId => Some("AZURE_STORAGE_SPN_CLIENT_ID"),
            Self::SpnTenantId => Some("AZURE_STORAGE_SPN_TENANT_ID"),
            Self::AadEndpoint => Some("AZURE_STORAGE_AAD_ENDPOINT"),
            _ => None,
        }
    }
}

/// Secret keys understood by the node plugin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecretKey {
    AccountName,
    AccountKey,
    SasToken,
    MsiSecret,
    SpnClientSecret,
}

/// Key under which a stored secret holds the account name.
pub const SECRET_ACCOUNT_NAME: &str = "azurestorageaccountname";
/// Key under which a stored secret holds the account key.
pub const SECRET_ACCOUNT_KEY: &str = "azurestorageaccountkey";

impl SecretKey {
    pub fn parse(key: &str) -> Option<Self> {
        let key = match key.to_ascii_lowercase().as_str() {
            "accountname" | SECRET_ACCOUNT_NAME => Self::AccountName,
            "accountkey" | SECRET_ACCOUNT_KEY => Self::AccountKey,
            "azurestorageaccountsastoken" => Self::SasToken,
            "msisecret" => Self::MsiSecret,
            "azurestoragespnclientsecret" => Self::SpnClientSecret,
            _ => return None,
        };
        Some(key)
    }
}

fn sorted_entries(map: &HashMap<String, String>) -> Vec<(&String, &String)> {
    let mut entries: Vec<_> = map.iter().collect();
    entries.sort_by(|a, b| a.0.cmp(b.0));
    entries
}

fn is_true(value: &str) -> bool {
    value.eq_ignore_ascii_case("true")
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

/// Parsed volume context.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VolumeAttributes {
    pub container_name: Option<String>,
    pub key_vault_url: Option<String>,
    pub key_vault_secret_name: Option<String>,
    pub key_vault_secret_version: Option<String>,
    /// `Some("")` deliberately clears the account taken from the volume ID.
    pub storage_account: Option<String>,
    pub secret_name: Option<String>,
    pub secret_namespace: Option<String>,
    pub get_account_key_from_secret: bool,
    pub auth_type: Option<String>,
    pub spn_client_id: Option<String>,
    /// `KEY=VALUE` entries for identity-based auth, in key order.
    pub identity_env: Vec<String>,
    pub server: Option<String>,
    pub protocol: Option<String>,
    pub storage_endpoint_suffix: Option<String>,
    pub ephemeral: bool,
    pub pod_namespace: Option<String>,
    pub mount_options: Option<String>,
    pub is_hns_enabled: bool,
}

impl VolumeAttributes {
    pub fn from_map(context: &HashMap<String, String>) -> Self {
        let mut attrs = Self::default();
        for (key, value) in sorted_entries(context) {
            let Some(key) = AttributeKey::parse(key) else {
                continue;
            };
            if let Some(env) = key.auth_env_name() {
                attrs.identity_env.push(format!("{env}={value}"));
            }
            let value = value.clone();
            match key {
                AttributeKey::ContainerName => attrs.container_name = Some(value),
                AttributeKey::KeyVaultUrl => attrs.key_vault_url = Some(value),
                AttributeKey::KeyVaultSecretName => attrs.key_vault_secret_name = Some(value),
                AttributeKey::KeyVaultSecretVersion => {
                    attrs.key_vault_secret_version = Some(value)
                }
                AttributeKey::StorageAccount => attrs.storage_account = Some(value),
                AttributeKey::SecretName => attrs.secret_name = Some(value),
                AttributeKey::SecretNamespace => attrs.secret_namespace = Some(value),
                AttributeKey::GetAccountKeyFromSecret => {
                    attrs.get_account_key_from_secret = is_true(&value)
                }
                AttributeKey::AuthType => attrs.auth_type = Some(value),
                AttributeKey::SpnClientId => attrs.spn_client_id = Some(value),
                AttributeKey::Server => attrs.server = Some(value),
                AttributeKey::Protocol => attrs.protocol = Some(value),
                AttributeKey::StorageEndpointSuffix => attrs.storage_endpoint_suffix = Some(value),
                AttributeKey::Ephemeral => attrs.ephemeral = is_true(&value),
                AttributeKey::PodNamespace => attrs.pod_namespace = Some(value),
                AttributeKey::MountOptions => attrs.mount_options = Some(value),
                AttributeKey::IsHnsEnabled => attrs.is_hns_enabled = is_true(&value),
                AttributeKey::IdentityClientId
                | AttributeKey::IdentityObjectId
                | AttributeKey::IdentityResourceId
                | AttributeKey::MsiEndpoint
                | AttributeKey::SpnTenantId
                | AttributeKey::AadEndpoint => {}
            }
        }
        attrs
    }

    /// Key vault URL, if one is set and non-blank.
    pub fn key_vault_url(&self) -> Option<&str> {
        non_blank(&self.key_vault_url)
    }

    pub fn secret_name(&self) -> Option<&str> {
        non_blank(&self.secret_name)
    }

    pub fn secret_namespace(&self) -> Option<&str> {
        non_blank(&self.secret_namespace)
    }

    pub fn server(&self) -> Option<&str> {
        non_blank(&self.server)
    }

    pub fn storage_endpoint_suffix(&self) -> Option<&str> {
        non_blank(&self.storage_endpoint_suffix)
    }

    /// Whether the declared auth type is managed identity.
    pub fn uses_msi(&self) -> bool {
        self.auth_type
            .as_deref()
            .is_some_and(|t| t.eq_ignore_ascii_case("msi"))
    }

    /// Whether the identity env alone can authenticate blobfuse: managed
    /// identity, or a service principal whose client secret came with the
    /// request. Endpoints and tenant ids on their own are not credentials.
    pub fn has_identity_credential(&self, secrets: &RequestSecrets) -> bool {
        self.uses_msi()
            || (non_blank(&self.spn_client_id).is_some() && secrets.has_spn_client_secret())
    }

    /// Comma-separated `mountOptions` of an ephemeral volume, split.
    pub fn ephemeral_mount_options(&self) -> Vec<String> {
        self.mount_options
            .as_deref()
            .map(|opts| {
                opts.split(',')
                    .map(str::trim)
                    .filter(|o| !o.is_empty())
                    .map(str::to_owned)
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Parsed request secrets.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct RequestSecrets {
    /// Whether the caller sent a non-empty secret map at all.
    pub provided: bool,
    pub account_name: Option<String>,
    pub account_key: Option<String>,
    pub sas_token: Option<String>,
    pub spn_client_secret: Option<String>,
    /// `KEY=VALUE` identity secrets, in key order.
    pub identity_env: Vec<String>,
}

impl RequestSecrets {
    pub fn from_map(secrets: &HashMap<String, String>) -> Self {
        let mut parsed = Self {
            provided: !secrets.is_empty(),
            ..Self::default()
        };
        for (key, value) in sorted_entries(secrets) {
            match SecretKey::parse(key) {
                Some(SecretKey::AccountName) => parsed.account_name = Some(value.clone()),
                Some(SecretKey::AccountKey) => parsed.account_key = Some(value.clone()),
                Some(SecretKey::SasToken) => parsed.sas_token = Some(value.clone()),
                Some(SecretKey::MsiSecret) => parsed.identity_env.push(format!("MSI_SECRET={value}")),
                Some(SecretKey::SpnClientSecret) => {
                    parsed
                        .identity_env
                        .push(format!("AZURE_STORAGE_SPN_CLIENT_SECRET={value}"));
                    parsed.spn_client_secret = Some(value.clone());
                }
                None => {}
            }
        }
        parsed
    }

    pub fn has_spn_client_secret(&self) -> bool {
        non_blank(&self.spn_client_secret).is_some()
    }
}

impl std::fmt::Debug for RequestSecrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestSecrets")
            .field("provided", &self.provided)
            .field("account_name", &self.account_name)
            .field("account_key", &self.account_key.as_ref().map(|_| "***"))
            .field("sas_token", &self.sas_token.as_ref().map(|_| "***"))
            .field("spn_client_secret", &self.spn_client_secret.as_ref().map(|_| "***"))
            .field("identity_env", &self.identity_env.len())
            .finish()
    }
}
