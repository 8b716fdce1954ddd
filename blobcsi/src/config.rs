//! Cloud provider configuration file.
//!
//! Only the fields the node plugin needs are read; everything else in the
//! file is ignored.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

#[derive(Debug, Default, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CloudConfig {
    #[serde(default)]
    pub resource_group: String,
    #[serde(default)]
    pub storage_endpoint_suffix: String,
}

impl CloudConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read cloud config: {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse cloud config: {}", path.display()))
    }
}
