//! Plugin identity: name, version, health and advertised capabilities.

use async_trait::async_trait;

use crate::error::CsiError;
use crate::types::{PluginCapability, PluginInfo};

#[async_trait]
pub trait CsiIdentity: Send + Sync {
    async fn get_plugin_info(&self) -> Result<PluginInfo, CsiError>;

    /// The node plugin holds no connections of its own, so being able to
    /// answer at all means it is ready.
    async fn probe(&self) -> Result<bool, CsiError> {
        Ok(true)
    }

    async fn get_plugin_capabilities(&self) -> Result<Vec<PluginCapability>, CsiError>;
}
