//! Identity plane: plugin discovery and health.

use async_trait::async_trait;

use crate::config::DriverRole;
use crate::error::CsiError;
use crate::identity::CsiIdentity;
use crate::types::{PluginCapability, PluginInfo, PLUGIN_NAME};

/// [`CsiIdentity`] implementation shared by both deployment roles.
pub struct IdentityService {
    role: DriverRole,
}

impl IdentityService {
    pub fn new(role: DriverRole) -> Self {
        Self { role }
    }
}

#[async_trait]
impl CsiIdentity for IdentityService {
    async fn get_plugin_info(&self) -> Result<PluginInfo, CsiError> {
        Ok(PluginInfo {
            name: PLUGIN_NAME.to_owned(),
            vendor_version: env!("CARGO_PKG_VERSION").to_owned(),
        })
    }

    async fn probe(&self) -> Result<bool, CsiError> {
        Ok(true)
    }

    async fn get_plugin_capabilities(&self) -> Result<Vec<PluginCapability>, CsiError> {
        let mut capabilities = vec![PluginCapability::VolumeAccessibilityConstraints];
        if self.role.runs_controller() {
            capabilities.push(PluginCapability::ControllerService);
        }
        Ok(capabilities)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn plugin_info_reports_name_and_version() {
        let identity = IdentityService::new(DriverRole::Both);
        let info = identity.get_plugin_info().await.unwrap();
        assert_eq!(info.name, PLUGIN_NAME);
        assert_eq!(info.vendor_version, env!("CARGO_PKG_VERSION"));
        assert!(identity.probe().await.unwrap());
    }

    #[tokio::test]
    async fn controller_service_is_advertised_by_role() {
        let controller = IdentityService::new(DriverRole::Controller);
        assert!(controller
            .get_plugin_capabilities()
            .await
            .unwrap()
            .contains(&PluginCapability::ControllerService));

        let node = IdentityService::new(DriverRole::Node);
        assert!(!node
            .get_plugin_capabilities()
            .await
            .unwrap()
            .contains(&PluginCapability::ControllerService));
    }
}
