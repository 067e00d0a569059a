//! Runtime configuration of the plugin process.
//!
//! One binary serves both deployment roles; [`DriverRole`] selects which
//! planes this process answers for.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Default Unix socket the kubelet dials.
pub const DEFAULT_SOCKET_PATH: &str = "/var/lib/kubelet/plugins/block.csi.vultr.com/csi.sock";

/// Which planes this process serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum DriverRole {
    /// Cluster-wide controller plane only.
    Controller,
    /// Per-node plane only.
    Node,
    /// Both planes in one process.
    Both,
}

impl DriverRole {
    pub fn runs_controller(&self) -> bool {
        matches!(self, Self::Controller | Self::Both)
    }

    pub fn runs_node(&self) -> bool {
        matches!(self, Self::Node | Self::Both)
    }
}

/// Startup configuration, normally filled from CLI flags.
#[derive(Debug, Clone)]
pub struct DriverConfig {
    /// Unix domain socket the CSI services listen on.
    pub socket_path: PathBuf,
    pub role: DriverRole,
    /// Cloud API token; required by the controller planes.
    pub api_token: Option<String>,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            socket_path: PathBuf::from(DEFAULT_SOCKET_PATH),
            role: DriverRole::Both,
            api_token: None,
        }
    }
}
