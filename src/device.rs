//! The device collaborator: stable by-id link discovery.
//!
//! On bus hotplug the orchestrator calls stage before udev settles, so the
//! expected `/dev/disk/by-id/virtio-<serial>` link may not exist yet.
//! [`ByIdLocator`] polls for it with a bounded budget, and falls back to
//! scanning sysfs serial files and creating the link itself when the kernel
//! already knows the device but udev has not materialized the symlink.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::CsiError;
use crate::types::{DISK_PATH, DISK_PREFIX};

/// Resolves a stable device label to a device path on this node.
#[async_trait]
pub trait DeviceLocator: Send + Sync {
    /// Wait for the by-id link of `serial` to appear and return its path.
    async fn link_by_serial(
        &self,
        serial: &str,
        token: &CancellationToken,
    ) -> Result<PathBuf, CsiError>;
}

/// [`DeviceLocator`] over `/dev/disk/by-id` and `/sys/block`.
#[derive(Debug, Clone)]
pub struct ByIdLocator {
    disk_path: PathBuf,
    sys_block: PathBuf,
    prefix: String,
    poll_interval: Duration,
    attempts: u32,
}

impl Default for ByIdLocator {
    fn default() -> Self {
        Self {
            disk_path: PathBuf::from(DISK_PATH),
            sys_block: PathBuf::from("/sys/block"),
            prefix: DISK_PREFIX.to_owned(),
            poll_interval: Duration::from_millis(500),
            attempts: 20,
        }
    }
}

impl ByIdLocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Locator rooted at alternate directories, for tests.
    pub fn with_paths(disk_path: impl Into<PathBuf>, sys_block: impl Into<PathBuf>) -> Self {
        Self {
            disk_path: disk_path.into(),
            sys_block: sys_block.into(),
            ..Self::default()
        }
    }

    pub fn with_budget(mut self, poll_interval: Duration, attempts: u32) -> Self {
        self.poll_interval = poll_interval;
        self.attempts = attempts;
        self
    }

    /// Kernel device name (e.g. `vdb`) whose sysfs serial matches.
    fn find_device_by_serial(&self, serial: &str) -> Option<String> {
        let entries = std::fs::read_dir(&self.sys_block).ok()?;
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().into_owned();
            let Ok(contents) = std::fs::read_to_string(entry.path().join("serial")) else {
                continue;
            };
            if contents.trim() == serial {
                return Some(name);
            }
        }
        None
    }

    fn create_link(&self, device_name: &str, link: &Path) -> Result<(), CsiError> {
        std::fs::create_dir_all(&self.disk_path)
            .map_err(|e| CsiError::Internal(format!("create {}: {e}", self.disk_path.display())))?;
        match std::os::unix::fs::symlink(format!("/dev/{device_name}"), link) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(()),
            Err(e) => Err(CsiError::Internal(format!(
                "link {} -> /dev/{device_name}: {e}",
                link.display()
            ))),
        }
    }
}

#[async_trait]
impl DeviceLocator for ByIdLocator {
    async fn link_by_serial(
        &self,
        serial: &str,
        token: &CancellationToken,
    ) -> Result<PathBuf, CsiError> {
        let link = self.disk_path.join(format!("{}{}", self.prefix, serial));

        for attempt in 0..self.attempts {
            if link.exists() {
                return Ok(link);
            }

            if let Some(device_name) = self.find_device_by_serial(serial) {
                info!(serial, device = %device_name, link = %link.display(), "creating missing by-id link");
                self.create_link(&device_name, &link)?;
                return Ok(link);
            }

            debug!(serial, attempt, "device link not present yet");
            tokio::select! {
                _ = token.cancelled() => {
                    return Err(CsiError::Canceled(format!("waiting for device {serial}")));
                }
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }

        Err(CsiError::NotFound(format!(
            "device link {} for serial {serial}",
            link.display()
        )))
    }
}

#[cfg(test)]
pub(crate) mod fake {
    use std::collections::HashSet;
    use std::path::PathBuf;
    use std::sync::Mutex;

    use super::*;

    /// Locator that resolves every serial immediately, except the ones a
    /// test marks missing.  Clones share state.
    #[derive(Default, Clone)]
    pub(crate) struct FakeLocator {
        missing: std::sync::Arc<Mutex<HashSet<String>>>,
    }

    impl FakeLocator {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn mark_missing(&self, serial: &str) {
            self.missing.lock().unwrap().insert(serial.to_owned());
        }

        pub fn expected_path(serial: &str) -> PathBuf {
            PathBuf::from(DISK_PATH).join(format!("{DISK_PREFIX}{serial}"))
        }
    }

    #[async_trait]
    impl DeviceLocator for FakeLocator {
        async fn link_by_serial(
            &self,
            serial: &str,
            _token: &CancellationToken,
        ) -> Result<PathBuf, CsiError> {
            if self.missing.lock().unwrap().contains(serial) {
                return Err(CsiError::NotFound(format!("device link for {serial}")));
            }
            Ok(Self::expected_path(serial))
        }
    }
}
