//! In-memory mount table used by the Node-plane test suites.
//!
//! Mimics the kernel's observable behavior: mounts stack, bind mounts
//! surface the underlying device at the target, and cleanup removes
//! whatever is mounted at a path.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use super::Mounter;
use crate::error::CsiError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct MountRecord {
    pub source: String,
    pub target: PathBuf,
    pub fs_type: String,
    pub options: Vec<String>,
}

/// Clones share state, so a test can hand "the same kernel" to a second
/// backend and simulate a plugin restart.
#[derive(Default, Clone)]
pub(crate) struct FakeMounter {
    mounts: Arc<Mutex<Vec<MountRecord>>>,
    formatted: Arc<Mutex<HashSet<String>>>,
    resize_calls: Arc<Mutex<Vec<(String, PathBuf)>>>,
    needs_resize: Arc<AtomicBool>,
}

impl FakeMounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_need_resize(&self, value: bool) {
        self.needs_resize.store(value, Ordering::SeqCst);
    }

    pub fn mounts(&self) -> Vec<MountRecord> {
        self.mounts.lock().unwrap().clone()
    }

    pub fn mounts_at(&self, path: &Path) -> Vec<MountRecord> {
        self.mounts
            .lock()
            .unwrap()
            .iter()
            .filter(|m| m.target == path)
            .cloned()
            .collect()
    }

    pub fn formatted_devices(&self) -> Vec<String> {
        self.formatted.lock().unwrap().iter().cloned().collect()
    }

    pub fn resize_calls(&self) -> Vec<(String, PathBuf)> {
        self.resize_calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Mounter for FakeMounter {
    async fn mount(
        &self,
        source: &str,
        target: &Path,
        fs_type: &str,
        options: &[String],
    ) -> Result<(), CsiError> {
        let mut mounts = self.mounts.lock().unwrap();
        // A bind mount surfaces the bound filesystem's device at the target,
        // the way the kernel mount table reports it.
        let effective_source = if options.iter().any(|o| o == "bind") {
            mounts
                .iter()
                .rev()
                .find(|m| m.target == Path::new(source))
                .map(|m| m.source.clone())
                .unwrap_or_else(|| source.to_owned())
        } else {
            source.to_owned()
        };
        mounts.push(MountRecord {
            source: effective_source,
            target: target.to_path_buf(),
            fs_type: fs_type.to_owned(),
            options: options.to_vec(),
        });
        Ok(())
    }

    async fn format_and_mount(
        &self,
        source: &str,
        target: &Path,
        fs_type: &str,
        options: &[String],
    ) -> Result<(), CsiError> {
        self.formatted.lock().unwrap().insert(source.to_owned());
        self.mount(source, target, fs_type, options).await
    }

    async fn is_mount_point(&self, path: &Path) -> Result<bool, CsiError> {
        Ok(self.mounts.lock().unwrap().iter().any(|m| m.target == path))
    }

    async fn cleanup_mount_point(&self, path: &Path, umount_all: bool) -> Result<(), CsiError> {
        let mut mounts = self.mounts.lock().unwrap();
        if umount_all {
            mounts.retain(|m| m.target != path);
        } else if let Some(index) = mounts.iter().rposition(|m| m.target == path) {
            mounts.remove(index);
        }
        Ok(())
    }

    async fn device_from_mount(&self, path: &Path) -> Result<(String, u32), CsiError> {
        let mounts = self.mounts.lock().unwrap();
        let entry = mounts
            .iter()
            .rev()
            .find(|m| m.target == path)
            .ok_or_else(|| CsiError::NotFound(format!("mount at {}", path.display())))?;
        let refcount = mounts.iter().filter(|m| m.source == entry.source).count() as u32;
        Ok((entry.source.clone(), refcount))
    }

    async fn need_resize(&self, _device: &str, _mount_point: &Path) -> Result<bool, CsiError> {
        Ok(self.needs_resize.load(Ordering::SeqCst))
    }

    async fn resize(&self, device: &str, mount_point: &Path) -> Result<(), CsiError> {
        self.resize_calls
            .lock()
            .unwrap()
            .push((device.to_owned(), mount_point.to_path_buf()));
        Ok(())
    }
}
