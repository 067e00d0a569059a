//! The mount collaborator.
//!
//! [`Mounter`] is the interface the Node plane drives the kernel through;
//! [`SystemMounter`] is the real implementation (mount syscalls via `nix`,
//! `blkid`/`mkfs`/`resize2fs`/`xfs_growfs` as child processes).  The mount
//! table is inspected fresh for every question — mounts appear and disappear
//! underneath the plugin, so nothing here caches.

pub mod table;

#[cfg(test)]
pub(crate) mod fake;

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use nix::mount::MsFlags;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::CsiError;

/// Mount operations the Node plane consumes.
#[async_trait]
pub trait Mounter: Send + Sync {
    /// Mount `source` at `target`.
    async fn mount(
        &self,
        source: &str,
        target: &Path,
        fs_type: &str,
        options: &[String],
    ) -> Result<(), CsiError>;

    /// Format `source` if it carries no filesystem, then mount it.
    async fn format_and_mount(
        &self,
        source: &str,
        target: &Path,
        fs_type: &str,
        options: &[String],
    ) -> Result<(), CsiError>;

    async fn is_mount_point(&self, path: &Path) -> Result<bool, CsiError>;

    /// Unmount `path` (all stacked mounts when `umount_all`) and remove the
    /// mount-point directory.  Succeeds on a non-mount-point.
    async fn cleanup_mount_point(&self, path: &Path, umount_all: bool) -> Result<(), CsiError>;

    /// The device mounted at `path` and how many mounts reference it.
    async fn device_from_mount(&self, path: &Path) -> Result<(String, u32), CsiError>;

    /// Whether the filesystem at `mount_point` is smaller than `device`.
    async fn need_resize(&self, device: &str, mount_point: &Path) -> Result<bool, CsiError>;

    /// Grow the filesystem at `mount_point` to fill `device`, online.
    async fn resize(&self, device: &str, mount_point: &Path) -> Result<(), CsiError>;
}

/// [`Mounter`] backed by the live kernel.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemMounter;

impl SystemMounter {
    pub fn new() -> Self {
        Self
    }

    fn canonical(path: &Path) -> Result<Option<PathBuf>, CsiError> {
        match std::fs::canonicalize(path) {
            Ok(p) => Ok(Some(p)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(CsiError::Internal(format!(
                "canonicalize {}: {e}",
                path.display()
            ))),
        }
    }

    /// Probe for an existing filesystem; `None` means the device is blank.
    async fn probe_fs_type(&self, device: &str) -> Result<Option<String>, CsiError> {
        let output = Command::new("blkid")
            .args(["-o", "value", "-s", "TYPE", device])
            .output()
            .await
            .map_err(|e| CsiError::Internal(format!("blkid {device}: {e}")))?;
        if output.status.success() {
            let fs = String::from_utf8_lossy(&output.stdout).trim().to_owned();
            return Ok((!fs.is_empty()).then_some(fs));
        }
        // blkid exits 2 when the device carries no recognizable signature.
        if output.status.code() == Some(2) {
            return Ok(None);
        }
        Err(CsiError::Internal(format!(
            "blkid {device} failed: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        )))
    }

    async fn make_filesystem(&self, device: &str, fs_type: &str) -> Result<(), CsiError> {
        let mut command = Command::new(format!("mkfs.{fs_type}"));
        if fs_type.starts_with("ext") {
            command.arg("-F");
        } else if fs_type == "xfs" {
            command.arg("-f");
        }
        let output = command
            .arg(device)
            .output()
            .await
            .map_err(|e| CsiError::Internal(format!("mkfs.{fs_type} {device}: {e}")))?;
        if !output.status.success() {
            return Err(CsiError::Internal(format!(
                "mkfs.{fs_type} {device} failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(())
    }

    fn block_device_size(device: &str) -> Result<u64, CsiError> {
        let resolved = std::fs::canonicalize(device)
            .map_err(|e| CsiError::Internal(format!("canonicalize {device}: {e}")))?;
        let name = resolved
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| CsiError::Internal(format!("no device name in {device}")))?
            .to_owned();
        let sectors = std::fs::read_to_string(format!("/sys/class/block/{name}/size"))
            .map_err(|e| CsiError::Internal(format!("read size of {name}: {e}")))?;
        let sectors: u64 = sectors
            .trim()
            .parse()
            .map_err(|e| CsiError::Internal(format!("parse size of {name}: {e}")))?;
        Ok(sectors * 512)
    }
}

/// Translate mount flag strings into `MsFlags` plus fs-specific data.
fn parse_option_flags(options: &[String]) -> (MsFlags, Option<String>) {
    let mut flags = MsFlags::empty();
    let mut data = Vec::new();
    for option in options {
        match option.as_str() {
            "bind" => flags |= MsFlags::MS_BIND,
            "ro" => flags |= MsFlags::MS_RDONLY,
            "remount" => flags |= MsFlags::MS_REMOUNT,
            "noatime" => flags |= MsFlags::MS_NOATIME,
            "nodev" => flags |= MsFlags::MS_NODEV,
            "noexec" => flags |= MsFlags::MS_NOEXEC,
            "nosuid" => flags |= MsFlags::MS_NOSUID,
            other => data.push(other),
        }
    }
    let data = (!data.is_empty()).then(|| data.join(","));
    (flags, data)
}

/// `statvfs` under-reports the filesystem by its metadata overhead; ext4
/// with default mkfs options stays within 10%.
fn device_outgrows_filesystem(device_bytes: u64, filesystem_bytes: u64) -> bool {
    device_bytes > filesystem_bytes.saturating_add(filesystem_bytes / 10)
}

#[async_trait]
impl Mounter for SystemMounter {
    async fn mount(
        &self,
        source: &str,
        target: &Path,
        fs_type: &str,
        options: &[String],
    ) -> Result<(), CsiError> {
        let (flags, data) = parse_option_flags(options);
        let mount_failed = |e: nix::Error| CsiError::MountFailed {
            path: target.display().to_string(),
            reason: e.to_string(),
        };

        nix::mount::mount(
            Some(source),
            target,
            Some(fs_type),
            flags,
            data.as_deref(),
        )
        .map_err(mount_failed)?;

        // A bind mount ignores MS_RDONLY on the first call on some kernels;
        // apply it with a remount.
        if flags.contains(MsFlags::MS_BIND) && flags.contains(MsFlags::MS_RDONLY) {
            nix::mount::mount(
                None::<&str>,
                target,
                None::<&str>,
                MsFlags::MS_BIND | MsFlags::MS_REMOUNT | MsFlags::MS_RDONLY,
                None::<&str>,
            )
            .map_err(|e| CsiError::MountFailed {
                path: target.display().to_string(),
                reason: format!("remount read-only: {e}"),
            })?;
        }

        debug!(source, target = %target.display(), fs_type, "mounted");
        Ok(())
    }

    async fn format_and_mount(
        &self,
        source: &str,
        target: &Path,
        fs_type: &str,
        options: &[String],
    ) -> Result<(), CsiError> {
        match self.probe_fs_type(source).await? {
            Some(existing) if existing != fs_type => {
                warn!(
                    source,
                    existing, requested = fs_type, "device already formatted, keeping filesystem",
                );
            }
            Some(_) => {}
            None => self.make_filesystem(source, fs_type).await?,
        }
        self.mount(source, target, fs_type, options).await
    }

    async fn is_mount_point(&self, path: &Path) -> Result<bool, CsiError> {
        let Some(path) = Self::canonical(path)? else {
            return Ok(false);
        };
        let entries = table::read()?;
        Ok(table::entry_at(&entries, &path).is_some())
    }

    async fn cleanup_mount_point(&self, path: &Path, umount_all: bool) -> Result<(), CsiError> {
        let unmount_failed = |e: nix::Error| CsiError::UnmountFailed {
            path: path.display().to_string(),
            reason: e.to_string(),
        };

        while self.is_mount_point(path).await? {
            nix::mount::umount(path).map_err(unmount_failed)?;
            if !umount_all {
                break;
            }
        }

        match tokio::fs::remove_dir(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CsiError::UnmountFailed {
                path: path.display().to_string(),
                reason: format!("remove mount point: {e}"),
            }),
        }
    }

    async fn device_from_mount(&self, path: &Path) -> Result<(String, u32), CsiError> {
        let canon = Self::canonical(path)?
            .ok_or_else(|| CsiError::NotFound(format!("path {}", path.display())))?;
        let entries = table::read()?;
        let entry = table::entry_at(&entries, &canon)
            .ok_or_else(|| CsiError::NotFound(format!("mount at {}", path.display())))?;
        let refcount = entries.iter().filter(|e| e.device == entry.device).count() as u32;
        Ok((entry.device.clone(), refcount))
    }

    async fn need_resize(&self, device: &str, mount_point: &Path) -> Result<bool, CsiError> {
        let device_bytes = Self::block_device_size(device)?;
        let stat = nix::sys::statvfs::statvfs(mount_point)
            .map_err(|e| CsiError::Internal(format!("statvfs {}: {e}", mount_point.display())))?;
        let filesystem_bytes = stat.blocks() as u64 * stat.fragment_size() as u64;
        Ok(device_outgrows_filesystem(device_bytes, filesystem_bytes))
    }

    async fn resize(&self, device: &str, mount_point: &Path) -> Result<(), CsiError> {
        let canon = Self::canonical(mount_point)?
            .ok_or_else(|| CsiError::NotFound(format!("path {}", mount_point.display())))?;
        let entries = table::read()?;
        let fs_type = table::entry_at(&entries, &canon)
            .map(|e| e.fs_type.clone())
            .ok_or_else(|| CsiError::NotFound(format!("mount at {}", mount_point.display())))?;

        let mut command = match fs_type.as_str() {
            "ext2" | "ext3" | "ext4" => {
                let mut c = Command::new("resize2fs");
                c.arg(device);
                c
            }
            "xfs" => {
                let mut c = Command::new("xfs_growfs");
                c.arg(mount_point);
                c
            }
            other => {
                return Err(CsiError::Internal(format!(
                    "online resize not supported for {other}"
                )))
            }
        };

        let output = command
            .output()
            .await
            .map_err(|e| CsiError::Internal(format!("resize {device}: {e}")))?;
        if !output.status.success() {
            return Err(CsiError::Internal(format!(
                "resize {device} failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        debug!(device, mount_point = %mount_point.display(), %fs_type, "filesystem grown");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn option_flags_split_into_flags_and_data() {
        let options = vec![
            "bind".to_owned(),
            "ro".to_owned(),
            "noatime".to_owned(),
            "data=ordered".to_owned(),
            "discard".to_owned(),
        ];
        let (flags, data) = parse_option_flags(&options);
        assert!(flags.contains(MsFlags::MS_BIND));
        assert!(flags.contains(MsFlags::MS_RDONLY));
        assert!(flags.contains(MsFlags::MS_NOATIME));
        assert_eq!(data.as_deref(), Some("data=ordered,discard"));

        let (flags, data) = parse_option_flags(&[]);
        assert!(flags.is_empty());
        assert!(data.is_none());
    }

    #[test]
    fn growth_heuristic_tolerates_metadata_overhead() {
        let gib = 1u64 << 30;
        // Freshly grown 10 GiB ext4: statvfs reports ~9.8 GiB.
        assert!(!device_outgrows_filesystem(10 * gib, 10 * gib * 98 / 100));
        // Device grown to 20 GiB while the filesystem still covers 10.
        assert!(device_outgrows_filesystem(20 * gib, 10 * gib * 98 / 100));
        assert!(!device_outgrows_filesystem(0, 0));
    }

    #[tokio::test]
    async fn is_mount_point_false_for_missing_path() {
        let mounter = SystemMounter::new();
        let missing = Path::new("/definitely/not/a/real/path");
        assert!(!mounter.is_mount_point(missing).await.unwrap());
    }

    #[tokio::test]
    async fn cleanup_of_missing_path_succeeds() {
        let mounter = SystemMounter::new();
        let missing = Path::new("/definitely/not/a/real/path");
        mounter.cleanup_mount_point(missing, true).await.unwrap();
    }

    #[tokio::test]
    async fn cleanup_removes_plain_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("stage");
        tokio::fs::create_dir(&dir).await.unwrap();
        let mounter = SystemMounter::new();
        mounter.cleanup_mount_point(&dir, true).await.unwrap();
        assert!(!dir.exists());
    }

    #[tokio::test]
    async fn device_from_mount_requires_a_mount() {
        let tmp = tempfile::tempdir().unwrap();
        let mounter = SystemMounter::new();
        let err = mounter.device_from_mount(tmp.path()).await.unwrap_err();
        assert!(matches!(err, CsiError::NotFound(_)));
    }
}
