//! `/proc/self/mountinfo` parsing.
//!
//! The kernel mount table is the single source of truth for Node-plane
//! idempotency, so it is re-read on every inspection rather than cached.
//! Parsing is a pure function over the file contents, which keeps it
//! testable with string fixtures.

use std::path::{Path, PathBuf};

use crate::error::CsiError;

/// One mount as reported by the kernel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountEntry {
    /// Mount source: a device path for block mounts, the share tag for
    /// virtiofs.
    pub device: String,
    pub mount_point: PathBuf,
    pub fs_type: String,
    pub options: Vec<String>,
}

/// Read and parse the live mount table.
pub fn read() -> Result<Vec<MountEntry>, CsiError> {
    let contents = std::fs::read_to_string("/proc/self/mountinfo")
        .map_err(|e| CsiError::Internal(format!("read mountinfo: {e}")))?;
    parse(&contents)
}

/// Parse mountinfo contents.
///
/// Line shape: `id parent major:minor root mount_point options [optional...]
/// - fs_type source super_options`.  Octal escapes in the mount point
/// (`\040` for space) are decoded.
pub fn parse(input: &str) -> Result<Vec<MountEntry>, CsiError> {
    let mut entries = Vec::new();
    for line in input.lines().filter(|l| !l.trim().is_empty()) {
        let (left, right) = line
            .split_once(" - ")
            .ok_or_else(|| CsiError::Internal(format!("malformed mountinfo line: {line}")))?;

        let mut left_fields = left.split_whitespace();
        let mount_point = left_fields
            .nth(4)
            .ok_or_else(|| CsiError::Internal(format!("malformed mountinfo line: {line}")))?;
        let options = left_fields
            .next()
            .ok_or_else(|| CsiError::Internal(format!("malformed mountinfo line: {line}")))?;

        let mut right_fields = right.split_whitespace();
        let fs_type = right_fields
            .next()
            .ok_or_else(|| CsiError::Internal(format!("malformed mountinfo line: {line}")))?;
        let device = right_fields
            .next()
            .ok_or_else(|| CsiError::Internal(format!("malformed mountinfo line: {line}")))?;

        entries.push(MountEntry {
            device: unescape(device),
            mount_point: PathBuf::from(unescape(mount_point)),
            fs_type: fs_type.to_owned(),
            options: options.split(',').map(str::to_owned).collect(),
        });
    }
    Ok(entries)
}

/// The entry mounted exactly at `path`, if any.
///
/// When stacked mounts cover the same mount point the kernel lists them in
/// mount order; the last one is the visible filesystem.
pub fn entry_at<'a>(entries: &'a [MountEntry], path: &Path) -> Option<&'a MountEntry> {
    entries.iter().rev().find(|e| e.mount_point == path)
}

fn unescape(value: &str) -> String {
    let mut output = String::with_capacity(value.len());
    let bytes = value.as_bytes();
    let mut index = 0;
    while index < bytes.len() {
        if bytes[index] == b'\\' && index + 3 < bytes.len() {
            if let Ok(num) = u8::from_str_radix(&value[index + 1..index + 4], 8) {
                output.push(num as char);
                index += 4;
                continue;
            }
        }
        output.push(bytes[index] as char);
        index += 1;
    }
    output
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
36 25 8:2 / / rw,relatime shared:1 - ext4 /dev/vda1 rw\n\
37 25 0:5 / /proc rw,nosuid,nodev,noexec,relatime - proc proc rw\n\
93 36 253:1 / /var/lib/kubelet/stage rw,noatime shared:2 - ext4 /dev/vdb rw\n\
94 36 0:48 / /mnt/shared rw,relatime - virtiofs share01 rw\n";

    #[test]
    fn parses_devices_and_fs_types() {
        let entries = parse(SAMPLE).unwrap();
        assert_eq!(entries.len(), 4);
        assert_eq!(entries[0].device, "/dev/vda1");
        assert_eq!(entries[0].fs_type, "ext4");
        assert_eq!(entries[2].mount_point, PathBuf::from("/var/lib/kubelet/stage"));
        assert_eq!(entries[2].options, vec!["rw", "noatime"]);
        assert_eq!(entries[3].device, "share01");
        assert_eq!(entries[3].fs_type, "virtiofs");
    }

    #[test]
    fn unescapes_octal_mount_points() {
        let line = "40 25 8:3 / /mnt/with\\040space rw - ext4 /dev/vdc rw\n";
        let entries = parse(line).unwrap();
        assert_eq!(entries[0].mount_point, PathBuf::from("/mnt/with space"));
    }

    #[test]
    fn rejects_malformed_lines() {
        assert!(parse("not a mountinfo line\n").is_err());
    }

    #[test]
    fn entry_at_prefers_topmost_stacked_mount() {
        let stacked = "\
93 36 253:1 / /mnt/a rw - ext4 /dev/vdb rw\n\
95 93 253:2 / /mnt/a rw - ext4 /dev/vdc rw\n";
        let entries = parse(stacked).unwrap();
        let entry = entry_at(&entries, Path::new("/mnt/a")).unwrap();
        assert_eq!(entry.device, "/dev/vdc");
        assert!(entry_at(&entries, Path::new("/mnt/b")).is_none());
    }
}
