//! The publish-context schema shared by the Controller and Node planes.
//!
//! The context travels the wire as an opaque string map; this module is the
//! single place that knows its keys, so neither plane scatters string
//! literals.  The Controller emits it from [`PublishContext::to_map`] after a
//! successful attach, and the Node parses it back with
//! [`PublishContext::from_map`] when staging.

use std::collections::HashMap;

use crate::error::CsiError;
use crate::types::VolumeClass;

/// Key carrying the stable device serial / share name.
pub const MOUNT_VOL_NAME_KEY: &str = "mount_vol_name";

/// Key carrying the storage class (`block` or `vfs`).
pub const STORAGE_TYPE_KEY: &str = "storage_type";

/// Validated view of the opaque context map.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishContext {
    /// Stable label used to locate the volume on the node.
    pub mount_vol_name: String,
    pub storage_type: VolumeClass,
}

impl PublishContext {
    pub fn new(mount_vol_name: impl Into<String>, storage_type: VolumeClass) -> Self {
        Self {
            mount_vol_name: mount_vol_name.into(),
            storage_type,
        }
    }

    /// Parse a context received from the Controller.
    ///
    /// A missing `storage_type` is treated as `block`: volumes attached
    /// before the vfs class existed carry no storage type in their cached
    /// context.
    pub fn from_map(map: &HashMap<String, String>) -> Result<Self, CsiError> {
        let mount_vol_name = map
            .get(MOUNT_VOL_NAME_KEY)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| {
                CsiError::InvalidArgument(format!(
                    "publish context is missing {MOUNT_VOL_NAME_KEY}"
                ))
            })?
            .clone();

        let storage_type = match map.get(STORAGE_TYPE_KEY).map(String::as_str) {
            None | Some("") => VolumeClass::Block,
            Some(raw) => VolumeClass::parse(raw).ok_or_else(|| {
                CsiError::InvalidArgument(format!(
                    "invalid storage type context from controller: {raw}"
                ))
            })?,
        };

        Ok(Self {
            mount_vol_name,
            storage_type,
        })
    }

    /// Serialize for the wire.
    pub fn to_map(&self) -> HashMap<String, String> {
        HashMap::from([
            (MOUNT_VOL_NAME_KEY.to_owned(), self.mount_vol_name.clone()),
            (
                STORAGE_TYPE_KEY.to_owned(),
                self.storage_type.as_str().to_owned(),
            ),
        ])
    }
}
