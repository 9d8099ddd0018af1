//! Device variants.
//!
//! Every variant is a plain attribute struct implementing
//! [`DeviceImpl`]. [`DeviceKind`] is the closed set of variants a
//! [`Device`](crate::devicegraph::Device) can hold; its discriminant
//! [`DeviceType`] names the variant in saved devicegraphs and messages.

use serde_yaml::Value;
use strum_macros::{Display, EnumDiscriminants, EnumIter, EnumString, IntoStaticStr};

use crate::{
    actiongraph::{ResizeMode, Tense},
    devicegraph::{DeviceGraph, DeviceImpl, DeviceIndex, DeviceRef, Holder, ResizeInfo},
    error::{DeviceGraphError, ProbeError},
};

mod disk;
mod encryption;
mod filesystem;
mod lvm_lv;
mod lvm_pv;
mod lvm_vg;
mod multipath;
mod partition;
mod partition_table;

pub use disk::Disk;
pub use encryption::Encryption;
pub use filesystem::Filesystem;
pub use lvm_lv::LvmLv;
pub use lvm_pv::LvmPv;
pub use lvm_vg::LvmVg;
pub use multipath::Multipath;
pub use partition::{Partition, PartitionType};
pub use partition_table::{PartitionTable, PtType};

/// Typed access to one variant of [`DeviceKind`].
pub trait DeviceVariant: DeviceImpl + Into<DeviceKind> + Sized {
    const DEVICE_TYPE: DeviceType;

    fn from_kind(kind: &DeviceKind) -> Option<&Self>;

    fn from_kind_mut(kind: &mut DeviceKind) -> Option<&mut Self>;
}

macro_rules! device_kinds {
    ($($variant:ident),+ $(,)?) => {
        /// Variant data of a device.
        #[derive(Debug, Clone, PartialEq, EnumDiscriminants)]
        #[strum_discriminants(
            name(DeviceType),
            derive(Hash, PartialOrd, Ord, Display, EnumString, IntoStaticStr, EnumIter)
        )]
        pub enum DeviceKind {
            $($variant($variant),)+
        }

        impl DeviceKind {
            pub fn imp(&self) -> &dyn DeviceImpl {
                match self {
                    $(DeviceKind::$variant(device) => device,)+
                }
            }

            pub fn imp_mut(&mut self) -> &mut dyn DeviceImpl {
                match self {
                    $(DeviceKind::$variant(device) => device,)+
                }
            }

            /// Serializes the variant attributes.
            pub(crate) fn to_value(&self) -> Result<Value, serde_yaml::Error> {
                match self {
                    $(DeviceKind::$variant(device) => serde_yaml::to_value(device),)+
                }
            }

            /// Deserializes the attributes of a variant.
            pub(crate) fn from_value(
                device_type: DeviceType,
                value: Value,
            ) -> Result<Self, serde_yaml::Error> {
                match device_type {
                    $(DeviceType::$variant => serde_yaml::from_value(value).map(DeviceKind::$variant),)+
                }
            }
        }

        $(
            impl From<$variant> for DeviceKind {
                fn from(device: $variant) -> Self {
                    DeviceKind::$variant(device)
                }
            }

            impl DeviceVariant for $variant {
                const DEVICE_TYPE: DeviceType = DeviceType::$variant;

                fn from_kind(kind: &DeviceKind) -> Option<&Self> {
                    match kind {
                        DeviceKind::$variant(device) => Some(device),
                        _ => None,
                    }
                }

                fn from_kind_mut(kind: &mut DeviceKind) -> Option<&mut Self> {
                    match kind {
                        DeviceKind::$variant(device) => Some(device),
                        _ => None,
                    }
                }
            }
        )+
    };
}

device_kinds!(
    Disk,
    Multipath,
    PartitionTable,
    Partition,
    LvmPv,
    LvmVg,
    LvmLv,
    Encryption,
    Filesystem,
);

/// Creates a device and links it below `parent`. Nothing is left behind on
/// failure.
fn create_child(
    graph: &mut DeviceGraph,
    parent: DeviceIndex,
    kind: impl Into<DeviceKind>,
    holder: Holder,
) -> Result<DeviceIndex, DeviceGraphError> {
    graph.device(parent)?;
    let index = graph.create_device(kind)?;
    if let Err(err) = graph.add_edge(parent, index, holder) {
        graph.remove_vertex(index)?;
        return Err(err);
    }
    Ok(index)
}

/// Fails unless `index` is a block device nothing uses yet.
fn unused_blk_device(
    graph: &DeviceGraph,
    index: DeviceIndex,
) -> Result<DeviceRef<'_>, DeviceGraphError> {
    let dev = graph.device(index)?;
    if dev.region().is_none() {
        return Err(DeviceGraphError::WrongDeviceType {
            sid: dev.sid(),
            expected: "block device".into(),
            actual: dev.device_type(),
        });
    }

    if dev.num_children() > 0 {
        return Err(DeviceGraphError::DeviceInUse(dev.sid()));
    }

    Ok(dev)
}

/// Narrows `info` by the resize info of every child of `dev`.
fn combine_children(info: &mut ResizeInfo, dev: DeviceRef<'_>) {
    for child in dev.children() {
        info.combine(&child.detect_resize_info());
    }
    info.check();
}

/// Verb of a resize action.
fn resize_verb(mode: ResizeMode, tense: Tense) -> &'static str {
    match mode {
        ResizeMode::Shrink => tense.pick("Shrink", "Shrinking"),
        ResizeMode::Grow => tense.pick("Grow", "Growing"),
    }
}

/// Name of the block device a device without its own block device lives on.
fn parent_name(dev: DeviceRef<'_>) -> String {
    dev.parent()
        .map(|parent| parent.displayname())
        .unwrap_or_else(|| "<unknown>".into())
}

/// Splits a device mapper name of a logical volume into volume group and
/// logical volume names. Hyphens inside the names are doubled.
pub fn split_lvm_name(dm_name: &str) -> Result<(String, String), ProbeError> {
    let bytes = dm_name.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'-' {
            if bytes.get(i + 1) == Some(&b'-') {
                i += 2;
                continue;
            }

            let (vg_name, lv_name) = (&dm_name[..i], &dm_name[i + 1..]);
            if vg_name.is_empty() || lv_name.is_empty() {
                break;
            }
            return Ok((vg_name.replace("--", "-"), lv_name.replace("--", "-")));
        }
        i += 1;
    }
    Err(ProbeError::InvalidLvmName(dm_name.to_string()))
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use strum::IntoEnumIterator;

    use super::*;

    #[test]
    fn test_split_lvm_name() {
        assert_eq!(
            split_lvm_name("system-root").unwrap(),
            ("system".into(), "root".into())
        );
        assert_eq!(
            split_lvm_name("sys--vg-root--lv").unwrap(),
            ("sys-vg".into(), "root-lv".into())
        );
        assert_eq!(split_lvm_name("a---b").unwrap(), ("a-".into(), "b".into()));
        assert_eq!(
            split_lvm_name("noseparator"),
            Err(ProbeError::InvalidLvmName("noseparator".into()))
        );
        assert!(split_lvm_name("only--doubled").is_err());
        assert!(split_lvm_name("-root").is_err());
    }

    #[test]
    fn test_device_type_names() {
        for device_type in DeviceType::iter() {
            let name: &'static str = device_type.into();
            assert_eq!(DeviceType::from_str(name).unwrap(), device_type);
        }
        assert_eq!(DeviceType::LvmVg.to_string(), "LvmVg");
        assert!(DeviceType::from_str("Tape").is_err());
    }
}
