use serde::{de::value::Error, forward_to_deserialize_any, Deserialize, Deserializer, Serialize};
use strum_macros::{Display, EnumIs, EnumIter, IntoStaticStr};

use crate::units::{GIB, KIB, MIB, TIB};

/// Superset of all signatures a block device scan can report for a device.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, EnumIs)]
#[serde(untagged)]
pub enum DetectedSignature {
    Filesystem(FsType),
    Container(ContainerSignature),
    #[serde(untagged)]
    Other(String),
}

impl From<FsType> for DetectedSignature {
    fn from(fs: FsType) -> Self {
        DetectedSignature::Filesystem(fs)
    }
}

impl From<ContainerSignature> for DetectedSignature {
    fn from(signature: ContainerSignature) -> Self {
        DetectedSignature::Container(signature)
    }
}

impl From<&str> for DetectedSignature {
    fn from(signature: &str) -> Self {
        Self::deserialize(&mut EnumDeserializer(signature))
            .unwrap_or_else(|_| DetectedSignature::Other(signature.to_string()))
    }
}

/// Block filesystems that can be created and managed on a block device.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    IntoStaticStr,
    EnumIter,
    Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum FsType {
    Btrfs,
    Ext2,
    Ext3,
    Ext4,
    Ntfs,
    Swap,
    Vfat,
    Xfs,
}

impl FsType {
    /// Smallest size the filesystem can be created with or shrunk to.
    pub fn min_size(self) -> u64 {
        match self {
            Self::Ext2 | Self::Ext3 | Self::Ext4 => 32 * MIB,
            Self::Xfs => 300 * MIB,
            Self::Btrfs => 256 * MIB,
            Self::Vfat => 64 * KIB,
            Self::Ntfs => MIB,
            Self::Swap => 40 * KIB,
        }
    }

    /// Largest size the filesystem supports.
    pub fn max_size(self) -> u64 {
        match self {
            Self::Ext2 | Self::Ext3 | Self::Ext4 => 16 * TIB,
            Self::Vfat => 2 * TIB,
            Self::Ntfs => 256 * TIB,
            Self::Swap => 128 * GIB,
            Self::Xfs | Self::Btrfs => u64::MAX,
        }
    }

    /// Whether the filesystem can be shrunk in place.
    pub fn supports_shrink(self) -> bool {
        matches!(
            self,
            Self::Ext2 | Self::Ext3 | Self::Ext4 | Self::Btrfs | Self::Swap
        )
    }

    /// Whether the filesystem can be grown in place.
    pub fn supports_grow(self) -> bool {
        matches!(
            self,
            Self::Ext2 | Self::Ext3 | Self::Ext4 | Self::Btrfs | Self::Swap | Self::Xfs
        )
    }

    /// Whether the filesystem can be mounted on a directory.
    pub fn is_mountable(self) -> bool {
        !matches!(self, Self::Swap)
    }
}

/// Signatures of containers that are not filesystems but hold other block
/// devices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, IntoStaticStr)]
pub enum ContainerSignature {
    #[serde(rename = "LVM2_member")]
    #[strum(serialize = "LVM2_member")]
    LvmMember,

    #[serde(rename = "crypto_LUKS")]
    #[strum(serialize = "crypto_LUKS")]
    CryptoLuks,

    #[serde(rename = "linux_raid_member")]
    #[strum(serialize = "linux_raid_member")]
    RaidMember,
}

/// Simple deserializer to convert a &str into an enum using serde.
struct EnumDeserializer<'de>(&'de str);
impl<'de> Deserializer<'de> for &mut EnumDeserializer<'de> {
    type Error = Error;

    fn deserialize_any<V>(self, visitor: V) -> Result<V::Value, Self::Error>
    where
        V: serde::de::Visitor<'de>,
    {
        visitor.visit_str(self.0)
    }

    forward_to_deserialize_any! {
        bool i8 i16 i32 i64 i128 u8 u16 u32 u64 u128 f32 f64 char str string
        bytes byte_buf option unit unit_struct newtype_struct seq tuple
        tuple_struct map struct enum identifier ignored_any
    }
}

#[cfg(test)]
mod tests {
    use strum::IntoEnumIterator;

    use super::*;

    #[test]
    fn test_detected_signature() {
        let json = r#""ext4""#;
        let sig: DetectedSignature = serde_json::from_str(json).unwrap();
        assert_eq!(sig, DetectedSignature::Filesystem(FsType::Ext4));
        assert!(sig.is_filesystem());
        assert!(!sig.is_container());

        let json = r#""LVM2_member""#;
        let sig: DetectedSignature = serde_json::from_str(json).unwrap();
        assert_eq!(
            sig,
            DetectedSignature::Container(ContainerSignature::LvmMember)
        );
        assert!(sig.is_container());

        let json = r#""zfs_member""#;
        let sig: DetectedSignature = serde_json::from_str(json).unwrap();
        assert_eq!(sig, DetectedSignature::Other("zfs_member".to_string()));
        assert!(sig.is_other());

        // From<&str> goes through the same path.
        assert_eq!(
            DetectedSignature::from("swap"),
            DetectedSignature::Filesystem(FsType::Swap)
        );
        assert_eq!(
            DetectedSignature::from("crypto_LUKS"),
            DetectedSignature::Container(ContainerSignature::CryptoLuks)
        );
        assert_eq!(
            DetectedSignature::from("squashfs"),
            DetectedSignature::Other("squashfs".to_string())
        );
    }

    #[test]
    fn test_fs_type_names() {
        for fs in FsType::iter() {
            let name: &'static str = fs.into();
            assert_eq!(name, fs.to_string());
            assert_eq!(DetectedSignature::from(name), DetectedSignature::from(fs));
        }
    }

    #[test]
    fn test_fs_type_limits() {
        for fs in FsType::iter() {
            assert!(
                fs.min_size() < fs.max_size(),
                "Filesystem '{fs}' has inconsistent limits"
            );
        }

        assert_eq!(FsType::Ext4.min_size(), 32 * MIB);
        assert_eq!(FsType::Swap.min_size(), 40 * KIB);
        assert!(!FsType::Xfs.supports_shrink());
        assert!(FsType::Xfs.supports_grow());
        assert!(!FsType::Vfat.supports_grow());
        assert!(!FsType::Swap.is_mountable());
    }
}
