use sysdefs::units::MIB;

// Identity

/// First sid handed out by a default allocator.
pub const DEFAULT_SID_START: u32 = 42;

// Device geometry

/// Space taken by a LUKS header in front of the encrypted payload.
pub const LUKS_HEADER_SIZE: u64 = 2 * MIB;

/// Space reserved for LVM metadata at the start of each physical volume.
pub const LVM_PV_METADATA_SIZE: u64 = MIB;

/// Extent size of newly created volume groups.
pub const LVM_DEFAULT_EXTENT_SIZE: u64 = 4 * MIB;

/// Number of sectors at the end of a disk taken by the backup GPT header and
/// entry array.
pub const GPT_BACKUP_SECTORS: u64 = 33;

// Partition ids

/// MBR partition id for Linux native partitions.
pub const PARTITION_ID_LINUX: u32 = 0x83;

/// MBR partition id for Linux swap partitions.
pub const PARTITION_ID_SWAP: u32 = 0x82;

/// MBR partition id for Linux LVM partitions.
pub const PARTITION_ID_LVM: u32 = 0x8e;

/// MBR partition id for EFI system partitions.
pub const PARTITION_ID_ESP: u32 = 0xef;

/// MBR partition id for Linux software RAID members.
pub const PARTITION_ID_RAID: u32 = 0xfd;

/// MBR partition ids of extended partitions.
pub const PARTITION_IDS_EXTENDED: [u32; 3] = [0x05, 0x0f, 0x85];

// Tools

/// Prefix of the device mapper nodes.
pub const DEV_MAPPER_PATH: &str = "/dev/mapper";
