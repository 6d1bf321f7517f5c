// On-disk constants for the read-only image format
// All multi-byte fields are little-endian

use static_assertions::const_assert;

/// Byte offset of the superblock from the start of the image
pub const SUPER_OFFSET: u64 = 1024;
pub const SUPER_MAGIC: u32 = 0xE0F5_E1E2;
/// Bytes of the superblock that carry fields
pub const SUPER_SIZE: usize = 128;

pub const MIN_BLOCK_BITS: u8 = 9;
pub const MAX_BLOCK_BITS: u8 = 16;

/// Superblock carries a crc32c checksum
pub const FEATURE_COMPAT_SB_CHKSUM: u32 = 0x0000_0001;

/// Inodes are addressed in 32-byte slots inside the metadata area
pub const ISLOT_BITS: u32 = 5;
pub const INODE_COMPACT_SIZE: u32 = 32;
pub const INODE_EXTENDED_SIZE: u32 = 64;

const_assert!(INODE_COMPACT_SIZE == 1 << ISLOT_BITS);
const_assert!(INODE_EXTENDED_SIZE % INODE_COMPACT_SIZE == 0);

/// i_format bit selecting the 64-byte inode header
pub const INODE_VERSION_EXTENDED: u16 = 0x0001;
pub const INODE_DATALAYOUT_SHIFT: u16 = 1;
pub const INODE_DATALAYOUT_MASK: u16 = 0x0007;

pub const DATALAYOUT_FLAT_PLAIN: u16 = 0;
pub const DATALAYOUT_COMPRESSED_FULL: u16 = 1;
pub const DATALAYOUT_FLAT_INLINE: u16 = 2;
pub const DATALAYOUT_COMPRESSED_COMPACT: u16 = 3;
pub const DATALAYOUT_CHUNK_BASED: u16 = 4;

/// Inline xattr area: 12-byte header followed by 4-byte entry slots
pub const XATTR_IBODY_HEADER_SIZE: u32 = 12;
pub const XATTR_ENTRY_SIZE: u32 = 4;

pub const CHUNK_FORMAT_BLKBITS_MASK: u16 = 0x001F;
pub const CHUNK_FORMAT_INDEXES: u16 = 0x0020;
pub const CHUNK_FORMAT_ALL: u16 = CHUNK_FORMAT_BLKBITS_MASK | CHUNK_FORMAT_INDEXES;

/// Chunk slot value marking a hole
pub const NULL_ADDR: u32 = u32::MAX;
pub const BLOCK_MAP_ENTRY_SIZE: u64 = 4;
/// advise (u16), device_id (u16), blkaddr (u32)
pub const CHUNK_INDEX_SIZE: u64 = 8;

const_assert!(CHUNK_INDEX_SIZE % BLOCK_MAP_ENTRY_SIZE == 0);
