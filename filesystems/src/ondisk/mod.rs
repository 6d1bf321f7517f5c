// On-disk structures of the read-only image format

pub mod constants;
pub mod inode;
pub mod superblock;

pub use inode::{ChunkFormat, DataLayout, InodeLayout};
pub use superblock::Superblock;
