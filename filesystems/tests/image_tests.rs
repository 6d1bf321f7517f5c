// Image-level tests: superblock validation, inode loading and whole-file reads

mod common;

use common::{init_logging, pattern, ImageBuilder, B};
use rofs_core::{FileDevice, MemoryDevice, ReadConfig, RofsError};
use rofs_filesystems::ondisk::constants::{DATALAYOUT_COMPRESSED_FULL, NULL_ADDR};
use rofs_filesystems::{DataLayout, ExtentFlags, RofsImage};
use std::io::Write;
use std::sync::Arc;
use tempfile::NamedTempFile;

fn block_bytes(block: u64) -> Vec<u8> {
    (0..B).map(|i| pattern(block, i)).collect()
}

fn open(builder: ImageBuilder) -> RofsImage {
    RofsImage::open(builder.device(), ReadConfig::default()).unwrap()
}

#[test]
fn test_open_reads_superblock() {
    init_logging();
    let image = open(ImageBuilder::new(16).with_checksum());
    let sb = image.superblock();

    assert_eq!(sb.block_size(), 4096);
    assert_eq!(sb.root_nid, 36);
    assert_eq!(sb.blocks, 16);
    assert_eq!(sb.meta_blkaddr, 1);
    assert_eq!(sb.volume_name, "testvol");
    assert_eq!(sb.uuid.as_bytes(), &[0x5A; 16]);
}

#[test]
fn test_checksum_mismatch_is_corruption() {
    let mut data = ImageBuilder::new(16).with_checksum().build();
    data[1024 + 200] ^= 0xFF;
    let device = Arc::new(MemoryDevice::new(data, 4096));

    let result = RofsImage::open(device, ReadConfig::default());
    assert!(matches!(result, Err(RofsError::Corruption(_))));
}

#[test]
fn test_bad_magic_is_corruption() {
    let mut data = ImageBuilder::new(16).build();
    data[1024] ^= 0x01;
    let device = Arc::new(MemoryDevice::new(data, 4096));

    assert!(matches!(
        RofsImage::open(device, ReadConfig::default()),
        Err(RofsError::Corruption(_))
    ));
}

#[test]
fn test_extra_devices_not_supported() {
    let device = ImageBuilder::new(16).extra_devices(1).device();

    assert!(matches!(
        RofsImage::open(device, ReadConfig::default()),
        Err(RofsError::NotSupported(_))
    ));
}

#[test]
fn test_block_size_mismatch_not_supported() {
    let data = ImageBuilder::new(16).build();
    let device = Arc::new(MemoryDevice::new(data, 512));

    assert!(matches!(
        RofsImage::open(device, ReadConfig::default()),
        Err(RofsError::NotSupported(_))
    ));
}

#[test]
fn test_invalid_config_rejected() {
    let config = ReadConfig {
        fan_out_limit: 0,
        ..ReadConfig::default()
    };

    assert!(matches!(
        RofsImage::open(ImageBuilder::new(16).device(), config),
        Err(RofsError::Configuration(_))
    ));
}

#[test]
fn test_read_flat_plain_file_in_batches() {
    init_logging();
    let mut builder = ImageBuilder::new(32);
    let size = 5 * B + 123;
    builder.flat_plain(2, 16, size);
    for block in 16..22 {
        builder.fill_block(block);
    }
    let config = ReadConfig {
        readahead_pages: 2,
        ..ReadConfig::default()
    };
    let image = RofsImage::open(builder.device(), config).unwrap();

    let inode = image.inode(2).unwrap();
    assert_eq!(inode.datalayout, DataLayout::FlatPlain);
    assert_eq!(inode.size, size);

    let data = image.read_file(&inode).unwrap();
    let expected: Vec<u8> = (16..22).flat_map(block_bytes).take(size as usize).collect();
    assert_eq!(data, expected);

    // three batches of two contiguous pages
    let stats = image.io_stats();
    assert_eq!(stats.requests, 3);
    assert_eq!(stats.pages, 6);
}

#[test]
fn test_read_inline_file_with_xattrs() {
    let mut builder = ImageBuilder::new(32);
    let tail: Vec<u8> = (0..100u8).collect();
    builder.flat_inline(8, 20, 2 * B + 100, 2, &tail);
    builder.fill_block(20);
    builder.fill_block(21);
    let image = open(builder);

    let inode = image.inode(8).unwrap();
    assert_eq!(inode.datalayout, DataLayout::FlatInline);
    assert_eq!(inode.xattr_isize, 16);

    let data = image.read_file(&inode).unwrap();
    let mut expected = block_bytes(20);
    expected.extend(block_bytes(21));
    expected.extend(&tail);
    assert_eq!(data, expected);
    assert_eq!(image.io_stats().requests, 1);
}

#[test]
fn test_read_chunked_file_with_hole() {
    let mut builder = ImageBuilder::new(40);
    let size = 5 * B + 10;
    builder.chunk_block_map(16, 1, size, &[24, NULL_ADDR, 30]);
    for block in [24, 25, 30, 31] {
        builder.fill_block(block);
    }
    let image = open(builder);

    let inode = image.inode(16).unwrap();
    assert_eq!(inode.chunk_size(), 2 * B);

    let data = image.read_file(&inode).unwrap();
    let mut expected = block_bytes(24);
    expected.extend(block_bytes(25));
    expected.extend(vec![0u8; 2 * B as usize]);
    expected.extend(block_bytes(30));
    expected.extend(&block_bytes(31)[..10]);
    assert_eq!(data, expected);

    let extents = image.extents(&inode).unwrap();
    let flags: Vec<_> = extents.iter().map(|e| e.flags).collect();
    assert_eq!(flags, vec![ExtentFlags::Mapped, ExtentFlags::Unmapped, ExtentFlags::Mapped]);
    assert_eq!(extents[2].length, 2 * B);
}

#[test]
fn test_read_indexed_chunks() {
    let mut builder = ImageBuilder::new(48);
    builder.chunk_indexes(24, 0, 2 * B, &[(0, 40), (0, 41)]);
    builder.fill_block(40);
    builder.fill_block(41);
    let image = open(builder);

    let inode = image.inode(24).unwrap();
    assert_eq!(inode.inode_isize, 64);

    let data = image.read_file(&inode).unwrap();
    let mut expected = block_bytes(40);
    expected.extend(block_bytes(41));
    assert_eq!(data, expected);
}

#[test]
fn test_compressed_layout_not_supported() {
    let mut builder = ImageBuilder::new(16);
    builder.inode(30, DATALAYOUT_COMPRESSED_FULL, false, 0, B, 0);
    let image = open(builder);

    assert!(matches!(image.inode(30), Err(RofsError::NotSupported(_))));
}

#[test]
fn test_unknown_layout_is_corruption() {
    let mut builder = ImageBuilder::new(16);
    builder.inode(30, 5, false, 0, B, 0);
    let image = open(builder);

    assert!(matches!(image.inode(30), Err(RofsError::Corruption(_))));
}

#[test]
fn test_read_past_device_end_is_io_error() {
    let mut builder = ImageBuilder::new(16);
    builder.flat_plain(2, 100, B);
    let image = open(builder);

    let inode = image.inode(2).unwrap();
    assert!(matches!(image.read_file(&inode), Err(RofsError::Io(_))));
    image.pipeline().submitter().wait_idle();
    assert_eq!(image.io_stats().failed_requests, 2);
}

#[test]
fn test_out_of_range_nid_is_invalid_input() {
    let mut builder = ImageBuilder::new(16);
    builder.flat_plain(2, 8, B);
    let image = open(builder);

    for nid in [u64::MAX, 1 << 59, 16 * B / 32] {
        assert!(matches!(image.inode(nid), Err(RofsError::InvalidInput(_))), "nid {}", nid);
    }
    assert_eq!(image.cache_stats().misses, 0);
    assert!(image.inode(2).is_ok());
}

#[test]
fn test_inodes_share_metadata_block() {
    let mut builder = ImageBuilder::new(32);
    builder.flat_plain(2, 16, B);
    builder.flat_plain(3, 17, B);
    let image = open(builder);

    image.inode(2).unwrap();
    image.inode(3).unwrap();
    assert_eq!(image.cache_stats().misses, 1);
}

#[test]
fn test_file_backed_image() {
    init_logging();
    let mut builder = ImageBuilder::new(32).with_checksum();
    builder.flat_inline(4, 16, B + 5, 0, b"hello");
    builder.fill_block(16);

    let mut temp_file = NamedTempFile::new().unwrap();
    temp_file.write_all(&builder.build()).unwrap();
    temp_file.flush().unwrap();

    let device = Arc::new(FileDevice::open(temp_file.path(), 4096).unwrap());
    let image = RofsImage::open(device, ReadConfig::default()).unwrap();
    let inode = image.inode(4).unwrap();

    let data = image.read_file(&inode).unwrap();
    assert_eq!(&data[..B as usize], &block_bytes(16)[..]);
    assert_eq!(&data[B as usize..], b"hello");
}
