// Read-only image data path
pub mod data;
pub mod image;
pub mod ondisk;

#[cfg(test)]
pub mod test_helpers;

pub use data::{
    BatchReport, Extent, ExtentFlags, ExtentResolver, IoEngine, IoStats, MetaBlockCache, Page,
    PageStatus, ReadPipeline, ReadRequest, ReadRequestBuilder, Submit,
};
pub use image::RofsImage;
pub use ondisk::{ChunkFormat, DataLayout, InodeLayout, Superblock};
