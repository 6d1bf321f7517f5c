// Data path: extent resolution, metadata caching and batched page reads

pub mod bmap;
pub mod engine;
pub mod extent;
pub mod meta_cache;
pub mod page;
pub mod pipeline;
pub mod request;

pub use engine::{IoEngine, IoStats};
pub use extent::{Extent, ExtentFlags, ExtentResolver};
pub use meta_cache::{MetaBlock, MetaBlockCache, MetaCacheStats};
pub use page::{LockedPage, Page, PageStatus};
pub use pipeline::{BatchReport, ReadPipeline};
pub use request::{ReadRequest, ReadRequestBuilder, Submit};
