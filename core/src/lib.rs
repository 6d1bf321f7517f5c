pub mod config;
pub mod device;
pub mod error;

pub use config::ReadConfig;
pub use device::{BlockDevice, FileDevice, MemoryDevice};
pub use error::{RofsError, RofsResult};
