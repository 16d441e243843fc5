pub mod log;
pub mod traits;
pub mod watermark;

pub use log::OutputLog;
pub use traits::{StorageError, WatermarkStore};
pub use watermark::FileWatermarkStore;
