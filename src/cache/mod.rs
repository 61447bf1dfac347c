pub mod checksum;
pub mod progress;
pub mod store;

pub use checksum::ChecksumAlgorithm;
pub use progress::{DownloadProgress, DownloadStatus, ProgressTracker};
pub use store::{
    BatchResult, CacheStatus, CacheStore, FetchDecision, FetchReason, FetchResult, FetchStatus,
    PruneResult,
};
