//! Library synchronization and offline cache

pub mod cache;
pub mod downloader;
pub mod syncer;

pub use cache::CacheDir;
pub use downloader::{
    DownloadError, DownloadEvent, DownloadManager, DownloadOutcome, DownloadStatus,
};
pub use syncer::{LibraryStats, LibrarySyncer, SyncError, SyncResult};
