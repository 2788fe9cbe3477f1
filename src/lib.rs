//! mftscan - Streaming NTFS file enumerator
//!
//! Lists every file recorded in an NTFS volume's metadata table by reading
//! the USN change journal's bulk enumeration (FSCTL_ENUM_USN_DATA) instead of
//! walking directories, then rebuilds full paths from parent references.
//!
//! # Features
//!
//! - **Direct enumeration**: one pass over the metadata table per volume
//! - **Path resolution**: full paths from flat parent links, safe on cycles
//! - **Parallel volumes**: one worker per volume, merged into a single stream
//! - **Backpressure**: bounded result channel, cooperative cancellation
//!
//! On Windows, `Scanner::new(ntfs::SystemVolumes)` scans the local volumes
//! (administrator rights are required to open them).
//!
//! # Example
//!
//! ```no_run
//! use mftscan::{CancelToken, Scanner, VolumeProvider};
//!
//! fn list_pdfs<P: VolumeProvider + 'static>(scanner: &Scanner<P>) -> mftscan::Result<()> {
//!     let mut stream = scanner.scan_folder(
//!         r"C:\Users\Public\Documents",
//!         ["pdf"],
//!         CancelToken::new(),
//!     )?;
//!
//!     for entry in stream.by_ref() {
//!         println!("{}", entry.full_path.unwrap_or_default());
//!     }
//!
//!     // Volumes that failed mid-scan are reported once the stream is drained
//!     let summary = stream.finish()?;
//!     println!("{} files", summary.emitted());
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod filter;
pub mod logging;
pub mod ntfs;
pub mod probe;
pub mod resolver;
pub mod scanner;
pub mod volume;

// Re-export main types
pub use error::{MftScanError, Result, VolumeFailure};
pub use filter::ScanFilter;
pub use probe::{probe_existence, Probe};
pub use resolver::{resolve_paths, PathResolver, ResolveStats};
pub use scanner::{
    CancelToken, ScanConfig, ScanStream, ScanSummary, Scanner, VolumeOutcome, VolumeProvider,
    VolumeReport, VolumeStats,
};
pub use volume::{VolumeId, PATH_SEPARATOR};

// Re-export NTFS types that users might need
pub use ntfs::{EnumerationStats, MftEnumData, UsnDevice, UsnEntry, UsnEnumerator};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
