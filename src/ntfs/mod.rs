//! NTFS volume access
//!
//! This module provides the pieces needed to read a volume's metadata table
//! through the USN change journal:
//! - On-disk structures of the FSCTL_ENUM_USN_DATA request and response
//! - A lazy enumerator over any device that answers those requests
//! - Win32 bindings for real volumes (Windows only)

pub mod structs;
pub mod usn;
#[cfg(windows)]
pub mod winapi;

// Re-export commonly used types
pub use structs::{MftEnumData, UsnBuffer, UsnRecord};
pub use usn::{EnumerationStats, UsnDevice, UsnEntry, UsnEnumerator};
#[cfg(windows)]
pub use winapi::{open_volume, RawVolume, SafeHandle, SystemVolumes};
