//! USN Journal enumeration
//!
//! Fast file enumeration using FSCTL_ENUM_USN_DATA. Every record of the
//! volume's metadata table comes back in reference-number order, without a
//! directory traversal.

use crate::error::{MftScanError, Result};
use crate::ntfs::structs::*;
use crate::volume::VolumeId;
use serde::Serialize;
use std::io;

// ============================================================================
// Device seam
// ============================================================================

/// A raw volume that answers bulk-enumeration requests
pub trait UsnDevice {
    /// Issue one FSCTL_ENUM_USN_DATA request.
    ///
    /// Returns the number of bytes written into `buffer`; 0 means the
    /// enumeration has no further data.
    fn enum_usn_data(&mut self, request: &MftEnumData, buffer: &mut [u8]) -> io::Result<usize>;
}

impl<D: UsnDevice + ?Sized> UsnDevice for Box<D> {
    fn enum_usn_data(&mut self, request: &MftEnumData, buffer: &mut [u8]) -> io::Result<usize> {
        (**self).enum_usn_data(request, buffer)
    }
}

// ============================================================================
// USN Entry
// ============================================================================

/// One object of the volume as seen in a single enumeration pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UsnEntry {
    pub file_reference: u64,
    pub parent_reference: u64,
    pub name: String,
    pub is_deleted: bool,
    pub is_directory: bool,
    pub is_system: bool,
    pub is_temporary: bool,
    /// Set by the resolver; None until then, or if the parent chain loops
    pub full_path: Option<String>,
}

impl UsnEntry {
    pub fn from_record(record: &UsnRecord) -> Self {
        Self {
            file_reference: record.file_reference_number,
            parent_reference: record.parent_file_reference_number,
            name: record.file_name.clone(),
            is_deleted: record.is_deleted(),
            is_directory: record.is_directory(),
            is_system: record.is_system(),
            is_temporary: record.is_temporary(),
            full_path: None,
        }
    }

    /// The volume root points at itself
    pub fn is_self_parented(&self) -> bool {
        self.file_reference == self.parent_reference
    }

    /// Lower-cased extension of the name, without the dot
    pub fn extension(&self) -> Option<String> {
        let (_, ext) = self.name.rsplit_once('.')?;
        if ext.is_empty() {
            None
        } else {
            Some(ext.to_lowercase())
        }
    }
}

// ============================================================================
// Enumerator
// ============================================================================

/// Counters for one volume's enumeration
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EnumerationStats {
    pub requests: u64,
    pub records: u64,
    pub skipped: u64,
}

/// Lazy sequence of entries read from one volume.
///
/// Yields `Err(EnumerationIoFailure)` at most once, after which the sequence
/// is finished. Malformed records are skipped and only counted.
pub struct UsnEnumerator<D> {
    volume: VolumeId,
    device: D,
    buffer: Vec<u8>,
    filled: usize,
    cursor: usize,
    request: MftEnumData,
    last_page: bool,
    finished: bool,
    stats: EnumerationStats,
}

impl<D: UsnDevice> UsnEnumerator<D> {
    pub fn new(volume: VolumeId, device: D) -> Self {
        Self::with_buffer_size(volume, device, DEFAULT_ENUM_BUFFER_SIZE)
    }

    pub fn with_buffer_size(volume: VolumeId, device: D, buffer_size: usize) -> Self {
        Self {
            volume,
            device,
            buffer: vec![0u8; buffer_size.max(ENUM_MARKER_LEN + USN_RECORD_V2_HEADER_LEN)],
            filled: 0,
            cursor: 0,
            request: MftEnumData::default(),
            last_page: false,
            finished: false,
            stats: EnumerationStats::default(),
        }
    }

    pub fn stats(&self) -> EnumerationStats {
        self.stats
    }

    pub fn volume(&self) -> &VolumeId {
        &self.volume
    }

    /// Fetch the next buffer. Returns false when enumeration is over.
    fn fill(&mut self) -> Result<bool> {
        if self.last_page {
            return Ok(false);
        }

        let bytes_returned = self
            .device
            .enum_usn_data(&self.request, &mut self.buffer)
            .map_err(|source| MftScanError::EnumerationIoFailure {
                volume: self.volume.clone(),
                source,
            })?;
        self.stats.requests += 1;

        let page = match UsnBuffer::parse(&self.buffer[..bytes_returned.min(self.buffer.len())]) {
            Some(page) if bytes_returned > ENUM_MARKER_LEN => page,
            _ => return Ok(false),
        };

        let next = page.next_reference();
        if next == 0 || next == self.request.start_file_reference_number {
            self.last_page = true;
        }
        self.request = MftEnumData::starting_at(next);
        self.filled = bytes_returned;
        self.cursor = ENUM_MARKER_LEN;
        Ok(true)
    }
}

impl<D: UsnDevice> Iterator for UsnEnumerator<D> {
    type Item = Result<UsnEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.finished {
                return None;
            }

            if self.cursor < self.filled {
                let (record, next) = decode_record_at(&self.buffer[..self.filled], self.cursor);
                self.cursor = next;
                match record {
                    Ok(record) => {
                        self.stats.records += 1;
                        return Some(Ok(UsnEntry::from_record(&record)));
                    }
                    Err(e) => {
                        self.stats.skipped += 1;
                        tracing::debug!(volume = %self.volume, "skipping record: {}", e);
                        continue;
                    }
                }
            }

            match self.fill() {
                Ok(true) => continue,
                Ok(false) => {
                    self.finished = true;
                    tracing::debug!(
                        volume = %self.volume,
                        requests = self.stats.requests,
                        records = self.stats.records,
                        skipped = self.stats.skipped,
                        "USN enumeration complete"
                    );
                    return None;
                }
                Err(e) => {
                    self.finished = true;
                    return Some(Err(e));
                }
            }
        }
    }
}
