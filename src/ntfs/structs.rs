//! USN journal on-disk structures and constants
//!
//! Layout of the `FSCTL_ENUM_USN_DATA` request body and of the response
//! buffer it fills: an 8-byte continuation marker followed by `USN_RECORD_V2`
//! records packed back to back.

use crate::error::{MftScanError, Result};
use byteorder::{ByteOrder, LittleEndian, ReadBytesExt};
use std::io::Cursor;

// ============================================================================
// Constants
// ============================================================================

/// Bytes of the continuation marker at the start of every enumeration buffer
pub const ENUM_MARKER_LEN: usize = 8;

/// Fixed part of a USN_RECORD_V2, up to (not including) the file name
pub const USN_RECORD_V2_HEADER_LEN: usize = 60;

/// Size of MFT_ENUM_DATA_V0
pub const MFT_ENUM_DATA_V0_LEN: usize = 24;

/// Recommended output buffer size for one enumeration request
pub const DEFAULT_ENUM_BUFFER_SIZE: usize = 64 * 1024;

// ============================================================================
// Enumeration request
// ============================================================================

/// Input structure for FSCTL_ENUM_USN_DATA (MFT_ENUM_DATA_V0)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MftEnumData {
    pub start_file_reference_number: u64,
    pub low_usn: i64,
    pub high_usn: i64,
}

impl MftEnumData {
    /// Request covering every change-sequence number, starting at `start_frn`
    pub fn starting_at(start_frn: u64) -> Self {
        Self {
            start_file_reference_number: start_frn,
            low_usn: 0,
            high_usn: i64::MAX,
        }
    }

    /// Little-endian wire form passed to DeviceIoControl
    pub fn to_bytes(&self) -> [u8; MFT_ENUM_DATA_V0_LEN] {
        let mut out = [0u8; MFT_ENUM_DATA_V0_LEN];
        LittleEndian::write_u64(&mut out[0..8], self.start_file_reference_number);
        LittleEndian::write_i64(&mut out[8..16], self.low_usn);
        LittleEndian::write_i64(&mut out[16..24], self.high_usn);
        out
    }
}

impl Default for MftEnumData {
    fn default() -> Self {
        Self::starting_at(0)
    }
}

// ============================================================================
// USN record
// ============================================================================

#[derive(Debug, Clone)]
pub struct UsnRecord {
    pub record_length: u32,
    pub major_version: u16,
    pub minor_version: u16,
    pub file_reference_number: u64,
    pub parent_file_reference_number: u64,
    pub usn: i64,
    pub timestamp: i64,
    pub reason: u32,
    pub source_info: u32,
    pub security_id: u32,
    pub file_attributes: u32,
    pub file_name_length: u16,
    pub file_name_offset: u16,
    pub file_name: String,
}

impl UsnRecord {
    /// Parse a USN_RECORD_V2 from the start of `data`.
    ///
    /// `offset` is the record's position in the enclosing buffer and is only
    /// used for error reporting. Every length and offset embedded in the
    /// record is validated before the name region is touched.
    pub fn parse(data: &[u8], offset: usize) -> Result<Self> {
        let malformed = |reason: String| MftScanError::MalformedRecord { offset, reason };

        if data.len() < 4 {
            return Err(malformed(format!(
                "{} trailing bytes cannot hold a length prefix",
                data.len()
            )));
        }

        let record_length = LittleEndian::read_u32(&data[0..4]);
        let declared = record_length as usize;
        if declared < USN_RECORD_V2_HEADER_LEN {
            return Err(malformed(format!(
                "declared length {} is shorter than the {} byte header",
                declared, USN_RECORD_V2_HEADER_LEN
            )));
        }
        if declared > data.len() {
            return Err(malformed(format!(
                "declared length {} exceeds the {} remaining bytes",
                declared,
                data.len()
            )));
        }

        let record = &data[..declared];
        let mut parsed = Self::read_header(record)
            .map_err(|e| malformed(format!("header read failed: {}", e)))?;

        if parsed.major_version != 2 {
            return Err(malformed(format!(
                "unsupported record version {}.{}",
                parsed.major_version, parsed.minor_version
            )));
        }

        let name_start = parsed.file_name_offset as usize;
        let name_len = parsed.file_name_length as usize;
        let name_end = name_start + name_len;
        if name_start < USN_RECORD_V2_HEADER_LEN || name_end > declared || name_len % 2 != 0 {
            return Err(malformed(format!(
                "name span {}..{} does not fit record of {} bytes",
                name_start, name_end, declared
            )));
        }

        let name_u16: Vec<u16> = record[name_start..name_end]
            .chunks_exact(2)
            .map(|chunk| u16::from_le_bytes([chunk[0], chunk[1]]))
            .collect();
        parsed.file_name = String::from_utf16_lossy(&name_u16);

        Ok(parsed)
    }

    // Offsets: 0 RecordLength, 4 Major, 6 Minor, 8 FRN, 16 ParentFRN, 24 Usn,
    // 32 TimeStamp, 40 Reason, 44 SourceInfo, 48 SecurityId, 52 Attributes,
    // 56 FileNameLength, 58 FileNameOffset, 60 FileName.
    fn read_header(record: &[u8]) -> std::io::Result<Self> {
        let mut cursor = Cursor::new(record);

        Ok(Self {
            record_length: cursor.read_u32::<LittleEndian>()?,
            major_version: cursor.read_u16::<LittleEndian>()?,
            minor_version: cursor.read_u16::<LittleEndian>()?,
            file_reference_number: cursor.read_u64::<LittleEndian>()?,
            parent_file_reference_number: cursor.read_u64::<LittleEndian>()?,
            usn: cursor.read_i64::<LittleEndian>()?,
            timestamp: cursor.read_i64::<LittleEndian>()?,
            reason: cursor.read_u32::<LittleEndian>()?,
            source_info: cursor.read_u32::<LittleEndian>()?,
            security_id: cursor.read_u32::<LittleEndian>()?,
            file_attributes: cursor.read_u32::<LittleEndian>()?,
            file_name_length: cursor.read_u16::<LittleEndian>()?,
            file_name_offset: cursor.read_u16::<LittleEndian>()?,
            file_name: String::new(),
        })
    }

    pub fn is_deleted(&self) -> bool {
        (self.reason & usn_reason::FILE_DELETE) != 0
    }

    pub fn is_directory(&self) -> bool {
        (self.file_attributes & file_attributes::DIRECTORY) != 0
    }

    pub fn is_system(&self) -> bool {
        (self.file_attributes & file_attributes::SYSTEM) != 0
    }

    pub fn is_temporary(&self) -> bool {
        (self.file_attributes & file_attributes::TEMPORARY) != 0
    }
}

/// Decode the record starting at `offset` in `buffer`.
///
/// Returns the decode result and the offset of the next record boundary.
/// A malformed record with a usable declared length is stepped over; one
/// whose length cannot advance the cursor ends the buffer.
pub fn decode_record_at(buffer: &[u8], offset: usize) -> (Result<UsnRecord>, usize) {
    let rest = &buffer[offset.min(buffer.len())..];

    match UsnRecord::parse(rest, offset) {
        Ok(record) => {
            let next = offset + record.record_length as usize;
            (Ok(record), next)
        }
        Err(e) => {
            let declared = if rest.len() >= 4 {
                LittleEndian::read_u32(&rest[0..4]) as usize
            } else {
                0
            };
            let next = if declared >= USN_RECORD_V2_HEADER_LEN && declared <= rest.len() {
                offset + declared
            } else {
                buffer.len()
            };
            (Err(e), next)
        }
    }
}

// ============================================================================
// Enumeration buffer
// ============================================================================

/// One filled FSCTL_ENUM_USN_DATA output buffer
#[derive(Debug, Clone, Copy)]
pub struct UsnBuffer<'a> {
    data: &'a [u8],
    next_reference: u64,
}

impl<'a> UsnBuffer<'a> {
    /// Wrap the `bytes_returned` prefix of an output buffer.
    /// Returns None if it cannot even hold the continuation marker.
    pub fn parse(data: &'a [u8]) -> Option<Self> {
        if data.len() < ENUM_MARKER_LEN {
            return None;
        }
        Some(Self {
            data,
            next_reference: LittleEndian::read_u64(&data[0..ENUM_MARKER_LEN]),
        })
    }

    /// Start reference for the following request
    pub fn next_reference(&self) -> u64 {
        self.next_reference
    }

    /// Records following the marker, malformed ones reported as errors
    pub fn records(&self) -> UsnRecords<'a> {
        UsnRecords {
            data: self.data,
            offset: ENUM_MARKER_LEN,
        }
    }
}

/// Iterator over the records of a [`UsnBuffer`]
#[derive(Debug, Clone)]
pub struct UsnRecords<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> Iterator for UsnRecords<'a> {
    type Item = Result<UsnRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.offset >= self.data.len() {
            return None;
        }
        let (record, next) = decode_record_at(self.data, self.offset);
        self.offset = next;
        Some(record)
    }
}

// USN Reason flags
pub mod usn_reason {
    pub const FILE_DELETE: u32 = 0x00000200;
    pub const CLOSE: u32 = 0x80000000;
}

// ============================================================================
// File Attributes
// ============================================================================

pub mod file_attributes {
    pub const SYSTEM: u32 = 0x00000004;
    pub const DIRECTORY: u32 = 0x00000010;
    pub const TEMPORARY: u32 = 0x00000100;
}
