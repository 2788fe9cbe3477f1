//! In-memory volumes for driving the scanner without a real device

#![allow(dead_code)]

use mftscan::{CancelToken, MftEnumData, MftScanError, UsnDevice, VolumeId, VolumeProvider};
use std::collections::{HashMap, VecDeque};
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

pub const ROOT: u64 = 5;
pub const DIRECTORY: u32 = 0x10;
pub const SYSTEM: u32 = 0x04;
pub const TEMPORARY: u32 = 0x100;
pub const FILE_DELETE: u32 = 0x200;

/// One USN_RECORD_V2 as the journal would return it
pub fn record(frn: u64, parent: u64, name: &str, attrs: u32, reason: u32) -> Vec<u8> {
    let name_u16: Vec<u16> = name.encode_utf16().collect();
    let len = (60 + name_u16.len() * 2 + 7) & !7;
    let mut rec = vec![0u8; len];
    rec[0..4].copy_from_slice(&(len as u32).to_le_bytes());
    rec[4..6].copy_from_slice(&2u16.to_le_bytes());
    rec[8..16].copy_from_slice(&frn.to_le_bytes());
    rec[16..24].copy_from_slice(&parent.to_le_bytes());
    rec[40..44].copy_from_slice(&reason.to_le_bytes());
    rec[52..56].copy_from_slice(&attrs.to_le_bytes());
    rec[56..58].copy_from_slice(&((name_u16.len() * 2) as u16).to_le_bytes());
    rec[58..60].copy_from_slice(&60u16.to_le_bytes());
    for (i, unit) in name_u16.iter().enumerate() {
        rec[60 + i * 2..62 + i * 2].copy_from_slice(&unit.to_le_bytes());
    }
    rec
}

pub fn root() -> Vec<u8> {
    record(ROOT, ROOT, ".", DIRECTORY | SYSTEM, 0)
}

pub fn dir(frn: u64, parent: u64, name: &str) -> Vec<u8> {
    record(frn, parent, name, DIRECTORY, 0)
}

pub fn file(frn: u64, parent: u64, name: &str) -> Vec<u8> {
    record(frn, parent, name, 0, 0)
}

/// Pack records into enumeration buffers of `per_page` records each
pub fn pages(records: &[Vec<u8>], per_page: usize) -> Vec<Vec<u8>> {
    records
        .chunks(per_page.max(1))
        .enumerate()
        .map(|(i, chunk)| {
            let mut page = ((i as u64 + 1) * 0x1000).to_le_bytes().to_vec();
            for rec in chunk {
                page.extend_from_slice(rec);
            }
            page
        })
        .collect()
}

/// Root plus `count` plain files directly under it, references from `first`
pub fn flat_volume(first: u64, count: u64) -> Vec<Vec<u8>> {
    let mut records = vec![root()];
    records.extend((0..count).map(|i| file(first + i, ROOT, &format!("file{}.dat", i))));
    records
}

#[derive(Clone)]
pub enum Script {
    /// Serve these buffers, then report end of data
    Pages(Vec<Vec<u8>>),
    /// Serve these buffers, then fail the next request
    FailAfter(Vec<Vec<u8>>),
    /// Serve these buffers, then cancel the token and report end of data
    CancelAtEnd(Vec<Vec<u8>>, CancelToken),
    /// Serve one single-record buffer per request, forever
    Endless,
    AccessDenied,
}

pub struct MemoryDevice {
    pages: VecDeque<Vec<u8>>,
    fail_at_end: bool,
    cancel_at_end: Option<CancelToken>,
    endless: Option<u64>,
    requests: Arc<AtomicU64>,
}

impl MemoryDevice {
    fn new(pages: &[Vec<u8>], requests: &Arc<AtomicU64>) -> Self {
        Self {
            pages: pages.iter().cloned().collect(),
            fail_at_end: false,
            cancel_at_end: None,
            endless: None,
            requests: Arc::clone(requests),
        }
    }
}

impl UsnDevice for MemoryDevice {
    fn enum_usn_data(&mut self, request: &MftEnumData, buffer: &mut [u8]) -> io::Result<usize> {
        self.requests.fetch_add(1, Ordering::SeqCst);

        if let Some(next) = self.endless.as_mut() {
            *next += 1;
            let frn = request.start_file_reference_number + 100;
            let mut page = next.to_le_bytes().to_vec();
            page.extend_from_slice(&file(frn, ROOT, "spin.tmp"));
            buffer[..page.len()].copy_from_slice(&page);
            return Ok(page.len());
        }

        match self.pages.pop_front() {
            Some(page) => {
                buffer[..page.len()].copy_from_slice(&page);
                Ok(page.len())
            }
            None if self.fail_at_end => Err(io::Error::new(io::ErrorKind::Other, "device removed")),
            None => {
                if let Some(cancel) = &self.cancel_at_end {
                    cancel.cancel();
                }
                Ok(0)
            }
        }
    }
}

#[derive(Default)]
pub struct MemoryVolumes {
    scripts: HashMap<VolumeId, Script>,
    ready: Vec<VolumeId>,
    requests: Arc<AtomicU64>,
}

impl MemoryVolumes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a volume; it is listed as ready unless it denies access
    pub fn with(mut self, letter: char, script: Script) -> Self {
        let volume = VolumeId::new(letter);
        if !matches!(script, Script::AccessDenied) {
            self.ready.push(volume.clone());
        }
        self.scripts.insert(volume, script);
        self
    }

    /// Enumeration requests served so far, across every device
    pub fn requests(&self) -> u64 {
        self.requests.load(Ordering::SeqCst)
    }
}

impl VolumeProvider for MemoryVolumes {
    type Device = MemoryDevice;

    fn open(&self, volume: &VolumeId) -> mftscan::Result<MemoryDevice> {
        match self.scripts.get(volume) {
            None => Err(MftScanError::VolumeNotFound(volume.clone())),
            Some(Script::AccessDenied) => Err(MftScanError::VolumeAccessDenied(volume.clone())),
            Some(Script::Pages(pages)) => Ok(MemoryDevice::new(pages, &self.requests)),
            Some(Script::FailAfter(pages)) => Ok(MemoryDevice {
                fail_at_end: true,
                ..MemoryDevice::new(pages, &self.requests)
            }),
            Some(Script::CancelAtEnd(pages, cancel)) => Ok(MemoryDevice {
                cancel_at_end: Some(cancel.clone()),
                ..MemoryDevice::new(pages, &self.requests)
            }),
            Some(Script::Endless) => Ok(MemoryDevice {
                endless: Some(0),
                ..MemoryDevice::new(&[], &self.requests)
            }),
        }
    }

    fn ready_fixed_volumes(&self) -> mftscan::Result<Vec<VolumeId>> {
        Ok(self.ready.clone())
    }
}
