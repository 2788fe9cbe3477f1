//! Windows API bindings for raw volume access
//!
//! Safe wrappers around the Win32 calls needed to list fixed volumes, open
//! them for raw reads and issue FSCTL_ENUM_USN_DATA.

use crate::error::{MftScanError, Result};
use crate::ntfs::structs::MftEnumData;
use crate::ntfs::usn::UsnDevice;
use crate::scanner::VolumeProvider;
use crate::volume::VolumeId;
use std::ffi::{c_void, OsStr};
use std::io;
use std::os::windows::ffi::OsStrExt;

// ============================================================================
// Control codes and constants (winioctl.h, winbase.h, winerror.h)
// ============================================================================

pub const FSCTL_ENUM_USN_DATA: u32 = 0x000900B3;

pub const DRIVE_FIXED: u32 = 3;

const ERROR_HANDLE_EOF: u32 = 38;

pub const INVALID_HANDLE_VALUE: isize = -1;

/// Win32 error code carried by an HRESULT of FACILITY_WIN32
fn win32_code(error: &windows::core::Error) -> u32 {
    (error.code().0 as u32) & 0xFFFF
}

fn wide(path: &str) -> Vec<u16> {
    OsStr::new(path)
        .encode_wide()
        .chain(std::iter::once(0))
        .collect()
}

// ============================================================================
// Safe Handle Wrapper
// ============================================================================

/// RAII wrapper for Windows HANDLE
pub struct SafeHandle {
    handle: isize,
}

impl SafeHandle {
    /// Create from raw handle
    pub fn new(handle: isize) -> Option<Self> {
        if handle == INVALID_HANDLE_VALUE || handle == 0 {
            None
        } else {
            Some(Self { handle })
        }
    }

    fn raw(&self) -> windows::Win32::Foundation::HANDLE {
        windows::Win32::Foundation::HANDLE(self.handle as *mut c_void)
    }
}

impl Drop for SafeHandle {
    fn drop(&mut self) {
        unsafe {
            let _ = windows::Win32::Foundation::CloseHandle(self.raw());
        }
    }
}

// ============================================================================
// Volume Operations
// ============================================================================

fn drive_type(root: &str) -> u32 {
    use windows::core::PCWSTR;
    use windows::Win32::Storage::FileSystem::GetDriveTypeW;

    let wide_root = wide(root);
    unsafe { GetDriveTypeW(PCWSTR::from_raw(wide_root.as_ptr())) }
}

/// Open a fixed volume for raw read access, shared read/write
pub fn open_volume(volume: &VolumeId) -> Result<SafeHandle> {
    use windows::core::PCWSTR;
    use windows::Win32::Foundation::GENERIC_READ;
    use windows::Win32::Storage::FileSystem::{
        CreateFileW, FILE_FLAGS_AND_ATTRIBUTES, FILE_SHARE_READ, FILE_SHARE_WRITE, OPEN_EXISTING,
    };

    if drive_type(&volume.root_path()) != DRIVE_FIXED {
        return Err(MftScanError::VolumeNotFound(volume.clone()));
    }

    let wide_path = wide(&volume.device_path());

    let handle = unsafe {
        CreateFileW(
            PCWSTR::from_raw(wide_path.as_ptr()),
            GENERIC_READ.0,
            FILE_SHARE_READ | FILE_SHARE_WRITE,
            None,
            OPEN_EXISTING,
            FILE_FLAGS_AND_ATTRIBUTES(0),
            None,
        )
    };

    match handle {
        Ok(h) => SafeHandle::new(h.0 as isize).ok_or_else(|| {
            MftScanError::VolumeOpenError(volume.clone(), io::Error::last_os_error())
        }),
        Err(e) => Err(MftScanError::from_win32(win32_code(&e), volume)),
    }
}

/// Drive letters of every ready, fixed volume
pub fn list_ready_fixed_volumes() -> Result<Vec<VolumeId>> {
    use windows::Win32::Storage::FileSystem::GetLogicalDrives;

    let mask = unsafe { GetLogicalDrives() };
    if mask == 0 {
        return Err(MftScanError::IoError(io::Error::last_os_error()));
    }

    let volumes = (0..26u8)
        .filter(|bit| mask & (1 << bit) != 0)
        .map(|bit| VolumeId::new((b'A' + bit) as char))
        .filter(|volume| {
            let root = volume.root_path();
            // Unready drives (empty card readers, locked BitLocker) refuse listing
            drive_type(&root) == DRIVE_FIXED && std::fs::read_dir(&root).is_ok()
        })
        .collect();

    Ok(volumes)
}

// ============================================================================
// Raw volume device
// ============================================================================

/// An open volume answering FSCTL_ENUM_USN_DATA
pub struct RawVolume {
    handle: SafeHandle,
}

impl RawVolume {
    pub fn new(handle: SafeHandle) -> Self {
        Self { handle }
    }
}

impl UsnDevice for RawVolume {
    fn enum_usn_data(&mut self, request: &MftEnumData, buffer: &mut [u8]) -> io::Result<usize> {
        use windows::Win32::System::IO::DeviceIoControl;

        let input = request.to_bytes();
        let mut bytes_returned: u32 = 0;

        let result = unsafe {
            DeviceIoControl(
                self.handle.raw(),
                FSCTL_ENUM_USN_DATA,
                Some(input.as_ptr() as *const c_void),
                input.len() as u32,
                Some(buffer.as_mut_ptr() as *mut c_void),
                buffer.len() as u32,
                Some(&mut bytes_returned),
                None,
            )
        };

        match result {
            Ok(()) => Ok(bytes_returned as usize),
            // Enumeration is complete - not an error
            Err(e) if win32_code(&e) == ERROR_HANDLE_EOF => Ok(0),
            Err(e) => Err(io::Error::from_raw_os_error(win32_code(&e) as i32)),
        }
    }
}

/// Volumes of the local machine
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemVolumes;

impl VolumeProvider for SystemVolumes {
    type Device = RawVolume;

    fn open(&self, volume: &VolumeId) -> Result<RawVolume> {
        open_volume(volume).map(RawVolume::new)
    }

    fn ready_fixed_volumes(&self) -> Result<Vec<VolumeId>> {
        list_ready_fixed_volumes()
    }
}
