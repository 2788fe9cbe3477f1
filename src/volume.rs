//! Volume identifiers
//!
//! A volume is addressed by its drive designator (`C:`). Full paths produced
//! by the resolver are rooted at that designator and use `\` separators.

use crate::error::{MftScanError, Result};
use serde::Serialize;
use std::fmt;

/// Path separator used for every resolved path
pub const PATH_SEPARATOR: char = '\\';

/// Drive designator of a single NTFS volume, e.g. `C:`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct VolumeId(String);

impl VolumeId {
    /// Create from a drive letter
    pub fn new(drive_letter: char) -> Self {
        Self(format!("{}:", drive_letter.to_ascii_uppercase()))
    }

    /// Volume that contains `path` (`C:\Users\x` -> `C:`)
    pub fn containing(path: &str) -> Result<Self> {
        let mut chars = path.chars();
        match (chars.next(), chars.next()) {
            (Some(letter), Some(':')) if letter.is_ascii_alphabetic() => {
                match chars.next() {
                    None | Some('\\') | Some('/') => Ok(Self::new(letter)),
                    Some(_) => Err(MftScanError::InvalidPath(path.to_string())),
                }
            }
            _ => Err(MftScanError::InvalidPath(path.to_string())),
        }
    }

    /// Drive letter of this volume
    pub fn drive_letter(&self) -> char {
        self.0.chars().next().unwrap_or('?')
    }

    /// Designator as written in paths (`C:`)
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Raw device path for CreateFile (`\\.\C:`)
    pub fn device_path(&self) -> String {
        format!("\\\\.\\{}", self.0)
    }

    /// Root directory (`C:\`)
    pub fn root_path(&self) -> String {
        format!("{}{}", self.0, PATH_SEPARATOR)
    }
}

impl fmt::Display for VolumeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn designator_is_upper_case() {
        let volume = VolumeId::new('d');
        assert_eq!(volume.as_str(), "D:");
        assert_eq!(volume.drive_letter(), 'D');
        assert_eq!(volume.device_path(), r"\\.\D:");
        assert_eq!(volume.root_path(), r"D:\");
    }

    #[test]
    fn containing_volume_of_folder() {
        assert_eq!(
            VolumeId::containing(r"c:\Users\Public\Downloads").unwrap(),
            VolumeId::new('C')
        );
        assert_eq!(VolumeId::containing("E:").unwrap(), VolumeId::new('E'));
        assert_eq!(VolumeId::containing("F:/data").unwrap(), VolumeId::new('F'));
    }

    #[test]
    fn rejects_paths_without_drive() {
        for bad in ["", "Users", r"\\server\share", "1:\\x", "C:x"] {
            assert!(
                matches!(VolumeId::containing(bad), Err(MftScanError::InvalidPath(_))),
                "{bad:?} should be rejected"
            );
        }
    }
}
