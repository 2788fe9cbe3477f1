//! Existence probe for resolved paths
//!
//! USN enumeration also returns records of files that have since been
//! removed; presenters use this to tell them apart and to show a creation
//! time. The scanner itself never touches the filesystem through paths.

use chrono::{DateTime, Local};
use std::fs;
use std::path::Path;

/// What the filesystem currently says about a path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Probe {
    pub exists: bool,
    pub created_at: Option<DateTime<Local>>,
}

/// Look `path` up on disk. Creation time is None where the platform or
/// filesystem does not record it.
pub fn probe_existence(path: impl AsRef<Path>) -> Probe {
    match fs::metadata(path) {
        Ok(meta) => Probe {
            exists: true,
            created_at: meta.created().ok().map(DateTime::<Local>::from),
        },
        Err(_) => Probe {
            exists: false,
            created_at: None,
        },
    }
}
