//! Result filtering applied by each volume worker after path resolution

use crate::ntfs::UsnEntry;
use crate::volume::PATH_SEPARATOR;
use std::collections::HashSet;

/// Folder prefix and extension allowlist
///
/// Directories, system, temporary, deleted and unresolved entries are always
/// rejected; the prefix and extension stages only apply when set.
#[derive(Debug, Clone, Default)]
pub struct ScanFilter {
    /// Lower-cased folder prefix
    folder_prefix: Option<String>,
    /// Lower-cased extensions without the leading dot
    extensions: Option<HashSet<String>>,
}

impl ScanFilter {
    /// Filter that only drops non-file entries
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep entries whose full path starts with `folder` (case-insensitive).
    /// Trailing separators are trimmed.
    pub fn with_folder(mut self, folder: &str) -> Self {
        let trimmed = folder.trim_end_matches([PATH_SEPARATOR, '/']);
        self.folder_prefix = Some(trimmed.replace('/', "\\").to_lowercase());
        self
    }

    /// Keep entries whose extension is in `extensions`.
    /// `"pdf"`, `".pdf"` and `"PDF"` are equivalent; an empty list disables the stage.
    pub fn with_extensions<I, S>(mut self, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let set: HashSet<String> = extensions
            .into_iter()
            .map(|e| normalize_extension(e.as_ref()))
            .filter(|e| !e.is_empty())
            .collect();
        self.extensions = if set.is_empty() { None } else { Some(set) };
        self
    }

    pub fn folder_prefix(&self) -> Option<&str> {
        self.folder_prefix.as_deref()
    }

    pub fn extensions(&self) -> Option<&HashSet<String>> {
        self.extensions.as_ref()
    }

    /// Whether a resolved entry should be emitted
    pub fn matches(&self, entry: &UsnEntry) -> bool {
        let Some(path) = entry.full_path.as_deref() else {
            return false;
        };

        if let Some(prefix) = &self.folder_prefix {
            if !path.to_lowercase().starts_with(prefix.as_str()) {
                return false;
            }
        }

        if let Some(extensions) = &self.extensions {
            match entry.extension() {
                Some(ext) if extensions.contains(&ext) => {}
                _ => return false,
            }
        }

        !(entry.is_directory || entry.is_system || entry.is_temporary || entry.is_deleted)
    }
}

fn normalize_extension(ext: &str) -> String {
    ext.trim().trim_start_matches('.').to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolved(name: &str, path: &str) -> UsnEntry {
        UsnEntry {
            file_reference: 1,
            parent_reference: 0,
            name: name.to_string(),
            is_deleted: false,
            is_directory: false,
            is_system: false,
            is_temporary: false,
            full_path: Some(path.to_string()),
        }
    }

    fn sample() -> Vec<UsnEntry> {
        let plain_pdf = resolved("a.pdf", r"C:\Docs\a.pdf");
        let plain_txt = resolved("b.txt", r"C:\Docs\b.txt");
        let outside = resolved("c.pdf", r"C:\Other\c.pdf");
        let mut deleted = resolved("d.pdf", r"C:\Docs\d.pdf");
        deleted.is_deleted = true;
        let mut system = resolved("e.pdf", r"C:\Docs\e.pdf");
        system.is_system = true;
        let mut temporary = resolved("f.pdf", r"C:\Docs\f.pdf");
        temporary.is_temporary = true;
        let mut directory = resolved("g.pdf", r"C:\Docs\g.pdf");
        directory.is_directory = true;
        vec![plain_pdf, plain_txt, outside, deleted, system, temporary, directory]
    }

    fn kept(filter: &ScanFilter) -> Vec<String> {
        sample()
            .into_iter()
            .filter(|e| filter.matches(e))
            .map(|e| e.name)
            .collect()
    }

    #[test]
    fn composes_prefix_extension_and_flags() {
        let filter = ScanFilter::new()
            .with_folder(r"c:\docs\")
            .with_extensions([".PDF"]);
        assert_eq!(kept(&filter), vec!["a.pdf"]);
    }

    #[test]
    fn omitted_stages_pass_everything_through() {
        assert_eq!(kept(&ScanFilter::new()), vec!["a.pdf", "b.txt", "c.pdf"]);
        assert_eq!(
            kept(&ScanFilter::new().with_folder(r"C:\Docs")),
            vec!["a.pdf", "b.txt"]
        );
        assert_eq!(
            kept(&ScanFilter::new().with_extensions(["pdf"])),
            vec!["a.pdf", "c.pdf"]
        );
    }

    #[test]
    fn empty_extension_list_disables_stage() {
        let filter = ScanFilter::new().with_extensions(Vec::<String>::new());
        assert!(filter.extensions().is_none());
        assert_eq!(kept(&filter).len(), 3);
    }

    #[test]
    fn unresolved_entries_are_dropped() {
        let mut entry = resolved("loop.txt", "");
        entry.full_path = None;
        assert!(!ScanFilter::new().matches(&entry));
    }

    #[test]
    fn prefix_is_normalized() {
        let filter = ScanFilter::new().with_folder("C:/Users/Public/");
        assert_eq!(filter.folder_prefix(), Some(r"c:\users\public"));
    }
}
