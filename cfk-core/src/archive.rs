//! Archive metadata data model
//!
//! These are the shapes `StorageBackend::archive_meta`/`archive_list`
//! return; the tools that populate them (per extension) live in the
//! archive crate, not here.

use serde::{Deserialize, Serialize};

/// Metadata about an archive object, as returned by a backend's
/// optional archive-reading capability.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ArchiveMeta {
    pub encrypted: bool,
    pub tree: Option<ArchiveEntry>,
    pub multipart: Option<MultipartInfo>,
}

/// One node of an archive's internal listing tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveEntry {
    pub name: String,
    pub size: u64,
    pub is_dir: bool,
    pub children: Vec<ArchiveEntry>,
}

impl ArchiveEntry {
    pub fn file(name: impl Into<String>, size: u64) -> Self {
        Self { name: name.into(), size, is_dir: false, children: Vec::new() }
    }

    pub fn dir(name: impl Into<String>, children: Vec<ArchiveEntry>) -> Self {
        let size = children.iter().map(|c| c.size).sum();
        Self { name: name.into(), size, is_dir: true, children }
    }

    /// Walk to the child matching `segments`, component by component.
    /// Returns `None` if any hop is missing or lands on a file before
    /// the path is exhausted.
    pub fn walk<'a>(&'a self, segments: &[String]) -> Option<&'a ArchiveEntry> {
        let mut node = self;
        for segment in segments {
            if !node.is_dir {
                return None;
            }
            node = node.children.iter().find(|c| &c.name == segment)?;
        }
        Some(node)
    }
}

/// Describes a multi-part archive (e.g. `foo.part01.rar`,
/// `foo.part02.rar`, ...).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MultipartInfo {
    /// Format string with a `{n}` placeholder for the part number,
    /// e.g. `"foo.part{n:02}.rar"`.
    pub part_file_format: String,
    /// The index of the second part (parts are usually 1-indexed;
    /// some tools start numbering at 0 or 2).
    pub second_part_index: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_tree() -> ArchiveEntry {
        ArchiveEntry::dir(
            "root",
            vec![
                ArchiveEntry::file("a.txt", 10),
                ArchiveEntry::dir("sub", vec![ArchiveEntry::file("b.txt", 20)]),
            ],
        )
    }

    #[test]
    fn walk_finds_nested_file() {
        let tree = sample_tree();
        let found = tree.walk(&["sub".to_string(), "b.txt".to_string()]).unwrap();
        assert_eq!(found.name, "b.txt");
        assert_eq!(found.size, 20);
    }

    #[test]
    fn walk_through_a_file_fails() {
        let tree = sample_tree();
        assert!(tree.walk(&["a.txt".to_string(), "nope".to_string()]).is_none());
    }

    #[test]
    fn dir_size_is_sum_of_children() {
        assert_eq!(sample_tree().size, 30);
    }
}
