//! File system entries

use crate::{Metadata, VirtualPath};
use serde::{Deserialize, Serialize};

/// Entry kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryKind {
    File,
    Directory,
    Symlink,
    Unknown,
}

/// A file system entry (the VFS's `Obj`: a file, folder, or symlink
/// as seen through a single backend).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entry {
    pub path: VirtualPath,
    pub kind: EntryKind,
    pub metadata: Metadata,
    /// Backend-native identifier, when the backend addresses objects
    /// by id rather than path (e.g. a Drive file id).
    pub native_id: Option<String>,
    /// Display-name override, applied after listing by a backend's
    /// character-mapping table (see `CharMap`). `None` means use
    /// `path.name()` unmodified.
    pub display_name: Option<String>,
}

impl Entry {
    pub fn file(path: VirtualPath, metadata: Metadata) -> Self {
        Self { path, kind: EntryKind::File, metadata, native_id: None, display_name: None }
    }

    pub fn directory(path: VirtualPath, metadata: Metadata) -> Self {
        Self { path, kind: EntryKind::Directory, metadata, native_id: None, display_name: None }
    }

    pub fn with_native_id(mut self, id: impl Into<String>) -> Self {
        self.native_id = Some(id.into());
        self
    }

    pub fn is_file(&self) -> bool {
        self.kind == EntryKind::File
    }

    pub fn is_directory(&self) -> bool {
        self.kind == EntryKind::Directory
    }

    pub fn name(&self) -> Option<&str> {
        self.display_name.as_deref().or_else(|| self.path.name())
    }

    pub fn size(&self) -> Option<u64> {
        self.metadata.size
    }
}

/// Per-backend name-rendering table, applied to listings at the façade
/// layer so that backends which mangle certain characters (or require
/// case folding) can be made to present clean names without touching
/// their on-disk/remote representation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CharMap {
    pub replacements: std::collections::HashMap<char, char>,
}

impl CharMap {
    pub fn apply(&self, name: &str) -> String {
        if self.replacements.is_empty() {
            return name.to_string();
        }
        name.chars().map(|c| *self.replacements.get(&c).unwrap_or(&c)).collect()
    }
}

/// Directory listing result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectoryListing {
    pub path: VirtualPath,
    pub entries: Vec<Entry>,
    pub cursor: Option<String>,
    pub has_more: bool,
}

impl DirectoryListing {
    pub fn new(path: VirtualPath, entries: Vec<Entry>) -> Self {
        Self { path, entries, cursor: None, has_more: false }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_name_overrides_path_name() {
        let mut e = Entry::file(VirtualPath::new("/a/RAW_NAME"), Metadata::new());
        assert_eq!(e.name(), Some("RAW_NAME"));
        e.display_name = Some("Clean Name".into());
        assert_eq!(e.name(), Some("Clean Name"));
    }

    #[test]
    fn char_map_replaces_only_mapped_characters() {
        let mut map = CharMap::default();
        map.replacements.insert(':', '_');
        assert_eq!(map.apply("a:b:c"), "a_b_c");
        assert_eq!(map.apply("unchanged"), "unchanged");
    }
}
