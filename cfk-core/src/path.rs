//! Virtual path abstraction
//!
//! A `VirtualPath` is the sole namespace currency of the VFS: an
//! absolute, slash-rooted, normalized path with no backend identity of
//! its own. Which backend answers for a path is a question for the
//! resolver (`cfk-resolver`), not for the path type.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Absolute, normalized virtual path.
///
/// Construction always normalizes: duplicate slashes collapse, `.`
/// segments are dropped, and `..` segments pop the previous component
/// (never escaping the root).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VirtualPath {
    segments: Vec<String>,
}

impl VirtualPath {
    /// Build a normalized path from any slash-separated string.
    pub fn new(path: impl AsRef<str>) -> Self {
        let mut segments = Vec::new();
        for part in path.as_ref().split('/').filter(|s| !s.is_empty()) {
            match part {
                "." => {}
                ".." => {
                    segments.pop();
                }
                other => segments.push(other.to_string()),
            }
        }
        Self { segments }
    }

    /// The root path `/`.
    pub fn root() -> Self {
        Self { segments: Vec::new() }
    }

    pub fn from_segments(segments: Vec<String>) -> Self {
        Self { segments }
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn join(&self, name: impl AsRef<str>) -> Self {
        let mut segments = self.segments.clone();
        for part in name.as_ref().split('/').filter(|s| !s.is_empty()) {
            match part {
                "." => {}
                ".." => {
                    segments.pop();
                }
                other => segments.push(other.to_string()),
            }
        }
        Self { segments }
    }

    pub fn parent(&self) -> Option<Self> {
        if self.segments.is_empty() {
            None
        } else {
            let mut segments = self.segments.clone();
            segments.pop();
            Some(Self { segments })
        }
    }

    pub fn name(&self) -> Option<&str> {
        self.segments.last().map(|s| s.as_str())
    }

    pub fn extension(&self) -> Option<&str> {
        self.name().and_then(|n| n.rsplit_once('.')).map(|(_, ext)| ext)
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn depth(&self) -> usize {
        self.segments.len()
    }

    /// Does `self` sit at or below `prefix` in the namespace?
    pub fn starts_with(&self, prefix: &VirtualPath) -> bool {
        self.segments.len() >= prefix.segments.len()
            && self.segments[..prefix.segments.len()] == prefix.segments[..]
    }

    /// `self` with `prefix`'s segments stripped off the front.
    /// `None` if `self` is not under `prefix`.
    pub fn strip_prefix(&self, prefix: &VirtualPath) -> Option<VirtualPath> {
        if !self.starts_with(prefix) {
            return None;
        }
        Some(VirtualPath::from_segments(self.segments[prefix.segments.len()..].to_vec()))
    }

    pub fn to_path_string(&self) -> String {
        if self.segments.is_empty() {
            "/".to_string()
        } else {
            format!("/{}", self.segments.join("/"))
        }
    }
}

impl fmt::Display for VirtualPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_path_string())
    }
}

impl From<&str> for VirtualPath {
    fn from(value: &str) -> Self {
        VirtualPath::new(value)
    }
}

impl From<String> for VirtualPath {
    fn from(value: String) -> Self {
        VirtualPath::new(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_duplicate_slashes_and_dots() {
        assert_eq!(VirtualPath::new("/a//b/./c/"), VirtualPath::new("/a/b/c"));
    }

    #[test]
    fn parent_traversal_never_escapes_root() {
        let p = VirtualPath::new("/a/../../b");
        assert_eq!(p.to_path_string(), "/b");
        let p = VirtualPath::new("/../../..");
        assert_eq!(p, VirtualPath::root());
    }

    #[test]
    fn root_is_root() {
        assert!(VirtualPath::root().is_root());
        assert!(VirtualPath::new("/").is_root());
        assert!(!VirtualPath::new("/a").is_root());
    }

    #[test]
    fn starts_with_and_strip_prefix() {
        let mount = VirtualPath::new("/a/d");
        let full = VirtualPath::new("/a/d/e/file");
        assert!(full.starts_with(&mount));
        assert_eq!(full.strip_prefix(&mount).unwrap(), VirtualPath::new("/e/file"));
        assert!(!VirtualPath::new("/a/other").starts_with(&mount));
    }

    #[test]
    fn name_and_extension() {
        let p = VirtualPath::new("/a/b/report.tar.gz");
        assert_eq!(p.name(), Some("report.tar.gz"));
        assert_eq!(p.extension(), Some("gz"));
        assert_eq!(VirtualPath::root().name(), None);
    }

    #[test]
    fn display_round_trips_through_new() {
        let p = VirtualPath::new("/a/b/c");
        assert_eq!(VirtualPath::new(p.to_string()), p);
    }
}
