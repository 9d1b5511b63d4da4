//! Extension-based dispatch to the right `ArchiveTool`, plus detection
//! of multi-part archive naming conventions.

use crate::tar_tool::TarTool;
use crate::tool::ArchiveTool;
use crate::zip_tool::ZipTool;
use cfk_core::archive::MultipartInfo;
use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::Arc;

/// Maps a file's extension suffix to the tool that handles it. Suffix
/// matching is longest-first so `"tar.gz"` wins over a bare `"gz"`
/// registration (none is registered here, but the ordering guards
/// against future additions).
pub struct ArchiveRegistry {
    tools: Vec<Arc<dyn ArchiveTool>>,
}

impl ArchiveRegistry {
    pub fn with_defaults() -> Self {
        Self { tools: vec![Arc::new(ZipTool), Arc::new(TarTool::gzip()), Arc::new(TarTool::plain())] }
    }

    /// Looks up the tool responsible for `name`'s extension, longest
    /// matching suffix wins (so `report.tar.gz` resolves to the gzip
    /// tar tool, not a hypothetical bare-`gz` handler).
    pub fn resolve(&self, name: &str) -> Option<Arc<dyn ArchiveTool>> {
        let lower = name.to_ascii_lowercase();
        let mut best: Option<(usize, Arc<dyn ArchiveTool>)> = None;
        for tool in &self.tools {
            for suffix in tool.suffixes() {
                if lower.ends_with(&format!(".{suffix}")) {
                    if best.as_ref().map_or(true, |(len, _)| suffix.len() > *len) {
                        best = Some((suffix.len(), tool.clone()));
                    }
                }
            }
        }
        best.map(|(_, tool)| tool)
    }

    /// True if `name`'s extension is recognized by any registered tool.
    pub fn is_archive(&self, name: &str) -> bool {
        self.resolve(name).is_some()
    }
}

impl Default for ArchiveRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

static PART_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)^(.*?)\.part(\d+)(\.[^.]+)$").unwrap());
static NUMERIC_SUFFIX_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(.*\.[^.]+)\.(\d+)$").unwrap());

/// Recognizes the two common multi-part archive naming conventions:
/// `name.partNN.ext` (e.g. winrar-style `foo.part01.rar`) and
/// `name.ext.NNN` (e.g. 7z-style `foo.zip.001`).
pub fn detect_multipart(name: &str) -> Option<MultipartInfo> {
    if let Some(caps) = PART_PATTERN.captures(name) {
        let digits = &caps[2];
        let width = digits.len();
        let ext = &caps[3];
        let base = &caps[1];
        let index: u32 = digits.parse().ok()?;
        return Some(MultipartInfo {
            part_file_format: format!("{base}.part{{n:0{width}}}{ext}"),
            second_part_index: index + 1,
        });
    }
    if let Some(caps) = NUMERIC_SUFFIX_PATTERN.captures(name) {
        let digits = &caps[2];
        let width = digits.len();
        let base = &caps[1];
        let index: u32 = digits.parse().ok()?;
        return Some(MultipartInfo {
            part_file_format: format!("{base}.{{n:0{width}}}"),
            second_part_index: index + 1,
        });
    }
    None
}

/// Renders `format` (as produced by `detect_multipart`) for part
/// number `n`, expanding the single `{n:0W}` placeholder.
pub fn format_part_name(format: &str, n: u32) -> String {
    static PLACEHOLDER: Lazy<Regex> = Lazy::new(|| Regex::new(r"\{n:0(\d+)\}").unwrap());
    if let Some(caps) = PLACEHOLDER.captures(format) {
        let width: usize = caps[1].parse().unwrap_or(1);
        let rendered = format!("{n:0width$}", width = width);
        return PLACEHOLDER.replace(format, rendered.as_str()).to_string();
    }
    format.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_zip_by_extension() {
        let registry = ArchiveRegistry::with_defaults();
        assert!(registry.resolve("backup.zip").is_some());
    }

    #[test]
    fn resolves_tar_gz_over_bare_gz() {
        let registry = ArchiveRegistry::with_defaults();
        let tool = registry.resolve("backup.tar.gz").unwrap();
        assert_eq!(tool.suffixes(), &["tar.gz", "tgz"]);
    }

    #[test]
    fn unknown_extension_is_not_an_archive() {
        let registry = ArchiveRegistry::with_defaults();
        assert!(!registry.is_archive("notes.txt"));
    }

    #[test]
    fn detects_winrar_style_part_naming() {
        let info = detect_multipart("movie.part01.rar").unwrap();
        assert_eq!(info.part_file_format, "movie.part{n:02}.rar");
        assert_eq!(info.second_part_index, 2);
        assert_eq!(format_part_name(&info.part_file_format, 3), "movie.part03.rar");
    }

    #[test]
    fn detects_numeric_suffix_part_naming() {
        let info = detect_multipart("archive.zip.001").unwrap();
        assert_eq!(info.part_file_format, "archive.zip.{n:03}");
        assert_eq!(info.second_part_index, 2);
        assert_eq!(format_part_name(&info.part_file_format, 2), "archive.zip.002");
    }

    #[test]
    fn single_part_names_are_not_multipart() {
        assert!(detect_multipart("archive.zip").is_none());
    }
}
