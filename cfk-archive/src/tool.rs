//! Per-format archive tooling contract.
//!
//! An `ArchiveTool` operates on a single, already-assembled local file
//! (multipart concatenation happens upstream, in `assembly`). The
//! underlying crates (`zip`, `tar`/`flate2`) are synchronous, so every
//! implementation hops onto a blocking thread internally rather than
//! forcing callers to do it.

use cfk_core::archive::ArchiveEntry;
use cfk_core::error::{CfkError, CfkResult};
use std::path::{Path, PathBuf};

/// One archive format's listing/extraction behavior.
#[async_trait::async_trait]
pub trait ArchiveTool: Send + Sync {
    /// Suffixes this tool claims, longest/most-specific first (e.g.
    /// `"tar.gz"` before `"gz"`).
    fn suffixes(&self) -> &[&'static str];

    /// Build the internal listing tree without extracting anything.
    async fn list(&self, archive_path: PathBuf) -> CfkResult<ArchiveEntry>;

    /// Extract the whole archive into `dest_dir`, which must already
    /// exist.
    async fn extract_all(&self, archive_path: PathBuf, dest_dir: PathBuf) -> CfkResult<()>;

    /// Extract a single inner path into `dest_file` (overwriting it).
    /// The default rejects directory paths; an archive-backed
    /// directory read goes through `extract_all` into a scratch dir
    /// instead.
    async fn extract_one(&self, archive_path: PathBuf, inner_path: String, dest_file: PathBuf) -> CfkResult<()>;
}

pub(crate) fn io_err(e: std::io::Error) -> CfkError {
    CfkError::Io(e)
}

pub(crate) fn zip_err(e: zip::result::ZipError) -> CfkError {
    match e {
        zip::result::ZipError::FileNotFound => CfkError::ObjectNotFound("entry not found in archive".into()),
        other => CfkError::Other(format!("zip error: {other}")),
    }
}

pub(crate) fn ensure_dir_exists(dir: &Path) -> CfkResult<()> {
    if !dir.is_dir() {
        return Err(CfkError::NotFolder(dir.display().to_string()));
    }
    Ok(())
}
