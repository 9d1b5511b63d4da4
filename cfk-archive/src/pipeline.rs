//! High-level orchestration gluing extension dispatch, multipart
//! assembly, and format tools into the operations a caller actually
//! wants: list the tree, extract everything, or pull one inner path.
//!
//! This layer intentionally never fetches bytes itself — a caller
//! (the VFS façade) supplies already-opened `SeekableStream`s for each
//! part and a local scratch directory; the pipeline only deals with
//! local files from here on. That split keeps this crate ignorant of
//! which backend a given archive actually lives on.

use crate::assembly::materialize_and_concat;
use crate::registry::ArchiveRegistry;
use cfk_core::archive::ArchiveEntry;
use cfk_core::error::{CfkError, CfkResult};
use cfk_transfer::stream::SeekableStream;
use std::path::{Path, PathBuf};

pub struct ArchivePipeline {
    registry: ArchiveRegistry,
}

impl ArchivePipeline {
    pub fn new() -> Self {
        Self { registry: ArchiveRegistry::with_defaults() }
    }

    pub fn is_archive_name(&self, name: &str) -> bool {
        self.registry.is_archive(name)
    }

    /// Assembles `parts` (already in part order; a single element for a
    /// non-multipart archive) into `staging_dir`, naming the combined
    /// file after `archive_name` so extension dispatch still works.
    pub async fn stage(&self, archive_name: &str, parts: Vec<SeekableStream>, staging_dir: &Path) -> CfkResult<PathBuf> {
        let dest = staging_dir.join(archive_name);
        materialize_and_concat(parts, &dest).await?;
        Ok(dest)
    }

    pub async fn list(&self, archive_name: &str, local_path: PathBuf) -> CfkResult<ArchiveEntry> {
        let tool = self.lookup(archive_name)?;
        tool.list(local_path).await
    }

    pub async fn extract_all(&self, archive_name: &str, local_path: PathBuf, dest_dir: PathBuf) -> CfkResult<()> {
        let tool = self.lookup(archive_name)?;
        tool.extract_all(local_path, dest_dir).await
    }

    pub async fn extract_one(&self, archive_name: &str, local_path: PathBuf, inner_path: String, dest_file: PathBuf) -> CfkResult<()> {
        let tool = self.lookup(archive_name)?;
        tool.extract_one(local_path, inner_path, dest_file).await
    }

    fn lookup(&self, archive_name: &str) -> CfkResult<std::sync::Arc<dyn crate::tool::ArchiveTool>> {
        self.registry.resolve(archive_name).ok_or_else(|| CfkError::DriverExtractNotSupported(archive_name.to_string()))
    }
}

impl Default for ArchivePipeline {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unknown_extension_reports_driver_not_supported() {
        let pipeline = ArchivePipeline::new();
        let err = pipeline.list("notes.txt", PathBuf::from("/tmp/notes.txt")).await.unwrap_err();
        assert!(err.is_driver_extract_not_supported());
    }

    #[tokio::test]
    async fn stages_a_single_part_archive_under_its_own_name() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src.zip");
        tokio::fs::write(&src, b"not really a zip, just bytes").await.unwrap();
        let file = tokio::fs::File::open(&src).await.unwrap();
        let link = cfk_core::link::Link::from_direct(Box::pin(file));
        let stream = SeekableStream::new(&link, dir.path().to_path_buf());

        let pipeline = ArchivePipeline::new();
        let staged = pipeline.stage("backup.zip", vec![stream], dir.path()).await.unwrap();
        assert_eq!(staged.file_name().unwrap(), "backup.zip");
        assert!(staged.exists());
    }
}
