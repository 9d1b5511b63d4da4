//! `.tar` / `.tar.gz` / `.tgz` archive support via `tar` + `flate2`.

use crate::tool::{ensure_dir_exists, io_err, ArchiveTool};
use cfk_core::archive::ArchiveEntry;
use cfk_core::error::{CfkError, CfkResult};
use flate2::read::GzDecoder;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::Read;
use std::path::PathBuf;

pub struct TarTool {
    gzip: bool,
}

impl TarTool {
    pub fn plain() -> Self {
        Self { gzip: false }
    }

    pub fn gzip() -> Self {
        Self { gzip: true }
    }

    fn open(&self, path: &std::path::Path) -> CfkResult<tar::Archive<Box<dyn Read>>> {
        let file = File::open(path).map_err(io_err)?;
        let reader: Box<dyn Read> = if self.gzip { Box::new(GzDecoder::new(file)) } else { Box::new(file) };
        Ok(tar::Archive::new(reader))
    }
}

fn build_tree(entries: Vec<(String, u64, bool)>) -> ArchiveEntry {
    #[derive(Default)]
    struct Node {
        size: u64,
        is_dir: bool,
        children: BTreeMap<String, Node>,
    }

    let mut root = Node { is_dir: true, ..Default::default() };
    for (path, size, is_dir) in entries {
        let parts: Vec<&str> = path.trim_end_matches('/').split('/').filter(|p| !p.is_empty()).collect();
        let mut node = &mut root;
        for (i, part) in parts.iter().enumerate() {
            let last = i == parts.len() - 1;
            node = node.children.entry(part.to_string()).or_default();
            if last {
                node.is_dir = is_dir;
                node.size = size;
            } else {
                node.is_dir = true;
            }
        }
    }

    fn to_entry(name: String, node: Node) -> ArchiveEntry {
        if node.is_dir {
            let children = node.children.into_iter().map(|(n, c)| to_entry(n, c)).collect();
            ArchiveEntry::dir(name, children)
        } else {
            ArchiveEntry::file(name, node.size)
        }
    }

    let children = root.children.into_iter().map(|(n, c)| to_entry(n, c)).collect();
    ArchiveEntry::dir(String::new(), children)
}

#[async_trait::async_trait]
impl ArchiveTool for TarTool {
    fn suffixes(&self) -> &[&'static str] {
        if self.gzip {
            &["tar.gz", "tgz"]
        } else {
            &["tar"]
        }
    }

    async fn list(&self, archive_path: PathBuf) -> CfkResult<ArchiveEntry> {
        let gzip = self.gzip;
        tokio::task::spawn_blocking(move || {
            let tool = if gzip { TarTool::gzip() } else { TarTool::plain() };
            let mut archive = tool.open(&archive_path)?;
            let mut entries = Vec::new();
            for entry in archive.entries().map_err(io_err)? {
                let entry = entry.map_err(io_err)?;
                let header = entry.header();
                let path = entry.path().map_err(io_err)?.to_string_lossy().to_string();
                entries.push((path, header.size().unwrap_or(0), header.entry_type().is_dir()));
            }
            Ok(build_tree(entries))
        })
        .await
        .map_err(|e| CfkError::Other(format!("join error: {e}")))?
    }

    async fn extract_all(&self, archive_path: PathBuf, dest_dir: PathBuf) -> CfkResult<()> {
        let gzip = self.gzip;
        tokio::task::spawn_blocking(move || {
            ensure_dir_exists(&dest_dir)?;
            let tool = if gzip { TarTool::gzip() } else { TarTool::plain() };
            let mut archive = tool.open(&archive_path)?;
            archive.unpack(&dest_dir).map_err(io_err)?;
            Ok(())
        })
        .await
        .map_err(|e| CfkError::Other(format!("join error: {e}")))?
    }

    async fn extract_one(&self, archive_path: PathBuf, inner_path: String, dest_file: PathBuf) -> CfkResult<()> {
        let gzip = self.gzip;
        tokio::task::spawn_blocking(move || {
            let tool = if gzip { TarTool::gzip() } else { TarTool::plain() };
            let mut archive = tool.open(&archive_path)?;
            for entry in archive.entries().map_err(io_err)? {
                let mut entry = entry.map_err(io_err)?;
                let path = entry.path().map_err(io_err)?.to_string_lossy().to_string();
                if path.trim_end_matches('/') == inner_path.trim_end_matches('/') {
                    if entry.header().entry_type().is_dir() {
                        return Err(CfkError::NotFile(inner_path));
                    }
                    if let Some(parent) = dest_file.parent() {
                        std::fs::create_dir_all(parent).map_err(io_err)?;
                    }
                    let mut out = File::create(&dest_file).map_err(io_err)?;
                    std::io::copy(&mut entry, &mut out).map_err(io_err)?;
                    return Ok(());
                }
            }
            Err(CfkError::ObjectNotFound(inner_path))
        })
        .await
        .map_err(|e| CfkError::Other(format!("join error: {e}")))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_tool_claims_tar_suffix_only() {
        assert_eq!(TarTool::plain().suffixes(), &["tar"]);
    }

    #[test]
    fn gzip_tool_claims_tar_gz_and_tgz() {
        assert_eq!(TarTool::gzip().suffixes(), &["tar.gz", "tgz"]);
    }

    #[test]
    fn build_tree_computes_dir_size_from_children() {
        let tree = build_tree(vec![("sub/a.txt".into(), 5, false), ("sub/b.txt".into(), 7, false)]);
        let sub = tree.children.iter().find(|c| c.name == "sub").unwrap();
        assert_eq!(sub.size, 12);
    }
}
