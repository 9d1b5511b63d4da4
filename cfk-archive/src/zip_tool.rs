//! `.zip` archive support via the `zip` crate.

use crate::tool::{ensure_dir_exists, io_err, zip_err, ArchiveTool};
use cfk_core::archive::ArchiveEntry;
use cfk_core::error::{CfkError, CfkResult};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::Read;
use std::path::PathBuf;

pub struct ZipTool;

fn build_tree(names: Vec<(String, u64, bool)>) -> ArchiveEntry {
    #[derive(Default)]
    struct Node {
        size: u64,
        is_dir: bool,
        children: BTreeMap<String, Node>,
    }

    let mut root = Node { is_dir: true, ..Default::default() };
    for (path, size, is_dir) in names {
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
impl ArchiveTool for ZipTool {
    fn suffixes(&self) -> &[&'static str] {
        &["zip"]
    }

    async fn list(&self, archive_path: PathBuf) -> CfkResult<ArchiveEntry> {
        tokio::task::spawn_blocking(move || {
            let file = File::open(&archive_path).map_err(io_err)?;
            let mut archive = zip::ZipArchive::new(file).map_err(zip_err)?;
            let mut entries = Vec::with_capacity(archive.len());
            for i in 0..archive.len() {
                let entry = archive.by_index(i).map_err(zip_err)?;
                entries.push((entry.name().to_string(), entry.size(), entry.is_dir()));
            }
            Ok(build_tree(entries))
        })
        .await
        .map_err(|e| CfkError::Other(format!("join error: {e}")))?
    }

    async fn extract_all(&self, archive_path: PathBuf, dest_dir: PathBuf) -> CfkResult<()> {
        tokio::task::spawn_blocking(move || {
            ensure_dir_exists(&dest_dir)?;
            let file = File::open(&archive_path).map_err(io_err)?;
            let mut archive = zip::ZipArchive::new(file).map_err(zip_err)?;
            archive.extract(&dest_dir).map_err(zip_err)?;
            Ok(())
        })
        .await
        .map_err(|e| CfkError::Other(format!("join error: {e}")))?
    }

    async fn extract_one(&self, archive_path: PathBuf, inner_path: String, dest_file: PathBuf) -> CfkResult<()> {
        tokio::task::spawn_blocking(move || {
            let file = File::open(&archive_path).map_err(io_err)?;
            let mut archive = zip::ZipArchive::new(file).map_err(zip_err)?;
            let mut entry = archive.by_name(&inner_path).map_err(zip_err)?;
            if entry.is_dir() {
                return Err(CfkError::NotFile(inner_path));
            }
            if let Some(parent) = dest_file.parent() {
                std::fs::create_dir_all(parent).map_err(io_err)?;
            }
            let mut out = File::create(&dest_file).map_err(io_err)?;
            let mut buf = [0u8; 64 * 1024];
            loop {
                let n = entry.read(&mut buf).map_err(io_err)?;
                if n == 0 {
                    break;
                }
                std::io::Write::write_all(&mut out, &buf[..n]).map_err(io_err)?;
            }
            Ok(())
        })
        .await
        .map_err(|e| CfkError::Other(format!("join error: {e}")))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_tree_nests_directories() {
        let tree = build_tree(vec![
            ("a.txt".into(), 10, false),
            ("sub/".into(), 0, true),
            ("sub/b.txt".into(), 20, false),
        ]);
        assert_eq!(tree.children.len(), 2);
        let sub = tree.children.iter().find(|c| c.name == "sub").unwrap();
        assert!(sub.is_dir);
        assert_eq!(sub.children[0].name, "b.txt");
    }
}
