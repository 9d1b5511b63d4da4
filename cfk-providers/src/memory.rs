//! In-process backend over a flat path map, used to exercise
//! cross-backend moves/copies and `.balance[N]` replica selection in
//! tests without touching the real filesystem.

use async_trait::async_trait;
use cfk_core::backend::{ByteStream, MutationResult, SpaceInfo, StorageBackend, StorageCapabilities, StorageConfig};
use cfk_core::entry::{DirectoryListing, Entry, EntryKind};
use cfk_core::error::{CfkError, CfkResult};
use cfk_core::link::Link;
use cfk_core::metadata::Metadata;
use cfk_core::operations::*;
use cfk_core::VirtualPath;
use chrono::Utc;
use futures::StreamExt;
use serde_json::Value;
use std::collections::BTreeMap;
use tokio::sync::RwLock;

#[derive(Clone)]
enum Node {
    File(Vec<u8>),
    Directory,
}

struct State {
    nodes: BTreeMap<VirtualPath, Node>,
}

impl State {
    fn new() -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert(VirtualPath::root(), Node::Directory);
        Self { nodes }
    }

    fn children_of(&self, path: &VirtualPath) -> Vec<VirtualPath> {
        self.nodes
            .keys()
            .filter(|candidate| *candidate != path && candidate.starts_with(path) && candidate.depth() == path.depth() + 1)
            .cloned()
            .collect()
    }
}

pub struct MemoryBackend {
    id: String,
    capabilities: StorageCapabilities,
    config: StorageConfig,
    addition: Value,
    state: RwLock<State>,
}

impl MemoryBackend {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            capabilities: StorageCapabilities::full(),
            config: StorageConfig::default(),
            addition: Value::Null,
            state: RwLock::new(State::new()),
        }
    }

    fn entry_for(path: &VirtualPath, node: &Node) -> Entry {
        match node {
            Node::Directory => Entry::directory(path.clone(), Metadata::new().with_modified(Utc::now())),
            Node::File(data) => Entry::file(path.clone(), Metadata::new().with_size(data.len() as u64).with_modified(Utc::now())),
        }
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    fn id(&self) -> &str {
        &self.id
    }

    fn display_name(&self) -> &str {
        "In-Memory"
    }

    fn capabilities(&self) -> &StorageCapabilities {
        &self.capabilities
    }

    fn storage_config(&self) -> &StorageConfig {
        &self.config
    }

    fn addition(&self) -> &Value {
        &self.addition
    }

    async fn init(&self) -> CfkResult<()> {
        Ok(())
    }

    async fn list(&self, path: &VirtualPath, _options: &ListOptions) -> CfkResult<DirectoryListing> {
        let state = self.state.read().await;
        match state.nodes.get(path) {
            Some(Node::Directory) => {}
            Some(Node::File(_)) => return Err(CfkError::NotFolder(path.to_path_string())),
            None => return Err(CfkError::ObjectNotFound(path.to_path_string())),
        }
        let entries = state.children_of(path).into_iter().map(|child| Self::entry_for(&child, state.nodes.get(&child).unwrap())).collect();
        Ok(DirectoryListing::new(path.clone(), entries))
    }

    async fn link(&self, path: &VirtualPath, _options: &ReadOptions) -> CfkResult<Link> {
        let state = self.state.read().await;
        match state.nodes.get(path) {
            Some(Node::File(data)) => {
                let cursor = std::io::Cursor::new(data.clone());
                Ok(Link::from_direct(Box::pin(TokioCursor(cursor))))
            }
            Some(Node::Directory) => Err(CfkError::NotFile(path.to_path_string())),
            None => Err(CfkError::ObjectNotFound(path.to_path_string())),
        }
    }

    async fn get_space_info(&self) -> CfkResult<SpaceInfo> {
        Ok(SpaceInfo::unknown())
    }

    async fn get(&self, path: &VirtualPath) -> CfkResult<Entry> {
        let state = self.state.read().await;
        let node = state.nodes.get(path).ok_or_else(|| CfkError::ObjectNotFound(path.to_path_string()))?;
        Ok(Self::entry_for(path, node))
    }

    async fn get_root(&self) -> CfkResult<Entry> {
        self.get(&VirtualPath::root()).await
    }

    async fn make_dir(&self, path: &VirtualPath) -> CfkResult<MutationResult> {
        let mut state = self.state.write().await;
        state.nodes.insert(path.clone(), Node::Directory);
        Ok(MutationResult::Entry(Self::entry_for(path, &Node::Directory)))
    }

    async fn move_object(&self, source: &VirtualPath, dest: &VirtualPath, options: &MoveOptions) -> CfkResult<MutationResult> {
        let mut state = self.state.write().await;
        let node = state.nodes.get(source).cloned().ok_or_else(|| CfkError::ObjectNotFound(source.to_path_string()))?;
        if state.nodes.contains_key(dest) && !options.overwrite {
            return Err(CfkError::AlreadyExists(dest.to_path_string()));
        }
        state.nodes.remove(source);
        state.nodes.insert(dest.clone(), node.clone());
        Ok(MutationResult::Entry(Self::entry_for(dest, &node)))
    }

    async fn copy(&self, source: &VirtualPath, dest: &VirtualPath, options: &CopyOptions) -> CfkResult<MutationResult> {
        let mut state = self.state.write().await;
        let node = state.nodes.get(source).cloned().ok_or_else(|| CfkError::ObjectNotFound(source.to_path_string()))?;
        if state.nodes.contains_key(dest) && !options.overwrite {
            return Err(CfkError::AlreadyExists(dest.to_path_string()));
        }
        state.nodes.insert(dest.clone(), node.clone());
        Ok(MutationResult::Entry(Self::entry_for(dest, &node)))
    }

    async fn rename(&self, source: &VirtualPath, new_name: &str) -> CfkResult<MutationResult> {
        let dest = source.parent().unwrap_or_else(VirtualPath::root).join(new_name);
        self.move_object(source, &dest, &MoveOptions::default()).await
    }

    async fn remove(&self, path: &VirtualPath, options: &DeleteOptions) -> CfkResult<()> {
        let mut state = self.state.write().await;
        let Some(node) = state.nodes.get(path).cloned() else {
            return if options.force { Ok(()) } else { Err(CfkError::ObjectNotFound(path.to_path_string())) };
        };
        if matches!(node, Node::Directory) {
            let children = state.children_of(path);
            if !children.is_empty() && !options.recursive {
                return Err(CfkError::DirectoryNotEmpty(path.to_path_string()));
            }
            let to_remove: Vec<VirtualPath> = state.nodes.keys().filter(|k| k.starts_with(path)).cloned().collect();
            for key in to_remove {
                state.nodes.remove(&key);
            }
        } else {
            state.nodes.remove(path);
        }
        Ok(())
    }

    async fn put(&self, path: &VirtualPath, mut stream: ByteStream, _size_hint: Option<u64>, options: &WriteOptions) -> CfkResult<MutationResult> {
        {
            let state = self.state.read().await;
            if state.nodes.contains_key(path) && !options.overwrite {
                return Err(CfkError::AlreadyExists(path.to_path_string()));
            }
        }
        let mut data = Vec::new();
        while let Some(chunk) = stream.next().await {
            data.extend_from_slice(&chunk?);
        }
        let mut state = self.state.write().await;
        state.nodes.insert(path.clone(), Node::File(data.clone()));
        Ok(MutationResult::Entry(Self::entry_for(path, &Node::File(data))))
    }
}

/// Adapts a `std::io::Cursor` into the `tokio::io::AsyncRead +
/// AsyncSeek` contract `Link::from_direct` requires.
struct TokioCursor(std::io::Cursor<Vec<u8>>);

impl tokio::io::AsyncRead for TokioCursor {
    fn poll_read(mut self: std::pin::Pin<&mut Self>, _cx: &mut std::task::Context<'_>, buf: &mut tokio::io::ReadBuf<'_>) -> std::task::Poll<std::io::Result<()>> {
        let filled_before = buf.filled().len();
        let n = std::io::Read::read(&mut self.0, buf.initialize_unfilled())?;
        buf.set_filled(filled_before + n);
        std::task::Poll::Ready(Ok(()))
    }
}

impl tokio::io::AsyncSeek for TokioCursor {
    fn start_seek(mut self: std::pin::Pin<&mut Self>, position: std::io::SeekFrom) -> std::io::Result<()> {
        std::io::Seek::seek(&mut self.0, position)?;
        Ok(())
    }

    fn poll_complete(self: std::pin::Pin<&mut Self>, _cx: &mut std::task::Context<'_>) -> std::task::Poll<std::io::Result<u64>> {
        std::task::Poll::Ready(Ok(self.0.position()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn make_dir_then_list_sees_it() {
        let backend = MemoryBackend::new("mem");
        backend.make_dir(&VirtualPath::new("/sub")).await.unwrap();
        let listing = backend.list(&VirtualPath::root(), &ListOptions::default()).await.unwrap();
        assert_eq!(listing.entries.len(), 1);
        assert!(listing.entries[0].is_directory());
    }

    #[tokio::test]
    async fn put_then_link_reads_back_bytes() {
        let backend = MemoryBackend::new("mem");
        let path = VirtualPath::new("/a.txt");
        let stream: ByteStream = Box::pin(futures::stream::once(async { Ok(bytes::Bytes::from_static(b"hi")) }));
        backend.put(&path, stream, Some(2), &WriteOptions::default()).await.unwrap();

        let link = backend.link(&path, &ReadOptions::default()).await.unwrap();
        match link.kind() {
            cfk_core::link::LinkKind::Direct(_) => {}
            _ => panic!("expected a direct link"),
        }
    }

    #[tokio::test]
    async fn remove_nonempty_directory_without_recursive_fails() {
        let backend = MemoryBackend::new("mem");
        backend.make_dir(&VirtualPath::new("/sub")).await.unwrap();
        backend.make_dir(&VirtualPath::new("/sub/inner")).await.unwrap();
        let err = backend.remove(&VirtualPath::new("/sub"), &DeleteOptions::default()).await.unwrap_err();
        assert!(matches!(err, CfkError::DirectoryNotEmpty(_)));
    }

    #[tokio::test]
    async fn move_is_visible_at_destination_and_gone_from_source() {
        let backend = MemoryBackend::new("mem");
        let stream: ByteStream = Box::pin(futures::stream::once(async { Ok(bytes::Bytes::from_static(b"x")) }));
        backend.put(&VirtualPath::new("/a.txt"), stream, Some(1), &WriteOptions::default()).await.unwrap();
        backend.move_object(&VirtualPath::new("/a.txt"), &VirtualPath::new("/b.txt"), &MoveOptions::default()).await.unwrap();

        assert!(backend.get(&VirtualPath::new("/a.txt")).await.is_err());
        assert!(backend.get(&VirtualPath::new("/b.txt")).await.is_ok());
    }
}
