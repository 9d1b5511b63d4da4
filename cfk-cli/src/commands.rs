// SPDX-License-Identifier: AGPL-3.0-or-later
//! CLI command implementations
//!
//! Each command resolves its arguments into `VirtualPath`s under the
//! `/local` mount and calls straight into the `cfk-vfs` façade. Cross-
//! backend/directory transfers come back as a background task id; since
//! this process exits after one command, those are waited on via the
//! same group bookkeeping the façade uses internally.

use cfk_core::operations::ReadOptions;
use cfk_core::{entry::EntryKind, CfkError, CfkResult, VirtualPath};
use cfk_providers::LocalBackend;
use cfk_transfer::SeekableStream;
use cfk_vfs::{Engine, EngineConfig};
use chrono::{DateTime, Utc};
use console::style;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tabled::{Table, Tabled};

const LOCAL_MOUNT: &str = "/local";

/// Opens the local cache database under the platform's cache directory,
/// mounts the real filesystem at `/local`, and returns the façade ready
/// to drive.
pub async fn build_engine() -> CfkResult<Arc<Engine>> {
    let dirs = directories::ProjectDirs::from("com", "cfk", "czech-file-knife");
    let cache_dir = dirs.map(|d| d.cache_dir().to_path_buf()).unwrap_or_else(|| std::env::temp_dir().join("cfk-cli"));
    tokio::fs::create_dir_all(&cache_dir).await.map_err(CfkError::Io)?;

    let db = sled::open(cache_dir.join("cache.db")).map_err(|e| CfkError::Cache(e.to_string()))?;
    let config = EngineConfig { stream_cache_dir: cache_dir.join("stream-cache"), ..Default::default() };
    let engine = Engine::new(&db, config).await?;

    engine.mount(VirtualPath::new(LOCAL_MOUNT), Arc::new(LocalBackend::new("local", "/")), 0, "local filesystem".into()).await?;
    Ok(engine)
}

/// Maps a CLI-supplied path onto the `/local` namespace: relative paths
/// resolve against the current directory, absolute paths are used as-is.
fn parse_path(path: &str) -> CfkResult<VirtualPath> {
    let path_buf = if path.starts_with('/') {
        PathBuf::from(path)
    } else {
        std::env::current_dir().map_err(CfkError::Io)?.join(path)
    };
    let canonical = path_buf.canonicalize().unwrap_or(path_buf);
    Ok(VirtualPath::new(LOCAL_MOUNT).join(canonical.to_string_lossy().as_ref()))
}

/// Blocks until every task in `group` has finished, polling the group
/// coordinator the way a long-running caller would watch its own
/// submitted work.
async fn wait_for_group(engine: &Engine, group: &str) {
    while engine.tasks.groups().outstanding(group).await.is_some() {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

async fn group_for_dest(engine: &Engine, dest: &VirtualPath) -> CfkResult<String> {
    let resolved = engine.resolver.resolve(dest).await?;
    Ok(cfk_transfer::group_id(&resolved.backend_key, &resolved.actual_path))
}

fn format_time(dt: Option<DateTime<Utc>>) -> String {
    dt.map(|t| t.format("%Y-%m-%d %H:%M").to_string()).unwrap_or_else(|| "-".to_string())
}

fn format_size(size: Option<u64>, human: bool) -> String {
    match size {
        Some(s) if human => bytesize::ByteSize(s).to_string(),
        Some(s) => s.to_string(),
        None => "-".to_string(),
    }
}

fn format_kind(kind: EntryKind) -> String {
    match kind {
        EntryKind::Directory => style("d").cyan().to_string(),
        EntryKind::File => "-".to_string(),
        EntryKind::Symlink => style("l").magenta().to_string(),
        EntryKind::Unknown => "?".to_string(),
    }
}

fn format_permissions(mode: Option<u32>) -> String {
    match mode {
        Some(m) => {
            let r = if m & 0o400 != 0 { 'r' } else { '-' };
            let w = if m & 0o200 != 0 { 'w' } else { '-' };
            let x = if m & 0o100 != 0 { 'x' } else { '-' };
            let gr = if m & 0o040 != 0 { 'r' } else { '-' };
            let gw = if m & 0o020 != 0 { 'w' } else { '-' };
            let gx = if m & 0o010 != 0 { 'x' } else { '-' };
            let or = if m & 0o004 != 0 { 'r' } else { '-' };
            let ow = if m & 0o002 != 0 { 'w' } else { '-' };
            let ox = if m & 0o001 != 0 { 'x' } else { '-' };
            format!("{r}{w}{x}{gr}{gw}{gx}{or}{ow}{ox}")
        }
        None => "---------".to_string(),
    }
}

#[derive(Tabled)]
struct LsEntry {
    #[tabled(rename = "Type")]
    kind: String,
    #[tabled(rename = "Permissions")]
    perms: String,
    #[tabled(rename = "Size")]
    size: String,
    #[tabled(rename = "Modified")]
    modified: String,
    #[tabled(rename = "Name")]
    name: String,
}

pub async fn ls(engine: &Engine, path: &str, long: bool, all: bool, human: bool, refresh: bool, verbose: bool) -> CfkResult<()> {
    let vpath = parse_path(path)?;
    if verbose {
        eprintln!("Listing: {vpath}");
    }

    let entries = engine.list(&vpath, refresh).await?;
    let visible: Vec<_> = entries.into_iter().filter(|e| all || !e.name().is_some_and(|n| n.starts_with('.'))).collect();

    if visible.is_empty() {
        println!("(empty directory)");
        return Ok(());
    }

    if long {
        let rows: Vec<LsEntry> = visible
            .iter()
            .map(|e| LsEntry {
                kind: format_kind(e.kind),
                perms: format_permissions(e.metadata.permissions.map(|p| p.mode)),
                size: format_size(e.metadata.size, human),
                modified: format_time(e.metadata.modified),
                name: e.name().unwrap_or("?").to_string(),
            })
            .collect();
        println!("{}", Table::new(rows));
    } else {
        for e in &visible {
            println!("{}", e.name().unwrap_or("?"));
        }
    }

    Ok(())
}

pub async fn cat(engine: &Engine, path: &str, verbose: bool) -> CfkResult<()> {
    use std::io::Write;

    let vpath = parse_path(path)?;
    if verbose {
        eprintln!("Reading: {vpath}");
    }

    let (link, _entry) = engine.link(&vpath, &ReadOptions::default()).await?;
    let _guard = link.acquire();
    let mut stream = SeekableStream::new(&link, engine.stream_cache_dir());

    let mut buf = vec![0u8; 64 * 1024];
    let mut stdout = std::io::stdout();
    loop {
        let n = stream.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        stdout.write_all(&buf[..n]).map_err(CfkError::Io)?;
    }

    Ok(())
}

pub async fn cp(engine: &Arc<Engine>, source: &str, dest: &str, verbose: bool) -> CfkResult<()> {
    let src_path = parse_path(source)?;
    let dst_dir = parse_path(dest)?;
    if verbose {
        eprintln!("Copying: {src_path} -> {dst_dir}");
    }

    if let Some(_task_id) = engine.copy(&src_path, &dst_dir).await? {
        let name = src_path.name().ok_or_else(|| CfkError::InvalidPath(src_path.to_path_string()))?;
        let group = group_for_dest(engine, &dst_dir.join(name)).await?;
        wait_for_group(engine, &group).await;
    }

    println!("Copied {source} -> {dest}");
    Ok(())
}

pub async fn mv(engine: &Arc<Engine>, source: &str, dest: &str, verbose: bool) -> CfkResult<()> {
    let src_path = parse_path(source)?;
    let dst_dir = parse_path(dest)?;
    if verbose {
        eprintln!("Moving: {src_path} -> {dst_dir}");
    }

    if let Some(_task_id) = engine.move_(&src_path, &dst_dir).await? {
        let name = src_path.name().ok_or_else(|| CfkError::InvalidPath(src_path.to_path_string()))?;
        let group = group_for_dest(engine, &dst_dir.join(name)).await?;
        wait_for_group(engine, &group).await;
    }

    println!("Moved {source} -> {dest}");
    Ok(())
}

pub async fn rm(engine: &Engine, paths: &[String], verbose: bool) -> CfkResult<()> {
    for path in paths {
        let vpath = parse_path(path)?;
        if verbose {
            eprintln!("Removing: {vpath}");
        }
        engine.remove(&vpath).await?;
        println!("Removed {path}");
    }
    Ok(())
}

pub async fn mkdir(engine: &Engine, paths: &[String], verbose: bool) -> CfkResult<()> {
    for path in paths {
        let vpath = parse_path(path)?;
        if verbose {
            eprintln!("Creating directory: {vpath}");
        }
        engine.make_dir(&vpath, false).await?;
        println!("Created {path}");
    }
    Ok(())
}

pub async fn stat(engine: &Engine, path: &str, verbose: bool) -> CfkResult<()> {
    let vpath = parse_path(path)?;
    if verbose {
        eprintln!("Getting info: {vpath}");
    }

    let entry = engine.get(&vpath, true).await?;
    println!("  Path: {}", entry.path);
    println!("  Type: {:?}", entry.kind);

    if let Some(size) = entry.metadata.size {
        println!("  Size: {size} ({})", bytesize::ByteSize(size));
    }
    if let Some(perms) = entry.metadata.permissions {
        println!("  Mode: {:o} ({})", perms.mode, format_permissions(Some(perms.mode)));
    }
    if let Some(modified) = entry.metadata.modified {
        println!("  Modified: {modified}");
    }
    if let Some(created) = entry.metadata.created {
        println!("  Created: {created}");
    }
    if let Some(hash) = &entry.metadata.content_hash {
        println!("  Hash: {hash}");
    }

    Ok(())
}

pub async fn backends(engine: &Engine, _verbose: bool) -> CfkResult<()> {
    println!("Mounted backends:");
    for mount_path in engine.registry.mount_paths().await {
        let Some(backend) = engine.registry.get(&mount_path).await else { continue };
        let status = engine.registry.status(&mount_path).await;
        let status_str = match status {
            Some(cfk_registry::StorageStatus::Working) => style("working").green().to_string(),
            Some(cfk_registry::StorageStatus::Disabled) => style("disabled").yellow().to_string(),
            Some(cfk_registry::StorageStatus::Error(e)) => style(format!("error: {e}")).red().to_string(),
            Some(cfk_registry::StorageStatus::Pending) | None => style("pending").yellow().to_string(),
        };
        println!("  {mount_path} ({}) - {status_str}", backend.display_name());
    }
    Ok(())
}

pub async fn df(engine: &Engine, mount: &str, verbose: bool) -> CfkResult<()> {
    if verbose {
        eprintln!("Getting space info for: {mount}");
    }

    let vpath = VirtualPath::new(mount);
    let info = engine.get_space_info(&vpath).await?;
    println!("Storage: {mount}");

    match (info.total, info.used, info.available) {
        (Some(total), Some(used), Some(avail)) => {
            let pct = (used as f64 / total as f64) * 100.0;
            println!("  Total:     {}", bytesize::ByteSize(total));
            println!("  Used:      {} ({pct:.1}%)", bytesize::ByteSize(used));
            println!("  Available: {}", bytesize::ByteSize(avail));
        }
        _ => println!("  Space information not available for this backend"),
    }

    Ok(())
}

pub async fn archive_ls(engine: &Engine, archive: &str, inner: &str, verbose: bool) -> CfkResult<()> {
    let archive_path = parse_path(archive)?;
    let inner_path = VirtualPath::new(inner);
    if verbose {
        eprintln!("Browsing: {archive_path}!{inner_path}");
    }

    let entries = engine.archive_list(&archive_path, &inner_path).await?;
    if entries.is_empty() {
        println!("(empty)");
        return Ok(());
    }
    for e in entries {
        let marker = if e.is_directory() { "/" } else { "" };
        println!("{}{marker}", e.name().unwrap_or("?"));
    }
    Ok(())
}

pub async fn archive_extract(engine: &Engine, archive: &str, inner: &str, dest: &str, verbose: bool) -> CfkResult<()> {
    let archive_path = parse_path(archive)?;
    let inner_path = VirtualPath::new(inner);
    let dest_dir = parse_path(dest)?;
    if verbose {
        eprintln!("Extracting: {archive_path}!{inner_path} -> {dest_dir}");
    }

    let entry = engine.archive_extract_one(&archive_path, &inner_path, &dest_dir).await?;
    println!("Extracted {} -> {}", inner, entry.path);
    Ok(())
}
