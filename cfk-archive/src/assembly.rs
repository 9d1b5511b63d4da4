//! Multi-part archive assembly: draining a sequence of part streams
//! into one local file the tools in `tool.rs` can open directly.
//!
//! This treats each part as an opaque byte range concatenated in part
//! order. It does not understand any format's internal multi-volume
//! framing (e.g. RAR's own volume headers) — callers pick this path
//! only for the "plain concatenation" multipart convention, which
//! covers the `.partNN.ext` / `.ext.NNN` namings `registry::detect_multipart`
//! recognizes.

use cfk_core::error::{CfkError, CfkResult};
use cfk_transfer::stream::SeekableStream;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;

const CHUNK_SIZE: usize = 256 * 1024;

/// Drains `parts` in order into `dest`, returning the total bytes
/// written. Each part stream is read to exhaustion and closed before
/// the next begins.
pub async fn materialize_and_concat(parts: Vec<SeekableStream>, dest: &std::path::Path) -> CfkResult<u64> {
    let mut out = File::create(dest).await.map_err(CfkError::Io)?;
    let mut total = 0u64;
    let mut buf = vec![0u8; CHUNK_SIZE];

    for mut part in parts {
        loop {
            let n = part.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            out.write_all(&buf[..n]).await.map_err(CfkError::Io)?;
            total += n as u64;
        }
        part.close().await?;
    }

    out.flush().await.map_err(CfkError::Io)?;
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use cfk_core::link::Link;

    async fn direct_link_from(dir: &std::path::Path, name: &str, contents: &[u8]) -> Link {
        let path = dir.join(name);
        tokio::fs::write(&path, contents).await.unwrap();
        let file = tokio::fs::File::open(&path).await.unwrap();
        Link::from_direct(Box::pin(file))
    }

    #[tokio::test]
    async fn concatenates_parts_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let part_a = direct_link_from(dir.path(), "a", b"hello, ").await;
        let part_b = direct_link_from(dir.path(), "b", b"world!").await;
        let streams = vec![SeekableStream::new(&part_a, dir.path().to_path_buf()), SeekableStream::new(&part_b, dir.path().to_path_buf())];

        let dest = dir.path().join("combined.bin");
        let written = materialize_and_concat(streams, &dest).await.unwrap();
        assert_eq!(written, 13);

        let contents = tokio::fs::read(&dest).await.unwrap();
        assert_eq!(contents, b"hello, world!");
    }
}
