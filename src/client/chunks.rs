use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use std::io::SeekFrom;
use std::path::PathBuf;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

/// Where the driver gets chunk bytes from.
#[async_trait]
pub trait ChunkSource: Send + Sync {
    fn file_name(&self) -> &str;
    fn content_type(&self) -> Option<&str>;
    fn file_size(&self) -> u64;
    fn chunk_size(&self) -> u64;

    /// Every file, even an empty one, is at least one chunk.
    fn total_chunks(&self) -> u32 {
        (self.file_size().div_ceil(self.chunk_size())).max(1) as u32
    }

    async fn read_chunk(&self, index: u32) -> Result<Bytes>;
}

/// Chunk source backed by a file on disk. Chunks are read on demand
/// with an owned handle per read, so concurrent workers never contend
/// on a shared seek position.
pub struct FileChunkSource {
    path: PathBuf,
    file_name: String,
    content_type: Option<String>,
    file_size: u64,
    chunk_size: u64,
}

impl FileChunkSource {
    pub async fn open(path: impl Into<PathBuf>, chunk_size: u64) -> Result<Self> {
        anyhow::ensure!(chunk_size > 0, "chunk size must be positive");

        let path = path.into();
        let meta = tokio::fs::metadata(&path).await?;
        anyhow::ensure!(meta.is_file(), "{} is not a regular file", path.display());

        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "unnamed".to_string());

        Ok(Self {
            path,
            file_name,
            content_type: None,
            file_size: meta.len(),
            chunk_size,
        })
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }
}

#[async_trait]
impl ChunkSource for FileChunkSource {
    fn file_name(&self) -> &str {
        &self.file_name
    }

    fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    fn file_size(&self) -> u64 {
        self.file_size
    }

    fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    async fn read_chunk(&self, index: u32) -> Result<Bytes> {
        let start = index as u64 * self.chunk_size;
        if start > 0 && start >= self.file_size {
            anyhow::bail!(
                "chunk {} starts past end of {} byte file",
                index,
                self.file_size
            );
        }

        let len = self.chunk_size.min(self.file_size - start) as usize;

        let mut file = File::open(&self.path).await?;
        file.seek(SeekFrom::Start(start)).await?;

        let mut buf = vec![0u8; len];
        file.read_exact(&mut buf).await?;
        Ok(Bytes::from(buf))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    async fn source_with_bytes(len: usize, chunk_size: u64) -> (tempfile::NamedTempFile, FileChunkSource) {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        let data: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
        tmp.write_all(&data).unwrap();
        tmp.flush().unwrap();
        let source = FileChunkSource::open(tmp.path(), chunk_size).await.unwrap();
        (tmp, source)
    }

    #[tokio::test]
    async fn test_uneven_tail_chunk() {
        // 12 bytes at 5-byte chunks: 5, 5, 2
        let (_tmp, source) = source_with_bytes(12, 5).await;
        assert_eq!(source.total_chunks(), 3);
        assert_eq!(source.read_chunk(0).await.unwrap().len(), 5);
        assert_eq!(source.read_chunk(1).await.unwrap().len(), 5);
        assert_eq!(source.read_chunk(2).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_chunks_partition_the_file() {
        let (_tmp, source) = source_with_bytes(23, 8).await;
        let mut reassembled = Vec::new();
        for i in 0..source.total_chunks() {
            reassembled.extend_from_slice(&source.read_chunk(i).await.unwrap());
        }
        let expected: Vec<u8> = (0..23).map(|i| (i % 251) as u8).collect();
        assert_eq!(reassembled, expected);
    }

    #[tokio::test]
    async fn test_empty_file_is_one_chunk() {
        let (_tmp, source) = source_with_bytes(0, 5).await;
        assert_eq!(source.total_chunks(), 1);
        assert!(source.read_chunk(0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_read_past_end_rejected() {
        let (_tmp, source) = source_with_bytes(12, 5).await;
        assert!(source.read_chunk(3).await.is_err());
    }
}
