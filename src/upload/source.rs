//! Local byte sources an upload reads from.

use std::fmt;
use std::io::{self, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

/// Random-access bytes of known size.
#[async_trait]
pub trait ByteSource: fmt::Debug + Send + Sync {
    fn size(&self) -> u64;

    /// Read `[start, end)`.
    async fn read_range(&self, start: u64, end: u64) -> io::Result<Vec<u8>>;
}

/// Bytes held in memory.
#[derive(Clone)]
pub struct MemorySource {
    data: Arc<Vec<u8>>,
}

impl MemorySource {
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            data: Arc::new(data),
        }
    }
}

impl fmt::Debug for MemorySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemorySource")
            .field("len", &self.data.len())
            .finish()
    }
}

#[async_trait]
impl ByteSource for MemorySource {
    fn size(&self) -> u64 {
        self.data.len() as u64
    }

    async fn read_range(&self, start: u64, end: u64) -> io::Result<Vec<u8>> {
        let (start, end) = checked_range(start, end, self.size())?;
        Ok(self.data[start as usize..end as usize].to_vec())
    }
}

/// A file on disk, opened per read so a session can outlive any handle.
#[derive(Debug, Clone)]
pub struct FileSource {
    path: PathBuf,
    size: u64,
}

impl FileSource {
    pub async fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let metadata = tokio::fs::metadata(&path).await?;
        if !metadata.is_file() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{} is not a regular file", path.display()),
            ));
        }
        Ok(Self {
            path,
            size: metadata.len(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl ByteSource for FileSource {
    fn size(&self) -> u64 {
        self.size
    }

    async fn read_range(&self, start: u64, end: u64) -> io::Result<Vec<u8>> {
        let (start, end) = checked_range(start, end, self.size)?;
        let mut file = tokio::fs::File::open(&self.path).await?;
        file.seek(SeekFrom::Start(start)).await?;
        let mut buf = vec![0u8; (end - start) as usize];
        file.read_exact(&mut buf).await?;
        Ok(buf)
    }
}

fn checked_range(start: u64, end: u64, size: u64) -> io::Result<(u64, u64)> {
    if start > end || end > size {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("range {}..{} outside 0..{}", start, end, size),
        ));
    }
    Ok((start, end))
}
