//! Range-based reader interface for COG files
//!
//! This module provides a unified interface for reading byte ranges from various sources
//! (local files, HTTP, memory). COGs are designed to be read via HTTP Range requests, so
//! the TIFF decoder only ever sees a [`RangeCursor`] over a [`BlockCachedReader`]: every
//! byte range is fetched once per block and served from memory afterwards.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use lru::LruCache;
use tracing::trace;

use crate::error::AnyResult;

/// Default block size for cached remote reads
pub const DEFAULT_BLOCK_SIZE: u64 = 64 * 1024;

/// Default number of blocks kept per source (64 MiB with the default block size)
pub const DEFAULT_BLOCK_CAPACITY: usize = 1024;

/// Trait for reading byte ranges from any source
///
/// This abstraction allows the same COG reading code to work with:
/// - Local files (using seek + read)
/// - HTTP URLs (using Range header)
/// - In-memory buffers
pub trait RangeReader: Send + Sync {
    /// Read a range of bytes from the source
    fn read_range(&self, offset: u64, length: usize) -> AnyResult<Vec<u8>>;

    /// Get the total size of the source in bytes (0 when unknown)
    fn size(&self) -> u64;

    /// Get a human-readable identifier for this source (for logging/errors)
    fn identifier(&self) -> &str;

    /// Check if this is a local file (fast random access) or remote (expensive reads)
    fn is_local(&self) -> bool {
        let id = self.identifier();
        !id.starts_with("http://") && !id.starts_with("https://")
    }
}

/// Local file range reader
pub struct LocalRangeReader {
    path: PathBuf,
    identifier: String,
    size: u64,
}

impl LocalRangeReader {
    pub fn new(path: impl AsRef<Path>) -> AnyResult<Self> {
        let path = path.as_ref().to_path_buf();
        let metadata = std::fs::metadata(&path)?;
        Ok(Self {
            identifier: path.to_string_lossy().into_owned(),
            path,
            size: metadata.len(),
        })
    }
}

impl RangeReader for LocalRangeReader {
    fn read_range(&self, offset: u64, length: usize) -> AnyResult<Vec<u8>> {
        let mut file = File::open(&self.path)?;
        file.seek(SeekFrom::Start(offset))?;
        let mut buffer = vec![0u8; length];
        file.read_exact(&mut buffer)?;
        Ok(buffer)
    }

    fn size(&self) -> u64 {
        self.size
    }

    fn identifier(&self) -> &str {
        &self.identifier
    }
}

/// HTTP range reader for remote COG files
/// Uses reqwest with blocking client; callers run it on the blocking pool
pub struct HttpRangeReader {
    url: String,
    size: u64,
    client: reqwest::blocking::Client,
}

impl HttpRangeReader {
    pub fn new(url: &str) -> AnyResult<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()?;

        // Get file size via HEAD request
        let response = client.head(url).send()?;
        if !response.status().is_success() {
            return Err(format!("HEAD {url} failed: {}", response.status()).into());
        }
        let size = response
            .headers()
            .get(reqwest::header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);

        Ok(Self {
            url: url.to_string(),
            size,
            client,
        })
    }
}

impl RangeReader for HttpRangeReader {
    fn read_range(&self, offset: u64, length: usize) -> AnyResult<Vec<u8>> {
        if length == 0 {
            return Ok(Vec::new());
        }
        let range = format!("bytes={}-{}", offset, offset + length as u64 - 1);
        let response = self
            .client
            .get(&self.url)
            .header(reqwest::header::RANGE, range)
            .send()?;

        if !response.status().is_success() {
            return Err(format!("HTTP request failed: {}", response.status()).into());
        }

        Ok(response.bytes()?.to_vec())
    }

    fn size(&self) -> u64 {
        self.size
    }

    fn identifier(&self) -> &str {
        &self.url
    }
}

/// In-memory range reader, mostly useful for tests and embedded rasters
pub struct MemoryRangeReader {
    identifier: String,
    data: Arc<Vec<u8>>,
}

impl MemoryRangeReader {
    pub fn new(identifier: impl Into<String>, data: impl Into<Arc<Vec<u8>>>) -> Self {
        Self {
            identifier: identifier.into(),
            data: data.into(),
        }
    }
}

impl RangeReader for MemoryRangeReader {
    fn read_range(&self, offset: u64, length: usize) -> AnyResult<Vec<u8>> {
        let start = usize::try_from(offset)?;
        let end = start
            .checked_add(length)
            .filter(|&end| end <= self.data.len())
            .ok_or_else(|| {
                format!(
                    "range {start}+{length} outside {} ({} bytes)",
                    self.identifier,
                    self.data.len()
                )
            })?;
        Ok(self.data[start..end].to_vec())
    }

    fn size(&self) -> u64 {
        self.data.len() as u64
    }

    fn identifier(&self) -> &str {
        &self.identifier
    }
}

/// Block-aligned LRU cache in front of another reader.
///
/// Reads are split into fixed-size blocks; missing neighbouring blocks are
/// fetched with a single request and kept until evicted, so the same bytes are
/// never requested twice while cached.
pub struct BlockCachedReader {
    inner: Arc<dyn RangeReader>,
    block_size: u64,
    blocks: Mutex<LruCache<u64, Arc<Vec<u8>>>>,
    fetches: AtomicUsize,
}

impl BlockCachedReader {
    #[must_use]
    pub fn new(inner: Arc<dyn RangeReader>) -> Self {
        Self::with_capacity(inner, DEFAULT_BLOCK_SIZE, DEFAULT_BLOCK_CAPACITY)
    }

    #[must_use]
    pub fn with_capacity(inner: Arc<dyn RangeReader>, block_size: u64, capacity: usize) -> Self {
        Self {
            inner,
            block_size: block_size.max(1),
            blocks: Mutex::new(LruCache::new(
                NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN),
            )),
            fetches: AtomicUsize::new(0),
        }
    }

    /// Number of requests issued to the wrapped reader so far
    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::Relaxed)
    }

    fn block_end(&self, block: u64) -> u64 {
        let end = (block + 1) * self.block_size;
        match self.inner.size() {
            0 => end,
            size => end.min(size),
        }
    }

    /// Fetch blocks `first..=last` from the wrapped reader in one request
    fn fetch_run(&self, first: u64, last: u64) -> AnyResult<Vec<(u64, Arc<Vec<u8>>)>> {
        let start = first * self.block_size;
        let end = self.block_end(last);
        let length = usize::try_from(end - start)?;

        trace!(source = self.inner.identifier(), start, length, "fetching byte range");
        self.fetches.fetch_add(1, Ordering::Relaxed);
        let data = self.inner.read_range(start, length)?;

        let block_size = usize::try_from(self.block_size)?;
        Ok((first..=last)
            .zip(data.chunks(block_size))
            .map(|(block, bytes)| (block, Arc::new(bytes.to_vec())))
            .collect())
    }
}

impl RangeReader for BlockCachedReader {
    fn read_range(&self, offset: u64, length: usize) -> AnyResult<Vec<u8>> {
        if length == 0 {
            return Ok(Vec::new());
        }
        let end = offset + length as u64;
        let size = self.inner.size();
        if size > 0 && end > size {
            return Err(format!(
                "range {offset}..{end} past end of {} ({size} bytes)",
                self.inner.identifier()
            )
            .into());
        }

        let first = offset / self.block_size;
        let last = (end - 1) / self.block_size;

        let mut found: Vec<Option<Arc<Vec<u8>>>> = {
            let mut blocks = self.blocks.lock().unwrap_or_else(PoisonError::into_inner);
            (first..=last).map(|block| blocks.get(&block).cloned()).collect()
        };

        // Fetch each run of consecutive missing blocks with one request
        let mut block = first;
        while block <= last {
            if found[(block - first) as usize].is_some() {
                block += 1;
                continue;
            }
            let run_start = block;
            while block <= last && found[(block - first) as usize].is_none() {
                block += 1;
            }
            let fetched = self.fetch_run(run_start, block - 1)?;
            let mut blocks = self.blocks.lock().unwrap_or_else(PoisonError::into_inner);
            for (index, bytes) in fetched {
                found[(index - first) as usize] = Some(Arc::clone(&bytes));
                blocks.put(index, bytes);
            }
        }

        let mut out = Vec::with_capacity(length);
        for (i, bytes) in found.into_iter().enumerate() {
            let bytes = bytes.ok_or("short read from underlying source")?;
            let block_start = (first + i as u64) * self.block_size;
            let from = usize::try_from(offset.saturating_sub(block_start))?;
            let to = usize::try_from((end - block_start).min(self.block_size))?;
            let slice = bytes
                .get(from..to)
                .ok_or("short read from underlying source")?;
            out.extend_from_slice(slice);
        }
        Ok(out)
    }

    fn size(&self) -> u64 {
        self.inner.size()
    }

    fn identifier(&self) -> &str {
        self.inner.identifier()
    }

    fn is_local(&self) -> bool {
        self.inner.is_local()
    }
}

/// `Read + Seek` adapter so stream-oriented decoders can sit on a [`RangeReader`]
pub struct RangeCursor {
    reader: Arc<dyn RangeReader>,
    position: u64,
}

impl RangeCursor {
    #[must_use]
    pub fn new(reader: Arc<dyn RangeReader>) -> Self {
        Self { reader, position: 0 }
    }
}

impl Read for RangeCursor {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let size = self.reader.size();
        let wanted = match size {
            0 => buf.len(),
            size if self.position >= size => return Ok(0),
            size => buf.len().min(usize::try_from(size - self.position).unwrap_or(usize::MAX)),
        };
        if wanted == 0 {
            return Ok(0);
        }
        let data = self
            .reader
            .read_range(self.position, wanted)
            .map_err(io::Error::other)?;
        let n = data.len().min(buf.len());
        buf[..n].copy_from_slice(&data[..n]);
        self.position += n as u64;
        Ok(n)
    }
}

impl Seek for RangeCursor {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(offset) => Some(offset),
            SeekFrom::Current(delta) => self.position.checked_add_signed(delta),
            SeekFrom::End(delta) => match self.reader.size() {
                0 => {
                    return Err(io::Error::new(
                        io::ErrorKind::Unsupported,
                        "cannot seek from end of a source with unknown size",
                    ));
                }
                size => size.checked_add_signed(delta),
            },
        };
        let target = target.ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "seek to a negative or overflowing position")
        })?;
        self.position = target;
        Ok(target)
    }
}

/// Create a range reader from a path or URL
pub fn create_range_reader(source: &str) -> AnyResult<Arc<dyn RangeReader>> {
    match url::Url::parse(source) {
        Ok(url) => match url.scheme() {
            "http" | "https" => Ok(Arc::new(HttpRangeReader::new(source)?)),
            "file" => {
                let path = url
                    .to_file_path()
                    .map_err(|()| format!("invalid file URL: {source}"))?;
                Ok(Arc::new(LocalRangeReader::new(path)?))
            }
            // Windows drive letters parse as one-letter schemes
            scheme if scheme.len() == 1 => Ok(Arc::new(LocalRangeReader::new(source)?)),
            scheme => Err(format!("unsupported source scheme '{scheme}' in {source}").into()),
        },
        Err(_) => Ok(Arc::new(LocalRangeReader::new(source)?)),
    }
}
