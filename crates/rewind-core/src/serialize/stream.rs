//! Byte-stream adapters and fixed-size buffering
//!
//! The host supplies raw streams; writers and readers talk to them only
//! through [`BufferedSink`] and [`BufferedSource`].

use crate::error::{TtdError, TtdResult};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use super::preallocation;

/// Default serialization buffer size (256 KiB)
pub const DEFAULT_BUFFER_SIZE: usize = 262_144;

/// Smallest buffer a writer or reader accepts
pub const MIN_BUFFER_SIZE: usize = 64;

/// Name of the event-log stream inside a log container
pub const LOG_STREAM_NAME: &str = "ttdlog.log";

/// Stream name for the snapshot taken at `event_time`
pub fn snapshot_stream_name(event_time: i64) -> String {
    format!("snap_{}.snp", event_time)
}

/// Host-supplied output stream
pub trait ByteSink {
    /// Write every byte in `bytes`
    fn write(&mut self, bytes: &[u8]) -> io::Result<()>;

    /// Flush pending data and release the stream
    fn flush_and_close(&mut self) -> io::Result<()>;
}

/// Host-supplied input stream
pub trait ByteSource {
    /// Read up to `buf.len()` bytes, returning 0 at end of stream
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Release the stream
    fn close(&mut self) -> io::Result<()>;
}

/// Adapts any [`Write`] into a [`ByteSink`]
pub struct IoSink<W: Write> {
    inner: Option<W>,
}

impl<W: Write> IoSink<W> {
    /// Wrap a writer
    pub fn new(inner: W) -> Self {
        Self { inner: Some(inner) }
    }
}

impl<W: Write> ByteSink for IoSink<W> {
    fn write(&mut self, bytes: &[u8]) -> io::Result<()> {
        match self.inner.as_mut() {
            Some(w) => w.write_all(bytes),
            None => Err(io::Error::new(io::ErrorKind::BrokenPipe, "stream closed")),
        }
    }

    fn flush_and_close(&mut self) -> io::Result<()> {
        if let Some(mut w) = self.inner.take() {
            w.flush()?;
        }
        Ok(())
    }
}

/// Adapts any [`Read`] into a [`ByteSource`]
pub struct IoSource<R: Read> {
    inner: Option<R>,
}

impl<R: Read> IoSource<R> {
    /// Wrap a reader
    pub fn new(inner: R) -> Self {
        Self { inner: Some(inner) }
    }
}

impl<R: Read> ByteSource for IoSource<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.inner.as_mut() {
            Some(r) => r.read(buf),
            None => Ok(0),
        }
    }

    fn close(&mut self) -> io::Result<()> {
        self.inner = None;
        Ok(())
    }
}

/// Opens named resource streams inside one log container
pub trait StreamProvider {
    /// Open `name` for writing, replacing any previous contents
    fn open_write(&self, name: &str) -> TtdResult<Box<dyn ByteSink>>;

    /// Open `name` for reading
    fn open_read(&self, name: &str) -> TtdResult<Box<dyn ByteSource>>;

    /// True if `name` exists
    fn exists(&self, name: &str) -> bool;
}

/// Streams stored as files in one directory
#[derive(Debug, Clone)]
pub struct DirectoryStreams {
    root: PathBuf,
}

impl DirectoryStreams {
    /// Use `root` as the log container, creating it if needed
    pub fn new(root: impl AsRef<Path>) -> TtdResult<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    /// Directory backing this container
    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl StreamProvider for DirectoryStreams {
    fn open_write(&self, name: &str) -> TtdResult<Box<dyn ByteSink>> {
        let file = File::create(self.root.join(name))?;
        Ok(Box::new(IoSink::new(file)))
    }

    fn open_read(&self, name: &str) -> TtdResult<Box<dyn ByteSource>> {
        let path = self.root.join(name);
        if !path.exists() {
            return Err(TtdError::MissingStream(name.to_string()));
        }
        Ok(Box::new(IoSource::new(File::open(path)?)))
    }

    fn exists(&self, name: &str) -> bool {
        self.root.join(name).exists()
    }
}

/// In-memory streams; clones share the same storage
#[derive(Debug, Clone, Default)]
pub struct MemoryStreams {
    files: Arc<Mutex<FxHashMap<String, Arc<Vec<u8>>>>>,
}

impl MemoryStreams {
    /// Create an empty container
    pub fn new() -> Self {
        Self::default()
    }

    /// Contents of a closed stream
    pub fn contents(&self, name: &str) -> Option<Vec<u8>> {
        self.files.lock().get(name).map(|b| b.as_ref().clone())
    }

    /// Replace the contents of a stream
    pub fn insert(&self, name: &str, bytes: Vec<u8>) {
        self.files.lock().insert(name.to_string(), Arc::new(bytes));
    }

    /// Names of all stored streams, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.files.lock().keys().cloned().collect();
        names.sort();
        names
    }
}

struct MemorySink {
    name: String,
    data: Vec<u8>,
    files: Arc<Mutex<FxHashMap<String, Arc<Vec<u8>>>>>,
}

impl ByteSink for MemorySink {
    fn write(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.data.extend_from_slice(bytes);
        Ok(())
    }

    fn flush_and_close(&mut self) -> io::Result<()> {
        let data = std::mem::take(&mut self.data);
        self.files.lock().insert(self.name.clone(), Arc::new(data));
        Ok(())
    }
}

struct MemorySource {
    data: Arc<Vec<u8>>,
    pos: usize,
}

impl ByteSource for MemorySource {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let remaining = &self.data[self.pos..];
        let n = remaining.len().min(buf.len());
        buf[..n].copy_from_slice(&remaining[..n]);
        self.pos += n;
        Ok(n)
    }

    fn close(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl StreamProvider for MemoryStreams {
    fn open_write(&self, name: &str) -> TtdResult<Box<dyn ByteSink>> {
        Ok(Box::new(MemorySink {
            name: name.to_string(),
            data: Vec::new(),
            files: Arc::clone(&self.files),
        }))
    }

    fn open_read(&self, name: &str) -> TtdResult<Box<dyn ByteSource>> {
        let data = self
            .files
            .lock()
            .get(name)
            .cloned()
            .ok_or_else(|| TtdError::MissingStream(name.to_string()))?;
        Ok(Box::new(MemorySource { data, pos: 0 }))
    }

    fn exists(&self, name: &str) -> bool {
        self.files.lock().contains_key(name)
    }
}

/// Fixed-size write buffer in front of a [`ByteSink`]
pub struct BufferedSink {
    sink: Box<dyn ByteSink>,
    buffer: Vec<u8>,
    capacity: usize,
    closed: bool,
}

impl BufferedSink {
    /// Buffer writes to `sink` in chunks of `capacity` bytes
    pub fn new(sink: Box<dyn ByteSink>, capacity: usize) -> Self {
        let capacity = capacity.max(MIN_BUFFER_SIZE);
        Self {
            sink,
            buffer: Vec::with_capacity(capacity),
            capacity,
            closed: false,
        }
    }

    /// Append `bytes`; a write never straddles a flush boundary
    pub fn write_bytes(&mut self, bytes: &[u8]) -> TtdResult<()> {
        if self.buffer.len() + bytes.len() > self.capacity {
            self.flush_buffer()?;
        }
        if bytes.len() > self.capacity {
            self.sink.write(bytes)?;
        } else {
            self.buffer.extend_from_slice(bytes);
        }
        Ok(())
    }

    fn flush_buffer(&mut self) -> TtdResult<()> {
        if !self.buffer.is_empty() {
            self.sink.write(&self.buffer)?;
            self.buffer.clear();
        }
        Ok(())
    }

    /// Flush everything and close the underlying stream
    pub fn flush_and_close(&mut self) -> TtdResult<()> {
        if self.closed {
            return Ok(());
        }
        self.flush_buffer()?;
        self.sink.flush_and_close()?;
        self.closed = true;
        Ok(())
    }
}

/// Fixed-size read buffer in front of a [`ByteSource`]
pub struct BufferedSource {
    source: Box<dyn ByteSource>,
    buffer: Vec<u8>,
    pos: usize,
    end: usize,
    exhausted: bool,
}

impl BufferedSource {
    /// Buffer reads from `source` in chunks of `capacity` bytes
    pub fn new(source: Box<dyn ByteSource>, capacity: usize) -> Self {
        Self {
            source,
            buffer: vec![0; capacity.max(MIN_BUFFER_SIZE)],
            pos: 0,
            end: 0,
            exhausted: false,
        }
    }

    fn refill(&mut self) -> TtdResult<bool> {
        if self.pos < self.end {
            return Ok(true);
        }
        if self.exhausted {
            return Ok(false);
        }
        let n = self.source.read(&mut self.buffer)?;
        self.pos = 0;
        self.end = n;
        if n == 0 {
            self.exhausted = true;
        }
        Ok(n != 0)
    }

    /// Next byte without consuming it, `None` at end of stream
    pub fn peek_byte(&mut self) -> TtdResult<Option<u8>> {
        if self.refill()? {
            Ok(Some(self.buffer[self.pos]))
        } else {
            Ok(None)
        }
    }

    /// Consume one byte, `None` at end of stream
    pub fn next_byte(&mut self) -> TtdResult<Option<u8>> {
        let b = self.peek_byte()?;
        if b.is_some() {
            self.pos += 1;
        }
        Ok(b)
    }

    /// Consume one byte; end of stream is a format error
    pub fn read_byte(&mut self) -> TtdResult<u8> {
        self.next_byte()?.ok_or(TtdError::UnexpectedEof)
    }

    /// Fill `out` completely, refilling across buffer boundaries
    pub fn read_exact(&mut self, out: &mut [u8]) -> TtdResult<()> {
        let mut filled = 0;
        while filled < out.len() {
            if !self.refill()? {
                return Err(TtdError::UnexpectedEof);
            }
            let available = self.end - self.pos;
            let n = available.min(out.len() - filled);
            out[filled..filled + n].copy_from_slice(&self.buffer[self.pos..self.pos + n]);
            self.pos += n;
            filled += n;
        }
        Ok(())
    }

    /// Read `len` bytes that the stream declared itself
    ///
    /// The vector grows with the bytes actually delivered, so a corrupt
    /// length fails with `UnexpectedEof` instead of a huge allocation.
    pub fn read_declared(&mut self, len: u64) -> TtdResult<Vec<u8>> {
        let mut out = Vec::with_capacity(preallocation(len));
        let mut remaining = len;
        while remaining > 0 {
            if !self.refill()? {
                return Err(TtdError::UnexpectedEof);
            }
            let available = (self.end - self.pos) as u64;
            let n = available.min(remaining) as usize;
            out.extend_from_slice(&self.buffer[self.pos..self.pos + n]);
            self.pos += n;
            remaining -= n as u64;
        }
        Ok(out)
    }

    /// True once every byte has been consumed
    pub fn at_end(&mut self) -> TtdResult<bool> {
        Ok(self.peek_byte()?.is_none())
    }

    /// Close the underlying stream
    pub fn close(&mut self) -> TtdResult<()> {
        self.source.close()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_stream_name() {
        assert_eq!(snapshot_stream_name(42), "snap_42.snp");
    }

    #[test]
    fn test_memory_streams_round_trip() {
        let streams = MemoryStreams::new();
        let mut sink = streams.open_write("a").unwrap();
        sink.write(b"hello").unwrap();
        sink.flush_and_close().unwrap();
        assert!(streams.exists("a"));

        let mut source = streams.open_read("a").unwrap();
        let mut buf = [0u8; 16];
        let n = source.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"hello");
    }

    #[test]
    fn test_missing_stream() {
        let streams = MemoryStreams::new();
        assert!(matches!(
            streams.open_read("nope"),
            Err(TtdError::MissingStream(_))
        ));
    }

    #[test]
    fn test_buffered_sink_spans_flushes() {
        let streams = MemoryStreams::new();
        let mut sink = BufferedSink::new(streams.open_write("s").unwrap(), MIN_BUFFER_SIZE);
        for i in 0..100u32 {
            sink.write_bytes(&i.to_le_bytes()).unwrap();
        }
        sink.flush_and_close().unwrap();
        let data = streams.contents("s").unwrap();
        assert_eq!(data.len(), 400);
        assert_eq!(&data[396..], &99u32.to_le_bytes());
    }

    #[test]
    fn test_buffered_source_read_exact_across_refills() {
        let streams = MemoryStreams::new();
        let bytes: Vec<u8> = (0..200u8).collect();
        streams.insert("s", bytes.clone());
        let mut source = BufferedSource::new(streams.open_read("s").unwrap(), MIN_BUFFER_SIZE);
        let mut out = vec![0u8; 150];
        source.read_exact(&mut out).unwrap();
        assert_eq!(&out[..], &bytes[..150]);
        assert_eq!(source.read_byte().unwrap(), 150);
    }

    #[test]
    fn test_buffered_source_short_read_is_error() {
        let streams = MemoryStreams::new();
        streams.insert("s", vec![1, 2, 3]);
        let mut source = BufferedSource::new(streams.open_read("s").unwrap(), MIN_BUFFER_SIZE);
        let mut out = [0u8; 8];
        assert!(matches!(
            source.read_exact(&mut out),
            Err(TtdError::UnexpectedEof)
        ));
    }

    #[test]
    fn test_directory_streams() {
        let dir = tempfile::tempdir().unwrap();
        let streams = DirectoryStreams::new(dir.path()).unwrap();
        let mut sink = streams.open_write(LOG_STREAM_NAME).unwrap();
        sink.write(b"log").unwrap();
        sink.flush_and_close().unwrap();
        assert!(streams.exists(LOG_STREAM_NAME));
        assert!(!streams.exists("snap_1.snp"));
    }
}
