//! Chunked random-access store
//!
//! The logical byte space is split into chunks of at most [`MAX_CHUNK_SIZE`]
//! bytes. Every chunk except the last one is full, so a position maps to a
//! chunk with a single division. Reads and writes that cross a boundary are
//! split per chunk and recombined before the caller sees them.

use std::borrow::Cow;
use std::cmp;
use std::fmt;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::Arc;

use log::{debug, trace};

/// Largest chunk a single mapping or buffer may cover (2^31 - 1 bytes)
pub const MAX_CHUNK_SIZE: usize = i32::MAX as usize;

/// Result of a read request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    /// Number of bytes copied into the buffer
    Read(usize),
    /// The position is at or past the end of the store
    Eof,
}

impl ReadOutcome {
    /// Bytes read, with end of input counted as zero
    pub fn bytes(self) -> usize {
        match self {
            ReadOutcome::Read(n) => n,
            ReadOutcome::Eof => 0,
        }
    }
}

enum Chunk {
    Heap(Vec<u8>),
    #[cfg(feature = "mmap")]
    Mapped(memmap2::Mmap),
}

impl Chunk {
    fn as_slice(&self) -> &[u8] {
        match self {
            Chunk::Heap(data) => data,
            #[cfg(feature = "mmap")]
            Chunk::Mapped(map) => map,
        }
    }

    fn len(&self) -> usize {
        self.as_slice().len()
    }

    /// Turns a mapped chunk into an owned buffer so it can be written
    fn make_heap(&mut self) -> &mut Vec<u8> {
        #[cfg(feature = "mmap")]
        if let Chunk::Mapped(map) = self {
            *self = Chunk::Heap(map.to_vec());
        }
        match self {
            Chunk::Heap(data) => data,
            #[cfg(feature = "mmap")]
            Chunk::Mapped(_) => unreachable!("mapped chunk converted above"),
        }
    }
}

impl Clone for Chunk {
    fn clone(&self) -> Self {
        Chunk::Heap(self.as_slice().to_vec())
    }
}

/// Random-access byte store with its own cursor
///
/// Chunks are reference counted. [`RandomAccessStore::duplicate`] hands out an
/// independent cursor over the same chunks, and a write into a shared chunk
/// copies that chunk first, so other cursors keep seeing the old bytes.
pub struct RandomAccessStore {
    chunks: Vec<Arc<Chunk>>,
    chunk_size: usize,
    length: u64,
    position: u64,
}

impl fmt::Debug for RandomAccessStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RandomAccessStore")
            .field("length", &self.length)
            .field("chunks", &self.chunks.len())
            .field("chunk_size", &self.chunk_size)
            .field("position", &self.position)
            .finish()
    }
}

impl Default for RandomAccessStore {
    fn default() -> Self {
        Self::new()
    }
}

impl RandomAccessStore {
    /// Create an empty store using the largest chunk size
    pub fn new() -> Self {
        Self::with_chunk_size(MAX_CHUNK_SIZE)
    }

    /// Create an empty store with a custom chunk size
    pub fn with_chunk_size(chunk_size: usize) -> Self {
        Self {
            chunks: Vec::new(),
            chunk_size: chunk_size.clamp(1, MAX_CHUNK_SIZE),
            length: 0,
            position: 0,
        }
    }

    /// Wrap an in-memory buffer
    pub fn from_bytes(data: Vec<u8>) -> Self {
        if data.len() <= MAX_CHUNK_SIZE {
            let length = data.len() as u64;
            let chunks = if data.is_empty() {
                Vec::new()
            } else {
                vec![Arc::new(Chunk::Heap(data))]
            };
            return Self {
                chunks,
                chunk_size: MAX_CHUNK_SIZE,
                length,
                position: 0,
            };
        }
        Self::from_slice_with_chunk_size(&data, MAX_CHUNK_SIZE)
    }

    /// Copy a buffer into chunks of the given size
    pub fn from_slice_with_chunk_size(data: &[u8], chunk_size: usize) -> Self {
        let mut store = Self::with_chunk_size(chunk_size);
        store.chunks = data
            .chunks(store.chunk_size)
            .map(|part| Arc::new(Chunk::Heap(part.to_vec())))
            .collect();
        store.length = data.len() as u64;
        store
    }

    /// Open a file read-only using the largest chunk size
    pub fn open<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        Self::open_with_chunk_size(path, MAX_CHUNK_SIZE)
    }

    /// Open a file read-only, one mapping (or buffer) per chunk
    pub fn open_with_chunk_size<P: AsRef<Path>>(path: P, chunk_size: usize) -> io::Result<Self> {
        let mut file = File::open(path.as_ref())?;
        let length = file.metadata()?.len();
        let mut store = Self::with_chunk_size(chunk_size);
        let mut offset = 0u64;

        while offset < length {
            let len = cmp::min(store.chunk_size as u64, length - offset) as usize;
            let chunk = Self::load_chunk(&mut file, offset, len)?;
            store.chunks.push(Arc::new(chunk));
            offset += len as u64;
        }
        store.length = length;

        debug!(
            "Opened {} ({} bytes, {} chunks)",
            path.as_ref().display(),
            length,
            store.chunks.len()
        );
        Ok(store)
    }

    #[cfg(feature = "mmap")]
    fn load_chunk(file: &mut File, offset: u64, len: usize) -> io::Result<Chunk> {
        // SAFETY: the mapping is read-only and never handed out mutably.
        let map = unsafe { memmap2::MmapOptions::new().offset(offset).len(len).map(&*file)? };
        Ok(Chunk::Mapped(map))
    }

    #[cfg(not(feature = "mmap"))]
    fn load_chunk(file: &mut File, offset: u64, len: usize) -> io::Result<Chunk> {
        let mut data = vec![0u8; len];
        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(&mut data)?;
        Ok(Chunk::Heap(data))
    }

    /// Total logical length in bytes
    pub fn len(&self) -> u64 {
        self.length
    }

    /// Whether the store holds no bytes
    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// Chunk size this store splits its byte space into
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Number of chunks currently backing the store
    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// Current cursor position
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Move the cursor; positions past the end are allowed
    pub fn set_position(&mut self, position: u64) {
        self.position = position;
    }

    /// Independent cursor over the same chunks, starting at the same position
    pub fn duplicate(&self) -> Self {
        Self {
            chunks: self.chunks.clone(),
            chunk_size: self.chunk_size,
            length: self.length,
            position: self.position,
        }
    }

    fn locate(&self, position: u64) -> (usize, usize) {
        let size = self.chunk_size as u64;
        ((position / size) as usize, (position % size) as usize)
    }

    /// Read at an absolute position without moving any cursor
    pub fn read_at(&self, position: u64, buf: &mut [u8]) -> ReadOutcome {
        if position >= self.length {
            return ReadOutcome::Eof;
        }

        let mut done = 0usize;
        let mut current = position;
        while done < buf.len() && current < self.length {
            let (index, offset) = self.locate(current);
            let chunk = self.chunks[index].as_slice();
            let n = cmp::min(chunk.len() - offset, buf.len() - done);
            buf[done..done + n].copy_from_slice(&chunk[offset..offset + n]);
            done += n;
            current += n as u64;
        }

        trace!("read_at {} -> {} bytes", position, done);
        ReadOutcome::Read(done)
    }

    /// Read at the cursor and advance it
    pub fn read(&mut self, buf: &mut [u8]) -> ReadOutcome {
        let outcome = self.read_at(self.position, buf);
        self.position += outcome.bytes() as u64;
        outcome
    }

    /// Read exactly `len` bytes at `position`
    pub fn read_exact_at(&self, position: u64, len: usize) -> io::Result<Vec<u8>> {
        let mut buf = vec![0u8; len];
        match self.read_at(position, &mut buf) {
            ReadOutcome::Read(n) if n == len => Ok(buf),
            ReadOutcome::Eof if len == 0 => Ok(buf),
            _ => Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("{} bytes requested at {} past end {}", len, position, self.length),
            )),
        }
    }

    /// Single byte at `position`, `None` past the end
    pub fn byte_at(&self, position: u64) -> Option<u8> {
        if position >= self.length {
            return None;
        }
        let (index, offset) = self.locate(position);
        Some(self.chunks[index].as_slice()[offset])
    }

    /// Bytes in `[position, position + len)` clipped to the end of the store.
    ///
    /// Borrowed when the range lies inside one chunk.
    pub fn slice_at(&self, position: u64, len: usize) -> Cow<'_, [u8]> {
        if position >= self.length {
            return Cow::Borrowed(&[]);
        }
        let len = cmp::min(len as u64, self.length - position) as usize;
        let (index, offset) = self.locate(position);
        let chunk = self.chunks[index].as_slice();
        if offset + len <= chunk.len() {
            return Cow::Borrowed(&chunk[offset..offset + len]);
        }

        let mut buf = vec![0u8; len];
        let n = self.read_at(position, &mut buf).bytes();
        buf.truncate(n);
        Cow::Owned(buf)
    }

    /// Write at an absolute position, growing the store as needed.
    ///
    /// A gap between the current end and `position` is zero filled.
    pub fn write_at(&mut self, position: u64, buf: &[u8]) -> usize {
        if position > self.length {
            let gap = vec![0u8; (position - self.length) as usize];
            self.append(&gap);
        }

        let mut done = 0usize;
        let mut current = position;
        while done < buf.len() {
            if current == self.length {
                self.append(&buf[done..]);
                done = buf.len();
                break;
            }
            let (index, offset) = self.locate(current);
            let data = Arc::make_mut(&mut self.chunks[index]).make_heap();
            let n = cmp::min(data.len() - offset, buf.len() - done);
            data[offset..offset + n].copy_from_slice(&buf[done..done + n]);
            done += n;
            current += n as u64;
        }

        trace!("write_at {} <- {} bytes", position, done);
        done
    }

    /// Write at the cursor and advance it
    pub fn write(&mut self, buf: &[u8]) -> usize {
        let n = self.write_at(self.position, buf);
        self.position += n as u64;
        n
    }

    fn append(&mut self, mut data: &[u8]) {
        while !data.is_empty() {
            let full = self
                .chunks
                .last()
                .map_or(true, |chunk| chunk.len() >= self.chunk_size);
            if full {
                self.chunks.push(Arc::new(Chunk::Heap(Vec::new())));
            }
            let chunk_size = self.chunk_size;
            if let Some(last) = self.chunks.last_mut() {
                let buffer = Arc::make_mut(last).make_heap();
                let n = cmp::min(chunk_size - buffer.len(), data.len());
                buffer.extend_from_slice(&data[..n]);
                data = &data[n..];
                self.length += n as u64;
            }
        }
    }

    /// Copy the whole logical content into one buffer
    pub fn to_vec(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.length as usize);
        for chunk in &self.chunks {
            out.extend_from_slice(chunk.as_slice());
        }
        out
    }

    /// Stream every chunk into `writer`, returning the byte count
    pub fn copy_to<W: Write>(&self, writer: &mut W) -> io::Result<u64> {
        for chunk in &self.chunks {
            writer.write_all(chunk.as_slice())?;
        }
        writer.flush()?;
        Ok(self.length)
    }

    /// Write the content to a file, replacing it
    pub fn save_to_path<P: AsRef<Path>>(&self, path: P) -> io::Result<u64> {
        let mut file = io::BufWriter::new(File::create(path)?);
        self.copy_to(&mut file)
    }
}

impl Read for RandomAccessStore {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Ok(RandomAccessStore::read(self, buf).bytes())
    }
}

impl Write for RandomAccessStore {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Ok(RandomAccessStore::write(self, buf))
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Seek for RandomAccessStore {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(offset) => Some(offset),
            SeekFrom::End(delta) => self.length.checked_add_signed(delta),
            SeekFrom::Current(delta) => self.position.checked_add_signed(delta),
        };
        match target {
            Some(position) => {
                self.position = position;
                Ok(position)
            }
            None => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek before start of store",
            )),
        }
    }
}
