//! The framed binary container archives are flushed into.
//!
//! A container is a short header followed by a sequence of HDUs ("header/data
//! units"). Each HDU is one CBOR-encoded table tagged with an extension name
//! and protected by a blake3 digest:
//!
//! ```text
//! "RESN" | version: u16 LE
//! repeated:
//!   extname_len: u16 LE | extname: UTF-8 | body_len: u64 LE | blake3(body): [u8; 32] | body
//! ```
//!
//! Several archives can live in one container; each starts at its own HDU
//! index.

use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::Path;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::ArchiveError;
use crate::options::ReadOptions;

pub const MAGIC: &[u8; 4] = b"RESN";
pub const FORMAT_VERSION: u16 = 1;

const HEADER_LEN: usize = 6;
const DIGEST_LEN: usize = 32;

/// An in-memory container target, grown as HDUs are written.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemFile {
    data: Vec<u8>,
}

impl MemFile {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wraps bytes produced elsewhere (e.g. by [`MemFile::into_bytes`]).
    pub fn from_bytes(data: Vec<u8>) -> Self {
        MemFile { data }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl Write for MemFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.data.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

pub(crate) fn encode<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, ArchiveError> {
    let mut bytes = Vec::new();
    ciborium::into_writer(value, &mut bytes).map_err(|e| ArchiveError::Encode(e.to_string()))?;
    Ok(bytes)
}

pub(crate) fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, ArchiveError> {
    ciborium::from_reader(bytes).map_err(|e| ArchiveError::Decode(e.to_string()))
}

/// Writes HDUs to any byte sink.
///
/// Call [`finish`](ContainerWriter::finish) when done: it flushes buffered
/// output and hands the sink back.
#[derive(Debug)]
pub struct ContainerWriter<W: Write> {
    inner: W,
    hdus: usize,
}

impl<W: Write> ContainerWriter<W> {
    /// Starts a new container, writing the header immediately.
    pub fn new(mut inner: W) -> Result<Self, ArchiveError> {
        inner.write_all(MAGIC)?;
        inner.write_all(&FORMAT_VERSION.to_le_bytes())?;
        Ok(ContainerWriter { inner, hdus: 0 })
    }

    /// Number of HDUs in the container so far (including pre-existing ones
    /// when appending). This is also the index the next HDU will get.
    pub fn hdu_count(&self) -> usize {
        self.hdus
    }

    /// Appends one table, returning its HDU index.
    ///
    /// The frame is encoded in full before anything reaches the sink, so an
    /// encoding failure writes nothing and the HDU count is unchanged.
    pub fn write_table<T: Serialize + ?Sized>(&mut self, extname: &str, table: &T) -> Result<usize, ArchiveError> {
        let name_len = u16::try_from(extname.len())
            .map_err(|_| ArchiveError::Logic(format!("HDU name too long: {} bytes", extname.len())))?;
        let body = encode(table)?;
        let digest = blake3::hash(&body);

        let mut frame = Vec::with_capacity(2 + extname.len() + 8 + DIGEST_LEN + body.len());
        frame.extend_from_slice(&name_len.to_le_bytes());
        frame.extend_from_slice(extname.as_bytes());
        frame.extend_from_slice(&(body.len() as u64).to_le_bytes());
        frame.extend_from_slice(digest.as_bytes());
        frame.extend_from_slice(&body);
        self.inner.write_all(&frame)?;

        let index = self.hdus;
        self.hdus += 1;
        Ok(index)
    }

    /// Flushes and returns the underlying sink.
    pub fn finish(mut self) -> Result<W, ArchiveError> {
        self.inner.flush()?;
        Ok(self.inner)
    }
}

impl ContainerWriter<BufWriter<File>> {
    /// Creates (or truncates) a container file.
    pub fn create(path: impl AsRef<Path>) -> Result<Self, ArchiveError> {
        let file = File::create(path)?;
        Self::new(BufWriter::new(file))
    }

    /// Opens a container file for appending further archives.
    ///
    /// A missing or empty file is started fresh; otherwise its header is
    /// validated and its existing HDUs are counted.
    pub fn append(path: impl AsRef<Path>) -> Result<Self, ArchiveError> {
        let mut file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(path)?;

        let mut existing = Vec::new();
        file.read_to_end(&mut existing)?;
        if existing.is_empty() {
            return Self::new(BufWriter::new(file));
        }

        let hdus = scan_frames(&existing)?.len();
        file.seek(SeekFrom::End(0))?;
        Ok(ContainerWriter {
            inner: BufWriter::new(file),
            hdus,
        })
    }
}

#[derive(Debug, Clone)]
struct Frame {
    extname: String,
    start: usize,
    len: usize,
    digest: [u8; DIGEST_LEN],
}

fn take<'a>(data: &'a [u8], pos: &mut usize, len: usize) -> Result<&'a [u8], ArchiveError> {
    let end = pos
        .checked_add(len)
        .filter(|end| *end <= data.len())
        .ok_or_else(|| ArchiveError::Corrupt(format!("truncated container at byte {}", *pos)))?;
    let slice = &data[*pos..end];
    *pos = end;
    Ok(slice)
}

fn scan_frames(data: &[u8]) -> Result<Vec<Frame>, ArchiveError> {
    if data.len() < HEADER_LEN || &data[..4] != MAGIC {
        return Err(ArchiveError::Corrupt("not a resin container".to_string()));
    }
    let version = u16::from_le_bytes([data[4], data[5]]);
    if version != FORMAT_VERSION {
        return Err(ArchiveError::Corrupt(format!("unsupported container version {}", version)));
    }

    let mut frames = Vec::new();
    let mut pos = HEADER_LEN;
    while pos < data.len() {
        let name_len = take(data, &mut pos, 2)?;
        let name_len = u16::from_le_bytes([name_len[0], name_len[1]]) as usize;
        let extname = std::str::from_utf8(take(data, &mut pos, name_len)?)
            .map_err(|_| ArchiveError::Corrupt(format!("HDU {} has a non-UTF-8 name", frames.len())))?
            .to_string();

        let mut len_bytes = [0u8; 8];
        len_bytes.copy_from_slice(take(data, &mut pos, 8)?);
        let len = usize::try_from(u64::from_le_bytes(len_bytes))
            .map_err(|_| ArchiveError::Corrupt(format!("HDU {} is too large", frames.len())))?;

        let mut digest = [0u8; DIGEST_LEN];
        digest.copy_from_slice(take(data, &mut pos, DIGEST_LEN)?);

        let start = pos;
        take(data, &mut pos, len)?;
        frames.push(Frame {
            extname,
            start,
            len,
            digest,
        });
    }
    Ok(frames)
}

/// Reads HDUs from a container held in memory.
///
/// The reader has a current HDU, starting at [`ReadOptions::hdu`]; each
/// [`read_table`](ContainerReader::read_table) consumes one HDU and moves on.
#[derive(Debug)]
pub struct ContainerReader {
    data: Vec<u8>,
    frames: Vec<Frame>,
    cursor: usize,
    verify_checksums: bool,
}

impl ContainerReader {
    pub fn from_bytes(data: Vec<u8>) -> Result<Self, ArchiveError> {
        Self::with_options(data, &ReadOptions::default())
    }

    pub fn with_options(data: Vec<u8>, options: &ReadOptions) -> Result<Self, ArchiveError> {
        let frames = scan_frames(&data)?;
        let mut reader = ContainerReader {
            data,
            frames,
            cursor: 0,
            verify_checksums: options.verify_checksums,
        };
        reader.set_hdu(options.hdu)?;
        Ok(reader)
    }

    pub fn from_memfile(file: &MemFile) -> Result<Self, ArchiveError> {
        Self::from_bytes(file.as_bytes().to_vec())
    }

    pub fn open(path: impl AsRef<Path>) -> Result<Self, ArchiveError> {
        Self::open_with_options(path, &ReadOptions::default())
    }

    pub fn open_with_options(path: impl AsRef<Path>, options: &ReadOptions) -> Result<Self, ArchiveError> {
        let data = std::fs::read(path)?;
        Self::with_options(data, options)
    }

    pub fn hdu_count(&self) -> usize {
        self.frames.len()
    }

    pub fn current_hdu(&self) -> usize {
        self.cursor
    }

    /// Moves to the given HDU. Seeking to one past the last HDU is allowed
    /// (nothing further can be read there).
    pub fn set_hdu(&mut self, index: usize) -> Result<(), ArchiveError> {
        if index > self.frames.len() {
            return Err(ArchiveError::NoSuchHdu {
                index,
                count: self.frames.len(),
            });
        }
        self.cursor = index;
        Ok(())
    }

    /// Name of the current HDU, if there is one.
    pub fn current_extname(&self) -> Option<&str> {
        self.frames.get(self.cursor).map(|frame| frame.extname.as_str())
    }

    /// Decodes the current HDU, which must be named `extname`, and advances.
    pub fn read_table<T: DeserializeOwned>(&mut self, extname: &str) -> Result<T, ArchiveError> {
        let index = self.cursor;
        let frame = self.frames.get(index).ok_or(ArchiveError::NoSuchHdu {
            index,
            count: self.frames.len(),
        })?;
        if frame.extname != extname {
            return Err(ArchiveError::Corrupt(format!(
                "HDU {} is '{}', expected '{}'",
                index, frame.extname, extname
            )));
        }

        let body = &self.data[frame.start..frame.start + frame.len];
        if self.verify_checksums && blake3::hash(body).as_bytes() != &frame.digest {
            return Err(ArchiveError::Corrupt(format!("checksum mismatch in HDU {}", index)));
        }

        let table = decode(body)?;
        self.cursor += 1;
        Ok(table)
    }
}
