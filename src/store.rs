//! On-disk layout of a recorded animation: a fixed header followed by fixed-size chunks
//! of [`CHUNK_FRAME_COUNT`] frames each. All transfers against the store are whole-header
//! or whole-chunk sized; there are no partial-chunk reads or writes.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use crate::foundation::error::{StreamError, StreamResult};

/// File identification preceding the header fields.
pub const MAGIC: [u8; 4] = *b"VSTR";
/// Format version written after the magic.
pub const FORMAT_VERSION: u32 = 1;

/// Frames stored and transferred as one unit.
pub const CHUNK_FRAME_COUNT: u32 = 16;
/// One 32-bit packed color per pixel.
pub const PIXEL_SIZE: u32 = 4;

/// Byte size of the encoded header (magic + version + four fields).
pub const HEADER_SIZE: u64 = 24;

/// Stream header, written once at offset 0.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Header {
    pub width: u32,
    pub height: u32,
    pub frame_count: u32,
    pub ms_per_frame: u32,
}

impl Header {
    pub fn encode(&self) -> [u8; HEADER_SIZE as usize] {
        let mut out = [0u8; HEADER_SIZE as usize];
        out[0..4].copy_from_slice(&MAGIC);
        out[4..8].copy_from_slice(&FORMAT_VERSION.to_le_bytes());
        out[8..12].copy_from_slice(&self.width.to_le_bytes());
        out[12..16].copy_from_slice(&self.height.to_le_bytes());
        out[16..20].copy_from_slice(&self.frame_count.to_le_bytes());
        out[20..24].copy_from_slice(&self.ms_per_frame.to_le_bytes());
        out
    }

    pub fn decode(bytes: &[u8; HEADER_SIZE as usize]) -> StreamResult<Header> {
        if bytes[0..4] != MAGIC {
            return Err(StreamError::format("not a volstream file (bad magic)"));
        }
        let version = u32::from_le_bytes(bytes[4..8].try_into().expect("4 bytes"));
        if version != FORMAT_VERSION {
            return Err(StreamError::format(format!(
                "unsupported format version {version} (expected {FORMAT_VERSION})"
            )));
        }
        let header = Header {
            width: u32::from_le_bytes(bytes[8..12].try_into().expect("4 bytes")),
            height: u32::from_le_bytes(bytes[12..16].try_into().expect("4 bytes")),
            frame_count: u32::from_le_bytes(bytes[16..20].try_into().expect("4 bytes")),
            ms_per_frame: u32::from_le_bytes(bytes[20..24].try_into().expect("4 bytes")),
        };
        header.validate()?;
        Ok(header)
    }

    /// Startup invariants; violations are fatal before the streaming loop is entered.
    pub fn validate(&self) -> StreamResult<()> {
        if self.width == 0 || self.height == 0 {
            return Err(StreamError::format("frame dimensions must be nonzero"));
        }
        if self.ms_per_frame == 0 {
            return Err(StreamError::format("ms_per_frame must be nonzero"));
        }
        if self.frame_count % CHUNK_FRAME_COUNT != 0 {
            return Err(StreamError::format(format!(
                "frame_count {} is not a multiple of the chunk frame count {}",
                self.frame_count, CHUNK_FRAME_COUNT
            )));
        }
        if self.frame_count <= CHUNK_FRAME_COUNT {
            return Err(StreamError::format(
                "stream needs at least two chunks to double-buffer",
            ));
        }
        Ok(())
    }
}

/// Derived sizes and offsets for a validated header.
#[derive(Clone, Copy, Debug)]
pub struct Geometry {
    pub width: u32,
    pub height: u32,
    pub frame_count: u32,
}

impl Geometry {
    pub fn of(header: &Header) -> Self {
        Geometry {
            width: header.width,
            height: header.height,
            frame_count: header.frame_count,
        }
    }

    pub fn frame_size(&self) -> usize {
        self.width as usize * self.height as usize * PIXEL_SIZE as usize
    }

    pub fn chunk_size(&self) -> usize {
        self.frame_size() * CHUNK_FRAME_COUNT as usize
    }

    pub fn chunk_count(&self) -> u32 {
        self.frame_count / CHUNK_FRAME_COUNT
    }

    pub fn chunk_offset(&self, index: u32) -> u64 {
        HEADER_SIZE + index as u64 * self.chunk_size() as u64
    }
}

/// Where an interrupted recording resumes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Recovery {
    /// Re-record starting at this chunk index (the last fully written chunk is redone).
    Resume { chunk: u32 },
    /// Fewer than one full chunk exists; record from scratch.
    Fresh,
}

/// Create a fresh store: truncate, validate and write the header.
pub fn create(path: &Path, header: &Header) -> StreamResult<File> {
    header.validate()?;
    let mut file = File::create(path).map_err(|e| StreamError::io(0, e))?;
    file.write_all(&header.encode())
        .map_err(|e| StreamError::io(0, e))?;
    Ok(file)
}

/// Open an existing store for playback and validate its header.
pub fn open(path: &Path) -> StreamResult<(File, Header)> {
    let mut file = File::open(path).map_err(|e| StreamError::io(0, e))?;
    let header = read_header(&mut file)?;
    Ok((file, header))
}

/// Open a partially recorded store and compute where recording left off.
///
/// The resume point is the last *fully* written chunk, which is recorded again: a chunk
/// whose write was cut short by the interruption may exist only partially on disk.
pub fn recover(path: &Path) -> StreamResult<(File, Header, Recovery)> {
    let mut file = File::options()
        .read(true)
        .write(true)
        .open(path)
        .map_err(|e| StreamError::io(0, e))?;
    let header = read_header(&mut file)?;
    let geom = Geometry::of(&header);
    let size = file
        .metadata()
        .map_err(|e| StreamError::io(0, e))?
        .len();
    let full_chunks = size.saturating_sub(HEADER_SIZE) / geom.chunk_size() as u64;
    let recovery = if full_chunks == 0 {
        Recovery::Fresh
    } else {
        let chunk = (full_chunks - 1).min(geom.chunk_count() as u64 - 1) as u32;
        Recovery::Resume { chunk }
    };
    Ok((file, header, recovery))
}

fn read_header(file: &mut File) -> StreamResult<Header> {
    file.seek(SeekFrom::Start(0))
        .map_err(|e| StreamError::io(0, e))?;
    let mut bytes = [0u8; HEADER_SIZE as usize];
    file.read_exact(&mut bytes)
        .map_err(|e| StreamError::io(0, e))?;
    Header::decode(&bytes)
}
