//! The recording driver: the dual of playback.
//!
//! Frames are rendered into one of two host chunk buffers; when a chunk fills, the
//! previous chunk's pending write is completed (the write has had a whole chunk's worth
//! of render time to finish) and the just-filled buffer is handed to the I/O channel,
//! while rendering continues into the other buffer.

use std::path::Path;

use tracing::{debug, info};

use crate::foundation::error::{StreamError, StreamResult};
use crate::io::{FaultPolicy, FileBackend, IoBackend, IoChannel, IoDirection, IoJob};
use crate::store::{self, CHUNK_FRAME_COUNT, Geometry, Header, Recovery};
use crate::stream::double_buffer::slot_for;

/// Producer of frame content; the simulation behind it is not this crate's concern.
pub trait FrameSource {
    /// Fill `out` (width*height 4-byte pixels) for the given absolute frame index.
    fn render(&mut self, frame_index: u32, out: &mut [u8]) -> StreamResult<()>;
}

/// Deterministic source for demos and tests: each pixel carries
/// `frame_index * pixels_per_frame + pixel_index` as a little-endian u32, so any byte of
/// any frame identifies exactly where it belongs.
pub struct PatternSource {
    pixels_per_frame: u32,
}

impl PatternSource {
    pub fn new(geom: &Geometry) -> Self {
        PatternSource {
            pixels_per_frame: geom.width * geom.height,
        }
    }
}

impl FrameSource for PatternSource {
    fn render(&mut self, frame_index: u32, out: &mut [u8]) -> StreamResult<()> {
        for (i, px) in out.chunks_exact_mut(4).enumerate() {
            let value = frame_index
                .wrapping_mul(self.pixels_per_frame)
                .wrapping_add(i as u32);
            px.copy_from_slice(&value.to_le_bytes());
        }
        Ok(())
    }
}

/// A recording stream writing chunks asynchronously while frames render.
pub struct RecordSession {
    geom: Geometry,
    io: IoChannel,
    bufs: [Option<Vec<u8>>; 2],
    in_flight: Option<usize>,
    start_frame: u32,
}

impl RecordSession {
    /// Start a fresh recording: truncate, write the header, spawn the writer.
    pub fn create(path: &Path, header: Header, policy: FaultPolicy) -> StreamResult<Self> {
        let file = store::create(path, &header)?;
        Self::with_backend(FileBackend::new(file), header, 0, policy)
    }

    /// Resume an interrupted recording at the last fully written chunk (that chunk is
    /// recorded again; a partially written successor cannot be trusted). Degrades to a
    /// fresh start when less than one full chunk exists.
    pub fn resume(path: &Path, policy: FaultPolicy) -> StreamResult<(Self, Header)> {
        let (file, header, recovery) = store::recover(path)?;
        let start_chunk = match recovery {
            Recovery::Resume { chunk } => chunk,
            Recovery::Fresh => 0,
        };
        info!(start_chunk, "resuming recording");
        let session = Self::with_backend(FileBackend::new(file), header, start_chunk, policy)?;
        Ok((session, header))
    }

    /// Record against an arbitrary backend, starting at `start_chunk`.
    pub fn with_backend<B: IoBackend>(
        backend: B,
        header: Header,
        start_chunk: u32,
        policy: FaultPolicy,
    ) -> StreamResult<Self> {
        header.validate()?;
        let geom = Geometry::of(&header);
        if start_chunk >= geom.chunk_count() {
            return Err(StreamError::format(format!(
                "start chunk {start_chunk} beyond chunk count {}",
                geom.chunk_count()
            )));
        }
        let io = IoChannel::spawn(backend, policy)?;
        let chunk_size = geom.chunk_size();
        Ok(RecordSession {
            geom,
            io,
            bufs: [Some(vec![0u8; chunk_size]), Some(vec![0u8; chunk_size])],
            in_flight: None,
            start_frame: start_chunk * CHUNK_FRAME_COUNT,
        })
    }

    /// First absolute frame index this session will render.
    pub fn start_frame(&self) -> u32 {
        self.start_frame
    }

    /// Render and write every remaining frame, then flush.
    pub fn record(&mut self, source: &mut dyn FrameSource) -> StreamResult<()> {
        for frame in self.start_frame..self.geom.frame_count {
            self.record_frame(frame, source)?;
        }
        self.finish()
    }

    fn record_frame(&mut self, frame: u32, source: &mut dyn FrameSource) -> StreamResult<()> {
        let chunk = frame / CHUNK_FRAME_COUNT;
        let within = frame % CHUNK_FRAME_COUNT;
        let parity = slot_for(chunk);
        let frame_size = self.geom.frame_size();
        let buf = self.bufs[parity]
            .as_mut()
            .ok_or_else(|| StreamError::channel(format!("chunk buffer {parity} is in flight")))?;
        let start = within as usize * frame_size;
        source.render(frame, &mut buf[start..start + frame_size])?;
        if within == CHUNK_FRAME_COUNT - 1 {
            self.flush_chunk(chunk)?;
        }
        Ok(())
    }

    fn flush_chunk(&mut self, chunk: u32) -> StreamResult<()> {
        self.complete_pending()?;
        let parity = slot_for(chunk);
        let buf = self.bufs[parity]
            .take()
            .ok_or_else(|| StreamError::channel(format!("chunk buffer {parity} is in flight")))?;
        let job = IoJob {
            dir: IoDirection::Write,
            buf,
            offset: self.geom.chunk_offset(chunk),
        };
        self.io
            .issue(job)
            .map_err(|_| StreamError::channel("write issue rejected after completion"))?;
        self.in_flight = Some(parity);
        debug!(chunk, "chunk write issued");
        Ok(())
    }

    fn complete_pending(&mut self) -> StreamResult<()> {
        if let Some(parity) = self.in_flight.take() {
            let completion = self.io.complete()?;
            self.bufs[parity] = Some(completion.buf);
        }
        Ok(())
    }

    /// Push the final pending write to disk.
    pub fn finish(&mut self) -> StreamResult<()> {
        self.complete_pending()
    }
}
