//! GPU-side collaborator interface: two frame-array slots, upload, fences, present.
//!
//! The streaming core only needs this narrow seam; window creation, shader wiring and
//! texture allocation policy stay with the embedder. [`HostFrames`] is the
//! always-available in-memory implementation (tests, headless playback); a `wgpu`
//! implementation is provided behind the `gpu` feature.

use std::time::{Duration, Instant};

use crate::foundation::error::{StreamError, StreamResult};
use crate::foundation::timing::Deadline;
use crate::store::{CHUNK_FRAME_COUNT, Geometry};
use crate::stream::double_buffer::SLOT_COUNT;

#[cfg(feature = "gpu")]
pub mod wgpu_frames;

/// Two GPU-resident frame arrays ("slots") plus the fence primitive guarding them.
///
/// `upload` is synchronous from the caller's perspective once the fence inserted after
/// it has signaled; a slot must not be uploaded into while it is being sampled for the
/// frame on screen, which the prefetch pipeline guarantees by construction.
pub trait FrameArrays {
    /// Opaque fence handle; dropped when no longer waited on.
    type Fence;

    /// Replace the contents of `slot` with one chunk's frames.
    fn upload(&mut self, slot: usize, frames: &[u8]) -> StreamResult<()>;

    /// Insert a fence after all previously submitted work.
    fn fence_insert(&mut self) -> Self::Fence;

    /// Wait for the fence up to `deadline`; true iff it signaled in time.
    /// `Deadline::NEVER` blocks until signaled.
    fn fence_try_wait(&mut self, fence: &Self::Fence, deadline: Deadline) -> bool;

    fn fence_block(&mut self, fence: &Self::Fence) {
        let _ = self.fence_try_wait(fence, Deadline::NEVER);
    }

    /// Show `frame_within_chunk` of `slot`.
    fn present(&mut self, slot: usize, frame_within_chunk: u32) -> StreamResult<()>;
}

/// One presented frame, as recorded by [`HostFrames`] when journaling is on.
#[derive(Clone, Debug)]
pub struct PresentedFrame {
    pub slot: usize,
    pub frame_within_chunk: u32,
    pub pixels: Vec<u8>,
}

/// In-memory reference implementation of [`FrameArrays`].
///
/// Fences signal after a configurable latency (zero by default). With journaling
/// enabled, every presented frame's pixels are kept for later inspection.
pub struct HostFrames {
    geom: Geometry,
    slots: [Vec<u8>; SLOT_COUNT],
    fence_latency: Duration,
    journal: bool,
    uploads: u64,
    presented: Vec<PresentedFrame>,
}

pub struct HostFence {
    ready_at: Instant,
}

impl HostFrames {
    pub fn new(geom: Geometry) -> Self {
        let chunk_size = geom.chunk_size();
        HostFrames {
            geom,
            slots: [vec![0u8; chunk_size], vec![0u8; chunk_size]],
            fence_latency: Duration::ZERO,
            journal: false,
            uploads: 0,
            presented: Vec::new(),
        }
    }

    pub fn with_fence_latency(mut self, latency: Duration) -> Self {
        self.fence_latency = latency;
        self
    }

    pub fn with_journal(mut self) -> Self {
        self.journal = true;
        self
    }

    /// Number of uploads performed so far.
    pub fn upload_count(&self) -> u64 {
        self.uploads
    }

    pub fn presented(&self) -> &[PresentedFrame] {
        &self.presented
    }

    /// Raw bytes of one frame currently resident in `slot`.
    pub fn frame_bytes(&self, slot: usize, frame_within_chunk: u32) -> &[u8] {
        let size = self.geom.frame_size();
        let start = frame_within_chunk as usize * size;
        &self.slots[slot][start..start + size]
    }

    /// Full contents of one slot.
    pub fn slot_bytes(&self, slot: usize) -> &[u8] {
        &self.slots[slot]
    }
}

impl FrameArrays for HostFrames {
    type Fence = HostFence;

    fn upload(&mut self, slot: usize, frames: &[u8]) -> StreamResult<()> {
        if slot >= SLOT_COUNT {
            return Err(StreamError::gpu(format!("slot {slot} out of range")));
        }
        if frames.len() != self.geom.chunk_size() {
            return Err(StreamError::gpu(format!(
                "upload of {} bytes into a {}-byte slot",
                frames.len(),
                self.geom.chunk_size()
            )));
        }
        self.slots[slot].copy_from_slice(frames);
        self.uploads += 1;
        Ok(())
    }

    fn fence_insert(&mut self) -> HostFence {
        HostFence {
            ready_at: Instant::now() + self.fence_latency,
        }
    }

    fn fence_try_wait(&mut self, fence: &HostFence, deadline: Deadline) -> bool {
        let now = Instant::now();
        if fence.ready_at <= now {
            return true;
        }
        match deadline.remaining() {
            None => {
                std::thread::sleep(fence.ready_at - now);
                true
            }
            Some(budget) => {
                let wait = (fence.ready_at - now).min(budget);
                if !wait.is_zero() {
                    std::thread::sleep(wait);
                }
                Instant::now() >= fence.ready_at
            }
        }
    }

    fn present(&mut self, slot: usize, frame_within_chunk: u32) -> StreamResult<()> {
        if slot >= SLOT_COUNT || frame_within_chunk >= CHUNK_FRAME_COUNT {
            return Err(StreamError::gpu(format!(
                "present of slot {slot} frame {frame_within_chunk} out of range"
            )));
        }
        if self.journal {
            self.presented.push(PresentedFrame {
                slot,
                frame_within_chunk,
                pixels: self.frame_bytes(slot, frame_within_chunk).to_vec(),
            });
        }
        Ok(())
    }
}
