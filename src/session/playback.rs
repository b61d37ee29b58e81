//! The per-frame playback driver.
//!
//! Each presented frame maps through the triangular traversal to a logical frame,
//! chunk and slot. Half of the frame period is the deadline for prefetch work; the
//! other half is left for draw and present. A chunk-boundary crossing force-completes
//! the in-flight cycle (the one documented stall) and re-arms it for the lookahead
//! chunk; every other frame advances the pipeline by one bounded call.

use std::time::{Duration, Instant};

use tracing::{debug, trace};

use crate::foundation::error::StreamResult;
use crate::foundation::timing::Deadline;
use crate::gpu::FrameArrays;
use crate::io::{FaultPolicy, IoBackend, IoChannel, IoDirection, IoJob};
use crate::store::{CHUNK_FRAME_COUNT, Geometry, Header};
use crate::stream::double_buffer::{
    DoubleBuffer, SLOT_COUNT, back_and_forth, prefetch_chunk, slot_for,
};
use crate::stream::prefetch::Prefetcher;

#[derive(Clone, Copy, Debug, Default)]
pub struct PlaybackOpts {
    pub fault_policy: FaultPolicy,
}

/// What one driver step did, for pacing, journaling and tests.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StepReport {
    pub presented_frame: u64,
    pub logical_frame: u32,
    pub chunk: u32,
    pub slot: usize,
    pub frame_within_chunk: u32,
    pub crossed: bool,
}

/// A primed, steppable playback stream.
pub struct PlaybackSession<G: FrameArrays> {
    geom: Geometry,
    ms_per_frame: u32,
    io: IoChannel,
    gpu: G,
    staging: DoubleBuffer,
    prefetch: Prefetcher<G>,
    prev_chunk: u32,
    presented: u64,
}

impl<G: FrameArrays> PlaybackSession<G> {
    /// Validate the header, spawn the I/O worker and perform the priming loads:
    /// chunks 0 and 1 resident in their slots, the third chunk of the traversal
    /// pre-staged in half 0. Priming blocks; steady-state pacing starts afterwards.
    pub fn new<B: IoBackend>(
        backend: B,
        header: Header,
        gpu: G,
        opts: PlaybackOpts,
    ) -> StreamResult<Self> {
        header.validate()?;
        let geom = Geometry::of(&header);
        let io = IoChannel::spawn(backend, opts.fault_policy)?;
        let staging = DoubleBuffer::new(geom.chunk_size());
        let mut session = PlaybackSession {
            geom,
            ms_per_frame: header.ms_per_frame,
            io,
            gpu,
            staging,
            prefetch: Prefetcher::new(),
            prev_chunk: 0,
            presented: 0,
        };
        session.prime()?;
        Ok(session)
    }

    fn prime(&mut self) -> StreamResult<()> {
        for slot in 0..SLOT_COUNT {
            let buf = self.staging.take_half(slot)?;
            let completion = self.io.transfer(IoJob {
                dir: IoDirection::Read,
                buf,
                offset: self.geom.chunk_offset(slot as u32),
            })?;
            self.gpu.upload(slot, &completion.buf)?;
            self.staging.put_half(slot, completion.buf);
        }
        let fence = self.gpu.fence_insert();
        self.gpu.fence_block(&fence);

        // Pre-stage the chunk the first crossing will upload (wraps to 0 when only two
        // chunks exist), as if a prefetch cycle had already delivered it.
        let staged = 2 % self.geom.chunk_count();
        let buf = self.staging.take_half(0)?;
        let completion = self.io.transfer(IoJob {
            dir: IoDirection::Read,
            buf,
            offset: self.geom.chunk_offset(staged),
        })?;
        self.staging.put_half(0, completion.buf);
        debug!(staged, "playback primed");
        Ok(())
    }

    pub fn frame_period(&self) -> Duration {
        Duration::from_millis(self.ms_per_frame as u64)
    }

    pub fn gpu(&self) -> &G {
        &self.gpu
    }

    pub fn gpu_mut(&mut self) -> &mut G {
        &mut self.gpu
    }

    /// Present one frame. `frame_start` is the frame's scheduled start; prefetch work
    /// may run until half the frame period past it.
    pub fn step(&mut self, frame_start: Instant) -> StreamResult<StepReport> {
        let logical_frame = back_and_forth(self.presented, self.geom.frame_count - 1);
        let chunk = logical_frame / CHUNK_FRAME_COUNT;
        let slot = slot_for(chunk);
        let frame_within_chunk = logical_frame % CHUNK_FRAME_COUNT;
        let crossed = chunk != self.prev_chunk;

        if crossed {
            self.prefetch
                .force_complete(&mut self.gpu, &mut self.io, &mut self.staging)?;
            let lookahead = prefetch_chunk(self.presented, self.geom.frame_count);
            self.prefetch
                .rearm(slot ^ 1, slot, self.geom.chunk_offset(lookahead));
            self.prev_chunk = chunk;
            debug!(chunk, lookahead, "chunk boundary crossing");
        } else {
            let deadline = Deadline::at(frame_start + self.frame_period() / 2);
            let state = self
                .prefetch
                .advance(&mut self.gpu, &mut self.io, &mut self.staging, deadline)?;
            trace!(?state, "prefetch advanced");
        }

        self.gpu.present(slot, frame_within_chunk)?;
        let report = StepReport {
            presented_frame: self.presented,
            logical_frame,
            chunk,
            slot,
            frame_within_chunk,
            crossed,
        };
        self.presented += 1;
        Ok(report)
    }

    /// Paced playback loop: one step per frame period, sleeping out the remainder of
    /// each period. Runs until `keep_going` declines a report.
    pub fn run(&mut self, mut keep_going: impl FnMut(&StepReport) -> bool) -> StreamResult<()> {
        let start = Instant::now();
        let period_ms = self.ms_per_frame as u64;
        let schedule = move |i: u64| start + Duration::from_millis(period_ms * i);
        loop {
            let report = self.step(schedule(self.presented))?;
            if !keep_going(&report) {
                break;
            }
            let next = schedule(self.presented);
            let now = Instant::now();
            if next > now {
                std::thread::sleep(next - now);
            }
        }
        self.drain()
    }

    fn drain(&mut self) -> StreamResult<()> {
        self.prefetch
            .force_complete(&mut self.gpu, &mut self.io, &mut self.staging)
    }

    /// Finish the in-flight cycle and release the stream.
    pub fn close(mut self) -> StreamResult<G> {
        self.drain()?;
        Ok(self.gpu)
    }
}
