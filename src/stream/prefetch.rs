//! The resumable prefetch pipeline.
//!
//! Four ordered steps move the next chunk toward the GPU while the current one is on
//! screen: upload the staged chunk into the non-displayed slot, wait out its fence,
//! issue the read for the chunk after next, and await that read. One `advance` call
//! runs as many steps as fit before the caller's deadline and parks where it ran out;
//! the next call resumes at the parked step. Re-entry is idempotent: a parked step
//! re-polls, it never re-submits.

use tracing::debug;

use crate::foundation::error::{StreamError, StreamResult};
use crate::foundation::timing::Deadline;
use crate::gpu::FrameArrays;
use crate::io::{IoChannel, IoDirection, IoJob, IoOutcome, IssueError};
use crate::stream::double_buffer::DoubleBuffer;

/// Where the pipeline resumes. Steps run in declaration order and fall through on
/// success; `Idle` means fully caught up for this cycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PrefetchStep {
    Upload,
    FenceWait,
    IssueRead,
    AwaitRead,
    Idle,
}

/// Prefetch state for the in-flight chunk cycle.
pub struct Prefetcher<G: FrameArrays> {
    step: PrefetchStep,
    /// GPU slot the staged chunk uploads into.
    target_slot: usize,
    /// Staging half the armed read lands in (the displayed slot's half, which is free
    /// once its chunk is resident on the GPU).
    read_slot: usize,
    /// Byte offset of the lookahead chunk.
    read_offset: u64,
    /// A read the channel rejected, held for re-issue.
    parked_read: Option<IoJob>,
    fence: Option<G::Fence>,
}

impl<G: FrameArrays> Prefetcher<G> {
    pub fn new() -> Self {
        Prefetcher {
            step: PrefetchStep::Idle,
            target_slot: 0,
            read_slot: 0,
            read_offset: 0,
            parked_read: None,
            fence: None,
        }
    }

    pub fn step(&self) -> PrefetchStep {
        self.step
    }

    /// Start a new cycle after a chunk-boundary crossing. The previous cycle must have
    /// been force-completed first; the staging halves are repurposed here.
    pub fn rearm(&mut self, target_slot: usize, read_slot: usize, read_offset: u64) {
        debug_assert_eq!(self.step, PrefetchStep::Idle);
        debug_assert!(self.parked_read.is_none());
        self.step = PrefetchStep::Upload;
        self.target_slot = target_slot;
        self.read_slot = read_slot;
        self.read_offset = read_offset;
    }

    /// Advance as far as the deadline allows. Returns the step the pipeline is parked
    /// at; `Idle` means the whole cycle finished. An expired deadline still performs
    /// the non-blocking polls, so ready work is always drained.
    pub fn advance(
        &mut self,
        gpu: &mut G,
        io: &mut IoChannel,
        staging: &mut DoubleBuffer,
        deadline: Deadline,
    ) -> StreamResult<PrefetchStep> {
        loop {
            match self.step {
                PrefetchStep::Upload => {
                    gpu.upload(self.target_slot, staging.half(self.target_slot)?)?;
                    self.fence = Some(gpu.fence_insert());
                    self.step = PrefetchStep::FenceWait;
                }
                PrefetchStep::FenceWait => {
                    let signaled = match self.fence.as_ref() {
                        Some(fence) => gpu.fence_try_wait(fence, deadline),
                        None => true,
                    };
                    if !signaled {
                        return Ok(PrefetchStep::FenceWait);
                    }
                    self.fence = None;
                    self.step = PrefetchStep::IssueRead;
                }
                PrefetchStep::IssueRead => {
                    let job = match self.parked_read.take() {
                        Some(job) => job,
                        None => IoJob {
                            dir: IoDirection::Read,
                            buf: staging.take_half(self.read_slot)?,
                            offset: self.read_offset,
                        },
                    };
                    match io.issue(job) {
                        Ok(()) => self.step = PrefetchStep::AwaitRead,
                        Err(IssueError::Busy(job)) => {
                            self.parked_read = Some(job);
                            return Ok(PrefetchStep::IssueRead);
                        }
                        Err(IssueError::Closed(_)) => {
                            return Err(StreamError::channel("i/o worker disconnected"));
                        }
                    }
                }
                PrefetchStep::AwaitRead => match io.try_complete(deadline)? {
                    Some(completion) => {
                        if completion.outcome == IoOutcome::Faulted {
                            debug!(
                                offset = self.read_offset,
                                "prefetched chunk carries fault sentinel"
                            );
                        }
                        staging.put_half(self.read_slot, completion.buf);
                        self.step = PrefetchStep::Idle;
                    }
                    None => return Ok(PrefetchStep::AwaitRead),
                },
                PrefetchStep::Idle => return Ok(PrefetchStep::Idle),
            }
        }
    }

    /// Run the cycle to completion with an unbounded deadline. Called before the
    /// staging halves are repurposed (boundary crossings, shutdown); an in-flight read
    /// is never abandoned.
    pub fn force_complete(
        &mut self,
        gpu: &mut G,
        io: &mut IoChannel,
        staging: &mut DoubleBuffer,
    ) -> StreamResult<()> {
        match self.advance(gpu, io, staging, Deadline::NEVER)? {
            PrefetchStep::Idle => Ok(()),
            state => Err(StreamError::channel(format!(
                "prefetch cannot force-complete, parked at {state:?}"
            ))),
        }
    }
}

impl<G: FrameArrays> Default for Prefetcher<G> {
    fn default() -> Self {
        Self::new()
    }
}
