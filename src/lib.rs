//! Deadline-driven streaming of volumetric animations between disk and GPU.
//!
//! A recorded animation is a fixed header followed by fixed-size chunks of
//! [`CHUNK_FRAME_COUNT`] frames. Playback keeps two chunks resident in GPU slots and,
//! while one is on screen, feeds the other through a four-step prefetch pipeline
//! (upload, fence wait, read issue, read await) bounded each frame by half the frame
//! period. Recording is the dual: frames render into one host chunk buffer while the
//! previous chunk's write is in flight.
//!
//! The GPU is reached only through the [`FrameArrays`] seam; [`HostFrames`] implements
//! it in memory for tests and headless use, and a `wgpu` implementation lives behind
//! the `gpu` feature.

#![forbid(unsafe_code)]

pub mod foundation;
pub mod gpu;
pub mod io;
pub mod session;
pub mod store;
pub mod stream;

pub use foundation::error::{StreamError, StreamResult};
pub use foundation::timing::{Deadline, POLL_PERIOD};
pub use gpu::{FrameArrays, HostFrames, PresentedFrame};
pub use io::{
    FaultPolicy, FileBackend, IoBackend, IoChannel, IoCompletion, IoDirection, IoJob,
    IoOutcome, IssueError, MemBackend, SlowBackend,
};
pub use session::playback::{PlaybackOpts, PlaybackSession, StepReport};
pub use session::record::{FrameSource, PatternSource, RecordSession};
pub use store::{
    CHUNK_FRAME_COUNT, Geometry, HEADER_SIZE, Header, PIXEL_SIZE, Recovery,
};
pub use stream::double_buffer::{
    DoubleBuffer, SLOT_COUNT, back_and_forth, prefetch_chunk, slot_for,
};
pub use stream::prefetch::{PrefetchStep, Prefetcher};
