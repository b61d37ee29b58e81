//! Single-outstanding-request async I/O channel.
//!
//! One worker thread owns the storage handle and performs the blocking transfers; the
//! render thread talks to it through a pair of capacity-1 channels. A request moves its
//! buffer into the channel on issue and gets it back inside the completion, so exclusive
//! access during the transfer is enforced by ownership rather than by convention.
//!
//! Exactly one request may be in flight. A second issue while one is outstanding is a
//! caller error and is rejected, never queued.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender, TrySendError};
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::{debug, warn};

use crate::foundation::error::{StreamError, StreamResult};
use crate::foundation::timing::Deadline;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IoDirection {
    Read,
    Write,
}

/// A whole-chunk (or whole-header) transfer request. The buffer length is the transfer
/// size; `offset` is the absolute byte position in the store.
#[derive(Debug)]
pub struct IoJob {
    pub dir: IoDirection,
    pub buf: Vec<u8>,
    pub offset: u64,
}

/// How the worker completed a job.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IoOutcome {
    Done,
    /// The transfer could not be completed; for reads the buffer carries the sentinel
    /// pattern instead of stale data. The worker has already logged the fault.
    Faulted,
}

/// A finished job, returning buffer ownership to the issuer.
#[derive(Debug)]
pub struct IoCompletion {
    pub buf: Vec<u8>,
    pub outcome: IoOutcome,
}

/// Degraded-path strategy for short transfers and read errors.
///
/// `BlockingRetry` finishes the remainder synchronously on the worker before reporting
/// success. `SentinelFill` gives up immediately and floods the destination with a
/// recognizable byte so on-screen corruption is attributable to storage, not to a stale
/// buffer. Writes always use the retry strategy; there is no destination to flood.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FaultPolicy {
    BlockingRetry,
    SentinelFill(u8),
}

impl Default for FaultPolicy {
    fn default() -> Self {
        FaultPolicy::BlockingRetry
    }
}

/// Why an issue was rejected. The job (and its buffer) is handed back to the caller.
#[derive(Debug)]
pub enum IssueError {
    /// A request is already outstanding; retry after completing it.
    Busy(IoJob),
    /// The worker is gone; the channel is unusable.
    Closed(IoJob),
}

/// Positioned transfers the worker performs. Partial transfers are allowed; the worker
/// applies the fault policy on top.
pub trait IoBackend: Send + 'static {
    fn read_at(&mut self, buf: &mut [u8], offset: u64) -> std::io::Result<usize>;
    fn write_at(&mut self, buf: &[u8], offset: u64) -> std::io::Result<usize>;
}

/// Production backend: seek-and-transfer against the store file.
pub struct FileBackend {
    file: File,
}

impl FileBackend {
    pub fn new(file: File) -> Self {
        FileBackend { file }
    }
}

impl IoBackend for FileBackend {
    fn read_at(&mut self, buf: &mut [u8], offset: u64) -> std::io::Result<usize> {
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.read(buf)
    }

    fn write_at(&mut self, buf: &[u8], offset: u64) -> std::io::Result<usize> {
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write(buf)
    }
}

/// In-memory backend. Reads past the end come up short, like a truncated file.
#[derive(Default)]
pub struct MemBackend {
    pub data: Vec<u8>,
}

impl MemBackend {
    pub fn new(data: Vec<u8>) -> Self {
        MemBackend { data }
    }
}

impl IoBackend for MemBackend {
    fn read_at(&mut self, buf: &mut [u8], offset: u64) -> std::io::Result<usize> {
        let start = (offset as usize).min(self.data.len());
        let n = buf.len().min(self.data.len() - start);
        buf[..n].copy_from_slice(&self.data[start..start + n]);
        Ok(n)
    }

    fn write_at(&mut self, buf: &[u8], offset: u64) -> std::io::Result<usize> {
        let end = offset as usize + buf.len();
        if self.data.len() < end {
            self.data.resize(end, 0);
        }
        self.data[offset as usize..end].copy_from_slice(buf);
        Ok(buf.len())
    }
}

/// Wraps a backend with a fixed per-request latency, for exercising deadline paths.
pub struct SlowBackend<B> {
    pub inner: B,
    pub latency: Duration,
}

impl<B: IoBackend> IoBackend for SlowBackend<B> {
    fn read_at(&mut self, buf: &mut [u8], offset: u64) -> std::io::Result<usize> {
        std::thread::sleep(self.latency);
        self.inner.read_at(buf, offset)
    }

    fn write_at(&mut self, buf: &[u8], offset: u64) -> std::io::Result<usize> {
        std::thread::sleep(self.latency);
        self.inner.write_at(buf, offset)
    }
}

/// Handle to the I/O worker. Dropping it drains any outstanding request and joins the
/// worker, so a buffer is never abandoned mid-transfer.
pub struct IoChannel {
    jobs: Option<SyncSender<IoJob>>,
    done: Receiver<IoCompletion>,
    outstanding: bool,
    worker: Option<JoinHandle<()>>,
}

impl IoChannel {
    pub fn spawn<B: IoBackend>(mut backend: B, policy: FaultPolicy) -> StreamResult<Self> {
        let (jobs_tx, jobs_rx) = mpsc::sync_channel::<IoJob>(1);
        let (done_tx, done_rx) = mpsc::sync_channel::<IoCompletion>(1);
        let worker = std::thread::Builder::new()
            .name("volstream-io".into())
            .spawn(move || {
                while let Ok(mut job) = jobs_rx.recv() {
                    let outcome = execute_job(&mut backend, &mut job, policy);
                    let sent = done_tx.send(IoCompletion {
                        buf: job.buf,
                        outcome,
                    });
                    if sent.is_err() {
                        break;
                    }
                }
            })
            .map_err(|e| StreamError::channel(format!("failed to spawn i/o worker: {e}")))?;
        Ok(IoChannel {
            jobs: Some(jobs_tx),
            done: done_rx,
            outstanding: false,
            worker: Some(worker),
        })
    }

    pub fn is_busy(&self) -> bool {
        self.outstanding
    }

    /// Hand a job to the worker. Rejected (job returned) if one is already in flight.
    pub fn issue(&mut self, job: IoJob) -> Result<(), IssueError> {
        if self.outstanding {
            return Err(IssueError::Busy(job));
        }
        let Some(jobs) = self.jobs.as_ref() else {
            return Err(IssueError::Closed(job));
        };
        match jobs.try_send(job) {
            Ok(()) => {
                self.outstanding = true;
                Ok(())
            }
            Err(TrySendError::Full(job)) => Err(IssueError::Busy(job)),
            Err(TrySendError::Disconnected(job)) => Err(IssueError::Closed(job)),
        }
    }

    /// Wait for the outstanding request up to `deadline`. `Ok(None)` means the deadline
    /// passed first: the request stays outstanding and the worker keeps the buffer.
    pub fn try_complete(&mut self, deadline: Deadline) -> StreamResult<Option<IoCompletion>> {
        if !self.outstanding {
            return Err(StreamError::channel("no outstanding request to complete"));
        }
        let completion = match deadline.remaining() {
            None => self
                .done
                .recv()
                .map_err(|_| StreamError::channel("i/o worker disconnected"))?,
            Some(timeout) => match self.done.recv_timeout(timeout) {
                Ok(c) => c,
                Err(RecvTimeoutError::Timeout) => return Ok(None),
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(StreamError::channel("i/o worker disconnected"));
                }
            },
        };
        self.outstanding = false;
        Ok(Some(completion))
    }

    /// Block until the outstanding request finishes.
    pub fn complete(&mut self) -> StreamResult<IoCompletion> {
        Ok(self
            .try_complete(Deadline::NEVER)?
            .expect("unbounded wait cannot time out"))
    }

    /// Issue-and-block helper for priming loads, where steady-state pacing does not
    /// apply yet.
    pub fn transfer(&mut self, job: IoJob) -> StreamResult<IoCompletion> {
        self.issue(job).map_err(|e| match e {
            IssueError::Busy(_) => StreamError::channel("transfer requires an idle channel"),
            IssueError::Closed(_) => StreamError::channel("i/o worker disconnected"),
        })?;
        self.complete()
    }
}

impl Drop for IoChannel {
    fn drop(&mut self) {
        if self.outstanding {
            let _ = self.try_complete(Deadline::NEVER);
        }
        self.jobs.take();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

fn execute_job<B: IoBackend>(backend: &mut B, job: &mut IoJob, policy: FaultPolicy) -> IoOutcome {
    let total = job.buf.len();
    let mut done = 0usize;
    while done < total {
        let at = job.offset + done as u64;
        let step = match job.dir {
            IoDirection::Read => backend.read_at(&mut job.buf[done..], at),
            IoDirection::Write => backend.write_at(&job.buf[done..], at),
        };
        match step {
            Ok(0) => {
                return fault(
                    job,
                    policy,
                    at,
                    std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "transfer ended early"),
                );
            }
            Ok(n) => {
                done += n;
                if done < total {
                    if job.dir == IoDirection::Read
                        && matches!(policy, FaultPolicy::SentinelFill(_))
                    {
                        return fault(
                            job,
                            policy,
                            at,
                            std::io::Error::other("short read"),
                        );
                    }
                    debug!(offset = at, transferred = n, "short transfer, continuing");
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
            Err(e) => return fault(job, policy, at, e),
        }
    }
    IoOutcome::Done
}

fn fault(job: &mut IoJob, policy: FaultPolicy, offset: u64, error: std::io::Error) -> IoOutcome {
    warn!(offset, dir = ?job.dir, %error, "i/o fault");
    if job.dir == IoDirection::Read {
        let sentinel = match policy {
            FaultPolicy::SentinelFill(byte) => byte,
            // The retry strategy cannot conjure missing bytes; degrade visibly anyway.
            FaultPolicy::BlockingRetry => 0xED,
        };
        job.buf.fill(sentinel);
    }
    IoOutcome::Faulted
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Transfers at most `cap` bytes per call, to exercise the remainder loop.
    struct ChunkyBackend {
        inner: MemBackend,
        cap: usize,
    }

    impl IoBackend for ChunkyBackend {
        fn read_at(&mut self, buf: &mut [u8], offset: u64) -> std::io::Result<usize> {
            let n = buf.len().min(self.cap);
            self.inner.read_at(&mut buf[..n], offset)
        }

        fn write_at(&mut self, buf: &[u8], offset: u64) -> std::io::Result<usize> {
            let n = buf.len().min(self.cap);
            self.inner.write_at(&buf[..n], offset)
        }
    }

    #[test]
    fn write_then_read_round_trips() {
        let mut chan = IoChannel::spawn(MemBackend::default(), FaultPolicy::default()).unwrap();
        let payload: Vec<u8> = (0..64u8).collect();
        let c = chan
            .transfer(IoJob {
                dir: IoDirection::Write,
                buf: payload.clone(),
                offset: 16,
            })
            .unwrap();
        assert_eq!(c.outcome, IoOutcome::Done);

        let c = chan
            .transfer(IoJob {
                dir: IoDirection::Read,
                buf: vec![0u8; 64],
                offset: 16,
            })
            .unwrap();
        assert_eq!(c.outcome, IoOutcome::Done);
        assert_eq!(c.buf, payload);
    }

    #[test]
    fn second_issue_is_rejected_with_job_returned() {
        let backend = SlowBackend {
            inner: MemBackend::new(vec![0u8; 256]),
            latency: Duration::from_millis(50),
        };
        let mut chan = IoChannel::spawn(backend, FaultPolicy::default()).unwrap();
        chan.issue(IoJob {
            dir: IoDirection::Read,
            buf: vec![0u8; 16],
            offset: 0,
        })
        .unwrap();

        let second = IoJob {
            dir: IoDirection::Read,
            buf: vec![1u8; 16],
            offset: 16,
        };
        match chan.issue(second) {
            Err(IssueError::Busy(job)) => assert_eq!(job.buf, vec![1u8; 16]),
            other => panic!("expected busy rejection, got {other:?}"),
        }
        chan.complete().unwrap();
    }

    #[test]
    fn bounded_poll_times_out_then_request_still_completes() {
        let backend = SlowBackend {
            inner: MemBackend::new(vec![3u8; 64]),
            latency: Duration::from_millis(40),
        };
        let mut chan = IoChannel::spawn(backend, FaultPolicy::default()).unwrap();
        chan.issue(IoJob {
            dir: IoDirection::Read,
            buf: vec![0u8; 64],
            offset: 0,
        })
        .unwrap();

        let early = chan
            .try_complete(Deadline::within(Duration::from_millis(1)))
            .unwrap();
        assert!(early.is_none());
        assert!(chan.is_busy());

        let c = chan.complete().unwrap();
        assert_eq!(c.outcome, IoOutcome::Done);
        assert_eq!(c.buf, vec![3u8; 64]);
        assert!(!chan.is_busy());
    }

    #[test]
    fn blocking_retry_completes_piecewise_transfers() {
        let backend = ChunkyBackend {
            inner: MemBackend::new((0..128u8).map(|b| b ^ 0x5c).collect()),
            cap: 7,
        };
        let mut chan = IoChannel::spawn(backend, FaultPolicy::BlockingRetry).unwrap();
        let c = chan
            .transfer(IoJob {
                dir: IoDirection::Read,
                buf: vec![0u8; 128],
                offset: 0,
            })
            .unwrap();
        assert_eq!(c.outcome, IoOutcome::Done);
        assert_eq!(c.buf, (0..128u8).map(|b| b ^ 0x5c).collect::<Vec<_>>());
    }

    #[test]
    fn sentinel_fill_marks_truncated_reads() {
        let mut chan =
            IoChannel::spawn(MemBackend::new(vec![9u8; 10]), FaultPolicy::SentinelFill(0xAB))
                .unwrap();
        let c = chan
            .transfer(IoJob {
                dir: IoDirection::Read,
                buf: vec![0u8; 32],
                offset: 0,
            })
            .unwrap();
        assert_eq!(c.outcome, IoOutcome::Faulted);
        assert!(c.buf.iter().all(|&b| b == 0xAB));
    }
}
