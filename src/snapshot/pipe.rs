//! Bounded in-process byte pipe carrying formatted snapshot output.
//!
//! Stands in for the platform pipe/FIFO with the same observable semantics:
//! partial writes, would-block on a full buffer, and hangup visible from
//! both ends. The writer can register a wakeup that fires (via the event
//! queue) whenever the reader frees space or goes away, which is how the
//! formatter resumes after backpressure.

use std::cell::RefCell;
use std::rc::Rc;

struct PipeShared {
    buf: Vec<u8>,
    capacity: usize,
    reader_open: bool,
    writer_open: bool,
    wants_writable: bool,
    waker: Option<Rc<dyn Fn()>>,
}

impl PipeShared {
    fn take_waker_if_wanted(&self) -> Option<Rc<dyn Fn()>> {
        if self.wants_writable {
            self.waker.clone()
        } else {
            None
        }
    }
}

/// Creates a connected writer/reader pair with the given byte capacity.
pub(crate) fn pipe(capacity: usize) -> (PipeWriter, SnapshotReader) {
    let shared = Rc::new(RefCell::new(PipeShared {
        buf: Vec::new(),
        capacity: capacity.max(1),
        reader_open: true,
        writer_open: true,
        wants_writable: false,
        waker: None,
    }));
    (
        PipeWriter {
            shared: shared.clone(),
        },
        SnapshotReader { shared },
    )
}

/// Outcome of a non-blocking pipe write.
pub(crate) enum WriteOutcome {
    /// Accepted this many bytes (possibly fewer than offered).
    Wrote(usize),
    /// The pipe is full; wait for a writable wakeup.
    WouldBlock,
    /// The reader went away.
    Closed,
}

/// Write end of the snapshot pipe, held by the formatter.
#[derive(Clone)]
pub(crate) struct PipeWriter {
    shared: Rc<RefCell<PipeShared>>,
}

impl PipeWriter {
    pub(crate) fn write(&self, data: &[u8]) -> WriteOutcome {
        let mut shared = self.shared.borrow_mut();
        if !shared.reader_open {
            return WriteOutcome::Closed;
        }
        let free = shared.capacity - shared.buf.len();
        if free == 0 {
            return WriteOutcome::WouldBlock;
        }
        let n = free.min(data.len());
        shared.buf.extend_from_slice(&data[..n]);
        WriteOutcome::Wrote(n)
    }

    /// Installs the wakeup invoked when the reader frees space.
    pub(crate) fn set_waker(&self, waker: Rc<dyn Fn()>) {
        self.shared.borrow_mut().waker = Some(waker);
    }

    /// Arms writable wakeups.
    pub(crate) fn enable_writable(&self) {
        self.shared.borrow_mut().wants_writable = true;
    }

    /// Disarms writable wakeups once the formatter's buffer is drained.
    pub(crate) fn disable_writable(&self) {
        self.shared.borrow_mut().wants_writable = false;
    }

    /// Closes the write end; the reader sees end-of-stream after draining.
    pub(crate) fn close(&self) {
        let mut shared = self.shared.borrow_mut();
        shared.writer_open = false;
        shared.wants_writable = false;
        shared.waker = None;
    }
}

/// Outcome of a non-blocking snapshot stream read.
#[derive(Debug, PartialEq, Eq)]
pub enum ReadOutcome {
    /// This many bytes were read into the buffer.
    Data(usize),
    /// Nothing available yet; run the hub event loop and retry.
    WouldBlock,
    /// The stream is complete.
    Eof,
}

/// Read end of the snapshot pipe, handed to the snapshot requester.
pub struct SnapshotReader {
    shared: Rc<RefCell<PipeShared>>,
}

impl SnapshotReader {
    /// Reads available bytes without blocking.
    pub fn read(&mut self, out: &mut [u8]) -> ReadOutcome {
        let waker;
        let outcome;
        {
            let mut shared = self.shared.borrow_mut();
            if shared.buf.is_empty() {
                return if shared.writer_open {
                    ReadOutcome::WouldBlock
                } else {
                    ReadOutcome::Eof
                };
            }
            let n = shared.buf.len().min(out.len());
            out[..n].copy_from_slice(&shared.buf[..n]);
            shared.buf.drain(..n);
            waker = shared.take_waker_if_wanted();
            outcome = ReadOutcome::Data(n);
        }
        // Space was freed; let the writer make progress.
        if let Some(waker) = waker {
            waker();
        }
        outcome
    }
}

impl Drop for SnapshotReader {
    fn drop(&mut self) {
        let waker = {
            let mut shared = self.shared.borrow_mut();
            shared.reader_open = false;
            shared.take_waker_if_wanted()
        };
        // Let a waiting writer observe the hangup.
        if let Some(waker) = waker {
            waker();
        }
    }
}
