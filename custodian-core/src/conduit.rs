/*!
Bounded, blocking in-memory byte conduit connecting one producer to one
consumer.

The writer blocks while the buffer is full and the reader blocks while it is
empty, so memory use stays at `capacity` no matter how large the payload is.
The writer always signals end-of-stream: explicitly through [`PipeWriter::close`]
or [`PipeWriter::fail`], or implicitly when it is dropped, in which case the
reader sees a failure instead of a clean end. Dropping the reader makes
further writes fail, so neither side can be left waiting on a peer that has
gone away.
*/

use std::io::{self, Read, Write};
use std::sync::Arc;
use std::time::Duration;

use bytes::{Buf, BytesMut};
use parking_lot::{Condvar, Mutex};

use crate::{Context, CustodianError};

/// Default conduit bound in bytes.
pub const DEFAULT_CAPACITY: usize = 256 * 1024;

/// How often blocked readers and writers re-check their context.
const POLL_INTERVAL: Duration = Duration::from_millis(20);

struct State {
    buffer: BytesMut,
    closed: bool,
    failure: Option<CustodianError>,
    failure_reported: bool,
    reader_dropped: bool,
}

struct Shared {
    state: Mutex<State>,
    readable: Condvar,
    writable: Condvar,
    capacity: usize,
    ctx: Context,
}

/// Create a conduit holding at most `capacity` bytes in flight.
pub fn pipe(capacity: usize, ctx: &Context) -> (PipeWriter, PipeReader) {
    let capacity = capacity.max(1);
    let shared = Arc::new(Shared {
        state: Mutex::new(State {
            buffer: BytesMut::with_capacity(capacity),
            closed: false,
            failure: None,
            failure_reported: false,
            reader_dropped: false,
        }),
        readable: Condvar::new(),
        writable: Condvar::new(),
        capacity,
        ctx: ctx.clone(),
    });
    (
        PipeWriter {
            shared: Arc::clone(&shared),
            finished: false,
        },
        PipeReader { shared },
    )
}

/// Producer end of a conduit.
pub struct PipeWriter {
    shared: Arc<Shared>,
    finished: bool,
}

impl PipeWriter {
    /// Signal a clean end-of-stream.
    pub fn close(mut self) {
        self.finish(None);
    }

    /// Signal that production failed; the reader receives `error` once it has
    /// drained the bytes written before the failure.
    pub fn fail(mut self, error: CustodianError) {
        self.finish(Some(error));
    }

    fn finish(&mut self, error: Option<CustodianError>) {
        if self.finished {
            return;
        }
        self.finished = true;
        let mut state = self.shared.state.lock();
        state.closed = true;
        state.failure = error;
        self.shared.readable.notify_all();
    }
}

impl Write for PipeWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let shared = &self.shared;
        let mut state = shared.state.lock();
        loop {
            if shared.ctx.is_cancelled() {
                return Err(CustodianError::Cancelled.into_stream_io());
            }
            if state.reader_dropped {
                return Err(io::Error::new(
                    io::ErrorKind::BrokenPipe,
                    "conduit reader was dropped",
                ));
            }
            let free = shared.capacity.saturating_sub(state.buffer.len());
            if free > 0 {
                let n = free.min(buf.len());
                state.buffer.extend_from_slice(&buf[..n]);
                shared.readable.notify_one();
                return Ok(n);
            }
            shared.writable.wait_for(&mut state, POLL_INTERVAL);
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for PipeWriter {
    fn drop(&mut self) {
        if !self.finished {
            self.finish(Some(CustodianError::backend(
                "producer stopped before closing the stream",
            )));
        }
    }
}

/// Consumer end of a conduit.
pub struct PipeReader {
    shared: Arc<Shared>,
}

impl Read for PipeReader {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        if out.is_empty() {
            return Ok(0);
        }
        let shared = &self.shared;
        let mut state = shared.state.lock();
        loop {
            if shared.ctx.is_cancelled() {
                return Err(CustodianError::Cancelled.into_stream_io());
            }
            if !state.buffer.is_empty() {
                let n = out.len().min(state.buffer.len());
                out[..n].copy_from_slice(&state.buffer[..n]);
                state.buffer.advance(n);
                shared.writable.notify_one();
                return Ok(n);
            }
            if let Some(error) = state.failure.take() {
                state.failure_reported = true;
                return Err(error.into_stream_io());
            }
            if state.failure_reported {
                return Err(io::Error::new(io::ErrorKind::Other, "conduit producer failed"));
            }
            if state.closed {
                return Ok(0);
            }
            shared.readable.wait_for(&mut state, POLL_INTERVAL);
        }
    }
}

impl Drop for PipeReader {
    fn drop(&mut self) {
        let mut state = self.shared.state.lock();
        state.reader_dropped = true;
        self.shared.writable.notify_all();
    }
}
