//! Byte-stream access to the most recent capture, one reader at a time.
//!
//! A reader takes a snapshot of the capture when it opens, so a capture taken while it
//! is still draining can never tear what it reads.

use std::{
    io,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
};

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::{
    capture::{Capture, CaptureSlot, Sampler},
    critical::CriticalSection,
    registers::RegisterWindow,
    Error, Result, WORD_SIZE,
};

/// Hands out read handles on the capture held in a [`CaptureSlot`]
#[derive(Debug)]
pub struct CaptureExport {
    slot: Arc<CaptureSlot>,
    open: AtomicBool,
}

/// Proof that we hold the single reader slot, given back on drop
#[derive(Debug)]
struct Reservation<'a> {
    open: &'a AtomicBool,
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        self.open.store(false, Ordering::Release);
    }
}

impl<'a> Reservation<'a> {
    fn into_handle(self, capture: Arc<Capture>) -> ReadHandle<'a> {
        let trailer = capture.wire_elapsed().to_ne_bytes();
        ReadHandle {
            _reservation: self,
            capture,
            trailer,
            cursor: 0,
        }
    }
}

impl CaptureExport {
    pub fn new(slot: Arc<CaptureSlot>) -> Self {
        Self {
            slot,
            open: AtomicBool::new(false),
        }
    }

    fn reserve(&self) -> Result<Reservation<'_>> {
        self.open
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .map_err(|_| {
                debug!("Rejected open, a reader is already active");
                Error::Busy
            })?;
        Ok(Reservation { open: &self.open })
    }

    /// Open the current capture for reading.
    ///
    /// Fails with [`Error::Busy`] while another handle is open and with
    /// [`Error::NoCapture`] if nothing has been captured yet.
    pub fn open_for_read(&self) -> Result<ReadHandle<'_>> {
        let reservation = self.reserve()?;
        let capture = self.slot.current().ok_or(Error::NoCapture)?;
        Ok(reservation.into_handle(capture))
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }
}

/// A cursor over the wire bytes of one capture. Dropping it closes it.
#[derive(Debug)]
pub struct ReadHandle<'a> {
    _reservation: Reservation<'a>,
    capture: Arc<Capture>,
    trailer: [u8; WORD_SIZE],
    cursor: usize,
}

impl ReadHandle<'_> {
    /// Total length of the stream
    pub fn len(&self) -> usize {
        self.capture.sample_bytes().len() + self.trailer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn remaining(&self) -> usize {
        self.len() - self.cursor
    }

    /// The capture this handle is reading
    pub fn capture(&self) -> &Arc<Capture> {
        &self.capture
    }

    /// Copy up to `buf.len()` bytes from the cursor on, returning how many were copied.
    /// Zero means the whole capture has been read.
    pub fn read(&mut self, buf: &mut [u8]) -> usize {
        let body = self.capture.sample_bytes();
        let total = body.len() + self.trailer.len();
        let mut copied = 0;
        while copied < buf.len() && self.cursor < total {
            let (src, at) = if self.cursor < body.len() {
                (body, self.cursor)
            } else {
                (&self.trailer[..], self.cursor - body.len())
            };
            let n = (src.len() - at).min(buf.len() - copied);
            buf[copied..copied + n].copy_from_slice(&src[at..at + n]);
            copied += n;
            self.cursor += n;
        }
        copied
    }

    /// Captures are read-only
    pub fn write(&mut self, _data: &[u8]) -> Result<usize> {
        warn!("Write to the capture stream rejected");
        Err(Error::Unsupported)
    }

    /// Release the reader slot
    pub fn close(self) {}
}

impl io::Read for ReadHandle<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Ok(ReadHandle::read(self, buf))
    }
}

/// The sampler and the export behind one device: every open takes a fresh capture and
/// returns a handle on it, like opening the scope's character device.
pub struct ScopeDevice<W, S> {
    sampler: Mutex<Sampler<W, S>>,
    export: CaptureExport,
    opens: AtomicUsize,
}

impl<W, S> ScopeDevice<W, S>
where
    W: RegisterWindow,
    S: CriticalSection,
{
    pub fn new(sampler: Sampler<W, S>) -> Self {
        let export = CaptureExport::new(sampler.slot().clone());
        Self {
            sampler: Mutex::new(sampler),
            export,
            opens: AtomicUsize::new(0),
        }
    }

    /// Capture and open the result for reading. Busy while another handle is open.
    pub fn open(&self) -> Result<ReadHandle<'_>> {
        let reservation = self.export.reserve()?;
        let opens = self.opens.fetch_add(1, Ordering::Relaxed) + 1;
        debug!(opens, "Device opened");
        let capture = self.sampler.lock().capture()?;
        Ok(reservation.into_handle(capture))
    }

    pub fn export(&self) -> &CaptureExport {
        &self.export
    }
}
