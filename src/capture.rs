//! This module contains all the capture logic

// The sampler does one thing, as fast as possible: read the GPIO level register
// SAMPLE_COUNT times in a row without being preempted. The raw words are kept as-is,
// decoding happens on the consuming side.

use std::{mem, sync::Arc, time::Instant};

use byte_slice_cast::AsByteSlice;
use crossbeam_channel::Receiver;
use parking_lot::Mutex;
use tracing::{debug, error, warn};

use crate::{
    critical::CriticalSection,
    monitoring::CaptureStats,
    registers::{RegisterWindow, GPLEV0},
    Error, Result, CAPTURE_BYTES, SAMPLE_COUNT,
};

pub type Samples = [u32; SAMPLE_COUNT];

fn zeroed_samples() -> Box<Samples> {
    Box::new([0u32; SAMPLE_COUNT])
}

/// One complete, immutable capture
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Capture {
    samples: Box<Samples>,
    elapsed_ns: u64,
}

impl Capture {
    pub fn new(samples: Box<Samples>, elapsed_ns: u64) -> Self {
        Self {
            samples,
            elapsed_ns,
        }
    }

    pub fn samples(&self) -> &Samples {
        &self.samples
    }

    /// Time spent taking all the samples, at full width
    pub fn elapsed_ns(&self) -> u64 {
        self.elapsed_ns
    }

    /// The elapsed time as it goes on the wire, truncated to 32 bits
    pub fn wire_elapsed(&self) -> u32 {
        self.elapsed_ns as u32
    }

    /// Whether the wire format loses bits of the elapsed time (captures longer than ~4.29 s)
    pub fn elapsed_truncated(&self) -> bool {
        self.elapsed_ns > u32::MAX as u64
    }

    /// The raw sample words in native byte order
    pub fn sample_bytes(&self) -> &[u8] {
        self.samples[..].as_byte_slice()
    }

    /// Serialize into the wire format: the sample words followed by the elapsed time
    pub fn to_wire(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(CAPTURE_BYTES);
        bytes.extend_from_slice(self.sample_bytes());
        bytes.extend_from_slice(&self.wire_elapsed().to_ne_bytes());
        bytes
    }
}

/// Holds at most one live capture, the most recent one
#[derive(Debug, Default)]
pub struct CaptureSlot {
    current: Mutex<Option<Arc<Capture>>>,
}

impl CaptureSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the current capture, handing back the one it replaced
    pub fn publish(&self, capture: Arc<Capture>) -> Option<Arc<Capture>> {
        self.current.lock().replace(capture)
    }

    pub fn current(&self) -> Option<Arc<Capture>> {
        self.current.lock().clone()
    }
}

/// Owns the sample buffer and produces captures into a [`CaptureSlot`]
pub struct Sampler<W, S> {
    gpio: W,
    section: S,
    buffer: Box<Samples>,
    // A buffer reclaimed from a capture nobody holds anymore
    spare: Option<Box<Samples>>,
    slot: Arc<CaptureSlot>,
    // Set once the critical section failed to balance, never cleared
    faulted: bool,
}

impl<W, S> Sampler<W, S>
where
    W: RegisterWindow,
    S: CriticalSection,
{
    pub fn new(gpio: W, section: S, slot: Arc<CaptureSlot>) -> Self {
        Self {
            gpio,
            section,
            buffer: zeroed_samples(),
            spare: None,
            slot,
            faulted: false,
        }
    }

    pub fn slot(&self) -> &Arc<CaptureSlot> {
        &self.slot
    }

    /// Whether a critical section fault has ended this sampler's session
    pub fn is_faulted(&self) -> bool {
        self.faulted
    }

    /// Take exactly [`SAMPLE_COUNT`] samples and publish them as the new capture.
    ///
    /// An error means the critical section could not be balanced. Nothing is published,
    /// and every later call fails the same way without touching the hardware.
    pub fn capture(&mut self) -> Result<Arc<Capture>> {
        if self.faulted {
            return Err(Error::CriticalSection(
                "sampler halted after an earlier fault".to_owned(),
            ));
        }
        let gpio = &self.gpio;
        let buffer = &mut self.buffer;
        let timed = self.section.run(|| {
            let start = Instant::now();
            for sample in buffer.iter_mut() {
                *sample = gpio.read(GPLEV0);
            }
            (start, Instant::now())
        });
        let (start, stop) = match timed {
            Ok(timestamps) => timestamps,
            Err(e) => {
                error!("Critical section fault, sampling halted: {e}");
                self.faulted = true;
                return Err(e);
            }
        };
        let elapsed_ns = u64::try_from(stop.duration_since(start).as_nanos()).unwrap_or(u64::MAX);

        let next = self.spare.take().unwrap_or_else(zeroed_samples);
        let capture = Arc::new(Capture::new(mem::replace(&mut self.buffer, next), elapsed_ns));
        if capture.elapsed_truncated() {
            warn!(
                elapsed_ns,
                wire_elapsed_ns = capture.wire_elapsed(),
                "Capture took longer than the 32-bit elapsed time field can hold"
            );
        }
        CaptureStats::new(&capture).log();

        if let Some(previous) = self.slot.publish(capture.clone()) {
            // Recycle the old buffer unless a reader still holds a snapshot of it
            if let Ok(previous) = Arc::try_unwrap(previous) {
                self.spare = Some(previous.samples);
            }
        }
        Ok(capture)
    }
}

/// Capture over and over, pushing every capture into the ring buffer for a writer thread.
///
/// Stops after `count` captures (if given), when anything arrives on `stop`, or on a fatal
/// sampler error. Returns how many captures were taken.
pub fn capture_loop<W, S>(
    sampler: &mut Sampler<W, S>,
    producer: &mut rtrb::Producer<Arc<Capture>>,
    count: Option<usize>,
    stop: &Receiver<()>,
) -> Result<usize>
where
    W: RegisterWindow,
    S: CriticalSection,
{
    let mut taken = 0usize;
    while count.map_or(true, |n| taken < n) {
        if stop.try_recv().is_ok() {
            debug!("Stop requested");
            break;
        }
        let capture = sampler.capture()?;
        taken += 1;
        if producer.push(capture).is_err() {
            // The writer fell behind, we'd rather keep sampling
            warn!(taken, "Ring buffer full, dropping capture");
        }
    }
    Ok(taken)
}
