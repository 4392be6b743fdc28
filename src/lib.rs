//! User-space capture engine and decoder for a two channel, 6-bit parallel ADC
//! scope wired to the Raspberry Pi GPIO header.

pub mod args;
pub mod capture;
pub mod clock;
pub mod critical;
pub mod decode;
pub mod error;
pub mod exfil;
pub mod export;
pub mod gpio;
pub mod monitoring;
pub mod registers;

pub use capture::{Capture, CaptureSlot, Sampler};
pub use decode::{decode, DecodedSample};
pub use error::{Error, Result};
pub use export::{CaptureExport, ReadHandle, ScopeDevice};
pub use registers::{MappedWindow, RegisterWindow, SimulatedWindow};

/// Number of GPIO level snapshots in one capture
pub const SAMPLE_COUNT: usize = 10_000;
/// Size in bytes of one raw sample word (and of the trailing elapsed-time word)
pub const WORD_SIZE: usize = 4;
/// Length of one capture on the wire: the samples followed by the elapsed time
pub const CAPTURE_BYTES: usize = SAMPLE_COUNT * WORD_SIZE + WORD_SIZE;

/// Full scale of the ADCs in volts
pub const FULL_SCALE_VOLTS: f64 = 5.0;
/// Largest code a 6-bit ADC produces
pub const MAX_CODE: u8 = 63;
