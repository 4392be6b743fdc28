//! This module is responsible for getting captures off the box, either as the raw wire
//! bytes or decoded into tab separated `time volts volts` lines.

use std::{
    fs::{self, File},
    io::{self, BufWriter, Write},
    path::{Path, PathBuf},
    sync::Arc,
    thread,
    time::Duration,
};

use chrono::{DateTime, Datelike, Timelike, Utc};
use tracing::{debug, info};

use crate::{capture::Capture, decode::decode, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Format {
    /// The wire format, byte for byte
    Raw,
    /// One `time\tchannel_a\tchannel_b` line per sample
    Decoded,
}

impl Format {
    pub fn extension(self) -> &'static str {
        match self {
            Format::Raw => "bin",
            Format::Decoded => "tsv",
        }
    }
}

/// A filename-safe UTC timestamp
fn file_timestamp(time: &DateTime<Utc>) -> String {
    format!(
        "{}-{:02}-{:02}T{:02}-{:02}-{:02}",
        time.year(),
        time.month(),
        time.day(),
        time.hour(),
        time.minute(),
        time.second()
    )
}

/// Where capture number `index` goes inside `dir`
pub fn capture_path(dir: &Path, time: &DateTime<Utc>, index: usize, format: Format) -> PathBuf {
    dir.join(format!(
        "piscope-{}-{:05}.{}",
        file_timestamp(time),
        index,
        format.extension()
    ))
}

/// Write one capture given in wire format
pub fn write_capture<W: Write>(out: &mut W, raw: &[u8], format: Format) -> Result<()> {
    match format {
        Format::Raw => out.write_all(raw)?,
        Format::Decoded => {
            for sample in decode(raw)? {
                writeln!(out, "{sample}")?;
            }
        }
    }
    Ok(())
}

/// A new file in `output` for capture `index`, or stdout if there's no output directory
pub fn open_sink(output: Option<&Path>, index: usize, format: Format) -> Result<Box<dyn Write>> {
    Ok(match output {
        Some(dir) => {
            fs::create_dir_all(dir)?;
            let path = capture_path(dir, &Utc::now(), index, format);
            debug!(?path, "Writing capture");
            Box::new(BufWriter::new(File::create(path)?))
        }
        None => Box::new(BufWriter::new(io::stdout())),
    })
}

/// Write every capture that comes out of the ring buffer until the sampler hangs up.
/// This doesn't need to be realtime, the ring buffer gives us cushion.
pub fn capture_consumer(
    mut consumer: rtrb::Consumer<Arc<Capture>>,
    output: Option<PathBuf>,
    format: Format,
) -> Result<usize> {
    let mut written = 0usize;
    loop {
        match consumer.pop() {
            Ok(capture) => {
                let mut sink = open_sink(output.as_deref(), written, format)?;
                write_capture(&mut sink, &capture.to_wire(), format)?;
                sink.flush()?;
                written += 1;
            }
            Err(_) if consumer.is_abandoned() => {
                // Anything pushed right before the hang up is still in there
                if consumer.is_empty() {
                    break;
                }
            }
            Err(_) => thread::sleep(Duration::from_millis(1)),
        }
    }
    info!(written, "Capture writer finished");
    Ok(written)
}
