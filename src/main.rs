use std::{
    fs,
    io::{self, Read, Write},
    path::Path,
    sync::Arc,
    thread,
};

use clap::Parser;
use crossbeam_channel::bounded;
use pi_scope::{
    args::{convert_filter, Args, CaptureArgs, Command},
    capture::capture_loop,
    clock::{self, SCOPE_CLOCK},
    critical::Realtime,
    exfil::{self, Format},
    gpio,
    registers::Peripherals,
    CaptureSlot, Error, Result, Sampler, ScopeDevice, CAPTURE_BYTES,
};
use tracing::{error, info};

fn capture(args: CaptureArgs) -> Result<()> {
    let format = if args.raw {
        Format::Raw
    } else {
        Format::Decoded
    };

    // Anything failing up to here leaves us with nothing to sample with
    let Peripherals {
        gpio: gpio_window,
        clock: clock_window,
    } = Peripherals::map(&args.mem, args.peripheral_base)?;
    gpio::configure_scope_pins(&gpio_window);
    clock::configure(&clock_window, &SCOPE_CLOCK)?;

    let sampler = Sampler::new(
        gpio_window,
        Realtime::new(args.cpu),
        Arc::new(CaptureSlot::new()),
    );

    if args.count == 1 {
        // Single shot, straight through the capture device
        let device = ScopeDevice::new(sampler);
        let mut handle = device.open()?;
        let mut raw = Vec::with_capacity(CAPTURE_BYTES);
        handle.read_to_end(&mut raw)?;
        handle.close();
        let mut sink = exfil::open_sink(args.output.as_deref(), 0, format)?;
        exfil::write_capture(&mut sink, &raw, format)?;
        sink.flush()?;
        return Ok(());
    }

    // Setup the stop signal
    let (stop_tx, stop_rx) = bounded(1);
    ctrlc::set_handler(move || {
        let _ = stop_tx.try_send(());
    })?;

    // Start the writer on its own thread, sampling stays on this one
    let (mut producer, consumer) = rtrb::RingBuffer::new(args.capacity as usize);
    let output = args.output.clone();
    let writer = thread::spawn(move || exfil::capture_consumer(consumer, output, format));

    let mut sampler = sampler;
    let count = (args.count > 0).then_some(args.count);
    let taken = capture_loop(&mut sampler, &mut producer, count, &stop_rx);
    // Hang up so the writer drains and exits
    drop(producer);
    let written = writer
        .join()
        .map_err(|_| Error::WriterPanicked)??;
    let taken = taken?;
    info!(taken, written, "Done capturing");
    Ok(())
}

fn decode(path: &Path) -> Result<()> {
    let raw = if path == Path::new("-") {
        let mut raw = Vec::with_capacity(CAPTURE_BYTES);
        io::stdin().lock().read_to_end(&mut raw)?;
        raw
    } else {
        fs::read(path)?
    };
    let stdout = io::stdout();
    let mut out = io::BufWriter::new(stdout.lock());
    exfil::write_capture(&mut out, &raw, Format::Decoded)?;
    out.flush()?;
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();
    tracing_subscriber::fmt()
        .with_max_level(convert_filter(args.verbose.log_level_filter()))
        .with_writer(io::stderr)
        .init();

    let result = match args.command {
        Command::Capture(capture_args) => capture(capture_args),
        Command::Decode { path } => decode(&path),
    };
    if let Err(e) = &result {
        error!("{e}");
    }
    result
}
