//! Receiver orchestration
//!
//! Wires the CLI surface to the decoder: builds parsers, configures
//! the SDR front-end, and drives the producer/decoder pair until a
//! signal, the time limit, or a transport error stops it.
//!
//! Two pre-allocated sample blocks circulate between the network
//! producer thread and the decoder: the producer fills one while the
//! decoder processes the other, and the bounded channels provide the
//! backpressure. Neither side allocates per block.

use std::collections::HashSet;
use std::fs::File;
use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use crossbeam_channel::{bounded, Receiver, Sender};
use log::{error, info, warn};

use ertrx::{
    Decoder, DigestWindow, FilterChain, LogMessage, MeterIdFilter, MeterTypeFilter, UniqueFilter,
    new_parser,
};

use crate::cli::Args;
use crate::output;
use crate::rtltcp::Sdr;

// Set from the signal handler; polled by both tasks.
static RUNNING: AtomicBool = AtomicBool::new(true);

extern "C" fn handle_signal(_sig: libc::c_int) {
    RUNNING.store(false, Ordering::SeqCst);
}

// The handler only stores an atomic, which is async-signal-safe.
fn install_signal_handlers() {
    unsafe {
        libc::signal(libc::SIGINT, handle_signal as *const () as libc::sighandler_t);
        libc::signal(libc::SIGTERM, handle_signal as *const () as libc::sighandler_t);
    }
}

/// Run the receiver until completion or shutdown
pub fn run(args: Args) -> Result<()> {
    install_signal_handlers();

    // Build and register a parser per requested message type.
    let mut decoder = Decoder::new();
    for name in args.message_types() {
        let parser = new_parser(&name, args.symbollength)
            .with_context(|| format!("unrecognized --msgtype {:?}", name))?;
        decoder.register(parser);
    }
    decoder.allocate();

    if !args.symbol_length_valid() {
        warn!("invalid symbol length, probably won't receive anything");
    }
    if !args.quiet {
        decoder.log();
    }

    // Connect to the rtl_tcp server and configure the front-end.
    let mut sdr = Sdr::connect(&args.server)
        .with_context(|| format!("connecting to rtl_tcp at {}", args.server))?;
    info!("GainCount: {}", sdr.info().gain_count);

    let center_freq = args.centerfreq.unwrap_or(decoder.cfg().center_freq);
    let sample_rate = args.samplerate.unwrap_or(decoder.cfg().sample_rate);
    sdr.set_center_freq(center_freq).context("setting center frequency")?;
    sdr.set_sample_rate(sample_rate).context("setting sample rate")?;

    if let Some(manual) = args.tunergainmode {
        sdr.set_tuner_gain_mode(manual).context("setting gain mode")?;
    }
    if let Some(gain) = args.tunergain {
        sdr.set_tuner_gain((gain * 10.0) as u32).context("setting tuner gain")?;
    }
    if let Some(on) = args.agcmode {
        sdr.set_agc_mode(on).context("setting agc mode")?;
    }
    if let Some(idx) = args.gainbyindex {
        sdr.set_gain_by_index(idx).context("setting gain by index")?;
    }
    if let Some(ppm) = args.freqcorrection {
        sdr.set_freq_correction(ppm as u32).context("setting frequency correction")?;
    }
    if let Some(on) = args.testmode {
        sdr.set_test_mode(on).context("setting test mode")?;
    }
    if let Some(on) = args.directsampling {
        sdr.set_direct_sampling(on).context("setting direct sampling")?;
    }
    if let Some(on) = args.offsettuning {
        sdr.set_offset_tuning(on).context("setting offset tuning")?;
    }
    if let Some(freq) = args.rtlxtalfreq {
        sdr.set_rtl_xtal_freq(freq).context("setting rtl xtal frequency")?;
    }
    if let Some(freq) = args.tunerxtalfreq {
        sdr.set_tuner_xtal_freq(freq).context("setting tuner xtal frequency")?;
    }
    if !args.gain_flag_set() {
        sdr.set_tuner_gain_mode(false).context("setting automatic gain")?;
    }

    // Message selection.
    let mut chain = FilterChain::new();
    if !args.filterid.is_empty() {
        chain.add(Box::new(MeterIdFilter::new(args.filterid.iter().copied().collect())));
    }
    if !args.filtertype.is_empty() {
        chain.add(Box::new(MeterTypeFilter::new(args.filtertype.iter().copied().collect())));
    }
    if args.unique {
        chain.add(Box::new(UniqueFilter::new()));
    }

    // Output.
    let writer: Box<dyn Write + Send> = Box::new(io::stdout());
    let dumping = args.samplefile.is_some();
    let mut sample_file = match &args.samplefile {
        Some(path) => Some(
            File::create(path).with_context(|| format!("creating sample file {:?}", path))?,
        ),
        None => None,
    };
    let mut encoder = output::new_encoder(args.format, writer, dumping);

    // Two blocks circulate: filled blocks one way, spent blocks back.
    let block_bytes = decoder.cfg().block_size * 2;
    let (full_tx, full_rx) = bounded::<io::Result<Vec<u8>>>(1);
    let (empty_tx, empty_rx) = bounded::<Vec<u8>>(2);
    for _ in 0..2 {
        empty_tx.send(vec![0u8; block_bytes]).expect("seeding block channel");
    }

    let producer = thread::Builder::new()
        .name("sdr-reader".into())
        .spawn(move || produce(sdr, full_tx, empty_rx))
        .context("spawning reader thread")?;

    let outcome = decode_loop(
        &args,
        &mut decoder,
        &mut chain,
        &mut encoder,
        &mut sample_file,
        &full_rx,
        &empty_tx,
    );

    // Unblock and collect the producer. Dropping the channel ends it
    // even if the socket is still healthy.
    RUNNING.store(false, Ordering::SeqCst);
    drop(full_rx);
    drop(empty_tx);
    if let Err(e) = producer.join() {
        error!("reader thread panicked: {:?}", e);
    }

    outcome
}

// Network producer: fills recycled blocks from the socket until
// shutdown or a transport error.
fn produce(mut sdr: Sdr, full_tx: Sender<io::Result<Vec<u8>>>, empty_rx: Receiver<Vec<u8>>) {
    while RUNNING.load(Ordering::SeqCst) {
        let mut block = match empty_rx.recv() {
            Ok(block) => block,
            Err(_) => break, // decoder is gone
        };

        if let Err(e) = sdr.read_block(&mut block) {
            // On shutdown the socket is torn down under us; that is
            // not a reportable error.
            if RUNNING.load(Ordering::SeqCst) {
                let _ = full_tx.send(Err(e));
            }
            break;
        }

        if full_tx.send(Ok(block)).is_err() {
            break;
        }
    }

    let _ = sdr.close();
}

#[allow(clippy::too_many_arguments)]
fn decode_loop(
    args: &Args,
    decoder: &mut Decoder,
    chain: &mut FilterChain,
    encoder: &mut Box<dyn output::Encoder>,
    sample_file: &mut Option<File>,
    full_rx: &Receiver<io::Result<Vec<u8>>>,
    empty_tx: &Sender<Vec<u8>>,
) -> Result<()> {
    let start = Instant::now();
    let time_limit = (args.duration > 0.0).then(|| Duration::from_secs_f64(args.duration));

    // Rolling window of raw samples backing the dump file: at most one
    // buffer's worth, so the Offset field points at the decoded packet.
    let dumping = sample_file.is_some();
    let ring_cap = decoder.cfg().buffer_length * 2;
    let mut sample_ring: Vec<u8> = Vec::with_capacity(ring_cap + decoder.cfg().block_size * 2);
    let mut file_offset = 0u64;

    let mut window = DigestWindow::new();
    let mut single_ids: HashSet<u32> = args.filterid.iter().copied().collect();

    loop {
        if !RUNNING.load(Ordering::SeqCst) {
            return Ok(());
        }
        if let Some(limit) = time_limit {
            if start.elapsed() >= limit {
                info!("time limit reached: {:?}", start.elapsed());
                return Ok(());
            }
        }

        // Wake periodically to observe signals and the time limit.
        let block = match full_rx.recv_timeout(Duration::from_millis(100)) {
            Ok(Ok(block)) => block,
            Ok(Err(e)) => return Err(e).context("reading samples"),
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => continue,
            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => return Ok(()),
        };

        if dumping {
            if sample_ring.len() > ring_cap {
                sample_ring.drain(..block.len());
            }
            sample_ring.extend_from_slice(&block);
        }

        let mut packet_found = false;
        for msg in decoder.decode(&block) {
            if !chain.matches(&msg) {
                continue;
            }
            if !window.check(&msg) {
                continue;
            }

            let meter_id = msg.meter_id();
            let log_msg = LogMessage::new(file_offset, sample_ring.len(), msg);
            encoder.encode(&log_msg).context("encoding message")?;
            packet_found = true;

            if args.single {
                if single_ids.is_empty() {
                    break;
                }
                single_ids.remove(&meter_id);
            }
        }
        window.advance();

        // Hand the spent block back for reuse.
        let _ = empty_tx.send(block);

        if packet_found {
            if let Some(file) = sample_file.as_mut() {
                file.write_all(&sample_ring).context("writing raw samples")?;
                file_offset += sample_ring.len() as u64;
            }
            if args.single && single_ids.is_empty() {
                return Ok(());
            }
        }
    }
}
