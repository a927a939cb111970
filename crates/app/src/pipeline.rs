// Copyright 2025-2026 CEMAXECUTER LLC

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use crossbeam::channel::{self, Receiver};
use crossbeam::select;

use sv_output::command::{self, PipelineStatus};
use sv_output::jsonl::FrameWriter;
use sv_sdr::file::{FileSource, SampleFormat};
use sv_sdr::tone::ToneSource;
use sv_sdr::SdrSource;
use sv_visual::stage::{self, Fanout};
use sv_visual::{
    ConfigSnapshot, FrameDistributor, SampleChunk, Shared, SpectrumFrame, SpectrumProcessor,
    VisualConfig,
};

use crate::config::Settings;

/// Chunks buffered between the source and the distributor
const SOURCE_QUEUE: usize = 4;

/// Where frames go: JSON lines and, with the zmq feature, a PUB socket.
struct Sinks {
    writer: Option<FrameWriter<Box<dyn Write + Send>>>,
    #[cfg(feature = "zmq")]
    publisher: Option<sv_output::zmq_pub::ZmqPublisher>,
}

impl Sinks {
    fn open(settings: &Settings) -> Result<Self> {
        let writer = match settings.output.path.as_deref() {
            None => None,
            Some(p) if p == Path::new("-") => {
                Some(FrameWriter::new(Box::new(io::stdout()) as Box<dyn Write + Send>))
            }
            Some(p) => {
                let file = File::create(p)
                    .with_context(|| format!("failed to create {}", p.display()))?;
                Some(FrameWriter::new(
                    Box::new(BufWriter::new(file)) as Box<dyn Write + Send>
                ))
            }
        };

        #[cfg(feature = "zmq")]
        let publisher = match settings.output.zmq.as_deref() {
            Some(endpoint) => Some(
                sv_output::zmq_pub::ZmqPublisher::new(
                    endpoint,
                    Some(&settings.output.sensor_id),
                    settings.output.zmq_curve_keyfile.as_deref(),
                )
                .map_err(anyhow::Error::msg)?,
            ),
            None => None,
        };

        Ok(Self {
            writer,
            #[cfg(feature = "zmq")]
            publisher,
        })
    }

    fn spectrum(&mut self, frame: &SpectrumFrame) -> io::Result<()> {
        #[cfg(feature = "zmq")]
        if let Some(ref publisher) = self.publisher {
            publisher.send_spectrum(frame);
        }
        match self.writer {
            Some(ref mut w) => w.write_spectrum(frame),
            None => Ok(()),
        }
    }

    fn waterfall(&mut self, chunk: &SampleChunk) -> io::Result<()> {
        #[cfg(feature = "zmq")]
        if let Some(ref publisher) = self.publisher {
            publisher.send_waterfall(chunk);
        }
        match self.writer {
            Some(ref mut w) => w.write_waterfall(chunk),
            None => Ok(()),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.writer {
            Some(ref mut w) => w.flush(),
            None => Ok(()),
        }
    }
}

/// Initial stage settings from the settings file / CLI.
pub fn initial_config(settings: &Settings) -> ConfigSnapshot {
    ConfigSnapshot {
        center_frequency: settings.source.center_freq.saturating_add(settings.view.offset),
        bandwidth: settings.view.bandwidth,
        fft_size: settings.view.fft_size,
        lines_per_second: settings.view.lines_per_second,
        is_view: settings.view.enabled,
        average_rate: settings.view.average_rate,
    }
}

fn build_source(settings: &Settings) -> Result<(Box<dyn SdrSource>, String)> {
    let src = &settings.source;
    match src.file {
        Some(ref path) => {
            let format: SampleFormat = src.format.parse().map_err(anyhow::Error::msg)?;
            let mut file = FileSource::new(path, format, src.sample_rate, src.center_freq);
            file.set_block_size(src.block_size);
            file.set_realtime(src.realtime);
            file.set_looping(src.looping);
            Ok((Box::new(file), path.display().to_string()))
        }
        None => {
            // Vary chunk sizes around the configured block size
            let b = src.block_size;
            let tone = ToneSource::new(src.sample_rate, src.center_freq)
                .with_tone(src.tone_offset, 0.5)
                .with_noise(src.noise)
                .with_chunk_sizes(vec![b, b / 2 + 1, b + b / 3, b / 7 + 1])
                .with_realtime(true);
            Ok((Box::new(tone), "tone".to_string()))
        }
    }
}

/// Pass a requested stop on to the source. Asserted on every call, so a
/// source that has not started yet still sees it.
fn forward_stop(status: &PipelineStatus, source_running: &AtomicBool) -> bool {
    if status.stop_requested {
        source_running.store(false, Ordering::Relaxed);
    }
    status.stop_requested
}

/// Drain waterfall lines and spectrum frames into the sinks until both
/// upstream stages are gone.
fn run_sink(
    lines: Receiver<Shared<SampleChunk>>,
    frames: Receiver<Shared<SpectrumFrame>>,
    mut sinks: Sinks,
) -> io::Result<()> {
    let no_lines = channel::never();
    let no_frames = channel::never();
    let mut lines_open = true;
    let mut frames_open = true;

    while lines_open || frames_open {
        let lines_rx = if lines_open { &lines } else { &no_lines };
        let frames_rx = if frames_open { &frames } else { &no_frames };

        select! {
            recv(lines_rx) -> msg => match msg {
                Ok(chunk) => sinks.waterfall(&chunk)?,
                Err(_) => lines_open = false,
            },
            recv(frames_rx) -> msg => match msg {
                Ok(frame) => sinks.spectrum(&frame)?,
                Err(_) => frames_open = false,
            },
        }
    }

    sinks.flush()
}

/// Run source → distributor → {spectrum, waterfall} → sinks until the
/// source is exhausted or a `stop` request arrives.
pub fn run(settings: &Settings, control_stdin: bool, print_stats: bool) -> Result<()> {
    let config = Arc::new(VisualConfig::from_snapshot(&initial_config(settings)));
    let running = Arc::new(AtomicBool::new(true));

    let (mut source, source_name) = build_source(settings)?;
    let source_running = source.stop_flag();
    let sample_rate = source.sample_rate();
    let status = Arc::new(Mutex::new(PipelineStatus::new(&source_name, sample_rate)));
    let sinks = Sinks::open(settings)?;

    log::info!(
        "source: {} ({} Hz, {} Hz center), view: {:?}",
        source_name,
        sample_rate,
        source.center_frequency(),
        config.snapshot()
    );

    // Stages: the distributor cuts windows sized for the spectrum stage
    let spectrum = SpectrumProcessor::new(config.clone());
    let distributor =
        FrameDistributor::new(config.clone()).with_window_source(spectrum.desired_input_handle());
    let line_pool = distributor.pool().clone();
    let frame_pool = spectrum.pool().clone();

    let (source_tx, source_rx) = stage::queue::<SampleChunk>(SOURCE_QUEUE);
    let (spectrum_tx, spectrum_rx) = stage::queue::<SampleChunk>(1);
    let (lines_tx, lines_rx) = stage::queue::<SampleChunk>(1);
    let (frames_tx, frames_rx) = stage::queue::<SpectrumFrame>(1);

    let mut distributor_out = Fanout::new();
    distributor_out.attach(spectrum_tx);
    distributor_out.attach(lines_tx);
    let mut spectrum_out = Fanout::new();
    spectrum_out.attach(frames_tx);

    let distributor_stage = stage::spawn_stage(
        "distributor",
        distributor,
        source_rx,
        distributor_out,
        running.clone(),
    )
    .context("failed to spawn distributor")?;
    let spectrum_stage = stage::spawn_stage(
        "spectrum",
        spectrum,
        spectrum_rx,
        spectrum_out,
        running.clone(),
    )
    .context("failed to spawn spectrum stage")?;

    let sink_thread = thread::Builder::new()
        .name("sink".into())
        .spawn(move || run_sink(lines_rx, frames_rx, sinks))
        .context("failed to spawn sink")?;

    let source_thread = thread::Builder::new()
        .name("source".into())
        .spawn(move || {
            if let Err(e) = source.start(source_tx) {
                log::error!("source error: {}", e);
            }
        })
        .context("failed to spawn source")?;

    if control_stdin {
        let config = config.clone();
        let status = status.clone();
        // Detached: blocked on stdin until EOF
        thread::Builder::new()
            .name("control-stdin".into())
            .spawn(move || {
                let stdin = io::stdin();
                match command::serve_lines(&config, &status, stdin.lock(), io::stderr()) {
                    Ok(n) => log::debug!("control: stdin closed after {} requests", n),
                    Err(e) => log::warn!("control: stdin error: {}", e),
                }
            })
            .context("failed to spawn stdin control")?;
    }

    #[cfg(feature = "zmq")]
    let control_thread = match settings.output.zmq_control.clone().or_else(|| {
        settings
            .output
            .zmq
            .as_deref()
            .map(sv_output::zmq_pub::derive_control_endpoint)
    }) {
        Some(endpoint) => {
            let client = sv_output::control::ControlClient::new(
                &endpoint,
                &settings.output.sensor_id,
                settings.output.zmq_curve_keyfile.as_deref(),
                config.clone(),
                status.clone(),
                running.clone(),
            )
            .map_err(anyhow::Error::msg)?;
            Some(
                thread::Builder::new()
                    .name("control-zmq".into())
                    .spawn(move || client.run())
                    .context("failed to spawn control client")?,
            )
        }
        None => None,
    };

    // Stats until the pipeline drains
    let distributor_stats = distributor_stage.stats();
    let spectrum_stats = spectrum_stage.stats();
    let stats_interval = Duration::from_secs(settings.output.stats_interval.max(1));
    let stats_start = Instant::now();
    let mut last_stats = Instant::now();
    let mut stopping = false;

    while !sink_thread.is_finished() {
        thread::sleep(Duration::from_millis(100));

        {
            let mut s = status.lock().unwrap_or_else(|e| e.into_inner());
            s.chunks_in = distributor_stats.processed();
            s.waterfall_lines = distributor_stats.emitted();
            s.spectrum_frames = spectrum_stats.emitted();
            s.stalls = distributor_stats.stalls() + spectrum_stats.stalls();
            if forward_stop(&s, &source_running) && !stopping {
                log::info!("stop requested, draining pipeline");
                stopping = true;
            }
        }

        if print_stats && last_stats.elapsed() >= stats_interval {
            log::info!(
                "[{:.1}s] chunks: {} lines: {} frames: {} stalls: {}/{} pools: {}/{} lines, {}/{} frames",
                stats_start.elapsed().as_secs_f64(),
                distributor_stats.processed(),
                distributor_stats.emitted(),
                spectrum_stats.emitted(),
                distributor_stats.stalls(),
                spectrum_stats.stalls(),
                line_pool.outstanding(),
                line_pool.allocated(),
                frame_pool.outstanding(),
                frame_pool.allocated(),
            );
            last_stats = Instant::now();
        }
    }

    // The sink can also end early on a write error
    source_running.store(false, Ordering::Relaxed);
    running.store(false, Ordering::Relaxed);
    let sink_result = sink_thread.join();
    let _ = source_thread.join();
    distributor_stage.join();
    spectrum_stage.join();
    #[cfg(feature = "zmq")]
    if let Some(t) = control_thread {
        let _ = t.join();
    }

    if print_stats {
        log::info!(
            "done ({:.1}s): chunks: {} lines: {} frames: {}",
            stats_start.elapsed().as_secs_f64(),
            distributor_stats.processed(),
            distributor_stats.emitted(),
            spectrum_stats.emitted(),
        );
    }

    match sink_result {
        Ok(result) => result.context("failed to write frames"),
        Err(_) => anyhow::bail!("sink thread panicked"),
    }
}
