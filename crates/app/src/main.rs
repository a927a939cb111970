// Copyright 2025-2026 CEMAXECUTER LLC

mod config;
mod pipeline;

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;

use crate::config::Settings;

#[derive(Parser, Debug)]
#[command(name = "spectrum-view")]
#[command(about = "Rate-adaptive waterfall and smoothed spectrum from IQ samples")]
struct Cli {
    /// IQ file input (synthetic tone when omitted)
    #[arg(short = 'f', long)]
    file: Option<PathBuf>,

    /// Sample format for file input: ci8, ci16, cf32
    #[arg(long)]
    format: Option<String>,

    /// Sample rate in Hz
    #[arg(short = 'r', long)]
    sample_rate: Option<u32>,

    /// Source center frequency in Hz
    #[arg(short = 'c', long, allow_negative_numbers = true)]
    center_freq: Option<i64>,

    /// FFT size (spectrum points)
    #[arg(long)]
    fft_size: Option<usize>,

    /// Waterfall lines per second (0 disables)
    #[arg(long)]
    lps: Option<i32>,

    /// Displayed bandwidth in Hz (0 = full sample rate)
    #[arg(long)]
    bandwidth: Option<u64>,

    /// View center offset from the source center in Hz
    #[arg(long, allow_negative_numbers = true)]
    offset: Option<i64>,

    /// Spectrum averaging rate in (0, 1]; 1 = no smoothing
    #[arg(long)]
    average_rate: Option<f32>,

    /// Start with the spectrum view inactive
    #[arg(long)]
    no_view: bool,

    /// Pace file input to the sample rate
    #[arg(long)]
    realtime: bool,

    /// Rewind file input at end of file
    #[arg(long = "loop")]
    looping: bool,

    /// JSON lines output file ("-" for stdout)
    #[arg(short = 'w', long)]
    output: Option<PathBuf>,

    /// TOML settings file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Read JSON control requests from stdin
    #[arg(long)]
    control_stdin: bool,

    /// ZMQ endpoint to publish frames on
    #[cfg(feature = "zmq")]
    #[arg(long)]
    zmq: Option<String>,

    /// ZMQ control endpoint (default: publish port + 1)
    #[cfg(feature = "zmq")]
    #[arg(long)]
    zmq_control: Option<String>,

    /// Verbose output
    #[arg(short = 'v', long)]
    verbose: bool,

    /// Print statistics
    #[arg(long)]
    stats: bool,
}

impl Cli {
    /// Overlay command-line values on the settings file.
    fn apply(&self, settings: &mut Settings) {
        if let Some(ref file) = self.file {
            settings.source.file = Some(file.clone());
        }
        if let Some(ref format) = self.format {
            settings.source.format = format.clone();
        }
        if let Some(rate) = self.sample_rate {
            settings.source.sample_rate = rate;
        }
        if let Some(freq) = self.center_freq {
            settings.source.center_freq = freq;
        }
        if let Some(size) = self.fft_size {
            settings.view.fft_size = size;
        }
        if let Some(lps) = self.lps {
            settings.view.lines_per_second = lps;
        }
        if let Some(bw) = self.bandwidth {
            settings.view.bandwidth = bw;
        }
        if let Some(offset) = self.offset {
            settings.view.offset = offset;
        }
        if let Some(rate) = self.average_rate {
            settings.view.average_rate = rate;
        }
        if self.no_view {
            settings.view.enabled = false;
        }
        if self.realtime {
            settings.source.realtime = true;
        }
        if self.looping {
            settings.source.looping = true;
        }
        if let Some(ref output) = self.output {
            settings.output.path = Some(output.clone());
        }
        #[cfg(feature = "zmq")]
        {
            if let Some(ref endpoint) = self.zmq {
                settings.output.zmq = Some(endpoint.clone());
            }
            if let Some(ref endpoint) = self.zmq_control {
                settings.output.zmq_control = Some(endpoint.clone());
            }
        }
    }
}

fn run(cli: &Cli) -> Result<()> {
    let mut settings = match cli.config {
        Some(ref path) => Settings::load(path)?,
        None => Settings::default(),
    };
    cli.apply(&mut settings);
    settings.validate()?;

    if cli.verbose {
        log::info!("spectrum-view starting");
        log::info!("settings: {:?}", settings);
    }

    pipeline::run(&settings, cli.control_stdin, cli.stats)
}

fn main() {
    let cli = Cli::parse();
    let default_level = if cli.verbose || cli.stats { "info" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .init();

    if let Err(e) = run(&cli) {
        eprintln!("error: {:#}", e);
        std::process::exit(1);
    }
}
