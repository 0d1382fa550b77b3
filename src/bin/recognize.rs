//! Identify a song from an audio file.
//!
//! Decodes the file, normalizes it to 16 kHz mono, cuts it into windows and
//! submits one signature per window, printing the playback offset and the
//! result of each attempt.
//!
//! Usage:
//!     recognize [OPTIONS] <FILE>

use std::path::PathBuf;
use std::process;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use songsig::fingerprinting::communication::SignaturePayload;
use songsig::{
    normalize_file, wavfile, Config, RateLimiter, RecognitionSession, ShazamTransport,
    TARGET_SAMPLE_RATE,
};

#[derive(Parser, Debug)]
#[command(name = "recognize", about = "Identify a song from an audio file")]
struct Args {
    /// Audio file (WAV, MP3, FLAC)
    file: PathBuf,

    /// Seconds of audio per signature
    #[arg(long)]
    window: Option<f64>,

    /// Start at the beginning even for long inputs
    #[arg(long)]
    no_skip: bool,

    /// Print the encoded signatures instead of submitting them
    #[arg(long)]
    signatures_only: bool,

    /// Stop after the first recognized window
    #[arg(long)]
    first_match: bool,

    /// Minimum seconds between requests
    #[arg(long)]
    interval: Option<f64>,

    /// Write the normalized 16 kHz mono audio to this WAV file
    #[arg(long)]
    save_normalized: Option<PathBuf>,

    /// Show saved defaults and exit
    #[arg(long)]
    show_saved_defaults: bool,

    /// Save the options given on this command line as defaults
    #[arg(long)]
    save_defaults: bool,

    /// Debug logging
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    fn to_config(&self) -> Config {
        Config {
            max_window_seconds: self.window,
            skip_ahead: if self.no_skip { Some(false) } else { None },
            request_interval_secs: self.interval,
            ..Default::default()
        }
    }
}

fn main() {
    let args = Args::parse();

    let default_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let saved_config = Config::load().unwrap_or_else(|e| {
        eprintln!("Warning: ignoring saved defaults: {}", e);
        Config::new()
    });

    if args.show_saved_defaults {
        saved_config.print("Saved defaults");
        return;
    }

    let cli_config = args.to_config();
    if args.save_defaults {
        let mut to_save = saved_config.clone();
        to_save.merge(&cli_config);
        match to_save.save() {
            Ok(()) => println!("Defaults saved."),
            Err(e) => eprintln!("Failed to save defaults: {}", e),
        }
    }

    let mut config = saved_config;
    config.merge(&cli_config);

    if let Err(e) = run(&args, &config) {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

fn run(args: &Args, config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    let samples = normalize_file(&args.file)?;
    println!(
        "Loaded {} ({:.1}s at {} Hz)",
        args.file.display(),
        samples.len() as f64 / TARGET_SAMPLE_RATE as f64,
        TARGET_SAMPLE_RATE
    );

    if let Some(path) = &args.save_normalized {
        wavfile::write_wav(path, &samples, TARGET_SAMPLE_RATE)?;
        println!("Normalized audio written to {}", path.display());
    }

    let session = RecognitionSession::from_samples(
        samples,
        config.generator_config(),
        config.extractor_config(),
    )?;

    if args.signatures_only {
        for payload in session {
            print_signature(&payload?);
        }
        return Ok(());
    }

    let limiter = RateLimiter::from_secs_f64("shazam", config.request_interval_secs.unwrap_or(1.0));
    let mut matched = false;
    for recognition in session
        .recognize(ShazamTransport::from_config(config))
        .with_rate_limiter(limiter)
    {
        let recognition = recognition?;
        let prefix = format!(
            "[{:>7.1}s] {:>4} peaks",
            recognition.offset_seconds, recognition.payload.peak_count
        );
        match &recognition.outcome {
            Ok(Some(track)) => {
                matched = true;
                match &track.album {
                    Some(album) => println!("{}  {} [{}]", prefix, track, album),
                    None => println!("{}  {}", prefix, track),
                }
                if args.first_match {
                    break;
                }
            }
            Ok(None) => println!("{}  no match", prefix),
            Err(e) => println!("{}  error: {}", prefix, e),
        }
    }

    if !matched {
        println!("No match found.");
    }
    Ok(())
}

fn print_signature(payload: &SignaturePayload) {
    println!(
        "[{:>7.1}s] {:>4} peaks {:>6} ms  {}",
        payload.offset_seconds,
        payload.peak_count,
        payload.sample_ms(),
        payload.encoded_signature
    );
}
