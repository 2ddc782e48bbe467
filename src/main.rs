use std::path::PathBuf;
use std::process::ExitCode;
use std::time::{Duration, Instant};

use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use oracle_voice::bridge::PlaybackSchedule;
use oracle_voice::voice::{
    AudioCapture, AudioDeviceContext, AudioPlayback, CAPTURE_SAMPLE_RATE, CpalBackend,
    Microphone, PLAYBACK_SAMPLE_RATE, PcmBuffer, PlaybackScheduler, samples_to_wav,
};
use oracle_voice::{Config, LiveConnector, Persona, StreamingAudioBridge, shell};

/// Oracle - Realtime voice conversations with a live AI session
#[derive(Parser)]
#[command(name = "oracle", version, about)]
struct Cli {
    /// Path to a persona JSON file
    #[arg(short, long)]
    persona: Option<PathBuf>,

    /// Model identifier
    #[arg(short, long)]
    model: Option<String>,

    /// Prebuilt voice name
    #[arg(long)]
    voice: Option<String>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
#[allow(clippy::enum_variant_names)]
enum Command {
    /// Test microphone input
    TestMic {
        /// Duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,

        /// Save the recording as a WAV file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Test speaker output
    TestSpeaker,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "warn,oracle_voice=info",
        1 => "info,oracle_voice=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_writer(std::io::stderr)
        .init();

    // wss needs a process-wide TLS crypto provider
    let _ = rustls::crypto::ring::default_provider().install_default();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

#[allow(clippy::future_not_send)]
async fn run(cli: Cli) -> anyhow::Result<()> {
    if let Some(cmd) = cli.command {
        return match cmd {
            Command::TestMic { duration, output } => test_mic(duration, output).await,
            Command::TestSpeaker => test_speaker().await,
        };
    }

    let mut config = Config::load()?;
    if let Some(path) = cli.persona {
        config.persona = Persona::load(&path)?;
        config.persona_path = Some(path);
    }
    if let Some(model) = cli.model {
        config.model = model;
    }
    if let Some(voice) = cli.voice {
        config.voice = voice;
    }
    tracing::debug!(?config, "loaded configuration");

    tracing::info!(
        persona = %config.persona.name,
        model = %config.model,
        voice = %config.voice,
        "starting oracle"
    );

    let options = config.bridge_options();
    let agent_name = config.persona.name.clone();
    let connector = LiveConnector::new(config.api_key).with_endpoint(config.endpoint);

    let (update_tx, update_rx) = mpsc::unbounded_channel();
    let (command_tx, command_rx) = mpsc::unbounded_channel();

    // Audio streams are not Send, so the bridge stays on this task
    let mut bridge = StreamingAudioBridge::new(
        connector,
        AudioDeviceContext::new(CpalBackend),
        options,
        update_tx,
    );

    tokio::join!(
        bridge.run(command_rx),
        shell::run(command_tx, update_rx, agent_name)
    );

    Ok(())
}

/// Test microphone input
#[allow(clippy::future_not_send)]
async fn test_mic(duration: u64, output: Option<PathBuf>) -> anyhow::Result<()> {
    println!("Testing microphone for {duration} seconds...");
    println!("Speak into your microphone!\n");

    let mut capture = AudioCapture::new(CAPTURE_SAMPLE_RATE)?;
    capture.acquire()?;

    // One frame per tenth of a second
    let mut frames = capture.open_capture(CAPTURE_SAMPLE_RATE as usize / 10)?;

    println!(
        "Sample rate: {CAPTURE_SAMPLE_RATE} Hz (resampling: {})",
        capture.is_resampling()
    );
    println!("---");

    let mut recording = Vec::new();
    let mut second = Vec::new();
    let deadline = Instant::now() + Duration::from_secs(duration);
    let mut elapsed = 0;

    while Instant::now() < deadline {
        let frame = match read_mic_frame(&mut frames, Duration::from_secs(1)).await {
            MicRead::Frame(frame) => frame,
            MicRead::Ended => {
                println!("Capture stream ended");
                break;
            }
            MicRead::Silent => {
                println!("No audio received in the last second");
                continue;
            }
        };
        second.extend_from_slice(&frame);
        recording.extend_from_slice(&frame);

        if second.len() >= CAPTURE_SAMPLE_RATE as usize {
            elapsed += 1;
            print_meter(elapsed, &second);
            second.clear();
        }
    }

    capture.release();

    if let Some(path) = output {
        let wav = samples_to_wav(&recording, CAPTURE_SAMPLE_RATE)?;
        std::fs::write(&path, wav)?;
        println!("\nSaved {} samples to {}", recording.len(), path.display());
    }

    println!("\n---");
    println!("If you saw movement in the meter, your mic is working!");
    println!("If RMS stayed near 0, check:");
    println!("  1. Is your mic plugged in?");
    println!("  2. Run: pactl info | grep 'Default Source'");
    println!("  3. Run: arecord -l (to list devices)");

    Ok(())
}

/// Outcome of waiting for one capture frame
#[derive(Debug, PartialEq)]
enum MicRead {
    Frame(Vec<f32>),
    Silent,
    Ended,
}

async fn read_mic_frame(
    frames: &mut mpsc::UnboundedReceiver<Vec<f32>>,
    wait: Duration,
) -> MicRead {
    match tokio::time::timeout(wait, frames.recv()).await {
        Ok(Some(frame)) => MicRead::Frame(frame),
        Ok(None) => MicRead::Ended,
        Err(_) => MicRead::Silent,
    }
}

fn print_meter(second: u64, samples: &[f32]) {
    let energy = calculate_rms(samples);
    let peak = samples.iter().map(|s| s.abs()).fold(0.0f32, f32::max);

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let meter_len = (energy * 100.0).min(50.0) as usize;
    let meter: String = "#".repeat(meter_len) + &" ".repeat(50 - meter_len);

    println!("[{second:2}s] RMS: {energy:.4} | Peak: {peak:.4} | [{meter}]");
}

/// Calculate RMS energy
#[allow(clippy::cast_precision_loss)]
fn calculate_rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_squares: f32 = samples.iter().map(|s| s * s).sum();
    (sum_squares / samples.len() as f32).sqrt()
}

/// Test speaker output with back-to-back tone fragments
#[allow(clippy::future_not_send)]
async fn test_speaker() -> anyhow::Result<()> {
    println!("Testing speaker output...");
    println!("You should hear three 0.5s tones rising in pitch, with no gaps\n");

    let (ended_tx, mut ended_rx) = mpsc::unbounded_channel();
    let mut playback = AudioPlayback::new(PLAYBACK_SAMPLE_RATE, ended_tx)?;
    playback.resume()?;
    println!(
        "Sample rate: {PLAYBACK_SAMPLE_RATE} Hz, {} output channel(s)",
        playback.channels()
    );

    let mut schedule = PlaybackSchedule::new();
    for frequency in [440.0_f32, 554.37, 659.25] {
        let buffer = PcmBuffer::new(tone(frequency, 0.5), PLAYBACK_SAMPLE_RATE, 1)?;
        let start = schedule.enqueue(&mut playback, &buffer)?;
        println!("Scheduled {frequency} Hz at {start:.3}s");
    }

    while schedule.active_count() > 0 {
        match tokio::time::timeout(Duration::from_secs(3), ended_rx.recv()).await {
            Ok(Some(handle)) => schedule.finished(handle),
            _ => {
                println!("Playback did not finish in time");
                break;
            }
        }
    }
    playback.suspend();

    println!("\n---");
    println!("If you heard the tones, your speakers are working!");
    println!("If you didn't hear anything, check:");
    println!("  1. Run: pactl info | grep 'Default Sink'");
    println!("  2. Run: pactl list sinks short");

    Ok(())
}

/// Sine tone at 30% volume
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
fn tone(frequency: f32, seconds: f32) -> Vec<f32> {
    let sample_rate = PLAYBACK_SAMPLE_RATE as f32;
    let num_samples = (sample_rate * seconds) as usize;
    (0..num_samples)
        .map(|i| {
            let t = i as f32 / sample_rate;
            (2.0 * std::f32::consts::PI * frequency * t).sin() * 0.3
        })
        .collect()
}
